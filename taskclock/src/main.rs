use anyhow::{Context, Result};
use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::{Backend, CrosstermBackend},
    Terminal,
};
use std::fs::{self, OpenOptions};
use std::io;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use taskclock_core::{settings, ChannelMessage};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod app;
mod config;
mod ui;

use app::{App, AppMode};

const LOG_ENV: &str = "TASKCLOCK_LOG";
const LOG_FILE: &str = "taskclock.log";

/// The terminal belongs to the board, so logs go to a file in the data dir.
fn init_logging() -> Result<()> {
    let Some(dir) = settings::data_dir() else {
        return Ok(());
    };
    fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create data directory {:?}", dir))?;
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.join(LOG_FILE))
        .context("Failed to open log file")?;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .init();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = config::load_config()?;
    init_logging()?;
    info!(server = %config.settings.server.url, "taskclock starting");

    let (mut app, events) = App::new(config)?;
    app.refresh().await;

    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let res = run_app(&mut terminal, &mut app, events).await;
    app.shutdown();

    // Restore terminal
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;

    if let Err(err) = res {
        eprintln!("Error: {:?}", err);
    }

    Ok(())
}

async fn run_app<B: Backend>(
    terminal: &mut Terminal<B>,
    app: &mut App,
    mut events: UnboundedReceiver<ChannelMessage>,
) -> Result<()> {
    loop {
        terminal.draw(|f| ui::draw(f, app))?;

        while let Ok(message) = events.try_recv() {
            app.handle_channel(message);
        }
        app.toasts.prune(Instant::now());

        if event::poll(Duration::from_millis(100))? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    match app.mode {
                        AppMode::Normal => match key.code {
                            KeyCode::Char('q') => app.should_quit = true,
                            KeyCode::Char('a') => app.begin_adding(),
                            KeyCode::Char('t') => app.begin_editing_time(),
                            KeyCode::Char(' ') => app.toggle_selected_timer().await,
                            KeyCode::Char('d') => app.delete_selected_task().await,
                            KeyCode::Char('x') => app.toggle_selected_task_completion().await,
                            KeyCode::Char('r') => app.refresh().await,
                            KeyCode::Up | KeyCode::Char('k') => app.move_selection_up(),
                            KeyCode::Down | KeyCode::Char('j') => app.move_selection_down(),
                            _ => {}
                        },
                        AppMode::AddingTask | AppMode::EditingTime(_) => match key.code {
                            KeyCode::Esc => app.cancel_input(),
                            KeyCode::Enter => app.handle_char('\n').await,
                            KeyCode::Backspace => app.handle_backspace(),
                            KeyCode::Char(c) => app.handle_char(c).await,
                            _ => {}
                        },
                    }
                }
            }
        }

        if app.should_quit {
            return Ok(());
        }
    }
}
