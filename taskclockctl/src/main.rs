use anyhow::{bail, Context, Result};
use chrono::Local;
use clap::{Parser, Subcommand};
use taskclock_core::render::error_text;
use taskclock_core::{
    minutes_to_seconds, Alerts, ChannelConfig, ChannelEvent, HttpTaskService, NewTask, Settings,
    Silent, Task, TaskId, TaskService, TaskUpdate, TimerController, TimerView,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "taskclockctl")]
#[command(about = "Control taskclock tasks and timers", long_about = None)]
struct Cli {
    /// Task service URL, overriding the config file
    #[arg(long, global = true)]
    server: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List all tasks
    List,
    /// Add a new task
    Add {
        title: String,
        #[arg(short, long)]
        description: Option<String>,
        /// Timer length in minutes
        #[arg(short, long, default_value_t = 0)]
        minutes: u64,
    },
    /// Change a task
    Edit {
        id: TaskId,
        #[arg(short, long)]
        title: Option<String>,
        #[arg(short, long)]
        description: Option<String>,
        #[arg(short, long)]
        minutes: Option<u64>,
    },
    /// Mark a task as done
    Complete {
        id: TaskId,
        /// Mark it as not done instead
        #[arg(long)]
        undo: bool,
    },
    /// Delete a task
    Delete { id: TaskId },
    /// Start a task's timer
    Start { id: TaskId },
    /// Stop a task's timer
    Stop { id: TaskId },
    /// Show the current session
    Status,
    /// Follow a running timer until it ends
    Watch {
        id: TaskId,
        /// No bell or desktop notification when the timer finishes
        #[arg(short, long)]
        quiet: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("TASKCLOCK_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut settings = Settings::load().context("Failed to load settings")?;
    if let Some(server) = cli.server {
        settings.server.url = server;
    }
    let service = settings
        .task_service()
        .context("Failed to build task service client")?;

    match cli.command {
        Commands::List => {
            for task in service.list_tasks().await? {
                print_task(&task);
            }
        }
        Commands::Add {
            title,
            description,
            minutes,
        } => {
            let task = service
                .create_task(&NewTask {
                    title,
                    description,
                    timer_lenght: timer_seconds(minutes)?,
                })
                .await?;
            print_task(&task);
        }
        Commands::Edit {
            id,
            title,
            description,
            minutes,
        } => {
            let update = TaskUpdate {
                title,
                description,
                timer_lenght: minutes.map(timer_seconds).transpose()?,
                is_completed: None,
            };
            if update.is_empty() {
                bail!("Nothing to change. Pass --title, --description or --minutes");
            }
            print_task(&service.update_task(id, &update).await?);
        }
        Commands::Complete { id, undo } => {
            let task = service
                .update_task(id, &TaskUpdate::completion(!undo))
                .await?;
            print_task(&task);
        }
        Commands::Delete { id } => {
            service.delete_task(id).await?;
            println!("Deleted task {}", id);
        }
        Commands::Start { id } => {
            let task = service.start_timer(id).await?;
            print_task(&task);
        }
        Commands::Stop { id } => {
            let task = service.stop_timer(id).await?;
            print_task(&task);
        }
        Commands::Status => {
            let status = service.auth_status().await?;
            match (status.is_guest, status.user_email) {
                (true, _) => println!("Guest session"),
                (false, Some(email)) => println!("Signed in as {}", email),
                (false, None) => println!("Signed in"),
            }
        }
        Commands::Watch { id, quiet } => {
            let alerts: Box<dyn Alerts + Send + Sync> = if quiet {
                Box::new(Silent)
            } else {
                Box::new(settings.desktop_alerts())
            };
            let channels = settings.channel_config()?;
            watch(service, channels, alerts, id).await?;
        }
    }

    Ok(())
}

fn timer_seconds(minutes: u64) -> Result<u64> {
    minutes_to_seconds(minutes)
        .with_context(|| format!("Timer of {} minutes is too long", minutes))
}

fn print_task(task: &Task) {
    let check = if task.is_completed { "✓" } else { " " };
    let timer = TimerView::idle(task.timer_lenght).text;
    let state = if task.timer_active { " (running)" } else { "" };
    println!("[{}] {}: {} [{}]{}", check, task.id, task.title, timer, state);
}

async fn watch(
    service: HttpTaskService,
    channels: ChannelConfig,
    alerts: Box<dyn Alerts + Send + Sync>,
    id: TaskId,
) -> Result<()> {
    let task = service
        .list_tasks()
        .await?
        .into_iter()
        .find(|t| t.id == id)
        .with_context(|| format!("No task with id {}", id))?;

    let (mut timers, mut events) = TimerController::new(service, channels, alerts);
    if let Err(e) = timers.resume(&task, Local::now()) {
        bail!("{}: {}", error_text(&e), e);
    }

    let mut last = String::new();
    loop {
        if let Some(view) = timers.view(id) {
            if view.text != last {
                println!("{}", view.text);
                last = view.text.clone();
            }
            if !view.is_running() {
                return Ok(());
            }
        }
        let Some(message) = events.recv().await else {
            return Ok(());
        };
        match timers.handle(message) {
            Some(ChannelEvent::Failed(e)) => bail!("{}: {}", error_text(&e), e),
            Some(ChannelEvent::Closed) => {
                println!("Timer closed by the server");
                return Ok(());
            }
            _ => {}
        }
    }
}
