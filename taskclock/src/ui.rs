use crate::app::{App, AppMode, ToastLevel};
use ratatui::{
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, BorderType, Borders, Clear, Paragraph},
    Frame,
};
use taskclock_core::TimerPhase;

pub fn draw(f: &mut Frame, app: &App) {
    let area = f.area();
    let toast_rows = app.toasts.iter().count() as u16;
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Length(1),
            Constraint::Min(1),
            Constraint::Length(toast_rows),
            Constraint::Length(3),
        ])
        .split(area);

    draw_header(f, chunks[0], app);
    draw_session(f, chunks[1], app);
    draw_tasks(f, chunks[2], app);
    draw_toasts(f, chunks[3], app);
    draw_status_bar(f, chunks[4], app);

    match &app.mode {
        AppMode::AddingTask => draw_input_overlay(f, "New Task", &app.input_buffer, app),
        AppMode::EditingTime(_) => {
            draw_input_overlay(f, "Set Timer (minutes)", &app.input_buffer, app)
        }
        AppMode::Normal => {}
    }
}

fn draw_header(f: &mut Frame, area: Rect, app: &App) {
    let theme = &app.config.theme;
    let icons = &app.config.icons;
    let text = Line::from(vec![
        Span::raw(icons.header_left.clone()),
        Span::styled(
            "TASKCLOCK",
            Style::default().fg(theme.blue).add_modifier(Modifier::BOLD),
        ),
        Span::raw(icons.header_right.clone()),
    ]);
    f.render_widget(
        Paragraph::new(text).alignment(Alignment::Center).block(
            Block::default()
                .borders(Borders::BOTTOM)
                .border_style(Style::default().fg(theme.black)),
        ),
        area,
    );
}

fn draw_session(f: &mut Frame, area: Rect, app: &App) {
    let theme = &app.config.theme;
    let text = match &app.session {
        Some(status) if status.is_guest => "Guest session".to_string(),
        Some(status) => match &status.user_email {
            Some(email) => format!("Signed in as {}", email),
            None => "Signed in".to_string(),
        },
        None => format!("Offline: {}", app.config.settings.server.url),
    };
    f.render_widget(
        Paragraph::new(text)
            .style(Style::default().fg(theme.gray))
            .alignment(Alignment::Center),
        area,
    );
}

fn draw_tasks(f: &mut Frame, area: Rect, app: &App) {
    let theme = &app.config.theme;
    let icons = &app.config.icons;
    let block = Block::default()
        .title(Span::styled(
            format!(" {} Tasks ", icons.task_list),
            Style::default().fg(theme.gray),
        ))
        .borders(Borders::ALL)
        .border_type(BorderType::Rounded)
        .border_style(Style::default().fg(theme.green));
    let inner_area = block.inner(area);
    f.render_widget(block, area);
    if app.tasks.is_empty() {
        f.render_widget(
            Paragraph::new("No tasks. Press 'a' to add one.")
                .style(Style::default().fg(theme.gray))
                .alignment(Alignment::Center),
            inner_area,
        );
        return;
    }
    let constraints: Vec<Constraint> = app.tasks.iter().map(|_| Constraint::Length(1)).collect();
    let task_chunks = Layout::default().constraints(constraints).split(inner_area);
    for (i, task) in app.tasks.iter().enumerate() {
        let Some(item_area) = task_chunks.get(i) else {
            break;
        };
        let mut left = vec![if i == app.selected_task {
            Span::styled(icons.select.clone(), Style::default().fg(theme.selection))
        } else {
            Span::raw(" ")
        }];
        left.push(Span::raw(format!(
            " {} ",
            if task.is_completed {
                &icons.done
            } else {
                &icons.pending
            }
        )));
        left.push(Span::styled(
            task.title.clone(),
            if task.is_completed {
                Style::default()
                    .fg(theme.gray)
                    .add_modifier(Modifier::CROSSED_OUT)
            } else {
                Style::default().fg(theme.foreground)
            },
        ));

        let view = app.timer_view(task);
        let (state_icon, color) = match view.phase {
            TimerPhase::Idle => (&icons.idle, theme.gray),
            TimerPhase::Connecting => (&icons.running, theme.yellow),
            TimerPhase::Running => (&icons.running, theme.cyan),
            TimerPhase::Finished => (&icons.finished, theme.green),
            TimerPhase::Failed => (&icons.failed, theme.red),
        };
        let right = Span::styled(
            format!(" {} {} ", state_icon, view.text),
            Style::default().fg(color),
        );
        if i == app.selected_task {
            f.render_widget(
                Block::default().style(Style::default().bg(theme.black)),
                *item_area,
            );
        }
        f.render_widget(Paragraph::new(Line::from(left)), *item_area);
        f.render_widget(
            Paragraph::new(Line::from(right)).alignment(Alignment::Right),
            *item_area,
        );
    }
}

fn draw_toasts(f: &mut Frame, area: Rect, app: &App) {
    if app.toasts.is_empty() {
        return;
    }
    let theme = &app.config.theme;
    let lines: Vec<Line> = app
        .toasts
        .iter()
        .map(|toast| {
            let color: Color = match toast.level {
                ToastLevel::Info => theme.green,
                ToastLevel::Error => theme.red,
            };
            Line::from(Span::styled(
                format!(" {} ", toast.message),
                Style::default().fg(theme.background).bg(color),
            ))
        })
        .collect();
    f.render_widget(Paragraph::new(lines).alignment(Alignment::Right), area);
}

fn draw_status_bar(f: &mut Frame, area: Rect, app: &App) {
    let theme = &app.config.theme;
    let (mode_text, mode_color) = match app.mode {
        AppMode::Normal => ("NORMAL", theme.green),
        AppMode::AddingTask => ("INSERT", theme.yellow),
        AppMode::EditingTime(_) => ("TIME", theme.blue),
    };
    let help = if app.mode == AppMode::Normal {
        "a:add │ d:del │ t:time │ space:start/stop │ x:done │ r:reload │ q:quit"
    } else {
        "enter:confirm │ esc:cancel"
    };
    f.render_widget(
        Paragraph::new(Line::from(vec![
            Span::styled(
                format!(" {} ", mode_text),
                Style::default()
                    .bg(mode_color)
                    .fg(theme.background)
                    .add_modifier(Modifier::BOLD),
            ),
            Span::raw(" "),
            Span::raw(help),
        ]))
        .block(Block::default().style(Style::default().bg(theme.black).fg(theme.gray))),
        area,
    );
}

fn draw_input_overlay(f: &mut Frame, title: &str, input: &str, app: &App) {
    let area = centered_rect(60, 20, f.area());
    f.render_widget(Clear, area);
    let block = Block::default()
        .title(format!(" {} ", title))
        .borders(Borders::ALL)
        .border_style(Style::default().fg(app.config.theme.yellow))
        .border_type(BorderType::Double)
        .style(Style::default().bg(app.config.theme.background));
    let inner_area = block.inner(area);
    f.render_widget(block, area);
    f.render_widget(
        Paragraph::new(Line::from(vec![
            Span::styled("▸ ", Style::default().fg(app.config.theme.foreground)),
            Span::styled(input, Style::default().fg(app.config.theme.foreground)),
            Span::styled(
                &app.config.icons.input_cursor,
                Style::default()
                    .fg(app.config.theme.foreground)
                    .add_modifier(Modifier::SLOW_BLINK),
            ),
        ])),
        inner_area,
    );
}

fn centered_rect(percent_x: u16, percent_y: u16, r: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(r);
    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(popup_layout[1])[1]
}
