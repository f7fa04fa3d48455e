use crate::config::Config;
use anyhow::{Context, Result};
use chrono::Local;
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use taskclock_core::render::error_text;
use taskclock_core::{
    AuthStatus, ChannelError, ChannelEvent, ChannelMessage, HttpTaskService, NewTask, Task,
    TaskId, TaskService, TaskUpdate, TimerController, TimerView,
};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{error, info, warn};

pub struct App {
    pub tasks: Vec<Task>,
    pub selected_task: usize,
    pub mode: AppMode,
    pub input_buffer: String,
    pub config: Config,
    pub timers: TimerController<HttpTaskService>,
    pub toasts: Toasts,
    pub session: Option<AuthStatus>,
    pub should_quit: bool,
}

#[derive(Default, Clone, PartialEq, Debug)]
pub enum AppMode {
    #[default]
    Normal,
    AddingTask,
    EditingTime(TaskId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToastLevel {
    Info,
    Error,
}

#[derive(Debug, Clone)]
pub struct Toast {
    pub message: String,
    pub level: ToastLevel,
    raised_at: Instant,
}

/// Transient messages; each disappears `ttl` after it was raised.
#[derive(Debug)]
pub struct Toasts {
    ttl: Duration,
    items: VecDeque<Toast>,
}

const MAX_TOASTS: usize = 3;

impl Toasts {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            items: VecDeque::new(),
        }
    }

    pub fn info(&mut self, message: impl Into<String>) {
        self.push(message.into(), ToastLevel::Info);
    }

    pub fn error(&mut self, message: impl Into<String>) {
        self.push(message.into(), ToastLevel::Error);
    }

    fn push(&mut self, message: String, level: ToastLevel) {
        if self.items.len() == MAX_TOASTS {
            self.items.pop_front();
        }
        self.items.push_back(Toast {
            message,
            level,
            raised_at: Instant::now(),
        });
    }

    pub fn prune(&mut self, now: Instant) {
        let ttl = self.ttl;
        self.items
            .retain(|t| now.saturating_duration_since(t.raised_at) < ttl);
    }

    /// Most recent first.
    pub fn iter(&self) -> impl Iterator<Item = &Toast> {
        self.items.iter().rev()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl App {
    pub fn new(config: Config) -> Result<(Self, UnboundedReceiver<ChannelMessage>)> {
        let service = config
            .settings
            .task_service()
            .context("Failed to build task service client")?;
        let channels = config.settings.channel_config()?;
        let alerts = Box::new(config.settings.desktop_alerts());
        let (timers, events) = TimerController::new(service, channels, alerts);
        let toasts = Toasts::new(config.settings.toast_ttl());
        let app = Self {
            tasks: vec![],
            selected_task: 0,
            mode: AppMode::Normal,
            input_buffer: String::new(),
            config,
            timers,
            toasts,
            session: None,
            should_quit: false,
        };
        Ok((app, events))
    }

    pub fn selected(&self) -> Option<&Task> {
        self.tasks.get(self.selected_task)
    }

    pub fn timer_view(&self, task: &Task) -> TimerView {
        self.timers
            .view(task.id)
            .cloned()
            .unwrap_or_else(|| TimerView::idle(task.timer_lenght))
    }

    /// Reloads the session and the task list, resuming running timers.
    pub async fn refresh(&mut self) {
        match self.timers.service().auth_status().await {
            Ok(status) => self.session = Some(status),
            Err(e) => warn!("Auth status unavailable: {}", e),
        }
        match self.timers.service().list_tasks().await {
            Ok(tasks) => {
                for (task_id, e) in self.timers.load(&tasks, Local::now()) {
                    self.resume_failed(task_id, &e);
                }
                info!(count = tasks.len(), "Tasks loaded");
                self.tasks = tasks;
                if self.selected_task >= self.tasks.len() {
                    self.selected_task = self.tasks.len().saturating_sub(1);
                }
            }
            Err(e) => {
                error!("Failed to load tasks: {}", e);
                self.toasts.error("Failed to load tasks");
            }
        }
    }

    pub async fn add_task(&mut self, title: String) {
        let new_task = NewTask {
            title,
            description: None,
            timer_lenght: 0,
        };
        match self.timers.service().create_task(&new_task).await {
            Ok(task) => {
                self.show_edited(&task);
                self.tasks.push(task);
                self.selected_task = self.tasks.len() - 1;
            }
            Err(e) => {
                error!("Failed to add task: {}", e);
                self.toasts.error("Failed to add task. Please try again.");
            }
        }
    }

    pub async fn delete_selected_task(&mut self) {
        let Some(task_id) = self.selected().map(|t| t.id) else {
            return;
        };
        match self.timers.service().delete_task(task_id).await {
            Ok(()) => {
                self.timers.forget(task_id);
                self.tasks.retain(|t| t.id != task_id);
                if !self.tasks.is_empty() && self.selected_task >= self.tasks.len() {
                    self.selected_task = self.tasks.len() - 1;
                }
            }
            Err(e) => {
                error!(task_id, "Failed to delete task: {}", e);
                self.toasts.error("Failed to delete task. Please try again.");
            }
        }
    }

    pub async fn toggle_selected_task_completion(&mut self) {
        let Some((task_id, completed)) = self.selected().map(|t| (t.id, t.is_completed)) else {
            return;
        };
        let update = TaskUpdate::completion(!completed);
        match self.timers.service().update_task(task_id, &update).await {
            Ok(task) => self.replace_task(task),
            Err(e) => {
                error!(task_id, "Failed to update task completion: {}", e);
                self.toasts
                    .error("Failed to update task completion status. Please try again.");
            }
        }
    }

    pub async fn set_task_minutes(&mut self, task_id: TaskId, minutes: u64) {
        let Some(update) = TaskUpdate::timer_minutes(minutes) else {
            warn!(task_id, minutes, "Timer length out of range");
            self.toasts.error("Timer is too long.");
            return;
        };
        match self.timers.service().update_task(task_id, &update).await {
            Ok(task) => {
                let running = self.timers.view(task_id).is_some_and(|v| v.is_running());
                if !running {
                    self.show_edited(&task);
                }
                self.replace_task(task);
            }
            Err(e) => {
                error!(task_id, "Failed to set timer: {}", e);
                self.toasts.error("Failed to set timer. Please try again.");
            }
        }
    }

    /// Starts the selected task's timer, or stops it if it is running.
    pub async fn toggle_selected_timer(&mut self) {
        let Some(task) = self.selected() else {
            return;
        };
        let task_id = task.id;
        let running = self.timer_view(task).is_running();
        if running {
            if let Err(e) = self.timers.stop(task_id).await {
                error!("{}", e);
                self.toasts.error("Failed to stop timer. Please try again.");
            }
        } else if let Err(e) = self.timers.start(task_id).await {
            error!("{}", e);
            self.toasts.error("Failed to start timer. Please try again.");
        }
    }

    /// Applies a message from a timer channel.
    pub fn handle_channel(&mut self, message: ChannelMessage) {
        let task_id = message.task_id;
        let Some(event) = self.timers.handle(message) else {
            return;
        };
        let title = self
            .tasks
            .iter()
            .find(|t| t.id == task_id)
            .map(|t| t.title.clone())
            .unwrap_or_else(|| format!("Task {}", task_id));
        match event {
            ChannelEvent::Finished => self.toasts.info(format!("{}: timer finished", title)),
            ChannelEvent::Failed(e) => self.toasts.error(format!("{}: {}", title, error_text(&e))),
            _ => {}
        }
    }

    pub fn move_selection_up(&mut self) {
        self.selected_task = self.selected_task.saturating_sub(1);
    }

    pub fn move_selection_down(&mut self) {
        if !self.tasks.is_empty() {
            self.selected_task = (self.selected_task + 1).min(self.tasks.len() - 1);
        }
    }

    pub fn begin_adding(&mut self) {
        self.mode = AppMode::AddingTask;
        self.input_buffer.clear();
    }

    pub fn begin_editing_time(&mut self) {
        if let Some(task_id) = self.selected().map(|t| t.id) {
            self.mode = AppMode::EditingTime(task_id);
            self.input_buffer.clear();
        }
    }

    pub fn cancel_input(&mut self) {
        self.mode = AppMode::Normal;
        self.input_buffer.clear();
    }

    pub async fn handle_char(&mut self, c: char) {
        match self.mode {
            AppMode::AddingTask => {
                if c == '\n' {
                    let title = self.input_buffer.trim().to_string();
                    self.cancel_input();
                    if !title.is_empty() {
                        self.add_task(title).await;
                    }
                } else {
                    self.input_buffer.push(c);
                }
            }
            AppMode::EditingTime(task_id) => {
                if c == '\n' {
                    let input = std::mem::take(&mut self.input_buffer);
                    self.cancel_input();
                    match input.parse() {
                        Ok(minutes) => self.set_task_minutes(task_id, minutes).await,
                        Err(_) if !input.is_empty() => self.toasts.error("Timer is too long."),
                        Err(_) => {}
                    }
                } else if c.is_ascii_digit() {
                    self.input_buffer.push(c);
                }
            }
            AppMode::Normal => {}
        }
    }

    pub fn handle_backspace(&mut self) {
        if matches!(self.mode, AppMode::AddingTask | AppMode::EditingTime(_)) {
            self.input_buffer.pop();
        }
    }

    /// Closes every timer channel.
    pub fn shutdown(&mut self) {
        self.timers.shutdown();
    }

    /// Shows a task the user just changed; an old finished or failed timer
    /// gives way to the new length.
    fn show_edited(&mut self, task: &Task) {
        if let Err(e) = self.timers.reset(task, Local::now()) {
            self.resume_failed(task.id, &e);
        }
    }

    fn resume_failed(&mut self, task_id: TaskId, e: &ChannelError) {
        warn!(task_id, "Could not resume timer: {}", e);
        self.toasts.error(format!("Could not resume timer: {}", e));
    }

    fn replace_task(&mut self, task: Task) {
        if let Some(slot) = self.tasks.iter_mut().find(|t| t.id == task.id) {
            *slot = task;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use taskclock_core::{ChannelStatus, TimerPhase};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn task_json(id: i64, title: &str) -> serde_json::Value {
        json!({
            "id": id,
            "title": title,
            "timer_lenght": 300,
            "timer_active": false,
            "is_completed": false
        })
    }

    async fn app_for(server: &MockServer) -> App {
        let mut config = Config::default();
        config.settings.server.url = server.uri();
        config.settings.alerts.sound = false;
        config.settings.alerts.desktop = false;
        App::new(config).unwrap().0
    }

    async fn mount_guest(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/api/auth/status"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "is_guest": true })))
            .mount(server)
            .await;
    }

    #[test]
    fn toasts_expire_after_ttl() {
        let mut toasts = Toasts::new(Duration::from_secs(5));
        toasts.error("Failed to start timer");
        toasts.info("Saved");
        let now = Instant::now();

        toasts.prune(now);
        assert_eq!(toasts.iter().map(|t| t.level).collect::<Vec<_>>(), vec![
            ToastLevel::Info,
            ToastLevel::Error
        ]);
        toasts.prune(now + Duration::from_secs(6));
        assert!(toasts.is_empty());
    }

    #[test]
    fn toasts_keep_only_the_latest() {
        let mut toasts = Toasts::new(Duration::from_secs(5));
        for i in 0..5 {
            toasts.info(format!("toast {}", i));
        }
        let messages: Vec<_> = toasts.iter().map(|t| t.message.as_str()).collect();
        assert_eq!(messages, vec!["toast 4", "toast 3", "toast 2"]);
    }

    #[tokio::test]
    async fn refresh_loads_tasks_and_resumes_running_timers() {
        let server = MockServer::start().await;
        mount_guest(&server).await;
        let stop = (Local::now() + chrono::Duration::seconds(90))
            .naive_local()
            .format("%Y-%m-%dT%H:%M:%S%.6f")
            .to_string();
        let mut running = task_json(2, "Focus");
        running["timer_active"] = json!(true);
        running["timer_stop"] = json!(stop);
        Mock::given(method("GET"))
            .and(path("/api/tasks/"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!([task_json(1, "Idle"), running])),
            )
            .mount(&server)
            .await;

        let mut app = app_for(&server).await;
        app.refresh().await;

        assert_eq!(app.tasks.len(), 2);
        assert_eq!(app.session.as_ref().map(|s| s.is_guest), Some(true));
        assert_eq!(app.timer_view(&app.tasks[0]).text, "5:00");
        let channel = app.timers.registry().get(2).expect("timer resumed");
        assert_eq!(channel.status(), ChannelStatus::Connecting);
        assert!((89..=90).contains(&channel.opened_with().get()));
        app.shutdown();
    }

    #[tokio::test]
    async fn failed_start_raises_a_toast() {
        let server = MockServer::start().await;
        mount_guest(&server).await;
        Mock::given(method("GET"))
            .and(path("/api/tasks/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([task_json(3, "Plan")])))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/api/tasks/3/timer_start/"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let mut app = app_for(&server).await;
        app.refresh().await;
        app.toggle_selected_timer().await;

        assert!(app.timers.registry().is_empty());
        let toast = app.toasts.iter().next().expect("toast raised");
        assert_eq!(toast.level, ToastLevel::Error);
        assert_eq!(toast.message, "Failed to start timer. Please try again.");
    }

    fn running_task(id: i64, title: &str) -> Task {
        let mut task = task_json(id, title);
        task["timer_active"] = json!(true);
        serde_json::from_value(task).unwrap()
    }

    /// Resumes `task` on the board and returns a sender for its channel.
    fn follow(app: &mut App, task: Task) -> impl Fn(ChannelEvent) -> ChannelMessage {
        let task_id = task.id;
        app.timers.resume(&task, Local::now()).unwrap();
        app.tasks.push(task);
        let channel = app.timers.registry().get(task_id).map(|c| c.id()).unwrap();
        move |event| ChannelMessage {
            task_id,
            channel,
            event,
        }
    }

    #[tokio::test]
    async fn channel_failure_raises_one_toast() {
        let server = MockServer::start().await;
        let mut app = app_for(&server).await;
        let msg = follow(&mut app, running_task(8, "Focus"));

        app.handle_channel(msg(ChannelEvent::Opened { remaining: 300 }));
        assert!(app.toasts.is_empty());
        let lost = ChannelError::ConnectionLost {
            code: Some(1011),
            reason: "server error".into(),
        };
        app.handle_channel(msg(ChannelEvent::Failed(lost.clone())));
        app.handle_channel(msg(ChannelEvent::Failed(lost)));

        let toasts: Vec<_> = app.toasts.iter().collect();
        assert_eq!(toasts.len(), 1);
        assert_eq!(toasts[0].level, ToastLevel::Error);
        assert_eq!(toasts[0].message, "Focus: Timer disconnected");
        assert_eq!(app.timer_view(&app.tasks[0]).phase, TimerPhase::Failed);
    }

    #[tokio::test]
    async fn finished_timer_raises_one_toast() {
        let server = MockServer::start().await;
        let mut app = app_for(&server).await;
        let msg = follow(&mut app, running_task(9, "Plan"));

        app.handle_channel(msg(ChannelEvent::Opened { remaining: 2 }));
        app.handle_channel(msg(ChannelEvent::Tick(1)));
        app.handle_channel(msg(ChannelEvent::Finished));
        app.handle_channel(msg(ChannelEvent::Finished));

        let toasts: Vec<_> = app.toasts.iter().collect();
        assert_eq!(toasts.len(), 1);
        assert_eq!(toasts[0].level, ToastLevel::Info);
        assert_eq!(toasts[0].message, "Plan: timer finished");
        assert_eq!(app.timer_view(&app.tasks[0]).text, "Completed!");
    }

    #[tokio::test]
    async fn new_length_replaces_finished_timer() {
        let server = MockServer::start().await;
        let mut updated = task_json(10, "Write");
        updated["timer_lenght"] = json!(1500);
        Mock::given(method("PUT"))
            .and(path("/api/tasks/10/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(updated))
            .expect(1)
            .mount(&server)
            .await;

        let mut app = app_for(&server).await;
        let msg = follow(&mut app, running_task(10, "Write"));
        app.handle_channel(msg(ChannelEvent::Opened { remaining: 1 }));
        app.handle_channel(msg(ChannelEvent::Finished));
        assert_eq!(app.timer_view(&app.tasks[0]).text, "Completed!");

        app.begin_editing_time();
        for c in "25\n".chars() {
            app.handle_char(c).await;
        }

        let view = app.timer_view(&app.tasks[0]);
        assert_eq!(view.text, "25:00");
        assert_eq!(view.phase, TimerPhase::Idle);
    }

    #[tokio::test]
    async fn oversized_timer_is_refused_locally() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let mut app = app_for(&server).await;
        app.tasks = vec![serde_json::from_value(task_json(11, "Long")).unwrap()];
        for input in ["307445734561825861\n", "99999999999999999999999\n"] {
            app.begin_editing_time();
            for c in input.chars() {
                app.handle_char(c).await;
            }
        }

        let messages: Vec<_> = app.toasts.iter().map(|t| t.message.as_str()).collect();
        assert_eq!(messages, vec!["Timer is too long.", "Timer is too long."]);
        assert_eq!(app.timer_view(&app.tasks[0]).text, "5:00");
    }

    #[tokio::test]
    async fn unresumable_new_task_raises_a_toast() {
        let server = MockServer::start().await;
        let mut created = task_json(12, "Broken");
        created["timer_active"] = json!(true);
        created["timer_lenght"] = json!(0);
        Mock::given(method("POST"))
            .and(path("/api/tasks"))
            .respond_with(ResponseTemplate::new(200).set_body_json(created))
            .mount(&server)
            .await;

        let mut app = app_for(&server).await;
        app.add_task("Broken".into()).await;

        let toast = app.toasts.iter().next().expect("toast raised");
        assert_eq!(toast.level, ToastLevel::Error);
        assert!(toast.message.starts_with("Could not resume timer"));
        assert_eq!(app.timer_view(&app.tasks[0]).text, "Invalid timer");
        assert!(app.timers.registry().is_empty());
    }

    #[tokio::test]
    async fn typing_a_title_adds_a_task() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/tasks"))
            .respond_with(ResponseTemplate::new(200).set_body_json(task_json(4, "Read")))
            .expect(1)
            .mount(&server)
            .await;

        let mut app = app_for(&server).await;
        app.begin_adding();
        for c in "Read\n".chars() {
            app.handle_char(c).await;
        }

        assert_eq!(app.mode, AppMode::Normal);
        assert_eq!(app.tasks.len(), 1);
        assert_eq!(app.timer_view(&app.tasks[0]).phase, TimerPhase::Idle);
    }

    #[tokio::test]
    async fn timer_input_accepts_digits_only() {
        let server = MockServer::start().await;
        let mut updated = task_json(5, "Write");
        updated["timer_lenght"] = json!(1500);
        Mock::given(method("PUT"))
            .and(path("/api/tasks/5/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(updated))
            .expect(1)
            .mount(&server)
            .await;

        let mut app = app_for(&server).await;
        app.tasks = vec![serde_json::from_value(task_json(5, "Write")).unwrap()];
        app.begin_editing_time();
        for c in "2x5\n".chars() {
            app.handle_char(c).await;
        }

        assert_eq!(app.tasks[0].timer_lenght, Some(1500.0));
        assert_eq!(app.timer_view(&app.tasks[0]).text, "25:00");
    }

    #[tokio::test]
    async fn deleting_forgets_the_task() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/api/tasks/"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let mut app = app_for(&server).await;
        app.tasks = vec![
            serde_json::from_value(task_json(6, "a")).unwrap(),
            serde_json::from_value(task_json(7, "b")).unwrap(),
        ];
        app.selected_task = 1;
        app.delete_selected_task().await;

        assert_eq!(app.tasks.len(), 1);
        assert_eq!(app.selected_task, 0);
        assert!(app.timers.view(7).is_none());
    }
}
