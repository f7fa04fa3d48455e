//! Bridges task service timer calls to channel lifecycles.

use std::collections::HashMap;

use chrono::{DateTime, Local};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::alerts::Alerts;
use crate::channel::{
    ChannelConfig, ChannelError, ChannelEvent, ChannelMessage, EventSink, TimerChannel,
};
use crate::frame::RemainingSeconds;
use crate::registry::TimerRegistry;
use crate::render::{self, TimerView};
use crate::service::{ServiceError, TaskService};
use crate::task::{Task, TaskId};

#[derive(Error, Debug)]
pub enum ControllerError {
    #[error("failed to start timer for task {task_id}: {source}")]
    TimerStartFailed {
        task_id: TaskId,
        #[source]
        source: ServiceError,
    },

    #[error("failed to stop timer for task {task_id}: {source}")]
    TimerStopFailed {
        task_id: TaskId,
        #[source]
        source: ServiceError,
    },

    #[error(transparent)]
    Channel(#[from] ChannelError),
}

/// Owns the channel registry and the timer view of every known task.
///
/// Channel workers report through the receiver returned by [`new`]; feed
/// each message to [`handle`] from the same loop that calls everything
/// else.
///
/// [`new`]: TimerController::new
/// [`handle`]: TimerController::handle
pub struct TimerController<S> {
    service: S,
    channels: ChannelConfig,
    registry: TimerRegistry,
    views: HashMap<TaskId, TimerView>,
    events: EventSink,
    alerts: Box<dyn Alerts + Send + Sync>,
}

impl<S: TaskService> TimerController<S> {
    pub fn new(
        service: S,
        channels: ChannelConfig,
        alerts: Box<dyn Alerts + Send + Sync>,
    ) -> (Self, mpsc::UnboundedReceiver<ChannelMessage>) {
        let (events, rx) = mpsc::unbounded_channel();
        let controller = Self {
            service,
            channels,
            registry: TimerRegistry::new(),
            views: HashMap::new(),
            events,
            alerts,
        };
        (controller, rx)
    }

    pub fn service(&self) -> &S {
        &self.service
    }

    pub fn registry(&self) -> &TimerRegistry {
        &self.registry
    }

    pub fn view(&self, task_id: TaskId) -> Option<&TimerView> {
        self.views.get(&task_id)
    }

    /// Starts the task's timer on the service and follows it over a fresh
    /// channel. Nothing is opened if the service refuses.
    pub async fn start(&mut self, task_id: TaskId) -> Result<(), ControllerError> {
        let task = self
            .service
            .start_timer(task_id)
            .await
            .map_err(|source| ControllerError::TimerStartFailed { task_id, source })?;
        info!(task_id, timer_lenght = ?task.timer_lenght, "timer started");

        let remaining = task.timer_lenght.unwrap_or(f64::NAN);
        self.open(task_id, remaining)?;
        Ok(())
    }

    /// Stops the task's timer on the service, then drops its channel and
    /// shows the final length the service reports. On failure the channel
    /// is left alone.
    pub async fn stop(&mut self, task_id: TaskId) -> Result<(), ControllerError> {
        let task = self
            .service
            .stop_timer(task_id)
            .await
            .map_err(|source| ControllerError::TimerStopFailed { task_id, source })?;
        info!(task_id, "timer stopped");

        self.registry.unregister(task_id);
        self.views.insert(task_id, TimerView::idle(task.timer_lenght));
        Ok(())
    }

    /// Seeds views for a fresh task list and resumes running timers.
    /// Channels and views of tasks missing from `tasks` are dropped.
    /// Returns the tasks whose timer could not be resumed.
    pub fn load(&mut self, tasks: &[Task], now: DateTime<Local>) -> Vec<(TaskId, ChannelError)> {
        let listed: Vec<TaskId> = tasks.iter().map(|t| t.id).collect();
        let gone: Vec<TaskId> = self
            .views
            .keys()
            .copied()
            .chain(self.registry.task_ids())
            .filter(|id| !listed.contains(id))
            .collect();
        for task_id in gone {
            self.forget(task_id);
        }

        tasks
            .iter()
            .filter_map(|task| self.resume(task, now).err().map(|e| (task.id, e)))
            .collect()
    }

    /// Picks up a task as the service reports it.
    ///
    /// A running timer with a known end gets a channel for whatever is left
    /// of it, rounded up to whole seconds. One that already expired is shown
    /// as finished without connecting. A live channel for the task is kept.
    pub fn resume(&mut self, task: &Task, now: DateTime<Local>) -> Result<(), ChannelError> {
        let task_id = task.id;

        if !task.timer_active {
            self.registry.unregister(task_id);
            let keep = self.views.get(&task_id).is_some_and(|v| v.is_terminal());
            if !keep {
                self.views.insert(task_id, TimerView::idle(task.timer_lenght));
            }
            return Ok(());
        }

        if self.registry.get(task_id).is_some_and(|c| c.is_live()) {
            return Ok(());
        }

        let remaining = match task.timer_stop {
            Some(stop) => {
                let secs = seconds_until(stop, now);
                if secs <= 0 {
                    info!(task_id, "timer expired while away");
                    self.registry.unregister(task_id);
                    self.views.insert(task_id, TimerView::finished());
                    return Ok(());
                }
                secs as f64
            }
            None => task.timer_lenght.unwrap_or(f64::NAN),
        };
        self.open(task_id, remaining)
    }

    /// Like [`resume`], but drops a finished or failed view first. Use it
    /// after the task itself was edited, so a new length replaces the old
    /// outcome.
    ///
    /// [`resume`]: TimerController::resume
    pub fn reset(&mut self, task: &Task, now: DateTime<Local>) -> Result<(), ChannelError> {
        if self.views.get(&task.id).is_some_and(|v| v.is_terminal()) {
            self.views.remove(&task.id);
        }
        self.resume(task, now)
    }

    /// Applies one channel message. Returns the event if it was rendered.
    pub fn handle(&mut self, message: ChannelMessage) -> Option<ChannelEvent> {
        let task_id = message.task_id;
        let event = self.registry.dispatch(message)?;
        let view = self
            .views
            .entry(task_id)
            .or_insert_with(TimerView::connecting);
        render::apply(view, &event, self.alerts.as_ref());
        Some(event)
    }

    /// Drops everything known about a task, e.g. after it was deleted.
    pub fn forget(&mut self, task_id: TaskId) {
        self.registry.unregister(task_id);
        self.views.remove(&task_id);
    }

    /// Closes every channel.
    pub fn shutdown(&mut self) {
        info!(channels = self.registry.len(), "closing timer channels");
        self.registry.close_all();
    }

    fn open<R>(&mut self, task_id: TaskId, remaining: R) -> Result<(), ChannelError>
    where
        R: TryInto<RemainingSeconds, Error = ChannelError>,
    {
        match TimerChannel::open(&self.channels, task_id, remaining, self.events.clone()) {
            Ok(channel) => {
                self.registry.register(channel);
                self.views.insert(task_id, TimerView::connecting());
                Ok(())
            }
            Err(e) => {
                warn!(task_id, "not opening timer channel: {e}");
                self.registry.unregister(task_id);
                self.views.insert(task_id, TimerView::failed(&e));
                Err(e)
            }
        }
    }
}

/// Whole seconds from `now` until `end`, rounded up.
pub fn seconds_until(end: DateTime<Local>, now: DateTime<Local>) -> i64 {
    let millis = (end - now).num_milliseconds();
    millis.div_euclid(1000) + i64::from(millis.rem_euclid(1000) > 0)
}
