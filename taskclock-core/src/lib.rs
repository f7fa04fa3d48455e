//! Shared core for the taskclock board and taskclockctl.
//!
//! The task service owns tasks and the countdown clock; this crate talks to
//! its REST API and follows running timers over a per-task push channel.
//! Everything that touches timer state runs on the caller's loop: channel
//! tasks only forward events, the registry and controller are plain owned
//! values.

pub mod alerts;
pub mod channel;
pub mod controller;
pub mod frame;
pub mod registry;
pub mod render;
pub mod service;
pub mod settings;
pub mod task;

pub use alerts::{AlertError, Alerts, DesktopAlerts, Silent};
pub use channel::{
    ChannelConfig, ChannelError, ChannelEvent, ChannelId, ChannelMessage, ChannelStatus,
    EventSink, TimerChannel,
};
pub use controller::{ControllerError, TimerController};
pub use frame::{DecodeError, RemainingSeconds, TimerFrame};
pub use registry::TimerRegistry;
pub use render::{format_seconds, TimerPhase, TimerView};
pub use service::{HttpTaskService, ServiceError, TaskService};
pub use settings::{Settings, SettingsError};
pub use task::{minutes_to_seconds, AuthStatus, NewTask, Task, TaskId, TaskUpdate};
