//! Turns channel events into what a task's timer shows.
//!
//! No network or timing logic lives here: [`apply`] maps one event onto a
//! [`TimerView`] and fires alerts for a finished timer.

use tracing::warn;

use crate::alerts::Alerts;
use crate::channel::{ChannelError, ChannelEvent};

pub const NO_TIMER: &str = "No timer";
pub const CONNECTING: &str = "Connecting...";
pub const FINISHED_MARKER: &str = "Completed!";
pub const NOTIFICATION_TITLE: &str = "Task Timer Completed!";
pub const NOTIFICATION_BODY: &str = "Your task timer has finished.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerPhase {
    Idle,
    Connecting,
    Running,
    Finished,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerView {
    pub text: String,
    pub phase: TimerPhase,
}

impl TimerView {
    /// A timer that is not running, showing its configured length.
    pub fn idle(length: Option<f64>) -> Self {
        let text = match length {
            Some(secs) if secs.is_finite() && secs > 0.0 => format_seconds(secs as u64),
            _ => NO_TIMER.to_string(),
        };
        Self {
            text,
            phase: TimerPhase::Idle,
        }
    }

    pub fn connecting() -> Self {
        Self {
            text: CONNECTING.to_string(),
            phase: TimerPhase::Connecting,
        }
    }

    pub fn finished() -> Self {
        Self {
            text: FINISHED_MARKER.to_string(),
            phase: TimerPhase::Finished,
        }
    }

    pub fn failed(error: &ChannelError) -> Self {
        Self {
            text: error_text(error).to_string(),
            phase: TimerPhase::Failed,
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self.phase, TimerPhase::Connecting | TimerPhase::Running)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.phase, TimerPhase::Finished | TimerPhase::Failed)
    }
}

/// `minutes:seconds` with the seconds zero-padded, e.g. 125 -> "2:05".
pub fn format_seconds(seconds: u64) -> String {
    format!("{}:{:02}", seconds / 60, seconds % 60)
}

pub fn error_text(error: &ChannelError) -> &'static str {
    match error {
        ChannelError::InvalidDuration(_) => "Invalid timer",
        ChannelError::ConnectionTimeout(_) => "Connection timeout",
        ChannelError::ConnectionLost { .. } => "Timer disconnected",
    }
}

/// Renders `event` into `view`.
pub fn apply(view: &mut TimerView, event: &ChannelEvent, alerts: &dyn Alerts) {
    match event {
        ChannelEvent::Opened { remaining } => {
            *view = TimerView {
                text: format_seconds(*remaining),
                phase: TimerPhase::Running,
            };
        }
        ChannelEvent::Tick(seconds) => {
            *view = TimerView {
                text: format_seconds(*seconds),
                phase: TimerPhase::Running,
            };
        }
        ChannelEvent::Finished => {
            *view = TimerView::finished();
            if let Err(e) = alerts.chime() {
                warn!("failed to play timer sound: {e}");
            }
            if let Err(e) = alerts.notify(NOTIFICATION_TITLE, NOTIFICATION_BODY) {
                warn!("failed to send notification: {e}");
            }
        }
        // A normal close keeps the last tick on screen.
        ChannelEvent::Closed => {
            view.phase = TimerPhase::Idle;
        }
        ChannelEvent::Failed(error) => *view = TimerView::failed(error),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::AlertError;
    use std::cell::Cell;
    use std::io;

    #[derive(Default)]
    struct Recorder {
        chimes: Cell<u32>,
        notes: Cell<u32>,
        broken: bool,
    }

    impl Alerts for Recorder {
        fn chime(&self) -> Result<(), AlertError> {
            self.chimes.set(self.chimes.get() + 1);
            if self.broken {
                return Err(io::Error::new(io::ErrorKind::Other, "no speaker").into());
            }
            Ok(())
        }

        fn notify(&self, _title: &str, _body: &str) -> Result<(), AlertError> {
            self.notes.set(self.notes.get() + 1);
            if self.broken {
                return Err(io::Error::new(io::ErrorKind::Other, "no daemon").into());
            }
            Ok(())
        }
    }

    #[test]
    fn formats_minutes_and_padded_seconds() {
        assert_eq!(format_seconds(125), "2:05");
        assert_eq!(format_seconds(59), "0:59");
        assert_eq!(format_seconds(3600), "60:00");
        assert_eq!(format_seconds(0), "0:00");
        for s in [1u64, 61, 600, 6001, 86_399] {
            assert_eq!(format_seconds(s), format!("{}:{:02}", s / 60, s % 60));
        }
    }

    #[test]
    fn ticks_render_remaining_time() {
        let alerts = Recorder::default();
        let mut view = TimerView::connecting();
        apply(&mut view, &ChannelEvent::Opened { remaining: 90 }, &alerts);
        assert_eq!(view.text, "1:30");
        apply(&mut view, &ChannelEvent::Tick(89), &alerts);
        assert_eq!(view.text, "1:29");
        assert_eq!(view.phase, TimerPhase::Running);
        assert_eq!(alerts.chimes.get(), 0);
    }

    #[test]
    fn finish_marks_completed_and_alerts_once() {
        let alerts = Recorder::default();
        let mut view = TimerView::connecting();
        apply(&mut view, &ChannelEvent::Finished, &alerts);
        assert_eq!(view.text, FINISHED_MARKER);
        assert_eq!(view.phase, TimerPhase::Finished);
        assert_eq!(alerts.chimes.get(), 1);
        assert_eq!(alerts.notes.get(), 1);
    }

    #[test]
    fn alert_failures_are_swallowed() {
        let alerts = Recorder {
            broken: true,
            ..Recorder::default()
        };
        let mut view = TimerView::connecting();
        apply(&mut view, &ChannelEvent::Finished, &alerts);
        assert_eq!(view, TimerView::finished());
        assert_eq!(alerts.notes.get(), 1);
    }

    #[test]
    fn errors_render_distinct_text() {
        let alerts = Recorder::default();
        let mut view = TimerView::connecting();
        let lost = ChannelError::ConnectionLost {
            code: Some(1006),
            reason: "abnormal closure".into(),
        };
        apply(&mut view, &ChannelEvent::Failed(lost), &alerts);
        assert_eq!(view.text, "Timer disconnected");
        assert_eq!(view.phase, TimerPhase::Failed);
        assert_ne!(view.text, FINISHED_MARKER);

        let timeout = ChannelError::ConnectionTimeout(std::time::Duration::from_secs(5));
        assert_eq!(TimerView::failed(&timeout).text, "Connection timeout");
        assert_eq!(alerts.chimes.get(), 0);
    }

    #[test]
    fn idle_shows_configured_length() {
        assert_eq!(TimerView::idle(Some(300.0)).text, "5:00");
        assert_eq!(TimerView::idle(Some(0.0)).text, NO_TIMER);
        assert_eq!(TimerView::idle(Some(f64::NAN)).text, NO_TIMER);
        assert_eq!(TimerView::idle(None).text, NO_TIMER);
    }
}
