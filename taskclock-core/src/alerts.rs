//! Audible and desktop alerts raised when a timer finishes.

use std::io::{self, Write};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AlertError {
    #[error("notification error: {0}")]
    Notification(#[from] notify_rust::error::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Side effects of a finished timer. Callers treat failures as best effort.
pub trait Alerts {
    fn chime(&self) -> Result<(), AlertError>;
    fn notify(&self, title: &str, body: &str) -> Result<(), AlertError>;
}

/// Terminal bell plus a desktop notification, each switchable.
#[derive(Debug, Clone)]
pub struct DesktopAlerts {
    pub sound: bool,
    pub desktop: bool,
}

impl Default for DesktopAlerts {
    fn default() -> Self {
        Self {
            sound: true,
            desktop: true,
        }
    }
}

impl Alerts for DesktopAlerts {
    fn chime(&self) -> Result<(), AlertError> {
        if self.sound {
            let mut stdout = io::stdout();
            stdout.write_all(b"\x07")?;
            stdout.flush()?;
        }
        Ok(())
    }

    fn notify(&self, title: &str, body: &str) -> Result<(), AlertError> {
        if self.desktop {
            notify_rust::Notification::new()
                .summary(title)
                .body(body)
                .appname("taskclock")
                .show()
                .map(|_| ())?;
        }
        Ok(())
    }
}

/// Alerts that do nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct Silent;

impl Alerts for Silent {
    fn chime(&self) -> Result<(), AlertError> {
        Ok(())
    }

    fn notify(&self, _title: &str, _body: &str) -> Result<(), AlertError> {
        Ok(())
    }
}
