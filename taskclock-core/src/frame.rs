//! Timer channel frames and the remaining-duration value a channel opens with.

use std::fmt;
use std::num::NonZeroU64;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::channel::ChannelError;

/// Sentinel text frame sent by the server once the countdown reaches zero.
pub const TIMER_FINISHED: &str = "TIMER_FINISHED";

/// WebSocket close code for a normal closure.
pub const NORMAL_CLOSURE: u16 = 1000;

/// How long a channel may stay in CONNECTING before it is abandoned.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// One inbound text frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerFrame {
    /// Seconds remaining.
    Tick(u64),
    Finished,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("malformed timer frame: {0:?}")]
    Malformed(String),
}

impl TimerFrame {
    pub fn decode(text: &str) -> Result<Self, DecodeError> {
        let text = text.trim();
        if text == TIMER_FINISHED {
            return Ok(TimerFrame::Finished);
        }
        if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
            return Err(DecodeError::Malformed(text.to_string()));
        }
        text.parse()
            .map(TimerFrame::Tick)
            .map_err(|_| DecodeError::Malformed(text.to_string()))
    }
}

/// Seconds left on a countdown when its channel is opened.
///
/// Always a positive whole number; zero, negative, fractional and
/// non-numeric inputs are refused before any connection is attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RemainingSeconds(NonZeroU64);

impl RemainingSeconds {
    pub fn get(self) -> u64 {
        self.0.get()
    }
}

impl fmt::Display for RemainingSeconds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<u64> for RemainingSeconds {
    type Error = ChannelError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        NonZeroU64::new(value)
            .map(RemainingSeconds)
            .ok_or_else(|| ChannelError::InvalidDuration(value.to_string()))
    }
}

impl TryFrom<i64> for RemainingSeconds {
    type Error = ChannelError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        u64::try_from(value)
            .map_err(|_| ChannelError::InvalidDuration(value.to_string()))
            .and_then(RemainingSeconds::try_from)
    }
}

impl TryFrom<f64> for RemainingSeconds {
    type Error = ChannelError;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        if !value.is_finite() || value <= 0.0 || value.fract() != 0.0 || value > u64::MAX as f64 {
            return Err(ChannelError::InvalidDuration(value.to_string()));
        }
        RemainingSeconds::try_from(value as u64)
    }
}

impl TryFrom<&str> for RemainingSeconds {
    type Error = ChannelError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl FromStr for RemainingSeconds {
    type Err = ChannelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<u64>()
            .map_err(|_| ChannelError::InvalidDuration(s.to_string()))
            .and_then(RemainingSeconds::try_from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_ticks_and_sentinel() {
        assert_eq!(TimerFrame::decode("42"), Ok(TimerFrame::Tick(42)));
        assert_eq!(TimerFrame::decode(" 0\n"), Ok(TimerFrame::Tick(0)));
        assert_eq!(TimerFrame::decode("TIMER_FINISHED"), Ok(TimerFrame::Finished));
    }

    #[test]
    fn rejects_everything_else() {
        for bad in ["", "ERROR", "-3", "+3", "1.5", "timer_finished", "12a"] {
            assert!(
                matches!(TimerFrame::decode(bad), Err(DecodeError::Malformed(_))),
                "{bad:?} should not decode"
            );
        }
    }

    #[test]
    fn remaining_must_be_positive_integer() {
        assert_eq!(RemainingSeconds::try_from(30u64).unwrap().get(), 30);
        assert_eq!(RemainingSeconds::try_from(30i64).unwrap().get(), 30);
        assert_eq!(RemainingSeconds::try_from(30.0f64).unwrap().get(), 30);
        assert_eq!(RemainingSeconds::try_from("30").unwrap().get(), 30);

        assert!(RemainingSeconds::try_from(0u64).is_err());
        assert!(RemainingSeconds::try_from(-5i64).is_err());
        assert!(RemainingSeconds::try_from(f64::NAN).is_err());
        assert!(RemainingSeconds::try_from(f64::INFINITY).is_err());
        assert!(RemainingSeconds::try_from(2.5f64).is_err());
        assert!(RemainingSeconds::try_from("abc").is_err());
        assert!(matches!(
            RemainingSeconds::try_from(-1.0f64),
            Err(ChannelError::InvalidDuration(_))
        ));
    }
}
