//! Pointer events and the monotonic clock that stamps them
//!
//! Every input source stamps events with the same `InputClock` so that
//! press durations and timer deadlines share one time base.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use super::InputError;

/// Press or release of the single looper control
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PointerKind {
    Down,
    Up,
}

impl FromStr for PointerKind {
    type Err = InputError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "d" | "down" | "press" => Ok(PointerKind::Down),
            "u" | "up" | "release" => Ok(PointerKind::Up),
            other => Err(InputError::UnknownCommand(other.to_string())),
        }
    }
}

/// A stamped pointer transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointerEvent {
    pub kind: PointerKind,
    /// Milliseconds since the clock epoch
    pub timestamp_ms: u64,
}

#[cfg(test)]
impl PointerEvent {
    pub fn down(timestamp_ms: u64) -> Self {
        Self {
            kind: PointerKind::Down,
            timestamp_ms,
        }
    }

    pub fn up(timestamp_ms: u64) -> Self {
        Self {
            kind: PointerKind::Up,
            timestamp_ms,
        }
    }
}

/// Monotonic millisecond clock shared by input sources and timers
///
/// Backed by `tokio::time::Instant`, so paused-time tests drive it too.
#[derive(Debug, Clone, Copy)]
pub struct InputClock {
    epoch: Instant,
}

impl InputClock {
    /// Start a clock whose epoch is now
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }

    /// Milliseconds elapsed since the epoch
    pub fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    /// Stamp a pointer transition with the current time
    pub fn stamp(&self, kind: PointerKind) -> PointerEvent {
        PointerEvent {
            kind,
            timestamp_ms: self.now_ms(),
        }
    }

    /// Instant corresponding to a clock reading
    pub fn instant_at(&self, timestamp_ms: u64) -> Instant {
        self.epoch + Duration::from_millis(timestamp_ms)
    }
}

impl Default for InputClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pointer_kind() {
        assert_eq!("d".parse::<PointerKind>().unwrap(), PointerKind::Down);
        assert_eq!(" DOWN\n".parse::<PointerKind>().unwrap(), PointerKind::Down);
        assert_eq!("release".parse::<PointerKind>().unwrap(), PointerKind::Up);
        assert!(matches!(
            "wiggle".parse::<PointerKind>(),
            Err(InputError::UnknownCommand(cmd)) if cmd == "wiggle"
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_clock_follows_tokio_time() {
        let clock = InputClock::new();
        tokio::time::advance(Duration::from_millis(250)).await;

        let event = clock.stamp(PointerKind::Up);
        assert_eq!(event, PointerEvent::up(250));
        assert_eq!(clock.instant_at(250), Instant::now());
    }
}
