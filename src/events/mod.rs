//! Events published by the loop controller
//!
//! Broadcast to the IPC server, which mirrors the loop state for status
//! queries and forwards every event to subscribed clients.

use serde::{Deserialize, Serialize};

use crate::gesture::Gesture;
use crate::state::LoopState;

/// Something observable happened to the loop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LoopEvent {
    /// A gesture reached the controller
    GestureRecognized { gesture: Gesture },

    /// The loop state moved
    StateChanged {
        from: LoopState,
        to: LoopState,
        /// Milliseconds spent in `from`
        duration_ms: u64,
    },

    /// An input device was requested
    DeviceSelected { device_id: i32 },

    /// An export attempt finished
    ExportFinished { path: String, success: bool },
}

impl std::fmt::Display for LoopEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoopEvent::GestureRecognized { gesture } => write!(f, "GESTURE {}", gesture),
            LoopEvent::StateChanged {
                from,
                to,
                duration_ms,
            } => write!(f, "STATE {} -> {} (after {}ms)", from, to, duration_ms),
            LoopEvent::DeviceSelected { device_id } => write!(f, "DEVICE {}", device_id),
            LoopEvent::ExportFinished { path, success } => {
                let outcome = if *success { "saved" } else { "failed" };
                write!(f, "EXPORT {} {}", outcome, path)
            }
        }
    }
}
