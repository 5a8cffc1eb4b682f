//! IPC message protocol definitions
//!
//! All messages are JSON-encoded, prefixed with a 4-byte little-endian length.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::events::LoopEvent;
use crate::state::LoopState;

/// Largest accepted message body
pub const MAX_MESSAGE_LEN: usize = 1024 * 1024;

/// Requests from clients to the daemon
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Request current daemon status
    GetStatus,

    /// Ping to check connectivity
    Ping,

    /// Subscribe to loop event notifications
    Subscribe,

    /// The looper control was pressed
    PointerDown,

    /// The looper control was released
    PointerUp,

    /// Select the engine input device
    SelectDevice { device_id: i32 },

    /// Restore the most recently undone layer
    Redo,

    /// Export the loop; the daemon names the file when `path` is absent
    Export {
        #[serde(default)]
        path: Option<PathBuf>,
    },

    /// A block of captured mono input for the engine
    FeedInput { samples: Vec<f32> },
}

/// Responses from daemon to clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    /// Current daemon status
    Status(DaemonStatus),

    /// Pong response to ping
    Pong,

    /// Subscription confirmed
    Subscribed,

    /// Request queued for the controller or gesture driver
    Accepted,

    /// Outcome of a redo request
    RedoResult { applied: bool },

    /// Outcome of an export request
    Exported { path: String, success: bool },

    /// Error response
    Error { code: String, message: String },
}

impl Response {
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        Response::Error {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

/// Push notification from daemon to subscribed clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    /// A loop event occurred
    Event { event: LoopEvent },

    /// Notifications were dropped because the client fell behind
    Lagged { skipped: u64 },
}

/// Full daemon status snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaemonStatus {
    /// Daemon version
    pub version: String,

    /// Current loop state
    pub loop_state: LoopState,

    /// Last sampled input level
    pub input_level: f32,

    /// Layers held by the engine
    pub layers: usize,

    /// Selected input device, if any
    pub input_device: Option<i32>,

    /// Whether stdin drives the control
    pub stdin_input: bool,

    /// Uptime in seconds
    pub uptime_secs: u64,
}

impl Default for DaemonStatus {
    fn default() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            loop_state: LoopState::default(),
            input_level: 0.0,
            layers: 0,
            input_device: None,
            stdin_input: false,
            uptime_secs: 0,
        }
    }
}
