//! Pointer input for the looper control
//!
//! Input sources stamp press/release transitions with a shared monotonic
//! clock and hand them to the gesture driver over an mpsc channel.

mod listener;
mod pointer;

pub use listener::StdinListener;
pub use pointer::{InputClock, PointerEvent, PointerKind};

/// Errors raised by input sources
#[derive(Debug, thiserror::Error)]
pub enum InputError {
    #[error("input listener is already running")]
    AlreadyRunning,

    #[error("failed to spawn listener thread: {0}")]
    ThreadSpawn(String),

    #[error("unknown pointer command: {0:?}")]
    UnknownCommand(String),

    #[error("failed to read input: {0}")]
    Read(#[from] std::io::Error),

    #[error("pointer event channel closed")]
    ChannelClosed,
}
