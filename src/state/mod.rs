//! Loop state machine
//!
//! Five loop states driven by four gestures:
//! - Idle: nothing recorded
//! - Recording: capturing the first layer
//! - Playing / Overdubbing: loop audible, optionally capturing a layer
//! - Stopped: playback halted, layers kept

mod machine;

pub use machine::{transition, EngineAction, LoopState, Transition};
