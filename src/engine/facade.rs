//! The boundary between the loop controller and an audio engine

use std::path::Path;

use crate::state::{EngineAction, LoopState};

/// Errors an engine may report
///
/// These never reach the state machine: the controller logs them and
/// carries on as if the call had no effect.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("engine state lock poisoned")]
    Poisoned,

    #[error("no recorded loop to export")]
    NothingToExport,

    #[error("failed to write loop audio: {0}")]
    Wav(#[from] hound::Error),

    #[error("engine rejected {operation}: {reason}")]
    Rejected {
        operation: &'static str,
        reason: String,
    },
}

/// Operations the loop controller issues to an audio engine
///
/// Implementations must tolerate concurrent calls: the controller task and
/// the input level sampler both hold a handle. Calls on an inactive engine
/// are no-ops, not errors.
pub trait EngineFacade: Send + Sync {
    /// Allocate and activate an engine session
    fn start(&self) -> Result<(), EngineError>;

    /// Release the session; no-op when not started
    fn stop(&self) -> Result<(), EngineError>;

    /// Notification of the current loop state, bookkeeping only
    fn set_loop_state(&self, state: LoopState) -> Result<(), EngineError>;

    /// Select the input device; no-op when inactive
    fn set_device_id(&self, device_id: i32) -> Result<(), EngineError>;

    /// Drop the most recent layer; no-op without history
    fn undo(&self) -> Result<(), EngineError>;

    /// Restore the most recently undone layer; no-op without history
    fn redo(&self) -> Result<(), EngineError>;

    /// Normalized input level in `[0, 1]`, `0` when inactive
    fn input_level(&self) -> f32;

    /// Write the mixed loop to `path`, reporting success
    fn export_to_file(&self, path: &Path) -> bool;

    /// Dispatch one transition action to the matching operation
    fn apply(&self, action: EngineAction) -> Result<(), EngineError> {
        match action {
            EngineAction::Start => self.start(),
            EngineAction::Stop => self.stop(),
            EngineAction::Undo => self.undo(),
            EngineAction::Redo => self.redo(),
            EngineAction::SetLoopState(state) => self.set_loop_state(state),
        }
    }
}
