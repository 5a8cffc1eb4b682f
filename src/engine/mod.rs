//! Audio engine boundary
//!
//! The controller only talks to engines through `EngineFacade`.
//! `SoftwareEngine` is the in-process implementation; its process-wide
//! state lives behind `initialize()`.

mod facade;
mod runtime;
mod software;

pub use facade::{EngineError, EngineFacade};
pub use runtime::initialize;
pub use software::SoftwareEngine;
