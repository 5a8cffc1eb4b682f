//! Gesture recognition for the single looper control
//!
//! `GestureRecognizer` is the synchronous core: it decides which gesture a
//! press produced and asks for timers. `GestureDriver` runs it on a tokio
//! task, turning timer requests into sleeps and forwarding gestures to the
//! loop controller.

mod driver;
mod recognizer;

pub use driver::GestureDriver;
pub use recognizer::{Gesture, GestureTiming};
