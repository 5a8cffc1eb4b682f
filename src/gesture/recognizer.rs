//! Press-timing gesture recognition
//!
//! Turns pointer down/up timestamps into Tap, Hold, DoubleTap and
//! DoubleTapHold. The recognizer never sleeps: it hands back timer requests
//! and expects each one to be delivered to [`GestureRecognizer::on_timer`]
//! once its deadline passes. Every request carries a generation id and a
//! delivery whose id is no longer current does nothing, which is how both
//! the hold race and the pending single tap are cancelled.

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::input::{PointerEvent, PointerKind};

/// Releases at or after this press duration emit nothing
pub const TAP_TIMEOUT_MS: u64 = 300;
/// Presses still down after this long resolve as holds
pub const HOLD_TIMEOUT_MS: u64 = 500;
/// A press starting this soon after the previous tap's press is a second tap
pub const DOUBLE_TAP_WINDOW_MS: u64 = 300;

/// The four gestures the looper control understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Gesture {
    Tap,
    Hold,
    DoubleTap,
    DoubleTapHold,
}

impl std::fmt::Display for Gesture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Gesture::Tap => write!(f, "Tap"),
            Gesture::Hold => write!(f, "Hold"),
            Gesture::DoubleTap => write!(f, "DoubleTap"),
            Gesture::DoubleTapHold => write!(f, "DoubleTapHold"),
        }
    }
}

/// Timing thresholds in milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GestureTiming {
    pub tap_timeout_ms: u64,
    pub hold_timeout_ms: u64,
    pub double_tap_window_ms: u64,
}

impl Default for GestureTiming {
    fn default() -> Self {
        Self {
            tap_timeout_ms: TAP_TIMEOUT_MS,
            hold_timeout_ms: HOLD_TIMEOUT_MS,
            double_tap_window_ms: DOUBLE_TAP_WINDOW_MS,
        }
    }
}

/// Which of the two suspensions a timer belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// Hold-timeout race of the current press
    Hold,
    /// Debounce window after an early release, before committing to Tap
    PendingTap,
}

/// A callback the caller must deliver back once `deadline_ms` is reached
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerRequest {
    pub kind: TimerKind,
    pub generation: u64,
    pub deadline_ms: u64,
}

/// What one input produced
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Reaction {
    pub gesture: Option<Gesture>,
    /// Replaces any armed timer of the same kind
    pub timer: Option<TimerRequest>,
}

impl Reaction {
    fn emit(gesture: Gesture) -> Self {
        Self {
            gesture: Some(gesture),
            timer: None,
        }
    }

    fn arm(timer: TimerRequest) -> Self {
        Self {
            gesture: None,
            timer: Some(timer),
        }
    }
}

/// The press currently held down
#[derive(Debug, Clone, Copy)]
struct Press {
    down_at: u64,
    is_second_tap: bool,
    /// Set once the hold timeout has emitted for this press
    resolved: bool,
}

/// Gesture recognizer for one control
#[derive(Debug)]
pub struct GestureRecognizer {
    timing: GestureTiming,
    /// Press time of the last tap that may still pair into a double tap
    last_tap_time: Option<u64>,
    pending_tap_generation: u64,
    pending_tap_armed: bool,
    hold_generation: u64,
    press: Option<Press>,
}

impl GestureRecognizer {
    pub fn new(timing: GestureTiming) -> Self {
        Self {
            timing,
            last_tap_time: None,
            pending_tap_generation: 0,
            pending_tap_armed: false,
            hold_generation: 0,
            press: None,
        }
    }

    pub fn timing(&self) -> GestureTiming {
        self.timing
    }

    /// Whether the control is currently held down
    pub fn is_pressed(&self) -> bool {
        self.press.is_some()
    }

    /// Whether a single tap is waiting out the double-tap window
    pub fn has_pending_tap(&self) -> bool {
        self.pending_tap_armed
    }

    /// Feed one pointer transition
    pub fn on_event(&mut self, event: PointerEvent) -> Reaction {
        match event.kind {
            PointerKind::Down => self.on_down(event.timestamp_ms),
            PointerKind::Up => self.on_up(event.timestamp_ms),
        }
    }

    fn on_down(&mut self, t: u64) -> Reaction {
        if self.press.is_some() {
            debug!(t, "down while already pressed, ignoring");
            return Reaction::default();
        }

        let is_second_tap = self
            .last_tap_time
            .is_some_and(|last| t.saturating_sub(last) < self.timing.double_tap_window_ms);

        if is_second_tap {
            self.invalidate_pending_tap();
        }

        self.hold_generation += 1;
        self.press = Some(Press {
            down_at: t,
            is_second_tap,
            resolved: false,
        });

        trace!(t, is_second_tap, generation = self.hold_generation, "press started");

        Reaction::arm(TimerRequest {
            kind: TimerKind::Hold,
            generation: self.hold_generation,
            deadline_ms: t + self.timing.hold_timeout_ms,
        })
    }

    fn on_up(&mut self, u: u64) -> Reaction {
        let Some(press) = self.press.take() else {
            debug!(u, "up without a press, ignoring");
            return Reaction::default();
        };

        if press.resolved {
            // The hold timeout already spoke for this press
            return Reaction::default();
        }

        // Early release wins the race; the armed hold timer goes stale
        self.hold_generation += 1;

        let press_duration = u.saturating_sub(press.down_at);
        if press_duration >= self.timing.tap_timeout_ms {
            debug!(press_duration, "release in dead zone, no gesture");
            return Reaction::default();
        }

        if press.is_second_tap {
            self.last_tap_time = None;
            return Reaction::emit(Gesture::DoubleTap);
        }

        self.last_tap_time = Some(press.down_at);
        self.pending_tap_generation += 1;
        self.pending_tap_armed = true;

        Reaction::arm(TimerRequest {
            kind: TimerKind::PendingTap,
            generation: self.pending_tap_generation,
            deadline_ms: u + self.timing.double_tap_window_ms,
        })
    }

    /// Deliver a timer whose deadline has passed
    pub fn on_timer(&mut self, timer: TimerRequest) -> Option<Gesture> {
        match timer.kind {
            TimerKind::Hold => self.on_hold_timeout(timer.generation),
            TimerKind::PendingTap => self.on_pending_tap(timer.generation),
        }
    }

    fn on_hold_timeout(&mut self, generation: u64) -> Option<Gesture> {
        if generation != self.hold_generation {
            trace!(generation, current = self.hold_generation, "stale hold timer");
            return None;
        }

        let press = self.press.as_mut()?;
        if press.resolved {
            return None;
        }
        press.resolved = true;
        let is_second_tap = press.is_second_tap;

        // A hold consumes the tap history
        self.last_tap_time = None;

        Some(if is_second_tap {
            Gesture::DoubleTapHold
        } else {
            Gesture::Hold
        })
    }

    fn on_pending_tap(&mut self, generation: u64) -> Option<Gesture> {
        if !self.pending_tap_armed || generation != self.pending_tap_generation {
            trace!(
                generation,
                current = self.pending_tap_generation,
                "stale pending tap timer"
            );
            return None;
        }

        self.pending_tap_armed = false;
        Some(Gesture::Tap)
    }

    fn invalidate_pending_tap(&mut self) {
        self.pending_tap_generation += 1;
        self.pending_tap_armed = false;
    }
}

impl Default for GestureRecognizer {
    fn default() -> Self {
        Self::new(GestureTiming::default())
    }
}
