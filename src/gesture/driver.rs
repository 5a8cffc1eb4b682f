//! Async driver for the gesture recognizer
//!
//! Owns the recognizer, keeps at most one armed timer per kind and turns
//! timer requests into tokio sleeps. Pointer events and timer deliveries are
//! handled on one task, so recognizer state never sees concurrent writers.

use tokio::sync::mpsc;
use tokio::time::sleep_until;
use tracing::{debug, info, warn};

use crate::input::{InputClock, PointerEvent};

use super::recognizer::{Gesture, GestureRecognizer, GestureTiming, TimerKind, TimerRequest};

/// Runs the recognizer against a live pointer stream
pub struct GestureDriver {
    recognizer: GestureRecognizer,
    clock: InputClock,
    hold_timer: Option<TimerRequest>,
    tap_timer: Option<TimerRequest>,
    gesture_tx: mpsc::Sender<Gesture>,
}

impl GestureDriver {
    pub fn new(timing: GestureTiming, clock: InputClock, gesture_tx: mpsc::Sender<Gesture>) -> Self {
        Self {
            recognizer: GestureRecognizer::new(timing),
            clock,
            hold_timer: None,
            tap_timer: None,
            gesture_tx,
        }
    }

    /// Process pointer events until the channel closes
    ///
    /// Timers still armed when the channel closes are dropped unfired.
    pub async fn run(&mut self, mut pointer_rx: mpsc::Receiver<PointerEvent>) {
        info!(timing = ?self.recognizer.timing(), "gesture driver started");

        loop {
            let wake_at = self.next_deadline().map(|ms| self.clock.instant_at(ms));

            tokio::select! {
                biased;

                event = pointer_rx.recv() => {
                    match event {
                        Some(event) => self.handle_event(event).await,
                        None => break,
                    }
                }

                _ = async move {
                    match wake_at {
                        Some(at) => sleep_until(at).await,
                        None => std::future::pending().await,
                    }
                } => {
                    let now = self.clock.now_ms();
                    self.fire_due(now).await;
                }
            }
        }

        self.hold_timer = None;
        self.tap_timer = None;
        info!("gesture driver stopped");
    }

    async fn handle_event(&mut self, event: PointerEvent) {
        // Timers that were due before this event happened resolve first
        self.fire_due(event.timestamp_ms).await;

        let reaction = self.recognizer.on_event(event);
        debug!(
            ?event,
            pressed = self.recognizer.is_pressed(),
            pending_tap = self.recognizer.has_pending_tap(),
            "pointer event"
        );

        if let Some(gesture) = reaction.gesture {
            self.emit(gesture).await;
        }
        if let Some(timer) = reaction.timer {
            *self.slot(timer.kind) = Some(timer);
        }
    }

    /// Deliver every armed timer due at `now`, earliest first
    async fn fire_due(&mut self, now: u64) {
        while let Some(timer) = self.take_due(now) {
            if let Some(gesture) = self.recognizer.on_timer(timer) {
                self.emit(gesture).await;
            }
        }
    }

    fn take_due(&mut self, now: u64) -> Option<TimerRequest> {
        let kind = [self.hold_timer, self.tap_timer]
            .into_iter()
            .flatten()
            .filter(|t| t.deadline_ms <= now)
            .min_by_key(|t| t.deadline_ms)?
            .kind;
        self.slot(kind).take()
    }

    fn next_deadline(&self) -> Option<u64> {
        [self.hold_timer, self.tap_timer]
            .into_iter()
            .flatten()
            .map(|t| t.deadline_ms)
            .min()
    }

    fn slot(&mut self, kind: TimerKind) -> &mut Option<TimerRequest> {
        match kind {
            TimerKind::Hold => &mut self.hold_timer,
            TimerKind::PendingTap => &mut self.tap_timer,
        }
    }

    async fn emit(&self, gesture: Gesture) {
        info!(%gesture, "gesture recognized");
        if self.gesture_tx.send(gesture).await.is_err() {
            warn!(%gesture, "gesture dropped - controller channel closed");
        }
    }
}
