//! Loop controller
//!
//! Owns the loop state and the engine handle. Gestures from the driver and
//! commands from IPC clients are consumed on one task, so transitions are
//! applied one at a time: table actions first, then the `SetLoopState`
//! notification, then publication to subscribers.

mod sampler;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::engine::EngineFacade;
use crate::events::LoopEvent;
use crate::gesture::Gesture;
use crate::state::{transition, EngineAction, LoopState, Transition};

pub use sampler::spawn_level_sampler;

/// Requests that do not come from the gesture path
#[derive(Debug)]
pub enum ControllerCommand {
    SelectDevice(i32),
    Redo { reply: oneshot::Sender<bool> },
    Export { path: PathBuf, reply: oneshot::Sender<bool> },
}

/// Errors returned by [`ControllerHandle`]
#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    #[error("loop controller is not running")]
    Closed,
}

/// Cloneable sender side for issuing controller commands
#[derive(Debug, Clone)]
pub struct ControllerHandle {
    command_tx: mpsc::Sender<ControllerCommand>,
}

impl ControllerHandle {
    pub fn new(command_tx: mpsc::Sender<ControllerCommand>) -> Self {
        Self { command_tx }
    }

    pub async fn select_device(&self, device_id: i32) -> Result<(), ControllerError> {
        self.command_tx
            .send(ControllerCommand::SelectDevice(device_id))
            .await
            .map_err(|_| ControllerError::Closed)
    }

    /// Returns whether the redo was applied
    pub async fn redo(&self) -> Result<bool, ControllerError> {
        let (reply, rx) = oneshot::channel();
        self.command_tx
            .send(ControllerCommand::Redo { reply })
            .await
            .map_err(|_| ControllerError::Closed)?;
        rx.await.map_err(|_| ControllerError::Closed)
    }

    /// Returns whether the engine wrote the file
    pub async fn export(&self, path: PathBuf) -> Result<bool, ControllerError> {
        let (reply, rx) = oneshot::channel();
        self.command_tx
            .send(ControllerCommand::Export { path, reply })
            .await
            .map_err(|_| ControllerError::Closed)?;
        rx.await.map_err(|_| ControllerError::Closed)
    }
}

/// Drives the loop state machine against an engine
pub struct LoopController {
    state: LoopState,
    engine: Arc<dyn EngineFacade>,
    /// Time when the current state was entered
    state_entered_at: Instant,
    event_tx: broadcast::Sender<LoopEvent>,
}

impl LoopController {
    pub fn new(engine: Arc<dyn EngineFacade>, event_tx: broadcast::Sender<LoopEvent>) -> Self {
        Self {
            state: LoopState::Idle,
            engine,
            state_entered_at: Instant::now(),
            event_tx,
        }
    }

    /// Get the current loop state
    pub fn state(&self) -> LoopState {
        self.state
    }

    /// Run until both input channels close
    pub async fn run(
        &mut self,
        mut gesture_rx: mpsc::Receiver<Gesture>,
        mut command_rx: mpsc::Receiver<ControllerCommand>,
    ) {
        info!(state = %self.state, "loop controller started");

        loop {
            tokio::select! {
                // Gestures are time-sensitive, serve them first
                biased;

                Some(gesture) = gesture_rx.recv() => {
                    self.handle_gesture(gesture);
                }
                Some(command) = command_rx.recv() => {
                    self.handle_command(command);
                }
                else => break,
            }
        }

        info!("loop controller stopped");
    }

    /// Apply one gesture and return the transition taken
    pub fn handle_gesture(&mut self, gesture: Gesture) -> Transition {
        let _ = self.event_tx.send(LoopEvent::GestureRecognized { gesture });

        let t = transition(self.state, gesture);
        for action in t.engine_calls() {
            self.issue(action);
        }

        if t.is_change() {
            self.publish(t.to);
        } else {
            debug!(state = %self.state, %gesture, actions = t.actions.len(), "no state change");
        }

        t
    }

    fn handle_command(&mut self, command: ControllerCommand) {
        match command {
            ControllerCommand::SelectDevice(device_id) => self.select_device(device_id),
            ControllerCommand::Redo { reply } => {
                let _ = reply.send(self.redo());
            }
            ControllerCommand::Export { path, reply } => self.spawn_export(path, reply),
        }
    }

    pub fn select_device(&self, device_id: i32) {
        if let Err(e) = self.engine.set_device_id(device_id) {
            warn!(device_id, %e, "device selection failed");
        }
        let _ = self.event_tx.send(LoopEvent::DeviceSelected { device_id });
    }

    /// Restore the last undone layer while the loop is audible
    pub fn redo(&self) -> bool {
        if !self.state.accepts_history() {
            debug!(state = %self.state, "redo ignored");
            return false;
        }
        self.issue(EngineAction::Redo);
        true
    }

    /// Export the loop on the blocking pool; never changes the loop state
    ///
    /// Gestures keep flowing while the file is written.
    fn spawn_export(&self, path: PathBuf, reply: oneshot::Sender<bool>) {
        let engine = Arc::clone(&self.engine);
        let event_tx = self.event_tx.clone();

        tokio::task::spawn_blocking(move || {
            let _ = reply.send(export_loop(engine.as_ref(), &event_tx, &path));
        });
    }

    /// Release the engine session unconditionally
    pub fn shutdown(&self) {
        info!(state = %self.state, "stopping engine");
        self.issue(EngineAction::Stop);
    }

    /// Engine failures are reported here and otherwise ignored
    fn issue(&self, action: EngineAction) {
        debug!(?action, "engine call");
        if let Err(e) = self.engine.apply(action) {
            warn!(?action, %e, "engine call failed");
        }
    }

    fn publish(&mut self, to: LoopState) {
        let from = self.state;
        let duration_ms = self.state_entered_at.elapsed().as_millis() as u64;

        info!(from = %from, to = %to, duration_ms, "loop state transition");

        self.state = to;
        self.state_entered_at = Instant::now();

        let _ = self.event_tx.send(LoopEvent::StateChanged {
            from,
            to,
            duration_ms,
        });
    }
}

fn export_loop(
    engine: &dyn EngineFacade,
    event_tx: &broadcast::Sender<LoopEvent>,
    path: &Path,
) -> bool {
    let success = engine.export_to_file(path);
    let _ = event_tx.send(LoopEvent::ExportFinished {
        path: path.display().to_string(),
        success,
    });
    success
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    use crate::engine::EngineError;

    /// Records every facade call; optionally fails commands or exports
    #[derive(Default)]
    pub(crate) struct RecordingEngine {
        pub calls: Mutex<Vec<String>>,
        pub fail_commands: bool,
        pub export_result: bool,
        pub export_delay: Duration,
    }

    impl RecordingEngine {
        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn record(&self, call: impl Into<String>) -> Result<(), EngineError> {
            let call = call.into();
            self.calls.lock().unwrap().push(call.clone());
            if self.fail_commands {
                return Err(EngineError::Rejected {
                    operation: "test",
                    reason: call,
                });
            }
            Ok(())
        }
    }

    impl EngineFacade for RecordingEngine {
        fn start(&self) -> Result<(), EngineError> {
            self.record("start")
        }
        fn stop(&self) -> Result<(), EngineError> {
            self.record("stop")
        }
        fn set_loop_state(&self, state: LoopState) -> Result<(), EngineError> {
            self.record(format!("set_loop_state:{state}"))
        }
        fn set_device_id(&self, device_id: i32) -> Result<(), EngineError> {
            self.record(format!("set_device_id:{device_id}"))
        }
        fn undo(&self) -> Result<(), EngineError> {
            self.record("undo")
        }
        fn redo(&self) -> Result<(), EngineError> {
            self.record("redo")
        }
        fn input_level(&self) -> f32 {
            0.25
        }
        fn export_to_file(&self, path: &Path) -> bool {
            self.calls
                .lock()
                .unwrap()
                .push(format!("export:{}", path.display()));
            std::thread::sleep(self.export_delay);
            self.export_result
        }
    }

    fn controller(engine: RecordingEngine) -> (LoopController, Arc<RecordingEngine>) {
        let engine = Arc::new(engine);
        let (event_tx, _) = broadcast::channel(64);
        let facade: Arc<dyn EngineFacade> = engine.clone();
        (LoopController::new(facade, event_tx), engine)
    }

    fn drive(controller: &mut LoopController, gestures: &[Gesture]) {
        for gesture in gestures {
            controller.handle_gesture(*gesture);
        }
    }

    #[test]
    fn test_first_tap_starts_then_notifies() {
        let (mut c, engine) = controller(RecordingEngine::default());
        c.handle_gesture(Gesture::Tap);

        assert_eq!(c.state(), LoopState::Recording);
        assert_eq!(engine.calls(), vec!["start", "set_loop_state:Recording"]);
    }

    #[test]
    fn test_hold_from_stopped_deletes_loop() {
        let (mut c, engine) = controller(RecordingEngine::default());
        drive(&mut c, &[Gesture::Tap, Gesture::Tap, Gesture::DoubleTap]);
        assert_eq!(c.state(), LoopState::Stopped);

        c.handle_gesture(Gesture::Hold);
        assert_eq!(c.state(), LoopState::Idle);

        let calls = engine.calls();
        assert_eq!(calls.iter().filter(|c| *c == "stop").count(), 1);
        assert_eq!(
            &calls[calls.len() - 2..],
            &["stop".to_string(), "set_loop_state:Idle".to_string()]
        );
    }

    #[test]
    fn test_undo_keeps_state_without_notification() {
        let (mut c, engine) = controller(RecordingEngine::default());
        drive(&mut c, &[Gesture::Tap, Gesture::Tap]);
        let before = engine.calls().len();

        c.handle_gesture(Gesture::Hold);
        assert_eq!(c.state(), LoopState::Playing);
        assert_eq!(&engine.calls()[before..], &["undo".to_string()]);
    }

    #[test]
    fn test_double_tap_hold_while_recording_is_ignored() {
        let (mut c, engine) = controller(RecordingEngine::default());
        c.handle_gesture(Gesture::Tap);
        let before = engine.calls().len();

        c.handle_gesture(Gesture::DoubleTapHold);
        assert_eq!(c.state(), LoopState::Recording);
        assert_eq!(engine.calls().len(), before);
    }

    #[test]
    fn test_engine_failures_do_not_block_transitions() {
        let (mut c, engine) = controller(RecordingEngine {
            fail_commands: true,
            ..Default::default()
        });
        drive(&mut c, &[Gesture::Tap, Gesture::Tap, Gesture::DoubleTapHold]);

        assert_eq!(c.state(), LoopState::Idle);
        assert!(engine.calls().contains(&"stop".to_string()));
    }

    #[test]
    fn test_failed_export_touches_nothing_else() {
        let (mut c, engine) = controller(RecordingEngine::default());
        drive(&mut c, &[Gesture::Tap, Gesture::Tap]);
        let before = engine.calls().len();

        assert!(!export_loop(
            c.engine.as_ref(),
            &c.event_tx,
            Path::new("/tmp/loop.wav")
        ));
        assert_eq!(c.state(), LoopState::Playing);
        assert_eq!(&engine.calls()[before..], &["export:/tmp/loop.wav".to_string()]);
    }

    #[test]
    fn test_redo_only_while_audible() {
        let (mut c, engine) = controller(RecordingEngine::default());
        assert!(!c.redo());

        drive(&mut c, &[Gesture::Tap, Gesture::Tap]);
        assert!(c.redo());
        assert_eq!(engine.calls().last().map(String::as_str), Some("redo"));

        c.handle_gesture(Gesture::DoubleTap);
        assert!(!c.redo());
    }

    #[test]
    fn test_shutdown_always_stops() {
        let (c, engine) = controller(RecordingEngine::default());
        c.shutdown();
        assert_eq!(engine.calls(), vec!["stop"]);
    }

    #[test]
    fn test_start_stop_pairing_over_session() {
        let (mut c, engine) = controller(RecordingEngine::default());
        use Gesture::*;
        drive(
            &mut c,
            &[
                Tap, Tap, Tap, Hold, DoubleTap, Tap, DoubleTapHold, Hold, Tap, Tap, DoubleTap,
                Hold,
            ],
        );

        let calls = engine.calls();
        let starts = calls.iter().filter(|c| *c == "start").count();
        let stops = calls.iter().filter(|c| *c == "stop").count();
        assert_eq!(starts, 2);
        assert_eq!(stops, 2);
        assert_eq!(c.state(), LoopState::Idle);
    }

    #[test]
    fn test_transitions_are_published() {
        let engine: Arc<dyn EngineFacade> = Arc::new(RecordingEngine::default());
        let (event_tx, mut event_rx) = broadcast::channel(16);
        let mut c = LoopController::new(engine, event_tx);

        c.handle_gesture(Gesture::Tap);

        assert!(matches!(
            event_rx.try_recv().unwrap(),
            LoopEvent::GestureRecognized {
                gesture: Gesture::Tap
            }
        ));
        assert!(matches!(
            event_rx.try_recv().unwrap(),
            LoopEvent::StateChanged {
                from: LoopState::Idle,
                to: LoopState::Recording,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_run_serves_commands() {
        let (mut c, engine) = controller(RecordingEngine {
            export_result: true,
            ..Default::default()
        });
        let (gesture_tx, gesture_rx) = mpsc::channel(8);
        let (command_tx, command_rx) = mpsc::channel(8);
        let handle = ControllerHandle::new(command_tx);

        let task = tokio::spawn(async move {
            c.run(gesture_rx, command_rx).await;
            c
        });

        gesture_tx.send(Gesture::Tap).await.unwrap();
        handle.select_device(4).await.unwrap();
        assert!(handle.export(PathBuf::from("/tmp/x.wav")).await.unwrap());
        assert!(!handle.redo().await.unwrap());

        drop(gesture_tx);
        drop(handle);
        let c = task.await.unwrap();

        assert_eq!(c.state(), LoopState::Recording);
        assert_eq!(
            engine.calls(),
            vec![
                "start",
                "set_loop_state:Recording",
                "set_device_id:4",
                "export:/tmp/x.wav"
            ]
        );
    }

    #[tokio::test]
    async fn test_export_does_not_stall_gestures() {
        let (mut c, engine) = controller(RecordingEngine {
            export_result: true,
            export_delay: Duration::from_millis(300),
            ..Default::default()
        });
        let mut event_rx = c.event_tx.subscribe();
        let (gesture_tx, gesture_rx) = mpsc::channel(8);
        let (command_tx, command_rx) = mpsc::channel(8);
        let handle = ControllerHandle::new(command_tx);

        tokio::spawn(async move { c.run(gesture_rx, command_rx).await });
        let export =
            tokio::spawn(async move { handle.export(PathBuf::from("/tmp/slow.wav")).await });

        // Wait until the write is in progress
        while !engine.calls().iter().any(|call| call.starts_with("export:")) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        gesture_tx.send(Gesture::Tap).await.unwrap();

        assert!(matches!(
            event_rx.recv().await.unwrap(),
            LoopEvent::GestureRecognized { .. }
        ));
        assert!(matches!(
            event_rx.recv().await.unwrap(),
            LoopEvent::StateChanged {
                to: LoopState::Recording,
                ..
            }
        ));
        assert!(matches!(
            event_rx.recv().await.unwrap(),
            LoopEvent::ExportFinished { success: true, .. }
        ));
        assert!(export.await.unwrap().unwrap());
    }
}
