//! In-process loop engine
//!
//! Keeps the loop as a stack of layers: the first layer fixes the loop
//! length and only grows while Recording. Each overdub pass captures into a
//! layer of its own, opened by the first block fed after entering
//! Overdubbing (or after an undo discarded it). Undo moves the top overdub
//! onto a redo stack; new material clears that stack. Audio capture is fed
//! from outside through `feed_input`.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use hound::{SampleFormat, WavSpec, WavWriter};
use tracing::{debug, info, warn};

use crate::state::LoopState;

use super::facade::{EngineError, EngineFacade};
use super::runtime::EngineRuntime;

/// Engine session bookkeeping
#[derive(Debug, Default)]
struct Session {
    /// `None` while inactive
    id: Option<u64>,
    device_id: Option<i32>,
    state: LoopState,
    layers: Vec<Vec<f32>>,
    /// Index of the layer the current overdub pass writes into
    overdub_layer: Option<usize>,
    redo_stack: Vec<Vec<f32>>,
    input_level: f32,
}

impl Session {
    fn is_active(&self) -> bool {
        self.id.is_some()
    }

    fn clear_loop(&mut self) {
        self.layers.clear();
        self.overdub_layer = None;
        self.redo_stack.clear();
    }

    fn open_overdub(&mut self) -> usize {
        self.redo_stack.clear();
        self.layers.push(Vec::new());
        let index = self.layers.len() - 1;
        self.overdub_layer = Some(index);
        index
    }

    /// Layer that captured input belongs to in the current state
    fn capture_layer(&mut self) -> Option<usize> {
        match self.state {
            LoopState::Recording => Some(0),
            LoopState::Overdubbing => match self.overdub_layer {
                Some(index) => Some(index),
                None => Some(self.open_overdub()),
            },
            _ => None,
        }
    }
}

/// Loop engine that keeps layers in memory
pub struct SoftwareEngine {
    runtime: &'static EngineRuntime,
    session: Mutex<Session>,
}

impl SoftwareEngine {
    pub fn new(runtime: &'static EngineRuntime) -> Self {
        Self {
            runtime,
            session: Mutex::new(Session::default()),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Session>, EngineError> {
        self.session.lock().map_err(|_| EngineError::Poisoned)
    }

    /// Feed one block of captured mono input
    ///
    /// Updates the input level and, while recording or overdubbing, appends
    /// the block to the top layer.
    pub fn feed_input(&self, block: &[f32]) -> Result<(), EngineError> {
        if block.iter().any(|sample| !sample.is_finite()) {
            return Err(EngineError::Rejected {
                operation: "feed_input",
                reason: "block contains non-finite samples".to_string(),
            });
        }

        let mut session = self.lock()?;
        if !session.is_active() || block.is_empty() {
            return Ok(());
        }

        session.input_level = rms(block).min(1.0);

        let Some(index) = session.capture_layer() else {
            return Ok(());
        };
        if let Some(layer) = session.layers.get_mut(index) {
            layer.extend_from_slice(block);
        }
        Ok(())
    }

    /// Number of layers currently in the loop
    pub fn layer_count(&self) -> usize {
        self.lock().map(|s| s.layers.len()).unwrap_or(0)
    }

    /// Currently selected input device, if any
    pub fn device_id(&self) -> Option<i32> {
        self.lock().ok().and_then(|s| s.device_id)
    }

    fn write_export(&self, path: &Path) -> Result<usize, EngineError> {
        // Snapshot so file IO happens without holding the session lock
        let layers = self.lock()?.layers.clone();
        let mixed = mix_layers(&layers).ok_or(EngineError::NothingToExport)?;

        let spec = WavSpec {
            channels: 1,
            sample_rate: self.runtime.sample_rate(),
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };

        let mut writer = WavWriter::create(path, spec)?;
        for sample in &mixed {
            let clamped = sample.clamp(-1.0, 1.0);
            writer.write_sample((clamped * i16::MAX as f32) as i16)?;
        }
        writer.finalize()?;

        Ok(mixed.len())
    }
}

impl EngineFacade for SoftwareEngine {
    fn start(&self) -> Result<(), EngineError> {
        let mut session = self.lock()?;
        if let Some(previous) = session.id {
            warn!(previous, "start while a session is active, replacing it");
        }

        let id = self.runtime.next_session_id();
        session.id = Some(id);
        session.state = LoopState::Idle;
        session.input_level = 0.0;
        session.clear_loop();

        info!(session = id, "engine session started");
        Ok(())
    }

    fn stop(&self) -> Result<(), EngineError> {
        let mut session = self.lock()?;
        let Some(id) = session.id.take() else {
            debug!("stop without an active session");
            return Ok(());
        };

        *session = Session::default();
        info!(session = id, "engine session stopped");
        Ok(())
    }

    fn set_loop_state(&self, state: LoopState) -> Result<(), EngineError> {
        let mut session = self.lock()?;
        if !session.is_active() {
            return Ok(());
        }

        let previous = session.state;
        if (previous, state) == (LoopState::Idle, LoopState::Recording) {
            session.clear_loop();
            session.layers.push(Vec::new());
        }
        // Every overdub pass gets a fresh layer
        session.overdub_layer = None;
        session.state = state;

        debug!(from = %previous, to = %state, code = state.code(), "engine loop state");
        Ok(())
    }

    fn set_device_id(&self, device_id: i32) -> Result<(), EngineError> {
        let mut session = self.lock()?;
        if !session.is_active() {
            debug!(device_id, "device selection ignored, engine inactive");
            return Ok(());
        }

        session.device_id = Some(device_id);
        info!(device_id, "input device selected");
        Ok(())
    }

    fn undo(&self) -> Result<(), EngineError> {
        let mut session = self.lock()?;
        // The base layer is the loop itself, not history
        if session.layers.len() <= 1 {
            debug!("nothing to undo");
            return Ok(());
        }

        if let Some(layer) = session.layers.pop() {
            if session.overdub_layer == Some(session.layers.len()) {
                session.overdub_layer = None;
            }
            session.redo_stack.push(layer);
            debug!(layers = session.layers.len(), "layer undone");
        }
        Ok(())
    }

    fn redo(&self) -> Result<(), EngineError> {
        let mut session = self.lock()?;
        if let Some(layer) = session.redo_stack.pop() {
            session.layers.push(layer);
            debug!(layers = session.layers.len(), "layer restored");
        }
        Ok(())
    }

    fn input_level(&self) -> f32 {
        match self.lock() {
            Ok(session) if session.is_active() => session.input_level.clamp(0.0, 1.0),
            _ => 0.0,
        }
    }

    fn export_to_file(&self, path: &Path) -> bool {
        match self.write_export(path) {
            Ok(frames) => {
                info!(?path, frames, "loop exported");
                true
            }
            Err(e) => {
                warn!(?path, %e, "loop export failed");
                false
            }
        }
    }
}

fn rms(block: &[f32]) -> f32 {
    let sum: f32 = block.iter().map(|s| s * s).sum();
    (sum / block.len() as f32).sqrt()
}

/// Sum all layers over the base layer's length, wrapping shorter layers.
/// Scales the mix down when it would clip. `None` without a base layer.
fn mix_layers(layers: &[Vec<f32>]) -> Option<Vec<f32>> {
    let length = layers.first().map(Vec::len).filter(|&len| len > 0)?;

    let mut mixed = vec![0.0f32; length];
    for layer in layers.iter().filter(|l| !l.is_empty()) {
        for (i, out) in mixed.iter_mut().enumerate() {
            *out += layer[i % layer.len()];
        }
    }

    let peak = mixed.iter().fold(0.0f32, |peak, s| peak.max(s.abs()));
    if peak > 1.0 {
        for sample in &mut mixed {
            *sample /= peak;
        }
    }

    Some(mixed)
}
