//! Line-oriented pointer listener on stdin
//!
//! Lets a foot switch bridge, a serial adapter or a person at a terminal
//! drive the looper by writing `down` / `up` lines. Runs on a dedicated
//! thread because stdin reads block.

use std::io::BufRead;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::pointer::{InputClock, PointerEvent, PointerKind};
use super::InputError;

/// Reads pointer transitions from stdin and forwards them stamped
pub struct StdinListener {
    event_tx: mpsc::Sender<PointerEvent>,
    clock: InputClock,
    running: Arc<AtomicBool>,
}

impl StdinListener {
    /// Create a new stdin listener
    pub fn new(event_tx: mpsc::Sender<PointerEvent>, clock: InputClock) -> Self {
        Self {
            event_tx,
            clock,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Start the listener thread
    ///
    /// The thread exits on EOF, when the event channel closes, or on the
    /// first line read after `stop()`.
    pub fn start(&self) -> Result<(), InputError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(InputError::AlreadyRunning);
        }

        let event_tx = self.event_tx.clone();
        let clock = self.clock;
        let running = Arc::clone(&self.running);

        thread::Builder::new()
            .name("stdin-listener".to_string())
            .spawn(move || {
                info!("stdin listener thread started");

                let stdin = std::io::stdin();
                if let Err(e) = read_events(stdin.lock(), &event_tx, clock, &running) {
                    error!(?e, "stdin listener error");
                }

                running.store(false, Ordering::SeqCst);
                info!("stdin listener thread stopped");
            })
            .map_err(|e| InputError::ThreadSpawn(e.to_string()))?;

        Ok(())
    }

    /// Ask the listener thread to exit
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Check if the listener is currently running
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// Forward every recognised line of `reader` as a stamped pointer event
fn read_events<R: BufRead>(
    reader: R,
    event_tx: &mpsc::Sender<PointerEvent>,
    clock: InputClock,
    running: &AtomicBool,
) -> Result<(), InputError> {
    for line in reader.lines() {
        let line = line?;
        if !running.load(Ordering::SeqCst) {
            break;
        }
        if line.trim().is_empty() || line.trim_start().starts_with('#') {
            continue;
        }

        let kind = match line.parse::<PointerKind>() {
            Ok(kind) => kind,
            Err(e) => {
                warn!(%e, "ignoring input line");
                continue;
            }
        };

        let event = clock.stamp(kind);
        debug!(?event, "pointer event from stdin");

        // Not in an async context, so block until the driver has room
        if event_tx.blocking_send(event).is_err() {
            return Err(InputError::ChannelClosed);
        }
    }

    debug!("stdin reached EOF");
    Ok(())
}
