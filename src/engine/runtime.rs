//! Process-wide engine runtime
//!
//! Engines share one runtime holding the output format and the session id
//! counter. It is created by the first `initialize()` call and never torn
//! down; later calls return the same runtime.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;

use tracing::{debug, info};

static RUNTIME: OnceLock<EngineRuntime> = OnceLock::new();

/// Shared engine configuration and counters
#[derive(Debug)]
pub struct EngineRuntime {
    sample_rate: u32,
    next_session: AtomicU64,
}

impl EngineRuntime {
    fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            next_session: AtomicU64::new(1),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Hand out a fresh, never reused session id
    pub fn next_session_id(&self) -> u64 {
        self.next_session.fetch_add(1, Ordering::Relaxed)
    }
}

/// Initialize the engine runtime once per process
///
/// The first caller's `sample_rate` wins.
pub fn initialize(sample_rate: u32) -> &'static EngineRuntime {
    let runtime = RUNTIME.get_or_init(|| {
        info!(sample_rate, "engine runtime initialized");
        EngineRuntime::new(sample_rate)
    });

    if runtime.sample_rate != sample_rate {
        debug!(
            requested = sample_rate,
            active = runtime.sample_rate,
            "engine runtime already initialized"
        );
    }

    runtime
}
