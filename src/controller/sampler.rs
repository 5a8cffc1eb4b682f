//! Periodic input level sampling

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::debug;

use crate::engine::EngineFacade;

/// Sample `input_level()` every `period` and publish it on `level_tx`
///
/// Runs until aborted or until every receiver is gone. Shares nothing with
/// the gesture path except the engine handle.
pub fn spawn_level_sampler(
    engine: Arc<dyn EngineFacade>,
    period: Duration,
    level_tx: watch::Sender<f32>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            let level = engine.input_level().clamp(0.0, 1.0);
            if level_tx.send(level).is_err() {
                debug!("no level observers left, sampler exiting");
                break;
            }
        }
    })
}
