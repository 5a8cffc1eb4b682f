//! looper-daemon: single-control audio looper
//!
//! This daemon turns a stream of press/release events into loop commands:
//! - Gesture recognition (tap, hold, double tap, double tap + hold)
//! - Loop state machine driving the audio engine facade
//! - IPC server for clients (pointer input, status, redo, export)
//!
//! Pointer input arrives from stdin lines (`down` / `up`) or IPC requests.

mod config;
mod controller;
mod engine;
mod events;
mod gesture;
mod input;
mod ipc;
mod lifecycle;
mod state;

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::controller::{spawn_level_sampler, ControllerHandle, LoopController};
use crate::engine::{EngineFacade, SoftwareEngine};
use crate::events::LoopEvent;
use crate::gesture::{GestureDriver, GestureTiming};
use crate::input::{InputClock, StdinListener};
use crate::ipc::{Server, ServerLinks};
use crate::lifecycle::ShutdownSignal;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "looper-daemon starting");

    // Load configuration
    let config = Config::load()?;
    config.ensure_dirs()?;
    info!(?config.socket_path, ?config.export_dir, "configuration loaded");

    // Engine runtime is process-wide and set up exactly once
    let runtime = engine::initialize(config.sample_rate);
    let capture = Arc::new(SoftwareEngine::new(runtime));
    let engine: Arc<dyn EngineFacade> = capture.clone();

    let shutdown = ShutdownSignal::new();
    let clock = InputClock::new();

    // Stdin listener / IPC -> gesture driver
    let (pointer_tx, pointer_rx) = mpsc::channel(64);
    // Gesture driver -> loop controller
    let (gesture_tx, gesture_rx) = mpsc::channel(32);
    // IPC -> loop controller
    let (command_tx, command_rx) = mpsc::channel(16);
    // Loop controller -> IPC server and log
    let (event_tx, _event_rx) = broadcast::channel::<LoopEvent>(64);
    // Level sampler -> status queries
    let (level_tx, level_rx) = watch::channel(0.0f32);

    let mut driver = GestureDriver::new(GestureTiming::default(), clock, gesture_tx);
    let mut controller = LoopController::new(Arc::clone(&engine), event_tx.clone());
    let sampler = spawn_level_sampler(Arc::clone(&engine), config.level_interval, level_tx);

    // Start the stdin listener (runs on dedicated thread)
    let stdin_listener = StdinListener::new(pointer_tx.clone(), clock);
    if config.stdin_input {
        match stdin_listener.start() {
            Ok(()) => info!("stdin listener started"),
            Err(e) => {
                error!(?e, "failed to start stdin listener");
                warn!("continuing with IPC pointer input only");
            }
        }
    }

    let server = Server::new(
        &config.socket_path,
        ServerLinks {
            clock,
            pointer_tx,
            controller: ControllerHandle::new(command_tx),
            engine: capture,
            event_tx: event_tx.clone(),
            level_rx,
            export_dir: config.export_dir.clone(),
            stdin_input: stdin_listener.is_running(),
        },
    )?;

    let mut loop_event_rx = event_tx.subscribe();

    info!("daemon initialized, entering main loop");

    tokio::select! {
        // Turn pointer events into gestures
        _ = driver.run(pointer_rx) => {
            info!("gesture driver exited");
        }

        // Apply gestures and IPC commands to the loop
        _ = controller.run(gesture_rx, command_rx) => {
            info!("loop controller exited");
        }

        // Run the IPC server (accepts client connections)
        result = server.run() => {
            if let Err(e) = result {
                error!(?e, "IPC server error");
            }
        }

        // Mirror loop state into the IPC server
        _ = async {
            loop {
                match loop_event_rx.recv().await {
                    Ok(event) => {
                        info!(%event, "loop event");
                        if let LoopEvent::StateChanged { to, .. } = event {
                            server.set_state(to).await;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "loop event receiver lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        break;
                    }
                }
            }
        } => {
            info!("loop event handler exited");
        }

        // Wait for shutdown signal
        result = shutdown.wait() => {
            match result {
                Ok(reason) => info!(?reason, "shutdown signal received"),
                Err(e) => error!(?e, "failed to register signal handlers"),
            }
        }
    }

    // Cleanup
    info!(state = %controller.state(), "shutting down...");

    stdin_listener.stop();
    sampler.abort();
    server.shutdown().await;
    controller.shutdown();

    info!("looper-daemon stopped");

    Ok(())
}
