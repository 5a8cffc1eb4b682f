//! Unix domain socket server for IPC
//!
//! Provides request-response communication and push notifications of loop
//! events to subscribed clients. Pointer requests are stamped on arrival and
//! handed to the gesture driver; loop commands go through the controller
//! handle so they are serialized with gestures.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Local};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::unix::OwnedReadHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, watch, RwLock};
use tracing::{debug, error, info, warn};

use crate::controller::ControllerHandle;
use crate::engine::{EngineError, SoftwareEngine};
use crate::events::LoopEvent;
use crate::input::{InputClock, PointerEvent, PointerKind};
use crate::state::LoopState;

use super::protocol::{DaemonStatus, Notification, Request, Response, MAX_MESSAGE_LEN};

/// Channels and handles the server forwards requests to
pub struct ServerLinks {
    pub clock: InputClock,
    pub pointer_tx: mpsc::Sender<PointerEvent>,
    pub controller: ControllerHandle,
    pub engine: Arc<SoftwareEngine>,
    pub event_tx: broadcast::Sender<LoopEvent>,
    pub level_rx: watch::Receiver<f32>,
    pub export_dir: PathBuf,
    pub stdin_input: bool,
}

/// IPC Server handling client connections
pub struct Server {
    socket_path: PathBuf,
    listener: UnixListener,
    shared: Arc<Shared>,
    shutdown_tx: broadcast::Sender<()>,
}

/// State shared with every client handler
struct Shared {
    links: ServerLinks,
    state: RwLock<ServerState>,
}

struct ServerState {
    start_time: Instant,
    /// Mirror of the controller's loop state
    loop_state: LoopState,
}

impl Server {
    /// Create a new IPC server bound to `socket_path`
    pub fn new(socket_path: &Path, links: ServerLinks) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent).context("failed to create socket directory")?;
        }

        // Remove stale socket if it exists
        if socket_path.exists() {
            std::fs::remove_file(socket_path).context("failed to remove stale socket")?;
        }

        let listener = UnixListener::bind(socket_path).context("failed to bind Unix socket")?;

        // Set socket permissions to owner-only (0600)
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o600))?;
        }

        let (shutdown_tx, _) = broadcast::channel(1);

        let shared = Arc::new(Shared {
            links,
            state: RwLock::new(ServerState {
                start_time: Instant::now(),
                loop_state: LoopState::Idle,
            }),
        });

        info!(?socket_path, "IPC server listening");

        Ok(Self {
            socket_path: socket_path.to_owned(),
            listener,
            shared,
            shutdown_tx,
        })
    }

    /// Update the mirrored loop state
    pub async fn set_state(&self, loop_state: LoopState) {
        let mut state = self.shared.state.write().await;
        let old_state = state.loop_state;
        state.loop_state = loop_state;

        if old_state != loop_state {
            debug!(from = %old_state, to = %loop_state, "IPC server: loop state updated");
        }
    }

    /// Run the server, accepting connections
    pub async fn run(&self) -> Result<()> {
        loop {
            match self.listener.accept().await {
                Ok((stream, _addr)) => {
                    debug!("client connected");
                    let shared = Arc::clone(&self.shared);
                    let mut shutdown_rx = self.shutdown_tx.subscribe();

                    tokio::spawn(async move {
                        tokio::select! {
                            result = Self::handle_client(stream, shared) => {
                                if let Err(e) = result {
                                    warn!(?e, "client handler error");
                                }
                            }
                            _ = shutdown_rx.recv() => {
                                debug!("client handler shutting down");
                            }
                        }
                    });
                }
                Err(e) => {
                    error!(?e, "accept error");
                }
            }
        }
    }

    /// Handle a single client connection
    ///
    /// Requests are read on a separate task so that waiting for the next
    /// request and pushing notifications never interrupt a partial frame.
    async fn handle_client(stream: UnixStream, shared: Arc<Shared>) -> Result<()> {
        let (reader, mut writer) = stream.into_split();
        let (request_tx, mut request_rx) = mpsc::channel(8);
        let reader_task = tokio::spawn(read_requests(reader, request_tx));

        let mut events: Option<broadcast::Receiver<LoopEvent>> = None;

        let result = loop {
            tokio::select! {
                request = request_rx.recv() => {
                    let Some(request) = request else {
                        break Ok(());
                    };

                    let response = match request {
                        Ok(request) => {
                            debug!(?request, "received request");
                            Self::process_request(request, &shared, &mut events).await
                        }
                        Err(e) => Response::error("bad_request", format!("{e:#}")),
                    };

                    if let Err(e) = write_frame(&mut writer, &response).await {
                        break Err(e);
                    }
                }

                event = next_event(&mut events) => {
                    let notification = match event {
                        Ok(event) => Some(Notification::Event { event }),
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(skipped, "subscriber lagged");
                            Some(Notification::Lagged { skipped })
                        }
                        Err(RecvError::Closed) => {
                            events = None;
                            None
                        }
                    };

                    if let Some(notification) = notification {
                        if let Err(e) = write_frame(&mut writer, &notification).await {
                            break Err(e);
                        }
                    }
                }
            }
        };

        reader_task.abort();
        result
    }

    /// Process a request and return a response
    async fn process_request(
        request: Request,
        shared: &Shared,
        events: &mut Option<broadcast::Receiver<LoopEvent>>,
    ) -> Response {
        let links = &shared.links;

        match request {
            Request::Ping => Response::Pong,

            Request::GetStatus => Response::Status(Self::status(shared).await),

            Request::Subscribe => {
                *events = Some(links.event_tx.subscribe());
                debug!("client subscribed to notifications");
                Response::Subscribed
            }

            Request::PointerDown => Self::forward_pointer(links, PointerKind::Down).await,
            Request::PointerUp => Self::forward_pointer(links, PointerKind::Up).await,

            Request::SelectDevice { device_id } => {
                match links.controller.select_device(device_id).await {
                    Ok(()) => Response::Accepted,
                    Err(e) => Response::error("controller_closed", e.to_string()),
                }
            }

            Request::Redo => match links.controller.redo().await {
                Ok(applied) => Response::RedoResult { applied },
                Err(e) => Response::error("controller_closed", e.to_string()),
            },

            Request::Export { path } => {
                let path = match path {
                    Some(path) if path.is_relative() => {
                        return Response::error("invalid_path", "export path must be absolute");
                    }
                    Some(path) => path,
                    None => default_export_path(&links.export_dir, Local::now()),
                };

                match links.controller.export(path.clone()).await {
                    Ok(success) => Response::Exported {
                        path: path.display().to_string(),
                        success,
                    },
                    Err(e) => Response::error("controller_closed", e.to_string()),
                }
            }

            Request::FeedInput { samples } => match links.engine.feed_input(&samples) {
                Ok(()) => Response::Accepted,
                Err(e @ EngineError::Rejected { .. }) => {
                    Response::error("invalid_input", e.to_string())
                }
                Err(e) => Response::error("engine", e.to_string()),
            },
        }
    }

    async fn forward_pointer(links: &ServerLinks, kind: PointerKind) -> Response {
        let event = links.clock.stamp(kind);
        match links.pointer_tx.send(event).await {
            Ok(()) => Response::Accepted,
            Err(_) => Response::error("input_closed", "gesture driver is not running"),
        }
    }

    async fn status(shared: &Shared) -> DaemonStatus {
        let state = shared.state.read().await;
        let links = &shared.links;

        DaemonStatus {
            loop_state: state.loop_state,
            input_level: *links.level_rx.borrow(),
            layers: links.engine.layer_count(),
            input_device: links.engine.device_id(),
            stdin_input: links.stdin_input,
            uptime_secs: state.start_time.elapsed().as_secs(),
            ..DaemonStatus::default()
        }
    }

    /// Gracefully shutdown the server
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());

        // Remove socket file
        if self.socket_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.socket_path) {
                warn!(?e, "failed to remove socket file");
            }
        }

        info!("IPC server shutdown complete");
    }
}

/// `loop_YYYYMMDD_HHMMSS.wav` inside `dir`
fn default_export_path(dir: &Path, now: DateTime<Local>) -> PathBuf {
    dir.join(format!("loop_{}.wav", now.format("%Y%m%d_%H%M%S")))
}

/// Read requests until the client disconnects or the handler goes away
async fn read_requests(mut reader: OwnedReadHalf, request_tx: mpsc::Sender<Result<Request>>) {
    loop {
        let frame = match read_frame(&mut reader).await {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                debug!("client disconnected");
                return;
            }
            Err(e) => {
                warn!(?e, "failed to read request, disconnecting");
                return;
            }
        };

        let request = serde_json::from_slice::<Request>(&frame).context("failed to parse request");
        if request_tx.send(request).await.is_err() {
            return;
        }
    }
}

async fn next_event(
    events: &mut Option<broadcast::Receiver<LoopEvent>>,
) -> Result<LoopEvent, RecvError> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Read one length-prefixed frame; `None` on clean EOF
async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_MESSAGE_LEN {
        bail!("message too large: {len} bytes");
    }

    let mut msg_buf = vec![0u8; len];
    reader.read_exact(&mut msg_buf).await?;
    Ok(Some(msg_buf))
}

/// Send a length-prefixed JSON message
async fn write_frame<W, T>(writer: &mut W, msg: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: serde::Serialize,
{
    let msg_bytes = serde_json::to_vec(msg)?;
    let msg_len = (msg_bytes.len() as u32).to_le_bytes();

    writer.write_all(&msg_len).await?;
    writer.write_all(&msg_bytes).await?;

    Ok(())
}
