//! Unix domain socket server for IPC
//!
//! Provides request-response communication and pushes engine events to
//! subscribed clients. Engine-affecting requests are queued to the hook
//! thread as commands; the status view is rebuilt from engine events.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, RwLock};
use tracing::{debug, error, info, warn};

use crate::engine::{EngineCommand, Rate};
use crate::events::EngineEvent;
use crate::scenario::{self, ScenarioStore};

use super::protocol::{DaemonStatus, Notification, Request, Response, SessionStatus};

/// Largest accepted request frame
const MAX_FRAME_LEN: usize = 1024 * 1024;

/// Characters of scenario text shown in status lines
const PREVIEW_CHARS: usize = 20;

/// Everything the server needs from the rest of the daemon
pub struct ServerContext {
    pub scenarios: Arc<ScenarioStore>,
    pub scenario_path: PathBuf,
    pub rate: Rate,
    pub events: broadcast::Sender<EngineEvent>,
    pub commands: mpsc::UnboundedSender<EngineCommand>,
}

/// IPC Server handling client connections
pub struct Server {
    socket_path: PathBuf,
    listener: Option<UnixListener>,
    shared: Arc<Shared>,
    shutdown_tx: broadcast::Sender<()>,
}

/// State shared with every client handler
struct Shared {
    state: RwLock<ServerState>,
    events: broadcast::Sender<EngineEvent>,
    commands: mpsc::UnboundedSender<EngineCommand>,
}

struct ServerState {
    status: DaemonStatus,
    start_time: std::time::Instant,
    scenarios: Arc<ScenarioStore>,
}

impl Shared {
    fn new(context: ServerContext) -> Self {
        let status = DaemonStatus {
            letters_per_keystroke: context.rate,
            assigned_slots: context.scenarios.assigned_count(),
            scenario_path: Some(context.scenario_path),
            ..DaemonStatus::default()
        };
        Self {
            state: RwLock::new(ServerState {
                status,
                start_time: std::time::Instant::now(),
                scenarios: context.scenarios,
            }),
            events: context.events,
            commands: context.commands,
        }
    }
}

impl Server {
    /// Create a new IPC server bound to `socket_path`
    pub fn new(socket_path: &Path, context: ServerContext) -> Result<Self> {
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

        info!(?socket_path, "IPC server listening");

        Ok(Self {
            socket_path: socket_path.to_owned(),
            listener: Some(listener),
            shared: Arc::new(Shared::new(context)),
            shutdown_tx,
        })
    }

    /// Record whether the keyboard hook is live
    pub async fn set_hook_installed(&self, installed: bool) {
        self.shared.state.write().await.status.hook_installed = installed;
    }

    /// Fold an engine event into the status view and log a status line
    pub async fn record_event(&self, event: &EngineEvent) {
        let mut state = self.shared.state.write().await;
        match *event {
            EngineEvent::Started { slot } => {
                let text = state.scenarios.get(slot).unwrap_or_default();
                let length = text.chars().count();
                info!(
                    hotkey = %slot,
                    preview = %preview(text),
                    "started, change scenario with Ctrl+Shift+F1..F12"
                );
                state.status.session = Some(SessionStatus {
                    slot,
                    hotkey: slot.hotkey_name(),
                    position: 0,
                    length,
                });
            }
            EngineEvent::Stopped => {
                if state.status.session.take().is_some() {
                    info!("stopped, arm a scenario with Ctrl+Shift+F1..F12");
                }
            }
            EngineEvent::KeyStroke { position } => {
                if let Some(session) = state.status.session.as_mut() {
                    session.position = position;
                }
            }
            EngineEvent::RateChanged { rate } => {
                info!(%rate, "letters per keystroke");
                state.status.letters_per_keystroke = rate;
            }
        }
    }

    /// Run the server, accepting connections
    pub async fn run(&self) -> Result<()> {
        let listener = self.listener.as_ref().context("server not initialized")?;

        loop {
            match listener.accept().await {
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
    async fn handle_client(stream: UnixStream, shared: Arc<Shared>) -> Result<()> {
        let (reader, mut writer) = stream.into_split();

        // Frames are read on their own task so a push never interrupts a partial read
        let (request_tx, mut request_rx) = mpsc::channel(8);
        let reader_task = tokio::spawn(Self::read_requests(reader, request_tx));

        let mut subscription: Option<broadcast::Receiver<EngineEvent>> = None;

        let result = async {
            loop {
                tokio::select! {
                    incoming = request_rx.recv() => {
                        let Some(incoming) = incoming else {
                            debug!("client disconnected");
                            return Ok(());
                        };
                        let response = match incoming {
                            Ok(request) => {
                                debug!(?request, "received request");
                                let (response, subscribe) = Self::process_request(request, &shared).await;
                                if subscribe && subscription.is_none() {
                                    subscription = Some(shared.events.subscribe());
                                    debug!("client subscribed to notifications");
                                }
                                response
                            }
                            Err(message) => Response::error("bad_request", message),
                        };
                        Self::send_message(&mut writer, &response).await?;
                    }
                    event = next_event(&mut subscription) => {
                        match event {
                            Ok(event) => {
                                Self::send_message(&mut writer, &Notification::Event { event }).await?;
                            }
                            Err(RecvError::Lagged(n)) => {
                                warn!(skipped = n, "subscriber lagged behind engine events");
                            }
                            Err(RecvError::Closed) => {
                                subscription = None;
                            }
                        }
                    }
                }
            }
        }
        .await;

        reader_task.abort();
        result
    }

    /// Read length-prefixed requests until EOF or a protocol violation
    async fn read_requests<R>(mut reader: R, request_tx: mpsc::Sender<Result<Request, String>>)
    where
        R: AsyncRead + Unpin,
    {
        let mut len_buf = [0u8; 4];

        loop {
            // Read message length (4-byte little-endian)
            if let Err(e) = reader.read_exact(&mut len_buf).await {
                if e.kind() != std::io::ErrorKind::UnexpectedEof {
                    warn!(?e, "failed to read request length");
                }
                return;
            }

            let len = u32::from_le_bytes(len_buf) as usize;
            if len > MAX_FRAME_LEN {
                warn!(len, "message too large, disconnecting");
                return;
            }

            // Read message body
            let mut msg_buf = vec![0u8; len];
            if let Err(e) = reader.read_exact(&mut msg_buf).await {
                warn!(?e, "failed to read request body");
                return;
            }

            let parsed = serde_json::from_slice::<Request>(&msg_buf).map_err(|e| e.to_string());
            if request_tx.send(parsed).await.is_err() {
                return;
            }
        }
    }

    /// Send a length-prefixed JSON message
    async fn send_message<W, T>(writer: &mut W, msg: &T) -> Result<()>
    where
        W: AsyncWrite + Unpin,
        T: Serialize,
    {
        let msg_bytes = serde_json::to_vec(msg)?;
        let msg_len = u32::try_from(msg_bytes.len())
            .context("message too large")?
            .to_le_bytes();

        writer.write_all(&msg_len).await?;
        writer.write_all(&msg_bytes).await?;

        Ok(())
    }

    /// Process a request and return a response
    /// Returns (Response, should_subscribe)
    async fn process_request(request: Request, shared: &Shared) -> (Response, bool) {
        match request {
            Request::Ping => (Response::Pong, false),

            Request::GetStatus => {
                let mut state = shared.state.write().await;
                state.status.uptime_secs = state.start_time.elapsed().as_secs();
                (Response::Status(state.status.clone()), false)
            }

            Request::SetRate {
                letters_per_keystroke,
            } => {
                info!(letters_per_keystroke, "rate change requested via IPC");
                (
                    Self::queue(shared, EngineCommand::SetRate(letters_per_keystroke)),
                    false,
                )
            }

            Request::Stop => (Self::queue(shared, EngineCommand::Stop), false),

            Request::GetScenario { slot } => {
                let state = shared.state.read().await;
                let text = state.scenarios.get(slot).map(str::to_owned);
                (
                    Response::Scenario {
                        slot,
                        hotkey: slot.hotkey_name(),
                        text,
                    },
                    false,
                )
            }

            Request::LoadScenarios { path } => {
                let store = match scenario::load(&path) {
                    Ok(store) => Arc::new(store),
                    Err(e) => {
                        warn!(?e, "scenario reload failed, keeping current scenarios");
                        return (Response::error("scenario_load_failed", e.to_string()), false);
                    }
                };
                let assigned = store.assigned_count();
                let response = Self::queue(shared, EngineCommand::ReplaceScenarios(Arc::clone(&store)));
                if matches!(response, Response::Accepted) {
                    let mut state = shared.state.write().await;
                    state.scenarios = store;
                    state.status.assigned_slots = assigned;
                    state.status.scenario_path = Some(path);
                    (Response::ScenariosLoaded { assigned }, false)
                } else {
                    (response, false)
                }
            }

            Request::Subscribe => (Response::Subscribed, true),
        }
    }

    fn queue(shared: &Shared, command: EngineCommand) -> Response {
        match shared.commands.send(command) {
            Ok(()) => Response::Accepted,
            Err(_) => Response::error("engine_unavailable", "keyboard hook is not running"),
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

/// Next pushed event, or never when not subscribed
async fn next_event(
    subscription: &mut Option<broadcast::Receiver<EngineEvent>>,
) -> Result<EngineEvent, RecvError> {
    match subscription {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// First few characters of a scenario for status lines
fn preview(text: &str) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(PREVIEW_CHARS).collect();
    if chars.next().is_some() {
        format!("{}...", head)
    } else {
        head
    }
}
