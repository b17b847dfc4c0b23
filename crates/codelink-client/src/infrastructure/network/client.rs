//! WebSocket session with a companion.
//!
//! [`ConnectionClient`] owns at most one transport at a time and drives the
//! connection state machine:
//!
//! ```text
//! connect(target) ─> Connecting ─(ConnectionAccepted | "hello")─> Connected
//!                        │                                          │
//!                        └──── transport error / rejection ─────────┴─> Failed(reason)
//! ```
//!
//! # Sessions and generations
//!
//! Every `connect()` and `disconnect()` bumps a generation counter.  A session
//! task only changes state while its generation is still current, so a task
//! that is being retired can never overwrite the state of its successor.
//! Inbound messages carry the generation too, so consumers can drop frames that
//! were already in flight from a retired session.
//!
//! # Task layout
//!
//! One spawned session task per transport: it opens the WebSocket (bounded by
//! `connect_timeout`), sends the greeting, then `select!`s between inbound
//! frames and the outbound queue.  `send()` and the heartbeat never touch the
//! socket directly; they push onto the outbound queue and the session task
//! writes.  `disconnect()` aborts the task, which drops the socket, so it never
//! waits on the network.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use codelink_core::protocol::messages::{ConnectionRequest, LEGACY_HELLO};
use codelink_core::protocol::is_legacy_acknowledgement;
use codelink_core::{
    decode_message, encode_message, ConnectionInfo, ConnectionState, ProtocolError, WireMessage,
};
use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use super::heartbeat::HeartbeatTimer;
use crate::domain::{ConnectionConfig, HandshakeMode};

/// Capacity of the inbound message channel handed out by [`ConnectionClient::new`].
///
/// A frame decoded while the channel is full is dropped with a warning; the
/// session never waits for the consumer.
pub const INBOUND_CAPACITY: usize = 128;

const OUTBOUND_CAPACITY: usize = 64;

/// Errors returned directly to callers of [`ConnectionClient`].
///
/// Transport failures are not returned here; they end the session and show up
/// as [`ConnectionState::Failed`].
#[derive(Debug, Error)]
pub enum ClientError {
    /// The target is not a usable `ws://` or `wss://` URL.
    #[error("invalid address '{target}': {reason}")]
    InvalidAddress { target: String, reason: String },

    /// `send` was called outside the `Connected` state.
    #[error("not connected")]
    NotConnected,

    /// The message could not be encoded.
    #[error("encode error: {0}")]
    Encode(#[from] ProtocolError),
}

/// A decoded message received on a session.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    /// Generation of the session that received the frame.
    pub generation: u64,
    pub message: WireMessage,
}

/// Owns a single WebSocket session with a companion.
pub struct ConnectionClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    config: ConnectionConfig,
    session: Mutex<Session>,
    state: watch::Sender<ConnectionState>,
    inbound: mpsc::Sender<InboundMessage>,
}

#[derive(Default)]
struct Session {
    generation: u64,
    target: Option<String>,
    task: Option<JoinHandle<()>>,
    outbound: Option<mpsc::Sender<Message>>,
    heartbeat: Option<HeartbeatTimer>,
    info: Option<ConnectionInfo>,
    heartbeat_starts: u64,
}

impl ConnectionClient {
    /// Creates a disconnected client and the receiver for its inbound
    /// messages.
    pub fn new(config: ConnectionConfig) -> (Self, mpsc::Receiver<InboundMessage>) {
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CAPACITY);
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let client = Self {
            inner: Arc::new(ClientInner {
                config,
                session: Mutex::new(Session::default()),
                state,
                inbound: inbound_tx,
            }),
        };
        (client, inbound_rx)
    }

    /// Opens a new session to `target` (e.g. `ws://192.168.1.20:9090`).
    ///
    /// Any existing session is retired first: its task is aborted and awaited,
    /// which closes its socket, before the new one is spawned.  Returns as soon
    /// as the new session task is running; the outcome of the attempt is
    /// reported through the state (`Connected` or `Failed`).
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InvalidAddress`] if `target` is not a valid
    /// WebSocket URL.  The current session is left untouched in that case.
    pub async fn connect(&self, target: &str) -> Result<(), ClientError> {
        let request = validate_target(target)?;

        let (generation, previous) = {
            let mut session = self.inner.lock_session();
            session.generation += 1;
            let previous = self.inner.retire(&mut session);
            self.inner.set_state(&mut session, ConnectionState::Connecting);
            (session.generation, previous)
        };

        if let Some(task) = previous {
            task.abort();
            // Resolves once the old task has been dropped along with its socket.
            let _ = task.await;
            debug!("previous session retired");
        }

        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let mut session = self.inner.lock_session();
        if session.generation != generation {
            debug!("connect to {target} superseded before it started");
            return Ok(());
        }
        session.target = Some(target.to_string());
        session.outbound = Some(outbound_tx);
        info!("session {generation}: connecting to {target}");
        let inner = Arc::clone(&self.inner);
        session.task = Some(tokio::spawn(run_session(
            inner,
            generation,
            request,
            outbound_rx,
        )));
        Ok(())
    }

    /// Closes the current session and returns to `Disconnected`.
    ///
    /// Stops the heartbeat, drops the transport, and clears the connection
    /// identity.  Never blocks; queued sends are discarded.  Calling it while
    /// already disconnected does nothing.
    pub fn disconnect(&self) {
        let mut session = self.inner.lock_session();
        let idle = *self.inner.state.borrow() == ConnectionState::Disconnected;
        if idle && session.task.is_none() {
            return;
        }

        session.generation += 1;
        if let Some(task) = self.inner.retire(&mut session) {
            task.abort();
        }
        session.target = None;
        self.inner.set_state(&mut session, ConnectionState::Disconnected);
        info!("disconnected");
    }

    /// Encodes `message` and queues it as one text frame.
    ///
    /// A write failure on the socket ends the session with `Failed`.
    ///
    /// # Errors
    ///
    /// - [`ClientError::NotConnected`] unless the state is `Connected`.
    /// - [`ClientError::Encode`] if the message cannot be encoded.
    pub async fn send(&self, message: &WireMessage) -> Result<(), ClientError> {
        let outbound = {
            let session = self.inner.lock_session();
            if !self.inner.state.borrow().is_connected() {
                return Err(ClientError::NotConnected);
            }
            session.outbound.clone().ok_or(ClientError::NotConnected)?
        };

        let text = encode_message(message)?;
        outbound
            .send(Message::Text(text))
            .await
            .map_err(|_| ClientError::NotConnected)
    }

    /// Moves a `Connected` or `Failed` client into `Reconnecting`.
    ///
    /// For use by an external retry policy just before it calls `connect`
    /// again.  Ignored in any other state.
    pub fn mark_reconnecting(&self) {
        let mut session = self.inner.lock_session();
        let current = self.inner.state.borrow().clone();
        match current {
            ConnectionState::Connected | ConnectionState::Failed(_) => {
                self.inner
                    .set_state(&mut session, ConnectionState::Reconnecting);
            }
            other => debug!("mark_reconnecting ignored in state {other}"),
        }
    }

    /// Current state snapshot.
    pub fn state(&self) -> ConnectionState {
        self.inner.state.borrow().clone()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Identity received in `ConnectionAccepted`, if the current session has
    /// one.  Legacy handshakes never do.
    pub fn connection_info(&self) -> Option<ConnectionInfo> {
        self.inner.lock_session().info.clone()
    }

    /// The target of the current session.
    pub fn target(&self) -> Option<String> {
        self.inner.lock_session().target.clone()
    }

    /// Generation of the current session; compare with
    /// [`InboundMessage::generation`].
    pub fn generation(&self) -> u64 {
        self.inner.lock_session().generation
    }

    /// Current generation and state, read together.  The state always
    /// belongs to the returned generation.
    pub fn session_state(&self) -> (u64, ConnectionState) {
        let session = self.inner.lock_session();
        (session.generation, self.inner.state.borrow().clone())
    }

    pub fn heartbeat_active(&self) -> bool {
        self.inner.lock_session().heartbeat.is_some()
    }
}

impl Drop for ConnectionClient {
    fn drop(&mut self) {
        let mut session = self.inner.lock_session();
        session.generation += 1;
        if let Some(task) = self.inner.retire(&mut session) {
            task.abort();
        }
    }
}

impl ClientInner {
    fn lock_session(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Detaches everything belonging to the current transport and returns its
    /// task for the caller to abort.
    fn retire(&self, session: &mut Session) -> Option<JoinHandle<()>> {
        if let Some(timer) = session.heartbeat.take() {
            timer.stop();
        }
        session.outbound = None;
        session.info = None;
        session.task.take()
    }

    /// Publishes `next` and keeps the heartbeat bound to `Connected`.
    fn set_state(&self, session: &mut Session, next: ConnectionState) {
        if next.is_connected() {
            if session.heartbeat.is_none() {
                if let Some(outbound) = session.outbound.clone() {
                    session.heartbeat = Some(HeartbeatTimer::start(
                        self.config.heartbeat_interval(),
                        outbound,
                    ));
                    session.heartbeat_starts += 1;
                    debug!("heartbeat started");
                }
            }
        } else if let Some(timer) = session.heartbeat.take() {
            timer.stop();
            debug!("heartbeat stopped");
        }

        self.state.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }

    /// Promotes a `Connecting` session to `Connected`.  Returns `false` if the
    /// session is stale or not waiting for an acknowledgement.
    fn accept(&self, generation: u64, info: Option<ConnectionInfo>) -> bool {
        let mut session = self.lock_session();
        if session.generation != generation
            || *self.state.borrow() != ConnectionState::Connecting
        {
            return false;
        }
        match &info {
            Some(info) => info!(
                "session {generation}: connected to {} {} ({}), connection id {}",
                info.server.name, info.server.version, info.server.platform, info.connection_id
            ),
            None => info!("session {generation}: connected (legacy handshake)"),
        }
        session.info = info;
        self.set_state(&mut session, ConnectionState::Connected);
        true
    }

    /// Ends a session with `Failed(reason)` unless it has been superseded.
    fn fail(&self, generation: u64, reason: String) {
        let mut session = self.lock_session();
        if session.generation != generation {
            return;
        }
        warn!("session {generation}: {reason}");
        session.outbound = None;
        session.info = None;
        session.task = None;
        self.set_state(&mut session, ConnectionState::Failed(reason));
    }

    /// Handles one text frame.  Returns a frame to write back, if any.
    ///
    /// Never waits on the inbound consumer: when its queue is full the
    /// message is dropped, so reads, writes and the heartbeat keep flowing.
    fn handle_text(&self, generation: u64, text: &str) -> Result<Option<Message>, String> {
        let message = match decode_message(text) {
            Ok(message) => message,
            Err(_) if is_legacy_acknowledgement(text) => {
                if !self.accept(generation, None) {
                    debug!("session {generation}: ignoring plain-text greeting");
                }
                return Ok(None);
            }
            Err(e) => {
                warn!("session {generation}: dropping frame: {e}");
                return Ok(None);
            }
        };

        debug!("session {generation}: received {}", message.message_type());
        let outcome = match &message {
            WireMessage::ConnectionAccepted(accepted) => {
                self.accept(generation, Some(ConnectionInfo::from(accepted.clone())));
                Ok(None)
            }
            WireMessage::ConnectionRejected(rejected) => {
                Err(format!("rejected by companion: {}", rejected.reason))
            }
            WireMessage::Ping => encode_message(&WireMessage::Pong)
                .map(|pong| Some(Message::Text(pong)))
                .map_err(|e| e.to_string()),
            _ => Ok(None),
        };

        match self.inbound.try_send(InboundMessage {
            generation,
            message,
        }) {
            Ok(()) => {}
            Err(TrySendError::Full(dropped)) => warn!(
                "session {generation}: inbound queue full; dropping {}",
                dropped.message.message_type()
            ),
            Err(TrySendError::Closed(_)) => {
                debug!("session {generation}: inbound receiver dropped");
            }
        }
        outcome
    }
}

fn validate_target(target: &str) -> Result<Request, ClientError> {
    let invalid = |reason: String| ClientError::InvalidAddress {
        target: target.to_string(),
        reason,
    };

    let request = target
        .into_client_request()
        .map_err(|e| invalid(e.to_string()))?;
    match request.uri().scheme_str() {
        Some("ws") | Some("wss") => {}
        Some(other) => return Err(invalid(format!("unsupported scheme '{other}'"))),
        None => return Err(invalid("missing ws:// scheme".to_string())),
    }
    if request.uri().host().map_or(true, str::is_empty) {
        return Err(invalid("missing host".to_string()));
    }
    Ok(request)
}

async fn run_session(
    inner: Arc<ClientInner>,
    generation: u64,
    request: Request,
    outbound: mpsc::Receiver<Message>,
) {
    if let Err(reason) = drive_session(&inner, generation, request, outbound).await {
        inner.fail(generation, reason);
    }
}

/// Runs one transport until it fails or the outbound queue is closed.
async fn drive_session(
    inner: &ClientInner,
    generation: u64,
    request: Request,
    mut outbound: mpsc::Receiver<Message>,
) -> Result<(), String> {
    let connect_timeout = inner.config.connect_timeout();
    let (stream, _response) = timeout(connect_timeout, connect_async(request))
        .await
        .map_err(|_| format!("timed out after {connect_timeout:?} opening connection"))?
        .map_err(|e| format!("connection failed: {e}"))?;
    debug!("session {generation}: transport open");

    let (mut ws_tx, mut ws_rx) = stream.split();

    let greeting = match inner.config.handshake {
        HandshakeMode::Structured => encode_message(&WireMessage::ConnectionRequest(
            ConnectionRequest {
                device_name: inner.config.device_name.clone(),
            },
        ))
        .map_err(|e| e.to_string())?,
        HandshakeMode::Legacy => LEGACY_HELLO.to_string(),
    };
    ws_tx
        .send(Message::Text(greeting))
        .await
        .map_err(|e| format!("handshake send failed: {e}"))?;

    loop {
        tokio::select! {
            frame = ws_rx.next() => {
                let frame = match frame {
                    Some(Ok(frame)) => frame,
                    Some(Err(e)) => return Err(format!("receive failed: {e}")),
                    None => return Err("connection closed by companion".to_string()),
                };
                match frame {
                    Message::Text(text) => {
                        if let Some(reply) = inner.handle_text(generation, &text)? {
                            ws_tx
                                .send(reply)
                                .await
                                .map_err(|e| format!("send failed: {e}"))?;
                        }
                    }
                    Message::Close(close) => {
                        return Err(match close {
                            Some(close) if !close.reason.is_empty() => {
                                format!("connection closed by companion: {}", close.reason)
                            }
                            _ => "connection closed by companion".to_string(),
                        });
                    }
                    Message::Binary(data) => {
                        debug!("session {generation}: ignoring binary frame ({} bytes)", data.len());
                    }
                    // Protocol-level ping/pong is answered by tungstenite.
                    Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
                }
            }
            queued = outbound.recv() => {
                let Some(frame) = queued else {
                    let _ = ws_tx.close().await;
                    return Ok(());
                };
                ws_tx
                    .send(frame)
                    .await
                    .map_err(|e| format!("send failed: {e}"))?;
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
