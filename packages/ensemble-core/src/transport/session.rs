//! Persistent WebSocket session to the media server.
//!
//! The session owns the socket, the connection state machine and the table
//! of in-flight commands. A writer task drains an outgoing queue into the
//! socket; a reader task resolves responses by `message_id` and fans
//! server-pushed events out over a broadcast channel.
//!
//! Individual commands are never retried here. Callers wrap them in a
//! [`RetryPolicy`](crate::retry::RetryPolicy) when they need to. A dropped
//! connection moves the session to `Disconnected`; reconnecting is the
//! caller's decision.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use super::{CommandTransport, ConnectionState};
use crate::auth::{AuthStrategy, Credentials};
use crate::error::{EnsembleError, EnsembleResult};
use crate::events::EventEmitter;
use crate::protocol::{CommandMessage, ServerInfo, ServerMessage};
use crate::protocol_constants::{CMD_AUTH, SERVER_EVENT_CHANNEL_CAPACITY};
use crate::runtime::{TaskSpawner, TokioSpawner};
use crate::utils::{normalize_server_url, ws_url};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type PendingMap = DashMap<String, oneshot::Sender<EnsembleResult<Value>>>;

/// Timeouts applied by the session.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Deadline for the socket handshake and the server greeting.
    pub connect_timeout: Duration,
    /// Deadline for each command response.
    pub request_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(10),
        }
    }
}

/// Strategy and credentials used to authenticate a connection.
#[derive(Clone)]
pub struct SessionAuth {
    pub strategy: Arc<dyn AuthStrategy>,
    pub credentials: Credentials,
}

/// Server-initiated event.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerEvent {
    pub event: String,
    pub object_id: Option<String>,
    pub data: Value,
}

struct ActiveConnection {
    generation: u64,
    outgoing: mpsc::UnboundedSender<Message>,
    cancel: CancellationToken,
}

/// State shared between the session handle and its socket tasks.
struct SessionShared {
    state_tx: watch::Sender<ConnectionState>,
    events_tx: broadcast::Sender<ServerEvent>,
    pending: PendingMap,
    connection: Mutex<Option<ActiveConnection>>,
    server_info: RwLock<Option<ServerInfo>>,
    server_url: RwLock<Option<String>>,
    next_generation: AtomicU64,
    emitter: Arc<dyn EventEmitter>,
}

impl SessionShared {
    fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    fn set_state(&self, next: ConnectionState) {
        let current = self.state();
        if current == next {
            return;
        }
        if !current.can_transition_to(next) {
            log::warn!(
                "[Transport] Ignoring illegal transition {:?} -> {:?}",
                current,
                next
            );
            return;
        }

        log::info!("[Transport] {:?} -> {:?}", current, next);
        self.state_tx.send_replace(next);
        self.emitter.emit_connection(next);
    }

    /// Moves a handshake forward, failing if the connection dropped first.
    fn advance(&self, next: ConnectionState) -> EnsembleResult<()> {
        self.set_state(next);
        let reached = self.state();
        if reached == next {
            Ok(())
        } else {
            Err(EnsembleError::Transport(format!(
                "connection dropped before {:?} (now {:?})",
                next, reached
            )))
        }
    }

    fn fail_pending(&self, reason: &str) {
        let ids: Vec<String> = self.pending.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            if let Some((_, tx)) = self.pending.remove(&id) {
                let _ = tx.send(Err(EnsembleError::Transport(reason.to_string())));
            }
        }
    }

    fn resolve(&self, message_id: &str, result: EnsembleResult<Value>) {
        match self.pending.remove(message_id) {
            Some((_, tx)) => {
                let _ = tx.send(result);
            }
            None => log::debug!("[Transport] Response for unknown message {}", message_id),
        }
    }

    fn handle_text(&self, text: &str) {
        match ServerMessage::parse(text) {
            Ok(ServerMessage::Result { message_id, result }) => {
                self.resolve(&message_id, Ok(result));
            }
            Ok(ServerMessage::Error {
                message_id: Some(message_id),
                code,
                details,
            }) => {
                self.resolve(&message_id, Err(EnsembleError::from_server(code, details)));
            }
            Ok(ServerMessage::Error {
                message_id: None,
                code,
                details,
            }) => {
                log::warn!("[Transport] Server error {}: {}", code, details);
            }
            Ok(ServerMessage::Event {
                event,
                object_id,
                data,
            }) => {
                log::trace!("[Transport] Event {} ({:?})", event, object_id);
                let event = ServerEvent {
                    event,
                    object_id,
                    data,
                };
                if self.events_tx.send(event).is_err() {
                    log::trace!("[Transport] No event subscribers");
                }
            }
            Ok(ServerMessage::ServerInfo(info)) => {
                *self.server_info.write() = Some(info);
            }
            Err(e) => log::warn!("[Transport] Dropping unparseable message: {}", e),
        }
    }

    /// Tears down the connection if `generation` is still the active one.
    fn connection_lost(&self, generation: u64, reason: &str) {
        let lost = {
            let mut guard = self.connection.lock();
            if guard.as_ref().is_some_and(|c| c.generation == generation) {
                guard.take()
            } else {
                None
            }
        };

        if let Some(conn) = lost {
            conn.cancel.cancel();
            log::warn!("[Transport] Connection lost: {}", reason);
            self.fail_pending(reason);
            self.set_state(ConnectionState::Disconnected);
        }
    }

    /// Sends a command on the active connection without checking state.
    async fn dispatch(
        &self,
        command: &str,
        args: Value,
        timeout: Duration,
    ) -> EnsembleResult<Value> {
        let message = CommandMessage::new(command, args);
        let text = serde_json::to_string(&message)?;
        let outgoing = self
            .connection
            .lock()
            .as_ref()
            .map(|c| c.outgoing.clone())
            .ok_or(EnsembleError::NotConnected)?;

        let (tx, rx) = oneshot::channel();
        self.pending.insert(message.message_id.clone(), tx);

        if outgoing.send(Message::text(text)).is_err() {
            self.pending.remove(&message.message_id);
            return Err(EnsembleError::Transport("connection writer closed".into()));
        }
        log::debug!("[Transport] -> {} ({})", command, message.message_id);

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(EnsembleError::Transport(
                "connection closed before response".into(),
            )),
            Err(_) => {
                self.pending.remove(&message.message_id);
                Err(EnsembleError::Timeout(format!(
                    "{} got no response within {:?}",
                    command, timeout
                )))
            }
        }
    }
}

/// Persistent session to the media server.
///
/// One instance exists per running app. Commands are accepted only in
/// `Authenticated` or `Connected`; anywhere else they fail with
/// `NotConnected` instead of being queued.
///
/// The socket reader and writer run on `S`, which defaults to the ambient
/// Tokio runtime.
pub struct TransportSession<S = TokioSpawner> {
    shared: Arc<SessionShared>,
    config: TransportConfig,
    spawner: S,
    /// Serializes connect/disconnect.
    lifecycle_lock: tokio::sync::Mutex<()>,
}

impl<S: TaskSpawner> TransportSession<S> {
    /// Creates a disconnected session.
    pub fn new(config: TransportConfig, emitter: Arc<dyn EventEmitter>, spawner: S) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (events_tx, _) = broadcast::channel(SERVER_EVENT_CHANNEL_CAPACITY);

        Self {
            shared: Arc::new(SessionShared {
                state_tx,
                events_tx,
                pending: DashMap::new(),
                connection: Mutex::new(None),
                server_info: RwLock::new(None),
                server_url: RwLock::new(None),
                next_generation: AtomicU64::new(0),
                emitter,
            }),
            config,
            spawner,
            lifecycle_lock: tokio::sync::Mutex::new(()),
        }
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    /// Watches state transitions. `Connected` is the ready signal.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    /// Subscribes to server-pushed events.
    pub fn subscribe_events(&self) -> broadcast::Receiver<ServerEvent> {
        self.shared.events_tx.subscribe()
    }

    /// Greeting received on the current (or last) connection.
    #[must_use]
    pub fn server_info(&self) -> Option<ServerInfo> {
        self.shared.server_info.read().clone()
    }

    /// Server URL of the current (or last) connection attempt.
    #[must_use]
    pub fn server_url(&self) -> Option<String> {
        self.shared.server_url.read().clone()
    }

    /// Connects to `server_url`, authenticating if the server asks for it.
    ///
    /// Any existing connection is closed first. On failure the session ends
    /// in `Error` and the error is returned; no reconnect is attempted.
    ///
    /// # Errors
    /// - `InvalidRequest` for a malformed URL or header
    /// - `Transport`/`Timeout` if the socket or greeting fails
    /// - `Auth` if the server requires auth and rejects (or lacks) a token
    pub async fn connect(&self, server_url: &str, auth: Option<&SessionAuth>) -> EnsembleResult<()> {
        let _guard = self.lifecycle_lock.lock().await;
        let server_url = normalize_server_url(server_url)?;

        if self.close_connection("reconnecting") {
            self.shared.set_state(ConnectionState::Disconnected);
        }
        *self.shared.server_url.write() = Some(server_url.clone());
        self.shared.set_state(ConnectionState::Connecting);

        match self.establish(&server_url, auth).await {
            Ok(()) => Ok(()),
            Err(e) => {
                log::error!("[Transport] Connection to {} failed: {}", server_url, e);
                self.close_connection("connection failed");
                self.shared.set_state(ConnectionState::Error);
                Err(e)
            }
        }
    }

    /// Closes the connection and moves to `Disconnected`.
    pub async fn disconnect(&self) {
        let _guard = self.lifecycle_lock.lock().await;
        if self.close_connection("disconnected") {
            log::info!("[Transport] Disconnected");
        }
        self.shared.set_state(ConnectionState::Disconnected);
    }

    async fn establish(&self, server_url: &str, auth: Option<&SessionAuth>) -> EnsembleResult<()> {
        let request = build_request(server_url, auth)?;
        let timeout = self.config.connect_timeout;

        let (ws, _) = tokio::time::timeout(timeout, tokio_tungstenite::connect_async(request))
            .await
            .map_err(|_| EnsembleError::Timeout(format!("handshake exceeded {:?}", timeout)))??;
        let (sink, mut stream) = ws.split();

        let info = tokio::time::timeout(timeout, read_server_info(&mut stream))
            .await
            .map_err(|_| EnsembleError::Timeout(format!("no server greeting within {:?}", timeout)))??;
        log::info!(
            "[Transport] Connected to server {} (version {}, auth required: {})",
            info.server_id,
            info.server_version,
            info.requires_auth
        );
        let requires_auth = info.requires_auth;
        *self.shared.server_info.write() = Some(info);

        let generation = self.shared.next_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let cancel = CancellationToken::new();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        *self.shared.connection.lock() = Some(ActiveConnection {
            generation,
            outgoing: out_tx,
            cancel: cancel.clone(),
        });

        self.spawner.spawn(write_loop(
            Arc::clone(&self.shared),
            sink,
            out_rx,
            generation,
            cancel.clone(),
        ));
        self.spawner.spawn(read_loop(
            Arc::clone(&self.shared),
            stream,
            generation,
            cancel,
        ));

        if requires_auth {
            self.shared.advance(ConnectionState::Authenticating)?;
            self.authenticate(auth).await?;
            self.shared.advance(ConnectionState::Authenticated)?;
        }
        self.shared.advance(ConnectionState::Connected)
    }

    async fn authenticate(&self, auth: Option<&SessionAuth>) -> EnsembleResult<()> {
        let token = auth
            .and_then(|a| a.credentials.token())
            .ok_or_else(|| {
                EnsembleError::Auth("server requires authentication but no token is available".into())
            })?;

        match self
            .shared
            .dispatch(CMD_AUTH, json!({ "token": token }), self.config.request_timeout)
            .await
        {
            Ok(_) => Ok(()),
            Err(EnsembleError::Server { details, .. }) => Err(EnsembleError::Auth(details)),
            Err(e) => Err(e),
        }
    }

    /// Drops the active connection, failing in-flight commands.
    ///
    /// Returns true if there was a connection to close.
    fn close_connection(&self, reason: &str) -> bool {
        let conn = self.shared.connection.lock().take();
        match conn {
            Some(conn) => {
                conn.cancel.cancel();
                self.shared.fail_pending(reason);
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl<S: TaskSpawner + 'static> CommandTransport for TransportSession<S> {
    async fn send(&self, command: &str, args: Value) -> EnsembleResult<Value> {
        if !self.state().accepts_commands() {
            return Err(EnsembleError::NotConnected);
        }
        self.shared
            .dispatch(command, args, self.config.request_timeout)
            .await
    }
}

fn build_request(server_url: &str, auth: Option<&SessionAuth>) -> EnsembleResult<Request> {
    let mut request = ws_url(server_url)?.into_client_request()?;

    if let Some(auth) = auth {
        for (name, value) in auth.strategy.transport_headers(&auth.credentials) {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| EnsembleError::InvalidRequest(format!("header name {}: {}", name, e)))?;
            let value = HeaderValue::from_str(&value)
                .map_err(|e| EnsembleError::InvalidRequest(format!("header value: {}", e)))?;
            request.headers_mut().insert(name, value);
        }
    }
    Ok(request)
}

/// Reads frames until the server greeting arrives.
async fn read_server_info(stream: &mut SplitStream<WsStream>) -> EnsembleResult<ServerInfo> {
    while let Some(frame) = stream.next().await {
        match frame? {
            Message::Text(text) => {
                return match ServerMessage::parse(text.as_str())? {
                    ServerMessage::ServerInfo(info) => Ok(info),
                    other => Err(EnsembleError::Protocol(format!(
                        "expected server info, got {:?}",
                        other
                    ))),
                };
            }
            Message::Close(frame) => {
                return Err(EnsembleError::Transport(format!(
                    "closed during handshake: {:?}",
                    frame
                )));
            }
            _ => {}
        }
    }
    Err(EnsembleError::Transport("stream ended during handshake".into()))
}

async fn write_loop(
    shared: Arc<SessionShared>,
    mut sink: SplitSink<WsStream, Message>,
    mut outgoing: mpsc::UnboundedReceiver<Message>,
    generation: u64,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = sink.send(Message::Close(None)).await;
                break;
            }
            message = outgoing.recv() => match message {
                Some(message) => {
                    if let Err(e) = sink.send(message).await {
                        shared.connection_lost(generation, &format!("write failed: {}", e));
                        break;
                    }
                }
                None => break,
            }
        }
    }
}

async fn read_loop(
    shared: Arc<SessionShared>,
    mut stream: SplitStream<WsStream>,
    generation: u64,
    cancel: CancellationToken,
) {
    let reason = loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => shared.handle_text(text.as_str()),
                Some(Ok(Message::Close(frame))) => break format!("closed by server: {:?}", frame),
                Some(Ok(_)) => {}
                Some(Err(e)) => break format!("read error: {}", e),
                None => break "stream ended".to_string(),
            }
        }
    };
    shared.connection_lost(generation, &reason);
}
