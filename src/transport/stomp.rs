//! STOMP-over-WebSocket transport.
//!
//! One WebSocket/STOMP session per client, multiplexing every room
//! subscription. Handles:
//!
//! - Message routing to the correct room handlers by destination
//! - Pending outbound and pending subscription queues while disconnected
//! - Automatic reconnection with exponential backoff (bounded)
//! - Re-registration of room subscriptions after reconnect
//! - STOMP heart-beats in both directions
//!
//! The public [`StompTransport`] handle forwards commands to a background
//! task that owns the socket; the task is the only place connection state
//! lives, so no locking is needed around the stream.

use crate::{
    error::{Result, SouqLinkError},
    listeners::Shared,
    models::{
        connection_options::backoff_delay, ChatMessage, ConnectionOptions, DeliveryPayload,
        PublishPayload,
    },
    status::ConnectionStatus,
    stomp::{Command, Frame, HeartBeat, HeartbeatSchedule, HEARTBEAT_FRAME},
    timeouts::SouqLinkTimeouts,
    token::TokenStore,
    transport::ChatTransport,
};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, OnceCell};
use tokio::task::JoinHandle;
use tokio::time::Instant as TokioInstant;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{
        client::IntoClientRequest,
        error::Error as WsError,
        http::header::{HeaderValue, AUTHORIZATION},
        protocol::{frame::coding::CloseCode, Message},
    },
};
use url::Url;

type WsStream = tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<TcpStream>>;

/// Capacity of the command channel between the handle and the task.
const CMD_CHANNEL_CAPACITY: usize = 256;

/// A duration far enough in the future (~100 years) to act as "never" for
/// deadline calculations without overflowing `Instant::now() + dur`.
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 3600);

/// The incoming-heart-beat deadline is this multiple of the negotiated
/// interval, tolerating one missed beat before declaring the broker dead.
const LIVENESS_GRACE: u32 = 2;

/// Static configuration resolved once at build time.
pub(crate) struct TransportConfig {
    pub ws_url: String,
    pub host: String,
    pub options: ConnectionOptions,
    pub timeouts: SouqLinkTimeouts,
}

/// Derive the WebSocket endpoint and STOMP `host` header from a base URL.
pub(crate) fn resolve_ws_url(base_url: &str, ws_path: &str) -> Result<(String, String)> {
    let mut url = Url::parse(base_url.trim()).map_err(|e| {
        SouqLinkError::ConfigurationError(format!("Invalid base_url '{}': {}", base_url, e))
    })?;

    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(SouqLinkError::ConfigurationError(format!(
                "Unsupported base_url scheme '{}'; expected http(s) or ws(s)",
                other
            )));
        }
    };
    url.set_scheme(scheme).map_err(|_| {
        SouqLinkError::ConfigurationError("Failed to set WebSocket URL scheme".to_string())
    })?;

    let host = url
        .host_str()
        .ok_or_else(|| {
            SouqLinkError::ConfigurationError("base_url must include a host".to_string())
        })?
        .to_string();

    url.set_path(ws_path);
    url.set_query(None);
    url.set_fragment(None);
    Ok((url.to_string(), host))
}

fn subscription_id(room_id: &str) -> String {
    format!("sub-{}", room_id)
}

fn room_destination(config: &TransportConfig, room_id: &str) -> String {
    format!(
        "{}/{}",
        config.options.subscribe_prefix.trim_end_matches('/'),
        room_id
    )
}

/// Extract the room id from a room-scoped subscription destination.
fn room_from_destination<'a>(config: &TransportConfig, destination: &'a str) -> Option<&'a str> {
    let prefix = config.options.subscribe_prefix.trim_end_matches('/');
    destination
        .strip_prefix(prefix)
        .and_then(|rest| rest.strip_prefix('/'))
        .filter(|room| !room.is_empty())
}

// ── Commands ────────────────────────────────────────────────────────────────

/// Commands sent from the public handle to the background connection task.
enum Cmd {
    Connect {
        token_override: Option<String>,
        done: oneshot::Sender<Result<()>>,
    },
    Disconnect {
        done: oneshot::Sender<()>,
    },
    Subscribe {
        room_id: String,
    },
    Unsubscribe {
        room_id: String,
    },
    Publish {
        message: ChatMessage,
        done: oneshot::Sender<Result<()>>,
    },
}

// ── Public handle ───────────────────────────────────────────────────────────

/// The real chat transport: STOMP over WebSocket with bounded reconnection.
pub struct StompTransport {
    cmd_tx: mpsc::Sender<Cmd>,
    /// Taken by the background task on first use.
    cmd_rx: StdMutex<Option<mpsc::Receiver<Cmd>>>,
    task: OnceCell<JoinHandle<()>>,
    config: Arc<TransportConfig>,
    shared: Arc<Shared>,
    tokens: Arc<TokenStore>,
}

impl StompTransport {
    pub(crate) fn new(
        config: TransportConfig,
        shared: Arc<Shared>,
        tokens: Arc<TokenStore>,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(CMD_CHANNEL_CAPACITY);
        Self {
            cmd_tx,
            cmd_rx: StdMutex::new(Some(cmd_rx)),
            task: OnceCell::new(),
            config: Arc::new(config),
            shared,
            tokens,
        }
    }

    /// Spawn the background task on first use, so the client builder stays
    /// usable outside a tokio runtime. Commands issued before the first
    /// async call simply buffer in the channel.
    async fn ensure_task(&self) {
        self.task
            .get_or_init(|| async {
                let receiver = self.cmd_rx.lock().unwrap().take();
                match receiver {
                    Some(cmd_rx) => {
                        let ctx = TaskCtx {
                            config: self.config.clone(),
                            shared: self.shared.clone(),
                            tokens: self.tokens.clone(),
                            rooms: HashSet::new(),
                            outbound: VecDeque::new(),
                            connect_waiters: Vec::new(),
                        };
                        tokio::spawn(connection_task(cmd_rx, ctx))
                    }
                    None => tokio::spawn(async {}),
                }
            })
            .await;
    }

    async fn send_cmd(&self, cmd: Cmd) -> Result<()> {
        self.ensure_task().await;
        self.cmd_tx.send(cmd).await.map_err(|_| {
            SouqLinkError::TransportError("Connection task is not running".to_string())
        })
    }
}

#[async_trait]
impl ChatTransport for StompTransport {
    async fn connect(&self, token_override: Option<String>) -> Result<()> {
        let (done_tx, done_rx) = oneshot::channel();
        self.send_cmd(Cmd::Connect {
            token_override,
            done: done_tx,
        })
        .await?;
        done_rx.await.map_err(|_| {
            SouqLinkError::TransportError(
                "Connection task died before completing connect".to_string(),
            )
        })?
    }

    async fn disconnect(&self) -> Result<()> {
        let (done_tx, done_rx) = oneshot::channel();
        self.send_cmd(Cmd::Disconnect { done: done_tx }).await?;
        done_rx.await.map_err(|_| {
            SouqLinkError::TransportError(
                "Connection task died before completing disconnect".to_string(),
            )
        })?;
        Ok(())
    }

    async fn ensure_subscribed(&self, room_id: &str) -> Result<()> {
        self.send_cmd(Cmd::Subscribe {
            room_id: room_id.to_string(),
        })
        .await
    }

    fn release_subscription(&self, room_id: &str) {
        let cmd = Cmd::Unsubscribe {
            room_id: room_id.to_string(),
        };
        if self.cmd_tx.try_send(cmd).is_err() {
            log::warn!(
                "[souq-link] Dropping unsubscribe for '{}': command channel unavailable",
                room_id
            );
        }
    }

    async fn publish(&self, message: ChatMessage) -> Result<()> {
        let (done_tx, done_rx) = oneshot::channel();
        self.send_cmd(Cmd::Publish {
            message,
            done: done_tx,
        })
        .await?;
        done_rx.await.map_err(|_| {
            SouqLinkError::TransportError(
                "Connection task died before completing publish".to_string(),
            )
        })?
    }

    fn status(&self) -> ConnectionStatus {
        self.shared.status.current()
    }
}

// ── Background connection task ──────────────────────────────────────────────

struct TaskCtx {
    config: Arc<TransportConfig>,
    shared: Arc<Shared>,
    tokens: Arc<TokenStore>,
    /// Rooms that need a broker-level subscription: active ones while
    /// connected, pending ones while not.
    rooms: HashSet<String>,
    /// Messages accepted while disconnected, drained FIFO on connect.
    outbound: VecDeque<ChatMessage>,
    /// `connect()` calls that arrived during a reconnect cycle.
    connect_waiters: Vec<oneshot::Sender<Result<()>>>,
}

impl TaskCtx {
    fn flush_waiters(&mut self, result: &Result<()>) {
        for waiter in self.connect_waiters.drain(..) {
            let _ = waiter.send(result.clone());
        }
    }

    /// Discard queued sends, loudly: the host sees one error naming the
    /// dropped count instead of a silent loss.
    fn drop_queued(&mut self, why: &str) {
        if self.outbound.is_empty() {
            return;
        }
        let dropped = self.outbound.len();
        self.outbound.clear();
        log::warn!("[souq-link] Dropping {} queued message(s): {}", dropped, why);
        self.shared.errors.emit(&SouqLinkError::TransportError(format!(
            "Dropped {} queued message(s): {}",
            dropped, why
        )));
    }
}

/// Record an unexpected connection loss and decide what happens next:
/// reconnect with backoff, or park in the `error` state when automatic
/// reconnection is disabled.
fn note_connection_lost(ctx: &mut TaskCtx, reconnecting: &mut bool, reason: &str) {
    log::warn!("[souq-link] Connection lost: {}", reason);
    ctx.shared
        .errors
        .emit(&SouqLinkError::TransportError(reason.to_string()));

    let retries_allowed = ctx.config.options.auto_reconnect
        && ctx.config.options.max_reconnect_attempts.map_or(true, |max| max > 0);
    if retries_allowed {
        ctx.shared.status.set(ConnectionStatus::Reconnecting);
        *reconnecting = true;
    } else {
        ctx.drop_queued("connection lost and automatic reconnection is disabled");
        ctx.shared.status.set(ConnectionStatus::Error);
        *reconnecting = false;
    }
}

fn next_send_deadline(schedule: &HeartbeatSchedule) -> TokioInstant {
    TokioInstant::now() + schedule.outgoing.unwrap_or(FAR_FUTURE)
}

fn next_live_deadline(schedule: &HeartbeatSchedule) -> TokioInstant {
    TokioInstant::now()
        + schedule
            .incoming
            .map(|interval| interval * LIVENESS_GRACE)
            .unwrap_or(FAR_FUTURE)
}

async fn connection_task(mut cmd_rx: mpsc::Receiver<Cmd>, mut ctx: TaskCtx) {
    let mut link: Option<WsStream> = None;
    let mut schedule = HeartbeatSchedule::default();
    let mut reconnecting = false;
    let mut attempts: u32 = 0;
    let mut send_deadline = TokioInstant::now() + FAR_FUTURE;
    let mut live_deadline = TokioInstant::now() + FAR_FUTURE;

    loop {
        if let Some(ref mut ws) = link {
            // ── Connected ───────────────────────────────────────────────
            let send_sleep = tokio::time::sleep_until(send_deadline);
            tokio::pin!(send_sleep);
            let live_sleep = tokio::time::sleep_until(live_deadline);
            tokio::pin!(live_sleep);

            tokio::select! {
                biased;

                _ = &mut live_sleep, if schedule.incoming.is_some() => {
                    link = None;
                    note_connection_lost(
                        &mut ctx,
                        &mut reconnecting,
                        "Heart-beat timeout: broker unresponsive",
                    );
                    continue;
                }

                cmd = cmd_rx.recv() => match cmd {
                    Some(Cmd::Connect { token_override, done }) => {
                        // Already connected: no-op, but remember the token
                        // for future reconnects.
                        if let Some(token) = token_override {
                            ctx.tokens.cache_token(token);
                        }
                        let _ = done.send(Ok(()));
                    }
                    Some(Cmd::Subscribe { room_id }) => {
                        if ctx.rooms.insert(room_id.clone()) {
                            let frame = Frame::subscribe(
                                &subscription_id(&room_id),
                                &room_destination(&ctx.config, &room_id),
                            );
                            match ws.send(Message::Text(frame.encode().into())).await {
                                Ok(()) => send_deadline = next_send_deadline(&schedule),
                                Err(e) => {
                                    link = None;
                                    note_connection_lost(
                                        &mut ctx,
                                        &mut reconnecting,
                                        &format!("Failed to send SUBSCRIBE: {}", e),
                                    );
                                    continue;
                                }
                            }
                        }
                    }
                    Some(Cmd::Unsubscribe { room_id }) => {
                        if ctx.rooms.remove(&room_id) {
                            let frame = Frame::unsubscribe(&subscription_id(&room_id));
                            match ws.send(Message::Text(frame.encode().into())).await {
                                Ok(()) => send_deadline = next_send_deadline(&schedule),
                                Err(e) => {
                                    link = None;
                                    note_connection_lost(
                                        &mut ctx,
                                        &mut reconnecting,
                                        &format!("Failed to send UNSUBSCRIBE: {}", e),
                                    );
                                    continue;
                                }
                            }
                        }
                    }
                    Some(Cmd::Publish { message, done }) => {
                        match publish_now(ws, &ctx.config, &message).await {
                            Ok(()) => {
                                send_deadline = next_send_deadline(&schedule);
                                let _ = done.send(Ok(()));
                            }
                            Err(e) => {
                                ctx.shared.errors.emit(&e);
                                let _ = done.send(Err(e.clone()));
                                link = None;
                                note_connection_lost(
                                    &mut ctx,
                                    &mut reconnecting,
                                    &format!("Session dropped mid-send: {}", e),
                                );
                                continue;
                            }
                        }
                    }
                    Some(Cmd::Disconnect { done }) => {
                        let teardown = async {
                            for room in &ctx.rooms {
                                let frame = Frame::unsubscribe(&subscription_id(room));
                                let _ = ws.send(Message::Text(frame.encode().into())).await;
                            }
                            let _ = ws.send(Message::Text(Frame::disconnect().encode().into())).await;
                            let _ = ws.close(None).await;
                        };
                        let _ = tokio::time::timeout(ctx.config.timeouts.disconnect_timeout, teardown).await;
                        ctx.rooms.clear();
                        ctx.outbound.clear();
                        link = None;
                        ctx.shared.status.set(ConnectionStatus::Disconnected);
                        let _ = done.send(());
                        continue;
                    }
                    None => {
                        // Every client handle is gone; close quietly.
                        let _ = ws.close(None).await;
                        return;
                    }
                },

                _ = &mut send_sleep, if schedule.outgoing.is_some() => {
                    match ws.send(Message::Text(HEARTBEAT_FRAME.into())).await {
                        Ok(()) => send_deadline = next_send_deadline(&schedule),
                        Err(e) => {
                            link = None;
                            note_connection_lost(
                                &mut ctx,
                                &mut reconnecting,
                                &format!("Heart-beat send failed: {}", e),
                            );
                            continue;
                        }
                    }
                }

                frame = ws.next() => {
                    live_deadline = next_live_deadline(&schedule);
                    match frame {
                        Some(Ok(Message::Text(text))) => {
                            handle_frame_text(&ctx, &text);
                        }
                        Some(Ok(Message::Binary(data))) => {
                            match std::str::from_utf8(&data) {
                                Ok(text) => handle_frame_text(&ctx, text),
                                Err(_) => {
                                    ctx.shared.errors.emit(&SouqLinkError::ParseError(
                                        "Binary frame is not valid UTF-8".to_string(),
                                    ));
                                }
                            }
                        }
                        Some(Ok(Message::Ping(payload))) => {
                            let _ = ws.send(Message::Pong(payload)).await;
                        }
                        Some(Ok(Message::Pong(_))) => {}
                        Some(Ok(Message::Frame(_))) => {}
                        Some(Ok(Message::Close(frame))) => {
                            link = None;
                            match frame {
                                // A normal close is a clean broker-side
                                // shutdown, not a failure: no reconnect.
                                Some(ref f) if f.code == CloseCode::Normal => {
                                    log::info!(
                                        "[souq-link] Broker closed the session cleanly: {}",
                                        f.reason
                                    );
                                    ctx.shared.status.set(ConnectionStatus::Disconnected);
                                }
                                Some(f) => {
                                    note_connection_lost(
                                        &mut ctx,
                                        &mut reconnecting,
                                        &format!("Broker closed the connection: {}", f.reason),
                                    );
                                }
                                None => {
                                    note_connection_lost(
                                        &mut ctx,
                                        &mut reconnecting,
                                        "Broker closed the connection",
                                    );
                                }
                            }
                            continue;
                        }
                        Some(Err(e)) => {
                            link = None;
                            note_connection_lost(
                                &mut ctx,
                                &mut reconnecting,
                                &format!("WebSocket error: {}", e),
                            );
                            continue;
                        }
                        None => {
                            link = None;
                            note_connection_lost(
                                &mut ctx,
                                &mut reconnecting,
                                "WebSocket stream ended",
                            );
                            continue;
                        }
                    }
                }
            }
        } else if reconnecting {
            // ── Reconnecting with exponential backoff ───────────────────
            attempts += 1;
            if let Some(max) = ctx.config.options.max_reconnect_attempts {
                if attempts > max {
                    log::warn!(
                        "[souq-link] Giving up after {} reconnect attempt(s)",
                        max
                    );
                    let err = SouqLinkError::TransportError(format!(
                        "Reconnect failed after {} attempt(s)",
                        max
                    ));
                    ctx.shared.errors.emit(&err);
                    ctx.drop_queued("reconnect budget exhausted");
                    ctx.shared.status.set(ConnectionStatus::Error);
                    ctx.flush_waiters(&Err(err));
                    reconnecting = false;
                    attempts = 0;
                    continue;
                }
            }

            let delay = backoff_delay(&ctx.config.options, attempts);
            log::info!(
                "[souq-link] Reconnect attempt {} in {:?}",
                attempts,
                delay
            );
            ctx.shared.status.set(ConnectionStatus::Reconnecting);

            // Serve commands while waiting out the backoff delay.
            let sleep_fut = tokio::time::sleep(delay);
            tokio::pin!(sleep_fut);
            let mut aborted = false;
            loop {
                tokio::select! {
                    biased;
                    cmd = cmd_rx.recv() => match cmd {
                        Some(Cmd::Connect { token_override, done }) => {
                            if let Some(token) = token_override {
                                ctx.tokens.cache_token(token);
                            }
                            ctx.connect_waiters.push(done);
                        }
                        Some(Cmd::Subscribe { room_id }) => {
                            ctx.rooms.insert(room_id);
                        }
                        Some(Cmd::Unsubscribe { room_id }) => {
                            ctx.rooms.remove(&room_id);
                        }
                        Some(Cmd::Publish { message, done }) => {
                            ctx.outbound.push_back(message);
                            let _ = done.send(Ok(()));
                        }
                        Some(Cmd::Disconnect { done }) => {
                            ctx.rooms.clear();
                            ctx.outbound.clear();
                            ctx.flush_waiters(&Err(SouqLinkError::TransportError(
                                "Disconnected while reconnecting".to_string(),
                            )));
                            ctx.shared.status.set(ConnectionStatus::Disconnected);
                            let _ = done.send(());
                            aborted = true;
                            break;
                        }
                        None => return,
                    },
                    _ = &mut sleep_fut => break,
                }
            }
            if aborted {
                reconnecting = false;
                attempts = 0;
                continue;
            }

            ctx.shared.status.set(ConnectionStatus::Connecting);
            match establish(&ctx.config, ctx.tokens.resolve()).await {
                Ok((mut ws, negotiated)) => {
                    log::info!("[souq-link] Reconnected after {} attempt(s)", attempts);
                    attempts = 0;
                    reconnecting = false;
                    ctx.shared.status.set(ConnectionStatus::Connected);
                    let flush = after_connect(&mut ws, &mut ctx).await;
                    schedule = negotiated;
                    send_deadline = next_send_deadline(&schedule);
                    live_deadline = next_live_deadline(&schedule);
                    link = Some(ws);
                    ctx.flush_waiters(&Ok(()));
                    if let Err(e) = flush {
                        link = None;
                        note_connection_lost(&mut ctx, &mut reconnecting, &e.to_string());
                    }
                }
                Err(e) if e.is_authentication() => {
                    log::warn!("[souq-link] Reconnect rejected as unauthorized: {}", e);
                    ctx.tokens.clear_cache();
                    ctx.shared.errors.emit(&e);
                    ctx.drop_queued("session rejected as unauthorized");
                    ctx.shared.status.set(ConnectionStatus::Error);
                    ctx.flush_waiters(&Err(e));
                    reconnecting = false;
                    attempts = 0;
                }
                Err(e) => {
                    log::warn!(
                        "[souq-link] Reconnect attempt {} failed: {}",
                        attempts,
                        e
                    );
                    ctx.shared.errors.emit(&e);
                }
            }
        } else {
            // ── Idle: disconnected or parked in the error state ─────────
            match cmd_rx.recv().await {
                Some(Cmd::Connect { token_override, done }) => {
                    if let Some(token) = token_override {
                        ctx.tokens.cache_token(token);
                    }
                    ctx.shared.status.set(ConnectionStatus::Connecting);
                    match establish(&ctx.config, ctx.tokens.resolve()).await {
                        Ok((mut ws, negotiated)) => {
                            attempts = 0;
                            ctx.shared.status.set(ConnectionStatus::Connected);
                            let flush = after_connect(&mut ws, &mut ctx).await;
                            schedule = negotiated;
                            send_deadline = next_send_deadline(&schedule);
                            live_deadline = next_live_deadline(&schedule);
                            link = Some(ws);
                            let _ = done.send(Ok(()));
                            if let Err(e) = flush {
                                link = None;
                                note_connection_lost(&mut ctx, &mut reconnecting, &e.to_string());
                            }
                        }
                        Err(e) => {
                            // A caller-initiated handshake failure is not
                            // retried automatically; the caller may retry.
                            if e.is_authentication() {
                                ctx.tokens.clear_cache();
                            }
                            ctx.shared.errors.emit(&e);
                            ctx.shared.status.set(ConnectionStatus::Error);
                            let _ = done.send(Err(e));
                        }
                    }
                }
                Some(Cmd::Subscribe { room_id }) => {
                    ctx.rooms.insert(room_id);
                }
                Some(Cmd::Unsubscribe { room_id }) => {
                    ctx.rooms.remove(&room_id);
                }
                Some(Cmd::Publish { message, done }) => {
                    // Fire-and-forget: queued until the next successful
                    // connect.
                    ctx.outbound.push_back(message);
                    let _ = done.send(Ok(()));
                }
                Some(Cmd::Disconnect { done }) => {
                    ctx.rooms.clear();
                    ctx.outbound.clear();
                    ctx.shared.status.set(ConnectionStatus::Disconnected);
                    let _ = done.send(());
                }
                None => return,
            }
        }
    }
}

/// Open the WebSocket, perform the STOMP handshake, and negotiate
/// heart-beats.
async fn establish(
    config: &TransportConfig,
    token: Option<String>,
) -> Result<(WsStream, HeartbeatSchedule)> {
    log::debug!(
        "[souq-link] Establishing WebSocket connection to {}",
        config.ws_url
    );

    let mut request = config.ws_url.as_str().into_client_request().map_err(|e| {
        SouqLinkError::TransportError(format!("Failed to build WebSocket request: {}", e))
    })?;
    if let Some(ref token) = token {
        let value = format!("Bearer {}", token);
        let header = HeaderValue::from_str(&value).map_err(|e| {
            SouqLinkError::ConfigurationError(format!(
                "Invalid bearer token for Authorization header: {}",
                e
            ))
        })?;
        request.headers_mut().insert(AUTHORIZATION, header);
    }

    let connection_timeout = config.timeouts.connection_timeout;
    let connect_result = if SouqLinkTimeouts::is_no_timeout(connection_timeout) {
        Ok(connect_async(request).await)
    } else {
        tokio::time::timeout(connection_timeout, connect_async(request)).await
    };

    let mut ws = match connect_result {
        Ok(Ok((stream, _response))) => stream,
        Ok(Err(WsError::Http(response))) => {
            let status = response.status();
            return Err(match status.as_u16() {
                401 | 403 => SouqLinkError::AuthenticationError(format!(
                    "WebSocket upgrade rejected ({}): invalid or missing credentials",
                    status
                )),
                code => SouqLinkError::TransportError(format!("WebSocket HTTP error: {}", code)),
            });
        }
        Ok(Err(e)) => {
            return Err(SouqLinkError::TransportError(format!(
                "Connection failed: {}",
                e
            )));
        }
        Err(_) => {
            return Err(SouqLinkError::TimeoutError(format!(
                "Connection timeout ({:?})",
                connection_timeout
            )));
        }
    };

    let client_beat = HeartBeat::new(
        config.options.heartbeat_send_ms,
        config.options.heartbeat_expect_ms,
    );
    let connect_frame = Frame::connect(&config.host, &client_beat, token.as_deref());
    ws.send(Message::Text(connect_frame.encode().into()))
        .await
        .map_err(|e| {
            SouqLinkError::TransportError(format!("Failed to send CONNECT frame: {}", e))
        })?;

    let server_beat = await_connected(&mut ws, config.timeouts.handshake_timeout).await?;
    let schedule = HeartBeat::negotiate(client_beat, server_beat);
    log::info!(
        "[souq-link] STOMP session established (outgoing heart-beat {:?}, incoming {:?})",
        schedule.outgoing,
        schedule.incoming
    );
    Ok((ws, schedule))
}

/// Wait for CONNECTED or ERROR, tolerating heart-beats and transport frames
/// the broker may interleave during the handshake.
async fn await_connected(ws: &mut WsStream, handshake_timeout: Duration) -> Result<HeartBeat> {
    let deadline = TokioInstant::now() + handshake_timeout;
    loop {
        let remaining = deadline.saturating_duration_since(TokioInstant::now());
        if remaining.is_zero() {
            return Err(SouqLinkError::TimeoutError(format!(
                "Handshake timeout ({:?})",
                handshake_timeout
            )));
        }

        match tokio::time::timeout(remaining, ws.next()).await {
            Ok(Some(Ok(Message::Text(text)))) => match Frame::parse(&text)? {
                Some(frame) if frame.command == Command::Connected => {
                    let beat = frame
                        .header_value("heart-beat")
                        .map(HeartBeat::parse)
                        .transpose()?
                        .unwrap_or(HeartBeat::DISABLED);
                    return Ok(beat);
                }
                Some(frame) if frame.command == Command::Error => {
                    let detail = frame
                        .header_value("message")
                        .unwrap_or_else(|| frame.body.trim())
                        .to_string();
                    return Err(classify_handshake_error(&detail));
                }
                Some(other) => {
                    log::debug!(
                        "[souq-link] Ignoring {} frame during handshake",
                        other.command
                    );
                }
                None => {}
            },
            Ok(Some(Ok(Message::Ping(payload)))) => {
                let _ = ws.send(Message::Pong(payload)).await;
            }
            Ok(Some(Ok(_))) => continue,
            Ok(Some(Err(e))) => {
                return Err(SouqLinkError::TransportError(format!(
                    "WebSocket error during handshake: {}",
                    e
                )));
            }
            Ok(None) => {
                return Err(SouqLinkError::TransportError(
                    "Connection closed during handshake".to_string(),
                ));
            }
            Err(_) => {
                return Err(SouqLinkError::TimeoutError(format!(
                    "Handshake timeout ({:?})",
                    handshake_timeout
                )));
            }
        }
    }
}

/// An ERROR frame that rejects the handshake is an authentication failure
/// when the broker says so; anything else is a transport-level rejection.
fn classify_handshake_error(detail: &str) -> SouqLinkError {
    let lowered = detail.to_ascii_lowercase();
    let auth_markers = ["auth", "unauthorized", "forbidden", "credential", "token"];
    if auth_markers.iter().any(|marker| lowered.contains(marker)) {
        SouqLinkError::AuthenticationError(format!("Broker rejected the session: {}", detail))
    } else {
        SouqLinkError::TransportError(format!("Broker rejected the session: {}", detail))
    }
}

/// Post-handshake bring-up: drain the pending outbound queue FIFO, then
/// register a broker-level subscription for every room that still has at
/// least one handler.
async fn after_connect(ws: &mut WsStream, ctx: &mut TaskCtx) -> Result<()> {
    let queued = ctx.outbound.len();
    if queued > 0 {
        log::info!("[souq-link] Flushing {} queued message(s)", queued);
    }
    let mut failed = 0usize;
    while let Some(message) = ctx.outbound.pop_front() {
        // Each queued message is attempted exactly once.
        if let Err(e) = publish_now(ws, &ctx.config, &message).await {
            failed += 1;
            ctx.shared.errors.emit(&e);
        }
    }
    if failed > 0 {
        return Err(SouqLinkError::TransportError(format!(
            "{} queued message(s) failed to publish after connect",
            failed
        )));
    }

    let shared = ctx.shared.clone();
    for room in shared.handlers.rooms() {
        ctx.rooms.insert(room);
    }
    ctx.rooms.retain(|room| shared.handlers.has_room(room));
    if !ctx.rooms.is_empty() {
        log::info!(
            "[souq-link] Registering {} room subscription(s)",
            ctx.rooms.len()
        );
    }
    for room in &ctx.rooms {
        let frame = Frame::subscribe(&subscription_id(room), &room_destination(&ctx.config, room));
        ws.send(Message::Text(frame.encode().into()))
            .await
            .map_err(|e| {
                SouqLinkError::TransportError(format!(
                    "Failed to register subscription for '{}': {}",
                    room, e
                ))
            })?;
    }
    Ok(())
}

async fn publish_now(
    ws: &mut WsStream,
    config: &TransportConfig,
    message: &ChatMessage,
) -> Result<()> {
    let payload = PublishPayload::from_message(message);
    let body = serde_json::to_string(&payload).map_err(|e| {
        SouqLinkError::PublishError(format!("Failed to serialize message: {}", e))
    })?;
    let frame = Frame::send(&config.options.publish_destination, &body);
    ws.send(Message::Text(frame.encode().into()))
        .await
        .map_err(|e| SouqLinkError::PublishError(format!("Failed to publish message: {}", e)))
}

/// Handle one inbound text payload on an established session.
fn handle_frame_text(ctx: &TaskCtx, text: &str) {
    match Frame::parse(text) {
        Ok(Some(frame)) => match frame.command {
            Command::Message => dispatch_message(ctx, &frame),
            Command::Error => {
                let detail = frame
                    .header_value("message")
                    .unwrap_or_else(|| frame.body.trim());
                log::warn!("[souq-link] Broker error frame: {}", detail);
                ctx.shared
                    .errors
                    .emit(&SouqLinkError::TransportError(format!(
                        "Broker error: {}",
                        detail
                    )));
            }
            Command::Receipt => {
                log::debug!(
                    "[souq-link] Receipt {}",
                    frame.header_value("receipt-id").unwrap_or("-")
                );
            }
            other => {
                log::debug!("[souq-link] Ignoring unexpected {} frame", other);
            }
        },
        Ok(None) => {} // heart-beat
        Err(e) => {
            log::warn!("[souq-link] Failed to parse inbound frame: {}", e);
            ctx.shared.errors.emit(&e);
        }
    }
}

/// Route a MESSAGE frame to the handlers of its room. The handler set is
/// looked up at delivery time, so frames straggling in after the last
/// unsubscribe are dropped.
fn dispatch_message(ctx: &TaskCtx, frame: &Frame) {
    let room_id = match room_from_frame(ctx, frame) {
        Some(room_id) => room_id,
        None => {
            ctx.shared.errors.emit(&SouqLinkError::ParseError(
                "MESSAGE frame without a recognizable room destination".to_string(),
            ));
            return;
        }
    };

    match serde_json::from_str::<DeliveryPayload>(&frame.body) {
        Ok(payload) => {
            let message = payload.into_message();
            let delivered = ctx.shared.handlers.dispatch(&room_id, message);
            if delivered == 0 {
                log::debug!(
                    "[souq-link] Dropping frame for room '{}' with no handlers",
                    room_id
                );
            }
        }
        Err(e) => {
            ctx.shared.errors.emit(&SouqLinkError::ParseError(format!(
                "Malformed chat message body: {}",
                e
            )));
        }
    }
}

fn room_from_frame(ctx: &TaskCtx, frame: &Frame) -> Option<String> {
    if let Some(destination) = frame.header_value("destination") {
        if let Some(room) = room_from_destination(&ctx.config, destination) {
            return Some(room.to_string());
        }
    }
    frame
        .header_value("subscription")
        .and_then(|sub| sub.strip_prefix("sub-"))
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_prefix(prefix: &str) -> TransportConfig {
        TransportConfig {
            ws_url: "ws://localhost/ws/chat".to_string(),
            host: "localhost".to_string(),
            options: ConnectionOptions::default().with_subscribe_prefix(prefix),
            timeouts: SouqLinkTimeouts::default(),
        }
    }

    #[test]
    fn test_resolve_ws_url_schemes() {
        let (url, host) = resolve_ws_url("https://chat.souq.example", "/ws/chat").unwrap();
        assert_eq!(url, "wss://chat.souq.example/ws/chat");
        assert_eq!(host, "chat.souq.example");

        let (url, _) = resolve_ws_url("http://localhost:8080", "/ws/chat").unwrap();
        assert_eq!(url, "ws://localhost:8080/ws/chat");

        let (url, _) = resolve_ws_url("ws://localhost:8080/ignored?x=1", "/ws/chat").unwrap();
        assert_eq!(url, "ws://localhost:8080/ws/chat");
    }

    #[test]
    fn test_resolve_ws_url_rejects_bad_input() {
        assert!(resolve_ws_url("ftp://example.com", "/ws/chat").is_err());
        assert!(resolve_ws_url("not a url", "/ws/chat").is_err());
    }

    #[test]
    fn test_room_destination_round_trip() {
        let config = config_with_prefix("/sub/chat/room");
        let destination = room_destination(&config, "room-1");
        assert_eq!(destination, "/sub/chat/room/room-1");
        assert_eq!(room_from_destination(&config, &destination), Some("room-1"));
        assert_eq!(room_from_destination(&config, "/other/path"), None);
        assert_eq!(room_from_destination(&config, "/sub/chat/room/"), None);
    }

    #[test]
    fn test_subscription_id_shape() {
        assert_eq!(subscription_id("room-1"), "sub-room-1");
    }

    #[test]
    fn test_classify_handshake_error() {
        assert!(classify_handshake_error("Unauthorized: bad credentials").is_authentication());
        assert!(classify_handshake_error("Invalid token").is_authentication());
        assert!(!classify_handshake_error("Broker shutting down").is_authentication());
    }
}
