//! Discord gateway session.
//!
//! The gateway is only used for two things: learning when the bot is ready
//! (and who it is), and pushing presence updates. A single tokio task owns the
//! WebSocket and:
//!
//! 1. Connects to the gateway URL (TLS).
//! 2. On Hello (op 10), starts the heartbeat timer and sends Identify (op 2).
//! 3. On the READY dispatch, publishes [`GatewayStatus::Ready`].
//! 4. Forwards queued presence updates (op 3) and re-sends the last one after
//!    every READY, so a reconnect does not lose the status.
//! 5. Reconnects with exponential backoff on disconnect, server Reconnect
//!    (op 7), Invalid Session (op 9) or a missed heartbeat ACK.
//!
//! Close codes that mean the credential or intents are wrong end the task with
//! [`GatewayStatus::Failed`] instead of reconnecting.

use std::time::Duration;

use dx_core::display::Presence;
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, Interval};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use crate::error::CastError;

// Gateway opcodes.
const OP_DISPATCH: u64 = 0;
const OP_HEARTBEAT: u64 = 1;
const OP_IDENTIFY: u64 = 2;
const OP_PRESENCE_UPDATE: u64 = 3;
const OP_RECONNECT: u64 = 7;
const OP_INVALID_SESSION: u64 = 9;
const OP_HELLO: u64 = 10;
const OP_HEARTBEAT_ACK: u64 = 11;

/// Activity type "Watching".
const ACTIVITY_WATCHING: u64 = 3;

/// Authentication failed, invalid shard, sharding required, invalid API
/// version, invalid intents, disallowed intents.
const FATAL_CLOSE_CODES: [u16; 6] = [4004, 4010, 4011, 4012, 4013, 4014];

/// Identity of the connected bot user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub user_id: u64,
    pub username: String,
    pub session_id: String,
    /// Guilds announced in READY (may still be unavailable).
    pub guild_count: usize,
}

/// Connection state published to the scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayStatus {
    Connecting,
    Ready(SessionInfo),
    /// Unrecoverable (bad token, bad intents). The task has exited.
    Failed(String),
}

/// Gateway connection settings.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Full gateway URL including `v` and `encoding` query.
    pub url: String,
    pub token: String,
}

/// Cloneable sender for presence updates.
#[derive(Debug, Clone)]
pub struct GatewayHandle {
    outbound_tx: mpsc::Sender<String>,
}

impl GatewayHandle {
    /// Queue a presence update (activity "Watching <text>"). Never waits on a
    /// disconnected socket: a full queue is reported as an error.
    pub async fn update_presence(&self, text: &str, presence: Presence) -> Result<(), CastError> {
        self.outbound_tx
            .try_send(presence_payload(text, presence).to_string())
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => CastError::Gateway("presence queue is full".into()),
                mpsc::error::TrySendError::Closed(_) => CastError::Gateway("gateway session is not running".into()),
            })
    }
}

/// A gateway session managed by a background tokio task.
pub struct GatewaySession {
    config: GatewayConfig,
    status_tx: watch::Sender<GatewayStatus>,
    outbound_tx: mpsc::Sender<String>,
    outbound_rx: Option<mpsc::Receiver<String>>,
    shutdown_tx: Option<watch::Sender<bool>>,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl GatewaySession {
    /// Create a new (not yet started) session.
    pub fn new(config: GatewayConfig) -> Self {
        let (status_tx, _) = watch::channel(GatewayStatus::Connecting);
        let (outbound_tx, outbound_rx) = mpsc::channel(16);
        Self {
            config,
            status_tx,
            outbound_tx,
            outbound_rx: Some(outbound_rx),
            shutdown_tx: None,
            task: None,
        }
    }

    /// Receiver for connection state changes.
    pub fn status(&self) -> watch::Receiver<GatewayStatus> {
        self.status_tx.subscribe()
    }

    pub fn handle(&self) -> GatewayHandle {
        GatewayHandle {
            outbound_tx: self.outbound_tx.clone(),
        }
    }

    /// Start the connection task. Calling it twice is a no-op.
    pub fn start(&mut self) {
        let Some(outbound_rx) = self.outbound_rx.take() else {
            return;
        };
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let config = self.config.clone();
        let status_tx = self.status_tx.clone();

        let task = tokio::spawn(async move {
            connection_loop(config, status_tx, outbound_rx, shutdown_rx).await;
        });

        self.shutdown_tx = Some(shutdown_tx);
        self.task = Some(task);
    }

    /// Close the connection and wait for the task to finish.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(true);
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

/// Why one connection ended.
enum Disconnect {
    /// Reconnect after backoff.
    Retry,
    /// Stop the task.
    Exit,
}

/// Main loop: connect, run one session, back off, repeat.
async fn connection_loop(
    config: GatewayConfig,
    status_tx: watch::Sender<GatewayStatus>,
    mut outbound_rx: mpsc::Receiver<String>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut backoff = Duration::from_secs(1);
    let max_backoff = Duration::from_secs(60);
    let mut last_presence: Option<String> = None;

    loop {
        if *shutdown_rx.borrow() {
            info!("[gateway] shutdown requested");
            return;
        }

        info!("[gateway] connecting to {}", config.url);
        match tokio_tungstenite::connect_async(config.url.as_str()).await {
            Ok((ws, _)) => {
                let outcome = run_session(
                    ws,
                    &config,
                    &status_tx,
                    &mut outbound_rx,
                    &mut shutdown_rx,
                    &mut last_presence,
                    &mut backoff,
                )
                .await;
                if let Disconnect::Exit = outcome {
                    return;
                }
            }
            Err(e) => error!("[gateway] connection failed: {e}"),
        }

        if !matches!(*status_tx.borrow(), GatewayStatus::Connecting) {
            status_tx.send_replace(GatewayStatus::Connecting);
        }
        warn!("[gateway] disconnected, reconnecting in {backoff:?}");
        tokio::select! {
            _ = tokio::time::sleep(backoff) => {},
            _ = shutdown_rx.changed() => return,
        }
        backoff = (backoff * 2).min(max_backoff);
    }
}

type WsStream = tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Drive one connected session until it ends.
async fn run_session(
    ws: WsStream,
    config: &GatewayConfig,
    status_tx: &watch::Sender<GatewayStatus>,
    outbound_rx: &mut mpsc::Receiver<String>,
    shutdown_rx: &mut watch::Receiver<bool>,
    last_presence: &mut Option<String>,
    backoff: &mut Duration,
) -> Disconnect {
    let (mut ws_write, mut ws_read) = ws.split();
    let mut heartbeat: Option<Interval> = None;
    let mut seq: Option<u64> = None;
    let mut acked = true;

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                info!("[gateway] shutdown signal received");
                let _ = ws_write.close().await;
                return Disconnect::Exit;
            }

            msg = ws_read.next() => {
                let text = match msg {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Ping(data))) => {
                        let _ = ws_write.send(Message::Pong(data)).await;
                        continue;
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let (code, reason) = frame
                            .map(|f| (u16::from(f.code), f.reason.as_str().to_string()))
                            .unwrap_or((1000, String::new()));
                        if FATAL_CLOSE_CODES.contains(&code) {
                            error!("[gateway] closed with fatal code {code}: {reason}");
                            status_tx.send_replace(GatewayStatus::Failed(format!("close code {code}: {reason}")));
                            return Disconnect::Exit;
                        }
                        warn!("[gateway] closed with code {code}: {reason}");
                        return Disconnect::Retry;
                    }
                    Some(Err(e)) => {
                        error!("[gateway] read error: {e}");
                        return Disconnect::Retry;
                    }
                    None => {
                        warn!("[gateway] stream ended");
                        return Disconnect::Retry;
                    }
                    _ => continue,
                };

                let Some(frame) = parse_frame(&text) else {
                    debug!("[gateway] ignoring undecodable frame");
                    continue;
                };
                if frame.seq.is_some() {
                    seq = frame.seq;
                }

                match frame.op {
                    OP_HELLO => {
                        let period = frame
                            .data
                            .get("heartbeat_interval")
                            .and_then(|v| v.as_u64())
                            .map(Duration::from_millis)
                            .unwrap_or(Duration::from_secs(41));
                        let first = first_heartbeat_delay(period, rand::random::<f64>());
                        heartbeat = Some(tokio::time::interval_at(Instant::now() + first, period));
                        acked = true;
                        debug!("[gateway] hello, heartbeat every {period:?}");
                        let identify = identify_payload(&config.token).to_string();
                        if ws_write.send(Message::Text(identify.into())).await.is_err() {
                            return Disconnect::Retry;
                        }
                    }
                    OP_HEARTBEAT_ACK => acked = true,
                    OP_HEARTBEAT => {
                        let hb = heartbeat_payload(seq).to_string();
                        if ws_write.send(Message::Text(hb.into())).await.is_err() {
                            return Disconnect::Retry;
                        }
                    }
                    OP_DISPATCH if frame.event.as_deref() == Some("READY") => {
                        let Some(info) = parse_ready(&frame.data) else {
                            warn!("[gateway] READY without user id");
                            continue;
                        };
                        info!(
                            user_id = info.user_id,
                            username = %info.username,
                            guilds = info.guild_count,
                            "[gateway] ready"
                        );
                        *backoff = Duration::from_secs(1);
                        status_tx.send_replace(GatewayStatus::Ready(info));
                        if let Some(p) = last_presence.clone() {
                            let _ = ws_write.send(Message::Text(p.into())).await;
                        }
                    }
                    OP_RECONNECT => {
                        info!("[gateway] server requested reconnect");
                        return Disconnect::Retry;
                    }
                    OP_INVALID_SESSION => {
                        warn!("[gateway] invalid session");
                        return Disconnect::Retry;
                    }
                    _ => {}
                }
            }

            Some(payload) = outbound_rx.recv() => {
                *last_presence = Some(payload.clone());
                if let Err(e) = ws_write.send(Message::Text(payload.into())).await {
                    error!("[gateway] send error: {e}");
                    return Disconnect::Retry;
                }
            }

            _ = next_heartbeat(&mut heartbeat) => {
                if !acked {
                    warn!("[gateway] heartbeat not acknowledged, dropping connection");
                    return Disconnect::Retry;
                }
                acked = false;
                let hb = heartbeat_payload(seq).to_string();
                if let Err(e) = ws_write.send(Message::Text(hb.into())).await {
                    error!("[gateway] heartbeat send error: {e}");
                    return Disconnect::Retry;
                }
            }
        }
    }
}

/// The first heartbeat is due after `period * jitter`, `jitter` in `[0, 1]`.
fn first_heartbeat_delay(period: Duration, jitter: f64) -> Duration {
    period.mul_f64(jitter.clamp(0.0, 1.0))
}

/// Wait for the next heartbeat tick; forever until Hello arrives.
async fn next_heartbeat(heartbeat: &mut Option<Interval>) {
    match heartbeat {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

/// A decoded gateway frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub op: u64,
    pub data: Value,
    pub seq: Option<u64>,
    pub event: Option<String>,
}

pub fn parse_frame(text: &str) -> Option<Frame> {
    let v: Value = serde_json::from_str(text).ok()?;
    Some(Frame {
        op: v.get("op")?.as_u64()?,
        data: v.get("d").cloned().unwrap_or(Value::Null),
        seq: v.get("s").and_then(|s| s.as_u64()),
        event: v.get("t").and_then(|t| t.as_str()).map(str::to_string),
    })
}

/// Extract the session identity from a READY dispatch payload.
pub fn parse_ready(data: &Value) -> Option<SessionInfo> {
    Some(SessionInfo {
        user_id: crate::rest::parse_snowflake(data.pointer("/user/id"))?,
        username: data
            .pointer("/user/username")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string(),
        session_id: data.get("session_id").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
        guild_count: data.get("guilds").and_then(|v| v.as_array()).map_or(0, Vec::len),
    })
}

/// Identify with no privileged intents: the bot only writes.
pub fn identify_payload(token: &str) -> Value {
    json!({
        "op": OP_IDENTIFY,
        "d": {
            "token": token,
            "intents": 0,
            "properties": {
                "os": std::env::consts::OS,
                "browser": "dx",
                "device": "dx"
            }
        }
    })
}

pub fn heartbeat_payload(seq: Option<u64>) -> Value {
    json!({ "op": OP_HEARTBEAT, "d": seq })
}

pub fn presence_payload(text: &str, presence: Presence) -> Value {
    json!({
        "op": OP_PRESENCE_UPDATE,
        "d": {
            "since": null,
            "activities": [{ "name": text, "type": ACTIVITY_WATCHING }],
            "status": presence.as_str(),
            "afk": false
        }
    })
}
