//! Messaging-gateway client: one WebSocket session with identify,
//! heartbeat, and dispatch, wrapped in a reconnect loop. Inbound chat
//! messages are handed to the bot through a channel; everything else
//! (voice presence, voice handshakes, text replies) is served off the
//! cloneable [`GatewayHandle`].

use std::sync::{Arc, RwLock};
use std::time::Duration;

use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use rand::Rng;
use serde_json::json;
use tokio::sync::oneshot;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::common::types::{AnyResult, ChannelId, GuildId, UserId};
use crate::config::GatewayConfig;
use crate::gateway::events::{self, Envelope, op};
use crate::gateway::roster::Roster;
use crate::voice::VoiceError;

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

const MAX_RECONNECT_ATTEMPTS: u32 = 5;
const BACKOFF_BASE_MS: u64 = 1_000;
/// Timeout allowed for the write task to flush on shutdown.
const WRITE_TASK_SHUTDOWN_MS: u64 = 500;

/// Everything a voice transport needs to dial in for one guild.
#[derive(Debug, Clone)]
pub struct VoiceGrant {
    pub guild: GuildId,
    pub user_id: UserId,
    pub session_id: String,
    pub endpoint: String,
    pub token: String,
}

/// What the supervisor should do after one WS session ends.
enum SessionOutcome {
    Reconnect,
    Shutdown,
}

/// Close codes that end the session for good (clean close, bad token).
fn is_fatal_close(code: u16) -> bool {
    matches!(code, 1000 | 4004)
}

pub struct Client;

impl Client {
    /// Connects, authenticates, and starts the session tasks. Returns
    /// the handle plus the stream of inbound chat messages. Fails fast
    /// on an unreachable gateway or a rejected token, so startup errors
    /// never turn into a silent retry loop.
    pub async fn connect(
        cfg: &GatewayConfig,
        token: &str,
    ) -> AnyResult<(GatewayHandle, flume::Receiver<events::MessageCreate>)> {
        let (ws, ready, heartbeat_interval) = handshake(&cfg.endpoint, token).await?;

        let (outbound_tx, outbound_rx) = flume::unbounded::<Message>();
        let (event_tx, event_rx) = flume::unbounded::<events::MessageCreate>();

        let handle = GatewayHandle {
            inner: Arc::new(HandleInner {
                user_id: ready.user.id,
                session_id: RwLock::new(ready.session_id),
                outbound: outbound_tx,
                roster: Roster::default(),
                channel_guilds: DashMap::new(),
                pending_voice: DashMap::new(),
                cancel: CancellationToken::new(),
            }),
        };

        tokio::spawn(supervise(
            cfg.endpoint.clone(),
            token.to_string(),
            handle.clone(),
            ws,
            heartbeat_interval,
            outbound_rx,
            event_tx,
        ));

        Ok((handle, event_rx))
    }
}

#[derive(Clone)]
pub struct GatewayHandle {
    inner: Arc<HandleInner>,
}

struct HandleInner {
    user_id: UserId,
    /// Reassigned on every re-identify.
    session_id: RwLock<String>,
    outbound: flume::Sender<Message>,
    roster: Roster,
    channel_guilds: DashMap<ChannelId, GuildId>,
    pending_voice: DashMap<GuildId, oneshot::Sender<events::VoiceServerUpdate>>,
    cancel: CancellationToken,
}

impl GatewayHandle {
    pub fn user_id(&self) -> UserId {
        self.inner.user_id
    }

    pub fn session_id(&self) -> String {
        self.inner
            .session_id
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn roster(&self) -> &Roster {
        &self.inner.roster
    }

    pub fn guild_of(&self, channel: ChannelId) -> Option<GuildId> {
        self.inner.channel_guilds.get(&channel).map(|e| *e.value())
    }

    /// Best-effort text reply into a channel.
    pub fn send_message(&self, channel: ChannelId, content: &str) {
        self.send_op(
            op::MESSAGE_SEND,
            json!({ "channel_id": channel, "content": content }),
        );
    }

    /// Requests a voice connection for `channel` and waits for the
    /// server to answer with a dialing grant. The caller bounds the
    /// wait; a gateway teardown resolves it as a connect failure.
    pub async fn join_voice(
        &self,
        guild: GuildId,
        channel: ChannelId,
    ) -> Result<VoiceGrant, VoiceError> {
        let (tx, rx) = oneshot::channel();
        // A stale pending entry for this guild (abandoned timeout) is
        // simply replaced.
        self.inner.pending_voice.insert(guild, tx);
        self.send_op(
            op::VOICE_STATE,
            json!({ "guild_id": guild, "channel_id": channel }),
        );

        match rx.await {
            Ok(update) => Ok(VoiceGrant {
                guild,
                user_id: self.inner.user_id,
                session_id: self.session_id(),
                endpoint: update.endpoint,
                token: update.token,
            }),
            Err(_) => Err(VoiceError::Connect(
                "gateway dropped the voice handshake".into(),
            )),
        }
    }

    /// Announces leaving the guild's voice channel.
    pub fn leave_voice(&self, guild: GuildId) {
        self.send_op(
            op::VOICE_STATE,
            json!({ "guild_id": guild, "channel_id": null }),
        );
    }

    /// Orderly shutdown: flush a close frame, then stop every task.
    pub async fn disconnect(&self) {
        let _ = self.inner.outbound.send(Message::Close(None));
        tokio::time::sleep(Duration::from_millis(WRITE_TASK_SHUTDOWN_MS)).await;
        self.inner.cancel.cancel();
    }

    fn send_op(&self, op: u8, d: serde_json::Value) {
        let envelope = Envelope::new(op, d);
        match serde_json::to_string(&envelope) {
            Ok(text) => {
                if self.inner.outbound.send(Message::Text(text.into())).is_err() {
                    warn!(op, "gateway outbound queue closed, message dropped");
                }
            }
            Err(e) => error!(op, error = %e, "failed to encode gateway message"),
        }
    }
}

/// Connect + Hello + Identify + Ready.
async fn handshake(endpoint: &str, token: &str) -> AnyResult<(WsStream, events::Ready, u64)> {
    debug!(endpoint, "connecting to gateway");
    let (mut ws, _) = tokio_tungstenite::connect_async(endpoint).await?;

    let hello = expect(&mut ws, op::HELLO, None).await?;
    let hello: events::Hello = serde_json::from_value(hello.d)?;

    let identify = Envelope::new(op::IDENTIFY, json!({ "token": token }));
    ws.send(Message::Text(serde_json::to_string(&identify)?.into()))
        .await?;

    let ready = expect(&mut ws, op::DISPATCH, Some(events::event::READY)).await?;
    let ready: events::Ready = serde_json::from_value(ready.d)?;

    Ok((ws, ready, hello.heartbeat_interval))
}

/// Reads until the wanted envelope arrives. A close or end-of-stream
/// here is a handshake failure (this is how a rejected token surfaces).
async fn expect(ws: &mut WsStream, want_op: u8, want_event: Option<&str>) -> AnyResult<Envelope> {
    while let Some(msg) = ws.next().await {
        match msg? {
            Message::Text(text) => {
                let envelope: Envelope = serde_json::from_str(&text)?;
                if envelope.op == want_op
                    && (want_event.is_none() || envelope.t.as_deref() == want_event)
                {
                    return Ok(envelope);
                }
                debug!(op = envelope.op, "skipping pre-handshake message");
            }
            Message::Close(frame) => {
                return Err(format!("gateway closed during handshake: {frame:?}").into());
            }
            _ => {}
        }
    }
    Err("gateway stream ended during handshake".into())
}

/// Owns the session lifecycle: runs one session, reconnects with
/// exponential backoff when it drops, stops on shutdown.
async fn supervise(
    endpoint: String,
    token: String,
    handle: GatewayHandle,
    first: WsStream,
    first_heartbeat: u64,
    outbound: flume::Receiver<Message>,
    events_tx: flume::Sender<events::MessageCreate>,
) {
    let mut next = Some((first, first_heartbeat));
    let mut attempt: u32 = 0;

    loop {
        let (ws, heartbeat_interval) = match next.take() {
            Some(pair) => pair,
            None => match handshake(&endpoint, &token).await {
                Ok((ws, ready, heartbeat_interval)) => {
                    *handle
                        .inner
                        .session_id
                        .write()
                        .unwrap_or_else(|e| e.into_inner()) = ready.session_id;
                    info!("gateway session re-established");
                    (ws, heartbeat_interval)
                }
                Err(e) => {
                    attempt += 1;
                    if attempt > MAX_RECONNECT_ATTEMPTS {
                        error!(error = %e, "gateway reconnect failed, giving up");
                        break;
                    }
                    let backoff =
                        Duration::from_millis(BACKOFF_BASE_MS * 2u64.pow((attempt - 1).min(3)));
                    warn!(error = %e, attempt, ?backoff, "gateway reconnect failed, retrying");
                    tokio::time::sleep(backoff).await;
                    continue;
                }
            },
        };
        attempt = 0;

        match run_session(&handle, ws, heartbeat_interval, &outbound, &events_tx).await {
            SessionOutcome::Shutdown => break,
            SessionOutcome::Reconnect => warn!("gateway session lost, reconnecting"),
        }
    }

    handle.inner.cancel.cancel();
    debug!("gateway supervisor stopped");
}

async fn run_session(
    handle: &GatewayHandle,
    ws: WsStream,
    heartbeat_interval: u64,
    outbound: &flume::Receiver<Message>,
    events_tx: &flume::Sender<events::MessageCreate>,
) -> SessionOutcome {
    let (mut write, mut read) = ws.split();
    let session_token = handle.inner.cancel.child_token();

    // Write task: drains the shared outbound queue onto this session's
    // socket. Exits on cancel, queue teardown, or after a close frame.
    let write_token = session_token.clone();
    let write_rx = outbound.clone();
    let write_task = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = write_token.cancelled() => break,
                msg = write_rx.recv_async() => {
                    let Ok(msg) = msg else { break };
                    let is_close = matches!(msg, Message::Close(_));
                    if let Err(e) = write.send(msg).await {
                        warn!("gateway write error (normal during reconnect): {e}");
                        break;
                    }
                    if is_close {
                        break;
                    }
                }
            }
        }
    });

    // Heartbeat task. The first beat is jittered so restarted fleets
    // don't align their cadence.
    let heartbeat_token = session_token.clone();
    let heartbeat_tx = handle.inner.outbound.clone();
    let heartbeat_task = tokio::spawn(async move {
        let interval = Duration::from_millis(heartbeat_interval);
        let jitter = interval.mul_f64(rand::thread_rng().gen_range(0.0..1.0));
        tokio::select! {
            _ = heartbeat_token.cancelled() => return,
            _ = tokio::time::sleep(jitter) => {}
        }
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = heartbeat_token.cancelled() => break,
                _ = ticker.tick() => {
                    let envelope = Envelope::new(op::HEARTBEAT, serde_json::Value::Null);
                    let Ok(text) = serde_json::to_string(&envelope) else { break };
                    if heartbeat_tx.send(Message::Text(text.into())).is_err() {
                        break;
                    }
                }
            }
        }
    });

    let outcome = loop {
        tokio::select! {
            _ = session_token.cancelled() => break SessionOutcome::Shutdown,
            msg = read.next() => {
                let msg = match msg {
                    Some(Ok(msg)) => msg,
                    Some(Err(e)) => {
                        warn!("gateway read error: {e}");
                        break SessionOutcome::Reconnect;
                    }
                    None => {
                        debug!("gateway stream ended");
                        break SessionOutcome::Reconnect;
                    }
                };
                match msg {
                    Message::Text(text) => {
                        let envelope: Envelope = match serde_json::from_str(&text) {
                            Ok(envelope) => envelope,
                            Err(e) => {
                                warn!(error = %e, "unparseable gateway message");
                                continue;
                            }
                        };
                        match envelope.op {
                            op::DISPATCH => handle_dispatch(handle, envelope, events_tx),
                            op::HEARTBEAT_ACK => {}
                            other => debug!(op = other, "unhandled gateway op"),
                        }
                    }
                    Message::Close(frame) => {
                        info!(?frame, "gateway connection closed");
                        break match frame {
                            Some(f) if is_fatal_close(f.code.into()) => SessionOutcome::Shutdown,
                            _ => SessionOutcome::Reconnect,
                        };
                    }
                    _ => {}
                }
            }
        }
    };

    session_token.cancel();
    heartbeat_task.abort();
    let _ = tokio::time::timeout(Duration::from_millis(WRITE_TASK_SHUTDOWN_MS), write_task).await;

    outcome
}

fn handle_dispatch(
    handle: &GatewayHandle,
    envelope: Envelope,
    events_tx: &flume::Sender<events::MessageCreate>,
) {
    let Some(event) = envelope.t.as_deref() else {
        warn!("dispatch without an event name");
        return;
    };

    match event {
        events::event::GUILD_CREATE => {
            match serde_json::from_value::<events::GuildCreate>(envelope.d) {
                Ok(guild) => {
                    for channel in &guild.channels {
                        handle.inner.channel_guilds.insert(channel.id, guild.id);
                    }
                    for state in &guild.voice_states {
                        handle
                            .inner
                            .roster
                            .apply(state.guild_id.unwrap_or(guild.id), state);
                    }
                    debug!(guild = %guild.id, channels = guild.channels.len(), "guild registered");
                }
                Err(e) => warn!(error = %e, "malformed GUILD_CREATE"),
            }
        }
        events::event::VOICE_STATE_UPDATE => {
            match serde_json::from_value::<events::VoiceState>(envelope.d) {
                Ok(state) => match state.guild_id {
                    Some(guild) => handle.inner.roster.apply(guild, &state),
                    None => warn!("voice state update without a guild"),
                },
                Err(e) => warn!(error = %e, "malformed VOICE_STATE_UPDATE"),
            }
        }
        events::event::VOICE_SERVER_UPDATE => {
            match serde_json::from_value::<events::VoiceServerUpdate>(envelope.d) {
                Ok(update) => {
                    if let Some((_, tx)) = handle.inner.pending_voice.remove(&update.guild_id) {
                        let _ = tx.send(update);
                    } else {
                        debug!(guild = %update.guild_id, "voice server update with no pending join");
                    }
                }
                Err(e) => warn!(error = %e, "malformed VOICE_SERVER_UPDATE"),
            }
        }
        events::event::MESSAGE_CREATE => {
            match serde_json::from_value::<events::MessageCreate>(envelope.d) {
                Ok(message) => {
                    if events_tx.send(message).is_err() {
                        warn!("event consumer gone, dropping message");
                    }
                }
                Err(e) => warn!(error = %e, "malformed MESSAGE_CREATE"),
            }
        }
        // READY is consumed inside the handshake.
        events::event::READY => {}
        other => debug!(event = other, "unhandled dispatch"),
    }
}
