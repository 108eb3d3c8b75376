//! Production voice transport: WebSocket handshake with the voice
//! gateway, then RTP-framed datagrams over UDP at a fixed cadence.
//!
//! Each session owns four tasks: a control writer, a heartbeat, a read
//! drain, and the frame transmitter. One cancellation token tears all of
//! them down; dropping the transmitter closes the bounded frame sink,
//! which is how a dead transport surfaces to the playback engine.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio::net::UdpSocket;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::common::types::{ChannelId, PlaybackTarget};
use crate::gateway::client::{GatewayHandle, VoiceGrant};
use crate::gateway::events::Envelope;
use crate::voice::connector::{VoiceConnector, VoiceError, VoiceSession};

/// Voice gateway opcodes.
mod op {
    pub const IDENTIFY: u8 = 0;
    pub const SELECT_PROTOCOL: u8 = 1;
    pub const READY: u8 = 2;
    pub const HEARTBEAT: u8 = 3;
    pub const SESSION_DESCRIPTION: u8 = 4;
    pub const SPEAKING: u8 = 5;
    pub const HELLO: u8 = 8;
}

/// One datagram per 20 ms opus frame.
const FRAME_INTERVAL: Duration = Duration::from_millis(20);
/// Samples per 20 ms frame at 48 kHz.
const RTP_TIMESTAMP_STEP: u32 = 960;
const RTP_VERSION_BYTE: u8 = 0x80;
const RTP_PAYLOAD_TYPE: u8 = 0x78;
/// Frame queue depth; a full queue backpressures the playback engine.
const TRANSMIT_QUEUE_DEPTH: usize = 32;
const IP_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(2);

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;
type WsSink = futures::stream::SplitSink<WsStream, Message>;
type WsSource = futures::stream::SplitStream<WsStream>;

#[derive(Debug, Deserialize)]
struct VoiceHello {
    heartbeat_interval: u64,
}

#[derive(Debug, Deserialize)]
struct VoiceReady {
    ssrc: u32,
    ip: String,
    port: u16,
}

/// Builds voice sessions by brokering the join through the main gateway
/// and then dialing the granted voice endpoint.
pub struct WireConnector {
    gateway: GatewayHandle,
}

impl WireConnector {
    pub fn new(gateway: GatewayHandle) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl VoiceConnector for WireConnector {
    type Session = VoiceTransport;

    async fn connect(&self, target: &PlaybackTarget) -> Result<VoiceTransport, VoiceError> {
        let grant = self.gateway.join_voice(target.guild, target.channel).await?;
        match VoiceTransport::establish(self.gateway.clone(), *target, grant).await {
            Ok(session) => Ok(session),
            Err(e) => {
                // The join was announced; retract it before giving up.
                self.gateway.leave_voice(target.guild);
                Err(e)
            }
        }
    }
}

pub struct VoiceTransport {
    channel: ChannelId,
    ssrc: u32,
    control: flume::Sender<Message>,
    frames: flume::Sender<Bytes>,
    cancel: CancellationToken,
    closed: AtomicBool,
}

impl VoiceTransport {
    async fn establish(
        gateway: GatewayHandle,
        target: PlaybackTarget,
        grant: VoiceGrant,
    ) -> Result<Self, VoiceError> {
        let url = format!("wss://{}", grant.endpoint);
        debug!(endpoint = %grant.endpoint, channel = %target.channel, "dialing voice gateway");
        let (ws, _) = tokio_tungstenite::connect_async(&url)
            .await
            .map_err(|e| VoiceError::Connect(e.to_string()))?;
        let (mut write, mut read) = ws.split();

        let identify = Envelope::new(
            op::IDENTIFY,
            json!({
                "server_id": grant.guild,
                "user_id": grant.user_id,
                "session_id": grant.session_id,
                "token": grant.token,
            }),
        );
        send_text(&mut write, &identify).await?;

        let hello: VoiceHello = parse_payload(expect_op(&mut read, op::HELLO).await?)?;
        let ready: VoiceReady = parse_payload(expect_op(&mut read, op::READY).await?)?;

        let udp = UdpSocket::bind("0.0.0.0:0").await?;
        let remote: SocketAddr = format!("{}:{}", ready.ip, ready.port)
            .parse()
            .map_err(|_| VoiceError::Connect(format!("bad rtp endpoint {}:{}", ready.ip, ready.port)))?;
        udp.connect(remote).await?;
        let (public_ip, public_port) = discover_ip(&udp, ready.ssrc).await?;

        let select = Envelope::new(
            op::SELECT_PROTOCOL,
            json!({
                "protocol": "udp",
                "data": { "address": public_ip, "port": public_port },
            }),
        );
        send_text(&mut write, &select).await?;
        expect_op(&mut read, op::SESSION_DESCRIPTION).await?;

        let cancel = CancellationToken::new();
        let (control_tx, control_rx) = flume::unbounded::<Message>();
        let (frame_tx, frame_rx) = flume::bounded::<Bytes>(TRANSMIT_QUEUE_DEPTH);

        spawn_control_writer(write, control_rx, cancel.clone());
        spawn_heartbeat(control_tx.clone(), hello.heartbeat_interval, cancel.clone());
        spawn_read_drain(read, target.channel, cancel.clone());
        spawn_transmitter(udp, ready.ssrc, frame_rx, cancel.clone());

        // Retract the voice join on the main gateway once the session is
        // torn down, whichever task triggered it.
        let leave_token = cancel.clone();
        tokio::spawn(async move {
            leave_token.cancelled().await;
            gateway.leave_voice(target.guild);
        });

        info!(channel = %target.channel, ssrc = ready.ssrc, "voice session established");
        Ok(Self {
            channel: target.channel,
            ssrc: ready.ssrc,
            control: control_tx,
            frames: frame_tx,
            cancel,
            closed: AtomicBool::new(false),
        })
    }
}

impl Drop for VoiceTransport {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[async_trait]
impl VoiceSession for VoiceTransport {
    async fn set_speaking(&self, speaking: bool) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        let envelope = Envelope::new(
            op::SPEAKING,
            json!({
                "speaking": if speaking { 1 } else { 0 },
                "delay": 0,
                "ssrc": self.ssrc,
            }),
        );
        match serde_json::to_string(&envelope) {
            Ok(text) => {
                if self.control.send(Message::Text(text.into())).is_err() {
                    warn!(channel = %self.channel, "speaking signal dropped, control channel closed");
                }
            }
            Err(e) => warn!(channel = %self.channel, error = %e, "failed to encode speaking signal"),
        }
    }

    async fn send(&self, frame: Bytes) -> Result<(), VoiceError> {
        self.frames
            .send_async(frame)
            .await
            .map_err(|_| VoiceError::TransmitClosed)
    }

    async fn disconnect(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!(channel = %self.channel, "tearing down voice session");
        self.cancel.cancel();
    }
}

fn spawn_control_writer(
    mut write: WsSink,
    control_rx: flume::Receiver<Message>,
    token: CancellationToken,
) {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                msg = control_rx.recv_async() => {
                    let Ok(msg) = msg else { break };
                    if let Err(e) = write.send(msg).await {
                        warn!("voice control write error: {e}");
                        token.cancel();
                        break;
                    }
                }
            }
        }
        let _ = write.send(Message::Close(None)).await;
    });
}

fn spawn_heartbeat(control_tx: flume::Sender<Message>, interval_ms: u64, token: CancellationToken) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms));
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    let now = std::time::SystemTime::now()
                        .duration_since(std::time::UNIX_EPOCH)
                        .unwrap_or_default()
                        .as_millis() as u64;
                    let envelope = Envelope::new(op::HEARTBEAT, json!({ "t": now }));
                    let Ok(text) = serde_json::to_string(&envelope) else { break };
                    if control_tx.send(Message::Text(text.into())).is_err() {
                        break;
                    }
                }
            }
        }
    });
}

/// Keeps the voice socket serviced; a closed or failed socket cancels
/// the whole session so in-flight sends fail instead of hanging.
fn spawn_read_drain(mut read: WsSource, channel: ChannelId, token: CancellationToken) {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Close(frame))) => {
                            debug!(channel = %channel, ?frame, "voice gateway closed");
                            token.cancel();
                            break;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            warn!(channel = %channel, "voice gateway read error: {e}");
                            token.cancel();
                            break;
                        }
                        None => {
                            token.cancel();
                            break;
                        }
                    }
                }
            }
        }
    });
}

fn spawn_transmitter(
    udp: UdpSocket,
    ssrc: u32,
    frame_rx: flume::Receiver<Bytes>,
    token: CancellationToken,
) {
    tokio::spawn(async move {
        let mut link = RtpLink::new(udp, ssrc);
        let mut ticker = tokio::time::interval(FRAME_INTERVAL);
        // Catch up after a stall instead of stretching the clip.
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Burst);
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                frame = frame_rx.recv_async() => {
                    let Ok(frame) = frame else { break };
                    ticker.tick().await;
                    if let Err(e) = link.send(&frame).await {
                        warn!("rtp send error: {e}");
                    }
                }
            }
        }
    });
}

async fn send_text(write: &mut WsSink, envelope: &Envelope) -> Result<(), VoiceError> {
    let text = serde_json::to_string(envelope)
        .map_err(|e| VoiceError::Connect(format!("encode failure: {e}")))?;
    write
        .send(Message::Text(text.into()))
        .await
        .map_err(|e| VoiceError::Connect(e.to_string()))
}

/// Reads until the wanted handshake op arrives.
async fn expect_op(read: &mut WsSource, want: u8) -> Result<serde_json::Value, VoiceError> {
    while let Some(msg) = read.next().await {
        let msg = msg.map_err(|e| VoiceError::Connect(e.to_string()))?;
        match msg {
            Message::Text(text) => {
                let envelope: Envelope = serde_json::from_str(&text)
                    .map_err(|e| VoiceError::Connect(format!("bad voice message: {e}")))?;
                if envelope.op == want {
                    return Ok(envelope.d);
                }
                debug!(op = envelope.op, "skipping voice handshake message");
            }
            Message::Close(frame) => {
                return Err(VoiceError::Connect(format!(
                    "voice gateway closed during handshake: {frame:?}"
                )));
            }
            _ => {}
        }
    }
    Err(VoiceError::Connect(
        "voice gateway ended during handshake".into(),
    ))
}

fn parse_payload<T: serde::de::DeserializeOwned>(value: serde_json::Value) -> Result<T, VoiceError> {
    serde_json::from_value(value).map_err(|e| VoiceError::Connect(format!("bad voice payload: {e}")))
}

/// Asks the transport which public address our datagrams appear from.
/// Request: type 1, length 70, ssrc; response carries the address as a
/// NUL-padded string and the port little-endian in the trailing bytes.
async fn discover_ip(socket: &UdpSocket, ssrc: u32) -> Result<(String, u16), VoiceError> {
    let mut packet = [0u8; 74];
    packet[0..2].copy_from_slice(&1u16.to_be_bytes());
    packet[2..4].copy_from_slice(&70u16.to_be_bytes());
    packet[4..8].copy_from_slice(&ssrc.to_be_bytes());
    socket.send(&packet).await?;

    let mut buf = [0u8; 74];
    let n = tokio::time::timeout(IP_DISCOVERY_TIMEOUT, socket.recv(&mut buf))
        .await
        .map_err(|_| VoiceError::Timeout)??;
    if n < 74 {
        return Err(VoiceError::Connect("short ip discovery response".into()));
    }
    let ip = std::str::from_utf8(&buf[8..72])
        .map_err(|_| VoiceError::Connect("invalid ip discovery response".into()))?
        .trim_matches('\0')
        .to_string();
    let port = u16::from_le_bytes([buf[72], buf[73]]);
    Ok((ip, port))
}

/// Stamps frames with a 12-byte RTP header and writes them to the
/// connected socket. Sequence and timestamp advance per packet.
struct RtpLink {
    socket: UdpSocket,
    ssrc: u32,
    sequence: u16,
    timestamp: u32,
    /// Reusable packet buffer, cleared per frame.
    packet: Vec<u8>,
}

impl RtpLink {
    fn new(socket: UdpSocket, ssrc: u32) -> Self {
        Self {
            socket,
            ssrc,
            sequence: 0,
            timestamp: 0,
            packet: Vec::with_capacity(1500),
        }
    }

    async fn send(&mut self, payload: &[u8]) -> std::io::Result<()> {
        let mut header = [0u8; 12];
        header[0] = RTP_VERSION_BYTE;
        header[1] = RTP_PAYLOAD_TYPE;
        header[2..4].copy_from_slice(&self.sequence.to_be_bytes());
        header[4..8].copy_from_slice(&self.timestamp.to_be_bytes());
        header[8..12].copy_from_slice(&self.ssrc.to_be_bytes());
        self.sequence = self.sequence.wrapping_add(1);
        self.timestamp = self.timestamp.wrapping_add(RTP_TIMESTAMP_STEP);

        self.packet.clear();
        self.packet.extend_from_slice(&header);
        self.packet.extend_from_slice(payload);
        self.socket.send(&self.packet).await.map(|_| ())
    }
}
