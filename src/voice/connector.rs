//! The seam between the playback engine and the voice transport.
//!
//! The engine only ever talks to these traits; the production
//! implementation lives in [`crate::voice::transport`] and tests inject
//! scripted fakes.

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

use crate::common::types::PlaybackTarget;

#[derive(Debug, Error)]
pub enum VoiceError {
    #[error("voice connect failed: {0}")]
    Connect(String),
    #[error("voice operation timed out")]
    Timeout,
    #[error("voice transmit sink closed")]
    TransmitClosed,
    #[error("voice transport I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Establishes a transient voice session for one playback target.
#[async_trait]
pub trait VoiceConnector: Send + Sync + 'static {
    type Session: VoiceSession + 'static;

    /// Performs the transport handshake. Suspends only the calling
    /// invocation; a failure aborts that invocation and is never retried
    /// here.
    async fn connect(&self, target: &PlaybackTarget) -> Result<Self::Session, VoiceError>;
}

/// A live voice connection bound to one playback target.
#[async_trait]
pub trait VoiceSession: Send + Sync {
    /// Signals speaking intent. Best-effort: no acknowledgement is
    /// expected and failures are logged rather than surfaced.
    async fn set_speaking(&self, speaking: bool);

    /// Enqueues one frame on the session's bounded transmit sink,
    /// suspending while the sink is full. Frames are never silently
    /// dropped.
    async fn send(&self, frame: Bytes) -> Result<(), VoiceError>;

    /// Tears the session down. Idempotent.
    async fn disconnect(&self);
}
