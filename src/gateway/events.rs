//! Wire shapes of the messaging gateway.
//!
//! Every message, both directions, is a JSON envelope `{ op, d }`;
//! dispatches (op 0) additionally carry the event name in `t`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::common::types::{ChannelId, GuildId, UserId};

#[derive(Debug, Serialize, Deserialize)]
pub struct Envelope {
    pub op: u8,
    #[serde(default)]
    pub d: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t: Option<String>,
}

impl Envelope {
    pub fn new(op: u8, d: Value) -> Self {
        Self { op, d, t: None }
    }
}

pub mod op {
    pub const DISPATCH: u8 = 0;
    pub const HEARTBEAT: u8 = 1;
    pub const IDENTIFY: u8 = 2;
    pub const VOICE_STATE: u8 = 4;
    pub const MESSAGE_SEND: u8 = 5;
    pub const HELLO: u8 = 10;
    pub const HEARTBEAT_ACK: u8 = 11;
}

pub mod event {
    pub const READY: &str = "READY";
    pub const GUILD_CREATE: &str = "GUILD_CREATE";
    pub const MESSAGE_CREATE: &str = "MESSAGE_CREATE";
    pub const VOICE_STATE_UPDATE: &str = "VOICE_STATE_UPDATE";
    pub const VOICE_SERVER_UPDATE: &str = "VOICE_SERVER_UPDATE";
}

#[derive(Debug, Deserialize)]
pub struct Hello {
    pub heartbeat_interval: u64,
}

#[derive(Debug, Deserialize)]
pub struct Ready {
    pub user: ReadyUser,
    pub session_id: String,
}

#[derive(Debug, Deserialize)]
pub struct ReadyUser {
    pub id: UserId,
}

#[derive(Debug, Deserialize)]
pub struct GuildCreate {
    pub id: GuildId,
    #[serde(default)]
    pub channels: Vec<GuildChannel>,
    #[serde(default)]
    pub voice_states: Vec<VoiceState>,
}

#[derive(Debug, Deserialize)]
pub struct GuildChannel {
    pub id: ChannelId,
}

/// A user's voice presence; `channel_id: null` means they left voice.
#[derive(Debug, Clone, Deserialize)]
pub struct VoiceState {
    #[serde(default)]
    pub guild_id: Option<GuildId>,
    pub user_id: UserId,
    pub channel_id: Option<ChannelId>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageCreate {
    pub channel_id: ChannelId,
    pub author: MessageAuthor,
    pub content: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageAuthor {
    pub id: UserId,
}

/// Completes a pending voice join: where to dial and with what token.
#[derive(Debug, Clone, Deserialize)]
pub struct VoiceServerUpdate {
    pub guild_id: GuildId,
    pub endpoint: String,
    pub token: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_message_dispatch() {
        let raw = r#"{"op":0,"t":"MESSAGE_CREATE","d":{"channel_id":42,"author":{"id":7},"content":"!airhorn"}}"#;
        let env: Envelope = serde_json::from_str(raw).unwrap();
        assert_eq!(env.op, op::DISPATCH);
        assert_eq!(env.t.as_deref(), Some(event::MESSAGE_CREATE));
        let msg: MessageCreate = serde_json::from_value(env.d).unwrap();
        assert_eq!(msg.channel_id, ChannelId(42));
        assert_eq!(msg.author.id, UserId(7));
        assert_eq!(msg.content, "!airhorn");
    }

    #[test]
    fn null_channel_means_voice_left() {
        let raw = r#"{"guild_id":1,"user_id":7,"channel_id":null}"#;
        let state: VoiceState = serde_json::from_str(raw).unwrap();
        assert_eq!(state.guild_id, Some(GuildId(1)));
        assert!(state.channel_id.is_none());
    }

    #[test]
    fn envelope_without_event_name_skips_t() {
        let env = Envelope::new(op::HEARTBEAT, serde_json::Value::Null);
        let raw = serde_json::to_string(&env).unwrap();
        assert!(!raw.contains("\"t\""));
    }
}
