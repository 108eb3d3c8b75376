pub mod client;
pub mod events;
pub mod roster;

pub use client::{Client, GatewayHandle, VoiceGrant};
pub use roster::Roster;
