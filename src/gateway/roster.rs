//! Voice-presence bookkeeping: which voice channel each user occupies.

use dashmap::DashMap;

use crate::common::types::{ChannelId, GuildId, UserId};
use crate::gateway::events::VoiceState;

#[derive(Debug, Default)]
pub struct Roster {
    states: DashMap<(GuildId, UserId), ChannelId>,
}

impl Roster {
    /// Folds one voice-state event in. `guild` is the resolved guild for
    /// events that carry it out of band (guild seeding).
    pub fn apply(&self, guild: GuildId, state: &VoiceState) {
        match state.channel_id {
            Some(channel) => {
                self.states.insert((guild, state.user_id), channel);
            }
            None => {
                self.states.remove(&(guild, state.user_id));
            }
        }
    }

    pub fn voice_channel_of(&self, guild: GuildId, user: UserId) -> Option<ChannelId> {
        self.states.get(&(guild, user)).map(|entry| *entry.value())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(user: u64, channel: Option<u64>) -> VoiceState {
        VoiceState {
            guild_id: None,
            user_id: UserId(user),
            channel_id: channel.map(ChannelId),
        }
    }

    #[test]
    fn tracks_joins_moves_and_leaves() {
        let roster = Roster::default();
        let guild = GuildId(1);

        roster.apply(guild, &state(7, Some(100)));
        assert_eq!(
            roster.voice_channel_of(guild, UserId(7)),
            Some(ChannelId(100))
        );

        roster.apply(guild, &state(7, Some(101)));
        assert_eq!(
            roster.voice_channel_of(guild, UserId(7)),
            Some(ChannelId(101))
        );

        roster.apply(guild, &state(7, None));
        assert_eq!(roster.voice_channel_of(guild, UserId(7)), None);
    }

    #[test]
    fn presence_is_scoped_per_guild() {
        let roster = Roster::default();
        roster.apply(GuildId(1), &state(7, Some(100)));
        assert_eq!(roster.voice_channel_of(GuildId(2), UserId(7)), None);
    }
}
