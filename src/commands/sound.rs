use tracing::{debug, error};

use crate::commands::BotInner;
use crate::common::types::{AnyResult, PlaybackTarget};
use crate::gateway::events::MessageCreate;

/// `!airhorn`: play the clip into the author's current voice channel.
/// Silent when the author is not in voice; playback failures stay off
/// the chat surface.
pub(crate) async fn play(bot: &BotInner, message: &MessageCreate) -> AnyResult<()> {
    let Some(guild) = bot.gateway.guild_of(message.channel_id) else {
        debug!(channel = %message.channel_id, "message from an unknown channel");
        return Ok(());
    };
    let Some(voice_channel) = bot
        .gateway
        .roster()
        .voice_channel_of(guild, message.author.id)
    else {
        debug!(user = %message.author.id, "author is not in a voice channel");
        return Ok(());
    };

    let target = PlaybackTarget {
        guild,
        channel: voice_channel,
    };
    match bot.engine.trigger(target).await {
        Ok(outcome) => debug!(?outcome, channel = %voice_channel, "playback finished"),
        Err(e) => error!(error = %e, channel = %voice_channel, "playback failed"),
    }
    Ok(())
}
