//! Chat command routing.

pub mod sound;
pub mod stats;

use std::sync::Arc;

use tracing::warn;

use crate::common::types::AnyResult;
use crate::config::CommandsConfig;
use crate::gateway::client::GatewayHandle;
use crate::gateway::events::MessageCreate;
use crate::playback::PlaybackEngine;
use crate::stats::{RankClient, StatsStore};
use crate::voice::WireConnector;

/// Routes inbound chat messages to their command handlers.
#[derive(Clone)]
pub struct Bot {
    inner: Arc<BotInner>,
}

pub(crate) struct BotInner {
    pub gateway: GatewayHandle,
    pub engine: Arc<PlaybackEngine<WireConnector>>,
    pub stats: Arc<StatsStore>,
    pub lookup: RankClient,
    pub prefix: String,
}

impl Bot {
    pub fn new(
        gateway: GatewayHandle,
        engine: Arc<PlaybackEngine<WireConnector>>,
        stats: Arc<StatsStore>,
        lookup: RankClient,
        cfg: CommandsConfig,
    ) -> Self {
        Self {
            inner: Arc::new(BotInner {
                gateway,
                engine,
                stats,
                lookup,
                prefix: cfg.prefix,
            }),
        }
    }

    /// Drains gateway events, handling each message in its own task so a
    /// slow or failing handler never stalls the stream. Failures are
    /// logged here instead of vanishing with the task.
    pub async fn run(self, events: flume::Receiver<MessageCreate>) {
        while let Ok(message) = events.recv_async().await {
            let bot = self.clone();
            tokio::spawn(async move {
                let content = message.content.clone();
                if let Err(e) = bot.dispatch(message).await {
                    warn!(error = %e, command = %content, "command handler failed");
                }
            });
        }
    }

    async fn dispatch(&self, message: MessageCreate) -> AnyResult<()> {
        let inner = &*self.inner;
        // Never react to our own messages.
        if message.author.id == inner.gateway.user_id() {
            return Ok(());
        }
        let Some((command, arg)) = parse_command(&inner.prefix, &message.content) else {
            return Ok(());
        };
        match command {
            "airhorn" => sound::play(inner, &message).await,
            "adduser" => stats::add_user(inner, &message, arg).await,
            "addteam" => stats::add_team(inner, &message, arg).await,
            "mystats" => stats::my_stats(inner, &message).await,
            "stats" => stats::player_stats(inner, &message, arg).await,
            "myteam" => stats::my_team(inner, &message).await,
            "teams" => stats::list_teams(inner, &message).await,
            "updateteam" => stats::update_team(inner, &message).await,
            _ => Ok(()),
        }
    }
}

/// Splits `!command arg` into its command word and first argument.
pub(crate) fn parse_command<'a>(
    prefix: &str,
    content: &'a str,
) -> Option<(&'a str, Option<&'a str>)> {
    let rest = content.strip_prefix(prefix)?;
    let mut words = rest.split_whitespace();
    let command = words.next()?;
    Some((command, words.next()))
}
