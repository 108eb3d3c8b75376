//! Stats commands: registration, lookups, and team bookkeeping.
//!
//! Lookup failures are logged and produce no reply; missing
//! prerequisites get a short notice instead.

use tracing::{debug, warn};

use crate::commands::BotInner;
use crate::common::types::AnyResult;
use crate::gateway::events::MessageCreate;
use crate::stats::models::TeamMember;

/// Battletag-style names carry `#`; the profile API wants `-`.
fn to_api_name(tag: &str) -> String {
    tag.replacen('#', "-", 1)
}

fn to_display_name(name: &str) -> String {
    name.replacen('-', "#", 1)
}

/// `!adduser <name#1234>`: record the author's ladder username.
pub(crate) async fn add_user(
    bot: &BotInner,
    message: &MessageCreate,
    arg: Option<&str>,
) -> AnyResult<()> {
    let Some(tag) = arg else {
        bot.gateway
            .send_message(message.channel_id, "Usage: !adduser <name#1234>");
        return Ok(());
    };
    bot.stats
        .set_username(message.author.id, &to_api_name(tag))
        .await?;
    Ok(())
}

/// `!addteam <name>`: put the author on a team.
pub(crate) async fn add_team(
    bot: &BotInner,
    message: &MessageCreate,
    arg: Option<&str>,
) -> AnyResult<()> {
    let Some(name) = arg else {
        bot.gateway
            .send_message(message.channel_id, "Usage: !addteam <name>");
        return Ok(());
    };
    let registered = bot
        .stats
        .profile(message.author.id)
        .await
        .is_some_and(|p| !p.username.is_empty());
    if !registered {
        bot.gateway.send_message(
            message.channel_id,
            "No username on record. Use !adduser first.",
        );
        return Ok(());
    }
    bot.stats.join_team(message.author.id, name).await?;
    Ok(())
}

/// `!mystats`: the author's rank and endorsement breakdown.
pub(crate) async fn my_stats(bot: &BotInner, message: &MessageCreate) -> AnyResult<()> {
    let Some(profile) = bot
        .stats
        .profile(message.author.id)
        .await
        .filter(|p| !p.username.is_empty())
    else {
        bot.gateway.send_message(
            message.channel_id,
            "No username on record. Use !adduser first.",
        );
        return Ok(());
    };

    let snapshot = match bot.lookup.lookup(&profile.username).await {
        Ok(snapshot) => snapshot,
        Err(e) => {
            warn!(error = %e, user = %message.author.id, "profile lookup failed");
            return Ok(());
        }
    };

    let reply = format!(
        "Your SR is {}\nYour endorsement level is {}\n\tShot Caller: {}\n\tTeammate: {}\n\tSportsman: {}",
        snapshot.competitive.rank,
        snapshot.endorsement.level,
        snapshot.endorsement.shotcaller.rate,
        snapshot.endorsement.teammate.rate,
        snapshot.endorsement.sportsmanship.rate,
    );
    bot.gateway.send_message(message.channel_id, &reply);
    Ok(())
}

/// `!stats <name#1234>`: an arbitrary player's rank.
pub(crate) async fn player_stats(
    bot: &BotInner,
    message: &MessageCreate,
    arg: Option<&str>,
) -> AnyResult<()> {
    let Some(tag) = arg else {
        bot.gateway
            .send_message(message.channel_id, "Usage: !stats <name#1234>");
        return Ok(());
    };
    let snapshot = match bot.lookup.lookup(&to_api_name(tag)).await {
        Ok(snapshot) => snapshot,
        Err(e) => {
            warn!(error = %e, tag, "profile lookup failed");
            return Ok(());
        }
    };
    bot.gateway.send_message(
        message.channel_id,
        &format!("{}'s SR is {}", tag, snapshot.competitive.rank),
    );
    Ok(())
}

/// `!myteam`: the author's team rank.
pub(crate) async fn my_team(bot: &BotInner, message: &MessageCreate) -> AnyResult<()> {
    let team = bot
        .stats
        .profile(message.author.id)
        .await
        .map(|p| p.team)
        .unwrap_or_default();
    if team.is_empty() {
        bot.gateway.send_message(
            message.channel_id,
            "You are not on a team or have not added your team name",
        );
        return Ok(());
    }
    let rank = bot.stats.team(&team).await.map(|t| t.rank).unwrap_or(0);
    bot.gateway
        .send_message(message.channel_id, &format!("{team}'s SR is {rank}"));
    Ok(())
}

/// `!teams`: every team's roster.
pub(crate) async fn list_teams(bot: &BotInner, message: &MessageCreate) -> AnyResult<()> {
    let teams = bot.stats.teams().await;
    if teams.is_empty() {
        bot.gateway
            .send_message(message.channel_id, "There are no teams listed");
        return Ok(());
    }
    let mut roster = String::new();
    for (name, team) in teams {
        roster.push_str(&format!("{name} consists of the following players:\n"));
        for player in &team.players {
            roster.push_str(&format!(
                "\t{} - {}\n",
                to_display_name(&player.username),
                player.rank
            ));
        }
    }
    bot.gateway.send_message(message.channel_id, roster.trim_end());
    Ok(())
}

/// `!updateteam`: re-fetch every member's rank of the author's team and
/// store the per-member ranks plus the team average.
pub(crate) async fn update_team(bot: &BotInner, message: &MessageCreate) -> AnyResult<()> {
    let team = bot
        .stats
        .profile(message.author.id)
        .await
        .map(|p| p.team)
        .unwrap_or_default();
    if team.is_empty() {
        bot.gateway.send_message(
            message.channel_id,
            "You are not on a team or have not added your team name",
        );
        return Ok(());
    }
    let members = bot
        .stats
        .team(&team)
        .await
        .map(|t| t.players)
        .unwrap_or_default();
    if members.is_empty() {
        debug!(team, "no members to update");
        return Ok(());
    }

    let mut updated = Vec::with_capacity(members.len());
    let mut total = 0i64;
    for member in &members {
        let snapshot = match bot.lookup.lookup(&member.username).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(error = %e, username = %member.username, "profile lookup failed, team left unchanged");
                return Ok(());
            }
        };
        total += snapshot.competitive.rank;
        updated.push(TeamMember {
            username: member.username.clone(),
            rank: snapshot.competitive.rank,
        });
    }
    let average = total / updated.len() as i64;
    bot.stats.set_team_ranks(&team, updated, average).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{to_api_name, to_display_name};

    #[test]
    fn battletag_translation_round_trips() {
        assert_eq!(to_api_name("someone#1234"), "someone-1234");
        assert_eq!(to_display_name("someone-1234"), "someone#1234");
    }

    #[test]
    fn only_the_first_separator_is_translated() {
        assert_eq!(to_api_name("a#b#c"), "a-b#c");
        assert_eq!(to_display_name("a-b-c"), "a#b-c");
    }
}
