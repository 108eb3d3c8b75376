//! Flat-JSON user and team records.
//!
//! Both documents are read fully at startup and rewritten in full on
//! every mutation. One async mutex covers the in-memory maps and the
//! rewrite, so concurrent command handlers can never interleave a
//! read-modify-rewrite.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::sync::Mutex;

use crate::common::types::UserId;
use crate::config::StatsConfig;
use crate::stats::models::{PlayerProfile, TeamMember, TeamStats};

#[derive(Debug, Error)]
pub enum StatsError {
    #[error("stats file I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("stats file malformed: {0}")]
    Malformed(#[from] serde_json::Error),
}

pub struct StatsStore {
    users_path: PathBuf,
    teams_path: PathBuf,
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    players: HashMap<UserId, PlayerProfile>,
    teams: HashMap<String, TeamStats>,
}

impl StatsStore {
    /// Loads both documents. A missing or malformed file is fatal at
    /// startup.
    pub fn load(cfg: &StatsConfig) -> Result<Self, StatsError> {
        let players = read_json(Path::new(&cfg.users_path))?;
        let teams = read_json(Path::new(&cfg.teams_path))?;
        Ok(Self {
            users_path: PathBuf::from(&cfg.users_path),
            teams_path: PathBuf::from(&cfg.teams_path),
            inner: Mutex::new(Inner { players, teams }),
        })
    }

    pub async fn profile(&self, user: UserId) -> Option<PlayerProfile> {
        self.inner.lock().await.players.get(&user).cloned()
    }

    /// Records (or replaces) a user's ladder username.
    pub async fn set_username(&self, user: UserId, username: &str) -> Result<(), StatsError> {
        let mut inner = self.inner.lock().await;
        inner.players.entry(user).or_default().username = username.to_string();
        write_json(&self.users_path, &inner.players).await
    }

    /// Puts the user on a team and appends them to its roster.
    pub async fn join_team(&self, user: UserId, team: &str) -> Result<(), StatsError> {
        let mut inner = self.inner.lock().await;
        let profile = inner.players.entry(user).or_default();
        profile.team = team.to_string();
        let username = profile.username.clone();

        let roster = inner.teams.entry(team.to_string()).or_default();
        if !roster.players.iter().any(|p| p.username == username) {
            roster.players.push(TeamMember { username, rank: 0 });
        }

        write_json(&self.users_path, &inner.players).await?;
        write_json(&self.teams_path, &inner.teams).await
    }

    pub async fn team(&self, name: &str) -> Option<TeamStats> {
        self.inner.lock().await.teams.get(name).cloned()
    }

    pub async fn teams(&self) -> Vec<(String, TeamStats)> {
        self.inner
            .lock()
            .await
            .teams
            .iter()
            .map(|(name, team)| (name.clone(), team.clone()))
            .collect()
    }

    /// Replaces a team's per-member ranks and its aggregate rank.
    pub async fn set_team_ranks(
        &self,
        team: &str,
        players: Vec<TeamMember>,
        rank: i64,
    ) -> Result<(), StatsError> {
        let mut inner = self.inner.lock().await;
        let entry = inner.teams.entry(team.to_string()).or_default();
        entry.players = players;
        entry.rank = rank;
        write_json(&self.teams_path, &inner.teams).await
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, StatsError> {
    let raw = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

async fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<(), StatsError> {
    let pretty = serde_json::to_string_pretty(value)?;
    tokio::fs::write(path, pretty).await?;
    Ok(())
}
