//! Client for the external ladder-profile API.

use thiserror::Error;
use tracing::debug;

use crate::common::http::HttpClient;
use crate::config::StatsConfig;
use crate::stats::models::RankSnapshot;

#[derive(Debug, Error)]
pub enum LookupError {
    #[error("profile request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("profile response malformed: {0}")]
    Malformed(#[from] serde_json::Error),
}

pub struct RankClient {
    http: reqwest::Client,
    profile_url: String,
}

impl RankClient {
    pub fn new(cfg: &StatsConfig) -> Result<Self, reqwest::Error> {
        Ok(Self {
            http: HttpClient::new()?,
            profile_url: cfg.profile_url.trim_end_matches('/').to_string(),
        })
    }

    /// One GET per lookup; the username is the trailing path segment.
    pub async fn lookup(&self, username: &str) -> Result<RankSnapshot, LookupError> {
        let url = format!("{}/{}", self.profile_url, username);
        debug!(%url, "profile lookup");
        let body = self
            .http
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        Ok(serde_json::from_str(&body)?)
    }
}
