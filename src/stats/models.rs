use serde::{Deserialize, Serialize};

/// A registered chat user: ladder username plus team membership.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlayerProfile {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub team: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TeamStats {
    #[serde(default)]
    pub players: Vec<TeamMember>,
    #[serde(default)]
    pub rank: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamMember {
    pub username: String,
    #[serde(default)]
    pub rank: i64,
}

/// Response shape of the external profile API.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RankSnapshot {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub level: i64,
    #[serde(default)]
    pub private: bool,
    #[serde(default)]
    pub endorsement: Endorsement,
    #[serde(default)]
    pub competitive: Competitive,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Endorsement {
    #[serde(default)]
    pub sportsmanship: Rate,
    #[serde(default)]
    pub shotcaller: Rate,
    #[serde(default)]
    pub teammate: Rate,
    #[serde(default)]
    pub level: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Rate {
    #[serde(default)]
    pub rate: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Competitive {
    #[serde(default)]
    pub rank: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_profile_response() {
        let raw = r#"{
            "username": "someone-1234",
            "level": 87,
            "private": false,
            "endorsement": {
                "sportsmanship": {"rate": 3},
                "shotcaller": {"rate": 1},
                "teammate": {"rate": 2},
                "level": 4
            },
            "competitive": {"rank": 2875}
        }"#;
        let snapshot: RankSnapshot = serde_json::from_str(raw).unwrap();
        assert_eq!(snapshot.competitive.rank, 2875);
        assert_eq!(snapshot.endorsement.level, 4);
        assert_eq!(snapshot.endorsement.shotcaller.rate, 1);
        assert!(!snapshot.private);
    }

    #[test]
    fn missing_fields_default_to_zero() {
        let snapshot: RankSnapshot = serde_json::from_str(r#"{"username":"x"}"#).unwrap();
        assert_eq!(snapshot.competitive.rank, 0);
        assert_eq!(snapshot.endorsement.teammate.rate, 0);
    }
}
