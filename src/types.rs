use serde::{Deserialize, Serialize};

/// Opaque ID types for type safety
pub type UserId = String;
pub type DebateId = String;
pub type ArgumentId = String;
pub type AnalysisId = String;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DebateStatus {
    Pending,
    Active,
    Completed,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Pro,
    Con,
}

impl Side {
    pub fn opposite(self) -> Side {
        match self {
            Side::Pro => Side::Con,
            Side::Con => Side::Pro,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Side::Pro => "pro",
            Side::Con => "con",
        }
    }
}

/// Tunables for the debate lifecycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebateConfig {
    /// Seconds a participant has to submit before the draft is auto-submitted
    pub turn_seconds: u32,
    pub default_rounds: u32,
    pub max_rounds: u32,
    pub max_argument_chars: usize,
}

impl Default for DebateConfig {
    fn default() -> Self {
        Self {
            turn_seconds: 60,
            default_rounds: 3,
            max_rounds: 10,
            max_argument_chars: 5000,
        }
    }
}

impl DebateConfig {
    /// Load configuration from environment variables, falling back to defaults
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            turn_seconds: env_parse("TURN_SECONDS").unwrap_or(defaults.turn_seconds),
            default_rounds: env_parse("DEFAULT_ROUNDS").unwrap_or(defaults.default_rounds),
            max_rounds: env_parse("MAX_ROUNDS").unwrap_or(defaults.max_rounds),
            max_argument_chars: env_parse("MAX_ARGUMENT_CHARS")
                .unwrap_or(defaults.max_argument_chars),
        }
        .normalized()
    }

    /// Keep round limits usable: at least one round, default within the maximum
    pub fn normalized(mut self) -> Self {
        if self.max_rounds == 0 {
            tracing::warn!("MAX_ROUNDS must be at least 1, using 1");
            self.max_rounds = 1;
        }
        let default_rounds = self.default_rounds.clamp(1, self.max_rounds);
        if default_rounds != self.default_rounds {
            tracing::warn!(
                "DEFAULT_ROUNDS={} is outside 1..={}, using {}",
                self.default_rounds,
                self.max_rounds,
                default_rounds
            );
            self.default_rounds = default_rounds;
        }
        self
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct UserStats {
    pub wins: u32,
    pub losses: u32,
    pub draws: u32,
    pub points: u32,
    pub debates: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub email: String,
    pub display_name: String,
    #[serde(default)]
    pub bio: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    /// Session token issued at signup
    pub token: String,
    #[serde(default)]
    pub stats: UserStats,
    pub created_at: String,
}

/// User as seen by anyone other than the owner (no session token)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublicUser {
    pub id: UserId,
    pub display_name: String,
    pub bio: Option<String>,
    pub avatar_url: Option<String>,
    pub stats: UserStats,
}

impl From<&User> for PublicUser {
    fn from(u: &User) -> Self {
        Self {
            id: u.id.clone(),
            display_name: u.display_name.clone(),
            bio: u.bio.clone(),
            avatar_url: u.avatar_url.clone(),
            stats: u.stats.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum VerdictSource {
    Ai,
    Fallback,
    Forfeit,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Verdict {
    /// None means the debate ended in a draw
    pub winner_side: Option<Side>,
    pub reasoning: String,
    pub source: VerdictSource,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Debate {
    pub id: DebateId,
    pub version: u64,
    pub topic: String,
    #[serde(default)]
    pub description: Option<String>,
    pub creator_id: UserId,
    pub opponent_id: Option<UserId>,
    pub creator_side: Side,
    pub rounds: u32,
    pub current_round: u32,
    pub current_turn: Option<UserId>,
    pub status: DebateStatus,
    #[serde(default)]
    pub creator_ready: bool,
    #[serde(default)]
    pub opponent_ready: bool,
    /// ISO timestamp after which the turn holder's draft is auto-submitted
    pub turn_deadline: Option<String>,
    pub winner_id: Option<UserId>,
    pub forfeited_by: Option<UserId>,
    pub verdict: Option<Verdict>,
    pub created_at: String,
    pub completed_at: Option<String>,
}

impl Debate {
    pub fn is_participant(&self, user_id: &str) -> bool {
        self.creator_id == user_id || self.opponent_id.as_deref() == Some(user_id)
    }

    /// Side argued by the given participant
    pub fn side_of(&self, user_id: &str) -> Option<Side> {
        if self.creator_id == user_id {
            Some(self.creator_side)
        } else if self.opponent_id.as_deref() == Some(user_id) {
            Some(self.creator_side.opposite())
        } else {
            None
        }
    }

    /// Participant arguing the given side
    pub fn participant_on(&self, side: Side) -> Option<&UserId> {
        if side == self.creator_side {
            Some(&self.creator_id)
        } else {
            self.opponent_id.as_ref()
        }
    }

    /// The participant who is not `user_id`
    pub fn other_participant(&self, user_id: &str) -> Option<&UserId> {
        if self.creator_id == user_id {
            self.opponent_id.as_ref()
        } else if self.opponent_id.as_deref() == Some(user_id) {
            Some(&self.creator_id)
        } else {
            None
        }
    }

    pub fn both_ready(&self) -> bool {
        self.creator_ready && self.opponent_ready
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Argument {
    pub id: ArgumentId,
    pub debate_id: DebateId,
    pub author_id: UserId,
    pub content: String,
    pub round: u32,
    pub side: Side,
    /// True when the turn timer submitted the draft on the author's behalf
    #[serde(default)]
    pub auto_submitted: bool,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FactCheck {
    pub claim: String,
    pub verified: bool,
    pub explanation: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiAnalysis {
    pub id: AnalysisId,
    pub argument_id: ArgumentId,
    pub debate_id: DebateId,
    /// 1 to 10
    pub score: u8,
    pub commentary: String,
    #[serde(default)]
    pub fact_checks: Vec<FactCheck>,
    #[serde(default)]
    pub counterpoints: Vec<String>,
    /// Set when the model was unreachable and default values were used
    #[serde(default)]
    pub fallback: bool,
    pub created_at: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn debate() -> Debate {
        Debate {
            id: "d1".to_string(),
            version: 1,
            topic: "Tabs over spaces".to_string(),
            description: None,
            creator_id: "alice".to_string(),
            opponent_id: Some("bob".to_string()),
            creator_side: Side::Con,
            rounds: 3,
            current_round: 1,
            current_turn: Some("alice".to_string()),
            status: DebateStatus::Active,
            creator_ready: true,
            opponent_ready: false,
            turn_deadline: None,
            winner_id: None,
            forfeited_by: None,
            verdict: None,
            created_at: chrono::Utc::now().to_rfc3339(),
            completed_at: None,
        }
    }

    #[test]
    fn test_sides_follow_creator_choice() {
        let d = debate();
        assert_eq!(d.side_of("alice"), Some(Side::Con));
        assert_eq!(d.side_of("bob"), Some(Side::Pro));
        assert_eq!(d.side_of("carol"), None);
        assert_eq!(d.participant_on(Side::Pro), Some(&"bob".to_string()));
        assert_eq!(d.other_participant("bob"), Some(&"alice".to_string()));
        assert!(!d.both_ready());
    }

    #[test]
    fn test_status_wire_format() {
        let json = serde_json::to_string(&DebateStatus::Completed).unwrap();
        assert_eq!(json, "\"COMPLETED\"");
        let side: Side = serde_json::from_str("\"pro\"").unwrap();
        assert_eq!(side, Side::Pro);
    }

    #[test]
    fn test_config_normalizes_round_limits() {
        let config = DebateConfig {
            default_rounds: 5,
            max_rounds: 2,
            ..DebateConfig::default()
        }
        .normalized();
        assert_eq!(config.max_rounds, 2);
        assert_eq!(config.default_rounds, 2);

        let config = DebateConfig {
            default_rounds: 0,
            max_rounds: 0,
            ..DebateConfig::default()
        }
        .normalized();
        assert_eq!(config.max_rounds, 1);
        assert_eq!(config.default_rounds, 1);

        let config = DebateConfig::default().normalized();
        assert_eq!(config.default_rounds, 3);
        assert_eq!(config.max_rounds, 10);
    }
}
