use super::{now, AppState, DebateError, DebateResult};
use crate::types::*;
use rand::Rng;

/// Session tokens are long random strings over an unambiguous alphabet
const TOKEN_CHARS: &[u8] = b"ABCDEFGHJKMNPQRSTUVWXYZabcdefghjkmnpqrstuvwxyz23456789";
const TOKEN_LENGTH: usize = 32;

const WIN_POINTS: u32 = 10;
const DRAW_POINTS: u32 = 3;

fn generate_token() -> String {
    let mut rng = rand::rng();
    (0..TOKEN_LENGTH)
        .map(|_| TOKEN_CHARS[rng.random_range(0..TOKEN_CHARS.len())] as char)
        .collect()
}

/// Fields a user may change on their own profile
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct ProfileUpdate {
    pub display_name: Option<String>,
    pub bio: Option<String>,
    pub avatar_url: Option<String>,
}

/// How a completed debate ended for the participants
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Win { winner: UserId, loser: UserId },
    Draw { a: UserId, b: UserId },
}

impl AppState {
    /// Sign up a new user and issue their session token
    pub async fn create_user(
        &self,
        email: String,
        display_name: Option<String>,
    ) -> DebateResult<User> {
        let email = email.trim().to_lowercase();
        if email.is_empty() || !email.contains('@') {
            return Err(DebateError::Invalid("a valid email is required".to_string()));
        }

        let mut users = self.users.write().await;
        if users.values().any(|u| u.email == email) {
            return Err(DebateError::Invalid("email already registered".to_string()));
        }

        let display_name = display_name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| petname::petname(2, " ").unwrap_or_else(|| "Debater".to_string()));

        let token = loop {
            let t = generate_token();
            if !users.values().any(|u| u.token == t) {
                break t;
            }
        };

        let user = User {
            id: ulid::Ulid::new().to_string(),
            email,
            display_name,
            bio: None,
            avatar_url: None,
            token,
            stats: UserStats::default(),
            created_at: now(),
        };
        users.insert(user.id.clone(), user.clone());
        tracing::info!("Created user {} ({})", user.id, user.display_name);
        Ok(user)
    }

    pub async fn get_user(&self, user_id: &str) -> Option<User> {
        self.users.read().await.get(user_id).cloned()
    }

    pub async fn get_user_by_token(&self, token: &str) -> Option<User> {
        self.users
            .read()
            .await
            .values()
            .find(|u| u.token == token)
            .cloned()
    }

    pub async fn update_profile(&self, user_id: &str, update: ProfileUpdate) -> DebateResult<User> {
        let mut users = self.users.write().await;
        let user = users
            .get_mut(user_id)
            .ok_or_else(|| DebateError::NotFound("User".to_string()))?;

        if let Some(name) = update.display_name {
            let name = name.trim();
            if name.is_empty() {
                return Err(DebateError::Invalid("display name cannot be empty".to_string()));
            }
            user.display_name = name.to_string();
        }
        if let Some(bio) = update.bio {
            user.bio = Some(bio.trim().to_string()).filter(|b| !b.is_empty());
        }
        if let Some(url) = update.avatar_url {
            user.avatar_url = Some(url.trim().to_string()).filter(|u| !u.is_empty());
        }
        Ok(user.clone())
    }

    /// Users ranked by wins, then points
    pub async fn leaderboard(&self) -> Vec<PublicUser> {
        let users = self.users.read().await;
        let mut ranked: Vec<PublicUser> = users.values().map(PublicUser::from).collect();
        ranked.sort_by(|a, b| {
            b.stats
                .wins
                .cmp(&a.stats.wins)
                .then(b.stats.points.cmp(&a.stats.points))
                .then(a.display_name.cmp(&b.display_name))
        });
        ranked
    }

    /// Apply win/loss/draw statistics for a finished debate
    pub(crate) async fn record_outcome(&self, outcome: &Outcome) {
        let mut users = self.users.write().await;
        match outcome {
            Outcome::Win { winner, loser } => {
                if let Some(u) = users.get_mut(winner) {
                    u.stats.wins += 1;
                    u.stats.points += WIN_POINTS;
                    u.stats.debates += 1;
                }
                if let Some(u) = users.get_mut(loser) {
                    u.stats.losses += 1;
                    u.stats.debates += 1;
                }
            }
            Outcome::Draw { a, b } => {
                for id in [a, b] {
                    if let Some(u) = users.get_mut(id) {
                        u.stats.draws += 1;
                        u.stats.points += DRAW_POINTS;
                        u.stats.debates += 1;
                    }
                }
            }
        }
    }
}
