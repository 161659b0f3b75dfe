use super::user::Outcome;
use super::{now, AppState, DebateError, DebateResult};
use crate::moderation;
use crate::types::*;

/// Parameters for opening a new debate
#[derive(Debug, Clone, serde::Deserialize)]
pub struct NewDebate {
    pub topic: String,
    #[serde(default)]
    pub description: Option<String>,
    pub side: Side,
    #[serde(default)]
    pub rounds: Option<u32>,
}

/// Filters for listing debates
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct DebateFilter {
    pub status: Option<DebateStatus>,
    pub user: Option<UserId>,
}

fn require_status(debate: &Debate, expected: DebateStatus) -> DebateResult<()> {
    if debate.status != expected {
        return Err(DebateError::WrongStatus {
            expected,
            actual: debate.status,
        });
    }
    Ok(())
}

impl AppState {
    pub(crate) fn turn_deadline(&self) -> String {
        (chrono::Utc::now() + chrono::Duration::seconds(self.config.turn_seconds as i64))
            .to_rfc3339()
    }

    /// Open a debate in the lobby, waiting for an opponent
    pub async fn create_debate(&self, creator_id: &str, new: NewDebate) -> DebateResult<Debate> {
        if self.get_user(creator_id).await.is_none() {
            return Err(DebateError::NotFound("User".to_string()));
        }

        let topic = new.topic.trim();
        if topic.is_empty() {
            return Err(DebateError::Invalid("topic cannot be empty".to_string()));
        }

        let rounds = new.rounds.unwrap_or(self.config.default_rounds);
        if rounds == 0 || rounds > self.config.max_rounds {
            return Err(DebateError::Invalid(format!(
                "rounds must be between 1 and {}",
                self.config.max_rounds
            )));
        }

        let debate = Debate {
            id: ulid::Ulid::new().to_string(),
            version: 1,
            topic: topic.to_string(),
            description: new
                .description
                .map(|d| d.trim().to_string())
                .filter(|d| !d.is_empty()),
            creator_id: creator_id.to_string(),
            opponent_id: None,
            creator_side: new.side,
            rounds,
            current_round: 1,
            current_turn: None,
            status: DebateStatus::Pending,
            creator_ready: false,
            opponent_ready: false,
            turn_deadline: None,
            winner_id: None,
            forfeited_by: None,
            verdict: None,
            created_at: now(),
            completed_at: None,
        };

        self.debates
            .write()
            .await
            .insert(debate.id.clone(), debate.clone());
        tracing::info!(
            "Debate {} created by {} on {:?} ({} rounds)",
            debate.id,
            creator_id,
            debate.topic,
            rounds
        );
        self.publish_debate(&debate);
        Ok(debate)
    }

    pub async fn get_debate(&self, debate_id: &str) -> Option<Debate> {
        self.debates.read().await.get(debate_id).cloned()
    }

    /// Debates matching the filter, newest first
    pub async fn list_debates(&self, filter: &DebateFilter) -> Vec<Debate> {
        let debates = self.debates.read().await;
        let mut list: Vec<Debate> = debates
            .values()
            .filter(|d| filter.status.is_none_or(|s| d.status == s))
            .filter(|d| {
                filter
                    .user
                    .as_deref()
                    .is_none_or(|u| d.is_participant(u))
            })
            .cloned()
            .collect();
        list.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        list
    }

    /// Take the open seat in a pending debate; the creator speaks first
    pub async fn join_debate(&self, debate_id: &str, user_id: &str) -> DebateResult<Debate> {
        if self.get_user(user_id).await.is_none() {
            return Err(DebateError::NotFound("User".to_string()));
        }

        let mut debates = self.debates.write().await;
        let debate = debates
            .get_mut(debate_id)
            .ok_or_else(|| DebateError::NotFound("Debate".to_string()))?;

        require_status(debate, DebateStatus::Pending)?;
        if debate.creator_id == user_id {
            return Err(DebateError::Forbidden(
                "you cannot join your own debate".to_string(),
            ));
        }

        debate.opponent_id = Some(user_id.to_string());
        debate.status = DebateStatus::Active;
        debate.current_round = 1;
        debate.current_turn = Some(debate.creator_id.clone());
        debate.version += 1;

        let debate = debate.clone();
        drop(debates);

        tracing::info!("User {} joined debate {}", user_id, debate_id);
        self.publish_debate(&debate);
        Ok(debate)
    }

    /// Mark a participant ready; the turn clock starts once both are
    pub async fn set_ready(&self, debate_id: &str, user_id: &str) -> DebateResult<Debate> {
        let mut debates = self.debates.write().await;
        let debate = debates
            .get_mut(debate_id)
            .ok_or_else(|| DebateError::NotFound("Debate".to_string()))?;

        require_status(debate, DebateStatus::Active)?;
        if debate.creator_id == user_id {
            debate.creator_ready = true;
        } else if debate.opponent_id.as_deref() == Some(user_id) {
            debate.opponent_ready = true;
        } else {
            return Err(DebateError::Forbidden(
                "only participants can ready up".to_string(),
            ));
        }

        if debate.both_ready() && debate.current_turn.is_some() && debate.turn_deadline.is_none()
        {
            debate.turn_deadline = Some(self.turn_deadline());
        }
        debate.version += 1;

        let debate = debate.clone();
        drop(debates);

        self.publish_debate(&debate);
        Ok(debate)
    }

    /// Give up an active debate; the other participant wins
    pub async fn forfeit(&self, debate_id: &str, user_id: &str) -> DebateResult<Debate> {
        let mut debates = self.debates.write().await;
        let debate = debates
            .get_mut(debate_id)
            .ok_or_else(|| DebateError::NotFound("Debate".to_string()))?;

        require_status(debate, DebateStatus::Active)?;
        let winner = debate
            .other_participant(user_id)
            .cloned()
            .ok_or_else(|| DebateError::Forbidden("only participants can forfeit".to_string()))?;

        let forfeiting_side = debate.side_of(user_id);
        debate.status = DebateStatus::Completed;
        debate.forfeited_by = Some(user_id.to_string());
        debate.winner_id = Some(winner.clone());
        debate.current_turn = None;
        debate.turn_deadline = None;
        debate.completed_at = Some(now());
        debate.verdict = Some(Verdict {
            winner_side: forfeiting_side.map(Side::opposite),
            reasoning: "The other participant forfeited the debate.".to_string(),
            source: VerdictSource::Forfeit,
        });
        debate.version += 1;

        let debate = debate.clone();
        drop(debates);

        tracing::info!("User {} forfeited debate {}", user_id, debate_id);
        self.clear_drafts(debate_id).await;
        self.record_outcome(&Outcome::Win {
            winner,
            loser: user_id.to_string(),
        })
        .await;
        self.publish_debate(&debate);
        Ok(debate)
    }

    /// Withdraw a debate nobody has joined yet
    pub async fn cancel_debate(&self, debate_id: &str, user_id: &str) -> DebateResult<()> {
        let mut debates = self.debates.write().await;
        let debate = debates
            .get(debate_id)
            .ok_or_else(|| DebateError::NotFound("Debate".to_string()))?;

        if debate.creator_id != user_id {
            return Err(DebateError::Forbidden(
                "only the creator can cancel a debate".to_string(),
            ));
        }
        require_status(debate, DebateStatus::Pending)?;

        debates.remove(debate_id);
        tracing::info!("Debate {} cancelled by creator", debate_id);
        Ok(())
    }

    /// Judge a debate whose rounds are all argued and mark it completed.
    ///
    /// Finalizing an already completed debate returns it unchanged.
    pub async fn finalize_debate(&self, debate_id: &str) -> DebateResult<Debate> {
        let debate = self
            .get_debate(debate_id)
            .await
            .ok_or_else(|| DebateError::NotFound("Debate".to_string()))?;

        if debate.status == DebateStatus::Completed {
            return Ok(debate);
        }
        require_status(&debate, DebateStatus::Active)?;

        let arguments = self.list_arguments(debate_id).await;
        let expected = debate.rounds as usize * 2;
        if debate.current_turn.is_some() || arguments.len() < expected {
            return Err(DebateError::Invalid(format!(
                "debate has {} of {} arguments",
                arguments.len(),
                expected
            )));
        }
        // Every argument is scored before judging, even if its own analysis is still running
        let mut analyses = self.list_analyses(debate_id).await;
        for argument in &arguments {
            if !analyses.iter().any(|a| a.argument_id == argument.id) {
                analyses.push(self.analyze_argument(argument).await?);
            }
        }

        let verdict = moderation::determine_winner(
            self.llm.as_deref(),
            &self.llm_config,
            &debate,
            &arguments,
            &analyses,
        )
        .await;

        let mut debates = self.debates.write().await;
        let stored = debates
            .get_mut(debate_id)
            .ok_or_else(|| DebateError::NotFound("Debate".to_string()))?;

        // A forfeit or a concurrent finalize may have landed while judging
        if stored.status == DebateStatus::Completed {
            return Ok(stored.clone());
        }

        let winner_id = verdict
            .winner_side
            .and_then(|side| stored.participant_on(side).cloned());
        stored.status = DebateStatus::Completed;
        stored.winner_id = winner_id;
        stored.verdict = Some(verdict);
        stored.turn_deadline = None;
        stored.completed_at = Some(now());
        stored.version += 1;

        let debate = stored.clone();
        drop(debates);

        let outcome = match (&debate.winner_id, &debate.opponent_id) {
            (Some(winner), _) => debate.other_participant(winner).map(|loser| Outcome::Win {
                winner: winner.clone(),
                loser: loser.clone(),
            }),
            (None, Some(opponent)) => Some(Outcome::Draw {
                a: debate.creator_id.clone(),
                b: opponent.clone(),
            }),
            (None, None) => None,
        };
        if let Some(outcome) = outcome {
            self.record_outcome(&outcome).await;
        }

        tracing::info!(
            "Debate {} completed, winner: {:?}",
            debate_id,
            debate.winner_id
        );
        self.clear_drafts(debate_id).await;
        self.publish_debate(&debate);
        Ok(debate)
    }
}
