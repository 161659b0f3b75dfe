use super::{now, AppState, DebateError, DebateResult};
use crate::moderation;
use crate::protocol::ServerMessage;
use crate::types::*;

/// Text submitted when a turn times out with no draft saved
pub const TIMEOUT_PLACEHOLDER: &str = "(No argument was submitted before the turn timer ran out.)";

/// Result of an accepted argument
#[derive(Debug, Clone)]
pub struct SubmitOutcome {
    pub argument: Argument,
    /// Debate after the turn/round update
    pub debate: Debate,
    /// True when this argument closed the final round
    pub rounds_complete: bool,
}

impl AppState {
    /// Submit the current turn holder's argument and advance the turn.
    ///
    /// The creator speaks first in every round; after the opponent answers the
    /// round increments, or the turn clears once the final round is argued.
    pub async fn submit_argument(
        &self,
        debate_id: &str,
        author_id: &str,
        content: String,
        expected_version: Option<u64>,
    ) -> DebateResult<SubmitOutcome> {
        self.submit_argument_inner(debate_id, author_id, content, expected_version, false)
            .await
    }

    async fn submit_argument_inner(
        &self,
        debate_id: &str,
        author_id: &str,
        content: String,
        expected_version: Option<u64>,
        auto_submitted: bool,
    ) -> DebateResult<SubmitOutcome> {
        let content = content.trim().to_string();
        if content.is_empty() {
            return Err(DebateError::Invalid("argument cannot be empty".to_string()));
        }
        if content.chars().count() > self.config.max_argument_chars {
            return Err(DebateError::Invalid(format!(
                "argument exceeds {} characters",
                self.config.max_argument_chars
            )));
        }

        // Hold the debate lock across check and mutation so racing clients serialize
        let mut debates = self.debates.write().await;
        let debate = debates
            .get_mut(debate_id)
            .ok_or_else(|| DebateError::NotFound("Debate".to_string()))?;

        if debate.status != DebateStatus::Active {
            return Err(DebateError::WrongStatus {
                expected: DebateStatus::Active,
                actual: debate.status,
            });
        }
        if let Some(sent) = expected_version {
            if sent != debate.version {
                return Err(DebateError::VersionConflict {
                    current: debate.version,
                    sent,
                });
            }
        }
        let side = debate
            .side_of(author_id)
            .ok_or_else(|| DebateError::Forbidden("only participants can argue".to_string()))?;
        if !debate.both_ready() {
            return Err(DebateError::NotReady);
        }
        if debate.current_turn.as_deref() != Some(author_id) {
            return Err(DebateError::NotYourTurn);
        }

        let mut arguments = self.arguments.write().await;
        let round = debate.current_round;
        if arguments
            .values()
            .any(|a| a.debate_id == debate_id && a.round == round && a.side == side)
        {
            return Err(DebateError::DuplicateArgument {
                round,
                side: side.as_str(),
            });
        }

        let argument = Argument {
            id: ulid::Ulid::new().to_string(),
            debate_id: debate_id.to_string(),
            author_id: author_id.to_string(),
            content,
            round,
            side,
            auto_submitted,
            created_at: now(),
        };
        arguments.insert(argument.id.clone(), argument.clone());
        drop(arguments);

        let mut rounds_complete = false;
        if author_id == debate.creator_id {
            debate.current_turn = debate.opponent_id.clone();
        } else if debate.current_round < debate.rounds {
            debate.current_round += 1;
            debate.current_turn = Some(debate.creator_id.clone());
        } else {
            debate.current_turn = None;
            rounds_complete = true;
        }
        debate.turn_deadline = if debate.current_turn.is_some() {
            Some(self.turn_deadline())
        } else {
            None
        };
        debate.version += 1;

        let debate = debate.clone();
        drop(debates);

        self.drafts
            .write()
            .await
            .remove(&(debate_id.to_string(), author_id.to_string()));

        tracing::info!(
            "Argument {} in debate {} (round {}, {}){}",
            argument.id,
            debate_id,
            round,
            side.as_str(),
            if auto_submitted { " [auto]" } else { "" }
        );

        self.publish(
            debate_id,
            ServerMessage::Argument {
                argument: argument.clone(),
            },
        );
        self.publish_debate(&debate);

        Ok(SubmitOutcome {
            argument,
            debate,
            rounds_complete,
        })
    }

    /// Arguments of a debate in speaking order
    pub async fn list_arguments(&self, debate_id: &str) -> Vec<Argument> {
        let mut list: Vec<Argument> = self
            .arguments
            .read()
            .await
            .values()
            .filter(|a| a.debate_id == debate_id)
            .cloned()
            .collect();
        list.sort_by(|a, b| {
            a.round
                .cmp(&b.round)
                .then_with(|| a.created_at.cmp(&b.created_at))
        });
        list
    }

    pub async fn list_analyses(&self, debate_id: &str) -> Vec<AiAnalysis> {
        let mut list: Vec<AiAnalysis> = self
            .analyses
            .read()
            .await
            .values()
            .filter(|a| a.debate_id == debate_id)
            .cloned()
            .collect();
        list.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        list
    }

    /// Store the turn holder's in-progress text for auto-submission
    pub async fn save_draft(&self, debate_id: &str, user_id: &str, text: String) -> DebateResult<()> {
        let debate = self
            .get_debate(debate_id)
            .await
            .ok_or_else(|| DebateError::NotFound("Debate".to_string()))?;
        if debate.status != DebateStatus::Active {
            return Err(DebateError::WrongStatus {
                expected: DebateStatus::Active,
                actual: debate.status,
            });
        }
        if !debate.is_participant(user_id) {
            return Err(DebateError::Forbidden(
                "only participants can save drafts".to_string(),
            ));
        }

        self.drafts
            .write()
            .await
            .insert((debate_id.to_string(), user_id.to_string()), text);
        Ok(())
    }

    pub(crate) async fn clear_drafts(&self, debate_id: &str) {
        self.drafts
            .write()
            .await
            .retain(|(d, _), _| d != debate_id);
    }

    /// Auto-submit for every active debate whose turn deadline has passed
    pub async fn expire_turns(&self) -> Vec<SubmitOutcome> {
        let now = chrono::Utc::now();
        let expired: Vec<(DebateId, UserId)> = self
            .debates
            .read()
            .await
            .values()
            .filter(|d| d.status == DebateStatus::Active)
            .filter_map(|d| {
                let holder = d.current_turn.clone()?;
                let deadline = d.turn_deadline.as_deref()?;
                let deadline = chrono::DateTime::parse_from_rfc3339(deadline).ok()?;
                (deadline < now).then(|| (d.id.clone(), holder))
            })
            .collect();

        let mut outcomes = Vec::new();
        for (debate_id, user_id) in expired {
            let draft = self
                .drafts
                .read()
                .await
                .get(&(debate_id.clone(), user_id.clone()))
                .cloned()
                .filter(|t| !t.trim().is_empty())
                .unwrap_or_else(|| TIMEOUT_PLACEHOLDER.to_string());

            // Drafts may exceed the limit; keep what fits
            let draft: String = draft.chars().take(self.config.max_argument_chars).collect();

            match self
                .submit_argument_inner(&debate_id, &user_id, draft, None, true)
                .await
            {
                Ok(outcome) => {
                    tracing::info!("Turn timer expired in debate {}, auto-submitted", debate_id);
                    outcomes.push(outcome);
                }
                // Another submission can land between the scan and the submit
                Err(e) => tracing::debug!("Auto-submit skipped for {}: {}", debate_id, e),
            }
        }
        outcomes
    }

    /// Analyze an accepted argument and store the result (falls back on AI failure).
    ///
    /// Each argument keeps its first stored analysis; later calls return it.
    pub async fn analyze_argument(&self, argument: &Argument) -> DebateResult<AiAnalysis> {
        let debate = self
            .get_debate(&argument.debate_id)
            .await
            .ok_or_else(|| DebateError::NotFound("Debate".to_string()))?;
        let history: Vec<Argument> = self
            .list_arguments(&argument.debate_id)
            .await
            .into_iter()
            .filter(|a| a.id != argument.id)
            .collect();

        let draft = moderation::analyze_argument(
            self.llm.as_deref(),
            &self.llm_config,
            &debate,
            argument,
            &history,
        )
        .await;

        let analysis = AiAnalysis {
            id: ulid::Ulid::new().to_string(),
            argument_id: argument.id.clone(),
            debate_id: argument.debate_id.clone(),
            score: draft.score,
            commentary: draft.commentary,
            fact_checks: draft.fact_checks,
            counterpoints: draft.counterpoints,
            fallback: draft.fallback,
            created_at: now(),
        };

        let mut analyses = self.analyses.write().await;
        // Judging may have analyzed this argument while the model was answering
        if let Some(existing) = analyses
            .values()
            .find(|a| a.argument_id == argument.id)
            .cloned()
        {
            return Ok(existing);
        }
        analyses.insert(analysis.id.clone(), analysis.clone());
        drop(analyses);

        self.publish(
            &argument.debate_id,
            ServerMessage::Analysis {
                analysis: analysis.clone(),
            },
        );
        Ok(analysis)
    }

    /// Run everything that follows an accepted argument: analysis, then judgment
    /// once the final round is argued
    pub async fn process_submission(&self, outcome: SubmitOutcome) {
        if let Err(e) = self.analyze_argument(&outcome.argument).await {
            tracing::error!("Failed to analyze argument {}: {}", outcome.argument.id, e);
        }
        if outcome.rounds_complete {
            if let Err(e) = self.finalize_debate(&outcome.debate.id).await {
                tracing::error!("Failed to finalize debate {}: {}", outcome.debate.id, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{
        GenerateRequest, GenerateResponse, LlmConfig, LlmManager, LlmProvider, LlmResult,
        ResponseMetadata,
    };
    use crate::state::debate::NewDebate;
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::time::Duration;

    /// Scores PRO arguments 9 (after `pro_delay`) and CON arguments 4, and
    /// answers the judging prompt with `verdict`
    struct ScriptedModel {
        verdict: &'static str,
        pro_delay: Duration,
    }

    #[async_trait]
    impl LlmProvider for ScriptedModel {
        async fn generate(&self, request: GenerateRequest) -> LlmResult<GenerateResponse> {
            let text = if request.prompt.ends_with("Who won?") {
                self.verdict.to_string()
            } else if request.prompt.contains("arguing PRO):") {
                tokio::time::sleep(self.pro_delay).await;
                r#"{"score": 9, "commentary": "Well sourced.",
                    "fact_checks": [{"claim": "Commutes average 27 minutes", "verified": true, "explanation": "Census data"}],
                    "counterpoints": ["Mentoring suffers remotely"]}"#
                    .to_string()
            } else {
                r#"{"score": "4/10", "commentary": "Mostly anecdote."}"#.to_string()
            };
            Ok(GenerateResponse {
                text,
                metadata: ResponseMetadata {
                    provider: "scripted".to_string(),
                    model: "test".to_string(),
                    tokens_used: None,
                    latency_ms: 0,
                },
            })
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    fn state_with_model(verdict: &'static str, pro_delay: Duration) -> AppState {
        let manager = LlmManager::new(vec![Box::new(ScriptedModel { verdict, pro_delay })]);
        AppState::new_with_llm(
            Some(manager),
            LlmConfig::default(),
            DebateConfig::default(),
        )
    }

    /// Two ready participants in an active debate; returns (debate, creator, opponent)
    async fn active_debate(state: &AppState, rounds: u32) -> (Debate, User, User) {
        let a = state
            .create_user("alice@example.com".to_string(), Some("Alice".to_string()))
            .await
            .unwrap();
        let b = state
            .create_user("bob@example.com".to_string(), Some("Bob".to_string()))
            .await
            .unwrap();
        let debate = state
            .create_debate(
                &a.id,
                NewDebate {
                    topic: "Remote work beats the office".to_string(),
                    description: None,
                    side: Side::Pro,
                    rounds: Some(rounds),
                },
            )
            .await
            .unwrap();
        state.join_debate(&debate.id, &b.id).await.unwrap();
        state.set_ready(&debate.id, &a.id).await.unwrap();
        let debate = state.set_ready(&debate.id, &b.id).await.unwrap();
        (debate, a, b)
    }

    #[tokio::test]
    async fn test_turns_alternate_and_rounds_increment() {
        let state = AppState::new();
        let (debate, a, b) = active_debate(&state, 2).await;

        let out = state
            .submit_argument(&debate.id, &a.id, "No commute.".to_string(), None)
            .await
            .unwrap();
        assert_eq!(out.argument.round, 1);
        assert_eq!(out.argument.side, Side::Pro);
        assert_eq!(out.debate.current_round, 1);
        assert_eq!(out.debate.current_turn.as_deref(), Some(b.id.as_str()));

        let out = state
            .submit_argument(&debate.id, &b.id, "Less collaboration.".to_string(), None)
            .await
            .unwrap();
        assert_eq!(out.debate.current_round, 2);
        assert_eq!(out.debate.current_turn.as_deref(), Some(a.id.as_str()));
        assert!(!out.rounds_complete);

        state
            .submit_argument(&debate.id, &a.id, "Async tools.".to_string(), None)
            .await
            .unwrap();
        let out = state
            .submit_argument(&debate.id, &b.id, "Loneliness.".to_string(), None)
            .await
            .unwrap();
        assert!(out.rounds_complete);
        assert_eq!(out.debate.current_round, 2);
        assert!(out.debate.current_turn.is_none());
        assert!(out.debate.turn_deadline.is_none());
        assert_eq!(state.list_arguments(&debate.id).await.len(), 4);
    }

    #[tokio::test]
    async fn test_out_of_turn_rejected() {
        let state = AppState::new();
        let (debate, _a, b) = active_debate(&state, 1).await;

        let result = state
            .submit_argument(&debate.id, &b.id, "Me first!".to_string(), None)
            .await;
        assert_eq!(result.unwrap_err(), DebateError::NotYourTurn);
    }

    #[tokio::test]
    async fn test_submission_requires_ready() {
        let state = AppState::new();
        let a = state
            .create_user("a@example.com".to_string(), None)
            .await
            .unwrap();
        let b = state
            .create_user("b@example.com".to_string(), None)
            .await
            .unwrap();
        let debate = state
            .create_debate(
                &a.id,
                NewDebate {
                    topic: "Cats".to_string(),
                    description: None,
                    side: Side::Con,
                    rounds: Some(1),
                },
            )
            .await
            .unwrap();
        state.join_debate(&debate.id, &b.id).await.unwrap();

        let result = state
            .submit_argument(&debate.id, &a.id, "Too early".to_string(), None)
            .await;
        assert_eq!(result.unwrap_err(), DebateError::NotReady);
    }

    #[tokio::test]
    async fn test_stale_version_rejected() {
        let state = AppState::new();
        let (debate, a, _b) = active_debate(&state, 1).await;

        let result = state
            .submit_argument(
                &debate.id,
                &a.id,
                "Old view".to_string(),
                Some(debate.version - 1),
            )
            .await;
        assert!(matches!(result, Err(DebateError::VersionConflict { .. })));

        let result = state
            .submit_argument(&debate.id, &a.id, "Fresh".to_string(), Some(debate.version))
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_empty_and_oversized_rejected() {
        let state = AppState::new();
        let (debate, a, _b) = active_debate(&state, 1).await;

        let result = state
            .submit_argument(&debate.id, &a.id, "   ".to_string(), None)
            .await;
        assert!(matches!(result, Err(DebateError::Invalid(_))));

        let long = "x".repeat(state.config.max_argument_chars + 1);
        let result = state.submit_argument(&debate.id, &a.id, long, None).await;
        assert!(matches!(result, Err(DebateError::Invalid(_))));
    }

    #[tokio::test]
    async fn test_concurrent_submissions_accept_exactly_one() {
        let state = AppState::new();
        let (debate, a, _b) = active_debate(&state, 1).await;

        let s1 = state.clone();
        let s2 = state.clone();
        let (d1, d2) = (debate.id.clone(), debate.id.clone());
        let (u1, u2) = (a.id.clone(), a.id.clone());
        let (r1, r2) = tokio::join!(
            tokio::spawn(async move { s1.submit_argument(&d1, &u1, "tab one".to_string(), None).await }),
            tokio::spawn(async move { s2.submit_argument(&d2, &u2, "tab two".to_string(), None).await }),
        );

        let ok = [r1.unwrap(), r2.unwrap()]
            .into_iter()
            .filter(|r| r.is_ok())
            .count();
        assert_eq!(ok, 1);
        assert_eq!(state.list_arguments(&debate.id).await.len(), 1);
    }

    #[tokio::test]
    async fn test_analysis_falls_back_without_llm() {
        let state = AppState::new();
        let (debate, a, _b) = active_debate(&state, 1).await;
        let out = state
            .submit_argument(&debate.id, &a.id, "Evidence says so.".to_string(), None)
            .await
            .unwrap();

        let analysis = state.analyze_argument(&out.argument).await.unwrap();
        assert!(analysis.fallback);
        assert_eq!(analysis.score, 5);
        assert_eq!(analysis.argument_id, out.argument.id);
        assert_eq!(state.list_analyses(&debate.id).await.len(), 1);
    }

    #[tokio::test]
    async fn test_process_submission_completes_final_round() {
        let state = AppState::new();
        let (debate, a, b) = active_debate(&state, 1).await;

        let out = state
            .submit_argument(&debate.id, &a.id, "Opening.".to_string(), None)
            .await
            .unwrap();
        state.process_submission(out).await;
        let out = state
            .submit_argument(&debate.id, &b.id, "Rebuttal.".to_string(), None)
            .await
            .unwrap();
        state.process_submission(out).await;

        let done = state.get_debate(&debate.id).await.unwrap();
        assert_eq!(done.status, DebateStatus::Completed);
        // Both fallback analyses score 5, so the averages tie
        let verdict = done.verdict.unwrap();
        assert_eq!(verdict.source, VerdictSource::Fallback);
        assert!(verdict.winner_side.is_none());
        assert!(done.winner_id.is_none());
        assert_eq!(state.get_user(&a.id).await.unwrap().stats.draws, 1);

        // Finalizing again is a no-op
        let again = state.finalize_debate(&debate.id).await.unwrap();
        assert_eq!(again.version, done.version);
        assert_eq!(state.get_user(&b.id).await.unwrap().stats.debates, 1);
    }

    #[tokio::test]
    async fn test_expired_turn_submits_draft() {
        let state = AppState::new();
        let (debate, a, b) = active_debate(&state, 1).await;

        state
            .save_draft(&debate.id, &a.id, "Half-finished thought".to_string())
            .await
            .unwrap();
        state
            .debates
            .write()
            .await
            .get_mut(&debate.id)
            .unwrap()
            .turn_deadline = Some((chrono::Utc::now() - chrono::Duration::seconds(1)).to_rfc3339());

        let outcomes = state.expire_turns().await;
        assert_eq!(outcomes.len(), 1);
        assert!(outcomes[0].argument.auto_submitted);
        assert_eq!(outcomes[0].argument.content, "Half-finished thought");
        assert_eq!(outcomes[0].debate.current_turn.as_deref(), Some(b.id.as_str()));

        // Fresh deadline for the opponent, nothing else expires yet
        assert!(state.expire_turns().await.is_empty());
    }

    #[tokio::test]
    async fn test_expired_turn_without_draft_uses_placeholder() {
        let state = AppState::new();
        let (debate, _a, _b) = active_debate(&state, 1).await;
        state
            .debates
            .write()
            .await
            .get_mut(&debate.id)
            .unwrap()
            .turn_deadline = Some((chrono::Utc::now() - chrono::Duration::seconds(5)).to_rfc3339());

        let outcomes = state.expire_turns().await;
        assert_eq!(outcomes[0].argument.content, TIMEOUT_PLACEHOLDER);
    }

    #[tokio::test]
    async fn test_save_draft_requires_participant() {
        let state = AppState::new();
        let (debate, _a, _b) = active_debate(&state, 1).await;
        let result = state
            .save_draft(&debate.id, "stranger", "hi".to_string())
            .await;
        assert!(matches!(result, Err(DebateError::Forbidden(_))));
    }

    #[tokio::test]
    async fn test_ai_verdict_decides_winner() {
        let state = state_with_model(
            r#"{"winner": "con", "reasoning": "Sharper rebuttals."}"#,
            Duration::ZERO,
        );
        let (debate, a, b) = active_debate(&state, 1).await;

        let out = state
            .submit_argument(&debate.id, &a.id, "No commute.".to_string(), None)
            .await
            .unwrap();
        state.process_submission(out).await;
        let out = state
            .submit_argument(&debate.id, &b.id, "Teams drift apart.".to_string(), None)
            .await
            .unwrap();
        state.process_submission(out).await;

        let done = state.get_debate(&debate.id).await.unwrap();
        assert_eq!(done.status, DebateStatus::Completed);
        assert_eq!(done.winner_id.as_deref(), Some(b.id.as_str()));
        let verdict = done.verdict.unwrap();
        assert_eq!(verdict.source, VerdictSource::Ai);
        assert_eq!(verdict.winner_side, Some(Side::Con));
        assert_eq!(verdict.reasoning, "Sharper rebuttals.");

        let analyses = state.list_analyses(&debate.id).await;
        assert_eq!(analyses.len(), 2);
        assert!(analyses.iter().all(|an| !an.fallback));
        let pro = analyses.iter().find(|an| an.score == 9).unwrap();
        assert_eq!(pro.fact_checks.len(), 1);
        assert!(pro.fact_checks[0].verified);
        assert_eq!(pro.counterpoints, vec!["Mentoring suffers remotely".to_string()]);
        assert!(analyses.iter().any(|an| an.score == 4));

        let winner = state.get_user(&b.id).await.unwrap();
        assert_eq!(winner.stats.wins, 1);
        assert_eq!(winner.stats.points, 10);
        let loser = state.get_user(&a.id).await.unwrap();
        assert_eq!(loser.stats.losses, 1);
        assert_eq!(loser.stats.points, 0);
    }

    #[tokio::test]
    async fn test_judging_waits_for_slow_analysis() {
        // Unparseable verdict forces the score-average fallback
        let state = Arc::new(state_with_model(
            "I think it was close.",
            Duration::from_millis(300),
        ));
        let (debate, a, b) = active_debate(&state, 1).await;

        let out = state
            .submit_argument(&debate.id, &a.id, "No commute.".to_string(), None)
            .await
            .unwrap();
        let slow = {
            let state = state.clone();
            tokio::spawn(async move { state.process_submission(out).await })
        };

        let out = state
            .submit_argument(&debate.id, &b.id, "Teams drift apart.".to_string(), None)
            .await
            .unwrap();
        state.process_submission(out).await;

        let done = state.get_debate(&debate.id).await.unwrap();
        assert_eq!(done.status, DebateStatus::Completed);
        let verdict = done.verdict.unwrap();
        assert_eq!(verdict.source, VerdictSource::Fallback);
        assert_eq!(verdict.winner_side, Some(Side::Pro));
        assert_eq!(done.winner_id.as_deref(), Some(a.id.as_str()));

        // The late analysis does not add a second record for the same argument
        slow.await.unwrap();
        let analyses = state.list_analyses(&debate.id).await;
        assert_eq!(analyses.len(), 2);
        let mut scores: Vec<u8> = analyses.iter().map(|an| an.score).collect();
        scores.sort();
        assert_eq!(scores, vec![4, 9]);
    }
}
