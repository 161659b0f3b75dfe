//! AI moderation: argument analysis, fact-checking, and winner determination.
//!
//! Prompts ask the model for a JSON object. Replies are parsed leniently
//! (code fences, surrounding chatter, numbers as strings) and any failure
//! degrades to fixed defaults so a debate never stalls on the model.

use crate::llm::{GenerateRequest, LlmConfig, LlmError, LlmManager, LlmResult};
use crate::types::*;
use serde::Deserialize;
use serde_json::Value;

pub const FALLBACK_SCORE: u8 = 5;
pub const FALLBACK_COMMENTARY: &str = "AI analysis is currently unavailable.";

const ANALYSIS_SYSTEM_PROMPT: &str = r#"You are an impartial debate moderator and fact-checker.
Evaluate a single argument from a structured debate.

Respond with ONLY a JSON object of this shape:
{
  "score": <integer 1-10 for logic, evidence and relevance>,
  "commentary": "<two or three sentences of critique>",
  "fact_checks": [{"claim": "<factual claim>", "verified": <true|false>, "explanation": "<why>"}],
  "counterpoints": ["<a point the other side could raise>"]
}
Use an empty list when there are no factual claims."#;

const WINNER_SYSTEM_PROMPT: &str = r#"You are the judge of a structured debate.
Weigh both sides on reasoning, evidence, and how well they answered each other.

Respond with ONLY a JSON object of this shape:
{"winner": "pro" | "con" | "draw", "reasoning": "<a short paragraph>"}"#;

/// Analysis values before they are attached to a stored argument
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisDraft {
    pub score: u8,
    pub commentary: String,
    pub fact_checks: Vec<FactCheck>,
    pub counterpoints: Vec<String>,
    pub fallback: bool,
}

pub fn fallback_analysis() -> AnalysisDraft {
    AnalysisDraft {
        score: FALLBACK_SCORE,
        commentary: FALLBACK_COMMENTARY.to_string(),
        fact_checks: Vec::new(),
        counterpoints: Vec::new(),
        fallback: true,
    }
}

fn transcript(debate: &Debate, arguments: &[Argument]) -> String {
    let mut out = String::new();
    for arg in arguments {
        let speaker = if arg.author_id == debate.creator_id {
            "creator"
        } else {
            "opponent"
        };
        out.push_str(&format!(
            "[Round {} | {} | {}]\n{}\n\n",
            arg.round,
            arg.side.as_str().to_uppercase(),
            speaker,
            arg.content
        ));
    }
    out
}

pub fn analysis_prompt(debate: &Debate, argument: &Argument, history: &[Argument]) -> String {
    let mut prompt = format!("Debate topic: {}\n", debate.topic);
    if let Some(description) = &debate.description {
        prompt.push_str(&format!("Context: {}\n", description));
    }
    prompt.push_str(&format!(
        "Rounds: {}\n\n",
        debate.rounds
    ));
    if !history.is_empty() {
        prompt.push_str("Previous arguments:\n");
        prompt.push_str(&transcript(debate, history));
    }
    prompt.push_str(&format!(
        "Argument to evaluate (round {}, arguing {}):\n{}",
        argument.round,
        argument.side.as_str().to_uppercase(),
        argument.content
    ));
    prompt
}

pub fn winner_prompt(debate: &Debate, arguments: &[Argument], analyses: &[AiAnalysis]) -> String {
    let mut prompt = format!("Debate topic: {}\n", debate.topic);
    if let Some(description) = &debate.description {
        prompt.push_str(&format!("Context: {}\n", description));
    }
    prompt.push_str(&format!("Rounds: {}\n\nTranscript:\n", debate.rounds));
    prompt.push_str(&transcript(debate, arguments));

    if !analyses.is_empty() {
        prompt.push_str("Moderator scores so far:\n");
        for arg in arguments {
            if let Some(a) = analyses.iter().find(|a| a.argument_id == arg.id) {
                prompt.push_str(&format!(
                    "- Round {} {}: {}/10\n",
                    arg.round,
                    arg.side.as_str().to_uppercase(),
                    a.score
                ));
            }
        }
    }
    prompt.push_str("\nWho won?");
    prompt
}

/// Pull the outermost JSON object out of a model reply
pub fn extract_json(text: &str) -> LlmResult<Value> {
    let trimmed = text.trim();
    let unfenced = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .map(|rest| rest.trim_end().trim_end_matches("```"))
        .unwrap_or(trimmed);

    if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(unfenced) {
        return Ok(value);
    }

    let start = unfenced
        .find('{')
        .ok_or_else(|| LlmError::ParseError("no JSON object in reply".to_string()))?;
    let end = unfenced
        .rfind('}')
        .filter(|&end| end > start)
        .ok_or_else(|| LlmError::ParseError("unterminated JSON object".to_string()))?;

    serde_json::from_str(&unfenced[start..=end]).map_err(|e| LlmError::ParseError(e.to_string()))
}

/// Accept 7, 7.4, or "7/10"; clamp to 1..=10
fn lenient_score(value: &Value) -> Option<u8> {
    let n = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.split('/').next()?.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    // "NaN" and "inf" parse as floats but are not scores
    if !n.is_finite() {
        return None;
    }
    Some(n.round().clamp(1.0, 10.0) as u8)
}

fn lenient_bool(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => matches!(s.to_lowercase().as_str(), "true" | "yes" | "verified"),
        _ => false,
    }
}

pub fn parse_analysis(text: &str) -> LlmResult<AnalysisDraft> {
    let value = extract_json(text)?;

    let score = value
        .get("score")
        .and_then(lenient_score)
        .ok_or_else(|| LlmError::ParseError("missing or invalid score".to_string()))?;

    let commentary = value
        .get("commentary")
        .or_else(|| value.get("feedback"))
        .and_then(Value::as_str)
        .map(|s| s.trim().to_string())
        .unwrap_or_default();

    let fact_checks = value
        .get("fact_checks")
        .or_else(|| value.get("factChecks"))
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| {
                    let claim = item.get("claim")?.as_str()?.trim().to_string();
                    Some(FactCheck {
                        claim,
                        verified: lenient_bool(item.get("verified")),
                        explanation: item
                            .get("explanation")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .trim()
                            .to_string(),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    let counterpoints = value
        .get("counterpoints")
        .or_else(|| value.get("suggested_counterpoints"))
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default();

    Ok(AnalysisDraft {
        score,
        commentary,
        fact_checks,
        counterpoints,
        fallback: false,
    })
}

#[derive(Debug, Deserialize)]
struct WinnerReply {
    winner: String,
    #[serde(default, alias = "explanation")]
    reasoning: String,
}

pub fn parse_winner(text: &str) -> LlmResult<Verdict> {
    let reply: WinnerReply = serde_json::from_value(extract_json(text)?)
        .map_err(|e| LlmError::ParseError(e.to_string()))?;

    let winner_side = match reply.winner.trim().to_lowercase().as_str() {
        "pro" => Some(Side::Pro),
        "con" => Some(Side::Con),
        "draw" | "tie" | "none" => None,
        other => {
            return Err(LlmError::ParseError(format!("unknown winner {:?}", other)));
        }
    };

    Ok(Verdict {
        winner_side,
        reasoning: reply.reasoning.trim().to_string(),
        source: VerdictSource::Ai,
    })
}

/// Average each side's scores; the higher average wins, equal averages draw
pub fn fallback_winner(arguments: &[Argument], analyses: &[AiAnalysis]) -> Verdict {
    let average = |side: Side| -> f64 {
        let scores: Vec<f64> = arguments
            .iter()
            .filter(|a| a.side == side)
            .filter_map(|a| analyses.iter().find(|an| an.argument_id == a.id))
            .map(|an| an.score as f64)
            .collect();
        if scores.is_empty() {
            0.0
        } else {
            scores.iter().sum::<f64>() / scores.len() as f64
        }
    };

    let (pro, con) = (average(Side::Pro), average(Side::Con));
    let winner_side = if (pro - con).abs() < f64::EPSILON {
        None
    } else if pro > con {
        Some(Side::Pro)
    } else {
        Some(Side::Con)
    };

    Verdict {
        winner_side,
        reasoning: format!(
            "Decided by average argument score (pro {:.1}, con {:.1}).",
            pro, con
        ),
        source: VerdictSource::Fallback,
    }
}

/// Ask the model to analyze an argument, or fall back to defaults
pub async fn analyze_argument(
    llm: Option<&LlmManager>,
    config: &LlmConfig,
    debate: &Debate,
    argument: &Argument,
    history: &[Argument],
) -> AnalysisDraft {
    let Some(llm) = llm else {
        tracing::debug!("No LLM configured, using fallback analysis");
        return fallback_analysis();
    };

    let request = GenerateRequest {
        system: ANALYSIS_SYSTEM_PROMPT.to_string(),
        prompt: analysis_prompt(debate, argument, history),
        max_tokens: Some(config.default_max_tokens),
        timeout: config.default_timeout,
        json: true,
    };

    match llm.generate(request).await.and_then(|r| parse_analysis(&r.text)) {
        Ok(draft) => draft,
        Err(e) => {
            tracing::warn!("Analysis of argument {} failed: {}", argument.id, e);
            fallback_analysis()
        }
    }
}

/// Ask the model for a winner, or average the analysis scores
pub async fn determine_winner(
    llm: Option<&LlmManager>,
    config: &LlmConfig,
    debate: &Debate,
    arguments: &[Argument],
    analyses: &[AiAnalysis],
) -> Verdict {
    let Some(llm) = llm else {
        return fallback_winner(arguments, analyses);
    };

    let request = GenerateRequest {
        system: WINNER_SYSTEM_PROMPT.to_string(),
        prompt: winner_prompt(debate, arguments, analyses),
        max_tokens: Some(config.default_max_tokens),
        timeout: config.default_timeout,
        json: true,
    };

    match llm.generate(request).await.and_then(|r| parse_winner(&r.text)) {
        Ok(verdict) => verdict,
        Err(e) => {
            tracing::warn!("Winner determination for {} failed: {}", debate.id, e);
            fallback_winner(arguments, analyses)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argument(id: &str, side: Side, round: u32) -> Argument {
        Argument {
            id: id.to_string(),
            debate_id: "d1".to_string(),
            author_id: if side == Side::Pro { "alice" } else { "bob" }.to_string(),
            content: format!("{} argument", side.as_str()),
            round,
            side,
            auto_submitted: false,
            created_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    fn analysis(argument_id: &str, score: u8) -> AiAnalysis {
        AiAnalysis {
            id: format!("an-{}", argument_id),
            argument_id: argument_id.to_string(),
            debate_id: "d1".to_string(),
            score,
            commentary: String::new(),
            fact_checks: Vec::new(),
            counterpoints: Vec::new(),
            fallback: false,
            created_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    #[test]
    fn test_parse_analysis_in_code_fence() {
        let reply = "```json\n{\"score\": 8, \"commentary\": \"Solid.\", \"fact_checks\": [{\"claim\": \"Water boils at 100C\", \"verified\": true, \"explanation\": \"At sea level.\"}], \"counterpoints\": [\"Altitude\"]}\n```";
        let draft = parse_analysis(reply).unwrap();
        assert_eq!(draft.score, 8);
        assert_eq!(draft.commentary, "Solid.");
        assert_eq!(draft.fact_checks.len(), 1);
        assert!(draft.fact_checks[0].verified);
        assert_eq!(draft.counterpoints, vec!["Altitude".to_string()]);
        assert!(!draft.fallback);
    }

    #[test]
    fn test_parse_analysis_with_chatter_and_string_score() {
        let reply = "Sure! Here you go: {\"score\": \"7/10\", \"feedback\": \"Decent\"} Hope that helps.";
        let draft = parse_analysis(reply).unwrap();
        assert_eq!(draft.score, 7);
        assert_eq!(draft.commentary, "Decent");
        assert!(draft.fact_checks.is_empty());
    }

    #[test]
    fn test_parse_analysis_clamps_score() {
        assert_eq!(parse_analysis("{\"score\": 14}").unwrap().score, 10);
        assert_eq!(parse_analysis("{\"score\": 0.2}").unwrap().score, 1);
        assert!(parse_analysis("{\"score\": \"NaN\"}").is_err());
        assert!(parse_analysis("{\"score\": \"-inf\"}").is_err());
    }

    #[test]
    fn test_parse_analysis_rejects_garbage() {
        assert!(parse_analysis("I cannot evaluate this.").is_err());
        assert!(parse_analysis("{\"commentary\": \"no score\"}").is_err());
    }

    #[test]
    fn test_parse_winner() {
        let v = parse_winner("{\"winner\": \"Con\", \"reasoning\": \"Better evidence\"}").unwrap();
        assert_eq!(v.winner_side, Some(Side::Con));
        assert_eq!(v.source, VerdictSource::Ai);

        let v = parse_winner("{\"winner\": \"tie\", \"explanation\": \"Even\"}").unwrap();
        assert!(v.winner_side.is_none());
        assert_eq!(v.reasoning, "Even");

        assert!(parse_winner("{\"winner\": \"alice\"}").is_err());
    }

    #[test]
    fn test_fallback_winner_averages_scores() {
        let args = vec![
            argument("a1", Side::Pro, 1),
            argument("b1", Side::Con, 1),
            argument("a2", Side::Pro, 2),
            argument("b2", Side::Con, 2),
        ];
        let analyses = vec![
            analysis("a1", 6),
            analysis("b1", 9),
            analysis("a2", 7),
            analysis("b2", 5),
        ];
        let v = fallback_winner(&args, &analyses);
        assert_eq!(v.winner_side, Some(Side::Con));
        assert_eq!(v.source, VerdictSource::Fallback);

        let v = fallback_winner(&args, &[]);
        assert!(v.winner_side.is_none());
    }

    #[test]
    fn test_winner_prompt_includes_transcript_and_scores() {
        let debate = Debate {
            id: "d1".to_string(),
            version: 1,
            topic: "Homework should be banned".to_string(),
            description: None,
            creator_id: "alice".to_string(),
            opponent_id: Some("bob".to_string()),
            creator_side: Side::Pro,
            rounds: 1,
            current_round: 1,
            current_turn: None,
            status: DebateStatus::Active,
            creator_ready: true,
            opponent_ready: true,
            turn_deadline: None,
            winner_id: None,
            forfeited_by: None,
            verdict: None,
            created_at: chrono::Utc::now().to_rfc3339(),
            completed_at: None,
        };
        let args = vec![argument("a1", Side::Pro, 1), argument("b1", Side::Con, 1)];
        let prompt = winner_prompt(&debate, &args, &[analysis("a1", 8)]);

        assert!(prompt.contains("Homework should be banned"));
        assert!(prompt.contains("[Round 1 | PRO | creator]"));
        assert!(prompt.contains("[Round 1 | CON | opponent]"));
        assert!(prompt.contains("Round 1 PRO: 8/10"));
    }

    #[tokio::test]
    async fn test_no_llm_uses_fallbacks() {
        let config = LlmConfig::default();
        let args = vec![argument("a1", Side::Pro, 1)];
        let debate_topic_only = Debate {
            id: "d1".to_string(),
            version: 1,
            topic: "t".to_string(),
            description: None,
            creator_id: "alice".to_string(),
            opponent_id: Some("bob".to_string()),
            creator_side: Side::Pro,
            rounds: 1,
            current_round: 1,
            current_turn: None,
            status: DebateStatus::Active,
            creator_ready: true,
            opponent_ready: true,
            turn_deadline: None,
            winner_id: None,
            forfeited_by: None,
            verdict: None,
            created_at: chrono::Utc::now().to_rfc3339(),
            completed_at: None,
        };

        let draft = analyze_argument(None, &config, &debate_topic_only, &args[0], &[]).await;
        assert_eq!(draft, fallback_analysis());

        let verdict =
            determine_winner(None, &config, &debate_topic_only, &args, &[analysis("a1", 6)]).await;
        assert_eq!(verdict.winner_side, Some(Side::Pro));
        assert_eq!(verdict.source, VerdictSource::Fallback);
    }
}
