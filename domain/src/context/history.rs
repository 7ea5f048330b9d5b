//! Prior-turn history projection.
//!
//! Every earlier turn is projected to two messages: the user prompt and an
//! assistant digest (web search marker, per-model final positions, debate
//! outcome, synthesis). When the projection exceeds the budget, the oldest
//! turns are dropped and reported for folding into the running summary.

use crate::context::budget::ContextBudget;
use crate::conversation::entities::{Conversation, Turn, TurnMode};
use crate::session::entities::Message;
use crate::util::excerpt;

/// History to prepend to a new turn's prompt.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryWindow {
    pub messages: Vec<Message>,
    /// Older turns were dropped and should be folded into the summary.
    pub needs_summary: bool,
    /// Count of dropped turns, starting right after the already-summarized prefix.
    pub turns_to_summarize: usize,
    pub estimated_tokens: usize,
}

impl HistoryWindow {
    pub fn empty() -> Self {
        Self {
            messages: Vec::new(),
            needs_summary: false,
            turns_to_summarize: 0,
            estimated_tokens: 0,
        }
    }
}

/// Build the bounded history for a turn whose prior turns are
/// `conversation.turns[..prior_turns]`.
pub fn build_history(
    conversation: &Conversation,
    prior_turns: usize,
    budget: &ContextBudget,
) -> HistoryWindow {
    let prior_turns = prior_turns.min(conversation.turns.len());
    let start = conversation.summarized_turn_count.min(prior_turns);

    let summary_message = conversation
        .running_summary
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .map(|s| Message::system(format!("Summary of the earlier conversation:\n{s}")));
    let summary_tokens = summary_message
        .as_ref()
        .map(|m| budget.estimate_message(&m.content))
        .unwrap_or(0);

    let pairs: Vec<([Message; 2], usize)> = conversation.turns[start..prior_turns]
        .iter()
        .map(|turn| {
            let pair = turn_pair(turn, budget);
            let tokens = pair.iter().map(|m| budget.estimate_message(&m.content)).sum();
            (pair, tokens)
        })
        .collect();

    let total: usize = summary_tokens + pairs.iter().map(|(_, t)| t).sum::<usize>();
    if total <= budget.threshold_tokens() {
        return assemble(summary_message, pairs.into_iter().map(|(p, _)| p), total, 0);
    }

    // Walk backward, always keeping the latest pair.
    let mut used = summary_tokens;
    let mut keep = 0;
    for (_, tokens) in pairs.iter().rev() {
        if keep > 0 && used + tokens > budget.threshold_tokens() {
            break;
        }
        used += tokens;
        keep += 1;
    }

    let dropped = pairs.len() - keep;
    let kept = pairs.into_iter().skip(dropped).map(|(p, _)| p);
    assemble(summary_message, kept, used, dropped)
}

fn assemble(
    summary: Option<Message>,
    pairs: impl Iterator<Item = [Message; 2]>,
    estimated_tokens: usize,
    dropped: usize,
) -> HistoryWindow {
    let messages = summary.into_iter().chain(pairs.flatten()).collect();
    HistoryWindow {
        messages,
        needs_summary: dropped > 0,
        turns_to_summarize: dropped,
        estimated_tokens,
    }
}

fn turn_pair(turn: &Turn, budget: &ContextBudget) -> [Message; 2] {
    [
        Message::user(turn.user_prompt.clone()),
        Message::assistant(turn_digest(turn, budget.position_excerpt_chars())),
    ]
}

/// Compact assistant-side record of a finished turn.
pub fn turn_digest(turn: &Turn, excerpt_chars: usize) -> String {
    let mut sections: Vec<String> = Vec::new();

    if let Some(search) = &turn.web_search {
        sections.push(format!("[Web search used: \"{}\"]", search.query));
    }

    if let Some(round) = turn.final_round() {
        let mut positions = format!("Model positions (round {}):", round.round_number);
        for (_, stream) in round.positions() {
            positions.push_str(&format!(
                "\n- {}: {}",
                stream.model,
                excerpt(&stream.content, excerpt_chars)
            ));
        }
        sections.push(positions);
    }

    match turn.mode {
        TurnMode::Debate => {
            let meta = &turn.debate_metadata;
            let outcome = if meta.converged { "converged" } else { "did not converge" };
            sections.push(format!(
                "[Debate: {} round(s), {}]",
                meta.total_rounds, outcome
            ));
        }
        TurnMode::Ensemble => {
            if let Some(result) = &turn.ensemble_result {
                sections.push(format!("[Ensemble vote: {}% confidence]", result.confidence));
            }
        }
        TurnMode::Parallel => sections.push("[Parallel answers, no synthesis]".to_string()),
    }

    match turn.answer() {
        Some(answer) => sections.push(format!("Synthesis:\n{}", answer.trim())),
        None if turn.mode != TurnMode::Parallel => {
            sections.push("(no synthesis was produced)".to_string())
        }
        None => {}
    }

    sections.join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::entities::{Round, Synthesis, Status, WebSearchResult};
    use crate::conversation::metadata::{DebateMetadata, TerminationReason};
    use crate::session::entities::Role;

    fn finished_turn(prompt: &str, answer: &str) -> Turn {
        let models = vec!["a".to_string(), "b".to_string()];
        let mut turn = Turn::new(prompt, TurnMode::Debate);
        let mut round = Round::new(1, "Initial positions", &models);
        round.streams[0].complete(format!("{prompt} view A"), None, None, 1);
        round.streams[1].fail("boom", String::new(), None);
        turn.rounds.push(round);
        let mut synthesis = Synthesis::pending("judge");
        synthesis.content = answer.to_string();
        synthesis.status = Status::Complete;
        turn.synthesis = Some(synthesis);
        turn.debate_metadata = DebateMetadata::terminated(1, TerminationReason::MaxRoundsReached);
        turn
    }

    fn conversation_with(turns: usize) -> Conversation {
        let mut conversation = Conversation::new();
        for i in 0..turns {
            conversation
                .turns
                .push(finished_turn(&format!("question {i}"), &"x".repeat(400)));
        }
        conversation
    }

    #[test]
    fn first_turn_has_empty_history() {
        let conversation = conversation_with(1);
        let window = build_history(&conversation, 0, &ContextBudget::default());
        assert!(window.messages.is_empty());
        assert!(!window.needs_summary);
    }

    #[test]
    fn small_history_is_returned_in_full() {
        let conversation = conversation_with(3);
        let window = build_history(&conversation, 3, &ContextBudget::default());
        assert_eq!(window.messages.len(), 6);
        assert_eq!(window.messages[0].role, Role::User);
        assert_eq!(window.messages[0].content, "question 0");
        assert_eq!(window.messages[1].role, Role::Assistant);
        assert!(!window.needs_summary);
        assert_eq!(window.turns_to_summarize, 0);
    }

    #[test]
    fn over_budget_keeps_recent_suffix() {
        let conversation = conversation_with(5);
        let one_pair = {
            let w = build_history(&conversation, 1, &ContextBudget::default());
            w.estimated_tokens
        };
        // room for two pairs, not three
        let budget = ContextBudget::default().with_threshold_tokens(one_pair * 2 + 1);
        let window = build_history(&conversation, 5, &budget);

        assert!(window.needs_summary);
        assert_eq!(window.turns_to_summarize, 3);
        assert_eq!(window.messages.len(), 4);
        assert_eq!(window.messages[0].content, "question 3");
    }

    #[test]
    fn latest_pair_is_always_retained() {
        let conversation = conversation_with(2);
        let budget = ContextBudget::default().with_threshold_tokens(1);
        let window = build_history(&conversation, 2, &budget);
        assert_eq!(window.messages.len(), 2);
        assert_eq!(window.messages[0].content, "question 1");
        assert_eq!(window.turns_to_summarize, 1);
    }

    #[test]
    fn summary_leads_and_summarized_turns_are_skipped() {
        let mut conversation = conversation_with(3);
        conversation.running_summary = Some("We discussed question 0.".to_string());
        conversation.summarized_turn_count = 1;

        let window = build_history(&conversation, 3, &ContextBudget::default());
        assert_eq!(window.messages.len(), 5);
        assert_eq!(window.messages[0].role, Role::System);
        assert!(window.messages[0].content.contains("question 0"));
        assert_eq!(window.messages[1].content, "question 1");
    }

    #[test]
    fn digest_includes_positions_metadata_and_synthesis() {
        let mut turn = finished_turn("q", "final answer");
        turn.web_search = Some(WebSearchResult {
            query: "rust news".to_string(),
            content: String::new(),
            sources: Vec::new(),
        });
        let digest = turn_digest(&turn, 5);
        assert!(digest.starts_with("[Web search used: \"rust news\"]"));
        assert!(digest.contains("- a: q vie…"));
        assert!(!digest.contains("- b:"));
        assert!(digest.contains("[Debate: 1 round(s), did not converge]"));
        assert!(digest.ends_with("Synthesis:\nfinal answer"));
    }
}
