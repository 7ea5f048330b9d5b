//! Prompt templates for each phase of a turn

use crate::conversation::entities::{Attachment, WebSearchResult};
use crate::verdict::ensemble::EnsembleResult;

/// Templates for generating prompts at each stage
pub struct PromptTemplate;

impl PromptTemplate {
    /// Label shown for a debate round
    pub fn round_label(round_number: u32) -> String {
        match round_number {
            1 => "Initial positions".to_string(),
            n => format!("Rebuttal round {}", n - 1),
        }
    }

    pub fn ensemble_label() -> &'static str {
        "Independent answers"
    }

    pub fn parallel_label() -> &'static str {
        "Parallel answers"
    }

    /// System prompt for round 1 and single-round modes
    pub fn initial_system() -> &'static str {
        r#"You are a knowledgeable expert answering alongside other independent experts.
Give a thoughtful, well-reasoned answer. Be concise but complete.
Support your points with reasoning and examples where appropriate."#
    }

    /// User content for the new turn, with pre-extracted attachment text appended
    pub fn initial_user(question: &str, attachments: &[Attachment]) -> String {
        if attachments.is_empty() {
            return question.to_string();
        }

        let mut prompt = question.to_string();
        prompt.push_str("\n\nAttached files:\n");
        for attachment in attachments {
            prompt.push_str(&format!(
                "\n--- {} ---\n{}\n",
                attachment.name,
                attachment.text.trim()
            ));
        }
        prompt
    }

    /// Pre-fetched web search results, appended to the user content
    pub fn web_context(search: &WebSearchResult) -> String {
        let mut context = format!(
            "Web search results for \"{}\":\n{}\n",
            search.query,
            search.content.trim()
        );
        if !search.sources.is_empty() {
            context.push_str("\nSources:\n");
            for source in &search.sources {
                context.push_str(&format!("- {}\n", source));
            }
        }
        context
    }

    /// System prompt for rebuttal rounds
    pub fn rebuttal_system() -> &'static str {
        r#"You are taking part in a structured debate between expert models.
Read the other participants' positions carefully. Be intellectually honest:
concede points that are well supported and challenge claims that are not.
Your goal is the most accurate answer, not winning the argument."#
    }

    /// Rebuttal instructions for one model in round `round_number`.
    ///
    /// `own_position` is `None` when the model had no usable answer in the
    /// previous round.
    pub fn rebuttal_prompt(
        question: &str,
        round_number: u32,
        own_position: Option<&str>,
        others: &[(String, String)],
    ) -> String {
        let mut prompt = format!(
            "Round {} of the debate on the question above.\n",
            round_number
        );

        match own_position {
            Some(position) => {
                prompt.push_str(&format!("\nYour previous position:\n{}\n", position.trim()))
            }
            None => prompt.push_str(
                "\nYou did not give a usable answer in the previous round. \
                 Take a position now.\n",
            ),
        }

        prompt.push_str("\nOther participants' positions:\n");
        for (model, content) in others {
            prompt.push_str(&format!("\n--- {} ---\n{}\n", model, content.trim()));
        }

        prompt.push_str(&format!(
            r#"
Respond to the question "{}":

1. **Agreements**: points from the others you accept, and why
2. **Challenges**: claims you dispute, with your reasoning
3. **Revised position**: your updated, complete answer"#,
            question.trim()
        ));

        prompt
    }

    /// System prompt for the convergence judge
    pub fn convergence_system() -> &'static str {
        r#"You are a neutral judge monitoring a debate between expert models.
Decide whether the participants now substantially agree on the answer.
Minor differences in wording or emphasis still count as agreement.
Respond with JSON only."#
    }

    pub fn convergence_prompt(
        question: &str,
        round_number: u32,
        positions: &[(String, String)],
    ) -> String {
        let mut prompt = format!(
            "Question: {}\n\nPositions after round {}:\n",
            question.trim(),
            round_number
        );
        for (model, content) in positions {
            prompt.push_str(&format!("\n--- {} ---\n{}\n", model, content.trim()));
        }
        prompt.push_str(
            r#"
Have the participants converged on the same answer? Reply with exactly this JSON:

{"converged": true or false, "confidence": 0-100, "reason": "one sentence",
 "agreements": ["..."], "disagreements": ["..."]}"#,
        );
        prompt
    }

    /// System prompt for the ensemble judge
    pub fn vote_system() -> &'static str {
        r#"You are an impartial judge comparing independent answers to the same question.
Identify where they agree, where they differ, and which answers are outliers.
Weight each answer by how accurate and well supported it is. Respond with JSON only."#
    }

    pub fn vote_prompt(question: &str, answers: &[(String, String)]) -> String {
        let mut prompt = format!("Question: {}\n\nAnswers:\n", question.trim());
        for (model, content) in answers {
            prompt.push_str(&format!("\n--- {} ---\n{}\n", model, content.trim()));
        }
        prompt.push_str(
            r#"
Reply with exactly this JSON, using the model names above as keys:

{"confidence": 0-100,
 "outliers": [{"model": "...", "reason": "..."}],
 "agreementAreas": ["..."],
 "disagreementAreas": ["..."],
 "modelWeights": {"<model>": 0.0-1.0}}"#,
        );
        prompt
    }

    /// System prompt for synthesis
    pub fn synthesis_system() -> &'static str {
        r#"You are a moderator turning several expert opinions into one final answer.
Keep what the experts agree on, resolve disagreements in favour of the better
supported position, and note any uncertainty that remains.
Answer the user directly; do not describe the debate process at length."#
    }

    /// Synthesis over the final round of a debate
    pub fn debate_synthesis_prompt(
        question: &str,
        total_rounds: u32,
        converged: bool,
        positions: &[(String, String)],
    ) -> String {
        let mut prompt = format!(
            "Question: {}\n\nFinal positions after {} round(s) of debate{}:\n",
            question.trim(),
            total_rounds,
            if converged { " (the participants converged)" } else { "" }
        );
        for (model, content) in positions {
            prompt.push_str(&format!("\n--- {} ---\n{}\n", model, content.trim()));
        }
        prompt.push_str(
            r#"
Write the final answer to the question. Use clear markdown. Close with a short
**Remaining disagreements** section only if real disagreements are left."#,
        );
        prompt
    }

    /// Synthesis conditioned on the ensemble vote
    pub fn ensemble_synthesis_prompt(
        question: &str,
        answers: &[(String, String)],
        vote: &EnsembleResult,
    ) -> String {
        let mut prompt = format!("Question: {}\n\nIndependent answers:\n", question.trim());
        for (model, content) in answers {
            let weight = vote
                .model_weights
                .get(model)
                .map(|w| format!(" (weight {:.2})", w))
                .unwrap_or_default();
            let outlier = if vote.is_outlier(model) { " [outlier]" } else { "" };
            prompt.push_str(&format!(
                "\n--- {}{}{} ---\n{}\n",
                model,
                weight,
                outlier,
                content.trim()
            ));
        }

        prompt.push_str(&format!("\nJudge confidence: {}%\n", vote.confidence));
        if !vote.agreement_areas.is_empty() {
            prompt.push_str("\nAgreement areas:\n");
            for area in &vote.agreement_areas {
                prompt.push_str(&format!("- {}\n", area));
            }
        }
        if !vote.disagreement_areas.is_empty() {
            prompt.push_str("\nDisagreement areas:\n");
            for area in &vote.disagreement_areas {
                prompt.push_str(&format!("- {}\n", area));
            }
        }

        prompt.push_str(
            r#"
Write the final answer. Lean on higher-weighted answers, treat outliers with
care, and say so where the answers genuinely disagree."#,
        );
        prompt
    }

    pub fn title_system() -> &'static str {
        "You name conversations. Respond with JSON only."
    }

    pub fn title_prompt(question: &str, answer: &str) -> String {
        format!(
            r#"Conversation opening:

User: {}

Answer: {}

Reply with {{"title": "at most 6 words", "description": "one sentence"}}."#,
            crate::util::excerpt(question, 1_000),
            crate::util::excerpt(answer, 1_000)
        )
    }

    pub fn summary_system() -> &'static str {
        r#"You maintain a running summary of a long conversation so that it can continue
without the full transcript. Keep facts, decisions, open questions and user
preferences. Drop pleasantries. Write plain prose, at most a few paragraphs."#
    }

    /// Fold `turns` (user prompt, assistant digest) into `existing`
    pub fn summary_prompt(existing: Option<&str>, turns: &[(String, String)]) -> String {
        let mut prompt = String::new();
        match existing.filter(|s| !s.trim().is_empty()) {
            Some(summary) => {
                prompt.push_str(&format!("Current summary:\n{}\n\n", summary.trim()))
            }
            None => prompt.push_str("There is no summary yet.\n\n"),
        }
        prompt.push_str("Turns to fold into the summary:\n");
        for (user, assistant) in turns {
            prompt.push_str(&format!("\nUser: {}\nAssistant: {}\n", user.trim(), assistant));
        }
        prompt.push_str("\nReturn the updated summary only.");
        prompt
    }
}
