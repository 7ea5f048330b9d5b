//! Console output formatter for turns and conversations

use crate::cli::commands::OutputFormat;
use crate::output::formatter::OutputFormatter;
use colored::Colorize;
use roundtable_application::ConversationSummary;
use roundtable_domain::{
    Conversation, EnsembleResult, EnsembleStatus, ModelStream, Round, Status, Turn, TurnMode,
    Usage,
};
use serde::Serialize;

/// Formats turns for console display
pub struct ConsoleFormatter;

impl ConsoleFormatter {
    /// Render `turn` in the requested format
    pub fn render(turn: &Turn, format: OutputFormat) -> String {
        match format {
            OutputFormat::Full => Self::format(turn),
            OutputFormat::Synthesis => Self::format_synthesis_only(turn),
            OutputFormat::Json => Self::format_json(turn),
        }
    }

    /// Format the complete turn
    pub fn format(turn: &Turn) -> String {
        let mut output = String::new();

        output.push_str(&Self::header("Roundtable Results"));
        output.push('\n');

        output.push_str(&format!(
            "{} {}\n",
            "Question:".cyan().bold(),
            turn.user_prompt
        ));
        for attachment in &turn.attachments {
            output.push_str(&format!(
                "{} {}\n",
                "Attached:".dimmed(),
                attachment.name
            ));
        }
        output.push_str(&format!("{} {}\n", "Mode:".cyan().bold(), turn.mode));
        output.push_str(&format!(
            "{} {}\n",
            "Models:".cyan().bold(),
            Self::models(turn).join(", ")
        ));

        for round in &turn.rounds {
            output.push_str(&Self::section_header(&format!(
                "Round {}: {}",
                round.round_number, round.label
            )));
            for stream in &round.streams {
                output.push_str(&Self::format_stream(stream));
            }
            output.push_str(&Self::format_convergence(round));
        }

        if let Some(result) = &turn.ensemble_result {
            output.push_str(&Self::format_vote(result));
        }

        if let Some(synthesis) = &turn.synthesis {
            output.push_str(&Self::section_header("Synthesis"));
            let title = format!("Synthesizer: {}", synthesis.model);
            match synthesis.status {
                Status::Complete => {
                    output.push_str(&format!(
                        "\n{}\n\n{}\n",
                        title.yellow().bold(),
                        synthesis.content
                    ));
                }
                _ => {
                    output.push_str(&format!(
                        "\n{}\nError: {}\n",
                        title.red().bold(),
                        synthesis.error.as_deref().unwrap_or("Unknown")
                    ));
                }
            }
        }

        let meta = &turn.debate_metadata;
        if let Some(reason) = meta.termination_reason {
            output.push_str(&format!(
                "\n{} {} after {} round(s)\n",
                "Finished:".dimmed(),
                reason,
                meta.total_rounds
            ));
        }

        output.push_str(&Self::footer());

        output
    }

    /// Format as JSON
    pub fn format_json<T: Serialize>(value: &T) -> String {
        serde_json::to_string_pretty(value).unwrap_or_else(|_| "{}".to_string())
    }

    /// Format the final answer only (concise output)
    ///
    /// Parallel turns have no synthesis; their final-round answers are listed instead.
    pub fn format_synthesis_only(turn: &Turn) -> String {
        let mut output = String::new();

        output.push_str(&format!(
            "{}\n\n",
            "=== Roundtable Conclusion ===".cyan().bold()
        ));

        output.push_str(&format!("{} {}\n\n", "Q:".bold(), turn.user_prompt));

        output.push_str(&format!(
            "{} {}\n\n",
            "Models consulted:".dimmed(),
            Self::models(turn).join(", ")
        ));

        if let Some(answer) = turn.answer() {
            output.push_str(answer);
            output.push('\n');
            return output;
        }

        if turn.mode == TurnMode::Parallel
            && let Some(round) = turn.final_round()
        {
            for (_, stream) in round.positions() {
                output.push_str(&format!(
                    "{}\n{}\n\n",
                    format!("── {} ──", stream.model).yellow().bold(),
                    stream.content
                ));
            }
            return output;
        }

        let error = turn
            .synthesis
            .as_ref()
            .and_then(|s| s.error.as_deref())
            .map(str::to_string)
            .or_else(|| {
                turn.termination_reason()
                    .map(|reason| format!("turn ended: {}", reason))
            })
            .unwrap_or_else(|| "no answer yet".to_string());
        output.push_str(&format!("{} {}\n", "No answer:".red().bold(), error));

        output
    }

    /// Format a stored conversation with all its turns
    pub fn format_conversation(conversation: &Conversation, format: OutputFormat) -> String {
        if format == OutputFormat::Json {
            return Self::format_json(conversation);
        }

        let mut output = String::new();
        let title = if conversation.has_title() {
            conversation.title.as_str()
        } else {
            "(untitled)"
        };
        output.push_str(&format!("{} {}\n", title.bold(), conversation.id.dimmed()));
        if !conversation.description.is_empty() {
            output.push_str(&format!("{}\n", conversation.description));
        }
        output.push_str(&format!(
            "{} {}\n\n",
            "Updated:".dimmed(),
            conversation.updated_at.format("%Y-%m-%d %H:%M:%S UTC")
        ));

        for turn in &conversation.turns {
            output.push_str(&Self::render(turn, format));
            output.push('\n');
        }

        output
    }

    /// One line per stored conversation
    pub fn format_conversation_list(summaries: &[ConversationSummary]) -> String {
        if summaries.is_empty() {
            return format!("{}\n", "No conversations yet.".dimmed());
        }
        summaries
            .iter()
            .map(|s| {
                let title = if s.title.trim().is_empty() {
                    "(untitled)"
                } else {
                    s.title.as_str()
                };
                format!(
                    "{}  {}  {:>3} turn(s)  {}\n",
                    s.id.cyan(),
                    s.updated_at.format("%Y-%m-%d %H:%M"),
                    s.turn_count,
                    title
                )
            })
            .collect()
    }

    fn format_stream(stream: &ModelStream) -> String {
        let meta = Self::stream_meta(stream.duration_ms, stream.usage.as_ref());
        if stream.is_complete() {
            return format!(
                "\n{} {}\n{}\n",
                format!("── {} ──", stream.model).yellow().bold(),
                meta.dimmed(),
                stream.content
            );
        }

        let error = stream.error.as_deref().unwrap_or("Unknown");
        let mut out = format!(
            "\n{}\nError: {}\n",
            format!("── {} ──", stream.model).red().bold(),
            error
        );
        if stream.carried_forward {
            out.push_str(&format!(
                "{}\n{}\n",
                "(carried forward from the previous round)".dimmed(),
                stream.content
            ));
        } else if !stream.content.is_empty() {
            out.push_str(&format!("{}\n{}\n", "Partial:".dimmed(), stream.content));
        }
        out
    }

    fn format_convergence(round: &Round) -> String {
        let Some(check) = round.convergence_check.as_ref().filter(|c| !c.is_pending()) else {
            return String::new();
        };
        let verdict = if check.has_converged() {
            "converged".green().bold()
        } else {
            "not converged".yellow().bold()
        };
        let mut out = format!("\n{} {}", "Judge:".cyan().bold(), verdict);
        if let Some(confidence) = check.confidence {
            out.push_str(&format!(" ({}% confident)", confidence));
        }
        out.push('\n');
        if !check.reason.is_empty() {
            out.push_str(&format!("  {}\n", check.reason));
        }
        out.push_str(&Self::bullets("Agreements:", &check.agreements));
        out.push_str(&Self::bullets("Disagreements:", &check.disagreements));
        out
    }

    fn format_vote(result: &EnsembleResult) -> String {
        let mut out = Self::section_header("Ensemble Vote");
        match result.status {
            EnsembleStatus::Error => {
                out.push_str(&format!(
                    "\n{} {}\n",
                    "Judge failed:".red().bold(),
                    result.error.as_deref().unwrap_or("Unknown")
                ));
                return out;
            }
            EnsembleStatus::Analyzing => {
                out.push_str("\nStill analyzing\n");
                return out;
            }
            EnsembleStatus::Complete => {}
        }

        out.push_str(&format!(
            "\n{} {}%\n",
            "Confidence:".cyan().bold(),
            result.confidence
        ));
        if !result.model_weights.is_empty() {
            out.push_str(&format!("{}\n", "Weights:".cyan().bold()));
            for (model, weight) in &result.model_weights {
                out.push_str(&format!("  {:<40} {:.2}\n", model, weight));
            }
        }
        out.push_str(&Self::bullets("Areas of Agreement:", &result.agreement_areas));
        out.push_str(&Self::bullets(
            "Areas of Disagreement:",
            &result.disagreement_areas,
        ));
        if !result.outliers.is_empty() {
            out.push_str(&format!("\n{}\n", "Outliers:".yellow().bold()));
            for outlier in &result.outliers {
                out.push_str(&format!("  * {}: {}\n", outlier.model, outlier.reason));
            }
        }
        out
    }

    fn bullets(title: &str, items: &[String]) -> String {
        if items.is_empty() {
            return String::new();
        }
        let mut out = format!("\n{}\n", title.cyan().bold());
        for item in items {
            out.push_str(&format!("  * {}\n", item));
        }
        out
    }

    fn stream_meta(duration_ms: Option<u64>, usage: Option<&Usage>) -> String {
        let mut parts = Vec::new();
        if let Some(ms) = duration_ms {
            parts.push(format!("{:.1}s", ms as f64 / 1000.0));
        }
        if let Some(total) = usage.and_then(|u| u.total_tokens) {
            parts.push(format!("{} tokens", total));
        }
        if parts.is_empty() {
            String::new()
        } else {
            format!("({})", parts.join(", "))
        }
    }

    fn models(turn: &Turn) -> Vec<String> {
        turn.rounds.first().map(Round::models).unwrap_or_default()
    }

    fn header(title: &str) -> String {
        let line = "=".repeat(60);
        format!("{}\n{:^60}\n{}", line.cyan(), title.bold(), line.cyan())
    }

    fn section_header(title: &str) -> String {
        format!("\n{}\n{}\n", title.cyan().bold(), "-".repeat(40))
    }

    fn footer() -> String {
        format!("\n{}\n", "=".repeat(60).cyan())
    }
}

impl OutputFormatter for ConsoleFormatter {
    fn format(&self, turn: &Turn) -> String {
        Self::format(turn)
    }

    fn format_json(&self, turn: &Turn) -> String {
        Self::format_json(turn)
    }

    fn format_synthesis_only(&self, turn: &Turn) -> String {
        Self::format_synthesis_only(turn)
    }
}
