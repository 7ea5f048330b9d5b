//! Output formatter trait

use roundtable_domain::Turn;

/// Trait for rendering a finished turn
pub trait OutputFormatter {
    /// Every round, the vote and the synthesis
    fn format(&self, turn: &Turn) -> String;

    /// Format as JSON
    fn format_json(&self, turn: &Turn) -> String;

    /// Final answer only (concise output)
    fn format_synthesis_only(&self, turn: &Turn) -> String;
}
