//! Presentation layer for roundtable
//!
//! This crate contains CLI definitions, output formatters and
//! progress reporters driven by the turn event stream.

pub mod cli;
pub mod output;
pub mod progress;

// Re-export commonly used types
pub use cli::commands::{AskArgs, Cli, Command, ModeArg, OutputFormat, RetryArgs};
pub use output::console::ConsoleFormatter;
pub use output::formatter::OutputFormatter;
pub use progress::reporter::{ProgressNotifier, ProgressReporter, SimpleProgress, spawn_progress};
