//! CLI command definitions

use clap::{Args, Parser, Subcommand, ValueEnum};
use roundtable_domain::TurnMode;
use std::net::SocketAddr;
use std::path::PathBuf;

/// Output format for a finished turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Every round, the vote and the synthesis
    Full,
    /// Only the final answer
    Synthesis,
    /// The turn as JSON
    Json,
}

/// Turn mode as accepted on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ModeArg {
    Debate,
    #[value(alias = "direct")]
    Ensemble,
    Parallel,
}

impl From<ModeArg> for TurnMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Debate => TurnMode::Debate,
            ModeArg::Ensemble => TurnMode::Ensemble,
            ModeArg::Parallel => TurnMode::Parallel,
        }
    }
}

/// CLI arguments for roundtable
#[derive(Parser, Debug)]
#[command(name = "roundtable")]
#[command(author, version, about = "Multi-model debate: several LLMs argue a question, a judge and a synthesizer settle it")]
#[command(long_about = r#"
Roundtable puts one question to several LLMs at once.

Modes:
  debate    Rounds of answers and rebuttals until the judge sees convergence
            or the round limit is hit, then a synthesis
  ensemble  Independent answers, a judge vote, then a weighted synthesis
  parallel  Independent answers only

Configuration files are loaded from (lowest to highest priority):
1. ~/.config/roundtable/config.toml   Global config
2. ./roundtable.toml                  Project-level config
3. --config <path>                    Explicit config file
4. ROUNDTABLE_* environment variables (ROUNDTABLE_DEBATE__MAX_ROUNDS=2)

Example:
  roundtable ask "Is Rust's borrow checker worth the learning curve?"
  roundtable ask -m anthropic:claude-sonnet-4 -m openai:gpt-4o --mode ensemble "Tabs or spaces?"
  roundtable retry --conversation <id> --round 2
  roundtable serve --bind 127.0.0.1:8787
"#)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Verbosity level (-v = info, -vv = debug, -vvv = trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress progress indicators
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Path to configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Disable loading of configuration files
    #[arg(long, global = true)]
    pub no_config: bool,

    /// Show configuration file locations and exit
    #[arg(long)]
    pub show_config: bool,

    /// Send model calls through a running gateway instead of calling vendors directly
    #[arg(long, global = true, value_name = "URL")]
    pub gateway_url: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run one turn and print the result
    Ask(AskArgs),

    /// Re-run a round (or one stream of it) of a conversation's last turn
    Retry(RetryArgs),

    /// Resume a conversation's last turn from where it stopped
    Continue {
        #[arg(long, value_name = "ID")]
        conversation: String,

        #[arg(short, long, value_enum, default_value = "synthesis")]
        output: OutputFormat,
    },

    /// Serve the gateway HTTP API
    Serve {
        /// Listen address (defaults to [gateway] bind)
        #[arg(long, value_name = "ADDR")]
        bind: Option<SocketAddr>,
    },

    /// List stored conversations, most recent first
    Conversations,

    /// Print a stored conversation
    Show {
        id: String,

        #[arg(short, long, value_enum, default_value = "full")]
        output: OutputFormat,
    },
}

#[derive(Args, Debug)]
pub struct AskArgs {
    /// The question to put to the models
    pub question: String,

    /// Participating models (can be specified multiple times)
    #[arg(short, long, value_name = "MODEL")]
    pub model: Vec<String>,

    /// Turn mode (defaults to [debate] mode)
    #[arg(long, value_enum)]
    pub mode: Option<ModeArg>,

    /// Round limit for debate mode
    #[arg(long, value_name = "N", value_parser = clap::value_parser!(u32).range(1..))]
    pub rounds: Option<u32>,

    /// Add the turn to an existing conversation
    #[arg(long, value_name = "ID")]
    pub conversation: Option<String>,

    /// Text file to attach (can be specified multiple times)
    #[arg(long, value_name = "FILE")]
    pub attach: Vec<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "synthesis")]
    pub output: OutputFormat,
}

#[derive(Args, Debug)]
pub struct RetryArgs {
    #[arg(long, value_name = "ID")]
    pub conversation: String,

    /// Round number, counting from 1
    #[arg(long, value_name = "N", value_parser = clap::value_parser!(u32).range(1..))]
    pub round: u32,

    /// Retry only this stream of the round, counting from 1
    #[arg(long, value_name = "M", value_parser = clap::value_parser!(u32).range(1..))]
    pub stream: Option<u32>,

    #[arg(short, long, value_enum, default_value = "synthesis")]
    pub output: OutputFormat,
}

impl RetryArgs {
    /// 0-based round index
    pub fn round_index(&self) -> usize {
        self.round as usize - 1
    }

    /// 0-based stream index
    pub fn stream_index(&self) -> Option<usize> {
        self.stream.map(|s| s as usize - 1)
    }
}
