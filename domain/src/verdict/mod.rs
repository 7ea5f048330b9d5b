//! Debate decision logic
//!
//! # Phases
//!
//! ```text
//! Debate:    Round 1 ─▶ Round 2 ─▶ convergence? ─▶ ... ─▶ Round N ─▶ Synthesis
//! Ensemble:  Answers ─▶ Vote (judge) ─▶ Synthesis
//! Parallel:  Answers
//! ```
//!
//! Judge replies are parsed by [`parsing`], which never fails: malformed
//! output degrades to a safe default rather than aborting the turn.

pub mod convergence;
pub mod ensemble;
pub mod parsing;

pub use convergence::ConvergenceCheck;
pub use ensemble::{EnsembleResult, EnsembleStatus, NEUTRAL_CONFIDENCE, Outlier, VoteAnalysis};
pub use parsing::{
    extract_json_object, parse_convergence_response, parse_title_response, parse_vote_analysis,
};
