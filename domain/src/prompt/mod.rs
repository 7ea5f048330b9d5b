//! Prompt domain
//!
//! Templates for each phase of a turn: initial answers, rebuttals,
//! convergence and vote judging, synthesis, titles and summaries.

mod template;

pub use template::PromptTemplate;
