//! Model session domain.
//!
//! - [`entities::Message`]: a provider-agnostic chat message
//! - [`stream::StreamEvent`]: normalized streaming event
//! - [`reasoning::merge_reasoning`]: delta/snapshot reasoning accumulation

pub mod entities;
pub mod reasoning;
pub mod stream;
