//! Conversation persistence: a JSON file store behind the
//! [`ConversationStore`](roundtable_application::ConversationStore) port.

mod json_store;
pub mod migration;

pub use json_store::JsonConversationStore;
pub use migration::CURRENT_VERSION;
