//! Provider-agnostic chat messages.

use serde::{Deserialize, Serialize};

/// Author of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// A single message in a chat request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// Split a message list into the concatenated system text and the remaining
/// conversational turns, merging consecutive messages of the same role.
///
/// Vendors without inline system turns (Anthropic, Gemini) take the system
/// text in a dedicated field and require alternating user/assistant turns.
pub fn flatten_system(messages: &[Message]) -> (Option<String>, Vec<Message>) {
    let system_parts: Vec<&str> = messages
        .iter()
        .filter(|m| m.role == Role::System)
        .map(|m| m.content.as_str())
        .filter(|c| !c.trim().is_empty())
        .collect();
    let system = if system_parts.is_empty() {
        None
    } else {
        Some(system_parts.join("\n\n"))
    };

    let mut turns: Vec<Message> = Vec::new();
    for message in messages.iter().filter(|m| m.role != Role::System) {
        match turns.last_mut() {
            Some(last) if last.role == message.role => {
                last.content.push_str("\n\n");
                last.content.push_str(&message.content);
            }
            _ => turns.push(message.clone()),
        }
    }

    // Conversations must open with a user turn.
    if turns.first().is_some_and(|m| m.role == Role::Assistant) {
        turns.insert(0, Message::user("(continuing the conversation)"));
    }

    (system, turns)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flatten_collects_all_system_messages() {
        let messages = vec![
            Message::system("be terse"),
            Message::user("hi"),
            Message::system("summary: earlier chat"),
            Message::assistant("hello"),
        ];
        let (system, turns) = flatten_system(&messages);
        assert_eq!(system.as_deref(), Some("be terse\n\nsummary: earlier chat"));
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].role, Role::User);
    }

    #[test]
    fn flatten_merges_consecutive_roles() {
        let messages = vec![
            Message::user("a"),
            Message::user("b"),
            Message::assistant("c"),
        ];
        let (system, turns) = flatten_system(&messages);
        assert!(system.is_none());
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].content, "a\n\nb");
    }

    #[test]
    fn flatten_prepends_user_when_assistant_leads() {
        let (_, turns) = flatten_system(&[Message::assistant("x"), Message::user("y")]);
        assert_eq!(turns[0].role, Role::User);
        assert_eq!(turns.len(), 3);
    }
}
