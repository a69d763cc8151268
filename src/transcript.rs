//! Conversation transcript with a pinned system turn.

use serde::{Deserialize, Serialize};

/// Speaker of a single transcript entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One role-tagged text entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Ordered turns of one conversation session.
///
/// # Details
/// The first entry is the system turn supplied at construction. Nothing on
/// this type can remove or rewrite it: callers may only append turns or roll
/// back a trailing user turn that never received an answer.
#[derive(Debug, Clone)]
pub struct Transcript {
    turns: Vec<Turn>,
}

impl Transcript {
    /// Starts a transcript holding only the persona/system instructions.
    ///
    /// # Arguments
    /// * `persona` - Instructions establishing the assistant's behaviour.
    pub fn new(persona: impl Into<String>) -> Self {
        Self {
            turns: vec![Turn::new(Role::System, persona)],
        }
    }

    pub fn push_user(&mut self, text: impl Into<String>) {
        self.turns.push(Turn::new(Role::User, text));
    }

    pub fn push_assistant(&mut self, text: impl Into<String>) {
        self.turns.push(Turn::new(Role::Assistant, text));
    }

    /// Removes the last turn when it is an unanswered user turn.
    ///
    /// # Returns
    /// * `Some(Turn)` - The user turn that was removed.
    /// * `None` - The last turn was not a user turn; nothing changed.
    pub fn rollback_user(&mut self) -> Option<Turn> {
        match self.turns.last() {
            Some(turn) if turn.role == Role::User => self.turns.pop(),
            _ => None,
        }
    }

    pub fn system(&self) -> &Turn {
        &self.turns[0]
    }

    /// Returns the whole conversation history, system turn first.
    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    /// Always `false`; a transcript carries at least its system turn.
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}
