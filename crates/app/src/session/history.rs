//! Conversation history
//!
//! Ordered user/assistant entries with the commit discipline the turn
//! controller relies on: assistant entries land only after a turn
//! finishes cleanly, and a barge-in racing a fresh commit can roll the
//! tail entry back.

use tracing::error;

use voxbridge_llm::{ChatMessage, ChatRole};

#[derive(Debug, Default)]
pub struct History {
    entries: Vec<ChatMessage>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_user(&mut self, text: impl Into<String>) {
        self.entries.push(ChatMessage::user(text));
    }

    /// Append an assistant entry.
    ///
    /// Two consecutive assistant entries would mean a double commit;
    /// that is a bug in the caller, asserted in debug and skipped in
    /// release.
    pub fn push_assistant(&mut self, text: impl Into<String>) {
        let tail_is_assistant =
            matches!(self.entries.last(), Some(m) if m.role == ChatRole::Assistant);
        debug_assert!(!tail_is_assistant, "double assistant commit");
        if tail_is_assistant {
            error!("double assistant commit skipped");
            return;
        }
        self.entries.push(ChatMessage::assistant(text));
    }

    /// Remove the tail entry if it is an assistant entry.
    ///
    /// Returns whether an entry was removed. Never touches anything but
    /// the tail.
    pub fn rollback_assistant_tail(&mut self) -> bool {
        if matches!(self.entries.last(), Some(m) if m.role == ChatRole::Assistant) {
            self.entries.pop();
            true
        } else {
            false
        }
    }

    pub fn tail_is_assistant(&self) -> bool {
        matches!(self.entries.last(), Some(m) if m.role == ChatRole::Assistant)
    }

    pub fn entries(&self) -> &[ChatMessage] {
        &self.entries
    }

    pub fn to_vec(&self) -> Vec<ChatMessage> {
        self.entries.clone()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_then_assistant_alternate() {
        let mut history = History::new();
        history.push_user("hi");
        history.push_assistant("hello");
        history.push_user("how are you");
        history.push_assistant("fine");
        assert_eq!(history.len(), 4);
        assert!(history.tail_is_assistant());
    }

    #[test]
    #[cfg_attr(debug_assertions, should_panic(expected = "double assistant commit"))]
    fn double_assistant_commit_is_rejected() {
        let mut history = History::new();
        history.push_user("hi");
        history.push_assistant("hello");
        history.push_assistant("again");
        // Release builds skip the second commit instead of panicking.
        assert_eq!(history.len(), 2);
    }

    #[test]
    fn rollback_removes_only_an_assistant_tail() {
        let mut history = History::new();
        history.push_user("hi");
        history.push_assistant("hello");
        assert!(history.rollback_assistant_tail());
        assert_eq!(history.len(), 1);

        // Tail is now the user entry; rollback must refuse.
        assert!(!history.rollback_assistant_tail());
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn rollback_on_empty_history_is_a_no_op() {
        let mut history = History::new();
        assert!(!history.rollback_assistant_tail());
    }
}
