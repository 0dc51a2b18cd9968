//! Per-session conversation history.

use crate::types::ConversationTurn;

/// Append-only history of one session.
#[derive(Debug, Clone, Default)]
pub struct ConversationState {
    session_id: String,
    turns: Vec<ConversationTurn>,
}

impl ConversationState {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            turns: Vec::new(),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn append(&mut self, turn: ConversationTurn) {
        self.turns.push(turn);
    }

    /// The most recent `max_turns` turns, oldest first. `None` returns all.
    pub fn history(&self, max_turns: Option<usize>) -> &[ConversationTurn] {
        match max_turns {
            Some(n) => &self.turns[self.turns.len().saturating_sub(n)..],
            None => &self.turns,
        }
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ConversationRole;

    fn state_with(n: usize) -> ConversationState {
        let mut state = ConversationState::new("s1");
        for i in 0..n {
            if i % 2 == 0 {
                state.append(ConversationTurn::user(format!("q{}", i)));
            } else {
                state.append(ConversationTurn::assistant(format!("a{}", i)));
            }
        }
        state
    }

    #[test]
    fn test_history_window_is_recent_and_oldest_first() {
        let state = state_with(5);
        let window = state.history(Some(2));
        assert_eq!(window.len(), 2);
        assert_eq!(window[0].content, "a3");
        assert_eq!(window[1].content, "q4");
        assert_eq!(window[1].role, ConversationRole::User);
    }

    #[test]
    fn test_history_unbounded_and_oversized() {
        let state = state_with(3);
        assert_eq!(state.history(None).len(), 3);
        assert_eq!(state.history(Some(10)).len(), 3);
        assert!(state.history(Some(0)).is_empty());
    }

    #[test]
    fn test_empty_state() {
        let state = ConversationState::new("fresh");
        assert!(state.is_empty());
        assert_eq!(state.session_id(), "fresh");
        assert!(state.history(None).is_empty());
    }
}
