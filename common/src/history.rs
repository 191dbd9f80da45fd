use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::RagError;
use crate::types::{ChatMessage, ChatRole};

/// Conversation persistence plug-in point.
///
/// `get_recent` returns messages oldest first; persistent backends query in
/// descending timestamp order and reverse. Writes for one session are
/// serialized by the implementation.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn add_message(
        &self,
        session_id: &str,
        role: ChatRole,
        content: &str,
    ) -> Result<(), RagError>;

    async fn get_recent(&self, session_id: &str, n: usize) -> Result<Vec<ChatMessage>, RagError>;
}

/// Default store: a per-session trailing window of at most `max_messages`
/// entries, held in process memory.
pub struct InMemoryHistory {
    max_messages: usize,
    sessions: Mutex<HashMap<String, VecDeque<ChatMessage>>>,
}

impl InMemoryHistory {
    pub fn new(max_messages: usize) -> Self {
        Self {
            max_messages: max_messages.max(1),
            sessions: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl HistoryStore for InMemoryHistory {
    async fn add_message(
        &self,
        session_id: &str,
        role: ChatRole,
        content: &str,
    ) -> Result<(), RagError> {
        let message = ChatMessage::new(session_id, role, content);
        let mut sessions = self
            .sessions
            .lock()
            .map_err(|_| RagError::Internal("history lock poisoned".into()))?;
        let window = sessions.entry(session_id.to_owned()).or_default();
        window.push_back(message);
        while window.len() > self.max_messages {
            window.pop_front();
        }
        Ok(())
    }

    async fn get_recent(&self, session_id: &str, n: usize) -> Result<Vec<ChatMessage>, RagError> {
        let sessions = self
            .sessions
            .lock()
            .map_err(|_| RagError::Internal("history lock poisoned".into()))?;
        let Some(window) = sessions.get(session_id) else {
            return Ok(Vec::new());
        };
        let skip = window.len().saturating_sub(n);
        Ok(window.iter().skip(skip).cloned().collect())
    }
}
