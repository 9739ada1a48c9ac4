use tracing::{debug, warn};

use crate::storage::{Storage, HISTORY_KEY};
use crate::types::{HistoryTurn, Message};

/// Number of most recent messages kept in persistent storage.
pub const HISTORY_LIMIT: usize = 50;

/// Ordered, append-only message log mirrored to storage.
#[derive(Debug, Clone, Default)]
pub struct MessageStore {
    messages: Vec<Message>,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads the persisted log. Unreadable or corrupt history reads as empty.
    pub fn restore<S: Storage>(storage: &S) -> Self {
        let Some(raw) = storage.load(HISTORY_KEY) else {
            return Self::new();
        };
        match serde_json::from_str::<Vec<Message>>(&raw) {
            Ok(messages) => {
                debug!(count = messages.len(), "restored chat history");
                Self { messages }
            }
            Err(err) => {
                warn!(error = %err, "discarding unreadable chat history");
                Self::new()
            }
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn push<S: Storage>(&mut self, message: Message, storage: &mut S) {
        self.messages.push(message);
        self.persist(storage);
    }

    pub fn replace<S: Storage>(&mut self, messages: Vec<Message>, storage: &mut S) {
        self.messages = messages;
        self.persist(storage);
    }

    pub fn clear<S: Storage>(&mut self, storage: &mut S) {
        self.messages.clear();
        storage.forget(HISTORY_KEY);
    }

    /// Rolling history in the shape the chat endpoint expects.
    pub fn history(&self) -> Vec<HistoryTurn> {
        self.messages.iter().map(HistoryTurn::from).collect()
    }

    fn persist<S: Storage>(&self, storage: &mut S) {
        let start = self.messages.len().saturating_sub(HISTORY_LIMIT);
        match serde_json::to_string(&self.messages[start..]) {
            Ok(raw) => storage.save(HISTORY_KEY, &raw),
            Err(err) => warn!(error = %err, "failed to serialize chat history"),
        }
    }
}
