use std::collections::{HashMap, VecDeque};

use tokio::sync::Mutex;
use tracing::debug;

use crate::config::{ContextConfig, ContextScope};

/// One recorded source text and the inbound message it came from.
#[derive(Debug, Clone)]
struct ContextEntry {
    message_id: u64,
    text: String,
}

/// Bounded FIFO of recently translated source texts.
#[derive(Debug, Clone)]
pub struct ContextBuffer {
    entries: VecDeque<ContextEntry>,
    capacity: usize,
}

impl ContextBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append `text`, evicting the oldest entries beyond capacity.
    pub fn record(&mut self, message_id: u64, text: &str) {
        self.entries.push_back(ContextEntry {
            message_id,
            text: text.to_string(),
        });
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
    }

    /// Current contents, most recent last.
    pub fn snapshot(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.text.clone()).collect()
    }

    /// Record `text` for `message_id` and return what preceded it.
    ///
    /// A message already in the buffer is not appended again; the entries
    /// before it are returned instead, so every target of one message
    /// translates against the same context.
    pub fn record_and_prior(&mut self, message_id: u64, text: &str) -> Vec<String> {
        let position = match self.entries.iter().position(|e| e.message_id == message_id) {
            Some(position) => position,
            None => {
                self.record(message_id, text);
                self.entries.len() - 1
            }
        };
        self.entries
            .iter()
            .take(position)
            .map(|e| e.text.clone())
            .collect()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Owns the rolling buffers used as translation context.
///
/// With [`ContextScope::Shared`] every channel reads and writes the same
/// buffer; with [`ContextScope::PerChannel`] each source channel gets its own.
/// Writes go through one lock, so concurrent translations append in a single
/// total order. Entries are keyed by inbound message id: one message fanned
/// out to several targets occupies one slot.
pub struct ContextStore {
    scope: ContextScope,
    capacity: usize,
    buffers: Mutex<HashMap<String, ContextBuffer>>,
}

const SHARED_KEY: &str = "";

impl ContextStore {
    pub fn new(config: &ContextConfig) -> Self {
        Self {
            scope: config.scope,
            capacity: config.capacity,
            buffers: Mutex::new(HashMap::new()),
        }
    }

    fn key<'a>(&self, channel: &'a str) -> &'a str {
        match self.scope {
            ContextScope::Shared => SHARED_KEY,
            ContextScope::PerChannel => channel,
        }
    }

    /// Record `text` under `channel`'s buffer and return the prior context.
    pub async fn record_and_prior(
        &self,
        channel: &str,
        message_id: u64,
        text: &str,
    ) -> Vec<String> {
        let key = self.key(channel);
        let mut buffers = self.buffers.lock().await;
        let buffer = buffers
            .entry(key.to_string())
            .or_insert_with(|| ContextBuffer::new(self.capacity));
        let prior = buffer.record_and_prior(message_id, text);
        debug!(
            "Context for '{}': {} prior entries (capacity {})",
            channel,
            prior.len(),
            buffer.capacity()
        );
        prior
    }

    pub async fn snapshot(&self, channel: &str) -> Vec<String> {
        let key = self.key(channel);
        let buffers = self.buffers.lock().await;
        buffers
            .get(key)
            .map(ContextBuffer::snapshot)
            .unwrap_or_default()
    }
}
