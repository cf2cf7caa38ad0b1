use async_trait::async_trait;
use indexmap::IndexMap;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::GraphError;
use crate::state::ConversationState;

pub const DEFAULT_THREAD_CAPACITY: usize = 1024;

/// Per-thread conversation state storage.
#[async_trait]
pub trait Checkpointer: Send + Sync {
    async fn load(&self, thread_id: &str) -> Result<Option<ConversationState>, GraphError>;

    async fn save(&self, thread_id: &str, state: &ConversationState) -> Result<(), GraphError>;
}

/// In-process store holding at most `capacity` threads. Saving a thread marks
/// it most recent; once full, the thread saved longest ago is dropped.
pub struct MemoryCheckpointer {
    capacity: usize,
    threads: Mutex<IndexMap<String, ConversationState>>,
}

impl Default for MemoryCheckpointer {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_THREAD_CAPACITY)
    }
}

impl MemoryCheckpointer {
    pub fn new() -> Self {
        Self::default()
    }

    /// A capacity of zero is treated as one.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            threads: Mutex::new(IndexMap::new()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub async fn thread_count(&self) -> usize {
        self.threads.lock().await.len()
    }
}

#[async_trait]
impl Checkpointer for MemoryCheckpointer {
    async fn load(&self, thread_id: &str) -> Result<Option<ConversationState>, GraphError> {
        Ok(self.threads.lock().await.get(thread_id).cloned())
    }

    async fn save(&self, thread_id: &str, state: &ConversationState) -> Result<(), GraphError> {
        let mut threads = self.threads.lock().await;
        threads.shift_remove(thread_id);
        threads.insert(thread_id.to_string(), state.clone());
        while threads.len() > self.capacity {
            if let Some((evicted, _)) = threads.shift_remove_index(0) {
                debug!(target: "reflex::graph", thread_id = %evicted, "evicted checkpoint");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn threads_are_isolated() {
        let store = MemoryCheckpointer::new();
        assert!(store.load("a").await.expect("load").is_none());
        let state = ConversationState {
            answer: "first".into(),
            ..Default::default()
        };
        store.save("a", &state).await.expect("save");
        assert_eq!(store.load("a").await.expect("load"), Some(state));
        assert!(store.load("b").await.expect("load").is_none());
        assert_eq!(store.thread_count().await, 1);
    }

    #[tokio::test]
    async fn oldest_thread_is_evicted_at_capacity() {
        let store = MemoryCheckpointer::with_capacity(2);
        let state = ConversationState::default();
        store.save("a", &state).await.expect("save");
        store.save("b", &state).await.expect("save");
        // re-saving `a` makes `b` the oldest
        store.save("a", &state).await.expect("save");
        store.save("c", &state).await.expect("save");
        assert_eq!(store.thread_count().await, 2);
        assert!(store.load("b").await.expect("load").is_none());
        assert!(store.load("a").await.expect("load").is_some());
        assert!(store.load("c").await.expect("load").is_some());
    }

    #[tokio::test]
    async fn anonymous_threads_stay_bounded() {
        let store = MemoryCheckpointer::with_capacity(8);
        let state = ConversationState::default();
        for i in 0..100 {
            store.save(&format!("thread-{i}"), &state).await.expect("save");
        }
        assert_eq!(store.thread_count().await, 8);
        assert!(store.load("thread-99").await.expect("load").is_some());
        assert!(store.load("thread-91").await.expect("load").is_none());
    }

    #[test]
    fn zero_capacity_keeps_one_thread() {
        assert_eq!(MemoryCheckpointer::with_capacity(0).capacity(), 1);
        assert_eq!(MemoryCheckpointer::new().capacity(), DEFAULT_THREAD_CAPACITY);
    }
}
