//! Staleness tracking for data the UI caches outside the chat view
//! (the history sidebar and per-conversation pages).

use crate::types::ChatId;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use tokio::sync::watch;
use tracing::debug;

#[async_trait]
pub trait ViewCache: Send + Sync {
    async fn invalidate_list(&self);
    async fn invalidate_conversation(&self, chat_id: ChatId);
}

/// Marks both the conversation list and `chat_id` stale, concurrently.
pub async fn invalidate_after_write(cache: &dyn ViewCache, chat_id: ChatId) {
    futures::join!(
        cache.invalidate_list(),
        cache.invalidate_conversation(chat_id)
    );
}

/// In-process revisions. Readers refetch when their revision moves.
pub struct CacheRevisions {
    list: watch::Sender<u64>,
    conversations: Mutex<HashMap<ChatId, u64>>,
}

impl Default for CacheRevisions {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheRevisions {
    pub fn new() -> Self {
        let (list, _) = watch::channel(0);
        Self {
            list,
            conversations: Mutex::new(HashMap::new()),
        }
    }

    pub fn list_revision(&self) -> u64 {
        *self.list.borrow()
    }

    pub fn subscribe_list(&self) -> watch::Receiver<u64> {
        self.list.subscribe()
    }

    pub fn conversation_revision(&self, chat_id: ChatId) -> u64 {
        self.conversations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&chat_id)
            .copied()
            .unwrap_or_default()
    }
}

#[async_trait]
impl ViewCache for CacheRevisions {
    async fn invalidate_list(&self) {
        self.list.send_modify(|rev| *rev += 1);
        debug!("conversation list invalidated");
    }

    async fn invalidate_conversation(&self, chat_id: ChatId) {
        *self
            .conversations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(chat_id)
            .or_default() += 1;
        debug!(chat_id, "conversation invalidated");
    }
}
