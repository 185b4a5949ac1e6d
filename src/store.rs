//! Ordered, in-memory message list for one chat view.
//!
//! Insertion order is the only ordering that is stored. The view renders
//! newest-first by walking it backwards ([`MessageView::display_order`]).
//!
//! Only the submission side holds a [`MessageStore`]; everything else gets a
//! read-only [`MessageView`] of the same list.

use crate::types::{ChatId, ChatMessage, CorrelationToken, MessageId, Role};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use time::OffsetDateTime;
use tokio::sync::watch;
use tracing::debug;

#[derive(Clone)]
pub struct MessageView {
    messages: Arc<RwLock<Vec<ChatMessage>>>,
    revision: Arc<watch::Sender<u64>>,
}

impl MessageView {
    fn read(&self) -> RwLockReadGuard<'_, Vec<ChatMessage>> {
        self.messages.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn snapshot(&self) -> Vec<ChatMessage> {
        self.read().clone()
    }

    pub fn get(&self, id: &MessageId) -> Option<ChatMessage> {
        self.read().iter().find(|msg| &msg.id == id).cloned()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn user_message_count(&self) -> usize {
        self.read().iter().filter(|msg| msg.role == Role::User).count()
    }

    /// The assistant message with the newest `created_at`. Ties go to the
    /// one inserted last.
    pub fn latest_assistant(&self) -> Option<ChatMessage> {
        self.read()
            .iter()
            .filter(|msg| msg.role == Role::Assistant)
            .max_by_key(|msg| msg.created_at)
            .cloned()
    }

    /// Newest first, for rendering only.
    pub fn display_order(&self) -> Vec<ChatMessage> {
        self.read().iter().rev().cloned().collect()
    }

    /// Bumps whenever the list changes.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }
}

pub struct MessageStore {
    view: MessageView,
    next_local: AtomicU64,
}

impl Default for MessageStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageStore {
    pub fn new() -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            view: MessageView {
                messages: Arc::new(RwLock::new(Vec::new())),
                revision: Arc::new(revision),
            },
            next_local: AtomicU64::new(1),
        }
    }

    pub fn view(&self) -> &MessageView {
        &self.view
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<ChatMessage>> {
        self.view
            .messages
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn touch(&self) {
        self.view.revision.send_modify(|rev| *rev += 1);
    }

    /// Appends a locally generated user message that has not reached the
    /// backend yet.
    pub fn push_provisional(
        &self,
        content: &str,
        chat_id: Option<ChatId>,
    ) -> (CorrelationToken, ChatMessage) {
        let local = self.next_local.fetch_add(1, Ordering::Relaxed);
        let token = CorrelationToken(local);
        let message = ChatMessage {
            id: MessageId::new(format!("local-{local}")),
            role: Role::User,
            content: content.to_string(),
            created_at: OffsetDateTime::now_utc(),
            chat_id,
            audio: None,
            correlation: Some(token),
        };
        self.write().push(message.clone());
        self.touch();
        debug!(id = %message.id, "provisional message added");
        (token, message)
    }

    /// Swaps the provisional entry for its confirmed form and appends the
    /// reply, in one write. If the provisional entry is gone (the list was
    /// reloaded meanwhile) both are appended instead, unless the list now
    /// holds another conversation; then the pair is dropped and `false`
    /// returned.
    pub fn confirm(&self, token: CorrelationToken, confirmed: ChatMessage, reply: ChatMessage) -> bool {
        {
            let mut messages = self.write();
            match messages
                .iter()
                .position(|msg| msg.correlation == Some(token))
            {
                Some(index) => {
                    messages[index] = confirmed;
                    messages.insert(index + 1, reply);
                }
                None => {
                    let foreign = messages
                        .iter()
                        .any(|msg| msg.chat_id.is_some() && msg.chat_id != confirmed.chat_id);
                    if foreign {
                        debug!(id = %confirmed.id, "confirmation for another conversation dropped");
                        return false;
                    }
                    messages.retain(|msg| msg.id != confirmed.id && msg.id != reply.id);
                    messages.push(confirmed);
                    messages.push(reply);
                }
            }
        }
        self.touch();
        true
    }

    pub fn replace_all(&self, messages: Vec<ChatMessage>) {
        *self.write() = messages;
        self.touch();
    }

    pub fn clear(&self) {
        self.replace_all(Vec::new());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::Duration;

    fn confirmed_pair(token_msg: &ChatMessage, chat_id: ChatId) -> (ChatMessage, ChatMessage) {
        let at = token_msg.created_at;
        let user = ChatMessage {
            id: MessageId::confirmed(Role::User, chat_id, at),
            chat_id: Some(chat_id),
            correlation: None,
            ..token_msg.clone()
        };
        let reply = ChatMessage {
            id: MessageId::confirmed(Role::Assistant, chat_id, at),
            role: Role::Assistant,
            content: "reply".into(),
            created_at: at + Duration::milliseconds(5),
            chat_id: Some(chat_id),
            audio: None,
            correlation: None,
        };
        (user, reply)
    }

    #[test]
    fn confirm_replaces_in_place() {
        let store = MessageStore::new();
        let (token, first) = store.push_provisional("hello", None);
        let (_, second) = store.push_provisional("again", None);

        let (user, reply) = confirmed_pair(&first, 3);
        store.confirm(token, user.clone(), reply.clone());

        let ids: Vec<_> = store.view().snapshot().into_iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![user.id, reply.id, second.id]);
        assert_eq!(store.view().user_message_count(), 2);
        assert!(store.view().snapshot().iter().all(|m| m.content != "hello" || !m.is_provisional()));
    }

    #[test]
    fn confirm_after_reload_appends_without_duplicates() {
        let store = MessageStore::new();
        let (token, provisional) = store.push_provisional("hello", Some(3));
        let (user, reply) = confirmed_pair(&provisional, 3);
        store.replace_all(vec![user.clone()]);

        assert!(store.confirm(token, user.clone(), reply.clone()));

        let ids: Vec<_> = store.view().snapshot().into_iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![user.id, reply.id]);
    }

    #[test]
    fn confirm_for_another_conversation_is_dropped() {
        let store = MessageStore::new();
        let (token, provisional) = store.push_provisional("hello", None);
        let (loaded, _) = confirmed_pair(&provisional, 7);
        store.replace_all(vec![loaded.clone()]);

        let (user, reply) = confirmed_pair(&provisional, 101);
        assert!(!store.confirm(token, user, reply));

        let ids: Vec<_> = store.view().snapshot().into_iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![loaded.id]);
    }

    #[test]
    fn latest_assistant_uses_created_at() {
        let store = MessageStore::new();
        let base = OffsetDateTime::now_utc();
        let make = |id: &str, offset: i64| ChatMessage {
            id: MessageId::from(id),
            role: Role::Assistant,
            content: id.to_string(),
            created_at: base + Duration::seconds(offset),
            chat_id: Some(1),
            audio: None,
            correlation: None,
        };
        store.replace_all(vec![make("newer", 10), make("older", 0)]);
        assert_eq!(
            store.view().latest_assistant().map(|m| m.id),
            Some(MessageId::from("newer"))
        );

        store.replace_all(vec![make("a", 0), make("b", 0)]);
        assert_eq!(
            store.view().latest_assistant().map(|m| m.id),
            Some(MessageId::from("b"))
        );
    }

    #[test]
    fn display_order_is_reversed_view() {
        let store = MessageStore::new();
        store.push_provisional("one", None);
        store.push_provisional("two", None);
        let shown: Vec<_> = store
            .view()
            .display_order()
            .into_iter()
            .map(|m| m.content)
            .collect();
        assert_eq!(shown, vec!["two", "one"]);
        assert_eq!(store.view().snapshot()[0].content, "one");
    }

    #[test]
    fn revisions_bump_on_change() {
        let store = MessageStore::new();
        let rx = store.view().subscribe();
        store.push_provisional("one", None);
        store.clear();
        assert_eq!(*rx.borrow(), 2);
    }
}
