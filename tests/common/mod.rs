#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;
use support_chat::backend::{
    ChatBackend, Conversation, ConversationSummary, CreatedConversation, Reply, StoredMessage,
};
use support_chat::error::{ChatError, ChatResult};
use support_chat::tts::{SpeechReply, SpeechRequest, SpeechTransport};
use support_chat::types::{ChatId, ChatMessage, MessageId, Role, Voice};
use time::OffsetDateTime;

pub const AUDIO: &[u8] = b"ID3fake-mp3";

/// Lets spawned tasks (event dispatch, timers due now) run.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

pub fn assistant(id: &str, content: &str, seconds: i64) -> ChatMessage {
    ChatMessage {
        id: MessageId::from(id),
        role: Role::Assistant,
        content: content.to_string(),
        created_at: OffsetDateTime::UNIX_EPOCH + time::Duration::seconds(seconds),
        chat_id: Some(1),
        audio: None,
        correlation: None,
    }
}

pub fn user(id: &str, content: &str, seconds: i64) -> ChatMessage {
    ChatMessage {
        role: Role::User,
        ..assistant(id, content, seconds)
    }
}

/// Speech endpoint double: answers 200 with [`AUDIO`] unless told otherwise.
#[derive(Default)]
pub struct FakeSpeech {
    statuses: Mutex<VecDeque<u16>>,
    delay: Duration,
    requests: Mutex<Vec<SpeechRequest>>,
}

impl FakeSpeech {
    pub fn with_statuses(statuses: &[u16]) -> Self {
        Self {
            statuses: Mutex::new(statuses.iter().copied().collect()),
            ..Self::default()
        }
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn requests(&self) -> Vec<SpeechRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl SpeechTransport for FakeSpeech {
    async fn send(&self, request: &SpeechRequest) -> ChatResult<SpeechReply> {
        self.requests.lock().unwrap().push(request.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let status = self.statuses.lock().unwrap().pop_front().unwrap_or(200);
        let body = if status == 200 {
            Bytes::from_static(AUDIO)
        } else {
            Bytes::new()
        };
        Ok(SpeechReply { status, body })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BackendCall {
    Create {
        first_message: String,
        voice: Option<Voice>,
    },
    Append {
        chat_id: ChatId,
        content: String,
        voice: Option<Voice>,
    },
    List,
    Get(ChatId),
    Rename(ChatId, String),
    Delete(ChatId),
}

/// In-memory chat backend. Replies echo the input unless a reply text is set.
pub struct FakeBackend {
    calls: Mutex<Vec<BackendCall>>,
    next_id: Mutex<ChatId>,
    reply_text: Mutex<Option<String>>,
    audio_url: Mutex<String>,
    failure: Mutex<Option<ChatError>>,
    delay: Duration,
    stored: Mutex<HashMap<ChatId, Conversation>>,
}

impl Default for FakeBackend {
    fn default() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            next_id: Mutex::new(100),
            reply_text: Mutex::new(None),
            audio_url: Mutex::new(String::new()),
            failure: Mutex::new(None),
            delay: Duration::ZERO,
            stored: Mutex::new(HashMap::new()),
        }
    }
}

impl FakeBackend {
    pub fn slow(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<BackendCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn reply_with(&self, text: &str) {
        *self.reply_text.lock().unwrap() = Some(text.to_string());
    }

    pub fn audio_url(&self, url: &str) {
        *self.audio_url.lock().unwrap() = url.to_string();
    }

    pub fn fail_next(&self, err: ChatError) {
        *self.failure.lock().unwrap() = Some(err);
    }

    pub fn store_conversation(&self, id: ChatId, messages: &[(Role, &str, i64)]) {
        let at = |seconds: i64| OffsetDateTime::UNIX_EPOCH + time::Duration::seconds(seconds);
        let conversation = Conversation {
            id,
            name: format!("chat {id}"),
            created_at: at(0),
            updated_at: at(0),
            messages: messages
                .iter()
                .enumerate()
                .map(|(n, (role, content, seconds))| StoredMessage {
                    id: n as i64 + 1,
                    content: content.to_string(),
                    role: *role,
                    created_at: at(*seconds),
                    chat_id: id,
                    audio_url: None,
                })
                .collect(),
        };
        self.stored.lock().unwrap().insert(id, conversation);
    }

    async fn step(&self, call: BackendCall) -> ChatResult<()> {
        self.calls.lock().unwrap().push(call);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match self.failure.lock().unwrap().take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn answer(&self, input: &str) -> String {
        self.reply_text
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(|| format!("echo: {input}"))
    }
}

#[async_trait]
impl ChatBackend for FakeBackend {
    async fn create_conversation(
        &self,
        first_message: &str,
        voice: Option<Voice>,
    ) -> ChatResult<CreatedConversation> {
        self.step(BackendCall::Create {
            first_message: first_message.to_string(),
            voice,
        })
        .await?;
        let id = {
            let mut next = self.next_id.lock().unwrap();
            *next += 1;
            *next
        };
        Ok(CreatedConversation {
            id,
            text: self.answer(first_message),
            audio_url: self.audio_url.lock().unwrap().clone(),
        })
    }

    async fn append_message(
        &self,
        chat_id: ChatId,
        content: &str,
        _role: Role,
        voice: Option<Voice>,
    ) -> ChatResult<Reply> {
        self.step(BackendCall::Append {
            chat_id,
            content: content.to_string(),
            voice,
        })
        .await?;
        Ok(Reply {
            text: self.answer(content),
            audio_url: self.audio_url.lock().unwrap().clone(),
        })
    }

    async fn list_conversations(&self) -> ChatResult<Vec<ConversationSummary>> {
        self.step(BackendCall::List).await?;
        Ok(self
            .stored
            .lock()
            .unwrap()
            .values()
            .map(|conversation| ConversationSummary {
                id: conversation.id,
                name: conversation.name.clone(),
                created_at: conversation.created_at,
                updated_at: conversation.updated_at,
                messages: conversation.messages.last().cloned().into_iter().collect(),
            })
            .collect())
    }

    async fn get_conversation(&self, chat_id: ChatId) -> ChatResult<Conversation> {
        self.step(BackendCall::Get(chat_id)).await?;
        self.stored
            .lock()
            .unwrap()
            .get(&chat_id)
            .cloned()
            .ok_or_else(|| ChatError::NotFound(format!("conversation {chat_id}")))
    }

    async fn rename_conversation(&self, chat_id: ChatId, name: &str) -> ChatResult<()> {
        self.step(BackendCall::Rename(chat_id, name.to_string())).await
    }

    async fn delete_conversation(&self, chat_id: ChatId) -> ChatResult<()> {
        self.step(BackendCall::Delete(chat_id)).await?;
        self.stored.lock().unwrap().remove(&chat_id);
        Ok(())
    }
}
