//! Conversation persistence as seen from the client.
//!
//! The backend stores messages and produces the assistant's answer (it talks
//! to the retrieval service on our behalf). [`HttpChatBackend`] speaks the
//! JSON API; tests substitute their own [`ChatBackend`].

use crate::audio_source::AudioSource;
use crate::error::{ChatError, ChatResult};
use crate::types::{ChatId, ChatMessage, MessageId, Role, Voice};
use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::{debug, warn};

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedConversation {
    pub id: ChatId,
    pub text: String,
    #[serde(default)]
    pub audio_url: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reply {
    pub text: String,
    #[serde(default)]
    pub audio_url: String,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredMessage {
    pub id: i64,
    pub content: String,
    pub role: Role,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub chat_id: ChatId,
    #[serde(default)]
    pub audio_url: Option<String>,
}

impl StoredMessage {
    /// Brings a stored row into the id scheme used for live messages.
    pub fn into_chat_message(self) -> ChatMessage {
        ChatMessage {
            id: MessageId::confirmed(self.role, self.chat_id, self.created_at),
            role: self.role,
            content: self.content,
            created_at: self.created_at,
            chat_id: Some(self.chat_id),
            audio: self.audio_url.as_deref().and_then(AudioSource::parse),
            correlation: None,
        }
    }
}

/// One entry of the history sidebar.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    pub id: ChatId,
    pub name: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    /// The newest message only.
    #[serde(default)]
    pub messages: Vec<StoredMessage>,
}

impl ConversationSummary {
    pub fn last_message(&self) -> Option<&StoredMessage> {
        self.messages.first()
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: ChatId,
    pub name: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    /// Oldest first.
    #[serde(default)]
    pub messages: Vec<StoredMessage>,
}

#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Creates a conversation from its first message and returns the
    /// assistant's answer to it.
    async fn create_conversation(
        &self,
        first_message: &str,
        voice: Option<Voice>,
    ) -> ChatResult<CreatedConversation>;

    async fn append_message(
        &self,
        chat_id: ChatId,
        content: &str,
        role: Role,
        voice: Option<Voice>,
    ) -> ChatResult<Reply>;

    /// Newest first.
    async fn list_conversations(&self) -> ChatResult<Vec<ConversationSummary>>;

    async fn get_conversation(&self, chat_id: ChatId) -> ChatResult<Conversation>;

    async fn rename_conversation(&self, chat_id: ChatId, name: &str) -> ChatResult<()>;

    async fn delete_conversation(&self, chat_id: ChatId) -> ChatResult<()>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateBody<'a> {
    first_message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    voice: Option<Voice>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AppendBody<'a> {
    content: &'a str,
    role: Role,
    #[serde(skip_serializing_if = "Option::is_none")]
    voice: Option<Voice>,
}

#[derive(Serialize)]
struct RenameBody<'a> {
    name: &'a str,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(alias = "error")]
    message: String,
}

pub struct HttpChatBackend {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl HttpChatBackend {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        }
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self
            .client
            .request(method, format!("{}{}", self.base_url, path));
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn check(response: Response, what: &str) -> ChatResult<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        warn!(%status, what, "chat backend request failed");
        Err(match status {
            StatusCode::UNAUTHORIZED => ChatError::AuthRequired,
            StatusCode::NOT_FOUND => ChatError::NotFound(what.to_string()),
            _ => {
                let detail = serde_json::from_str::<ErrorBody>(&body)
                    .map(|err| err.message)
                    .unwrap_or(body);
                if detail.trim().is_empty() {
                    ChatError::backend(format!("{what}: {status}"))
                } else {
                    ChatError::backend(format!("{what}: {status}: {}", detail.trim()))
                }
            }
        })
    }

    async fn decode<T: DeserializeOwned>(response: Response, what: &str) -> ChatResult<T> {
        let response = Self::check(response, what).await?;
        let body = response.text().await?;
        Ok(serde_json::from_str(&body)?)
    }
}

#[async_trait]
impl ChatBackend for HttpChatBackend {
    async fn create_conversation(
        &self,
        first_message: &str,
        voice: Option<Voice>,
    ) -> ChatResult<CreatedConversation> {
        debug!(voice = ?voice, "creating conversation");
        let response = self
            .request(Method::POST, "/api/chat")
            .json(&CreateBody {
                first_message,
                voice,
            })
            .send()
            .await?;
        Self::decode(response, "conversation").await
    }

    async fn append_message(
        &self,
        chat_id: ChatId,
        content: &str,
        role: Role,
        voice: Option<Voice>,
    ) -> ChatResult<Reply> {
        debug!(chat_id, voice = ?voice, "appending message");
        let response = self
            .request(Method::POST, &format!("/api/chat/{chat_id}/messages"))
            .json(&AppendBody {
                content,
                role,
                voice,
            })
            .send()
            .await?;
        Self::decode(response, &format!("conversation {chat_id}")).await
    }

    async fn list_conversations(&self) -> ChatResult<Vec<ConversationSummary>> {
        let response = self.request(Method::GET, "/api/chat").send().await?;
        Self::decode(response, "conversation list").await
    }

    async fn get_conversation(&self, chat_id: ChatId) -> ChatResult<Conversation> {
        let response = self
            .request(Method::GET, &format!("/api/chat/{chat_id}"))
            .send()
            .await?;
        Self::decode(response, &format!("conversation {chat_id}")).await
    }

    async fn rename_conversation(&self, chat_id: ChatId, name: &str) -> ChatResult<()> {
        let response = self
            .request(Method::PATCH, &format!("/api/chat/{chat_id}"))
            .json(&RenameBody { name })
            .send()
            .await?;
        Self::check(response, &format!("conversation {chat_id}")).await?;
        Ok(())
    }

    async fn delete_conversation(&self, chat_id: ChatId) -> ChatResult<()> {
        let response = self
            .request(Method::DELETE, &format!("/api/chat/{chat_id}"))
            .send()
            .await?;
        Self::check(response, &format!("conversation {chat_id}")).await?;
        Ok(())
    }
}
