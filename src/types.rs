use crate::audio_source::AudioSource;
use crate::error::ChatError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use time::OffsetDateTime;

/// Server-side identifier of a conversation.
pub type ChatId = i64;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    fn id_prefix(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "ai",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Id of a message the backend has stored, e.g. `ai-12-1717171717000`.
    pub fn confirmed(role: Role, chat_id: ChatId, created_at: OffsetDateTime) -> Self {
        Self(format!(
            "{}-{}-{}",
            role.id_prefix(),
            chat_id,
            unix_millis(created_at)
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MessageId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Links a provisional message to the backend response that confirms it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CorrelationToken(pub(crate) u64);

/// The two synthesis voices the speech service offers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Voice {
    #[serde(rename = "am-ET-AmehaNeural")]
    Ameha,
    #[default]
    #[serde(rename = "am-ET-MekdesNeural")]
    Mekdes,
}

impl Voice {
    pub const ALL: [Voice; 2] = [Voice::Ameha, Voice::Mekdes];

    pub fn as_str(&self) -> &'static str {
        match self {
            Voice::Ameha => "am-ET-AmehaNeural",
            Voice::Mekdes => "am-ET-MekdesNeural",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Voice::Ameha => "Male",
            Voice::Mekdes => "Female",
        }
    }
}

impl fmt::Display for Voice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Voice {
    type Err = ChatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Voice::ALL
            .into_iter()
            .find(|voice| voice.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ChatError::Config(format!("unknown voice {s:?}")))
    }
}

/// How the user produced the text being submitted.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum InputMode {
    #[default]
    Text,
    Voice,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ChatMessage {
    pub id: MessageId,
    pub role: Role,
    pub content: String,
    pub created_at: OffsetDateTime,
    pub chat_id: Option<ChatId>,
    pub audio: Option<AudioSource>,
    /// Set only while the message is provisional.
    pub correlation: Option<CorrelationToken>,
}

impl ChatMessage {
    pub fn is_provisional(&self) -> bool {
        self.correlation.is_some()
    }

    /// Whether play/replay controls make sense for this message.
    pub fn has_audio(&self, mode: InputMode) -> bool {
        if self.audio.is_some() {
            return true;
        }
        self.role == Role::Assistant
            && !self.content.is_empty()
            && (mode == InputMode::Voice || self.content.chars().count() > 10)
    }

    /// The source a play button should hand to the controller.
    pub fn playable_source(&self) -> AudioSource {
        self.audio
            .clone()
            .unwrap_or_else(|| AudioSource::SynthesizeFrom(self.content.clone()))
    }
}

pub(crate) fn unix_millis(at: OffsetDateTime) -> i128 {
    at.unix_timestamp_nanos() / 1_000_000
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn assistant(content: &str) -> ChatMessage {
        ChatMessage {
            id: MessageId::from("ai-1-0"),
            role: Role::Assistant,
            content: content.to_string(),
            created_at: datetime!(2024-05-01 10:00 UTC),
            chat_id: Some(1),
            audio: None,
            correlation: None,
        }
    }

    #[test]
    fn confirmed_ids_follow_backend_scheme() {
        let at = datetime!(2024-05-01 10:00 UTC);
        assert_eq!(
            MessageId::confirmed(Role::Assistant, 12, at).as_str(),
            "ai-12-1714557600000"
        );
        assert_eq!(
            MessageId::confirmed(Role::User, 12, at).as_str(),
            "user-12-1714557600000"
        );
    }

    #[test]
    fn voice_parses_wire_names() {
        assert_eq!("am-ET-AmehaNeural".parse::<Voice>(), Ok(Voice::Ameha));
        assert_eq!(" am-et-mekdesneural ".parse::<Voice>(), Ok(Voice::Mekdes));
        assert!("en-US-Jenny".parse::<Voice>().is_err());
        assert_eq!(Voice::default(), Voice::Mekdes);
        assert_eq!(
            serde_json::to_string(&Voice::Ameha).ok().as_deref(),
            Some("\"am-ET-AmehaNeural\"")
        );
    }

    #[test]
    fn audio_availability() {
        assert!(!assistant("short").has_audio(InputMode::Text));
        assert!(assistant("short").has_audio(InputMode::Voice));
        assert!(assistant("a longer assistant reply").has_audio(InputMode::Text));
        assert!(!assistant("").has_audio(InputMode::Voice));

        let mut with_url = assistant("");
        with_url.audio = Some(AudioSource::DirectUrl("https://cdn/a.mp3".into()));
        assert!(with_url.has_audio(InputMode::Text));
    }

    #[test]
    fn playable_source_falls_back_to_content() {
        assert_eq!(
            assistant("Selam").playable_source(),
            AudioSource::SynthesizeFrom("Selam".into())
        );
    }
}
