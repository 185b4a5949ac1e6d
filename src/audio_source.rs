//! Where a message's audio comes from.
//!
//! The backend and older UI code encode playback intent inside a single
//! `audioUrl` string. That string is parsed exactly once, at the boundary,
//! into [`AudioSource`]; nothing past that point looks at prefixes again.

use crate::markup::speech_text;

const ON_DEMAND_PLACEHOLDER: &str = "TTS_ON_DEMAND_PLACEHOLDER";
const SYNTHESIZE_PREFIX: &str = "TTS_ON_DEMAND:";
const REPLAY_PREFIX: &str = "REPLAY:";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AudioSource {
    /// A URL the audio output can load directly.
    DirectUrl(String),
    /// Synthesize this exact text.
    SynthesizeFrom(String),
    /// Synthesize the owning message's content when asked to play.
    OnDemand,
    /// Restart playback of the wrapped source from the beginning.
    Replay(Box<AudioSource>),
}

/// What the playback controller actually has to do.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResolvedSource {
    Url(String),
    Speech(String),
}

impl AudioSource {
    /// Parses a wire `audioUrl`. Empty strings mean "no audio".
    pub fn parse(raw: &str) -> Option<Self> {
        if let Some(inner) = raw.strip_prefix(REPLAY_PREFIX) {
            return Self::parse(inner).map(|source| Self::Replay(Box::new(source)));
        }
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }
        if trimmed == ON_DEMAND_PLACEHOLDER {
            return Some(Self::OnDemand);
        }
        if let Some(text) = raw.strip_prefix(SYNTHESIZE_PREFIX) {
            return Some(Self::SynthesizeFrom(text.to_string()));
        }
        Some(Self::DirectUrl(trimmed.to_string()))
    }

    pub fn to_wire(&self) -> String {
        match self {
            Self::DirectUrl(url) => url.clone(),
            Self::SynthesizeFrom(text) => format!("{SYNTHESIZE_PREFIX}{text}"),
            Self::OnDemand => ON_DEMAND_PLACEHOLDER.to_string(),
            Self::Replay(inner) => format!("{REPLAY_PREFIX}{}", inner.to_wire()),
        }
    }

    /// Wraps the source for a replay request. Already-replay sources are kept as they are.
    pub fn replay(self) -> Self {
        match self {
            Self::Replay(_) => self,
            other => Self::Replay(Box::new(other)),
        }
    }

    pub fn is_replay(&self) -> bool {
        matches!(self, Self::Replay(_))
    }

    /// Resolves the precedence chain: replay wrapper, then the on-demand
    /// placeholder (filled from `message_text`), then synthesis or URL.
    pub fn resolve(self, message_text: Option<&str>) -> ResolvedSource {
        match self {
            Self::Replay(inner) => inner.resolve(message_text),
            Self::OnDemand => {
                ResolvedSource::Speech(message_text.map(speech_text).unwrap_or_default())
            }
            Self::SynthesizeFrom(text) => ResolvedSource::Speech(text),
            Self::DirectUrl(url) => ResolvedSource::Url(url),
        }
    }
}
