//! Environment driven client configuration.
//!
//! `.env` is tried first (desktop development). Builds that ship without
//! one fall back to the bundled `assets/config.env`; only keys missing from
//! the environment are taken from it.

use crate::error::{ChatError, ChatResult};
use crate::submit::UserSession;
use crate::tts::SpeechWire;
use crate::types::Voice;
use std::time::Duration;
use tracing::debug;

const BUNDLED_CONFIG: &str = include_str!("../assets/config.env");

pub const DEFAULT_BASE_URL: &str = "http://localhost:3000";

/// Delays the chat view waits on. Tests shrink or pause them.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Timings {
    pub tts_retry_delay: Duration,
    /// Between attaching a handle and starting it.
    pub start_delay: Duration,
    /// Between a voice-mode reply landing and its auto-play.
    pub auto_play_delay: Duration,
    pub info_lifetime: Duration,
    pub error_lifetime: Duration,
    pub agent_connect_delay: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            tts_retry_delay: crate::tts::DEFAULT_RETRY_DELAY,
            start_delay: crate::playback::DEFAULT_START_DELAY,
            auto_play_delay: Duration::from_millis(200),
            info_lifetime: crate::notifications::INFO_LIFETIME,
            error_lifetime: crate::notifications::ERROR_LIFETIME,
            agent_connect_delay: Duration::from_secs(2),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientConfig {
    pub base_url: String,
    pub tts_url: String,
    pub tts_wire: SpeechWire,
    pub voice: Voice,
    pub token: Option<String>,
    pub user_id: Option<String>,
    pub timings: Timings,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            tts_url: format!("{DEFAULT_BASE_URL}/api/tts"),
            tts_wire: SpeechWire::default(),
            voice: Voice::default(),
            token: None,
            user_id: None,
            timings: Timings::default(),
        }
    }
}

impl ClientConfig {
    /// Reads the process environment. Run [`load_env`] first.
    pub fn from_env() -> ChatResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> ChatResult<Self> {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let base_url = get("SUPPORT_CHAT_BASE_URL")
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(ChatError::Config(format!(
                "SUPPORT_CHAT_BASE_URL must be an http(s) URL, got {base_url:?}"
            )));
        }
        let tts_url = get("SUPPORT_CHAT_TTS_URL").unwrap_or_else(|| format!("{base_url}/api/tts"));
        let tts_wire = get("SUPPORT_CHAT_TTS_WIRE")
            .map(|wire| wire.parse::<SpeechWire>())
            .transpose()?
            .unwrap_or_default();
        let voice = get("SUPPORT_CHAT_VOICE")
            .map(|voice| voice.parse::<Voice>())
            .transpose()?
            .unwrap_or_default();

        let config = Self {
            base_url,
            tts_url,
            tts_wire,
            voice,
            token: get("SUPPORT_CHAT_TOKEN"),
            user_id: get("SUPPORT_CHAT_USER_ID"),
            timings: Timings::default(),
        };
        debug!(base_url = %config.base_url, tts_url = %config.tts_url, "client config loaded");
        Ok(config)
    }

    /// The signed-in user, when the environment names one.
    pub fn user_session(&self) -> Option<UserSession> {
        self.user_id.as_ref().map(|user_id| UserSession {
            user_id: user_id.clone(),
        })
    }
}

/// Fills the environment from `.env`, or from the bundled defaults when
/// there is none. Must run before any other thread starts.
#[cfg(not(target_arch = "wasm32"))]
pub fn load_env() {
    if dotenvy::dotenv().is_ok() {
        return;
    }
    load_bundled_config();
}

#[cfg(target_arch = "wasm32")]
pub fn load_env() {
    load_bundled_config();
}

fn load_bundled_config() {
    for (key, value) in parse_env_lines(BUNDLED_CONFIG) {
        if std::env::var(key).is_err() {
            // SAFETY: load_env runs at startup, before any other thread exists.
            unsafe {
                std::env::set_var(key, value);
            }
        }
    }
}

fn parse_env_lines(source: &str) -> impl Iterator<Item = (&str, &str)> {
    source
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once('='))
        .map(|(key, value)| (key.trim(), value.trim()))
}
