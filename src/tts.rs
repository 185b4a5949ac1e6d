//! On-demand speech synthesis for assistant replies.
//!
//! [`TtsPipeline`] owns the policy (input validation, one retry on 429/5xx,
//! empty-payload detection); a [`SpeechTransport`] only moves bytes.

use crate::error::{ChatError, ChatResult};
use crate::markup::is_speakable;
use crate::types::Voice;
use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpeechRequest {
    pub text: String,
    pub voice: Voice,
}

/// Raw outcome of one request; status interpretation is the pipeline's job.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpeechReply {
    pub status: u16,
    pub body: Bytes,
}

#[async_trait]
pub trait SpeechTransport: Send + Sync {
    async fn send(&self, request: &SpeechRequest) -> ChatResult<SpeechReply>;
}

/// Request body shape of the speech endpoint.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SpeechWire {
    /// The app's own proxy: `{ "text", "voice" }`.
    #[default]
    Proxy,
    /// OpenAI-compatible `/v1/audio/speech`: `{ "input", "voice", "response_format" }`.
    OpenAi,
}

impl FromStr for SpeechWire {
    type Err = ChatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "proxy" => Ok(Self::Proxy),
            "openai" => Ok(Self::OpenAi),
            other => Err(ChatError::Config(format!("unknown speech wire format {other:?}"))),
        }
    }
}

#[derive(Serialize)]
struct ProxyBody<'a> {
    text: &'a str,
    voice: Voice,
}

#[derive(Serialize)]
struct OpenAiSpeechBody<'a> {
    input: &'a str,
    voice: Voice,
    response_format: &'static str,
}

pub struct HttpSpeechTransport {
    client: reqwest::Client,
    endpoint: String,
    wire: SpeechWire,
}

impl HttpSpeechTransport {
    pub fn new(endpoint: impl Into<String>, wire: SpeechWire) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            wire,
        }
    }
}

#[async_trait]
impl SpeechTransport for HttpSpeechTransport {
    async fn send(&self, request: &SpeechRequest) -> ChatResult<SpeechReply> {
        let builder = self.client.post(&self.endpoint);
        let builder = match self.wire {
            SpeechWire::Proxy => builder.json(&ProxyBody {
                text: &request.text,
                voice: request.voice,
            }),
            SpeechWire::OpenAi => builder.json(&OpenAiSpeechBody {
                input: &request.text,
                voice: request.voice,
                response_format: "mp3",
            }),
        };

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let body = response.bytes().await?;
        Ok(SpeechReply { status, body })
    }
}

#[derive(Clone)]
pub struct TtsPipeline {
    transport: Arc<dyn SpeechTransport>,
    retry_delay: Duration,
}

impl TtsPipeline {
    pub fn new(transport: Arc<dyn SpeechTransport>, retry_delay: Duration) -> Self {
        Self {
            transport,
            retry_delay,
        }
    }

    /// Turns text into playable audio bytes.
    ///
    /// Blank text fails with [`ChatError::EmptyInput`] without touching the
    /// network. A retryable status is retried once after the fixed delay; a
    /// second one is reported as [`ChatError::SynthesisFailure`].
    pub async fn synthesize(&self, text: &str, voice: Voice) -> ChatResult<Bytes> {
        if !is_speakable(text) {
            return Err(ChatError::EmptyInput);
        }
        let request = SpeechRequest {
            text: text.to_string(),
            voice,
        };

        match self.attempt(&request).await {
            Err(ChatError::TransientFailure { status }) => {
                warn!(status, "speech request failed, retrying once");
                tokio::time::sleep(self.retry_delay).await;
                match self.attempt(&request).await {
                    Err(ChatError::TransientFailure { status }) => Err(ChatError::synthesis(
                        format!("TTS API failed: {status}"),
                    )),
                    other => other,
                }
            }
            other => other,
        }
    }

    async fn attempt(&self, request: &SpeechRequest) -> ChatResult<Bytes> {
        let reply = self
            .transport
            .send(request)
            .await
            .map_err(|err| ChatError::synthesis(err.to_string()))?;

        if !(200..300).contains(&reply.status) {
            if ChatError::is_transient_status(reply.status) {
                return Err(ChatError::TransientFailure {
                    status: reply.status,
                });
            }
            return Err(ChatError::synthesis(format!(
                "TTS API failed: {}",
                reply.status
            )));
        }
        if reply.body.is_empty() {
            return Err(ChatError::synthesis("Empty audio blob received."));
        }
        debug!(bytes = reply.body.len(), voice = %request.voice, "speech synthesized");
        Ok(reply.body)
    }
}
