//! Turning user input into conversation state.
//!
//! [`SubmissionOrchestrator`] is the only writer of the message list. It
//! sends input to the [`ChatBackend`], reconciles the provisional entry with
//! the confirmed exchange, invalidates cached history, and hands voice-mode
//! replies to the [`PlaybackController`] for auto-play.

use crate::audio::AudioOutput;
use crate::audio_source::AudioSource;
use crate::backend::{ChatBackend, ConversationSummary, HttpChatBackend};
use crate::cache::{ViewCache, invalidate_after_write};
use crate::config::{ClientConfig, Timings};
use crate::error::{ChatError, ChatResult};
use crate::markup::{is_speakable, speech_text};
use crate::notifications::NotificationQueue;
use crate::playback::PlaybackController;
use crate::store::{MessageStore, MessageView};
use crate::tts::{HttpSpeechTransport, SpeechTransport, TtsPipeline};
use crate::types::{ChatId, ChatMessage, CorrelationToken, InputMode, MessageId, Role, Voice};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

const SIGN_IN_OR_ENTER: &str = "Please sign in or enter a message.";
const LOAD_FAILED: &str = "Failed to load chat.";
const TRANSFERRING: &str = "Transferring to a human agent...";
const AGENT_CONNECTED: &str = "Connected to a human agent.";
const EMPTY_NAME: &str = "Conversation name cannot be empty.";

/// Who is chatting. Submissions are refused without one.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UserSession {
    pub user_id: String,
}

/// Everything outside the process the chat view talks to.
pub struct ChatServices {
    pub backend: Arc<dyn ChatBackend>,
    pub cache: Arc<dyn ViewCache>,
    pub speech: Arc<dyn SpeechTransport>,
    pub output: Arc<dyn AudioOutput>,
}

/// Input-area state for rendering.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ComposerState {
    pub chat_id: Option<ChatId>,
    pub input: String,
    pub is_loading: bool,
    pub voice: Voice,
    pub user: Option<UserSession>,
}

/// Outcome of one backend round trip.
enum Exchanged {
    Applied(ChatMessage),
    /// The view changed while waiting; the reply was not recorded.
    Stale(MessageId),
}

pub struct SubmissionOrchestrator {
    store: MessageStore,
    playback: PlaybackController,
    notifications: NotificationQueue,
    backend: Arc<dyn ChatBackend>,
    cache: Arc<dyn ViewCache>,
    composer: Mutex<ComposerState>,
    composer_tx: watch::Sender<ComposerState>,
    /// Bumped whenever the view stops showing what in-flight work was
    /// started for: another conversation loaded, a new one started, or the
    /// view closed.
    generation: Arc<AtomicU64>,
    auto_play_delay: Duration,
    agent_connect_delay: Duration,
}

/// Clears the loading flag and the input box however `submit` exits.
struct LoadingGuard<'a> {
    orchestrator: &'a SubmissionOrchestrator,
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        self.orchestrator.update(|composer| {
            composer.is_loading = false;
            composer.input.clear();
        });
    }
}

impl SubmissionOrchestrator {
    pub fn new(services: ChatServices, timings: &Timings) -> Self {
        let store = MessageStore::new();
        let notifications =
            NotificationQueue::with_lifetimes(timings.info_lifetime, timings.error_lifetime);
        let playback = PlaybackController::new(
            services.output,
            TtsPipeline::new(services.speech, timings.tts_retry_delay),
            store.view().clone(),
            notifications.clone(),
            timings.start_delay,
        );
        let (composer_tx, _) = watch::channel(ComposerState::default());
        Self {
            store,
            playback,
            notifications,
            backend: services.backend,
            cache: services.cache,
            composer: Mutex::new(ComposerState::default()),
            composer_tx,
            generation: Arc::new(AtomicU64::new(0)),
            auto_play_delay: timings.auto_play_delay,
            agent_connect_delay: timings.agent_connect_delay,
        }
    }

    /// Wires the HTTP backend and speech endpoint named by `config`.
    pub fn from_config(
        config: &ClientConfig,
        output: Arc<dyn AudioOutput>,
        cache: Arc<dyn ViewCache>,
    ) -> Self {
        let services = ChatServices {
            backend: Arc::new(HttpChatBackend::new(&config.base_url, config.token.clone())),
            cache,
            speech: Arc::new(HttpSpeechTransport::new(&config.tts_url, config.tts_wire)),
            output,
        };
        let orchestrator = Self::new(services, &config.timings);
        orchestrator.set_voice(config.voice);
        if let Some(user) = config.user_session() {
            orchestrator.sign_in(user);
        }
        orchestrator
    }

    pub fn messages(&self) -> &MessageView {
        self.store.view()
    }

    pub fn playback(&self) -> &PlaybackController {
        &self.playback
    }

    pub fn notifications(&self) -> &NotificationQueue {
        &self.notifications
    }

    fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    fn next_generation(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    fn composer(&self) -> MutexGuard<'_, ComposerState> {
        self.composer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn update(&self, f: impl FnOnce(&mut ComposerState)) {
        let mut composer = self.composer();
        f(&mut composer);
        self.composer_tx.send_replace(composer.clone());
    }

    pub fn composer_state(&self) -> ComposerState {
        self.composer().clone()
    }

    pub fn subscribe_composer(&self) -> watch::Receiver<ComposerState> {
        self.composer_tx.subscribe()
    }

    pub fn sign_in(&self, user: UserSession) {
        info!(user = %user.user_id, "signed in");
        self.update(|composer| composer.user = Some(user));
    }

    pub fn sign_out(&self) {
        self.playback.stop();
        self.update(|composer| composer.user = None);
    }

    pub fn set_input(&self, text: impl Into<String>) {
        let text = text.into();
        self.update(|composer| composer.input = text);
    }

    pub fn set_voice(&self, voice: Voice) {
        debug!(%voice, "voice selected");
        self.update(|composer| composer.voice = voice);
    }

    pub fn voice(&self) -> Voice {
        self.composer().voice
    }

    pub fn chat_id(&self) -> Option<ChatId> {
        self.composer().chat_id
    }

    pub fn is_loading(&self) -> bool {
        self.composer().is_loading
    }

    /// Sends `text` and records the exchange.
    ///
    /// Returns the id of the assistant reply. Every failure is also posted
    /// as an error notification.
    pub async fn submit(&self, text: &str, mode: InputMode) -> ChatResult<MessageId> {
        let (signed_in, chat_id, voice) = {
            let composer = self.composer();
            (composer.user.is_some(), composer.chat_id, composer.voice)
        };
        if text.trim().is_empty() || !signed_in {
            self.notifications.error(SIGN_IN_OR_ENTER);
            return Err(if signed_in {
                ChatError::EmptyInput
            } else {
                ChatError::AuthRequired
            });
        }

        self.update(|composer| composer.is_loading = true);
        let _loading = LoadingGuard { orchestrator: self };

        let generation = self.generation();
        let (token, provisional) = self.store.push_provisional(text, chat_id);
        match self.exchange(token, provisional, mode, voice, generation).await {
            Ok(Exchanged::Applied(reply)) => {
                if mode == InputMode::Voice {
                    self.schedule_auto_play(&reply, voice, generation);
                }
                Ok(reply.id)
            }
            Ok(Exchanged::Stale(reply_id)) => Ok(reply_id),
            Err(err) => {
                error!(%err, "submit failed");
                self.notifications.error(format!("Error: {err}"));
                Err(err)
            }
        }
    }

    async fn exchange(
        &self,
        token: CorrelationToken,
        provisional: ChatMessage,
        mode: InputMode,
        voice: Voice,
        generation: u64,
    ) -> ChatResult<Exchanged> {
        let sent_voice = (mode == InputMode::Voice).then_some(voice);
        let provisional_chat_id = provisional.chat_id;

        let (chat_id, text, audio_url) = match provisional.chat_id {
            Some(chat_id) => {
                let reply = self
                    .backend
                    .append_message(chat_id, &provisional.content, Role::User, sent_voice)
                    .await?;
                (chat_id, reply.text, reply.audio_url)
            }
            None => {
                let created = self
                    .backend
                    .create_conversation(&provisional.content, sent_voice)
                    .await?;
                info!(chat_id = created.id, "conversation created");
                (created.id, created.text, created.audio_url)
            }
        };

        let answered_at = OffsetDateTime::now_utc();
        let reply = ChatMessage {
            id: MessageId::confirmed(Role::Assistant, chat_id, answered_at),
            role: Role::Assistant,
            content: text,
            created_at: answered_at,
            chat_id: Some(chat_id),
            audio: match mode {
                InputMode::Voice => Some(AudioSource::OnDemand),
                InputMode::Text => AudioSource::parse(&audio_url),
            },
            correlation: None,
        };
        let confirmed = ChatMessage {
            id: MessageId::confirmed(Role::User, chat_id, provisional.created_at),
            chat_id: Some(chat_id),
            correlation: None,
            ..provisional
        };

        let applied =
            self.generation() == generation && self.store.confirm(token, confirmed, reply.clone());
        if applied && provisional_chat_id.is_none() {
            self.update(|composer| composer.chat_id = Some(chat_id));
        }

        invalidate_after_write(self.cache.as_ref(), chat_id).await;
        if !applied {
            warn!(chat_id, "view moved on while sending, reply not shown");
            return Ok(Exchanged::Stale(reply.id));
        }
        Ok(Exchanged::Applied(reply))
    }

    fn schedule_auto_play(&self, reply: &ChatMessage, voice: Voice, generation: u64) {
        let clean = speech_text(&reply.content);
        if !is_speakable(&clean) {
            warn!(message = %reply.id, "reply has nothing to speak");
            return;
        }
        debug!(message = %reply.id, "auto-play scheduled");
        let playback = self.playback.clone();
        let id = reply.id.clone();
        let delay = self.auto_play_delay;
        let current = self.generation.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if current.load(Ordering::SeqCst) != generation {
                debug!(message = %id, "auto-play dropped, view moved on");
                return;
            }
            if let Err(err) = playback
                .play(&id, AudioSource::SynthesizeFrom(clean), voice, true)
                .await
            {
                debug!(message = %id, %err, "auto-play did not start");
            }
            if current.load(Ordering::SeqCst) != generation {
                playback.stop_message(&id);
            }
        });
    }

    /// Entry point for speech recognition results. Blank transcripts are
    /// dropped.
    pub async fn submit_transcript(&self, transcript: &str) -> ChatResult<Option<MessageId>> {
        if transcript.trim().is_empty() {
            debug!("empty transcript ignored");
            return Ok(None);
        }
        self.submit(transcript, InputMode::Voice).await.map(Some)
    }

    /// Replaces the view's contents with a stored conversation.
    pub async fn load_conversation(&self, chat_id: ChatId) -> ChatResult<()> {
        let conversation = match self.backend.get_conversation(chat_id).await {
            Ok(conversation) => conversation,
            Err(err) => {
                error!(chat_id, %err, "failed to load chat");
                self.notifications.error(LOAD_FAILED);
                return Err(err);
            }
        };
        self.next_generation();
        self.playback.stop();
        let messages = conversation
            .messages
            .into_iter()
            .map(|stored| stored.into_chat_message())
            .collect::<Vec<_>>();
        debug!(chat_id, count = messages.len(), "conversation loaded");
        self.store.replace_all(messages);
        self.update(|composer| composer.chat_id = Some(chat_id));
        Ok(())
    }

    /// Leaves the current conversation; the next submit creates a new one.
    pub fn start_new_conversation(&self) {
        self.next_generation();
        self.playback.stop();
        self.store.clear();
        self.update(|composer| composer.chat_id = None);
    }

    pub fn request_agent_transfer(&self) {
        self.notifications.info(TRANSFERRING);
        let notifications = self.notifications.clone();
        let delay = self.agent_connect_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            notifications.info(AGENT_CONNECTED);
        });
    }

    pub async fn list_conversations(&self) -> ChatResult<Vec<ConversationSummary>> {
        self.backend
            .list_conversations()
            .await
            .inspect_err(|err| {
                self.notifications.error(format!("Error: {err}"));
            })
    }

    pub async fn rename_conversation(&self, chat_id: ChatId, name: &str) -> ChatResult<()> {
        let name = name.trim();
        if name.is_empty() {
            warn!(chat_id, "rename refused, empty name");
            self.notifications.error(EMPTY_NAME);
            return Err(ChatError::EmptyInput);
        }
        if let Err(err) = self.backend.rename_conversation(chat_id, name).await {
            self.notifications.error(format!("Error: {err}"));
            return Err(err);
        }
        invalidate_after_write(self.cache.as_ref(), chat_id).await;
        Ok(())
    }

    /// Deleting the open conversation also empties the view.
    pub async fn delete_conversation(&self, chat_id: ChatId) -> ChatResult<()> {
        if let Err(err) = self.backend.delete_conversation(chat_id).await {
            self.notifications.error(format!("Error: {err}"));
            return Err(err);
        }
        if self.chat_id() == Some(chat_id) {
            self.start_new_conversation();
        }
        invalidate_after_write(self.cache.as_ref(), chat_id).await;
        info!(chat_id, "conversation deleted");
        Ok(())
    }

    /// Releases audio when the chat view goes away.
    pub fn teardown_view(&self) {
        self.next_generation();
        self.playback.teardown_view();
    }
}

impl Drop for SubmissionOrchestrator {
    fn drop(&mut self) {
        self.teardown_view();
    }
}
