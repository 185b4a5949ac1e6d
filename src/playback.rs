//! The chat view's single audio slot.
//!
//! [`PlaybackController`] owns at most one [`AudioHandle`] and the session
//! describing it. Every exit path (natural end, error, stop, a newer play
//! request, view teardown) goes through one teardown routine, which also
//! bumps the session ticket. Anything that awaited (speech synthesis, handle
//! loading, the start delay) re-checks its ticket before touching the
//! session, so results of superseded requests are dropped.

use crate::audio::{AudioHandle, AudioOutput, PlaybackEvent, PlaybackEvents};
use crate::audio_source::{AudioSource, ResolvedSource};
use crate::error::{ChatError, ChatResult};
use crate::markup::is_speakable;
use crate::notifications::NotificationQueue;
use crate::store::MessageView;
use crate::tts::TtsPipeline;
use crate::types::{ChatMessage, MessageId, Role, Voice};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

pub const DEFAULT_START_DELAY: Duration = Duration::from_millis(500);

const MESSAGE_NOT_FOUND: &str = "Message not found.";
const LATEST_ONLY: &str = "Audio playback is only allowed for the latest assistant message.";
const ALREADY_PLAYING: &str = "Audio is already playing.";
const NO_CONTENT: &str = "No content to play.";
const NO_SOURCE: &str = "No valid audio source available.";

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum PlaybackState {
    #[default]
    Idle,
    /// Fetching or decoding; nothing audible yet.
    Loading(MessageId),
    Playing(MessageId),
    Paused(MessageId),
}

impl PlaybackState {
    pub fn active_id(&self) -> Option<&MessageId> {
        match self {
            PlaybackState::Idle => None,
            PlaybackState::Loading(id) | PlaybackState::Playing(id) | PlaybackState::Paused(id) => {
                Some(id)
            }
        }
    }
}

/// What the view needs to draw the audio controls.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PlaybackSnapshot {
    pub state: PlaybackState,
    pub is_auto_play: bool,
}

impl PlaybackSnapshot {
    pub fn is_playing(&self, id: &MessageId) -> bool {
        matches!(&self.state, PlaybackState::Playing(active) if active == id)
    }

    pub fn is_paused(&self, id: &MessageId) -> bool {
        matches!(&self.state, PlaybackState::Paused(active) if active == id)
    }

    pub fn is_loading(&self, id: &MessageId) -> bool {
        matches!(&self.state, PlaybackState::Loading(active) if active == id)
    }

    /// The floating stop button is for auto-played replies only.
    pub fn shows_stop_overlay(&self) -> bool {
        self.is_auto_play && matches!(self.state, PlaybackState::Playing(_))
    }
}

struct Session {
    state: PlaybackState,
    is_auto_play: bool,
    ticket: u64,
    handle: Option<Box<dyn AudioHandle>>,
    object_url: Option<String>,
}

struct Shared {
    session: Mutex<Session>,
    output: Arc<dyn AudioOutput>,
    tts: TtsPipeline,
    messages: MessageView,
    notifications: NotificationQueue,
    start_delay: Duration,
    snapshots: watch::Sender<PlaybackSnapshot>,
}

impl Shared {
    fn session(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, session: &Session) {
        self.snapshots.send_replace(PlaybackSnapshot {
            state: session.state.clone(),
            is_auto_play: session.is_auto_play,
        });
    }

    /// Releases the handle, revokes the object URL and resets the session.
    /// Idempotent.
    fn teardown(&self, session: &mut Session) {
        if let Some(mut handle) = session.handle.take() {
            debug!(url = handle.url(), "releasing audio handle");
            handle.release();
        }
        if let Some(url) = session.object_url.take() {
            self.output.revoke_object_url(&url);
        }
        if let Some(id) = session.state.active_id() {
            info!(message = %id, "playback cleared");
        }
        session.state = PlaybackState::Idle;
        session.is_auto_play = false;
        session.ticket += 1;
    }

    fn stop(&self) {
        let mut session = self.session();
        self.teardown(&mut session);
        self.publish(&session);
    }

    /// Tears down and reports, unless a newer request already took over.
    fn fail_current(&self, ticket: u64, text: String) {
        let mut session = self.session();
        if session.ticket != ticket {
            warn!(ticket, "{text} (superseded request, not reported)");
            return;
        }
        self.teardown(&mut session);
        self.publish(&session);
        drop(session);
        self.notifications.error(text);
    }

    fn on_event(&self, ticket: u64, event: PlaybackEvent) {
        let mut session = self.session();
        if session.ticket != ticket {
            debug!(ticket, ?event, "event from released audio ignored");
            return;
        }
        let message = session.state.active_id().cloned();
        self.teardown(&mut session);
        self.publish(&session);
        drop(session);

        match event {
            PlaybackEvent::Ended => info!(message = ?message, "playback ended"),
            PlaybackEvent::Failed(reason) => {
                error!(message = ?message, %reason, "playback error");
                self.notifications
                    .error(format!("Failed to play audio: {reason}"));
            }
        }
    }

    fn resume(&self, session: &mut Session) -> ChatResult<()> {
        let started = match session.handle.as_mut() {
            Some(handle) => handle.play(),
            None => Err(ChatError::playback("paused audio has no handle")),
        };
        match started {
            Ok(()) => {
                if let PlaybackState::Paused(id) = &session.state {
                    info!(message = %id, "playback resumed");
                    session.state = PlaybackState::Playing(id.clone());
                }
                self.publish(session);
                Ok(())
            }
            Err(err) => {
                self.teardown(session);
                self.publish(session);
                self.notifications
                    .error(format!("Failed to play audio: {err}"));
                Err(err)
            }
        }
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        let mut session = self.session();
        if let Some(mut handle) = session.handle.take() {
            handle.release();
        }
        if let Some(url) = session.object_url.take() {
            self.output.revoke_object_url(&url);
        }
    }
}

/// Cheap to clone; clones drive the same audio slot.
#[derive(Clone)]
pub struct PlaybackController {
    shared: Arc<Shared>,
}

impl PlaybackController {
    pub fn new(
        output: Arc<dyn AudioOutput>,
        tts: TtsPipeline,
        messages: MessageView,
        notifications: NotificationQueue,
        start_delay: Duration,
    ) -> Self {
        let (snapshots, _) = watch::channel(PlaybackSnapshot::default());
        Self {
            shared: Arc::new(Shared {
                session: Mutex::new(Session {
                    state: PlaybackState::Idle,
                    is_auto_play: false,
                    ticket: 0,
                    handle: None,
                    object_url: None,
                }),
                output,
                tts,
                messages,
                notifications,
                start_delay,
                snapshots,
            }),
        }
    }

    pub fn snapshot(&self) -> PlaybackSnapshot {
        self.shared.snapshots.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<PlaybackSnapshot> {
        self.shared.snapshots.subscribe()
    }

    /// Plays the audio for `message_id`.
    ///
    /// Manual requests (`is_auto_play == false`) are only honored for the
    /// newest assistant message. Every failure is also reported through the
    /// notification queue; a request that gets superseded while loading
    /// returns `Ok(())` without touching the session.
    pub async fn play(
        &self,
        message_id: &MessageId,
        source: AudioSource,
        voice: Voice,
        is_auto_play: bool,
    ) -> ChatResult<()> {
        let message = self.shared.messages.get(message_id);
        if !is_auto_play {
            self.check_eligible(message_id, message.as_ref())?;
        }

        let is_replay = source.is_replay();
        {
            let mut session = self.shared.session();
            let same_message = session.state.active_id() == Some(message_id);
            if same_message && matches!(session.state, PlaybackState::Playing(_)) {
                drop(session);
                self.shared.notifications.error(ALREADY_PLAYING);
                return Err(ChatError::playback(ALREADY_PLAYING));
            }
            if same_message && matches!(session.state, PlaybackState::Paused(_)) && !is_replay {
                return self.shared.resume(&mut session);
            }
        }

        let resolved = source.resolve(message.as_ref().map(|msg| msg.content.as_str()));

        let ticket = {
            let mut session = self.shared.session();
            self.shared.teardown(&mut session);
            session.state = PlaybackState::Loading(message_id.clone());
            session.is_auto_play = is_auto_play;
            self.shared.publish(&session);
            session.ticket
        };
        debug!(message = %message_id, ticket, auto_play = is_auto_play, "loading audio");

        let url = match resolved {
            ResolvedSource::Speech(text) => {
                if !is_speakable(&text) {
                    self.shared.fail_current(ticket, NO_CONTENT.to_string());
                    return Err(ChatError::EmptyInput);
                }
                let audio = match self.shared.tts.synthesize(&text, voice).await {
                    Ok(audio) => audio,
                    Err(err) => {
                        self.shared.fail_current(ticket, format!("TTS error: {err}"));
                        return Err(err);
                    }
                };
                let mut session = self.shared.session();
                if session.ticket != ticket {
                    warn!(message = %message_id, "speech for a superseded request discarded");
                    return Ok(());
                }
                let url = self.shared.output.create_object_url(audio);
                session.object_url = Some(url.clone());
                url
            }
            ResolvedSource::Url(url) if !url.trim().is_empty() => url,
            ResolvedSource::Url(_) => {
                self.shared.fail_current(ticket, NO_SOURCE.to_string());
                return Err(ChatError::playback(NO_SOURCE));
            }
        };

        let handle = match self.shared.output.load(&url, self.events_for(ticket)).await {
            Ok(handle) => handle,
            Err(err) => {
                self.shared
                    .fail_current(ticket, format!("Failed to play audio: {err}"));
                return Err(err);
            }
        };
        {
            let mut session = self.shared.session();
            if session.ticket != ticket {
                let mut handle = handle;
                handle.release();
                warn!(message = %message_id, "audio for a superseded request discarded");
                return Ok(());
            }
            session.handle = Some(handle);
            session.state = PlaybackState::Playing(message_id.clone());
            self.shared.publish(&session);
        }

        tokio::time::sleep(self.shared.start_delay).await;

        let mut session = self.shared.session();
        if session.ticket != ticket || session.state != PlaybackState::Playing(message_id.clone()) {
            debug!(message = %message_id, "start skipped, session moved on");
            return Ok(());
        }
        let started = match session.handle.as_mut() {
            Some(handle) => handle.play(),
            None => Err(ChatError::playback("audio handle missing")),
        };
        if let Err(err) = started {
            self.shared.teardown(&mut session);
            self.shared.publish(&session);
            drop(session);
            self.shared
                .notifications
                .error(format!("Failed to play audio: {err}"));
            return Err(err);
        }
        info!(message = %message_id, auto_play = is_auto_play, "playback started");
        Ok(())
    }

    /// Pauses `message_id` if, and only if, it is the one playing.
    pub fn pause(&self, message_id: &MessageId) -> bool {
        let mut session = self.shared.session();
        if session.state != PlaybackState::Playing(message_id.clone()) {
            return false;
        }
        if let Some(handle) = session.handle.as_mut() {
            handle.pause();
        }
        session.state = PlaybackState::Paused(message_id.clone());
        self.shared.publish(&session);
        info!(message = %message_id, "playback paused");
        true
    }

    /// Stops `message_id` if it owns the audio slot.
    pub fn stop_message(&self, message_id: &MessageId) -> bool {
        let mut session = self.shared.session();
        if session.state.active_id() != Some(message_id) {
            return false;
        }
        self.shared.teardown(&mut session);
        self.shared.publish(&session);
        true
    }

    pub fn stop(&self) {
        self.shared.stop();
    }

    /// Releases the audio slot when the chat view goes away. Late results of
    /// requests still in flight are discarded.
    pub fn teardown_view(&self) {
        debug!("chat view closed, releasing audio");
        self.shared.stop();
    }

    fn check_eligible(&self, message_id: &MessageId, message: Option<&ChatMessage>) -> ChatResult<()> {
        let Some(message) = message else {
            self.shared.notifications.error(MESSAGE_NOT_FOUND);
            self.stop();
            return Err(ChatError::NotFound(format!("message {message_id}")));
        };
        let is_latest = message.role == Role::Assistant
            && self
                .shared
                .messages
                .latest_assistant()
                .is_some_and(|latest| latest.id == message.id);
        if !is_latest {
            warn!(message = %message_id, "manual playback of a stale message rejected");
            self.shared.notifications.error(LATEST_ONLY);
            self.stop();
            return Err(ChatError::playback(LATEST_ONLY));
        }
        Ok(())
    }

    fn events_for(&self, ticket: u64) -> PlaybackEvents {
        let shared = Arc::downgrade(&self.shared);
        let runtime = tokio::runtime::Handle::current();
        PlaybackEvents::new(move |event| {
            let shared = shared.clone();
            runtime.spawn(async move {
                if let Some(shared) = shared.upgrade() {
                    shared.on_event(ticket, event);
                }
            });
        })
    }
}
