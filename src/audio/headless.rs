use super::{AudioHandle, AudioOutput, ObjectUrls, PlaybackEvents, is_object_url};
use crate::error::{ChatError, ChatResult};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// Lifecycle calls, in the order the output saw them.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OutputEvent {
    Created(String),
    Revoked(String),
    Loaded(String),
    Played(String),
    Paused(String),
    Released(String),
}

struct Live {
    key: u64,
    url: String,
    playing: bool,
    events: Option<PlaybackEvents>,
}

#[derive(Default)]
struct State {
    next_key: u64,
    live: Vec<Live>,
    log: Vec<OutputEvent>,
    failing_urls: HashSet<String>,
}

/// An output without a device.
///
/// Handles "play" instantly and never end on their own; [`HeadlessOutput::finish`]
/// and [`HeadlessOutput::fail`] stand in for the device reporting back.
#[derive(Clone, Default)]
pub struct HeadlessOutput {
    state: Arc<Mutex<State>>,
    urls: Arc<ObjectUrls>,
}

impl HeadlessOutput {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn log(&self) -> Vec<OutputEvent> {
        self.state().log.clone()
    }

    /// Handles loaded and not yet released.
    pub fn live_handles(&self) -> usize {
        self.state().live.len()
    }

    /// URL of the handle currently producing sound, if any.
    pub fn playing_url(&self) -> Option<String> {
        self.state()
            .live
            .iter()
            .find(|live| live.playing)
            .map(|live| live.url.clone())
    }

    /// Object URLs created and not yet revoked.
    pub fn outstanding_object_urls(&self) -> usize {
        self.urls.len()
    }

    /// Makes later loads of `url` fail the way an undecodable file would.
    pub fn fail_loads_of(&self, url: impl Into<String>) {
        self.state().failing_urls.insert(url.into());
    }

    /// Reports natural end of the live handle for `url`.
    pub fn finish(&self, url: &str) -> bool {
        match self.events_for(url) {
            Some(events) => {
                events.ended();
                true
            }
            None => false,
        }
    }

    /// Reports a playback error on the live handle for `url`.
    pub fn fail(&self, url: &str, reason: &str) -> bool {
        match self.events_for(url) {
            Some(events) => {
                events.failed(reason);
                true
            }
            None => false,
        }
    }

    // Cloned out so the callback never runs under our lock.
    fn events_for(&self, url: &str) -> Option<PlaybackEvents> {
        self.state()
            .live
            .iter()
            .find(|live| live.url == url)
            .and_then(|live| live.events.clone())
    }
}

#[async_trait]
impl AudioOutput for HeadlessOutput {
    fn create_object_url(&self, audio: Bytes) -> String {
        let url = self.urls.create(audio);
        self.state().log.push(OutputEvent::Created(url.clone()));
        url
    }

    fn revoke_object_url(&self, url: &str) {
        if self.urls.revoke(url) {
            self.state().log.push(OutputEvent::Revoked(url.to_string()));
        }
    }

    async fn load(&self, url: &str, events: PlaybackEvents) -> ChatResult<Box<dyn AudioHandle>> {
        if is_object_url(url) && self.urls.get(url).is_none() {
            return Err(ChatError::playback(format!("{url} was revoked")));
        }
        let mut state = self.state();
        if state.failing_urls.contains(url) {
            return Err(ChatError::playback("The element has no supported sources."));
        }
        state.next_key += 1;
        let key = state.next_key;
        state.live.push(Live {
            key,
            url: url.to_string(),
            playing: false,
            events: Some(events),
        });
        state.log.push(OutputEvent::Loaded(url.to_string()));
        debug!(url, "headless handle loaded");
        Ok(Box::new(HeadlessHandle {
            key,
            url: url.to_string(),
            state: self.state.clone(),
            released: false,
        }))
    }
}

struct HeadlessHandle {
    key: u64,
    url: String,
    state: Arc<Mutex<State>>,
    released: bool,
}

impl HeadlessHandle {
    fn with_live(&self, f: impl FnOnce(&mut Live, &mut Vec<OutputEvent>)) {
        let mut guard = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let state = &mut *guard;
        if let Some(live) = state.live.iter_mut().find(|live| live.key == self.key) {
            f(live, &mut state.log);
        }
    }
}

impl AudioHandle for HeadlessHandle {
    fn url(&self) -> &str {
        &self.url
    }

    fn play(&mut self) -> ChatResult<()> {
        if self.released {
            return Err(ChatError::playback("handle was released"));
        }
        self.with_live(|live, log| {
            live.playing = true;
            log.push(OutputEvent::Played(live.url.clone()));
        });
        Ok(())
    }

    fn pause(&mut self) {
        self.with_live(|live, log| {
            if live.playing {
                live.playing = false;
                log.push(OutputEvent::Paused(live.url.clone()));
            }
        });
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.live.retain(|live| live.key != self.key);
        state.log.push(OutputEvent::Released(self.url.clone()));
    }
}

impl Drop for HeadlessHandle {
    fn drop(&mut self) {
        self.release();
    }
}
