/// Audio output for the chat view
///
/// The playback controller never touches a device directly. It talks to an
/// [`AudioOutput`], which hands out temporary object URLs for fetched bytes
/// and loads [`AudioHandle`]s for URLs.
///
/// # Backends
///
/// - `headless` - no sound; records every lifecycle call. Used when no device
///   is available and by the tests
/// - `native` - rodio on the default output device (feature `native-audio`)
mod headless;
#[cfg(feature = "native-audio")]
mod native;

pub use headless::{HeadlessOutput, OutputEvent};
#[cfg(feature = "native-audio")]
pub use native::RodioOutput;

use crate::error::ChatResult;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

const OBJECT_URL_PREFIX: &str = "blob:support-chat/";

/// Something a loaded handle reports back on its own.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PlaybackEvent {
    Ended,
    Failed(String),
}

/// Callbacks attached to one handle. Dropping the last clone detaches them.
#[derive(Clone)]
pub struct PlaybackEvents {
    sink: Arc<dyn Fn(PlaybackEvent) + Send + Sync>,
}

impl PlaybackEvents {
    pub fn new(sink: impl Fn(PlaybackEvent) + Send + Sync + 'static) -> Self {
        Self {
            sink: Arc::new(sink),
        }
    }

    pub fn ended(&self) {
        (self.sink)(PlaybackEvent::Ended);
    }

    pub fn failed(&self, reason: impl Into<String>) {
        (self.sink)(PlaybackEvent::Failed(reason.into()));
    }
}

/// One loaded piece of audio.
pub trait AudioHandle: Send {
    fn url(&self) -> &str;

    /// Starts playback, or resumes it after [`AudioHandle::pause`].
    fn play(&mut self) -> ChatResult<()>;

    fn pause(&mut self);

    /// Pauses, rewinds and detaches the callbacks. Nothing is reported after
    /// this returns. Must be safe to call more than once.
    fn release(&mut self);
}

#[async_trait]
pub trait AudioOutput: Send + Sync {
    /// Keeps `audio` alive under a temporary URL until it is revoked.
    fn create_object_url(&self, audio: Bytes) -> String;

    fn revoke_object_url(&self, url: &str);

    /// Prepares `url` for playback without starting it.
    async fn load(&self, url: &str, events: PlaybackEvents) -> ChatResult<Box<dyn AudioHandle>>;
}

pub fn is_object_url(url: &str) -> bool {
    url.starts_with(OBJECT_URL_PREFIX)
}

/// Bytes behind the object URLs an output has handed out.
#[derive(Default)]
pub struct ObjectUrls {
    counter: AtomicU64,
    entries: Mutex<HashMap<String, Bytes>>,
}

impl ObjectUrls {
    fn entries(&self) -> MutexGuard<'_, HashMap<String, Bytes>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn create(&self, audio: Bytes) -> String {
        let id = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        let url = format!("{OBJECT_URL_PREFIX}{id}");
        self.entries().insert(url.clone(), audio);
        url
    }

    /// Returns false when the URL was unknown or already revoked.
    pub fn revoke(&self, url: &str) -> bool {
        self.entries().remove(url).is_some()
    }

    pub fn get(&self, url: &str) -> Option<Bytes> {
        self.entries().get(url).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }
}
