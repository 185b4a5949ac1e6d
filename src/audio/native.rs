use super::{AudioHandle, AudioOutput, ObjectUrls, PlaybackEvents, is_object_url};
use crate::error::{ChatError, ChatResult};
use async_trait::async_trait;
use bytes::Bytes;
use rodio::mixer::Mixer;
use rodio::{Decoder, OutputStreamBuilder, Sink};
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, mpsc};
use std::thread;
use tracing::{debug, warn};

/// Plays through the default output device.
///
/// The device stream lives on its own thread for as long as the output
/// exists; sinks attach to its mixer.
pub struct RodioOutput {
    mixer: Mixer,
    urls: ObjectUrls,
    client: reqwest::Client,
    _stream: StreamThread,
}

struct StreamThread {
    shutdown: mpsc::Sender<()>,
}

impl Drop for StreamThread {
    fn drop(&mut self) {
        let _ = self.shutdown.send(());
    }
}

impl RodioOutput {
    pub fn open_default() -> ChatResult<Self> {
        let (ready_tx, ready_rx) = mpsc::channel();
        let (shutdown, shutdown_rx) = mpsc::channel::<()>();

        thread::Builder::new()
            .name("audio-output".into())
            .spawn(move || match OutputStreamBuilder::open_default_stream() {
                Ok(stream) => {
                    let _ = ready_tx.send(Ok(stream.mixer().clone()));
                    let _ = shutdown_rx.recv();
                }
                Err(err) => {
                    let _ = ready_tx.send(Err(err.to_string()));
                }
            })
            .map_err(|err| ChatError::playback(err.to_string()))?;

        let mixer = ready_rx
            .recv()
            .map_err(|err| ChatError::playback(err.to_string()))?
            .map_err(ChatError::playback)?;

        Ok(Self {
            mixer,
            urls: ObjectUrls::default(),
            client: reqwest::Client::new(),
            _stream: StreamThread { shutdown },
        })
    }

    async fn fetch(&self, url: &str) -> ChatResult<Bytes> {
        if is_object_url(url) {
            return self
                .urls
                .get(url)
                .ok_or_else(|| ChatError::playback(format!("{url} was revoked")));
        }
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ChatError::playback(format!("audio fetch failed: {status}")));
        }
        Ok(response.bytes().await?)
    }
}

#[async_trait]
impl AudioOutput for RodioOutput {
    fn create_object_url(&self, audio: Bytes) -> String {
        self.urls.create(audio)
    }

    fn revoke_object_url(&self, url: &str) {
        self.urls.revoke(url);
    }

    async fn load(&self, url: &str, events: PlaybackEvents) -> ChatResult<Box<dyn AudioHandle>> {
        let audio = self.fetch(url).await?;
        let source =
            Decoder::new(Cursor::new(audio)).map_err(|err| ChatError::playback(err.to_string()))?;

        let sink = Arc::new(Sink::connect_new(&self.mixer));
        sink.pause();
        sink.append(source);

        let events = Arc::new(Mutex::new(Some(events)));
        let released = Arc::new(AtomicBool::new(false));
        spawn_end_watcher(sink.clone(), events.clone(), released.clone())?;

        debug!(url, "native handle loaded");
        Ok(Box::new(RodioHandle {
            url: url.to_string(),
            sink,
            events,
            released,
        }))
    }
}

fn spawn_end_watcher(
    sink: Arc<Sink>,
    events: Arc<Mutex<Option<PlaybackEvents>>>,
    released: Arc<AtomicBool>,
) -> ChatResult<()> {
    thread::Builder::new()
        .name("audio-end-watch".into())
        .spawn(move || {
            sink.sleep_until_end();
            if released.load(Ordering::Acquire) {
                return;
            }
            let attached = events
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone();
            if let Some(events) = attached {
                events.ended();
            }
        })
        .map(|_| ())
        .map_err(|err| ChatError::playback(err.to_string()))
}

struct RodioHandle {
    url: String,
    sink: Arc<Sink>,
    events: Arc<Mutex<Option<PlaybackEvents>>>,
    released: Arc<AtomicBool>,
}

impl AudioHandle for RodioHandle {
    fn url(&self) -> &str {
        &self.url
    }

    fn play(&mut self) -> ChatResult<()> {
        if self.released.load(Ordering::Acquire) {
            return Err(ChatError::playback("handle was released"));
        }
        self.sink.play();
        Ok(())
    }

    fn pause(&mut self) {
        self.sink.pause();
    }

    fn release(&mut self) {
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.sink.pause();
        if self.sink.try_seek(std::time::Duration::ZERO).is_err() {
            warn!(url = %self.url, "could not rewind before release");
        }
        self.sink.stop();
    }
}

impl Drop for RodioHandle {
    fn drop(&mut self) {
        self.release();
    }
}
