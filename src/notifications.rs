//! Short-lived status and error messages shown above the composer.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::watch;
use tracing::{error, info};

pub const INFO_LIFETIME: Duration = Duration::from_secs(3);
pub const ERROR_LIFETIME: Duration = Duration::from_secs(10);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NotificationId(u64);

impl fmt::Display for NotificationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "notif-{}", self.0)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Notification {
    pub id: NotificationId,
    pub text: String,
    pub is_error: bool,
    pub created_at: OffsetDateTime,
}

struct Shared {
    entries: Mutex<Vec<Notification>>,
    counter: AtomicU64,
    revision: watch::Sender<u64>,
    info_lifetime: Duration,
    error_lifetime: Duration,
}

/// Cheap to clone; all clones share one queue.
///
/// Expiry timers run on the ambient tokio runtime, so `append` must be called
/// from within one.
#[derive(Clone)]
pub struct NotificationQueue {
    shared: Arc<Shared>,
}

impl Default for NotificationQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationQueue {
    pub fn new() -> Self {
        Self::with_lifetimes(INFO_LIFETIME, ERROR_LIFETIME)
    }

    pub fn with_lifetimes(info_lifetime: Duration, error_lifetime: Duration) -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            shared: Arc::new(Shared {
                entries: Mutex::new(Vec::new()),
                counter: AtomicU64::new(1),
                revision,
                info_lifetime,
                error_lifetime,
            }),
        }
    }

    fn entries(&self) -> MutexGuard<'_, Vec<Notification>> {
        self.shared
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn touch(&self) {
        self.shared.revision.send_modify(|rev| *rev += 1);
    }

    /// Enqueues a notification and schedules its removal. Identical texts
    /// are not merged.
    pub fn append(&self, text: impl Into<String>, is_error: bool) -> NotificationId {
        let text = text.into();
        let id = NotificationId(self.shared.counter.fetch_add(1, Ordering::Relaxed));
        if is_error {
            error!(%id, "{text}");
        } else {
            info!(%id, "{text}");
        }
        self.entries().push(Notification {
            id,
            text,
            is_error,
            created_at: OffsetDateTime::now_utc(),
        });
        self.touch();

        let lifetime = if is_error {
            self.shared.error_lifetime
        } else {
            self.shared.info_lifetime
        };
        let queue = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(lifetime).await;
            queue.dismiss(id);
        });
        id
    }

    pub fn info(&self, text: impl Into<String>) -> NotificationId {
        self.append(text, false)
    }

    pub fn error(&self, text: impl Into<String>) -> NotificationId {
        self.append(text, true)
    }

    /// Removes a notification early. Unknown ids are ignored.
    pub fn dismiss(&self, id: NotificationId) {
        let removed = {
            let mut entries = self.entries();
            let before = entries.len();
            entries.retain(|entry| entry.id != id);
            entries.len() != before
        };
        if removed {
            self.touch();
        }
    }

    pub fn list(&self) -> Vec<Notification> {
        self.entries().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.shared.revision.subscribe()
    }
}
