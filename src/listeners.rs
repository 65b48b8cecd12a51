//! Per-session pub/sub for downloaded-image notifications.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

/// A successfully downloaded image. Immutable once constructed; produced
/// once per successful transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DownloadedImage {
    /// Where the file was written on the host.
    pub path: PathBuf,
    /// Device-reported file name.
    pub file_name: String,
    /// Size in bytes.
    pub size: u64,
    /// Capture timestamp as reported by the device.
    pub captured_at: DateTime<Utc>,
}

/// Notification callback for downloaded images.
pub type ImageListener = Arc<dyn Fn(&DownloadedImage) + Send + Sync + 'static>;

type ListenerSlots = Mutex<Vec<(u64, ImageListener)>>;

/// Per-session registry of image listeners.
///
/// Listeners are invoked synchronously in subscription order. Each call runs
/// inside its own crash boundary: one panicking listener never prevents
/// delivery to the rest.
pub struct ListenerRegistry {
    slots: Arc<ListenerSlots>,
    next_id: AtomicU64,
    dropped: AtomicU64,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self {
            slots: Arc::new(Mutex::new(Vec::new())),
            next_id: AtomicU64::new(1),
            dropped: AtomicU64::new(0),
        }
    }

    /// Add a listener. The returned [`Subscription`] removes exactly this
    /// listener when invoked, and stays safe to call more than once.
    pub fn subscribe(&self, listener: ImageListener) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        lock_slots(&self.slots).push((id, listener));
        Subscription {
            slots: Arc::downgrade(&self.slots),
            id,
        }
    }

    /// Deliver `image` to every current subscriber, in subscription order.
    /// Returns the number of listeners that were invoked.
    pub fn publish(&self, image: &DownloadedImage) -> usize {
        // Snapshot so listeners may subscribe/unsubscribe from within a
        // callback without deadlocking.
        let snapshot: Vec<(u64, ImageListener)> = lock_slots(&self.slots).clone();
        if snapshot.is_empty() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return 0;
        }
        for (id, listener) in &snapshot {
            let outcome = catch_unwind(AssertUnwindSafe(|| listener(image)));
            if outcome.is_err() {
                tracing::warn!(listener = *id, file = %image.file_name, "image listener panicked");
            }
        }
        snapshot.len()
    }

    /// How many publishes found zero subscribers. The image is still on disk
    /// in that case; this is the observable "no listener" condition.
    pub fn dropped_publishes(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        lock_slots(&self.slots).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ListenerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn lock_slots(slots: &ListenerSlots) -> std::sync::MutexGuard<'_, Vec<(u64, ImageListener)>> {
    match slots.lock() {
        Ok(g) => g,
        // A panicking listener cannot corrupt the vec; keep delivering.
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Capability that removes one listener from its registry.
#[derive(Debug)]
pub struct Subscription {
    slots: Weak<ListenerSlots>,
    id: u64,
}

impl Subscription {
    /// Remove the listener. Idempotent; a no-op once the session (and its
    /// registry) is gone.
    pub fn unsubscribe(&self) {
        if let Some(slots) = self.slots.upgrade() {
            lock_slots(&slots).retain(|(id, _)| *id != self.id);
        }
    }
}
