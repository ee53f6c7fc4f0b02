//! Live-state notification fan-out (spec §4.4).
//!
//! A thread-safe registry of subscriber callbacks. `emit` never blocks the
//! playback loop for longer than copying a small struct and taking a lock —
//! callbacks run on the emitter thread but a panicking subscriber is caught
//! and removed rather than propagated.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::warn;

use crate::model::Track;

/// Opaque handle returned by [`NotificationHub::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberHandle(u64);

/// One of the two wire event shapes (spec §6).
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum Event {
    #[serde(rename = "now_playing")]
    NowPlaying {
        now_playing: Option<String>,
    },
    #[serde(rename = "volume")]
    Volume { volume: u8 },
}

/// What to report for the `now_playing` field of an `emit` call: either a
/// concrete track, or idle (`null` on the wire).
#[derive(Debug, Clone)]
pub enum TrackUpdate {
    Playing(Track),
    Idle,
}

type Callback = Arc<dyn Fn(&Event) + Send + Sync>;

#[derive(Default)]
pub struct NotificationHub {
    subscribers: Mutex<HashMap<SubscriberHandle, Callback>>,
    next_id: AtomicU64,
}

impl NotificationHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback, invoked (on the emitter thread) for every
    /// subsequent event. Returns a handle for [`unsubscribe`](Self::unsubscribe).
    pub fn subscribe<F>(&self, callback: F) -> SubscriberHandle
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let handle = SubscriberHandle(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscribers.lock().insert(handle, Arc::new(callback));
        handle
    }

    pub fn unsubscribe(&self, handle: SubscriberHandle) {
        self.subscribers.lock().remove(&handle);
    }

    /// Emit zero, one, or two events: a volume event (if `volume` is some),
    /// then a now_playing event (if `track` is some) — in that order, so
    /// that a crossfade-completion `now_playing` never arrives before its
    /// transition's `volume` (spec §4.4, §5 ordering guarantee 3).
    pub fn emit(&self, track: Option<TrackUpdate>, volume: Option<u8>) {
        if let Some(v) = volume {
            self.broadcast(&Event::Volume { volume: v });
        }
        if let Some(t) = track {
            let now_playing = match t {
                TrackUpdate::Playing(track) => Some(track.path().display().to_string()),
                TrackUpdate::Idle => None,
            };
            self.broadcast(&Event::NowPlaying { now_playing });
        }
    }

    fn broadcast(&self, event: &Event) {
        // Snapshot under the lock, then invoke outside it so a callback can
        // never block the emitter on another subscriber's work.
        let snapshot: Vec<(SubscriberHandle, Callback)> = self
            .subscribers
            .lock()
            .iter()
            .map(|(h, cb)| (*h, cb.clone()))
            .collect();

        let mut dead = Vec::new();
        for (handle, cb) in snapshot {
            if catch_unwind(AssertUnwindSafe(|| cb(event))).is_err() {
                warn!(target: "garden_music::notify", "subscriber panicked, removing");
                dead.push(handle);
            }
        }
        if !dead.is_empty() {
            let mut subs = self.subscribers.lock();
            for handle in dead {
                subs.remove(&handle);
            }
        }
    }
}
