//! The `MediaPlayer` capability the playback engine consumes.
//!
//! The engine (`crate::engine`) never talks to a decoding/output library
//! directly — it only knows about the [`MediaPlayer`] trait and a
//! [`MediaPlayerFactory`] that opens one. [`CpalMediaPlayer`] is the
//! production implementation (symphonia decode, cpal output); tests use a
//! lightweight fake so the engine's timing-sensitive state machine can be
//! exercised without real audio hardware.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                     PlaybackEngine (loop thread)                │
//! │   owns up to two MediaPlayer trait objects: main, next          │
//! └───────────────────────────┬───────────────┬─────────────────────┘
//!                             │               │
//!                             ▼               ▼
//!                   ┌──────────────┐  ┌──────────────┐
//!                   │ CpalMediaPlayer│ │ CpalMediaPlayer│   (independent
//!                   │  decoder thread│ │  decoder thread│    cpal streams,
//!                   │  + cpal stream │ │  + cpal stream │    mixed by the
//!                   └──────────────┘  └──────────────┘    output device)
//! ```

mod cpal_adapter;
mod decoder;
mod resampler;
pub mod simd;

pub use cpal_adapter::{CpalMediaPlayer, CpalMediaPlayerFactory};
pub use decoder::AudioDecoder;
pub use resampler::Resampler;

use std::sync::atomic::{AtomicU64, Ordering};

/// Opaque identifier distinguishing `MediaPlayer` instances (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamId(u64);

impl StreamId {
    fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// Playback state of a single stream (spec §4.1). `Ended`, `Stopped`, and
/// `Error` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaState {
    Opening,
    Playing,
    Paused,
    Ended,
    Stopped,
    Error,
}

impl MediaState {
    pub fn is_terminal(self) -> bool {
        matches!(self, MediaState::Ended | MediaState::Stopped | MediaState::Error)
    }
}

/// One decoded audio stream with independent volume, play/stop, queryable
/// state and position, and a parseable duration (spec §4.1).
pub trait MediaPlayer: Send + Sync {
    /// Opaque identity, stable for the life of this instance.
    fn id(&self) -> StreamId;

    /// Begin decoding from the current position.
    fn play(&self);

    /// Move to a terminal state. A subsequent `play` requires a new instance.
    fn stop(&self);

    /// Linear gain, 0..=100. Idempotent.
    fn set_volume(&self, volume: u8);

    /// Independent of volume.
    fn set_muted(&self, muted: bool);

    fn get_state(&self) -> MediaState;

    /// Monotonic play position in milliseconds, or -1 if unknown.
    fn get_position_ms(&self) -> i64;

    /// Duration once parsed. `None` until parsed or if parsing failed — the
    /// engine substitutes a default and proceeds (spec §4.1, §7).
    fn duration_ms(&self) -> Option<u64>;

    /// Free underlying resources. Idempotent.
    fn release(&self);
}

/// Constructs a [`MediaPlayer`] bound to a path; the stream starts stopped.
pub trait MediaPlayerFactory: Send + Sync {
    fn open(&self, path: &std::path::Path) -> Result<Box<dyn MediaPlayer>, PlayerError>;
}

/// Player errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PlayerError {
    #[error("Audio output initialization failed: {0}")]
    AudioInit(String),

    #[error("Failed to decode audio: {0}")]
    Decode(String),

    #[error("Unsupported audio format: {0}")]
    UnsupportedFormat(String),

    #[error("File not found: {0}")]
    FileNotFound(String),
}

/// Name of the system default audio output device, for diagnostics.
pub fn current_audio_device() -> String {
    use cpal::traits::{DeviceTrait, HostTrait};
    let host = cpal::default_host();
    host.default_output_device()
        .and_then(|d| d.name().ok())
        .unwrap_or_else(|| "Unknown".to_string())
}

#[cfg(test)]
pub mod fake {
    //! A scriptable `MediaPlayer` used by engine tests (spec §8 S1/S2):
    //! plays for a fixed simulated duration without touching real hardware.

    use super::*;
    use parking_lot::Mutex;
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU8};
    use std::sync::Arc;
    use std::thread;
    use std::time::{Duration, Instant};

    pub struct FakeMediaPlayer {
        id: StreamId,
        path: PathBuf,
        duration_ms: u64,
        state: Arc<Mutex<MediaState>>,
        position_ms: Arc<AtomicI64>,
        volume: Arc<AtomicU8>,
        muted: Arc<AtomicBool>,
        playing: Arc<AtomicBool>,
        released: Arc<AtomicBool>,
    }

    impl FakeMediaPlayer {
        pub fn path(&self) -> &Path {
            &self.path
        }
    }

    impl MediaPlayer for FakeMediaPlayer {
        fn id(&self) -> StreamId {
            self.id
        }

        fn play(&self) {
            if self.playing.swap(true, Ordering::SeqCst) {
                return;
            }
            *self.state.lock() = MediaState::Playing;
            let state = self.state.clone();
            let position_ms = self.position_ms.clone();
            let playing = self.playing.clone();
            let duration_ms = self.duration_ms;
            thread::spawn(move || {
                let start = Instant::now();
                loop {
                    if !playing.load(Ordering::SeqCst) {
                        return;
                    }
                    let elapsed = start.elapsed().as_millis() as i64;
                    position_ms.store(elapsed, Ordering::SeqCst);
                    if elapsed as u64 >= duration_ms {
                        let mut s = state.lock();
                        if *s == MediaState::Playing {
                            *s = MediaState::Ended;
                        }
                        return;
                    }
                    thread::sleep(Duration::from_millis(10));
                }
            });
        }

        fn stop(&self) {
            self.playing.store(false, Ordering::SeqCst);
            let mut s = self.state.lock();
            if !s.is_terminal() {
                *s = MediaState::Stopped;
            }
        }

        fn set_volume(&self, volume: u8) {
            self.volume.store(volume.min(100), Ordering::SeqCst);
        }

        fn set_muted(&self, muted: bool) {
            self.muted.store(muted, Ordering::SeqCst);
        }

        fn get_state(&self) -> MediaState {
            *self.state.lock()
        }

        fn get_position_ms(&self) -> i64 {
            self.position_ms.load(Ordering::SeqCst)
        }

        fn duration_ms(&self) -> Option<u64> {
            Some(self.duration_ms)
        }

        fn release(&self) {
            self.released.store(true, Ordering::SeqCst);
        }
    }

    /// Opens [`FakeMediaPlayer`]s with a fixed duration, optionally failing
    /// for paths whose file name is in a configured deny-list.
    #[derive(Clone, Default)]
    pub struct FakeMediaPlayerFactory {
        pub duration_ms: u64,
    }

    impl MediaPlayerFactory for FakeMediaPlayerFactory {
        fn open(&self, path: &Path) -> Result<Box<dyn MediaPlayer>, PlayerError> {
            Ok(Box::new(FakeMediaPlayer {
                id: StreamId::next(),
                path: path.to_path_buf(),
                duration_ms: self.duration_ms,
                state: Arc::new(Mutex::new(MediaState::Opening)),
                position_ms: Arc::new(AtomicI64::new(0)),
                volume: Arc::new(AtomicU8::new(0)),
                muted: Arc::new(AtomicBool::new(false)),
                playing: Arc::new(AtomicBool::new(false)),
                released: Arc::new(AtomicBool::new(false)),
            }))
        }
    }
}
