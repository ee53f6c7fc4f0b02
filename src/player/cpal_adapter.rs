//! The production [`MediaPlayer`](super::MediaPlayer): a symphonia decode
//! thread feeding a dedicated cpal output stream through a lock-free ring
//! buffer. Each instance owns its own stream and decoder thread, so two
//! instances mixing concurrently (main + next, during a crossfade) is just
//! two independent cpal streams on the same output device — the OS mixes
//! them.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use parking_lot::Mutex;
use tracing::{debug, warn};

use super::decoder::AudioDecoder;
use super::simd;
use super::{MediaPlayer, MediaPlayerFactory, MediaState, PlayerError, StreamId};

const RING_CAPACITY: usize = 1 << 16;

struct Shared {
    state: Mutex<MediaState>,
    volume: AtomicU8,
    muted: AtomicBool,
    playing: AtomicBool,
    stop_requested: AtomicBool,
    released: AtomicBool,
    position_ms: AtomicI64,
    duration_ms: AtomicI64,
}

impl Shared {
    fn set_state_unless_terminal(&self, next: MediaState) {
        let mut s = self.state.lock();
        if !s.is_terminal() {
            *s = next;
        }
    }
}

/// A `MediaPlayer` backed by cpal + symphonia.
pub struct CpalMediaPlayer {
    id: StreamId,
    shared: Arc<Shared>,
    _stream: cpal::Stream,
    feeder: Mutex<Option<thread::JoinHandle<()>>>,
}

impl CpalMediaPlayer {
    fn open(path: &Path) -> Result<Self, PlayerError> {
        let decoder = AudioDecoder::open(path)?;
        let source_rate = decoder.sample_rate();
        let channels = decoder.channels().max(1) as usize;
        let duration_ms = decoder.duration().as_millis() as i64;

        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| PlayerError::AudioInit("no default output device".to_string()))?;
        let config = device
            .default_output_config()
            .map_err(|e| PlayerError::AudioInit(e.to_string()))?;
        let output_sample_rate = config.sample_rate().0;
        let sample_format = config.sample_format();
        let stream_config: cpal::StreamConfig = config.into();
        let output_channels = stream_config.channels as usize;

        let shared = Arc::new(Shared {
            state: Mutex::new(MediaState::Opening),
            volume: AtomicU8::new(0),
            muted: AtomicBool::new(false),
            playing: AtomicBool::new(false),
            stop_requested: AtomicBool::new(false),
            released: AtomicBool::new(false),
            position_ms: AtomicI64::new(0),
            duration_ms: AtomicI64::new(if duration_ms > 0 { duration_ms } else { -1 }),
        });

        let (mut producer, mut consumer) = rtrb::RingBuffer::<f32>::new(RING_CAPACITY);

        let resampler = if source_rate != output_sample_rate {
            Some(Mutex::new(super::resampler::Resampler::new(
                source_rate,
                output_sample_rate,
                channels as u16,
            )))
        } else {
            None
        };

        let err_shared = shared.clone();
        let err_fn = move |e| {
            warn!(target: "garden_music::player", error = %e, "cpal stream error");
            err_shared.set_state_unless_terminal(MediaState::Error);
        };

        let stream_channels = output_channels;
        let stream = match sample_format {
            cpal::SampleFormat::F32 => {
                let shared1 = shared.clone();
                device.build_output_stream(
                    &stream_config,
                    move |data: &mut [f32], _| {
                        Self::fill_output(data, &mut consumer, stream_channels, channels, &shared1)
                    },
                    err_fn,
                    None,
                )
            }
            cpal::SampleFormat::I16 => {
                let shared2 = shared.clone();
                device.build_output_stream(
                    &stream_config,
                    move |data: &mut [i16], _| {
                        let mut scratch = vec![0.0f32; data.len()];
                        Self::fill_output(&mut scratch, &mut consumer, stream_channels, channels, &shared2);
                        simd::f32_to_i16_with_volume(&scratch, data, 1.0);
                    },
                    err_fn,
                    None,
                )
            }
            other => {
                return Err(PlayerError::AudioInit(format!(
                    "unsupported output sample format: {other:?}"
                )));
            }
        }
        .map_err(|e| PlayerError::AudioInit(e.to_string()))?;

        stream
            .play()
            .map_err(|e| PlayerError::AudioInit(e.to_string()))?;

        let path_owned = path.to_path_buf();
        let feeder_shared = shared.clone();
        let feeder = thread::Builder::new()
            .name("garden-music-decoder".to_string())
            .spawn(move || {
                Self::feed(path_owned, decoder, &mut producer, resampler, feeder_shared)
            })
            .map_err(|e| PlayerError::AudioInit(e.to_string()))?;

        Ok(Self {
            id: StreamId::next(),
            shared,
            _stream: stream,
            feeder: Mutex::new(Some(feeder)),
        })
    }

    /// cpal realtime callback: pull interleaved samples from the ring
    /// buffer, remix channel count if needed, apply volume/mute, or emit
    /// silence while paused/buffering. Never blocks.
    fn fill_output(
        data: &mut [f32],
        consumer: &mut rtrb::Consumer<f32>,
        output_channels: usize,
        source_channels: usize,
        shared: &Shared,
    ) {
        if !shared.playing.load(Ordering::Acquire) {
            data.fill(0.0);
            return;
        }

        let frames = data.len() / output_channels.max(1);
        let mut frame_buf = vec![0.0f32; source_channels];
        let mut samples_out = 0usize;

        for _frame in 0..frames {
            let mut got_frame = false;
            for (ch, slot) in frame_buf.iter_mut().enumerate() {
                match consumer.pop() {
                    Ok(s) => {
                        *slot = s;
                        got_frame = true;
                    }
                    Err(_) => {
                        *slot = 0.0;
                        let _ = ch;
                    }
                }
            }
            if !got_frame {
                data[samples_out..samples_out + output_channels].fill(0.0);
                samples_out += output_channels;
                continue;
            }
            for out_ch in 0..output_channels {
                let src = frame_buf[out_ch % source_channels];
                data[samples_out + out_ch] = src;
            }
            samples_out += output_channels;
        }

        let volume = shared.volume.load(Ordering::Relaxed) as f32 / 100.0;
        let muted = shared.muted.load(Ordering::Relaxed);
        let gain = if muted { 0.0 } else { volume };
        simd::apply_volume(&mut data[..samples_out], gain);
    }

    /// Decoder-thread loop: decode packets, resample if needed, push into
    /// the ring buffer (blocking on backpressure), track position by
    /// decoded timestamp.
    fn feed(
        path: PathBuf,
        mut decoder: AudioDecoder,
        producer: &mut rtrb::Producer<f32>,
        resampler: Option<Mutex<super::resampler::Resampler>>,
        shared: Arc<Shared>,
    ) {
        debug!(target: "garden_music::player", path = %path.display(), "decoder thread started");
        loop {
            if shared.stop_requested.load(Ordering::Acquire) {
                break;
            }

            let mut decoded_samples = Vec::new();
            let result = decoder.decode_next(|samples| decoded_samples.extend_from_slice(samples));

            match result {
                Ok(Some(frame)) => {
                    shared
                        .position_ms
                        .store(frame.timestamp.as_millis() as i64, Ordering::Relaxed);

                    let to_push = if let Some(resampler) = &resampler {
                        resampler.lock().process(&decoded_samples)
                    } else {
                        decoded_samples
                    };

                    for sample in to_push {
                        while producer.push(sample).is_err() {
                            if shared.stop_requested.load(Ordering::Acquire) {
                                return;
                            }
                            thread::sleep(Duration::from_millis(2));
                        }
                    }

                    if shared.playing.load(Ordering::Acquire) {
                        let mut state = shared.state.lock();
                        if *state == MediaState::Opening {
                            *state = MediaState::Playing;
                        }
                    }
                }
                Ok(None) => {
                    shared.set_state_unless_terminal(MediaState::Ended);
                    break;
                }
                Err(e) => {
                    warn!(target: "garden_music::player", error = %e, "decode error, stopping stream");
                    shared.set_state_unless_terminal(MediaState::Error);
                    break;
                }
            }
        }
        debug!(target: "garden_music::player", path = %path.display(), "decoder thread exiting");
    }
}

impl MediaPlayer for CpalMediaPlayer {
    fn id(&self) -> StreamId {
        self.id
    }

    fn play(&self) {
        self.shared.playing.store(true, Ordering::Release);
    }

    fn stop(&self) {
        self.shared.playing.store(false, Ordering::Release);
        self.shared.stop_requested.store(true, Ordering::Release);
        self.shared.set_state_unless_terminal(MediaState::Stopped);
    }

    fn set_volume(&self, volume: u8) {
        self.shared.volume.store(volume.min(100), Ordering::Relaxed);
    }

    fn set_muted(&self, muted: bool) {
        self.shared.muted.store(muted, Ordering::Relaxed);
    }

    fn get_state(&self) -> MediaState {
        *self.shared.state.lock()
    }

    fn get_position_ms(&self) -> i64 {
        self.shared.position_ms.load(Ordering::Relaxed)
    }

    fn duration_ms(&self) -> Option<u64> {
        let d = self.shared.duration_ms.load(Ordering::Relaxed);
        if d > 0 { Some(d as u64) } else { None }
    }

    fn release(&self) {
        if self.shared.released.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shared.stop_requested.store(true, Ordering::Release);
        self.shared.playing.store(false, Ordering::Release);
        if let Some(handle) = self.feeder.lock().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for CpalMediaPlayer {
    fn drop(&mut self) {
        self.release();
    }
}

/// Opens [`CpalMediaPlayer`]s against the system default output device.
#[derive(Default)]
pub struct CpalMediaPlayerFactory;

impl MediaPlayerFactory for CpalMediaPlayerFactory {
    fn open(&self, path: &Path) -> Result<Box<dyn MediaPlayer>, PlayerError> {
        Ok(Box::new(CpalMediaPlayer::open(path)?))
    }
}
