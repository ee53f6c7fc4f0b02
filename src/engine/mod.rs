//! The concurrent playback engine (spec §4.2): owns the shuffled queue and
//! the main/next [`MediaPlayer`] streams, runs the play-loop on a single
//! dedicated thread, and exposes a non-blocking command surface.
//!
//! State touched only by the loop thread (queue, the stream slots, crossfade
//! bookkeeping) never crosses a lock with an external caller; external verbs
//! land in a handful of atomics and a single pending-request slot that the
//! loop consumes at its own safe points (spec §5).

mod queue;

pub use queue::Queue;

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::model::Track;
use crate::notify::{NotificationHub, TrackUpdate};
use crate::player::{MediaPlayer, MediaPlayerFactory, StreamId};

/// `get_phase()` (spec §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Playing,
    Crossfade,
}

struct SwitchRequest {
    folder: String,
    volume: Option<u8>,
}

/// Cross-thread state: everything an external caller may touch. Every other
/// field the loop needs lives in `LoopCtx`, local to the loop thread.
struct Shared {
    current_volume: AtomicU8,
    /// Bumped on every `set_volume` call so the loop thread can detect a
    /// pending change at its own safe points and apply it (spec §4.2).
    volume_generation: AtomicU64,
    stop_event: AtomicBool,
    pending_stop_deadline: Mutex<Option<Instant>>,
    switch_request: Mutex<Option<SwitchRequest>>,
    now_playing: Mutex<Option<Track>>,
    crossfade_active: AtomicBool,
}

impl Shared {
    fn phase(&self) -> Phase {
        if self.crossfade_active.load(Ordering::Acquire) {
            Phase::Crossfade
        } else if self.now_playing.lock().is_some() {
            Phase::Playing
        } else {
            Phase::Idle
        }
    }
}

pub struct PlaybackEngine {
    factory: Arc<dyn MediaPlayerFactory>,
    hub: Arc<NotificationHub>,
    config: EngineConfig,
    shared: Arc<Shared>,
    loop_handle: Mutex<Option<JoinHandle<()>>>,
}

impl PlaybackEngine {
    pub fn new(
        factory: Arc<dyn MediaPlayerFactory>,
        hub: Arc<NotificationHub>,
        config: EngineConfig,
    ) -> Self {
        Self {
            factory,
            hub,
            config,
            shared: Arc::new(Shared {
                current_volume: AtomicU8::new(50),
                volume_generation: AtomicU64::new(0),
                stop_event: AtomicBool::new(false),
                pending_stop_deadline: Mutex::new(None),
                switch_request: Mutex::new(None),
                now_playing: Mutex::new(None),
                crossfade_active: AtomicBool::new(false),
            }),
            loop_handle: Mutex::new(None),
        }
    }

    /// Force-stop any current loop, load and shuffle `folder`, start a new
    /// play-loop.
    pub fn play_scene(&self, folder: &str, volume: Option<u8>) {
        self.stop(true);
        self.shared.stop_event.store(false, Ordering::Release);
        *self.shared.pending_stop_deadline.lock() = None;
        *self.shared.switch_request.lock() = None;
        if let Some(v) = volume {
            self.shared.current_volume.store(v.min(100), Ordering::Relaxed);
        }

        let shared = self.shared.clone();
        let factory = self.factory.clone();
        let hub = self.hub.clone();
        let config = self.config.clone();
        let folder = folder.to_string();
        info!(target: "garden_music::engine", folder = %folder, "play_scene");
        let handle = thread::Builder::new()
            .name("garden-music-engine".to_string())
            .spawn(move || run_loop(shared, factory, hub, config, folder))
            .expect("failed to spawn playback loop thread");
        *self.loop_handle.lock() = Some(handle);
    }

    /// Request a scene change at the next safe point. Does not interrupt the
    /// currently audible song unless a crossfade has already started.
    pub fn switch_scene(&self, folder: &str, volume: Option<u8>) {
        debug!(target: "garden_music::engine", folder = %folder, "switch_scene requested");
        *self.shared.switch_request.lock() = Some(SwitchRequest {
            folder: folder.to_string(),
            volume,
        });
    }

    /// Set the target volume (0..=100, clamped). Applied to any non-terminal
    /// `main`/`next` stream at the loop's next safe point, and reported to
    /// subscribers as a single `volume` event (spec §4.2, §8 S6).
    pub fn set_volume(&self, volume: u8) {
        self.shared.current_volume.store(volume.min(100), Ordering::Relaxed);
        self.shared.volume_generation.fetch_add(1, Ordering::Release);
    }

    pub fn get_volume(&self) -> u8 {
        self.shared.current_volume.load(Ordering::Relaxed)
    }

    pub fn get_now_playing(&self) -> Option<String> {
        self.shared
            .now_playing
            .lock()
            .as_ref()
            .map(|t| t.path().display().to_string())
    }

    pub fn is_playing(&self) -> bool {
        self.shared.now_playing.lock().is_some()
    }

    pub fn get_phase(&self) -> Phase {
        self.shared.phase()
    }

    /// Hard stop: signal the loop, clear all soft-stop state, join the loop
    /// thread if `force`.
    pub fn stop(&self, force: bool) {
        self.shared.stop_event.store(true, Ordering::Release);
        *self.shared.pending_stop_deadline.lock() = None;
        if force && let Some(handle) = self.loop_handle.lock().take() {
            let _ = handle.join();
        }
    }

    /// Arm a soft stop: the loop finishes the current song (no crossfade
    /// into a successor) and exits, or exits immediately once the deadline
    /// passes, whichever comes first.
    pub fn stop_after_current_or_timeout(&self, timeout_sec: u64) {
        *self.shared.pending_stop_deadline.lock() =
            Some(Instant::now() + Duration::from_secs(timeout_sec));
    }

    pub fn shutdown(&self) {
        self.stop(true);
    }
}

struct ActiveStream {
    player: Box<dyn MediaPlayer>,
    track: Track,
}

/// Loop-thread-local state; never touched from outside the loop.
struct LoopCtx {
    main: Option<ActiveStream>,
    next: Option<ActiveStream>,
    next_index_pending: Option<usize>,
    started_as_next: HashSet<Track>,
    last_started_path: Option<Track>,
    last_started_t: Instant,
    handoff_in_progress: bool,
    last_handoff_main_id: Option<StreamId>,
    promotion_guard_until: Instant,
}

impl LoopCtx {
    fn new() -> Self {
        let long_ago = Instant::now() - Duration::from_secs(3600);
        Self {
            main: None,
            next: None,
            next_index_pending: None,
            started_as_next: HashSet::new(),
            last_started_path: None,
            last_started_t: long_ago,
            handoff_in_progress: false,
            last_handoff_main_id: None,
            promotion_guard_until: long_ago,
        }
    }
}

enum SongOutcome {
    /// Song ended naturally with no successor promoted; outer loop advances
    /// the queue position and opens the next song.
    NeedAdvance,
    /// Hard stop, soft-stop deadline, or soft-stop-satisfied-by-current-song
    /// end: the whole loop exits.
    Exit,
}

fn round_volume(v: f64) -> u8 {
    v.round().clamp(0.0, 100.0) as u8
}

fn run_loop(
    shared: Arc<Shared>,
    factory: Arc<dyn MediaPlayerFactory>,
    hub: Arc<NotificationHub>,
    config: EngineConfig,
    initial_folder: String,
) {
    let mut queue = Queue::load(&initial_folder);
    let mut ctx = LoopCtx::new();
    let tick = Duration::from_millis(config.tick_ms);
    let mut empty_since: Option<Instant> = None;

    'outer: loop {
        if shared.stop_event.load(Ordering::Acquire) {
            break;
        }

        if let Some(req) = shared.switch_request.lock().take() {
            info!(target: "garden_music::engine", folder = %req.folder, "applying switch_scene");
            queue = Queue::load(&req.folder);
            ctx.next_index_pending = None;
            ctx.started_as_next.clear();
            if let Some(v) = req.volume {
                shared.current_volume.store(v.min(100), Ordering::Relaxed);
            }
            if let Some(next) = ctx.next.take() {
                next.player.stop();
                next.player.release();
            }
            shared.crossfade_active.store(false, Ordering::Release);
        }

        if queue.is_empty() {
            empty_since.get_or_insert_with(Instant::now);
            if empty_since.unwrap().elapsed() >= Duration::from_secs(config.poll_interval_secs) {
                debug!(target: "garden_music::engine", "scene empty for poll interval, exiting loop");
                break;
            }
            thread::sleep(tick);
            continue;
        }
        empty_since = None;

        // Defensive restart guard (spec §4.2.7).
        if let Some(active) = &ctx.main
            && !active.player.get_state().is_terminal()
            && queue.current() == Some(&active.track)
        {
            if Some(active.player.id()) == ctx.last_handoff_main_id
                && Instant::now() < ctx.promotion_guard_until
            {
                thread::sleep(tick);
                continue;
            }
            ctx.last_handoff_main_id = Some(active.player.id());
            thread::sleep(tick);
            continue;
        }

        let Some(song) = queue.current().cloned() else {
            thread::sleep(tick);
            continue;
        };
        let candidate_next = queue.pick_next_distinct(queue.pos);

        match play_song(&shared, &factory, &hub, &config, &mut queue, song, candidate_next, &mut ctx) {
            SongOutcome::Exit => break 'outer,
            SongOutcome::NeedAdvance => queue.advance(),
        }
    }

    // Loop exit and cleanup (spec §4.2.8).
    hub.emit(Some(TrackUpdate::Idle), None);
    if let Some(active) = ctx.main.take() {
        active.player.stop();
        active.player.release();
    }
    if let Some(active) = ctx.next.take() {
        active.player.stop();
        active.player.release();
    }
    *shared.now_playing.lock() = None;
    shared.crossfade_active.store(false, Ordering::Release);
    ctx.started_as_next.clear();
    ctx.handoff_in_progress = false;
    ctx.last_handoff_main_id = None;
}

/// Poll for a parsed duration for up to 500ms; substitute the configured
/// default on timeout (spec §4.1, §7 — the only permitted silent
/// degradation).
fn wait_for_duration(player: &dyn MediaPlayer, default_ms: u64) -> u64 {
    let deadline = Instant::now() + Duration::from_millis(500);
    loop {
        if let Some(ms) = player.duration_ms() {
            return ms;
        }
        if Instant::now() >= deadline {
            return default_ms;
        }
        thread::sleep(Duration::from_millis(25));
    }
}

/// Readiness wait: poll for `state == Playing` or `position_ms > 0` up to
/// `timeout`, returning regardless (best-effort) once it elapses.
fn readiness_wait(player: &dyn MediaPlayer, timeout: Duration, stop_event: &AtomicBool) {
    use crate::player::MediaState;
    let deadline = Instant::now() + timeout;
    loop {
        if stop_event.load(Ordering::Acquire) {
            return;
        }
        if player.get_state() == MediaState::Playing || player.get_position_ms() > 0 {
            return;
        }
        if Instant::now() >= deadline {
            return;
        }
        thread::sleep(Duration::from_millis(25));
    }
}

/// Ramp `player`'s volume from `from` to 0 over `duration`, then stop and
/// release it.
fn fade_out_and_release(player: &dyn MediaPlayer, from: u8, duration: Duration) {
    let steps = 4u32;
    let step_sleep = duration / steps;
    for i in 0..steps {
        let remaining = steps - i;
        let vol = round_volume(from as f64 * remaining as f64 / steps as f64);
        player.set_volume(vol);
        thread::sleep(step_sleep);
    }
    player.set_volume(0);
    player.stop();
    player.release();
}

fn fade_out_both(ctx: &mut LoopCtx, current_volume: u8, duration: Duration) {
    if let Some(active) = ctx.main.take() {
        fade_out_and_release(active.player.as_ref(), current_volume, duration);
    }
    if let Some(active) = ctx.next.take() {
        fade_out_and_release(active.player.as_ref(), current_volume, duration);
    }
}

/// Atomically swap `next` into the `main` role, advance the queue, and emit
/// the transition. Shared by crossfade-ramp completion (ratio==1) and the
/// pre-crossfade terminal-promotion edge (spec §4.2.5, §4.2.6).
fn promote(
    ctx: &mut LoopCtx,
    shared: &Shared,
    hub: &NotificationHub,
    config: &EngineConfig,
    queue: &mut Queue,
) {
    let Some(promoted) = ctx.next.take() else {
        return;
    };
    if let Some(old_main) = ctx.main.take() {
        old_main.player.stop();
        old_main.player.release();
    }

    if let Some(idx) = ctx.next_index_pending.take() {
        queue.set_pos(idx);
    }
    shared.crossfade_active.store(false, Ordering::Release);

    let target_volume = shared.current_volume.load(Ordering::Relaxed);
    promoted.player.set_volume(target_volume);

    ctx.handoff_in_progress = true;
    ctx.last_handoff_main_id = Some(promoted.player.id());
    ctx.promotion_guard_until =
        Instant::now() + Duration::from_millis(config.promotion_guard_window_ms);

    *shared.now_playing.lock() = Some(promoted.track.clone());
    hub.emit(
        Some(TrackUpdate::Playing(promoted.track.clone())),
        Some(target_volume),
    );

    ctx.main = Some(promoted);
}

#[allow(clippy::too_many_arguments)]
fn play_song(
    shared: &Arc<Shared>,
    factory: &Arc<dyn MediaPlayerFactory>,
    hub: &Arc<NotificationHub>,
    config: &EngineConfig,
    queue: &mut Queue,
    song: Track,
    candidate_next: Option<usize>,
    ctx: &mut LoopCtx,
) -> SongOutcome {
    let default_duration_ms = (config.default_duration_secs * 1000.0) as u64;
    ctx.started_as_next.clear();

    let player = match factory.open(song.path()) {
        Ok(p) => p,
        Err(e) => {
            warn!(target: "garden_music::engine", track = %song, error = %e, "failed to open stream, skipping");
            return SongOutcome::NeedAdvance;
        }
    };
    player.set_muted(false);
    player.set_volume(0);
    player.play();
    readiness_wait(
        player.as_ref(),
        Duration::from_millis(config.main_ready_timeout_ms),
        &shared.stop_event,
    );
    ctx.main = Some(ActiveStream { player, track: song.clone() });
    *shared.now_playing.lock() = Some(song.clone());
    let mut target_volume = shared.current_volume.load(Ordering::Relaxed);
    let mut last_volume_gen = shared.volume_generation.load(Ordering::Acquire);
    hub.emit(Some(TrackUpdate::Playing(song.clone())), Some(target_volume));

    // Fade-in: 0 -> current_volume over ~1s (20 steps x 50ms).
    for step in 1..=20u32 {
        if shared.stop_event.load(Ordering::Acquire) {
            fade_out_both(ctx, target_volume, Duration::from_millis(200));
            return SongOutcome::Exit;
        }
        let vol = round_volume(target_volume as f64 * step as f64 / 20.0);
        if let Some(active) = &ctx.main {
            active.player.set_volume(vol);
        }
        thread::sleep(Duration::from_millis(50));
    }

    let mut duration_ms = wait_for_duration(ctx.main.as_ref().unwrap().player.as_ref(), default_duration_ms);
    let mut fade_start_ms = if candidate_next.is_some() {
        (duration_ms as f64 - config.crossfade_secs * 1000.0).max(1000.0) as u64
    } else {
        duration_ms
    };
    let mut candidate_next = candidate_next;
    let mut start_time = Instant::now();
    let tick = Duration::from_millis(config.tick_ms);
    let mut fade_start_time: Option<Instant> = None;

    loop {
        // 1. Terminal main -> promotion path, or natural end.
        let main_terminal = ctx.main.as_ref().is_some_and(|a| a.player.get_state().is_terminal());
        if main_terminal {
            let next_promotable = ctx
                .next
                .as_ref()
                .is_some_and(|n| !n.player.get_state().is_terminal());
            if next_promotable {
                if let Some(old_main) = ctx.main.take() {
                    old_main.player.release();
                }
                promote(ctx, shared, hub, config, queue);
                duration_ms = wait_for_duration(
                    ctx.main.as_ref().unwrap().player.as_ref(),
                    default_duration_ms,
                );
                candidate_next = queue.pick_next_distinct(queue.pos);
                fade_start_ms = if candidate_next.is_some() {
                    (duration_ms as f64 - config.crossfade_secs * 1000.0).max(1000.0) as u64
                } else {
                    duration_ms
                };
                start_time = Instant::now();
                fade_start_time = None;
                continue;
            } else {
                if let Some(old_main) = ctx.main.take() {
                    old_main.player.release();
                }
                if shared.pending_stop_deadline.lock().is_some() {
                    return SongOutcome::Exit;
                }
                return SongOutcome::NeedAdvance;
            }
        }

        // 2. Hard stop.
        if shared.stop_event.load(Ordering::Acquire) {
            fade_out_both(ctx, target_volume, Duration::from_millis(200));
            return SongOutcome::Exit;
        }

        // 3. Soft-stop deadline.
        let soft_deadline = *shared.pending_stop_deadline.lock();
        if let Some(deadline) = soft_deadline
            && Instant::now() >= deadline
        {
            fade_out_both(ctx, target_volume, Duration::from_millis(200));
            return SongOutcome::Exit;
        }

        let elapsed_ms = start_time.elapsed().as_millis() as u64;

        // 4. Soft-stop armed, no successor scheduled, song nearly done.
        if soft_deadline.is_some()
            && ctx.next.is_none()
            && elapsed_ms + 250 >= duration_ms
        {
            if let Some(active) = ctx.main.take() {
                fade_out_and_release(active.player.as_ref(), target_volume, Duration::from_millis(200));
            }
            return SongOutcome::Exit;
        }

        // 4.5. Live volume update: apply a pending `set_volume` to any
        // non-terminal stream and notify once (spec §4.2, §8 S6). During an
        // active crossfade the ramp below derives main/next gain from
        // `target_volume` itself, so updating it here is enough.
        let volume_gen = shared.volume_generation.load(Ordering::Acquire);
        if volume_gen != last_volume_gen {
            last_volume_gen = volume_gen;
            target_volume = shared.current_volume.load(Ordering::Relaxed);
            if !shared.crossfade_active.load(Ordering::Acquire) {
                if let Some(active) = &ctx.main
                    && !active.player.get_state().is_terminal()
                {
                    active.player.set_volume(target_volume);
                }
                if let Some(active) = &ctx.next
                    && !active.player.get_state().is_terminal()
                {
                    active.player.set_volume(target_volume);
                }
            }
            hub.emit(None, Some(target_volume));
        }

        // 5. Crossfade gate.
        if elapsed_ms >= fade_start_ms && ctx.next.is_none() {
            let switch_pending = shared.switch_request.lock().is_some();
            if switch_pending {
                candidate_next = None;
            } else if let Some(idx) = pick_gated_candidate(queue, ctx, config) {
                if soft_deadline.is_some() {
                    // Soft stop armed: never start a successor.
                } else {
                    match factory.open(queue.tracks[idx].path()) {
                        Ok(next_player) => {
                            next_player.set_muted(false);
                            next_player.set_volume(0);
                            next_player.play();
                            readiness_wait(
                                next_player.as_ref(),
                                Duration::from_millis(config.next_ready_timeout_ms),
                                &shared.stop_event,
                            );
                            let next_track = queue.tracks[idx].clone();
                            ctx.started_as_next.insert(next_track.clone());
                            ctx.last_started_path = Some(next_track.clone());
                            ctx.last_started_t = Instant::now();
                            ctx.next_index_pending = Some(idx);
                            ctx.next = Some(ActiveStream { player: next_player, track: next_track });
                            shared.crossfade_active.store(true, Ordering::Release);
                            fade_start_time = Some(Instant::now());
                        }
                        Err(e) => {
                            warn!(target: "garden_music::engine", error = %e, "failed to open next stream for crossfade");
                        }
                    }
                }
            } else if candidate_next.is_none() {
                // No distinct candidate exists at all (e.g. single-track scene):
                // finish this song plainly.
                if elapsed_ms >= duration_ms {
                    if let Some(active) = ctx.main.take() {
                        fade_out_and_release(active.player.as_ref(), target_volume, Duration::from_millis(200));
                    }
                    return SongOutcome::NeedAdvance;
                }
            }
        }

        // 6. Crossfade ramp.
        if shared.crossfade_active.load(Ordering::Acquire) {
            if shared.switch_request.lock().is_some() {
                // A scene switch arrived mid-crossfade: tear down the
                // incoming stream and let the current song play out as an
                // ordinary song (spec §4.2: switch_scene does not interrupt
                // the currently audible song, but tears down an in-progress
                // crossfade). The switch itself is applied once the outer
                // loop advances to it; we only discard the candidate here.
                if let Some(next) = ctx.next.take() {
                    next.player.stop();
                    next.player.release();
                }
                shared.crossfade_active.store(false, Ordering::Release);
                ctx.next_index_pending = None;
                fade_start_time = None;
                candidate_next = None;
            } else if let Some(fade_start) = fade_start_time {
                let ratio = (fade_start.elapsed().as_secs_f64() / config.crossfade_secs).clamp(0.0, 1.0);
                let main_vol = round_volume(target_volume as f64 * (1.0 - ratio));
                let next_vol = round_volume(target_volume as f64 * ratio);
                if let Some(active) = &ctx.main {
                    active.player.set_volume(main_vol);
                }
                if let Some(active) = &ctx.next {
                    active.player.set_volume(next_vol);
                }
                if ratio >= 1.0 {
                    promote(ctx, shared, hub, config, queue);
                    duration_ms = wait_for_duration(
                        ctx.main.as_ref().unwrap().player.as_ref(),
                        default_duration_ms,
                    );
                    candidate_next = queue.pick_next_distinct(queue.pos);
                    fade_start_ms = if candidate_next.is_some() {
                        (duration_ms as f64 - config.crossfade_secs * 1000.0).max(1000.0) as u64
                    } else {
                        duration_ms
                    };
                    start_time = Instant::now();
                    fade_start_time = None;
                }
            }
        }

        thread::sleep(tick);
    }
}

/// Crossfade gate candidate selection with the same-start guard (spec
/// §4.2.5): the candidate must not be `_last_started_path` within the guard
/// window, not already started-as-next this epoch, and not the current
/// `now_playing` track.
fn pick_gated_candidate(queue: &Queue, ctx: &LoopCtx, config: &EngineConfig) -> Option<usize> {
    let idx = queue.pick_next_distinct(queue.pos)?;
    let candidate = &queue.tracks[idx];

    if let Some(last) = &ctx.last_started_path
        && last == candidate
        && ctx.last_started_t.elapsed() < Duration::from_secs_f64(config.same_start_guard_secs)
    {
        return None;
    }
    if ctx.started_as_next.contains(candidate) {
        return None;
    }
    if let Some(active) = &ctx.main
        && &active.track == candidate
    {
        return None;
    }
    Some(idx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::player::fake::FakeMediaPlayerFactory;
    use std::fs;
    use tempfile::tempdir;

    fn scene_with(dir: &std::path::Path, names: &[&str]) {
        for name in names {
            fs::write(dir.join(name), b"fake-audio").unwrap();
        }
    }

    fn engine_with_fake(duration_ms: u64) -> (PlaybackEngine, Arc<NotificationHub>) {
        let hub = Arc::new(NotificationHub::new());
        let factory = Arc::new(FakeMediaPlayerFactory { duration_ms });
        let config = EngineConfig {
            crossfade_secs: 0.2,
            promotion_guard_window_ms: 150,
            same_start_guard_secs: 0.05,
            tick_ms: 10,
            main_ready_timeout_ms: 100,
            next_ready_timeout_ms: 100,
            ..EngineConfig::default()
        };
        let engine = PlaybackEngine::new(factory, hub.clone(), config);
        (engine, hub)
    }

    #[test]
    fn handoff_on_short_tracks_reaches_second_track() {
        let dir = tempdir().unwrap();
        scene_with(dir.path(), &["a.mp3", "b.mp3"]);
        let (engine, hub) = engine_with_fake(300);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen2 = seen.clone();
        hub.subscribe(move |e| {
            if let crate::notify::Event::NowPlaying { now_playing } = e {
                seen2.lock().push(now_playing.clone());
            }
        });

        engine.play_scene(dir.path().to_str().unwrap(), Some(80));
        thread::sleep(Duration::from_millis(2500));
        engine.stop(true);

        let events = seen.lock();
        let distinct: HashSet<_> = events.iter().flatten().cloned().collect();
        assert!(distinct.len() >= 2, "expected at least two distinct tracks, saw {:?}", events);
    }

    #[test]
    fn soft_stop_prevents_successor() {
        let dir = tempdir().unwrap();
        scene_with(dir.path(), &["a.mp3", "b.mp3"]);
        let (engine, _hub) = engine_with_fake(1500);

        engine.play_scene(dir.path().to_str().unwrap(), Some(50));
        thread::sleep(Duration::from_millis(300));
        engine.stop_after_current_or_timeout(5);
        thread::sleep(Duration::from_millis(2700));

        assert!(!engine.is_playing());
    }

    #[test]
    fn set_volume_then_get_volume_is_clamped() {
        let (engine, _hub) = engine_with_fake(1000);
        engine.set_volume(150);
        assert_eq!(engine.get_volume(), 100);
    }

    #[test]
    fn stop_force_leaves_engine_idle() {
        let dir = tempdir().unwrap();
        scene_with(dir.path(), &["a.mp3"]);
        let (engine, _hub) = engine_with_fake(5000);
        engine.play_scene(dir.path().to_str().unwrap(), Some(50));
        thread::sleep(Duration::from_millis(100));
        engine.stop(true);
        assert_eq!(engine.get_phase(), Phase::Idle);
        assert!(!engine.is_playing());
    }

    #[test]
    fn set_volume_pushes_to_active_stream_and_emits_once() {
        let dir = tempdir().unwrap();
        scene_with(dir.path(), &["a.mp3"]);
        let (engine, hub) = engine_with_fake(5000);
        engine.play_scene(dir.path().to_str().unwrap(), Some(50));
        // Past the fixed 1s fade-in, into steady-state playback.
        thread::sleep(Duration::from_millis(1100));

        let volumes = Arc::new(Mutex::new(Vec::new()));
        let volumes2 = volumes.clone();
        hub.subscribe(move |e| {
            if let crate::notify::Event::Volume { volume } = e {
                volumes2.lock().push(*volume);
            }
        });

        engine.set_volume(100);
        thread::sleep(Duration::from_millis(200));
        engine.stop(true);

        assert_eq!(volumes.lock().clone(), vec![100]);
    }

    #[test]
    fn switch_scene_tears_down_in_progress_crossfade() {
        let scene_a = tempdir().unwrap();
        scene_with(scene_a.path(), &["a1.mp3", "a2.mp3"]);
        let scene_b = tempdir().unwrap();
        scene_with(scene_b.path(), &["b1.mp3"]);

        let hub = Arc::new(NotificationHub::new());
        let factory = Arc::new(FakeMediaPlayerFactory { duration_ms: 8000 });
        let config = EngineConfig {
            // A wide ramp (5s out of an 8s song) leaves generous margin for
            // scheduling jitter between "test observes Phase::Crossfade" and
            // "test calls switch_scene" under a contended CI host: a narrow
            // window risks the ramp completing and legitimately promoting
            // before the switch request lands, which isn't the teardown path
            // this test means to exercise.
            crossfade_secs: 5.0,
            promotion_guard_window_ms: 150,
            same_start_guard_secs: 0.05,
            tick_ms: 10,
            main_ready_timeout_ms: 100,
            next_ready_timeout_ms: 100,
            ..EngineConfig::default()
        };
        let engine = PlaybackEngine::new(factory, hub.clone(), config);

        let now_playing = Arc::new(Mutex::new(Vec::new()));
        let now_playing2 = now_playing.clone();
        hub.subscribe(move |e| {
            if let crate::notify::Event::NowPlaying { now_playing } = e {
                now_playing2.lock().push(now_playing.clone());
            }
        });

        engine.play_scene(scene_a.path().to_str().unwrap(), Some(50));
        // Poll for the crossfade to actually open rather than sleeping a
        // fixed guess: wall-clock margins around fade_start_ms are too tight
        // under CI/sandbox contention to assume a crossfade is in progress
        // after any fixed delay.
        let crossfade_opened = (0..6000).any(|_| {
            if engine.get_phase() == Phase::Crossfade {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
            false
        });
        assert!(crossfade_opened, "crossfade never opened within the timeout");

        // Scene A may have cycled through both of its tracks one or more
        // times (via ordinary, non-crossfade advances) before the crossfade
        // above ever managed to open, so counting distinct scene-A tracks
        // over the whole run isn't a valid invariant. Instead, only judge
        // what happens *after* the switch is requested: clear what's been
        // observed so far, then nothing but the new scene's track should
        // ever be reported, since a still-playing stream never re-emits its
        // own now-playing event.
        now_playing.lock().clear();
        engine.switch_scene(scene_b.path().to_str().unwrap(), Some(60));

        let switched = (0..6000).any(|_| {
            if now_playing.lock().iter().flatten().any(|p| p.contains("b1.mp3")) {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
            false
        });
        engine.stop(true);

        let seen = now_playing.lock();
        assert!(
            switched,
            "engine never switched to the new scene within the timeout: {:?}",
            seen
        );
        assert!(
            seen.iter().flatten().all(|p| p.contains("b1.mp3")),
            "the crossfade candidate from the old scene must not have been promoted after \
             switch_scene was requested: {:?}",
            seen
        );
    }
}
