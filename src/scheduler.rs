//! Polling scheduler (spec §4.3): maps "now" to at most one matching
//! routine and drives the engine with three verbs — play, switch, soft-stop
//! — while avoiding spurious restarts.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use sqlx::SqlitePool;
use tokio::sync::mpsc;
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::db;
use crate::engine::PlaybackEngine;
use crate::error::Result;
use crate::model::Routine;

const NONE_ID: i64 = -1;

enum Command {
    ResumeIfShouldPlay,
    Stop,
}

/// Background routine poller. Owns a single worker task; `start` is
/// idempotent and `stop` signals and joins with a timeout.
pub struct Scheduler {
    pool: SqlitePool,
    engine: Arc<PlaybackEngine>,
    config: EngineConfig,
    last_routine_id: Arc<AtomicI64>,
    last_scene_id: Arc<AtomicI64>,
    command_tx: mpsc::Sender<Command>,
    command_rx: std::sync::Mutex<Option<mpsc::Receiver<Command>>>,
    handle: std::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(pool: SqlitePool, engine: Arc<PlaybackEngine>, config: EngineConfig) -> Self {
        let (command_tx, command_rx) = mpsc::channel(8);
        Self {
            pool,
            engine,
            config,
            last_routine_id: Arc::new(AtomicI64::new(NONE_ID)),
            last_scene_id: Arc::new(AtomicI64::new(NONE_ID)),
            command_tx,
            command_rx: std::sync::Mutex::new(Some(command_rx)),
            handle: std::sync::Mutex::new(None),
        }
    }

    /// Start the polling worker. Idempotent: a second call while already
    /// running is a no-op.
    pub fn start(self: &Arc<Self>) {
        let mut handle_slot = self.handle.lock().unwrap();
        if handle_slot.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }
        let Some(command_rx) = self.command_rx.lock().unwrap().take() else {
            return;
        };
        let this = self.clone();
        *handle_slot = Some(tokio::spawn(async move { this.run(command_rx).await }));
        info!(target: "garden_music::scheduler", "scheduler started");
    }

    /// Out-of-band manual verb: forcibly run the match-and-drive step as if
    /// the last known state were idle.
    pub fn resume_if_should_play(&self) {
        let _ = self.command_tx.try_send(Command::ResumeIfShouldPlay);
    }

    /// Signal the worker and join it with a short timeout.
    pub async fn stop(&self) {
        let _ = self.command_tx.send(Command::Stop).await;
        let handle = self.handle.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = tokio::time::timeout(std::time::Duration::from_secs(2), handle).await;
        }
    }

    async fn run(&self, mut command_rx: mpsc::Receiver<Command>) {
        let mut ticker = interval(std::time::Duration::from_secs(self.config.poll_interval_secs));
        let mut no_match_logged = false;

        loop {
            tokio::select! {
                cmd = command_rx.recv() => {
                    match cmd {
                        Some(Command::ResumeIfShouldPlay) => self.tick_logged(&mut no_match_logged).await,
                        Some(Command::Stop) | None => {
                            info!(target: "garden_music::scheduler", "scheduler stopped");
                            break;
                        }
                    }
                }
                _ = ticker.tick() => {
                    self.tick_logged(&mut no_match_logged).await;
                }
            }
        }
    }

    /// Run [`tick`](Self::tick) and log-and-swallow any error: a transient
    /// database hiccup must not kill the polling worker (spec §4.3 is a
    /// best-effort poll, not a one-shot operation).
    async fn tick_logged(&self, no_match_logged: &mut bool) {
        if let Err(e) = self.tick(no_match_logged).await {
            warn!(target: "garden_music::scheduler", error = %e, "tick failed");
        }
    }

    /// One evaluation of "now" against all routines, driving the engine
    /// with at most one verb (spec §4.3 steps 1-3).
    async fn tick(&self, no_match_logged: &mut bool) -> Result<()> {
        let routines = db::list_routines(&self.pool).await?;

        let now = chrono::Local::now().naive_local();
        let matched = routines.iter().find(|r| r.matches(now));

        let Some(routine) = matched else {
            if self.last_routine_id.load(Ordering::Relaxed) != NONE_ID {
                info!(target: "garden_music::scheduler", "no routine matched anymore, arming soft stop");
                self.engine
                    .stop_after_current_or_timeout(self.config.soft_stop_timeout_secs);
                self.last_routine_id.store(NONE_ID, Ordering::Relaxed);
                self.last_scene_id.store(NONE_ID, Ordering::Relaxed);
            }
            if !*no_match_logged {
                warn!(target: "garden_music::scheduler", "no matching routine found, no music will play");
                *no_match_logged = true;
            }
            return Ok(());
        };
        *no_match_logged = false;

        let scene = match db::get_scene(&self.pool, routine.scene_id).await? {
            Some(s) => s,
            None => {
                warn!(target: "garden_music::scheduler", scene_id = routine.scene_id, "matched routine references a missing scene");
                return Ok(());
            }
        };

        self.drive(routine, &scene.path, scene.id).await;
        Ok(())
    }

    async fn drive(&self, routine: &Routine, scene_path: &str, scene_id: i64) {
        let last_routine = self.last_routine_id.load(Ordering::Relaxed);
        let last_scene = self.last_scene_id.load(Ordering::Relaxed);

        if routine.id == last_routine && !self.engine.is_playing() {
            // Don't restart a routine the user (or soft-stop) silenced intentionally.
            return;
        }

        if !self.engine.is_playing() {
            info!(target: "garden_music::scheduler", routine_id = routine.id, scene = %scene_path, "starting playback");
            self.engine.play_scene(scene_path, Some(routine.volume as u8));
        } else if routine.id != last_routine {
            info!(target: "garden_music::scheduler", routine_id = routine.id, scene = %scene_path, "new routine matched, switching");
            self.engine.switch_scene(scene_path, Some(routine.volume as u8));
        } else if scene_id != last_scene {
            debug!(target: "garden_music::scheduler", routine_id = routine.id, "scene re-pointed within same routine, switching");
            self.engine.switch_scene(scene_path, None);
        } else {
            debug!(target: "garden_music::scheduler", "same routine and scene still active, no action");
        }

        self.last_routine_id.store(routine.id, Ordering::Relaxed);
        self.last_scene_id.store(scene_id, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::NotificationHub;
    use crate::player::fake::FakeMediaPlayerFactory;
    use std::fs;
    use tempfile::tempdir;

    async fn memory_pool() -> SqlitePool {
        db::init_db("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn idempotent_tick_issues_no_restart_when_stopped() {
        let pool = memory_pool().await;
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.mp3"), b"x").unwrap();
        let scene_id = db::insert_scene(&pool, "s", dir.path().to_str().unwrap())
            .await
            .unwrap();
        db::insert_routine(&pool, scene_id, "00:00", "23:59", None, None, 50)
            .await
            .unwrap();

        let hub = Arc::new(NotificationHub::new());
        let factory = Arc::new(FakeMediaPlayerFactory { duration_ms: 60_000 });
        let engine = Arc::new(PlaybackEngine::new(factory, hub, EngineConfig::default()));
        let scheduler = Scheduler::new(pool, engine.clone(), EngineConfig::default());

        let mut logged = false;
        scheduler.tick(&mut logged).await.unwrap();
        for _ in 0..100 {
            if engine.is_playing() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert!(engine.is_playing());

        engine.stop(true);
        // Same routine still matches, but engine is no longer playing: must
        // not restart (spec §4.3 step 2 first branch).
        scheduler.tick(&mut logged).await.unwrap();
        assert!(!engine.is_playing());
    }

    #[tokio::test]
    async fn no_match_arms_soft_stop_and_clears_last_routine() {
        let pool = memory_pool().await;
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.mp3"), b"x").unwrap();
        let scene_id = db::insert_scene(&pool, "s", dir.path().to_str().unwrap())
            .await
            .unwrap();
        // A window that matches nothing (start == end).
        db::insert_routine(&pool, scene_id, "08:00", "08:00", None, None, 50)
            .await
            .unwrap();

        let hub = Arc::new(NotificationHub::new());
        let factory = Arc::new(FakeMediaPlayerFactory { duration_ms: 60_000 });
        let engine = Arc::new(PlaybackEngine::new(factory, hub, EngineConfig::default()));
        let scheduler = Scheduler::new(pool, engine.clone(), EngineConfig::default());

        scheduler.last_routine_id.store(999, Ordering::Relaxed);
        let mut logged = false;
        scheduler.tick(&mut logged).await.unwrap();
        assert_eq!(scheduler.last_routine_id.load(Ordering::Relaxed), NONE_ID);
    }
}
