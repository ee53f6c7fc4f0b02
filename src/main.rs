//! Garden Music - an always-on scene music controller.
//!
//! Maps recurring time-of-day routines to named scenes (shuffled audio
//! directories), plays them with crossfades, and fans out live state to
//! subscribers. See `run` for the service entry point.

pub mod cli;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod model;
pub mod notify;
pub mod player;
pub mod scheduler;

use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use cli::{Cli, Commands};
use db::init_db;
use engine::PlaybackEngine;
use notify::{Event, NotificationHub};
use player::CpalMediaPlayerFactory;
use scheduler::Scheduler;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(EnvFilter::from_default_env().add_directive("garden_music=info".parse().unwrap()))
        .init();

    let args = Cli::parse();
    let config = config::load();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    match args.command.unwrap_or(Commands::Run) {
        Commands::Run => runtime.block_on(run(config)),
        Commands::Seed {
            scene_name,
            scene_path,
            start,
            end,
            volume,
            weekdays,
            months,
        } => runtime.block_on(seed(
            config, scene_name, scene_path, start, end, volume, weekdays, months,
        )),
    }
}

async fn run(config: config::Config) -> anyhow::Result<()> {
    let db_url = db::db_url(&config.database_path);
    let pool = init_db(&db_url).await?;

    let hub = Arc::new(NotificationHub::new());
    hub.subscribe(|event: &Event| {
        tracing::info!(target: "garden_music::notify", ?event, "broadcast");
    });

    let factory = Arc::new(CpalMediaPlayerFactory);
    let engine = Arc::new(PlaybackEngine::new(factory, hub, config.engine.clone()));
    let scheduler = Arc::new(Scheduler::new(pool, engine.clone(), config.engine.clone()));

    scheduler.start();
    scheduler.resume_if_should_play();

    tracing::info!(target: "garden_music", "garden-music running, press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;
    tracing::info!(target: "garden_music", "shutting down");

    scheduler.stop().await;
    engine.shutdown();

    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn seed(
    config: config::Config,
    scene_name: String,
    scene_path: String,
    start: String,
    end: String,
    volume: i64,
    weekdays: Option<String>,
    months: Option<String>,
) -> anyhow::Result<()> {
    let db_url = db::db_url(&config.database_path);
    let pool = init_db(&db_url).await?;

    let scene_id = db::insert_scene(&pool, &scene_name, &scene_path).await?;
    let routine_id = db::insert_routine(
        &pool,
        scene_id,
        &start,
        &end,
        weekdays.as_deref(),
        months.as_deref(),
        volume,
    )
    .await?;

    println!("seeded scene {scene_id} ({scene_name}) and routine {routine_id}");
    Ok(())
}
