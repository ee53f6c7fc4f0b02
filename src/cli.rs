//! Command-line entry points (spec §10.5): `run` starts the service, `seed`
//! inserts a scene/routine pair for manual testing.

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "garden-music", about = "Scene music controller")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run the scheduler and playback engine until interrupted (default).
    Run,

    /// Insert a scene and a routine pointing at it, for manual testing.
    Seed {
        /// Unique scene name.
        #[arg(long)]
        scene_name: String,
        /// Path to the scene's audio directory.
        #[arg(long)]
        scene_path: String,
        /// Routine start time, HH:MM.
        #[arg(long, default_value = "08:00")]
        start: String,
        /// Routine end time, HH:MM.
        #[arg(long, default_value = "22:00")]
        end: String,
        /// Target volume, 0..=100.
        #[arg(long, default_value_t = 50)]
        volume: i64,
        /// Comma-separated weekday tokens (mon,tue,...); omit for "any".
        #[arg(long)]
        weekdays: Option<String>,
        /// Comma-separated month tokens (jan,feb,...); omit for "any".
        #[arg(long)]
        months: Option<String>,
    },
}
