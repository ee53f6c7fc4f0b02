//! Core data models: scenes, routines, and tracks.
//!
//! Defines the entities the scheduler reads and the engine plays. These map
//! onto the `scenes` and `routines` tables (spec §6); [`Track`] is an
//! engine-internal value, never persisted.

use sqlx::FromRow;
use std::path::{Path, PathBuf};

/// A named directory of audio files.
#[derive(Debug, Clone, FromRow)]
pub struct Scene {
    pub id: i64,
    pub name: String,
    /// Filesystem path to the scene's audio directory.
    pub path: String,
}

/// A time-window → (scene, volume) rule.
#[derive(Debug, Clone, FromRow)]
pub struct Routine {
    pub id: i64,
    pub scene_id: i64,
    /// `HH:MM`
    pub start_time: String,
    /// `HH:MM`
    pub end_time: String,
    /// Comma-separated lowercase three-letter weekday tokens, or NULL for "any".
    pub weekdays: Option<String>,
    /// Comma-separated lowercase three-letter month tokens, or NULL for "any".
    pub months: Option<String>,
    pub volume: i64,
}

impl Routine {
    /// Does this routine match the given wall-clock instant? (spec §3, §8 S3/S4)
    pub fn matches(&self, now: chrono::NaiveDateTime) -> bool {
        let now_hm = now.format("%H:%M").to_string();

        if self.start_time == self.end_time {
            return false;
        }

        let in_time = if self.start_time < self.end_time {
            self.start_time.as_str() <= now_hm.as_str() && now_hm.as_str() < self.end_time.as_str()
        } else {
            now_hm.as_str() >= self.start_time.as_str() || now_hm.as_str() < self.end_time.as_str()
        };
        if !in_time {
            return false;
        }

        if let Some(weekdays) = self.weekdays.as_deref().filter(|s| !s.trim().is_empty()) {
            let today = weekday_token(now.date());
            if !csv_tokens(weekdays).any(|t| t == today) {
                return false;
            }
        }

        if let Some(months) = self.months.as_deref().filter(|s| !s.trim().is_empty()) {
            let this_month = month_token(now.date());
            if !csv_tokens(months).any(|t| t == this_month) {
                return false;
            }
        }

        true
    }
}

fn csv_tokens(csv: &str) -> impl Iterator<Item = String> + '_ {
    csv.split(',')
        .map(|t| t.trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .map(|t| t.chars().take(3).collect())
}

fn weekday_token(date: chrono::NaiveDate) -> String {
    use chrono::Datelike;
    match date.weekday() {
        chrono::Weekday::Mon => "mon",
        chrono::Weekday::Tue => "tue",
        chrono::Weekday::Wed => "wed",
        chrono::Weekday::Thu => "thu",
        chrono::Weekday::Fri => "fri",
        chrono::Weekday::Sat => "sat",
        chrono::Weekday::Sun => "sun",
    }
    .to_string()
}

fn month_token(date: chrono::NaiveDate) -> String {
    use chrono::Datelike;
    const NAMES: [&str; 12] = [
        "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
    ];
    NAMES[(date.month0()) as usize].to_string()
}

/// An absolute, canonicalized path to an audio file. Equality and hashing
/// are by real (symlink-resolved) path (spec §3).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Track(PathBuf);

impl Track {
    /// Canonicalize `path` into a `Track`. Fails if the path doesn't exist.
    pub fn canonicalize(path: &Path) -> std::io::Result<Self> {
        Ok(Self(std::fs::canonicalize(path)?))
    }

    pub fn path(&self) -> &Path {
        &self.0
    }
}

impl std::fmt::Display for Track {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

/// Recognized audio file extensions (spec §3, §6), case-insensitive.
pub const AUDIO_EXTENSIONS: [&str; 3] = ["mp3", "wav", "ogg"];

pub fn has_audio_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| {
            let lower = e.to_lowercase();
            AUDIO_EXTENSIONS.contains(&lower.as_str())
        })
        .unwrap_or(false)
}

/// Enumerate the direct (non-recursive), non-hidden audio files under a
/// scene directory. Missing directories yield an empty list (spec §7:
/// "missing scene directory" is treated as an empty scene).
pub fn list_scene_tracks(dir: &Path) -> Vec<Track> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };

    let mut seen = std::collections::HashSet::new();
    let mut tracks = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let is_hidden = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.starts_with('.'))
            .unwrap_or(true);
        if is_hidden || !has_audio_extension(&path) {
            continue;
        }
        let Ok(track) = Track::canonicalize(&path) else {
            continue;
        };
        if seen.insert(track.clone()) {
            tracks.push(track);
        }
    }
    tracks
}
