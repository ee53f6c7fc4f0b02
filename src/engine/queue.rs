//! Per-scene shuffled track queue (spec §3, §4.2 Queue discipline).

use rand::seq::SliceRandom;
use std::path::Path;

use crate::model::{Track, list_scene_tracks};

pub struct Queue {
    pub scene_path: String,
    pub tracks: Vec<Track>,
    pub pos: usize,
}

impl Queue {
    /// Enumerate `dir`'s direct audio children, canonicalize, drop
    /// duplicates, and shuffle with a uniform random permutation.
    pub fn load(scene_path: &str) -> Self {
        let mut tracks = list_scene_tracks(Path::new(scene_path));
        tracks.shuffle(&mut rand::rng());
        Self {
            scene_path: scene_path.to_string(),
            tracks,
            pos: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn current(&self) -> Option<&Track> {
        self.tracks.get(self.pos)
    }

    /// Advance `pos`, reshuffling in place when it wraps and more than one
    /// track exists.
    pub fn advance(&mut self) {
        if self.tracks.is_empty() {
            return;
        }
        self.pos = (self.pos + 1) % self.tracks.len();
        if self.pos == 0 && self.tracks.len() > 1 {
            self.tracks.shuffle(&mut rand::rng());
        }
    }

    pub fn set_pos(&mut self, pos: usize) {
        if pos < self.tracks.len() {
            self.pos = pos;
        }
    }

    /// Scan `pos+1, pos+2, …` (mod length) for the first track whose
    /// realpath differs from `tracks[pos]`. `None` if `|tracks| <= 1` or
    /// every other track is the same realpath.
    pub fn pick_next_distinct(&self, pos: usize) -> Option<usize> {
        let len = self.tracks.len();
        if len <= 1 {
            return None;
        }
        let current = self.tracks.get(pos)?;
        for offset in 1..len {
            let idx = (pos + offset) % len;
            if &self.tracks[idx] != current {
                return Some(idx);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn load_collapses_duplicate_realpaths() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("x.mp3"), b"a").unwrap();
        #[cfg(unix)]
        std::os::unix::fs::symlink(dir.path().join("x.mp3"), dir.path().join("y.mp3")).unwrap();

        let queue = Queue::load(dir.path().to_str().unwrap());
        #[cfg(unix)]
        assert_eq!(queue.tracks.len(), 1);
    }

    #[test]
    fn pick_next_distinct_skips_identical_realpaths() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.mp3"), b"a").unwrap();
        fs::write(dir.path().join("b.mp3"), b"b").unwrap();
        let queue = Queue::load(dir.path().to_str().unwrap());
        assert_eq!(queue.tracks.len(), 2);
        let idx = queue.pick_next_distinct(0).unwrap();
        assert_ne!(queue.tracks[idx], queue.tracks[0]);
    }

    #[test]
    fn pick_next_distinct_none_when_single_track() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.mp3"), b"a").unwrap();
        let queue = Queue::load(dir.path().to_str().unwrap());
        assert_eq!(queue.pick_next_distinct(0), None);
    }

    #[test]
    fn advance_wraps_and_reshuffles() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.mp3"), b"a").unwrap();
        fs::write(dir.path().join("b.mp3"), b"b").unwrap();
        let mut queue = Queue::load(dir.path().to_str().unwrap());
        queue.advance();
        queue.advance();
        assert_eq!(queue.pos, 0);
    }

    #[test]
    fn missing_directory_is_empty() {
        let queue = Queue::load("/no/such/scene/dir");
        assert!(queue.is_empty());
    }
}
