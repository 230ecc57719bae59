use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use super::Track;

/// Shuffled play order. Every track plays once per pass and a new pass never
/// opens with the track that closed the previous one.
pub(crate) struct Playlist {
    tracks: Vec<Track>,
    order: Vec<usize>,
    cursor: usize,
    last_played: Option<String>,
    rng: StdRng,
}

impl Playlist {
    pub(crate) fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            tracks: Vec::new(),
            order: Vec::new(),
            cursor: 0,
            last_played: None,
            rng,
        }
    }

    pub(crate) fn set_tracks(&mut self, tracks: Vec<Track>) {
        self.tracks = tracks;
        self.invalidate();
    }

    /// Replaces a track with the same id.
    pub(crate) fn add(&mut self, track: Track) {
        match self.tracks.iter_mut().find(|existing| existing.id == track.id) {
            Some(existing) => *existing = track,
            None => self.tracks.push(track),
        }
        self.invalidate();
    }

    pub(crate) fn remove(&mut self, id: &str) -> bool {
        let before = self.tracks.len();
        self.tracks.retain(|track| track.id != id);
        let removed = self.tracks.len() != before;
        if removed {
            self.invalidate();
        }
        removed
    }

    pub(crate) fn len(&self) -> usize {
        self.tracks.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub(crate) fn next_track(&mut self) -> Option<Track> {
        if self.tracks.is_empty() {
            return None;
        }
        if self.cursor >= self.order.len() {
            self.reshuffle();
        }
        let track = self.tracks[self.order[self.cursor]].clone();
        self.cursor += 1;
        self.last_played = Some(track.id.clone());
        Some(track)
    }

    fn invalidate(&mut self) {
        self.order.clear();
        self.cursor = 0;
    }

    fn reshuffle(&mut self) {
        self.order = (0..self.tracks.len()).collect();
        self.order.shuffle(&mut self.rng);
        self.cursor = 0;

        let repeats_last = self
            .last_played
            .as_deref()
            .map(|last| self.tracks[self.order[0]].id == last)
            .unwrap_or(false);
        if repeats_last && self.order.len() > 1 {
            let last = self.order.len() - 1;
            self.order.swap(0, last);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    fn tracks(count: usize) -> Vec<Track> {
        (0..count)
            .map(|index| Track::new(format!("t{index}"), format!("Track {index}"), format!("music/{index}.mp3")))
            .collect()
    }

    #[test]
    fn each_pass_plays_every_track_once() {
        let mut playlist = Playlist::new(Some(7));
        playlist.set_tracks(tracks(5));

        for _ in 0..3 {
            let pass: HashSet<_> = (0..5)
                .filter_map(|_| playlist.next_track())
                .map(|track| track.id)
                .collect();
            assert_eq!(pass.len(), 5);
        }
    }

    #[test]
    fn new_pass_never_repeats_the_previous_track() {
        for seed in 0..200 {
            let mut playlist = Playlist::new(Some(seed));
            playlist.set_tracks(tracks(3));
            let mut previous = None;
            for _ in 0..12 {
                let id = playlist.next_track().map(|track| track.id);
                assert_ne!(id, previous, "seed {seed} repeated a track");
                previous = id;
            }
        }
    }

    #[test]
    fn single_track_loops() {
        let mut playlist = Playlist::new(Some(1));
        playlist.set_tracks(tracks(1));
        assert_eq!(playlist.next_track().map(|t| t.id).as_deref(), Some("t0"));
        assert_eq!(playlist.next_track().map(|t| t.id).as_deref(), Some("t0"));
    }

    #[test]
    fn edits_reshuffle_without_repeating() {
        let mut playlist = Playlist::new(Some(3));
        playlist.set_tracks(tracks(2));
        let first = playlist.next_track().map(|t| t.id);

        playlist.add(Track::new("t9", "Late addition", "music/9.mp3"));
        assert_eq!(playlist.len(), 3);
        assert_ne!(playlist.next_track().map(|t| t.id), first);

        assert!(playlist.remove("t9"));
        assert!(!playlist.remove("t9"));
        assert_eq!(playlist.len(), 2);

        playlist.set_tracks(Vec::new());
        assert!(playlist.is_empty());
        assert!(playlist.next_track().is_none());
    }
}
