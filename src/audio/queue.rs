use rand::{seq::SliceRandom, Rng};
use std::{collections::VecDeque, fmt};
use tracing::{debug, info};

use crate::{audio::track::Track, error::QueueError};

/// Callback invoked whenever the current track changes.
pub type TrackChangeHook = Box<dyn FnMut(Option<&Track>) + Send>;

/// In-memory queue engine for one guild.
///
/// Owns the current track, the pending FIFO queue and the play history.
/// The current track is never part of the pending queue, and the history
/// only grows through [`advance`](Self::advance) and [`stop`](Self::stop).
pub struct TrackQueue {
    items: VecDeque<Track>,
    current: Option<Track>,
    history: Vec<Track>,
    max_size: Option<usize>,
    on_track_change: Option<TrackChangeHook>,
}

impl TrackQueue {
    pub fn new() -> Self {
        Self {
            items: VecDeque::new(),
            current: None,
            history: Vec::new(),
            max_size: None,
            on_track_change: None,
        }
    }

    /// Queue that refuses new tracks once it holds `max_size` of them.
    pub fn with_max_size(max_size: usize) -> Self {
        Self {
            max_size: Some(max_size),
            ..Self::new()
        }
    }

    pub fn on_track_change(&mut self, hook: impl FnMut(Option<&Track>) + Send + 'static) {
        self.on_track_change = Some(Box::new(hook));
    }

    pub fn current(&self) -> Option<&Track> {
        self.current.as_ref()
    }

    /// Copy of the pending tracks, head first.
    pub fn queue(&self) -> Vec<Track> {
        self.iter().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Track> {
        self.items.iter()
    }

    pub fn history(&self) -> &[Track] {
        &self.history
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// True when nothing is playing and nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.current.is_none() && self.items.is_empty()
    }

    /// Appends to the tail and returns the 0-based position.
    pub fn add(&mut self, track: Track) -> Result<usize, QueueError> {
        self.ensure_capacity()?;
        info!("➕ Queued: {}", track.title);
        self.items.push_back(track);
        Ok(self.items.len() - 1)
    }

    /// Inserts at the head so the track plays next.
    pub fn add_next(&mut self, track: Track) -> Result<(), QueueError> {
        self.ensure_capacity()?;
        info!("⏫ Queued next: {}", track.title);
        self.items.push_front(track);
        Ok(())
    }

    pub fn remove(&mut self, index: usize) -> Result<Track, QueueError> {
        let len = self.items.len();
        let track = self
            .items
            .remove(index)
            .ok_or(QueueError::IndexOutOfRange { index, len })?;
        debug!("❌ Removed position {}: {}", index, track.title);
        Ok(track)
    }

    /// Empties the pending queue and returns how many tracks were dropped.
    pub fn clear(&mut self) -> usize {
        let count = self.items.len();
        self.items.clear();
        if count > 0 {
            info!("🗑️ Cleared {} tracks", count);
        }
        count
    }

    pub fn shuffle(&mut self) {
        self.shuffle_with(&mut rand::thread_rng());
    }

    /// Uniform permutation of the pending queue; current and history are untouched.
    pub fn shuffle_with<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        self.items.make_contiguous().shuffle(rng);
        info!("🔀 Queue shuffled");
    }

    /// Moves one track, keeping the relative order of the others.
    pub fn move_track(&mut self, from: usize, to: usize) -> Result<(), QueueError> {
        let len = self.items.len();
        if from >= len {
            return Err(QueueError::IndexOutOfRange { index: from, len });
        }
        if to >= len {
            return Err(QueueError::IndexOutOfRange { index: to, len });
        }

        if from != to {
            if let Some(track) = self.items.remove(from) {
                self.items.insert(to, track);
            }
            debug!("📍 Moved track from {} to {}", from, to);
        }

        Ok(())
    }

    /// Retires the current track to history and promotes the queue head.
    pub fn advance(&mut self) -> Option<&Track> {
        if let Some(finished) = self.current.take() {
            self.history.push(finished);
        }

        self.current = self.items.pop_front();
        match &self.current {
            Some(track) => info!("➡️ Next up: {}", track.title),
            None => info!("📭 Queue drained"),
        }

        self.notify();
        self.current.as_ref()
    }

    #[allow(dead_code)]
    pub fn skip(&mut self) -> Option<&Track> {
        self.advance()
    }

    /// Returns the current track, or advances when idle.
    pub fn start(&mut self) -> Option<&Track> {
        if self.current.is_some() {
            return self.current.as_ref();
        }
        self.advance()
    }

    /// Retires the current track without touching the pending queue.
    pub fn stop(&mut self) {
        if let Some(finished) = self.current.take() {
            self.history.push(finished);
        }
        self.notify();
    }

    /// Sum of pending track durations in seconds.
    pub fn total_duration(&self) -> u64 {
        self.iter().map(|track| track.duration_secs).sum()
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
    }

    fn ensure_capacity(&self) -> Result<(), QueueError> {
        match self.max_size {
            Some(max) if self.items.len() >= max => Err(QueueError::Full { max }),
            _ => Ok(()),
        }
    }

    fn notify(&mut self) {
        if let Some(hook) = self.on_track_change.as_mut() {
            hook(self.current.as_ref());
        }
    }
}

impl Default for TrackQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TrackQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackQueue")
            .field("current", &self.current)
            .field("items", &self.items)
            .field("history", &self.history.len())
            .field("max_size", &self.max_size)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rand::{rngs::StdRng, SeedableRng};
    use std::sync::{Arc, Mutex};

    fn track(title: &str) -> Track {
        Track::new(format!("https://example.com/{title}"), title, 180, "tester")
            .with_stream_url(format!("https://stream.example.com/{title}"))
    }

    fn titles<'a>(tracks: impl IntoIterator<Item = &'a Track>) -> Vec<&'a str> {
        tracks.into_iter().map(|t| t.title.as_str()).collect()
    }

    fn filled(n: usize) -> TrackQueue {
        let mut queue = TrackQueue::new();
        for i in 0..n {
            queue.add(track(&format!("S{i}"))).unwrap();
        }
        queue
    }

    #[test]
    fn add_keeps_insertion_order_and_returns_tail_index() {
        let mut queue = TrackQueue::new();
        assert_eq!(queue.add(track("a")).unwrap(), 0);
        assert_eq!(queue.add(track("b")).unwrap(), 1);
        assert_eq!(queue.add(track("c")).unwrap(), 2);
        assert_eq!(titles(queue.iter()), vec!["a", "b", "c"]);
    }

    #[test]
    fn add_next_goes_to_the_head() {
        let mut queue = filled(3);
        queue.add_next(track("urgent")).unwrap();
        assert_eq!(queue.queue()[0].title, "urgent");
        assert_eq!(queue.len(), 4);

        let mut empty = TrackQueue::new();
        empty.add_next(track("only")).unwrap();
        assert_eq!(empty.queue()[0].title, "only");
    }

    #[test]
    fn remove_returns_the_track() {
        let mut queue = filled(3);
        let removed = queue.remove(1).unwrap();
        assert_eq!(removed.title, "S1");
        assert_eq!(titles(queue.iter()), vec!["S0", "S2"]);
    }

    #[test]
    fn remove_out_of_range_leaves_queue_alone() {
        let mut queue = filled(2);
        assert_eq!(
            queue.remove(2),
            Err(QueueError::IndexOutOfRange { index: 2, len: 2 })
        );
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn clear_returns_prior_length() {
        let mut queue = filled(4);
        assert_eq!(queue.clear(), 4);
        assert_eq!(queue.len(), 0);
        assert_eq!(queue.clear(), 0);
    }

    #[test]
    fn shuffle_keeps_the_same_tracks() {
        let mut queue = filled(8);
        queue.advance();
        let before_current = queue.current().cloned();

        queue.shuffle_with(&mut StdRng::seed_from_u64(7));

        let mut shuffled = titles(queue.iter());
        shuffled.sort_unstable();
        assert_eq!(shuffled, vec!["S1", "S2", "S3", "S4", "S5", "S6", "S7"]);
        assert_eq!(queue.current().cloned(), before_current);
        assert_eq!(titles(queue.history()), vec![] as Vec<&str>);
    }

    #[test]
    fn shuffle_changes_order_across_seeds() {
        let original: Vec<String> = filled(10).iter().map(|t| t.title.clone()).collect();
        let changed = (0..20u64).any(|seed| {
            let mut queue = filled(10);
            queue.shuffle_with(&mut StdRng::seed_from_u64(seed));
            queue.iter().map(|t| t.title.clone()).collect::<Vec<_>>() != original
        });
        assert!(changed);
    }

    #[test]
    fn move_forward_and_backward() {
        let mut queue = filled(5);
        queue.move_track(0, 3).unwrap();
        assert_eq!(titles(queue.iter()), vec!["S1", "S2", "S3", "S0", "S4"]);

        let mut queue = filled(5);
        queue.move_track(4, 1).unwrap();
        assert_eq!(titles(queue.iter()), vec!["S0", "S4", "S1", "S2", "S3"]);
    }

    #[test]
    fn move_rejects_invalid_indices() {
        let mut queue = filled(3);
        assert_eq!(
            queue.move_track(3, 0),
            Err(QueueError::IndexOutOfRange { index: 3, len: 3 })
        );
        assert_eq!(
            queue.move_track(0, 5),
            Err(QueueError::IndexOutOfRange { index: 5, len: 3 })
        );
        assert_eq!(titles(queue.iter()), vec!["S0", "S1", "S2"]);
    }

    #[test]
    fn advancing_through_the_queue_fills_history_in_order() {
        let mut queue = filled(3);
        for _ in 0..3 {
            assert!(queue.advance().is_some());
        }
        assert_eq!(queue.current().map(|t| t.title.as_str()), Some("S2"));

        assert!(queue.advance().is_none());
        assert_eq!(titles(queue.history()), vec!["S0", "S1", "S2"]);
        assert!(queue.is_empty());
    }

    #[test]
    fn stop_retires_current_but_keeps_queue() {
        let mut queue = filled(3);
        queue.advance();
        queue.stop();

        assert!(queue.current().is_none());
        assert_eq!(titles(queue.history()), vec!["S0"]);
        assert_eq!(titles(queue.iter()), vec!["S1", "S2"]);

        queue.stop();
        assert_eq!(queue.history().len(), 1);
    }

    #[test]
    fn start_does_not_skip_the_current_track() {
        let mut queue = filled(2);
        assert_eq!(queue.start().map(|t| t.title.clone()), Some("S0".to_string()));
        assert_eq!(queue.start().map(|t| t.title.clone()), Some("S0".to_string()));
        assert_eq!(queue.skip().map(|t| t.title.clone()), Some("S1".to_string()));
    }

    #[test]
    fn total_duration_only_counts_pending_tracks() {
        let mut queue = TrackQueue::new();
        assert_eq!(queue.total_duration(), 0);

        queue.add(Track::new("u1", "a", 100, "r")).unwrap();
        queue.add(Track::new("u2", "b", 200, "r")).unwrap();
        queue.add(Track::new("u3", "c", 300, "r")).unwrap();
        queue.advance();
        assert_eq!(queue.total_duration(), 500);
    }

    #[test]
    fn is_empty_considers_current() {
        let mut queue = TrackQueue::new();
        assert!(queue.is_empty());
        queue.add(track("a")).unwrap();
        assert!(!queue.is_empty());
        queue.advance();
        assert_eq!(queue.len(), 0);
        assert!(!queue.is_empty());
    }

    #[test]
    fn clear_history_is_the_only_way_to_shrink_history() {
        let mut queue = filled(2);
        queue.advance();
        queue.advance();
        queue.advance();
        queue.clear();
        assert_eq!(queue.history().len(), 2);
        queue.clear_history();
        assert!(queue.history().is_empty());
    }

    #[test]
    fn max_size_is_enforced() {
        let mut queue = TrackQueue::with_max_size(2);
        queue.add(track("a")).unwrap();
        queue.add(track("b")).unwrap();
        assert_eq!(queue.add(track("c")), Err(QueueError::Full { max: 2 }));
        assert_eq!(queue.add_next(track("d")), Err(QueueError::Full { max: 2 }));
    }

    #[test]
    fn change_hook_sees_every_transition() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut queue = filled(1);
        let sink = seen.clone();
        queue.on_track_change(move |current| {
            sink.lock()
                .unwrap()
                .push(current.map(|t| t.title.clone()));
        });

        queue.advance();
        queue.stop();
        queue.advance();

        assert_eq!(
            *seen.lock().unwrap(),
            vec![Some("S0".to_string()), None, None]
        );
    }
}
