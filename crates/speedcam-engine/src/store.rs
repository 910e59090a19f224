use speedcam_vision::Detection;
use std::collections::BTreeMap;
use tracing::debug;

use crate::track::{Track, TrackId, TrackStatus};

/// Sole owner of live tracks. Ids increase monotonically and are never
/// handed out twice.
#[derive(Debug)]
pub struct TrackStore {
    tracks: BTreeMap<TrackId, Track>,
    next_id: TrackId,
    max_tracks: usize,
    history_len: usize,
    color_capacity: usize,
}

/// Outcome of [`TrackStore::insert_new`].
#[derive(Debug)]
pub enum Insert {
    Created(TrackId),
    /// Created after pushing out the oldest tentative track.
    CreatedEvicting { id: TrackId, evicted: Track },
    /// Store full of confirmed tracks; the detection is not tracked.
    Full,
}

impl TrackStore {
    pub fn new(max_tracks: usize, history_len: usize, color_capacity: usize) -> Self {
        Self {
            tracks: BTreeMap::new(),
            next_id: 1,
            max_tracks: max_tracks.max(1),
            history_len,
            color_capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn get(&self, id: TrackId) -> Option<&Track> {
        self.tracks.get(&id)
    }

    pub(crate) fn get_mut(&mut self, id: TrackId) -> Option<&mut Track> {
        self.tracks.get_mut(&id)
    }

    /// Live tracks in id order.
    pub fn iter(&self) -> impl Iterator<Item = &Track> {
        self.tracks.values()
    }

    pub fn iter_active(&self) -> impl Iterator<Item = &Track> {
        self.tracks.values().filter(|t| t.status() == TrackStatus::Active)
    }

    pub fn ids(&self) -> Vec<TrackId> {
        self.tracks.keys().copied().collect()
    }

    pub fn insert_new(&mut self, det: &Detection, ts: f64) -> Insert {
        let mut evicted = None;
        if self.tracks.len() >= self.max_tracks {
            let oldest_tentative = self
                .tracks
                .values()
                .filter(|t| t.status() == TrackStatus::Tentative)
                .min_by(|a, b| a.first_seen().total_cmp(&b.first_seen()).then(a.id().cmp(&b.id())))
                .map(Track::id);
            match oldest_tentative.and_then(|id| self.remove_as(id, TrackStatus::Lost)) {
                Some(t) => evicted = Some(t),
                None => return Insert::Full,
            }
        }

        let id = self.next_id;
        self.next_id += 1;
        self.tracks.insert(id, Track::new(id, det, ts, self.history_len, self.color_capacity));
        debug!("store: track {} created at {:.3}", id, ts);

        match evicted {
            Some(evicted) => Insert::CreatedEvicting { id, evicted },
            None => Insert::Created(id),
        }
    }

    /// Applies a matched detection. `false` if `id` is not live.
    pub fn upsert_matched(&mut self, id: TrackId, det: &Detection, ts: f64) -> bool {
        match self.tracks.get_mut(&id) {
            Some(t) => {
                t.observe(det, ts);
                true
            }
            None => false,
        }
    }

    /// Removes every track unmatched for longer than `timeout_s` at `now`,
    /// resolving it as `Lost`.
    pub fn evict_stale(&mut self, now: f64, timeout_s: f64) -> Vec<Track> {
        let stale: Vec<TrackId> = self
            .tracks
            .values()
            .filter(|t| now - t.last_seen() > timeout_s)
            .map(Track::id)
            .collect();
        stale.into_iter().filter_map(|id| self.remove_as(id, TrackStatus::Lost)).collect()
    }

    /// Moves a track to a terminal status and takes it out of the store.
    pub(crate) fn remove_as(&mut self, id: TrackId, status: TrackStatus) -> Option<Track> {
        let mut t = self.tracks.remove(&id)?;
        if t.status() != status {
            if let Err(e) = t.transition(status) {
                debug!("store: {}", e);
            }
        }
        Some(t)
    }

    /// Takes out a track that already reached a terminal status.
    pub(crate) fn take(&mut self, id: TrackId) -> Option<Track> {
        self.tracks.remove(&id)
    }
}
