// THEORY:
// The `tracker` module adds memory to the per-frame forests. Each frame's
// detections (the blobs that survived the filters) are matched against the
// tracks of the previous frame, so that a region moving across the image keeps
// one small integer identity, its "hand id", for as long as it is visible.
//
// Key architectural principles:
// 1.  **Object Persistence**: A `Track` is an object's existence *over time*,
//     distinct from a `Blob`, which is a snapshot of one frame.
// 2.  **Greedy Association**: All (track, detection) pairs closer than
//     `max_radius` are ranked by centroid distance and accepted nearest-first,
//     each track and each detection used at most once. Ties go to the lower
//     hand id, then to the earlier detection, so identical inputs always give
//     identical identities.
// 3.  **Lifecycle State Machine**:
//     - **Birth**: an unmatched detection opens a `Pending` track on the
//       smallest free hand id. With every id taken the detection is dropped.
//     - **Activation**: after `minimal_frames_till_active` consecutive matched
//       frames (the creation frame included) a track becomes `Down`, then `Move` on
//       every later match.
//     - **Occlusion**: an unmatched track survives up to `max_missing_duration`
//       frames without a match.
//     - **Retirement**: past that, a pending track vanishes silently; an active
//       track is reported once more as `Up` and is dropped at the start of the
//       next frame, when its hand id becomes free again.
// 4.  **Bounded History**: Every track keeps a ring of recent centroids and a
//     velocity from the last two, which is all a gesture consumer needs.

use crate::core_modules::blob::Blob;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::ops::{BitOr, BitOrAssign};
use tracing::{debug, info, trace, warn};

/// Upper bound on concurrently tracked identities.
pub const MAX_HANDS: usize = 40;
const POSITION_HISTORY_SIZE: usize = 32;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// Largest centroid distance, in pixels, that still counts as a match.
    pub max_radius: f64,
    /// Frames a track may go unmatched before it is retired.
    pub max_missing_duration: u32,
    /// Consecutive matched frames needed before a pending track becomes active.
    pub minimal_frames_till_active: u32,
    /// Report only the N oldest tracks.
    pub use_n_oldest_blobs: Option<usize>,
    pub history_len: usize,
    pub max_hands: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            max_radius: 30.0,
            max_missing_duration: 3,
            minimal_frames_till_active: 3,
            use_n_oldest_blobs: None,
            history_len: POSITION_HISTORY_SIZE,
            max_hands: MAX_HANDS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TrackState {
    Pending,
    /// First frame as an active track.
    Down,
    Move,
    /// Retired this frame; gone on the next one.
    Up,
}

/// Bit set of `TrackState`s used to select tracks for output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TrackFilter(u32);

impl TrackFilter {
    pub const DOWN: Self = Self(1);
    pub const MOVE: Self = Self(2);
    pub const PENDING: Self = Self(4);
    pub const UP: Self = Self(8);
    pub const ALL: Self = Self(15);
    /// `Down` or `Move`.
    pub const ALL_ACTIVE: Self = Self(16);

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn matches(self, state: TrackState) -> bool {
        let bit = match state {
            TrackState::Down => Self::DOWN.0,
            TrackState::Move => Self::MOVE.0,
            TrackState::Pending => Self::PENDING.0,
            TrackState::Up => Self::UP.0,
        };
        self.0 & bit != 0
            || (self.0 & Self::ALL_ACTIVE.0 != 0
                && matches!(state, TrackState::Down | TrackState::Move))
    }
}

impl BitOr for TrackFilter {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for TrackFilter {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// One identity followed across frames.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Track {
    pub hand_id: usize,
    /// Blob of the last frame the track was matched in.
    pub blob: Blob,
    pub state: TrackState,
    pub frames_since_seen: u32,
    pub frames_since_created: u32,
    /// Consecutive matched frames, creation included. A miss resets it.
    pub seen_count: u32,
    pub position_history: VecDeque<(f64, f64)>,
    /// Centroid displacement per frame between the last two matches.
    pub velocity: (f64, f64),
}

impl Track {
    fn new(hand_id: usize, blob: Blob, history_len: usize) -> Self {
        let mut position_history = VecDeque::with_capacity(history_len);
        position_history.push_back(blob.center());
        Self {
            hand_id,
            blob,
            state: TrackState::Pending,
            frames_since_seen: 0,
            frames_since_created: 0,
            seen_count: 1,
            position_history,
            velocity: (0.0, 0.0),
        }
    }

    pub fn position(&self) -> (f64, f64) {
        self.blob.center()
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state, TrackState::Down | TrackState::Move)
    }

    fn update(&mut self, blob: Blob, history_len: usize) {
        self.blob = blob;
        self.position_history.push_back(blob.center());
        while self.position_history.len() > history_len.max(1) {
            self.position_history.pop_front();
        }

        let len = self.position_history.len();
        if len > 1 {
            let new_pos = self.position_history[len - 1];
            let old_pos = self.position_history[len - 2];
            self.velocity = (new_pos.0 - old_pos.0, new_pos.1 - old_pos.1);
        }

        self.seen_count = self.seen_count.saturating_add(1);
        self.frames_since_seen = 0;
    }
}

fn distance(a: (f64, f64), b: (f64, f64)) -> f64 {
    ((a.0 - b.0).powi(2) + (a.1 - b.1).powi(2)).sqrt()
}

/// Frame-to-frame identity manager.
#[derive(Debug, Clone)]
pub struct Tracker {
    config: TrackerConfig,
    /// Live tracks, kept sorted by hand id.
    tracks: Vec<Track>,
    hands_in_use: Vec<bool>,
    frame_id: u64,
}

impl Default for Tracker {
    fn default() -> Self {
        Self::new(TrackerConfig::default())
    }
}

impl Tracker {
    pub fn new(config: TrackerConfig) -> Self {
        let hands_in_use = vec![false; config.max_hands];
        Self {
            config,
            tracks: Vec::new(),
            hands_in_use,
            frame_id: 0,
        }
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Number of frames processed so far.
    pub fn frame_id(&self) -> u64 {
        self.frame_id
    }

    pub fn set_max_radius(&mut self, radius: f64) {
        self.config.max_radius = radius;
    }

    pub fn set_max_missing_duration(&mut self, frames: u32) {
        self.config.max_missing_duration = frames;
    }

    pub fn set_minimal_duration_filter(&mut self, frames: u32) {
        self.config.minimal_frames_till_active = frames;
    }

    pub fn set_oldest_duration_filter(&mut self, n: Option<usize>) {
        self.config.use_n_oldest_blobs = n;
    }

    pub fn set_history_len(&mut self, len: usize) {
        self.config.history_len = len;
    }

    /// All tracks, unfiltered, ordered by hand id.
    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn track(&self, hand_id: usize) -> Option<&Track> {
        self.tracks.iter().find(|t| t.hand_id == hand_id)
    }

    /// Forgets every track and frees all hand ids.
    pub fn clear(&mut self) {
        self.tracks.clear();
        self.hands_in_use.fill(false);
    }

    /// Feeds the detections of one frame.
    pub fn update(&mut self, detections: &[Blob]) {
        self.frame_id += 1;

        // Tracks reported as `Up` last frame are gone now.
        let hands_in_use = &mut self.hands_in_use;
        self.tracks.retain(|t| {
            if t.state == TrackState::Up {
                hands_in_use[t.hand_id] = false;
                false
            } else {
                true
            }
        });

        // --- 1. Association ---
        let max_radius = self.config.max_radius;
        let mut candidates: Vec<(f64, usize, usize)> = Vec::new();
        for track in &self.tracks {
            for (j, detection) in detections.iter().enumerate() {
                let d = distance(track.position(), detection.center());
                if d <= max_radius {
                    candidates.push((d, track.hand_id, j));
                }
            }
        }
        candidates.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)).then(a.2.cmp(&b.2)));

        let mut track_matched = vec![false; self.tracks.len()];
        let mut detection_matched = vec![false; detections.len()];
        let mut matches: Vec<(usize, usize)> = Vec::new();
        for &(_, hand_id, j) in &candidates {
            let Ok(i) = self.tracks.binary_search_by_key(&hand_id, |t| t.hand_id) else {
                continue;
            };
            if track_matched[i] || detection_matched[j] {
                continue;
            }
            track_matched[i] = true;
            detection_matched[j] = true;
            matches.push((i, j));
        }

        // --- 2. Matched tracks ---
        let history_len = self.config.history_len;
        let till_active = self.config.minimal_frames_till_active;
        for &(i, j) in &matches {
            let track = &mut self.tracks[i];
            track.update(detections[j], history_len);
            track.frames_since_created += 1;
            match track.state {
                TrackState::Pending if track.seen_count >= till_active => {
                    track.state = TrackState::Down;
                    info!(hand_id = track.hand_id, frame = self.frame_id, "track active");
                }
                TrackState::Down => track.state = TrackState::Move,
                _ => {}
            }
            trace!(hand_id = track.hand_id, state = ?track.state, "track matched");
        }

        // --- 3. Unmatched tracks ---
        let max_missing = self.config.max_missing_duration;
        let frame_id = self.frame_id;
        let mut retired = 0usize;
        let hands_in_use = &mut self.hands_in_use;
        let mut index = 0;
        self.tracks.retain_mut(|track| {
            let matched = track_matched[index];
            index += 1;
            if matched {
                return true;
            }
            track.frames_since_created += 1;
            track.frames_since_seen += 1;
            track.seen_count = 0;
            if track.frames_since_seen <= max_missing {
                return true;
            }
            retired += 1;
            if track.is_active() {
                info!(hand_id = track.hand_id, frame = frame_id, "track released");
                track.state = TrackState::Up;
                true
            } else {
                trace!(hand_id = track.hand_id, "pending track dropped");
                hands_in_use[track.hand_id] = false;
                false
            }
        });

        // --- 4. Births ---
        let mut born = 0usize;
        for (j, detection) in detections.iter().enumerate() {
            if detection_matched[j] {
                continue;
            }
            let Some(hand_id) = self.hands_in_use.iter().position(|used| !used) else {
                warn!(
                    max_hands = self.config.max_hands,
                    blob = detection.id,
                    "no free hand id, detection dropped"
                );
                continue;
            };
            self.hands_in_use[hand_id] = true;
            let mut track = Track::new(hand_id, *detection, history_len);
            if till_active <= 1 {
                track.state = TrackState::Down;
                info!(hand_id, frame = self.frame_id, "track active");
            }
            let at = self.tracks.partition_point(|t| t.hand_id < hand_id);
            self.tracks.insert(at, track);
            born += 1;
        }

        debug!(
            frame = self.frame_id,
            detections = detections.len(),
            matched = matches.len(),
            born,
            retired,
            tracks = self.tracks.len(),
            "tracker updated"
        );
    }

    /// Tracks whose state is selected by `filter`, ordered by hand id.
    ///
    /// With an oldest-N cap configured, active tracks are further limited to
    /// the N with the largest `frames_since_created`.
    pub fn filtered_tracks(&self, filter: TrackFilter) -> Vec<&Track> {
        let mut selected: Vec<&Track> = self
            .tracks
            .iter()
            .filter(|t| filter.matches(t.state))
            .collect();

        if let Some(n) = self.config.use_n_oldest_blobs {
            let mut active: Vec<&Track> = selected.iter().copied().filter(|t| t.is_active()).collect();
            if active.len() > n {
                active.sort_by(|a, b| {
                    b.frames_since_created
                        .cmp(&a.frames_since_created)
                        .then(a.hand_id.cmp(&b.hand_id))
                });
                let kept: Vec<usize> = active[..n].iter().map(|t| t.hand_id).collect();
                selected.retain(|t| !t.is_active() || kept.contains(&t.hand_id));
            }
        }
        selected
    }

    pub fn active_count(&self) -> usize {
        self.tracks.iter().filter(|t| t.is_active()).count()
    }

    pub fn pending_count(&self) -> usize {
        self.tracks
            .iter()
            .filter(|t| t.state == TrackState::Pending)
            .count()
    }
}
