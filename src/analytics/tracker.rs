use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use super::object::DetectionBox;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct TrackId(u64);

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Centroid {
    pub x: i32,
    pub y: i32,
}

impl Centroid {
    pub fn distance(&self, other: &Centroid) -> f64 {
        let dx = (self.x - other.x) as f64;
        let dy = (self.y - other.y) as f64;
        (dx * dx + dy * dy).sqrt()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackedObject {
    pub id: TrackId,
    pub centroid: Centroid,
    pub missed_frames: u32,
}

pub type TrackRegistry = BTreeMap<TrackId, TrackedObject>;

/// Greedy nearest-centroid identity tracker.
///
/// Ids increase monotonically and are never handed out twice by the same tracker.
/// Matching is unbounded unless a maximum match distance is configured.
pub struct IdentityTracker {
    registry: TrackRegistry,
    next_id: u64,
    max_disappeared: u32,
    max_match_distance: Option<f64>,
}

impl IdentityTracker {
    pub fn new(max_disappeared: u32, max_match_distance: Option<f64>) -> Self {
        Self {
            registry: TrackRegistry::new(),
            next_id: 0,
            max_disappeared,
            max_match_distance,
        }
    }

    pub fn registry(&self) -> &TrackRegistry {
        &self.registry
    }

    pub fn update(&mut self, boxes: &[DetectionBox]) -> &TrackRegistry {
        let centroids: Vec<Centroid> = boxes.iter().map(DetectionBox::centroid).collect();

        if self.registry.is_empty() {
            for centroid in centroids {
                self.register(centroid);
            }
            return &self.registry;
        }

        if centroids.is_empty() {
            let ids: Vec<TrackId> = self.registry.keys().copied().collect();
            for id in ids {
                self.mark_missed(id);
            }
            return &self.registry;
        }

        let tracks: Vec<(TrackId, Centroid)> = self
            .registry
            .values()
            .map(|t| (t.id, t.centroid))
            .collect();

        let distances: Vec<Vec<f64>> = tracks
            .iter()
            .map(|(_, c)| centroids.iter().map(|n| c.distance(n)).collect())
            .collect();

        // Rows whose best candidate is closest get first pick.
        let mut rows: Vec<usize> = (0..tracks.len()).collect();
        let row_min = |r: usize| distances[r].iter().copied().fold(f64::INFINITY, f64::min);
        rows.sort_by(|&a, &b| row_min(a).total_cmp(&row_min(b)));

        let mut row_claimed = vec![false; tracks.len()];
        let mut col_claimed = vec![false; centroids.len()];

        for row in rows {
            let nearest = distances[row]
                .iter()
                .enumerate()
                .filter(|(col, _)| !col_claimed[*col])
                .filter(|(_, d)| self.max_match_distance.map_or(true, |cap| **d <= cap))
                .min_by(|a, b| a.1.total_cmp(b.1))
                .map(|(col, _)| col);

            let Some(col) = nearest else {
                continue;
            };

            row_claimed[row] = true;
            col_claimed[col] = true;
            if let Some(track) = self.registry.get_mut(&tracks[row].0) {
                track.centroid = centroids[col];
                track.missed_frames = 0;
            }
        }

        for (row, (id, _)) in tracks.iter().enumerate() {
            if !row_claimed[row] {
                self.mark_missed(*id);
            }
        }

        let surplus = centroids.len() >= tracks.len();
        if surplus || self.max_match_distance.is_some() {
            for (col, centroid) in centroids.into_iter().enumerate() {
                if !col_claimed[col] {
                    self.register(centroid);
                }
            }
        }

        &self.registry
    }

    fn register(&mut self, centroid: Centroid) {
        let id = TrackId(self.next_id);
        self.next_id += 1;
        self.registry.insert(
            id,
            TrackedObject {
                id,
                centroid,
                missed_frames: 0,
            },
        );
        tracing::debug!(track = %id, x = centroid.x, y = centroid.y, "track registered");
    }

    fn mark_missed(&mut self, id: TrackId) {
        let Some(track) = self.registry.get_mut(&id) else {
            return;
        };
        track.missed_frames += 1;
        if track.missed_frames > self.max_disappeared {
            self.registry.remove(&id);
            tracing::debug!(track = %id, "track deregistered");
        }
    }
}
