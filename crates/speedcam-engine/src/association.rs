//! Frame-to-track data association.
//!
//! Greedy matching on IoU between each live track's motion-predicted box
//! and the frame's detections. Candidate pairs are visited best score
//! first; ties go to the more confident detection, then to the lower
//! detection index, then to the older track, so a given input always
//! produces the same assignment.

use speedcam_vision::{iou, Detection};
use std::cmp::Ordering;

use crate::track::{Track, TrackId};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Assignment {
    /// `(track, detection index)`, one-to-one.
    pub matches: Vec<(TrackId, usize)>,
    pub unmatched_detections: Vec<usize>,
    pub unmatched_tracks: Vec<TrackId>,
}

#[derive(Debug, Clone, Copy)]
struct Candidate {
    score: f32,
    conf: f32,
    det: usize,
    track: TrackId,
}

fn rank(a: &Candidate, b: &Candidate) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then(b.conf.total_cmp(&a.conf))
        .then(a.det.cmp(&b.det))
        .then(a.track.cmp(&b.track))
}

/// Matches `dets` observed at `ts` against `tracks`.
///
/// A pair is only eligible when its IoU is strictly above `min_iou` and,
/// unless `class_agnostic`, the detection's class equals the track's.
pub fn associate<'a, I>(tracks: I, dets: &[Detection], ts: f64, min_iou: f32, class_agnostic: bool) -> Assignment
where
    I: IntoIterator<Item = &'a Track>,
{
    let mut track_ids = Vec::new();
    let mut candidates = Vec::new();

    for t in tracks {
        track_ids.push(t.id());
        let predicted = t.predicted_bbox(ts);
        let class = t.vehicle_class();
        for (i, d) in dets.iter().enumerate() {
            if !class_agnostic && d.vehicle_class() != class {
                continue;
            }
            let score = iou(&predicted, &d.bbox);
            if score > min_iou {
                candidates.push(Candidate { score, conf: d.conf, det: i, track: t.id() });
            }
        }
    }

    candidates.sort_by(rank);

    let mut used_det = vec![false; dets.len()];
    let mut matched_tracks: Vec<TrackId> = Vec::new();
    let mut matches = Vec::new();
    for c in candidates {
        if used_det[c.det] || matched_tracks.contains(&c.track) {
            continue;
        }
        used_det[c.det] = true;
        matched_tracks.push(c.track);
        matches.push((c.track, c.det));
    }

    Assignment {
        matches,
        unmatched_detections: (0..dets.len()).filter(|&i| !used_det[i]).collect(),
        unmatched_tracks: track_ids.into_iter().filter(|id| !matched_tracks.contains(id)).collect(),
    }
}
