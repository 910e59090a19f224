mod nms;
pub mod color;
pub mod source;

use serde::{Deserialize, Serialize};
use speedcam_proto::VehicleClass;
use std::path::PathBuf;

pub use nms::iou;

/// Axis-aligned box in pixel coordinates, left-top / right-bottom corners.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> f32 {
        (self.x2 - self.x1).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.y2 - self.y1).max(0.0)
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    /// Lower-center point; approximates where the vehicle touches the road.
    pub fn bottom_center(&self) -> (f32, f32) {
        ((self.x1 + self.x2) / 2.0, self.y2)
    }

    /// Finite coordinates and a strictly positive area.
    pub fn is_valid(&self) -> bool {
        [self.x1, self.y1, self.x2, self.y2].iter().all(|v| v.is_finite())
            && self.x2 > self.x1
            && self.y2 > self.y1
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub class_id: i32,
    pub conf: f32,
    #[serde(flatten)]
    pub bbox: BBox,
}

impl Detection {
    pub fn new(class_id: i32, conf: f32, bbox: BBox) -> Self {
        Self { class_id, conf, bbox }
    }

    pub fn vehicle_class(&self) -> VehicleClass {
        VehicleClass::from_coco_id(self.class_id)
    }
}

/// One frame as delivered by the detector process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameRecord {
    /// Monotonic capture time in seconds.
    pub ts: f64,
    #[serde(default)]
    pub detections: Vec<Detection>,
    /// Optional path to the decoded frame, used for color sampling.
    #[serde(default)]
    pub image: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VisionConfig {
    pub min_confidence: f32,
    /// COCO ids accepted as vehicles. Empty accepts everything.
    pub vehicle_classes: Vec<i32>,
    /// Class-aware NMS threshold; `None` disables suppression.
    pub nms_iou_threshold: Option<f32>,
    pub max_detections: usize,
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.25,
            vehicle_classes: vec![2, 3, 5, 7],
            nms_iou_threshold: Some(0.7),
            max_detections: 100,
        }
    }
}

/// Confidence, class allow-list and NMS, in that order. Survivors keep
/// their input order.
pub fn prefilter(dets: Vec<Detection>, cfg: &VisionConfig) -> Vec<Detection> {
    let dets: Vec<Detection> = dets
        .into_iter()
        .filter(|d| d.conf >= cfg.min_confidence)
        .filter(|d| cfg.vehicle_classes.is_empty() || cfg.vehicle_classes.contains(&d.class_id))
        .collect();

    match cfg.nms_iou_threshold {
        Some(th) => nms_filter(dets, th, cfg.max_detections),
        None => {
            let mut dets = dets;
            dets.truncate(cfg.max_detections);
            dets
        }
    }
}

pub fn nms_filter(dets: Vec<Detection>, iou_th: f32, max_det: usize) -> Vec<Detection> {
    let mut order: Vec<usize> = (0..dets.len()).collect();
    order.sort_by(|&a, &b| dets[b].conf.total_cmp(&dets[a].conf).then(a.cmp(&b)));

    let mut kept: Vec<usize> = Vec::new();
    'outer: for i in order {
        for &k in &kept {
            if dets[k].class_id == dets[i].class_id && iou(&dets[i].bbox, &dets[k].bbox) >= iou_th {
                continue 'outer;
            }
        }
        kept.push(i);
        if kept.len() >= max_det { break; }
    }

    kept.sort_unstable();
    let mut slots: Vec<Option<Detection>> = dets.into_iter().map(Some).collect();
    kept.into_iter().filter_map(|i| slots[i].take()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(class_id: i32, conf: f32, x1: f32) -> Detection {
        Detection::new(class_id, conf, BBox::new(x1, 100.0, x1 + 50.0, 150.0))
    }

    #[test]
    fn bottom_center_is_road_contact() {
        let b = BBox::new(10.0, 20.0, 30.0, 60.0);
        assert_eq!(b.bottom_center(), (20.0, 60.0));
        assert_eq!(b.area(), 800.0);
    }

    #[test]
    fn invalid_boxes() {
        assert!(!BBox::new(10.0, 10.0, 10.0, 20.0).is_valid());
        assert!(!BBox::new(f32::NAN, 10.0, 20.0, 20.0).is_valid());
        assert!(BBox::new(0.0, 0.0, 1.0, 1.0).is_valid());
    }

    #[test]
    fn prefilter_drops_low_conf_and_non_vehicles() {
        let out = prefilter(vec![det(2, 0.9, 0.0), det(0, 0.9, 200.0), det(7, 0.1, 400.0)], &VisionConfig::default());
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].class_id, 2);
    }

    #[test]
    fn nms_keeps_best_and_input_order() {
        let dets = vec![det(2, 0.5, 300.0), det(2, 0.6, 0.0), det(2, 0.9, 2.0)];
        let out = nms_filter(dets, 0.5, 10);
        assert_eq!(out.len(), 2);
        // input order preserved: the 300px box first, then the 0.9 box
        assert_eq!(out[0].bbox.x1, 300.0);
        assert_eq!(out[1].conf, 0.9);
    }

    #[test]
    fn nms_is_class_aware() {
        let out = nms_filter(vec![det(2, 0.9, 0.0), det(7, 0.8, 0.0)], 0.5, 10);
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn frame_record_from_json_line() {
        let rec: FrameRecord = serde_json::from_str(
            r#"{"ts": 10.5, "detections": [{"class_id": 2, "conf": 0.8, "x1": 1, "y1": 2, "x2": 3, "y2": 4}]}"#,
        )
        .unwrap();
        assert_eq!(rec.ts, 10.5);
        assert_eq!(rec.detections[0].bbox, BBox::new(1.0, 2.0, 3.0, 4.0));
        assert!(rec.image.is_none());

        let empty: FrameRecord = serde_json::from_str(r#"{"ts": 11.0}"#).unwrap();
        assert!(empty.detections.is_empty());
    }
}
