//! Detections and task-level rollups

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Normalized bounding box (fractions of image width/height)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
}

/// One labeled detection on a task's artifact
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Detection {
    pub id: Uuid,
    pub label: String,
    /// 0.0 - 1.0
    pub confidence: f64,
    pub bbox: BoundingBox,
    pub area_sqm: Option<f64>,
    pub is_manual: bool,
}

impl Detection {
    pub fn new(label: impl Into<String>, confidence: f64, bbox: BoundingBox, area_sqm: Option<f64>) -> Self {
        Self {
            id: Uuid::now_v7(),
            label: label.into(),
            confidence,
            bbox,
            area_sqm,
            is_manual: false,
        }
    }
}

/// Task-level summary fields derived from detections
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Rollups {
    /// True iff at least one detection
    pub has_trash: bool,
    /// Maximum single-detection confidence, scaled to 0-100
    pub confidence: f64,
}

/// Derive the rollups for a detection set
pub fn rollups(detections: &[Detection]) -> Rollups {
    let confidence = detections
        .iter()
        .map(|d| d.confidence)
        .fold(0.0_f64, f64::max)
        * 100.0;
    Rollups {
        has_trash: !detections.is_empty(),
        confidence,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bbox() -> BoundingBox {
        BoundingBox { x: 10.0, y: 20.0, w: 50.0, h: 50.0 }
    }

    #[test]
    fn test_rollups_max_confidence() {
        let detections = vec![
            Detection::new("plastic", 0.9, bbox(), Some(1.2)),
            Detection::new("metal", 0.6, bbox(), None),
        ];
        let r = rollups(&detections);
        assert!(r.has_trash);
        assert_eq!(r.confidence, 90.0);
    }

    #[test]
    fn test_rollups_empty() {
        let r = rollups(&[]);
        assert!(!r.has_trash);
        assert_eq!(r.confidence, 0.0);
    }

    #[test]
    fn test_bbox_serde() {
        let d = Detection::new("glass", 0.75, bbox(), None);
        let json = serde_json::to_value(&d.bbox).unwrap();
        assert_eq!(json["x"], 10.0);
        assert_eq!(json["w"], 50.0);
    }
}
