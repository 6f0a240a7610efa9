//! Simulated detection stage
//!
//! Stands in for the model-inference backend: produces zero or more
//! plausible detections with normalized bounding boxes.

use rand::seq::IndexedRandom;
use rand::Rng;

use mediastore::{BoundingBox, Detection};

const LABELS: [&str; 5] = ["plastic", "metal", "glass", "organic", "paper"];

/// Generate a plausible detection set for one artifact
pub fn simulate_detections<R: Rng + ?Sized>(rng: &mut R) -> Vec<Detection> {
    let count = rng.random_range(0..=3);
    (0..count)
        .map(|_| {
            let label = LABELS
                .choose(rng)
                .copied()
                .unwrap_or("plastic");
            let w = rng.random_range(0.05..0.3);
            let h = rng.random_range(0.05..0.3);
            let bbox = BoundingBox {
                x: rng.random_range(0.0..(1.0 - w)),
                y: rng.random_range(0.0..(1.0 - h)),
                w,
                h,
            };
            let area_sqm = if rng.random_bool(0.5) {
                Some(rng.random_range(0.01..0.8))
            } else {
                None
            };
            Detection::new(label, rng.random_range(0.35..0.98), bbox, area_sqm)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_detections_are_plausible() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..100 {
            let detections = simulate_detections(&mut rng);
            assert!(detections.len() <= 3);
            for d in detections {
                assert!(LABELS.contains(&d.label.as_str()));
                assert!(d.confidence >= 0.35 && d.confidence < 0.98);
                assert!(d.bbox.x >= 0.0 && d.bbox.x + d.bbox.w <= 1.0);
                assert!(d.bbox.y >= 0.0 && d.bbox.y + d.bbox.h <= 1.0);
                assert!(!d.is_manual);
            }
        }
    }

    #[test]
    fn test_sometimes_empty() {
        let mut rng = StdRng::seed_from_u64(7);
        let empties = (0..100)
            .filter(|_| simulate_detections(&mut rng).is_empty())
            .count();
        assert!(empties > 0);
    }
}
