//! Enrollment image quality heuristic.
//!
//! Scores how usable a face photo is from three cues: how much of the frame
//! the face fills, how sharp the face crop is, and how close its exposure is
//! to mid-gray. The score tags stored embeddings; it does not pick the
//! primary one.

use crate::frame::Frame;
use crate::types::BoundingBox;
use serde::{Deserialize, Serialize};

const SIZE_WEIGHT: f32 = 0.4;
const SHARPNESS_WEIGHT: f32 = 0.4;
const BRIGHTNESS_WEIGHT: f32 = 0.2;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityConfig {
    /// Face/image area ratio at which the size score saturates.
    pub max_face_ratio: f32,
    /// Laplacian variance at which the sharpness score saturates.
    pub sharpness_norm: f32,
    /// Ideal mean luminance.
    pub brightness_midpoint: f32,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            max_face_ratio: 0.3,
            sharpness_norm: 500.0,
            brightness_midpoint: 127.0,
        }
    }
}

/// Per-cue scores, each in [0, 1], and their weighted sum.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct QualityBreakdown {
    pub size: f32,
    pub sharpness: f32,
    pub brightness: f32,
    pub score: f32,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct QualityScorer {
    config: QualityConfig,
}

impl QualityScorer {
    pub fn new(config: QualityConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &QualityConfig {
        &self.config
    }

    /// Overall quality of the face in `bbox`, in [0, 1].
    pub fn score(&self, frame: &Frame, bbox: &BoundingBox) -> f32 {
        self.breakdown(frame, bbox).score
    }

    pub fn breakdown(&self, frame: &Frame, bbox: &BoundingBox) -> QualityBreakdown {
        let image_area = frame.area();
        let size = if image_area > 0.0 {
            (bbox.area() / (image_area * self.config.max_face_ratio)).min(1.0)
        } else {
            0.0
        };

        let face = frame.crop(bbox);
        let (sharpness, brightness) = if face.is_empty() {
            (0.0, 0.0)
        } else {
            let sharpness = (face.laplacian_variance() / self.config.sharpness_norm).min(1.0);
            let mid = self.config.brightness_midpoint;
            let brightness = 1.0 - (face.avg_brightness() - mid).abs() / mid;
            (sharpness, brightness.clamp(0.0, 1.0))
        };

        let score = (size * SIZE_WEIGHT + sharpness * SHARPNESS_WEIGHT + brightness * BRIGHTNESS_WEIGHT)
            .clamp(0.0, 1.0);

        QualityBreakdown {
            size,
            sharpness,
            brightness,
            score,
        }
    }
}
