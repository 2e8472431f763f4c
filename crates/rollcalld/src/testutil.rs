//! Fixtures shared by the daemon's unit tests.

use rollcall_core::{BoundingBox, DetectedFace, Embedding, ExtractorError, FeatureExtractor, SourceImage};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Answers with canned faces keyed by image file name. Unknown names fail
/// the way a crashing extractor would.
#[derive(Debug, Default)]
pub struct StubExtractor {
    faces: HashMap<String, Vec<DetectedFace>>,
}

impl StubExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, file_name: &str, faces: Vec<DetectedFace>) -> Self {
        self.faces.insert(file_name.to_string(), faces);
        self
    }
}

impl FeatureExtractor for StubExtractor {
    fn extract(&self, image: &SourceImage) -> Result<Vec<DetectedFace>, ExtractorError> {
        self.faces
            .get(&image.name())
            .cloned()
            .ok_or_else(|| ExtractorError::Failed {
                status: "exit status: 1".to_string(),
                stderr: format!("cannot decode {}", image.name()),
            })
    }

    fn name(&self) -> &str {
        "stub"
    }
}

pub fn face(values: Vec<f32>) -> DetectedFace {
    DetectedFace {
        bbox: BoundingBox::new(8.0, 8.0, 48.0, 48.0),
        embedding: Embedding::new(values),
    }
}

/// Write a 64x64 grayscale gradient PNG named `name` into `dir`.
pub fn write_png(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    let img = image::GrayImage::from_fn(64, 64, |x, y| image::Luma([((x * 3 + y * 5) % 256) as u8]));
    img.save(&path).unwrap();
    path
}
