//! Nearest-neighbour identity matching with a tunable acceptance threshold.

use crate::extractor::{ExtractorError, FeatureExtractor, SourceImage};
use crate::index::{EmbeddingIndex, IndexError, IndexedEmbedding};
use crate::types::{BoundingBox, Embedding};
use serde::Serialize;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MatchError {
    #[error(transparent)]
    Index(#[from] IndexError),
    #[error(transparent)]
    Extractor(#[from] ExtractorError),
    #[error("threshold {0} is outside [0, 1]")]
    InvalidThreshold(f32),
}

/// The closest enrolled template to a probe.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Candidate {
    pub employee_id: i64,
    pub employee_code: String,
    pub full_name: String,
    pub embedding_id: i64,
    pub distance: f32,
    /// `1 - distance`. Not clamped: may exceed 1 or go negative.
    pub confidence: f32,
}

/// Outcome of matching one probe embedding.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum MatchResult {
    /// Best candidate reached the threshold.
    Recognized(Candidate),
    /// Best candidate fell short; kept for diagnostics.
    Unrecognized(Candidate),
    /// Nothing enrolled.
    Empty,
}

impl MatchResult {
    pub fn is_recognized(&self) -> bool {
        matches!(self, MatchResult::Recognized(_))
    }

    /// Confidence of the closest candidate, 0.0 for an empty index.
    pub fn confidence(&self) -> f32 {
        self.candidate().map_or(0.0, |c| c.confidence)
    }

    pub fn candidate(&self) -> Option<&Candidate> {
        match self {
            MatchResult::Recognized(c) | MatchResult::Unrecognized(c) => Some(c),
            MatchResult::Empty => None,
        }
    }
}

/// Match result for one face found in a frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FaceMatch {
    pub bbox: BoundingBox,
    pub result: MatchResult,
}

/// Compare a probe against every entry and decide against `threshold`.
///
/// Always scans the whole gallery. The first strictly smaller distance wins,
/// so exact ties go to the lowest position.
pub fn best_match(gallery: &[IndexedEmbedding], probe: &Embedding, threshold: f32) -> MatchResult {
    let mut best_distance = f32::INFINITY;
    let mut best_idx: Option<usize> = None;

    for (i, entry) in gallery.iter().enumerate() {
        let distance = probe.euclidean_distance(&entry.embedding);
        if distance < best_distance {
            best_distance = distance;
            best_idx = Some(i);
        }
    }

    let Some(idx) = best_idx else {
        return MatchResult::Empty;
    };

    let entry = &gallery[idx];
    let candidate = Candidate {
        employee_id: entry.employee_id,
        employee_code: entry.employee_code.clone(),
        full_name: entry.full_name.clone(),
        embedding_id: entry.embedding_id,
        distance: best_distance,
        confidence: 1.0 - best_distance,
    };

    if candidate.confidence >= threshold {
        MatchResult::Recognized(candidate)
    } else {
        MatchResult::Unrecognized(candidate)
    }
}

fn check_threshold(value: f32) -> Result<f32, MatchError> {
    if (0.0..=1.0).contains(&value) {
        Ok(value)
    } else {
        Err(MatchError::InvalidThreshold(value))
    }
}

/// Matches probes against the shared [`EmbeddingIndex`].
#[derive(Debug)]
pub struct Matcher {
    index: Arc<EmbeddingIndex>,
    /// `f32` bits of the acceptance threshold.
    threshold: AtomicU32,
}

impl Matcher {
    pub fn new(index: Arc<EmbeddingIndex>, threshold: f32) -> Result<Self, MatchError> {
        let threshold = check_threshold(threshold)?;
        Ok(Self {
            index,
            threshold: AtomicU32::new(threshold.to_bits()),
        })
    }

    pub fn index(&self) -> &Arc<EmbeddingIndex> {
        &self.index
    }

    pub fn threshold(&self) -> f32 {
        f32::from_bits(self.threshold.load(Ordering::Acquire))
    }

    /// Change the acceptance threshold. Values outside [0, 1] are rejected
    /// and the current threshold is kept.
    pub fn set_threshold(&self, value: f32) -> Result<(), MatchError> {
        let value = check_threshold(value)?;
        let previous = f32::from_bits(self.threshold.swap(value.to_bits(), Ordering::AcqRel));
        tracing::info!(previous, threshold = value, "recognition threshold updated");
        Ok(())
    }

    /// Match one embedding against the current index generation.
    pub fn match_embedding(&self, probe: &Embedding) -> Result<MatchResult, MatchError> {
        let snapshot = self.index.snapshot();
        snapshot.check_dimension(probe)?;
        Ok(best_match(snapshot.entries(), probe, self.threshold()))
    }

    /// Extract every face in `image` and match each one.
    ///
    /// Returns one result per detected face, in extractor order. Deciding
    /// what to do with zero or several faces is up to the caller.
    pub fn process_frame(
        &self,
        extractor: &dyn FeatureExtractor,
        image: &SourceImage,
    ) -> Result<Vec<FaceMatch>, MatchError> {
        let faces = extractor.extract(image)?;
        let snapshot = self.index.snapshot();
        let threshold = self.threshold();

        faces
            .into_iter()
            .map(|face| {
                snapshot.check_dimension(&face.embedding)?;
                Ok(FaceMatch {
                    bbox: face.bbox,
                    result: best_match(snapshot.entries(), &face.embedding, threshold),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Frame;
    use crate::types::DetectedFace;
    use std::path::PathBuf;

    fn entry(embedding_id: i64, employee_id: i64, values: Vec<f32>) -> IndexedEmbedding {
        IndexedEmbedding {
            embedding_id,
            employee_id,
            employee_code: format!("E{employee_id:03}"),
            full_name: format!("Employee {employee_id}"),
            embedding: Embedding::new(values),
        }
    }

    fn matcher(entries: Vec<IndexedEmbedding>, threshold: f32) -> Matcher {
        Matcher::new(Arc::new(EmbeddingIndex::from_entries(entries)), threshold).unwrap()
    }

    #[test]
    fn test_scenario_two_candidates() {
        // A at distance 0.2, B at 0.55 from the origin probe.
        let m = matcher(
            vec![entry(1, 1, vec![0.2, 0.0]), entry(2, 2, vec![0.0, 0.55])],
            0.6,
        );
        let result = m.match_embedding(&Embedding::new(vec![0.0, 0.0])).unwrap();

        let MatchResult::Recognized(c) = result else {
            panic!("expected recognized, got {result:?}");
        };
        assert_eq!(c.employee_id, 1);
        assert!((c.confidence - 0.8).abs() < 1e-6);
        assert!((c.distance - 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_selects_global_minimum_not_first() {
        let m = matcher(
            vec![
                entry(1, 1, vec![0.9, 0.0]),
                entry(2, 2, vec![0.0, 0.7]),
                entry(3, 3, vec![0.1, 0.1]),
            ],
            0.5,
        );
        let result = m.match_embedding(&Embedding::new(vec![0.0, 0.0])).unwrap();
        assert_eq!(result.candidate().unwrap().embedding_id, 3);
    }

    #[test]
    fn test_exact_tie_goes_to_lowest_position() {
        let m = matcher(
            vec![
                entry(7, 7, vec![0.0, 0.3]),
                entry(5, 5, vec![0.3, 0.0]),
                entry(6, 6, vec![-0.3, 0.0]),
            ],
            0.5,
        );
        let result = m.match_embedding(&Embedding::new(vec![0.0, 0.0])).unwrap();
        assert_eq!(result.candidate().unwrap().embedding_id, 7);
    }

    #[test]
    fn test_confidence_not_clamped() {
        // Distance 1.5 gives confidence -0.5.
        let m = matcher(vec![entry(1, 1, vec![1.5, 0.0])], 0.0);
        let result = m.match_embedding(&Embedding::new(vec![0.0, 0.0])).unwrap();
        assert!(!result.is_recognized());
        assert!((result.confidence() + 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_exact_match_confidence_is_one() {
        let m = matcher(vec![entry(1, 1, vec![0.4, 0.4])], 1.0);
        let result = m.match_embedding(&Embedding::new(vec![0.4, 0.4])).unwrap();
        assert!(result.is_recognized());
        assert_eq!(result.confidence(), 1.0);
    }

    #[test]
    fn test_below_threshold_keeps_candidate() {
        let m = matcher(vec![entry(1, 1, vec![0.0, 0.5])], 0.6);
        let result = m.match_embedding(&Embedding::new(vec![0.0, 0.0])).unwrap();
        let MatchResult::Unrecognized(c) = result else {
            panic!("expected unrecognized, got {result:?}");
        };
        assert_eq!(c.employee_id, 1);
        assert!((c.confidence - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_threshold_boundary_is_inclusive() {
        let gallery = vec![entry(1, 1, vec![0.0, 0.25])];
        let probe = Embedding::new(vec![0.0, 0.0]);
        assert!(best_match(&gallery, &probe, 0.75).is_recognized());
    }

    #[test]
    fn test_decision_monotonic_in_threshold() {
        let gallery = vec![
            entry(1, 1, vec![0.31, 0.0]),
            entry(2, 2, vec![0.0, 0.62]),
            entry(3, 3, vec![0.4, 0.4]),
        ];
        let probes = [
            Embedding::new(vec![0.0, 0.0]),
            Embedding::new(vec![0.3, 0.1]),
            Embedding::new(vec![-0.5, 0.9]),
        ];
        let thresholds: Vec<f32> = (0..=20).map(|i| i as f32 / 20.0).collect();

        for probe in &probes {
            let mut rejected = false;
            for &t in &thresholds {
                let accepted = best_match(&gallery, probe, t).is_recognized();
                assert!(!(rejected && accepted), "threshold {t} re-accepted after a reject");
                rejected |= !accepted;
            }
        }
    }

    #[test]
    fn test_empty_index() {
        let m = matcher(vec![], 0.6);
        let result = m.match_embedding(&Embedding::new(vec![0.0; 128])).unwrap();
        assert_eq!(result, MatchResult::Empty);
        assert_eq!(result.confidence(), 0.0);
    }

    #[test]
    fn test_dimension_mismatch() {
        let m = matcher(vec![entry(1, 1, vec![0.0, 0.5])], 0.6);
        let err = m.match_embedding(&Embedding::new(vec![0.0; 3])).unwrap_err();
        assert!(matches!(err, MatchError::Index(IndexError::DimensionMismatch { .. })));
    }

    #[test]
    fn test_set_threshold_validates() {
        let m = matcher(vec![], 0.6);
        assert!(matches!(m.set_threshold(1.2), Err(MatchError::InvalidThreshold(_))));
        assert!(matches!(m.set_threshold(-0.1), Err(MatchError::InvalidThreshold(_))));
        assert!(m.set_threshold(f32::NAN).is_err());
        assert_eq!(m.threshold(), 0.6);

        m.set_threshold(0.45).unwrap();
        assert_eq!(m.threshold(), 0.45);
    }

    #[test]
    fn test_new_rejects_bad_threshold() {
        let index = Arc::new(EmbeddingIndex::new());
        assert!(Matcher::new(index, 2.0).is_err());
    }

    #[test]
    fn test_raising_threshold_flips_decision() {
        let m = matcher(vec![entry(1, 1, vec![0.0, 0.3])], 0.6);
        let probe = Embedding::new(vec![0.0, 0.0]);
        assert!(m.match_embedding(&probe).unwrap().is_recognized());
        m.set_threshold(0.8).unwrap();
        assert!(!m.match_embedding(&probe).unwrap().is_recognized());
    }

    #[test]
    fn test_sees_reloaded_index() {
        let index = Arc::new(EmbeddingIndex::new());
        let m = Matcher::new(Arc::clone(&index), 0.6).unwrap();
        let probe = Embedding::new(vec![0.0, 0.0]);
        assert_eq!(m.match_embedding(&probe).unwrap(), MatchResult::Empty);

        index.replace(vec![entry(9, 4, vec![0.1, 0.0])]);
        let result = m.match_embedding(&probe).unwrap();
        assert_eq!(result.candidate().unwrap().employee_id, 4);
    }

    struct FixedExtractor(Vec<DetectedFace>);

    impl FeatureExtractor for FixedExtractor {
        fn extract(&self, _image: &SourceImage) -> Result<Vec<DetectedFace>, ExtractorError> {
            Ok(self.0.clone())
        }

        fn name(&self) -> &str {
            "fixed"
        }
    }

    fn blank_image() -> SourceImage {
        SourceImage {
            path: PathBuf::from("frame.png"),
            frame: Frame::new(vec![0; 16], 4, 4).unwrap(),
        }
    }

    #[test]
    fn test_process_frame_one_result_per_face() {
        let m = matcher(
            vec![entry(1, 1, vec![0.0, 0.0]), entry(2, 2, vec![1.0, 1.0])],
            0.6,
        );
        let extractor = FixedExtractor(vec![
            DetectedFace {
                bbox: BoundingBox::new(0.0, 0.0, 2.0, 2.0),
                embedding: Embedding::new(vec![0.05, 0.0]),
            },
            DetectedFace {
                bbox: BoundingBox::new(2.0, 2.0, 2.0, 2.0),
                embedding: Embedding::new(vec![5.0, 5.0]),
            },
        ]);

        let matches = m.process_frame(&extractor, &blank_image()).unwrap();
        assert_eq!(matches.len(), 2);
        assert!(matches[0].result.is_recognized());
        assert_eq!(matches[0].result.candidate().unwrap().employee_id, 1);
        assert!(!matches[1].result.is_recognized());
        assert_eq!(matches[1].bbox.x, 2.0);
    }

    #[test]
    fn test_process_frame_no_faces() {
        let m = matcher(vec![entry(1, 1, vec![0.0, 0.0])], 0.6);
        let matches = m.process_frame(&FixedExtractor(vec![]), &blank_image()).unwrap();
        assert!(matches.is_empty());
    }

    #[test]
    fn test_match_result_json_shape() {
        let result = best_match(&[entry(1, 1, vec![0.0])], &Embedding::new(vec![0.5]), 0.9);
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["outcome"], "unrecognized");
        assert_eq!(json["employee_code"], "E001");
        assert_eq!(serde_json::to_value(MatchResult::Empty).unwrap()["outcome"], "empty");
    }
}
