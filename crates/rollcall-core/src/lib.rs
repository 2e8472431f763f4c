//! rollcall-core: face matching engine for attendance.
//!
//! Holds the in-memory embedding index, the exact nearest-neighbour matcher
//! with its tunable acceptance threshold, and the heuristic image quality
//! scorer used at enrollment. Face detection and embedding extraction are
//! delegated to an external [`FeatureExtractor`].

pub mod extractor;
pub mod frame;
pub mod index;
pub mod matcher;
pub mod quality;
pub mod types;

pub use extractor::{CommandExtractor, ExtractorError, FeatureExtractor, SourceImage};
pub use frame::{Frame, FrameError};
pub use index::{EmbeddingIndex, EmbeddingSource, IndexError, IndexSnapshot, IndexedEmbedding, Neighbor};
pub use matcher::{Candidate, FaceMatch, MatchError, MatchResult, Matcher};
pub use quality::{QualityBreakdown, QualityConfig, QualityScorer};
pub use types::{BoundingBox, DetectedFace, Embedding};
