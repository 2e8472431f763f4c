//! Feature extractor boundary.
//!
//! Face detection and embedding are not done in-process. A
//! [`FeatureExtractor`] turns an image into zero or more (box, embedding)
//! pairs; [`CommandExtractor`] does so by running an external program.

use crate::frame::{Frame, FrameError};
use crate::types::DetectedFace;
use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExtractorError {
    #[error("failed to run extractor {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("extractor exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },
    #[error("invalid extractor output: {0}")]
    InvalidOutput(#[from] serde_json::Error),
    #[error("extractor returned a {actual}-d embedding, expected {expected}")]
    Dimension { expected: usize, actual: usize },
}

/// An image on disk together with its decoded grayscale pixels.
#[derive(Debug, Clone)]
pub struct SourceImage {
    pub path: PathBuf,
    pub frame: Frame,
}

impl SourceImage {
    /// Decode the image at `path`.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, FrameError> {
        let path = path.into();
        let frame = Frame::open(&path)?;
        Ok(Self { path, frame })
    }

    /// File name, for log lines.
    pub fn name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string())
    }
}

/// Produces one embedding per detected face.
pub trait FeatureExtractor: Send + Sync {
    /// Detect every face in `image` and embed it. No faces is `Ok(vec![])`.
    fn extract(&self, image: &SourceImage) -> Result<Vec<DetectedFace>, ExtractorError>;

    /// Short name for logs and status output.
    fn name(&self) -> &str;
}

/// Runs `<program> [args...] <image-path>` and reads a JSON array of
/// `{"bbox": {...}, "embedding": [...]}` objects from its stdout.
#[derive(Debug, Clone)]
pub struct CommandExtractor {
    program: PathBuf,
    args: Vec<String>,
    dimension: usize,
}

impl CommandExtractor {
    pub fn new(program: impl Into<PathBuf>, dimension: usize) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            dimension,
        }
    }

    /// Build from a whitespace-separated command line, e.g.
    /// `"face-embed --model hog"`. Returns `None` for a blank line.
    pub fn from_command_line(line: &str, dimension: usize) -> Option<Self> {
        let mut parts = line.split_whitespace();
        let program = parts.next()?;
        Some(Self {
            program: PathBuf::from(program),
            args: parts.map(str::to_string).collect(),
            dimension,
        })
    }

    pub fn with_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Parse extractor stdout, checking every embedding's dimension.
    pub fn parse_output(stdout: &[u8], dimension: usize) -> Result<Vec<DetectedFace>, ExtractorError> {
        let faces: Vec<DetectedFace> = serde_json::from_slice(stdout)?;
        if let Some(bad) = faces.iter().find(|f| f.embedding.dimension() != dimension) {
            return Err(ExtractorError::Dimension {
                expected: dimension,
                actual: bad.embedding.dimension(),
            });
        }
        Ok(faces)
    }
}

impl FeatureExtractor for CommandExtractor {
    fn extract(&self, image: &SourceImage) -> Result<Vec<DetectedFace>, ExtractorError> {
        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(&image.path)
            .output()
            .map_err(|source| ExtractorError::Spawn {
                program: self.program.display().to_string(),
                source,
            })?;

        if !output.status.success() {
            return Err(ExtractorError::Failed {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let faces = Self::parse_output(&output.stdout, self.dimension)?;
        tracing::debug!(image = %image.name(), faces = faces.len(), "extractor finished");
        Ok(faces)
    }

    fn name(&self) -> &str {
        "command"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_output_two_faces() {
        let json = br#"[
            {"bbox": {"x": 10, "y": 20, "width": 50, "height": 60, "confidence": 0.98}, "embedding": [0.1, 0.2, 0.3]},
            {"bbox": {"x": 100, "y": 20, "width": 40, "height": 40}, "embedding": [0.0, 0.0, 1.0]}
        ]"#;
        let faces = CommandExtractor::parse_output(json, 3).unwrap();
        assert_eq!(faces.len(), 2);
        assert_eq!(faces[0].bbox.confidence, Some(0.98));
        assert_eq!(faces[1].embedding.values, vec![0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_parse_output_no_faces() {
        assert!(CommandExtractor::parse_output(b"[]", 128).unwrap().is_empty());
    }

    #[test]
    fn test_parse_output_wrong_dimension() {
        let json = br#"[{"bbox": {"x": 0, "y": 0, "width": 1, "height": 1}, "embedding": [0.1, 0.2]}]"#;
        let err = CommandExtractor::parse_output(json, 128).unwrap_err();
        assert!(matches!(err, ExtractorError::Dimension { expected: 128, actual: 2 }));
    }

    #[test]
    fn test_parse_output_garbage() {
        let err = CommandExtractor::parse_output(b"Traceback (most recent call last)", 128).unwrap_err();
        assert!(matches!(err, ExtractorError::InvalidOutput(_)));
    }

    #[test]
    fn test_from_command_line() {
        let ex = CommandExtractor::from_command_line("  face-embed --model hog ", 128).unwrap();
        assert_eq!(ex.program(), Path::new("face-embed"));
        assert_eq!(ex.args, vec!["--model".to_string(), "hog".to_string()]);
        assert!(CommandExtractor::from_command_line("   ", 128).is_none());
    }

    #[test]
    fn test_missing_program_is_spawn_error() {
        let image = SourceImage {
            path: PathBuf::from("face.png"),
            frame: Frame::new(vec![0; 4], 2, 2).unwrap(),
        };
        let ex = CommandExtractor::new("/nonexistent/rollcall-extract", 128);
        assert!(matches!(ex.extract(&image), Err(ExtractorError::Spawn { .. })));
    }

    #[cfg(unix)]
    #[test]
    fn test_runs_program_with_image_path() {
        // Under `sh -c` the appended image path lands in $0 and is ignored.
        let image = SourceImage {
            path: PathBuf::from("face.png"),
            frame: Frame::new(vec![0; 4], 2, 2).unwrap(),
        };
        let ex = CommandExtractor::new("sh", 2).with_args([
            "-c",
            r#"echo '[{"bbox":{"x":0,"y":0,"width":2,"height":2},"embedding":[1.0,0.0]}]'"#,
        ]);
        let faces = ex.extract(&image).unwrap();
        assert_eq!(faces.len(), 1);
        assert_eq!(faces[0].embedding.values, vec![1.0, 0.0]);
    }

    #[cfg(unix)]
    #[test]
    fn test_nonzero_exit_is_failure() {
        let image = SourceImage {
            path: PathBuf::from("face.png"),
            frame: Frame::new(vec![0; 4], 2, 2).unwrap(),
        };
        let ex = CommandExtractor::new("sh", 2).with_args(["-c", "echo model missing >&2; exit 3"]);
        match ex.extract(&image) {
            Err(ExtractorError::Failed { stderr, .. }) => assert_eq!(stderr, "model missing"),
            other => panic!("expected Failed, got {other:?}"),
        }
    }
}
