//! Copies of enrollment and attendance images kept next to the database.
//!
//! Stored references are paths relative to the archive root, e.g.
//! `employees/E001/E001_20240304_090112_3f2a9c1d.jpg`.

use chrono::NaiveDateTime;
use std::io;
use std::path::{Path, PathBuf};

/// What an archived image is evidence of.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    Enrollment,
    CheckIn,
    CheckOut,
}

#[derive(Debug, Clone)]
pub struct ImageArchive {
    root: PathBuf,
}

impl ImageArchive {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Copy `source` into the archive and return its relative reference.
    pub fn store(
        &self,
        source: &Path,
        kind: ImageKind,
        employee_code: &str,
        at: NaiveDateTime,
    ) -> io::Result<String> {
        let code = sanitize(employee_code);
        let ext = source
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_else(|| "jpg".to_string());
        let stamp = at.format("%Y%m%d_%H%M%S");
        let nonce = &uuid::Uuid::new_v4().simple().to_string()[..8];

        let relative = match kind {
            ImageKind::Enrollment => PathBuf::from("employees")
                .join(&code)
                .join(format!("{code}_{stamp}_{nonce}.{ext}")),
            ImageKind::CheckIn => {
                PathBuf::from("attendance").join(format!("checkin_{code}_{stamp}_{nonce}.{ext}"))
            }
            ImageKind::CheckOut => {
                PathBuf::from("attendance").join(format!("checkout_{code}_{stamp}_{nonce}.{ext}"))
            }
        };

        let target = self.root.join(&relative);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::copy(source, &target)?;
        tracing::debug!(source = %source.display(), target = %target.display(), "image archived");

        Ok(relative.to_string_lossy().into_owned())
    }

    /// Absolute path of a stored reference.
    pub fn resolve(&self, reference: &str) -> PathBuf {
        self.root.join(reference)
    }

    /// Delete archived copies. Failures are logged, not returned.
    pub fn discard<'a>(&self, references: impl IntoIterator<Item = &'a str>) {
        for reference in references {
            let path = self.resolve(reference);
            if let Err(e) = std::fs::remove_file(&path) {
                tracing::warn!(path = %path.display(), error = %e, "failed to remove archived image");
            }
        }
    }
}

/// Employee codes become directory names; keep them to a safe alphabet.
fn sanitize(code: &str) -> String {
    let cleaned: String = code
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if cleaned.is_empty() {
        "_".to_string()
    } else {
        cleaned
    }
}
