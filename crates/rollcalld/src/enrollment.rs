//! Building an employee's template set.
//!
//! `enroll` extracts and scores every image first, then commits the employee
//! row and all embeddings in one store transaction. Nothing becomes visible
//! unless at least one image produced a usable face.

use crate::archive::{ImageArchive, ImageKind};
use crate::error::{ExtractionFailure, ServiceError};
use chrono::NaiveDateTime;
use rollcall_core::{DetectedFace, EmbeddingIndex, FeatureExtractor, QualityScorer, SourceImage};
use rollcall_store::{EmbeddingRecord, NewEmbedding, NewEmployee, RemovedEmbedding, Store, StoreError};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// An image that did not contribute an embedding, and why.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedImage {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnrollResult {
    pub employee_id: i64,
    pub employee_code: String,
    /// Embeddings stored.
    pub count: usize,
    pub skipped: Vec<SkippedImage>,
}

pub struct EnrollmentCoordinator {
    store: Arc<Store>,
    index: Arc<EmbeddingIndex>,
    extractor: Arc<dyn FeatureExtractor>,
    scorer: QualityScorer,
    archive: ImageArchive,
    max_per_employee: usize,
}

impl EnrollmentCoordinator {
    pub fn new(
        store: Arc<Store>,
        index: Arc<EmbeddingIndex>,
        extractor: Arc<dyn FeatureExtractor>,
        scorer: QualityScorer,
        archive: ImageArchive,
        max_per_employee: usize,
    ) -> Self {
        Self {
            store,
            index,
            extractor,
            scorer,
            archive,
            max_per_employee,
        }
    }

    pub fn max_per_employee(&self) -> usize {
        self.max_per_employee
    }

    /// Create an employee from a batch of photos.
    ///
    /// Images with no face, several faces, or that cannot be read are
    /// skipped. Once `max_per_employee` images have succeeded the rest are
    /// skipped too. The first successful image becomes the primary template.
    pub fn enroll(&self, profile: &NewEmployee, images: &[PathBuf]) -> Result<EnrollResult, ServiceError> {
        let code = profile.employee_code.trim();
        if code.is_empty() {
            return Err(ServiceError::Validation("employee code is required".into()));
        }
        if profile.full_name.trim().is_empty() {
            return Err(ServiceError::Validation("full name is required".into()));
        }
        if images.is_empty() {
            return Err(ServiceError::Validation("at least one image is required".into()));
        }
        if self.store.employee_by_code(code)?.is_some() {
            return Err(ServiceError::DuplicateEmployee(code.to_string()));
        }

        let profile = NewEmployee {
            employee_code: code.to_string(),
            full_name: profile.full_name.trim().to_string(),
            ..profile.clone()
        };
        let now = local_now();
        let mut accepted: Vec<NewEmbedding> = Vec::new();
        let mut skipped = Vec::new();

        for (i, path) in images.iter().enumerate() {
            if accepted.len() >= self.max_per_employee {
                skipped.push(SkippedImage {
                    path: path.clone(),
                    reason: format!("limit of {} photos reached", self.max_per_employee),
                });
                continue;
            }

            match self.prepare(path, code, now) {
                Ok(new) => {
                    tracing::debug!(
                        code,
                        image = i + 1,
                        quality = new.quality_score,
                        "enrollment image accepted"
                    );
                    accepted.push(NewEmbedding {
                        is_primary: accepted.is_empty(),
                        ..new
                    });
                }
                Err(e) => {
                    tracing::warn!(code, image = %path.display(), error = %e, "enrollment image skipped");
                    skipped.push(SkippedImage {
                        path: path.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        if accepted.is_empty() {
            return Err(ServiceError::EnrollmentFailed("no valid faces".into()));
        }

        let (employee, records) = match self.store.create_employee(&profile, &accepted) {
            Ok(created) => created,
            Err(e) => {
                self.archive.discard(accepted.iter().map(|n| n.image_path.as_str()));
                return Err(match e {
                    StoreError::DuplicateCode(code) => ServiceError::DuplicateEmployee(code),
                    other => ServiceError::Store(other),
                });
            }
        };

        self.reload();
        tracing::info!(
            code,
            employee_id = employee.employee_id,
            count = records.len(),
            skipped = skipped.len(),
            "enrollment committed"
        );

        Ok(EnrollResult {
            employee_id: employee.employee_id,
            employee_code: employee.employee_code,
            count: records.len(),
            skipped,
        })
    }

    /// Add one more photo to an active employee.
    pub fn add_photo(&self, code: &str, image: &Path) -> Result<EmbeddingRecord, ServiceError> {
        let employee = self
            .store
            .employee_by_code(code)?
            .filter(|e| e.is_active())
            .ok_or_else(|| ServiceError::EmployeeNotFound(code.to_string()))?;

        let quota = || ServiceError::QuotaExceeded {
            code: code.to_string(),
            max: self.max_per_employee,
        };
        if self.store.embedding_count(employee.employee_id)? >= self.max_per_employee {
            return Err(quota());
        }

        let new = self.prepare(image, code, local_now())?;
        let record = match self
            .store
            .add_embedding(employee.employee_id, &new, self.max_per_employee)
        {
            Ok(record) => record,
            Err(e) => {
                self.archive.discard([new.image_path.as_str()]);
                return Err(match e {
                    StoreError::QuotaExceeded { .. } => quota(),
                    StoreError::EmployeeNotFound(_) => ServiceError::EmployeeNotFound(code.to_string()),
                    other => ServiceError::Store(other),
                });
            }
        };

        self.reload();
        tracing::info!(code, encoding_id = record.encoding_id, "face photo added");
        Ok(record)
    }

    /// Delete one stored photo and its archived image. An employee's last
    /// photo cannot be removed.
    pub fn remove_photo(&self, encoding_id: i64) -> Result<RemovedEmbedding, ServiceError> {
        let removed = match self.store.remove_embedding(encoding_id) {
            Ok(Some(removed)) => removed,
            Ok(None) => return Err(ServiceError::PhotoNotFound(encoding_id)),
            Err(StoreError::LastEmbedding { employee_id, .. }) => {
                let code = self
                    .store
                    .employee(employee_id)?
                    .map(|e| e.employee_code)
                    .unwrap_or_else(|| employee_id.to_string());
                return Err(ServiceError::LastPhoto { code, encoding_id });
            }
            Err(e) => return Err(e.into()),
        };

        self.archive.discard([removed.image_path.as_str()]);
        self.reload();
        tracing::info!(
            employee_id = removed.employee_id,
            encoding_id,
            was_primary = removed.was_primary,
            "face photo removed"
        );
        Ok(removed)
    }

    /// Extract exactly one face from `path`, score it and archive the image.
    fn prepare(&self, path: &Path, code: &str, now: NaiveDateTime) -> Result<NewEmbedding, ServiceError> {
        let image = SourceImage::open(path)?;
        let face = single_face(self.extractor.extract(&image)?)?;
        let quality_score = self.scorer.score(&image.frame, &face.bbox);
        let image_path = self.archive.store(path, ImageKind::Enrollment, code, now)?;

        Ok(NewEmbedding {
            embedding: face.embedding,
            image_path,
            quality_score,
            is_primary: false,
        })
    }

    /// The data is committed; a failed reload leaves the previous index in
    /// place until the next reload.
    fn reload(&self) {
        if let Err(e) = self.index.load(self.store.as_ref()) {
            tracing::error!(error = %e, "embedding index reload failed");
        }
    }
}

fn single_face(mut faces: Vec<DetectedFace>) -> Result<DetectedFace, ServiceError> {
    match faces.len() {
        0 => Err(ServiceError::EncodingExtractionFailed(ExtractionFailure::NoFace)),
        1 => Ok(faces.remove(0)),
        _ => Err(ServiceError::EncodingExtractionFailed(ExtractionFailure::MultiFace)),
    }
}

fn local_now() -> NaiveDateTime {
    chrono::Local::now().naive_local()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{face, write_png, StubExtractor};
    use rollcall_store::{EmployeeStatus, StoreError};

    struct Fixture {
        dir: tempfile::TempDir,
        store: Arc<Store>,
        index: Arc<EmbeddingIndex>,
        coordinator: EnrollmentCoordinator,
    }

    fn fixture(extractor: StubExtractor, max: usize) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(Store::open(&dir.path().join("rollcall.db")).unwrap());
        let index = Arc::new(EmbeddingIndex::new());
        let coordinator = EnrollmentCoordinator::new(
            Arc::clone(&store),
            Arc::clone(&index),
            Arc::new(extractor),
            QualityScorer::default(),
            ImageArchive::new(dir.path().join("images")),
            max,
        );
        Fixture {
            dir,
            store,
            index,
            coordinator,
        }
    }

    fn profile(code: &str) -> NewEmployee {
        NewEmployee {
            employee_code: code.into(),
            full_name: "Ada Lovelace".into(),
            email: Some("ada@example.com".into()),
            ..NewEmployee::default()
        }
    }

    fn images(f: &Fixture, names: &[&str]) -> Vec<PathBuf> {
        names.iter().map(|n| write_png(f.dir.path(), n)).collect()
    }

    fn archived_files(f: &Fixture) -> usize {
        let dir = f.dir.path().join("images/employees/E001");
        std::fs::read_dir(dir).map(|d| d.count()).unwrap_or(0)
    }

    fn stub() -> StubExtractor {
        StubExtractor::new()
            .with("a.png", vec![face(vec![0.0, 1.0])])
            .with("b.png", vec![face(vec![1.0, 0.0])])
            .with("c.png", vec![face(vec![1.0, 1.0])])
            .with("none.png", vec![])
            .with("two.png", vec![face(vec![0.0, 1.0]), face(vec![1.0, 0.0])])
    }

    #[test]
    fn test_enroll_skips_bad_images() {
        let f = fixture(stub(), 5);
        let paths = images(&f, &["none.png", "a.png", "two.png", "b.png", "unknown.png"]);

        let result = f.coordinator.enroll(&profile("E001"), &paths).unwrap();
        assert_eq!(result.count, 2);
        assert_eq!(result.skipped.len(), 3);

        let records = f.store.embeddings_for(result.employee_id).unwrap();
        assert_eq!(records.len(), 2);
        // Primary is the first image that produced a face, not the best one.
        assert!(records[0].is_primary);
        assert_eq!(records[0].embedding.values, vec![0.0, 1.0]);
        assert!(!records[1].is_primary);
        assert!(records.iter().all(|r| (0.0..=1.0).contains(&r.quality_score)));

        assert_eq!(f.index.len(), 2);
        assert_eq!(archived_files(&f), 2);
    }

    #[test]
    fn test_enroll_with_no_valid_faces_leaves_nothing() {
        let f = fixture(stub(), 5);
        let paths = images(&f, &["none.png", "two.png"]);

        let err = f.coordinator.enroll(&profile("E001"), &paths).unwrap_err();
        assert!(matches!(err, ServiceError::EnrollmentFailed(ref m) if m == "no valid faces"));

        let found = f.store.employee_by_code("E001").unwrap();
        assert!(found.map_or(true, |e| e.status != EmployeeStatus::Active));
        assert!(f.index.is_empty());
        assert_eq!(archived_files(&f), 0);
    }

    #[test]
    fn test_enroll_duplicate_code() {
        let f = fixture(stub(), 5);
        let paths = images(&f, &["a.png"]);
        f.coordinator.enroll(&profile("E001"), &paths).unwrap();

        let err = f.coordinator.enroll(&profile("E001"), &paths).unwrap_err();
        assert!(matches!(err, ServiceError::DuplicateEmployee(ref c) if c == "E001"));
    }

    #[test]
    fn test_duplicate_checked_against_inactive_too() {
        let f = fixture(stub(), 5);
        let paths = images(&f, &["a.png"]);
        let result = f.coordinator.enroll(&profile("E001"), &paths).unwrap();
        f.store
            .set_employee_status(result.employee_id, EmployeeStatus::Inactive)
            .unwrap();

        let err = f.coordinator.enroll(&profile("E001"), &paths).unwrap_err();
        assert!(matches!(err, ServiceError::DuplicateEmployee(_)));
    }

    #[test]
    fn test_enroll_caps_at_max() {
        let f = fixture(stub(), 2);
        let paths = images(&f, &["a.png", "b.png", "c.png"]);
        let result = f.coordinator.enroll(&profile("E001"), &paths).unwrap();
        assert_eq!(result.count, 2);
        assert_eq!(result.skipped.len(), 1);
        assert_eq!(f.store.embedding_count(result.employee_id).unwrap(), 2);
    }

    #[test]
    fn test_enroll_validation() {
        let f = fixture(stub(), 5);
        let paths = images(&f, &["a.png"]);

        let mut blank = profile("  ");
        assert!(matches!(
            f.coordinator.enroll(&blank, &paths),
            Err(ServiceError::Validation(_))
        ));
        blank = profile("E001");
        blank.full_name = String::new();
        assert!(matches!(
            f.coordinator.enroll(&blank, &paths),
            Err(ServiceError::Validation(_))
        ));
        assert!(matches!(
            f.coordinator.enroll(&profile("E001"), &[]),
            Err(ServiceError::Validation(_))
        ));
    }

    #[test]
    fn test_store_failure_rolls_back_and_removes_archived_images() {
        let f = fixture(stub(), 5);
        let paths = images(&f, &["a.png", "b.png"]);
        let side = rusqlite::Connection::open(f.dir.path().join("rollcall.db")).unwrap();
        side.execute_batch(
            "CREATE TRIGGER fail_embeddings BEFORE INSERT ON face_encodings
             BEGIN SELECT RAISE(ABORT, 'disk full'); END;",
        )
        .unwrap();

        let err = f.coordinator.enroll(&profile("E001"), &paths).unwrap_err();
        assert!(matches!(err, ServiceError::Store(StoreError::Sqlite(_))));
        assert!(f.store.employee_by_code("E001").unwrap().is_none());
        assert_eq!(archived_files(&f), 0);
        assert!(f.index.is_empty());
    }

    #[test]
    fn test_add_photo() {
        let f = fixture(stub(), 3);
        let paths = images(&f, &["a.png", "b.png", "none.png", "two.png", "c.png"]);
        let result = f.coordinator.enroll(&profile("E001"), &paths[..2]).unwrap();
        assert_eq!(f.index.len(), 2);

        let err = f.coordinator.add_photo("E001", &paths[2]).unwrap_err();
        assert!(matches!(
            err,
            ServiceError::EncodingExtractionFailed(ExtractionFailure::NoFace)
        ));
        let err = f.coordinator.add_photo("E001", &paths[3]).unwrap_err();
        assert!(matches!(
            err,
            ServiceError::EncodingExtractionFailed(ExtractionFailure::MultiFace)
        ));

        let record = f.coordinator.add_photo("E001", &paths[4]).unwrap();
        assert!(!record.is_primary);
        assert_eq!(f.index.len(), 3);

        let err = f.coordinator.add_photo("E001", &paths[4]).unwrap_err();
        assert!(matches!(err, ServiceError::QuotaExceeded { max: 3, .. }));
        assert_eq!(f.store.embedding_count(result.employee_id).unwrap(), 3);
    }

    #[test]
    fn test_add_photo_unknown_or_inactive() {
        let f = fixture(stub(), 5);
        let paths = images(&f, &["a.png", "b.png"]);
        assert!(matches!(
            f.coordinator.add_photo("E404", &paths[0]),
            Err(ServiceError::EmployeeNotFound(_))
        ));

        let result = f.coordinator.enroll(&profile("E001"), &paths[..1]).unwrap();
        f.store
            .set_employee_status(result.employee_id, EmployeeStatus::Inactive)
            .unwrap();
        assert!(matches!(
            f.coordinator.add_photo("E001", &paths[1]),
            Err(ServiceError::EmployeeNotFound(_))
        ));
    }

    #[test]
    fn test_remove_photo_keeps_last_template() {
        let f = fixture(stub(), 5);
        let paths = images(&f, &["a.png", "b.png"]);
        let result = f.coordinator.enroll(&profile("E001"), &paths).unwrap();
        assert_eq!(f.index.len(), 2);
        assert_eq!(archived_files(&f), 2);

        let records = f.store.embeddings_for(result.employee_id).unwrap();
        let removed = f.coordinator.remove_photo(records[0].encoding_id).unwrap();
        assert!(removed.was_primary);
        assert_eq!(f.index.len(), 1);
        assert_eq!(archived_files(&f), 1);
        assert!(f.store.embeddings_for(result.employee_id).unwrap()[0].is_primary);

        let err = f.coordinator.remove_photo(records[1].encoding_id).unwrap_err();
        assert!(matches!(err, ServiceError::LastPhoto { ref code, .. } if code == "E001"));
        assert_eq!(f.index.len(), 1);

        let err = f.coordinator.remove_photo(records[0].encoding_id).unwrap_err();
        assert!(matches!(err, ServiceError::PhotoNotFound(_)));
    }
}
