//! The attendance service context.
//!
//! Owns the store, the embedding index, the matcher and the extractor, and
//! exposes every caller-facing operation as a blocking method. The daemon
//! runs it on the engine thread.

use crate::archive::{ImageArchive, ImageKind};
use crate::config::Config;
use crate::enrollment::{EnrollResult, EnrollmentCoordinator};
use crate::error::ServiceError;
use crate::ledger::{AttendanceLedger, LatePolicy};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rollcall_core::{
    Candidate, CommandExtractor, EmbeddingIndex, FaceMatch, FeatureExtractor, MatchResult, Matcher,
    QualityScorer, SourceImage,
};
use rollcall_store::{
    AttendanceEntry, AttendanceFilter, AttendanceRecord, DailySummary, DayTrend, EmbeddingRecord,
    Employee, EmployeeStatus, EmployeeSummary, NewEmployee, NewRecognitionLog, RecognitionLogEntry,
    RecognitionStatus, RemovedEmbedding, Store,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

/// Enrollment request as received from a client.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EnrollRequest {
    #[serde(flatten)]
    pub profile: NewEmployee,
    pub images: Vec<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttendanceAction {
    CheckIn,
    CheckOut,
}

/// A completed check-in or check-out.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttendanceOutcome {
    pub action: AttendanceAction,
    pub employee_code: String,
    pub full_name: String,
    pub confidence: f32,
    pub record: AttendanceRecord,
}

/// Most recent attendance records returned with an employee's details.
const DETAIL_HISTORY: u32 = 30;

/// Length of the attendance trend series.
const TREND_DAYS: u32 = 7;

/// Profile, stored photos and recent attendance of one employee.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmployeeDetail {
    pub employee: Employee,
    pub photos: Vec<EmbeddingRecord>,
    pub attendance: Vec<AttendanceEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceStatus {
    pub version: &'static str,
    pub db_path: Option<PathBuf>,
    pub extractor: String,
    pub indexed_vectors: usize,
    pub index_generation: u64,
    pub embedding_dim: Option<usize>,
    pub threshold: f32,
    pub max_faces_per_employee: usize,
    pub work_start: NaiveTime,
    pub late_threshold_minutes: u32,
}

pub struct AttendanceService {
    config: Config,
    store: Arc<Store>,
    index: Arc<EmbeddingIndex>,
    matcher: Matcher,
    extractor: Arc<dyn FeatureExtractor>,
    archive: ImageArchive,
    enrollment: EnrollmentCoordinator,
    ledger: AttendanceLedger,
}

impl AttendanceService {
    /// Open the configured database and extractor command, then load the index.
    pub fn open(config: Config) -> Result<Self, ServiceError> {
        let store = Arc::new(Store::open(&config.db_path)?);
        let extractor = CommandExtractor::from_command_line(&config.extractor_command, config.embedding_dim)
            .ok_or_else(|| ServiceError::Validation("extractor_command is empty".into()))?;
        tracing::info!(program = %extractor.program().display(), dim = config.embedding_dim, "feature extractor configured");
        Self::new(config, store, Arc::new(extractor))
    }

    pub fn new(
        config: Config,
        store: Arc<Store>,
        extractor: Arc<dyn FeatureExtractor>,
    ) -> Result<Self, ServiceError> {
        let index = Arc::new(EmbeddingIndex::new());
        index.load(store.as_ref())?;
        let matcher = Matcher::new(Arc::clone(&index), config.recognition_threshold)?;
        let archive = ImageArchive::new(&config.image_dir);
        let enrollment = EnrollmentCoordinator::new(
            Arc::clone(&store),
            Arc::clone(&index),
            Arc::clone(&extractor),
            QualityScorer::new(config.quality),
            archive.clone(),
            config.max_faces_per_employee,
        );
        let ledger = AttendanceLedger::new(
            Arc::clone(&store),
            LatePolicy::new(config.work_start, config.late_threshold_minutes),
        );

        Ok(Self {
            config,
            store,
            index,
            matcher,
            extractor,
            archive,
            enrollment,
            ledger,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn enroll(&self, request: &EnrollRequest) -> Result<EnrollResult, ServiceError> {
        let (min, max) = (self.config.min_enroll_photos, self.config.max_faces_per_employee);
        if !(min..=max).contains(&request.images.len()) {
            return Err(ServiceError::Validation(format!(
                "enrollment needs {min} to {max} photos, got {}",
                request.images.len()
            )));
        }
        self.enrollment.enroll(&request.profile, &request.images)
    }

    pub fn add_photo(&self, code: &str, image: &Path) -> Result<EmbeddingRecord, ServiceError> {
        self.enrollment.add_photo(code, image)
    }

    pub fn check_in(&self, image: &Path) -> Result<AttendanceOutcome, ServiceError> {
        self.attend(AttendanceAction::CheckIn, image, None)
    }

    pub fn check_out(&self, image: &Path) -> Result<AttendanceOutcome, ServiceError> {
        self.attend(AttendanceAction::CheckOut, image, None)
    }

    /// Check in or out at an explicit local time.
    pub fn attend_at(
        &self,
        action: AttendanceAction,
        image: &Path,
        now: NaiveDateTime,
    ) -> Result<AttendanceOutcome, ServiceError> {
        self.attend(action, image, Some(now))
    }

    /// Match every face in `image` without touching the ledger.
    pub fn recognize(&self, image: &Path) -> Result<Vec<FaceMatch>, ServiceError> {
        let started = Instant::now();
        let source = SourceImage::open(image)?;
        let matches = self.matcher.process_frame(self.extractor.as_ref(), &source)?;

        let (status, employee_id, name, confidence) = match matches.as_slice() {
            [] => (RecognitionStatus::Failed, None, "Unknown".to_string(), 0.0),
            [one] => match &one.result {
                MatchResult::Recognized(c) => {
                    (RecognitionStatus::Success, Some(c.employee_id), c.full_name.clone(), c.confidence)
                }
                other => (RecognitionStatus::UnknownFace, None, "Unknown".to_string(), other.confidence()),
            },
            many => (RecognitionStatus::MultipleFaces, None, "Multiple".to_string(), best_confidence(many)),
        };
        self.log_attempt(status, employee_id, name, confidence, None, started);
        Ok(matches)
    }

    pub fn reload_index(&self) -> Result<usize, ServiceError> {
        Ok(self.index.load(self.store.as_ref())?)
    }

    pub fn set_threshold(&self, value: f32) -> Result<(), ServiceError> {
        Ok(self.matcher.set_threshold(value)?)
    }

    pub fn list_employees(&self) -> Result<Vec<EmployeeSummary>, ServiceError> {
        Ok(self.store.list_employees(Some(EmployeeStatus::Active))?)
    }

    /// Mark an employee inactive and drop their templates from the index.
    pub fn deactivate_employee(&self, code: &str) -> Result<(), ServiceError> {
        let employee = self
            .store
            .employee_by_code(code)?
            .filter(|e| e.is_active())
            .ok_or_else(|| ServiceError::EmployeeNotFound(code.to_string()))?;
        self.store
            .set_employee_status(employee.employee_id, EmployeeStatus::Inactive)?;
        self.reload_index()?;
        Ok(())
    }

    /// Details for any employee, active or not. Photos are oldest first,
    /// attendance newest first.
    pub fn employee_detail(&self, code: &str) -> Result<EmployeeDetail, ServiceError> {
        let employee = self
            .store
            .employee_by_code(code)?
            .ok_or_else(|| ServiceError::EmployeeNotFound(code.to_string()))?;
        let photos = self.store.embeddings_for(employee.employee_id)?;
        let attendance = self.store.attendance(&AttendanceFilter {
            employee_id: Some(employee.employee_id),
            limit: Some(DETAIL_HISTORY),
            ..AttendanceFilter::default()
        })?;
        Ok(EmployeeDetail {
            employee,
            photos,
            attendance,
        })
    }

    pub fn remove_photo(&self, encoding_id: i64) -> Result<RemovedEmbedding, ServiceError> {
        self.enrollment.remove_photo(encoding_id)
    }

    pub fn attendance(&self, filter: &AttendanceFilter) -> Result<Vec<AttendanceEntry>, ServiceError> {
        Ok(self.store.attendance(filter)?)
    }

    /// Summary for `date`, or today.
    pub fn daily_summary(&self, date: Option<NaiveDate>) -> Result<DailySummary, ServiceError> {
        let date = date.unwrap_or_else(|| chrono::Local::now().date_naive());
        Ok(self.store.daily_summary(date)?)
    }

    /// Seven days of attendance counts ending on `end`, or today.
    pub fn attendance_trend(&self, end: Option<NaiveDate>) -> Result<Vec<DayTrend>, ServiceError> {
        let end = end.unwrap_or_else(|| chrono::Local::now().date_naive());
        Ok(self.store.attendance_trend(end, TREND_DAYS)?)
    }

    pub fn recent_logs(&self, limit: u32) -> Result<Vec<RecognitionLogEntry>, ServiceError> {
        Ok(self.store.recent_logs(limit)?)
    }

    pub fn status(&self) -> ServiceStatus {
        let snapshot = self.index.snapshot();
        ServiceStatus {
            version: env!("CARGO_PKG_VERSION"),
            db_path: self.store.path().map(Path::to_path_buf),
            extractor: self.extractor.name().to_string(),
            indexed_vectors: snapshot.len(),
            index_generation: snapshot.generation(),
            embedding_dim: snapshot.dimension(),
            threshold: self.matcher.threshold(),
            max_faces_per_employee: self.config.max_faces_per_employee,
            work_start: self.config.work_start,
            late_threshold_minutes: self.config.late_threshold_minutes,
        }
    }

    fn attend(
        &self,
        action: AttendanceAction,
        image: &Path,
        at: Option<NaiveDateTime>,
    ) -> Result<AttendanceOutcome, ServiceError> {
        let started = Instant::now();
        let candidate = self.identify(image, started)?;
        let now = at.unwrap_or_else(|| chrono::Local::now().naive_local());

        let kind = match action {
            AttendanceAction::CheckIn => ImageKind::CheckIn,
            AttendanceAction::CheckOut => ImageKind::CheckOut,
        };
        // The image reference is optional on the record; an archive failure
        // does not cancel a recognized attempt.
        let image_ref = match self.archive.store(image, kind, &candidate.employee_code, now) {
            Ok(reference) => Some(reference),
            Err(e) => {
                tracing::warn!(error = %e, image = %image.display(), "failed to archive attendance image");
                None
            }
        };

        let id = candidate.employee_id;
        let name = candidate.full_name.as_str();
        let conf = candidate.confidence;
        let result = match action {
            AttendanceAction::CheckIn => self.ledger.check_in_at(id, name, conf, image_ref.clone(), now),
            AttendanceAction::CheckOut => self.ledger.check_out_at(id, name, conf, image_ref.clone(), now),
        };

        let logged_ref = match &result {
            Ok(_) => image_ref,
            Err(_) => {
                self.archive.discard(image_ref.as_deref());
                None
            }
        };
        self.log_attempt(
            RecognitionStatus::Success,
            Some(id),
            candidate.full_name.clone(),
            conf,
            logged_ref,
            started,
        );

        Ok(AttendanceOutcome {
            action,
            employee_code: candidate.employee_code,
            full_name: candidate.full_name,
            confidence: conf,
            record: result?,
        })
    }

    /// Exactly one recognized face, or the matching rejection. Rejections
    /// are written to the recognition log here.
    fn identify(&self, image: &Path, started: Instant) -> Result<Candidate, ServiceError> {
        let source = SourceImage::open(image)?;
        let mut matches = match self.matcher.process_frame(self.extractor.as_ref(), &source) {
            Ok(matches) => matches,
            Err(e) => {
                self.log_attempt(RecognitionStatus::Failed, None, "Unknown".into(), 0.0, None, started);
                return Err(e.into());
            }
        };

        match matches.len() {
            0 => {
                self.log_attempt(RecognitionStatus::Failed, None, "Unknown".into(), 0.0, None, started);
                Err(ServiceError::NoFaceDetected)
            }
            1 => match matches.remove(0).result {
                MatchResult::Recognized(candidate) => Ok(candidate),
                other => {
                    let confidence = other.confidence();
                    self.log_attempt(
                        RecognitionStatus::UnknownFace,
                        None,
                        "Unknown".into(),
                        confidence,
                        None,
                        started,
                    );
                    Err(ServiceError::UnrecognizedFace(confidence))
                }
            },
            n => {
                let confidence = best_confidence(&matches);
                self.log_attempt(RecognitionStatus::MultipleFaces, None, "Multiple".into(), confidence, None, started);
                Err(ServiceError::MultipleFacesDetected(n))
            }
        }
    }

    /// Append to the recognition log. A failed write never fails the attempt.
    fn log_attempt(
        &self,
        status: RecognitionStatus,
        employee_id: Option<i64>,
        recognized_name: String,
        confidence: f32,
        image_path: Option<String>,
        started: Instant,
    ) {
        let entry = NewRecognitionLog {
            employee_id,
            recognized_name,
            confidence,
            image_path,
            status,
            processing_time_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        };
        if let Err(e) = self.store.log_recognition(&entry) {
            tracing::warn!(error = %e, %status, "failed to write recognition log");
        }
    }
}

/// Highest confidence among several detected faces.
fn best_confidence(matches: &[FaceMatch]) -> f32 {
    matches
        .iter()
        .map(|m| m.result.confidence())
        .fold(f32::NEG_INFINITY, f32::max)
}
