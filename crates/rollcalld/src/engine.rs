//! Engine thread.
//!
//! The service does blocking work (extractor subprocesses, SQLite), so it
//! lives on a dedicated OS thread. Async callers send it jobs over a bounded
//! channel and await the reply on a oneshot.

use crate::enrollment::EnrollResult;
use crate::error::ServiceError;
use crate::service::{
    AttendanceAction, AttendanceOutcome, AttendanceService, EmployeeDetail, EnrollRequest, ServiceStatus,
};
use chrono::NaiveDate;
use rollcall_core::FaceMatch;
use rollcall_store::{
    AttendanceEntry, AttendanceFilter, DailySummary, DayTrend, EmbeddingRecord, EmployeeSummary,
    RecognitionLogEntry, RemovedEmbedding,
};
use std::path::PathBuf;
use tokio::sync::{mpsc, oneshot};

/// Work for the engine thread. The job sends its own reply.
type Job = Box<dyn FnOnce(&AttendanceService) + Send>;

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<Job>,
}

impl EngineHandle {
    /// Run `f` against the service on the engine thread and wait for it.
    pub async fn call<T, F>(&self, f: F) -> Result<T, ServiceError>
    where
        T: Send + 'static,
        F: FnOnce(&AttendanceService) -> Result<T, ServiceError> + Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        let job: Job = Box::new(move |service: &AttendanceService| {
            let _ = reply_tx.send(f(service));
        });
        self.tx.send(job).await.map_err(|_| ServiceError::ChannelClosed)?;
        reply_rx.await.map_err(|_| ServiceError::ChannelClosed)?
    }

    pub async fn enroll(&self, request: EnrollRequest) -> Result<EnrollResult, ServiceError> {
        self.call(move |s| s.enroll(&request)).await
    }

    pub async fn add_photo(&self, code: String, image: PathBuf) -> Result<EmbeddingRecord, ServiceError> {
        self.call(move |s| s.add_photo(&code, &image)).await
    }

    pub async fn attend(&self, action: AttendanceAction, image: PathBuf) -> Result<AttendanceOutcome, ServiceError> {
        self.call(move |s| match action {
            AttendanceAction::CheckIn => s.check_in(&image),
            AttendanceAction::CheckOut => s.check_out(&image),
        })
        .await
    }

    pub async fn recognize(&self, image: PathBuf) -> Result<Vec<FaceMatch>, ServiceError> {
        self.call(move |s| s.recognize(&image)).await
    }

    pub async fn reload_index(&self) -> Result<usize, ServiceError> {
        self.call(|s| s.reload_index()).await
    }

    pub async fn set_threshold(&self, value: f32) -> Result<(), ServiceError> {
        self.call(move |s| s.set_threshold(value)).await
    }

    pub async fn list_employees(&self) -> Result<Vec<EmployeeSummary>, ServiceError> {
        self.call(|s| s.list_employees()).await
    }

    pub async fn deactivate_employee(&self, code: String) -> Result<(), ServiceError> {
        self.call(move |s| s.deactivate_employee(&code)).await
    }

    pub async fn employee_detail(&self, code: String) -> Result<EmployeeDetail, ServiceError> {
        self.call(move |s| s.employee_detail(&code)).await
    }

    pub async fn remove_photo(&self, encoding_id: i64) -> Result<RemovedEmbedding, ServiceError> {
        self.call(move |s| s.remove_photo(encoding_id)).await
    }

    pub async fn attendance(&self, filter: AttendanceFilter) -> Result<Vec<AttendanceEntry>, ServiceError> {
        self.call(move |s| s.attendance(&filter)).await
    }

    pub async fn daily_summary(&self, date: Option<NaiveDate>) -> Result<DailySummary, ServiceError> {
        self.call(move |s| s.daily_summary(date)).await
    }

    pub async fn attendance_trend(&self, end: Option<NaiveDate>) -> Result<Vec<DayTrend>, ServiceError> {
        self.call(move |s| s.attendance_trend(end)).await
    }

    pub async fn recent_logs(&self, limit: u32) -> Result<Vec<RecognitionLogEntry>, ServiceError> {
        self.call(move |s| s.recent_logs(limit)).await
    }

    pub async fn status(&self) -> Result<ServiceStatus, ServiceError> {
        self.call(|s| Ok(s.status())).await
    }
}

/// Move `service` onto a named engine thread and return a handle to it.
///
/// The thread exits once every handle has been dropped.
pub fn spawn_engine(service: AttendanceService) -> Result<EngineHandle, ServiceError> {
    let (tx, mut rx) = mpsc::channel::<Job>(16);

    std::thread::Builder::new()
        .name("rollcall-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(job) = rx.blocking_recv() {
                job(&service);
            }
            tracing::info!("engine thread exiting");
        })
        .map_err(ServiceError::Spawn)?;

    Ok(EngineHandle { tx })
}
