use crate::engine::EngineHandle;
use crate::error::ServiceError;
use crate::service::{AttendanceAction, EnrollRequest};
use chrono::NaiveDate;
use rollcall_store::AttendanceFilter;
use serde::Serialize;
use std::path::PathBuf;
use zbus::interface;

pub const BUS_NAME: &str = "org.rollcall.Attendance1";
pub const OBJECT_PATH: &str = "/org/rollcall/Attendance1";

/// D-Bus interface for the attendance daemon.
///
/// Bus name: org.rollcall.Attendance1
/// Object path: /org/rollcall/Attendance1
///
/// Structured results are returned as JSON strings. Failures carry the
/// error kind as a prefix, e.g. `already_checked_in: Ada has already ...`.
pub struct AttendanceBus {
    engine: EngineHandle,
}

impl AttendanceBus {
    pub fn new(engine: EngineHandle) -> Self {
        Self { engine }
    }
}

#[interface(name = "org.rollcall.Attendance1")]
impl AttendanceBus {
    /// Enroll a new employee. `request` is a JSON object with the profile
    /// fields and an `images` array of file paths.
    async fn enroll(&self, request: &str) -> zbus::fdo::Result<String> {
        let request: EnrollRequest = parse_json(request)?;
        tracing::info!(code = %request.profile.employee_code, images = request.images.len(), "enroll requested");
        to_json(self.engine.enroll(request).await)
    }

    /// Add one photo to an existing employee.
    async fn add_photo(&self, code: &str, image: &str) -> zbus::fdo::Result<String> {
        tracing::info!(code, image, "add_photo requested");
        to_json(self.engine.add_photo(code.to_string(), PathBuf::from(image)).await)
    }

    async fn check_in(&self, image: &str) -> zbus::fdo::Result<String> {
        tracing::info!(image, "check_in requested");
        to_json(self.engine.attend(AttendanceAction::CheckIn, PathBuf::from(image)).await)
    }

    async fn check_out(&self, image: &str) -> zbus::fdo::Result<String> {
        tracing::info!(image, "check_out requested");
        to_json(self.engine.attend(AttendanceAction::CheckOut, PathBuf::from(image)).await)
    }

    /// Match every face in an image without recording attendance.
    async fn recognize(&self, image: &str) -> zbus::fdo::Result<String> {
        to_json(self.engine.recognize(PathBuf::from(image)).await)
    }

    /// Rebuild the embedding index from the database. Returns the vector count.
    async fn reload_index(&self) -> zbus::fdo::Result<u32> {
        let count = self.engine.reload_index().await.map_err(to_fdo)?;
        Ok(u32::try_from(count).unwrap_or(u32::MAX))
    }

    async fn set_threshold(&self, value: f64) -> zbus::fdo::Result<()> {
        tracing::info!(value, "set_threshold requested");
        self.engine.set_threshold(value as f32).await.map_err(to_fdo)
    }

    async fn list_employees(&self) -> zbus::fdo::Result<String> {
        to_json(self.engine.list_employees().await)
    }

    async fn deactivate_employee(&self, code: &str) -> zbus::fdo::Result<()> {
        tracing::info!(code, "deactivate_employee requested");
        self.engine
            .deactivate_employee(code.to_string())
            .await
            .map_err(to_fdo)
    }

    /// Profile, stored photos and recent attendance of one employee.
    async fn employee_detail(&self, code: &str) -> zbus::fdo::Result<String> {
        to_json(self.engine.employee_detail(code.to_string()).await)
    }

    /// Delete one stored face photo by its encoding id.
    async fn remove_photo(&self, encoding_id: i64) -> zbus::fdo::Result<String> {
        tracing::info!(encoding_id, "remove_photo requested");
        to_json(self.engine.remove_photo(encoding_id).await)
    }

    /// Attendance records. `filter` is a JSON object with optional `date`,
    /// `employee_id`, `status`, `limit` and `offset`; empty means no filter.
    async fn attendance(&self, filter: &str) -> zbus::fdo::Result<String> {
        let filter: AttendanceFilter = if filter.trim().is_empty() {
            AttendanceFilter::default()
        } else {
            parse_json(filter)?
        };
        to_json(self.engine.attendance(filter).await)
    }

    /// Head counts for `date` (YYYY-MM-DD); empty means today.
    async fn daily_summary(&self, date: &str) -> zbus::fdo::Result<String> {
        to_json(self.engine.daily_summary(parse_date(date)?).await)
    }

    /// Seven days of attendance counts ending on `date`; empty means today.
    async fn weekly_trend(&self, date: &str) -> zbus::fdo::Result<String> {
        to_json(self.engine.attendance_trend(parse_date(date)?).await)
    }

    async fn recent_logs(&self, limit: u32) -> zbus::fdo::Result<String> {
        to_json(self.engine.recent_logs(limit).await)
    }

    /// Return daemon status information.
    async fn status(&self) -> zbus::fdo::Result<String> {
        to_json(self.engine.status().await)
    }
}

fn to_fdo(e: ServiceError) -> zbus::fdo::Error {
    match e {
        ServiceError::Validation(_) => zbus::fdo::Error::InvalidArgs(e.to_string()),
        other => {
            tracing::warn!(kind = other.kind(), error = %other, "request failed");
            zbus::fdo::Error::Failed(format!("{}: {}", other.kind(), other))
        }
    }
}

fn to_json<T: Serialize>(result: Result<T, ServiceError>) -> zbus::fdo::Result<String> {
    let value = result.map_err(to_fdo)?;
    serde_json::to_string(&value).map_err(|e| zbus::fdo::Error::Failed(format!("serialization failed: {e}")))
}

/// `YYYY-MM-DD`, or `None` for an empty string.
fn parse_date(raw: &str) -> zbus::fdo::Result<Option<NaiveDate>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map(Some)
        .map_err(|e| zbus::fdo::Error::InvalidArgs(format!("date {raw:?}: {e}")))
}

fn parse_json<T: serde::de::DeserializeOwned>(raw: &str) -> zbus::fdo::Result<T> {
    serde_json::from_str(raw).map_err(|e| zbus::fdo::Error::InvalidArgs(format!("malformed JSON: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_maps_to_invalid_args() {
        match to_fdo(ServiceError::Validation("threshold must be within [0, 1]".into())) {
            zbus::fdo::Error::InvalidArgs(msg) => assert!(msg.contains("threshold")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_domain_errors_carry_kind_prefix() {
        match to_fdo(ServiceError::AlreadyCheckedIn("Ada".into())) {
            zbus::fdo::Error::Failed(msg) => {
                assert_eq!(msg, "already_checked_in: Ada has already checked in today")
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_to_json_success() {
        let json = to_json::<Vec<u32>>(Ok(vec![1, 2])).unwrap();
        assert_eq!(json, "[1,2]");
    }

    #[test]
    fn test_parse_json_rejects_garbage() {
        let err = parse_json::<AttendanceFilter>("{not json").unwrap_err();
        assert!(matches!(err, zbus::fdo::Error::InvalidArgs(_)));
        let filter: AttendanceFilter = parse_json(r#"{"status": "late", "limit": 10}"#).unwrap();
        assert_eq!(filter.limit, Some(10));
    }

    #[test]
    fn test_parse_date() {
        assert_eq!(parse_date("  ").unwrap(), None);
        assert_eq!(parse_date("2024-03-04").unwrap(), NaiveDate::from_ymd_opt(2024, 3, 4));
        assert!(matches!(parse_date("04/03/2024"), Err(zbus::fdo::Error::InvalidArgs(_))));
    }
}
