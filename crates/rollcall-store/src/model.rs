//! Row types for the attendance database.

use chrono::{NaiveDate, NaiveDateTime};
use rollcall_core::Embedding;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, thiserror::Error)]
#[error("unknown {kind} value: {value:?}")]
pub struct UnknownVariant {
    kind: &'static str,
    value: String,
}

/// Implements `as_str`, `Display`, `FromStr` and the SQLite conversions for a
/// fieldless enum stored as TEXT.
macro_rules! text_enum {
    ($ty:ident, $kind:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $ty {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($ty::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($ty::$variant),)+
                    other => Err(UnknownVariant {
                        kind: $kind,
                        value: other.to_string(),
                    }),
                }
            }
        }

        impl ToSql for $ty {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.as_str()))
            }
        }

        impl FromSql for $ty {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                value
                    .as_str()?
                    .parse()
                    .map_err(|e| FromSqlError::Other(Box::new(e)))
            }
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmployeeStatus {
    Active,
    Inactive,
}

text_enum!(EmployeeStatus, "employee status", {
    Active => "active",
    Inactive => "inactive",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttendanceStatus {
    Present,
    Late,
}

text_enum!(AttendanceStatus, "attendance status", {
    Present => "present",
    Late => "late",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecognitionStatus {
    Success,
    UnknownFace,
    MultipleFaces,
    Failed,
}

text_enum!(RecognitionStatus, "recognition status", {
    Success => "success",
    UnknownFace => "unknown_face",
    MultipleFaces => "multiple_faces",
    Failed => "failed",
});

/// Profile fields supplied at enrollment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewEmployee {
    pub employee_code: String,
    pub full_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub department: Option<String>,
    pub position: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Employee {
    pub employee_id: i64,
    pub employee_code: String,
    pub full_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub department: Option<String>,
    pub position: Option<String>,
    pub status: EmployeeStatus,
    pub created_at: NaiveDateTime,
}

impl Employee {
    pub fn is_active(&self) -> bool {
        self.status == EmployeeStatus::Active
    }
}

/// An employee with the number of stored face embeddings.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmployeeSummary {
    #[serde(flatten)]
    pub employee: Employee,
    pub embedding_count: usize,
}

/// An embedding ready to be persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct NewEmbedding {
    pub embedding: Embedding,
    pub image_path: String,
    pub quality_score: f32,
    pub is_primary: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmbeddingRecord {
    pub encoding_id: i64,
    pub employee_id: i64,
    #[serde(skip)]
    pub embedding: Embedding,
    pub image_path: String,
    pub quality_score: f32,
    pub is_primary: bool,
    pub created_at: NaiveDateTime,
}

/// What [`Store::remove_embedding`](crate::Store::remove_embedding) deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemovedEmbedding {
    pub encoding_id: i64,
    pub employee_id: i64,
    pub image_path: String,
    pub was_primary: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttendanceRecord {
    pub attendance_id: i64,
    pub employee_id: i64,
    pub attendance_date: NaiveDate,
    pub check_in_time: Option<NaiveDateTime>,
    pub check_in_confidence: Option<f32>,
    pub check_in_image_path: Option<String>,
    pub check_out_time: Option<NaiveDateTime>,
    pub check_out_confidence: Option<f32>,
    pub check_out_image_path: Option<String>,
    pub status: AttendanceStatus,
}

impl AttendanceRecord {
    pub fn is_checked_in(&self) -> bool {
        self.check_in_time.is_some()
    }

    pub fn is_checked_out(&self) -> bool {
        self.check_out_time.is_some()
    }
}

/// Attendance record joined with the employee's code and name.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttendanceEntry {
    #[serde(flatten)]
    pub record: AttendanceRecord,
    pub employee_code: String,
    pub full_name: String,
}

/// The single write an attendance transition performs.
#[derive(Debug, Clone, PartialEq)]
pub enum AttendanceWrite {
    /// Create the day's record with check-in fields.
    CheckIn {
        at: NaiveDateTime,
        confidence: f32,
        image_path: Option<String>,
        status: AttendanceStatus,
    },
    /// Fill the check-out fields of an existing record.
    CheckOut {
        attendance_id: i64,
        at: NaiveDateTime,
        confidence: f32,
        image_path: Option<String>,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AttendanceFilter {
    pub date: Option<NaiveDate>,
    pub employee_id: Option<i64>,
    pub status: Option<AttendanceStatus>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

/// Head counts for one day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DailySummary {
    pub date: NaiveDate,
    pub active_employees: u64,
    pub checked_in: u64,
    pub present: u64,
    pub late: u64,
    pub absent: u64,
}

/// Attendance counts for one day of a trend series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DayTrend {
    pub date: NaiveDate,
    pub total: u64,
    pub present: u64,
    pub late: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewRecognitionLog {
    pub employee_id: Option<i64>,
    pub recognized_name: String,
    pub confidence: f32,
    pub image_path: Option<String>,
    pub status: RecognitionStatus,
    pub processing_time_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecognitionLogEntry {
    pub log_id: i64,
    pub timestamp: NaiveDateTime,
    pub employee_id: Option<i64>,
    pub recognized_name: String,
    pub confidence: f32,
    pub image_path: Option<String>,
    pub status: RecognitionStatus,
    pub processing_time_ms: u64,
}
