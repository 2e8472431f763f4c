//! Per-employee, per-day check-in/check-out state machine.
//!
//! ```text
//! NoRecord --check_in--> CheckedIn --check_out--> CheckedOut
//! ```
//!
//! Every transition is decided and written inside one store transaction.
//! Attendance status is fixed at check-in and never re-evaluated.

use crate::error::ServiceError;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rollcall_store::{AttendanceRecord, AttendanceStatus, AttendanceWrite, Store};
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerState {
    NoRecord,
    CheckedIn,
    CheckedOut,
}

impl LedgerState {
    pub fn of(record: Option<&AttendanceRecord>) -> Self {
        match record {
            None => LedgerState::NoRecord,
            Some(r) if r.is_checked_out() => LedgerState::CheckedOut,
            Some(_) => LedgerState::CheckedIn,
        }
    }
}

/// Decides `present` vs `late` for a check-in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LatePolicy {
    work_start: NaiveTime,
    late_threshold_minutes: i64,
}

impl LatePolicy {
    pub fn new(work_start: NaiveTime, late_threshold_minutes: u32) -> Self {
        Self {
            work_start,
            late_threshold_minutes: i64::from(late_threshold_minutes),
        }
    }

    /// Late iff the whole minutes elapsed since work start exceed the
    /// threshold. Seconds within the threshold minute do not count.
    pub fn status_at(&self, check_in: NaiveDateTime) -> AttendanceStatus {
        let time = check_in.time();
        if time > self.work_start
            && time.signed_duration_since(self.work_start).num_minutes() > self.late_threshold_minutes
        {
            AttendanceStatus::Late
        } else {
            AttendanceStatus::Present
        }
    }
}

pub struct AttendanceLedger {
    store: Arc<Store>,
    policy: LatePolicy,
}

impl AttendanceLedger {
    pub fn new(store: Arc<Store>, policy: LatePolicy) -> Self {
        Self { store, policy }
    }

    pub fn policy(&self) -> &LatePolicy {
        &self.policy
    }

    pub fn state(&self, employee_id: i64, date: NaiveDate) -> Result<LedgerState, ServiceError> {
        let record = self.store.attendance_on(employee_id, date)?;
        Ok(LedgerState::of(record.as_ref()))
    }

    pub fn check_in(
        &self,
        employee_id: i64,
        name: &str,
        confidence: f32,
        image_path: Option<String>,
    ) -> Result<AttendanceRecord, ServiceError> {
        self.check_in_at(employee_id, name, confidence, image_path, local_now())
    }

    /// Check in at an explicit local time. `name` labels errors.
    pub fn check_in_at(
        &self,
        employee_id: i64,
        name: &str,
        confidence: f32,
        image_path: Option<String>,
        now: NaiveDateTime,
    ) -> Result<AttendanceRecord, ServiceError> {
        let status = self.policy.status_at(now);
        let record = self
            .store
            .transition_attendance(employee_id, now.date(), |current| {
                match LedgerState::of(current) {
                    LedgerState::NoRecord => Ok(AttendanceWrite::CheckIn {
                        at: now,
                        confidence,
                        image_path,
                        status,
                    }),
                    LedgerState::CheckedIn | LedgerState::CheckedOut => {
                        Err(ServiceError::AlreadyCheckedIn(name.to_string()))
                    }
                }
            })?;

        tracing::info!(employee_id, name, %status, confidence, "checked in");
        Ok(record)
    }

    pub fn check_out(
        &self,
        employee_id: i64,
        name: &str,
        confidence: f32,
        image_path: Option<String>,
    ) -> Result<AttendanceRecord, ServiceError> {
        self.check_out_at(employee_id, name, confidence, image_path, local_now())
    }

    pub fn check_out_at(
        &self,
        employee_id: i64,
        name: &str,
        confidence: f32,
        image_path: Option<String>,
        now: NaiveDateTime,
    ) -> Result<AttendanceRecord, ServiceError> {
        let record = self
            .store
            .transition_attendance(employee_id, now.date(), |current| match current {
                None => Err(ServiceError::NoCheckInFound(name.to_string())),
                Some(r) if r.is_checked_out() => Err(ServiceError::AlreadyCheckedOut(name.to_string())),
                Some(r) => Ok(AttendanceWrite::CheckOut {
                    attendance_id: r.attendance_id,
                    at: now,
                    confidence,
                    image_path,
                }),
            })?;

        tracing::info!(employee_id, name, confidence, "checked out");
        Ok(record)
    }
}

fn local_now() -> NaiveDateTime {
    chrono::Local::now().naive_local()
}
