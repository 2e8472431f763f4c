use crate::model::{AttendanceEntry, AttendanceFilter, AttendanceRecord, AttendanceWrite, DailySummary, DayTrend};
use crate::{Result, Store, StoreError};
use chrono::{Days, NaiveDate};
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};

const RECORD_COLUMNS: &str = "a.attendance_id, a.employee_id, a.attendance_date, \
     a.check_in_time, a.check_in_confidence, a.check_in_image_path, \
     a.check_out_time, a.check_out_confidence, a.check_out_image_path, a.status";

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<AttendanceRecord> {
    Ok(AttendanceRecord {
        attendance_id: row.get(0)?,
        employee_id: row.get(1)?,
        attendance_date: row.get(2)?,
        check_in_time: row.get(3)?,
        check_in_confidence: row.get::<_, Option<f64>>(4)?.map(|c| c as f32),
        check_in_image_path: row.get(5)?,
        check_out_time: row.get(6)?,
        check_out_confidence: row.get::<_, Option<f64>>(7)?.map(|c| c as f32),
        check_out_image_path: row.get(8)?,
        status: row.get(9)?,
    })
}

fn record_on(conn: &Connection, employee_id: i64, date: NaiveDate) -> rusqlite::Result<Option<AttendanceRecord>> {
    let sql = format!(
        "SELECT {RECORD_COLUMNS} FROM attendance_records a
         WHERE a.employee_id = ?1 AND a.attendance_date = ?2"
    );
    conn.query_row(&sql, params![employee_id, date], row_to_record)
        .optional()
}

fn count(conn: &Connection, sql: &str, date: NaiveDate) -> rusqlite::Result<u64> {
    let n: i64 = conn.query_row(sql, params![date], |row| row.get(0))?;
    Ok(u64::try_from(n).unwrap_or(0))
}

impl Store {
    pub fn attendance_on(&self, employee_id: i64, date: NaiveDate) -> Result<Option<AttendanceRecord>> {
        let conn = self.lock()?;
        Ok(record_on(&conn, employee_id, date)?)
    }

    /// Run one attendance state transition for `(employee_id, date)`.
    ///
    /// `decide` sees the day's current record and returns the write to
    /// perform, or an error that aborts the transition. The read, the
    /// decision and the write happen inside one immediate transaction, so two
    /// concurrent check-ins for the same employee and day cannot both
    /// succeed. Returns the record as committed.
    pub fn transition_attendance<E, F>(&self, employee_id: i64, date: NaiveDate, decide: F) -> Result<AttendanceRecord, E>
    where
        E: From<StoreError>,
        F: FnOnce(Option<&AttendanceRecord>) -> Result<AttendanceWrite, E>,
    {
        let mut conn = self.lock()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(StoreError::from)?;

        let current = record_on(&tx, employee_id, date).map_err(StoreError::from)?;
        let write = decide(current.as_ref())?;

        let attendance_id = match write {
            AttendanceWrite::CheckIn {
                at,
                confidence,
                image_path,
                status,
            } => {
                tx.execute(
                    "INSERT INTO attendance_records
                         (employee_id, attendance_date, check_in_time, check_in_confidence,
                          check_in_image_path, status)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![employee_id, date, at, f64::from(confidence), image_path, status],
                )
                .map_err(StoreError::from)?;
                tx.last_insert_rowid()
            }
            AttendanceWrite::CheckOut {
                attendance_id,
                at,
                confidence,
                image_path,
            } => {
                let rows = tx
                    .execute(
                        "UPDATE attendance_records
                         SET check_out_time = ?1, check_out_confidence = ?2, check_out_image_path = ?3
                         WHERE attendance_id = ?4 AND employee_id = ?5
                           AND check_in_time IS NOT NULL AND check_out_time IS NULL",
                        params![at, f64::from(confidence), image_path, attendance_id, employee_id],
                    )
                    .map_err(StoreError::from)?;
                if rows == 0 {
                    return Err(StoreError::Invalid(format!(
                        "attendance record {attendance_id} is not open for check-out"
                    ))
                    .into());
                }
                attendance_id
            }
        };

        let sql = format!("SELECT {RECORD_COLUMNS} FROM attendance_records a WHERE a.attendance_id = ?1");
        let record = tx
            .query_row(&sql, params![attendance_id], row_to_record)
            .map_err(StoreError::from)?;
        tx.commit().map_err(StoreError::from)?;

        Ok(record)
    }

    /// Attendance rows joined with employee identity, newest day first.
    pub fn attendance(&self, filter: &AttendanceFilter) -> Result<Vec<AttendanceEntry>> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {RECORD_COLUMNS}, e.employee_code, e.full_name
             FROM attendance_records a
             JOIN employees e ON e.employee_id = a.employee_id
             WHERE (?1 IS NULL OR a.attendance_date = ?1)
               AND (?2 IS NULL OR a.employee_id = ?2)
               AND (?3 IS NULL OR a.status = ?3)
             ORDER BY a.attendance_date DESC, a.check_in_time DESC, a.attendance_id DESC
             LIMIT ?4 OFFSET ?5"
        );
        // SQLite treats a negative LIMIT as unbounded.
        let limit = filter.limit.map_or(-1, i64::from);
        let offset = filter.offset.map_or(0, i64::from);

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(
            params![filter.date, filter.employee_id, filter.status, limit, offset],
            |row| {
                Ok(AttendanceEntry {
                    record: row_to_record(row)?,
                    employee_code: row.get(10)?,
                    full_name: row.get(11)?,
                })
            },
        )?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Head counts for `date`. Only active employees are counted; absent is
    /// active employees without a record that day.
    pub fn daily_summary(&self, date: NaiveDate) -> Result<DailySummary> {
        let conn = self.lock()?;
        let active: i64 = conn.query_row(
            "SELECT COUNT(*) FROM employees WHERE status = 'active'",
            [],
            |row| row.get(0),
        )?;
        let active_employees = u64::try_from(active).unwrap_or(0);

        const BASE: &str = "SELECT COUNT(*) FROM attendance_records a
             JOIN employees e ON e.employee_id = a.employee_id
             WHERE e.status = 'active' AND a.attendance_date = ?1";
        let checked_in = count(&conn, BASE, date)?;
        let present = count(&conn, &format!("{BASE} AND a.status = 'present'"), date)?;
        let late = count(&conn, &format!("{BASE} AND a.status = 'late'"), date)?;

        Ok(DailySummary {
            date,
            active_employees,
            checked_in,
            present,
            late,
            absent: active_employees.saturating_sub(checked_in),
        })
    }

    /// Per-day counts for the `days` days ending on `end`, oldest first.
    /// Days without records are included with zero counts. Records of
    /// since-deactivated employees still count toward their days.
    pub fn attendance_trend(&self, end: NaiveDate, days: u32) -> Result<Vec<DayTrend>> {
        if days == 0 {
            return Ok(Vec::new());
        }
        let start = end
            .checked_sub_days(Days::new(u64::from(days - 1)))
            .ok_or_else(|| StoreError::Invalid(format!("{days} days before {end} is out of range")))?;

        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT attendance_date,
                    COUNT(*),
                    SUM(CASE WHEN status = 'present' THEN 1 ELSE 0 END),
                    SUM(CASE WHEN status = 'late' THEN 1 ELSE 0 END)
             FROM attendance_records
             WHERE attendance_date BETWEEN ?1 AND ?2
             GROUP BY attendance_date",
        )?;
        let rows = stmt.query_map(params![start, end], |row| {
            Ok((
                row.get::<_, NaiveDate>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, i64>(3)?,
            ))
        })?;
        let mut counted = std::collections::HashMap::new();
        for row in rows {
            let (date, total, present, late) = row?;
            counted.insert(date, (total, present, late));
        }

        let as_count = |n: i64| u64::try_from(n).unwrap_or(0);
        Ok(start
            .iter_days()
            .take(days as usize)
            .map(|date| {
                let (total, present, late) = counted.get(&date).copied().unwrap_or_default();
                DayTrend {
                    date,
                    total: as_count(total),
                    present: as_count(present),
                    late: as_count(late),
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use crate::testutil::enroll;
    use crate::*;
    use chrono::{NaiveDate, NaiveDateTime};

    #[derive(Debug, thiserror::Error)]
    enum TestError {
        #[error("store: {0}")]
        Store(#[from] StoreError),
        #[error("already checked in")]
        AlreadyCheckedIn,
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 4).unwrap()
    }

    fn at(h: u32, m: u32) -> NaiveDateTime {
        day().and_hms_opt(h, m, 0).unwrap()
    }

    fn check_in(
        store: &Store,
        employee_id: i64,
        when: NaiveDateTime,
        status: AttendanceStatus,
    ) -> Result<AttendanceRecord, TestError> {
        store.transition_attendance(employee_id, when.date(), |current| match current {
            Some(_) => Err(TestError::AlreadyCheckedIn),
            None => Ok(AttendanceWrite::CheckIn {
                at: when,
                confidence: 0.82,
                image_path: Some("attendance/in.jpg".to_string()),
                status,
            }),
        })
    }

    #[test]
    fn test_check_in_creates_record() {
        let store = Store::open_in_memory().unwrap();
        let id = enroll(&store, "E001", "Ada");

        let record = check_in(&store, id, at(9, 5), AttendanceStatus::Present).unwrap();
        assert_eq!(record.attendance_date, day());
        assert_eq!(record.check_in_time, Some(at(9, 5)));
        assert!((record.check_in_confidence.unwrap() - 0.82).abs() < 1e-6);
        assert!(!record.is_checked_out());
        assert_eq!(store.attendance_on(id, day()).unwrap(), Some(record));
    }

    #[test]
    fn test_decide_error_aborts_without_write() {
        let store = Store::open_in_memory().unwrap();
        let id = enroll(&store, "E001", "Ada");
        check_in(&store, id, at(9, 0), AttendanceStatus::Present).unwrap();

        let err = check_in(&store, id, at(9, 30), AttendanceStatus::Late).unwrap_err();
        assert!(matches!(err, TestError::AlreadyCheckedIn));

        let record = store.attendance_on(id, day()).unwrap().unwrap();
        assert_eq!(record.check_in_time, Some(at(9, 0)));
        assert_eq!(record.status, AttendanceStatus::Present);
    }

    #[test]
    fn test_check_out_fills_record() {
        let store = Store::open_in_memory().unwrap();
        let id = enroll(&store, "E001", "Ada");
        let opened = check_in(&store, id, at(8, 55), AttendanceStatus::Present).unwrap();

        let closed = store
            .transition_attendance::<StoreError, _>(id, day(), |current| {
                let current = current.expect("record exists");
                Ok(AttendanceWrite::CheckOut {
                    attendance_id: current.attendance_id,
                    at: at(17, 30),
                    confidence: 0.75,
                    image_path: None,
                })
            })
            .unwrap();
        assert_eq!(closed.attendance_id, opened.attendance_id);
        assert_eq!(closed.check_out_time, Some(at(17, 30)));
        assert_eq!(closed.check_in_time, opened.check_in_time);
    }

    #[test]
    fn test_second_check_out_rejected_by_store() {
        let store = Store::open_in_memory().unwrap();
        let id = enroll(&store, "E001", "Ada");
        let opened = check_in(&store, id, at(9, 0), AttendanceStatus::Present).unwrap();
        let write = AttendanceWrite::CheckOut {
            attendance_id: opened.attendance_id,
            at: at(17, 0),
            confidence: 0.7,
            image_path: None,
        };

        store
            .transition_attendance::<StoreError, _>(id, day(), |_| Ok(write.clone()))
            .unwrap();
        let err = store
            .transition_attendance::<StoreError, _>(id, day(), |_| Ok(write.clone()))
            .unwrap_err();
        assert!(matches!(err, StoreError::Invalid(_)));
    }

    #[test]
    fn test_unique_day_enforced_by_schema() {
        let store = Store::open_in_memory().unwrap();
        let id = enroll(&store, "E001", "Ada");
        let write = AttendanceWrite::CheckIn {
            at: at(9, 0),
            confidence: 0.9,
            image_path: None,
            status: AttendanceStatus::Present,
        };
        store
            .transition_attendance::<StoreError, _>(id, day(), |_| Ok(write.clone()))
            .unwrap();
        // A decider that ignores the current record still cannot double-insert.
        let err = store
            .transition_attendance::<StoreError, _>(id, day(), |_| Ok(write.clone()))
            .unwrap_err();
        assert!(matches!(err, StoreError::Sqlite(_)));
    }

    #[test]
    fn test_concurrent_check_ins_single_winner() {
        let store = std::sync::Arc::new(Store::open_in_memory().unwrap());
        let id = enroll(&store, "E001", "Ada");

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = std::sync::Arc::clone(&store);
                std::thread::spawn(move || check_in(&store, id, at(9, 0), AttendanceStatus::Present).is_ok())
            })
            .collect();
        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(winners, 1);
    }

    #[test]
    fn test_attendance_filters() {
        let store = Store::open_in_memory().unwrap();
        let ada = enroll(&store, "E001", "Ada");
        let bob = enroll(&store, "E002", "Bob");
        check_in(&store, ada, at(9, 0), AttendanceStatus::Present).unwrap();
        check_in(&store, bob, at(9, 40), AttendanceStatus::Late).unwrap();
        let next_day = NaiveDate::from_ymd_opt(2024, 3, 5).unwrap().and_hms_opt(8, 50, 0).unwrap();
        check_in(&store, ada, next_day, AttendanceStatus::Present).unwrap();

        let all = store.attendance(&AttendanceFilter::default()).unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].record.attendance_date, next_day.date());

        let late = store
            .attendance(&AttendanceFilter {
                status: Some(AttendanceStatus::Late),
                ..AttendanceFilter::default()
            })
            .unwrap();
        assert_eq!(late.len(), 1);
        assert_eq!(late[0].employee_code, "E002");

        let ada_only = store
            .attendance(&AttendanceFilter {
                employee_id: Some(ada),
                ..AttendanceFilter::default()
            })
            .unwrap();
        assert_eq!(ada_only.len(), 2);

        let on_day = store
            .attendance(&AttendanceFilter {
                date: Some(day()),
                limit: Some(1),
                offset: Some(1),
                ..AttendanceFilter::default()
            })
            .unwrap();
        assert_eq!(on_day.len(), 1);
        assert_eq!(on_day[0].full_name, "Ada");
    }

    #[test]
    fn test_daily_summary() {
        let store = Store::open_in_memory().unwrap();
        let ada = enroll(&store, "E001", "Ada");
        let bob = enroll(&store, "E002", "Bob");
        enroll(&store, "E003", "Cy");
        let gone = enroll(&store, "E004", "Dee");
        check_in(&store, ada, at(9, 0), AttendanceStatus::Present).unwrap();
        check_in(&store, bob, at(9, 20), AttendanceStatus::Late).unwrap();
        check_in(&store, gone, at(9, 0), AttendanceStatus::Present).unwrap();
        store.set_employee_status(gone, EmployeeStatus::Inactive).unwrap();

        let summary = store.daily_summary(day()).unwrap();
        assert_eq!(summary.active_employees, 3);
        assert_eq!(summary.checked_in, 2);
        assert_eq!(summary.present, 1);
        assert_eq!(summary.late, 1);
        assert_eq!(summary.absent, 1);
    }

    #[test]
    fn test_attendance_trend_fills_empty_days() {
        let store = Store::open_in_memory().unwrap();
        let ada = enroll(&store, "E001", "Ada");
        let bob = enroll(&store, "E002", "Bob");
        let earlier = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        check_in(&store, ada, earlier.and_hms_opt(9, 0, 0).unwrap(), AttendanceStatus::Present).unwrap();
        check_in(&store, ada, at(9, 0), AttendanceStatus::Present).unwrap();
        check_in(&store, bob, at(9, 40), AttendanceStatus::Late).unwrap();
        // Outside the window.
        let too_old = NaiveDate::from_ymd_opt(2024, 2, 20).unwrap();
        check_in(&store, bob, too_old.and_hms_opt(9, 0, 0).unwrap(), AttendanceStatus::Late).unwrap();

        let trend = store.attendance_trend(day(), 7).unwrap();
        assert_eq!(trend.len(), 7);
        assert_eq!(trend[0].date, NaiveDate::from_ymd_opt(2024, 2, 27).unwrap());
        assert_eq!(trend[6].date, day());

        let friday = trend.iter().find(|d| d.date == earlier).unwrap();
        assert_eq!((friday.total, friday.present, friday.late), (1, 1, 0));
        assert_eq!((trend[6].total, trend[6].present, trend[6].late), (2, 1, 1));
        let total: u64 = trend.iter().map(|d| d.total).sum();
        assert_eq!(total, 3);

        assert!(store.attendance_trend(day(), 0).unwrap().is_empty());
    }
}
