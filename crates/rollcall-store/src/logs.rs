use crate::model::{NewRecognitionLog, RecognitionLogEntry};
use crate::{now, Result, Store};
use rusqlite::params;

impl Store {
    /// Append one recognition attempt. Log rows are never updated.
    pub fn log_recognition(&self, entry: &NewRecognitionLog) -> Result<i64> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO recognition_logs
                 (timestamp, employee_id, recognized_name, confidence_score, image_path,
                  recognition_status, processing_time_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                now(),
                entry.employee_id,
                entry.recognized_name,
                f64::from(entry.confidence),
                entry.image_path,
                entry.status,
                i64::try_from(entry.processing_time_ms).unwrap_or(i64::MAX),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// The newest `limit` log entries, newest first.
    pub fn recent_logs(&self, limit: u32) -> Result<Vec<RecognitionLogEntry>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT log_id, timestamp, employee_id, recognized_name, confidence_score, image_path,
                    recognition_status, processing_time_ms
             FROM recognition_logs
             ORDER BY log_id DESC
             LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit], |row| {
            Ok(RecognitionLogEntry {
                log_id: row.get(0)?,
                timestamp: row.get(1)?,
                employee_id: row.get(2)?,
                recognized_name: row.get(3)?,
                confidence: row.get::<_, f64>(4)? as f32,
                image_path: row.get(5)?,
                status: row.get(6)?,
                processing_time_ms: u64::try_from(row.get::<_, i64>(7)?).unwrap_or(0),
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}
