//! Database schema.

use rusqlite::Connection;

pub const SCHEMA_VERSION: u32 = 1;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS employees (
    employee_id   INTEGER PRIMARY KEY AUTOINCREMENT,
    employee_code TEXT    NOT NULL UNIQUE,
    full_name     TEXT    NOT NULL,
    email         TEXT,
    phone         TEXT,
    department    TEXT,
    position      TEXT,
    status        TEXT    NOT NULL DEFAULT 'active'
                          CHECK (status IN ('active', 'inactive')),
    created_at    TEXT    NOT NULL
);

CREATE TABLE IF NOT EXISTS face_encodings (
    encoding_id   INTEGER PRIMARY KEY AUTOINCREMENT,
    employee_id   INTEGER NOT NULL
                          REFERENCES employees(employee_id) ON DELETE CASCADE,
    face_encoding BLOB    NOT NULL,
    image_path    TEXT    NOT NULL,
    quality_score REAL    NOT NULL CHECK (quality_score BETWEEN 0 AND 1),
    is_primary    INTEGER NOT NULL DEFAULT 0,
    created_at    TEXT    NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_face_encodings_employee
    ON face_encodings(employee_id);

CREATE TABLE IF NOT EXISTS attendance_records (
    attendance_id        INTEGER PRIMARY KEY AUTOINCREMENT,
    employee_id          INTEGER NOT NULL
                                 REFERENCES employees(employee_id) ON DELETE CASCADE,
    attendance_date      TEXT    NOT NULL,
    check_in_time        TEXT,
    check_in_confidence  REAL,
    check_in_image_path  TEXT,
    check_out_time       TEXT,
    check_out_confidence REAL,
    check_out_image_path TEXT,
    status               TEXT    NOT NULL CHECK (status IN ('present', 'late')),
    UNIQUE (employee_id, attendance_date),
    CHECK (check_out_time IS NULL OR check_in_time IS NOT NULL)
);

CREATE INDEX IF NOT EXISTS idx_attendance_date
    ON attendance_records(attendance_date);

CREATE TABLE IF NOT EXISTS recognition_logs (
    log_id             INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp          TEXT    NOT NULL,
    employee_id        INTEGER REFERENCES employees(employee_id),
    recognized_name    TEXT    NOT NULL,
    confidence_score   REAL    NOT NULL,
    image_path         TEXT,
    recognition_status TEXT    NOT NULL
                               CHECK (recognition_status IN
                                      ('success', 'unknown_face', 'multiple_faces', 'failed')),
    processing_time_ms INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_recognition_logs_timestamp
    ON recognition_logs(timestamp);

CREATE TRIGGER IF NOT EXISTS recognition_logs_no_update
    BEFORE UPDATE ON recognition_logs
BEGIN
    SELECT RAISE(ABORT, 'recognition_logs is append-only');
END;

CREATE TRIGGER IF NOT EXISTS recognition_logs_no_delete
    BEFORE DELETE ON recognition_logs
BEGIN
    SELECT RAISE(ABORT, 'recognition_logs is append-only');
END;
"#;

/// Enable per-connection settings and create any missing tables.
pub fn apply(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.busy_timeout(std::time::Duration::from_secs(5))?;
    conn.execute_batch(SCHEMA)?;
    conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
    Ok(())
}

pub fn version(conn: &Connection) -> rusqlite::Result<u32> {
    conn.pragma_query_value(None, "user_version", |row| row.get(0))
}
