use crate::model::{EmbeddingRecord, EmployeeStatus, NewEmbedding, RemovedEmbedding};
use crate::{now, Result, Store, StoreError};
use chrono::NaiveDateTime;
use rollcall_core::{Embedding, EmbeddingSource, IndexedEmbedding};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};

/// Insert one embedding on an open connection or transaction.
pub(crate) fn insert_embedding(
    conn: &Connection,
    employee_id: i64,
    new: &NewEmbedding,
    created_at: NaiveDateTime,
) -> Result<EmbeddingRecord> {
    conn.execute(
        "INSERT INTO face_encodings
             (employee_id, face_encoding, image_path, quality_score, is_primary, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            employee_id,
            new.embedding.to_le_bytes(),
            new.image_path,
            f64::from(new.quality_score),
            new.is_primary,
            created_at,
        ],
    )?;

    Ok(EmbeddingRecord {
        encoding_id: conn.last_insert_rowid(),
        employee_id,
        embedding: new.embedding.clone(),
        image_path: new.image_path.clone(),
        quality_score: new.quality_score,
        is_primary: new.is_primary,
        created_at,
    })
}

fn decode(encoding_id: i64, blob: &[u8]) -> Result<Embedding> {
    Embedding::from_le_bytes(blob).ok_or_else(|| {
        StoreError::Corrupt(format!(
            "face encoding {encoding_id} has {} bytes, not a whole number of f32s",
            blob.len()
        ))
    })
}

impl Store {
    pub fn embedding_count(&self, employee_id: i64) -> Result<usize> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM face_encodings WHERE employee_id = ?1",
            params![employee_id],
            |row| row.get(0),
        )?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    /// Every embedding of one employee, oldest first.
    pub fn embeddings_for(&self, employee_id: i64) -> Result<Vec<EmbeddingRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT encoding_id, face_encoding, image_path, quality_score, is_primary, created_at
             FROM face_encodings WHERE employee_id = ?1 ORDER BY encoding_id",
        )?;
        let rows = stmt.query_map(params![employee_id], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, Vec<u8>>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, f64>(3)?,
                row.get::<_, bool>(4)?,
                row.get::<_, NaiveDateTime>(5)?,
            ))
        })?;

        let mut records = Vec::new();
        for row in rows {
            let (encoding_id, blob, image_path, quality, is_primary, created_at) = row?;
            records.push(EmbeddingRecord {
                encoding_id,
                employee_id,
                embedding: decode(encoding_id, &blob)?,
                image_path,
                quality_score: quality as f32,
                is_primary,
                created_at,
            });
        }
        Ok(records)
    }

    /// Append a non-enrollment embedding to an active employee.
    ///
    /// The per-employee limit is checked inside the same immediate
    /// transaction as the insert, so concurrent additions cannot overshoot it.
    pub fn add_embedding(
        &self,
        employee_id: i64,
        new: &NewEmbedding,
        max_per_employee: usize,
    ) -> Result<EmbeddingRecord> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let status: Option<EmployeeStatus> = tx
            .query_row(
                "SELECT status FROM employees WHERE employee_id = ?1",
                params![employee_id],
                |row| row.get(0),
            )
            .optional()?;
        if status != Some(EmployeeStatus::Active) {
            return Err(StoreError::EmployeeNotFound(employee_id.to_string()));
        }

        let count: i64 = tx.query_row(
            "SELECT COUNT(*) FROM face_encodings WHERE employee_id = ?1",
            params![employee_id],
            |row| row.get(0),
        )?;
        if usize::try_from(count).unwrap_or(usize::MAX) >= max_per_employee {
            return Err(StoreError::QuotaExceeded {
                employee_id,
                max: max_per_employee,
            });
        }

        let record = insert_embedding(&tx, employee_id, new, now())?;
        tx.commit()?;

        tracing::debug!(employee_id, encoding_id = record.encoding_id, "face embedding added");
        Ok(record)
    }

    /// Remove one embedding. `Ok(None)` when no such embedding exists.
    ///
    /// An employee's last embedding is never removed. If the primary one
    /// goes, the oldest remaining embedding becomes primary.
    pub fn remove_embedding(&self, encoding_id: i64) -> Result<Option<RemovedEmbedding>> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let found: Option<(i64, String, bool)> = tx
            .query_row(
                "SELECT employee_id, image_path, is_primary FROM face_encodings WHERE encoding_id = ?1",
                params![encoding_id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;
        let Some((employee_id, image_path, was_primary)) = found else {
            return Ok(None);
        };

        let count: i64 = tx.query_row(
            "SELECT COUNT(*) FROM face_encodings WHERE employee_id = ?1",
            params![employee_id],
            |row| row.get(0),
        )?;
        if count <= 1 {
            return Err(StoreError::LastEmbedding {
                employee_id,
                encoding_id,
            });
        }

        tx.execute(
            "DELETE FROM face_encodings WHERE encoding_id = ?1",
            params![encoding_id],
        )?;
        if was_primary {
            tx.execute(
                "UPDATE face_encodings SET is_primary = 1
                 WHERE encoding_id = (SELECT MIN(encoding_id) FROM face_encodings WHERE employee_id = ?1)",
                params![employee_id],
            )?;
        }
        tx.commit()?;

        tracing::debug!(employee_id, encoding_id, was_primary, "face embedding removed");
        Ok(Some(RemovedEmbedding {
            encoding_id,
            employee_id,
            image_path,
            was_primary,
        }))
    }
}

impl EmbeddingSource for Store {
    type Error = StoreError;

    /// Embeddings of active employees in insertion order. Undecodable blobs
    /// are logged and skipped so one bad row cannot take recognition down.
    fn active_embeddings(&self) -> Result<Vec<IndexedEmbedding>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT f.encoding_id, f.employee_id, e.employee_code, e.full_name, f.face_encoding
             FROM face_encodings f
             JOIN employees e ON e.employee_id = f.employee_id
             WHERE e.status = 'active'
             ORDER BY f.encoding_id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, Vec<u8>>(4)?,
            ))
        })?;

        let mut entries = Vec::new();
        for row in rows {
            let (embedding_id, employee_id, employee_code, full_name, blob) = row?;
            match decode(embedding_id, &blob) {
                Ok(embedding) => entries.push(IndexedEmbedding {
                    embedding_id,
                    employee_id,
                    employee_code,
                    full_name,
                    embedding,
                }),
                Err(e) => tracing::warn!(embedding_id, error = %e, "skipping face encoding"),
            }
        }
        Ok(entries)
    }
}
