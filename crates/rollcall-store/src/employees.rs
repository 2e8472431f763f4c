use crate::embeddings::insert_embedding;
use crate::model::{EmbeddingRecord, Employee, EmployeeStatus, EmployeeSummary, NewEmbedding, NewEmployee};
use crate::{is_unique_violation, now, Result, Store, StoreError};
use rusqlite::{params, OptionalExtension, Row, TransactionBehavior};

const EMPLOYEE_COLUMNS: &str = "e.employee_id, e.employee_code, e.full_name, e.email, e.phone, \
     e.department, e.position, e.status, e.created_at";

pub(crate) fn row_to_employee(row: &Row<'_>) -> rusqlite::Result<Employee> {
    Ok(Employee {
        employee_id: row.get(0)?,
        employee_code: row.get(1)?,
        full_name: row.get(2)?,
        email: row.get(3)?,
        phone: row.get(4)?,
        department: row.get(5)?,
        position: row.get(6)?,
        status: row.get(7)?,
        created_at: row.get(8)?,
    })
}

impl Store {
    pub fn employee(&self, employee_id: i64) -> Result<Option<Employee>> {
        let conn = self.lock()?;
        let sql = format!("SELECT {EMPLOYEE_COLUMNS} FROM employees e WHERE e.employee_id = ?1");
        Ok(conn
            .query_row(&sql, params![employee_id], row_to_employee)
            .optional()?)
    }

    /// Look up by code regardless of status.
    pub fn employee_by_code(&self, code: &str) -> Result<Option<Employee>> {
        let conn = self.lock()?;
        let sql = format!("SELECT {EMPLOYEE_COLUMNS} FROM employees e WHERE e.employee_code = ?1");
        Ok(conn
            .query_row(&sql, params![code], row_to_employee)
            .optional()?)
    }

    /// Employees ordered by name, each with its embedding count. `None`
    /// lists every status.
    pub fn list_employees(&self, status: Option<EmployeeStatus>) -> Result<Vec<EmployeeSummary>> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {EMPLOYEE_COLUMNS},
                    (SELECT COUNT(*) FROM face_encodings f WHERE f.employee_id = e.employee_id)
             FROM employees e
             WHERE ?1 IS NULL OR e.status = ?1
             ORDER BY e.full_name, e.employee_id"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![status], |row| {
            let count: i64 = row.get(9)?;
            Ok(EmployeeSummary {
                employee: row_to_employee(row)?,
                embedding_count: usize::try_from(count).unwrap_or(0),
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn set_employee_status(&self, employee_id: i64, status: EmployeeStatus) -> Result<()> {
        let conn = self.lock()?;
        let rows = conn.execute(
            "UPDATE employees SET status = ?1 WHERE employee_id = ?2",
            params![status, employee_id],
        )?;
        if rows == 0 {
            return Err(StoreError::EmployeeNotFound(employee_id.to_string()));
        }
        tracing::info!(employee_id, %status, "employee status changed");
        Ok(())
    }

    /// Insert an active employee together with its embeddings.
    ///
    /// Either the employee and every embedding are committed or nothing is.
    /// An employee is never stored without at least one embedding.
    pub fn create_employee(
        &self,
        profile: &NewEmployee,
        embeddings: &[NewEmbedding],
    ) -> Result<(Employee, Vec<EmbeddingRecord>)> {
        if embeddings.is_empty() {
            return Err(StoreError::Invalid(format!(
                "employee {} has no face embeddings",
                profile.employee_code
            )));
        }

        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let created_at = now();

        tx.execute(
            "INSERT INTO employees
                 (employee_code, full_name, email, phone, department, position, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                profile.employee_code,
                profile.full_name,
                profile.email,
                profile.phone,
                profile.department,
                profile.position,
                EmployeeStatus::Active,
                created_at,
            ],
        )
        .map_err(|e| {
            if is_unique_violation(&e) {
                StoreError::DuplicateCode(profile.employee_code.clone())
            } else {
                StoreError::Sqlite(e)
            }
        })?;
        let employee_id = tx.last_insert_rowid();

        let records = embeddings
            .iter()
            .map(|e| insert_embedding(&tx, employee_id, e, created_at))
            .collect::<Result<Vec<_>>>()?;

        tx.commit()?;

        tracing::info!(
            employee_id,
            code = %profile.employee_code,
            embeddings = records.len(),
            "employee created"
        );

        let employee = Employee {
            employee_id,
            employee_code: profile.employee_code.clone(),
            full_name: profile.full_name.clone(),
            email: profile.email.clone(),
            phone: profile.phone.clone(),
            department: profile.department.clone(),
            position: profile.position.clone(),
            status: EmployeeStatus::Active,
            created_at,
        };
        Ok((employee, records))
    }
}
