//! Canonical record store with dedup-on-insert.
//!
//! Every insert is a single `INSERT ... SELECT ... WHERE NOT EXISTS`
//! statement on the serialized write pool, so the existence check and the
//! insert cannot interleave with another writer.

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::Result;
use crate::database::models::{
    ConditionRecord, DiagnosticReportRecord, LabResultRecord, MedicationRecord,
};

/// Insert contract for canonical records.
///
/// Each method returns `true` if a row was written and `false` if a record
/// with the same dedup key already existed.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Dedup key `(test_name, date, result)`.
    async fn insert_lab_result(&self, record: &LabResultRecord) -> Result<bool>;

    /// Dedup key `(category, test_name, date)`.
    async fn insert_diagnostic_report(&self, record: &DiagnosticReportRecord) -> Result<bool>;

    /// Dedup key `(medication_name, start_date)`.
    async fn insert_medication(&self, record: &MedicationRecord) -> Result<bool>;

    /// Dedup key `(name, diagnosed_date)`.
    async fn insert_condition(&self, record: &ConditionRecord) -> Result<bool>;
}

pub struct SqlxRecordStore {
    write_pool: SqlitePool,
}

impl SqlxRecordStore {
    pub fn new(write_pool: SqlitePool) -> Self {
        Self { write_pool }
    }
}

#[async_trait]
impl RecordStore for SqlxRecordStore {
    async fn insert_lab_result(&self, record: &LabResultRecord) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO test_results (test_name, result, date, category, provider, notes, created_at)
            SELECT ?, ?, ?, ?, ?, ?, ?
            WHERE NOT EXISTS (
                SELECT 1 FROM test_results WHERE test_name = ? AND date = ? AND result = ?
            )
            "#,
        )
        .bind(&record.test_name)
        .bind(&record.result)
        .bind(&record.date)
        .bind(record.category.as_str())
        .bind(&record.provider)
        .bind(&record.notes)
        .bind(crate::database::time::now_ms())
        .bind(&record.test_name)
        .bind(&record.date)
        .bind(&record.result)
        .execute(&self.write_pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn insert_diagnostic_report(&self, record: &DiagnosticReportRecord) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO test_results (test_name, result, date, category, provider, notes, created_at)
            SELECT ?, ?, ?, ?, ?, ?, ?
            WHERE NOT EXISTS (
                SELECT 1 FROM test_results WHERE category = ? AND test_name = ? AND date = ?
            )
            "#,
        )
        .bind(&record.test_name)
        .bind(&record.result)
        .bind(&record.date)
        .bind(record.category.as_str())
        .bind(&record.provider)
        .bind(&record.notes)
        .bind(crate::database::time::now_ms())
        .bind(record.category.as_str())
        .bind(&record.test_name)
        .bind(&record.date)
        .execute(&self.write_pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn insert_medication(&self, record: &MedicationRecord) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO medications (medication_name, dosage, frequency, start_date, status, notes, created_at)
            SELECT ?, ?, ?, ?, ?, ?, ?
            WHERE NOT EXISTS (
                SELECT 1 FROM medications WHERE medication_name = ? AND start_date = ?
            )
            "#,
        )
        .bind(&record.medication_name)
        .bind(&record.dosage)
        .bind(&record.frequency)
        .bind(&record.start_date)
        .bind(&record.status)
        .bind(&record.notes)
        .bind(crate::database::time::now_ms())
        .bind(&record.medication_name)
        .bind(&record.start_date)
        .execute(&self.write_pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn insert_condition(&self, record: &ConditionRecord) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO conditions (name, diagnosed_date, status, notes, created_at)
            SELECT ?, ?, ?, ?, ?
            WHERE NOT EXISTS (
                SELECT 1 FROM conditions WHERE name = ? AND diagnosed_date = ?
            )
            "#,
        )
        .bind(&record.name)
        .bind(&record.diagnosed_date)
        .bind(&record.status)
        .bind(&record.notes)
        .bind(crate::database::time::now_ms())
        .bind(&record.name)
        .bind(&record.diagnosed_date)
        .execute(&self.write_pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }
}
