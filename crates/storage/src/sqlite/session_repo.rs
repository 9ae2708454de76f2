use async_trait::async_trait;
use chrono::Utc;
use exam_core::model::{ExamKey, ExamSessionRecord};
use sqlx::Row;

use super::SqliteRepository;
use crate::repository::{SessionStore, StorageError};

fn ser<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Serialization(e.to_string())
}

fn conn<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Connection(e.to_string())
}

#[async_trait]
impl SessionStore for SqliteRepository {
    async fn get(&self, key: &ExamKey) -> Result<Option<ExamSessionRecord>, StorageError> {
        let row = sqlx::query(
            r"
                SELECT record_json
                FROM exam_session_records
                WHERE exam_key = ?1
            ",
        )
        .bind(key.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(conn)?;

        let Some(row) = row else {
            return Ok(None);
        };
        let json: String = row.try_get("record_json").map_err(ser)?;
        serde_json::from_str(&json).map(Some).map_err(ser)
    }

    async fn put(&self, key: &ExamKey, record: &ExamSessionRecord) -> Result<(), StorageError> {
        let json = serde_json::to_string(record).map_err(ser)?;
        sqlx::query(
            r"
                INSERT INTO exam_session_records (exam_key, record_json, updated_at)
                VALUES (?1, ?2, ?3)
                ON CONFLICT(exam_key) DO UPDATE SET
                    record_json = excluded.record_json,
                    updated_at = excluded.updated_at
            ",
        )
        .bind(key.as_str())
        .bind(json)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(conn)?;
        Ok(())
    }

    async fn delete(&self, key: &ExamKey) -> Result<(), StorageError> {
        sqlx::query("DELETE FROM exam_session_records WHERE exam_key = ?1")
            .bind(key.as_str())
            .execute(&self.pool)
            .await
            .map_err(conn)?;
        Ok(())
    }

    async fn exists(&self, key: &ExamKey) -> Result<bool, StorageError> {
        let row = sqlx::query("SELECT 1 FROM exam_session_records WHERE exam_key = ?1")
            .bind(key.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(conn)?;
        Ok(row.is_some())
    }
}
