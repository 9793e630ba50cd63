// ==========================================
// POS 导入核心 - 导入任务 Repository
// ==========================================
// 职责: import_job 表读写
// 红线: Repository 不含业务规则，只做数据 CRUD
// 并发: 计数器只通过 apply_batch_delta 原子自增（SET x = x + ?）
// ==========================================

use crate::domain::import_job::{
    CounterDelta, ImportJob, ImportResults, JobCounters, JobFailure, RollbackPayload,
};
use crate::domain::quality::DqViolation;
use crate::domain::types::{ImportStatus, ImportType};
use crate::repository::error::{RepositoryError, RepositoryResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

// ==========================================
// ImportJobRepository Trait
// ==========================================
// 实现者: SqliteImportJobRepository
#[async_trait]
pub trait ImportJobRepository: Send + Sync {
    async fn insert(&self, job: &ImportJob) -> RepositoryResult<()>;

    /// 读取任务（不存在返回 NotFound）
    async fn get(&self, job_id: &Uuid) -> RepositoryResult<ImportJob>;

    /// 全量写回（阶段切换 / 结束时由协调方调用）
    async fn save(&self, job: &ImportJob) -> RepositoryResult<()>;

    async fn update_status(&self, job_id: &Uuid, status: ImportStatus) -> RepositoryResult<()>;

    async fn set_total(&self, job_id: &Uuid, total: u64) -> RepositoryResult<()>;

    /// 原子累加批次增量，返回累加后的计数器
    async fn apply_batch_delta(
        &self,
        job_id: &Uuid,
        delta: &CounterDelta,
    ) -> RepositoryResult<JobCounters>;

    /// 同内容的最近一次已完成任务
    async fn find_completed_by_hash(&self, content_hash: &str)
        -> RepositoryResult<Option<ImportJob>>;

    async fn set_rollback(
        &self,
        job_id: &Uuid,
        can_rollback: bool,
        payload: Option<&RollbackPayload>,
    ) -> RepositoryResult<()>;

    async fn list_recent(&self, limit: usize) -> RepositoryResult<Vec<ImportJob>>;
}

// ==========================================
// SqliteImportJobRepository
// ==========================================
pub struct SqliteImportJobRepository {
    conn: Arc<Mutex<Connection>>,
}

const JOB_COLUMNS: &str = "job_id, name, import_type, pos_system, original_filename, file_size, \
    mime_type, content_hash, status, total_records, processed_records, successful_imports, \
    failed_imports, skipped_records, progress_percentage, started_at, completed_at, \
    processing_time_seconds, validation_errors, validation_error_count, data_quality_score, \
    field_mapping_snapshot, import_results, can_rollback, rollback_data, error_detail, \
    created_at, updated_at";

impl SqliteImportJobRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn lock(&self) -> RepositoryResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    fn map_row(row: &Row<'_>) -> rusqlite::Result<JobRow> {
        Ok(JobRow {
            job_id: row.get(0)?,
            name: row.get(1)?,
            import_type: row.get(2)?,
            pos_system: row.get(3)?,
            original_filename: row.get(4)?,
            file_size: row.get::<_, i64>(5)?,
            mime_type: row.get(6)?,
            content_hash: row.get(7)?,
            status: row.get(8)?,
            counters: [
                row.get::<_, i64>(9)?,
                row.get::<_, i64>(10)?,
                row.get::<_, i64>(11)?,
                row.get::<_, i64>(12)?,
                row.get::<_, i64>(13)?,
            ],
            progress_percentage: row.get(14)?,
            started_at: row.get(15)?,
            completed_at: row.get(16)?,
            processing_time_seconds: row.get(17)?,
            validation_errors: row.get(18)?,
            validation_error_count: row.get::<_, i64>(19)?,
            data_quality_score: row.get(20)?,
            field_mapping_snapshot: row.get(21)?,
            import_results: row.get(22)?,
            can_rollback: row.get(23)?,
            rollback_data: row.get(24)?,
            error_detail: row.get(25)?,
            created_at: row.get(26)?,
            updated_at: row.get(27)?,
        })
    }
}

/// 数据库行的原始形态（JSON 列尚未反序列化）
struct JobRow {
    job_id: String,
    name: String,
    import_type: String,
    pos_system: Option<String>,
    original_filename: String,
    file_size: i64,
    mime_type: String,
    content_hash: Option<String>,
    status: String,
    counters: [i64; 5],
    progress_percentage: f64,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    processing_time_seconds: Option<f64>,
    validation_errors: String,
    validation_error_count: i64,
    data_quality_score: Option<f64>,
    field_mapping_snapshot: Option<String>,
    import_results: String,
    can_rollback: bool,
    rollback_data: Option<String>,
    error_detail: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl JobRow {
    fn into_job(self) -> RepositoryResult<ImportJob> {
        let job_id = Uuid::parse_str(&self.job_id).map_err(|e| field_error("job_id", e))?;
        let import_type = ImportType::parse(&self.import_type)
            .ok_or_else(|| field_error("import_type", &self.import_type))?;
        let status =
            ImportStatus::parse(&self.status).ok_or_else(|| field_error("status", &self.status))?;
        let [total, processed, successful, failed, skipped] = self.counters.map(|v| v.max(0) as u64);

        Ok(ImportJob {
            job_id,
            name: self.name,
            import_type,
            pos_system: self.pos_system,
            original_filename: self.original_filename,
            file_size: self.file_size.max(0) as u64,
            mime_type: self.mime_type,
            content_hash: self.content_hash,
            status,
            counters: JobCounters {
                total,
                processed,
                successful,
                failed,
                skipped,
            },
            progress_percentage: self.progress_percentage,
            started_at: self.started_at,
            completed_at: self.completed_at,
            processing_time_seconds: self.processing_time_seconds,
            validation_errors: from_json::<Vec<DqViolation>>(&self.validation_errors)?,
            validation_error_count: self.validation_error_count.max(0) as usize,
            data_quality_score: self.data_quality_score,
            field_mapping_snapshot: self
                .field_mapping_snapshot
                .as_deref()
                .map(from_json::<serde_json::Value>)
                .transpose()?,
            import_results: from_json::<ImportResults>(&self.import_results)?,
            can_rollback: self.can_rollback,
            rollback_data: self
                .rollback_data
                .as_deref()
                .map(from_json::<RollbackPayload>)
                .transpose()?,
            error_detail: self
                .error_detail
                .as_deref()
                .map(from_json::<JobFailure>)
                .transpose()?,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

fn field_error(field: &str, detail: impl std::fmt::Display) -> RepositoryError {
    RepositoryError::FieldValueError {
        field: field.to_string(),
        message: detail.to_string(),
    }
}

fn from_json<T: DeserializeOwned>(raw: &str) -> RepositoryResult<T> {
    Ok(serde_json::from_str(raw)?)
}

fn to_json<T: Serialize>(value: &T) -> RepositoryResult<String> {
    Ok(serde_json::to_string(value)?)
}

fn opt_json<T: Serialize>(value: Option<&T>) -> RepositoryResult<Option<String>> {
    value.map(to_json).transpose()
}

fn not_found(job_id: &Uuid) -> RepositoryError {
    RepositoryError::NotFound {
        entity: "ImportJob".to_string(),
        id: job_id.to_string(),
    }
}

#[async_trait]
impl ImportJobRepository for SqliteImportJobRepository {
    async fn insert(&self, job: &ImportJob) -> RepositoryResult<()> {
        let conn = self.lock()?;
        conn.execute(
            &format!(
                "INSERT INTO import_job ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, \
                 ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, \
                 ?26, ?27, ?28)",
                JOB_COLUMNS
            ),
            params![
                job.job_id.to_string(),
                job.name,
                job.import_type.as_str(),
                job.pos_system,
                job.original_filename,
                job.file_size as i64,
                job.mime_type,
                job.content_hash,
                job.status.as_str(),
                job.counters.total as i64,
                job.counters.processed as i64,
                job.counters.successful as i64,
                job.counters.failed as i64,
                job.counters.skipped as i64,
                job.progress_percentage,
                job.started_at,
                job.completed_at,
                job.processing_time_seconds,
                to_json(&job.validation_errors)?,
                job.validation_error_count as i64,
                job.data_quality_score,
                opt_json(job.field_mapping_snapshot.as_ref())?,
                to_json(&job.import_results)?,
                job.can_rollback,
                opt_json(job.rollback_data.as_ref())?,
                opt_json(job.error_detail.as_ref())?,
                job.created_at,
                job.updated_at,
            ],
        )?;
        Ok(())
    }

    async fn get(&self, job_id: &Uuid) -> RepositoryResult<ImportJob> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                &format!("SELECT {} FROM import_job WHERE job_id = ?1", JOB_COLUMNS),
                params![job_id.to_string()],
                Self::map_row,
            )
            .optional()?
            .ok_or_else(|| not_found(job_id))?;
        row.into_job()
    }

    async fn save(&self, job: &ImportJob) -> RepositoryResult<()> {
        let conn = self.lock()?;
        let affected = conn.execute(
            "UPDATE import_job SET
                status = ?2, total_records = ?3, processed_records = ?4, successful_imports = ?5,
                failed_imports = ?6, skipped_records = ?7, progress_percentage = ?8,
                started_at = ?9, completed_at = ?10, processing_time_seconds = ?11,
                validation_errors = ?12, validation_error_count = ?13, data_quality_score = ?14,
                field_mapping_snapshot = ?15, import_results = ?16, can_rollback = ?17,
                rollback_data = ?18, error_detail = ?19, content_hash = ?20, updated_at = ?21
             WHERE job_id = ?1",
            params![
                job.job_id.to_string(),
                job.status.as_str(),
                job.counters.total as i64,
                job.counters.processed as i64,
                job.counters.successful as i64,
                job.counters.failed as i64,
                job.counters.skipped as i64,
                job.progress_percentage,
                job.started_at,
                job.completed_at,
                job.processing_time_seconds,
                to_json(&job.validation_errors)?,
                job.validation_error_count as i64,
                job.data_quality_score,
                opt_json(job.field_mapping_snapshot.as_ref())?,
                to_json(&job.import_results)?,
                job.can_rollback,
                opt_json(job.rollback_data.as_ref())?,
                opt_json(job.error_detail.as_ref())?,
                job.content_hash,
                Utc::now(),
            ],
        )?;
        if affected == 0 {
            return Err(not_found(&job.job_id));
        }
        Ok(())
    }

    async fn update_status(&self, job_id: &Uuid, status: ImportStatus) -> RepositoryResult<()> {
        let conn = self.lock()?;
        let current: Option<String> = conn
            .query_row(
                "SELECT status FROM import_job WHERE job_id = ?1",
                params![job_id.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        let current = current.ok_or_else(|| not_found(job_id))?;
        if ImportStatus::parse(&current).map(|s| s.is_terminal()).unwrap_or(false) {
            return Err(RepositoryError::InvalidStateTransition {
                from: current,
                to: status.as_str().to_string(),
            });
        }
        conn.execute(
            "UPDATE import_job SET status = ?2,
                started_at = CASE WHEN started_at IS NULL AND ?3 THEN ?4 ELSE started_at END,
                updated_at = ?4
             WHERE job_id = ?1",
            params![job_id.to_string(), status.as_str(), status.is_in_progress(), Utc::now()],
        )?;
        Ok(())
    }

    async fn set_total(&self, job_id: &Uuid, total: u64) -> RepositoryResult<()> {
        let conn = self.lock()?;
        let affected = conn.execute(
            "UPDATE import_job SET total_records = ?2, updated_at = ?3 WHERE job_id = ?1",
            params![job_id.to_string(), total as i64, Utc::now()],
        )?;
        if affected == 0 {
            return Err(not_found(job_id));
        }
        Ok(())
    }

    async fn apply_batch_delta(
        &self,
        job_id: &Uuid,
        delta: &CounterDelta,
    ) -> RepositoryResult<JobCounters> {
        let conn = self.lock()?;
        let affected = conn.execute(
            "UPDATE import_job SET
                processed_records = processed_records + ?2,
                successful_imports = successful_imports + ?3,
                failed_imports = failed_imports + ?4,
                skipped_records = skipped_records + ?5,
                progress_percentage = CASE WHEN total_records > 0
                    THEN MIN(100.0, (processed_records + ?2) * 100.0 / total_records)
                    ELSE progress_percentage END,
                updated_at = ?6
             WHERE job_id = ?1",
            params![
                job_id.to_string(),
                delta.processed as i64,
                delta.successful as i64,
                delta.failed as i64,
                delta.skipped as i64,
                Utc::now(),
            ],
        )?;
        if affected == 0 {
            return Err(not_found(job_id));
        }
        let counters = conn.query_row(
            "SELECT total_records, processed_records, successful_imports, failed_imports, skipped_records
             FROM import_job WHERE job_id = ?1",
            params![job_id.to_string()],
            |row| {
                Ok(JobCounters {
                    total: row.get::<_, i64>(0)?.max(0) as u64,
                    processed: row.get::<_, i64>(1)?.max(0) as u64,
                    successful: row.get::<_, i64>(2)?.max(0) as u64,
                    failed: row.get::<_, i64>(3)?.max(0) as u64,
                    skipped: row.get::<_, i64>(4)?.max(0) as u64,
                })
            },
        )?;
        Ok(counters)
    }

    async fn find_completed_by_hash(
        &self,
        content_hash: &str,
    ) -> RepositoryResult<Option<ImportJob>> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                &format!(
                    "SELECT {} FROM import_job WHERE content_hash = ?1 AND status = ?2
                     ORDER BY completed_at DESC LIMIT 1",
                    JOB_COLUMNS
                ),
                params![content_hash, ImportStatus::Completed.as_str()],
                Self::map_row,
            )
            .optional()?;
        row.map(JobRow::into_job).transpose()
    }

    async fn set_rollback(
        &self,
        job_id: &Uuid,
        can_rollback: bool,
        payload: Option<&RollbackPayload>,
    ) -> RepositoryResult<()> {
        let conn = self.lock()?;
        let affected = conn.execute(
            "UPDATE import_job SET can_rollback = ?2, rollback_data = ?3, updated_at = ?4
             WHERE job_id = ?1",
            params![job_id.to_string(), can_rollback, opt_json(payload)?, Utc::now()],
        )?;
        if affected == 0 {
            return Err(not_found(job_id));
        }
        Ok(())
    }

    async fn list_recent(&self, limit: usize) -> RepositoryResult<Vec<ImportJob>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM import_job ORDER BY created_at DESC LIMIT ?1",
            JOB_COLUMNS
        ))?;
        let rows = stmt.query_map(params![limit as i64], Self::map_row)?;
        let mut jobs = Vec::new();
        for row in rows {
            jobs.push(row?.into_job()?);
        }
        Ok(jobs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::quality::DqLevel;

    fn repo() -> SqliteImportJobRepository {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::init_schema(&conn).unwrap();
        SqliteImportJobRepository::new(Arc::new(Mutex::new(conn)))
    }

    fn job() -> ImportJob {
        ImportJob::new("menu", ImportType::Menu, Some("petpooja".into()), "menu.csv", 64, "text/csv")
    }

    #[tokio::test]
    async fn test_insert_get_roundtrip() {
        let repo = repo();
        let mut job = job();
        job.content_hash = Some("abc".into());
        job.record_violation(DqViolation::row(2, DqLevel::Error, "price", "bad"));
        repo.insert(&job).await.unwrap();

        let loaded = repo.get(&job.job_id).await.unwrap();
        assert_eq!(loaded.job_id, job.job_id);
        assert_eq!(loaded.pos_system.as_deref(), Some("petpooja"));
        assert_eq!(loaded.validation_errors.len(), 1);
        assert_eq!(loaded.status, ImportStatus::Pending);
    }

    #[tokio::test]
    async fn test_apply_batch_delta_accumulates() {
        let repo = repo();
        let job = job();
        repo.insert(&job).await.unwrap();
        repo.set_total(&job.job_id, 10).await.unwrap();

        let delta = CounterDelta {
            processed: 4,
            successful: 3,
            failed: 1,
            skipped: 0,
        };
        repo.apply_batch_delta(&job.job_id, &delta).await.unwrap();
        let counters = repo.apply_batch_delta(&job.job_id, &delta).await.unwrap();
        assert_eq!(counters.processed, 8);
        assert_eq!(counters.successful, 6);
        assert!(counters.is_consistent());

        let loaded = repo.get(&job.job_id).await.unwrap();
        assert!((loaded.progress_percentage - 80.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_terminal_status_is_final() {
        let repo = repo();
        let mut job = job();
        repo.insert(&job).await.unwrap();
        job.finish(ImportStatus::Completed);
        repo.save(&job).await.unwrap();

        let err = repo
            .update_status(&job.job_id, ImportStatus::Importing)
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::InvalidStateTransition { .. }));
    }

    #[tokio::test]
    async fn test_find_completed_by_hash() {
        let repo = repo();
        let mut job = job();
        job.content_hash = Some("h1".into());
        repo.insert(&job).await.unwrap();
        assert!(repo.find_completed_by_hash("h1").await.unwrap().is_none());

        job.finish(ImportStatus::Completed);
        repo.save(&job).await.unwrap();
        let found = repo.find_completed_by_hash("h1").await.unwrap();
        assert_eq!(found.map(|j| j.job_id), Some(job.job_id));
    }

    #[tokio::test]
    async fn test_missing_job_is_not_found() {
        let repo = repo();
        let err = repo.get(&Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, RepositoryError::NotFound { .. }));
    }
}
