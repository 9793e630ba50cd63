// ==========================================
// POS 导入核心 - 标准记录落库
// ==========================================
// 职责: 批次整体写入 import_record（单事务，全有或全无）/ 按任务回滚删除
// 超时: 行间与 COMMIT 前检查批次截止时间，超时则整批回滚
// ==========================================

use crate::domain::record::MappedRecord;
use crate::domain::types::ImportType;
use crate::perf::PerfGuard;
use crate::repository::error::{RepositoryError, RepositoryResult};
use async_trait::async_trait;
use rusqlite::{params, Connection};
use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;
use tracing::debug;
use uuid::Uuid;

// ==========================================
// RecordSink Trait
// ==========================================
#[async_trait]
pub trait RecordSink: Send + Sync {
    /// 单事务写入一个批次，返回写入行数
    async fn persist_batch(
        &self,
        job_id: &Uuid,
        import_type: ImportType,
        batch_index: usize,
        rows: &[MappedRecord],
        deadline: Option<Instant>,
    ) -> RepositoryResult<usize>;

    /// 删除任务指定批次（batches 为空表示全部）的记录
    async fn delete_job_records(&self, job_id: &Uuid, batches: &[usize]) -> RepositoryResult<usize>;

    async fn count_job_records(&self, job_id: &Uuid) -> RepositoryResult<u64>;

    /// 读取已落库的记录（按行号）
    async fn load_job_records(&self, job_id: &Uuid) -> RepositoryResult<Vec<MappedRecord>>;
}

// ==========================================
// SqliteRecordSink
// ==========================================
pub struct SqliteRecordSink {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteRecordSink {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn lock(&self) -> RepositoryResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }
}

fn check_deadline(deadline: Option<Instant>, batch_index: usize, stage: &str) -> RepositoryResult<()> {
    match deadline {
        Some(d) if Instant::now() >= d => Err(RepositoryError::Timeout(format!(
            "批次 {} 在{}时超出时间预算",
            batch_index, stage
        ))),
        _ => Ok(()),
    }
}

#[async_trait]
impl RecordSink for SqliteRecordSink {
    async fn persist_batch(
        &self,
        job_id: &Uuid,
        import_type: ImportType,
        batch_index: usize,
        rows: &[MappedRecord],
        deadline: Option<Instant>,
    ) -> RepositoryResult<usize> {
        let mut conn = self.lock()?;
        let mut perf = PerfGuard::new("persist_batch").for_batch(job_id, batch_index);
        perf.set_rows(rows.len());

        let tx = conn
            .transaction()
            .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO import_record (job_id, batch_index, row_number, import_type, payload)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for row in rows {
                check_deadline(deadline, batch_index, "写入")?;
                stmt.execute(params![
                    job_id.to_string(),
                    batch_index as i64,
                    row.row_number as i64,
                    import_type.as_str(),
                    serde_json::to_string(&row.values)?,
                ])?;
            }
        }
        check_deadline(deadline, batch_index, "提交")?;
        tx.commit()
            .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;

        debug!(job_id = %job_id, batch_index, rows = rows.len(), "批次已提交");
        Ok(rows.len())
    }

    async fn delete_job_records(&self, job_id: &Uuid, batches: &[usize]) -> RepositoryResult<usize> {
        let mut conn = self.lock()?;
        let _perf = PerfGuard::new("delete_job_records").for_job(job_id);
        let tx = conn.transaction()?;
        let mut deleted = 0;
        if batches.is_empty() {
            deleted += tx.execute(
                "DELETE FROM import_record WHERE job_id = ?1",
                params![job_id.to_string()],
            )?;
        } else {
            for batch in batches {
                deleted += tx.execute(
                    "DELETE FROM import_record WHERE job_id = ?1 AND batch_index = ?2",
                    params![job_id.to_string(), *batch as i64],
                )?;
            }
        }
        tx.commit()?;
        Ok(deleted)
    }

    async fn count_job_records(&self, job_id: &Uuid) -> RepositoryResult<u64> {
        let conn = self.lock()?;
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM import_record WHERE job_id = ?1",
            params![job_id.to_string()],
            |row| row.get(0),
        )?;
        Ok(n.max(0) as u64)
    }

    async fn load_job_records(&self, job_id: &Uuid) -> RepositoryResult<Vec<MappedRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT row_number, payload FROM import_record WHERE job_id = ?1 ORDER BY row_number",
        )?;
        let rows = stmt.query_map(params![job_id.to_string()], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (row_number, payload) = row?;
            let values = match serde_json::from_str::<Value>(&payload)? {
                Value::Object(map) => map,
                other => {
                    return Err(RepositoryError::SerializationError(format!(
                        "记录不是对象: {}",
                        other
                    )))
                }
            };
            out.push(MappedRecord {
                row_number: row_number.max(0) as usize,
                values,
            });
        }
        Ok(out)
    }
}
