// ==========================================
// POS 导入核心 - 导入任务领域模型
// ==========================================
// 用途: 调用方持有的可变任务记录，导入核心按 job_id 引用
// 对齐: import_job 表
// 不变式: processed = successful + failed + skipped（每个批次结束后）
//         processed <= total；单次运行内计数器单调不减
// ==========================================

use crate::domain::format::{ClassificationReport, FormatDescriptor};
use crate::domain::quality::{self, DqViolation};
use crate::domain::types::{FailureReason, ImportStatus, ImportType};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

/// 任务上保留的校验问题上限（超出部分只计数）
pub const MAX_VALIDATION_ERRORS: usize = 100;

// ==========================================
// CounterDelta - 单批次计数增量
// ==========================================
// 并行模式下每个批次单元只返回增量，由协调者串行折叠
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterDelta {
    pub processed: u64,
    pub successful: u64,
    pub failed: u64,
    pub skipped: u64,
}

impl CounterDelta {
    pub fn merge(&mut self, other: &CounterDelta) {
        self.processed += other.processed;
        self.successful += other.successful;
        self.failed += other.failed;
        self.skipped += other.skipped;
    }
}

// ==========================================
// JobCounters - 任务计数器
// ==========================================
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCounters {
    pub total: u64,      // 总行数（解析前为 0）
    pub processed: u64,  // 已处理
    pub successful: u64, // 成功写入
    pub failed: u64,     // 行级失败 + 死信批次内的有效行
    pub skipped: u64,    // 空行 / 重复行
}

impl JobCounters {
    pub fn apply(&mut self, delta: &CounterDelta) {
        self.processed += delta.processed;
        self.successful += delta.successful;
        self.failed += delta.failed;
        self.skipped += delta.skipped;
    }

    pub fn is_consistent(&self) -> bool {
        self.processed == self.successful + self.failed + self.skipped
            && (self.total == 0 || self.processed <= self.total)
    }

    pub fn progress_percentage(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        (self.processed as f64 / self.total as f64 * 100.0).min(100.0)
    }
}

// ==========================================
// FailedBatch - 死信批次
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedBatch {
    pub batch_index: usize,
    pub attempts: u32,        // 含首次执行
    pub rows_affected: usize, // 该批次中本应写入的有效行数
    pub error: String,
}

// ==========================================
// ImportResults - 导入结果汇总
// ==========================================
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImportResults {
    pub batches_completed: usize,
    pub batches_failed: usize,
    pub failed_batches: Vec<FailedBatch>,
    pub retry_counts: BTreeMap<usize, u32>, // batch_index → 重试次数
    pub committed_batches: Vec<usize>,
    pub format: Option<FormatDescriptor>,
    pub classification: Option<ClassificationReport>,
    pub warnings: Vec<String>,
    pub summary_document: Option<Value>,
    pub memory_relief_events: usize,
    pub parallel: bool,
}

// ==========================================
// RollbackPayload - 回滚载荷
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollbackPayload {
    pub committed_batches: Vec<usize>,
    pub record_count: u64,
    pub expires_at: DateTime<Utc>,
}

impl RollbackPayload {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

// ==========================================
// JobFailure - 任务级失败详情
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobFailure {
    pub reason: FailureReason,
    pub message: String,
    pub occurred_at: DateTime<Utc>,
}

// ==========================================
// ImportJob - 导入任务
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportJob {
    // ===== 标识 =====
    pub job_id: Uuid,
    pub name: String,
    pub import_type: ImportType,
    pub pos_system: Option<String>,

    // ===== 源文件描述 =====
    pub original_filename: String,
    pub file_size: u64,
    pub mime_type: String,
    pub content_hash: Option<String>, // SHA-256 hex

    // ===== 生命周期 =====
    pub status: ImportStatus,
    pub counters: JobCounters,
    pub progress_percentage: f64,

    // ===== 时间 =====
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub processing_time_seconds: Option<f64>,

    // ===== 质量输出 =====
    pub validation_errors: Vec<DqViolation>,
    pub validation_error_count: usize, // 含被截断的部分
    pub data_quality_score: Option<f64>,
    pub field_mapping_snapshot: Option<Value>,
    pub import_results: ImportResults,

    // ===== 回滚 =====
    pub can_rollback: bool,
    pub rollback_data: Option<RollbackPayload>,

    pub error_detail: Option<JobFailure>,

    // ===== 审计 =====
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ImportJob {
    pub fn new(
        name: impl Into<String>,
        import_type: ImportType,
        pos_system: Option<String>,
        original_filename: impl Into<String>,
        file_size: u64,
        mime_type: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            job_id: Uuid::new_v4(),
            name: name.into(),
            import_type,
            pos_system,
            original_filename: original_filename.into(),
            file_size,
            mime_type: mime_type.into(),
            content_hash: None,
            status: ImportStatus::Pending,
            counters: JobCounters::default(),
            progress_percentage: 0.0,
            started_at: None,
            completed_at: None,
            processing_time_seconds: None,
            validation_errors: Vec::new(),
            validation_error_count: 0,
            data_quality_score: None,
            field_mapping_snapshot: None,
            import_results: ImportResults::default(),
            can_rollback: false,
            rollback_data: None,
            error_detail: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn set_status(&mut self, status: ImportStatus) {
        if self.started_at.is_none() && status.is_in_progress() {
            self.started_at = Some(Utc::now());
        }
        self.status = status;
        self.updated_at = Utc::now();
    }

    pub fn set_total(&mut self, total: u64) {
        self.counters.total = total;
        self.progress_percentage = self.counters.progress_percentage();
    }

    pub fn apply_delta(&mut self, delta: &CounterDelta) {
        self.counters.apply(delta);
        self.progress_percentage = self.counters.progress_percentage();
        self.updated_at = Utc::now();
    }

    /// 记录校验问题；超过上限后只累加计数
    pub fn record_violation(&mut self, violation: DqViolation) {
        self.validation_error_count += 1;
        if self.validation_errors.len() < MAX_VALIDATION_ERRORS {
            self.validation_errors.push(violation);
        }
    }

    pub fn record_violations(&mut self, violations: impl IntoIterator<Item = DqViolation>) {
        for v in violations {
            self.record_violation(v);
        }
    }

    /// 进入终态：写完成时间、处理耗时、质量分
    pub fn finish(&mut self, status: ImportStatus) {
        let now = Utc::now();
        self.status = status;
        self.completed_at = Some(now);
        let started = self.started_at.unwrap_or(self.created_at);
        self.processing_time_seconds =
            Some((now - started).num_milliseconds().max(0) as f64 / 1000.0);
        self.data_quality_score = Some(quality::quality_score(
            self.counters.successful,
            self.counters.failed,
            self.counters.processed,
        ));
        if status == ImportStatus::Completed && self.counters.total == 0 {
            self.counters.total = self.counters.processed;
        }
        self.progress_percentage = if status == ImportStatus::Completed {
            100.0
        } else {
            self.counters.progress_percentage()
        };
        self.updated_at = now;
    }

    pub fn fail(&mut self, reason: FailureReason, message: impl Into<String>) {
        self.error_detail = Some(JobFailure {
            reason,
            message: message.into(),
            occurred_at: Utc::now(),
        });
        self.finish(ImportStatus::Failed);
    }

    /// 开启回滚窗口（仅在有已提交批次时）
    pub fn enable_rollback(&mut self, window_hours: i64) {
        if self.import_results.committed_batches.is_empty() {
            return;
        }
        let mut batches = self.import_results.committed_batches.clone();
        batches.sort_unstable();
        self.rollback_data = Some(RollbackPayload {
            committed_batches: batches,
            record_count: self.counters.successful,
            expires_at: Utc::now() + Duration::hours(window_hours),
        });
        self.can_rollback = true;
    }

    pub fn rollback_open(&self, now: DateTime<Utc>) -> bool {
        self.can_rollback
            && self
                .rollback_data
                .as_ref()
                .map(|p| !p.is_expired(now))
                .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::quality::DqLevel;

    fn sample_job() -> ImportJob {
        ImportJob::new("menu", ImportType::Menu, None, "menu.csv", 120, "text/csv")
    }

    #[test]
    fn test_delta_keeps_counters_consistent() {
        let mut job = sample_job();
        job.set_total(10);
        job.apply_delta(&CounterDelta {
            processed: 4,
            successful: 2,
            failed: 1,
            skipped: 1,
        });
        assert!(job.counters.is_consistent());
        assert!((job.progress_percentage - 40.0).abs() < 1e-9);
    }

    #[test]
    fn test_violation_cap() {
        let mut job = sample_job();
        for i in 0..(MAX_VALIDATION_ERRORS + 5) {
            job.record_violation(DqViolation::row(i + 1, DqLevel::Error, "price", "bad"));
        }
        assert_eq!(job.validation_errors.len(), MAX_VALIDATION_ERRORS);
        assert_eq!(job.validation_error_count, MAX_VALIDATION_ERRORS + 5);
    }

    #[test]
    fn test_fail_sets_terminal_fields() {
        let mut job = sample_job();
        job.set_status(ImportStatus::Parsing);
        job.fail(FailureReason::Format, "unreadable");
        assert_eq!(job.status, ImportStatus::Failed);
        assert!(job.completed_at.is_some());
        assert!(job.processing_time_seconds.is_some());
        assert_eq!(job.error_detail.as_ref().map(|e| e.reason), Some(FailureReason::Format));
    }

    #[test]
    fn test_rollback_window() {
        let mut job = sample_job();
        job.enable_rollback(24);
        assert!(!job.can_rollback, "no committed batches, nothing to roll back");

        job.import_results.committed_batches = vec![1, 0];
        job.enable_rollback(24);
        assert!(job.rollback_open(Utc::now()));
        assert_eq!(job.rollback_data.as_ref().map(|p| p.committed_batches.clone()), Some(vec![0, 1]));
        assert!(!job.rollback_open(Utc::now() + Duration::hours(25)));
    }
}
