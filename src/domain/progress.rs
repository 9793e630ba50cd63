// ==========================================
// POS 导入核心 - 进度快照模型
// ==========================================
// 用途: 运行中任务的只读视图（轮询接口读取，不阻塞任务）
// 一致性: 与 ImportJob 最终一致，需要强一致请直接读任务记录
// ==========================================

use crate::domain::types::{PerformanceRating, ProgressPhase};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ==========================================
// ProgressPoint - 历史趋势点
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressPoint {
    pub at: DateTime<Utc>,
    pub phase: ProgressPhase,
    pub processed: u64,
    pub successful: u64,
    pub failed: u64,
    pub processing_speed: f64,
    pub memory_usage_bytes: u64,
}

// ==========================================
// ProgressSnapshot - 进度快照
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub job_id: Uuid,
    pub phase: ProgressPhase,

    // ===== 计数 =====
    pub total: u64,
    pub processed: u64,
    pub successful: u64,
    pub failed: u64,
    pub skipped: u64,
    pub batches_completed: usize,
    pub batches_failed: usize,
    pub current_batch: Option<usize>,

    // ===== 派生指标 =====
    pub progress_percentage: f64,
    pub processing_speed: f64, // 行/秒
    pub eta: Option<DateTime<Utc>>,
    pub memory_usage_bytes: u64,

    pub message: Option<String>,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub history: Vec<ProgressPoint>, // 最近 N 个点
}

impl ProgressSnapshot {
    pub fn new(job_id: Uuid, total: u64) -> Self {
        let now = Utc::now();
        Self {
            job_id,
            phase: ProgressPhase::Parsing,
            total,
            processed: 0,
            successful: 0,
            failed: 0,
            skipped: 0,
            batches_completed: 0,
            batches_failed: 0,
            current_batch: None,
            progress_percentage: 0.0,
            processing_speed: 0.0,
            eta: None,
            memory_usage_bytes: 0,
            message: None,
            error: None,
            started_at: now,
            updated_at: now,
            history: Vec::new(),
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(
            self.phase,
            ProgressPhase::Completed | ProgressPhase::Failed | ProgressPhase::Cancelled
        )
    }
}

// ==========================================
// ProgressUpdate - 局部字段更新
// ==========================================
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgressUpdate {
    pub phase: Option<ProgressPhase>,
    pub total: Option<u64>,
    pub processed: Option<u64>,
    pub successful: Option<u64>,
    pub failed: Option<u64>,
    pub skipped: Option<u64>,
    pub current_batch: Option<usize>,
    pub memory_usage_bytes: Option<u64>,
    pub message: Option<String>,
}

impl ProgressUpdate {
    pub fn phase(phase: ProgressPhase) -> Self {
        Self {
            phase: Some(phase),
            ..Default::default()
        }
    }
}

// ==========================================
// BatchProgress - 单批次结果（增量）
// ==========================================
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchProgress {
    pub batch_index: usize,
    pub processed: u64,
    pub successful: u64,
    pub failed: u64,
    pub skipped: u64,
    pub batch_failed: bool,
    pub memory_usage_bytes: u64,
}

// ==========================================
// ProgressAnalytics - 按需分析
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressAnalytics {
    pub efficiency: f64,
    pub error_rate: f64,
    pub quality_score: f64,
    pub performance_rating: PerformanceRating,
    pub elapsed_seconds: f64,
    pub average_batch_seconds: Option<f64>,
    pub peak_memory_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetailedProgress {
    #[serde(flatten)]
    pub snapshot: ProgressSnapshot,
    pub analytics: ProgressAnalytics,
}
