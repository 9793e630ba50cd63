// ==========================================
// POS 导入核心 - 领域模型层
// ==========================================
// 职责: 定义导入任务、映射配置、行记录、进度快照与枚举类型
// 红线: 不含数据访问逻辑，不含解析 / 引擎逻辑
// ==========================================

pub mod format;
pub mod import_job;
pub mod mapping;
pub mod progress;
pub mod quality;
pub mod record;
pub mod types;

// 重导出核心类型
pub use format::{
    ClassificationIndicators, ClassificationReport, Encoding, FormatDescriptor, FormatIssue,
    FormatValidation,
};
pub use import_job::{
    CounterDelta, FailedBatch, ImportJob, ImportResults, JobCounters, JobFailure,
    RollbackPayload,
};
pub use mapping::{FieldMappingEntry, ImportMapping, MatchKind};
pub use progress::{
    BatchProgress, DetailedProgress, ProgressAnalytics, ProgressPoint, ProgressSnapshot,
    ProgressUpdate,
};
pub use quality::{DqLevel, DqViolation};
pub use record::{MappedRecord, Record};
pub use types::{
    FailureReason, FormatType, ImportStatus, ImportStrategy, ImportType, PerformanceRating,
    ProgressPhase, SourceFormat,
};
