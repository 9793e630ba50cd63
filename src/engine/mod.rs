// ==========================================
// POS 导入核心 - 引擎层
// ==========================================
// 职责: 分批执行 / 批次大小 / 内存探针 / 任务控制 / 进度跟踪
// 红线: 引擎不拼 SQL，存储只经 repository trait
// ==========================================

pub mod batch_processor;
pub mod batch_sizing;
pub mod job_control;
pub mod memory;
pub mod progress_tracker;

// 重导出核心类型
pub use batch_processor::{BatchContext, BatchError, BatchProcessor, BatchReport, BatchRequest};
pub use batch_sizing::BatchPlan;
pub use job_control::{JobControl, JobSignal};
pub use memory::{FixedMemoryProbe, MemoryProbe, ProcessMemoryProbe};
pub use progress_tracker::ProgressTracker;
