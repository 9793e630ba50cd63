// ==========================================
// POS 导入核心
// ==========================================
// 输入: 来源未知的 POS 导出文件（CSV / 表格 / JSON / 汇总报表）
// 输出: 按导入类型落库的标准记录 + 可回滚的导入任务
// 流程: 识别 → 分类 → 映射 → 校验 → 分批写入
// ==========================================

// 任务、映射、记录、质量等实体
pub mod domain;

// SQLite 持久化
pub mod repository;

// 分批执行、暂停取消、进度、内存
pub mod engine;

// 文件读取与导入编排
pub mod importer;

pub mod config;
pub mod db;
pub mod logging;
pub mod perf;

pub use domain::types::{
    FailureReason, FormatType, ImportStatus, ImportStrategy, ImportType, PerformanceRating,
    ProgressPhase, SourceFormat,
};
pub use domain::{
    ClassificationReport, FormatDescriptor, ImportJob, ImportMapping, MappedRecord,
    ProgressSnapshot, Record,
};
pub use engine::{BatchProcessor, JobControl, ProgressTracker};
pub use importer::{ImportError, ImportRequest, ImportResult, ImportService, SourceFile};
pub use config::{ConfigManager, ImportConfig};
