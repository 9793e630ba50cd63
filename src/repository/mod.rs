// ==========================================
// POS 导入核心 - 数据仓储层
// ==========================================
// 职责: 导入任务 / 映射配置 / 标准记录的持久化，屏蔽 SQLite 细节
// 约束: 所有查询使用参数化；计数器只做原子累加
// 红线: Repository 不含业务逻辑
// ==========================================

pub mod error;
pub mod import_job_repo;
pub mod import_mapping_repo;
pub mod record_sink;

// 重导出核心仓储
pub use error::{RepositoryError, RepositoryResult};
pub use import_job_repo::{ImportJobRepository, SqliteImportJobRepository};
pub use import_mapping_repo::{ImportMappingRepository, SqliteImportMappingRepository};
pub use record_sink::{RecordSink, SqliteRecordSink};
