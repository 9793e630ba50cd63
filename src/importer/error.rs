// ==========================================
// POS 导入核心 - 导入模块错误类型
// ==========================================
// 约定: 行级 / 批次级问题以结果值累积，只有任务级不可恢复问题才走 ImportError
// ==========================================

use crate::domain::quality::DqViolation;
use crate::domain::types::FailureReason;
use crate::repository::error::RepositoryError;
use thiserror::Error;

/// 导入模块错误类型
#[derive(Error, Debug)]
pub enum ImportError {
    // ===== 文件相关错误 =====
    #[error("文件不存在: {0}")]
    FileNotFound(String),

    #[error("文件格式不支持: {0}（支持 .csv/.txt/.xlsx/.xls/.ods/.json）")]
    UnsupportedFormat(String),

    #[error("文件读取失败: {0}")]
    FileReadError(String),

    #[error("文件为空: {0}")]
    EmptyFile(String),

    #[error("文件结构校验失败: {0}")]
    InvalidFormat(String),

    #[error("Excel 解析失败: {0}")]
    ExcelParseError(String),

    #[error("CSV 解析失败: {0}")]
    CsvParseError(String),

    #[error("JSON 解析失败: {0}")]
    JsonParseError(String),

    #[error("工作表不存在: {0}")]
    SheetNotFound(String),

    // ===== 数据映射错误 =====
    #[error("字段映射失败: {0}")]
    FieldMappingError(String),

    // ===== 任务控制 =====
    #[error("导入任务不存在: {0}")]
    JobNotFound(String),

    #[error("重复上传: 内容与已完成任务 {job_id} 相同")]
    DuplicateUpload { job_id: String },

    #[error("任务已取消: {0}")]
    Cancelled(String),

    #[error("超出时间预算: {0}")]
    Timeout(String),

    #[error("无法回滚: {0}")]
    RollbackUnavailable(String),

    // ===== 配置错误 =====
    #[error("配置读取失败 (key: {key}): {message}")]
    ConfigReadError { key: String, message: String },

    #[error("配置值格式错误 (key: {key}, value: {value}): {message}")]
    ConfigValueError {
        key: String,
        value: String,
        message: String,
    },

    // ===== 存储错误 =====
    #[error("存储失败: {0}")]
    Repository(#[from] RepositoryError),

    // ===== 通用错误 =====
    #[error("内部错误: {0}")]
    InternalError(String),
}

impl ImportError {
    /// 任务级失败原因归类
    pub fn failure_reason(&self) -> FailureReason {
        match self {
            ImportError::Timeout(_) => FailureReason::Timeout,
            ImportError::FileNotFound(_)
            | ImportError::UnsupportedFormat(_)
            | ImportError::FileReadError(_)
            | ImportError::EmptyFile(_)
            | ImportError::InvalidFormat(_)
            | ImportError::ExcelParseError(_)
            | ImportError::CsvParseError(_)
            | ImportError::JsonParseError(_)
            | ImportError::SheetNotFound(_) => FailureReason::Format,
            _ => FailureReason::Internal,
        }
    }
}

impl From<std::io::Error> for ImportError {
    fn from(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            ImportError::FileNotFound(err.to_string())
        } else {
            ImportError::FileReadError(err.to_string())
        }
    }
}

impl From<csv::Error> for ImportError {
    fn from(err: csv::Error) -> Self {
        ImportError::CsvParseError(err.to_string())
    }
}

impl From<calamine::Error> for ImportError {
    fn from(err: calamine::Error) -> Self {
        ImportError::ExcelParseError(err.to_string())
    }
}

impl From<serde_json::Error> for ImportError {
    fn from(err: serde_json::Error) -> Self {
        ImportError::JsonParseError(err.to_string())
    }
}

impl From<rusqlite::Error> for ImportError {
    fn from(err: rusqlite::Error) -> Self {
        ImportError::Repository(RepositoryError::from(err))
    }
}

// ==========================================
// RowError - 行级失败
// ==========================================
// 行级失败只累加 failed，不中断批次
#[derive(Error, Debug, Clone, PartialEq)]
#[error("行 {row_number} 校验失败（{} 项）", violations.len())]
pub struct RowError {
    pub row_number: usize,
    pub violations: Vec<DqViolation>,
}

impl RowError {
    pub fn new(row_number: usize, violations: Vec<DqViolation>) -> Self {
        Self {
            row_number,
            violations,
        }
    }
}

/// Result 类型别名
pub type ImportResult<T> = Result<T, ImportError>;
