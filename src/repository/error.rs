// ==========================================
// POS 导入核心 - 持久化错误
// ==========================================
// 覆盖: 任务表 / 映射表 / 导入记录表
// ==========================================

use rusqlite::ErrorCode;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("{entity} 不存在: {id}")]
    NotFound { entity: String, id: String },

    /// 共享连接的互斥锁已中毒
    #[error("连接锁不可用: {0}")]
    LockError(String),

    /// 批次事务开启或提交失败，整批不落库
    #[error("事务失败: {0}")]
    DatabaseTransactionError(String),

    #[error("SQL 执行失败: {0}")]
    DatabaseQueryError(String),

    #[error("重复键: {0}")]
    UniqueConstraintViolation(String),

    /// 写入前已越过任务截止时间
    #[error("写入超时: {0}")]
    Timeout(String),

    #[error("任务状态不可从 {from} 变为 {to}")]
    InvalidStateTransition { from: String, to: String },

    /// 表内存储的值无法还原为领域类型
    #[error("列 {field} 取值异常: {message}")]
    FieldValueError { field: String, message: String },

    #[error("JSON 编解码失败: {0}")]
    SerializationError(String),
}

impl RepositoryError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, RepositoryError::Timeout(_))
    }
}

impl From<rusqlite::Error> for RepositoryError {
    fn from(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::QueryReturnedNoRows => RepositoryError::NotFound {
                entity: "row".to_string(),
                id: "-".to_string(),
            },
            rusqlite::Error::SqliteFailure(code, msg) => {
                let detail = msg.unwrap_or_else(|| code.to_string());
                match code.code {
                    ErrorCode::ConstraintViolation if detail.contains("UNIQUE") => {
                        RepositoryError::UniqueConstraintViolation(detail)
                    }
                    ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => {
                        RepositoryError::DatabaseTransactionError(detail)
                    }
                    _ => RepositoryError::DatabaseQueryError(detail),
                }
            }
            other => RepositoryError::DatabaseQueryError(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for RepositoryError {
    fn from(err: serde_json::Error) -> Self {
        RepositoryError::SerializationError(err.to_string())
    }
}

pub type RepositoryResult<T> = Result<T, RepositoryError>;
