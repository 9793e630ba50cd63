// ==========================================
// POS 导入核心 - 配置管理器
// ==========================================
// 职责: 配置加载、查询、覆写管理
// 存储: config_kv 表 (scope_id + key + value)
// ==========================================

use crate::config::import_config::ImportConfig;
use crate::db::open_sqlite_connection;
use crate::importer::error::{ImportError, ImportResult};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// 全局作用域
pub const GLOBAL_SCOPE: &str = "global";

// ==========================================
// ConfigManager - 配置管理器
// ==========================================
pub struct ConfigManager {
    conn: Arc<Mutex<Connection>>,
}

impl ConfigManager {
    /// 创建新的 ConfigManager 实例
    pub fn new(db_path: &str) -> ImportResult<Self> {
        let conn = open_sqlite_connection(db_path)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// 从已有连接创建 ConfigManager
    ///
    /// 说明：会对传入连接再次应用统一 PRAGMA（幂等）
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> ImportResult<Self> {
        {
            let guard = conn.lock().map_err(|e| lock_error(&e))?;
            crate::db::configure_sqlite_connection(&guard)?;
        }
        Ok(Self { conn })
    }

    /// 读取 global scope 的配置值
    pub fn get_global_config_value(&self, key: &str) -> ImportResult<Option<String>> {
        let conn = self.conn.lock().map_err(|e| lock_error(&e))?;
        conn.query_row(
            "SELECT value FROM config_kv WHERE scope_id = ?1 AND key = ?2",
            params![GLOBAL_SCOPE, key],
            |row| row.get::<_, String>(0),
        )
        .optional()
        .map_err(|e| ImportError::ConfigReadError {
            key: key.to_string(),
            message: e.to_string(),
        })
    }

    /// 写入 global scope 的配置值（UPSERT）
    pub fn set_global_config_value(&self, key: &str, value: &str) -> ImportResult<()> {
        let conn = self.conn.lock().map_err(|e| lock_error(&e))?;
        conn.execute(
            "INSERT INTO config_kv (scope_id, key, value, updated_at) VALUES (?1, ?2, ?3, datetime('now'))
             ON CONFLICT(scope_id, key) DO UPDATE SET value = ?3, updated_at = datetime('now')",
            params![GLOBAL_SCOPE, key, value],
        )?;
        Ok(())
    }

    /// 所有 global 配置
    pub fn global_entries(&self) -> ImportResult<BTreeMap<String, String>> {
        let conn = self.conn.lock().map_err(|e| lock_error(&e))?;
        let mut stmt =
            conn.prepare("SELECT key, value FROM config_kv WHERE scope_id = ?1 ORDER BY key")?;
        let rows = stmt.query_map(params![GLOBAL_SCOPE], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        let mut out = BTreeMap::new();
        for row in rows {
            let (key, value) = row?;
            out.insert(key, value);
        }
        Ok(out)
    }

    /// 配置快照（JSON），写入任务结果用于追溯
    pub fn get_config_snapshot(&self) -> ImportResult<String> {
        Ok(serde_json::to_string(&json!(self.global_entries()?))?)
    }

    /// 默认值 → config_kv → 环境变量
    pub fn load_import_config(&self) -> ImportResult<ImportConfig> {
        let mut config = ImportConfig::default();
        for (key, value) in self.global_entries()? {
            match config.apply_value(&key, &value) {
                Ok(true) => debug!(key = %key, value = %value, "应用 config_kv 配置"),
                Ok(false) => {}
                Err(e) => warn!(key = %key, value = %value, error = %e, "配置值无效，保留默认值"),
            }
        }
        config.with_env_overrides()
    }
}

fn lock_error<T>(e: &std::sync::PoisonError<T>) -> ImportError {
    ImportError::InternalError(format!("锁获取失败: {}", e))
}

// ==========================================
// 配置键常量
// ==========================================
pub mod config_keys {
    // 批次大小
    pub const MEMORY_LIMIT_BYTES: &str = "memory_limit_bytes";
    pub const MEMORY_BATCH_FRACTION: &str = "memory_batch_fraction";
    pub const MIN_BATCH_SIZE: &str = "min_batch_size";
    pub const MAX_BATCH_SIZE: &str = "max_batch_size";
    pub const LARGE_FILE_ROWS: &str = "large_file_rows";
    pub const LARGE_FILE_MAX_BATCH: &str = "large_file_max_batch";
    pub const MEMORY_PRESSURE_RATIO: &str = "memory_pressure_ratio";

    // 并行
    pub const PARALLEL_ENABLED: &str = "parallel_enabled";
    pub const PARALLEL_THRESHOLD_BATCHES: &str = "parallel_threshold_batches";
    pub const MAX_CONCURRENCY: &str = "max_concurrency";

    // 重试与超时
    pub const MAX_BATCH_RETRIES: &str = "max_batch_retries";
    pub const RETRY_BACKOFF_MS: &str = "retry_backoff_ms";
    pub const BATCH_TIMEOUT_SECS: &str = "batch_timeout_secs";
    pub const JOB_TIMEOUT_SECS: &str = "job_timeout_secs";

    // 进度
    pub const PROGRESS_TTL_SECS: &str = "progress_ttl_secs";
    pub const PROGRESS_ARCHIVE_TTL_SECS: &str = "progress_archive_ttl_secs";
    pub const PROGRESS_HISTORY_LEN: &str = "progress_history_len";
    pub const PROGRESS_MILESTONE_ROWS: &str = "progress_milestone_rows";

    // 回滚 / 去重
    pub const ROLLBACK_WINDOW_HOURS: &str = "rollback_window_hours";
    pub const REJECT_DUPLICATE_UPLOADS: &str = "reject_duplicate_uploads";

    pub const SPOOL_DIR: &str = "spool_dir";

    pub const ALL: &[&str] = &[
        MEMORY_LIMIT_BYTES,
        MEMORY_BATCH_FRACTION,
        MIN_BATCH_SIZE,
        MAX_BATCH_SIZE,
        LARGE_FILE_ROWS,
        LARGE_FILE_MAX_BATCH,
        MEMORY_PRESSURE_RATIO,
        PARALLEL_ENABLED,
        PARALLEL_THRESHOLD_BATCHES,
        MAX_CONCURRENCY,
        MAX_BATCH_RETRIES,
        RETRY_BACKOFF_MS,
        BATCH_TIMEOUT_SECS,
        JOB_TIMEOUT_SECS,
        PROGRESS_TTL_SECS,
        PROGRESS_ARCHIVE_TTL_SECS,
        PROGRESS_HISTORY_LEN,
        PROGRESS_MILESTONE_ROWS,
        ROLLBACK_WINDOW_HOURS,
        REJECT_DUPLICATE_UPLOADS,
        SPOOL_DIR,
    ];
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> ConfigManager {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::init_schema(&conn).unwrap();
        ConfigManager::from_connection(Arc::new(Mutex::new(conn))).unwrap()
    }

    #[test]
    fn test_kv_overrides_defaults() {
        let cm = manager();
        cm.set_global_config_value(config_keys::MAX_CONCURRENCY, "3").unwrap();
        cm.set_global_config_value(config_keys::MAX_CONCURRENCY, "4").unwrap();
        cm.set_global_config_value(config_keys::MIN_BATCH_SIZE, "not-a-number").unwrap();

        let cfg = cm.load_import_config().unwrap();
        assert_eq!(cfg.max_concurrency, 4);
        // 无效值保留默认
        assert_eq!(cfg.min_batch_size, 100);
    }

    #[test]
    fn test_snapshot_contains_entries() {
        let cm = manager();
        cm.set_global_config_value(config_keys::ROLLBACK_WINDOW_HOURS, "48").unwrap();
        let snapshot = cm.get_config_snapshot().unwrap();
        assert!(snapshot.contains("\"rollback_window_hours\":\"48\""));
        assert_eq!(
            cm.get_global_config_value("missing").unwrap(),
            None
        );
    }

    #[test]
    fn test_all_keys_are_known() {
        let mut cfg = ImportConfig::default();
        for key in config_keys::ALL {
            // 每个键都能被识别（值不合法时返回 Err 也说明已识别）
            let known = cfg.apply_value(key, "1").unwrap_or(true);
            assert!(known, "unknown key {}", key);
        }
    }
}
