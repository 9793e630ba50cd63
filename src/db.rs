// ==========================================
// POS 导入核心 - SQLite 连接初始化
// ==========================================
// 表: config_kv / import_job / import_mapping / import_record
// 所有连接经 open_sqlite_connection 打开，PRAGMA 与语句追踪一致
// ==========================================

use rusqlite::Connection;
use rusqlite::OptionalExtension;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// 默认 busy_timeout（毫秒）
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// 当前代码所期望的 schema_version
pub const CURRENT_SCHEMA_VERSION: i64 = 1;

/// 配置 SQLite 连接的统一 PRAGMA
///
/// 说明：
/// - foreign_keys 需要"每个连接"单独开启
/// - busy_timeout 需要"每个连接"单独配置
pub fn configure_sqlite_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.busy_timeout(Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS))?;
    Ok(())
}

/// 打开 SQLite 连接并应用统一配置
pub fn open_sqlite_connection(db_path: &str) -> rusqlite::Result<Connection> {
    let mut conn = Connection::open(db_path)?;
    configure_sqlite_connection(&conn)?;
    crate::perf::install_sqlite_tracing(&mut conn);
    Ok(conn)
}

/// 默认数据库路径
///
/// 优先环境变量 POS_IMPORT_DB，其次用户数据目录，最后当前目录
pub fn default_db_path() -> String {
    if let Ok(path) = std::env::var("POS_IMPORT_DB") {
        let trimmed = path.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }

    let mut path = PathBuf::from("./pos_import.db");
    if let Some(data_dir) = dirs::data_dir() {
        let dir = data_dir.join("pos-import");
        if std::fs::create_dir_all(&dir).is_ok() {
            path = dir.join("pos_import.db");
        }
    }
    path.to_string_lossy().to_string()
}

/// 打开连接、建表，返回共享句柄（仓储层共用）
pub fn open_shared(db_path: &str) -> rusqlite::Result<Arc<Mutex<Connection>>> {
    let conn = open_sqlite_connection(db_path)?;
    init_schema(&conn)?;
    Ok(Arc::new(Mutex::new(conn)))
}

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS schema_version (
    version     INTEGER PRIMARY KEY,
    applied_at  TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS config_kv (
    scope_id    TEXT NOT NULL,
    key         TEXT NOT NULL,
    value       TEXT NOT NULL,
    updated_at  TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (scope_id, key)
);

CREATE TABLE IF NOT EXISTS import_job (
    job_id                   TEXT PRIMARY KEY,
    name                     TEXT NOT NULL,
    import_type              TEXT NOT NULL,
    pos_system               TEXT,
    original_filename        TEXT NOT NULL,
    file_size                INTEGER NOT NULL,
    mime_type                TEXT NOT NULL,
    content_hash             TEXT,
    status                   TEXT NOT NULL,
    total_records            INTEGER NOT NULL DEFAULT 0,
    processed_records        INTEGER NOT NULL DEFAULT 0,
    successful_imports       INTEGER NOT NULL DEFAULT 0,
    failed_imports           INTEGER NOT NULL DEFAULT 0,
    skipped_records          INTEGER NOT NULL DEFAULT 0,
    progress_percentage      REAL NOT NULL DEFAULT 0,
    started_at               TEXT,
    completed_at             TEXT,
    processing_time_seconds  REAL,
    validation_errors        TEXT NOT NULL DEFAULT '[]',
    validation_error_count   INTEGER NOT NULL DEFAULT 0,
    data_quality_score       REAL,
    field_mapping_snapshot   TEXT,
    import_results           TEXT NOT NULL DEFAULT '{}',
    can_rollback             INTEGER NOT NULL DEFAULT 0,
    rollback_data            TEXT,
    error_detail             TEXT,
    created_at               TEXT NOT NULL,
    updated_at               TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_import_job_hash ON import_job (content_hash, status);

CREATE TABLE IF NOT EXISTS import_mapping (
    mapping_id        TEXT PRIMARY KEY,
    name              TEXT NOT NULL,
    import_type       TEXT NOT NULL,
    pos_system        TEXT,
    field_mappings    TEXT NOT NULL,
    sample_data       TEXT NOT NULL DEFAULT '[]',
    detected_columns  TEXT NOT NULL DEFAULT '[]',
    confidence        INTEGER NOT NULL DEFAULT 0,
    is_active         INTEGER NOT NULL DEFAULT 1,
    is_default        INTEGER NOT NULL DEFAULT 0,
    usage_count       INTEGER NOT NULL DEFAULT 0,
    last_used_at      TEXT,
    created_at        TEXT NOT NULL,
    updated_at        TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_import_mapping_pair ON import_mapping (import_type, pos_system, is_active);

CREATE TABLE IF NOT EXISTS import_record (
    job_id       TEXT NOT NULL REFERENCES import_job (job_id) ON DELETE CASCADE,
    batch_index  INTEGER NOT NULL,
    row_number   INTEGER NOT NULL,
    import_type  TEXT NOT NULL,
    payload      TEXT NOT NULL,
    created_at   TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (job_id, row_number)
);

CREATE INDEX IF NOT EXISTS idx_import_record_batch ON import_record (job_id, batch_index);
"#;

/// 建表（幂等）并写入 schema_version
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;
    conn.execute(
        "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)",
        [CURRENT_SCHEMA_VERSION],
    )?;
    Ok(())
}

/// 读取 schema_version（若表不存在则返回 None）
pub fn read_schema_version(conn: &Connection) -> rusqlite::Result<Option<i64>> {
    let has_table: bool = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version' LIMIT 1",
            [],
            |_row| Ok(true),
        )
        .optional()?
        .unwrap_or(false);

    if !has_table {
        return Ok(None);
    }

    let v: Option<i64> = conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))?;
    Ok(v)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        assert_eq!(read_schema_version(&conn).unwrap(), None);
        init_schema(&conn).unwrap();
        init_schema(&conn).unwrap();
        assert_eq!(read_schema_version(&conn).unwrap(), Some(CURRENT_SCHEMA_VERSION));
    }
}
