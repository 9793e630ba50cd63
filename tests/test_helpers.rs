// ==========================================
// 测试辅助函数
// ==========================================
// 职责: 临时数据库、临时源文件、小批次配置、服务装配
// ==========================================

#![allow(dead_code)]

use pos_import::config::ImportConfig;
use pos_import::db;
use pos_import::engine::FixedMemoryProbe;
use pos_import::importer::{ImportService, SourceFile};
use rusqlite::Connection;
use std::error::Error;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tempfile::{NamedTempFile, TempDir};

/// 创建临时测试数据库并初始化 schema
///
/// # 返回
/// - NamedTempFile: 临时数据库文件（需要保持存活）
/// - String: 数据库文件路径
pub fn create_test_db() -> Result<(NamedTempFile, String), Box<dyn Error>> {
    pos_import::logging::init_test();
    let temp_file = NamedTempFile::new()?;
    let db_path = temp_file.path().to_string_lossy().to_string();
    let conn = db::open_sqlite_connection(&db_path)?;
    db::init_schema(&conn)?;
    Ok((temp_file, db_path))
}

pub fn open_shared(db_path: &str) -> Arc<Mutex<Connection>> {
    db::open_shared(db_path).expect("打开测试数据库失败")
}

/// 在临时目录写入源文件
pub fn write_source(dir: &TempDir, file_name: &str, content: &[u8]) -> SourceFile {
    let path = dir.path().join(file_name);
    std::fs::write(&path, content).expect("写入测试文件失败");
    SourceFile::from_path(&path).expect("构造源文件失败")
}

/// 菜单 CSV：Item Name / Item Code / Selling Price
pub fn menu_csv(rows: usize) -> String {
    let mut out = String::from("Item Name,Item Code,Selling Price\n");
    for i in 0..rows {
        out.push_str(&format!("Dish {:04},SKU{:04},{:.2}\n", i + 1, i + 1, 5.0 + i as f64));
    }
    out
}

/// 固定批次大小的配置（min = max = batch_size），spool 落在临时目录
pub fn batch_config(batch_size: usize, spool_root: &Path) -> ImportConfig {
    ImportConfig {
        min_batch_size: batch_size,
        max_batch_size: batch_size,
        retry_backoff_ms: 1,
        spool_dir: spool_root.join("spool"),
        ..Default::default()
    }
}

/// 内存读数固定为 0 的服务
pub fn create_service(db_path: &str, config: ImportConfig) -> ImportService {
    ImportService::with_memory_probe(
        open_shared(db_path),
        config,
        Arc::new(FixedMemoryProbe::new(0)),
    )
}
