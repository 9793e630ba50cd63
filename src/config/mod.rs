// ==========================================
// POS 导入核心 - 配置层
// ==========================================
// 职责: 导入参数管理，支持多级覆写
// 存储: config_kv 表 + 环境变量
// ==========================================

pub mod config_manager;
pub mod import_config;

// 重导出核心配置管理器
pub use config_manager::{config_keys, ConfigManager};
pub use import_config::ImportConfig;
