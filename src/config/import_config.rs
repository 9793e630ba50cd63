// ==========================================
// POS 导入核心 - 导入配置
// ==========================================
// 来源优先级（低 → 高）: 默认值 → config_kv（global）→ 环境变量 POS_IMPORT_<KEY>
// 内存上限为 None 时按"不限但封顶"处理（封顶 2 GiB）
// ==========================================

use crate::config::config_manager::config_keys;
use crate::importer::error::{ImportError, ImportResult};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// 环境变量前缀
pub const ENV_PREFIX: &str = "POS_IMPORT_";

/// 内存上限未配置时的封顶值
pub const UNLIMITED_MEMORY_CAP_BYTES: u64 = 2 * 1024 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportConfig {
    // ===== 批次大小 =====
    pub memory_limit_bytes: Option<u64>,
    pub memory_batch_fraction: f64,
    pub min_batch_size: usize,
    pub max_batch_size: usize,
    pub large_file_rows: u64,
    pub large_file_max_batch: usize,
    pub memory_pressure_ratio: f64,

    // ===== 并行 =====
    pub parallel_enabled: bool,
    pub parallel_threshold_batches: usize,
    pub max_concurrency: usize,

    // ===== 重试与超时 =====
    pub max_batch_retries: u32,
    pub retry_backoff_ms: u64,
    pub batch_timeout_secs: u64,
    pub job_timeout_secs: u64,

    // ===== 进度 =====
    pub progress_ttl_secs: u64,
    pub progress_archive_ttl_secs: u64,
    pub progress_history_len: usize,
    pub progress_milestone_rows: u64,

    // ===== 回滚 / 去重 =====
    pub rollback_window_hours: i64,
    pub reject_duplicate_uploads: bool,

    pub spool_dir: PathBuf,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            memory_limit_bytes: Some(512 * 1024 * 1024),
            memory_batch_fraction: 0.30,
            min_batch_size: 100,
            max_batch_size: 1000,
            large_file_rows: 100_000,
            large_file_max_batch: 500,
            memory_pressure_ratio: 0.80,
            parallel_enabled: true,
            parallel_threshold_batches: 3,
            max_concurrency: 5,
            max_batch_retries: 2,
            retry_backoff_ms: 200,
            batch_timeout_secs: 300,
            job_timeout_secs: 3600,
            progress_ttl_secs: 3600,
            progress_archive_ttl_secs: 604_800,
            progress_history_len: 20,
            progress_milestone_rows: 100,
            rollback_window_hours: 24,
            reject_duplicate_uploads: false,
            spool_dir: default_spool_dir(),
        }
    }
}

fn default_spool_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("pos-import")
        .join("spool")
}

impl ImportConfig {
    /// 实际生效的内存上限
    pub fn effective_memory_limit(&self) -> u64 {
        self.memory_limit_bytes.unwrap_or(UNLIMITED_MEMORY_CAP_BYTES)
    }

    pub fn batch_timeout(&self) -> Duration {
        Duration::from_secs(self.batch_timeout_secs)
    }

    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }

    pub fn retry_backoff(&self, attempt: u32) -> Duration {
        // 指数退避: base × 2^(attempt-1)
        let factor = 1u64 << attempt.saturating_sub(1).min(10);
        Duration::from_millis(self.retry_backoff_ms.saturating_mul(factor))
    }

    /// 按键写入单个配置值（config_kv 与环境变量共用）
    ///
    /// 未知键返回 Ok(false)
    pub fn apply_value(&mut self, key: &str, raw: &str) -> ImportResult<bool> {
        let v = raw.trim();
        match key {
            config_keys::MEMORY_LIMIT_BYTES => {
                self.memory_limit_bytes = match v.to_lowercase().as_str() {
                    "" | "none" | "unlimited" | "-1" => None,
                    _ => Some(parse(key, v)?),
                }
            }
            config_keys::MEMORY_BATCH_FRACTION => self.memory_batch_fraction = parse(key, v)?,
            config_keys::MIN_BATCH_SIZE => self.min_batch_size = parse(key, v)?,
            config_keys::MAX_BATCH_SIZE => self.max_batch_size = parse(key, v)?,
            config_keys::LARGE_FILE_ROWS => self.large_file_rows = parse(key, v)?,
            config_keys::LARGE_FILE_MAX_BATCH => self.large_file_max_batch = parse(key, v)?,
            config_keys::MEMORY_PRESSURE_RATIO => self.memory_pressure_ratio = parse(key, v)?,
            config_keys::PARALLEL_ENABLED => self.parallel_enabled = parse_bool(key, v)?,
            config_keys::PARALLEL_THRESHOLD_BATCHES => {
                self.parallel_threshold_batches = parse(key, v)?
            }
            config_keys::MAX_CONCURRENCY => self.max_concurrency = parse(key, v)?,
            config_keys::MAX_BATCH_RETRIES => self.max_batch_retries = parse(key, v)?,
            config_keys::RETRY_BACKOFF_MS => self.retry_backoff_ms = parse(key, v)?,
            config_keys::BATCH_TIMEOUT_SECS => self.batch_timeout_secs = parse(key, v)?,
            config_keys::JOB_TIMEOUT_SECS => self.job_timeout_secs = parse(key, v)?,
            config_keys::PROGRESS_TTL_SECS => self.progress_ttl_secs = parse(key, v)?,
            config_keys::PROGRESS_ARCHIVE_TTL_SECS => {
                self.progress_archive_ttl_secs = parse(key, v)?
            }
            config_keys::PROGRESS_HISTORY_LEN => self.progress_history_len = parse(key, v)?,
            config_keys::PROGRESS_MILESTONE_ROWS => self.progress_milestone_rows = parse(key, v)?,
            config_keys::ROLLBACK_WINDOW_HOURS => self.rollback_window_hours = parse(key, v)?,
            config_keys::REJECT_DUPLICATE_UPLOADS => {
                self.reject_duplicate_uploads = parse_bool(key, v)?
            }
            config_keys::SPOOL_DIR => self.spool_dir = PathBuf::from(v),
            _ => return Ok(false),
        }
        Ok(true)
    }

    /// 用环境变量覆盖（POS_IMPORT_MAX_BATCH_SIZE=800 等）
    pub fn with_env_overrides(mut self) -> ImportResult<Self> {
        for key in config_keys::ALL {
            let var = format!("{}{}", ENV_PREFIX, key.to_uppercase());
            if let Ok(value) = std::env::var(&var) {
                self.apply_value(key, &value)?;
            }
        }
        self.validate()?;
        Ok(self)
    }

    /// 组合约束校验
    pub fn validate(&self) -> ImportResult<()> {
        let fail = |key: &str, value: String, message: &str| {
            Err(ImportError::ConfigValueError {
                key: key.to_string(),
                value,
                message: message.to_string(),
            })
        };
        if self.min_batch_size == 0 || self.min_batch_size > self.max_batch_size {
            return fail(
                config_keys::MIN_BATCH_SIZE,
                self.min_batch_size.to_string(),
                "须大于 0 且不超过 max_batch_size",
            );
        }
        if !(0.0..=1.0).contains(&self.memory_batch_fraction) || self.memory_batch_fraction == 0.0 {
            return fail(
                config_keys::MEMORY_BATCH_FRACTION,
                self.memory_batch_fraction.to_string(),
                "须在 (0, 1] 之间",
            );
        }
        if !(0.0..=1.0).contains(&self.memory_pressure_ratio) {
            return fail(
                config_keys::MEMORY_PRESSURE_RATIO,
                self.memory_pressure_ratio.to_string(),
                "须在 [0, 1] 之间",
            );
        }
        if self.max_concurrency == 0 {
            return fail(config_keys::MAX_CONCURRENCY, "0".to_string(), "须大于 0");
        }
        Ok(())
    }
}

fn parse<T: std::str::FromStr>(key: &str, value: &str) -> ImportResult<T>
where
    T::Err: std::fmt::Display,
{
    value.parse::<T>().map_err(|e| ImportError::ConfigValueError {
        key: key.to_string(),
        value: value.to_string(),
        message: e.to_string(),
    })
}

fn parse_bool(key: &str, value: &str) -> ImportResult<bool> {
    match value.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ImportError::ConfigValueError {
            key: key.to_string(),
            value: value.to_string(),
            message: "期望布尔值".to_string(),
        }),
    }
}
