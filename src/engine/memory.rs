// ==========================================
// POS 导入核心 - 内存探针
// ==========================================
// 职责: 读取当前进程常驻内存，供批次大小计算与内存压力判断使用
// 平台: Linux 读 /proc/self/statm；其他平台返回 0（视为无压力）
// ==========================================

use crate::config::ImportConfig;
use std::sync::atomic::{AtomicU64, Ordering};

/// statm 以页为单位
const PAGE_SIZE_BYTES: u64 = 4096;

pub trait MemoryProbe: Send + Sync {
    /// 当前内存占用（字节）
    fn current_usage(&self) -> u64;
}

// ==========================================
// ProcessMemoryProbe - 进程 RSS
// ==========================================
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessMemoryProbe;

impl MemoryProbe for ProcessMemoryProbe {
    fn current_usage(&self) -> u64 {
        read_rss_bytes().unwrap_or(0)
    }
}

#[cfg(target_os = "linux")]
fn read_rss_bytes() -> Option<u64> {
    let content = std::fs::read_to_string("/proc/self/statm").ok()?;
    let pages = content.split_whitespace().nth(1)?.parse::<u64>().ok()?;
    Some(pages * PAGE_SIZE_BYTES)
}

#[cfg(not(target_os = "linux"))]
fn read_rss_bytes() -> Option<u64> {
    None
}

// ==========================================
// FixedMemoryProbe - 固定读数（可在运行中调整）
// ==========================================
#[derive(Debug, Default)]
pub struct FixedMemoryProbe {
    usage: AtomicU64,
}

impl FixedMemoryProbe {
    pub fn new(usage: u64) -> Self {
        Self {
            usage: AtomicU64::new(usage),
        }
    }

    pub fn set(&self, usage: u64) {
        self.usage.store(usage, Ordering::Relaxed);
    }
}

impl MemoryProbe for FixedMemoryProbe {
    fn current_usage(&self) -> u64 {
        self.usage.load(Ordering::Relaxed)
    }
}

// ==========================================
// 内存预算
// ==========================================

/// 可用内存 = 上限 − 当前占用
pub fn available_memory(config: &ImportConfig, usage: u64) -> u64 {
    config.effective_memory_limit().saturating_sub(usage)
}

/// 占用是否超过压力阈值（上限 × memory_pressure_ratio）
pub fn under_pressure(config: &ImportConfig, usage: u64) -> bool {
    let threshold = config.effective_memory_limit() as f64 * config.memory_pressure_ratio;
    usage as f64 > threshold
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_budget_with_limit() {
        let config = ImportConfig {
            memory_limit_bytes: Some(1000),
            ..Default::default()
        };
        assert_eq!(available_memory(&config, 300), 700);
        assert_eq!(available_memory(&config, 5000), 0);
        assert!(!under_pressure(&config, 800));
        assert!(under_pressure(&config, 801));
    }

    #[test]
    fn test_unlimited_is_capped() {
        let config = ImportConfig {
            memory_limit_bytes: None,
            ..Default::default()
        };
        assert_eq!(
            available_memory(&config, 0),
            crate::config::import_config::UNLIMITED_MEMORY_CAP_BYTES
        );
    }

    #[test]
    fn test_fixed_probe() {
        let probe = FixedMemoryProbe::new(10);
        assert_eq!(probe.current_usage(), 10);
        probe.set(42);
        assert_eq!(probe.current_usage(), 42);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_process_probe_reads_rss() {
        assert!(ProcessMemoryProbe.current_usage() > 0);
    }
}
