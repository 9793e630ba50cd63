// ==========================================
// POS 导入核心 - 批次大小计算
// ==========================================
// 规则: 每行字节数 = 文件大小 / 总行数（行数未知时按 1 KB）
//       批次大小 = 可用内存 × memory_batch_fraction / 每行字节数
//       截断到 [min_batch_size, max_batch_size]，总行数超过 large_file_rows 时再封顶
// 模式: 预计批次数 > parallel_threshold_batches 且允许并行 → 并行
// ==========================================

use crate::config::ImportConfig;
use serde::Serialize;

/// 行数未知时的每行字节估计
pub const DEFAULT_BYTES_PER_ROW: u64 = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BatchPlan {
    pub batch_size: usize,
    pub estimated_batches: usize,
    pub bytes_per_row: u64,
    pub parallel: bool,
}

pub fn bytes_per_row(file_size: u64, total_rows: u64) -> u64 {
    if total_rows == 0 {
        return DEFAULT_BYTES_PER_ROW;
    }
    (file_size / total_rows).max(1)
}

pub fn compute_batch_size(
    config: &ImportConfig,
    file_size: u64,
    total_rows: u64,
    available_memory: u64,
) -> usize {
    let per_row = bytes_per_row(file_size, total_rows);
    let budget = (available_memory as f64 * config.memory_batch_fraction).max(0.0);
    let target = (budget / per_row as f64).floor() as usize;

    let min = config.min_batch_size.max(1);
    let max = config.max_batch_size.max(min);
    let mut size = target.clamp(min, max);
    if total_rows > config.large_file_rows {
        size = size.min(config.large_file_max_batch.max(1));
    }
    size
}

pub fn plan(
    config: &ImportConfig,
    file_size: u64,
    total_rows: u64,
    available_memory: u64,
) -> BatchPlan {
    let batch_size = compute_batch_size(config, file_size, total_rows, available_memory);
    let estimated_batches = (total_rows as usize).div_ceil(batch_size);
    BatchPlan {
        batch_size,
        estimated_batches,
        bytes_per_row: bytes_per_row(file_size, total_rows),
        parallel: config.parallel_enabled && estimated_batches > config.parallel_threshold_batches,
    }
}

/// 内存压力下的下一块大小：减半，不低于 min_batch_size
pub fn relieved_size(current: usize, config: &ImportConfig) -> usize {
    (current / 2).max(config.min_batch_size.max(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIB: u64 = 1024 * 1024;

    #[test]
    fn test_size_clamped_to_bounds() {
        let config = ImportConfig::default();
        // 可用内存充足 → 封顶 1000
        assert_eq!(compute_batch_size(&config, 100 * MIB, 100_000, 512 * MIB), 1000);
        // 可用内存几乎为 0 → 下限 100
        assert_eq!(compute_batch_size(&config, 100 * MIB, 1000, 10), 100);
    }

    #[test]
    fn test_memory_bound_size() {
        let config = ImportConfig::default();
        // 每行 1000 字节，可用 1_000_000 × 0.3 → 300 行
        assert_eq!(compute_batch_size(&config, 1_000_000, 1000, 1_000_000), 300);
    }

    #[test]
    fn test_large_file_cap() {
        let config = ImportConfig::default();
        assert_eq!(compute_batch_size(&config, 200 * MIB, 200_000, 512 * MIB), 500);
    }

    #[test]
    fn test_unknown_rows_use_default_estimate() {
        assert_eq!(bytes_per_row(5000, 0), DEFAULT_BYTES_PER_ROW);
        assert_eq!(bytes_per_row(10, 100), 1);
    }

    #[test]
    fn test_parallel_threshold() {
        let config = ImportConfig::default();
        let small = plan(&config, 1_000_000, 3000, 512 * MIB);
        assert_eq!(small.estimated_batches, 3);
        assert!(!small.parallel);

        let big = plan(&config, 1_000_000, 3001, 512 * MIB);
        assert_eq!(big.estimated_batches, 4);
        assert!(big.parallel);

        let disabled = ImportConfig {
            parallel_enabled: false,
            ..Default::default()
        };
        assert!(!plan(&disabled, 1_000_000, 10_000, 512 * MIB).parallel);
    }

    #[test]
    fn test_relieved_size_floor() {
        let config = ImportConfig::default();
        assert_eq!(relieved_size(1000, &config), 500);
        assert_eq!(relieved_size(150, &config), 100);
    }
}
