// ==========================================
// POS 导入核心 - 数据质量模型
// ==========================================
// 用途: 行级 / 批次级 / 文件级问题记录与质量评分
// ==========================================

use serde::{Deserialize, Serialize};

// ==========================================
// DqLevel - 问题级别
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DqLevel {
    Error,   // 阻断该行
    Warning, // 不阻断，提示
    Info,    // 仅说明
}

// ==========================================
// DqViolation - 数据质量问题
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DqViolation {
    pub row_number: Option<usize>,   // 数据行号（文件级问题为 None）
    pub batch_index: Option<usize>,  // 所属批次
    pub level: DqLevel,
    pub field: Option<String>,       // 问题字段
    pub message: String,
}

impl DqViolation {
    pub fn row(row_number: usize, level: DqLevel, field: &str, message: impl Into<String>) -> Self {
        Self {
            row_number: Some(row_number),
            batch_index: None,
            level,
            field: Some(field.to_string()),
            message: message.into(),
        }
    }

    pub fn file(level: DqLevel, message: impl Into<String>) -> Self {
        Self {
            row_number: None,
            batch_index: None,
            level,
            field: None,
            message: message.into(),
        }
    }

    pub fn with_batch(mut self, batch_index: usize) -> Self {
        self.batch_index = Some(batch_index);
        self
    }

    pub fn is_error(&self) -> bool {
        self.level == DqLevel::Error
    }
}

// ==========================================
// 质量评分
// ==========================================

/// 成功率 = successful / processed × 100
pub fn efficiency(successful: u64, processed: u64) -> f64 {
    if processed == 0 {
        return 0.0;
    }
    successful as f64 / processed as f64 * 100.0
}

/// 错误率 = failed / processed × 100
pub fn error_rate(failed: u64, processed: u64) -> f64 {
    if processed == 0 {
        return 0.0;
    }
    failed as f64 / processed as f64 * 100.0
}

/// 质量分 = max(0, 成功率 − 2 × 错误率)
pub fn quality_score(successful: u64, failed: u64, processed: u64) -> f64 {
    (efficiency(successful, processed) - 2.0 * error_rate(failed, processed)).max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quality_score() {
        assert_eq!(quality_score(0, 0, 0), 0.0);
        assert_eq!(quality_score(100, 0, 100), 100.0);
        // 90% 成功 / 10% 失败 → 90 - 20 = 70
        assert!((quality_score(90, 10, 100) - 70.0).abs() < 1e-9);
        // 错误率过高时截断为 0
        assert_eq!(quality_score(10, 90, 100), 0.0);
    }

    #[test]
    fn test_violation_builders() {
        let v = DqViolation::row(5, DqLevel::Error, "price", "价格为负数").with_batch(2);
        assert_eq!(v.row_number, Some(5));
        assert_eq!(v.batch_index, Some(2));
        assert!(v.is_error());

        let f = DqViolation::file(DqLevel::Warning, "存在合并单元格");
        assert!(f.row_number.is_none());
        assert!(!f.is_error());
    }
}
