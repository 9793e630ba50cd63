// ==========================================
// POS 导入核心 - 行记录模型
// ==========================================
// 用途: 导入管道中间产物（解析 → 映射 → 校验 → 落库）
// 生命周期: 仅在导入流程内，不直接持久化
// ==========================================

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 原始行记录：列名 → 标量值（字符串 / 数字 / 布尔 / null）
///
/// serde_json 开启 preserve_order，键顺序即源文件列顺序
pub type Record = serde_json::Map<String, Value>;

// ==========================================
// MappedRecord - 映射后的标准记录
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappedRecord {
    pub row_number: usize, // 源文件数据行号（1 起，不含表头）
    pub values: Record,    // 标准字段名 → 已类型化的值
}

impl MappedRecord {
    pub fn new(row_number: usize) -> Self {
        Self {
            row_number,
            values: Record::new(),
        }
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.values.get(field).filter(|v| !v.is_null())
    }

    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.get(field).and_then(Value::as_str)
    }

    pub fn get_f64(&self, field: &str) -> Option<f64> {
        self.get(field).and_then(Value::as_f64)
    }

    /// 所有标准字段均为空
    pub fn is_empty(&self) -> bool {
        self.values.values().all(|v| match v {
            Value::Null => true,
            Value::String(s) => s.trim().is_empty(),
            _ => false,
        })
    }
}

/// 判断原始记录是否整行为空
pub fn is_blank_record(record: &Record) -> bool {
    record.values().all(|v| match v {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_mapped_record_accessors() {
        let mut record = MappedRecord::new(3);
        record.values.insert("name".to_string(), json!("Burger"));
        record.values.insert("price".to_string(), json!(9.99));
        record.values.insert("sku".to_string(), Value::Null);

        assert_eq!(record.get_str("name"), Some("Burger"));
        assert_eq!(record.get_f64("price"), Some(9.99));
        assert!(record.get("sku").is_none());
        assert!(!record.is_empty());
    }

    #[test]
    fn test_blank_record() {
        let mut record = Record::new();
        record.insert("a".to_string(), Value::Null);
        record.insert("b".to_string(), json!("  "));
        assert!(is_blank_record(&record));

        record.insert("c".to_string(), json!(0));
        assert!(!is_blank_record(&record));
    }
}
