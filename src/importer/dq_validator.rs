// ==========================================
// POS 导入核心 - 数据质量校验器
// ==========================================
// 职责: 映射后行记录的字段规则校验
// 级别:
//   Error   - 必填缺失 / 超长 / 低于下限，该行计入 failed
//   Warning - 格式可疑（邮箱 / 电话），该行仍导入
// ==========================================

use crate::domain::mapping::ImportMapping;
use crate::domain::quality::{DqLevel, DqViolation};
use crate::domain::record::MappedRecord;
use crate::domain::types::ImportType;
use crate::importer::error::RowError;
use crate::importer::keyword_tables::{target_fields, FieldKind, TargetField};
use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

const EMAIL_PATTERN: &str = r"^[^@\s]+@[^@\s]+\.[^@\s]+$";
const PHONE_PATTERN: &str = r"^\+?[0-9 ()\-]{6,20}$";

fn email_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(EMAIL_PATTERN).ok()).as_ref()
}

fn phone_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(PHONE_PATTERN).ok()).as_ref()
}

pub struct DqValidator {
    import_type: ImportType,
}

impl DqValidator {
    pub fn new(import_type: ImportType) -> Self {
        Self { import_type }
    }

    /// 文件级检查：必填字段没有任何源列映射
    pub fn validate_mapping(&self, mapping: &ImportMapping) -> Vec<DqViolation> {
        target_fields(self.import_type)
            .iter()
            .filter(|f| f.required)
            .filter(|f| mapping.mapped_entries().all(|e| e.target_field.as_deref() != Some(f.name)))
            .map(|f| {
                DqViolation::file(
                    DqLevel::Warning,
                    format!("必填字段 {} 未找到对应列，所有行将校验失败", f.name),
                )
            })
            .collect()
    }

    /// 行级校验：存在 Error 返回 Err，否则返回警告列表
    pub fn validate(&self, record: &MappedRecord) -> Result<Vec<DqViolation>, RowError> {
        let mut violations = Vec::new();
        for field in target_fields(self.import_type) {
            self.check_field(record, field, &mut violations);
        }

        if violations.iter().any(DqViolation::is_error) {
            Err(RowError::new(record.row_number, violations))
        } else {
            Ok(violations)
        }
    }

    fn check_field(&self, record: &MappedRecord, field: &TargetField, out: &mut Vec<DqViolation>) {
        let row = record.row_number;
        let value = match record.get(field.name) {
            Some(Value::String(s)) if s.trim().is_empty() => None,
            other => other,
        };

        let Some(value) = value else {
            if field.required {
                out.push(DqViolation::row(row, DqLevel::Error, field.name, "必填字段缺失"));
            }
            return;
        };

        if let (Some(max), Some(text)) = (field.max_length, value.as_str()) {
            let len = text.chars().count();
            if len > max {
                out.push(DqViolation::row(
                    row,
                    DqLevel::Error,
                    field.name,
                    format!("长度 {} 超过上限 {}", len, max),
                ));
            }
        }

        if let (Some(min), Some(number)) = (field.min_value, value.as_f64()) {
            if number < min {
                out.push(DqViolation::row(
                    row,
                    DqLevel::Error,
                    field.name,
                    format!("数值 {} 低于下限 {}", number, min),
                ));
            }
        }

        if field.kind == FieldKind::Text {
            if let Some(text) = value.as_str() {
                let suspicious = match field.name {
                    "email" => email_regex().map(|re| !re.is_match(text)),
                    "phone" => phone_regex().map(|re| !re.is_match(text)),
                    _ => None,
                };
                if suspicious == Some(true) {
                    out.push(DqViolation::row(
                        row,
                        DqLevel::Warning,
                        field.name,
                        format!("格式可疑: {}", text),
                    ));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(values: Value) -> MappedRecord {
        let mut r = MappedRecord::new(4);
        if let Value::Object(map) = values {
            r.values = map;
        }
        r
    }

    #[test]
    fn test_patterns_compile() {
        assert!(email_regex().is_some());
        assert!(phone_regex().is_some());
    }

    #[test]
    fn test_valid_menu_row() {
        let v = DqValidator::new(ImportType::Menu);
        let warnings = v.validate(&record(json!({"name": "Burger", "price": 9.5}))).unwrap();
        assert!(warnings.is_empty());
    }

    #[test]
    fn test_required_and_min_value() {
        let v = DqValidator::new(ImportType::Menu);
        let err = v
            .validate(&record(json!({"name": "  ", "price": -1.0})))
            .unwrap_err();
        assert_eq!(err.row_number, 4);
        let fields: Vec<_> = err.violations.iter().filter_map(|x| x.field.as_deref()).collect();
        assert!(fields.contains(&"name"));
        assert!(fields.contains(&"price"));
    }

    #[test]
    fn test_max_length() {
        let v = DqValidator::new(ImportType::Menu);
        let long = "x".repeat(70);
        let err = v
            .validate(&record(json!({"name": "Burger", "price": 1.0, "sku": long})))
            .unwrap_err();
        assert_eq!(err.violations[0].field.as_deref(), Some("sku"));
    }

    #[test]
    fn test_email_warning_does_not_block() {
        let v = DqValidator::new(ImportType::Customers);
        let warnings = v
            .validate(&record(json!({"name": "Asha", "email": "not-an-email"})))
            .unwrap();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].level, DqLevel::Warning);
    }
}
