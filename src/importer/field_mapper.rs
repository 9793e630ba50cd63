// ==========================================
// POS 导入核心 - 字段映射器
// ==========================================
// 职责: 源列 → 标准字段的建议映射（带置信度）+ 行映射与类型转换
// 规则: 精确 / 别名 = 100，表头含目标 = 80，目标含表头 = 60，无匹配 = unmapped/0
//       每个标准字段最多被一个源列占用（按分数贪心分配）
// ==========================================

use crate::domain::mapping::{FieldMappingEntry, ImportMapping};
use crate::domain::quality::{DqLevel, DqViolation};
use crate::domain::record::{MappedRecord, Record};
use crate::domain::types::ImportType;
use crate::importer::data_cleaner::DataCleaner;
use crate::importer::error::RowError;
use crate::importer::keyword_tables::{find_target, score_header, target_fields, FieldKind};
use chrono::{NaiveDate, NaiveDateTime};
use serde_json::Value;

/// 映射配置保存的样本行数
const SAMPLE_ROWS: usize = 5;

pub struct FieldMapper {
    import_type: ImportType,
}

impl FieldMapper {
    pub fn new(import_type: ImportType) -> Self {
        Self { import_type }
    }

    pub fn import_type(&self) -> ImportType {
        self.import_type
    }

    /// 按表头给出映射建议（顺序与表头一致）
    pub fn suggest(&self, headers: &[String]) -> Vec<FieldMappingEntry> {
        let targets = target_fields(self.import_type);

        // 全部候选 (分数, 表头序, 目标序)
        let mut candidates = Vec::new();
        for (hi, header) in headers.iter().enumerate() {
            for (ti, target) in targets.iter().enumerate() {
                let (score, kind) = score_header(header, target);
                if score > 0 {
                    candidates.push((score, hi, ti, kind));
                }
            }
        }
        candidates.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)).then(a.2.cmp(&b.2)));

        let mut entries: Vec<FieldMappingEntry> =
            headers.iter().map(FieldMappingEntry::unmapped).collect();
        let mut target_taken = vec![false; targets.len()];
        for (score, hi, ti, kind) in candidates {
            if entries[hi].is_mapped() || target_taken[ti] {
                continue;
            }
            target_taken[ti] = true;
            entries[hi] = FieldMappingEntry {
                source_column: headers[hi].clone(),
                target_field: Some(targets[ti].name.to_string()),
                confidence: score,
                match_kind: kind,
            };
        }
        entries
    }

    /// 由表头与样本生成新的映射配置
    pub fn build_mapping(
        &self,
        name: impl Into<String>,
        pos_system: Option<String>,
        headers: &[String],
        sample: &[Record],
    ) -> ImportMapping {
        let mut mapping = ImportMapping::new(name, self.import_type, pos_system, self.suggest(headers));
        mapping.sample_data = sample.iter().take(SAMPLE_ROWS).cloned().collect();
        mapping
    }

    /// 未被映射的必填字段
    pub fn missing_required(&self, mapping: &ImportMapping) -> Vec<&'static str> {
        target_fields(self.import_type)
            .iter()
            .filter(|f| f.required)
            .filter(|f| mapping.mapped_entries().all(|e| e.target_field.as_deref() != Some(f.name)))
            .map(|f| f.name)
            .collect()
    }

    /// 单行映射：源列取值 → 标准字段，按字段类型转换
    ///
    /// 源列缺失视为 null；类型转换失败的字段全部收集后一次返回
    pub fn apply(
        &self,
        mapping: &ImportMapping,
        record: &Record,
        row_number: usize,
    ) -> Result<MappedRecord, RowError> {
        let mut mapped = MappedRecord::new(row_number);
        let mut violations = Vec::new();

        for entry in mapping.mapped_entries() {
            let Some(target) = entry.target_field.as_deref() else {
                continue;
            };
            let raw = record.get(&entry.source_column).cloned().unwrap_or(Value::Null);
            let kind = find_target(self.import_type, target)
                .map(|f| f.kind)
                .unwrap_or(FieldKind::Text);
            match convert(&raw, kind) {
                Ok(value) => {
                    mapped.values.insert(target.to_string(), value);
                }
                Err(message) => {
                    violations.push(DqViolation::row(row_number, DqLevel::Error, target, message));
                    mapped.values.insert(target.to_string(), Value::Null);
                }
            }
        }

        if violations.is_empty() {
            Ok(mapped)
        } else {
            Err(RowError::new(row_number, violations))
        }
    }
}

/// 标量 → 目标类型（null 原样保留，由校验器判断必填）
fn convert(raw: &Value, kind: FieldKind) -> Result<Value, String> {
    if raw.is_null() {
        return Ok(Value::Null);
    }
    match kind {
        FieldKind::Text => Ok(DataCleaner::to_text(raw)
            .map(|s| Value::String(s.trim().to_string()))
            .unwrap_or(Value::Null)),
        FieldKind::Decimal => DataCleaner::to_f64(raw)
            .map(DataCleaner::float_value)
            .ok_or_else(|| format!("无法解析为数值: {}", display(raw))),
        FieldKind::Integer => match DataCleaner::to_f64(raw) {
            Some(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => Ok(Value::from(f as i64)),
            _ => Err(format!("无法解析为整数: {}", display(raw))),
        },
        FieldKind::Boolean => DataCleaner::to_bool(raw)
            .map(Value::Bool)
            .ok_or_else(|| format!("无法解析为布尔值: {}", display(raw))),
        FieldKind::Date => parse_date(raw)
            .map(Value::String)
            .ok_or_else(|| format!("日期格式错误: {}", display(raw))),
    }
}

/// 日期归一化为 ISO 文本（YYYY-MM-DD 或 YYYY-MM-DDTHH:MM:SS）
fn parse_date(raw: &Value) -> Option<String> {
    if let Value::Number(n) = raw {
        let f = n.as_f64()?;
        // YYYYMMDD 整数
        if f.fract() == 0.0 && (19_000_101.0..=29_991_231.0).contains(&f) {
            return NaiveDate::parse_from_str(&format!("{}", f as i64), "%Y%m%d")
                .ok()
                .map(|d| d.to_string());
        }
        return DataCleaner::excel_serial_to_string(f);
    }
    let text = DataCleaner::to_text(raw)?;
    let text = text.trim();

    const DATETIME_FORMATS: &[&str] = &[
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S",
        "%Y/%m/%d %H:%M:%S",
        "%d-%m-%Y %H:%M:%S",
        "%d/%m/%Y %H:%M",
        "%Y%m%d%H%M%S",
    ];
    const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%d-%m-%Y", "%d/%m/%Y", "%Y%m%d", "%d.%m.%Y"];

    for f in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, f) {
            return Some(dt.format("%Y-%m-%dT%H:%M:%S").to_string());
        }
    }
    for f in DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(text, f) {
            return Some(d.to_string());
        }
    }
    chrono::DateTime::parse_from_rfc3339(text)
        .ok()
        .map(|dt| dt.naive_utc().format("%Y-%m-%dT%H:%M:%S").to_string())
}

fn display(raw: &Value) -> String {
    DataCleaner::to_text(raw).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::mapping::MatchKind;
    use serde_json::json;

    fn headers(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_suggest_confidence_levels() {
        let mapper = FieldMapper::new(ImportType::Menu);
        let entries = mapper.suggest(&headers(&["Name", "Selling Price", "Item Category", "xyz"]));

        assert_eq!(entries[0].target_field.as_deref(), Some("name"));
        assert_eq!(entries[0].confidence, 100);
        assert_eq!(entries[0].match_kind, MatchKind::Exact);

        assert_eq!(entries[1].target_field.as_deref(), Some("price"));
        assert_eq!(entries[1].match_kind, MatchKind::Alias);

        assert_eq!(entries[2].target_field.as_deref(), Some("category"));
        assert_eq!(entries[2].confidence, 80);

        assert!(!entries[3].is_mapped());
        assert_eq!(entries[3].confidence, 0);
    }

    #[test]
    fn test_suggest_assigns_each_target_once() {
        let mapper = FieldMapper::new(ImportType::Menu);
        let entries = mapper.suggest(&headers(&["Item Name", "Name"]));
        // 两列对 name 同为 100，按表头顺序先占；后者退而匹配其他字段
        assert_eq!(entries[0].target_field.as_deref(), Some("name"));
        assert_ne!(entries[1].target_field.as_deref(), Some("name"));
        assert!(entries.iter().all(|e| e.confidence <= 100));
    }

    #[test]
    fn test_apply_converts_types() {
        let mapper = FieldMapper::new(ImportType::Sales);
        let hdrs = headers(&["Invoice No", "Invoice Date", "Amount", "Qty"]);
        let mapping = mapper.build_mapping("sales", None, &hdrs, &[]);

        let mut row = Record::new();
        row.insert("Invoice No".into(), json!(1001));
        row.insert("Invoice Date".into(), json!("15/01/2024"));
        row.insert("Amount".into(), json!("$1,250.50"));
        row.insert("Qty".into(), json!(3));

        let mapped = mapper.apply(&mapping, &row, 1).unwrap();
        assert_eq!(mapped.get_str("transaction_id"), Some("1001"));
        assert_eq!(mapped.get_str("date"), Some("2024-01-15"));
        assert_eq!(mapped.get_f64("total"), Some(1250.5));
        assert_eq!(mapped.get_f64("quantity"), Some(3.0));
    }

    #[test]
    fn test_apply_collects_conversion_errors() {
        let mapper = FieldMapper::new(ImportType::Menu);
        let mapping = mapper.build_mapping("menu", None, &headers(&["name", "price"]), &[]);
        let mut row = Record::new();
        row.insert("name".into(), json!("Burger"));
        row.insert("price".into(), json!("cheap"));

        let err = mapper.apply(&mapping, &row, 7).unwrap_err();
        assert_eq!(err.row_number, 7);
        assert_eq!(err.violations.len(), 1);
        assert_eq!(err.violations[0].field.as_deref(), Some("price"));
    }

    #[test]
    fn test_missing_required() {
        let mapper = FieldMapper::new(ImportType::Menu);
        let mapping = mapper.build_mapping("menu", None, &headers(&["name", "sku"]), &[]);
        assert_eq!(mapper.missing_required(&mapping), vec!["price"]);
    }

    #[test]
    fn test_date_forms() {
        assert_eq!(parse_date(&json!(45292)).as_deref(), Some("2024-01-01"));
        assert_eq!(parse_date(&json!(20240120)).as_deref(), Some("2024-01-20"));
        assert_eq!(
            parse_date(&json!("2024-01-20 08:30:00")).as_deref(),
            Some("2024-01-20T08:30:00")
        );
        assert!(parse_date(&json!("not a date")).is_none());
    }
}
