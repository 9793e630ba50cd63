// ==========================================
// POS 导入核心 - 字段映射配置模型
// ==========================================
// 用途: 按 (import_type, pos_system) 复用的映射配置
// 对齐: import_mapping 表
// 选择规则: 使用次数最多的启用映射（同分取最近使用）
// ==========================================

use crate::domain::record::Record;
use crate::domain::types::ImportType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ==========================================
// MatchKind - 匹配方式
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    Exact,                // 表头 == 目标字段
    Alias,                // 表头 == 目标字段别名
    HeaderContainsTarget, // 表头包含目标字段
    TargetContainsHeader, // 目标字段包含表头
    Manual,               // 人工指定
    Unmapped,             // 未映射
}

// ==========================================
// FieldMappingEntry - 单列映射
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldMappingEntry {
    pub source_column: String,
    pub target_field: Option<String>, // None = unmapped
    pub confidence: u8,               // 0-100
    pub match_kind: MatchKind,
}

impl FieldMappingEntry {
    pub fn unmapped(source_column: impl Into<String>) -> Self {
        Self {
            source_column: source_column.into(),
            target_field: None,
            confidence: 0,
            match_kind: MatchKind::Unmapped,
        }
    }

    pub fn manual(source_column: impl Into<String>, target_field: impl Into<String>) -> Self {
        Self {
            source_column: source_column.into(),
            target_field: Some(target_field.into()),
            confidence: 100,
            match_kind: MatchKind::Manual,
        }
    }

    pub fn is_mapped(&self) -> bool {
        self.target_field.is_some()
    }
}

// ==========================================
// ImportMapping - 映射配置
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportMapping {
    pub mapping_id: Uuid,
    pub name: String,
    pub import_type: ImportType,
    pub pos_system: Option<String>,

    /// 有序：与源文件列顺序一致
    pub field_mappings: Vec<FieldMappingEntry>,
    pub sample_data: Vec<Record>,
    pub detected_columns: Vec<String>,
    pub confidence: u8, // 已映射列的平均置信度

    pub is_active: bool,
    pub is_default: bool,
    pub usage_count: u64,
    pub last_used_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ImportMapping {
    pub fn new(
        name: impl Into<String>,
        import_type: ImportType,
        pos_system: Option<String>,
        field_mappings: Vec<FieldMappingEntry>,
    ) -> Self {
        let now = Utc::now();
        let detected_columns = field_mappings
            .iter()
            .map(|e| e.source_column.clone())
            .collect();
        let confidence = average_confidence(&field_mappings);
        Self {
            mapping_id: Uuid::new_v4(),
            name: name.into(),
            import_type,
            pos_system,
            field_mappings,
            sample_data: Vec::new(),
            detected_columns,
            confidence,
            is_active: true,
            is_default: false,
            usage_count: 0,
            last_used_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn target_for(&self, source_column: &str) -> Option<&str> {
        self.field_mappings
            .iter()
            .find(|e| e.source_column == source_column)
            .and_then(|e| e.target_field.as_deref())
    }

    pub fn mapped_entries(&self) -> impl Iterator<Item = &FieldMappingEntry> {
        self.field_mappings.iter().filter(|e| e.is_mapped())
    }

    /// 映射覆盖的源列是否都存在于当前文件表头中
    pub fn covers_headers(&self, headers: &[String]) -> bool {
        let mut mapped = self.mapped_entries().peekable();
        if mapped.peek().is_none() {
            return false;
        }
        mapped.all(|e| headers.iter().any(|h| h == &e.source_column))
    }
}

/// 已映射列的平均置信度（无映射时为 0）
pub fn average_confidence(entries: &[FieldMappingEntry]) -> u8 {
    let mapped: Vec<u32> = entries
        .iter()
        .filter(|e| e.is_mapped())
        .map(|e| e.confidence as u32)
        .collect();
    if mapped.is_empty() {
        return 0;
    }
    (mapped.iter().sum::<u32>() / mapped.len() as u32).min(100) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mapping_lookup_and_confidence() {
        let mapping = ImportMapping::new(
            "square menu",
            ImportType::Menu,
            Some("square".to_string()),
            vec![
                FieldMappingEntry::manual("Item Name", "name"),
                FieldMappingEntry {
                    source_column: "Price ($)".to_string(),
                    target_field: Some("price".to_string()),
                    confidence: 80,
                    match_kind: MatchKind::HeaderContainsTarget,
                },
                FieldMappingEntry::unmapped("Notes"),
            ],
        );
        assert_eq!(mapping.target_for("Item Name"), Some("name"));
        assert_eq!(mapping.target_for("Notes"), None);
        assert_eq!(mapping.confidence, 90);
        assert_eq!(mapping.detected_columns.len(), 3);
        assert!(mapping.covers_headers(&["Item Name".into(), "Price ($)".into()]));
        assert!(!mapping.covers_headers(&["Item Name".into()]));
    }
}
