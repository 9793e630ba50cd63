// ==========================================
// POS 导入核心 - 重复行守卫
// ==========================================
// 职责: 单个任务内按自然键识别重复行 / 空行（计入 skipped）
// 自然键: 导入类型的键字段中第一个非空值（如 menu: sku → name）
// 并发: 并行批次共享同一个守卫实例
// ==========================================

use crate::domain::record::MappedRecord;
use crate::domain::types::ImportType;
use crate::importer::data_cleaner::DataCleaner;
use crate::importer::keyword_tables::natural_key_fields;
use std::collections::HashSet;
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowVerdict {
    Accept,
    SkipEmpty,
    SkipDuplicate(String), // 命中的自然键
}

impl RowVerdict {
    pub fn is_skip(&self) -> bool {
        !matches!(self, RowVerdict::Accept)
    }
}

pub struct DuplicateGuard {
    key_fields: &'static [&'static str],
    seen: Mutex<HashSet<String>>,
}

impl DuplicateGuard {
    pub fn new(import_type: ImportType) -> Self {
        Self {
            key_fields: natural_key_fields(import_type),
            seen: Mutex::new(HashSet::new()),
        }
    }

    /// 判定一行；接受的行登记自然键
    pub fn check(&self, record: &MappedRecord) -> RowVerdict {
        if record.is_empty() {
            return RowVerdict::SkipEmpty;
        }
        let Some(key) = self.natural_key(record) else {
            return RowVerdict::Accept;
        };
        let mut seen = self.seen.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if seen.insert(key.clone()) {
            RowVerdict::Accept
        } else {
            RowVerdict::SkipDuplicate(key)
        }
    }

    /// 释放一批已登记的键（批次整体回滚后调用，重试时不会误判为重复）
    pub fn forget(&self, keys: &[String]) {
        let mut seen = self.seen.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        for key in keys {
            seen.remove(key);
        }
    }

    pub fn natural_key(&self, record: &MappedRecord) -> Option<String> {
        self.key_fields.iter().find_map(|field| {
            record
                .get(field)
                .and_then(DataCleaner::to_text)
                .map(|v| v.trim().to_lowercase())
                .filter(|v| !v.is_empty())
                .map(|v| format!("{}={}", field, v))
        })
    }

    pub fn seen_count(&self) -> usize {
        self.seen
            .lock()
            .map(|s| s.len())
            .unwrap_or_else(|poisoned| poisoned.into_inner().len())
    }
}
