// ==========================================
// POS 导入核心 - 字段映射配置 Repository
// ==========================================
// 职责: import_mapping 表读写
// 选择规则: 同 (import_type, pos_system) 下启用的映射，使用次数最多者优先，
//           其次默认标记，再其次最近使用
// 默认唯一: set_default 在同一事务中清除同组其他映射的默认标记
// ==========================================

use crate::domain::mapping::{FieldMappingEntry, ImportMapping};
use crate::domain::record::Record;
use crate::domain::types::ImportType;
use crate::repository::error::{RepositoryError, RepositoryResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

// ==========================================
// ImportMappingRepository Trait
// ==========================================
#[async_trait]
pub trait ImportMappingRepository: Send + Sync {
    async fn insert(&self, mapping: &ImportMapping) -> RepositoryResult<()>;

    async fn update(&self, mapping: &ImportMapping) -> RepositoryResult<()>;

    async fn get(&self, mapping_id: &Uuid) -> RepositoryResult<ImportMapping>;

    /// 首选映射（无则 None）
    async fn find_preferred(
        &self,
        import_type: ImportType,
        pos_system: Option<&str>,
    ) -> RepositoryResult<Option<ImportMapping>>;

    /// 同组全部映射（按首选顺序）
    async fn list(
        &self,
        import_type: ImportType,
        pos_system: Option<&str>,
    ) -> RepositoryResult<Vec<ImportMapping>>;

    /// usage_count + 1，刷新 last_used_at
    async fn record_usage(&self, mapping_id: &Uuid) -> RepositoryResult<()>;

    /// 设为默认（同组唯一）
    async fn set_default(&self, mapping_id: &Uuid) -> RepositoryResult<()>;

    async fn set_active(&self, mapping_id: &Uuid, active: bool) -> RepositoryResult<()>;
}

// ==========================================
// SqliteImportMappingRepository
// ==========================================
pub struct SqliteImportMappingRepository {
    conn: Arc<Mutex<Connection>>,
}

const MAPPING_COLUMNS: &str = "mapping_id, name, import_type, pos_system, field_mappings, \
    sample_data, detected_columns, confidence, is_active, is_default, usage_count, last_used_at, \
    created_at, updated_at";

const PREFERRED_ORDER: &str = "usage_count DESC, is_default DESC, last_used_at DESC, created_at DESC";

impl SqliteImportMappingRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn lock(&self) -> RepositoryResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    fn map_row(row: &Row<'_>) -> rusqlite::Result<MappingRow> {
        Ok(MappingRow {
            mapping_id: row.get(0)?,
            name: row.get(1)?,
            import_type: row.get(2)?,
            pos_system: row.get(3)?,
            field_mappings: row.get(4)?,
            sample_data: row.get(5)?,
            detected_columns: row.get(6)?,
            confidence: row.get::<_, i64>(7)?,
            is_active: row.get(8)?,
            is_default: row.get(9)?,
            usage_count: row.get::<_, i64>(10)?,
            last_used_at: row.get(11)?,
            created_at: row.get(12)?,
            updated_at: row.get(13)?,
        })
    }

    fn not_found(mapping_id: &Uuid) -> RepositoryError {
        RepositoryError::NotFound {
            entity: "ImportMapping".to_string(),
            id: mapping_id.to_string(),
        }
    }
}

struct MappingRow {
    mapping_id: String,
    name: String,
    import_type: String,
    pos_system: Option<String>,
    field_mappings: String,
    sample_data: String,
    detected_columns: String,
    confidence: i64,
    is_active: bool,
    is_default: bool,
    usage_count: i64,
    last_used_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl MappingRow {
    fn into_mapping(self) -> RepositoryResult<ImportMapping> {
        let mapping_id =
            Uuid::parse_str(&self.mapping_id).map_err(|e| RepositoryError::FieldValueError {
                field: "mapping_id".to_string(),
                message: e.to_string(),
            })?;
        let import_type =
            ImportType::parse(&self.import_type).ok_or_else(|| RepositoryError::FieldValueError {
                field: "import_type".to_string(),
                message: self.import_type.clone(),
            })?;
        Ok(ImportMapping {
            mapping_id,
            name: self.name,
            import_type,
            pos_system: self.pos_system,
            field_mappings: serde_json::from_str::<Vec<FieldMappingEntry>>(&self.field_mappings)?,
            sample_data: serde_json::from_str::<Vec<Record>>(&self.sample_data)?,
            detected_columns: serde_json::from_str::<Vec<String>>(&self.detected_columns)?,
            confidence: self.confidence.clamp(0, 100) as u8,
            is_active: self.is_active,
            is_default: self.is_default,
            usage_count: self.usage_count.max(0) as u64,
            last_used_at: self.last_used_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[async_trait]
impl ImportMappingRepository for SqliteImportMappingRepository {
    async fn insert(&self, mapping: &ImportMapping) -> RepositoryResult<()> {
        let conn = self.lock()?;
        conn.execute(
            &format!(
                "INSERT INTO import_mapping ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                MAPPING_COLUMNS
            ),
            params![
                mapping.mapping_id.to_string(),
                mapping.name,
                mapping.import_type.as_str(),
                mapping.pos_system,
                serde_json::to_string(&mapping.field_mappings)?,
                serde_json::to_string(&mapping.sample_data)?,
                serde_json::to_string(&mapping.detected_columns)?,
                mapping.confidence as i64,
                mapping.is_active,
                mapping.is_default,
                mapping.usage_count as i64,
                mapping.last_used_at,
                mapping.created_at,
                mapping.updated_at,
            ],
        )?;
        Ok(())
    }

    async fn update(&self, mapping: &ImportMapping) -> RepositoryResult<()> {
        let conn = self.lock()?;
        let affected = conn.execute(
            "UPDATE import_mapping SET name = ?2, field_mappings = ?3, sample_data = ?4,
                detected_columns = ?5, confidence = ?6, is_active = ?7, updated_at = ?8
             WHERE mapping_id = ?1",
            params![
                mapping.mapping_id.to_string(),
                mapping.name,
                serde_json::to_string(&mapping.field_mappings)?,
                serde_json::to_string(&mapping.sample_data)?,
                serde_json::to_string(&mapping.detected_columns)?,
                mapping.confidence as i64,
                mapping.is_active,
                Utc::now(),
            ],
        )?;
        if affected == 0 {
            return Err(Self::not_found(&mapping.mapping_id));
        }
        Ok(())
    }

    async fn get(&self, mapping_id: &Uuid) -> RepositoryResult<ImportMapping> {
        let conn = self.lock()?;
        conn.query_row(
            &format!("SELECT {} FROM import_mapping WHERE mapping_id = ?1", MAPPING_COLUMNS),
            params![mapping_id.to_string()],
            Self::map_row,
        )
        .optional()?
        .ok_or_else(|| Self::not_found(mapping_id))?
        .into_mapping()
    }

    async fn find_preferred(
        &self,
        import_type: ImportType,
        pos_system: Option<&str>,
    ) -> RepositoryResult<Option<ImportMapping>> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                &format!(
                    "SELECT {} FROM import_mapping
                     WHERE import_type = ?1 AND pos_system IS ?2 AND is_active = 1
                     ORDER BY {} LIMIT 1",
                    MAPPING_COLUMNS, PREFERRED_ORDER
                ),
                params![import_type.as_str(), pos_system],
                Self::map_row,
            )
            .optional()?;
        row.map(MappingRow::into_mapping).transpose()
    }

    async fn list(
        &self,
        import_type: ImportType,
        pos_system: Option<&str>,
    ) -> RepositoryResult<Vec<ImportMapping>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM import_mapping WHERE import_type = ?1 AND pos_system IS ?2 ORDER BY {}",
            MAPPING_COLUMNS, PREFERRED_ORDER
        ))?;
        let rows = stmt.query_map(params![import_type.as_str(), pos_system], Self::map_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?.into_mapping()?);
        }
        Ok(out)
    }

    async fn record_usage(&self, mapping_id: &Uuid) -> RepositoryResult<()> {
        let conn = self.lock()?;
        let now = Utc::now();
        let affected = conn.execute(
            "UPDATE import_mapping SET usage_count = usage_count + 1, last_used_at = ?2, updated_at = ?2
             WHERE mapping_id = ?1",
            params![mapping_id.to_string(), now],
        )?;
        if affected == 0 {
            return Err(Self::not_found(mapping_id));
        }
        Ok(())
    }

    async fn set_default(&self, mapping_id: &Uuid) -> RepositoryResult<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let pair: Option<(String, Option<String>)> = tx
            .query_row(
                "SELECT import_type, pos_system FROM import_mapping WHERE mapping_id = ?1",
                params![mapping_id.to_string()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let (import_type, pos_system) = pair.ok_or_else(|| Self::not_found(mapping_id))?;
        tx.execute(
            "UPDATE import_mapping SET is_default = 0
             WHERE import_type = ?1 AND pos_system IS ?2 AND mapping_id <> ?3",
            params![import_type, pos_system, mapping_id.to_string()],
        )?;
        tx.execute(
            "UPDATE import_mapping SET is_default = 1, is_active = 1, updated_at = ?2 WHERE mapping_id = ?1",
            params![mapping_id.to_string(), Utc::now()],
        )?;
        tx.commit()?;
        Ok(())
    }

    async fn set_active(&self, mapping_id: &Uuid, active: bool) -> RepositoryResult<()> {
        let conn = self.lock()?;
        let affected = conn.execute(
            "UPDATE import_mapping SET is_active = ?2, updated_at = ?3 WHERE mapping_id = ?1",
            params![mapping_id.to_string(), active, Utc::now()],
        )?;
        if affected == 0 {
            return Err(Self::not_found(mapping_id));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo() -> SqliteImportMappingRepository {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::init_schema(&conn).unwrap();
        SqliteImportMappingRepository::new(Arc::new(Mutex::new(conn)))
    }

    fn mapping(name: &str, pos: Option<&str>) -> ImportMapping {
        ImportMapping::new(
            name,
            ImportType::Menu,
            pos.map(str::to_string),
            vec![FieldMappingEntry::manual("Item", "name")],
        )
    }

    #[tokio::test]
    async fn test_find_preferred_picks_most_used() {
        let repo = repo();
        let a = mapping("a", Some("posist"));
        let b = mapping("b", Some("posist"));
        let other = mapping("c", None);
        for m in [&a, &b, &other] {
            repo.insert(m).await.unwrap();
        }
        repo.record_usage(&b.mapping_id).await.unwrap();
        repo.record_usage(&b.mapping_id).await.unwrap();
        repo.record_usage(&a.mapping_id).await.unwrap();

        let preferred = repo
            .find_preferred(ImportType::Menu, Some("posist"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(preferred.mapping_id, b.mapping_id);
        assert_eq!(preferred.usage_count, 2);

        // pos_system 为 NULL 的映射单独成组
        let none = repo.find_preferred(ImportType::Menu, None).await.unwrap().unwrap();
        assert_eq!(none.mapping_id, other.mapping_id);
    }

    #[tokio::test]
    async fn test_inactive_mapping_is_ignored() {
        let repo = repo();
        let a = mapping("a", None);
        repo.insert(&a).await.unwrap();
        repo.set_active(&a.mapping_id, false).await.unwrap();
        assert!(repo.find_preferred(ImportType::Menu, None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_set_default_is_exclusive() {
        let repo = repo();
        let a = mapping("a", Some("x"));
        let b = mapping("b", Some("x"));
        repo.insert(&a).await.unwrap();
        repo.insert(&b).await.unwrap();

        repo.set_default(&a.mapping_id).await.unwrap();
        repo.set_default(&b.mapping_id).await.unwrap();

        let all = repo.list(ImportType::Menu, Some("x")).await.unwrap();
        let defaults: Vec<_> = all.iter().filter(|m| m.is_default).collect();
        assert_eq!(defaults.len(), 1);
        assert_eq!(defaults[0].mapping_id, b.mapping_id);
        // 使用次数相同，默认映射优先
        let preferred = repo.find_preferred(ImportType::Menu, Some("x")).await.unwrap().unwrap();
        assert_eq!(preferred.mapping_id, b.mapping_id);
    }
}
