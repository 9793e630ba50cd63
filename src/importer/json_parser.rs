// ==========================================
// POS 导入核心 - JSON 解析器
// ==========================================
// 归一化规则（按顺序判定）:
//   1. 数组: 对象元素直接成行（可点号展开嵌套对象，数组元素以逗号拼接）
//   2. 不含嵌套容器的单对象: 包装为一行
//   3. 含嵌套容器的对象: 每个顶层键生成带 _parent_key / _key 标记的行
//   4. 其他标量: 包装为 {"value": x}
// ==========================================

use crate::domain::format::FormatValidation;
use crate::domain::record::Record;
use crate::domain::types::SourceFormat;
use crate::importer::error::{ImportError, ImportResult};
use crate::importer::file_parser::{ChunkReader, FileParser, ParseOptions};
use crate::importer::source_file::SourceFile;
use serde_json::Value;
use std::collections::HashSet;

pub const JSON_EXTENSIONS: &[&str] = &["json"];
pub const JSON_MIME_TYPES: &[&str] = &["application/json"];

const MAX_DEPTH: usize = 5;
const MAX_OBJECTS: usize = 10_000;

pub const PARENT_KEY: &str = "_parent_key";
pub const KEY: &str = "_key";

pub struct JsonParser;

impl Default for JsonParser {
    fn default() -> Self {
        Self::new()
    }
}

impl JsonParser {
    pub fn new() -> Self {
        JsonParser
    }

    fn load(&self, file: &SourceFile) -> ImportResult<Value> {
        let bytes = file.read_all()?;
        let text = String::from_utf8_lossy(&bytes);
        let text = text.trim_start_matches('\u{feff}');
        if text.trim().is_empty() {
            return Err(ImportError::EmptyFile(file.original_name.clone()));
        }
        Ok(serde_json::from_str(text)?)
    }

    pub fn load_records(&self, file: &SourceFile, options: &ParseOptions) -> ImportResult<Vec<Record>> {
        let root = self.load(file)?;
        let target = extract_path(&root, options.json_path.as_deref())?;
        Ok(normalize(target, options.flatten))
    }
}

/// 点路径取子树（数字段作为数组下标）
pub fn extract_path<'a>(root: &'a Value, path: Option<&str>) -> ImportResult<&'a Value> {
    let path = match path.map(str::trim).filter(|p| !p.is_empty()) {
        Some(p) => p,
        None => return Ok(root),
    };
    let mut node = root;
    for segment in path.split('.') {
        node = match node {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        }
        .ok_or_else(|| ImportError::JsonParseError(format!("路径不存在: {}", path)))?;
    }
    Ok(node)
}

/// 通用树 → 扁平行记录
pub fn normalize(value: &Value, flatten: bool) -> Vec<Record> {
    match value {
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::Object(map) => object_record(map, flatten),
                other => scalar_record(other),
            })
            .collect(),
        Value::Object(map) if !map.values().any(is_container) => vec![object_record(map, flatten)],
        Value::Object(map) => {
            let mut records = Vec::new();
            for (key, child) in map {
                match child {
                    Value::Array(items) => {
                        for (idx, item) in items.iter().enumerate() {
                            let mut record = match item {
                                Value::Object(m) => object_record(m, flatten),
                                other => scalar_record(other),
                            };
                            record.insert(PARENT_KEY.to_string(), Value::String(key.clone()));
                            record.insert(KEY.to_string(), Value::from(idx));
                            records.push(record);
                        }
                    }
                    Value::Object(m) => {
                        let mut record = object_record(m, flatten);
                        record.insert(KEY.to_string(), Value::String(key.clone()));
                        records.push(record);
                    }
                    other => {
                        let mut record = scalar_record(other);
                        record.insert(KEY.to_string(), Value::String(key.clone()));
                        records.push(record);
                    }
                }
            }
            records
        }
        other => vec![scalar_record(other)],
    }
}

fn is_container(v: &Value) -> bool {
    matches!(v, Value::Array(_) | Value::Object(_))
}

fn scalar_record(value: &Value) -> Record {
    let mut record = Record::new();
    record.insert("value".to_string(), clean_scalar(value));
    record
}

/// 对象 → 单行（点号展开嵌套对象）
pub fn flatten_object(map: &serde_json::Map<String, Value>) -> Record {
    object_record(map, true)
}

fn object_record(map: &serde_json::Map<String, Value>, flatten: bool) -> Record {
    let mut record = Record::new();
    for (key, value) in map {
        insert_flattened(&mut record, key.clone(), value, flatten);
    }
    record
}

fn insert_flattened(record: &mut Record, key: String, value: &Value, flatten: bool) {
    match value {
        Value::Object(map) if flatten => {
            for (child_key, child) in map {
                insert_flattened(record, format!("{}.{}", key, child_key), child, flatten);
            }
        }
        Value::Object(_) => {
            record.insert(key, Value::String(value.to_string()));
        }
        Value::Array(items) => {
            let joined = items
                .iter()
                .map(|item| match item {
                    Value::String(s) => s.trim().to_string(),
                    other => other.to_string(),
                })
                .collect::<Vec<_>>()
                .join(",");
            record.insert(key, if joined.is_empty() { Value::Null } else { Value::String(joined) });
        }
        other => {
            record.insert(key, clean_scalar(other));
        }
    }
}

/// 字符串去空白，空串 → null；其他标量原样保留
fn clean_scalar(value: &Value) -> Value {
    match value {
        Value::String(s) => {
            let t = s.trim();
            if t.is_empty() {
                Value::Null
            } else {
                Value::String(t.to_string())
            }
        }
        other => other.clone(),
    }
}

/// 嵌套深度（标量 0）
pub fn depth(value: &Value) -> usize {
    match value {
        Value::Array(items) => 1 + items.iter().map(depth).max().unwrap_or(0),
        Value::Object(map) => 1 + map.values().map(depth).max().unwrap_or(0),
        _ => 0,
    }
}

/// 对象总数（含嵌套）
pub fn object_count(value: &Value) -> usize {
    match value {
        Value::Array(items) => items.iter().map(object_count).sum(),
        Value::Object(map) => 1 + map.values().map(object_count).sum::<usize>(),
        _ => 0,
    }
}

// ==========================================
// VecChunkReader - 已载入内存的行
// ==========================================
pub struct VecChunkReader {
    rows: std::vec::IntoIter<Record>,
}

impl VecChunkReader {
    pub fn new(rows: Vec<Record>) -> Self {
        Self {
            rows: rows.into_iter(),
        }
    }
}

impl ChunkReader for VecChunkReader {
    fn next_chunk(&mut self, max_rows: usize) -> ImportResult<Option<Vec<Record>>> {
        let chunk: Vec<Record> = self.rows.by_ref().take(max_rows).collect();
        Ok(if chunk.is_empty() { None } else { Some(chunk) })
    }

    fn skip_rows(&mut self, n: usize) -> ImportResult<usize> {
        Ok(self.rows.by_ref().take(n).count())
    }
}

impl FileParser for JsonParser {
    fn kind(&self) -> SourceFormat {
        SourceFormat::Json
    }

    fn supported_extensions(&self) -> &'static [&'static str] {
        JSON_EXTENSIONS
    }

    fn supported_mime_types(&self) -> &'static [&'static str] {
        JSON_MIME_TYPES
    }

    fn open_chunks(
        &self,
        file: &SourceFile,
        options: &ParseOptions,
    ) -> ImportResult<Box<dyn ChunkReader + Send>> {
        Ok(Box::new(VecChunkReader::new(self.load_records(file, options)?)))
    }

    /// 各行键的并集（首次出现顺序）
    fn get_headers(&self, file: &SourceFile, options: &ParseOptions) -> ImportResult<Vec<String>> {
        let records = self.load_records(file, options)?;
        let mut seen = HashSet::new();
        let mut headers = Vec::new();
        for record in &records {
            for key in record.keys() {
                if seen.insert(key.clone()) {
                    headers.push(key.clone());
                }
            }
        }
        Ok(headers)
    }

    fn validate_format(&self, file: &SourceFile, options: &ParseOptions) -> FormatValidation {
        let mut result = FormatValidation::new();
        if file.is_empty() {
            result.error("empty_file", "文件为空（0 字节）");
            return result;
        }
        let root = match self.load(file) {
            Ok(v) => v,
            Err(ImportError::EmptyFile(_)) => {
                result.error("empty_file", "文件只含空白");
                return result;
            }
            Err(e) => {
                result.error("invalid_json", e.to_string());
                return result;
            }
        };
        let target = match extract_path(&root, options.json_path.as_deref()) {
            Ok(v) => v,
            Err(e) => {
                result.error("path_not_found", e.to_string());
                return result;
            }
        };

        let (d, objects) = (depth(target), object_count(target));
        let records = normalize(target, options.flatten).len();
        result.detail("depth", d);
        result.detail("objects", objects);
        result.detail("rows", records);
        if records == 0 {
            result.error("no_rows", "JSON 中没有可导入的记录");
        }
        if d > MAX_DEPTH {
            result.warning("deep_nesting", format!("嵌套深度 {} 超过 {} 层", d, MAX_DEPTH));
        }
        if objects > MAX_OBJECTS {
            result.warning("too_many_objects", format!("对象数 {} 超过 {}", objects, MAX_OBJECTS));
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_array_of_objects_flattened() {
        let records = normalize(&json!([{"a": 1, "b": {"c": 2}}]), true);
        assert_eq!(records.len(), 1);
        assert_eq!(Value::Object(records[0].clone()), json!({"a": 1, "b.c": 2}));
    }

    #[test]
    fn test_unflattened_and_arrays() {
        let records = normalize(&json!([{"b": {"c": 2}, "tags": ["x", "y"]}]), false);
        assert_eq!(records[0].get("b"), Some(&json!("{\"c\":2}")));
        assert_eq!(records[0].get("tags"), Some(&json!("x,y")));
    }

    #[test]
    fn test_single_object_and_scalar() {
        assert_eq!(normalize(&json!({"name": "Burger"}), true).len(), 1);
        let scalar = normalize(&json!(42), true);
        assert_eq!(scalar[0].get("value"), Some(&json!(42)));
    }

    #[test]
    fn test_nested_object_synthetic_records() {
        let value = json!({
            "items": [{"name": "Burger"}, {"name": "Soda"}],
            "meta": {"source": "square"},
            "version": 2
        });
        let records = normalize(&value, true);
        assert_eq!(records.len(), 4);
        assert_eq!(records[0].get(PARENT_KEY), Some(&json!("items")));
        assert_eq!(records[1].get(KEY), Some(&json!(1)));
        assert_eq!(records[2].get(KEY), Some(&json!("meta")));
        assert_eq!(records[3].get("value"), Some(&json!(2)));
    }

    #[test]
    fn test_extract_path() {
        let value = json!({"data": {"items": [{"id": 1}, {"id": 2}]}});
        let items = extract_path(&value, Some("data.items")).unwrap();
        assert_eq!(normalize(items, true).len(), 2);
        assert_eq!(extract_path(&value, Some("data.items.1.id")).unwrap(), &json!(2));
        assert!(extract_path(&value, Some("data.missing")).is_err());
    }

    #[test]
    fn test_depth_and_objects() {
        assert_eq!(depth(&json!(1)), 0);
        assert_eq!(depth(&json!([{"a": {"b": 1}}])), 3);
        assert_eq!(object_count(&json!([{"a": {"b": 1}}, {}])), 3);
    }
}
