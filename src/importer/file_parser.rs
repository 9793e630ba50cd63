// ==========================================
// POS 导入核心 - 文件解析器公共契约
// ==========================================
// 支持: CSV/TXT/TSV / XLSX/XLS/ODS / JSON
// 契约: parse_all / parse_sample / parse_in_chunks / count_rows / get_headers
//       / validate_format / can_parse
// 不变式: count_rows == parse_all().len()（无行数限制时）
//         parse_in_chunks 各块按序拼接 == parse_all
// ==========================================

use crate::domain::format::{Encoding, FormatValidation};
use crate::domain::record::Record;
use crate::domain::types::SourceFormat;
use crate::importer::csv_parser::CsvParser;
use crate::importer::error::{ImportError, ImportResult};
use crate::importer::json_parser::JsonParser;
use crate::importer::source_file::SourceFile;
use crate::importer::spreadsheet_parser::{SheetSelector, SpreadsheetParser};
use serde_json::Value;
use std::collections::HashMap;

/// 全部支持的扩展名
pub const SUPPORTED_EXTENSIONS: &[&str] = &["csv", "txt", "tsv", "xlsx", "xls", "ods", "json"];

/// 全部支持的 MIME
pub const SUPPORTED_MIME_TYPES: &[&str] = &[
    "text/csv",
    "text/plain",
    "application/csv",
    "text/tab-separated-values",
    "application/vnd.ms-excel",
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
    "application/vnd.oasis.opendocument.spreadsheet",
    "application/json",
];

/// 默认全量解析时每次拉取的行数
const PULL_SIZE: usize = 1000;

// ==========================================
// ParseOptions - 解析选项
// ==========================================
#[derive(Debug, Clone, PartialEq)]
pub struct ParseOptions {
    pub has_headers: bool,
    pub delimiter: Option<char>,    // None = 自动识别
    pub quote: Option<char>,        // None = 自动识别
    pub encoding: Option<Encoding>, // None = 自动识别
    pub sheet: Option<SheetSelector>,
    pub limit: Option<usize>,
    pub offset: usize,
    pub flatten: bool,             // JSON 嵌套对象点号展开
    pub json_path: Option<String>, // JSON 子树点路径
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            has_headers: true,
            delimiter: None,
            quote: None,
            encoding: None,
            sheet: None,
            limit: None,
            offset: 0,
            flatten: true,
            json_path: None,
        }
    }
}

impl ParseOptions {
    pub fn window(&self, limit: usize, offset: usize) -> Self {
        Self {
            limit: Some(limit),
            offset,
            ..self.clone()
        }
    }

    fn unbounded(&self) -> Self {
        Self {
            limit: None,
            offset: 0,
            ..self.clone()
        }
    }
}

// ==========================================
// ChunkReader - 拉取式分块读取
// ==========================================
pub trait ChunkReader {
    /// 读取至多 max_rows 行；读尽返回 None（不会返回空块）
    fn next_chunk(&mut self, max_rows: usize) -> ImportResult<Option<Vec<Record>>>;

    /// 跳过 n 行，返回实际跳过行数
    fn skip_rows(&mut self, n: usize) -> ImportResult<usize> {
        let mut skipped = 0;
        while skipped < n {
            match self.next_chunk((n - skipped).min(PULL_SIZE))? {
                Some(chunk) => skipped += chunk.len(),
                None => break,
            }
        }
        Ok(skipped)
    }
}

/// offset / limit 窗口包装
struct WindowedReader {
    inner: Box<dyn ChunkReader + Send>,
    pending_skip: usize,
    remaining: Option<usize>,
}

impl ChunkReader for WindowedReader {
    fn next_chunk(&mut self, max_rows: usize) -> ImportResult<Option<Vec<Record>>> {
        if self.pending_skip > 0 {
            let n = self.pending_skip;
            self.pending_skip = 0;
            self.inner.skip_rows(n)?;
        }
        let want = match self.remaining {
            Some(0) => return Ok(None),
            Some(r) => r.min(max_rows),
            None => max_rows,
        };
        let chunk = self.inner.next_chunk(want.max(1))?;
        if let (Some(rows), Some(r)) = (&chunk, self.remaining.as_mut()) {
            *r = r.saturating_sub(rows.len());
        }
        Ok(chunk)
    }
}

// ==========================================
// Trait: FileParser
// ==========================================
pub trait FileParser: Send + Sync {
    fn kind(&self) -> SourceFormat;

    fn supported_extensions(&self) -> &'static [&'static str];

    fn supported_mime_types(&self) -> &'static [&'static str];

    /// 扩展名 / MIME 白名单检查
    fn can_parse(&self, file: &SourceFile) -> bool {
        self.supported_extensions().contains(&file.extension().as_str())
            || self.supported_mime_types().contains(&file.mime_type.as_str())
    }

    /// 打开分块读取器（不处理 offset / limit）
    fn open_chunks(
        &self,
        file: &SourceFile,
        options: &ParseOptions,
    ) -> ImportResult<Box<dyn ChunkReader + Send>>;

    fn get_headers(&self, file: &SourceFile, options: &ParseOptions) -> ImportResult<Vec<String>>;

    /// 结构校验（不抛错，问题进入 errors / warnings）
    fn validate_format(&self, file: &SourceFile, options: &ParseOptions) -> FormatValidation;

    /// 打开带 offset / limit 窗口的读取器
    fn open_reader(
        &self,
        file: &SourceFile,
        options: &ParseOptions,
    ) -> ImportResult<Box<dyn ChunkReader + Send>> {
        let inner = self.open_chunks(file, options)?;
        if options.offset == 0 && options.limit.is_none() {
            return Ok(inner);
        }
        Ok(Box::new(WindowedReader {
            inner,
            pending_skip: options.offset,
            remaining: options.limit,
        }))
    }

    fn parse_all(&self, file: &SourceFile, options: &ParseOptions) -> ImportResult<Vec<Record>> {
        let mut reader = self.open_reader(file, options)?;
        let mut records = Vec::new();
        while let Some(chunk) = reader.next_chunk(PULL_SIZE)? {
            records.extend(chunk);
        }
        Ok(records)
    }

    fn parse_sample(
        &self,
        file: &SourceFile,
        options: &ParseOptions,
        limit: usize,
        offset: usize,
    ) -> ImportResult<Vec<Record>> {
        self.parse_all(file, &options.window(limit, offset))
    }

    /// 流式分块解析；每块调用一次回调，返回块数
    fn parse_in_chunks(
        &self,
        file: &SourceFile,
        options: &ParseOptions,
        chunk_size: usize,
        on_chunk: &mut dyn FnMut(Vec<Record>) -> ImportResult<()>,
    ) -> ImportResult<usize> {
        let mut reader = self.open_reader(file, options)?;
        let mut chunks = 0;
        while let Some(chunk) = reader.next_chunk(chunk_size.max(1))? {
            chunks += 1;
            on_chunk(chunk)?;
        }
        Ok(chunks)
    }

    fn count_rows(&self, file: &SourceFile, options: &ParseOptions) -> ImportResult<usize> {
        let mut reader = self.open_chunks(file, &options.unbounded())?;
        let mut count = 0;
        while let Some(chunk) = reader.next_chunk(PULL_SIZE)? {
            count += chunk.len();
        }
        Ok(count)
    }
}

// ==========================================
// 行记录构造（各解析器共用）
// ==========================================

/// 表头去重 / 补名：空表头 → "Column N"，重名 → "name_2"
pub fn dedupe_headers(raw: Vec<String>) -> Vec<String> {
    let mut seen: HashMap<String, usize> = HashMap::new();
    raw.into_iter()
        .enumerate()
        .map(|(idx, h)| {
            let base = if h.is_empty() {
                format!("Column {}", idx + 1)
            } else {
                h
            };
            let n = seen.entry(base.clone()).or_insert(0);
            *n += 1;
            if *n == 1 {
                base
            } else {
                format!("{}_{}", base, n)
            }
        })
        .collect()
}

/// 按表头拼装行：缺失单元格 → null，多出单元格 → "Column N"
pub fn build_record(headers: &[String], cells: Vec<Value>) -> Record {
    let mut record = Record::new();
    let mut cells = cells.into_iter();
    for header in headers {
        record.insert(header.clone(), cells.next().unwrap_or(Value::Null));
    }
    for (offset, value) in cells.enumerate() {
        let key = format!("Column {}", headers.len() + offset + 1);
        record.insert(key, value);
    }
    record
}

// ==========================================
// UniversalFileParser - 按扩展名 / MIME 分派
// ==========================================
pub struct UniversalFileParser {
    parsers: Vec<Box<dyn FileParser>>,
}

impl Default for UniversalFileParser {
    fn default() -> Self {
        Self::new()
    }
}

impl UniversalFileParser {
    pub fn new() -> Self {
        Self {
            parsers: vec![
                Box::new(CsvParser::new()),
                Box::new(SpreadsheetParser::new()),
                Box::new(JsonParser::new()),
            ],
        }
    }

    /// 优先扩展名，其次 MIME
    pub fn parser_for(&self, file: &SourceFile) -> ImportResult<&dyn FileParser> {
        let ext = file.extension();
        self.parsers
            .iter()
            .find(|p| p.supported_extensions().contains(&ext.as_str()))
            .or_else(|| {
                self.parsers
                    .iter()
                    .find(|p| p.supported_mime_types().contains(&file.mime_type.as_str()))
            })
            .map(|p| p.as_ref())
            .ok_or_else(|| {
                ImportError::UnsupportedFormat(if ext.is_empty() {
                    file.mime_type.clone()
                } else {
                    ext
                })
            })
    }

    pub fn for_format(&self, format: SourceFormat) -> Option<&dyn FileParser> {
        self.parsers
            .iter()
            .find(|p| p.kind() == format)
            .map(|p| p.as_ref())
    }

    pub fn can_parse(&self, file: &SourceFile) -> bool {
        self.parsers.iter().any(|p| p.can_parse(file))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::importer::csv_parser::{CSV_EXTENSIONS, CSV_MIME_TYPES};
    use crate::importer::json_parser::{JSON_EXTENSIONS, JSON_MIME_TYPES};
    use crate::importer::spreadsheet_parser::{SPREADSHEET_EXTENSIONS, SPREADSHEET_MIME_TYPES};
    use serde_json::json;

    #[test]
    fn test_dedupe_headers() {
        let headers = dedupe_headers(vec![
            "name".into(),
            "".into(),
            "name".into(),
            "price".into(),
            "name".into(),
        ]);
        assert_eq!(headers, vec!["name", "Column 2", "name_2", "price", "name_3"]);
    }

    #[test]
    fn test_build_record_pads_and_extends() {
        let headers = vec!["id".to_string(), "name".to_string()];
        let short = build_record(&headers, vec![json!(1)]);
        assert_eq!(short.get("name"), Some(&Value::Null));

        let long = build_record(&headers, vec![json!(1), json!("a"), json!("x")]);
        assert_eq!(long.get("Column 3"), Some(&json!("x")));
        assert_eq!(long.len(), 3);
    }

    #[test]
    fn test_universal_dispatch_whitelists() {
        for ext in CSV_EXTENSIONS
            .iter()
            .chain(SPREADSHEET_EXTENSIONS)
            .chain(JSON_EXTENSIONS)
        {
            assert!(SUPPORTED_EXTENSIONS.contains(ext), "{} missing", ext);
        }
        for mime in CSV_MIME_TYPES
            .iter()
            .chain(SPREADSHEET_MIME_TYPES)
            .chain(JSON_MIME_TYPES)
        {
            assert!(SUPPORTED_MIME_TYPES.contains(mime), "{} missing", mime);
        }
    }
}
