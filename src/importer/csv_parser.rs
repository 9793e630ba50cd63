// ==========================================
// POS 导入核心 - CSV 解析器
// ==========================================
// 支持: .csv / .txt / .tsv
// 方言: 分隔符 / 引号可指定，否则在前 5 行上对候选方言打分
// 行规则: 缺失单元格 → null，多出单元格 → "Column N"，整行为空则跳过
// ==========================================

use crate::domain::format::{Encoding, FormatValidation};
use crate::domain::record::{is_blank_record, Record};
use crate::domain::types::SourceFormat;
use crate::importer::data_cleaner::DataCleaner;
use crate::importer::error::ImportResult;
use crate::importer::file_parser::{
    build_record, dedupe_headers, ChunkReader, FileParser, ParseOptions,
};
use crate::importer::format_detector::{decode, FormatDetector, PROBE_WINDOW};
use crate::importer::source_file::SourceFile;
use csv::{ByteRecord, ReaderBuilder};
use std::collections::HashMap;
use std::fs::File;
use tracing::debug;

pub const CSV_EXTENSIONS: &[&str] = &["csv", "txt", "tsv"];
pub const CSV_MIME_TYPES: &[&str] = &[
    "text/csv",
    "text/plain",
    "application/csv",
    "text/tab-separated-values",
];

/// 方言候选（声明顺序即并列时的优先顺序）
pub const DIALECT_CANDIDATES: &[(char, char)] = &[
    (',', '"'),
    (';', '"'),
    ('\t', '"'),
    ('|', '"'),
    (',', '\''),
    (';', '\''),
];

/// 方言探测读取的行数
const DIALECT_SAMPLE_ROWS: usize = 5;
/// 结构校验抽样行数
const VALIDATION_SAMPLE_ROWS: usize = 10;
const MAX_COLUMNS: usize = 100;

// ==========================================
// Dialect - 解析方言
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Dialect {
    pub delimiter: char,
    pub quote: char,
    pub encoding: Encoding,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DialectParse {
    pub dialect: Dialect,
    pub score: f64,
    pub records: Vec<Record>,
}

pub struct CsvParser;

impl Default for CsvParser {
    fn default() -> Self {
        Self::new()
    }
}

impl CsvParser {
    pub fn new() -> Self {
        CsvParser
    }

    /// 确定方言：显式选项优先，其余由候选方言打分决定
    pub fn resolve_dialect(&self, file: &SourceFile, options: &ParseOptions) -> ImportResult<Dialect> {
        if let (Some(delimiter), Some(quote), Some(encoding)) =
            (options.delimiter, options.quote, options.encoding)
        {
            return Ok(Dialect {
                delimiter,
                quote,
                encoding,
            });
        }
        let head = file.read_head(PROBE_WINDOW)?;
        let encoding = options
            .encoding
            .unwrap_or_else(|| FormatDetector::detect_encoding(&head));
        let (detected_delimiter, detected_quote) = if file.extension() == "tsv" {
            ('\t', '"')
        } else {
            let (delimiter, quote, _) = Self::detect_dialect(&decode(&head, encoding));
            (delimiter, quote)
        };
        Ok(Dialect {
            delimiter: options.delimiter.unwrap_or(detected_delimiter),
            quote: options.quote.unwrap_or(detected_quote),
            encoding,
        })
    }

    /// 在样本前 5 行上尝试候选方言，取最高分
    ///
    /// 分数 = 解析成功率 × 50 + 列数一致率 × 30 + min(平均列数, 10) × 2；
    /// 分隔符从未出现（全部单列）时不计一致率
    pub fn detect_dialect(sample: &str) -> (char, char, f64) {
        let mut best = (DIALECT_CANDIDATES[0].0, DIALECT_CANDIDATES[0].1, f64::MIN);
        for (delimiter, quote) in DIALECT_CANDIDATES {
            let score = score_dialect(sample, *delimiter, *quote);
            if score > best.2 {
                best = (*delimiter, *quote, score);
            }
        }
        best
    }

    /// 不预设分隔符的解析：先探测方言，再全量解析
    pub fn parse_with_dialect_detection(
        &self,
        file: &SourceFile,
        options: &ParseOptions,
    ) -> ImportResult<DialectParse> {
        let head = file.read_head(PROBE_WINDOW)?;
        let encoding = options
            .encoding
            .unwrap_or_else(|| FormatDetector::detect_encoding(&head));
        let (delimiter, quote, score) = Self::detect_dialect(&decode(&head, encoding));
        debug!(file = %file.original_name, delimiter = ?delimiter, quote = ?quote, score, "CSV 方言探测完成");

        let resolved = ParseOptions {
            delimiter: Some(delimiter),
            quote: Some(quote),
            encoding: Some(encoding),
            ..options.clone()
        };
        let records = self.parse_all(file, &resolved)?;
        Ok(DialectParse {
            dialect: Dialect {
                delimiter,
                quote,
                encoding,
            },
            score,
            records,
        })
    }

    fn open(&self, file: &SourceFile, options: &ParseOptions) -> ImportResult<CsvChunkReader> {
        let dialect = self.resolve_dialect(file, options)?;
        let reader = ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .delimiter(dialect.delimiter as u8)
            .quote(dialect.quote as u8)
            .from_reader(File::open(&file.path)?);

        let mut chunk_reader = CsvChunkReader {
            reader,
            encoding: dialect.encoding,
            headers: Vec::new(),
            buf: ByteRecord::new(),
        };
        if options.has_headers {
            chunk_reader.read_headers()?;
        }
        Ok(chunk_reader)
    }

    /// 原始行（不清洗）列数，用于结构校验
    fn sample_widths(&self, file: &SourceFile, options: &ParseOptions, rows: usize) -> ImportResult<Vec<usize>> {
        let dialect = self.resolve_dialect(file, options)?;
        let mut reader = ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .delimiter(dialect.delimiter as u8)
            .quote(dialect.quote as u8)
            .from_reader(File::open(&file.path)?);
        let mut widths = Vec::with_capacity(rows);
        let mut buf = ByteRecord::new();
        while widths.len() < rows && reader.read_byte_record(&mut buf)? {
            widths.push(buf.len());
        }
        Ok(widths)
    }
}

fn score_dialect(sample: &str, delimiter: char, quote: char) -> f64 {
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(delimiter as u8)
        .quote(quote as u8)
        .from_reader(sample.as_bytes());

    let mut attempted = 0usize;
    let mut widths = Vec::new();
    for result in reader.byte_records().take(DIALECT_SAMPLE_ROWS) {
        attempted += 1;
        if let Ok(record) = result {
            widths.push(record.len());
        }
    }
    if attempted == 0 {
        return 0.0;
    }

    let success = widths.len() as f64 / attempted as f64;
    let mut freq: HashMap<usize, usize> = HashMap::new();
    for w in &widths {
        *freq.entry(*w).or_insert(0) += 1;
    }
    let modal = freq.values().copied().max().unwrap_or(0);
    let single_column = widths.iter().all(|w| *w <= 1);
    let consistency = if widths.is_empty() || single_column {
        0.0
    } else {
        modal as f64 / widths.len() as f64
    };
    let avg_cols = if widths.is_empty() {
        0.0
    } else {
        widths.iter().sum::<usize>() as f64 / widths.len() as f64
    };

    success * 50.0 + consistency * 30.0 + avg_cols.min(10.0) * 2.0
}

// ==========================================
// CsvChunkReader
// ==========================================
struct CsvChunkReader {
    reader: csv::Reader<File>,
    encoding: Encoding,
    headers: Vec<String>,
    buf: ByteRecord,
}

impl CsvChunkReader {
    fn read_headers(&mut self) -> ImportResult<()> {
        if self.reader.read_byte_record(&mut self.buf)? {
            let raw = self
                .buf
                .iter()
                .map(|f| DataCleaner::clean_header(&decode(f, self.encoding)))
                .collect();
            self.headers = dedupe_headers(raw);
        }
        Ok(())
    }

    fn current_record(&self) -> Record {
        let cells = self
            .buf
            .iter()
            .map(|f| DataCleaner::clean_text(&decode(f, self.encoding)))
            .collect();
        build_record(&self.headers, cells)
    }
}

impl ChunkReader for CsvChunkReader {
    fn next_chunk(&mut self, max_rows: usize) -> ImportResult<Option<Vec<Record>>> {
        let mut rows = Vec::with_capacity(max_rows.min(4096));
        while rows.len() < max_rows && self.reader.read_byte_record(&mut self.buf)? {
            let record = self.current_record();
            if is_blank_record(&record) {
                continue;
            }
            rows.push(record);
        }
        Ok(if rows.is_empty() { None } else { Some(rows) })
    }

    fn skip_rows(&mut self, n: usize) -> ImportResult<usize> {
        let mut skipped = 0;
        while skipped < n && self.reader.read_byte_record(&mut self.buf)? {
            let blank = self
                .buf
                .iter()
                .all(|f| decode(f, self.encoding).trim_start_matches('\u{feff}').trim().is_empty());
            if !blank {
                skipped += 1;
            }
        }
        Ok(skipped)
    }
}

// ==========================================
// FileParser 实现
// ==========================================
impl FileParser for CsvParser {
    fn kind(&self) -> SourceFormat {
        SourceFormat::Csv
    }

    fn supported_extensions(&self) -> &'static [&'static str] {
        CSV_EXTENSIONS
    }

    fn supported_mime_types(&self) -> &'static [&'static str] {
        CSV_MIME_TYPES
    }

    fn open_chunks(
        &self,
        file: &SourceFile,
        options: &ParseOptions,
    ) -> ImportResult<Box<dyn ChunkReader + Send>> {
        Ok(Box::new(self.open(file, options)?))
    }

    fn get_headers(&self, file: &SourceFile, options: &ParseOptions) -> ImportResult<Vec<String>> {
        let reader = self.open(file, options)?;
        Ok(reader.headers)
    }

    fn validate_format(&self, file: &SourceFile, options: &ParseOptions) -> FormatValidation {
        let mut result = FormatValidation::new();
        if file.is_empty() {
            result.error("empty_file", "文件为空（0 字节）");
            return result;
        }
        if !self.can_parse(file) {
            result.error(
                "unsupported_extension",
                format!("扩展名 / MIME 不受支持: {} ({})", file.extension(), file.mime_type),
            );
        }

        match self.count_rows(file, options) {
            Ok(0) => result.error("no_rows", "未读取到任何数据行"),
            Ok(rows) => result.detail("rows", rows),
            Err(e) => {
                result.error("unreadable", format!("CSV 无法读取: {}", e));
                return result;
            }
        }

        match self.sample_widths(file, options, VALIDATION_SAMPLE_ROWS) {
            Ok(widths) => {
                let max = widths.iter().copied().max().unwrap_or(0);
                let min = widths.iter().copied().min().unwrap_or(0);
                if max != min {
                    result.warning(
                        "inconsistent_columns",
                        format!("前 {} 行列数不一致（{}-{} 列）", widths.len(), min, max),
                    );
                }
                if max > MAX_COLUMNS {
                    result.warning("too_many_columns", format!("列数 {} 超过 {}", max, MAX_COLUMNS));
                }
                result.detail("columns", max);
            }
            Err(e) => result.warning("sample_failed", format!("抽样失败: {}", e)),
        }
        result
    }
}
