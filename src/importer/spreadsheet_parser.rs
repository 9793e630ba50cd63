// ==========================================
// POS 导入核心 - 表格解析器
// ==========================================
// 支持: .xlsx / .xls / .ods（calamine）
// 表头: 选中工作表的第 1 行；整行为空的行跳过
// 工作表以绝对坐标网格保存，合并区域坐标与之对齐
// ==========================================

use crate::domain::format::FormatValidation;
use crate::domain::record::{is_blank_record, Record};
use crate::domain::types::SourceFormat;
use crate::importer::data_cleaner::DataCleaner;
use crate::importer::error::{ImportError, ImportResult};
use crate::importer::file_parser::{
    build_record, dedupe_headers, ChunkReader, FileParser, ParseOptions,
};
use crate::importer::source_file::SourceFile;
use calamine::{open_workbook_auto, Data, Range, Reader, Sheets};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use tracing::debug;

pub const SPREADSHEET_EXTENSIONS: &[&str] = &["xlsx", "xls", "ods"];
pub const SPREADSHEET_MIME_TYPES: &[&str] = &[
    "application/vnd.ms-excel",
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
    "application/vnd.oasis.opendocument.spreadsheet",
];

const MAX_ROWS: usize = 100_000;
const MAX_COLUMNS: usize = 100;
/// 结构分析抽样行数
pub const ANALYSIS_ROWS: usize = 1000;

static EMPTY_CELL: Data = Data::Empty;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SheetSelector {
    Index(usize),
    Name(String),
}

// ==========================================
// MergedRegion - 合并单元格区域（含端点，0 起）
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergedRegion {
    pub start: (u32, u32), // (row, col)
    pub end: (u32, u32),
}

impl MergedRegion {
    pub fn new(start: (u32, u32), end: (u32, u32)) -> Self {
        Self { start, end }
    }

    pub fn cell_count(&self) -> usize {
        let rows = self.end.0.saturating_sub(self.start.0) as usize + 1;
        let cols = self.end.1.saturating_sub(self.start.1) as usize + 1;
        rows * cols
    }
}

// ==========================================
// Worksheet - 已加载的工作表
// ==========================================
#[derive(Debug, Clone, PartialEq)]
pub struct Worksheet {
    pub name: String,
    pub cells: Vec<Vec<Data>>, // 行优先绝对网格
    pub merged: Vec<MergedRegion>,
}

impl Worksheet {
    pub fn new(name: impl Into<String>, cells: Vec<Vec<Data>>) -> Self {
        Self {
            name: name.into(),
            cells,
            merged: Vec::new(),
        }
    }

    pub fn with_merged(mut self, merged: Vec<MergedRegion>) -> Self {
        self.merged = merged;
        self
    }

    /// calamine Range → 绝对网格（补齐 Range 起点之前的空行 / 空列）
    pub fn from_range(name: impl Into<String>, range: &Range<Data>) -> Self {
        let (row0, col0) = range
            .start()
            .map(|(r, c)| (r as usize, c as usize))
            .unwrap_or((0, 0));
        let mut cells: Vec<Vec<Data>> = vec![Vec::new(); row0];
        for row in range.rows() {
            let mut line = vec![Data::Empty; col0];
            line.extend(row.iter().cloned());
            cells.push(line);
        }
        Self::new(name, cells)
    }

    pub fn height(&self) -> usize {
        self.cells.len()
    }

    pub fn width(&self) -> usize {
        self.cells.iter().map(Vec::len).max().unwrap_or(0)
    }

    pub fn cell(&self, row: usize, col: usize) -> &Data {
        self.cells
            .get(row)
            .and_then(|r| r.get(col))
            .unwrap_or(&EMPTY_CELL)
    }

    pub fn row(&self, row: usize) -> &[Data] {
        self.cells.get(row).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn is_blank_row(&self, row: usize) -> bool {
        self.row(row).iter().all(DataCleaner::is_blank_cell)
    }

    /// 单元格文本（非文本单元格返回 None）
    pub fn text_at(&self, row: usize, col: usize) -> Option<&str> {
        match self.cell(row, col) {
            Data::String(s) => {
                let t = s.trim();
                if t.is_empty() {
                    None
                } else {
                    Some(t)
                }
            }
            _ => None,
        }
    }

    /// 单元格数值（数值单元格或数值样式文本）
    pub fn number_at(&self, row: usize, col: usize) -> Option<f64> {
        match self.cell(row, col) {
            Data::Int(i) => Some(*i as f64),
            Data::Float(f) => Some(*f),
            Data::DateTime(dt) => Some(dt.as_f64()),
            Data::String(s) => DataCleaner::coerce_number(s.trim()).and_then(|v| v.as_f64()),
            _ => None,
        }
    }

    pub fn merged_cell_count(&self) -> usize {
        self.merged.iter().map(MergedRegion::cell_count).sum()
    }

    /// 合并单元格占比（合并覆盖的单元格数 / 总单元格数）
    pub fn merged_density(&self) -> f64 {
        let total = self.height() * self.width();
        if total == 0 {
            return 0.0;
        }
        (self.merged_cell_count() as f64 / total as f64).min(1.0)
    }
}

// ==========================================
// Workbook - 已加载的工作簿
// ==========================================
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Workbook {
    pub sheets: Vec<Worksheet>,
}

impl Workbook {
    pub fn new(sheets: Vec<Worksheet>) -> Self {
        Self { sheets }
    }

    /// 加载全部工作表（xlsx 同时读取合并区域）
    pub fn open(file: &SourceFile) -> ImportResult<Self> {
        let mut workbook = open_workbook_auto(&file.path)?;
        let mut merged_by_sheet: HashMap<String, Vec<MergedRegion>> = HashMap::new();
        if let Sheets::Xlsx(ref mut xlsx) = workbook {
            xlsx.load_merged_regions()
                .map_err(|e| ImportError::ExcelParseError(e.to_string()))?;
            for name in xlsx.sheet_names() {
                let regions = xlsx
                    .merged_regions_by_sheet(&name)
                    .into_iter()
                    .map(|(_, _, dims)| MergedRegion::new(dims.start, dims.end))
                    .collect();
                merged_by_sheet.insert(name, regions);
            }
        }

        let mut sheets = Vec::new();
        for name in workbook.sheet_names() {
            let range = workbook.worksheet_range(&name)?;
            let merged = merged_by_sheet.remove(&name).unwrap_or_default();
            sheets.push(Worksheet::from_range(name, &range).with_merged(merged));
        }
        debug!(file = %file.original_name, sheets = sheets.len(), "工作簿加载完成");
        Ok(Self { sheets })
    }

    /// 按序号 / 名称选择工作表，默认第一个
    pub fn sheet(&self, selector: Option<&SheetSelector>) -> ImportResult<&Worksheet> {
        let found = match selector {
            None => self.sheets.first(),
            Some(SheetSelector::Index(i)) => self.sheets.get(*i),
            Some(SheetSelector::Name(name)) => self.sheets.iter().find(|s| &s.name == name),
        };
        found.ok_or_else(|| {
            ImportError::SheetNotFound(match selector {
                Some(SheetSelector::Name(n)) => n.clone(),
                Some(SheetSelector::Index(i)) => format!("#{}", i),
                None => "（工作簿无工作表）".to_string(),
            })
        })
    }
}

// ==========================================
// SheetChunkReader
// ==========================================
pub struct SheetChunkReader {
    sheet: Worksheet,
    headers: Vec<String>,
    next_row: usize,
}

impl SheetChunkReader {
    pub fn new(sheet: Worksheet, has_headers: bool) -> Self {
        let headers = if has_headers {
            sheet_headers(&sheet)
        } else {
            Vec::new()
        };
        Self {
            sheet,
            headers,
            next_row: if has_headers { 1 } else { 0 },
        }
    }
}

impl ChunkReader for SheetChunkReader {
    fn next_chunk(&mut self, max_rows: usize) -> ImportResult<Option<Vec<Record>>> {
        let width = self.sheet.width();
        let mut rows = Vec::new();
        while rows.len() < max_rows && self.next_row < self.sheet.height() {
            let r = self.next_row;
            self.next_row += 1;
            let row = self.sheet.row(r);
            let cells: Vec<Value> = (0..width)
                .map(|c| row.get(c).map(DataCleaner::clean_cell).unwrap_or(Value::Null))
                .collect();
            let record = build_record(&self.headers, cells);
            if is_blank_record(&record) {
                continue;
            }
            rows.push(record);
        }
        Ok(if rows.is_empty() { None } else { Some(rows) })
    }
}

/// 第 1 行作为表头（数值表头转为文本）
pub fn sheet_headers(sheet: &Worksheet) -> Vec<String> {
    let raw = (0..sheet.width())
        .map(|c| {
            DataCleaner::to_text(&DataCleaner::clean_cell(sheet.cell(0, c)))
                .map(|s| DataCleaner::clean_header(&s))
                .unwrap_or_default()
        })
        .collect();
    dedupe_headers(raw)
}

// ==========================================
// 结构分析
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CellType {
    Integer,
    Float,
    Text,
    Boolean,
    Date,
    Empty,
}

fn cell_type(cell: &Data) -> CellType {
    match cell {
        Data::Empty => CellType::Empty,
        Data::Int(_) => CellType::Integer,
        Data::Float(f) if f.fract() == 0.0 => CellType::Integer,
        Data::Float(_) => CellType::Float,
        Data::Bool(_) => CellType::Boolean,
        Data::DateTime(_) => CellType::Date,
        Data::String(s) => match DataCleaner::clean_text(s) {
            Value::Null => CellType::Empty,
            Value::Number(n) if n.is_i64() => CellType::Integer,
            Value::Number(_) => CellType::Float,
            _ => CellType::Text,
        },
        _ => CellType::Text,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnProfile {
    pub header: String,
    pub dominant_type: CellType,
    pub type_consistency: f64, // 主类型占非空单元格比例
    pub null_percentage: f64,  // 空单元格
    pub empty_percentage: f64, // 空白文本
    pub sample_values: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructureAnalysis {
    pub sheet_name: String,
    pub rows: usize,
    pub columns: usize,
    pub merged_regions: usize,
    pub merged_density: f64,
    pub analyzed_rows: usize,
    pub column_profiles: Vec<ColumnProfile>,
}

/// 逐列统计主类型 / 一致率 / 空值率（前 1000 个数据行）
pub fn analyze_structure(sheet: &Worksheet, has_headers: bool) -> StructureAnalysis {
    let headers = if has_headers {
        sheet_headers(sheet)
    } else {
        (1..=sheet.width()).map(|i| format!("Column {}", i)).collect()
    };
    let first = if has_headers { 1 } else { 0 };
    let last = sheet.height().min(first + ANALYSIS_ROWS);
    let analyzed = last.saturating_sub(first);

    let column_profiles = headers
        .iter()
        .enumerate()
        .map(|(c, header)| {
            let mut counts: HashMap<CellType, usize> = HashMap::new();
            let mut nulls = 0usize;
            let mut blanks = 0usize;
            let mut samples = Vec::new();
            for r in first..last {
                let cell = sheet.cell(r, c);
                match cell {
                    Data::Empty => nulls += 1,
                    Data::String(s) if s.trim().is_empty() => blanks += 1,
                    _ => {
                        *counts.entry(cell_type(cell)).or_insert(0) += 1;
                        if samples.len() < 5 {
                            samples.push(DataCleaner::clean_cell(cell));
                        }
                    }
                }
            }
            let non_empty: usize = counts.values().sum();
            let (dominant_type, dominant) = counts
                .iter()
                .max_by(|a, b| a.1.cmp(b.1).then_with(|| type_rank(*b.0).cmp(&type_rank(*a.0))))
                .map(|(t, n)| (*t, *n))
                .unwrap_or((CellType::Empty, 0));
            let pct = |n: usize| {
                if analyzed == 0 {
                    0.0
                } else {
                    n as f64 / analyzed as f64 * 100.0
                }
            };
            ColumnProfile {
                header: header.clone(),
                dominant_type,
                type_consistency: if non_empty == 0 {
                    0.0
                } else {
                    dominant as f64 / non_empty as f64
                },
                null_percentage: pct(nulls),
                empty_percentage: pct(blanks),
                sample_values: samples,
            }
        })
        .collect();

    StructureAnalysis {
        sheet_name: sheet.name.clone(),
        rows: sheet.height(),
        columns: sheet.width(),
        merged_regions: sheet.merged.len(),
        merged_density: sheet.merged_density(),
        analyzed_rows: analyzed,
        column_profiles,
    }
}

/// 并列时的稳定顺序
fn type_rank(t: CellType) -> u8 {
    match t {
        CellType::Integer => 0,
        CellType::Float => 1,
        CellType::Date => 2,
        CellType::Boolean => 3,
        CellType::Text => 4,
        CellType::Empty => 5,
    }
}

/// 工作簿结构校验（纯函数，便于对内存工作簿测试）
pub fn validate_workbook(workbook: &Workbook, selector: Option<&SheetSelector>) -> FormatValidation {
    let mut result = FormatValidation::new();
    if workbook.sheets.is_empty() {
        result.error("no_worksheets", "工作簿不含任何工作表");
        return result;
    }
    result.detail("sheets", workbook.sheets.len());

    let sheet = match workbook.sheet(selector) {
        Ok(s) => s,
        Err(e) => {
            result.error("sheet_not_found", e.to_string());
            return result;
        }
    };
    let (rows, cols) = (sheet.height(), sheet.width());
    result.detail("rows", rows);
    result.detail("columns", cols);
    result.detail("merged_regions", sheet.merged.len());

    if rows * cols <= 1 && DataCleaner::is_blank_cell(sheet.cell(0, 0)) {
        result.error("empty_sheet", format!("工作表 {} 为空", sheet.name));
        return result;
    }
    if rows > MAX_ROWS {
        result.warning("too_many_rows", format!("行数 {} 超过 {}，导入可能较慢", rows, MAX_ROWS));
    }
    if cols > MAX_COLUMNS {
        result.warning("too_many_columns", format!("列数 {} 超过 {}", cols, MAX_COLUMNS));
    }
    if !sheet.merged.is_empty() {
        result.warning(
            "merged_cells",
            format!("存在 {} 个合并区域，文件可能是格式化报表而非明细数据", sheet.merged.len()),
        );
    }
    result
}

// ==========================================
// SpreadsheetParser
// ==========================================
pub struct SpreadsheetParser;

impl Default for SpreadsheetParser {
    fn default() -> Self {
        Self::new()
    }
}

impl SpreadsheetParser {
    pub fn new() -> Self {
        SpreadsheetParser
    }

    pub fn load_sheet(&self, file: &SourceFile, options: &ParseOptions) -> ImportResult<Worksheet> {
        let workbook = Workbook::open(file)?;
        Ok(workbook.sheet(options.sheet.as_ref())?.clone())
    }

    pub fn analyze_structure(
        &self,
        file: &SourceFile,
        options: &ParseOptions,
    ) -> ImportResult<StructureAnalysis> {
        let sheet = self.load_sheet(file, options)?;
        Ok(analyze_structure(&sheet, options.has_headers))
    }
}

impl FileParser for SpreadsheetParser {
    fn kind(&self) -> SourceFormat {
        SourceFormat::Spreadsheet
    }

    fn supported_extensions(&self) -> &'static [&'static str] {
        SPREADSHEET_EXTENSIONS
    }

    fn supported_mime_types(&self) -> &'static [&'static str] {
        SPREADSHEET_MIME_TYPES
    }

    fn open_chunks(
        &self,
        file: &SourceFile,
        options: &ParseOptions,
    ) -> ImportResult<Box<dyn ChunkReader + Send>> {
        let sheet = self.load_sheet(file, options)?;
        Ok(Box::new(SheetChunkReader::new(sheet, options.has_headers)))
    }

    fn get_headers(&self, file: &SourceFile, options: &ParseOptions) -> ImportResult<Vec<String>> {
        let sheet = self.load_sheet(file, options)?;
        Ok(sheet_headers(&sheet))
    }

    fn validate_format(&self, file: &SourceFile, options: &ParseOptions) -> FormatValidation {
        if file.is_empty() {
            let mut result = FormatValidation::new();
            result.error("empty_file", "文件为空（0 字节）");
            return result;
        }
        match Workbook::open(file) {
            Ok(workbook) => validate_workbook(&workbook, options.sheet.as_ref()),
            Err(e) => {
                let mut result = FormatValidation::new();
                result.error("unreadable", format!("工作簿无法读取: {}", e));
                result
            }
        }
    }
}
