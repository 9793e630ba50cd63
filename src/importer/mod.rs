// ==========================================
// POS 导入核心 - 导入层
// ==========================================
// 职责: 外部表格文件 → 标准记录
// 支持: CSV/TXT/TSV, XLSX/XLS/ODS, JSON, 汇总报表
// 流程: 格式识别 → 解析 → 内容分类 → 字段映射 → 校验 → 去重
// ==========================================

// 模块声明
pub mod csv_parser;
pub mod data_cleaner;
pub mod dq_validator;
pub mod duplicate_guard;
pub mod error;
pub mod field_mapper;
pub mod file_parser;
pub mod format_detector;
pub mod import_service;
pub mod json_parser;
pub mod keyword_tables;
pub mod smart_classifier;
pub mod source_file;
pub mod spreadsheet_parser;
pub mod summary_report_parser;

// 重导出核心类型
pub use csv_parser::CsvParser;
pub use dq_validator::DqValidator;
pub use duplicate_guard::{DuplicateGuard, RowVerdict};
pub use error::{ImportError, ImportResult, RowError};
pub use field_mapper::FieldMapper;
pub use file_parser::{ChunkReader, FileParser, ParseOptions, UniversalFileParser};
pub use format_detector::FormatDetector;
pub use import_service::{ImportRequest, ImportService};
pub use json_parser::JsonParser;
pub use smart_classifier::SmartClassifier;
pub use source_file::SourceFile;
pub use spreadsheet_parser::{SheetSelector, SpreadsheetParser, Workbook, Worksheet};
pub use summary_report_parser::{SummaryReport, SummaryReportParser};
