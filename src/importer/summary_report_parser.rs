// ==========================================
// POS 导入核心 - 汇总报表解析器
// ==========================================
// 输入: 格式化的汇总报表工作表（合并单元格 / 分区 / 聚合数值）
// 输出: 整个文件对应的唯一一份结构化文档（不产生明细行）
// 方法: 上下文标签推断: 数值单元格的左侧或上方文本决定其含义
// ==========================================

use crate::domain::record::Record;
use crate::importer::data_cleaner::DataCleaner;
use crate::importer::error::ImportResult;
use crate::importer::file_parser::ParseOptions;
use crate::importer::json_parser::flatten_object;
use crate::importer::keyword_tables::{
    normalize, BUSINESS_NAME_PATTERN, LOCATION_PATTERN, PAYMENT_METHOD_PATTERNS,
    PERIOD_DATE_LABELS, PERIOD_RANGE_PATTERN, REPORT_TYPE_PATTERN, SUMMARY_METRIC_PATTERNS,
};
use crate::importer::source_file::SourceFile;
use crate::importer::spreadsheet_parser::{Workbook, Worksheet};
use calamine::Data;
use chrono::NaiveDate;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::OnceLock;
use tracing::debug;

/// 商户身份扫描行数
const IDENTITY_SCAN_ROWS: usize = 20;
/// Excel 序列日期合理区间（1970-01-01 ~ 2100-01-01）
const SERIAL_DATE_RANGE: (f64, f64) = (25_569.0, 73_051.0);

// ==========================================
// 报表文档模型
// ==========================================
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReportMetadata {
    pub title: Option<String>,
    pub sheet_name: String,
    pub rows: usize,
    pub columns: usize,
    pub merged_regions: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BusinessIdentity {
    pub name: Option<String>,
    pub location: Option<String>,
    pub report_type: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PeriodInfo {
    pub start: Option<String>, // YYYY-MM-DD
    pub end: Option<String>,
    pub dates: BTreeMap<String, String>, // first_order / last_invoice ...
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SummaryReport {
    pub metadata: ReportMetadata,
    pub business: BusinessIdentity,
    pub period: PeriodInfo,
    pub metrics: BTreeMap<String, f64>,
    pub payment_methods: BTreeMap<String, f64>,
    pub warnings: Vec<String>,
}

impl SummaryReport {
    /// 整份报表 → 一条逻辑记录（点号展开）
    pub fn to_record(&self) -> Record {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => flatten_object(&map),
            _ => Record::new(),
        }
    }
}

// ==========================================
// 预编译正则
// ==========================================
struct Patterns {
    metrics: Vec<(&'static str, Regex)>,
    payments: Vec<(&'static str, Regex)>,
    business: Option<Regex>,
    location: Option<Regex>,
    report_type: Option<Regex>,
    period: Option<Regex>,
}

fn compile_table(table: &'static [(&'static str, &'static str)]) -> Vec<(&'static str, Regex)> {
    table
        .iter()
        .filter_map(|(key, pattern)| Regex::new(pattern).ok().map(|re| (*key, re)))
        .collect()
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| Patterns {
        metrics: compile_table(SUMMARY_METRIC_PATTERNS),
        payments: compile_table(PAYMENT_METHOD_PATTERNS),
        business: Regex::new(BUSINESS_NAME_PATTERN).ok(),
        location: Regex::new(LOCATION_PATTERN).ok(),
        report_type: Regex::new(REPORT_TYPE_PATTERN).ok(),
        period: Regex::new(PERIOD_RANGE_PATTERN).ok(),
    })
}

/// 标签 → 指标键
pub fn classify_metric_label(label: &str) -> Option<&'static str> {
    patterns()
        .metrics
        .iter()
        .find(|(_, re)| re.is_match(label))
        .map(|(key, _)| *key)
}

/// 标签 → 付款方式键
pub fn classify_payment_label(label: &str) -> Option<&'static str> {
    let label = label.trim();
    patterns()
        .payments
        .iter()
        .find(|(_, re)| re.is_match(label))
        .map(|(key, _)| *key)
}

/// 标签 → 期间日期键（单词标签要求完全相等，避免 "total" 命中 "to"）
pub fn classify_date_label(label: &str) -> Option<&'static str> {
    let norm = normalize(label);
    PERIOD_DATE_LABELS
        .iter()
        .find(|(l, _)| {
            if l.contains(' ') {
                norm.contains(l)
            } else {
                norm == *l
            }
        })
        .map(|(_, key)| *key)
}

fn dmy_to_iso(s: &str) -> Option<String> {
    NaiveDate::parse_from_str(s, "%d-%m-%Y")
        .ok()
        .map(|d| d.format("%Y-%m-%d").to_string())
}

// ==========================================
// SummaryReportParser
// ==========================================
pub struct SummaryReportParser;

impl Default for SummaryReportParser {
    fn default() -> Self {
        Self::new()
    }
}

impl SummaryReportParser {
    pub fn new() -> Self {
        SummaryReportParser
    }

    pub fn parse_file(&self, file: &SourceFile, options: &ParseOptions) -> ImportResult<SummaryReport> {
        let workbook = Workbook::open(file)?;
        let sheet = workbook.sheet(options.sheet.as_ref())?;
        let report = self.parse_sheet(sheet);
        debug!(
            file = %file.original_name,
            metrics = report.metrics.len(),
            payments = report.payment_methods.len(),
            "汇总报表解析完成"
        );
        Ok(report)
    }

    pub fn parse_sheet(&self, sheet: &Worksheet) -> SummaryReport {
        let mut report = SummaryReport {
            metadata: ReportMetadata {
                title: find_title(sheet),
                sheet_name: sheet.name.clone(),
                rows: sheet.height(),
                columns: sheet.width(),
                merged_regions: sheet.merged.len(),
            },
            business: scan_identity(sheet),
            ..Default::default()
        };

        self.extract_period(sheet, &mut report.period);
        self.extract_values(sheet, &mut report);

        if report.metrics.is_empty() {
            report.warnings.push("未识别到任何汇总指标".to_string());
        }
        if report.period.start.is_none() {
            report.warnings.push("未识别到报表期间".to_string());
        }
        report
    }

    fn extract_period(&self, sheet: &Worksheet, period: &mut PeriodInfo) {
        let p = patterns();
        // 1. 文本区间 DD-MM-YYYY To DD-MM-YYYY
        if let Some(re) = &p.period {
            'outer: for r in 0..sheet.height() {
                for c in 0..sheet.width() {
                    if let Some(caps) = sheet.text_at(r, c).and_then(|t| re.captures(t)) {
                        period.start = caps.get(1).and_then(|m| dmy_to_iso(m.as_str()));
                        period.end = caps.get(2).and_then(|m| dmy_to_iso(m.as_str()));
                        break 'outer;
                    }
                }
            }
        }

        // 2. 标签右侧的序列日期
        for r in 0..sheet.height() {
            for c in 1..sheet.width() {
                let Some(serial) = serial_date_at(sheet, r, c) else {
                    continue;
                };
                let Some(key) = sheet.text_at(r, c - 1).and_then(classify_date_label) else {
                    continue;
                };
                if let Some(date) = DataCleaner::excel_serial_to_string(serial.trunc()) {
                    period.dates.entry(key.to_string()).or_insert(date);
                }
            }
        }

        if period.start.is_none() {
            period.start = ["start_date", "first_order", "first_invoice"]
                .iter()
                .find_map(|k| period.dates.get(*k).cloned());
        }
        if period.end.is_none() {
            period.end = ["end_date", "last_order", "last_invoice"]
                .iter()
                .find_map(|k| period.dates.get(*k).cloned());
        }
    }

    /// 数值单元格按左侧 / 上方标签归类为指标或付款方式
    fn extract_values(&self, sheet: &Worksheet, report: &mut SummaryReport) {
        for r in 0..sheet.height() {
            for c in 0..sheet.width() {
                if matches!(sheet.cell(r, c), Data::DateTime(_)) {
                    continue;
                }
                let Some(value) = sheet.number_at(r, c) else {
                    continue;
                };
                let left = if c > 0 { sheet.text_at(r, c - 1) } else { None };
                let above = if r > 0 { sheet.text_at(r - 1, c) } else { None };

                // 期间日期标签已在 extract_period 中消费
                if left.and_then(classify_date_label).is_some() {
                    continue;
                }

                for label in [left, above].into_iter().flatten() {
                    if let Some(metric) = classify_metric_label(label) {
                        report.metrics.entry(metric.to_string()).or_insert(value);
                        break;
                    }
                    if let Some(method) = classify_payment_label(label) {
                        report.payment_methods.entry(method.to_string()).or_insert(value);
                        break;
                    }
                }
            }
        }
    }
}

fn serial_date_at(sheet: &Worksheet, r: usize, c: usize) -> Option<f64> {
    match sheet.cell(r, c) {
        Data::DateTime(dt) => Some(dt.as_f64()),
        Data::Float(_) | Data::Int(_) => sheet
            .number_at(r, c)
            .filter(|v| *v >= SERIAL_DATE_RANGE.0 && *v <= SERIAL_DATE_RANGE.1),
        _ => None,
    }
}

fn find_title(sheet: &Worksheet) -> Option<String> {
    (0..sheet.height().min(5))
        .flat_map(|r| (0..sheet.width()).map(move |c| (r, c)))
        .find_map(|(r, c)| sheet.text_at(r, c).map(str::to_string))
}

/// 前 20 行扫描商户名 / 位置 / 报表类型
fn scan_identity(sheet: &Worksheet) -> BusinessIdentity {
    let p = patterns();
    let mut identity = BusinessIdentity::default();
    for r in 0..sheet.height().min(IDENTITY_SCAN_ROWS) {
        for c in 0..sheet.width() {
            let Some(text) = sheet.text_at(r, c) else {
                continue;
            };
            if identity.location.is_none() {
                if let Some(caps) = p.location.as_ref().and_then(|re| re.captures(text)) {
                    identity.location = caps.get(2).map(|m| m.as_str().trim().to_string());
                    continue;
                }
            }
            if identity.report_type.is_none() {
                if let Some(m) = p.report_type.as_ref().and_then(|re| re.find(text)) {
                    identity.report_type = Some(m.as_str().to_string());
                    continue;
                }
            }
            if identity.name.is_none() && p.business.as_ref().is_some_and(|re| re.is_match(text)) {
                identity.name = Some(match text.split_once(':') {
                    Some((_, v)) if !v.trim().is_empty() => v.trim().to_string(),
                    _ => sheet
                        .text_at(r, c + 1)
                        .filter(|_| text.to_lowercase().ends_with("name"))
                        .unwrap_or(text)
                        .to_string(),
                });
            }
        }
    }
    identity
}
