// ==========================================
// POS 导入核心 - 智能格式分类器
// ==========================================
// 职责: 判断文件是"交易明细"还是"汇总报表"，并推荐导入策略
// 评分:
//   交易分 = 表头关键词(≤30) + 行结构一致(≤25) + 列类型匹配(≤20) + 规整行奖励(≤15)
//   报表分 = 合并密度(≤30) + 报表关键词×3(≤25) + 聚合值×2(≤25) + 分区奖励(20)
// CSV / JSON: 不做完整分析，固定判为交易数据，置信度 75
// ==========================================

use crate::domain::format::{ClassificationIndicators, ClassificationReport};
use crate::domain::record::Record;
use crate::domain::types::{FormatType, ImportStrategy, SourceFormat};
use crate::importer::data_cleaner::DataCleaner;
use crate::importer::error::ImportResult;
use crate::importer::file_parser::{ParseOptions, UniversalFileParser};
use crate::importer::keyword_tables::{
    expected_kind, is_transaction_header, keyword_hits, FieldKind, AGGREGATE_TEXT_MARKERS,
    REPORT_KEYWORDS,
};
use crate::importer::source_file::SourceFile;
use crate::importer::spreadsheet_parser::{Workbook, Worksheet};
use calamine::Data;
use serde_json::Value;
use std::collections::HashMap;
use tracing::debug;

/// 结构一致性抽样行数
const CONSISTENCY_SAMPLE_ROWS: usize = 20;
/// 报表关键词扫描行数
const KEYWORD_SCAN_ROWS: usize = 20;
/// 聚合值扫描窗口（行 × 列）
const AGGREGATE_WINDOW: (usize, usize) = (30, 10);
/// 视为聚合值的数值下限
const LARGE_VALUE: f64 = 1000.0;
/// CSV / JSON 固定置信度
const FLAT_FILE_CONFIDENCE: f64 = 75.0;
/// 无法判断时的置信度
const HYBRID_CONFIDENCE: f64 = 30.0;

pub struct SmartClassifier;

impl SmartClassifier {
    /// 按文件类型选择完整分析或轻量分析
    pub fn analyze_file(
        parsers: &UniversalFileParser,
        file: &SourceFile,
        options: &ParseOptions,
    ) -> ImportResult<ClassificationReport> {
        let parser = parsers.parser_for(file)?;
        let report = match parser.kind() {
            SourceFormat::Spreadsheet => {
                let workbook = Workbook::open(file)?;
                Self::analyze_sheet(workbook.sheet(options.sheet.as_ref())?)
            }
            SourceFormat::Csv | SourceFormat::Json => {
                let headers = parser.get_headers(file, options)?;
                let sample = parser.parse_sample(file, options, CONSISTENCY_SAMPLE_ROWS, 0)?;
                Self::analyze_tabular(&headers, &sample)
            }
        };
        debug!(
            file = %file.original_name,
            format_type = %report.format_type,
            confidence = report.confidence,
            strategy = %report.import_strategy,
            "内容分类完成"
        );
        Ok(report)
    }

    /// 表格完整分析
    pub fn analyze_sheet(sheet: &Worksheet) -> ClassificationReport {
        let mut indicators = ClassificationIndicators {
            merged_cell_density: sheet.merged_density(),
            ..Default::default()
        };
        if sheet.height() == 0 || sheet.width() == 0 {
            return build_report(FormatType::Unknown, 0.0, 0.0, 0.0, indicators);
        }

        let transaction = transaction_score(sheet, &mut indicators);
        let summary = summary_score(sheet, &mut indicators);
        let (format_type, confidence) = decide(transaction, summary);
        build_report(format_type, confidence, transaction, summary, indicators)
    }

    /// CSV / JSON 轻量分析：只计算表头与行一致性子分
    pub fn analyze_tabular(headers: &[String], sample: &[Record]) -> ClassificationReport {
        let mut indicators = ClassificationIndicators {
            data_rows: sample.len(),
            ..Default::default()
        };
        indicators.header_match_ratio = header_ratio(headers.iter().map(String::as_str));
        let widths: Vec<usize> = sample
            .iter()
            .map(|r| r.values().filter(|v| !v.is_null()).count())
            .collect();
        indicators.row_consistency = consistency(&widths);

        let transaction =
            indicators.header_match_ratio * 30.0 + indicators.row_consistency * 25.0;
        build_report(
            FormatType::TransactionData,
            FLAT_FILE_CONFIDENCE,
            transaction,
            0.0,
            indicators,
        )
    }
}

// ==========================================
// 交易分
// ==========================================
fn transaction_score(sheet: &Worksheet, ind: &mut ClassificationIndicators) -> f64 {
    let headers: Vec<(usize, &str)> = (0..sheet.width())
        .filter_map(|c| sheet.text_at(0, c).map(|t| (c, t)))
        .collect();
    ind.header_match_ratio = header_ratio(headers.iter().map(|(_, h)| *h));

    let data_rows: Vec<usize> = (1..sheet.height()).filter(|r| !sheet.is_blank_row(*r)).collect();
    ind.data_rows = data_rows.len();
    let sample: Vec<usize> = data_rows.iter().copied().take(CONSISTENCY_SAMPLE_ROWS).collect();

    let widths: Vec<usize> = sample
        .iter()
        .map(|r| {
            sheet
                .row(*r)
                .iter()
                .filter(|c| !DataCleaner::is_blank_cell(c))
                .count()
        })
        .collect();
    ind.row_consistency = consistency(&widths);

    // 带类型暗示的表头，样本中 ≥80% 非空值符合类型即算匹配
    let typed: Vec<(usize, FieldKind)> = headers
        .iter()
        .filter_map(|(c, h)| expected_kind(h).map(|k| (*c, k)))
        .collect();
    ind.type_match_ratio = if typed.is_empty() {
        0.5
    } else {
        let matched = typed
            .iter()
            .filter(|(c, kind)| {
                let cells: Vec<&Data> = sample
                    .iter()
                    .map(|r| sheet.cell(*r, *c))
                    .filter(|d| !DataCleaner::is_blank_cell(d))
                    .collect();
                if cells.is_empty() {
                    return false;
                }
                let ok = cells.iter().filter(|d| cell_matches(d, *kind)).count();
                ok as f64 / cells.len() as f64 >= 0.8
            })
            .count();
        matched as f64 / typed.len() as f64
    };

    let mut score = ind.header_match_ratio * 30.0
        + ind.row_consistency * 25.0
        + ind.type_match_ratio * 20.0;
    if ind.merged_cell_density < 0.05 && ind.data_rows > 10 && ind.row_consistency >= 0.8 {
        score += 15.0;
    }
    score.min(100.0)
}

fn cell_matches(cell: &Data, kind: FieldKind) -> bool {
    match kind {
        FieldKind::Date => match cell {
            Data::DateTime(_) | Data::Float(_) | Data::Int(_) => true,
            Data::String(s) => looks_like_date(s),
            _ => false,
        },
        FieldKind::Decimal | FieldKind::Integer => match cell {
            Data::Int(_) | Data::Float(_) => true,
            Data::String(s) => DataCleaner::to_f64(&Value::String(s.clone())).is_some(),
            _ => false,
        },
        FieldKind::Boolean => matches!(cell, Data::Bool(_)),
        FieldKind::Text => true,
    }
}

fn looks_like_date(s: &str) -> bool {
    let s = s.trim();
    ["%Y-%m-%d", "%d-%m-%Y", "%d/%m/%Y", "%m/%d/%Y", "%Y/%m/%d"]
        .iter()
        .any(|f| chrono::NaiveDate::parse_from_str(s.get(..10).unwrap_or(s), f).is_ok())
}

// ==========================================
// 报表分
// ==========================================
fn summary_score(sheet: &Worksheet, ind: &mut ClassificationIndicators) -> f64 {
    let density_part = (ind.merged_cell_density * 150.0).min(30.0);

    let mut hits = 0usize;
    for r in 0..sheet.height().min(KEYWORD_SCAN_ROWS) {
        for c in 0..sheet.width() {
            if let Some(text) = sheet.text_at(r, c) {
                hits += keyword_hits(text, REPORT_KEYWORDS);
            }
        }
    }
    ind.report_keyword_hits = hits;

    let mut aggregates = 0usize;
    for r in 0..sheet.height().min(AGGREGATE_WINDOW.0) {
        for c in 0..sheet.width().min(AGGREGATE_WINDOW.1) {
            let flagged = match sheet.cell(r, c) {
                Data::Int(_) | Data::Float(_) => sheet
                    .number_at(r, c)
                    .map(|v| v.abs() > LARGE_VALUE)
                    .unwrap_or(false),
                Data::String(s) => {
                    let lowered = s.to_lowercase();
                    AGGREGATE_TEXT_MARKERS.iter().any(|m| lowered.contains(m))
                        || DataCleaner::coerce_number(s.trim())
                            .and_then(|v| v.as_f64())
                            .map(|v| v.abs() > LARGE_VALUE)
                            .unwrap_or(false)
                }
                _ => false,
            };
            if flagged {
                aggregates += 1;
            }
        }
    }
    ind.aggregate_value_hits = aggregates;
    ind.section_breaks = section_breaks(sheet);

    let mut score = density_part
        + (hits as f64 * 3.0).min(25.0)
        + (aggregates as f64 * 2.0).min(25.0);
    if ind.section_breaks > 2 {
        score += 20.0;
    }
    score.min(100.0)
}

/// 内容区域内"非空行 → 空行"的次数
fn section_breaks(sheet: &Worksheet) -> usize {
    let non_blank: Vec<usize> = (0..sheet.height()).filter(|r| !sheet.is_blank_row(*r)).collect();
    let (Some(first), Some(last)) = (non_blank.first(), non_blank.last()) else {
        return 0;
    };
    (first + 1..=*last)
        .filter(|r| sheet.is_blank_row(*r) && !sheet.is_blank_row(r - 1))
        .count()
}

// ==========================================
// 判定
// ==========================================

/// 胜者 > 60: 置信度 min(95, 分)；两分都在 (40, 60]: 胜者类型，置信度 = 分；否则混合 / 30
pub fn decide(transaction: f64, summary: f64) -> (FormatType, f64) {
    let (format_type, winner, loser) = if transaction > summary {
        (FormatType::TransactionData, transaction, summary)
    } else if summary > transaction {
        (FormatType::SummaryReport, summary, transaction)
    } else {
        return (FormatType::HybridOrComplex, HYBRID_CONFIDENCE);
    };
    if winner > 60.0 {
        (format_type, winner.min(95.0))
    } else if winner > 40.0 && loser > 40.0 {
        (format_type, winner)
    } else {
        (FormatType::HybridOrComplex, HYBRID_CONFIDENCE)
    }
}

fn header_ratio<'a>(headers: impl Iterator<Item = &'a str>) -> f64 {
    let mut total = 0usize;
    let mut matched = 0usize;
    for h in headers.filter(|h| !h.trim().is_empty()) {
        total += 1;
        if is_transaction_header(h) {
            matched += 1;
        }
    }
    if total == 0 {
        0.0
    } else {
        matched as f64 / total as f64
    }
}

/// 众数列宽占比
fn consistency(widths: &[usize]) -> f64 {
    if widths.is_empty() {
        return 0.0;
    }
    let mut freq: HashMap<usize, usize> = HashMap::new();
    for w in widths {
        *freq.entry(*w).or_insert(0) += 1;
    }
    let modal = freq.values().copied().max().unwrap_or(0);
    modal as f64 / widths.len() as f64
}

fn build_report(
    format_type: FormatType,
    confidence: f64,
    transaction_score: f64,
    summary_score: f64,
    indicators: ClassificationIndicators,
) -> ClassificationReport {
    let import_strategy = ImportStrategy::decide(format_type, confidence);
    let recommendations = recommendations(format_type, import_strategy, &indicators);
    ClassificationReport {
        format_type,
        confidence,
        transaction_score,
        summary_score,
        import_strategy,
        recommendations,
        indicators,
    }
}

fn recommendations(
    format_type: FormatType,
    strategy: ImportStrategy,
    ind: &ClassificationIndicators,
) -> Vec<String> {
    let mut out = Vec::new();
    match format_type {
        FormatType::TransactionData => {
            out.push("按明细行导入，逐行映射到标准字段".to_string());
            if ind.header_match_ratio < 0.5 {
                out.push("表头识别度低，请人工确认字段映射".to_string());
            }
            if ind.row_consistency < 0.8 {
                out.push("行结构不一致，建议检查是否存在小计行或备注行".to_string());
            }
        }
        FormatType::SummaryReport => {
            out.push("按汇总报表解析，整份文件生成一条汇总记录".to_string());
            if ind.section_breaks > 2 {
                out.push("检测到多个分区，请确认各分区指标是否都需要导入".to_string());
            }
        }
        FormatType::HybridOrComplex => {
            out.push("文件同时具有明细与报表特征，建议拆分工作表或由专家确认".to_string());
        }
        FormatType::Unknown => {
            out.push("无法识别文件内容，请检查文件是否为空".to_string());
        }
    }
    if matches!(strategy, ImportStrategy::ManualReview) {
        out.push("置信度不足，导入前需人工复核".to_string());
    }
    if ind.merged_cell_density > 0.0 && format_type == FormatType::TransactionData {
        out.push("存在合并单元格，解析前建议取消合并".to_string());
    }
    out
}
