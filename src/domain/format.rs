// ==========================================
// POS 导入核心 - 文件格式描述模型
// ==========================================
// 用途: 格式识别结果 / 结构校验结果 / 内容分类结果
// ==========================================

use crate::domain::types::{FormatType, ImportStrategy};
use serde::{Deserialize, Serialize};

// ==========================================
// Encoding - 文本编码
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Encoding {
    #[serde(rename = "UTF-8")]
    Utf8,
    #[serde(rename = "ISO-8859-1")]
    Iso8859_1,
    #[serde(rename = "Windows-1252")]
    Windows1252,
    #[serde(rename = "ASCII")]
    Ascii,
}

impl Encoding {
    pub fn label(&self) -> &'static str {
        match self {
            Encoding::Utf8 => "UTF-8",
            Encoding::Iso8859_1 => "ISO-8859-1",
            Encoding::Windows1252 => "Windows-1252",
            Encoding::Ascii => "ASCII",
        }
    }
}

// ==========================================
// FormatDescriptor - 格式识别结果
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormatDescriptor {
    pub extension: String,
    pub mime: String,
    pub encoding: Encoding,
    pub delimiter: char,
    pub quote_char: char,
    pub has_headers: bool,
    pub confidence: u8, // 0-100
}

// ==========================================
// FormatValidation - 结构校验结果
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormatIssue {
    pub code: String,    // 机器可读代码（如 empty_file）
    pub message: String, // 人类可读描述
}

impl FormatIssue {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FormatValidation {
    pub is_valid: bool,
    pub errors: Vec<FormatIssue>,
    pub warnings: Vec<FormatIssue>,
    #[serde(default)]
    pub details: serde_json::Map<String, serde_json::Value>,
}

impl FormatValidation {
    pub fn new() -> Self {
        Self {
            is_valid: true,
            ..Default::default()
        }
    }

    pub fn error(&mut self, code: &str, message: impl Into<String>) {
        self.is_valid = false;
        self.errors.push(FormatIssue::new(code, message));
    }

    pub fn warning(&mut self, code: &str, message: impl Into<String>) {
        self.warnings.push(FormatIssue::new(code, message));
    }

    pub fn detail(&mut self, key: &str, value: impl Into<serde_json::Value>) {
        self.details.insert(key.to_string(), value.into());
    }

    pub fn has_error(&self, code: &str) -> bool {
        self.errors.iter().any(|e| e.code == code)
    }

    pub fn has_warning(&self, code: &str) -> bool {
        self.warnings.iter().any(|w| w.code == code)
    }
}

// ==========================================
// ClassificationReport - 内容分类结果
// ==========================================
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassificationIndicators {
    pub header_match_ratio: f64,
    pub row_consistency: f64,
    pub type_match_ratio: f64,
    pub merged_cell_density: f64,
    pub report_keyword_hits: usize,
    pub aggregate_value_hits: usize,
    pub section_breaks: usize,
    pub data_rows: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationReport {
    pub format_type: FormatType,
    pub confidence: f64,
    pub transaction_score: f64,
    pub summary_score: f64,
    pub import_strategy: ImportStrategy,
    pub recommendations: Vec<String>,
    pub indicators: ClassificationIndicators,
}
