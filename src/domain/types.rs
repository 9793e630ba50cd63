// ==========================================
// POS 导入核心 - 领域类型定义
// ==========================================
// 职责: 导入任务状态 / 导入类型 / 进度阶段 / 格式分类 / 导入策略
// 序列化格式: snake_case (与数据库、前端轮询接口一致)
// ==========================================

use serde::{Deserialize, Serialize};
use std::fmt;

// ==========================================
// 导入任务状态 (Import Status)
// ==========================================
// 生命周期: pending → parsing → mapping → validating → importing
//           → completed | failed | cancelled | paused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportStatus {
    Pending,    // 已创建，未开始
    Parsing,    // 解析中
    Mapping,    // 字段映射中
    Validating, // 校验中
    Importing,  // 分批写入中
    Completed,  // 已完成（可能含行级失败）
    Failed,     // 任务级失败
    Cancelled,  // 已取消
    Paused,     // 已暂停
}

impl ImportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImportStatus::Pending => "pending",
            ImportStatus::Parsing => "parsing",
            ImportStatus::Mapping => "mapping",
            ImportStatus::Validating => "validating",
            ImportStatus::Importing => "importing",
            ImportStatus::Completed => "completed",
            ImportStatus::Failed => "failed",
            ImportStatus::Cancelled => "cancelled",
            ImportStatus::Paused => "paused",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "pending" => Some(ImportStatus::Pending),
            "parsing" => Some(ImportStatus::Parsing),
            "mapping" => Some(ImportStatus::Mapping),
            "validating" => Some(ImportStatus::Validating),
            "importing" => Some(ImportStatus::Importing),
            "completed" => Some(ImportStatus::Completed),
            "failed" => Some(ImportStatus::Failed),
            "cancelled" => Some(ImportStatus::Cancelled),
            "paused" => Some(ImportStatus::Paused),
            _ => None,
        }
    }

    /// 终态：调用返回后任务不会再变化
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ImportStatus::Completed | ImportStatus::Failed | ImportStatus::Cancelled
        )
    }

    /// 进行中状态（解析 / 映射 / 校验 / 写入）
    pub fn is_in_progress(&self) -> bool {
        matches!(
            self,
            ImportStatus::Parsing
                | ImportStatus::Mapping
                | ImportStatus::Validating
                | ImportStatus::Importing
        )
    }
}

impl fmt::Display for ImportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ==========================================
// 导入类型 (Import Type)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportType {
    Menu,      // 菜单 / 商品
    Inventory, // 库存
    Recipes,   // 配方
    Sales,     // 销售流水
    Customers, // 顾客
}

impl ImportType {
    pub const ALL: [ImportType; 5] = [
        ImportType::Menu,
        ImportType::Inventory,
        ImportType::Recipes,
        ImportType::Sales,
        ImportType::Customers,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ImportType::Menu => "menu",
            ImportType::Inventory => "inventory",
            ImportType::Recipes => "recipes",
            ImportType::Sales => "sales",
            ImportType::Customers => "customers",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "menu" | "products" | "items" => Some(ImportType::Menu),
            "inventory" | "stock" => Some(ImportType::Inventory),
            "recipes" | "recipe" => Some(ImportType::Recipes),
            "sales" | "transactions" | "orders" => Some(ImportType::Sales),
            "customers" | "customer" => Some(ImportType::Customers),
            _ => None,
        }
    }
}

impl fmt::Display for ImportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ==========================================
// 进度阶段 (Progress Phase)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressPhase {
    Parsing,
    Mapping,
    Validating,
    Importing,
    Completed,
    Failed,
    Cancelled,
}

impl ProgressPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProgressPhase::Parsing => "parsing",
            ProgressPhase::Mapping => "mapping",
            ProgressPhase::Validating => "validating",
            ProgressPhase::Importing => "importing",
            ProgressPhase::Completed => "completed",
            ProgressPhase::Failed => "failed",
            ProgressPhase::Cancelled => "cancelled",
        }
    }
}

impl From<ImportStatus> for ProgressPhase {
    fn from(status: ImportStatus) -> Self {
        match status {
            ImportStatus::Pending | ImportStatus::Parsing => ProgressPhase::Parsing,
            ImportStatus::Mapping => ProgressPhase::Mapping,
            ImportStatus::Validating => ProgressPhase::Validating,
            ImportStatus::Importing | ImportStatus::Paused => ProgressPhase::Importing,
            ImportStatus::Completed => ProgressPhase::Completed,
            ImportStatus::Failed => ProgressPhase::Failed,
            ImportStatus::Cancelled => ProgressPhase::Cancelled,
        }
    }
}

impl fmt::Display for ProgressPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ==========================================
// 源文件格式 (Source Format)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceFormat {
    Csv,         // CSV / TXT 分隔文本
    Spreadsheet, // XLSX / XLS / ODS
    Json,        // JSON
}

impl fmt::Display for SourceFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceFormat::Csv => write!(f, "csv"),
            SourceFormat::Spreadsheet => write!(f, "spreadsheet"),
            SourceFormat::Json => write!(f, "json"),
        }
    }
}

// ==========================================
// 文件内容分类 (Format Type)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormatType {
    TransactionData,  // 行式交易数据
    SummaryReport,    // 汇总报表
    HybridOrComplex,  // 混合 / 复杂结构
    Unknown,          // 无法判断
}

impl fmt::Display for FormatType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormatType::TransactionData => write!(f, "transaction_data"),
            FormatType::SummaryReport => write!(f, "summary_report"),
            FormatType::HybridOrComplex => write!(f, "hybrid_or_complex"),
            FormatType::Unknown => write!(f, "unknown"),
        }
    }
}

// ==========================================
// 导入策略 (Import Strategy)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportStrategy {
    ManualReview,
    AutoImportTransaction,
    GuidedImportTransaction,
    AutoParseSummary,
    GuidedParseSummary,
    ExpertReview,
}

impl ImportStrategy {
    /// 根据分类结果与置信度选择导入策略
    pub fn decide(format_type: FormatType, confidence: f64) -> Self {
        if confidence < 50.0 {
            return ImportStrategy::ManualReview;
        }
        match format_type {
            FormatType::TransactionData if confidence > 80.0 => {
                ImportStrategy::AutoImportTransaction
            }
            FormatType::TransactionData => ImportStrategy::GuidedImportTransaction,
            FormatType::SummaryReport if confidence > 80.0 => ImportStrategy::AutoParseSummary,
            FormatType::SummaryReport => ImportStrategy::GuidedParseSummary,
            FormatType::HybridOrComplex => ImportStrategy::ExpertReview,
            FormatType::Unknown => ImportStrategy::ManualReview,
        }
    }
}

impl fmt::Display for ImportStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ImportStrategy::ManualReview => "manual_review",
            ImportStrategy::AutoImportTransaction => "auto_import_transaction",
            ImportStrategy::GuidedImportTransaction => "guided_import_transaction",
            ImportStrategy::AutoParseSummary => "auto_parse_summary",
            ImportStrategy::GuidedParseSummary => "guided_parse_summary",
            ImportStrategy::ExpertReview => "expert_review",
        };
        f.write_str(s)
    }
}

// ==========================================
// 性能评级 (Performance Rating)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PerformanceRating {
    Excellent,
    Good,
    Average,
    Poor,
}

impl PerformanceRating {
    /// 按质量分阈值 {95, 85, 70} 分档
    pub fn from_quality_score(score: f64) -> Self {
        if score >= 95.0 {
            PerformanceRating::Excellent
        } else if score >= 85.0 {
            PerformanceRating::Good
        } else if score >= 70.0 {
            PerformanceRating::Average
        } else {
            PerformanceRating::Poor
        }
    }
}

// ==========================================
// 任务失败原因 (Failure Reason)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    Format,    // 文件格式 / 不可读
    Timeout,   // 超出时间预算
    Internal,  // 编排过程中的未处理错误
}
