// ==========================================
// POS 导入核心 - 关键词表与评分函数
// ==========================================
// 职责: 标准字段目录 / 交易表头关键词 / 报表关键词 / 付款方式词表
// 约定: 词表只是数据，评分函数为纯函数，可独立单测，可按 POS 词汇替换
// ==========================================

use crate::domain::mapping::MatchKind;
use crate::domain::types::ImportType;

// ==========================================
// 标准字段目录
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Decimal,
    Integer,
    Boolean,
    Date,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TargetField {
    pub name: &'static str,
    pub aliases: &'static [&'static str], // 已规范化（小写 + 空格分隔）
    pub kind: FieldKind,
    pub required: bool,
    pub max_length: Option<usize>,
    pub min_value: Option<f64>,
}

const fn field(
    name: &'static str,
    aliases: &'static [&'static str],
    kind: FieldKind,
    required: bool,
) -> TargetField {
    TargetField {
        name,
        aliases,
        kind,
        required,
        max_length: None,
        min_value: None,
    }
}

const fn text(name: &'static str, aliases: &'static [&'static str], required: bool, max: usize) -> TargetField {
    TargetField {
        name,
        aliases,
        kind: FieldKind::Text,
        required,
        max_length: Some(max),
        min_value: None,
    }
}

const fn amount(name: &'static str, aliases: &'static [&'static str], required: bool) -> TargetField {
    TargetField {
        name,
        aliases,
        kind: FieldKind::Decimal,
        required,
        max_length: None,
        min_value: Some(0.0),
    }
}

const MENU_FIELDS: &[TargetField] = &[
    text("name", &["item name", "product name", "item", "product", "menu item", "dish"], true, 255),
    text("sku", &["item code", "product code", "code", "plu", "barcode", "item id"], false, 64),
    amount("price", &["selling price", "unit price", "sale price", "rate", "mrp"], true),
    text("category", &["category name", "group", "menu group", "department"], false, 100),
    text("description", &["desc", "details", "item description"], false, 1000),
    amount("cost", &["cost price", "unit cost", "food cost"], false),
    amount("tax_rate", &["tax", "tax percent", "vat", "gst"], false),
    field("is_active", &["active", "enabled", "available", "status"], FieldKind::Boolean, false),
];

const INVENTORY_FIELDS: &[TargetField] = &[
    text("name", &["item name", "ingredient", "product name", "item", "material"], true, 255),
    text("sku", &["item code", "code", "barcode", "item id"], false, 64),
    amount("quantity", &["qty", "stock", "on hand", "quantity on hand", "current stock", "balance"], true),
    text("unit", &["uom", "unit of measure", "units"], false, 32),
    amount("cost_per_unit", &["unit cost", "cost", "rate", "purchase price"], false),
    amount("reorder_level", &["reorder point", "min stock", "par level", "minimum"], false),
    text("supplier", &["vendor", "supplier name"], false, 255),
    text("category", &["group", "category name"], false, 100),
];

const RECIPES_FIELDS: &[TargetField] = &[
    text("recipe_name", &["recipe", "menu item", "dish", "item name", "product"], true, 255),
    text("ingredient_name", &["ingredient", "raw material", "component", "material"], true, 255),
    amount("quantity", &["qty", "amount", "portion"], true),
    text("unit", &["uom", "unit of measure", "units"], false, 32),
    text("notes", &["note", "remarks", "instructions"], false, 1000),
];

const SALES_FIELDS: &[TargetField] = &[
    text("transaction_id", &["invoice no", "invoice number", "bill no", "order id", "order no", "receipt no", "transaction"], true, 64),
    field("date", &["invoice date", "order date", "transaction date", "bill date", "created at", "timestamp"], FieldKind::Date, true),
    text("item_name", &["item", "product", "product name", "menu item"], false, 255),
    amount("quantity", &["qty", "units sold"], false),
    amount("unit_price", &["price", "rate", "item price"], false),
    amount("total", &["amount", "grand total", "net amount", "bill amount", "total amount"], true),
    text("payment_method", &["payment type", "payment mode", "tender", "payment"], false, 64),
    amount("discount", &["discount amount", "disc"], false),
    amount("tax", &["tax amount", "vat", "gst"], false),
];

const CUSTOMERS_FIELDS: &[TargetField] = &[
    text("name", &["customer name", "full name", "customer", "client"], true, 255),
    text("email", &["email address", "e mail", "mail"], false, 255),
    text("phone", &["mobile", "phone number", "contact", "mobile number", "telephone"], false, 32),
    text("address", &["street", "location", "customer address"], false, 500),
    TargetField {
        name: "loyalty_points",
        aliases: &["points", "reward points", "loyalty"],
        kind: FieldKind::Integer,
        required: false,
        max_length: None,
        min_value: Some(0.0),
    },
    amount("total_spent", &["lifetime value", "total spend", "spent"], false),
];

/// 按导入类型取标准字段目录
pub fn target_fields(import_type: ImportType) -> &'static [TargetField] {
    match import_type {
        ImportType::Menu => MENU_FIELDS,
        ImportType::Inventory => INVENTORY_FIELDS,
        ImportType::Recipes => RECIPES_FIELDS,
        ImportType::Sales => SALES_FIELDS,
        ImportType::Customers => CUSTOMERS_FIELDS,
    }
}

pub fn find_target(import_type: ImportType, name: &str) -> Option<&'static TargetField> {
    target_fields(import_type).iter().find(|f| f.name == name)
}

/// 行去重的自然键字段（按顺序取第一个非空值）
///
/// 配方与销售明细允许同键多行，不参与去重
pub fn natural_key_fields(import_type: ImportType) -> &'static [&'static str] {
    match import_type {
        ImportType::Menu | ImportType::Inventory => &["sku", "name"],
        ImportType::Customers => &["email", "phone"],
        ImportType::Recipes | ImportType::Sales => &[],
    }
}

// ==========================================
// 分类器词表
// ==========================================

/// 交易数据常见表头关键词
pub const TRANSACTION_HEADER_KEYWORDS: &[&str] = &[
    "id", "date", "time", "item", "product", "name", "sku", "code", "qty", "quantity",
    "price", "amount", "total", "order", "invoice", "transaction", "receipt", "customer",
    "category", "payment", "cost", "unit", "description", "email", "phone", "stock", "tax",
    "discount", "supplier", "recipe", "ingredient",
];

/// 表头关键词 → 期望的列数据类型
pub const NUMERIC_HEADER_KEYWORDS: &[&str] = &[
    "price", "amount", "total", "qty", "quantity", "cost", "tax", "discount", "stock",
    "points", "spent", "rate",
];
pub const DATE_HEADER_KEYWORDS: &[&str] = &["date", "time", "timestamp", "created"];

/// 汇总报表关键词
pub const REPORT_KEYWORDS: &[&str] = &[
    "report", "summary", "restaurant", "outlet", "branch", "period", "total sales",
    "gross sales", "net sales", "grand total", "first invoice", "last invoice",
    "first order", "last order", "no. of", "average", "service charge", "payment",
    "cash", "card",
];

/// 汇总报表中被视为聚合值的文本标记
pub const AGGREGATE_TEXT_MARKERS: &[&str] = &["total", "%"];

// ==========================================
// 汇总报表词表（正则源）
// ==========================================

/// 指标 → 标签正则（先匹配者优先，越具体越靠前）
pub const SUMMARY_METRIC_PATTERNS: &[(&str, &str)] = &[
    ("invoice_count", r"(?i)(no\.?\s*of\s*invoices?|number\s*of\s*invoices?|invoices?\s*count|total\s*invoices?)"),
    ("transaction_count", r"(?i)(no\.?\s*of\s*(transactions?|orders?|bills?)|number\s*of\s*(transactions?|orders?|bills?)|(transactions?|orders?|bills?)\s*count|total\s*(transactions|orders|bills))"),
    ("gross_sales", r"(?i)gross\s*(sales|revenue|amount)"),
    ("net_sales", r"(?i)net\s*(sales|revenue|amount)"),
    ("service_charge", r"(?i)service\s*charges?"),
    ("discount", r"(?i)discounts?"),
    ("tax", r"(?i)\b(tax(es)?|vat|gst)\b"),
    ("total_sales", r"(?i)(total\s*sales|grand\s*total|total\s*revenue)"),
];

/// 付款方式标签正则
pub const PAYMENT_METHOD_PATTERNS: &[(&str, &str)] = &[
    ("credit_card", r"(?i)^credit\s*card"),
    ("debit_card", r"(?i)^debit\s*card"),
    ("card", r"(?i)^(card|visa|master\s*card|amex)\b"),
    ("cash", r"(?i)^cash\b"),
    ("upi", r"(?i)^upi\b"),
    ("wallet", r"(?i)^(wallet|e-?wallet|paytm|apple\s*pay|google\s*pay)\b"),
    ("online", r"(?i)^online\b"),
    ("voucher", r"(?i)^(voucher|gift\s*card|coupon)\b"),
];

/// 商户名线索
pub const BUSINESS_NAME_PATTERN: &str =
    r"(?i)\b(restaurant|cafe|café|bistro|grill|kitchen|pizzeria|bakery|diner|eatery|bar)\b";
/// 门店位置线索（捕获冒号后的值）
pub const LOCATION_PATTERN: &str = r"(?i)^(location|branch|outlet|address|city)\s*[:\-]\s*(.+)$";
/// 报表类型线索
pub const REPORT_TYPE_PATTERN: &str =
    r"(?i)((sales|item|category|payment|tax|daily|monthly)[\s\-]*(wise\s*)?(summary\s*report|summary|report)|summary\s*report|\bz[\s\-]?report)";
/// 期间区间 DD-MM-YYYY To DD-MM-YYYY
pub const PERIOD_RANGE_PATTERN: &str = r"(?i)(\d{2}-\d{2}-\d{4})\s*to\s*(\d{2}-\d{2}-\d{4})";

/// 日期标签 → 期间字段
pub const PERIOD_DATE_LABELS: &[(&str, &str)] = &[
    ("first order", "first_order"),
    ("last order", "last_order"),
    ("first invoice", "first_invoice"),
    ("last invoice", "last_invoice"),
    ("start date", "start_date"),
    ("end date", "end_date"),
    ("from", "start_date"),
    ("to", "end_date"),
];

// ==========================================
// 纯评分函数
// ==========================================

/// 规范化：小写，非字母数字统一为单个空格
pub fn normalize(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut pending_space = false;
    for ch in s.trim().chars() {
        if ch.is_alphanumeric() {
            if pending_space && !out.is_empty() {
                out.push(' ');
            }
            pending_space = false;
            out.extend(ch.to_lowercase());
        } else {
            pending_space = true;
        }
    }
    out
}

/// 表头与标准字段的匹配分（0-100）
///
/// 精确 / 别名 = 100；表头包含目标 = 80；目标包含表头 = 60（表头至少 3 个字符）
pub fn score_header(header: &str, target: &TargetField) -> (u8, MatchKind) {
    let h = normalize(header);
    if h.is_empty() {
        return (0, MatchKind::Unmapped);
    }
    let name = normalize(target.name);
    if h == name {
        return (100, MatchKind::Exact);
    }
    if target.aliases.iter().any(|a| *a == h) {
        return (100, MatchKind::Alias);
    }
    let candidates = std::iter::once(name.as_str()).chain(target.aliases.iter().copied());
    let mut best = (0u8, MatchKind::Unmapped);
    for candidate in candidates {
        if candidate.len() >= 3 && contains_words(&h, candidate) {
            return (80, MatchKind::HeaderContainsTarget);
        }
        if h.len() >= 3 && contains_words(candidate, &h) {
            best = (60, MatchKind::TargetContainsHeader);
        }
    }
    best
}

/// 按词边界判断包含（"unit price" 包含 "price"，"priceless" 不包含）
fn contains_words(haystack: &str, needle: &str) -> bool {
    if needle.is_empty() {
        return false;
    }
    haystack.match_indices(needle).any(|(idx, _)| {
        let before_ok = idx == 0 || haystack.as_bytes()[idx - 1] == b' ';
        let end = idx + needle.len();
        let after_ok = end == haystack.len() || haystack.as_bytes()[end] == b' ';
        before_ok && after_ok
    })
}

/// 文本命中的关键词个数（去重）
pub fn keyword_hits(text: &str, keywords: &[&str]) -> usize {
    let lowered = text.to_lowercase();
    keywords.iter().filter(|k| lowered.contains(*k)).count()
}

/// 表头是否命中交易关键词或任一标准字段
pub fn is_transaction_header(header: &str) -> bool {
    let h = normalize(header);
    if h.is_empty() {
        return false;
    }
    if h.split(' ').any(|word| TRANSACTION_HEADER_KEYWORDS.contains(&word)) {
        return true;
    }
    ImportType::ALL.iter().any(|t| {
        target_fields(*t)
            .iter()
            .any(|f| score_header(header, f).0 >= 80)
    })
}

/// 表头期望的数据类型（无明确期望返回 None）
pub fn expected_kind(header: &str) -> Option<FieldKind> {
    let h = normalize(header);
    let words: Vec<&str> = h.split(' ').collect();
    if words.iter().any(|w| DATE_HEADER_KEYWORDS.contains(w)) {
        return Some(FieldKind::Date);
    }
    if words.iter().any(|w| NUMERIC_HEADER_KEYWORDS.contains(w)) {
        return Some(FieldKind::Decimal);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn menu(name: &str) -> &'static TargetField {
        find_target(ImportType::Menu, name).unwrap()
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("  Item_Name (EN) "), "item name en");
        assert_eq!(normalize("Price ($)"), "price");
        assert_eq!(normalize("---"), "");
    }

    #[test]
    fn test_score_header_bounds() {
        assert_eq!(score_header("price", menu("price")), (100, MatchKind::Exact));
        assert_eq!(score_header("Selling Price", menu("price")), (100, MatchKind::Alias));
        assert_eq!(
            score_header("Price Incl Tax", menu("price")),
            (80, MatchKind::HeaderContainsTarget)
        );
        assert_eq!(
            score_header("desc", menu("description")),
            (100, MatchKind::Alias)
        );
        assert_eq!(
            score_header("categ", menu("category")).0,
            0,
            "partial words do not match"
        );
        assert_eq!(
            score_header("Menu", menu("name")),
            (60, MatchKind::TargetContainsHeader)
        );
        assert_eq!(score_header("zzz", menu("price")), (0, MatchKind::Unmapped));
        assert_eq!(score_header("", menu("price")), (0, MatchKind::Unmapped));
    }

    #[test]
    fn test_transaction_header_and_kind() {
        assert!(is_transaction_header("Order Date"));
        assert!(is_transaction_header("tax_rate"));
        assert!(!is_transaction_header("Restaurant XYZ"));
        assert_eq!(expected_kind("Unit Price"), Some(FieldKind::Decimal));
        assert_eq!(expected_kind("Invoice Date"), Some(FieldKind::Date));
        assert_eq!(expected_kind("Notes"), None);
    }

    #[test]
    fn test_keyword_hits() {
        assert_eq!(keyword_hits("Total Sales Summary", REPORT_KEYWORDS), 2);
        assert_eq!(keyword_hits("burger", REPORT_KEYWORDS), 0);
    }
}
