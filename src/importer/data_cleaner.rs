// ==========================================
// POS 导入核心 - 单元格清洗器
// ==========================================
// 职责: TRIM / 去 BOM / 空串 → null / 数值字符串转数字 / Excel 序列日期
// 适用: CSV 与表格解析器共用同一套规则
// ==========================================

use calamine::Data;
use chrono::{Duration, NaiveDate, NaiveDateTime};
use serde_json::{Number, Value};

const BOM: char = '\u{feff}';

pub struct DataCleaner;

impl DataCleaner {
    /// 清洗文本单元格
    pub fn clean_text(raw: &str) -> Value {
        let trimmed = raw.trim_start_matches(BOM).trim();
        if trimmed.is_empty() {
            return Value::Null;
        }
        Self::coerce_number(trimmed).unwrap_or_else(|| Value::String(trimmed.to_string()))
    }

    /// 清洗表头（只去 BOM 与空白）
    pub fn clean_header(raw: &str) -> String {
        raw.trim_start_matches(BOM).trim().to_string()
    }

    /// 数值样式字符串 → int / float
    ///
    /// 带前导零的整数（如 "007"）保留为字符串，避免 SKU / 邮编丢位
    pub fn coerce_number(s: &str) -> Option<Value> {
        let unsigned = s.strip_prefix(['-', '+']).unwrap_or(s);
        if unsigned.is_empty() {
            return None;
        }
        let (int_part, frac_part) = match unsigned.split_once('.') {
            Some((i, f)) => (i, Some(f)),
            None => (unsigned, None),
        };
        if int_part.is_empty() || !int_part.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        match frac_part {
            None => {
                if int_part.len() > 1 && int_part.starts_with('0') {
                    return None;
                }
                s.parse::<i64>().ok().map(|i| Value::Number(i.into()))
            }
            Some(f) => {
                if f.is_empty() || !f.bytes().all(|b| b.is_ascii_digit()) {
                    return None;
                }
                s.parse::<f64>()
                    .ok()
                    .and_then(Number::from_f64)
                    .map(Value::Number)
            }
        }
    }

    /// 清洗表格单元格
    pub fn clean_cell(cell: &Data) -> Value {
        match cell {
            Data::Empty => Value::Null,
            Data::String(s) => Self::clean_text(s),
            Data::Int(i) => Value::Number((*i).into()),
            Data::Float(f) => Self::float_value(*f),
            Data::Bool(b) => Value::Bool(*b),
            Data::DateTime(dt) => Self::excel_serial_to_string(dt.as_f64())
                .map(Value::String)
                .unwrap_or_else(|| Self::float_value(dt.as_f64())),
            // ISO 日期 / 时长 / 错误单元格按展示文本处理
            other => Self::clean_text(&other.to_string()),
        }
    }

    /// 整数值浮点收敛为 int
    pub fn float_value(f: f64) -> Value {
        if f.is_finite() && f.fract() == 0.0 && f.abs() < 9.0e15 {
            Value::Number((f as i64).into())
        } else {
            Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null)
        }
    }

    /// Excel 序列日期 → NaiveDateTime（基准 1899-12-30）
    pub fn excel_serial_to_datetime(serial: f64) -> Option<NaiveDateTime> {
        if !serial.is_finite() || serial < 0.0 || serial > 2_958_465.0 {
            return None;
        }
        let base = NaiveDate::from_ymd_opt(1899, 12, 30)?.and_hms_opt(0, 0, 0)?;
        let days = serial.trunc() as i64;
        let seconds = (serial.fract() * 86_400.0).round() as i64;
        base.checked_add_signed(Duration::days(days))?
            .checked_add_signed(Duration::seconds(seconds))
    }

    /// 序列日期格式化：整天只保留日期部分
    pub fn excel_serial_to_string(serial: f64) -> Option<String> {
        let dt = Self::excel_serial_to_datetime(serial)?;
        if serial.fract() == 0.0 {
            Some(dt.format("%Y-%m-%d").to_string())
        } else {
            Some(dt.format("%Y-%m-%dT%H:%M:%S").to_string())
        }
    }

    /// 单元格是否为空
    pub fn is_blank_cell(cell: &Data) -> bool {
        match cell {
            Data::Empty => true,
            Data::String(s) => s.trim_start_matches(BOM).trim().is_empty(),
            _ => false,
        }
    }

    /// 宽松数值读取（映射阶段类型转换用）
    ///
    /// 接受 "$1,234.50"、"12%" 等 POS 导出常见写法
    pub fn to_f64(value: &Value) -> Option<f64> {
        match value {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => {
                let cleaned: String = s
                    .trim()
                    .chars()
                    .filter(|c| !matches!(c, '$' | '€' | '£' | '¥' | ',' | '%' | ' '))
                    .collect();
                if cleaned.is_empty() {
                    None
                } else {
                    cleaned.parse::<f64>().ok().filter(|f| f.is_finite())
                }
            }
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    pub fn to_bool(value: &Value) -> Option<bool> {
        match value {
            Value::Bool(b) => Some(*b),
            Value::Number(n) => n.as_f64().map(|f| f != 0.0),
            Value::String(s) => match s.trim().to_lowercase().as_str() {
                "true" | "yes" | "y" | "1" | "active" | "enabled" => Some(true),
                "false" | "no" | "n" | "0" | "inactive" | "disabled" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    /// 任意标量 → 展示用字符串（null 为 None）
    pub fn to_text(value: &Value) -> Option<String> {
        match value {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_clean_text_rules() {
        assert_eq!(DataCleaner::clean_text("\u{feff} Burger "), json!("Burger"));
        assert_eq!(DataCleaner::clean_text("   "), Value::Null);
        assert_eq!(DataCleaner::clean_text("1"), json!(1));
        assert_eq!(DataCleaner::clean_text("9.99"), json!(9.99));
        assert_eq!(DataCleaner::clean_text("-3"), json!(-3));
        assert_eq!(DataCleaner::clean_text("0"), json!(0));
        // 前导零保留为字符串
        assert_eq!(DataCleaner::clean_text("007"), json!("007"));
        assert_eq!(DataCleaner::clean_text("1e5"), json!("1e5"));
        assert_eq!(DataCleaner::clean_text("inf"), json!("inf"));
        assert_eq!(DataCleaner::clean_text("1."), json!("1."));
    }

    #[test]
    fn test_clean_cell() {
        assert_eq!(DataCleaner::clean_cell(&Data::Float(3.0)), json!(3));
        assert_eq!(DataCleaner::clean_cell(&Data::Float(2.5)), json!(2.5));
        assert_eq!(DataCleaner::clean_cell(&Data::Empty), Value::Null);
        assert_eq!(
            DataCleaner::clean_cell(&Data::String(" 12 ".into())),
            json!(12)
        );
    }

    #[test]
    fn test_excel_serial_date() {
        // 45292 = 2024-01-01
        assert_eq!(
            DataCleaner::excel_serial_to_string(45292.0).as_deref(),
            Some("2024-01-01")
        );
        assert_eq!(
            DataCleaner::excel_serial_to_string(45292.5).as_deref(),
            Some("2024-01-01T12:00:00")
        );
        assert!(DataCleaner::excel_serial_to_datetime(-1.0).is_none());
    }

    #[test]
    fn test_lenient_number() {
        assert_eq!(DataCleaner::to_f64(&json!("$1,234.50")), Some(1234.5));
        assert_eq!(DataCleaner::to_f64(&json!("abc")), None);
        assert_eq!(DataCleaner::to_bool(&json!("Yes")), Some(true));
    }
}
