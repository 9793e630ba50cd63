// ==========================================
// POS 导入核心 - 格式识别器
// ==========================================
// 职责: 推断编码 / 分隔符 / 引号 / 表头 / 置信度
// 红线: 识别器永不报错，任何异常都降级为默认值（尽力而为的预处理，不是闸门）
// ==========================================

use crate::domain::format::{Encoding, FormatDescriptor};
use crate::importer::data_cleaner::DataCleaner;
use crate::importer::file_parser::{SUPPORTED_EXTENSIONS, SUPPORTED_MIME_TYPES};
use crate::importer::source_file::SourceFile;
use tracing::{debug, warn};

/// 探测窗口（字节）
pub const PROBE_WINDOW: usize = 8 * 1024;

const ENCODING_CANDIDATES: [Encoding; 4] = [
    Encoding::Utf8,
    Encoding::Iso8859_1,
    Encoding::Windows1252,
    Encoding::Ascii,
];
const DELIMITER_CANDIDATES: [char; 5] = [',', ';', '\t', '|', ':'];
const QUOTE_CANDIDATES: [char; 3] = ['"', '\'', '`'];

/// Windows-1252 未定义字节
const CP1252_UNDEFINED: [u8; 5] = [0x81, 0x8D, 0x8F, 0x90, 0x9D];

/// Windows-1252 0x80-0x9F 区段映射（未定义位置以 U+FFFD 占位）
const CP1252_HIGH: [char; 32] = [
    '€', '\u{fffd}', '‚', 'ƒ', '„', '…', '†', '‡', 'ˆ', '‰', 'Š', '‹', 'Œ', '\u{fffd}', 'Ž',
    '\u{fffd}', '\u{fffd}', '‘', '’', '“', '”', '•', '–', '—', '˜', '™', 'š', '›', 'œ',
    '\u{fffd}', 'ž', 'Ÿ',
];

pub struct FormatDetector;

impl FormatDetector {
    /// 识别文件格式（读取失败时返回默认描述）
    pub fn detect(file: &SourceFile) -> FormatDescriptor {
        let extension = file.extension();
        let head = match file.read_head(PROBE_WINDOW) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(file = %file.original_name, error = %e, "格式探测读取失败，使用默认值");
                Vec::new()
            }
        };
        let descriptor = Self::detect_bytes(&head, &extension, &file.mime_type);
        debug!(
            file = %file.original_name,
            encoding = descriptor.encoding.label(),
            delimiter = ?descriptor.delimiter,
            has_headers = descriptor.has_headers,
            confidence = descriptor.confidence,
            "格式识别完成"
        );
        descriptor
    }

    /// 基于文件头字节的纯函数识别
    pub fn detect_bytes(head: &[u8], extension: &str, mime: &str) -> FormatDescriptor {
        let encoding = Self::detect_encoding(head);
        let is_text = !matches!(extension, "xlsx" | "xls" | "ods" | "json");

        let (delimiter, quote_char, has_headers) = if is_text {
            let text = decode(head, encoding);
            let delimiter = Self::detect_delimiter(&text);
            let quote_char = Self::detect_quote(&text);
            let has_headers = Self::detect_headers(&text, delimiter, quote_char);
            (delimiter, quote_char, has_headers)
        } else {
            (',', '"', true)
        };

        FormatDescriptor {
            extension: extension.to_string(),
            mime: mime.to_string(),
            encoding,
            delimiter,
            quote_char,
            has_headers,
            confidence: Self::confidence(extension, mime),
        }
    }

    /// 按候选顺序返回第一个校验通过的编码
    pub fn detect_encoding(bytes: &[u8]) -> Encoding {
        ENCODING_CANDIDATES
            .into_iter()
            .find(|enc| validates(bytes, *enc))
            .unwrap_or(Encoding::Utf8)
    }

    /// 计数最高者胜出；并列或全为 0 时取逗号
    pub fn detect_delimiter(text: &str) -> char {
        pick_most_frequent(text, &DELIMITER_CANDIDATES, ',')
    }

    pub fn detect_quote(text: &str) -> char {
        pick_most_frequent(text, &QUOTE_CANDIDATES, '"')
    }

    /// 首行 >50% 非数值文本 且 次行 >30% 数值 → 有表头；不足两行默认有表头
    pub fn detect_headers(text: &str, delimiter: char, quote: char) -> bool {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .delimiter(delimiter as u8)
            .quote(quote as u8)
            .from_reader(text.as_bytes());

        let mut rows: Vec<Vec<String>> = Vec::with_capacity(2);
        for record in reader.records().take(2) {
            match record {
                Ok(r) => rows.push(r.iter().map(|c| c.trim().to_string()).collect()),
                Err(_) => return true,
            }
        }
        if rows.len() < 2 {
            return true;
        }

        let is_numeric = |cell: &String| DataCleaner::coerce_number(cell).is_some();
        let first = &rows[0];
        let second = &rows[1];
        if first.is_empty() || second.is_empty() {
            return true;
        }
        let text_cells = first.iter().filter(|c| !c.is_empty() && !is_numeric(c)).count();
        let numeric_cells = second.iter().filter(|c| is_numeric(c)).count();

        text_cells as f64 / first.len() as f64 > 0.5
            && numeric_cells as f64 / second.len() as f64 > 0.3
    }

    /// 50 基础分 + 30 扩展名命中 + 20 MIME 命中
    pub fn confidence(extension: &str, mime: &str) -> u8 {
        let mut score: u8 = 50;
        if SUPPORTED_EXTENSIONS.contains(&extension) {
            score += 30;
        }
        if SUPPORTED_MIME_TYPES.contains(&mime) {
            score += 20;
        }
        score.min(100)
    }
}

fn validates(bytes: &[u8], encoding: Encoding) -> bool {
    match encoding {
        // 窗口末尾被截断的多字节序列不算非法
        Encoding::Utf8 => match std::str::from_utf8(bytes) {
            Ok(_) => true,
            Err(e) => e.error_len().is_none(),
        },
        Encoding::Iso8859_1 => !bytes.iter().any(|b| (0x80..=0x9F).contains(b)),
        Encoding::Windows1252 => !bytes.iter().any(|b| CP1252_UNDEFINED.contains(b)),
        Encoding::Ascii => bytes.is_ascii(),
    }
}

/// 按编码解码字节
pub fn decode(bytes: &[u8], encoding: Encoding) -> String {
    match encoding {
        Encoding::Utf8 | Encoding::Ascii => String::from_utf8_lossy(bytes).into_owned(),
        Encoding::Iso8859_1 => bytes.iter().map(|b| *b as char).collect(),
        Encoding::Windows1252 => bytes
            .iter()
            .map(|b| match b {
                0x80..=0x9F => CP1252_HIGH[(b - 0x80) as usize],
                _ => *b as char,
            })
            .collect(),
    }
}

fn pick_most_frequent(text: &str, candidates: &[char], default: char) -> char {
    let counts: Vec<(char, usize)> = candidates
        .iter()
        .map(|c| (*c, text.chars().filter(|ch| ch == c).count()))
        .collect();
    let max = counts.iter().map(|(_, n)| *n).max().unwrap_or(0);
    if max == 0 {
        return default;
    }
    let mut winners = counts.iter().filter(|(_, n)| *n == max);
    match (winners.next(), winners.next()) {
        (Some((c, _)), None) => *c,
        _ => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encoding_candidates() {
        assert_eq!(FormatDetector::detect_encoding(b"id,name"), Encoding::Utf8);
        assert_eq!(FormatDetector::detect_encoding("café".as_bytes()), Encoding::Utf8);
        // 0xE9 = é in latin-1, 非法 UTF-8
        assert_eq!(FormatDetector::detect_encoding(b"caf\xe9,1"), Encoding::Iso8859_1);
        // 0x80 = € 仅在 Windows-1252 中定义
        assert_eq!(FormatDetector::detect_encoding(b"\x80 5,caf\xe9"), Encoding::Windows1252);
        assert_eq!(decode(b"\x80 5", Encoding::Windows1252), "€ 5");
    }

    #[test]
    fn test_delimiter_and_quote() {
        assert_eq!(FormatDetector::detect_delimiter("a;b;c\n1;2;3"), ';');
        assert_eq!(FormatDetector::detect_delimiter("a\tb\n1\t2"), '\t');
        assert_eq!(FormatDetector::detect_delimiter("abc"), ',');
        // 并列 → 逗号
        assert_eq!(FormatDetector::detect_delimiter("a;b|c"), ',');
        assert_eq!(FormatDetector::detect_quote("'a','b'"), '\'');
        assert_eq!(FormatDetector::detect_quote("plain"), '"');
    }

    #[test]
    fn test_header_rule() {
        assert!(FormatDetector::detect_headers("id,name,price\n1,Burger,9.99\n", ',', '"'));
        assert!(!FormatDetector::detect_headers("1,2,3\n4,5,6\n", ',', '"'));
        assert!(!FormatDetector::detect_headers("name,kind\nBurger,food\n", ',', '"'));
        // 单行 → 默认有表头
        assert!(FormatDetector::detect_headers("only,one,row", ',', '"'));
    }

    #[test]
    fn test_confidence() {
        assert_eq!(FormatDetector::confidence("csv", "text/csv"), 100);
        assert_eq!(FormatDetector::confidence("csv", "application/octet-stream"), 80);
        assert_eq!(FormatDetector::confidence("pdf", "application/pdf"), 50);
    }

    #[test]
    fn test_detection_is_idempotent() {
        let head = b"id;name;price\n1;\"Burger\";9.99\n";
        let a = FormatDetector::detect_bytes(head, "csv", "text/csv");
        let b = FormatDetector::detect_bytes(head, "csv", "text/csv");
        assert_eq!(a, b);
        assert_eq!(a.delimiter, ';');
        assert!(a.has_headers);
    }
}
