// ==========================================
// 解析器一致性集成测试
// ==========================================
// 测试目标: count_rows / parse_all / parse_in_chunks / parse_sample 相互一致
// 覆盖范围: CSV / JSON / 表格读取器 / 分派
// ==========================================

mod test_helpers;

use calamine::Data;
use pos_import::importer::json_parser::{KEY, PARENT_KEY};
use pos_import::importer::spreadsheet_parser::SheetChunkReader;
use pos_import::importer::{
    ChunkReader, FileParser, ImportError, ParseOptions, SourceFile, UniversalFileParser, Worksheet,
};
use pos_import::Record;
use serde_json::{json, Value};
use test_helpers::{menu_csv, write_source};

fn customers_json(rows: usize) -> String {
    let items: Vec<Value> = (0..rows)
        .map(|i| {
            json!({
                "customer": { "name": format!("Customer {:03}", i + 1), "email": format!("c{}@example.com", i + 1) },
                "phone": format!("+1555{:07}", i + 1),
                "loyalty_points": i * 10,
            })
        })
        .collect();
    json!({ "data": items }).to_string()
}

/// 四个读取入口必须给出同一组行
fn assert_consistent(parser: &dyn FileParser, source: &SourceFile, options: &ParseOptions, expected: usize) {
    let all = parser.parse_all(source, options).unwrap();
    assert_eq!(all.len(), expected);
    assert_eq!(parser.count_rows(source, options).unwrap(), expected);

    for chunk_size in [1, 3, 7, expected + 5] {
        let mut chunked: Vec<Record> = Vec::new();
        let mut sizes = Vec::new();
        let chunks = parser
            .parse_in_chunks(source, options, chunk_size, &mut |chunk| {
                sizes.push(chunk.len());
                chunked.extend(chunk);
                Ok(())
            })
            .unwrap();
        assert_eq!(chunks, expected.div_ceil(chunk_size));
        assert!(sizes.iter().all(|s| *s > 0 && *s <= chunk_size));
        assert_eq!(chunked, all, "chunk_size={}", chunk_size);
    }

    for (limit, offset) in [(5, 0), (4, 3), (10, expected - 2), (3, expected + 1)] {
        let sample = parser.parse_sample(source, options, limit, offset).unwrap();
        let start = offset.min(all.len());
        let end = (offset + limit).min(all.len());
        assert_eq!(sample, all[start..end].to_vec(), "limit={} offset={}", limit, offset);
    }
}

#[test]
fn test_csv_entry_points_agree() {
    let dir = tempfile::tempdir().unwrap();
    let source = write_source(&dir, "menu.csv", menu_csv(23).as_bytes());
    let parsers = UniversalFileParser::new();
    let parser = parsers.parser_for(&source).unwrap();

    assert_consistent(parser, &source, &ParseOptions::default(), 23);

    let first = &parser.parse_sample(&source, &ParseOptions::default(), 1, 0).unwrap()[0];
    assert_eq!(first.get("Item Name"), Some(&json!("Dish 0001")));
    assert_eq!(first.get("Item Code"), Some(&json!("SKU0001")));
    assert_eq!(first.get("Selling Price"), Some(&json!(5.0)));
}

#[test]
fn test_csv_blank_rows_are_not_counted() {
    let dir = tempfile::tempdir().unwrap();
    let source = write_source(
        &dir,
        "menu.csv",
        b"name,price\nBurger,9.5\n,\n\nFries,3\nSoda,2\n",
    );
    let parsers = UniversalFileParser::new();
    let parser = parsers.parser_for(&source).unwrap();
    assert_consistent(parser, &source, &ParseOptions::default(), 3);
}

#[test]
fn test_csv_without_headers_uses_column_names() {
    let dir = tempfile::tempdir().unwrap();
    let source = write_source(&dir, "raw.csv", b"Burger,9.5\nFries,3\n");
    let options = ParseOptions {
        has_headers: false,
        ..Default::default()
    };
    let parsers = UniversalFileParser::new();
    let parser = parsers.parser_for(&source).unwrap();

    let rows = parser.parse_all(&source, &options).unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].get("Column 1"), Some(&json!("Burger")));
    assert_eq!(rows[1].get("Column 2"), Some(&json!(3)));
}

#[test]
fn test_json_wrapped_array_with_path() {
    let dir = tempfile::tempdir().unwrap();
    let source = write_source(&dir, "customers.json", customers_json(17).as_bytes());
    let options = ParseOptions {
        json_path: Some("data".to_string()),
        ..Default::default()
    };
    let parsers = UniversalFileParser::new();
    let parser = parsers.parser_for(&source).unwrap();

    assert_consistent(parser, &source, &options, 17);

    let headers = parser.get_headers(&source, &options).unwrap();
    assert_eq!(headers, vec!["customer.name", "customer.email", "phone", "loyalty_points"]);
}

#[test]
fn test_json_wrapped_array_without_path_tags_parent() {
    let dir = tempfile::tempdir().unwrap();
    let source = write_source(&dir, "customers.json", customers_json(4).as_bytes());
    let parsers = UniversalFileParser::new();
    let parser = parsers.parser_for(&source).unwrap();

    let rows = parser.parse_all(&source, &ParseOptions::default()).unwrap();
    assert_eq!(rows.len(), 4);
    assert_eq!(rows[2].get(PARENT_KEY), Some(&json!("data")));
    assert_eq!(rows[2].get(KEY), Some(&json!(2)));
    assert_eq!(rows[2].get("customer.name"), Some(&json!("Customer 003")));
}

#[test]
fn test_json_missing_path_fails_validation() {
    let dir = tempfile::tempdir().unwrap();
    let source = write_source(&dir, "customers.json", customers_json(2).as_bytes());
    let options = ParseOptions {
        json_path: Some("payload.items".to_string()),
        ..Default::default()
    };
    let parsers = UniversalFileParser::new();
    let parser = parsers.parser_for(&source).unwrap();

    let validation = parser.validate_format(&source, &options);
    assert!(!validation.is_valid);
    assert!(validation.has_error("path_not_found"));
    assert!(matches!(
        parser.parse_all(&source, &options),
        Err(ImportError::JsonParseError(_))
    ));
}

#[test]
fn test_unsupported_extension_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let source = write_source(&dir, "menu.pdf", b"%PDF-1.4");
    let parsers = UniversalFileParser::new();
    match parsers.parser_for(&source) {
        Err(ImportError::UnsupportedFormat(ext)) => assert_eq!(ext, "pdf"),
        other => panic!("expected UnsupportedFormat, got {:?}", other.map(|p| p.kind())),
    }
}

#[test]
fn test_sheet_reader_chunks_match_single_read() {
    let s = |v: &str| Data::String(v.to_string());
    let mut cells = vec![vec![s("Item"), s("Price")]];
    for i in 0..11 {
        cells.push(vec![s(&format!("Item {}", i)), Data::Float(1.5 + i as f64)]);
        if i % 4 == 0 {
            cells.push(vec![Data::Empty, Data::Empty]);
        }
    }
    let sheet = Worksheet::new("Menu", cells);

    let drain = |mut reader: SheetChunkReader, n: usize| {
        let mut rows = Vec::new();
        while let Some(chunk) = reader.next_chunk(n).unwrap() {
            assert!(!chunk.is_empty() && chunk.len() <= n);
            rows.extend(chunk);
        }
        rows
    };
    let full = drain(SheetChunkReader::new(sheet.clone(), true), 100);
    let chunked = drain(SheetChunkReader::new(sheet, true), 4);
    assert_eq!(full.len(), 11);
    assert_eq!(full, chunked);
    assert_eq!(full[10].get("Price"), Some(&json!(11.5)));
}

#[test]
fn test_csv_with_clock_times_keeps_comma_columns() {
    let dir = tempfile::tempdir().unwrap();
    let mut content = String::from("order_id,created_at,closed_at,total\n");
    for i in 0..10 {
        content.push_str(&format!(
            "{},2024-01-01 08:{:02}:00,2024-01-01 09:{:02}:00,{}.5\n",
            1000 + i,
            30 + i,
            15 + i,
            12 + i
        ));
    }
    let source = write_source(&dir, "orders.csv", content.as_bytes());
    let parsers = UniversalFileParser::new();
    let parser = parsers.parser_for(&source).unwrap();
    let options = ParseOptions::default();

    assert_eq!(
        parser.get_headers(&source, &options).unwrap(),
        vec!["order_id", "created_at", "closed_at", "total"]
    );
    assert_consistent(parser, &source, &options, 10);

    let rows = parser.parse_all(&source, &options).unwrap();
    assert_eq!(rows[0].get("order_id"), Some(&json!(1000)));
    assert_eq!(rows[0].get("created_at"), Some(&json!("2024-01-01 08:30:00")));
    assert_eq!(rows[9].get("total"), Some(&json!(21.5)));
}
