// ==========================================
// 测试数据生成器
// ==========================================
// 用途: 生成 POS 导出样例（菜单 / 库存 / 顾客 / 销售）
// 输出: tests/fixtures/datasets/*.csv|*.json
// ==========================================

use chrono::{Duration, Local};
use csv::Writer;
use serde_json::json;
use std::error::Error;
use std::fs::{self, File};

const OUTPUT_DIR: &str = "tests/fixtures/datasets";

// 菜单表头（常见 POS 导出列名）
const MENU_HEADER: &[&str] = &["Item Name", "Item Code", "Category", "Selling Price", "Cost", "Description"];

#[derive(Clone)]
struct MenuRow {
    name: String,
    code: String,
    category: String,
    price: String,
    cost: String,
    description: String,
}

impl MenuRow {
    fn to_row(&self) -> Vec<String> {
        vec![
            self.name.clone(),
            self.code.clone(),
            self.category.clone(),
            self.price.clone(),
            self.cost.clone(),
            self.description.clone(),
        ]
    }
}

fn generate_menu_row(index: usize) -> MenuRow {
    let categories = ["Mains", "Drinks", "Desserts", "Sides"];
    let price = 3.5 + (index % 40) as f64 * 0.75;
    MenuRow {
        name: format!("Menu Item {:05}", index + 1),
        code: format!("SKU{:06}", index + 1),
        category: categories[index % categories.len()].to_string(),
        price: format!("{:.2}", price),
        cost: format!("{:.2}", price * 0.35),
        description: if index % 3 == 0 {
            String::new()
        } else {
            format!("House special #{}", index + 1)
        },
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    println!("开始生成测试数据集...");
    fs::create_dir_all(OUTPUT_DIR)?;

    // 1. 正常菜单 (100条)
    generate_menu("01_menu_normal.csv", 100)?;

    // 2. 大菜单 (20000条，触发并行)
    generate_menu("02_menu_large.csv", 20_000)?;

    // 3. 重复 / 空行 / 错误价格混合
    generate_menu_mixed_issues()?;

    // 4. 分号分隔的库存导出
    generate_inventory_semicolon()?;

    // 5. 顾客 JSON
    generate_customers_json()?;

    // 6. 销售流水
    generate_sales()?;

    println!("✓ 所有测试数据集生成完成！");
    Ok(())
}

fn generate_menu(file_name: &str, rows: usize) -> Result<(), Box<dyn Error>> {
    let path = format!("{}/{}", OUTPUT_DIR, file_name);
    let mut wtr = Writer::from_writer(File::create(&path)?);
    wtr.write_record(MENU_HEADER)?;
    for i in 0..rows {
        wtr.write_record(&generate_menu_row(i).to_row())?;
    }
    wtr.flush()?;
    println!("✓ 生成 {} ({}条)", file_name, rows);
    Ok(())
}

fn generate_menu_mixed_issues() -> Result<(), Box<dyn Error>> {
    let path = format!("{}/03_menu_mixed_issues.csv", OUTPUT_DIR);
    let mut wtr = Writer::from_writer(File::create(&path)?);
    wtr.write_record(MENU_HEADER)?;

    for i in 0..10 {
        wtr.write_record(&generate_menu_row(i).to_row())?;
    }
    // 重复 SKU
    for i in [0, 4] {
        wtr.write_record(&generate_menu_row(i).to_row())?;
    }
    // 空行
    wtr.write_record(["", "", "", "", "", ""])?;
    // 价格无法识别
    let mut bad = generate_menu_row(50);
    bad.price = "N/A".to_string();
    wtr.write_record(&bad.to_row())?;
    // 负价格
    let mut negative = generate_menu_row(51);
    negative.price = "-4.00".to_string();
    wtr.write_record(&negative.to_row())?;

    wtr.flush()?;
    println!("✓ 生成 03_menu_mixed_issues.csv (15条，含重复/空行/错误价格)");
    Ok(())
}

fn generate_inventory_semicolon() -> Result<(), Box<dyn Error>> {
    let path = format!("{}/04_inventory_semicolon.csv", OUTPUT_DIR);
    let mut wtr = csv::WriterBuilder::new()
        .delimiter(b';')
        .from_writer(File::create(&path)?);
    wtr.write_record(["Item", "Barcode", "Quantity", "Unit", "Reorder Level"])?;
    for i in 0..50 {
        wtr.write_record([
            format!("Ingredient {:03}", i + 1),
            format!("BC{:08}", i + 1),
            format!("{}", 10 + i * 3),
            ["kg", "l", "pcs"][i % 3].to_string(),
            format!("{}", 5 + i % 7),
        ])?;
    }
    wtr.flush()?;
    println!("✓ 生成 04_inventory_semicolon.csv (50条)");
    Ok(())
}

fn generate_customers_json() -> Result<(), Box<dyn Error>> {
    let customers: Vec<_> = (0..30)
        .map(|i| {
            json!({
                "customer": {
                    "name": format!("Customer {:03}", i + 1),
                    "email": format!("customer{}@example.com", i + 1),
                },
                "phone": format!("+1555{:07}", i + 1),
                "loyalty_points": i * 10,
            })
        })
        .collect();
    let path = format!("{}/05_customers.json", OUTPUT_DIR);
    fs::write(&path, serde_json::to_string_pretty(&json!({ "data": customers }))?)?;
    println!("✓ 生成 05_customers.json (30条)");
    Ok(())
}

fn generate_sales() -> Result<(), Box<dyn Error>> {
    let path = format!("{}/06_sales.csv", OUTPUT_DIR);
    let mut wtr = Writer::from_writer(File::create(&path)?);
    wtr.write_record(["Order ID", "Date", "Item", "Qty", "Price", "Total", "Payment Method"])?;
    let today = Local::now().date_naive();
    for i in 0..200 {
        let qty = 1 + i % 4;
        let price = 4.0 + (i % 12) as f64;
        wtr.write_record([
            format!("ORD{:06}", i + 1),
            (today - Duration::days((i % 30) as i64)).to_string(),
            format!("Menu Item {:05}", i % 25 + 1),
            qty.to_string(),
            format!("{:.2}", price),
            format!("{:.2}", price * qty as f64),
            ["Cash", "Card", "UPI"][i % 3].to_string(),
        ])?;
    }
    wtr.flush()?;
    println!("✓ 生成 06_sales.csv (200条)");
    Ok(())
}
