// ==========================================
// POS 表格数据导入 - 命令行入口
// ==========================================
// 子命令: detect / classify / inspect / import / progress / jobs / rollback / config
// 数据库: --db 或 POS_IMPORT_DB，缺省为用户数据目录
// ==========================================

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use pos_import::config::{ConfigManager, ImportConfig};
use pos_import::db;
use pos_import::domain::types::{FormatType, ImportType};
use pos_import::importer::spreadsheet_parser::SheetSelector;
use pos_import::importer::{
    FormatDetector, ImportRequest, ImportService, ParseOptions, SmartClassifier, SourceFile,
    SpreadsheetParser, UniversalFileParser,
};
use pos_import::logging;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "pos-import", version, about = "POS 表格数据导入工具")]
struct Cli {
    /// SQLite 数据库路径
    #[arg(long, env = "POS_IMPORT_DB", global = true)]
    db: Option<String>,

    /// 以 JSON 格式输出日志
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// 识别编码 / 分隔符 / 表头
    Detect { file: PathBuf },

    /// 内容分类（行式数据 / 汇总报表）
    Classify {
        file: PathBuf,
        #[arg(long)]
        sheet: Option<String>,
    },

    /// 表头、样本行与表格结构分析
    Inspect {
        file: PathBuf,
        #[arg(long)]
        sheet: Option<String>,
        #[arg(long, default_value_t = 5)]
        rows: usize,
    },

    /// 导入文件
    Import {
        file: PathBuf,
        #[arg(long = "type", value_parser = parse_import_type)]
        import_type: ImportType,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        pos_system: Option<String>,
        #[arg(long)]
        mapping_id: Option<Uuid>,
        /// 按汇总报表导入（跳过内容分类）
        #[arg(long)]
        summary: bool,
        #[arg(long)]
        sheet: Option<String>,
        #[arg(long)]
        no_headers: bool,
    },

    /// 查看任务状态
    Progress { job_id: Uuid },

    /// 最近的任务
    Jobs {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },

    /// 回滚任务已提交的记录
    Rollback { job_id: Uuid },

    /// 导入参数
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// 生效配置（默认值 → config_kv → 环境变量）
    Show,
    /// 写入 config_kv
    Set { key: String, value: String },
}

fn parse_import_type(s: &str) -> Result<ImportType, String> {
    ImportType::parse(s).ok_or_else(|| {
        let all: Vec<&str> = ImportType::ALL.iter().map(|t| t.as_str()).collect();
        format!("未知导入类型 {}（可选: {}）", s, all.join(", "))
    })
}

fn sheet_selector(sheet: Option<String>) -> Option<SheetSelector> {
    sheet.map(|s| match s.parse::<usize>() {
        Ok(index) => SheetSelector::Index(index),
        Err(_) => SheetSelector::Name(s),
    })
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    if cli.json_logs {
        logging::init_json();
    } else {
        logging::init();
    }

    let db_path = cli.db.clone().unwrap_or_else(db::default_db_path);

    match cli.command {
        Command::Detect { file } => {
            let source = SourceFile::from_path(&file)?;
            print_json(&FormatDetector::detect(&source))?;
        }
        Command::Classify { file, sheet } => {
            let source = SourceFile::from_path(&file)?;
            let options = ParseOptions {
                sheet: sheet_selector(sheet),
                ..Default::default()
            };
            let parsers = UniversalFileParser::new();
            print_json(&SmartClassifier::analyze_file(&parsers, &source, &options)?)?;
        }
        Command::Inspect { file, sheet, rows } => {
            let source = SourceFile::from_path(&file)?;
            let options = ParseOptions {
                sheet: sheet_selector(sheet),
                ..Default::default()
            };
            let parsers = UniversalFileParser::new();
            let parser = parsers.parser_for(&source)?;
            let mut report = serde_json::json!({
                "file": &source.original_name,
                "mime_type": &source.mime_type,
                "size": source.size,
                "parser": parser.kind(),
                "total_rows": parser.count_rows(&source, &options)?,
                "headers": parser.get_headers(&source, &options)?,
                "sample": parser.parse_sample(&source, &options, rows, 0)?,
                "validation": parser.validate_format(&source, &options),
            });
            if parser.kind() == pos_import::SourceFormat::Spreadsheet {
                let structure = SpreadsheetParser::new().analyze_structure(&source, &options)?;
                report["structure"] = serde_json::to_value(structure)?;
            }
            print_json(&report)?;
        }
        Command::Import {
            file,
            import_type,
            name,
            pos_system,
            mapping_id,
            summary,
            sheet,
            no_headers,
        } => {
            let (conn, config) = open(&db_path)?;
            let service = ImportService::from_connection(conn, config);

            let source = SourceFile::from_path(&file)?;
            let mut request = ImportRequest::new(
                name.unwrap_or_else(|| source.original_name.clone()),
                import_type,
                source,
            );
            request.pos_system = pos_system;
            request.mapping_id = mapping_id;
            request.options.sheet = sheet_selector(sheet);
            request.options.has_headers = !no_headers;
            if summary {
                request.force_format = Some(FormatType::SummaryReport);
            }

            let job = service.create_job(&request).await?;
            let job_id = job.job_id;
            info!(job_id = %job_id, db = %db_path, "开始导入");

            let control = service.control();
            let interrupt = tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!(job_id = %job_id, "收到中断信号，取消导入");
                    control.cancel(&job_id);
                }
            });
            let finished = service.run_import(&job_id, request).await;
            interrupt.abort();
            print_json(&finished?)?;
        }
        Command::Progress { job_id } => {
            let (conn, config) = open(&db_path)?;
            let service = ImportService::from_connection(conn, config);
            let job = service.get_job(&job_id).await?;
            print_json(&serde_json::json!({
                "job_id": job.job_id,
                "status": job.status,
                "progress_percentage": job.progress_percentage,
                "counters": job.counters,
                "data_quality_score": job.data_quality_score,
                "can_rollback": job.can_rollback,
                "error": job.error_detail,
            }))?;
        }
        Command::Jobs { limit } => {
            let (conn, config) = open(&db_path)?;
            let service = ImportService::from_connection(conn, config);
            let jobs = service.recent_jobs(limit).await?;
            let rows: Vec<_> = jobs
                .iter()
                .map(|job| {
                    serde_json::json!({
                        "job_id": job.job_id,
                        "name": job.name,
                        "import_type": job.import_type,
                        "status": job.status,
                        "counters": job.counters,
                        "created_at": job.created_at,
                    })
                })
                .collect();
            print_json(&rows)?;
        }
        Command::Rollback { job_id } => {
            let (conn, config) = open(&db_path)?;
            let service = ImportService::from_connection(conn, config);
            let job = service.rollback(&job_id).await?;
            print_json(&job.import_results.warnings)?;
        }
        Command::Config { action } => {
            let conn = db::open_shared(&db_path)
                .with_context(|| format!("无法打开数据库 {}", db_path))?;
            let manager = ConfigManager::from_connection(conn)?;
            match action {
                ConfigAction::Show => print_json(&manager.load_import_config()?)?,
                ConfigAction::Set { key, value } => {
                    // 先按类型校验，未知键直接拒绝
                    if !ImportConfig::default().apply_value(&key, &value)? {
                        bail!("未知配置项: {}", key);
                    }
                    manager.set_global_config_value(&key, &value)?;
                    println!("{} = {}", key, value);
                }
            }
        }
    }
    Ok(())
}

fn open(db_path: &str) -> Result<(Arc<std::sync::Mutex<rusqlite::Connection>>, ImportConfig)> {
    let conn =
        db::open_shared(db_path).with_context(|| format!("无法打开数据库 {}", db_path))?;
    let config = ConfigManager::from_connection(conn.clone())?
        .load_import_config()
        .map_err(|e| anyhow!("配置加载失败: {}", e))?;
    Ok((conn, config))
}
