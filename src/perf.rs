// ==========================================
// POS 导入核心 - 写入耗时统计
// ==========================================
// 每个批次写入 / 回滚删除包一层 PerfGuard，结束时输出一条 target = "perf" 事件
// SQLite trace 回调只能是 fn 指针，计数放在线程局部变量里；
// Guard 与其包裹的 SQL 必须在同一线程上同步执行
// ==========================================

use rusqlite::Connection;
use std::cell::Cell;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use uuid::Uuid;

pub const ENV_PERF_SQL: &str = "POS_IMPORT_PERF_SQL";
pub const ENV_SLOW_SQL_MS: &str = "POS_IMPORT_SLOW_SQL_MS";

// 0 表示关闭慢语句告警
static SLOW_STATEMENT_MS: AtomicU64 = AtomicU64::new(0);

thread_local! {
    static OPEN_GUARDS: Cell<u32> = const { Cell::new(0) };
    static STATEMENTS: Cell<u64> = const { Cell::new(0) };
    static SLOW_STATEMENTS: Cell<u64> = const { Cell::new(0) };
}

/// 语句追踪开关，来自环境变量
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SqlTraceSettings {
    pub enabled: bool,
    pub slow_ms: u64,
}

impl SqlTraceSettings {
    pub fn from_env() -> Self {
        Self::resolve(
            std::env::var(ENV_PERF_SQL).ok().as_deref(),
            std::env::var(ENV_SLOW_SQL_MS).ok().as_deref(),
        )
    }

    /// Debug 构建默认开启，阈值 50ms；Release 默认关闭，开启后阈值 200ms
    fn resolve(flag: Option<&str>, slow_ms: Option<&str>) -> Self {
        let enabled = flag
            .map(|v| {
                matches!(
                    v.trim().to_ascii_lowercase().as_str(),
                    "1" | "true" | "yes" | "on"
                )
            })
            .unwrap_or(cfg!(debug_assertions));
        let slow_ms = slow_ms
            .and_then(|v| v.trim().parse::<u64>().ok())
            .unwrap_or(if cfg!(debug_assertions) { 50 } else { 200 });
        Self { enabled, slow_ms }
    }
}

/// 为连接挂上语句计数与慢语句日志
pub fn install_sqlite_tracing(conn: &mut Connection) {
    let settings = SqlTraceSettings::from_env();
    if !settings.enabled {
        conn.trace(None);
        conn.profile(None);
        return;
    }
    SLOW_STATEMENT_MS.store(settings.slow_ms, Ordering::Relaxed);
    conn.trace(Some(on_statement));
    conn.profile(Some(on_statement_done));
}

fn on_statement(_sql: &str) {
    if OPEN_GUARDS.with(|g| g.get()) > 0 {
        STATEMENTS.with(|c| c.set(c.get() + 1));
    }
}

fn on_statement_done(sql: &str, took: Duration) {
    let threshold = SLOW_STATEMENT_MS.load(Ordering::Relaxed);
    let ms = took.as_millis() as u64;
    if threshold == 0 || ms < threshold {
        return;
    }
    tracing::warn!(target: "slow_sql", duration_ms = ms, sql = %one_line(sql, 400), "慢语句");
    if OPEN_GUARDS.with(|g| g.get()) > 0 {
        SLOW_STATEMENTS.with(|c| c.set(c.get() + 1));
    }
}

/// 压成单行并按字符截断
fn one_line(sql: &str, max_chars: usize) -> String {
    let flat = sql.split_whitespace().collect::<Vec<_>>().join(" ");
    match flat.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}…", &flat[..cut]),
        None => flat,
    }
}

/// 一次写入操作的统计结果
#[derive(Debug, Clone, PartialEq)]
pub struct PerfSample {
    pub elapsed: Duration,
    pub statements: u64,
    pub slow_statements: u64,
    pub rows: usize,
}

impl PerfSample {
    pub fn rows_per_sec(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.rows as f64 / secs
        } else {
            0.0
        }
    }
}

/// 作用域计时器
///
/// ```ignore
/// let mut perf = PerfGuard::new("persist_batch").for_batch(job_id, 3);
/// perf.set_rows(rows.len());
/// ```
pub struct PerfGuard {
    op: &'static str,
    job_id: Option<Uuid>,
    batch_index: Option<usize>,
    started: Instant,
    statements_at_start: u64,
    slow_at_start: u64,
    rows: usize,
}

impl PerfGuard {
    pub fn new(op: &'static str) -> Self {
        OPEN_GUARDS.with(|g| g.set(g.get() + 1));
        Self {
            op,
            job_id: None,
            batch_index: None,
            started: Instant::now(),
            statements_at_start: STATEMENTS.with(|c| c.get()),
            slow_at_start: SLOW_STATEMENTS.with(|c| c.get()),
            rows: 0,
        }
    }

    pub fn for_job(mut self, job_id: &Uuid) -> Self {
        self.job_id = Some(*job_id);
        self
    }

    pub fn for_batch(mut self, job_id: &Uuid, batch_index: usize) -> Self {
        self.batch_index = Some(batch_index);
        self.for_job(job_id)
    }

    pub fn set_rows(&mut self, rows: usize) {
        self.rows = rows;
    }

    pub fn sample(&self) -> PerfSample {
        PerfSample {
            elapsed: self.started.elapsed(),
            statements: STATEMENTS.with(|c| c.get()) - self.statements_at_start,
            slow_statements: SLOW_STATEMENTS.with(|c| c.get()) - self.slow_at_start,
            rows: self.rows,
        }
    }
}

impl Drop for PerfGuard {
    fn drop(&mut self) {
        let sample = self.sample();
        tracing::info!(
            target: "perf",
            op = self.op,
            job_id = self.job_id.map(|id| id.to_string()).unwrap_or_default(),
            batch_index = self.batch_index.map(|b| b as i64).unwrap_or(-1),
            elapsed_ms = sample.elapsed.as_millis() as u64,
            sql_count = sample.statements,
            slow_sql_count = sample.slow_statements,
            rows = sample.rows,
            rows_per_sec = format!("{:.1}", sample.rows_per_sec()),
            "done"
        );
        OPEN_GUARDS.with(|g| g.set(g.get().saturating_sub(1)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_one_line_flattens_and_truncates_by_char() {
        assert_eq!(one_line("INSERT INTO t\n  VALUES (1)", 100), "INSERT INTO t VALUES (1)");
        assert_eq!(one_line("SELECT '菜单导入'", 9), "SELECT '菜…");
    }

    #[test]
    fn test_settings_resolution() {
        let on = SqlTraceSettings::resolve(Some(" Yes "), Some("75"));
        assert_eq!(on, SqlTraceSettings { enabled: true, slow_ms: 75 });

        let off = SqlTraceSettings::resolve(Some("0"), Some("oops"));
        assert!(!off.enabled);
        assert_eq!(off.slow_ms, if cfg!(debug_assertions) { 50 } else { 200 });
    }

    #[test]
    fn test_statements_counted_only_inside_guard() {
        on_statement("SELECT 1");
        let guard = PerfGuard::new("unit").for_batch(&Uuid::new_v4(), 2);
        on_statement("SELECT 1");
        on_statement("SELECT 2");
        assert_eq!(guard.sample().statements, 2);
        assert_eq!(guard.batch_index, Some(2));
        drop(guard);
        assert_eq!(OPEN_GUARDS.with(|g| g.get()), 0);
    }

    #[test]
    fn test_rows_per_sec_handles_zero_elapsed() {
        let sample = PerfSample {
            elapsed: Duration::ZERO,
            statements: 0,
            slow_statements: 0,
            rows: 10,
        };
        assert_eq!(sample.rows_per_sec(), 0.0);
        let sample = PerfSample {
            elapsed: Duration::from_secs(2),
            ..sample
        };
        assert_eq!(sample.rows_per_sec(), 5.0);
    }
}
