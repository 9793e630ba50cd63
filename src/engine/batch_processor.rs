// ==========================================
// POS 导入核心 - 分批处理器
// ==========================================
// 流程: 分块读取 → 映射 → 校验 → 去重 → 单事务落库 → 折叠计数
// 模式:
//   顺序 - 预计批次数 <= parallel_threshold_batches 或禁用并行
//   并行 - 源文件先落到 spool 目录；协调者按文件顺序读块，
//          取得信号量许可后才派发批次单元，单元只返回增量
// 失败语义:
//   行级失败只累加 failed，不中断批次
//   批次写入失败整批回滚，退避重试；重试耗尽后进入死信
//   任务级错误（超时 / 取消 / 存储故障）由 finalize 落到终态
// ==========================================

use crate::config::ImportConfig;
use crate::domain::import_job::{CounterDelta, FailedBatch, ImportJob};
use crate::domain::mapping::ImportMapping;
use crate::domain::progress::{BatchProgress, ProgressUpdate};
use crate::domain::quality::{DqLevel, DqViolation};
use crate::domain::record::{is_blank_record, MappedRecord, Record};
use crate::domain::types::{ImportStatus, ImportType, ProgressPhase};
use crate::engine::batch_sizing::{self, BatchPlan};
use crate::engine::job_control::JobSignal;
use crate::engine::memory::{self, MemoryProbe};
use crate::engine::progress_tracker::ProgressTracker;
use crate::importer::dq_validator::DqValidator;
use crate::importer::duplicate_guard::{DuplicateGuard, RowVerdict};
use crate::importer::error::{ImportError, ImportResult};
use crate::importer::field_mapper::FieldMapper;
use crate::importer::file_parser::{ChunkReader, ParseOptions, UniversalFileParser};
use crate::importer::source_file::SourceFile;
use crate::repository::error::RepositoryError;
use crate::repository::import_job_repo::ImportJobRepository;
use crate::repository::record_sink::RecordSink;
use chrono::Utc;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

// ==========================================
// BatchReport / BatchError - 单批次结果
// ==========================================
#[derive(Debug, Clone, PartialEq)]
pub struct BatchReport {
    pub batch_index: usize,
    pub delta: CounterDelta,
    pub violations: Vec<DqViolation>,
    pub attempts: u32, // 0 = 无有效行，未落库
    pub rows_committed: usize,
    pub elapsed: Duration,
}

#[derive(Debug, Clone, PartialEq, Error)]
#[error("批次 {batch_index} 写入失败（尝试 {attempts} 次）: {message}")]
pub struct BatchError {
    pub batch_index: usize,
    pub attempts: u32,
    pub rows_affected: usize, // 本应写入的有效行数
    pub delta: CounterDelta,  // 有效行已计入 failed
    pub violations: Vec<DqViolation>,
    pub message: String,
    pub timed_out: bool,
}

/// 映射 + 校验 + 去重后的批次
#[derive(Debug, Default)]
pub struct PreparedBatch {
    pub valid: Vec<MappedRecord>,
    pub claimed_keys: Vec<String>,
    pub delta: CounterDelta, // processed / failed / skipped（successful 待落库后确定）
    pub violations: Vec<DqViolation>,
}

// ==========================================
// BatchContext - 批次单元共享上下文
// ==========================================
pub struct BatchContext {
    job_id: Uuid,
    import_type: ImportType,
    mapping: ImportMapping,
    mapper: FieldMapper,
    validator: DqValidator,
    guard: DuplicateGuard,
    sink: Arc<dyn RecordSink>,
    config: ImportConfig,
}

impl BatchContext {
    pub fn new(
        job_id: Uuid,
        mapping: ImportMapping,
        sink: Arc<dyn RecordSink>,
        config: &ImportConfig,
    ) -> Self {
        let import_type = mapping.import_type;
        Self {
            job_id,
            import_type,
            mapping,
            mapper: FieldMapper::new(import_type),
            validator: DqValidator::new(import_type),
            guard: DuplicateGuard::new(import_type),
            sink,
            config: config.clone(),
        }
    }

    /// 逐行映射 / 校验 / 去重；不触碰存储
    pub fn prepare(&self, batch_index: usize, rows: Vec<Record>, first_row: usize) -> PreparedBatch {
        let mut out = PreparedBatch::default();
        for (offset, record) in rows.into_iter().enumerate() {
            let row_number = first_row + offset;
            out.delta.processed += 1;

            if is_blank_record(&record) {
                out.delta.skipped += 1;
                continue;
            }
            let mapped = match self.mapper.apply(&self.mapping, &record, row_number) {
                Ok(mapped) => mapped,
                Err(e) => {
                    out.delta.failed += 1;
                    out.violations
                        .extend(e.violations.into_iter().map(|v| v.with_batch(batch_index)));
                    continue;
                }
            };
            if mapped.is_empty() {
                out.delta.skipped += 1;
                continue;
            }
            match self.validator.validate(&mapped) {
                Ok(warnings) => out
                    .violations
                    .extend(warnings.into_iter().map(|v| v.with_batch(batch_index))),
                Err(e) => {
                    out.delta.failed += 1;
                    out.violations
                        .extend(e.violations.into_iter().map(|v| v.with_batch(batch_index)));
                    continue;
                }
            }
            match self.guard.check(&mapped) {
                RowVerdict::Accept => {
                    if let Some(key) = self.guard.natural_key(&mapped) {
                        out.claimed_keys.push(key);
                    }
                    out.valid.push(mapped);
                }
                RowVerdict::SkipEmpty => out.delta.skipped += 1,
                RowVerdict::SkipDuplicate(key) => {
                    out.delta.skipped += 1;
                    out.violations.push(
                        DqViolation::row(row_number, DqLevel::Info, "_row", format!("重复行已跳过: {}", key))
                            .with_batch(batch_index),
                    );
                }
            }
        }
        out
    }

    /// 单事务写入，失败后退避重试
    async fn persist_with_retry(
        &self,
        batch_index: usize,
        rows: &[MappedRecord],
    ) -> (u32, Result<usize, RepositoryError>) {
        let max_attempts = self.config.max_batch_retries + 1;
        let mut attempt = 0;
        loop {
            attempt += 1;
            let deadline = Instant::now() + self.config.batch_timeout();
            let result = self
                .sink
                .persist_batch(&self.job_id, self.import_type, batch_index, rows, Some(deadline))
                .await;
            match result {
                Ok(n) => return (attempt, Ok(n)),
                Err(e) if attempt >= max_attempts => return (attempt, Err(e)),
                Err(e) => {
                    let backoff = self.config.retry_backoff(attempt);
                    warn!(
                        job_id = %self.job_id,
                        batch_index,
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "批次写入失败，退避后重试"
                    );
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }

    pub async fn run_batch(
        &self,
        batch_index: usize,
        rows: Vec<Record>,
        first_row: usize,
    ) -> Result<BatchReport, BatchError> {
        let started = Instant::now();
        let prepared = self.prepare(batch_index, rows, first_row);
        let mut delta = prepared.delta;

        if prepared.valid.is_empty() {
            return Ok(BatchReport {
                batch_index,
                delta,
                violations: prepared.violations,
                attempts: 0,
                rows_committed: 0,
                elapsed: started.elapsed(),
            });
        }

        let (attempts, result) = self.persist_with_retry(batch_index, &prepared.valid).await;
        match result {
            Ok(committed) => {
                delta.successful += committed as u64;
                debug!(
                    job_id = %self.job_id,
                    batch_index,
                    rows = committed,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "批次已提交"
                );
                Ok(BatchReport {
                    batch_index,
                    delta,
                    violations: prepared.violations,
                    attempts,
                    rows_committed: committed,
                    elapsed: started.elapsed(),
                })
            }
            Err(e) => {
                // 整批回滚：释放本批登记的自然键，有效行计入 failed
                self.guard.forget(&prepared.claimed_keys);
                delta.failed += prepared.valid.len() as u64;
                Err(BatchError {
                    batch_index,
                    attempts,
                    rows_affected: prepared.valid.len(),
                    delta,
                    violations: prepared.violations,
                    timed_out: e.is_timeout(),
                    message: e.to_string(),
                })
            }
        }
    }
}

// ==========================================
// ChunkFeed - 协调者侧的分块读取
// ==========================================
// 每次读块都在 spawn_blocking 中执行，读取器在调用之间移入移出
struct ChunkFeed {
    reader: Option<Box<dyn ChunkReader + Send>>,
    chunk_size: usize,
    next_batch: usize,
    next_row: usize,
}

fn join_error(e: JoinError) -> ImportError {
    ImportError::InternalError(format!("后台任务异常: {}", e))
}

impl ChunkFeed {
    async fn open(
        parsers: Arc<UniversalFileParser>,
        source: SourceFile,
        options: ParseOptions,
        chunk_size: usize,
    ) -> ImportResult<Self> {
        let reader = tokio::task::spawn_blocking(move || {
            parsers.parser_for(&source)?.open_reader(&source, &options)
        })
        .await
        .map_err(join_error)??;
        Ok(Self {
            reader: Some(reader),
            chunk_size,
            next_batch: 0,
            next_row: 1,
        })
    }

    /// (batch_index, 首行行号, 行)
    async fn next(&mut self) -> ImportResult<Option<(usize, usize, Vec<Record>)>> {
        let Some(mut reader) = self.reader.take() else {
            return Ok(None);
        };
        let size = self.chunk_size.max(1);
        let (reader, chunk) = tokio::task::spawn_blocking(move || {
            let chunk = reader.next_chunk(size);
            (reader, chunk)
        })
        .await
        .map_err(join_error)?;

        match chunk? {
            Some(rows) => {
                self.reader = Some(reader);
                let batch_index = self.next_batch;
                let first_row = self.next_row;
                self.next_batch += 1;
                self.next_row += rows.len();
                Ok(Some((batch_index, first_row, rows)))
            }
            None => Ok(None),
        }
    }
}

// ==========================================
// BatchRequest - 批处理输入
// ==========================================
#[derive(Debug, Clone)]
pub struct BatchRequest {
    pub source: SourceFile,
    pub options: ParseOptions,
    pub mapping: ImportMapping,
    pub total_rows: u64,
    pub deadline: Option<Instant>, // 任务级截止时间（None = 从现在起 job_timeout）
}

// ==========================================
// BatchProcessor
// ==========================================
pub struct BatchProcessor {
    config: ImportConfig,
    parsers: Arc<UniversalFileParser>,
    jobs: Arc<dyn ImportJobRepository>,
    sink: Arc<dyn RecordSink>,
    progress: Arc<ProgressTracker>,
    memory: Arc<dyn MemoryProbe>,
}

impl BatchProcessor {
    pub fn new(
        config: ImportConfig,
        parsers: Arc<UniversalFileParser>,
        jobs: Arc<dyn ImportJobRepository>,
        sink: Arc<dyn RecordSink>,
        progress: Arc<ProgressTracker>,
        memory: Arc<dyn MemoryProbe>,
    ) -> Self {
        Self {
            config,
            parsers,
            jobs,
            sink,
            progress,
            memory,
        }
    }

    pub fn config(&self) -> &ImportConfig {
        &self.config
    }

    pub fn plan_for(&self, file_size: u64, total_rows: u64) -> BatchPlan {
        let available = memory::available_memory(&self.config, self.memory.current_usage());
        batch_sizing::plan(&self.config, file_size, total_rows, available)
    }

    /// 完整执行并落到终态（调用返回后任务不会停留在进行中状态）
    #[instrument(skip_all, fields(job_id = %job.job_id))]
    pub async fn process_large_import(
        &self,
        mut job: ImportJob,
        request: BatchRequest,
        mut signal: JobSignal,
    ) -> ImportResult<ImportJob> {
        let outcome = self.run(&mut job, request, &mut signal).await;
        self.finalize(job, outcome).await
    }

    /// 执行分批写入；任务级错误原样返回，由调用方交给 finalize
    pub async fn run(
        &self,
        job: &mut ImportJob,
        request: BatchRequest,
        signal: &mut JobSignal,
    ) -> ImportResult<()> {
        let plan = self.plan_for(request.source.size, request.total_rows);
        job.import_results.parallel = plan.parallel;
        job.set_total(request.total_rows);
        self.jobs.set_total(&job.job_id, request.total_rows).await?;
        self.transition(job, ImportStatus::Importing).await?;

        info!(
            job_id = %job.job_id,
            total_rows = request.total_rows,
            batch_size = plan.batch_size,
            estimated_batches = plan.estimated_batches,
            parallel = plan.parallel,
            "开始分批导入"
        );
        self.progress.update(
            &job.job_id,
            ProgressUpdate {
                phase: Some(ProgressPhase::Importing),
                total: Some(request.total_rows),
                memory_usage_bytes: Some(self.memory.current_usage()),
                message: Some(format!(
                    "批次大小 {}，预计 {} 批",
                    plan.batch_size, plan.estimated_batches
                )),
                ..Default::default()
            },
        );

        let mut deadline = request
            .deadline
            .unwrap_or_else(|| Instant::now() + self.config.job_timeout());
        let ctx = Arc::new(BatchContext::new(
            job.job_id,
            request.mapping.clone(),
            self.sink.clone(),
            &self.config,
        ));

        if plan.parallel {
            let spooled = self.spool(&job.job_id, &request.source).await?;
            let result = self
                .run_parallel(job, spooled.clone(), request.options, plan, ctx, signal, &mut deadline)
                .await;
            remove_spool(&spooled.path).await;
            result
        } else {
            let mut feed = ChunkFeed::open(
                self.parsers.clone(),
                request.source,
                request.options,
                plan.batch_size,
            )
            .await?;
            loop {
                self.at_boundary(job, &mut feed, signal, &mut deadline).await?;
                let Some((batch_index, first_row, rows)) = feed.next().await? else {
                    break;
                };
                let outcome = ctx.run_batch(batch_index, rows, first_row).await;
                self.fold(job, outcome).await?;
            }
            Ok(())
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_parallel(
        &self,
        job: &mut ImportJob,
        spooled: SourceFile,
        options: ParseOptions,
        plan: BatchPlan,
        ctx: Arc<BatchContext>,
        signal: &mut JobSignal,
        deadline: &mut Instant,
    ) -> ImportResult<()> {
        let mut feed = ChunkFeed::open(self.parsers.clone(), spooled, options, plan.batch_size).await?;
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency.max(1)));
        let mut units: JoinSet<Result<BatchReport, BatchError>> = JoinSet::new();

        let dispatched = self
            .dispatch_units(job, &mut feed, &semaphore, &ctx, &mut units, signal, deadline)
            .await;
        if matches!(dispatched, Err(ImportError::Timeout(_))) {
            units.abort_all();
        }

        // 取消时进行中的批次允许执行完；结果按完成顺序折叠
        let mut drained: ImportResult<()> = Ok(());
        while let Some(joined) = units.join_next().await {
            match joined {
                Ok(outcome) => {
                    if let Err(e) = self.fold(job, outcome).await {
                        error!(job_id = %job.job_id, error = %e, "批次结果折叠失败");
                        if drained.is_ok() {
                            drained = Err(e);
                        }
                    }
                }
                Err(e) if e.is_cancelled() => {
                    debug!(job_id = %job.job_id, "批次单元已中止");
                }
                Err(e) => {
                    if drained.is_ok() {
                        drained = Err(join_error(e));
                    }
                }
            }
        }
        dispatched.and(drained)
    }

    #[allow(clippy::too_many_arguments)]
    async fn dispatch_units(
        &self,
        job: &mut ImportJob,
        feed: &mut ChunkFeed,
        semaphore: &Arc<Semaphore>,
        ctx: &Arc<BatchContext>,
        units: &mut JoinSet<Result<BatchReport, BatchError>>,
        signal: &mut JobSignal,
        deadline: &mut Instant,
    ) -> ImportResult<()> {
        let token = signal.token();
        loop {
            self.at_boundary(job, feed, signal, deadline).await?;
            let Some((batch_index, first_row, rows)) = feed.next().await? else {
                return Ok(());
            };

            let permit = tokio::select! {
                permit = semaphore.clone().acquire_owned() => {
                    permit.map_err(|e| ImportError::InternalError(e.to_string()))?
                }
                _ = token.cancelled() => {
                    return Err(ImportError::Cancelled(job.job_id.to_string()));
                }
            };

            while let Some(joined) = units.try_join_next() {
                self.fold(job, joined.map_err(join_error)?).await?;
            }

            let ctx = ctx.clone();
            units.spawn(async move {
                let _permit = permit;
                ctx.run_batch(batch_index, rows, first_row).await
            });
            debug!(job_id = %job.job_id, batch_index, in_flight = units.len(), "批次单元已派发");
        }
    }

    /// 块边界：暂停 / 取消 / 超时 / 内存压力
    async fn at_boundary(
        &self,
        job: &mut ImportJob,
        feed: &mut ChunkFeed,
        signal: &mut JobSignal,
        deadline: &mut Instant,
    ) -> ImportResult<()> {
        if signal.is_paused() && !signal.is_cancelled() {
            let paused_at = Instant::now();
            self.transition(job, ImportStatus::Paused).await?;
            self.progress.update(
                &job.job_id,
                ProgressUpdate {
                    message: Some("已暂停".to_string()),
                    ..Default::default()
                },
            );
            info!(job_id = %job.job_id, batch_index = feed.next_batch, "任务已暂停");
            signal.checkpoint().await?;
            // 暂停时长不计入任务时间预算
            *deadline += paused_at.elapsed();
            self.transition(job, ImportStatus::Importing).await?;
            info!(job_id = %job.job_id, "任务已恢复");
        } else {
            signal.checkpoint().await?;
        }

        if Instant::now() >= *deadline {
            return Err(ImportError::Timeout(format!(
                "任务超出 {} 秒时间预算（已读取 {} 批）",
                self.config.job_timeout_secs, feed.next_batch
            )));
        }

        let usage = self.memory.current_usage();
        if memory::under_pressure(&self.config, usage) {
            let next = batch_sizing::relieved_size(feed.chunk_size, &self.config);
            job.import_results.memory_relief_events += 1;
            warn!(
                job_id = %job.job_id,
                memory_usage_bytes = usage,
                from = feed.chunk_size,
                to = next,
                "内存压力超过阈值，缩小后续批次"
            );
            feed.chunk_size = next;
        }
        Ok(())
    }

    /// 折叠单批次结果：任务记录原子累加 + 进度快照
    async fn fold(
        &self,
        job: &mut ImportJob,
        outcome: Result<BatchReport, BatchError>,
    ) -> ImportResult<()> {
        let (batch_index, delta, violations, batch_failed) = match outcome {
            Ok(report) => {
                job.import_results.batches_completed += 1;
                if report.rows_committed > 0 {
                    job.import_results.committed_batches.push(report.batch_index);
                }
                if report.attempts > 1 {
                    job.import_results
                        .retry_counts
                        .insert(report.batch_index, report.attempts - 1);
                }
                (report.batch_index, report.delta, report.violations, false)
            }
            Err(err) => {
                error!(
                    job_id = %job.job_id,
                    batch_index = err.batch_index,
                    attempts = err.attempts,
                    rows_affected = err.rows_affected,
                    timed_out = err.timed_out,
                    error = %err.message,
                    "批次进入死信"
                );
                job.import_results.batches_failed += 1;
                if err.attempts > 1 {
                    job.import_results
                        .retry_counts
                        .insert(err.batch_index, err.attempts - 1);
                }
                job.import_results.failed_batches.push(FailedBatch {
                    batch_index: err.batch_index,
                    attempts: err.attempts,
                    rows_affected: err.rows_affected,
                    error: err.message.clone(),
                });
                job.record_violation(
                    DqViolation::file(DqLevel::Error, err.to_string()).with_batch(err.batch_index),
                );
                (err.batch_index, err.delta, err.violations, true)
            }
        };

        job.record_violations(violations);
        let counters = self.jobs.apply_batch_delta(&job.job_id, &delta).await?;
        job.counters = counters;
        job.progress_percentage = counters.progress_percentage();
        job.updated_at = Utc::now();

        self.progress.update_batch(
            &job.job_id,
            &BatchProgress {
                batch_index,
                processed: delta.processed,
                successful: delta.successful,
                failed: delta.failed,
                skipped: delta.skipped,
                batch_failed,
                memory_usage_bytes: self.memory.current_usage(),
            },
        );
        Ok(())
    }

    async fn transition(&self, job: &mut ImportJob, status: ImportStatus) -> ImportResult<()> {
        job.set_status(status);
        self.jobs.update_status(&job.job_id, status).await?;
        Ok(())
    }

    /// 源文件复制到 spool 目录（并行模式）
    async fn spool(&self, job_id: &Uuid, source: &SourceFile) -> ImportResult<SourceFile> {
        tokio::fs::create_dir_all(&self.config.spool_dir).await?;
        let ext = source.extension();
        let name = if ext.is_empty() {
            job_id.to_string()
        } else {
            format!("{}.{}", job_id, ext)
        };
        let path = self.config.spool_dir.join(name);
        tokio::fs::copy(&source.path, &path).await?;
        debug!(job_id = %job_id, spool = %path.display(), "源文件已落到 spool 目录");
        Ok(SourceFile {
            path,
            ..source.clone()
        })
    }

    /// 落到终态并写回任务记录
    pub async fn finalize(
        &self,
        mut job: ImportJob,
        outcome: ImportResult<()>,
    ) -> ImportResult<ImportJob> {
        match outcome {
            Ok(()) => {
                job.finish(ImportStatus::Completed);
                info!(
                    job_id = %job.job_id,
                    total = job.counters.total,
                    processed = job.counters.processed,
                    successful = job.counters.successful,
                    failed = job.counters.failed,
                    skipped = job.counters.skipped,
                    batches_failed = job.import_results.batches_failed,
                    "导入完成"
                );
                self.progress.mark_completed(&job);
            }
            Err(ImportError::Cancelled(_)) => {
                job.finish(ImportStatus::Cancelled);
                warn!(job_id = %job.job_id, processed = job.counters.processed, "导入已取消");
                self.progress.mark_cancelled(&job);
            }
            Err(e) => {
                let message = e.to_string();
                error!(job_id = %job.job_id, error = %message, "导入失败");
                job.fail(e.failure_reason(), message.clone());
                self.progress.mark_failed(&job, &message);
            }
        }
        // 已提交的批次在任何终态下都可在窗口期内回滚
        job.enable_rollback(self.config.rollback_window_hours);
        self.jobs.save(&job).await?;
        Ok(job)
    }
}

async fn remove_spool(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        warn!(spool = %path.display(), error = %e, "spool 文件清理失败");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::mapping::FieldMappingEntry;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// 前 fail_times 次写入失败的内存 sink
    struct FlakySink {
        fail_times: u32,
        calls: AtomicU32,
        rows: Mutex<Vec<MappedRecord>>,
    }

    impl FlakySink {
        fn new(fail_times: u32) -> Self {
            Self {
                fail_times,
                calls: AtomicU32::new(0),
                rows: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl RecordSink for FlakySink {
        async fn persist_batch(
            &self,
            _job_id: &Uuid,
            _import_type: ImportType,
            _batch_index: usize,
            rows: &[MappedRecord],
            _deadline: Option<Instant>,
        ) -> crate::repository::error::RepositoryResult<usize> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.fail_times {
                return Err(RepositoryError::DatabaseTransactionError("disk full".into()));
            }
            self.rows.lock().unwrap().extend(rows.iter().cloned());
            Ok(rows.len())
        }

        async fn delete_job_records(
            &self,
            _job_id: &Uuid,
            _batches: &[usize],
        ) -> crate::repository::error::RepositoryResult<usize> {
            Ok(0)
        }

        async fn count_job_records(&self, _job_id: &Uuid) -> crate::repository::error::RepositoryResult<u64> {
            Ok(self.rows.lock().unwrap().len() as u64)
        }

        async fn load_job_records(
            &self,
            _job_id: &Uuid,
        ) -> crate::repository::error::RepositoryResult<Vec<MappedRecord>> {
            Ok(self.rows.lock().unwrap().clone())
        }
    }

    fn menu_mapping() -> ImportMapping {
        ImportMapping::new(
            "menu",
            ImportType::Menu,
            None,
            vec![
                FieldMappingEntry::manual("Item", "name"),
                FieldMappingEntry::manual("Price", "price"),
            ],
        )
    }

    fn record(item: serde_json::Value, price: serde_json::Value) -> Record {
        let mut r = Record::new();
        r.insert("Item".into(), item);
        r.insert("Price".into(), price);
        r
    }

    fn context(sink: Arc<dyn RecordSink>, retries: u32) -> BatchContext {
        let config = ImportConfig {
            max_batch_retries: retries,
            retry_backoff_ms: 1,
            ..Default::default()
        };
        BatchContext::new(Uuid::new_v4(), menu_mapping(), sink, &config)
    }

    #[test]
    fn test_prepare_classifies_rows() {
        let ctx = context(Arc::new(FlakySink::new(0)), 0);
        let rows = vec![
            record(json!("Burger"), json!(9.99)),
            record(json!(null), json!(null)),          // 空行
            record(json!("Soda"), json!("abc")),       // 价格无法转换
            record(json!("burger"), json!(5)),         // 与第 1 行自然键重复
            record(json!(null), json!(3.5)),           // 缺少必填 name
        ];
        let prepared = ctx.prepare(0, rows, 1);
        assert_eq!(prepared.valid.len(), 1);
        assert_eq!(prepared.delta.processed, 5);
        assert_eq!(prepared.delta.skipped, 2);
        assert_eq!(prepared.delta.failed, 2);
        assert!(prepared.violations.iter().all(|v| v.batch_index == Some(0)));
        assert_eq!(prepared.valid[0].row_number, 1);
    }

    #[tokio::test]
    async fn test_retry_then_commit() {
        let sink = Arc::new(FlakySink::new(1));
        let ctx = context(sink.clone(), 2);
        let report = ctx
            .run_batch(3, vec![record(json!("A"), json!(1)), record(json!("B"), json!(2))], 7)
            .await
            .unwrap();
        assert_eq!(report.attempts, 2);
        assert_eq!(report.rows_committed, 2);
        assert_eq!(report.delta.successful, 2);
        assert_eq!(sink.rows.lock().unwrap()[0].row_number, 7);
    }

    #[tokio::test]
    async fn test_dead_letter_counts_rows_as_failed() {
        let sink = Arc::new(FlakySink::new(10));
        let ctx = context(sink.clone(), 1);
        let err = ctx
            .run_batch(0, vec![record(json!("A"), json!(1)), record(json!(null), json!(null))], 1)
            .await
            .unwrap_err();
        assert_eq!(err.attempts, 2);
        assert_eq!(err.rows_affected, 1);
        assert_eq!(err.delta.processed, 2);
        assert_eq!(err.delta.failed, 1);
        assert_eq!(err.delta.skipped, 1);
        assert_eq!(err.delta.successful, 0);

        // 死信批次释放了自然键，同名行之后仍可导入
        assert_eq!(ctx.guard.seen_count(), 0);
    }

    #[tokio::test]
    async fn test_batch_without_valid_rows_skips_sink() {
        let sink = Arc::new(FlakySink::new(0));
        let ctx = context(sink.clone(), 0);
        let report = ctx
            .run_batch(0, vec![record(json!(null), json!(null))], 1)
            .await
            .unwrap();
        assert_eq!(report.attempts, 0);
        assert_eq!(sink.calls.load(Ordering::SeqCst), 0);
    }
}
