// ==========================================
// POS 导入核心 - 导入服务（编排入口）
// ==========================================
// 流程: 建任务(内容摘要/重复上传) → 格式识别 + 结构校验 → 内容分类
//       → 汇总报表: 单文档落库
//       → 行式数据: 映射选择/合成 → 映射校验 → 分批导入
// 控制: pause / resume / cancel / rollback / 进度查询
// 约束: run_import 返回时任务一定处于终态
// ==========================================

use crate::config::ImportConfig;
use crate::domain::format::{ClassificationReport, FormatValidation};
use crate::domain::import_job::{CounterDelta, ImportJob};
use crate::domain::mapping::ImportMapping;
use crate::domain::progress::{BatchProgress, DetailedProgress, ProgressSnapshot, ProgressUpdate};
use crate::domain::quality::{DqLevel, DqViolation};
use crate::domain::record::{MappedRecord, Record};
use crate::domain::types::{FormatType, ImportStatus, ImportType, ProgressPhase};
use crate::engine::batch_processor::{BatchProcessor, BatchRequest};
use crate::engine::job_control::{JobControl, JobSignal};
use crate::engine::memory::{MemoryProbe, ProcessMemoryProbe};
use crate::engine::progress_tracker::ProgressTracker;
use crate::importer::dq_validator::DqValidator;
use crate::importer::error::{ImportError, ImportResult};
use crate::importer::field_mapper::FieldMapper;
use crate::importer::file_parser::{ParseOptions, UniversalFileParser};
use crate::importer::format_detector::FormatDetector;
use crate::importer::smart_classifier::SmartClassifier;
use crate::importer::source_file::SourceFile;
use crate::importer::summary_report_parser::{SummaryReport, SummaryReportParser};
use crate::repository::error::RepositoryError;
use crate::repository::import_job_repo::{ImportJobRepository, SqliteImportJobRepository};
use crate::repository::import_mapping_repo::{
    ImportMappingRepository, SqliteImportMappingRepository,
};
use crate::repository::record_sink::{RecordSink, SqliteRecordSink};
use chrono::Utc;
use rusqlite::Connection;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// 映射合成时读取的样本行数
const MAPPING_SAMPLE_ROWS: usize = 5;

// ==========================================
// ImportRequest - 单次导入请求
// ==========================================
#[derive(Debug, Clone)]
pub struct ImportRequest {
    pub name: String,
    pub import_type: ImportType,
    pub pos_system: Option<String>,
    pub source: SourceFile,
    pub options: ParseOptions,
    pub force_format: Option<FormatType>, // 跳过内容分类
    pub mapping_id: Option<Uuid>,         // 指定映射配置
}

impl ImportRequest {
    pub fn new(name: impl Into<String>, import_type: ImportType, source: SourceFile) -> Self {
        Self {
            name: name.into(),
            import_type,
            pos_system: None,
            source,
            options: ParseOptions::default(),
            force_format: None,
            mapping_id: None,
        }
    }

    pub fn with_pos_system(mut self, pos_system: impl Into<String>) -> Self {
        self.pos_system = Some(pos_system.into());
        self
    }
}

// ==========================================
// ImportService
// ==========================================
pub struct ImportService {
    config: ImportConfig,
    jobs: Arc<dyn ImportJobRepository>,
    mappings: Arc<dyn ImportMappingRepository>,
    sink: Arc<dyn RecordSink>,
    parsers: Arc<UniversalFileParser>,
    progress: Arc<ProgressTracker>,
    control: Arc<JobControl>,
    processor: BatchProcessor,
}

impl ImportService {
    pub fn new(
        config: ImportConfig,
        jobs: Arc<dyn ImportJobRepository>,
        mappings: Arc<dyn ImportMappingRepository>,
        sink: Arc<dyn RecordSink>,
        memory: Arc<dyn MemoryProbe>,
    ) -> Self {
        let parsers = Arc::new(UniversalFileParser::new());
        let progress = Arc::new(ProgressTracker::new(&config));
        let processor = BatchProcessor::new(
            config.clone(),
            parsers.clone(),
            jobs.clone(),
            sink.clone(),
            progress.clone(),
            memory,
        );
        Self {
            config,
            jobs,
            mappings,
            sink,
            parsers,
            progress,
            control: Arc::new(JobControl::new()),
            processor,
        }
    }

    /// 三个 SQLite 仓储共用同一连接
    pub fn from_connection(conn: Arc<Mutex<Connection>>, config: ImportConfig) -> Self {
        Self::with_memory_probe(conn, config, Arc::new(ProcessMemoryProbe))
    }

    pub fn with_memory_probe(
        conn: Arc<Mutex<Connection>>,
        config: ImportConfig,
        memory: Arc<dyn MemoryProbe>,
    ) -> Self {
        Self::new(
            config,
            Arc::new(SqliteImportJobRepository::new(conn.clone())),
            Arc::new(SqliteImportMappingRepository::new(conn.clone())),
            Arc::new(SqliteRecordSink::new(conn)),
            memory,
        )
    }

    pub fn config(&self) -> &ImportConfig {
        &self.config
    }

    pub fn control(&self) -> Arc<JobControl> {
        self.control.clone()
    }

    // ==========================================
    // 任务创建
    // ==========================================

    /// 创建 pending 任务；同内容已完成过时按配置拒绝或告警
    #[instrument(skip_all, fields(file = %request.source.original_name))]
    pub async fn create_job(&self, request: &ImportRequest) -> ImportResult<ImportJob> {
        let mut job = ImportJob::new(
            request.name.clone(),
            request.import_type,
            request.pos_system.clone(),
            request.source.original_name.clone(),
            request.source.size,
            request.source.mime_type.clone(),
        );

        let source = request.source.clone();
        let hash = blocking(move || source.content_hash()).await?;
        if let Some(previous) = self.jobs.find_completed_by_hash(&hash).await? {
            if self.config.reject_duplicate_uploads {
                return Err(ImportError::DuplicateUpload {
                    job_id: previous.job_id.to_string(),
                });
            }
            warn!(previous_job_id = %previous.job_id, "文件内容与已完成任务相同");
            job.import_results
                .warnings
                .push(format!("文件内容与已完成任务 {} 相同", previous.job_id));
        }
        job.content_hash = Some(hash);

        self.jobs.insert(&job).await?;
        info!(
            job_id = %job.job_id,
            import_type = job.import_type.as_str(),
            file_size = job.file_size,
            "导入任务已创建"
        );
        Ok(job)
    }

    /// 创建并执行
    pub async fn import(&self, request: ImportRequest) -> ImportResult<ImportJob> {
        let job = self.create_job(&request).await?;
        self.run_import(&job.job_id, request).await
    }

    // ==========================================
    // 执行
    // ==========================================

    /// 执行已创建的任务，返回终态任务
    ///
    /// 任务级失败（格式 / 超时 / 存储）记录在任务上并正常返回；
    /// 只有任务不存在或终态写回失败时才返回 Err
    #[instrument(skip_all, fields(job_id = %job_id))]
    pub async fn run_import(&self, job_id: &Uuid, request: ImportRequest) -> ImportResult<ImportJob> {
        let mut job = self.load_job(job_id).await?;
        if job.status != ImportStatus::Pending {
            return Err(ImportError::InternalError(format!(
                "任务 {} 当前状态为 {}，不能重复执行",
                job_id,
                job.status.as_str()
            )));
        }

        let mut signal = self.control.register(job.job_id);
        self.progress.init(&job);
        let started = Instant::now();

        let outcome = self.execute(&mut job, request, &mut signal, started).await;
        let finished = self.processor.finalize(job, outcome).await;
        self.control.release(job_id);
        finished
    }

    async fn execute(
        &self,
        job: &mut ImportJob,
        request: ImportRequest,
        signal: &mut JobSignal,
        started: Instant,
    ) -> ImportResult<()> {
        // ===== 解析阶段：格式识别 + 结构校验 =====
        self.enter_phase(job, ImportStatus::Parsing, "识别文件格式").await?;
        signal.checkpoint().await?;

        let source = request.source.clone();
        let descriptor = blocking(move || Ok(FormatDetector::detect(&source))).await?;
        job.import_results.format = Some(descriptor);

        let validation = self.validate_format(&request.source, &request.options).await?;
        job.import_results
            .warnings
            .extend(validation.warnings.iter().map(|w| w.message.clone()));
        if !validation.is_valid {
            let message = validation
                .errors
                .iter()
                .map(|e| e.message.as_str())
                .collect::<Vec<_>>()
                .join("; ");
            return Err(ImportError::InvalidFormat(message));
        }

        // ===== 内容分类 =====
        let format_type = match request.force_format {
            Some(forced) => {
                debug!(job_id = %job.job_id, format_type = %forced, "调用方指定内容类型，跳过分类");
                forced
            }
            None => {
                let report = self.classify(&request.source, &request.options).await?;
                let format_type = report.format_type;
                if matches!(format_type, FormatType::HybridOrComplex | FormatType::Unknown) {
                    job.import_results.warnings.push(format!(
                        "内容分类为 {}（置信度 {:.0}），按行式数据导入",
                        format_type, report.confidence
                    ));
                }
                job.import_results.classification = Some(report);
                format_type
            }
        };
        signal.checkpoint().await?;

        if format_type == FormatType::SummaryReport {
            return self.import_summary(job, &request, signal).await;
        }

        // ===== 行式数据：计数 / 映射 / 校验 =====
        let total_rows = self.count_rows(&request.source, &request.options).await? as u64;
        job.set_total(total_rows);
        self.jobs.set_total(&job.job_id, total_rows).await?;

        self.enter_phase(job, ImportStatus::Mapping, "匹配字段映射").await?;
        let mapping = self.resolve_mapping(job, &request).await?;
        job.field_mapping_snapshot = serde_json::to_value(&mapping.field_mappings).ok();

        self.enter_phase(job, ImportStatus::Validating, "校验映射配置").await?;
        let mapping_issues = DqValidator::new(job.import_type).validate_mapping(&mapping);
        for issue in &mapping_issues {
            warn!(job_id = %job.job_id, issue = %issue.message, "映射配置问题");
        }
        job.record_violations(mapping_issues);
        self.jobs.save(job).await?;
        signal.checkpoint().await?;

        let batch_request = BatchRequest {
            source: request.source,
            options: request.options,
            mapping,
            total_rows,
            deadline: Some(started + self.config.job_timeout()),
        };
        self.processor.run(job, batch_request, signal).await
    }

    /// 汇总报表：整份文档作为一条记录写入批次 0
    async fn import_summary(
        &self,
        job: &mut ImportJob,
        request: &ImportRequest,
        signal: &mut JobSignal,
    ) -> ImportResult<()> {
        let source = request.source.clone();
        let options = request.options.clone();
        let report: SummaryReport =
            blocking(move || SummaryReportParser::new().parse_file(&source, &options)).await?;
        signal.checkpoint().await?;

        job.set_total(1);
        self.jobs.set_total(&job.job_id, 1).await?;
        self.enter_phase(job, ImportStatus::Importing, "写入汇总报表").await?;

        let mut row = MappedRecord::new(1);
        row.values = report.to_record();
        let deadline = Instant::now() + self.config.batch_timeout();
        let written = self
            .sink
            .persist_batch(&job.job_id, job.import_type, 0, &[row], Some(deadline))
            .await?;

        let delta = CounterDelta {
            processed: 1,
            successful: written as u64,
            ..Default::default()
        };
        job.counters = self.jobs.apply_batch_delta(&job.job_id, &delta).await?;
        job.progress_percentage = job.counters.progress_percentage();
        job.import_results.batches_completed = 1;
        job.import_results.committed_batches.push(0);
        job.import_results.warnings.extend(report.warnings.iter().cloned());
        job.import_results.summary_document = serde_json::to_value(&report).ok();

        self.progress.update_batch(
            &job.job_id,
            &BatchProgress {
                batch_index: 0,
                processed: delta.processed,
                successful: delta.successful,
                ..Default::default()
            },
        );
        info!(
            job_id = %job.job_id,
            metrics = report.metrics.len(),
            payments = report.payment_methods.len(),
            "汇总报表已导入"
        );
        Ok(())
    }

    /// 映射选择顺序: 指定 ID → 同组首选且覆盖全部表头 → 按表头合成并保存
    async fn resolve_mapping(
        &self,
        job: &mut ImportJob,
        request: &ImportRequest,
    ) -> ImportResult<ImportMapping> {
        let parser_source = request.source.clone();
        let parser_options = request.options.clone();
        let parsers = self.parsers.clone();
        let (headers, sample) = blocking(move || {
            let parser = parsers.parser_for(&parser_source)?;
            let headers = parser.get_headers(&parser_source, &parser_options)?;
            let sample =
                parser.parse_sample(&parser_source, &parser_options, MAPPING_SAMPLE_ROWS, 0)?;
            Ok::<(Vec<String>, Vec<Record>), ImportError>((headers, sample))
        })
        .await?;

        let mapping = match request.mapping_id {
            Some(mapping_id) => {
                let mapping = self.mappings.get(&mapping_id).await.map_err(|e| match e {
                    RepositoryError::NotFound { .. } => {
                        ImportError::FieldMappingError(format!("映射配置不存在: {}", mapping_id))
                    }
                    other => other.into(),
                })?;
                if mapping.import_type != job.import_type {
                    return Err(ImportError::FieldMappingError(format!(
                        "映射配置 {} 属于 {}，任务类型为 {}",
                        mapping_id,
                        mapping.import_type.as_str(),
                        job.import_type.as_str()
                    )));
                }
                mapping
            }
            None => match self
                .mappings
                .find_preferred(job.import_type, job.pos_system.as_deref())
                .await?
                .filter(|m| m.covers_headers(&headers))
            {
                Some(mapping) => {
                    debug!(job_id = %job.job_id, mapping_id = %mapping.mapping_id, "复用已保存的映射配置");
                    mapping
                }
                None => {
                    let mapper = FieldMapper::new(job.import_type);
                    let name = format!("{} - {}", job.import_type.as_str(), job.original_filename);
                    let mapping =
                        mapper.build_mapping(name, job.pos_system.clone(), &headers, &sample);
                    if mapping.mapped_entries().next().is_none() {
                        return Err(ImportError::FieldMappingError(format!(
                            "表头 [{}] 中没有可识别的字段",
                            headers.join(", ")
                        )));
                    }
                    self.mappings.insert(&mapping).await?;
                    info!(
                        job_id = %job.job_id,
                        mapping_id = %mapping.mapping_id,
                        confidence = mapping.confidence,
                        mapped = mapping.mapped_entries().count(),
                        columns = headers.len(),
                        "已按表头生成映射配置"
                    );
                    mapping
                }
            },
        };

        let unmapped: Vec<&str> = headers
            .iter()
            .filter(|h| mapping.target_for(h).is_none())
            .map(String::as_str)
            .collect();
        if !unmapped.is_empty() {
            job.record_violation(DqViolation::file(
                DqLevel::Info,
                format!("以下列未映射，将被忽略: {}", unmapped.join(", ")),
            ));
        }

        self.mappings.record_usage(&mapping.mapping_id).await?;
        Ok(mapping)
    }

    // ==========================================
    // 控制与查询
    // ==========================================

    pub fn pause(&self, job_id: &Uuid) -> bool {
        self.control.pause(job_id)
    }

    pub fn resume(&self, job_id: &Uuid) -> bool {
        self.control.resume(job_id)
    }

    pub fn cancel(&self, job_id: &Uuid) -> bool {
        self.control.cancel(job_id)
    }

    pub fn get_progress(&self, job_id: &Uuid) -> Option<ProgressSnapshot> {
        self.progress.get_progress(job_id)
    }

    pub fn get_detailed_progress(&self, job_id: &Uuid) -> Option<DetailedProgress> {
        self.progress.get_detailed_progress(job_id)
    }

    pub async fn get_job(&self, job_id: &Uuid) -> ImportResult<ImportJob> {
        self.load_job(job_id).await
    }

    pub async fn recent_jobs(&self, limit: usize) -> ImportResult<Vec<ImportJob>> {
        Ok(self.jobs.list_recent(limit).await?)
    }

    /// 回滚窗口内删除该任务已提交的记录
    #[instrument(skip(self))]
    pub async fn rollback(&self, job_id: &Uuid) -> ImportResult<ImportJob> {
        let mut job = self.load_job(job_id).await?;
        if self.control.is_running(job_id) {
            return Err(ImportError::RollbackUnavailable(format!("任务 {} 仍在执行", job_id)));
        }
        if !job.rollback_open(Utc::now()) {
            let reason = match &job.rollback_data {
                Some(payload) => format!("回滚窗口已于 {} 关闭", payload.expires_at.to_rfc3339()),
                None => "任务没有可回滚的已提交批次".to_string(),
            };
            return Err(ImportError::RollbackUnavailable(reason));
        }

        let batches = job
            .rollback_data
            .as_ref()
            .map(|p| p.committed_batches.clone())
            .unwrap_or_default();
        let removed = self.sink.delete_job_records(job_id, &batches).await?;
        self.jobs.set_rollback(job_id, false, None).await?;

        job.can_rollback = false;
        job.rollback_data = None;
        job.import_results
            .warnings
            .push(format!("已回滚 {} 个批次共 {} 条记录", batches.len(), removed));
        job.updated_at = Utc::now();
        self.jobs.save(&job).await?;

        info!(job_id = %job_id, batches = batches.len(), removed, "任务已回滚");
        Ok(job)
    }

    // ==========================================
    // 内部辅助
    // ==========================================

    async fn load_job(&self, job_id: &Uuid) -> ImportResult<ImportJob> {
        self.jobs.get(job_id).await.map_err(|e| match e {
            RepositoryError::NotFound { .. } => ImportError::JobNotFound(job_id.to_string()),
            other => other.into(),
        })
    }

    async fn enter_phase(
        &self,
        job: &mut ImportJob,
        status: ImportStatus,
        message: &str,
    ) -> ImportResult<()> {
        job.set_status(status);
        self.jobs.update_status(&job.job_id, status).await?;
        self.progress.update(
            &job.job_id,
            ProgressUpdate {
                message: Some(message.to_string()),
                ..ProgressUpdate::phase(ProgressPhase::from(status))
            },
        );
        Ok(())
    }

    async fn validate_format(
        &self,
        source: &SourceFile,
        options: &ParseOptions,
    ) -> ImportResult<FormatValidation> {
        let parsers = self.parsers.clone();
        let source = source.clone();
        let options = options.clone();
        blocking(move || Ok(parsers.parser_for(&source)?.validate_format(&source, &options))).await
    }

    async fn classify(
        &self,
        source: &SourceFile,
        options: &ParseOptions,
    ) -> ImportResult<ClassificationReport> {
        let parsers = self.parsers.clone();
        let source = source.clone();
        let options = options.clone();
        blocking(move || SmartClassifier::analyze_file(&parsers, &source, &options)).await
    }

    async fn count_rows(&self, source: &SourceFile, options: &ParseOptions) -> ImportResult<usize> {
        let parsers = self.parsers.clone();
        let source = source.clone();
        let options = options.clone();
        blocking(move || parsers.parser_for(&source)?.count_rows(&source, &options)).await
    }
}

/// 同步解析放到阻塞线程池
async fn blocking<T, F>(f: F) -> ImportResult<T>
where
    F: FnOnce() -> ImportResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ImportError::InternalError(format!("后台任务异常: {}", e)))?
}
