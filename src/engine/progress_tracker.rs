// ==========================================
// POS 导入核心 - 进度跟踪器
// ==========================================
// 职责: 维护运行中任务的进度快照（计数 / 阶段 / 速度 / ETA / 趋势）
// 一致性: 与 ImportJob 最终一致，轮询方读取不会阻塞批处理
// 存储: 活动快照带 TTL；任务结束后另存一份归档（更长 TTL）
// ==========================================

use crate::config::ImportConfig;
use crate::domain::import_job::ImportJob;
use crate::domain::progress::{
    BatchProgress, DetailedProgress, ProgressAnalytics, ProgressPoint, ProgressSnapshot,
    ProgressUpdate,
};
use crate::domain::quality;
use crate::domain::types::{PerformanceRating, ProgressPhase};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;
use uuid::Uuid;

struct TrackedProgress {
    snapshot: ProgressSnapshot,
    expires_at: DateTime<Utc>,
    last_point_processed: u64,
    last_batch_at: DateTime<Utc>,
    batch_seconds_total: f64,
    batches_timed: usize,
    peak_memory_bytes: u64,
}

impl TrackedProgress {
    fn analytics(&self) -> ProgressAnalytics {
        let s = &self.snapshot;
        let score = quality::quality_score(s.successful, s.failed, s.processed);
        ProgressAnalytics {
            efficiency: quality::efficiency(s.successful, s.processed),
            error_rate: quality::error_rate(s.failed, s.processed),
            quality_score: score,
            performance_rating: PerformanceRating::from_quality_score(score),
            elapsed_seconds: elapsed_seconds(s.started_at, s.updated_at),
            average_batch_seconds: (self.batches_timed > 0)
                .then(|| self.batch_seconds_total / self.batches_timed as f64),
            peak_memory_bytes: self.peak_memory_bytes,
        }
    }
}

fn elapsed_seconds(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    (to - from).num_milliseconds().max(0) as f64 / 1000.0
}

// ==========================================
// ProgressTracker
// ==========================================
pub struct ProgressTracker {
    live: RwLock<HashMap<Uuid, TrackedProgress>>,
    archive: RwLock<HashMap<Uuid, (DetailedProgress, DateTime<Utc>)>>,
    ttl: Duration,
    archive_ttl: Duration,
    history_len: usize,
    milestone_rows: u64,
}

impl ProgressTracker {
    pub fn new(config: &ImportConfig) -> Self {
        Self {
            live: RwLock::new(HashMap::new()),
            archive: RwLock::new(HashMap::new()),
            ttl: Duration::seconds(config.progress_ttl_secs as i64),
            archive_ttl: Duration::seconds(config.progress_archive_ttl_secs as i64),
            history_len: config.progress_history_len.max(1),
            milestone_rows: config.progress_milestone_rows.max(1),
        }
    }

    fn live_read(&self) -> RwLockReadGuard<'_, HashMap<Uuid, TrackedProgress>> {
        self.live.read().unwrap_or_else(|e| e.into_inner())
    }

    fn live_write(&self) -> RwLockWriteGuard<'_, HashMap<Uuid, TrackedProgress>> {
        self.live.write().unwrap_or_else(|e| e.into_inner())
    }

    fn archive_write(
        &self,
    ) -> RwLockWriteGuard<'_, HashMap<Uuid, (DetailedProgress, DateTime<Utc>)>> {
        self.archive.write().unwrap_or_else(|e| e.into_inner())
    }

    /// 以任务当前状态初始化快照（覆盖同一任务的旧快照），顺带清理过期条目
    pub fn init(&self, job: &ImportJob) -> ProgressSnapshot {
        let purged = self.purge_expired();
        if purged > 0 {
            debug!(purged, "过期进度快照已清理");
        }
        let tracked = self.fresh(job);
        let out = tracked.snapshot.clone();
        self.live_write().insert(job.job_id, tracked);
        debug!(job_id = %job.job_id, "进度快照已初始化");
        out
    }

    fn fresh(&self, job: &ImportJob) -> TrackedProgress {
        let now = Utc::now();
        let mut snapshot = ProgressSnapshot::new(job.job_id, job.counters.total);
        snapshot.phase = ProgressPhase::from(job.status);
        snapshot.processed = job.counters.processed;
        snapshot.successful = job.counters.successful;
        snapshot.failed = job.counters.failed;
        snapshot.skipped = job.counters.skipped;
        snapshot.started_at = job.started_at.unwrap_or(now);
        snapshot.updated_at = now;

        let mut tracked = TrackedProgress {
            snapshot,
            expires_at: now + self.ttl,
            last_point_processed: 0,
            last_batch_at: now,
            batch_seconds_total: 0.0,
            batches_timed: 0,
            peak_memory_bytes: 0,
        };
        self.recompute(&mut tracked, true);
        tracked
    }

    /// 局部字段更新；未初始化的任务返回 None
    pub fn update(&self, job_id: &Uuid, update: ProgressUpdate) -> Option<ProgressSnapshot> {
        let mut live = self.live_write();
        let tracked = live.get_mut(job_id)?;
        let s = &mut tracked.snapshot;
        let phase_changed = update.phase.map(|p| p != s.phase).unwrap_or(false);

        if let Some(phase) = update.phase {
            s.phase = phase;
        }
        if let Some(total) = update.total {
            s.total = total;
        }
        // 计数只增不减
        if let Some(v) = update.processed {
            s.processed = s.processed.max(v);
        }
        if let Some(v) = update.successful {
            s.successful = s.successful.max(v);
        }
        if let Some(v) = update.failed {
            s.failed = s.failed.max(v);
        }
        if let Some(v) = update.skipped {
            s.skipped = s.skipped.max(v);
        }
        if update.current_batch.is_some() {
            s.current_batch = update.current_batch;
        }
        if let Some(mem) = update.memory_usage_bytes {
            s.memory_usage_bytes = mem;
            tracked.peak_memory_bytes = tracked.peak_memory_bytes.max(mem);
        }
        if update.message.is_some() {
            s.message = update.message;
        }
        self.recompute(tracked, phase_changed);
        Some(tracked.snapshot.clone())
    }

    /// 折叠一个批次的增量
    pub fn update_batch(&self, job_id: &Uuid, batch: &BatchProgress) -> Option<ProgressSnapshot> {
        let mut live = self.live_write();
        let tracked = live.get_mut(job_id)?;
        let now = Utc::now();
        tracked.batch_seconds_total += elapsed_seconds(tracked.last_batch_at, now);
        tracked.batches_timed += 1;
        tracked.last_batch_at = now;
        tracked.peak_memory_bytes = tracked.peak_memory_bytes.max(batch.memory_usage_bytes);

        let s = &mut tracked.snapshot;
        s.processed += batch.processed;
        s.successful += batch.successful;
        s.failed += batch.failed;
        s.skipped += batch.skipped;
        if batch.batch_failed {
            s.batches_failed += 1;
        } else {
            s.batches_completed += 1;
        }
        s.current_batch = Some(batch.batch_index);
        s.memory_usage_bytes = batch.memory_usage_bytes;
        self.recompute(tracked, true);
        Some(tracked.snapshot.clone())
    }

    pub fn mark_completed(&self, job: &ImportJob) -> Option<ProgressSnapshot> {
        self.finish(job, ProgressPhase::Completed, None)
    }

    pub fn mark_failed(&self, job: &ImportJob, error: &str) -> Option<ProgressSnapshot> {
        self.finish(job, ProgressPhase::Failed, Some(error.to_string()))
    }

    pub fn mark_cancelled(&self, job: &ImportJob) -> Option<ProgressSnapshot> {
        self.finish(job, ProgressPhase::Cancelled, None)
    }

    /// 终态：以任务记录为准对齐计数，活动快照移入归档
    ///
    /// 活动快照已被清理时按任务记录重建
    fn finish(
        &self,
        job: &ImportJob,
        phase: ProgressPhase,
        error: Option<String>,
    ) -> Option<ProgressSnapshot> {
        let mut tracked = self
            .live_write()
            .remove(&job.job_id)
            .unwrap_or_else(|| self.fresh(job));
        let s = &mut tracked.snapshot;
        s.phase = phase;
        s.total = job.counters.total;
        s.processed = job.counters.processed;
        s.successful = job.counters.successful;
        s.failed = job.counters.failed;
        s.skipped = job.counters.skipped;
        s.batches_completed = job.import_results.batches_completed;
        s.batches_failed = job.import_results.batches_failed;
        s.error = error;
        self.recompute(&mut tracked, true);
        if phase == ProgressPhase::Completed {
            tracked.snapshot.progress_percentage = 100.0;
        }
        tracked.snapshot.eta = None;

        let detailed = DetailedProgress {
            snapshot: tracked.snapshot.clone(),
            analytics: tracked.analytics(),
        };
        let snapshot = detailed.snapshot.clone();
        self.archive_write()
            .insert(job.job_id, (detailed, Utc::now() + self.archive_ttl));
        debug!(job_id = %job.job_id, phase = %phase, "进度快照已归档");
        Some(snapshot)
    }

    /// 活动快照优先，过期后回落到归档
    pub fn get_progress(&self, job_id: &Uuid) -> Option<ProgressSnapshot> {
        self.get_detailed_progress(job_id).map(|d| d.snapshot)
    }

    pub fn get_detailed_progress(&self, job_id: &Uuid) -> Option<DetailedProgress> {
        let now = Utc::now();
        if let Some(tracked) = self.live_read().get(job_id) {
            if tracked.expires_at > now {
                return Some(DetailedProgress {
                    snapshot: tracked.snapshot.clone(),
                    analytics: tracked.analytics(),
                });
            }
        }
        let archive = self.archive.read().unwrap_or_else(|e| e.into_inner());
        archive
            .get(job_id)
            .filter(|(_, expires_at)| *expires_at > now)
            .map(|(d, _)| d.clone())
    }

    pub fn calculate_eta(&self, job_id: &Uuid) -> Option<DateTime<Utc>> {
        self.get_progress(job_id).and_then(|s| s.eta)
    }

    /// 清理过期快照，返回清理条数
    pub fn purge_expired(&self) -> usize {
        let now = Utc::now();
        let mut removed = 0;
        {
            let mut live = self.live_write();
            let before = live.len();
            live.retain(|_, t| t.expires_at > now);
            removed += before - live.len();
        }
        let mut archive = self.archive_write();
        let before = archive.len();
        archive.retain(|_, (_, expires_at)| *expires_at > now);
        removed + (before - archive.len())
    }

    // ==========================================
    // 派生指标
    // ==========================================
    fn recompute(&self, tracked: &mut TrackedProgress, force_point: bool) {
        let now = Utc::now();
        let s = &mut tracked.snapshot;
        s.updated_at = now;
        s.progress_percentage = if s.total > 0 {
            (s.processed as f64 / s.total as f64 * 100.0).min(100.0)
        } else {
            0.0
        };
        let elapsed = elapsed_seconds(s.started_at, now);
        s.processing_speed = if elapsed > 0.0 {
            s.processed as f64 / elapsed
        } else {
            0.0
        };
        s.eta = if s.processing_speed > 0.0 && s.total > s.processed && !s.is_finished() {
            let remaining = (s.total - s.processed) as f64 / s.processing_speed;
            Some(now + Duration::milliseconds((remaining * 1000.0) as i64))
        } else {
            None
        };

        let milestone = s.processed >= tracked.last_point_processed + self.milestone_rows;
        if force_point || milestone {
            s.history.push(ProgressPoint {
                at: now,
                phase: s.phase,
                processed: s.processed,
                successful: s.successful,
                failed: s.failed,
                processing_speed: s.processing_speed,
                memory_usage_bytes: s.memory_usage_bytes,
            });
            if s.history.len() > self.history_len {
                let overflow = s.history.len() - self.history_len;
                s.history.drain(..overflow);
            }
            tracked.last_point_processed = s.processed;
        }
        tracked.expires_at = now + self.ttl;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{ImportStatus, ImportType};

    fn job(total: u64) -> ImportJob {
        let mut job = ImportJob::new("t", ImportType::Menu, None, "t.csv", 10, "text/csv");
        job.set_total(total);
        job
    }

    fn batch(index: usize, ok: u64, failed: u64) -> BatchProgress {
        BatchProgress {
            batch_index: index,
            processed: ok + failed,
            successful: ok,
            failed,
            skipped: 0,
            batch_failed: false,
            memory_usage_bytes: 1024 * (index as u64 + 1),
        }
    }

    #[test]
    fn test_batch_updates_accumulate() {
        let tracker = ProgressTracker::new(&ImportConfig::default());
        let job = job(200);
        tracker.init(&job);

        tracker.update_batch(&job.job_id, &batch(0, 90, 10));
        let s = tracker.update_batch(&job.job_id, &batch(1, 50, 0)).unwrap();
        assert_eq!(s.processed, 150);
        assert_eq!(s.batches_completed, 2);
        assert!((s.progress_percentage - 75.0).abs() < 1e-9);
        assert_eq!(s.current_batch, Some(1));

        let detailed = tracker.get_detailed_progress(&job.job_id).unwrap();
        assert_eq!(detailed.analytics.peak_memory_bytes, 2048);
        assert!(detailed.analytics.average_batch_seconds.is_some());
    }

    #[test]
    fn test_update_never_decreases_counters() {
        let tracker = ProgressTracker::new(&ImportConfig::default());
        let job = job(10);
        tracker.init(&job);
        tracker.update(
            &job.job_id,
            ProgressUpdate {
                processed: Some(5),
                ..Default::default()
            },
        );
        let s = tracker
            .update(
                &job.job_id,
                ProgressUpdate {
                    processed: Some(3),
                    ..ProgressUpdate::phase(ProgressPhase::Importing)
                },
            )
            .unwrap();
        assert_eq!(s.processed, 5);
        assert_eq!(s.phase, ProgressPhase::Importing);
    }

    #[test]
    fn test_history_is_capped() {
        let config = ImportConfig {
            progress_history_len: 3,
            ..Default::default()
        };
        let tracker = ProgressTracker::new(&config);
        let job = job(1000);
        tracker.init(&job);
        for i in 0..10 {
            tracker.update_batch(&job.job_id, &batch(i, 10, 0));
        }
        let s = tracker.get_progress(&job.job_id).unwrap();
        assert_eq!(s.history.len(), 3);
        assert_eq!(s.history.last().map(|p| p.processed), Some(100));
    }

    #[test]
    fn test_completed_is_archived_with_analytics() {
        let tracker = ProgressTracker::new(&ImportConfig::default());
        let mut job = job(100);
        tracker.init(&job);
        job.set_status(ImportStatus::Importing);
        job.apply_delta(&crate::domain::import_job::CounterDelta {
            processed: 100,
            successful: 90,
            failed: 10,
            skipped: 0,
        });
        job.finish(ImportStatus::Completed);

        let s = tracker.mark_completed(&job).unwrap();
        assert_eq!(s.phase, ProgressPhase::Completed);
        assert_eq!(s.progress_percentage, 100.0);
        assert!(s.eta.is_none());

        let detailed = tracker.get_detailed_progress(&job.job_id).unwrap();
        assert!((detailed.analytics.efficiency - 90.0).abs() < 1e-9);
        assert!((detailed.analytics.quality_score - 70.0).abs() < 1e-9);
        assert_eq!(detailed.analytics.performance_rating, PerformanceRating::Average);
    }

    #[test]
    fn test_expired_live_falls_back_to_archive() {
        let config = ImportConfig {
            progress_ttl_secs: 0,
            ..Default::default()
        };
        let tracker = ProgressTracker::new(&config);
        let job = job(10);
        tracker.init(&job);
        // TTL 为 0：活动快照立即过期，且尚无归档
        assert!(tracker.get_progress(&job.job_id).is_none());

        tracker.mark_failed(&job, "boom");
        let s = tracker.get_progress(&job.job_id).unwrap();
        assert_eq!(s.phase, ProgressPhase::Failed);
        assert_eq!(s.error.as_deref(), Some("boom"));
        // 活动快照随终态移出，归档仍有效
        assert!(tracker.live_read().is_empty());
        assert_eq!(tracker.purge_expired(), 0);
    }

    #[test]
    fn test_finished_and_expired_entries_are_evicted() {
        let config = ImportConfig {
            progress_ttl_secs: 0,
            progress_archive_ttl_secs: 0,
            ..Default::default()
        };
        let tracker = ProgressTracker::new(&config);
        let stale_running = job(10);
        let finished = job(5);
        tracker.init(&stale_running);
        tracker.init(&finished);
        tracker.mark_completed(&finished);
        assert_eq!(tracker.archive.read().unwrap().len(), 1);

        // 下一个任务初始化时清掉过期的活动快照与归档
        let next = job(3);
        tracker.init(&next);
        let live = tracker.live_read();
        assert_eq!(live.len(), 1);
        assert!(live.contains_key(&next.job_id));
        drop(live);
        assert!(tracker.archive.read().unwrap().is_empty());
        assert!(tracker.get_progress(&finished.job_id).is_none());
    }

    #[test]
    fn test_finish_without_live_entry_still_archives() {
        let tracker = ProgressTracker::new(&ImportConfig::default());
        let job = job(4);
        let s = tracker.mark_cancelled(&job).unwrap();
        assert_eq!(s.phase, ProgressPhase::Cancelled);
        assert!(tracker.live_read().is_empty());
        assert_eq!(
            tracker.get_progress(&job.job_id).map(|s| s.phase),
            Some(ProgressPhase::Cancelled)
        );
    }

    #[test]
    fn test_unknown_job() {
        let tracker = ProgressTracker::new(&ImportConfig::default());
        assert!(tracker.get_progress(&Uuid::new_v4()).is_none());
        assert!(tracker.calculate_eta(&Uuid::new_v4()).is_none());
    }
}
