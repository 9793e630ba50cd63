// ==========================================
// POS 导入核心 - 任务控制（暂停 / 恢复 / 取消）
// ==========================================
// 机制: 每个运行中的任务一个 CancellationToken + watch 暂停标志
// 检查点: 批处理在每个块边界调用 JobSignal::checkpoint
// 语义: 协作式，不抢占；进行中的批次会先执行完
// ==========================================

use crate::importer::error::{ImportError, ImportResult};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

struct JobHandle {
    cancel: CancellationToken,
    pause: watch::Sender<bool>,
}

// ==========================================
// JobControl - 运行中任务登记表
// ==========================================
#[derive(Default)]
pub struct JobControl {
    jobs: Mutex<HashMap<Uuid, Arc<JobHandle>>>,
}

impl JobControl {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, Arc<JobHandle>>> {
        // 登记表只做插入 / 删除，锁中毒后数据仍可用
        self.jobs.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// 登记任务并返回其信号；重复登记会替换旧句柄
    pub fn register(&self, job_id: Uuid) -> JobSignal {
        let (pause_tx, pause_rx) = watch::channel(false);
        let cancel = CancellationToken::new();
        let handle = Arc::new(JobHandle {
            cancel: cancel.clone(),
            pause: pause_tx,
        });
        if let Some(old) = self.lock().insert(job_id, handle) {
            old.cancel.cancel();
        }
        debug!(job_id = %job_id, "任务已登记");
        JobSignal {
            job_id,
            cancel,
            pause: pause_rx,
        }
    }

    pub fn release(&self, job_id: &Uuid) {
        self.lock().remove(job_id);
    }

    pub fn is_running(&self, job_id: &Uuid) -> bool {
        self.lock().contains_key(job_id)
    }

    fn handle(&self, job_id: &Uuid) -> Option<Arc<JobHandle>> {
        self.lock().get(job_id).cloned()
    }

    /// 未登记或已取消的任务返回 false
    pub fn pause(&self, job_id: &Uuid) -> bool {
        match self.handle(job_id) {
            Some(h) if !h.cancel.is_cancelled() => {
                h.pause.send_replace(true);
                info!(job_id = %job_id, "暂停请求已登记");
                true
            }
            _ => false,
        }
    }

    pub fn resume(&self, job_id: &Uuid) -> bool {
        match self.handle(job_id) {
            Some(h) if !h.cancel.is_cancelled() => {
                h.pause.send_replace(false);
                info!(job_id = %job_id, "恢复请求已登记");
                true
            }
            _ => false,
        }
    }

    pub fn cancel(&self, job_id: &Uuid) -> bool {
        match self.handle(job_id) {
            Some(h) => {
                h.cancel.cancel();
                info!(job_id = %job_id, "取消请求已登记");
                true
            }
            None => false,
        }
    }
}

// ==========================================
// JobSignal - 批处理侧持有的只读信号
// ==========================================
pub struct JobSignal {
    job_id: Uuid,
    cancel: CancellationToken,
    pause: watch::Receiver<bool>,
}

impl JobSignal {
    /// 不受登记表控制的信号（直接调用批处理器时使用）
    pub fn detached(job_id: Uuid) -> Self {
        let (_tx, pause) = watch::channel(false);
        Self {
            job_id,
            cancel: CancellationToken::new(),
            pause,
        }
    }

    pub fn job_id(&self) -> Uuid {
        self.job_id
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn is_paused(&self) -> bool {
        *self.pause.borrow()
    }

    pub fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// 块边界检查：取消 → Err(Cancelled)；暂停 → 等待恢复或取消
    pub async fn checkpoint(&mut self) -> ImportResult<()> {
        loop {
            if self.cancel.is_cancelled() {
                return Err(ImportError::Cancelled(self.job_id.to_string()));
            }
            if !*self.pause.borrow_and_update() {
                return Ok(());
            }
            tokio::select! {
                _ = self.cancel.cancelled() => {}
                changed = self.pause.changed() => {
                    // 发送端已释放: 任务已注销，按恢复处理
                    if changed.is_err() {
                        return Ok(());
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_unknown_job_controls_return_false() {
        let control = JobControl::new();
        let id = Uuid::new_v4();
        assert!(!control.pause(&id));
        assert!(!control.resume(&id));
        assert!(!control.cancel(&id));
    }

    #[tokio::test]
    async fn test_checkpoint_blocks_while_paused() {
        let control = Arc::new(JobControl::new());
        let id = Uuid::new_v4();
        let mut signal = control.register(id);

        assert!(signal.checkpoint().await.is_ok());
        assert!(control.pause(&id));
        assert!(signal.is_paused());

        let waiter = tokio::spawn(async move {
            signal.checkpoint().await.is_ok()
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        assert!(control.resume(&id));
        assert!(tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap());
    }

    #[tokio::test]
    async fn test_cancel_wakes_paused_job() {
        let control = Arc::new(JobControl::new());
        let id = Uuid::new_v4();
        let mut signal = control.register(id);
        control.pause(&id);

        let waiter = tokio::spawn(async move { signal.checkpoint().await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(control.cancel(&id));

        let result = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(ImportError::Cancelled(_))));
        // 已取消的任务不再接受暂停
        assert!(!control.pause(&id));
    }

    #[tokio::test]
    async fn test_release_unregisters() {
        let control = JobControl::new();
        let id = Uuid::new_v4();
        let _signal = control.register(id);
        assert!(control.is_running(&id));
        control.release(&id);
        assert!(!control.is_running(&id));
    }
}
