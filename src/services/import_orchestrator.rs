// ==========================================
// 商品目录批量导入系统 - 导入编排
// ==========================================
// 职责: 任务入队 / 后台派发 / 取消 / 查询 / 清理
// 并发模型:
// - 单次导入在 spawn_blocking 线程内严格顺序执行
// - 并发只存在于不同导入任务之间
// - 取消为协作式: 写入 cancelled 状态，分块检查点读到后停止
// ==========================================

use crate::domain::product::{ImportRequest, ImportResult};
use crate::domain::progress::ProgressRecord;
use crate::domain::types::ImportStatus;
use crate::importer::error::ImportOutcome;
use crate::services::pipeline::ImportPipeline;
use crate::services::progress_tracker::ProgressTracker;
use dashmap::DashMap;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

pub struct ImportOrchestrator {
    pipeline: Arc<ImportPipeline>,
    tracker: Arc<ProgressTracker>,
    running: DashMap<String, JoinHandle<ImportStatus>>,
}

impl ImportOrchestrator {
    pub fn new(pipeline: Arc<ImportPipeline>, tracker: Arc<ProgressTracker>) -> Self {
        Self {
            pipeline,
            tracker,
            running: DashMap::new(),
        }
    }

    pub fn pipeline(&self) -> &ImportPipeline {
        &self.pipeline
    }

    /// 创建 pending 任务（尚未执行，可在派发前取消）
    pub fn enqueue(&self) -> ImportOutcome<String> {
        Ok(self.tracker.create_pending()?.id)
    }

    /// 派发到后台执行（需在 tokio 运行时内调用）
    pub fn dispatch(&self, import_id: &str, request: ImportRequest) {
        let pipeline = Arc::clone(&self.pipeline);
        let tracker = Arc::clone(&self.tracker);
        let id = import_id.to_string();

        let handle = tokio::spawn(async move {
            let task_tracker = Arc::clone(&tracker);
            let task_id = id.clone();
            let joined = tokio::task::spawn_blocking(move || {
                execute_task(&pipeline, &task_tracker, &task_id, &request)
            })
            .await;

            match joined {
                Ok(status) => status,
                Err(e) => {
                    error!(import_id = %id, error = %e, "导入执行线程异常退出");
                    tracker
                        .fail(&id, &format!("执行线程异常退出: {}", e), 0.0)
                        .unwrap_or(ImportStatus::Failed)
                }
            }
        });

        self.prune_finished();
        info!(import_id = %import_id, "导入任务已派发");
        self.running.insert(import_id.to_string(), handle);
    }

    /// enqueue + dispatch
    pub fn submit(&self, request: ImportRequest) -> ImportOutcome<String> {
        let id = self.enqueue()?;
        self.dispatch(&id, request);
        Ok(id)
    }

    /// 等待后台任务结束，返回最终状态
    ///
    /// 句柄已被回收（已等待过或已清理）时回退到持久化的终态
    ///
    /// # 返回
    /// - None: 任务未派发且无终态记录
    pub async fn wait(&self, import_id: &str) -> Option<ImportStatus> {
        let Some((_, handle)) = self.running.remove(import_id) else {
            return self
                .tracker
                .status(import_id)
                .ok()
                .flatten()
                .map(|r| r.status)
                .filter(|s| s.is_terminal());
        };
        match handle.await {
            Ok(status) => Some(status),
            Err(e) => {
                error!(import_id = %import_id, error = %e, "等待导入任务失败");
                Some(ImportStatus::Failed)
            }
        }
    }

    /// 并发执行多个独立导入并等待全部结束
    pub async fn run_batch(&self, requests: Vec<ImportRequest>) -> ImportOutcome<Vec<(String, ImportStatus)>> {
        let mut ids = Vec::with_capacity(requests.len());
        for request in requests {
            ids.push(self.submit(request)?);
        }
        info!(count = ids.len(), "批量导入已派发");

        let statuses = join_all(ids.iter().map(|id| self.wait(id))).await;
        Ok(ids
            .into_iter()
            .zip(statuses)
            .map(|(id, status)| (id, status.unwrap_or(ImportStatus::Failed)))
            .collect())
    }

    pub fn cancel(&self, import_id: &str) -> ImportOutcome<bool> {
        Ok(self.tracker.cancel(import_id)?)
    }

    pub fn status(&self, import_id: &str) -> ImportOutcome<Option<ProgressRecord>> {
        self.prune_finished();
        Ok(self.tracker.status(import_id)?)
    }

    pub fn result(&self, import_id: &str) -> ImportOutcome<Option<ImportResult>> {
        Ok(self.tracker.result(import_id)?)
    }

    pub fn cleanup(&self) -> ImportOutcome<(usize, usize)> {
        self.prune_finished();
        Ok(self.tracker.cleanup()?)
    }

    /// 尚未回收的后台任务句柄数
    pub fn running_count(&self) -> usize {
        self.running.len()
    }

    /// 回收已结束任务的句柄（终态已由执行单元写入进度记录）
    fn prune_finished(&self) -> usize {
        let before = self.running.len();
        self.running.retain(|_, handle| !handle.is_finished());
        let pruned = before.saturating_sub(self.running.len());
        if pruned > 0 {
            debug!(pruned, "回收已结束的导入任务句柄");
        }
        pruned
    }
}

/// 后台执行单元（blocking 线程内）
fn execute_task(
    pipeline: &ImportPipeline,
    tracker: &ProgressTracker,
    import_id: &str,
    request: &ImportRequest,
) -> ImportStatus {
    match tracker.mark_processing(import_id) {
        Ok(true) => {}
        Ok(false) => {
            info!(import_id = %import_id, "任务已不在等待状态，跳过执行");
            return tracker
                .status(import_id)
                .ok()
                .flatten()
                .map(|r| r.status)
                .unwrap_or(ImportStatus::Cancelled);
        }
        Err(e) => {
            error!(import_id = %import_id, error = %e, "任务状态更新失败");
            return ImportStatus::Failed;
        }
    }

    let started = Instant::now();
    let progress = |percent: u8, message: &str| {
        if let Err(e) = tracker.update(import_id, percent, message, started.elapsed().as_secs_f64()) {
            warn!(import_id = %import_id, error = %e, "进度写入失败");
        }
    };
    let cancel = || tracker.is_cancel_requested(import_id);

    let outcome = pipeline.execute(import_id, request, &progress, &cancel);
    let elapsed = started.elapsed().as_secs_f64();

    let finished = match outcome {
        Ok(outcome) => tracker.complete(import_id, &outcome.result, elapsed),
        Err(e) if e.is_cancelled() => {
            info!(import_id = %import_id, elapsed, "导入已取消");
            return ImportStatus::Cancelled;
        }
        Err(e) => {
            error!(import_id = %import_id, error = %e, elapsed, "导入失败");
            tracker.fail(import_id, &e.to_string(), elapsed)
        }
    };

    finished.unwrap_or_else(|e| {
        error!(import_id = %import_id, error = %e, "终态写入失败");
        ImportStatus::Failed
    })
}
