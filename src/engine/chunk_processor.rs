// ==========================================
// 商品目录批量导入系统 - 分块处理引擎
// ==========================================
// 职责: 按内存预算切块，顺序执行处理函数，上报进度
// 规则:
// 1. 默认块大小 = (上限 × headroom − 当前占用) × 预算比例 ÷ 单行估算，夹取 [min, max]
// 2. 每块开始: 取消检查点 → 回收 → 记录占用
// 3. 每块结束: 统计 / 检查点 / 进度回调 / 内存压力检查
// 4. 压力 > 阈值: 额外回收 + 清空恢复检查点 + 剩余块大小 × 收缩系数（下限 min）
// 5. 处理函数出错: 记录失败统计后原样上抛，整次运行终止
// 红线: 严格顺序，第 N 块结束前不开始第 N+1 块
// ==========================================

use crate::config::ImportConfig;
use crate::domain::progress::{ChunkStat, ProgressEvent};
use crate::engine::memory::MemoryProbe;
use crate::importer::error::{ImportError, ImportOutcome};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// 恢复检查点（最近提交的分块）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checkpoint {
    pub chunk_index: usize,
    pub processed_rows: usize,
}

/// 一次分块运行的产物
#[derive(Debug)]
pub struct ChunkRun<R> {
    pub results: Vec<R>,
    pub stats: Vec<ChunkStat>,
    /// 运行结束时的块大小（压力收缩后可能变小）
    pub final_chunk_size: usize,
}

struct RunState<R> {
    chunk_size: usize,
    chunk_index: usize,
    processed: usize,
    results: Vec<R>,
    stats: Vec<ChunkStat>,
}

pub struct ChunkProcessor {
    config: ImportConfig,
    probe: Arc<dyn MemoryProbe>,
    chunk_size_override: Option<usize>,
    checkpoints: Mutex<Vec<Checkpoint>>,
}

impl ChunkProcessor {
    pub fn new(config: &ImportConfig, probe: Arc<dyn MemoryProbe>) -> Self {
        Self {
            config: config.clone(),
            probe,
            chunk_size_override: None,
            checkpoints: Mutex::new(Vec::new()),
        }
    }

    /// 固定初始块大小（不经内存预算计算）
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size_override = Some(chunk_size.max(1));
        self
    }

    /// 按当前内存余量计算默认块大小
    pub fn default_chunk_size(&self) -> usize {
        let limit = self.probe.limit() as f64;
        let usage = self.probe.current_usage() as f64;
        let headroom = (limit * self.config.headroom_ratio - usage).max(0.0);
        let per_row = self.config.bytes_per_row.max(1) as f64;
        let rows = (headroom * self.config.chunk_budget_ratio / per_row) as usize;
        self.config.clamp_chunk_size(rows)
    }

    /// 最近一次提交的检查点（压力回收后为空）
    pub fn last_checkpoint(&self) -> Option<Checkpoint> {
        self.checkpoints.lock().ok().and_then(|c| c.last().copied())
    }

    fn initial_state<R>(&self) -> RunState<R> {
        let chunk_size = self
            .chunk_size_override
            .unwrap_or_else(|| self.default_chunk_size());
        RunState {
            chunk_size,
            chunk_index: 0,
            processed: 0,
            results: Vec::new(),
            stats: Vec::new(),
        }
    }

    /// 对内存中的行序列分块处理
    ///
    /// # 参数
    /// - handler: (本块行, 块序号) → 块结果
    /// - on_progress: 每块完成后回调
    /// - cancel: 每块开始前检查，返回 true 时以 Cancelled 终止
    pub fn process_in_chunks<T, R, H>(
        &self,
        rows: &[T],
        mut handler: H,
        mut on_progress: Option<&mut dyn FnMut(ProgressEvent)>,
        cancel: &dyn Fn() -> bool,
    ) -> ImportOutcome<ChunkRun<R>>
    where
        H: FnMut(&[T], usize) -> ImportOutcome<R>,
    {
        let total = rows.len();
        let mut state = self.initial_state();
        info!(total_rows = total, chunk_size = state.chunk_size, "开始分块处理");

        let mut offset = 0;
        while offset < total {
            let end = (offset + state.chunk_size).min(total);
            self.run_chunk(
                &rows[offset..end],
                &mut handler,
                &mut state,
                Some(total),
                &mut on_progress,
                cancel,
            )?;
            offset = end;
        }

        Ok(self.finish(state))
    }

    /// 流式变体: 前向游标，缓冲到块大小后处理
    pub fn process_stream<T, R, I, H>(
        &self,
        rows: I,
        total_hint: Option<usize>,
        mut handler: H,
        mut on_progress: Option<&mut dyn FnMut(ProgressEvent)>,
        cancel: &dyn Fn() -> bool,
    ) -> ImportOutcome<ChunkRun<R>>
    where
        I: IntoIterator<Item = ImportOutcome<T>>,
        H: FnMut(&[T], usize) -> ImportOutcome<R>,
    {
        let mut state = self.initial_state();
        let mut buffer: Vec<T> = Vec::with_capacity(state.chunk_size);
        info!(total_hint = ?total_hint, chunk_size = state.chunk_size, "开始流式分块处理");

        for item in rows {
            buffer.push(item?);
            if buffer.len() >= state.chunk_size {
                self.run_chunk(&buffer, &mut handler, &mut state, total_hint, &mut on_progress, cancel)?;
                buffer.clear();
            }
        }
        if !buffer.is_empty() {
            self.run_chunk(&buffer, &mut handler, &mut state, total_hint, &mut on_progress, cancel)?;
        }

        Ok(self.finish(state))
    }

    fn run_chunk<T, R, H>(
        &self,
        chunk: &[T],
        handler: &mut H,
        state: &mut RunState<R>,
        total: Option<usize>,
        on_progress: &mut Option<&mut dyn FnMut(ProgressEvent)>,
        cancel: &dyn Fn() -> bool,
    ) -> ImportOutcome<()>
    where
        H: FnMut(&[T], usize) -> ImportOutcome<R>,
    {
        let chunk_index = state.chunk_index;
        if cancel() {
            info!(chunk_index, processed = state.processed, "检测到取消请求，停止分块处理");
            return Err(ImportError::Cancelled);
        }

        self.probe.reclaim();
        let before = self.probe.current_usage();
        let started = Instant::now();
        let outcome = handler(chunk, chunk_index);
        let after = self.probe.current_usage();

        let stat = ChunkStat {
            chunk_index,
            rows: chunk.len(),
            duration_ms: started.elapsed().as_millis(),
            memory_delta: after as i64 - before as i64,
            succeeded: outcome.is_ok(),
        };

        let result = match outcome {
            Ok(r) => r,
            Err(e) => {
                if e.is_cancelled() {
                    info!(chunk_index, "分块处理中止（已取消）");
                } else {
                    error!(
                        chunk_index,
                        rows = stat.rows,
                        duration_ms = stat.duration_ms as u64,
                        error = %e,
                        "分块处理失败"
                    );
                }
                return Err(e);
            }
        };

        state.processed += chunk.len();
        debug!(
            chunk_index,
            rows = stat.rows,
            duration_ms = stat.duration_ms as u64,
            memory_delta = stat.memory_delta,
            "分块完成"
        );
        state.stats.push(stat);
        state.results.push(result);

        if let Ok(mut checkpoints) = self.checkpoints.lock() {
            checkpoints.push(Checkpoint {
                chunk_index,
                processed_rows: state.processed,
            });
        }

        if let Some(callback) = on_progress.as_mut() {
            let denominator = total.unwrap_or(state.processed).max(state.processed).max(1);
            callback(ProgressEvent {
                percent: state.processed as f64 * 100.0 / denominator as f64,
                processed_rows: state.processed,
                total_rows: total.unwrap_or(state.processed),
                chunk_index,
                memory_usage: after,
            });
        }

        self.relieve_pressure(after, state);
        state.chunk_index += 1;
        Ok(())
    }

    fn relieve_pressure<R>(&self, usage: u64, state: &mut RunState<R>) {
        let limit = self.probe.limit() as f64;
        if limit <= 0.0 || (usage as f64) <= limit * self.config.pressure_threshold {
            return;
        }

        self.probe.reclaim();
        if let Ok(mut checkpoints) = self.checkpoints.lock() {
            checkpoints.clear();
        }
        let shrunk = (state.chunk_size as f64 * self.config.shrink_factor) as usize;
        let next = shrunk.max(self.config.min_chunk_size);
        warn!(
            usage,
            limit = limit as u64,
            chunk_size = state.chunk_size,
            next_chunk_size = next,
            "内存压力过高，收缩剩余块大小"
        );
        state.chunk_size = next;
    }

    fn finish<R>(&self, state: RunState<R>) -> ChunkRun<R> {
        info!(
            chunks = state.stats.len(),
            processed = state.processed,
            final_chunk_size = state.chunk_size,
            "分块处理完成"
        );
        ChunkRun {
            results: state.results,
            stats: state.stats,
            final_chunk_size: state.chunk_size,
        }
    }
}
