// ==========================================
// 商品目录批量导入系统 - 导入性能统计
// ==========================================
// 职责: 落库阶段 SQL 语句计数 / 慢 SQL 告警 / 分块吞吐汇总
// 开关:
// - Debug 默认开启；Release 默认关闭
// - CATALOG_IMPORT_PERF_SQL=1 强制开启
// - CATALOG_IMPORT_SLOW_SQL_MS=50 慢 SQL 阈值（毫秒）
// ==========================================

use crate::domain::progress::ChunkStat;
use rusqlite::Connection;
use std::cell::Cell;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

static SQL_TRACE_ON: AtomicBool = AtomicBool::new(false);
static SLOW_SQL_MS: AtomicU64 = AtomicU64::new(0);

/// 线程局部计数（落库在单个 blocking 线程内完成）
#[derive(Clone, Copy, Default)]
struct SqlCounters {
    /// 嵌套的 PerfGuard 数；为 0 时不计数
    scopes: u32,
    statements: u64,
    slow: u64,
}

thread_local! {
    static COUNTERS: Cell<SqlCounters> = Cell::new(SqlCounters::default());
}

fn counters() -> SqlCounters {
    COUNTERS.with(Cell::get)
}

fn update_counters(f: impl FnOnce(&mut SqlCounters)) {
    COUNTERS.with(|c| {
        let mut v = c.get();
        f(&mut v);
        c.set(v);
    });
}

fn env_flag(name: &str) -> Option<bool> {
    std::env::var(name).ok().map(|v| {
        matches!(
            v.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        )
    })
}

/// 单行化并按字符截断 SQL（日志用）
fn sql_excerpt(sql: &str, max_chars: usize) -> String {
    let flat = sql.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max_chars {
        return flat;
    }
    let head: String = flat.chars().take(max_chars).collect();
    format!("{}…", head)
}

/// 为连接安装语句 trace/profile 回调
pub fn install_sqlite_tracing(conn: &mut Connection) {
    let enabled = env_flag("CATALOG_IMPORT_PERF_SQL").unwrap_or(cfg!(debug_assertions));
    SQL_TRACE_ON.store(enabled, Ordering::Relaxed);

    if !enabled {
        conn.trace(None);
        conn.profile(None);
        return;
    }

    let slow_ms = std::env::var("CATALOG_IMPORT_SLOW_SQL_MS")
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(if cfg!(debug_assertions) { 50 } else { 200 });
    SLOW_SQL_MS.store(slow_ms, Ordering::Relaxed);

    conn.trace(Some(on_statement));
    conn.profile(Some(on_statement_done));
}

fn on_statement(_sql: &str) {
    if SQL_TRACE_ON.load(Ordering::Relaxed) && counters().scopes > 0 {
        update_counters(|c| c.statements = c.statements.saturating_add(1));
    }
}

fn on_statement_done(sql: &str, duration: Duration) {
    if !SQL_TRACE_ON.load(Ordering::Relaxed) {
        return;
    }
    let threshold = SLOW_SQL_MS.load(Ordering::Relaxed);
    let ms = duration.as_millis() as u64;
    if threshold == 0 || ms < threshold {
        return;
    }

    tracing::warn!(
        target: "slow_sql",
        duration_ms = ms,
        sql = %sql_excerpt(sql, 420),
        "慢 SQL"
    );
    if counters().scopes > 0 {
        update_counters(|c| c.slow = c.slow.saturating_add(1));
    }
}

// ==========================================
// ChunkThroughput - 分块吞吐汇总
// ==========================================
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChunkThroughput {
    pub chunks: usize,
    pub failed_chunks: usize,
    pub rows: usize,
    pub total_ms: u128,
    /// (分块序号, 耗时 ms)
    pub slowest: Option<(usize, u128)>,
    /// 单块最大内存增长（字节）
    pub peak_memory_delta: i64,
}

impl ChunkThroughput {
    pub fn from_stats(stats: &[ChunkStat]) -> Self {
        let mut summary = Self::default();
        for stat in stats {
            summary.chunks += 1;
            summary.rows += stat.rows;
            summary.total_ms += stat.duration_ms;
            summary.peak_memory_delta = summary.peak_memory_delta.max(stat.memory_delta);
            if !stat.succeeded {
                summary.failed_chunks += 1;
            }
            if summary.slowest.map_or(true, |(_, ms)| stat.duration_ms > ms) {
                summary.slowest = Some((stat.chunk_index, stat.duration_ms));
            }
        }
        summary
    }

    /// 分块内累计耗时下的行吞吐
    pub fn rows_per_sec(&self) -> f64 {
        if self.total_ms == 0 {
            return 0.0;
        }
        self.rows as f64 * 1000.0 / self.total_ms as f64
    }

    pub fn avg_chunk_ms(&self) -> f64 {
        if self.chunks == 0 {
            return 0.0;
        }
        self.total_ms as f64 / self.chunks as f64
    }
}

/// 落库阶段性能 Guard：Drop 时输出耗时 / SQL 语句数 / 慢 SQL 数 / 分块吞吐
///
/// ```ignore
/// let mut perf = PerfGuard::new("catalog_import");
/// let report = creator.create(...)?;
/// perf.record_chunks(&report.chunk_stats);
/// ```
///
/// 计数为线程局部，Guard 须与落库在同一线程创建
pub struct PerfGuard {
    op: &'static str,
    start: Instant,
    baseline: SqlCounters,
    chunks: ChunkThroughput,
}

impl PerfGuard {
    pub fn new(op: &'static str) -> Self {
        update_counters(|c| c.scopes = c.scopes.saturating_add(1));
        Self {
            op,
            start: Instant::now(),
            baseline: counters(),
            chunks: ChunkThroughput::default(),
        }
    }

    pub fn record_chunks(&mut self, stats: &[ChunkStat]) {
        self.chunks = ChunkThroughput::from_stats(stats);
    }

    pub fn throughput(&self) -> &ChunkThroughput {
        &self.chunks
    }

    /// Guard 作用域内累计的 SQL 语句数
    pub fn sql_count(&self) -> u64 {
        counters().statements.saturating_sub(self.baseline.statements)
    }
}

impl Drop for PerfGuard {
    fn drop(&mut self) {
        let now = counters();
        let c = &self.chunks;
        let (slowest_chunk, slowest_ms) = c.slowest.unwrap_or((0, 0));

        tracing::info!(
            target: "perf",
            op = self.op,
            elapsed_ms = self.start.elapsed().as_millis() as u64,
            chunks = c.chunks,
            failed_chunks = c.failed_chunks,
            rows = c.rows,
            rows_per_sec = c.rows_per_sec().round() as u64,
            avg_chunk_ms = c.avg_chunk_ms().round() as u64,
            slowest_chunk,
            slowest_ms = slowest_ms as u64,
            peak_memory_delta = c.peak_memory_delta,
            sql_count = now.statements.saturating_sub(self.baseline.statements),
            slow_sql_count = now.slow.saturating_sub(self.baseline.slow),
            "落库阶段完成"
        );

        update_counters(|c| c.scopes = c.scopes.saturating_sub(1));
    }
}
