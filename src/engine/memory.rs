// ==========================================
// 商品目录批量导入系统 - 内存探针
// ==========================================
// 职责: 为分块引擎提供当前占用 / 上限 / 回收入口
// 实现:
// - ProcessMemoryProbe: 读取 /proc/self/status 的 VmRSS（非 Linux 返回 0）
// - SimulatedMemoryProbe: 测试用，读数可编排
// ==========================================

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;

pub trait MemoryProbe: Send + Sync {
    /// 当前进程占用（字节）
    fn current_usage(&self) -> u64;

    /// 上限（字节）
    fn limit(&self) -> u64;

    /// 回收提示（分块边界调用）
    fn reclaim(&self);
}

// ==========================================
// ProcessMemoryProbe
// ==========================================
#[derive(Debug)]
pub struct ProcessMemoryProbe {
    limit: u64,
}

impl ProcessMemoryProbe {
    pub fn new(limit: u64) -> Self {
        Self { limit }
    }
}

impl MemoryProbe for ProcessMemoryProbe {
    fn current_usage(&self) -> u64 {
        resident_set_bytes().unwrap_or(0)
    }

    fn limit(&self) -> u64 {
        self.limit
    }

    fn reclaim(&self) {
        // 分块工作集在块结束时已释放，这里只记录回收点
        tracing::trace!(usage = self.current_usage(), "内存回收检查点");
    }
}

fn resident_set_bytes() -> Option<u64> {
    #[cfg(target_os = "linux")]
    {
        if let Ok(status) = std::fs::read_to_string("/proc/self/status") {
            return parse_vm_rss(&status);
        }
    }

    None
}

/// 解析 /proc/self/status 的 `VmRSS:  12345 kB`（与页大小无关）
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn parse_vm_rss(status: &str) -> Option<u64> {
    let line = status.lines().find(|l| l.starts_with("VmRSS:"))?;
    let mut parts = line["VmRSS:".len()..].split_whitespace();
    let value = parts.next()?.parse::<u64>().ok()?;
    let multiplier = match parts.next().map(str::to_ascii_lowercase).as_deref() {
        Some("kb") | None => 1024,
        Some("mb") => 1024 * 1024,
        Some("gb") => 1024 * 1024 * 1024,
        Some("b") => 1,
        Some(_) => return None,
    };
    value.checked_mul(multiplier)
}

// ==========================================
// SimulatedMemoryProbe
// ==========================================
// 读数队列非空时依次弹出，否则返回固定值
#[derive(Debug)]
pub struct SimulatedMemoryProbe {
    limit: u64,
    usage: AtomicU64,
    schedule: Mutex<VecDeque<u64>>,
    reclaims: AtomicUsize,
}

impl SimulatedMemoryProbe {
    pub fn new(limit: u64, usage: u64) -> Self {
        Self {
            limit,
            usage: AtomicU64::new(usage),
            schedule: Mutex::new(VecDeque::new()),
            reclaims: AtomicUsize::new(0),
        }
    }

    pub fn with_schedule(self, readings: impl IntoIterator<Item = u64>) -> Self {
        if let Ok(mut queue) = self.schedule.lock() {
            queue.extend(readings);
        }
        self
    }

    pub fn set_usage(&self, usage: u64) {
        self.usage.store(usage, Ordering::SeqCst);
    }

    pub fn reclaim_count(&self) -> usize {
        self.reclaims.load(Ordering::SeqCst)
    }
}

impl MemoryProbe for SimulatedMemoryProbe {
    fn current_usage(&self) -> u64 {
        let next = self.schedule.lock().ok().and_then(|mut q| q.pop_front());
        match next {
            Some(reading) => {
                self.usage.store(reading, Ordering::SeqCst);
                reading
            }
            None => self.usage.load(Ordering::SeqCst),
        }
    }

    fn limit(&self) -> u64 {
        self.limit
    }

    fn reclaim(&self) {
        self.reclaims.fetch_add(1, Ordering::SeqCst);
    }
}
