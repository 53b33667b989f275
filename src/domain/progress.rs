// ==========================================
// 商品目录批量导入系统 - 导入进度领域模型
// ==========================================
// 职责: 进度记录（状态机实例）/ 分块进度事件 / 分块统计
// 存储: import_progress 表 + 进度缓存
// ==========================================

use crate::domain::types::ImportStatus;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ==========================================
// ProgressRecord - 导入任务进度记录
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressRecord {
    /// 不透明任务 ID（UUID）
    pub id: String,
    pub status: ImportStatus,
    /// 0-100
    pub progress_percent: u8,
    pub message: String,
    /// 已耗时（秒）
    pub elapsed_time: f64,
    /// 内联结果（小于内联上限时）
    pub result_data: Option<Value>,
    /// 外置结果引用（import_payload.payload_key）
    pub result_ref: Option<String>,
    pub error_message: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
    pub started_at: Option<NaiveDateTime>,
    pub finished_at: Option<NaiveDateTime>,
}

impl ProgressRecord {
    /// 新建 pending 记录
    pub fn pending(id: String, now: NaiveDateTime) -> Self {
        Self {
            id,
            status: ImportStatus::Pending,
            progress_percent: 0,
            message: "等待执行".to_string(),
            elapsed_time: 0.0,
            result_data: None,
            result_ref: None,
            error_message: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            finished_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

// ==========================================
// ProgressEvent - 分块完成后的进度事件
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    /// 0-100（本阶段内）
    pub percent: f64,
    pub processed_rows: usize,
    pub total_rows: usize,
    /// 从 0 开始
    pub chunk_index: usize,
    /// 当前内存占用（字节）
    pub memory_usage: u64,
}

// ==========================================
// ChunkStat - 单个分块统计
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkStat {
    pub chunk_index: usize,
    pub rows: usize,
    pub duration_ms: u128,
    /// 处理前后内存差（字节，可为负）
    pub memory_delta: i64,
    pub succeeded: bool,
}
