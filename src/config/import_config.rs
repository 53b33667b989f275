// ==========================================
// 商品目录批量导入系统 - 导入运行参数
// ==========================================
// 职责: 管道运行所需的全部可调参数（纯数据，带默认值）
// 来源: ConfigManager 从 config_kv 读取，缺失键回退默认值
// ==========================================

use crate::domain::types::TargetEncoding;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportConfig {
    // ===== 分块与内存 =====
    /// 进程内存上限（字节）
    pub memory_limit_bytes: u64,
    /// 单行内存估算（字节）
    pub bytes_per_row: u64,
    pub min_chunk_size: usize,
    pub max_chunk_size: usize,
    /// 可用余量 = 上限 × headroom_ratio − 当前占用
    pub headroom_ratio: f64,
    /// 单块预算 = 余量 × chunk_budget_ratio
    pub chunk_budget_ratio: f64,
    /// 内存压力阈值（占上限比例）
    pub pressure_threshold: f64,
    /// 压力下剩余块大小收缩系数
    pub shrink_factor: f64,
    /// 每处理 N 个变体行上报一次进度
    pub progress_interval: usize,

    // ===== 工作表分析 =====
    pub max_worksheets: usize,
    /// 低于该行数时精确计数
    pub exact_count_threshold: usize,
    pub preview_rows: usize,
    pub max_import_rows: usize,

    // ===== 字段转换 =====
    pub decimal_precision: u32,
    /// 1904 日期纪元（Mac 旧版工作簿）
    pub date_1904: bool,
    pub target_encoding: TargetEncoding,

    // ===== 归并 =====
    /// 单一尺寸 ≥ 该值（cm）时判定为垂长（drop）
    pub drop_threshold_cm: f64,

    // ===== 进度与留存 =====
    /// 结果内联上限（字节），超出则外置到 import_payload
    pub inline_result_limit_bytes: usize,
    pub cache_ttl_secs: u64,
    pub retention_hours: i64,
    /// 批量模式（放宽 synchronous / foreign_keys）
    pub bulk_mode: bool,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            memory_limit_bytes: 512 * 1024 * 1024,
            bytes_per_row: 1024,
            min_chunk_size: 100,
            max_chunk_size: 5000,
            headroom_ratio: 0.8,
            chunk_budget_ratio: 0.10,
            pressure_threshold: 0.85,
            shrink_factor: 0.8,
            progress_interval: 100,
            max_worksheets: 50,
            exact_count_threshold: 1000,
            preview_rows: 5,
            max_import_rows: 500_000,
            decimal_precision: 2,
            date_1904: false,
            target_encoding: TargetEncoding::Utf8,
            drop_threshold_cm: 120.0,
            inline_result_limit_bytes: 64 * 1024,
            cache_ttl_secs: 3600,
            retention_hours: 24 * 7,
            bulk_mode: true,
        }
    }
}

impl ImportConfig {
    /// 夹取块大小到 [min_chunk_size, max_chunk_size]
    pub fn clamp_chunk_size(&self, rows: usize) -> usize {
        rows.clamp(self.min_chunk_size, self.max_chunk_size.max(self.min_chunk_size))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let cfg = ImportConfig::default();
        assert_eq!(cfg.min_chunk_size, 100);
        assert_eq!(cfg.max_chunk_size, 5000);
        assert_eq!(cfg.decimal_precision, 2);
        assert_eq!(cfg.drop_threshold_cm, 120.0);
        assert_eq!(cfg.clamp_chunk_size(10), 100);
        assert_eq!(cfg.clamp_chunk_size(90_000), 5000);
    }
}
