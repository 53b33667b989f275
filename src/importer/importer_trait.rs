// ==========================================
// 商品目录批量导入系统 - 导入层 Trait
// ==========================================
// 职责: 定义导入管道对外部协作方的窄接口（不包含实现）
// ==========================================

use crate::domain::product::{RawRow, TransformedRow};

// ==========================================
// ScanVerdict - 扫描结论
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanVerdict {
    Clean,
    /// 已就地中和（字段列表）
    Neutralised { fields: Vec<String> },
    /// 整行拒绝（计入行级错误）
    Rejected { field: Option<String>, reason: String },
}

impl ScanVerdict {
    pub fn is_rejected(&self) -> bool {
        matches!(self, ScanVerdict::Rejected { .. })
    }
}

// ==========================================
// ContentScanner Trait
// ==========================================
// 用途: 安全/内容扫描，在转换前后各调用一次，作为行级过滤器
// 实现者: PatternContentScanner
pub trait ContentScanner: Send + Sync {
    /// 转换前扫描原始行（只读）
    fn scan_raw(&self, row: &RawRow) -> ScanVerdict;

    /// 转换后扫描，可就地中和可疑内容
    fn scan_transformed(&self, row: &mut TransformedRow) -> ScanVerdict;
}

/// 不做任何检查的扫描器
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopScanner;

impl ContentScanner for NoopScanner {
    fn scan_raw(&self, _row: &RawRow) -> ScanVerdict {
        ScanVerdict::Clean
    }

    fn scan_transformed(&self, _row: &mut TransformedRow) -> ScanVerdict {
        ScanVerdict::Clean
    }
}
