// ==========================================
// 商品目录批量导入系统 - 领域枚举类型
// ==========================================
// 职责: 导入模式 / 导入状态机 / 目标编码
// ==========================================

use serde::{Deserialize, Serialize};
use std::fmt;

// ==========================================
// ImportMode - 导入模式
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ImportMode {
    /// 标准模式: 按行到达顺序创建父商品/变体
    #[default]
    Standard,
    /// 自动生成父商品: 两阶段归并（先分组，后落库）
    AutoGenerateParents,
}

impl ImportMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImportMode::Standard => "standard",
            ImportMode::AutoGenerateParents => "auto_generate_parents",
        }
    }
}

// ==========================================
// ImportStatus - 导入任务状态机
// ==========================================
// pending → processing → {completed | failed | cancelled}
// pending → cancelled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportStatus {
    /// 等待中
    Pending,
    /// 执行中
    Processing,
    /// 已完成
    Completed,
    /// 失败
    Failed,
    /// 已取消
    Cancelled,
}

impl ImportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImportStatus::Pending => "pending",
            ImportStatus::Processing => "processing",
            ImportStatus::Completed => "completed",
            ImportStatus::Failed => "failed",
            ImportStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(ImportStatus::Pending),
            "processing" => Some(ImportStatus::Processing),
            "completed" => Some(ImportStatus::Completed),
            "failed" => Some(ImportStatus::Failed),
            "cancelled" => Some(ImportStatus::Cancelled),
            _ => None,
        }
    }

    /// 是否为终态
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ImportStatus::Completed | ImportStatus::Failed | ImportStatus::Cancelled
        )
    }

    /// 状态转换是否合法
    pub fn can_transition_to(&self, next: ImportStatus) -> bool {
        use ImportStatus::*;
        matches!(
            (self, next),
            (Pending, Processing)
                | (Pending, Cancelled)
                | (Processing, Completed)
                | (Processing, Failed)
                | (Processing, Cancelled)
        )
    }
}

impl fmt::Display for ImportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ==========================================
// TargetEncoding - 清洗阶段目标编码
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TargetEncoding {
    /// UTF-8（原样保留）
    #[default]
    Utf8,
    /// ASCII（去除变音符号，丢弃无法折叠的字符）
    Ascii,
}

impl TargetEncoding {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "").as_str() {
            "utf8" => Some(TargetEncoding::Utf8),
            "ascii" | "usascii" => Some(TargetEncoding::Ascii),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_transitions() {
        assert!(ImportStatus::Pending.can_transition_to(ImportStatus::Processing));
        assert!(ImportStatus::Pending.can_transition_to(ImportStatus::Cancelled));
        assert!(ImportStatus::Processing.can_transition_to(ImportStatus::Failed));
        assert!(!ImportStatus::Pending.can_transition_to(ImportStatus::Completed));
        assert!(!ImportStatus::Completed.can_transition_to(ImportStatus::Cancelled));
        assert!(!ImportStatus::Cancelled.can_transition_to(ImportStatus::Processing));
    }

    #[test]
    fn test_status_round_trip_str() {
        for s in [
            ImportStatus::Pending,
            ImportStatus::Processing,
            ImportStatus::Completed,
            ImportStatus::Failed,
            ImportStatus::Cancelled,
        ] {
            assert_eq!(ImportStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(ImportStatus::parse("RUNNING"), None);
    }

    #[test]
    fn test_target_encoding_parse() {
        assert_eq!(TargetEncoding::parse("UTF-8"), Some(TargetEncoding::Utf8));
        assert_eq!(TargetEncoding::parse("ascii"), Some(TargetEncoding::Ascii));
        assert_eq!(TargetEncoding::parse("latin1"), None);
    }
}
