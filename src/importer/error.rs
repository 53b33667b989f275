// ==========================================
// 商品目录批量导入系统 - 导入模块错误类型
// ==========================================
// 分类:
// - ImportError: 运行级错误（文件/配置/分块系统错误/取消）
// - TransformError: 字段级转换失败（降级为行级错误，不中断批次）
// 工具: thiserror 派生宏
// ==========================================

use crate::repository::error::RepositoryError;
use thiserror::Error;

/// 导入模块错误类型
#[derive(Error, Debug)]
pub enum ImportError {
    // ===== 文件相关错误 =====
    #[error("文件不存在: {0}")]
    FileNotFound(String),

    #[error("文件格式不支持: {0}（仅支持 .xlsx/.xlsm/.xls/.ods/.csv/.tsv/.txt）")]
    UnsupportedFormat(String),

    #[error("文件读取失败: {0}")]
    FileReadError(String),

    #[error("Excel 解析失败: {0}")]
    ExcelParseError(String),

    #[error("CSV 解析失败: {0}")]
    CsvParseError(String),

    #[error("工作表不存在: index={0}")]
    SheetNotFound(usize),

    #[error("未选择工作表")]
    NoSheetSelected,

    // ===== 请求错误 =====
    #[error("列映射为空")]
    EmptyColumnMapping,

    #[error("行数超出上限: {rows} > {limit}")]
    RowLimitExceeded { rows: usize, limit: usize },

    // ===== 分块/落库错误 =====
    #[error("分块处理失败 (chunk {chunk_index}): {message}")]
    ChunkFailed { chunk_index: usize, message: String },

    #[error("数据库错误: {0}")]
    Repository(#[from] RepositoryError),

    #[error("安全扫描拒绝: {0}")]
    SecurityRejected(String),

    #[error("导入已取消")]
    Cancelled,

    // ===== 配置错误 =====
    #[error("配置读取失败 (key: {key}): {message}")]
    ConfigReadError { key: String, message: String },

    #[error("配置值格式错误 (key: {key}, value: {value}): {message}")]
    ConfigValueError {
        key: String,
        value: String,
        message: String,
    },

    #[error("字段规则配置错误: {0}")]
    RuleConfigError(String),

    // ===== 通用错误 =====
    #[error("内部错误: {0}")]
    InternalError(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ImportError {
    /// 是否为取消（取消不视为失败）
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ImportError::Cancelled)
    }
}

// 实现 From<std::io::Error>
impl From<std::io::Error> for ImportError {
    fn from(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            ImportError::FileNotFound(err.to_string())
        } else {
            ImportError::FileReadError(err.to_string())
        }
    }
}

// 实现 From<rusqlite::Error>
impl From<rusqlite::Error> for ImportError {
    fn from(err: rusqlite::Error) -> Self {
        ImportError::Repository(RepositoryError::from(err))
    }
}

// 实现 From<csv::Error>
impl From<csv::Error> for ImportError {
    fn from(err: csv::Error) -> Self {
        ImportError::CsvParseError(err.to_string())
    }
}

// 实现 From<calamine::Error>
impl From<calamine::Error> for ImportError {
    fn from(err: calamine::Error) -> Self {
        ImportError::ExcelParseError(err.to_string())
    }
}

/// Result 类型别名
pub type ImportOutcome<T> = Result<T, ImportError>;

// ==========================================
// TransformError - 字段级转换失败
// ==========================================
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransformError {
    #[error("必填字段缺失")]
    Required,

    #[error("字段不可为空")]
    NotNullable,

    #[error("无法转换为{expected}: {value}")]
    InvalidType { expected: &'static str, value: String },

    #[error("数值 {value} 超出范围 [{min}, {max}]")]
    OutOfRange { value: i64, min: i64, max: i64 },

    #[error("邮箱格式无效: {0}")]
    InvalidEmail(String),

    #[error("URL 格式无效: {0}")]
    InvalidUrl(String),

    #[error("日期格式无效: {0}")]
    InvalidDate(String),

    #[error("JSON 格式无效: {0}")]
    InvalidJson(String),

    #[error("校验失败 ({validator}): {message}")]
    ValidationFailed {
        validator: &'static str,
        message: String,
    },
}
