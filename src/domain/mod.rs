// ==========================================
// 商品目录批量导入系统 - 领域模型层
// ==========================================
// 职责: 定义导入管道的实体、值类型与状态机
// 红线: 不含数据访问逻辑,不含引擎逻辑
// ==========================================

pub mod product;
pub mod progress;
pub mod types;

// 重导出核心类型
pub use product::{
    CellValue, ColumnMapping, FieldValue, ImportErrorEntry, ImportRequest, ImportResult,
    NewParent, NewVariant, ParentGroup, RawInput, RawRow, TransformationError,
    TransformationResult, TransformedRow,
};
pub use progress::{ChunkStat, ProgressEvent, ProgressRecord};
pub use types::{ImportMode, ImportStatus, TargetEncoding};
