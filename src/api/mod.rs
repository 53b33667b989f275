// ==========================================
// 商品目录批量导入系统 - API 层
// ==========================================
// 职责: 提供导入门面接口，供调用方（命令行 / 上层服务）使用
// ==========================================

pub mod error;
pub mod import_api;

// 重导出核心类型
pub use error::{ApiError, ApiResult};
pub use import_api::{HeadersResponse, ImportApi};
