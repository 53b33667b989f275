// ==========================================
// 商品目录批量导入系统 - 核心库
// ==========================================
// 技术栈: Rust + SQLite + tokio
// 系统定位: 大体量商品目录文件 → 父子商品图（有界内存 / 分块事务 / 可取消）
// ==========================================

// ==========================================
// 模块声明
// ==========================================

// 领域层 - 实体与类型
pub mod domain;

// 数据仓储层 - 数据访问
pub mod repository;

// 引擎层 - 分块处理 / 父商品归并 / 商品创建
pub mod engine;

// 导入层 - 文件读取与字段转换
pub mod importer;

// 配置层 - 系统配置
pub mod config;

// 服务层 - 管道编排与进度跟踪
pub mod services;

// API 层 - 导入门面
pub mod api;

// 数据库基础设施（连接初始化/PRAGMA 统一）
pub mod db;

// 日志系统
pub mod logging;

// 性能统计
pub mod perf;

// ==========================================
// 重导出核心类型
// ==========================================

// 领域类型
pub use domain::types::{ImportMode, ImportStatus, TargetEncoding};

// 领域实体
pub use domain::{
    ColumnMapping, ImportErrorEntry, ImportRequest, ImportResult, ParentGroup, ProgressRecord,
    TransformedRow,
};

// 引擎
pub use engine::{ChunkProcessor, ParentGrouper, ProductCreator};

// 服务
pub use services::{ImportOrchestrator, ImportPipeline, PostImportHook, ProgressTracker};

// API
pub use api::{ApiError, ApiResult, ImportApi};

// ==========================================
// 常量定义
// ==========================================

// 系统版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// 系统名称
pub const APP_NAME: &str = "商品目录批量导入系统";
