// ==========================================
// 商品目录批量导入系统 - 服务层
// ==========================================
// 职责: 导入管道编排 / 后台执行 / 进度跟踪
// ==========================================

pub mod hooks;
pub mod import_orchestrator;
pub mod pipeline;
pub mod progress_tracker;

pub use hooks::PostImportHook;
pub use import_orchestrator::ImportOrchestrator;
pub use pipeline::{ImportPipeline, PipelineOutcome, PipelineProgress, PreparationSummary};
pub use progress_tracker::ProgressTracker;
