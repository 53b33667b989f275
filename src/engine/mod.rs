// ==========================================
// 商品目录批量导入系统 - 引擎层
// ==========================================
// 职责: 分块处理 / 父商品归并 / 父子商品创建
// 红线: Engine 不拼 SQL，落库一律经 ProductRepository
// ==========================================

pub mod attribute_inference;
pub mod chunk_processor;
pub mod grouping;
pub mod memory;
pub mod name_similarity;
pub mod product_creator;
pub mod sku_pattern;

// 重导出核心引擎
pub use attribute_inference::{infer_group_attributes, parse_measurements, Measurements};
pub use chunk_processor::{Checkpoint, ChunkProcessor, ChunkRun};
pub use grouping::{GroupingOutcome, ParentGrouper};
pub use memory::{MemoryProbe, ProcessMemoryProbe, SimulatedMemoryProbe};
pub use name_similarity::{derive_parent_name, names_similar};
pub use product_creator::{CreationPhase, CreationProgress, CreationReport, ProductCreator};
pub use sku_pattern::{extract_sku_key, SkuKey, SkuPattern};
