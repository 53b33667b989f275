// ==========================================
// 商品目录批量导入系统 - 导入层
// ==========================================
// 职责: 文件读取 → 工作表分析 → 字段映射 → 清洗 / 类型转换 / 校验
// 支持: Excel (.xlsx/.xlsm/.xls/.ods), CSV / TSV / TXT
// ==========================================

pub mod data_cleaner;
pub mod dq_validator;
pub mod error;
pub mod field_mapper;
pub mod field_rules;
pub mod file_parser;
pub mod importer_trait;
pub mod security_scanner;
pub mod transformer;
pub mod type_caster;
pub mod worksheet_analyzer;

// 重导出核心类型
pub use data_cleaner::DataCleaner;
pub use dq_validator::{DqValidator, RuleViolation};
pub use error::{ImportError, ImportOutcome, TransformError};
pub use field_mapper::FieldMapper;
pub use field_rules::{FieldRule, FieldRuleSet, FieldType, Sanitizer, Validator};
pub use file_parser::{CsvRowCursor, SheetData, SourceFormat, WorkbookSource};
pub use importer_trait::{ContentScanner, NoopScanner, ScanVerdict};
pub use security_scanner::PatternContentScanner;
pub use transformer::Transformer;
pub use type_caster::TypeCaster;
pub use worksheet_analyzer::{SheetHeaders, WorksheetAnalysis, WorksheetAnalyzer, WorksheetInfo};
