// ==========================================
// 商品目录批量导入系统 - 商品导入领域模型
// ==========================================
// 职责: 原始行 / 转换后行 / 导入请求 / 导入结果 / 父商品分组
// 生命周期:
// - RawRow: 读取层产出，转换层消费一次
// - TransformedRow: 转换层产出后不可变，交给落库算法
// - ParentGroup: 单次导入内临时构建，落库后丢弃
// ==========================================

use crate::domain::types::ImportMode;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::path::PathBuf;

// ==========================================
// CellValue - 原始单元格值
// ==========================================
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CellValue {
    #[default]
    Empty,
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    /// 电子表格日期序列号（1900/1904 纪元由工作簿决定）
    DateSerial(f64),
}

impl CellValue {
    /// 是否为空（空白字符串视为空）
    pub fn is_blank(&self) -> bool {
        match self {
            CellValue::Empty => true,
            CellValue::String(s) => s.trim().is_empty(),
            _ => false,
        }
    }

    /// 转为文本表示（整数值浮点数不带小数位）
    pub fn to_text(&self) -> String {
        match self {
            CellValue::Empty => String::new(),
            CellValue::String(s) => s.clone(),
            CellValue::Int(i) => i.to_string(),
            CellValue::Float(f) | CellValue::DateSerial(f) => {
                if f.fract() == 0.0 && f.abs() < 1e15 {
                    format!("{}", *f as i64)
                } else {
                    format!("{}", f)
                }
            }
            CellValue::Bool(b) => b.to_string(),
        }
    }
}

// ==========================================
// RawRow - 原始行
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRow {
    /// 源文件行号（1 起，含表头行；多工作表时各表独立编号）
    pub row_number: usize,
    /// 所属工作表在本次读取中的序号（CSV 恒为 0）
    #[serde(default)]
    pub sheet_index: usize,
    /// 按原始列位置排列的单元格
    pub cells: Vec<CellValue>,
}

impl RawRow {
    pub fn new(row_number: usize, cells: Vec<CellValue>) -> Self {
        Self {
            row_number,
            sheet_index: 0,
            cells,
        }
    }

    pub fn with_sheet(mut self, sheet_index: usize) -> Self {
        self.sheet_index = sheet_index;
        self
    }

    pub fn cell(&self, column: usize) -> Option<&CellValue> {
        self.cells.get(column)
    }

    pub fn is_blank(&self) -> bool {
        self.cells.iter().all(CellValue::is_blank)
    }

    /// 原始行快照（用于错误报告）
    pub fn snapshot(&self) -> Value {
        Value::Array(self.cells.iter().map(|c| Value::String(c.to_text())).collect())
    }
}

// ==========================================
// RawInput - 映射后的单字段原始输入
// ==========================================
// 同一字段映射多列时为 Multiple（结构化输入）
#[derive(Debug, Clone, PartialEq)]
pub enum RawInput {
    Single(CellValue),
    Multiple(Vec<CellValue>),
}

impl RawInput {
    pub fn is_blank(&self) -> bool {
        match self {
            RawInput::Single(c) => c.is_blank(),
            RawInput::Multiple(cells) => cells.iter().all(CellValue::is_blank),
        }
    }
}

// ==========================================
// ColumnMapping - 列号 → 标准字段名
// ==========================================
// 由外部映射服务提供，管道完全信任
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMapping {
    pub columns: BTreeMap<usize, String>,
}

impl ColumnMapping {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, column: usize, field: &str) -> Self {
        self.insert(column, field);
        self
    }

    pub fn insert(&mut self, column: usize, field: &str) {
        self.columns.insert(column, field.trim().to_string());
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// 字段是否已映射
    pub fn maps_field(&self, field: &str) -> bool {
        self.columns.values().any(|f| f == field)
    }

    /// 按字段名归并列号（保持列顺序）
    pub fn columns_by_field(&self) -> BTreeMap<&str, Vec<usize>> {
        let mut out: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
        for (col, field) in &self.columns {
            out.entry(field.as_str()).or_default().push(*col);
        }
        out
    }
}

impl<const N: usize> From<[(usize, &str); N]> for ColumnMapping {
    fn from(pairs: [(usize, &str); N]) -> Self {
        let mut mapping = ColumnMapping::new();
        for (col, field) in pairs {
            mapping.insert(col, field);
        }
        mapping
    }
}

// ==========================================
// FieldValue - 转换后字段值
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Null,
    Text(String),
    Integer(i64),
    /// 定点小数（字符串形式，避免二进制浮点漂移）
    Decimal(String),
    Boolean(bool),
    /// YYYY-MM-DD
    Date(String),
    Json(Value),
}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) | FieldValue::Decimal(s) | FieldValue::Date(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Integer(i) => Some(*i as f64),
            FieldValue::Decimal(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FieldValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FieldValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }
}

// ==========================================
// TransformedRow - 转换后行
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformedRow {
    pub row_number: usize,
    #[serde(default)]
    pub sheet_index: usize,
    pub fields: BTreeMap<String, FieldValue>,
}

impl TransformedRow {
    pub fn new(row_number: usize) -> Self {
        Self {
            row_number,
            sheet_index: 0,
            fields: BTreeMap::new(),
        }
    }

    pub fn with_sheet(mut self, sheet_index: usize) -> Self {
        self.sheet_index = sheet_index;
        self
    }

    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.fields.get(field).filter(|v| !v.is_null())
    }

    /// 非空文本字段
    pub fn text(&self, field: &str) -> Option<&str> {
        self.get(field)
            .and_then(FieldValue::as_text)
            .filter(|s| !s.is_empty())
    }

    pub fn number(&self, field: &str) -> Option<f64> {
        self.get(field).and_then(FieldValue::as_f64)
    }

    pub fn integer(&self, field: &str) -> Option<i64> {
        self.get(field).and_then(FieldValue::as_i64)
    }

    pub fn is_parent(&self) -> bool {
        self.get("is_parent")
            .and_then(FieldValue::as_bool)
            .unwrap_or(false)
    }

    /// 变体标识（SKU，缺失时回退条码）
    pub fn variant_identifier(&self) -> Option<&str> {
        self.text("sku").or_else(|| self.text("barcode"))
    }
}

// ==========================================
// TransformationError - 行级转换错误
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformationError {
    pub row_number: usize,
    #[serde(default)]
    pub sheet_index: usize,
    pub field: Option<String>,
    pub message: String,
    pub raw_snapshot: Value,
}

// ==========================================
// TransformationResult - 转换汇总
// ==========================================
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransformationResult {
    pub success_count: usize,
    pub error_count: usize,
    pub transformed_rows: Vec<TransformedRow>,
    pub errors: Vec<TransformationError>,
}

impl TransformationResult {
    pub fn push_row(&mut self, row: TransformedRow) {
        self.success_count += 1;
        self.transformed_rows.push(row);
    }

    pub fn push_error(&mut self, error: TransformationError) {
        self.error_count += 1;
        self.errors.push(error);
    }
}

// ==========================================
// ImportRequest - 导入请求（调用方持有，只读）
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportRequest {
    pub file_path: PathBuf,
    /// 选中的工作表序号（从 0 开始）
    pub selected_sheets: Vec<usize>,
    pub column_mapping: ColumnMapping,
    pub mode: ImportMode,
    /// 试运行: 只分析/转换/安全检查，不落库
    #[serde(default)]
    pub dry_run: bool,
    /// 行数上限（None = 使用配置上限）
    #[serde(default)]
    pub max_rows: Option<usize>,
}

impl ImportRequest {
    pub fn new(file_path: impl Into<PathBuf>, column_mapping: ColumnMapping) -> Self {
        Self {
            file_path: file_path.into(),
            selected_sheets: vec![0],
            column_mapping,
            mode: ImportMode::Standard,
            dry_run: false,
            max_rows: None,
        }
    }

    pub fn with_mode(mut self, mode: ImportMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_sheets(mut self, sheets: Vec<usize>) -> Self {
        self.selected_sheets = sheets;
        self
    }

    pub fn dry_run(mut self) -> Self {
        self.dry_run = true;
        self
    }
}

// ==========================================
// ImportErrorEntry - 对外错误条目
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportErrorEntry {
    pub message: String,
    pub context: Value,
}

impl ImportErrorEntry {
    pub fn for_row(row_number: usize, field: Option<&str>, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            context: json!({ "row_number": row_number, "field": field }),
        }
    }

    /// 标注所属工作表
    pub fn in_sheet(mut self, sheet_index: usize) -> Self {
        if let Value::Object(map) = &mut self.context {
            map.insert("sheet_index".to_string(), json!(sheet_index));
        }
        self
    }

    pub fn row_number(&self) -> Option<usize> {
        self.context
            .get("row_number")
            .and_then(Value::as_u64)
            .map(|n| n as usize)
    }

    pub fn sheet_index(&self) -> usize {
        self.context
            .get("sheet_index")
            .and_then(Value::as_u64)
            .map_or(0, |n| n as usize)
    }
}

impl From<TransformationError> for ImportErrorEntry {
    fn from(err: TransformationError) -> Self {
        Self {
            message: err.message,
            context: json!({
                "row_number": err.row_number,
                "sheet_index": err.sheet_index,
                "field": err.field,
                "raw": err.raw_snapshot,
            }),
        }
    }
}

// ==========================================
// ImportResult - 导入结果（跨分块累加）
// ==========================================
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImportResult {
    pub products_created: usize,
    pub variants_created: usize,
    pub errors: Vec<ImportErrorEntry>,
}

impl ImportResult {
    pub fn merge(&mut self, other: ImportResult) {
        self.products_created += other.products_created;
        self.variants_created += other.variants_created;
        self.errors.extend(other.errors);
    }

    pub fn error_count(&self) -> usize {
        self.errors.len()
    }
}

// ==========================================
// ParentGroup - 父商品分组（两阶段归并产物）
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParentGroup {
    pub group_key: String,
    /// 成员在 transformed_rows 中的下标
    pub member_row_indices: Vec<usize>,
    pub parent_name: String,
    /// 仅当全部成员解析出相同 SKU 模式键时存在
    pub parent_sku: Option<String>,
    pub inferred_parent_attributes: BTreeMap<String, Value>,
}

// ==========================================
// NewParent / NewVariant - 落库载荷
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewParent {
    pub name: String,
    pub sku: Option<String>,
    pub description: Option<String>,
    pub attributes: Value,
    pub source_row: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewVariant {
    pub parent_id: i64,
    pub sku: Option<String>,
    pub name: String,
    pub color: Option<String>,
    pub size: Option<String>,
    pub barcode: Option<String>,
    pub retail_price: Option<String>,
    pub wholesale_price: Option<String>,
    pub cost_price: Option<String>,
    pub stock_quantity: Option<i64>,
    pub weight: Option<String>,
    pub width_cm: Option<f64>,
    pub drop_cm: Option<f64>,
    pub image_urls: Option<Value>,
    pub source_row: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cell_value_text() {
        assert_eq!(CellValue::Float(12.0).to_text(), "12");
        assert_eq!(CellValue::Float(12.5).to_text(), "12.5");
        assert_eq!(CellValue::Int(-3).to_text(), "-3");
        assert!(CellValue::String("   ".to_string()).is_blank());
    }

    #[test]
    fn test_import_result_merge() {
        let mut total = ImportResult::default();
        total.merge(ImportResult {
            products_created: 2,
            variants_created: 5,
            errors: vec![ImportErrorEntry::for_row(3, Some("sku"), "缺失")],
        });
        total.merge(ImportResult {
            products_created: 1,
            variants_created: 4,
            errors: vec![],
        });
        assert_eq!(total.products_created, 3);
        assert_eq!(total.variants_created, 9);
        assert_eq!(total.errors[0].row_number(), Some(3));
    }

    #[test]
    fn test_column_mapping_groups_by_field() {
        let mapping = ColumnMapping::from([(0, "sku"), (3, "image_urls"), (4, "image_urls")]);
        let by_field = mapping.columns_by_field();
        assert_eq!(by_field["image_urls"], vec![3, 4]);
        assert!(mapping.maps_field("sku"));
        assert!(!mapping.maps_field("name"));
    }

    #[test]
    fn test_transformed_row_accessors() {
        let mut row = TransformedRow::new(2);
        row.fields.insert("is_parent".into(), FieldValue::Boolean(true));
        row.fields.insert("sku".into(), FieldValue::Null);
        row.fields.insert("barcode".into(), FieldValue::Text("5012345".into()));
        assert!(row.is_parent());
        assert_eq!(row.variant_identifier(), Some("5012345"));
    }
}
