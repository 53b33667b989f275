// ==========================================
// 商品目录批量导入系统 - 字段映射器
// ==========================================
// 职责:
// - 按列映射从原始行中提取各标准字段的原始输入
// - 表头别名猜测（辅助功能，结果仅供调用方参考）
// ==========================================

use crate::domain::product::{ColumnMapping, RawInput, RawRow};
use std::collections::BTreeMap;

/// 标准字段 → 表头别名（已规范化：小写、仅保留字母数字）
const HEADER_ALIASES: &[(&str, &[&str])] = &[
    (
        "sku",
        &["sku", "variantsku", "productcode", "itemcode", "stockcode", "code", "articlenumber"],
    ),
    ("parent_sku", &["parentsku", "parentcode", "groupsku", "stylecode"]),
    ("name", &["name", "productname", "title", "itemname", "variantname"]),
    ("parent_name", &["parentname", "groupname", "productfamily", "family", "stylename"]),
    ("description", &["description", "desc", "longdescription", "details"]),
    ("color", &["color", "colour"]),
    ("size", &["size", "dimensions"]),
    (
        "retail_price",
        &["retailprice", "price", "rrp", "sellingprice", "saleprice", "retail"],
    ),
    ("wholesale_price", &["wholesaleprice", "tradeprice", "wholesale"]),
    ("cost_price", &["costprice", "cost", "unitcost", "buyprice"]),
    (
        "stock_quantity",
        &["stockquantity", "stock", "qty", "quantity", "inventory", "stocklevel", "onhand"],
    ),
    ("weight", &["weight", "weightkg"]),
    ("barcode", &["barcode", "ean", "ean13", "upc", "gtin"]),
    ("is_parent", &["isparent", "parent", "parentflag"]),
];

fn normalize_header(header: &str) -> String {
    header
        .chars()
        .take_while(|c| *c != '(')
        .filter(|c| c.is_alphanumeric())
        .collect::<String>()
        .to_lowercase()
}

#[derive(Debug, Clone, Default)]
pub struct FieldMapper;

impl FieldMapper {
    pub fn new() -> Self {
        Self
    }

    /// 提取行内各映射字段的原始输入
    ///
    /// - 单列映射 → RawInput::Single
    /// - 多列映射到同一字段 → RawInput::Multiple（按列顺序）
    /// - 列号超出行长度视为空
    pub fn extract(&self, row: &RawRow, mapping: &ColumnMapping) -> BTreeMap<String, RawInput> {
        mapping
            .columns_by_field()
            .into_iter()
            .map(|(field, columns)| {
                let mut cells: Vec<_> = columns
                    .iter()
                    .map(|c| row.cell(*c).cloned().unwrap_or_default())
                    .collect();
                let input = if cells.len() == 1 {
                    RawInput::Single(cells.remove(0))
                } else {
                    RawInput::Multiple(cells)
                };
                (field.to_string(), input)
            })
            .collect()
    }

    /// 按表头别名猜测列映射
    ///
    /// 每个字段只取第一个匹配列；以 image 开头的列全部归入 image_urls
    pub fn guess_mapping_from_headers(&self, headers: &[String]) -> ColumnMapping {
        let mut mapping = ColumnMapping::new();

        for (column, header) in headers.iter().enumerate() {
            let key = normalize_header(header);
            if key.is_empty() {
                continue;
            }
            if key.starts_with("image") || key.starts_with("photo") {
                mapping.insert(column, "image_urls");
                continue;
            }
            let hit = HEADER_ALIASES
                .iter()
                .find(|(_, aliases)| aliases.contains(&key.as_str()))
                .map(|(field, _)| *field);
            if let Some(field) = hit {
                if !mapping.maps_field(field) {
                    mapping.insert(column, field);
                }
            }
        }

        tracing::debug!(mapped = mapping.len(), headers = headers.len(), "表头映射猜测完成");
        mapping
    }
}
