// ==========================================
// 商品目录批量导入系统 - 字段转换引擎
// ==========================================
// 职责: RawRow + ColumnMapping → TransformedRow / TransformationError
// 流程（每个映射字段）:
// 1. 未声明字段跳过（每次运行仅记录一次）
// 2. 空输入 → NULL；必填字段为空 → 行级错误
// 3. 文本输入: 通用清洗 + 字段清洗器；清洗后为空 → NULL
// 4. 按声明类型转换，再执行字段级校验器
// 5. 行级跨字段规则
// 约定: 同一输入多次转换结果一致；单行失败不影响其它行
// ==========================================

use crate::config::ImportConfig;
use crate::domain::product::{
    CellValue, ColumnMapping, FieldValue, RawInput, RawRow, TransformationError,
    TransformationResult, TransformedRow,
};
use crate::importer::data_cleaner::DataCleaner;
use crate::importer::dq_validator::DqValidator;
use crate::importer::error::TransformError;
use crate::importer::field_mapper::FieldMapper;
use crate::importer::field_rules::{FieldRule, FieldRuleSet, FieldType, Sanitizer};
use crate::importer::type_caster::TypeCaster;
use std::collections::HashSet;
use tracing::{debug, info};

pub struct Transformer {
    rules: FieldRuleSet,
    cleaner: DataCleaner,
    caster: TypeCaster,
    validator: DqValidator,
    mapper: FieldMapper,
}

impl Transformer {
    pub fn new(config: &ImportConfig) -> Self {
        Self::from_parts(
            FieldRuleSet::default_catalog(config.decimal_precision),
            DataCleaner::new(config.target_encoding),
            TypeCaster::new(config.decimal_precision, config.date_1904),
        )
    }

    pub fn from_parts(
        rules: FieldRuleSet,
        cleaner: DataCleaner,
        caster: TypeCaster,
    ) -> Self {
        Self {
            rules,
            cleaner,
            caster,
            validator: DqValidator::new(),
            mapper: FieldMapper::new(),
        }
    }

    pub fn rules(&self) -> &FieldRuleSet {
        &self.rules
    }

    /// 批量转换
    pub fn transform(&self, raw_rows: &[RawRow], mapping: &ColumnMapping) -> TransformationResult {
        let mut result = TransformationResult::default();
        let mut skipped = HashSet::new();

        for row in raw_rows {
            match self.transform_row_inner(row, mapping, &mut skipped) {
                Ok(transformed) => result.push_row(transformed),
                Err(err) => {
                    debug!(row = err.row_number, field = ?err.field, message = %err.message, "行转换失败");
                    result.push_error(err);
                }
            }
        }

        info!(
            total = raw_rows.len(),
            success = result.success_count,
            errors = result.error_count,
            "字段转换完成"
        );
        result
    }

    /// 单行转换
    pub fn transform_row(
        &self,
        row: &RawRow,
        mapping: &ColumnMapping,
    ) -> Result<TransformedRow, TransformationError> {
        self.transform_row_inner(row, mapping, &mut HashSet::new())
    }

    fn transform_row_inner(
        &self,
        row: &RawRow,
        mapping: &ColumnMapping,
        skipped: &mut HashSet<String>,
    ) -> Result<TransformedRow, TransformationError> {
        let fail = |field: Option<&str>, message: String| TransformationError {
            row_number: row.row_number,
            sheet_index: row.sheet_index,
            field: field.map(str::to_string),
            message,
            raw_snapshot: row.snapshot(),
        };

        let mut transformed = TransformedRow::new(row.row_number).with_sheet(row.sheet_index);

        for (field, input) in self.mapper.extract(row, mapping) {
            let Some(rule) = self.rules.get(&field) else {
                if skipped.insert(field.clone()) {
                    debug!(field = %field, "字段未声明规则，跳过");
                }
                continue;
            };

            let value = self
                .convert_field(&input, rule)
                .map_err(|e| fail(Some(field.as_str()), format!("{}: {}", field, e)))?;

            if let FieldValue::Null = value {
                if rule.required || !rule.nullable {
                    let err = if rule.required {
                        TransformError::Required
                    } else {
                        TransformError::NotNullable
                    };
                    return Err(fail(Some(field.as_str()), format!("{}: {}", field, err)));
                }
            } else {
                for v in &rule.validators {
                    self.validator
                        .validate_field(&value, v)
                        .map_err(|e| fail(Some(field.as_str()), format!("{}: {}", field, e)))?;
                }
            }

            transformed.fields.insert(field, value);
        }

        // 映射中完全缺失的必填字段
        let mut missing: Vec<&str> = self
            .rules
            .required_fields()
            .filter(|f| !mapping.maps_field(f))
            .collect();
        missing.sort_unstable();
        if let Some(field) = missing.first() {
            return Err(fail(
                Some(*field),
                format!("{}: {}", field, TransformError::Required),
            ));
        }

        self.validator
            .validate_row(&transformed)
            .map_err(|v| fail(Some(v.field), v.message))?;

        Ok(transformed)
    }

    fn convert_field(&self, input: &RawInput, rule: &FieldRule) -> Result<FieldValue, TransformError> {
        if input.is_blank() {
            return Ok(FieldValue::Null);
        }

        match input {
            RawInput::Single(cell) => match self.clean_cell(cell, rule) {
                Some(cleaned) => self.caster.cast(&cleaned, rule),
                None => Ok(FieldValue::Null),
            },
            RawInput::Multiple(cells) => {
                let cleaned: Vec<CellValue> = cells
                    .iter()
                    .filter_map(|c| self.clean_cell(c, rule))
                    .collect();
                if cleaned.is_empty() {
                    return Ok(FieldValue::Null);
                }
                self.caster.cast_list(&cleaned, rule)
            }
        }
    }

    /// 文本单元格清洗；非文本原样返回；清洗后为空返回 None
    fn clean_cell(&self, cell: &CellValue, rule: &FieldRule) -> Option<CellValue> {
        match cell {
            CellValue::String(text) => {
                let cleaned = self.cleaner.sanitize(text, &effective_sanitizers(rule));
                if cleaned.is_empty() {
                    None
                } else {
                    Some(CellValue::String(cleaned))
                }
            }
            CellValue::Empty => None,
            other => Some(other.clone()),
        }
    }
}

/// 邮箱 / URL 类型隐式附加对应清洗器
fn effective_sanitizers(rule: &FieldRule) -> Vec<Sanitizer> {
    let mut sanitizers = rule.sanitizers.clone();
    let implicit = match rule.field_type {
        FieldType::Email => Some(Sanitizer::Email),
        FieldType::Url => Some(Sanitizer::Url),
        _ => None,
    };
    if let Some(s) = implicit {
        if !sanitizers.contains(&s) {
            sanitizers.push(s);
        }
    }
    sanitizers
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::product::ImportErrorEntry;

    fn mapping() -> ColumnMapping {
        ColumnMapping::from([
            (0, "sku"),
            (1, "name"),
            (2, "retail_price"),
            (3, "stock_quantity"),
            (4, "image_urls"),
            (5, "image_urls"),
            (6, "supplier_notes"),
        ])
    }

    fn s(v: &str) -> CellValue {
        CellValue::String(v.to_string())
    }

    #[test]
    fn test_transform_happy_path() {
        let t = Transformer::new(&ImportConfig::default());
        let row = RawRow::new(
            2,
            vec![
                s(" ab-12 "),
                s("Oak\u{200B}  Chair"),
                s("£1,299.5"),
                CellValue::Float(12.0),
                s("a.jpg"),
                CellValue::Empty,
                s("ignored"),
            ],
        );

        let out = t.transform_row(&row, &mapping()).unwrap();
        assert_eq!(out.text("sku"), Some("AB-12"));
        assert_eq!(out.text("name"), Some("Oak Chair"));
        assert_eq!(out.get("retail_price"), Some(&FieldValue::Decimal("1299.50".into())));
        assert_eq!(out.integer("stock_quantity"), Some(12));
        assert_eq!(
            out.get("image_urls"),
            Some(&FieldValue::Json(serde_json::json!(["a.jpg"])))
        );
        assert!(!out.fields.contains_key("supplier_notes"));
    }

    #[test]
    fn test_required_field_errors_carry_field_name() {
        let t = Transformer::new(&ImportConfig::default());
        let row = RawRow::new(7, vec![s("A1"), s("   ")]);
        let err = t
            .transform_row(&row, &ColumnMapping::from([(0, "sku"), (1, "name")]))
            .unwrap_err();
        assert_eq!(err.row_number, 7);
        assert_eq!(err.field.as_deref(), Some("name"));
        assert!(err.message.contains("name"));

        let err = t
            .transform_row(&row, &ColumnMapping::from([(0, "sku")]))
            .unwrap_err();
        assert_eq!(err.field.as_deref(), Some("name"));
    }

    #[test]
    fn test_row_errors_do_not_stop_batch() {
        let t = Transformer::new(&ImportConfig::default());
        let m = ColumnMapping::from([(0, "sku"), (1, "name"), (2, "stock_quantity")]);
        let rows = vec![
            RawRow::new(2, vec![s("A1"), s("Chair"), s("5")]),
            RawRow::new(3, vec![s("A2"), s("Chair"), s("lots")]),
            RawRow::new(4, vec![s("A3"), s("Chair"), s("-1")]),
            RawRow::new(5, vec![s("A4"), s("Chair"), s("")]),
        ];

        let result = t.transform(&rows, &m);
        assert_eq!(result.success_count, 2);
        assert_eq!(result.error_count, 2);
        assert_eq!(result.errors[0].row_number, 3);
        assert_eq!(result.errors[1].field.as_deref(), Some("stock_quantity"));
        assert_eq!(result.transformed_rows[1].get("stock_quantity"), None);
    }

    #[test]
    fn test_sheet_index_carried_to_rows_and_errors() {
        let t = Transformer::new(&ImportConfig::default());
        let m = ColumnMapping::from([(0, "sku"), (1, "name"), (2, "stock_quantity")]);
        let rows = vec![
            RawRow::new(2, vec![s("A1"), s("Chair"), s("5")]).with_sheet(2),
            RawRow::new(3, vec![s("A2"), s("Chair"), s("lots")]).with_sheet(2),
        ];

        let result = t.transform(&rows, &m);
        assert_eq!(result.transformed_rows[0].sheet_index, 2);
        assert_eq!(result.errors[0].sheet_index, 2);

        let entry: ImportErrorEntry = result.errors[0].clone().into();
        assert_eq!(entry.sheet_index(), 2);
        assert_eq!(entry.row_number(), Some(3));
    }

    #[test]
    fn test_transform_is_deterministic() {
        let t = Transformer::new(&ImportConfig::default());
        let rows = vec![
            RawRow::new(2, vec![s("x1"), s("Café  Table"), s("19.999"), s("3")]),
            RawRow::new(3, vec![s("x2"), s(""), s("1"), s("1")]),
        ];
        let m = ColumnMapping::from([(0, "sku"), (1, "name"), (2, "retail_price"), (3, "stock_quantity")]);

        let first = t.transform(&rows, &m);
        let second = t.transform(&rows, &m);
        assert_eq!(first.transformed_rows, second.transformed_rows);
        assert_eq!(first.errors, second.errors);
        assert_eq!(
            first.transformed_rows[0].get("retail_price"),
            Some(&FieldValue::Decimal("20.00".into()))
        );
    }

    #[test]
    fn test_positive_number_rejects_zero_price() {
        let t = Transformer::new(&ImportConfig::default());
        let row = RawRow::new(2, vec![s("A1"), s("Chair"), s("0")]);
        let err = t
            .transform_row(&row, &ColumnMapping::from([(0, "sku"), (1, "name"), (2, "retail_price")]))
            .unwrap_err();
        assert_eq!(err.field.as_deref(), Some("retail_price"));
    }
}
