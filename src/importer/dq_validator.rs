// ==========================================
// 商品目录批量导入系统 - 数据质量校验器
// ==========================================
// 职责:
// - 字段级校验器（positive_number / in_list / unique_sku）
// - 行级跨字段规则
//   1. 非父商品行必须带变体标识（sku）
//   2. 零售价 ≥ 批发价 / 成本价（两者同时存在时）
// ==========================================

use crate::domain::product::{FieldValue, TransformedRow};
use crate::importer::error::TransformError;
use crate::importer::field_rules::Validator;

/// 跨字段规则违反
#[derive(Debug, Clone, PartialEq)]
pub struct RuleViolation {
    pub field: &'static str,
    pub message: String,
}

#[derive(Debug, Clone, Default)]
pub struct DqValidator;

impl DqValidator {
    pub fn new() -> Self {
        Self
    }

    /// 字段级校验
    pub fn validate_field(&self, value: &FieldValue, validator: &Validator) -> Result<(), TransformError> {
        match validator {
            Validator::PositiveNumber => match value.as_f64() {
                Some(n) if n > 0.0 => Ok(()),
                Some(n) => Err(TransformError::ValidationFailed {
                    validator: "positive_number",
                    message: format!("数值必须大于 0，实际 {}", n),
                }),
                None => Err(TransformError::ValidationFailed {
                    validator: "positive_number",
                    message: "非数值".to_string(),
                }),
            },
            Validator::InList(allowed) => {
                let text = value.as_text().unwrap_or_default();
                if allowed.iter().any(|a| a.eq_ignore_ascii_case(text)) {
                    Ok(())
                } else {
                    Err(TransformError::ValidationFailed {
                        validator: "in_list",
                        message: format!("{} 不在允许列表 {:?} 中", text, allowed),
                    })
                }
            }
            // 唯一性由持久化层的唯一约束保证
            Validator::UniqueSku => Ok(()),
        }
    }

    /// 行级跨字段校验（返回第一个违反项）
    pub fn validate_row(&self, row: &TransformedRow) -> Result<(), RuleViolation> {
        if !row.is_parent() && row.text("sku").is_none() {
            return Err(RuleViolation {
                field: "sku",
                message: "变体行缺少 SKU".to_string(),
            });
        }

        if let Some(retail) = row.number("retail_price") {
            for field in ["wholesale_price", "cost_price"] {
                if let Some(other) = row.number(field) {
                    if retail < other {
                        return Err(RuleViolation {
                            field: "retail_price",
                            message: format!("零售价 {} 低于 {} {}", retail, field, other),
                        });
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(fields: &[(&str, FieldValue)]) -> TransformedRow {
        let mut row = TransformedRow::new(2);
        for (k, v) in fields {
            row.fields.insert(k.to_string(), v.clone());
        }
        row
    }

    #[test]
    fn test_variant_requires_sku() {
        let v = DqValidator::new();
        let variant = row(&[("name", FieldValue::Text("Chair".into()))]);
        assert_eq!(v.validate_row(&variant).unwrap_err().field, "sku");

        let parent = row(&[
            ("name", FieldValue::Text("Chair".into())),
            ("is_parent", FieldValue::Boolean(true)),
        ]);
        assert!(v.validate_row(&parent).is_ok());
    }

    #[test]
    fn test_retail_not_below_wholesale_or_cost() {
        let v = DqValidator::new();
        let ok = row(&[
            ("sku", FieldValue::Text("A1".into())),
            ("retail_price", FieldValue::Decimal("20.00".into())),
            ("wholesale_price", FieldValue::Decimal("12.00".into())),
            ("cost_price", FieldValue::Decimal("8.00".into())),
        ]);
        assert!(v.validate_row(&ok).is_ok());

        let bad = row(&[
            ("sku", FieldValue::Text("A1".into())),
            ("retail_price", FieldValue::Decimal("10.00".into())),
            ("cost_price", FieldValue::Decimal("11.00".into())),
        ]);
        assert_eq!(v.validate_row(&bad).unwrap_err().field, "retail_price");

        // 仅一方存在时不校验
        let partial = row(&[
            ("sku", FieldValue::Text("A1".into())),
            ("wholesale_price", FieldValue::Decimal("99.00".into())),
        ]);
        assert!(v.validate_row(&partial).is_ok());
    }

    #[test]
    fn test_field_validators() {
        let v = DqValidator::new();
        assert!(v
            .validate_field(&FieldValue::Decimal("0.00".into()), &Validator::PositiveNumber)
            .is_err());
        assert!(v
            .validate_field(&FieldValue::Decimal("1.00".into()), &Validator::PositiveNumber)
            .is_ok());
        let colors = Validator::InList(vec!["Red".into(), "Blue".into()]);
        assert!(v.validate_field(&FieldValue::Text("red".into()), &colors).is_ok());
        assert!(v.validate_field(&FieldValue::Text("Green".into()), &colors).is_err());
        assert!(v
            .validate_field(&FieldValue::Text("DUP".into()), &Validator::UniqueSku)
            .is_ok());
    }
}
