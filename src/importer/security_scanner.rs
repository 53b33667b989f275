// ==========================================
// 商品目录批量导入系统 - 内容安全扫描
// ==========================================
// 规则:
// - 脚本 / HTML 注入载荷: 整行拒绝
// - 电子表格公式注入（= @ 开头，或 + - 后接字母/括号）: 前置单引号中和
// ==========================================

use crate::domain::product::{FieldValue, RawRow, TransformedRow};
use crate::importer::importer_trait::{ContentScanner, ScanVerdict};
use once_cell::sync::Lazy;
use regex::Regex;

static INJECTION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(<\s*script\b|<\s*iframe\b|javascript\s*:|vbscript\s*:|data\s*:\s*text/html|\bon(load|error|click|mouseover|focus)\s*=)",
    )
    .expect("valid regex")
});

fn looks_like_formula(text: &str) -> bool {
    let mut chars = text.chars();
    match chars.next() {
        Some('=') | Some('@') => true,
        Some('+') | Some('-') => chars
            .next()
            .is_some_and(|c| c.is_alphabetic() || c == '('),
        _ => false,
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PatternContentScanner;

impl PatternContentScanner {
    pub fn new() -> Self {
        Self
    }
}

impl ContentScanner for PatternContentScanner {
    fn scan_raw(&self, row: &RawRow) -> ScanVerdict {
        for (column, cell) in row.cells.iter().enumerate() {
            let text = cell.to_text();
            if INJECTION_RE.is_match(&text) {
                return ScanVerdict::Rejected {
                    field: Some(format!("column_{}", column)),
                    reason: "检测到脚本注入内容".to_string(),
                };
            }
        }
        ScanVerdict::Clean
    }

    fn scan_transformed(&self, row: &mut TransformedRow) -> ScanVerdict {
        let mut neutralised = Vec::new();

        for (field, value) in row.fields.iter_mut() {
            if let FieldValue::Text(text) = value {
                if INJECTION_RE.is_match(text) {
                    return ScanVerdict::Rejected {
                        field: Some(field.clone()),
                        reason: "检测到脚本注入内容".to_string(),
                    };
                }
                if looks_like_formula(text) {
                    text.insert(0, '\'');
                    neutralised.push(field.clone());
                }
            }
        }

        if neutralised.is_empty() {
            ScanVerdict::Clean
        } else {
            tracing::debug!(row = row.row_number, fields = ?neutralised, "公式注入已中和");
            ScanVerdict::Neutralised {
                fields: neutralised,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::product::CellValue;

    #[test]
    fn test_rejects_script_payloads() {
        let scanner = PatternContentScanner::new();
        let row = RawRow::new(
            3,
            vec![
                CellValue::String("A1".into()),
                CellValue::String("<SCRIPT>alert(1)</script>".into()),
            ],
        );
        assert!(scanner.scan_raw(&row).is_rejected());

        let clean = RawRow::new(4, vec![CellValue::String("Oak table, 120 x 60".into())]);
        assert_eq!(scanner.scan_raw(&clean), ScanVerdict::Clean);
    }

    #[test]
    fn test_neutralises_formula_injection() {
        let scanner = PatternContentScanner::new();
        let mut row = TransformedRow::new(2);
        row.fields
            .insert("name".into(), FieldValue::Text("=HYPERLINK(\"x\")".into()));
        row.fields
            .insert("size".into(), FieldValue::Text("-10 cm".into()));

        let verdict = scanner.scan_transformed(&mut row);
        assert_eq!(
            verdict,
            ScanVerdict::Neutralised {
                fields: vec!["name".into()]
            }
        );
        assert_eq!(row.text("name"), Some("'=HYPERLINK(\"x\")"));
        assert_eq!(row.text("size"), Some("-10 cm"));
    }
}
