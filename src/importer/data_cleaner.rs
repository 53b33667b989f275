// ==========================================
// 商品目录批量导入系统 - 数据清洗器
// ==========================================
// 职责: 文本输入的通用清洗 + 字段级清洗器
// 顺序:
// 1. 去除零宽字符 / 控制字符 / BOM
// 2. 折叠空白
// 3. NFC 规范化
// 4. 目标编码转换（UTF-8 原样 / ASCII 折叠）
// 5. 字段级清洗器（按声明顺序）
// ==========================================

use crate::domain::types::TargetEncoding;
use crate::importer::field_rules::Sanitizer;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

#[derive(Debug, Clone, Default)]
pub struct DataCleaner {
    target_encoding: TargetEncoding,
}

fn is_invisible(c: char) -> bool {
    matches!(
        c,
        '\u{200B}' | '\u{200C}' | '\u{200D}' | '\u{2060}' | '\u{FEFF}' | '\u{00AD}'
    )
}

impl DataCleaner {
    pub fn new(target_encoding: TargetEncoding) -> Self {
        Self { target_encoding }
    }

    /// 通用清洗（步骤 1-4），结果为空表示 NULL
    pub fn clean_text(&self, raw: &str) -> String {
        // 控制字符中的空白（\t \n \r）先转为空格，其余直接丢弃
        let stripped: String = raw
            .chars()
            .filter(|c| !is_invisible(*c))
            .filter_map(|c| {
                if c.is_whitespace() {
                    Some(' ')
                } else if c.is_control() {
                    None
                } else {
                    Some(c)
                }
            })
            .collect();

        let collapsed = stripped.split_whitespace().collect::<Vec<_>>().join(" ");
        let normalized: String = collapsed.nfc().collect();

        match self.target_encoding {
            TargetEncoding::Utf8 => normalized,
            TargetEncoding::Ascii => fold_to_ascii(&normalized),
        }
    }

    /// 字段级清洗器
    pub fn apply_sanitizer(&self, value: &str, sanitizer: Sanitizer) -> String {
        match sanitizer {
            Sanitizer::AlphanumericOnly => value.chars().filter(|c| c.is_alphanumeric()).collect(),
            Sanitizer::NumericOnly => value.chars().filter(|c| c.is_ascii_digit()).collect(),
            Sanitizer::AlphaOnly => {
                let kept: String = value
                    .chars()
                    .filter(|c| c.is_alphabetic() || *c == ' ')
                    .collect();
                kept.split_whitespace().collect::<Vec<_>>().join(" ")
            }
            Sanitizer::Slugify => slugify(value),
            Sanitizer::Email => {
                let v = value.trim();
                let v = v
                    .strip_prefix("mailto:")
                    .or_else(|| v.strip_prefix("MAILTO:"))
                    .unwrap_or(v);
                v.chars()
                    .filter(|c| !c.is_whitespace())
                    .collect::<String>()
                    .to_lowercase()
            }
            Sanitizer::Url => {
                let v: String = value.chars().filter(|c| !c.is_whitespace()).collect();
                if v.is_empty() || v.contains("://") {
                    v
                } else if let Some(rest) = v.strip_prefix("//") {
                    format!("https://{}", rest)
                } else if v.contains('.') && !v.contains('@') {
                    format!("https://{}", v)
                } else {
                    v
                }
            }
            Sanitizer::Phone => {
                let trimmed = value.trim();
                let digits: String = trimmed.chars().filter(|c| c.is_ascii_digit()).collect();
                if trimmed.starts_with('+') {
                    format!("+{}", digits)
                } else {
                    digits
                }
            }
            Sanitizer::SkuUppercase => value
                .chars()
                .filter(|c| !c.is_whitespace())
                .collect::<String>()
                .to_uppercase(),
        }
    }

    /// 通用清洗 + 字段级清洗器
    pub fn sanitize(&self, raw: &str, sanitizers: &[Sanitizer]) -> String {
        sanitizers
            .iter()
            .fold(self.clean_text(raw), |acc, s| self.apply_sanitizer(&acc, *s))
    }
}

/// ASCII 折叠: 分解后去除组合符号，丢弃其余非 ASCII 字符
fn fold_to_ascii(value: &str) -> String {
    let folded: String = value
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .filter(|c| c.is_ascii())
        .collect();
    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn slugify(value: &str) -> String {
    let mut slug = String::with_capacity(value.len());
    let mut pending_dash = false;
    for c in fold_to_ascii(value).chars() {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }
    slug
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_text_strips_invisible_and_collapses() {
        let cleaner = DataCleaner::default();
        assert_eq!(
            cleaner.clean_text("\u{feff}  Oak\u{200b} \t Table\r\n  "),
            "Oak Table"
        );
        assert_eq!(cleaner.clean_text(" \u{200b} "), "");
    }

    #[test]
    fn test_nfc_and_ascii_fold() {
        // e + 组合重音 → é
        let decomposed = "Cafe\u{301}";
        assert_eq!(DataCleaner::default().clean_text(decomposed), "Café");
        assert_eq!(
            DataCleaner::new(TargetEncoding::Ascii).clean_text("Crème Brûlée ✓"),
            "Creme Brulee"
        );
    }

    #[test]
    fn test_field_sanitizers() {
        let c = DataCleaner::default();
        assert_eq!(c.apply_sanitizer("ab-12 x", Sanitizer::SkuUppercase), "AB-12X");
        assert_eq!(c.apply_sanitizer("50-12 345", Sanitizer::NumericOnly), "5012345");
        assert_eq!(c.apply_sanitizer("Oak & Pine Table!", Sanitizer::Slugify), "oak-pine-table");
        assert_eq!(c.apply_sanitizer(" mailto:Sales@Shop.COM ", Sanitizer::Email), "sales@shop.com");
        assert_eq!(c.apply_sanitizer("shop.com/a.jpg", Sanitizer::Url), "https://shop.com/a.jpg");
        assert_eq!(c.apply_sanitizer("+44 (0)20 7946-0958", Sanitizer::Phone), "+4402079460958");
        assert_eq!(c.apply_sanitizer("Red 2", Sanitizer::AlphaOnly), "Red");
        assert_eq!(c.apply_sanitizer("A-1 b", Sanitizer::AlphanumericOnly), "A1b");
    }

    #[test]
    fn test_sanitize_applies_in_order() {
        let c = DataCleaner::default();
        let out = c.sanitize("  ab 12  ", &[Sanitizer::AlphanumericOnly, Sanitizer::SkuUppercase]);
        assert_eq!(out, "AB12");
    }
}
