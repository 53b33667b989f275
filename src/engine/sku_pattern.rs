// ==========================================
// 商品目录批量导入系统 - SKU 模式提取
// ==========================================
// 职责: 从变体 SKU 中提取分组键（父商品 SKU 候选）
// 优先级（首个命中即返回）:
// 1. NNN-NNN            → 前段数字          (123-456    → 123)
// 2. 字母+数字           → 字母前缀          (ABC123     → ABC)
// 3. 数字+字母-后缀      → 字母 + 后缀       (12AB-XL    → AB-XL)
// 4. 数字+字母           → 字母              (12AB       → AB)
// ==========================================

use once_cell::sync::Lazy;
use regex::Regex;

static PATTERNS: Lazy<Vec<(SkuPattern, Regex)>> = Lazy::new(|| {
    vec![
        (SkuPattern::NumericPair, Regex::new(r"^(\d{3})-(\d{3})$").expect("valid regex")),
        (SkuPattern::LettersDigits, Regex::new(r"^([A-Za-z]+)(\d+)$").expect("valid regex")),
        (
            SkuPattern::DigitsLettersSuffix,
            Regex::new(r"^(\d+)([A-Za-z]+)(-[A-Za-z0-9]+)$").expect("valid regex"),
        ),
        (SkuPattern::DigitsLetters, Regex::new(r"^(\d+)([A-Za-z]+)$").expect("valid regex")),
    ]
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkuPattern {
    NumericPair,
    LettersDigits,
    DigitsLettersSuffix,
    DigitsLetters,
}

/// 分组键及命中的模式
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkuKey {
    pub key: String,
    pub pattern: SkuPattern,
}

/// 提取 SKU 分组键（大小写不敏感，键统一大写）
pub fn extract_sku_key(sku: &str) -> Option<SkuKey> {
    let sku = sku.trim();
    if sku.is_empty() {
        return None;
    }

    PATTERNS.iter().find_map(|(pattern, re)| {
        let caps = re.captures(sku)?;
        let key = match pattern {
            SkuPattern::NumericPair => caps[1].to_string(),
            SkuPattern::LettersDigits => caps[1].to_string(),
            SkuPattern::DigitsLettersSuffix => format!("{}{}", &caps[2], &caps[3]),
            SkuPattern::DigitsLetters => caps[2].to_string(),
        };
        Some(SkuKey {
            key: key.to_uppercase(),
            pattern: *pattern,
        })
    })
}
