// ==========================================
// 商品目录批量导入系统 - 名称相似度
// ==========================================
// 职责: 变体名称归一 / 相似判定 / 父商品名称推导
// 相似判定（任一成立）:
// 1. 规范化后完全相同
// 2. 去除变体词（颜色 / 尺码 / 度量 / 件数 / 纯数字）后基名相同
// 3. 基名词集 Jaccard ≥ 0.7
// 4. 基名字符相似度 ≥ 0.8 且词相似度 ≥ 0.5
// ==========================================

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{BTreeSet, HashMap};

pub const WORD_SIMILARITY_THRESHOLD: f64 = 0.7;
pub const CHAR_SIMILARITY_THRESHOLD: f64 = 0.8;
pub const CHAR_PATH_WORD_FLOOR: f64 = 0.5;

const COLORS: &[&str] = &[
    "black", "white", "red", "blue", "green", "yellow", "grey", "gray", "silver", "gold", "pink",
    "purple", "orange", "brown", "beige", "cream", "ivory", "navy", "teal", "charcoal", "natural",
    "taupe", "mustard", "ochre", "sage", "duck", "egg", "blush", "aqua", "lilac", "mink", "stone",
    "multi", "multicolour", "multicolor", "light", "dark",
];

const SIZES: &[&str] = &[
    "xxs", "xs", "s", "m", "l", "xl", "xxl", "xxxl", "small", "medium", "large", "extra", "single",
    "double", "king", "superking", "queen", "mini", "standard", "x",
];

static MEASURE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\d+(\.\d+)?(x\d+(\.\d+)?)*(cm|mm|m|in|inch|inches|ft|kg|g|ml|l|pk|pack|pcs|pc)?$")
        .expect("valid regex")
});

const UNITS: &[&str] = &["cm", "mm", "in", "inch", "inches", "ft", "kg", "g", "ml", "pk", "pcs"];

/// 分词（保留原大小写）
fn tokens(name: &str) -> Vec<&str> {
    name.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .collect()
}

/// 是否为变体词（参数为小写）
pub fn is_variant_token(token: &str) -> bool {
    COLORS.contains(&token)
        || SIZES.contains(&token)
        || UNITS.contains(&token)
        || MEASURE_RE.is_match(token)
}

/// 规范化: 小写 + 标点折叠为空格
pub fn normalize_name(name: &str) -> String {
    tokens(name)
        .into_iter()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// 去除变体词后的基名词序列（小写）
pub fn base_words(name: &str) -> Vec<String> {
    let lowered: Vec<String> = tokens(name).into_iter().map(str::to_lowercase).collect();
    let mut words = Vec::with_capacity(lowered.len());
    let mut i = 0;
    while i < lowered.len() {
        let token = lowered[i].as_str();
        // "pack of 4" / "set of 2"
        if matches!(token, "pack" | "set")
            && lowered.get(i + 1).map(String::as_str) == Some("of")
            && lowered.get(i + 2).is_some_and(|n| n.chars().all(|c| c.is_ascii_digit()))
        {
            i += 3;
            continue;
        }
        if !is_variant_token(token) {
            words.push(lowered[i].clone());
        }
        i += 1;
    }
    words
}

pub fn base_name(name: &str) -> String {
    base_words(name).join(" ")
}

/// 基名词集 Jaccard
pub fn word_similarity(a: &str, b: &str) -> f64 {
    let wa: BTreeSet<String> = base_words(a).into_iter().collect();
    let wb: BTreeSet<String> = base_words(b).into_iter().collect();
    if wa.is_empty() && wb.is_empty() {
        return 0.0;
    }
    let inter = wa.intersection(&wb).count() as f64;
    let union = wa.union(&wb).count() as f64;
    inter / union
}

/// 基名字符相似度（归一化编辑距离）
pub fn char_similarity(a: &str, b: &str) -> f64 {
    let (ba, bb) = (base_name(a), base_name(b));
    if ba.is_empty() || bb.is_empty() {
        return 0.0;
    }
    strsim::normalized_levenshtein(&ba, &bb)
}

/// 两个名称是否属于同一父商品
pub fn names_similar(a: &str, b: &str) -> bool {
    let (na, nb) = (normalize_name(a), normalize_name(b));
    if na.is_empty() || nb.is_empty() {
        return false;
    }
    if na == nb {
        return true;
    }

    let (ba, bb) = (base_name(a), base_name(b));
    if !ba.is_empty() && ba == bb {
        return true;
    }

    let words = word_similarity(a, b);
    if words >= WORD_SIMILARITY_THRESHOLD {
        return true;
    }
    words >= CHAR_PATH_WORD_FLOOR && char_similarity(a, b) >= CHAR_SIMILARITY_THRESHOLD
}

// ==========================================
// 父商品名称推导
// ==========================================
// 顺序: 词集交集（首成员大小写）→ 最长公共子串 → 高频非变体词 → 首成员名称
pub fn derive_parent_name(names: &[&str]) -> String {
    let Some(first) = names.first() else {
        return String::new();
    };

    if let Some(name) = common_words(names) {
        return name;
    }
    if let Some(name) = longest_common_substring(names) {
        return name;
    }
    if let Some(name) = frequent_words(names) {
        return name;
    }
    first.trim().to_string()
}

fn common_words(names: &[&str]) -> Option<String> {
    let first = names.first()?;
    let sets: Vec<BTreeSet<String>> = names[1..]
        .iter()
        .map(|n| base_words(n).into_iter().collect())
        .collect();

    let mut seen = BTreeSet::new();
    let kept: Vec<&str> = tokens(first)
        .into_iter()
        .filter(|t| {
            let lower = t.to_lowercase();
            !is_variant_token(&lower)
                && sets.iter().all(|s| s.contains(&lower))
                && seen.insert(lower)
        })
        .collect();

    if kept.is_empty() {
        None
    } else {
        Some(kept.join(" "))
    }
}

fn longest_common_substring(names: &[&str]) -> Option<String> {
    let first: Vec<char> = names.first()?.chars().collect();
    let others: Vec<String> = names[1..].iter().map(|n| n.to_lowercase()).collect();

    for len in (3..=first.len()).rev() {
        for start in 0..=(first.len() - len) {
            let candidate: String = first[start..start + len].iter().collect();
            let lower = candidate.to_lowercase();
            if others.iter().all(|o| o.contains(&lower)) {
                let trimmed = candidate.trim_matches(|c: char| !c.is_alphanumeric());
                if trimmed.chars().count() >= 3 && !base_words(trimmed).is_empty() {
                    return Some(trimmed.to_string());
                }
            }
        }
    }
    None
}

fn frequent_words(names: &[&str]) -> Option<String> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    let mut order: Vec<(String, String)> = Vec::new();

    for name in names {
        let mut in_name = BTreeSet::new();
        for token in tokens(name) {
            let lower = token.to_lowercase();
            if is_variant_token(&lower) || !in_name.insert(lower.clone()) {
                continue;
            }
            let count = counts.entry(lower.clone()).or_insert(0);
            if *count == 0 {
                order.push((lower, token.to_string()));
            }
            *count += 1;
        }
    }

    let best = counts.values().copied().max().filter(|m| *m >= 2)?;
    let words: Vec<String> = order
        .into_iter()
        .filter(|(lower, _)| counts.get(lower) == Some(&best))
        .map(|(_, original)| original)
        .collect();
    if words.is_empty() {
        None
    } else {
        Some(words.join(" "))
    }
}
