// ==========================================
// 商品目录批量导入系统 - 属性推断
// ==========================================
// 职责:
// - 从名称 / 尺码文本中推断宽度与垂长（cm）
//   1. "W x D" 成对出现: 前者为宽，后者为垂长
//   2. 单个带单位的度量: ≥ 垂长阈值判定为垂长，否则为宽
// - 汇总分组属性: 宽度/垂长范围、可选颜色、可选尺码
// 单位: cm（默认）/ mm / m / in / "
// ==========================================

use crate::domain::product::TransformedRow;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet};

static PAIR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?i)(\d+(?:\.\d+)?)\s*(cm|mm|m|in|inch|inches|")?\s*[x×]\s*(\d+(?:\.\d+)?)\s*(cm|mm|m|in|inch|inches|")?"#,
    )
    .expect("valid regex")
});

static SINGLE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)(\d+(?:\.\d+)?)\s*(cm|mm|m|inch|inches|in|")(?:\b|$|\s)"#).expect("valid regex")
});

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Measurements {
    pub width_cm: Option<f64>,
    pub drop_cm: Option<f64>,
}

impl Measurements {
    pub fn is_empty(&self) -> bool {
        self.width_cm.is_none() && self.drop_cm.is_none()
    }
}

fn to_cm(value: f64, unit: Option<&str>) -> f64 {
    let cm = match unit.map(str::to_ascii_lowercase).as_deref() {
        Some("mm") => value / 10.0,
        Some("m") => value * 100.0,
        Some("in") | Some("inch") | Some("inches") | Some("\"") => value * 2.54,
        _ => value,
    };
    (cm * 10.0).round() / 10.0
}

/// 从单段文本解析度量
pub fn parse_measurements(text: &str, drop_threshold_cm: f64) -> Measurements {
    if let Some(caps) = PAIR_RE.captures(text) {
        let second_unit = caps.get(4).map(|m| m.as_str());
        let first_unit = caps.get(2).map(|m| m.as_str()).or(second_unit);
        let width = caps[1].parse::<f64>().ok().map(|v| to_cm(v, first_unit));
        let drop = caps[3].parse::<f64>().ok().map(|v| to_cm(v, second_unit));
        return Measurements {
            width_cm: width,
            drop_cm: drop,
        };
    }

    if let Some(caps) = SINGLE_RE.captures(text) {
        if let Ok(value) = caps[1].parse::<f64>() {
            let cm = to_cm(value, caps.get(2).map(|m| m.as_str()));
            return if cm >= drop_threshold_cm {
                Measurements {
                    width_cm: None,
                    drop_cm: Some(cm),
                }
            } else {
                Measurements {
                    width_cm: Some(cm),
                    drop_cm: None,
                }
            };
        }
    }

    Measurements::default()
}

/// 行级推断: 先看名称，再看尺码字段
pub fn infer_row_measurements(row: &TransformedRow, drop_threshold_cm: f64) -> Measurements {
    ["name", "size"]
        .iter()
        .filter_map(|f| row.text(f))
        .map(|t| parse_measurements(t, drop_threshold_cm))
        .find(|m| !m.is_empty())
        .unwrap_or_default()
}

fn range(values: &[f64]) -> Option<Value> {
    let min = values.iter().copied().reduce(f64::min)?;
    let max = values.iter().copied().reduce(f64::max)?;
    Some(json!({ "min": min, "max": max }))
}

/// 分组属性汇总
pub fn infer_group_attributes(
    members: &[&TransformedRow],
    drop_threshold_cm: f64,
) -> BTreeMap<String, Value> {
    let mut widths = Vec::new();
    let mut drops = Vec::new();
    let mut colors = BTreeSet::new();
    let mut sizes = BTreeSet::new();

    for row in members {
        let m = infer_row_measurements(row, drop_threshold_cm);
        widths.extend(m.width_cm);
        drops.extend(m.drop_cm);
        if let Some(c) = row.text("color") {
            colors.insert(c.to_string());
        }
        if let Some(s) = row.text("size") {
            sizes.insert(s.to_string());
        }
    }

    let mut attrs = BTreeMap::new();
    if let Some(r) = range(&widths) {
        attrs.insert("width_range_cm".to_string(), r);
    }
    if let Some(r) = range(&drops) {
        attrs.insert("drop_range_cm".to_string(), r);
    }
    if !colors.is_empty() {
        attrs.insert("available_colors".to_string(), json!(colors));
    }
    if !sizes.is_empty() {
        attrs.insert("available_sizes".to_string(), json!(sizes));
    }
    attrs
}
