// ==========================================
// 商品目录批量导入系统 - 类型转换器
// ==========================================
// 职责: 清洗后的单元格 → 规则声明类型的 FieldValue
// 说明:
// - 文本按字符截断（UTF-8 安全）
// - 整数接受科学计数法与整值浮点
// - 小数按十进制值四舍五入（远离零）后输出固定精度字符串，容忍货币符号与千分位
// - 日期支持 1900/1904 序列号与常见文本格式，统一为 YYYY-MM-DD
// ==========================================

use crate::domain::product::{CellValue, FieldValue};
use crate::importer::error::TransformError;
use crate::importer::field_rules::{FieldRule, FieldType};
use chrono::{Duration, NaiveDate};
use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde_json::Value;
use std::str::FromStr;
use tracing::debug;

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9._%+\-]+@[A-Za-z0-9\-]+(\.[A-Za-z0-9\-]+)*\.[A-Za-z]{2,}$")
        .expect("valid regex")
});

/// 文本日期格式（日/月 优先于 月/日）
const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d", "%Y/%m/%d", "%d/%m/%Y", "%m/%d/%Y", "%d-%m-%Y", "%d.%m.%Y", "%Y%m%d", "%d %b %Y",
    "%d %B %Y", "%b %d, %Y", "%B %d, %Y",
];

/// rust_decimal 支持的最大小数位
const MAX_DECIMAL_SCALE: u32 = 28;

const TRUTHY: &[&str] = &["1", "true", "yes", "on", "active"];

#[derive(Debug, Clone)]
pub struct TypeCaster {
    default_precision: u32,
    date_1904: bool,
}

impl Default for TypeCaster {
    fn default() -> Self {
        Self::new(2, false)
    }
}

impl TypeCaster {
    pub fn new(default_precision: u32, date_1904: bool) -> Self {
        Self {
            default_precision,
            date_1904,
        }
    }

    /// 单值转换（调用方保证非空）
    pub fn cast(&self, cell: &CellValue, rule: &FieldRule) -> Result<FieldValue, TransformError> {
        match &rule.field_type {
            FieldType::String | FieldType::Text => {
                Ok(FieldValue::Text(truncate_chars(&cell.to_text(), rule.max_length)))
            }
            FieldType::Integer { min, max } => {
                let value = self.to_integer(cell)?;
                let (lo, hi) = (min.unwrap_or(i64::MIN), max.unwrap_or(i64::MAX));
                if value < lo || value > hi {
                    return Err(TransformError::OutOfRange {
                        value,
                        min: lo,
                        max: hi,
                    });
                }
                Ok(FieldValue::Integer(value))
            }
            FieldType::Decimal { precision } => {
                let value = self.to_decimal(cell)?;
                let p = precision.unwrap_or(self.default_precision).min(MAX_DECIMAL_SCALE);
                let mut rounded = value.round_dp_with_strategy(p, RoundingStrategy::MidpointAwayFromZero);
                if rounded.is_zero() {
                    rounded = Decimal::ZERO;
                }
                Ok(FieldValue::Decimal(format!("{:.*}", p as usize, rounded)))
            }
            FieldType::Boolean => Ok(FieldValue::Boolean(to_bool(cell))),
            FieldType::Email => {
                let text = cell.to_text();
                if EMAIL_RE.is_match(&text) {
                    Ok(FieldValue::Text(text))
                } else {
                    Err(TransformError::InvalidEmail(text))
                }
            }
            FieldType::Url => {
                let text = cell.to_text();
                match url::Url::parse(&text) {
                    Ok(u) if matches!(u.scheme(), "http" | "https") && u.host().is_some() => {
                        Ok(FieldValue::Text(u.to_string()))
                    }
                    _ => Err(TransformError::InvalidUrl(text)),
                }
            }
            FieldType::Date => self.to_date(cell).map(FieldValue::Date),
            FieldType::Json => to_json(cell).map(FieldValue::Json),
        }
    }

    /// 多列输入（结构化）转换
    ///
    /// - json: 非空项组成数组
    /// - 其余类型: 以空格拼接后按单值转换
    pub fn cast_list(&self, items: &[CellValue], rule: &FieldRule) -> Result<FieldValue, TransformError> {
        let non_blank: Vec<&CellValue> = items.iter().filter(|c| !c.is_blank()).collect();
        match rule.field_type {
            FieldType::Json => Ok(FieldValue::Json(Value::Array(
                non_blank.iter().map(|c| cell_to_json(c)).collect(),
            ))),
            _ => {
                let joined = non_blank
                    .iter()
                    .map(|c| c.to_text())
                    .collect::<Vec<_>>()
                    .join(" ");
                self.cast(&CellValue::String(joined), rule)
            }
        }
    }

    fn to_integer(&self, cell: &CellValue) -> Result<i64, TransformError> {
        let invalid = || TransformError::InvalidType {
            expected: "整数",
            value: cell.to_text(),
        };
        match cell {
            CellValue::Int(i) => Ok(*i),
            CellValue::Float(f) => whole_f64_to_i64(*f).ok_or_else(invalid),
            CellValue::String(s) => {
                let compact: String = s
                    .chars()
                    .filter(|c| !c.is_whitespace() && *c != ',' && *c != '_')
                    .collect();
                if let Ok(i) = compact.parse::<i64>() {
                    return Ok(i);
                }
                // 科学计数法 / 整值小数（1.5E+3、12.0）
                compact
                    .parse::<f64>()
                    .ok()
                    .and_then(whole_f64_to_i64)
                    .ok_or_else(invalid)
            }
            _ => Err(invalid()),
        }
    }

    fn to_decimal(&self, cell: &CellValue) -> Result<Decimal, TransformError> {
        let invalid = || TransformError::InvalidType {
            expected: "小数",
            value: cell.to_text(),
        };
        match cell {
            CellValue::Int(i) => Ok(Decimal::from(*i)),
            // 取最短十进制表示，避免二进制尾差（2.675 → 2.675 而非 2.67499…）
            CellValue::Float(f) if f.is_finite() => Decimal::from_str(&f.to_string())
                .ok()
                .or_else(|| Decimal::from_f64(*f))
                .ok_or_else(invalid),
            CellValue::String(s) => parse_money(s).ok_or_else(invalid),
            _ => Err(invalid()),
        }
    }

    fn to_date(&self, cell: &CellValue) -> Result<String, TransformError> {
        let invalid = || TransformError::InvalidDate(cell.to_text());
        let date = match cell {
            CellValue::DateSerial(f) | CellValue::Float(f) => self.serial_to_date(*f),
            CellValue::Int(i) => self.serial_to_date(*i as f64),
            CellValue::String(s) => parse_text_date(s).or_else(|| {
                s.trim()
                    .parse::<f64>()
                    .ok()
                    .and_then(|f| self.serial_to_date(f))
            }),
            _ => None,
        };
        date.map(|d| d.format("%Y-%m-%d").to_string())
            .ok_or_else(invalid)
    }

    /// 电子表格序列号 → 日期
    ///
    /// 1900 纪元以 1899-12-30 为 0（吸收 1900-02-29 的历史偏差）
    pub fn serial_to_date(&self, serial: f64) -> Option<NaiveDate> {
        if !serial.is_finite() || serial < 0.0 || serial > 2_958_465.0 {
            return None;
        }
        let epoch = if self.date_1904 {
            NaiveDate::from_ymd_opt(1904, 1, 1)?
        } else {
            NaiveDate::from_ymd_opt(1899, 12, 30)?
        };
        epoch.checked_add_signed(Duration::days(serial.floor() as i64))
    }
}

fn whole_f64_to_i64(f: f64) -> Option<i64> {
    if f.is_finite() && f.fract() == 0.0 && f.abs() < 9.0e15 {
        Some(f as i64)
    } else {
        None
    }
}

/// 金额解析: 去除货币符号 / 货币代码 / 千分位；(12.50) 记为负数
fn parse_money(raw: &str) -> Option<Decimal> {
    let trimmed = raw.trim();
    let (negative, body) = match trimmed.strip_prefix('(').and_then(|s| s.strip_suffix(')')) {
        Some(inner) => (true, inner),
        None => (false, trimmed),
    };

    let cleaned: String = body
        .chars()
        .filter(|c| c.is_ascii_digit() || matches!(c, '.' | '-' | '+' | 'e' | 'E'))
        .collect();
    // 货币代码中的 E（如 EUR）会残留，仅在数字之间保留指数符号
    let cleaned = cleaned.trim_matches(|c| c == 'e' || c == 'E').to_string();
    if cleaned.is_empty() || !cleaned.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }
    let cleaned = cleaned.strip_prefix('+').unwrap_or(cleaned.as_str());
    let value = if cleaned.contains(|c| c == 'e' || c == 'E') {
        Decimal::from_scientific(cleaned).ok()?
    } else {
        Decimal::from_str(cleaned).ok()?
    };
    Some(if negative { -value } else { value })
}

fn parse_text_date(raw: &str) -> Option<NaiveDate> {
    let s = raw.trim();
    // ISO 日期时间取日期部分
    let date_part = s
        .split_once('T')
        .map(|(d, _)| d)
        .filter(|d| d.len() == 10)
        .unwrap_or(s);
    let date_part = if date_part.len() > 10 && date_part.as_bytes().get(10) == Some(&b' ') {
        &date_part[..10]
    } else {
        date_part
    };

    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(date_part, fmt).ok())
}

fn to_bool(cell: &CellValue) -> bool {
    match cell {
        CellValue::Bool(b) => *b,
        CellValue::Int(i) => *i == 1,
        CellValue::Float(f) => *f == 1.0,
        CellValue::String(s) => {
            let lower = s.trim().to_lowercase();
            TRUTHY.contains(&lower.as_str())
        }
        _ => false,
    }
}

fn cell_to_json(cell: &CellValue) -> Value {
    match cell {
        CellValue::Empty => Value::Null,
        CellValue::String(s) => Value::String(s.clone()),
        CellValue::Int(i) => Value::from(*i),
        CellValue::Float(f) | CellValue::DateSerial(f) => Value::from(*f),
        CellValue::Bool(b) => Value::Bool(*b),
    }
}

fn to_json(cell: &CellValue) -> Result<Value, TransformError> {
    match cell {
        CellValue::String(s) => {
            serde_json::from_str(s).map_err(|e| TransformError::InvalidJson(e.to_string()))
        }
        other => Ok(cell_to_json(other)),
    }
}

fn truncate_chars(text: &str, max_length: Option<usize>) -> String {
    match max_length {
        Some(max) if text.chars().count() > max => {
            debug!(max_length = max, original_len = text.chars().count(), "文本超长已截断");
            text.chars().take(max).collect()
        }
        _ => text.to_string(),
    }
}
