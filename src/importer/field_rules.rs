// ==========================================
// 商品目录批量导入系统 - 字段规则注册表
// ==========================================
// 职责: 声明已知字段的类型 / 可空 / 必填 / 长度 / 清洗器 / 校验器
// 约定: 规则表只构建一次；清洗器与校验器为带标签的枚举，
//       配置中的名称通过 FromStr 在启动时解析
// ==========================================

use crate::importer::error::ImportError;
use std::collections::HashMap;
use std::str::FromStr;

// ==========================================
// FieldType - 字段类型
// ==========================================
#[derive(Debug, Clone, PartialEq)]
pub enum FieldType {
    String,
    Text,
    Integer { min: Option<i64>, max: Option<i64> },
    Decimal { precision: Option<u32> },
    Boolean,
    Email,
    Url,
    Date,
    Json,
}

impl FieldType {
    pub fn name(&self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Text => "text",
            FieldType::Integer { .. } => "integer",
            FieldType::Decimal { .. } => "decimal",
            FieldType::Boolean => "boolean",
            FieldType::Email => "email",
            FieldType::Url => "url",
            FieldType::Date => "date",
            FieldType::Json => "json",
        }
    }
}

// ==========================================
// Sanitizer - 字段级清洗器（按声明顺序执行）
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sanitizer {
    AlphanumericOnly,
    NumericOnly,
    AlphaOnly,
    Slugify,
    Email,
    Url,
    Phone,
    SkuUppercase,
}

impl FromStr for Sanitizer {
    type Err = ImportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "alphanumeric_only" | "alphanumeric" => Ok(Sanitizer::AlphanumericOnly),
            "numeric_only" | "numeric" => Ok(Sanitizer::NumericOnly),
            "alpha_only" | "alpha" => Ok(Sanitizer::AlphaOnly),
            "slugify" | "slug" => Ok(Sanitizer::Slugify),
            "email" => Ok(Sanitizer::Email),
            "url" => Ok(Sanitizer::Url),
            "phone" => Ok(Sanitizer::Phone),
            "sku_uppercase" | "sku" => Ok(Sanitizer::SkuUppercase),
            other => Err(ImportError::RuleConfigError(format!("未知清洗器: {}", other))),
        }
    }
}

// ==========================================
// Validator - 字段级校验器
// ==========================================
#[derive(Debug, Clone, PartialEq)]
pub enum Validator {
    PositiveNumber,
    InList(Vec<String>),
    /// 持久化层扩展点，转换阶段直接放行
    UniqueSku,
}

impl FromStr for Validator {
    type Err = ImportError;

    /// 支持 `positive_number` / `unique_sku` / `in_list:a|b|c`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some(list) = s.strip_prefix("in_list:") {
            let items: Vec<String> = list
                .split('|')
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .collect();
            if items.is_empty() {
                return Err(ImportError::RuleConfigError("in_list 为空".to_string()));
            }
            return Ok(Validator::InList(items));
        }
        match s.to_ascii_lowercase().as_str() {
            "positive_number" | "positive" => Ok(Validator::PositiveNumber),
            "unique_sku" => Ok(Validator::UniqueSku),
            other => Err(ImportError::RuleConfigError(format!("未知校验器: {}", other))),
        }
    }
}

// ==========================================
// FieldRule - 单字段规则
// ==========================================
#[derive(Debug, Clone, PartialEq)]
pub struct FieldRule {
    pub field_type: FieldType,
    pub nullable: bool,
    pub required: bool,
    pub max_length: Option<usize>,
    pub sanitizers: Vec<Sanitizer>,
    pub validators: Vec<Validator>,
}

impl FieldRule {
    pub fn new(field_type: FieldType) -> Self {
        Self {
            field_type,
            nullable: true,
            required: false,
            max_length: None,
            sanitizers: Vec::new(),
            validators: Vec::new(),
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self.nullable = false;
        self
    }

    pub fn max_length(mut self, n: usize) -> Self {
        self.max_length = Some(n);
        self
    }

    pub fn sanitize_with(mut self, sanitizer: Sanitizer) -> Self {
        self.sanitizers.push(sanitizer);
        self
    }

    pub fn validate_with(mut self, validator: Validator) -> Self {
        self.validators.push(validator);
        self
    }
}

// ==========================================
// FieldRuleSet - 规则注册表
// ==========================================
#[derive(Debug, Clone, Default)]
pub struct FieldRuleSet {
    rules: HashMap<String, FieldRule>,
}

impl FieldRuleSet {
    pub fn empty() -> Self {
        Self::default()
    }

    /// 商品目录字段集
    ///
    /// # 参数
    /// - decimal_precision: 金额/重量的默认小数位
    pub fn default_catalog(decimal_precision: u32) -> Self {
        let money = || {
            FieldRule::new(FieldType::Decimal {
                precision: Some(decimal_precision),
            })
            .validate_with(Validator::PositiveNumber)
        };

        let mut set = Self::empty();
        set.insert(
            "sku",
            FieldRule::new(FieldType::String)
                .max_length(64)
                .sanitize_with(Sanitizer::SkuUppercase)
                .validate_with(Validator::UniqueSku),
        );
        set.insert(
            "parent_sku",
            FieldRule::new(FieldType::String)
                .max_length(64)
                .sanitize_with(Sanitizer::SkuUppercase),
        );
        set.insert("name", FieldRule::new(FieldType::String).required().max_length(255));
        set.insert("parent_name", FieldRule::new(FieldType::String).max_length(255));
        set.insert("description", FieldRule::new(FieldType::Text).max_length(10_000));
        set.insert("color", FieldRule::new(FieldType::String).max_length(64));
        set.insert("size", FieldRule::new(FieldType::String).max_length(64));
        set.insert("retail_price", money());
        set.insert("wholesale_price", money());
        set.insert("cost_price", money());
        set.insert(
            "stock_quantity",
            FieldRule::new(FieldType::Integer {
                min: Some(0),
                max: Some(10_000_000),
            }),
        );
        set.insert("weight", money());
        set.insert(
            "barcode",
            FieldRule::new(FieldType::String)
                .max_length(32)
                .sanitize_with(Sanitizer::NumericOnly),
        );
        set.insert("is_parent", FieldRule::new(FieldType::Boolean));
        set.insert("image_urls", FieldRule::new(FieldType::Json));
        set
    }

    pub fn insert(&mut self, field: &str, rule: FieldRule) {
        self.rules.insert(field.to_string(), rule);
    }

    pub fn get(&self, field: &str) -> Option<&FieldRule> {
        self.rules.get(field)
    }

    /// 全部必填字段
    pub fn required_fields(&self) -> impl Iterator<Item = &str> {
        self.rules
            .iter()
            .filter(|(_, r)| r.required)
            .map(|(f, _)| f.as_str())
    }

    /// 用配置中的名称覆盖某字段的清洗器
    pub fn override_sanitizers(&mut self, field: &str, names: &[&str]) -> Result<(), ImportError> {
        let parsed = names
            .iter()
            .map(|n| n.parse::<Sanitizer>())
            .collect::<Result<Vec<_>, _>>()?;
        let rule = self
            .rules
            .get_mut(field)
            .ok_or_else(|| ImportError::RuleConfigError(format!("未声明字段: {}", field)))?;
        rule.sanitizers = parsed;
        Ok(())
    }
}
