// ==========================================
// 商品目录批量导入系统 - 配置管理器
// ==========================================
// 职责: 配置加载、查询、覆写管理
// 存储: config_kv 表 (key-value + scope)
// ==========================================

use crate::config::import_config::ImportConfig;
use crate::config::import_config_trait::ImportConfigReader;
use crate::db::open_sqlite_connection;
use crate::domain::types::TargetEncoding;
use crate::importer::error::{ImportError, ImportOutcome};
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

// ==========================================
// ConfigManager - 配置管理器
// ==========================================
pub struct ConfigManager {
    conn: Arc<Mutex<Connection>>,
}

impl ConfigManager {
    /// 创建新的 ConfigManager 实例
    ///
    /// # 参数
    /// - db_path: 数据库文件路径
    pub fn new(db_path: &str) -> ImportOutcome<Self> {
        let conn = open_sqlite_connection(db_path)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// 从已有连接创建 ConfigManager
    ///
    /// 说明：为保证连接行为一致，会对传入连接再次应用统一 PRAGMA（幂等）。
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> ImportOutcome<Self> {
        {
            let conn_guard = conn.lock().map_err(|e| ImportError::ConfigReadError {
                key: "*".to_string(),
                message: format!("锁获取失败: {}", e),
            })?;
            crate::db::configure_sqlite_connection(&conn_guard)?;
        }

        Ok(Self { conn })
    }

    /// 从 config_kv 表读取配置值（scope_id='global'）
    ///
    /// # 返回
    /// - Some(String): 配置值
    /// - None: 配置不存在
    fn get_config_value(&self, key: &str) -> ImportOutcome<Option<String>> {
        let conn = self.conn.lock().map_err(|e| ImportError::ConfigReadError {
            key: key.to_string(),
            message: format!("锁获取失败: {}", e),
        })?;

        conn.query_row(
            "SELECT value FROM config_kv WHERE scope_id = 'global' AND key = ?1",
            params![key],
            |row| row.get::<_, String>(0),
        )
        .optional()
        .map_err(|e| ImportError::ConfigReadError {
            key: key.to_string(),
            message: e.to_string(),
        })
    }

    /// 读取 global scope 的配置值（公开方法，供其他模块复用）
    pub fn get_global_config_value(&self, key: &str) -> ImportOutcome<Option<String>> {
        self.get_config_value(key)
    }

    /// 写入 global scope 配置（UPSERT）
    pub fn set_global_config_value(&self, key: &str, value: &str) -> ImportOutcome<()> {
        let conn = self.conn.lock().map_err(|e| ImportError::ConfigReadError {
            key: key.to_string(),
            message: format!("锁获取失败: {}", e),
        })?;

        conn.execute(
            "INSERT INTO config_kv (scope_id, key, value) VALUES ('global', ?1, ?2)
             ON CONFLICT(scope_id, key) DO UPDATE SET value = ?2, updated_at = datetime('now')",
            params![key, value],
        )?;
        Ok(())
    }

    /// 读取并解析配置值，缺失时返回默认值
    ///
    /// # 错误
    /// - 值存在但无法解析: ConfigValueError
    fn get_parsed_or<T>(&self, key: &str, default: T) -> ImportOutcome<T>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get_config_value(key)? {
            None => Ok(default),
            Some(raw) => raw
                .trim()
                .parse::<T>()
                .map_err(|e| ImportError::ConfigValueError {
                    key: key.to_string(),
                    value: raw.clone(),
                    message: e.to_string(),
                }),
        }
    }

    /// 获取所有 global 配置的快照
    pub fn get_config_snapshot(&self) -> ImportOutcome<BTreeMap<String, String>> {
        let conn = self.conn.lock().map_err(|e| ImportError::ConfigReadError {
            key: "*".to_string(),
            message: format!("锁获取失败: {}", e),
        })?;

        let mut stmt =
            conn.prepare("SELECT key, value FROM config_kv WHERE scope_id = 'global' ORDER BY key")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut snapshot = BTreeMap::new();
        for row in rows {
            let (key, value) = row?;
            snapshot.insert(key, value);
        }
        Ok(snapshot)
    }
}

// ==========================================
// ImportConfigReader 实现
// ==========================================
#[async_trait]
impl ImportConfigReader for ConfigManager {
    async fn get_memory_limit_bytes(&self) -> ImportOutcome<u64> {
        let default = ImportConfig::default().memory_limit_bytes;
        self.get_parsed_or(config_keys::MEMORY_LIMIT_BYTES, default)
    }

    async fn get_chunk_bounds(&self) -> ImportOutcome<(usize, usize)> {
        let defaults = ImportConfig::default();
        let min = self.get_parsed_or(config_keys::MIN_CHUNK_SIZE, defaults.min_chunk_size)?;
        let max = self.get_parsed_or(config_keys::MAX_CHUNK_SIZE, defaults.max_chunk_size)?;
        if min == 0 || min > max {
            return Err(ImportError::ConfigValueError {
                key: config_keys::MIN_CHUNK_SIZE.to_string(),
                value: format!("{}..{}", min, max),
                message: "分块下界必须大于 0 且不超过上界".to_string(),
            });
        }
        Ok((min, max))
    }

    async fn get_drop_threshold_cm(&self) -> ImportOutcome<f64> {
        let default = ImportConfig::default().drop_threshold_cm;
        self.get_parsed_or(config_keys::DROP_THRESHOLD_CM, default)
    }

    async fn get_target_encoding(&self) -> ImportOutcome<TargetEncoding> {
        match self.get_config_value(config_keys::TARGET_ENCODING)? {
            None => Ok(TargetEncoding::default()),
            Some(raw) => TargetEncoding::parse(&raw).ok_or_else(|| ImportError::ConfigValueError {
                key: config_keys::TARGET_ENCODING.to_string(),
                value: raw.clone(),
                message: "仅支持 utf8 / ascii".to_string(),
            }),
        }
    }

    async fn get_retention_hours(&self) -> ImportOutcome<i64> {
        let default = ImportConfig::default().retention_hours;
        self.get_parsed_or(config_keys::RETENTION_HOURS, default)
    }

    async fn load_import_config(&self) -> ImportOutcome<ImportConfig> {
        let d = ImportConfig::default();
        let (min_chunk_size, max_chunk_size) = self.get_chunk_bounds().await?;

        Ok(ImportConfig {
            memory_limit_bytes: self.get_memory_limit_bytes().await?,
            bytes_per_row: self.get_parsed_or(config_keys::BYTES_PER_ROW, d.bytes_per_row)?,
            min_chunk_size,
            max_chunk_size,
            headroom_ratio: d.headroom_ratio,
            chunk_budget_ratio: d.chunk_budget_ratio,
            pressure_threshold: self
                .get_parsed_or(config_keys::PRESSURE_THRESHOLD, d.pressure_threshold)?,
            shrink_factor: self.get_parsed_or(config_keys::SHRINK_FACTOR, d.shrink_factor)?,
            progress_interval: self
                .get_parsed_or(config_keys::PROGRESS_INTERVAL, d.progress_interval)?,
            max_worksheets: self.get_parsed_or(config_keys::MAX_WORKSHEETS, d.max_worksheets)?,
            exact_count_threshold: self
                .get_parsed_or(config_keys::EXACT_COUNT_THRESHOLD, d.exact_count_threshold)?,
            preview_rows: self.get_parsed_or(config_keys::PREVIEW_ROWS, d.preview_rows)?,
            max_import_rows: self.get_parsed_or(config_keys::MAX_IMPORT_ROWS, d.max_import_rows)?,
            decimal_precision: self
                .get_parsed_or(config_keys::DECIMAL_PRECISION, d.decimal_precision)?,
            date_1904: self.get_parsed_or(config_keys::DATE_1904, d.date_1904)?,
            target_encoding: self.get_target_encoding().await?,
            drop_threshold_cm: self.get_drop_threshold_cm().await?,
            inline_result_limit_bytes: self
                .get_parsed_or(config_keys::INLINE_RESULT_LIMIT, d.inline_result_limit_bytes)?,
            cache_ttl_secs: self.get_parsed_or(config_keys::CACHE_TTL_SECS, d.cache_ttl_secs)?,
            retention_hours: self.get_retention_hours().await?,
            bulk_mode: self.get_parsed_or(config_keys::BULK_MODE, d.bulk_mode)?,
        })
    }
}

// ==========================================
// 配置键常量
// ==========================================
pub mod config_keys {
    // 分块与内存
    pub const MEMORY_LIMIT_BYTES: &str = "import.memory_limit_bytes";
    pub const BYTES_PER_ROW: &str = "import.bytes_per_row";
    pub const MIN_CHUNK_SIZE: &str = "import.min_chunk_size";
    pub const MAX_CHUNK_SIZE: &str = "import.max_chunk_size";
    pub const PRESSURE_THRESHOLD: &str = "import.pressure_threshold";
    pub const SHRINK_FACTOR: &str = "import.shrink_factor";
    pub const PROGRESS_INTERVAL: &str = "import.progress_interval";

    // 工作表分析
    pub const MAX_WORKSHEETS: &str = "import.max_worksheets";
    pub const EXACT_COUNT_THRESHOLD: &str = "import.exact_count_threshold";
    pub const PREVIEW_ROWS: &str = "import.preview_rows";
    pub const MAX_IMPORT_ROWS: &str = "import.max_import_rows";

    // 字段转换
    pub const DECIMAL_PRECISION: &str = "import.decimal_precision";
    pub const DATE_1904: &str = "import.date_1904";
    pub const TARGET_ENCODING: &str = "import.target_encoding";

    // 归并
    pub const DROP_THRESHOLD_CM: &str = "import.drop_threshold_cm";

    // 进度与留存
    pub const INLINE_RESULT_LIMIT: &str = "import.inline_result_limit_bytes";
    pub const CACHE_TTL_SECS: &str = "import.cache_ttl_secs";
    pub const RETENTION_HOURS: &str = "import.retention_hours";
    pub const BULK_MODE: &str = "import.bulk_mode";
}
