// ==========================================
// 商品目录批量导入系统 - 导入配置读取 Trait
// ==========================================
// 职责: 定义导入管道所需的配置读取接口（不包含实现）
// 红线: 不包含配置写入、不包含业务逻辑
// ==========================================

use crate::config::import_config::ImportConfig;
use crate::domain::types::TargetEncoding;
use crate::importer::error::ImportOutcome;
use async_trait::async_trait;

// ==========================================
// ImportConfigReader Trait
// ==========================================
// 用途: 导入管道所需的配置读取接口
// 实现者: ConfigManager（从 config_kv 表读取）
#[async_trait]
pub trait ImportConfigReader: Send + Sync {
    /// 获取进程内存上限（字节）
    ///
    /// # 默认值
    /// - 512 MiB
    async fn get_memory_limit_bytes(&self) -> ImportOutcome<u64>;

    /// 获取分块大小上下界
    ///
    /// # 默认值
    /// - (100, 5000)
    async fn get_chunk_bounds(&self) -> ImportOutcome<(usize, usize)>;

    /// 获取垂长判定阈值（cm）
    ///
    /// # 默认值
    /// - 120.0
    ///
    /// # 用途
    /// - 名称中只有单一尺寸时，≥ 阈值记为 drop，否则记为 width
    async fn get_drop_threshold_cm(&self) -> ImportOutcome<f64>;

    /// 获取清洗目标编码
    ///
    /// # 默认值
    /// - utf8
    async fn get_target_encoding(&self) -> ImportOutcome<TargetEncoding>;

    /// 获取进度记录保留时长（小时）
    ///
    /// # 默认值
    /// - 168
    async fn get_retention_hours(&self) -> ImportOutcome<i64>;

    /// 加载完整导入配置
    ///
    /// # 说明
    /// - 缺失键回退默认值
    /// - 格式错误的值返回 ConfigValueError（快速失败）
    async fn load_import_config(&self) -> ImportOutcome<ImportConfig>;
}
