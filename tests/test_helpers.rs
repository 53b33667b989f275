// ==========================================
// 测试辅助函数
// ==========================================
// 职责: 临时数据库 / CSV 测试数据 / 导入栈装配 / 故障注入仓储
// ==========================================
#![allow(dead_code)]

use catalog_import::config::ImportConfig;
use catalog_import::db::{init_schema, open_sqlite_connection};
use catalog_import::domain::product::ImportResult;
use catalog_import::repository::{
    BulkGate, BulkTuning, CatalogWriter, ChunkWork, ParentRow, ProductRepository, ProgressRepository,
    RepositoryError, RepositoryResult, SqliteProductRepository, TuningSnapshot,
};
use catalog_import::services::{ImportOrchestrator, ImportPipeline, ProgressTracker};
use rusqlite::Connection;
use std::error::Error;
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::{Builder, NamedTempFile};

/// 创建临时测试数据库并初始化 schema
///
/// # 返回
/// - NamedTempFile: 临时数据库文件（需要保持存活）
/// - String: 数据库文件路径
pub fn create_test_db() -> Result<(NamedTempFile, String), Box<dyn Error>> {
    let temp_file = NamedTempFile::new()?;
    let db_path = temp_file.path().to_str().ok_or("非 UTF-8 路径")?.to_string();

    let conn = open_sqlite_connection(&db_path)?;
    init_schema(&conn)?;

    Ok((temp_file, db_path))
}

/// 打开共享连接（与生产代码一致的 Arc<Mutex<Connection>>）
pub fn shared_connection(db_path: &str) -> Arc<Mutex<Connection>> {
    let conn = open_sqlite_connection(db_path).expect("打开数据库失败");
    Arc::new(Mutex::new(conn))
}

/// 写出 CSV 测试文件
pub fn write_csv(header: &str, rows: &[String]) -> NamedTempFile {
    let mut file = Builder::new().suffix(".csv").tempfile().expect("创建临时文件失败");
    writeln!(file, "{}", header).expect("写入表头失败");
    for row in rows {
        writeln!(file, "{}", row).expect("写入数据行失败");
    }
    file.flush().expect("刷新文件失败");
    file
}

/// 生成 n 行变体数据: SKU,Name,Parent,Price,Colour（10 个父商品族）
pub fn catalog_rows(n: usize) -> Vec<String> {
    const COLOURS: [&str; 4] = ["Navy", "Sage", "Blush", "Ochre"];
    (0..n)
        .map(|i| {
            let colour = COLOURS[i % COLOURS.len()];
            format!(
                "SKU-{:05},Family {} {} {},Family {},{}.99,{}",
                i,
                i % 10,
                colour,
                i,
                i % 10,
                10 + i % 50,
                colour
            )
        })
        .collect()
}

pub const CATALOG_HEADER: &str = "SKU,Name,Parent,Price,Colour";

pub fn catalog_mapping() -> catalog_import::ColumnMapping {
    catalog_import::ColumnMapping::from([
        (0, "sku"),
        (1, "name"),
        (2, "parent_name"),
        (3, "retail_price"),
        (4, "color"),
    ])
}

/// 装配编排器（共享同一连接）
pub fn build_orchestrator(
    conn: Arc<Mutex<Connection>>,
    config: ImportConfig,
) -> (Arc<ImportOrchestrator>, Arc<ProgressTracker>) {
    let repo = Arc::new(SqliteProductRepository::from_connection(conn.clone()));
    let tracker = Arc::new(ProgressTracker::new(
        ProgressRepository::from_connection(conn),
        &config,
    ));
    let pipeline = Arc::new(ImportPipeline::new(config, repo));
    (
        Arc::new(ImportOrchestrator::new(pipeline, Arc::clone(&tracker))),
        tracker,
    )
}

// ==========================================
// FailingRepository - 第 N 个分块事务失败
// ==========================================
// 故障分块内的写入先执行再报错，以验证回滚
pub struct FailingRepository {
    inner: SqliteProductRepository,
    fail_at: usize,
    calls: AtomicUsize,
}

impl FailingRepository {
    /// fail_at: 从 0 开始的分块事务序号
    pub fn new(inner: SqliteProductRepository, fail_at: usize) -> Self {
        Self {
            inner,
            fail_at,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl BulkTuning for FailingRepository {
    fn read_tuning(&self) -> RepositoryResult<TuningSnapshot> {
        self.inner.read_tuning()
    }

    fn apply_tuning(&self, tuning: TuningSnapshot) -> RepositoryResult<()> {
        self.inner.apply_tuning(tuning)
    }

    fn bulk_gate(&self) -> &BulkGate {
        self.inner.bulk_gate()
    }
}

impl ProductRepository for FailingRepository {
    fn with_chunk_transaction(
        &self,
        import_id: &str,
        work: &mut ChunkWork<'_>,
    ) -> RepositoryResult<ImportResult> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call != self.fail_at {
            return self.inner.with_chunk_transaction(import_id, work);
        }

        let mut failing = |writer: &mut dyn CatalogWriter| -> RepositoryResult<ImportResult> {
            work(writer)?;
            Err(RepositoryError::DatabaseTransactionError(
                "模拟磁盘故障".to_string(),
            ))
        };
        self.inner.with_chunk_transaction(import_id, &mut failing)
    }

    fn count_parents(&self) -> RepositoryResult<usize> {
        self.inner.count_parents()
    }

    fn count_variants(&self) -> RepositoryResult<usize> {
        self.inner.count_variants()
    }

    fn list_parents(&self) -> RepositoryResult<Vec<ParentRow>> {
        self.inner.list_parents()
    }

    fn list_variant_skus(&self, parent_id: i64) -> RepositoryResult<Vec<Option<String>>> {
        self.inner.list_variant_skus(parent_id)
    }
}
