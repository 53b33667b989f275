// ==========================================
// 商品目录批量导入系统 - 商品仓储 SQLite 实现
// ==========================================
// 职责: 分块事务 / 父子商品写入 / 批量模式 PRAGMA
// 红线: Repository 不含业务规则，只做数据 CRUD
// ==========================================

use crate::db::open_sqlite_connection;
use crate::domain::product::{ImportResult, NewParent, NewVariant};
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::product_repo::{
    BulkGate, BulkTuning, CatalogWriter, ChunkWork, ParentRow, ProductRepository, TuningSnapshot,
};
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use std::sync::{Arc, Mutex, MutexGuard};

// ==========================================
// SqliteProductRepository
// ==========================================
// 同一连接上的并发导入须共用一个实例，批量会话计数才能覆盖全部会话
pub struct SqliteProductRepository {
    conn: Arc<Mutex<Connection>>,
    gate: BulkGate,
}

impl SqliteProductRepository {
    /// 创建新的 Repository 实例
    ///
    /// # 参数
    /// - db_path: 数据库文件路径
    pub fn new(db_path: &str) -> RepositoryResult<Self> {
        let conn = open_sqlite_connection(db_path)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            gate: BulkGate::new(),
        })
    }

    /// 从已有连接创建仓储实例
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Self {
        Self {
            conn,
            gate: BulkGate::new(),
        }
    }

    /// 获取数据库连接
    fn get_conn(&self) -> RepositoryResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }
}

impl BulkTuning for SqliteProductRepository {
    fn read_tuning(&self) -> RepositoryResult<TuningSnapshot> {
        let conn = self.get_conn()?;
        let synchronous: i64 = conn.query_row("PRAGMA synchronous", [], |row| row.get(0))?;
        let foreign_keys: i64 = conn.query_row("PRAGMA foreign_keys", [], |row| row.get(0))?;
        Ok(TuningSnapshot {
            synchronous,
            foreign_keys: foreign_keys != 0,
        })
    }

    fn apply_tuning(&self, tuning: TuningSnapshot) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        if !conn.is_autocommit() {
            return Err(RepositoryError::DatabaseTransactionError(
                "事务进行中，无法修改 PRAGMA".to_string(),
            ));
        }
        conn.execute_batch(&format!(
            "PRAGMA synchronous = {}; PRAGMA foreign_keys = {};",
            tuning.synchronous.clamp(0, 3),
            if tuning.foreign_keys { "ON" } else { "OFF" }
        ))?;
        Ok(())
    }

    fn bulk_gate(&self) -> &BulkGate {
        &self.gate
    }
}

impl ProductRepository for SqliteProductRepository {
    fn with_chunk_transaction(
        &self,
        import_id: &str,
        work: &mut ChunkWork<'_>,
    ) -> RepositoryResult<ImportResult> {
        let conn = self.get_conn()?;
        let tx = conn.unchecked_transaction()?;

        let outcome = {
            let mut sqlite_writer = SqliteCatalogWriter {
                tx: &tx,
                import_id,
            };
            let writer: &mut dyn CatalogWriter = &mut sqlite_writer;
            work(writer)
        };

        match outcome {
            Ok(result) => {
                tx.commit()
                    .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;
                Ok(result)
            }
            Err(e) => {
                // 显式回滚；Drop 也会回滚，这里让失败可见
                if let Err(rb) = tx.rollback() {
                    tracing::error!(error = %rb, "分块事务回滚失败");
                }
                Err(e)
            }
        }
    }

    fn count_parents(&self) -> RepositoryResult<usize> {
        let conn = self.get_conn()?;
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM product_parent", [], |r| r.get(0))?;
        Ok(n as usize)
    }

    fn count_variants(&self) -> RepositoryResult<usize> {
        let conn = self.get_conn()?;
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM product_variant", [], |r| r.get(0))?;
        Ok(n as usize)
    }

    fn list_parents(&self) -> RepositoryResult<Vec<ParentRow>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, name, sku, attributes_json FROM product_parent ORDER BY id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;

        let mut parents = Vec::new();
        for row in rows {
            let (id, name, sku, attributes_json) = row?;
            parents.push(ParentRow {
                id,
                name,
                sku,
                attributes: serde_json::from_str(&attributes_json)?,
            });
        }
        Ok(parents)
    }

    fn list_variant_skus(&self, parent_id: i64) -> RepositoryResult<Vec<Option<String>>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT sku FROM product_variant WHERE parent_id = ?1 ORDER BY source_row, id",
        )?;
        let skus = stmt
            .query_map(params![parent_id], |row| row.get::<_, Option<String>>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(skus)
    }
}

// ==========================================
// SqliteCatalogWriter - 事务内写入
// ==========================================
struct SqliteCatalogWriter<'t> {
    tx: &'t Transaction<'t>,
    import_id: &'t str,
}

impl CatalogWriter for SqliteCatalogWriter<'_> {
    fn create_parent(&mut self, parent: &NewParent) -> RepositoryResult<i64> {
        let mut stmt = self.tx.prepare_cached(
            r#"
            INSERT INTO product_parent (name, sku, description, attributes_json, import_id)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )?;
        stmt.execute(params![
            parent.name,
            parent.sku,
            parent.description,
            serde_json::to_string(&parent.attributes)?,
            self.import_id,
        ])?;
        Ok(self.tx.last_insert_rowid())
    }

    fn find_parent_by_name(&mut self, name: &str) -> RepositoryResult<Option<i64>> {
        let mut stmt = self
            .tx
            .prepare_cached("SELECT id FROM product_parent WHERE name = ?1 ORDER BY id LIMIT 1")?;
        let id = stmt
            .query_row(params![name], |row| row.get::<_, i64>(0))
            .optional()?;
        Ok(id)
    }

    fn create_variant(&mut self, variant: &NewVariant) -> RepositoryResult<i64> {
        let image_urls = variant
            .image_urls
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let mut stmt = self.tx.prepare_cached(
            r#"
            INSERT INTO product_variant (
                parent_id, sku, name, color, size, barcode,
                retail_price, wholesale_price, cost_price, stock_quantity, weight,
                width_cm, drop_cm, image_urls_json, source_row, import_id
            ) VALUES (
                ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16
            )
            "#,
        )?;
        stmt.execute(params![
            variant.parent_id,
            variant.sku,
            variant.name,
            variant.color,
            variant.size,
            variant.barcode,
            variant.retail_price,
            variant.wholesale_price,
            variant.cost_price,
            variant.stock_quantity,
            variant.weight,
            variant.width_cm,
            variant.drop_cm,
            image_urls,
            variant.source_row as i64,
            self.import_id,
        ])?;
        Ok(self.tx.last_insert_rowid())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{configure_sqlite_connection, init_schema};
    use crate::repository::product_repo::OptimizedSession;
    use serde_json::json;

    fn repo() -> SqliteProductRepository {
        let conn = Connection::open_in_memory().unwrap();
        configure_sqlite_connection(&conn).unwrap();
        init_schema(&conn).unwrap();
        SqliteProductRepository::from_connection(Arc::new(Mutex::new(conn)))
    }

    fn parent(name: &str) -> NewParent {
        NewParent {
            name: name.to_string(),
            sku: None,
            description: None,
            attributes: json!({}),
            source_row: None,
        }
    }

    fn variant(parent_id: i64, sku: &str, row: usize) -> NewVariant {
        NewVariant {
            parent_id,
            sku: Some(sku.to_string()),
            name: format!("variant {}", sku),
            color: None,
            size: None,
            barcode: None,
            retail_price: Some("10.00".to_string()),
            wholesale_price: None,
            cost_price: None,
            stock_quantity: Some(3),
            weight: None,
            width_cm: None,
            drop_cm: None,
            image_urls: Some(json!(["https://img.example.com/a.jpg"])),
            source_row: row,
        }
    }

    #[test]
    fn test_chunk_commit_and_duplicate_sku_is_row_level() {
        let repo = repo();
        let result = repo
            .with_chunk_transaction("imp-1", &mut |w| {
                let mut result = ImportResult::default();
                let pid = w.create_parent(&parent("Oak Table"))?;
                result.products_created += 1;
                w.create_variant(&variant(pid, "OAK-1", 2))?;
                result.variants_created += 1;
                let dup = w.create_variant(&variant(pid, "OAK-1", 3)).unwrap_err();
                assert!(dup.is_row_level());
                assert_eq!(w.find_parent_by_name("Oak Table")?, Some(pid));
                Ok(result)
            })
            .unwrap();

        assert_eq!(result.products_created, 1);
        assert_eq!(repo.count_parents().unwrap(), 1);
        assert_eq!(repo.count_variants().unwrap(), 1);
    }

    #[test]
    fn test_chunk_failure_rolls_back() {
        let repo = repo();
        let err = repo
            .with_chunk_transaction("imp-2", &mut |w| {
                w.create_parent(&parent("Lamp"))?;
                Err(RepositoryError::InternalError("boom".to_string()))
            })
            .unwrap_err();

        assert!(matches!(err, RepositoryError::InternalError(_)));
        assert_eq!(repo.count_parents().unwrap(), 0);
    }

    #[test]
    fn test_optimized_session_restores_pragmas() {
        let repo = repo();
        let before = repo.read_tuning().unwrap();
        assert!(before.foreign_keys);
        {
            let _session = OptimizedSession::begin(&repo, true).unwrap();
            let during = repo.read_tuning().unwrap();
            assert_eq!(during.synchronous, 0);
            assert!(!during.foreign_keys);
        }
        assert_eq!(repo.read_tuning().unwrap(), before);
    }

    #[test]
    fn test_interleaved_sessions_leave_connection_restored() {
        let repo = repo();
        let before = repo.read_tuning().unwrap();

        let first = OptimizedSession::begin(&repo, true).unwrap();
        let second = OptimizedSession::begin(&repo, true).unwrap();
        drop(first);
        // 仍有会话在跑，保持批量参数
        assert!(!repo.read_tuning().unwrap().foreign_keys);
        drop(second);

        assert_eq!(repo.read_tuning().unwrap(), before);
        assert_eq!(repo.bulk_gate().active_sessions(), 0);
    }
}
