// ==========================================
// 商品目录批量导入系统 - 父子商品创建（落库阶段）
// ==========================================
// 职责: TransformedRow → product_parent / product_variant
// 模式:
// - Standard: 按到达顺序；父商品行立即创建；变体按 parent_name → 自身名称 查找父商品，
//   均未命中时用变体自身数据创建父商品
// - AutoGenerateParents: 分组阶段（ParentGrouper）→ 全部父商品分块 → 全部变体分块
// 约定:
// - 每个分块一个事务；单条插入唯一约束冲突为行级错误，其余存储错误为分块级（整次失败）
// - 父商品分块全部完成后才开始第一个变体分块
// - 分组无法解析到父商品的行为行级错误
// ==========================================

use crate::domain::product::{
    FieldValue, ImportErrorEntry, ImportResult, NewParent, NewVariant, TransformedRow,
};
use crate::domain::progress::{ChunkStat, ProgressEvent};
use crate::domain::types::ImportMode;
use crate::engine::attribute_inference::infer_row_measurements;
use crate::engine::chunk_processor::ChunkProcessor;
use crate::engine::grouping::{GroupingOutcome, ParentGrouper};
use crate::importer::error::{ImportError, ImportOutcome};
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::product_repo::{CatalogWriter, ProductRepository};
use serde_json::json;
use std::collections::HashMap;
use tracing::{debug, info, instrument, warn};

/// 创建阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreationPhase {
    Parents,
    Variants,
}

/// 进度回调: (阶段, 已处理, 总数)
pub type CreationProgress<'p> = dyn Fn(CreationPhase, usize, usize) + 'p;

/// 创建结果
#[derive(Debug, Clone, Default)]
pub struct CreationReport {
    pub result: ImportResult,
    pub chunk_stats: Vec<ChunkStat>,
    pub groups: usize,
}

pub struct ProductCreator<'a> {
    repo: &'a dyn ProductRepository,
    processor: &'a ChunkProcessor,
    import_id: &'a str,
    drop_threshold_cm: f64,
    progress_interval: usize,
}

enum ParentTask {
    Group(usize),
    Explicit(usize),
}

impl<'a> ProductCreator<'a> {
    pub fn new(
        repo: &'a dyn ProductRepository,
        processor: &'a ChunkProcessor,
        import_id: &'a str,
        drop_threshold_cm: f64,
        progress_interval: usize,
    ) -> Self {
        Self {
            repo,
            processor,
            import_id,
            drop_threshold_cm,
            progress_interval: progress_interval.max(1),
        }
    }

    #[instrument(skip(self, rows, progress, cancel), fields(import_id = %self.import_id, rows = rows.len(), mode = %mode.as_str()))]
    pub fn create(
        &self,
        rows: &[TransformedRow],
        mode: ImportMode,
        progress: &CreationProgress<'_>,
        cancel: &dyn Fn() -> bool,
    ) -> ImportOutcome<CreationReport> {
        let report = match mode {
            ImportMode::Standard => self.create_standard(rows, progress, cancel)?,
            ImportMode::AutoGenerateParents => self.create_grouped(rows, progress, cancel)?,
        };
        info!(
            products_created = report.result.products_created,
            variants_created = report.result.variants_created,
            errors = report.result.error_count(),
            chunks = report.chunk_stats.len(),
            "商品创建完成"
        );
        Ok(report)
    }

    // ==========================================
    // Standard 模式
    // ==========================================
    fn create_standard(
        &self,
        rows: &[TransformedRow],
        progress: &CreationProgress<'_>,
        cancel: &dyn Fn() -> bool,
    ) -> ImportOutcome<CreationReport> {
        let total = rows.len();
        let mut on_chunk = |e: ProgressEvent| {
            progress(CreationPhase::Variants, e.processed_rows, e.total_rows)
        };

        let run = self.processor.process_in_chunks(
            rows,
            |chunk, chunk_index| {
                self.in_transaction(chunk_index, &mut |writer: &mut dyn CatalogWriter| {
                    let mut partial = ImportResult::default();
                    for row in chunk {
                        if row.is_parent() {
                            match writer.create_parent(&parent_from_row(row)) {
                                Ok(_) => partial.products_created += 1,
                                Err(e) if e.is_row_level() => partial.errors.push(row_error(row, "sku", &e)),
                                Err(e) => return Err(e),
                            }
                            continue;
                        }

                        let parent_id = match resolve_parent(writer, row)? {
                            Some(id) => id,
                            None => match writer.create_parent(&parent_from_variant(row)) {
                                Ok(id) => {
                                    partial.products_created += 1;
                                    id
                                }
                                Err(e) if e.is_row_level() => {
                                    partial.errors.push(row_error(row, "name", &e));
                                    continue;
                                }
                                Err(e) => return Err(e),
                            },
                        };

                        let variant = variant_from_row(row, parent_id, self.drop_threshold_cm);
                        match writer.create_variant(&variant) {
                            Ok(_) => partial.variants_created += 1,
                            Err(e) if e.is_row_level() => partial.errors.push(row_error(row, "sku", &e)),
                            Err(e) => return Err(e),
                        }
                    }
                    Ok(partial)
                })
            },
            Some(&mut on_chunk),
            cancel,
        )?;

        debug!(total, "Standard 模式处理完成");
        Ok(CreationReport {
            result: merge_all(run.results),
            chunk_stats: run.stats,
            groups: 0,
        })
    }

    // ==========================================
    // AutoGenerateParents 模式
    // ==========================================
    fn create_grouped(
        &self,
        rows: &[TransformedRow],
        progress: &CreationProgress<'_>,
        cancel: &dyn Fn() -> bool,
    ) -> ImportOutcome<CreationReport> {
        let grouping = ParentGrouper::new(self.drop_threshold_cm).group(rows);

        // 阶段 1: 父商品
        let mut tasks: Vec<ParentTask> = (0..grouping.groups.len()).map(ParentTask::Group).collect();
        tasks.extend(
            rows.iter()
                .enumerate()
                .filter(|(_, r)| r.is_parent())
                .map(|(i, _)| ParentTask::Explicit(i)),
        );

        let mut parent_ids: HashMap<usize, i64> = HashMap::new();
        let mut on_parent_chunk = |e: ProgressEvent| {
            progress(CreationPhase::Parents, e.processed_rows, e.total_rows)
        };
        let parent_run = self.processor.process_in_chunks(
            &tasks,
            |chunk, chunk_index| {
                self.in_transaction(chunk_index, &mut |writer: &mut dyn CatalogWriter| {
                    self.create_parent_chunk(writer, chunk, rows, &grouping, &mut parent_ids)
                })
            },
            Some(&mut on_parent_chunk),
            cancel,
        )?;
        info!(groups = grouping.groups.len(), created = parent_ids.len(), "父商品阶段完成");

        // 阶段 2: 变体（逐行经索引回查分组）
        let variant_rows: Vec<usize> = (0..rows.len()).filter(|i| !rows[*i].is_parent()).collect();
        let total = variant_rows.len();
        let mut done = 0usize;
        let mut on_variant_chunk = |e: ProgressEvent| {
            progress(CreationPhase::Variants, e.processed_rows, e.total_rows)
        };
        let variant_run = self.processor.process_in_chunks(
            &variant_rows,
            |chunk, chunk_index| {
                // 事务期间连接锁未释放，逐 N 行进度先缓存，提交后再上报
                let start = done;
                let mut ticks = Vec::new();
                let partial = self.in_transaction(chunk_index, &mut |writer: &mut dyn CatalogWriter| {
                    ticks.clear();
                    let mut partial = ImportResult::default();
                    for (offset, &idx) in chunk.iter().enumerate() {
                        let row = &rows[idx];
                        let processed = start + offset + 1;
                        if processed % self.progress_interval == 0 {
                            ticks.push(processed);
                        }

                        let parent_id = grouping
                            .row_index
                            .get(&idx)
                            .and_then(|g| parent_ids.get(g))
                            .copied();
                        let Some(parent_id) = parent_id else {
                            partial.errors.push(
                                ImportErrorEntry::for_row(row.row_number, None, "无法解析父商品分组")
                                    .in_sheet(row.sheet_index),
                            );
                            continue;
                        };

                        let variant = variant_from_row(row, parent_id, self.drop_threshold_cm);
                        match writer.create_variant(&variant) {
                            Ok(_) => partial.variants_created += 1,
                            Err(e) if e.is_row_level() => partial.errors.push(row_error(row, "sku", &e)),
                            Err(e) => return Err(e),
                        }
                    }
                    Ok(partial)
                })?;
                done = start + chunk.len();
                for processed in ticks {
                    progress(CreationPhase::Variants, processed, total);
                }
                Ok(partial)
            },
            Some(&mut on_variant_chunk),
            cancel,
        )?;

        let mut result = merge_all(parent_run.results);
        result.merge(merge_all(variant_run.results));
        let mut chunk_stats = parent_run.stats;
        chunk_stats.extend(variant_run.stats);

        Ok(CreationReport {
            result,
            chunk_stats,
            groups: grouping.groups.len(),
        })
    }

    fn create_parent_chunk(
        &self,
        writer: &mut dyn CatalogWriter,
        chunk: &[ParentTask],
        rows: &[TransformedRow],
        grouping: &GroupingOutcome,
        parent_ids: &mut HashMap<usize, i64>,
    ) -> RepositoryResult<ImportResult> {
        let mut partial = ImportResult::default();

        for task in chunk {
            match task {
                ParentTask::Group(g) => {
                    let group = &grouping.groups[*g];
                    let first = group.member_row_indices.first().map(|i| &rows[*i]);
                    let parent = NewParent {
                        name: group.parent_name.clone(),
                        sku: group.parent_sku.clone(),
                        description: first.and_then(|r| r.text("description")).map(str::to_string),
                        attributes: json!(group.inferred_parent_attributes),
                        source_row: first.map(|r| r.row_number),
                    };
                    match writer.create_parent(&parent) {
                        Ok(id) => {
                            parent_ids.insert(*g, id);
                            partial.products_created += 1;
                        }
                        Err(e) if e.is_row_level() => {
                            warn!(group_key = %group.group_key, error = %e, "分组父商品创建失败");
                            partial.errors.push(ImportErrorEntry {
                                message: e.to_string(),
                                context: json!({
                                    "row_number": parent.source_row,
                                    "field": "parent_sku",
                                    "group_key": group.group_key,
                                }),
                            });
                        }
                        Err(e) => return Err(e),
                    }
                }
                ParentTask::Explicit(i) => {
                    let row = &rows[*i];
                    match writer.create_parent(&parent_from_row(row)) {
                        Ok(_) => partial.products_created += 1,
                        Err(e) if e.is_row_level() => partial.errors.push(row_error(row, "sku", &e)),
                        Err(e) => return Err(e),
                    }
                }
            }
        }
        Ok(partial)
    }

    /// 单个分块事务；存储错误提升为分块级失败
    fn in_transaction(
        &self,
        chunk_index: usize,
        work: &mut dyn FnMut(&mut dyn CatalogWriter) -> RepositoryResult<ImportResult>,
    ) -> ImportOutcome<ImportResult> {
        self.repo
            .with_chunk_transaction(self.import_id, work)
            .map_err(|e| ImportError::ChunkFailed {
                chunk_index,
                message: e.to_string(),
            })
    }
}

fn merge_all(results: Vec<ImportResult>) -> ImportResult {
    results.into_iter().fold(ImportResult::default(), |mut acc, r| {
        acc.merge(r);
        acc
    })
}

fn row_error(row: &TransformedRow, field: &str, err: &RepositoryError) -> ImportErrorEntry {
    ImportErrorEntry::for_row(row.row_number, Some(field), err.to_string()).in_sheet(row.sheet_index)
}

/// parent_name 优先，其次行自身名称
fn resolve_parent(writer: &mut dyn CatalogWriter, row: &TransformedRow) -> RepositoryResult<Option<i64>> {
    for name in [row.text("parent_name"), row.text("name")].into_iter().flatten() {
        if let Some(id) = writer.find_parent_by_name(name)? {
            return Ok(Some(id));
        }
    }
    Ok(None)
}

fn parent_from_row(row: &TransformedRow) -> NewParent {
    NewParent {
        name: row.text("name").unwrap_or_default().to_string(),
        sku: row.text("sku").or_else(|| row.text("parent_sku")).map(str::to_string),
        description: row.text("description").map(str::to_string),
        attributes: json!({}),
        source_row: Some(row.row_number),
    }
}

fn parent_from_variant(row: &TransformedRow) -> NewParent {
    let name = row
        .text("parent_name")
        .or_else(|| row.text("name"))
        .unwrap_or_default();
    NewParent {
        name: name.to_string(),
        sku: row.text("parent_sku").map(str::to_string),
        description: row.text("description").map(str::to_string),
        attributes: json!({}),
        source_row: Some(row.row_number),
    }
}

fn variant_from_row(row: &TransformedRow, parent_id: i64, drop_threshold_cm: f64) -> NewVariant {
    let text = |f: &str| row.text(f).map(str::to_string);
    let measurements = infer_row_measurements(row, drop_threshold_cm);
    NewVariant {
        parent_id,
        sku: text("sku"),
        name: row
            .text("name")
            .or_else(|| row.variant_identifier())
            .unwrap_or_default()
            .to_string(),
        color: text("color"),
        size: text("size"),
        barcode: text("barcode"),
        retail_price: text("retail_price"),
        wholesale_price: text("wholesale_price"),
        cost_price: text("cost_price"),
        stock_quantity: row.integer("stock_quantity"),
        weight: text("weight"),
        width_cm: measurements.width_cm,
        drop_cm: measurements.drop_cm,
        image_urls: match row.get("image_urls") {
            Some(FieldValue::Json(value)) => Some(value.clone()),
            _ => None,
        },
        source_row: row.row_number,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ImportConfig;
    use crate::db::{configure_sqlite_connection, init_schema};
    use crate::engine::memory::SimulatedMemoryProbe;
    use crate::repository::product_repo_impl::SqliteProductRepository;
    use rusqlite::Connection;
    use std::cell::RefCell;
    use std::sync::{Arc, Mutex};

    fn repo() -> SqliteProductRepository {
        let conn = Connection::open_in_memory().unwrap();
        configure_sqlite_connection(&conn).unwrap();
        init_schema(&conn).unwrap();
        SqliteProductRepository::from_connection(Arc::new(Mutex::new(conn)))
    }

    fn processor(chunk: usize) -> ChunkProcessor {
        let probe = Arc::new(SimulatedMemoryProbe::new(u64::MAX / 2, 0));
        ChunkProcessor::new(&ImportConfig::default(), probe).with_chunk_size(chunk)
    }

    fn row(n: usize, fields: &[(&str, FieldValue)]) -> TransformedRow {
        let mut r = TransformedRow::new(n);
        for (k, v) in fields {
            r.fields.insert(k.to_string(), v.clone());
        }
        r
    }

    fn t(s: &str) -> FieldValue {
        FieldValue::Text(s.to_string())
    }

    fn never() -> bool {
        false
    }

    #[test]
    fn test_standard_mode_resolves_parents() {
        let repo = repo();
        let processor = processor(2);
        let creator = ProductCreator::new(&repo, &processor, "imp-1", 120.0, 100);
        let rows = vec![
            row(2, &[("name", t("Harlow Chair")), ("is_parent", FieldValue::Boolean(true))]),
            row(3, &[("name", t("Harlow Chair Navy")), ("sku", t("HC-1")), ("parent_name", t("Harlow Chair"))]),
            row(4, &[("name", t("Oslo Table")), ("sku", t("OT-1"))]),
            row(5, &[("name", t("Oslo Table")), ("sku", t("OT-2"))]),
            row(6, &[("name", t("Dup")), ("sku", t("OT-2"))]),
        ];

        let report = creator
            .create(&rows, ImportMode::Standard, &|_, _, _| {}, &never)
            .unwrap();

        // Harlow Chair（显式）+ Oslo Table（变体自建）+ Dup（变体自建）
        assert_eq!(report.result.products_created, 3);
        assert_eq!(report.result.variants_created, 3);
        assert_eq!(report.result.error_count(), 1);
        assert_eq!(report.result.errors[0].row_number(), Some(6));
        assert_eq!(repo.count_parents().unwrap(), 3);
    }

    #[test]
    fn test_auto_mode_parent_before_variant() {
        let repo = repo();
        let processor = processor(2);
        let creator = ProductCreator::new(&repo, &processor, "imp-2", 120.0, 1);
        let rows = vec![
            row(2, &[("name", t("Velvet Curtain Navy 117 x 137cm")), ("sku", t("100-001"))]),
            row(3, &[("name", t("Oak Table")), ("sku", t("200-001"))]),
            row(4, &[("name", t("Velvet Curtain Sage 168 x 229cm")), ("sku", t("100-002"))]),
        ];
        let phases = RefCell::new(Vec::new());
        let progress = |phase: CreationPhase, _: usize, _: usize| phases.borrow_mut().push(phase);

        let report = creator
            .create(&rows, ImportMode::AutoGenerateParents, &progress, &never)
            .unwrap();

        assert_eq!(report.groups, 2);
        assert_eq!(report.result.products_created, 2);
        assert_eq!(report.result.variants_created, 3);
        assert!(report.result.errors.is_empty());

        let phases = phases.into_inner();
        let last_parent = phases.iter().rposition(|p| *p == CreationPhase::Parents).unwrap();
        let first_variant = phases.iter().position(|p| *p == CreationPhase::Variants).unwrap();
        assert!(last_parent < first_variant);

        let parents = repo.list_parents().unwrap();
        let curtain = parents.iter().find(|p| p.sku.as_deref() == Some("100")).unwrap();
        assert_eq!(curtain.name, "Velvet Curtain");
        assert_eq!(curtain.attributes["drop_range_cm"]["max"], json!(229.0));
        assert_eq!(
            repo.list_variant_skus(curtain.id).unwrap(),
            vec![Some("100-001".to_string()), Some("100-002".to_string())]
        );
    }

    #[test]
    fn test_auto_mode_reports_row_progress_outside_transaction() {
        let conn = Connection::open_in_memory().unwrap();
        configure_sqlite_connection(&conn).unwrap();
        init_schema(&conn).unwrap();
        let conn = Arc::new(Mutex::new(conn));
        let repo = SqliteProductRepository::from_connection(conn.clone());
        let processor = processor(4);
        let creator = ProductCreator::new(&repo, &processor, "imp-4", 120.0, 3);

        let rows: Vec<TransformedRow> = (1..=10)
            .map(|i| {
                row(i + 1, &[
                    ("name", t(&format!("Linen Cushion Colour{}", i))),
                    ("sku", t(&format!("300-{:03}", i))),
                ])
            })
            .collect();
        let ticks = RefCell::new(Vec::new());
        let progress = |phase: CreationPhase, done: usize, _: usize| {
            // 进度回调期间连接必须可用（进度持久化共用同一连接）
            assert!(conn.try_lock().is_ok());
            if phase == CreationPhase::Variants {
                ticks.borrow_mut().push(done);
            }
        };

        let report = creator
            .create(&rows, ImportMode::AutoGenerateParents, &progress, &never)
            .unwrap();

        assert_eq!(report.result.variants_created, 10);
        let ticks = ticks.into_inner();
        for n in [3, 6, 9] {
            assert!(ticks.contains(&n), "缺少第 {} 行进度", n);
        }
        assert!(ticks.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_unresolvable_group_is_row_error() {
        let repo = repo();
        let processor = processor(10);
        // 预先占用父商品 SKU，使分组父商品创建冲突
        repo.with_chunk_transaction("seed", &mut |w: &mut dyn CatalogWriter| {
            w.create_parent(&NewParent {
                name: "Existing".into(),
                sku: Some("100".into()),
                description: None,
                attributes: json!({}),
                source_row: None,
            })?;
            Ok(ImportResult::default())
        })
        .unwrap();

        let creator = ProductCreator::new(&repo, &processor, "imp-3", 120.0, 100);
        let rows = vec![
            row(2, &[("name", t("Chair Navy")), ("sku", t("100-001"))]),
            row(3, &[("name", t("Chair Sage")), ("sku", t("100-002"))]),
        ];
        let report = creator
            .create(&rows, ImportMode::AutoGenerateParents, &|_, _, _| {}, &never)
            .unwrap();

        assert_eq!(report.result.products_created, 0);
        assert_eq!(report.result.variants_created, 0);
        // 1 条父商品冲突 + 2 条行级无法解析
        assert_eq!(report.result.error_count(), 3);
        assert_eq!(report.result.errors[1].row_number(), Some(2));
    }
}
