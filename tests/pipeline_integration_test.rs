// ==========================================
// 导入管道集成测试
// ==========================================
// 覆盖: 分块事务 / 分块失败回滚与批量参数恢复 / 内存压力收缩 /
//       转换幂等 / 自动归并与行序无关
// ==========================================

mod test_helpers;

use catalog_import::config::ImportConfig;
use catalog_import::domain::product::{CellValue, RawRow};
use catalog_import::engine::{ChunkProcessor, SimulatedMemoryProbe};
use catalog_import::importer::{ImportError, Transformer};
use catalog_import::repository::{BulkTuning, ProductRepository, SqliteProductRepository};
use catalog_import::{ColumnMapping, ImportMode, ImportPipeline, ImportRequest};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use test_helpers::{
    catalog_mapping, catalog_rows, create_test_db, shared_connection, write_csv,
    FailingRepository, CATALOG_HEADER,
};

fn quiet(_: u8, _: &str) {}

fn never() -> bool {
    false
}

fn roomy_probe() -> Arc<SimulatedMemoryProbe> {
    Arc::new(SimulatedMemoryProbe::new(1 << 40, 0))
}

#[test]
fn test_standard_import_commits_one_transaction_per_chunk() {
    catalog_import::logging::init_test();
    let (_db_file, db_path) = create_test_db().unwrap();
    let conn = shared_connection(&db_path);
    let repo = Arc::new(SqliteProductRepository::from_connection(conn));
    let pipeline = ImportPipeline::new(ImportConfig::default(), repo.clone())
        .with_probe(roomy_probe())
        .with_chunk_size(500);

    let file = write_csv(CATALOG_HEADER, &catalog_rows(2500));
    let request = ImportRequest::new(file.path(), catalog_mapping());

    let outcome = pipeline.execute("imp-2500", &request, &quiet, &never).unwrap();

    assert_eq!(outcome.summary.raw_rows, 2500);
    assert_eq!(outcome.result.variants_created, 2500);
    assert_eq!(outcome.result.products_created, 10);
    assert!(outcome.result.errors.is_empty());

    assert_eq!(outcome.chunk_stats.len(), 5);
    assert!(outcome.chunk_stats.iter().all(|s| s.succeeded && s.rows == 500));
    assert_eq!(outcome.chunk_stats.iter().map(|s| s.rows).sum::<usize>(), 2500);

    assert_eq!(repo.count_variants().unwrap(), 2500);
    assert_eq!(repo.count_parents().unwrap(), 10);
}

#[test]
fn test_errors_cover_exactly_the_invalid_rows() {
    catalog_import::logging::init_test();
    let (_db_file, db_path) = create_test_db().unwrap();
    let repo = Arc::new(SqliteProductRepository::from_connection(shared_connection(&db_path)));
    let pipeline = ImportPipeline::new(ImportConfig::default(), repo.clone())
        .with_probe(roomy_probe())
        .with_chunk_size(500);

    // 数据行 i 位于 CSV 第 i + 2 行
    let mut rows = catalog_rows(2500);
    let mut invalid = BTreeSet::new();
    for i in 0..rows.len() {
        if i % 100 == 50 {
            // 转换失败: 价格非数字
            let mut cells: Vec<String> = rows[i].split(',').map(str::to_string).collect();
            cells[3] = "abc".to_string();
            rows[i] = cells.join(",");
            invalid.insert(i + 2);
        } else if i % 250 == 249 {
            // 落库失败: 复用上一行 SKU
            let previous_sku = format!("SKU-{:05}", i - 1);
            rows[i] = rows[i].replacen(&format!("SKU-{:05}", i), &previous_sku, 1);
            invalid.insert(i + 2);
        }
    }
    assert_eq!(invalid.len(), 35);

    let file = write_csv(CATALOG_HEADER, &rows);
    let request = ImportRequest::new(file.path(), catalog_mapping());
    let outcome = pipeline.execute("imp-mixed", &request, &quiet, &never).unwrap();

    let reported: Vec<usize> = outcome
        .result
        .errors
        .iter()
        .map(|e| e.row_number().unwrap())
        .collect();
    let reported_set: BTreeSet<usize> = reported.iter().copied().collect();
    assert_eq!(reported.len(), reported_set.len());
    assert_eq!(reported_set, invalid);
    assert!(reported.windows(2).all(|w| w[0] < w[1]));

    assert_eq!(outcome.result.variants_created, 2500 - 35);
    assert_eq!(outcome.result.products_created, 10);
    assert_eq!(repo.count_variants().unwrap(), 2465);
}

#[test]
fn test_chunk_failure_keeps_committed_chunks_and_restores_tuning() {
    catalog_import::logging::init_test();
    let (_db_file, db_path) = create_test_db().unwrap();
    let conn = shared_connection(&db_path);
    let inner = SqliteProductRepository::from_connection(conn.clone());
    let before = inner.read_tuning().unwrap();

    let failing = Arc::new(FailingRepository::new(inner, 2));
    let pipeline = ImportPipeline::new(ImportConfig::default(), failing.clone())
        .with_probe(roomy_probe())
        .with_chunk_size(500);

    let file = write_csv(CATALOG_HEADER, &catalog_rows(2500));
    let request = ImportRequest::new(file.path(), catalog_mapping());

    let err = pipeline.execute("imp-fail", &request, &quiet, &never).unwrap_err();
    assert!(matches!(err, ImportError::ChunkFailed { chunk_index: 2, .. }));
    assert_eq!(failing.calls(), 3);

    // 前两个分块已提交，第三个分块整体回滚
    let check = SqliteProductRepository::from_connection(conn);
    assert_eq!(check.count_variants().unwrap(), 1000);
    assert_eq!(check.count_parents().unwrap(), 10);

    // 批量模式参数恢复到运行前
    assert_eq!(check.read_tuning().unwrap(), before);
}

#[test]
fn test_memory_pressure_shrinks_remaining_chunks() {
    let config = ImportConfig::default();
    let probe = Arc::new(SimulatedMemoryProbe::new(1000, 950));
    let processor = ChunkProcessor::new(&config, probe.clone()).with_chunk_size(500);
    let rows: Vec<usize> = (0..2500).collect();

    let run = processor
        .process_in_chunks(&rows, |chunk, _| Ok(chunk.len()), None, &never)
        .unwrap();

    let sizes: Vec<usize> = run.stats.iter().map(|s| s.rows).collect();
    assert_eq!(&sizes[..4], &[500, 400, 320, 256]);
    assert!(sizes.iter().all(|&s| s >= config.min_chunk_size || s == *sizes.last().unwrap()));
    assert_eq!(sizes.iter().sum::<usize>(), 2500);
    assert!(run.final_chunk_size < 500);

    // 压力回收会清空恢复检查点
    assert!(processor.last_checkpoint().is_none());
    assert!(probe.reclaim_count() > run.stats.len());
}

#[test]
fn test_transformation_is_idempotent() {
    let transformer = Transformer::new(&ImportConfig::default());
    let mapping = ColumnMapping::from([
        (0, "sku"),
        (1, "name"),
        (2, "retail_price"),
        (3, "stock_quantity"),
        (4, "image_urls"),
    ]);
    let text = |s: &str| CellValue::String(s.to_string());
    let raw = vec![
        RawRow::new(2, vec![
            text(" 100-001a "),
            text("Harlow Chair Navy"),
            text("£129.99"),
            text("12"),
            text(r#"["a.jpg","b.jpg"]"#),
        ]),
        RawRow::new(3, vec![
            text("100-002"),
            text("Harlow Chair Sage"),
            text("abc"),
            text("3"),
            CellValue::Empty,
        ]),
    ];

    let first = transformer.transform(&raw, &mapping);
    let second = transformer.transform(&raw, &mapping);

    assert_eq!(first.transformed_rows, second.transformed_rows);
    assert_eq!(first.errors, second.errors);
    assert_eq!(first.error_count, 1);
    assert_eq!(first.transformed_rows.len(), 1);
    assert_eq!(first.transformed_rows[0].text("sku"), Some("100-001A"));
}

type CatalogShape = BTreeMap<String, (Option<String>, BTreeSet<String>)>;

fn catalog_shape(repo: &SqliteProductRepository) -> CatalogShape {
    repo.list_parents()
        .unwrap()
        .into_iter()
        .map(|p| {
            let skus = repo
                .list_variant_skus(p.id)
                .unwrap()
                .into_iter()
                .flatten()
                .collect();
            (p.name, (p.sku, skus))
        })
        .collect()
}

#[test]
fn test_auto_grouping_is_independent_of_row_order() {
    let families = [("100", "Harlow Chair"), ("200", "Oslo Table"), ("300", "Bexley Sofa")];
    let colours = ["Navy", "Sage", "Blush", "Ochre"];
    let mut rows = Vec::new();
    for (prefix, name) in families {
        for (i, colour) in colours.iter().enumerate() {
            rows.push(format!("{}-{:03},{} {},59.00,{}", prefix, i + 1, name, colour, colour));
        }
    }
    let mut reversed = rows.clone();
    reversed.reverse();

    let mapping = ColumnMapping::from([(0, "sku"), (1, "name"), (2, "retail_price"), (3, "color")]);
    let mut shapes = Vec::new();
    let mut _keep = Vec::new();
    for data in [rows, reversed] {
        let (db_file, db_path) = create_test_db().unwrap();
        let repo = Arc::new(SqliteProductRepository::from_connection(shared_connection(&db_path)));
        let pipeline = ImportPipeline::new(ImportConfig::default(), repo.clone())
            .with_probe(roomy_probe())
            .with_chunk_size(5);

        let file = write_csv("SKU,Name,Price,Colour", &data);
        let request = ImportRequest::new(file.path(), mapping.clone())
            .with_mode(ImportMode::AutoGenerateParents);
        let outcome = pipeline.execute("imp-auto", &request, &quiet, &never).unwrap();

        assert_eq!(outcome.groups, 3);
        assert_eq!(outcome.result.products_created, 3);
        assert_eq!(outcome.result.variants_created, 12);
        shapes.push(catalog_shape(&repo));
        _keep.push(db_file);
    }

    assert_eq!(shapes[0], shapes[1]);
    for prefix in ["100", "200", "300"] {
        let (_, (_, skus)) = shapes[0]
            .iter()
            .find(|(_, (sku, _))| sku.as_deref() == Some(prefix))
            .unwrap();
        assert_eq!(skus.len(), 4);
        assert!(skus.iter().all(|s| s.starts_with(prefix)));
    }
}
