// ==========================================
// 导入编排与进度跟踪集成测试
// ==========================================
// 覆盖: 后台执行 / 派发前取消 / 运行中取消 / 取消后完成不覆盖 /
//       并发批量导入 / 进程重启后状态回退 / 过期清理
// ==========================================

mod test_helpers;

use catalog_import::config::ImportConfig;
use catalog_import::domain::product::{RawRow, TransformedRow};
use catalog_import::importer::{ContentScanner, ScanVerdict};
use catalog_import::repository::{ProductRepository, ProgressRepository, SqliteProductRepository};
use catalog_import::{
    ColumnMapping, ImportMode, ImportOrchestrator, ImportPipeline, ImportRequest, ImportResult,
    ImportStatus, ProgressTracker,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use test_helpers::{
    build_orchestrator, catalog_mapping, catalog_rows, create_test_db, shared_connection,
    write_csv, CATALOG_HEADER,
};

/// 扫描到第 N 行时对目标任务发起取消
struct CancellingScanner {
    tracker: Arc<ProgressTracker>,
    target: Mutex<Option<String>>,
    seen: AtomicUsize,
    cancel_at: usize,
}

impl ContentScanner for CancellingScanner {
    fn scan_raw(&self, _row: &RawRow) -> ScanVerdict {
        let seen = self.seen.fetch_add(1, Ordering::SeqCst) + 1;
        if seen == self.cancel_at {
            if let Some(id) = self.target.lock().unwrap().as_deref() {
                self.tracker.cancel(id).unwrap();
            }
        }
        ScanVerdict::Clean
    }

    fn scan_transformed(&self, _row: &mut TransformedRow) -> ScanVerdict {
        ScanVerdict::Clean
    }
}

#[tokio::test]
async fn test_background_import_completes_with_result() {
    catalog_import::logging::init_test();
    let (_db_file, db_path) = create_test_db().unwrap();
    let conn = shared_connection(&db_path);
    let (orchestrator, _) = build_orchestrator(conn.clone(), ImportConfig::default());

    let file = write_csv(CATALOG_HEADER, &catalog_rows(300));
    let id = orchestrator
        .submit(ImportRequest::new(file.path(), catalog_mapping()))
        .unwrap();

    assert_eq!(orchestrator.wait(&id).await, Some(ImportStatus::Completed));

    let record = orchestrator.status(&id).unwrap().unwrap();
    assert_eq!(record.status, ImportStatus::Completed);
    assert_eq!(record.progress_percent, 100);
    assert!(record.started_at.is_some());
    assert!(record.finished_at.is_some());

    let result = orchestrator.result(&id).unwrap().unwrap();
    assert_eq!(result.variants_created, 300);
    assert_eq!(result.products_created, 10);

    let repo = SqliteProductRepository::from_connection(conn);
    assert_eq!(repo.count_variants().unwrap(), 300);
}

#[tokio::test]
async fn test_auto_mode_import_with_shared_connection_completes() {
    catalog_import::logging::init_test();
    let (_db_file, db_path) = create_test_db().unwrap();
    let conn = shared_connection(&db_path);
    let (orchestrator, tracker) = build_orchestrator(conn.clone(), ImportConfig::default());

    // 超过默认 progress_interval（100），触发逐行进度持久化
    let rows: Vec<String> = (1..=150)
        .map(|i| format!("100-{:03},Harlow Chair Colour{},59.00", i, i))
        .collect();
    let file = write_csv("SKU,Name,Price", &rows);
    let mapping = ColumnMapping::from([(0, "sku"), (1, "name"), (2, "retail_price")]);
    let request =
        ImportRequest::new(file.path(), mapping).with_mode(ImportMode::AutoGenerateParents);

    let id = orchestrator.submit(request).unwrap();
    let status = tokio::time::timeout(Duration::from_secs(30), orchestrator.wait(&id))
        .await
        .expect("导入未在时限内结束");

    assert_eq!(status, Some(ImportStatus::Completed));
    let result = orchestrator.result(&id).unwrap().unwrap();
    assert_eq!(result.variants_created, 150);
    assert_eq!(result.products_created, 1);
    assert_eq!(tracker.status(&id).unwrap().unwrap().progress_percent, 100);
}

#[tokio::test]
async fn test_cancel_before_dispatch_skips_execution() {
    let (_db_file, db_path) = create_test_db().unwrap();
    let conn = shared_connection(&db_path);
    let (orchestrator, _) = build_orchestrator(conn.clone(), ImportConfig::default());
    let file = write_csv(CATALOG_HEADER, &catalog_rows(50));

    let id = orchestrator.enqueue().unwrap();
    assert!(orchestrator.cancel(&id).unwrap());
    orchestrator.dispatch(&id, ImportRequest::new(file.path(), catalog_mapping()));

    assert_eq!(orchestrator.wait(&id).await, Some(ImportStatus::Cancelled));
    assert_eq!(
        SqliteProductRepository::from_connection(conn).count_variants().unwrap(),
        0
    );
    // 终态任务不可再次取消
    assert!(!orchestrator.cancel(&id).unwrap());
}

#[tokio::test]
async fn test_cancel_while_processing_stops_at_chunk_boundary() {
    catalog_import::logging::init_test();
    let (_db_file, db_path) = create_test_db().unwrap();
    let conn = shared_connection(&db_path);
    let config = ImportConfig::default();

    let tracker = Arc::new(ProgressTracker::new(
        ProgressRepository::from_connection(conn.clone()),
        &config,
    ));
    let scanner = Arc::new(CancellingScanner {
        tracker: Arc::clone(&tracker),
        target: Mutex::new(None),
        seen: AtomicUsize::new(0),
        cancel_at: 150,
    });
    let repo = Arc::new(SqliteProductRepository::from_connection(conn.clone()));
    let pipeline = ImportPipeline::new(config, repo.clone())
        .with_scanner(scanner.clone())
        .with_chunk_size(100);
    let orchestrator = ImportOrchestrator::new(Arc::new(pipeline), Arc::clone(&tracker));

    let file = write_csv(CATALOG_HEADER, &catalog_rows(1000));
    let id = orchestrator.enqueue().unwrap();
    *scanner.target.lock().unwrap() = Some(id.clone());
    orchestrator.dispatch(&id, ImportRequest::new(file.path(), catalog_mapping()));

    assert_eq!(orchestrator.wait(&id).await, Some(ImportStatus::Cancelled));
    // 第 2 块处理中发起取消，第 3 块开始前停止
    assert_eq!(scanner.seen.load(Ordering::SeqCst), 200);
    assert_eq!(repo.count_variants().unwrap(), 0);

    let record = tracker.status(&id).unwrap().unwrap();
    assert_eq!(record.status, ImportStatus::Cancelled);
    assert!(orchestrator.result(&id).unwrap().is_none());
}

#[tokio::test]
async fn test_run_batch_executes_independent_imports() {
    let (_db_file, db_path) = create_test_db().unwrap();
    let conn = shared_connection(&db_path);
    let (orchestrator, _) = build_orchestrator(conn.clone(), ImportConfig::default());

    let files: Vec<_> = (0..3)
        .map(|batch| {
            let rows: Vec<String> = catalog_rows(200)
                .into_iter()
                .map(|r| r.replacen("SKU-", &format!("B{}-", batch), 1))
                .collect();
            write_csv(CATALOG_HEADER, &rows)
        })
        .collect();
    let requests = files
        .iter()
        .map(|f| ImportRequest::new(f.path(), catalog_mapping()))
        .collect();

    let outcomes = orchestrator.run_batch(requests).await.unwrap();

    assert_eq!(outcomes.len(), 3);
    assert!(outcomes.iter().all(|(_, s)| *s == ImportStatus::Completed));
    let repo = SqliteProductRepository::from_connection(conn);
    assert_eq!(repo.count_variants().unwrap(), 600);
}

#[test]
fn test_completion_after_cancel_keeps_cancelled() {
    let (_db_file, db_path) = create_test_db().unwrap();
    let conn = shared_connection(&db_path);
    let tracker = ProgressTracker::new(
        ProgressRepository::from_connection(conn),
        &ImportConfig::default(),
    );

    let id = tracker.create_pending().unwrap().id;
    assert!(tracker.mark_processing(&id).unwrap());
    assert!(tracker.update(&id, 40, "创建变体", 1.0).unwrap());
    assert!(tracker.cancel(&id).unwrap());

    let status = tracker.complete(&id, &ImportResult::default(), 2.0).unwrap();
    assert_eq!(status, ImportStatus::Cancelled);
    assert!(!tracker.update(&id, 90, "创建变体", 3.0).unwrap());
    assert_eq!(tracker.status(&id).unwrap().unwrap().status, ImportStatus::Cancelled);
}

#[test]
fn test_status_survives_tracker_restart_and_cleanup_removes_expired() {
    let (_db_file, db_path) = create_test_db().unwrap();
    let conn = shared_connection(&db_path);
    let config = ImportConfig::default();

    let result = ImportResult {
        products_created: 1,
        variants_created: 3,
        errors: Vec::new(),
    };
    let id = {
        let tracker = ProgressTracker::new(ProgressRepository::from_connection(conn.clone()), &config);
        let id = tracker.create_pending().unwrap().id;
        tracker.mark_processing(&id).unwrap();
        assert_eq!(tracker.complete(&id, &result, 0.5).unwrap(), ImportStatus::Completed);
        id
    };

    // 新实例无缓存，回退持久记录
    let restarted = ProgressTracker::new(ProgressRepository::from_connection(conn), &config);
    let record = restarted.status(&id).unwrap().unwrap();
    assert_eq!(record.status, ImportStatus::Completed);
    assert_eq!(restarted.result(&id).unwrap(), Some(result));

    // 默认留存期内不清理
    assert_eq!(restarted.cleanup().unwrap().0, 0);

    let (records, _) = restarted.cleanup_older_than_hours(-1).unwrap();
    assert_eq!(records, 1);
    assert!(restarted.status(&id).unwrap().is_none());
}
