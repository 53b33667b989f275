// ==========================================
// 商品目录批量导入系统 - 导入 API
// ==========================================
// 职责: 对调用方暴露的导入门面
// - 文件分析 / 表头加载 / 映射建议
// - 提交 / 查询 / 取消 / 结果 / 试运行 / 清理
// ==========================================

use crate::api::error::{ApiError, ApiResult};
use crate::config::{ConfigManager, ImportConfigReader};
use crate::db::{init_schema, open_sqlite_connection};
use crate::domain::product::{ColumnMapping, ImportRequest, ImportResult};
use crate::domain::progress::ProgressRecord;
use crate::domain::types::ImportStatus;
use crate::importer::field_mapper::FieldMapper;
use crate::importer::worksheet_analyzer::WorksheetAnalysis;
use crate::repository::product_repo_impl::SqliteProductRepository;
use crate::repository::progress_repo::ProgressRepository;
use crate::services::import_orchestrator::ImportOrchestrator;
use crate::services::pipeline::{ImportPipeline, PipelineOutcome};
use crate::services::progress_tracker::ProgressTracker;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::info;

/// 表头加载响应
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeadersResponse {
    pub sheet_index: usize,
    pub headers: Vec<String>,
    /// 按表头别名猜测的映射（仅供参考，调用方确认后提交）
    pub suggested_mapping: ColumnMapping,
    pub sample_rows: Vec<Vec<String>>,
}

/// 导入 API
pub struct ImportApi {
    orchestrator: Arc<ImportOrchestrator>,
    mapper: FieldMapper,
}

impl ImportApi {
    pub fn new(orchestrator: Arc<ImportOrchestrator>) -> Self {
        Self {
            orchestrator,
            mapper: FieldMapper::new(),
        }
    }

    /// 打开数据库并装配完整导入栈
    ///
    /// 说明: 建表幂等；配置从 config_kv 读取，缺失键使用默认值
    pub async fn open(db_path: &str) -> ApiResult<Self> {
        let conn = open_sqlite_connection(db_path)
            .map_err(|e| ApiError::DatabaseConnectionError(e.to_string()))?;
        init_schema(&conn).map_err(|e| ApiError::DatabaseError(e.to_string()))?;
        let conn = Arc::new(Mutex::new(conn));

        let config = ConfigManager::from_connection(conn.clone())?
            .load_import_config()
            .await?;
        info!(
            db_path = %db_path,
            memory_limit = config.memory_limit_bytes,
            bulk_mode = config.bulk_mode,
            "导入配置已加载"
        );

        let repo = Arc::new(SqliteProductRepository::from_connection(conn.clone()));
        let tracker = ProgressTracker::new(ProgressRepository::from_connection(conn), &config);
        let pipeline = ImportPipeline::new(config, repo);
        Ok(Self::new(Arc::new(ImportOrchestrator::new(
            Arc::new(pipeline),
            Arc::new(tracker),
        ))))
    }

    pub fn orchestrator(&self) -> &Arc<ImportOrchestrator> {
        &self.orchestrator
    }

    /// 分析文件中的工作表
    pub fn analyze_file(&self, path: &Path) -> ApiResult<WorksheetAnalysis> {
        Ok(self.orchestrator.pipeline().analyzer().analyze(path)?)
    }

    /// 加载选中工作表的表头 + 样例行 + 映射建议
    pub fn load_headers(&self, path: &Path, selected_sheets: &[usize]) -> ApiResult<HeadersResponse> {
        let loaded = self
            .orchestrator
            .pipeline()
            .analyzer()
            .load_headers_for_selected_sheets(path, selected_sheets)?;

        Ok(HeadersResponse {
            sheet_index: loaded.sheet_index,
            suggested_mapping: self.mapper.guess_mapping_from_headers(&loaded.headers),
            sample_rows: loaded
                .sample_rows
                .iter()
                .map(|r| r.cells.iter().map(|c| c.to_text()).collect())
                .collect(),
            headers: loaded.headers,
        })
    }

    fn validate(request: &ImportRequest) -> ApiResult<()> {
        if request.column_mapping.is_empty() {
            return Err(ApiError::InvalidInput("列映射为空".to_string()));
        }
        if request.selected_sheets.is_empty() {
            return Err(ApiError::InvalidInput("未选择工作表".to_string()));
        }
        if !request.file_path.exists() {
            return Err(ApiError::NotFound(format!(
                "文件 {}",
                request.file_path.display()
            )));
        }
        Ok(())
    }

    /// 提交后台导入，返回任务 ID
    pub fn submit_import(&self, request: ImportRequest) -> ApiResult<String> {
        Self::validate(&request)?;
        let id = self.orchestrator.submit(request)?;
        Ok(id)
    }

    /// 等待后台导入结束
    pub async fn wait(&self, import_id: &str) -> ApiResult<ImportStatus> {
        self.orchestrator
            .wait(import_id)
            .await
            .ok_or_else(|| ApiError::NotFound(format!("导入任务 {}", import_id)))
    }

    pub fn get_status(&self, import_id: &str) -> ApiResult<ProgressRecord> {
        self.orchestrator
            .status(import_id)?
            .ok_or_else(|| ApiError::NotFound(format!("导入任务 {}", import_id)))
    }

    /// 取消导入（仅 pending / processing 可取消）
    pub fn cancel_import(&self, import_id: &str) -> ApiResult<()> {
        let record = self.get_status(import_id)?;
        if self.orchestrator.cancel(import_id)? {
            return Ok(());
        }
        let current = self.get_status(import_id).map(|r| r.status).unwrap_or(record.status);
        Err(ApiError::InvalidStateTransition {
            from: current.to_string(),
            to: ImportStatus::Cancelled.to_string(),
        })
    }

    /// 读取导入结果（未完成时为 None）
    pub fn get_result(&self, import_id: &str) -> ApiResult<Option<ImportResult>> {
        self.get_status(import_id)?;
        Ok(self.orchestrator.result(import_id)?)
    }

    /// 试运行: 只分析 / 转换 / 安全检查，返回错误与建议
    pub async fn dry_run(&self, request: ImportRequest) -> ApiResult<PipelineOutcome> {
        Self::validate(&request)?;
        let request = request.dry_run();
        let orchestrator = Arc::clone(&self.orchestrator);

        tokio::task::spawn_blocking(move || {
            orchestrator
                .pipeline()
                .execute("dry-run", &request, &|_, _| {}, &|| false)
        })
        .await
        .map_err(|e| ApiError::InternalError(format!("试运行线程异常退出: {}", e)))?
        .map_err(ApiError::from)
    }

    /// 清理过期任务记录
    pub fn cleanup(&self) -> ApiResult<(usize, usize)> {
        Ok(self.orchestrator.cleanup()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::{Builder, NamedTempFile};

    fn csv() -> NamedTempFile {
        let mut file = Builder::new().suffix(".csv").tempfile().unwrap();
        writeln!(file, "Product Name,SKU,RRP,Colour").unwrap();
        writeln!(file, "Harlow Chair Navy,100-001,129.99,Navy").unwrap();
        writeln!(file, "Harlow Chair Sage,100-002,129.99,Sage").unwrap();
        file
    }

    async fn api() -> (NamedTempFile, ImportApi) {
        let db = NamedTempFile::new().unwrap();
        let api = ImportApi::open(db.path().to_str().unwrap()).await.unwrap();
        (db, api)
    }

    #[tokio::test]
    async fn test_headers_and_suggested_mapping() {
        let (_db, api) = api().await;
        let file = csv();

        let headers = api.load_headers(file.path(), &[0]).unwrap();
        assert_eq!(headers.headers.len(), 4);
        assert_eq!(headers.sample_rows.len(), 2);
        assert!(headers.suggested_mapping.maps_field("name"));
        assert!(headers.suggested_mapping.maps_field("sku"));

        let analysis = api.analyze_file(file.path()).unwrap();
        assert_eq!(analysis.worksheets[0].row_count, 2);
    }

    #[tokio::test]
    async fn test_submit_status_and_cancel_terminal() {
        let (_db, api) = api().await;
        let file = csv();
        let mapping = api.load_headers(file.path(), &[0]).unwrap().suggested_mapping;

        let id = api.submit_import(ImportRequest::new(file.path(), mapping)).unwrap();
        assert_eq!(api.wait(&id).await.unwrap(), ImportStatus::Completed);
        assert_eq!(api.get_result(&id).unwrap().unwrap().variants_created, 2);

        assert!(matches!(
            api.cancel_import(&id),
            Err(ApiError::InvalidStateTransition { .. })
        ));
        assert!(matches!(api.get_status("missing"), Err(ApiError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_invalid_requests_rejected_before_enqueue() {
        let (_db, api) = api().await;
        let file = csv();

        let err = api
            .submit_import(ImportRequest::new(file.path(), ColumnMapping::new()))
            .unwrap_err();
        assert!(matches!(err, ApiError::InvalidInput(_)));

        let err = api
            .submit_import(ImportRequest::new("/no/such/file.csv", ColumnMapping::from([(0, "name")])))
            .unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_dry_run_returns_recommendations() {
        let (_db, api) = api().await;
        let file = csv();
        let mapping = api.load_headers(file.path(), &[0]).unwrap().suggested_mapping;

        let outcome = api.dry_run(ImportRequest::new(file.path(), mapping)).await.unwrap();
        assert!(outcome.dry_run);
        assert_eq!(outcome.summary.transformed_rows, 2);
        assert!(!outcome.recommendations.is_empty());
        assert_eq!(outcome.result.products_created, 0);
    }
}
