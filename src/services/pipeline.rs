// ==========================================
// 商品目录批量导入系统 - 导入管道（同步执行单元）
// ==========================================
// 职责: 单次导入的完整流程，在 spawn_blocking 线程内运行
// 流程:
// 1. 读取原始行（分隔文本走流式游标，工作簿整表加载）
// 2. 分块: 转换前安全扫描 → 字段转换 → 转换后安全扫描
// 3. 试运行: 返回错误 + 建议，不落库
// 4. 批量模式作用域内分块创建父商品 / 变体
// 5. 后置钩子（失败只记日志）
// 进度权重: 读取 0-10 / 转换 10-30 / 创建 30-100
// ==========================================

use crate::config::import_config::ImportConfig;
use crate::domain::product::{
    ColumnMapping, ImportErrorEntry, ImportRequest, ImportResult, RawRow, TransformedRow,
};
use crate::domain::progress::{ChunkStat, ProgressEvent};
use crate::domain::types::ImportMode;
use crate::engine::chunk_processor::ChunkProcessor;
use crate::engine::grouping::ParentGrouper;
use crate::engine::memory::{MemoryProbe, ProcessMemoryProbe};
use crate::engine::product_creator::{CreationPhase, ProductCreator};
use crate::importer::error::{ImportError, ImportOutcome};
use crate::importer::file_parser::{CsvRowCursor, SourceFormat};
use crate::importer::importer_trait::{ContentScanner, ScanVerdict};
use crate::importer::security_scanner::PatternContentScanner;
use crate::importer::transformer::Transformer;
use crate::importer::worksheet_analyzer::WorksheetAnalyzer;
use crate::perf::PerfGuard;
use crate::repository::product_repo::{OptimizedSession, ProductRepository};
use crate::services::hooks::PostImportHook;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// 进度回调: (0-100, 说明)
pub type PipelineProgress<'p> = dyn Fn(u8, &str) + 'p;

/// 预处理统计
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PreparationSummary {
    pub raw_rows: usize,
    pub transformed_rows: usize,
    /// 安全扫描拒绝的行数（转换前 + 转换后）
    pub rejected_rows: usize,
    /// 被中和的单元格数
    pub neutralised_cells: usize,
    pub transform_errors: usize,
    /// 字段 → 转换失败次数
    pub field_failures: BTreeMap<String, usize>,
}

/// 单次运行产物
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineOutcome {
    pub result: ImportResult,
    pub dry_run: bool,
    pub recommendations: Vec<String>,
    pub summary: PreparationSummary,
    pub chunk_stats: Vec<ChunkStat>,
    pub groups: usize,
}

#[derive(Default)]
struct Prepared {
    rows: Vec<TransformedRow>,
    errors: Vec<ImportErrorEntry>,
    summary: PreparationSummary,
}

impl Prepared {
    fn absorb(&mut self, chunk: Prepared) {
        self.rows.extend(chunk.rows);
        self.errors.extend(chunk.errors);
        let s = &mut self.summary;
        s.raw_rows += chunk.summary.raw_rows;
        s.rejected_rows += chunk.summary.rejected_rows;
        s.neutralised_cells += chunk.summary.neutralised_cells;
        s.transform_errors += chunk.summary.transform_errors;
        for (field, n) in chunk.summary.field_failures {
            *s.field_failures.entry(field).or_insert(0) += n;
        }
    }
}

// ==========================================
// ImportPipeline
// ==========================================
pub struct ImportPipeline {
    config: ImportConfig,
    analyzer: WorksheetAnalyzer,
    transformer: Transformer,
    scanner: Arc<dyn ContentScanner>,
    repo: Arc<dyn ProductRepository>,
    probe: Arc<dyn MemoryProbe>,
    hooks: Vec<Arc<dyn PostImportHook>>,
    chunk_size: Option<usize>,
}

impl ImportPipeline {
    pub fn new(config: ImportConfig, repo: Arc<dyn ProductRepository>) -> Self {
        Self {
            analyzer: WorksheetAnalyzer::new(&config),
            transformer: Transformer::new(&config),
            scanner: Arc::new(PatternContentScanner::new()),
            probe: Arc::new(ProcessMemoryProbe::new(config.memory_limit_bytes)),
            repo,
            hooks: Vec::new(),
            chunk_size: None,
            config,
        }
    }

    pub fn with_scanner(mut self, scanner: Arc<dyn ContentScanner>) -> Self {
        self.scanner = scanner;
        self
    }

    pub fn with_probe(mut self, probe: Arc<dyn MemoryProbe>) -> Self {
        self.probe = probe;
        self
    }

    pub fn with_hook(mut self, hook: Arc<dyn PostImportHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    /// 固定块大小（不再按内存余量推导）
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = Some(chunk_size);
        self
    }

    pub fn config(&self) -> &ImportConfig {
        &self.config
    }

    pub fn analyzer(&self) -> &WorksheetAnalyzer {
        &self.analyzer
    }

    fn processor(&self) -> ChunkProcessor {
        let processor = ChunkProcessor::new(&self.config, Arc::clone(&self.probe));
        match self.chunk_size {
            Some(size) => processor.with_chunk_size(size),
            None => processor,
        }
    }

    /// 执行一次导入
    ///
    /// # 错误
    /// - 配置/输入错误: 立即失败
    /// - 分块级存储错误: 当前分块回滚，整次失败
    /// - Cancelled: 分块检查点读到取消
    #[instrument(skip(self, request, progress, cancel), fields(
        import_id = %import_id,
        file = %request.file_path.display(),
        mode = %request.mode.as_str(),
        dry_run = request.dry_run
    ))]
    pub fn execute(
        &self,
        import_id: &str,
        request: &ImportRequest,
        progress: &PipelineProgress<'_>,
        cancel: &dyn Fn() -> bool,
    ) -> ImportOutcome<PipelineOutcome> {
        if request.column_mapping.is_empty() {
            return Err(ImportError::EmptyColumnMapping);
        }
        if request.selected_sheets.is_empty() {
            return Err(ImportError::NoSheetSelected);
        }

        progress(0, "读取文件");
        let processor = self.processor();
        let prepared = self.prepare(request, &processor, progress, cancel)?;
        info!(
            raw_rows = prepared.summary.raw_rows,
            transformed = prepared.rows.len(),
            rejected = prepared.summary.rejected_rows,
            transform_errors = prepared.summary.transform_errors,
            "数据转换完成"
        );
        progress(30, "数据转换完成");

        if cancel() {
            return Err(ImportError::Cancelled);
        }

        if request.dry_run {
            let recommendations = self.recommend(request, &prepared);
            let mut errors = prepared.errors;
            sort_by_row(&mut errors);
            progress(100, "试运行完成");
            return Ok(PipelineOutcome {
                result: ImportResult {
                    errors,
                    ..ImportResult::default()
                },
                dry_run: true,
                recommendations,
                summary: prepared.summary,
                chunk_stats: Vec::new(),
                groups: 0,
            });
        }

        let report = {
            let mut perf = PerfGuard::new("catalog_import");
            let _session = OptimizedSession::begin(self.repo.as_ref(), self.config.bulk_mode)?;

            let creator = ProductCreator::new(
                self.repo.as_ref(),
                &processor,
                import_id,
                self.config.drop_threshold_cm,
                self.config.progress_interval,
            );
            let mode = request.mode;
            let on_create = |phase: CreationPhase, done: usize, total: usize| {
                let (start, span, label) = match (mode, phase) {
                    (ImportMode::AutoGenerateParents, CreationPhase::Parents) => (30, 15, "创建父商品"),
                    (ImportMode::AutoGenerateParents, CreationPhase::Variants) => (45, 55, "创建变体"),
                    (ImportMode::Standard, _) => (30, 70, "创建商品"),
                };
                let percent = start + span * done.min(total) / total.max(1);
                progress(percent as u8, &format!("{}: {}/{}", label, done, total));
            };
            let report = creator.create(&prepared.rows, mode, &on_create, cancel)?;
            perf.record_chunks(&report.chunk_stats);
            report
        };

        let mut result = report.result;
        let mut errors = prepared.errors;
        errors.append(&mut result.errors);
        sort_by_row(&mut errors);
        result.errors = errors;

        for hook in &self.hooks {
            if let Err(e) = hook.after_import(import_id, &result) {
                warn!(hook = hook.name(), error = %e, "后置钩子执行失败（不影响导入结果）");
            }
        }

        progress(100, "导入完成");
        Ok(PipelineOutcome {
            result,
            dry_run: false,
            recommendations: Vec::new(),
            summary: prepared.summary,
            chunk_stats: report.chunk_stats,
            groups: report.groups,
        })
    }

    // ==========================================
    // 读取 + 转换
    // ==========================================
    fn prepare(
        &self,
        request: &ImportRequest,
        processor: &ChunkProcessor,
        progress: &PipelineProgress<'_>,
        cancel: &dyn Fn() -> bool,
    ) -> ImportOutcome<Prepared> {
        let mapping = &request.column_mapping;
        let limit = self.config.max_import_rows;

        let run = match SourceFormat::detect(&request.file_path)? {
            SourceFormat::Delimited { delimiter } => {
                if let Some(bad) = request.selected_sheets.iter().find(|&&i| i != 0) {
                    return Err(ImportError::SheetNotFound(*bad));
                }
                let cursor = CsvRowCursor::open(&request.file_path, delimiter, request.max_rows)?;
                progress(10, "开始流式转换");

                let mut seen = 0usize;
                let mut on_chunk = |e: ProgressEvent| {
                    progress(10, &format!("已转换 {} 行", e.processed_rows));
                };
                processor.process_stream(
                    cursor,
                    None,
                    |chunk: &[RawRow], _| {
                        seen += chunk.len();
                        if seen > limit {
                            return Err(ImportError::RowLimitExceeded { rows: seen, limit });
                        }
                        Ok(self.prepare_chunk(chunk, mapping))
                    },
                    Some(&mut on_chunk),
                    cancel,
                )?
            }
            SourceFormat::Workbook => {
                let raw = self.analyzer.load_rows(
                    &request.file_path,
                    &request.selected_sheets,
                    request.max_rows,
                    limit,
                )?;
                progress(10, "文件读取完成");

                let mut on_chunk = |e: ProgressEvent| {
                    let percent = 10.0 + e.percent.min(100.0) * 0.2;
                    progress(percent as u8, &format!("已转换 {}/{} 行", e.processed_rows, e.total_rows));
                };
                processor.process_in_chunks(
                    &raw,
                    |chunk: &[RawRow], _| Ok(self.prepare_chunk(chunk, mapping)),
                    Some(&mut on_chunk),
                    cancel,
                )?
            }
        };

        let mut prepared = Prepared::default();
        for chunk in run.results {
            prepared.absorb(chunk);
        }
        prepared.summary.transformed_rows = prepared.rows.len();
        Ok(prepared)
    }

    fn prepare_chunk(&self, chunk: &[RawRow], mapping: &ColumnMapping) -> Prepared {
        let mut out = Prepared::default();
        out.summary.raw_rows = chunk.len();

        // 按块内位置标记；多工作表时行号可能重复
        let mut admitted = vec![true; chunk.len()];
        for (pos, row) in chunk.iter().enumerate() {
            if let ScanVerdict::Rejected { field, reason } = self.scanner.scan_raw(row) {
                admitted[pos] = false;
                out.errors.push(
                    ImportErrorEntry::for_row(
                        row.row_number,
                        field.as_deref(),
                        format!("安全扫描拒绝: {}", reason),
                    )
                    .in_sheet(row.sheet_index),
                );
            }
        }
        let rejected = admitted.iter().filter(|ok| !**ok).count();

        let transformation = if rejected == 0 {
            self.transformer.transform(chunk, mapping)
        } else {
            let kept: Vec<RawRow> = chunk
                .iter()
                .zip(&admitted)
                .filter(|(_, ok)| **ok)
                .map(|(row, _)| row.clone())
                .collect();
            self.transformer.transform(&kept, mapping)
        };
        out.summary.rejected_rows = rejected;
        out.summary.transform_errors = transformation.error_count;

        for err in transformation.errors {
            let field = err.field.clone().unwrap_or_else(|| "(row)".to_string());
            *out.summary.field_failures.entry(field).or_insert(0) += 1;
            out.errors.push(err.into());
        }

        for mut row in transformation.transformed_rows {
            match self.scanner.scan_transformed(&mut row) {
                ScanVerdict::Rejected { field, reason } => {
                    out.summary.rejected_rows += 1;
                    out.errors.push(
                        ImportErrorEntry::for_row(
                            row.row_number,
                            field.as_deref(),
                            format!("安全扫描拒绝: {}", reason),
                        )
                        .in_sheet(row.sheet_index),
                    );
                }
                ScanVerdict::Neutralised { fields } => {
                    out.summary.neutralised_cells += fields.len();
                    out.rows.push(row);
                }
                ScanVerdict::Clean => out.rows.push(row),
            }
        }
        out
    }

    // ==========================================
    // 试运行建议
    // ==========================================
    fn recommend(&self, request: &ImportRequest, prepared: &Prepared) -> Vec<String> {
        let s = &prepared.summary;
        let mut tips = Vec::new();

        if s.raw_rows == 0 {
            tips.push("文件中没有数据行，请确认工作表选择与表头位置".to_string());
        }
        if s.transform_errors > 0 {
            let fields = s
                .field_failures
                .iter()
                .map(|(f, n)| format!("{}({})", f, n))
                .collect::<Vec<_>>()
                .join(", ");
            tips.push(format!(
                "{} 行转换失败，集中在字段: {}",
                s.transform_errors, fields
            ));
        }
        if s.rejected_rows > 0 {
            tips.push(format!(
                "{} 行因安全扫描被拒绝，请清除其中的脚本或 HTML 内容",
                s.rejected_rows
            ));
        }
        if s.neutralised_cells > 0 {
            tips.push(format!(
                "{} 个单元格疑似公式，已加前缀单引号中和",
                s.neutralised_cells
            ));
        }
        if !request.column_mapping.maps_field("sku") {
            tips.push("未映射 sku 列，变体无法按 SKU 去重或归并".to_string());
        }

        match request.mode {
            ImportMode::AutoGenerateParents => {
                let outcome = ParentGrouper::new(self.config.drop_threshold_cm).group(&prepared.rows);
                tips.push(format!(
                    "预计生成 {} 个父商品分组，覆盖 {} 个变体",
                    outcome.groups.len(),
                    outcome.row_index.len()
                ));
            }
            ImportMode::Standard => {
                let has_parent_info = prepared
                    .rows
                    .iter()
                    .any(|r| r.is_parent() || r.text("parent_name").is_some());
                if !prepared.rows.is_empty() && !has_parent_info {
                    tips.push("未提供父商品信息，建议使用自动生成父商品模式".to_string());
                }
            }
        }

        if tips.is_empty() {
            tips.push("数据检查通过，可以正式导入".to_string());
        }
        tips
    }
}

fn sort_by_row(errors: &mut [ImportErrorEntry]) {
    errors.sort_by_key(|e| (e.sheet_index(), e.row_number().unwrap_or(usize::MAX)));
}
