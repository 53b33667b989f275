// ==========================================
// 商品目录批量导入系统 - 工作表分析器
// ==========================================
// 职责:
// - 发现工作表，提取表头 / 行数 / 预览
// - 为选中工作表加载表头与样例行（供列映射）
// - 加载选中工作表的全部（或截断后的）原始行
// 约束:
// - 一次只加载一个工作表，处理完即释放
// - 超过阈值的行数为估算值（row_count_estimated = true）
// ==========================================

use crate::config::ImportConfig;
use crate::domain::product::RawRow;
use crate::importer::error::{ImportError, ImportOutcome};
use crate::importer::file_parser::{CsvRowCursor, SourceFormat, WorkbookSource};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info, instrument, warn};

// ==========================================
// 分析结果
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorksheetInfo {
    pub index: usize,
    pub name: String,
    pub headers: Vec<String>,
    /// 数据行数（不含表头）
    pub row_count: usize,
    pub row_count_estimated: bool,
    /// 前若干行文本预览
    pub preview: Vec<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorksheetAnalysis {
    pub worksheets: Vec<WorksheetInfo>,
    /// 工作表数量超过上限被截断
    pub truncated: bool,
}

/// 选中工作表的表头与样例行
#[derive(Debug, Clone, PartialEq)]
pub struct SheetHeaders {
    pub sheet_index: usize,
    pub headers: Vec<String>,
    pub sample_rows: Vec<RawRow>,
}

// ==========================================
// WorksheetAnalyzer
// ==========================================
#[derive(Debug, Clone)]
pub struct WorksheetAnalyzer {
    max_worksheets: usize,
    exact_count_threshold: usize,
    preview_rows: usize,
}

impl Default for WorksheetAnalyzer {
    fn default() -> Self {
        Self::new(&ImportConfig::default())
    }
}

impl WorksheetAnalyzer {
    pub fn new(config: &ImportConfig) -> Self {
        Self {
            max_worksheets: config.max_worksheets.max(1),
            exact_count_threshold: config.exact_count_threshold,
            preview_rows: config.preview_rows,
        }
    }

    /// 分析文件中的全部工作表
    #[instrument(skip(self), fields(path = %path.display()))]
    pub fn analyze(&self, path: &Path) -> ImportOutcome<WorksheetAnalysis> {
        match SourceFormat::detect(path)? {
            SourceFormat::Delimited { delimiter } => {
                let info = self.analyze_delimited(path, delimiter)?;
                Ok(WorksheetAnalysis {
                    worksheets: vec![info],
                    truncated: false,
                })
            }
            SourceFormat::Workbook => self.analyze_workbook(path),
        }
    }

    fn analyze_delimited(&self, path: &Path, delimiter: u8) -> ImportOutcome<WorksheetInfo> {
        let mut cursor = CsvRowCursor::open(path, delimiter, None)?;
        let headers = cursor.headers().to_vec();
        let header_bytes = cursor.bytes_consumed();

        let mut preview = Vec::new();
        let mut scanned = 0usize;
        let mut reached_end = true;

        for row in cursor.by_ref() {
            let row = row?;
            if preview.len() < self.preview_rows {
                preview.push(row.cells.iter().map(|c| c.to_text()).collect());
            }
            scanned += 1;
            // 多读一行确认确实超过阈值
            if scanned > self.exact_count_threshold {
                reached_end = false;
                break;
            }
        }

        let (row_count, estimated) = if reached_end {
            (scanned, false)
        } else {
            // 按已扫描前缀的平均行字节数估算
            let scanned_bytes = cursor.bytes_consumed().saturating_sub(header_bytes).max(1);
            let file_bytes = std::fs::metadata(path)?.len();
            let bytes_per_row = scanned_bytes as f64 / scanned as f64;
            let estimate = (file_bytes.saturating_sub(header_bytes) as f64 / bytes_per_row).round();
            (estimate.max(scanned as f64) as usize, true)
        };

        debug!(rows = row_count, estimated, "分隔文本分析完成");

        Ok(WorksheetInfo {
            index: 0,
            name: path
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_else(|| "Sheet1".to_string()),
            headers,
            row_count,
            row_count_estimated: estimated,
            preview,
        })
    }

    fn analyze_workbook(&self, path: &Path) -> ImportOutcome<WorksheetAnalysis> {
        let mut source = WorkbookSource::open(path)?;
        let total = source.sheet_names().len();
        let truncated = total > self.max_worksheets;
        if truncated {
            warn!(
                total,
                limit = self.max_worksheets,
                "工作表数量超过上限，仅分析前 {} 个",
                self.max_worksheets
            );
        }

        let mut worksheets = Vec::new();
        for index in 0..total.min(self.max_worksheets) {
            // sheet 在本轮循环结束时释放
            let sheet = source.load_sheet(index)?;
            let data_height = sheet.height().saturating_sub(1);

            let (row_count, estimated) = if data_height <= self.exact_count_threshold {
                (sheet.data_rows().count(), false)
            } else {
                // 按最后一个有值行号估算
                let last = sheet.last_populated_row().unwrap_or(0);
                (last.saturating_sub(sheet.header_row()), true)
            };

            let preview = sheet
                .data_rows()
                .take(self.preview_rows)
                .map(|row| row.cells.iter().map(|c| c.to_text()).collect())
                .collect();

            worksheets.push(WorksheetInfo {
                index,
                name: sheet.name.clone(),
                headers: sheet.headers(),
                row_count,
                row_count_estimated: estimated,
                preview,
            });
        }

        info!(sheets = worksheets.len(), truncated, "工作簿分析完成");
        Ok(WorksheetAnalysis {
            worksheets,
            truncated,
        })
    }

    /// 加载第一个选中工作表的表头 + 样例行（≤ preview_rows）
    pub fn load_headers_for_selected_sheets(
        &self,
        path: &Path,
        selected_sheets: &[usize],
    ) -> ImportOutcome<SheetHeaders> {
        let sheet_index = *selected_sheets.first().ok_or(ImportError::NoSheetSelected)?;

        match SourceFormat::detect(path)? {
            SourceFormat::Delimited { delimiter } => {
                if sheet_index != 0 {
                    return Err(ImportError::SheetNotFound(sheet_index));
                }
                let mut cursor = CsvRowCursor::open(path, delimiter, Some(self.preview_rows))?;
                let headers = cursor.headers().to_vec();
                let sample_rows = cursor.by_ref().collect::<ImportOutcome<Vec<_>>>()?;
                Ok(SheetHeaders {
                    sheet_index,
                    headers,
                    sample_rows,
                })
            }
            SourceFormat::Workbook => {
                let mut source = WorkbookSource::open(path)?;
                let sheet = source.load_sheet(sheet_index)?;
                Ok(SheetHeaders {
                    sheet_index,
                    headers: sheet.headers(),
                    sample_rows: sheet.data_rows().take(self.preview_rows).collect(),
                })
            }
        }
    }

    /// 加载选中工作表的原始行
    ///
    /// # 参数
    /// - cap: 请求级截断（到达即停止，不报错）
    /// - hard_limit: 系统上限（超出即失败）
    pub fn load_rows(
        &self,
        path: &Path,
        selected_sheets: &[usize],
        cap: Option<usize>,
        hard_limit: usize,
    ) -> ImportOutcome<Vec<RawRow>> {
        if selected_sheets.is_empty() {
            return Err(ImportError::NoSheetSelected);
        }
        let budget = cap.unwrap_or(usize::MAX);
        let mut rows: Vec<RawRow> = Vec::new();

        match SourceFormat::detect(path)? {
            SourceFormat::Delimited { delimiter } => {
                if let Some(bad) = selected_sheets.iter().find(|&&i| i != 0) {
                    return Err(ImportError::SheetNotFound(*bad));
                }
                let cursor = CsvRowCursor::open(path, delimiter, cap)?;
                for row in cursor {
                    rows.push(row?);
                    if rows.len() > hard_limit {
                        return Err(ImportError::RowLimitExceeded {
                            rows: rows.len(),
                            limit: hard_limit,
                        });
                    }
                }
            }
            SourceFormat::Workbook => {
                let mut source = WorkbookSource::open(path)?;
                for &index in selected_sheets {
                    if rows.len() >= budget {
                        break;
                    }
                    let sheet = source.load_sheet(index)?;
                    for row in sheet.data_rows().take(budget - rows.len()) {
                        rows.push(row.with_sheet(index));
                    }
                    if rows.len() > hard_limit {
                        return Err(ImportError::RowLimitExceeded {
                            rows: rows.len(),
                            limit: hard_limit,
                        });
                    }
                    debug!(sheet = %sheet.name, total_rows = rows.len(), "工作表已加载");
                }
            }
        }

        if cap.is_some_and(|c| rows.len() >= c) {
            warn!(cap = budget, "行数达到请求上限，其余行未加载");
        }
        info!(rows = rows.len(), "原始行加载完成");
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::Builder;

    fn csv_file(rows: usize) -> tempfile::NamedTempFile {
        let mut file = Builder::new().suffix(".csv").tempfile().unwrap();
        writeln!(file, "sku,name,retail_price").unwrap();
        for i in 0..rows {
            writeln!(file, "SKU{:05},Product {:05},{:02}.99", i, i, i % 50).unwrap();
        }
        file
    }

    #[test]
    fn test_small_csv_exact_count_and_preview() {
        let file = csv_file(12);
        let analysis = WorksheetAnalyzer::default().analyze(file.path()).unwrap();
        assert_eq!(analysis.worksheets.len(), 1);

        let sheet = &analysis.worksheets[0];
        assert_eq!(sheet.headers, vec!["sku", "name", "retail_price"]);
        assert_eq!(sheet.row_count, 12);
        assert!(!sheet.row_count_estimated);
        assert_eq!(sheet.preview.len(), 5);
        assert_eq!(sheet.preview[0][0], "SKU00000");
    }

    #[test]
    fn test_large_csv_row_count_is_estimated() {
        let file = csv_file(3000);
        let sheet = WorksheetAnalyzer::default()
            .analyze(file.path())
            .unwrap()
            .worksheets
            .remove(0);
        assert!(sheet.row_count_estimated);
        // 行宽均匀时估算误差应很小
        let diff = (sheet.row_count as i64 - 3000).abs();
        assert!(diff < 150, "estimate {} too far from 3000", sheet.row_count);
    }

    #[test]
    fn test_row_count_at_threshold_is_exact() {
        let analyzer = WorksheetAnalyzer::default();

        let at = csv_file(1000);
        let sheet = analyzer.analyze(at.path()).unwrap().worksheets.remove(0);
        assert!(!sheet.row_count_estimated);
        assert_eq!(sheet.row_count, 1000);

        let over = csv_file(1001);
        let sheet = analyzer.analyze(over.path()).unwrap().worksheets.remove(0);
        assert!(sheet.row_count_estimated);
    }

    #[test]
    fn test_headers_for_selected_sheet() {
        let file = csv_file(20);
        let analyzer = WorksheetAnalyzer::default();
        let headers = analyzer
            .load_headers_for_selected_sheets(file.path(), &[0])
            .unwrap();
        assert_eq!(headers.sample_rows.len(), 5);
        assert!(matches!(
            analyzer.load_headers_for_selected_sheets(file.path(), &[]),
            Err(ImportError::NoSheetSelected)
        ));
    }

    #[test]
    fn test_load_rows_cap_and_hard_limit() {
        let file = csv_file(50);
        let analyzer = WorksheetAnalyzer::default();

        let capped = analyzer.load_rows(file.path(), &[0], Some(10), 1000).unwrap();
        assert_eq!(capped.len(), 10);
        assert_eq!(capped[0].row_number, 2);

        let err = analyzer.load_rows(file.path(), &[0], None, 20).unwrap_err();
        assert!(matches!(err, ImportError::RowLimitExceeded { limit: 20, .. }));

        assert!(matches!(
            analyzer.load_rows(file.path(), &[1], None, 1000),
            Err(ImportError::SheetNotFound(1))
        ));
    }
}
