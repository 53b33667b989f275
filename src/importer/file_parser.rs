// ==========================================
// 商品目录批量导入系统 - 文件读取
// ==========================================
// 支持: 工作簿 (.xlsx/.xlsm/.xlsb/.xls/.ods) / 分隔文本 (.csv/.tsv/.txt)
// 职责:
// - 识别文件格式
// - calamine 单元格 → CellValue
// - 分隔文本的前向游标（流式变体使用）
// ==========================================

use crate::domain::product::{CellValue, RawRow};
use crate::importer::error::{ImportError, ImportOutcome};
use calamine::{open_workbook_auto, Data, Range, Reader, Sheets};
use csv::{Reader as CsvReader, ReaderBuilder, StringRecord};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

// ==========================================
// SourceFormat - 源文件格式
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    /// 分隔文本（单一隐式工作表）
    Delimited { delimiter: u8 },
    /// 多工作表工作簿
    Workbook,
}

impl SourceFormat {
    /// 根据扩展名识别格式（.txt 按首行嗅探分隔符）
    pub fn detect(path: &Path) -> ImportOutcome<Self> {
        if !path.exists() {
            return Err(ImportError::FileNotFound(path.display().to_string()));
        }

        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_lowercase();

        match ext.as_str() {
            "csv" => Ok(SourceFormat::Delimited { delimiter: b',' }),
            "tsv" => Ok(SourceFormat::Delimited { delimiter: b'\t' }),
            "txt" => Ok(SourceFormat::Delimited {
                delimiter: sniff_delimiter(path)?,
            }),
            "xlsx" | "xlsm" | "xlsb" | "xls" | "ods" => Ok(SourceFormat::Workbook),
            _ => Err(ImportError::UnsupportedFormat(ext)),
        }
    }
}

/// 嗅探首行分隔符（制表符 / 分号 / 逗号，取出现次数最多者）
fn sniff_delimiter(path: &Path) -> ImportOutcome<u8> {
    let mut first_line = String::new();
    BufReader::new(File::open(path)?).read_line(&mut first_line)?;

    let candidates = [b'\t', b';', b','];
    let best = candidates
        .iter()
        .copied()
        .max_by_key(|d| first_line.bytes().filter(|b| b == d).count())
        .unwrap_or(b',');

    if first_line.bytes().any(|b| b == best) {
        Ok(best)
    } else {
        Ok(b',')
    }
}

// ==========================================
// 单元格转换
// ==========================================

/// calamine 单元格 → CellValue
///
/// 说明: 公式错误值按空处理；ISO 日期时间按文本保留，由类型转换阶段解析
pub fn convert_cell(cell: &Data) -> CellValue {
    match cell {
        Data::Empty => CellValue::Empty,
        Data::String(s) => CellValue::String(s.clone()),
        Data::Float(f) => CellValue::Float(*f),
        Data::Int(i) => CellValue::Int(*i),
        Data::Bool(b) => CellValue::Bool(*b),
        Data::DateTime(dt) => CellValue::DateSerial(dt.as_f64()),
        Data::DateTimeIso(s) | Data::DurationIso(s) => CellValue::String(s.clone()),
        Data::Error(_) => CellValue::Empty,
    }
}

/// 分隔文本字段 → CellValue（空白即空）
fn text_cell(raw: &str) -> CellValue {
    if raw.trim().is_empty() {
        CellValue::Empty
    } else {
        CellValue::String(raw.to_string())
    }
}

fn record_to_cells(record: &StringRecord) -> Vec<CellValue> {
    record.iter().map(text_cell).collect()
}

// ==========================================
// 分隔文本
// ==========================================

pub fn open_csv(path: &Path, delimiter: u8) -> ImportOutcome<CsvReader<File>> {
    let file = File::open(path)?;
    Ok(ReaderBuilder::new()
        .has_headers(true)
        .delimiter(delimiter)
        .flexible(true) // 允许行长度不一致
        .from_reader(file))
}

/// 读取分隔文本表头
pub fn read_csv_headers(reader: &mut CsvReader<File>) -> ImportOutcome<Vec<String>> {
    Ok(reader
        .headers()?
        .iter()
        .map(|h| h.trim().trim_start_matches('\u{feff}').to_string())
        .collect())
}

// ==========================================
// CsvRowCursor - 分隔文本前向游标
// ==========================================
// 每次产出一行 RawRow，跳过全空行；行号为文件行号（表头为第 1 行）
pub struct CsvRowCursor {
    reader: CsvReader<File>,
    record: StringRecord,
    headers: Vec<String>,
    next_row_number: usize,
    remaining: Option<usize>,
}

impl CsvRowCursor {
    pub fn open(path: &Path, delimiter: u8, max_rows: Option<usize>) -> ImportOutcome<Self> {
        let mut reader = open_csv(path, delimiter)?;
        let headers = read_csv_headers(&mut reader)?;
        Ok(Self {
            reader,
            record: StringRecord::new(),
            headers,
            next_row_number: 2,
            remaining: max_rows,
        })
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    /// 已消费字节数（用于行数估算）
    pub fn bytes_consumed(&self) -> u64 {
        self.reader.position().byte()
    }
}

impl Iterator for CsvRowCursor {
    type Item = ImportOutcome<RawRow>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.remaining == Some(0) {
                return None;
            }
            match self.reader.read_record(&mut self.record) {
                Ok(false) => return None,
                Err(e) => return Some(Err(e.into())),
                Ok(true) => {
                    let row_number = self.next_row_number;
                    self.next_row_number += 1;

                    let row = RawRow::new(row_number, record_to_cells(&self.record));
                    if row.is_blank() {
                        continue;
                    }
                    if let Some(n) = self.remaining.as_mut() {
                        *n -= 1;
                    }
                    return Some(Ok(row));
                }
            }
        }
    }
}

// ==========================================
// 工作簿
// ==========================================

pub struct WorkbookSource {
    workbook: Sheets<BufReader<File>>,
    sheet_names: Vec<String>,
}

impl WorkbookSource {
    pub fn open(path: &Path) -> ImportOutcome<Self> {
        let workbook: Sheets<BufReader<File>> = open_workbook_auto(path)?;
        let sheet_names = workbook.sheet_names().to_vec();
        if sheet_names.is_empty() {
            return Err(ImportError::ExcelParseError("工作簿无工作表".to_string()));
        }
        Ok(Self {
            workbook,
            sheet_names,
        })
    }

    pub fn sheet_names(&self) -> &[String] {
        &self.sheet_names
    }

    /// 加载单个工作表（调用方负责在处理下一个之前释放）
    pub fn load_sheet(&mut self, index: usize) -> ImportOutcome<SheetData> {
        let name = self
            .sheet_names
            .get(index)
            .cloned()
            .ok_or(ImportError::SheetNotFound(index))?;
        let range = self.workbook.worksheet_range(&name)?;
        Ok(SheetData { name, range })
    }
}

/// 已加载的单个工作表
pub struct SheetData {
    pub name: String,
    range: Range<Data>,
}

impl SheetData {
    /// 表头所在行号（0 起，工作表可能不从 A1 开始）
    pub fn header_row(&self) -> usize {
        self.range.start().map(|(r, _)| r as usize).unwrap_or(0)
    }

    /// 最后一个有值行号（0 起）
    pub fn last_populated_row(&self) -> Option<usize> {
        self.range.end().map(|(r, _)| r as usize)
    }

    /// 数据区行数（含表头）
    pub fn height(&self) -> usize {
        self.range.get_size().0
    }

    pub fn headers(&self) -> Vec<String> {
        self.range
            .rows()
            .next()
            .map(|row| {
                row.iter()
                    .map(|c| convert_cell(c).to_text().trim().to_string())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// 数据行（跳过表头与全空行），行号为 1 起的工作表行号
    pub fn data_rows(&self) -> impl Iterator<Item = RawRow> + '_ {
        let start = self.header_row();
        self.range
            .rows()
            .enumerate()
            .skip(1)
            .map(move |(idx, cells)| {
                RawRow::new(start + idx + 1, cells.iter().map(convert_cell).collect())
            })
            .filter(|row| !row.is_blank())
    }
}
