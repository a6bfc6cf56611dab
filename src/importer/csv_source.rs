// ==========================================
// 模压质量拒收分析 - CSV 检验记录读取
// ==========================================
// 用途: 离线汇总时从导出的 CSV 读取检验记录
// 表头: product_code, lot_no, inspected_qty, rejected_qty, rejection_cost,
//       defect_details, posting_date, inspector_code, inspection_type,
//       source_document_id
// 规则:
// - 完全空白的行跳过
// - 数值单元格为空按 0；无法解析、非有限值或负数报 TypeConversionError
// - 可选文本单元格为空按 None
// ==========================================

use crate::domain::inspection::InspectionRecord;
use crate::domain::types::InspectionType;
use crate::importer::error::{ImportError, ImportResult};
use chrono::NaiveDate;
use csv::{ReaderBuilder, StringRecord};
use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::{debug, info, instrument};

/// 至少需要的列（其余列缺失时按默认值）
const REQUIRED_COLUMNS: [&str; 4] = ["product_code", "lot_no", "inspected_qty", "rejected_qty"];

/// 支持的日期写法
const DATE_FORMATS: [&str; 3] = ["%Y-%m-%d", "%Y/%m/%d", "%Y%m%d"];

// ==========================================
// RecordSource Trait - 检验记录来源
// ==========================================
pub trait RecordSource {
    fn read_records(&self, file_path: &Path) -> ImportResult<Vec<InspectionRecord>>;
}

// ==========================================
// CsvRecordSource
// ==========================================
#[derive(Debug, Clone, Copy, Default)]
pub struct CsvRecordSource;

impl CsvRecordSource {
    pub fn new() -> Self {
        Self
    }

    /// 从任意 Reader 读取（测试与管道输入）
    pub fn read_from<R: Read>(&self, input: R) -> ImportResult<Vec<InspectionRecord>> {
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true) // 允许行长度不一致
            .trim(csv::Trim::All)
            .from_reader(input);

        let headers: HashMap<String, usize> = reader
            .headers()?
            .iter()
            .enumerate()
            .map(|(idx, h)| (h.trim().to_lowercase(), idx))
            .collect();
        for column in REQUIRED_COLUMNS {
            if !headers.contains_key(column) {
                return Err(ImportError::MissingColumn(column.to_string()));
            }
        }

        let mut records = Vec::new();
        let mut skipped = 0usize;
        for (idx, result) in reader.records().enumerate() {
            let row = result?;
            let line = row
                .position()
                .map(|p| p.line() as usize)
                .unwrap_or(idx + 2);

            // 跳过完全空白的行
            if row.iter().all(|v| v.trim().is_empty()) {
                skipped += 1;
                continue;
            }

            let cells = RowCells {
                row: &row,
                headers: &headers,
                line,
            };
            records.push(InspectionRecord {
                product_code: cells.text("product_code"),
                lot_no: cells.text("lot_no"),
                inspected_qty: cells.number("inspected_qty")?,
                rejected_qty: cells.number("rejected_qty")?,
                rejection_cost: cells.number("rejection_cost")?,
                defect_details: cells.text("defect_details").unwrap_or_default(),
                posting_date: cells.date("posting_date")?,
                inspector_code: cells.text("inspector_code"),
                inspection_type: cells.text("inspection_type").map(|t| InspectionType::parse(&t)),
                source_document_id: cells.text("source_document_id"),
            });
        }

        debug!(records = records.len(), skipped, "CSV 解析完成");
        Ok(records)
    }
}

impl RecordSource for CsvRecordSource {
    #[instrument(skip(self), fields(path = %file_path.display()))]
    fn read_records(&self, file_path: &Path) -> ImportResult<Vec<InspectionRecord>> {
        if !file_path.exists() {
            return Err(ImportError::FileNotFound(file_path.display().to_string()));
        }
        if let Some(ext) = file_path.extension() {
            if !ext.eq_ignore_ascii_case("csv") {
                return Err(ImportError::UnsupportedFormat(ext.to_string_lossy().to_string()));
            }
        }

        let file = File::open(file_path)?;
        let records = self.read_from(file)?;
        info!(records = records.len(), "检验记录读取完成");
        Ok(records)
    }
}

/// 单行单元格访问
struct RowCells<'a> {
    row: &'a StringRecord,
    headers: &'a HashMap<String, usize>,
    line: usize,
}

impl RowCells<'_> {
    fn raw(&self, column: &str) -> Option<&str> {
        self.headers
            .get(column)
            .and_then(|idx| self.row.get(*idx))
            .map(str::trim)
            .filter(|v| !v.is_empty())
    }

    fn text(&self, column: &str) -> Option<String> {
        self.raw(column).map(str::to_string)
    }

    fn number(&self, column: &str) -> ImportResult<f64> {
        let Some(raw) = self.raw(column) else {
            return Ok(0.0);
        };
        match raw.parse::<f64>() {
            Ok(v) if v.is_finite() && v >= 0.0 => Ok(v),
            Ok(v) if v.is_finite() => Err(ImportError::TypeConversionError {
                row: self.line,
                field: column.to_string(),
                message: format!("数值不能为负: {}", raw),
            }),
            Ok(_) => Err(ImportError::TypeConversionError {
                row: self.line,
                field: column.to_string(),
                message: format!("非有限数值: {}", raw),
            }),
            Err(e) => Err(ImportError::TypeConversionError {
                row: self.line,
                field: column.to_string(),
                message: format!("{} ({})", e, raw),
            }),
        }
    }

    fn date(&self, column: &str) -> ImportResult<Option<NaiveDate>> {
        let Some(raw) = self.raw(column) else {
            return Ok(None);
        };
        // 兼容带时间部分的导出
        let date_part = raw.split_whitespace().next().unwrap_or(raw);
        DATE_FORMATS
            .iter()
            .find_map(|fmt| NaiveDate::parse_from_str(date_part, fmt).ok())
            .map(Some)
            .ok_or_else(|| ImportError::DateFormatError {
                row: self.line,
                field: column.to_string(),
                value: raw.to_string(),
            })
    }
}
