// ==========================================
// 模压质量拒收分析 - 导入层
// ==========================================
// 职责: 从导出文件读取检验记录，供离线汇总
// 支持: CSV
// ==========================================

pub mod csv_source;
pub mod error;

// 重导出核心类型
pub use csv_source::{CsvRecordSource, RecordSource};
pub use error::{ImportError, ImportResult};
