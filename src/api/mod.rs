// ==========================================
// 模压质量拒收分析 - API 层
// ==========================================
// 职责: 提供业务 API 接口（报表查询、CAR 流程、日报、阈值）
// ==========================================

pub mod car_api;
pub mod daily_report_api;
pub mod error;
pub mod report_api;
pub mod threshold_api;

// 重导出核心类型
pub use car_api::CarApi;
pub use daily_report_api::DailyReportApi;
pub use error::{ApiError, ApiResult};
pub use report_api::ReportApi;
pub use threshold_api::ThresholdApi;
