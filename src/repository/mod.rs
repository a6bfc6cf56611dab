// ==========================================
// 模压质量拒收分析 - 数据仓储层
// ==========================================
// 红线: Repository 不含业务逻辑
// ==========================================
// 职责: 提供数据访问接口,屏蔽数据库细节
// 约束: 所有查询使用参数化,防止 SQL 注入
// ==========================================

pub mod car_repo;
pub mod daily_report_repo;
pub mod error;
pub mod inspection_repo;
pub mod item_price_repo;
pub mod threshold_repo;

// 重导出核心仓储
pub use car_repo::CorrectiveActionRepository;
pub use daily_report_repo::DailyReportRepository;
pub use error::{RepositoryError, RepositoryResult};
pub use inspection_repo::{InspectionFilter, InspectionRepository};
pub use item_price_repo::ItemPriceRepository;
pub use threshold_repo::ThresholdConfigRepository;
