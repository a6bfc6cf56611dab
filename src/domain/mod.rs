// ==========================================
// 模压质量拒收分析 - 领域模型层
// ==========================================
// 职责: 定义检验记录、汇总输出、CAR、阈值、报表等实体与类型
// 红线: 不含数据访问逻辑,不含引擎逻辑
// ==========================================

pub mod car;
pub mod inspection;
pub mod report;
pub mod rollup;
pub mod threshold;
pub mod types;

// 重导出核心类型
pub use car::{
    CarDraft, CarLookup, CarPatch, CorrectiveActionReport, FiveWhyEntry, PendingCarSummary,
    StageCarSummary,
};
pub use inspection::{InspectionRecord, LotNumber, DEFAULT_SUB_LOT, UNKNOWN_BUCKET};
pub use report::{
    DailyRejectionReport, DailyReportItem, DailyReportListItem, DashboardMetrics,
    DefectDistributionRow, EntryDefectLine, GenerateOutcome, InspectionEntryDetail,
    RejectionDetails, RejectionStage, ReportSection, SectionSummary, StageDefect,
    StageInspectionRow, StageRejectionPoint, StageReportFilter,
};
pub use rollup::{RollupReport, RollupRow, RollupSummary};
pub use threshold::{ThresholdConfig, ThresholdLevels, ThresholdScope};
pub use types::{CarStatus, DocStatus, InspectionType, NodeType, ReportStatus, Severity};
