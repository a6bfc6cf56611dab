// ==========================================
// 模压质量拒收分析 - 引擎层
// ==========================================
// 职责: 实现业务规则引擎,不拼 SQL
// 红线: Engine 不拼 SQL；汇总引擎对数据形状问题只降级不报错
// ==========================================

pub mod car_draft;
pub mod defect_code;
pub mod metrics;
pub mod pricing;
pub mod rollup;
pub mod threshold;

// 重导出核心引擎
pub use car_draft::{CarDrafter, CarRuleError};
pub use defect_code::{DefectCodeNormalizer, DefectEntry, OTHER_CODE};
pub use metrics::MetricsEngine;
pub use pricing::{CostCalculator, PriceSource, PriceSourceError, PricingCodeMapper};
pub use rollup::{RejectionRollupEngine, RejectionTree};
pub use threshold::{ThresholdEngine, ThresholdError};
