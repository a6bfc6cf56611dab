// ==========================================
// 模压质量拒收分析 - 配置层
// ==========================================
// 职责: 系统配置管理（阈值默认值、计价映射、列表上限、图表与成本分析口径）
// 存储: config_kv 表
// ==========================================

pub mod analysis_config_trait;
pub mod config_manager;

// 重导出核心配置管理器
pub use analysis_config_trait::AnalysisConfigReader;
pub use config_manager::{config_keys, ConfigManager};
