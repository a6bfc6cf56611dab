// ==========================================
// 模压质量拒收分析 - 核心库
// ==========================================
// 技术栈: Rust + SQLite
// 系统定位: 检验记录层级汇总 + 拒收阈值与纠正措施 (CAR) 管理
// ==========================================

// ==========================================
// 模块声明
// ==========================================

// 领域层 - 实体与类型
pub mod domain;

// 数据仓储层 - 数据访问
pub mod repository;

// 引擎层 - 业务规则
pub mod engine;

// 导入层 - 外部数据
pub mod importer;

// 配置层 - 系统配置
pub mod config;

// 数据库基础设施（连接初始化/PRAGMA 统一/建表）
pub mod db;

// 日志系统
pub mod logging;

// API 层 - 业务接口
pub mod api;

// 应用层 - 组装
pub mod app;

// ==========================================
// 重导出核心类型
// ==========================================

// 领域类型
pub use domain::types::{CarStatus, DocStatus, InspectionType, NodeType, ReportStatus, Severity};

// 领域实体
pub use domain::{
    CorrectiveActionReport, DailyRejectionReport, InspectionRecord, RollupReport, RollupRow,
    ThresholdConfig,
};

// 引擎
pub use engine::{
    CostCalculator, DefectCodeNormalizer, MetricsEngine, RejectionRollupEngine, ThresholdEngine,
};

// API
pub use api::{CarApi, DailyReportApi, ReportApi, ThresholdApi};

// ==========================================
// 常量定义
// ==========================================

// 系统版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// 系统名称
pub const APP_NAME: &str = "模压质量拒收分析";
