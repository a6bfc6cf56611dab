// ==========================================
// 模压质量拒收分析 - 分析配置读取 Trait
// ==========================================
// 职责: 定义报表 / CAR / 日报所需的配置读取接口（不包含实现）
// 红线: 不包含配置写入、不包含业务逻辑
// ==========================================

use crate::domain::report::PerformanceChartSettings;
use crate::domain::threshold::ThresholdLevels;
use crate::engine::pricing::PricingCodeMapper;
use async_trait::async_trait;
use chrono::NaiveDate;
use std::error::Error;

// ==========================================
// AnalysisConfigReader Trait
// ==========================================
// 实现者: ConfigManager（从 config_kv 表读取）
#[async_trait]
pub trait AnalysisConfigReader: Send + Sync {
    /// 系统默认三级阈值（无任何阈值配置单时使用）
    ///
    /// # 默认值
    /// - 主阈值 5.0 / 预警 3.0 / 严重 10.0
    async fn get_default_threshold_levels(&self) -> Result<ThresholdLevels, Box<dyn Error>>;

    /// 计价编码映射规则
    ///
    /// # 默认值
    /// - T → F
    async fn get_pricing_code_mapper(&self) -> Result<PricingCodeMapper, Box<dyn Error>>;

    /// 日报列表返回条数上限
    ///
    /// # 默认值
    /// - 100
    async fn get_report_list_limit(&self) -> Result<usize, Box<dyn Error>>;

    /// 缺陷分布图的 (统计天数, 取前 N 项)
    ///
    /// # 默认值
    /// - (30, 10)
    async fn get_defect_chart_window(&self) -> Result<(i64, usize), Box<dyn Error>>;

    /// 月度趋势图回溯月数
    ///
    /// # 默认值
    /// - 6
    async fn get_trend_chart_months(&self) -> Result<u32, Box<dyn Error>>;

    /// 操作工 / 机台绩效图口径
    ///
    /// # 默认值
    /// - 30 天，操作工前 10 / 机台前 15，检验单数 > 5 才上榜，严重线 5.0%
    async fn get_performance_chart_settings(
        &self,
    ) -> Result<PerformanceChartSettings, Box<dyn Error>>;

    /// 成本分析未给起始日期时的起点
    ///
    /// # 默认值
    /// - 2025-04-01
    async fn get_cost_analysis_start(&self) -> Result<NaiveDate, Box<dyn Error>>;
}
