// ==========================================
// 模压质量拒收分析 - 报表查询 API
// ==========================================
// 职责: 驾驶舱指标、阶段检验明细、拒收下钻、层级汇总、图表数据、成本分析
// 架构: API 层 → Engine 层（纯计算） + Repository 层（取数）
// ==========================================

use std::sync::Arc;

use chrono::{Duration, Local, Months, NaiveDate};
use std::collections::HashMap;
use tracing::{info, instrument, warn};

use crate::api::error::{config_error, ApiError, ApiResult};
use crate::api::threshold_api::ThresholdApi;
use crate::config::AnalysisConfigReader;
use crate::domain::report::{
    CostAnalysis, CostInspectionRow, DashboardMetrics, DefectDistributionRow, PerformanceRow,
    RejectionDetails, RejectionTrendPoint, StageInspectionRow, StageRejectionPoint,
    StageReportFilter,
};
use crate::domain::rollup::RollupReport;
use crate::domain::types::InspectionType;
use crate::engine::metrics::{MetricsEngine, FINAL_TRACKED_DEFECTS, INCOMING_TRACKED_DEFECTS};
use crate::engine::pricing::CostCalculator;
use crate::engine::rollup::{round2, RejectionRollupEngine};
use crate::repository::inspection_repo::{InspectionFilter, InspectionRepository};
use crate::repository::item_price_repo::ItemPriceRepository;

/// 阶段拒收率图表包含的检验类型（按工序先后）
const CHART_STAGES: [InspectionType; 4] = [
    InspectionType::Patrol,
    InspectionType::Line,
    InspectionType::Lot,
    InspectionType::Incoming,
];

// ==========================================
// ReportApi - 报表查询 API
// ==========================================
pub struct ReportApi {
    inspection_repo: Arc<InspectionRepository>,
    item_price_repo: Arc<ItemPriceRepository>,
    threshold_api: Arc<ThresholdApi>,
    config: Arc<dyn AnalysisConfigReader>,
    metrics: MetricsEngine,
    rollup: RejectionRollupEngine,
}

impl ReportApi {
    pub fn new(
        inspection_repo: Arc<InspectionRepository>,
        item_price_repo: Arc<ItemPriceRepository>,
        threshold_api: Arc<ThresholdApi>,
        config: Arc<dyn AnalysisConfigReader>,
    ) -> Self {
        Self {
            inspection_repo,
            item_price_repo,
            threshold_api,
            config,
            metrics: MetricsEngine::new(),
            rollup: RejectionRollupEngine::new(),
        }
    }

    // ==========================================
    // 驾驶舱
    // ==========================================

    /// 驾驶舱指标
    ///
    /// # 参数
    /// - date: 模压日期
    /// - inspection_type: 检验阶段
    ///
    /// # 返回
    /// - 无检验记录时返回各项为 0 的指标（仍带阈值与待检批次数）
    #[instrument(skip(self), fields(inspection_type = %inspection_type))]
    pub async fn get_dashboard_metrics(
        &self,
        date: NaiveDate,
        inspection_type: &InspectionType,
    ) -> ApiResult<DashboardMetrics> {
        let threshold_pct = self.threshold_api.global_threshold(inspection_type).await?;

        let rows = self.inspection_repo.find_stage_rows(
            date,
            inspection_type,
            &StageReportFilter::default(),
        )?;
        let pending_lots = self.inspection_repo.count_pending_lots(date, inspection_type)?;

        // 巡检/线检均值只对批检有意义
        let stage_averages = if *inspection_type == InspectionType::Lot && !rows.is_empty() {
            (
                self.inspection_repo
                    .average_stage_rejection(date, &InspectionType::Patrol)?,
                self.inspection_repo
                    .average_stage_rejection(date, &InspectionType::Line)?,
            )
        } else {
            (0.0, 0.0)
        };

        let metrics = self
            .metrics
            .dashboard(&rows, threshold_pct, pending_lots, stage_averages);
        info!(
            total_lots = metrics.total_lots,
            exceeding = metrics.lots_exceeding_threshold,
            "驾驶舱指标计算完成"
        );
        Ok(metrics)
    }

    /// 阶段检验明细（驾驶舱列表）
    pub fn get_stage_report(
        &self,
        date: NaiveDate,
        inspection_type: &InspectionType,
        filter: &StageReportFilter,
    ) -> ApiResult<Vec<StageInspectionRow>> {
        Ok(self
            .inspection_repo
            .find_stage_rows(date, inspection_type, filter)?)
    }

    /// 检验单拒收下钻
    ///
    /// # 返回
    /// - Err(ApiError::NotFound): 两张检验单表中均不存在
    pub fn get_inspection_rejection_details(&self, entry_name: &str) -> ApiResult<RejectionDetails> {
        let entry = self
            .inspection_repo
            .find_entry_with_items(entry_name)?
            .ok_or_else(|| ApiError::NotFound(format!("检验单{}不存在", entry_name)))?;
        Ok(self.metrics.rejection_details(&entry))
    }

    // ==========================================
    // 层级汇总
    // ==========================================

    /// 产品 → 主批号 → 子批号 层级汇总
    ///
    /// # 参数
    /// - filter: 过账日期区间等筛选
    /// - apply_costs: 是否按物料单价回填拒收成本
    #[instrument(skip(self, filter), fields(from = %filter.from, to = %filter.to))]
    pub async fn get_rejection_rollup(
        &self,
        filter: &InspectionFilter,
        apply_costs: bool,
    ) -> ApiResult<RollupReport> {
        if filter.from > filter.to {
            return Err(ApiError::InvalidInput(format!(
                "起始日期晚于结束日期: from={}, to={}",
                filter.from, filter.to
            )));
        }

        let mut records = self.inspection_repo.find_records(filter)?;
        if apply_costs && !records.is_empty() {
            let mapper = self
                .config
                .get_pricing_code_mapper()
                .await
                .map_err(config_error)?;
            let priced = CostCalculator::new(mapper)
                .apply(&mut records, self.item_price_repo.as_ref())
                .await;
            if priced == 0 {
                warn!(records = records.len(), "未取到任何单价，拒收成本均为 0");
            }
        }

        let report = self.rollup.aggregate(&records);
        info!(
            records = records.len(),
            rows = report.rows.len(),
            "层级汇总完成"
        );
        Ok(report)
    }

    // ==========================================
    // 图表
    // ==========================================

    /// 缺陷分布图（截至 today 的最近 N 天，取前 M 项）
    pub async fn get_defect_distribution_chart(
        &self,
        today: NaiveDate,
    ) -> ApiResult<Vec<DefectDistributionRow>> {
        let (days, top_n) = self
            .config
            .get_defect_chart_window()
            .await
            .map_err(config_error)?;
        let from = today - Duration::days(days);
        let totals = self.inspection_repo.defect_totals(from, today)?;
        Ok(self.metrics.defect_distribution(totals, top_n))
    }

    /// 各检验阶段某过账日期的平均拒收率
    pub fn get_stage_rejection_chart(&self, date: NaiveDate) -> ApiResult<Vec<StageRejectionPoint>> {
        CHART_STAGES
            .iter()
            .map(|stage| {
                let rate = self
                    .inspection_repo
                    .average_rejection_by_posting_date(stage, date)?;
                Ok(StageRejectionPoint {
                    stage: stage.stage_name().to_string(),
                    inspection_type: stage.clone(),
                    rejection_rate: round2(rate),
                })
            })
            .collect()
    }

    /// 月度拒收率趋势（截至 today 的最近 N 个月，月份倒序）
    ///
    /// # 参数
    /// - months: 回溯月数；None 时取配置
    pub async fn get_rejection_trend_chart(
        &self,
        today: NaiveDate,
        months: Option<u32>,
    ) -> ApiResult<Vec<RejectionTrendPoint>> {
        let months = match months {
            Some(0) => return Err(ApiError::InvalidInput("回溯月数必须大于 0".to_string())),
            Some(m) => m,
            None => self
                .config
                .get_trend_chart_months()
                .await
                .map_err(config_error)?,
        };
        let from = today
            .checked_sub_months(Months::new(months))
            .ok_or_else(|| ApiError::InvalidInput(format!("回溯月数超出范围: {}", months)))?;
        let rows = self
            .inspection_repo
            .monthly_stage_averages(from, today, &CHART_STAGES)?;
        Ok(self.metrics.rejection_trend(&rows))
    }

    /// 操作工绩效（按模压日期取最近 N 天生产、已做批检的批次）
    ///
    /// # 参数
    /// - days / limit: None 时取配置
    #[instrument(skip(self))]
    pub async fn get_operator_performance_chart(
        &self,
        today: NaiveDate,
        days: Option<i64>,
        limit: Option<usize>,
    ) -> ApiResult<Vec<PerformanceRow>> {
        let settings = self
            .config
            .get_performance_chart_settings()
            .await
            .map_err(config_error)?;
        let (from, limit) = chart_window(
            today,
            days.unwrap_or(settings.days),
            limit.unwrap_or(settings.operator_limit),
        )?;
        let samples = self.inspection_repo.operator_lot_samples(from, today)?;
        Ok(self.metrics.performance_ranking(
            &samples,
            settings.min_inspections,
            settings.critical_pct,
            limit,
        ))
    }

    /// 机台绩效（按过账日期取最近 N 天的批检 / 巡检 / 线检）
    #[instrument(skip(self))]
    pub async fn get_machine_performance_chart(
        &self,
        today: NaiveDate,
        days: Option<i64>,
        limit: Option<usize>,
    ) -> ApiResult<Vec<PerformanceRow>> {
        let settings = self
            .config
            .get_performance_chart_settings()
            .await
            .map_err(config_error)?;
        let (from, limit) = chart_window(
            today,
            days.unwrap_or(settings.days),
            limit.unwrap_or(settings.machine_limit),
        )?;
        let samples = self.inspection_repo.machine_samples(from, today)?;
        Ok(self.metrics.performance_ranking(
            &samples,
            settings.min_inspections,
            settings.critical_pct,
            limit,
        ))
    }

    // ==========================================
    // 成本分析
    // ==========================================

    /// 成本分析: 模压产出 + 批检 / 来料 / 终检目视 三段拒收成本
    ///
    /// # 参数
    /// - from: None 时取配置的起始日期
    /// - to: None 时取当天
    ///
    /// # 返回
    /// - Err(ApiError::InvalidInput): 起始日期晚于结束日期
    #[instrument(skip(self))]
    pub async fn get_cost_analysis_data(
        &self,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> ApiResult<CostAnalysis> {
        let from = match from {
            Some(d) => d,
            None => self
                .config
                .get_cost_analysis_start()
                .await
                .map_err(config_error)?,
        };
        let to = to.unwrap_or_else(|| Local::now().date_naive());
        if from > to {
            return Err(ApiError::InvalidInput(format!(
                "起始日期晚于结束日期: from={}, to={}",
                from, to
            )));
        }

        let moulding = self.inspection_repo.moulding_output(from, to)?;
        let lot = self
            .inspection_repo
            .find_cost_rows(&InspectionType::Lot, from, to)?;
        let incoming = self
            .inspection_repo
            .find_cost_rows(&InspectionType::Incoming, from, to)?;
        let final_visual = self
            .inspection_repo
            .find_cost_rows(&InspectionType::FinalVisual, from, to)?;

        let unit_costs = self.cost_unit_prices([&lot, &incoming, &final_visual]).await?;
        let analysis = self.metrics.cost_analysis(
            (from, to),
            moulding,
            self.metrics
                .cost_stage(&InspectionType::Lot, lot, &[], &unit_costs),
            self.metrics.cost_stage(
                &InspectionType::Incoming,
                incoming,
                &INCOMING_TRACKED_DEFECTS,
                &unit_costs,
            ),
            self.metrics.cost_stage(
                &InspectionType::FinalVisual,
                final_visual,
                &FINAL_TRACKED_DEFECTS,
                &unit_costs,
            ),
        );
        info!(
            moulding_rows = analysis.moulding.len(),
            total_cost = analysis.total_rejection_cost,
            "成本分析完成"
        );
        Ok(analysis)
    }

    /// 成品编码 → 单价（无检验单时不取价）
    async fn cost_unit_prices(
        &self,
        stages: [&Vec<CostInspectionRow>; 3],
    ) -> ApiResult<HashMap<String, f64>> {
        if stages.iter().all(|rows| rows.is_empty()) {
            return Ok(HashMap::new());
        }
        let mapper = self
            .config
            .get_pricing_code_mapper()
            .await
            .map_err(config_error)?;
        let codes = stages
            .iter()
            .flat_map(|rows| rows.iter())
            .filter_map(|r| r.item_code.as_deref());
        Ok(CostCalculator::new(mapper)
            .unit_costs(codes, self.item_price_repo.as_ref())
            .await)
    }
}

/// 绩效图的 (起始日期, 条数)；天数与条数必须为正
fn chart_window(today: NaiveDate, days: i64, limit: usize) -> ApiResult<(NaiveDate, usize)> {
    if days <= 0 || limit == 0 {
        return Err(ApiError::InvalidInput(format!(
            "统计天数与条数必须大于 0: days={}, limit={}",
            days, limit
        )));
    }
    let from = Duration::try_days(days)
        .and_then(|span| today.checked_sub_signed(span))
        .ok_or_else(|| ApiError::InvalidInput(format!("统计天数超出范围: {}", days)))?;
    Ok((from, limit))
}
