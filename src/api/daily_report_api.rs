// ==========================================
// 模压质量拒收分析 - 每日拒收报告 API
// ==========================================
// 职责: 生成 / 查询 / 列表 / 提交每日拒收报告
// 规则:
// - 每个模压日期只有一份日报，已存在时返回已有编号
// - 日期不能晚于今天
// - 分段: 批检 / 来料检验 / 终检目视
// ==========================================

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Local, NaiveDate};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::api::error::{config_error, ApiError, ApiResult};
use crate::api::threshold_api::ThresholdApi;
use crate::config::AnalysisConfigReader;
use crate::domain::report::{
    DailyRejectionReport, DailyReportListItem, GenerateOutcome, ReportSection, StageInspectionRow,
    StageReportFilter,
};
use crate::domain::types::{InspectionType, ReportStatus};
use crate::engine::metrics::MetricsEngine;
use crate::engine::pricing::CostCalculator;
use crate::repository::daily_report_repo::DailyReportRepository;
use crate::repository::error::RepositoryError;
use crate::repository::inspection_repo::InspectionRepository;
use crate::repository::item_price_repo::ItemPriceRepository;

pub struct DailyReportApi {
    daily_report_repo: Arc<DailyReportRepository>,
    inspection_repo: Arc<InspectionRepository>,
    item_price_repo: Arc<ItemPriceRepository>,
    threshold_api: Arc<ThresholdApi>,
    config: Arc<dyn AnalysisConfigReader>,
    metrics: MetricsEngine,
}

impl DailyReportApi {
    pub fn new(
        daily_report_repo: Arc<DailyReportRepository>,
        inspection_repo: Arc<InspectionRepository>,
        item_price_repo: Arc<ItemPriceRepository>,
        threshold_api: Arc<ThresholdApi>,
        config: Arc<dyn AnalysisConfigReader>,
    ) -> Self {
        Self {
            daily_report_repo,
            inspection_repo,
            item_price_repo,
            threshold_api,
            config,
            metrics: MetricsEngine::new(),
        }
    }

    /// 生成每日拒收报告
    ///
    /// # 参数
    /// - report_date: 模压日期
    /// - threshold: 拒收阈值（%）；None 时取批检全局生效阈值
    ///
    /// # 返回
    /// - Ok(GenerateOutcome::Exists): 该日期已有日报
    /// - Ok(GenerateOutcome::Created): 新建日报（Draft）
    /// - Err(ApiError::InvalidInput): 日期晚于今天或阈值为负
    #[instrument(skip(self))]
    pub async fn generate_daily_report(
        &self,
        report_date: NaiveDate,
        threshold: Option<f64>,
    ) -> ApiResult<GenerateOutcome> {
        let now = Local::now().naive_local();
        if report_date > now.date() {
            return Err(ApiError::InvalidInput(format!(
                "日报日期不能晚于今天: {}",
                report_date
            )));
        }
        if let Some(name) = self.daily_report_repo.find_name_by_date(report_date)? {
            info!(report = %name, "日报已存在");
            return Ok(GenerateOutcome::Exists(name));
        }

        let threshold_pct = match threshold {
            Some(t) if t < 0.0 || !t.is_finite() => {
                return Err(ApiError::InvalidInput(format!("阈值无效: {}", t)))
            }
            Some(t) => t,
            None => self.threshold_api.global_threshold(&InspectionType::Lot).await?,
        };

        // 三个分段的检验明细
        let filter = StageReportFilter::default();
        let mut sections: Vec<(ReportSection, Vec<StageInspectionRow>)> = Vec::with_capacity(3);
        for section in [ReportSection::Lot, ReportSection::Incoming, ReportSection::Final] {
            let rows = self
                .inspection_repo
                .find_stage_rows(report_date, &section.inspection_type(), &filter)?;
            sections.push((section, rows));
        }

        let unit_costs = self.unit_costs(&sections).await?;

        let mut report = DailyRejectionReport {
            name: generate_report_name(report_date),
            report_date,
            threshold_percentage: threshold_pct,
            status: ReportStatus::Draft,
            lot: Default::default(),
            incoming: Default::default(),
            final_visual: Default::default(),
            items: Vec::new(),
            created_at: now,
        };
        for (section, rows) in &sections {
            let items = self
                .metrics
                .report_items(*section, rows, threshold_pct, &unit_costs);
            let summary = self.metrics.section_summary(&items);
            match section {
                ReportSection::Lot => report.lot = summary,
                ReportSection::Incoming => report.incoming = summary,
                ReportSection::Final => report.final_visual = summary,
            }
            report.items.extend(items);
        }

        match self.daily_report_repo.insert(&report) {
            Ok(()) => {}
            // 并发生成同一日期: 以先写入者为准
            Err(RepositoryError::UniqueConstraintViolation(msg)) => {
                warn!(error = %msg, "日报并发生成，返回已有日报");
                return match self.daily_report_repo.find_name_by_date(report_date)? {
                    Some(name) => Ok(GenerateOutcome::Exists(name)),
                    None => Err(ApiError::BusinessRuleViolation(msg)),
                };
            }
            Err(e) => return Err(e.into()),
        }

        info!(
            report = %report.name,
            items = report.items.len(),
            lot_exceeding = report.lot.exceeding_threshold,
            "日报已生成"
        );
        Ok(GenerateOutcome::Created(report.name))
    }

    /// 成品编码 → 单价（取价失败时为 0，报表照常生成）
    async fn unit_costs(
        &self,
        sections: &[(ReportSection, Vec<StageInspectionRow>)],
    ) -> ApiResult<HashMap<String, f64>> {
        let mapper = self
            .config
            .get_pricing_code_mapper()
            .await
            .map_err(config_error)?;
        let codes = sections
            .iter()
            .flat_map(|(_, rows)| rows.iter())
            .filter_map(|r| r.item_code.as_deref());
        Ok(CostCalculator::new(mapper)
            .unit_costs(codes, self.item_price_repo.as_ref())
            .await)
    }

    pub fn get_daily_report(&self, name: &str) -> ApiResult<DailyRejectionReport> {
        self.daily_report_repo
            .find_by_name(name)?
            .ok_or_else(|| ApiError::NotFound(format!("日报{}不存在", name)))
    }

    /// 日报列表（按日期倒序，条数上限取自配置）
    pub async fn list_daily_reports(&self) -> ApiResult<Vec<DailyReportListItem>> {
        let limit = self
            .config
            .get_report_list_limit()
            .await
            .map_err(config_error)?;
        Ok(self.daily_report_repo.list(limit)?)
    }

    /// 提交日报: Draft → Generated
    pub fn submit_daily_report(&self, name: &str) -> ApiResult<()> {
        let report = self.get_daily_report(name)?;
        if report.status != ReportStatus::Draft {
            return Err(ApiError::InvalidStateTransition {
                from: report.status.to_string(),
                to: ReportStatus::Generated.to_string(),
            });
        }
        self.daily_report_repo.set_status(name, ReportStatus::Generated)?;
        info!(report = %name, "日报已提交");
        Ok(())
    }
}

/// 生成日报编号: DRR-YYYYMMDD-xxxxxx
fn generate_report_name(report_date: NaiveDate) -> String {
    let id = Uuid::new_v4().simple().to_string().to_uppercase();
    format!("DRR-{}-{}", report_date.format("%Y%m%d"), &id[..6])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_name_carries_date() {
        let name = generate_report_name(NaiveDate::from_ymd_opt(2025, 11, 26).unwrap());
        assert!(name.starts_with("DRR-20251126-"));
        assert_eq!(name.len(), "DRR-20251126-".len() + 6);
    }
}
