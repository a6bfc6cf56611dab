// ==========================================
// 模压质量拒收分析 - 纠正措施报告 (CAR) API
// ==========================================
// 职责: CAR 查询、由检验单创建、修改、5-Why、提交、取消、待办统计
// 状态: Draft → Submitted → Cancelled（Draft 也可直接取消）
// 红线: 每张检验单最多一张未取消的 CAR
// ==========================================

use std::sync::Arc;

use chrono::{Local, NaiveDate};
use tracing::{info, instrument, warn};

use crate::api::error::{ApiError, ApiResult};
use crate::domain::car::{
    CarDraft, CarLookup, CarPatch, CorrectiveActionReport, PendingCarSummary, MAX_WHY_ANSWERS,
};
use crate::domain::report::{ReportSection, StageReportFilter};
use crate::domain::types::DocStatus;
use crate::engine::car_draft::{self, CarDrafter, CarRuleError};
use crate::engine::metrics::MetricsEngine;
use crate::repository::car_repo::CorrectiveActionRepository;
use crate::repository::daily_report_repo::DailyReportRepository;
use crate::repository::error::RepositoryError;
use crate::repository::inspection_repo::InspectionRepository;

pub struct CarApi {
    car_repo: Arc<CorrectiveActionRepository>,
    inspection_repo: Arc<InspectionRepository>,
    daily_report_repo: Arc<DailyReportRepository>,
    drafter: CarDrafter,
    metrics: MetricsEngine,
}

impl CarApi {
    pub fn new(
        car_repo: Arc<CorrectiveActionRepository>,
        inspection_repo: Arc<InspectionRepository>,
        daily_report_repo: Arc<DailyReportRepository>,
    ) -> Self {
        Self {
            car_repo,
            inspection_repo,
            daily_report_repo,
            drafter: CarDrafter::new(),
            metrics: MetricsEngine::new(),
        }
    }

    // ==========================================
    // 查询
    // ==========================================

    /// 检验单对应的 CAR（忽略已取消）
    pub fn get_car_by_inspection(&self, inspection_entry: &str) -> ApiResult<CarLookup> {
        Ok(match self.car_repo.find_active_by_entry(inspection_entry)? {
            Some(car) => CarLookup {
                exists: true,
                car_name: Some(car.name),
                status: Some(car.status),
                docstatus: Some(car.docstatus),
            },
            None => CarLookup::missing(),
        })
    }

    pub fn get_car(&self, name: &str) -> ApiResult<CorrectiveActionReport> {
        Ok(self.car_repo.get(name)?)
    }

    /// 某模压日期各检验阶段的 CAR 待办统计
    ///
    /// # 参数
    /// - threshold: 拒收率 >= 该值的检验单需要 CAR
    pub fn get_pending_cars_for_date(
        &self,
        date: NaiveDate,
        threshold: f64,
    ) -> ApiResult<PendingCarSummary> {
        let filter = StageReportFilter::default();
        let stage = |section: ReportSection| -> ApiResult<_> {
            let rows = self
                .inspection_repo
                .find_stage_rows(date, &section.inspection_type(), &filter)?;
            Ok(self.metrics.car_summary(&rows, threshold))
        };
        let lot = stage(ReportSection::Lot)?;
        let incoming = stage(ReportSection::Incoming)?;
        let final_visual = stage(ReportSection::Final)?;
        Ok(PendingCarSummary::from_stages(lot, incoming, final_visual))
    }

    // ==========================================
    // 创建 / 修改
    // ==========================================

    /// 由检验单创建 CAR（草稿）
    ///
    /// # 返回
    /// - Err(ApiError::NotFound): 检验单不存在
    /// - Err(ApiError::BusinessRuleViolation): 已有未取消的 CAR
    /// - Err(ApiError::ValidationError): 日期或 5-Why 校验失败
    #[instrument(skip(self, draft))]
    pub fn create_car_from_inspection(
        &self,
        inspection_entry: &str,
        draft: CarDraft,
    ) -> ApiResult<CorrectiveActionReport> {
        let entry = self
            .inspection_repo
            .find_entry_with_items(inspection_entry)?
            .ok_or_else(|| ApiError::NotFound(format!("检验单{}不存在", inspection_entry)))?;

        if let Some(existing) = self.car_repo.find_active_by_entry(inspection_entry)? {
            return Err(ApiError::BusinessRuleViolation(format!(
                "检验单{}已存在CAR: {}",
                inspection_entry, existing.name
            )));
        }

        let car = self
            .drafter
            .build(&entry, draft, Local::now().naive_local())?;
        match self.car_repo.insert(&car) {
            Ok(()) => {}
            // 并发创建: 唯一索引拦下后写入者
            Err(RepositoryError::UniqueConstraintViolation(msg)) => {
                warn!(error = %msg, entry = inspection_entry, "CAR 并发创建被拒绝");
                return Err(ApiError::BusinessRuleViolation(format!(
                    "检验单{}已存在CAR",
                    inspection_entry
                )));
            }
            Err(e) => return Err(e.into()),
        }
        self.sync_daily_report(&car);

        info!(car = %car.name, rejection = car.rejection_percentage, "CAR 已创建");
        Ok(car)
    }

    /// 修改草稿 CAR
    ///
    /// # 说明
    /// - 仅修改 patch 中给出的字段
    /// - why_analysis 给出时整体替换 5-Why 明细
    #[instrument(skip(self, patch))]
    pub fn update_car(&self, name: &str, patch: CarPatch) -> ApiResult<CorrectiveActionReport> {
        let mut car = self.car_repo.get(name)?;
        car_draft::ensure_editable(&car)?;

        if let Some(whys) = &patch.why_analysis {
            if whys.len() > MAX_WHY_ANSWERS {
                return Err(CarRuleError::TooManyWhyAnswers {
                    max: MAX_WHY_ANSWERS,
                    actual: whys.len(),
                }
                .into());
            }
        }

        let now = Local::now().naive_local();
        patch.apply_to(&mut car);
        car_draft::validate_dates(car.car_date, car.target_date, now.date())?;
        car.updated_at = now;

        self.car_repo.update(&car)?;
        self.sync_daily_report(&car);
        Ok(car)
    }

    /// 保存 5-Why 分析（空回答跳过，最多 5 条）
    pub fn save_five_why_analysis(
        &self,
        name: &str,
        answers: &[String],
    ) -> ApiResult<CorrectiveActionReport> {
        let mut car = self.car_repo.get(name)?;
        car_draft::ensure_editable(&car)?;

        car.five_why_analysis = car_draft::why_entries(answers)?;
        car.updated_at = Local::now().naive_local();

        self.car_repo.update(&car)?;
        self.sync_daily_report(&car);
        Ok(car)
    }

    // ==========================================
    // 状态流转
    // ==========================================

    /// 提交 CAR（需已填写纠正措施）
    #[instrument(skip(self))]
    pub fn submit_car(&self, name: &str) -> ApiResult<CorrectiveActionReport> {
        let mut car = self.car_repo.get(name)?;
        car_draft::ensure_submittable(&car)?;

        car.docstatus = DocStatus::Submitted;
        car.updated_at = Local::now().naive_local();
        self.car_repo.update(&car)?;
        self.sync_daily_report(&car);

        info!(car = %car.name, "CAR 已提交");
        Ok(car)
    }

    /// 取消 CAR（取消后该检验单可重新创建）
    #[instrument(skip(self))]
    pub fn cancel_car(&self, name: &str) -> ApiResult<CorrectiveActionReport> {
        let mut car = self.car_repo.get(name)?;
        car_draft::ensure_cancellable(&car)?;

        car.docstatus = DocStatus::Cancelled;
        car.updated_at = Local::now().naive_local();
        self.car_repo.update(&car)?;

        info!(car = %car.name, "CAR 已取消");
        Ok(car)
    }

    /// 将 CAR 编号与状态回写到日报明细
    ///
    /// 回写失败只记日志，不影响 CAR 本身的保存
    fn sync_daily_report(&self, car: &CorrectiveActionReport) {
        match self
            .daily_report_repo
            .sync_car_reference(&car.inspection_entry, &car.name, car.status)
        {
            Ok(0) => {}
            Ok(updated) => info!(car = %car.name, updated, "日报明细已回写CAR"),
            Err(e) => warn!(car = %car.name, error = %e, "日报明细回写CAR失败"),
        }
    }
}
