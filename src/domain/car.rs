// ==========================================
// 模压质量拒收分析 - 纠正措施报告 (CAR) 领域模型
// ==========================================
// 一张检验单最多对应一张未取消的 CAR
// 5-Why 分析按顺序保存，最多 5 条
// ==========================================

use crate::domain::types::{CarStatus, DocStatus};
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// 5-Why 分析最多条数
pub const MAX_WHY_ANSWERS: usize = 5;

// ==========================================
// CorrectiveActionReport - 纠正措施报告
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrectiveActionReport {
    // ===== 主键与关联 =====
    pub name: String,                    // CAR 编号 (CAR-xxxxxxxx)
    pub car_date: NaiveDate,             // 开单日期
    pub inspection_entry: String,        // 关联检验单
    pub lot_no: Option<String>,
    pub product_ref_no: Option<String>,
    pub rejection_percentage: f64,

    // ===== 分析内容 =====
    pub problem_description: Option<String>,
    pub cause_for_non_detection: Option<String>,
    pub cause_for_occurrence: Option<String>,
    pub corrective_action: Option<String>,
    pub preventive_measures: Option<String>,
    pub remarks: Option<String>,

    // ===== 跟踪 =====
    pub assigned_to: Option<String>,
    pub target_date: Option<NaiveDate>,
    pub status: CarStatus,
    pub docstatus: DocStatus,
    pub five_why_analysis: Vec<FiveWhyEntry>,

    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

// ==========================================
// FiveWhyEntry - 5-Why 单条
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FiveWhyEntry {
    pub why_question: String,
    pub answer: String,
}

// ==========================================
// CarDraft - 创建 CAR 时的可选输入
// ==========================================
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CarDraft {
    pub problem_description: Option<String>,
    pub cause_for_non_detection: Option<String>,
    pub cause_for_occurrence: Option<String>,
    pub corrective_action: Option<String>,
    pub preventive_measures: Option<String>,
    pub remarks: Option<String>,
    pub assigned_to: Option<String>,
    pub target_date: Option<NaiveDate>,
    #[serde(default)]
    pub why_analysis: Vec<String>,
}

// ==========================================
// CarPatch - 更新 CAR（仅草稿可更新）
// ==========================================
// 字段为 None 表示不修改；why_analysis 为 Some 时整体替换
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CarPatch {
    pub problem_description: Option<String>,
    pub cause_for_non_detection: Option<String>,
    pub cause_for_occurrence: Option<String>,
    pub corrective_action: Option<String>,
    pub preventive_measures: Option<String>,
    pub assigned_to: Option<String>,
    pub target_date: Option<NaiveDate>,
    pub remarks: Option<String>,
    pub status: Option<CarStatus>,
    pub why_analysis: Option<Vec<FiveWhyEntry>>,
}

impl CarPatch {
    /// 将补丁应用到 CAR（不做状态校验）
    pub fn apply_to(self, car: &mut CorrectiveActionReport) {
        macro_rules! patch {
            ($($field:ident),*) => {
                $(if let Some(v) = self.$field { car.$field = Some(v); })*
            };
        }
        patch!(
            problem_description,
            cause_for_non_detection,
            cause_for_occurrence,
            corrective_action,
            preventive_measures,
            assigned_to,
            target_date,
            remarks
        );
        if let Some(status) = self.status {
            car.status = status;
        }
        if let Some(whys) = self.why_analysis {
            car.five_why_analysis = whys;
        }
    }
}

// ==========================================
// CarLookup - 按检验单查询 CAR 的结果
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CarLookup {
    pub exists: bool,
    pub car_name: Option<String>,
    pub status: Option<CarStatus>,
    pub docstatus: Option<DocStatus>,
}

impl CarLookup {
    pub fn missing() -> Self {
        Self {
            exists: false,
            car_name: None,
            status: None,
            docstatus: None,
        }
    }
}

// ==========================================
// CAR 汇总（按检验阶段）
// ==========================================
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct StageCarSummary {
    pub total_exceeding_threshold: usize,
    pub cars_filled: usize,
    pub cars_pending: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PendingCarSummary {
    pub lot_inspection_summary: StageCarSummary,
    pub incoming_inspection_summary: StageCarSummary,
    pub final_inspection_summary: StageCarSummary,
    pub total_exceeding_threshold: usize,
    pub total_cars_filled: usize,
    pub total_cars_pending: usize,
}

impl PendingCarSummary {
    /// 由三个阶段汇总计算合计
    pub fn from_stages(lot: StageCarSummary, incoming: StageCarSummary, final_visual: StageCarSummary) -> Self {
        let stages = [lot, incoming, final_visual];
        Self {
            lot_inspection_summary: lot,
            incoming_inspection_summary: incoming,
            final_inspection_summary: final_visual,
            total_exceeding_threshold: stages.iter().map(|s| s.total_exceeding_threshold).sum(),
            total_cars_filled: stages.iter().map(|s| s.cars_filled).sum(),
            total_cars_pending: stages.iter().map(|s| s.cars_pending).sum(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn sample_car() -> CorrectiveActionReport {
        let ts = NaiveDate::from_ymd_opt(2025, 11, 26)
            .unwrap()
            .and_hms_opt(8, 0, 0)
            .unwrap();
        CorrectiveActionReport {
            name: "CAR-0001".to_string(),
            car_date: ts.date(),
            inspection_entry: "IE-0001".to_string(),
            lot_no: Some("25K26X01".to_string()),
            product_ref_no: Some("T5117".to_string()),
            rejection_percentage: 7.5,
            problem_description: None,
            cause_for_non_detection: None,
            cause_for_occurrence: None,
            corrective_action: None,
            preventive_measures: None,
            remarks: Some("old".to_string()),
            assigned_to: None,
            target_date: None,
            status: CarStatus::Open,
            docstatus: DocStatus::Draft,
            five_why_analysis: vec![],
            created_at: ts,
            updated_at: ts,
        }
    }

    #[test]
    fn test_patch_only_touches_given_fields() {
        let mut car = sample_car();
        let patch = CarPatch {
            corrective_action: Some("Re-train operator".to_string()),
            why_analysis: Some(vec![FiveWhyEntry {
                why_question: "Why 1".to_string(),
                answer: "Mould temp low".to_string(),
            }]),
            ..Default::default()
        };
        patch.apply_to(&mut car);

        assert_eq!(car.corrective_action.as_deref(), Some("Re-train operator"));
        assert_eq!(car.remarks.as_deref(), Some("old"));
        assert_eq!(car.five_why_analysis.len(), 1);
    }

    #[test]
    fn test_pending_summary_totals() {
        let lot = StageCarSummary { total_exceeding_threshold: 3, cars_filled: 1, cars_pending: 2 };
        let incoming = StageCarSummary { total_exceeding_threshold: 1, cars_filled: 1, cars_pending: 0 };
        let fvi = StageCarSummary::default();
        let summary = PendingCarSummary::from_stages(lot, incoming, fvi);
        assert_eq!(summary.total_exceeding_threshold, 4);
        assert_eq!(summary.total_cars_filled, 2);
        assert_eq!(summary.total_cars_pending, 2);
    }
}
