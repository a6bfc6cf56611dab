// ==========================================
// 模压质量拒收分析 - 纠正措施报告 (CAR) 规则
// ==========================================
// 职责: CAR 起草（默认问题描述）/ 日期校验 / 状态流转校验 / 5-Why 整理
// 状态流转: Draft → Submitted → Cancelled，Draft → Cancelled
// 红线: 不读写库，仓储与事务由 api 层负责
// ==========================================

use crate::domain::car::{CarDraft, CorrectiveActionReport, FiveWhyEntry, MAX_WHY_ANSWERS};
use crate::domain::report::InspectionEntryDetail;
use crate::domain::types::{CarStatus, DocStatus};
use chrono::{NaiveDate, NaiveDateTime};
use thiserror::Error;
use uuid::Uuid;

/// CAR 业务规则错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CarRuleError {
    #[error("CAR 日期不能晚于今天: car_date={car_date}, today={today}")]
    FutureCarDate { car_date: NaiveDate, today: NaiveDate },

    #[error("目标日期不能早于 CAR 日期: target_date={target_date}, car_date={car_date}")]
    TargetBeforeCarDate {
        target_date: NaiveDate,
        car_date: NaiveDate,
    },

    #[error("5-Why 分析最多 {max} 条，实际 {actual} 条")]
    TooManyWhyAnswers { max: usize, actual: usize },

    #[error("CAR {name} 已提交，不能修改")]
    AlreadySubmitted { name: String },

    #[error("CAR {name} 已取消")]
    AlreadyCancelled { name: String },

    #[error("提交前必须填写纠正措施: {name}")]
    MissingCorrectiveAction { name: String },
}

/// 生成 CAR 编号: CAR-xxxxxxxx
pub fn generate_car_name() -> String {
    let id = Uuid::new_v4().simple().to_string().to_uppercase();
    format!("CAR-{}", &id[..8])
}

// ==========================================
// CarDrafter - CAR 起草器
// ==========================================
#[derive(Debug, Clone, Copy, Default)]
pub struct CarDrafter;

impl CarDrafter {
    pub fn new() -> Self {
        Self
    }

    /// 由检验单生成默认问题描述
    ///
    /// 只列出拒收数 > 0 的缺陷行；没有缺陷行时提示查看检验单
    pub fn problem_description(&self, entry: &InspectionEntryDetail) -> String {
        let defects: Vec<String> = entry
            .items
            .iter()
            .filter(|item| item.rejected_qty > 0.0)
            .map(|item| format!("{}: {}", item.defect_type, item.rejected_qty))
            .collect();
        let defects = if defects.is_empty() {
            "See inspection entry for details".to_string()
        } else {
            defects.join("\n")
        };

        let or_unknown = |v: &Option<String>| v.clone().unwrap_or_else(|| "Unknown".to_string());

        format!(
            "High rejection ({}%) found in {} for lot {}.\n\n\
             Inspected Qty: {}\n\
             Rejected Qty: {}\n\
             Product: {}\n\
             Inspector: {}\n\
             Machine: {}\n\
             Operator: {}\n\n\
             Defects Found:\n{}",
            entry.rejected_pct,
            entry.inspection_type,
            entry.lot_no.as_deref().unwrap_or(""),
            entry.total_inspected_qty,
            entry.total_rejected_qty,
            or_unknown(&entry.product_ref_no),
            or_unknown(&entry.inspector_name),
            or_unknown(&entry.machine_no),
            or_unknown(&entry.operator_name),
            defects
        )
    }

    /// 由检验单与草稿输入构建新的 CAR（状态 Open / 草稿）
    ///
    /// # 参数
    /// - entry: 关联检验单
    /// - draft: 用户填写的内容（问题描述为空时自动生成）
    /// - now: 当前时间（car_date 取其日期）
    pub fn build(
        &self,
        entry: &InspectionEntryDetail,
        draft: CarDraft,
        now: NaiveDateTime,
    ) -> Result<CorrectiveActionReport, CarRuleError> {
        let car_date = now.date();
        validate_dates(car_date, draft.target_date, car_date)?;
        let five_why_analysis = why_entries(&draft.why_analysis)?;

        let problem_description = draft
            .problem_description
            .filter(|d| !d.trim().is_empty())
            .unwrap_or_else(|| self.problem_description(entry));

        Ok(CorrectiveActionReport {
            name: generate_car_name(),
            car_date,
            inspection_entry: entry.name.clone(),
            lot_no: entry.lot_no.clone(),
            product_ref_no: entry.product_ref_no.clone(),
            rejection_percentage: entry.rejected_pct,
            problem_description: Some(problem_description),
            cause_for_non_detection: draft.cause_for_non_detection,
            cause_for_occurrence: draft.cause_for_occurrence,
            corrective_action: draft.corrective_action,
            preventive_measures: draft.preventive_measures,
            remarks: draft.remarks,
            assigned_to: draft.assigned_to.filter(|a| !a.trim().is_empty()),
            target_date: draft.target_date,
            status: CarStatus::Open,
            docstatus: DocStatus::Draft,
            five_why_analysis,
            created_at: now,
            updated_at: now,
        })
    }
}

/// 日期校验
///
/// - car_date 不能晚于今天
/// - target_date 不能早于 car_date
pub fn validate_dates(
    car_date: NaiveDate,
    target_date: Option<NaiveDate>,
    today: NaiveDate,
) -> Result<(), CarRuleError> {
    if car_date > today {
        return Err(CarRuleError::FutureCarDate { car_date, today });
    }
    if let Some(target_date) = target_date {
        if target_date < car_date {
            return Err(CarRuleError::TargetBeforeCarDate {
                target_date,
                car_date,
            });
        }
    }
    Ok(())
}

/// 5-Why 回答 → 有序分析条目（空回答跳过）
pub fn why_entries(answers: &[String]) -> Result<Vec<FiveWhyEntry>, CarRuleError> {
    if answers.len() > MAX_WHY_ANSWERS {
        return Err(CarRuleError::TooManyWhyAnswers {
            max: MAX_WHY_ANSWERS,
            actual: answers.len(),
        });
    }
    Ok(answers
        .iter()
        .enumerate()
        .filter(|(_, a)| !a.trim().is_empty())
        .map(|(i, a)| FiveWhyEntry {
            why_question: format!("Why {}", i + 1),
            answer: a.trim().to_string(),
        })
        .collect())
}

/// 仅草稿可修改
pub fn ensure_editable(car: &CorrectiveActionReport) -> Result<(), CarRuleError> {
    match car.docstatus {
        DocStatus::Draft => Ok(()),
        DocStatus::Submitted => Err(CarRuleError::AlreadySubmitted {
            name: car.name.clone(),
        }),
        DocStatus::Cancelled => Err(CarRuleError::AlreadyCancelled {
            name: car.name.clone(),
        }),
    }
}

/// 提交校验: 草稿 + 已填写纠正措施
pub fn ensure_submittable(car: &CorrectiveActionReport) -> Result<(), CarRuleError> {
    ensure_editable(car)?;
    match car.corrective_action.as_deref().map(str::trim) {
        Some(action) if !action.is_empty() => Ok(()),
        _ => Err(CarRuleError::MissingCorrectiveAction {
            name: car.name.clone(),
        }),
    }
}

pub fn ensure_cancellable(car: &CorrectiveActionReport) -> Result<(), CarRuleError> {
    if car.docstatus == DocStatus::Cancelled {
        return Err(CarRuleError::AlreadyCancelled {
            name: car.name.clone(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::report::EntryDefectLine;
    use crate::domain::types::InspectionType;

    fn entry() -> InspectionEntryDetail {
        InspectionEntryDetail {
            name: "IE-0001".to_string(),
            inspection_type: InspectionType::Lot,
            lot_no: Some("25K26X01".to_string()),
            product_ref_no: Some("T5117".to_string()),
            inspector_name: Some("Ravi".to_string()),
            machine_no: None,
            operator_name: Some("Kumar".to_string()),
            total_inspected_qty: 200.0,
            total_rejected_qty: 15.0,
            rejected_pct: 7.5,
            items: vec![
                EntryDefectLine { defect_type: "Blister".to_string(), rejected_qty: 10.0 },
                EntryDefectLine { defect_type: "Bend".to_string(), rejected_qty: 5.0 },
                EntryDefectLine { defect_type: "Flash".to_string(), rejected_qty: 0.0 },
            ],
            is_spp: false,
        }
    }

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 11, 26)
            .unwrap()
            .and_hms_opt(10, 30, 0)
            .unwrap()
    }

    #[test]
    fn test_default_problem_description() {
        let text = CarDrafter::new().problem_description(&entry());
        assert!(text.starts_with("High rejection (7.5%) found in Lot Inspection for lot 25K26X01."));
        assert!(text.contains("Machine: Unknown"));
        assert!(text.contains("Blister: 10\nBend: 5"));
        assert!(!text.contains("Flash"));
    }

    #[test]
    fn test_build_uses_draft_description_when_given() {
        let draft = CarDraft {
            problem_description: Some("Mould vent blocked".to_string()),
            why_analysis: vec!["Vent dirty".to_string(), "".to_string(), "No PM".to_string()],
            ..Default::default()
        };
        let car = CarDrafter::new().build(&entry(), draft, now()).unwrap();

        assert!(car.name.starts_with("CAR-"));
        assert_eq!(car.name.len(), 12);
        assert_eq!(car.problem_description.as_deref(), Some("Mould vent blocked"));
        assert_eq!(car.status, CarStatus::Open);
        assert_eq!(car.docstatus, DocStatus::Draft);
        assert_eq!(car.rejection_percentage, 7.5);
        assert_eq!(car.five_why_analysis.len(), 2);
        assert_eq!(car.five_why_analysis[1].why_question, "Why 3");
    }

    #[test]
    fn test_build_rejects_target_before_car_date() {
        let draft = CarDraft {
            target_date: NaiveDate::from_ymd_opt(2025, 11, 25),
            ..Default::default()
        };
        let err = CarDrafter::new().build(&entry(), draft, now()).unwrap_err();
        assert!(matches!(err, CarRuleError::TargetBeforeCarDate { .. }));
    }

    #[test]
    fn test_validate_dates_future_car_date() {
        let today = NaiveDate::from_ymd_opt(2025, 11, 26).unwrap();
        let tomorrow = NaiveDate::from_ymd_opt(2025, 11, 27).unwrap();
        assert!(validate_dates(today, Some(tomorrow), today).is_ok());
        assert!(matches!(
            validate_dates(tomorrow, None, today),
            Err(CarRuleError::FutureCarDate { .. })
        ));
    }

    #[test]
    fn test_why_answers_limit() {
        let six: Vec<String> = (1..=6).map(|i| format!("answer {}", i)).collect();
        assert!(matches!(
            why_entries(&six),
            Err(CarRuleError::TooManyWhyAnswers { actual: 6, .. })
        ));
        assert_eq!(why_entries(&six[..5]).unwrap().len(), 5);
    }

    #[test]
    fn test_state_guards() {
        let mut car = CarDrafter::new().build(&entry(), CarDraft::default(), now()).unwrap();
        assert!(ensure_editable(&car).is_ok());
        assert!(matches!(
            ensure_submittable(&car),
            Err(CarRuleError::MissingCorrectiveAction { .. })
        ));

        car.corrective_action = Some("Clean vents every shift".to_string());
        assert!(ensure_submittable(&car).is_ok());

        car.docstatus = DocStatus::Submitted;
        assert!(ensure_editable(&car).is_err());
        assert!(ensure_cancellable(&car).is_ok());

        car.docstatus = DocStatus::Cancelled;
        assert!(ensure_cancellable(&car).is_err());
    }
}
