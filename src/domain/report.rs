// ==========================================
// 模压质量拒收分析 - 报表领域模型
// ==========================================
// 驾驶舱指标 / 阶段检验行 / 拒收明细下钻 / 日报
// ==========================================

use crate::domain::types::{CarStatus, InspectionType, ReportStatus};
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ==========================================
// StageInspectionRow - 某阶段的一张检验单（关联模压生产记录）
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageInspectionRow {
    pub inspection_entry: String,
    pub inspection_type: InspectionType,
    pub lot_no: Option<String>,
    pub item_code: Option<String>,
    pub posting_date: Option<NaiveDate>,
    pub production_date: Option<NaiveDate>,
    pub operator_name: Option<String>,
    pub press_number: Option<String>,
    pub mould_ref: Option<String>,
    pub shift_type: Option<String>,
    pub inspector_name: Option<String>,
    pub inspected_qty: f64,
    pub rejected_qty: f64,
    /// 单据上保存的拒收率（可能为 0 未填）
    pub stored_rejection_pct: f64,
    pub patrol_rej_pct: f64,
    pub line_rej_pct: f64,
    pub lot_rej_pct: f64,
    pub car_name: Option<String>,
    pub car_status: Option<CarStatus>,
}

impl StageInspectionRow {
    /// 生效拒收率: 单据值 > 0 时取单据值，否则按数量计算
    pub fn rejection_pct(&self) -> f64 {
        if self.stored_rejection_pct > 0.0 {
            self.stored_rejection_pct
        } else if self.inspected_qty > 0.0 {
            self.rejected_qty / self.inspected_qty * 100.0
        } else {
            0.0
        }
    }
}

// ==========================================
// StageReportFilter - 阶段报表附加筛选
// ==========================================
// 除 shift_type 精确匹配外，其余均为子串匹配
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageReportFilter {
    pub operator_name: Option<String>,
    pub press_number: Option<String>,
    pub item_code: Option<String>,
    pub mould_ref: Option<String>,
    pub lot_no: Option<String>,
    pub shift_type: Option<String>,
}

// ==========================================
// DashboardMetrics - 驾驶舱指标
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardMetrics {
    pub total_lots: usize,
    pub pending_lots: usize,
    pub avg_rejection: f64,
    pub lots_exceeding_threshold: usize,
    pub total_inspected_qty: f64,
    pub total_rejected_qty: f64,
    pub patrol_rej_avg: f64,
    pub line_rej_avg: f64,
    pub threshold_percentage: f64,
}

impl DashboardMetrics {
    pub fn empty(threshold_percentage: f64) -> Self {
        Self {
            total_lots: 0,
            pending_lots: 0,
            avg_rejection: 0.0,
            lots_exceeding_threshold: 0,
            total_inspected_qty: 0.0,
            total_rejected_qty: 0.0,
            patrol_rej_avg: 0.0,
            line_rej_avg: 0.0,
            threshold_percentage,
        }
    }
}

// ==========================================
// 图表数据
// ==========================================
/// 缺陷分布（按缺陷标签汇总）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DefectDistributionRow {
    pub defect_type: String,
    pub defect_code: String,
    pub count: usize,
    pub total_rejected_qty: f64,
    pub percentage: f64,
}

/// 各检验阶段平均拒收率
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageRejectionPoint {
    pub stage: String,
    pub inspection_type: InspectionType,
    pub rejection_rate: f64,
}

// ==========================================
// 月度趋势
// ==========================================
/// 某月某阶段的平均拒收率（仓储层读取结果）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthlyStageAverage {
    pub month: String, // YYYY-MM
    pub inspection_type: InspectionType,
    pub average_pct: f64,
}

/// 月度趋势点（缺少某阶段记录时该阶段为 0）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectionTrendPoint {
    pub month: String,
    pub month_label: String, // 如 "Nov 2025"
    pub patrol: f64,
    pub line: f64,
    pub lot: f64,
    pub incoming: f64,
}

// ==========================================
// 操作工 / 机台绩效
// ==========================================
/// 一张检验单归属的操作工或机台
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSample {
    pub key: String,
    pub inspection_entry: String,
    pub rejection_pct: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceRow {
    pub name: String,
    pub inspection_count: usize,
    pub avg_rejection_pct: f64,
    /// 拒收率超过严重线的检验单数
    pub critical_count: usize,
}

/// 绩效图表口径
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PerformanceChartSettings {
    pub days: i64,
    pub operator_limit: usize,
    pub machine_limit: usize,
    /// 检验单数须严格大于该值才上榜
    pub min_inspections: usize,
    pub critical_pct: f64,
}

impl Default for PerformanceChartSettings {
    fn default() -> Self {
        Self {
            days: 30,
            operator_limit: 10,
            machine_limit: 15,
            min_inspections: 5,
            critical_pct: 5.0,
        }
    }
}

// ==========================================
// 成本分析
// ==========================================
/// 模压产出（按模压日期 + 成品汇总）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MouldingOutputRow {
    pub moulding_date: NaiveDate,
    pub item_code: Option<String>,
    pub production_qty_nos: f64,
    pub total_lots: usize,
    pub total_weight_kg: f64,
}

/// 成本分析取数行（成本未回填）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostInspectionRow {
    pub inspection_entry: String,
    pub posting_date: Option<NaiveDate>,
    pub item_code: Option<String>,
    pub lot_no: Option<String>,
    pub supplier: Option<String>,
    pub inspected_qty: f64,
    pub rejected_qty: f64,
    pub rejection_pct: f64,
    pub defects: Vec<EntryDefectLine>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostStageRow {
    pub inspection_entry: String,
    pub posting_date: Option<NaiveDate>,
    pub item_code: Option<String>,
    pub lot_no: Option<String>,
    pub supplier: Option<String>,
    pub inspected_qty: f64,
    pub rejected_qty: f64,
    pub rejection_pct: f64,
    pub unit_cost: f64,
    pub rejection_cost: f64,
    /// 该阶段关注的缺陷代码 → 拒收数
    pub tracked_defects: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostStage {
    pub stage_name: String,
    pub total_inspected: f64,
    pub total_rejected: f64,
    /// 加权: Σ拒收 / Σ检验 × 100
    pub rejection_pct: f64,
    pub total_rejection_cost: f64,
    pub rows: Vec<CostStageRow>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostAnalysis {
    pub from_date: NaiveDate,
    pub to_date: NaiveDate,
    pub moulding: Vec<MouldingOutputRow>,
    pub total_moulded_qty: f64,
    pub lot_rejection: CostStage,
    pub incoming_inspection: CostStage,
    pub final_inspection: CostStage,
    pub total_rejection_cost: f64,
}

// ==========================================
// 拒收明细下钻
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryDefectLine {
    pub defect_type: String,
    pub rejected_qty: f64,
}

/// 检验单及其缺陷明细（仓储层读取结果）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InspectionEntryDetail {
    pub name: String,
    pub inspection_type: InspectionType,
    pub lot_no: Option<String>,
    pub product_ref_no: Option<String>,
    pub inspector_name: Option<String>,
    pub machine_no: Option<String>,
    pub operator_name: Option<String>,
    pub total_inspected_qty: f64,
    pub total_rejected_qty: f64,
    pub rejected_pct: f64,
    pub items: Vec<EntryDefectLine>,
    /// 是否来自 SPP 检验单表
    pub is_spp: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageDefect {
    pub defect_type: String,
    pub defect_code: String,
    pub rejected_qty: f64,
    pub percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectionStage {
    pub stage_name: String,
    pub total_inspected: f64,
    pub total_rejected: f64,
    pub rejection_percentage: f64,
    pub defects: Vec<StageDefect>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectionDetails {
    pub inspection_entry: String,
    pub lot_no: String,
    pub stages: Vec<RejectionStage>,
}

// ==========================================
// 日报
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportSection {
    Lot,
    Incoming,
    Final,
}

impl ReportSection {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportSection::Lot => "lot",
            ReportSection::Incoming => "incoming",
            ReportSection::Final => "final",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "lot" => Some(ReportSection::Lot),
            "incoming" => Some(ReportSection::Incoming),
            "final" => Some(ReportSection::Final),
            _ => None,
        }
    }

    pub fn inspection_type(&self) -> InspectionType {
        match self {
            ReportSection::Lot => InspectionType::Lot,
            ReportSection::Incoming => InspectionType::Incoming,
            ReportSection::Final => InspectionType::FinalVisual,
        }
    }
}

/// 日报明细行
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyReportItem {
    pub section: ReportSection,
    pub inspection_entry: String,
    pub lot_no: Option<String>,
    pub item_code: Option<String>,
    pub inspected_qty: f64,
    pub rejected_qty: f64,
    pub rejection_pct: f64,
    pub patrol_rej_pct: f64,
    pub line_rej_pct: f64,
    pub lot_rej_pct: f64,
    pub exceeds_threshold: bool,
    pub unit_cost: f64,
    pub rejection_cost: f64,
    pub car_reference: Option<String>,
    pub car_status: Option<CarStatus>,
}

/// 日报分段汇总
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SectionSummary {
    pub total_inspections: usize,
    pub avg_rejection: f64,
    pub exceeding_threshold: usize,
    pub patrol_avg: f64,
    pub line_avg: f64,
    pub lot_avg: f64,
    pub total_rejection_cost: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyRejectionReport {
    pub name: String,
    pub report_date: NaiveDate,
    pub threshold_percentage: f64,
    pub status: ReportStatus,
    pub lot: SectionSummary,
    pub incoming: SectionSummary,
    pub final_visual: SectionSummary,
    pub items: Vec<DailyReportItem>,
    pub created_at: NaiveDateTime,
}

/// 日报列表项
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyReportListItem {
    pub name: String,
    pub production_date: NaiveDate,
    pub status: ReportStatus,
    pub total_lots: usize,
    pub pending_cars: usize,
    pub created_at: NaiveDateTime,
}

/// 生成日报的结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "name", rename_all = "snake_case")]
pub enum GenerateOutcome {
    Created(String),
    Exists(String),
}
