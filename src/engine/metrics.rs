// ==========================================
// 模压质量拒收分析 - 报表指标计算
// ==========================================
// 职责: 驾驶舱指标 / 日报分段汇总 / CAR 待办统计 / 拒收明细下钻 / 缺陷分布
//       月度趋势 / 操作工与机台绩效 / 成本分析
// 输入: 仓储层读取的阶段检验行、检验单明细、绩效样本
// 红线: 只做算术，不拼 SQL
// ==========================================
// 阈值口径:
// - 驾驶舱与日报的"超阈值"为严格大于
// - CAR 待办统计为大于等于
// ==========================================

use crate::domain::car::StageCarSummary;
use crate::domain::report::{
    CostAnalysis, CostInspectionRow, CostStage, CostStageRow, DailyReportItem, DashboardMetrics,
    DefectDistributionRow, InspectionEntryDetail, MonthlyStageAverage, MouldingOutputRow,
    PerformanceRow, PerformanceSample, RejectionDetails, RejectionStage, RejectionTrendPoint,
    ReportSection, SectionSummary, StageDefect, StageInspectionRow,
};
use crate::domain::types::InspectionType;
use crate::engine::defect_code::DefectCodeNormalizer;
use crate::engine::rollup::round2;
use chrono::NaiveDate;
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, instrument};

/// 来料检验单独列出的缺陷: 刀痕 / RBS / 压痕
pub const INCOMING_TRACKED_DEFECTS: [&str; 3] = ["CM", "RBS", "IM"];

/// 终检目视单独列出的缺陷: 修边过度 / 缺料
pub const FINAL_TRACKED_DEFECTS: [&str; 2] = ["OT", "UF"];

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, n) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if n == 0 {
        0.0
    } else {
        sum / n as f64
    }
}

// ==========================================
// MetricsEngine
// ==========================================
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsEngine {
    normalizer: DefectCodeNormalizer,
}

impl MetricsEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// 驾驶舱指标
    ///
    /// # 参数
    /// - rows: 当日（按模压日期）某检验类型的检验单
    /// - threshold_pct: 主阈值
    /// - pending_lots: 待检批次数（仓储层统计）
    /// - stage_averages: (巡检均值, 线检均值)，仅批检有意义
    ///
    /// # 返回
    /// - 平均拒收率为加权平均: Σ拒收 / Σ检验 × 100
    #[instrument(skip(self, rows), fields(rows = rows.len()))]
    pub fn dashboard(
        &self,
        rows: &[StageInspectionRow],
        threshold_pct: f64,
        pending_lots: usize,
        stage_averages: (f64, f64),
    ) -> DashboardMetrics {
        if rows.is_empty() {
            return DashboardMetrics {
                pending_lots,
                ..DashboardMetrics::empty(threshold_pct)
            };
        }

        let total_inspected: f64 = rows.iter().map(|r| r.inspected_qty).sum();
        let total_rejected: f64 = rows.iter().map(|r| r.rejected_qty).sum();
        let avg_rejection = if total_inspected > 0.0 {
            total_rejected / total_inspected * 100.0
        } else {
            0.0
        };

        DashboardMetrics {
            total_lots: rows.len(),
            pending_lots,
            avg_rejection: round2(avg_rejection),
            lots_exceeding_threshold: rows
                .iter()
                .filter(|r| r.rejection_pct() > threshold_pct)
                .count(),
            total_inspected_qty: total_inspected,
            total_rejected_qty: total_rejected,
            patrol_rej_avg: round2(stage_averages.0),
            line_rej_avg: round2(stage_averages.1),
            threshold_percentage: threshold_pct,
        }
    }

    /// 阶段检验行 → 日报明细行
    ///
    /// # 参数
    /// - unit_costs: 成品编码 → 单价（缺失按 0）
    pub fn report_items(
        &self,
        section: ReportSection,
        rows: &[StageInspectionRow],
        threshold_pct: f64,
        unit_costs: &HashMap<String, f64>,
    ) -> Vec<DailyReportItem> {
        rows.iter()
            .map(|row| {
                let rejection_pct = round2(row.rejection_pct());
                let unit_cost = row
                    .item_code
                    .as_deref()
                    .and_then(|c| unit_costs.get(c))
                    .copied()
                    .unwrap_or(0.0);
                DailyReportItem {
                    section,
                    inspection_entry: row.inspection_entry.clone(),
                    lot_no: row.lot_no.clone(),
                    item_code: row.item_code.clone(),
                    inspected_qty: row.inspected_qty,
                    rejected_qty: row.rejected_qty,
                    rejection_pct,
                    patrol_rej_pct: round2(row.patrol_rej_pct),
                    line_rej_pct: round2(row.line_rej_pct),
                    lot_rej_pct: round2(row.lot_rej_pct),
                    exceeds_threshold: rejection_pct > threshold_pct,
                    unit_cost,
                    rejection_cost: row.rejected_qty * unit_cost,
                    car_reference: row.car_name.clone(),
                    car_status: row.car_status,
                }
            })
            .collect()
    }

    /// 日报分段汇总（各项为简单平均）
    pub fn section_summary(&self, items: &[DailyReportItem]) -> SectionSummary {
        SectionSummary {
            total_inspections: items.len(),
            avg_rejection: round2(mean(items.iter().map(|i| i.rejection_pct))),
            exceeding_threshold: items.iter().filter(|i| i.exceeds_threshold).count(),
            patrol_avg: round2(mean(items.iter().map(|i| i.patrol_rej_pct))),
            line_avg: round2(mean(items.iter().map(|i| i.line_rej_pct))),
            lot_avg: round2(mean(items.iter().map(|i| i.lot_rej_pct))),
            total_rejection_cost: items.iter().map(|i| i.rejection_cost).sum(),
        }
    }

    /// CAR 待办统计: 拒收率 >= 阈值的检验单中，已开/未开 CAR 数
    pub fn car_summary(&self, rows: &[StageInspectionRow], threshold_pct: f64) -> StageCarSummary {
        rows.iter()
            .filter(|r| r.rejection_pct() >= threshold_pct)
            .fold(StageCarSummary::default(), |mut acc, r| {
                acc.total_exceeding_threshold += 1;
                if r.car_name.is_some() {
                    acc.cars_filled += 1;
                } else {
                    acc.cars_pending += 1;
                }
                acc
            })
    }

    /// 检验单拒收明细下钻
    ///
    /// - 阶段名称由检验类型决定；未识别的检验类型不产生阶段
    /// - 检验总数缺失时由 拒收数 / 拒收率 反推
    /// - 阶段拒收数 = 缺陷行拒收数之和（只计 > 0 的行）
    #[instrument(skip(self, entry), fields(entry = %entry.name))]
    pub fn rejection_details(&self, entry: &InspectionEntryDetail) -> RejectionDetails {
        let lot_no = entry
            .lot_no
            .clone()
            .filter(|l| !l.trim().is_empty())
            .unwrap_or_else(|| "N/A".to_string());

        let mut details = RejectionDetails {
            inspection_entry: entry.name.clone(),
            lot_no,
            stages: Vec::new(),
        };

        if matches!(entry.inspection_type, InspectionType::Other(_)) {
            debug!(inspection_type = %entry.inspection_type, "未识别的检验类型，无阶段明细");
            return details;
        }

        let lines: Vec<_> = entry.items.iter().filter(|i| i.rejected_qty > 0.0).collect();
        if lines.is_empty() {
            return details;
        }

        let total_inspected = effective_inspected(entry);
        let pct = |qty: f64| {
            if total_inspected > 0.0 {
                round2(qty / total_inspected * 100.0)
            } else {
                0.0
            }
        };
        let total_rejected: f64 = lines.iter().map(|l| l.rejected_qty).sum();

        details.stages.push(RejectionStage {
            stage_name: entry.inspection_type.stage_name().to_string(),
            total_inspected,
            total_rejected,
            rejection_percentage: pct(total_rejected),
            defects: lines
                .iter()
                .map(|l| StageDefect {
                    defect_type: l.defect_type.clone(),
                    defect_code: self.normalizer.normalize(Some(&l.defect_type)).to_string(),
                    rejected_qty: l.rejected_qty,
                    percentage: pct(l.rejected_qty),
                })
                .collect(),
        });
        details
    }

    /// 缺陷分布
    ///
    /// # 参数
    /// - totals: (缺陷标签, 出现次数, 拒收数)
    /// - limit: 取拒收数最高的前 N 项，占比按这 N 项合计计算
    pub fn defect_distribution(
        &self,
        mut totals: Vec<(String, usize, f64)>,
        limit: usize,
    ) -> Vec<DefectDistributionRow> {
        totals.retain(|(label, _, _)| !label.trim().is_empty());
        totals.sort_by(|a, b| b.2.total_cmp(&a.2).then_with(|| a.0.cmp(&b.0)));
        totals.truncate(limit);

        let grand_total: f64 = totals.iter().map(|t| t.2).sum();
        totals
            .into_iter()
            .map(|(defect_type, count, qty)| DefectDistributionRow {
                defect_code: self.normalizer.normalize(Some(&defect_type)).to_string(),
                defect_type,
                count,
                total_rejected_qty: qty,
                percentage: if grand_total > 0.0 {
                    round2(qty / grand_total * 100.0)
                } else {
                    0.0
                },
            })
            .collect()
    }

    // ==========================================
    // 月度趋势
    // ==========================================

    /// 月度阶段均值 → 趋势点（月份倒序，每月一个点）
    pub fn rejection_trend(&self, rows: &[MonthlyStageAverage]) -> Vec<RejectionTrendPoint> {
        let mut months: BTreeMap<&str, RejectionTrendPoint> = BTreeMap::new();
        for row in rows {
            let point = months
                .entry(row.month.as_str())
                .or_insert_with(|| RejectionTrendPoint {
                    month: row.month.clone(),
                    month_label: month_label(&row.month),
                    patrol: 0.0,
                    line: 0.0,
                    lot: 0.0,
                    incoming: 0.0,
                });
            let value = round2(row.average_pct);
            match row.inspection_type {
                InspectionType::Patrol => point.patrol = value,
                InspectionType::Line => point.line = value,
                InspectionType::Lot => point.lot = value,
                InspectionType::Incoming => point.incoming = value,
                _ => debug!(inspection_type = %row.inspection_type, "趋势图不含该阶段"),
            }
        }
        months.into_values().rev().collect()
    }

    // ==========================================
    // 绩效排行
    // ==========================================

    /// 操作工 / 机台绩效排行
    ///
    /// # 参数
    /// - samples: 每张检验单一条（同键同单重复的只计一次）
    /// - min_inspections: 检验单数须严格大于该值
    /// - critical_pct: 拒收率严格大于该值计为严重
    /// - limit: 按平均拒收率倒序取前 N 个
    #[instrument(skip(self, samples), fields(samples = samples.len()))]
    pub fn performance_ranking(
        &self,
        samples: &[PerformanceSample],
        min_inspections: usize,
        critical_pct: f64,
        limit: usize,
    ) -> Vec<PerformanceRow> {
        let mut seen: HashSet<(&str, &str)> = HashSet::new();
        let mut groups: BTreeMap<&str, Vec<f64>> = BTreeMap::new();
        for sample in samples {
            if seen.insert((sample.key.as_str(), sample.inspection_entry.as_str())) {
                groups
                    .entry(sample.key.as_str())
                    .or_default()
                    .push(sample.rejection_pct);
            }
        }

        let mut ranking: Vec<PerformanceRow> = groups
            .into_iter()
            .filter(|(_, pcts)| pcts.len() > min_inspections)
            .map(|(name, pcts)| PerformanceRow {
                name: name.to_string(),
                inspection_count: pcts.len(),
                avg_rejection_pct: round2(mean(pcts.iter().copied())),
                critical_count: pcts.iter().filter(|p| **p > critical_pct).count(),
            })
            .collect();
        ranking.sort_by(|a, b| {
            b.avg_rejection_pct
                .total_cmp(&a.avg_rejection_pct)
                .then_with(|| a.name.cmp(&b.name))
        });
        ranking.truncate(limit);
        ranking
    }

    // ==========================================
    // 成本分析
    // ==========================================

    /// 检验单 → 成本分析阶段
    ///
    /// # 参数
    /// - tracked: 单独列出的缺陷代码（未出现的记 0）
    /// - unit_costs: 成品编码 → 单价（缺失按 0）
    pub fn cost_stage(
        &self,
        inspection_type: &InspectionType,
        rows: Vec<CostInspectionRow>,
        tracked: &[&str],
        unit_costs: &HashMap<String, f64>,
    ) -> CostStage {
        let rows: Vec<CostStageRow> = rows
            .into_iter()
            .map(|row| {
                let mut tracked_defects: BTreeMap<String, f64> =
                    tracked.iter().map(|code| (code.to_string(), 0.0)).collect();
                for line in &row.defects {
                    let code = self.normalizer.normalize(Some(&line.defect_type));
                    if let Some(qty) = tracked_defects.get_mut(code) {
                        *qty += line.rejected_qty;
                    }
                }
                let unit_cost = row
                    .item_code
                    .as_deref()
                    .and_then(|c| unit_costs.get(c))
                    .copied()
                    .unwrap_or(0.0);
                CostStageRow {
                    rejection_cost: row.rejected_qty * unit_cost,
                    unit_cost,
                    rejection_pct: round2(row.rejection_pct),
                    inspection_entry: row.inspection_entry,
                    posting_date: row.posting_date,
                    item_code: row.item_code,
                    lot_no: row.lot_no,
                    supplier: row.supplier,
                    inspected_qty: row.inspected_qty,
                    rejected_qty: row.rejected_qty,
                    tracked_defects,
                }
            })
            .collect();

        let total_inspected: f64 = rows.iter().map(|r| r.inspected_qty).sum();
        let total_rejected: f64 = rows.iter().map(|r| r.rejected_qty).sum();
        CostStage {
            stage_name: inspection_type.stage_name().to_string(),
            total_inspected,
            total_rejected,
            rejection_pct: if total_inspected > 0.0 {
                round2(total_rejected / total_inspected * 100.0)
            } else {
                0.0
            },
            total_rejection_cost: rows.iter().map(|r| r.rejection_cost).sum(),
            rows,
        }
    }

    /// 汇总各阶段为成本分析
    pub fn cost_analysis(
        &self,
        (from_date, to_date): (NaiveDate, NaiveDate),
        moulding: Vec<MouldingOutputRow>,
        lot_rejection: CostStage,
        incoming_inspection: CostStage,
        final_inspection: CostStage,
    ) -> CostAnalysis {
        let total_rejection_cost = lot_rejection.total_rejection_cost
            + incoming_inspection.total_rejection_cost
            + final_inspection.total_rejection_cost;
        CostAnalysis {
            from_date,
            to_date,
            total_moulded_qty: moulding.iter().map(|m| m.production_qty_nos).sum(),
            moulding,
            lot_rejection,
            incoming_inspection,
            final_inspection,
            total_rejection_cost,
        }
    }
}

/// "2025-11" → "Nov 2025"；无法解析时原样返回
fn month_label(month: &str) -> String {
    NaiveDate::parse_from_str(&format!("{}-01", month), "%Y-%m-%d")
        .map(|d| d.format("%b %Y").to_string())
        .unwrap_or_else(|_| month.to_string())
}

/// 生效检验总数: 单据值为 0 且有拒收数与拒收率时，按 拒收数 / (拒收率 / 100) 向下取整反推
pub fn effective_inspected(entry: &InspectionEntryDetail) -> f64 {
    if entry.total_inspected_qty > 0.0 {
        return entry.total_inspected_qty;
    }
    if entry.total_rejected_qty > 0.0 && entry.rejected_pct > 0.0 {
        return (entry.total_rejected_qty / (entry.rejected_pct / 100.0)).floor();
    }
    0.0
}
