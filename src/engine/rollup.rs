// ==========================================
// 模压质量拒收分析 - 分层拒收汇总引擎
// ==========================================
// 输入: 扁平检验记录列表
// 输出: 产品 → 主批号 → 子批号 三级树（扁平化为树表行）
// ==========================================
// 不变量:
// - 主批号 = 其子批号之和；产品 = 其主批号之和
// - 各级缺陷代码映射 = 子节点映射的并集求和
// - 拒收率总是由汇总后的数量重新计算，绝不对子节点拒收率求平均
// ==========================================
// 无状态: 每次调用构建新树，调用结束即丢弃
// ==========================================

use crate::domain::inspection::InspectionRecord;
use crate::domain::rollup::{RollupReport, RollupRow, RollupSummary};
use crate::domain::types::{InspectionType, NodeType};
use crate::engine::defect_code::DefectCodeNormalizer;
use chrono::NaiveDate;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, instrument};

/// 拒收率（%），保留两位小数；检验数为 0 时返回 0
pub fn rejection_rate(rejected: f64, inspected: f64) -> f64 {
    if inspected > 0.0 {
        round2(rejected / inspected * 100.0)
    } else {
        0.0
    }
}

/// 保留两位小数
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

// ==========================================
// NodeMetrics - 节点累计指标
// ==========================================
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeMetrics {
    pub inspected: f64,
    pub rejected: f64,
    pub cost: f64,
    pub defects: BTreeMap<String, f64>,
}

impl NodeMetrics {
    fn add(&mut self, inspected: f64, rejected: f64, cost: f64, defects: &BTreeMap<String, f64>) {
        self.inspected += inspected;
        self.rejected += rejected;
        self.cost += cost;
        for (code, qty) in defects {
            *self.defects.entry(code.clone()).or_insert(0.0) += qty;
        }
    }

    pub fn rate(&self) -> f64 {
        rejection_rate(self.rejected, self.inspected)
    }
}

// ==========================================
// 子批号排序键（自然序: 数字按数值，数字在前）
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq)]
struct SubLotKey(String);

impl SubLotKey {
    fn numeric(&self) -> Option<u64> {
        self.0.parse::<u64>().ok()
    }
}

impl Ord for SubLotKey {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.numeric(), other.numeric()) {
            (Some(a), Some(b)) => a.cmp(&b).then_with(|| self.0.cmp(&other.0)),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => self.0.cmp(&other.0),
        }
    }
}

impl PartialOrd for SubLotKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// ==========================================
// 树节点
// ==========================================
#[derive(Debug, Clone, Default)]
struct SubLotNode {
    metrics: NodeMetrics,
    // 溯源字段取首条记录原值
    lot_no: Option<String>,
    inspector: Option<String>,
    inspection_type: Option<InspectionType>,
    source_document_id: Option<String>,
    posting_date: Option<NaiveDate>,
    record_count: usize,
}

#[derive(Debug, Clone, Default)]
struct MainLotNode {
    metrics: NodeMetrics,
    sub_lots: BTreeMap<SubLotKey, SubLotNode>,
}

#[derive(Debug, Clone, Default)]
struct ProductNode {
    metrics: NodeMetrics,
    main_lots: BTreeMap<String, MainLotNode>,
}

// ==========================================
// RejectionTree - 汇总树（单次调用内有效）
// ==========================================
#[derive(Debug, Default)]
pub struct RejectionTree {
    normalizer: DefectCodeNormalizer,
    products: BTreeMap<String, ProductNode>,
    defect_codes: BTreeSet<String>,
}

impl RejectionTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// 折叠一条检验记录
    ///
    /// 1. 拆分批号 → (主批号, 子批号)
    /// 2. 查找或创建 产品/主批号/子批号 节点
    /// 3. 数量与成本累加到子批号，并以相同增量累加到主批号与产品
    /// 4. 缺陷明细归一化后同样逐级累加，并记录全局缺陷代码
    pub fn fold(&mut self, record: &InspectionRecord) {
        let product_key = record.product_key();
        let lot = record.lot();
        let defects = self.normalizer.parse_details(&record.defect_details);
        self.defect_codes.extend(defects.keys().cloned());

        let product = self.products.entry(product_key).or_default();
        product.metrics.add(
            record.inspected_qty,
            record.rejected_qty,
            record.rejection_cost,
            &defects,
        );

        let main_lot = product.main_lots.entry(lot.main_lot).or_default();
        main_lot.metrics.add(
            record.inspected_qty,
            record.rejected_qty,
            record.rejection_cost,
            &defects,
        );

        let sub_lot = main_lot
            .sub_lots
            .entry(SubLotKey(lot.sub_lot_number))
            .or_default();
        sub_lot.metrics.add(
            record.inspected_qty,
            record.rejected_qty,
            record.rejection_cost,
            &defects,
        );
        if sub_lot.record_count == 0 {
            sub_lot.lot_no = record.lot_no.clone();
            sub_lot.inspector = record.inspector_code.clone();
            sub_lot.inspection_type = record.inspection_type.clone();
            sub_lot.source_document_id = record.source_document_id.clone();
            sub_lot.posting_date = record.posting_date;
        }
        sub_lot.record_count += 1;
    }

    pub fn product_count(&self) -> usize {
        self.products.len()
    }

    /// 扁平化为树表行
    ///
    /// 深度优先输出: 产品行 → 其主批号行 → 各主批号下的子批号行
    /// 父行总在子行之前；缺陷列覆盖全部出现过的代码，缺失补 0
    pub fn into_report(self) -> RollupReport {
        let defect_columns: Vec<String> = self.defect_codes.into_iter().collect();
        let mut rows = Vec::new();
        let mut summary = RollupSummary::default();

        for (p_idx, (product_code, product)) in self.products.into_iter().enumerate() {
            let product_id = format!("P{}", p_idx + 1);

            summary.total_products += 1;
            summary.total_inspected += product.metrics.inspected;
            summary.total_rejected += product.metrics.rejected;
            summary.total_rejection_cost += product.metrics.cost;

            rows.push(RollupRow {
                id: product_id.clone(),
                parent_id: None,
                node_type: NodeType::Product,
                product_code: product_code.clone(),
                main_lot: None,
                sub_lot_number: None,
                lot_no: None,
                label: product_code.clone(),
                inspected: product.metrics.inspected,
                rejected: product.metrics.rejected,
                rejection_cost: product.metrics.cost,
                rate: product.metrics.rate(),
                inspector: None,
                inspection_type: None,
                source_document_id: None,
                posting_date: None,
                defects: fill_columns(&product.metrics.defects, &defect_columns),
            });

            for (l_idx, (main_lot, lot_node)) in product.main_lots.into_iter().enumerate() {
                let lot_id = format!("{}-L{}", product_id, l_idx + 1);

                rows.push(RollupRow {
                    id: lot_id.clone(),
                    parent_id: Some(product_id.clone()),
                    node_type: NodeType::MainLot,
                    product_code: product_code.clone(),
                    main_lot: Some(main_lot.clone()),
                    sub_lot_number: None,
                    lot_no: None,
                    label: main_lot.clone(),
                    inspected: lot_node.metrics.inspected,
                    rejected: lot_node.metrics.rejected,
                    rejection_cost: lot_node.metrics.cost,
                    rate: lot_node.metrics.rate(),
                    inspector: None,
                    inspection_type: None,
                    source_document_id: None,
                    posting_date: None,
                    defects: fill_columns(&lot_node.metrics.defects, &defect_columns),
                });

                for (s_idx, (sub_key, sub)) in lot_node.sub_lots.into_iter().enumerate() {
                    let sub_number = sub_key.0;
                    let label = sub
                        .lot_no
                        .clone()
                        .filter(|l| !l.trim().is_empty())
                        .unwrap_or_else(|| format!("{}-{}", main_lot, sub_number));

                    rows.push(RollupRow {
                        id: format!("{}-S{}", lot_id, s_idx + 1),
                        parent_id: Some(lot_id.clone()),
                        node_type: NodeType::SubLot,
                        product_code: product_code.clone(),
                        main_lot: Some(main_lot.clone()),
                        sub_lot_number: Some(sub_number),
                        lot_no: sub.lot_no,
                        label,
                        inspected: sub.metrics.inspected,
                        rejected: sub.metrics.rejected,
                        rejection_cost: sub.metrics.cost,
                        rate: sub.metrics.rate(),
                        inspector: sub.inspector,
                        inspection_type: sub.inspection_type,
                        source_document_id: sub.source_document_id,
                        posting_date: sub.posting_date,
                        defects: fill_columns(&sub.metrics.defects, &defect_columns),
                    });
                }
            }
        }

        summary.rejection_rate = rejection_rate(summary.total_rejected, summary.total_inspected);

        RollupReport {
            rows,
            defect_columns,
            summary,
        }
    }
}

fn fill_columns(defects: &BTreeMap<String, f64>, columns: &[String]) -> BTreeMap<String, f64> {
    columns
        .iter()
        .map(|code| (code.clone(), defects.get(code).copied().unwrap_or(0.0)))
        .collect()
}

// ==========================================
// RejectionRollupEngine - 汇总引擎入口
// ==========================================
#[derive(Debug, Clone, Copy, Default)]
pub struct RejectionRollupEngine;

impl RejectionRollupEngine {
    pub fn new() -> Self {
        Self
    }

    /// 构建分层汇总报表
    ///
    /// 数据形状问题（空分组键、错误缺陷条目）只降级处理，不返回错误
    /// 空输入返回空行与全零汇总
    #[instrument(skip(self, records), fields(count = records.len()))]
    pub fn aggregate(&self, records: &[InspectionRecord]) -> RollupReport {
        let mut tree = RejectionTree::new();
        for record in records {
            tree.fold(record);
        }

        let report = tree.into_report();
        debug!(
            rows = report.rows.len(),
            products = report.summary.total_products,
            defect_columns = report.defect_columns.len(),
            "拒收汇总完成"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::inspection::UNKNOWN_BUCKET;

    fn engine() -> RejectionRollupEngine {
        RejectionRollupEngine::new()
    }

    fn sum_children(report: &RollupReport, parent: &str) -> (f64, f64, f64) {
        report.children_of(parent).fold((0.0, 0.0, 0.0), |acc, r| {
            (acc.0 + r.inspected, acc.1 + r.rejected, acc.2 + r.rejection_cost)
        })
    }

    #[test]
    fn test_single_record_round_trip() {
        let records = vec![InspectionRecord::new("T100", "25A01U01-2", 100.0, 5.0)
            .with_defects(&[("Bend", 5.0)])];
        let report = engine().aggregate(&records);

        assert_eq!(report.rows.len(), 3);
        assert_eq!(report.defect_columns, vec!["BD".to_string()]);

        let sub = report.rows_of(NodeType::SubLot).next().unwrap();
        assert_eq!(sub.lot_no.as_deref(), Some("25A01U01-2"));
        assert_eq!(sub.main_lot.as_deref(), Some("25A01U01"));
        assert_eq!(sub.sub_lot_number.as_deref(), Some("2"));
        assert_eq!(sub.rate, 5.0);
        assert_eq!(sub.defect_qty("BD"), 5.0);

        for row in &report.rows {
            assert_eq!(row.inspected, 100.0);
            assert_eq!(row.rejected, 5.0);
            assert_eq!(row.rate, 5.0);
            assert_eq!(row.defect_qty("BD"), 5.0);
        }
    }

    #[test]
    fn test_lot_without_delimiter_defaults_sub_lot() {
        let report = engine().aggregate(&[InspectionRecord::new("T200", "LOT42", 50.0, 0.0)]);
        let sub = report.rows_of(NodeType::SubLot).next().unwrap();
        assert_eq!(sub.main_lot.as_deref(), Some("LOT42"));
        assert_eq!(sub.sub_lot_number.as_deref(), Some("1"));
        assert_eq!(sub.rate, 0.0);
    }

    #[test]
    fn test_shared_main_lot_sums_sub_lots() {
        let records = vec![
            InspectionRecord::new("T100", "25A01U01-1", 100.0, 4.0)
                .with_defects(&[("Blister", 4.0)])
                .with_cost(40.0),
            InspectionRecord::new("T100", "25A01U01-2", 300.0, 6.0)
                .with_defects(&[("Bend", 2.0), ("Blister", 4.0)])
                .with_cost(60.0),
        ];
        let report = engine().aggregate(&records);

        let main_lots: Vec<_> = report.rows_of(NodeType::MainLot).collect();
        assert_eq!(main_lots.len(), 1);
        let main = main_lots[0];
        assert_eq!(report.children_of(&main.id).count(), 2);

        assert_eq!(main.inspected, 400.0);
        assert_eq!(main.rejected, 10.0);
        assert_eq!(main.rejection_cost, 100.0);
        assert_eq!(main.rate, 2.5);
        assert_eq!(main.defect_qty("BL"), 8.0);
        assert_eq!(main.defect_qty("BD"), 2.0);

        let (inspected, rejected, cost) = sum_children(&report, &main.id);
        assert_eq!((inspected, rejected, cost), (400.0, 10.0, 100.0));
    }

    #[test]
    fn test_rate_is_recomputed_not_averaged() {
        let records = vec![
            InspectionRecord::new("T1", "A-1", 10.0, 5.0),   // 50%
            InspectionRecord::new("T1", "A-2", 990.0, 5.0),  // ~0.5%
        ];
        let report = engine().aggregate(&records);
        let product = report.rows_of(NodeType::Product).next().unwrap();
        assert_eq!(product.rate, 1.0);
    }

    #[test]
    fn test_product_totals_equal_main_lot_totals() {
        let records = vec![
            InspectionRecord::new("T1", "A-1", 100.0, 1.0),
            InspectionRecord::new("T1", "B-1", 200.0, 3.0),
            InspectionRecord::new("T1", "B/2", 50.0, 2.0),
            InspectionRecord::new("T2", "C", 80.0, 8.0),
        ];
        let report = engine().aggregate(&records);

        for product in report.rows_of(NodeType::Product) {
            let (inspected, rejected, _) = sum_children(&report, &product.id);
            assert_eq!(product.inspected, inspected);
            assert_eq!(product.rejected, rejected);
        }
        assert_eq!(report.summary.total_products, 2);
        assert_eq!(report.summary.total_inspected, 430.0);
        assert_eq!(report.summary.total_rejected, 14.0);
    }

    #[test]
    fn test_missing_keys_bucket_under_unknown() {
        let mut no_product = InspectionRecord::new("", "L1-1", 10.0, 1.0);
        no_product.product_code = None;
        let mut no_lot = InspectionRecord::new("T9", "", 20.0, 2.0);
        no_lot.lot_no = None;

        let report = engine().aggregate(&[no_product, no_lot]);

        let products: Vec<_> = report.rows_of(NodeType::Product).map(|r| r.product_code.clone()).collect();
        assert!(products.contains(&UNKNOWN_BUCKET.to_string()));

        let t9_lot = report
            .rows_of(NodeType::MainLot)
            .find(|r| r.product_code == "T9")
            .unwrap();
        assert_eq!(t9_lot.main_lot.as_deref(), Some(UNKNOWN_BUCKET));
        assert_eq!(report.summary.total_inspected, 30.0);
    }

    #[test]
    fn test_empty_input() {
        let report = engine().aggregate(&[]);
        assert!(report.is_empty());
        assert!(report.defect_columns.is_empty());
        assert_eq!(report.summary, RollupSummary::default());
    }

    #[test]
    fn test_defect_columns_are_zero_filled() {
        let records = vec![
            InspectionRecord::new("T1", "A-1", 100.0, 2.0).with_defects(&[("Bend", 2.0)]),
            InspectionRecord::new("T2", "B-1", 100.0, 3.0).with_defects(&[("Tear", 3.0)]),
        ];
        let report = engine().aggregate(&records);
        assert_eq!(report.defect_columns, vec!["BD".to_string(), "T".to_string()]);
        for row in &report.rows {
            assert_eq!(row.defects.len(), 2);
        }
        let t2 = report.rows_of(NodeType::Product).find(|r| r.product_code == "T2").unwrap();
        assert_eq!(t2.defects.get("BD"), Some(&0.0));
        assert_eq!(t2.defects.get("T"), Some(&3.0));
    }

    #[test]
    fn test_malformed_defects_do_not_abort_record() {
        let mut record = InspectionRecord::new("T1", "A-1", 100.0, 7.0);
        record.defect_details = "Bend:4;Blister:abc;Tear;Stain:3".to_string();
        let report = engine().aggregate(&[record]);

        let sub = report.rows_of(NodeType::SubLot).next().unwrap();
        assert_eq!(sub.rejected, 7.0);
        assert_eq!(sub.defect_qty("BD"), 4.0);
        assert_eq!(sub.defect_qty("SD"), 3.0);
        assert_eq!(report.defect_columns, vec!["BD".to_string(), "SD".to_string()]);
    }

    #[test]
    fn test_bubble_defect_counted_once() {
        let report = engine().aggregate(&[InspectionRecord::new("T1", "A", 10.0, 2.0)
            .with_defects(&[("BUBBLE DEFECT", 2.0)])]);
        assert_eq!(report.defect_columns, vec!["BB".to_string()]);
        let product = report.rows_of(NodeType::Product).next().unwrap();
        let total: f64 = product.defects.values().sum();
        assert_eq!(total, 2.0);
    }

    #[test]
    fn test_parent_rows_precede_children_and_ids_link() {
        let records = vec![
            InspectionRecord::new("T2", "B-10", 1.0, 0.0),
            InspectionRecord::new("T2", "B-2", 1.0, 0.0),
            InspectionRecord::new("T1", "A-1", 1.0, 0.0),
        ];
        let report = engine().aggregate(&records);

        for (idx, row) in report.rows.iter().enumerate() {
            if let Some(parent) = &row.parent_id {
                let parent_idx = report.rows.iter().position(|r| &r.id == parent).unwrap();
                assert!(parent_idx < idx);
            }
        }

        // 子批号自然序: 2 在 10 之前
        let subs: Vec<_> = report
            .rows_of(NodeType::SubLot)
            .filter(|r| r.product_code == "T2")
            .map(|r| r.sub_lot_number.clone().unwrap())
            .collect();
        assert_eq!(subs, vec!["2".to_string(), "10".to_string()]);
    }

    #[test]
    fn test_sub_lot_keeps_first_record_metadata() {
        let mut first = InspectionRecord::new("T1", "A-1", 10.0, 1.0);
        first.inspector_code = Some("INS-01".to_string());
        first.source_document_id = Some("IE-001".to_string());
        let mut second = InspectionRecord::new("T1", "A-1", 10.0, 1.0);
        second.inspector_code = Some("INS-02".to_string());

        let report = engine().aggregate(&[first, second]);
        let sub = report.rows_of(NodeType::SubLot).next().unwrap();
        assert_eq!(sub.inspector.as_deref(), Some("INS-01"));
        assert_eq!(sub.source_document_id.as_deref(), Some("IE-001"));
        assert_eq!(sub.inspected, 20.0);
    }

    #[test]
    fn test_rate_rounds_to_two_places() {
        assert_eq!(rejection_rate(1.0, 3.0), 33.33);
        assert_eq!(rejection_rate(2.0, 3.0), 66.67);
        assert_eq!(rejection_rate(5.0, 0.0), 0.0);
    }
}
