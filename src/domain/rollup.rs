// ==========================================
// 模压质量拒收分析 - 分层汇总输出模型
// ==========================================
// 产品 → 主批号 → 子批号 三级树，扁平化为树表行
// ==========================================

use crate::domain::types::{InspectionType, NodeType};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ==========================================
// RollupRow - 树表中的一行
// ==========================================
// 缺陷代码列通过 flatten 平铺为顶层字段（如 "BD": 5.0）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollupRow {
    pub id: String,

    #[serde(rename = "parentId", skip_serializing_if = "Option::is_none", default)]
    pub parent_id: Option<String>,

    #[serde(rename = "type")]
    pub node_type: NodeType,

    pub product_code: String,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub main_lot: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub sub_lot_number: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub lot_no: Option<String>,

    pub label: String,

    // ===== 汇总指标 =====
    pub inspected: f64,
    pub rejected: f64,
    pub rejection_cost: f64,
    pub rate: f64,

    // ===== 子批号溯源字段（原样保留，不汇总） =====
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub inspector: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub inspection_type: Option<InspectionType>,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub source_document_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub posting_date: Option<NaiveDate>,

    /// 缺陷代码 → 数量（覆盖全部 defect_columns，缺失补 0）
    #[serde(flatten)]
    pub defects: BTreeMap<String, f64>,
}

impl RollupRow {
    /// 读取某缺陷代码列的值（不存在视为 0）
    pub fn defect_qty(&self, code: &str) -> f64 {
        self.defects.get(code).copied().unwrap_or(0.0)
    }
}

// ==========================================
// RollupSummary - 顶层汇总
// ==========================================
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RollupSummary {
    pub total_products: usize,
    pub total_inspected: f64,
    pub total_rejected: f64,
    pub total_rejection_cost: f64,
    pub rejection_rate: f64,
}

// ==========================================
// RollupReport - 汇总报表
// ==========================================
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RollupReport {
    pub rows: Vec<RollupRow>,
    pub defect_columns: Vec<String>,
    pub summary: RollupSummary,
}

impl RollupReport {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// 按节点类型筛选
    pub fn rows_of(&self, node_type: NodeType) -> impl Iterator<Item = &RollupRow> {
        self.rows.iter().filter(move |r| r.node_type == node_type)
    }

    /// 查找某行的直接子行
    pub fn children_of<'a>(&'a self, parent_id: &'a str) -> impl Iterator<Item = &'a RollupRow> {
        self.rows
            .iter()
            .filter(move |r| r.parent_id.as_deref() == Some(parent_id))
    }

    pub fn find(&self, id: &str) -> Option<&RollupRow> {
        self.rows.iter().find(|r| r.id == id)
    }
}
