// ==========================================
// 模压质量拒收分析 - 检验记录领域模型
// ==========================================
// 来源: 检验单 / SPP 检验单 与 模压生产记录 关联后的扁平行
// 批号规则: 主批号[-子批号]，如 25A01U01-2
// ==========================================

use crate::domain::types::InspectionType;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// 缺失分组键时使用的桶名
pub const UNKNOWN_BUCKET: &str = "Unknown";

/// 无子批号后缀时的默认子批号
pub const DEFAULT_SUB_LOT: &str = "1";

// ==========================================
// InspectionRecord - 检验记录（汇总器输入行）
// ==========================================
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InspectionRecord {
    // ===== 分组键 =====
    pub product_code: Option<String>, // 产品编码（T 开头的成品编码）
    pub lot_no: Option<String>,       // 批号（可能带 "-" 子批号后缀）

    // ===== 数量 =====
    pub inspected_qty: f64,   // 检验数量
    pub rejected_qty: f64,    // 拒收数量
    pub rejection_cost: f64,  // 拒收成本

    // ===== 缺陷明细 =====
    // 格式: "标签:数量;标签:数量"
    pub defect_details: String,

    // ===== 溯源信息 =====
    pub posting_date: Option<NaiveDate>,
    pub inspector_code: Option<String>,
    pub inspection_type: Option<InspectionType>,
    pub source_document_id: Option<String>,
}

impl InspectionRecord {
    /// 按产品/批号/数量快速构造（测试与导入场景）
    pub fn new(product_code: &str, lot_no: &str, inspected_qty: f64, rejected_qty: f64) -> Self {
        Self {
            product_code: Some(product_code.to_string()),
            lot_no: Some(lot_no.to_string()),
            inspected_qty,
            rejected_qty,
            ..Default::default()
        }
    }

    /// 以 (标签, 数量) 列表设置缺陷明细
    pub fn with_defects(mut self, defects: &[(&str, f64)]) -> Self {
        self.defect_details = format_defect_details(defects);
        self
    }

    pub fn with_cost(mut self, rejection_cost: f64) -> Self {
        self.rejection_cost = rejection_cost;
        self
    }

    /// 产品分组键（空值归入 Unknown）
    pub fn product_key(&self) -> String {
        non_blank(self.product_code.as_deref())
            .unwrap_or(UNKNOWN_BUCKET)
            .to_string()
    }

    /// 拆分后的批号
    pub fn lot(&self) -> LotNumber {
        LotNumber::parse(self.lot_no.as_deref().unwrap_or(""))
    }

    pub fn main_lot(&self) -> String {
        self.lot().main_lot
    }

    pub fn sub_lot_number(&self) -> String {
        self.lot().sub_lot_number
    }

    /// 检验记录自身的拒收率（%，未取整）
    pub fn rejection_rate(&self) -> f64 {
        if self.inspected_qty > 0.0 {
            self.rejected_qty / self.inspected_qty * 100.0
        } else {
            0.0
        }
    }
}

// ==========================================
// LotNumber - 批号拆分结果
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LotNumber {
    pub main_lot: String,
    pub sub_lot_number: String,
}

impl LotNumber {
    /// 拆分批号
    ///
    /// 规则:
    /// - 优先按第一个 "-" 拆分；不含 "-" 时按第一个 "/" 拆分
    /// - 无分隔符: main_lot = 原批号, sub_lot_number = "1"
    /// - 主批号为空 → "Unknown"；子批号为空 → "1"
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        let split = trimmed
            .split_once('-')
            .or_else(|| trimmed.split_once('/'));

        let (main, sub) = match split {
            Some((main, sub)) => (main.trim(), sub.trim()),
            None => (trimmed, ""),
        };

        Self {
            main_lot: if main.is_empty() {
                UNKNOWN_BUCKET.to_string()
            } else {
                main.to_string()
            },
            sub_lot_number: if sub.is_empty() {
                DEFAULT_SUB_LOT.to_string()
            } else {
                sub.to_string()
            },
        }
    }
}

/// 拼接缺陷明细文本
pub fn format_defect_details(defects: &[(&str, f64)]) -> String {
    defects
        .iter()
        .map(|(label, qty)| format!("{}:{}", label, qty))
        .collect::<Vec<_>>()
        .join(";")
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}
