// ==========================================
// 模压质量拒收分析 - 领域类型定义
// ==========================================
// 检验类型 / 单据状态 / CAR 状态 / 汇总节点类型 / 拒收严重度
// 序列化格式与 ERP 单据字段保持一致
// ==========================================

use serde::{Deserialize, Serialize};
use std::fmt;

// ==========================================
// 检验类型 (Inspection Type)
// ==========================================
// ERP 中以完整英文名存储（如 "Lot Inspection"）
// 未识别的类型原样保留，不报错
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum InspectionType {
    Incoming,     // 来料检验（去毛边外协回厂）
    Line,         // 线检
    Patrol,       // 巡检
    Lot,          // 批检
    FinalVisual,  // 终检目视（SPP 检验单）
    Other(String),
}

impl InspectionType {
    /// 解析 ERP 中的检验类型文本（大小写不敏感，兼容 "FVI" 简写）
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        match trimmed.to_ascii_lowercase().as_str() {
            "incoming inspection" | "incoming" => InspectionType::Incoming,
            "line inspection" | "line" => InspectionType::Line,
            "patrol inspection" | "patrol" => InspectionType::Patrol,
            "lot inspection" | "lot" => InspectionType::Lot,
            "final visual inspection" | "final inspection" | "fvi" => InspectionType::FinalVisual,
            _ => InspectionType::Other(trimmed.to_string()),
        }
    }

    /// ERP 存储值
    pub fn as_erp_str(&self) -> &str {
        match self {
            InspectionType::Incoming => "Incoming Inspection",
            InspectionType::Line => "Line Inspection",
            InspectionType::Patrol => "Patrol Inspection",
            InspectionType::Lot => "Lot Inspection",
            InspectionType::FinalVisual => "Final Visual Inspection",
            InspectionType::Other(s) => s.as_str(),
        }
    }

    /// 终检目视记录在 SPP 检验单表中，其余在普通检验单表中
    pub fn uses_spp_entry(&self) -> bool {
        matches!(self, InspectionType::FinalVisual)
    }

    /// 明细下钻时的阶段名称
    pub fn stage_name(&self) -> &str {
        match self {
            InspectionType::Incoming => "INCOMING INSPECTION",
            InspectionType::Patrol => "PATROL",
            InspectionType::Line => "LINE",
            InspectionType::Lot => "LOT",
            InspectionType::FinalVisual => "FINAL INSPECTION",
            InspectionType::Other(s) => s.as_str(),
        }
    }
}

impl fmt::Display for InspectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_erp_str())
    }
}

impl From<String> for InspectionType {
    fn from(value: String) -> Self {
        InspectionType::parse(&value)
    }
}

impl From<InspectionType> for String {
    fn from(value: InspectionType) -> Self {
        value.as_erp_str().to_string()
    }
}

// ==========================================
// 单据状态 (docstatus)
// ==========================================
// 0 = 草稿, 1 = 已提交, 2 = 已取消
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocStatus {
    Draft,
    Submitted,
    Cancelled,
}

impl DocStatus {
    pub fn from_i64(value: i64) -> Option<Self> {
        match value {
            0 => Some(DocStatus::Draft),
            1 => Some(DocStatus::Submitted),
            2 => Some(DocStatus::Cancelled),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> i64 {
        match self {
            DocStatus::Draft => 0,
            DocStatus::Submitted => 1,
            DocStatus::Cancelled => 2,
        }
    }
}

impl fmt::Display for DocStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocStatus::Draft => write!(f, "DRAFT"),
            DocStatus::Submitted => write!(f, "SUBMITTED"),
            DocStatus::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

// ==========================================
// CAR 处理状态
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CarStatus {
    Open,
    #[serde(rename = "In Progress")]
    InProgress,
    Closed,
}

impl CarStatus {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "Open" => Some(CarStatus::Open),
            "In Progress" => Some(CarStatus::InProgress),
            "Closed" => Some(CarStatus::Closed),
            _ => None,
        }
    }
}

impl fmt::Display for CarStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CarStatus::Open => write!(f, "Open"),
            CarStatus::InProgress => write!(f, "In Progress"),
            CarStatus::Closed => write!(f, "Closed"),
        }
    }
}

// ==========================================
// 日报状态
// ==========================================
// Draft（生成后）→ Generated（提交后）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReportStatus {
    Draft,
    Generated,
}

impl ReportStatus {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "Draft" => Some(ReportStatus::Draft),
            "Generated" => Some(ReportStatus::Generated),
            _ => None,
        }
    }

    pub fn to_db_str(&self) -> &'static str {
        match self {
            ReportStatus::Draft => "Draft",
            ReportStatus::Generated => "Generated",
        }
    }
}

impl fmt::Display for ReportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_str())
    }
}

// ==========================================
// 汇总树节点类型
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    Product, // 产品
    MainLot, // 主批号
    SubLot,  // 子批号
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeType::Product => write!(f, "product"),
            NodeType::MainLot => write!(f, "main_lot"),
            NodeType::SubLot => write!(f, "sub_lot"),
        }
    }
}

// ==========================================
// 拒收严重度
// ==========================================
// 顺序: Normal < Warning < Exceeded < Critical
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Normal,
    Warning,
    Exceeded,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Normal => write!(f, "NORMAL"),
            Severity::Warning => write!(f, "WARNING"),
            Severity::Exceeded => write!(f, "EXCEEDED"),
            Severity::Critical => write!(f, "CRITICAL"),
        }
    }
}
