// ==========================================
// 模压质量拒收分析 - 拒收阈值配置
// ==========================================
// 作用域优先级: 产品 > 物料组 > 全局 > 系统默认
// ==========================================

use crate::domain::types::InspectionType;
use serde::{Deserialize, Serialize};

// ==========================================
// ThresholdConfig - 阈值配置单
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdConfig {
    pub name: String,
    pub inspection_type: InspectionType,
    pub product_ref_no: Option<String>, // 产品级配置
    pub item_group: Option<String>,     // 物料组级配置
    pub threshold_pct: f64,             // 主阈值（超出需开 CAR）
    pub warning_pct: Option<f64>,       // 预警阈值
    pub critical_pct: Option<f64>,      // 严重阈值
    pub is_active: bool,
}

impl ThresholdConfig {
    /// 作用域（用于唯一性校验）
    pub fn scope(&self) -> ThresholdScope {
        if let Some(p) = self.product_ref_no.as_deref().filter(|s| !s.trim().is_empty()) {
            ThresholdScope::Product(p.trim().to_string())
        } else if let Some(g) = self.item_group.as_deref().filter(|s| !s.trim().is_empty()) {
            ThresholdScope::ItemGroup(g.trim().to_string())
        } else {
            ThresholdScope::Global
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ThresholdScope {
    Product(String),
    ItemGroup(String),
    Global,
}

// ==========================================
// ThresholdLevels - 生效的三级阈值
// ==========================================
pub const DEFAULT_THRESHOLD_PCT: f64 = 5.0;
pub const DEFAULT_WARNING_PCT: f64 = 3.0;
pub const DEFAULT_CRITICAL_PCT: f64 = 10.0;

// 预警/严重阈值可缺省，缺省时不参与分级
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdLevels {
    pub threshold_pct: f64,
    pub warning_pct: Option<f64>,
    pub critical_pct: Option<f64>,
}

impl Default for ThresholdLevels {
    fn default() -> Self {
        Self {
            threshold_pct: DEFAULT_THRESHOLD_PCT,
            warning_pct: Some(DEFAULT_WARNING_PCT),
            critical_pct: Some(DEFAULT_CRITICAL_PCT),
        }
    }
}
