// ==========================================
// 模压质量拒收分析 - 拒收阈值引擎
// ==========================================
// 职责: 阈值配置校验 / 作用域唯一性 / 生效阈值解析 / 严重度分级
// 红线: 不读库，由调用方传入已加载的配置
// ==========================================

use crate::domain::threshold::{ThresholdConfig, ThresholdLevels, ThresholdScope};
use crate::domain::types::{InspectionType, Severity};
use thiserror::Error;
use tracing::debug;

/// 阈值配置校验错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ThresholdError {
    #[error("预警阈值必须小于主阈值: warning={warning}, threshold={threshold}")]
    WarningNotBelowThreshold { warning: f64, threshold: f64 },

    #[error("严重阈值必须大于主阈值: critical={critical}, threshold={threshold}")]
    CriticalNotAboveThreshold { critical: f64, threshold: f64 },

    #[error("预警阈值必须小于严重阈值: warning={warning}, critical={critical}")]
    WarningNotBelowCritical { warning: f64, critical: f64 },

    #[error("阈值必须为非负数: {0}")]
    NegativeThreshold(f64),

    #[error("该检验类型与作用域已存在有效配置: {existing}")]
    DuplicateScope { existing: String },
}

// ==========================================
// ThresholdEngine
// ==========================================
#[derive(Debug, Clone, Copy)]
pub struct ThresholdEngine {
    defaults: ThresholdLevels,
}

impl Default for ThresholdEngine {
    fn default() -> Self {
        Self::new(ThresholdLevels::default())
    }
}

impl ThresholdEngine {
    /// # 参数
    /// - defaults: 无任何配置命中时使用的系统默认阈值
    pub fn new(defaults: ThresholdLevels) -> Self {
        Self { defaults }
    }

    pub fn defaults(&self) -> ThresholdLevels {
        self.defaults
    }

    /// 校验三级阈值的大小关系
    ///
    /// 仅在两个值都存在（且非 0）时比较
    pub fn validate(&self, config: &ThresholdConfig) -> Result<(), ThresholdError> {
        let threshold = config.threshold_pct;
        if threshold < 0.0 {
            return Err(ThresholdError::NegativeThreshold(threshold));
        }
        let warning = config.warning_pct.filter(|w| *w != 0.0);
        let critical = config.critical_pct.filter(|c| *c != 0.0);

        if let Some(warning) = warning {
            if warning < 0.0 {
                return Err(ThresholdError::NegativeThreshold(warning));
            }
            if threshold > 0.0 && warning >= threshold {
                return Err(ThresholdError::WarningNotBelowThreshold { warning, threshold });
            }
        }
        if let Some(critical) = critical {
            if threshold > 0.0 && critical <= threshold {
                return Err(ThresholdError::CriticalNotAboveThreshold { critical, threshold });
            }
        }
        if let (Some(warning), Some(critical)) = (warning, critical) {
            if warning >= critical {
                return Err(ThresholdError::WarningNotBelowCritical { warning, critical });
            }
        }
        Ok(())
    }

    /// 唯一性校验: 同一检验类型 + 同一作用域只允许一条有效配置
    ///
    /// # 参数
    /// - config: 待保存的配置
    /// - existing: 库中已有配置（可包含 config 自身，按 name 排除）
    pub fn check_unique(
        &self,
        config: &ThresholdConfig,
        existing: &[ThresholdConfig],
    ) -> Result<(), ThresholdError> {
        if !config.is_active {
            return Ok(());
        }
        let scope = config.scope();
        match existing.iter().find(|other| {
            other.is_active
                && other.name != config.name
                && other.inspection_type == config.inspection_type
                && other.scope() == scope
        }) {
            Some(other) => Err(ThresholdError::DuplicateScope {
                existing: other.name.clone(),
            }),
            None => Ok(()),
        }
    }

    /// 解析生效阈值
    ///
    /// 优先级: 产品 > 物料组 > 全局 > 系统默认
    /// 配置中未填的预警/严重阈值借用系统默认，
    /// 仅当借用后仍满足 warning < threshold < critical，否则视为缺省
    pub fn resolve(
        &self,
        configs: &[ThresholdConfig],
        inspection_type: &InspectionType,
        product_ref_no: Option<&str>,
        item_group: Option<&str>,
    ) -> ThresholdLevels {
        let active = |scope: &ThresholdScope| {
            configs.iter().find(|c| {
                c.is_active && &c.inspection_type == inspection_type && &c.scope() == scope
            })
        };

        let candidates = [
            product_ref_no
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(|p| ThresholdScope::Product(p.to_string())),
            item_group
                .map(str::trim)
                .filter(|g| !g.is_empty())
                .map(|g| ThresholdScope::ItemGroup(g.to_string())),
            Some(ThresholdScope::Global),
        ];

        for scope in candidates.iter().flatten() {
            if let Some(config) = active(scope) {
                debug!(config = %config.name, ?scope, "命中阈值配置");
                return self.levels_of(config);
            }
        }
        self.defaults
    }

    fn levels_of(&self, config: &ThresholdConfig) -> ThresholdLevels {
        let threshold = config.threshold_pct;
        let warning = match config.warning_pct.filter(|w| *w != 0.0) {
            Some(w) => Some(w),
            None => self.defaults.warning_pct.filter(|w| *w < threshold),
        };
        let critical = match config.critical_pct.filter(|c| *c != 0.0) {
            Some(c) => Some(c),
            None => self
                .defaults
                .critical_pct
                .filter(|c| *c > threshold && warning.map_or(true, |w| w < *c)),
        };
        ThresholdLevels {
            threshold_pct: threshold,
            warning_pct: warning,
            critical_pct: critical,
        }
    }

    /// 拒收率严重度分级
    ///
    /// - rate >= critical → Critical
    /// - rate >= threshold → Exceeded
    /// - rate >= warning → Warning
    /// 缺省的级别不参与比较
    pub fn classify(&self, rate: f64, levels: &ThresholdLevels) -> Severity {
        if levels.critical_pct.map_or(false, |c| rate >= c) {
            Severity::Critical
        } else if rate >= levels.threshold_pct {
            Severity::Exceeded
        } else if levels.warning_pct.map_or(false, |w| rate >= w) {
            Severity::Warning
        } else {
            Severity::Normal
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(name: &str, product: Option<&str>, group: Option<&str>, threshold: f64) -> ThresholdConfig {
        ThresholdConfig {
            name: name.to_string(),
            inspection_type: InspectionType::Lot,
            product_ref_no: product.map(str::to_string),
            item_group: group.map(str::to_string),
            threshold_pct: threshold,
            warning_pct: None,
            critical_pct: None,
            is_active: true,
        }
    }

    #[test]
    fn test_validate_level_ordering() {
        let engine = ThresholdEngine::default();
        let mut c = config("RTC-1", None, None, 5.0);
        c.warning_pct = Some(3.0);
        c.critical_pct = Some(10.0);
        assert!(engine.validate(&c).is_ok());

        c.warning_pct = Some(5.0);
        assert!(matches!(
            engine.validate(&c),
            Err(ThresholdError::WarningNotBelowThreshold { .. })
        ));

        c.warning_pct = Some(3.0);
        c.critical_pct = Some(4.0);
        assert!(matches!(
            engine.validate(&c),
            Err(ThresholdError::CriticalNotAboveThreshold { .. })
        ));
    }

    #[test]
    fn test_validate_warning_below_critical_without_threshold() {
        let engine = ThresholdEngine::default();
        let mut c = config("RTC-1", None, None, 0.0);
        c.warning_pct = Some(8.0);
        c.critical_pct = Some(6.0);
        assert!(matches!(
            engine.validate(&c),
            Err(ThresholdError::WarningNotBelowCritical { .. })
        ));
    }

    #[test]
    fn test_unique_per_scope() {
        let engine = ThresholdEngine::default();
        let existing = vec![
            config("RTC-1", Some("T5117"), None, 4.0),
            config("RTC-2", None, None, 5.0),
        ];

        assert!(engine
            .check_unique(&config("RTC-3", Some("T5117"), None, 6.0), &existing)
            .is_err());
        assert!(engine
            .check_unique(&config("RTC-3", None, Some("Rubber"), 6.0), &existing)
            .is_ok());
        assert!(engine
            .check_unique(&config("RTC-3", None, None, 6.0), &existing)
            .is_err());
        // 更新自身不算重复
        assert!(engine.check_unique(&existing[1], &existing).is_ok());
    }

    #[test]
    fn test_resolve_priority() {
        let engine = ThresholdEngine::default();
        let configs = vec![
            config("G", None, None, 6.0),
            config("IG", None, Some("Rubber"), 7.0),
            config("P", Some("T5117"), None, 8.0),
        ];
        let lot = InspectionType::Lot;

        assert_eq!(engine.resolve(&configs, &lot, Some("T5117"), Some("Rubber")).threshold_pct, 8.0);
        assert_eq!(engine.resolve(&configs, &lot, Some("T0000"), Some("Rubber")).threshold_pct, 7.0);
        assert_eq!(engine.resolve(&configs, &lot, None, None).threshold_pct, 6.0);
        assert_eq!(
            engine.resolve(&configs, &InspectionType::Incoming, None, None),
            ThresholdLevels::default()
        );
    }

    #[test]
    fn test_resolve_skips_inactive() {
        let engine = ThresholdEngine::default();
        let mut inactive = config("G", None, None, 9.0);
        inactive.is_active = false;
        let levels = engine.resolve(&[inactive], &InspectionType::Lot, None, None);
        assert_eq!(levels.threshold_pct, 5.0);
    }

    #[test]
    fn test_resolve_默认级别不越过主阈值() {
        let engine = ThresholdEngine::default();
        let levels = engine.resolve(&[config("G", None, None, 15.0)], &InspectionType::Lot, None, None);
        assert_eq!(levels.threshold_pct, 15.0);
        assert_eq!(levels.warning_pct, Some(3.0));
        assert_eq!(levels.critical_pct, None);
        assert_eq!(engine.classify(12.0, &levels), Severity::Warning);
        assert_eq!(engine.classify(40.0, &levels), Severity::Exceeded);

        let levels = engine.resolve(&[config("G", None, None, 2.0)], &InspectionType::Lot, None, None);
        assert_eq!(levels.warning_pct, None);
        assert_eq!(levels.critical_pct, Some(10.0));
        assert_eq!(engine.classify(1.5, &levels), Severity::Normal);
    }

    #[test]
    fn test_resolve_配置自身级别优先() {
        let engine = ThresholdEngine::default();
        let mut c = config("G", None, None, 15.0);
        c.critical_pct = Some(25.0);
        let levels = engine.resolve(&[c], &InspectionType::Lot, None, None);
        assert_eq!(levels.critical_pct, Some(25.0));
        assert_eq!(engine.classify(20.0, &levels), Severity::Exceeded);
    }

    #[test]
    fn test_classify() {
        let engine = ThresholdEngine::default();
        let levels = ThresholdLevels::default();
        assert_eq!(engine.classify(1.0, &levels), Severity::Normal);
        assert_eq!(engine.classify(3.0, &levels), Severity::Warning);
        assert_eq!(engine.classify(5.0, &levels), Severity::Exceeded);
        assert_eq!(engine.classify(12.5, &levels), Severity::Critical);
    }
}
