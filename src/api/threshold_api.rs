// ==========================================
// 模压质量拒收分析 - 拒收阈值 API
// ==========================================
// 职责: 阈值配置保存（校验 + 作用域唯一）与生效阈值解析
// 优先级: 产品 > 物料组 > 全局 > 系统默认（config_kv）
// ==========================================

use std::sync::Arc;

use tracing::{info, instrument};

use crate::api::error::{config_error, ApiResult};
use crate::config::AnalysisConfigReader;
use crate::domain::threshold::{ThresholdConfig, ThresholdLevels};
use crate::domain::types::{InspectionType, Severity};
use crate::engine::threshold::ThresholdEngine;
use crate::repository::threshold_repo::ThresholdConfigRepository;

pub struct ThresholdApi {
    threshold_repo: Arc<ThresholdConfigRepository>,
    config: Arc<dyn AnalysisConfigReader>,
}

impl ThresholdApi {
    pub fn new(
        threshold_repo: Arc<ThresholdConfigRepository>,
        config: Arc<dyn AnalysisConfigReader>,
    ) -> Self {
        Self {
            threshold_repo,
            config,
        }
    }

    /// 以配置中的系统默认值构建阈值引擎
    async fn engine(&self) -> ApiResult<ThresholdEngine> {
        let defaults = self
            .config
            .get_default_threshold_levels()
            .await
            .map_err(config_error)?;
        Ok(ThresholdEngine::new(defaults))
    }

    /// 保存阈值配置
    ///
    /// # 返回
    /// - Err(ApiError::ValidationError): 预警/严重阈值关系不成立
    /// - Err(ApiError::BusinessRuleViolation): 同检验类型同作用域已存在有效配置
    #[instrument(skip(self, config), fields(name = %config.name))]
    pub async fn save_threshold_config(&self, config: ThresholdConfig) -> ApiResult<()> {
        let engine = self.engine().await?;
        engine.validate(&config)?;

        let existing = self.threshold_repo.list_by_type(&config.inspection_type)?;
        engine.check_unique(&config, &existing)?;

        self.threshold_repo.upsert(&config)?;
        info!(scope = ?config.scope(), threshold = config.threshold_pct, "阈值配置已保存");
        Ok(())
    }

    pub fn list_threshold_configs(
        &self,
        inspection_type: &InspectionType,
    ) -> ApiResult<Vec<ThresholdConfig>> {
        Ok(self.threshold_repo.list_by_type(inspection_type)?)
    }

    /// 解析生效阈值
    ///
    /// # 参数
    /// - product_ref_no / item_group: 为空时跳过对应层级
    pub async fn resolve_threshold(
        &self,
        inspection_type: &InspectionType,
        product_ref_no: Option<&str>,
        item_group: Option<&str>,
    ) -> ApiResult<ThresholdLevels> {
        let engine = self.engine().await?;
        let configs = self.threshold_repo.list_by_type(inspection_type)?;
        Ok(engine.resolve(&configs, inspection_type, product_ref_no, item_group))
    }

    /// 某检验类型的全局生效阈值（驾驶舱、日报默认值）
    pub async fn global_threshold(&self, inspection_type: &InspectionType) -> ApiResult<f64> {
        Ok(self
            .resolve_threshold(inspection_type, None, None)
            .await?
            .threshold_pct)
    }

    /// 按生效阈值对拒收率分级
    pub async fn classify_rate(
        &self,
        rate: f64,
        inspection_type: &InspectionType,
        product_ref_no: Option<&str>,
    ) -> ApiResult<Severity> {
        let engine = self.engine().await?;
        let levels = self
            .resolve_threshold(inspection_type, product_ref_no, None)
            .await?;
        Ok(engine.classify(rate, &levels))
    }
}
