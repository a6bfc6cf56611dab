// ==========================================
// 模压质量拒收分析 - 应用状态
// ==========================================
// 职责: 管理应用级别的共享连接和API实例
// ==========================================

use std::sync::{Arc, Mutex};

use crate::api::{CarApi, DailyReportApi, ReportApi, ThresholdApi};
use crate::config::{AnalysisConfigReader, ConfigManager};
use crate::db::{init_schema, open_sqlite_connection};
use crate::repository::{
    CorrectiveActionRepository, DailyReportRepository, InspectionRepository, ItemPriceRepository,
    ThresholdConfigRepository,
};

/// 数据库路径环境变量
pub const DB_PATH_ENV: &str = "REJECTION_ANALYSIS_DB_PATH";

/// 应用状态
///
/// 所有Repository共享同一个连接
pub struct AppState {
    /// 数据库路径
    pub db_path: String,

    /// 报表查询API
    pub report_api: Arc<ReportApi>,

    /// CAR API
    pub car_api: Arc<CarApi>,

    /// 每日拒收报告API
    pub daily_report_api: Arc<DailyReportApi>,

    /// 阈值配置API
    pub threshold_api: Arc<ThresholdApi>,

    /// 配置管理器（物料单价等维护入口之外的系统配置）
    pub config_manager: Arc<ConfigManager>,

    /// 物料单价仓储（单价维护）
    pub item_price_repo: Arc<ItemPriceRepository>,
}

impl AppState {
    /// 创建新的AppState实例
    ///
    /// # 参数
    /// - db_path: 数据库文件路径（不存在时创建并建表）
    ///
    /// # 返回
    /// - Err(String): 打开数据库或建表失败
    pub fn new(db_path: String) -> Result<Self, String> {
        tracing::info!("初始化AppState，数据库路径: {}", db_path);

        let conn = open_sqlite_connection(&db_path)
            .map_err(|e| format!("无法打开数据库: {}", e))?;
        init_schema(&conn).map_err(|e| format!("数据库建表失败: {}", e))?;
        let conn = Arc::new(Mutex::new(conn));

        // ==========================================
        // 初始化Repository层
        // ==========================================
        let inspection_repo = Arc::new(InspectionRepository::from_connection(conn.clone()));
        let car_repo = Arc::new(CorrectiveActionRepository::from_connection(conn.clone()));
        let daily_report_repo = Arc::new(DailyReportRepository::from_connection(conn.clone()));
        let threshold_repo = Arc::new(ThresholdConfigRepository::from_connection(conn.clone()));
        let item_price_repo = Arc::new(ItemPriceRepository::from_connection(conn.clone()));

        let config_manager = Arc::new(
            ConfigManager::from_connection(conn.clone())
                .map_err(|e| format!("无法创建ConfigManager: {}", e))?,
        );
        let config: Arc<dyn AnalysisConfigReader> = config_manager.clone();

        // ==========================================
        // 初始化API层
        // ==========================================
        let threshold_api = Arc::new(ThresholdApi::new(threshold_repo, config.clone()));

        let report_api = Arc::new(ReportApi::new(
            inspection_repo.clone(),
            item_price_repo.clone(),
            threshold_api.clone(),
            config.clone(),
        ));

        let car_api = Arc::new(CarApi::new(
            car_repo,
            inspection_repo.clone(),
            daily_report_repo.clone(),
        ));

        let daily_report_api = Arc::new(DailyReportApi::new(
            daily_report_repo,
            inspection_repo,
            item_price_repo.clone(),
            threshold_api.clone(),
            config,
        ));

        tracing::info!("AppState初始化完成");

        Ok(Self {
            db_path,
            report_api,
            car_api,
            daily_report_api,
            threshold_api,
            config_manager,
            item_price_repo,
        })
    }

    /// 获取数据库路径
    pub fn get_db_path(&self) -> &str {
        &self.db_path
    }
}

// ==========================================
// 默认数据库路径辅助函数
// ==========================================

/// 获取默认数据库路径
///
/// # 返回
/// - 环境变量 REJECTION_ANALYSIS_DB_PATH 非空时直接使用
/// - 否则: 用户数据目录/rejection-analysis/rejection_analysis.db
/// - 拿不到用户数据目录时: ./rejection_analysis.db
pub fn get_default_db_path() -> String {
    if let Ok(path) = std::env::var(DB_PATH_ENV) {
        let trimmed = path.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }

    match dirs::data_dir() {
        Some(data_dir) => {
            let dir = data_dir.join("rejection-analysis");
            if let Err(e) = std::fs::create_dir_all(&dir) {
                tracing::warn!("创建数据目录失败 {}: {}", dir.display(), e);
            }
            dir.join("rejection_analysis.db").to_string_lossy().to_string()
        }
        None => "./rejection_analysis.db".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_default_db_path() {
        let path = get_default_db_path();
        assert!(!path.is_empty());
        assert!(path.ends_with(".db"));
    }

    #[test]
    fn test_new_creates_schema() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("state.db").to_string_lossy().to_string();

        let state = AppState::new(db_path.clone()).unwrap();
        assert_eq!(state.get_db_path(), db_path);
        assert!(state.daily_report_api.get_daily_report("DRR-NONE").is_err());
    }
}
