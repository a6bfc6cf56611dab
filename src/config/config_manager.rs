// ==========================================
// 模压质量拒收分析 - 配置管理器
// ==========================================
// 职责: 配置加载、查询、覆写管理
// 存储: config_kv 表 (key-value + scope)
// ==========================================

use crate::config::analysis_config_trait::AnalysisConfigReader;
use crate::db::open_sqlite_connection;
use crate::domain::report::PerformanceChartSettings;
use crate::domain::threshold::{
    ThresholdLevels, DEFAULT_CRITICAL_PCT, DEFAULT_THRESHOLD_PCT, DEFAULT_WARNING_PCT,
};
use crate::engine::pricing::PricingCodeMapper;
use async_trait::async_trait;
use chrono::NaiveDate;
use rusqlite::{params, Connection};
use serde_json::json;
use std::collections::BTreeMap;
use std::error::Error;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use tracing::warn;

// ==========================================
// ConfigManager - 配置管理器
// ==========================================
pub struct ConfigManager {
    conn: Arc<Mutex<Connection>>,
}

impl ConfigManager {
    /// 创建新的 ConfigManager 实例
    ///
    /// # 参数
    /// - db_path: 数据库文件路径
    pub fn new(db_path: &str) -> Result<Self, Box<dyn Error>> {
        let conn = open_sqlite_connection(db_path)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// 从已有连接创建 ConfigManager
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Result<Self, Box<dyn Error>> {
        {
            let conn_guard = conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;
            crate::db::configure_sqlite_connection(&conn_guard)?;
        }

        Ok(Self { conn })
    }

    /// 从 config_kv 表读取配置值（scope_id='global'）
    ///
    /// # 返回
    /// - Some(String): 配置值
    /// - None: 配置不存在
    fn get_config_value(&self, key: &str) -> Result<Option<String>, Box<dyn Error>> {
        let conn = self.conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;

        let result = conn.query_row(
            "SELECT value FROM config_kv WHERE scope_id = 'global' AND key = ?1",
            params![key],
            |row| row.get::<_, String>(0),
        );

        match result {
            Ok(value) => Ok(Some(value)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(Box::new(e)),
        }
    }

    /// 读取 global scope 的配置值
    pub fn get_global_config_value(&self, key: &str) -> Result<Option<String>, Box<dyn Error>> {
        self.get_config_value(key)
    }

    /// 写入 global scope 的配置值（覆盖）
    pub fn set_global_config_value(&self, key: &str, value: &str) -> Result<(), Box<dyn Error>> {
        let conn = self.conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;
        conn.execute(
            "INSERT INTO config_kv (scope_id, key, value, updated_at) VALUES ('global', ?1, ?2, datetime('now'))
             ON CONFLICT(scope_id, key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value],
        )?;
        Ok(())
    }

    /// 读取并解析数值配置；缺失或格式错误时使用默认值
    fn get_parsed_or_default<T>(&self, key: &str, default: T) -> Result<T, Box<dyn Error>>
    where
        T: FromStr + Copy,
    {
        match self.get_config_value(key)? {
            None => Ok(default),
            Some(raw) => match raw.trim().parse::<T>() {
                Ok(v) => Ok(v),
                Err(_) => {
                    warn!(config_key = key, raw_value = %raw, "配置格式错误，使用默认值");
                    Ok(default)
                }
            },
        }
    }

    /// 获取所有配置的快照（JSON格式）
    ///
    /// # 用途
    /// - 日报生成时记录所用配置，便于追溯
    pub fn get_config_snapshot(&self) -> Result<String, Box<dyn Error>> {
        let conn = self.conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;

        let mut stmt = conn.prepare(
            "SELECT key, value FROM config_kv WHERE scope_id = 'global' ORDER BY key"
        )?;

        let mut config_map: BTreeMap<String, String> = BTreeMap::new();
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
            ))
        })?;

        for row in rows {
            let (key, value) = row?;
            config_map.insert(key, value);
        }

        let json_value = json!(config_map);
        Ok(serde_json::to_string(&json_value)?)
    }
}

// ==========================================
// AnalysisConfigReader Trait 实现
// ==========================================
#[async_trait]
impl AnalysisConfigReader for ConfigManager {
    async fn get_default_threshold_levels(&self) -> Result<ThresholdLevels, Box<dyn Error>> {
        Ok(ThresholdLevels {
            threshold_pct: self
                .get_parsed_or_default(config_keys::DEFAULT_THRESHOLD_PCT, DEFAULT_THRESHOLD_PCT)?,
            warning_pct: Some(
                self.get_parsed_or_default(config_keys::DEFAULT_WARNING_PCT, DEFAULT_WARNING_PCT)?,
            ),
            critical_pct: Some(
                self.get_parsed_or_default(config_keys::DEFAULT_CRITICAL_PCT, DEFAULT_CRITICAL_PCT)?,
            ),
        })
    }

    async fn get_pricing_code_mapper(&self) -> Result<PricingCodeMapper, Box<dyn Error>> {
        let source = self
            .get_config_value(config_keys::PRICING_SOURCE_PREFIX)?
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| "T".to_string());
        let target = self
            .get_config_value(config_keys::PRICING_TARGET_PREFIX)?
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| "F".to_string());
        Ok(PricingCodeMapper::new(source.trim(), target.trim()))
    }

    async fn get_report_list_limit(&self) -> Result<usize, Box<dyn Error>> {
        let limit = self.get_parsed_or_default(config_keys::REPORT_LIST_LIMIT, 100usize)?;
        Ok(if limit == 0 { 100 } else { limit })
    }

    async fn get_defect_chart_window(&self) -> Result<(i64, usize), Box<dyn Error>> {
        let days = self.get_parsed_or_default(config_keys::DEFECT_CHART_DAYS, 30i64)?;
        let top_n = self.get_parsed_or_default(config_keys::DEFECT_CHART_TOP_N, 10usize)?;
        Ok((days.max(1), top_n.max(1)))
    }

    async fn get_trend_chart_months(&self) -> Result<u32, Box<dyn Error>> {
        let months = self.get_parsed_or_default(config_keys::TREND_CHART_MONTHS, 6u32)?;
        Ok(months.max(1))
    }

    async fn get_performance_chart_settings(
        &self,
    ) -> Result<PerformanceChartSettings, Box<dyn Error>> {
        let defaults = PerformanceChartSettings::default();
        Ok(PerformanceChartSettings {
            days: self
                .get_parsed_or_default(config_keys::PERFORMANCE_CHART_DAYS, defaults.days)?
                .max(1),
            operator_limit: self
                .get_parsed_or_default(config_keys::OPERATOR_CHART_LIMIT, defaults.operator_limit)?
                .max(1),
            machine_limit: self
                .get_parsed_or_default(config_keys::MACHINE_CHART_LIMIT, defaults.machine_limit)?
                .max(1),
            min_inspections: self.get_parsed_or_default(
                config_keys::PERFORMANCE_MIN_INSPECTIONS,
                defaults.min_inspections,
            )?,
            critical_pct: self
                .get_parsed_or_default(config_keys::PERFORMANCE_CRITICAL_PCT, defaults.critical_pct)?,
        })
    }

    async fn get_cost_analysis_start(&self) -> Result<NaiveDate, Box<dyn Error>> {
        let default = NaiveDate::from_ymd_opt(2025, 4, 1).ok_or("成本分析默认起始日期无效")?;
        self.get_parsed_or_default(config_keys::COST_ANALYSIS_START_DATE, default)
    }
}

// ==========================================
// 配置键常量
// ==========================================
pub mod config_keys {
    // 阈值默认值（%）
    pub const DEFAULT_THRESHOLD_PCT: &str = "default_threshold_pct";
    pub const DEFAULT_WARNING_PCT: &str = "default_warning_pct";
    pub const DEFAULT_CRITICAL_PCT: &str = "default_critical_pct";

    // 计价编码映射（成品前缀 → 计价前缀）
    pub const PRICING_SOURCE_PREFIX: &str = "pricing_source_prefix";
    pub const PRICING_TARGET_PREFIX: &str = "pricing_target_prefix";

    // 日报
    pub const REPORT_LIST_LIMIT: &str = "report_list_limit";

    // 图表
    pub const DEFECT_CHART_DAYS: &str = "defect_chart_days";
    pub const DEFECT_CHART_TOP_N: &str = "defect_chart_top_n";
    pub const TREND_CHART_MONTHS: &str = "trend_chart_months";

    // 操作工 / 机台绩效
    pub const PERFORMANCE_CHART_DAYS: &str = "performance_chart_days";
    pub const OPERATOR_CHART_LIMIT: &str = "operator_chart_limit";
    pub const MACHINE_CHART_LIMIT: &str = "machine_chart_limit";
    pub const PERFORMANCE_MIN_INSPECTIONS: &str = "performance_min_inspections";
    pub const PERFORMANCE_CRITICAL_PCT: &str = "performance_critical_pct";

    // 成本分析（YYYY-MM-DD）
    pub const COST_ANALYSIS_START_DATE: &str = "cost_analysis_start_date";
}
