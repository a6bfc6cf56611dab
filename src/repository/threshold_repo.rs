// ==========================================
// 模压质量拒收分析 - 拒收阈值配置仓储
// ==========================================
// 职责: rejection_threshold_configuration 表读写
// 唯一性与数值校验在 engine::threshold
// ==========================================

use crate::db::open_sqlite_connection;
use crate::domain::threshold::ThresholdConfig;
use crate::domain::types::InspectionType;
use crate::repository::error::{RepositoryError, RepositoryResult};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::sync::{Arc, Mutex};

pub struct ThresholdConfigRepository {
    conn: Arc<Mutex<Connection>>,
}

impl ThresholdConfigRepository {
    pub fn new(db_path: &str) -> RepositoryResult<Self> {
        let conn = open_sqlite_connection(db_path)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 某检验类型的全部配置（含停用）
    pub fn list_by_type(&self, inspection_type: &InspectionType) -> RepositoryResult<Vec<ThresholdConfig>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT name, inspection_type, product_ref_no, item_group, threshold_percentage,
                   warning_threshold, critical_threshold, is_active
            FROM rejection_threshold_configuration
            WHERE inspection_type = ?1
            ORDER BY name
            "#,
        )?;
        let configs = stmt
            .query_map(params![inspection_type.as_erp_str()], Self::map_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(configs)
    }

    pub fn find_by_name(&self, name: &str) -> RepositoryResult<Option<ThresholdConfig>> {
        let conn = self.get_conn()?;
        let config = conn
            .query_row(
                r#"
                SELECT name, inspection_type, product_ref_no, item_group, threshold_percentage,
                       warning_threshold, critical_threshold, is_active
                FROM rejection_threshold_configuration
                WHERE name = ?1
                "#,
                params![name],
                Self::map_row,
            )
            .optional()?;
        Ok(config)
    }

    /// 新增或覆盖
    pub fn upsert(&self, config: &ThresholdConfig) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT INTO rejection_threshold_configuration (
                name, inspection_type, product_ref_no, item_group, threshold_percentage,
                warning_threshold, critical_threshold, is_active
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT(name) DO UPDATE SET
                inspection_type = excluded.inspection_type,
                product_ref_no = excluded.product_ref_no,
                item_group = excluded.item_group,
                threshold_percentage = excluded.threshold_percentage,
                warning_threshold = excluded.warning_threshold,
                critical_threshold = excluded.critical_threshold,
                is_active = excluded.is_active
            "#,
            params![
                config.name,
                config.inspection_type.as_erp_str(),
                config.product_ref_no,
                config.item_group,
                config.threshold_pct,
                config.warning_pct,
                config.critical_pct,
                config.is_active as i64,
            ],
        )?;
        Ok(())
    }

    fn map_row(row: &Row) -> rusqlite::Result<ThresholdConfig> {
        Ok(ThresholdConfig {
            name: row.get(0)?,
            inspection_type: InspectionType::parse(&row.get::<_, String>(1)?),
            product_ref_no: row.get(2)?,
            item_group: row.get(3)?,
            threshold_pct: row.get(4)?,
            warning_pct: row.get(5)?,
            critical_pct: row.get(6)?,
            is_active: row.get::<_, i64>(7)? != 0,
        })
    }
}
