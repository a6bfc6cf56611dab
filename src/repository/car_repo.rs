// ==========================================
// 模压质量拒收分析 - 纠正措施报告 (CAR) 仓储
// ==========================================
// 职责: corrective_action_report + car_five_why 读写
// 红线: Repository 不含业务逻辑（状态校验在 engine::car_draft）
// ==========================================

use crate::db::open_sqlite_connection;
use crate::domain::car::{CorrectiveActionReport, FiveWhyEntry};
use crate::domain::types::{CarStatus, DocStatus};
use crate::repository::error::{
    format_datetime, parse_date_column, parse_datetime_column, RepositoryError, RepositoryResult,
};
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};
use std::sync::{Arc, Mutex};

const SELECT_COLUMNS: &str = "name, car_date, inspection_entry, lot_no, product_ref_no, \
    rejection_percentage, problem_description, cause_for_non_detection, cause_for_occurrence, \
    corrective_action, preventive_measures, remarks, assigned_to, target_date, status, docstatus, \
    created_at, updated_at";

/// CAR 原始行（日期与枚举列尚未解析）
struct RawCar {
    name: String,
    car_date: Option<String>,
    inspection_entry: String,
    lot_no: Option<String>,
    product_ref_no: Option<String>,
    rejection_percentage: f64,
    problem_description: Option<String>,
    cause_for_non_detection: Option<String>,
    cause_for_occurrence: Option<String>,
    corrective_action: Option<String>,
    preventive_measures: Option<String>,
    remarks: Option<String>,
    assigned_to: Option<String>,
    target_date: Option<String>,
    status: String,
    docstatus: i64,
    created_at: String,
    updated_at: String,
}

pub struct CorrectiveActionRepository {
    conn: Arc<Mutex<Connection>>,
}

impl CorrectiveActionRepository {
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

    /// 新建 CAR（含 5-Why 明细，单事务）
    pub fn insert(&self, car: &CorrectiveActionReport) -> RepositoryResult<()> {
        let mut conn = self.get_conn()?;
        let tx = conn
            .transaction()
            .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;

        tx.execute(
            r#"
            INSERT INTO corrective_action_report (
                name, car_date, inspection_entry, lot_no, product_ref_no, rejection_percentage,
                problem_description, cause_for_non_detection, cause_for_occurrence,
                corrective_action, preventive_measures, remarks, assigned_to, target_date,
                status, docstatus, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)
            "#,
            params![
                car.name,
                car.car_date.format("%Y-%m-%d").to_string(),
                car.inspection_entry,
                car.lot_no,
                car.product_ref_no,
                car.rejection_percentage,
                car.problem_description,
                car.cause_for_non_detection,
                car.cause_for_occurrence,
                car.corrective_action,
                car.preventive_measures,
                car.remarks,
                car.assigned_to,
                car.target_date.map(|d| d.format("%Y-%m-%d").to_string()),
                car.status.to_string(),
                car.docstatus.as_i64(),
                format_datetime(&car.created_at),
                format_datetime(&car.updated_at),
            ],
        )?;
        Self::replace_five_why(&tx, &car.name, &car.five_why_analysis)?;

        tx.commit()
            .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;
        Ok(())
    }

    /// 按编号查询
    pub fn find_by_name(&self, name: &str) -> RepositoryResult<Option<CorrectiveActionReport>> {
        let conn = self.get_conn()?;
        let raw = conn
            .query_row(
                &format!("SELECT {} FROM corrective_action_report WHERE name = ?1", SELECT_COLUMNS),
                params![name],
                Self::map_raw,
            )
            .optional()?;
        match raw {
            Some(raw) => Ok(Some(Self::hydrate(&conn, raw)?)),
            None => Ok(None),
        }
    }

    /// 按编号查询（不存在返回 NotFound）
    pub fn get(&self, name: &str) -> RepositoryResult<CorrectiveActionReport> {
        self.find_by_name(name)?.ok_or_else(|| RepositoryError::NotFound {
            entity: "CorrectiveActionReport".to_string(),
            id: name.to_string(),
        })
    }

    /// 检验单对应的未取消 CAR（取最早创建的一张）
    pub fn find_active_by_entry(
        &self,
        inspection_entry: &str,
    ) -> RepositoryResult<Option<CorrectiveActionReport>> {
        let conn = self.get_conn()?;
        let raw = conn
            .query_row(
                &format!(
                    "SELECT {} FROM corrective_action_report \
                     WHERE inspection_entry = ?1 AND docstatus != ?2 \
                     ORDER BY created_at, name LIMIT 1",
                    SELECT_COLUMNS
                ),
                params![inspection_entry, DocStatus::Cancelled.as_i64()],
                Self::map_raw,
            )
            .optional()?;
        match raw {
            Some(raw) => Ok(Some(Self::hydrate(&conn, raw)?)),
            None => Ok(None),
        }
    }

    /// 整单更新（5-Why 明细整体替换）
    pub fn update(&self, car: &CorrectiveActionReport) -> RepositoryResult<()> {
        let mut conn = self.get_conn()?;
        let tx = conn
            .transaction()
            .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;

        let affected = tx.execute(
            r#"
            UPDATE corrective_action_report SET
                problem_description = ?2,
                cause_for_non_detection = ?3,
                cause_for_occurrence = ?4,
                corrective_action = ?5,
                preventive_measures = ?6,
                remarks = ?7,
                assigned_to = ?8,
                target_date = ?9,
                status = ?10,
                docstatus = ?11,
                updated_at = ?12
            WHERE name = ?1
            "#,
            params![
                car.name,
                car.problem_description,
                car.cause_for_non_detection,
                car.cause_for_occurrence,
                car.corrective_action,
                car.preventive_measures,
                car.remarks,
                car.assigned_to,
                car.target_date.map(|d| d.format("%Y-%m-%d").to_string()),
                car.status.to_string(),
                car.docstatus.as_i64(),
                format_datetime(&car.updated_at),
            ],
        )?;
        if affected == 0 {
            return Err(RepositoryError::NotFound {
                entity: "CorrectiveActionReport".to_string(),
                id: car.name.clone(),
            });
        }
        Self::replace_five_why(&tx, &car.name, &car.five_why_analysis)?;

        tx.commit()
            .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;
        Ok(())
    }

    fn replace_five_why(tx: &Transaction, parent: &str, whys: &[FiveWhyEntry]) -> RepositoryResult<()> {
        tx.execute("DELETE FROM car_five_why WHERE parent = ?1", params![parent])?;
        let mut stmt = tx.prepare(
            "INSERT INTO car_five_why (parent, idx, why_question, answer) VALUES (?1, ?2, ?3, ?4)",
        )?;
        for (idx, why) in whys.iter().enumerate() {
            stmt.execute(params![parent, idx as i64 + 1, why.why_question, why.answer])?;
        }
        Ok(())
    }

    fn map_raw(row: &Row) -> rusqlite::Result<RawCar> {
        Ok(RawCar {
            name: row.get(0)?,
            car_date: row.get(1)?,
            inspection_entry: row.get(2)?,
            lot_no: row.get(3)?,
            product_ref_no: row.get(4)?,
            rejection_percentage: row.get(5)?,
            problem_description: row.get(6)?,
            cause_for_non_detection: row.get(7)?,
            cause_for_occurrence: row.get(8)?,
            corrective_action: row.get(9)?,
            preventive_measures: row.get(10)?,
            remarks: row.get(11)?,
            assigned_to: row.get(12)?,
            target_date: row.get(13)?,
            status: row.get(14)?,
            docstatus: row.get(15)?,
            created_at: row.get(16)?,
            updated_at: row.get(17)?,
        })
    }

    fn hydrate(conn: &Connection, raw: RawCar) -> RepositoryResult<CorrectiveActionReport> {
        let car_date = parse_date_column("car_date", raw.car_date)?.ok_or_else(|| {
            RepositoryError::FieldValueError {
                field: "car_date".to_string(),
                message: format!("CAR {} 缺少开单日期", raw.name),
            }
        })?;
        let status = CarStatus::parse(&raw.status).ok_or_else(|| RepositoryError::FieldValueError {
            field: "status".to_string(),
            message: format!("未知 CAR 状态: {}", raw.status),
        })?;
        let docstatus = DocStatus::from_i64(raw.docstatus).ok_or_else(|| {
            RepositoryError::FieldValueError {
                field: "docstatus".to_string(),
                message: format!("未知单据状态: {}", raw.docstatus),
            }
        })?;

        let mut stmt = conn.prepare(
            "SELECT why_question, answer FROM car_five_why WHERE parent = ?1 ORDER BY idx",
        )?;
        let five_why_analysis = stmt
            .query_map(params![raw.name], |row| {
                Ok(FiveWhyEntry {
                    why_question: row.get(0)?,
                    answer: row.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(CorrectiveActionReport {
            car_date,
            target_date: parse_date_column("target_date", raw.target_date)?,
            status,
            docstatus,
            five_why_analysis,
            created_at: parse_datetime_column("created_at", &raw.created_at)?,
            updated_at: parse_datetime_column("updated_at", &raw.updated_at)?,
            name: raw.name,
            inspection_entry: raw.inspection_entry,
            lot_no: raw.lot_no,
            product_ref_no: raw.product_ref_no,
            rejection_percentage: raw.rejection_percentage,
            problem_description: raw.problem_description,
            cause_for_non_detection: raw.cause_for_non_detection,
            cause_for_occurrence: raw.cause_for_occurrence,
            corrective_action: raw.corrective_action,
            preventive_measures: raw.preventive_measures,
            remarks: raw.remarks,
            assigned_to: raw.assigned_to,
        })
    }
}
