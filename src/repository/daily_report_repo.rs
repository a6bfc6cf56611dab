// ==========================================
// 模压质量拒收分析 - 日报仓储
// ==========================================
// 职责: daily_rejection_report / daily_report_section / daily_report_item 读写
// 一个报表日期至多一张日报（report_date UNIQUE）
// ==========================================

use crate::db::open_sqlite_connection;
use crate::domain::report::{
    DailyRejectionReport, DailyReportItem, DailyReportListItem, ReportSection, SectionSummary,
};
use crate::domain::types::{CarStatus, ReportStatus};
use crate::repository::error::{
    format_datetime, parse_date_column, parse_datetime_column, RepositoryError, RepositoryResult,
};
use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::{Arc, Mutex};

pub struct DailyReportRepository {
    conn: Arc<Mutex<Connection>>,
}

impl DailyReportRepository {
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

    /// 某日期已有日报时返回其编号
    pub fn find_name_by_date(&self, report_date: NaiveDate) -> RepositoryResult<Option<String>> {
        let conn = self.get_conn()?;
        let name = conn
            .query_row(
                "SELECT name FROM daily_rejection_report WHERE report_date = ?1",
                params![report_date.format("%Y-%m-%d").to_string()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(name)
    }

    /// 保存日报（表头 + 三个分段 + 明细，单事务）
    pub fn insert(&self, report: &DailyRejectionReport) -> RepositoryResult<()> {
        let mut conn = self.get_conn()?;
        let tx = conn
            .transaction()
            .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;

        tx.execute(
            "INSERT INTO daily_rejection_report (name, report_date, threshold_percentage, status, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                report.name,
                report.report_date.format("%Y-%m-%d").to_string(),
                report.threshold_percentage,
                report.status.to_db_str(),
                format_datetime(&report.created_at),
            ],
        )?;

        {
            let mut section_stmt = tx.prepare(
                r#"
                INSERT INTO daily_report_section (
                    parent, section, total_inspections, avg_rejection, exceeding_threshold,
                    patrol_avg, line_avg, lot_avg, total_rejection_cost
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                "#,
            )?;
            for (section, summary) in [
                (ReportSection::Lot, &report.lot),
                (ReportSection::Incoming, &report.incoming),
                (ReportSection::Final, &report.final_visual),
            ] {
                section_stmt.execute(params![
                    report.name,
                    section.as_str(),
                    summary.total_inspections as i64,
                    summary.avg_rejection,
                    summary.exceeding_threshold as i64,
                    summary.patrol_avg,
                    summary.line_avg,
                    summary.lot_avg,
                    summary.total_rejection_cost,
                ])?;
            }

            let mut item_stmt = tx.prepare(
                r#"
                INSERT INTO daily_report_item (
                    parent, section, inspection_entry, lot_no, item_code, inspected_qty,
                    rejected_qty, rejection_pct, patrol_rej_pct, line_rej_pct, lot_rej_pct,
                    exceeds_threshold, unit_cost, rejection_cost, car_reference, car_status
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
                "#,
            )?;
            for item in &report.items {
                item_stmt.execute(params![
                    report.name,
                    item.section.as_str(),
                    item.inspection_entry,
                    item.lot_no,
                    item.item_code,
                    item.inspected_qty,
                    item.rejected_qty,
                    item.rejection_pct,
                    item.patrol_rej_pct,
                    item.line_rej_pct,
                    item.lot_rej_pct,
                    item.exceeds_threshold as i64,
                    item.unit_cost,
                    item.rejection_cost,
                    item.car_reference,
                    item.car_status.map(|s| s.to_string()),
                ])?;
            }
        }

        tx.commit()
            .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;
        Ok(())
    }

    /// 按编号读取完整日报
    pub fn find_by_name(&self, name: &str) -> RepositoryResult<Option<DailyRejectionReport>> {
        let conn = self.get_conn()?;
        let header = conn
            .query_row(
                "SELECT name, report_date, threshold_percentage, status, created_at \
                 FROM daily_rejection_report WHERE name = ?1",
                params![name],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, f64>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                },
            )
            .optional()?;
        let Some((name, report_date, threshold_percentage, status, created_at)) = header else {
            return Ok(None);
        };

        let mut lot = SectionSummary::default();
        let mut incoming = SectionSummary::default();
        let mut final_visual = SectionSummary::default();
        {
            let mut stmt = conn.prepare(
                "SELECT section, total_inspections, avg_rejection, exceeding_threshold, \
                 patrol_avg, line_avg, lot_avg, total_rejection_cost \
                 FROM daily_report_section WHERE parent = ?1",
            )?;
            let sections = stmt
                .query_map(params![name], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        SectionSummary {
                            total_inspections: row.get::<_, i64>(1)?.max(0) as usize,
                            avg_rejection: row.get(2)?,
                            exceeding_threshold: row.get::<_, i64>(3)?.max(0) as usize,
                            patrol_avg: row.get(4)?,
                            line_avg: row.get(5)?,
                            lot_avg: row.get(6)?,
                            total_rejection_cost: row.get(7)?,
                        },
                    ))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            for (section, summary) in sections {
                match ReportSection::parse(&section) {
                    Some(ReportSection::Lot) => lot = summary,
                    Some(ReportSection::Incoming) => incoming = summary,
                    Some(ReportSection::Final) => final_visual = summary,
                    None => {
                        return Err(RepositoryError::FieldValueError {
                            field: "section".to_string(),
                            message: format!("未知日报分段: {}", section),
                        })
                    }
                }
            }
        }

        let items = Self::load_items(&conn, &name)?;
        let report_date = parse_date_column("report_date", report_date)?.ok_or_else(|| {
            RepositoryError::FieldValueError {
                field: "report_date".to_string(),
                message: format!("日报 {} 缺少报表日期", name),
            }
        })?;

        Ok(Some(DailyRejectionReport {
            report_date,
            threshold_percentage,
            status: parse_report_status(&status)?,
            lot,
            incoming,
            final_visual,
            items,
            created_at: parse_datetime_column("created_at", &created_at)?,
            name,
        }))
    }

    fn load_items(conn: &Connection, parent: &str) -> RepositoryResult<Vec<DailyReportItem>> {
        let mut stmt = conn.prepare(
            r#"
            SELECT section, inspection_entry, lot_no, item_code, inspected_qty, rejected_qty,
                   rejection_pct, patrol_rej_pct, line_rej_pct, lot_rej_pct, exceeds_threshold,
                   unit_cost, rejection_cost, car_reference, car_status
            FROM daily_report_item
            WHERE parent = ?1
            ORDER BY id
            "#,
        )?;
        let raw = stmt
            .query_map(params![parent], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<String>>(14)?,
                    DailyReportItem {
                        section: ReportSection::Lot,
                        inspection_entry: row.get(1)?,
                        lot_no: row.get(2)?,
                        item_code: row.get(3)?,
                        inspected_qty: row.get(4)?,
                        rejected_qty: row.get(5)?,
                        rejection_pct: row.get(6)?,
                        patrol_rej_pct: row.get(7)?,
                        line_rej_pct: row.get(8)?,
                        lot_rej_pct: row.get(9)?,
                        exceeds_threshold: row.get::<_, i64>(10)? != 0,
                        unit_cost: row.get(11)?,
                        rejection_cost: row.get(12)?,
                        car_reference: row.get(13)?,
                        car_status: None,
                    },
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        raw.into_iter()
            .map(|(section, car_status, mut item)| {
                item.section = ReportSection::parse(&section).ok_or_else(|| {
                    RepositoryError::FieldValueError {
                        field: "section".to_string(),
                        message: format!("未知日报分段: {}", section),
                    }
                })?;
                item.car_status = car_status.as_deref().and_then(CarStatus::parse);
                Ok(item)
            })
            .collect()
    }

    /// 日报列表（报表日期倒序）
    ///
    /// total_lots 取批检分段检验数；pending_cars 为超阈值且未关联 CAR 的明细数
    pub fn list(&self, limit: usize) -> RepositoryResult<Vec<DailyReportListItem>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT r.name, r.report_date, r.status, r.created_at,
                   COALESCE((SELECT s.total_inspections FROM daily_report_section s
                             WHERE s.parent = r.name AND s.section = 'lot'), 0),
                   (SELECT COUNT(*) FROM daily_report_item i
                    WHERE i.parent = r.name AND i.exceeds_threshold = 1 AND i.car_reference IS NULL)
            FROM daily_rejection_report r
            ORDER BY r.report_date DESC
            LIMIT ?1
            "#,
        )?;
        let raw = stmt
            .query_map(params![limit as i64], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, i64>(4)?,
                    row.get::<_, i64>(5)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        raw.into_iter()
            .map(|(name, report_date, status, created_at, total_lots, pending_cars)| {
                let production_date = parse_date_column("report_date", report_date)?.ok_or_else(|| {
                    RepositoryError::FieldValueError {
                        field: "report_date".to_string(),
                        message: format!("日报 {} 缺少报表日期", name),
                    }
                })?;
                Ok(DailyReportListItem {
                    production_date,
                    status: parse_report_status(&status)?,
                    total_lots: total_lots.max(0) as usize,
                    pending_cars: pending_cars.max(0) as usize,
                    created_at: parse_datetime_column("created_at", &created_at)?,
                    name,
                })
            })
            .collect()
    }

    /// 更新日报状态
    pub fn set_status(&self, name: &str, status: ReportStatus) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        let affected = conn.execute(
            "UPDATE daily_rejection_report SET status = ?2 WHERE name = ?1",
            params![name, status.to_db_str()],
        )?;
        if affected == 0 {
            return Err(RepositoryError::NotFound {
                entity: "DailyRejectionReport".to_string(),
                id: name.to_string(),
            });
        }
        Ok(())
    }

    /// 将 CAR 编号与状态回写到引用该检验单的日报明细
    ///
    /// # 返回
    /// - 更新的明细行数
    pub fn sync_car_reference(
        &self,
        inspection_entry: &str,
        car_name: &str,
        car_status: CarStatus,
    ) -> RepositoryResult<usize> {
        let conn = self.get_conn()?;
        let affected = conn.execute(
            "UPDATE daily_report_item SET car_reference = ?2, car_status = ?3 WHERE inspection_entry = ?1",
            params![inspection_entry, car_name, car_status.to_string()],
        )?;
        Ok(affected)
    }
}

fn parse_report_status(raw: &str) -> RepositoryResult<ReportStatus> {
    ReportStatus::parse(raw).ok_or_else(|| RepositoryError::FieldValueError {
        field: "status".to_string(),
        message: format!("未知日报状态: {}", raw),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{configure_sqlite_connection, init_schema};

    fn setup() -> DailyReportRepository {
        let conn = Connection::open_in_memory().unwrap();
        configure_sqlite_connection(&conn).unwrap();
        init_schema(&conn).unwrap();
        DailyReportRepository::from_connection(Arc::new(Mutex::new(conn)))
    }

    fn item(section: ReportSection, entry: &str, pct: f64, exceeds: bool) -> DailyReportItem {
        DailyReportItem {
            section,
            inspection_entry: entry.to_string(),
            lot_no: Some("25K26X01".to_string()),
            item_code: Some("T5117".to_string()),
            inspected_qty: 100.0,
            rejected_qty: pct,
            rejection_pct: pct,
            patrol_rej_pct: 0.0,
            line_rej_pct: 0.0,
            lot_rej_pct: pct,
            exceeds_threshold: exceeds,
            unit_cost: 2.0,
            rejection_cost: pct * 2.0,
            car_reference: None,
            car_status: None,
        }
    }

    fn report(name: &str, date: &str) -> DailyRejectionReport {
        let report_date = NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap();
        DailyRejectionReport {
            name: name.to_string(),
            report_date,
            threshold_percentage: 5.0,
            status: ReportStatus::Draft,
            lot: SectionSummary {
                total_inspections: 2,
                avg_rejection: 4.5,
                exceeding_threshold: 1,
                ..Default::default()
            },
            incoming: SectionSummary::default(),
            final_visual: SectionSummary {
                total_inspections: 1,
                ..Default::default()
            },
            items: vec![
                item(ReportSection::Lot, "IE-1", 2.0, false),
                item(ReportSection::Lot, "IE-2", 7.0, true),
                item(ReportSection::Final, "SPP-1", 1.0, false),
            ],
            created_at: report_date.and_hms_opt(18, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_insert_and_load_roundtrip() {
        let repo = setup();
        let r = report("DRR-1", "2025-11-26");
        repo.insert(&r).unwrap();

        assert_eq!(repo.find_by_name("DRR-1").unwrap(), Some(r));
        assert_eq!(
            repo.find_name_by_date(NaiveDate::from_ymd_opt(2025, 11, 26).unwrap()).unwrap(),
            Some("DRR-1".to_string())
        );
        assert!(repo.find_by_name("DRR-X").unwrap().is_none());
    }

    #[test]
    fn test_duplicate_date_rejected() {
        let repo = setup();
        repo.insert(&report("DRR-1", "2025-11-26")).unwrap();
        assert!(matches!(
            repo.insert(&report("DRR-2", "2025-11-26")),
            Err(RepositoryError::UniqueConstraintViolation(_))
        ));
    }

    #[test]
    fn test_list_newest_first_with_pending_cars() {
        let repo = setup();
        repo.insert(&report("DRR-1", "2025-11-25")).unwrap();
        repo.insert(&report("DRR-2", "2025-11-26")).unwrap();

        let list = repo.list(100).unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].name, "DRR-2");
        assert_eq!(list[0].total_lots, 2);
        assert_eq!(list[0].pending_cars, 1);
        assert_eq!(repo.list(1).unwrap().len(), 1);
    }

    #[test]
    fn test_sync_car_reference_clears_pending() {
        let repo = setup();
        repo.insert(&report("DRR-1", "2025-11-26")).unwrap();

        let updated = repo
            .sync_car_reference("IE-2", "CAR-ABCDEF12", CarStatus::InProgress)
            .unwrap();
        assert_eq!(updated, 1);

        let loaded = repo.find_by_name("DRR-1").unwrap().unwrap();
        let synced = loaded.items.iter().find(|i| i.inspection_entry == "IE-2").unwrap();
        assert_eq!(synced.car_reference.as_deref(), Some("CAR-ABCDEF12"));
        assert_eq!(synced.car_status, Some(CarStatus::InProgress));
        assert_eq!(repo.list(10).unwrap()[0].pending_cars, 0);
    }

    #[test]
    fn test_set_status() {
        let repo = setup();
        repo.insert(&report("DRR-1", "2025-11-26")).unwrap();
        repo.set_status("DRR-1", ReportStatus::Generated).unwrap();
        assert_eq!(
            repo.find_by_name("DRR-1").unwrap().unwrap().status,
            ReportStatus::Generated
        );
        assert!(repo.set_status("DRR-X", ReportStatus::Generated).is_err());
    }
}
