// ==========================================
// 模压质量拒收分析 - 检验单仓储
// ==========================================
// 职责: 读取 ERP 检验单 / SPP 检验单 / 模压生产记录
// 红线: Repository 不含业务逻辑，只做参数化查询与行映射
// ==========================================
// 关联规则:
// - 普通检验单: lot_no = 模压生产记录.scan_lot_number
// - SPP 检验单（终检目视）: lot_no 取第一个 "-" 之前的主批号再关联
// - 阶段报表按模压日期（生产日期）过滤，检验记录按过账日期过滤
// ==========================================

use crate::db::open_sqlite_connection;
use crate::domain::inspection::InspectionRecord;
use crate::domain::report::{
    CostInspectionRow, EntryDefectLine, InspectionEntryDetail, MonthlyStageAverage,
    MouldingOutputRow, PerformanceSample, StageInspectionRow, StageReportFilter,
};
use crate::domain::types::{CarStatus, InspectionType};
use crate::repository::error::{parse_date_column, RepositoryError, RepositoryResult};
use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

/// 单据拒收率: 单据值 > 0 取单据值，否则按数量计算
const PCT_EXPR: &str = "CASE \
    WHEN {t}.total_rejected_qty_in_percentage > 0 THEN {t}.total_rejected_qty_in_percentage \
    WHEN {t}.total_inspected_qty_nos > 0 THEN {t}.total_rejected_qty * 100.0 / {t}.total_inspected_qty_nos \
    ELSE 0 END";

fn pct_expr(alias: &str) -> String {
    PCT_EXPR.replace("{t}", alias)
}

/// 主批号表达式（第一个 "-" 之前）
fn base_lot_expr(column: &str) -> String {
    format!(
        "CASE WHEN instr({c}, '-') > 0 THEN substr({c}, 1, instr({c}, '-') - 1) ELSE {c} END",
        c = column
    )
}

fn entry_table(inspection_type: &InspectionType) -> &'static str {
    if inspection_type.uses_spp_entry() {
        "spp_inspection_entry"
    } else {
        "inspection_entry"
    }
}

fn like_pattern(value: &str) -> String {
    format!("%{}%", value.trim())
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn ymd(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// "?n, ?n+1, ..." 形式的 IN 占位符
fn placeholders(start: usize, count: usize) -> String {
    (start..start + count)
        .map(|i| format!("?{}", i))
        .collect::<Vec<_>>()
        .join(", ")
}

fn performance_sample(row: &Row) -> rusqlite::Result<PerformanceSample> {
    Ok(PerformanceSample {
        key: row.get(0)?,
        inspection_entry: row.get(1)?,
        rejection_pct: row.get(2)?,
    })
}

/// 成本分析原始行（日期列尚未解析）
struct RawCostRow {
    row: CostInspectionRow,
    posting_date: Option<String>,
}

// ==========================================
// InspectionFilter - 检验记录查询条件
// ==========================================
#[derive(Debug, Clone, PartialEq)]
pub struct InspectionFilter {
    pub from: NaiveDate, // 过账日期起（含）
    pub to: NaiveDate,   // 过账日期止（含）
    pub item_code: Option<String>,
    pub inspector: Option<String>, // 检验员编码或姓名（子串）
    pub inspection_type: Option<InspectionType>,
}

impl InspectionFilter {
    pub fn between(from: NaiveDate, to: NaiveDate) -> Self {
        Self {
            from,
            to,
            item_code: None,
            inspector: None,
            inspection_type: None,
        }
    }
}

/// 检验记录原始行（日期列尚未解析）
struct RawRecordRow {
    product_code: Option<String>,
    lot_no: Option<String>,
    inspected_qty: f64,
    rejected_qty: f64,
    defect_details: String,
    posting_date: Option<String>,
    inspector_code: Option<String>,
    inspection_type: String,
    source_document_id: String,
}

/// 阶段检验原始行
struct RawStageRow {
    row: StageInspectionRow,
    posting_date: Option<String>,
    production_date: Option<String>,
    car_status: Option<String>,
}

// ==========================================
// InspectionRepository
// ==========================================
pub struct InspectionRepository {
    conn: Arc<Mutex<Connection>>,
}

impl InspectionRepository {
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

    // ==========================================
    // 汇总器输入
    // ==========================================

    /// 查询已提交的检验记录（普通检验单 + SPP 检验单）
    ///
    /// 缺陷明细拼接为 "标签:数量;标签:数量"，仅包含数量 > 0 的行
    pub fn find_records(&self, filter: &InspectionFilter) -> RepositoryResult<Vec<InspectionRecord>> {
        let conn = self.get_conn()?;

        let select_from = |table: &str, item_table: &str| {
            format!(
                r#"
                SELECT e.product_ref_no, e.lot_no,
                       e.total_inspected_qty_nos, e.total_rejected_qty,
                       COALESCE((
                           SELECT GROUP_CONCAT(COALESCE(i.type_of_defect, '') || ':' || i.rejected_qty, ';')
                           FROM {item_table} i
                           WHERE i.parent = e.name AND i.rejected_qty > 0
                       ), '') AS defect_details,
                       e.posting_date, e.inspector_code, e.inspector_name,
                       e.inspection_type, e.name
                FROM {table} e
                WHERE e.docstatus = 1
                "#,
                table = table,
                item_table = item_table
            )
        };

        let mut sql = format!(
            "SELECT * FROM ({} UNION ALL {}) r WHERE substr(r.posting_date, 1, 10) BETWEEN ? AND ?",
            select_from("inspection_entry", "inspection_entry_item"),
            select_from("spp_inspection_entry", "spp_inspection_entry_item"),
        );
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = vec![
            Box::new(filter.from.format("%Y-%m-%d").to_string()),
            Box::new(filter.to.format("%Y-%m-%d").to_string()),
        ];

        if let Some(item_code) = non_blank(&filter.item_code) {
            sql.push_str(" AND r.product_ref_no = ?");
            params.push(Box::new(item_code.to_string()));
        }
        if let Some(inspector) = non_blank(&filter.inspector) {
            sql.push_str(" AND (r.inspector_code LIKE ? OR r.inspector_name LIKE ?)");
            params.push(Box::new(like_pattern(inspector)));
            params.push(Box::new(like_pattern(inspector)));
        }
        if let Some(inspection_type) = &filter.inspection_type {
            sql.push_str(" AND r.inspection_type = ?");
            params.push(Box::new(inspection_type.as_erp_str().to_string()));
        }
        sql.push_str(" ORDER BY r.posting_date, r.name");

        let mut stmt = conn.prepare(&sql)?;
        let raw_rows = stmt
            .query_map(rusqlite::params_from_iter(params), |row| {
                Ok(RawRecordRow {
                    product_code: row.get(0)?,
                    lot_no: row.get(1)?,
                    inspected_qty: row.get(2)?,
                    rejected_qty: row.get(3)?,
                    defect_details: row.get(4)?,
                    posting_date: row.get(5)?,
                    inspector_code: row.get::<_, Option<String>>(6)?,
                    inspection_type: row.get(8)?,
                    source_document_id: row.get(9)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        raw_rows
            .into_iter()
            .map(|raw| {
                Ok(InspectionRecord {
                    product_code: raw.product_code,
                    lot_no: raw.lot_no,
                    inspected_qty: raw.inspected_qty,
                    rejected_qty: raw.rejected_qty,
                    rejection_cost: 0.0,
                    defect_details: raw.defect_details,
                    posting_date: parse_date_column("posting_date", raw.posting_date)?,
                    inspector_code: raw.inspector_code,
                    inspection_type: Some(InspectionType::parse(&raw.inspection_type)),
                    source_document_id: Some(raw.source_document_id),
                })
            })
            .collect()
    }

    // ==========================================
    // 阶段报表
    // ==========================================

    /// 查询某模压日期下某检验类型的检验单（关联生产记录 / 班次 / 未取消 CAR）
    ///
    /// # 参数
    /// - date: 模压日期
    /// - inspection_type: 检验类型（终检目视查 SPP 检验单）
    /// - filter: 附加筛选（班次精确匹配，其余子串匹配）
    pub fn find_stage_rows(
        &self,
        date: NaiveDate,
        inspection_type: &InspectionType,
        filter: &StageReportFilter,
    ) -> RepositoryResult<Vec<StageInspectionRow>> {
        let conn = self.get_conn()?;

        let table = entry_table(inspection_type);
        let lot_key = if inspection_type.uses_spp_entry() {
            base_lot_expr("e.lot_no")
        } else {
            "e.lot_no".to_string()
        };
        let lot_rej = if *inspection_type == InspectionType::Lot {
            pct_expr("e")
        } else {
            "COALESCE(lot_insp.avg_rej, 0)".to_string()
        };
        let stage_avg = |stage: &InspectionType| {
            format!(
                "SELECT lot_no, AVG({pct}) AS avg_rej FROM inspection_entry s \
                 WHERE s.inspection_type = '{stage}' AND s.docstatus = 1 GROUP BY lot_no",
                pct = pct_expr("s"),
                stage = stage.as_erp_str()
            )
        };

        let mut sql = format!(
            r#"
            SELECT DISTINCT
                e.name, e.inspection_type, e.lot_no, e.product_ref_no, e.posting_date,
                m.moulding_date,
                COALESCE(m.employee_name, e.operator_name),
                COALESCE(e.machine_no, jc.workstation),
                m.mould_reference, jc.shift_type, e.inspector_name,
                e.total_inspected_qty_nos, e.total_rejected_qty, e.total_rejected_qty_in_percentage,
                COALESCE(patrol.avg_rej, 0), COALESCE(line.avg_rej, 0), {lot_rej},
                car.name, car.status
            FROM {table} e
            JOIN moulding_production_entry m ON m.scan_lot_number = {lot_key}
            LEFT JOIN job_card jc ON jc.name = m.job_card
            LEFT JOIN corrective_action_report car
                ON car.inspection_entry = e.name AND car.docstatus != 2
            LEFT JOIN ({patrol}) patrol ON patrol.lot_no = {lot_key}
            LEFT JOIN ({line}) line ON line.lot_no = {lot_key}
            LEFT JOIN ({lot_insp}) lot_insp ON lot_insp.lot_no = {lot_key}
            WHERE e.docstatus = 1
              AND e.inspection_type = ?
              AND substr(m.moulding_date, 1, 10) = ?
            "#,
            lot_rej = lot_rej,
            table = table,
            lot_key = lot_key,
            patrol = stage_avg(&InspectionType::Patrol),
            line = stage_avg(&InspectionType::Line),
            lot_insp = stage_avg(&InspectionType::Lot),
        );
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = vec![
            Box::new(inspection_type.as_erp_str().to_string()),
            Box::new(date.format("%Y-%m-%d").to_string()),
        ];

        if let Some(operator) = non_blank(&filter.operator_name) {
            sql.push_str(" AND (m.employee_name LIKE ? OR e.operator_name LIKE ?)");
            params.push(Box::new(like_pattern(operator)));
            params.push(Box::new(like_pattern(operator)));
        }
        let like_filters = [
            ("e.machine_no", &filter.press_number),
            ("e.product_ref_no", &filter.item_code),
            ("m.mould_reference", &filter.mould_ref),
            ("e.lot_no", &filter.lot_no),
        ];
        for (column, value) in like_filters {
            if let Some(value) = non_blank(value) {
                sql.push_str(&format!(" AND {} LIKE ?", column));
                params.push(Box::new(like_pattern(value)));
            }
        }
        if let Some(shift) = non_blank(&filter.shift_type) {
            sql.push_str(" AND jc.shift_type = ?");
            params.push(Box::new(shift.to_string()));
        }
        sql.push_str(" ORDER BY e.lot_no DESC, e.name");

        let mut stmt = conn.prepare(&sql)?;
        let raw_rows = stmt
            .query_map(rusqlite::params_from_iter(params), Self::map_stage_row)?
            .collect::<Result<Vec<_>, _>>()?;

        let mut rows: Vec<StageInspectionRow> = Vec::with_capacity(raw_rows.len());
        let mut seen: HashSet<String> = HashSet::with_capacity(raw_rows.len());
        for raw in raw_rows {
            // 同一批号多条生产记录时只保留第一条
            if !seen.insert(raw.row.inspection_entry.clone()) {
                continue;
            }
            let mut row = raw.row;
            row.posting_date = parse_date_column("posting_date", raw.posting_date)?;
            row.production_date = parse_date_column("moulding_date", raw.production_date)?;
            row.car_status = raw.car_status.as_deref().and_then(CarStatus::parse);
            rows.push(row);
        }
        Ok(rows)
    }

    fn map_stage_row(row: &Row) -> rusqlite::Result<RawStageRow> {
        Ok(RawStageRow {
            row: StageInspectionRow {
                inspection_entry: row.get(0)?,
                inspection_type: InspectionType::parse(&row.get::<_, String>(1)?),
                lot_no: row.get(2)?,
                item_code: row.get(3)?,
                posting_date: None,
                production_date: None,
                operator_name: row.get(6)?,
                press_number: row.get(7)?,
                mould_ref: row.get(8)?,
                shift_type: row.get(9)?,
                inspector_name: row.get(10)?,
                inspected_qty: row.get(11)?,
                rejected_qty: row.get(12)?,
                stored_rejection_pct: row.get(13)?,
                patrol_rej_pct: row.get(14)?,
                line_rej_pct: row.get(15)?,
                lot_rej_pct: row.get(16)?,
                car_name: row.get(17)?,
                car_status: None,
            },
            posting_date: row.get(4)?,
            production_date: row.get(5)?,
            car_status: row.get(18)?,
        })
    }

    /// 某模压日期生产批次的某阶段平均拒收率（简单平均，无记录为 0）
    pub fn average_stage_rejection(
        &self,
        date: NaiveDate,
        inspection_type: &InspectionType,
    ) -> RepositoryResult<f64> {
        let conn = self.get_conn()?;
        let table = entry_table(inspection_type);
        let lot_key = if inspection_type.uses_spp_entry() {
            base_lot_expr("e.lot_no")
        } else {
            "e.lot_no".to_string()
        };
        let sql = format!(
            r#"
            SELECT AVG({pct}) FROM {table} e
            WHERE e.docstatus = 1
              AND e.inspection_type = ?1
              AND {lot_key} IN (
                  SELECT scan_lot_number FROM moulding_production_entry
                  WHERE substr(moulding_date, 1, 10) = ?2
              )
            "#,
            pct = pct_expr("e"),
            table = table,
            lot_key = lot_key
        );
        let avg: Option<f64> = conn.query_row(
            &sql,
            params![inspection_type.as_erp_str(), date.format("%Y-%m-%d").to_string()],
            |row| row.get(0),
        )?;
        Ok(avg.unwrap_or(0.0))
    }

    /// 待检批次数
    ///
    /// - 批检: 缺少批检、巡检、线检任一
    /// - 来料检验: 缺少来料检验
    /// - 终检目视: 缺少 SPP 终检（按主批号）
    /// - 其他类型: 0
    pub fn count_pending_lots(
        &self,
        date: NaiveDate,
        inspection_type: &InspectionType,
    ) -> RepositoryResult<usize> {
        let missing = |stage: &InspectionType| {
            if stage.uses_spp_entry() {
                format!(
                    "NOT EXISTS (SELECT 1 FROM spp_inspection_entry s WHERE {} = m.scan_lot_number \
                     AND s.inspection_type = '{}' AND s.docstatus = 1)",
                    base_lot_expr("s.lot_no"),
                    stage.as_erp_str()
                )
            } else {
                format!(
                    "NOT EXISTS (SELECT 1 FROM inspection_entry s WHERE s.lot_no = m.scan_lot_number \
                     AND s.inspection_type = '{}' AND s.docstatus = 1)",
                    stage.as_erp_str()
                )
            }
        };

        let condition = match inspection_type {
            InspectionType::Lot => format!(
                "({} OR {} OR {})",
                missing(&InspectionType::Lot),
                missing(&InspectionType::Patrol),
                missing(&InspectionType::Line)
            ),
            InspectionType::Incoming | InspectionType::FinalVisual => missing(inspection_type),
            _ => return Ok(0),
        };

        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT COUNT(DISTINCT m.scan_lot_number) FROM moulding_production_entry m \
             WHERE substr(m.moulding_date, 1, 10) = ?1 AND {}",
            condition
        );
        let count: i64 = conn.query_row(&sql, params![date.format("%Y-%m-%d").to_string()], |row| {
            row.get(0)
        })?;
        Ok(count.max(0) as usize)
    }

    // ==========================================
    // 单据明细
    // ==========================================

    /// 按单号查询检验单及缺陷行（先查普通检验单，再查 SPP 检验单）
    pub fn find_entry_with_items(&self, name: &str) -> RepositoryResult<Option<InspectionEntryDetail>> {
        let conn = self.get_conn()?;
        for (table, item_table, is_spp) in [
            ("inspection_entry", "inspection_entry_item", false),
            ("spp_inspection_entry", "spp_inspection_entry_item", true),
        ] {
            let header = conn
                .query_row(
                    &format!(
                        "SELECT name, inspection_type, lot_no, product_ref_no, inspector_name, \
                         machine_no, operator_name, total_inspected_qty_nos, total_rejected_qty, \
                         total_rejected_qty_in_percentage FROM {} WHERE name = ?1",
                        table
                    ),
                    params![name],
                    |row| {
                        Ok(InspectionEntryDetail {
                            name: row.get(0)?,
                            inspection_type: InspectionType::parse(&row.get::<_, String>(1)?),
                            lot_no: row.get(2)?,
                            product_ref_no: row.get(3)?,
                            inspector_name: row.get(4)?,
                            machine_no: row.get(5)?,
                            operator_name: row.get(6)?,
                            total_inspected_qty: row.get(7)?,
                            total_rejected_qty: row.get(8)?,
                            rejected_pct: row.get(9)?,
                            items: Vec::new(),
                            is_spp,
                        })
                    },
                )
                .optional()?;

            if let Some(mut entry) = header {
                let mut stmt = conn.prepare(&format!(
                    "SELECT COALESCE(type_of_defect, ''), rejected_qty FROM {} \
                     WHERE parent = ?1 ORDER BY idx, id",
                    item_table
                ))?;
                entry.items = stmt
                    .query_map(params![name], |row| {
                        Ok(EntryDefectLine {
                            defect_type: row.get(0)?,
                            rejected_qty: row.get(1)?,
                        })
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                return Ok(Some(entry));
            }
        }
        Ok(None)
    }

    // ==========================================
    // 图表
    // ==========================================

    /// 缺陷标签汇总: (标签, 出现次数, 拒收数)，过账日期区间内已提交的普通检验单
    pub fn defect_totals(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> RepositoryResult<Vec<(String, usize, f64)>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT i.type_of_defect, COUNT(*), SUM(i.rejected_qty)
            FROM inspection_entry_item i
            JOIN inspection_entry e ON e.name = i.parent
            WHERE e.docstatus = 1
              AND substr(e.posting_date, 1, 10) BETWEEN ?1 AND ?2
              AND i.type_of_defect IS NOT NULL
              AND trim(i.type_of_defect) != ''
            GROUP BY i.type_of_defect
            ORDER BY SUM(i.rejected_qty) DESC
            "#,
        )?;
        let rows = stmt
            .query_map(
                params![from.format("%Y-%m-%d").to_string(), to.format("%Y-%m-%d").to_string()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, i64>(1)?.max(0) as usize,
                        row.get::<_, Option<f64>>(2)?.unwrap_or(0.0),
                    ))
                },
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// 某过账日期某检验类型的平均拒收率（无记录为 0）
    pub fn average_rejection_by_posting_date(
        &self,
        inspection_type: &InspectionType,
        date: NaiveDate,
    ) -> RepositoryResult<f64> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT AVG({}) FROM {} e WHERE e.docstatus = 1 AND e.inspection_type = ?1 \
             AND substr(e.posting_date, 1, 10) = ?2",
            pct_expr("e"),
            entry_table(inspection_type)
        );
        let avg: Option<f64> = conn.query_row(
            &sql,
            params![inspection_type.as_erp_str(), date.format("%Y-%m-%d").to_string()],
            |row| row.get(0),
        )?;
        Ok(avg.unwrap_or(0.0))
    }

    // ==========================================
    // 趋势 / 绩效
    // ==========================================

    /// 按过账月份汇总各阶段平均拒收率（普通检验单，月份倒序）
    pub fn monthly_stage_averages(
        &self,
        from: NaiveDate,
        to: NaiveDate,
        stages: &[InspectionType],
    ) -> RepositoryResult<Vec<MonthlyStageAverage>> {
        if stages.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.get_conn()?;
        let sql = format!(
            r#"
            SELECT substr(e.posting_date, 1, 7) AS month, e.inspection_type, AVG({pct})
            FROM inspection_entry e
            WHERE e.docstatus = 1
              AND substr(e.posting_date, 1, 10) BETWEEN ?1 AND ?2
              AND e.inspection_type IN ({stages})
            GROUP BY month, e.inspection_type
            ORDER BY month DESC, e.inspection_type
            "#,
            pct = pct_expr("e"),
            stages = placeholders(3, stages.len())
        );
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(ymd(from)), Box::new(ymd(to))];
        params.extend(
            stages
                .iter()
                .map(|s| Box::new(s.as_erp_str().to_string()) as Box<dyn rusqlite::ToSql>),
        );

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(params), |row| {
                Ok(MonthlyStageAverage {
                    month: row.get(0)?,
                    inspection_type: InspectionType::parse(&row.get::<_, String>(1)?),
                    average_pct: row.get::<_, Option<f64>>(2)?.unwrap_or(0.0),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// 操作工绩效样本: 模压日期区间内生产、已做批检的批次
    ///
    /// 同一操作工同一检验单只出一行（同批多条生产记录不重复计）
    pub fn operator_lot_samples(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> RepositoryResult<Vec<PerformanceSample>> {
        let conn = self.get_conn()?;
        let sql = format!(
            r#"
            SELECT DISTINCT trim(m.employee_name), e.name, {pct}
            FROM moulding_production_entry m
            JOIN inspection_entry e ON e.lot_no = m.scan_lot_number
            WHERE m.docstatus = 1
              AND e.docstatus = 1
              AND e.inspection_type = ?1
              AND m.employee_name IS NOT NULL
              AND trim(m.employee_name) != ''
              AND substr(m.moulding_date, 1, 10) BETWEEN ?2 AND ?3
            ORDER BY 1, 2
            "#,
            pct = pct_expr("e")
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(
                params![InspectionType::Lot.as_erp_str(), ymd(from), ymd(to)],
                performance_sample,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// 机台绩效样本: 过账日期区间内带机台号的批检 / 巡检 / 线检
    pub fn machine_samples(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> RepositoryResult<Vec<PerformanceSample>> {
        let conn = self.get_conn()?;
        let sql = format!(
            r#"
            SELECT trim(e.machine_no), e.name, {pct}
            FROM inspection_entry e
            WHERE e.docstatus = 1
              AND e.inspection_type IN (?1, ?2, ?3)
              AND e.machine_no IS NOT NULL
              AND trim(e.machine_no) != ''
              AND substr(e.posting_date, 1, 10) BETWEEN ?4 AND ?5
            ORDER BY 1, 2
            "#,
            pct = pct_expr("e")
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(
                params![
                    InspectionType::Lot.as_erp_str(),
                    InspectionType::Patrol.as_erp_str(),
                    InspectionType::Line.as_erp_str(),
                    ymd(from),
                    ymd(to)
                ],
                performance_sample,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    // ==========================================
    // 成本分析
    // ==========================================

    /// 模压产出: 按模压日期 + 成品汇总模数、批次数、重量（日期倒序）
    pub fn moulding_output(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> RepositoryResult<Vec<MouldingOutputRow>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT substr(moulding_date, 1, 10) AS day, item_to_produce,
                   SUM(number_of_lifts), COUNT(DISTINCT scan_lot_number), SUM(weight)
            FROM moulding_production_entry
            WHERE docstatus = 1
              AND substr(moulding_date, 1, 10) BETWEEN ?1 AND ?2
            GROUP BY day, item_to_produce
            ORDER BY day DESC, item_to_produce
            "#,
        )?;
        let raw_rows = stmt
            .query_map(params![ymd(from), ymd(to)], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, Option<f64>>(2)?.unwrap_or(0.0),
                    row.get::<_, i64>(3)?.max(0) as usize,
                    row.get::<_, Option<f64>>(4)?.unwrap_or(0.0),
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        raw_rows
            .into_iter()
            .map(|(day, item_code, qty, lots, weight)| {
                let moulding_date = parse_date_column("moulding_date", Some(day.clone()))?
                    .ok_or_else(|| RepositoryError::FieldValueError {
                        field: "moulding_date".to_string(),
                        message: format!("空日期 ({})", day),
                    })?;
                Ok(MouldingOutputRow {
                    moulding_date,
                    item_code,
                    production_qty_nos: qty,
                    total_lots: lots,
                    total_weight_kg: weight,
                })
            })
            .collect()
    }

    /// 某检验类型在过账日期区间内的已提交检验单及缺陷行（过账日期倒序）
    ///
    /// 供应商只在普通检验单上登记，SPP 检验单为 None
    pub fn find_cost_rows(
        &self,
        inspection_type: &InspectionType,
        from: NaiveDate,
        to: NaiveDate,
    ) -> RepositoryResult<Vec<CostInspectionRow>> {
        let conn = self.get_conn()?;
        let table = entry_table(inspection_type);
        let item_table = format!("{}_item", table);
        let supplier = if inspection_type.uses_spp_entry() {
            "NULL"
        } else {
            "e.supplier"
        };
        let where_clause = "e.docstatus = 1 AND e.inspection_type = ?1 \
             AND substr(e.posting_date, 1, 10) BETWEEN ?2 AND ?3";
        let (from, to) = (ymd(from), ymd(to));
        let bind = params![inspection_type.as_erp_str(), from, to];

        let sql = format!(
            r#"
            SELECT e.name, e.posting_date, e.product_ref_no, e.lot_no, {supplier},
                   e.total_inspected_qty_nos, e.total_rejected_qty, {pct}
            FROM {table} e
            WHERE {where_clause}
            ORDER BY e.posting_date DESC, e.name
            "#,
            supplier = supplier,
            pct = pct_expr("e"),
            table = table,
            where_clause = where_clause
        );
        let mut stmt = conn.prepare(&sql)?;
        let raw_rows = stmt
            .query_map(bind, |row| {
                Ok(RawCostRow {
                    row: CostInspectionRow {
                        inspection_entry: row.get(0)?,
                        posting_date: None,
                        item_code: row.get(2)?,
                        lot_no: row.get(3)?,
                        supplier: row.get(4)?,
                        inspected_qty: row.get(5)?,
                        rejected_qty: row.get(6)?,
                        rejection_pct: row.get(7)?,
                        defects: Vec::new(),
                    },
                    posting_date: row.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let item_sql = format!(
            r#"
            SELECT i.parent, COALESCE(i.type_of_defect, ''), i.rejected_qty
            FROM {item_table} i
            JOIN {table} e ON e.name = i.parent
            WHERE {where_clause} AND i.rejected_qty > 0
            ORDER BY i.parent, i.idx, i.id
            "#,
            item_table = item_table,
            table = table,
            where_clause = where_clause
        );
        let mut stmt = conn.prepare(&item_sql)?;
        let mut defects: HashMap<String, Vec<EntryDefectLine>> = HashMap::new();
        let lines = stmt.query_map(bind, |row| {
            Ok((
                row.get::<_, String>(0)?,
                EntryDefectLine {
                    defect_type: row.get(1)?,
                    rejected_qty: row.get(2)?,
                },
            ))
        })?;
        for line in lines {
            let (parent, line) = line?;
            defects.entry(parent).or_default().push(line);
        }

        raw_rows
            .into_iter()
            .map(|raw| {
                let mut row = raw.row;
                row.posting_date = parse_date_column("posting_date", raw.posting_date)?;
                row.defects = defects.remove(&row.inspection_entry).unwrap_or_default();
                Ok(row)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{configure_sqlite_connection, init_schema};

    fn setup() -> (Arc<Mutex<Connection>>, InspectionRepository) {
        let conn = Connection::open_in_memory().unwrap();
        configure_sqlite_connection(&conn).unwrap();
        init_schema(&conn).unwrap();
        let conn = Arc::new(Mutex::new(conn));
        let repo = InspectionRepository::from_connection(conn.clone());
        (conn, repo)
    }

    fn insert_entry(
        conn: &Connection,
        table: &str,
        name: &str,
        inspection_type: &str,
        lot: &str,
        (inspected, rejected, pct): (f64, f64, f64),
        docstatus: i64,
    ) {
        conn.execute(
            &format!(
                "INSERT INTO {} (name, inspection_type, lot_no, product_ref_no, posting_date, \
                 inspector_code, inspector_name, total_inspected_qty_nos, total_rejected_qty, \
                 total_rejected_qty_in_percentage, docstatus) \
                 VALUES (?1, ?2, ?3, 'T5117', '2025-11-26', 'INS-01', 'Ravi', ?4, ?5, ?6, ?7)",
                table
            ),
            params![name, inspection_type, lot, inspected, rejected, pct, docstatus],
        )
        .unwrap();
    }

    fn insert_mpe(conn: &Connection, name: &str, lot: &str, date: &str) {
        conn.execute(
            "INSERT INTO moulding_production_entry (name, scan_lot_number, item_to_produce, \
             mould_reference, employee_name, moulding_date, docstatus) \
             VALUES (?1, ?2, 'T5117', 'MLD-A', 'Kumar', ?3, 1)",
            params![name, lot, date],
        )
        .unwrap();
    }

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_find_records_unions_both_tables_and_concats_defects() {
        let (conn, repo) = setup();
        {
            let c = conn.lock().unwrap();
            insert_entry(&c, "inspection_entry", "IE-1", "Lot Inspection", "25K26X01", (100.0, 7.0, 7.0), 1);
            insert_entry(&c, "inspection_entry", "IE-DRAFT", "Lot Inspection", "25K26X02", (100.0, 1.0, 1.0), 0);
            insert_entry(&c, "spp_inspection_entry", "SPP-1", "Final Visual Inspection", "25K26X01-2", (50.0, 2.0, 4.0), 1);
            c.execute(
                "INSERT INTO inspection_entry_item (parent, idx, type_of_defect, rejected_qty) VALUES \
                 ('IE-1', 1, 'Bend', 5), ('IE-1', 2, 'Blister', 2), ('IE-1', 3, 'Flash', 0)",
                [],
            )
            .unwrap();
        }

        let records = repo
            .find_records(&InspectionFilter::between(d("2025-11-26"), d("2025-11-26")))
            .unwrap();
        assert_eq!(records.len(), 2);

        let ie = records.iter().find(|r| r.source_document_id.as_deref() == Some("IE-1")).unwrap();
        assert!(ie.defect_details.contains("Bend:5"));
        assert!(ie.defect_details.contains("Blister:2"));
        assert!(!ie.defect_details.contains("Flash"));
        assert_eq!(ie.posting_date, Some(d("2025-11-26")));

        let spp = records.iter().find(|r| r.source_document_id.as_deref() == Some("SPP-1")).unwrap();
        assert_eq!(spp.inspection_type, Some(InspectionType::FinalVisual));
        assert_eq!(spp.defect_details, "");
    }

    #[test]
    fn test_find_records_filters() {
        let (conn, repo) = setup();
        {
            let c = conn.lock().unwrap();
            insert_entry(&c, "inspection_entry", "IE-1", "Lot Inspection", "L1", (100.0, 7.0, 7.0), 1);
            insert_entry(&c, "inspection_entry", "IE-2", "Patrol Inspection", "L1", (100.0, 1.0, 1.0), 1);
        }
        let mut filter = InspectionFilter::between(d("2025-11-01"), d("2025-11-30"));
        filter.inspection_type = Some(InspectionType::Patrol);
        filter.inspector = Some("avi".to_string());
        let records = repo.find_records(&filter).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].source_document_id.as_deref(), Some("IE-2"));

        let empty = repo
            .find_records(&InspectionFilter::between(d("2025-12-01"), d("2025-12-31")))
            .unwrap();
        assert!(empty.is_empty());
    }

    #[test]
    fn test_stage_rows_join_production_and_stage_averages() {
        let (conn, repo) = setup();
        {
            let c = conn.lock().unwrap();
            insert_mpe(&c, "MPE-1", "25K26X01", "2025-11-26");
            insert_entry(&c, "inspection_entry", "IE-LOT", "Lot Inspection", "25K26X01", (200.0, 10.0, 0.0), 1);
            insert_entry(&c, "inspection_entry", "IE-P1", "Patrol Inspection", "25K26X01", (100.0, 2.0, 2.0), 1);
            insert_entry(&c, "inspection_entry", "IE-P2", "Patrol Inspection", "25K26X01", (100.0, 4.0, 4.0), 1);
            insert_entry(&c, "spp_inspection_entry", "SPP-1", "Final Visual Inspection", "25K26X01-3", (80.0, 4.0, 5.0), 1);
        }

        let rows = repo
            .find_stage_rows(d("2025-11-26"), &InspectionType::Lot, &StageReportFilter::default())
            .unwrap();
        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert_eq!(row.inspection_entry, "IE-LOT");
        assert_eq!(row.operator_name.as_deref(), Some("Kumar"));
        assert_eq!(row.production_date, Some(d("2025-11-26")));
        assert!((row.patrol_rej_pct - 3.0).abs() < 1e-9);
        assert_eq!(row.line_rej_pct, 0.0);
        assert!((row.lot_rej_pct - 5.0).abs() < 1e-9);

        let fvi = repo
            .find_stage_rows(d("2025-11-26"), &InspectionType::FinalVisual, &StageReportFilter::default())
            .unwrap();
        assert_eq!(fvi.len(), 1);
        assert_eq!(fvi[0].lot_no.as_deref(), Some("25K26X01-3"));
        assert!((fvi[0].lot_rej_pct - 5.0).abs() < 1e-9);

        let other_day = repo
            .find_stage_rows(d("2025-11-27"), &InspectionType::Lot, &StageReportFilter::default())
            .unwrap();
        assert!(other_day.is_empty());
    }

    #[test]
    fn test_stage_rows_one_per_entry_when_lot_produced_twice() {
        let (conn, repo) = setup();
        {
            let c = conn.lock().unwrap();
            insert_mpe(&c, "MPE-1", "25K26X01", "2025-11-26");
            // 同批号第二条生产记录（操作工不同，DISTINCT 合并不掉）
            c.execute(
                "INSERT INTO moulding_production_entry (name, scan_lot_number, item_to_produce, \
                 mould_reference, employee_name, moulding_date, docstatus) \
                 VALUES ('MPE-2', '25K26X01', 'T5117', 'MLD-B', 'Suresh', '2025-11-26', 1)",
                [],
            )
            .unwrap();
            insert_entry(&c, "inspection_entry", "IE-1", "Lot Inspection", "25K26X01", (100.0, 4.0, 4.0), 1);
            insert_entry(&c, "inspection_entry", "IE-2", "Lot Inspection", "25K26X01", (100.0, 6.0, 6.0), 1);
        }
        let rows = repo
            .find_stage_rows(d("2025-11-26"), &InspectionType::Lot, &StageReportFilter::default())
            .unwrap();
        let names: Vec<_> = rows.iter().map(|r| r.inspection_entry.as_str()).collect();
        assert_eq!(names, vec!["IE-1", "IE-2"]);
    }

    #[test]
    fn test_stage_rows_substring_filters() {
        let (conn, repo) = setup();
        {
            let c = conn.lock().unwrap();
            insert_mpe(&c, "MPE-1", "25K26X01", "2025-11-26");
            insert_mpe(&c, "MPE-2", "25K26Y07", "2025-11-26");
            insert_entry(&c, "inspection_entry", "IE-1", "Lot Inspection", "25K26X01", (100.0, 1.0, 1.0), 1);
            insert_entry(&c, "inspection_entry", "IE-2", "Lot Inspection", "25K26Y07", (100.0, 9.0, 9.0), 1);
        }
        let filter = StageReportFilter {
            lot_no: Some("Y0".to_string()),
            ..Default::default()
        };
        let rows = repo
            .find_stage_rows(d("2025-11-26"), &InspectionType::Lot, &filter)
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].inspection_entry, "IE-2");
    }

    #[test]
    fn test_pending_lots_and_averages() {
        let (conn, repo) = setup();
        {
            let c = conn.lock().unwrap();
            insert_mpe(&c, "MPE-1", "L1", "2025-11-26");
            insert_mpe(&c, "MPE-2", "L2", "2025-11-26");
            for (name, ty, pct) in [
                ("IE-1", "Lot Inspection", 4.0),
                ("IE-2", "Patrol Inspection", 2.0),
                ("IE-3", "Line Inspection", 6.0),
            ] {
                insert_entry(&c, "inspection_entry", name, ty, "L1", (100.0, pct, pct), 1);
            }
            insert_entry(&c, "spp_inspection_entry", "SPP-1", "Final Visual Inspection", "L2-1", (10.0, 0.0, 0.0), 1);
        }
        let date = d("2025-11-26");
        assert_eq!(repo.count_pending_lots(date, &InspectionType::Lot).unwrap(), 1);
        assert_eq!(repo.count_pending_lots(date, &InspectionType::Incoming).unwrap(), 2);
        assert_eq!(repo.count_pending_lots(date, &InspectionType::FinalVisual).unwrap(), 1);
        assert_eq!(repo.count_pending_lots(date, &InspectionType::Patrol).unwrap(), 0);

        assert_eq!(repo.average_stage_rejection(date, &InspectionType::Line).unwrap(), 6.0);
        assert_eq!(repo.average_stage_rejection(date, &InspectionType::Incoming).unwrap(), 0.0);
        assert_eq!(
            repo.average_rejection_by_posting_date(&InspectionType::Patrol, date).unwrap(),
            2.0
        );
    }

    #[test]
    fn test_find_entry_with_items_falls_back_to_spp() {
        let (conn, repo) = setup();
        {
            let c = conn.lock().unwrap();
            insert_entry(&c, "spp_inspection_entry", "SPP-9", "Final Visual Inspection", "L9-2", (40.0, 4.0, 10.0), 1);
            c.execute(
                "INSERT INTO spp_inspection_entry_item (parent, idx, type_of_defect, rejected_qty) \
                 VALUES ('SPP-9', 1, 'Cut Mark', 4)",
                [],
            )
            .unwrap();
        }
        let entry = repo.find_entry_with_items("SPP-9").unwrap().unwrap();
        assert!(entry.is_spp);
        assert_eq!(entry.items.len(), 1);
        assert_eq!(entry.items[0].defect_type, "Cut Mark");
        assert!(repo.find_entry_with_items("NOPE").unwrap().is_none());
    }

    #[test]
    fn test_defect_totals_groups_labels() {
        let (conn, repo) = setup();
        {
            let c = conn.lock().unwrap();
            insert_entry(&c, "inspection_entry", "IE-1", "Lot Inspection", "L1", (100.0, 7.0, 7.0), 1);
            insert_entry(&c, "inspection_entry", "IE-2", "Lot Inspection", "L2", (100.0, 3.0, 3.0), 1);
            c.execute(
                "INSERT INTO inspection_entry_item (parent, idx, type_of_defect, rejected_qty) VALUES \
                 ('IE-1', 1, 'Bend', 5), ('IE-1', 2, 'Blister', 2), ('IE-2', 1, 'Bend', 3), ('IE-2', 2, '', 1)",
                [],
            )
            .unwrap();
        }
        let totals = repo.defect_totals(d("2025-11-01"), d("2025-11-30")).unwrap();
        assert_eq!(totals.len(), 2);
        assert_eq!(totals[0], ("Bend".to_string(), 2, 8.0));
    }

    fn insert_dated(conn: &Connection, name: &str, inspection_type: &str, date: &str, machine: Option<&str>, pct: f64) {
        conn.execute(
            "INSERT INTO inspection_entry (name, inspection_type, lot_no, product_ref_no, posting_date, \
             machine_no, total_inspected_qty_nos, total_rejected_qty, total_rejected_qty_in_percentage, docstatus) \
             VALUES (?1, ?2, 'L1', 'T5117', ?3, ?4, 100, ?5, ?5, 1)",
            params![name, inspection_type, date, machine, pct],
        )
        .unwrap();
    }

    #[test]
    fn test_monthly_stage_averages_grouped_by_month() {
        let (conn, repo) = setup();
        {
            let c = conn.lock().unwrap();
            insert_dated(&c, "IE-1", "Patrol Inspection", "2025-10-03", None, 2.0);
            insert_dated(&c, "IE-2", "Patrol Inspection", "2025-10-20", None, 4.0);
            insert_dated(&c, "IE-3", "Lot Inspection", "2025-11-26 10:15:00", None, 6.0);
            insert_dated(&c, "IE-4", "Lot Inspection", "2025-08-01", None, 9.0);
        }
        let rows = repo
            .monthly_stage_averages(
                d("2025-09-01"),
                d("2025-11-30"),
                &[InspectionType::Patrol, InspectionType::Lot],
            )
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].month, "2025-11");
        assert_eq!(rows[0].inspection_type, InspectionType::Lot);
        assert_eq!(rows[1].month, "2025-10");
        assert!((rows[1].average_pct - 3.0).abs() < 1e-9);

        assert!(repo.monthly_stage_averages(d("2025-09-01"), d("2025-11-30"), &[]).unwrap().is_empty());
    }

    #[test]
    fn test_performance_samples() {
        let (conn, repo) = setup();
        {
            let c = conn.lock().unwrap();
            insert_mpe(&c, "MPE-1", "L1", "2025-11-26");
            insert_mpe(&c, "MPE-OLD", "L1", "2025-09-01");
            insert_dated(&c, "IE-1", "Lot Inspection", "2025-11-26", Some(" P-07 "), 8.0);
            insert_dated(&c, "IE-2", "Patrol Inspection", "2025-11-26", Some("P-07"), 2.0);
            insert_dated(&c, "IE-3", "Incoming Inspection", "2025-11-26", Some("P-07"), 5.0);
            insert_dated(&c, "IE-4", "Line Inspection", "2025-11-26", Some(""), 1.0);
        }
        let operators = repo.operator_lot_samples(d("2025-11-01"), d("2025-11-30")).unwrap();
        assert_eq!(
            operators,
            vec![PerformanceSample {
                key: "Kumar".to_string(),
                inspection_entry: "IE-1".to_string(),
                rejection_pct: 8.0,
            }]
        );

        let machines = repo.machine_samples(d("2025-11-01"), d("2025-11-30")).unwrap();
        let entries: Vec<_> = machines.iter().map(|m| (m.key.as_str(), m.inspection_entry.as_str())).collect();
        assert_eq!(entries, vec![("P-07", "IE-1"), ("P-07", "IE-2")]);
    }

    #[test]
    fn test_moulding_output_and_cost_rows() {
        let (conn, repo) = setup();
        {
            let c = conn.lock().unwrap();
            c.execute_batch(
                "INSERT INTO moulding_production_entry (name, scan_lot_number, item_to_produce, moulding_date, \
                 number_of_lifts, weight, docstatus) VALUES \
                 ('MPE-1', 'L1', 'T5117', '2025-11-26', 100, 2.5, 1), \
                 ('MPE-2', 'L2', 'T5117', '2025-11-26', 50, 1.5, 1), \
                 ('MPE-3', 'L3', 'T5117', '2025-11-26', 70, 1.0, 0);",
            )
            .unwrap();
            c.execute(
                "INSERT INTO inspection_entry (name, inspection_type, lot_no, product_ref_no, posting_date, supplier, \
                 total_inspected_qty_nos, total_rejected_qty, total_rejected_qty_in_percentage, docstatus) \
                 VALUES ('IE-INC', 'Incoming Inspection', 'L1', 'T5117', '2025-11-26', 'ACME', 150, 9, 6, 1)",
                [],
            )
            .unwrap();
            c.execute(
                "INSERT INTO inspection_entry_item (parent, idx, type_of_defect, rejected_qty) VALUES \
                 ('IE-INC', 1, 'Cut Mark', 5), ('IE-INC', 2, 'RBS', 4), ('IE-INC', 3, 'Flash', 0)",
                [],
            )
            .unwrap();
            insert_entry(&c, "spp_inspection_entry", "SPP-1", "Final Visual Inspection", "L1-1", (80.0, 4.0, 5.0), 1);
        }
        let output = repo.moulding_output(d("2025-11-01"), d("2025-11-30")).unwrap();
        assert_eq!(output.len(), 1);
        assert_eq!(output[0].moulding_date, d("2025-11-26"));
        assert_eq!(output[0].production_qty_nos, 150.0);
        assert_eq!(output[0].total_lots, 2);
        assert_eq!(output[0].total_weight_kg, 4.0);

        let incoming = repo
            .find_cost_rows(&InspectionType::Incoming, d("2025-11-01"), d("2025-11-30"))
            .unwrap();
        assert_eq!(incoming.len(), 1);
        assert_eq!(incoming[0].supplier.as_deref(), Some("ACME"));
        assert_eq!(incoming[0].defects.len(), 2);
        assert_eq!(incoming[0].defects[0].defect_type, "Cut Mark");

        let fvi = repo
            .find_cost_rows(&InspectionType::FinalVisual, d("2025-11-01"), d("2025-11-30"))
            .unwrap();
        assert_eq!(fvi.len(), 1);
        assert_eq!(fvi[0].supplier, None);
        assert!(fvi[0].defects.is_empty());
        assert_eq!(fvi[0].posting_date, Some(d("2025-11-26")));
    }
}
