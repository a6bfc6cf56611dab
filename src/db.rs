// ==========================================
// 模压质量拒收分析 - SQLite 连接初始化与建表
// ==========================================
// 目标:
// - 统一所有 Connection::open 的 PRAGMA 行为（外键 + busy_timeout）
// - init_schema 幂等建表: ERP 单据表 + 本模块业务表 + config_kv
// ==========================================

use rusqlite::Connection;
use rusqlite::OptionalExtension;
use std::time::Duration;
use tracing::{info, warn};

/// 默认 busy_timeout（毫秒）
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// 当前代码所期望的 schema_version
pub const CURRENT_SCHEMA_VERSION: i64 = 1;

/// 配置 SQLite 连接的统一 PRAGMA
///
/// 说明：foreign_keys 与 busy_timeout 都需要"每个连接"单独配置
pub fn configure_sqlite_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.busy_timeout(Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS))?;
    Ok(())
}

/// 打开 SQLite 连接并应用统一配置
pub fn open_sqlite_connection(db_path: &str) -> rusqlite::Result<Connection> {
    let conn = Connection::open(db_path)?;
    configure_sqlite_connection(&conn)?;
    Ok(conn)
}

/// 读取 schema_version（若表不存在则返回 None）
pub fn read_schema_version(conn: &Connection) -> rusqlite::Result<Option<i64>> {
    let has_table: bool = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version' LIMIT 1",
            [],
            |_row| Ok(true),
        )
        .optional()?
        .unwrap_or(false);

    if !has_table {
        return Ok(None);
    }

    let v: Option<i64> = conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))?;
    Ok(v)
}

/// 幂等建表
///
/// 已存在的库版本高于当前代码期望时只告警，不做迁移
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;
    add_missing_columns(conn)?;

    match read_schema_version(conn)? {
        None => {
            conn.execute(
                "INSERT INTO schema_version (version) VALUES (?1)",
                [CURRENT_SCHEMA_VERSION],
            )?;
            info!(version = CURRENT_SCHEMA_VERSION, "数据库结构初始化完成");
        }
        Some(v) if v > CURRENT_SCHEMA_VERSION => {
            warn!(db_version = v, code_version = CURRENT_SCHEMA_VERSION, "数据库版本高于程序期望");
        }
        Some(_) => {}
    }
    Ok(())
}

/// 后续加入的 ERP 列: (表, 列, 列定义)
const ADDED_COLUMNS: [(&str, &str, &str); 3] = [
    ("moulding_production_entry", "number_of_lifts", "REAL NOT NULL DEFAULT 0"),
    ("moulding_production_entry", "weight", "REAL NOT NULL DEFAULT 0"),
    ("inspection_entry", "supplier", "TEXT"),
];

/// 早期建出的库缺少 ADDED_COLUMNS 时补列（已有则跳过）
fn add_missing_columns(conn: &Connection) -> rusqlite::Result<()> {
    for (table, column, definition) in ADDED_COLUMNS {
        let exists: bool = conn
            .query_row(
                &format!("SELECT 1 FROM pragma_table_info('{}') WHERE name = ?1", table),
                [column],
                |_row| Ok(true),
            )
            .optional()?
            .unwrap_or(false);
        if !exists {
            conn.execute_batch(&format!(
                "ALTER TABLE {} ADD COLUMN {} {};",
                table, column, definition
            ))?;
            info!(table, column, "补充缺失列");
        }
    }
    Ok(())
}

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS config_kv (
    scope_id TEXT NOT NULL,
    key TEXT NOT NULL,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (scope_id, key)
);

-- ===== ERP 单据（只读来源） =====

CREATE TABLE IF NOT EXISTS job_card (
    name TEXT PRIMARY KEY,
    shift_type TEXT,
    workstation TEXT,
    batch_no TEXT,
    posting_date TEXT
);

CREATE TABLE IF NOT EXISTS moulding_production_entry (
    name TEXT PRIMARY KEY,
    scan_lot_number TEXT NOT NULL,
    item_to_produce TEXT,
    mould_reference TEXT,
    employee_name TEXT,
    moulding_date TEXT NOT NULL,
    job_card TEXT,
    number_of_lifts REAL NOT NULL DEFAULT 0,
    weight REAL NOT NULL DEFAULT 0,
    docstatus INTEGER NOT NULL DEFAULT 1
);

CREATE TABLE IF NOT EXISTS inspection_entry (
    name TEXT PRIMARY KEY,
    inspection_type TEXT NOT NULL,
    lot_no TEXT,
    product_ref_no TEXT,
    posting_date TEXT,
    inspector_code TEXT,
    inspector_name TEXT,
    machine_no TEXT,
    operator_name TEXT,
    supplier TEXT,
    total_inspected_qty_nos REAL NOT NULL DEFAULT 0,
    total_rejected_qty REAL NOT NULL DEFAULT 0,
    total_rejected_qty_in_percentage REAL NOT NULL DEFAULT 0,
    docstatus INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS inspection_entry_item (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    parent TEXT NOT NULL REFERENCES inspection_entry(name) ON DELETE CASCADE,
    idx INTEGER NOT NULL DEFAULT 0,
    type_of_defect TEXT,
    rejected_qty REAL NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS spp_inspection_entry (
    name TEXT PRIMARY KEY,
    inspection_type TEXT NOT NULL,
    lot_no TEXT,
    product_ref_no TEXT,
    posting_date TEXT,
    inspector_code TEXT,
    inspector_name TEXT,
    machine_no TEXT,
    operator_name TEXT,
    warehouse TEXT,
    stage TEXT,
    total_inspected_qty_nos REAL NOT NULL DEFAULT 0,
    total_rejected_qty REAL NOT NULL DEFAULT 0,
    total_rejected_qty_in_percentage REAL NOT NULL DEFAULT 0,
    docstatus INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS spp_inspection_entry_item (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    parent TEXT NOT NULL REFERENCES spp_inspection_entry(name) ON DELETE CASCADE,
    idx INTEGER NOT NULL DEFAULT 0,
    type_of_defect TEXT,
    rejected_qty REAL NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS item_price (
    item_code TEXT PRIMARY KEY,
    price_list_rate REAL NOT NULL,
    currency TEXT,
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- ===== 本模块业务表 =====

CREATE TABLE IF NOT EXISTS rejection_threshold_configuration (
    name TEXT PRIMARY KEY,
    inspection_type TEXT NOT NULL,
    product_ref_no TEXT,
    item_group TEXT,
    threshold_percentage REAL NOT NULL,
    warning_threshold REAL,
    critical_threshold REAL,
    is_active INTEGER NOT NULL DEFAULT 1
);

CREATE TABLE IF NOT EXISTS corrective_action_report (
    name TEXT PRIMARY KEY,
    car_date TEXT NOT NULL,
    inspection_entry TEXT NOT NULL,
    lot_no TEXT,
    product_ref_no TEXT,
    rejection_percentage REAL NOT NULL DEFAULT 0,
    problem_description TEXT,
    cause_for_non_detection TEXT,
    cause_for_occurrence TEXT,
    corrective_action TEXT,
    preventive_measures TEXT,
    remarks TEXT,
    assigned_to TEXT,
    target_date TEXT,
    status TEXT NOT NULL DEFAULT 'Open',
    docstatus INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS car_five_why (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    parent TEXT NOT NULL REFERENCES corrective_action_report(name) ON DELETE CASCADE,
    idx INTEGER NOT NULL,
    why_question TEXT NOT NULL,
    answer TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS daily_rejection_report (
    name TEXT PRIMARY KEY,
    report_date TEXT NOT NULL UNIQUE,
    threshold_percentage REAL NOT NULL,
    status TEXT NOT NULL DEFAULT 'Draft',
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS daily_report_section (
    parent TEXT NOT NULL REFERENCES daily_rejection_report(name) ON DELETE CASCADE,
    section TEXT NOT NULL,
    total_inspections INTEGER NOT NULL DEFAULT 0,
    avg_rejection REAL NOT NULL DEFAULT 0,
    exceeding_threshold INTEGER NOT NULL DEFAULT 0,
    patrol_avg REAL NOT NULL DEFAULT 0,
    line_avg REAL NOT NULL DEFAULT 0,
    lot_avg REAL NOT NULL DEFAULT 0,
    total_rejection_cost REAL NOT NULL DEFAULT 0,
    PRIMARY KEY (parent, section)
);

CREATE TABLE IF NOT EXISTS daily_report_item (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    parent TEXT NOT NULL REFERENCES daily_rejection_report(name) ON DELETE CASCADE,
    section TEXT NOT NULL,
    inspection_entry TEXT NOT NULL,
    lot_no TEXT,
    item_code TEXT,
    inspected_qty REAL NOT NULL DEFAULT 0,
    rejected_qty REAL NOT NULL DEFAULT 0,
    rejection_pct REAL NOT NULL DEFAULT 0,
    patrol_rej_pct REAL NOT NULL DEFAULT 0,
    line_rej_pct REAL NOT NULL DEFAULT 0,
    lot_rej_pct REAL NOT NULL DEFAULT 0,
    exceeds_threshold INTEGER NOT NULL DEFAULT 0,
    unit_cost REAL NOT NULL DEFAULT 0,
    rejection_cost REAL NOT NULL DEFAULT 0,
    car_reference TEXT,
    car_status TEXT
);

-- ===== 索引 =====

CREATE INDEX IF NOT EXISTS idx_mpe_lot ON moulding_production_entry(scan_lot_number);
CREATE INDEX IF NOT EXISTS idx_mpe_date ON moulding_production_entry(moulding_date);
CREATE INDEX IF NOT EXISTS idx_ie_lot_type ON inspection_entry(lot_no, inspection_type, docstatus);
CREATE INDEX IF NOT EXISTS idx_ie_posting ON inspection_entry(posting_date);
CREATE INDEX IF NOT EXISTS idx_ie_item_parent ON inspection_entry_item(parent);
CREATE INDEX IF NOT EXISTS idx_spp_lot_type ON spp_inspection_entry(lot_no, inspection_type, docstatus);
CREATE INDEX IF NOT EXISTS idx_spp_posting ON spp_inspection_entry(posting_date);
CREATE INDEX IF NOT EXISTS idx_spp_item_parent ON spp_inspection_entry_item(parent);
CREATE INDEX IF NOT EXISTS idx_car_entry ON corrective_action_report(inspection_entry, docstatus);
-- 每张检验单最多一张未取消的 CAR (docstatus 2 = 已取消)
CREATE UNIQUE INDEX IF NOT EXISTS uq_car_active_entry
    ON corrective_action_report(inspection_entry) WHERE docstatus != 2;
CREATE INDEX IF NOT EXISTS idx_why_parent ON car_five_why(parent);
CREATE INDEX IF NOT EXISTS idx_dri_parent ON daily_report_item(parent);
CREATE INDEX IF NOT EXISTS idx_dri_entry ON daily_report_item(inspection_entry);
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        configure_sqlite_connection(&conn).unwrap();

        init_schema(&conn).unwrap();
        init_schema(&conn).unwrap();

        assert_eq!(read_schema_version(&conn).unwrap(), Some(CURRENT_SCHEMA_VERSION));
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM schema_version", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_init_schema_adds_columns_to_older_tables() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE moulding_production_entry (name TEXT PRIMARY KEY, scan_lot_number TEXT NOT NULL, \
             item_to_produce TEXT, mould_reference TEXT, employee_name TEXT, moulding_date TEXT NOT NULL, \
             job_card TEXT, docstatus INTEGER NOT NULL DEFAULT 1);",
        )
        .unwrap();
        init_schema(&conn).unwrap();
        init_schema(&conn).unwrap();

        conn.execute(
            "INSERT INTO moulding_production_entry (name, scan_lot_number, moulding_date, number_of_lifts, weight) \
             VALUES ('MPE-1', 'L1', '2025-11-26', 120, 3.5)",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO inspection_entry (name, inspection_type, supplier) VALUES ('IE-1', 'Incoming Inspection', 'ACME')",
            [],
        )
        .unwrap();
    }

    #[test]
    fn test_schema_version_absent_before_init() {
        let conn = Connection::open_in_memory().unwrap();
        assert_eq!(read_schema_version(&conn).unwrap(), None);
    }
}
