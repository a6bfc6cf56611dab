// ==========================================
// 模压质量拒收分析 - 物料单价仓储
// ==========================================
// 职责: item_price 表（计价编码 → 单价）
// 实现 PriceSource，作为拒收成本的本地取价来源
// ==========================================

use crate::db::open_sqlite_connection;
use crate::engine::pricing::{PriceSource, PriceSourceError};
use crate::repository::error::{RepositoryError, RepositoryResult};
use async_trait::async_trait;
use rusqlite::{params, Connection};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

pub struct ItemPriceRepository {
    conn: Arc<Mutex<Connection>>,
}

impl ItemPriceRepository {
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

    /// 新增或更新单价
    pub fn upsert_price(&self, item_code: &str, rate: f64, currency: Option<&str>) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT INTO item_price (item_code, price_list_rate, currency, updated_at)
            VALUES (?1, ?2, ?3, datetime('now'))
            ON CONFLICT(item_code) DO UPDATE SET
                price_list_rate = excluded.price_list_rate,
                currency = excluded.currency,
                updated_at = excluded.updated_at
            "#,
            params![item_code, rate, currency],
        )?;
        Ok(())
    }

    /// 批量查询单价（分批拼 IN 子句）
    pub fn find_prices(&self, item_codes: &[String]) -> RepositoryResult<HashMap<String, f64>> {
        const BATCH: usize = 500;

        let conn = self.get_conn()?;
        let mut prices = HashMap::with_capacity(item_codes.len());
        for chunk in item_codes.chunks(BATCH) {
            let placeholders = vec!["?"; chunk.len()].join(", ");
            let sql = format!(
                "SELECT item_code, price_list_rate FROM item_price WHERE item_code IN ({})",
                placeholders
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(rusqlite::params_from_iter(chunk.iter()), |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?))
            })?;
            for row in rows {
                let (code, rate) = row?;
                prices.insert(code, rate);
            }
        }
        Ok(prices)
    }
}

#[async_trait]
impl PriceSource for ItemPriceRepository {
    async fn fetch_prices(
        &self,
        pricing_codes: &[String],
    ) -> Result<HashMap<String, f64>, PriceSourceError> {
        Ok(self.find_prices(pricing_codes)?)
    }
}
