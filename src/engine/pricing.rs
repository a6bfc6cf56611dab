// ==========================================
// 模压质量拒收分析 - 拒收成本计算
// ==========================================
// 职责: 成品编码 → 计价编码映射 + 批量取价 + 拒收成本回填
// 规则: T 开头的成品编码按 F 开头的编码取价（如 T5117 → F5117）
// 红线: 取价失败不影响报表，成本保持 0 并记录告警
// ==========================================

use crate::domain::inspection::InspectionRecord;
use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::error::Error;
use tracing::{debug, instrument, warn};

pub type PriceSourceError = Box<dyn Error + Send + Sync>;

// ==========================================
// PriceSource - 单价来源
// ==========================================
// 本地实现: repository::ItemPriceRepository（item_price 表）
#[async_trait]
pub trait PriceSource: Send + Sync {
    /// 批量获取单价
    ///
    /// # 参数
    /// - pricing_codes: 计价编码（已去重）
    ///
    /// # 返回
    /// - 计价编码 → 单价；无价格的编码不出现在结果中
    async fn fetch_prices(
        &self,
        pricing_codes: &[String],
    ) -> Result<HashMap<String, f64>, PriceSourceError>;
}

// ==========================================
// PricingCodeMapper - 计价编码映射
// ==========================================
#[derive(Debug, Clone, PartialEq)]
pub struct PricingCodeMapper {
    source_prefix: String,
    target_prefix: String,
}

impl Default for PricingCodeMapper {
    fn default() -> Self {
        Self::new("T", "F")
    }
}

impl PricingCodeMapper {
    pub fn new(source_prefix: &str, target_prefix: &str) -> Self {
        Self {
            source_prefix: source_prefix.to_uppercase(),
            target_prefix: target_prefix.to_string(),
        }
    }

    /// 成品编码 → 计价编码
    ///
    /// 1. 去首尾空白，去掉所有 "t." / "T."
    /// 2. 取第一个空白分隔的片段
    /// 3. 以源前缀开头（大小写不敏感）时替换为目标前缀，否则无价格
    pub fn map(&self, item_code: &str) -> Option<String> {
        let cleaned = item_code.trim().replace("t.", "").replace("T.", "");
        let token = cleaned.split_whitespace().next()?;

        let prefix_len = self.source_prefix.len();
        let head = token.get(..prefix_len)?;
        if prefix_len == 0 || head.to_uppercase() != self.source_prefix {
            return None;
        }
        Some(format!("{}{}", self.target_prefix, &token[prefix_len..]))
    }
}

// ==========================================
// CostCalculator - 拒收成本计算器
// ==========================================
#[derive(Debug, Clone, Default)]
pub struct CostCalculator {
    mapper: PricingCodeMapper,
}

impl CostCalculator {
    pub fn new(mapper: PricingCodeMapper) -> Self {
        Self { mapper }
    }

    pub fn mapper(&self) -> &PricingCodeMapper {
        &self.mapper
    }

    /// 批量解析单价
    ///
    /// # 返回
    /// - 原始成品编码 → 单价；无映射或无价格时为 0
    /// - 取价失败时全部为 0
    #[instrument(skip(self, item_codes, source))]
    pub async fn unit_costs<'a, I, S>(&self, item_codes: I, source: &S) -> HashMap<String, f64>
    where
        I: IntoIterator<Item = &'a str>,
        S: PriceSource + ?Sized,
    {
        let item_codes: BTreeSet<&str> = item_codes
            .into_iter()
            .filter(|c| !c.trim().is_empty())
            .collect();
        let mapping: HashMap<&str, String> = item_codes
            .iter()
            .filter_map(|code| self.mapper.map(code).map(|p| (*code, p)))
            .collect();

        let pricing_codes: Vec<String> = mapping
            .values()
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let prices = if pricing_codes.is_empty() {
            HashMap::new()
        } else {
            match source.fetch_prices(&pricing_codes).await {
                Ok(prices) => prices,
                Err(e) => {
                    warn!(error = %e, codes = pricing_codes.len(), "取价失败，拒收成本按 0 计");
                    HashMap::new()
                }
            }
        };

        let costs: HashMap<String, f64> = item_codes
            .iter()
            .map(|code| {
                let unit = mapping
                    .get(code)
                    .and_then(|p| prices.get(p))
                    .copied()
                    .unwrap_or(0.0);
                (code.to_string(), unit)
            })
            .collect();

        debug!(
            items = costs.len(),
            priced = costs.values().filter(|c| **c > 0.0).count(),
            "单价解析完成"
        );
        costs
    }

    /// 回填检验记录的拒收成本 = 拒收数 × 单价
    ///
    /// # 返回
    /// - 成功取到单价的记录数
    #[instrument(skip(self, records, source), fields(count = records.len()))]
    pub async fn apply<S>(&self, records: &mut [InspectionRecord], source: &S) -> usize
    where
        S: PriceSource + ?Sized,
    {
        let costs = self
            .unit_costs(
                records.iter().filter_map(|r| r.product_code.as_deref()),
                source,
            )
            .await;

        let mut priced = 0;
        for record in records.iter_mut() {
            let unit = record
                .product_code
                .as_deref()
                .and_then(|c| costs.get(c))
                .copied()
                .unwrap_or(0.0);
            if unit > 0.0 {
                priced += 1;
            }
            record.rejection_cost = record.rejected_qty * unit;
        }
        priced
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedPrices(HashMap<String, f64>);

    #[async_trait]
    impl PriceSource for FixedPrices {
        async fn fetch_prices(
            &self,
            pricing_codes: &[String],
        ) -> Result<HashMap<String, f64>, PriceSourceError> {
            Ok(pricing_codes
                .iter()
                .filter_map(|c| self.0.get(c).map(|p| (c.clone(), *p)))
                .collect())
        }
    }

    struct Unreachable;

    #[async_trait]
    impl PriceSource for Unreachable {
        async fn fetch_prices(
            &self,
            _pricing_codes: &[String],
        ) -> Result<HashMap<String, f64>, PriceSourceError> {
            Err("price service unreachable".into())
        }
    }

    fn prices() -> FixedPrices {
        FixedPrices(HashMap::from([
            ("F5117".to_string(), 2.5),
            ("F0042".to_string(), 10.0),
        ]))
    }

    #[test]
    fn test_map_pricing_code() {
        let mapper = PricingCodeMapper::default();
        assert_eq!(mapper.map("T5117"), Some("F5117".to_string()));
        assert_eq!(mapper.map("  t5117 RUBBER SEAL"), Some("F5117".to_string()));
        assert_eq!(mapper.map("T.T5117"), Some("F5117".to_string()));
        assert_eq!(mapper.map("B0001"), None);
        assert_eq!(mapper.map("   "), None);
    }

    #[tokio::test]
    async fn test_apply_sets_costs() {
        let mut records = vec![
            InspectionRecord::new("T5117", "A-1", 100.0, 4.0),
            InspectionRecord::new("T0042", "B-1", 100.0, 1.0),
            InspectionRecord::new("X9999", "C-1", 100.0, 3.0),
        ];
        let priced = CostCalculator::default().apply(&mut records, &prices()).await;

        assert_eq!(priced, 2);
        assert_eq!(records[0].rejection_cost, 10.0);
        assert_eq!(records[1].rejection_cost, 10.0);
        assert_eq!(records[2].rejection_cost, 0.0);
    }

    #[tokio::test]
    async fn test_source_failure_leaves_zero_cost() {
        let mut records = vec![InspectionRecord::new("T5117", "A-1", 100.0, 4.0).with_cost(7.0)];
        let priced = CostCalculator::default().apply(&mut records, &Unreachable).await;

        assert_eq!(priced, 0);
        assert_eq!(records[0].rejection_cost, 0.0);
    }

    #[tokio::test]
    async fn test_unit_costs_keyed_by_item_code() {
        let costs = CostCalculator::default()
            .unit_costs(["T5117", "T5117", "B1"], &prices())
            .await;
        assert_eq!(costs.len(), 2);
        assert_eq!(costs["T5117"], 2.5);
        assert_eq!(costs["B1"], 0.0);
    }
}
