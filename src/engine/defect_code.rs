// ==========================================
// 模压质量拒收分析 - 缺陷代码归一化
// ==========================================
// 职责: 自由文本缺陷标签 → 2~3 位缺陷代码
// 规则: 大小写不敏感的子串匹配，按目录顺序首个命中即返回
// 红线: 目录顺序即优先级，不得调整（关键词存在重叠）
// ==========================================

use std::collections::BTreeMap;
use tracing::warn;

/// 未命中任何规则时的代码
pub const OTHER_CODE: &str = "OTH";

// ==========================================
// 缺陷代码目录（有序）
// ==========================================
// 通用 "DEFECT" 必须放在最后:
// "BUBBLE DEFECT" → BB, "SURFACE DEFECT" → SD
const DEFECT_CATALOG: &[(&str, &[&str])] = &[
    ("UF", &["UNDER FILL", "UNDERFILL", "UNDER-FILL", "SHORT FILL"]),
    ("OT", &["OVER TRIM", "OVERTRIM", "OVER-TRIM"]),
    ("CM", &["CUT MARK", "CUTMARK", "CUT-MARK"]),
    ("IM", &["IMPRESSION"]),
    ("RBS", &["RBS"]),
    ("FL", &["FLASH"]),
    ("BL", &["BLISTER"]),
    ("BB", &["BUBBLE", "AIR TRAP"]),
    ("BD", &["BEND", "BENT"]),
    ("T", &["BURST", "TEAR", "TORN"]),
    ("SD", &["STAIN", "SURFACE"]),
    ("DT", &["DEFECT"]),
];

// ==========================================
// DefectCodeNormalizer - 缺陷代码归一化器
// ==========================================
#[derive(Debug, Clone, Copy, Default)]
pub struct DefectCodeNormalizer;

impl DefectCodeNormalizer {
    pub fn new() -> Self {
        Self
    }

    /// 归一化缺陷标签
    ///
    /// - 空/None → OTH
    /// - 标签本身就是目录中的代码 → 原代码（幂等）
    /// - 否则按目录顺序子串匹配，首个命中的代码
    /// - 均未命中 → OTH
    pub fn normalize(&self, label: Option<&str>) -> &'static str {
        let upper = match label.map(str::trim).filter(|l| !l.is_empty()) {
            Some(l) => l.to_uppercase(),
            None => return OTHER_CODE,
        };

        if upper == OTHER_CODE {
            return OTHER_CODE;
        }
        if let Some((code, _)) = DEFECT_CATALOG.iter().find(|(code, _)| *code == upper) {
            return code;
        }

        DEFECT_CATALOG
            .iter()
            .find(|(_, keywords)| keywords.iter().any(|kw| upper.contains(kw)))
            .map(|(code, _)| *code)
            .unwrap_or(OTHER_CODE)
    }

    /// 目录中全部代码（含 OTH），按目录顺序
    pub fn catalog_codes() -> Vec<&'static str> {
        DEFECT_CATALOG
            .iter()
            .map(|(code, _)| *code)
            .chain(std::iter::once(OTHER_CODE))
            .collect()
    }

    /// 解析缺陷明细文本并归一化为 代码 → 数量
    ///
    /// 格式: "标签:数量;标签:数量"，按最后一个 ':' 拆分
    /// 无数量、数量非数字/负数的条目单独跳过并记录告警
    /// 同一代码的数量累加
    pub fn parse_details(&self, raw: &str) -> BTreeMap<String, f64> {
        let mut codes: BTreeMap<String, f64> = BTreeMap::new();
        for entry in parse_defect_entries(raw) {
            let code = self.normalize(Some(&entry.label));
            *codes.entry(code.to_string()).or_insert(0.0) += entry.qty;
        }
        codes
    }
}

// ==========================================
// DefectEntry - 缺陷明细单条
// ==========================================
#[derive(Debug, Clone, PartialEq)]
pub struct DefectEntry {
    pub label: String,
    pub qty: f64,
}

/// 拆分缺陷明细文本，跳过格式错误的条目
pub fn parse_defect_entries(raw: &str) -> Vec<DefectEntry> {
    raw.split(';')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .filter_map(|entry| {
            let Some((label, qty)) = entry.rsplit_once(':') else {
                warn!(entry, "缺陷明细缺少数量，已跳过");
                return None;
            };
            let qty = qty.trim();
            if qty.is_empty() {
                warn!(entry, "缺陷明细数量为空，已跳过");
                return None;
            }
            match qty.parse::<f64>() {
                Ok(q) if q.is_finite() && q >= 0.0 => Some(DefectEntry {
                    label: label.trim().to_string(),
                    qty: q,
                }),
                _ => {
                    warn!(entry, "缺陷明细数量无法解析，已跳过");
                    None
                }
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn code(label: &str) -> &'static str {
        DefectCodeNormalizer::new().normalize(Some(label))
    }

    #[test]
    fn test_keyword_mapping() {
        assert_eq!(code("Bend"), "BD");
        assert_eq!(code("bent edge"), "BD");
        assert_eq!(code("Blister"), "BL");
        assert_eq!(code("Stain mark"), "SD");
        assert_eq!(code("Burst"), "T");
        assert_eq!(code("Tear"), "T");
        assert_eq!(code("Defect"), "DT");
        assert_eq!(code("Cutmark"), "CM");
        assert_eq!(code("RBS Rejection"), "RBS");
        assert_eq!(code("IMPRESSION MARK"), "IM");
        assert_eq!(code("Over Trim"), "OT");
        assert_eq!(code("Under Fill"), "UF");
    }

    #[test]
    fn test_overlapping_keywords_first_match_wins() {
        assert_eq!(code("BUBBLE DEFECT"), "BB");
        assert_eq!(code("Surface Defect"), "SD");
        assert_eq!(code("blister bubble"), "BL");
    }

    #[test]
    fn test_empty_and_unknown_labels() {
        let n = DefectCodeNormalizer::new();
        assert_eq!(n.normalize(None), OTHER_CODE);
        assert_eq!(n.normalize(Some("")), OTHER_CODE);
        assert_eq!(n.normalize(Some("   ")), OTHER_CODE);
        assert_eq!(n.normalize(Some("Mould damage")), OTHER_CODE);
    }

    #[test]
    fn test_normalize_is_idempotent_on_codes() {
        let n = DefectCodeNormalizer::new();
        for c in DefectCodeNormalizer::catalog_codes() {
            assert_eq!(n.normalize(Some(c)), c);
        }
        for label in ["Bend", "BUBBLE DEFECT", "x", "Torn lip"] {
            let once = n.normalize(Some(label));
            assert_eq!(n.normalize(Some(once)), once);
        }
    }

    #[test]
    fn test_parse_entries_skips_malformed() {
        let entries = parse_defect_entries("Bend:5; Blister ; Stain:abc;Tear:;Flash:-2;Burst:3.5;;");
        assert_eq!(
            entries,
            vec![
                DefectEntry { label: "Bend".to_string(), qty: 5.0 },
                DefectEntry { label: "Burst".to_string(), qty: 3.5 },
            ]
        );
    }

    #[test]
    fn test_parse_entries_splits_on_last_colon() {
        let entries = parse_defect_entries("Flash: Parting Line:4");
        assert_eq!(entries[0].label, "Flash: Parting Line");
        assert_eq!(entries[0].qty, 4.0);
    }

    #[test]
    fn test_parse_details_sums_duplicates() {
        let n = DefectCodeNormalizer::new();
        let codes = n.parse_details("Bend:2;BEND:3;Bent:1;Blister:4");
        assert_eq!(codes.get("BD"), Some(&6.0));
        assert_eq!(codes.get("BL"), Some(&4.0));
        assert_eq!(codes.len(), 2);
    }
}
