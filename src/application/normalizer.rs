//! Raw record -> catalog entry normalization
//!
//! Rejections are explicit: a record without a usable title or price is
//! dropped with a reason and counted, never filled with a placeholder.

use chrono::Utc;
use std::collections::{BTreeMap, HashSet};

use super::category_rules::{classify, quality_tags};
use crate::domain::{
    CatalogEntry, DEFAULT_CURRENCY, QualityFlag, RawRecord, Rejection, SiteProfile,
};

/// Title text that marks a product as sold out
const SOLD_OUT_MARKERS: [&str; 2] = ["품절", "sold out"];

/// Bracket pairs stripped from the start of a title (`[특가]`, `【무료배송】`)
const PREFIX_BRACKETS: [(char, char); 3] = [('[', ']'), ('【', '】'), ('〔', '〕')];

/// Outcome of normalizing one page's (or one category's) records
#[derive(Debug, Default)]
pub struct NormalizedBatch {
    pub entries: Vec<CatalogEntry>,
    pub rejections: BTreeMap<Rejection, usize>,
}

impl NormalizedBatch {
    pub fn rejected(&self) -> usize {
        self.rejections.values().sum()
    }
}

pub struct Normalizer<'a> {
    profile: &'a SiteProfile,
    max_price: u64,
    seen_ids: HashSet<String>,
}

impl<'a> Normalizer<'a> {
    pub fn new(profile: &'a SiteProfile, max_price: u64) -> Self {
        Self {
            profile,
            max_price,
            seen_ids: HashSet::new(),
        }
    }

    /// Normalize a batch, rejecting ids already produced by this normalizer
    pub fn normalize_batch(&mut self, records: &[RawRecord]) -> NormalizedBatch {
        let mut batch = NormalizedBatch::default();
        for record in records {
            let outcome = normalize(record, self.profile, self.max_price).and_then(|entry| {
                if self.seen_ids.insert(entry.id.clone()) {
                    Ok(entry)
                } else {
                    Err(Rejection::DuplicateWithinBatch)
                }
            });
            match outcome {
                Ok(entry) => batch.entries.push(entry),
                Err(reason) => *batch.rejections.entry(reason).or_default() += 1,
            }
        }
        batch
    }
}

/// Normalize one record against its site profile
pub fn normalize(record: &RawRecord, profile: &SiteProfile, max_price: u64) -> Result<CatalogEntry, Rejection> {
    let raw_name = record.name.as_deref().unwrap_or_default();
    let title = clean_title(raw_name);
    if title.is_empty() {
        return Err(Rejection::MissingTitle);
    }

    let price = record
        .price_text
        .as_deref()
        .and_then(|text| parse_price(text, max_price))
        .ok_or(Rejection::InvalidPrice)?;
    let original_price = record
        .original_price_text
        .as_deref()
        .and_then(|text| parse_price(text, max_price))
        .filter(|&original| original > price);

    let mut quality_flags = Vec::new();
    let id = match record.source_id.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        Some(source_id) => format!("{}-{}", profile.id, source_id),
        None => {
            quality_flags.push(QualityFlag::LowConfidenceId);
            let origin = &record.origin;
            format!("{}-f-{}-{}-{}", profile.id, origin.category_id, origin.page, origin.index)
        }
    };

    let image_url = record.image_url.clone().unwrap_or_default();
    if image_url.is_empty() {
        quality_flags.push(QualityFlag::MissingImage);
    }
    let source_url = match &record.link {
        Some(link) => link.clone(),
        None => {
            quality_flags.push(QualityFlag::MissingLink);
            record.origin.page_url.clone()
        }
    };
    if record.origin.charset_fallback {
        quality_flags.push(QualityFlag::CharsetFallback);
    }

    let explicit = explicit_category(record, profile);
    let classification = classify(&title, explicit.as_deref(), profile);
    let tags = assemble_tags(profile, &classification.category, &classification.rule_tags, &title);

    let lowered = raw_name.to_lowercase();
    let in_stock = !record.sold_out && !SOLD_OUT_MARKERS.iter().any(|m| lowered.contains(m));

    let now = Utc::now();
    Ok(CatalogEntry {
        id,
        title,
        price,
        original_price,
        currency: DEFAULT_CURRENCY.to_string(),
        image_url,
        source_url,
        category: classification.category,
        tags,
        in_stock,
        mall_id: profile.id.clone(),
        mall_name: profile.display_name.clone(),
        region: profile.region.clone(),
        first_seen_at: now,
        last_updated_at: now,
        quality_flags,
        extra: serde_json::Map::new(),
    })
}

/// Operator-declared category of the listing, else the product's own
/// category hint (mapped through the profile's category map)
fn explicit_category(record: &RawRecord, profile: &SiteProfile) -> Option<String> {
    if let Some(category) = profile
        .category(&record.origin.category_id)
        .and_then(|c| c.explicit_category.clone())
    {
        return Some(category);
    }
    let hint = record.category_hint.as_deref()?.trim();
    if hint.is_empty() {
        return None;
    }
    Some(profile.map_category(hint).unwrap_or(hint).to_string())
}

/// Region, mall, category, rule tags, quality tags, profile tags; first
/// occurrence wins.
fn assemble_tags(profile: &SiteProfile, category: &str, rule_tags: &[String], title: &str) -> Vec<String> {
    let candidates = [profile.region.as_str(), profile.display_name.as_str(), category]
        .into_iter()
        .chain(rule_tags.iter().map(String::as_str))
        .chain(quality_tags(title))
        .chain(profile.tags.iter().map(String::as_str));

    let mut seen = HashSet::new();
    candidates
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .filter(|t| seen.insert(t.to_string()))
        .map(str::to_string)
        .collect()
}

/// Strip leading bracketed promotions and collapse whitespace.
/// A title that is nothing but brackets is kept as-is.
pub fn clean_title(raw: &str) -> String {
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");

    let mut rest = collapsed.as_str();
    'strip: loop {
        rest = rest.trim_start();
        for (open, close) in PREFIX_BRACKETS {
            if let Some(inner) = rest.strip_prefix(open) {
                if let Some(end) = inner.find(close) {
                    rest = &inner[end + close.len_utf8()..];
                    continue 'strip;
                }
            }
        }
        break;
    }

    let stripped = rest.trim();
    if stripped.is_empty() {
        collapsed
    } else {
        stripped.to_string()
    }
}

/// First numeric token of `text` as a positive integer no greater than
/// `max_price`. `"19,900원"` -> 19900; `"가격문의"`, `"0원"`, `"-500"` -> None.
pub fn parse_price(text: &str, max_price: u64) -> Option<u64> {
    let start = text.find(|c: char| c.is_ascii_digit())?;
    if text[..start].trim_end().ends_with('-') {
        return None;
    }

    let digits: String = text[start..]
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == ',')
        .filter(char::is_ascii_digit)
        .collect();

    let value: u64 = digits.parse().ok()?;
    (value > 0 && value <= max_price).then_some(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CategorySpec, RecordOrigin, SelectorSet};
    use proptest::prelude::*;
    use rstest::rstest;

    const MAX: u64 = 10_000_000;

    fn profile() -> SiteProfile {
        SiteProfile {
            id: "wemall".to_string(),
            display_name: "우리몰".to_string(),
            region: "대구광역시".to_string(),
            base_url: "https://wemall.kr".to_string(),
            encoding: None,
            categories: vec![CategorySpec {
                id: "001".to_string(),
                name: "농산물".to_string(),
                url: "/list?cate=001".to_string(),
                explicit_category: None,
            }],
            selectors: SelectorSet::default(),
            id_patterns: Vec::new(),
            pagination: Default::default(),
            request_delay_ms: 0,
            render: Default::default(),
            tags: vec!["로컬푸드".to_string()],
            category_map: Vec::new(),
            keyword_rules: Vec::new(),
        }
    }

    fn record(name: &str, price: &str) -> RawRecord {
        RawRecord {
            name: Some(name.to_string()),
            price_text: Some(price.to_string()),
            image_url: Some("https://wemall.kr/img/1.jpg".to_string()),
            link: Some("https://wemall.kr/p?product_no=1".to_string()),
            source_id: Some("1".to_string()),
            origin: RecordOrigin {
                category_id: "001".to_string(),
                page: 2,
                index: 3,
                page_url: "https://wemall.kr/list?cate=001&page=2".to_string(),
                charset_fallback: false,
            },
            ..RawRecord::default()
        }
    }

    #[rstest]
    #[case("19,900원", Some(19_900))]
    #[case("  12000 ", Some(12_000))]
    #[case("판매가 : 7,430원", Some(7_430))]
    #[case("15,000원 → 12,000원", Some(15_000))]
    #[case("가격문의", None)]
    #[case("0원", None)]
    #[case("-500원", None)]
    #[case("99,999,999원", None)]
    #[case("", None)]
    fn test_parse_price(#[case] text: &str, #[case] expected: Option<u64>) {
        assert_eq!(parse_price(text, MAX), expected);
    }

    proptest! {
        #[test]
        fn parsed_price_is_positive_and_bounded(text in "\\PC*") {
            if let Some(price) = parse_price(&text, MAX) {
                prop_assert!(price > 0);
                prop_assert!(price <= MAX);
            }
        }

        #[test]
        fn formatted_prices_round_trip(value in 1u64..=MAX) {
            let text = format!("{}원", value);
            prop_assert_eq!(parse_price(&text, MAX), Some(value));
        }
    }

    #[rstest]
    #[case("[산지직송] 성주 참외 2kg", "성주 참외 2kg")]
    #[case("【무료배송】[특가]  청도   반시", "청도 반시")]
    #[case("국산 찹쌀 1kg", "국산 찹쌀 1kg")]
    #[case("[한정판]", "[한정판]")]
    #[case("참외 [2kg]", "참외 [2kg]")]
    fn test_clean_title(#[case] raw: &str, #[case] expected: &str) {
        assert_eq!(clean_title(raw), expected);
    }

    #[test]
    fn test_full_record_normalizes() {
        let entry = normalize(&record("[HACCP] 유기농 성주 참외 2kg", "19,900원"), &profile(), MAX).unwrap();

        assert_eq!(entry.id, "wemall-1");
        assert_eq!(entry.title, "유기농 성주 참외 2kg");
        assert_eq!(entry.price, 19_900);
        assert_eq!(entry.category, "과일");
        assert_eq!(entry.currency, "KRW");
        assert!(entry.in_stock);
        assert!(entry.quality_flags.is_empty());
        assert_eq!(entry.tags, vec!["대구광역시", "우리몰", "과일", "유기농", "로컬푸드"]);
    }

    #[test]
    fn test_missing_price_is_rejected_not_zeroed() {
        let mut r = record("성주 참외", "가격문의");
        assert_eq!(normalize(&r, &profile(), MAX), Err(Rejection::InvalidPrice));
        r.price_text = None;
        assert_eq!(normalize(&r, &profile(), MAX), Err(Rejection::InvalidPrice));
    }

    #[test]
    fn test_missing_title_is_rejected() {
        let r = record("   ", "1,000원");
        assert_eq!(normalize(&r, &profile(), MAX), Err(Rejection::MissingTitle));
    }

    #[test]
    fn test_fallback_id_is_flagged_low_confidence() {
        let mut r = record("성주 참외", "1,000원");
        r.source_id = None;
        let entry = normalize(&r, &profile(), MAX).unwrap();
        assert_eq!(entry.id, "wemall-f-001-2-3");
        assert!(entry.has_flag(QualityFlag::LowConfidenceId));
    }

    #[test]
    fn test_original_price_only_when_higher() {
        let mut r = record("성주 참외", "10,000원");
        r.original_price_text = Some("12,000원".to_string());
        assert_eq!(normalize(&r, &profile(), MAX).unwrap().original_price, Some(12_000));

        r.original_price_text = Some("10,000원".to_string());
        assert_eq!(normalize(&r, &profile(), MAX).unwrap().original_price, None);
    }

    #[test]
    fn test_sold_out_marker_in_title() {
        let r = record("성주 참외 (품절)", "10,000원");
        assert!(!normalize(&r, &profile(), MAX).unwrap().in_stock);

        let mut r = record("성주 참외", "10,000원");
        r.sold_out = true;
        assert!(!normalize(&r, &profile(), MAX).unwrap().in_stock);
    }

    #[test]
    fn test_missing_link_and_image_are_flagged() {
        let mut r = record("성주 참외", "10,000원");
        r.link = None;
        r.image_url = None;
        r.origin.charset_fallback = true;
        let entry = normalize(&r, &profile(), MAX).unwrap();
        assert!(entry.has_flag(QualityFlag::MissingLink));
        assert!(entry.has_flag(QualityFlag::MissingImage));
        assert!(entry.has_flag(QualityFlag::CharsetFallback));
        assert_eq!(entry.source_url, "https://wemall.kr/list?cate=001&page=2");
    }

    #[test]
    fn test_category_hint_goes_through_category_map() {
        let mut p = profile();
        p.category_map.push(crate::domain::CategoryMapping {
            from: "과일/채소".to_string(),
            to: "과일".to_string(),
        });
        let mut r = record("원목 도마", "10,000원");
        r.category_hint = Some(" 과일/채소 ".to_string());
        assert_eq!(normalize(&r, &p, MAX).unwrap().category, "과일");
    }

    #[test]
    fn test_batch_rejects_repeated_ids() {
        let p = profile();
        let mut normalizer = Normalizer::new(&p, MAX);
        let batch = normalizer.normalize_batch(&[
            record("성주 참외", "10,000원"),
            record("성주 참외 특품", "12,000원"),
            record("청도 반시", "가격문의"),
        ]);

        assert_eq!(batch.entries.len(), 1);
        assert_eq!(batch.rejections.get(&Rejection::DuplicateWithinBatch), Some(&1));
        assert_eq!(batch.rejections.get(&Rejection::InvalidPrice), Some(&1));
        assert_eq!(batch.rejected(), 2);
    }
}
