//! Deterministic category inference
//!
//! Ordered keyword table: the first rule whose keyword occurs in the
//! lowercased title decides the category. Order matters where keywords
//! overlap (`고추장` must hit sauces before `고추` hits vegetables), so
//! more specific rules come first. Site profiles can prepend their own
//! rules.

use crate::domain::{SiteProfile, UNCATEGORIZED};

pub struct CategoryRule {
    pub category: &'static str,
    pub keywords: &'static [&'static str],
}

pub static BUILTIN_RULES: &[CategoryRule] = &[
    CategoryRule {
        category: "축산물",
        keywords: &["한우", "한돈", "소고기", "돼지", "삼겹", "갈비", "불고기", "닭", "오리", "육포", "계란", "달걀"],
    },
    CategoryRule {
        category: "김치/반찬",
        keywords: &["김치", "깍두기", "장아찌", "젓갈", "반찬", "절임"],
    },
    CategoryRule {
        category: "장류/양념",
        keywords: &["된장", "고추장", "간장", "청국장", "참기름", "들기름", "식초", "소금", "양념", "액젓"],
    },
    CategoryRule {
        category: "건강식품",
        keywords: &["홍삼", "인삼", "흑마늘", "동충하초", "벌꿀", "아카시아꿀", "야생화꿀", "프로폴리스", "진액", "엑기스", "즙"],
    },
    CategoryRule {
        category: "떡/과자",
        keywords: &["떡", "한과", "약과", "강정", "과자", "쿠키", "빵", "누룽지"],
    },
    CategoryRule {
        category: "수산물",
        keywords: &["멸치", "새우", "굴비", "조기", "고등어", "오징어", "전복", "미역", "다시마", "조미김", "돌김", "꽃게", "수산"],
    },
    CategoryRule {
        category: "음료/주류",
        keywords: &["막걸리", "전통주", "와인", "맥주", "주스", "식혜", "커피", "녹차", "홍차", "티백"],
    },
    CategoryRule {
        category: "채소",
        keywords: &["배추", "감자", "고구마", "양파", "대파", "마늘", "고추", "버섯", "나물", "시금치", "옥수수", "호박", "당근", "채소"],
    },
    CategoryRule {
        category: "과일",
        keywords: &["사과", "참외", "포도", "샤인머스캣", "감귤", "한라봉", "딸기", "복숭아", "블루베리", "수박", "토마토", "곶감", "단감", "반시", "자두", "매실", "나주배", "신고배", "과일"],
    },
    CategoryRule {
        category: "쌀/잡곡",
        keywords: &["쌀", "현미", "잡곡", "보리", "귀리", "콩", "팥", "수수", "곡물"],
    },
    CategoryRule {
        category: "생활용품",
        keywords: &["비누", "수건", "세제", "주방", "화장품", "마스크"],
    },
];

/// Certifications and provenance markers that become tags verbatim
pub static QUALITY_KEYWORDS: &[&str] = &[
    "유기농", "무농약", "친환경", "무항생제", "국내산", "HACCP", "GAP", "저탄소", "선물세트",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub category: String,
    /// Tags contributed by matching profile keyword rules
    pub rule_tags: Vec<String>,
}

/// Decide the category of a cleaned title.
///
/// Precedence: explicit site category, profile keyword rules, built-in
/// table, `uncategorized`.
pub fn classify(title: &str, explicit: Option<&str>, profile: &SiteProfile) -> Classification {
    let lowered = title.to_lowercase();

    let matching: Vec<_> = profile
        .keyword_rules
        .iter()
        .filter(|rule| rule.matches(&lowered))
        .collect();
    let rule_tags = matching.iter().flat_map(|rule| rule.tags.iter().cloned()).collect();

    let category = explicit
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_string)
        .or_else(|| matching.iter().find_map(|rule| rule.category.clone()))
        .or_else(|| builtin_category(&lowered).map(str::to_string))
        .unwrap_or_else(|| UNCATEGORIZED.to_string());

    Classification { category, rule_tags }
}

pub fn builtin_category(lowered_title: &str) -> Option<&'static str> {
    BUILTIN_RULES
        .iter()
        .find(|rule| rule.keywords.iter().any(|k| lowered_title.contains(k)))
        .map(|rule| rule.category)
}

/// Quality tags found in the title, in table order
pub fn quality_tags(title: &str) -> Vec<&'static str> {
    let lowered = title.to_lowercase();
    QUALITY_KEYWORDS
        .iter()
        .copied()
        .filter(|k| lowered.contains(&k.to_lowercase()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{KeywordRule, SelectorSet};
    use rstest::rstest;

    fn profile(rules: Vec<KeywordRule>) -> SiteProfile {
        SiteProfile {
            id: "test".to_string(),
            display_name: "테스트몰".to_string(),
            region: "강원도".to_string(),
            base_url: "https://mall.example".to_string(),
            encoding: None,
            categories: Vec::new(),
            selectors: SelectorSet::default(),
            id_patterns: Vec::new(),
            pagination: Default::default(),
            request_delay_ms: 0,
            render: Default::default(),
            tags: Vec::new(),
            category_map: Vec::new(),
            keyword_rules: rules,
        }
    }

    #[rstest]
    #[case("횡성 한우 1++ 등심 500g", "축산물")]
    #[case("전통 고추장 1kg", "장류/양념")]
    #[case("청양 고추 1kg", "채소")]
    #[case("포기김치 5kg", "김치/반찬")]
    #[case("6년근 홍삼 진액", "건강식품")]
    #[case("성주 참외 2kg", "과일")]
    #[case("2024년 햅쌀 10kg", "쌀/잡곡")]
    #[case("쌀과자 선물세트", "떡/과자")]
    #[case("무농약 감자 3kg", "채소")]
    #[case("원목 도마", "uncategorized")]
    fn test_builtin_table(#[case] title: &str, #[case] expected: &str) {
        let c = classify(title, None, &profile(Vec::new()));
        assert_eq!(c.category, expected);
    }

    #[test]
    fn test_explicit_category_wins() {
        let c = classify("성주 참외 2kg", Some("제철과일"), &profile(Vec::new()));
        assert_eq!(c.category, "제철과일");
    }

    #[test]
    fn test_profile_rules_come_before_builtin() {
        let rules = vec![KeywordRule {
            keywords: vec!["참외".to_string()],
            category: Some("성주특산".to_string()),
            tags: vec!["성주".to_string()],
        }];
        let c = classify("성주 참외 2kg", None, &profile(rules));
        assert_eq!(c.category, "성주특산");
        assert_eq!(c.rule_tags, vec!["성주".to_string()]);
    }

    #[test]
    fn test_quality_tags_in_table_order() {
        assert_eq!(quality_tags("[HACCP] 국내산 유기농 현미"), vec!["유기농", "국내산", "HACCP"]);
        assert_eq!(quality_tags("haccp 인증 김치"), vec!["HACCP"]);
        assert!(quality_tags("원목 도마").is_empty());
    }
}
