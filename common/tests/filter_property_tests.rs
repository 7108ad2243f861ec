// Property-based tests for the candidate filter pipeline

use common::filter::{normalize_text, FilterCriteria, FilterPipeline, Rejection};
use common::models::Candidate;
use proptest::prelude::*;

fn candidate(id: &str, name: &str, rating: Option<f64>) -> Candidate {
    Candidate {
        item_id: id.to_string(),
        name: name.to_string(),
        price: 10.0,
        original_price: None,
        link: format!("https://shopee.com.br/product/{}", id),
        rating,
        image_url: None,
        category: Some("eletronicos".to_string()),
        subcategory: None,
        inferred_category: None,
        commission: 1.0,
        score: 0.5,
    }
}

fn criteria(blocked: &[&str], min_rating: f64) -> FilterCriteria {
    let blocked: Vec<String> = blocked.iter().map(|s| s.to_string()).collect();
    FilterCriteria::new(&blocked, min_rating, None, None)
}

#[test]
fn property_blocked_keyword_excludes_candidate() {
    let criteria = criteria(&["capa"], 4.5);

    assert!(matches!(
        criteria.check(&candidate("1", "Capa Protetora X", Some(4.9))),
        Err(Rejection::BlockedKeyword(_))
    ));
    assert!(criteria.accepts(&candidate("2", "Fone Bluetooth", Some(4.9))));
}

#[test]
fn property_rating_threshold_examples() {
    let criteria = criteria(&[], 4.5);

    assert!(!criteria.accepts(&candidate("1", "Fone", Some(4.2))));
    assert!(criteria.accepts(&candidate("2", "Fone", Some(4.6))));
    assert!(criteria.accepts(&candidate("3", "Fone", None)));
}

/// *For any* rating and threshold, a rated candidate passes iff rating >= threshold
#[test]
fn property_rating_threshold() {
    proptest!(|(
        rating in 0.0f64..=5.0,
        min_rating in 0.0f64..=5.0
    )| {
        let criteria = criteria(&[], min_rating);
        let accepted = criteria.accepts(&candidate("1", "Fone", Some(rating)));
        prop_assert_eq!(accepted, rating >= min_rating);

        // Missing ratings are never held against a candidate
        prop_assert!(criteria.accepts(&candidate("2", "Fone", None)));
    });
}

/// *For any* name containing a blocked word, whatever its case or accents, the candidate is excluded
#[test]
fn property_blocked_keyword_ignores_case_and_accents() {
    proptest!(|(
        prefix in "[a-z ]{0,10}",
        suffix in "[a-z ]{0,10}",
        upper in any::<bool>()
    )| {
        let word = if upper { "PROTEÇÃO" } else { "proteção" };
        let name = format!("{}{}{}", prefix, word, suffix);

        let criteria = criteria(&["Protecao"], 0.0);
        prop_assert!(!criteria.accepts(&candidate("1", &name, None)));
    });
}

#[test]
fn property_normalize_text_strips_diacritics() {
    assert_eq!(normalize_text("Capinha Protetôra ÁGUA"), "capinha protetora agua");
}

#[test]
fn property_category_and_subcategory_exact_match() {
    let with_category = FilterCriteria::new(&[], 0.0, Some("eletronicos".to_string()), None);
    assert!(with_category.accepts(&candidate("1", "Fone", None)));

    let other_category = FilterCriteria::new(&[], 0.0, Some("casa".to_string()), None);
    assert!(matches!(
        other_category.check(&candidate("1", "Fone", None)),
        Err(Rejection::CategoryMismatch { .. })
    ));

    let with_subcategory = FilterCriteria::new(
        &[],
        0.0,
        Some("eletronicos".to_string()),
        Some("audio".to_string()),
    );
    assert!(matches!(
        with_subcategory.check(&candidate("1", "Fone", None)),
        Err(Rejection::SubcategoryMismatch { .. })
    ));
}

/// *For any* list of candidates, the pipeline never accepts two with the same link or item id
#[test]
fn property_intra_run_dedup() {
    proptest!(|(ids in prop::collection::vec("[a-dA-D]", 1..30))| {
        let mut pipeline = FilterPipeline::new(criteria(&[], 0.0));
        let candidates: Vec<Candidate> = ids
            .iter()
            .map(|id| candidate(id, "Fone", Some(5.0)))
            .collect();

        let accepted = pipeline.apply(candidates);

        let mut keys: Vec<String> = accepted.iter().map(|c| c.item_id.to_lowercase()).collect();
        let total = keys.len();
        keys.sort();
        keys.dedup();
        prop_assert_eq!(keys.len(), total);

        let mut expected: Vec<String> = ids.iter().map(|id| id.to_lowercase()).collect();
        expected.sort();
        expected.dedup();
        prop_assert_eq!(total, expected.len());
    });
}
