// Relevance scoring and the secondary category hint

use crate::config::ScoreWeights;
use crate::marketplace::transport::RawItem;

/// Commission amount at which the commission component reaches one half
const COMMISSION_HALF_POINT: f64 = 10.0;
/// Sales volume treated as saturating the sales component
const SALES_SATURATION: f64 = 100_000.0;

/// Weighted relevance score; every component lies in [0, 1] and contributes positively
pub fn score(item: &RawItem, weights: &ScoreWeights) -> f64 {
    let commission = if item.commission > 0.0 {
        item.commission / (item.commission + COMMISSION_HALF_POINT)
    } else {
        0.0
    };
    let rating = item.rating.map(|r| (r / 5.0).clamp(0.0, 1.0)).unwrap_or(0.0);
    let sales = item
        .sales_count
        .map(|s| ((1.0 + s as f64).ln() / (1.0 + SALES_SATURATION).ln()).min(1.0))
        .unwrap_or(0.0);
    let discount = item.discount_rate.map(|d| d.clamp(0.0, 1.0)).unwrap_or(0.0);

    weights.commission * commission
        + weights.rating * rating
        + weights.sales * sales
        + weights.discount * discount
}

/// Drop items under `min_commission`, score the rest and order them best first.
///
/// Items with equal scores keep their marketplace order.
pub fn rank(
    items: Vec<RawItem>,
    weights: &ScoreWeights,
    min_commission: Option<f64>,
    min_score: Option<f64>,
) -> Vec<(RawItem, f64)> {
    let mut scored: Vec<(RawItem, f64)> = items
        .into_iter()
        .filter(|item| min_commission.map_or(true, |min| item.commission >= min))
        .map(|item| {
            let s = score(&item, weights);
            (item, s)
        })
        .filter(|(_, s)| min_score.map_or(true, |min| *s >= min))
        .collect();

    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    scored
}

const CATEGORY_HINTS: &[(&str, &[&str])] = &[
    (
        "eletronicos",
        &["fone", "bluetooth", "smartphone", "celular", "carregador", "notebook", "smartwatch", "caixa de som"],
    ),
    ("casa", &["panela", "airfryer", "cozinha", "toalha", "lencol", "organizador"]),
    ("beleza", &["perfume", "maquiagem", "shampoo", "hidratante", "batom"]),
    ("moda", &["camiseta", "vestido", "tenis", "bolsa", "calca", "jaqueta"]),
    ("esportes", &["bicicleta", "halter", "academia", "corrida", "yoga"]),
];

/// Guess a category from the item name.
///
/// Only ever stored as a hint next to the caller's category; it misses too
/// many valid items to be used for filtering.
pub fn infer_category(name: &str) -> Option<&'static str> {
    let normalized = crate::filter::normalize_text(name);
    CATEGORY_HINTS
        .iter()
        .find(|(_, words)| words.iter().any(|w| normalized.contains(w)))
        .map(|(category, _)| *category)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: &str, commission: f64, rating: Option<f64>) -> RawItem {
        RawItem {
            id: id.to_string(),
            name: format!("item {}", id),
            price: 100.0,
            link: format!("https://shop/{}", id),
            commission,
            rating,
            ..Default::default()
        }
    }

    #[test]
    fn test_rating_weighs_heaviest_by_default() {
        let weights = ScoreWeights::default();
        let rated = item("a", 0.0, Some(5.0));
        let commissioned = item("b", 1_000_000.0, None);

        assert!(score(&rated, &weights) > score(&commissioned, &weights));
    }

    #[test]
    fn test_every_component_is_positive() {
        let weights = ScoreWeights::default();
        let base = item("a", 0.0, None);
        let better = RawItem {
            commission: 5.0,
            rating: Some(4.0),
            sales_count: Some(300),
            discount_rate: Some(0.3),
            ..base.clone()
        };

        assert_eq!(score(&base, &weights), 0.0);
        assert!(score(&better, &weights) > 0.0);
    }

    #[test]
    fn test_rank_drops_low_commission_and_orders_by_score() {
        let weights = ScoreWeights::default();
        let ranked = rank(
            vec![
                item("low", 0.5, Some(5.0)),
                item("mid", 3.0, Some(4.0)),
                item("top", 3.0, Some(4.9)),
            ],
            &weights,
            Some(1.0),
            None,
        );

        let ids: Vec<&str> = ranked.iter().map(|(i, _)| i.id.as_str()).collect();
        assert_eq!(ids, vec!["top", "mid"]);
    }

    #[test]
    fn test_rank_is_stable_for_ties() {
        let weights = ScoreWeights::default();
        let ranked = rank(
            vec![item("first", 2.0, Some(4.5)), item("second", 2.0, Some(4.5))],
            &weights,
            None,
            None,
        );

        assert_eq!(ranked[0].0.id, "first");
        assert_eq!(ranked[1].0.id, "second");
    }

    #[test]
    fn test_rank_min_score() {
        let weights = ScoreWeights::default();
        let ranked = rank(
            vec![item("weak", 0.0, None), item("strong", 5.0, Some(5.0))],
            &weights,
            None,
            Some(0.1),
        );
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].0.id, "strong");
    }

    #[test]
    fn test_infer_category_ignores_accents_and_case() {
        assert_eq!(infer_category("Fone de Ouvido BLUETOOTH"), Some("eletronicos"));
        assert_eq!(infer_category("Tênis Esportivo"), Some("moda"));
        assert_eq!(infer_category("Livro de receitas"), None);
    }
}
