// Candidate filter pipeline
//
// Stages run in order and stop at the first rejection:
// blocked keyword, rating, category, subcategory, intra-run duplicate.

use crate::models::{Candidate, JobConfig};
use std::collections::HashSet;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Lowercase and strip diacritics ("Capinha Protetôra" -> "capinha protetora")
pub fn normalize_text(text: &str) -> String {
    text.nfd()
        .filter(|c| !is_combining_mark(*c))
        .collect::<String>()
        .to_lowercase()
}

#[derive(Debug, Clone, PartialEq)]
pub enum Rejection {
    BlockedKeyword(String),
    RatingBelowThreshold { rating: f64, min_rating: f64 },
    CategoryMismatch { expected: String },
    SubcategoryMismatch { expected: String },
    DuplicateInRun,
}

impl Rejection {
    pub fn reason(&self) -> &'static str {
        match self {
            Rejection::BlockedKeyword(_) => "blocked_keyword",
            Rejection::RatingBelowThreshold { .. } => "rating",
            Rejection::CategoryMismatch { .. } => "category",
            Rejection::SubcategoryMismatch { .. } => "subcategory",
            Rejection::DuplicateInRun => "duplicate",
        }
    }
}

/// The stateless stages, built from a job's configuration
#[derive(Debug, Clone)]
pub struct FilterCriteria {
    blocked_keywords: Vec<String>,
    min_rating: f64,
    category: Option<String>,
    subcategory: Option<String>,
}

impl FilterCriteria {
    pub fn new(
        blocked_keywords: &[String],
        min_rating: f64,
        category: Option<String>,
        subcategory: Option<String>,
    ) -> Self {
        Self {
            blocked_keywords: blocked_keywords
                .iter()
                .map(|k| normalize_text(k.trim()))
                .filter(|k| !k.is_empty())
                .collect(),
            min_rating,
            category,
            subcategory,
        }
    }

    /// `default_min_rating` applies when the job sets no threshold of its own
    pub fn from_config(config: &JobConfig, default_min_rating: f64) -> Self {
        Self::new(
            &config.blocked_keywords,
            config.min_rating.unwrap_or(default_min_rating),
            config.category.clone(),
            config.subcategory.clone(),
        )
    }

    pub fn check(&self, candidate: &Candidate) -> Result<(), Rejection> {
        if !self.blocked_keywords.is_empty() {
            let name = normalize_text(&candidate.name);
            if let Some(blocked) = self.blocked_keywords.iter().find(|k| name.contains(k.as_str())) {
                return Err(Rejection::BlockedKeyword(blocked.clone()));
            }
        }

        if let Some(rating) = candidate.rating {
            if rating < self.min_rating {
                return Err(Rejection::RatingBelowThreshold {
                    rating,
                    min_rating: self.min_rating,
                });
            }
        }

        if let Some(expected) = &self.category {
            if candidate.category.as_deref() != Some(expected.as_str()) {
                return Err(Rejection::CategoryMismatch {
                    expected: expected.clone(),
                });
            }
        }

        if let Some(expected) = &self.subcategory {
            if candidate.subcategory.as_deref() != Some(expected.as_str()) {
                return Err(Rejection::SubcategoryMismatch {
                    expected: expected.clone(),
                });
            }
        }

        Ok(())
    }

    pub fn accepts(&self, candidate: &Candidate) -> bool {
        self.check(candidate).is_ok()
    }
}

/// Links and item ids already taken by the current run
#[derive(Debug, Default)]
pub struct RunLedger {
    links: HashSet<String>,
    item_ids: HashSet<String>,
}

impl RunLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, candidate: &Candidate) -> bool {
        self.links.contains(&candidate.link)
            || self
                .item_ids
                .contains(&crate::dedup::normalize_item_key(&candidate.item_id))
    }

    pub fn mark(&mut self, candidate: &Candidate) {
        self.links.insert(candidate.link.clone());
        self.item_ids
            .insert(crate::dedup::normalize_item_key(&candidate.item_id));
    }

    pub fn len(&self) -> usize {
        self.item_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.item_ids.is_empty()
    }
}

/// Filter pipeline for one job run
#[derive(Debug)]
pub struct FilterPipeline {
    criteria: FilterCriteria,
    ledger: RunLedger,
}

impl FilterPipeline {
    pub fn new(criteria: FilterCriteria) -> Self {
        Self {
            criteria,
            ledger: RunLedger::new(),
        }
    }

    pub fn criteria(&self) -> &FilterCriteria {
        &self.criteria
    }

    /// Already taken earlier in this run
    pub fn is_taken(&self, candidate: &Candidate) -> bool {
        self.ledger.contains(candidate)
    }

    /// Would `admit` accept this candidate right now, without marking it
    pub fn would_admit(&self, candidate: &Candidate) -> bool {
        self.criteria.accepts(candidate) && !self.is_taken(candidate)
    }

    /// Run one candidate through every stage; an accepted candidate is marked as taken
    pub fn admit(&mut self, candidate: &Candidate) -> Result<(), Rejection> {
        self.criteria.check(candidate)?;
        if self.ledger.contains(candidate) {
            return Err(Rejection::DuplicateInRun);
        }
        self.ledger.mark(candidate);
        Ok(())
    }

    /// Keep the candidates that pass, in their original order
    pub fn apply(&mut self, candidates: Vec<Candidate>) -> Vec<Candidate> {
        candidates
            .into_iter()
            .filter(|candidate| match self.admit(candidate) {
                Ok(()) => true,
                Err(rejection) => {
                    tracing::debug!(
                        item_id = %candidate.item_id,
                        reason = rejection.reason(),
                        "Candidate filtered out"
                    );
                    false
                }
            })
            .collect()
    }
}
