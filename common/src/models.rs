use crate::errors::ValidationError;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::str::FromStr;
use uuid::Uuid;

/// Fallback for `filters.default_min_rating`
pub const DEFAULT_MIN_RATING: f64 = 4.5;

// ============================================================================
// Job Models
// ============================================================================

/// A periodically executed search → filter → publish unit of work
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SchedulerJob {
    pub id: Uuid,
    pub name: String,
    pub integration_id: Uuid,
    pub interval_minutes: u32,
    pub channel_ids: Vec<Uuid>,
    pub config: JobConfig,
    pub is_active: bool,
    pub last_run_at: Option<DateTime<Utc>>,
    pub next_run_at: Option<DateTime<Utc>>,
}

impl SchedulerJob {
    /// A job is due when it has never been scheduled or its next run has elapsed
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.next_run_at.map_or(true, |next| next <= now)
    }

    pub fn next_run_after(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now + Duration::minutes(i64::from(self.interval_minutes))
    }

    /// Validate the whole job definition; called before any write
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::MissingField("name".to_string()));
        }
        if self.interval_minutes == 0 {
            return Err(ValidationError::InvalidFieldValue {
                field: "interval_minutes".to_string(),
                reason: "must be greater than 0".to_string(),
            });
        }
        if self.channel_ids.is_empty() {
            return Err(ValidationError::MissingField("channel_ids".to_string()));
        }
        self.config.validate()
    }
}

/// Search and filtering configuration of a job
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobConfig {
    #[serde(default)]
    pub catalog_entry_ids: Vec<Uuid>,
    /// Free-text keywords kept for jobs created before catalog entries existed
    #[serde(default)]
    pub keywords: Vec<String>,
    pub limit: u32,
    /// `None` defers to `filters.default_min_rating`
    #[serde(default)]
    pub min_rating: Option<f64>,
    #[serde(default)]
    pub blocked_keywords: Vec<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub subcategory: Option<String>,
    #[serde(default)]
    pub min_commission: Option<f64>,
    #[serde(default)]
    pub min_score: Option<f64>,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            catalog_entry_ids: Vec::new(),
            keywords: Vec::new(),
            limit: 5,
            min_rating: None,
            blocked_keywords: Vec::new(),
            category: None,
            subcategory: None,
            min_commission: None,
            min_score: None,
        }
    }
}

impl JobConfig {
    pub fn uses_catalog(&self) -> bool {
        !self.catalog_entry_ids.is_empty()
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.catalog_entry_ids.is_empty()
            && self.keywords.iter().all(|k| k.trim().is_empty())
        {
            return Err(ValidationError::MissingField(
                "catalog_entry_ids or keywords".to_string(),
            ));
        }
        if self.limit == 0 {
            return Err(ValidationError::InvalidFieldValue {
                field: "limit".to_string(),
                reason: "must be greater than 0".to_string(),
            });
        }
        if let Some(min_rating) = self.min_rating {
            if !(0.0..=5.0).contains(&min_rating) {
                return Err(ValidationError::InvalidFieldValue {
                    field: "min_rating".to_string(),
                    reason: format!("{} is outside 0..=5", min_rating),
                });
            }
        }
        for (field, value) in [
            ("min_commission", self.min_commission),
            ("min_score", self.min_score),
        ] {
            if matches!(value, Some(v) if v < 0.0 || !v.is_finite()) {
                return Err(ValidationError::InvalidFieldValue {
                    field: field.to_string(),
                    reason: "must be a non-negative number".to_string(),
                });
            }
        }
        if self.subcategory.is_some() && self.category.is_none() {
            return Err(ValidationError::ConstraintViolation(
                "subcategory requires a category".to_string(),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// Integration Models
// ============================================================================

/// Marketplaces an integration can point at
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MarketplaceKind {
    Shopee,
    MercadoLivre,
    Amazon,
    Magalu,
}

impl std::fmt::Display for MarketplaceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MarketplaceKind::Shopee => write!(f, "shopee"),
            MarketplaceKind::MercadoLivre => write!(f, "mercado_livre"),
            MarketplaceKind::Amazon => write!(f, "amazon"),
            MarketplaceKind::Magalu => write!(f, "magalu"),
        }
    }
}

impl FromStr for MarketplaceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "shopee" => Ok(MarketplaceKind::Shopee),
            "mercado_livre" => Ok(MarketplaceKind::MercadoLivre),
            "amazon" => Ok(MarketplaceKind::Amazon),
            "magalu" => Ok(MarketplaceKind::Magalu),
            _ => Err(format!("Invalid marketplace: {}", s)),
        }
    }
}

/// Credentials per marketplace, one variant per integration type
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IntegrationCredentials {
    Shopee {
        app_id: String,
        secret: String,
        #[serde(default)]
        affiliate_id: Option<String>,
    },
    MercadoLivre {
        client_id: String,
        client_secret: String,
    },
    Amazon {
        access_key: String,
        secret_key: String,
        partner_tag: String,
    },
    Magalu {
        partner_id: String,
    },
}

impl IntegrationCredentials {
    pub fn marketplace(&self) -> MarketplaceKind {
        match self {
            IntegrationCredentials::Shopee { .. } => MarketplaceKind::Shopee,
            IntegrationCredentials::MercadoLivre { .. } => MarketplaceKind::MercadoLivre,
            IntegrationCredentials::Amazon { .. } => MarketplaceKind::Amazon,
            IntegrationCredentials::Magalu { .. } => MarketplaceKind::Magalu,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        let required: Vec<(&str, &str)> = match self {
            IntegrationCredentials::Shopee { app_id, secret, .. } => {
                vec![("app_id", app_id), ("secret", secret)]
            }
            IntegrationCredentials::MercadoLivre {
                client_id,
                client_secret,
            } => vec![("client_id", client_id), ("client_secret", client_secret)],
            IntegrationCredentials::Amazon {
                access_key,
                secret_key,
                partner_tag,
            } => vec![
                ("access_key", access_key),
                ("secret_key", secret_key),
                ("partner_tag", partner_tag),
            ],
            IntegrationCredentials::Magalu { partner_id } => vec![("partner_id", partner_id)],
        };

        match required.into_iter().find(|(_, value)| value.trim().is_empty()) {
            Some((field, _)) => Err(ValidationError::MissingField(field.to_string())),
            None => Ok(()),
        }
    }
}

/// A marketplace account used by jobs to search
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Integration {
    pub id: Uuid,
    pub name: String,
    pub credentials: IntegrationCredentials,
    pub is_active: bool,
}

// ============================================================================
// Channel Models
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ChannelType {
    Telegram,
    Whatsapp,
    Instagram,
    Facebook,
}

impl ChannelType {
    /// Markup understood by the channel's API
    pub fn markup_format(&self) -> MarkupFormat {
        match self {
            ChannelType::Telegram => MarkupFormat::Html,
            ChannelType::Whatsapp => MarkupFormat::WhatsApp,
            ChannelType::Instagram | ChannelType::Facebook => MarkupFormat::Plain,
        }
    }
}

impl std::fmt::Display for ChannelType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelType::Telegram => write!(f, "telegram"),
            ChannelType::Whatsapp => write!(f, "whatsapp"),
            ChannelType::Instagram => write!(f, "instagram"),
            ChannelType::Facebook => write!(f, "facebook"),
        }
    }
}

impl FromStr for ChannelType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "telegram" => Ok(ChannelType::Telegram),
            "whatsapp" => Ok(ChannelType::Whatsapp),
            "instagram" => Ok(ChannelType::Instagram),
            "facebook" => Ok(ChannelType::Facebook),
            _ => Err(format!("Invalid channel type: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MarkupFormat {
    Html,
    WhatsApp,
    Plain,
}

/// An outbound destination (a chat, a group, a page)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Channel {
    pub id: Uuid,
    pub name: String,
    pub channel_type: ChannelType,
    /// Chat id, phone, page id, depending on the type
    pub address: String,
    pub is_active: bool,
}

// ============================================================================
// Catalog Models
// ============================================================================

/// Operator-registered product name, used as search keyword and copy anchor
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CatalogEntry {
    pub id: Uuid,
    pub name: String,
    pub channel_id: Uuid,
    pub category: Option<String>,
    pub subcategory: Option<String>,
}

impl CatalogEntry {
    pub fn matches_keyword(&self, keyword: &str) -> bool {
        self.name.trim().to_lowercase() == keyword.trim().to_lowercase()
    }
}

/// Promotional hook text
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CopyEntry {
    pub id: Uuid,
    pub text: String,
    pub category: Option<String>,
    pub subcategory: Option<String>,
    pub is_active: bool,
}

// ============================================================================
// Pipeline Models
// ============================================================================

/// An item returned by a marketplace search, valid for one run only
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Candidate {
    pub item_id: String,
    pub name: String,
    pub price: f64,
    pub original_price: Option<f64>,
    pub link: String,
    pub rating: Option<f64>,
    pub image_url: Option<String>,
    /// Category declared by the caller of the search
    pub category: Option<String>,
    pub subcategory: Option<String>,
    /// Category guessed from the item name; informational only
    pub inferred_category: Option<String>,
    pub commission: f64,
    pub score: f64,
}

impl Candidate {
    /// Original price worth showing as a "from" price
    pub fn discounted_from(&self) -> Option<f64> {
        self.original_price.filter(|original| *original > self.price)
    }
}

/// Ledger entry for an item that was already promoted
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheRecord {
    pub price: f64,
    pub original_price: Option<f64>,
    pub sent_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub used_copy_ids: BTreeSet<Uuid>,
}

impl CacheRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}
