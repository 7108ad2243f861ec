// Promotional copy selection

use crate::errors::StorageError;
use crate::models::{CatalogEntry, CopyEntry};
use crate::store::CatalogStore;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use tracing::{debug, instrument};
use uuid::Uuid;

/// Uniform pick among active copies not in `exclude`:
/// linked copies first, then the category-generic pool, else nothing.
pub fn choose_copy<R: Rng + ?Sized>(
    linked: &[CopyEntry],
    generic: &[CopyEntry],
    exclude: &BTreeSet<Uuid>,
    rng: &mut R,
) -> Option<CopyEntry> {
    pick_eligible(linked, exclude, rng).or_else(|| pick_eligible(generic, exclude, rng))
}

fn pick_eligible<R: Rng + ?Sized>(
    pool: &[CopyEntry],
    exclude: &BTreeSet<Uuid>,
    rng: &mut R,
) -> Option<CopyEntry> {
    let eligible: Vec<&CopyEntry> = pool
        .iter()
        .filter(|copy| copy.is_active && !exclude.contains(&copy.id))
        .collect();
    eligible.choose(rng).map(|copy| (*copy).clone())
}

/// Picks the promotional hook for an item. The random source is injectable.
pub struct CopySelector {
    catalog: Arc<dyn CatalogStore>,
    rng: Mutex<StdRng>,
}

impl CopySelector {
    pub fn new(catalog: Arc<dyn CatalogStore>) -> Self {
        Self::with_rng(catalog, StdRng::from_entropy())
    }

    pub fn with_seed(catalog: Arc<dyn CatalogStore>, seed: u64) -> Self {
        Self::with_rng(catalog, StdRng::seed_from_u64(seed))
    }

    pub fn with_rng(catalog: Arc<dyn CatalogStore>, rng: StdRng) -> Self {
        Self {
            catalog,
            rng: Mutex::new(rng),
        }
    }

    fn pick_from(&self, linked: &[CopyEntry], generic: &[CopyEntry], exclude: &BTreeSet<Uuid>) -> Option<CopyEntry> {
        let mut rng = self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        choose_copy(linked, generic, exclude, &mut *rng)
    }

    /// Copy for a matched catalog entry, never one whose id is in `exclude`.
    ///
    /// `None` means the message goes out without a hook.
    #[instrument(skip(self, entry, exclude), fields(catalog_entry_id = %entry.id))]
    pub async fn select(
        &self,
        entry: &CatalogEntry,
        exclude: &BTreeSet<Uuid>,
    ) -> Result<Option<CopyEntry>, StorageError> {
        let linked = self.catalog.linked_copies(entry.id).await?;
        if let Some(copy) = self.pick_from(&linked, &[], exclude) {
            debug!(copy_id = %copy.id, "Selected catalog-linked copy");
            return Ok(Some(copy));
        }

        let Some(category) = entry.category.as_deref() else {
            debug!("No eligible linked copy and entry has no category");
            return Ok(None);
        };

        let generic = self.catalog.scoped_copies(category, None).await?;
        let chosen = self.pick_from(&[], &generic, exclude);
        match &chosen {
            Some(copy) => debug!(copy_id = %copy.id, category, "Selected category copy"),
            None => debug!(category, "No eligible copy"),
        }
        Ok(chosen)
    }

    /// Ad-hoc selection by scope without exclusion tracking:
    /// category+subcategory copies first, then category-only copies.
    #[instrument(skip(self))]
    pub async fn select_for_scope(
        &self,
        category: &str,
        subcategory: Option<&str>,
    ) -> Result<Option<CopyEntry>, StorageError> {
        let none = BTreeSet::new();

        if let Some(subcategory) = subcategory {
            let scoped = self.catalog.scoped_copies(category, Some(subcategory)).await?;
            if let Some(copy) = self.pick_from(&scoped, &[], &none) {
                return Ok(Some(copy));
            }
        }

        let generic = self.catalog.scoped_copies(category, None).await?;
        Ok(self.pick_from(&generic, &[], &none))
    }
}
