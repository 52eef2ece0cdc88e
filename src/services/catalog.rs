// src/services/catalog.rs

//! Command-layer operations: search and saved-search management.

use chrono::Utc;

use crate::error::{AppError, Result};
use crate::models::{
    Config, InventoryItem, NewSubscription, SearchCriteria, Subscription, constrained,
};
use crate::services::resolver::QueryResolver;
use crate::storage::InventoryStore;

/// Facade the interactive layer talks to.
pub struct Catalog {
    store: InventoryStore,
    resolver: QueryResolver,
}

impl Catalog {
    pub fn new(config: &Config, store: InventoryStore) -> Self {
        Self {
            store,
            resolver: QueryResolver::from_config(config),
        }
    }

    pub fn resolver(&self) -> &QueryResolver {
        &self.resolver
    }

    /// Items matching the criteria, most recently discovered first.
    pub fn search(&self, criteria: &SearchCriteria) -> Result<Vec<InventoryItem>> {
        let query = self.resolver.resolve(criteria)?;
        self.store.query(&query)
    }

    /// Validate, normalize and store a saved search.
    pub fn save_subscription(
        &self,
        owner: &str,
        criteria: &SearchCriteria,
        notes: Option<&str>,
    ) -> Result<Subscription> {
        let sub = self.normalize(owner, criteria, notes)?;
        self.store.insert_subscription(&sub, Utc::now())
    }

    pub fn delete_subscription(&self, id: i64) -> Result<()> {
        self.store.delete_subscription(id)
    }

    /// An owner's saved searches, optionally only those for one location filter.
    pub fn list_subscriptions(&self, owner: &str, location: Option<&str>) -> Result<Vec<Subscription>> {
        let location = constrained(location)
            .map(|l| self.resolver.registry().resolve_location(l).to_string());
        self.store.subscriptions_for(owner, location.as_deref())
    }

    /// Bring criteria into the stored form, so equal searches compare equal.
    fn normalize(
        &self,
        owner: &str,
        criteria: &SearchCriteria,
        notes: Option<&str>,
    ) -> Result<NewSubscription> {
        let owner = owner.trim();
        if owner.is_empty() {
            return Err(AppError::validation("owner must not be empty"));
        }

        // Run the full resolution once so bad input fails here, not in a later cycle.
        let query = self.resolver.resolve(criteria)?;
        let make = self
            .resolver
            .canonical_make(criteria.make.as_deref())?
            .map(str::to_string);
        let model = constrained(criteria.model.as_deref())
            .map(|m| m.split_whitespace().collect::<Vec<_>>().join(" ").to_uppercase());
        let year = constrained(criteria.year.as_deref())
            .map(|y| y.chars().filter(|c| !c.is_whitespace()).collect::<String>())
            .filter(|_| !query.years.is_empty());

        Ok(NewSubscription {
            owner: owner.to_string(),
            location: query.locations.to_string(),
            make,
            model,
            year,
            status: query.status.as_str().to_string(),
            notes: notes.map(str::trim).unwrap_or_default().to_string(),
        })
    }
}
