// src/pipeline/notify.rs

//! Match job: re-run saved searches and deliver results.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use crate::error::Result;
use crate::models::Config;
use crate::services::{CycleReport, Notifier, SubscriptionMatcher};
use crate::storage::InventoryStore;
use crate::utils::log;

/// Run one notification cycle over every subscription.
pub async fn run_match_cycle(
    config: &Config,
    store: &InventoryStore,
    notifier: Arc<dyn Notifier>,
) -> Result<CycleReport> {
    log::header("Notification cycle");
    let matcher = SubscriptionMatcher::new(config, store.clone(), notifier);
    matcher.run_cycle(Utc::now()).await
}

/// Whether the store was refreshed within `max_age` of `now`.
pub fn is_fresh(store: &InventoryStore, max_age: Duration, now: DateTime<Utc>) -> Result<bool> {
    Ok(match store.latest_refresh()? {
        Some(refreshed) => now - refreshed <= max_age,
        None => false,
    })
}

/// Run the cycle only when the store holds fresh data.
pub async fn run_guarded_match_cycle(
    config: &Config,
    store: &InventoryStore,
    notifier: Arc<dyn Notifier>,
) -> Result<Option<CycleReport>> {
    let max_age = Duration::minutes(config.notify.freshness_minutes as i64);
    if !is_fresh(store, max_age, Utc::now())? {
        log::warn!(
            "Inventory not refreshed in the last {} minute(s); skipping notifications",
            config.notify.freshness_minutes
        );
        return Ok(None);
    }
    run_match_cycle(config, store, notifier).await.map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ObservedItem, SessionId};

    #[test]
    fn test_freshness_window() {
        let store = InventoryStore::open_in_memory().unwrap();
        let now = Utc::now();
        assert!(!is_fresh(&store, Duration::minutes(30), now).unwrap());

        store
            .upsert(
                &ObservedItem {
                    location_id: 1020,
                    make: "FORD".into(),
                    model: "F150".into(),
                    year: 2004,
                    row_number: 1,
                    session_id: SessionId::new("S1").unwrap(),
                },
                now - Duration::minutes(10),
            )
            .unwrap();
        assert!(is_fresh(&store, Duration::minutes(30), now).unwrap());
        assert!(!is_fresh(&store, Duration::minutes(5), now).unwrap());
    }
}
