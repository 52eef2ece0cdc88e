// src/services/matcher.rs

//! Subscription matching and batched delivery.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use unicode_segmentation::UnicodeSegmentation;

use crate::error::{AppError, Result};
use crate::models::{Config, InventoryItem, InventoryQuery, NotifyConfig, StatusFilter};
use crate::services::notifier::{NotificationBatch, NotificationEntry, Notifier, grapheme_len};
use crate::services::resolver::{LocationRegistry, QueryResolver};
use crate::storage::InventoryStore;

const ELLIPSIS: &str = "…";

/// Splits a result set into delivery units under a size and count ceiling.
#[derive(Debug, Clone, Copy)]
pub struct Batcher {
    max_chars: usize,
    max_entries: usize,
}

impl Batcher {
    pub fn new(max_chars: usize, max_entries: usize) -> Self {
        Self {
            max_chars,
            max_entries: max_entries.max(1),
        }
    }

    pub fn from_config(config: &NotifyConfig) -> Self {
        Self::new(config.max_batch_chars, config.max_batch_entries)
    }

    /// Split `entries` in order. Every entry lands in exactly one batch.
    pub fn batch(
        &self,
        title: &str,
        description: &str,
        entries: Vec<NotificationEntry>,
    ) -> Vec<NotificationBatch> {
        let title = truncate(title, self.max_chars / 4);
        let header = grapheme_len(&title) + grapheme_len(description);
        let budget = self.max_chars.saturating_sub(header);

        let mut batches = Vec::new();
        let mut current: Vec<NotificationEntry> = Vec::new();
        let mut current_chars = 0;

        for entry in entries {
            let entry = fit_entry(entry, budget);
            let len = entry.char_len();
            if !current.is_empty()
                && (current.len() >= self.max_entries || current_chars + len > budget)
            {
                batches.push(NotificationBatch {
                    title: title.clone(),
                    description: description.to_string(),
                    entries: std::mem::take(&mut current),
                });
                current_chars = 0;
            }
            current_chars += len;
            current.push(entry);
        }

        if !current.is_empty() {
            batches.push(NotificationBatch {
                title,
                description: description.to_string(),
                entries: current,
            });
        }
        batches
    }
}

fn truncate(text: &str, max: usize) -> String {
    if grapheme_len(text) <= max {
        return text.to_string();
    }
    let mut out: String = text.graphemes(true).take(max.saturating_sub(1)).collect();
    out.push_str(ELLIPSIS);
    out
}

/// Shorten an entry that could never fit in a batch on its own.
fn fit_entry(entry: NotificationEntry, budget: usize) -> NotificationEntry {
    if entry.char_len() <= budget {
        return entry;
    }
    let name = truncate(&entry.name, budget / 2);
    let value = truncate(&entry.value, budget.saturating_sub(grapheme_len(&name)));
    NotificationEntry { name, value }
}

/// Item line in the `MAKE MODEL (YEAR)` / yard and dates layout.
pub fn format_entry(item: &InventoryItem, registry: &LocationRegistry) -> NotificationEntry {
    NotificationEntry {
        name: item.label(),
        value: format!(
            "Yard: {}, Row: {}\nFirst Seen: {}\nLast Updated: {}",
            registry.name(item.location_id).unwrap_or("Unknown Yard"),
            item.row_number,
            item.first_seen.format("%B %-d, %Y"),
            item.last_seen.format("%B %-d, %Y"),
        ),
    }
}

/// Outcome of one notification cycle.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub subscriptions: usize,
    pub delivered: usize,
    pub failed: usize,
    pub skipped: usize,
    /// NEW items reported on the broadcast path
    pub broadcast: usize,
}

/// Re-runs every saved search against the store and delivers the results.
///
/// Store calls run on the blocking pool so SQLite never stalls the runtime.
pub struct SubscriptionMatcher {
    store: InventoryStore,
    resolver: QueryResolver,
    notifier: Arc<dyn Notifier>,
    batcher: Batcher,
    broadcast_lookback: Duration,
}

impl SubscriptionMatcher {
    pub fn new(config: &Config, store: InventoryStore, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            store,
            resolver: QueryResolver::from_config(config),
            notifier,
            batcher: Batcher::from_config(&config.notify),
            broadcast_lookback: Duration::hours(config.notify.broadcast_lookback_hours as i64),
        }
    }

    async fn blocking<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&InventoryStore) -> Result<T> + Send + 'static,
    {
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || op(&store))
            .await
            .map_err(|e| AppError::storage(format!("store task stopped: {e}")))?
    }

    pub async fn run_cycle(&self, now: DateTime<Utc>) -> Result<CycleReport> {
        let subscriptions = self.blocking(|store| store.all_subscriptions()).await?;
        let mut report = CycleReport {
            subscriptions: subscriptions.len(),
            ..CycleReport::default()
        };

        for sub in &subscriptions {
            let query = match self.resolver.resolve(&sub.criteria()) {
                Ok(query) => query,
                Err(e) => {
                    log::warn!("Skipping subscription {} of {}: {}", sub.id, sub.owner, e);
                    report.skipped += 1;
                    continue;
                }
            };

            let location = self.resolver.registry().label(&query.locations);
            let items = match self.blocking(move |store| store.query(&query)).await {
                Ok(items) => items,
                Err(e) => {
                    log::error!("Query for subscription {} failed: {}", sub.id, e);
                    report.failed += 1;
                    continue;
                }
            };
            if items.is_empty() {
                log::debug!("Subscription {} has no matches", sub.id);
                continue;
            }

            let title = format!("Daily Search Results for {}", sub.describe(&location));
            let batches = self.batches(&title, &items);

            match self.notifier.deliver_to_owner(&sub.owner, &batches).await {
                Ok(()) => {
                    log::info!(
                        "Sent {} item(s) in {} batch(es) to {}",
                        items.len(),
                        batches.len(),
                        sub.owner
                    );
                    report.delivered += 1;
                    let id = sub.id;
                    if let Err(e) = self.blocking(move |store| store.mark_notified(id, now)).await {
                        log::warn!("Could not record delivery for subscription {}: {}", sub.id, e);
                    }
                }
                Err(e) => {
                    log::warn!("Delivery for subscription {} failed: {}", sub.id, e);
                    report.failed += 1;
                }
            }
        }

        self.broadcast_new(now, &mut report).await;

        log::info!(
            "Match cycle: {} subscription(s), {} delivered, {} failed, {} skipped, {} new item(s) broadcast",
            report.subscriptions,
            report.delivered,
            report.failed,
            report.skipped,
            report.broadcast
        );
        Ok(report)
    }

    /// Broadcast NEW items first seen since the last successful broadcast.
    ///
    /// The marker only advances after a delivery or an empty window.
    async fn broadcast_new(&self, now: DateTime<Utc>, report: &mut CycleReport) {
        let since = match self.blocking(|store| store.last_broadcast()).await {
            Ok(Some(at)) => at,
            Ok(None) => now - self.broadcast_lookback,
            Err(e) => {
                log::error!("Could not read the last broadcast time: {e}");
                report.failed += 1;
                return;
            }
        };

        let query = InventoryQuery {
            status: StatusFilter::New,
            first_seen_after: Some(since),
            ..InventoryQuery::default()
        };
        let items = match self.blocking(move |store| store.query(&query)).await {
            Ok(items) => items,
            Err(e) => {
                log::error!("New-arrivals query failed: {e}");
                report.failed += 1;
                return;
            }
        };

        if !items.is_empty() {
            let batches = self.batches("New arrivals", &items);
            if let Err(e) = self.notifier.deliver_to_broadcast(&batches).await {
                log::warn!("Broadcast delivery failed: {e}");
                report.failed += 1;
                return;
            }
            report.broadcast = items.len();
        }

        if let Err(e) = self.blocking(move |store| store.record_broadcast(now)).await {
            log::warn!("Could not record the broadcast time: {e}");
        }
    }

    fn batches(&self, title: &str, items: &[InventoryItem]) -> Vec<NotificationBatch> {
        let registry = self.resolver.registry();
        let entries = items.iter().map(|item| format_entry(item, registry)).collect();
        self.batcher
            .batch(title, &format!("Results found: {}", items.len()), entries)
    }
}
