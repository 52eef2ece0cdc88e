// src/pipeline/crawl.rs

//! Crawl job: walk the configured sites and reconcile the store.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use crate::error::{AppError, Result};
use crate::models::{Config, SessionId, SiteAdapter};
use crate::services::{CrawlEvent, CrawlTarget, InventoryCrawler, SessionFactory, WalkOutcome};
use crate::storage::{InventoryStore, UpsertOutcome};
use crate::utils::log;

use super::retry::{RetryPolicy, retry_with_backoff};

/// Summary of one crawl job.
#[derive(Debug, Clone)]
pub struct CrawlReport {
    pub session: SessionId,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub walk: WalkOutcome,
    pub inserted: usize,
    pub refreshed: usize,
    pub swept: usize,
    pub failed_writes: usize,
    pub failed_sites: Vec<String>,
}

#[derive(Debug, Default)]
struct WriteStats {
    inserted: usize,
    refreshed: usize,
    swept: usize,
    failed_writes: usize,
}

/// Run the crawl for every configured site (or just `site_name`).
///
/// Each site walk is retried per the crawler's retry policy; a site that
/// keeps failing is reported and the remaining sites still run.
pub async fn run_crawl(
    config: Arc<Config>,
    store: &InventoryStore,
    factory: Arc<dyn SessionFactory>,
    session: &SessionId,
    target: &CrawlTarget,
    site_name: Option<&str>,
) -> Result<CrawlReport> {
    let start_time = Utc::now();
    let sites = select_sites(&config, site_name)?;

    log::header(&format!("Crawl session {session}"));

    let (tx, rx) = mpsc::channel(config.crawler.channel_capacity.max(1));
    let writer_store = store.clone();
    let writer = tokio::task::spawn_blocking(move || drain(&writer_store, rx));

    let crawler = InventoryCrawler::new(Arc::clone(&config), factory);
    let policy = RetryPolicy::from_config(&config.crawler);
    let mut walk = WalkOutcome::default();
    let mut failed_sites = Vec::new();

    for (i, site) in sites.iter().enumerate() {
        log::step(i + 1, sites.len(), &format!("Walking {}", site.name));
        let label = format!("Crawl of {}", site.name);
        match retry_with_backoff(&label, policy, || crawler.crawl(site, target, session, &tx)).await
        {
            Ok(outcome) => walk.absorb(outcome),
            Err(e) => {
                log::error!("Giving up on {}: {}", site.name, e);
                failed_sites.push(site.name.clone());
            }
        }
    }

    drop(tx);
    let stats = writer
        .await
        .map_err(|e| AppError::storage(format!("store writer stopped: {e}")))?;

    let report = CrawlReport {
        session: session.clone(),
        start_time,
        end_time: Utc::now(),
        walk,
        inserted: stats.inserted,
        refreshed: stats.refreshed,
        swept: stats.swept,
        failed_writes: stats.failed_writes,
        failed_sites,
    };

    log::summary(
        "Crawl",
        &[
            ("Session", report.session.to_string()),
            ("Observed", report.walk.observed.to_string()),
            ("Inserted", report.inserted.to_string()),
            ("Refreshed", report.refreshed.to_string()),
            ("Marked inactive", report.swept.to_string()),
            (
                "Failed combinations",
                report.walk.failed_combinations.to_string(),
            ),
            ("Failed sites", report.failed_sites.join(", ")),
            (
                "Duration",
                format!("{}s", (report.end_time - report.start_time).num_seconds()),
            ),
        ],
    );

    Ok(report)
}

fn select_sites<'a>(config: &'a Config, site_name: Option<&str>) -> Result<Vec<&'a SiteAdapter>> {
    match site_name {
        Some(name) => config
            .site(name)
            .map(|site| vec![site])
            .ok_or_else(|| AppError::config(format!("unknown site '{name}'"))),
        None => Ok(config.sites.iter().collect()),
    }
}

/// Apply crawl events in arrival order. Runs on a blocking thread.
///
/// A location with a failed upsert skips its next sweep, so a lost write
/// never turns into a false INACTIVE.
fn drain(store: &InventoryStore, mut rx: mpsc::Receiver<CrawlEvent>) -> WriteStats {
    let mut stats = WriteStats::default();
    let mut unsafe_to_sweep: HashSet<u32> = HashSet::new();

    while let Some(event) = rx.blocking_recv() {
        match event {
            CrawlEvent::Observed(item) => match store.upsert(&item, Utc::now()) {
                Ok(UpsertOutcome::Inserted) => stats.inserted += 1,
                Ok(UpsertOutcome::Refreshed(_)) => stats.refreshed += 1,
                Err(e) => {
                    log::error!(
                        "Upsert of {} {} ({}) at {} failed: {}",
                        item.make,
                        item.model,
                        item.year,
                        item.location_id,
                        e
                    );
                    stats.failed_writes += 1;
                    unsafe_to_sweep.insert(item.location_id);
                }
            },
            CrawlEvent::LocationComplete(scope) => {
                if unsafe_to_sweep.remove(&scope.location_id) {
                    log::warn!(
                        "Skipping sweep of location {} after failed writes",
                        scope.location_id
                    );
                    continue;
                }
                match store.sweep_inactive(&scope) {
                    Ok(count) => stats.swept += count,
                    Err(e) => log::error!("Sweep of location {} failed: {}", scope.location_id, e),
                }
            }
        }
    }
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{InventoryQuery, ItemStatus, ObservedItem, StatusFilter};
    use crate::storage::SweepScope;

    fn item(model: &str, row: i64, session: &str) -> ObservedItem {
        ObservedItem {
            location_id: 1020,
            make: "FORD".into(),
            model: model.into(),
            year: 2000,
            row_number: row,
            session_id: SessionId::new(session).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_drain_applies_upserts_before_sweep() {
        let store = InventoryStore::open_in_memory().unwrap();
        store.upsert(&item("RANGER", 1, "S0"), Utc::now()).unwrap();

        let (tx, rx) = mpsc::channel(8);
        let writer_store = store.clone();
        let writer = tokio::task::spawn_blocking(move || drain(&writer_store, rx));

        let s1 = SessionId::new("S1").unwrap();
        tx.send(CrawlEvent::Observed(item("F150", 2, "S1"))).await.unwrap();
        tx.send(CrawlEvent::Observed(item("F250", 3, "S1"))).await.unwrap();
        tx.send(CrawlEvent::LocationComplete(SweepScope::location(1020, s1)))
            .await
            .unwrap();
        drop(tx);

        let stats = writer.await.unwrap();
        assert_eq!((stats.inserted, stats.swept), (2, 1));

        let gone = store
            .query(&InventoryQuery {
                status: StatusFilter::Inactive,
                ..InventoryQuery::default()
            })
            .unwrap();
        assert_eq!(gone.len(), 1);
        assert_eq!(gone[0].model, "RANGER");
        assert_eq!(gone[0].status, ItemStatus::Inactive);
    }

    #[test]
    fn test_select_sites() {
        let config = Config::default();
        assert_eq!(select_sites(&config, None).unwrap().len(), 2);
        assert_eq!(select_sites(&config, Some("TRUSTY")).unwrap()[0].name, "trusty");
        assert!(select_sites(&config, Some("nowhere")).is_err());
    }
}
