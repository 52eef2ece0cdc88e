//! End-to-end lifecycle: crawl a scripted site, sweep, match and deliver.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use yardwatch::error::{AppError, Result};
use yardwatch::models::{
    Config, FormControl, ItemStatus, ObservedItem, SearchCriteria, SessionId, SiteAdapter,
};
use yardwatch::pipeline::{run_crawl, run_match_cycle};
use yardwatch::services::{
    Catalog, CrawlTarget, FormOption, NotificationBatch, Notifier, ResultRow, SessionFactory,
    SiteSession,
};
use yardwatch::storage::InventoryStore;

type Listing = BTreeMap<String, BTreeMap<String, Vec<ResultRow>>>;

/// Yard listing shared by every session the factory opens.
#[derive(Clone, Default)]
struct FakeSite(Arc<Mutex<Listing>>);

impl FakeSite {
    fn stock(&self, location: &str, make: &str, rows: Vec<ResultRow>) {
        self.0
            .lock()
            .unwrap()
            .entry(location.to_string())
            .or_default()
            .insert(make.to_string(), rows);
    }
}

struct FakeSession {
    site: FakeSite,
    location: Option<String>,
    make: Option<String>,
}

#[async_trait]
impl SessionFactory for FakeSite {
    async fn open(&self, _site: &SiteAdapter) -> Result<Box<dyn SiteSession>> {
        Ok(Box::new(FakeSession {
            site: self.clone(),
            location: None,
            make: None,
        }))
    }
}

#[async_trait]
impl SiteSession for FakeSession {
    async fn load(&mut self) -> Result<()> {
        Ok(())
    }

    async fn select(&mut self, control: FormControl, value: &str) -> Result<()> {
        match control {
            FormControl::Location => self.location = Some(value.to_string()),
            FormControl::Make => self.make = Some(value.to_string()),
            FormControl::Model => {}
        }
        Ok(())
    }

    async fn options(&mut self, control: FormControl) -> Result<Vec<FormOption>> {
        let listing = self.site.0.lock().unwrap();
        Ok(match control {
            FormControl::Location => listing
                .keys()
                .map(|id| FormOption::new(id.as_str(), format!("Yard {id}")))
                .collect(),
            FormControl::Make => self
                .location
                .as_ref()
                .and_then(|loc| listing.get(loc))
                .map(|makes| {
                    makes
                        .keys()
                        .map(|m| FormOption::new(m.as_str(), m.as_str()))
                        .collect()
                })
                .unwrap_or_default(),
            FormControl::Model => Vec::new(),
        })
    }

    async fn submit(&mut self) -> Result<()> {
        Ok(())
    }

    async fn result_rows(&mut self) -> Result<Vec<ResultRow>> {
        let listing = self.site.0.lock().unwrap();
        Ok(self
            .location
            .as_ref()
            .zip(self.make.as_ref())
            .and_then(|(loc, make)| listing.get(loc)?.get(make))
            .cloned()
            .unwrap_or_default())
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Records every delivered batch.
#[derive(Default)]
struct RecordingNotifier {
    owners: Mutex<Vec<(String, Vec<NotificationBatch>)>>,
    broadcasts: Mutex<Vec<NotificationBatch>>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn deliver_to_owner(&self, owner: &str, batches: &[NotificationBatch]) -> Result<()> {
        self.owners
            .lock()
            .unwrap()
            .push((owner.to_string(), batches.to_vec()));
        Ok(())
    }

    async fn deliver_to_broadcast(&self, batches: &[NotificationBatch]) -> Result<()> {
        self.broadcasts.lock().unwrap().extend_from_slice(batches);
        Ok(())
    }
}

fn test_config() -> Arc<Config> {
    let mut config = Config::default();
    config.crawler.request_delay_ms = 0;
    config.crawler.retry_delay_secs = 0;
    Arc::new(config)
}

fn row(year: &str, make: &str, model: &str, row: &str) -> ResultRow {
    ResultRow::new([year, make, model, row])
}

/// Row number from a formatted `Yard: .., Row: N` entry.
fn row_of(value: &str) -> i64 {
    let (_, rest) = value.split_once("Row: ").unwrap();
    rest.lines().next().unwrap().parse().unwrap()
}

#[tokio::test]
async fn test_crawl_sweep_and_subscription_lifecycle() {
    let config = test_config();
    let store = InventoryStore::open_in_memory().unwrap();
    let site = FakeSite::default();
    site.stock(
        "1020",
        "FORD",
        vec![
            row("2004", "FORD", "F150", "12"),
            row("1999", "FORD", "RANGER", "3"),
        ],
    );
    let factory: Arc<dyn SessionFactory> = Arc::new(site.clone());

    let s1 = SessionId::new("S1").unwrap();
    let first = run_crawl(
        Arc::clone(&config),
        &store,
        Arc::clone(&factory),
        &s1,
        &CrawlTarget::any(),
        Some("jalopyjungle"),
    )
    .await
    .unwrap();
    assert_eq!(first.inserted, 2);
    assert_eq!(first.swept, 0);
    assert!(first.failed_sites.is_empty());

    let catalog = Catalog::new(&config, store.clone());
    let f150 = SearchCriteria::new("BOISE").make("ford").model("f150");
    let found = catalog.search(&f150).unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].status, ItemStatus::New);
    assert_eq!(found[0].row_number, 12);

    // The F150 leaves the yard before the next walk.
    site.stock("1020", "FORD", vec![row("1999", "FORD", "RANGER", "3")]);
    let s2 = SessionId::new("S2").unwrap();
    let second = run_crawl(
        Arc::clone(&config),
        &store,
        factory,
        &s2,
        &CrawlTarget::any(),
        Some("jalopyjungle"),
    )
    .await
    .unwrap();
    assert_eq!((second.inserted, second.refreshed, second.swept), (0, 1, 1));

    assert!(catalog.search(&f150).unwrap().is_empty());
    let gone = catalog.search(&f150.clone().status("inactive")).unwrap();
    assert_eq!(gone.len(), 1);
    assert_eq!(gone[0].status, ItemStatus::Inactive);

    let ranger = catalog
        .search(&SearchCriteria::new("ALL").model("ranger"))
        .unwrap();
    assert_eq!(ranger.len(), 1);
    assert_ne!(ranger[0].status, ItemStatus::Inactive);

    let saved = catalog
        .save_subscription("alice", &f150, Some("for the tailgate"))
        .unwrap();
    assert_eq!(saved.location, "1020");
    assert_eq!(saved.make.as_deref(), Some("FORD"));
    let same = SearchCriteria::new("boise").make("Ford").model("F150");
    assert!(matches!(
        catalog.save_subscription("alice", &same, None),
        Err(AppError::AlreadyExists)
    ));
    assert_eq!(catalog.list_subscriptions("alice", None).unwrap().len(), 1);

    // Same filters watching for departures: only this one sees the swept F150.
    let departed = catalog
        .save_subscription("alice", &f150.clone().status("inactive"), None)
        .unwrap();
    let notifier = Arc::new(RecordingNotifier::default());
    let report = run_match_cycle(&config, &store, notifier.clone()).await.unwrap();
    assert_eq!((report.subscriptions, report.delivered, report.failed), (2, 1, 0));

    let owners = notifier.owners.lock().unwrap().clone();
    assert_eq!(owners.len(), 1);
    let (owner, batches) = &owners[0];
    assert_eq!(owner, "alice");
    let names: Vec<&str> = batches
        .iter()
        .flat_map(|b| &b.entries)
        .map(|e| e.name.as_str())
        .collect();
    assert_eq!(names, vec!["FORD F150 (2004)"]);
    assert!(store.get_subscription(departed.id).unwrap().last_notified.is_some());
    assert!(store.get_subscription(saved.id).unwrap().last_notified.is_none());
    catalog.delete_subscription(departed.id).unwrap();

    catalog.delete_subscription(saved.id).unwrap();
    assert!(matches!(
        catalog.delete_subscription(saved.id),
        Err(AppError::NotFound { .. })
    ));
}

#[tokio::test]
async fn test_match_cycle_batches_large_result_sets() {
    let config = test_config();
    let store = InventoryStore::open_in_memory().unwrap();
    let session = SessionId::new("S1").unwrap();
    let now = Utc::now();
    for i in 0..60 {
        store
            .upsert(
                &ObservedItem {
                    location_id: 1020,
                    make: "CHEVROLET".into(),
                    model: "MALIBU".into(),
                    year: 2000 + (i % 10),
                    row_number: i64::from(i),
                    session_id: session.clone(),
                },
                now - Duration::minutes(i64::from(i)),
            )
            .unwrap();
    }

    let catalog = Catalog::new(&config, store.clone());
    catalog
        .save_subscription("bob", &SearchCriteria::new("ALL").make("chevy"), None)
        .unwrap();
    catalog
        .save_subscription("carol", &SearchCriteria::new("ALL").make("honda"), None)
        .unwrap();

    let notifier = Arc::new(RecordingNotifier::default());
    let report = run_match_cycle(&config, &store, notifier.clone()).await.unwrap();
    assert_eq!(report.subscriptions, 2);
    assert_eq!(report.delivered, 1);
    assert_eq!(report.broadcast, 60);

    let owners = notifier.owners.lock().unwrap();
    assert_eq!(owners.len(), 1);
    let (owner, batches) = &owners[0];
    assert_eq!(owner, "bob");
    let sizes: Vec<usize> = batches.iter().map(|b| b.entries.len()).collect();
    assert_eq!(sizes, vec![25, 25, 10]);
    assert!(batches.iter().all(|b| b.char_len() <= 6000));
    assert!(batches[0].title.starts_with("Daily Search Results for CHEVROLET"));
    assert_eq!(batches[0].description, "Results found: 60");

    // Newest first across batch boundaries.
    let rows: Vec<i64> = batches
        .iter()
        .flat_map(|b| &b.entries)
        .map(|e| row_of(&e.value))
        .collect();
    assert_eq!(rows, (0..60).collect::<Vec<i64>>());

    let broadcast = notifier.broadcasts.lock().unwrap();
    assert_eq!(broadcast.iter().map(|b| b.entries.len()).sum::<usize>(), 60);

    let bob = store.subscriptions_for("bob", None).unwrap();
    assert!(bob[0].last_notified.is_some());
    let carol = store.subscriptions_for("carol", None).unwrap();
    assert!(carol[0].last_notified.is_none());
}
