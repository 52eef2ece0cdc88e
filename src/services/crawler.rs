// src/services/crawler.rs

//! Crawl driver.
//!
//! Walks location × make (× model) on one site and streams observations
//! to the store writer. A location's `LocationComplete` event is sent only
//! after every observation of that location, so the writer's in-order
//! drain doubles as the barrier before the sweep.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use tokio::sync::mpsc;

use crate::error::{AppError, Result};
use crate::models::{Config, FormControl, ObservedItem, SessionId, SiteAdapter, constrained};
use crate::services::form::{FormOption, ResultRow, Selection, SessionFactory, SiteSession};
use crate::storage::SweepScope;

/// Messages from the crawl driver to the store writer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CrawlEvent {
    Observed(ObservedItem),
    LocationComplete(SweepScope),
}

/// Make/model restriction of a walk. `None` means every value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CrawlTarget {
    pub make: Option<String>,
    pub model: Option<String>,
}

impl CrawlTarget {
    /// Walk every make and model.
    pub fn any() -> Self {
        Self::default()
    }

    /// `ANY` or blank values are treated as wildcards.
    pub fn new(make: Option<&str>, model: Option<&str>) -> Self {
        Self {
            make: constrained(make).map(str::to_uppercase),
            model: constrained(model).map(str::to_uppercase),
        }
    }
}

/// Counters for one site walk.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct WalkOutcome {
    pub locations: usize,
    pub combinations: usize,
    pub observed: usize,
    pub failed_combinations: usize,
    pub failed_locations: usize,
    pub sweeps: usize,
}

impl WalkOutcome {
    pub fn absorb(&mut self, other: WalkOutcome) {
        self.locations += other.locations;
        self.combinations += other.combinations;
        self.observed += other.observed;
        self.failed_combinations += other.failed_combinations;
        self.failed_locations += other.failed_locations;
        self.sweeps += other.sweeps;
    }
}

#[derive(Debug, Clone)]
struct LocationEntry {
    id: u32,
    /// Value to select in the location menu; `None` on single-location sites
    value: Option<String>,
    label: String,
}

/// Drives [`SiteSession`]s over a site's parameter space.
pub struct InventoryCrawler {
    config: Arc<Config>,
    factory: Arc<dyn SessionFactory>,
}

impl InventoryCrawler {
    pub fn new(config: Arc<Config>, factory: Arc<dyn SessionFactory>) -> Self {
        Self { config, factory }
    }

    /// Walk one site. Session-level failures abort the walk and are returned;
    /// per-combination failures are logged and counted.
    pub async fn crawl(
        &self,
        site: &SiteAdapter,
        target: &CrawlTarget,
        session_id: &SessionId,
        events: &mpsc::Sender<CrawlEvent>,
    ) -> Result<WalkOutcome> {
        let locations = self.discover_locations(site).await?;
        log::info!(
            "Walking {} location(s) on {} (session {})",
            locations.len(),
            site.name,
            session_id
        );

        let concurrency = self.config.crawler.max_concurrent.max(1);
        let mut walks = stream::iter(locations)
            .map(|location| async move {
                let label = location.label.clone();
                (label, self.walk_location(site, location, target, session_id, events).await)
            })
            .buffer_unordered(concurrency);

        let mut outcome = WalkOutcome::default();
        let mut fatal = None;
        while let Some((label, result)) = walks.next().await {
            match result {
                Ok(walk) => outcome.absorb(walk),
                Err(e) => {
                    log::error!("Walk of {} on {} failed: {}", label, site.name, e);
                    fatal.get_or_insert(e);
                }
            }
        }

        match fatal {
            Some(e) => Err(e),
            None => {
                log::info!(
                    "{}: {} item(s) over {} combination(s), {} failed",
                    site.name,
                    outcome.observed,
                    outcome.combinations,
                    outcome.failed_combinations
                );
                Ok(outcome)
            }
        }
    }

    async fn discover_locations(&self, site: &SiteAdapter) -> Result<Vec<LocationEntry>> {
        if !site.has_multiple_locations {
            let id = site.location_id.ok_or_else(|| {
                AppError::config(format!("site '{}' has no location_id", site.name))
            })?;
            return Ok(vec![LocationEntry {
                id,
                value: None,
                label: id.to_string(),
            }]);
        }

        let mut session = self.factory.open(site).await?;
        let options = read_options(&mut *session, FormControl::Location).await;
        close_quietly(&mut *session, &site.name).await;

        let locations: Vec<LocationEntry> = options?
            .into_iter()
            .filter_map(|option| match option.value.parse::<u32>() {
                Ok(id) => Some(LocationEntry {
                    id,
                    value: Some(option.value),
                    label: option.label,
                }),
                Err(_) => {
                    log::warn!(
                        "{}: ignoring non-numeric location '{}'",
                        site.name,
                        option.value
                    );
                    None
                }
            })
            .collect();

        if locations.is_empty() {
            return Err(AppError::crawl(&site.name, "location menu offered no yards"));
        }
        Ok(locations)
    }

    async fn walk_location(
        &self,
        site: &SiteAdapter,
        location: LocationEntry,
        target: &CrawlTarget,
        session_id: &SessionId,
        events: &mpsc::Sender<CrawlEvent>,
    ) -> Result<WalkOutcome> {
        let mut session = self.factory.open(site).await?;
        let result = self
            .walk_with(&mut *session, &location, target, session_id, events)
            .await;
        close_quietly(&mut *session, &site.name).await;

        match result {
            Err(e) if e.is_recoverable() => {
                log::warn!(
                    "{}: skipping location {} ({}): {}",
                    site.name,
                    location.label,
                    location.id,
                    e
                );
                Ok(WalkOutcome {
                    locations: 1,
                    failed_locations: 1,
                    ..WalkOutcome::default()
                })
            }
            other => other,
        }
    }

    async fn walk_with(
        &self,
        session: &mut dyn SiteSession,
        location: &LocationEntry,
        target: &CrawlTarget,
        session_id: &SessionId,
        events: &mpsc::Sender<CrawlEvent>,
    ) -> Result<WalkOutcome> {
        let delay = Duration::from_millis(self.config.crawler.request_delay_ms);
        let mut outcome = WalkOutcome {
            locations: 1,
            ..WalkOutcome::default()
        };

        session.load().await?;
        if let Some(value) = &location.value {
            session.select(FormControl::Location, value).await?;
        }

        let menu_len = read_options(session, FormControl::Make).await?.len();
        let mut failed_makes = Vec::new();
        let mut target_make = target.make.clone();

        for index in 0..menu_len {
            // Selecting can repopulate the menu, so re-read before every pick.
            let menu = read_options(session, FormControl::Make).await?;
            let Some(make) = pick_make(&menu, index, target.make.as_deref()) else {
                if target.make.is_some() {
                    break;
                }
                continue;
            };
            if target.make.is_some() {
                target_make = Some(make.value.clone());
            }

            let selection = Selection {
                location: location.value.clone(),
                make: make.value.clone(),
                model: target.model.clone(),
            };
            outcome.combinations += 1;

            match session.submit_selection(&selection).await {
                Ok(rows) => {
                    for row in rows {
                        let Some(item) = parse_row(&row, location.id, &make.value, session_id)
                        else {
                            log::debug!("Skipping malformed row {:?}", row.cells);
                            continue;
                        };
                        events
                            .send(CrawlEvent::Observed(item))
                            .await
                            .map_err(|_| AppError::session("observation channel closed"))?;
                        outcome.observed += 1;
                    }
                }
                Err(e) if e.is_recoverable() => {
                    log::warn!(
                        "Location {} make {}: {}",
                        location.id,
                        make.value,
                        e
                    );
                    outcome.failed_combinations += 1;
                    failed_makes.push(make.value.clone());
                }
                Err(e) => return Err(e),
            }

            if target.make.is_some() {
                break;
            }
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }

        if target.model.is_some() {
            log::debug!("Model-targeted walk of {}; no sweep", location.id);
            return Ok(outcome);
        }

        let scope = SweepScope {
            location_id: location.id,
            session_id: session_id.clone(),
            only_make: target_make,
            except_makes: failed_makes,
        };
        events
            .send(CrawlEvent::LocationComplete(scope))
            .await
            .map_err(|_| AppError::session("observation channel closed"))?;
        outcome.sweeps += 1;
        Ok(outcome)
    }
}

async fn read_options(session: &mut dyn SiteSession, control: FormControl) -> Result<Vec<FormOption>> {
    session.options(control).await
}

async fn close_quietly(session: &mut dyn SiteSession, site: &str) {
    if let Err(e) = session.close().await {
        log::warn!("{site}: failed to close session: {e}");
    }
}

/// The make to submit at `index`, or the targeted make wherever it sits.
fn pick_make<'a>(menu: &'a [FormOption], index: usize, target: Option<&str>) -> Option<&'a FormOption> {
    match target {
        Some(target) => menu.iter().find(|option| {
            option.value.eq_ignore_ascii_case(target) || option.label.eq_ignore_ascii_case(target)
        }),
        None => menu.get(index),
    }
}

/// Cells are `year, make, model, row`. Returns `None` for anything else.
fn parse_row(
    row: &ResultRow,
    location_id: u32,
    selected_make: &str,
    session_id: &SessionId,
) -> Option<ObservedItem> {
    let [year, make, model, row_number, ..] = row.cells.as_slice() else {
        return None;
    };
    let year: i32 = year.trim().parse().ok()?;
    let row_number: i64 = row_number.trim().parse().ok()?;
    let model = model.trim();
    if model.is_empty() {
        return None;
    }
    let make = match make.trim() {
        "" => selected_make,
        make => make,
    };

    Some(ObservedItem {
        location_id,
        make: make.to_uppercase(),
        model: model.to_uppercase(),
        year,
        row_number,
        session_id: session_id.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    /// Scripted catalog: location value -> make -> rows.
    #[derive(Default)]
    struct FakeCatalog {
        inventory: HashMap<String, Vec<(String, Vec<ResultRow>)>>,
        broken_makes: Vec<String>,
        crash_location: Option<String>,
        opened: AtomicUsize,
        closed: AtomicUsize,
        submits: Mutex<Vec<Selection>>,
    }

    struct FakeSession {
        catalog: Arc<FakeCatalog>,
        location: Option<String>,
        make: Option<String>,
        model: Option<String>,
    }

    struct FakeFactory(Arc<FakeCatalog>);

    #[async_trait]
    impl SessionFactory for FakeFactory {
        async fn open(&self, _site: &SiteAdapter) -> Result<Box<dyn SiteSession>> {
            self.0.opened.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(FakeSession {
                catalog: Arc::clone(&self.0),
                location: None,
                make: None,
                model: None,
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
                FormControl::Location => {
                    if self.catalog.crash_location.as_deref() == Some(value) {
                        return Err(AppError::session("browser crashed"));
                    }
                    self.location = Some(value.to_string());
                    self.make = None;
                    self.model = None;
                }
                FormControl::Make => {
                    self.make = Some(value.to_string());
                    self.model = None;
                }
                FormControl::Model => self.model = Some(value.to_string()),
            }
            Ok(())
        }

        async fn options(&mut self, control: FormControl) -> Result<Vec<FormOption>> {
            let mut keys: Vec<&String> = self.catalog.inventory.keys().collect();
            keys.sort();
            Ok(match control {
                FormControl::Location => keys
                    .into_iter()
                    .map(|k| FormOption::new(k.as_str(), format!("Yard {k}")))
                    .collect(),
                FormControl::Make => self
                    .location
                    .as_ref()
                    .or(keys.first().copied())
                    .and_then(|loc| self.catalog.inventory.get(loc))
                    .map(|makes| {
                        makes
                            .iter()
                            .map(|(m, _)| FormOption::new(m.as_str(), m.as_str()))
                            .collect()
                    })
                    .unwrap_or_default(),
                FormControl::Model => Vec::new(),
            })
        }

        async fn submit(&mut self) -> Result<()> {
            self.catalog.submits.lock().unwrap().push(Selection {
                location: self.location.clone(),
                make: self.make.clone().unwrap_or_default(),
                model: self.model.clone(),
            });
            Ok(())
        }

        async fn result_rows(&mut self) -> Result<Vec<ResultRow>> {
            let make = self.make.clone().unwrap_or_default();
            if self.catalog.broken_makes.contains(&make) {
                return Err(AppError::ResultsUnavailable { context: make });
            }
            let mut keys: Vec<&String> = self.catalog.inventory.keys().collect();
            keys.sort();
            let location = self.location.as_ref().or(keys.first().copied());
            let rows = location
                .and_then(|loc| self.catalog.inventory.get(loc))
                .and_then(|makes| makes.iter().find(|(m, _)| *m == make))
                .map(|(_, rows)| rows.clone())
                .unwrap_or_default();
            Ok(match &self.model {
                Some(model) => rows
                    .into_iter()
                    .filter(|r| r.cells.get(2) == Some(model))
                    .collect(),
                None => rows,
            })
        }

        async fn close(&mut self) -> Result<()> {
            self.catalog.closed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn row(year: &str, make: &str, model: &str, row: &str) -> ResultRow {
        ResultRow::new([year, make, model, row])
    }

    fn catalog() -> FakeCatalog {
        let mut inventory = HashMap::new();
        inventory.insert(
            "1020".to_string(),
            vec![
                (
                    "FORD".to_string(),
                    vec![
                        row("2004", "FORD", "F150", "12"),
                        row("1999", "FORD", "RANGER", "3"),
                        row("Year", "Make", "Model", "Row"),
                    ],
                ),
                ("HONDA".to_string(), vec![row("2001", "HONDA", "CIVIC", "8")]),
            ],
        );
        inventory.insert(
            "1119".to_string(),
            vec![("TOYOTA".to_string(), vec![row("1995", "", "CAMRY", "1")])],
        );
        FakeCatalog {
            inventory,
            ..FakeCatalog::default()
        }
    }

    fn config() -> Arc<Config> {
        let mut config = Config::default();
        config.crawler.request_delay_ms = 0;
        config.crawler.max_concurrent = 2;
        Arc::new(config)
    }

    async fn run(
        catalog: FakeCatalog,
        target: CrawlTarget,
    ) -> (Result<WalkOutcome>, Vec<CrawlEvent>, Arc<FakeCatalog>) {
        let catalog = Arc::new(catalog);
        let config = config();
        let crawler = InventoryCrawler::new(
            Arc::clone(&config),
            Arc::new(FakeFactory(Arc::clone(&catalog))),
        );
        let (tx, mut rx) = mpsc::channel(64);
        let session = SessionId::new("S1").unwrap();
        let result = crawler.crawl(&config.sites[0], &target, &session, &tx).await;
        drop(tx);

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        (result, events, catalog)
    }

    fn observed(events: &[CrawlEvent]) -> Vec<&ObservedItem> {
        events
            .iter()
            .filter_map(|e| match e {
                CrawlEvent::Observed(item) => Some(item),
                _ => None,
            })
            .collect()
    }

    fn sweeps(events: &[CrawlEvent]) -> Vec<&SweepScope> {
        events
            .iter()
            .filter_map(|e| match e {
                CrawlEvent::LocationComplete(scope) => Some(scope),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_walks_every_location_and_make() {
        let (result, events, catalog) = run(catalog(), CrawlTarget::any()).await;
        let outcome = result.unwrap();

        assert_eq!(outcome.locations, 2);
        assert_eq!(outcome.combinations, 3);
        assert_eq!(outcome.observed, 4);
        assert_eq!(observed(&events).len(), 4);

        let camry = observed(&events)
            .into_iter()
            .find(|i| i.model == "CAMRY")
            .unwrap();
        assert_eq!(camry.location_id, 1119);
        assert_eq!(camry.make, "TOYOTA");

        let scopes = sweeps(&events);
        assert_eq!(scopes.len(), 2);
        assert!(scopes.iter().all(|s| s.only_make.is_none() && s.except_makes.is_empty()));

        // discovery session + one per location, all closed
        assert_eq!(catalog.opened.load(Ordering::SeqCst), 3);
        assert_eq!(catalog.closed.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_sweep_follows_location_observations() {
        let (_, events, _) = run(catalog(), CrawlTarget::any()).await;
        for scope in sweeps(&events) {
            let sweep_at = events
                .iter()
                .position(|e| *e == CrawlEvent::LocationComplete(scope.clone()))
                .unwrap();
            assert!(events.iter().enumerate().all(|(i, e)| match e {
                CrawlEvent::Observed(item) if item.location_id == scope.location_id => i < sweep_at,
                _ => true,
            }));
        }
    }

    #[tokio::test]
    async fn test_failed_make_is_skipped_and_excluded_from_sweep() {
        let mut catalog = catalog();
        catalog.broken_makes.push("HONDA".into());
        let (result, events, _) = run(catalog, CrawlTarget::any()).await;
        let outcome = result.unwrap();

        assert_eq!(outcome.failed_combinations, 1);
        assert_eq!(outcome.observed, 3);
        let boise = sweeps(&events)
            .into_iter()
            .find(|s| s.location_id == 1020)
            .unwrap();
        assert_eq!(boise.except_makes, vec!["HONDA".to_string()]);
    }

    #[tokio::test]
    async fn test_session_failure_escalates_and_closes() {
        let mut catalog = catalog();
        catalog.crash_location = Some("1119".into());
        let (result, events, catalog) = run(catalog, CrawlTarget::any()).await;

        assert!(matches!(result, Err(AppError::Session(_))));
        assert!(sweeps(&events).iter().all(|s| s.location_id != 1119));
        assert_eq!(
            catalog.opened.load(Ordering::SeqCst),
            catalog.closed.load(Ordering::SeqCst)
        );
    }

    #[tokio::test]
    async fn test_targeted_make_sweeps_only_that_make() {
        let (result, events, catalog) = run(catalog(), CrawlTarget::new(Some("ford"), None)).await;
        assert_eq!(result.unwrap().observed, 2);

        let scopes = sweeps(&events);
        let boise = scopes.iter().find(|s| s.location_id == 1020).unwrap();
        assert_eq!(boise.only_make.as_deref(), Some("FORD"));
        // make not offered in 1119: nothing submitted there, sweep still scoped to FORD
        let garden = scopes.iter().find(|s| s.location_id == 1119).unwrap();
        assert_eq!(garden.only_make.as_deref(), Some("FORD"));
        assert_eq!(catalog.submits.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_location_menu_fails_the_walk() {
        let (result, events, catalog) = run(FakeCatalog::default(), CrawlTarget::any()).await;

        match result {
            Err(AppError::Crawl { context, .. }) => assert_eq!(context, "jalopyjungle"),
            other => panic!("expected a crawl error, got {other:?}"),
        }
        assert!(events.is_empty());
        assert_eq!(catalog.opened.load(Ordering::SeqCst), 1);
        assert_eq!(catalog.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_model_target_does_not_sweep() {
        let (result, events, _) =
            run(catalog(), CrawlTarget::new(Some("FORD"), Some("f150"))).await;
        assert_eq!(result.unwrap().observed, 1);
        assert!(sweeps(&events).is_empty());
    }

    #[test]
    fn test_parse_row() {
        let session = SessionId::new("S1").unwrap();
        let item = parse_row(&row("2004", "ford", "f150 ", "12"), 1020, "FORD", &session).unwrap();
        assert_eq!((item.make.as_str(), item.model.as_str()), ("FORD", "F150"));
        assert!(parse_row(&row("Year", "Make", "Model", "Row"), 1020, "FORD", &session).is_none());
        assert!(parse_row(&ResultRow::new(["2004", "FORD"]), 1020, "FORD", &session).is_none());
    }

    #[test]
    fn test_crawl_target_wildcards() {
        assert_eq!(CrawlTarget::new(Some("any"), Some(" ")), CrawlTarget::any());
        assert_eq!(
            CrawlTarget::new(Some("honda"), None).make.as_deref(),
            Some("HONDA")
        );
    }
}
