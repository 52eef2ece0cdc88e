// src/pipeline/pipeline.rs

use std::sync::Arc;

use crate::error::Result;
use crate::models::{Config, SessionId};
use crate::services::{CrawlTarget, CycleReport, Notifier, SessionFactory};
use crate::storage::InventoryStore;
use crate::utils::log;

use super::crawl::{CrawlReport, run_crawl};
use super::notify::{run_guarded_match_cycle, run_match_cycle};

/// Outcome of a full scheduled run.
#[derive(Debug, Clone)]
pub struct PipelineReport {
    pub crawl: CrawlReport,
    /// `None` when the freshness guard skipped notifications
    pub cycle: Option<CycleReport>,
}

/// Run the full pipeline: crawl every site, then notify.
pub async fn run_pipeline(
    config: Arc<Config>,
    store: &InventoryStore,
    factory: Arc<dyn SessionFactory>,
    notifier: Arc<dyn Notifier>,
    session: &SessionId,
    force_notify: bool,
) -> Result<PipelineReport> {
    log::header("Pipeline starting");

    log::step(1, 2, "Crawl - Reconciling inventory");
    let crawl = run_crawl(
        Arc::clone(&config),
        store,
        factory,
        session,
        &CrawlTarget::any(),
        None,
    )
    .await?;

    log::step(2, 2, "Notify - Matching saved searches");
    let cycle = if force_notify {
        Some(run_match_cycle(&config, store, notifier).await?)
    } else {
        run_guarded_match_cycle(&config, store, notifier).await?
    };

    match &cycle {
        Some(report) => log::sub_item(&format!(
            "{} of {} saved search(es) delivered",
            report.delivered, report.subscriptions
        )),
        None => log::sub_item("Notifications skipped"),
    }

    log::info!("Pipeline complete");
    Ok(PipelineReport { crawl, cycle })
}
