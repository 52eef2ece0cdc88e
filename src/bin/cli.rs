//! Yardwatch CLI
//!
//! Local execution entry point for crawls, notification cycles and
//! saved-search management.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use yardwatch::{
    error::Result,
    models::{Config, SearchCriteria, SessionId},
    pipeline,
    services::{
        Catalog, CrawlTarget, HttpSessionFactory, Notifier, SessionFactory, format_entry,
        notifier_from_config,
    },
    storage::InventoryStore,
};

/// Yardwatch - Salvage Yard Inventory Tracker
#[derive(Parser, Debug)]
#[command(
    name = "yardwatch",
    version,
    about = "Tracks salvage yard inventory and notifies saved searches"
)]

struct Cli {
    /// Path to storage directory containing config and database
    #[arg(short, long, default_value = "storage")]
    storage_dir: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

/// Loose search filters shared by `search` and `save`.
#[derive(Args, Debug)]
struct CriteriaArgs {
    /// `ALL`, a region, a yard name, or comma-separated yard ids
    location: String,

    #[arg(long)]
    make: Option<String>,

    #[arg(long)]
    model: Option<String>,

    /// Years and ranges, e.g. `1999,2004-2006`
    #[arg(long)]
    year: Option<String>,

    /// `ACTIVE` (default), `NEW` or `INACTIVE`
    #[arg(long)]
    status: Option<String>,
}

impl CriteriaArgs {
    fn into_criteria(self) -> SearchCriteria {
        SearchCriteria {
            location: self.location,
            make: self.make,
            model: self.model,
            year: self.year,
            status: self.status,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Walk the catalog sites and reconcile the store
    Crawl {
        /// Crawl session id (default: today's date)
        #[arg(long)]
        session: Option<String>,

        /// Only walk this site
        #[arg(long)]
        site: Option<String>,

        /// Only walk this make
        #[arg(long)]
        make: Option<String>,

        /// Only walk this model (skips the inactive sweep)
        #[arg(long)]
        model: Option<String>,
    },

    /// Match saved searches and deliver notifications
    Notify,

    /// Run full pipeline: Crawl → Notify
    Pipeline {
        /// Crawl session id (default: today's date)
        #[arg(long)]
        session: Option<String>,

        /// Notify even if the store looks stale
        #[arg(long)]
        force_notify: bool,
    },

    /// Search the store
    Search {
        #[command(flatten)]
        criteria: CriteriaArgs,

        /// Print matches as JSON
        #[arg(long)]
        json: bool,
    },

    /// Save a search for an owner
    Save {
        owner: String,

        #[command(flatten)]
        criteria: CriteriaArgs,

        #[arg(long)]
        notes: Option<String>,
    },

    /// Delete a saved search by id
    Delete { id: i64 },

    /// List an owner's saved searches
    List {
        owner: String,

        #[arg(long)]
        location: Option<String>,
    },

    /// Validate configuration file
    Validate,

    /// Show store info
    Info,
}

/// Initialize logging based on verbosity flag.
fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
}

fn session_id(session: Option<String>) -> Result<SessionId> {
    match session {
        Some(id) => SessionId::new(id),
        None => Ok(SessionId::today()),
    }
}

fn notifier(config: &Config) -> Result<Arc<dyn Notifier>> {
    Ok(Arc::from(notifier_from_config(&config.crawler, &config.notify)?))
}

/// Main entry point for the CLI application.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    // Load configuration
    let config_path = cli.storage_dir.join("config.toml");
    let config = Config::load_or_default(&config_path);

    log::debug!("Loaded configuration from {}", cli.storage_dir.display());

    if let Command::Validate = cli.command {
        log::info!("Validating configuration...");
        if let Err(e) = config.validate() {
            log::error!("Config validation failed: {}", e);
            return Err(e);
        }
        log::info!(
            "✓ Config OK ({} sites, {} locations, {} regions)",
            config.sites.len(),
            config.locations.len(),
            config.regions.len()
        );
        return Ok(());
    }

    std::fs::create_dir_all(&cli.storage_dir)?;
    let store_path = config.store_path(&cli.storage_dir);
    let store = InventoryStore::open(&store_path, &config.store)?;
    let config = Arc::new(config);

    match cli.command {
        Command::Crawl {
            session,
            site,
            make,
            model,
        } => {
            let session = session_id(session)?;
            let target = CrawlTarget::new(make.as_deref(), model.as_deref());
            let factory: Arc<dyn SessionFactory> =
                Arc::new(HttpSessionFactory::new(&config.crawler)?);
            pipeline::run_crawl(
                Arc::clone(&config),
                &store,
                factory,
                &session,
                &target,
                site.as_deref(),
            )
            .await?;
        }

        Command::Notify => {
            let report = pipeline::run_match_cycle(&config, &store, notifier(&config)?).await?;
            log::info!(
                "Delivered {}/{} subscription(s), {} failed",
                report.delivered,
                report.subscriptions,
                report.failed
            );
        }

        Command::Pipeline {
            session,
            force_notify,
        } => {
            let session = session_id(session)?;
            let factory: Arc<dyn SessionFactory> =
                Arc::new(HttpSessionFactory::new(&config.crawler)?);
            pipeline::run_pipeline(
                Arc::clone(&config),
                &store,
                factory,
                notifier(&config)?,
                &session,
                force_notify,
            )
            .await?;
        }

        Command::Search { criteria, json } => {
            let catalog = Catalog::new(&config, store.clone());
            let items = catalog.search(&criteria.into_criteria())?;
            if json {
                println!("{}", serde_json::to_string_pretty(&items)?);
                return Ok(());
            }
            for item in &items {
                let entry = format_entry(item, catalog.resolver().registry());
                println!("{}\n{}\n", entry.name, entry.value);
            }
            log::info!("Results found: {}", items.len());
        }

        Command::Save {
            owner,
            criteria,
            notes,
        } => {
            let catalog = Catalog::new(&config, store.clone());
            let subscription =
                catalog.save_subscription(&owner, &criteria.into_criteria(), notes.as_deref())?;
            let label = catalog
                .resolver()
                .registry()
                .label(&catalog.resolver().registry().resolve_location(&subscription.location));
            log::info!(
                "Saved search #{}: {}",
                subscription.id,
                subscription.describe(&label)
            );
        }

        Command::Delete { id } => {
            let catalog = Catalog::new(&config, store.clone());
            catalog.delete_subscription(id)?;
            log::info!("Deleted saved search #{}", id);
        }

        Command::List { owner, location } => {
            let catalog = Catalog::new(&config, store.clone());
            let registry = catalog.resolver().registry();
            let subscriptions = catalog.list_subscriptions(&owner, location.as_deref())?;
            if subscriptions.is_empty() {
                log::info!("No saved searches for {}", owner);
            }
            for subscription in &subscriptions {
                let label = registry.label(&registry.resolve_location(&subscription.location));
                println!("#{} {}", subscription.id, subscription.describe(&label));
                if !subscription.notes.is_empty() {
                    println!("    {}", subscription.notes);
                }
            }
        }

        Command::Validate => {}

        Command::Info => {
            log::info!("Storage directory: {}", cli.storage_dir.display());
            log::info!("Store: {}", store_path.display());
            match store.latest_refresh()? {
                Some(at) => log::info!("Last updated: {}", at.to_rfc3339()),
                None => log::info!("No inventory recorded yet."),
            }
            for (status, count) in store.status_counts()? {
                log::info!("{}: {}", status.as_str(), count);
            }
            log::info!("Saved searches: {}", store.all_subscriptions()?.len());
        }
    }

    log::info!("Done!");

    Ok(())
}
