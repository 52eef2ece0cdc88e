//! Service layer for the inventory tracker.
//!
//! This module contains the business logic for:
//! - Driving catalog forms (`SiteSession`, `HttpFormSession`)
//! - Walking a site's parameter space (`InventoryCrawler`)
//! - Resolving loose search input (`QueryResolver`)
//! - Matching saved searches and delivering batches (`SubscriptionMatcher`)
//! - Command-layer search and subscription management (`Catalog`)

mod catalog;
mod crawler;
pub mod form;
mod matcher;
mod notifier;
pub mod resolver;

pub use catalog::Catalog;
pub use crawler::{CrawlEvent, CrawlTarget, InventoryCrawler, WalkOutcome};
pub use form::{
    FormOption, HttpFormSession, HttpSessionFactory, ResultRow, Selection, SessionFactory,
    SiteSession,
};
pub use matcher::{Batcher, CycleReport, SubscriptionMatcher, format_entry};
pub use notifier::{
    LogNotifier, NotificationBatch, NotificationEntry, Notifier, WebhookNotifier,
    notifier_from_config,
};
pub use resolver::{LocationRegistry, QueryResolver};
