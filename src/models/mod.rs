// src/models/mod.rs

//! Domain models for the inventory tracker.
//!
//! This module contains all data structures used throughout the application,
//! organized by their primary purpose.

mod config;
mod item;
mod query;
mod session;
mod site;
mod subscription;

// Re-export all public types
pub use config::{Config, CrawlerConfig, Location, NotifyConfig, Region, StoreConfig};
pub use item::{InventoryItem, ItemStatus, ObservedItem};
pub use query::{InventoryQuery, LikePattern, LocationScope, StatusFilter, YearPredicate};
pub use session::SessionId;
pub use site::{FormControl, FormSelectors, SiteAdapter};
pub use subscription::{NewSubscription, SearchCriteria, Subscription};

pub(crate) use subscription::constrained;
