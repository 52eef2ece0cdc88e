//! Pipeline entry points for scheduled jobs.
//!
//! - `run_crawl`: Walk every site and reconcile the store
//! - `run_match_cycle`: Match saved searches and deliver batches
//! - `run_pipeline`: Crawl, then notify if the store is fresh

pub mod crawl;
pub mod notify;
#[allow(clippy::module_inception)]
pub mod pipeline;
pub mod retry;

pub use crawl::{CrawlReport, run_crawl};
pub use notify::{is_fresh, run_guarded_match_cycle, run_match_cycle};
pub use pipeline::{PipelineReport, run_pipeline};
pub use retry::{RetryPolicy, retry_with_backoff};
