//! Billing Crawler - resumable batch retrieval of utility billing records
//!
//! Processes an ordered list of customer ids against a billing portal with
//! several isolated workers, persists results after every batch, and can be
//! paused, resumed and stopped over a small HTTP control API.

// Module declarations
pub mod api;
pub mod crawling;
pub mod domain;
pub mod infrastructure;

pub use crawling::{CrawlingEngine, EngineSettings, EngineStatus, RunPhase};
pub use infrastructure::config::AppConfig;

