//! Infrastructure layer: configuration, logging, persisted artifacts and
//! the external collaborators (connectivity probe, billing portal).
//!
//! Everything that touches the filesystem or the network lives here; the
//! engine in `crawling` only sees the traits and stores exported below.

pub mod billing_portal;
pub mod config;
pub mod connectivity;
pub mod http_client;
pub mod input_source;
pub mod logging;
pub mod progress_tracker;
pub mod record_store;

pub use billing_portal::{
    BillingPortal, ChallengeSolver, DigitChallengeSolver, HttpBillingPortal, HttpPortalFactory,
    PortalFactory, RawRow,
};
pub use config::{AppConfig, ConfigManager};
pub use connectivity::{ConnectivityProbe, HttpConnectivityProbe};
pub use http_client::HttpClient;
pub use input_source::InputSource;
pub use progress_tracker::ProgressTracker;
pub use record_store::RecordStore;

use crate::domain::PersistenceError;
use std::path::Path;

/// Writes `contents` to `<path>.tmp` and renames it over `path`.
pub(crate) fn write_atomically(path: &Path, contents: &[u8]) -> Result<(), PersistenceError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| PersistenceError::write(path, e))?;
    }

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = std::path::PathBuf::from(tmp);

    std::fs::write(&tmp, contents).map_err(|e| PersistenceError::write(&tmp, e))?;
    std::fs::rename(&tmp, path).map_err(|e| PersistenceError::write(path, e))
}
