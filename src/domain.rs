//! Domain module - unit-of-work model and error taxonomy
//!
//! Each module is its own file in the domain/ directory; public exports are
//! collected here for convenience.

pub mod errors;
pub mod progress;
pub mod records;

pub use errors::{FetchError, FetchErrorKind, PersistenceError};
pub use progress::ProgressState;
pub use records::{CustomerId, FailureSet, PeriodAmount, RecordData, ResultEntry, ResultSet};
