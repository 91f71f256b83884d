//! # Record Store
//!
//! Owns the accumulated [`ResultSet`] and [`FailureSet`] and their two
//! persisted artifacts:
//! - result table: CSV, header `id,<period labels>`, rewritten in full on every merge
//! - failure list: pretty-printed JSON array, sorted
//!
//! Reads never fail the caller. A missing or corrupt artifact loads as an
//! empty collection with a warning.

use crate::domain::{CustomerId, FailureSet, PersistenceError, RecordData, ResultEntry, ResultSet};
use crate::infrastructure::write_atomically;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub struct RecordStore {
    result_path: PathBuf,
    failure_path: PathBuf,
    results: ResultSet,
    failures: FailureSet,
}

impl RecordStore {
    /// Opens the store and loads whatever is already persisted
    pub fn load(result_path: impl Into<PathBuf>, failure_path: impl Into<PathBuf>) -> Self {
        let result_path = result_path.into();
        let failure_path = failure_path.into();

        let results = match read_result_table(&result_path) {
            Ok(results) => results,
            Err(e) => {
                warn!("⚠️ Starting with an empty result set: {}", e);
                ResultSet::new()
            }
        };
        let failures = match read_failure_list(&failure_path) {
            Ok(failures) => failures,
            Err(e) => {
                warn!("⚠️ Starting with an empty failure set: {}", e);
                FailureSet::new()
            }
        };

        info!(
            "📂 Record store loaded: {} results, {} failures",
            results.len(),
            failures.len()
        );

        Self { result_path, failure_path, results, failures }
    }

    /// True if the id already succeeded or already exhausted its retries
    pub fn contains(&self, id: &CustomerId) -> bool {
        self.results.contains(id) || self.failures.contains(id)
    }

    pub fn results(&self) -> &ResultSet {
        &self.results
    }

    pub fn failures(&self) -> &FailureSet {
        &self.failures
    }

    /// Merges a batch into the in-memory sets and rewrites both artifacts.
    ///
    /// Ids that now have a result are removed from the failure set. The
    /// in-memory state is updated even when a write fails, so the next
    /// successful merge persists everything.
    pub fn merge(
        &mut self,
        new_entries: impl IntoIterator<Item = ResultEntry>,
        new_failures: impl IntoIterator<Item = CustomerId>,
    ) -> Result<(), PersistenceError> {
        self.failures.extend(new_failures);
        for entry in new_entries {
            self.failures.remove(&entry.id);
            self.results.upsert(entry);
        }

        self.flush()
    }

    /// Rewrites both artifacts from memory
    pub fn flush(&self) -> Result<(), PersistenceError> {
        let table = encode_result_table(&self.results, &self.result_path)?;
        write_atomically(&self.result_path, &table)?;

        let failures: Vec<&CustomerId> = self.failures.iter().collect();
        let json = serde_json::to_vec_pretty(&failures)
            .map_err(|e| PersistenceError::write(&self.failure_path, e))?;
        write_atomically(&self.failure_path, &json)?;

        debug!(
            "💾 Persisted {} results and {} failures",
            self.results.len(),
            self.failures.len()
        );
        Ok(())
    }
}

/// Encodes the rectangular table: one row per id, empty cells for absent periods
pub fn encode_result_table(results: &ResultSet, path: &Path) -> Result<Vec<u8>, PersistenceError> {
    let columns = results.period_columns();
    let mut writer = csv::Writer::from_writer(Vec::new());

    let header = std::iter::once("id").chain(columns.iter().map(String::as_str));
    writer.write_record(header).map_err(|e| PersistenceError::write(path, e))?;

    for entry in results.iter() {
        let mut row = Vec::with_capacity(columns.len() + 1);
        row.push(entry.id.to_string());
        for column in &columns {
            row.push(entry.data.get(column).map(|amount| amount.to_string()).unwrap_or_default());
        }
        writer.write_record(&row).map_err(|e| PersistenceError::write(path, e))?;
    }

    writer.into_inner().map_err(|e| PersistenceError::write(path, e))
}

fn read_result_table(path: &Path) -> Result<ResultSet, PersistenceError> {
    if !path.exists() {
        return Err(PersistenceError::read(path, "file does not exist"));
    }

    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .map_err(|e| PersistenceError::read(path, e))?;

    let header = reader.headers().map_err(|e| PersistenceError::parse(path, e))?.clone();
    let mut results = ResultSet::new();

    for record in reader.records() {
        let record = record.map_err(|e| PersistenceError::parse(path, e))?;
        let Some(id) = record.get(0).map(str::trim).filter(|id| !id.is_empty()) else {
            continue;
        };

        let mut data = RecordData::new();
        for (period, cell) in header.iter().zip(record.iter()).skip(1) {
            let cell = cell.trim();
            if cell.is_empty() {
                continue;
            }
            match cell.parse::<f64>() {
                Ok(amount) => data.insert(period, amount),
                Err(_) => warn!("Ignoring unparsable amount {:?} for {} / {}", cell, id, period),
            }
        }
        results.upsert(ResultEntry::new(id, data));
    }

    Ok(results)
}

fn read_failure_list(path: &Path) -> Result<FailureSet, PersistenceError> {
    let raw = std::fs::read_to_string(path).map_err(|e| PersistenceError::read(path, e))?;
    let ids: Vec<CustomerId> =
        serde_json::from_str(&raw).map_err(|e| PersistenceError::parse(path, e))?;
    Ok(ids.into_iter().collect())
}
