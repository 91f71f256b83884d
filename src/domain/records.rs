//! # Billing Records
//!
//! Value types for the unit of work (customer identifier) and the data
//! harvested for it. `ResultSet` keeps at most one entry per identifier and
//! preserves first-insertion order so the output table stays stable between
//! flushes.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};

/// Customer identifier (CID) - opaque unit of work
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CustomerId(String);

impl CustomerId {
    /// Creates an identifier from any string-like token
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CustomerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CustomerId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for CustomerId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// One billing period and its amount
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeriodAmount {
    pub period: String,
    pub amount: f64,
}

/// Period label → non-negative amount, in the order the portal listed them
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordData {
    periods: Vec<PeriodAmount>,
}

impl RecordData {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the amount for a period, replacing an earlier value for the same label.
    /// Negative or non-finite amounts are stored as zero.
    pub fn insert(&mut self, period: impl Into<String>, amount: f64) {
        let period = period.into();
        let amount = if amount.is_finite() && amount >= 0.0 { amount } else { 0.0 };

        if let Some(existing) = self.periods.iter_mut().find(|p| p.period == period) {
            existing.amount = amount;
        } else {
            self.periods.push(PeriodAmount { period, amount });
        }
    }

    #[must_use]
    pub fn get(&self, period: &str) -> Option<f64> {
        self.periods
            .iter()
            .find(|p| p.period == period)
            .map(|p| p.amount)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PeriodAmount> {
        self.periods.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.periods.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.periods.is_empty()
    }
}

impl<S: Into<String>> FromIterator<(S, f64)> for RecordData {
    fn from_iter<I: IntoIterator<Item = (S, f64)>>(iter: I) -> Self {
        let mut data = Self::new();
        for (period, amount) in iter {
            data.insert(period, amount);
        }
        data
    }
}

/// A harvested record bound to exactly one identifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultEntry {
    pub id: CustomerId,
    pub data: RecordData,
}

impl ResultEntry {
    #[must_use]
    pub fn new(id: impl Into<CustomerId>, data: RecordData) -> Self {
        Self { id: id.into(), data }
    }
}

/// Accumulated results, at most one entry per identifier
#[derive(Debug, Clone, Default)]
pub struct ResultSet {
    entries: Vec<ResultEntry>,
    index: HashMap<CustomerId, usize>,
}

impl ResultSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an entry; an entry for an identifier already present replaces
    /// the old one in place so the row count never grows for it.
    pub fn upsert(&mut self, entry: ResultEntry) {
        match self.index.get(&entry.id) {
            Some(&position) => self.entries[position] = entry,
            None => {
                self.index.insert(entry.id.clone(), self.entries.len());
                self.entries.push(entry);
            }
        }
    }

    /// Unions another set into this one (by id, incoming wins)
    pub fn extend(&mut self, other: impl IntoIterator<Item = ResultEntry>) {
        for entry in other {
            self.upsert(entry);
        }
    }

    #[must_use]
    pub fn contains(&self, id: &CustomerId) -> bool {
        self.index.contains_key(id)
    }

    #[must_use]
    pub fn get(&self, id: &CustomerId) -> Option<&RecordData> {
        self.index.get(id).map(|&position| &self.entries[position].data)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ResultEntry> {
        self.entries.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Union of all period labels in first-seen order (the table columns)
    #[must_use]
    pub fn period_columns(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut columns = Vec::new();
        for entry in &self.entries {
            for period in entry.data.iter() {
                if seen.insert(period.period.as_str()) {
                    columns.push(period.period.clone());
                }
            }
        }
        columns
    }
}

impl FromIterator<ResultEntry> for ResultSet {
    fn from_iter<I: IntoIterator<Item = ResultEntry>>(iter: I) -> Self {
        let mut set = Self::new();
        set.extend(iter);
        set
    }
}

/// Identifiers that exhausted their retry budget
pub type FailureSet = BTreeSet<CustomerId>;

#[cfg(test)]
mod tests {
    use super::*;

    fn record(pairs: &[(&str, f64)]) -> RecordData {
        pairs.iter().map(|(p, a)| (*p, *a)).collect()
    }

    #[test]
    fn record_data_replaces_duplicate_period_and_clamps_negative() {
        let mut data = RecordData::new();
        data.insert("Jan", 10.0);
        data.insert("Feb", -3.0);
        data.insert("Jan", 12.5);

        assert_eq!(data.len(), 2);
        assert_eq!(data.get("Jan"), Some(12.5));
        assert_eq!(data.get("Feb"), Some(0.0));
    }

    #[test]
    fn result_set_keeps_one_row_per_id() {
        let mut set = ResultSet::new();
        set.upsert(ResultEntry::new("C1", record(&[("Jan", 100.0)])));
        set.upsert(ResultEntry::new("C2", record(&[("Jan", 5.0)])));
        set.upsert(ResultEntry::new("C1", record(&[("Jan", 110.0)])));

        assert_eq!(set.len(), 2);
        assert_eq!(set.get(&"C1".into()).and_then(|d| d.get("Jan")), Some(110.0));
        let order: Vec<_> = set.iter().map(|e| e.id.as_str().to_owned()).collect();
        assert_eq!(order, vec!["C1", "C2"]);
    }

    #[test]
    fn period_columns_are_first_seen_union() {
        let set: ResultSet = [
            ResultEntry::new("C1", record(&[("Jan", 1.0), ("Feb", 2.0)])),
            ResultEntry::new("C2", record(&[("Mar", 3.0), ("Jan", 4.0)])),
        ]
        .into_iter()
        .collect();

        assert_eq!(set.period_columns(), vec!["Jan", "Feb", "Mar"]);
    }
}
