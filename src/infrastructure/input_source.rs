//! Ordered customer identifier list
//!
//! `.json` files hold an array of strings; anything else is read as text with
//! one identifier per line (blank lines and `#` comments ignored).

use crate::domain::{CustomerId, PersistenceError};
use std::path::{Path, PathBuf};
use tracing::info;

pub struct InputSource {
    path: PathBuf,
}

impl InputSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the whole list. Duplicates are kept in order.
    pub fn load(&self) -> Result<Vec<CustomerId>, PersistenceError> {
        let raw = std::fs::read_to_string(&self.path)
            .map_err(|e| PersistenceError::read(&self.path, e))?;

        let is_json = self
            .path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

        let ids = if is_json {
            let values: Vec<String> = serde_json::from_str(&raw)
                .map_err(|e| PersistenceError::parse(&self.path, e))?;
            values
                .into_iter()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .map(CustomerId::from)
                .collect()
        } else {
            parse_lines(&raw)
        };

        info!("📋 Loaded {} customer ids from {:?}", ids.len(), self.path);
        Ok(ids)
    }
}

fn parse_lines(raw: &str) -> Vec<CustomerId> {
    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(CustomerId::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_list_skips_blanks_and_comments() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cids.txt");
        std::fs::write(&path, "# header\nC1\n\n  C2  \r\n#C9\nC1\n").unwrap();

        let ids = InputSource::new(&path).load().unwrap();
        let ids: Vec<&str> = ids.iter().map(CustomerId::as_str).collect();
        assert_eq!(ids, vec!["C1", "C2", "C1"]);
    }

    #[test]
    fn json_list_is_an_array_of_strings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cids.json");
        std::fs::write(&path, r#"["A-1", "B-2", ""]"#).unwrap();

        let ids = InputSource::new(&path).load().unwrap();
        assert_eq!(ids, vec![CustomerId::from("A-1"), CustomerId::from("B-2")]);
    }

    #[test]
    fn missing_list_is_a_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = InputSource::new(dir.path().join("absent.txt")).load();
        assert!(matches!(result, Err(PersistenceError::ReadFailed { .. })));
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cids.json");
        std::fs::write(&path, "{not json").unwrap();

        let result = InputSource::new(&path).load();
        assert!(matches!(result, Err(PersistenceError::ParseFailed { .. })));
    }
}
