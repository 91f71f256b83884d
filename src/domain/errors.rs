//! Error taxonomy shared by the fetch path and the persistence layer

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Why a single fetch attempt failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchErrorKind {
    /// A page wait condition did not resolve within the step timeout
    Timeout,
    /// The portal rejected the challenge response
    ChallengeRejected,
    /// The history view could not be opened
    NoHistoryControl,
    /// The history table had no usable rows
    EmptyResult,
    /// Offline, and a stop arrived before connectivity came back
    Disconnected,
}

impl FetchErrorKind {
    /// Whether another attempt may help
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        !matches!(self, Self::Disconnected)
    }
}

impl std::fmt::Display for FetchErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Timeout => "timeout",
            Self::ChallengeRejected => "challenge rejected",
            Self::NoHistoryControl => "no history control",
            Self::EmptyResult => "empty result",
            Self::Disconnected => "disconnected",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct FetchError {
    pub kind: FetchErrorKind,
    pub message: String,
}

impl FetchError {
    #[must_use]
    pub fn new(kind: FetchErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }

    #[must_use]
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::Timeout, message)
    }

    #[must_use]
    pub fn challenge_rejected(message: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::ChallengeRejected, message)
    }

    #[must_use]
    pub fn no_history_control(message: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::NoHistoryControl, message)
    }

    #[must_use]
    pub fn empty_result(message: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::EmptyResult, message)
    }

    #[must_use]
    pub fn disconnected(message: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::Disconnected, message)
    }
}

/// Read/write failures on the persisted artifacts
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PersistenceError {
    #[error("failed to read {path}: {reason}")]
    ReadFailed { path: PathBuf, reason: String },

    #[error("failed to write {path}: {reason}")]
    WriteFailed { path: PathBuf, reason: String },

    #[error("failed to parse {path}: {reason}")]
    ParseFailed { path: PathBuf, reason: String },
}

impl PersistenceError {
    pub fn read(path: &Path, reason: impl std::fmt::Display) -> Self {
        Self::ReadFailed { path: path.to_path_buf(), reason: reason.to_string() }
    }

    pub fn write(path: &Path, reason: impl std::fmt::Display) -> Self {
        Self::WriteFailed { path: path.to_path_buf(), reason: reason.to_string() }
    }

    pub fn parse(path: &Path, reason: impl std::fmt::Display) -> Self {
        Self::ParseFailed { path: path.to_path_buf(), reason: reason.to_string() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_disconnected_is_terminal() {
        assert!(FetchErrorKind::Timeout.is_retryable());
        assert!(FetchErrorKind::ChallengeRejected.is_retryable());
        assert!(FetchErrorKind::NoHistoryControl.is_retryable());
        assert!(FetchErrorKind::EmptyResult.is_retryable());
        assert!(!FetchErrorKind::Disconnected.is_retryable());
    }

    #[test]
    fn fetch_error_serialization() {
        let error = FetchError::challenge_rejected("alert: wrong code");
        let serialized = serde_json::to_string(&error).unwrap();
        let deserialized: FetchError = serde_json::from_str(&serialized).unwrap();

        assert_eq!(deserialized, error);
        assert!(serialized.contains("challenge_rejected"));
        assert_eq!(error.to_string(), "challenge rejected: alert: wrong code");
    }
}
