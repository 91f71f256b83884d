//! # Fetch Client
//!
//! Wraps one worker's [`BillingPortal`] with:
//! - a connectivity wait before every attempt
//! - a bounded retry loop (`max_retries` attempts, fixed delay between them)
//! - row interpretation into [`RecordData`]
//!
//! A stop request cuts both waits short. Such an abort is reported separately
//! from retry exhaustion, because the id was never really given up on.

use crate::crawling::control::RunControl;
use crate::domain::{CustomerId, FetchError, RecordData};
use crate::infrastructure::billing_portal::{BillingPortal, RawRow};
use crate::infrastructure::config::{EngineConfig, PortalConfig};
use crate::infrastructure::connectivity::ConnectivityProbe;
use anyhow::{Context, Result};
use regex::Regex;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Why [`FetchClient::fetch`] produced no record
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchFailure {
    /// Every attempt failed; the id belongs in the failure set
    #[error("gave up after {attempts} attempt(s): {last}")]
    Exhausted { attempts: u32, last: FetchError },

    /// A stop request interrupted the retry loop
    #[error("aborted by stop after {attempts} attempt(s): {last}")]
    Aborted { attempts: u32, last: FetchError },
}

impl FetchFailure {
    pub const fn last_error(&self) -> &FetchError {
        match self {
            Self::Exhausted { last, .. } | Self::Aborted { last, .. } => last,
        }
    }

    pub const fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted { .. })
    }
}

/// Turns raw history rows into period amounts
#[derive(Debug, Clone)]
pub struct RowParser {
    separators: Regex,
    decimal: Regex,
    period_column: usize,
    amount_column: usize,
    min_columns: usize,
}

impl RowParser {
    pub fn new(config: &PortalConfig) -> Result<Self> {
        Ok(Self {
            separators: Regex::new(r"[,\s]").context("Invalid separator pattern")?,
            decimal: Regex::new(r"^\d+(\.\d+)?$").context("Invalid amount pattern")?,
            period_column: config.period_column,
            amount_column: config.amount_column,
            min_columns: config.min_columns(),
        })
    }

    /// Strips thousands separators; anything but a non-negative decimal is zero
    pub fn parse_amount(&self, text: &str) -> f64 {
        let normalized = self.separators.replace_all(text, "");
        if self.decimal.is_match(&normalized) {
            normalized.parse().unwrap_or(0.0)
        } else {
            0.0
        }
    }

    /// Rows with too few columns or a blank period are skipped
    pub fn parse_rows(&self, rows: &[RawRow]) -> RecordData {
        let mut data = RecordData::new();
        for row in rows {
            if row.len() < self.min_columns {
                continue;
            }
            let period = row[self.period_column].trim();
            if period.is_empty() {
                continue;
            }
            data.insert(period, self.parse_amount(&row[self.amount_column]));
        }
        data
    }
}

/// Retry and connectivity policy
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub connectivity_poll: Duration,
}

impl From<&EngineConfig> for RetryPolicy {
    fn from(config: &EngineConfig) -> Self {
        Self {
            max_retries: config.max_retries.max(1),
            retry_delay: config.retry_delay(),
            connectivity_poll: config.connectivity_poll(),
        }
    }
}

pub struct FetchClient {
    worker_id: usize,
    portal: Box<dyn BillingPortal>,
    probe: Arc<dyn ConnectivityProbe>,
    control: Arc<RunControl>,
    parser: Arc<RowParser>,
    policy: RetryPolicy,
}

impl FetchClient {
    pub fn new(
        worker_id: usize,
        portal: Box<dyn BillingPortal>,
        probe: Arc<dyn ConnectivityProbe>,
        control: Arc<RunControl>,
        parser: Arc<RowParser>,
        policy: RetryPolicy,
    ) -> Self {
        Self { worker_id, portal, probe, control, parser, policy }
    }

    /// Fetches one id, retrying up to the policy's attempt budget
    pub async fn fetch(&mut self, id: &CustomerId) -> Result<RecordData, FetchFailure> {
        let mut attempts = 0;

        loop {
            attempts += 1;

            if let Err(last) = self.wait_for_connectivity().await {
                return Err(FetchFailure::Aborted { attempts, last });
            }

            let last = match self.attempt(id).await {
                Ok(data) => {
                    debug!(
                        worker_id = self.worker_id,
                        cid = %id,
                        attempts,
                        periods = data.len(),
                        "Fetched"
                    );
                    return Ok(data);
                }
                Err(e) => e,
            };

            warn!(
                worker_id = self.worker_id,
                cid = %id,
                attempt = attempts,
                max_retries = self.policy.max_retries,
                "⚠️ Fetch attempt failed: {}",
                last
            );

            if !last.kind.is_retryable() {
                return Err(if self.control.is_stopping() {
                    FetchFailure::Aborted { attempts, last }
                } else {
                    FetchFailure::Exhausted { attempts, last }
                });
            }
            if attempts >= self.policy.max_retries {
                return Err(FetchFailure::Exhausted { attempts, last });
            }
            if !self.control.sleep_or_stop(self.policy.retry_delay).await {
                info!(
                    worker_id = self.worker_id,
                    cid = %id,
                    "🛑 Stop requested during retry wait"
                );
                return Err(FetchFailure::Aborted { attempts, last });
            }
        }
    }

    async fn attempt(&mut self, id: &CustomerId) -> Result<RecordData, FetchError> {
        let rows = self.portal.fetch_rows(id).await?;
        let data = self.parser.parse_rows(&rows);
        if data.is_empty() {
            return Err(FetchError::empty_result(format!(
                "{} history rows, none usable",
                rows.len()
            )));
        }
        Ok(data)
    }

    /// Polls the probe until online. Fails with `Disconnected` on stop.
    async fn wait_for_connectivity(&self) -> Result<(), FetchError> {
        let mut announced = false;
        loop {
            if self.probe.is_online().await {
                if announced {
                    info!(worker_id = self.worker_id, "🌐 Connectivity restored");
                }
                return Ok(());
            }
            if !announced {
                warn!(worker_id = self.worker_id, "📡 Offline, waiting for connectivity");
                announced = true;
            }
            if !self.control.sleep_or_stop(self.policy.connectivity_poll).await {
                return Err(FetchError::disconnected("stop requested while offline"));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::FetchErrorKind;
    use async_trait::async_trait;
    use rstest::rstest;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    fn parser() -> RowParser {
        RowParser::new(&PortalConfig::default()).unwrap()
    }

    fn row(cells: &[&str]) -> RawRow {
        cells.iter().map(|c| (*c).to_string()).collect()
    }

    #[rstest]
    #[case("12,300", 12_300.0)]
    #[case(" 1 234.50 ", 1_234.5)]
    #[case("0", 0.0)]
    #[case("-50", 0.0)]
    #[case("N/A", 0.0)]
    #[case("", 0.0)]
    #[case("1.2.3", 0.0)]
    fn amount_normalization(#[case] text: &str, #[case] expected: f64) {
        assert!((parser().parse_amount(text) - expected).abs() < f64::EPSILON);
    }

    #[test]
    fn short_rows_are_skipped() {
        let rows = vec![row(&["2024-01", "100"]), row(&["2024-02"]), row(&["", "5"])];
        let data = parser().parse_rows(&rows);
        assert_eq!(data.len(), 1);
        assert_eq!(data.get("2024-01"), Some(100.0));
    }

    /// Portal that replays scripted outcomes and counts calls
    struct ScriptedPortal {
        outcomes: VecDeque<Result<Vec<RawRow>, FetchError>>,
        calls: Arc<AtomicU32>,
    }

    #[async_trait]
    impl BillingPortal for ScriptedPortal {
        async fn fetch_rows(&mut self, _id: &CustomerId) -> Result<Vec<RawRow>, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.outcomes
                .pop_front()
                .unwrap_or_else(|| Err(FetchError::timeout("script exhausted")))
        }
    }

    struct SwitchProbe(AtomicBool);

    #[async_trait]
    impl ConnectivityProbe for SwitchProbe {
        async fn is_online(&self) -> bool {
            self.0.load(Ordering::SeqCst)
        }
    }

    fn client(
        outcomes: Vec<Result<Vec<RawRow>, FetchError>>,
        online: bool,
    ) -> (FetchClient, Arc<AtomicU32>, Arc<RunControl>, Arc<SwitchProbe>) {
        let calls = Arc::new(AtomicU32::new(0));
        let control = Arc::new(RunControl::new(Duration::from_secs(1)));
        let probe = Arc::new(SwitchProbe(AtomicBool::new(online)));
        let portal = ScriptedPortal { outcomes: outcomes.into(), calls: Arc::clone(&calls) };
        let policy = RetryPolicy {
            max_retries: 3,
            retry_delay: Duration::from_secs(10),
            connectivity_poll: Duration::from_secs(5),
        };
        let fetch = FetchClient::new(
            0,
            Box::new(portal),
            probe.clone(),
            Arc::clone(&control),
            Arc::new(parser()),
            policy,
        );
        (fetch, calls, control, probe)
    }

    #[tokio::test(start_paused = true)]
    async fn retries_after_transient_failure() {
        let (mut fetch, calls, _, _) = client(
            vec![Err(FetchError::challenge_rejected("wrong code")), Ok(vec![row(&["Jan", "100"])])],
            true,
        );

        let started = tokio::time::Instant::now();
        let data = fetch.fetch(&"C1".into()).await.unwrap();

        assert_eq!(data.get("Jan"), Some(100.0));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(10) && elapsed < Duration::from_secs(11));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausts_after_exactly_max_retries() {
        let (mut fetch, calls, _, _) = client(Vec::new(), true);

        let started = tokio::time::Instant::now();
        let failure = fetch.fetch(&"C2".into()).await.unwrap_err();

        assert!(matches!(failure, FetchFailure::Exhausted { attempts: 3, .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // Delay only between attempts
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(20) && elapsed < Duration::from_secs(21));
    }

    #[tokio::test(start_paused = true)]
    async fn empty_table_is_an_empty_result() {
        let (mut fetch, _, _, _) =
            client(vec![Ok(vec![row(&["only-one-cell"])]), Ok(Vec::new()), Ok(Vec::new())], true);

        let failure = fetch.fetch(&"C3".into()).await.unwrap_err();
        assert_eq!(failure.last_error().kind, FetchErrorKind::EmptyResult);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_during_retry_wait_aborts() {
        let (mut fetch, calls, control, _) = client(Vec::new(), true);

        let stopper = {
            let control = Arc::clone(&control);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(3)).await;
                control.stop();
            })
        };

        let started = tokio::time::Instant::now();
        let failure = fetch.fetch(&"C4".into()).await.unwrap_err();
        stopper.await.unwrap();

        assert!(failure.is_aborted());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn offline_waits_then_proceeds() {
        let (mut fetch, calls, _, probe) = client(vec![Ok(vec![row(&["Jan", "1"])])], false);

        let switch = {
            let probe = Arc::clone(&probe);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(12)).await;
                probe.0.store(true, Ordering::SeqCst);
            })
        };

        assert!(fetch.fetch(&"C5".into()).await.is_ok());
        switch.await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_while_offline_is_disconnected() {
        let (mut fetch, calls, control, _) = client(Vec::new(), false);
        control.stop();

        let failure = fetch.fetch(&"C6".into()).await.unwrap_err();
        assert!(failure.is_aborted());
        assert_eq!(failure.last_error().kind, FetchErrorKind::Disconnected);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
