//! Shared fixtures: a scripted billing portal and engine settings rooted in
//! a temporary directory.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Result, bail};
use async_trait::async_trait;
use billing_crawler::crawling::{CrawlingEngine, EngineSettings};
use billing_crawler::domain::{CustomerId, FetchError, FetchErrorKind};
use billing_crawler::infrastructure::billing_portal::{BillingPortal, PortalFactory, RawRow};
use billing_crawler::infrastructure::config::{EngineConfig, PathsConfig, PortalConfig};
use billing_crawler::infrastructure::connectivity::AlwaysOnline;
use once_cell::sync::Lazy;
use tokio::sync::Notify;
use tracing_subscriber::EnvFilter;

static TRACING_SUBSCRIBER: Lazy<()> = Lazy::new(|| {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
});

pub fn init_tracing() {
    Lazy::force(&TRACING_SUBSCRIBER);
}

#[derive(Debug, Clone)]
pub enum Behavior {
    Rows(Vec<RawRow>),
    Fail(FetchErrorKind),
}

/// Per-id portal behavior plus a log of every fetch call
#[derive(Default)]
pub struct Script {
    behaviors: HashMap<String, Behavior>,
    signals: HashMap<String, Arc<Notify>>,
    holds: HashMap<String, Arc<Notify>>,
    calls: Mutex<Vec<String>>,
}

impl Script {
    pub fn new() -> Self {
        Self::default()
    }

    /// `id` yields these `(period, amount text)` rows
    pub fn succeed(mut self, id: &str, rows: &[(&str, &str)]) -> Self {
        let rows = rows
            .iter()
            .map(|(period, amount)| vec![(*period).to_string(), (*amount).to_string()])
            .collect();
        self.behaviors.insert(id.to_string(), Behavior::Rows(rows));
        self
    }

    /// Every attempt for `id` fails with `kind`
    pub fn fail(mut self, id: &str, kind: FetchErrorKind) -> Self {
        self.behaviors.insert(id.to_string(), Behavior::Fail(kind));
        self
    }

    /// Notified each time `id` is fetched
    pub fn signal_on(&mut self, id: &str) -> Arc<Notify> {
        Arc::clone(self.signals.entry(id.to_string()).or_default())
    }

    /// Fetching `id` blocks until the returned handle is notified
    pub fn hold(&mut self, id: &str) -> Arc<Notify> {
        Arc::clone(self.holds.entry(id.to_string()).or_default())
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, id: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|call| *call == id).count()
    }

    async fn respond(&self, id: &CustomerId) -> Result<Vec<RawRow>, FetchError> {
        self.calls.lock().unwrap().push(id.to_string());

        if let Some(signal) = self.signals.get(id.as_str()) {
            signal.notify_one();
        }
        if let Some(hold) = self.holds.get(id.as_str()) {
            hold.notified().await;
        }

        match self.behaviors.get(id.as_str()) {
            Some(Behavior::Rows(rows)) => Ok(rows.clone()),
            Some(Behavior::Fail(kind)) => {
                Err(FetchError::new(*kind, format!("scripted failure for {id}")))
            }
            None => Ok(vec![vec!["Jan".to_string(), "1".to_string()]]),
        }
    }
}

pub struct ScriptedPortal {
    script: Arc<Script>,
}

#[async_trait]
impl BillingPortal for ScriptedPortal {
    async fn fetch_rows(&mut self, id: &CustomerId) -> Result<Vec<RawRow>, FetchError> {
        self.script.respond(id).await
    }
}

pub struct ScriptedFactory {
    script: Arc<Script>,
    broken_workers: HashSet<usize>,
}

impl ScriptedFactory {
    pub fn new(script: Arc<Script>) -> Self {
        Self { script, broken_workers: HashSet::new() }
    }

    /// Portal creation fails for these worker slots
    pub fn with_broken_workers(mut self, workers: &[usize]) -> Self {
        self.broken_workers.extend(workers);
        self
    }
}

#[async_trait]
impl PortalFactory for ScriptedFactory {
    async fn create(&self, worker_id: usize) -> Result<Box<dyn BillingPortal>> {
        if self.broken_workers.contains(&worker_id) {
            bail!("browser profile for worker {worker_id} is unavailable");
        }
        Ok(Box::new(ScriptedPortal { script: Arc::clone(&self.script) }))
    }
}

/// Fast engine settings with all artifacts under `dir`
pub fn settings(dir: &Path, ids: &[&str]) -> EngineSettings {
    let input = dir.join("cids.txt");
    std::fs::write(&input, ids.join("\n")).unwrap();

    EngineSettings {
        engine: EngineConfig {
            batch_size: 10,
            default_workers: 1,
            max_workers: 4,
            max_retries: 3,
            retry_delay_ms: 10,
            connectivity_poll_ms: 10,
            pause_poll_ms: 10,
            inter_batch_delay_ms: 0,
            stats_interval_ms: 50,
        },
        paths: PathsConfig {
            input_list: input,
            result_table: dir.join("results.csv"),
            failure_list: dir.join("failed_cids.json"),
            status_file: dir.join("status.json"),
        },
        portal: PortalConfig::default(),
    }
}

pub fn engine(settings: EngineSettings, factory: ScriptedFactory) -> CrawlingEngine {
    CrawlingEngine::new(settings, Arc::new(factory), Arc::new(AlwaysOnline)).unwrap()
}

/// Waits for the run to drain, failing the test after `limit`
pub async fn wait_idle(engine: &CrawlingEngine, limit: Duration) {
    tokio::time::timeout(limit, engine.wait_until_idle())
        .await
        .expect("run did not drain in time");
}
