//! Billing portal collaborator
//!
//! The page interaction for one customer id:
//! 1. load the lookup form and read the challenge
//! 2. submit the id with the solved challenge
//! 3. detect the rejection dialog, follow the history link
//! 4. read the history table rows as raw cell text
//!
//! Each step has its own timeout. Row interpretation (amount parsing, empty
//! result detection) belongs to the fetch client, not to this module.
//!
//! `scraper::Html` is not `Send`, so documents are parsed and dropped inside
//! synchronous helpers and never held across an `.await`.

use crate::domain::{CustomerId, FetchError};
use crate::infrastructure::config::PortalConfig;
use crate::infrastructure::http_client::{HttpClient, HttpClientConfig, Page};
use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::future::Future;
use std::sync::Arc;
use tracing::debug;
use url::Url;

/// Cell texts of one history table row
pub type RawRow = Vec<String>;

/// One worker's isolated fetch context
#[async_trait]
pub trait BillingPortal: Send + Sync {
    async fn fetch_rows(&mut self, id: &CustomerId) -> Result<Vec<RawRow>, FetchError>;
}

/// Creates one portal context per worker
#[async_trait]
pub trait PortalFactory: Send + Sync {
    async fn create(&self, worker_id: usize) -> Result<Box<dyn BillingPortal>>;
}

/// Turns challenge text into the answer to submit
#[async_trait]
pub trait ChallengeSolver: Send + Sync {
    async fn solve(&self, challenge: &str) -> Option<String>;
}

/// Answers a challenge by reading the digits it displays
pub struct DigitChallengeSolver {
    digits: Regex,
}

impl DigitChallengeSolver {
    pub fn new() -> Result<Self> {
        Ok(Self { digits: Regex::new(r"\d+").context("Invalid challenge pattern")? })
    }
}

#[async_trait]
impl ChallengeSolver for DigitChallengeSolver {
    async fn solve(&self, challenge: &str) -> Option<String> {
        let answer: String = self.digits.find_iter(challenge).map(|m| m.as_str()).collect();
        (!answer.is_empty()).then_some(answer)
    }
}

/// Compiled page selectors
struct PortalSelectors {
    form: Selector,
    hidden_inputs: Selector,
    challenge: Option<Selector>,
    rejection: Option<Selector>,
    history_link: Selector,
    history_rows: Selector,
    cells: Selector,
}

fn compile(selector: &str) -> Result<Selector> {
    Selector::parse(selector).map_err(|e| anyhow!("Invalid selector '{}': {}", selector, e))
}

fn compile_optional(selector: &str) -> Result<Option<Selector>> {
    let selector = selector.trim();
    if selector.is_empty() { Ok(None) } else { compile(selector).map(Some) }
}

impl PortalSelectors {
    fn new(config: &PortalConfig) -> Result<Self> {
        Ok(Self {
            form: compile("form")?,
            hidden_inputs: compile("input[type=hidden]")?,
            challenge: compile_optional(&config.challenge_selector)?,
            rejection: compile_optional(&config.rejection_selector)?,
            history_link: compile(&config.history_link_selector)?,
            history_rows: compile(&config.history_row_selector)?,
            cells: compile("td, th")?,
        })
    }
}

/// What the lookup form page yielded
#[derive(Debug, Clone, PartialEq, Eq)]
struct LookupForm {
    action: Option<String>,
    hidden_fields: Vec<(String, String)>,
    challenge: Option<String>,
}

/// Where the submission landed
#[derive(Debug, Clone, PartialEq, Eq)]
enum SubmissionOutcome {
    Rejected(String),
    History(String),
    NoHistoryLink,
}

fn element_text(element: ElementRef<'_>) -> String {
    element.text().collect::<Vec<_>>().join(" ").split_whitespace().collect::<Vec<_>>().join(" ")
}

fn parse_lookup_form(selectors: &PortalSelectors, config: &PortalConfig, body: &str) -> LookupForm {
    let document = Html::parse_document(body);
    let id_input = format!("input[name=\"{}\"]", config.id_field);

    // Prefer the form that carries the id field
    let form = Selector::parse(&id_input).ok().and_then(|id_selector| {
        document
            .select(&selectors.form)
            .find(|form| form.select(&id_selector).next().is_some())
    });
    let form = form.or_else(|| document.select(&selectors.form).next());

    let (action, hidden_fields) = match form {
        Some(form) => {
            let action = form
                .value()
                .attr("action")
                .map(str::trim)
                .filter(|a| !a.is_empty())
                .map(str::to_string);
            let hidden = form
                .select(&selectors.hidden_inputs)
                .filter_map(|input| {
                    let name = input.value().attr("name")?;
                    let value = input.value().attr("value").unwrap_or_default();
                    Some((name.to_string(), value.to_string()))
                })
                .collect();
            (action, hidden)
        }
        None => (None, Vec::new()),
    };

    let challenge = selectors
        .challenge
        .as_ref()
        .and_then(|selector| document.select(selector).next())
        .map(element_text);

    LookupForm { action, hidden_fields, challenge }
}

fn parse_submission(selectors: &PortalSelectors, body: &str) -> SubmissionOutcome {
    let document = Html::parse_document(body);

    if let Some(rejection) = selectors
        .rejection
        .as_ref()
        .and_then(|selector| document.select(selector).next())
    {
        return SubmissionOutcome::Rejected(element_text(rejection));
    }

    document
        .select(&selectors.history_link)
        .find_map(|link| link.value().attr("href").map(str::to_string))
        .map_or(SubmissionOutcome::NoHistoryLink, SubmissionOutcome::History)
}

fn parse_history_rows(selectors: &PortalSelectors, body: &str) -> Vec<RawRow> {
    let document = Html::parse_document(body);
    document
        .select(&selectors.history_rows)
        .map(|row| row.select(&selectors.cells).map(element_text).collect::<RawRow>())
        .filter(|row| !row.is_empty())
        .collect()
}

/// Portal context backed by a cookie-isolated HTTP client
pub struct HttpBillingPortal {
    worker_id: usize,
    client: HttpClient,
    config: Arc<PortalConfig>,
    form_url: Url,
    selectors: PortalSelectors,
    solver: Arc<dyn ChallengeSolver>,
}

impl HttpBillingPortal {
    pub fn new(
        worker_id: usize,
        config: Arc<PortalConfig>,
        solver: Arc<dyn ChallengeSolver>,
    ) -> Result<Self> {
        let client = HttpClient::new(&HttpClientConfig {
            user_agent: config.user_agent.clone(),
            timeout: config.step_timeout(),
            max_requests_per_second: config.max_requests_per_second,
        })?;
        let form_url = Url::parse(&config.form_url)
            .with_context(|| format!("Invalid portal form_url: {}", config.form_url))?;
        let selectors = PortalSelectors::new(&config)?;

        Ok(Self { worker_id, client, config, form_url, selectors, solver })
    }

    /// Runs one page step under the step timeout
    async fn step<F>(&self, name: &str, request: F) -> Result<Page, FetchError>
    where
        F: Future<Output = Result<Page>> + Send,
    {
        match tokio::time::timeout(self.config.step_timeout(), request).await {
            Ok(Ok(page)) => Ok(page),
            Ok(Err(e)) => Err(FetchError::timeout(format!("{name}: {e:#}"))),
            Err(_) => Err(FetchError::timeout(format!(
                "{name}: no response within {:?}",
                self.config.step_timeout()
            ))),
        }
    }

    fn resolve(&self, base: &Url, target: &str) -> Result<Url, FetchError> {
        base.join(target)
            .map_err(|e| FetchError::no_history_control(format!("bad link '{target}': {e}")))
    }
}

#[async_trait]
impl BillingPortal for HttpBillingPortal {
    async fn fetch_rows(&mut self, id: &CustomerId) -> Result<Vec<RawRow>, FetchError> {
        let form_page = self.step("load form", self.client.get(self.form_url.clone())).await?;
        let form = parse_lookup_form(&self.selectors, &self.config, &form_page.body);

        let mut fields = form.hidden_fields;
        fields.push((self.config.id_field.clone(), id.to_string()));

        if self.selectors.challenge.is_some() {
            let challenge = form
                .challenge
                .ok_or_else(|| FetchError::timeout("challenge element did not appear"))?;
            let answer = self.solver.solve(&challenge).await.ok_or_else(|| {
                FetchError::challenge_rejected(format!("unsolvable challenge '{challenge}'"))
            })?;
            fields.push((self.config.challenge_field.clone(), answer));
        }

        let submit_url = if self.config.submit_url.is_empty() {
            let target = form.action.as_deref().unwrap_or("");
            form_page
                .url
                .join(target)
                .map_err(|e| FetchError::timeout(format!("bad form action '{target}': {e}")))?
        } else {
            Url::parse(&self.config.submit_url)
                .map_err(|e| FetchError::timeout(format!("bad submit_url: {e}")))?
        };

        let submitted = self.step("submit form", self.client.post_form(submit_url, &fields)).await?;
        let history_url = match parse_submission(&self.selectors, &submitted.body) {
            SubmissionOutcome::Rejected(message) => {
                return Err(FetchError::challenge_rejected(message));
            }
            SubmissionOutcome::NoHistoryLink => {
                return Err(FetchError::no_history_control("history link not found"));
            }
            SubmissionOutcome::History(href) => self.resolve(&submitted.url, &href)?,
        };

        let history = self.step("open history", self.client.get(history_url)).await?;
        let rows = parse_history_rows(&self.selectors, &history.body);
        debug!(worker_id = self.worker_id, cid = %id, rows = rows.len(), "History table read");
        Ok(rows)
    }
}

/// Builds one [`HttpBillingPortal`] per worker
pub struct HttpPortalFactory {
    config: Arc<PortalConfig>,
    solver: Arc<dyn ChallengeSolver>,
}

impl HttpPortalFactory {
    pub fn new(config: PortalConfig, solver: Arc<dyn ChallengeSolver>) -> Self {
        Self { config: Arc::new(config), solver }
    }
}

#[async_trait]
impl PortalFactory for HttpPortalFactory {
    async fn create(&self, worker_id: usize) -> Result<Box<dyn BillingPortal>> {
        let config = Arc::clone(&self.config);
        let portal = HttpBillingPortal::new(worker_id, config, Arc::clone(&self.solver))
            .with_context(|| format!("Failed to create portal context for worker {worker_id}"))?;
        Ok(Box::new(portal))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn selectors() -> (PortalConfig, PortalSelectors) {
        let config = PortalConfig::default();
        let selectors = PortalSelectors::new(&config).unwrap();
        (config, selectors)
    }

    #[test]
    fn lookup_form_collects_action_hidden_fields_and_challenge() {
        let (config, selectors) = selectors();
        let body = r#"
            <form action="/search"><input name="q"></form>
            <form action="/billing/lookup" method="post">
              <input type="hidden" name="token" value="abc123">
              <input type="hidden" name="session">
              <input name="cid">
              <span id="captcha-text"> 4 7 1
                 9 </span>
            </form>"#;

        let form = parse_lookup_form(&selectors, &config, body);
        assert_eq!(form.action.as_deref(), Some("/billing/lookup"));
        assert_eq!(
            form.hidden_fields,
            vec![
                ("token".to_string(), "abc123".to_string()),
                ("session".to_string(), String::new())
            ]
        );
        assert_eq!(form.challenge.as_deref(), Some("4 7 1 9"));
    }

    #[test]
    fn rejection_dialog_wins_over_history_link() {
        let (_, selectors) = selectors();
        let body = concat!(
            r#"<div class="alert-danger">Wrong code</div>"#,
            r#"<a class="bill-history" href="/h">x</a>"#
        );
        assert_eq!(
            parse_submission(&selectors, body),
            SubmissionOutcome::Rejected("Wrong code".to_string())
        );
    }

    #[test]
    fn submission_without_link_has_no_history_control() {
        let (_, selectors) = selectors();
        assert_eq!(
            parse_submission(&selectors, "<p>Nothing here</p>"),
            SubmissionOutcome::NoHistoryLink
        );
        assert_eq!(
            parse_submission(
                &selectors,
                r#"<a class="bill-history" href="history?id=1">History</a>"#
            ),
            SubmissionOutcome::History("history?id=1".to_string())
        );
    }

    #[test]
    fn history_rows_are_cell_texts() {
        let (_, selectors) = selectors();
        let body = r#"
            <table class="history">
              <thead><tr><th>Period</th><th>Amount</th></tr></thead>
              <tbody>
                <tr><td>2024-01</td><td> 12,300 </td></tr>
                <tr><td>2024-02</td></tr>
                <tr></tr>
              </tbody>
            </table>"#;

        let rows = parse_history_rows(&selectors, body);
        assert_eq!(
            rows,
            vec![
                vec!["2024-01".to_string(), "12,300".to_string()],
                vec!["2024-02".to_string()]
            ]
        );
    }

    #[tokio::test]
    async fn digit_solver_reads_displayed_digits() {
        let solver = DigitChallengeSolver::new().unwrap();
        assert_eq!(solver.solve("Enter: 4 7-19").await.as_deref(), Some("4719"));
        assert_eq!(solver.solve("no digits").await, None);
    }

    #[test]
    fn invalid_selector_fails_portal_setup() {
        let config = PortalConfig {
            history_row_selector: "tr[".to_string(),
            ..PortalConfig::default()
        };
        assert!(PortalSelectors::new(&config).is_err());
    }
}
