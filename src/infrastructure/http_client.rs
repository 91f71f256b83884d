//! HTTP client for the billing portal with rate limiting
//!
//! Every worker builds its own client, so each one has an isolated cookie
//! jar (portal session) and its own request budget.

use anyhow::{Context, Result};
use governor::{
    Quota, RateLimiter,
    clock::DefaultClock,
    state::{InMemoryState, direct::NotKeyed},
};
use reqwest::{
    Client, Response, Url,
    header::{HeaderMap, HeaderValue, USER_AGENT},
};
use std::num::NonZeroU32;
use std::time::Duration;

/// HTTP client configuration for one worker
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub user_agent: String,
    pub timeout: Duration,
    pub max_requests_per_second: u32,
}

/// A fetched page plus the URL it was finally served from (after redirects)
#[derive(Debug, Clone)]
pub struct Page {
    pub url: Url,
    pub body: String,
}

pub struct HttpClient {
    client: Client,
    rate_limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
}

impl HttpClient {
    pub fn new(config: &HttpClientConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&config.user_agent).context("Invalid user agent")?,
        );

        let client = Client::builder()
            .timeout(config.timeout)
            .default_headers(headers)
            .cookie_store(true)
            .gzip(true)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .context("Failed to create HTTP client")?;

        let quota = Quota::per_second(
            NonZeroU32::new(config.max_requests_per_second)
                .context("Rate limit must be greater than 0")?,
        );

        Ok(Self { client, rate_limiter: RateLimiter::direct(quota) })
    }

    pub async fn get(&self, url: Url) -> Result<Page> {
        self.rate_limiter.until_ready().await;
        tracing::debug!("GET {}", url);

        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .with_context(|| format!("Failed to fetch URL: {url}"))?;
        read_page(response).await
    }

    /// Submits a urlencoded form
    pub async fn post_form(&self, url: Url, fields: &[(String, String)]) -> Result<Page> {
        self.rate_limiter.until_ready().await;
        tracing::debug!("POST {} ({} fields)", url, fields.len());

        let response = self
            .client
            .post(url.clone())
            .form(fields)
            .send()
            .await
            .with_context(|| format!("Failed to submit form to: {url}"))?;
        read_page(response).await
    }
}

async fn read_page(response: Response) -> Result<Page> {
    let status = response.status();
    let url = response.url().clone();
    if !status.is_success() {
        anyhow::bail!("HTTP request failed with status {}: {}", status, url);
    }

    let body = response
        .text()
        .await
        .with_context(|| format!("Failed to read response body from: {url}"))?;
    tracing::debug!("Fetched {} ({} chars)", url, body.len());
    Ok(Page { url, body })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_rate_is_rejected() {
        let config = HttpClientConfig {
            user_agent: "test".to_string(),
            timeout: Duration::from_secs(1),
            max_requests_per_second: 0,
        };
        assert!(HttpClient::new(&config).is_err());
    }

    #[test]
    fn client_builds_with_cookie_store() {
        let config = HttpClientConfig {
            user_agent: "billing-crawler-test".to_string(),
            timeout: Duration::from_secs(5),
            max_requests_per_second: 2,
        };
        assert!(HttpClient::new(&config).is_ok());
    }
}
