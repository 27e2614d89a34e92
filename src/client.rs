//! Authenticated, paginated HTTP fetcher for the device-management API.
//!
//! `AbmClient::fetch_all` walks a page chain:
//!
//! - Each page is requested with a bearer token and `Accept: application/json`.
//! - A non-success status is retried up to `FetchPolicy::max_retries` times
//!   with a fixed pause. Retries are sent as GET unless the policy says to
//!   reuse the original method.
//! - A page that is still failing after the last retry aborts the whole walk
//!   with `AbmError::ExhaustedRetries`. Records gathered so far are dropped;
//!   the caller gets everything or an error.
//! - Bodies shaped `{data: [...], links: {next}}` contribute each element of
//!   `data`; any other JSON body contributes itself as one record.
//! - The walk ends when `links.next` is absent, null, or empty. A `next`
//!   that is not a string, or a `links` that is not an object, aborts the
//!   walk. A `next` URL seen earlier in the same walk is treated as a loop
//!   and rejected.
//!
//! Transport errors and malformed JSON are not retried.

use std::collections::HashSet;
use std::time::Duration;

use reqwest::header::ACCEPT;
use reqwest::{Client, Method, Response, Url};
use serde_json::Value;

use crate::config::Config;
use crate::error::{AbmError, Result};

/// Overall timeout for a single page request. Collection endpoints can be
/// slow for large organizations, so this is much longer than the token
/// exchange timeout.
const PAGE_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Connect timeout for page requests (TCP + TLS handshake only).
const PAGE_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Which method a failed page is retried with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetryMethod {
    /// Always retry with GET, even when the first attempt was a POST.
    #[default]
    Get,
    /// Retry with the method (and body) of the first attempt.
    Original,
}

/// Retry and page-chain limits for [`AbmClient::fetch_all`].
///
/// Defaults: 5 retries per page, 5 seconds apart, GET retries, no page cap.
#[derive(Debug, Clone)]
pub struct FetchPolicy {
    /// Retries per page after the first attempt.
    pub max_retries: u32,
    /// Pause before each retry.
    pub retry_delay: Duration,
    /// Method used for retries.
    pub retry_method: RetryMethod,
    /// Upper bound on pages per walk. `None` means unbounded (cycle
    /// detection still applies).
    pub max_pages: Option<usize>,
}

impl Default for FetchPolicy {
    fn default() -> Self {
        FetchPolicy {
            max_retries: 5,
            retry_delay: Duration::from_secs(5),
            retry_method: RetryMethod::Get,
            max_pages: None,
        }
    }
}

/// What to send for each page: method, optional JSON body, query parameters.
///
/// Query parameters are attached to every GET, including retries and
/// follow-up pages. The JSON payload is only sent with POST.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    method: Method,
    payload: Option<Value>,
    query: Vec<(String, String)>,
}

impl FetchRequest {
    /// A plain GET.
    pub fn get() -> Self {
        FetchRequest {
            method: Method::GET,
            payload: None,
            query: Vec::new(),
        }
    }

    /// A POST carrying `payload` as JSON.
    pub fn post(payload: Value) -> Self {
        FetchRequest {
            method: Method::POST,
            payload: Some(payload),
            query: Vec::new(),
        }
    }

    /// Adds a query parameter.
    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Method of the first attempt for each page.
    pub fn method(&self) -> &Method {
        &self.method
    }
}

impl Default for FetchRequest {
    fn default() -> Self {
        Self::get()
    }
}

/// HTTP client for the collection endpoints.
///
/// Holds no token: the caller passes one per walk, which keeps token
/// ownership with the broker.
pub struct AbmClient {
    client: Client,
    base_url: String,
    policy: FetchPolicy,
}

impl AbmClient {
    /// Builds a client for the configured API base URL and fetch policy.
    pub fn new(config: &Config) -> Result<Self> {
        Self::with_base_url(&config.api_base_url, config.fetch.clone())
    }

    /// Builds a client against an arbitrary base URL (e.g. a mock server).
    pub fn with_base_url(base_url: &str, policy: FetchPolicy) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(PAGE_CONNECT_TIMEOUT)
            .timeout(PAGE_REQUEST_TIMEOUT)
            .build()?;
        Ok(AbmClient {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            policy,
        })
    }

    /// API base URL without a trailing slash.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Retry and page-chain policy in effect.
    pub fn policy(&self) -> &FetchPolicy {
        &self.policy
    }

    /// Fetches every page starting at `start_url` and returns all records
    /// in server order.
    ///
    /// # Errors
    ///
    /// - `AbmError::ExhaustedRetries` — a page kept failing; carries the
    ///   final status code.
    /// - `AbmError::Parse` — a page body was not JSON.
    /// - `AbmError::Pagination` — bad start URL, a malformed `links` object
    ///   or `next` link, a repeated
    ///   `next` URL, or the page cap was hit.
    /// - `AbmError::Network` — transport failure.
    pub async fn fetch_all(
        &self,
        start_url: &str,
        token: &str,
        request: &FetchRequest,
    ) -> Result<Vec<Value>> {
        let start = Url::parse(start_url).map_err(|e| AbmError::Pagination {
            message: format!("invalid start URL {start_url}: {e}"),
        })?;

        let mut records = Vec::new();
        let mut visited = HashSet::new();
        let mut current = Some(start);

        while let Some(url) = current.take() {
            if !visited.insert(url.to_string()) {
                return Err(AbmError::Pagination {
                    message: format!("next link points back to an already fetched page: {url}"),
                });
            }
            if let Some(max) = self.policy.max_pages {
                if visited.len() > max {
                    return Err(AbmError::Pagination {
                        message: format!("page chain exceeded {max} pages"),
                    });
                }
            }

            let body = self.fetch_page(&url, token, request).await?;
            let page: Value = serde_json::from_str(&body)?;

            current = next_link(&page, &url)?;
            let before = records.len();
            append_records(&mut records, page);
            tracing::debug!(
                page = visited.len(),
                added = records.len() - before,
                total = records.len(),
                "page fetched"
            );
        }

        Ok(records)
    }

    /// Fetches one page with the retry policy applied; returns the body text.
    async fn fetch_page(&self, url: &Url, token: &str, request: &FetchRequest) -> Result<String> {
        let mut response = self.send(request.method.clone(), url, token, request).await?;

        let mut retries = 0;
        while !response.status().is_success() && retries < self.policy.max_retries {
            tracing::warn!(
                status = %response.status(),
                retry = retries + 1,
                max_retries = self.policy.max_retries,
                %url,
                "page request failed, retrying"
            );
            tokio::time::sleep(self.policy.retry_delay).await;

            let method = match self.policy.retry_method {
                RetryMethod::Get => Method::GET,
                RetryMethod::Original => request.method.clone(),
            };
            response = self.send(method, url, token, request).await?;
            retries += 1;
        }

        let status = response.status();
        if !status.is_success() {
            // The API's error document is the most useful part of the diagnostic.
            let body = response.text().await.unwrap_or_default();
            return Err(AbmError::ExhaustedRetries {
                status,
                attempts: retries + 1,
                url: url.to_string(),
                body,
            });
        }

        Ok(response.text().await?)
    }

    async fn send(
        &self,
        method: Method,
        url: &Url,
        token: &str,
        request: &FetchRequest,
    ) -> Result<Response> {
        let mut builder = self
            .client
            .request(method.clone(), url.clone())
            .bearer_auth(token)
            .header(ACCEPT, "application/json");

        if method == Method::GET {
            if !request.query.is_empty() {
                builder = builder.query(&request.query);
            }
        } else if let Some(payload) = &request.payload {
            builder = builder.json(payload);
        }

        Ok(builder.send().await?)
    }
}

/// Appends the records carried by one page.
fn append_records(records: &mut Vec<Value>, page: Value) {
    match page {
        Value::Object(mut envelope) if envelope.get("data").is_some_and(Value::is_array) => {
            if let Some(Value::Array(data)) = envelope.remove("data") {
                records.extend(data);
            }
        }
        other => records.push(other),
    }
}

/// Resolves `links.next` against the current page URL.
/// A missing, null, or empty `next` ends the chain; a `links` that is not an
/// object or a `next` that is not a string is a broken envelope.
fn next_link(page: &Value, current: &Url) -> Result<Option<Url>> {
    let links = match page.get("links") {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::Object(links)) => links,
        Some(other) => {
            return Err(AbmError::Pagination {
                message: format!("links on {current} is not an object: {other}"),
            });
        }
    };

    let next = match links.get("next") {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::String(next)) if next.is_empty() => return Ok(None),
        Some(Value::String(next)) => next,
        Some(other) => {
            return Err(AbmError::Pagination {
                message: format!("links.next on {current} is not a string: {other}"),
            });
        }
    };

    current.join(next).map(Some).map_err(|e| AbmError::Pagination {
        message: format!("invalid next link {next}: {e}"),
    })
}
