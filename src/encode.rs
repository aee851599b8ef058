use std::thread;
use std::time::Duration;

use reqwest::Url;
use reqwest::blocking::Client;
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue, USER_AGENT};
use serde::Serialize;
use serde_json::Value;

use crate::config::ResolvedConfig;
use crate::domain::{ExperimentAccession, Perturbed};
use crate::error::FetchError;

/// Appended verbatim to every search so only case experiments come back.
pub const EXCLUDE_CONTROLS: &str = "control_type!=*";

pub trait EncodeClient: Send + Sync {
    fn search(&self, query: &SearchQuery) -> Result<Vec<Value>, FetchError>;
    fn fetch_experiment(
        &self,
        accession: &ExperimentAccession,
        embedded: bool,
    ) -> Result<Value, FetchError>;
}

impl<C: EncodeClient + ?Sized> EncodeClient for &C {
    fn search(&self, query: &SearchQuery) -> Result<Vec<Value>, FetchError> {
        (**self).search(query)
    }

    fn fetch_experiment(
        &self,
        accession: &ExperimentAccession,
        embedded: bool,
    ) -> Result<Value, FetchError> {
        (**self).fetch_experiment(accession, embedded)
    }
}

/// Ordered, repeatable query parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryParams(Vec<(String, String)>);

impl QueryParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, key: &str, value: impl Into<String>) {
        self.0.push((key.to_string(), value.into()));
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.iter().any(|(k, _)| k == key)
    }

    pub fn values(&self, key: &str) -> Vec<&str> {
        self.0
            .iter()
            .filter(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
            .collect()
    }

    pub fn pairs(&self) -> &[(String, String)] {
        &self.0
    }

    /// Adds `format=json` unless a format is already present.
    pub fn ensure_json(&mut self) {
        if !self.contains_key("format") {
            self.push("format", "json");
        }
    }

    /// Builds the request URL. `raw_query` is appended after encoding, untouched.
    pub fn to_url(
        &self,
        base_url: &str,
        path: &str,
        raw_query: Option<&str>,
    ) -> Result<Url, FetchError> {
        let joined = format!(
            "{}/{}",
            base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        );
        let mut url = Url::parse(&joined).map_err(|err| FetchError::EncodeHttp(err.to_string()))?;
        if !self.0.is_empty() {
            url.query_pairs_mut().extend_pairs(self.0.iter());
        }
        if let Some(raw) = raw_query {
            let query = match url.query() {
                Some(existing) if !existing.is_empty() => format!("{existing}&{raw}"),
                _ => raw.to_string(),
            };
            url.set_query(Some(&query));
        }
        Ok(url)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchQuery {
    pub assay_title: Option<String>,
    pub target_labels: Vec<String>,
    pub organism: Option<String>,
    pub status: Option<String>,
    pub perturbed: Perturbed,
    pub limit: String,
}

impl Default for SearchQuery {
    fn default() -> Self {
        Self {
            assay_title: None,
            target_labels: Vec::new(),
            organism: None,
            status: Some("released".to_string()),
            perturbed: Perturbed::Any,
            limit: "all".to_string(),
        }
    }
}

impl SearchQuery {
    pub fn params(&self) -> QueryParams {
        let mut params = QueryParams::new();
        params.push("type", "Experiment");
        if let Some(title) = non_empty(&self.assay_title) {
            params.push("assay_title", title);
        }
        if let Some(status) = non_empty(&self.status) {
            params.push("status", status);
        }
        if let Some(organism) = non_empty(&self.organism) {
            params.push(
                "replicates.library.biosample.donor.organism.scientific_name",
                organism,
            );
        }
        if let Some(perturbed) = self.perturbed.as_param() {
            params.push("perturbed", perturbed);
        }
        for label in split_labels(&self.target_labels) {
            params.push("target.label", label);
        }
        let limit = if self.limit.trim().is_empty() {
            "all"
        } else {
            self.limit.trim()
        };
        params.push("limit", limit);
        params.ensure_json();
        params
    }
}

/// Splits each label on commas, dropping blanks.
pub fn split_labels(labels: &[String]) -> Vec<String> {
    labels
        .iter()
        .flat_map(|label| label.split(','))
        .map(str::trim)
        .filter(|label| !label.is_empty())
        .map(str::to_string)
        .collect()
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

pub fn experiment_params(embedded: bool) -> QueryParams {
    let mut params = QueryParams::new();
    params.push("format", "json");
    if embedded {
        params.push("frame", "embedded");
    }
    params
}

#[derive(Clone)]
pub struct EncodeHttpClient {
    client: Client,
    base_url: String,
    auth_token: Option<String>,
}

impl EncodeHttpClient {
    pub fn new(config: &ResolvedConfig) -> Result<Self, FetchError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("encode-fetch/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| FetchError::EncodeHttp(err.to_string()))?,
        );
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|err| FetchError::EncodeHttp(err.to_string()))?;

        Ok(Self {
            client,
            base_url: config.base_url.clone(),
            auth_token: config.auth_token.clone(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn get_json(&self, url: Url) -> Result<Value, FetchError> {
        let response = self.send_with_retries(|| {
            let request = self.client.get(url.clone());
            match &self.auth_token {
                Some(token) => request.basic_auth(token, Some("")),
                None => request,
            }
        })?;
        let response = Self::handle_status(response)?;
        response
            .json()
            .map_err(|err| FetchError::EncodeResponse(err.to_string()))
    }

    fn handle_status(
        response: reqwest::blocking::Response,
    ) -> Result<reqwest::blocking::Response, FetchError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let message = response
            .text()
            .unwrap_or_else(|_| "ENCODE request failed".to_string());
        Err(FetchError::EncodeStatus { status, message })
    }

    fn send_with_retries<F>(
        &self,
        mut make_req: F,
    ) -> Result<reqwest::blocking::Response, FetchError>
    where
        F: FnMut() -> reqwest::blocking::RequestBuilder,
    {
        const MAX_RETRIES: usize = 3;
        const BASE_DELAY_MS: u64 = 200;
        let mut attempt = 0usize;
        loop {
            let response = make_req().send();
            match response {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if attempt < MAX_RETRIES && is_retryable_status(status) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        tracing::debug!(status, attempt, "retrying ENCODE request");
                        thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Ok(resp);
                }
                Err(err) => {
                    if attempt < MAX_RETRIES && is_retryable_error(&err) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        tracing::debug!(error = %err, attempt, "retrying ENCODE request");
                        thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Err(FetchError::EncodeHttp(err.to_string()));
                }
            }
        }
    }
}

impl EncodeClient for EncodeHttpClient {
    fn search(&self, query: &SearchQuery) -> Result<Vec<Value>, FetchError> {
        let url = query
            .params()
            .to_url(&self.base_url, "/search/", Some(EXCLUDE_CONTROLS))?;
        tracing::info!(%url, "searching ENCODE");
        let body = self.get_json(url)?;
        Ok(search_hits(body))
    }

    fn fetch_experiment(
        &self,
        accession: &ExperimentAccession,
        embedded: bool,
    ) -> Result<Value, FetchError> {
        let path = format!("/experiments/{}/", accession.as_str());
        let url = experiment_params(embedded).to_url(&self.base_url, &path, None)?;
        self.get_json(url)
    }
}

/// The `@graph` array of a search response; anything else is an empty result.
pub fn search_hits(body: Value) -> Vec<Value> {
    match body {
        Value::Object(mut map) => match map.remove("@graph") {
            Some(Value::Array(items)) => items,
            _ => Vec::new(),
        },
        _ => Vec::new(),
    }
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}
