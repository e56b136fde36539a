//! Elasticsearch access over HTTP

use crate::config::Config;
use crate::errors::{NotifierError, Result};
use crate::query::{Query, SearchRequest, count_body};
use crate::retry::Retrier;
use async_trait::async_trait;
use reqwest::{Client, Method, Response, StatusCode, Url};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Read access to the deploy indices
#[async_trait]
pub trait SearchBackend: Send + Sync {
    /// Number of documents in `indices` matching `query`
    async fn count(&self, indices: &[String], query: &Query) -> Result<u64>;

    /// Run a search request against `indices`
    async fn search(&self, indices: &[String], request: &SearchRequest) -> Result<SearchResponse>;
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchResponse {
    #[serde(default)]
    pub hits: SearchHits,
    #[serde(default)]
    pub aggregations: HashMap<String, Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchHits {
    #[serde(default)]
    pub total: Option<TotalHits>,
    #[serde(default)]
    pub hits: Vec<SearchHit>,
}

/// `hits.total`, an object since 7.x and a bare number before
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum TotalHits {
    Legacy(u64),
    Counted { value: u64 },
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchHit {
    #[serde(rename = "_index", default)]
    pub index: String,
    #[serde(rename = "_id", default)]
    pub id: String,
    #[serde(rename = "_source", default)]
    pub source: Option<Value>,
}

impl SearchHit {
    /// Decode the stored document
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        let source = self.source.clone().ok_or_else(|| {
            NotifierError::Search(format!("hit {} in {} has no _source", self.id, self.index))
        })?;
        Ok(serde_json::from_value(source)?)
    }
}

impl SearchResponse {
    pub fn total_hits(&self) -> u64 {
        match &self.hits.total {
            Some(TotalHits::Legacy(value)) => *value,
            Some(TotalHits::Counted { value, .. }) => *value,
            None => 0,
        }
    }

    /// Look up a terms aggregation by name
    pub fn terms(&self, name: &str) -> Result<Option<TermsAggregationResult>> {
        decode_terms(self.aggregations.get(name))
    }

    /// Decode every hit's `_source`
    pub fn documents<T: DeserializeOwned>(&self) -> Result<Vec<T>> {
        self.hits.hits.iter().map(SearchHit::decode).collect()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TermsAggregationResult {
    #[serde(default)]
    pub buckets: Vec<TermsBucket>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TermsBucket {
    pub key: Value,
    #[serde(default)]
    pub doc_count: u64,
    #[serde(flatten)]
    pub sub_aggregations: HashMap<String, Value>,
}

impl TermsBucket {
    pub fn key_as_string(&self) -> String {
        match &self.key {
            Value::String(key) => key.clone(),
            other => other.to_string(),
        }
    }

    /// Look up a nested terms aggregation by name
    pub fn terms(&self, name: &str) -> Result<Option<TermsAggregationResult>> {
        decode_terms(self.sub_aggregations.get(name))
    }
}

fn decode_terms(value: Option<&Value>) -> Result<Option<TermsAggregationResult>> {
    match value {
        Some(value) => Ok(Some(serde_json::from_value(value.clone())?)),
        None => Ok(None),
    }
}

#[derive(Debug, Deserialize)]
struct CountResponse {
    count: u64,
}

/// Outcome of a failed request attempt
enum AttemptError {
    Retryable(NotifierError),
    Fatal(NotifierError),
}

/// HTTP client for one Elasticsearch cluster
#[derive(Debug, Clone)]
pub struct ElasticClient {
    client: Client,
    endpoints: Vec<Url>,
    retrier: Retrier,
}

impl ElasticClient {
    /// Create a client for the given endpoints
    pub fn new(endpoints: &[String], http_timeout: Duration) -> Result<Self> {
        if endpoints.is_empty() {
            return Err(NotifierError::Config(
                "no elasticsearch endpoint configured".to_string(),
            ));
        }

        let endpoints = endpoints
            .iter()
            .map(|endpoint| {
                Url::parse(endpoint).map_err(|e| {
                    NotifierError::Config(format!("invalid elasticsearch endpoint {}: {}", endpoint, e))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let client = Client::builder()
            .timeout(http_timeout)
            .user_agent(format!("deploy_notifier/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(NotifierError::Http)?;

        Ok(Self {
            client,
            endpoints,
            retrier: Retrier::default(),
        })
    }

    pub fn with_retrier(mut self, retrier: Retrier) -> Self {
        self.retrier = retrier;
        self
    }

    /// Create a client from configuration, health-checking it when enabled
    pub async fn connect(config: &Config) -> Result<Self> {
        let client = Self::new(&config.elasticsearch_urls, config.http_timeout)?;
        if config.healthcheck {
            client.health_check().await?;
        }
        Ok(client)
    }

    /// Succeeds if at least one endpoint answers `HEAD /` with a success status
    pub async fn health_check(&self) -> Result<()> {
        for endpoint in &self.endpoints {
            match self.client.head(endpoint.clone()).send().await {
                Ok(response) if response.status().is_success() => {
                    info!("Elasticsearch endpoint {} is available", endpoint);
                    return Ok(());
                }
                Ok(response) => {
                    warn!(
                        "Elasticsearch endpoint {} health check returned {}",
                        endpoint,
                        response.status()
                    );
                }
                Err(e) => {
                    warn!("Elasticsearch endpoint {} health check failed: {}", endpoint, e);
                }
            }
        }

        Err(NotifierError::BackendDown(format!(
            "no Elasticsearch node available among {}",
            self.endpoint_list()
        )))
    }

    fn endpoint_list(&self) -> String {
        self.endpoints
            .iter()
            .map(Url::as_str)
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn request_url(&self, attempt: u32, path: &str) -> String {
        let index = attempt as usize % self.endpoints.len();
        format!(
            "{}/{}",
            self.endpoints[index].as_str().trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    /// Perform a request, retrying transient failures on the next endpoint
    async fn perform(&self, method: Method, path: &str, body: &Value) -> Result<Value> {
        let mut retry = 0;

        loop {
            let url = self.request_url(retry, path);
            debug!("{} {} (attempt {})", method, url, retry + 1);

            match self.perform_attempt(method.clone(), &url, body).await {
                Ok(value) => return Ok(value),
                Err(AttemptError::Fatal(e)) => return Err(e),
                Err(AttemptError::Retryable(e)) => match self.retrier.next_wait(retry) {
                    Some(wait) => {
                        warn!(
                            "Request to {} failed (attempt {}), retrying in {}ms: {}",
                            url,
                            retry + 1,
                            wait.as_millis(),
                            e
                        );
                        sleep(wait).await;
                        retry += 1;
                    }
                    None => return Err(e),
                },
            }
        }
    }

    async fn perform_attempt(
        &self,
        method: Method,
        url: &str,
        body: &Value,
    ) -> std::result::Result<Value, AttemptError> {
        let response = self
            .client
            .request(method, url)
            .query(&[("ignore_unavailable", "true"), ("allow_no_indices", "true")])
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if is_connection_refused(&e) {
                    AttemptError::Fatal(NotifierError::BackendDown(e.to_string()))
                } else if e.is_timeout() || e.is_connect() || e.is_request() {
                    AttemptError::Retryable(NotifierError::Http(e))
                } else {
                    AttemptError::Fatal(NotifierError::Http(e))
                }
            })?;

        handle_response(response, url).await
    }
}

async fn handle_response(
    response: Response,
    url: &str,
) -> std::result::Result<Value, AttemptError> {
    let status = response.status();

    if status.is_success() {
        return response
            .json::<Value>()
            .await
            .map_err(|e| AttemptError::Fatal(NotifierError::Http(e)));
    }

    let error_body = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());
    let error = NotifierError::Search(format!("{} returned {}: {}", url, status, error_body));

    match status {
        StatusCode::TOO_MANY_REQUESTS
        | StatusCode::BAD_GATEWAY
        | StatusCode::SERVICE_UNAVAILABLE
        | StatusCode::GATEWAY_TIMEOUT => Err(AttemptError::Retryable(error)),
        _ => Err(AttemptError::Fatal(error)),
    }
}

fn is_connection_refused(err: &reqwest::Error) -> bool {
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        if let Some(io_err) = cause.downcast_ref::<std::io::Error>() {
            if io_err.kind() == std::io::ErrorKind::ConnectionRefused {
                return true;
            }
        }
        source = cause.source();
    }
    false
}

fn index_path(indices: &[String], endpoint: &str) -> String {
    format!("{}/{}", indices.join(","), endpoint)
}

#[async_trait]
impl SearchBackend for ElasticClient {
    async fn count(&self, indices: &[String], query: &Query) -> Result<u64> {
        let body = self
            .perform(Method::POST, &index_path(indices, "_count"), &count_body(query))
            .await?;
        let response: CountResponse = serde_json::from_value(body)?;
        Ok(response.count)
    }

    async fn search(&self, indices: &[String], request: &SearchRequest) -> Result<SearchResponse> {
        let body = self
            .perform(Method::POST, &index_path(indices, "_search"), &request.to_json())
            .await?;
        Ok(serde_json::from_value(body)?)
    }
}
