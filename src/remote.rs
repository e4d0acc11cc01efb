//! HTTP client for the remote document store (Elasticsearch REST API).
//!
//! Wraps a `reqwest::Client` configured with the base URL, request timeout,
//! JSON `Accept` header and optional basic auth. Every non-2xx response, and
//! every 2xx response whose body carries an `error` member, is surfaced as
//! [`SyncError::Remote`] with status, headers and body for diagnosis.
//!
//! # Endpoints
//!
//! | Operation | Request |
//! |-----------|---------|
//! | [`list_indices`](RemoteClient::list_indices) | `GET /_cat/indices?format=json` |
//! | [`search`](RemoteClient::search) | `POST /{index}/_search?scroll={keepalive}` |
//! | [`scroll`](RemoteClient::scroll) | `POST /_search/scroll` |
//! | [`clear_scroll`](RemoteClient::clear_scroll) | `DELETE /_search/scroll` |
//! | [`create_index`](RemoteClient::create_index) | `PUT /{index}` |
//! | [`index_document`](RemoteClient::index_document) | `PUT /{index}/_doc/{id}` |

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use reqwest::{Method, RequestBuilder, Response, Url};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::time::Duration;

use crate::config::RemoteConfig;
use crate::error::{Result, SyncError};
use crate::models::{ScrollPage, SearchHit};
use crate::traits::SearchBackend;

/// A client bound to one remote store.
#[derive(Clone)]
pub struct RemoteClient {
    http: reqwest::Client,
    base_url: Url,
    username: Option<String>,
    password: Option<String>,
}

impl RemoteClient {
    pub fn new(config: &RemoteConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.request_timeout)
            .build()?;

        let base_url = Url::parse(&config.base_url)
            .map_err(|e| SyncError::Decode(format!("invalid base URL '{}': {}", config.base_url, e)))?;

        Ok(Self {
            http,
            base_url,
            username: config.username.clone(),
            password: config.password.clone(),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// True when the base URL points at this machine.
    pub fn is_local(&self) -> bool {
        matches!(
            self.base_url.host_str(),
            Some("localhost") | Some("127.0.0.1") | Some("[::1]") | Some("::1")
        )
    }

    fn request(&self, method: Method, path: &str) -> Result<RequestBuilder> {
        let url = self
            .base_url
            .join(path)
            .map_err(|e| SyncError::Decode(format!("invalid request path '{}': {}", path, e)))?;
        let builder = self.http.request(method, url);
        Ok(match &self.username {
            Some(user) => builder.basic_auth(user, self.password.as_deref()),
            None => builder,
        })
    }

    /// List the names of every index the store knows about, unordered.
    pub async fn list_indices(&self) -> Result<Vec<String>> {
        #[derive(Deserialize)]
        struct CatIndex {
            index: String,
        }

        let resp = self
            .request(Method::GET, "/_cat/indices?format=json")?
            .send()
            .await?;
        let body = checked_json(resp).await?;
        let rows: Vec<CatIndex> = serde_json::from_value(body)
            .map_err(|e| SyncError::Decode(format!("_cat/indices: {}", e)))?;
        Ok(rows.into_iter().map(|r| r.index).collect())
    }

    /// Open a scroll over `index`, returning the first page.
    pub async fn search(
        &self,
        index: &str,
        query: &Value,
        size: usize,
        keepalive: Duration,
    ) -> Result<ScrollPage> {
        let path = format!("/{}/_search?scroll={}", index, keepalive_param(keepalive));
        let resp = self
            .request(Method::POST, &path)?
            .json(&json!({
                "query": query,
                "size": size,
                "sort": ["_doc"]
            }))
            .send()
            .await?;
        parse_scroll_page(checked_json(resp).await?)
    }

    /// Fetch the next page of an open scroll.
    pub async fn scroll(&self, scroll_id: &str, keepalive: Duration) -> Result<ScrollPage> {
        let resp = self
            .request(Method::POST, "/_search/scroll")?
            .json(&json!({
                "scroll": keepalive_param(keepalive),
                "scroll_id": scroll_id
            }))
            .send()
            .await?;
        parse_scroll_page(checked_json(resp).await?)
    }

    /// Release a scroll context before its keepalive runs out.
    pub async fn clear_scroll(&self, scroll_id: &str) -> Result<()> {
        let resp = self
            .request(Method::DELETE, "/_search/scroll")?
            .json(&json!({ "scroll_id": [scroll_id] }))
            .send()
            .await?;
        checked_json(resp).await?;
        Ok(())
    }

    pub async fn create_index(&self, index: &str) -> Result<()> {
        let resp = self.request(Method::PUT, &format!("/{}", index))?.send().await?;
        checked_json(resp).await?;
        Ok(())
    }

    pub async fn index_document(&self, index: &str, id: &str, document: &Value) -> Result<()> {
        let resp = self
            .request(Method::PUT, &format!("/{}/_doc/{}", index, id))?
            .json(document)
            .send()
            .await?;
        checked_json(resp).await?;
        Ok(())
    }
}

#[async_trait]
impl SearchBackend for RemoteClient {
    async fn open(
        &self,
        partition: &str,
        query: &Value,
        size: usize,
        keepalive: Duration,
    ) -> Result<ScrollPage> {
        self.search(partition, query, size, keepalive).await
    }

    async fn next(&self, scroll_id: &str, keepalive: Duration) -> Result<ScrollPage> {
        self.scroll(scroll_id, keepalive).await
    }

    async fn release(&self, scroll_id: &str) -> Result<()> {
        self.clear_scroll(scroll_id).await
    }
}

/// Render a keepalive as an Elasticsearch time unit (`"60s"`).
fn keepalive_param(keepalive: Duration) -> String {
    format!("{}s", keepalive.as_secs().max(1))
}

/// Read a response body as JSON, turning failures into [`SyncError::Remote`].
async fn checked_json(resp: Response) -> Result<Value> {
    let status = resp.status();
    let headers = resp.headers().clone();
    let text = resp.text().await?;

    if !status.is_success() {
        return Err(SyncError::remote(status, &headers, text));
    }

    let body: Value = if text.trim().is_empty() {
        Value::Null
    } else {
        serde_json::from_str(&text).map_err(|e| SyncError::Decode(format!("{}: {}", e, text)))?
    };

    if body.get("error").is_some_and(|e| !e.is_null()) {
        return Err(SyncError::remote(status, &headers, text));
    }

    Ok(body)
}

#[derive(Deserialize)]
struct RawScrollResponse {
    #[serde(rename = "_scroll_id")]
    scroll_id: Option<String>,
    hits: RawHits,
}

#[derive(Deserialize)]
struct RawHits {
    total: Option<RawTotal>,
    #[serde(default)]
    hits: Vec<RawHit>,
}

/// `hits.total` is a bare number before ES 7 and `{ "value": n }` after.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawTotal {
    Count(u64),
    Object { value: u64 },
}

#[derive(Deserialize)]
struct RawHit {
    #[serde(rename = "_id")]
    id: String,
    #[serde(rename = "_source", default)]
    source: Map<String, Value>,
}

fn parse_scroll_page(body: Value) -> Result<ScrollPage> {
    let raw: RawScrollResponse = serde_json::from_value(body)
        .map_err(|e| SyncError::Decode(format!("search response: {}", e)))?;

    let total = match raw.hits.total {
        Some(RawTotal::Count(n)) | Some(RawTotal::Object { value: n }) => n,
        None => raw.hits.hits.len() as u64,
    };

    Ok(ScrollPage {
        scroll_id: raw.scroll_id,
        total,
        hits: raw
            .hits
            .hits
            .into_iter()
            .map(|h| SearchHit {
                id: h.id,
                source: h.source,
            })
            .collect(),
    })
}
