//! HTTP seam: a single `get` the fetcher builds everything else on.

use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use civis_core::{BridgeError, BridgeResult};
use reqwest::Url;
use tracing::debug;

/// Raw upstream reply. Status handling is left to the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpReply {
    pub status: u16,
    pub content_type: String,
    pub body: Bytes,
}

impl HttpReply {
    pub fn json(body: &serde_json::Value) -> Self {
        Self { status: 200, content_type: "application/json".into(), body: Bytes::from(body.to_string()) }
    }

    pub fn bytes(content_type: &str, body: impl Into<Bytes>) -> Self {
        Self { status: 200, content_type: content_type.into(), body: body.into() }
    }

    pub fn status(status: u16) -> Self { Self { status, content_type: "text/plain".into(), body: Bytes::new() } }

    pub fn is_success(&self) -> bool { (200..300).contains(&self.status) }
}

#[async_trait]
pub trait CatalogTransport: Send + Sync {
    async fn get(&self, url: &Url) -> BridgeResult<HttpReply>;
}

/// Production transport over reqwest (rustls).
#[derive(Clone, Default)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Self { Self::default() }
}

#[async_trait]
impl CatalogTransport for HttpTransport {
    async fn get(&self, url: &Url) -> BridgeResult<HttpReply> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| BridgeError::Connectivity(format!("GET {}: {e}", url.path())))?;
        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let body = response
            .bytes()
            .await
            .map_err(|e| BridgeError::Connectivity(format!("reading body of {}: {e}", url.path())))?;
        debug!(status, bytes = body.len(), "transport: reply");
        Ok(HttpReply { status, content_type, body })
    }
}

/// Scripted reply of a [`MockTransport`] route.
#[derive(Debug, Clone)]
pub enum MockReply {
    Reply(HttpReply),
    /// Transport-level failure (connection refused and the like).
    Fail(String),
    /// Never answers; exercises the caller's timeout.
    Hang,
}

#[derive(Debug, Clone)]
struct Route {
    base: String,
    params: Vec<(String, String)>,
    reply: MockReply,
}

/// In-memory transport for tests. A request matches a route when its URL
/// without query equals the route base and it carries every route parameter;
/// the route with the most parameters wins, later routes win ties.
#[derive(Debug, Default)]
pub struct MockTransport {
    routes: Mutex<Vec<Route>>,
    log: Mutex<Vec<String>>,
}

impl MockTransport {
    pub fn new() -> Self { Self::default() }

    pub fn route(&self, base: &str, params: &[(&str, &str)], reply: MockReply) {
        let route = Route {
            base: base.trim_end_matches('/').to_string(),
            params: params.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
            reply,
        };
        if let Ok(mut routes) = self.routes.lock() {
            routes.push(route);
        }
    }

    pub fn route_json(&self, base: &str, params: &[(&str, &str)], body: serde_json::Value) {
        self.route(base, params, MockReply::Reply(HttpReply::json(&body)));
    }

    pub fn route_bytes(&self, base: &str, params: &[(&str, &str)], content_type: &str, body: impl Into<Bytes>) {
        self.route(base, params, MockReply::Reply(HttpReply::bytes(content_type, body)));
    }

    /// Every URL requested so far, in order.
    pub fn requests(&self) -> Vec<String> { self.log.lock().map(|l| l.clone()).unwrap_or_default() }

    /// Number of requests whose URL starts with `prefix`.
    pub fn hits(&self, prefix: &str) -> usize { self.requests().iter().filter(|u| u.starts_with(prefix)).count() }

    fn lookup(&self, url: &Url) -> Option<MockReply> {
        let mut bare = url.clone();
        bare.set_query(None);
        let bare = bare.as_str().trim_end_matches('/').to_string();
        let query: Vec<(String, String)> = url.query_pairs().map(|(k, v)| (k.into_owned(), v.into_owned())).collect();
        let routes = self.routes.lock().ok()?;
        let mut best: Option<&Route> = None;
        for r in routes.iter() {
            if r.base != bare || !r.params.iter().all(|p| query.contains(p)) {
                continue;
            }
            if best.map_or(true, |b| r.params.len() >= b.params.len()) {
                best = Some(r);
            }
        }
        best.map(|r| r.reply.clone())
    }
}

#[async_trait]
impl CatalogTransport for MockTransport {
    async fn get(&self, url: &Url) -> BridgeResult<HttpReply> {
        if let Ok(mut log) = self.log.lock() {
            log.push(url.to_string());
        }
        match self.lookup(url) {
            Some(MockReply::Reply(r)) => Ok(r),
            Some(MockReply::Fail(msg)) => Err(BridgeError::Connectivity(msg)),
            Some(MockReply::Hang) => std::future::pending().await,
            None => Ok(HttpReply::status(404)),
        }
    }
}
