use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use civis_core::{
    BridgeError, BridgeResult, CatalogGroup, CatalogPackage, CatalogResource, FetchTimeouts, Language, Settings,
};
use metrics::{counter, histogram};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::transport::{CatalogTransport, HttpReply};
use crate::urls::{self, WFS_COUNT, WFS_PARAMS};

/// A decoded resource body.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Json(Value),
    /// Features of an XML-typed endpoint, re-requested as GeoJSON.
    Features(Vec<Value>),
    /// The URL serves a workbook; fetch it again as binary.
    SpreadsheetPlaceholder,
}

/// Catalog API client and resource downloader. Cheap to clone.
#[derive(Clone)]
pub struct ResourceFetcher {
    base: String,
    transport: Arc<dyn CatalogTransport>,
    timeouts: FetchTimeouts,
    lang: Language,
}

impl ResourceFetcher {
    pub fn new(base: impl Into<String>, transport: Arc<dyn CatalogTransport>, timeouts: FetchTimeouts) -> Self {
        let base = base.into().trim_end_matches('/').to_string();
        Self { base, transport, timeouts, lang: Language::En }
    }

    pub fn from_settings(settings: &Settings, transport: Arc<dyn CatalogTransport>) -> Self {
        Self::new(settings.base_url.clone(), transport, settings.timeouts).with_language(settings.language)
    }

    /// Same fetcher speaking another language.
    pub fn with_language(&self, lang: Language) -> Self { Self { lang, ..self.clone() } }

    async fn get(&self, url: &str, limit: Duration, kind: &'static str) -> BridgeResult<HttpReply> {
        let parsed = urls::parse(url)?;
        let started = Instant::now();
        let res = tokio::time::timeout(limit, self.transport.get(&parsed)).await;
        histogram!("hub_fetch_ms", started.elapsed().as_secs_f64() * 1000.0, "kind" => kind);
        let res = match res {
            Ok(inner) => inner,
            Err(_) => Err(BridgeError::Connectivity(format!("{kind} request timed out after {}s", limit.as_secs()))),
        };
        if let Err(e) = &res {
            counter!("hub_fetch_errors_total", 1u64, "kind" => kind);
            warn!(kind, error = %e, "hub: request failed");
        }
        res
    }

    /// `GET {base}/{endpoint}` and unwrap the `{success, result, error}` envelope.
    pub async fn call_api(&self, endpoint: &str, params: &[(&str, &str)]) -> BridgeResult<Value> {
        let mut all: Vec<(&str, &str)> = params.to_vec();
        all.push(("lang", self.lang.code()));
        let url = urls::set_query_params(&format!("{}/{}", self.base, endpoint), &all)?;
        let reply = self.get(&url, self.timeouts.api, "api").await?;
        let envelope: Option<Value> = serde_json::from_slice(&reply.body).ok();
        let Some(envelope) = envelope.filter(|v| v.get("success").is_some()) else {
            return Err(BridgeError::Connectivity(format!("{endpoint}: HTTP {} without envelope", reply.status)));
        };
        if envelope.get("success").and_then(Value::as_bool) != Some(true) {
            let msg = envelope
                .pointer("/error/message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string();
            warn!(endpoint, error = %msg, "hub: api error");
            return Err(BridgeError::Connectivity(format!("{endpoint}: {msg}")));
        }
        debug!(endpoint, "hub: api call ok");
        Ok(envelope.get("result").cloned().unwrap_or(Value::Null))
    }

    pub async fn group_list(&self) -> BridgeResult<Vec<CatalogGroup>> {
        let result = self.call_api("group_list", &[("all_fields", "true")]).await?;
        let groups: Vec<CatalogGroup> = as_list(&result).iter().filter_map(CatalogGroup::from_api).collect();
        info!(count = groups.len(), "hub: group_list ok");
        Ok(groups)
    }

    pub async fn group_packages(&self, group_id: &str) -> BridgeResult<Vec<CatalogPackage>> {
        let result = self.call_api("group_show", &[("id", group_id), ("include_datasets", "true")]).await?;
        let packages: Vec<CatalogPackage> = result
            .get("packages")
            .map(as_list)
            .unwrap_or_default()
            .iter()
            .filter_map(|p| CatalogPackage::from_api(p, group_id))
            .collect();
        info!(group = group_id, count = packages.len(), "hub: group_show ok");
        Ok(packages)
    }

    pub async fn package_resources(&self, package_id: &str) -> BridgeResult<Vec<CatalogResource>> {
        let result = self.call_api("package_show", &[("id", package_id)]).await?;
        let resources: Vec<CatalogResource> = result
            .get("resources")
            .map(as_list)
            .unwrap_or_default()
            .iter()
            .filter_map(CatalogResource::from_api)
            .collect();
        info!(package = package_id, count = resources.len(), "hub: package_show ok");
        Ok(resources)
    }

    /// Fetch a JSON resource. XML-typed replies are re-requested as GeoJSON
    /// features; spreadsheet replies yield a placeholder.
    pub async fn fetch_json_or_features(&self, url: &str) -> BridgeResult<Payload> {
        let reply = self.get(url, self.timeouts.resource, "resource").await?;
        ensure_success(&reply, url)?;
        let ct = reply.content_type.to_ascii_lowercase();
        if ["excel", "xls", "spreadsheet"].iter().any(|m| ct.contains(m)) {
            debug!(content_type = %ct, "hub: spreadsheet body, skipping json decode");
            return Ok(Payload::SpreadsheetPlaceholder);
        }
        if ct.contains("xml") {
            let json_url =
                urls::set_query_params(url, &[("REQUEST", "GetFeature"), ("OUTPUTFORMAT", "application/json")])?;
            let reply = self.get(&json_url, self.timeouts.resource, "resource").await?;
            ensure_success(&reply, &json_url)?;
            let doc = decode_json(&reply.body)?;
            return Ok(Payload::Features(features_of(&doc)));
        }
        Ok(Payload::Json(decode_json(&reply.body)?))
    }

    pub async fn fetch_binary(&self, url: &str) -> BridgeResult<Bytes> {
        let reply = self.get(url, self.timeouts.binary, "binary").await?;
        ensure_success(&reply, url)?;
        debug!(bytes = reply.body.len(), "hub: binary ok");
        Ok(reply.body)
    }

    /// WFS GetFeature for `layer`; any failure yields an empty list.
    pub async fn fetch_geo_features(&self, wfs_url: &str, layer: &str) -> Vec<Value> {
        self.try_fetch_geo_features(wfs_url, layer).await.unwrap_or_default()
    }

    /// WFS GetFeature for `layer`, surfacing failures.
    pub async fn try_fetch_geo_features(&self, wfs_url: &str, layer: &str) -> BridgeResult<Vec<Value>> {
        let mut params: Vec<(&str, &str)> = WFS_PARAMS.to_vec();
        params.push(("TYPENAME", layer));
        params.push(("COUNT", WFS_COUNT));
        let url = urls::set_query_params(wfs_url, &params)?;
        let reply = self.get(&url, self.timeouts.wfs, "wfs").await?;
        ensure_success(&reply, &url)?;
        let doc = decode_json(&reply.body)?;
        let features = features_of(&doc);
        info!(layer, count = features.len(), "hub: wfs ok");
        Ok(features)
    }
}

fn ensure_success(reply: &HttpReply, url: &str) -> BridgeResult<()> {
    if reply.is_success() {
        Ok(())
    } else {
        Err(BridgeError::Connectivity(format!("HTTP {} from {url}", reply.status)))
    }
}

fn decode_json(body: &[u8]) -> BridgeResult<Value> {
    serde_json::from_slice(body).map_err(|e| BridgeError::FormatParse(format!("invalid json: {e}")))
}

fn features_of(doc: &Value) -> Vec<Value> { doc.get("features").map(as_list).unwrap_or_default() }

fn as_list(v: &Value) -> Vec<Value> { v.as_array().cloned().unwrap_or_default() }
