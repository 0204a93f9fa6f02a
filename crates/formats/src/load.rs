use civis_core::{BridgeResult, ResourceBinding, ResourceFormat};
use civis_hub::{Payload, ResourceFetcher};
use metrics::counter;
use tracing::{debug, info};

use crate::{normalize_with, NormalizeOptions, Normalized, RawPayload};

/// How WFS fetch failures are reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeoMode {
    /// Failures read as an empty feature list.
    Graceful,
    /// Failures are returned.
    Strict,
}

/// What to fetch: format, canonical URL and (for WFS) the layer name.
#[derive(Debug, Clone, Copy)]
pub struct SourceRef<'a> {
    pub format: ResourceFormat,
    pub url: &'a str,
    pub layer: &'a str,
}

impl<'a> From<&'a ResourceBinding> for SourceRef<'a> {
    fn from(b: &'a ResourceBinding) -> Self { Self { format: b.format, url: &b.url, layer: b.layer_name() } }
}

/// Fetch a resource and normalize it into rows.
pub async fn load_rows(
    fetcher: &ResourceFetcher,
    source: SourceRef<'_>,
    geo: GeoMode,
    opts: &NormalizeOptions,
) -> BridgeResult<Normalized> {
    let (format, raw) = match source.format {
        ResourceFormat::Json => match fetcher.fetch_json_or_features(source.url).await? {
            Payload::Json(doc) => (ResourceFormat::Json, RawPayload::Json(doc)),
            Payload::Features(list) => (ResourceFormat::Json, RawPayload::Features(list)),
            Payload::SpreadsheetPlaceholder => {
                debug!(url = source.url, "formats: json resource served a workbook");
                (ResourceFormat::Xlsx, RawPayload::Bytes(fetcher.fetch_binary(source.url).await?))
            }
        },
        ResourceFormat::Wfs => {
            let features = match geo {
                GeoMode::Graceful => fetcher.fetch_geo_features(source.url, source.layer).await,
                GeoMode::Strict => fetcher.try_fetch_geo_features(source.url, source.layer).await?,
            };
            (ResourceFormat::Wfs, RawPayload::Features(features))
        }
        other => (other, RawPayload::Bytes(fetcher.fetch_binary(source.url).await?)),
    };
    let normalized =
        normalize_with(format, &raw, opts).inspect_err(|_| counter!("formats_parse_errors_total", 1u64))?;
    info!(format = %source.format, rows = normalized.rows.len(), "formats: rows loaded");
    Ok(normalized)
}
