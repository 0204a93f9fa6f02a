//! Runtime settings from `CIVIS_*` environment variables.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{Language, ResourceFormat};

pub const DEFAULT_BASE_URL: &str = "https://data.civis.bz.it/api/3/action";

/// Fixed per-call timeouts. No retries are layered on top.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct FetchTimeouts {
    pub api: Duration,
    pub resource: Duration,
    pub binary: Duration,
    pub wfs: Duration,
}

impl Default for FetchTimeouts {
    fn default() -> Self {
        Self {
            api: Duration::from_secs(120),
            resource: Duration::from_secs(10),
            binary: Duration::from_secs(30),
            wfs: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Settings {
    pub base_url: String,
    pub language: Language,
    pub db_path: Option<PathBuf>,
    pub scan_interval: Duration,
    pub spreadsheet_scan_interval: Duration,
    pub max_entities: usize,
    pub wfs_fetch_cap: usize,
    pub timeouts: FetchTimeouts,
    /// Directory whose `{lang}.json` files override the embedded translations.
    pub translations_dir: Option<PathBuf>,
    /// JSON pointer to the record list of XML payloads; heuristic search when unset.
    pub xml_records_path: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            language: Language::En,
            db_path: None,
            scan_interval: Duration::from_secs(300),
            spreadsheet_scan_interval: Duration::from_secs(3600),
            max_entities: 100,
            wfs_fetch_cap: 500,
            timeouts: FetchTimeouts::default(),
            translations_dir: None,
            xml_records_path: None,
        }
    }
}

impl Settings {
    pub fn from_env() -> Self { Self::from_lookup(|k| std::env::var(k).ok()) }

    /// Build from any key lookup; unparsable values keep their default.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let mut s = Self::default();
        if let Some(v) = get("CIVIS_BASE_URL").filter(|v| !v.trim().is_empty()) {
            s.base_url = v.trim().trim_end_matches('/').to_string();
        }
        if let Some(v) = get("CIVIS_LANG") {
            match Language::parse(&v) {
                Some(l) => s.language = l,
                None => warn!(value = %v, "config: unknown CIVIS_LANG, using en"),
            }
        }
        s.db_path = get("CIVIS_DB_PATH").filter(|v| !v.is_empty()).map(PathBuf::from);
        s.translations_dir = get("CIVIS_TRANSLATIONS_DIR").filter(|v| !v.is_empty()).map(PathBuf::from);
        s.xml_records_path = get("CIVIS_XML_RECORDS").filter(|v| !v.is_empty());
        if let Some(n) = parse_num::<u64>(&get, "CIVIS_SCAN_SECS") {
            s.scan_interval = Duration::from_secs(n.max(1));
        }
        if let Some(n) = parse_num::<u64>(&get, "CIVIS_SPREADSHEET_SCAN_SECS") {
            s.spreadsheet_scan_interval = Duration::from_secs(n.max(1));
        }
        if let Some(n) = parse_num::<usize>(&get, "CIVIS_MAX_ENTITIES") {
            s.max_entities = n;
        }
        if let Some(n) = parse_num::<usize>(&get, "CIVIS_WFS_CAP") {
            s.wfs_fetch_cap = n;
        }
        if let Some(n) = parse_num::<u64>(&get, "CIVIS_API_TIMEOUT_SECS") {
            s.timeouts.api = Duration::from_secs(n);
        }
        s
    }

    /// Polling period for a binding of this format.
    pub fn scan_interval_for(&self, format: ResourceFormat) -> Duration {
        if format.is_spreadsheet() { self.spreadsheet_scan_interval } else { self.scan_interval }
    }
}

fn parse_num<T: std::str::FromStr>(get: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = get(key)?;
    match raw.trim().parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(key, value = %raw, "config: ignoring unparsable value");
            None
        }
    }
}
