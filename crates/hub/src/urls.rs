//! Query-string helpers for canonical resource URLs.

use civis_core::{BridgeError, BridgeResult, CatalogResource, Language, ResourceFormat};
use reqwest::Url;

/// Fixed WFS GetFeature parameters baked into canonical WFS URLs.
pub const WFS_PARAMS: [(&str, &str); 5] = [
    ("SERVICE", "WFS"),
    ("VERSION", "2.0.0"),
    ("REQUEST", "GetFeature"),
    ("OUTPUTFORMAT", "application/json"),
    ("SRSNAME", "EPSG:4326"),
];

/// Feature count requested per WFS call.
pub const WFS_COUNT: &str = "1000";

pub fn parse(url: &str) -> BridgeResult<Url> {
    Url::parse(url.trim()).map_err(|e| BridgeError::Connectivity(format!("invalid url {url:?}: {e}")))
}

/// Set query parameters, replacing existing ones whose names match case-insensitively.
pub fn set_query_params(url: &str, params: &[(&str, &str)]) -> BridgeResult<String> {
    let mut u = parse(url)?;
    let kept: Vec<(String, String)> = u
        .query_pairs()
        .filter(|(k, _)| !params.iter().any(|(p, _)| p.eq_ignore_ascii_case(k)))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    {
        let mut q = u.query_pairs_mut();
        q.clear();
        for (k, v) in &kept {
            q.append_pair(k, v);
        }
        for (k, v) in params {
            q.append_pair(k, v);
        }
    }
    Ok(u.to_string())
}

/// Drop any `lang` parameter and append the active one.
pub fn with_language(url: &str, lang: Language) -> BridgeResult<String> { set_query_params(url, &[("lang", lang.code())]) }

/// Canonical URL stored in a binding: language applied and, for WFS, the
/// GetFeature parameters with the resource name as `TYPENAME`.
pub fn resource_url(resource: &CatalogResource, lang: Language) -> BridgeResult<String> {
    let url = with_language(&resource.url, lang)?;
    match resource.format() {
        Some(ResourceFormat::Wfs) => {
            let mut params: Vec<(&str, &str)> = WFS_PARAMS.to_vec();
            params.insert(4, ("TYPENAME", resource.name.as_str()));
            set_query_params(&url, &params)
        }
        _ => Ok(url),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn language_replaces_existing() {
        let u = with_language("http://x/data.json?lang=it&a=1", Language::De).unwrap();
        assert_eq!(u, "http://x/data.json?a=1&lang=de");
        let u = with_language("http://x/data.json", Language::En).unwrap();
        assert_eq!(u, "http://x/data.json?lang=en");
    }

    #[test]
    fn params_replace_case_insensitively() {
        let u = set_query_params("http://x/wfs?request=GetCapabilities&service=WFS", &[("REQUEST", "GetFeature")]).unwrap();
        assert_eq!(u, "http://x/wfs?service=WFS&REQUEST=GetFeature");
    }

    #[test]
    fn wfs_resources_get_feature_params() {
        let r = CatalogResource { id: "r".into(), name: "p_bz:Stations".into(), format_tag: "WFS".into(), url: "http://x/geoserver/wfs".into() };
        let u = resource_url(&r, Language::It).unwrap();
        let parsed = Url::parse(&u).unwrap();
        let pairs: Vec<(String, String)> = parsed.query_pairs().map(|(k, v)| (k.into_owned(), v.into_owned())).collect();
        assert!(pairs.contains(&("TYPENAME".into(), "p_bz:Stations".into())));
        assert!(pairs.contains(&("SRSNAME".into(), "EPSG:4326".into())));
        assert!(pairs.contains(&("lang".into(), "it".into())));
        let json = CatalogResource { format_tag: "JSON".into(), ..r };
        assert_eq!(resource_url(&json, Language::En).unwrap(), "http://x/geoserver/wfs?lang=en");
    }

    #[test]
    fn bad_urls_are_connectivity_errors() {
        assert_eq!(with_language("not a url", Language::En).unwrap_err().reason(), "cannot_connect");
    }
}
