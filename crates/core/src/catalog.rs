//! Catalog entities as returned by the action API.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Language, ResourceFormat};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CatalogGroup {
    pub id: String,
    pub name: String,
    pub display_name: String,
    /// Localized labels keyed by language code.
    #[serde(default)]
    pub localized: BTreeMap<String, String>,
}

impl CatalogGroup {
    /// Build from a `group_list?all_fields=true` entry. Entries without a name or id are skipped.
    pub fn from_api(v: &Value) -> Option<Self> {
        let name = str_field(v, "name");
        let id = str_field(v, "id").or_else(|| name.clone())?;
        let name = name.unwrap_or_else(|| id.clone());
        let display_name = str_field(v, "display_name")
            .or_else(|| str_field(v, "title"))
            .unwrap_or_else(|| name.clone());
        Some(Self { id, name, display_name, localized: BTreeMap::new() })
    }

    /// Label in `lang`, falling back to the upstream display name.
    pub fn label(&self, lang: Language) -> &str {
        self.localized.get(lang.code()).map(String::as_str).unwrap_or(&self.display_name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CatalogPackage {
    pub id: String,
    pub name: String,
    pub title: String,
    pub group_id: String,
}

impl CatalogPackage {
    pub fn from_api(v: &Value, group_id: &str) -> Option<Self> {
        let id = str_field(v, "id")?;
        let name = str_field(v, "name").unwrap_or_else(|| id.clone());
        let title = str_field(v, "title").unwrap_or_else(|| name.clone());
        Some(Self { id, name, title, group_id: group_id.to_string() })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CatalogResource {
    pub id: String,
    pub name: String,
    /// Format tag exactly as declared upstream.
    pub format_tag: String,
    pub url: String,
}

impl CatalogResource {
    pub fn from_api(v: &Value) -> Option<Self> {
        let id = str_field(v, "id")?;
        let name = str_field(v, "name").unwrap_or_else(|| id.clone());
        let format_tag = str_field(v, "format").unwrap_or_default();
        let url = str_field(v, "url").unwrap_or_default();
        Some(Self { id, name, format_tag, url })
    }

    pub fn format(&self) -> Option<ResourceFormat> { ResourceFormat::parse(&self.format_tag) }

    /// Supported format and a URL to fetch from.
    pub fn selectable(&self) -> bool { self.format().is_some() && !self.url.trim().is_empty() }
}

fn str_field(v: &Value, key: &str) -> Option<String> {
    match v.get(key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn group_falls_back_to_name_for_id() {
        let g = CatalogGroup::from_api(&json!({"name": "weather", "display_name": "Weather"})).unwrap();
        assert_eq!(g.id, "weather");
        assert_eq!(g.label(Language::It), "Weather");
        assert!(CatalogGroup::from_api(&json!({"title": "x"})).is_none());
    }

    #[test]
    fn resource_selectability() {
        let r = CatalogResource::from_api(&json!({"id": "r1", "format": "json", "url": "http://x/y"})).unwrap();
        assert!(r.selectable());
        assert_eq!(r.name, "r1");
        let pdf = CatalogResource::from_api(&json!({"id": "r2", "format": "PDF", "url": "http://x/z"})).unwrap();
        assert!(!pdf.selectable());
        let no_url = CatalogResource::from_api(&json!({"id": "r3", "format": "CSV"})).unwrap();
        assert!(!no_url.selectable());
    }
}
