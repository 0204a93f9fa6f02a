//! Finalized wizard output: everything the poller needs to recreate entities.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::{CatalogResource, FieldSelector, Language, ResourceFormat, Row};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RowSelection {
    Indices(SmallVec<[usize; 4]>),
    /// Every row of the snapshot (geographic resources).
    All,
}

impl RowSelection {
    pub fn single(idx: usize) -> Self { Self::Indices(smallvec::smallvec![idx]) }
}

/// Immutable once created. A new wizard run supersedes it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceBinding {
    pub title: String,
    pub language: Language,
    pub group_id: String,
    pub package_id: String,
    pub resource: CatalogResource,
    pub format: ResourceFormat,
    /// Canonical URL with `lang` (and WFS parameters) already applied.
    pub url: String,
    pub rows: RowSelection,
    #[serde(default)]
    pub fields: Vec<FieldSelector>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub columns: Option<Vec<String>>,
    /// Rows as seen when the binding was confirmed.
    #[serde(default)]
    pub snapshot: Vec<Row>,
    pub created_ts: i64,
}

impl ResourceBinding {
    /// Row indices this binding covers, resolved against its own snapshot.
    pub fn row_indices(&self) -> Vec<usize> {
        match &self.rows {
            RowSelection::Indices(ix) => ix.to_vec(),
            RowSelection::All => (0..self.snapshot.len()).collect(),
        }
    }

    /// WFS layer name (`TYPENAME`) for geographic resources.
    pub fn layer_name(&self) -> &str { &self.resource.name }

    pub fn entity_count(&self) -> usize {
        match self.format {
            ResourceFormat::Wfs => self.snapshot.len(),
            _ => self.row_indices().len() * self.fields.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn binding(rows: RowSelection) -> ResourceBinding {
        ResourceBinding {
            title: "Weather".into(),
            language: Language::En,
            group_id: "g".into(),
            package_id: "p".into(),
            resource: CatalogResource { id: "r".into(), name: "layer".into(), format_tag: "JSON".into(), url: "http://x".into() },
            format: ResourceFormat::Json,
            url: "http://x?lang=en".into(),
            rows,
            fields: vec![FieldSelector::field("a"), FieldSelector::measurement("t")],
            columns: None,
            snapshot: vec![Row::from_value(json!({"a": 1})).unwrap(), Row::from_value(json!({"a": 2})).unwrap()],
            created_ts: 0,
        }
    }

    #[test]
    fn indices_and_counts() {
        let b = binding(RowSelection::single(1));
        assert_eq!(b.row_indices(), vec![1]);
        assert_eq!(b.entity_count(), 2);
        let all = binding(RowSelection::All);
        assert_eq!(all.row_indices(), vec![0, 1]);
        assert_eq!(all.layer_name(), "layer");
    }

    #[test]
    fn serde_round_trip_keeps_selection() {
        let b = binding(RowSelection::single(0));
        let text = serde_json::to_string(&b).unwrap();
        assert!(text.contains("\"indices\""));
        let back: ResourceBinding = serde_json::from_str(&text).unwrap();
        assert_eq!(back, b);
    }
}
