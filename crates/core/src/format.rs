//! Closed set of resource formats and interface languages.

use serde::{Deserialize, Serialize};

/// Resource formats the bridge knows how to normalize.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum ResourceFormat {
    Json,
    Wfs,
    Xlsx,
    Xls,
    Csv,
    Xml,
}

impl ResourceFormat {
    pub const ALL: [ResourceFormat; 6] = [Self::Json, Self::Wfs, Self::Xlsx, Self::Xls, Self::Csv, Self::Xml];

    /// Parse a catalog format tag. Matching is case-insensitive; unknown tags yield `None`.
    pub fn parse(tag: &str) -> Option<Self> {
        match tag.trim().to_ascii_uppercase().as_str() {
            "JSON" => Some(Self::Json),
            "WFS" => Some(Self::Wfs),
            "XLSX" => Some(Self::Xlsx),
            "XLS" => Some(Self::Xls),
            "CSV" => Some(Self::Csv),
            "XML" => Some(Self::Xml),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Json => "JSON",
            Self::Wfs => "WFS",
            Self::Xlsx => "XLSX",
            Self::Xls => "XLS",
            Self::Csv => "CSV",
            Self::Xml => "XML",
        }
    }

    /// Binary workbook formats (polled on the long interval).
    pub fn is_spreadsheet(&self) -> bool { matches!(self, Self::Xlsx | Self::Xls) }

    /// Formats with a header row and positional columns.
    pub fn is_tabular(&self) -> bool { matches!(self, Self::Xlsx | Self::Xls | Self::Csv) }
}

impl std::fmt::Display for ResourceFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { f.write_str(self.as_str()) }
}

/// Interface languages offered by the wizard.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    En,
    It,
    De,
    Rm,
}

impl Language {
    pub const ALL: [Language; 4] = [Self::En, Self::It, Self::De, Self::Rm];

    pub fn parse(code: &str) -> Option<Self> {
        match code.trim().to_ascii_lowercase().as_str() {
            "en" => Some(Self::En),
            "it" => Some(Self::It),
            "de" => Some(Self::De),
            "rm" => Some(Self::Rm),
            _ => None,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::En => "en",
            Self::It => "it",
            Self::De => "de",
            Self::Rm => "rm",
        }
    }

    /// Native name shown in the language picker.
    pub fn native_name(&self) -> &'static str {
        match self {
            Self::En => "English",
            Self::It => "Italiano",
            Self::De => "Deutsch",
            Self::Rm => "Ladin",
        }
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { f.write_str(self.code()) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_tags_parse_case_insensitively() {
        assert_eq!(ResourceFormat::parse(" json "), Some(ResourceFormat::Json));
        assert_eq!(ResourceFormat::parse("Xlsx"), Some(ResourceFormat::Xlsx));
        assert_eq!(ResourceFormat::parse("PDF"), None);
        assert_eq!(ResourceFormat::parse(""), None);
    }

    #[test]
    fn format_serializes_upper_case() {
        let s = serde_json::to_string(&ResourceFormat::Wfs).unwrap();
        assert_eq!(s, "\"WFS\"");
        let back: ResourceFormat = serde_json::from_str("\"CSV\"").unwrap();
        assert_eq!(back, ResourceFormat::Csv);
    }

    #[test]
    fn spreadsheet_and_tabular_split() {
        assert!(ResourceFormat::Xls.is_spreadsheet());
        assert!(!ResourceFormat::Csv.is_spreadsheet());
        assert!(ResourceFormat::Csv.is_tabular());
        assert!(!ResourceFormat::Json.is_tabular());
    }

    #[test]
    fn language_codes() {
        assert_eq!(Language::parse("DE"), Some(Language::De));
        assert_eq!(Language::parse("fr"), None);
        assert_eq!(Language::Rm.native_name(), "Ladin");
    }
}
