//! Error taxonomy shared by every crate. All variants are recoverable.

use serde::{Deserialize, Serialize};

/// Which discovery step came back empty.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EmptyReason {
    NoPackages,
    NoRows,
    NoFeatures,
}

impl EmptyReason {
    pub fn code(&self) -> &'static str {
        match self {
            Self::NoPackages => "no_packages",
            Self::NoRows => "no_rows",
            Self::NoFeatures => "no_features",
        }
    }
}

impl std::fmt::Display for EmptyReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::NoPackages => "no packages",
            Self::NoRows => "no rows",
            Self::NoFeatures => "no features",
        })
    }
}

#[derive(Debug, Clone, thiserror::Error, Serialize, Deserialize, PartialEq)]
pub enum BridgeError {
    /// Transport failure, timeout, HTTP error or an upstream `success=false` envelope.
    #[error("connectivity: {0}")]
    Connectivity(String),
    /// Payload could not be turned into rows.
    #[error("format: {0}")]
    FormatParse(String),
    #[error("empty result: {0}")]
    EmptyResult(EmptyReason),
    #[error("selection limit: {count} entities exceed the ceiling of {max}")]
    SelectionLimit { count: usize, max: usize },
    #[error("validation: {0}")]
    Validation(String),
    #[error("internal: {0}")]
    Internal(String),
}

pub type BridgeResult<T> = Result<T, BridgeError>;

impl BridgeError {
    /// Stable reason code used to pick the user-facing message.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Connectivity(_) => "cannot_connect",
            Self::FormatParse(_) => "invalid_format",
            Self::EmptyResult(r) => r.code(),
            Self::SelectionLimit { .. } => "too_many_sensors",
            Self::Validation(_) => "invalid_input",
            Self::Internal(_) => "unknown",
        }
    }
}
