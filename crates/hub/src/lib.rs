//! civis hub: catalog API calls and resource downloads.
//!
//! All network access goes through [`CatalogTransport`]; every call is bounded
//! by a fixed timeout and never retried.

#![forbid(unsafe_code)]

mod fetcher;
pub mod transport;
pub mod urls;

pub use fetcher::{Payload, ResourceFetcher};
pub use transport::{CatalogTransport, HttpReply, HttpTransport, MockReply, MockTransport};
pub use urls::{resource_url, set_query_params, with_language};
