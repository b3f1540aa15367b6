//! Fetch primitives

pub mod http;
pub mod traits;

pub use http::{FetchConfig, HttpFetcher};
pub use traits::Fetcher;
