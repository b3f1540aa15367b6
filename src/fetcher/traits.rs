use crate::utils::error::FetchError;
use async_trait::async_trait;
use bytes::Bytes;

/// Fetch primitive used by every prefetch queue
///
/// The queues only rely on the returned future resolving exactly once per
/// call. Transport, caching and timeout policy belong to the implementation.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetch the resource at `url`
    async fn fetch(&self, url: &str) -> Result<Bytes, FetchError>;
}
