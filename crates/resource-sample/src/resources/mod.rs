//! # Concrete Resources
//!
//! The two process-wide dependencies of the application, both implementing
//! [`Resource`](resource_framework::Resource) so the
//! [`ResourceManager`](resource_framework::ResourceManager) can connect and close them
//! together:
//!
//! - [`DocumentDatabase`] (`"database"`) hands out document collections.
//! - [`Cache`] (`"cache"`) is a key/value store with per-entry expiry.
//!
//! Both accept `memory://` URLs only; anything else fails at connect time.

pub mod cache;
pub mod database;

pub use cache::{Cache, CacheClient};
pub use database::DocumentDatabase;

use resource_framework::ResourceError;

pub(crate) const MEMORY_SCHEME: &str = "memory://";

/// Validates a resource URL, returning the host part.
pub(crate) fn memory_host<'a>(resource: &str, url: &'a str) -> Result<&'a str, ResourceError> {
    url.strip_prefix(MEMORY_SCHEME)
        .ok_or_else(|| ResourceError::ConnectFailed {
            resource: resource.to_string(),
            reason: format!("unsupported url {url:?}, expected {MEMORY_SCHEME}<host>"),
        })
}
