//! Error types for cache lookups.
//!
//! Only name misses and decoder failures are recoverable. Structural
//! invariant violations (zero-sized pictures, rebinding a name to a different
//! set, unregistering an untracked picture) are caller bugs and panic.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    /// No image is registered under this name. The caller is expected to
    /// decode the data externally and submit it via `fetch_by_data` plus
    /// `register_name`.
    #[error("no image registered under name {name:?}")]
    NotFound { name: String },

    /// The external decoder handed to `fetch_or_decode` failed.
    #[error("decoding image {name:?} failed")]
    Decode {
        name: String,
        #[source]
        source: anyhow::Error,
    },
}
