//! Detection of stale type caches.

use std::fmt;
use std::sync::Arc;

use edb_protocol::error_code;

use crate::error::ServerError;

/// Decides whether a server error means the connection's type cache is stale.
///
/// When it is, the connection discards its codecs and described statements,
/// describes the query again and retries it once.
#[derive(Clone)]
pub enum InvalidationPolicy {
    /// Stale when the error code is one of these.
    Codes(Vec<u32>),
    /// Stale when the predicate returns true.
    Custom(Arc<dyn Fn(&ServerError) -> bool + Send + Sync>),
    /// Never treat errors as a stale cache.
    Never,
}

impl InvalidationPolicy {
    /// Policy from a predicate.
    pub fn custom<F>(predicate: F) -> Self
    where
        F: Fn(&ServerError) -> bool + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(predicate))
    }

    /// Whether `error` signals a stale type cache.
    #[must_use]
    pub fn is_stale(&self, error: &ServerError) -> bool {
        match self {
            Self::Codes(codes) => codes.contains(&error.code),
            Self::Custom(predicate) => predicate(error),
            Self::Never => false,
        }
    }
}

impl Default for InvalidationPolicy {
    fn default() -> Self {
        Self::Codes(vec![
            error_code::PARAMETER_TYPE_MISMATCH,
            error_code::STATE_MISMATCH,
        ])
    }
}

impl fmt::Debug for InvalidationPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Codes(codes) => {
                let hex: Vec<String> = codes.iter().map(|c| format!("{c:#010x}")).collect();
                f.debug_tuple("Codes").field(&hex).finish()
            }
            Self::Custom(_) => f.write_str("Custom(<fn>)"),
            Self::Never => f.write_str("Never"),
        }
    }
}
