use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

/// An error raised by a [`CacheStore`](crate::CacheStore).
///
/// These errors never reach callers of [`SelfLoadingCache`](crate::SelfLoadingCache). They are
/// handed to the configured [`ErrorHandler`] and the failed operation is treated as if it had not
/// happened.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing store could not be reached, or timed out.
    #[error("cache store unavailable: {0}")]
    Unavailable(String),
    /// The backing store refused the operation, for example because the value is too large.
    #[error("cache store rejected the operation: {0}")]
    Rejected(String),
    /// Any other store specific failure.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// The store operation during which a [`StoreError`] happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOp {
    Get,
    Put,
    Remove,
}

impl AsRef<str> for StoreOp {
    fn as_ref(&self) -> &str {
        match self {
            Self::Get => "get",
            Self::Put => "put",
            Self::Remove => "remove",
        }
    }
}

impl fmt::Display for StoreOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_ref())
    }
}

/// A failure that was absorbed by the cache instead of being returned to the caller.
#[derive(Debug)]
pub enum Fault<'a> {
    /// A call into the [`CacheStore`](crate::CacheStore) failed.
    Store {
        cache: &'a str,
        op: StoreOp,
        key: &'a dyn fmt::Debug,
        error: &'a StoreError,
    },
    /// A background refresh failed because the loader returned an error.
    ///
    /// The stale entry stays in place and the next expired read will try again.
    Refresh {
        cache: &'a str,
        key: &'a dyn fmt::Debug,
        error: &'a (dyn StdError + Send + Sync + 'static),
    },
}

impl Fault<'_> {
    /// The name of the cache this fault happened in.
    pub fn cache(&self) -> &str {
        match self {
            Self::Store { cache, .. } | Self::Refresh { cache, .. } => cache,
        }
    }

    /// The underlying error.
    pub fn error(&self) -> &(dyn StdError + 'static) {
        match self {
            Self::Store { error, .. } => *error,
            Self::Refresh { error, .. } => *error,
        }
    }
}

impl fmt::Display for Fault<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Store {
                cache, op, key, ..
            } => write!(f, "cache `{cache}`: store {op} failed for key {key:?}"),
            Self::Refresh { cache, key, .. } => {
                write!(f, "cache `{cache}`: refresh failed for key {key:?}")
            }
        }
    }
}

/// A hook invoked for every [`Fault`] the cache absorbs.
pub type ErrorHandler = Arc<dyn Fn(&Fault<'_>) + Send + Sync>;

/// The default [`ErrorHandler`], which logs the fault.
///
/// With the sentry tracing layer installed (see [`init_logging`](crate::logging::init_logging)),
/// these are also reported to Sentry.
pub fn log_fault(fault: &Fault<'_>) {
    match fault {
        Fault::Store {
            cache,
            op,
            key,
            error,
        } => tracing::error!(
            error = *error as &dyn StdError,
            cache,
            op = op.as_ref(),
            key = ?key,
            "Cache store operation failed",
        ),
        Fault::Refresh { cache, key, error } => tracing::error!(
            error = *error as &dyn StdError,
            cache,
            key = ?key,
            "Lazy cache refresh failed",
        ),
    }
}
