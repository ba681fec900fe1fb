//! Error type for the cleanup engine.
//!
//! Failures fall into a handful of buckets that callers genuinely treat
//! differently: configuration problems abort before any I/O, missing
//! resources are often tolerated and recorded, throttling and transport
//! problems are retried close to the wire, and everything else ends the
//! run. The variants here mirror those decisions rather than raw HTTP
//! statuses; the clients translate statuses into them in one place.

use thiserror::Error;

#[cfg(test)]
mod tests;

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ReapError>;

type Cause = Box<dyn std::error::Error + Send + Sync>;

/// Anything that can go wrong during a cleanup run.
#[derive(Error, Debug)]
pub enum ReapError {
    /// The run options are inconsistent or incomplete. Always raised
    /// before the first API call.
    #[error("invalid configuration: {reason}")]
    BadConfig {
        reason: String,
        #[source]
        cause: Option<Cause>,
    },

    /// The registry or the packages API refused an action (401/403).
    /// Outside the login handshake this is never recoverable.
    #[error("permission denied during {action} (http {status})")]
    Denied { action: String, status: u16 },

    /// A manifest, version or package that should exist does not.
    /// Callers decide whether that is tolerable; see [`ReapError::is_missing`].
    #[error("missing {what}")]
    Missing { what: String },

    /// The server asked us to slow down (429).
    #[error("rate limited by the server{}", throttle_hint(.wait_seconds))]
    Throttled { wait_seconds: Option<u64> },

    /// The server failed on its side (5xx), after retries were exhausted.
    #[error("server failure (http {status}): {detail}")]
    Upstream { status: u16, detail: String },

    /// The request never produced a usable response: timeout, refused
    /// connection, broken body.
    #[error("transport failure: {context}")]
    Http {
        context: String,
        #[source]
        source: Option<Cause>,
    },

    /// A payload or user-supplied value could not be understood: manifest
    /// JSON, a digest string, a pattern.
    #[error("unusable {what}")]
    Malformed {
        what: String,
        #[source]
        source: Option<Cause>,
    },
}

fn throttle_hint(wait_seconds: &Option<u64>) -> String {
    match wait_seconds {
        Some(seconds) => format!(", retry after {}s", seconds),
        None => String::new(),
    }
}

impl ReapError {
    pub fn bad_config(reason: impl Into<String>) -> Self {
        Self::BadConfig {
            reason: reason.into(),
            cause: None,
        }
    }

    pub fn bad_config_with(
        reason: impl Into<String>,
        cause: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::BadConfig {
            reason: reason.into(),
            cause: Some(Box::new(cause)),
        }
    }

    pub fn denied(action: impl Into<String>, status: u16) -> Self {
        Self::Denied {
            action: action.into(),
            status,
        }
    }

    /// A missing resource, named so log lines read naturally:
    ///
    /// ```
    /// use libreap::error::ReapError;
    ///
    /// let err = ReapError::missing("manifest sha256:abc");
    /// assert_eq!(err.to_string(), "missing manifest sha256:abc");
    /// assert!(err.is_missing());
    /// ```
    pub fn missing(what: impl Into<String>) -> Self {
        Self::Missing { what: what.into() }
    }

    pub fn throttled(wait_seconds: Option<u64>) -> Self {
        Self::Throttled { wait_seconds }
    }

    pub fn upstream(status: u16, detail: impl Into<String>) -> Self {
        Self::Upstream {
            status,
            detail: detail.into(),
        }
    }

    pub fn http(context: impl Into<String>) -> Self {
        Self::Http {
            context: context.into(),
            source: None,
        }
    }

    pub fn http_with(
        context: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Http {
            context: context.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn malformed(what: impl Into<String>) -> Self {
        Self::Malformed {
            what: what.into(),
            source: None,
        }
    }

    pub fn malformed_with(
        what: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Malformed {
            what: what.into(),
            source: Some(Box::new(source)),
        }
    }

    /// True for [`ReapError::Missing`]. The graph builder and executor
    /// branch on this to record a gap and keep going instead of matching
    /// the variant at every call site.
    pub fn is_missing(&self) -> bool {
        matches!(self, Self::Missing { .. })
    }
}
