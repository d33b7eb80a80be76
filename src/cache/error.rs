//! Cache error taxonomy
//!
//! Every fallible operation in the crate returns [`CacheError`]. Capacity
//! pressure is never an error: it is resolved internally through eviction.

use std::fmt;

/// Result alias used throughout the crate
pub type CacheResult<T> = Result<T, CacheError>;

/// Errors surfaced by the cache, tracker, warmer and metrics substrate
#[derive(Debug, Clone, PartialEq)]
pub enum CacheError {
    /// Rejected input at the call boundary (empty key, self pair, score out of range)
    Validation(String),
    /// Operation exceeded its share of a time budget
    Timeout,
    /// Colder tier or its backing store could not be reached
    StoreUnavailable(String),
    /// Invalid or unloadable configuration
    Configuration(String),
    /// Anything else; always logged at error severity by the caller
    Unexpected(String),
}

/// Stable error classification used as a metric label value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    Timeout,
    StoreUnavailable,
    Configuration,
    Unexpected,
}

impl ErrorKind {
    /// Label value for this kind
    #[inline]
    pub const fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Timeout => "timeout",
            ErrorKind::StoreUnavailable => "store_unavailable",
            ErrorKind::Configuration => "configuration",
            ErrorKind::Unexpected => "unexpected",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheError::Validation(msg) => write!(f, "Validation error: {}", msg),
            CacheError::Timeout => write!(f, "Operation timed out"),
            CacheError::StoreUnavailable(msg) => write!(f, "Store unavailable: {}", msg),
            CacheError::Configuration(msg) => write!(f, "Configuration error: {}", msg),
            CacheError::Unexpected(msg) => write!(f, "Unexpected error: {}", msg),
        }
    }
}

impl std::error::Error for CacheError {}

impl CacheError {
    /// Create validation error
    #[inline]
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create store-unavailable error
    #[inline]
    pub fn store_unavailable(msg: impl Into<String>) -> Self {
        Self::StoreUnavailable(msg.into())
    }

    /// Create configuration error
    #[inline]
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create unexpected error
    #[inline]
    pub fn unexpected(msg: impl Into<String>) -> Self {
        Self::Unexpected(msg.into())
    }

    /// Classification of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::Timeout => ErrorKind::Timeout,
            Self::StoreUnavailable(_) => ErrorKind::StoreUnavailable,
            Self::Configuration(_) => ErrorKind::Configuration,
            Self::Unexpected(_) => ErrorKind::Unexpected,
        }
    }

    /// Whether a later warming cycle may succeed where this one failed
    pub fn retryable(&self) -> bool {
        matches!(self, Self::Timeout | Self::StoreUnavailable(_))
    }
}

impl From<toml::de::Error> for CacheError {
    fn from(error: toml::de::Error) -> Self {
        Self::Configuration(error.to_string())
    }
}

impl From<std::io::Error> for CacheError {
    fn from(error: std::io::Error) -> Self {
        Self::Configuration(error.to_string())
    }
}

impl From<tokio::task::JoinError> for CacheError {
    fn from(error: tokio::task::JoinError) -> Self {
        Self::Unexpected(error.to_string())
    }
}

/// Reject empty identifiers at the call boundary
#[inline]
pub(crate) fn validate_key(key: &str) -> CacheResult<()> {
    if key.is_empty() {
        return Err(CacheError::validation("key must not be empty"));
    }
    Ok(())
}

/// Reject scores and thresholds outside `[0, 1]`
#[inline]
pub(crate) fn validate_unit_interval(name: &str, value: f64) -> CacheResult<()> {
    if !(0.0..=1.0).contains(&value) {
        return Err(CacheError::validation(format!(
            "{} must be within [0, 1], got {}",
            name, value
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_labels() {
        assert_eq!(CacheError::Timeout.kind().as_str(), "timeout");
        assert_eq!(
            CacheError::store_unavailable("down").kind(),
            ErrorKind::StoreUnavailable
        );
        assert_eq!(CacheError::unexpected("boom").kind().to_string(), "unexpected");
    }

    #[test]
    fn test_retryable() {
        assert!(CacheError::Timeout.retryable());
        assert!(CacheError::store_unavailable("x").retryable());
        assert!(!CacheError::validation("x").retryable());
        assert!(!CacheError::unexpected("x").retryable());
    }

    #[test]
    fn test_validation_helpers() {
        assert!(validate_key("").is_err());
        assert!(validate_key("WETH_USDT").is_ok());
        assert!(validate_unit_interval("min_score", 1.5).is_err());
        assert!(validate_unit_interval("min_score", f64::NAN).is_err());
        assert!(validate_unit_interval("min_score", 0.0).is_ok());
    }
}
