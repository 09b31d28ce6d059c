//! Error types for the session authority.
//!
//! Three layers of failure are kept apart:
//!
//! - [`CacheError`] - the fast cache misbehaved (soft, always degradable)
//! - [`StoreError`] - the durable store could not answer
//! - [`AuthorityError`] - what public operations return

use std::time::Duration;

/// Errors raised by a [`FastCache`](crate::cache::FastCache) backend.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// The Redis server returned an error.
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// No connection could be checked out of the pool.
    #[error("Redis pool error: {message}")]
    Pool {
        /// Description of the pool failure.
        message: String,
    },

    /// The round trip did not finish in time.
    #[error("Fast cache operation timed out after {0:?}")]
    Timeout(Duration),

    /// A script or command returned a reply of an unexpected shape.
    #[error("Unexpected fast cache reply: {message}")]
    Corrupt {
        /// Description of the reply.
        message: String,
    },
}

impl CacheError {
    /// Creates a new `Pool` error.
    #[must_use]
    pub fn pool(message: impl Into<String>) -> Self {
        Self::Pool {
            message: message.into(),
        }
    }

    /// Creates a new `Corrupt` error.
    #[must_use]
    pub fn corrupt(message: impl Into<String>) -> Self {
        Self::Corrupt {
            message: message.into(),
        }
    }
}

/// Errors raised by durable-store adapters.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The store could not be reached or rejected the query.
    #[error("Durable store unavailable: {message}")]
    Unavailable {
        /// Description of the failure.
        message: String,
    },

    /// The query did not finish in time.
    #[error("Durable store query timed out after {0:?}")]
    Timeout(Duration),

    /// The store returned data that does not fit the expected shape.
    #[error("Invalid data from durable store: {message}")]
    InvalidData {
        /// Description of the bad data.
        message: String,
    },
}

impl StoreError {
    /// Creates a new `Unavailable` error.
    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    /// Creates a new `InvalidData` error.
    #[must_use]
    pub fn invalid_data(message: impl Into<String>) -> Self {
        Self::InvalidData {
            message: message.into(),
        }
    }
}

/// Errors returned by the authority's public operations.
#[derive(Debug, thiserror::Error)]
pub enum AuthorityError {
    /// A fast-cache operation failed.
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    /// A durable-store operation failed.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// The operation needs a component the process was started without.
    #[error("{component} is not configured")]
    NotConfigured {
        /// The missing component.
        component: &'static str,
    },

    /// The caller passed an argument the operation cannot honour.
    #[error("Invalid input: {message}")]
    InvalidInput {
        /// Description of the problem.
        message: String,
    },

    /// The configuration is invalid.
    #[error("Configuration error: {message}")]
    Configuration {
        /// Description of the configuration error.
        message: String,
    },

    /// The geolocation database could not be opened.
    #[error("Geolocation error: {message}")]
    Geo {
        /// Description of the failure.
        message: String,
    },
}

impl AuthorityError {
    /// Creates a new `NotConfigured` error.
    #[must_use]
    pub fn not_configured(component: &'static str) -> Self {
        Self::NotConfigured { component }
    }

    /// Creates a new `InvalidInput` error.
    #[must_use]
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Creates a new `Configuration` error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Creates a new `Geo` error.
    #[must_use]
    pub fn geo(message: impl Into<String>) -> Self {
        Self::Geo {
            message: message.into(),
        }
    }

    /// Returns `true` if the error means a component is missing.
    #[must_use]
    pub fn is_not_configured(&self) -> bool {
        matches!(self, Self::NotConfigured { .. })
    }

    /// Returns `true` if a backing store (cache or durable) is at fault.
    #[must_use]
    pub fn is_backend_failure(&self) -> bool {
        matches!(self, Self::Cache(_) | Self::Store(_))
    }
}

/// Result alias for the authority's public operations.
pub type AuthorityResult<T> = Result<T, AuthorityError>;

/// Result alias for cache backends.
pub type CacheResult<T> = Result<T, CacheError>;

/// Result alias for durable-store adapters.
pub type StoreResult<T> = Result<T, StoreError>;
