//! Error types for flowclass-core
//!
//! Centralized error handling using `thiserror`. Only two kinds of failure
//! ever reach the per-packet path: scratch exhaustion, which the classifier
//! turns into a fail-open `Pass`, and caller misuse of the policy boundary.

use thiserror::Error;

/// Main error type for flowclass-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Detector scratch memory could not be obtained for a flow
    #[error("Resource exhausted: {what}")]
    ResourceExhausted {
        /// What could not be allocated
        what: String,
    },

    /// The caller supplied a contradictory or absent policy selection
    #[error("Policy misuse: {message}")]
    PolicyMisuse {
        /// What was wrong with the invocation
        message: String,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound {
        /// Path to the missing config file
        path: String,
    },

    /// Invalid configuration value
    #[error("Invalid configuration value for '{key}': {message}")]
    ConfigValue {
        /// Configuration key
        key: String,
        /// Error message
        message: String,
    },

    /// A protocol or detector name that is not in the protocol table
    #[error("Unknown protocol: {name}")]
    UnknownProtocol {
        /// The name that failed to resolve
        name: String,
    },

    /// I/O error wrapper
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error
    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),
}

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a resource exhaustion error
    pub fn exhausted(what: impl Into<String>) -> Self {
        Self::ResourceExhausted { what: what.into() }
    }

    /// Create a policy misuse error
    pub fn policy_misuse(message: impl Into<String>) -> Self {
        Self::PolicyMisuse {
            message: message.into(),
        }
    }

    /// Create a config value error
    pub fn config_value(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConfigValue {
            key: key.into(),
            message: message.into(),
        }
    }

    /// Whether the classifier should absorb this error and pass the packet
    pub fn is_fail_open(&self) -> bool {
        matches!(self, Self::ResourceExhausted { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::exhausted("detector scratch");
        assert!(err.to_string().contains("detector scratch"));

        let err = Error::config_value("cache.capacity", "must be non-zero");
        assert!(err.to_string().contains("cache.capacity"));
        assert!(err.to_string().contains("must be non-zero"));
    }

    #[test]
    fn test_fail_open_classification() {
        assert!(Error::exhausted("x").is_fail_open());
        assert!(!Error::policy_misuse("both set").is_fail_open());
        assert!(!Error::Config("bad".into()).is_fail_open());
    }
}
