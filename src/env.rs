//! Runtime environment detection.
//!
//! Provides a single source of truth for determining the runtime environment
//! (test, development, production) based on the `LINGCHAT_ENV` environment
//! variable. The environment decides how the backend address is resolved:
//! development builds talk to a locally bound backend, production builds use
//! the configured origin.
//!
//! # Environment Variable
//!
//! Set `LINGCHAT_ENV` to one of:
//! - `test` - Test mode (config lives in a temporary directory)
//! - `development` or `dev` - Development mode
//! - (anything else or unset) - Production mode

/// Runtime environment for the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    /// Production environment (default).
    Production,
    /// Development environment.
    Development,
    /// Test environment.
    Test,
}

impl Environment {
    /// Detect current environment from `LINGCHAT_ENV`.
    #[must_use]
    pub fn current() -> Self {
        Self::from_value(std::env::var("LINGCHAT_ENV").ok().as_deref())
    }

    /// Map a raw `LINGCHAT_ENV` value to an environment.
    #[must_use]
    pub fn from_value(value: Option<&str>) -> Self {
        match value {
            Some("test") => Self::Test,
            Some("development" | "dev") => Self::Development,
            _ => Self::Production,
        }
    }

    /// Returns `true` if this is the test environment.
    #[must_use]
    pub fn is_test(self) -> bool {
        self == Self::Test
    }

    /// Returns `true` if the backend address should be resolved the
    /// development way (override URL, then bind address and port).
    ///
    /// Tests resolve like development so they never depend on an origin.
    #[must_use]
    pub fn uses_local_backend(self) -> bool {
        matches!(self, Self::Development | Self::Test)
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Production => write!(f, "production"),
            Self::Development => write!(f, "development"),
            Self::Test => write!(f, "test"),
        }
    }
}

/// Convenience function to check if running in test mode.
#[must_use]
pub fn is_test_mode() -> bool {
    Environment::current().is_test()
}
