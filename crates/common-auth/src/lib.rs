//! Authentication-source collaborator interface shared by autotest services.
//!
//! An [`AuthSource`] is a named binding to an identity provider. The
//! diagnostic service never talks to an identity provider itself: it asks an
//! [`AuthSourceFactory`] for a fresh source per request and drives it through
//! the operations below.

pub mod static_source;

use async_trait::async_trait;
use indexmap::IndexMap;
use thiserror::Error;

pub use static_source::{StaticSourceConfig, StaticSourceRegistry};

/// Released identity attributes: name to ordered values, in release order.
pub type Attributes = IndexMap<String, Vec<String>>;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("No authentication source with id '{0}' found.")]
    UnknownSource(String),
    #[error("Not authenticated.")]
    NotAuthenticated,
    #[error("{0}")]
    Backend(String),
    #[error("failed to read authentication sources: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse authentication sources: {0}")]
    Parse(#[from] serde_yaml::Error),
}

/// Result of asking a source to require authentication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginOutcome {
    /// The login completed within the call.
    Authenticated,
    /// The source handed the request cycle to an interactive flow.
    Redirect { location: String },
}

#[async_trait]
pub trait AuthSource: Send + Sync {
    async fn is_authenticated(&self) -> Result<bool, AuthError>;

    /// Force a login. May not return control to the caller in any useful
    /// sense: a [`LoginOutcome::Redirect`] must be handed back to the client
    /// as-is.
    async fn require_auth(&self) -> Result<LoginOutcome, AuthError>;

    async fn logout(&self) -> Result<(), AuthError>;

    async fn attributes(&self) -> Result<Attributes, AuthError>;
}

/// Builds a fresh [`AuthSource`] for a `SourceID`.
#[async_trait]
pub trait AuthSourceFactory: Send + Sync {
    async fn create(&self, source_id: &str) -> Result<Box<dyn AuthSource>, AuthError>;
}
