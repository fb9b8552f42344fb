//! Authentication sources declared in a YAML document.
//!
//! Lets the diagnostic service run without a real identity provider: each
//! declared source carries a fixed attribute set and an in-memory signed-in
//! flag that lives as long as the registry.

use std::collections::HashSet;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;
use serde::Deserialize;
use tokio::sync::RwLock;

use crate::{Attributes, AuthError, AuthSource, AuthSourceFactory, LoginOutcome};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StaticSourceConfig {
    /// Whether the source starts out signed in.
    pub authenticated: bool,
    /// When set, logins are answered with a redirect to this URL instead of
    /// completing in-process.
    pub login_url: Option<String>,
    /// Attributes released once signed in.
    pub attributes: Attributes,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawRegistry {
    sources: IndexMap<String, StaticSourceConfig>,
}

#[derive(Debug)]
struct RegistryInner {
    sources: IndexMap<String, StaticSourceConfig>,
    signed_in: RwLock<HashSet<String>>,
}

#[derive(Debug, Clone)]
pub struct StaticSourceRegistry {
    inner: Arc<RegistryInner>,
}

impl StaticSourceRegistry {
    pub fn new(sources: IndexMap<String, StaticSourceConfig>) -> Self {
        let signed_in = sources
            .iter()
            .filter(|(_, config)| config.authenticated)
            .map(|(id, _)| id.clone())
            .collect();
        Self {
            inner: Arc::new(RegistryInner {
                sources,
                signed_in: RwLock::new(signed_in),
            }),
        }
    }

    pub fn from_path(path: &Path) -> Result<Self, AuthError> {
        let file = File::open(path)?;
        Self::from_reader(BufReader::new(file))
    }

    pub fn from_reader<R: std::io::Read>(reader: R) -> Result<Self, AuthError> {
        let raw: RawRegistry = serde_yaml::from_reader(reader)?;
        Ok(Self::new(raw.sources))
    }

    pub fn source_ids(&self) -> impl Iterator<Item = &str> {
        self.inner.sources.keys().map(String::as_str)
    }
}

#[async_trait]
impl AuthSourceFactory for StaticSourceRegistry {
    async fn create(&self, source_id: &str) -> Result<Box<dyn AuthSource>, AuthError> {
        if !self.inner.sources.contains_key(source_id) {
            return Err(AuthError::UnknownSource(source_id.to_string()));
        }
        Ok(Box::new(StaticSource {
            id: source_id.to_string(),
            registry: self.inner.clone(),
        }))
    }
}

struct StaticSource {
    id: String,
    registry: Arc<RegistryInner>,
}

impl StaticSource {
    fn config(&self) -> Result<&StaticSourceConfig, AuthError> {
        self.registry
            .sources
            .get(&self.id)
            .ok_or_else(|| AuthError::UnknownSource(self.id.clone()))
    }
}

#[async_trait]
impl AuthSource for StaticSource {
    async fn is_authenticated(&self) -> Result<bool, AuthError> {
        Ok(self.registry.signed_in.read().await.contains(&self.id))
    }

    async fn require_auth(&self) -> Result<LoginOutcome, AuthError> {
        if let Some(location) = &self.config()?.login_url {
            tracing::debug!(source = %self.id, %location, "handing login to external flow");
            return Ok(LoginOutcome::Redirect {
                location: location.clone(),
            });
        }

        self.registry.signed_in.write().await.insert(self.id.clone());
        tracing::debug!(source = %self.id, "static source signed in");
        Ok(LoginOutcome::Authenticated)
    }

    async fn logout(&self) -> Result<(), AuthError> {
        self.registry.signed_in.write().await.remove(&self.id);
        tracing::debug!(source = %self.id, "static source signed out");
        Ok(())
    }

    async fn attributes(&self) -> Result<Attributes, AuthError> {
        if self.is_authenticated().await? {
            Ok(self.config()?.attributes.clone())
        } else {
            Ok(Attributes::new())
        }
    }
}
