//! Checkpointed policy catalogue
//!
//! The policy catalogue is the most expensive artifact of a run. It is built
//! once per workspace by a [`CatalogueGenerator`] and persisted under a fixed
//! name; every later run loads the cached copy instead of regenerating it.
//! There is no staleness check: edits to the catalogue configuration only
//! take effect after the cached artifact is deleted.

use crate::config::CatalogueConfig;
use crate::environment::Environment;
use crate::error::{PolicySimError, Result};
use crate::store::ArtifactStore;
use crate::workspace::{CATALOGUE_KEY, WorkspaceHandle};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// Current catalogue format version
pub const CATALOGUE_SCHEMA_VERSION: u32 = 1;

/// A single interaction policy of the domain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    /// Stable identifier
    pub id: String,

    /// Natural-language statement of the policy
    pub description: String,

    /// Categorization tags
    #[serde(default)]
    pub tags: Vec<String>,
}

impl Policy {
    /// Create a policy without tags
    pub fn new(id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            tags: Vec::new(),
        }
    }
}

/// Weighted relation between two policies (e.g. how often they co-occur)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyEdge {
    pub from: String,
    pub to: String,
    pub weight: f64,
}

/// The policy graph of a domain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogueArtifact {
    /// Format version
    pub schema_version: u32,

    /// Domain the catalogue was derived for
    pub domain: String,

    /// Policies (graph nodes)
    pub policies: Vec<Policy>,

    /// Relations between policies (graph edges)
    #[serde(default)]
    pub edges: Vec<PolicyEdge>,

    /// When the catalogue was generated
    pub created_at: DateTime<Utc>,

    /// Generator-specific extras
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub metadata: Value,
}

impl CatalogueArtifact {
    /// Create an empty catalogue for a domain
    pub fn new(domain: impl Into<String>) -> Self {
        Self {
            schema_version: CATALOGUE_SCHEMA_VERSION,
            domain: domain.into(),
            policies: Vec::new(),
            edges: Vec::new(),
            created_at: Utc::now(),
            metadata: Value::Null,
        }
    }

    /// Add a policy
    pub fn with_policy(mut self, policy: Policy) -> Self {
        self.policies.push(policy);
        self
    }

    /// Add an edge
    pub fn with_edge(
        mut self,
        from: impl Into<String>,
        to: impl Into<String>,
        weight: f64,
    ) -> Self {
        self.edges.push(PolicyEdge {
            from: from.into(),
            to: to.into(),
            weight,
        });
        self
    }

    /// Look up a policy by id
    pub fn policy(&self, id: &str) -> Option<&Policy> {
        self.policies.iter().find(|p| p.id == id)
    }

    /// Serialize for persistence
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    /// Deserialize a persisted catalogue, rejecting unknown format versions
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let artifact: CatalogueArtifact = serde_json::from_slice(bytes)?;
        if artifact.schema_version != CATALOGUE_SCHEMA_VERSION {
            return Err(PolicySimError::UnsupportedSchema {
                artifact: "catalogue",
                found: artifact.schema_version,
                expected: CATALOGUE_SCHEMA_VERSION,
            });
        }
        Ok(artifact)
    }
}

/// Derives the policy catalogue from the environment. Typically slow and
/// costly; no retries are applied around it.
#[async_trait]
pub trait CatalogueGenerator: Send + Sync {
    async fn generate(
        &self,
        environment: &Environment,
        config: &CatalogueConfig,
    ) -> Result<CatalogueArtifact>;
}

/// Produces or loads the catalogue of a workspace
pub struct CatalogueBuilder {
    store: Arc<dyn ArtifactStore>,
}

impl CatalogueBuilder {
    /// Create a builder over the given store
    pub fn new(store: Arc<dyn ArtifactStore>) -> Self {
        Self { store }
    }

    /// Return the workspace catalogue, generating and persisting it first if
    /// none exists yet.
    ///
    /// Generation happens under the store's build lock, and presence is
    /// checked again once the lock is held so that a concurrent run which
    /// finished the build first is loaded rather than repeated.
    pub async fn obtain(
        &self,
        workspace: &WorkspaceHandle,
        environment: &Environment,
        config: &CatalogueConfig,
        generator: &dyn CatalogueGenerator,
    ) -> Result<CatalogueArtifact> {
        if workspace.catalogue_cached() {
            tracing::info!("Loading cached policy catalogue");
            return self.load().await;
        }

        let _lock = self.store.lock(CATALOGUE_KEY, config.lock_timeout).await?;

        if self.store.has(CATALOGUE_KEY).await? {
            tracing::info!("Policy catalogue already present, loading");
            return self.load().await;
        }

        tracing::info!(domain = %environment.name, "Building the policy catalogue");
        let artifact = generator.generate(environment, config).await?;
        self.store.put(CATALOGUE_KEY, &artifact.to_bytes()?).await?;

        tracing::info!(
            policies = artifact.policies.len(),
            edges = artifact.edges.len(),
            "Finished building the policy catalogue"
        );
        Ok(artifact)
    }

    async fn load(&self) -> Result<CatalogueArtifact> {
        let bytes = self.store.get(CATALOGUE_KEY).await?.ok_or_else(|| {
            PolicySimError::Other("Catalogue artifact disappeared from the store".to_string())
        })?;
        CatalogueArtifact::from_bytes(&bytes)
    }
}
