//! Orchestrator configuration.
//!
//! Values come from, in order of precedence: explicit setters, a serialized
//! config (JSON or anything serde reads), then `CLUSTEROPS_*` environment
//! variables, then built-in defaults:
//!
//! - `CLUSTEROPS_PAGE_SIZE`: documents per read page (default 100)
//! - `CLUSTEROPS_UPDATE_CHUNK_SIZE`: documents per update request (default 50)
//! - `CLUSTEROPS_MAX_CLUSTERS`: facet page size and cluster-id cap (default 1000)
//! - `CLUSTEROPS_CLUSTER_FIELD`: root of label paths (default `_cluster_`)

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Default root field under which cluster labels are written.
pub const DEFAULT_CLUSTER_FIELD: &str = "_cluster_";

/// Configuration shared by [`ClusterOps`](crate::ops::ClusterOps) and the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct OpsConfig {
    /// Documents per read page.
    pub page_size: usize,
    /// Documents per update request.
    pub update_chunk_size: usize,
    /// Facet page size; also the default cap on listed cluster ids.
    pub max_clusters: usize,
    /// Root of label paths.
    pub cluster_field: String,
}

impl Default for OpsConfig {
    fn default() -> Self {
        Self {
            page_size: env_usize("CLUSTEROPS_PAGE_SIZE").unwrap_or(100),
            update_chunk_size: env_usize("CLUSTEROPS_UPDATE_CHUNK_SIZE").unwrap_or(50),
            max_clusters: env_usize("CLUSTEROPS_MAX_CLUSTERS").unwrap_or(1000),
            cluster_field: std::env::var("CLUSTEROPS_CLUSTER_FIELD")
                .unwrap_or_else(|_| DEFAULT_CLUSTER_FIELD.to_string()),
        }
    }
}

impl OpsConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self::default()
    }

    /// Parse from JSON; missing keys fall back to [`OpsConfig::default`].
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Set the read page size.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    /// Set the update chunk size.
    pub fn with_update_chunk_size(mut self, chunk_size: usize) -> Self {
        self.update_chunk_size = chunk_size;
        self
    }

    /// Set the facet page size / cluster cap.
    pub fn with_max_clusters(mut self, max_clusters: usize) -> Self {
        self.max_clusters = max_clusters;
        self
    }

    /// Set the label root field.
    pub fn with_cluster_field(mut self, cluster_field: impl Into<String>) -> Self {
        self.cluster_field = cluster_field.into();
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.page_size == 0 {
            return Err(Error::Config("page_size must be > 0".to_string()));
        }
        if self.update_chunk_size == 0 {
            return Err(Error::Config("update_chunk_size must be > 0".to_string()));
        }
        if self.max_clusters == 0 {
            return Err(Error::Config("max_clusters must be > 0".to_string()));
        }
        if self.cluster_field.is_empty() || self.cluster_field.contains('.') {
            return Err(Error::Config(
                "cluster_field must be a non-empty top-level field name".to_string(),
            ));
        }
        Ok(())
    }
}

fn env_usize(key: &str) -> Option<usize> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_overrides_and_defaults() {
        let config = OpsConfig::from_json(r#"{"page_size": 7}"#).unwrap();
        assert_eq!(config.page_size, 7);
        assert!(config.update_chunk_size > 0);
    }

    #[test]
    fn rejects_zero_sizes() {
        let config = OpsConfig::default().with_update_chunk_size(0);
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn rejects_dotted_cluster_field() {
        let config = OpsConfig::default().with_cluster_field("a.b");
        assert!(config.validate().is_err());
    }
}
