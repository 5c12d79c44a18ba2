//! Cluster metadata and its persisted rendering.
//!
//! `MetaData` is an immutable value carried by every cluster state. The
//! update worker decides whether a task changed metadata by comparing the
//! fixed persisted rendering of the previous and candidate values; the same
//! rendering is what the ring store persists.

use crate::{ClusterError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Cluster UUID carried before any metadata has been persisted.
pub const UNKNOWN_CLUSTER_UUID: &str = "_na_";

/// Per-index metadata; opaque to the coordination core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexMetaData {
    /// Index name.
    pub name: String,

    /// Index settings.
    pub settings: BTreeMap<String, String>,

    /// Type name to mapping source.
    pub mappings: BTreeMap<String, String>,
}

impl IndexMetaData {
    /// Create empty metadata for an index.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            settings: BTreeMap::new(),
            mappings: BTreeMap::new(),
        }
    }
}

/// Immutable cluster metadata.
///
/// `version` increases only when persisted content changes; the bump happens
/// in the update worker right before the CAS persist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaData {
    version: u64,
    cluster_uuid: String,
    indices: BTreeMap<String, IndexMetaData>,
}

impl Default for MetaData {
    fn default() -> Self {
        Self {
            version: 0,
            cluster_uuid: UNKNOWN_CLUSTER_UUID.to_string(),
            indices: BTreeMap::new(),
        }
    }
}

impl MetaData {
    /// Start building metadata from scratch.
    pub fn builder() -> MetaDataBuilder {
        MetaDataBuilder::default()
    }

    /// Seed a builder from an existing value.
    pub fn builder_from(&self) -> MetaDataBuilder {
        MetaDataBuilder {
            version: self.version,
            cluster_uuid: self.cluster_uuid.clone(),
            indices: self.indices.clone(),
        }
    }

    /// Persisted-content version.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Cluster UUID; [`UNKNOWN_CLUSTER_UUID`] until first persisted.
    pub fn cluster_uuid(&self) -> &str {
        &self.cluster_uuid
    }

    /// All index metadata, name-ordered.
    pub fn indices(&self) -> &BTreeMap<String, IndexMetaData> {
        &self.indices
    }

    /// Metadata for one index.
    pub fn index(&self, name: &str) -> Option<&IndexMetaData> {
        self.indices.get(name)
    }

    /// The fixed persisted rendering.
    ///
    /// Equal renderings mean a task did not change persisted content; the
    /// field order is stable (name-ordered maps) so the comparison is
    /// deterministic.
    pub fn to_persisted_string(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| ClusterError::Serialization(e.to_string()))
    }
}

/// Builder for [`MetaData`].
#[derive(Debug, Clone)]
pub struct MetaDataBuilder {
    version: u64,
    cluster_uuid: String,
    indices: BTreeMap<String, IndexMetaData>,
}

impl Default for MetaDataBuilder {
    fn default() -> Self {
        Self {
            version: 0,
            cluster_uuid: UNKNOWN_CLUSTER_UUID.to_string(),
            indices: BTreeMap::new(),
        }
    }
}

impl MetaDataBuilder {
    /// Set the cluster UUID.
    pub fn cluster_uuid(mut self, uuid: impl Into<String>) -> Self {
        self.cluster_uuid = uuid.into();
        self
    }

    /// Set the version explicitly.
    pub fn version(mut self, version: u64) -> Self {
        self.version = version;
        self
    }

    /// Bump the version by one.
    pub fn increment_version(mut self) -> Self {
        self.version += 1;
        self
    }

    /// Insert or replace an index.
    pub fn put_index(mut self, index: IndexMetaData) -> Self {
        self.indices.insert(index.name.clone(), index);
        self
    }

    /// Remove an index by name.
    pub fn remove_index(mut self, name: &str) -> Self {
        self.indices.remove(name);
        self
    }

    /// Build the metadata value.
    pub fn build(self) -> MetaData {
        MetaData {
            version: self.version,
            cluster_uuid: self.cluster_uuid,
            indices: self.indices,
        }
    }
}
