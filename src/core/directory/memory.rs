// src/core/directory/memory.rs

//! An in-process owner directory for single-instance deployments and tests.

use super::{OwnerDirectory, OwnerRecord, assignment_key, owner_key};
use crate::core::FoghornError;
use async_trait::async_trait;
use dashmap::DashMap;

#[derive(Debug, Default)]
pub struct MemoryDirectory {
    entries: DashMap<String, String>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the assignment list for an instance. Test hook.
    pub fn assign_clusters(&self, instance_id: &str, clusters: &[&str]) {
        self.entries
            .insert(assignment_key(instance_id), clusters.join(","));
    }

    /// Raw read of any key. Test hook.
    pub fn raw_get(&self, key: &str) -> Option<String> {
        self.entries.get(key).map(|v| v.clone())
    }
}

#[async_trait]
impl OwnerDirectory for MemoryDirectory {
    async fn claim(
        &self,
        cluster_id: &str,
        node_id: &str,
        record: &OwnerRecord,
    ) -> Result<(), FoghornError> {
        self.entries
            .insert(owner_key(cluster_id, node_id), record.encode());
        Ok(())
    }

    async fn release_if_owner(
        &self,
        cluster_id: &str,
        node_id: &str,
        instance_id: &str,
    ) -> Result<bool, FoghornError> {
        let key = owner_key(cluster_id, node_id);
        // The entry lock makes the compare-and-delete atomic.
        let removed = self
            .entries
            .remove_if(&key, |_, value| {
                OwnerRecord::parse(value).is_some_and(|r| r.instance_id == instance_id)
            })
            .is_some();
        Ok(removed)
    }

    async fn lookup(
        &self,
        cluster_id: &str,
        node_id: &str,
    ) -> Result<Option<OwnerRecord>, FoghornError> {
        Ok(self
            .entries
            .get(&owner_key(cluster_id, node_id))
            .and_then(|v| OwnerRecord::parse(&v)))
    }

    async fn assigned_clusters(&self, instance_id: &str) -> Result<Vec<String>, FoghornError> {
        Ok(self
            .entries
            .get(&assignment_key(instance_id))
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default())
    }
}
