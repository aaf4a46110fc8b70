// src/core/directory/mod.rs

//! The shared owner directory: one external KV per cluster binding each node
//! to the controller instance currently holding its control stream.

mod memory;
mod resp;

pub use memory::MemoryDirectory;
pub use resp::RespDirectory;

use crate::core::FoghornError;
use async_trait::async_trait;
use std::fmt;

/// The value stored under an owner key: `<instance_id>|<advertise_addr>`.
/// Legacy writers stored the bare instance id; those records remain valid and
/// mean "owned, address unknown".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnerRecord {
    pub instance_id: String,
    pub addr: Option<String>,
}

impl OwnerRecord {
    pub fn new(instance_id: impl Into<String>, addr: impl Into<String>) -> Self {
        let addr: String = addr.into();
        Self {
            instance_id: instance_id.into(),
            addr: (!addr.is_empty()).then_some(addr),
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        if value.is_empty() {
            return None;
        }
        match value.split_once('|') {
            Some((instance, addr)) => Some(Self {
                instance_id: instance.to_string(),
                addr: (!addr.is_empty()).then(|| addr.to_string()),
            }),
            None => Some(Self {
                instance_id: value.to_string(),
                addr: None,
            }),
        }
    }

    pub fn encode(&self) -> String {
        match &self.addr {
            Some(addr) => format!("{}|{}", self.instance_id, addr),
            None => self.instance_id.clone(),
        }
    }
}

/// The owner key for a node. The braces pin the key to one hash slot so every
/// owner record of a cluster lands on the same shard.
pub fn owner_key(cluster_id: &str, node_id: &str) -> String {
    format!("{{{cluster_id}}}:conn_owner:{node_id}")
}

/// The key listing the clusters an instance is assigned to serve.
pub fn assignment_key(instance_id: &str) -> String {
    format!("conn_assignments:{instance_id}")
}

/// Compare-set access to the shared directory. The directory is the
/// serialization point across controller instances; every implementation must
/// make `claim` a plain overwrite (most recent Register wins) and `release`
/// conditional on still being the owner.
#[async_trait]
pub trait OwnerDirectory: Send + Sync + fmt::Debug {
    /// Records this instance as the node's owner, replacing any previous owner.
    async fn claim(
        &self,
        cluster_id: &str,
        node_id: &str,
        record: &OwnerRecord,
    ) -> Result<(), FoghornError>;

    /// Clears the owner record iff it still names `instance_id`. Returns
    /// whether a record was removed.
    async fn release_if_owner(
        &self,
        cluster_id: &str,
        node_id: &str,
        instance_id: &str,
    ) -> Result<bool, FoghornError>;

    /// Reads the current owner record, `None` when the node is unowned.
    async fn lookup(
        &self,
        cluster_id: &str,
        node_id: &str,
    ) -> Result<Option<OwnerRecord>, FoghornError>;

    /// The clusters this instance is assigned to serve.
    async fn assigned_clusters(&self, instance_id: &str) -> Result<Vec<String>, FoghornError>;
}
