// src/core/triggers.rs

//! The pluggable processor behind `MistTrigger` messages. Blocking triggers
//! hold the node's media pipeline until the verdict frame goes back.

use async_trait::async_trait;
use std::fmt;

/// The reply for a blocking trigger.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TriggerVerdict {
    pub response: String,
    pub abort: bool,
}

#[async_trait]
pub trait TriggerProcessor: Send + Sync + fmt::Debug {
    async fn process(
        &self,
        node_id: &str,
        trigger_type: &str,
        payload: &serde_json::Value,
        cluster_id: Option<&str>,
    ) -> TriggerVerdict;
}

/// Permits everything. Deployments hang policy (stream keys, push auth,
/// viewer limits) off their own processor.
#[derive(Debug, Default)]
pub struct AllowAllTriggers;

#[async_trait]
impl TriggerProcessor for AllowAllTriggers {
    async fn process(
        &self,
        _node_id: &str,
        _trigger_type: &str,
        _payload: &serde_json::Value,
        _cluster_id: Option<&str>,
    ) -> TriggerVerdict {
        TriggerVerdict {
            response: "true".to_string(),
            abort: false,
        }
    }
}
