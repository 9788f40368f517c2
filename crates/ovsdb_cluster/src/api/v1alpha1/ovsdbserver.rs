use k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::api::v1alpha1::{conditions_schema, DbType, StorageConfig, AVAILABLE_CONDITION, FAILED_CONDITION};
use crate::util::status::is_status_condition_true;

/// One member of a replicated OVSDB cluster. The spec is written by the
/// cluster reconciler; the status is written by the per-server bootstrap
/// agent.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
#[cfg_attr(test, derive(Default))]
#[kube(
    kind = "OvsdbServer",
    group = "ovsdb.molnett.org",
    version = "v1alpha1",
    namespaced
)]
#[kube(status = "OvsdbServerStatus", shortname = "ovsdbserver")]
#[kube(
    printcolumn = r#"{"name":"Cluster", "type":"string", "jsonPath":".spec.cluster_name"}"#,
    printcolumn = r#"{"name":"Raft", "type":"string", "jsonPath":".status.raft_address"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
pub struct OvsdbServerSpec {
    #[serde(default)]
    pub db_type: DbType,

    /// Propagated from the cluster once its identity is known
    pub cluster_id: Option<String>,

    pub cluster_name: String,

    /// Raft addresses of the other members known at creation time. Captured
    /// once; never retroactively updated.
    #[serde(default)]
    pub init_peers: Vec<String>,

    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Deserialize, Serialize, Clone, Default, Debug, PartialEq, JsonSchema)]
pub struct OvsdbServerStatus {
    #[schemars(schema_with = "conditions_schema")]
    pub conditions: Vec<Condition>,
    /// The cluster identity this server actually joined
    pub cluster_id: Option<String>,
    /// This server's own raft address, once known
    pub raft_address: Option<String>,
}

impl OvsdbServer {
    pub fn is_available(&self) -> bool {
        self.status
            .as_ref()
            .is_some_and(|s| is_status_condition_true(&s.conditions, AVAILABLE_CONDITION))
    }

    pub fn is_failed(&self) -> bool {
        self.status
            .as_ref()
            .is_some_and(|s| is_status_condition_true(&s.conditions, FAILED_CONDITION))
    }

    pub fn cluster_id(&self) -> Option<&str> {
        self.status.as_ref().and_then(|s| s.cluster_id.as_deref())
    }

    pub fn raft_address(&self) -> Option<&str> {
        self.status.as_ref().and_then(|s| s.raft_address.as_deref())
    }
}
