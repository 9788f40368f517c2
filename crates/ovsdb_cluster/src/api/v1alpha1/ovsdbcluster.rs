use k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::api::v1alpha1::{conditions_schema, DbType, StorageConfig};

pub static OVSDB_CLUSTER_FINALIZER: &str = "ovsdb-cluster.ovsdb.molnett.org";

/// Generate the Kubernetes wrapper struct `OvsdbCluster` from our Spec and Status struct
///
/// This provides a hook for generating the CRD yaml (in crdgen)
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[cfg_attr(test, derive(Default))]
#[kube(
    kind = "OvsdbCluster",
    group = "ovsdb.molnett.org",
    version = "v1alpha1",
    namespaced
)]
#[kube(status = "OvsdbClusterStatus", shortname = "ovsdbcluster")]
#[kube(
    printcolumn = r#"{"name":"Replicas", "type":"integer", "jsonPath":".spec.replicas"}"#,
    printcolumn = r#"{"name":"Size", "type":"integer", "jsonPath":".status.cluster_size"}"#,
    printcolumn = r#"{"name":"Quorum", "type":"integer", "jsonPath":".status.cluster_quorum"}"#,
    printcolumn = r#"{"name":"Available", "type":"integer", "jsonPath":".status.available_servers"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
pub struct OvsdbClusterSpec {
    /// Target number of cluster members. 0 keeps one dormant server and no
    /// running pods.
    #[serde(default = "default_replicas")]
    pub replicas: i32,

    #[serde(default)]
    pub db_type: DbType,

    #[serde(default = "default_image")]
    pub image: String,

    /// ovsdb-server console log level, rendered as -vconsole:<level>
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Storage configuration propagated to servers
    #[serde(default)]
    pub server_storage: StorageConfig,
}

fn default_replicas() -> i32 {
    1
}
fn default_image() -> String {
    "quay.io/skaplons/ovn:latest".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}

/// The status object of `OvsdbCluster`, exclusively owned by the reconciler
#[derive(Deserialize, Serialize, Clone, Default, Debug, PartialEq, JsonSchema)]
pub struct OvsdbClusterStatus {
    #[schemars(schema_with = "conditions_schema")]
    pub conditions: Vec<Condition>,
    /// Identity of the raft cluster, adopted from the first bootstrapped
    /// server and immutable once set
    pub cluster_id: Option<String>,
    /// Number of servers which have bootstrapped into the cluster
    pub cluster_size: i32,
    /// ceil(cluster_size / 2)
    pub cluster_quorum: i32,
    /// Number of server pods currently Ready
    pub available_servers: i32,
}
