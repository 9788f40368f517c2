use core::fmt;
use std::fmt::Display;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub mod ovsdbcluster;
pub mod ovsdbserver;

/// Label binding an owned object to its cluster, used for List filtering.
pub static CLUSTER_LABEL: &str = "ovsdb.molnett.org/cluster";
/// Component label carried by server pods.
pub static COMPONENT_LABEL: &str = "app.kubernetes.io/component";
pub static SERVER_COMPONENT: &str = "ovsdb-server";

/// Condition types shared by OvsdbCluster and OvsdbServer statuses.
pub static AVAILABLE_CONDITION: &str = "Available";
pub static FAILED_CONDITION: &str = "Failed";

/// Which logical OVN database a cluster serves.
#[derive(Default, Deserialize, Serialize, Clone, Debug, PartialEq, Eq, JsonSchema)]
pub enum DbType {
    #[default]
    NB,
    SB,
}

impl DbType {
    pub fn db_name(&self) -> &'static str {
        match self {
            DbType::NB => "OVN_Northbound",
            DbType::SB => "OVN_Southbound",
        }
    }

    pub fn client_port(&self) -> i32 {
        match self {
            DbType::NB => 6641,
            DbType::SB => 6642,
        }
    }

    pub fn raft_port(&self) -> i32 {
        match self {
            DbType::NB => 6643,
            DbType::SB => 6644,
        }
    }

    /// Short lowercase form used in ovn-ctl subcommands and flags.
    pub fn short(&self) -> &'static str {
        match self {
            DbType::NB => "nb",
            DbType::SB => "sb",
        }
    }
}

impl Display for DbType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            DbType::NB => write!(f, "NB"),
            DbType::SB => write!(f, "SB"),
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
pub struct StorageConfig {
    /// Storage class to use for persistent volume claims
    pub storage_class: Option<String>,
    /// Size of the persistent volume
    #[serde(default = "default_storage_size")]
    pub size: String,
}

fn default_storage_size() -> String {
    "10Gi".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            storage_class: None,
            size: default_storage_size(),
        }
    }
}

pub fn conditions_schema(_: &mut schemars::gen::SchemaGenerator) -> schemars::schema::Schema {
    serde_json::from_value(serde_json::json!({
        "type": "array",
        "x-kubernetes-list-type": "map",
        "x-kubernetes-list-map-keys": ["type"],
        "items": {
            "type": "object",
            "properties": {
                "lastTransitionTime": { "format": "date-time", "type": "string" },
                "message": { "type": "string" },
                "observedGeneration": { "type": "integer", "format": "int64", "default": 0 },
                "reason": { "type": "string" },
                "status": { "type": "string" },
                "type": { "type": "string" }
            },
            "required": [
                "lastTransitionTime",
                "message",
                "reason",
                "status",
                "type"
            ]
        }
    }))
    .unwrap()
}
