use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::Resource;

use crate::api::v1alpha1::ovsdbcluster::OvsdbCluster;

pub mod cluster_controller;
pub mod quorum;
pub mod server;
pub mod server_pod;

/// Owner reference stamped on every server and pod so the apiserver's garbage
/// collector cascades deletion of the cluster.
pub fn cluster_owner_ref(cluster: &OvsdbCluster) -> OwnerReference {
    cluster
        .controller_owner_ref(&())
        .unwrap_or_else(|| OwnerReference {
            api_version: "ovsdb.molnett.org/v1alpha1".to_string(),
            kind: "OvsdbCluster".to_string(),
            controller: Some(true),
            name: cluster.metadata.name.clone().unwrap_or_default(),
            ..Default::default()
        })
}
