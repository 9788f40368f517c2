//! Pod reconciliation for available servers: create missing pods, replace
//! changed ones only while spare quorum margin remains, and tear everything
//! down at replicas 0.
//!
//! Planning is separated from the API calls so the quorum-safety rules are
//! testable as a pure function.

use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, ExecAction, PersistentVolumeClaimVolumeSource, Pod, PodSpec, Probe,
    Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::{
    api::{Api, DeleteParams, ListParams, PostParams},
    Client, ResourceExt,
};
use std::collections::BTreeMap;
use tracing::info;

use super::cluster_owner_ref;
use crate::api::v1alpha1::ovsdbcluster::{OvsdbCluster, OvsdbClusterStatus};
use crate::api::v1alpha1::ovsdbserver::OvsdbServer;
use crate::api::v1alpha1::{CLUSTER_LABEL, COMPONENT_LABEL, SERVER_COMPONENT};
use crate::util::errors::{Error, Result, StdError};

/// List the server pods owned by this cluster, sorted by name.
pub async fn list_server_pods(client: &Client, namespace: &str, cluster: &OvsdbCluster) -> Result<Vec<Pod>> {
    let pods: Api<Pod> = Api::namespaced(client.clone(), namespace);
    let selector = format!(
        "{}={},{}={}",
        COMPONENT_LABEL,
        SERVER_COMPONENT,
        CLUSTER_LABEL,
        cluster.name_any()
    );
    let mut items = pods
        .list(&ListParams::default().labels(&selector))
        .await
        .map_err(|e| Error::StdError(StdError::KubeError(e)))?
        .items;
    items.sort_by_key(|p| p.name_any());
    Ok(items)
}

pub fn find_pod<'a>(pods: &'a [Pod], name: &str) -> Option<&'a Pod> {
    pods.iter().find(|p| p.name_any() == name)
}

#[derive(Debug)]
pub enum PodAction {
    Create(Box<Pod>),
    Delete(String),
}

impl PodAction {
    pub fn name(&self) -> String {
        match self {
            PodAction::Create(pod) => pod.name_any(),
            PodAction::Delete(name) => name.clone(),
        }
    }
}

/// Decide, per server in sorted order, whether its pod should be created,
/// left alone, or deleted for recreation.
///
/// The working available count starts from the status projection and is
/// decremented for every pod touched, so decisions later in the same cycle
/// see the margin already consumed: at most the spare quorum margin is
/// disrupted per cycle.
pub fn plan_pod_actions(
    cluster: &OvsdbCluster,
    servers: &[OvsdbServer],
    pods: &[Pod],
    status: &OvsdbClusterStatus,
) -> Vec<PodAction> {
    // Scaled down to zero: one dormant server remains as a datastore, but no
    // pods run.
    if cluster.spec.replicas == 0 {
        return pods.iter().map(|p| PodAction::Delete(p.name_any())).collect();
    }

    let mut available = status.available_servers;
    let mut actions = Vec::new();

    for server in servers {
        if !server.is_available() {
            // Wait for the server to bootstrap
            continue;
        }

        match find_pod(pods, &server.name_any()) {
            None => {
                actions.push(PodAction::Create(Box::new(desired_pod(cluster, server))));
                available -= 1;
            }
            Some(existing) => {
                // Replacing a pod in a cluster of less than 3 servers always
                // breaks quorum, so just do it; otherwise require spare
                // margin above quorum.
                if status.cluster_size >= 3 && available <= status.cluster_quorum {
                    continue;
                }
                if pod_needs_update(existing, &desired_pod(cluster, server)) {
                    actions.push(PodAction::Delete(server.name_any()));
                    available -= 1;
                }
            }
        }
    }

    actions
}

pub async fn apply_pod_actions(client: &Client, namespace: &str, actions: Vec<PodAction>) -> Result<()> {
    let pods: Api<Pod> = Api::namespaced(client.clone(), namespace);
    for action in actions {
        match action {
            PodAction::Create(pod) => {
                info!("Creating server pod '{}'", pod.name_any());
                pods.create(&PostParams::default(), &pod)
                    .await
                    .map_err(|e| Error::StdError(StdError::KubeError(e)))?;
            }
            PodAction::Delete(name) => {
                info!("Deleting server pod '{}'", name);
                pods.delete(&name, &DeleteParams::default())
                    .await
                    .map_err(|e| Error::StdError(StdError::KubeError(e)))?;
            }
        }
    }
    Ok(())
}

pub fn desired_pod(cluster: &OvsdbCluster, server: &OvsdbServer) -> Pod {
    let name = server.name_any();
    let db = &cluster.spec.db_type;

    let mut labels = BTreeMap::new();
    labels.insert(COMPONENT_LABEL.to_string(), SERVER_COMPONENT.to_string());
    labels.insert(CLUSTER_LABEL.to_string(), cluster.name_any());

    let probe_exec = ExecAction {
        command: Some(vec!["/usr/bin/pidof".to_string(), "ovsdb-server".to_string()]),
    };

    Pod {
        metadata: ObjectMeta {
            name: Some(name.clone()),
            namespace: cluster.metadata.namespace.clone(),
            labels: Some(labels),
            owner_references: Some(vec![cluster_owner_ref(cluster)]),
            ..Default::default()
        },
        spec: Some(PodSpec {
            hostname: Some(name.clone()),
            containers: vec![Container {
                name: SERVER_COMPONENT.to_string(),
                image: Some(cluster.spec.image.clone()),
                command: Some(vec!["/usr/share/ovn/scripts/ovn-ctl".to_string()]),
                args: Some(vec![
                    format!("run_{}_ovsdb", db.short()),
                    "--no-monitor".to_string(),
                    format!(
                        "--ovn-{}-log=-vfile:off -vconsole:{}",
                        db.short(),
                        cluster.spec.log_level
                    ),
                ]),
                ports: Some(vec![
                    ContainerPort {
                        name: Some("ovsdb".to_string()),
                        container_port: db.client_port(),
                        ..Default::default()
                    },
                    ContainerPort {
                        name: Some("raft".to_string()),
                        container_port: db.raft_port(),
                        ..Default::default()
                    },
                ]),
                env: Some(vec![EnvVar {
                    name: "OVN_RUNDIR".to_string(),
                    value: Some("/tmp".to_string()),
                    ..Default::default()
                }]),
                liveness_probe: Some(Probe {
                    exec: Some(probe_exec.clone()),
                    timeout_seconds: Some(5),
                    period_seconds: Some(3),
                    initial_delay_seconds: Some(3),
                    ..Default::default()
                }),
                readiness_probe: Some(Probe {
                    exec: Some(probe_exec),
                    timeout_seconds: Some(5),
                    period_seconds: Some(5),
                    initial_delay_seconds: Some(5),
                    ..Default::default()
                }),
                volume_mounts: Some(vec![VolumeMount {
                    name: "data".to_string(),
                    mount_path: "/var/lib/ovn".to_string(),
                    ..Default::default()
                }]),
                ..Default::default()
            }],
            volumes: Some(vec![Volume {
                name: "data".to_string(),
                persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                    claim_name: format!("{name}-data"),
                    ..Default::default()
                }),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn pod_needs_update(existing: &Pod, desired: &Pod) -> bool {
    let Some(existing_container) = existing
        .spec
        .as_ref()
        .and_then(|spec| spec.containers.first())
    else {
        return true;
    };
    let Some(desired_container) = desired.spec.as_ref().and_then(|spec| spec.containers.first()) else {
        return true;
    };

    existing_container.image != desired_container.image
        || existing_container.command != desired_container.command
        || existing_container.args != desired_container.args
}
