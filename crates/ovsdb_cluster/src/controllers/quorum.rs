//! Availability, quorum, and status projection for an OvsdbCluster.
//!
//! This is a pure fold over the observed servers and pods: the caller takes a
//! snapshot of the status at cycle start, lets this module mutate a working
//! copy, and persists (and stops the cycle) only if the two differ.

use chrono::Utc;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Condition, Time};
use kube::ResourceExt;

use crate::api::v1alpha1::ovsdbcluster::{OvsdbCluster, OvsdbClusterStatus};
use crate::api::v1alpha1::ovsdbserver::OvsdbServer;
use crate::api::v1alpha1::{AVAILABLE_CONDITION, FAILED_CONDITION};
use crate::util::status::{remove_status_condition, set_status_condition};

pub static REASON_QUORUM_REACHED: &str = "QuorumReached";
pub static REASON_AWAITING_QUORUM: &str = "AwaitingQuorum";
pub static REASON_CLUSTER_BOOTSTRAP: &str = "ClusterBootstrap";
pub static REASON_CLUSTER_INCONSISTENT: &str = "ClusterInconsistent";

/// Quorum over the servers which have actually bootstrapped, not the declared
/// replica target: ceil(size / 2).
pub fn cluster_quorum(cluster_size: i32) -> i32 {
    (f64::from(cluster_size) / 2.0).ceil() as i32
}

pub fn is_pod_ready(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .is_some_and(|conditions| {
            conditions
                .iter()
                .any(|c| c.type_ == "Ready" && c.status == "True")
        })
}

/// Fold the observed servers and pods into the cluster status working copy.
///
/// Recomputed from scratch every cycle so conditions are never sticky: the
/// Failed condition is removed again as soon as no server reports a failure,
/// and Available flips freely in both directions. Only `cluster_id` is
/// write-once; an inconsistent server id is surfaced as a failure rather than
/// corrected.
pub fn project_status(
    cluster: &OvsdbCluster,
    servers: &[OvsdbServer],
    pods: &[Pod],
    status: &mut OvsdbClusterStatus,
) {
    let cluster_size = servers.iter().filter(|s| s.is_available()).count() as i32;
    let quorum = cluster_quorum(cluster_size);
    let available = pods.iter().filter(|p| is_pod_ready(p)).count() as i32;

    status.cluster_size = cluster_size;
    status.cluster_quorum = quorum;
    status.available_servers = available;

    // We're Available iff a quorum of server pods are Ready
    let (available_status, available_reason) = if available >= quorum && available > 0 {
        ("True", REASON_QUORUM_REACHED)
    } else {
        ("False", REASON_AWAITING_QUORUM)
    };
    let (conditions, _) = set_status_condition(
        &status.conditions,
        Condition {
            type_: AVAILABLE_CONDITION.to_string(),
            status: available_status.to_string(),
            reason: available_reason.to_string(),
            message: format!("{available} of {cluster_size} server pods ready, quorum is {quorum}"),
            last_transition_time: Time(Utc::now()),
            observed_generation: cluster.metadata.generation,
        },
    );
    status.conditions = conditions;

    // Single failure slot: a ClusterID inconsistency found later in the walk
    // overwrites a bootstrap failure recorded here.
    let mut failure: Option<(&str, String)> = None;

    let failed: Vec<String> = servers
        .iter()
        .filter(|s| s.is_failed())
        .map(|s| s.name_any())
        .collect();
    if !failed.is_empty() {
        failure = Some((
            REASON_CLUSTER_BOOTSTRAP,
            format!(
                "The following servers have failed to initialize: {}",
                failed.join(", ")
            ),
        ));
    }

    // Adopt the ClusterID of the first server which reports one; flag any
    // later disagreement.
    for server in servers {
        match (status.cluster_id.as_deref(), server.cluster_id()) {
            (None, Some(id)) => status.cluster_id = Some(id.to_string()),
            (Some(expected), Some(id)) if expected != id => {
                failure = Some((
                    REASON_CLUSTER_INCONSISTENT,
                    format!(
                        "Server {} has inconsistent ClusterID {}. Expected ClusterID {}",
                        server.name_any(),
                        id,
                        expected
                    ),
                ));
            }
            _ => {}
        }
    }

    status.conditions = match failure {
        Some((reason, message)) => {
            set_status_condition(
                &status.conditions,
                Condition {
                    type_: FAILED_CONDITION.to_string(),
                    status: "True".to_string(),
                    reason: reason.to_string(),
                    message,
                    last_transition_time: Time(Utc::now()),
                    observed_generation: cluster.metadata.generation,
                },
            )
            .0
        }
        None => remove_status_condition(&status.conditions, FAILED_CONDITION).0,
    };
}
