//! Membership scaling: listing, naming, and idempotent upsert of the
//! OvsdbServer resources backing a cluster.

use kube::{
    api::{Api, ListParams, Patch, PatchParams, PostParams},
    Client, ResourceExt,
};
use tracing::info;

use super::cluster_owner_ref;
use crate::api::v1alpha1::ovsdbcluster::{OvsdbCluster, OvsdbClusterStatus};
use crate::api::v1alpha1::ovsdbserver::{OvsdbServer, OvsdbServerSpec};
use crate::api::v1alpha1::CLUSTER_LABEL;
use crate::controllers::cluster_controller::FIELD_MANAGER;
use crate::util::errors::{Error, Result, StdError};

/// List the servers owned by this cluster, sorted by name. No decision logic
/// may rely on the apiserver's iteration order.
pub async fn list_servers(client: &Client, namespace: &str, cluster: &OvsdbCluster) -> Result<Vec<OvsdbServer>> {
    let servers: Api<OvsdbServer> = Api::namespaced(client.clone(), namespace);
    let selector = format!("{}={}", CLUSTER_LABEL, cluster.name_any());
    let mut items = servers
        .list(&ListParams::default().labels(&selector))
        .await
        .map_err(|e| Error::StdError(StdError::KubeError(e)))?
        .items;
    items.sort_by_key(|s| s.name_any());
    Ok(items)
}

pub fn find_server<'a>(servers: &'a [OvsdbServer], name: &str) -> Option<&'a OvsdbServer> {
    servers.iter().find(|s| s.name_any() == name)
}

/// First `<cluster>-<i>` not already taken. Names are never reused or
/// compacted, so a cluster that scales down and back up keeps advancing its
/// index.
pub fn next_server_name(cluster_name: &str, taken: &[String]) -> String {
    let mut i = 0;
    loop {
        let name = format!("{cluster_name}-{i}");
        if !taken.contains(&name) {
            return name;
        }
        i += 1;
    }
}

/// Names to create this cycle. Names assigned earlier in the same cycle count
/// as taken so scaling by more than one assigns distinct names in one pass.
pub fn missing_server_names(cluster_name: &str, servers: &[OvsdbServer], target: i32) -> Vec<String> {
    let mut taken: Vec<String> = servers.iter().map(|s| s.name_any()).collect();
    let mut missing = Vec::new();
    for _ in servers.len()..target.max(0) as usize {
        let name = next_server_name(cluster_name, &taken);
        taken.push(name.clone());
        missing.push(name);
    }
    missing
}

/// Effective member target: at least one server is kept as a datastore even
/// at replicas 0, and a cluster with no established identity bootstraps
/// exactly one seed before any parallel scale-up.
pub fn target_servers(cluster: &OvsdbCluster, status: &OvsdbClusterStatus) -> i32 {
    if status.cluster_id.is_none() {
        return 1;
    }
    cluster.spec.replicas.max(1)
}

/// Raft addresses of all other servers which already report one, captured at
/// creation time only.
pub fn init_peers(servers: &[OvsdbServer], own_name: &str) -> Vec<String> {
    servers
        .iter()
        .filter(|peer| peer.name_any() != own_name)
        .filter_map(|peer| peer.raft_address().map(str::to_string))
        .collect()
}

pub fn desired_server(
    cluster: &OvsdbCluster,
    status: &OvsdbClusterStatus,
    name: &str,
    servers: &[OvsdbServer],
) -> OvsdbServer {
    let mut server = OvsdbServer::new(
        name,
        OvsdbServerSpec {
            db_type: cluster.spec.db_type.clone(),
            cluster_id: status.cluster_id.clone(),
            cluster_name: cluster.name_any(),
            init_peers: init_peers(servers, name),
            storage: cluster.spec.server_storage.clone(),
        },
    );
    server.metadata.namespace = cluster.metadata.namespace.clone();
    server.metadata.labels = Some(
        [(CLUSTER_LABEL.to_string(), cluster.name_any())]
            .into_iter()
            .collect(),
    );
    server.metadata.owner_references = Some(vec![cluster_owner_ref(cluster)]);
    server
}

/// Create the servers needed to reach the effective target.
pub async fn scale_up(
    client: &Client,
    namespace: &str,
    cluster: &OvsdbCluster,
    status: &OvsdbClusterStatus,
    servers: &[OvsdbServer],
) -> Result<()> {
    let target = target_servers(cluster, status);
    for name in missing_server_names(&cluster.name_any(), servers, target) {
        let desired = desired_server(cluster, status, &name, servers);
        upsert_server(client, namespace, &desired).await?;
        info!("Created server '{}'", name);
    }
    Ok(())
}

/// Create-if-absent, else re-apply the mutable spec fields and ownership and
/// persist only on change.
pub async fn upsert_server(client: &Client, namespace: &str, desired: &OvsdbServer) -> Result<()> {
    let servers: Api<OvsdbServer> = Api::namespaced(client.clone(), namespace);
    let name = desired.name_any();

    match servers.get(&name).await {
        Ok(existing) => {
            if server_needs_update(&existing, desired) {
                info!("Updating server '{}'", name);
                servers
                    .patch(
                        &name,
                        &PatchParams::apply(FIELD_MANAGER).force(),
                        &Patch::Apply(desired),
                    )
                    .await
                    .map_err(|e| Error::StdError(StdError::KubeError(e)))?;
            }
        }
        Err(kube::Error::Api(api_err)) if api_err.code == 404 => {
            servers
                .create(&PostParams::default(), desired)
                .await
                .map_err(|e| Error::StdError(StdError::KubeError(e)))?;
        }
        Err(e) => return Err(Error::StdError(StdError::KubeError(e))),
    }

    Ok(())
}

fn server_needs_update(existing: &OvsdbServer, desired: &OvsdbServer) -> bool {
    existing.spec != desired.spec
        || existing.labels().get(CLUSTER_LABEL) != desired.labels().get(CLUSTER_LABEL)
        || existing.owner_references().is_empty()
}
