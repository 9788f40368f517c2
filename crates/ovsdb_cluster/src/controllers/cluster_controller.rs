use super::{quorum, server, server_pod};
use crate::api::v1alpha1::ovsdbcluster::{OvsdbCluster, OvsdbClusterStatus, OVSDB_CLUSTER_FINALIZER};
use crate::api::v1alpha1::ovsdbserver::OvsdbServer;
use crate::api::v1alpha1::{COMPONENT_LABEL, SERVER_COMPONENT};
use crate::util::errors::{Error, StdError};
use crate::util::{errors, errors::Result, metrics, telemetry};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use k8s_openapi::api::core::v1::Pod;
use kube::{
    api::{Api, ListParams, Patch, PatchParams, ResourceExt},
    client::Client,
    runtime::{
        controller::{Action, Controller},
        events::{Event, EventType, Recorder, Reporter},
        finalizer::{finalizer, Event as Finalizer},
        watcher::{self, Config},
    },
    Resource,
};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tokio::{sync::RwLock, time::Duration};
use tracing::*;

pub const FIELD_MANAGER: &str = "ovsdb-cluster-controller";

impl OvsdbCluster {
    /// One convergence cycle: observe, project status, then act.
    ///
    /// The status snapshot taken here wraps the whole converge path; whatever
    /// happened, a changed status is saved before returning. A save failure
    /// is only logged when a primary error already exists so it never masks
    /// it.
    pub async fn reconcile(&self, ctx: Arc<Context>) -> Result<Action, errors::Error> {
        let snapshot = self.status.clone().unwrap_or_default();
        let mut status = snapshot.clone();

        let result = self.converge(&ctx, &snapshot, &mut status).await;

        if status != snapshot {
            if let Err(save_err) = self.save_status(&ctx.client, &status).await {
                match &result {
                    Err(primary) => warn!("failed to save status after '{primary}': {save_err}"),
                    Ok(_) => return Err(save_err),
                }
            }
        }

        result
    }

    async fn converge(
        &self,
        ctx: &Context,
        snapshot: &OvsdbClusterStatus,
        status: &mut OvsdbClusterStatus,
    ) -> Result<Action> {
        let ns = self.namespace().ok_or_else(|| {
            Error::ErrorWithRequeue(errors::ErrorWithRequeue::new(
                StdError::MetadataMissing("Namespace should always be set on an existing object".to_string()),
                Duration::from_secs(5 * 60),
            ))
        })?;

        let servers = server::list_servers(&ctx.client, &ns, self).await?;
        let pods = server_pod::list_server_pods(&ctx.client, &ns, self).await?;

        quorum::project_status(self, &servers, &pods, status);
        if *status != *snapshot {
            // Observation changed something: report it and act next cycle
            // against fresh state. The status write triggers that cycle.
            return Ok(Action::requeue(Duration::from_secs(1)));
        }

        server::scale_up(&ctx.client, &ns, self, status, &servers).await?;

        let actions = server_pod::plan_pod_actions(self, &servers, &pods, status);
        server_pod::apply_pod_actions(&ctx.client, &ns, actions).await?;

        // If no events were received, check back every 5 minutes
        Ok(Action::requeue(Duration::from_secs(5 * 60)))
    }

    async fn save_status(&self, client: &Client, status: &OvsdbClusterStatus) -> Result<()> {
        let clusters: Api<OvsdbCluster> =
            Api::namespaced(client.clone(), &self.namespace().unwrap_or_default());
        let patch = Patch::Apply(json!({
            "apiVersion": "ovsdb.molnett.org/v1alpha1",
            "kind": "OvsdbCluster",
            "status": status,
        }));
        let ps = PatchParams::apply(FIELD_MANAGER).force();
        clusters
            .patch_status(&self.name_any(), &ps, &patch)
            .await
            .map_err(|e| Error::StdError(StdError::KubeError(e)))?;
        Ok(())
    }

    // Finalizer cleanup (the object was deleted, ensure nothing is orphaned)
    async fn cleanup(&self, ctx: Arc<Context>) -> Result<Action> {
        let recorder = ctx.diagnostics.read().await.recorder(ctx.client.clone());
        // Owned servers and pods are garbage collected, so we just publish an event
        recorder
            .publish(
                &Event {
                    type_: EventType::Normal,
                    reason: "DeleteRequested".into(),
                    note: Some(format!("Delete `{}`", self.name_any())),
                    action: "Deleting".into(),
                    secondary: None,
                },
                &self.object_ref(&()),
            )
            .await
            .map_err(|e| Error::StdError(StdError::KubeError(e)))?;
        Ok(Action::await_change())
    }
}

/// State shared between the controller and the web server
#[derive(Clone, Default)]
pub struct State {
    /// Diagnostics populated by the reconciler
    diagnostics: Arc<RwLock<Diagnostics>>,
    /// Metrics registry
    registry: prometheus::Registry,
}

/// State wrapper around the controller outputs for the web server
impl State {
    /// Metrics getter
    pub fn metrics(&self) -> Vec<prometheus::proto::MetricFamily> {
        self.registry.gather()
    }

    /// State getter
    pub async fn diagnostics(&self) -> Diagnostics {
        self.diagnostics.read().await.clone()
    }

    // Create a Controller Context that can update State
    pub fn to_context(&self, client: Client) -> Arc<Context> {
        Arc::new(Context {
            client,
            metrics: metrics::Metrics::default().register(&self.registry).unwrap(),
            diagnostics: self.diagnostics.clone(),
        })
    }
}

// Context for our reconciler
#[derive(Clone)]
pub struct Context {
    /// Kubernetes client
    pub client: Client,
    /// Diagnostics read by the web server
    pub diagnostics: Arc<RwLock<Diagnostics>>,
    /// Prometheus metrics
    pub metrics: metrics::Metrics,
}

#[instrument(skip(ctx, cluster), fields(trace_id))]
pub async fn reconcile(cluster: Arc<OvsdbCluster>, ctx: Arc<Context>) -> Result<Action> {
    let trace_id = telemetry::get_trace_id();
    Span::current().record("trace_id", field::display(&trace_id));
    let _timer = ctx.metrics.count_and_measure("cluster");
    ctx.diagnostics.write().await.last_event = Utc::now();

    let ns = cluster.namespace().unwrap(); // cluster is namespace scoped
    let clusters: Api<OvsdbCluster> = Api::namespaced(ctx.client.clone(), &ns);

    info!("Reconciling OvsdbCluster \"{}\" in {}", cluster.name_any(), ns);
    finalizer(&clusters, OVSDB_CLUSTER_FINALIZER, cluster.clone(), |event| async {
        match event {
            Finalizer::Apply(cluster) => cluster.reconcile(ctx.clone()).await,
            Finalizer::Cleanup(cluster) => cluster.cleanup(ctx.clone()).await,
        }
    })
    .await
    .map_err(|e| errors::Error::StdError(errors::StdError::FinalizerError(Box::new(e))))
}

/// Diagnostics to be exposed by the web server
#[derive(Clone, Serialize)]
pub struct Diagnostics {
    pub last_event: DateTime<Utc>,
    #[serde(skip)]
    pub reporter: Reporter,
}
impl Default for Diagnostics {
    fn default() -> Self {
        Self {
            last_event: Utc::now(),
            reporter: "ovsdb-cluster-controller".into(),
        }
    }
}
impl Diagnostics {
    fn recorder(&self, client: Client) -> Recorder {
        Recorder::new(client, self.reporter.clone())
    }
}

fn error_policy(cluster: Arc<OvsdbCluster>, error: &errors::Error, ctx: Arc<Context>) -> Action {
    warn!("reconcile failed: {:?}", error);
    ctx.metrics.reconcile_cluster_failure(&cluster, error);
    match error {
        errors::Error::ErrorWithRequeue(e) => Action::requeue(e.duration),
        errors::Error::StdError(_) => Action::requeue(Duration::from_secs(5 * 60)),
    }
}

/// Initialize the controller and shared state (given the crd is installed)
pub async fn run(state: State) {
    let client = Client::try_default().await.expect("failed to create kube Client");

    let clusters = Api::<OvsdbCluster>::all(client.clone());
    if let Err(e) = clusters.list(&ListParams::default().limit(1)).await {
        error!("CRD is not queryable; {e:?}. Is the CRD installed?");
        info!("Installation: cargo run --bin crdgen | kubectl apply -f -");
        std::process::exit(1);
    }

    Controller::new(clusters, Config::default().any_semantic())
        .owns(
            Api::<OvsdbServer>::all(client.clone()),
            watcher::Config::default(),
        )
        .owns(
            Api::<Pod>::all(client.clone()),
            watcher::Config::default().labels(&format!("{COMPONENT_LABEL}={SERVER_COMPONENT}")),
        )
        .run(reconcile, error_policy, state.to_context(client))
        .filter_map(|x| async move { std::result::Result::ok(x) })
        .for_each(|_| futures::future::ready(()))
        .await;
}
