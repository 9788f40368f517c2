//! Test helpers: object builders for the pure logic tests and a mock
//! apiserver for reconcile-level tests.

use crate::api::v1alpha1::ovsdbcluster::{OvsdbCluster, OvsdbClusterSpec, OvsdbClusterStatus};
use crate::api::v1alpha1::ovsdbserver::{OvsdbServer, OvsdbServerSpec, OvsdbServerStatus};
use crate::api::v1alpha1::{AVAILABLE_CONDITION, CLUSTER_LABEL, FAILED_CONDITION};
use crate::controllers::cluster_controller::Context;
use crate::controllers::server_pod::desired_pod;
use crate::util::metrics::Metrics;

use chrono::Utc;
use http::{Request, Response};
use http_body_util::BodyExt;
use k8s_openapi::api::core::v1::{Pod, PodCondition, PodStatus};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Condition, Time};
use kube::{client::Body, Client, ResourceExt};
use prometheus::Registry;
use serde_json::json;
use std::sync::Arc;
use tower_test::mock::{self, Handle};

impl OvsdbCluster {
    /// A cluster whose status is the fixed point of projecting the given
    /// observed state, so a reconcile against that state goes straight to the
    /// act phase.
    pub fn with_projected_status(mut self, servers: &[OvsdbServer], pods: &[Pod]) -> Self {
        let mut status = OvsdbClusterStatus::default();
        crate::controllers::quorum::project_status(&self, servers, pods, &mut status);
        self.status = Some(status);
        self
    }
}

pub fn test_cluster(name: &str, replicas: i32) -> OvsdbCluster {
    let spec = OvsdbClusterSpec {
        replicas,
        image: "ovn:test".to_string(),
        ..Default::default()
    };
    let mut cluster = OvsdbCluster::new(name, spec);
    cluster.metadata.namespace = Some("testns".to_string());
    cluster
}

fn agent_condition(type_: &str, status: &str) -> Condition {
    Condition {
        type_: type_.to_string(),
        status: status.to_string(),
        reason: "Agent".to_string(),
        message: String::new(),
        last_transition_time: Time(Utc::now()),
        observed_generation: None,
    }
}

/// A server as the bootstrap agent would report it.
pub fn test_server(
    name: &str,
    available: bool,
    failed: bool,
    cluster_id: Option<&str>,
    raft_address: Option<&str>,
) -> OvsdbServer {
    let mut server = OvsdbServer::new(name, OvsdbServerSpec::default());
    server.metadata.namespace = Some("testns".to_string());
    server.metadata.labels = Some(
        [(CLUSTER_LABEL.to_string(), "c".to_string())]
            .into_iter()
            .collect(),
    );

    let mut conditions = vec![agent_condition(
        AVAILABLE_CONDITION,
        if available { "True" } else { "False" },
    )];
    if failed {
        conditions.push(agent_condition(FAILED_CONDITION, "True"));
    }
    server.status = Some(OvsdbServerStatus {
        conditions,
        cluster_id: cluster_id.map(str::to_string),
        raft_address: raft_address.map(str::to_string),
    });
    server
}

/// A bare pod that only reports Ready, for the projection tests.
pub fn ready_pod(name: &str) -> Pod {
    let mut pod = Pod::default();
    pod.metadata.name = Some(name.to_string());
    pod.metadata.namespace = Some("testns".to_string());
    pod.status = Some(PodStatus {
        conditions: Some(vec![PodCondition {
            type_: "Ready".to_string(),
            status: "True".to_string(),
            ..Default::default()
        }]),
        ..Default::default()
    });
    pod
}

/// A server pod as this controller would have created it for `cluster`,
/// optionally Ready.
pub fn test_server_pod(cluster: &OvsdbCluster, name: &str, ready: bool) -> Pod {
    let server = test_server(name, true, false, None, None);
    let mut pod = desired_pod(cluster, &server);
    if ready {
        pod.status = ready_pod(name).status;
    }
    pod
}

// We wrap tower_test::mock::Handle
type ApiServerHandle = Handle<Request<Body>, Response<Body>>;
pub struct ApiServerVerifier(ApiServerHandle);

/// Scenarios we test reconcile against
pub enum Scenario {
    /// The first cycle on a fresh cluster observes, writes status, and stops
    FreshClusterProjectsStatus(OvsdbCluster),
    /// A stable unbootstrapped cluster creates exactly one seed server
    BootstrapSeedServer(OvsdbCluster),
    /// replicas=0 deletes the running pods, servers stay
    ScaleToZero(OvsdbCluster, Vec<OvsdbServer>, Vec<Pod>),
    /// A converged cluster issues no writes at all
    Steady(OvsdbCluster, Vec<OvsdbServer>, Vec<Pod>),
}

pub async fn timeout_after_1s(handle: tokio::task::JoinHandle<()>) {
    tokio::time::timeout(std::time::Duration::from_secs(1), handle)
        .await
        .expect("timeout on mock apiserver")
        .expect("scenario succeeded")
}

impl ApiServerVerifier {
    /// Drive the mock apiserver through a scenario.
    ///
    /// The queue of expected requests is strict: an unexpected request from
    /// the reconciler finds the handle dropped and fails the test.
    pub fn run(self, scenario: Scenario) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            match scenario {
                Scenario::FreshClusterProjectsStatus(cluster) => {
                    self.handle_server_list(vec![])
                        .await
                        .unwrap()
                        .handle_pod_list(vec![])
                        .await
                        .unwrap()
                        .handle_status_patch(&cluster)
                        .await
                }
                Scenario::BootstrapSeedServer(cluster) => {
                    self.handle_server_list(vec![])
                        .await
                        .unwrap()
                        .handle_pod_list(vec![])
                        .await
                        .unwrap()
                        .handle_server_get_404(&format!("{}-0", cluster.name_any()))
                        .await
                        .unwrap()
                        .handle_server_create(&format!("{}-0", cluster.name_any()))
                        .await
                }
                Scenario::ScaleToZero(_, servers, pods) => {
                    let names: Vec<String> = pods.iter().map(|p| p.name_any()).collect();
                    let mut verifier = self
                        .handle_server_list(servers)
                        .await
                        .unwrap()
                        .handle_pod_list(pods)
                        .await
                        .unwrap();
                    for name in names {
                        verifier = verifier.handle_pod_delete(&name).await.unwrap();
                    }
                    Ok(verifier)
                }
                Scenario::Steady(_, servers, pods) => {
                    self.handle_server_list(servers)
                        .await
                        .unwrap()
                        .handle_pod_list(pods)
                        .await
                }
            }
            .expect("scenario completed without errors");
        })
    }

    async fn handle_server_list(mut self, servers: Vec<OvsdbServer>) -> Result<Self, anyhow::Error> {
        let (request, send) = self.0.next_request().await.expect("service not called");
        assert_eq!(request.method(), http::Method::GET);
        let uri = request.uri().to_string();
        assert!(uri.contains("/ovsdbservers?"), "unexpected uri {uri}");
        assert!(uri.contains("labelSelector="), "list must filter by label: {uri}");

        let list = json!({
            "apiVersion": "ovsdb.molnett.org/v1alpha1",
            "kind": "OvsdbServerList",
            "metadata": { "resourceVersion": "" },
            "items": servers,
        });
        send.send_response(
            Response::builder()
                .body(Body::from(serde_json::to_vec(&list)?))
                .unwrap(),
        );
        Ok(self)
    }

    async fn handle_pod_list(mut self, pods: Vec<Pod>) -> Result<Self, anyhow::Error> {
        let (request, send) = self.0.next_request().await.expect("service not called");
        assert_eq!(request.method(), http::Method::GET);
        let uri = request.uri().to_string();
        assert!(uri.contains("/pods?"), "unexpected uri {uri}");
        assert!(uri.contains("labelSelector="), "list must filter by label: {uri}");

        let list = json!({
            "apiVersion": "v1",
            "kind": "PodList",
            "metadata": { "resourceVersion": "" },
            "items": pods,
        });
        send.send_response(
            Response::builder()
                .body(Body::from(serde_json::to_vec(&list)?))
                .unwrap(),
        );
        Ok(self)
    }

    async fn handle_status_patch(mut self, cluster: &OvsdbCluster) -> Result<Self, anyhow::Error> {
        let (request, send) = self.0.next_request().await.expect("service not called");
        assert_eq!(request.method(), http::Method::PATCH);
        assert!(request
            .uri()
            .to_string()
            .contains(&format!("/ovsdbclusters/{}/status?", cluster.name_any())));

        let request_body = request.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&request_body)?;
        let status = json["status"].clone();
        assert_json_diff::assert_json_include!(
            actual: status,
            expected: json!({ "cluster_size": 0, "cluster_quorum": 0, "available_servers": 0 })
        );
        assert_eq!(json["status"]["conditions"][0]["type"], "Available");
        assert_eq!(json["status"]["conditions"][0]["status"], "False");

        // Respond with the full object carrying the new status
        let mut object = serde_json::to_value(cluster)?;
        object["status"] = json["status"].clone();
        send.send_response(
            Response::builder()
                .body(Body::from(serde_json::to_vec(&object)?))
                .unwrap(),
        );
        Ok(self)
    }

    async fn handle_server_get_404(mut self, name: &str) -> Result<Self, anyhow::Error> {
        let (request, send) = self.0.next_request().await.expect("service not called");
        assert_eq!(request.method(), http::Method::GET);
        assert!(request
            .uri()
            .to_string()
            .contains(&format!("/ovsdbservers/{name}")));

        let status = json!({
            "apiVersion": "v1",
            "kind": "Status",
            "metadata": {},
            "status": "Failure",
            "message": format!("ovsdbservers \"{name}\" not found"),
            "reason": "NotFound",
            "code": 404,
        });
        send.send_response(
            Response::builder()
                .status(404)
                .body(Body::from(serde_json::to_vec(&status)?))
                .unwrap(),
        );
        Ok(self)
    }

    async fn handle_server_create(mut self, expected_name: &str) -> Result<Self, anyhow::Error> {
        let (request, send) = self.0.next_request().await.expect("service not called");
        assert_eq!(request.method(), http::Method::POST);
        assert!(request.uri().to_string().contains("/ovsdbservers?"));

        let request_body = request.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&request_body)?;
        assert_eq!(json["metadata"]["name"], expected_name);
        assert_eq!(json["metadata"]["labels"][CLUSTER_LABEL], "c");
        // A seed server bootstraps alone
        assert_eq!(json["spec"]["init_peers"], json!([]));
        assert_eq!(json["spec"]["cluster_id"], serde_json::Value::Null);

        send.send_response(
            Response::builder()
                .body(Body::from(serde_json::to_vec(&json)?))
                .unwrap(),
        );
        Ok(self)
    }

    async fn handle_pod_delete(mut self, name: &str) -> Result<Self, anyhow::Error> {
        let (request, send) = self.0.next_request().await.expect("service not called");
        assert_eq!(request.method(), http::Method::DELETE);
        assert!(request.uri().to_string().contains(&format!("/pods/{name}")));

        let status = json!({
            "apiVersion": "v1",
            "kind": "Status",
            "metadata": {},
            "status": "Success",
        });
        send.send_response(
            Response::builder()
                .body(Body::from(serde_json::to_vec(&status)?))
                .unwrap(),
        );
        Ok(self)
    }
}

impl Context {
    // Create a test context alongside a mocked apiserver
    pub fn test() -> (Arc<Self>, ApiServerVerifier, Registry) {
        let (mock_service, handle) = mock::pair::<Request<Body>, Response<Body>>();
        let mock_client = Client::new(mock_service, "testns");
        let registry = Registry::default();
        let ctx = Self {
            client: mock_client,
            metrics: Metrics::default().register(&registry).unwrap(),
            diagnostics: Arc::default(),
        };
        (Arc::new(ctx), ApiServerVerifier(handle), registry)
    }
}
