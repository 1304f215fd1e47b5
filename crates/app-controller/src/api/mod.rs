//! The HTTP surface tenants use to log in and manage their workloads.
//!
//! | Method | Path | |
//! |---|---|---|
//! | `POST` | `/v1/apps/login` | Resolves (and on first login provisions) the caller's namespace |
//! | `GET` | `/v1/apps` | Lists the caller's workloads |
//! | `POST` | `/v1/apps` | Deploys a workload |
//! | `GET` | `/v1/apps/{name}` | Returns one workload |
//! | `DELETE` | `/v1/apps/{name}` | Deletes a workload and its pull secret |
//!
//! Every route requires an `Authorization: Bearer <token>` header.

use std::{future::Future, sync::Arc, time::Duration};

use axum::{
    Router,
    routing::{get, post},
};
use snafu::ResultExt;
use tokio::{
    net::TcpListener,
    signal::unix::{SignalKind, signal},
};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::{
    api::error::{ApiError, DeadlineExceededSnafu, ResolveTenantSnafu},
    auth::TokenVerifier,
    identity::Identity,
    tenant::TenantDirectory,
    workload::WorkloadManager,
};

pub mod error;
mod handlers;

/// Everything a request handler needs, shared by all requests.
#[derive(Clone)]
pub struct AppState {
    pub tenants: Arc<TenantDirectory>,
    pub workloads: Arc<WorkloadManager>,
    pub verifier: Arc<dyn TokenVerifier>,
    pub request_timeout: Duration,
}

impl AppState {
    /// Runs `operation`, failing if it does not complete within the request timeout.
    ///
    /// Cluster and store calls still in flight are cancelled when the deadline passes.
    async fn within_deadline<T, F>(&self, operation: F) -> Result<T, ApiError>
    where
        F: Future<Output = Result<T, ApiError>>,
    {
        tokio::time::timeout(self.request_timeout, operation)
            .await
            .map_err(|_| {
                DeadlineExceededSnafu {
                    timeout: self.request_timeout,
                }
                .build()
            })?
    }

    async fn namespace_of(&self, identity: &Identity) -> Result<String, ApiError> {
        self.tenants
            .lookup_namespace(identity)
            .await
            .context(ResolveTenantSnafu)
    }
}

/// Builds the router serving all routes of the API.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/v1/apps/login", post(handlers::login))
        .route("/v1/apps", get(handlers::list_apps).post(handlers::create_app))
        .route(
            "/v1/apps/{name}",
            get(handlers::get_app).delete(handlers::delete_app),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serves `router` on `listener` until SIGINT or SIGTERM is received.
///
/// Requests in flight when the signal arrives are completed before this returns.
pub async fn serve(listener: TcpListener, router: Router) -> std::io::Result<()> {
    if let Ok(address) = listener.local_addr() {
        info!(%address, "serving app-controller API");
    }

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
}

async fn shutdown_signal() {
    let (Ok(mut sigint), Ok(mut sigterm)) = (
        signal(SignalKind::interrupt()),
        signal(SignalKind::terminate()),
    ) else {
        warn!("failed to create unix signal handlers, the server can only be killed");
        return std::future::pending().await;
    };

    debug!("created unix signal handlers");

    tokio::select! {
        signal = sigint.recv() => {
            if signal.is_some() {
                info!("received SIGINT, shutting down");
            }
        },
        signal = sigterm.recv() => {
            if signal.is_some() {
                info!("received SIGTERM, shutting down");
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use axum::{
        body::{Body, to_bytes},
        http::{Method, Request, StatusCode, header},
        response::Response,
    };
    use serde_json::{Value, json};
    use tower::ServiceExt;

    use super::*;
    use crate::{
        auth::tests::{sign, test_verifier, valid_claims},
        cluster::memory::{Call, MemoryCluster},
        namespace::NamespaceProvisioner,
        quota::QuotaGuard,
        registry::RegistryCredentialProvisioner,
        store::sqlite::tests::memory_store,
        workload::WorkloadSettings,
    };

    const HELLO_IMAGE: &str = "gcr.io/knative-samples/helloworld-go";

    struct TestApi {
        cluster: Arc<MemoryCluster>,
        router: Router,
    }

    impl TestApi {
        async fn new(max_workloads: usize) -> Self {
            let cluster = Arc::new(MemoryCluster::new());
            let tenants = TenantDirectory::new(
                Arc::new(memory_store().await),
                NamespaceProvisioner::new(cluster.clone()),
            );
            let workloads = WorkloadManager::new(
                cluster.clone(),
                QuotaGuard::new(cluster.clone(), max_workloads),
                RegistryCredentialProvisioner::new(cluster.clone()),
                WorkloadSettings::default(),
            );

            let router = router(AppState {
                tenants: Arc::new(tenants),
                workloads: Arc::new(workloads),
                verifier: Arc::new(test_verifier()),
                request_timeout: Duration::from_secs(5),
            });

            Self { cluster, router }
        }

        async fn send(&self, method: Method, uri: &str, body: Option<Value>) -> Response {
            let token = sign(&valid_claims("github|123", "alice", "alice@example.com"));
            self.send_with_token(method, uri, Some(&token), body).await
        }

        async fn send_with_token(
            &self,
            method: Method,
            uri: &str,
            token: Option<&str>,
            body: Option<Value>,
        ) -> Response {
            let mut request = Request::builder().method(method).uri(uri);
            if let Some(token) = token {
                request = request.header(header::AUTHORIZATION, format!("Bearer {token}"));
            }

            let request = match body {
                Some(body) => request
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(body.to_string())),
                None => request.body(Body::empty()),
            }
            .expect("request must build");

            self.router
                .clone()
                .oneshot(request)
                .await
                .expect("router is infallible")
        }

        async fn login(&self) -> String {
            let response = self.send(Method::POST, "/v1/apps/login", None).await;
            assert_eq!(response.status(), StatusCode::OK);
            json_body(response).await["namespace"]
                .as_str()
                .expect("namespace must be a string")
                .to_owned()
        }
    }

    async fn json_body(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body must be readable");
        serde_json::from_slice(&bytes).expect("body must be JSON")
    }

    fn create_body(name: &str) -> Value {
        json!({
            "name": name,
            "image": HELLO_IMAGE,
            "port": "8080",
            "envs": [{"key": "TARGET", "value": "World"}],
        })
    }

    #[tokio::test]
    async fn requests_without_token_are_forbidden() {
        let api = TestApi::new(7).await;

        let response = api
            .send_with_token(Method::POST, "/v1/apps/login", None, None)
            .await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let body = json_body(response).await;
        assert_eq!(body["kind"], "Auth");
        assert!(api.cluster.calls().is_empty());
    }

    #[tokio::test]
    async fn forged_tokens_are_forbidden() {
        let api = TestApi::new(7).await;

        let response = api
            .send_with_token(Method::GET, "/v1/apps", Some("not.a.token"), None)
            .await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn login_is_idempotent() {
        let api = TestApi::new(7).await;

        let response = api.send(Method::POST, "/v1/apps/login", None).await;
        assert_eq!(response.status(), StatusCode::OK);
        let first = json_body(response).await;
        assert_eq!(first["created"], true);

        let response = api.send(Method::POST, "/v1/apps/login", None).await;
        let second = json_body(response).await;
        assert_eq!(second["created"], false);
        assert_eq!(first["namespace"], second["namespace"]);

        assert_eq!(api.cluster.namespace_names().len(), 1);
    }

    #[tokio::test]
    async fn workloads_require_login() {
        let api = TestApi::new(7).await;

        let response = api.send(Method::GET, "/v1/apps", None).await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn create_then_get() {
        let api = TestApi::new(7).await;
        let namespace = api.login().await;

        let response = api
            .send(Method::POST, "/v1/apps", Some(create_body("hello")))
            .await;
        assert_eq!(response.status(), StatusCode::OK);

        let response = api.send(Method::GET, "/v1/apps/hello", None).await;
        assert_eq!(response.status(), StatusCode::OK);
        let workload = json_body(response).await;
        assert_eq!(workload["metadata"]["namespace"], namespace.as_str());

        let container = &workload["spec"]["template"]["spec"]["containers"][0];
        assert_eq!(container["image"], HELLO_IMAGE);
        assert_eq!(container["ports"][0]["containerPort"], 8080);
        assert_eq!(container["env"][0]["name"], "TARGET");

        let response = api.send(Method::GET, "/v1/apps", None).await;
        let list = json_body(response).await;
        assert_eq!(list["kind"], "ServiceList");
        assert_eq!(list["items"].as_array().map(Vec::len), Some(1));
    }

    #[tokio::test]
    async fn create_existing_is_a_conflict() {
        let api = TestApi::new(7).await;
        api.login().await;

        api.send(Method::POST, "/v1/apps", Some(create_body("hello")))
            .await;
        let response = api
            .send(Method::POST, "/v1/apps", Some(create_body("hello")))
            .await;

        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert_eq!(
            api.cluster
                .calls()
                .iter()
                .filter(|call| call.is_create_workload())
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn quota_exceeded() {
        let api = TestApi::new(1).await;
        api.login().await;

        api.send(Method::POST, "/v1/apps", Some(create_body("first")))
            .await;
        let response = api
            .send(Method::POST, "/v1/apps", Some(create_body("second")))
            .await;

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        let body = json_body(response).await;
        assert_eq!(body["kind"], "QuotaExceeded");
        assert_eq!(body["message"], error::QUOTA_EXCEEDED_MESSAGE);
    }

    #[tokio::test]
    async fn invalid_requests() {
        let api = TestApi::new(7).await;
        api.login().await;

        let mut body = create_body("hello");
        body["port"] = json!("http");
        let response = api.send(Method::POST, "/v1/apps", Some(body)).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = api
            .send(Method::POST, "/v1/apps", Some(json!({"image": HELLO_IMAGE})))
            .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["kind"], "Validation");

        let mut body = create_body("hello");
        body["image"] = json!("quay.io/alice/hello");
        body["username"] = json!("alice");
        body["password"] = json!("s3cret");
        let response = api.send(Method::POST, "/v1/apps", Some(body)).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        assert!(!api.cluster.calls().iter().any(Call::is_create_workload));
    }

    #[tokio::test]
    async fn get_and_delete_missing_workload() {
        let api = TestApi::new(7).await;
        api.login().await;

        let response = api.send(Method::GET, "/v1/apps/missing", None).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = api.send(Method::DELETE, "/v1/apps/missing", None).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn delete_workload() {
        let api = TestApi::new(7).await;
        let namespace = api.login().await;

        api.send(Method::POST, "/v1/apps", Some(create_body("hello")))
            .await;
        let response = api.send(Method::DELETE, "/v1/apps/hello", None).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert!(api.cluster.workload(&namespace, "hello").is_none());
    }
}
