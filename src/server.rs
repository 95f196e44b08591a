//! HTTP front end exposing a manager to [`crate::manager::RemoteManagerClient`].
//!
//! One `POST /{method}` route per [`ManagerMethod`], guarded by an optional
//! bearer token, plus an unauthenticated `GET /healthz`.

use axum::extract::{Request, State};
use axum::http::{header::AUTHORIZATION, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::future::Future;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::error::{ManagerError, Result};
use crate::manager::rpc::{
    envelope, AddMcpServersRequest, CallToolRequest, ConnectRequest, CreateFromPoolRequest,
    CreateRequest, IdentityRequest, ListToolsRequest, ManagerMethod, SessionRequest, RPC_VERSION,
    RPC_VERSION_HEADER,
};
use crate::manager::SandboxManagerApi;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    /// Manager serving requests.
    pub manager: Arc<dyn SandboxManagerApi>,
    /// Required bearer token, if any.
    pub token: Option<String>,
}

/// Builds the manager router.
pub fn router(state: AppState) -> Router {
    let rpc = Router::new()
        .route(&ManagerMethod::Create.path(), post(create))
        .route(&ManagerMethod::CreateFromPool.path(), post(create_from_pool))
        .route(&ManagerMethod::Release.path(), post(release))
        .route(&ManagerMethod::Start.path(), post(start))
        .route(&ManagerMethod::Stop.path(), post(stop))
        .route(&ManagerMethod::GetInfo.path(), post(get_info))
        .route(&ManagerMethod::GetStatus.path(), post(get_status))
        .route(&ManagerMethod::Cleanup.path(), post(cleanup))
        .route(&ManagerMethod::CallTool.path(), post(call_tool))
        .route(&ManagerMethod::ListTools.path(), post(list_tools))
        .route(&ManagerMethod::AddMcpServers.path(), post(add_mcp_servers))
        .route(&ManagerMethod::Connect.path(), post(connect))
        .route(&ManagerMethod::ReleaseSession.path(), post(release_session))
        .route_layer(middleware::from_fn_with_state(state.clone(), authorize));

    Router::new()
        .route("/healthz", get(|| async { Json(json!({ "status": "ok" })) }))
        .merge(rpc)
        .fallback(not_found)
        .with_state(state)
}

/// Serves `manager` on `bind` until `shutdown` resolves.
///
/// # Errors
///
/// Returns error if the address cannot be bound.
pub async fn serve(
    bind: &str,
    manager: Arc<dyn SandboxManagerApi>,
    token: Option<String>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(addr = %listener.local_addr()?, auth = token.is_some(), "Manager server listening");

    axum::serve(listener, router(AppState { manager, token }))
        .with_graceful_shutdown(shutdown)
        .await?;

    info!("Manager server stopped");
    Ok(())
}

async fn authorize(State(state): State<AppState>, request: Request, next: Next) -> Response {
    if let Some(token) = &state.token {
        let expected = format!("Bearer {token}");
        let presented = request
            .headers()
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok());
        if presented != Some(expected.as_str()) {
            warn!(path = %request.uri().path(), "Rejected request with bad token");
            return (
                StatusCode::UNAUTHORIZED,
                Json(json!({ "detail": "invalid bearer token" })),
            )
                .into_response();
        }
    }

    if let Some(version) = request.headers().get(RPC_VERSION_HEADER) {
        if version.as_bytes() != RPC_VERSION.as_bytes() {
            let version = String::from_utf8_lossy(version.as_bytes()).into_owned();
            warn!(version = %version, "Rejected request with unsupported RPC version");
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({
                    "detail": format!("unsupported RPC version {version}, expected {RPC_VERSION}")
                })),
            )
                .into_response();
        }
    }

    next.run(request).await
}

async fn not_found(request: Request) -> impl IntoResponse {
    warn!("unhandled path: {}", request.uri());
    (StatusCode::NOT_FOUND, Json(json!({ "detail": "not found" })))
}

fn data(value: Value) -> Json<Value> {
    Json(envelope(value))
}

async fn create(State(state): State<AppState>, Json(body): Json<CreateRequest>) -> Response {
    match state.manager.create(body).await {
        Ok(name) => data(json!(name)).into_response(),
        Err(e) => {
            error!(error = %e, "Create failed");
            let status = match &e {
                ManagerError::NameCollision { .. } => StatusCode::CONFLICT,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            (status, Json(json!({ "detail": e.to_string() }))).into_response()
        }
    }
}

async fn create_from_pool(
    State(state): State<AppState>,
    Json(body): Json<CreateFromPoolRequest>,
) -> Json<Value> {
    data(json!(state.manager.create_from_pool(body.sandbox_type).await))
}

async fn release(State(state): State<AppState>, Json(body): Json<IdentityRequest>) -> Json<Value> {
    data(json!(state.manager.release(&body.identity).await))
}

async fn start(State(state): State<AppState>, Json(body): Json<IdentityRequest>) -> Json<Value> {
    data(json!(state.manager.start(&body.identity).await))
}

async fn stop(State(state): State<AppState>, Json(body): Json<IdentityRequest>) -> Json<Value> {
    data(json!(state.manager.stop(&body.identity).await))
}

async fn get_info(State(state): State<AppState>, Json(body): Json<IdentityRequest>) -> Json<Value> {
    data(json!(state.manager.get_info(&body.identity).await))
}

async fn get_status(
    State(state): State<AppState>,
    Json(body): Json<IdentityRequest>,
) -> Json<Value> {
    let status = state.manager.get_status(&body.identity).await;
    data(json!(status.map(|s| s.to_string())))
}

async fn cleanup(State(state): State<AppState>) -> Json<Value> {
    state.manager.cleanup().await;
    data(Value::Bool(true))
}

async fn call_tool(
    State(state): State<AppState>,
    Json(body): Json<CallToolRequest>,
) -> Json<Value> {
    data(
        state
            .manager
            .call_tool(&body.identity, &body.tool_name, body.arguments)
            .await,
    )
}

async fn list_tools(
    State(state): State<AppState>,
    Json(body): Json<ListToolsRequest>,
) -> Json<Value> {
    data(
        state
            .manager
            .list_tools(&body.identity, body.tool_type.as_deref())
            .await,
    )
}

async fn add_mcp_servers(
    State(state): State<AppState>,
    Json(body): Json<AddMcpServersRequest>,
) -> Json<Value> {
    data(
        state
            .manager
            .add_mcp_servers(&body.identity, body.server_configs, body.overwrite)
            .await,
    )
}

async fn connect(State(state): State<AppState>, Json(body): Json<ConnectRequest>) -> Json<Value> {
    data(json!(
        state
            .manager
            .connect(&body.session_id, &body.user_id, &body.sandbox_types)
            .await
    ))
}

async fn release_session(
    State(state): State<AppState>,
    Json(body): Json<SessionRequest>,
) -> Json<Value> {
    data(json!(
        state
            .manager
            .release_session(&body.session_id, &body.user_id)
            .await
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::MockBackend;
    use crate::collections::Stores;
    use crate::config::{BackendConfig, ManagerSettings};
    use crate::manager::{LocalManager, LocalManagerParts, RemoteManagerClient};
    use crate::model::ContainerStatus;
    use crate::registry::{SandboxRegistry, SandboxType};
    use crate::storage::LocalStorage;

    struct Served {
        base_url: String,
        backend: MockBackend,
    }

    async fn serve_local(pool_size: usize, token: Option<&str>) -> Served {
        let backend = MockBackend::new();
        let manager = LocalManager::new(LocalManagerParts {
            settings: ManagerSettings {
                pool_size,
                ..Default::default()
            },
            backend_config: BackendConfig::default(),
            registry: Arc::new(SandboxRegistry::with_builtins("latest").unwrap()),
            backend: Arc::new(backend.clone()),
            stores: Stores::in_memory(),
            storage: Arc::new(LocalStorage::new()),
        })
        .await
        .unwrap();

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = router(AppState {
            manager: Arc::new(manager),
            token: token.map(str::to_string),
        });
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Served {
            base_url: format!("http://{addr}"),
            backend,
        }
    }

    #[tokio::test]
    async fn test_remote_lifecycle_through_server() {
        let served = serve_local(1, Some("secret")).await;
        let client = RemoteManagerClient::new(&served.base_url, Some("secret")).unwrap();
        assert!(client.check_health().await);

        let name = client.create(CreateRequest::default()).await.unwrap().unwrap();
        let info = client.get_info(&name).await.unwrap();
        assert_eq!(info.container_name, name);
        assert_eq!(client.get_status(&name).await, Some(ContainerStatus::Running));

        assert!(client.stop(&name).await);
        assert_eq!(client.get_status(&name).await, Some(ContainerStatus::Exited));
        assert!(client.start(&name).await);

        let pooled = client.create_from_pool(None).await.unwrap();
        assert_ne!(pooled, name);

        assert!(client.release(&name).await);
        assert!(client.get_info(&name).await.is_none());
        assert!(client.release(&name).await);

        client.cleanup().await;
        assert_eq!(served.backend.live_count(), 0);
    }

    #[tokio::test]
    async fn test_remote_sessions_through_server() {
        let served = serve_local(0, None).await;
        let client = RemoteManagerClient::new(&served.base_url, None).unwrap();
        let types = [SandboxType::new("browser")];

        let first = client.connect("s1", "u1", &types).await;
        assert_eq!(first.len(), 1);
        assert_eq!(client.connect("s1", "u1", &types).await, first);

        assert!(client.release_session("s1", "u1").await);
        assert_eq!(served.backend.live_count(), 0);
    }

    #[tokio::test]
    async fn test_remote_create_failure_is_none() {
        let served = serve_local(0, None).await;
        let client = RemoteManagerClient::new(&served.base_url, None).unwrap();

        let request = CreateRequest::of_type(SandboxType::new("quantum"));
        assert_eq!(client.create(request).await.unwrap(), None);

        served.backend.set_report_all_existing(true);
        assert_eq!(client.create(CreateRequest::default()).await.unwrap(), None);
        assert_eq!(served.backend.create_count(), 0);
    }

    #[tokio::test]
    async fn test_tool_call_on_unknown_sandbox_is_error_payload() {
        let served = serve_local(0, None).await;
        let client = RemoteManagerClient::new(&served.base_url, None).unwrap();

        let result = client
            .call_tool("missing", "run_shell_command", json!({}))
            .await;
        assert!(crate::manager::rpc::is_error(&result));
    }

    #[tokio::test]
    async fn test_bad_token_is_rejected() {
        let served = serve_local(0, Some("secret")).await;

        let wrong = RemoteManagerClient::new(&served.base_url, Some("nope")).unwrap();
        assert!(wrong.check_health().await);
        assert!(!wrong.release("abc").await);
        assert!(crate::manager::rpc::is_error(
            &wrong.list_tools("abc", None).await
        ));

        let anonymous = RemoteManagerClient::new(&served.base_url, None).unwrap();
        assert!(anonymous.create_from_pool(None).await.is_none());
        assert_eq!(served.backend.create_count(), 0);
    }

    #[tokio::test]
    async fn test_rpc_version_mismatch_is_rejected() {
        let served = serve_local(0, None).await;
        let response = reqwest::Client::new()
            .post(format!("{}/release", served.base_url))
            .header(RPC_VERSION_HEADER, "99")
            .json(&json!({ "identity": "abc" }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);

        let response = reqwest::Client::new()
            .post(format!("{}/release", served.base_url))
            .json(&json!({ "identity": "abc" }))
            .send()
            .await
            .unwrap();
        assert!(response.status().is_success());
        let body: Value = response.json().await.unwrap();
        assert_eq!(body, json!({ "data": true }));
    }

    #[tokio::test]
    async fn test_unknown_route_is_404() {
        let served = serve_local(0, None).await;
        let response = reqwest::Client::new()
            .post(format!("{}/teleport", served.base_url))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
    }
}
