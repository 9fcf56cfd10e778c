//! Open Service Broker HTTP surface.
//!
//! Provides:
//! - `GET /v2/catalog`
//! - `PUT` / `DELETE /v2/service_instances/{instance_id}`
//! - `GET /v2/service_instances/{instance_id}/last_operation`
//! - `GET /health`
//!
//! Every `/v2` route requires HTTP basic auth.

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    extract::{Path, Query, Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, put},
    Json, Router,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use subtle::ConstantTimeEq;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::broker::ProvisioningBroker;
use crate::error::BrokerError;

/// Plan offered by the catalog.
pub const PLAN_NAME: &str = "AzureBlockchain";
pub const PLAN_ID: &str = "7c0b2254-7e68-11e7-bbe1-000d3a818256";
const SERVICE_DESCRIPTION: &str = "Azure Blockchain";
const SERVICE_TAG: &str = "azureblockchain";

/// Name and id the service is registered under.
#[derive(Debug, Clone)]
pub struct ServiceIdentity {
    pub name: String,
    pub id: String,
}

/// Credentials platform callers must present.
#[derive(Clone)]
pub struct BasicAuth {
    pub username: String,
    pub password: String,
}

impl BasicAuth {
    fn accepts(&self, headers: &HeaderMap) -> bool {
        let Some((username, password)) = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Basic "))
            .and_then(|encoded| STANDARD.decode(encoded.trim()).ok())
            .and_then(|decoded| String::from_utf8(decoded).ok())
            .and_then(|pair| {
                pair.split_once(':')
                    .map(|(u, p)| (u.to_string(), p.to_string()))
            })
        else {
            return false;
        };

        let user_ok = username.as_bytes().ct_eq(self.username.as_bytes());
        let pass_ok = password.as_bytes().ct_eq(self.password.as_bytes());
        (user_ok & pass_ok).into()
    }
}

/// Shared handler state.
pub struct AppState {
    pub broker: ProvisioningBroker,
    pub service: ServiceIdentity,
    pub auth: BasicAuth,
}

/// Build the HTTP router.
pub fn build_router(state: Arc<AppState>) -> Router {
    let v2 = Router::new()
        .route("/v2/catalog", get(catalog_handler))
        .route(
            "/v2/service_instances/{instance_id}",
            put(provision_handler).delete(deprovision_handler),
        )
        .route(
            "/v2/service_instances/{instance_id}/last_operation",
            get(last_operation_handler),
        )
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            require_basic_auth,
        ));

    Router::new()
        .route("/health", get(health_handler))
        .merge(v2)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve until `shutdown` resolves.
///
/// # Errors
///
/// Returns an error if the address cannot be bound or the server fails.
pub async fn run_server(
    state: Arc<AppState>,
    addr: &str,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("Service broker listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .context("server error")?;

    info!("Service broker stopped");
    Ok(())
}

async fn require_basic_auth(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    if state.auth.accepts(request.headers()) {
        next.run(request).await
    } else {
        warn!(path = %request.uri().path(), "Rejected unauthenticated request");
        (
            StatusCode::UNAUTHORIZED,
            [(header::WWW_AUTHENTICATE, "Basic realm=\"service-broker\"")],
        )
            .into_response()
    }
}

// ============================================================================
// Request/Response types
// ============================================================================

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Debug, Deserialize)]
struct ProvisionQuery {
    #[serde(default)]
    accepts_incomplete: bool,
}

/// Body of a provision request.
#[derive(Debug, Deserialize)]
pub struct ProvisionRequest {
    pub service_id: String,
    pub plan_id: String,
    #[serde(default)]
    pub parameters: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct LastOperationQuery {
    operation: Option<String>,
}

fn error_response(status: StatusCode, description: impl Into<String>) -> Response {
    (status, Json(json!({ "description": description.into() }))).into_response()
}

fn broker_error_response(err: &BrokerError) -> Response {
    match err.root() {
        BrokerError::MalformedToken(_) | BrokerError::InvalidInstanceId(_) => {
            error_response(StatusCode::BAD_REQUEST, err.to_string())
        }
        _ => error_response(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
    }
}

// ============================================================================
// Handlers
// ============================================================================

async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn catalog_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "services": [{
            "id": state.service.id,
            "name": state.service.name,
            "description": SERVICE_DESCRIPTION,
            "bindable": false,
            "plan_updateable": false,
            "tags": [SERVICE_TAG],
            "plans": [{
                "id": PLAN_ID,
                "name": PLAN_NAME,
                "description": SERVICE_DESCRIPTION,
            }],
        }]
    }))
}

async fn provision_handler(
    State(state): State<Arc<AppState>>,
    Path(instance_id): Path<String>,
    Query(query): Query<ProvisionQuery>,
    Json(request): Json<ProvisionRequest>,
) -> Response {
    if !query.accepts_incomplete {
        return (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(json!({
                "error": "AsyncRequired",
                "description": "This service plan requires client support for asynchronous service operations.",
            })),
        )
            .into_response();
    }
    if request.service_id != state.service.id {
        return error_response(
            StatusCode::BAD_REQUEST,
            format!("unknown service_id {:?}", request.service_id),
        );
    }
    if request.plan_id != PLAN_ID {
        return error_response(
            StatusCode::BAD_REQUEST,
            format!("unknown plan_id {:?}", request.plan_id),
        );
    }
    if request.parameters.is_some() {
        info!(%instance_id, "Ignoring per-instance parameters; broker configuration applies");
    }

    match state.broker.provision(&instance_id).await {
        Ok(response) => (
            StatusCode::ACCEPTED,
            Json(json!({ "operation": response.operation })),
        )
            .into_response(),
        Err(e) => {
            error!(%instance_id, error = %e, "Provision failed");
            broker_error_response(&e)
        }
    }
}

async fn deprovision_handler(
    State(state): State<Arc<AppState>>,
    Path(instance_id): Path<String>,
) -> Response {
    match state.broker.deprovision(&instance_id).await {
        Ok(response) => {
            let body = match response.operation {
                Some(operation) => json!({ "operation": operation }),
                None => json!({}),
            };
            (StatusCode::OK, Json(body)).into_response()
        }
        Err(e) => {
            error!(%instance_id, error = %e, "Deprovision failed");
            broker_error_response(&e)
        }
    }
}

async fn last_operation_handler(
    State(state): State<Arc<AppState>>,
    Path(instance_id): Path<String>,
    Query(query): Query<LastOperationQuery>,
) -> Response {
    let Some(operation) = query.operation else {
        return error_response(StatusCode::BAD_REQUEST, "missing operation parameter");
    };

    match state.broker.poll(&instance_id, &operation).await {
        Ok(last) => (StatusCode::OK, Json(last)).into_response(),
        Err(e) => {
            warn!(%instance_id, error = %e, "Last operation lookup failed");
            broker_error_response(&e)
        }
    }
}
