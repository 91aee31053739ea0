//! HTTP request handlers

use std::sync::Arc;

use axum::{
    extract::State,
    response::{IntoResponse, Response},
    Json,
};
use http::StatusCode;
use router_api::{
    ErrorResponse, HealthResponse, QueryRequest, QueryResponse, RouteInfo, RouteTableResponse,
    VersionResponse,
};
use tracing::error;

use crate::errors::MeshError;
use crate::server::state::ServerState;
use crate::utils::version_info;

/// Error wrapper turning a [`MeshError`] into a JSON response
pub struct ApiError(pub MeshError);

impl From<MeshError> for ApiError {
    fn from(err: MeshError) -> Self {
        ApiError(err)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            MeshError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            MeshError::UpstreamError { .. } => StatusCode::BAD_GATEWAY,
            MeshError::ConfigError(_) => StatusCode::BAD_REQUEST,
            MeshError::NotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn details(&self) -> Option<serde_json::Value> {
        match &self.0 {
            MeshError::ServiceUnavailable { service, .. }
            | MeshError::UpstreamError { service, .. } => {
                Some(serde_json::json!({ "service": service }))
            }
            _ => None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("{}", self.0);
        }
        let body = ErrorResponse {
            error: self.0.class().to_string(),
            message: self.0.to_string(),
            details: self.details(),
        };
        (status, Json(body)).into_response()
    }
}

/// Health check handler
pub async fn health_handler() -> impl IntoResponse {
    let version = version_info();
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: "infermesh-router".to_string(),
        version: version.version,
    })
}

/// Version handler
pub async fn version_handler() -> impl IntoResponse {
    let version = version_info();
    Json(VersionResponse {
        version: version.version,
        git_hash: version.git_hash,
        build_time: version.build_time,
    })
}

/// Routing table handler
pub async fn routes_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    Json(RouteTableResponse::from(state.router.table()))
}

/// Query handler: classify, probe, forward
pub async fn query_handler(
    State(state): State<Arc<ServerState>>,
    Json(request): Json<QueryRequest>,
) -> Result<Json<QueryResponse>, ApiError> {
    let completion = state
        .router
        .route(&request.query, request.n_predict)
        .await?;

    Ok(Json(QueryResponse {
        route: RouteInfo::from(&completion.decision),
        content: completion.content,
    }))
}
