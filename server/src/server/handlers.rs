//! HTTP request handlers

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use deploy_api::models::{
    DeletionResponse, DeploymentCreateResponse, DeploymentResponse, ErrorResponse,
    HealthResponse, LogEntryResponse,
};
use serde::Deserialize;
use tracing::error;

use crate::app::service::SubmitRequest;
use crate::errors::DeployError;
use crate::server::state::ServerState;
use crate::utils::version_info;

/// A [`DeployError`] rendered as `{"detail": ...}` with a matching status
pub struct ApiError(pub DeployError);

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            DeployError::ValidationError(_) => StatusCode::UNPROCESSABLE_ENTITY,
            DeployError::NotFound(_) => StatusCode::NOT_FOUND,
            DeployError::Conflict(_) => StatusCode::CONFLICT,
            DeployError::ProvisionError(_)
            | DeployError::ControlPlane { .. }
            | DeployError::OperationFailed { .. }
            | DeployError::OperationTimeout { .. }
            | DeployError::AuthError(_)
            | DeployError::HttpError(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<DeployError> for ApiError {
    fn from(err: DeployError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("Request failed: {}", self.0);
        }
        let detail = match self.0 {
            DeployError::ValidationError(message)
            | DeployError::NotFound(message)
            | DeployError::Conflict(message) => message,
            other => other.to_string(),
        };
        (status, Json(ErrorResponse { detail })).into_response()
    }
}

/// Health check handler
pub async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy".to_string(),
        timestamp: Utc::now(),
        version: version_info().version,
    })
}

/// Query parameters of a submission; the archive is the request body
#[derive(Debug, Deserialize)]
pub struct DeployQuery {
    pub website_name: String,
    pub mode: String,
    pub domain: Option<String>,
    pub notification_emails: Option<String>,
    pub filename: Option<String>,
}

/// Submission handler
pub async fn deploy_handler(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<DeployQuery>,
    body: Bytes,
) -> Result<(StatusCode, Json<DeploymentCreateResponse>), ApiError> {
    let request = SubmitRequest {
        website_name: query.website_name,
        mode: query.mode,
        domain: query.domain,
        notification_emails: query.notification_emails,
        archive_name: query.filename,
    };
    let created = state.service.submit(request, &body).await?;
    Ok((StatusCode::ACCEPTED, Json(created)))
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

fn default_limit() -> usize {
    100
}

/// Deployment list handler, newest first
pub async fn list_handler(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<DeploymentResponse>>, ApiError> {
    let deployments = state.service.list(query.limit, query.offset).await?;
    Ok(Json(deployments.iter().map(|d| d.to_response()).collect()))
}

/// Single deployment handler
pub async fn get_handler(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
) -> Result<Json<DeploymentResponse>, ApiError> {
    let deployment = state.service.get(&id).await?;
    Ok(Json(deployment.to_response()))
}

/// Persisted log history handler, oldest first
pub async fn logs_handler(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
) -> Result<Json<Vec<LogEntryResponse>>, ApiError> {
    let logs = state.service.logs(&id).await?;
    Ok(Json(logs.iter().map(|l| l.to_response()).collect()))
}

/// Deletion handler
pub async fn delete_handler(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
) -> Result<Json<DeletionResponse>, ApiError> {
    Ok(Json(state.service.delete(&id).await?))
}
