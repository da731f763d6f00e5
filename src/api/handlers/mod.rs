use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use super::AppState;
use crate::error::ServiceError;
use crate::models::*;

const DEFAULT_BRANCH: &str = "MAIN";

// ============================================================
// Error Handling
// ============================================================

/// Log an internal error and return a sanitized response to the client.
fn internal_error(e: impl std::fmt::Display) -> (StatusCode, String) {
    tracing::error!("Internal error: {}", e);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "Internal server error".to_string(),
    )
}

/// Request problems are returned to the client as-is; store failures are
/// logged and sanitized.
fn service_error(e: ServiceError) -> (StatusCode, String) {
    if let ServiceError::Store(inner) = e {
        return internal_error(inner);
    }
    let status = match &e {
        ServiceError::Parse { .. }
        | ServiceError::Validation(_)
        | ServiceError::Transform(_)
        | ServiceError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        ServiceError::TemplateNotFound(_) => StatusCode::NOT_FOUND,
        ServiceError::TemplateExists(_) => StatusCode::CONFLICT,
        ServiceError::Remote(_) => StatusCode::BAD_GATEWAY,
        ServiceError::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
        ServiceError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    tracing::warn!("Request failed: {}", e);
    (status, e.to_string())
}

// ============================================================
// Health
// ============================================================

pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

// ============================================================
// Templates
// ============================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListTemplatesQuery {
    pub branch: Option<String>,
    /// Comma-separated concept ids.
    pub ancestors_of: Option<String>,
    /// Comma-separated concept ids.
    pub descendants_of: Option<String>,
}

fn split_ids(ids: Option<&str>) -> Vec<String> {
    ids.map(|ids| {
        ids.split(',')
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .collect()
    })
    .unwrap_or_default()
}

pub async fn list_templates(
    State(state): State<AppState>,
    Query(query): Query<ListTemplatesQuery>,
) -> Result<Json<Vec<ConceptTemplate>>, (StatusCode, String)> {
    let branch = query.branch.as_deref().unwrap_or(DEFAULT_BRANCH);
    let ancestors_of = split_ids(query.ancestors_of.as_deref());
    let descendants_of = split_ids(query.descendants_of.as_deref());

    state
        .transforms
        .templates()
        .list_all(branch, &ancestors_of, &descendants_of)
        .await
        .map(Json)
        .map_err(service_error)
}

pub async fn get_template(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<ConceptTemplate>, (StatusCode, String)> {
    state
        .transforms
        .templates()
        .load_or_throw(&name)
        .map(Json)
        .map_err(service_error)
}

pub async fn create_template(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(input): Json<TemplateInput>,
) -> Result<(StatusCode, Json<ConceptTemplate>), (StatusCode, String)> {
    state
        .transforms
        .templates()
        .create(&name, input)
        .map(|t| (StatusCode::CREATED, Json(t)))
        .map_err(service_error)
}

pub async fn update_template(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(input): Json<TemplateInput>,
) -> Result<Json<ConceptTemplate>, (StatusCode, String)> {
    state
        .transforms
        .templates()
        .update(&name, input)
        .map(Json)
        .map_err(service_error)
}

#[derive(Debug, Deserialize)]
pub struct BranchQuery {
    pub branch: Option<String>,
}

pub async fn transform_concept(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<BranchQuery>,
    Json(concept): Json<Concept>,
) -> Result<Json<Concept>, (StatusCode, String)> {
    let branch = query.branch.as_deref().unwrap_or(DEFAULT_BRANCH);
    state
        .transforms
        .transform_single_concept(branch, &name, concept)
        .await
        .map(Json)
        .map_err(service_error)
}

// ============================================================
// Transformations
// ============================================================

#[derive(Debug, Deserialize)]
pub struct CreateTransformationInput {
    pub branch_path: String,
    pub destination_template: String,
    #[serde(flatten)]
    pub request: TemplateTransformRequest,
}

pub async fn create_transformation(
    State(state): State<AppState>,
    Json(input): Json<CreateTransformationInput>,
) -> Result<(StatusCode, Json<TemplateTransformation>), (StatusCode, String)> {
    let handle = state
        .transforms
        .transform(&input.branch_path, &input.destination_template, input.request)
        .await
        .map_err(service_error)?;
    Ok((StatusCode::ACCEPTED, Json(handle.transformation)))
}

pub async fn get_transformation(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<TemplateTransformation>, (StatusCode, String)> {
    state
        .db
        .get_transformation(id)
        .map_err(internal_error)?
        .map(Json)
        .ok_or((StatusCode::NOT_FOUND, "Transformation not found".to_string()))
}

pub async fn get_transformation_results(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<TransformationResult>, (StatusCode, String)> {
    state
        .db
        .get_results(id)
        .map_err(internal_error)?
        .map(Json)
        .ok_or((StatusCode::NOT_FOUND, "Results not found".to_string()))
}
