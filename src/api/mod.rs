mod handlers;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::db::Database;
use crate::transform::TransformService;

#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub transforms: TransformService,
}

pub fn create_router(db: Database, transforms: TransformService) -> Router {
    let api = Router::new()
        // Templates
        .route("/templates", get(handlers::list_templates))
        .route(
            "/templates/{name}",
            get(handlers::get_template)
                .post(handlers::create_template)
                .put(handlers::update_template),
        )
        .route("/templates/{name}/transform", post(handlers::transform_concept))
        // Transformations
        .route("/transformations", post(handlers::create_transformation))
        .route("/transformations/{id}", get(handlers::get_transformation))
        .route(
            "/transformations/{id}/results",
            get(handlers::get_transformation_results),
        )
        // Health
        .route("/health", get(handlers::health));

    Router::new()
        .nest("/api/v1", api)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(AppState { db, transforms })
}
