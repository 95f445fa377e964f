//! Collection browsing handlers
//!
//! GET /collections?search=, GET /collections/:id

use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::db::matches_search;
use crate::error::{ApiError, ApiResult};
use crate::models::{Collection, CollectionSummary};
use crate::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    /// Case-insensitive substring of the display name
    #[serde(default)]
    pub search: Option<String>,
}

/// GET /collections response
#[derive(Debug, Serialize)]
pub struct CollectionListResponse {
    pub collections: Vec<CollectionSummary>,
    pub total: usize,
}

/// GET /collections
pub async fn list_collections(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<CollectionListResponse>> {
    let mut collections = state.store.list().await?;
    if let Some(search) = query.search.as_deref() {
        collections.retain(|summary| matches_search(summary, search));
    }

    Ok(Json(CollectionListResponse {
        total: collections.len(),
        collections,
    }))
}

/// GET /collections/:id
pub async fn get_collection(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Collection>> {
    state
        .store
        .get(&id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Collection {}", id)))
}

/// Build collection routes
pub fn collection_routes() -> Router<AppState> {
    Router::new()
        .route("/collections", get(list_collections))
        .route("/collections/:id", get(get_collection))
}
