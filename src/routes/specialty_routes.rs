// src/routes/specialty_routes.rs

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{delete, get},
};
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::*,
    query::{Field, FieldKind, ListParams, ListQuery, ResourceSpec},
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_specialties).post(create_specialty))
        .route("/{id}", delete(delete_specialty))
}

static SPECIALTIES: ResourceSpec = ResourceSpec {
    from: "specialties s",
    primary_key: "s.id",
    default_sort: "createdAt",
    fields: &[
        Field::col("id", "s.id", FieldKind::Uuid),
        Field::col("title", "s.title", FieldKind::Text),
        Field::col("description", "s.description", FieldKind::Text),
        Field::col("icon", "s.icon", FieldKind::Text),
        Field::col("createdAt", "s.created_at", FieldKind::Timestamp),
        Field::col("updatedAt", "s.updated_at", FieldKind::Timestamp),
    ],
    projection: &["id", "title", "description", "icon", "createdAt", "updatedAt"],
    searchable: &["title", "description"],
    filterable: &["title"],
    includes: &[],
    default_includes: &[],
};

#[derive(Debug, Deserialize)]
pub struct CreateSpecialtyRequest {
    pub title: String,
    pub description: Option<String>,
    /// URL of an already uploaded icon.
    pub icon: Option<String>,
}

pub async fn create_specialty(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<CreateSpecialtyRequest>,
) -> Result<(StatusCode, Json<ApiOk<SpecialtyRow>>), ApiError> {
    auth.require_admin()?;

    let title = required_text("title", &req.title, 1, 100)?;
    let description = optional_text("description", req.description.as_deref(), 1, 1000)?;
    let icon = optional_text("icon", req.icon.as_deref(), 1, 2048)?;

    let specialty: SpecialtyRow = sqlx::query_as::<_, SpecialtyRow>(
        r#"
        INSERT INTO specialties (title, description, icon)
        VALUES ($1, $2, $3)
        RETURNING id, title, description, icon, created_at, updated_at
        "#,
    )
    .bind(title)
    .bind(description)
    .bind(icon)
    .fetch_one(&state.db)
    .await
    .map_err(ApiError::db)?;

    Ok((
        StatusCode::CREATED,
        Json(ApiOk::new("Specialty created successfully", specialty)),
    ))
}

pub async fn list_specialties(
    State(state): State<AppState>,
    Query(pairs): Query<Vec<(String, String)>>,
) -> Result<Json<ApiOk<Vec<serde_json::Value>>>, ApiError> {
    let params = ListParams::from_pairs(pairs);

    let page = ListQuery::new(&SPECIALTIES, &params)
        .search()
        .filter()?
        .paginate()
        .sort()?
        .fields()?
        .execute(&state.db)
        .await?;

    Ok(Json(ApiOk::paged("Specialties fetched successfully", page)))
}

pub async fn delete_specialty(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiOk<SpecialtyRow>>, ApiError> {
    auth.require_admin()?;

    let specialty: SpecialtyRow = sqlx::query_as::<_, SpecialtyRow>(
        r#"
        DELETE FROM specialties
        WHERE id = $1
        RETURNING id, title, description, icon, created_at, updated_at
        "#,
    )
    .bind(id)
    .fetch_optional(&state.db)
    .await
    .map_err(ApiError::db)?
    .ok_or_else(|| ApiError::not_found("Specialty"))?;

    Ok(Json(ApiOk::new("Specialty deleted successfully", specialty)))
}
