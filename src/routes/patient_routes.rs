// src/routes/patient_routes.rs

use axum::{
    Json, Router,
    extract::{Query, State},
    routing::{get, patch},
};
use serde::Deserialize;

use crate::{
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::*,
    query::{Field, FieldKind, ListParams, ListQuery, ResourceSpec},
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_patients))
        .route("/update-my-profile", patch(update_my_profile))
}

static PATIENTS: ResourceSpec = ResourceSpec {
    from: "patients p JOIN users u ON u.id = p.user_id",
    primary_key: "p.id",
    default_sort: "createdAt",
    fields: &[
        Field::col("id", "p.id", FieldKind::Uuid),
        Field::col("userId", "p.user_id", FieldKind::Uuid),
        Field::col("name", "p.name", FieldKind::Text),
        Field::col("email", "p.email", FieldKind::Text),
        Field::col("profilePhoto", "p.profile_photo", FieldKind::Text),
        Field::col("contactNumber", "p.contact_number", FieldKind::Text),
        Field::col("address", "p.address", FieldKind::Text),
        Field::col("createdAt", "p.created_at", FieldKind::Timestamp),
        Field::col("updatedAt", "p.updated_at", FieldKind::Timestamp),
        Field::col("user.status", "u.status", FieldKind::Enum),
    ],
    projection: &[
        "id",
        "userId",
        "name",
        "email",
        "profilePhoto",
        "contactNumber",
        "address",
        "createdAt",
        "updatedAt",
    ],
    searchable: &["name", "email", "contactNumber", "address"],
    filterable: &["email", "contactNumber", "user.status"],
    includes: &[],
    default_includes: &[],
};

/* ============================================================
   GET /patients  (ADMIN+)
   ============================================================ */

pub async fn list_patients(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(pairs): Query<Vec<(String, String)>>,
) -> Result<Json<ApiOk<Vec<serde_json::Value>>>, ApiError> {
    auth.require_admin()?;
    let params = ListParams::from_pairs(pairs);

    let page = ListQuery::new(&PATIENTS, &params)
        .search()
        .filter()?
        .where_eq("p.is_deleted", false)
        .paginate()
        .sort()?
        .fields()?
        .execute(&state.db)
        .await?;

    Ok(Json(ApiOk::paged("Patients fetched successfully", page)))
}

/* ============================================================
   PATCH /patients/update-my-profile  (PATIENT)
   ============================================================ */

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateMyProfileRequest {
    pub name: Option<String>,
    #[serde(default, deserialize_with = "deserialize_double_option")]
    pub contact_number: Option<Option<String>>,
    #[serde(default, deserialize_with = "deserialize_double_option")]
    pub address: Option<Option<String>>,
    /// URL of an already uploaded image.
    #[serde(default, deserialize_with = "deserialize_double_option")]
    pub profile_photo: Option<Option<String>>,
}

pub async fn update_my_profile(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<UpdateMyProfileRequest>,
) -> Result<Json<ApiOk<PatientRow>>, ApiError> {
    auth.require(&[Role::Patient])?;

    let mut tx = state.db.begin().await.map_err(ApiError::db)?;

    let existing: PatientRow = sqlx::query_as::<_, PatientRow>(&format!(
        "SELECT {PATIENT_COLUMNS} FROM patients WHERE user_id = $1 AND is_deleted = FALSE FOR UPDATE"
    ))
    .bind(auth.user_id)
    .fetch_optional(&mut *tx)
    .await
    .map_err(ApiError::db)?
    .ok_or_else(|| ApiError::not_found("Patient"))?;

    let name = match req.name.as_deref() {
        Some(v) => required_text("name", v, 1, 100)?,
        None => existing.name,
    };
    let contact_number = match req.contact_number {
        None => existing.contact_number,
        Some(v) => optional_text("contactNumber", v.as_deref(), 6, 20)?,
    };
    let address = match req.address {
        None => existing.address,
        Some(v) => optional_text("address", v.as_deref(), 1, 200)?,
    };
    let profile_photo = match req.profile_photo {
        None => existing.profile_photo,
        Some(v) => optional_text("profilePhoto", v.as_deref(), 1, 2048)?,
    };

    let patient: PatientRow = sqlx::query_as::<_, PatientRow>(&format!(
        r#"
        UPDATE patients
        SET name = $1,
            contact_number = $2,
            address = $3,
            profile_photo = $4,
            updated_at = now()
        WHERE id = $5
        RETURNING {PATIENT_COLUMNS}
        "#
    ))
    .bind(&name)
    .bind(contact_number)
    .bind(address)
    .bind(profile_photo)
    .bind(existing.id)
    .fetch_one(&mut *tx)
    .await
    .map_err(ApiError::db)?;

    sqlx::query(r#"UPDATE users SET name = $1, updated_at = now() WHERE id = $2"#)
        .bind(&name)
        .bind(auth.user_id)
        .execute(&mut *tx)
        .await
        .map_err(ApiError::db)?;

    tx.commit().await.map_err(ApiError::db)?;

    Ok(Json(ApiOk::new("Profile updated successfully", patient)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profile_patch_distinguishes_clear_from_keep() {
        let req: UpdateMyProfileRequest =
            serde_json::from_str(r#"{"address": null, "name": "Nadia"}"#).unwrap();
        assert_eq!(req.address, Some(None));
        assert_eq!(req.contact_number, None);
        assert_eq!(req.name.as_deref(), Some("Nadia"));
    }

    #[test]
    fn listing_excludes_deleted_patients() {
        let params = ListParams::from_pairs(vec![("search".to_string(), "rahim".to_string())]);
        let q = ListQuery::new(&PATIENTS, &params)
            .search()
            .where_eq("p.is_deleted", false);
        let sql = q.count_sql().sql().to_string();
        assert!(sql.contains("p.name::text ILIKE $1"));
        assert!(sql.ends_with("AND p.is_deleted = $5"));
    }
}
