// src/routes/admin_routes.rs

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    routing::get,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::*,
    query::{Field, FieldKind, Include, ListParams, ListQuery, ResourceSpec},
    routes::doctor_routes::soft_delete_user,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_admins))
        .route("/{id}", get(get_admin).patch(update_admin).delete(delete_admin))
}

static ADMINS: ResourceSpec = ResourceSpec {
    from: "admins a JOIN users u ON u.id = a.user_id",
    primary_key: "a.id",
    default_sort: "createdAt",
    fields: &[
        Field::col("id", "a.id", FieldKind::Uuid),
        Field::col("userId", "a.user_id", FieldKind::Uuid),
        Field::col("name", "a.name", FieldKind::Text),
        Field::col("email", "a.email", FieldKind::Text),
        Field::col("profilePhoto", "a.profile_photo", FieldKind::Text),
        Field::col("contactNumber", "a.contact_number", FieldKind::Text),
        Field::col("isDeleted", "a.is_deleted", FieldKind::Bool),
        Field::col("createdAt", "a.created_at", FieldKind::Timestamp),
        Field::col("updatedAt", "a.updated_at", FieldKind::Timestamp),
        Field::col("user.role", "u.role", FieldKind::Enum),
        Field::col("user.status", "u.status", FieldKind::Enum),
    ],
    projection: &[
        "id",
        "userId",
        "name",
        "email",
        "profilePhoto",
        "contactNumber",
        "isDeleted",
        "createdAt",
        "updatedAt",
    ],
    searchable: &["name", "email", "contactNumber"],
    filterable: &["email", "contactNumber", "isDeleted", "user.role", "user.status"],
    includes: &[Include {
        name: "user",
        expr: "SELECT jsonb_build_object('id', u.id, 'name', u.name, 'email', u.email, \
               'role', u.role, 'status', u.status, 'needPasswordChange', u.need_password_change, \
               'createdAt', u.created_at)",
    }],
    default_includes: &["user"],
};

/* ============================================================
   GET /admins
   ============================================================ */

pub async fn list_admins(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(pairs): Query<Vec<(String, String)>>,
) -> Result<Json<ApiOk<Vec<serde_json::Value>>>, ApiError> {
    auth.require_admin()?;
    let params = ListParams::from_pairs(pairs);

    let page = ListQuery::new(&ADMINS, &params)
        .search()
        .filter()?
        .dynamic_include()
        .paginate()
        .sort()?
        .fields()?
        .execute(&state.db)
        .await?;

    Ok(Json(ApiOk::paged("Admins fetched successfully", page)))
}

/* ============================================================
   GET /admins/{id}
   ============================================================ */

pub async fn get_admin(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiOk<serde_json::Value>>, ApiError> {
    auth.require_admin()?;
    let params = ListParams::default();

    let admin = ListQuery::new(&ADMINS, &params)
        .where_eq("a.id", id)
        .dynamic_include()
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| ApiError::not_found("Admin"))?;

    Ok(Json(ApiOk::new("Admin fetched successfully", admin)))
}

#[derive(Debug, sqlx::FromRow)]
struct AdminTarget {
    user_id: Uuid,
    role: Role,
    is_deleted: bool,
}

async fn load_target(state: &AppState, id: Uuid) -> Result<AdminTarget, ApiError> {
    sqlx::query_as::<_, AdminTarget>(
        r#"
        SELECT a.user_id, u.role, a.is_deleted
        FROM admins a
        JOIN users u ON u.id = a.user_id
        WHERE a.id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(&state.db)
    .await
    .map_err(ApiError::db)?
    .ok_or_else(|| ApiError::not_found("Admin"))
}

/// Only a SUPER_ADMIN may act on another SUPER_ADMIN.
fn ensure_can_manage(auth: &AuthContext, target_role: Role) -> Result<(), ApiError> {
    if target_role == Role::SuperAdmin && auth.role != Role::SuperAdmin {
        return Err(ApiError::forbidden("Only a super admin can manage a super admin"));
    }
    Ok(())
}

/* ============================================================
   PATCH /admins/{id}
   ============================================================ */

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateAdminRequest {
    pub name: Option<String>,
    #[serde(default, deserialize_with = "deserialize_double_option")]
    pub profile_photo: Option<Option<String>>,
    #[serde(default, deserialize_with = "deserialize_double_option")]
    pub contact_number: Option<Option<String>>,
}

/// Stored admin row, locked until the surrounding transaction ends.
fn lock_admin_sql() -> String {
    format!("SELECT {ADMIN_COLUMNS} FROM admins WHERE id = $1 FOR UPDATE")
}

pub async fn update_admin(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateAdminRequest>,
) -> Result<Json<ApiOk<AdminRow>>, ApiError> {
    auth.require_admin()?;
    let target = load_target(&state, id).await?;
    ensure_can_manage(&auth, target.role)?;
    if target.is_deleted {
        return Err(ApiError::not_found("Admin"));
    }

    let mut tx = state.db.begin().await.map_err(ApiError::db)?;

    let existing: AdminRow = sqlx::query_as::<_, AdminRow>(&lock_admin_sql())
        .bind(id)
        .fetch_one(&mut *tx)
        .await
        .map_err(ApiError::db)?;

    let name = match req.name.as_deref() {
        Some(v) => required_text("name", v, 1, 100)?,
        None => existing.name,
    };
    let profile_photo = match req.profile_photo {
        None => existing.profile_photo,
        Some(v) => v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty()),
    };
    let contact_number = match req.contact_number {
        None => existing.contact_number,
        Some(v) => optional_text("contactNumber", v.as_deref(), 6, 20)?,
    };

    let updated: AdminRow = sqlx::query_as::<_, AdminRow>(&format!(
        r#"
        UPDATE admins
        SET name = $1, profile_photo = $2, contact_number = $3, updated_at = now()
        WHERE id = $4
        RETURNING {ADMIN_COLUMNS}
        "#
    ))
    .bind(&name)
    .bind(profile_photo)
    .bind(contact_number)
    .bind(id)
    .fetch_one(&mut *tx)
    .await
    .map_err(ApiError::db)?;

    sqlx::query(r#"UPDATE users SET name = $1, updated_at = now() WHERE id = $2"#)
        .bind(&name)
        .bind(target.user_id)
        .execute(&mut *tx)
        .await
        .map_err(ApiError::db)?;

    tx.commit().await.map_err(ApiError::db)?;

    Ok(Json(ApiOk::new("Admin updated successfully", updated)))
}

/* ============================================================
   DELETE /admins/{id}  (soft delete)
   ============================================================ */

pub async fn delete_admin(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiOk<AdminRow>>, ApiError> {
    auth.require_admin()?;
    let target = load_target(&state, id).await?;

    if target.user_id == auth.user_id {
        return Err(ApiError::BadRequest(
            "CANNOT_DELETE_SELF",
            "You cannot delete yourself".into(),
        ));
    }
    ensure_can_manage(&auth, target.role)?;

    let mut tx = state.db.begin().await.map_err(ApiError::db)?;

    let admin: AdminRow = sqlx::query_as::<_, AdminRow>(&format!(
        r#"
        UPDATE admins
        SET is_deleted = TRUE, deleted_at = now(), updated_at = now()
        WHERE id = $1
        RETURNING {ADMIN_COLUMNS}
        "#
    ))
    .bind(id)
    .fetch_one(&mut *tx)
    .await
    .map_err(ApiError::db)?;

    soft_delete_user(&mut tx, target.user_id).await?;

    tx.commit().await.map_err(ApiError::db)?;

    tracing::info!(admin_id = %id, deleted_by = %auth.user_id, "admin soft-deleted");
    Ok(Json(ApiOk::new("Admin deleted successfully", admin)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(role: Role) -> AuthContext {
        AuthContext {
            user_id: Uuid::new_v4(),
            role,
            session_token_id: Uuid::new_v4(),
        }
    }

    #[test]
    fn super_admins_are_protected_from_plain_admins() {
        assert!(ensure_can_manage(&ctx(Role::Admin), Role::SuperAdmin).is_err());
        assert!(ensure_can_manage(&ctx(Role::Admin), Role::Admin).is_ok());
        assert!(ensure_can_manage(&ctx(Role::SuperAdmin), Role::SuperAdmin).is_ok());
    }

    #[test]
    fn update_reads_the_row_under_lock() {
        let sql = lock_admin_sql();
        assert!(sql.starts_with("SELECT id, user_id, name"));
        assert!(sql.ends_with("WHERE id = $1 FOR UPDATE"));
    }

    #[test]
    fn role_filter_compares_enum_text() {
        let params = ListParams::from_pairs(vec![("user.role".to_string(), "ADMIN".to_string())]);
        let q = ListQuery::new(&ADMINS, &params).filter().unwrap();
        assert!(q.count_sql().sql().contains("u.role::text = $1"));
    }
}
