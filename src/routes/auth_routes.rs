// src/routes/auth_routes.rs

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    routing::{get, post},
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

use crate::{
    auth::{generate_access_token, hash_access_token, hash_password, verify_password},
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::*,
};

pub const MIN_PASSWORD_LEN: usize = 8;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/register", post(register_patient))
        .route("/login", post(login))
        .route("/me", get(me))
        .route("/refresh", post(refresh))
        .route("/change-password", post(change_password))
        .route("/logout", post(logout))
}

/* ============================================================
   Shared helpers (also used by user creation)
   ============================================================ */

pub fn validate_email(email: &str) -> Result<String, ApiError> {
    let e = email.trim().to_lowercase();
    let valid = match e.split_once('@') {
        Some((local, domain)) => !local.is_empty() && domain.contains('.') && !domain.starts_with('.'),
        None => false,
    };
    if !valid || e.len() > 254 {
        return Err(ApiError::validation("email must be a valid address"));
    }
    Ok(e)
}

pub fn validate_password(password: &str) -> Result<(), ApiError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ApiError::validation(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}

pub async fn ensure_email_free(state: &AppState, email: &str) -> Result<(), ApiError> {
    let exists: Option<Uuid> = sqlx::query_scalar(r#"SELECT id FROM users WHERE email = $1"#)
        .bind(email)
        .fetch_optional(&state.db)
        .await
        .map_err(ApiError::db)?;

    if exists.is_some() {
        return Err(ApiError::Conflict(
            "EMAIL_TAKEN",
            "User with this email already exists".into(),
        ));
    }
    Ok(())
}

/// Insert the login identity. Role profile rows are written by the caller in the same transaction.
pub async fn insert_user(
    tx: &mut Transaction<'_, Postgres>,
    name: &str,
    email: &str,
    password: &str,
    role: Role,
    need_password_change: bool,
) -> Result<Uuid, ApiError> {
    let password_hash = hash_password(password).map_err(ApiError::Internal)?;

    sqlx::query_scalar(
        r#"
        INSERT INTO users (name, email, password_hash, role, need_password_change)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING id
        "#,
    )
    .bind(name)
    .bind(email)
    .bind(password_hash)
    .bind(role)
    .bind(need_password_change)
    .fetch_one(&mut **tx)
    .await
    .map_err(ApiError::db)
}

async fn issue_session(state: &AppState, user_id: Uuid) -> Result<(String, DateTime<Utc>), ApiError> {
    let access_token = generate_access_token();
    let expires_at = Utc::now() + Duration::hours(state.session_ttl_hours);

    let expires_at: DateTime<Utc> = sqlx::query_scalar(
        r#"
        INSERT INTO session_token (user_id, session_token_hash, expires_at)
        VALUES ($1, $2, $3)
        RETURNING expires_at
        "#,
    )
    .bind(user_id)
    .bind(hash_access_token(&access_token))
    .bind(expires_at)
    .fetch_one(&state.db)
    .await
    .map_err(ApiError::db)?;

    Ok((access_token, expires_at))
}

async fn load_user_public(state: &AppState, user_id: Uuid) -> Result<UserPublic, ApiError> {
    sqlx::query_as::<_, UserPublic>(
        r#"
        SELECT id, name, email, role, status, need_password_change, created_at
        FROM users
        WHERE id = $1
        "#,
    )
    .bind(user_id)
    .fetch_optional(&state.db)
    .await
    .map_err(ApiError::db)?
    .ok_or_else(ApiError::session_expired)
}

/* ============================================================
   POST /auth/register
   ============================================================ */

#[derive(Debug, Deserialize)]
pub struct RegisterPatientRequest {
    pub name: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct RegisterData {
    pub user: UserPublic,
    pub patient: PatientRow,
}

pub async fn register_patient(
    State(state): State<AppState>,
    Json(req): Json<RegisterPatientRequest>,
) -> Result<(StatusCode, Json<ApiOk<RegisterData>>), ApiError> {
    let name = required_text("name", &req.name, 1, 100)?;
    let email = validate_email(&req.email)?;
    validate_password(&req.password)?;
    ensure_email_free(&state, &email).await?;

    let mut tx = state.db.begin().await.map_err(ApiError::db)?;

    let user_id = insert_user(&mut tx, &name, &email, &req.password, Role::Patient, false).await?;

    let patient: PatientRow = sqlx::query_as::<_, PatientRow>(&format!(
        r#"
        INSERT INTO patients (user_id, name, email)
        VALUES ($1, $2, $3)
        RETURNING {PATIENT_COLUMNS}
        "#
    ))
    .bind(user_id)
    .bind(&name)
    .bind(&email)
    .fetch_one(&mut *tx)
    .await
    .map_err(ApiError::db)?;

    tx.commit().await.map_err(ApiError::db)?;

    tracing::info!(%user_id, "patient registered");

    let user = load_user_public(&state, user_id).await?;
    Ok((
        StatusCode::CREATED,
        Json(ApiOk::new("Patient registered successfully", RegisterData { user, patient })),
    ))
}

/* ============================================================
   POST /auth/login
   ============================================================ */

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginData {
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
    pub user: UserPublic,
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<ApiOk<LoginData>>, ApiError> {
    let email = req.email.trim().to_lowercase();
    if email.is_empty() || req.password.is_empty() {
        return Err(ApiError::validation("email and password are required"));
    }

    let user: UserRow = sqlx::query_as::<_, UserRow>(
        r#"
        SELECT id, password_hash, role, status, is_deleted
        FROM users
        WHERE email = $1
        "#,
    )
    .bind(&email)
    .fetch_optional(&state.db)
    .await
    .map_err(ApiError::db)?
    .ok_or_else(ApiError::invalid_credentials)?;

    if !verify_password(&req.password, &user.password_hash) {
        return Err(ApiError::invalid_credentials());
    }

    if user.status == UserStatus::Blocked {
        return Err(ApiError::Unauthorized("USER_BLOCKED", "User is blocked".into()));
    }
    if user.is_deleted || user.status == UserStatus::Deleted {
        return Err(ApiError::NotFound("USER_DELETED", "User is deleted".into()));
    }

    let (access_token, expires_at) = issue_session(&state, user.id).await?;
    tracing::info!(user_id = %user.id, role = ?user.role, "login");

    let user = load_user_public(&state, user.id).await?;
    Ok(Json(ApiOk::new(
        "User logged in successfully",
        LoginData {
            access_token,
            expires_at,
            user,
        },
    )))
}

/* ============================================================
   GET /auth/me
   ============================================================ */

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum Profile {
    Admin(AdminRow),
    Doctor(DoctorRow),
    Patient(PatientRow),
}

#[derive(Debug, Serialize)]
pub struct MeData {
    pub user: UserPublic,
    pub profile: Option<Profile>,
}

pub async fn me(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<ApiOk<MeData>>, ApiError> {
    let user = load_user_public(&state, auth.user_id).await?;

    let profile = match auth.role {
        Role::SuperAdmin | Role::Admin => sqlx::query_as::<_, AdminRow>(&format!(
            "SELECT {ADMIN_COLUMNS} FROM admins WHERE user_id = $1"
        ))
        .bind(auth.user_id)
        .fetch_optional(&state.db)
        .await
        .map_err(ApiError::db)?
        .map(Profile::Admin),
        Role::Doctor => sqlx::query_as::<_, DoctorRow>(&format!(
            "SELECT {DOCTOR_COLUMNS} FROM doctors WHERE user_id = $1"
        ))
        .bind(auth.user_id)
        .fetch_optional(&state.db)
        .await
        .map_err(ApiError::db)?
        .map(Profile::Doctor),
        Role::Patient => sqlx::query_as::<_, PatientRow>(&format!(
            "SELECT {PATIENT_COLUMNS} FROM patients WHERE user_id = $1"
        ))
        .bind(auth.user_id)
        .fetch_optional(&state.db)
        .await
        .map_err(ApiError::db)?
        .map(Profile::Patient),
    };

    Ok(Json(ApiOk::new(
        "User profile fetched successfully",
        MeData { user, profile },
    )))
}

/* ============================================================
   POST /auth/refresh  (rotate token of the current session)
   ============================================================ */

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenData {
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
}

pub async fn refresh(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<ApiOk<TokenData>>, ApiError> {
    let access_token = generate_access_token();
    let expires_at = Utc::now() + Duration::hours(state.session_ttl_hours);

    let rows = sqlx::query(
        r#"
        UPDATE session_token
        SET session_token_hash = $1, expires_at = $2, last_seen_at = now()
        WHERE session_token_id = $3
          AND revoked_at IS NULL
        "#,
    )
    .bind(hash_access_token(&access_token))
    .bind(expires_at)
    .bind(auth.session_token_id)
    .execute(&state.db)
    .await
    .map_err(ApiError::db)?;

    if rows.rows_affected() == 0 {
        return Err(ApiError::session_expired());
    }

    Ok(Json(ApiOk::new(
        "New tokens generated successfully",
        TokenData { access_token, expires_at },
    )))
}

/* ============================================================
   POST /auth/change-password
   ============================================================ */

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordData {
    pub revoked_sessions: u64,
}

pub async fn change_password(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<ChangePasswordRequest>,
) -> Result<Json<ApiOk<ChangePasswordData>>, ApiError> {
    validate_password(&req.new_password)?;

    let stored: String = sqlx::query_scalar(r#"SELECT password_hash FROM users WHERE id = $1"#)
        .bind(auth.user_id)
        .fetch_optional(&state.db)
        .await
        .map_err(ApiError::db)?
        .ok_or_else(ApiError::session_expired)?;

    if !verify_password(&req.current_password, &stored) {
        return Err(ApiError::invalid_credentials());
    }

    let new_hash = hash_password(&req.new_password).map_err(ApiError::Internal)?;

    let mut tx = state.db.begin().await.map_err(ApiError::db)?;

    sqlx::query(
        r#"
        UPDATE users
        SET password_hash = $1, need_password_change = FALSE, updated_at = now()
        WHERE id = $2
        "#,
    )
    .bind(new_hash)
    .bind(auth.user_id)
    .execute(&mut *tx)
    .await
    .map_err(ApiError::db)?;

    let revoked = sqlx::query(
        r#"
        UPDATE session_token
        SET revoked_at = now()
        WHERE user_id = $1
          AND revoked_at IS NULL
          AND session_token_id <> $2
        "#,
    )
    .bind(auth.user_id)
    .bind(auth.session_token_id)
    .execute(&mut *tx)
    .await
    .map_err(ApiError::db)?;

    tx.commit().await.map_err(ApiError::db)?;

    Ok(Json(ApiOk::new(
        "Password changed successfully",
        ChangePasswordData {
            revoked_sessions: revoked.rows_affected(),
        },
    )))
}

/* ============================================================
   POST /auth/logout
   ============================================================ */

#[derive(Debug, Serialize)]
pub struct OkData {
    pub ok: bool,
}

pub async fn logout(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<ApiOk<OkData>>, ApiError> {
    let rows = sqlx::query(
        r#"
        UPDATE session_token
        SET revoked_at = now()
        WHERE session_token_id = $1
          AND user_id = $2
          AND revoked_at IS NULL
        "#,
    )
    .bind(auth.session_token_id)
    .bind(auth.user_id)
    .execute(&state.db)
    .await
    .map_err(ApiError::db)?;

    if rows.rows_affected() == 0 {
        return Err(ApiError::session_expired());
    }

    Ok(Json(ApiOk::new("User logged out successfully", OkData { ok: true })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_validation_normalises_case() {
        assert_eq!(validate_email("  Jane@Example.COM ").unwrap(), "jane@example.com");
        assert!(validate_email("no-at-sign").is_err());
        assert!(validate_email("@example.com").is_err());
        assert!(validate_email("a@localhost").is_err());
    }

    #[test]
    fn password_length_is_enforced() {
        assert!(validate_password("short").is_err());
        assert!(validate_password("long-enough").is_ok());
    }
}
