use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum_extra::TypedHeader;
use headers::{Authorization, authorization::Bearer};
use uuid::Uuid;

use crate::auth::hash_access_token;
use crate::error::ApiError;
use crate::models::{AppState, Role, UserStatus};

#[derive(Debug, Clone)]
pub struct AuthContext {
    pub user_id: Uuid,
    pub role: Role,
    pub session_token_id: Uuid,
}

impl AuthContext {
    /// Reject the request unless the caller holds one of `roles`.
    pub fn require(&self, roles: &[Role]) -> Result<(), ApiError> {
        if roles.contains(&self.role) {
            Ok(())
        } else {
            Err(ApiError::forbidden(
                "Forbidden access! You do not have permission to access this resource.",
            ))
        }
    }

    pub fn require_admin(&self) -> Result<(), ApiError> {
        self.require(&[Role::SuperAdmin, Role::Admin])
    }

    /// Doctor profile id of the caller.
    pub async fn doctor_id(&self, state: &AppState) -> Result<Uuid, ApiError> {
        sqlx::query_scalar(r#"SELECT id FROM doctors WHERE user_id = $1 AND is_deleted = FALSE"#)
            .bind(self.user_id)
            .fetch_optional(&state.db)
            .await
            .map_err(ApiError::db)?
            .ok_or_else(|| {
                ApiError::NotFound("NO_DOCTOR_PROFILE", "Doctor account has no doctor profile".into())
            })
    }

    /// Patient profile id of the caller.
    pub async fn patient_id(&self, state: &AppState) -> Result<Uuid, ApiError> {
        sqlx::query_scalar(r#"SELECT id FROM patients WHERE user_id = $1 AND is_deleted = FALSE"#)
            .bind(self.user_id)
            .fetch_optional(&state.db)
            .await
            .map_err(ApiError::db)?
            .ok_or_else(|| {
                ApiError::NotFound("NO_PATIENT_PROFILE", "Patient account has no patient profile".into())
            })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct SessionLookupRow {
    session_token_id: Uuid,
    user_id: Uuid,
    role: Role,
    status: UserStatus,
    is_deleted: bool,
}

impl FromRequestParts<AppState> for AuthContext {
    type Rejection = ApiError;

    fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> impl std::future::Future<Output = Result<Self, Self::Rejection>> + Send {
        async move {
            // Extract Authorization: Bearer <token>
            let TypedHeader(authz): TypedHeader<Authorization<Bearer>> =
                TypedHeader::from_request_parts(parts, state)
                    .await
                    .map_err(|_| {
                        ApiError::Unauthorized(
                            "UNAUTHORIZED",
                            "Unauthorized access! No session token provided.".into(),
                        )
                    })?;

            let token_hash = hash_access_token(authz.token());

            let row: SessionLookupRow = sqlx::query_as::<_, SessionLookupRow>(
                r#"
                SELECT st.session_token_id, u.id AS user_id, u.role, u.status, u.is_deleted
                FROM session_token st
                JOIN users u ON u.id = st.user_id
                WHERE st.session_token_hash = $1
                  AND st.revoked_at IS NULL
                  AND st.expires_at > now()
                "#,
            )
            .bind(&token_hash)
            .fetch_optional(&state.db)
            .await
            .map_err(ApiError::db)?
            .ok_or_else(ApiError::session_expired)?;

            if row.status != UserStatus::Active || row.is_deleted {
                return Err(ApiError::Unauthorized(
                    "USER_INACTIVE",
                    "Unauthorized access! User is not active.".into(),
                ));
            }

            // Touch last_seen_at (best-effort)
            let _ = sqlx::query(
                r#"
                UPDATE session_token
                SET last_seen_at = now()
                WHERE session_token_id = $1
                "#,
            )
            .bind(row.session_token_id)
            .execute(&state.db)
            .await;

            Ok(AuthContext {
                user_id: row.user_id,
                role: row.role,
                session_token_id: row.session_token_id,
            })
        }
    }
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
    fn require_checks_role_membership() {
        assert!(ctx(Role::Doctor).require(&[Role::Doctor, Role::Patient]).is_ok());
        assert!(ctx(Role::Patient).require(&[Role::Doctor]).is_err());
        assert!(ctx(Role::SuperAdmin).require_admin().is_ok());
        assert!(ctx(Role::Admin).require_admin().is_ok());
        assert!(ctx(Role::Doctor).require_admin().is_err());
    }
}
