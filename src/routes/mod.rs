use crate::models::AppState;
use axum::Router;

pub mod admin_routes;
pub mod appointment_routes;
pub mod auth_routes;
pub mod doctor_routes;
pub mod doctor_schedule_routes;
pub mod home_routes;
pub mod patient_routes;
pub mod payment_routes;
pub mod review_routes;
pub mod schedule_routes;
pub mod specialty_routes;
pub mod user_routes;

pub fn router(state: AppState) -> Router {
    Router::new()
        .nest("/api/v1/auth", auth_routes::router())
        .nest("/api/v1/users", user_routes::router())
        .nest("/api/v1/admins", admin_routes::router())
        .nest("/api/v1/doctors", doctor_routes::router())
        .nest("/api/v1/patients", patient_routes::router())
        .nest("/api/v1/specialties", specialty_routes::router())
        .nest("/api/v1/specialty", specialty_routes::router())
        .nest("/api/v1/schedules", schedule_routes::router())
        .nest("/api/v1/doctor-schedules", doctor_schedule_routes::router())
        .nest("/api/v1/appointments", appointment_routes::router())
        .nest("/api/v1/payments", payment_routes::router())
        .nest("/api/v1/reviews", review_routes::router())
        .merge(home_routes::router())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::{Body, to_bytes},
        http::{Request, StatusCode},
    };
    use sqlx::postgres::PgPoolOptions;
    use tower::ServiceExt;

    fn app() -> Router {
        let db = PgPoolOptions::new()
            .connect_lazy("postgres://localhost/carebook_test")
            .unwrap();
        router(AppState {
            db,
            session_ttl_hours: 24,
            payment_webhook_secret: None,
        })
    }

    async fn send(req: Request<Body>) -> (StatusCode, serde_json::Value) {
        let resp = app().oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or_default())
    }

    #[tokio::test]
    async fn health_check_answers_without_database() {
        let (status, body) = send(Request::get("/").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["message"], "API is working");
    }

    #[tokio::test]
    async fn protected_routes_require_a_token() {
        for uri in [
            "/api/v1/auth/me",
            "/api/v1/admins",
            "/api/v1/appointments/my-appointments",
            "/api/v1/reviews/my-reviews",
        ] {
            let (status, body) = send(Request::get(uri).body(Body::empty()).unwrap()).await;
            assert_eq!(status, StatusCode::UNAUTHORIZED, "{uri}");
            assert_eq!(body["success"], false, "{uri}");
        }
    }

    #[tokio::test]
    async fn unknown_routes_are_not_found() {
        let (status, _) = send(Request::get("/api/v1/nope").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
