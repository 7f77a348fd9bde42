// src/routes/payment_routes.rs

use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::HeaderMap,
    routing::post,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    auth::verify_webhook_signature,
    error::ApiError,
    models::*,
};

pub const SIGNATURE_HEADER: &str = "payment-signature";

pub fn router() -> Router<AppState> {
    Router::new().route("/webhook", post(payment_webhook))
}

#[derive(Debug, Deserialize)]
pub struct WebhookEvent {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentSucceeded {
    pub appointment_id: Uuid,
    pub payment_id: Uuid,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookAck {
    pub event_type: String,
    pub handled: bool,
}

/* ============================================================
   POST /payments/webhook
   ============================================================ */

pub async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<ApiOk<WebhookAck>>, ApiError> {
    let Some(secret) = state.payment_webhook_secret.as_deref() else {
        tracing::warn!("payment webhook called but no secret is configured");
        return Err(ApiError::BadRequest(
            "WEBHOOK_NOT_CONFIGURED",
            "Payment webhook secret is not configured".into(),
        ));
    };

    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            ApiError::BadRequest("MISSING_SIGNATURE", "Missing payment signature".into())
        })?;

    verify_webhook_signature(secret, signature, &body, Utc::now().timestamp()).map_err(|e| {
        tracing::warn!(error = %e, "rejected payment webhook");
        ApiError::BadRequest("INVALID_SIGNATURE", e.to_string())
    })?;

    let raw: serde_json::Value = serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest("INVALID_PAYLOAD", e.to_string()))?;
    let event: WebhookEvent = serde_json::from_value(raw.clone())
        .map_err(|e| ApiError::BadRequest("INVALID_PAYLOAD", e.to_string()))?;

    let handled = match event.kind.as_str() {
        "payment.succeeded" => {
            let paid: PaymentSucceeded = serde_json::from_value(event.data.clone())
                .map_err(|e| ApiError::BadRequest("INVALID_PAYLOAD", e.to_string()))?;
            mark_paid(&state, &paid, raw).await?
        }
        "payment.failed" | "payment.expired" => {
            tracing::warn!(event_type = %event.kind, data = %event.data, "payment not completed");
            true
        }
        other => {
            tracing::info!(event_type = %other, "ignoring payment webhook event");
            false
        }
    };

    Ok(Json(ApiOk::new(
        "Webhook event processed successfully",
        WebhookAck {
            event_type: event.kind,
            handled,
        },
    )))
}

/// What a `payment.succeeded` event does to a locked appointment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    Apply,
    AlreadyPaid,
    Canceled,
}

pub fn settlement(status: AppointmentStatus, payment_status: PaymentStatus) -> Settlement {
    if payment_status == PaymentStatus::Paid {
        Settlement::AlreadyPaid
    } else if status == AppointmentStatus::Canceled {
        Settlement::Canceled
    } else {
        Settlement::Apply
    }
}

/// Appointment row first, then its payment: the unpaid sweep takes the same order.
const LOCK_APPOINTMENT_SQL: &str = r#"
    SELECT status, payment_status
    FROM appointments
    WHERE id = $1
    FOR UPDATE
"#;

const LOCK_PAYMENT_SQL: &str = r#"
    SELECT id
    FROM payments
    WHERE id = $1 AND appointment_id = $2
    FOR UPDATE
"#;

/// Mark the payment and its appointment PAID. Already-paid payments are left
/// untouched; payments for canceled appointments are logged and not applied.
async fn mark_paid(
    state: &AppState,
    paid: &PaymentSucceeded,
    event: serde_json::Value,
) -> Result<bool, ApiError> {
    let mut tx = state.db.begin().await.map_err(ApiError::db)?;

    let (status, payment_status): (AppointmentStatus, PaymentStatus) =
        sqlx::query_as(LOCK_APPOINTMENT_SQL)
            .bind(paid.appointment_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(ApiError::db)?
            .ok_or_else(|| ApiError::not_found("Appointment"))?;

    match settlement(status, payment_status) {
        Settlement::AlreadyPaid => {
            tracing::info!(payment_id = %paid.payment_id, "payment already confirmed");
            return Ok(false);
        }
        Settlement::Canceled => {
            tracing::warn!(
                payment_id = %paid.payment_id,
                appointment_id = %paid.appointment_id,
                "payment received for a canceled appointment; needs manual refund"
            );
            return Ok(false);
        }
        Settlement::Apply => {}
    }

    let _: Uuid = sqlx::query_scalar(LOCK_PAYMENT_SQL)
        .bind(paid.payment_id)
        .bind(paid.appointment_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(ApiError::db)?
        .ok_or_else(|| ApiError::not_found("Payment"))?;

    sqlx::query(
        r#"
        UPDATE payments
        SET status = 'PAID', payment_gateway_data = $1, updated_at = now()
        WHERE id = $2
        "#,
    )
    .bind(event)
    .bind(paid.payment_id)
    .execute(&mut *tx)
    .await
    .map_err(ApiError::db)?;

    sqlx::query(
        r#"
        UPDATE appointments
        SET payment_status = 'PAID', updated_at = now()
        WHERE id = $1
        "#,
    )
    .bind(paid.appointment_id)
    .execute(&mut *tx)
    .await
    .map_err(ApiError::db)?;

    tx.commit().await.map_err(ApiError::db)?;

    tracing::info!(
        payment_id = %paid.payment_id,
        appointment_id = %paid.appointment_id,
        "payment confirmed"
    );
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::sign_webhook_payload;
    use axum::{
        body::{Body, to_bytes},
        http::{Request, StatusCode},
    };
    use sqlx::postgres::PgPoolOptions;
    use tower::ServiceExt;

    fn app(secret: Option<&str>) -> axum::Router {
        let db = PgPoolOptions::new()
            .connect_lazy("postgres://localhost/carebook_test")
            .unwrap();
        crate::routes::router(AppState {
            db,
            session_ttl_hours: 24,
            payment_webhook_secret: secret.map(str::to_string),
        })
    }

    fn webhook(body: &'static str, signature: Option<String>) -> Request<Body> {
        let mut req = Request::builder()
            .method("POST")
            .uri("/api/v1/payments/webhook")
            .header("content-type", "application/json");
        if let Some(sig) = signature {
            req = req.header("Payment-Signature", sig);
        }
        req.body(Body::from(body)).unwrap()
    }

    async fn json(resp: axum::response::Response) -> serde_json::Value {
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn signed(secret: &str, body: &str) -> String {
        let t = Utc::now().timestamp();
        format!("t={t},v1={}", sign_webhook_payload(secret, t, body.as_bytes()))
    }

    #[test]
    fn settlement_skips_paid_and_canceled_appointments() {
        use AppointmentStatus::*;
        assert_eq!(settlement(Scheduled, PaymentStatus::Unpaid), Settlement::Apply);
        assert_eq!(settlement(InProgress, PaymentStatus::Unpaid), Settlement::Apply);
        assert_eq!(settlement(Scheduled, PaymentStatus::Paid), Settlement::AlreadyPaid);
        assert_eq!(settlement(Canceled, PaymentStatus::Paid), Settlement::AlreadyPaid);
        assert_eq!(settlement(Canceled, PaymentStatus::Unpaid), Settlement::Canceled);
    }

    #[test]
    fn locks_appointment_before_payment() {
        assert!(LOCK_APPOINTMENT_SQL.contains("FROM appointments"));
        assert!(LOCK_APPOINTMENT_SQL.contains("FOR UPDATE"));
        assert!(LOCK_PAYMENT_SQL.contains("FROM payments"));
        assert!(LOCK_PAYMENT_SQL.contains("FOR UPDATE"));
    }

    #[tokio::test]
    async fn rejects_when_secret_is_not_configured() {
        let resp = app(None)
            .oneshot(webhook(r#"{"type":"payment.failed"}"#, Some("t=1,v1=00".into())))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json(resp).await["error"]["code"], "WEBHOOK_NOT_CONFIGURED");
    }

    #[tokio::test]
    async fn rejects_missing_and_forged_signatures() {
        let resp = app(Some("whsec"))
            .oneshot(webhook(r#"{"type":"payment.failed"}"#, None))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json(resp).await["error"]["code"], "MISSING_SIGNATURE");

        let body = r#"{"type":"payment.failed"}"#;
        let resp = app(Some("whsec"))
            .oneshot(webhook(body, Some(signed("not-the-secret", body))))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json(resp).await["error"]["code"], "INVALID_SIGNATURE");
    }

    #[tokio::test]
    async fn acknowledges_failed_and_unknown_events() {
        let body = r#"{"type":"payment.failed","data":{"appointmentId":"x"}}"#;
        let resp = app(Some("whsec"))
            .oneshot(webhook(body, Some(signed("whsec", body))))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let v = json(resp).await;
        assert_eq!(v["success"], true);
        assert_eq!(v["data"]["eventType"], "payment.failed");
        assert_eq!(v["data"]["handled"], true);

        let body = r#"{"type":"customer.created"}"#;
        let resp = app(Some("whsec"))
            .oneshot(webhook(body, Some(signed("whsec", body))))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(json(resp).await["data"]["handled"], false);
    }

    #[tokio::test]
    async fn malformed_success_payload_is_rejected_before_touching_the_database() {
        let body = r#"{"type":"payment.succeeded","data":{"appointmentId":"nope"}}"#;
        let resp = app(Some("whsec"))
            .oneshot(webhook(body, Some(signed("whsec", body))))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json(resp).await["error"]["code"], "INVALID_PAYLOAD");
    }
}
