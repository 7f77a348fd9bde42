// src/routes/appointment_routes.rs

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, patch, post},
};
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::{
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::*,
    query::{Field, FieldKind, Include, ListParams, ListQuery, ResourceSpec},
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_appointments))
        .route("/book-appointment", post(book_appointment))
        .route("/book-appointment-with-pay-later", post(book_appointment_with_pay_later))
        .route("/initiate-payment/{id}", post(initiate_payment))
        .route("/my-appointments", get(my_appointments))
        .route("/my-appointments/{id}", get(my_appointment))
        .route("/change-appointment-status/{id}", patch(change_appointment_status))
}

/* ============================================================
   Listing
   ============================================================ */

static APPOINTMENTS: ResourceSpec = ResourceSpec {
    from: "appointments a \
           JOIN doctors d ON d.id = a.doctor_id \
           JOIN patients p ON p.id = a.patient_id \
           JOIN schedules sc ON sc.id = a.schedule_id",
    primary_key: "a.id",
    default_sort: "createdAt",
    fields: &[
        Field::col("id", "a.id", FieldKind::Uuid),
        Field::col("patientId", "a.patient_id", FieldKind::Uuid),
        Field::col("doctorId", "a.doctor_id", FieldKind::Uuid),
        Field::col("scheduleId", "a.schedule_id", FieldKind::Uuid),
        Field::col("videoCallingId", "a.video_calling_id", FieldKind::Text),
        Field::col("status", "a.status", FieldKind::Enum),
        Field::col("paymentStatus", "a.payment_status", FieldKind::Enum),
        Field::col("createdAt", "a.created_at", FieldKind::Timestamp),
        Field::col("updatedAt", "a.updated_at", FieldKind::Timestamp),
        Field::col("doctor.name", "d.name", FieldKind::Text),
        Field::col("doctor.email", "d.email", FieldKind::Text),
        Field::col("patient.name", "p.name", FieldKind::Text),
        Field::col("patient.email", "p.email", FieldKind::Text),
        Field::col("schedule.startDateTime", "sc.start_date_time", FieldKind::Timestamp),
    ],
    projection: &[
        "id",
        "patientId",
        "doctorId",
        "scheduleId",
        "videoCallingId",
        "status",
        "paymentStatus",
        "createdAt",
        "updatedAt",
    ],
    searchable: &["doctor.name", "doctor.email", "patient.name", "patient.email"],
    filterable: &[
        "status",
        "paymentStatus",
        "doctorId",
        "patientId",
        "scheduleId",
        "createdAt",
        "schedule.startDateTime",
        "doctor.email",
        "patient.email",
    ],
    includes: &[
        Include {
            name: "doctor",
            expr: "SELECT jsonb_build_object('id', d.id, 'name', d.name, 'email', d.email, \
                   'profilePhoto', d.profile_photo, 'designation', d.designation, \
                   'appointmentFee', d.appointment_fee, 'averageRating', d.average_rating)",
        },
        Include {
            name: "patient",
            expr: "SELECT jsonb_build_object('id', p.id, 'name', p.name, 'email', p.email, \
                   'contactNumber', p.contact_number, 'profilePhoto', p.profile_photo)",
        },
        Include {
            name: "schedule",
            expr: "SELECT jsonb_build_object('id', sc.id, 'startDateTime', sc.start_date_time, \
                   'endDateTime', sc.end_date_time)",
        },
        Include {
            name: "payment",
            expr: "SELECT jsonb_build_object('id', pm.id, 'amount', pm.amount, \
                   'transactionId', pm.transaction_id, 'status', pm.status) \
                   FROM payments pm WHERE pm.appointment_id = a.id",
        },
        Include {
            name: "review",
            expr: "SELECT jsonb_build_object('id', r.id, 'rating', r.rating, 'comment', r.comment) \
                   FROM reviews r WHERE r.appointment_id = a.id",
        },
    ],
    default_includes: &[],
};

/* ============================================================
   Booking
   ============================================================ */

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookAppointmentRequest {
    pub doctor_id: Uuid,
    pub schedule_id: Uuid,
}

/// What a client needs to pay an appointment with the external processor.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentIntent {
    pub appointment_id: Uuid,
    pub payment_id: Uuid,
    pub transaction_id: String,
    pub amount: i32,
}

impl From<&PaymentRow> for PaymentIntent {
    fn from(p: &PaymentRow) -> Self {
        PaymentIntent {
            appointment_id: p.appointment_id,
            payment_id: p.id,
            transaction_id: p.transaction_id.clone(),
            amount: p.amount,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingData {
    pub appointment: AppointmentRow,
    pub payment: PaymentRow,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_intent: Option<PaymentIntent>,
}

async fn book(
    state: &AppState,
    auth: &AuthContext,
    req: BookAppointmentRequest,
) -> Result<(AppointmentRow, PaymentRow), ApiError> {
    auth.require(&[Role::Patient])?;
    let patient_id = auth.patient_id(state).await?;

    let fee: i32 = sqlx::query_scalar(
        r#"SELECT appointment_fee FROM doctors WHERE id = $1 AND is_deleted = FALSE"#,
    )
    .bind(req.doctor_id)
    .fetch_optional(&state.db)
    .await
    .map_err(ApiError::db)?
    .ok_or_else(|| ApiError::not_found("Doctor"))?;

    let mut tx = state.db.begin().await.map_err(ApiError::db)?;

    // Row lock serialises concurrent bookings of the same slot.
    let is_booked: bool = sqlx::query_scalar(
        r#"
        SELECT is_booked
        FROM doctor_schedules
        WHERE doctor_id = $1 AND schedule_id = $2
        FOR UPDATE
        "#,
    )
    .bind(req.doctor_id)
    .bind(req.schedule_id)
    .fetch_optional(&mut *tx)
    .await
    .map_err(ApiError::db)?
    .ok_or_else(|| ApiError::not_found("Doctor schedule"))?;

    if is_booked {
        return Err(ApiError::Conflict(
            "SLOT_ALREADY_BOOKED",
            "This schedule is already booked".into(),
        ));
    }

    let appointment: AppointmentRow = sqlx::query_as::<_, AppointmentRow>(&format!(
        r#"
        INSERT INTO appointments (patient_id, doctor_id, schedule_id, video_calling_id)
        VALUES ($1, $2, $3, $4)
        RETURNING {APPOINTMENT_COLUMNS}
        "#
    ))
    .bind(patient_id)
    .bind(req.doctor_id)
    .bind(req.schedule_id)
    .bind(Uuid::new_v4().to_string())
    .fetch_one(&mut *tx)
    .await
    .map_err(ApiError::db)?;

    sqlx::query(
        r#"
        UPDATE doctor_schedules
        SET is_booked = TRUE, updated_at = now()
        WHERE doctor_id = $1 AND schedule_id = $2
        "#,
    )
    .bind(req.doctor_id)
    .bind(req.schedule_id)
    .execute(&mut *tx)
    .await
    .map_err(ApiError::db)?;

    let payment: PaymentRow = sqlx::query_as::<_, PaymentRow>(&format!(
        r#"
        INSERT INTO payments (appointment_id, amount, transaction_id)
        VALUES ($1, $2, $3)
        RETURNING {PAYMENT_COLUMNS}
        "#
    ))
    .bind(appointment.id)
    .bind(fee)
    .bind(Uuid::new_v4().to_string())
    .fetch_one(&mut *tx)
    .await
    .map_err(ApiError::db)?;

    tx.commit().await.map_err(ApiError::db)?;

    tracing::info!(
        appointment_id = %appointment.id,
        doctor_id = %req.doctor_id,
        schedule_id = %req.schedule_id,
        amount = fee,
        "appointment booked"
    );

    Ok((appointment, payment))
}

/* POST /appointments/book-appointment */
pub async fn book_appointment(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<BookAppointmentRequest>,
) -> Result<(StatusCode, Json<ApiOk<BookingData>>), ApiError> {
    let (appointment, payment) = book(&state, &auth, req).await?;
    let payment_intent = Some(PaymentIntent::from(&payment));

    Ok((
        StatusCode::CREATED,
        Json(ApiOk::new(
            "Appointment booked successfully",
            BookingData { appointment, payment, payment_intent },
        )),
    ))
}

/* POST /appointments/book-appointment-with-pay-later */
pub async fn book_appointment_with_pay_later(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<BookAppointmentRequest>,
) -> Result<(StatusCode, Json<ApiOk<BookingData>>), ApiError> {
    let (appointment, payment) = book(&state, &auth, req).await?;

    Ok((
        StatusCode::CREATED,
        Json(ApiOk::new(
            "Appointment booked successfully",
            BookingData { appointment, payment, payment_intent: None },
        )),
    ))
}

/* ============================================================
   POST /appointments/initiate-payment/{id}
   ============================================================ */

pub async fn initiate_payment(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiOk<PaymentIntent>>, ApiError> {
    auth.require(&[Role::Patient])?;
    let patient_id = auth.patient_id(&state).await?;

    let appointment: AppointmentRow = sqlx::query_as::<_, AppointmentRow>(&format!(
        "SELECT {APPOINTMENT_COLUMNS} FROM appointments WHERE id = $1 AND patient_id = $2"
    ))
    .bind(id)
    .bind(patient_id)
    .fetch_optional(&state.db)
    .await
    .map_err(ApiError::db)?
    .ok_or_else(|| ApiError::not_found("Appointment"))?;

    if appointment.payment_status != PaymentStatus::Unpaid {
        return Err(ApiError::BadRequest(
            "ALREADY_PAID",
            "Appointment is already paid".into(),
        ));
    }
    if appointment.status != AppointmentStatus::Scheduled {
        return Err(ApiError::BadRequest(
            "NOT_PAYABLE",
            "Only scheduled appointments can be paid".into(),
        ));
    }

    let payment: PaymentRow = sqlx::query_as::<_, PaymentRow>(&format!(
        "SELECT {PAYMENT_COLUMNS} FROM payments WHERE appointment_id = $1"
    ))
    .bind(id)
    .fetch_optional(&state.db)
    .await
    .map_err(ApiError::db)?
    .ok_or_else(|| ApiError::not_found("Payment"))?;

    Ok(Json(ApiOk::new(
        "Payment initiated successfully",
        PaymentIntent::from(&payment),
    )))
}

/* ============================================================
   GET /appointments/my-appointments[/{id}]
   ============================================================ */

const PATIENT_VIEW: &[&str] = &["doctor", "schedule", "payment", "review"];
const DOCTOR_VIEW: &[&str] = &["patient", "schedule", "payment", "review"];

/// Owner column and embedded relations for the caller's own appointments.
async fn my_scope(
    state: &AppState,
    auth: &AuthContext,
) -> Result<(&'static str, Uuid, &'static [&'static str]), ApiError> {
    match auth.role {
        Role::Patient => Ok(("a.patient_id", auth.patient_id(state).await?, PATIENT_VIEW)),
        Role::Doctor => Ok(("a.doctor_id", auth.doctor_id(state).await?, DOCTOR_VIEW)),
        _ => Err(ApiError::forbidden(
            "Only patients and doctors have their own appointments",
        )),
    }
}

pub async fn my_appointments(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(pairs): Query<Vec<(String, String)>>,
) -> Result<Json<ApiOk<Vec<serde_json::Value>>>, ApiError> {
    let (owner_column, owner_id, relations) = my_scope(&state, &auth).await?;
    let params = ListParams::from_pairs(pairs);

    let page = ListQuery::new(&APPOINTMENTS, &params)
        .search()
        .filter()?
        .where_eq(owner_column, owner_id)
        .include(relations)
        .paginate()
        .sort()?
        .fields()?
        .execute(&state.db)
        .await?;

    Ok(Json(ApiOk::paged("Appointments fetched successfully", page)))
}

pub async fn my_appointment(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiOk<serde_json::Value>>, ApiError> {
    let (owner_column, owner_id, relations) = my_scope(&state, &auth).await?;
    let params = ListParams::default();

    let appointment = ListQuery::new(&APPOINTMENTS, &params)
        .where_eq("a.id", id)
        .where_eq(owner_column, owner_id)
        .include(relations)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| ApiError::not_found("Appointment"))?;

    Ok(Json(ApiOk::new("Appointment fetched successfully", appointment)))
}

/* ============================================================
   GET /appointments  (ADMIN+)
   ============================================================ */

pub async fn list_appointments(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(pairs): Query<Vec<(String, String)>>,
) -> Result<Json<ApiOk<Vec<serde_json::Value>>>, ApiError> {
    auth.require_admin()?;
    let params = ListParams::from_pairs(pairs);

    let page = ListQuery::new(&APPOINTMENTS, &params)
        .search()
        .filter()?
        .include(&["doctor", "patient", "schedule"])
        .dynamic_include()
        .paginate()
        .sort()?
        .fields()?
        .execute(&state.db)
        .await?;

    Ok(Json(ApiOk::paged("Appointments fetched successfully", page)))
}

/* ============================================================
   PATCH /appointments/change-appointment-status/{id}
   ============================================================ */

/// Check whether `role` may move an appointment from `current` to `next`.
/// Ownership is verified by the caller.
pub fn check_transition(
    role: Role,
    current: AppointmentStatus,
    next: AppointmentStatus,
) -> Result<(), ApiError> {
    use AppointmentStatus::*;

    if current.is_terminal() {
        return Err(ApiError::BadRequest(
            "APPOINTMENT_FINALIZED",
            "Completed or canceled appointments cannot change status".into(),
        ));
    }
    if current == next {
        return Err(ApiError::validation("Appointment already has this status"));
    }

    let allowed = match role {
        Role::SuperAdmin | Role::Admin => true,
        Role::Doctor => matches!(
            (current, next),
            (Scheduled, InProgress) | (InProgress, Completed) | (Scheduled, Canceled)
        ),
        Role::Patient => matches!((current, next), (Scheduled, Canceled)),
    };

    if allowed {
        Ok(())
    } else {
        Err(ApiError::BadRequest(
            "INVALID_STATUS_TRANSITION",
            "This status change is not allowed".into(),
        ))
    }
}

#[derive(Debug, Deserialize)]
pub struct ChangeStatusRequest {
    pub status: AppointmentStatus,
}

pub async fn change_appointment_status(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
    Json(req): Json<ChangeStatusRequest>,
) -> Result<Json<ApiOk<AppointmentRow>>, ApiError> {
    let owner = match auth.role {
        Role::Doctor => Some(auth.doctor_id(&state).await?),
        Role::Patient => Some(auth.patient_id(&state).await?),
        Role::SuperAdmin | Role::Admin => None,
    };

    let mut tx = state.db.begin().await.map_err(ApiError::db)?;

    let appointment: AppointmentRow = sqlx::query_as::<_, AppointmentRow>(&format!(
        "SELECT {APPOINTMENT_COLUMNS} FROM appointments WHERE id = $1 FOR UPDATE"
    ))
    .bind(id)
    .fetch_optional(&mut *tx)
    .await
    .map_err(ApiError::db)?
    .ok_or_else(|| ApiError::not_found("Appointment"))?;

    let owns = match (auth.role, owner) {
        (Role::Doctor, Some(doctor_id)) => appointment.doctor_id == doctor_id,
        (Role::Patient, Some(patient_id)) => appointment.patient_id == patient_id,
        _ => true,
    };
    if !owns {
        return Err(ApiError::forbidden("This is not your appointment"));
    }

    check_transition(auth.role, appointment.status, req.status)?;

    let updated: AppointmentRow = sqlx::query_as::<_, AppointmentRow>(&format!(
        r#"
        UPDATE appointments
        SET status = $1, updated_at = now()
        WHERE id = $2
        RETURNING {APPOINTMENT_COLUMNS}
        "#
    ))
    .bind(req.status)
    .bind(id)
    .fetch_one(&mut *tx)
    .await
    .map_err(ApiError::db)?;

    if req.status == AppointmentStatus::Canceled {
        sqlx::query(
            r#"
            UPDATE doctor_schedules
            SET is_booked = FALSE, updated_at = now()
            WHERE doctor_id = $1 AND schedule_id = $2
            "#,
        )
        .bind(updated.doctor_id)
        .bind(updated.schedule_id)
        .execute(&mut *tx)
        .await
        .map_err(ApiError::db)?;
    }

    tx.commit().await.map_err(ApiError::db)?;

    tracing::info!(
        appointment_id = %id,
        from = ?appointment.status,
        to = ?updated.status,
        by = ?auth.role,
        "appointment status changed"
    );

    Ok(Json(ApiOk::new("Appointment status updated successfully", updated)))
}

/* ============================================================
   Unpaid appointment sweep
   ============================================================ */

#[derive(Debug, sqlx::FromRow)]
struct CanceledSlot {
    id: Uuid,
    doctor_id: Uuid,
    schedule_id: Uuid,
}

/// Cancel appointments left unpaid for longer than `older_than`, delete their
/// payments and release their slots, all in one transaction.
pub async fn cancel_unpaid_appointments(db: &PgPool, older_than: Duration) -> Result<u64, ApiError> {
    let cutoff = Utc::now() - older_than;

    let mut tx = db.begin().await.map_err(ApiError::db)?;

    let canceled: Vec<CanceledSlot> = sqlx::query_as::<_, CanceledSlot>(
        r#"
        UPDATE appointments
        SET status = 'CANCELED', updated_at = now()
        WHERE payment_status = 'UNPAID'
          AND status NOT IN ('CANCELED', 'COMPLETED')
          AND created_at < $1
        RETURNING id, doctor_id, schedule_id
        "#,
    )
    .bind(cutoff)
    .fetch_all(&mut *tx)
    .await
    .map_err(ApiError::db)?;

    if canceled.is_empty() {
        tx.rollback().await.map_err(ApiError::db)?;
        return Ok(0);
    }

    let ids: Vec<Uuid> = canceled.iter().map(|c| c.id).collect();
    let doctor_ids: Vec<Uuid> = canceled.iter().map(|c| c.doctor_id).collect();
    let schedule_ids: Vec<Uuid> = canceled.iter().map(|c| c.schedule_id).collect();

    sqlx::query(r#"DELETE FROM payments WHERE appointment_id = ANY($1) AND status = 'UNPAID'"#)
        .bind(&ids)
        .execute(&mut *tx)
        .await
        .map_err(ApiError::db)?;

    sqlx::query(
        r#"
        UPDATE doctor_schedules ds
        SET is_booked = FALSE, updated_at = now()
        FROM UNNEST($1::uuid[], $2::uuid[]) AS released(doctor_id, schedule_id)
        WHERE ds.doctor_id = released.doctor_id
          AND ds.schedule_id = released.schedule_id
        "#,
    )
    .bind(&doctor_ids)
    .bind(&schedule_ids)
    .execute(&mut *tx)
    .await
    .map_err(ApiError::db)?;

    tx.commit().await.map_err(ApiError::db)?;

    let count = ids.len() as u64;
    tracing::info!(count, %cutoff, "unpaid appointments canceled");
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use AppointmentStatus::*;

    #[test]
    fn terminal_statuses_never_change() {
        for role in [Role::SuperAdmin, Role::Admin, Role::Doctor, Role::Patient] {
            for current in [Completed, Canceled] {
                assert!(check_transition(role, current, Scheduled).is_err());
                assert!(check_transition(role, current, InProgress).is_err());
            }
        }
    }

    #[test]
    fn doctor_follows_the_visit_lifecycle() {
        assert!(check_transition(Role::Doctor, Scheduled, InProgress).is_ok());
        assert!(check_transition(Role::Doctor, InProgress, Completed).is_ok());
        assert!(check_transition(Role::Doctor, Scheduled, Canceled).is_ok());
        assert!(check_transition(Role::Doctor, Scheduled, Completed).is_err());
        assert!(check_transition(Role::Doctor, InProgress, Canceled).is_err());
        assert!(check_transition(Role::Doctor, InProgress, Scheduled).is_err());
    }

    #[test]
    fn patient_may_only_cancel_scheduled() {
        assert!(check_transition(Role::Patient, Scheduled, Canceled).is_ok());
        assert!(check_transition(Role::Patient, InProgress, Canceled).is_err());
        assert!(check_transition(Role::Patient, Scheduled, InProgress).is_err());
    }

    #[test]
    fn admins_may_set_any_status_on_open_appointments() {
        assert!(check_transition(Role::Admin, InProgress, Scheduled).is_ok());
        assert!(check_transition(Role::SuperAdmin, Scheduled, Completed).is_ok());
        assert!(check_transition(Role::Admin, Scheduled, Scheduled).is_err());
    }

    #[test]
    fn payment_intent_mirrors_payment_row() {
        let payment = PaymentRow {
            id: Uuid::new_v4(),
            appointment_id: Uuid::new_v4(),
            amount: 750,
            transaction_id: "txn-1".into(),
            status: PaymentStatus::Unpaid,
            payment_gateway_data: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let intent = PaymentIntent::from(&payment);
        let v = serde_json::to_value(&intent).unwrap();
        assert_eq!(v["amount"], 750);
        assert_eq!(v["transactionId"], "txn-1");
        assert_eq!(v["paymentId"], serde_json::json!(payment.id));
    }

    #[test]
    fn my_appointments_are_owner_scoped() {
        let patient_id = Uuid::new_v4();
        let params = ListParams::from_pairs(vec![("status".to_string(), "SCHEDULED".to_string())]);
        let q = ListQuery::new(&APPOINTMENTS, &params)
            .filter()
            .unwrap()
            .where_eq("a.patient_id", patient_id)
            .include(&["doctor", "schedule"]);
        let sql = q.data_sql().sql().to_string();
        assert!(sql.contains("a.status::text = $1 AND a.patient_id = $2"));
        assert!(sql.contains("'doctor', (SELECT jsonb_build_object('id', d.id"));
        assert!(!sql.contains("'patient', ("));
    }
}
