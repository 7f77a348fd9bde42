// src/routes/review_routes.rs

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, patch},
};
use serde::Deserialize;
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

use crate::{
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::*,
    query::{Field, FieldKind, Include, ListParams, ListQuery, ResourceSpec},
};

pub const MIN_RATING: i32 = 1;
pub const MAX_RATING: i32 = 5;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_reviews).post(give_review))
        .route("/my-reviews", get(my_reviews))
        .route("/{id}", patch(update_review).delete(delete_review))
}

static REVIEWS: ResourceSpec = ResourceSpec {
    from: "reviews r \
           JOIN doctors d ON d.id = r.doctor_id \
           JOIN patients p ON p.id = r.patient_id",
    primary_key: "r.id",
    default_sort: "createdAt",
    fields: &[
        Field::col("id", "r.id", FieldKind::Uuid),
        Field::col("patientId", "r.patient_id", FieldKind::Uuid),
        Field::col("doctorId", "r.doctor_id", FieldKind::Uuid),
        Field::col("appointmentId", "r.appointment_id", FieldKind::Uuid),
        Field::col("rating", "r.rating", FieldKind::Number),
        Field::col("comment", "r.comment", FieldKind::Text),
        Field::col("createdAt", "r.created_at", FieldKind::Timestamp),
        Field::col("updatedAt", "r.updated_at", FieldKind::Timestamp),
        Field::col("doctor.name", "d.name", FieldKind::Text),
        Field::col("patient.name", "p.name", FieldKind::Text),
    ],
    projection: &[
        "id",
        "patientId",
        "doctorId",
        "appointmentId",
        "rating",
        "comment",
        "createdAt",
        "updatedAt",
    ],
    searchable: &["comment", "doctor.name", "patient.name"],
    filterable: &["doctorId", "patientId", "rating", "createdAt"],
    includes: &[
        Include {
            name: "doctor",
            expr: "SELECT jsonb_build_object('id', d.id, 'name', d.name, \
                   'designation', d.designation, 'averageRating', d.average_rating)",
        },
        Include {
            name: "patient",
            expr: "SELECT jsonb_build_object('id', p.id, 'name', p.name, \
                   'profilePhoto', p.profile_photo)",
        },
        Include {
            name: "appointment",
            expr: "SELECT jsonb_build_object('id', a.id, 'status', a.status, \
                   'scheduleId', a.schedule_id) FROM appointments a WHERE a.id = r.appointment_id",
        },
    ],
    default_includes: &["doctor"],
};

pub fn validate_rating(rating: i32) -> Result<i32, ApiError> {
    if !(MIN_RATING..=MAX_RATING).contains(&rating) {
        return Err(ApiError::validation(format!(
            "rating must be between {MIN_RATING} and {MAX_RATING}"
        )));
    }
    Ok(rating)
}

/// Recompute a doctor's average rating from all of their reviews (0 when none).
async fn refresh_average_rating(
    tx: &mut Transaction<'_, Postgres>,
    doctor_id: Uuid,
) -> Result<f64, ApiError> {
    let average: f64 = sqlx::query_scalar(
        r#"
        UPDATE doctors
        SET average_rating = COALESCE(
                (SELECT AVG(rating)::float8 FROM reviews WHERE doctor_id = $1), 0),
            updated_at = now()
        WHERE id = $1
        RETURNING average_rating
        "#,
    )
    .bind(doctor_id)
    .fetch_one(&mut **tx)
    .await
    .map_err(ApiError::db)?;

    tracing::info!(%doctor_id, average, "doctor rating recomputed");
    Ok(average)
}

/* ============================================================
   POST /reviews  (PATIENT)
   ============================================================ */

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GiveReviewRequest {
    pub appointment_id: Uuid,
    pub rating: i32,
    pub comment: Option<String>,
}

#[derive(Debug, sqlx::FromRow)]
struct ReviewableAppointment {
    patient_id: Uuid,
    doctor_id: Uuid,
    payment_status: PaymentStatus,
    reviewed: bool,
}

pub async fn give_review(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<GiveReviewRequest>,
) -> Result<(StatusCode, Json<ApiOk<ReviewRow>>), ApiError> {
    auth.require(&[Role::Patient])?;
    let rating = validate_rating(req.rating)?;
    let comment = optional_text("comment", req.comment.as_deref(), 1, 2000)?;
    let patient_id = auth.patient_id(&state).await?;

    let mut tx = state.db.begin().await.map_err(ApiError::db)?;

    let appointment: ReviewableAppointment = sqlx::query_as::<_, ReviewableAppointment>(
        r#"
        SELECT a.patient_id, a.doctor_id, a.payment_status,
               EXISTS (SELECT 1 FROM reviews r WHERE r.appointment_id = a.id) AS reviewed
        FROM appointments a
        WHERE a.id = $1
        FOR UPDATE
        "#,
    )
    .bind(req.appointment_id)
    .fetch_optional(&mut *tx)
    .await
    .map_err(ApiError::db)?
    .ok_or_else(|| ApiError::not_found("Appointment"))?;

    if appointment.patient_id != patient_id {
        return Err(ApiError::forbidden("You can only review your own appointments"));
    }
    if appointment.payment_status != PaymentStatus::Paid {
        return Err(ApiError::BadRequest(
            "APPOINTMENT_UNPAID",
            "You can only review appointments that have been paid for".into(),
        ));
    }
    if appointment.reviewed {
        return Err(ApiError::BadRequest(
            "ALREADY_REVIEWED",
            "You have already reviewed this appointment".into(),
        ));
    }

    let review: ReviewRow = sqlx::query_as::<_, ReviewRow>(&format!(
        r#"
        INSERT INTO reviews (patient_id, doctor_id, appointment_id, rating, comment)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING {REVIEW_COLUMNS}
        "#
    ))
    .bind(patient_id)
    .bind(appointment.doctor_id)
    .bind(req.appointment_id)
    .bind(rating)
    .bind(comment)
    .fetch_one(&mut *tx)
    .await
    .map_err(ApiError::db)?;

    refresh_average_rating(&mut tx, review.doctor_id).await?;

    tx.commit().await.map_err(ApiError::db)?;

    Ok((
        StatusCode::CREATED,
        Json(ApiOk::new("Review created successfully", review)),
    ))
}

/* ============================================================
   GET /reviews  (public)
   ============================================================ */

pub async fn list_reviews(
    State(state): State<AppState>,
    Query(pairs): Query<Vec<(String, String)>>,
) -> Result<Json<ApiOk<Vec<serde_json::Value>>>, ApiError> {
    let params = ListParams::from_pairs(pairs);

    let page = ListQuery::new(&REVIEWS, &params)
        .search()
        .filter()?
        .dynamic_include()
        .paginate()
        .sort()?
        .fields()?
        .execute(&state.db)
        .await?;

    Ok(Json(ApiOk::paged("Reviews fetched successfully", page)))
}

/* ============================================================
   GET /reviews/my-reviews  (PATIENT, DOCTOR)
   ============================================================ */

pub async fn my_reviews(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(pairs): Query<Vec<(String, String)>>,
) -> Result<Json<ApiOk<Vec<serde_json::Value>>>, ApiError> {
    auth.require(&[Role::Patient, Role::Doctor])?;
    let (owner_column, owner_id, counterpart) = match auth.role {
        Role::Patient => ("r.patient_id", auth.patient_id(&state).await?, "doctor"),
        _ => ("r.doctor_id", auth.doctor_id(&state).await?, "patient"),
    };
    let params = ListParams::from_pairs(pairs);

    let page = ListQuery::new(&REVIEWS, &params)
        .search()
        .filter()?
        .where_eq(owner_column, owner_id)
        .include(&[counterpart, "appointment"])
        .paginate()
        .sort()?
        .fields()?
        .execute(&state.db)
        .await?;

    Ok(Json(ApiOk::paged("Reviews fetched successfully", page)))
}

/* ============================================================
   PATCH /reviews/{id}  and  DELETE /reviews/{id}  (owner only)
   ============================================================ */

async fn lock_own_review(
    tx: &mut Transaction<'_, Postgres>,
    id: Uuid,
    patient_id: Uuid,
) -> Result<ReviewRow, ApiError> {
    let review: ReviewRow = sqlx::query_as::<_, ReviewRow>(&format!(
        "SELECT {REVIEW_COLUMNS} FROM reviews WHERE id = $1 FOR UPDATE"
    ))
    .bind(id)
    .fetch_optional(&mut **tx)
    .await
    .map_err(ApiError::db)?
    .ok_or_else(|| ApiError::not_found("Review"))?;

    if review.patient_id != patient_id {
        return Err(ApiError::forbidden("You can only modify your own reviews"));
    }
    Ok(review)
}

#[derive(Debug, Deserialize)]
pub struct UpdateReviewRequest {
    pub rating: Option<i32>,
    #[serde(default, deserialize_with = "deserialize_double_option")]
    pub comment: Option<Option<String>>,
}

pub async fn update_review(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateReviewRequest>,
) -> Result<Json<ApiOk<ReviewRow>>, ApiError> {
    auth.require(&[Role::Patient])?;
    let patient_id = auth.patient_id(&state).await?;

    let mut tx = state.db.begin().await.map_err(ApiError::db)?;
    let existing = lock_own_review(&mut tx, id, patient_id).await?;

    let rating = match req.rating {
        Some(r) => validate_rating(r)?,
        None => existing.rating,
    };
    let comment = match req.comment {
        None => existing.comment,
        Some(c) => optional_text("comment", c.as_deref(), 1, 2000)?,
    };

    let review: ReviewRow = sqlx::query_as::<_, ReviewRow>(&format!(
        r#"
        UPDATE reviews
        SET rating = $1, comment = $2, updated_at = now()
        WHERE id = $3
        RETURNING {REVIEW_COLUMNS}
        "#
    ))
    .bind(rating)
    .bind(comment)
    .bind(id)
    .fetch_one(&mut *tx)
    .await
    .map_err(ApiError::db)?;

    refresh_average_rating(&mut tx, review.doctor_id).await?;

    tx.commit().await.map_err(ApiError::db)?;

    Ok(Json(ApiOk::new("Review updated successfully", review)))
}

pub async fn delete_review(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiOk<ReviewRow>>, ApiError> {
    auth.require(&[Role::Patient])?;
    let patient_id = auth.patient_id(&state).await?;

    let mut tx = state.db.begin().await.map_err(ApiError::db)?;
    let review = lock_own_review(&mut tx, id, patient_id).await?;

    sqlx::query(r#"DELETE FROM reviews WHERE id = $1"#)
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(ApiError::db)?;

    refresh_average_rating(&mut tx, review.doctor_id).await?;

    tx.commit().await.map_err(ApiError::db)?;

    Ok(Json(ApiOk::new("Review deleted successfully", review)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rating_must_be_one_to_five() {
        assert!(validate_rating(0).is_err());
        assert!(validate_rating(6).is_err());
        assert_eq!(validate_rating(1).unwrap(), 1);
        assert_eq!(validate_rating(5).unwrap(), 5);
    }

    #[test]
    fn rating_filters_are_numeric() {
        let params = ListParams::from_pairs(vec![("rating[gte]".to_string(), "4".to_string())]);
        let q = ListQuery::new(&REVIEWS, &params).filter().unwrap();
        assert!(q.count_sql().sql().contains("r.rating >= $1"));

        let params = ListParams::from_pairs(vec![("rating".to_string(), "great".to_string())]);
        assert!(ListQuery::new(&REVIEWS, &params).filter().is_err());
    }

    #[test]
    fn listing_embeds_doctor_by_default() {
        let params = ListParams::default();
        let q = ListQuery::new(&REVIEWS, &params).dynamic_include();
        assert!(q.data_sql().sql().contains("'doctor', (SELECT jsonb_build_object('id', d.id"));
    }
}
