// src/routes/doctor_schedule_routes.rs

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{delete, get, patch, post},
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::*,
    query::{Field, FieldKind, Include, ListParams, ListQuery, ResourceSpec},
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_doctor_schedules))
        .route("/create-my-doctor-schedule", post(create_my_doctor_schedule))
        .route("/my-doctor-schedules", get(my_doctor_schedules))
        .route("/update-my-doctor-schedule", patch(update_my_doctor_schedule))
        .route("/delete-my-doctor-schedule/{schedule_id}", delete(delete_my_doctor_schedule))
        .route("/{doctor_id}/{schedule_id}", get(get_doctor_schedule))
}

const SCHEDULE_JSON: &str = "SELECT jsonb_build_object('id', sc.id, \
     'startDateTime', sc.start_date_time, 'endDateTime', sc.end_date_time)";

const DOCTOR_JSON: &str = "SELECT jsonb_build_object('id', d.id, 'name', d.name, \
     'email', d.email, 'designation', d.designation, 'appointmentFee', d.appointment_fee, \
     'user', jsonb_build_object('id', u.id, 'name', u.name, 'email', u.email, 'status', u.status))";

static DOCTOR_SCHEDULES: ResourceSpec = ResourceSpec {
    from: "doctor_schedules dsc \
           JOIN schedules sc ON sc.id = dsc.schedule_id \
           JOIN doctors d ON d.id = dsc.doctor_id \
           JOIN users u ON u.id = d.user_id",
    primary_key: "dsc.doctor_id, dsc.schedule_id",
    default_sort: "createdAt",
    fields: &[
        Field::col("doctorId", "dsc.doctor_id", FieldKind::Uuid),
        Field::col("scheduleId", "dsc.schedule_id", FieldKind::Uuid),
        Field::col("isBooked", "dsc.is_booked", FieldKind::Bool),
        Field::col("createdAt", "dsc.created_at", FieldKind::Timestamp),
        Field::col("updatedAt", "dsc.updated_at", FieldKind::Timestamp),
        Field::col("schedule.startDateTime", "sc.start_date_time", FieldKind::Timestamp),
        Field::col("schedule.endDateTime", "sc.end_date_time", FieldKind::Timestamp),
        Field::col("doctor.name", "d.name", FieldKind::Text),
        Field::col("doctor.email", "d.email", FieldKind::Text),
    ],
    projection: &["doctorId", "scheduleId", "isBooked", "createdAt", "updatedAt"],
    searchable: &["doctor.name", "doctor.email"],
    filterable: &[
        "doctorId",
        "scheduleId",
        "isBooked",
        "schedule.startDateTime",
        "schedule.endDateTime",
        "doctor.email",
    ],
    includes: &[
        Include { name: "schedule", expr: SCHEDULE_JSON },
        Include { name: "doctor", expr: DOCTOR_JSON },
    ],
    default_includes: &[],
};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AffectedData {
    pub created: u64,
    pub deleted: u64,
}

/* ============================================================
   POST /doctor-schedules/create-my-doctor-schedule
   ============================================================ */

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateMyDoctorScheduleRequest {
    pub schedule_ids: Vec<Uuid>,
}

pub async fn create_my_doctor_schedule(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<CreateMyDoctorScheduleRequest>,
) -> Result<(StatusCode, Json<ApiOk<AffectedData>>), ApiError> {
    auth.require(&[Role::Doctor])?;
    if req.schedule_ids.is_empty() {
        return Err(ApiError::validation("scheduleIds must not be empty"));
    }
    let doctor_id = auth.doctor_id(&state).await?;

    let created = sqlx::query(
        r#"
        INSERT INTO doctor_schedules (doctor_id, schedule_id)
        SELECT $1, UNNEST($2::uuid[])
        ON CONFLICT DO NOTHING
        "#,
    )
    .bind(doctor_id)
    .bind(&req.schedule_ids)
    .execute(&state.db)
    .await
    .map_err(ApiError::db)?
    .rows_affected();

    tracing::info!(%doctor_id, created, "doctor slots attached");

    Ok((
        StatusCode::CREATED,
        Json(ApiOk::new(
            "Doctor schedules created successfully",
            AffectedData { created, deleted: 0 },
        )),
    ))
}

/* ============================================================
   GET /doctor-schedules/my-doctor-schedules
   ============================================================ */

pub async fn my_doctor_schedules(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(pairs): Query<Vec<(String, String)>>,
) -> Result<Json<ApiOk<Vec<serde_json::Value>>>, ApiError> {
    auth.require(&[Role::Doctor])?;
    let doctor_id = auth.doctor_id(&state).await?;
    let params = ListParams::from_pairs(pairs);

    let page = ListQuery::new(&DOCTOR_SCHEDULES, &params)
        .search()
        .filter()?
        .where_eq("dsc.doctor_id", doctor_id)
        .include(&["schedule", "doctor"])
        .dynamic_include()
        .paginate()
        .sort()?
        .fields()?
        .execute(&state.db)
        .await?;

    Ok(Json(ApiOk::paged("Doctor schedules fetched successfully", page)))
}

/* ============================================================
   GET /doctor-schedules  (ADMIN+)
   ============================================================ */

pub async fn list_doctor_schedules(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(pairs): Query<Vec<(String, String)>>,
) -> Result<Json<ApiOk<Vec<serde_json::Value>>>, ApiError> {
    auth.require_admin()?;
    let params = ListParams::from_pairs(pairs);

    let page = ListQuery::new(&DOCTOR_SCHEDULES, &params)
        .search()
        .filter()?
        .dynamic_include()
        .paginate()
        .sort()?
        .fields()?
        .execute(&state.db)
        .await?;

    Ok(Json(ApiOk::paged("Doctor schedules fetched successfully", page)))
}

/* ============================================================
   GET /doctor-schedules/{doctorId}/{scheduleId}
   ============================================================ */

pub async fn get_doctor_schedule(
    State(state): State<AppState>,
    _auth: AuthContext,
    Path((doctor_id, schedule_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<ApiOk<serde_json::Value>>, ApiError> {
    let params = ListParams::default();

    let slot = ListQuery::new(&DOCTOR_SCHEDULES, &params)
        .where_eq("dsc.doctor_id", doctor_id)
        .where_eq("dsc.schedule_id", schedule_id)
        .include(&["schedule", "doctor"])
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| ApiError::not_found("Doctor schedule"))?;

    Ok(Json(ApiOk::new("Doctor schedule fetched successfully", slot)))
}

/* ============================================================
   PATCH /doctor-schedules/update-my-doctor-schedule
   ============================================================ */

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleChange {
    pub id: Uuid,
    #[serde(default)]
    pub should_delete: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateMyDoctorScheduleRequest {
    pub schedule_ids: Vec<ScheduleChange>,
}

/// Row-locks the caller's slots that are about to be removed.
const LOCK_SLOTS_SQL: &str = r#"
    SELECT schedule_id, is_booked
    FROM doctor_schedules
    WHERE doctor_id = $1
      AND schedule_id = ANY($2)
    ORDER BY schedule_id
    FOR UPDATE
"#;

const DELETE_UNBOOKED_SLOTS_SQL: &str = r#"
    DELETE FROM doctor_schedules
    WHERE doctor_id = $1
      AND schedule_id = ANY($2)
      AND NOT is_booked
"#;

fn ensure_removable(locked: &[(Uuid, bool)]) -> Result<(), ApiError> {
    match locked.iter().find(|(_, booked)| *booked) {
        Some((schedule_id, _)) => Err(ApiError::Conflict(
            "SLOT_BOOKED",
            format!("Schedule {schedule_id} is booked and cannot be removed"),
        )),
        None => Ok(()),
    }
}

pub async fn update_my_doctor_schedule(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<UpdateMyDoctorScheduleRequest>,
) -> Result<Json<ApiOk<AffectedData>>, ApiError> {
    auth.require(&[Role::Doctor])?;
    let doctor_id = auth.doctor_id(&state).await?;

    let (remove, add): (Vec<ScheduleChange>, Vec<ScheduleChange>) =
        req.schedule_ids.into_iter().partition(|c| c.should_delete);
    let remove: Vec<Uuid> = remove.into_iter().map(|c| c.id).collect();
    let add: Vec<Uuid> = add.into_iter().map(|c| c.id).collect();

    let mut tx = state.db.begin().await.map_err(ApiError::db)?;

    let locked: Vec<(Uuid, bool)> = sqlx::query_as(LOCK_SLOTS_SQL)
        .bind(doctor_id)
        .bind(&remove)
        .fetch_all(&mut *tx)
        .await
        .map_err(ApiError::db)?;
    ensure_removable(&locked)?;

    let deleted = sqlx::query(DELETE_UNBOOKED_SLOTS_SQL)
        .bind(doctor_id)
        .bind(&remove)
        .execute(&mut *tx)
        .await
        .map_err(ApiError::db)?
        .rows_affected();

    let created = sqlx::query(
        r#"
        INSERT INTO doctor_schedules (doctor_id, schedule_id)
        SELECT $1, UNNEST($2::uuid[])
        ON CONFLICT DO NOTHING
        "#,
    )
    .bind(doctor_id)
    .bind(&add)
    .execute(&mut *tx)
    .await
    .map_err(ApiError::db)?
    .rows_affected();

    tx.commit().await.map_err(ApiError::db)?;

    Ok(Json(ApiOk::new(
        "Doctor schedules updated successfully",
        AffectedData { created, deleted },
    )))
}

/* ============================================================
   DELETE /doctor-schedules/delete-my-doctor-schedule/{scheduleId}
   ============================================================ */

pub async fn delete_my_doctor_schedule(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(schedule_id): Path<Uuid>,
) -> Result<Json<ApiOk<DoctorScheduleRow>>, ApiError> {
    auth.require(&[Role::Doctor])?;
    let doctor_id = auth.doctor_id(&state).await?;

    let mut tx = state.db.begin().await.map_err(ApiError::db)?;

    let slot: DoctorScheduleRow = sqlx::query_as::<_, DoctorScheduleRow>(
        r#"
        SELECT doctor_id, schedule_id, is_booked, created_at, updated_at
        FROM doctor_schedules
        WHERE doctor_id = $1 AND schedule_id = $2
        FOR UPDATE
        "#,
    )
    .bind(doctor_id)
    .bind(schedule_id)
    .fetch_optional(&mut *tx)
    .await
    .map_err(ApiError::db)?
    .ok_or_else(|| ApiError::not_found("Doctor schedule"))?;

    if slot.is_booked {
        return Err(ApiError::Conflict(
            "SLOT_BOOKED",
            "A booked schedule cannot be deleted".into(),
        ));
    }

    sqlx::query(r#"DELETE FROM doctor_schedules WHERE doctor_id = $1 AND schedule_id = $2"#)
        .bind(doctor_id)
        .bind(schedule_id)
        .execute(&mut *tx)
        .await
        .map_err(ApiError::db)?;

    tx.commit().await.map_err(ApiError::db)?;

    Ok(Json(ApiOk::new("Doctor schedule deleted successfully", slot)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn my_schedules_are_scoped_and_embed_schedule() {
        let doctor_id = Uuid::new_v4();
        let params = ListParams::from_pairs(vec![("isBooked".to_string(), "false".to_string())]);
        let q = ListQuery::new(&DOCTOR_SCHEDULES, &params)
            .filter()
            .unwrap()
            .where_eq("dsc.doctor_id", doctor_id)
            .include(&["schedule", "doctor"]);
        let sql = q.data_sql().sql().to_string();
        assert!(sql.contains("WHERE TRUE AND dsc.is_booked = $1 AND dsc.doctor_id = $2"));
        assert!(sql.contains("'schedule', (SELECT jsonb_build_object('id', sc.id"));
        assert!(sql.contains("ORDER BY dsc.created_at DESC, dsc.doctor_id, dsc.schedule_id ASC"));
    }

    #[test]
    fn booked_slots_block_removal() {
        let free = Uuid::new_v4();
        let booked = Uuid::new_v4();
        assert!(ensure_removable(&[]).is_ok());
        assert!(ensure_removable(&[(free, false)]).is_ok());

        let err = ensure_removable(&[(free, false), (booked, true)]).unwrap_err();
        assert_eq!(err.status(), StatusCode::CONFLICT);
        match err {
            ApiError::Conflict(code, msg) => {
                assert_eq!(code, "SLOT_BOOKED");
                assert!(msg.contains(&booked.to_string()));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn removal_locks_rows_and_never_deletes_booked_slots() {
        assert!(LOCK_SLOTS_SQL.contains("FOR UPDATE"));
        assert!(DELETE_UNBOOKED_SLOTS_SQL.contains("AND NOT is_booked"));
    }

    #[test]
    fn update_body_defaults_should_delete() {
        let req: UpdateMyDoctorScheduleRequest = serde_json::from_str(
            r#"{"scheduleIds":[{"id":"6b2c5b0e-3f62-4d3c-9d0f-2e0a1f2b3c4d"},
                {"id":"0c7e8a55-1a1b-4c2d-8e9f-a0b1c2d3e4f5","shouldDelete":true}]}"#,
        )
        .unwrap();
        assert!(!req.schedule_ids[0].should_delete);
        assert!(req.schedule_ids[1].should_delete);
    }
}
