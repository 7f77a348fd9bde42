// src/routes/schedule_routes.rs

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
};
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::*,
    query::{Field, FieldKind, Include, ListParams, ListQuery, ResourceSpec},
};

pub const SLOT_MINUTES: i64 = 30;
pub const MAX_SCHEDULE_DAYS: i64 = 31;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_schedules).post(create_schedules))
        .route(
            "/{id}",
            get(get_schedule).patch(update_schedule).delete(delete_schedule),
        )
}

static SCHEDULES: ResourceSpec = ResourceSpec {
    from: "schedules sc",
    primary_key: "sc.id",
    default_sort: "createdAt",
    fields: &[
        Field::col("id", "sc.id", FieldKind::Uuid),
        Field::col("startDateTime", "sc.start_date_time", FieldKind::Timestamp),
        Field::col("endDateTime", "sc.end_date_time", FieldKind::Timestamp),
        Field::col("createdAt", "sc.created_at", FieldKind::Timestamp),
        Field::col("updatedAt", "sc.updated_at", FieldKind::Timestamp),
        Field::many(
            "doctorSchedules.doctorId",
            "doctor_schedules dsc WHERE dsc.schedule_id = sc.id",
            "dsc.doctor_id",
            FieldKind::Uuid,
        ),
        Field::many(
            "doctorSchedules.isBooked",
            "doctor_schedules dsc WHERE dsc.schedule_id = sc.id",
            "dsc.is_booked",
            FieldKind::Bool,
        ),
    ],
    projection: &["id", "startDateTime", "endDateTime", "createdAt", "updatedAt"],
    searchable: &[],
    filterable: &[
        "startDateTime",
        "endDateTime",
        "doctorSchedules.doctorId",
        "doctorSchedules.isBooked",
    ],
    includes: &[Include {
        name: "doctorSchedules",
        expr: "SELECT COALESCE(jsonb_agg(jsonb_build_object('doctorId', dsc.doctor_id, \
               'isBooked', dsc.is_booked, 'doctor', jsonb_build_object('id', d.id, \
               'name', d.name, 'designation', d.designation)) ORDER BY d.name), '[]'::jsonb) \
               FROM doctor_schedules dsc JOIN doctors d ON d.id = dsc.doctor_id \
               WHERE dsc.schedule_id = sc.id",
    }],
    default_includes: &[],
};

const SCHEDULE_COLUMNS: &str = "id, start_date_time, end_date_time, created_at, updated_at";

/* ============================================================
   Slot generation
   ============================================================ */

pub fn parse_date(field: &str, raw: &str) -> Result<NaiveDate, ApiError> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| ApiError::validation(format!("{field} must be YYYY-MM-DD")))
}

pub fn parse_time(field: &str, raw: &str) -> Result<NaiveTime, ApiError> {
    NaiveTime::parse_from_str(raw.trim(), "%H:%M")
        .map_err(|_| ApiError::validation(format!("{field} must be HH:MM")))
}

fn at_utc(date: NaiveDate, time: NaiveTime) -> DateTime<Utc> {
    date.and_time(time).and_utc()
}

/// Consecutive fixed-length slots per day from `start_time`, keeping only
/// slots that end at or before `end_time`.
pub fn generate_slots(
    start_date: NaiveDate,
    end_date: NaiveDate,
    start_time: NaiveTime,
    end_time: NaiveTime,
    slot: Duration,
) -> Vec<(DateTime<Utc>, DateTime<Utc>)> {
    let mut slots = Vec::new();
    if slot <= Duration::zero() {
        return slots;
    }

    let mut day = start_date;
    while day <= end_date {
        let day_end = at_utc(day, end_time);
        let mut cursor = at_utc(day, start_time);
        while cursor + slot <= day_end {
            slots.push((cursor, cursor + slot));
            cursor += slot;
        }
        match day.succ_opt() {
            Some(next) => day = next,
            None => break,
        }
    }
    slots
}

/* ============================================================
   POST /schedules
   ============================================================ */

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleWindowRequest {
    pub start_date: String,
    pub end_date: String,
    pub start_time: String,
    pub end_time: String,
}

pub async fn create_schedules(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<ScheduleWindowRequest>,
) -> Result<(StatusCode, Json<ApiOk<Vec<ScheduleRow>>>), ApiError> {
    auth.require_admin()?;

    let start_date = parse_date("startDate", &req.start_date)?;
    let end_date = parse_date("endDate", &req.end_date)?;
    let start_time = parse_time("startTime", &req.start_time)?;
    let end_time = parse_time("endTime", &req.end_time)?;

    if end_date < start_date {
        return Err(ApiError::validation("endDate must not be before startDate"));
    }
    if (end_date - start_date).num_days() >= MAX_SCHEDULE_DAYS {
        return Err(ApiError::validation(format!(
            "a schedule window may span at most {MAX_SCHEDULE_DAYS} days"
        )));
    }
    if end_time <= start_time {
        return Err(ApiError::validation("endTime must be after startTime"));
    }

    let slots = generate_slots(
        start_date,
        end_date,
        start_time,
        end_time,
        Duration::minutes(SLOT_MINUTES),
    );
    let (starts, ends): (Vec<DateTime<Utc>>, Vec<DateTime<Utc>>) = slots.into_iter().unzip();

    let created: Vec<ScheduleRow> = sqlx::query_as::<_, ScheduleRow>(&format!(
        r#"
        INSERT INTO schedules (start_date_time, end_date_time)
        SELECT * FROM UNNEST($1::timestamptz[], $2::timestamptz[])
        ON CONFLICT (start_date_time, end_date_time) DO NOTHING
        RETURNING {SCHEDULE_COLUMNS}
        "#
    ))
    .bind(&starts)
    .bind(&ends)
    .fetch_all(&state.db)
    .await
    .map_err(ApiError::db)?;

    tracing::info!(
        requested = starts.len(),
        created = created.len(),
        "schedule slots generated"
    );

    Ok((
        StatusCode::CREATED,
        Json(ApiOk::new("Schedules created successfully", created)),
    ))
}

/* ============================================================
   GET /schedules
   ============================================================ */

pub async fn list_schedules(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(pairs): Query<Vec<(String, String)>>,
) -> Result<Json<ApiOk<Vec<serde_json::Value>>>, ApiError> {
    auth.require(&[Role::SuperAdmin, Role::Admin, Role::Doctor])?;
    let params = ListParams::from_pairs(pairs);

    let page = ListQuery::new(&SCHEDULES, &params)
        .search()
        .filter()?
        .dynamic_include()
        .paginate()
        .sort()?
        .fields()?
        .execute(&state.db)
        .await?;

    Ok(Json(ApiOk::paged("Schedules fetched successfully", page)))
}

/* ============================================================
   GET /schedules/{id}
   ============================================================ */

pub async fn get_schedule(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiOk<ScheduleRow>>, ApiError> {
    auth.require(&[Role::SuperAdmin, Role::Admin, Role::Doctor])?;

    let schedule: ScheduleRow = sqlx::query_as::<_, ScheduleRow>(&format!(
        "SELECT {SCHEDULE_COLUMNS} FROM schedules WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(&state.db)
    .await
    .map_err(ApiError::db)?
    .ok_or_else(|| ApiError::not_found("Schedule"))?;

    Ok(Json(ApiOk::new("Schedule fetched successfully", schedule)))
}

/* ============================================================
   PATCH /schedules/{id}
   ============================================================ */

pub async fn update_schedule(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
    Json(req): Json<ScheduleWindowRequest>,
) -> Result<Json<ApiOk<ScheduleRow>>, ApiError> {
    auth.require_admin()?;

    let start = at_utc(
        parse_date("startDate", &req.start_date)?,
        parse_time("startTime", &req.start_time)?,
    );
    let end = at_utc(
        parse_date("endDate", &req.end_date)?,
        parse_time("endTime", &req.end_time)?,
    );
    if end <= start {
        return Err(ApiError::validation("schedule end must be after its start"));
    }

    let schedule: ScheduleRow = sqlx::query_as::<_, ScheduleRow>(&format!(
        r#"
        UPDATE schedules
        SET start_date_time = $1, end_date_time = $2, updated_at = now()
        WHERE id = $3
        RETURNING {SCHEDULE_COLUMNS}
        "#
    ))
    .bind(start)
    .bind(end)
    .bind(id)
    .fetch_optional(&state.db)
    .await
    .map_err(ApiError::db)?
    .ok_or_else(|| ApiError::not_found("Schedule"))?;

    Ok(Json(ApiOk::new("Schedule updated successfully", schedule)))
}

/* ============================================================
   DELETE /schedules/{id}
   ============================================================ */

pub async fn delete_schedule(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiOk<ScheduleRow>>, ApiError> {
    auth.require_admin()?;

    let mut tx = state.db.begin().await.map_err(ApiError::db)?;

    let in_use: bool = sqlx::query_scalar(
        r#"
        SELECT EXISTS (SELECT 1 FROM doctor_schedules WHERE schedule_id = $1 AND is_booked)
            OR EXISTS (SELECT 1 FROM appointments WHERE schedule_id = $1)
        "#,
    )
    .bind(id)
    .fetch_one(&mut *tx)
    .await
    .map_err(ApiError::db)?;

    if in_use {
        return Err(ApiError::Conflict(
            "SCHEDULE_IN_USE",
            "Schedule has booked slots or appointments and cannot be deleted".into(),
        ));
    }

    let schedule: ScheduleRow = sqlx::query_as::<_, ScheduleRow>(&format!(
        "DELETE FROM schedules WHERE id = $1 RETURNING {SCHEDULE_COLUMNS}"
    ))
    .bind(id)
    .fetch_optional(&mut *tx)
    .await
    .map_err(ApiError::db)?
    .ok_or_else(|| ApiError::not_found("Schedule"))?;

    tx.commit().await.map_err(ApiError::db)?;

    Ok(Json(ApiOk::new("Schedule deleted successfully", schedule)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn t(s: &str) -> NaiveTime {
        NaiveTime::parse_from_str(s, "%H:%M").unwrap()
    }

    #[test]
    fn slots_fill_window_and_stop_before_overrun() {
        let slots = generate_slots(
            d("2025-03-01"),
            d("2025-03-01"),
            t("09:00"),
            t("10:45"),
            Duration::minutes(30),
        );
        let starts: Vec<String> = slots.iter().map(|(s, _)| s.format("%H:%M").to_string()).collect();
        assert_eq!(starts, vec!["09:00", "09:30", "10:00"]);
        assert!(slots.iter().all(|(s, e)| *e - *s == Duration::minutes(30)));
        assert_eq!(slots.last().unwrap().1.format("%H:%M").to_string(), "10:30");
    }

    #[test]
    fn slots_repeat_for_each_day_inclusive() {
        let slots = generate_slots(
            d("2025-03-01"),
            d("2025-03-03"),
            t("09:00"),
            t("10:00"),
            Duration::minutes(30),
        );
        assert_eq!(slots.len(), 6);
        assert_eq!(slots[0].0.to_rfc3339(), "2025-03-01T09:00:00+00:00");
        assert_eq!(slots[5].1.to_rfc3339(), "2025-03-03T10:00:00+00:00");
    }

    #[test]
    fn empty_window_yields_no_slots() {
        assert!(generate_slots(d("2025-03-02"), d("2025-03-01"), t("09:00"), t("17:00"), Duration::minutes(30)).is_empty());
        assert!(generate_slots(d("2025-03-01"), d("2025-03-01"), t("09:00"), t("09:20"), Duration::minutes(30)).is_empty());
    }

    #[test]
    fn window_fields_must_be_well_formed() {
        assert!(parse_date("startDate", "2025-13-01").is_err());
        assert!(parse_time("startTime", "9am").is_err());
        assert_eq!(parse_time("startTime", " 08:30 ").unwrap(), t("08:30"));
    }

    #[test]
    fn doctor_filter_probes_slot_table() {
        let params = ListParams::from_pairs(vec![(
            "doctorSchedules.isBooked".to_string(),
            "false".to_string(),
        )]);
        let q = ListQuery::new(&SCHEDULES, &params).filter().unwrap();
        assert!(q.count_sql().sql().contains(
            "EXISTS (SELECT 1 FROM doctor_schedules dsc WHERE dsc.schedule_id = sc.id AND dsc.is_booked = $1)"
        ));
    }
}
