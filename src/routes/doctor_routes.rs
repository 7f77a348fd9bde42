// src/routes/doctor_routes.rs

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
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_doctors))
        .route("/{id}", get(get_doctor).patch(update_doctor).delete(delete_doctor))
}

/* ============================================================
   Listing / detail projections
   ============================================================ */

pub const DOCTOR_USER_JSON: &str = "SELECT jsonb_build_object('id', u.id, 'name', u.name, \
     'email', u.email, 'role', u.role, 'status', u.status, 'createdAt', u.created_at)";

pub const DOCTOR_SPECIALTIES_JSON: &str = "SELECT COALESCE(jsonb_agg(jsonb_build_object(\
     'specialtyId', s.id, 'specialty', jsonb_build_object('id', s.id, 'title', s.title, \
     'description', s.description, 'icon', s.icon)) ORDER BY s.title), '[]'::jsonb) \
     FROM doctor_specialties ds JOIN specialties s ON s.id = ds.specialty_id \
     WHERE ds.doctor_id = d.id";

const DOCTOR_REVIEWS_JSON: &str = "SELECT COALESCE(jsonb_agg(jsonb_build_object(\
     'id', r.id, 'patientId', r.patient_id, 'appointmentId', r.appointment_id, \
     'rating', r.rating, 'comment', r.comment, 'createdAt', r.created_at) \
     ORDER BY r.created_at DESC), '[]'::jsonb) FROM reviews r WHERE r.doctor_id = d.id";

const DOCTOR_SCHEDULES_JSON: &str = "SELECT COALESCE(jsonb_agg(jsonb_build_object(\
     'scheduleId', sc.id, 'isBooked', dsc.is_booked, 'schedule', jsonb_build_object(\
     'id', sc.id, 'startDateTime', sc.start_date_time, 'endDateTime', sc.end_date_time)) \
     ORDER BY sc.start_date_time), '[]'::jsonb) \
     FROM doctor_schedules dsc JOIN schedules sc ON sc.id = dsc.schedule_id \
     WHERE dsc.doctor_id = d.id";

const DOCTOR_APPOINTMENTS_JSON: &str = "SELECT COALESCE(jsonb_agg(jsonb_build_object(\
     'id', a.id, 'scheduleId', a.schedule_id, 'status', a.status, \
     'paymentStatus', a.payment_status, 'videoCallingId', a.video_calling_id, \
     'createdAt', a.created_at, 'patient', jsonb_build_object('id', p.id, 'name', p.name, \
     'email', p.email, 'contactNumber', p.contact_number)) ORDER BY a.created_at DESC), '[]'::jsonb) \
     FROM appointments a JOIN patients p ON p.id = a.patient_id WHERE a.doctor_id = d.id";

static DOCTOR_FIELDS: [Field; 21] = [
    Field::col("id", "d.id", FieldKind::Uuid),
    Field::col("userId", "d.user_id", FieldKind::Uuid),
    Field::col("name", "d.name", FieldKind::Text),
    Field::col("email", "d.email", FieldKind::Text),
    Field::col("profilePhoto", "d.profile_photo", FieldKind::Text),
    Field::col("contactNumber", "d.contact_number", FieldKind::Text),
    Field::col("address", "d.address", FieldKind::Text),
    Field::col("registrationNumber", "d.registration_number", FieldKind::Text),
    Field::col("experience", "d.experience", FieldKind::Number),
    Field::col("gender", "d.gender", FieldKind::Enum),
    Field::col("appointmentFee", "d.appointment_fee", FieldKind::Number),
    Field::col("qualification", "d.qualification", FieldKind::Text),
    Field::col("currentWorkingPlace", "d.current_working_place", FieldKind::Text),
    Field::col("designation", "d.designation", FieldKind::Text),
    Field::col("averageRating", "d.average_rating", FieldKind::Number),
    Field::col("isDeleted", "d.is_deleted", FieldKind::Bool),
    Field::col("createdAt", "d.created_at", FieldKind::Timestamp),
    Field::col("updatedAt", "d.updated_at", FieldKind::Timestamp),
    Field::col("user.name", "u.name", FieldKind::Text),
    Field::col("user.email", "u.email", FieldKind::Text),
    Field::many(
        "specialties.specialty.title",
        "doctor_specialties ds JOIN specialties s ON s.id = ds.specialty_id WHERE ds.doctor_id = d.id",
        "s.title",
        FieldKind::Text,
    ),
];

const DOCTOR_PROJECTION: &[&str] = &[
    "id",
    "userId",
    "name",
    "email",
    "profilePhoto",
    "contactNumber",
    "address",
    "registrationNumber",
    "experience",
    "gender",
    "appointmentFee",
    "qualification",
    "currentWorkingPlace",
    "designation",
    "averageRating",
    "isDeleted",
    "createdAt",
    "updatedAt",
];

pub static DOCTORS: ResourceSpec = ResourceSpec {
    from: "doctors d JOIN users u ON u.id = d.user_id",
    primary_key: "d.id",
    default_sort: "createdAt",
    fields: &DOCTOR_FIELDS,
    projection: DOCTOR_PROJECTION,
    searchable: &[
        "name",
        "email",
        "contactNumber",
        "address",
        "qualification",
        "designation",
        "user.name",
        "specialties.specialty.title",
    ],
    filterable: &[
        "gender",
        "appointmentFee",
        "experience",
        "averageRating",
        "user.email",
        "specialties.specialty.title",
    ],
    includes: &[
        Include { name: "user", expr: DOCTOR_USER_JSON },
        Include { name: "specialties", expr: DOCTOR_SPECIALTIES_JSON },
        Include { name: "reviews", expr: DOCTOR_REVIEWS_JSON },
        Include { name: "doctorSchedules", expr: DOCTOR_SCHEDULES_JSON },
    ],
    default_includes: &[],
};

/// Admin view of a single doctor with every relation embedded.
static DOCTOR_DETAIL: ResourceSpec = ResourceSpec {
    from: "doctors d JOIN users u ON u.id = d.user_id",
    primary_key: "d.id",
    default_sort: "createdAt",
    fields: &DOCTOR_FIELDS,
    projection: DOCTOR_PROJECTION,
    searchable: &[],
    filterable: &[],
    includes: &[
        Include { name: "user", expr: DOCTOR_USER_JSON },
        Include { name: "specialties", expr: DOCTOR_SPECIALTIES_JSON },
        Include { name: "appointments", expr: DOCTOR_APPOINTMENTS_JSON },
        Include { name: "doctorSchedules", expr: DOCTOR_SCHEDULES_JSON },
        Include { name: "reviews", expr: DOCTOR_REVIEWS_JSON },
    ],
    default_includes: &["user", "specialties", "appointments", "doctorSchedules", "reviews"],
};

pub async fn load_doctor_detail(state: &AppState, id: Uuid) -> Result<serde_json::Value, ApiError> {
    let params = ListParams::default();
    ListQuery::new(&DOCTOR_DETAIL, &params)
        .where_eq("d.id", id)
        .dynamic_include()
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| ApiError::not_found("Doctor"))
}

/* ============================================================
   Validation shared with doctor creation
   ============================================================ */

pub fn doctor_name(v: &str) -> Result<String, ApiError> {
    required_text("name", v, 5, 30)
}

pub fn doctor_contact_number(v: &str) -> Result<String, ApiError> {
    required_text("contactNumber", v, 11, 14)
}

pub fn doctor_address(v: Option<&str>) -> Result<Option<String>, ApiError> {
    optional_text("address", v, 10, 100)
}

pub fn doctor_short_text(field: &str, v: &str) -> Result<String, ApiError> {
    required_text(field, v, 2, 50)
}

pub fn non_negative(field: &str, v: i32) -> Result<i32, ApiError> {
    if v < 0 {
        return Err(ApiError::validation(format!("{field} cannot be negative")));
    }
    Ok(v)
}

/* ============================================================
   GET /doctors  (public)
   ============================================================ */

pub async fn list_doctors(
    State(state): State<AppState>,
    Query(pairs): Query<Vec<(String, String)>>,
) -> Result<Json<ApiOk<Vec<serde_json::Value>>>, ApiError> {
    let params = ListParams::from_pairs(pairs);

    let page = ListQuery::new(&DOCTORS, &params)
        .search()
        .filter()?
        .where_eq("d.is_deleted", false)
        .include(&["user"])
        .dynamic_include()
        .paginate()
        .sort()?
        .fields()?
        .execute(&state.db)
        .await?;

    Ok(Json(ApiOk::paged("Doctors fetched successfully", page)))
}

/* ============================================================
   GET /doctors/{id}
   ============================================================ */

pub async fn get_doctor(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiOk<serde_json::Value>>, ApiError> {
    auth.require_admin()?;
    let doctor = load_doctor_detail(&state, id).await?;
    Ok(Json(ApiOk::new("Doctor fetched successfully", doctor)))
}

/* ============================================================
   PATCH /doctors/{id}
   ============================================================ */

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DoctorPatch {
    pub name: Option<String>,
    #[serde(default, deserialize_with = "deserialize_double_option")]
    pub profile_photo: Option<Option<String>>,
    pub contact_number: Option<String>,
    #[serde(default, deserialize_with = "deserialize_double_option")]
    pub address: Option<Option<String>>,
    pub registration_number: Option<String>,
    pub experience: Option<i32>,
    pub gender: Option<Gender>,
    pub appointment_fee: Option<i32>,
    pub qualification: Option<String>,
    pub current_working_place: Option<String>,
    pub designation: Option<String>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpecialtyChange {
    pub specialty_id: Uuid,
    #[serde(default)]
    pub should_delete: bool,
}

#[derive(Debug, Deserialize)]
pub struct UpdateDoctorRequest {
    pub doctor: Option<DoctorPatch>,
    #[serde(default)]
    pub specialties: Vec<SpecialtyChange>,
}

/// Merge a patch over the stored row, validating only the fields that were sent.
fn apply_patch(mut row: DoctorRow, patch: DoctorPatch) -> Result<DoctorRow, ApiError> {
    if let Some(v) = patch.name {
        row.name = doctor_name(&v)?;
    }
    if let Some(v) = patch.profile_photo {
        row.profile_photo = v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty());
    }
    if let Some(v) = patch.contact_number {
        row.contact_number = doctor_contact_number(&v)?;
    }
    if let Some(v) = patch.address {
        row.address = doctor_address(v.as_deref())?;
    }
    if let Some(v) = patch.registration_number {
        row.registration_number = required_text("registrationNumber", &v, 1, 50)?;
    }
    if let Some(v) = patch.experience {
        row.experience = non_negative("experience", v)?;
    }
    if let Some(v) = patch.gender {
        row.gender = v;
    }
    if let Some(v) = patch.appointment_fee {
        row.appointment_fee = non_negative("appointmentFee", v)?;
    }
    if let Some(v) = patch.qualification {
        row.qualification = doctor_short_text("qualification", &v)?;
    }
    if let Some(v) = patch.current_working_place {
        row.current_working_place = doctor_short_text("currentWorkingPlace", &v)?;
    }
    if let Some(v) = patch.designation {
        row.designation = doctor_short_text("designation", &v)?;
    }
    Ok(row)
}

/// Split specialty changes into (to remove, to add).
pub fn partition_changes(changes: &[SpecialtyChange]) -> (Vec<Uuid>, Vec<Uuid>) {
    let mut remove = Vec::new();
    let mut add = Vec::new();
    for c in changes {
        if c.should_delete {
            remove.push(c.specialty_id);
        } else if !add.contains(&c.specialty_id) {
            add.push(c.specialty_id);
        }
    }
    (remove, add)
}

/// Stored doctor row, locked until the surrounding transaction ends.
fn lock_doctor_sql() -> String {
    format!("SELECT {DOCTOR_COLUMNS} FROM doctors WHERE id = $1 FOR UPDATE")
}

pub async fn update_doctor(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateDoctorRequest>,
) -> Result<Json<ApiOk<serde_json::Value>>, ApiError> {
    auth.require_admin()?;

    let mut tx = state.db.begin().await.map_err(ApiError::db)?;

    let existing: DoctorRow = sqlx::query_as::<_, DoctorRow>(&lock_doctor_sql())
        .bind(id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(ApiError::db)?
        .ok_or_else(|| ApiError::not_found("Doctor"))?;

    let user_id = existing.user_id;
    let updated = match req.doctor {
        Some(patch) => Some(apply_patch(existing, patch)?),
        None => None,
    };
    let (remove, add) = partition_changes(&req.specialties);

    if let Some(d) = &updated {
        sqlx::query(
            r#"
            UPDATE doctors
            SET name = $1,
                profile_photo = $2,
                contact_number = $3,
                address = $4,
                registration_number = $5,
                experience = $6,
                gender = $7,
                appointment_fee = $8,
                qualification = $9,
                current_working_place = $10,
                designation = $11,
                updated_at = now()
            WHERE id = $12
            "#,
        )
        .bind(&d.name)
        .bind(&d.profile_photo)
        .bind(&d.contact_number)
        .bind(&d.address)
        .bind(&d.registration_number)
        .bind(d.experience)
        .bind(d.gender)
        .bind(d.appointment_fee)
        .bind(&d.qualification)
        .bind(&d.current_working_place)
        .bind(&d.designation)
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(ApiError::db)?;

        sqlx::query(r#"UPDATE users SET name = $1, updated_at = now() WHERE id = $2"#)
            .bind(&d.name)
            .bind(user_id)
            .execute(&mut *tx)
            .await
            .map_err(ApiError::db)?;
    }

    if !remove.is_empty() {
        sqlx::query(
            r#"
            DELETE FROM doctor_specialties
            WHERE doctor_id = $1
              AND specialty_id = ANY($2)
            "#,
        )
        .bind(id)
        .bind(&remove)
        .execute(&mut *tx)
        .await
        .map_err(ApiError::db)?;
    }

    if !add.is_empty() {
        sqlx::query(
            r#"
            INSERT INTO doctor_specialties (doctor_id, specialty_id)
            SELECT $1, UNNEST($2::uuid[])
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(id)
        .bind(&add)
        .execute(&mut *tx)
        .await
        .map_err(ApiError::db)?;
    }

    tx.commit().await.map_err(ApiError::db)?;

    tracing::info!(doctor_id = %id, added = add.len(), removed = remove.len(), "doctor updated");

    let doctor = load_doctor_detail(&state, id).await?;
    Ok(Json(ApiOk::new("Doctor updated successfully", doctor)))
}

/* ============================================================
   DELETE /doctors/{id}  (soft delete)
   ============================================================ */

pub async fn delete_doctor(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiOk<DoctorRow>>, ApiError> {
    auth.require_admin()?;

    let mut tx = state.db.begin().await.map_err(ApiError::db)?;

    let doctor: DoctorRow = sqlx::query_as::<_, DoctorRow>(&format!(
        r#"
        UPDATE doctors
        SET is_deleted = TRUE, deleted_at = now(), updated_at = now()
        WHERE id = $1
        RETURNING {DOCTOR_COLUMNS}
        "#
    ))
    .bind(id)
    .fetch_optional(&mut *tx)
    .await
    .map_err(ApiError::db)?
    .ok_or_else(|| ApiError::not_found("Doctor"))?;

    soft_delete_user(&mut tx, doctor.user_id).await?;

    sqlx::query(r#"DELETE FROM doctor_specialties WHERE doctor_id = $1"#)
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(ApiError::db)?;

    tx.commit().await.map_err(ApiError::db)?;

    tracing::info!(doctor_id = %id, "doctor soft-deleted");
    Ok(Json(ApiOk::new("Doctor deleted successfully", doctor)))
}

/// Mark the login identity deleted and drop every session it holds.
pub async fn soft_delete_user(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    user_id: Uuid,
) -> Result<(), ApiError> {
    sqlx::query(
        r#"
        UPDATE users
        SET is_deleted = TRUE, deleted_at = now(), status = 'DELETED', updated_at = now()
        WHERE id = $1
        "#,
    )
    .bind(user_id)
    .execute(&mut **tx)
    .await
    .map_err(ApiError::db)?;

    sqlx::query(r#"DELETE FROM session_token WHERE user_id = $1"#)
        .bind(user_id)
        .execute(&mut **tx)
        .await
        .map_err(ApiError::db)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn row() -> DoctorRow {
        DoctorRow {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            name: "Dr. Rahman".into(),
            email: "rahman@example.com".into(),
            profile_photo: Some("old.png".into()),
            contact_number: "01700000000".into(),
            address: None,
            registration_number: "REG-1".into(),
            experience: 4,
            gender: Gender::Male,
            appointment_fee: 500,
            qualification: "MBBS".into(),
            current_working_place: "City Hospital".into(),
            designation: "Consultant".into(),
            average_rating: 0.0,
            is_deleted: false,
            deleted_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn update_reads_the_row_under_lock() {
        let sql = lock_doctor_sql();
        assert!(sql.contains("FROM doctors WHERE id = $1"));
        assert!(sql.ends_with("FOR UPDATE"));
    }

    #[test]
    fn patch_only_touches_sent_fields() {
        let patch = DoctorPatch {
            appointment_fee: Some(800),
            profile_photo: Some(None),
            ..Default::default()
        };
        let out = apply_patch(row(), patch).unwrap();
        assert_eq!(out.appointment_fee, 800);
        assert_eq!(out.profile_photo, None);
        assert_eq!(out.name, "Dr. Rahman");
        assert_eq!(out.designation, "Consultant");
    }

    #[test]
    fn patch_validates_ranges() {
        let negative = DoctorPatch {
            appointment_fee: Some(-1),
            ..Default::default()
        };
        assert!(apply_patch(row(), negative).is_err());

        let short_contact = DoctorPatch {
            contact_number: Some("123".into()),
            ..Default::default()
        };
        assert!(apply_patch(row(), short_contact).is_err());
    }

    #[test]
    fn specialty_changes_split_and_dedupe() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let changes = [
            SpecialtyChange { specialty_id: a, should_delete: false },
            SpecialtyChange { specialty_id: a, should_delete: false },
            SpecialtyChange { specialty_id: b, should_delete: true },
        ];
        let (remove, add) = partition_changes(&changes);
        assert_eq!(remove, vec![b]);
        assert_eq!(add, vec![a]);
    }

    #[test]
    fn public_listing_hides_deleted_and_embeds_user() {
        let params = ListParams::from_pairs(vec![
            ("include".to_string(), "specialties".to_string()),
            ("appointmentFee[lte]".to_string(), "1000".to_string()),
        ]);
        let q = ListQuery::new(&DOCTORS, &params)
            .filter()
            .unwrap()
            .where_eq("d.is_deleted", false)
            .include(&["user"])
            .dynamic_include();
        let sql = q.data_sql().sql().to_string();
        assert!(sql.contains("d.appointment_fee <= $1 AND d.is_deleted = $2"));
        assert!(sql.contains("'user', (SELECT jsonb_build_object('id', u.id"));
        assert!(sql.contains("'specialties', (SELECT COALESCE(jsonb_agg"));
        assert!(!sql.contains("'reviews'"));
    }
}
