// src/routes/user_routes.rs

use axum::{Json, Router, extract::State, http::StatusCode, routing::post};
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::*,
    routes::auth_routes::{ensure_email_free, insert_user, validate_email, validate_password},
    routes::doctor_routes::{
        doctor_address, doctor_contact_number, doctor_name, doctor_short_text, load_doctor_detail,
        non_negative,
    },
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/create-doctor", post(create_doctor))
        .route("/create-admin", post(create_admin))
}

/* ============================================================
   POST /users/create-doctor
   ============================================================ */

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewDoctor {
    pub name: String,
    pub email: String,
    pub profile_photo: Option<String>,
    pub contact_number: String,
    pub address: Option<String>,
    pub registration_number: String,
    #[serde(default)]
    pub experience: i32,
    pub gender: Gender,
    pub appointment_fee: i32,
    pub qualification: String,
    pub current_working_place: String,
    pub designation: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateDoctorRequest {
    pub password: String,
    pub doctor: NewDoctor,
    #[serde(default)]
    pub specialties: Vec<Uuid>,
}

pub async fn create_doctor(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<CreateDoctorRequest>,
) -> Result<(StatusCode, Json<ApiOk<serde_json::Value>>), ApiError> {
    auth.require_admin()?;

    let d = req.doctor;
    let name = doctor_name(&d.name)?;
    let email = validate_email(&d.email)?;
    validate_password(&req.password)?;
    let contact_number = doctor_contact_number(&d.contact_number)?;
    let address = doctor_address(d.address.as_deref())?;
    let registration_number = required_text("registrationNumber", &d.registration_number, 1, 50)?;
    let experience = non_negative("experience", d.experience)?;
    let appointment_fee = non_negative("appointmentFee", d.appointment_fee)?;
    let qualification = doctor_short_text("qualification", &d.qualification)?;
    let current_working_place = doctor_short_text("currentWorkingPlace", &d.current_working_place)?;
    let designation = doctor_short_text("designation", &d.designation)?;
    let profile_photo = d
        .profile_photo
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());

    let mut specialty_ids: Vec<Uuid> = Vec::with_capacity(req.specialties.len());
    for id in req.specialties {
        if !specialty_ids.contains(&id) {
            specialty_ids.push(id);
        }
    }

    let known: Vec<Uuid> = sqlx::query_scalar(r#"SELECT id FROM specialties WHERE id = ANY($1)"#)
        .bind(&specialty_ids)
        .fetch_all(&state.db)
        .await
        .map_err(ApiError::db)?;

    if let Some(missing) = specialty_ids.iter().find(|id| !known.contains(id)) {
        return Err(ApiError::NotFound(
            "SPECIALTY_NOT_FOUND",
            format!("Specialty with id {missing} not found"),
        ));
    }

    ensure_email_free(&state, &email).await?;

    let mut tx = state.db.begin().await.map_err(ApiError::db)?;

    let user_id = insert_user(&mut tx, &name, &email, &req.password, Role::Doctor, true).await?;

    let doctor_id: Uuid = sqlx::query_scalar(
        r#"
        INSERT INTO doctors (
            user_id, name, email, profile_photo, contact_number, address,
            registration_number, experience, gender, appointment_fee,
            qualification, current_working_place, designation
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
        RETURNING id
        "#,
    )
    .bind(user_id)
    .bind(&name)
    .bind(&email)
    .bind(profile_photo)
    .bind(contact_number)
    .bind(address)
    .bind(registration_number)
    .bind(experience)
    .bind(d.gender)
    .bind(appointment_fee)
    .bind(qualification)
    .bind(current_working_place)
    .bind(designation)
    .fetch_one(&mut *tx)
    .await
    .map_err(ApiError::db)?;

    if !specialty_ids.is_empty() {
        sqlx::query(
            r#"
            INSERT INTO doctor_specialties (doctor_id, specialty_id)
            SELECT $1, UNNEST($2::uuid[])
            "#,
        )
        .bind(doctor_id)
        .bind(&specialty_ids)
        .execute(&mut *tx)
        .await
        .map_err(ApiError::db)?;
    }

    tx.commit().await.map_err(ApiError::db)?;

    tracing::info!(%doctor_id, %user_id, specialties = specialty_ids.len(), "doctor created");

    let doctor = load_doctor_detail(&state, doctor_id).await?;
    Ok((
        StatusCode::CREATED,
        Json(ApiOk::new("Doctor created successfully", doctor)),
    ))
}

/* ============================================================
   POST /users/create-admin  (SUPER_ADMIN only)
   ============================================================ */

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewAdmin {
    pub name: String,
    pub email: String,
    pub profile_photo: Option<String>,
    pub contact_number: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateAdminRequest {
    pub password: String,
    pub role: Role,
    pub admin: NewAdmin,
}

pub async fn create_admin(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<CreateAdminRequest>,
) -> Result<(StatusCode, Json<ApiOk<AdminRow>>), ApiError> {
    auth.require(&[Role::SuperAdmin])?;

    if !req.role.is_admin() {
        return Err(ApiError::validation("role must be ADMIN or SUPER_ADMIN"));
    }

    let a = req.admin;
    let name = required_text("name", &a.name, 1, 100)?;
    let email = validate_email(&a.email)?;
    validate_password(&req.password)?;
    let contact_number = optional_text("contactNumber", a.contact_number.as_deref(), 6, 20)?;
    let profile_photo = a
        .profile_photo
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());

    ensure_email_free(&state, &email).await?;

    let mut tx = state.db.begin().await.map_err(ApiError::db)?;

    let user_id = insert_user(&mut tx, &name, &email, &req.password, req.role, true).await?;

    let admin: AdminRow = sqlx::query_as::<_, AdminRow>(&format!(
        r#"
        INSERT INTO admins (user_id, name, email, profile_photo, contact_number)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING {ADMIN_COLUMNS}
        "#
    ))
    .bind(user_id)
    .bind(&name)
    .bind(&email)
    .bind(profile_photo)
    .bind(contact_number)
    .fetch_one(&mut *tx)
    .await
    .map_err(ApiError::db)?;

    tx.commit().await.map_err(ApiError::db)?;

    tracing::info!(admin_id = %admin.id, role = ?req.role, created_by = %auth.user_id, "admin created");

    Ok((
        StatusCode::CREATED,
        Json(ApiOk::new("Admin created successfully", admin)),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_doctor_body_uses_camel_case() {
        let body = serde_json::json!({
            "password": "doctor-pass",
            "doctor": {
                "name": "Dr. Karim",
                "email": "karim@example.com",
                "contactNumber": "01711111111",
                "registrationNumber": "REG-42",
                "gender": "FEMALE",
                "appointmentFee": 600,
                "qualification": "MBBS",
                "currentWorkingPlace": "General Hospital",
                "designation": "Registrar"
            },
            "specialties": ["7f1d7c1e-8a4e-4b1f-9c60-2a1f0f7e4d11"]
        });
        let req: CreateDoctorRequest = serde_json::from_value(body).unwrap();
        assert_eq!(req.doctor.gender, Gender::Female);
        assert_eq!(req.doctor.experience, 0);
        assert_eq!(req.specialties.len(), 1);
    }

    #[test]
    fn create_admin_body_parses_role() {
        let body = serde_json::json!({
            "password": "admin-pass",
            "role": "SUPER_ADMIN",
            "admin": { "name": "Root", "email": "root@example.com" }
        });
        let req: CreateAdminRequest = serde_json::from_value(body).unwrap();
        assert_eq!(req.role, Role::SuperAdmin);
        assert!(req.admin.contact_number.is_none());
    }
}
