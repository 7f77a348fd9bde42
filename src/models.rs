use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::query::{PageMeta, Paginated};

#[derive(Clone)]
pub struct AppState {
    pub db: sqlx::PgPool,
    pub session_ttl_hours: i64,
    pub payment_webhook_secret: Option<String>,
}

/* -------------------------
   Enums (native Postgres enums)
--------------------------*/

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "user_role", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    SuperAdmin,
    Admin,
    Doctor,
    Patient,
}

impl Role {
    pub fn is_admin(self) -> bool {
        matches!(self, Role::SuperAdmin | Role::Admin)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "user_status", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UserStatus {
    Active,
    Blocked,
    Deleted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "gender", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Gender {
    Male,
    Female,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "appointment_status", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AppointmentStatus {
    Scheduled,
    #[sqlx(rename = "INPROGRESS")]
    #[serde(rename = "INPROGRESS")]
    InProgress,
    Completed,
    Canceled,
}

impl AppointmentStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, AppointmentStatus::Completed | AppointmentStatus::Canceled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "payment_status", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Paid,
    Unpaid,
}

/* -------------------------
   Response envelope
--------------------------*/

#[derive(Debug, Serialize)]
pub struct ApiOk<T> {
    pub success: bool,
    pub message: String,
    pub data: T,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<PageMeta>,
}

impl<T> ApiOk<T> {
    pub fn new(message: &str, data: T) -> Self {
        ApiOk {
            success: true,
            message: message.to_string(),
            data,
            meta: None,
        }
    }
}

impl<T> ApiOk<Vec<T>> {
    pub fn paged(message: &str, page: Paginated<T>) -> Self {
        ApiOk {
            success: true,
            message: message.to_string(),
            data: page.data,
            meta: Some(page.meta),
        }
    }
}

/* -------------------------
   DB Row Models
--------------------------*/

#[derive(Debug, sqlx::FromRow)]
pub struct UserRow {
    pub id: Uuid,
    pub password_hash: String,
    pub role: Role,
    pub status: UserStatus,
    pub is_deleted: bool,
}

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct UserPublic {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub status: UserStatus,
    pub need_password_change: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct AdminRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub email: String,
    pub profile_photo: Option<String>,
    pub contact_number: Option<String>,
    pub is_deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct DoctorRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub email: String,
    pub profile_photo: Option<String>,
    pub contact_number: String,
    pub address: Option<String>,
    pub registration_number: String,
    pub experience: i32,
    pub gender: Gender,
    pub appointment_fee: i32,
    pub qualification: String,
    pub current_working_place: String,
    pub designation: String,
    pub average_rating: f64,
    pub is_deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct PatientRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub email: String,
    pub profile_photo: Option<String>,
    pub contact_number: Option<String>,
    pub address: Option<String>,
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct SpecialtyRow {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub icon: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleRow {
    pub id: Uuid,
    pub start_date_time: DateTime<Utc>,
    pub end_date_time: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct DoctorScheduleRow {
    pub doctor_id: Uuid,
    pub schedule_id: Uuid,
    pub is_booked: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct AppointmentRow {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub doctor_id: Uuid,
    pub schedule_id: Uuid,
    pub video_calling_id: String,
    pub status: AppointmentStatus,
    pub payment_status: PaymentStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRow {
    pub id: Uuid,
    pub appointment_id: Uuid,
    pub amount: i32,
    pub transaction_id: String,
    pub status: PaymentStatus,
    pub payment_gateway_data: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ReviewRow {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub doctor_id: Uuid,
    pub appointment_id: Uuid,
    pub rating: i32,
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/* -------------------------
   Column lists (kept next to the row structs they decode into)
--------------------------*/

pub const ADMIN_COLUMNS: &str = "id, user_id, name, email, profile_photo, contact_number, \
     is_deleted, deleted_at, created_at, updated_at";

pub const DOCTOR_COLUMNS: &str = "id, user_id, name, email, profile_photo, contact_number, \
     address, registration_number, experience, gender, appointment_fee, qualification, \
     current_working_place, designation, average_rating, is_deleted, deleted_at, \
     created_at, updated_at";

pub const PATIENT_COLUMNS: &str = "id, user_id, name, email, profile_photo, contact_number, \
     address, is_deleted, created_at, updated_at";

pub const APPOINTMENT_COLUMNS: &str = "id, patient_id, doctor_id, schedule_id, video_calling_id, \
     status, payment_status, created_at, updated_at";

pub const PAYMENT_COLUMNS: &str = "id, appointment_id, amount, transaction_id, status, \
     payment_gateway_data, created_at, updated_at";

pub const REVIEW_COLUMNS: &str = "id, patient_id, doctor_id, appointment_id, rating, comment, \
     created_at, updated_at";

/* -------------------------
   Helpers
--------------------------*/

/// Trim a required text field, rejecting blanks and overlong values.
pub fn required_text(
    field: &str,
    value: &str,
    min: usize,
    max: usize,
) -> Result<String, crate::error::ApiError> {
    let v = value.trim();
    let len = v.chars().count();
    if len < min || len > max {
        return Err(crate::error::ApiError::validation(format!(
            "{field} must be between {min} and {max} characters"
        )));
    }
    Ok(v.to_string())
}

/// Distinguish an absent field (`None`) from an explicit `null` (`Some(None)`) in PATCH bodies.
pub fn deserialize_double_option<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Validate an optional text field, mapping blanks to `None`.
pub fn optional_text(
    field: &str,
    value: Option<&str>,
    min: usize,
    max: usize,
) -> Result<Option<String>, crate::error::ApiError> {
    match value.map(str::trim) {
        None | Some("") => Ok(None),
        Some(v) => required_text(field, v, min, max).map(Some),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enums_use_wire_names() {
        assert_eq!(serde_json::to_string(&Role::SuperAdmin).unwrap(), "\"SUPER_ADMIN\"");
        assert_eq!(
            serde_json::to_string(&AppointmentStatus::InProgress).unwrap(),
            "\"INPROGRESS\""
        );
        let s: AppointmentStatus = serde_json::from_str("\"CANCELED\"").unwrap();
        assert_eq!(s, AppointmentStatus::Canceled);
        assert!(s.is_terminal());
        assert!(!AppointmentStatus::Scheduled.is_terminal());
    }

    #[test]
    fn envelope_omits_meta_unless_paged() {
        let v = serde_json::to_value(ApiOk::new("ok", 1)).unwrap();
        assert_eq!(v, serde_json::json!({"success": true, "message": "ok", "data": 1}));

        let page = Paginated {
            data: vec![1, 2],
            meta: PageMeta::new(1, 2, 5),
        };
        let v = serde_json::to_value(ApiOk::paged("list", page)).unwrap();
        assert_eq!(v["meta"]["totalPages"], 3);
        assert_eq!(v["data"], serde_json::json!([1, 2]));
    }

    #[test]
    fn required_text_trims_and_bounds() {
        assert_eq!(required_text("name", "  Ada  ", 2, 10).unwrap(), "Ada");
        assert!(required_text("name", " ", 1, 10).is_err());
        assert!(required_text("name", "abcdef", 1, 5).is_err());
    }

    #[test]
    fn optional_text_maps_blank_to_none() {
        assert_eq!(optional_text("address", None, 3, 10).unwrap(), None);
        assert_eq!(optional_text("address", Some("  "), 3, 10).unwrap(), None);
        assert_eq!(
            optional_text("address", Some(" Main St "), 3, 10).unwrap(),
            Some("Main St".to_string())
        );
        assert!(optional_text("address", Some("ab"), 3, 10).is_err());
    }

    #[derive(Debug, Deserialize)]
    struct Patch {
        #[serde(default, deserialize_with = "deserialize_double_option")]
        photo: Option<Option<String>>,
    }

    #[test]
    fn double_option_separates_null_from_missing() {
        let p: Patch = serde_json::from_str("{}").unwrap();
        assert_eq!(p.photo, None);
        let p: Patch = serde_json::from_str(r#"{"photo": null}"#).unwrap();
        assert_eq!(p.photo, Some(None));
        let p: Patch = serde_json::from_str(r#"{"photo": "x.png"}"#).unwrap();
        assert_eq!(p.photo, Some(Some("x.png".into())));
    }
}
