use chrono::{NaiveDate, NaiveDateTime};
use diesel::prelude::*;
use uuid::Uuid;

use crate::schema::*;

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = users)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub password_hash: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = users)]
pub struct NewUser {
    pub id: Uuid,
    pub username: String,
    pub password_hash: String,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = departments)]
pub struct Department {
    pub id: Uuid,
    pub name: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = departments)]
pub struct NewDepartment {
    pub id: Uuid,
    pub name: String,
}

/// Membership row: existence means the user may view and emit for the
/// department; `can_administrate` grants department-level admin rights.
#[derive(Debug, Clone, Queryable, Associations)]
#[diesel(table_name = user_departments)]
#[diesel(belongs_to(User))]
#[diesel(belongs_to(Department))]
#[diesel(primary_key(user_id, department_id))]
pub struct UserDepartment {
    pub user_id: Uuid,
    pub department_id: Uuid,
    pub can_administrate: bool,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = user_departments)]
pub struct NewUserDepartment {
    pub user_id: Uuid,
    pub department_id: Uuid,
    pub can_administrate: bool,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = document_types)]
pub struct DocumentType {
    pub id: Uuid,
    pub name: String,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = document_types)]
pub struct NewDocumentType {
    pub id: Uuid,
    pub name: String,
}

/// A numbering stream for one (department, document type, year).
/// `sequence` is the last issued number; `can_emit` gates creation,
/// editing and receiving of emissions drawn from it.
#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = sequences)]
#[diesel(belongs_to(Department))]
#[diesel(belongs_to(DocumentType))]
pub struct Sequence {
    pub id: Uuid,
    pub department_id: Uuid,
    pub document_type_id: Uuid,
    pub year: i32,
    pub sequence: i32,
    pub can_emit: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = sequences)]
pub struct NewSequence {
    pub id: Uuid,
    pub department_id: Uuid,
    pub document_type_id: Uuid,
    pub year: i32,
    pub sequence: i32,
    pub can_emit: bool,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = emissions)]
#[diesel(belongs_to(Sequence))]
pub struct Emission {
    pub id: Uuid,
    pub sequence_id: Uuid,
    pub number: i32,
    pub detail: String,
    pub destination: String,
    pub user_id: Uuid,
    pub batch: Option<Uuid>,
    pub date: NaiveDate,
    pub received: bool,
    pub user_received: Option<Uuid>,
    pub date_received: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = emissions)]
pub struct NewEmission {
    pub id: Uuid,
    pub sequence_id: Uuid,
    pub number: i32,
    pub detail: String,
    pub destination: String,
    pub user_id: Uuid,
    pub batch: Option<Uuid>,
    pub date: NaiveDate,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = emission_files)]
#[diesel(belongs_to(Emission))]
pub struct EmissionFile {
    pub id: Uuid,
    pub emission_id: Uuid,
    pub original_name: String,
    pub content_type: Option<String>,
    pub storage_key: String,
    pub size_bytes: i64,
    pub is_active: bool,
    pub uploaded_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = emission_files)]
pub struct NewEmissionFile {
    pub id: Uuid,
    pub emission_id: Uuid,
    pub original_name: String,
    pub content_type: Option<String>,
    pub storage_key: String,
    pub size_bytes: i64,
    pub is_active: bool,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = refresh_tokens)]
#[diesel(belongs_to(User))]
pub struct RefreshToken {
    pub id: Uuid,
    pub user_id: Uuid,
    pub token_hash: String,
    pub issued_at: NaiveDateTime,
    pub expires_at: NaiveDateTime,
    pub revoked_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = refresh_tokens)]
pub struct NewRefreshToken {
    pub id: Uuid,
    pub user_id: Uuid,
    pub token_hash: String,
    pub issued_at: NaiveDateTime,
    pub expires_at: NaiveDateTime,
}
