use axum::extract::{Json, Path, State};
use axum::http::StatusCode;
use diesel::prelude::*;
use diesel::result::DatabaseErrorKind;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::access;
use crate::auth::AuthenticatedUser;
use crate::error::{AppError, AppResult};
use crate::models::{DocumentType, NewDocumentType, NewSequence, Sequence};
use crate::schema::{document_types, sequences};
use crate::state::AppState;

use super::emissions::to_iso;

#[derive(Serialize)]
pub struct SequenceResponse {
    pub id: Uuid,
    pub department_id: Uuid,
    pub document_type_id: Uuid,
    pub document_type: String,
    pub year: i32,
    pub sequence: i32,
    pub can_emit: bool,
    pub created_at: String,
}

#[derive(Serialize)]
pub struct DocumentTypeResponse {
    pub id: Uuid,
    pub name: String,
}

#[derive(Deserialize)]
pub struct CreateSequenceRequest {
    pub document_type_id: Uuid,
    pub year: i32,
    pub can_emit: Option<bool>,
}

#[derive(Deserialize)]
pub struct UpdateSequenceRequest {
    pub can_emit: bool,
}

#[derive(Deserialize)]
pub struct CreateDocumentTypeRequest {
    pub name: String,
}

pub async fn list_sequences(
    State(state): State<AppState>,
    Path(department_id): Path<Uuid>,
    user: AuthenticatedUser,
) -> AppResult<Json<Vec<SequenceResponse>>> {
    let mut conn = state.db()?;
    access::require_admin(&mut conn, user.user_id, department_id)?;

    let rows: Vec<(Sequence, DocumentType)> = sequences::table
        .inner_join(document_types::table)
        .filter(sequences::department_id.eq(department_id))
        .order((sequences::year.desc(), document_types::name.asc()))
        .load(&mut conn)?;

    Ok(Json(
        rows.into_iter()
            .map(|(sequence, document_type)| to_sequence_response(sequence, &document_type))
            .collect(),
    ))
}

pub async fn create_sequence(
    State(state): State<AppState>,
    Path(department_id): Path<Uuid>,
    user: AuthenticatedUser,
    Json(payload): Json<CreateSequenceRequest>,
) -> AppResult<(StatusCode, Json<SequenceResponse>)> {
    let mut conn = state.db()?;
    access::require_admin(&mut conn, user.user_id, department_id)?;

    let document_type: DocumentType = document_types::table
        .find(payload.document_type_id)
        .first(&mut conn)
        .optional()?
        .ok_or_else(|| AppError::validation("document type does not exist"))?;

    let new_sequence = NewSequence {
        id: Uuid::new_v4(),
        department_id,
        document_type_id: document_type.id,
        year: payload.year,
        sequence: 0,
        can_emit: payload.can_emit.unwrap_or(true),
    };

    diesel::insert_into(sequences::table)
        .values(&new_sequence)
        .execute(&mut conn)?;

    let sequence: Sequence = sequences::table.find(new_sequence.id).first(&mut conn)?;

    info!(
        sequence_id = %sequence.id,
        department_id = %department_id,
        document_type = %document_type.name,
        year = sequence.year,
        "sequence created"
    );

    Ok((
        StatusCode::CREATED,
        Json(to_sequence_response(sequence, &document_type)),
    ))
}

/// Opens or closes a numbering stream. Closing it freezes every emission
/// drawn from it: no edits, receives, reversals or attachment changes
/// until it is reopened.
pub async fn update_sequence(
    State(state): State<AppState>,
    Path(sequence_id): Path<Uuid>,
    user: AuthenticatedUser,
    Json(payload): Json<UpdateSequenceRequest>,
) -> AppResult<Json<SequenceResponse>> {
    let mut conn = state.db()?;

    let sequence: Sequence = sequences::table.find(sequence_id).first(&mut conn)?;
    access::require_admin(&mut conn, user.user_id, sequence.department_id)?;

    diesel::update(sequences::table.find(sequence.id))
        .set((
            sequences::can_emit.eq(payload.can_emit),
            sequences::updated_at.eq(chrono::Utc::now().naive_utc()),
        ))
        .execute(&mut conn)?;

    info!(
        sequence_id = %sequence.id,
        can_emit = payload.can_emit,
        "sequence emission flag updated"
    );

    let updated: Sequence = sequences::table.find(sequence.id).first(&mut conn)?;
    let document_type: DocumentType = document_types::table
        .find(updated.document_type_id)
        .first(&mut conn)?;

    Ok(Json(to_sequence_response(updated, &document_type)))
}

pub async fn list_document_types(
    State(state): State<AppState>,
    _user: AuthenticatedUser,
) -> AppResult<Json<Vec<DocumentTypeResponse>>> {
    let mut conn = state.db()?;

    let rows: Vec<DocumentType> = document_types::table
        .order(document_types::name.asc())
        .load(&mut conn)?;

    Ok(Json(
        rows.into_iter()
            .map(|document_type| DocumentTypeResponse {
                id: document_type.id,
                name: document_type.name,
            })
            .collect(),
    ))
}

pub async fn create_document_type(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<CreateDocumentTypeRequest>,
) -> AppResult<(StatusCode, Json<DocumentTypeResponse>)> {
    let mut conn = state.db()?;

    if !access::administrates_any(&mut conn, user.user_id)? {
        return Err(AppError::forbidden());
    }

    let name = payload.name.trim();
    if name.is_empty() {
        return Err(AppError::validation("name must not be empty"));
    }

    let new_document_type = NewDocumentType {
        id: Uuid::new_v4(),
        name: name.to_string(),
    };

    match diesel::insert_into(document_types::table)
        .values(&new_document_type)
        .execute(&mut conn)
    {
        Ok(_) => {}
        Err(diesel::result::Error::DatabaseError(DatabaseErrorKind::UniqueViolation, _)) => {
            return Err(AppError::validation("document type already exists"));
        }
        Err(err) => return Err(AppError::from(err)),
    }

    Ok((
        StatusCode::CREATED,
        Json(DocumentTypeResponse {
            id: new_document_type.id,
            name: new_document_type.name,
        }),
    ))
}

fn to_sequence_response(sequence: Sequence, document_type: &DocumentType) -> SequenceResponse {
    SequenceResponse {
        id: sequence.id,
        department_id: sequence.department_id,
        document_type_id: sequence.document_type_id,
        document_type: document_type.name.clone(),
        year: sequence.year,
        sequence: sequence.sequence,
        can_emit: sequence.can_emit,
        created_at: to_iso(sequence.created_at),
    }
}
