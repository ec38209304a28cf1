use std::collections::HashMap;

use axum::extract::{Multipart, Path, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use diesel::prelude::*;
use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::access;
use crate::auth::AuthenticatedUser;
use crate::error::{AppError, AppResult};
use crate::models::{EmissionFile, NewEmissionFile};
use crate::schema::emission_files;
use crate::state::AppState;

use super::emissions::{lookup_emission, to_iso};

#[derive(Serialize)]
pub struct EmissionFileResponse {
    pub id: Uuid,
    pub original_name: String,
    pub content_type: Option<String>,
    pub size_bytes: i64,
    pub uploaded_at: String,
}

pub async fn list_files(
    State(state): State<AppState>,
    Path(emission_id): Path<Uuid>,
    user: AuthenticatedUser,
) -> AppResult<Json<Vec<EmissionFileResponse>>> {
    let mut conn = state.db()?;
    let (emission, sequence) = lookup_emission(&mut conn, emission_id)?;
    access::require_member(&mut conn, user.user_id, sequence.department_id)?;

    let files: Vec<EmissionFile> = emission_files::table
        .filter(emission_files::emission_id.eq(emission.id))
        .filter(emission_files::is_active.eq(true))
        .order(emission_files::uploaded_at.asc())
        .load(&mut conn)?;

    Ok(Json(files.into_iter().map(to_file_response).collect()))
}

pub async fn upload_file(
    State(state): State<AppState>,
    Path(emission_id): Path<Uuid>,
    user: AuthenticatedUser,
    mut multipart: Multipart,
) -> AppResult<(StatusCode, Json<EmissionFileResponse>)> {
    let mut conn = state.db()?;
    let (emission, sequence) = lookup_emission(&mut conn, emission_id)?;

    let membership = access::require_member(&mut conn, user.user_id, sequence.department_id)?;
    if emission.user_id != user.user_id && !membership.can_administrate {
        return Err(AppError::forbidden());
    }
    if !sequence.can_emit {
        return Err(AppError::sequence_closed());
    }
    drop(conn);

    let mut file_bytes: Option<Vec<u8>> = None;
    let mut original_name: Option<String> = None;
    let mut content_type: Option<String> = None;

    while let Some(field) = multipart.next_field().await.map_err(|err| {
        let msg = format!("invalid multipart data: {err}");
        error!(error = %err, "invalid multipart data");
        AppError::bad_request(msg)
    })? {
        if field.name() == Some("file") {
            original_name = field.file_name().map(|name| name.to_string());
            content_type = field.content_type().map(|mime| mime.to_string());
            let data = field.bytes().await.map_err(|err| {
                let msg = format!("failed to read file bytes: {err}");
                error!(error = %err, "failed to read file bytes");
                AppError::bad_request(msg)
            })?;
            file_bytes = Some(data.to_vec());
        }
    }

    let file_bytes = file_bytes.ok_or_else(|| AppError::bad_request("file field is required"))?;
    if file_bytes.is_empty() {
        return Err(AppError::bad_request("file field must not be empty"));
    }
    let original_name =
        original_name.ok_or_else(|| AppError::bad_request("filename is required"))?;

    let file_id = Uuid::new_v4();
    let storage_key = format!("emissions/{emission_id}/{file_id}");
    let size_bytes = file_bytes.len() as i64;

    state
        .storage
        .put_object(&storage_key, file_bytes, content_type.clone())
        .await
        .map_err(|err| AppError::internal(format!("failed to store attachment: {err}")))?;

    let mut conn = state.db()?;
    let new_file = NewEmissionFile {
        id: file_id,
        emission_id: emission.id,
        original_name,
        content_type,
        storage_key,
        size_bytes,
        is_active: true,
    };
    diesel::insert_into(emission_files::table)
        .values(&new_file)
        .execute(&mut conn)?;

    let file: EmissionFile = emission_files::table.find(file_id).first(&mut conn)?;

    info!(
        emission_id = %emission.id,
        file_id = %file.id,
        original_name = %file.original_name,
        size_bytes = file.size_bytes,
        "attachment uploaded"
    );

    Ok((StatusCode::CREATED, Json(to_file_response(file))))
}

/// Streams the blob back with the original filename and a generic binary
/// content type.
pub async fn download_file(
    State(state): State<AppState>,
    Path((emission_id, file_id)): Path<(Uuid, Uuid)>,
    user: AuthenticatedUser,
) -> AppResult<impl IntoResponse> {
    let mut conn = state.db()?;
    let (emission, sequence) = lookup_emission(&mut conn, emission_id)?;
    access::require_member(&mut conn, user.user_id, sequence.department_id)?;

    let file: EmissionFile = emission_files::table.find(file_id).first(&mut conn)?;
    if file.emission_id != emission.id || !file.is_active {
        return Err(AppError::not_found());
    }
    drop(conn);

    let bytes = state
        .storage
        .get_object(&file.storage_key)
        .await
        .map_err(|err| AppError::internal(format!("failed to read attachment: {err}")))?;

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    if let Some(disposition) = attachment_content_disposition(&file.original_name) {
        headers.insert(
            header::CONTENT_DISPOSITION,
            HeaderValue::from_str(&disposition).map_err(AppError::internal)?,
        );
    }

    Ok((headers, bytes))
}

pub async fn delete_file(
    State(state): State<AppState>,
    Path((emission_id, file_id)): Path<(Uuid, Uuid)>,
    user: AuthenticatedUser,
) -> AppResult<StatusCode> {
    let mut conn = state.db()?;
    let (emission, sequence) = lookup_emission(&mut conn, emission_id)?;

    let membership = access::require_member(&mut conn, user.user_id, sequence.department_id)?;
    if emission.user_id != user.user_id && !membership.can_administrate {
        return Err(AppError::forbidden());
    }
    if !sequence.can_emit {
        return Err(AppError::sequence_closed());
    }

    let file: EmissionFile = emission_files::table.find(file_id).first(&mut conn)?;
    if file.emission_id != emission.id {
        return Err(AppError::not_found());
    }

    diesel::delete(emission_files::table.find(file.id)).execute(&mut conn)?;
    drop(conn);

    if let Err(err) = state.storage.delete_object(&file.storage_key).await {
        warn!(error = %err, key = %file.storage_key, "failed to delete stored attachment");
    }

    info!(emission_id = %emission.id, file_id = %file.id, "attachment deleted");

    Ok(StatusCode::NO_CONTENT)
}

/// Active-attachment counts for a set of emissions, used to annotate
/// listing rows.
pub(super) fn load_active_file_counts(
    conn: &mut PgConnection,
    emission_ids: &[Uuid],
) -> AppResult<HashMap<Uuid, i64>> {
    if emission_ids.is_empty() {
        return Ok(HashMap::new());
    }

    let rows: Vec<(Uuid, i64)> = emission_files::table
        .filter(emission_files::emission_id.eq_any(emission_ids))
        .filter(emission_files::is_active.eq(true))
        .group_by(emission_files::emission_id)
        .select((emission_files::emission_id, diesel::dsl::count_star()))
        .load(conn)?;

    Ok(rows.into_iter().collect())
}

fn to_file_response(file: EmissionFile) -> EmissionFileResponse {
    EmissionFileResponse {
        id: file.id,
        original_name: file.original_name,
        content_type: file.content_type,
        size_bytes: file.size_bytes,
        uploaded_at: to_iso(file.uploaded_at),
    }
}

fn attachment_content_disposition(filename: &str) -> Option<String> {
    if filename.is_empty() {
        return None;
    }

    let sanitized: String = filename
        .chars()
        .map(|ch| match ch {
            '"' | '\\' => '_',
            _ => ch,
        })
        .collect();

    let encoded =
        percent_encoding::utf8_percent_encode(&sanitized, percent_encoding::NON_ALPHANUMERIC);
    Some(format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        sanitized, encoded
    ))
}
