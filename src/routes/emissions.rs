use std::collections::{HashMap, HashSet};

use axum::extract::{Json, Path, Query, State};
use axum::http::StatusCode;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use diesel::pg::Pg;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::access::{self, DepartmentAccess};
use crate::auth::AuthenticatedUser;
use crate::error::{AppError, AppResult};
use crate::listing::{
    page_bounds, page_param, parse_tab, requested_page, ScalarQuery, SearchTerms,
    MEMBER_PAGE_SIZE,
};
use crate::models::{Department, DocumentType, Emission, NewEmission, Sequence, UserDepartment};
use crate::schema::{departments, document_types, emissions, sequences, user_departments};
use crate::sequencing;
use crate::state::AppState;

use super::files::load_active_file_counts;

#[derive(Serialize, Clone)]
pub struct SequenceInfo {
    pub id: Uuid,
    pub department_id: Uuid,
    pub document_type: String,
    pub year: i32,
}

#[derive(Serialize)]
pub struct EmissionResponse {
    pub id: Uuid,
    pub number: i32,
    pub detail: String,
    pub destination: String,
    pub date: NaiveDate,
    pub batch: Option<Uuid>,
    pub user_id: Uuid,
    pub received: bool,
    pub user_received: Option<Uuid>,
    pub date_received: Option<String>,
    pub sequence: SequenceInfo,
    pub active_files: i64,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Serialize)]
pub struct EmissionDetailResponse {
    pub emission: EmissionResponse,
}

#[derive(Serialize)]
pub struct BatchCreateResponse {
    pub batch: Uuid,
    pub emissions: Vec<EmissionResponse>,
}

#[derive(Serialize)]
pub struct DepartmentPane {
    pub id: Uuid,
    pub name: String,
    pub can_administrate: bool,
    pub page: i64,
    pub total_pages: i64,
    pub total: i64,
    pub emissions: Vec<EmissionResponse>,
}

#[derive(Serialize)]
pub struct EmissionIndexResponse {
    pub q: Option<String>,
    pub tab: i32,
    pub departments: Vec<DepartmentPane>,
}

#[derive(Deserialize)]
pub struct CreateEmissionRequest {
    pub detail: String,
    pub destination: String,
    pub date: Option<NaiveDate>,
    pub user_id: Option<Uuid>,
}

#[derive(Deserialize)]
pub struct CreateBatchRequest {
    pub detail: String,
    pub destination: String,
    pub quantity: i32,
    pub date: Option<NaiveDate>,
    pub user_id: Option<Uuid>,
}

#[derive(Deserialize)]
pub struct UpdateEmissionRequest {
    pub detail: Option<String>,
    pub destination: Option<String>,
    pub date: Option<NaiveDate>,
}

/// Per-department listing of the caller's own emissions. Each department
/// pane carries its own page cursor (`page_<deptId>` query parameter);
/// `tab` only selects which pane the consuming UI focuses.
pub async fn list_emissions(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    user: AuthenticatedUser,
) -> AppResult<Json<EmissionIndexResponse>> {
    let mut conn = state.db()?;

    let raw_query = params.get("q").cloned();
    let search = raw_query.as_deref().and_then(SearchTerms::parse);
    let tab = parse_tab(params.get("tab").map(String::as_str));

    let memberships: Vec<(UserDepartment, Department)> = user_departments::table
        .inner_join(departments::table)
        .filter(user_departments::user_id.eq(user.user_id))
        .order(departments::name.asc())
        .load(&mut conn)?;

    let mut panes = Vec::with_capacity(memberships.len());
    for (membership, department) in memberships {
        let sequence_ids: Vec<Uuid> = sequences::table
            .filter(sequences::department_id.eq(department.id))
            .select(sequences::id)
            .load(&mut conn)?;

        let total: i64 = member_emissions(&sequence_ids, user.user_id, search.as_ref())
            .count()
            .get_result(&mut conn)?;

        let bounds = page_bounds(
            total,
            MEMBER_PAGE_SIZE,
            requested_page(&params, &page_param(department.id)),
        );

        let rows: Vec<Emission> = member_emissions(&sequence_ids, user.user_id, search.as_ref())
            .order((emissions::received.asc(), emissions::number.desc()))
            .limit(MEMBER_PAGE_SIZE)
            .offset(bounds.offset)
            .load(&mut conn)?;

        let emissions = emission_rows_to_responses(&mut conn, rows)?;
        panes.push(DepartmentPane {
            id: department.id,
            name: department.name,
            can_administrate: membership.can_administrate,
            page: bounds.page,
            total_pages: bounds.total_pages,
            total,
            emissions,
        });
    }

    Ok(Json(EmissionIndexResponse {
        q: raw_query,
        tab,
        departments: panes,
    }))
}

pub async fn get_emission(
    State(state): State<AppState>,
    Path(emission_id): Path<Uuid>,
    user: AuthenticatedUser,
) -> AppResult<Json<EmissionDetailResponse>> {
    let mut conn = state.db()?;
    let (emission, sequence) = lookup_emission(&mut conn, emission_id)?;

    let membership = match access::check_department_access(
        &mut conn,
        user.user_id,
        sequence.department_id,
        false,
    )? {
        DepartmentAccess::Allowed(membership) => membership,
        _ => return Err(AppError::not_found()),
    };
    if emission.user_id != user.user_id && !membership.can_administrate {
        return Err(AppError::not_found());
    }

    detail_response(&mut conn, emission).map(Json)
}

pub async fn create_emission(
    State(state): State<AppState>,
    Path(department_id): Path<Uuid>,
    user: AuthenticatedUser,
    Json(payload): Json<CreateEmissionRequest>,
) -> AppResult<(StatusCode, Json<EmissionDetailResponse>)> {
    let mut conn = state.db()?;

    let acting_for =
        resolve_acting_user(&mut conn, &user, department_id, payload.user_id)?;
    let detail = non_empty(&payload.detail, "detail")?;
    let destination = non_empty(&payload.destination, "destination")?;
    let date = payload.date.unwrap_or_else(|| Utc::now().date_naive());

    let sequence =
        sequencing::open_sequence(&mut conn, department_id)?.ok_or_else(AppError::not_found)?;

    let emission = conn.transaction::<Emission, AppError, _>(|conn| {
        let number = sequencing::reserve(conn, sequence.id, 1)?;
        let new_emission = NewEmission {
            id: Uuid::new_v4(),
            sequence_id: sequence.id,
            number,
            detail: detail.clone(),
            destination: destination.clone(),
            user_id: acting_for,
            batch: None,
            date,
        };
        diesel::insert_into(emissions::table)
            .values(&new_emission)
            .execute(conn)?;
        Ok(emissions::table.find(new_emission.id).first(conn)?)
    })?;

    info!(
        emission_id = %emission.id,
        department_id = %department_id,
        number = emission.number,
        "emission created"
    );

    let response = detail_response(&mut conn, emission)?;
    Ok((StatusCode::CREATED, Json(response)))
}

pub async fn create_batch(
    State(state): State<AppState>,
    Path(department_id): Path<Uuid>,
    user: AuthenticatedUser,
    Json(payload): Json<CreateBatchRequest>,
) -> AppResult<(StatusCode, Json<BatchCreateResponse>)> {
    let mut conn = state.db()?;

    let acting_for =
        resolve_acting_user(&mut conn, &user, department_id, payload.user_id)?;
    let detail = non_empty(&payload.detail, "detail")?;
    let destination = non_empty(&payload.destination, "destination")?;
    let date = payload.date.unwrap_or_else(|| Utc::now().date_naive());
    let quantity = payload.quantity;

    let sequence =
        sequencing::open_sequence(&mut conn, department_id)?.ok_or_else(AppError::not_found)?;

    let batch_id = Uuid::new_v4();
    let created = conn.transaction::<Vec<Emission>, AppError, _>(|conn| {
        let start = sequencing::reserve(conn, sequence.id, quantity)?;

        let rows: Vec<NewEmission> = (0..quantity)
            .map(|offset| NewEmission {
                id: Uuid::new_v4(),
                sequence_id: sequence.id,
                number: start + offset,
                detail: format!("{}/{}: {} ({})", offset + 1, quantity, detail, batch_id),
                destination: destination.clone(),
                user_id: acting_for,
                batch: Some(batch_id),
                date,
            })
            .collect();

        diesel::insert_into(emissions::table)
            .values(&rows)
            .execute(conn)?;

        Ok(emissions::table
            .filter(emissions::batch.eq(batch_id))
            .order(emissions::number.asc())
            .load(conn)?)
    })?;

    info!(
        batch = %batch_id,
        department_id = %department_id,
        quantity,
        first_number = created.first().map(|e| e.number),
        "emission batch created"
    );

    let emissions = emission_rows_to_responses(&mut conn, created)?;
    Ok((
        StatusCode::CREATED,
        Json(BatchCreateResponse {
            batch: batch_id,
            emissions,
        }),
    ))
}

pub async fn update_emission(
    State(state): State<AppState>,
    Path(emission_id): Path<Uuid>,
    user: AuthenticatedUser,
    Json(payload): Json<UpdateEmissionRequest>,
) -> AppResult<Json<EmissionDetailResponse>> {
    let mut conn = state.db()?;
    let (emission, sequence) = lookup_emission(&mut conn, emission_id)?;

    let membership = access::require_member(&mut conn, user.user_id, sequence.department_id)?;
    if emission.user_id != user.user_id && !membership.can_administrate {
        return Err(AppError::forbidden());
    }
    if !sequence.can_emit {
        return Err(AppError::sequence_closed());
    }
    if emission.received {
        return Err(AppError::already_received());
    }

    let detail = match payload.detail {
        Some(ref value) => non_empty(value, "detail")?,
        None => emission.detail.clone(),
    };
    let destination = match payload.destination {
        Some(ref value) => non_empty(value, "destination")?,
        None => emission.destination.clone(),
    };
    let date = payload.date.unwrap_or(emission.date);

    diesel::update(emissions::table.find(emission.id))
        .set((
            emissions::detail.eq(&detail),
            emissions::destination.eq(&destination),
            emissions::date.eq(date),
            emissions::updated_at.eq(Utc::now().naive_utc()),
        ))
        .execute(&mut conn)?;

    let updated: Emission = emissions::table.find(emission.id).first(&mut conn)?;
    detail_response(&mut conn, updated).map(Json)
}

pub async fn receive_emission(
    State(state): State<AppState>,
    Path(emission_id): Path<Uuid>,
    user: AuthenticatedUser,
) -> AppResult<Json<EmissionDetailResponse>> {
    let mut conn = state.db()?;
    let (emission, sequence) = lookup_emission(&mut conn, emission_id)?;

    access::require_member(&mut conn, user.user_id, sequence.department_id)?;
    if !sequence.can_emit {
        return Err(AppError::sequence_closed());
    }
    if emission.received {
        return Err(AppError::already_received());
    }

    let now = Utc::now().naive_utc();
    diesel::update(emissions::table.find(emission.id))
        .set((
            emissions::received.eq(true),
            emissions::user_received.eq(Some(user.user_id)),
            emissions::date_received.eq(Some(now)),
            emissions::updated_at.eq(now),
        ))
        .execute(&mut conn)?;

    info!(emission_id = %emission.id, number = emission.number, "emission received");

    let updated: Emission = emissions::table.find(emission.id).first(&mut conn)?;
    detail_response(&mut conn, updated).map(Json)
}

/// Administrator-only reversal of `receive`; restores the record to an
/// open state indistinguishable from before it was received.
pub async fn unreceive_emission(
    State(state): State<AppState>,
    Path(emission_id): Path<Uuid>,
    user: AuthenticatedUser,
) -> AppResult<Json<EmissionDetailResponse>> {
    let mut conn = state.db()?;
    let (emission, sequence) = lookup_emission(&mut conn, emission_id)?;

    access::require_admin(&mut conn, user.user_id, sequence.department_id)?;
    if !sequence.can_emit {
        return Err(AppError::sequence_closed());
    }
    if !emission.received {
        return Err(AppError::not_received());
    }

    diesel::update(emissions::table.find(emission.id))
        .set((
            emissions::received.eq(false),
            emissions::user_received.eq(None::<Uuid>),
            emissions::date_received.eq(None::<NaiveDateTime>),
            emissions::updated_at.eq(Utc::now().naive_utc()),
        ))
        .execute(&mut conn)?;

    info!(emission_id = %emission.id, number = emission.number, "emission receive reverted");

    let updated: Emission = emissions::table.find(emission.id).first(&mut conn)?;
    detail_response(&mut conn, updated).map(Json)
}

fn member_emissions<'a>(
    sequence_ids: &'a [Uuid],
    user_id: Uuid,
    search: Option<&SearchTerms>,
) -> emissions::BoxedQuery<'a, Pg> {
    let mut query = emissions::table
        .filter(emissions::sequence_id.eq_any(sequence_ids))
        .filter(emissions::user_id.eq(user_id))
        .into_boxed();

    if let Some(terms) = search {
        let pattern = terms.pattern();
        query = match terms.scalar {
            ScalarQuery::Number(number) => query.filter(
                emissions::detail
                    .ilike(pattern.clone())
                    .or(emissions::destination.ilike(pattern))
                    .or(emissions::number.eq(number)),
            ),
            ScalarQuery::Date(date) => query.filter(
                emissions::detail
                    .ilike(pattern.clone())
                    .or(emissions::destination.ilike(pattern))
                    .or(emissions::date.eq(date)),
            ),
            ScalarQuery::None => query.filter(
                emissions::detail
                    .ilike(pattern.clone())
                    .or(emissions::destination.ilike(pattern)),
            ),
        };
    }

    query
}

/// Department-wide filter used by the administrator listing. Sequences
/// whose document-type name or year matched the query are passed in as
/// an extra OR branch.
pub(super) fn department_emissions<'a>(
    sequence_ids: &'a [Uuid],
    search_sequence_ids: &'a [Uuid],
    search: Option<&SearchTerms>,
) -> emissions::BoxedQuery<'a, Pg> {
    let mut query = emissions::table
        .filter(emissions::sequence_id.eq_any(sequence_ids))
        .into_boxed();

    if let Some(terms) = search {
        let pattern = terms.pattern();
        query = match terms.scalar {
            ScalarQuery::Number(number) => query.filter(
                emissions::detail
                    .ilike(pattern.clone())
                    .or(emissions::destination.ilike(pattern))
                    .or(emissions::number.eq(number))
                    .or(emissions::sequence_id.eq_any(search_sequence_ids)),
            ),
            ScalarQuery::Date(date) => query.filter(
                emissions::detail
                    .ilike(pattern.clone())
                    .or(emissions::destination.ilike(pattern))
                    .or(emissions::date.eq(date))
                    .or(emissions::sequence_id.eq_any(search_sequence_ids)),
            ),
            ScalarQuery::None => query.filter(
                emissions::detail
                    .ilike(pattern.clone())
                    .or(emissions::destination.ilike(pattern))
                    .or(emissions::sequence_id.eq_any(search_sequence_ids)),
            ),
        };
    }

    query
}

fn resolve_acting_user(
    conn: &mut PgConnection,
    user: &AuthenticatedUser,
    department_id: Uuid,
    requested: Option<Uuid>,
) -> AppResult<Uuid> {
    match requested {
        None => {
            access::require_member(conn, user.user_id, department_id)?;
            Ok(user.user_id)
        }
        Some(target) if target == user.user_id => {
            access::require_member(conn, user.user_id, department_id)?;
            Ok(target)
        }
        Some(target) => {
            access::require_admin(conn, user.user_id, department_id)?;
            match access::check_department_access(conn, target, department_id, false)? {
                DepartmentAccess::Allowed(_) => Ok(target),
                _ => Err(AppError::validation(
                    "user is not a member of the department",
                )),
            }
        }
    }
}

fn non_empty(value: &str, field: &str) -> AppResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(AppError::validation(format!("{field} must not be empty")));
    }
    Ok(trimmed.to_string())
}

pub(super) fn lookup_emission(
    conn: &mut PgConnection,
    emission_id: Uuid,
) -> AppResult<(Emission, Sequence)> {
    let emission: Emission = emissions::table.find(emission_id).first(conn)?;
    let sequence: Sequence = sequences::table.find(emission.sequence_id).first(conn)?;
    Ok((emission, sequence))
}

pub(super) fn load_sequence_refs(
    conn: &mut PgConnection,
    sequence_ids: &[Uuid],
) -> AppResult<HashMap<Uuid, (Sequence, DocumentType)>> {
    if sequence_ids.is_empty() {
        return Ok(HashMap::new());
    }

    let rows: Vec<(Sequence, DocumentType)> = sequences::table
        .inner_join(document_types::table)
        .filter(sequences::id.eq_any(sequence_ids))
        .load(conn)?;

    Ok(rows
        .into_iter()
        .map(|(sequence, document_type)| (sequence.id, (sequence, document_type)))
        .collect())
}

pub(super) fn emission_rows_to_responses(
    conn: &mut PgConnection,
    rows: Vec<Emission>,
) -> AppResult<Vec<EmissionResponse>> {
    let sequence_ids: Vec<Uuid> = rows
        .iter()
        .map(|emission| emission.sequence_id)
        .collect::<HashSet<_>>()
        .into_iter()
        .collect();
    let sequence_refs = load_sequence_refs(conn, &sequence_ids)?;

    let emission_ids: Vec<Uuid> = rows.iter().map(|emission| emission.id).collect();
    let file_counts = load_active_file_counts(conn, &emission_ids)?;

    rows.into_iter()
        .map(|emission| {
            let (sequence, document_type) = sequence_refs
                .get(&emission.sequence_id)
                .ok_or_else(|| AppError::internal("sequence missing for emission"))?;
            let active_files = file_counts.get(&emission.id).copied().unwrap_or(0);
            Ok(to_emission_response(
                emission,
                sequence,
                document_type,
                active_files,
            ))
        })
        .collect()
}

fn detail_response(
    conn: &mut PgConnection,
    emission: Emission,
) -> AppResult<EmissionDetailResponse> {
    let mut responses = emission_rows_to_responses(conn, vec![emission])?;
    let emission = responses
        .pop()
        .ok_or_else(|| AppError::internal("emission response missing"))?;
    Ok(EmissionDetailResponse { emission })
}

pub(super) fn to_emission_response(
    emission: Emission,
    sequence: &Sequence,
    document_type: &DocumentType,
    active_files: i64,
) -> EmissionResponse {
    EmissionResponse {
        id: emission.id,
        number: emission.number,
        detail: emission.detail,
        destination: emission.destination,
        date: emission.date,
        batch: emission.batch,
        user_id: emission.user_id,
        received: emission.received,
        user_received: emission.user_received,
        date_received: emission.date_received.map(to_iso),
        sequence: SequenceInfo {
            id: sequence.id,
            department_id: sequence.department_id,
            document_type: document_type.name.clone(),
            year: sequence.year,
        },
        active_files,
        created_at: to_iso(emission.created_at),
        updated_at: to_iso(emission.updated_at),
    }
}

pub(super) fn to_iso(value: NaiveDateTime) -> String {
    DateTime::<Utc>::from_naive_utc_and_offset(value, Utc).to_rfc3339()
}
