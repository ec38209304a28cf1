use std::collections::HashMap;

use axum::extract::{Json, Path, Query, State};
use axum::http::StatusCode;
use diesel::prelude::*;
use diesel::result::DatabaseErrorKind;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::access;
use crate::auth::AuthenticatedUser;
use crate::error::{AppError, AppResult};
use crate::listing::{page_bounds, requested_page, ScalarQuery, SearchTerms, ADMIN_PAGE_SIZE};
use crate::models::{Department, Emission, NewUserDepartment, User, UserDepartment};
use crate::schema::{departments, document_types, emissions, sequences, user_departments, users};
use crate::state::AppState;

use super::emissions::{department_emissions, emission_rows_to_responses, EmissionResponse};

#[derive(Serialize)]
pub struct DepartmentInfo {
    pub id: Uuid,
    pub name: String,
    pub can_administrate: bool,
}

#[derive(Serialize)]
pub struct AdminListingResponse {
    pub q: Option<String>,
    pub page: i64,
    pub total_pages: i64,
    pub total: i64,
    pub emissions: Vec<EmissionResponse>,
}

#[derive(Serialize)]
pub struct MemberResponse {
    pub user_id: Uuid,
    pub username: String,
    pub can_administrate: bool,
}

#[derive(Deserialize)]
pub struct AddMemberRequest {
    pub user_id: Uuid,
    #[serde(default)]
    pub can_administrate: bool,
}

#[derive(Deserialize)]
pub struct UpdateMemberRequest {
    pub can_administrate: bool,
}

/// The caller's department memberships, in the order the tabbed UI shows
/// them.
pub async fn list_departments(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<Vec<DepartmentInfo>>> {
    let mut conn = state.db()?;

    let memberships: Vec<(UserDepartment, Department)> = user_departments::table
        .inner_join(departments::table)
        .filter(user_departments::user_id.eq(user.user_id))
        .order(departments::name.asc())
        .load(&mut conn)?;

    Ok(Json(
        memberships
            .into_iter()
            .map(|(membership, department)| DepartmentInfo {
                id: department.id,
                name: department.name,
                can_administrate: membership.can_administrate,
            })
            .collect(),
    ))
}

/// Department-wide listing for administrators: every member's emissions,
/// with the query additionally matching the document-type name and the
/// sequence year.
pub async fn admin_list_emissions(
    State(state): State<AppState>,
    Path(department_id): Path<Uuid>,
    Query(params): Query<HashMap<String, String>>,
    user: AuthenticatedUser,
) -> AppResult<Json<AdminListingResponse>> {
    let mut conn = state.db()?;
    access::require_admin(&mut conn, user.user_id, department_id)?;

    let raw_query = params.get("q").cloned();
    let search = raw_query.as_deref().and_then(SearchTerms::parse);

    let sequence_ids: Vec<Uuid> = sequences::table
        .filter(sequences::department_id.eq(department_id))
        .select(sequences::id)
        .load(&mut conn)?;

    let search_sequence_ids = match search.as_ref() {
        Some(terms) => matching_sequence_ids(&mut conn, department_id, terms)?,
        None => Vec::new(),
    };

    let total: i64 = department_emissions(&sequence_ids, &search_sequence_ids, search.as_ref())
        .count()
        .get_result(&mut conn)?;

    let bounds = page_bounds(total, ADMIN_PAGE_SIZE, requested_page(&params, "page"));

    let rows: Vec<Emission> =
        department_emissions(&sequence_ids, &search_sequence_ids, search.as_ref())
            .order((emissions::received.asc(), emissions::number.desc()))
            .limit(ADMIN_PAGE_SIZE)
            .offset(bounds.offset)
            .load(&mut conn)?;

    let emissions = emission_rows_to_responses(&mut conn, rows)?;

    Ok(Json(AdminListingResponse {
        q: raw_query,
        page: bounds.page,
        total_pages: bounds.total_pages,
        total,
        emissions,
    }))
}

pub async fn list_members(
    State(state): State<AppState>,
    Path(department_id): Path<Uuid>,
    user: AuthenticatedUser,
) -> AppResult<Json<Vec<MemberResponse>>> {
    let mut conn = state.db()?;
    access::require_admin(&mut conn, user.user_id, department_id)?;

    let members: Vec<(UserDepartment, User)> = user_departments::table
        .inner_join(users::table)
        .filter(user_departments::department_id.eq(department_id))
        .order(users::username.asc())
        .load(&mut conn)?;

    Ok(Json(
        members
            .into_iter()
            .map(|(membership, member)| MemberResponse {
                user_id: member.id,
                username: member.username,
                can_administrate: membership.can_administrate,
            })
            .collect(),
    ))
}

pub async fn add_member(
    State(state): State<AppState>,
    Path(department_id): Path<Uuid>,
    user: AuthenticatedUser,
    Json(payload): Json<AddMemberRequest>,
) -> AppResult<(StatusCode, Json<MemberResponse>)> {
    let mut conn = state.db()?;
    access::require_admin(&mut conn, user.user_id, department_id)?;

    let member: User = users::table
        .find(payload.user_id)
        .first(&mut conn)
        .optional()?
        .ok_or_else(|| AppError::validation("user does not exist"))?;

    let new_membership = NewUserDepartment {
        user_id: member.id,
        department_id,
        can_administrate: payload.can_administrate,
    };

    match diesel::insert_into(user_departments::table)
        .values(&new_membership)
        .execute(&mut conn)
    {
        Ok(_) => {}
        Err(diesel::result::Error::DatabaseError(DatabaseErrorKind::UniqueViolation, _)) => {
            return Err(AppError::validation(
                "user is already a member of the department",
            ));
        }
        Err(err) => return Err(AppError::from(err)),
    }

    info!(
        department_id = %department_id,
        member_id = %member.id,
        can_administrate = payload.can_administrate,
        "department member added"
    );

    Ok((
        StatusCode::CREATED,
        Json(MemberResponse {
            user_id: member.id,
            username: member.username,
            can_administrate: payload.can_administrate,
        }),
    ))
}

pub async fn update_member(
    State(state): State<AppState>,
    Path((department_id, member_id)): Path<(Uuid, Uuid)>,
    user: AuthenticatedUser,
    Json(payload): Json<UpdateMemberRequest>,
) -> AppResult<StatusCode> {
    let mut conn = state.db()?;
    access::require_admin(&mut conn, user.user_id, department_id)?;

    conn.transaction::<(), AppError, _>(|conn| {
        let membership: UserDepartment = user_departments::table
            .find((member_id, department_id))
            .first(conn)?;

        if membership.can_administrate
            && !payload.can_administrate
            && access::admin_count(conn, department_id)? <= 1
        {
            return Err(AppError::last_admin_protected());
        }

        diesel::update(user_departments::table.find((member_id, department_id)))
            .set(user_departments::can_administrate.eq(payload.can_administrate))
            .execute(conn)?;

        Ok(())
    })?;

    Ok(StatusCode::NO_CONTENT)
}

pub async fn remove_member(
    State(state): State<AppState>,
    Path((department_id, member_id)): Path<(Uuid, Uuid)>,
    user: AuthenticatedUser,
) -> AppResult<StatusCode> {
    let mut conn = state.db()?;
    access::require_admin(&mut conn, user.user_id, department_id)?;

    conn.transaction::<(), AppError, _>(|conn| {
        let membership: UserDepartment = user_departments::table
            .find((member_id, department_id))
            .first(conn)?;

        if membership.can_administrate && access::admin_count(conn, department_id)? <= 1 {
            return Err(AppError::last_admin_protected());
        }

        diesel::delete(user_departments::table.find((member_id, department_id))).execute(conn)?;

        Ok(())
    })?;

    info!(department_id = %department_id, member_id = %member_id, "department member removed");

    Ok(StatusCode::NO_CONTENT)
}

fn matching_sequence_ids(
    conn: &mut PgConnection,
    department_id: Uuid,
    terms: &SearchTerms,
) -> AppResult<Vec<Uuid>> {
    let ids = match terms.scalar {
        ScalarQuery::Number(year) => sequences::table
            .inner_join(document_types::table)
            .filter(sequences::department_id.eq(department_id))
            .filter(
                document_types::name
                    .ilike(terms.pattern())
                    .or(sequences::year.eq(year)),
            )
            .select(sequences::id)
            .load(conn)?,
        _ => sequences::table
            .inner_join(document_types::table)
            .filter(sequences::department_id.eq(department_id))
            .filter(document_types::name.ilike(terms.pattern()))
            .select(sequences::id)
            .load(conn)?,
    };
    Ok(ids)
}
