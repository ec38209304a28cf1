use diesel::dsl::exists;
use diesel::prelude::*;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::UserDepartment;
use crate::schema::user_departments;

/// Outcome of the department gate. Missing membership is reported as
/// `NotFound` so callers outside a department can never distinguish
/// "exists but not yours" from "does not exist".
pub enum DepartmentAccess {
    Allowed(UserDepartment),
    Forbidden,
    NotFound,
}

impl DepartmentAccess {
    pub fn ensure(self) -> AppResult<UserDepartment> {
        match self {
            DepartmentAccess::Allowed(membership) => Ok(membership),
            DepartmentAccess::Forbidden => Err(AppError::forbidden()),
            DepartmentAccess::NotFound => Err(AppError::not_found()),
        }
    }
}

pub fn check_department_access(
    conn: &mut PgConnection,
    user_id: Uuid,
    department_id: Uuid,
    requires_admin: bool,
) -> QueryResult<DepartmentAccess> {
    let membership: Option<UserDepartment> = user_departments::table
        .find((user_id, department_id))
        .first(conn)
        .optional()?;

    Ok(match membership {
        None => DepartmentAccess::NotFound,
        Some(membership) if requires_admin && !membership.can_administrate => {
            DepartmentAccess::Forbidden
        }
        Some(membership) => DepartmentAccess::Allowed(membership),
    })
}

pub fn require_member(
    conn: &mut PgConnection,
    user_id: Uuid,
    department_id: Uuid,
) -> AppResult<UserDepartment> {
    check_department_access(conn, user_id, department_id, false)?.ensure()
}

pub fn require_admin(
    conn: &mut PgConnection,
    user_id: Uuid,
    department_id: Uuid,
) -> AppResult<UserDepartment> {
    check_department_access(conn, user_id, department_id, true)?.ensure()
}

pub fn admin_count(conn: &mut PgConnection, department_id: Uuid) -> QueryResult<i64> {
    user_departments::table
        .filter(user_departments::department_id.eq(department_id))
        .filter(user_departments::can_administrate.eq(true))
        .count()
        .get_result(conn)
}

pub fn administrates_any(conn: &mut PgConnection, user_id: Uuid) -> QueryResult<bool> {
    diesel::select(exists(
        user_departments::table
            .filter(user_departments::user_id.eq(user_id))
            .filter(user_departments::can_administrate.eq(true)),
    ))
    .get_result(conn)
}
