mod common;

use anyhow::Result;
use axum::http::StatusCode;
use common::{acquire_db_lock, body_to_vec, TestApp};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Serialize)]
struct AddMember {
    user_id: Uuid,
    can_administrate: bool,
}

#[derive(Serialize)]
struct UpdateMember {
    can_administrate: bool,
}

#[derive(Deserialize)]
struct Member {
    user_id: Uuid,
    username: String,
    can_administrate: bool,
}

#[tokio::test]
async fn member_and_admin_scopes_are_distinct() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    let member_id = app.insert_user("plain-member", "member-pass").await?;
    let department_id = app.insert_department("Registry").await?;
    app.insert_membership(member_id, department_id, false).await?;
    let member_token = app.login_token("plain-member", "member-pass").await?;

    let member_listing = app.get("/api/emissions", Some(&member_token)).await?;
    assert_eq!(member_listing.status(), StatusCode::OK);

    let admin_listing = app
        .get(
            &format!("/api/departments/{department_id}/emissions"),
            Some(&member_token),
        )
        .await?;
    assert_eq!(admin_listing.status(), StatusCode::FORBIDDEN);

    let members = app
        .get(
            &format!("/api/departments/{department_id}/members"),
            Some(&member_token),
        )
        .await?;
    assert_eq!(members.status(), StatusCode::FORBIDDEN);

    // A non-member cannot even learn the department exists.
    let stranger_id = app.insert_user("stranger", "stranger-pass").await?;
    let elsewhere = app.insert_department("Elsewhere").await?;
    app.insert_membership(stranger_id, elsewhere, true).await?;
    let stranger_token = app.login_token("stranger", "stranger-pass").await?;

    let stranger_listing = app
        .get(
            &format!("/api/departments/{department_id}/emissions"),
            Some(&stranger_token),
        )
        .await?;
    assert_eq!(stranger_listing.status(), StatusCode::NOT_FOUND);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn membership_management_flow() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    let admin_id = app.insert_user("dept-admin", "admin-pass").await?;
    let department_id = app.insert_department("Registry").await?;
    app.insert_membership(admin_id, department_id, true).await?;
    let admin_token = app.login_token("dept-admin", "admin-pass").await?;

    let newcomer_id = app.insert_user("newcomer", "newcomer-pass").await?;

    let added = app
        .post_json(
            &format!("/api/departments/{department_id}/members"),
            &AddMember {
                user_id: newcomer_id,
                can_administrate: false,
            },
            Some(&admin_token),
        )
        .await?;
    assert_eq!(added.status(), StatusCode::CREATED);
    let added_body = body_to_vec(added.into_body()).await?;
    let member: Member = serde_json::from_slice(&added_body)?;
    assert_eq!(member.user_id, newcomer_id);
    assert_eq!(member.username, "newcomer");
    assert!(!member.can_administrate);

    let duplicate = app
        .post_json(
            &format!("/api/departments/{department_id}/members"),
            &AddMember {
                user_id: newcomer_id,
                can_administrate: false,
            },
            Some(&admin_token),
        )
        .await?;
    assert_eq!(duplicate.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let unknown_user = app
        .post_json(
            &format!("/api/departments/{department_id}/members"),
            &AddMember {
                user_id: Uuid::new_v4(),
                can_administrate: false,
            },
            Some(&admin_token),
        )
        .await?;
    assert_eq!(unknown_user.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let listing = app
        .get(
            &format!("/api/departments/{department_id}/members"),
            Some(&admin_token),
        )
        .await?;
    assert_eq!(listing.status(), StatusCode::OK);
    let listing_body = body_to_vec(listing.into_body()).await?;
    let members: Vec<Member> = serde_json::from_slice(&listing_body)?;
    assert_eq!(members.len(), 2);

    let removed = app
        .delete(
            &format!("/api/departments/{department_id}/members/{newcomer_id}"),
            Some(&admin_token),
        )
        .await?;
    assert_eq!(removed.status(), StatusCode::NO_CONTENT);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn last_administrator_cannot_be_removed_or_demoted() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    let admin_id = app.insert_user("sole-admin", "admin-pass").await?;
    let department_id = app.insert_department("Registry").await?;
    app.insert_membership(admin_id, department_id, true).await?;
    let admin_token = app.login_token("sole-admin", "admin-pass").await?;

    let removal = app
        .delete(
            &format!("/api/departments/{department_id}/members/{admin_id}"),
            Some(&admin_token),
        )
        .await?;
    assert_eq!(removal.status(), StatusCode::CONFLICT);

    let demotion = app
        .patch_json(
            &format!("/api/departments/{department_id}/members/{admin_id}"),
            &UpdateMember {
                can_administrate: false,
            },
            Some(&admin_token),
        )
        .await?;
    assert_eq!(demotion.status(), StatusCode::CONFLICT);

    // With a second administrator in place the removal goes through.
    let backup_id = app.insert_user("backup-admin", "backup-pass").await?;
    app.insert_membership(backup_id, department_id, true).await?;

    let removal = app
        .delete(
            &format!("/api/departments/{department_id}/members/{admin_id}"),
            Some(&admin_token),
        )
        .await?;
    assert_eq!(removal.status(), StatusCode::NO_CONTENT);

    app.cleanup().await?;
    Ok(())
}
