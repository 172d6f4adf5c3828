//! Repositories: users, projects and their members, messages, push subscriptions.

use crate::error::AppResult;
use crate::models::{Message, NewMessage, Project, PushSubscription, User};
use sqlx::FromRow;

use super::DbPool;

// ---- User ----

pub async fn user_get_by_id(pool: &DbPool, id: i64) -> AppResult<Option<User>> {
    let row = sqlx::query_as::<_, User>(
        "SELECT id, username, first_name, last_name FROM users WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

// ---- Project ----

#[derive(Debug, FromRow)]
struct ProjectRow {
    id: i64,
    title: String,
    owner_id: i64,
}

pub async fn project_get(pool: &DbPool, id: i64) -> AppResult<Option<Project>> {
    let row = sqlx::query_as::<_, ProjectRow>(
        "SELECT id, title, owner_id FROM projects WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;
    let Some(row) = row else {
        return Ok(None);
    };

    let coach_ids: Vec<i64> = sqlx::query_scalar(
        "SELECT user_id FROM project_coaches WHERE project_id = $1 ORDER BY user_id",
    )
    .bind(id)
    .fetch_all(pool)
    .await?;
    let participant_ids: Vec<i64> = sqlx::query_scalar(
        "SELECT user_id FROM project_participants WHERE project_id = $1 ORDER BY user_id",
    )
    .bind(id)
    .fetch_all(pool)
    .await?;

    Ok(Some(Project {
        id: row.id,
        title: row.title,
        owner_id: row.owner_id,
        coach_ids,
        participant_ids,
    }))
}

/// Owner, coaches and participants of a project; empty when the project does not exist.
pub async fn project_member_ids(pool: &DbPool, id: i64) -> AppResult<Vec<i64>> {
    let ids: Vec<i64> = sqlx::query_scalar(
        r#"
        SELECT owner_id FROM projects WHERE id = $1
        UNION
        SELECT user_id FROM project_coaches WHERE project_id = $1
        UNION
        SELECT user_id FROM project_participants WHERE project_id = $1
        "#,
    )
    .bind(id)
    .fetch_all(pool)
    .await?;
    Ok(ids)
}

// ---- Message ----

pub async fn message_create(pool: &DbPool, msg: &NewMessage) -> AppResult<Message> {
    let row = sqlx::query_as::<_, Message>(
        r#"
        INSERT INTO messages (project_id, sender_id, receiver_id, content, file_name, file_base64)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING id, project_id, sender_id, receiver_id, content, file_name, file_base64, created_at
        "#,
    )
    .bind(msg.project_id)
    .bind(msg.sender_id)
    .bind(msg.receiver_id)
    .bind(&msg.content)
    .bind(&msg.file_name)
    .bind(&msg.file_base64)
    .fetch_one(pool)
    .await?;
    Ok(row)
}

// ---- Push subscriptions (1 user = 1 subscription) ----

pub async fn push_subscription_upsert(
    pool: &DbPool,
    user_id: i64,
    subscription_json: &str,
) -> AppResult<PushSubscription> {
    let row = sqlx::query_as::<_, PushSubscription>(
        r#"
        INSERT INTO push_subscriptions (user_id, subscription_json)
        VALUES ($1, $2)
        ON CONFLICT (user_id) DO UPDATE SET subscription_json = EXCLUDED.subscription_json
        RETURNING user_id, subscription_json
        "#,
    )
    .bind(user_id)
    .bind(subscription_json)
    .fetch_one(pool)
    .await?;
    Ok(row)
}

pub async fn push_subscription_delete(pool: &DbPool, user_id: i64) -> AppResult<bool> {
    let r = sqlx::query("DELETE FROM push_subscriptions WHERE user_id = $1")
        .bind(user_id)
        .execute(pool)
        .await?;
    Ok(r.rows_affected() > 0)
}

pub async fn push_subscriptions_all(pool: &DbPool) -> AppResult<Vec<PushSubscription>> {
    let rows = sqlx::query_as::<_, PushSubscription>(
        "SELECT user_id, subscription_json FROM push_subscriptions ORDER BY user_id",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows)
}
