//! Minimal user records.
//!
//! Accounts are owned by the identity provider; this table only exists so
//! reviews and shops have an author/owner row to point at. Removing a
//! user goes through [`UserStore::delete_user`], which takes their shops
//! and reviews with them and repairs every aggregate those touched.

use std::sync::Arc;

use serde::Serialize;
use sqlx::{Row, SqliteConnection, SqlitePool};
use tracing::{info, warn};

use crate::auth::{self, Actor, Role};
use crate::consistency::{ConsistencyMaintainer, ReviewChange};
use crate::db;
use crate::error::{ReviewError, Result};
use crate::media::MediaManager;
use crate::models::{MediaCleanup, User};
use crate::reviews;
use crate::shops;

pub async fn create_user(pool: &SqlitePool, username: &str, role: Role) -> Result<User> {
    let username = username.trim();
    if username.is_empty() {
        return Err(ReviewError::bad_request("username must not be empty"));
    }

    let result = sqlx::query("INSERT INTO users (username, role, created_at) VALUES (?, ?, ?)")
        .bind(username)
        .bind(role.as_str())
        .bind(chrono::Utc::now().timestamp_millis())
        .execute(pool)
        .await;

    let result = match result {
        Ok(result) => result,
        Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
            return Err(ReviewError::bad_request(format!(
                "username already taken: {}",
                username
            )));
        }
        Err(e) => return Err(e.into()),
    };

    let id = result.last_insert_rowid();
    info!(user_id = id, username, role = role.as_str(), "user created");
    Ok(User {
        id,
        username: username.to_string(),
        role,
    })
}

pub async fn find_user(conn: &mut SqliteConnection, id: i64) -> Result<Option<User>> {
    let row = sqlx::query("SELECT id, username, role FROM users WHERE id = ?")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;

    Ok(row.map(|r| User {
        id: r.get("id"),
        username: r.get("username"),
        role: Role::parse(r.get::<&str, _>("role")).unwrap_or(Role::User),
    }))
}

/// Fail with `NotFound` unless the user row exists.
pub(crate) async fn ensure_user(conn: &mut SqliteConnection, id: i64) -> Result<()> {
    let exists: Option<i64> = sqlx::query_scalar("SELECT id FROM users WHERE id = ?")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
    match exists {
        Some(_) => Ok(()),
        None => Err(ReviewError::not_found("user", id)),
    }
}

/// What deleting a user removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserDeleteSummary {
    pub shops_deleted: u64,
    pub reviews_deleted: u64,
    pub media: MediaCleanup,
}

pub struct UserStore {
    pool: SqlitePool,
    media: Arc<MediaManager>,
    consistency: ConsistencyMaintainer,
}

impl UserStore {
    pub fn new(pool: SqlitePool, media: Arc<MediaManager>, consistency: ConsistencyMaintainer) -> Self {
        Self {
            pool,
            media,
            consistency,
        }
    }

    pub async fn get(&self, user_id: i64) -> Result<User> {
        let mut conn = self.pool.acquire().await?;
        find_user(&mut conn, user_id)
            .await?
            .ok_or_else(|| ReviewError::not_found("user", user_id))
    }

    /// Delete a user with the shops they own and everything they wrote.
    ///
    /// Admin only, and never the acting admin. Owned shops go first with
    /// all their reviews. The user's remaining reviews elsewhere are then
    /// removed one subtree at a time, top-level before replies, and each
    /// removal refreshes the parent `reply_count` or the shop rating it
    /// affected. Everything commits in one write transaction.
    pub async fn delete_user(&self, user_id: i64, actor: &Actor) -> Result<UserDeleteSummary> {
        auth::ensure_admin(actor)?;
        if actor.id == user_id {
            return Err(ReviewError::bad_request("cannot delete your own account"));
        }

        let mut tx = db::begin_write(&self.pool).await?;
        ensure_user(&mut tx, user_id).await?;

        let mut summary = UserDeleteSummary::default();

        let owned: Vec<i64> = sqlx::query_scalar("SELECT id FROM shops WHERE owner_id = ? ORDER BY id")
            .bind(user_id)
            .fetch_all(&mut *tx)
            .await?;
        for shop_id in owned {
            let removed = shops::delete_shop_rows(&mut tx, &self.media, shop_id).await?;
            summary.shops_deleted += 1;
            summary.reviews_deleted += removed.reviews_deleted;
            summary.media.absorb(removed.media);
        }

        loop {
            let next: Option<(i64, i64, Option<i64>, Option<i64>)> = sqlx::query_as(
                r#"
                SELECT id, shop_id, parent_review_id, rating FROM reviews
                WHERE user_id = ?
                ORDER BY parent_review_id IS NOT NULL, id
                LIMIT 1
                "#,
            )
            .bind(user_id)
            .fetch_optional(&mut *tx)
            .await?;
            let Some((review_id, shop_id, parent_review_id, rating)) = next else {
                break;
            };

            let removed = reviews::delete_subtree(&mut tx, &self.media, review_id).await?;
            summary.reviews_deleted += removed.reviews_deleted;
            summary.media.absorb(removed.media);

            self.consistency
                .apply(
                    &mut tx,
                    ReviewChange::Deleted {
                        shop_id,
                        parent_review_id,
                        had_rating: rating.is_some(),
                    },
                )
                .await?;
        }

        sqlx::query("DELETE FROM users WHERE id = ?")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        if summary.media.files_failed > 0 {
            warn!(
                user_id,
                files_failed = summary.media.files_failed,
                "user deleted but some files could not be removed"
            );
        }
        info!(
            user_id,
            actor = actor.id,
            shops = summary.shops_deleted,
            reviews = summary.reviews_deleted,
            "user deleted"
        );
        Ok(summary)
    }
}
