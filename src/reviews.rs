//! Review tree store.
//!
//! Owns the two-level review hierarchy: shop → top-level review → reply.
//! Every mutating operation runs in one write transaction. Rows, media
//! and the derived fields they affect (`reply_count`, the shop rating)
//! commit or roll back together.
//!
//! Children are always found by querying `parent_review_id`; no review
//! ever holds its replies in memory.

use std::sync::Arc;

use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};
use tracing::{debug, info, warn};

use crate::auth::{self, Actor};
use crate::consistency::{ConsistencyMaintainer, ReviewChange};
use crate::db;
use crate::error::{ReviewError, Result};
use crate::media::{self, MediaManager};
use crate::models::{
    from_millis, page_offset, DeleteSummary, MediaCleanup, NewReview, Page, PageRequest,
    ParentType, Review, ReviewEdit, ReviewWithUploads, Reviewer, UploadFile,
};
use crate::shops;
use crate::users;

const REVIEW_SELECT: &str = r#"
    SELECT r.id, r.shop_id, r.user_id, u.username, r.parent_review_id, r.rating,
           r.content, r.reply_count, r.created_at, r.updated_at
    FROM reviews r
    JOIN users u ON u.id = r.user_id
"#;

fn review_from_row(row: &SqliteRow) -> Review {
    Review {
        id: row.get("id"),
        shop_id: row.get("shop_id"),
        user: Reviewer {
            id: row.get("user_id"),
            username: row.get("username"),
        },
        parent_review_id: row.get("parent_review_id"),
        rating: row.get("rating"),
        content: row.get("content"),
        reply_count: row.get("reply_count"),
        media: Vec::new(),
        created_at: from_millis(row.get("created_at")),
        updated_at: from_millis(row.get("updated_at")),
    }
}

async fn hydrate(conn: &mut SqliteConnection, rows: &[SqliteRow]) -> Result<Vec<Review>> {
    let mut reviews = Vec::with_capacity(rows.len());
    for row in rows {
        let mut review = review_from_row(row);
        review.media = media::review_media(conn, review.id).await?;
        reviews.push(review);
    }
    Ok(reviews)
}

/// Load one review with its media.
pub async fn fetch_review(conn: &mut SqliteConnection, review_id: i64) -> Result<Option<Review>> {
    let row = sqlx::query(&format!("{} WHERE r.id = ?", REVIEW_SELECT))
        .bind(review_id)
        .fetch_optional(&mut *conn)
        .await?;

    match row {
        Some(row) => Ok(hydrate(conn, std::slice::from_ref(&row)).await?.pop()),
        None => Ok(None),
    }
}

async fn require_review(conn: &mut SqliteConnection, review_id: i64) -> Result<Review> {
    fetch_review(conn, review_id)
        .await?
        .ok_or_else(|| ReviewError::not_found("review", review_id))
}

/// Every review in the subtree rooted at `root_id`, root first.
///
/// Walks level by level, so it does not rely on the depth limit.
async fn collect_subtree(conn: &mut SqliteConnection, root_id: i64) -> Result<Vec<i64>> {
    let mut nodes = vec![root_id];
    let mut cursor = 0;
    while cursor < nodes.len() {
        let children: Vec<i64> =
            sqlx::query_scalar("SELECT id FROM reviews WHERE parent_review_id = ? ORDER BY id")
                .bind(nodes[cursor])
                .fetch_all(&mut *conn)
                .await?;
        nodes.extend(children);
        cursor += 1;
    }
    Ok(nodes)
}

/// Delete a review, all of its descendants, and every media row they own.
///
/// Media goes first for each node, then the rows are removed leaves
/// first. Derived fields are left to the caller.
pub(crate) async fn delete_subtree(
    conn: &mut SqliteConnection,
    media: &MediaManager,
    root_id: i64,
) -> Result<DeleteSummary> {
    let nodes = collect_subtree(conn, root_id).await?;
    let mut summary = DeleteSummary::default();

    for id in &nodes {
        let cleanup = media
            .cascade_delete_all(conn, ParentType::Review, *id)
            .await?;
        summary.media.absorb(cleanup);
    }

    for id in nodes.iter().rev() {
        let result = sqlx::query("DELETE FROM reviews WHERE id = ?")
            .bind(id)
            .execute(&mut *conn)
            .await?;
        summary.reviews_deleted += result.rows_affected();
    }

    Ok(summary)
}

fn validate_rating(rating: i64) -> Result<()> {
    if (1..=5).contains(&rating) {
        Ok(())
    } else {
        Err(ReviewError::bad_request(format!(
            "rating must be between 1 and 5, got {}",
            rating
        )))
    }
}

fn has_text(content: Option<&str>) -> bool {
    content.map(|c| !c.trim().is_empty()).unwrap_or(false)
}

pub struct ReviewStore {
    pool: SqlitePool,
    media: Arc<MediaManager>,
    consistency: ConsistencyMaintainer,
}

impl ReviewStore {
    pub fn new(pool: SqlitePool, media: Arc<MediaManager>, consistency: ConsistencyMaintainer) -> Self {
        Self {
            pool,
            media,
            consistency,
        }
    }

    /// Create a top-level review or a reply, with its uploads.
    ///
    /// A failure anywhere (validation, storage, recomputation, commit)
    /// leaves no review row, no media row and no stored file behind.
    pub async fn create(&self, actor: &Actor, new: NewReview) -> Result<ReviewWithUploads> {
        let mut tx = db::begin_write(&self.pool).await?;

        let shop = shops::shop_ref(&mut tx, new.shop_id).await?;
        users::ensure_user(&mut tx, actor.id).await?;

        let rating = match new.parent_review_id {
            Some(parent_id) => {
                let parent: Option<(i64, Option<i64>)> = sqlx::query_as(
                    "SELECT shop_id, parent_review_id FROM reviews WHERE id = ?",
                )
                .bind(parent_id)
                .fetch_optional(&mut *tx)
                .await?;
                let (parent_shop, grandparent) =
                    parent.ok_or_else(|| ReviewError::not_found("review", parent_id))?;

                if parent_shop != shop.id {
                    return Err(ReviewError::bad_request(format!(
                        "review {} does not belong to shop {}",
                        parent_id, shop.id
                    )));
                }
                if grandparent.is_some() {
                    return Err(ReviewError::bad_request("cannot reply to a reply"));
                }
                if new.rating.is_some() {
                    warn!(shop_id = shop.id, parent_id, "ignoring rating on reply");
                }
                None
            }
            None => {
                auth::ensure_not_self_review(actor, shop.owner_id, false)?;
                let rating = new
                    .rating
                    .ok_or_else(|| ReviewError::bad_request("a top-level review requires a rating"))?;
                validate_rating(rating)?;
                if !has_text(new.content.as_deref()) && new.files.iter().all(UploadFile::is_empty) {
                    return Err(ReviewError::bad_request(
                        "a review needs text content or at least one photo",
                    ));
                }
                Some(rating)
            }
        };

        let now = chrono::Utc::now().timestamp_millis();
        let result = sqlx::query(
            r#"
            INSERT INTO reviews (shop_id, user_id, parent_review_id, rating, content, reply_count, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, 0, ?, ?)
            "#,
        )
        .bind(shop.id)
        .bind(actor.id)
        .bind(new.parent_review_id)
        .bind(rating)
        .bind(new.content.as_deref())
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?;
        let review_id = result.last_insert_rowid();

        let uploads = self
            .media
            .attach(&mut tx, ParentType::Review, review_id, &new.files)
            .await?;

        let change = ReviewChange::Created {
            shop_id: shop.id,
            parent_review_id: new.parent_review_id,
            rating,
        };
        if let Err(e) = self.consistency.apply(&mut tx, change).await {
            self.media.discard_stored(&uploads).await;
            return Err(e);
        }

        let review = match require_review(&mut tx, review_id).await {
            Ok(review) => review,
            Err(e) => {
                self.media.discard_stored(&uploads).await;
                return Err(e);
            }
        };
        if let Err(e) = tx.commit().await {
            self.media.discard_stored(&uploads).await;
            return Err(e.into());
        }

        info!(
            review_id,
            shop_id = shop.id,
            author = actor.id,
            reply_to = ?new.parent_review_id,
            photos = uploads.accepted.len(),
            "review created"
        );
        Ok(ReviewWithUploads { review, uploads })
    }

    /// Edit content and/or rating. Only the author may edit.
    pub async fn update(&self, review_id: i64, actor: &Actor, edit: ReviewEdit) -> Result<Review> {
        let mut tx = db::begin_write(&self.pool).await?;
        let current = require_review(&mut tx, review_id).await?;
        auth::ensure_author(actor, current.user.id)?;

        let content_changed = match edit.content.as_deref() {
            Some(content) => current.content.as_deref() != Some(content),
            None => false,
        };

        let mut new_rating = current.rating;
        if let Some(rating) = edit.rating {
            if current.is_top_level() {
                validate_rating(rating)?;
                new_rating = Some(rating);
            } else {
                warn!(review_id, "ignoring rating on reply edit");
            }
        }
        let rating_changed = new_rating != current.rating;

        if !content_changed && !rating_changed {
            debug!(review_id, "edit changes nothing");
            return Ok(current);
        }

        let content = if content_changed {
            edit.content.clone()
        } else {
            current.content.clone()
        };

        sqlx::query("UPDATE reviews SET content = ?, rating = ?, updated_at = ? WHERE id = ?")
            .bind(content)
            .bind(new_rating)
            .bind(chrono::Utc::now().timestamp_millis())
            .bind(review_id)
            .execute(&mut *tx)
            .await?;

        self.consistency
            .apply(
                &mut tx,
                ReviewChange::Updated {
                    shop_id: current.shop_id,
                    top_level: current.is_top_level(),
                    rating_changed,
                },
            )
            .await?;

        let review = require_review(&mut tx, review_id).await?;
        tx.commit().await?;

        info!(review_id, content_changed, rating_changed, "review updated");
        Ok(review)
    }

    /// Delete a review with its whole subtree. Author or admin.
    pub async fn delete(&self, review_id: i64, actor: &Actor) -> Result<DeleteSummary> {
        let mut tx = db::begin_write(&self.pool).await?;
        let row: Option<(i64, i64, Option<i64>, Option<i64>)> = sqlx::query_as(
            "SELECT user_id, shop_id, parent_review_id, rating FROM reviews WHERE id = ?",
        )
        .bind(review_id)
        .fetch_optional(&mut *tx)
        .await?;
        let (author_id, shop_id, parent_review_id, rating) =
            row.ok_or_else(|| ReviewError::not_found("review", review_id))?;
        auth::ensure_author_or_admin(actor, author_id)?;

        let summary = delete_subtree(&mut tx, &self.media, review_id).await?;

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
        tx.commit().await?;

        if summary.media.files_failed > 0 {
            warn!(
                review_id,
                files_failed = summary.media.files_failed,
                "review deleted but some files could not be removed"
            );
        }
        info!(
            review_id,
            shop_id,
            actor = actor.id,
            reviews = summary.reviews_deleted,
            media = summary.media.rows_deleted,
            "review deleted"
        );
        Ok(summary)
    }

    pub async fn get(&self, review_id: i64) -> Result<Review> {
        let mut conn = self.pool.acquire().await?;
        require_review(&mut conn, review_id).await
    }

    /// One page of a shop's top-level reviews.
    pub async fn list_top_level(&self, shop_id: i64, page: PageRequest) -> Result<Page<Review>> {
        let offset = page_offset(page.page, page.size)?;

        let mut conn = self.pool.acquire().await?;
        shops::shop_ref(&mut conn, shop_id).await?;

        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM reviews WHERE shop_id = ? AND parent_review_id IS NULL",
        )
        .bind(shop_id)
        .fetch_one(&mut *conn)
        .await?;

        let dir = page.sort_dir.sql();
        let sql = format!(
            "{} WHERE r.shop_id = ? AND r.parent_review_id IS NULL ORDER BY {} {}, r.id {} LIMIT ? OFFSET ?",
            REVIEW_SELECT,
            page.sort_field.column(),
            dir,
            dir
        );
        let rows = sqlx::query(&sql)
            .bind(shop_id)
            .bind(page.size)
            .bind(offset)
            .fetch_all(&mut *conn)
            .await?;

        let content = hydrate(&mut conn, &rows).await?;
        Ok(Page::new(content, page.page, page.size, total))
    }

    /// Direct replies of a review, oldest first.
    pub async fn list_replies(&self, parent_review_id: i64) -> Result<Vec<Review>> {
        let mut conn = self.pool.acquire().await?;
        let exists: Option<i64> = sqlx::query_scalar("SELECT id FROM reviews WHERE id = ?")
            .bind(parent_review_id)
            .fetch_optional(&mut *conn)
            .await?;
        if exists.is_none() {
            return Err(ReviewError::not_found("review", parent_review_id));
        }

        let rows = sqlx::query(&format!(
            "{} WHERE r.parent_review_id = ? ORDER BY r.created_at ASC, r.id ASC",
            REVIEW_SELECT
        ))
        .bind(parent_review_id)
        .fetch_all(&mut *conn)
        .await?;

        hydrate(&mut conn, &rows).await
    }

    /// Reviews and replies written by a user, newest first.
    pub async fn list_user_reviews(&self, user_id: i64, page: i64, size: i64) -> Result<Page<Review>> {
        let offset = page_offset(page, size)?;

        let mut conn = self.pool.acquire().await?;
        users::ensure_user(&mut conn, user_id).await?;

        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM reviews WHERE user_id = ?")
            .bind(user_id)
            .fetch_one(&mut *conn)
            .await?;

        let rows = sqlx::query(&format!(
            "{} WHERE r.user_id = ? ORDER BY r.created_at DESC, r.id DESC LIMIT ? OFFSET ?",
            REVIEW_SELECT
        ))
        .bind(user_id)
        .bind(size)
        .bind(offset)
        .fetch_all(&mut *conn)
        .await?;

        let content = hydrate(&mut conn, &rows).await?;
        Ok(Page::new(content, page, size, total))
    }

    /// Attach more photos to an existing review. Author or admin.
    pub async fn add_media(
        &self,
        review_id: i64,
        actor: &Actor,
        files: &[UploadFile],
    ) -> Result<ReviewWithUploads> {
        if files.iter().all(UploadFile::is_empty) {
            return Err(ReviewError::bad_request("at least one non-empty file is required"));
        }

        let mut tx = db::begin_write(&self.pool).await?;
        let author_id: Option<i64> = sqlx::query_scalar("SELECT user_id FROM reviews WHERE id = ?")
            .bind(review_id)
            .fetch_optional(&mut *tx)
            .await?;
        let author_id = author_id.ok_or_else(|| ReviewError::not_found("review", review_id))?;
        auth::ensure_author_or_admin(actor, author_id)?;

        let uploads = self
            .media
            .attach(&mut tx, ParentType::Review, review_id, files)
            .await?;
        let review = match require_review(&mut tx, review_id).await {
            Ok(review) => review,
            Err(e) => {
                self.media.discard_stored(&uploads).await;
                return Err(e);
            }
        };
        if let Err(e) = tx.commit().await {
            self.media.discard_stored(&uploads).await;
            return Err(e.into());
        }

        Ok(ReviewWithUploads { review, uploads })
    }

    /// Remove one photo from a review. Author or admin.
    pub async fn delete_media(&self, review_id: i64, actor: &Actor, media_id: i64) -> Result<MediaCleanup> {
        let mut tx = db::begin_write(&self.pool).await?;
        let author_id: Option<i64> = sqlx::query_scalar("SELECT user_id FROM reviews WHERE id = ?")
            .bind(review_id)
            .fetch_optional(&mut *tx)
            .await?;
        let author_id = author_id.ok_or_else(|| ReviewError::not_found("review", review_id))?;
        auth::ensure_author_or_admin(actor, author_id)?;

        let cleanup = self
            .media
            .detach(&mut tx, ParentType::Review, review_id, media_id)
            .await?;
        tx.commit().await?;
        Ok(cleanup)
    }
}
