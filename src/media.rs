//! Media lifecycle management.
//!
//! Binds uploaded files to a review or a shop. Every media row is created
//! inside the caller's transaction, right after its file is stored, and
//! removed only after its file deletion has been attempted.
//!
//! # Upload policy
//!
//! Batches are lenient. A file that is empty, of the wrong type, too
//! large, or beyond the per-review quota is skipped and reported in
//! [`AttachOutcome::skipped`]; the rest of the batch proceeds. A storage
//! failure, on the other hand, fails the whole call so the enclosing
//! transaction rolls back.
//!
//! | Parent | Types | Size limit | Count limit |
//! |--------|-------|------------|-------------|
//! | review | `image/*` | `media.max_review_image_bytes` | `media.max_review_images` |
//! | shop | `image/*`, `video/*` | `media.max_shop_file_bytes` | none |
//!
//! # Deletion
//!
//! File deletion is best-effort: a missing file or a failing delete is
//! logged and counted in [`MediaCleanup`], and the row is deleted anyway.

use std::sync::Arc;

use sqlx::{Row, SqliteConnection};
use tracing::{debug, error, info, warn};

use crate::config::MediaConfig;
use crate::error::{ReviewError, Result};
use crate::models::{
    AcceptedMedia, AttachOutcome, MediaCleanup, MediaKind, ParentType, ReviewMedia,
    ShopMedia, SkipReason, SkippedFile, UploadFile,
};
use crate::storage::FileStorage;

/// Per-parent-type acceptance rules.
#[derive(Debug, Clone, Copy)]
pub struct MediaPolicy {
    pub max_files: Option<i64>,
    pub max_bytes: u64,
    pub allow_video: bool,
}

impl MediaPolicy {
    pub fn for_reviews(config: &MediaConfig) -> Self {
        Self {
            max_files: Some(config.max_review_images),
            max_bytes: config.max_review_image_bytes,
            allow_video: false,
        }
    }

    pub fn for_shops(config: &MediaConfig) -> Self {
        Self {
            max_files: None,
            max_bytes: config.max_shop_file_bytes,
            allow_video: true,
        }
    }

    /// Decide whether a single file is acceptable, ignoring quota.
    pub fn classify(&self, file: &UploadFile) -> std::result::Result<MediaKind, SkipReason> {
        if file.is_empty() {
            return Err(SkipReason::Empty);
        }
        let kind = file
            .content_type
            .as_deref()
            .and_then(MediaKind::from_content_type)
            .ok_or(SkipReason::UnsupportedType)?;
        if kind == MediaKind::Video && !self.allow_video {
            return Err(SkipReason::UnsupportedType);
        }
        if file.size() > self.max_bytes {
            return Err(SkipReason::TooLarge);
        }
        Ok(kind)
    }
}

/// How a single best-effort file deletion went.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileDeletion {
    Deleted,
    Missing,
    Failed,
}

pub struct MediaManager {
    storage: Arc<dyn FileStorage>,
    review_policy: MediaPolicy,
    shop_policy: MediaPolicy,
}

impl MediaManager {
    pub fn new(storage: Arc<dyn FileStorage>, config: &MediaConfig) -> Self {
        Self {
            storage,
            review_policy: MediaPolicy::for_reviews(config),
            shop_policy: MediaPolicy::for_shops(config),
        }
    }

    pub fn storage(&self) -> &Arc<dyn FileStorage> {
        &self.storage
    }

    pub fn policy(&self, parent: ParentType) -> &MediaPolicy {
        match parent {
            ParentType::Review => &self.review_policy,
            ParentType::Shop => &self.shop_policy,
        }
    }

    /// Store files and insert their rows under `parent_id`.
    ///
    /// On a storage failure the files already stored by this call are
    /// removed again (best-effort) and `FileStorage` is returned; the
    /// caller's transaction then discards the rows.
    pub async fn attach(
        &self,
        conn: &mut SqliteConnection,
        parent: ParentType,
        parent_id: i64,
        files: &[UploadFile],
    ) -> Result<AttachOutcome> {
        let policy = *self.policy(parent);
        let existing = count_media(conn, parent, parent_id).await?;
        let remaining = policy.max_files.map(|max| (max - existing).max(0));
        let namespace = parent.namespace(parent_id);
        let now = chrono::Utc::now().timestamp_millis();

        let mut outcome = AttachOutcome::default();
        let mut next_order = existing;

        for file in files {
            if let Some(remaining) = remaining {
                if outcome.accepted.len() as i64 >= remaining {
                    outcome.skipped.push(SkippedFile {
                        file_name: file.file_name.clone(),
                        reason: SkipReason::QuotaExhausted,
                    });
                    continue;
                }
            }

            let kind = match policy.classify(file) {
                Ok(kind) => kind,
                Err(reason) => {
                    warn!(
                        parent = parent.entity(),
                        parent_id,
                        file = %file.file_name,
                        ?reason,
                        "skipping upload"
                    );
                    outcome.skipped.push(SkippedFile {
                        file_name: file.file_name.clone(),
                        reason,
                    });
                    continue;
                }
            };

            let url = match self.storage.store(file, &namespace).await {
                Ok(url) => url,
                Err(e) => {
                    error!(
                        parent = parent.entity(),
                        parent_id,
                        file = %file.file_name,
                        "storing upload failed: {:#}",
                        e
                    );
                    self.discard_stored(&outcome).await;
                    return Err(ReviewError::FileStorage(format!(
                        "failed to store {}: {:#}",
                        file.file_name, e
                    )));
                }
            };

            let inserted = match parent {
                ParentType::Review => {
                    sqlx::query(
                        "INSERT INTO review_media (review_id, kind, url, created_at) VALUES (?, ?, ?, ?)",
                    )
                    .bind(parent_id)
                    .bind(kind.as_str())
                    .bind(&url)
                    .bind(now)
                    .execute(&mut *conn)
                    .await
                }
                ParentType::Shop => {
                    let order = next_order;
                    next_order += 1;
                    sqlx::query(
                        "INSERT INTO shop_media (shop_id, kind, url, display_order, created_at) VALUES (?, ?, ?, ?, ?)",
                    )
                    .bind(parent_id)
                    .bind(kind.as_str())
                    .bind(&url)
                    .bind(order)
                    .bind(now)
                    .execute(&mut *conn)
                    .await
                }
            };

            let id = match inserted {
                Ok(result) => result.last_insert_rowid(),
                Err(e) => {
                    // The file is stored but has no row; take it back out.
                    self.delete_file_best_effort(&url).await;
                    self.discard_stored(&outcome).await;
                    return Err(e.into());
                }
            };

            debug!(parent = parent.entity(), parent_id, media_id = id, path = %url, "media attached");
            outcome.accepted.push(AcceptedMedia {
                id,
                kind,
                url,
                file_name: file.file_name.clone(),
            });
        }

        if !outcome.skipped.is_empty() {
            info!(
                parent = parent.entity(),
                parent_id,
                accepted = outcome.accepted.len(),
                skipped = outcome.skipped.len(),
                "upload batch partially accepted"
            );
        }

        Ok(outcome)
    }

    /// Remove one media row (and its file) that must belong to `parent_id`.
    pub async fn detach(
        &self,
        conn: &mut SqliteConnection,
        parent: ParentType,
        parent_id: i64,
        media_id: i64,
    ) -> Result<MediaCleanup> {
        let sql = format!(
            "SELECT url FROM {} WHERE id = ? AND {} = ?",
            parent.media_table(),
            parent.media_fk()
        );
        let url: Option<String> = sqlx::query_scalar(&sql)
            .bind(media_id)
            .bind(parent_id)
            .fetch_optional(&mut *conn)
            .await?;
        let url = url.ok_or_else(|| ReviewError::not_found("media", media_id))?;

        let mut cleanup = MediaCleanup::default();
        self.tally(&mut cleanup, self.delete_file_best_effort(&url).await);

        let sql = format!("DELETE FROM {} WHERE id = ?", parent.media_table());
        let result = sqlx::query(&sql).bind(media_id).execute(&mut *conn).await?;
        cleanup.rows_deleted = result.rows_affected();

        info!(parent = parent.entity(), parent_id, media_id, "media detached");
        Ok(cleanup)
    }

    /// Remove every media row and file owned by `parent_id`.
    pub async fn cascade_delete_all(
        &self,
        conn: &mut SqliteConnection,
        parent: ParentType,
        parent_id: i64,
    ) -> Result<MediaCleanup> {
        let sql = format!(
            "SELECT url FROM {} WHERE {} = ? ORDER BY id",
            parent.media_table(),
            parent.media_fk()
        );
        let urls: Vec<String> = sqlx::query_scalar(&sql)
            .bind(parent_id)
            .fetch_all(&mut *conn)
            .await?;

        let mut cleanup = MediaCleanup::default();
        if urls.is_empty() {
            return Ok(cleanup);
        }

        for url in &urls {
            let deletion = self.delete_file_best_effort(url).await;
            self.tally(&mut cleanup, deletion);
        }

        let sql = format!(
            "DELETE FROM {} WHERE {} = ?",
            parent.media_table(),
            parent.media_fk()
        );
        let result = sqlx::query(&sql).bind(parent_id).execute(&mut *conn).await?;
        cleanup.rows_deleted = result.rows_affected();

        info!(
            parent = parent.entity(),
            parent_id,
            rows = cleanup.rows_deleted,
            files_deleted = cleanup.files_deleted,
            files_failed = cleanup.files_failed,
            "media cascade deleted"
        );
        Ok(cleanup)
    }

    /// Best-effort removal of files whose rows are about to be rolled back.
    pub async fn discard_stored(&self, outcome: &AttachOutcome) {
        for media in &outcome.accepted {
            self.delete_file_best_effort(&media.url).await;
        }
    }

    async fn delete_file_best_effort(&self, url: &str) -> FileDeletion {
        if url.trim().is_empty() {
            warn!("media row has an empty path");
            return FileDeletion::Missing;
        }
        match self.storage.delete(url).await {
            Ok(true) => FileDeletion::Deleted,
            Ok(false) => {
                warn!(path = %url, "media file already missing");
                FileDeletion::Missing
            }
            Err(e) => {
                error!(path = %url, "deleting media file failed: {:#}", e);
                FileDeletion::Failed
            }
        }
    }

    fn tally(&self, cleanup: &mut MediaCleanup, deletion: FileDeletion) {
        match deletion {
            FileDeletion::Deleted => cleanup.files_deleted += 1,
            FileDeletion::Missing => cleanup.files_missing += 1,
            FileDeletion::Failed => cleanup.files_failed += 1,
        }
    }
}

pub async fn count_media(conn: &mut SqliteConnection, parent: ParentType, parent_id: i64) -> Result<i64> {
    let sql = format!(
        "SELECT COUNT(*) FROM {} WHERE {} = ?",
        parent.media_table(),
        parent.media_fk()
    );
    let count: i64 = sqlx::query_scalar(&sql)
        .bind(parent_id)
        .fetch_one(&mut *conn)
        .await?;
    Ok(count)
}

pub async fn review_media(conn: &mut SqliteConnection, review_id: i64) -> Result<Vec<ReviewMedia>> {
    let rows = sqlx::query("SELECT id, review_id, kind, url FROM review_media WHERE review_id = ? ORDER BY id")
        .bind(review_id)
        .fetch_all(&mut *conn)
        .await?;

    Ok(rows
        .iter()
        .map(|row| ReviewMedia {
            id: row.get("id"),
            review_id: row.get("review_id"),
            kind: MediaKind::parse(row.get::<&str, _>("kind")).unwrap_or(MediaKind::Image),
            url: row.get("url"),
        })
        .collect())
}

pub async fn shop_media(conn: &mut SqliteConnection, shop_id: i64) -> Result<Vec<ShopMedia>> {
    let rows = sqlx::query(
        "SELECT id, shop_id, kind, url, display_order FROM shop_media WHERE shop_id = ? ORDER BY display_order, id",
    )
    .bind(shop_id)
    .fetch_all(&mut *conn)
    .await?;

    Ok(rows
        .iter()
        .map(|row| ShopMedia {
            id: row.get("id"),
            shop_id: row.get("shop_id"),
            kind: MediaKind::parse(row.get::<&str, _>("kind")).unwrap_or(MediaKind::Image),
            url: row.get("url"),
            display_order: row.get("display_order"),
        })
        .collect())
}
