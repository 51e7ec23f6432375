//! Shop repository: lookups, listing and editing, shop media, ranking,
//! and administrative rating repair.
//!
//! Shop creation here is plain plumbing (no geocoding). What matters to
//! the engine is that a shop's rating fields are set by the aggregator
//! from the start and that deleting a shop takes its reviews and media
//! down in the same transaction.

use std::str::FromStr;
use std::sync::Arc;

use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};
use tracing::{debug, info, warn};

use crate::auth::{self, Actor};
use crate::consistency::ConsistencyMaintainer;
use crate::db;
use crate::error::{ReviewError, Result};
use crate::media::{self, MediaManager};
use crate::models::{
    from_millis, page_offset, AttachOutcome, MediaCleanup, Page, ParentType, Shop, UploadFile,
};
use crate::rating::{self, RatingSummary};
use crate::reviews;
use crate::users;

/// The parts of a shop the review engine needs for its checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShopRef {
    pub id: i64,
    pub owner_id: Option<i64>,
}

/// Existence check plus owner lookup. `NotFound` if the shop is absent.
pub async fn shop_ref(conn: &mut SqliteConnection, shop_id: i64) -> Result<ShopRef> {
    let row = sqlx::query("SELECT id, owner_id FROM shops WHERE id = ?")
        .bind(shop_id)
        .fetch_optional(&mut *conn)
        .await?;

    match row {
        Some(row) => Ok(ShopRef {
            id: row.get("id"),
            owner_id: row.get("owner_id"),
        }),
        None => Err(ReviewError::not_found("shop", shop_id)),
    }
}

/// A shop as returned with the uploads it just received.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShopWithUploads {
    pub shop: Shop,
    pub uploads: AttachOutcome,
}

/// What deleting a shop removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShopDeleteSummary {
    pub reviews_deleted: u64,
    pub media: MediaCleanup,
}

/// Substring filters for [`ShopStore::list_shops`]. Blank values are
/// ignored; matching is case-insensitive.
#[derive(Debug, Clone, Default)]
pub struct ShopFilter {
    pub name: Option<String>,
    pub address: Option<String>,
}

/// Fields an owner may change. `None` keeps the stored value.
#[derive(Debug, Clone, Default)]
pub struct ShopEdit {
    pub name: Option<String>,
    pub address: Option<String>,
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

const SHOP_SELECT: &str = "SELECT id, name, address, owner_id, review_count, average_rating, weighted_rating, created_at, updated_at FROM shops";

fn parse_decimal(row: &SqliteRow, column: &str) -> Result<Decimal> {
    let raw: String = row.get(column);
    Decimal::from_str(&raw).map_err(|e| {
        ReviewError::Consistency(format!("stored {} {:?} is not a decimal: {}", column, raw, e))
    })
}

fn shop_from_row(row: &SqliteRow) -> Result<Shop> {
    Ok(Shop {
        id: row.get("id"),
        name: row.get("name"),
        address: row.get("address"),
        owner_id: row.get("owner_id"),
        review_count: row.get("review_count"),
        average_rating: parse_decimal(row, "average_rating")?,
        weighted_rating: parse_decimal(row, "weighted_rating")?,
        media: Vec::new(),
        created_at: from_millis(row.get("created_at")),
        updated_at: from_millis(row.get("updated_at")),
    })
}

pub async fn fetch_shop(conn: &mut SqliteConnection, shop_id: i64) -> Result<Option<Shop>> {
    let row = sqlx::query(&format!("{} WHERE id = ?", SHOP_SELECT))
        .bind(shop_id)
        .fetch_optional(&mut *conn)
        .await?;

    let mut shop = match row {
        Some(row) => shop_from_row(&row)?,
        None => return Ok(None),
    };
    shop.media = media::shop_media(conn, shop_id).await?;
    Ok(Some(shop))
}

pub struct ShopStore {
    pool: SqlitePool,
    media: Arc<MediaManager>,
    consistency: ConsistencyMaintainer,
    min_reviews_for_ranking: i64,
}

impl ShopStore {
    pub fn new(
        pool: SqlitePool,
        media: Arc<MediaManager>,
        consistency: ConsistencyMaintainer,
        min_reviews_for_ranking: i64,
    ) -> Self {
        Self {
            pool,
            media,
            consistency,
            min_reviews_for_ranking,
        }
    }

    pub async fn create_shop(&self, name: &str, address: &str, owner_id: Option<i64>) -> Result<Shop> {
        if name.trim().is_empty() {
            return Err(ReviewError::bad_request("shop name must not be empty"));
        }

        let mut tx = db::begin_write(&self.pool).await?;
        if let Some(owner) = owner_id {
            users::ensure_user(&mut tx, owner).await?;
        }

        let now = chrono::Utc::now().timestamp_millis();
        let result = sqlx::query(
            "INSERT INTO shops (name, address, owner_id, created_at, updated_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(name.trim())
        .bind(address.trim())
        .bind(owner_id)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?;
        let id = result.last_insert_rowid();

        // Aggregates start out as the prior, not as hand-written zeros.
        rating::recompute(&mut tx, id, self.consistency.prior()).await?;
        tx.commit().await?;

        info!(shop_id = id, name = name.trim(), "shop created");
        self.get_shop(id).await
    }

    pub async fn get_shop(&self, shop_id: i64) -> Result<Shop> {
        let mut conn = self.pool.acquire().await?;
        fetch_shop(&mut conn, shop_id)
            .await?
            .ok_or_else(|| ReviewError::not_found("shop", shop_id))
    }

    /// One page of shops in id order, optionally filtered by name and
    /// address.
    pub async fn list_shops(&self, filter: &ShopFilter, page: i64, size: i64) -> Result<Page<Shop>> {
        let offset = page_offset(page, size)?;
        let name = non_blank(filter.name.as_deref());
        let address = non_blank(filter.address.as_deref());

        let mut clauses = Vec::new();
        if name.is_some() {
            clauses.push("name LIKE '%' || ? || '%'");
        }
        if address.is_some() {
            clauses.push("address LIKE '%' || ? || '%'");
        }
        let condition = if clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", clauses.join(" AND "))
        };

        let mut conn = self.pool.acquire().await?;

        let count_sql = format!("SELECT COUNT(*) FROM shops{}", condition);
        let mut count = sqlx::query_scalar::<_, i64>(&count_sql);
        for value in [name, address].into_iter().flatten() {
            count = count.bind(value);
        }
        let total = count.fetch_one(&mut *conn).await?;

        let sql = format!("{}{} ORDER BY id ASC LIMIT ? OFFSET ?", SHOP_SELECT, condition);
        let mut query = sqlx::query(&sql);
        for value in [name, address].into_iter().flatten() {
            query = query.bind(value);
        }
        let rows = query.bind(size).bind(offset).fetch_all(&mut *conn).await?;

        let mut shops = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut shop = shop_from_row(row)?;
            shop.media = media::shop_media(&mut conn, shop.id).await?;
            shops.push(shop);
        }
        Ok(Page::new(shops, page, size, total))
    }

    /// Rename or move a shop. Owner or admin. Rating fields are untouched.
    pub async fn update_shop(&self, shop_id: i64, actor: &Actor, edit: ShopEdit) -> Result<Shop> {
        if matches!(edit.name.as_deref(), Some(name) if name.trim().is_empty()) {
            return Err(ReviewError::bad_request("shop name must not be empty"));
        }

        let mut tx = db::begin_write(&self.pool).await?;
        let current = fetch_shop(&mut tx, shop_id)
            .await?
            .ok_or_else(|| ReviewError::not_found("shop", shop_id))?;
        auth::ensure_shop_owner_or_admin(actor, current.owner_id)?;

        let name = edit.name.as_deref().map(str::trim).unwrap_or(current.name.as_str());
        let address = edit.address.as_deref().map(str::trim).unwrap_or(current.address.as_str());
        if name == current.name && address == current.address {
            debug!(shop_id, "shop edit changes nothing");
            return Ok(current);
        }

        sqlx::query("UPDATE shops SET name = ?, address = ?, updated_at = ? WHERE id = ?")
            .bind(name)
            .bind(address)
            .bind(chrono::Utc::now().timestamp_millis())
            .bind(shop_id)
            .execute(&mut *tx)
            .await?;
        let shop = fetch_shop(&mut tx, shop_id)
            .await?
            .ok_or_else(|| ReviewError::not_found("shop", shop_id))?;
        tx.commit().await?;

        info!(shop_id, actor = actor.id, "shop updated");
        Ok(shop)
    }

    /// Shops with at least `min_reviews_for_ranking` reviews, best
    /// weighted rating first. `region` filters on the address.
    pub async fn top_rated(&self, limit: i64, region: Option<&str>) -> Result<Vec<Shop>> {
        if !(1..=100).contains(&limit) {
            return Err(ReviewError::bad_request("limit must be between 1 and 100"));
        }

        let region = region.map(str::trim).filter(|r| !r.is_empty());
        let mut conn = self.pool.acquire().await?;

        let sql = format!(
            r#"{} WHERE review_count >= ? {}
            ORDER BY CAST(weighted_rating AS REAL) DESC, review_count DESC, id ASC
            LIMIT ?"#,
            SHOP_SELECT,
            if region.is_some() {
                "AND address LIKE '%' || ? || '%'"
            } else {
                ""
            }
        );

        let mut query = sqlx::query(&sql).bind(self.min_reviews_for_ranking);
        if let Some(region) = region {
            query = query.bind(region);
        }
        let rows = query.bind(limit).fetch_all(&mut *conn).await?;

        let mut shops = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut shop = shop_from_row(row)?;
            shop.media = media::shop_media(&mut conn, shop.id).await?;
            shops.push(shop);
        }
        Ok(shops)
    }

    /// Recompute one shop's rating in its own transaction.
    pub async fn recompute_rating(&self, shop_id: i64) -> Result<RatingSummary> {
        let mut tx = db::begin_write(&self.pool).await?;
        let summary = rating::recompute(&mut tx, shop_id, self.consistency.prior()).await?;
        tx.commit().await?;
        Ok(summary)
    }

    /// Recompute every shop. Returns how many were processed.
    pub async fn recompute_all(&self) -> Result<usize> {
        let ids: Vec<i64> = sqlx::query_scalar("SELECT id FROM shops ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        for id in &ids {
            self.recompute_rating(*id).await?;
        }
        Ok(ids.len())
    }

    pub async fn add_media(
        &self,
        shop_id: i64,
        actor: &Actor,
        files: &[UploadFile],
    ) -> Result<ShopWithUploads> {
        if files.iter().all(UploadFile::is_empty) {
            return Err(ReviewError::bad_request("at least one non-empty file is required"));
        }

        let mut tx = db::begin_write(&self.pool).await?;
        let shop = shop_ref(&mut tx, shop_id).await?;
        auth::ensure_shop_owner_or_admin(actor, shop.owner_id)?;

        let uploads = self
            .media
            .attach(&mut tx, ParentType::Shop, shop_id, files)
            .await?;
        if let Err(e) = tx.commit().await {
            self.media.discard_stored(&uploads).await;
            return Err(e.into());
        }

        Ok(ShopWithUploads {
            shop: self.get_shop(shop_id).await?,
            uploads,
        })
    }

    pub async fn delete_media(&self, shop_id: i64, actor: &Actor, media_id: i64) -> Result<MediaCleanup> {
        let mut tx = db::begin_write(&self.pool).await?;
        let shop = shop_ref(&mut tx, shop_id).await?;
        auth::ensure_shop_owner_or_admin(actor, shop.owner_id)?;

        let cleanup = self
            .media
            .detach(&mut tx, ParentType::Shop, shop_id, media_id)
            .await?;
        tx.commit().await?;
        Ok(cleanup)
    }

    /// Delete a shop with every review, reply and media row it owns.
    pub async fn delete_shop(&self, shop_id: i64, actor: &Actor) -> Result<ShopDeleteSummary> {
        auth::ensure_admin(actor)?;

        let mut tx = db::begin_write(&self.pool).await?;
        shop_ref(&mut tx, shop_id).await?;
        let summary = delete_shop_rows(&mut tx, &self.media, shop_id).await?;
        tx.commit().await?;

        if summary.media.files_failed > 0 {
            warn!(
                shop_id,
                files_failed = summary.media.files_failed,
                "shop deleted but some files could not be removed"
            );
        }
        info!(
            shop_id,
            actor = actor.id,
            reviews = summary.reviews_deleted,
            "shop deleted"
        );
        Ok(summary)
    }
}

/// Remove a shop's media, its review trees and the shop row on the
/// caller's transaction.
pub(crate) async fn delete_shop_rows(
    conn: &mut SqliteConnection,
    media: &MediaManager,
    shop_id: i64,
) -> Result<ShopDeleteSummary> {
    let mut summary = ShopDeleteSummary {
        media: media
            .cascade_delete_all(conn, ParentType::Shop, shop_id)
            .await?,
        ..Default::default()
    };

    let roots: Vec<i64> = sqlx::query_scalar(
        "SELECT id FROM reviews WHERE shop_id = ? AND parent_review_id IS NULL ORDER BY id",
    )
    .bind(shop_id)
    .fetch_all(&mut *conn)
    .await?;

    for root in roots {
        let removed = reviews::delete_subtree(conn, media, root).await?;
        summary.reviews_deleted += removed.reviews_deleted;
        summary.media.absorb(removed.media);
    }

    sqlx::query("DELETE FROM shops WHERE id = ?")
        .bind(shop_id)
        .execute(&mut *conn)
        .await?;
    Ok(summary)
}
