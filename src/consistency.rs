//! Derived-field maintenance for review mutations.
//!
//! Review mutations describe what happened as a [`ReviewChange`]; this
//! module decides which derived fields that invalidates and recomputes
//! them on the mutation's own connection, so they commit or roll back
//! together with it.
//!
//! | Change | Effect |
//! |--------|--------|
//! | reply created / deleted | recompute the direct parent's `reply_count` |
//! | top-level review created / deleted with a rating | recompute the shop rating |
//! | top-level rating edited to a different value | recompute the shop rating |
//! | anything else, including no-op edits | nothing |

use sqlx::SqliteConnection;
use tracing::debug;

use crate::error::{ReviewError, Result};
use crate::rating::{self, RatingPrior, RatingSummary};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewChange {
    Created {
        shop_id: i64,
        parent_review_id: Option<i64>,
        rating: Option<i64>,
    },
    Updated {
        shop_id: i64,
        top_level: bool,
        rating_changed: bool,
    },
    Deleted {
        shop_id: i64,
        parent_review_id: Option<i64>,
        had_rating: bool,
    },
}

/// Derived fields a change invalidates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Effects {
    pub reply_count_of: Option<i64>,
    pub rating_of_shop: Option<i64>,
}

impl Effects {
    pub fn is_empty(&self) -> bool {
        self.reply_count_of.is_none() && self.rating_of_shop.is_none()
    }
}

impl ReviewChange {
    pub fn effects(&self) -> Effects {
        match *self {
            ReviewChange::Created {
                shop_id,
                parent_review_id,
                rating,
            } => match parent_review_id {
                Some(parent) => Effects {
                    reply_count_of: Some(parent),
                    rating_of_shop: None,
                },
                None => Effects {
                    reply_count_of: None,
                    rating_of_shop: rating.map(|_| shop_id),
                },
            },
            ReviewChange::Updated {
                shop_id,
                top_level,
                rating_changed,
            } => Effects {
                reply_count_of: None,
                rating_of_shop: (top_level && rating_changed).then_some(shop_id),
            },
            ReviewChange::Deleted {
                shop_id,
                parent_review_id,
                had_rating,
            } => match parent_review_id {
                Some(parent) => Effects {
                    reply_count_of: Some(parent),
                    rating_of_shop: None,
                },
                None => Effects {
                    reply_count_of: None,
                    rating_of_shop: had_rating.then_some(shop_id),
                },
            },
        }
    }
}

/// What [`ConsistencyMaintainer::apply`] actually recomputed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Applied {
    pub reply_count: Option<i64>,
    pub rating: Option<RatingSummary>,
}

#[derive(Debug, Clone, Copy)]
pub struct ConsistencyMaintainer {
    prior: RatingPrior,
}

impl ConsistencyMaintainer {
    pub fn new(prior: RatingPrior) -> Self {
        Self { prior }
    }

    pub fn prior(&self) -> &RatingPrior {
        &self.prior
    }

    /// Recompute whatever `change` invalidates.
    ///
    /// Any failure comes back as [`ReviewError::Consistency`]; the caller
    /// must drop its transaction so the triggering write is undone too.
    pub async fn apply(&self, conn: &mut SqliteConnection, change: ReviewChange) -> Result<Applied> {
        let effects = change.effects();
        let mut applied = Applied::default();
        if effects.is_empty() {
            return Ok(applied);
        }

        if let Some(parent_id) = effects.reply_count_of {
            let count = refresh_reply_count(conn, parent_id).await.map_err(|e| {
                ReviewError::Consistency(format!(
                    "reply count of review {} could not be refreshed: {}",
                    parent_id, e
                ))
            })?;
            debug!(review_id = parent_id, reply_count = count, "reply count refreshed");
            applied.reply_count = Some(count);
        }

        if let Some(shop_id) = effects.rating_of_shop {
            let summary = rating::recompute(conn, shop_id, &self.prior)
                .await
                .map_err(|e| {
                    ReviewError::Consistency(format!(
                        "rating of shop {} could not be recomputed: {}",
                        shop_id, e
                    ))
                })?;
            applied.rating = Some(summary);
        }

        Ok(applied)
    }
}

/// Set `reply_count` of a review to the live number of its direct replies.
pub async fn refresh_reply_count(conn: &mut SqliteConnection, review_id: i64) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM reviews WHERE parent_review_id = ?")
        .bind(review_id)
        .fetch_one(&mut *conn)
        .await?;

    let result = sqlx::query("UPDATE reviews SET reply_count = ? WHERE id = ?")
        .bind(count)
        .bind(review_id)
        .execute(&mut *conn)
        .await?;
    if result.rows_affected() == 0 {
        return Err(ReviewError::not_found("review", review_id));
    }

    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reply_create_touches_parent_only() {
        let e = ReviewChange::Created {
            shop_id: 1,
            parent_review_id: Some(10),
            rating: Some(5),
        }
        .effects();
        assert_eq!(e.reply_count_of, Some(10));
        assert_eq!(e.rating_of_shop, None);
    }

    #[test]
    fn test_rated_top_level_create_recomputes_shop() {
        let e = ReviewChange::Created {
            shop_id: 1,
            parent_review_id: None,
            rating: Some(4),
        }
        .effects();
        assert_eq!(e.rating_of_shop, Some(1));
        assert_eq!(e.reply_count_of, None);
    }

    #[test]
    fn test_unchanged_rating_edit_does_nothing() {
        let e = ReviewChange::Updated {
            shop_id: 1,
            top_level: true,
            rating_changed: false,
        }
        .effects();
        assert!(e.is_empty());
    }

    #[test]
    fn test_reply_edit_never_recomputes() {
        let e = ReviewChange::Updated {
            shop_id: 1,
            top_level: false,
            rating_changed: true,
        }
        .effects();
        assert!(e.is_empty());
    }

    #[test]
    fn test_delete_rules() {
        let reply = ReviewChange::Deleted {
            shop_id: 1,
            parent_review_id: Some(3),
            had_rating: false,
        }
        .effects();
        assert_eq!(reply.reply_count_of, Some(3));
        assert_eq!(reply.rating_of_shop, None);

        let rated = ReviewChange::Deleted {
            shop_id: 1,
            parent_review_id: None,
            had_rating: true,
        }
        .effects();
        assert_eq!(rated.rating_of_shop, Some(1));

        let unrated = ReviewChange::Deleted {
            shop_id: 1,
            parent_review_id: None,
            had_rating: false,
        }
        .effects();
        assert!(unrated.is_empty());
    }
}
