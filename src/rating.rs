//! Rating aggregation.
//!
//! A shop's `review_count`, `average_rating` and `weighted_rating` are
//! derived from its rated top-level reviews and nothing else. They are
//! always fully recomputed from the committed review set, never adjusted
//! incrementally, so two racing recomputations both land on a correct
//! value and the next trigger heals any interleaving.
//!
//! # Weighted rating
//!
//! With `v` ratings of mean `R`, prior weight `m` and prior mean `C`:
//!
//! ```text
//! weighted = v/(v+m) * R + m/(v+m) * C
//!          = (sum + m*C) / (v+m)
//! ```
//!
//! The second form is what gets evaluated: one division keeps the result
//! exact before rounding to 7 places. Shops with few reviews are pulled
//! toward `C`, so a single 5-star review cannot outrank a shop with many
//! 4-star ones.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;
use sqlx::{Row, SqliteConnection};
use tracing::{debug, info};

use crate::config::RatingConfig;
use crate::error::{ReviewError, Result};

pub const AVERAGE_SCALE: u32 = 2;
pub const WEIGHTED_SCALE: u32 = 7;

/// Bayesian prior for the weighted score.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RatingPrior {
    /// `m`
    pub count: u32,
    /// `C`
    pub mean: Decimal,
}

impl Default for RatingPrior {
    fn default() -> Self {
        Self {
            count: 5,
            mean: Decimal::new(35, 1),
        }
    }
}

impl From<&RatingConfig> for RatingPrior {
    fn from(config: &RatingConfig) -> Self {
        Self {
            count: config.prior_count,
            mean: config.prior_mean_decimal(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RatingSummary {
    pub review_count: i64,
    pub average_rating: Decimal,
    pub weighted_rating: Decimal,
}

fn round_half_up(value: Decimal, scale: u32) -> Decimal {
    let mut rounded = value.round_dp_with_strategy(scale, RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(scale);
    rounded
}

impl RatingSummary {
    pub fn compute(ratings: &[i64], prior: &RatingPrior) -> Self {
        let v = ratings.len() as i64;
        let sum: i64 = ratings.iter().sum();
        let sum = Decimal::from(sum);

        let mean = if v == 0 {
            Decimal::ZERO
        } else {
            sum / Decimal::from(v)
        };

        let denominator = Decimal::from(v) + Decimal::from(prior.count);
        let weighted = if denominator.is_zero() {
            Decimal::ZERO
        } else {
            (sum + Decimal::from(prior.count) * prior.mean) / denominator
        };

        Self {
            review_count: v,
            average_rating: round_half_up(mean, AVERAGE_SCALE),
            weighted_rating: round_half_up(weighted, WEIGHTED_SCALE),
        }
    }
}

/// Ratings of every top-level, rated review of a shop.
pub async fn top_level_ratings(conn: &mut SqliteConnection, shop_id: i64) -> Result<Vec<i64>> {
    let rows = sqlx::query(
        "SELECT rating FROM reviews WHERE shop_id = ? AND parent_review_id IS NULL AND rating IS NOT NULL",
    )
    .bind(shop_id)
    .fetch_all(&mut *conn)
    .await?;

    Ok(rows.iter().map(|row| row.get::<i64, _>("rating")).collect())
}

/// Recompute and persist a shop's derived rating fields.
///
/// Runs on whatever connection it is handed, so callers decide the
/// transaction it belongs to. Writing identical values is a no-op:
/// `updated_at` only moves when an aggregate actually changes.
pub async fn recompute(
    conn: &mut SqliteConnection,
    shop_id: i64,
    prior: &RatingPrior,
) -> Result<RatingSummary> {
    let exists: Option<i64> = sqlx::query_scalar("SELECT id FROM shops WHERE id = ?")
        .bind(shop_id)
        .fetch_optional(&mut *conn)
        .await?;
    if exists.is_none() {
        return Err(ReviewError::not_found("shop", shop_id));
    }

    let ratings = top_level_ratings(conn, shop_id).await?;
    let summary = RatingSummary::compute(&ratings, prior);
    let average = summary.average_rating.to_string();
    let weighted = summary.weighted_rating.to_string();

    let result = sqlx::query(
        r#"
        UPDATE shops
        SET review_count = ?, average_rating = ?, weighted_rating = ?, updated_at = ?
        WHERE id = ?
          AND (review_count != ? OR average_rating != ? OR weighted_rating != ?)
        "#,
    )
    .bind(summary.review_count)
    .bind(&average)
    .bind(&weighted)
    .bind(chrono::Utc::now().timestamp_millis())
    .bind(shop_id)
    .bind(summary.review_count)
    .bind(&average)
    .bind(&weighted)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() > 0 {
        info!(
            shop_id,
            count = summary.review_count,
            average = %summary.average_rating,
            weighted = %summary.weighted_rating,
            "shop rating updated"
        );
    } else {
        debug!(shop_id, "shop rating unchanged");
    }

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn d(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn test_no_reviews_regresses_to_prior() {
        let s = RatingSummary::compute(&[], &RatingPrior::default());
        assert_eq!(s.review_count, 0);
        assert_eq!(s.average_rating, d("0.00"));
        assert_eq!(s.weighted_rating, d("3.5"));
        assert_eq!(s.weighted_rating.to_string(), "3.5000000");
        assert_eq!(s.average_rating.to_string(), "0.00");
    }

    #[test]
    fn test_five_perfect_reviews() {
        let s = RatingSummary::compute(&[5, 5, 5, 5, 5], &RatingPrior::default());
        assert_eq!(s.review_count, 5);
        assert_eq!(s.average_rating, d("5"));
        assert_eq!(s.weighted_rating, d("4.25"));
    }

    #[test]
    fn test_matches_two_term_formula() {
        let ratings = [4, 5, 3];
        let s = RatingSummary::compute(&ratings, &RatingPrior::default());
        // v=3, R=4, m=5, C=3.5: 3/8*4 + 5/8*3.5 = 1.5 + 2.1875
        assert_eq!(s.weighted_rating, d("3.6875"));
        assert_eq!(s.average_rating, d("4.00"));
    }

    #[test]
    fn test_average_rounds_half_up() {
        // mean = 3.125 -> 3.13
        let s = RatingSummary::compute(&[3, 3, 3, 4, 3, 3, 3, 3], &RatingPrior::default());
        assert_eq!(s.average_rating.to_string(), "3.13");
    }

    #[test]
    fn test_weighted_rounds_to_seven_places() {
        // v=1, R=5: (5 + 17.5) / 6 = 3.75
        let s = RatingSummary::compute(&[5], &RatingPrior::default());
        assert_eq!(s.weighted_rating, d("3.75"));

        // v=2, R=4: (8 + 17.5) / 7 = 3.642857142857...
        let s = RatingSummary::compute(&[4, 4], &RatingPrior::default());
        assert_eq!(s.weighted_rating.to_string(), "3.6428571");
    }

    #[test]
    fn test_single_five_does_not_outrank_many_fours() {
        let prior = RatingPrior::default();
        let lucky = RatingSummary::compute(&[5], &prior);
        let established = RatingSummary::compute(&[4; 40], &prior);
        assert!(established.weighted_rating > lucky.weighted_rating);
    }

    #[test]
    fn test_degenerate_prior_yields_zero() {
        let prior = RatingPrior {
            count: 0,
            mean: d("3.5"),
        };
        let s = RatingSummary::compute(&[], &prior);
        assert_eq!(s.weighted_rating, Decimal::ZERO);

        // Without a prior the weighted score is just the mean.
        let s = RatingSummary::compute(&[2, 4], &prior);
        assert_eq!(s.weighted_rating, d("3"));
    }

    #[test]
    fn test_compute_is_deterministic() {
        let prior = RatingPrior::default();
        let a = RatingSummary::compute(&[1, 2, 5, 4], &prior);
        let b = RatingSummary::compute(&[1, 2, 5, 4], &prior);
        assert_eq!(a, b);
        assert_eq!(a.weighted_rating.to_string(), b.weighted_rating.to_string());
    }
}
