//! TOML configuration parsing and validation.
//!
//! Only `[db]` is required. Every other section falls back to the
//! defaults below, which are also what the tests run against.
//!
//! ```toml
//! [db]
//! path = "./data/ramen.sqlite"
//!
//! [storage]
//! root = "./uploads"
//!
//! [rating]
//! prior_count = 5
//! prior_mean = 3.5
//! min_reviews_for_ranking = 3
//!
//! [media]
//! max_review_images = 5
//! max_review_image_bytes = 5242880
//! max_shop_file_bytes = 52428800
//!
//! [server]
//! bind = "127.0.0.1:8080"
//! ```

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub rating: RatingConfig,
    #[serde(default)]
    pub media: MediaConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_storage_root")]
    pub root: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: default_storage_root(),
        }
    }
}

fn default_storage_root() -> PathBuf {
    PathBuf::from("./uploads")
}

/// Bayesian prior used by the rating aggregator, plus the ranking cutoff.
#[derive(Debug, Deserialize, Clone)]
pub struct RatingConfig {
    /// `m`: how many "virtual" reviews the prior is worth.
    #[serde(default = "default_prior_count")]
    pub prior_count: u32,
    /// `C`: the mean those virtual reviews carry.
    #[serde(default = "default_prior_mean")]
    pub prior_mean: f64,
    #[serde(default = "default_min_reviews_for_ranking")]
    pub min_reviews_for_ranking: i64,
}

impl Default for RatingConfig {
    fn default() -> Self {
        Self {
            prior_count: default_prior_count(),
            prior_mean: default_prior_mean(),
            min_reviews_for_ranking: default_min_reviews_for_ranking(),
        }
    }
}

impl RatingConfig {
    /// The prior mean as an exact decimal.
    ///
    /// `load_config` guarantees the value is finite, so the fallback is
    /// only reachable for configs built by hand.
    pub fn prior_mean_decimal(&self) -> Decimal {
        Decimal::try_from(self.prior_mean).unwrap_or(Decimal::ZERO)
    }
}

fn default_prior_count() -> u32 {
    5
}
fn default_prior_mean() -> f64 {
    3.5
}
fn default_min_reviews_for_ranking() -> i64 {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct MediaConfig {
    #[serde(default = "default_max_review_images")]
    pub max_review_images: i64,
    #[serde(default = "default_max_review_image_bytes")]
    pub max_review_image_bytes: u64,
    #[serde(default = "default_max_shop_file_bytes")]
    pub max_shop_file_bytes: u64,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            max_review_images: default_max_review_images(),
            max_review_image_bytes: default_max_review_image_bytes(),
            max_shop_file_bytes: default_max_shop_file_bytes(),
        }
    }
}

fn default_max_review_images() -> i64 {
    5
}
fn default_max_review_image_bytes() -> u64 {
    5 * 1024 * 1024
}
fn default_max_shop_file_bytes() -> u64 {
    50 * 1024 * 1024
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

impl Config {
    /// Build a config with every optional section defaulted.
    pub fn with_paths(db_path: impl Into<PathBuf>, storage_root: impl Into<PathBuf>) -> Self {
        Self {
            db: DbConfig {
                path: db_path.into(),
            },
            storage: StorageConfig {
                root: storage_root.into(),
            },
            rating: RatingConfig::default(),
            media: MediaConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    let mean = config.rating.prior_mean;
    if !mean.is_finite() || !(1.0..=5.0).contains(&mean) {
        anyhow::bail!("rating.prior_mean must be in [1.0, 5.0], got {}", mean);
    }

    if config.rating.min_reviews_for_ranking < 0 {
        anyhow::bail!("rating.min_reviews_for_ranking must be >= 0");
    }

    if config.media.max_review_images < 1 {
        anyhow::bail!("media.max_review_images must be >= 1");
    }

    if config.media.max_review_image_bytes == 0 || config.media.max_shop_file_bytes == 0 {
        anyhow::bail!("media byte limits must be > 0");
    }

    if config.server.bind.trim().is_empty() {
        anyhow::bail!("server.bind must not be empty");
    }

    Ok(())
}
