//! Wiring: one [`Engine`] owns the pool, the storage adapter and the
//! stores built on top of them.

use std::sync::Arc;

use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::consistency::ConsistencyMaintainer;
use crate::db;
use crate::media::MediaManager;
use crate::migrate;
use crate::rating::RatingPrior;
use crate::reviews::ReviewStore;
use crate::shops::ShopStore;
use crate::storage::{FileStorage, LocalFileStorage};
use crate::users::UserStore;

pub struct Engine {
    pub pool: SqlitePool,
    pub storage: Arc<dyn FileStorage>,
    pub reviews: ReviewStore,
    pub shops: ShopStore,
    pub users: UserStore,
}

impl Engine {
    /// Connect to the configured database, make sure the schema exists,
    /// and use the local filesystem for uploads.
    pub async fn open(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        migrate::apply_schema(&pool).await?;
        let storage: Arc<dyn FileStorage> = Arc::new(LocalFileStorage::init(&config.storage.root)?);
        Ok(Self::with_storage(pool, storage, config))
    }

    /// Build an engine over an existing pool and storage adapter.
    pub fn with_storage(pool: SqlitePool, storage: Arc<dyn FileStorage>, config: &Config) -> Self {
        let media = Arc::new(MediaManager::new(storage.clone(), &config.media));
        let consistency = ConsistencyMaintainer::new(RatingPrior::from(&config.rating));

        Self {
            reviews: ReviewStore::new(pool.clone(), media.clone(), consistency),
            users: UserStore::new(pool.clone(), media.clone(), consistency),
            shops: ShopStore::new(
                pool.clone(),
                media,
                consistency,
                config.rating.min_reviews_for_ranking,
            ),
            pool,
            storage,
        }
    }
}
