#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use tempfile::TempDir;

use ramen_review::auth::{Actor, Role};
use ramen_review::config::Config;
use ramen_review::db;
use ramen_review::engine::Engine;
use ramen_review::migrate;
use ramen_review::models::{Shop, UploadFile};
use ramen_review::storage::{FileStorage, MemoryFileStorage};
use ramen_review::users;

/// In-memory storage that can be told to fail.
#[derive(Default)]
pub struct FlakyStorage {
    inner: MemoryFileStorage,
    stores: AtomicUsize,
    deletes: AtomicUsize,
    /// Fail every `store` once this many have succeeded.
    fail_store_after: AtomicUsize,
    fail_deletes: AtomicBool,
}

impl FlakyStorage {
    pub fn new() -> Self {
        Self {
            fail_store_after: AtomicUsize::new(usize::MAX),
            ..Default::default()
        }
    }

    pub fn fail_store_after(&self, n: usize) {
        self.stores.store(0, Ordering::SeqCst);
        self.fail_store_after.store(n, Ordering::SeqCst);
    }

    pub fn fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    pub fn delete_calls(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.inner.contains(path)
    }
}

#[async_trait]
impl FileStorage for FlakyStorage {
    async fn store(&self, file: &UploadFile, namespace: &str) -> Result<String> {
        let done = self.stores.load(Ordering::SeqCst);
        if done >= self.fail_store_after.load(Ordering::SeqCst) {
            bail!("disk full");
        }
        let path = self.inner.store(file, namespace).await?;
        self.stores.fetch_add(1, Ordering::SeqCst);
        Ok(path)
    }

    async fn load(&self, path: &str) -> Result<Vec<u8>> {
        self.inner.load(path).await
    }

    async fn delete(&self, path: &str) -> Result<bool> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        if self.fail_deletes.load(Ordering::SeqCst) {
            bail!("permission denied");
        }
        self.inner.delete(path).await
    }
}

pub struct TestEnv {
    pub tmp: TempDir,
    pub config: Config,
    pub engine: Engine,
    pub storage: Arc<FlakyStorage>,
    pub owner: Actor,
    pub alice: Actor,
    pub bob: Actor,
    pub admin: Actor,
    pub shop: Shop,
}

pub async fn setup() -> TestEnv {
    let tmp = TempDir::new().unwrap();
    let config = Config::with_paths(tmp.path().join("data/ramen.sqlite"), tmp.path().join("uploads"));

    let pool = db::connect(&config).await.unwrap();
    migrate::apply_schema(&pool).await.unwrap();

    let storage = Arc::new(FlakyStorage::new());
    let engine = Engine::with_storage(pool, storage.clone(), &config);

    let owner = add_user(&engine, "taisho", Role::ShopOwner).await;
    let alice = add_user(&engine, "alice", Role::User).await;
    let bob = add_user(&engine, "bob", Role::User).await;
    let admin = add_user(&engine, "root", Role::Admin).await;

    let shop = engine
        .shops
        .create_shop("Menya Kaijin", "Shinjuku, Tokyo", Some(owner.id))
        .await
        .unwrap();

    TestEnv {
        tmp,
        config,
        engine,
        storage,
        owner,
        alice,
        bob,
        admin,
        shop,
    }
}

pub async fn add_user(engine: &Engine, name: &str, role: Role) -> Actor {
    let user = users::create_user(&engine.pool, name, role).await.unwrap();
    Actor::new(user.id, role)
}

pub fn photo(name: &str) -> UploadFile {
    UploadFile::new(name, "image/jpeg", vec![0xFF, 0xD8, 0xFF, 0xE0, 1, 2, 3])
}

pub fn photos(prefix: &str, n: usize) -> Vec<UploadFile> {
    (0..n).map(|i| photo(&format!("{}-{}.jpg", prefix, i))).collect()
}

pub async fn count_rows(env: &TestEnv, table: &str) -> i64 {
    sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table))
        .fetch_one(&env.engine.pool)
        .await
        .unwrap()
}

/// Raw stored rating columns of a shop, as persisted.
pub async fn raw_rating(env: &TestEnv, shop_id: i64) -> (i64, String, String, i64) {
    sqlx::query_as(
        "SELECT review_count, average_rating, weighted_rating, updated_at FROM shops WHERE id = ?",
    )
    .bind(shop_id)
    .fetch_one(&env.engine.pool)
    .await
    .unwrap()
}
