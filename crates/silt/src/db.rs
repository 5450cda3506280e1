//! The database handle: one gateway, memoized collections, the change feed
//! and the light bus.
//!
//! Collections own nothing; they are handles over the shared gateway, and the
//! database owns the `name -> Collection` map. `connect` memoizes databases
//! process-wide by name so repeated opens share one connection.

use crate::batch::Batcher;
use crate::bus::LightBus;
use crate::changes::{ChangeFeed, Subscription, SubscriptionSpec};
use crate::collection::Collection;
use crate::gateway::Gateway;
use crate::schema;
use silt_core::{DatabaseConfig, Result, Subscriber};
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::{Mutex, OnceCell};

/// Wall clock in unix milliseconds; document `date` stamps use this.
pub(crate) fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

pub struct SiltDb {
    config: DatabaseConfig,
    gateway: Gateway,
    collections: Mutex<HashMap<String, Arc<Collection>>>,
    feed: ChangeFeed,
    bus: Arc<LightBus>,
}

impl SiltDb {
    /// Open (or create) a database and eagerly create declared collections.
    pub async fn open(config: DatabaseConfig) -> Result<Self> {
        let gateway = Gateway::open(&config)?;
        let feed = ChangeFeed::new(gateway.clone(), config.feed.clone());
        let db = Self {
            config,
            gateway,
            collections: Mutex::new(HashMap::new()),
            feed,
            bus: Arc::new(LightBus::new()),
        };
        db.init().await?;

        tracing::info!(name = %db.config.name, "database opened");
        Ok(db)
    }

    async fn init(&self) -> Result<()> {
        schema::ensure_meta(
            &self.gateway,
            &self.config.version,
            &self.config.description,
        )
        .await?;
        for collection in &self.config.collections {
            self.collection(&collection.name).await?;
        }
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    /// Fetch or create a collection handle. First access creates the table
    /// and reconciles declared indexes.
    pub async fn collection(&self, name: &str) -> Result<Arc<Collection>> {
        let mut collections = self.collections.lock().await;
        if let Some(handle) = collections.get(name) {
            return Ok(handle.clone());
        }

        let indexes = self
            .config
            .collections
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.indexes.clone())
            .unwrap_or_default();
        schema::ensure_collection(&self.gateway, name, &indexes).await?;

        let handle = Arc::new(Collection::new(
            name.to_string(),
            indexes,
            self.gateway.clone(),
            self.bus.clone(),
        ));
        collections.insert(name.to_string(), handle.clone());
        Ok(handle)
    }

    /// Drop a collection's table and forget its handle.
    pub async fn drop_collection(&self, name: &str) -> Result<()> {
        schema::check_ident(name)?;
        self.collections.lock().await.remove(name);
        self.gateway
            .run(&format!("DROP TABLE IF EXISTS {name}"), vec![])
            .await?;
        Ok(())
    }

    /// User collections currently materialized (internal tables excluded).
    pub async fn list_collections(&self) -> Result<Vec<String>> {
        let rows = self
            .gateway
            .query(
                "SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name",
                vec![],
            )
            .await?;
        let mut names = Vec::new();
        for row in rows {
            let name = row.text("name")?;
            if !name.starts_with('_') && !name.starts_with("sqlite_") {
                names.push(name);
            }
        }
        Ok(names)
    }

    /// Register a durable change feed subscription. Ensures the collection
    /// exists first so trigger installation cannot race table creation.
    pub async fn subscribe(
        &self,
        spec: SubscriptionSpec,
        subscriber: Arc<dyn Subscriber>,
    ) -> Result<Subscription> {
        self.collection(&spec.collection).await?;
        self.feed.register(spec, subscriber).await
    }

    pub fn feed(&self) -> &ChangeFeed {
        &self.feed
    }

    pub fn bus(&self) -> &LightBus {
        &self.bus
    }

    /// Start a deferred write batch.
    pub fn batch(&self) -> Batcher {
        Batcher::new(self.gateway.clone())
    }

    /// Stop the change feed runners; subscriptions and tables are untouched.
    pub async fn stop(&self) {
        self.feed.stop().await;
    }

    /// Drop every table (user collections, `_events`, `_cursors`, `_meta`)
    /// and clear in-memory state. Declared schemas are re-created on next
    /// access.
    pub async fn reset(&self) -> Result<()> {
        self.feed.reset().await;
        self.collections.lock().await.clear();

        let rows = self
            .gateway
            .query(
                "SELECT name FROM sqlite_master WHERE type = 'table'",
                vec![],
            )
            .await?;
        for row in rows {
            let name = row.text("name")?;
            if name.starts_with("sqlite_") {
                continue;
            }
            self.gateway
                .run(&format!("DROP TABLE IF EXISTS {name}"), vec![])
                .await?;
        }

        schema::ensure_meta(
            &self.gateway,
            &self.config.version,
            &self.config.description,
        )
        .await?;

        tracing::info!(name = %self.config.name, "database reset");
        Ok(())
    }
}

/// Open a database through the process-wide registry.
///
/// Databases are memoized by `config.name` as a map of shared init cells:
/// the map lock is held only to look up the name's cell, so concurrent
/// callers for the same name share one open while unrelated names open
/// independently. A failed open leaves the cell empty and the next caller
/// retries.
pub async fn connect(config: DatabaseConfig) -> Result<Arc<SiltDb>> {
    type InitCell = Arc<OnceCell<Arc<SiltDb>>>;
    static REGISTRY: OnceLock<Mutex<HashMap<String, InitCell>>> = OnceLock::new();

    let registry = REGISTRY.get_or_init(|| Mutex::new(HashMap::new()));
    let cell = {
        let mut databases = registry.lock().await;
        databases.entry(config.name.clone()).or_default().clone()
    };

    let db = cell
        .get_or_try_init(|| async move { SiltDb::open(config).await.map(Arc::new) })
        .await?;
    Ok(db.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_ms_is_millisecond_scale() {
        let now = now_ms();
        // later than 2020-01-01, earlier than 2100-01-01
        assert!(now > 1_577_836_800_000);
        assert!(now < 4_102_444_800_000);
    }

    #[tokio::test]
    async fn test_connect_memoizes_by_name() {
        let first = connect(DatabaseConfig::in_memory("connect_memo_test"))
            .await
            .unwrap();
        let second = connect(DatabaseConfig::in_memory("connect_memo_test"))
            .await
            .unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn test_concurrent_connects_to_distinct_names() {
        let a = tokio::spawn(connect(DatabaseConfig::in_memory("connect_concurrent_a")));
        let b = tokio::spawn(connect(DatabaseConfig::in_memory("connect_concurrent_b")));

        // distinct names must open independently, not serialize on one lock
        let (a, b) = tokio::time::timeout(std::time::Duration::from_secs(5), async {
            (a.await.unwrap().unwrap(), b.await.unwrap().unwrap())
        })
        .await
        .expect("concurrent opens of distinct names should not block each other");

        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(a.name(), "connect_concurrent_a");
        assert_eq!(b.name(), "connect_concurrent_b");

        // same-name callers still share one database
        let again = connect(DatabaseConfig::in_memory("connect_concurrent_a"))
            .await
            .unwrap();
        assert!(Arc::ptr_eq(&a, &again));
    }

    #[tokio::test]
    async fn test_list_collections_hides_internal_tables() {
        let db = SiltDb::open(DatabaseConfig::in_memory("list_test"))
            .await
            .unwrap();
        db.collection("todos").await.unwrap();

        let names = db.list_collections().await.unwrap();
        assert_eq!(names, vec!["todos"]);
    }
}
