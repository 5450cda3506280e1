//! Silt: an embedded JSON document store over SQLite with a durable,
//! trigger-driven change feed.
//!
//! - **Document store**: collections of JSON documents keyed by string ids,
//!   with secondary index columns projected from dotted paths and a small
//!   structured query surface.
//! - **Change feed**: SQL triggers append every mutation to an `_events` log
//!   atomically with the write; per-collection runners dispatch events to
//!   subscribers with durable per-subscription cursors, so consumers resume
//!   where they left off across restarts.
//! - **Light bus**: synchronous in-process fan-out when durability is not
//!   required.
//!
//! # Quick start
//!
//! ```no_run
//! use silt::{connect, DatabaseConfig, CollectionConfig, IndexSpec, Query};
//! use serde_json::json;
//!
//! # async fn run() -> silt::Result<()> {
//! let db = connect(
//!     DatabaseConfig::new("app").with_collection(
//!         CollectionConfig::new("todos").with_index(IndexSpec::on("done")),
//!     ),
//! )
//! .await?;
//!
//! let todos = db.collection("todos").await?;
//! todos.save(json!({"id": "a", "title": "write docs", "done": false})).await?;
//!
//! let open = todos.find(&Query::new().field("done", false)).await?;
//! assert_eq!(open.len(), 1);
//! # Ok(())
//! # }
//! ```

pub mod batch;
pub mod bus;
pub mod changes;
pub mod collection;
pub mod db;
pub mod gateway;
pub mod query;

mod schema;
mod triggers;

// Re-export core types
pub use silt_core::{
    column_to_path, path_to_column, Change, ChangeEvent, CollectionConfig, ColumnInfo,
    DatabaseConfig, Document, EventKind, EventRecord, FeedConfig, IndexField, IndexKind,
    IndexSpec, Result, SiltError, Subscriber,
};

// Re-export main types from this crate
pub use batch::Batcher;
pub use bus::{BusEvent, BusSubscription, LightBus};
pub use changes::{ChangeFeed, Subscription, SubscriptionSpec};
pub use collection::Collection;
pub use db::{connect, SiltDb};
pub use gateway::{Gateway, Row};
pub use query::{Op, Query};
