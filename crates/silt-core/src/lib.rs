//! Silt core: types and traits for the silt document store.
//!
//! This crate defines the abstractions shared across the store:
//! - Error type and result alias
//! - Database / collection / feed configuration
//! - Document and change event types (raw vs inflated)
//! - Secondary index specifications and the path-to-column naming contract
//! - The `Subscriber` trait implemented by change feed consumers

pub mod config;
pub mod error;
pub mod index;
pub mod traits;
pub mod types;

pub use config::{CollectionConfig, DatabaseConfig, FeedConfig};
pub use error::{Result, SiltError};
pub use index::{column_to_path, path_to_column, IndexField, IndexKind, IndexSpec};
pub use traits::Subscriber;
pub use types::{Change, ChangeEvent, ColumnInfo, Document, EventKind, EventRecord};
