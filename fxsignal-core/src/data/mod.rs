//! Storage layers: bronze snapshots, silver partitions, gold series files,
//! and the object store they live in.

pub mod bronze;
pub mod error;
pub mod gold;
pub mod keys;
pub mod outcome;
pub mod parquet;
pub mod provider;
pub mod silver;
pub mod store;
pub mod valet;
pub mod watermark;

pub use error::DataError;
pub use keys::LayerKeys;
pub use outcome::{MergeMode, MergeOutcome, MergeStatus};
pub use provider::{FetchError, ObservationProvider, RawResponse};
pub use store::{LocalStore, MemoryStore, ObjectInfo, ObjectStore};
