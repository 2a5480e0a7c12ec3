//! Object storage layer
//!
//! Executors keep job artifacts here: function metadata, serialized call
//! inputs, call outputs and status records. User data objects processed by
//! object-partitioned map jobs are read from the same backend.

pub mod backends;
pub mod config;
pub mod error;
pub mod factory;
pub mod traits;

pub use config::{BackendType, StorageConfig};
pub use error::{StorageError, StorageResult};
pub use factory::StorageFactory;
pub use traits::{delete_prefix, get_json, put_json, ObjectStorage};
