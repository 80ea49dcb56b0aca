//! s3pump Core - Chunked Parallel Transfer Engine
//!
//! Moves large objects to and from an object store faster than a single
//! connection allows: ranged GETs for downloads, multipart PUTs for uploads,
//! each spread over a bounded pool of concurrent workers.

pub mod engine;
mod error;
pub mod store;

pub use engine::{validate_config, TransferManager};
pub use error::*;
pub use store::{MemoryStore, ObjectStore, S3Store, StaticCredentials, StoreStats};

pub use s3pump_types as types;
