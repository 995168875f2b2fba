// src/lib.rs
//
// Crate root: public re-exports.
//
// s3file adapts a key-addressed object store to a seekable-file surface so
// columnar serialization libraries can read and write remote objects
// through plain `std::io` traits (or the async equivalents) without
// knowing the backing store is remote.

pub mod config;
pub mod constants;
pub mod object_file;
pub mod object_store;
pub mod s3_client;

pub use config::S3Config;
pub use object_file::{FileError, ObjectFile, SEEK_CURRENT, SEEK_END, SEEK_START};
pub use object_store::{ObjectBody, ObjectDataStream, ObjectStore, S3ObjectStore};
pub use s3_client::{run_on_global_rt, s3_client_from_config, s3_client_from_config_async};
