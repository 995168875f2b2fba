// src/constants.rs
//
// Centralized constants for s3file to avoid hardcoded values throughout the codebase

/// Default AWS region when the configuration does not name one
pub const DEFAULT_REGION: &str = "us-east-1";

/// Capacity, in chunks, of the write-side hand-off channel.
/// One slot keeps `write` backpressured on the upload consumer.
pub const WRITE_PIPE_CAPACITY: usize = 1;

/// Default connect timeout for the S3 client (seconds)
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 5;

/// Default timeout for a single storage operation (seconds)
pub const DEFAULT_OPERATION_TIMEOUT_SECS: u64 = 120;

/// Environment override for the shared runtime's worker thread count
pub const RT_THREADS_ENV: &str = "S3FILE_RT_THREADS";

/// Environment override for the per-operation timeout, in seconds
pub const OPERATION_TIMEOUT_ENV: &str = "S3FILE_OPERATION_TIMEOUT_SECS";

/// Cap on shared runtime worker threads
pub const MAX_RT_THREADS: usize = 32;
