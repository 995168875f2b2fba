// src/s3_client.rs
//
//! Shared background Tokio runtime plus the S3 client factory.
//!
//! The runtime lets the blocking file surface drive async store calls from
//! plain threads (or from inside a foreign runtime); the factory builds a
//! client from an explicit [`S3Config`] rather than probing the process
//! environment itself.

use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use anyhow::Result;
use aws_config::meta::region::RegionProviderChain;
use aws_config::timeout::TimeoutConfig;
use aws_sdk_s3::Client;
use aws_sdk_s3::config::{Credentials, Region};
use tokio::runtime::{Builder as TokioBuilder, Handle};
use tokio::sync::oneshot;
use tracing::debug;

use crate::config::S3Config;
use crate::constants::{
    DEFAULT_CONNECT_TIMEOUT_SECS, DEFAULT_REGION, MAX_RT_THREADS, RT_THREADS_ENV,
};

// -----------------------------------------------------------------------------
// Shared runtime (lazy, thread-safe)
// -----------------------------------------------------------------------------
static RT_HANDLE: once_cell::sync::OnceCell<Handle> = once_cell::sync::OnceCell::new();

// Create (once) a background multi-thread Tokio runtime and return its Handle.
pub(crate) fn global_rt_handle() -> &'static Handle {
    RT_HANDLE.get_or_init(|| {
        let (tx, rx) = mpsc::sync_channel(1);
        thread::Builder::new()
            .name("s3file-rt".to_string())
            .spawn(move || {
                let threads = runtime_threads();
                debug!("creating shared runtime with {} worker threads", threads);

                let rt = TokioBuilder::new_multi_thread()
                    .enable_io()
                    .enable_time()
                    .worker_threads(threads)
                    .thread_name("s3file-rt-worker")
                    .build()
                    .expect("failed to build shared tokio runtime");

                // Send a Handle clone back to the creator, then park the runtime forever.
                let handle = rt.handle().clone();
                tx.send(handle).expect("send runtime handle");
                rt.block_on(async { std::future::pending::<()>().await });
            })
            .expect("failed to spawn s3file runtime thread");

        rx.recv().expect("receive runtime handle")
    })
}

/// Worker thread count with environment override
fn runtime_threads() -> usize {
    std::env::var(RT_THREADS_ENV)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or_else(|| {
            let cores = num_cpus::get();
            std::cmp::min(std::cmp::max(4, cores), MAX_RT_THREADS)
        })
}

/// Run an async `fut` on the shared runtime and block the **current** thread
/// until it completes. Handles both runtime and non-runtime contexts.
pub fn run_on_global_rt<F, T>(fut: F) -> Result<T>
where
    F: std::future::Future<Output = Result<T>> + Send + 'static,
    T: Send + 'static,
{
    match Handle::try_current() {
        Ok(_) => {
            // Already inside some runtime; still execute on the shared one
            // and wait with a blocking receive, which is legal here.
            let handle = global_rt_handle().clone();
            let (tx, rx) = mpsc::channel();

            handle.spawn(async move {
                let _ = tx.send(fut.await);
            });

            rx.recv()
                .map_err(|_| anyhow::anyhow!("shared runtime task crashed"))?
        }
        Err(_) => {
            let handle = global_rt_handle().clone();
            let (tx, rx) = oneshot::channel();

            handle.spawn(async move {
                let _ = tx.send(fut.await);
            });

            // Block this plain OS thread until the async result arrives.
            rx.blocking_recv()
                .map_err(|_| anyhow::anyhow!("shared runtime task crashed"))?
        }
    }
}

/// Drive a non-'static future to completion from a blocking caller.
/// Inside a multi-thread runtime this parks the worker in place; elsewhere
/// it enters the shared runtime.
pub(crate) fn block_on_file<F: std::future::Future>(fut: F) -> F::Output {
    match Handle::try_current() {
        Ok(handle) => tokio::task::block_in_place(|| handle.block_on(fut)),
        Err(_) => global_rt_handle().block_on(fut),
    }
}

// -----------------------------------------------------------------------------
// Client factory
// -----------------------------------------------------------------------------

/// Async builder for an S3 client from explicit configuration.
/// Safe to call from any async context.
pub async fn s3_client_from_config_async(cfg: &S3Config) -> Result<Client> {
    let region = RegionProviderChain::first_try(cfg.region.clone().map(Region::new))
        .or_default_provider()
        .or_else(Region::new(DEFAULT_REGION));

    let credentials = Credentials::new(
        cfg.access_key_id.clone(),
        cfg.secret_access_key.clone(),
        cfg.session_token.clone(),
        None,
        "s3file-config",
    );

    let timeout_config = TimeoutConfig::builder()
        .connect_timeout(Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS))
        .operation_timeout(cfg.operation_timeout)
        .build();

    let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
        .region(region)
        .credentials_provider(credentials)
        .timeout_config(timeout_config);
    if let Some(endpoint) = &cfg.endpoint {
        if !endpoint.is_empty() {
            loader = loader.endpoint_url(endpoint);
        }
    }
    let base = loader.load().await;

    // Path-style addressing is required by S3-compatible services behind
    // custom endpoints (MinIO, Ceph); bucket.endpoint does not resolve there.
    let mut builder = aws_sdk_s3::config::Builder::from(&base);
    if cfg.endpoint.is_some() {
        builder = builder.force_path_style(true);
    }
    Ok(Client::from_conf(builder.build()))
}

/// Synchronous wrapper for entry points that are not async.
/// Internally hops onto the shared runtime via [`run_on_global_rt`].
pub fn s3_client_from_config(cfg: &S3Config) -> Result<Client> {
    let cfg = cfg.clone();
    run_on_global_rt(async move { s3_client_from_config_async(&cfg).await })
}
