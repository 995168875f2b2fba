// src/object_store.rs
//
// Store-side collaborator contract plus the S3 adapter.
// The file layer only ever sees the trait; tests substitute an in-memory
// implementation.

use std::pin::Pin;

use anyhow::{Context, Result};
use async_stream::try_stream;
use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::primitives::ByteStream;
use bytes::Bytes;
use futures::{Stream, StreamExt};

use crate::config::S3Config;
use crate::s3_client::s3_client_from_config_async;

/// Chunked byte stream produced by a ranged GET.
pub type ObjectDataStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send + 'static>>;

/// Streaming upload body consumed by `put`.
pub type ObjectBody = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send + 'static>>;

/// Minimal object-store surface the file layer depends on.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Content length of `key` in bytes. A negative value means the store
    /// reported an absent or unparsable length; `Err` is not-found or a
    /// transport failure.
    async fn head(&self, key: &str) -> Result<i64>;

    /// Fetch the inclusive, zero-indexed byte range `[start, end]` of `key`
    /// as a chunk stream.
    async fn get_range(&self, key: &str, start: u64, end: u64) -> Result<ObjectDataStream>;

    /// Create or overwrite `key`, consuming `body` to completion.
    async fn put(&self, key: &str, body: ObjectBody) -> Result<()>;
}

/// S3 adapter bound to one bucket.
pub struct S3ObjectStore {
    client: Client,
    bucket: String,
}

impl S3ObjectStore {
    pub fn new(client: Client, bucket: impl Into<String>) -> Self {
        Self { client, bucket: bucket.into() }
    }

    /// Build the client and the store in one step from explicit configuration.
    pub async fn from_config(cfg: &S3Config, bucket: impl Into<String>) -> Result<Self> {
        let client = s3_client_from_config_async(cfg).await?;
        Ok(Self::new(client, bucket))
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn head(&self, key: &str) -> Result<i64> {
        let resp = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .with_context(|| format!("HeadObject failed for {}", key))?;
        Ok(resp.content_length().unwrap_or(-1))
    }

    async fn get_range(&self, key: &str, start: u64, end: u64) -> Result<ObjectDataStream> {
        let resp = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .range(format!("bytes={}-{}", start, end))
            .send()
            .await
            .with_context(|| format!("ranged GetObject failed for {}", key))?;

        let mut body = resp.body;
        let chunks = try_stream! {
            while let Some(chunk) = body.try_next().await.context("ranged GetObject body")? {
                yield chunk;
            }
        };
        let chunks: ObjectDataStream = Box::pin(chunks);
        Ok(chunks)
    }

    async fn put(&self, key: &str, mut body: ObjectBody) -> Result<()> {
        // PutObject signs over a known content length, so the body is drained
        // before dispatch. A store with true streaming puts can consume the
        // body incrementally; the file side needs no change either way.
        let mut data = Vec::new();
        while let Some(chunk) = body.next().await {
            let chunk = chunk.context("upload body stream")?;
            data.extend_from_slice(&chunk);
        }
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(data))
            .send()
            .await
            .with_context(|| format!("PutObject failed for {}", key))?;
        Ok(())
    }
}
