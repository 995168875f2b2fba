// tests/common/mod.rs
//
// In-memory ObjectStore stub shared by the integration tests. It records
// the calls it serves so tests can assert on wire behavior (head counts,
// requested ranges, stored bodies) and supports injected delays and
// failures on the upload path.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use s3file::{ObjectBody, ObjectDataStream, ObjectStore};

/// How the stub's `put` should behave.
#[derive(Clone, Copy)]
pub enum PutBehavior {
    /// Drain the body and store the object.
    Store,
    /// Drain the body, then sleep before reporting success.
    StoreAfterDelay(Duration),
    /// Read this many body chunks, then fail.
    FailAfterChunks(usize),
    /// Never finish; parks until the surrounding task is cancelled.
    Stall,
}

pub struct MemoryStore {
    objects: Mutex<HashMap<String, Vec<u8>>>,
    ranges: Mutex<Vec<(u64, u64)>>,
    pub head_calls: AtomicUsize,
    pub put_calls: AtomicUsize,
    /// Served ranges are split into chunks of this size to exercise the
    /// reader's copy loop.
    pub chunk_size: usize,
    pub put_behavior: PutBehavior,
    /// When set, head reports this instead of the stored length.
    pub head_override: Option<i64>,
    /// When raised, the next range body fails after its first chunk,
    /// then the flag clears.
    pub fail_next_range_body: AtomicBool,
    /// When true, get_range parks forever instead of answering.
    pub stall_ranges: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            objects: Mutex::new(HashMap::new()),
            ranges: Mutex::new(Vec::new()),
            head_calls: AtomicUsize::new(0),
            put_calls: AtomicUsize::new(0),
            chunk_size: 4,
            put_behavior: PutBehavior::Store,
            head_override: None,
            fail_next_range_body: AtomicBool::new(false),
            stall_ranges: false,
        }
    }

    pub fn with_object(key: &str, data: &[u8]) -> Self {
        let store = Self::new();
        store.insert(key, data);
        store
    }

    pub fn insert(&self, key: &str, data: &[u8]) {
        self.objects
            .lock()
            .unwrap()
            .insert(key.to_string(), data.to_vec());
    }

    pub fn object(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.lock().unwrap().get(key).cloned()
    }

    pub fn ranges(&self) -> Vec<(u64, u64)> {
        self.ranges.lock().unwrap().clone()
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn head(&self, key: &str) -> Result<i64> {
        self.head_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(size) = self.head_override {
            return Ok(size);
        }
        match self.objects.lock().unwrap().get(key) {
            Some(data) => Ok(data.len() as i64),
            None => bail!("no such key: {}", key),
        }
    }

    async fn get_range(&self, key: &str, start: u64, end: u64) -> Result<ObjectDataStream> {
        if self.stall_ranges {
            futures::future::pending::<()>().await;
        }
        self.ranges.lock().unwrap().push((start, end));

        let data = self
            .objects
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .ok_or_else(|| anyhow!("no such key: {}", key))?;
        let last = (end as usize).min(data.len().saturating_sub(1));
        let window = data[start as usize..=last].to_vec();

        let mut chunks: Vec<Result<Bytes>> = window
            .chunks(self.chunk_size.max(1))
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();
        if self.fail_next_range_body.swap(false, Ordering::SeqCst) {
            chunks.truncate(1);
            chunks.push(Err(anyhow!("injected mid-range failure")));
        }
        let stream: ObjectDataStream = Box::pin(futures::stream::iter(chunks));
        Ok(stream)
    }

    async fn put(&self, key: &str, mut body: ObjectBody) -> Result<()> {
        self.put_calls.fetch_add(1, Ordering::SeqCst);
        match self.put_behavior {
            PutBehavior::Stall => {
                futures::future::pending::<()>().await;
                unreachable!()
            }
            PutBehavior::FailAfterChunks(limit) => {
                let mut seen = 0;
                while seen < limit {
                    match body.next().await {
                        Some(chunk) => {
                            chunk?;
                            seen += 1;
                        }
                        None => break,
                    }
                }
                bail!("injected upload failure after {} chunks", seen);
            }
            PutBehavior::Store | PutBehavior::StoreAfterDelay(_) => {
                let mut data = Vec::new();
                while let Some(chunk) = body.next().await {
                    data.extend_from_slice(&chunk?);
                }
                if let PutBehavior::StoreAfterDelay(delay) = self.put_behavior {
                    tokio::time::sleep(delay).await;
                }
                self.objects.lock().unwrap().insert(key.to_string(), data);
                Ok(())
            }
        }
    }
}
