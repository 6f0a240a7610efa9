//! Remote object storage client
//!
//! The HTTP client talks to the real storage service; the in-memory store
//! backs tests and can inject rate-limit and upload failures on demand.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::StatusCode;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

/// Default backoff when the service rate limits without a Retry-After
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum ObjectStoreError {
    /// The service pushed back; retry after the given delay
    #[error("rate limited by remote storage")]
    RateLimited { retry_after: Duration },

    #[error("object not found: {0}")]
    NotFound(String),

    #[error("remote storage request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("remote storage rejected the request: {0}")]
    Rejected(String),
}

/// Where an uploaded artifact lives: media/{uploader}/{date}/{id}_{filename}
pub fn remote_object_path(uploader_id: &str, date: NaiveDate, id: Uuid, filename: &str) -> String {
    format!("media/{}/{}/{}_{}", uploader_id, date, id, filename)
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, path: &str, bytes: Vec<u8>) -> Result<(), ObjectStoreError>;
    async fn get(&self, path: &str) -> Result<Vec<u8>, ObjectStoreError>;
}

/// HTTP-backed object storage
pub struct HttpObjectStore {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl HttpObjectStore {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            token,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }
}

fn retry_after_of(resp: &reqwest::Response) -> Duration {
    resp.headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_RETRY_AFTER)
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    async fn put(&self, path: &str, bytes: Vec<u8>) -> Result<(), ObjectStoreError> {
        debug!(%path, size = bytes.len(), "put: called");
        let resp = self
            .authorize(self.client.put(self.url(path)))
            .body(bytes)
            .send()
            .await?;
        if resp.status() == StatusCode::TOO_MANY_REQUESTS {
            return Err(ObjectStoreError::RateLimited {
                retry_after: retry_after_of(&resp),
            });
        }
        if !resp.status().is_success() {
            return Err(ObjectStoreError::Rejected(format!(
                "PUT {} -> {}",
                path,
                resp.status()
            )));
        }
        Ok(())
    }

    async fn get(&self, path: &str) -> Result<Vec<u8>, ObjectStoreError> {
        debug!(%path, "get: called");
        let resp = self
            .authorize(self.client.get(self.url(path)))
            .send()
            .await?;
        if resp.status() == StatusCode::TOO_MANY_REQUESTS {
            return Err(ObjectStoreError::RateLimited {
                retry_after: retry_after_of(&resp),
            });
        }
        if resp.status() == StatusCode::NOT_FOUND {
            return Err(ObjectStoreError::NotFound(path.to_string()));
        }
        if !resp.status().is_success() {
            return Err(ObjectStoreError::Rejected(format!(
                "GET {} -> {}",
                path,
                resp.status()
            )));
        }
        Ok(resp.bytes().await?.to_vec())
    }
}

/// In-memory object storage with fault injection, for tests
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: Mutex<HashMap<String, Vec<u8>>>,
    rate_limited_calls: Mutex<u32>,
    retry_after: Mutex<Duration>,
    fail_puts: Mutex<bool>,
    puts: Mutex<u32>,
    gets: Mutex<u32>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self {
            retry_after: Mutex::new(DEFAULT_RETRY_AFTER),
            ..Default::default()
        }
    }

    /// Answer the next `calls` requests with a rate-limit error
    pub fn rate_limit_next(&self, calls: u32, retry_after: Duration) {
        *self.lock(&self.rate_limited_calls) = calls;
        *self.lock(&self.retry_after) = retry_after;
    }

    /// Reject every upload until cleared
    pub fn fail_puts(&self, fail: bool) {
        *self.lock(&self.fail_puts) = fail;
    }

    pub fn contains(&self, path: &str) -> bool {
        self.lock(&self.objects).contains_key(path)
    }

    /// Total uploads attempted, including rate-limited and rejected ones
    pub fn put_count(&self) -> u32 {
        *self.lock(&self.puts)
    }

    /// Total downloads attempted, including rate-limited ones
    pub fn get_count(&self) -> u32 {
        *self.lock(&self.gets)
    }

    fn lock<'a, T>(&self, mutex: &'a Mutex<T>) -> std::sync::MutexGuard<'a, T> {
        mutex.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_rate_limit(&self) -> Result<(), ObjectStoreError> {
        let mut remaining = self.lock(&self.rate_limited_calls);
        if *remaining > 0 {
            *remaining -= 1;
            return Err(ObjectStoreError::RateLimited {
                retry_after: *self.lock(&self.retry_after),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(&self, path: &str, bytes: Vec<u8>) -> Result<(), ObjectStoreError> {
        *self.lock(&self.puts) += 1;
        self.check_rate_limit()?;
        if *self.lock(&self.fail_puts) {
            return Err(ObjectStoreError::Rejected(format!("PUT {} -> 500", path)));
        }
        self.lock(&self.objects).insert(path.to_string(), bytes);
        Ok(())
    }

    async fn get(&self, path: &str) -> Result<Vec<u8>, ObjectStoreError> {
        *self.lock(&self.gets) += 1;
        self.check_rate_limit()?;
        self.lock(&self.objects)
            .get(path)
            .cloned()
            .ok_or_else(|| ObjectStoreError::NotFound(path.to_string()))
    }
}
