use std::fs::{self, File};
use std::path::Path;
use std::thread;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue, USER_AGENT};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use crate::error::EtlError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub did: String,
    pub rev: Option<String>,
    pub md5: Option<String>,
    pub size: Option<u64>,
}

pub trait FileStore: Send + Sync {
    fn find_by_name(&self, file_name: &str) -> Result<Option<FileRecord>, EtlError>;
    fn upload_file(&self, path: &Path) -> Result<String, EtlError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SubmitOutcome {
    Uploaded { did: String },
    AlreadyPresent { did: String },
}

pub struct ShardSubmitter<F: FileStore> {
    store: F,
}

impl<F: FileStore> ShardSubmitter<F> {
    pub fn new(store: F) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &F {
        &self.store
    }

    pub fn submit(&self, path: &Path) -> Result<SubmitOutcome, EtlError> {
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| EtlError::Filesystem(format!("invalid shard path {}", path.display())))?;

        let outcome = match self.store.find_by_name(file_name)? {
            Some(record) => {
                info!(file = file_name, did = %record.did, "already present in file store, skipping upload");
                SubmitOutcome::AlreadyPresent { did: record.did }
            }
            None => {
                let did = self.store.upload_file(path)?;
                info!(file = file_name, did = %did, "uploaded shard");
                SubmitOutcome::Uploaded { did }
            }
        };

        fs::remove_file(path)
            .map_err(|err| EtlError::Filesystem(format!("remove {}: {err}", path.display())))?;
        Ok(outcome)
    }
}

#[derive(Clone)]
pub struct IndexdHttpClient {
    client: Client,
    presigned: Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct IndexResponse {
    #[serde(default)]
    records: Vec<IndexRecord>,
}

#[derive(Debug, Deserialize)]
struct IndexRecord {
    did: String,
    rev: Option<String>,
    #[serde(default)]
    hashes: IndexHashes,
    size: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct IndexHashes {
    md5: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UploadGrant {
    guid: String,
    url: String,
}

impl IndexdHttpClient {
    pub fn new(commons_url: &str, access_token: Option<&str>) -> Result<Self, EtlError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("ncbi-shard/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| EtlError::Upload(err.to_string()))?,
        );
        if let Some(token) = access_token.map(str::trim).filter(|token| !token.is_empty()) {
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {token}"))
                    .map_err(|err| EtlError::Upload(err.to_string()))?,
            );
        }
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(300))
            .build()
            .map_err(|err| EtlError::Upload(err.to_string()))?;
        let presigned = Client::builder()
            .timeout(Duration::from_secs(300))
            .build()
            .map_err(|err| EtlError::Upload(err.to_string()))?;
        Ok(Self {
            client,
            presigned,
            base_url: commons_url.trim_end_matches('/').to_string(),
        })
    }

    fn send_with_retries<G>(
        &self,
        policy: RetryPolicy,
        mut make_req: G,
    ) -> Result<reqwest::blocking::Response, EtlError>
    where
        G: FnMut() -> Result<reqwest::blocking::RequestBuilder, EtlError>,
    {
        const MAX_RETRIES: usize = 3;
        const BASE_DELAY_MS: u64 = 200;
        let mut attempt = 0usize;
        loop {
            let response = make_req()?.send();
            match response {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if attempt < MAX_RETRIES && policy.retries_status(status) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Ok(resp);
                }
                Err(err) => {
                    if attempt < MAX_RETRIES && policy.retries_error(&err) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Err(EtlError::Upload(err.to_string()));
                }
            }
        }
    }

    fn check_status(
        response: reqwest::blocking::Response,
    ) -> Result<reqwest::blocking::Response, EtlError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let message = response
            .text()
            .unwrap_or_else(|_| "file store request failed".to_string());
        Err(EtlError::UploadStatus { status, message })
    }
}

impl FileStore for IndexdHttpClient {
    fn find_by_name(&self, file_name: &str) -> Result<Option<FileRecord>, EtlError> {
        let url = format!("{}/index/index", self.base_url);
        let response = self.send_with_retries(RetryPolicy::Idempotent, || {
            Ok(self.client.get(&url).query(&[("file_name", file_name)]))
        })?;
        let index: IndexResponse = Self::check_status(response)?
            .json()
            .map_err(|err| EtlError::Upload(err.to_string()))?;
        Ok(index.records.into_iter().next().map(|record| FileRecord {
            did: record.did,
            rev: record.rev,
            md5: record.hashes.md5,
            size: record.size,
        }))
    }

    fn upload_file(&self, path: &Path) -> Result<String, EtlError> {
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| EtlError::Upload(format!("invalid file name {}", path.display())))?;

        let url = format!("{}/user/data/upload", self.base_url);
        let response = self.send_with_retries(RetryPolicy::ConnectOnly, || {
            Ok(self
                .client
                .post(&url)
                .json(&json!({ "file_name": file_name })))
        })?;
        let grant: UploadGrant = Self::check_status(response)?
            .json()
            .map_err(|err| EtlError::Upload(err.to_string()))?;

        let response = self.send_with_retries(RetryPolicy::Idempotent, || {
            let file = File::open(path)
                .map_err(|err| EtlError::Filesystem(format!("open {}: {err}", path.display())))?;
            Ok(self.presigned.put(&grant.url).body(file))
        })?;
        Self::check_status(response)?;
        Ok(grant.guid)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RetryPolicy {
    Idempotent,
    ConnectOnly,
}

impl RetryPolicy {
    fn retries_status(self, status: u16) -> bool {
        self == RetryPolicy::Idempotent && is_retryable_status(status)
    }

    fn retries_error(self, err: &reqwest::Error) -> bool {
        match self {
            RetryPolicy::Idempotent => is_retryable_error(err),
            RetryPolicy::ConnectOnly => err.is_connect(),
        }
    }
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}
