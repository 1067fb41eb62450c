use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use flate2::Compression;
use flate2::write::GzEncoder;
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use tracing::info;

use crate::error::EtlError;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const LINE_BUF_SIZE: usize = 256 * 1024;

pub trait ObjectSource: Send + Sync {
    fn open_lines(&self, bucket: &str, key: &str) -> Result<Box<dyn BufRead + Send>, EtlError>;

    fn download(&self, bucket: &str, key: &str, destination: &Path) -> Result<u64, EtlError>;
}

#[derive(Clone)]
pub struct S3PublicClient {
    client: Client,
    endpoint: Option<String>,
}

impl S3PublicClient {
    pub fn new() -> Result<Self, EtlError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("ncbi-shard/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| EtlError::ObjectHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .connect_timeout(Duration::from_secs(30))
            .timeout(None)
            .build()
            .map_err(|err| EtlError::ObjectHttp(err.to_string()))?;
        Ok(Self {
            client,
            endpoint: None,
        })
    }

    pub fn with_endpoint(mut self, endpoint: &str) -> Self {
        self.endpoint = Some(endpoint.trim_end_matches('/').to_string());
        self
    }

    pub fn object_url(&self, bucket: &str, key: &str) -> String {
        let key = key.trim_start_matches('/');
        match &self.endpoint {
            Some(endpoint) => format!("{endpoint}/{bucket}/{key}"),
            None => format!("https://{bucket}.s3.amazonaws.com/{key}"),
        }
    }

    fn get(&self, bucket: &str, key: &str) -> Result<reqwest::blocking::Response, EtlError> {
        let url = self.object_url(bucket, key);
        let response = self
            .client
            .get(&url)
            .send()
            .map_err(|err| EtlError::ObjectHttp(err.to_string()))?;
        if !response.status().is_success() {
            return Err(EtlError::ObjectStatus {
                status: response.status().as_u16(),
                bucket: bucket.to_string(),
                key: key.to_string(),
            });
        }
        Ok(response)
    }
}

impl ObjectSource for S3PublicClient {
    fn open_lines(&self, bucket: &str, key: &str) -> Result<Box<dyn BufRead + Send>, EtlError> {
        let response = self.get(bucket, key)?;
        info!(bucket, key, length = ?response.content_length(), "streaming object");
        Ok(Box::new(BufReader::with_capacity(LINE_BUF_SIZE, response)))
    }

    fn download(&self, bucket: &str, key: &str, destination: &Path) -> Result<u64, EtlError> {
        let response = self.get(bucket, key)?;
        info!(bucket, key, destination = %destination.display(), "downloading object");
        write_gzip(response, destination)
    }
}

#[derive(Debug, Clone)]
pub struct LocalObjectSource {
    root: PathBuf,
}

impl LocalObjectSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn object_path(&self, bucket: &str, key: &str) -> PathBuf {
        self.root.join(bucket).join(key.trim_start_matches('/'))
    }

    fn open(&self, bucket: &str, key: &str) -> Result<File, EtlError> {
        let path = self.object_path(bucket, key);
        File::open(&path).map_err(|err| match err.kind() {
            io::ErrorKind::NotFound => EtlError::ObjectStatus {
                status: 404,
                bucket: bucket.to_string(),
                key: key.to_string(),
            },
            _ => EtlError::ObjectRead(format!("open {}: {err}", path.display())),
        })
    }
}

impl ObjectSource for LocalObjectSource {
    fn open_lines(&self, bucket: &str, key: &str) -> Result<Box<dyn BufRead + Send>, EtlError> {
        let file = self.open(bucket, key)?;
        Ok(Box::new(BufReader::with_capacity(LINE_BUF_SIZE, file)))
    }

    fn download(&self, bucket: &str, key: &str, destination: &Path) -> Result<u64, EtlError> {
        let file = self.open(bucket, key)?;
        write_gzip(file, destination)
    }
}

/// Copies `body` to `destination`, gzip-wrapping it unless it already starts
/// with the gzip magic bytes.
pub fn write_gzip<R: Read>(body: R, destination: &Path) -> Result<u64, EtlError> {
    let mut reader = BufReader::new(body);
    let is_gzip = reader
        .fill_buf()
        .map_err(|err| EtlError::ObjectRead(err.to_string()))?
        .starts_with(&GZIP_MAGIC);

    if let Some(parent) = destination.parent() {
        fs::create_dir_all(parent).map_err(|err| EtlError::Filesystem(err.to_string()))?;
    }
    let mut file = File::create(destination)
        .map_err(|err| EtlError::Filesystem(format!("create {}: {err}", destination.display())))?;

    if is_gzip {
        let written = io::copy(&mut reader, &mut file)
            .map_err(|err| EtlError::ObjectRead(err.to_string()))?;
        return Ok(written);
    }

    let mut encoder = GzEncoder::new(file, Compression::default());
    io::copy(&mut reader, &mut encoder).map_err(|err| EtlError::ObjectRead(err.to_string()))?;
    let mut file = encoder
        .finish()
        .map_err(|err| EtlError::Filesystem(err.to_string()))?;
    file.flush()
        .map_err(|err| EtlError::Filesystem(err.to_string()))?;
    let written = file
        .metadata()
        .map_err(|err| EtlError::Filesystem(err.to_string()))?
        .len();
    Ok(written)
}

/// Reads one line including its terminator. `Ok(false)` at end of stream.
pub fn next_line(reader: &mut dyn BufRead, line: &mut String) -> Result<bool, EtlError> {
    line.clear();
    let read = reader.read_line(line).map_err(|err| match err.kind() {
        io::ErrorKind::InvalidData => EtlError::ObjectRead(format!("invalid UTF-8 in object: {err}")),
        _ => EtlError::ObjectRead(err.to_string()),
    })?;
    Ok(read > 0)
}
