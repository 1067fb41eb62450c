use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum EtlError {
    #[error("unexpected line shape: {0}")]
    #[diagnostic(help("the source file layout changed; the splitter expects one [SDE]RR accession per line"))]
    Format(String),

    #[error("invalid accession number: {0}")]
    InvalidAccession(String),

    #[error("invalid graph node name: {0}")]
    InvalidNodeName(String),

    #[error("metadata query failed: {0}")]
    QueryHttp(String),

    #[error("metadata service returned status {status}: {message}")]
    Query { status: u16, message: String },

    #[error("unexpected metadata response for node {node}: {message}")]
    QueryShape { node: String, message: String },

    #[error("file store request failed: {0}")]
    Upload(String),

    #[error("file store returned status {status}: {message}")]
    UploadStatus { status: u16, message: String },

    #[error("object store request failed: {0}")]
    ObjectHttp(String),

    #[error("object store returned status {status} for s3://{bucket}/{key}")]
    ObjectStatus {
        status: u16,
        bucket: String,
        key: String,
    },

    #[error("failed to read object stream: {0}")]
    ObjectRead(String),

    #[error("config file not found: {0}")]
    MissingConfig(PathBuf),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("unknown file variant: {0}")]
    UnknownVariant(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("submission worker panicked")]
    WorkerPanicked,
}
