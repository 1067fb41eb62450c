//! Splits bulk SRA annotation files into per-accession shards, submits them to
//! a data commons file store and skips accessions the metadata graph already
//! knows about.

pub mod app;
pub mod classify;
pub mod config;
pub mod dedup;
pub mod domain;
pub mod error;
pub mod output;
pub mod pool;
pub mod scratch;
pub mod source;
pub mod submit;
pub mod variant;
pub mod writer;
