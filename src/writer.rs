use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Write};

use camino::Utf8PathBuf;
use serde::Serialize;
use tracing::{debug, warn};

use crate::dedup::ExcludedSet;
use crate::domain::{AccessionNumber, ExclusionPolicy};
use crate::error::EtlError;
use crate::scratch::ScratchDir;

#[derive(Debug, Clone, Serialize)]
pub struct ClosedShard {
    pub accession: AccessionNumber,
    pub path: Utf8PathBuf,
    pub lines: u64,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct WriterStats {
    pub lines_written: u64,
    pub lines_excluded: u64,
    pub shards_opened: u64,
}

struct OpenShard {
    accession: AccessionNumber,
    path: Utf8PathBuf,
    out: BufWriter<File>,
    lines: u64,
}

impl OpenShard {
    fn close(self) -> Result<ClosedShard, EtlError> {
        let file = self
            .out
            .into_inner()
            .map_err(|err| EtlError::Filesystem(format!("flush {}: {}", self.path, err.error())))?;
        drop(file);
        Ok(ClosedShard {
            accession: self.accession,
            path: self.path,
            lines: self.lines,
        })
    }
}

enum State {
    Idle,
    Open(OpenShard),
    Skipping(AccessionNumber),
}

/// Cuts a stream of classified lines into one local file per contiguous
/// accession group. Only one shard is open at any time.
pub struct ShardWriter<'a> {
    scratch: &'a ScratchDir,
    node_name: String,
    ext: String,
    header: Option<String>,
    policy: ExclusionPolicy,
    state: State,
    occurrences: HashMap<AccessionNumber, u32>,
    stats: WriterStats,
}

impl<'a> ShardWriter<'a> {
    pub fn new(
        scratch: &'a ScratchDir,
        node_name: &str,
        ext: &str,
        header: Option<&str>,
        policy: ExclusionPolicy,
    ) -> Self {
        Self {
            scratch,
            node_name: node_name.to_string(),
            ext: ext.to_string(),
            header: header.map(str::to_string),
            policy,
            state: State::Idle,
            occurrences: HashMap::new(),
            stats: WriterStats::default(),
        }
    }

    pub fn group_open(&self) -> bool {
        !matches!(self.state, State::Idle)
    }

    pub fn current(&self) -> Option<&AccessionNumber> {
        match &self.state {
            State::Idle => None,
            State::Open(shard) => Some(&shard.accession),
            State::Skipping(acc) => Some(acc),
        }
    }

    pub fn stats(&self) -> WriterStats {
        self.stats
    }

    pub fn accept(
        &mut self,
        line: &str,
        token: &AccessionNumber,
        excluded: &ExcludedSet,
    ) -> Result<Option<ClosedShard>, EtlError> {
        if excluded.contains(token) {
            self.stats.lines_excluded += 1;
            return match self.policy {
                ExclusionPolicy::ByLine => Ok(None),
                ExclusionPolicy::WholeGroup => self.skip_group(token),
            };
        }

        let mut closed = None;
        let same_group = matches!(&self.state, State::Open(shard) if shard.accession == *token);
        if !same_group {
            closed = self.close_current()?;
            let shard = self.open(token)?;
            self.state = State::Open(shard);
        }

        let State::Open(shard) = &mut self.state else {
            unreachable!("a shard is open after the boundary check");
        };
        shard
            .out
            .write_all(line.as_bytes())
            .map_err(|err| EtlError::Filesystem(format!("write {}: {err}", shard.path)))?;
        shard.lines += 1;
        self.stats.lines_written += 1;
        Ok(closed)
    }

    pub fn finish(&mut self) -> Result<Option<ClosedShard>, EtlError> {
        self.close_current()
    }

    /// Closes the open shard without handing it off. The partial file stays in
    /// the scratch directory.
    pub fn abort(&mut self) -> Option<Utf8PathBuf> {
        match std::mem::replace(&mut self.state, State::Idle) {
            State::Open(shard) => {
                let path = shard.path.clone();
                if let Err(err) = shard.close() {
                    warn!(path = %path, error = %err, "failed to close partial shard");
                }
                warn!(path = %path, "partial shard left in scratch directory");
                Some(path)
            }
            State::Idle | State::Skipping(_) => None,
        }
    }

    fn skip_group(&mut self, token: &AccessionNumber) -> Result<Option<ClosedShard>, EtlError> {
        if matches!(&self.state, State::Skipping(acc) if acc == token) {
            return Ok(None);
        }
        debug!(accession = %token, "skipping excluded group");
        let closed = self.close_current()?;
        self.state = State::Skipping(token.clone());
        Ok(closed)
    }

    fn close_current(&mut self) -> Result<Option<ClosedShard>, EtlError> {
        match std::mem::replace(&mut self.state, State::Idle) {
            State::Open(shard) => shard.close().map(Some),
            State::Idle | State::Skipping(_) => Ok(None),
        }
    }

    fn open(&mut self, token: &AccessionNumber) -> Result<OpenShard, EtlError> {
        let occurrence = self.occurrences.entry(token.clone()).or_insert(0);
        *occurrence += 1;
        let occurrence = *occurrence;
        if occurrence > 1 {
            warn!(
                accession = %token,
                occurrence,
                "accession group is not contiguous; writing a separate shard"
            );
        }

        let path = self
            .scratch
            .shard_path(&self.node_name, token, &self.ext, occurrence);
        let file = File::create(path.as_std_path())
            .map_err(|err| EtlError::Filesystem(format!("create {path}: {err}")))?;
        let mut out = BufWriter::new(file);
        if let Some(header) = &self.header {
            out.write_all(header.as_bytes())
                .map_err(|err| EtlError::Filesystem(format!("write {path}: {err}")))?;
        }
        self.stats.shards_opened += 1;
        debug!(accession = %token, path = %path, "opened shard");
        Ok(OpenShard {
            accession: token.clone(),
            path,
            out,
            lines: 0,
        })
    }
}
