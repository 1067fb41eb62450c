use std::io::BufRead;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::classify::LineClassifier;
use crate::config::{DEFAULT_QUEUE_CAPACITY, DEFAULT_WORKERS, ResolvedConfig};
use crate::dedup::{ExcludedSet, MetadataClient, fetch_excluded};
use crate::domain::{ExclusionPolicy, SplitMode};
use crate::error::EtlError;
use crate::pool::{FailedShard, SubmissionPool, SubmissionSummary, SubmittedShard};
use crate::scratch::ScratchDir;
use crate::source::{ObjectSource, next_line};
use crate::submit::{FileStore, ShardSubmitter};
use crate::variant::{VariantCatalog, VariantConfig};
use crate::writer::ShardWriter;

#[derive(Debug, Clone, Copy)]
pub struct RunOptions {
    pub workers: usize,
    pub queue_capacity: usize,
    pub exclusion: ExclusionPolicy,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            exclusion: ExclusionPolicy::default(),
        }
    }
}

impl From<&ResolvedConfig> for RunOptions {
    fn from(config: &ResolvedConfig) -> Self {
        Self {
            workers: config.workers,
            queue_capacity: config.queue_capacity,
            exclusion: config.exclusion,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub variant: String,
    pub node_name: String,
    pub mode: SplitMode,
    pub started_at: String,
    pub elapsed_ms: u128,
    pub known_accessions: usize,
    pub lines_read: u64,
    pub lines_skipped: u64,
    pub lines_excluded: u64,
    pub shards_written: u64,
    pub uploaded: usize,
    pub already_present: usize,
    pub submitted: Vec<SubmittedShard>,
    pub failed: Vec<FailedShard>,
}

impl RunReport {
    fn new(variant: &VariantConfig) -> Self {
        Self {
            variant: variant.name.clone(),
            node_name: variant.node_name.clone(),
            mode: variant.mode,
            started_at: Utc::now().to_rfc3339(),
            elapsed_ms: 0,
            known_accessions: 0,
            lines_read: 0,
            lines_skipped: 0,
            lines_excluded: 0,
            shards_written: 0,
            uploaded: 0,
            already_present: 0,
            submitted: Vec::new(),
            failed: Vec::new(),
        }
    }

    fn absorb(&mut self, summary: SubmissionSummary) {
        self.uploaded = summary.uploaded();
        self.already_present = summary.already_present();
        self.submitted = summary.submitted;
        self.failed = summary.failed;
    }

    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

#[derive(Debug)]
pub struct BatchOutcome {
    pub reports: Vec<RunReport>,
    pub error: Option<EtlError>,
}

#[derive(Default)]
struct LineCounters {
    read: u64,
    skipped: u64,
}

pub struct Etl<M: MetadataClient, O: ObjectSource, F: FileStore + 'static> {
    metadata: M,
    objects: O,
    submitter: Arc<ShardSubmitter<F>>,
    options: RunOptions,
}

impl<M: MetadataClient, O: ObjectSource, F: FileStore + 'static> Etl<M, O, F> {
    pub fn new(metadata: M, objects: O, files: F, options: RunOptions) -> Self {
        Self {
            metadata,
            objects,
            submitter: Arc::new(ShardSubmitter::new(files)),
            options,
        }
    }

    pub fn upload_and_index(
        &self,
        catalog: &VariantCatalog,
        name: &str,
        scratch: &ScratchDir,
    ) -> Result<RunReport, EtlError> {
        let variant = catalog.get(name)?;
        self.run(variant, scratch)
    }

    pub fn upload_and_index_all<S>(
        &self,
        catalog: &VariantCatalog,
        names: &[String],
        mut scratch_for: S,
    ) -> BatchOutcome
    where
        S: FnMut(&str) -> Result<ScratchDir, EtlError>,
    {
        let mut reports = Vec::with_capacity(names.len());
        for name in names {
            let result = scratch_for(name).and_then(|scratch| {
                let report = self.upload_and_index(catalog, name, &scratch)?;
                if !scratch.is_temporary() {
                    for path in scratch.leftover_files()? {
                        warn!(path = %path, "unsubmitted file left in work directory");
                    }
                }
                Ok(report)
            });
            match result {
                Ok(report) => reports.push(report),
                Err(err) => {
                    return BatchOutcome {
                        reports,
                        error: Some(err),
                    };
                }
            }
        }
        BatchOutcome {
            reports,
            error: None,
        }
    }

    pub fn run(&self, variant: &VariantConfig, scratch: &ScratchDir) -> Result<RunReport, EtlError> {
        let start = Instant::now();
        info!(
            variant = %variant.name,
            node = %variant.node_name,
            mode = %variant.mode,
            scratch = %scratch.root(),
            "starting run"
        );
        let mut report = RunReport::new(variant);
        match variant.mode {
            SplitMode::Split => self.run_split(variant, scratch, &mut report)?,
            SplitMode::Whole => self.run_whole(variant, scratch, &mut report)?,
        }
        report.elapsed_ms = start.elapsed().as_millis();
        info!(
            variant = %variant.name,
            uploaded = report.uploaded,
            already_present = report.already_present,
            failed = report.failed.len(),
            elapsed_ms = report.elapsed_ms as u64,
            "run finished"
        );
        Ok(report)
    }

    fn run_split(
        &self,
        variant: &VariantConfig,
        scratch: &ScratchDir,
        report: &mut RunReport,
    ) -> Result<(), EtlError> {
        let excluded = fetch_excluded(&self.metadata, &variant.node_name)?;
        report.known_accessions = excluded.len();

        let mut reader = self.objects.open_lines(&variant.bucket, &variant.key)?;
        let mut pool = SubmissionPool::spawn(
            self.submitter.clone(),
            self.options.workers,
            self.options.queue_capacity,
        )?;
        let mut writer = ShardWriter::new(
            scratch,
            &variant.node_name,
            &variant.ext,
            variant.header.as_deref(),
            self.options.exclusion,
        );

        let mut counters = LineCounters::default();
        let streamed = split_stream(
            reader.as_mut(),
            &excluded,
            &mut writer,
            &mut pool,
            &mut counters,
        );

        report.lines_read = counters.read;
        report.lines_skipped = counters.skipped;
        report.lines_excluded = writer.stats().lines_excluded;
        report.shards_written = writer.stats().shards_opened;

        if let Err(err) = streamed {
            error!(
                variant = %variant.name,
                error = %err,
                line = counters.read,
                accession = ?writer.current(),
                "aborting run"
            );
            writer.abort();
            match pool.drain() {
                Ok(summary) => report.absorb(summary),
                Err(drain_err) => warn!(error = %drain_err, "submission pool did not drain cleanly"),
            }
            return Err(err);
        }

        debug!(handed_off = pool.handed_off(), "stream finished, draining submissions");
        report.absorb(pool.drain()?);
        Ok(())
    }

    fn run_whole(
        &self,
        variant: &VariantConfig,
        scratch: &ScratchDir,
        report: &mut RunReport,
    ) -> Result<(), EtlError> {
        let path = scratch.whole_path(&variant.node_name, &variant.ext);
        self.objects
            .download(&variant.bucket, &variant.key, path.as_std_path())?;
        report.shards_written = 1;

        let mut summary = SubmissionSummary::default();
        let file = path.file_name().unwrap_or(path.as_str()).to_string();
        match self.submitter.submit(path.as_std_path()) {
            Ok(outcome) => summary.submitted.push(SubmittedShard {
                accession: None,
                file,
                outcome,
            }),
            Err(err) => {
                error!(path = %path, error = %err, "submission failed; keeping local file");
                summary.failed.push(FailedShard {
                    accession: None,
                    path,
                    error: err.to_string(),
                });
            }
        }
        report.absorb(summary);
        Ok(())
    }
}

fn split_stream(
    reader: &mut dyn BufRead,
    excluded: &ExcludedSet,
    writer: &mut ShardWriter<'_>,
    pool: &mut SubmissionPool,
    counters: &mut LineCounters,
) -> Result<(), EtlError> {
    let classifier = LineClassifier::new();
    let mut line = String::new();
    while next_line(reader, &mut line)? {
        counters.read += 1;
        let Some(token) = classifier.classify(&line, writer.group_open())? else {
            counters.skipped += 1;
            continue;
        };
        if let Some(closed) = writer.accept(&line, &token, excluded)? {
            pool.handoff(closed)?;
        }
    }
    if let Some(closed) = writer.finish()? {
        pool.handoff(closed)?;
    }
    Ok(())
}
