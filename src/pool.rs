//! Background submission of finished shards.

use std::sync::mpsc::{Receiver, SyncSender, sync_channel};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use camino::Utf8PathBuf;
use serde::Serialize;
use tracing::{debug, error};

use crate::domain::AccessionNumber;
use crate::error::EtlError;
use crate::submit::{FileStore, ShardSubmitter, SubmitOutcome};
use crate::writer::ClosedShard;

#[derive(Debug, Clone, Serialize)]
pub struct SubmittedShard {
    pub accession: Option<AccessionNumber>,
    pub file: String,
    #[serde(flatten)]
    pub outcome: SubmitOutcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct FailedShard {
    pub accession: Option<AccessionNumber>,
    pub path: Utf8PathBuf,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SubmissionSummary {
    pub submitted: Vec<SubmittedShard>,
    pub failed: Vec<FailedShard>,
}

impl SubmissionSummary {
    pub fn uploaded(&self) -> usize {
        self.submitted
            .iter()
            .filter(|shard| matches!(shard.outcome, SubmitOutcome::Uploaded { .. }))
            .count()
    }

    pub fn already_present(&self) -> usize {
        self.submitted
            .iter()
            .filter(|shard| matches!(shard.outcome, SubmitOutcome::AlreadyPresent { .. }))
            .count()
    }

    pub fn merge(&mut self, other: SubmissionSummary) {
        self.submitted.extend(other.submitted);
        self.failed.extend(other.failed);
    }
}

pub struct SubmissionPool {
    sender: Option<SyncSender<ClosedShard>>,
    workers: Vec<JoinHandle<SubmissionSummary>>,
    handed_off: u64,
}

impl SubmissionPool {
    pub fn spawn<F: FileStore + 'static>(
        submitter: Arc<ShardSubmitter<F>>,
        workers: usize,
        capacity: usize,
    ) -> Result<Self, EtlError> {
        let (sender, receiver) = sync_channel::<ClosedShard>(capacity.max(1));
        let receiver = Arc::new(Mutex::new(receiver));

        let mut handles = Vec::with_capacity(workers.max(1));
        for idx in 0..workers.max(1) {
            let receiver = receiver.clone();
            let submitter = submitter.clone();
            let handle = std::thread::Builder::new()
                .name(format!("shard-submit-{idx}"))
                .spawn(move || worker_loop(&receiver, &submitter))
                .map_err(|err| EtlError::Filesystem(format!("spawn submission worker: {err}")))?;
            handles.push(handle);
        }

        Ok(Self {
            sender: Some(sender),
            workers: handles,
            handed_off: 0,
        })
    }

    pub fn handoff(&mut self, shard: ClosedShard) -> Result<(), EtlError> {
        let sender = self.sender.as_ref().ok_or(EtlError::WorkerPanicked)?;
        debug!(accession = %shard.accession, path = %shard.path, "handing off shard");
        sender.send(shard).map_err(|_| EtlError::WorkerPanicked)?;
        self.handed_off += 1;
        Ok(())
    }

    pub fn handed_off(&self) -> u64 {
        self.handed_off
    }

    /// Closes the queue and waits until every handed-off shard is submitted
    /// or has failed.
    pub fn drain(mut self) -> Result<SubmissionSummary, EtlError> {
        drop(self.sender.take());
        let mut summary = SubmissionSummary::default();
        let mut panicked = false;
        for handle in std::mem::take(&mut self.workers) {
            match handle.join() {
                Ok(part) => summary.merge(part),
                Err(_) => {
                    error!("submission worker panicked");
                    panicked = true;
                }
            }
        }
        if panicked {
            return Err(EtlError::WorkerPanicked);
        }
        Ok(summary)
    }
}

impl Drop for SubmissionPool {
    fn drop(&mut self) {
        drop(self.sender.take());
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

fn worker_loop<F: FileStore>(
    receiver: &Mutex<Receiver<ClosedShard>>,
    submitter: &ShardSubmitter<F>,
) -> SubmissionSummary {
    let mut summary = SubmissionSummary::default();
    loop {
        let next = match receiver.lock() {
            Ok(guard) => guard.recv(),
            Err(_) => break,
        };
        let Ok(shard) = next else {
            break;
        };
        let file = shard
            .path
            .file_name()
            .map(str::to_string)
            .unwrap_or_else(|| shard.path.to_string());
        match submitter.submit(shard.path.as_std_path()) {
            Ok(outcome) => summary.submitted.push(SubmittedShard {
                accession: Some(shard.accession),
                file,
                outcome,
            }),
            Err(err) => {
                error!(path = %shard.path, error = %err, "shard submission failed; keeping local file");
                summary.failed.push(FailedShard {
                    accession: Some(shard.accession),
                    path: shard.path,
                    error: err.to_string(),
                });
            }
        }
    }
    summary
}
