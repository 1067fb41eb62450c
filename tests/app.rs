use std::fs;
use std::io::Read;
use std::path::Path;
use std::sync::Mutex;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;
use flate2::read::GzDecoder;
use serde_json::{Map, Value, json};
use tempfile::TempDir;

use ncbi_shard_etl::app::{BatchOutcome, Etl, RunOptions};
use ncbi_shard_etl::dedup::MetadataClient;
use ncbi_shard_etl::domain::{ExclusionPolicy, SplitMode};
use ncbi_shard_etl::error::EtlError;
use ncbi_shard_etl::scratch::ScratchDir;
use ncbi_shard_etl::source::LocalObjectSource;
use ncbi_shard_etl::submit::{FileRecord, FileStore, ShardSubmitter};
use ncbi_shard_etl::variant::{VariantCatalog, VariantConfig};

const BUCKET: &str = "test-bucket";
const NODE: &str = "virus_sequence_blastn";

struct MockGraph {
    submitter_ids: Vec<&'static str>,
    fail: bool,
}

impl MockGraph {
    fn with(submitter_ids: Vec<&'static str>) -> Self {
        Self {
            submitter_ids,
            fail: false,
        }
    }

    fn failing() -> Self {
        Self {
            submitter_ids: Vec::new(),
            fail: true,
        }
    }
}

impl MetadataClient for MockGraph {
    fn query(&self, query: &str) -> Result<Value, EtlError> {
        if self.fail {
            return Err(EtlError::Query {
                status: 503,
                message: "unavailable".to_string(),
            });
        }
        assert!(query.contains(NODE));
        let records = self
            .submitter_ids
            .iter()
            .map(|id| json!({ "submitter_id": id }))
            .collect::<Vec<_>>();
        let mut data = Map::new();
        data.insert(NODE.to_string(), Value::Array(records));
        Ok(Value::Object(data))
    }
}

/// File store that remembers uploaded bodies by file name.
#[derive(Default)]
struct MemoryStore {
    files: Mutex<Vec<(String, Vec<u8>)>>,
    uploads: Mutex<usize>,
}

impl MemoryStore {
    fn body(&self, name: &str) -> Option<Vec<u8>> {
        self.files
            .lock()
            .unwrap()
            .iter()
            .find(|(file, _)| file == name)
            .map(|(_, body)| body.clone())
    }

    fn text(&self, name: &str) -> Option<String> {
        self.body(name).map(|body| String::from_utf8(body).unwrap())
    }

    fn names(&self) -> Vec<String> {
        let mut names = self
            .files
            .lock()
            .unwrap()
            .iter()
            .map(|(file, _)| file.clone())
            .collect::<Vec<_>>();
        names.sort();
        names
    }

    fn upload_count(&self) -> usize {
        *self.uploads.lock().unwrap()
    }
}

impl FileStore for MemoryStore {
    fn find_by_name(&self, file_name: &str) -> Result<Option<FileRecord>, EtlError> {
        let files = self.files.lock().unwrap();
        Ok(files
            .iter()
            .position(|(file, _)| file == file_name)
            .map(|index| FileRecord {
                did: format!("dg.TEST/{index}"),
                rev: None,
                md5: None,
                size: None,
            }))
    }

    fn upload_file(&self, path: &Path) -> Result<String, EtlError> {
        let name = path.file_name().unwrap().to_str().unwrap().to_string();
        let body = fs::read(path).unwrap();
        let mut files = self.files.lock().unwrap();
        files.push((name, body));
        *self.uploads.lock().unwrap() += 1;
        Ok(format!("dg.TEST/{}", files.len() - 1))
    }
}

impl FileStore for &'static MemoryStore {
    fn find_by_name(&self, file_name: &str) -> Result<Option<FileRecord>, EtlError> {
        (**self).find_by_name(file_name)
    }

    fn upload_file(&self, path: &Path) -> Result<String, EtlError> {
        (**self).upload_file(path)
    }
}

struct RejectingStore;

impl FileStore for RejectingStore {
    fn find_by_name(&self, _file_name: &str) -> Result<Option<FileRecord>, EtlError> {
        Ok(None)
    }

    fn upload_file(&self, _path: &Path) -> Result<String, EtlError> {
        Err(EtlError::UploadStatus {
            status: 500,
            message: "storage offline".to_string(),
        })
    }
}

fn leak_store() -> &'static MemoryStore {
    Box::leak(Box::new(MemoryStore::default()))
}

struct Fixture {
    _temp: TempDir,
    source_root: Utf8PathBuf,
    work_dir: Utf8PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let temp = TempDir::new().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        let source_root = root.join("source");
        let work_dir = root.join("work");
        fs::create_dir_all(source_root.join(BUCKET)).unwrap();
        Self {
            _temp: temp,
            source_root,
            work_dir,
        }
    }

    fn put(&self, key: &str, body: &[u8]) {
        let path = self.source_root.join(BUCKET).join(key);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, body).unwrap();
    }

    fn objects(&self) -> LocalObjectSource {
        LocalObjectSource::new(self.source_root.as_std_path())
    }

    fn scratch(&self) -> ScratchDir {
        ScratchDir::persistent(self.work_dir.clone()).unwrap()
    }

    fn temporary_scratch(&self) -> ScratchDir {
        ScratchDir::temporary(&self.work_dir).unwrap()
    }
}

fn split_variant(key: &str, header: Option<&str>) -> VariantConfig {
    VariantConfig {
        name: "annotations".to_string(),
        bucket: BUCKET.to_string(),
        key: key.to_string(),
        ext: "tsv".to_string(),
        node_name: NODE.to_string(),
        header: header.map(str::to_string),
        mode: SplitMode::Split,
    }
}

fn options(exclusion: ExclusionPolicy) -> RunOptions {
    RunOptions {
        workers: 2,
        queue_capacity: 2,
        exclusion,
    }
}

#[test]
fn splits_contiguous_groups_into_shards() {
    let fixture = Fixture::new();
    fixture.put("runs.tsv", b"header\nSRR1 dataA\nSRR1 dataB\nSRR2 dataC\n");
    let store = leak_store();
    let etl = Etl::new(
        MockGraph::with(Vec::new()),
        fixture.objects(),
        store,
        options(ExclusionPolicy::ByLine),
    );

    let report = etl
        .run(&split_variant("runs.tsv", None), &fixture.scratch())
        .unwrap();

    assert!(report.is_success());
    assert_eq!(report.lines_read, 4);
    assert_eq!(report.lines_skipped, 1);
    assert_eq!(report.shards_written, 2);
    assert_eq!(report.uploaded, 2);
    assert_eq!(
        store.text("virus_sequence_blastn_SRR1.tsv").as_deref(),
        Some("SRR1 dataA\nSRR1 dataB\n")
    );
    assert_eq!(
        store.text("virus_sequence_blastn_SRR2.tsv").as_deref(),
        Some("SRR2 dataC\n")
    );
    assert!(fixture.scratch().leftover_files().unwrap().is_empty());
}

#[test]
fn known_accessions_are_not_uploaded() {
    let fixture = Fixture::new();
    fixture.put("runs.tsv", b"header\nSRR1 dataA\nSRR1 dataB\nSRR2 dataC\n");
    let store = leak_store();
    let etl = Etl::new(
        MockGraph::with(vec!["blastn_SRR2", "no accession here"]),
        fixture.objects(),
        store,
        options(ExclusionPolicy::ByLine),
    );

    let report = etl
        .run(&split_variant("runs.tsv", None), &fixture.scratch())
        .unwrap();

    assert_eq!(report.known_accessions, 1);
    assert_eq!(report.lines_excluded, 1);
    assert_eq!(store.names(), vec!["virus_sequence_blastn_SRR1.tsv"]);
}

#[test]
fn whole_group_exclusion_skips_every_line_of_the_group() {
    let fixture = Fixture::new();
    fixture.put("runs.tsv", b"SRR1 a\nSRR2 b\nSRR2 c\nSRR3 d\n");
    let store = leak_store();
    let etl = Etl::new(
        MockGraph::with(vec!["SRR2"]),
        fixture.objects(),
        store,
        options(ExclusionPolicy::WholeGroup),
    );

    let report = etl
        .run(&split_variant("runs.tsv", None), &fixture.scratch())
        .unwrap();

    assert_eq!(report.lines_excluded, 2);
    assert_eq!(
        store.names(),
        vec!["virus_sequence_blastn_SRR1.tsv", "virus_sequence_blastn_SRR3.tsv"]
    );
}

#[test]
fn header_is_written_at_the_top_of_every_shard() {
    let fixture = Fixture::new();
    fixture.put("runs.tsv", b"SRR1\t1\nDRR7\t2\n");
    let store = leak_store();
    let etl = Etl::new(
        MockGraph::with(Vec::new()),
        fixture.objects(),
        store,
        options(ExclusionPolicy::ByLine),
    );

    etl.run(&split_variant("runs.tsv", Some("acc\tvalue\n")), &fixture.scratch())
        .unwrap();

    assert_eq!(
        store.text("virus_sequence_blastn_SRR1.tsv").as_deref(),
        Some("acc\tvalue\nSRR1\t1\n")
    );
    assert_eq!(
        store.text("virus_sequence_blastn_DRR7.tsv").as_deref(),
        Some("acc\tvalue\nDRR7\t2\n")
    );
}

#[test]
fn shards_concatenate_back_to_the_grouped_input() {
    let fixture = Fixture::new();
    let input = "SRR10 a\nSRR10 b\nERR3 c\nDRR5 d\nDRR5 e\nDRR5 f\nSRR11 g";
    fixture.put("runs.tsv", input.as_bytes());
    let store = leak_store();
    let etl = Etl::new(
        MockGraph::with(Vec::new()),
        fixture.objects(),
        store,
        options(ExclusionPolicy::ByLine),
    );

    let report = etl
        .run(&split_variant("runs.tsv", None), &fixture.scratch())
        .unwrap();
    assert_eq!(report.shards_written, 4);

    let order = ["SRR10", "ERR3", "DRR5", "SRR11"];
    let rebuilt = order
        .iter()
        .map(|acc| {
            store
                .text(&format!("virus_sequence_blastn_{acc}.tsv"))
                .unwrap()
        })
        .collect::<String>();
    assert_eq!(rebuilt, input);
}

#[test]
fn repeated_group_gets_its_own_shard() {
    let fixture = Fixture::new();
    fixture.put("runs.tsv", b"SRR1 a\nSRR2 b\nSRR1 c\n");
    let store = leak_store();
    let etl = Etl::new(
        MockGraph::with(Vec::new()),
        fixture.objects(),
        store,
        options(ExclusionPolicy::ByLine),
    );

    etl.run(&split_variant("runs.tsv", None), &fixture.scratch())
        .unwrap();

    assert_eq!(store.text("virus_sequence_blastn_SRR1.tsv").as_deref(), Some("SRR1 a\n"));
    assert_eq!(store.text("virus_sequence_blastn_SRR1.2.tsv").as_deref(), Some("SRR1 c\n"));
}

#[test]
fn empty_input_writes_no_shards() {
    let fixture = Fixture::new();
    fixture.put("runs.tsv", b"");
    let store = leak_store();
    let etl = Etl::new(
        MockGraph::with(Vec::new()),
        fixture.objects(),
        store,
        options(ExclusionPolicy::ByLine),
    );

    let report = etl
        .run(&split_variant("runs.tsv", None), &fixture.scratch())
        .unwrap();

    assert_eq!(report.shards_written, 0);
    assert_eq!(store.upload_count(), 0);
}

#[test]
fn metadata_failure_aborts_before_any_shard() {
    let fixture = Fixture::new();
    fixture.put("runs.tsv", b"SRR1 a\n");
    let store = leak_store();
    let etl = Etl::new(
        MockGraph::failing(),
        fixture.objects(),
        store,
        options(ExclusionPolicy::ByLine),
    );

    let err = etl
        .run(&split_variant("runs.tsv", None), &fixture.scratch())
        .unwrap_err();

    assert_matches!(err, EtlError::Query { status: 503, .. });
    assert_eq!(store.upload_count(), 0);
    assert!(fixture.scratch().leftover_files().unwrap().is_empty());
}

#[test]
fn malformed_line_mid_group_keeps_partial_shard() {
    let fixture = Fixture::new();
    fixture.put("runs.tsv", b"SRR1 a\nSRR2 b\ngarbage\nSRR3 c\n");
    let store = leak_store();
    let etl = Etl::new(
        MockGraph::with(Vec::new()),
        fixture.objects(),
        store,
        options(ExclusionPolicy::ByLine),
    );
    let scratch = fixture.scratch();

    let err = etl
        .run(&split_variant("runs.tsv", None), &scratch)
        .unwrap_err();

    assert_matches!(err, EtlError::Format(_));
    assert_eq!(store.names(), vec!["virus_sequence_blastn_SRR1.tsv"]);
    let leftovers = scratch.leftover_files().unwrap();
    assert_eq!(leftovers.len(), 1);
    assert_eq!(leftovers[0].file_name(), Some("virus_sequence_blastn_SRR2.tsv"));
    assert_eq!(fs::read_to_string(&leftovers[0]).unwrap(), "SRR2 b\n");
}

#[test]
fn missing_object_is_reported() {
    let fixture = Fixture::new();
    let etl = Etl::new(
        MockGraph::with(Vec::new()),
        fixture.objects(),
        leak_store(),
        options(ExclusionPolicy::ByLine),
    );

    let err = etl
        .run(&split_variant("absent.tsv", None), &fixture.scratch())
        .unwrap_err();
    assert_matches!(err, EtlError::ObjectStatus { status: 404, .. });
}

#[test]
fn whole_mode_uploads_the_compressed_object() {
    let fixture = Fixture::new();
    fixture.put("taxonomy/run.gz", b"SRR1\tcoronaviridae\n");
    let store = leak_store();
    let etl = Etl::new(
        MockGraph::failing(),
        fixture.objects(),
        store,
        RunOptions::default(),
    );
    let variant = VariantConfig {
        name: "taxonomy".to_string(),
        bucket: BUCKET.to_string(),
        key: "taxonomy/run.gz".to_string(),
        ext: "gz".to_string(),
        node_name: "virus_sequence_run_taxonomy".to_string(),
        header: None,
        mode: SplitMode::Whole,
    };
    let mut catalog = VariantCatalog::default();
    catalog.insert(variant);

    let report = etl
        .upload_and_index(&catalog, "taxonomy", &fixture.scratch())
        .unwrap();

    assert_eq!(report.mode, SplitMode::Whole);
    assert_eq!(report.uploaded, 1);
    let body = store.body("virus_sequence_run_taxonomy.gz").unwrap();
    let mut text = String::new();
    GzDecoder::new(body.as_slice())
        .read_to_string(&mut text)
        .unwrap();
    assert_eq!(text, "SRR1\tcoronaviridae\n");
}

#[test]
fn unknown_variant_is_rejected() {
    let fixture = Fixture::new();
    let etl = Etl::new(
        MockGraph::with(Vec::new()),
        fixture.objects(),
        leak_store(),
        RunOptions::default(),
    );
    let err = etl
        .upload_and_index(&VariantCatalog::builtin(), "vcf", &fixture.scratch())
        .unwrap_err();
    assert_matches!(err, EtlError::UnknownVariant(name) if name == "vcf");
}

#[test]
fn second_submit_only_removes_local_file() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("virus_sequence_blastn_SRR1.tsv");
    let store = leak_store();
    let submitter = ShardSubmitter::new(store);

    fs::write(&path, "SRR1 a\n").unwrap();
    let first = submitter.submit(&path).unwrap();
    fs::write(&path, "SRR1 a\n").unwrap();
    let second = submitter.submit(&path).unwrap();

    assert_matches!(first, ncbi_shard_etl::submit::SubmitOutcome::Uploaded { .. });
    assert_matches!(second, ncbi_shard_etl::submit::SubmitOutcome::AlreadyPresent { .. });
    assert_eq!(store.upload_count(), 1);
    assert!(!path.exists());
}

#[test]
fn failed_upload_survives_temporary_scratch() {
    let fixture = Fixture::new();
    fixture.put("runs.tsv", b"SRR1 a\nSRR2 b\n");
    let etl = Etl::new(
        MockGraph::with(Vec::new()),
        fixture.objects(),
        RejectingStore,
        options(ExclusionPolicy::ByLine),
    );
    let scratch = fixture.temporary_scratch();

    let report = etl.run(&split_variant("runs.tsv", None), &scratch).unwrap();
    drop(scratch);

    assert!(!report.is_success());
    assert_eq!(report.failed.len(), 2);
    for failed in &report.failed {
        assert!(failed.path.as_std_path().exists(), "{} was removed", failed.path);
    }
}

#[test]
fn partial_shard_survives_temporary_scratch() {
    let fixture = Fixture::new();
    fixture.put("runs.tsv", b"SRR1 a\ngarbage\n");
    let etl = Etl::new(
        MockGraph::with(Vec::new()),
        fixture.objects(),
        leak_store(),
        options(ExclusionPolicy::ByLine),
    );
    let scratch = fixture.temporary_scratch();
    let partial = scratch.root().join("virus_sequence_blastn_SRR1.tsv");

    let err = etl.run(&split_variant("runs.tsv", None), &scratch).unwrap_err();
    drop(scratch);

    assert_matches!(err, EtlError::Format(_));
    assert_eq!(fs::read_to_string(&partial).unwrap(), "SRR1 a\n");
}

#[test]
fn clean_temporary_scratch_is_removed() {
    let fixture = Fixture::new();
    fixture.put("runs.tsv", b"SRR1 a\n");
    let etl = Etl::new(
        MockGraph::with(Vec::new()),
        fixture.objects(),
        leak_store(),
        options(ExclusionPolicy::ByLine),
    );
    let scratch = fixture.temporary_scratch();
    let root = scratch.root().to_owned();

    etl.run(&split_variant("runs.tsv", None), &scratch).unwrap();
    drop(scratch);

    assert!(!root.as_std_path().exists());
}

#[test]
fn batch_keeps_reports_of_finished_variants() {
    let fixture = Fixture::new();
    fixture.put("runs.tsv", b"SRR1 a\n");
    let store = leak_store();
    let etl = Etl::new(
        MockGraph::with(Vec::new()),
        fixture.objects(),
        store,
        options(ExclusionPolicy::ByLine),
    );
    let mut catalog = VariantCatalog::default();
    catalog.insert(split_variant("runs.tsv", None));
    catalog.insert(VariantConfig {
        name: "missing".to_string(),
        ..split_variant("absent.tsv", None)
    });
    catalog.insert(VariantConfig {
        name: "never-run".to_string(),
        ..split_variant("runs.tsv", None)
    });
    let names = catalog.names();

    let BatchOutcome { reports, error } =
        etl.upload_and_index_all(&catalog, &names, |_| Ok(fixture.scratch()));

    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].variant, "annotations");
    assert_eq!(reports[0].uploaded, 1);
    assert_matches!(error, Some(EtlError::ObjectStatus { status: 404, .. }));
    assert_eq!(store.upload_count(), 1);
}
