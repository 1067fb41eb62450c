use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use directories::BaseDirs;
use tempfile::{Builder, TempDir};
use tracing::warn;

use crate::domain::AccessionNumber;
use crate::error::EtlError;

/// Local working directory for the shards of one run. A temporary directory is
/// removed on drop unless unsubmitted files are still in it.
#[derive(Debug)]
pub struct ScratchDir {
    root: Utf8PathBuf,
    guard: Option<TempDir>,
}

impl ScratchDir {
    pub fn temporary(parent: &Utf8Path) -> Result<Self, EtlError> {
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| EtlError::Filesystem(err.to_string()))?;
        let dir = Builder::new()
            .prefix("ncbi-shard")
            .tempdir_in(parent.as_std_path())
            .map_err(|err| EtlError::Filesystem(err.to_string()))?;
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf())
            .map_err(|_| EtlError::Filesystem("invalid scratch path".to_string()))?;
        Ok(Self {
            root,
            guard: Some(dir),
        })
    }

    pub fn persistent(root: Utf8PathBuf) -> Result<Self, EtlError> {
        fs::create_dir_all(root.as_std_path())
            .map_err(|err| EtlError::Filesystem(err.to_string()))?;
        Ok(Self { root, guard: None })
    }

    pub fn is_temporary(&self) -> bool {
        self.guard.is_some()
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    /// `<node>_<accession>.<ext>`, or `<node>_<accession>.<n>.<ext>` for the
    /// n-th occurrence of a non-contiguous group.
    pub fn shard_path(
        &self,
        node_name: &str,
        accession: &AccessionNumber,
        ext: &str,
        occurrence: u32,
    ) -> Utf8PathBuf {
        let name = if occurrence <= 1 {
            format!("{node_name}_{accession}.{ext}")
        } else {
            format!("{node_name}_{accession}.{occurrence}.{ext}")
        };
        self.root.join(name)
    }

    pub fn whole_path(&self, node_name: &str, ext: &str) -> Utf8PathBuf {
        self.root.join(format!("{node_name}.{ext}"))
    }

    pub fn leftover_files(&self) -> Result<Vec<Utf8PathBuf>, EtlError> {
        let mut files = Vec::new();
        let entries =
            fs::read_dir(self.root.as_std_path()).map_err(|err| EtlError::Filesystem(err.to_string()))?;
        for entry in entries {
            let entry = entry.map_err(|err| EtlError::Filesystem(err.to_string()))?;
            let path = entry.path();
            if path.is_file() {
                if let Ok(path) = Utf8PathBuf::from_path_buf(path) {
                    files.push(path);
                }
            }
        }
        files.sort();
        Ok(files)
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        let Some(guard) = self.guard.take() else {
            return;
        };
        let leftovers = match self.leftover_files() {
            Ok(files) => files.len(),
            Err(err) => {
                let kept = guard.keep();
                warn!(path = %kept.display(), error = %err, "cannot list scratch directory; keeping it");
                return;
            }
        };
        if leftovers > 0 {
            let kept = guard.keep();
            warn!(path = %kept.display(), files = leftovers, "keeping scratch directory with unsubmitted files");
        }
    }
}

pub fn default_scratch_parent() -> Result<Utf8PathBuf, EtlError> {
    BaseDirs::new()
        .and_then(|dirs| {
            Utf8PathBuf::from_path_buf(dirs.home_dir().join(".cache").join("ncbi-shard-etl")).ok()
        })
        .ok_or_else(|| EtlError::Filesystem("unable to resolve cache directory".to_string()))
}
