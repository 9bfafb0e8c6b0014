//! Filesystem backends.
//!
//! Layout under a state directory:
//!
//! ```text
//! <root>/lineage.json     lineage table + active pointer (rewritten atomically)
//! <root>/benchmarks.jsonl one BenchmarkRun per line (append-only)
//! <root>/audit.jsonl      one AuditRecord per line (append-only)
//! ```

use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::StorageError;
use crate::records::{
    AuditRecord, BenchmarkRun, PolicyParameters, PolicyVersion, VersionId, VersionOrigin,
};
use crate::storage_traits::*;
use crate::table::LineageTable;

const LINEAGE_FILE: &str = "lineage.json";
const BENCHMARK_FILE: &str = "benchmarks.jsonl";
const AUDIT_FILE: &str = "audit.jsonl";

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ---------------------------------------------------------------------------
// FsPolicyLineage
// ---------------------------------------------------------------------------

/// Lineage table persisted as a single JSON document.
///
/// Every mutation rewrites the document through a temp file in the same
/// directory followed by a rename, so readers never observe a partial write.
pub struct FsPolicyLineage {
    path: PathBuf,
    table: Mutex<LineageTable>,
}

impl FsPolicyLineage {
    /// Open (or create) the lineage document under `root`.
    pub fn open(root: impl AsRef<Path>) -> StorageResult<Self> {
        fs::create_dir_all(root.as_ref())?;
        let path = root.as_ref().join(LINEAGE_FILE);
        let table = if path.exists() {
            let bytes = fs::read(&path)?;
            let table: LineageTable = serde_json::from_slice(&bytes)?;
            table.check(&path.display().to_string())?;
            table
        } else {
            LineageTable::default()
        };
        debug!(path = %path.display(), versions = table.versions.len(), "lineage opened");
        Ok(Self {
            path,
            table: Mutex::new(table),
        })
    }

    fn persist(&self, table: &LineageTable) -> StorageResult<()> {
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        let mut tmp = NamedTempFile::new_in(dir)?;
        serde_json::to_writer_pretty(&mut tmp, table)?;
        tmp.write_all(b"\n")?;
        tmp.persist(&self.path).map_err(|e| e.error)?;
        Ok(())
    }
}

#[async_trait]
impl PolicyLineage for FsPolicyLineage {
    async fn create_version(
        &self,
        parent: Option<VersionId>,
        parameters: PolicyParameters,
        origin: VersionOrigin,
    ) -> StorageResult<PolicyVersion> {
        let mut table = lock(&self.table);
        let mut next = table.clone();
        let version = next.create(parent, parameters, origin)?;
        self.persist(&next)?;
        *table = next;
        Ok(version)
    }

    async fn get(&self, id: VersionId) -> StorageResult<PolicyVersion> {
        lock(&self.table).get(id)
    }

    async fn list(&self) -> StorageResult<Vec<PolicyVersion>> {
        Ok(lock(&self.table).versions.clone())
    }

    async fn active(&self) -> StorageResult<Option<VersionId>> {
        Ok(lock(&self.table).active)
    }

    async fn set_active(&self, id: VersionId) -> StorageResult<()> {
        let mut table = lock(&self.table);
        let mut next = table.clone();
        next.set_active(id)?;
        self.persist(&next)?;
        *table = next;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// JSONL logs
// ---------------------------------------------------------------------------

/// Append-only JSON-lines file of `T`.
pub struct JsonlLog<T> {
    path: PathBuf,
    write_guard: Mutex<()>,
    _record: PhantomData<fn() -> T>,
}

impl<T> JsonlLog<T>
where
    T: Serialize + DeserializeOwned,
{
    pub fn open(path: impl Into<PathBuf>) -> StorageResult<Self> {
        let path = path.into();
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        Ok(Self {
            path,
            write_guard: Mutex::new(()),
            _record: PhantomData,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append_record(&self, record: &T) -> StorageResult<()> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');
        let _guard = lock(&self.write_guard);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(&line)?;
        file.flush()?;
        Ok(())
    }

    fn read_all(&self) -> StorageResult<Vec<T>> {
        let file = match fs::File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut out = Vec::new();
        for (idx, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let record = serde_json::from_str(&line).map_err(|e| StorageError::Corrupt {
                location: format!("{}:{}", self.path.display(), idx + 1),
                reason: e.to_string(),
            })?;
            out.push(record);
        }
        Ok(out)
    }
}

/// Benchmark log stored as `benchmarks.jsonl` under a state directory.
pub type JsonlBenchmarkLog = JsonlLog<BenchmarkRun>;

/// Audit log stored as `audit.jsonl` under a state directory.
pub type JsonlAuditLog = JsonlLog<AuditRecord>;

impl JsonlBenchmarkLog {
    pub fn in_dir(root: impl AsRef<Path>) -> StorageResult<Self> {
        Self::open(root.as_ref().join(BENCHMARK_FILE))
    }
}

impl JsonlAuditLog {
    pub fn in_dir(root: impl AsRef<Path>) -> StorageResult<Self> {
        Self::open(root.as_ref().join(AUDIT_FILE))
    }
}

#[async_trait]
impl BenchmarkLog for JsonlBenchmarkLog {
    async fn append(&self, run: BenchmarkRun) -> StorageResult<()> {
        self.append_record(&run)
    }

    async fn list(&self) -> StorageResult<Vec<BenchmarkRun>> {
        self.read_all()
    }
}

#[async_trait]
impl AuditLog for JsonlAuditLog {
    async fn append(&self, record: AuditRecord) -> StorageResult<()> {
        self.append_record(&record)
    }

    async fn list(&self) -> StorageResult<Vec<AuditRecord>> {
        self.read_all()
    }
}
