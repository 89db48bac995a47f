//! Single-file JSON document with atomic replace-on-write.

use std::io::Write;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::{Result, StorageError};

/// A JSON document on disk.
///
/// Reads never fail: a missing file is the default document and an
/// unparseable one is logged and treated as empty. Writes go to a unique
/// temp file in the same directory which is then renamed over the target,
/// so readers never see a partial document.
pub struct JsonDocument<D> {
    path: PathBuf,
    write_lock: Mutex<()>,
    _doc: PhantomData<fn() -> D>,
}

enum Loaded<D> {
    Missing,
    Parsed(D),
    Corrupt(serde_json::Error),
}

impl<D> JsonDocument<D>
where
    D: Default + Serialize + DeserializeOwned,
{
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
            _doc: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the current document, degrading to the default on any failure.
    pub async fn load(&self) -> D {
        match self.read().await {
            Ok(Loaded::Parsed(doc)) => doc,
            Ok(Loaded::Missing) => D::default(),
            Ok(Loaded::Corrupt(e)) => {
                warn!(path = %self.path.display(), "Store file is corrupt, reading as empty: {e}");
                D::default()
            }
            Err(e) => {
                warn!("Failed to read store, reading as empty: {e}");
                D::default()
            }
        }
    }

    /// Read-modify-write under the document lock.
    ///
    /// The in-process mutex orders writers of this handle; an advisory lock
    /// on a sibling `.lock` file orders writers across processes (the CLI
    /// and a running daemon). Nothing is awaited while the file lock is
    /// held. A corrupt file is moved aside before the mutation is applied to
    /// an empty document, so the broken content is never silently
    /// overwritten.
    pub async fn update<R>(&self, f: impl FnOnce(&mut D) -> R) -> Result<R> {
        let _guard = self.write_lock.lock().await;
        let dir = self.dir();
        std::fs::create_dir_all(&dir).map_err(|e| self.io_error(e))?;

        let lock_file = std::fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(self.lock_path())
            .map_err(|e| self.io_error(e))?;
        let mut file_lock = fd_lock::RwLock::new(lock_file);
        let _held = file_lock.write().map_err(|e| self.io_error(e))?;

        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => Some(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(self.io_error(e)),
        };
        let mut doc = match parse(bytes) {
            Loaded::Parsed(doc) => doc,
            Loaded::Missing => D::default(),
            Loaded::Corrupt(e) => {
                self.quarantine(&e)?;
                D::default()
            }
        };
        let out = f(&mut doc);
        self.write(&dir, &doc)?;
        Ok(out)
    }

    async fn read(&self) -> Result<Loaded<D>> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(parse(Some(bytes))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Loaded::Missing),
            Err(e) => Err(self.io_error(e)),
        }
    }

    /// Write to a uniquely named temp file in `dir`, then rename it over the
    /// target.
    fn write(&self, dir: &Path, doc: &D) -> Result<()> {
        let content = serde_json::to_vec_pretty(doc)?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| self.io_error(e))?;
        tmp.write_all(&content).map_err(|e| self.io_error(e))?;
        tmp.persist(&self.path).map_err(|e| self.io_error(e.error))?;
        debug!(path = %self.path.display(), "Store written");
        Ok(())
    }

    fn quarantine(&self, cause: &serde_json::Error) -> Result<()> {
        let stamp = chrono::Utc::now().format("%Y%m%d%H%M%S");
        let aside = self.path.with_extension(format!("corrupt-{stamp}"));
        warn!(
            path = %self.path.display(),
            aside = %aside.display(),
            "Store file is corrupt, moving it aside: {cause}"
        );
        std::fs::rename(&self.path, &aside).map_err(|e| self.io_error(e))
    }

    fn dir(&self) -> PathBuf {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }

    fn lock_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".lock");
        PathBuf::from(name)
    }

    fn io_error(&self, source: std::io::Error) -> StorageError {
        StorageError::Io {
            path: self.path.display().to_string(),
            source,
        }
    }
}

fn parse<D: DeserializeOwned>(bytes: Option<Vec<u8>>) -> Loaded<D> {
    let Some(bytes) = bytes else {
        return Loaded::Missing;
    };
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Loaded::Missing;
    }
    match serde_json::from_slice(&bytes) {
        Ok(doc) => Loaded::Parsed(doc),
        Err(e) => Loaded::Corrupt(e),
    }
}
