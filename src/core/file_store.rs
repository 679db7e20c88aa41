// JSON-document item store on the local filesystem, guarded by a sidecar lock file.
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use libc::{EACCES, EPERM};
use serde::{Deserialize, Serialize};

use crate::core::error::{Error, ErrorKind, io_error_kind};
use crate::core::item::Item;
use crate::core::store::{Applied, Change, ItemStore, StoreResult};

#[derive(Debug, Default, Serialize, Deserialize)]
struct Document {
    #[serde(default)]
    items: BTreeMap<String, Fields>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct Fields {
    quantity: i64,
}

#[derive(Clone, Debug)]
pub struct FileStore {
    path: PathBuf,
    lock_path: PathBuf,
}

struct StoreLock {
    file: File,
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

impl FileStore {
    pub fn open(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let path = path.into();
        if path.as_os_str().is_empty() {
            return Err(Error::new(ErrorKind::Usage).with_message("store path must not be empty"));
        }
        if path.is_dir() {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("store path is a directory")
                .with_path(&path)
                .with_hint("Point --store at a file such as inventory.json."));
        }
        let mut lock_name = path.as_os_str().to_owned();
        lock_name.push(".lock");
        Ok(Self {
            lock_path: PathBuf::from(lock_name),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock_exclusive(&self) -> StoreResult<StoreLock> {
        if let Some(parent) = self.lock_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|err| {
                Error::new(io_error_kind(&err))
                    .with_message("failed to create store directory")
                    .with_path(parent)
                    .with_source(err)
            })?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.lock_path)
            .map_err(|err| self.lock_open_error(err))?;
        file.lock_exclusive().map_err(|err| self.lock_failed_error(err))?;
        Ok(StoreLock { file })
    }

    /// Readers never create anything; no lock file means no writer has run yet.
    fn lock_shared(&self) -> StoreResult<Option<StoreLock>> {
        let file = match OpenOptions::new().read(true).open(&self.lock_path) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(self.lock_open_error(err)),
        };
        file.lock_shared().map_err(|err| self.lock_failed_error(err))?;
        Ok(Some(StoreLock { file }))
    }

    fn lock_open_error(&self, err: io::Error) -> Error {
        Error::new(io_error_kind(&err))
            .with_message("failed to open store lock")
            .with_path(&self.lock_path)
            .with_source(err)
    }

    fn lock_failed_error(&self, err: io::Error) -> Error {
        Error::new(lock_error_kind(&err))
            .with_message("failed to lock store")
            .with_path(&self.lock_path)
            .with_source(err)
    }

    fn read_snapshot(&self) -> StoreResult<Document> {
        let _lock = self.lock_shared()?;
        self.read_document()
    }

    fn read_document(&self) -> StoreResult<Document> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Document::default()),
            Err(err) => {
                return Err(Error::new(io_error_kind(&err))
                    .with_message("failed to read store")
                    .with_path(&self.path)
                    .with_source(err));
            }
        };
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Document::default());
        }
        serde_json::from_slice(&bytes).map_err(|err| {
            Error::new(ErrorKind::Corrupt)
                .with_message("store file is not a valid inventory document")
                .with_path(&self.path)
                .with_hint("Restore the file from a backup or move it aside to start empty.")
                .with_source(err)
        })
    }

    fn write_document(&self, document: &Document) -> StoreResult<()> {
        let encoded = serde_json::to_vec_pretty(document).map_err(|err| {
            Error::new(ErrorKind::Internal)
                .with_message("failed to encode store")
                .with_source(err)
        })?;
        let mut tmp_name = self.path.as_os_str().to_owned();
        tmp_name.push(".tmp");
        let tmp_path = PathBuf::from(tmp_name);
        let write = || -> io::Result<()> {
            let mut file = File::create(&tmp_path)?;
            file.write_all(&encoded)?;
            file.write_all(b"\n")?;
            file.sync_all()?;
            fs::rename(&tmp_path, &self.path)
        };
        write().map_err(|err| {
            Error::new(io_error_kind(&err))
                .with_message("failed to write store")
                .with_path(&self.path)
                .with_source(err)
        })
    }

    fn mutate<T>(&self, f: impl FnOnce(&mut Document) -> T) -> StoreResult<T> {
        let _lock = self.lock_exclusive()?;
        let mut document = self.read_document()?;
        let out = f(&mut document);
        self.write_document(&document)?;
        Ok(out)
    }
}

impl ItemStore for FileStore {
    fn list(&self) -> StoreResult<Vec<Item>> {
        let document = self.read_snapshot()?;
        Ok(document
            .items
            .into_iter()
            .map(|(name, fields)| Item::new(name, fields.quantity))
            .collect())
    }

    fn get(&self, name: &str) -> StoreResult<Option<i64>> {
        let document = self.read_snapshot()?;
        Ok(document.items.get(name).map(|fields| fields.quantity))
    }

    fn put(&self, name: &str, quantity: i64) -> StoreResult<()> {
        self.mutate(|document| {
            document.items.insert(name.to_string(), Fields { quantity });
        })
    }

    fn delete(&self, name: &str) -> StoreResult<()> {
        let _lock = self.lock_exclusive()?;
        let mut document = self.read_document()?;
        if document.items.remove(name).is_some() {
            self.write_document(&document)?;
        }
        Ok(())
    }

    fn apply(&self, name: &str, change: Change) -> StoreResult<Applied> {
        let _lock = self.lock_exclusive()?;
        let mut document = self.read_document()?;
        let applied = change.resolve(document.items.get(name).map(|fields| fields.quantity));
        match applied {
            Applied::Stored { quantity } => {
                document.items.insert(name.to_string(), Fields { quantity });
            }
            Applied::Deleted => {
                document.items.remove(name);
            }
            Applied::Unchanged => return Ok(applied),
        }
        self.write_document(&document)?;
        Ok(applied)
    }
}

fn lock_error_kind(err: &io::Error) -> ErrorKind {
    let errno = err.raw_os_error().unwrap_or_default();
    if errno == EACCES || errno == EPERM {
        return ErrorKind::Permission;
    }
    match err.kind() {
        io::ErrorKind::WouldBlock => ErrorKind::Busy,
        _ => ErrorKind::Io,
    }
}
