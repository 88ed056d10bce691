//! Versioned JSON metadata store
//!
//! Every metadata document is a JSON envelope `{version, payload}` written
//! atomically: the target file is locked exclusively, the new content goes
//! to a `.tmp` sibling, and a rename swaps it into place. Reading checks
//! the envelope version before decoding the payload, so a document from an
//! incompatible build surfaces as a metadata error instead of a mangled
//! struct.
//!
//! Writes can be delayed: a delayed document is queued in memory and only
//! hits disk on `flush_pending`. Reads consult the queue first so a
//! delayed write is never invisible to its own process.

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use linkvault_common::{VaultError, VaultResult};
use serde::Serialize;
use serde::de::DeserializeOwned;

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct Envelope {
    version: u32,
    payload: serde_json::Value,
}

/// Store for all persisted linkvault metadata documents.
#[derive(Debug, Default)]
pub struct MetaStore {
    pending: HashMap<PathBuf, Envelope>,
}

impl MetaStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a document, returning `Ok(None)` when it does not exist.
    pub fn read<T: DeserializeOwned>(
        &self,
        path: &Path,
        expected_version: u32,
    ) -> VaultResult<Option<T>> {
        let envelope = if let Some(queued) = self.pending.get(path) {
            queued.clone()
        } else {
            if !path.exists() {
                return Ok(None);
            }
            let mut file = OpenOptions::new()
                .read(true)
                .open(path)
                .map_err(|e| VaultError::io("open metadata", path, e))?;
            fs2::FileExt::lock_shared(&file)
                .map_err(|e| VaultError::io("lock metadata", path, e))?;
            let mut contents = String::new();
            let read_result = file.read_to_string(&mut contents);
            fs2::FileExt::unlock(&file).ok();
            read_result.map_err(|e| VaultError::io("read metadata", path, e))?;
            serde_json::from_str(&contents)
                .map_err(|e| VaultError::meta(path, format!("invalid document: {e}")))?
        };

        if envelope.version != expected_version {
            return Err(VaultError::meta(
                path,
                format!(
                    "unsupported document version {} (expected {})",
                    envelope.version, expected_version
                ),
            ));
        }

        let value = serde_json::from_value(envelope.payload)
            .map_err(|e| VaultError::meta(path, format!("malformed payload: {e}")))?;
        Ok(Some(value))
    }

    /// Write a document, either immediately or queued until
    /// `flush_pending`.
    pub fn write<T: Serialize>(
        &mut self,
        path: &Path,
        value: &T,
        version: u32,
        delay: bool,
    ) -> VaultResult<()> {
        let payload = serde_json::to_value(value)
            .map_err(|e| VaultError::meta(path, format!("serialization failed: {e}")))?;
        let envelope = Envelope { version, payload };

        if delay {
            log::debug!("Queueing delayed metadata write for {}", path.display());
            self.pending.insert(path.to_path_buf(), envelope);
            return Ok(());
        }

        self.pending.remove(path);
        Self::write_now(path, &envelope)
    }

    /// Commit every queued document to disk.
    pub fn flush_pending(&mut self) -> VaultResult<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        log::debug!("Flushing {} pending metadata writes", self.pending.len());
        let queued: Vec<(PathBuf, Envelope)> = self.pending.drain().collect();
        for (path, envelope) in queued {
            Self::write_now(&path, &envelope)?;
        }
        Ok(())
    }

    /// Remove a document from disk and from the delayed queue. Missing
    /// files are not an error.
    pub fn remove(&mut self, path: &Path) -> VaultResult<()> {
        self.pending.remove(path);
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(VaultError::io("remove metadata", path, e)),
        }
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    fn write_now(path: &Path, envelope: &Envelope) -> VaultResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| VaultError::io("create metadata directory", parent, e))?;
        }

        let contents = serde_json::to_string_pretty(envelope)
            .map_err(|e| VaultError::meta(path, format!("serialization failed: {e}")))?;

        // Lock the target for the duration of the tmp-write + rename so
        // concurrent invocations cannot interleave.
        let lock = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|e| VaultError::io("open metadata", path, e))?;
        fs2::FileExt::lock_exclusive(&lock)
            .map_err(|e| VaultError::io("lock metadata", path, e))?;

        let tmp_path = path.with_extension("tmp");
        let result = (|| -> VaultResult<()> {
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&tmp_path)
                .map_err(|e| VaultError::io("open metadata", &tmp_path, e))?;
            file.write_all(contents.as_bytes())
                .map_err(|e| VaultError::io("write metadata", &tmp_path, e))?;
            file.sync_all()
                .map_err(|e| VaultError::io("sync metadata", &tmp_path, e))?;
            fs::rename(&tmp_path, path).map_err(|e| VaultError::io("replace metadata", path, e))
        })();

        fs2::FileExt::unlock(&lock).ok();
        result?;
        log::debug!("Wrote metadata document {}", path.display());
        Ok(())
    }
}
