//! Append-only checkpoint log: one processed record id per line, flushed on every write.
//! Lives at `<dir>/<JobTypeName>.txt` and is removed once a scan attempts every record.

use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::error::SetupError;
use crate::utils::config::PackagePaths;

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("checkpoint log {path} is busy (lock not acquired within {timeout:?})")]
    LockTimeout { path: PathBuf, timeout: Duration },

    #[error("checkpoint log {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// `<dir>/<type_name>.txt`. Empty names and names with path separators are rejected.
pub fn checkpoint_path(dir: &Path, type_name: &str) -> Result<PathBuf, SetupError> {
    let name = type_name.trim();
    if name.is_empty()
        || name.contains(['/', '\\'])
        || name == "."
        || name == ".."
    {
        return Err(SetupError::InvalidCheckpointName(type_name.to_string()));
    }
    Ok(dir.join(format!("{name}.{}", PackagePaths::get().checkpoint_extension())))
}

pub struct CheckpointLog {
    path: PathBuf,
    lock_timeout: Duration,
    writer: Mutex<Option<File>>,
}

impl CheckpointLog {
    pub fn new(path: PathBuf, lock_timeout: Duration) -> Self {
        Self {
            path,
            lock_timeout,
            writer: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_err(&self, source: io::Error) -> CheckpointError {
        CheckpointError::Io {
            path: self.path.clone(),
            source,
        }
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Create an empty log (truncating any previous one).
    pub fn create(&self) -> Result<(), CheckpointError> {
        let mut writer = self.lock()?;
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|e| self.io_err(e))?;
        }
        File::create(&self.path).map_err(|e| self.io_err(e))?;
        *writer = None;
        Ok(())
    }

    /// All ids in file order. Blank lines are ignored. Missing file reads as empty.
    pub fn read_all(&self) -> Result<Vec<String>, CheckpointError> {
        let file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(self.io_err(e)),
        };
        let mut ids = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line.map_err(|e| self.io_err(e))?;
            let id = line.trim();
            if !id.is_empty() {
                ids.push(id.to_string());
            }
        }
        Ok(ids)
    }

    /// Append one id and flush. Waits at most the lock timeout for other writers.
    pub fn write(&self, id: &str) -> Result<(), CheckpointError> {
        let mut writer = self.lock()?;
        if writer.is_none() {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .map_err(|e| self.io_err(e))?;
            *writer = Some(file);
        }
        if let Some(file) = writer.as_mut() {
            writeln!(file, "{id}").map_err(|e| self.io_err(e))?;
            file.flush().map_err(|e| self.io_err(e))?;
        }
        Ok(())
    }

    /// Remove the log. Missing file is not an error.
    pub fn delete(&self) -> Result<(), CheckpointError> {
        let mut writer = self.lock()?;
        *writer = None;
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(self.io_err(e)),
        }
    }

    fn lock(&self) -> Result<parking_lot::MutexGuard<'_, Option<File>>, CheckpointError> {
        self.writer
            .try_lock_for(self.lock_timeout)
            .ok_or_else(|| CheckpointError::LockTimeout {
                path: self.path.clone(),
                timeout: self.lock_timeout,
            })
    }

    /// Hold the writer lock (blocks other writers until the guard drops).
    #[cfg(test)]
    pub(crate) fn hold_lock(&self) -> parking_lot::MutexGuard<'_, Option<File>> {
        self.writer.lock()
    }
}
