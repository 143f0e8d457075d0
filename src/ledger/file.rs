use super::{ReadableMedium, ResumableRecorder, WritableMedium};
use crate::fingerprint::LedgerKey;

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};

/// Keeps each ledger in its own file, named by its key, inside a directory.
#[derive(Debug, Clone)]
pub struct FileRecorder {
    root: PathBuf,
}

impl FileRecorder {
    /// Store ledgers under `root`. The directory is created on first write.
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    /// Store ledgers in `resumable-transfer` under the system temp directory.
    pub fn in_temp_dir() -> Self {
        Self::new(std::env::temp_dir().join("resumable-transfer"))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_of(&self, key: &LedgerKey) -> PathBuf {
        self.root.join(key.as_str())
    }
}

impl ResumableRecorder for FileRecorder {
    fn open_for_read(&self, key: &LedgerKey) -> io::Result<Box<dyn ReadableMedium>> {
        let file = File::open(self.path_of(key))?;
        Ok(Box::new(file))
    }

    fn open_for_append(&self, key: &LedgerKey) -> io::Result<Box<dyn WritableMedium>> {
        let file = OpenOptions::new().append(true).open(self.path_of(key))?;
        Ok(Box::new(BufWriter::new(file)))
    }

    fn open_for_create_new(&self, key: &LedgerKey) -> io::Result<Box<dyn WritableMedium>> {
        fs::create_dir_all(&self.root)?;
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(self.path_of(key))?;
        Ok(Box::new(BufWriter::new(file)))
    }

    fn delete(&self, key: &LedgerKey) -> io::Result<()> {
        match fs::remove_file(self.path_of(key)) {
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            res => res,
        }
    }
}
