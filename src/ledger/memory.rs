use super::{ReadableMedium, ResumableRecorder, WritableMedium};
use crate::fingerprint::LedgerKey;

use std::collections::HashMap;
use std::io::{self, Cursor, Write};
use std::sync::{Arc, Mutex, PoisonError};

type Buffer = Arc<Mutex<Vec<u8>>>;

/// Keeps ledgers in memory.
///
/// This is an explicit registry: it lives exactly as long as the caller keeps
/// it, and clones share the same ledgers.
#[derive(Debug, Clone, Default)]
pub struct MemoryRecorder {
    ledgers: Arc<Mutex<HashMap<LedgerKey, Buffer>>>,
}

impl MemoryRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of ledgers currently stored.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every ledger.
    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<LedgerKey, Buffer>> {
        self.ledgers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn get(&self, key: &LedgerKey) -> io::Result<Buffer> {
        self.lock()
            .get(key)
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, key.to_string()))
    }
}

impl ResumableRecorder for MemoryRecorder {
    fn open_for_read(&self, key: &LedgerKey) -> io::Result<Box<dyn ReadableMedium>> {
        let buf = self.get(key)?;
        let snapshot = buf.lock().unwrap_or_else(PoisonError::into_inner).clone();
        Ok(Box::new(Cursor::new(snapshot)))
    }

    fn open_for_append(&self, key: &LedgerKey) -> io::Result<Box<dyn WritableMedium>> {
        let buf = self.get(key)?;
        Ok(Box::new(SharedBuffer(buf)))
    }

    fn open_for_create_new(&self, key: &LedgerKey) -> io::Result<Box<dyn WritableMedium>> {
        let buf = Buffer::default();
        self.lock().insert(key.clone(), buf.clone());
        Ok(Box::new(SharedBuffer(buf)))
    }

    fn delete(&self, key: &LedgerKey) -> io::Result<()> {
        self.lock().remove(key);
        Ok(())
    }
}

#[derive(Debug)]
struct SharedBuffer(Buffer);

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut inner = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        inner.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Persists nothing. Transfers using it are never resumable.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopRecorder;

impl ResumableRecorder for NoopRecorder {
    fn open_for_read(&self, key: &LedgerKey) -> io::Result<Box<dyn ReadableMedium>> {
        Err(io::Error::new(io::ErrorKind::NotFound, key.to_string()))
    }

    fn open_for_append(&self, key: &LedgerKey) -> io::Result<Box<dyn WritableMedium>> {
        Err(io::Error::new(io::ErrorKind::NotFound, key.to_string()))
    }

    fn open_for_create_new(&self, _: &LedgerKey) -> io::Result<Box<dyn WritableMedium>> {
        Ok(Box::new(io::sink()))
    }

    fn delete(&self, _: &LedgerKey) -> io::Result<()> {
        Ok(())
    }
}
