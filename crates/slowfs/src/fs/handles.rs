//! Table of open backing files keyed by opaque handle ids.
//!
//! Lookups for different handles run concurrently; the table lock is held
//! only for the map access. Each entry carries its own async mutex, so two
//! operations on the same handle never touch its descriptor at once.

use std::collections::HashMap;
use std::fs::File;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::Mutex;

use super::traits::Handle;
use crate::error::{Error, Result};

/// Shared, exclusively-lockable backing file.
pub(crate) type SharedFile = Arc<Mutex<File>>;

pub(crate) struct HandleTable {
    files: RwLock<HashMap<u64, SharedFile>>,
    next_id: AtomicU64,
}

impl HandleTable {
    pub(crate) fn new() -> Self {
        Self {
            files: RwLock::new(HashMap::new()),
            // 0 is reserved; some bindings treat it as "no handle".
            next_id: AtomicU64::new(1),
        }
    }

    /// Register an already-open file. The file is live from this point on.
    pub(crate) fn insert(&self, file: File) -> Handle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut files = self.files.write().unwrap_or_else(|e| e.into_inner());
        files.insert(id, Arc::new(Mutex::new(file)));
        Handle(id)
    }

    pub(crate) fn get(&self, handle: Handle) -> Result<SharedFile> {
        let files = self.files.read().unwrap_or_else(|e| e.into_inner());
        files
            .get(&handle.0)
            .cloned()
            .ok_or(Error::InvalidHandle(handle.0))
    }

    /// Unregister `handle`. The descriptor closes once in-flight operations
    /// holding the entry finish.
    pub(crate) fn remove(&self, handle: Handle) -> Result<SharedFile> {
        let mut files = self.files.write().unwrap_or_else(|e| e.into_inner());
        files.remove(&handle.0).ok_or(Error::InvalidHandle(handle.0))
    }

    pub(crate) fn len(&self) -> usize {
        self.files.read().unwrap_or_else(|e| e.into_inner()).len()
    }
}
