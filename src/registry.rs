//! Token-to-provider registry with snapshot reads.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{ReentrantMutex, RwLock};

use crate::error::{DiError, DiResult};
use crate::provider::ProviderRecord;
use crate::token::RawToken;

/// Registry of provider records.
///
/// Structural mutation is serialized by one reentrant lock, so a module
/// installed under [`Container::install`](crate::Container::install) may
/// register further providers while the lock is held. Reads go against a
/// published `Arc` snapshot that is swapped atomically under the write path,
/// so they never observe a partially updated map.
pub(crate) struct Registry {
    snapshot: RwLock<Arc<HashMap<RawToken, Arc<ProviderRecord>>>>,
    write_serial: ReentrantMutex<()>,
}

impl Registry {
    pub(crate) fn new() -> Self {
        Self {
            snapshot: RwLock::new(Arc::new(HashMap::new())),
            write_serial: ReentrantMutex::new(()),
        }
    }

    /// Fetches the record bound to `token` from the current snapshot.
    #[inline]
    pub(crate) fn lookup(&self, token: &RawToken) -> Option<Arc<ProviderRecord>> {
        self.snapshot.read().get(token).cloned()
    }

    pub(crate) fn contains(&self, token: &RawToken) -> bool {
        self.snapshot.read().contains_key(token)
    }

    /// Inserts a record; duplicate bindings are a conflict, not a replace.
    pub(crate) fn register(&self, record: ProviderRecord) -> DiResult<()> {
        let _serial = self.write_serial.lock();
        let current = self.snapshot.read().clone();
        if current.contains_key(&record.token) {
            return Err(DiError::RegistrationConflict {
                token: record.token.clone(),
            });
        }
        let mut next: HashMap<RawToken, Arc<ProviderRecord>> = (*current).clone();
        next.insert(record.token.clone(), Arc::new(record));
        *self.snapshot.write() = Arc::new(next);
        Ok(())
    }

    /// Runs `f` with registration serialized, allowing nested registration.
    pub(crate) fn with_write_serialized<R>(&self, f: impl FnOnce() -> R) -> R {
        let _serial = self.write_serial.lock();
        f()
    }

    pub(crate) fn len(&self) -> usize {
        self.snapshot.read().len()
    }

    /// Every registered token name, for near-miss suggestion rendering.
    pub(crate) fn token_names(&self) -> Vec<String> {
        self.snapshot
            .read()
            .keys()
            .map(|t| t.name().to_string())
            .collect()
    }

    /// Snapshot of all records, for the registration pre-flight.
    pub(crate) fn records(&self) -> Vec<Arc<ProviderRecord>> {
        self.snapshot.read().values().cloned().collect()
    }
}
