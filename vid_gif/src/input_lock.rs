//! Process-wide exclusive access to input files
//!
//! ffmpeg offers no guarantees for two encodes reading the same file at
//! once. Every encode holds an [`InputLease`] for its input; a second
//! request for the same path blocks until the first lease is dropped.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Condvar, Mutex, MutexGuard, OnceLock};
use tracing::debug;

struct Registry {
    busy: Mutex<HashSet<PathBuf>>,
    released: Condvar,
}

fn registry() -> &'static Registry {
    static REGISTRY: OnceLock<Registry> = OnceLock::new();
    REGISTRY.get_or_init(|| Registry {
        busy: Mutex::new(HashSet::new()),
        released: Condvar::new(),
    })
}

fn lock_busy(reg: &Registry) -> MutexGuard<'_, HashSet<PathBuf>> {
    // Every mutation is a single insert or remove.
    reg.busy.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn lock_key(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Held while an encode reads its input.
#[derive(Debug)]
pub struct InputLease {
    key: PathBuf,
}

impl InputLease {
    /// Block until no other lease covers `path`, then take it.
    pub fn acquire(path: &Path) -> InputLease {
        let key = lock_key(path);
        let reg = registry();
        let mut busy = lock_busy(reg);
        while busy.contains(&key) {
            debug!(input = %key.display(), "Waiting for concurrent encode of the same input");
            busy = reg
                .released
                .wait(busy)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
        busy.insert(key.clone());
        InputLease { key }
    }

    /// Take the lease only if it is free right now.
    pub fn try_acquire(path: &Path) -> Option<InputLease> {
        let key = lock_key(path);
        let mut busy = lock_busy(registry());
        if busy.insert(key.clone()) {
            Some(InputLease { key })
        } else {
            None
        }
    }
}

impl Drop for InputLease {
    fn drop(&mut self) {
        let reg = registry();
        lock_busy(reg).remove(&self.key);
        reg.released.notify_all();
    }
}
