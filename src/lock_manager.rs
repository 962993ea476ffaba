use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use once_cell::sync::Lazy;

use crate::rid::RID;
use crate::transaction::TransactionId;

/// The process-wide lock manager. Table identifiers are process-unique, so
/// records from different databases never alias here.
pub static LOCK_MANAGER: Lazy<LockManager> = Lazy::new(LockManager::new);

/// Identifies a lockable record: a base RID qualified by its table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct LockKey {
    pub table: usize,
    pub rid: RID,
}

impl LockKey {
    pub fn new(table: usize, rid: RID) -> Self {
        LockKey { table, rid }
    }
}

/// Holder sets for one record.
#[derive(Default)]
struct LockEntry {
    shared: HashSet<TransactionId>,
    exclusive: Option<TransactionId>,
}

impl LockEntry {
    fn is_free(&self) -> bool {
        self.shared.is_empty() && self.exclusive.is_none()
    }
}

/// Record-granularity shared/exclusive locks with no-wait semantics: a
/// request that conflicts with another holder fails immediately and the
/// caller aborts. A transaction's own locks never conflict with itself, and
/// a sole shared holder may upgrade to exclusive.
pub struct LockManager {
    locks: Mutex<HashMap<LockKey, LockEntry>>,
}

impl LockManager {
    pub fn new() -> Self {
        LockManager { locks: Mutex::new(HashMap::new()) }
    }

    /// Attempt to acquire a shared lock. Returns whether the lock was granted.
    pub fn acquire_shared(&self, key: LockKey, txn: TransactionId) -> bool {
        let mut locks = self.locks.lock().unwrap();
        let entry = locks.entry(key).or_default();

        match entry.exclusive {
            Some(holder) if holder != txn => false,
            // Holding exclusive already covers reading.
            Some(_) => true,
            None => {
                entry.shared.insert(txn);
                true
            }
        }
    }

    /// Attempt to acquire an exclusive lock. Returns whether the lock was
    /// granted.
    pub fn acquire_exclusive(&self, key: LockKey, txn: TransactionId) -> bool {
        let mut locks = self.locks.lock().unwrap();
        let entry = locks.entry(key).or_default();

        if let Some(holder) = entry.exclusive {
            return holder == txn;
        }

        // Upgrade is allowed only for a sole shared holder.
        let foreign_readers = entry.shared.iter().any(|holder| *holder != txn);
        if foreign_readers {
            return false;
        }

        entry.shared.remove(&txn);
        entry.exclusive = Some(txn);
        true
    }

    /// Release any lock `txn` holds on `key`.
    pub fn release(&self, key: LockKey, txn: TransactionId) {
        let mut locks = self.locks.lock().unwrap();

        if let Some(entry) = locks.get_mut(&key) {
            entry.shared.remove(&txn);
            if entry.exclusive == Some(txn) {
                entry.exclusive = None;
            }

            if entry.is_free() {
                locks.remove(&key);
            }
        }
    }

    /// Release every lock held by `txn`. Called at commit and abort.
    pub fn release_all(&self, txn: TransactionId) {
        let mut locks = self.locks.lock().unwrap();

        for entry in locks.values_mut() {
            entry.shared.remove(&txn);
            if entry.exclusive == Some(txn) {
                entry.exclusive = None;
            }
        }

        locks.retain(|_, entry| !entry.is_free());
    }

    /// Whether `txn` holds any lock on `key`.
    pub fn holds(&self, key: LockKey, txn: TransactionId) -> bool {
        let locks = self.locks.lock().unwrap();
        locks
            .get(&key)
            .map(|entry| entry.shared.contains(&txn) || entry.exclusive == Some(txn))
            .unwrap_or(false)
    }
}

impl Default for LockManager {
    fn default() -> Self {
        LockManager::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(slot: usize) -> LockKey {
        // A table id far outside anything the tests register.
        LockKey::new(usize::MAX - 1, RID::base(0, 0, slot))
    }

    #[test]
    fn shared_locks_are_compatible() {
        let manager = LockManager::new();
        let k = key(0);

        assert!(manager.acquire_shared(k, 1));
        assert!(manager.acquire_shared(k, 2));

        manager.release_all(1);
        manager.release_all(2);
    }

    #[test]
    fn exclusive_conflicts_with_everything_foreign() {
        let manager = LockManager::new();
        let k = key(1);

        assert!(manager.acquire_exclusive(k, 1));
        assert!(!manager.acquire_shared(k, 2));
        assert!(!manager.acquire_exclusive(k, 2));

        // The holder itself may keep reading and writing.
        assert!(manager.acquire_shared(k, 1));
        assert!(manager.acquire_exclusive(k, 1));

        manager.release_all(1);
        assert!(manager.acquire_exclusive(k, 2));
        manager.release_all(2);
    }

    #[test]
    fn upgrade_requires_sole_ownership() {
        let manager = LockManager::new();
        let k = key(2);

        assert!(manager.acquire_shared(k, 1));
        assert!(manager.acquire_exclusive(k, 1));
        manager.release_all(1);

        assert!(manager.acquire_shared(k, 1));
        assert!(manager.acquire_shared(k, 2));
        assert!(!manager.acquire_exclusive(k, 1));

        manager.release_all(1);
        manager.release_all(2);
    }

    #[test]
    fn release_frees_the_record() {
        let manager = LockManager::new();
        let k = key(3);

        assert!(manager.acquire_exclusive(k, 1));
        manager.release(k, 1);
        assert!(!manager.holds(k, 1));
        assert!(manager.acquire_exclusive(k, 2));
        manager.release_all(2);
    }
}
