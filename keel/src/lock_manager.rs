//! Page-granularity shared/exclusive locks.
//!
//! Each locked page maps to an explicit state: shared by an ordered set of
//! transactions, or exclusive to exactly one. A page with no holders has no
//! entry at all.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::error::{DbError, DbResult};
use crate::page_id::PageAddress;
use crate::transaction::TransactionId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockMode {
    Shared,
    Exclusive,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum PageLock {
    /// Holders in acquisition order; never empty.
    Shared(Vec<TransactionId>),
    Exclusive(TransactionId),
}

impl PageLock {
    fn new(tid: TransactionId, mode: LockMode) -> Self {
        match mode {
            LockMode::Shared => PageLock::Shared(vec![tid]),
            LockMode::Exclusive => PageLock::Exclusive(tid),
        }
    }

    fn mode_of(&self, tid: TransactionId) -> Option<LockMode> {
        match self {
            PageLock::Exclusive(holder) => (*holder == tid).then_some(LockMode::Exclusive),
            PageLock::Shared(holders) => holders.contains(&tid).then_some(LockMode::Shared),
        }
    }
}

#[derive(Debug, Default)]
pub struct LockTable {
    locks: Mutex<HashMap<PageAddress, PageLock>>,
}

impl LockTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes one attempt to grant `mode` on `addr` to `tid`. Never blocks.
    pub fn try_acquire(&self, addr: PageAddress, tid: TransactionId, mode: LockMode) -> bool {
        let mut locks = self.locks.lock();
        let lock = match locks.entry(addr) {
            Entry::Vacant(e) => {
                e.insert(PageLock::new(tid, mode));
                return true;
            }
            Entry::Occupied(e) => e.into_mut(),
        };

        let granted = match (&mut *lock, mode) {
            // Exclusive dominates: the holder may re-request either mode.
            (PageLock::Exclusive(holder), _) => *holder == tid,
            (PageLock::Shared(holders), LockMode::Shared) => {
                if !holders.contains(&tid) {
                    holders.push(tid);
                }
                true
            }
            // Upgrade only when the requester is the sole shared holder.
            (PageLock::Shared(holders), LockMode::Exclusive) => holders.as_slice() == [tid],
        };
        if granted && mode == LockMode::Exclusive {
            *lock = PageLock::Exclusive(tid);
        }
        granted
    }

    /// Polls until the lock is granted or `timeout` elapses, sleeping
    /// `poll_interval` between attempts (yielding when it is zero). There is
    /// no wait-for graph: a timeout is how a deadlock shows up.
    pub fn acquire(
        &self,
        addr: PageAddress,
        tid: TransactionId,
        mode: LockMode,
        timeout: Duration,
        poll_interval: Duration,
    ) -> DbResult<()> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.try_acquire(addr, tid, mode) {
                return Ok(());
            }
            if Instant::now() >= deadline {
                log::warn!(
                    "tx {} timed out after {:?} waiting for {:?} lock on {}",
                    tid,
                    timeout,
                    mode,
                    addr
                );
                return Err(DbError::TransactionAborted { tid, page: addr });
            }
            if poll_interval.is_zero() {
                thread::yield_now();
            } else {
                thread::sleep(poll_interval);
            }
        }
    }

    /// Drops `tid`'s lock on `addr`. Returns false if it held none.
    pub fn release(&self, addr: PageAddress, tid: TransactionId) -> bool {
        let mut locks = self.locks.lock();
        let Some(lock) = locks.get_mut(&addr) else {
            return false;
        };
        let (released, now_empty) = match lock {
            PageLock::Exclusive(holder) => {
                let released = *holder == tid;
                (released, released)
            }
            PageLock::Shared(holders) => {
                let before = holders.len();
                holders.retain(|h| *h != tid);
                (holders.len() < before, holders.is_empty())
            }
        };
        if now_empty {
            locks.remove(&addr);
        }
        released
    }

    /// Drops every lock `tid` holds and returns the pages it held.
    pub fn release_all(&self, tid: TransactionId) -> Vec<PageAddress> {
        let mut locks = self.locks.lock();
        let mut released = Vec::new();
        locks.retain(|addr, lock| {
            let (held, keep) = match lock {
                PageLock::Exclusive(holder) => (*holder == tid, *holder != tid),
                PageLock::Shared(holders) => {
                    let before = holders.len();
                    holders.retain(|h| *h != tid);
                    (holders.len() < before, !holders.is_empty())
                }
            };
            if held {
                released.push(*addr);
            }
            keep
        });
        released
    }

    pub fn holds(&self, addr: PageAddress, tid: TransactionId) -> bool {
        self.mode(addr, tid).is_some()
    }

    /// The mode `tid` holds on `addr`, if any.
    pub fn mode(&self, addr: PageAddress, tid: TransactionId) -> Option<LockMode> {
        self.locks.lock().get(&addr)?.mode_of(tid)
    }

    /// Every transaction holding a lock on `addr`, with its mode.
    pub fn holders(&self, addr: PageAddress) -> Vec<(TransactionId, LockMode)> {
        match self.locks.lock().get(&addr) {
            None => Vec::new(),
            Some(PageLock::Exclusive(tid)) => vec![(*tid, LockMode::Exclusive)],
            Some(PageLock::Shared(holders)) => {
                holders.iter().map(|t| (*t, LockMode::Shared)).collect()
            }
        }
    }

    pub fn pages_locked_by(&self, tid: TransactionId) -> Vec<PageAddress> {
        self.locks
            .lock()
            .iter()
            .filter(|(_, lock)| lock.mode_of(tid).is_some())
            .map(|(addr, _)| *addr)
            .collect()
    }

    /// Number of pages that currently have an entry.
    pub fn len(&self) -> usize {
        self.locks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tid(n: u64) -> TransactionId {
        TransactionId::new(n)
    }

    const P: PageAddress = PageAddress {
        table_id: 1,
        page_number: 0,
    };

    #[test]
    fn test_shared_locks_coexist() {
        let locks = LockTable::new();
        assert!(locks.try_acquire(P, tid(1), LockMode::Shared));
        assert!(locks.try_acquire(P, tid(2), LockMode::Shared));
        assert!(locks.try_acquire(P, tid(1), LockMode::Shared));
        assert_eq!(
            locks.holders(P),
            vec![(tid(1), LockMode::Shared), (tid(2), LockMode::Shared)]
        );
    }

    #[test]
    fn test_exclusive_excludes_everyone_else() {
        let locks = LockTable::new();
        assert!(locks.try_acquire(P, tid(1), LockMode::Exclusive));
        assert!(!locks.try_acquire(P, tid(2), LockMode::Shared));
        assert!(!locks.try_acquire(P, tid(2), LockMode::Exclusive));
        // The holder may ask again in either mode.
        assert!(locks.try_acquire(P, tid(1), LockMode::Shared));
        assert!(locks.try_acquire(P, tid(1), LockMode::Exclusive));
        assert_eq!(locks.holders(P), vec![(tid(1), LockMode::Exclusive)]);
    }

    #[test]
    fn test_upgrade_requires_sole_holder() {
        let locks = LockTable::new();
        assert!(locks.try_acquire(P, tid(1), LockMode::Shared));
        assert!(locks.try_acquire(P, tid(2), LockMode::Shared));
        assert!(!locks.try_acquire(P, tid(1), LockMode::Exclusive));
        assert!(!locks.try_acquire(P, tid(3), LockMode::Exclusive));

        assert!(locks.release(P, tid(2)));
        assert!(locks.try_acquire(P, tid(1), LockMode::Exclusive));
        assert_eq!(locks.mode(P, tid(1)), Some(LockMode::Exclusive));
    }

    #[test]
    fn test_release_drops_empty_entries() {
        let locks = LockTable::new();
        assert!(!locks.release(P, tid(1)));
        assert!(!locks.holds(P, tid(1)));
        assert!(locks.is_empty());

        locks.try_acquire(P, tid(1), LockMode::Shared);
        locks.try_acquire(P, tid(2), LockMode::Shared);
        assert!(!locks.release(P, tid(3)));
        assert!(locks.release(P, tid(1)));
        assert_eq!(locks.len(), 1);
        assert!(locks.release(P, tid(2)));
        assert!(locks.is_empty());
    }

    #[test]
    fn test_release_all() {
        let locks = LockTable::new();
        let q = PageAddress::new(1, 1);
        let r = PageAddress::new(2, 0);
        locks.try_acquire(P, tid(1), LockMode::Shared);
        locks.try_acquire(P, tid(2), LockMode::Shared);
        locks.try_acquire(q, tid(1), LockMode::Exclusive);
        locks.try_acquire(r, tid(2), LockMode::Exclusive);

        let mut released = locks.release_all(tid(1));
        released.sort();
        assert_eq!(released, vec![P, q]);
        assert!(locks.pages_locked_by(tid(1)).is_empty());
        assert_eq!(locks.holders(P), vec![(tid(2), LockMode::Shared)]);
        assert!(locks.holds(r, tid(2)));
        assert_eq!(locks.len(), 2);
    }

    #[test]
    fn test_acquire_times_out() {
        let locks = LockTable::new();
        locks.try_acquire(P, tid(1), LockMode::Shared);
        let err = locks
            .acquire(P, tid(2), LockMode::Exclusive, Duration::from_millis(20), Duration::from_millis(1))
            .unwrap_err();
        assert!(err.is_transaction_aborted());
        assert!(!locks.holds(P, tid(2)));
    }
}
