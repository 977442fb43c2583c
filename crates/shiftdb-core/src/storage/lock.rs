//! Advisory migration lock.
//!
//! A single lock record in a sled tree marks the store as being migrated.
//! Acquisition is a compare-and-swap from "absent"; the returned guard removes
//! the record when dropped, on success and failure paths alike.

use crate::error::Error;
use crate::migration::MigrationError;
use crate::storage::key::{aligned_copy, current_timestamp};
use rkyv::{Archive, Deserialize, Serialize};
use sled::{Db, Tree};
use std::thread;
use std::time::{Duration, Instant};

/// Key of the lock record.
const LOCK_KEY: &[u8] = b"lock";

/// Who holds the migration lock.
#[derive(Debug, Clone, PartialEq, Eq, Archive, Serialize, Deserialize, serde::Serialize)]
pub struct LockRecord {
    /// Identifier of the holder (process or runner name).
    pub owner: String,
    /// When the lock was taken (microseconds since epoch).
    pub acquired_at: u64,
}

impl LockRecord {
    /// Serialize the record to bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, Error> {
        rkyv::to_bytes::<rkyv::rancor::Error>(self)
            .map(|v| v.to_vec())
            .map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Deserialize a record from bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        rkyv::from_bytes::<Self, rkyv::rancor::Error>(&aligned_copy(bytes))
            .map_err(|e| Error::Deserialization(e.to_string()))
    }
}

/// Handle on the lock tree of one store.
#[derive(Clone)]
pub struct MigrationLock {
    tree: Tree,
}

impl MigrationLock {
    /// Tree name for the lock record.
    pub const TREE_NAME: &'static str = "migration:lock";

    /// Open the lock tree.
    pub fn open(db: &Db) -> Result<Self, Error> {
        Ok(Self {
            tree: db.open_tree(Self::TREE_NAME)?,
        })
    }

    /// Take the lock or fail immediately with `MigrationLocked`.
    pub fn try_acquire(&self, owner: &str) -> Result<LockGuard, MigrationError> {
        let record = LockRecord {
            owner: owner.to_string(),
            acquired_at: current_timestamp(),
        };
        let token = record.to_bytes()?;

        let swap = self
            .tree
            .compare_and_swap(LOCK_KEY, None::<&[u8]>, Some(token.clone()))
            .map_err(Error::from)?;

        match swap {
            Ok(()) => {
                self.tree.flush().map_err(Error::from)?;
                tracing::debug!(owner, "migration lock acquired");
                Ok(LockGuard {
                    tree: self.tree.clone(),
                    token,
                    record,
                })
            }
            Err(conflict) => {
                let holder = match conflict.current {
                    Some(bytes) => LockRecord::from_bytes(&bytes)?,
                    None => LockRecord {
                        owner: "unknown".to_string(),
                        acquired_at: 0,
                    },
                };
                Err(MigrationError::MigrationLocked {
                    holder: holder.owner,
                    acquired_at: holder.acquired_at,
                })
            }
        }
    }

    /// Take the lock, polling until `wait` elapses.
    ///
    /// With `wait` set to `None` this fails fast, like [`try_acquire`].
    ///
    /// [`try_acquire`]: MigrationLock::try_acquire
    pub fn acquire(
        &self,
        owner: &str,
        wait: Option<Duration>,
        poll_interval: Duration,
    ) -> Result<LockGuard, MigrationError> {
        let deadline = wait.map(|w| Instant::now() + w);

        loop {
            match self.try_acquire(owner) {
                Err(MigrationError::MigrationLocked {
                    holder,
                    acquired_at,
                }) => {
                    let expired = deadline.map_or(true, |d| Instant::now() >= d);
                    if expired {
                        tracing::warn!(owner, %holder, "migration lock is held");
                        return Err(MigrationError::MigrationLocked {
                            holder,
                            acquired_at,
                        });
                    }
                    thread::sleep(poll_interval);
                }
                other => return other,
            }
        }
    }

    /// Current holder, if the lock is taken.
    pub fn holder(&self) -> Result<Option<LockRecord>, Error> {
        match self.tree.get(LOCK_KEY)? {
            Some(bytes) => Ok(Some(LockRecord::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Remove the lock record regardless of holder.
    ///
    /// Only for clearing a record left behind by a crashed process.
    pub fn force_release(&self) -> Result<Option<LockRecord>, Error> {
        let previous = self.tree.remove(LOCK_KEY)?;
        self.tree.flush()?;
        match previous {
            Some(bytes) => Ok(Some(LockRecord::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }
}

/// Held migration lock. Released on drop.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct LockGuard {
    tree: Tree,
    token: Vec<u8>,
    record: LockRecord,
}

impl LockGuard {
    /// The record written for this guard.
    pub fn record(&self) -> &LockRecord {
        &self.record
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let released =
            self.tree
                .compare_and_swap(LOCK_KEY, Some(self.token.as_slice()), None::<Vec<u8>>);

        match released {
            Ok(Ok(())) => {
                if let Err(e) = self.tree.flush() {
                    tracing::warn!(error = %e, "failed to flush lock release");
                }
                tracing::debug!(owner = %self.record.owner, "migration lock released");
            }
            Ok(Err(_)) => {
                tracing::warn!(
                    owner = %self.record.owner,
                    "migration lock record was replaced while held"
                );
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to release migration lock");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_lock() -> MigrationLock {
        let db = sled::Config::new().temporary(true).open().unwrap();
        MigrationLock::open(&db).unwrap()
    }

    #[test]
    fn test_second_acquire_fails_fast() {
        let lock = test_lock();
        let guard = lock.try_acquire("runner-a").unwrap();
        assert_eq!(guard.record().owner, "runner-a");

        let second = lock.try_acquire("runner-b");
        match second {
            Err(MigrationError::MigrationLocked { holder, .. }) => assert_eq!(holder, "runner-a"),
            _ => panic!("expected MigrationLocked"),
        }
    }

    #[test]
    fn test_guard_releases_on_drop() {
        let lock = test_lock();
        {
            let _guard = lock.try_acquire("runner-a").unwrap();
            assert!(lock.holder().unwrap().is_some());
        }
        assert!(lock.holder().unwrap().is_none());
        assert!(lock.try_acquire("runner-b").is_ok());
    }

    #[test]
    fn test_acquire_waits_for_release() {
        let lock = test_lock();
        let guard = lock.try_acquire("runner-a").unwrap();

        let contender = lock.clone();
        let handle = thread::spawn(move || {
            contender
                .acquire(
                    "runner-b",
                    Some(Duration::from_secs(5)),
                    Duration::from_millis(5),
                )
                .map(|g| g.record().owner.clone())
        });

        thread::sleep(Duration::from_millis(50));
        drop(guard);

        assert_eq!(handle.join().unwrap().unwrap(), "runner-b");
    }

    #[test]
    fn test_acquire_times_out() {
        let lock = test_lock();
        let _guard = lock.try_acquire("runner-a").unwrap();

        let result = lock.acquire(
            "runner-b",
            Some(Duration::from_millis(20)),
            Duration::from_millis(5),
        );
        assert!(matches!(result, Err(MigrationError::MigrationLocked { .. })));
    }

    #[test]
    fn test_force_release_clears_stale_record() {
        let lock = test_lock();
        let guard = lock.try_acquire("crashed").unwrap();
        std::mem::forget(guard);

        let cleared = lock.force_release().unwrap();
        assert_eq!(cleared.map(|r| r.owner), Some("crashed".to_string()));
        assert!(lock.try_acquire("runner-b").is_ok());
    }
}
