//! Storage configuration.

use crate::error::Error;
use crate::migration::MigrationError;
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

/// Prefix of the IO error sled returns when another process has the
/// database directory open.
const SLED_LOCK_CONTENTION: &str = "could not acquire lock";

/// Configuration for the sled database that holds migration state.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Path to the database directory.
    pub path: PathBuf,

    /// Page cache capacity in bytes.
    pub cache_capacity: u64,

    /// Flush interval in milliseconds. None means flush only when asked.
    pub flush_every_ms: Option<u64>,

    /// Enable zstd compression.
    pub compression: bool,

    /// Temporary database (deleted on drop).
    pub temporary: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./shiftdb_data"),
            cache_capacity: 64 * 1024 * 1024, // 64MB
            flush_every_ms: Some(500),
            compression: true,
            temporary: false,
        }
    }
}

impl StorageConfig {
    /// Create a new configuration with the given path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    /// Create a temporary in-memory configuration for testing.
    pub fn temporary() -> Self {
        Self {
            path: PathBuf::from(""),
            temporary: true,
            ..Default::default()
        }
    }

    /// Set the page cache capacity.
    pub fn with_cache_capacity(mut self, bytes: u64) -> Self {
        self.cache_capacity = bytes;
        self
    }

    /// Disable compression.
    pub fn without_compression(mut self) -> Self {
        self.compression = false;
        self
    }

    /// Convert to sled configuration.
    pub fn to_sled_config(&self) -> sled::Config {
        let mut config = sled::Config::new()
            .cache_capacity(self.cache_capacity)
            .use_compression(self.compression);

        if self.temporary {
            config = config.temporary(true);
        } else {
            config = config.path(&self.path);
        }

        if let Some(ms) = self.flush_every_ms {
            config = config.flush_every_ms(Some(ms));
        }

        config
    }

    /// Open the sled database described by this configuration.
    pub fn open(&self) -> Result<sled::Db, Error> {
        Ok(self.to_sled_config().open()?)
    }

    /// Open the database for a migration command.
    ///
    /// sled holds an exclusive file lock for as long as a process has the
    /// directory open, so a second migrating process is turned away here
    /// before it can reach the lock record. That contention is reported as
    /// `MigrationLocked`. With `wait` set, the open is retried every
    /// `poll_interval` until the wait elapses.
    pub fn open_for_migration(
        &self,
        wait: Option<Duration>,
        poll_interval: Duration,
    ) -> Result<sled::Db, MigrationError> {
        let deadline = wait.map(|w| Instant::now() + w);

        loop {
            match self.to_sled_config().open() {
                Ok(db) => return Ok(db),
                Err(sled::Error::Io(e)) if e.to_string().contains(SLED_LOCK_CONTENTION) => {
                    let expired = deadline.map_or(true, |d| Instant::now() >= d);
                    if expired {
                        tracing::warn!(
                            path = %self.path.display(),
                            "database is held by another process"
                        );
                        return Err(MigrationError::MigrationLocked {
                            holder: format!("another process ({})", self.path.display()),
                            acquired_at: 0,
                        });
                    }
                    thread::sleep(poll_interval);
                }
                Err(e) => return Err(Error::from(e).into()),
            }
        }
    }
}
