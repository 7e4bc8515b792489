//! Observer of migration lifecycle events, for progress, stats and error
//! aggregation.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::error::BlobMigrationError;
use crate::store::Store;

pub trait MigrationWatcher: Send + Sync {
    fn migration_did_start(&self, dest: &dyn Store, src: &dyn Store);
    fn migration_did_finish(&self);

    fn migrate_bucket_did_start(&self, bucket: &str);
    fn migrate_bucket_did_finish(&self, bucket: &str);

    fn migrate_blob_did_finish(&self);
    fn migrate_blob_already_finished(&self);
    fn migrate_blob_did_fail_with_error(&self, err: BlobMigrationError);
}

#[derive(Debug, Default)]
struct Stats {
    migrated: AtomicU64,
    skipped: AtomicU64,
    failed: AtomicU64,
    started_at: Mutex<Option<Instant>>,
    duration: Mutex<Option<Duration>>,
}

impl Stats {
    fn start(&self) {
        *self.started_at.lock().unwrap() = Some(Instant::now());
    }

    fn finish(&self) {
        let started_at = self.started_at.lock().unwrap().unwrap_or_else(Instant::now);
        *self.duration.lock().unwrap() = Some(started_at.elapsed());
    }

    fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            migrated: self.migrated.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            duration: self.duration.lock().unwrap().unwrap_or_default(),
        }
    }
}

/// A point-in-time read of the counters, for assertions in tests and for the
/// end-of-run summary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub migrated: u64,
    pub skipped: u64,
    pub failed: u64,
    pub duration: Duration,
}

/// Prints coloured progress dots and a final summary to stdout/stderr.
#[derive(Debug, Default)]
pub struct ConsoleWatcher {
    stats: Stats,
    errors: Mutex<Vec<BlobMigrationError>>,
}

impl ConsoleWatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }
}

const RED: &str = "\x1b[1;31m";
const YELLOW: &str = "\x1b[1;33m";
const GREEN: &str = "\x1b[1;32m";
const RESET: &str = "\x1b[0m";

impl MigrationWatcher for ConsoleWatcher {
    fn migration_did_start(&self, dest: &dyn Store, src: &dyn Store) {
        println!("Migrating from {} to {}\n", src.name(), dest.name());
        self.stats.start();
    }

    fn migration_did_finish(&self) {
        self.stats.finish();
        let snapshot = self.stats.snapshot();
        println!(
            "\nTook {:?}\n\nMigrated files:    {}\nAlready migrated:  {}\nFailed to migrate: {}\n",
            snapshot.duration, snapshot.migrated, snapshot.skipped, snapshot.failed
        );
        for err in self.errors.lock().unwrap().iter() {
            eprintln!("{err}");
        }
    }

    fn migrate_bucket_did_start(&self, bucket: &str) {
        print!("{bucket} ");
        tracing::info!(bucket, "bucket migration started");
    }

    fn migrate_bucket_did_finish(&self, bucket: &str) {
        println!(" done.");
        tracing::info!(bucket, "bucket migration finished");
    }

    fn migrate_blob_did_fail_with_error(&self, err: BlobMigrationError) {
        self.stats.failed.fetch_add(1, Ordering::Relaxed);
        print!("{RED}.{RESET}");
        tracing::warn!(error = %err, "blob migration failed");
        self.errors.lock().unwrap().push(err);
    }

    fn migrate_blob_did_finish(&self) {
        self.stats.migrated.fetch_add(1, Ordering::Relaxed);
        print!("{GREEN}.{RESET}");
    }

    fn migrate_blob_already_finished(&self) {
        self.stats.skipped.fetch_add(1, Ordering::Relaxed);
        print!("{YELLOW}.{RESET}");
    }
}

/// Records nothing; used by tests that only assert on an independently-taken
/// `Stats` snapshot, or that want to assert on event ordering directly.
#[derive(Debug, Default)]
pub struct NullWatcher {
    stats: Stats,
}

impl NullWatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }
}

impl MigrationWatcher for NullWatcher {
    fn migration_did_start(&self, _dest: &dyn Store, _src: &dyn Store) {
        self.stats.start();
    }

    fn migration_did_finish(&self) {
        self.stats.finish();
    }

    fn migrate_bucket_did_start(&self, _bucket: &str) {}
    fn migrate_bucket_did_finish(&self, _bucket: &str) {}

    fn migrate_blob_did_finish(&self) {
        self.stats.migrated.fetch_add(1, Ordering::Relaxed);
    }

    fn migrate_blob_already_finished(&self) {
        self.stats.skipped.fetch_add(1, Ordering::Relaxed);
    }

    fn migrate_blob_did_fail_with_error(&self, _err: BlobMigrationError) {
        self.stats.failed.fetch_add(1, Ordering::Relaxed);
    }
}

/// A watcher that records the sequence of event kinds it observed, for tests
/// that assert on event ordering.
#[derive(Debug, Default)]
pub struct RecordingWatcher {
    pub events: Mutex<Vec<String>>,
}

impl RecordingWatcher {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MigrationWatcher for RecordingWatcher {
    fn migration_did_start(&self, _dest: &dyn Store, _src: &dyn Store) {
        self.events.lock().unwrap().push("start".into());
    }

    fn migration_did_finish(&self) {
        self.events.lock().unwrap().push("finish".into());
    }

    fn migrate_bucket_did_start(&self, bucket: &str) {
        self.events.lock().unwrap().push(format!("bucket_start:{bucket}"));
    }

    fn migrate_bucket_did_finish(&self, bucket: &str) {
        self.events.lock().unwrap().push(format!("bucket_finish:{bucket}"));
    }

    fn migrate_blob_did_finish(&self) {
        self.events.lock().unwrap().push("blob_finish".into());
    }

    fn migrate_blob_already_finished(&self) {
        self.events.lock().unwrap().push("blob_skip".into());
    }

    fn migrate_blob_did_fail_with_error(&self, _err: BlobMigrationError) {
        self.events.lock().unwrap().push("blob_fail".into());
    }
}
