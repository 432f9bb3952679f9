//! Processed-file ledger.
//!
//! The ledger is a plain text file, one input path per line, only ever
//! appended to. Paths finished during a run are buffered in memory and
//! written in batches of `batch_size`; the coordinator forces a last flush
//! before [`CacheStore::close`]. Entries still in the buffer when the
//! process dies are lost and those files get decrypted again next run.

use crate::types::ProcessedSet;
use anyhow::{Context, Result};
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, error, warn};

pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Read a ledger into a set. A missing file is an empty ledger.
pub fn load_processed(cache_file: &Path) -> Result<ProcessedSet> {
    let file = match File::open(cache_file) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(ProcessedSet::new()),
        Err(e) => {
            return Err(e).with_context(|| format!("open ledger {}", cache_file.display()));
        }
    };

    let mut set = ProcessedSet::new();
    for line in BufReader::new(file).lines() {
        let line = line.with_context(|| format!("read ledger {}", cache_file.display()))?;
        let line = line.strip_suffix('\r').unwrap_or(&line);
        if !line.is_empty() {
            set.insert(line.to_string());
        }
    }
    Ok(set)
}

/// Counters reported when the ledger is closed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LedgerStats {
    pub written: usize,
    pub lost: usize,
}

struct Ledger {
    file: File,
    buffer: Vec<String>,
    stats: LedgerStats,
}

pub struct CacheStore {
    path: PathBuf,
    batch_size: usize,
    sync: bool,
    inner: Mutex<Ledger>,
}

impl CacheStore {
    /// Open (or create) the ledger for appending.
    pub fn open(path: &Path, batch_size: usize, sync: bool) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create ledger dir {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("open ledger {}", path.display()))?;

        Ok(Self {
            path: path.to_path_buf(),
            batch_size: batch_size.max(1),
            sync,
            inner: Mutex::new(Ledger {
                file,
                buffer: Vec::with_capacity(batch_size.clamp(1, DEFAULT_BATCH_SIZE)),
                stats: LedgerStats::default(),
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<ProcessedSet> {
        load_processed(&self.path)
    }

    /// Buffer one finished path; writes the batch out once it is full.
    pub fn record(&self, entry: String) {
        let mut ledger = self.lock();
        ledger.buffer.push(entry);
        if ledger.buffer.len() >= self.batch_size {
            self.flush_locked(&mut ledger);
        }
    }

    /// Write every buffered path. No-op when nothing is buffered.
    pub fn flush(&self) {
        let mut ledger = self.lock();
        self.flush_locked(&mut ledger);
    }

    pub fn buffered(&self) -> usize {
        self.lock().buffer.len()
    }

    /// Release the file handle. Does not flush: whatever is still
    /// buffered is counted as lost.
    pub fn close(self) -> LedgerStats {
        let ledger = self.inner.into_inner().unwrap_or_else(PoisonError::into_inner);
        let mut stats = ledger.stats;
        if !ledger.buffer.is_empty() {
            warn!(
                entries = ledger.buffer.len(),
                ledger = %self.path.display(),
                "ledger closed with unflushed entries"
            );
            stats.lost += ledger.buffer.len();
        }
        stats
    }

    fn lock(&self) -> MutexGuard<'_, Ledger> {
        // pushes and drains leave the buffer consistent even if a holder panicked
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn flush_locked(&self, ledger: &mut Ledger) {
        if ledger.buffer.is_empty() {
            return;
        }

        let Ledger {
            file,
            buffer,
            stats,
        } = ledger;
        let batch = buffer.len();

        for entry in buffer.drain(..) {
            let mut line = entry;
            line.push('\n');
            match file.write_all(line.as_bytes()) {
                Ok(()) => stats.written += 1,
                Err(e) => {
                    stats.lost += 1;
                    error!(entry = line.trim_end(), error = %e, "failed to write ledger entry");
                }
            }
        }

        if self.sync {
            if let Err(e) = file.sync_data() {
                error!(ledger = %self.path.display(), error = %e, "failed to sync ledger");
            }
        }

        debug!(entries = batch, ledger = %self.path.display(), "ledger flushed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use tempfile::TempDir;

    fn lines(p: &Path) -> Vec<String> {
        std::fs::read_to_string(p)
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn missing_ledger_loads_empty() {
        let tmp = TempDir::new().unwrap();
        let set = load_processed(&tmp.path().join("none.txt")).unwrap();
        assert!(set.is_empty());
    }

    #[test]
    fn load_dedups_and_skips_blank_lines() {
        let tmp = TempDir::new().unwrap();
        let p = tmp.path().join("ledger.txt");
        std::fs::write(&p, "/in/a.webp\n\n/in/b.webp\r\n/in/a.webp\n").unwrap();

        let set = load_processed(&p).unwrap();
        assert_eq!(set.len(), 2);
        assert!(set.contains("/in/a.webp"));
        assert!(set.contains("/in/b.webp"));
    }

    #[test]
    fn open_creates_file_and_parent_dirs() {
        let tmp = TempDir::new().unwrap();
        let p = tmp.path().join("state/deep/ledger.txt");
        let store = CacheStore::open(&p, 10, false).unwrap();

        assert!(p.exists());
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn record_buffers_until_threshold() {
        let tmp = TempDir::new().unwrap();
        let p = tmp.path().join("ledger.txt");
        let store = CacheStore::open(&p, 3, false).unwrap();

        store.record("a".into());
        store.record("b".into());
        assert_eq!(store.buffered(), 2);
        assert!(lines(&p).is_empty());

        store.record("c".into());
        assert_eq!(store.buffered(), 0);
        assert_eq!(lines(&p), vec!["a", "b", "c"]);

        store.record("d".into());
        assert_eq!(lines(&p), vec!["a", "b", "c"]);
    }

    #[test]
    fn flush_is_repeatable_and_noop_when_empty() {
        let tmp = TempDir::new().unwrap();
        let p = tmp.path().join("ledger.txt");
        let store = CacheStore::open(&p, 100, true).unwrap();

        store.flush();
        assert!(lines(&p).is_empty());

        store.record("x".into());
        store.flush();
        store.flush();
        store.record("y".into());
        store.flush();

        assert_eq!(lines(&p), vec!["x", "y"]);
        assert_eq!(store.close(), LedgerStats { written: 2, lost: 0 });
    }

    #[test]
    fn appends_across_reopen() {
        let tmp = TempDir::new().unwrap();
        let p = tmp.path().join("ledger.txt");

        let first = CacheStore::open(&p, 100, false).unwrap();
        first.record("one".into());
        first.flush();
        first.close();

        let second = CacheStore::open(&p, 100, false).unwrap();
        assert!(second.load().unwrap().contains("one"));
        second.record("two".into());
        second.flush();
        second.close();

        assert_eq!(lines(&p), vec!["one", "two"]);
    }

    #[test]
    fn close_without_flush_counts_lost_entries() {
        let tmp = TempDir::new().unwrap();
        let p = tmp.path().join("ledger.txt");
        let store = CacheStore::open(&p, 100, false).unwrap();
        store.record("pending".into());

        assert_eq!(store.close(), LedgerStats { written: 0, lost: 1 });
        assert!(lines(&p).is_empty());
    }

    #[test]
    fn write_failures_count_as_lost_and_are_not_retried() {
        let tmp = TempDir::new().unwrap();
        let p = tmp.path().join("ledger.txt");
        std::fs::write(&p, "").unwrap();

        // read-only handle: every write_all fails
        let store = CacheStore {
            path: p.clone(),
            batch_size: 2,
            sync: true,
            inner: Mutex::new(Ledger {
                file: File::open(&p).unwrap(),
                buffer: Vec::new(),
                stats: LedgerStats::default(),
            }),
        };

        store.record("a".into());
        store.record("b".into());
        assert_eq!(store.buffered(), 0);

        store.record("c".into());
        store.flush();
        store.flush();
        assert_eq!(store.buffered(), 0);

        assert_eq!(store.close(), LedgerStats { written: 0, lost: 3 });
        assert!(lines(&p).is_empty());
    }

    #[test]
    fn concurrent_records_are_written_exactly_once() {
        let tmp = TempDir::new().unwrap();
        let p = tmp.path().join("ledger.txt");
        let store = Arc::new(CacheStore::open(&p, 7, false).unwrap());

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    for i in 0..250 {
                        store.record(format!("/in/{t}/{i}.webp"));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        store.flush();

        let written = lines(&p);
        assert_eq!(written.len(), 8 * 250);
        let unique: std::collections::HashSet<_> = written.iter().collect();
        assert_eq!(unique.len(), 8 * 250);

        // per-thread order survives interleaving
        for t in 0..8 {
            let prefix = format!("/in/{t}/");
            let mine: Vec<_> = written.iter().filter(|l| l.starts_with(&prefix)).collect();
            let expected: Vec<_> = (0..250).map(|i| format!("/in/{t}/{i}.webp")).collect();
            assert_eq!(mine, expected.iter().collect::<Vec<_>>());
        }
    }
}
