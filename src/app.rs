use crate::autotune::Tune;
use crate::cache::{self, CacheStore};
use crate::decrypt::Decryptor;
use crate::fs_scan;
use crate::pool::WorkerPool;
use crate::types::{PlanReport, ProcessedSet, RunReport, Stage, WorkItem, ledger_key};

use anyhow::{Context, Result};
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;
use time::OffsetDateTime;
use time::macros::format_description;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    pub cache_file: PathBuf,
    pub extension: String,
    pub batch_size: usize,
    pub sync_ledger: bool,
    pub tune: Tune,
}

/* =========================
   Helpers
   ========================= */

fn now_local_string() -> String {
    // now_local() refuses on some multi-threaded unix setups; fall back to UTC
    let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
    now.format(format_description!(
        "[year]-[month]-[day] [hour]:[minute]:[second] [offset_hour sign:mandatory]:[offset_minute]"
    ))
    .unwrap_or_default()
}

/// Current stage of a run; only moves forward.
struct Lifecycle {
    stage: Stage,
}

impl Lifecycle {
    fn new() -> Self {
        info!(stage = ?Stage::Init, "stage");
        Self { stage: Stage::Init }
    }

    fn advance(&mut self, next: Stage) {
        debug_assert!(next > self.stage, "stage {:?} -> {:?}", self.stage, next);
        info!(from = ?self.stage, stage = ?next, "stage");
        self.stage = next;
    }
}

#[derive(Default)]
struct Counters {
    discovered: AtomicUsize,
    skipped: AtomicUsize,
    decrypted: AtomicUsize,
    failed: AtomicUsize,
    walk_errors: AtomicUsize,
}

impl Counters {
    fn bump(n: &AtomicUsize) {
        n.fetch_add(1, Ordering::Relaxed);
    }
}

/// Read, decrypt, write. Returns plaintext size.
fn decrypt_item(item: &WorkItem, decryptor: &dyn Decryptor) -> Result<usize> {
    let ciphertext = fs::read(&item.input_path)
        .with_context(|| format!("read {}", item.input_path.display()))?;

    let plaintext = decryptor
        .decrypt(&ciphertext)
        .with_context(|| format!("decrypt {}", item.input_path.display()))?;

    if let Some(parent) = item.output_path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("create dir {}", parent.display()))?;
    }
    fs::write(&item.output_path, &plaintext)
        .with_context(|| format!("write {}", item.output_path.display()))?;

    Ok(plaintext.len())
}

/* =========================
   Run
   ========================= */

/// Decrypt everything under `input_dir` that the ledger does not list yet.
///
/// Per-file failures are logged and counted, never returned; the ledger is
/// always flushed before this returns `Ok`. Only setup failures (ledger
/// open/read, pool creation) are errors.
pub fn run(cfg: &AppConfig, decryptor: &dyn Decryptor) -> Result<RunReport> {
    let started = Instant::now();
    let started_at = now_local_string();
    let mut lifecycle = Lifecycle::new();

    let store = CacheStore::open(&cfg.cache_file, cfg.batch_size, cfg.sync_ledger)?;
    let pool = WorkerPool::new(cfg.tune.cpu_num, cfg.tune.coroutine)?;
    info!(
        input = %cfg.input_dir.display(),
        output = %cfg.output_dir.display(),
        ledger = %store.path().display(),
        threads = pool.threads(),
        admission = pool.admission(),
        batch_size = cfg.batch_size,
        "decrypt pipeline ready"
    );

    lifecycle.advance(Stage::LoadingCache);
    let processed = store.load()?;
    info!(entries = processed.len(), "ledger loaded");

    lifecycle.advance(Stage::Running);
    let counters = Counters::default();
    dispatch(cfg, &pool, &processed, &store, decryptor, &counters, &mut lifecycle);

    lifecycle.advance(Stage::Flushing);
    store.flush();
    let ledger = store.close();

    lifecycle.advance(Stage::Closed);
    let report = RunReport {
        started_at,
        elapsed_secs: started.elapsed().as_secs_f64(),
        discovered: counters.discovered.into_inner(),
        skipped: counters.skipped.into_inner(),
        decrypted: counters.decrypted.into_inner(),
        failed: counters.failed.into_inner(),
        walk_errors: counters.walk_errors.into_inner(),
        ledger_written: ledger.written,
        ledger_lost: ledger.lost,
        final_stage: lifecycle.stage,
    };

    info!(
        elapsed_secs = report.elapsed_secs,
        discovered = report.discovered,
        skipped = report.skipped,
        decrypted = report.decrypted,
        failed = report.failed,
        walk_errors = report.walk_errors,
        ledger_written = report.ledger_written,
        ledger_lost = report.ledger_lost,
        "decrypt finished"
    );
    if report.ledger_lost > 0 {
        warn!(
            lost = report.ledger_lost,
            "finished files missing from the ledger will be decrypted again next run"
        );
    }

    Ok(report)
}

/// Walk on this thread, submit each pending file, return once all
/// submitted work has drained.
fn dispatch(
    cfg: &AppConfig,
    pool: &WorkerPool,
    processed: &ProcessedSet,
    store: &CacheStore,
    decryptor: &dyn Decryptor,
    counters: &Counters,
    lifecycle: &mut Lifecycle,
) {
    pool.run(|submitter| {
        for entry in fs_scan::scan_targets(&cfg.input_dir, &cfg.extension) {
            let path = match entry {
                Ok(p) => p,
                Err(e) => {
                    Counters::bump(&counters.walk_errors);
                    error!(error = %e, "walk error, subtree skipped");
                    continue;
                }
            };
            Counters::bump(&counters.discovered);

            if processed.contains(&ledger_key(&path)) {
                Counters::bump(&counters.skipped);
                debug!(path = %path.display(), "already processed, skipping");
                continue;
            }

            let item = match WorkItem::new(&cfg.input_dir, &cfg.output_dir, path) {
                Ok(item) => item,
                Err(e) => {
                    Counters::bump(&counters.failed);
                    error!(error = %e, "input outside of input_dir");
                    continue;
                }
            };

            submitter.submit(move || match decrypt_item(&item, decryptor) {
                Ok(bytes) => {
                    store.record(item.ledger_key());
                    Counters::bump(&counters.decrypted);
                    info!(
                        input = %item.input_path.display(),
                        output = %item.output_path.display(),
                        bytes,
                        "decrypted"
                    );
                }
                Err(e) => {
                    Counters::bump(&counters.failed);
                    error!(
                        input = %item.input_path.display(),
                        error = %format!("{e:#}"),
                        "decrypt failed"
                    );
                }
            });
        }

        lifecycle.advance(Stage::Draining);
    });
}

/* =========================
   Plan (dry run)
   ========================= */

/// Walk and diff against the ledger without touching anything.
pub fn plan(cfg: &AppConfig) -> Result<PlanReport> {
    let processed = cache::load_processed(&cfg.cache_file)?;

    let mut pending = Vec::new();
    let mut already_processed = 0usize;
    let mut walk_errors = 0usize;

    for entry in fs_scan::scan_targets(&cfg.input_dir, &cfg.extension) {
        match entry {
            Ok(p) if processed.contains(&ledger_key(&p)) => already_processed += 1,
            Ok(p) => pending.push(p),
            Err(e) => {
                walk_errors += 1;
                error!(error = %e, "walk error, subtree skipped");
            }
        }
    }
    pending.sort();

    Ok(PlanReport {
        pending,
        already_processed,
        walk_errors,
    })
}
