//! Bulk decryption of encrypted image trees.
//!
//! Walks an input directory, decrypts every matching file into a mirrored
//! output tree on a bounded worker pool, and records finished inputs in an
//! append-only ledger so an interrupted run can pick up where it stopped.

pub mod app;
pub mod autotune;
pub mod cache;
pub mod config;
pub mod decrypt;
pub mod fs_scan;
pub mod hw;
pub mod logging;
pub mod pool;
pub mod types;
