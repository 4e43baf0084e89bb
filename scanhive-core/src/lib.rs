//! Concurrent media-library scanner core: directory discovery, file processing, metadata
//! extraction fan-out, batched persistence, adaptive throttling, and the per-job lifecycle
//! state machine plus the manager that enforces at-most-one-scan-per-library.
//!
//! Crate layout follows `ferrex-core`: one file (or `mod.rs`-rooted submodule) per
//! concern, with the `database` feature gating the concrete `sqlx` backends behind the
//! `storage` traits the rest of the crate depends on instead.

pub mod cache;
pub mod cancel;
pub mod config;
pub mod error;
pub mod event_bus;
pub mod filters;
pub mod hashing;
pub mod manager;
#[cfg(feature = "database")]
pub mod persistence;
pub mod probe;
pub mod progress;
pub mod publisher;
pub mod scanner;
pub mod storage;
pub mod throttle;
pub mod types;
pub mod workers;

pub use cancel::CancelToken;
pub use config::ScannerSettings;
pub use error::{Result, ScanError};
pub use event_bus::BroadcastEventBus;
pub use manager::{FileStoreFactory, ScanManager};
pub use scanner::LibraryScanner;
pub use storage::{FileRecordStore, JobStore, LibraryStore};
pub use throttle::Throttler;

#[cfg(feature = "database")]
pub use persistence::{BatchPersister, PostgresJobStore, PostgresLibraryStore};
