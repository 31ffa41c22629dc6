//! Token pool lifecycle
//!
//! Turns per-region credential lists into persisted token pools, and picks
//! which slice of a pool serves a given dispatch call.
//!
//! Refresh path:
//! 1. `load_credentials` reads `input_<region>.json` from the versioned store
//! 2. `refresh_all` issues tokens with bounded concurrency and per-credential retries
//! 3. `reconcile` upserts the issued tokens into `token_<region>.json`
//! 4. `Refresher` runs the above per region, one run at a time
//!
//! Dispatch path:
//! 1. `CallCounter::next` hands out a unique call number
//! 2. `load_pool` reads the region's pool
//! 3. `select_window` maps (call number, pool size) to a contiguous slice

pub mod error;
pub mod pool;
pub mod reconcile;
pub mod refresh;
pub mod retry;
pub mod scheduler;
pub mod source;
pub mod window;

pub use error::{Error, Result};
pub use pool::{TokenPool, TokenRecord, is_valid_region, load_pool, pool_key};
pub use reconcile::{ReconcileReport, reconcile};
pub use refresh::{RegionOutcome, RegionReport, Refresher, spawn_refresh_task};
pub use retry::{Backoff, RetryError, RetryPolicy};
pub use scheduler::{RefreshPolicy, issue_with_retry, refresh_all};
pub use source::{input_key, load_credentials};
pub use window::{CallCounter, WindowConfig, WindowSelection, select_window};
