//! Batch window rotation over a token pool
//!
//! Calls are grouped into blocks of `calls_per_block`; each block of calls
//! is served by the next `block_size` records of the pool, wrapping to the
//! start once the pool runs out. The mapping is a pure function of the
//! call number, so concurrent dispatches never share mutable window state.

use std::ops::Range;
use std::sync::atomic::{AtomicU64, Ordering};

pub const DEFAULT_BLOCK_SIZE: usize = 100;
pub const DEFAULT_CALLS_PER_BLOCK: u64 = 28;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowConfig {
    /// Records per window.
    pub block_size: usize,
    /// Consecutive calls served by the same window.
    pub calls_per_block: u64,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            calls_per_block: DEFAULT_CALLS_PER_BLOCK,
        }
    }
}

/// A window over the pool. `end` is exclusive and may exceed the pool size
/// when the last block is partial; use `clamped` before slicing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSelection {
    pub block_index: u64,
    pub start: usize,
    pub end: usize,
}

impl WindowSelection {
    /// The index range actually present in a pool of `pool_size` records.
    pub fn clamped(&self, pool_size: usize) -> Range<usize> {
        let end = self.end.min(pool_size);
        self.start.min(end)..end
    }
}

/// Pick the window for a 1-based call number. A call number of 0 is
/// treated as 1.
pub fn select_window(call_number: u64, pool_size: usize, config: &WindowConfig) -> WindowSelection {
    let calls_per_block = config.calls_per_block.max(1);
    let block_index = (call_number.max(1) - 1) / calls_per_block;

    let start = usize::try_from(block_index)
        .unwrap_or(usize::MAX)
        .saturating_mul(config.block_size);
    if start >= pool_size {
        return WindowSelection {
            block_index,
            start: 0,
            end: config.block_size.min(pool_size),
        };
    }

    WindowSelection {
        block_index,
        start,
        end: start.saturating_add(config.block_size),
    }
}

/// Process-wide dispatch call counter.
#[derive(Debug, Default)]
pub struct CallCounter(AtomicU64);

impl CallCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the next call number. The first call is 1.
    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Calls claimed so far.
    pub fn current(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn window(call: u64, pool: usize) -> WindowSelection {
        select_window(call, pool, &WindowConfig::default())
    }

    fn sel(block_index: u64, start: usize, end: usize) -> WindowSelection {
        WindowSelection {
            block_index,
            start,
            end,
        }
    }

    #[test]
    fn first_call_uses_first_block() {
        assert_eq!(window(1, 250), sel(0, 0, 100));
    }

    #[test]
    fn call_29_moves_to_second_block() {
        assert_eq!(window(28, 250), sel(0, 0, 100));
        assert_eq!(window(29, 250), sel(1, 100, 200));
    }

    #[test]
    fn partial_last_block_is_clamped_when_slicing() {
        let w = window(29, 150);
        assert_eq!(w, sel(1, 100, 200));
        assert_eq!(w.clamped(150), 100..150);
    }

    #[test]
    fn exhausted_pool_wraps_to_start() {
        assert_eq!(window(57, 150), sel(2, 0, 100));
        assert_eq!(window(57, 40), sel(2, 0, 40));
    }

    #[test]
    fn zero_call_number_is_first_call() {
        assert_eq!(window(0, 250), window(1, 250));
    }

    #[test]
    fn empty_pool_selects_nothing() {
        let w = window(5, 0);
        assert_eq!(w, sel(0, 0, 0));
        assert!(w.clamped(0).is_empty());
    }

    #[test]
    fn selection_is_pure() {
        for call in [1, 28, 29, 500, 10_000] {
            for pool in [0, 1, 99, 100, 250, 1_000] {
                assert_eq!(window(call, pool), window(call, pool));
            }
        }
    }

    #[test]
    fn block_index_steps_every_calls_per_block() {
        let mut previous = 0;
        for call in 1..=28 * 10 {
            let w = window(call, 10_000);
            assert!(w.block_index >= previous);
            if (call - 1) % 28 == 0 && call > 1 {
                assert_eq!(w.block_index, previous + 1, "call {call}");
            } else {
                assert_eq!(w.block_index, previous, "call {call}");
            }
            previous = w.block_index;
        }
    }

    #[test]
    fn clamped_range_always_fits_pool() {
        for call in 1..400 {
            for pool in [0, 1, 50, 99, 100, 101, 150, 250] {
                let range = window(call, pool).clamped(pool);
                assert!(range.start <= range.end);
                assert!(range.end <= pool);
                if pool > 0 {
                    assert!(!range.is_empty(), "call {call} pool {pool}");
                }
            }
        }
    }

    #[test]
    fn huge_call_numbers_do_not_overflow() {
        let w = window(u64::MAX, 250);
        assert_eq!(w.start, 0);
        assert_eq!(w.end, 100);
    }

    #[test]
    fn custom_config() {
        let config = WindowConfig {
            block_size: 10,
            calls_per_block: 2,
        };
        assert_eq!(select_window(3, 25, &config), sel(1, 10, 20));
        assert_eq!(select_window(5, 25, &config), sel(2, 20, 30));
        assert_eq!(select_window(7, 25, &config), sel(3, 0, 10));
    }

    #[test]
    fn counter_starts_at_one() {
        let counter = CallCounter::new();
        assert_eq!(counter.current(), 0);
        assert_eq!(counter.next(), 1);
        assert_eq!(counter.next(), 2);
        assert_eq!(counter.current(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_callers_get_unique_numbers() {
        let counter = Arc::new(CallCounter::new());
        let mut handles = vec![];
        for _ in 0..8 {
            let counter = counter.clone();
            handles.push(tokio::spawn(async move {
                (0..250).map(|_| counter.next()).collect::<Vec<_>>()
            }));
        }

        let mut all = vec![];
        for h in handles {
            all.extend(h.await.unwrap());
        }
        all.sort_unstable();
        assert_eq!(all, (1..=2_000).collect::<Vec<_>>());
    }
}
