//! Throttled aggregation of per-slice byte counters.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Minimum delay between aggregate recomputations.
const RECOMPUTE_BUDGET: Duration = Duration::from_millis(800);

/// Aggregates per-slice loaded counters into a loaded/speed signal.
///
/// Workers store absolute per-slice byte counts as the transport pulls
/// their body; [`tick`](Self::tick) folds those into the aggregate at
/// most once per time budget, so high-frequency stream callbacks stay
/// cheap. Readers always see the last computed aggregate.
pub struct TransferProgress {
    total: u64,
    slices: Vec<SliceProgress>,
    aggregate: Mutex<Aggregate>,
    budget: Duration,
}

struct SliceProgress {
    total: u64,
    loaded: AtomicU64,
}

struct Aggregate {
    loaded: u64,
    speed: u64,
    last_at: Instant,
    last_loaded: u64,
}

impl TransferProgress {
    /// Builds progress rows from a slice plan (one row per slice).
    pub fn new(slice_totals: &[u64]) -> Self {
        Self::with_budget(slice_totals, RECOMPUTE_BUDGET)
    }

    /// Single-row progress for one unsliced stream (downloads and the
    /// single-request upload path).
    pub fn single(total: u64) -> Self {
        Self::new(&[total])
    }

    pub fn with_budget(slice_totals: &[u64], budget: Duration) -> Self {
        Self {
            total: slice_totals.iter().sum(),
            slices: slice_totals
                .iter()
                .map(|&total| SliceProgress {
                    total,
                    loaded: AtomicU64::new(0),
                })
                .collect(),
            aggregate: Mutex::new(Aggregate {
                loaded: 0,
                speed: 0,
                last_at: Instant::now(),
                last_loaded: 0,
            }),
            budget,
        }
    }

    /// Stores the absolute byte count transferred for slice `index`
    /// (1-based). Absolute stores keep a restarted slice from double
    /// counting.
    pub fn record(&self, index: u32, loaded: u64) {
        if let Some(slice) = self.slices.get(index as usize - 1) {
            slice.loaded.store(loaded, Ordering::Relaxed);
        }
    }

    /// Marks slice `index` fully transferred (instant skip).
    pub fn complete_slice(&self, index: u32) {
        if let Some(slice) = self.slices.get(index as usize - 1) {
            slice.loaded.store(slice.total, Ordering::Relaxed);
        }
    }

    /// Recomputes the aggregate if the time budget has elapsed and the
    /// loaded sum actually moved.
    pub fn tick(&self) {
        let now = Instant::now();
        let mut agg = self.aggregate.lock().unwrap();
        if now < agg.last_at + self.budget {
            return;
        }
        let loaded = self.sum_loaded();
        if loaded == agg.last_loaded {
            return;
        }
        let elapsed_ms = now.duration_since(agg.last_at).as_millis() as u64;
        // A restarted slice re-reads from offset zero, so the sum can
        // regress below the remembered value; that carries no rate.
        agg.speed = loaded.saturating_sub(agg.last_loaded) * 1000 / elapsed_ms.max(1);
        agg.loaded = loaded;
        agg.last_at = now;
        agg.last_loaded = loaded;
    }

    /// Final recomputation: folds the exact loaded sum in and zeroes
    /// the rate.
    pub fn settle(&self) {
        let loaded = self.sum_loaded();
        let mut agg = self.aggregate.lock().unwrap();
        agg.loaded = loaded;
        agg.last_loaded = loaded;
        agg.speed = 0;
    }

    fn sum_loaded(&self) -> u64 {
        self.slices
            .iter()
            .map(|slice| slice.loaded.load(Ordering::Relaxed))
            .sum()
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn loaded(&self) -> u64 {
        self.aggregate.lock().unwrap().loaded
    }

    pub fn speed(&self) -> u64 {
        self.aggregate.lock().unwrap().speed
    }
}
