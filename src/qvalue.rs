//! Benjamini-Hochberg / Bonferroni q-values over island scores, plus
//! the weak-value memoized cache keyed by
//! `(FitResults identity, chromosome, gap)`.
//!
//! Everything here works in log-space (island scores already are
//! log-probabilities), since the smallest real p-values this engine
//! sees routinely underflow `f64` in linear space.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use crate::config::MultipleTesting;

/// Benjamini-Hochberg on log-probabilities: for ascending p-value rank
/// `i` (1-indexed) out of `n`, `log_q(i) = log_p(i) + ln(n) - ln(i)`,
/// then enforced non-decreasing by taking a running minimum from the
/// largest rank down to the smallest.
pub fn log_benjamini_hochberg(log_p: &[f64]) -> Vec<f64> {
    let n = log_p.len();
    if n == 0 {
        return Vec::new();
    }
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| log_p[a].partial_cmp(&log_p[b]).unwrap());

    let ln_n = (n as f64).ln();
    let mut sorted_log_q = vec![0.0f64; n];
    for (rank, &i) in order.iter().enumerate() {
        let rank1 = (rank + 1) as f64;
        sorted_log_q[rank] = (log_p[i] + ln_n - rank1.ln()).min(0.0);
    }
    for i in (0..n.saturating_sub(1)).rev() {
        sorted_log_q[i] = sorted_log_q[i].min(sorted_log_q[i + 1]);
    }

    let mut out = vec![0.0f64; n];
    for (rank, &i) in order.iter().enumerate() {
        out[i] = sorted_log_q[rank];
    }
    out
}

/// Bonferroni on log-probabilities: `log_q = log_p + ln(n)`, clamped at
/// `0` (q-values are probabilities, never exceeding 1).
pub fn log_bonferroni(log_p: &[f64]) -> Vec<f64> {
    let ln_n = (log_p.len().max(1) as f64).ln();
    log_p.iter().map(|&p| (p + ln_n).min(0.0)).collect()
}

pub fn log_qvalues(log_p: &[f64], method: MultipleTesting) -> Vec<f64> {
    match method {
        MultipleTesting::BenjaminiHochberg => log_benjamini_hochberg(log_p),
        MultipleTesting::Bonferroni => log_bonferroni(log_p),
    }
}

/// Q-value results cached per `(FitResults identity, chromosome, gap)`,
/// with weak-value semantics so the cache is evictable under memory
/// pressure. Scoped to one engine instance rather than a module-level
/// global.
#[derive(Default)]
pub struct QValueCache {
    entries: Mutex<HashMap<(String, String, u32), Weak<Vec<f64>>>>,
}

impl QValueCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached q-values for `(fit_id, chrom, gap)` if a live
    /// `Arc` still exists, otherwise runs `compute` and caches a weak
    /// reference to the result.
    pub fn get_or_compute(
        &self,
        fit_id: &str,
        chrom: &str,
        gap: u32,
        compute: impl FnOnce() -> Vec<f64>,
    ) -> Arc<Vec<f64>> {
        let key = (fit_id.to_string(), chrom.to_string(), gap);
        let mut entries = self.entries.lock().expect("qvalue cache mutex poisoned");
        if let Some(existing) = entries.get(&key).and_then(Weak::upgrade) {
            return existing;
        }
        let fresh = Arc::new(compute());
        entries.insert(key, Arc::downgrade(&fresh));
        fresh
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bh_qvalues_are_never_smaller_than_their_pvalues() {
        let log_p = vec![(-10.0f64), -1.0, -0.5, -7.0, -0.1];
        let log_q = log_benjamini_hochberg(&log_p);
        for i in 0..log_p.len() {
            assert!(log_q[i] >= log_p[i] - 1e-12);
        }
    }

    #[test]
    fn bh_qvalues_are_monotonic_in_sorted_pvalue_order() {
        let log_p = vec![-12.0, -9.0, -6.0, -3.0, -1.0];
        let log_q = log_benjamini_hochberg(&log_p);
        for w in log_q.windows(2) {
            assert!(w[0] <= w[1] + 1e-12);
        }
    }

    #[test]
    fn tight_fdr_rejects_everything() {
        // fdr = 1e-300, nothing should clear the bar.
        let log_p = vec![-5.0, -3.0, -1.0];
        let log_q = log_benjamini_hochberg(&log_p);
        let threshold = 1e-300f64.ln();
        assert!(log_q.iter().all(|&q| q >= threshold));
    }

    #[test]
    fn bonferroni_is_never_more_lenient_than_bh() {
        let log_p = vec![-10.0, -8.0, -2.0, -1.0];
        let bh = log_benjamini_hochberg(&log_p);
        let bf = log_bonferroni(&log_p);
        for i in 0..log_p.len() {
            assert!(bf[i] >= bh[i] - 1e-9);
        }
    }

    #[test]
    fn cache_reuses_the_live_arc_without_recomputing() {
        let cache = QValueCache::new();
        let calls = std::sync::atomic::AtomicUsize::new(0);
        let compute = || {
            calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            vec![0.1, 0.2]
        };
        let first = cache.get_or_compute("fit-a", "chr1", 1, compute);
        let second = cache.get_or_compute("fit-a", "chr1", 1, compute);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[test]
    fn cache_recomputes_after_the_arc_is_dropped() {
        let cache = QValueCache::new();
        {
            let first = cache.get_or_compute("fit-b", "chr1", 1, || vec![1.0]);
            drop(first);
        }
        let calls = std::sync::atomic::AtomicUsize::new(0);
        let second = cache.get_or_compute("fit-b", "chr1", 1, || {
            calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            vec![2.0]
        });
        assert_eq!(*second, vec![2.0]);
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
