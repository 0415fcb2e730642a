//! Misc helpers shared across modules: progress bar styles (ported from
//! `util.rs`'s `get_master_progress_bar` / `get_subroutine_progress_bar`)
//! and the log-space arithmetic every probabilistic module needs.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use indicatif::{ProgressBar, ProgressStyle};
use num_traits::{cast::AsPrimitive, Num};

fn master_style() -> ProgressStyle {
    ProgressStyle::with_template(
        "[{elapsed_precise}] {bar:40.green/yellow} {pos:>7}/{len:7} {msg}",
    )
    .unwrap()
    .progress_chars("##-")
}

fn subroutine_style() -> ProgressStyle {
    ProgressStyle::with_template(
        "[{elapsed_precise}] {bar:40.blue/cyan} {pos:>7}/{len:7} {msg}",
    )
    .unwrap()
    .progress_chars("##-")
}

/// Progress bar for a whole-genome pass (one tick per chromosome).
pub fn get_master_progress_bar<T: Num + AsPrimitive<u64>>(n: T) -> ProgressBar {
    ProgressBar::new(n.as_()).with_style(master_style())
}

/// Progress bar for a sub-loop within a single chromosome (EM iterations,
/// multi-start restarts).
pub fn get_subroutine_progress_bar<T: Num + AsPrimitive<u64>>(
    n: T,
) -> ProgressBar {
    ProgressBar::new(n.as_()).with_style(subroutine_style())
}

/// `ln(sum(exp(xs)))`, numerically stable via the max-shift trick.
/// Returns `f64::NEG_INFINITY` for an empty slice, matching the identity
/// `log_sum_exp([]) == ln(0)`.
pub fn log_sum_exp(xs: &[f64]) -> f64 {
    let max = xs.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        return max;
    }
    let sum: f64 = xs.iter().map(|&x| (x - max).exp()).sum();
    max + sum.ln()
}

/// Normalizes a row of log-probabilities in place so they log-sum-exp to
/// `0` (i.e. `exp` sums to `1`). Used after every posterior computation.
pub fn log_normalize(xs: &mut [f64]) {
    let lse = log_sum_exp(xs);
    if lse.is_finite() {
        for x in xs.iter_mut() {
            *x -= lse;
        }
    }
}

/// Polled at every per-chromosome boundary and every EM iteration.
/// Cloning shares the same underlying flag, so a
/// caller can hold one end and pass clones down into the fitter and
/// the peak loop.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Returns `Err(SpanError::Cancelled)` if cancellation has been
    /// requested, otherwise `Ok(())`; called at every poll point.
    pub fn check(&self) -> crate::errs::SpanResult<()> {
        if self.is_cancelled() {
            Err(crate::errs::SpanError::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_sum_exp_matches_naive_sum_for_small_values() {
        let xs = [0.0, -1.0, -2.0];
        let naive = xs.iter().map(|x| x.exp()).sum::<f64>().ln();
        assert!((log_sum_exp(&xs) - naive).abs() < 1e-12);
    }

    #[test]
    fn log_sum_exp_empty_is_neg_infinity() {
        assert_eq!(log_sum_exp(&[]), f64::NEG_INFINITY);
    }

    #[test]
    fn log_normalize_rows_sum_to_one_in_prob_space() {
        let mut xs = [1.0, 2.0, 3.0];
        log_normalize(&mut xs);
        let total: f64 = xs.iter().map(|x| x.exp()).sum();
        assert!((total - 1.0).abs() < 1e-9);
    }

    #[test]
    fn cancellation_token_is_shared_across_clones() {
        let token = CancellationToken::new();
        let clone = token.clone();
        assert!(token.check().is_ok());
        clone.cancel();
        assert!(token.is_cancelled());
        assert!(matches!(token.check(), Err(crate::errs::SpanError::Cancelled)));
    }
}
