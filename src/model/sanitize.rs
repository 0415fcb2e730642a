//! State-flip sanitization. After fitting, an HMM's `Low` and
//! `High` emission schemes can come out swapped (the optimizer found
//! the same likelihood with the labels reversed). This detects that
//! and corrects it with `probabilityFlip`, and separately checks that
//! per-replicate fits agree on whether a swap is needed before one is
//! applied globally.

use ndarray::Array2;

use crate::errs::{SpanError, SpanResult};
use crate::model::hmm::NbHmm;
use crate::model::mixture::NbMixture;
use crate::model::nb::NegBinomial;
use crate::model::state::StateLabel;

/// Per-pair verdict from comparing both `mu` and the NB success
/// probability `p = phi / (phi + mu)` between the low and high state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SwapSignal {
    None,
    Full,
    Partial,
}

fn success_probability(nb: &NegBinomial) -> f64 {
    nb.phi / (nb.phi + nb.mu)
}

fn swap_signal(low: &NegBinomial, high: &NegBinomial) -> SwapSignal {
    let mu_inverted = low.mu > high.mu;
    let p_inverted = success_probability(low) > success_probability(high);
    match (mu_inverted, p_inverted) {
        (true, true) => SwapSignal::Full,
        (false, false) => SwapSignal::None,
        _ => SwapSignal::Partial,
    }
}

/// The `(low, high)` state-index pair to check: the first `Low`/`High`
/// label pair in `labels`. `None` for variants with no such pair (a
/// plain mixture with only `Low`/`High`-less custom labels).
fn low_high_pair(labels: &[StateLabel]) -> Option<(usize, usize)> {
    let low = labels.iter().position(|l| *l == StateLabel::Low)?;
    let high = labels.iter().position(|l| *l == StateLabel::High)?;
    Some((low, high))
}

/// Swaps row/column `a` with row/column `b` in a log-transition matrix,
/// and the matching prior entries, in place.
fn probability_flip(log_prior: &mut [f64], log_trans: &mut Array2<f64>, a: usize, b: usize) {
    log_prior.swap(a, b);
    let k = log_trans.nrows();
    for j in 0..k {
        let tmp = log_trans[[a, j]];
        log_trans[[a, j]] = log_trans[[b, j]];
        log_trans[[b, j]] = tmp;
    }
    for i in 0..k {
        let tmp = log_trans[[i, a]];
        log_trans[[i, a]] = log_trans[[i, b]];
        log_trans[[i, b]] = tmp;
    }
}

/// Applies state-flip sanitization to a single fitted HMM, returning
/// whether a flip was applied. Idempotent: once the
/// ordering is no longer inverted, a second call is always a no-op.
pub fn sanitize(hmm: &mut NbHmm) -> SpanResult<bool> {
    let Some((low, high)) = low_high_pair(&hmm.labels) else {
        return Ok(false);
    };
    match swap_signal(&hmm.emissions[low], &hmm.emissions[high]) {
        SwapSignal::None => Ok(false),
        SwapSignal::Full => {
            hmm.emissions.swap(low, high);
            probability_flip(&mut hmm.log_prior, &mut hmm.log_trans, low, high);
            Ok(true)
        }
        SwapSignal::Partial => {
            log::warn!(
                "state-flip sanitizer: only one of mu/p is inverted between \
                 the low and high states, leaving parameters as fit \
                 (possible low-quality data)"
            );
            Ok(false)
        }
    }
}

/// Applies state-flip sanitization to a plain mixture, which has no
/// transition matrix to rearrange: only the components and their
/// mixture weights swap.
pub fn sanitize_mixture(mix: &mut NbMixture) -> SpanResult<bool> {
    let Some((low, high)) = low_high_pair(&mix.labels) else {
        return Ok(false);
    };
    match swap_signal(&mix.components[low], &mix.components[high]) {
        SwapSignal::None => Ok(false),
        SwapSignal::Full => {
            mix.components.swap(low, high);
            mix.log_weights.swap(low, high);
            Ok(true)
        }
        SwapSignal::Partial => {
            log::warn!(
                "state-flip sanitizer: only one of mu/p is inverted between \
                 the low and high components, leaving parameters as fit \
                 (possible low-quality data)"
            );
            Ok(false)
        }
    }
}

/// Multi-replicate consistency check: given the `(low, high)` emission
/// pair fitted independently per replicate, every replicate must agree
/// on whether a swap is needed. Replicates reporting `Partial` are
/// logged and excluded from the vote. `Ok(true)` means a swap is needed
/// and was unanimous among the deciding replicates; `Ok(false)` means
/// none need it; contradictory replicates are an `IrrecoverableFit`.
pub fn replicates_agree_on_swap(
    replicate_emissions: &[(NegBinomial, NegBinomial)],
) -> SpanResult<bool> {
    let mut saw_full = false;
    let mut saw_none = false;
    for (low, high) in replicate_emissions {
        match swap_signal(low, high) {
            SwapSignal::Full => saw_full = true,
            SwapSignal::None => saw_none = true,
            SwapSignal::Partial => {
                log::warn!(
                    "state-flip sanitizer: a replicate shows partial \
                     inversion, excluded from the swap vote"
                );
            }
        }
    }
    match (saw_full, saw_none) {
        (true, true) => Err(SpanError::IrrecoverableFit {
            reason: "replicates disagree on low/high state-flip direction".to_string(),
        }),
        (true, false) => Ok(true),
        _ => Ok(false),
    }
}

#[cfg(test)]
mod tests {
    use ndarray::Array2;

    use super::*;

    fn swapped_hmm() -> NbHmm {
        let labels = StateLabel::zlh();
        let k = labels.len();
        let mut log_trans = Array2::from_elem((k, k), (0.05f64 / (k - 1) as f64).ln());
        for s in 0..k {
            log_trans[[s, s]] = 0.95f64.ln();
        }
        NbHmm {
            labels,
            zero_inflated: true,
            log_prior: vec![0.2f64.ln(), 0.5f64.ln(), 0.3f64.ln()],
            log_trans,
            // state 1 ("Low") is fit with a higher mean than state 2
            // ("High"): both mu and p are inverted, so this needs a flip.
            emissions: vec![
                NegBinomial::new(0.01, 10.0),
                NegBinomial::new(20.0, 5.0),
                NegBinomial::new(2.0, 5.0),
            ],
        }
    }

    #[test]
    fn detects_and_corrects_full_inversion() {
        let mut hmm = swapped_hmm();
        let flipped = sanitize(&mut hmm).unwrap();
        assert!(flipped);
        assert!(hmm.emissions[1].mu < hmm.emissions[2].mu);
    }

    #[test]
    fn sanitize_is_idempotent() {
        let mut hmm = swapped_hmm();
        sanitize(&mut hmm).unwrap();
        let again = sanitize(&mut hmm).unwrap();
        assert!(!again);
    }

    #[test]
    fn leaves_already_ordered_hmm_untouched() {
        let labels = StateLabel::zlh();
        let k = labels.len();
        let log_trans = Array2::from_elem((k, k), (1.0 / k as f64).ln());
        let mut hmm = NbHmm {
            labels,
            zero_inflated: true,
            log_prior: vec![(1.0 / k as f64).ln(); k],
            log_trans,
            emissions: vec![
                NegBinomial::new(0.01, 10.0),
                NegBinomial::new(2.0, 5.0),
                NegBinomial::new(20.0, 5.0),
            ],
        };
        assert!(!sanitize(&mut hmm).unwrap());
    }

    #[test]
    fn mixture_sanitize_swaps_components_and_weights() {
        let mut mix = NbMixture {
            labels: vec![StateLabel::Low, StateLabel::High],
            log_weights: vec![0.7f64.ln(), 0.3f64.ln()],
            components: vec![NegBinomial::new(20.0, 5.0), NegBinomial::new(2.0, 5.0)],
        };
        assert!(sanitize_mixture(&mut mix).unwrap());
        assert!(mix.components[0].mu < mix.components[1].mu);
        assert!((mix.log_weights[0].exp() - 0.3).abs() < 1e-9);
    }

    #[test]
    fn contradictory_replicates_fail() {
        let needs_swap = (NegBinomial::new(20.0, 5.0), NegBinomial::new(2.0, 5.0));
        let already_ordered = (NegBinomial::new(2.0, 5.0), NegBinomial::new(20.0, 5.0));
        let err = replicates_agree_on_swap(&[needs_swap, already_ordered]).unwrap_err();
        assert!(matches!(err, SpanError::IrrecoverableFit { .. }));
    }

    #[test]
    fn unanimous_replicates_agree() {
        let a = (NegBinomial::new(20.0, 5.0), NegBinomial::new(2.0, 5.0));
        let b = (NegBinomial::new(15.0, 4.0), NegBinomial::new(3.0, 4.0));
        assert!(replicates_agree_on_swap(&[a, b]).unwrap());
    }
}
