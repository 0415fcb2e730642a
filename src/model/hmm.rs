//! `NB_ZLH_HMM` / `NB_ZLMH_HMM` / `NB_ZLHID_HMM` / `NB_HMM_k`: a
//! negative-binomial hidden Markov model, optionally zero-inflated in
//! its first state. All math is log-space, computed with
//! `crate::util::log_sum_exp`.

use ndarray::Array2;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::model::nb::NegBinomial;
use crate::model::state::StateLabel;
use crate::util::{log_normalize, log_sum_exp};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NbHmm {
    pub labels: Vec<StateLabel>,
    /// Zero-inflated variants fix `emissions[0]` at `mu = 0`, the
    /// reserved state with a point mass at 0.
    pub zero_inflated: bool,
    /// Length-`k`, log-space, log-sums to 0.
    pub log_prior: Vec<f64>,
    /// `k x k`, log-space, each row log-sums to 0.
    pub log_trans: Array2<f64>,
    pub emissions: Vec<NegBinomial>,
}

/// Output of one forward-backward pass, reused by the E-step, the
/// log-likelihood accessor and `posteriors`.
pub struct ForwardBackward {
    pub log_alpha: Array2<f64>,
    pub log_beta: Array2<f64>,
    pub log_likelihood: f64,
}

impl NbHmm {
    pub fn n_states(&self) -> usize {
        self.labels.len()
    }

    fn log_emission(&self, state: usize, y: u32) -> f64 {
        if self.zero_inflated && state == 0 {
            if y == 0 {
                0.0
            } else {
                f64::NEG_INFINITY
            }
        } else {
            self.emissions[state].log_pmf(y)
        }
    }

    fn log_emission_matrix(&self, ys: &[u32]) -> Array2<f64> {
        let k = self.n_states();
        let mut b = Array2::zeros((ys.len(), k));
        for (t, &y) in ys.iter().enumerate() {
            for s in 0..k {
                b[[t, s]] = self.log_emission(s, y);
            }
        }
        b
    }

    pub fn forward_backward(&self, ys: &[u32]) -> ForwardBackward {
        let k = self.n_states();
        let n = ys.len();
        let log_b = self.log_emission_matrix(ys);

        let mut log_alpha = Array2::zeros((n, k));
        for s in 0..k {
            log_alpha[[0, s]] = self.log_prior[s] + log_b[[0, s]];
        }
        for t in 1..n {
            for s in 0..k {
                let terms: Vec<f64> = (0..k)
                    .map(|sp| log_alpha[[t - 1, sp]] + self.log_trans[[sp, s]])
                    .collect();
                log_alpha[[t, s]] = log_sum_exp(&terms) + log_b[[t, s]];
            }
        }

        let mut log_beta = Array2::zeros((n, k));
        // row n-1 stays 0 (ln 1)
        for t in (0..n.saturating_sub(1)).rev() {
            for s in 0..k {
                let terms: Vec<f64> = (0..k)
                    .map(|sp| {
                        self.log_trans[[s, sp]]
                            + log_b[[t + 1, sp]]
                            + log_beta[[t + 1, sp]]
                    })
                    .collect();
                log_beta[[t, s]] = log_sum_exp(&terms);
            }
        }

        let last_row: Vec<f64> = (0..k).map(|s| log_alpha[[n - 1, s]]).collect();
        let log_likelihood = log_sum_exp(&last_row);

        ForwardBackward { log_alpha, log_beta, log_likelihood }
    }

    pub fn log_likelihood(&self, ys: &[u32]) -> f64 {
        self.forward_backward(ys).log_likelihood
    }

    /// `posteriors(frame) -> matrix[rows x states]` in log-space,
    /// each row log-summing to 0 within `1e-6`.
    pub fn posteriors(&self, ys: &[u32]) -> Array2<f64> {
        let fb = self.forward_backward(ys);
        let k = self.n_states();
        let mut gamma = Array2::zeros((ys.len(), k));
        for t in 0..ys.len() {
            let mut row: Vec<f64> = (0..k)
                .map(|s| fb.log_alpha[[t, s]] + fb.log_beta[[t, s]])
                .collect();
            log_normalize(&mut row);
            for s in 0..k {
                gamma[[t, s]] = row[s];
            }
        }
        gamma
    }

    pub fn predict(&self, ys: &[u32]) -> Vec<usize> {
        let gamma = self.posteriors(ys);
        (0..ys.len())
            .map(|t| {
                (0..self.n_states())
                    .max_by(|&a, &b| {
                        gamma[[t, a]].partial_cmp(&gamma[[t, b]]).unwrap()
                    })
                    .unwrap()
            })
            .collect()
    }

    pub fn sample(&self, n: usize, rng: &mut impl Rng) -> Vec<u32> {
        let k = self.n_states();
        let mut state = weighted_choice(&self.log_prior, rng);
        let mut out = Vec::with_capacity(n);
        for _ in 0..n {
            out.push(self.sample_emission(state, rng));
            let row: Vec<f64> =
                (0..k).map(|s| self.log_trans[[state, s]]).collect();
            state = weighted_choice(&row, rng);
        }
        out
    }

    fn sample_emission(&self, state: usize, rng: &mut impl Rng) -> u32 {
        if self.zero_inflated && state == 0 {
            return 0;
        }
        self.emissions[state].sample(rng)
    }

    /// One EM iteration (E-step + M-step) over a single squashed
    /// observation sequence. Returns the log-likelihood *after* the
    /// M-step update, which the Fitter compares against the previous
    /// iteration's returned value for its convergence test.
    pub fn em_step(&mut self, ys: &[u32]) -> f64 {
        let k = self.n_states();
        let n = ys.len();
        let fb = self.forward_backward(ys);
        let log_b = self.log_emission_matrix(ys);

        let mut gamma = Array2::zeros((n, k));
        for t in 0..n {
            let mut row: Vec<f64> =
                (0..k).map(|s| fb.log_alpha[[t, s]] + fb.log_beta[[t, s]]).collect();
            log_normalize(&mut row);
            for s in 0..k {
                gamma[[t, s]] = row[s];
            }
        }

        // Accumulate xi (pairwise transition posteriors) in linear space
        // directly, since we immediately sum them for the M-step.
        let mut xi_sum = Array2::<f64>::zeros((k, k));
        let mut gamma_sum_excl_last = vec![0.0f64; k];
        for t in 0..n.saturating_sub(1) {
            let mut log_xi = Array2::<f64>::zeros((k, k));
            for s in 0..k {
                for sp in 0..k {
                    log_xi[[s, sp]] = fb.log_alpha[[t, s]]
                        + self.log_trans[[s, sp]]
                        + log_b[[t + 1, sp]]
                        + fb.log_beta[[t + 1, sp]]
                        - fb.log_likelihood;
                }
            }
            for s in 0..k {
                for sp in 0..k {
                    xi_sum[[s, sp]] += log_xi[[s, sp]].exp();
                }
                gamma_sum_excl_last[s] += gamma[[t, s]].exp();
            }
        }

        // M-step: prior.
        self.log_prior = (0..k).map(|s| gamma[[0, s]]).collect();

        // M-step: transition matrix, row-normalized in log-space.
        for s in 0..k {
            let denom = gamma_sum_excl_last[s].max(1e-300);
            for sp in 0..k {
                self.log_trans[[s, sp]] = (xi_sum[[s, sp]] / denom).max(1e-300).ln();
            }
        }

        // M-step: emissions, responsibility-weighted NB fit per state.
        for s in 0..k {
            if self.zero_inflated && s == 0 {
                continue;
            }
            let weights: Vec<f64> = (0..n).map(|t| gamma[[t, s]].exp()).collect();
            self.emissions[s] = NegBinomial::fit_weighted(ys, &weights);
        }

        self.log_likelihood(ys)
    }
}

fn weighted_choice(log_weights: &[f64], rng: &mut impl Rng) -> usize {
    let mut weights: Vec<f64> = log_weights.iter().map(|w| w.exp()).collect();
    let total: f64 = weights.iter().sum();
    if total <= 0.0 {
        return 0;
    }
    for w in weights.iter_mut() {
        *w /= total;
    }
    let mut u: f64 = rng.gen::<f64>();
    for (i, w) in weights.iter().enumerate() {
        if u < *w {
            return i;
        }
        u -= w;
    }
    weights.len() - 1
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;

    fn toy_hmm() -> NbHmm {
        let labels = StateLabel::zlh();
        let k = labels.len();
        let mut log_trans = Array2::from_elem((k, k), (0.05f64 / (k - 1) as f64).ln());
        for s in 0..k {
            log_trans[[s, s]] = 0.95f64.ln();
        }
        NbHmm {
            labels,
            zero_inflated: true,
            log_prior: vec![(1.0 / k as f64).ln(); k],
            log_trans,
            emissions: vec![
                NegBinomial::new(0.01, 10.0),
                NegBinomial::new(2.0, 5.0),
                NegBinomial::new(20.0, 5.0),
            ],
        }
    }

    #[test]
    fn posteriors_log_sum_exp_to_zero() {
        let hmm = toy_hmm();
        let ys = vec![0, 1, 2, 20, 25, 18, 0, 1];
        let gamma = hmm.posteriors(&ys);
        for t in 0..ys.len() {
            let row: Vec<f64> = (0..hmm.n_states()).map(|s| gamma[[t, s]]).collect();
            assert!(log_sum_exp(&row).abs() < 1e-6);
        }
    }

    #[test]
    fn em_step_does_not_decrease_likelihood() {
        // log-likelihood must be monotonically non-decreasing across
        // iterations, within 1e-9.
        let mut hmm = toy_hmm();
        let mut rng = StdRng::seed_from_u64(7);
        let ys = hmm.sample(500, &mut rng);
        let mut prev = hmm.log_likelihood(&ys);
        for _ in 0..25 {
            let reported = hmm.em_step(&ys);
            assert!(reported >= prev - 1e-9, "{reported} < {prev}");
            prev = reported;
        }
    }

    #[test]
    fn predict_picks_high_state_for_very_high_counts() {
        let hmm = toy_hmm();
        let ys = vec![100, 100, 100, 100];
        let predicted = hmm.predict(&ys);
        assert!(predicted.iter().all(|&s| s == 2));
    }

    #[test]
    fn sample_then_log_likelihood_is_finite() {
        let hmm = toy_hmm();
        let mut rng = StdRng::seed_from_u64(1);
        let ys = hmm.sample(100, &mut rng);
        assert!(hmm.log_likelihood(&ys).is_finite());
    }
}
