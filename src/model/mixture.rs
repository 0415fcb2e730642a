//! `NB_MIXTURE`: a plain mixture of negative binomials, no
//! transition structure (bins are treated exchangeably rather than as a
//! Markov chain).

use ndarray::Array2;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::model::nb::NegBinomial;
use crate::model::state::StateLabel;
use crate::util::{log_normalize, log_sum_exp};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NbMixture {
    pub labels: Vec<StateLabel>,
    /// Length-`k`, log-space mixture weights, log-sums to 0.
    pub log_weights: Vec<f64>,
    pub components: Vec<NegBinomial>,
}

impl NbMixture {
    pub fn n_components(&self) -> usize {
        self.components.len()
    }

    fn log_joint(&self, y: u32) -> Vec<f64> {
        (0..self.n_components())
            .map(|s| self.log_weights[s] + self.components[s].log_pmf(y))
            .collect()
    }

    pub fn log_likelihood(&self, ys: &[u32]) -> f64 {
        ys.iter().map(|&y| log_sum_exp(&self.log_joint(y))).sum()
    }

    pub fn posteriors(&self, ys: &[u32]) -> Array2<f64> {
        let k = self.n_components();
        let mut out = Array2::zeros((ys.len(), k));
        for (t, &y) in ys.iter().enumerate() {
            let mut row = self.log_joint(y);
            log_normalize(&mut row);
            for s in 0..k {
                out[[t, s]] = row[s];
            }
        }
        out
    }

    pub fn predict(&self, ys: &[u32]) -> Vec<usize> {
        ys.iter()
            .map(|&y| {
                let row = self.log_joint(y);
                (0..self.n_components())
                    .max_by(|&a, &b| row[a].partial_cmp(&row[b]).unwrap())
                    .unwrap()
            })
            .collect()
    }

    pub fn sample(&self, n: usize, rng: &mut impl Rng) -> Vec<u32> {
        let weights: Vec<f64> = self.log_weights.iter().map(|w| w.exp()).collect();
        (0..n)
            .map(|_| {
                let comp = weighted_index(&weights, rng);
                self.components[comp].sample(rng)
            })
            .collect()
    }

    /// One EM iteration: responsibility-weighted NB refit per component
    /// plus a weight update, returning the post-update log-likelihood.
    pub fn em_step(&mut self, ys: &[u32]) -> f64 {
        let k = self.n_components();
        let gamma = self.posteriors(ys);
        let n = ys.len() as f64;

        for s in 0..k {
            let weights: Vec<f64> = (0..ys.len()).map(|t| gamma[[t, s]].exp()).collect();
            self.components[s] = NegBinomial::fit_weighted(ys, &weights);
            let total_weight: f64 = weights.iter().sum();
            self.log_weights[s] = (total_weight / n).max(1e-300).ln();
        }
        log_normalize(&mut self.log_weights);

        self.log_likelihood(ys)
    }
}

fn weighted_index(weights: &[f64], rng: &mut impl Rng) -> usize {
    let total: f64 = weights.iter().sum();
    if total <= 0.0 {
        return 0;
    }
    let mut u = rng.gen::<f64>() * total;
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

    fn toy_mixture() -> NbMixture {
        NbMixture {
            labels: vec![StateLabel::Low, StateLabel::High],
            log_weights: vec![0.7f64.ln(), 0.3f64.ln()],
            components: vec![NegBinomial::new(2.0, 5.0), NegBinomial::new(20.0, 5.0)],
        }
    }

    #[test]
    fn posteriors_log_sum_exp_to_zero() {
        let mix = toy_mixture();
        let ys = vec![0, 2, 5, 20, 25];
        let gamma = mix.posteriors(&ys);
        for t in 0..ys.len() {
            let row: Vec<f64> = (0..mix.n_components()).map(|s| gamma[[t, s]]).collect();
            assert!(log_sum_exp(&row).abs() < 1e-6);
        }
    }

    #[test]
    fn em_step_is_monotonic() {
        let mut mix = toy_mixture();
        let mut rng = StdRng::seed_from_u64(3);
        let ys = mix.sample(400, &mut rng);
        let mut prev = mix.log_likelihood(&ys);
        for _ in 0..15 {
            let reported = mix.em_step(&ys);
            assert!(reported >= prev - 1e-9);
            prev = reported;
        }
    }
}
