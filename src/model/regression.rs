//! `POISSON_REGR_MIXTURE` / `NB_REGR_MIXTURE`: a two-component
//! mixture of a zero-point-mass component and a GLM-regression
//! component over `{1, GC, GC^2, input, mapability}`, fit by weighted
//! least squares on the working response (the usual IRLS update for a
//! log-link count GLM), in the spirit of the local-regression weighted
//! normal-equations solve in `heathsc-lbtools`' GC-normalization
//! smoother.

use ndarray::Array2;
use rand::Rng;
use serde::{Deserialize, Serialize};
use statrs::function::gamma::ln_gamma;

use crate::util::{log_normalize, log_sum_exp};

/// One row of covariates: intercept is implicit, the rest match the
/// Score Frame's covariate columns.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Covariates {
    pub gc: f32,
    pub gc2: f32,
    pub input: f32,
    pub mapability: f32,
}

impl Covariates {
    fn design_row(&self) -> [f64; 5] {
        [1.0, self.gc as f64, self.gc2 as f64, self.input as f64, self.mapability as f64]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegressionFamily {
    Poisson,
    NegativeBinomial,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionMixture {
    pub family: RegressionFamily,
    /// Log mixing weight of the zero (background) component.
    pub log_zero_weight: f64,
    /// Log mixing weight of the signal (regression) component.
    pub log_signal_weight: f64,
    /// GLM coefficients over `{1, GC, GC^2, input, mapability}`.
    pub coefficients: [f64; 5],
    /// Dispersion, only meaningful when `family == NegativeBinomial`.
    pub dispersion: f64,
}

impl RegressionMixture {
    fn linear_predictor(&self, x: &Covariates) -> f64 {
        let row = x.design_row();
        row.iter().zip(self.coefficients.iter()).map(|(a, b)| a * b).sum()
    }

    fn mean(&self, x: &Covariates) -> f64 {
        self.linear_predictor(x).exp()
    }

    fn log_pmf_signal(&self, y: u32, mu: f64) -> f64 {
        match self.family {
            RegressionFamily::Poisson => {
                let y = y as f64;
                y * mu.ln() - mu - ln_gamma(y + 1.0)
            }
            RegressionFamily::NegativeBinomial => {
                let phi = self.dispersion.max(1e-6);
                let p = phi / (phi + mu);
                let y = y as f64;
                ln_gamma(y + phi) - ln_gamma(phi) - ln_gamma(y + 1.0)
                    + phi * p.ln()
                    + y * (1.0 - p).ln()
            }
        }
    }

    fn log_pmf_zero(&self, y: u32) -> f64 {
        if y == 0 {
            0.0
        } else {
            f64::NEG_INFINITY
        }
    }

    fn log_joint(&self, y: u32, x: &Covariates) -> [f64; 2] {
        let mu = self.mean(x);
        [
            self.log_zero_weight + self.log_pmf_zero(y),
            self.log_signal_weight + self.log_pmf_signal(y, mu),
        ]
    }

    pub fn log_likelihood(&self, ys: &[u32], xs: &[Covariates]) -> f64 {
        ys.iter()
            .zip(xs.iter())
            .map(|(&y, x)| log_sum_exp(&self.log_joint(y, x)))
            .sum()
    }

    /// Posteriors over `[zero, signal]`, log-space, rows log-sum to 0.
    pub fn posteriors(&self, ys: &[u32], xs: &[Covariates]) -> Array2<f64> {
        let mut out = Array2::zeros((ys.len(), 2));
        for (t, (&y, x)) in ys.iter().zip(xs.iter()).enumerate() {
            let mut row = self.log_joint(y, x);
            log_normalize(&mut row);
            out[[t, 0]] = row[0];
            out[[t, 1]] = row[1];
        }
        out
    }

    pub fn predict(&self, ys: &[u32], xs: &[Covariates]) -> Vec<usize> {
        let gamma = self.posteriors(ys, xs);
        (0..ys.len())
            .map(|t| if gamma[[t, 0]] >= gamma[[t, 1]] { 0 } else { 1 })
            .collect()
    }

    pub fn sample(
        &self,
        xs: &[Covariates],
        rng: &mut impl Rng,
    ) -> Vec<u32> {
        let zero_weight = self.log_zero_weight.exp();
        xs.iter()
            .map(|x| {
                if rng.gen::<f64>() < zero_weight {
                    0
                } else {
                    let mu = self.mean(x);
                    match self.family {
                        RegressionFamily::Poisson => {
                            crate::model::nb::sample_poisson(mu, rng)
                        }
                        RegressionFamily::NegativeBinomial => {
                            let phi = self.dispersion.max(1e-6);
                            let lambda =
                                crate::model::nb::sample_gamma(phi, mu / phi, rng);
                            crate::model::nb::sample_poisson(lambda, rng)
                        }
                    }
                }
            })
            .collect()
    }

    /// GLM capability (Design Notes: "the regression-mixture variants
    /// additionally require a GLM capability (fit weights given
    /// responsibilities)"). Re-weighted least squares on the log-link
    /// working response, one Newton step per EM iteration (matching how
    /// the teacher's own GC-smoother accumulates a weighted normal
    /// equation and solves it directly rather than iterating to
    /// convergence inside the M-step).
    fn fit_glm(&mut self, ys: &[u32], xs: &[Covariates], resp: &[f64]) {
        let p = 5;
        let mut xtwx = vec![0.0f64; p * p];
        let mut xtwz = vec![0.0f64; p];
        for ((y, x), &w) in ys.iter().zip(xs.iter()).zip(resp.iter()) {
            if w <= 0.0 {
                continue;
            }
            let row = x.design_row();
            let eta = self.linear_predictor(x);
            let mu = eta.exp().max(1e-8);
            // IRLS weight and working response for a log-link Poisson GLM.
            let irls_w = w * mu;
            let working_z = eta + (*y as f64 - mu) / mu;
            for i in 0..p {
                xtwz[i] += irls_w * row[i] * working_z;
                for j in 0..p {
                    xtwx[i * p + j] += irls_w * row[i] * row[j];
                }
            }
        }
        if let Some(beta) = solve_normal_equations(&xtwx, &xtwz, p) {
            self.coefficients.copy_from_slice(&beta);
        }
    }

    /// One EM iteration: responsibilities, GLM coefficient update, and a
    /// weighted method-of-moments dispersion refresh when the family is
    /// negative-binomial. Returns the post-update log-likelihood.
    pub fn em_step(&mut self, ys: &[u32], xs: &[Covariates]) -> f64 {
        let gamma = self.posteriors(ys, xs);
        let n = ys.len() as f64;
        let zero_resp: Vec<f64> = (0..ys.len()).map(|t| gamma[[t, 0]].exp()).collect();
        let signal_resp: Vec<f64> = (0..ys.len()).map(|t| gamma[[t, 1]].exp()).collect();

        self.log_zero_weight = (zero_resp.iter().sum::<f64>() / n).max(1e-300).ln();
        self.log_signal_weight = (signal_resp.iter().sum::<f64>() / n).max(1e-300).ln();
        let mut weights = [self.log_zero_weight, self.log_signal_weight];
        log_normalize(&mut weights);
        self.log_zero_weight = weights[0];
        self.log_signal_weight = weights[1];

        self.fit_glm(ys, xs, &signal_resp);

        if matches!(self.family, RegressionFamily::NegativeBinomial) {
            let total_w: f64 = signal_resp.iter().sum();
            if total_w > 0.0 {
                let residual_var: f64 = ys
                    .iter()
                    .zip(xs.iter())
                    .zip(signal_resp.iter())
                    .map(|((&y, x), &w)| {
                        let mu = self.mean(x);
                        w * (y as f64 - mu).powi(2)
                    })
                    .sum::<f64>()
                    / total_w;
                let mean_mu: f64 = ys
                    .iter()
                    .zip(xs.iter())
                    .zip(signal_resp.iter())
                    .map(|((_, x), &w)| w * self.mean(x))
                    .sum::<f64>()
                    / total_w;
                let excess = residual_var - mean_mu;
                self.dispersion = if excess > 1e-6 && mean_mu > 0.0 {
                    mean_mu * mean_mu / excess
                } else {
                    1e6
                };
            }
        }

        self.log_likelihood(ys, xs)
    }
}

/// Solves the `p x p` symmetric normal equations `xtwx * beta = xtwz` via
/// Gauss-Jordan elimination with partial pivoting. Returns `None` if the
/// system is (numerically) singular, in which case the caller keeps its
/// previous coefficients for this iteration.
fn solve_normal_equations(xtwx: &[f64], xtwz: &[f64], p: usize) -> Option<Vec<f64>> {
    let mut a = xtwx.to_vec();
    let mut b = xtwz.to_vec();
    for col in 0..p {
        let mut pivot_row = col;
        let mut pivot_val = a[col * p + col].abs();
        for row in (col + 1)..p {
            let v = a[row * p + col].abs();
            if v > pivot_val {
                pivot_val = v;
                pivot_row = row;
            }
        }
        if pivot_val < 1e-12 {
            return None;
        }
        if pivot_row != col {
            for k in 0..p {
                a.swap(col * p + k, pivot_row * p + k);
            }
            b.swap(col, pivot_row);
        }
        let pivot = a[col * p + col];
        for k in 0..p {
            a[col * p + k] /= pivot;
        }
        b[col] /= pivot;
        for row in 0..p {
            if row == col {
                continue;
            }
            let factor = a[row * p + col];
            if factor == 0.0 {
                continue;
            }
            for k in 0..p {
                a[row * p + k] -= factor * a[col * p + k];
            }
            b[row] -= factor * b[col];
        }
    }
    Some(b)
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;

    fn toy_covariates(n: usize) -> Vec<Covariates> {
        (0..n)
            .map(|i| Covariates {
                gc: 0.4 + 0.001 * i as f32,
                gc2: (0.4 + 0.001 * i as f32).powi(2),
                input: 1.0,
                mapability: 1.0,
            })
            .collect()
    }

    fn toy_model() -> RegressionMixture {
        RegressionMixture {
            family: RegressionFamily::Poisson,
            log_zero_weight: 0.3f64.ln(),
            log_signal_weight: 0.7f64.ln(),
            coefficients: [1.0, 0.5, 0.0, 0.0, 0.0],
            dispersion: 5.0,
        }
    }

    #[test]
    fn posteriors_log_sum_exp_to_zero() {
        let model = toy_model();
        let xs = toy_covariates(5);
        let ys = vec![0, 3, 5, 0, 8];
        let gamma = model.posteriors(&ys, &xs);
        for t in 0..ys.len() {
            let row = [gamma[[t, 0]], gamma[[t, 1]]];
            assert!(log_sum_exp(&row).abs() < 1e-6);
        }
    }

    #[test]
    fn em_step_is_monotonic() {
        let mut model = toy_model();
        let xs = toy_covariates(300);
        let mut rng = StdRng::seed_from_u64(11);
        let ys = model.sample(&xs, &mut rng);
        let mut prev = model.log_likelihood(&ys, &xs);
        for _ in 0..15 {
            let reported = model.em_step(&ys, &xs);
            assert!(reported >= prev - 1e-6, "{reported} < {prev}");
            prev = reported;
        }
    }
}
