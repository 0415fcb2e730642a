//! Negative-binomial emission math shared by every model variant,
//! parameterised by mean `mu` and success probability `p`
//! (equivalently, mean and failure parameter `r`, per the glossary).
//! Safe at `y = 0` and at large counts, computed in log-space with
//! `statrs`'s `ln_gamma` for the combinatorial term.

use rand::Rng;
use serde::{Deserialize, Serialize};
use statrs::function::gamma::ln_gamma;

/// `r` (number of failures) and `p` (success probability) are the
/// canonical NB parameters; `mu`/`phi` (mean/dispersion) are exposed as
/// the fitting parameterisation because EM naturally estimates a mean
/// and a dispersion.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NegBinomial {
    pub mu: f64,
    /// Dispersion `phi > 0`; variance is `mu + mu^2/phi`. As `phi ->
    /// infinity` this converges to Poisson(mu).
    pub phi: f64,
}

impl NegBinomial {
    pub fn new(mu: f64, phi: f64) -> Self {
        debug_assert!(mu >= 0.0);
        debug_assert!(phi > 0.0);
        Self { mu, phi }
    }

    /// `r` (number of failures) in the `(r, p)` parameterisation.
    fn r(&self) -> f64 {
        self.phi
    }

    /// `p` (success probability) in the `(r, p)` parameterisation.
    fn p(&self) -> f64 {
        self.phi / (self.phi + self.mu)
    }

    /// `ln P(Y = y)` under this NB, safe at `y = 0` and for large `y`.
    pub fn log_pmf(&self, y: u32) -> f64 {
        if self.mu <= 0.0 {
            return if y == 0 { 0.0 } else { f64::NEG_INFINITY };
        }
        let y = y as f64;
        let r = self.r();
        let p = self.p();
        ln_gamma(y + r) - ln_gamma(r) - ln_gamma(y + 1.0)
            + r * p.ln()
            + y * (1.0 - p).ln()
    }

    /// Weighted method-of-moments fit: `mu` is the responsibility-weighted
    /// mean, `phi` is solved from the weighted variance via
    /// `var = mu + mu^2/phi`. Falls back to a large `phi` (near-Poisson)
    /// when the data is under-dispersed, which EM recovers from on
    /// subsequent iterations.
    pub fn fit_weighted(ys: &[u32], weights: &[f64]) -> Self {
        debug_assert_eq!(ys.len(), weights.len());
        let total_w: f64 = weights.iter().sum();
        if total_w <= 0.0 {
            return NegBinomial::new(0.0, 1.0);
        }
        let mu = ys
            .iter()
            .zip(weights.iter())
            .map(|(&y, &w)| w * y as f64)
            .sum::<f64>()
            / total_w;
        let var = ys
            .iter()
            .zip(weights.iter())
            .map(|(&y, &w)| w * (y as f64 - mu).powi(2))
            .sum::<f64>()
            / total_w;
        let excess = var - mu;
        let phi = if excess > 1e-6 && mu > 0.0 {
            mu * mu / excess
        } else {
            1e6
        };
        NegBinomial::new(mu.max(0.0), phi.max(1e-6))
    }

    /// Draws one count via the gamma-Poisson mixture representation of
    /// the negative binomial (`Y | lambda ~ Poisson(lambda)`,
    /// `lambda ~ Gamma(phi, mu/phi)`), shared by every model variant's
    /// `sample()`.
    pub fn sample(&self, rng: &mut impl Rng) -> u32 {
        if self.mu <= 0.0 {
            return 0;
        }
        let scale = self.mu / self.phi;
        let lambda = sample_gamma(self.phi, scale, rng);
        sample_poisson(lambda, rng)
    }
}

/// Marsaglia-Tsang gamma sampler, valid for `shape >= 1`; boosts smaller
/// shapes by one and corrects with a uniform power, the standard
/// transform for `shape < 1`.
pub(crate) fn sample_gamma(shape: f64, scale: f64, rng: &mut impl Rng) -> f64 {
    if shape <= 0.0 || scale <= 0.0 {
        return 0.0;
    }
    if shape < 1.0 {
        let u: f64 = rng.gen::<f64>();
        return sample_gamma(shape + 1.0, scale, rng) * u.powf(1.0 / shape);
    }
    let d = shape - 1.0 / 3.0;
    let c = 1.0 / (9.0 * d).sqrt();
    loop {
        let x = sample_standard_normal(rng);
        let v = (1.0 + c * x).powi(3);
        if v <= 0.0 {
            continue;
        }
        let u: f64 = rng.gen::<f64>();
        if u.ln() < 0.5 * x * x + d - d * v + d * v.ln() {
            return d * v * scale;
        }
    }
}

fn sample_standard_normal(rng: &mut impl Rng) -> f64 {
    let u1: f64 = rng.gen::<f64>().max(1e-12);
    let u2: f64 = rng.gen::<f64>();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}

/// Knuth's algorithm; fine for the moderate `lambda`s this model fits.
pub(crate) fn sample_poisson(lambda: f64, rng: &mut impl Rng) -> u32 {
    if lambda <= 0.0 {
        return 0;
    }
    let l = (-lambda).exp();
    let mut k = 0u32;
    let mut p = 1.0;
    loop {
        k += 1;
        p *= rng.gen::<f64>();
        if p <= l {
            return k - 1;
        }
    }
}

/// A degenerate "always zero" emission, used for the zero-inflated
/// HMM's reserved state with a point mass at 0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ZeroSpike;

impl ZeroSpike {
    pub fn log_pmf(&self, y: u32) -> f64 {
        if y == 0 {
            0.0
        } else {
            f64::NEG_INFINITY
        }
    }
}
