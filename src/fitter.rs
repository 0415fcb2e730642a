//! Fitter: multi-start EM with a threshold/max-iteration stop,
//! cluster-based initialization, and the state-flip sanitization pass
//! that follows every successful fit.

use ndarray::Array2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::SpanConfig;
use crate::errs::{SpanError, SpanResult};
use crate::fit_info::FitInformation;
use crate::model::hmm::NbHmm;
use crate::model::mixture::NbMixture;
use crate::model::nb::NegBinomial;
use crate::model::regression::{Covariates, RegressionFamily, RegressionMixture};
use crate::model::state::{default_null_states, StateLabel};
use crate::model::{covariates_of, coverage_column, ModelVariant};
use crate::monoid::Monoid;
use crate::squash::Frame;
use crate::util::{log_sum_exp, CancellationToken};

/// The running "keep the best log-likelihood" accumulator across
/// multi-start restarts, as a `Monoid`: `zero()` is "no
/// restart has reported yet", `combine` keeps whichever of two
/// candidates has the higher log-likelihood. Folding restarts through
/// this is the same "combine partial results without bespoke glue at
/// the call site" the teacher's `AggregatedCounts` does for per-region
/// evidence.
struct BestFit(Option<(f64, ModelVariant)>);

impl Monoid for BestFit {
    fn zero() -> Self {
        BestFit(None)
    }

    fn combine(self, other: Self) -> Self {
        match (self.0, other.0) {
            (None, b) => BestFit(b),
            (a, None) => BestFit(a),
            (Some(a), Some(b)) => BestFit(Some(if a.0 >= b.0 { a } else { b })),
        }
    }
}

/// Which of the seven model variants to fit, with just enough shape
/// (state count) to build the initial guess; everything else about
/// the variant is learned.
#[derive(Debug, Clone, Copy)]
pub enum ModelKind {
    NbZlhHmm,
    NbZlmhHmm,
    NbZlhidHmm,
    NbHmmK(usize),
    NbMixture(usize),
    PoissonRegrMixture,
    NbRegrMixture,
}

impl ModelKind {
    fn labels(&self) -> Vec<StateLabel> {
        match self {
            ModelKind::NbZlhHmm => StateLabel::zlh(),
            ModelKind::NbZlmhHmm => StateLabel::zlmh(),
            ModelKind::NbZlhidHmm => StateLabel::zlhid(),
            ModelKind::NbHmmK(k) => StateLabel::plain_k(*k),
            ModelKind::NbMixture(k) => StateLabel::plain_k(*k),
            ModelKind::PoissonRegrMixture | ModelKind::NbRegrMixture => vec![],
        }
    }

    fn zero_inflated(&self) -> bool {
        matches!(
            self,
            ModelKind::NbZlhHmm | ModelKind::NbZlmhHmm | ModelKind::NbZlhidHmm
        )
    }
}

/// An immutable, freely-shareable fit outcome: the information that
/// produced it, the fitted model, and the
/// per-bin null log-probability the peak extractor scores against.
#[derive(Debug, Clone)]
pub struct FitResults {
    pub information: FitInformation,
    pub model: ModelVariant,
    pub null_log_prob: Vec<f32>,
}

pub struct Fitter;

impl Fitter {
    /// Runs the full fitting algorithm: optional multi-start search,
    /// continuation EM to convergence, then state-flip sanitization.
    pub fn fit(
        kind: ModelKind,
        information: FitInformation,
        frame: &Frame,
        config: &SpanConfig,
        cancellation: &CancellationToken,
        seed: u64,
    ) -> SpanResult<FitResults> {
        let ys = coverage_column(frame, "y");
        if ys.is_empty() {
            return Err(SpanError::EmptyData);
        }
        cancellation.check()?;

        let restarts = config.multistarts;
        let mut best = BestFit::zero();

        if restarts > 0 {
            for r in 0..restarts {
                cancellation.check()?;
                let mut rng = StdRng::seed_from_u64(seed.wrapping_add(r as u64));
                let mut variant = Self::initialize(kind, &ys, frame, &mut rng);
                let ll = Self::run_em(
                    &mut variant,
                    frame,
                    config.multistart_iterations,
                    config.threshold,
                    cancellation,
                )?;
                best = best.combine(BestFit(Some((ll, variant))));
            }
        } else {
            let mut rng = StdRng::seed_from_u64(seed);
            let variant = Self::initialize(kind, &ys, frame, &mut rng);
            best = BestFit(Some((f64::NEG_INFINITY, variant)));
        }

        let (_, mut model) = best
            .0
            .expect("at least one initialization always runs (restarts or the plain path)");

        Self::run_em(&mut model, frame, config.max_iterations, config.threshold, cancellation)?;

        let flipped = model.sanitize_states()?;
        if flipped {
            log::info!("state-flip sanitizer corrected a low/high swap after fitting");
        }
        if let Some(detail) = low_signal_to_noise_detail(&model) {
            log::warn!("{}", SpanError::LowSignalToNoise { detail });
        }

        let null_log_prob = null_log_probabilities(&model, frame);
        Ok(FitResults { information, model, null_log_prob })
    }

    fn initialize(kind: ModelKind, ys: &[u32], frame: &Frame, rng: &mut StdRng) -> ModelVariant {
        match kind {
            ModelKind::NbZlhHmm
            | ModelKind::NbZlmhHmm
            | ModelKind::NbZlhidHmm
            | ModelKind::NbHmmK(_) => {
                let hmm = init_hmm(ys, kind.labels(), kind.zero_inflated(), rng);
                match kind {
                    ModelKind::NbZlhHmm => ModelVariant::NbZlhHmm(hmm),
                    ModelKind::NbZlmhHmm => ModelVariant::NbZlmhHmm(hmm),
                    ModelKind::NbZlhidHmm => ModelVariant::NbZlhidHmm(hmm),
                    _ => ModelVariant::NbHmmK(hmm),
                }
            }
            ModelKind::NbMixture(k) => {
                ModelVariant::NbMixture(init_mixture(ys, StateLabel::plain_k(k), rng))
            }
            ModelKind::PoissonRegrMixture => {
                let xs = covariates_of(frame);
                ModelVariant::PoissonRegrMixture(init_regression(
                    ys,
                    &xs,
                    RegressionFamily::Poisson,
                    rng,
                ))
            }
            ModelKind::NbRegrMixture => {
                let xs = covariates_of(frame);
                ModelVariant::NbRegrMixture(init_regression(
                    ys,
                    &xs,
                    RegressionFamily::NegativeBinomial,
                    rng,
                ))
            }
        }
    }

    /// Runs EM until `|LL^t - LL^{t-1}| / max(1, |LL^{t-1}|) < threshold`
    /// or `max_iterations` is reached, polling `cancellation` every
    /// iteration. Returns the final log-likelihood.
    fn run_em(
        model: &mut ModelVariant,
        frame: &Frame,
        max_iterations: u32,
        threshold: f64,
        cancellation: &CancellationToken,
    ) -> SpanResult<f64> {
        let mut prev = model.log_likelihood(frame);
        if prev.is_nan() {
            return Err(SpanError::IrrecoverableFit {
                reason: "initial log-likelihood is NaN".to_string(),
            });
        }
        for _ in 0..max_iterations {
            cancellation.check()?;
            let ll = model.em_step(frame);
            if ll.is_nan() {
                return Err(SpanError::IrrecoverableFit {
                    reason: "log-likelihood became NaN during fitting".to_string(),
                });
            }
            let relative_change = (ll - prev).abs() / prev.abs().max(1.0);
            prev = ll;
            if relative_change < threshold {
                break;
            }
        }
        Ok(prev)
    }
}

/// Sorts `ys` into `k` quantile buckets and fits a method-of-moments NB
/// per bucket, the "cluster bin counts into k quantile buckets; seed
/// means from bucket centroids and variances from bucket dispersion"
/// heuristic.
fn quantile_bucket_emissions(ys: &[u32], k: usize) -> Vec<NegBinomial> {
    let mut sorted = ys.to_vec();
    sorted.sort_unstable();
    let n = sorted.len();
    (0..k)
        .map(|b| {
            if n == 0 {
                return NegBinomial::new(0.0, 1.0);
            }
            let start = b * n / k;
            let end = ((b + 1) * n / k).max(start + 1).min(n);
            let bucket = &sorted[start..end];
            let weights = vec![1.0; bucket.len()];
            NegBinomial::fit_weighted(bucket, &weights)
        })
        .collect()
}

/// Jitters a seed emission by +/-25% on both `mu` and `phi` so that
/// independent multi-start restarts actually explore different basins.
fn jitter(nb: NegBinomial, rng: &mut impl Rng) -> NegBinomial {
    let factor_mu = 0.75 + 0.5 * rng.gen::<f64>();
    let factor_phi = 0.75 + 0.5 * rng.gen::<f64>();
    NegBinomial::new((nb.mu * factor_mu).max(0.0), (nb.phi * factor_phi).max(1e-6))
}

fn init_hmm(
    ys: &[u32],
    labels: Vec<StateLabel>,
    zero_inflated: bool,
    rng: &mut impl Rng,
) -> NbHmm {
    let k = labels.len();
    let mut emissions = quantile_bucket_emissions(ys, k);
    for (s, e) in emissions.iter_mut().enumerate() {
        if zero_inflated && s == 0 {
            *e = NegBinomial::new(0.0, 1.0);
        } else {
            *e = jitter(*e, rng);
        }
    }

    // Self-transitions seeded high (~0.95) to favour segmentation.
    let off_diag = if k > 1 { (0.05 / (k - 1) as f64).ln() } else { 0.0 };
    let mut log_trans = Array2::from_elem((k, k), off_diag);
    for s in 0..k {
        log_trans[[s, s]] = 0.95f64.ln();
    }

    let mut log_prior = vec![(1.0 / k as f64).ln(); k];
    if zero_inflated && k > 1 {
        log_prior[0] = 0.5f64.ln();
        let remaining = (0.5 / (k - 1) as f64).ln();
        for p in log_prior.iter_mut().skip(1) {
            *p = remaining;
        }
    }

    NbHmm { labels, zero_inflated, log_prior, log_trans, emissions }
}

fn init_mixture(ys: &[u32], labels: Vec<StateLabel>, rng: &mut impl Rng) -> NbMixture {
    let k = labels.len();
    let components: Vec<NegBinomial> = quantile_bucket_emissions(ys, k)
        .into_iter()
        .map(|e| jitter(e, rng))
        .collect();
    let log_weights = vec![(1.0 / k as f64).ln(); k];
    NbMixture { labels, log_weights, components }
}

fn init_regression(
    ys: &[u32],
    xs: &[Covariates],
    family: RegressionFamily,
    rng: &mut impl Rng,
) -> RegressionMixture {
    let total = ys.len().max(1) as f64;
    let zero_count = ys.iter().filter(|&&y| y == 0).count() as f64;
    let mean_nonzero = {
        let nonzero: Vec<f64> =
            ys.iter().filter(|&&y| y > 0).map(|&y| y as f64).collect();
        if nonzero.is_empty() {
            1.0
        } else {
            nonzero.iter().sum::<f64>() / nonzero.len() as f64
        }
    };
    let _ = xs;
    let jitter_factor = 0.75 + 0.5 * rng.gen::<f64>();
    let intercept = (mean_nonzero * jitter_factor).max(1e-3).ln();
    RegressionMixture {
        family,
        log_zero_weight: (zero_count / total).max(1e-3).ln(),
        log_signal_weight: (1.0 - zero_count / total).max(1e-3).ln(),
        coefficients: [intercept, 0.0, 0.0, 0.0, 0.0],
        dispersion: 5.0,
    }
}

/// A crude post-fit degeneracy check: if every emission mean landed
/// within the same tiny band, the fit likely failed to separate
/// signal from background.
fn low_signal_to_noise_detail(model: &ModelVariant) -> Option<String> {
    let mus: Vec<f64> = match model {
        ModelVariant::NbZlhHmm(m)
        | ModelVariant::NbZlmhHmm(m)
        | ModelVariant::NbZlhidHmm(m)
        | ModelVariant::NbHmmK(m) => m.emissions.iter().map(|e| e.mu).collect(),
        ModelVariant::NbMixture(m) => m.components.iter().map(|e| e.mu).collect(),
        ModelVariant::PoissonRegrMixture(_) | ModelVariant::NbRegrMixture(_) => return None,
    };
    let max = mus.iter().copied().fold(f64::MIN, f64::max);
    let min = mus.iter().copied().fold(f64::MAX, f64::min);
    if (max - min) < 1e-3 {
        Some(format!("all fitted emission means are within {:.1e} of each other", max - min))
    } else {
        None
    }
}

/// Per-bin log-probability under the null/background states (peak
/// calling scores candidate bins against this). For labeled variants this is
/// the log-sum-exp of the posterior over every non-enriched state; for
/// the regression variants (no `labels`) the background component is
/// always index 0.
fn null_log_probabilities(model: &ModelVariant, frame: &Frame) -> Vec<f32> {
    let labels = model.labels();
    let posteriors = model.posteriors(frame);
    let rows = posteriors.nrows();
    if labels.is_empty() {
        (0..rows).map(|t| posteriors[[t, 0]] as f32).collect()
    } else {
        let null_states = default_null_states(labels);
        (0..rows)
            .map(|t| {
                let vals: Vec<f64> = null_states.iter().map(|&s| posteriors[[t, s]]).collect();
                log_sum_exp(&vals) as f32
            })
            .collect()
    }
}
