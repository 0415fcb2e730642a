//! Model Family: a closed sum type over the seven fittable model
//! variants, behind one capability set (`logLikelihood`, `posteriors`,
//! `predict`, `sample`, `save`/`load`, `sanitizeStates`). Modeled as a
//! Rust enum with a `match` per operation rather than trait objects,
//! the way `dmr::llr_model`'s handful of model flavors are dispatched.

pub mod hmm;
pub mod mixture;
pub mod nb;
pub mod regression;
pub mod sanitize;
pub mod state;

use ndarray::Array2;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::errs::SpanResult;
use crate::squash::{Column, Frame};
use hmm::NbHmm;
use mixture::NbMixture;
use regression::{Covariates, RegressionFamily, RegressionMixture};
use state::StateLabel;

/// Class-discriminator key used by `to_json`/`from_json`, mirroring
/// `fit_info.rs`'s `FIT_INFORMATION_FQN` tagging convention.
pub const MODEL_FQN: &str = "model.class.fqn";

#[derive(Debug, Clone, PartialEq)]
pub enum ModelVariant {
    NbZlhHmm(NbHmm),
    NbZlmhHmm(NbHmm),
    NbZlhidHmm(NbHmm),
    NbHmmK(NbHmm),
    NbMixture(NbMixture),
    PoissonRegrMixture(RegressionMixture),
    NbRegrMixture(RegressionMixture),
}

/// Serde-friendly tagged form used only at the JSON boundary; the
/// public API works with `ModelVariant` directly.
#[derive(Serialize, Deserialize)]
#[serde(tag = "variant")]
enum Tagged {
    NbZlhHmm(NbHmm),
    NbZlmhHmm(NbHmm),
    NbZlhidHmm(NbHmm),
    NbHmmK(NbHmm),
    NbMixture(NbMixture),
    PoissonRegrMixture(RegressionMixture),
    NbRegrMixture(RegressionMixture),
}

impl From<&ModelVariant> for Tagged {
    fn from(v: &ModelVariant) -> Self {
        match v.clone() {
            ModelVariant::NbZlhHmm(m) => Tagged::NbZlhHmm(m),
            ModelVariant::NbZlmhHmm(m) => Tagged::NbZlmhHmm(m),
            ModelVariant::NbZlhidHmm(m) => Tagged::NbZlhidHmm(m),
            ModelVariant::NbHmmK(m) => Tagged::NbHmmK(m),
            ModelVariant::NbMixture(m) => Tagged::NbMixture(m),
            ModelVariant::PoissonRegrMixture(m) => Tagged::PoissonRegrMixture(m),
            ModelVariant::NbRegrMixture(m) => Tagged::NbRegrMixture(m),
        }
    }
}

impl From<Tagged> for ModelVariant {
    fn from(t: Tagged) -> Self {
        match t {
            Tagged::NbZlhHmm(m) => ModelVariant::NbZlhHmm(m),
            Tagged::NbZlmhHmm(m) => ModelVariant::NbZlmhHmm(m),
            Tagged::NbZlhidHmm(m) => ModelVariant::NbZlhidHmm(m),
            Tagged::NbHmmK(m) => ModelVariant::NbHmmK(m),
            Tagged::NbMixture(m) => ModelVariant::NbMixture(m),
            Tagged::PoissonRegrMixture(m) => ModelVariant::PoissonRegrMixture(m),
            Tagged::NbRegrMixture(m) => ModelVariant::NbRegrMixture(m),
        }
    }
}

/// Reads an integer-valued column as `u32` counts. Panics on a missing
/// or mistyped column: a model variant is always matched against the
/// frame shape it was fit against, so a mismatch here is a programming
/// error, not a recoverable input error.
pub(crate) fn coverage_column(frame: &Frame, name: &str) -> Vec<u32> {
    match frame.column(name) {
        Some(Column::Int(v)) => v.iter().map(|&x| x.max(0) as u32).collect(),
        Some(_) => panic!("column {name} is not an Int column"),
        None => panic!("frame has no column {name}"),
    }
}

fn float_column(frame: &Frame, name: &str) -> Vec<f32> {
    match frame.column(name) {
        Some(Column::Float32(v)) => v.clone(),
        Some(Column::Float64(v)) => v.iter().map(|&x| x as f32).collect(),
        Some(_) => panic!("column {name} is not a float column"),
        None => panic!("frame has no column {name}"),
    }
}

pub(crate) fn covariates_of(frame: &Frame) -> Vec<Covariates> {
    let gc = float_column(frame, "gc");
    let gc2 = float_column(frame, "gc2");
    let input = float_column(frame, "input");
    let mapability = float_column(frame, "mapability");
    (0..gc.len())
        .map(|i| Covariates { gc: gc[i], gc2: gc2[i], input: input[i], mapability: mapability[i] })
        .collect()
}

/// Synthetic covariates used only by `sample()` on a regression
/// variant, where `sample(n) -> frame` has no frame of
/// covariates to draw from; these stand in for "typical" bins.
fn synthetic_covariates(n: usize) -> Vec<Covariates> {
    vec![Covariates { gc: 0.5, gc2: 0.25, input: 1.0, mapability: 1.0 }; n]
}

impl ModelVariant {
    pub fn labels(&self) -> &[StateLabel] {
        match self {
            ModelVariant::NbZlhHmm(m)
            | ModelVariant::NbZlmhHmm(m)
            | ModelVariant::NbZlhidHmm(m)
            | ModelVariant::NbHmmK(m) => &m.labels,
            ModelVariant::NbMixture(m) => &m.labels,
            ModelVariant::PoissonRegrMixture(_) | ModelVariant::NbRegrMixture(_) => {
                // the regression mixtures use a fixed [background, signal]
                // pair, there is no `labels` vector to borrow
                &[]
            }
        }
    }

    pub fn log_likelihood(&self, frame: &Frame) -> f64 {
        let ys = coverage_column(frame, "y");
        match self {
            ModelVariant::NbZlhHmm(m)
            | ModelVariant::NbZlmhHmm(m)
            | ModelVariant::NbZlhidHmm(m)
            | ModelVariant::NbHmmK(m) => m.log_likelihood(&ys),
            ModelVariant::NbMixture(m) => m.log_likelihood(&ys),
            ModelVariant::PoissonRegrMixture(m) | ModelVariant::NbRegrMixture(m) => {
                m.log_likelihood(&ys, &covariates_of(frame))
            }
        }
    }

    pub fn posteriors(&self, frame: &Frame) -> Array2<f64> {
        let ys = coverage_column(frame, "y");
        match self {
            ModelVariant::NbZlhHmm(m)
            | ModelVariant::NbZlmhHmm(m)
            | ModelVariant::NbZlhidHmm(m)
            | ModelVariant::NbHmmK(m) => m.posteriors(&ys),
            ModelVariant::NbMixture(m) => m.posteriors(&ys),
            ModelVariant::PoissonRegrMixture(m) | ModelVariant::NbRegrMixture(m) => {
                m.posteriors(&ys, &covariates_of(frame))
            }
        }
    }

    pub fn predict(&self, frame: &Frame) -> Vec<usize> {
        let ys = coverage_column(frame, "y");
        match self {
            ModelVariant::NbZlhHmm(m)
            | ModelVariant::NbZlmhHmm(m)
            | ModelVariant::NbZlhidHmm(m)
            | ModelVariant::NbHmmK(m) => m.predict(&ys),
            ModelVariant::NbMixture(m) => m.predict(&ys),
            ModelVariant::PoissonRegrMixture(m) | ModelVariant::NbRegrMixture(m) => {
                m.predict(&ys, &covariates_of(frame))
            }
        }
    }

    pub fn sample(&self, n: usize, rng: &mut impl Rng) -> Frame {
        let ys: Vec<i64> = match self {
            ModelVariant::NbZlhHmm(m)
            | ModelVariant::NbZlmhHmm(m)
            | ModelVariant::NbZlhidHmm(m)
            | ModelVariant::NbHmmK(m) => {
                m.sample(n, rng).into_iter().map(i64::from).collect()
            }
            ModelVariant::NbMixture(m) => {
                m.sample(n, rng).into_iter().map(i64::from).collect()
            }
            ModelVariant::PoissonRegrMixture(m) | ModelVariant::NbRegrMixture(m) => m
                .sample(&synthetic_covariates(n), rng)
                .into_iter()
                .map(i64::from)
                .collect(),
        };
        Frame::new().with_column("y", Column::Int(ys))
    }

    /// One EM iteration, returning the post-update log-likelihood;
    /// delegates to the variant's own `em_step`.
    pub fn em_step(&mut self, frame: &Frame) -> f64 {
        let ys = coverage_column(frame, "y");
        match self {
            ModelVariant::NbZlhHmm(m)
            | ModelVariant::NbZlmhHmm(m)
            | ModelVariant::NbZlhidHmm(m)
            | ModelVariant::NbHmmK(m) => m.em_step(&ys),
            ModelVariant::NbMixture(m) => m.em_step(&ys),
            ModelVariant::PoissonRegrMixture(m) | ModelVariant::NbRegrMixture(m) => {
                m.em_step(&ys, &covariates_of(frame))
            }
        }
    }

    /// State-flip sanitization, a no-op for the regression
    /// variants (they have no low/high pair to mis-order).
    pub fn sanitize_states(&mut self) -> SpanResult<bool> {
        match self {
            ModelVariant::NbZlhHmm(m)
            | ModelVariant::NbZlmhHmm(m)
            | ModelVariant::NbZlhidHmm(m)
            | ModelVariant::NbHmmK(m) => sanitize::sanitize(m),
            ModelVariant::NbMixture(m) => sanitize::sanitize_mixture(m),
            ModelVariant::PoissonRegrMixture(_) | ModelVariant::NbRegrMixture(_) => Ok(false),
        }
    }

    pub fn family(&self) -> Option<RegressionFamily> {
        match self {
            ModelVariant::PoissonRegrMixture(m) | ModelVariant::NbRegrMixture(m) => {
                Some(m.family)
            }
            _ => None,
        }
    }

    /// Stable JSON with a class tag, the same shape as `fit_info.rs`'s
    /// FQN tagging.
    pub fn to_json(&self) -> serde_json::Value {
        let tagged = Tagged::from(self);
        let mut value = serde_json::to_value(&tagged).expect("ModelVariant always serializes");
        if let serde_json::Value::Object(ref mut map) = value {
            map.insert(MODEL_FQN.to_string(), json!(true));
        }
        value
    }

    pub fn from_json(mut value: serde_json::Value) -> SpanResult<Self> {
        if let serde_json::Value::Object(ref mut map) = value {
            map.remove(MODEL_FQN);
        }
        let tagged: Tagged = serde_json::from_value(value).map_err(|e| {
            crate::errs::SpanError::StoredMismatch {
                path: std::path::PathBuf::from(format!("<model.json>: {e}")),
            }
        })?;
        Ok(tagged.into())
    }
}
