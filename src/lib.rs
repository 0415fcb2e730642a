//! Chromosome-squashed probabilistic peak-calling engine: binned
//! coverage, control normalization, an EM-fit negative-binomial model
//! family, a content-addressed result cache, and the BH/Bonferroni
//! peak extractor built on top of it.

pub mod cache;
pub mod config;
pub mod coverage;
pub mod errs;
pub mod external;
pub mod fit_info;
pub mod fitter;
pub mod genome;
pub mod logging;
pub mod model;
pub mod monoid;
pub mod normalize;
pub mod npy;
pub mod peaks;
pub mod qvalue;
pub mod squash;
pub mod util;

pub use config::SpanConfig;
pub use errs::{SpanError, SpanResult};
