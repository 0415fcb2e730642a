//! Explicit, enumerated configuration record for the engine's knobs.
//! Kept as one typed struct, not an untyped map, so every option is a
//! named, typed field at the interface boundary.

use serde::{Deserialize, Serialize};

/// How the 5' end of each aligned read is extended before binning.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum FragmentPolicy {
    /// Infer the fragment length from the data (e.g. cross-correlation).
    Auto,
    /// Extend every read to exactly this many bases.
    Fixed(u32),
    /// Do not extend reads at all.
    Zero,
}

impl Default for FragmentPolicy {
    fn default() -> Self {
        FragmentPolicy::Auto
    }
}

/// Multiple-testing correction applied to island scores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MultipleTesting {
    BenjaminiHochberg,
    Bonferroni,
}

impl Default for MultipleTesting {
    fn default() -> Self {
        MultipleTesting::BenjaminiHochberg
    }
}

/// Optional alternate island scorer (Design Notes open question: the
/// Stouffer-Liptak branch is kept as a swappable, non-default option).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IslandScorer {
    /// `median(logNull) * ln(length)`, the spec's canonical scorer.
    MedianLogLength,
    /// Stouffer-Liptak combination of per-bin p-values.
    StoufferLiptak,
}

impl Default for IslandScorer {
    fn default() -> Self {
        IslandScorer::MedianLogLength
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpanConfig {
    /// Bin width in base pairs.
    pub bin_size: u32,
    /// Fragment extension policy.
    pub fragment: FragmentPolicy,
    /// Drop duplicate-start reads before binning.
    pub unique: bool,
    /// q-value cutoff for peak calling.
    pub fdr: f64,
    /// Max number of unset bins merged across when building islands.
    /// `None` selects the implementation-defined "auto" value.
    pub gap: Option<u32>,
    /// Log-null threshold for candidate bins. `None` selects `ln(fdr)`.
    pub sensitivity: Option<f64>,
    /// Boundary-trim fraction in `[0, 1)`; `0.0` disables clipping.
    pub clip: f64,
    pub multiple_testing: MultipleTesting,
    pub island_scorer: IslandScorer,
    /// EM convergence relative tolerance.
    pub threshold: f64,
    /// EM iteration cap.
    pub max_iterations: u32,
    /// Number of multi-start restarts (`0` disables multi-start).
    pub multistarts: u32,
    /// Iterations spent training each multi-start restart.
    pub multistart_iterations: u32,
    /// Grid step `Δ` for the control-subtraction β search.
    pub beta_grid_step: f64,
}

impl Default for SpanConfig {
    fn default() -> Self {
        Self {
            bin_size: 200,
            fragment: FragmentPolicy::Auto,
            unique: true,
            fdr: 1e-6,
            gap: None,
            sensitivity: None,
            clip: 0.0,
            multiple_testing: MultipleTesting::BenjaminiHochberg,
            island_scorer: IslandScorer::MedianLogLength,
            threshold: 1e-4,
            max_iterations: 200,
            multistarts: 0,
            multistart_iterations: 5,
            beta_grid_step: 0.01,
        }
    }
}

impl SpanConfig {
    /// `ln(sensitivity)` if set, else `ln(fdr)`.
    pub fn log_sensitivity(&self) -> f64 {
        self.sensitivity.unwrap_or(self.fdr).ln()
    }

    /// The effective gap, falling back to a bin-size-scaled default when
    /// the user leaves it on "auto".
    pub fn effective_gap(&self) -> u32 {
        self.gap.unwrap_or(1)
    }
}
