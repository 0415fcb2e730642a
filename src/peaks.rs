//! Peak Extractor: candidate bins -> gap-merged islands -> island
//! score -> BH/Bonferroni q-values -> genomic coordinates -> optional
//! clipping -> blacklist filter -> (for differential calling) direction
//! classification. Runs one chromosome per `rayon` task, the way
//! `jakevc`'s `PeakCaller::call_peaks` parallelizes over chromosomes
//! and then merges/filters bins into peaks.

use rayon::prelude::*;

use crate::config::{IslandScorer, MultipleTesting, SpanConfig};
use crate::errs::SpanResult;
use crate::external::BlacklistProvider;
use crate::fitter::FitResults;
use crate::model::state::StateLabel;
use crate::qvalue::{log_qvalues, QValueCache};
use crate::squash::Frame;
use crate::util::CancellationToken;

/// Direction of a differential-calling peak: compares the posteriors
/// of states `D`/`I` at the peak's first bin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    HighToLow,
    LowToHigh,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Peak {
    pub chrom: String,
    pub start: u64,
    pub end: u64,
    /// Natural-log q-value (q-values are computed in log-space
    /// throughout this engine).
    pub log_q_value: f64,
    /// Integer in `[0, 1000]`, proportional to `-log10(q)` and
    /// `ln(end - start)`.
    pub score: u32,
    /// Mean signal, or `ln(T1) - ln(T2)` for differential calling, when
    /// a score source was supplied; `None` otherwise.
    pub value: Option<f64>,
    pub direction: Option<Direction>,
}

/// Per-bin signal a caller can supply to compute each peak's "value".
/// Slices are aligned to the squashed frame, i.e. the same length and
/// row order as `FitResults::null_log_prob`.
pub enum Signal<'a> {
    Mean(&'a [f32]),
    LogFoldChange { treatment: &'a [f32], control: &'a [f32] },
}

/// Everything `extract_peaks` needs beyond the `FitResults` itself.
/// `differential_frame` is only consulted for `ZLHID`-labeled models,
/// to recompute the `D`/`I` posteriors the per-peak direction call
/// needs (posteriors are transient and are not part of a persisted
/// `FitResults`).
pub struct ExtractionInputs<'a> {
    pub config: &'a SpanConfig,
    pub blacklist: &'a dyn BlacklistProvider,
    pub signal: Option<Signal<'a>>,
    pub differential_frame: Option<&'a Frame>,
}

/// A single gap-merged run of candidate bins, in chromosome-local bin
/// indices `[start, end)`.
struct Island {
    start: usize,
    end: usize,
    score: f64,
}

fn candidate_bins(local_null: &[f32], ell: f64) -> Vec<bool> {
    local_null.iter().map(|&v| (v as f64) <= ell).collect()
}

/// Merges runs of set bits separated by `<= gap` unset bits.
fn merge_islands(candidates: &[bool], gap: u32) -> Vec<(usize, usize)> {
    let mut islands = Vec::new();
    let mut i = 0;
    while i < candidates.len() {
        if !candidates[i] {
            i += 1;
            continue;
        }
        let mut end = i + 1;
        loop {
            let mut probe = end;
            let mut unset_run = 0u32;
            while probe < candidates.len() && !candidates[probe] && unset_run <= gap {
                probe += 1;
                unset_run += 1;
            }
            if probe < candidates.len() && candidates[probe] && unset_run <= gap {
                end = probe + 1;
            } else {
                break;
            }
        }
        islands.push((i, end));
        i = end;
    }
    islands
}

fn median(mut values: Vec<f64>) -> f64 {
    values.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let n = values.len();
    if n == 0 {
        return 0.0;
    }
    if n % 2 == 1 {
        values[n / 2]
    } else {
        (values[n / 2 - 1] + values[n / 2]) / 2.0
    }
}

/// The canonical scorer: `median(logNull below ell) *
/// ln(length)`. The Stouffer-Liptak alternate (a swappable
/// scorer) combines the same per-bin log-probabilities instead of
/// taking their median.
fn island_score(local_null: &[f32], start: usize, end: usize, ell: f64, scorer: IslandScorer) -> f64 {
    let below: Vec<f64> =
        local_null[start..end].iter().map(|&v| v as f64).filter(|&v| v <= ell).collect();
    let length = (end - start) as f64;
    match scorer {
        IslandScorer::MedianLogLength => median(below) * length.ln(),
        IslandScorer::StoufferLiptak => {
            if below.is_empty() {
                return 0.0;
            }
            // Stouffer-Liptak combination in log-space: sum of the
            // per-bin log-probabilities, scale-normalized by sqrt(n) so
            // it remains comparable in magnitude to the median scorer.
            let sum: f64 = below.iter().sum();
            sum / (below.len() as f64).sqrt()
        }
    }
}

/// Shrinks `[start, end)` towards the bin of greatest
/// weight until the trimmed bins still hold `(1 - clip)` of the
/// island's total weight, without ever widening past the original
/// range or trimming across the peak bin.
fn clip_island(weights: &[f64], clip: f64) -> (usize, usize) {
    let len = weights.len();
    if clip <= 0.0 || len <= 1 {
        return (0, len);
    }
    let total: f64 = weights.iter().sum();
    if total <= 0.0 {
        return (0, len);
    }
    let target = (1.0 - clip) * total;
    let peak_idx = weights
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
        .map(|(i, _)| i)
        .unwrap_or(0);

    let mut lo = 0usize;
    let mut hi = len;
    let mut sum = total;
    while hi - lo > 1 {
        let can_trim_lo = lo < peak_idx;
        let can_trim_hi = hi - 1 > peak_idx;
        if !can_trim_lo && !can_trim_hi {
            break;
        }
        let trim_lo_amt = weights[lo];
        let trim_hi_amt = weights[hi - 1];
        let (trim_left, amt) = if can_trim_lo && (!can_trim_hi || trim_lo_amt <= trim_hi_amt) {
            (true, trim_lo_amt)
        } else {
            (false, trim_hi_amt)
        };
        if sum - amt < target {
            break;
        }
        sum -= amt;
        if trim_left {
            lo += 1;
        } else {
            hi -= 1;
        }
    }
    (lo, hi)
}

/// Integer score in `[0, 1000]`, proportional to
/// `-log10(q)` and `ln(end - start)`.
fn peak_score(log_q: f64, width_bp: u64) -> u32 {
    let neg_log10_q = -log_q / std::f64::consts::LN_10;
    let length_factor = (width_bp.max(2) as f64).ln();
    (neg_log10_q * length_factor).clamp(0.0, 1000.0).round() as u32
}

fn mean(values: &[f32]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().map(|&v| v as f64).sum::<f64>() / values.len() as f64
}

fn peak_value(signal: &Signal, global_start: usize, global_end: usize) -> f64 {
    match signal {
        Signal::Mean(values) => mean(&values[global_start..global_end]),
        Signal::LogFoldChange { treatment, control } => {
            let t = mean(&treatment[global_start..global_end]).max(f64::MIN_POSITIVE);
            let c = mean(&control[global_start..global_end]).max(f64::MIN_POSITIVE);
            t.ln() - c.ln()
        }
    }
}

/// One chromosome's worth of gap-merged, scored, q-value-filtered
/// islands, before coordinates/clipping/blacklist/direction are
/// applied. Kept separate from `extract_peaks_for_chrom` so the q-value
/// cache can sit between scoring and filtering: q-value results are
/// cached per (FitResults, chromosome).
fn scored_islands(
    local_null: &[f32],
    config: &SpanConfig,
) -> Vec<Island> {
    let ell = config.log_sensitivity();
    let candidates = candidate_bins(local_null, ell);
    let gap = config.effective_gap();
    merge_islands(&candidates, gap)
        .into_iter()
        .map(|(start, end)| Island {
            start,
            end,
            score: island_score(local_null, start, end, ell, config.island_scorer),
        })
        .collect()
}

fn extract_peaks_for_chrom(
    chrom: &str,
    fit: &FitResults,
    inputs: &ExtractionInputs,
    cache: &QValueCache,
    differential: Option<(&ndarray::Array2<f64>, usize, usize)>,
) -> SpanResult<Vec<Peak>> {
    let Some(range) = fit.information.row_range(chrom) else {
        return Ok(Vec::new());
    };
    let global_start = range.start as usize;
    let global_end = range.end as usize;
    let local_null = &fit.null_log_prob[global_start..global_end];
    let chrom_length = fit.information.chrom_sizes.length(chrom).unwrap_or(global_end as u64);

    let islands = scored_islands(local_null, inputs.config);
    if islands.is_empty() {
        return Ok(Vec::new());
    }

    let fit_id = fit.information.id();
    let gap = inputs.config.effective_gap();
    let raw_scores: Vec<f64> = islands.iter().map(|i| i.score).collect();
    let log_q = cache.get_or_compute(&fit_id, chrom, gap, || {
        log_qvalues(&raw_scores, inputs.config.multiple_testing)
    });

    let bin_size = inputs.config.bin_size as u64;
    let mut peaks = Vec::new();
    for (island, &q) in islands.iter().zip(log_q.iter()) {
        if q >= inputs.config.fdr.ln() {
            continue;
        }

        let local_weights: Vec<f64> =
            local_null[island.start..island.end].iter().map(|&v| -(v as f64)).collect();
        let (trim_lo, trim_hi) = clip_island(&local_weights, inputs.config.clip);
        let lo = island.start + trim_lo;
        let hi = island.start + trim_hi;

        let start = lo as u64 * bin_size;
        let end = (hi as u64 * bin_size).min(chrom_length);
        if inputs.blacklist.intersects(chrom, start, end) {
            continue;
        }

        let value = inputs
            .signal
            .as_ref()
            .map(|signal| peak_value(signal, global_start + lo, global_start + hi));

        let direction = differential.map(|(posteriors, increased_col, decreased_col)| {
            let first_row = global_start + lo;
            if posteriors[[first_row, increased_col]] >= posteriors[[first_row, decreased_col]] {
                Direction::LowToHigh
            } else {
                Direction::HighToLow
            }
        });

        peaks.push(Peak {
            chrom: chrom.to_string(),
            start,
            end,
            log_q_value: q,
            score: peak_score(q, end.saturating_sub(start)),
            value,
            direction,
        });
    }
    Ok(peaks)
}

/// Per-chromosome candidate/island/score/q-value/coordinate/clip/
/// blacklist pipeline, run in parallel, assembled back in sorted
/// chromosome-name order regardless of completion order, since
/// `chrom_sizes` is already canonically sorted and `par_iter`
/// preserves input order in its output.
pub fn extract_peaks(
    fit: &FitResults,
    inputs: ExtractionInputs,
    cache: &QValueCache,
    cancellation: &CancellationToken,
) -> SpanResult<Vec<Peak>> {
    let labels = fit.model.labels();
    let increased = labels.iter().position(|l| *l == StateLabel::Increased);
    let decreased = labels.iter().position(|l| *l == StateLabel::Decreased);
    let differential_posteriors = match (increased, decreased, inputs.differential_frame) {
        (Some(inc), Some(dec), Some(frame)) => Some((fit.model.posteriors(frame), inc, dec)),
        _ => None,
    };
    let differential = differential_posteriors.as_ref().map(|(p, i, d)| (p, *i, *d));

    let chroms: Vec<&str> = fit.information.chrom_sizes.names().collect();
    log::debug!("extracting peaks across {} chromosomes", chroms.len());
    let per_chrom: Vec<SpanResult<Vec<Peak>>> = chroms
        .par_iter()
        .map(|chrom| {
            cancellation.check()?;
            extract_peaks_for_chrom(chrom, fit, &inputs, cache, differential)
        })
        .collect();

    let mut peaks = Vec::new();
    for chunk in per_chrom {
        peaks.extend(chunk?);
    }
    log::info!("called {} peaks", peaks.len());
    Ok(peaks)
}
