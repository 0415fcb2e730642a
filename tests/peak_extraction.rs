//! End-to-end coverage of the peak extractor's pipeline that
//! doesn't fit naturally as a unit test inside `peaks.rs`: determinism,
//! BH-monotonicity across the full peak set, the differential
//! direction call, and a round trip through the result cache.

use std::path::PathBuf;

use ndarray::Array2;

use span_core::cache::ResultCache;
use span_core::config::{FragmentPolicy, SpanConfig};
use span_core::external::NoBlacklist;
use span_core::fit_info::FitInformation;
use span_core::fitter::FitResults;
use span_core::genome::ChromSizes;
use span_core::model::hmm::NbHmm;
use span_core::model::nb::NegBinomial;
use span_core::model::state::StateLabel;
use span_core::model::ModelVariant;
use span_core::peaks::{extract_peaks, Direction, ExtractionInputs};
use span_core::qvalue::QValueCache;
use span_core::squash::{Column, Frame};
use span_core::util::CancellationToken;

fn information(bin_size: u32, chrom_len: u64) -> FitInformation {
    FitInformation::new(
        "hg38",
        vec![PathBuf::from("treatment.bed")],
        FragmentPolicy::Fixed(150),
        true,
        bin_size,
        ChromSizes::new(vec![("chr1".to_string(), chrom_len)]),
        serde_json::Value::Null,
    )
}

fn zlh_results(null_log_prob: Vec<f32>, bin_size: u32) -> FitResults {
    let labels = StateLabel::zlh();
    let k = labels.len();
    let log_trans = Array2::from_elem((k, k), (1.0 / k as f64).ln());
    let model = ModelVariant::NbZlhHmm(NbHmm {
        labels,
        zero_inflated: true,
        log_prior: vec![(1.0 / k as f64).ln(); k],
        log_trans,
        emissions: vec![
            NegBinomial::new(0.0, 1.0),
            NegBinomial::new(2.0, 5.0),
            NegBinomial::new(20.0, 5.0),
        ],
    });
    let chrom_len = null_log_prob.len() as u64 * bin_size as u64;
    FitResults { information: information(bin_size, chrom_len), model, null_log_prob }
}

#[test]
fn peak_calls_are_deterministic_across_repeated_extraction() {
    // Identical inputs must produce byte-identical peak coordinates,
    // scores and q-values.
    let mut null_log_prob = vec![-0.02f32; 30];
    for v in &mut null_log_prob[10..14] {
        *v = -40.0;
    }
    let results = zlh_results(null_log_prob, 200);

    let mut config = SpanConfig::default();
    config.fdr = 0.3;
    config.sensitivity = Some(0.3);
    let blacklist = NoBlacklist;

    let run = || {
        let inputs = ExtractionInputs {
            config: &config,
            blacklist: &blacklist,
            signal: None,
            differential_frame: None,
        };
        let cache = QValueCache::new();
        let cancellation = CancellationToken::new();
        extract_peaks(&results, inputs, &cache, &cancellation).unwrap()
    };

    let first = run();
    let second = run();
    assert!(!first.is_empty());
    assert_eq!(first, second);
}

#[test]
fn tighter_fdr_yields_a_subset_of_the_looser_fdr_peak_set() {
    // BH monotonicity: alpha1 < alpha2 => peaks(alpha1) subset
    // peaks(alpha2).
    let mut null_log_prob = vec![-0.02f32; 40];
    for v in &mut null_log_prob[5..8] {
        *v = -60.0;
    }
    for v in &mut null_log_prob[20..23] {
        *v = -8.0;
    }
    let results = zlh_results(null_log_prob, 100);
    let blacklist = NoBlacklist;

    let peaks_at = |fdr: f64| {
        let mut config = SpanConfig::default();
        config.fdr = fdr;
        config.sensitivity = Some(0.5);
        let inputs = ExtractionInputs {
            config: &config,
            blacklist: &blacklist,
            signal: None,
            differential_frame: None,
        };
        let cache = QValueCache::new();
        let cancellation = CancellationToken::new();
        extract_peaks(&results, inputs, &cache, &cancellation).unwrap()
    };

    let tight = peaks_at(1e-3);
    let loose = peaks_at(0.9);
    for peak in &tight {
        assert!(loose
            .iter()
            .any(|p| p.chrom == peak.chrom && p.start == peak.start && p.end == peak.end));
    }
}

#[test]
fn tight_fdr_across_the_whole_pipeline_yields_no_peaks() {
    let null_log_prob = vec![-0.3f32; 20];
    let results = zlh_results(null_log_prob, 200);
    let mut config = SpanConfig::default();
    config.fdr = 1e-300;
    let blacklist = NoBlacklist;
    let inputs = ExtractionInputs {
        config: &config,
        blacklist: &blacklist,
        signal: None,
        differential_frame: None,
    };
    let cache = QValueCache::new();
    let cancellation = CancellationToken::new();
    let peaks = extract_peaks(&results, inputs, &cache, &cancellation).unwrap();
    assert!(peaks.is_empty());
}

#[test]
fn differential_peaks_are_classified_low_to_high_when_the_increased_state_dominates() {
    // An artificial differential model whose emissions make every
    // candidate bin's coverage wildly more consistent with the
    // `Increased` state than with `Decreased`; every called peak must
    // be classified `lowHigh`, none `highLow`.
    let labels = StateLabel::zlhid();
    let k = labels.len();
    let mut log_prior = vec![(0.02f64).ln(); k];
    log_prior[3] = (0.9f64).ln(); // Increased
    let log_trans = Array2::from_elem((k, k), (1.0 / k as f64).ln());
    let model = ModelVariant::NbZlhidHmm(NbHmm {
        labels,
        zero_inflated: true,
        log_prior,
        log_trans,
        emissions: vec![
            NegBinomial::new(0.0, 1.0),   // Zero
            NegBinomial::new(2.0, 5.0),   // Low
            NegBinomial::new(5.0, 5.0),   // High
            NegBinomial::new(60.0, 5.0),  // Increased
            NegBinomial::new(0.5, 5.0),   // Decreased
        ],
    });

    let bin_size = 100;
    let mut null_log_prob = vec![-0.01f32; 20];
    for v in &mut null_log_prob[5..12] {
        *v = -50.0;
    }
    let chrom_len = null_log_prob.len() as u64 * bin_size as u64;
    let results = FitResults { information: information(bin_size, chrom_len), model, null_log_prob };

    let ys: Vec<i64> = vec![60; 20];
    let differential_frame = Frame::new().with_column("y", Column::Int(ys));

    let mut config = SpanConfig::default();
    config.fdr = 0.5;
    config.sensitivity = Some(0.5);
    let blacklist = NoBlacklist;
    let inputs = ExtractionInputs {
        config: &config,
        blacklist: &blacklist,
        signal: None,
        differential_frame: Some(&differential_frame),
    };
    let cache = QValueCache::new();
    let cancellation = CancellationToken::new();
    let peaks = extract_peaks(&results, inputs, &cache, &cancellation).unwrap();

    assert!(!peaks.is_empty());
    assert!(peaks.iter().all(|p| p.direction == Some(Direction::LowToHigh)));
}

#[test]
fn a_cached_fit_extracts_the_same_peaks_as_the_freshly_computed_one() {
    let mut null_log_prob = vec![-0.02f32; 20];
    for v in &mut null_log_prob[8..12] {
        *v = -45.0;
    }
    let results = zlh_results(null_log_prob, 200);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("treatment.span");
    let information = results.information.clone();
    let loaded = ResultCache::get_or_load(&path, &information, || Ok(results.clone()))
        .unwrap();

    let mut config = SpanConfig::default();
    config.fdr = 0.5;
    config.sensitivity = Some(0.5);
    let blacklist = NoBlacklist;

    let extract = |fit: &FitResults| {
        let inputs = ExtractionInputs {
            config: &config,
            blacklist: &blacklist,
            signal: None,
            differential_frame: None,
        };
        let cache = QValueCache::new();
        let cancellation = CancellationToken::new();
        extract_peaks(fit, inputs, &cache, &cancellation).unwrap()
    };

    assert_eq!(extract(&results), extract(&loaded));
}
