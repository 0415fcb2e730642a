//! Binned Coverage.

use log::{debug, info, warn};
use rustc_hash::FxHashSet;

use crate::config::FragmentPolicy;
use crate::errs::SpanError;
use crate::external::{ReadCoverageProvider, ReadPosition};
use crate::genome::ChromSizes;

/// Shifts a read's 5' position downstream (in the direction implied by
/// its strand) by `fragment` bases, clamped to `[0, length)`.
fn shift(read: ReadPosition, fragment: u32, length: u64) -> u64 {
    let shifted = if read.reverse_strand {
        read.five_prime.saturating_sub(fragment as u64)
    } else {
        read.five_prime.saturating_add(fragment as u64)
    };
    shifted.min(length.saturating_sub(1))
}

/// Resolves `FragmentPolicy::Auto` into a concrete fragment length by
/// maximizing the cross-correlation between the forward- and
/// reverse-strand strand-specific binned coverage of the
/// highest-coverage chromosome, scanning shifts on a `bin_size`-spaced
/// grid up to `max_shift`. This is a heuristic approximation of the
/// phantompeakqualtools-style cross-correlation estimate; the spec
/// leaves "auto" fragment estimation unspecified beyond naming it.
pub fn resolve_fragment_length(
    policy: FragmentPolicy,
    provider: &dyn ReadCoverageProvider,
    chrom_sizes: &ChromSizes,
    bin_size: u32,
) -> u32 {
    match policy {
        FragmentPolicy::Fixed(n) => n,
        FragmentPolicy::Zero => 0,
        FragmentPolicy::Auto => {
            let Some((chrom, length)) = chrom_sizes
                .iter()
                .max_by_key(|(c, l)| {
                    provider.reads_in_range(c, 0..*l).len()
                })
            else {
                return 0;
            };
            let reads = provider.reads_in_range(chrom, 0..length);
            if reads.is_empty() {
                return 0;
            }
            let n_bins = ChromSizes::bin_count(length, bin_size) as usize;
            let mut fwd = vec![0u32; n_bins];
            let mut rev = vec![0u32; n_bins];
            for r in &reads {
                let idx = (r.five_prime / bin_size as u64) as usize;
                let idx = idx.min(n_bins - 1);
                if r.reverse_strand {
                    rev[idx] += 1;
                } else {
                    fwd[idx] += 1;
                }
            }
            let max_shift_bins = (600 / bin_size.max(1)).max(1) as usize;
            let mut best_shift = 0usize;
            let mut best_corr = f64::NEG_INFINITY;
            for shift_bins in 0..=max_shift_bins.min(n_bins.saturating_sub(1)) {
                let corr = shifted_correlation(&fwd, &rev, shift_bins);
                if corr > best_corr {
                    best_corr = corr;
                    best_shift = shift_bins;
                }
            }
            let fragment = (best_shift as u32) * bin_size;
            debug!(
                "auto fragment estimate on {chrom}: {fragment}bp \
                 (correlation {best_corr:.4})"
            );
            fragment
        }
    }
}

/// Pearson correlation of `rev` shifted `shift_bins` bins to the left
/// against `fwd`, over their common overlap.
fn shifted_correlation(fwd: &[u32], rev: &[u32], shift_bins: usize) -> f64 {
    let n = fwd.len();
    if shift_bins >= n {
        return f64::NEG_INFINITY;
    }
    let a: Vec<f64> = fwd[..n - shift_bins].iter().map(|&x| x as f64).collect();
    let b: Vec<f64> = rev[shift_bins..].iter().map(|&x| x as f64).collect();
    pearson(&a, &b)
}

fn pearson(a: &[f64], b: &[f64]) -> f64 {
    debug_assert_eq!(a.len(), b.len());
    let n = a.len() as f64;
    if n == 0.0 {
        return 0.0;
    }
    let mean_a = a.iter().sum::<f64>() / n;
    let mean_b = b.iter().sum::<f64>() / n;
    let mut cov = 0.0;
    let mut var_a = 0.0;
    let mut var_b = 0.0;
    for (x, y) in a.iter().zip(b.iter()) {
        let da = x - mean_a;
        let db = y - mean_b;
        cov += da * db;
        var_a += da * da;
        var_b += db * db;
    }
    if var_a <= 0.0 || var_b <= 0.0 {
        0.0
    } else {
        cov / (var_a.sqrt() * var_b.sqrt())
    }
}

/// Drops duplicate-start reads (same 5' position and strand) when
/// `unique` is set, keeping one representative of each.
fn dedup_reads(reads: Vec<ReadPosition>, unique: bool) -> Vec<ReadPosition> {
    if !unique {
        return reads;
    }
    let mut seen = FxHashSet::default();
    reads
        .into_iter()
        .filter(|r| seen.insert((r.five_prime, r.reverse_strand)))
        .collect()
}

/// `binnedCoverage(c)`: per-bin count of (fragment-shifted,
/// optionally deduplicated) read 5' positions on one chromosome.
pub fn binned_coverage(
    provider: &dyn ReadCoverageProvider,
    chrom: &str,
    length: u64,
    bin_size: u32,
    fragment: u32,
    unique: bool,
) -> Vec<u32> {
    let n_bins = ChromSizes::bin_count(length, bin_size) as usize;
    let mut counts = vec![0u32; n_bins];
    let reads = dedup_reads(provider.reads_in_range(chrom, 0..length), unique);
    for r in reads {
        let pos = shift(r, fragment, length);
        let idx = (pos / bin_size as u64) as usize;
        let idx = idx.min(n_bins.saturating_sub(1));
        counts[idx] += 1;
    }
    counts
}

/// Effective genome query: chromosomes with zero reads across all
/// treatments are removed; fails with `EmptyData` if the result is
/// empty.
pub fn effective_genome_query(
    chrom_sizes: &ChromSizes,
    treatments: &[&dyn ReadCoverageProvider],
) -> Result<ChromSizes, SpanError> {
    let effective = chrom_sizes.subset(|chrom| {
        treatments.iter().any(|t| {
            t.reads_in_range(chrom, 0..chrom_sizes.length(chrom).unwrap_or(0))
                .len()
                > 0
        })
    });
    if effective.is_empty() {
        warn!("effective genome query is empty, no treatment has any reads");
        return Err(SpanError::EmptyData);
    }
    info!(
        "effective genome query has {} of {} chromosomes",
        effective.len(),
        chrom_sizes.len()
    );
    Ok(effective)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeProvider {
        reads: Vec<(String, ReadPosition)>,
    }

    impl ReadCoverageProvider for FakeProvider {
        fn reads_in_range(
            &self,
            chrom: &str,
            range: std::ops::Range<u64>,
        ) -> Vec<ReadPosition> {
            self.reads
                .iter()
                .filter(|(c, r)| {
                    c == chrom && range.contains(&r.five_prime)
                })
                .map(|(_, r)| *r)
                .collect()
        }

        fn total_reads(&self) -> u64 {
            self.reads.len() as u64
        }
    }

    fn pos(p: u64) -> ReadPosition {
        ReadPosition { five_prime: p, reverse_strand: false }
    }

    #[test]
    fn binned_coverage_counts_shifted_reads_per_bin() {
        // One chromosome of length 1000, binSize=100, treatment
        // reads at {10,20,30,40,50,400,410,420,430}, no control.
        let positions = [10, 20, 30, 40, 50, 400, 410, 420, 430];
        let provider = FakeProvider {
            reads: positions
                .iter()
                .map(|&p| ("chrA".to_string(), pos(p)))
                .collect(),
        };
        let counts =
            binned_coverage(&provider, "chrA", 1000, 100, 0, false);
        assert_eq!(counts, vec![5, 0, 0, 0, 4, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn unique_flag_drops_duplicate_starts() {
        let provider = FakeProvider {
            reads: vec![
                ("chrA".to_string(), pos(10)),
                ("chrA".to_string(), pos(10)),
                ("chrA".to_string(), pos(20)),
            ],
        };
        let counts = binned_coverage(&provider, "chrA", 100, 100, 0, true);
        assert_eq!(counts, vec![2]);
        let counts = binned_coverage(&provider, "chrA", 100, 100, 0, false);
        assert_eq!(counts, vec![3]);
    }

    #[test]
    fn effective_genome_query_drops_empty_chromosomes() {
        let chrom_sizes = ChromSizes::new(vec![
            ("chrA".to_string(), 1000),
            ("chrB".to_string(), 1000),
        ]);
        let provider =
            FakeProvider { reads: vec![("chrA".to_string(), pos(10))] };
        let providers: Vec<&dyn ReadCoverageProvider> = vec![&provider];
        let eff =
            effective_genome_query(&chrom_sizes, &providers).unwrap();
        assert_eq!(eff.names().collect::<Vec<_>>(), vec!["chrA"]);
    }

    #[test]
    fn effective_genome_query_fails_when_nothing_has_reads() {
        let chrom_sizes = ChromSizes::new(vec![("chrA".to_string(), 1000)]);
        let provider = FakeProvider { reads: vec![] };
        let providers: Vec<&dyn ReadCoverageProvider> = vec![&provider];
        assert!(effective_genome_query(&chrom_sizes, &providers).is_err());
    }
}
