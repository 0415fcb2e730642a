//! Trait boundaries for the out-of-scope collaborators this engine
//! relies on: a read-coverage provider, a GC/mappability provider, and the
//! blacklist the Peak Extractor filters against. The core never reads a
//! BAM or a BigWig itself — it only consumes these interfaces, which a
//! caller implements on top of `rust-htslib`/`bigtools`/whatever it
//! likes.

use std::ops::Range;

/// A single aligned read's contribution to coverage: its 5' position
/// (already fragment-extended by the caller's policy) and strand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadPosition {
    pub five_prime: u64,
    pub reverse_strand: bool,
}

/// Out-of-scope collaborator: must expose both-strands coverage queries
/// and whole-genome totals for a chromosome. The core's binning logic
/// only ever calls `reads_in_range`/`total_reads`.
pub trait ReadCoverageProvider {
    /// Every read (as a 5' position, already extended per the fragment
    /// policy) whose extended interval overlaps `range` on `chrom`.
    fn reads_in_range(
        &self,
        chrom: &str,
        range: Range<u64>,
    ) -> Vec<ReadPosition>;

    /// Total read count across the whole provided genome (for
    /// `controlScale` and library-size normalization).
    fn total_reads(&self) -> u64;
}

/// Out-of-scope collaborator for the regression-mixture model variants'
/// covariates.
pub trait CovariateProvider {
    /// Mean GC fraction of the bin `[start, end)` on `chrom`, in `[0, 1]`.
    fn mean_gc(&self, chrom: &str, start: u64, end: u64) -> f32;

    /// Mean mappability of the bin `[start, end)` on `chrom`, in `[0, 1]`.
    fn mean_mappability(&self, chrom: &str, start: u64, end: u64) -> f32;
}

/// Regions to drop from the final peak set. Implementors
/// typically wrap a `rust_lapper::Lapper` built from a blacklist BED.
pub trait BlacklistProvider {
    fn intersects(&self, chrom: &str, start: u64, end: u64) -> bool;
}

/// A `BlacklistProvider` that never excludes anything, for callers that
/// don't have a blacklist.
pub struct NoBlacklist;

impl BlacklistProvider for NoBlacklist {
    fn intersects(&self, _chrom: &str, _start: u64, _end: u64) -> bool {
        false
    }
}
