//! Genomic coordinate primitives: `ChromSizes` and `Bin`.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::errs::SpanError;

/// Ordered mapping (name -> length), always presented sorted
/// lexicographically by name. Construction is the only place the sort
/// happens; every later lookup assumes the invariant already holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChromSizes {
    /// Lexicographically sorted by key.
    sizes: IndexMap<String, u64>,
}

impl ChromSizes {
    pub fn new(mut entries: Vec<(String, u64)>) -> Self {
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        let sizes = entries.into_iter().collect();
        Self { sizes }
    }

    pub fn len(&self) -> usize {
        self.sizes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sizes.is_empty()
    }

    /// Chromosome names in the canonical (lexicographic) order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.sizes.keys().map(|s| s.as_str())
    }

    pub fn length(&self, chrom: &str) -> Option<u64> {
        self.sizes.get(chrom).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.sizes.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn contains(&self, chrom: &str) -> bool {
        self.sizes.contains_key(chrom)
    }

    /// Restrict to just the given chromosome names, keeping lexicographic
    /// order. Used to build the effective genome query (chromosomes with
    /// no reads removed).
    pub fn subset(&self, keep: impl Fn(&str) -> bool) -> Self {
        let entries = self
            .sizes
            .iter()
            .filter(|(name, _)| keep(name))
            .map(|(k, v)| (k.clone(), *v))
            .collect();
        Self::new(entries)
    }

    /// Fails with `WrongChromosome` if `other` disagrees with `self` on
    /// any chromosome name or length it also carries. `self` is treated
    /// as the authoritative genome (e.g. the one a Fit Information was
    /// built on).
    pub fn assert_compatible(&self, other: &ChromSizes) -> Result<(), SpanError> {
        for (chrom, len) in other.iter() {
            match self.length(chrom) {
                Some(expected) if expected == len => {}
                Some(expected) => {
                    return Err(SpanError::WrongChromosome {
                        chrom: chrom.to_string(),
                        expected,
                        found: Some(len),
                    })
                }
                None => {
                    return Err(SpanError::WrongChromosome {
                        chrom: chrom.to_string(),
                        expected: len,
                        found: None,
                    })
                }
            }
        }
        Ok(())
    }

    /// Number of bins of width `bin_size` needed to cover a chromosome of
    /// the given length: `⌈len / bin_size⌉`.
    pub fn bin_count(length: u64, bin_size: u32) -> u64 {
        (length + bin_size as u64 - 1) / bin_size as u64
    }
}

/// A fixed-width genomic interval `[start, end)` on chromosome `chrom`,
/// bin index `index` within that chromosome. The last bin of a
/// chromosome may be narrower than `bin_size`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, derive_new::new)]
pub struct Bin {
    pub chrom: String,
    pub index: u64,
    pub start: u64,
    pub end: u64,
}

impl Bin {
    pub fn width(&self) -> u64 {
        self.end - self.start
    }
}

/// Enumerates the bins of chromosome `chrom` of length `length` at
/// `bin_size`: `[b*binSize, min((b+1)*binSize, length))`.
pub fn bins_for_chrom(
    chrom: &str,
    length: u64,
    bin_size: u32,
) -> impl Iterator<Item = Bin> + '_ {
    let n = ChromSizes::bin_count(length, bin_size);
    (0..n).map(move |b| {
        let start = b * bin_size as u64;
        let end = ((b + 1) * bin_size as u64).min(length);
        Bin::new(chrom.to_string(), b, start, end)
    })
}
