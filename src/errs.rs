use std::path::PathBuf;

use thiserror::Error;

/// The closed error taxonomy shared by the fit-information, cache and
/// fitter layers. Call sites that only need ad-hoc context (path
/// munging, JSON parsing) return a plain `Result` and wrap into the
/// closest variant at the module boundary.
#[derive(Debug, Error)]
pub enum SpanError {
    #[error(
        "no chromosome in the query has any reads across all treatments"
    )]
    EmptyData,

    #[error("genome build mismatch: expected {expected}, found {found}")]
    WrongGenome { expected: String, found: String },

    #[error(
        "chromosome {chrom} is missing or its length disagrees: \
         expected {expected}, found {found:?}"
    )]
    WrongChromosome { chrom: String, expected: u64, found: Option<u64> },

    #[error(
        "cache at {path:?} has version {found}, this build only reads \
         version {current} (migrate or delete the cache)"
    )]
    IncompatibleVersion { path: PathBuf, found: u32, current: u32 },

    #[error(
        "cached information.json at {path:?} does not match the \
         re-derived fit information; delete the cache and rerun"
    )]
    StoredMismatch { path: PathBuf },

    #[error("fit could not be recovered: {reason}")]
    IrrecoverableFit { reason: String },

    #[error("low signal-to-noise ratio detected after fitting: {detail}")]
    LowSignalToNoise { detail: String },

    #[error("operation was cancelled")]
    Cancelled,

    #[error("I/O error at {path:?}: {source}")]
    Io { path: PathBuf, #[source] source: std::io::Error },
}

pub type SpanResult<T> = Result<T, SpanError>;
