//! Result Cache: a content-addressed, uncompressed tar named
//! `<id>.span` (HMM/mixture variants), `<id>.span2` (Poisson regression
//! mixture) or `<id>.span3` (NB regression mixture), holding
//! `information.json`, `model.json` and `null.npz`.

use std::fs;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};

use tar::{Archive, Builder, Header};
use tempfile::NamedTempFile;

use crate::errs::{SpanError, SpanResult};
use crate::fit_info::FitInformation;
use crate::fitter::{FitResults, ModelKind};
use crate::model::ModelVariant;
use crate::npy::{decode_null_npz, encode_null_npz};

/// The extension a given model variant is cached under. Chosen from
/// the `ModelKind` the caller is about to fit,
/// since that is known before a cache lookup.
pub fn cache_extension(kind: ModelKind) -> &'static str {
    match kind {
        ModelKind::PoissonRegrMixture => "span2",
        ModelKind::NbRegrMixture => "span3",
        _ => "span",
    }
}

pub fn default_cache_path(dir: &Path, information: &FitInformation, kind: ModelKind) -> PathBuf {
    dir.join(format!("{}.{}", information.id(), cache_extension(kind)))
}

fn io_err(path: &Path) -> impl Fn(std::io::Error) -> SpanError + '_ {
    move |source| SpanError::Io { path: path.to_path_buf(), source }
}

pub struct ResultCache;

impl ResultCache {
    /// `getOrLoad`: if `path` exists, is non-empty, and its stored
    /// Fit Information matches `information`, returns the reconstructed
    /// results. Otherwise runs `compute`, persists the result
    /// atomically (temp file + rename), reloads it as a sanity check,
    /// and returns that.
    pub fn get_or_load(
        path: &Path,
        information: &FitInformation,
        compute: impl FnOnce() -> SpanResult<FitResults>,
    ) -> SpanResult<FitResults> {
        if let Some(existing) = Self::try_load(path, information)? {
            log::debug!("cache hit at {path:?}");
            return Ok(existing);
        }
        log::info!("cache miss at {path:?}, fitting from scratch");
        let results = compute()?;
        Self::save(path, &results)?;
        Self::try_load(path, information)?
            .ok_or_else(|| SpanError::StoredMismatch { path: path.to_path_buf() })
    }

    fn try_load(path: &Path, information: &FitInformation) -> SpanResult<Option<FitResults>> {
        let bytes = match fs::read(path) {
            Ok(b) if !b.is_empty() => b,
            Ok(_) => return Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_err(path)(e)),
        };

        let mut archive = Archive::new(Cursor::new(&bytes));
        let mut information_bytes = None;
        let mut model_bytes = None;
        let mut null_bytes = None;
        for entry in archive.entries().map_err(io_err(path))? {
            let mut entry = entry.map_err(io_err(path))?;
            let name = entry.path().map_err(io_err(path))?.to_string_lossy().to_string();
            let mut buf = Vec::new();
            entry.read_to_end(&mut buf).map_err(io_err(path))?;
            match name.as_str() {
                "information.json" => information_bytes = Some(buf),
                "model.json" => model_bytes = Some(buf),
                "null.npz" => null_bytes = Some(buf),
                _ => {}
            }
        }

        let (Some(information_bytes), Some(model_bytes), Some(null_bytes)) =
            (information_bytes, model_bytes, null_bytes)
        else {
            return Err(SpanError::StoredMismatch { path: path.to_path_buf() });
        };

        let mismatch = || SpanError::StoredMismatch { path: path.to_path_buf() };
        let info_value: serde_json::Value =
            serde_json::from_slice(&information_bytes).map_err(|_| mismatch())?;
        let loaded_information = FitInformation::from_json(info_value)?;
        if loaded_information != *information {
            return Err(mismatch());
        }

        let model_value: serde_json::Value =
            serde_json::from_slice(&model_bytes).map_err(|_| mismatch())?;
        let model = ModelVariant::from_json(model_value)?;
        let null_log_prob = decode_null_npz(&null_bytes, path)?;

        Ok(Some(FitResults { information: loaded_information, model, null_log_prob }))
    }

    fn save(path: &Path, results: &FitResults) -> SpanResult<()> {
        let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or_else(|| Path::new("."));
        let mut temp = NamedTempFile::new_in(dir).map_err(io_err(path))?;

        {
            let mut builder = Builder::new(&mut temp);

            let information_bytes = serde_json::to_vec_pretty(&results.information.to_json())
                .expect("FitInformation always serializes to JSON");
            append_entry(&mut builder, path, "information.json", &information_bytes)?;

            let model_bytes = serde_json::to_vec_pretty(&results.model.to_json())
                .expect("ModelVariant always serializes to JSON");
            append_entry(&mut builder, path, "model.json", &model_bytes)?;

            let null_bytes = encode_null_npz(&results.null_log_prob);
            append_entry(&mut builder, path, "null.npz", &null_bytes)?;

            builder.finish().map_err(io_err(path))?;
        }

        temp.persist(path).map_err(|e| SpanError::Io { path: path.to_path_buf(), source: e.error })?;
        Ok(())
    }
}

fn append_entry(
    builder: &mut Builder<&mut NamedTempFile>,
    cache_path: &Path,
    name: &str,
    bytes: &[u8],
) -> SpanResult<()> {
    let mut header = Header::new_gnu();
    header.set_size(bytes.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder.append_data(&mut header, name, bytes).map_err(io_err(cache_path))
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::config::FragmentPolicy;
    use crate::genome::ChromSizes;
    use crate::model::hmm::NbHmm;
    use crate::model::state::StateLabel;
    use crate::model::nb::NegBinomial;
    use ndarray::Array2;

    fn toy_information() -> FitInformation {
        FitInformation::new(
            "hg38",
            vec![PathBuf::from("treatment.bed")],
            FragmentPolicy::Fixed(150),
            true,
            200,
            ChromSizes::new(vec![("chr1".to_string(), 1000)]),
            serde_json::Value::Null,
        )
    }

    fn toy_results(information: FitInformation) -> FitResults {
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
        FitResults { information, model, null_log_prob: vec![-0.1, -2.0, -0.05] }
    }

    #[test]
    fn round_trip_cache_preserves_information_and_likelihood() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("treatment.span");
        let information = toy_information();
        let results = toy_results(information.clone());

        let mut computed = false;
        let loaded = ResultCache::get_or_load(&path, &information, || {
            computed = true;
            Ok(toy_results(information.clone()))
        })
        .unwrap();
        assert!(computed);
        assert_eq!(loaded.information, results.information);

        let mut recomputed = false;
        let reloaded = ResultCache::get_or_load(&path, &information, || {
            recomputed = true;
            Ok(toy_results(information.clone()))
        })
        .unwrap();
        assert!(!recomputed, "a populated cache entry must not recompute");
        assert_eq!(reloaded.information, information);
    }

    #[test]
    fn mismatched_information_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("treatment.span");
        let information = toy_information();
        ResultCache::get_or_load(&path, &information, || Ok(toy_results(information.clone())))
            .unwrap();

        let other = FitInformation::new(
            "hg19",
            vec![PathBuf::from("treatment.bed")],
            FragmentPolicy::Fixed(150),
            true,
            200,
            ChromSizes::new(vec![("chr1".to_string(), 1000)]),
            serde_json::Value::Null,
        );
        let err = ResultCache::get_or_load(&path, &other, || Ok(toy_results(other.clone())))
            .unwrap_err();
        assert!(matches!(err, SpanError::StoredMismatch { .. }));
    }

    #[test]
    fn cache_extension_matches_the_model_variant() {
        assert_eq!(cache_extension(ModelKind::NbZlhHmm), "span");
        assert_eq!(cache_extension(ModelKind::PoissonRegrMixture), "span2");
        assert_eq!(cache_extension(ModelKind::NbRegrMixture), "span3");
    }
}
