//! Fit Information: canonical, serializable description of model
//! input.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::config::FragmentPolicy;
use crate::errs::SpanError;
use crate::genome::ChromSizes;
use crate::squash::{merge_by_chrom, split_by_offsets, Frame};

/// `information.json`'s class discriminator.
pub const FIT_INFORMATION_FQN: &str = "fit.information.fqn";

/// The current on-disk schema version. Version 2 documents are migrated
/// up to this on load.
pub const CURRENT_VERSION: u32 = 3;
const MIN_READABLE_VERSION: u32 = 2;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitInformation {
    pub build: String,
    /// Path stems of every input file this fit depends on (treatment(s),
    /// optional control), in the order they contribute to `id`.
    pub data_paths: Vec<PathBuf>,
    pub fragment: FragmentPolicy,
    pub unique: bool,
    pub bin_size: u32,
    pub chrom_sizes: ChromSizes,
    /// Opaque, model-variant-specific fields (regression covariate
    /// config, HMM state count, ...), kept untyped here because the
    /// variant itself owns their meaning; see `model::ModelVariant`.
    pub model_specific: serde_json::Value,
}

/// Strips a trailing `.gz`, then one further extension, to get a
/// gz-stripped path stem.
fn path_stem(path: &Path) -> String {
    let without_gz = path
        .to_str()
        .map(|s| s.strip_suffix(".gz").unwrap_or(s).to_string())
        .unwrap_or_default();
    Path::new(&without_gz)
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or(without_gz)
}

fn fragment_repr(fragment: FragmentPolicy) -> String {
    match fragment {
        FragmentPolicy::Auto => "auto".to_string(),
        FragmentPolicy::Fixed(n) => n.to_string(),
        FragmentPolicy::Zero => "0".to_string(),
    }
}

impl FitInformation {
    pub fn new(
        build: impl Into<String>,
        data_paths: Vec<PathBuf>,
        fragment: FragmentPolicy,
        unique: bool,
        bin_size: u32,
        chrom_sizes: ChromSizes,
        model_specific: serde_json::Value,
    ) -> Self {
        Self {
            build: build.into(),
            data_paths,
            fragment,
            unique,
            bin_size,
            chrom_sizes,
            model_specific,
        }
    }

    /// Deterministic cache key and default model filename stem,
    /// derived from path stems, fragment, bin size and flags.
    pub fn id(&self) -> String {
        let mut parts: Vec<String> =
            self.data_paths.iter().map(|p| path_stem(p)).collect();
        parts.push(fragment_repr(self.fragment));
        parts.push(self.bin_size.to_string());
        if self.unique {
            parts.push("unique".to_string());
        }
        parts.join("_")
    }

    /// Prefix-sum offsets `[O_0=0, O_1, ..., O_n]` over the
    /// lexicographically-sorted chromosomes.
    pub fn offsets(&self) -> Vec<u64> {
        let mut offsets = vec![0u64];
        for (_, len) in self.chrom_sizes.iter() {
            let n = ChromSizes::bin_count(len, self.bin_size);
            offsets.push(offsets.last().unwrap() + n);
        }
        offsets
    }

    fn order(&self) -> Vec<String> {
        self.chrom_sizes.names().map(|s| s.to_string()).collect()
    }

    /// The squashed row range `[start, end)` for `chrom`.
    pub fn row_range(&self, chrom: &str) -> Option<std::ops::Range<u64>> {
        let order = self.order();
        let offsets = self.offsets();
        order.iter().position(|c| c == chrom).map(|i| offsets[i]..offsets[i + 1])
    }

    /// Inverse of `row_range`: which chromosome owns squashed row `row`.
    pub fn chrom_at_row(&self, row: u64) -> Option<&str> {
        let offsets = self.offsets();
        let order_idx = offsets.windows(2).position(|w| row >= w[0] && row < w[1])?;
        self.chrom_sizes.names().nth(order_idx)
    }

    pub fn merge(&self, per_chrom: &HashMap<String, Frame>) -> Frame {
        merge_by_chrom(per_chrom, &self.order())
    }

    pub fn split(
        &self,
        frame: &Frame,
        expected_genome: Option<&ChromSizes>,
    ) -> Result<HashMap<String, Frame>, SpanError> {
        if let Some(genome) = expected_genome {
            self.chrom_sizes.assert_compatible(genome)?;
        }
        Ok(split_by_offsets(frame, &self.order(), &self.offsets()))
    }

    /// Fails with `WrongGenome`/`WrongChromosome` per the data
    /// model invariant: a Fit Information's exact `ChromSizes` must match
    /// what it is applied against.
    pub fn assert_matches(
        &self,
        build: &str,
        chrom_sizes: &ChromSizes,
    ) -> Result<(), SpanError> {
        if self.build != build {
            return Err(SpanError::WrongGenome {
                expected: self.build.clone(),
                found: build.to_string(),
            });
        }
        self.chrom_sizes.assert_compatible(chrom_sizes)
    }

    /// Serializes to the `information.json` document shape: a class
    /// discriminator plus `version` alongside the fields.
    pub fn to_json(&self) -> serde_json::Value {
        let mut value = serde_json::to_value(self).expect("FitInformation always serializes");
        let obj = value.as_object_mut().expect("FitInformation serializes to an object");
        obj.insert(FIT_INFORMATION_FQN.to_string(), serde_json::json!(FIT_INFORMATION_FQN));
        obj.insert("version".to_string(), serde_json::json!(CURRENT_VERSION));
        value
    }

    /// Deserializes `information.json`, migrating version 2 documents
    /// and refusing anything outside `[MIN_READABLE_VERSION, CURRENT_VERSION]`.
    pub fn from_json(mut value: serde_json::Value) -> Result<Self, SpanError> {
        let path = PathBuf::from("information.json");
        let version = value
            .get("version")
            .and_then(|v| v.as_u64())
            .map(|v| v as u32)
            .ok_or(SpanError::IncompatibleVersion {
                path: path.clone(),
                found: 0,
                current: CURRENT_VERSION,
            })?;
        if version < MIN_READABLE_VERSION || version > CURRENT_VERSION {
            return Err(SpanError::IncompatibleVersion {
                path,
                found: version,
                current: CURRENT_VERSION,
            });
        }
        if version == 2 {
            // Version 2 predates `model_specific`; default it to `null`.
            if let Some(obj) = value.as_object_mut() {
                obj.entry("model_specific").or_insert(serde_json::Value::Null);
            }
        }
        if let Some(obj) = value.as_object_mut() {
            obj.remove(FIT_INFORMATION_FQN);
            obj.remove("version");
        }
        serde_json::from_value(value).map_err(|_| SpanError::IncompatibleVersion {
            path: PathBuf::from("information.json"),
            found: version,
            current: CURRENT_VERSION,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_info() -> FitInformation {
        FitInformation::new(
            "hg38",
            vec![PathBuf::from("treatment.bed.gz")],
            FragmentPolicy::Fixed(150),
            true,
            200,
            ChromSizes::new(vec![
                ("chr1".to_string(), 1000),
                ("chr2".to_string(), 500),
            ]),
            serde_json::Value::Null,
        )
    }

    #[test]
    fn id_is_deterministic_and_strips_gz() {
        let info = sample_info();
        assert_eq!(info.id(), "treatment_150_200_unique");
    }

    #[test]
    fn offset_law_holds() {
        let info = sample_info();
        let offsets = info.offsets();
        assert_eq!(offsets[0], 0);
        assert_eq!(offsets[1] - offsets[0], ChromSizes::bin_count(1000, 200));
        assert_eq!(offsets[2] - offsets[1], ChromSizes::bin_count(500, 200));
    }

    #[test]
    fn round_trip_json_preserves_equality() {
        let info = sample_info();
        let json = info.to_json();
        assert_eq!(json["version"], CURRENT_VERSION);
        let restored = FitInformation::from_json(json).unwrap();
        assert_eq!(info, restored);
    }

    #[test]
    fn rejects_unknown_version() {
        let info = sample_info();
        let mut json = info.to_json();
        json["version"] = serde_json::json!(999);
        assert!(FitInformation::from_json(json).is_err());
    }

    #[test]
    fn migrates_version_2() {
        let info = sample_info();
        let mut json = info.to_json();
        json["version"] = serde_json::json!(2);
        json.as_object_mut().unwrap().remove("model_specific");
        let restored = FitInformation::from_json(json).unwrap();
        assert_eq!(restored.build, info.build);
    }

    #[test]
    fn assert_matches_detects_wrong_genome() {
        let info = sample_info();
        let other = ChromSizes::new(vec![("chr1".to_string(), 1000)]);
        assert!(info.assert_matches("hg19", &other).is_err());
    }
}
