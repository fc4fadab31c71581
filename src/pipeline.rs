//! The batch pipeline from raw samples to a filtered data matrix.
//!
//! A [`PipelineConfig`] is built once through [`PipelineConfigBuilder`], which
//! rejects invalid settings before any sample is touched. [`Pipeline::run`] then
//! preprocesses each sample, builds the consensus spectra (concurrently when the
//! `parallelism` feature is enabled), and after all samples are done, brackets
//! them, builds the data matrix and optionally subtracts the blanks. A failing
//! sample is reported in the output and does not stop the batch. The consensus
//! spectra can also be exported as one FeatureXML file per sample.
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, info, warn};
use thiserror::Error;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::blank::{BlankSubtraction, BlankSubtractionError, BlankSubtractionResult};
use crate::bracket::{bracket_samples, Bracket, BracketParams};
use crate::consensus::{
    build_consensus_spectra, ConsensusBuilder, ConsensusError, ConsensusParams,
    ConsensusSummary, IntensityAggregation,
};
use crate::featureml::{consensus_spectrum_file_name, consensus_spectrum_to_file};
use crate::matrix::{build_data_matrix, DataMatrix, MatrixError};
use crate::metadata::SampleSheet;
use crate::preprocess::{
    drop_lower_spectra, normalize_by_tic, normalize_to_internal_standard, select_top_spectra,
    NormalizationError,
};
use crate::quality::{ClusterQualityCheck, PPMDeviationCheck, PeakShapeCheck};
use crate::signal::{ConsensusSpectrum, Sample};

/// All the ways a configuration can be invalid
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("Unknown intensity aggregation method {0:?}, expected one of sum, average or max")]
    UnknownAggregation(String),
    #[error("{0} must be a finite, non-negative number, not {1}")]
    InvalidTolerance(&'static str, f64),
    #[error("The minimum number of detections must be at least one")]
    ZeroMinDetected,
    #[error("No blank group was named")]
    EmptyBlankGroup,
    #[error("The normalization multiplier must be a finite, positive number, not {0}")]
    InvalidMultiplier(f64),
    #[error("The internal standard window {0} to {1} is not a finite, ordered m/z range")]
    InvalidMzWindow(f64, f64),
}

/// How sample intensities are normalized before consensus building
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Normalization {
    /// Divide by the sample's total intensity, then scale by the multiplier
    TotalIntensity { multiplier: f64 },
    /// Divide by the summed intensity of an internal standard's m/z window, then
    /// scale by the multiplier
    InternalStandard {
        mz_min: f64,
        mz_max: f64,
        multiplier: f64,
    },
}

/// The complete, validated configuration of a [`Pipeline`]
#[derive(Debug, Clone, Default)]
pub struct PipelineConfig {
    pub consensus: ConsensusParams,
    pub bracket: BracketParams,
    pub quality_checks: Vec<Arc<dyn ClusterQualityCheck>>,
    pub blank_subtraction: Option<BlankSubtraction>,
    pub normalization: Option<Normalization>,
    /// Keep only this many spectra of highest total intensity per sample
    pub top_spectra: Option<usize>,
    /// Drop this fraction of each sample's spectra with the lowest total intensity
    pub drop_rate: Option<f64>,
    /// Write each consensus spectrum to a FeatureXML file in this directory
    pub featureml_directory: Option<PathBuf>,
}

impl PipelineConfig {
    /// Check every setting, as done by [`PipelineConfigBuilder::build`] and again
    /// by [`Pipeline::run`]
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.consensus.validate()?;
        let bracket_tol = self.bracket.max_ppm_deviation;
        if !bracket_tol.is_finite() || bracket_tol < 0.0 {
            return Err(ConfigError::InvalidTolerance("max_ppm_deviation", bracket_tol));
        }
        if let Some(rate) = self.drop_rate {
            if !(0.0..=1.0).contains(&rate) {
                return Err(ConfigError::InvalidTolerance("drop_rate", rate));
            }
        }
        let multiplier = match self.normalization {
            Some(Normalization::TotalIntensity { multiplier }) => Some(multiplier),
            Some(Normalization::InternalStandard {
                mz_min,
                mz_max,
                multiplier,
            }) => {
                if !(mz_min.is_finite() && mz_max.is_finite() && mz_min <= mz_max) {
                    return Err(ConfigError::InvalidMzWindow(mz_min, mz_max));
                }
                Some(multiplier)
            }
            None => None,
        };
        if let Some(multiplier) = multiplier {
            if !(multiplier.is_finite() && multiplier > 0.0) {
                return Err(ConfigError::InvalidMultiplier(multiplier));
            }
        }
        if let Some(blank_subtraction) = self.blank_subtraction.as_ref() {
            blank_subtraction.validate()?;
        }
        Ok(())
    }
}

/// A builder for configuring [`PipelineConfig`]
#[derive(Debug, Clone, Default)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
    aggregation_name: Option<String>,
}

impl PipelineConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn min_difference_ppm(&mut self, min_difference_ppm: f64) -> &mut Self {
        self.config.consensus.min_difference_ppm = min_difference_ppm;
        self
    }

    pub fn min_signals_per_cluster(&mut self, min_signals_per_cluster: usize) -> &mut Self {
        self.config.consensus.min_signals_per_cluster = min_signals_per_cluster;
        self
    }

    pub fn closest_signal_max_deviation_ppm(&mut self, value: f64) -> &mut Self {
        self.config.consensus.refiner.closest_signal_max_deviation_ppm = value;
        self
    }

    pub fn max_mz_deviation_ppm(&mut self, value: Option<f64>) -> &mut Self {
        self.config.consensus.refiner.max_mz_deviation_ppm = value;
        self
    }

    pub fn max_growth_steps(&mut self, value: Option<usize>) -> &mut Self {
        self.config.consensus.refiner.max_growth_steps = value;
        self
    }

    pub fn aggregation(&mut self, aggregation: IntensityAggregation) -> &mut Self {
        self.config.consensus.aggregation = aggregation;
        self.aggregation_name = None;
        self
    }

    /// Select the aggregation method by name, checked when the configuration is built
    pub fn aggregation_name(&mut self, name: impl Into<String>) -> &mut Self {
        self.aggregation_name = Some(name.into());
        self
    }

    pub fn max_ppm_deviation(&mut self, max_ppm_deviation: f64) -> &mut Self {
        self.config.bracket.max_ppm_deviation = max_ppm_deviation;
        self
    }

    pub fn quality_check(&mut self, check: Arc<dyn ClusterQualityCheck>) -> &mut Self {
        self.config.quality_checks.push(check);
        self
    }

    /// Register the peak shape and PPM deviation checks with their default cutoffs
    pub fn default_quality_checks(&mut self) -> &mut Self {
        self.quality_check(Arc::new(PeakShapeCheck::default()))
            .quality_check(Arc::new(PPMDeviationCheck::default()))
    }

    pub fn blank_subtraction(&mut self, blank_subtraction: BlankSubtraction) -> &mut Self {
        self.config.blank_subtraction = Some(blank_subtraction);
        self
    }

    pub fn normalization(&mut self, normalization: Normalization) -> &mut Self {
        self.config.normalization = Some(normalization);
        self
    }

    pub fn top_spectra(&mut self, n: usize) -> &mut Self {
        self.config.top_spectra = Some(n);
        self
    }

    pub fn drop_rate(&mut self, rate: f64) -> &mut Self {
        self.config.drop_rate = Some(rate);
        self
    }

    pub fn featureml_directory(&mut self, directory: impl Into<PathBuf>) -> &mut Self {
        self.config.featureml_directory = Some(directory.into());
        self
    }

    pub fn build(&self) -> Result<PipelineConfig, ConfigError> {
        let mut config = self.config.clone();
        if let Some(name) = self.aggregation_name.as_deref() {
            config.consensus.aggregation = name.parse()?;
        }
        config.validate()?;
        Ok(config)
    }
}

/// All the ways the pipeline can fail as a whole
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PipelineError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("Failed to build the data matrix: {0}")]
    Matrix(#[from] MatrixError),
    #[error("Failed to subtract blanks: {0}")]
    BlankSubtraction(#[from] BlankSubtractionError),
    #[error("No sample produced a consensus spectrum")]
    NoConsensusSpectra,
    #[error("Failed to export consensus spectra to {}: {message}", .path.display())]
    Export { path: PathBuf, message: String },
}

#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub spectra: Vec<ConsensusSpectrum>,
    pub summaries: Vec<ConsensusSummary>,
    /// Samples that produced no consensus spectrum
    pub failures: Vec<ConsensusError>,
    /// Samples whose intensities could not be normalized and were left as is
    pub normalization_failures: Vec<NormalizationError>,
    pub brackets: Vec<Bracket>,
    pub matrix: DataMatrix,
    /// The group of each matrix row
    pub groups: Vec<String>,
    pub blank_subtraction: Option<BlankSubtractionResult>,
}

impl PipelineOutput {
    /// The data matrix reduced to the features kept by blank subtraction, or the
    /// full matrix when no blank subtraction was configured
    pub fn filtered_matrix(&self) -> Result<DataMatrix, MatrixError> {
        match &self.blank_subtraction {
            Some(result) => self.matrix.select_features(&result.keep),
            None => Ok(self.matrix.clone()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Pipeline<'a> {
    config: &'a PipelineConfig,
}

impl<'a> Pipeline<'a> {
    pub fn new(config: &'a PipelineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PipelineConfig {
        self.config
    }

    fn preprocess(&self, samples: &mut [Sample]) -> Vec<NormalizationError> {
        for sample in samples.iter_mut() {
            if let Some(n) = self.config.top_spectra {
                select_top_spectra(sample, n);
            }
            if let Some(rate) = self.config.drop_rate {
                drop_lower_spectra(sample, rate);
            }
        }
        match self.config.normalization {
            Some(Normalization::TotalIntensity { multiplier }) => samples
                .iter_mut()
                .filter_map(|sample| normalize_by_tic(sample, multiplier).err())
                .inspect(|e| warn!("{e}"))
                .collect(),
            Some(Normalization::InternalStandard {
                mz_min,
                mz_max,
                multiplier,
            }) => normalize_to_internal_standard(samples, (mz_min, mz_max), multiplier)
                .into_iter()
                .filter_map(Result::err)
                .collect(),
            None => Vec::new(),
        }
    }

    fn export_spectra(
        &self,
        spectra: &[ConsensusSpectrum],
        directory: &Path,
    ) -> Result<(), PipelineError> {
        let export_error = |path: PathBuf, e: std::io::Error| PipelineError::Export {
            path,
            message: e.to_string(),
        };
        fs::create_dir_all(directory).map_err(|e| export_error(directory.to_path_buf(), e))?;
        for spectrum in spectra {
            let path = consensus_spectrum_to_file(spectrum, directory).map_err(|e| {
                export_error(directory.join(consensus_spectrum_file_name(&spectrum.sample)), e)
            })?;
            debug!("Wrote the consensus spectrum of {} to {}", spectrum.sample, path.display());
        }
        info!(
            "Exported {} consensus spectra to {}",
            spectra.len(),
            directory.display()
        );
        Ok(())
    }

    /// Run every stage over `samples`, labelling matrix rows with the groups in `sheet`
    pub fn run(
        &self,
        mut samples: Vec<Sample>,
        sheet: &SampleSheet,
    ) -> Result<PipelineOutput, PipelineError> {
        self.config.validate()?;
        let normalization_failures = self.preprocess(&mut samples);

        let builder = ConsensusBuilder::new(self.config.consensus);
        let results =
            build_consensus_spectra(&samples, &builder, &self.config.quality_checks);
        let mut spectra = Vec::with_capacity(results.len());
        let mut summaries = Vec::with_capacity(results.len());
        let mut failures = Vec::new();
        for result in results {
            match result {
                Ok((spectrum, summary)) => {
                    spectra.push(spectrum);
                    summaries.push(summary);
                }
                Err(e) => failures.push(e),
            }
        }
        info!(
            "Built {} consensus spectra, {} samples failed",
            spectra.len(),
            failures.len()
        );
        if spectra.is_empty() {
            return Err(PipelineError::NoConsensusSpectra);
        }
        if let Some(directory) = self.config.featureml_directory.as_ref() {
            self.export_spectra(&spectra, directory)?;
        }

        let brackets = bracket_samples(&spectra, &self.config.bracket);
        let matrix = build_data_matrix(&spectra, &brackets)?;
        let groups = sheet.groups_for(&matrix.sample_names);
        let blank_subtraction = self
            .config
            .blank_subtraction
            .as_ref()
            .map(|b| b.apply(&matrix, &groups))
            .transpose()?;

        Ok(PipelineOutput {
            spectra,
            summaries,
            failures,
            normalization_failures,
            brackets,
            matrix,
            groups,
            blank_subtraction,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::blank::BlankSubtractionBuilder;
    use crate::metadata::SampleMetadata;
    use crate::test_data::{synthetic_sample, FEATURES};

    #[test]
    fn test_builder_fails_fast() {
        assert!(matches!(
            PipelineConfigBuilder::new().aggregation_name("median").build(),
            Err(ConfigError::UnknownAggregation(_))
        ));
        assert!(matches!(
            PipelineConfigBuilder::new().min_difference_ppm(f64::NAN).build(),
            Err(ConfigError::InvalidTolerance("min_difference_ppm", _))
        ));
        assert!(PipelineConfigBuilder::new().drop_rate(2.0).build().is_err());
        assert_eq!(
            PipelineConfigBuilder::new()
                .normalization(Normalization::TotalIntensity { multiplier: 0.0 })
                .build()
                .unwrap_err(),
            ConfigError::InvalidMultiplier(0.0)
        );
        assert_eq!(
            PipelineConfigBuilder::new()
                .normalization(Normalization::InternalStandard {
                    mz_min: 500.2,
                    mz_max: 500.1,
                    multiplier: 1.0,
                })
                .build()
                .unwrap_err(),
            ConfigError::InvalidMzWindow(500.2, 500.1)
        );
        let config = PipelineConfigBuilder::new()
            .aggregation_name("max")
            .default_quality_checks()
            .build()
            .unwrap();
        assert_eq!(config.consensus.aggregation, IntensityAggregation::Max);
        assert_eq!(config.quality_checks.len(), 2);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_params_serde() {
        let params = ConsensusParams::default();
        let text = serde_json::to_string(&params).unwrap();
        let back: ConsensusParams = serde_json::from_str(&text).unwrap();
        assert_eq!(params, back);
    }

    #[test_log::test]
    fn test_run() {
        let blank_features = [(150.0, 1e3), (300.0, 2e4)];
        let mut samples = Vec::new();
        let mut sheet = SampleSheet::new();
        for i in 0..3 {
            // Vary the abundance between replicates
            let scale = |features: &[(f64, f64)]| -> Vec<(f64, f64)> {
                features
                    .iter()
                    .map(|(mz, h)| (*mz, h * (1.0 + 0.05 * i as f64)))
                    .collect()
            };
            let name = format!("blank{i}");
            samples.push(synthetic_sample(&name, &scale(&blank_features), 21));
            sheet.insert(name, SampleMetadata::in_group("Blank"));
            let name = format!("treated{i}");
            samples.push(synthetic_sample(&name, &scale(&FEATURES), 21));
            sheet.insert(name, SampleMetadata::in_group("Treated"));
        }
        samples.push(Sample::new("broken", vec![]));

        let config = PipelineConfigBuilder::new()
            .default_quality_checks()
            .blank_subtraction(
                BlankSubtractionBuilder::new()
                    .blank_group("Blank")
                    .test_group("Treated")
                    .build()
                    .unwrap(),
            )
            .build()
            .unwrap();
        let output = Pipeline::new(&config).run(samples, &sheet).unwrap();
        assert_eq!(output.spectra.len(), 6);
        assert_eq!(output.failures, vec![ConsensusError::NoSpectra("broken".into())]);
        assert_eq!(output.brackets.len(), 3);
        assert_eq!(output.matrix.n_samples(), 6);
        assert_eq!(output.groups[0], "Blank");

        let result = output.blank_subtraction.as_ref().unwrap();
        let keep_by_mz: Vec<(f64, bool, i64)> = output
            .brackets
            .iter()
            .map(|b| (b.mean_mz, result.keep[b.id], result.counters[b.id]))
            .collect();
        for (mz, keep, counter) in keep_by_mz {
            if (mz - 150.0).abs() < 0.001 {
                // Ten-fold above the blanks
                assert!(keep && counter == 1, "{mz}");
            } else if (mz - 150.01).abs() < 0.001 {
                // Never seen in the blanks
                assert!(keep && counter == -1, "{mz}");
            } else {
                // Identical in blanks and treated samples
                assert!(!keep, "{mz}");
            }
        }
        assert_eq!(output.filtered_matrix().unwrap().n_features(), 2);
    }

    #[test]
    fn test_run_without_spectra() {
        let config = PipelineConfig::default();
        let err = Pipeline::new(&config)
            .run(vec![Sample::new("A", vec![])], &SampleSheet::new())
            .unwrap_err();
        assert_eq!(err, PipelineError::NoConsensusSpectra);
    }

    #[test]
    fn test_run_validates_config() {
        let samples = || vec![synthetic_sample("A", &FEATURES, 21)];
        let run = |config: PipelineConfig| {
            Pipeline::new(&config)
                .run(samples(), &SampleSheet::new())
                .unwrap_err()
        };
        assert_eq!(
            run(PipelineConfig {
                normalization: Some(Normalization::TotalIntensity {
                    multiplier: f64::INFINITY
                }),
                ..Default::default()
            }),
            PipelineError::Config(ConfigError::InvalidMultiplier(f64::INFINITY))
        );
        assert_eq!(
            run(PipelineConfig {
                normalization: Some(Normalization::InternalStandard {
                    mz_min: 200.0,
                    mz_max: 100.0,
                    multiplier: 1.0,
                }),
                ..Default::default()
            }),
            PipelineError::Config(ConfigError::InvalidMzWindow(200.0, 100.0))
        );
        assert_eq!(
            run(PipelineConfig {
                bracket: BracketParams {
                    max_ppm_deviation: -1.0
                },
                ..Default::default()
            }),
            PipelineError::Config(ConfigError::InvalidTolerance("max_ppm_deviation", -1.0))
        );
        assert_eq!(
            run(PipelineConfig {
                blank_subtraction: Some(BlankSubtraction {
                    blank_group: String::new(),
                    test_groups: vec!["Treated".into()],
                    fold_cutoff: 2.0,
                    pvalue_cutoff: 0.05,
                    min_detected: 3,
                }),
                ..Default::default()
            }),
            PipelineError::Config(ConfigError::EmptyBlankGroup)
        );
    }

    #[test_log::test]
    fn test_run_exports_featureml() {
        let directory = std::env::temp_dir()
            .join(format!("mzbracket-pipeline-{}", std::process::id()))
            .join("consensus");
        let config = PipelineConfigBuilder::new()
            .featureml_directory(&directory)
            .build()
            .unwrap();
        let samples = vec![
            synthetic_sample("run:A", &FEATURES, 21),
            synthetic_sample("B", &FEATURES[..2], 21),
        ];
        let output = Pipeline::new(&config).run(samples, &SampleSheet::new()).unwrap();
        let names = ["run_A.featureML", "B.featureML"];
        for (name, spectrum) in names.iter().zip(output.spectra.iter()) {
            let text = fs::read_to_string(directory.join(name)).unwrap();
            assert_eq!(text.matches("<feature id=").count(), spectrum.len());
            assert_eq!(text.matches("<pt x=").count(), 4 * spectrum.len());
        }
        fs::remove_dir_all(directory.parent().unwrap()).unwrap();
    }

    #[test]
    fn test_export_failure_is_reported() {
        let blocker =
            std::env::temp_dir().join(format!("mzbracket-blocker-{}", std::process::id()));
        fs::write(&blocker, b"not a directory").unwrap();
        let config = PipelineConfigBuilder::new()
            .featureml_directory(blocker.join("consensus"))
            .build()
            .unwrap();
        let err = Pipeline::new(&config)
            .run(vec![synthetic_sample("A", &FEATURES, 21)], &SampleSheet::new())
            .unwrap_err();
        assert!(
            matches!(&err, PipelineError::Export { path, .. } if *path == blocker.join("consensus")),
            "{err}"
        );
        fs::remove_file(&blocker).unwrap();
    }

    #[test]
    fn test_normalization_failures_are_reported() {
        let config = PipelineConfigBuilder::new()
            .normalization(Normalization::InternalStandard {
                mz_min: 899.0,
                mz_max: 899.5,
                multiplier: 1.0,
            })
            .build()
            .unwrap();
        let samples = vec![synthetic_sample("A", &FEATURES, 21)];
        let output = Pipeline::new(&config).run(samples, &SampleSheet::new()).unwrap();
        assert_eq!(output.normalization_failures.len(), 1);
        assert_eq!(output.spectra.len(), 1);
    }
}
