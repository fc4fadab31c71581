//! Build one consensus spectrum per sample.
//!
//! The per-sample stage pools every signal of a [`Sample`], clusters them by mass
//! with [`crude_cluster`] and [`ClusterRefiner`], discards clusters that are too
//! small or fail a [`ClusterQualityCheck`], and collapses each surviving cluster
//! into a single [`ConsensusPeak`].
//!
//! Samples are independent of one another, so [`build_consensus_spectra`] processes
//! them concurrently when the `parallelism` feature is enabled.
use std::fmt::{self, Display};
use std::str::FromStr;
use std::sync::Arc;

use log::{debug, info, warn};
use thiserror::Error;

#[cfg(feature = "parallelism")]
use rayon::prelude::*;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::arrayops::{minmax, weighted_mean};
use crate::clustering::{
    cluster_members, count_clusters, crude_cluster, exclude_small_clusters, reindex_clusters,
    ClusterId, ClusterRefiner, RefinerParams,
};
use crate::pipeline::ConfigError;
use crate::quality::{apply_quality_checks, ClusterQualityCheck};
use crate::signal::{ConsensusPeak, ConsensusSpectrum, Sample, SignalTable};

/// How the intensities of a cluster's signals combine into its consensus intensity
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum IntensityAggregation {
    #[default]
    Sum,
    Average,
    /// The largest intensity of any signal in the cluster
    Max,
}

impl IntensityAggregation {
    pub fn aggregate(&self, intensities: &[f64]) -> f64 {
        match self {
            Self::Sum => intensities.iter().sum(),
            Self::Average => intensities.iter().sum::<f64>() / intensities.len() as f64,
            Self::Max => minmax(intensities).1,
        }
    }
}

impl FromStr for IntensityAggregation {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "sum" => Ok(Self::Sum),
            "average" | "mean" => Ok(Self::Average),
            "max" => Ok(Self::Max),
            _ => Err(ConfigError::UnknownAggregation(s.to_string())),
        }
    }
}

impl Display for IntensityAggregation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Sum => "sum",
            Self::Average => "average",
            Self::Max => "max",
        };
        f.write_str(name)
    }
}

/// Collapse every cluster of `signals` into a [`ConsensusPeak`], sorted by ascending m/z.
///
/// The consensus mass is the intensity weighted mean of the cluster's masses.
/// Clusters whose intensities sum to zero have no weighted mass and are skipped.
pub fn collapse_clusters(
    signals: &SignalTable,
    ids: &[ClusterId],
    aggregation: IntensityAggregation,
) -> Vec<ConsensusPeak> {
    let mut mz = Vec::new();
    let mut original_mz = Vec::new();
    let mut intensity = Vec::new();
    let mut peaks: Vec<ConsensusPeak> = cluster_members(ids)
        .into_iter()
        .filter_map(|(id, members)| {
            mz.clear();
            original_mz.clear();
            intensity.clear();
            for i in members.iter().copied() {
                mz.push(signals.mz[i]);
                original_mz.push(signals.original_mz[i]);
                intensity.push(signals.intensity[i]);
            }
            let center = match weighted_mean(&mz, &intensity) {
                Some(center) => center,
                None => {
                    warn!("Cluster {id} has no intensity and cannot be collapsed");
                    return None;
                }
            };
            let (min_mz, max_mz) = minmax(&mz);
            let mut peak = ConsensusPeak::new(center, aggregation.aggregate(&intensity), mz.len());
            peak.min_mz = min_mz;
            peak.max_mz = max_mz;
            peak.original_mz = weighted_mean(&original_mz, &intensity).unwrap_or(center);
            Some(peak)
        })
        .collect();
    peaks.sort_by(|a, b| a.mz.total_cmp(&b.mz));
    peaks
}

/// All the ways building a consensus spectrum can fail
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConsensusError {
    #[error("Sample {0} has no spectra")]
    NoSpectra(String),
    #[error("A spectrum of sample {0} has m/z and intensity arrays of different lengths")]
    ArrayLengthMismatch(String),
    #[error("No cluster of sample {0} survived filtering")]
    NoClusters(String),
}

/// Parameters of the per-sample stage
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ConsensusParams {
    /// The PPM gap between neighboring masses that starts a new crude cluster
    pub min_difference_ppm: f64,
    /// Clusters with fewer signals are discarded after each clustering pass
    pub min_signals_per_cluster: usize,
    pub refiner: RefinerParams,
    pub aggregation: IntensityAggregation,
}

impl Default for ConsensusParams {
    fn default() -> Self {
        Self {
            min_difference_ppm: 30.0,
            min_signals_per_cluster: 10,
            refiner: RefinerParams::default(),
            aggregation: IntensityAggregation::Sum,
        }
    }
}

impl ConsensusParams {
    pub fn validate(&self) -> Result<(), ConfigError> {
        fn tolerance(name: &'static str, value: f64) -> Result<(), ConfigError> {
            if value.is_finite() && value >= 0.0 {
                Ok(())
            } else {
                Err(ConfigError::InvalidTolerance(name, value))
            }
        }
        tolerance("min_difference_ppm", self.min_difference_ppm)?;
        tolerance(
            "closest_signal_max_deviation_ppm",
            self.refiner.closest_signal_max_deviation_ppm,
        )?;
        if let Some(value) = self.refiner.max_mz_deviation_ppm {
            tolerance("max_mz_deviation_ppm", value)?;
        }
        Ok(())
    }
}

/// The cluster counts seen while building one consensus spectrum
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ConsensusSummary {
    pub sample: String,
    pub spectra: usize,
    pub signals: usize,
    pub crude_clusters: usize,
    pub crude_clusters_kept: usize,
    pub refined_clusters: usize,
    pub refined_clusters_kept: usize,
    pub quality_removed: usize,
    pub final_clusters: usize,
}

impl Display for ConsensusSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} spectra, {} signals, {} crude clusters ({} kept), {} refined clusters ({} kept), {} removed by quality checks, {} consensus peaks",
            self.sample,
            self.spectra,
            self.signals,
            self.crude_clusters,
            self.crude_clusters_kept,
            self.refined_clusters,
            self.refined_clusters_kept,
            self.quality_removed,
            self.final_clusters
        )
    }
}

/// Runs the per-sample stage with a fixed set of parameters
#[derive(Debug, Clone, Default)]
pub struct ConsensusBuilder {
    pub params: ConsensusParams,
}

impl From<ConsensusParams> for ConsensusBuilder {
    fn from(params: ConsensusParams) -> Self {
        Self::new(params)
    }
}

impl ConsensusBuilder {
    pub fn new(params: ConsensusParams) -> Self {
        Self { params }
    }

    /// Build the consensus spectrum of `sample`, filtering clusters with each of `checks` in turn
    pub fn build<C: AsRef<dyn ClusterQualityCheck>>(
        &self,
        sample: &Sample,
        checks: &[C],
    ) -> Result<(ConsensusSpectrum, ConsensusSummary), ConsensusError> {
        if sample.is_empty() {
            return Err(ConsensusError::NoSpectra(sample.name.clone()));
        }
        let mut signals = SignalTable::from_sample(sample)
            .ok_or_else(|| ConsensusError::ArrayLengthMismatch(sample.name.clone()))?;
        let mut summary = ConsensusSummary {
            sample: sample.name.clone(),
            spectra: sample.len(),
            signals: signals.len(),
            ..Default::default()
        };
        let min_signals = self.params.min_signals_per_cluster;

        let mut ids = crude_cluster(&signals.mz, self.params.min_difference_ppm);
        summary.crude_clusters = count_clusters(&ids);
        exclude_small_clusters(&mut ids, min_signals);
        let mask: Vec<bool> = ids.iter().map(|i| *i >= 0).collect();
        signals.retain_mask(&mask);
        ids.retain(|i| *i >= 0);
        let ids = reindex_clusters(&ids);
        summary.crude_clusters_kept = count_clusters(&ids);
        debug!(
            "{}: kept {} of {} signals in crude clusters",
            sample.name,
            signals.len(),
            summary.signals
        );

        let refiner = ClusterRefiner::new(self.params.refiner);
        let mut ids = refiner.refine(&signals.mz, &signals.intensity, &ids);
        summary.refined_clusters = count_clusters(&ids);
        exclude_small_clusters(&mut ids, min_signals);
        summary.refined_clusters_kept = count_clusters(&ids);

        summary.quality_removed = apply_quality_checks(checks, &signals, &mut ids);
        let ids = reindex_clusters(&ids);
        if count_clusters(&ids) == 0 {
            return Err(ConsensusError::NoClusters(sample.name.clone()));
        }

        // Clusters without intensity collapse to nothing
        let peaks = collapse_clusters(&signals, &ids, self.params.aggregation);
        summary.final_clusters = peaks.len();
        if peaks.is_empty() {
            return Err(ConsensusError::NoClusters(sample.name.clone()));
        }
        let spectrum =
            ConsensusSpectrum::new(&sample.name, peaks, signals.start_time, signals.end_time);
        info!("{summary}");
        Ok((spectrum, summary))
    }
}

pub type ConsensusResult = Result<(ConsensusSpectrum, ConsensusSummary), ConsensusError>;

fn build_one(
    builder: &ConsensusBuilder,
    sample: &Sample,
    checks: &[Arc<dyn ClusterQualityCheck>],
) -> ConsensusResult {
    let result = builder.build(sample, checks);
    if let Err(e) = &result {
        warn!("Failed to build a consensus spectrum: {e}");
    }
    result
}

cfg_if::cfg_if! {
    if #[cfg(feature = "parallelism")] {
        /// Build the consensus spectrum of every sample, in the order of `samples`.
        ///
        /// Samples are processed on the `rayon` thread pool. A failing sample is
        /// logged and reported in its slot without affecting the others.
        pub fn build_consensus_spectra(
            samples: &[Sample],
            builder: &ConsensusBuilder,
            checks: &[Arc<dyn ClusterQualityCheck>],
        ) -> Vec<ConsensusResult> {
            samples
                .par_iter()
                .map(|sample| build_one(builder, sample, checks))
                .collect()
        }
    } else {
        /// Build the consensus spectrum of every sample, in the order of `samples`.
        ///
        /// A failing sample is logged and reported in its slot without affecting
        /// the others.
        pub fn build_consensus_spectra(
            samples: &[Sample],
            builder: &ConsensusBuilder,
            checks: &[Arc<dyn ClusterQualityCheck>],
        ) -> Vec<ConsensusResult> {
            samples
                .iter()
                .map(|sample| build_one(builder, sample, checks))
                .collect()
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::clustering::EXCLUDED;
    use crate::quality::{PPMDeviationCheck, PeakShapeCheck};
    use crate::signal::Spectrum;
    use crate::test_data::{synthetic_sample, FEATURES};

    use rstest::{fixture, rstest};

    #[fixture]
    fn checks() -> Vec<Arc<dyn ClusterQualityCheck>> {
        vec![
            Arc::new(PeakShapeCheck::default()),
            Arc::new(PPMDeviationCheck::default()),
        ]
    }

    #[rstest]
    #[case("sum", IntensityAggregation::Sum)]
    #[case("Average", IntensityAggregation::Average)]
    #[case("mean", IntensityAggregation::Average)]
    #[case(" max ", IntensityAggregation::Max)]
    fn test_parse_aggregation(#[case] name: &str, #[case] expected: IntensityAggregation) {
        assert_eq!(name.parse::<IntensityAggregation>().unwrap(), expected);
    }

    #[test]
    fn test_parse_aggregation_unknown() {
        assert!(matches!(
            "median".parse::<IntensityAggregation>(),
            Err(ConfigError::UnknownAggregation(_))
        ));
    }

    fn two_cluster_table() -> (SignalTable, Vec<ClusterId>) {
        let sample = Sample::new(
            "A",
            vec![
                Spectrum::new(0.0, vec![100.0, 200.0], vec![1.0, 4.0]),
                Spectrum::new(1.0, vec![100.002, 200.0], vec![3.0, 0.0])
                    .with_original_mz(vec![100.0, 200.0]),
                Spectrum::new(2.0, vec![300.0], vec![0.0]),
            ],
        );
        let table = SignalTable::from_sample(&sample).unwrap();
        (table, vec![0, 1, 0, 1, 2])
    }

    #[rstest]
    #[case(IntensityAggregation::Sum, 4.0)]
    #[case(IntensityAggregation::Average, 2.0)]
    #[case(IntensityAggregation::Max, 3.0)]
    fn test_collapse(#[case] aggregation: IntensityAggregation, #[case] expected: f64) {
        let (table, ids) = two_cluster_table();
        let peaks = collapse_clusters(&table, &ids, aggregation);
        // The zero-intensity cluster at m/z 300 is skipped
        assert_eq!(peaks.len(), 2);
        let first = &peaks[0];
        assert!((first.mz - 100.0015).abs() < 1e-9);
        assert!((first.original_mz - 100.0).abs() < 1e-9);
        assert_eq!(first.signal_count, 2);
        assert_eq!(first.min_mz, 100.0);
        assert_eq!(first.max_mz, 100.002);
        assert_eq!(first.intensity, expected);
        assert_eq!(peaks[1].mz, 200.0);
    }

    #[rstest]
    #[case(IntensityAggregation::Sum, 4.0)]
    #[case(IntensityAggregation::Average, 2.0)]
    #[case(IntensityAggregation::Max, 3.0)]
    fn test_collapse_weighted_mass(
        #[case] aggregation: IntensityAggregation,
        #[case] expected: f64,
    ) {
        let sample = Sample::new(
            "A",
            vec![
                Spectrum::new(0.0, vec![100.0], vec![1.0]),
                Spectrum::new(1.0, vec![100.0002], vec![3.0]),
            ],
        );
        let table = SignalTable::from_sample(&sample).unwrap();
        let peaks = collapse_clusters(&table, &[0, 0], aggregation);
        assert_eq!(peaks.len(), 1);
        assert!((peaks[0].mz - 100.00015).abs() < 1e-9, "{}", peaks[0].mz);
        assert_eq!(peaks[0].intensity, expected);
        assert_eq!(peaks[0].signal_count, 2);
    }

    #[rstest]
    #[case(IntensityAggregation::Sum)]
    #[case(IntensityAggregation::Average)]
    #[case(IntensityAggregation::Max)]
    fn test_collapse_skips_zero_intensity(#[case] aggregation: IntensityAggregation) {
        let (table, _) = two_cluster_table();
        let peaks = collapse_clusters(
            &table,
            &[EXCLUDED, EXCLUDED, EXCLUDED, EXCLUDED, 0],
            aggregation,
        );
        assert!(peaks.is_empty());
        let peaks = collapse_clusters(&table, &[0, EXCLUDED, 0, EXCLUDED, 1], aggregation);
        assert_eq!(peaks.len(), 1);
        assert!((peaks[0].mz - 100.0015).abs() < 1e-9);
    }

    #[test]
    fn test_collapse_ignores_excluded() {
        let (table, _) = two_cluster_table();
        let peaks = collapse_clusters(
            &table,
            &[EXCLUDED, 1, EXCLUDED, 1, EXCLUDED],
            IntensityAggregation::Sum,
        );
        assert_eq!(peaks.len(), 1);
        assert_eq!(peaks[0].intensity, 4.0);
    }

    #[rstest]
    #[test_log::test]
    fn test_build(checks: Vec<Arc<dyn ClusterQualityCheck>>) {
        let sample = synthetic_sample("A", &FEATURES, 21);
        let builder = ConsensusBuilder::default();
        let (spectrum, summary) = builder.build(&sample, &checks).unwrap();
        assert_eq!(summary.spectra, 21);
        assert_eq!(summary.signals, 21 * 4);
        assert_eq!(summary.crude_clusters, 3 + 21);
        assert_eq!(summary.crude_clusters_kept, 3);
        assert_eq!(summary.final_clusters, 3);
        assert_eq!(spectrum.len(), 3);
        assert_eq!(spectrum.start_time, 0.0);
        assert_eq!(spectrum.end_time, 10.0);
        for (peak, (mz, _)) in spectrum.iter().zip(FEATURES.iter()) {
            assert!(((peak.mz - mz) / mz * 1e6).abs() < 1.0, "{peak}");
            assert!(peak.signal_count >= 10);
        }
        assert!(spectrum.peaks[2].intensity > spectrum.peaks[1].intensity);
    }

    #[test]
    fn test_build_errors() {
        let builder = ConsensusBuilder::default();
        let checks: Vec<Arc<dyn ClusterQualityCheck>> = Vec::new();
        assert_eq!(
            builder.build(&Sample::new("E", vec![]), &checks),
            Err(ConsensusError::NoSpectra("E".into()))
        );
        let bad = Sample::new("B", vec![Spectrum::new(0.0, vec![100.0], vec![])]);
        assert_eq!(
            builder.build(&bad, &checks),
            Err(ConsensusError::ArrayLengthMismatch("B".into()))
        );
        let sparse = Sample::new("S", vec![Spectrum::new(0.0, vec![100.0], vec![1.0])]);
        assert_eq!(
            builder.build(&sparse, &checks),
            Err(ConsensusError::NoClusters("S".into()))
        );
    }

    #[test_log::test]
    fn test_build_without_intensity() {
        let builder = ConsensusBuilder::new(ConsensusParams {
            min_signals_per_cluster: 3,
            ..Default::default()
        });
        let checks: Vec<Arc<dyn ClusterQualityCheck>> = Vec::new();
        let silent = Sample::new(
            "Z",
            (0..5)
                .map(|k| Spectrum::new(k as f64, vec![100.0], vec![0.0]))
                .collect(),
        );
        assert_eq!(
            builder.build(&silent, &checks),
            Err(ConsensusError::NoClusters("Z".into()))
        );
    }

    #[rstest]
    #[test_log::test]
    fn test_build_many_preserves_order(checks: Vec<Arc<dyn ClusterQualityCheck>>) {
        let samples = vec![
            synthetic_sample("A", &FEATURES, 21),
            Sample::new("empty", vec![]),
            synthetic_sample("C", &FEATURES[..2], 21),
        ];
        let results = build_consensus_spectra(&samples, &ConsensusBuilder::default(), &checks);
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].as_ref().unwrap().0.sample, "A");
        assert!(results[1].is_err());
        assert_eq!(results[2].as_ref().unwrap().0.len(), 2);
    }
}
