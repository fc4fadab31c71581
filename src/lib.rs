//! `mzbracket` turns the spectra of direct-infusion mass spectrometry samples into
//! one consensus spectrum per sample, aligns those consensus spectra across
//! samples into brackets, and builds a sample by feature intensity matrix that
//! can be filtered against blank samples.
//!
//! The per-sample stage is driven by [`ConsensusBuilder`]. It clusters the pooled
//! signals of a [`Sample`] by mass with [`clustering::crude_cluster`] and
//! [`ClusterRefiner`], filters clusters with [`ClusterQualityCheck`]s, and
//! collapses each surviving cluster into a [`ConsensusPeak`]. The cross-sample
//! stages are [`bracket_samples`], [`build_data_matrix`] and [`BlankSubtraction`].
//! [`Pipeline`] runs them all from a [`PipelineConfig`].
//!
//! # Usage
//! ```
//! use std::sync::Arc;
//!
//! use mzbracket::{ClusterQualityCheck, ConsensusBuilder, ConsensusParams, Sample, Spectrum};
//!
//! let spectra = (0..5)
//!     .map(|k| Spectrum::new(k as f64, vec![100.0 + k as f64 * 1e-5, 250.0], vec![10.0, 5.0]))
//!     .collect();
//! let sample = Sample::new("A", spectra);
//! let params = ConsensusParams {
//!     min_signals_per_cluster: 3,
//!     ..Default::default()
//! };
//! let checks: Vec<Arc<dyn ClusterQualityCheck>> = Vec::new();
//! let (spectrum, summary) = ConsensusBuilder::new(params).build(&sample, &checks).unwrap();
//! assert_eq!(spectrum.len(), 2);
//! assert_eq!(summary.crude_clusters, 2);
//! for peak in spectrum.iter() {
//!     println!("{}", peak);
//! }
//! ```
//!
//! ## Features
//! - `parallelism` (default) builds the consensus spectra of different samples
//!   concurrently with `rayon`.
//! - `serde` makes parameters and results serializable.
pub mod arrayops;
pub mod blank;
pub mod bracket;
pub mod clustering;
pub mod consensus;
pub mod featureml;
pub mod matrix;
pub mod metadata;
pub mod pipeline;
pub mod prelude;
pub mod preprocess;
pub mod quality;
pub mod search;
pub mod signal;
pub mod text;

#[cfg(test)]
mod test_data;

pub use crate::blank::{BlankSubtraction, BlankSubtractionBuilder, BlankSubtractionResult};
pub use crate::bracket::{bracket_samples, Bracket, BracketParams, SampleHull};
pub use crate::clustering::{ClusterId, ClusterRefiner, RefinerParams, EXCLUDED};
pub use crate::consensus::{
    ConsensusBuilder, ConsensusError, ConsensusParams, ConsensusSummary, IntensityAggregation,
};
pub use crate::matrix::{build_data_matrix, DataMatrix, MatrixError};
pub use crate::metadata::{SampleMetadata, SampleSheet};
pub use crate::pipeline::{
    ConfigError, Pipeline, PipelineConfig, PipelineConfigBuilder, PipelineError, PipelineOutput,
};
pub use crate::quality::{ClusterQualityCheck, PPMDeviationCheck, PeakShapeCheck};
pub use crate::signal::{ConsensusPeak, ConsensusSpectrum, Sample, SignalTable, Spectrum};
