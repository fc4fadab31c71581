pub use crate::clustering::{crude_cluster, reindex_clusters, ClusterRefiner};
pub use crate::consensus::{build_consensus_spectra, collapse_clusters, ConsensusBuilder};
pub use crate::quality::{apply_quality_checks, ClusterQualityCheck};
pub use crate::featureml::FeatureMLWriter;
pub use crate::{bracket_samples, build_data_matrix, Pipeline, PipelineConfigBuilder};
