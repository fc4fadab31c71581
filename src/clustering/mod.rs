//! Partition the signals of one sample into clusters of the same chemical feature.
//!
//! Clustering is carried out in two passes. [`crude_cluster`] splits the mass-sorted
//! signals wherever two neighbors are further apart than a PPM threshold, and
//! [`ClusterRefiner`] re-partitions every crude cluster into tight sub-clusters by
//! greedy growth from the most intense signal.
//!
//! Cluster assignments are carried as one [`ClusterId`] per signal, in the order
//! the signals were given. Signals removed by a quality filter carry [`EXCLUDED`].
//!
//! ```rust
//! use mzbracket::clustering::{crude_cluster, reindex_clusters, ClusterRefiner};
//!
//! let mz = [100.0, 200.0, 100.0005, 100.0002];
//! let intensity = [10.0, 5.0, 3.0, 8.0];
//! let crude = crude_cluster(&mz, 30.0);
//! assert_eq!(crude, vec![0, 1, 0, 0]);
//!
//! let refined = ClusterRefiner::default().refine(&mz, &intensity, &crude);
//! assert_eq!(refined.len(), mz.len());
//! assert_eq!(reindex_clusters(&[0, 0, 3, 7, 3]), vec![0, 0, 1, 2, 1]);
//! ```
use std::collections::BTreeMap;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::arrayops::ppm_spread;

mod crude;
mod refine;

pub use crude::crude_cluster;
pub use refine::{ClusterRefiner, RefinerParams};

/// The cluster a signal is assigned to
pub type ClusterId = i64;

/// The sentinel cluster id of a signal which has been excluded from any cluster
pub const EXCLUDED: ClusterId = -1;

/// Relabel cluster ids densely as `0..k` in ascending order of the original id
/// values, so that `[0, 0, 0, 1, 2, 4, 4, 4, 5, 6]` becomes `[0, 0, 0, 1, 2, 3, 3, 3, 4, 5]`.
///
/// [`EXCLUDED`] signals keep their sentinel and do not take up a rank.
pub fn reindex_clusters(ids: &[ClusterId]) -> Vec<ClusterId> {
    let mut distinct: Vec<ClusterId> = ids.iter().copied().filter(|i| *i >= 0).collect();
    distinct.sort_unstable();
    distinct.dedup();
    ids.iter()
        .map(|id| {
            if *id < 0 {
                EXCLUDED
            } else {
                // Every non-negative id is present in `distinct`
                distinct.binary_search(id).unwrap_or_default() as ClusterId
            }
        })
        .collect()
}

/// Count the members of each cluster, excluding [`EXCLUDED`] signals
pub fn cluster_sizes(ids: &[ClusterId]) -> BTreeMap<ClusterId, usize> {
    let mut sizes = BTreeMap::new();
    for id in ids.iter().filter(|i| **i >= 0) {
        *sizes.entry(*id).or_default() += 1;
    }
    sizes
}

/// Count the distinct clusters, excluding [`EXCLUDED`] signals
pub fn count_clusters(ids: &[ClusterId]) -> usize {
    cluster_sizes(ids).len()
}

/// Group the signal positions of every cluster, in ascending cluster id order. The
/// positions of each cluster are in ascending order.
pub fn cluster_members(ids: &[ClusterId]) -> BTreeMap<ClusterId, Vec<usize>> {
    let mut members: BTreeMap<ClusterId, Vec<usize>> = BTreeMap::new();
    for (i, id) in ids.iter().enumerate() {
        if *id >= 0 {
            members.entry(*id).or_default().push(i);
        }
    }
    members
}

/// Mark every member of a cluster with fewer than `min_signals` members as [`EXCLUDED`].
///
/// Returns the number of clusters removed.
pub fn exclude_small_clusters(ids: &mut [ClusterId], min_signals: usize) -> usize {
    let sizes = cluster_sizes(ids);
    let removed = sizes.values().filter(|n| **n < min_signals).count();
    if removed == 0 {
        return 0;
    }
    for id in ids.iter_mut() {
        if *id >= 0 && sizes[&*id] < min_signals {
            *id = EXCLUDED;
        }
    }
    removed
}

/// Summary statistics of the signals in one cluster
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ClusterDescription {
    pub id: ClusterId,
    pub count: usize,
    pub min_mz: f64,
    /// The unweighted mean m/z
    pub mean_mz: f64,
    pub max_mz: f64,
    pub ppm_spread: f64,
    pub total_intensity: f64,
}

/// Describe every cluster in ascending cluster id order
pub fn describe_clusters(
    mz: &[f64],
    intensity: &[f64],
    ids: &[ClusterId],
) -> Vec<ClusterDescription> {
    cluster_members(ids)
        .into_iter()
        .map(|(id, members)| {
            let mut min_mz = f64::INFINITY;
            let mut max_mz = f64::NEG_INFINITY;
            let mut total_mz = 0.0;
            let mut total_intensity = 0.0;
            for i in members.iter().copied() {
                min_mz = min_mz.min(mz[i]);
                max_mz = max_mz.max(mz[i]);
                total_mz += mz[i];
                total_intensity += intensity[i];
            }
            let mean_mz = total_mz / members.len() as f64;
            ClusterDescription {
                id,
                count: members.len(),
                min_mz,
                mean_mz,
                max_mz,
                ppm_spread: ppm_spread(min_mz, max_mz, mean_mz),
                total_intensity,
            }
        })
        .collect()
}
