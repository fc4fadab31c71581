//! Cluster-level quality filters applied after refinement.
//!
//! A filter inspects every cluster of a sample's [`SignalTable`] and marks the
//! members of failing clusters as [`EXCLUDED`]. Filters implement
//! [`ClusterQualityCheck`] and are composed in order by [`apply_quality_checks`].
use std::fmt::Debug;

use log::{debug, warn};
use statrs::distribution::{Continuous, Normal};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::arrayops::{pearson_correlation, ppm_deviation, weighted_mean, weighted_std_dev};
use crate::clustering::{cluster_members, ClusterId, EXCLUDED};
use crate::search::find_between;
use crate::signal::SignalTable;

/// A predicate over the clusters of one sample
pub trait ClusterQualityCheck: Debug + Send + Sync {
    fn name(&self) -> &str;

    /// Mark the members of every failing cluster in `ids` as [`EXCLUDED`],
    /// returning the number of clusters removed.
    fn apply(&self, signals: &SignalTable, ids: &mut [ClusterId]) -> usize;
}

fn exclude(ids: &mut [ClusterId], members: &[usize]) {
    for i in members {
        ids[*i] = EXCLUDED;
    }
}

/// Requires a cluster's elution trace to resemble a single peak over the
/// sample's acquisition window.
///
/// The trace holds one point per spectrum of the sample, including spectra
/// without signal, and sums the intensity of the cluster's signals acquired at
/// that spectrum's time. It is compared by Pearson correlation against a normal
/// density centered on the mean spectrum time whose standard deviation is a
/// sixth of the acquisition window's width. Clusters correlating below
/// `min_correlation` are removed. A cluster whose correlation is undefined,
/// such as one with a constant trace, is kept.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PeakShapeCheck {
    pub min_correlation: f64,
}

impl Default for PeakShapeCheck {
    fn default() -> Self {
        Self {
            min_correlation: 0.5,
        }
    }
}

impl PeakShapeCheck {
    pub fn new(min_correlation: f64) -> Self {
        Self { min_correlation }
    }

    /// The reference elution profile evaluated at `times`, in any order, or `None`
    /// when the times span no width
    pub fn reference_trace(times: &[f64]) -> Option<Vec<f64>> {
        if times.is_empty() {
            return None;
        }
        let (lo, hi) = times
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), t| (lo.min(*t), hi.max(*t)));
        let width = hi - lo;
        if !(width > 0.0) {
            return None;
        }
        let center = times.iter().sum::<f64>() / times.len() as f64;
        let dist = Normal::new(center, width / 6.0).ok()?;
        Some(times.iter().map(|t| dist.pdf(*t)).collect())
    }
}

impl ClusterQualityCheck for PeakShapeCheck {
    fn name(&self) -> &str {
        "peak shape"
    }

    fn apply(&self, signals: &SignalTable, ids: &mut [ClusterId]) -> usize {
        let times = &signals.spectrum_times;
        let reference = match Self::reference_trace(times) {
            Some(reference) => reference,
            None => {
                warn!(
                    "Sample spans no acquisition time ({} spectra), skipping the peak shape check",
                    times.len()
                );
                return 0;
            }
        };
        let mut order: Vec<usize> = (0..times.len()).collect();
        order.sort_by(|a, b| times[*a].total_cmp(&times[*b]));
        let sorted: Vec<f64> = order.iter().map(|k| times[*k]).collect();
        // A signal counts toward every spectrum acquired at its time
        let bins: Vec<&[usize]> = signals
            .time
            .iter()
            .map(|t| {
                let (lo, hi) = find_between(&sorted, *t, *t);
                &order[lo..hi]
            })
            .collect();

        let mut trace = vec![0.0; times.len()];
        let mut removed = 0;
        for (id, members) in cluster_members(ids) {
            trace.iter_mut().for_each(|v| *v = 0.0);
            for i in members.iter().copied() {
                for k in bins[i] {
                    trace[*k] += signals.intensity[i];
                }
            }
            let corr = pearson_correlation(&trace, &reference);
            if corr < self.min_correlation {
                debug!("Cluster {id} fails the peak shape check with r = {corr:0.3}");
                exclude(ids, &members);
                removed += 1;
            }
        }
        removed
    }
}

/// Limits the intensity-weighted mass dispersion of a cluster.
///
/// Each signal's deviation from the cluster's intensity-weighted mean mass is
/// expressed in PPM, and the reliability-weighted standard deviation of those
/// deviations must not exceed `max_weighted_ppm_deviation`.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PPMDeviationCheck {
    pub max_weighted_ppm_deviation: f64,
}

impl Default for PPMDeviationCheck {
    fn default() -> Self {
        Self {
            max_weighted_ppm_deviation: 15.0,
        }
    }
}

impl PPMDeviationCheck {
    pub fn new(max_weighted_ppm_deviation: f64) -> Self {
        Self {
            max_weighted_ppm_deviation,
        }
    }

    /// The weighted PPM standard deviation of a set of signals, `None` if their
    /// intensities sum to zero
    pub fn weighted_ppm_deviation(mz: &[f64], intensity: &[f64]) -> Option<f64> {
        let center = weighted_mean(mz, intensity)?;
        let ppms: Vec<f64> = mz.iter().map(|m| ppm_deviation(*m, center)).collect();
        weighted_std_dev(&ppms, intensity)
    }
}

impl ClusterQualityCheck for PPMDeviationCheck {
    fn name(&self) -> &str {
        "weighted ppm deviation"
    }

    fn apply(&self, signals: &SignalTable, ids: &mut [ClusterId]) -> usize {
        let mut removed = 0;
        let mut mz = Vec::new();
        let mut intensity = Vec::new();
        for (id, members) in cluster_members(ids) {
            mz.clear();
            intensity.clear();
            mz.extend(members.iter().map(|i| signals.mz[*i]));
            intensity.extend(members.iter().map(|i| signals.intensity[*i]));
            match Self::weighted_ppm_deviation(&mz, &intensity) {
                Some(dev) if dev > self.max_weighted_ppm_deviation => {
                    debug!("Cluster {id} fails the ppm deviation check at {dev:0.3} ppm");
                    exclude(ids, &members);
                    removed += 1;
                }
                Some(_) => {}
                None => {
                    warn!("Cluster {id} has no intensity, skipping the ppm deviation check");
                }
            }
        }
        removed
    }
}

/// Apply each check in turn, returning the total number of clusters removed
pub fn apply_quality_checks<C: AsRef<dyn ClusterQualityCheck>>(
    checks: &[C],
    signals: &SignalTable,
    ids: &mut [ClusterId],
) -> usize {
    checks
        .iter()
        .map(|check| {
            let check = check.as_ref();
            let removed = check.apply(signals, ids);
            debug!("The {} check removed {removed} clusters", check.name());
            removed
        })
        .sum()
}
