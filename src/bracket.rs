//! Align consensus peaks across samples into brackets.
//!
//! Bracketing is a single greedy pass over the pooled consensus peaks of every
//! sample. The most intense unassigned peak seeds a new [`Bracket`], which takes
//! every unassigned peak within the PPM tolerance of the seed's mass. A peak's
//! bracket is fixed once assigned and never reconsidered.
use std::collections::HashMap;

use log::{debug, info};
use mzpeaks::Tolerance;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::arrayops::{argsort, argsort_descending, minmax, ppm_spread};
use crate::search::find_between;
use crate::signal::ConsensusSpectrum;

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BracketParams {
    /// The largest PPM distance of a peak from its bracket's seed
    pub max_ppm_deviation: f64,
}

impl Default for BracketParams {
    fn default() -> Self {
        Self {
            max_ppm_deviation: 25.0,
        }
    }
}

/// The time by mass rectangle one sample contributes to a bracket
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SampleHull {
    pub sample: String,
    pub start_time: f64,
    pub end_time: f64,
    /// The smallest uncorrected m/z of the sample's peaks in the bracket
    pub min_mz: f64,
    /// The largest uncorrected m/z of the sample's peaks in the bracket
    pub max_mz: f64,
}

impl SampleHull {
    /// The corners of the rectangle as `(time, mz)` pairs
    pub fn points(&self) -> [(f64, f64); 4] {
        [
            (self.start_time, self.min_mz),
            (self.start_time, self.max_mz),
            (self.end_time, self.max_mz),
            (self.end_time, self.min_mz),
        ]
    }
}

/// A mass window matching one feature across samples
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Bracket {
    /// The position of the bracket in creation order
    pub id: usize,
    pub min_mz: f64,
    pub mean_mz: f64,
    pub max_mz: f64,
    pub ppm_spread: f64,
    /// The number of consensus peaks assigned to the bracket
    pub assigned_count: usize,
    pub unique_sample_count: usize,
    /// One hull per contributing sample, in sample order
    pub sample_hulls: Vec<SampleHull>,
}

impl Bracket {
    /// Whether `mz` lies in the bracket's closed mass window
    #[inline]
    pub fn contains(&self, mz: f64) -> bool {
        self.min_mz <= mz && mz <= self.max_mz
    }

    /// The rectangle spanning `start_time` to `end_time` centered on the mean
    /// mass with a half-width of the bracket's PPM spread, as `(time, mz)` pairs
    pub fn centered_hull(&self, start_time: f64, end_time: f64) -> [(f64, f64); 4] {
        let low = self.mean_mz * (1.0 - self.ppm_spread / 1e6);
        let high = self.mean_mz * (1.0 + self.ppm_spread / 1e6);
        [
            (start_time, low),
            (start_time, high),
            (end_time, high),
            (end_time, low),
        ]
    }
}

/// The consensus peaks of many samples pooled into parallel arrays, remembering
/// which sample each peak came from
#[derive(Debug, Default)]
struct PeakPool {
    mz: Vec<f64>,
    original_mz: Vec<f64>,
    intensity: Vec<f64>,
    sample: Vec<usize>,
}

impl PeakPool {
    fn from_spectra(spectra: &[ConsensusSpectrum]) -> Self {
        let n = spectra.iter().map(|s| s.len()).sum();
        let mut pool = Self {
            mz: Vec::with_capacity(n),
            original_mz: Vec::with_capacity(n),
            intensity: Vec::with_capacity(n),
            sample: Vec::with_capacity(n),
        };
        for (i, spectrum) in spectra.iter().enumerate() {
            for peak in spectrum.iter() {
                pool.mz.push(peak.mz);
                pool.original_mz.push(peak.original_mz);
                pool.intensity.push(peak.intensity);
                pool.sample.push(i);
            }
        }
        pool
    }

    fn len(&self) -> usize {
        self.mz.len()
    }
}

fn summarize(
    id: usize,
    members: &mut [usize],
    pool: &PeakPool,
    spectra: &[ConsensusSpectrum],
) -> Bracket {
    // Sort by sample, then pooled position, so hulls come out in sample order
    members.sort_unstable_by_key(|i| (pool.sample[*i], *i));
    let mz: Vec<f64> = members.iter().map(|i| pool.mz[*i]).collect();
    let (min_mz, max_mz) = minmax(&mz);
    let mean_mz = mz.iter().sum::<f64>() / mz.len() as f64;

    // One hull per sample name, even when its peaks are not adjacent
    let mut sample_hulls: Vec<SampleHull> = Vec::new();
    let mut hull_of: HashMap<&str, usize> = HashMap::new();
    for i in members.iter().copied() {
        let spectrum = &spectra[pool.sample[i]];
        let omz = pool.original_mz[i];
        match hull_of.get(spectrum.sample.as_str()) {
            Some(h) => {
                let hull = &mut sample_hulls[*h];
                hull.min_mz = hull.min_mz.min(omz);
                hull.max_mz = hull.max_mz.max(omz);
                hull.start_time = hull.start_time.min(spectrum.start_time);
                hull.end_time = hull.end_time.max(spectrum.end_time);
            }
            None => {
                hull_of.insert(spectrum.sample.as_str(), sample_hulls.len());
                sample_hulls.push(SampleHull {
                    sample: spectrum.sample.clone(),
                    start_time: spectrum.start_time,
                    end_time: spectrum.end_time,
                    min_mz: omz,
                    max_mz: omz,
                });
            }
        }
    }

    Bracket {
        id,
        min_mz,
        mean_mz,
        max_mz,
        ppm_spread: ppm_spread(min_mz, max_mz, mean_mz),
        assigned_count: members.len(),
        unique_sample_count: sample_hulls.len(),
        sample_hulls,
    }
}

/// Partition the consensus peaks of all `spectra` into [`Bracket`]s, returned in
/// creation order.
///
/// Seeds are taken in descending intensity, the lowest pooled position first among
/// equal intensities. An unassigned peak with mass `x` joins the bracket seeded at
/// `s` when `|s - x| / x * 1e6 <= max_ppm_deviation`.
pub fn bracket_samples(spectra: &[ConsensusSpectrum], params: &BracketParams) -> Vec<Bracket> {
    let pool = PeakPool::from_spectra(spectra);
    let tolerance = Tolerance::PPM(params.max_ppm_deviation);
    let by_intensity = argsort_descending(&pool.intensity);
    let by_mz = argsort(&pool.mz);
    let sorted_mz: Vec<f64> = by_mz.iter().map(|i| pool.mz[*i]).collect();
    let ratio = params.max_ppm_deviation / 1e6;

    let mut assigned = vec![false; pool.len()];
    let mut brackets = Vec::new();
    let mut members = Vec::new();
    for seed in by_intensity {
        if assigned[seed] {
            continue;
        }
        let seed_mz = pool.mz[seed];
        // Every match lies in [s / (1 + r), s / (1 - r)], padded against rounding
        let lo = seed_mz / (1.0 + ratio) * (1.0 - 1e-9);
        let hi = if ratio < 1.0 {
            seed_mz / (1.0 - ratio) * (1.0 + 1e-9)
        } else {
            f64::INFINITY
        };
        let (start, end) = find_between(&sorted_mz, lo, hi);

        members.clear();
        for i in by_mz[start..end].iter().copied() {
            if !assigned[i] && tolerance.test(seed_mz, pool.mz[i]) {
                assigned[i] = true;
                members.push(i);
            }
        }
        if !assigned[seed] {
            assigned[seed] = true;
            members.push(seed);
        }
        let bracket = summarize(brackets.len(), &mut members, &pool, spectra);
        debug!(
            "Bracket {} at {:0.5} holds {} peaks from {} samples",
            bracket.id, bracket.mean_mz, bracket.assigned_count, bracket.unique_sample_count
        );
        brackets.push(bracket);
    }
    info!(
        "Bracketed {} consensus peaks from {} samples into {} brackets",
        pool.len(),
        spectra.len(),
        brackets.len()
    );
    brackets
}

/// Find the bracket whose mean mass is nearest to `mz`, if it is within
/// `max_deviation_ppm` of `mz`
pub fn find_bracket(brackets: &[Bracket], mz: f64, max_deviation_ppm: f64) -> Option<&Bracket> {
    let tolerance = Tolerance::PPM(max_deviation_ppm);
    brackets
        .iter()
        .filter(|b| tolerance.test(b.mean_mz, mz))
        .min_by(|a, b| (a.mean_mz - mz).abs().total_cmp(&(b.mean_mz - mz).abs()))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::signal::ConsensusPeak;

    fn spectrum(name: &str, peaks: &[(f64, f64)], start: f64, end: f64) -> ConsensusSpectrum {
        ConsensusSpectrum::new(
            name,
            peaks
                .iter()
                .map(|(mz, i)| ConsensusPeak::new(*mz, *i, 10))
                .collect(),
            start,
            end,
        )
    }

    #[test_log::test]
    fn test_outlier_gets_own_bracket() {
        let base = 250.0;
        let spectra: Vec<_> = (0..5)
            .map(|i| {
                let mz = base * (1.0 + (i as f64 - 2.0) * 2e-6);
                spectrum(&format!("S{i}"), &[(mz, 100.0 + i as f64)], 0.0, 10.0)
            })
            .chain(std::iter::once(spectrum(
                "S5",
                &[(base * (1.0 + 200e-6), 50.0)],
                0.0,
                10.0,
            )))
            .collect();
        let brackets = bracket_samples(&spectra, &BracketParams::default());
        assert_eq!(brackets.len(), 2);
        assert_eq!(brackets[0].assigned_count, 5);
        assert_eq!(brackets[0].unique_sample_count, 5);
        assert_eq!(brackets[1].assigned_count, 1);
        assert!(brackets[0].ppm_spread < 9.0);
        for b in brackets.iter() {
            assert!(b.contains(b.mean_mz));
        }
    }

    #[test]
    fn test_partition_is_complete() {
        let spectra: Vec<_> = (0..4)
            .map(|i| {
                let peaks: Vec<(f64, f64)> = (0..30)
                    .map(|j| (100.0 + j as f64 * 0.004 + i as f64 * 0.0003, 1.0 + j as f64))
                    .collect();
                spectrum(&format!("S{i}"), &peaks, i as f64, i as f64 + 5.0)
            })
            .collect();
        let brackets = bracket_samples(&spectra, &BracketParams::default());
        let total: usize = brackets.iter().map(|b| b.assigned_count).sum();
        assert_eq!(total, 120);
        for b in brackets.iter() {
            let hull_samples: Vec<&str> = b.sample_hulls.iter().map(|h| h.sample.as_str()).collect();
            let mut sorted = hull_samples.clone();
            sorted.sort();
            sorted.dedup();
            assert_eq!(sorted.len(), hull_samples.len());
            assert_eq!(b.unique_sample_count, hull_samples.len());
        }
    }

    #[test]
    fn test_sample_hulls() {
        let spectra = vec![
            spectrum("B", &[(500.0, 10.0)], 1.0, 4.0),
            ConsensusSpectrum::new(
                "A",
                vec![ConsensusPeak {
                    original_mz: 499.999,
                    ..ConsensusPeak::new(500.001, 20.0, 12)
                }],
                2.0,
                6.0,
            ),
        ];
        let brackets = bracket_samples(&spectra, &BracketParams::default());
        assert_eq!(brackets.len(), 1);
        let b = &brackets[0];
        // Hulls follow the input sample order, not the seed's sample
        assert_eq!(b.sample_hulls[0].sample, "B");
        assert_eq!(b.sample_hulls[1].sample, "A");
        assert_eq!(
            b.sample_hulls[1].points(),
            [(2.0, 499.999), (2.0, 499.999), (6.0, 499.999), (6.0, 499.999)]
        );
        assert_eq!(b.min_mz, 500.0);
        assert_eq!(b.max_mz, 500.001);
        let hull = b.centered_hull(0.0, 100.0);
        assert!(hull[0].1 < b.mean_mz && hull[1].1 > b.mean_mz);
    }

    #[test]
    fn test_sample_hulls_merge_by_name() {
        // Sample A's peaks reach the pool from two spectra with B's peak between them
        let spectra = vec![
            spectrum("A", &[(500.0, 10.0)], 0.0, 5.0),
            spectrum("B", &[(500.001, 30.0)], 0.0, 5.0),
            spectrum("A", &[(500.002, 20.0)], 3.0, 8.0),
        ];
        let brackets = bracket_samples(&spectra, &BracketParams::default());
        assert_eq!(brackets.len(), 1);
        let b = &brackets[0];
        assert_eq!(b.assigned_count, 3);
        assert_eq!(b.unique_sample_count, 2);
        let names: Vec<&str> = b.sample_hulls.iter().map(|h| h.sample.as_str()).collect();
        assert_eq!(names, vec!["A", "B"]);
        assert_eq!(
            b.sample_hulls[0].points(),
            [(0.0, 500.0), (0.0, 500.002), (8.0, 500.002), (8.0, 500.0)]
        );
    }

    #[test]
    fn test_find_bracket() {
        let spectra = vec![spectrum("A", &[(100.0, 1.0), (100.01, 2.0), (300.0, 3.0)], 0.0, 1.0)];
        let brackets = bracket_samples(&spectra, &BracketParams::default());
        assert_eq!(brackets.len(), 3);
        let hit = find_bracket(&brackets, 100.0005, 10.0).unwrap();
        assert_eq!(hit.mean_mz, 100.0);
        assert!(find_bracket(&brackets, 200.0, 10.0).is_none());
    }

    #[test]
    fn test_empty() {
        assert!(bracket_samples(&[], &BracketParams::default()).is_empty());
    }
}
