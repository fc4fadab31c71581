//! The sample by bracket intensity matrix.
//!
//! Rows are samples and columns are brackets. A cell holds the summed intensity of
//! the sample's consensus peaks inside the bracket's mass window, or NaN when the
//! sample has no peak there. Zero intensity and "not detected" are kept distinct.
use std::collections::{BTreeMap, HashSet};
use std::fmt::{self, Display};

use log::{info, warn};
use nalgebra::DMatrix;
use thiserror::Error;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::arrayops::relative_std_dev;
use crate::bracket::Bracket;
use crate::search::find_between;
use crate::signal::ConsensusSpectrum;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum MatrixError {
    #[error("Sample {0} appears more than once")]
    DuplicateSample(String),
    #[error("Expected {expected} group labels, one per sample, but found {found}")]
    LabelMismatch { expected: usize, found: usize },
    #[error("Expected a mask of {expected} features but found {found}")]
    MaskMismatch { expected: usize, found: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub struct DataMatrix {
    pub sample_names: Vec<String>,
    pub brackets: Vec<Bracket>,
    /// One row per sample, one column per bracket
    pub values: DMatrix<f64>,
}

/// Sum the intensities of each sample's consensus peaks within each bracket's
/// mass window, inclusive at both ends
pub fn build_data_matrix(
    spectra: &[ConsensusSpectrum],
    brackets: &[Bracket],
) -> Result<DataMatrix, MatrixError> {
    let mut seen = HashSet::with_capacity(spectra.len());
    for spectrum in spectra {
        if !seen.insert(spectrum.sample.as_str()) {
            return Err(MatrixError::DuplicateSample(spectrum.sample.clone()));
        }
    }

    let mut values = DMatrix::from_element(spectra.len(), brackets.len(), f64::NAN);
    for (i, spectrum) in spectra.iter().enumerate() {
        let mz = spectrum.mz_array();
        for (j, bracket) in brackets.iter().enumerate() {
            let (start, end) = find_between(&mz, bracket.min_mz, bracket.max_mz);
            if start < end {
                values[(i, j)] = spectrum.peaks[start..end].iter().map(|p| p.intensity).sum();
            }
        }
    }
    let matrix = DataMatrix {
        sample_names: spectra.iter().map(|s| s.sample.clone()).collect(),
        brackets: brackets.to_vec(),
        values,
    };
    info!(
        "Built a data matrix of {} samples and {} features with {} detections",
        matrix.n_samples(),
        matrix.n_features(),
        matrix.values.iter().filter(|v| !v.is_nan()).count()
    );
    Ok(matrix)
}

/// How often each group detects the features of a [`DataMatrix`]
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DetectionOverview {
    pub n_samples: usize,
    pub n_features: usize,
    /// Features missing in at least one sample
    pub features_with_missing: usize,
    /// For each group, its sample count and the number of features detected in
    /// exactly `k` of its samples at position `k`
    pub groups: BTreeMap<String, (usize, Vec<usize>)>,
}

impl Display for DetectionOverview {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} features in {} samples, {} with at least one missing value",
            self.n_features, self.n_samples, self.features_with_missing
        )?;
        for (group, (n, histogram)) in self.groups.iter() {
            let detected: usize = histogram.iter().skip(1).sum();
            write!(f, "{group:>30} ({n:>3})")?;
            for count in histogram {
                write!(f, " {count:>8}")?;
            }
            writeln!(f, " {detected:>8}")?;
        }
        Ok(())
    }
}

impl DataMatrix {
    pub fn n_samples(&self) -> usize {
        self.values.nrows()
    }

    pub fn n_features(&self) -> usize {
        self.values.ncols()
    }

    pub fn sample_index(&self, sample: &str) -> Option<usize> {
        self.sample_names.iter().position(|s| s == sample)
    }

    /// The non-missing values of `feature` among the sample rows in `rows`
    pub fn detected_values(&self, feature: usize, rows: &[usize]) -> Vec<f64> {
        rows.iter()
            .map(|i| self.values[(*i, feature)])
            .filter(|v| !v.is_nan())
            .collect()
    }

    pub fn detection_count(&self, feature: usize) -> usize {
        self.values.column(feature).iter().filter(|v| !v.is_nan()).count()
    }

    fn check_labels<S: AsRef<str>>(&self, groups: &[S]) -> Result<(), MatrixError> {
        if groups.len() != self.n_samples() {
            Err(MatrixError::LabelMismatch {
                expected: self.n_samples(),
                found: groups.len(),
            })
        } else {
            Ok(())
        }
    }

    /// The row indices of each distinct group label
    pub fn group_rows<S: AsRef<str>>(
        &self,
        groups: &[S],
    ) -> Result<BTreeMap<String, Vec<usize>>, MatrixError> {
        self.check_labels(groups)?;
        let mut rows: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        for (i, g) in groups.iter().enumerate() {
            rows.entry(g.as_ref().to_string()).or_default().push(i);
        }
        Ok(rows)
    }

    pub fn detection_overview<S: AsRef<str>>(
        &self,
        groups: &[S],
    ) -> Result<DetectionOverview, MatrixError> {
        let rows = self.group_rows(groups)?;
        let features_with_missing = (0..self.n_features())
            .filter(|j| self.detection_count(*j) < self.n_samples())
            .count();
        let groups = rows
            .into_iter()
            .map(|(group, members)| {
                let mut histogram = vec![0; members.len() + 1];
                for j in 0..self.n_features() {
                    histogram[self.detected_values(j, &members).len()] += 1;
                }
                (group, (members.len(), histogram))
            })
            .collect();
        Ok(DetectionOverview {
            n_samples: self.n_samples(),
            n_features: self.n_features(),
            features_with_missing,
            groups,
        })
    }

    /// The relative standard deviation in percent of every feature within each
    /// group, ignoring missing values. Features with fewer than two detections in
    /// a group get NaN.
    pub fn group_rsd<S: AsRef<str>>(
        &self,
        groups: &[S],
    ) -> Result<BTreeMap<String, Vec<f64>>, MatrixError> {
        let rows = self.group_rows(groups)?;
        Ok(rows
            .into_iter()
            .map(|(group, members)| {
                let rsds = (0..self.n_features())
                    .map(|j| {
                        let vals = self.detected_values(j, &members);
                        if vals.len() > 1 {
                            relative_std_dev(&vals)
                        } else {
                            f64::NAN
                        }
                    })
                    .collect();
                (group, rsds)
            })
            .collect())
    }

    /// Drop the sample rows of each group in `remove`, returning the reduced
    /// matrix and group labels
    pub fn remove_groups<S: AsRef<str>>(
        &self,
        groups: &[S],
        remove: &[&str],
    ) -> Result<(DataMatrix, Vec<String>), MatrixError> {
        self.check_labels(groups)?;
        for name in remove {
            if groups.iter().any(|g| g.as_ref() == *name) {
                info!("Removing the samples of group {name}");
            } else {
                warn!("Group {name} is not present and cannot be removed");
            }
        }
        let keep: Vec<usize> = groups
            .iter()
            .enumerate()
            .filter(|(_, g)| !remove.contains(&g.as_ref()))
            .map(|(i, _)| i)
            .collect();
        let matrix = DataMatrix {
            sample_names: keep.iter().map(|i| self.sample_names[*i].clone()).collect(),
            brackets: self.brackets.clone(),
            values: self.values.select_rows(keep.iter()),
        };
        let labels = keep.iter().map(|i| groups[*i].as_ref().to_string()).collect();
        Ok((matrix, labels))
    }

    /// Keep only the feature columns whose entry in `mask` is `true`
    pub fn select_features(&self, mask: &[bool]) -> Result<DataMatrix, MatrixError> {
        if mask.len() != self.n_features() {
            return Err(MatrixError::MaskMismatch {
                expected: self.n_features(),
                found: mask.len(),
            });
        }
        let keep: Vec<usize> = mask
            .iter()
            .enumerate()
            .filter(|(_, k)| **k)
            .map(|(j, _)| j)
            .collect();
        Ok(DataMatrix {
            sample_names: self.sample_names.clone(),
            brackets: keep.iter().map(|j| self.brackets[*j].clone()).collect(),
            values: self.values.select_columns(keep.iter()),
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::bracket::{bracket_samples, BracketParams};
    use crate::signal::ConsensusPeak;

    fn spectrum(name: &str, peaks: &[(f64, f64)]) -> ConsensusSpectrum {
        ConsensusSpectrum::new(
            name,
            peaks
                .iter()
                .map(|(mz, i)| ConsensusPeak::new(*mz, *i, 10))
                .collect(),
            0.0,
            1.0,
        )
    }

    fn make_matrix() -> DataMatrix {
        let spectra = vec![
            spectrum("A", &[(100.0, 5.0), (200.0, 7.0)]),
            spectrum("B", &[(100.0005, 6.0)]),
            spectrum("C", &[(200.001, 0.0), (300.0, 2.0)]),
        ];
        let brackets = bracket_samples(&spectra, &BracketParams::default());
        build_data_matrix(&spectra, &brackets).unwrap()
    }

    fn column_near(matrix: &DataMatrix, mz: f64) -> usize {
        matrix
            .brackets
            .iter()
            .position(|b| (b.mean_mz - mz).abs() < 0.01)
            .unwrap()
    }

    #[test]
    fn test_nan_semantics() {
        let matrix = make_matrix();
        assert_eq!(matrix.n_samples(), 3);
        assert_eq!(matrix.n_features(), 3);
        let j100 = column_near(&matrix, 100.0);
        let j200 = column_near(&matrix, 200.0);
        let j300 = column_near(&matrix, 300.0);
        assert_eq!(matrix.values[(0, j100)], 5.0);
        assert_eq!(matrix.values[(1, j100)], 6.0);
        assert!(matrix.values[(2, j100)].is_nan());
        // A zero-intensity detection is still a detection
        assert_eq!(matrix.values[(2, j200)], 0.0);
        assert!(matrix.values[(1, j200)].is_nan());
        assert_eq!(matrix.detection_count(j300), 1);
    }

    #[test]
    fn test_window_sums_all_peaks() {
        let spectra = vec![spectrum("A", &[(100.0, 1.0), (100.0001, 2.0), (100.01, 4.0)])];
        let bracket = Bracket {
            id: 0,
            min_mz: 100.0,
            mean_mz: 100.00005,
            max_mz: 100.0001,
            ppm_spread: 1.0,
            assigned_count: 2,
            unique_sample_count: 1,
            sample_hulls: Vec::new(),
        };
        let matrix = build_data_matrix(&spectra, &[bracket]).unwrap();
        assert_eq!(matrix.values[(0, 0)], 3.0);
    }

    #[test]
    fn test_duplicate_samples() {
        let spectra = vec![spectrum("A", &[(100.0, 1.0)]), spectrum("A", &[(100.0, 1.0)])];
        assert_eq!(
            build_data_matrix(&spectra, &[]),
            Err(MatrixError::DuplicateSample("A".into()))
        );
    }

    #[test]
    fn test_overview_and_rsd() {
        let matrix = make_matrix();
        let groups = ["G", "G", "H"];
        let overview = matrix.detection_overview(&groups).unwrap();
        assert_eq!(overview.features_with_missing, 3);
        let (n, histogram) = &overview.groups["G"];
        assert_eq!(*n, 2);
        // 100 in both, 200 in one, 300 in none
        assert_eq!(histogram, &vec![1, 1, 1]);
        assert!(overview.to_string().contains("3 features in 3 samples"));

        let rsd = matrix.group_rsd(&groups).unwrap();
        let j100 = column_near(&matrix, 100.0);
        assert!((rsd["G"][j100] - 100.0 / 11.0).abs() < 1e-9);
        assert!(rsd["H"][j100].is_nan());

        assert!(matches!(
            matrix.detection_overview(&["G"]),
            Err(MatrixError::LabelMismatch { expected: 3, found: 1 })
        ));
    }

    #[test_log::test]
    fn test_remove_and_select() {
        let matrix = make_matrix();
        let (reduced, labels) = matrix
            .remove_groups(&["Blank", "G", "Blank"], &["Blank", "Missing"])
            .unwrap();
        assert_eq!(reduced.sample_names, vec!["B".to_string()]);
        assert_eq!(labels, vec!["G".to_string()]);
        assert_eq!(reduced.n_features(), 3);

        let j100 = column_near(&matrix, 100.0);
        let mut mask = vec![false; 3];
        mask[j100] = true;
        let selected = matrix.select_features(&mask).unwrap();
        assert_eq!(selected.n_features(), 1);
        assert_eq!(selected.values[(0, 0)], 5.0);
        assert!(matrix.select_features(&[true]).is_err());
    }
}
