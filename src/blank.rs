//! Remove features which cannot be told apart from the blank samples.
//!
//! Every feature of a [`DataMatrix`] with enough detections is compared between
//! the blank group and each tested group. Features the blanks never detect are
//! kept when a tested group detects them often enough. Otherwise a tested group
//! must beat the blanks by a two-sided Welch t-test and a fold change for the
//! feature to be kept.
//!
//! The outcome of each feature is tracked as a signed counter. "Only in group"
//! decisions count down and significant comparisons count up, and a feature is
//! kept iff its counter is nonzero.
use std::collections::BTreeMap;

use log::{debug, info, warn};
use statrs::distribution::{ContinuousCDF, StudentsT};
use thiserror::Error;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::arrayops::{mean, variance};
use crate::matrix::{DataMatrix, MatrixError};
use crate::pipeline::ConfigError;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum BlankSubtractionError {
    #[error(transparent)]
    Matrix(#[from] MatrixError),
}

/// The p-value of the two-sided Welch t-test for a difference in means between
/// `a` and `b`, which need not have equal variances.
///
/// Returns NaN when either sample has fewer than two values or the pooled
/// standard error is zero.
pub fn welch_t_test(a: &[f64], b: &[f64]) -> f64 {
    let (na, nb) = (a.len() as f64, b.len() as f64);
    let va = variance(a) / na;
    let vb = variance(b) / nb;
    let se2 = va + vb;
    if !(se2 > 0.0) || !se2.is_finite() {
        return f64::NAN;
    }
    let t = (mean(a) - mean(b)) / se2.sqrt();
    let df = se2.powi(2) / (va.powi(2) / (na - 1.0) + vb.powi(2) / (nb - 1.0));
    match StudentsT::new(0.0, 1.0, df) {
        Ok(dist) => (2.0 * dist.sf(t.abs())).min(1.0),
        Err(_) => f64::NAN,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ComparisonOutcome {
    /// The blanks never detect the feature but the tested group does
    OnlyInGroup,
    Significant,
    NotSignificant,
}

/// One evaluated comparison of a feature between a tested group and the blanks
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct GroupComparison {
    pub feature: usize,
    pub group: String,
    /// NaN for [`ComparisonOutcome::OnlyInGroup`], which runs no test
    pub p_value: f64,
    /// `mean(group) / mean(blanks)`, infinite for [`ComparisonOutcome::OnlyInGroup`]
    pub fold: f64,
    pub outcome: ComparisonOutcome,
}

#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BlankSubtractionResult {
    /// Whether each feature is kept, aligned with the matrix columns
    pub keep: Vec<bool>,
    /// Negative for features kept because the blanks never detect them, positive
    /// for features that beat the blanks in that many tested groups, zero otherwise
    pub counters: Vec<i64>,
    pub comparisons: Vec<GroupComparison>,
}

impl BlankSubtractionResult {
    pub fn kept(&self) -> usize {
        self.keep.iter().filter(|k| **k).count()
    }
}

/// Compares the features of a [`DataMatrix`] against a blank group
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BlankSubtraction {
    pub blank_group: String,
    pub test_groups: Vec<String>,
    /// The smallest `mean(group) / mean(blanks)` that counts as beating the blanks
    pub fold_cutoff: f64,
    pub pvalue_cutoff: f64,
    /// The fewest detections a feature needs overall, and a tested group needs,
    /// to be evaluated
    pub min_detected: usize,
}

/// A builder for configuring [`BlankSubtraction`]
#[derive(Debug, Clone)]
pub struct BlankSubtractionBuilder {
    blank_group: String,
    test_groups: Vec<String>,
    fold_cutoff: f64,
    pvalue_cutoff: f64,
    min_detected: usize,
}

impl Default for BlankSubtractionBuilder {
    fn default() -> Self {
        Self {
            blank_group: String::new(),
            test_groups: Vec::new(),
            fold_cutoff: 2.0,
            pvalue_cutoff: 0.05,
            min_detected: 2,
        }
    }
}

impl BlankSubtractionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn blank_group(&mut self, blank_group: impl Into<String>) -> &mut Self {
        self.blank_group = blank_group.into();
        self
    }

    pub fn test_group(&mut self, group: impl Into<String>) -> &mut Self {
        self.test_groups.push(group.into());
        self
    }

    pub fn test_groups<S: Into<String>>(&mut self, groups: impl IntoIterator<Item = S>) -> &mut Self {
        self.test_groups.extend(groups.into_iter().map(Into::into));
        self
    }

    pub fn fold_cutoff(&mut self, fold_cutoff: f64) -> &mut Self {
        self.fold_cutoff = fold_cutoff;
        self
    }

    pub fn pvalue_cutoff(&mut self, pvalue_cutoff: f64) -> &mut Self {
        self.pvalue_cutoff = pvalue_cutoff;
        self
    }

    pub fn min_detected(&mut self, min_detected: usize) -> &mut Self {
        self.min_detected = min_detected;
        self
    }

    pub fn build(&self) -> Result<BlankSubtraction, ConfigError> {
        let blank_subtraction = BlankSubtraction {
            blank_group: self.blank_group.clone(),
            test_groups: self.test_groups.clone(),
            fold_cutoff: self.fold_cutoff,
            pvalue_cutoff: self.pvalue_cutoff,
            min_detected: self.min_detected,
        };
        blank_subtraction.validate()?;
        Ok(blank_subtraction)
    }
}

impl BlankSubtraction {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.blank_group.is_empty() {
            return Err(ConfigError::EmptyBlankGroup);
        }
        if self.min_detected == 0 {
            return Err(ConfigError::ZeroMinDetected);
        }
        if !self.fold_cutoff.is_finite() || self.fold_cutoff < 0.0 {
            return Err(ConfigError::InvalidTolerance("fold_cutoff", self.fold_cutoff));
        }
        if !(0.0..=1.0).contains(&self.pvalue_cutoff) {
            return Err(ConfigError::InvalidTolerance(
                "pvalue_cutoff",
                self.pvalue_cutoff,
            ));
        }
        Ok(())
    }

    /// Decide which features of `matrix` to keep, given the group label of each
    /// of its sample rows
    pub fn apply<S: AsRef<str>>(
        &self,
        matrix: &DataMatrix,
        groups: &[S],
    ) -> Result<BlankSubtractionResult, BlankSubtractionError> {
        let rows = matrix.group_rows(groups)?;
        let no_rows = Vec::new();
        let blank_rows = rows.get(&self.blank_group).unwrap_or_else(|| {
            warn!(
                "Blank group {} has no samples, every detected feature counts as absent from the blanks",
                self.blank_group
            );
            &no_rows
        });
        let tested: Vec<(&str, &Vec<usize>)> = self
            .test_groups
            .iter()
            .map(|g| (g.as_str(), rows.get(g).unwrap_or(&no_rows)))
            .collect();

        let n = matrix.n_features();
        let mut counters = vec![0i64; n];
        let mut comparisons = Vec::new();
        for (j, counter) in counters.iter_mut().enumerate() {
            if matrix.detection_count(j) < self.min_detected {
                continue;
            }
            let blanks = matrix.detected_values(j, blank_rows);
            let not_in_blanks = blanks.is_empty();
            for (group, group_rows) in tested.iter() {
                let values = matrix.detected_values(j, group_rows);
                if values.len() < self.min_detected {
                    continue;
                }
                let comparison = if not_in_blanks {
                    debug_assert!(*counter <= 0, "feature {j} mixes keep decisions");
                    *counter -= 1;
                    GroupComparison {
                        feature: j,
                        group: group.to_string(),
                        p_value: f64::NAN,
                        fold: f64::INFINITY,
                        outcome: ComparisonOutcome::OnlyInGroup,
                    }
                } else {
                    let p_value = welch_t_test(&blanks, &values);
                    let fold = mean(&values) / mean(&blanks);
                    let significant = p_value <= self.pvalue_cutoff && fold >= self.fold_cutoff;
                    debug_assert!(*counter >= 0, "feature {j} mixes keep decisions");
                    if significant {
                        *counter += 1;
                    }
                    GroupComparison {
                        feature: j,
                        group: group.to_string(),
                        p_value,
                        fold,
                        outcome: if significant {
                            ComparisonOutcome::Significant
                        } else {
                            ComparisonOutcome::NotSignificant
                        },
                    }
                };
                debug!(
                    "Feature {j} in {group} vs {}: p = {:0.4}, fold = {:0.2}, {:?}",
                    self.blank_group, comparison.p_value, comparison.fold, comparison.outcome
                );
                comparisons.push(comparison);
            }
        }

        self.log_summary(&counters);
        Ok(BlankSubtractionResult {
            keep: counters.iter().map(|c| *c != 0).collect(),
            counters,
            comparisons,
        })
    }

    fn log_summary(&self, counters: &[i64]) {
        let mut tally: BTreeMap<i64, usize> = BTreeMap::new();
        for c in counters {
            *tally.entry(*c).or_default() += 1;
        }
        for (c, count) in tally {
            if c < 0 {
                info!(
                    "{count} features are absent from the blanks but detected in at least {} samples of {} groups and are kept",
                    self.min_detected, -c
                );
            } else if c == 0 {
                info!("{count} features are not more abundant than the blanks in any group and are removed");
            } else {
                info!("{count} features are more abundant than the blanks in {c} groups and are kept");
            }
        }
    }
}
