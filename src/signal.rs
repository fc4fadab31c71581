//! Signal containers consumed and produced by the per-sample stage.
//!
//! A [`Sample`] is a set of [`Spectrum`]s acquired over one spot. The clustering
//! stage works on a [`SignalTable`], the pooled struct-of-arrays view over all of
//! a sample's signals, and produces a [`ConsensusSpectrum`] of [`ConsensusPeak`]s.
use std::fmt;

use mzpeaks::{CentroidPeak, CoordinateLike, IndexedCoordinate, IntensityMeasurement, MZ};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::arrayops::ppm_spread;

/// One spectrum of a sample, its acquisition time and paired m/z and intensity arrays.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Spectrum {
    pub time: f64,
    pub mz_array: Vec<f64>,
    pub intensity_array: Vec<f64>,
    /// The m/z values before any systematic shift correction was applied. When
    /// absent, `mz_array` is treated as uncorrected.
    pub original_mz_array: Option<Vec<f64>>,
}

impl Spectrum {
    pub fn new(time: f64, mz_array: Vec<f64>, intensity_array: Vec<f64>) -> Self {
        Self {
            time,
            mz_array,
            intensity_array,
            original_mz_array: None,
        }
    }

    pub fn with_original_mz(mut self, original_mz_array: Vec<f64>) -> Self {
        self.original_mz_array = Some(original_mz_array);
        self
    }

    pub fn len(&self) -> usize {
        self.mz_array.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mz_array.is_empty()
    }

    /// The total ion current of the spectrum
    pub fn total_intensity(&self) -> f64 {
        self.intensity_array.iter().sum()
    }

    pub fn original_mz(&self) -> &[f64] {
        self.original_mz_array.as_deref().unwrap_or(&self.mz_array)
    }

    fn arrays_consistent(&self) -> bool {
        self.mz_array.len() == self.intensity_array.len()
            && self
                .original_mz_array
                .as_ref()
                .map(|o| o.len() == self.mz_array.len())
                .unwrap_or(true)
    }
}

/// All spectra of one physical sample ("spot"), in acquisition order.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Sample {
    pub name: String,
    pub spectra: Vec<Spectrum>,
}

impl Sample {
    pub fn new(name: impl Into<String>, spectra: Vec<Spectrum>) -> Self {
        Self {
            name: name.into(),
            spectra,
        }
    }

    pub fn len(&self) -> usize {
        self.spectra.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spectra.is_empty()
    }

    pub fn signal_count(&self) -> usize {
        self.spectra.iter().map(|s| s.len()).sum()
    }

    pub fn total_intensity(&self) -> f64 {
        self.spectra.iter().map(|s| s.total_intensity()).sum()
    }

    /// The time of the first and last spectrum
    pub fn time_range(&self) -> Option<(f64, f64)> {
        match (self.spectra.first(), self.spectra.last()) {
            (Some(first), Some(last)) => Some((first.time, last.time)),
            _ => None,
        }
    }
}

/// The signals of all spectra of one sample pooled into parallel arrays.
///
/// Signal `i` has mass `mz[i]`, intensity `intensity[i]`, and was read
/// from spectrum `spectrum_index[i]` acquired at `time[i]`. The table
/// never changes a signal once built, clustering stages only
/// assign cluster ids to signal positions.
#[derive(Debug, Clone, Default)]
pub struct SignalTable {
    pub mz: Vec<f64>,
    pub intensity: Vec<f64>,
    pub time: Vec<f64>,
    pub spectrum_index: Vec<usize>,
    pub original_mz: Vec<f64>,
    /// The acquisition time of every spectrum of the sample in acquisition order,
    /// including spectra that contribute no signal
    pub spectrum_times: Vec<f64>,
    pub start_time: f64,
    pub end_time: f64,
}

impl SignalTable {
    /// Pool the signals of `sample`. Returns `None` if any spectrum's arrays
    /// differ in length.
    pub fn from_sample(sample: &Sample) -> Option<Self> {
        let n = sample.signal_count();
        let mut table = Self {
            mz: Vec::with_capacity(n),
            intensity: Vec::with_capacity(n),
            time: Vec::with_capacity(n),
            spectrum_index: Vec::with_capacity(n),
            original_mz: Vec::with_capacity(n),
            ..Default::default()
        };
        for (k, spectrum) in sample.spectra.iter().enumerate() {
            if !spectrum.arrays_consistent() {
                return None;
            }
            table.mz.extend_from_slice(&spectrum.mz_array);
            table.intensity.extend_from_slice(&spectrum.intensity_array);
            table.original_mz.extend_from_slice(spectrum.original_mz());
            table.time.extend(std::iter::repeat(spectrum.time).take(spectrum.len()));
            table.spectrum_index.extend(std::iter::repeat(k).take(spectrum.len()));
            table.spectrum_times.push(spectrum.time);
        }
        if let Some((start, end)) = sample.time_range() {
            table.start_time = start;
            table.end_time = end;
        }
        Some(table)
    }

    pub fn len(&self) -> usize {
        self.mz.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mz.is_empty()
    }

    /// Keep only the signals for which `mask` is `true`
    pub fn retain_mask(&mut self, mask: &[bool]) {
        fn apply<T: Copy>(values: &mut Vec<T>, mask: &[bool]) {
            let mut it = mask.iter();
            values.retain(|_| *it.next().unwrap_or(&false));
        }
        apply(&mut self.mz, mask);
        apply(&mut self.intensity, mask);
        apply(&mut self.time, mask);
        apply(&mut self.spectrum_index, mask);
        apply(&mut self.original_mz, mask);
    }
}

/// One feature of a consensus spectrum, the collapsed form of a cluster of
/// signals from the same sample.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ConsensusPeak {
    /// The intensity weighted mean m/z of the cluster
    pub mz: f64,
    /// The aggregated intensity of the cluster
    pub intensity: f64,
    pub signal_count: usize,
    pub min_mz: f64,
    pub max_mz: f64,
    /// The intensity weighted mean of the uncorrected m/z values
    pub original_mz: f64,
    pub index: u32,
}

impl ConsensusPeak {
    pub fn new(mz: f64, intensity: f64, signal_count: usize) -> Self {
        Self {
            mz,
            intensity,
            signal_count,
            min_mz: mz,
            max_mz: mz,
            original_mz: mz,
            index: 0,
        }
    }

    /// The mass spread of the contributing signals in PPM
    pub fn ppm_spread(&self) -> f64 {
        ppm_spread(self.min_mz, self.max_mz, self.mz)
    }
}

impl PartialOrd for ConsensusPeak {
    #[inline]
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        self.mz.partial_cmp(&other.mz)
    }
}

impl CoordinateLike<MZ> for ConsensusPeak {
    fn coordinate(&self) -> f64 {
        self.mz
    }
}

impl IntensityMeasurement for ConsensusPeak {
    fn intensity(&self) -> f32 {
        self.intensity as f32
    }
}

impl IndexedCoordinate<MZ> for ConsensusPeak {
    #[inline]
    fn get_index(&self) -> mzpeaks::IndexType {
        self.index
    }

    #[inline]
    fn set_index(&mut self, index: mzpeaks::IndexType) {
        self.index = index
    }
}

impl From<ConsensusPeak> for CentroidPeak {
    fn from(peak: ConsensusPeak) -> Self {
        CentroidPeak::new(peak.mz, peak.intensity as f32, peak.index)
    }
}

impl fmt::Display for ConsensusPeak {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "ConsensusPeak({}, {}, {}, {:0.2})",
            self.mz,
            self.intensity,
            self.signal_count,
            self.ppm_spread()
        )
    }
}

/// The single collapsed spectrum representing one sample.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ConsensusSpectrum {
    pub sample: String,
    /// Sorted ascending by m/z
    pub peaks: Vec<ConsensusPeak>,
    /// The time of the sample's first spectrum
    pub start_time: f64,
    /// The time of the sample's last spectrum
    pub end_time: f64,
}

impl ConsensusSpectrum {
    pub fn new(
        sample: impl Into<String>,
        mut peaks: Vec<ConsensusPeak>,
        start_time: f64,
        end_time: f64,
    ) -> Self {
        peaks.sort_by(|a, b| a.mz.total_cmp(&b.mz));
        peaks
            .iter_mut()
            .enumerate()
            .for_each(|(i, p)| p.index = i as u32);
        Self {
            sample: sample.into(),
            peaks,
            start_time,
            end_time,
        }
    }

    pub fn len(&self) -> usize {
        self.peaks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peaks.is_empty()
    }

    pub fn mz_array(&self) -> Vec<f64> {
        self.peaks.iter().map(|p| p.mz).collect()
    }

    pub fn intensity_array(&self) -> Vec<f64> {
        self.peaks.iter().map(|p| p.intensity).collect()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ConsensusPeak> {
        self.peaks.iter()
    }
}
