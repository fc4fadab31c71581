//! Per-sample preprocessing applied before consensus building: intensity
//! normalization and removal of low-intensity spectra.
use log::{info, warn};
use thiserror::Error;

use crate::arrayops::argsort;
use crate::signal::Sample;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum NormalizationError {
    #[error("Sample {0} has no total intensity to normalize by")]
    ZeroIntensity(String),
    #[error("Sample {sample} has no internal standard signal between m/z {mz_min} and {mz_max}")]
    MissingInternalStandard {
        sample: String,
        mz_min: f64,
        mz_max: f64,
    },
}

fn scale_intensities(sample: &mut Sample, factor: f64) {
    for spectrum in sample.spectra.iter_mut() {
        spectrum.intensity_array.iter_mut().for_each(|v| *v *= factor);
    }
}

/// Scale every intensity of `sample` by `multiplier / TIC`, where TIC is the summed
/// intensity of all its spectra. Returns the TIC.
///
/// A sample with zero total intensity is left untouched.
pub fn normalize_by_tic(sample: &mut Sample, multiplier: f64) -> Result<f64, NormalizationError> {
    let tic = sample.total_intensity();
    if !(tic > 0.0) {
        return Err(NormalizationError::ZeroIntensity(sample.name.clone()));
    }
    scale_intensities(sample, multiplier / tic);
    Ok(tic)
}

/// The summed intensity of all signals of `sample` with m/z in `[mz_min, mz_max]`
pub fn internal_standard_intensity(sample: &Sample, (mz_min, mz_max): (f64, f64)) -> f64 {
    sample
        .spectra
        .iter()
        .flat_map(|s| s.mz_array.iter().zip(s.intensity_array.iter()))
        .filter(|(mz, _)| mz_min <= **mz && **mz <= mz_max)
        .map(|(_, i)| *i)
        .sum()
}

/// Scale the intensities of each sample by `multiplier` over the summed intensity
/// of its internal standard signals in the m/z window `standard`.
///
/// Returns the internal standard intensity of each sample in order. Samples
/// without any internal standard signal are reported and left untouched.
pub fn normalize_to_internal_standard(
    samples: &mut [Sample],
    standard: (f64, f64),
    multiplier: f64,
) -> Vec<Result<f64, NormalizationError>> {
    samples
        .iter_mut()
        .map(|sample| {
            let total = internal_standard_intensity(sample, standard);
            if total > 0.0 {
                info!(
                    "Sample {} internal standard intensity {total:0.1} * {multiplier:0.1}",
                    sample.name
                );
                scale_intensities(sample, multiplier / total);
                Ok(total)
            } else {
                let err = NormalizationError::MissingInternalStandard {
                    sample: sample.name.clone(),
                    mz_min: standard.0,
                    mz_max: standard.1,
                };
                warn!("{err}");
                Err(err)
            }
        })
        .collect()
}

fn remove_lowest_spectra(sample: &mut Sample, count: usize) {
    if count == 0 {
        return;
    }
    let tics: Vec<f64> = sample.spectra.iter().map(|s| s.total_intensity()).collect();
    let mut drop = vec![false; tics.len()];
    for i in argsort(&tics).into_iter().take(count) {
        drop[i] = true;
    }
    let mut it = drop.iter();
    sample.spectra.retain(|_| !*it.next().unwrap_or(&false));
}

/// Remove the `floor(n * rate)` spectra of lowest total intensity, keeping the
/// remaining spectra in acquisition order. Returns the number removed.
pub fn drop_lower_spectra(sample: &mut Sample, rate: f64) -> usize {
    let count = ((sample.len() as f64 * rate).floor().max(0.0) as usize).min(sample.len());
    remove_lowest_spectra(sample, count);
    count
}

/// Keep only the `n` spectra of highest total intensity, in acquisition order.
/// Returns the number removed.
pub fn select_top_spectra(sample: &mut Sample, n: usize) -> usize {
    let count = sample.len().saturating_sub(n);
    remove_lowest_spectra(sample, count);
    count
}
