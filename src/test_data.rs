use crate::signal::{Sample, Spectrum};

/// The elution profile used by the synthetic samples, a normal density shape
/// spanning the acquisition window with its standard deviation a sixth of the
/// window width
pub fn elution_profile(n_spectra: usize, k: usize) -> f64 {
    let width = (n_spectra - 1) as f64;
    let center = width / 2.0;
    let sd = width / 6.0;
    (-(k as f64 - center).powi(2) / (2.0 * sd * sd)).exp()
}

/// A sample with `n_spectra` spectra half a second apart. Each feature `(mz, height)`
/// appears in every spectrum with a sub-ppm mass jitter and an intensity following
/// [`elution_profile`]. Each spectrum also carries one noise signal at a mass no
/// other spectrum repeats.
pub fn synthetic_sample(name: &str, features: &[(f64, f64)], n_spectra: usize) -> Sample {
    let spectra = (0..n_spectra)
        .map(|k| {
            let mut mz_array = Vec::with_capacity(features.len() + 1);
            let mut intensity_array = Vec::with_capacity(features.len() + 1);
            for (j, (mz, height)) in features.iter().enumerate() {
                let jitter = 0.8e-6 * (k as f64 * 1.7 + j as f64).sin();
                mz_array.push(mz * (1.0 + jitter));
                intensity_array.push(height * elution_profile(n_spectra, k) + 1.0);
            }
            mz_array.push(900.0 + k as f64 * 0.37);
            intensity_array.push(50.0);
            let mut order: Vec<usize> = (0..mz_array.len()).collect();
            order.sort_by(|a, b| mz_array[*a].total_cmp(&mz_array[*b]));
            Spectrum::new(
                k as f64 * 0.5,
                order.iter().map(|i| mz_array[*i]).collect(),
                order.iter().map(|i| intensity_array[*i]).collect(),
            )
        })
        .collect();
    Sample::new(name, spectra)
}

/// Three features, two of them 66 ppm apart
pub const FEATURES: [(f64, f64); 3] = [(150.0, 1e4), (150.01, 5e3), (300.0, 2e4)];
