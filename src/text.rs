//! Plain text input and output.
//!
//! Signals are read from tab-separated lines of `sample  group  time  mz  intensity`.
//! Lines starting with `#` and a leading header line are skipped. Data matrices are
//! written as tab-separated tables with one row per sample and missing values
//! written as `NA`.
use std::collections::HashMap;
use std::fs;
use std::io;
use std::io::prelude::*;
use std::path;

use crate::matrix::DataMatrix;
use crate::metadata::{SampleMetadata, SampleSheet};
use crate::signal::{Sample, Spectrum};

fn invalid_data(line_number: usize, message: impl std::fmt::Display) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidData,
        format!("line {line_number}: {message}"),
    )
}

/// Read samples and their groups from tab-separated signal lines.
///
/// Samples are returned in order of first appearance. Within a sample, all signals
/// sharing a time form one spectrum, ordered by first appearance.
pub fn read_signals<R: BufRead>(reader: R) -> io::Result<(Vec<Sample>, SampleSheet)> {
    let mut samples: Vec<Sample> = Vec::new();
    let mut sample_index: HashMap<String, usize> = HashMap::new();
    let mut spectrum_index: Vec<HashMap<u64, usize>> = Vec::new();
    let mut sheet = SampleSheet::new();

    for (i, line) in reader.lines().enumerate() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || (i == 0 && line.starts_with("sample")) {
            continue;
        }
        let chunks: Vec<&str> = line.split('\t').collect();
        if chunks.len() != 5 {
            return Err(invalid_data(
                i + 1,
                format!("expected 5 columns, found {}", chunks.len()),
            ));
        }
        let parse = |s: &str, what: &str| -> io::Result<f64> {
            s.trim()
                .parse::<f64>()
                .map_err(|e| invalid_data(i + 1, format!("invalid {what} {s:?}: {e}")))
        };
        let (name, group) = (chunks[0], chunks[1]);
        let time = parse(chunks[2], "time")?;
        let mz = parse(chunks[3], "m/z")?;
        let intensity = parse(chunks[4], "intensity")?;

        let si = *sample_index.entry(name.to_string()).or_insert_with(|| {
            samples.push(Sample::new(name, Vec::new()));
            spectrum_index.push(HashMap::new());
            sheet.insert(name, SampleMetadata::in_group(group));
            samples.len() - 1
        });
        let sample = &mut samples[si];
        let k = *spectrum_index[si]
            .entry(time.to_bits())
            .or_insert_with(|| {
                sample.spectra.push(Spectrum::new(time, Vec::new(), Vec::new()));
                sample.spectra.len() - 1
            });
        sample.spectra[k].mz_array.push(mz);
        sample.spectra[k].intensity_array.push(intensity);
    }
    Ok((samples, sheet))
}

pub fn signals_from_file<P: AsRef<path::Path>>(path: P) -> io::Result<(Vec<Sample>, SampleSheet)> {
    let file = fs::File::open(path)?;
    read_signals(io::BufReader::new(file))
}

/// Write `matrix` as a tab-separated table, labelling each row with its sample
/// and group and each column with its bracket's mean m/z
pub fn write_matrix<W: Write, S: AsRef<str>>(
    matrix: &DataMatrix,
    groups: &[S],
    mut writer: W,
) -> io::Result<()> {
    writer.write_all(b"sample\tgroup")?;
    for bracket in matrix.brackets.iter() {
        writer.write_all(format!("\t{:.6}", bracket.mean_mz).as_bytes())?;
    }
    writer.write_all(b"\n")?;
    for (i, name) in matrix.sample_names.iter().enumerate() {
        let group = groups.get(i).map(|g| g.as_ref()).unwrap_or_default();
        writer.write_all(format!("{name}\t{group}").as_bytes())?;
        for v in matrix.values.row(i).iter() {
            if v.is_nan() {
                writer.write_all(b"\tNA")?;
            } else {
                writer.write_all(format!("\t{v}").as_bytes())?;
            }
        }
        writer.write_all(b"\n")?;
    }
    writer.flush()
}

pub fn matrix_to_file<P: AsRef<path::Path>, S: AsRef<str>>(
    matrix: &DataMatrix,
    groups: &[S],
    path: P,
) -> io::Result<()> {
    let file = fs::File::create(path)?;
    write_matrix(matrix, groups, io::BufWriter::new(file))
}
