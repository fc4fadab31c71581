//! Export brackets and consensus spectra as FeatureXML 1.4 feature maps for
//! feature inspection tools.
//!
//! Every feature is written with a time by mass convex hull. Numbers are printed
//! with six decimal places.
use std::fs;
use std::io;
use std::io::prelude::*;
use std::path;

use chrono::Local;

use crate::bracket::Bracket;
use crate::signal::ConsensusSpectrum;

const SOFTWARE_NAME: &str = env!("CARGO_PKG_NAME");
const SOFTWARE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Writes FeatureXML documents to any [`Write`] sink
#[derive(Debug)]
pub struct FeatureMLWriter<W: Write> {
    writer: W,
    completion_time: Option<String>,
}

impl<W: Write> FeatureMLWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            completion_time: None,
        }
    }

    /// Stamp documents with `completion_time` instead of the local time at writing
    pub fn with_completion_time(mut self, completion_time: impl Into<String>) -> Self {
        self.completion_time = Some(completion_time.into());
        self
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    fn completion_time(&self) -> String {
        self.completion_time
            .clone()
            .unwrap_or_else(|| Local::now().format("%m/%d/%Y, %H:%M:%S").to_string())
    }

    fn write_header(&mut self, process: &str, count: usize) -> io::Result<()> {
        let completion_time = self.completion_time();
        let w = &mut self.writer;
        w.write_all(b"<?xml version=\"1.0\" encoding=\"ISO-8859-1\"?>\n")?;
        w.write_all(b"  <featureMap version=\"1.4\" id=\"fm_16311276685788915066\" xsi:noNamespaceSchemaLocation=\"http://open-ms.sourceforge.net/schemas/FeatureXML_1_4.xsd\" xmlns:xsi=\"http://www.w3.org/2001/XMLSchema-instance\">\n")?;
        w.write_all(format!("    <dataProcessing completion_time=\"{completion_time}\">\n").as_bytes())?;
        w.write_all(
            format!("      <software name=\"{SOFTWARE_NAME}\" version=\"{SOFTWARE_VERSION}\" />\n")
                .as_bytes(),
        )?;
        w.write_all(
            format!(
                "      <software name=\"{SOFTWARE_NAME}.{process}\" version=\"{SOFTWARE_VERSION}\" />\n"
            )
            .as_bytes(),
        )?;
        w.write_all(b"    </dataProcessing>\n")?;
        w.write_all(format!("    <featureList count=\"{count}\">\n").as_bytes())?;
        Ok(())
    }

    fn write_footer(&mut self) -> io::Result<()> {
        self.writer.write_all(b"    </featureList>\n")?;
        self.writer.write_all(b"  </featureMap>\n")?;
        self.writer.flush()
    }

    fn write_hull(&mut self, nr: usize, points: &[(f64, f64)]) -> io::Result<()> {
        self.writer
            .write_all(format!("  <convexhull nr=\"{nr}\">\n").as_bytes())?;
        for (x, y) in points {
            self.writer
                .write_all(format!("    <pt x=\"{x:.6}\" y=\"{y:.6}\" />\n").as_bytes())?;
        }
        self.writer.write_all(b"  </convexhull>\n")
    }

    fn write_feature_head(
        &mut self,
        id: usize,
        rt: f64,
        mz: f64,
        intensity: &str,
        overall_quality: usize,
    ) -> io::Result<()> {
        let w = &mut self.writer;
        w.write_all(format!("<feature id=\"{id}\">\n").as_bytes())?;
        w.write_all(format!("  <position dim=\"0\">{rt:.6}</position>\n").as_bytes())?;
        w.write_all(format!("  <position dim=\"1\">{mz:.6}</position>\n").as_bytes())?;
        w.write_all(format!("  <intensity>{intensity}</intensity>\n").as_bytes())?;
        w.write_all(b"  <quality dim=\"0\">0</quality>\n")?;
        w.write_all(b"  <quality dim=\"1\">0</quality>\n")?;
        w.write_all(format!("  <overallquality>{overall_quality}</overallquality>\n").as_bytes())?;
        w.write_all(b"  <charge>1</charge>\n")
    }

    /// Write one feature per bracket, spanning `start_rt` to `end_rt`.
    ///
    /// The first hull of each feature is centered on the bracket's mean mass with
    /// the bracket's PPM spread as its half-width. It is followed by one hull per
    /// contributing sample. The overall quality is the bracket's assigned peak count.
    pub fn write_brackets(
        &mut self,
        brackets: &[Bracket],
        start_rt: f64,
        end_rt: f64,
    ) -> io::Result<()> {
        self.write_header("bracket_samples", brackets.len())?;
        for (j, bracket) in brackets.iter().enumerate() {
            self.write_feature_head(
                j,
                (start_rt + end_rt) / 2.0,
                bracket.mean_mz,
                "1",
                bracket.assigned_count,
            )?;
            self.write_hull(0, &bracket.centered_hull(start_rt, end_rt))?;
            for (i, hull) in bracket.sample_hulls.iter().enumerate() {
                self.write_hull(i, &hull.points())?;
            }
            self.writer.write_all(b"</feature>\n")?;
        }
        self.write_footer()
    }

    /// Write one feature per peak of `spectrum`.
    ///
    /// Each feature sits at the middle of the spectrum's acquisition window and is
    /// drawn as the rectangle spanning that window and the peak's mass range.
    pub fn write_consensus_spectrum(&mut self, spectrum: &ConsensusSpectrum) -> io::Result<()> {
        self.write_header("consensus_spectrum", spectrum.len())?;
        let (start, end) = (spectrum.start_time, spectrum.end_time);
        for (j, peak) in spectrum.iter().enumerate() {
            self.write_feature_head(
                j,
                (start + end) / 2.0,
                peak.mz,
                &format!("{:.6}", peak.intensity),
                0,
            )?;
            self.write_hull(
                0,
                &[
                    (start, peak.min_mz),
                    (start, peak.max_mz),
                    (end, peak.max_mz),
                    (end, peak.min_mz),
                ],
            )?;
            self.writer.write_all(b"</feature>\n")?;
        }
        self.write_footer()
    }
}

/// Write `brackets` to a new FeatureXML file at `path`
pub fn brackets_to_file<P: AsRef<path::Path>>(
    brackets: &[Bracket],
    start_rt: f64,
    end_rt: f64,
    path: P,
) -> io::Result<()> {
    let file = fs::File::create(path)?;
    FeatureMLWriter::new(io::BufWriter::new(file)).write_brackets(brackets, start_rt, end_rt)
}

/// The file name a sample's consensus spectrum is exported under. Colons are
/// not portable in file names and become underscores.
pub fn consensus_spectrum_file_name(sample: &str) -> String {
    format!("{sample}.featureML").replace(':', "_")
}

/// Write `spectrum` to a new FeatureXML file in `directory`, returning its path
pub fn consensus_spectrum_to_file<P: AsRef<path::Path>>(
    spectrum: &ConsensusSpectrum,
    directory: P,
) -> io::Result<path::PathBuf> {
    let path = directory
        .as_ref()
        .join(consensus_spectrum_file_name(&spectrum.sample));
    let file = fs::File::create(&path)?;
    FeatureMLWriter::new(io::BufWriter::new(file)).write_consensus_spectrum(spectrum)?;
    Ok(path)
}
