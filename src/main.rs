use std::collections::BTreeSet;
use std::env;
use std::io;
use std::time::Instant;

use mzbracket::featureml::brackets_to_file;
use mzbracket::text::{matrix_to_file, signals_from_file};
use mzbracket::{
    BlankSubtractionBuilder, Pipeline, PipelineConfigBuilder, Sample, SampleMetadata, SampleSheet,
    Spectrum,
};

const DEMO_FEATURES: [(f64, f64); 4] = [
    (122.0964, 8e3),
    (150.0550, 2e4),
    (150.0569, 6e3),
    (301.1410, 1.2e4),
];

/// Three blank and three treated samples. Only the treated samples carry
/// `DEMO_FEATURES`, every sample carries a background ion at 214.0896.
fn demo_batch() -> (Vec<Sample>, SampleSheet) {
    let mut samples = Vec::new();
    let mut sheet = SampleSheet::new();
    for (group, scale) in [("Blank", 0.0), ("Treated", 1.0)] {
        for replicate in 0..3 {
            let name = format!("{group}_{replicate}");
            let spectra = (0..25)
                .map(|k| {
                    let time = k as f64 * 0.5;
                    let shape = (-((k as f64 - 12.0) / 4.0).powi(2) / 2.0).exp();
                    let jitter = |j: usize| 1.0 + 1e-6 * ((k * 7 + j * 3 + replicate) as f64).sin();
                    let mut pairs: Vec<(f64, f64)> = DEMO_FEATURES
                        .iter()
                        .enumerate()
                        .filter(|_| scale > 0.0)
                        .map(|(j, (mz, height))| {
                            (mz * jitter(j), height * shape * (1.0 + 0.1 * replicate as f64) + 1.0)
                        })
                        .collect();
                    pairs.push((214.0896 * jitter(9), 3e3 * shape + 1.0));
                    pairs.sort_by(|a, b| a.0.total_cmp(&b.0));
                    let (mz, intensity): (Vec<f64>, Vec<f64>) = pairs.into_iter().unzip();
                    Spectrum::new(time, mz, intensity)
                })
                .collect();
            samples.push(Sample::new(&name, spectra));
            sheet.insert(&name, SampleMetadata::in_group(group));
        }
    }
    (samples, sheet)
}

fn main() -> io::Result<()> {
    let args: Vec<String> = env::args().collect();
    let (samples, sheet) = match args.get(1) {
        Some(path) => signals_from_file(path)?,
        None => {
            println!("No signal file given, using a demo batch");
            demo_batch()
        }
    };
    let blank_group = args.get(2).map(|s| s.as_str()).unwrap_or("Blank");
    println!("Read {} samples", samples.len());

    let mut builder = PipelineConfigBuilder::new();
    builder.default_quality_checks();
    let names: Vec<&str> = samples.iter().map(|s| s.name.as_str()).collect();
    let test_groups: BTreeSet<String> = sheet
        .groups_for(&names)
        .into_iter()
        .filter(|g| !g.is_empty() && g != blank_group)
        .collect();
    if !test_groups.is_empty() {
        match BlankSubtractionBuilder::new()
            .blank_group(blank_group)
            .test_groups(test_groups)
            .build()
        {
            Ok(blank_subtraction) => {
                builder.blank_subtraction(blank_subtraction);
            }
            Err(err) => println!("Skipping blank subtraction: {}", err),
        }
    }
    if let Some(prefix) = args.get(3) {
        builder.featureml_directory(format!("{prefix}_consensus"));
    }
    let config = match builder.build() {
        Ok(config) => config,
        Err(err) => {
            println!("Invalid configuration: {}", err);
            return Ok(());
        }
    };

    let start = Instant::now();
    let output = match Pipeline::new(&config).run(samples, &sheet) {
        Ok(output) => output,
        Err(err) => {
            println!("Encountered error {:?}", err);
            return Ok(());
        }
    };
    println!(
        "Pipeline took milliseconds {}",
        (Instant::now() - start).as_millis()
    );
    for summary in output.summaries.iter() {
        println!("\t{}", summary);
    }
    for failure in output.failures.iter() {
        println!("\tFailed: {}", failure);
    }
    println!("Found {} brackets", output.brackets.len());
    if let Ok(overview) = output.matrix.detection_overview(&output.groups) {
        println!("{}", overview);
    }
    if let Some(result) = output.blank_subtraction.as_ref() {
        println!(
            "Kept {} of {} features after blank subtraction",
            result.kept(),
            result.keep.len()
        );
    }

    if let Some(prefix) = args.get(3) {
        brackets_to_file(&output.brackets, 0.0, 1400.0, format!("{prefix}.featureXML"))?;
        match output.filtered_matrix() {
            Ok(matrix) => matrix_to_file(&matrix, &output.groups, format!("{prefix}.tsv"))?,
            Err(err) => println!("Encountered error {:?}", err),
        }
    }
    Ok(())
}
