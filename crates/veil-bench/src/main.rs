//! veil-bench: decode and paint a single mask offline.
//!
//! Runs the overlay pipeline on a mask file (base64 NPY text, raw
//! `.npy`, PNG or JPEG) with configurable coloring, printing per-stage
//! diagnostics. Useful for:
//!
//! - Checking that a mask decodes with the expected shape and dtype
//! - Comparing field, value and instance coloring on real masks
//! - Measuring decode, paint and bitmap durations
//!
//! # Usage
//!
//! ```text
//! cargo run --release --bin veil-bench -- [OPTIONS] <MASK_PATH>
//! ```

#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, ValueEnum};
use tracing_subscriber::EnvFilter;
use veil_pipeline::{ColorMode, ColorSettings, Coloring, LabelClass, PipelineDiagnostics};

/// Overlay decoding and painting diagnostics for veil.
///
/// Decodes a mask, paints it with the chosen coloring and prints
/// per-stage timing and count diagnostics.
#[derive(Parser)]
#[command(name = "veil-bench", version)]
struct Cli {
    /// Path to the mask: base64 NPY text, raw NPY, PNG or JPEG.
    mask_path: PathBuf,

    /// Label class the mask belongs to.
    #[arg(long, value_enum, default_value_t = Class::Segmentation)]
    class: Class,

    /// Field path used for per-field overrides and field-mode colors.
    #[arg(long, default_value = "mask")]
    path: String,

    /// Coloring strategy.
    #[arg(long, value_enum, default_value_t = mode_from_pipeline(Coloring::DEFAULT_MODE))]
    mode: Mode,

    /// Color seed.
    #[arg(long, default_value_t = Coloring::DEFAULT_SEED)]
    seed: u64,

    /// Color pool as comma-separated CSS colors.
    #[arg(long, value_delimiter = ',')]
    pool: Vec<String>,

    /// Write the painted overlay as PNG.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Number of runs for averaging.
    #[arg(long, default_value_t = 1, value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..))]
    runs: usize,

    /// Output diagnostics as JSON instead of a human-readable report.
    #[arg(long)]
    json: bool,

    /// Full color settings as a JSON string.
    ///
    /// When provided, `--mode`, `--seed` and `--pool` are ignored. The
    /// JSON must be a valid `ColorSettings` serialization.
    #[arg(long)]
    coloring_json: Option<String>,
}

/// Dense label classes the bench can paint.
#[derive(Clone, Copy, ValueEnum)]
enum Class {
    Detection,
    Heatmap,
    Segmentation,
}

impl From<Class> for LabelClass {
    fn from(class: Class) -> Self {
        match class {
            Class::Detection => Self::Detection,
            Class::Heatmap => Self::Heatmap,
            Class::Segmentation => Self::Segmentation,
        }
    }
}

/// Coloring strategy selection.
#[derive(Clone, Copy, ValueEnum)]
enum Mode {
    /// One color for the whole field.
    Field,
    /// Colors keyed by pixel value or label text.
    Value,
    /// Colors keyed by label identity.
    Instance,
}

const fn mode_from_pipeline(mode: ColorMode) -> Mode {
    match mode {
        ColorMode::Field => Mode::Field,
        ColorMode::Value => Mode::Value,
        ColorMode::Instance => Mode::Instance,
    }
}

/// Build [`ColorSettings`] from CLI arguments.
///
/// If `--coloring-json` is provided, it is parsed directly and the
/// individual coloring flags are ignored.
fn settings_from_cli(cli: &Cli) -> Result<ColorSettings, String> {
    if let Some(ref json) = cli.coloring_json {
        return serde_json::from_str(json).map_err(|e| format!("Error parsing --coloring-json: {e}"));
    }

    Ok(ColorSettings {
        coloring: Coloring {
            mode: match cli.mode {
                Mode::Field => ColorMode::Field,
                Mode::Value => ColorMode::Value,
                Mode::Instance => ColorMode::Instance,
            },
            seed: cli.seed,
            pool: cli.pool.clone(),
            ..Coloring::default()
        },
        ..ColorSettings::default()
    })
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let settings = match settings_from_cli(&cli) {
        Ok(s) => s,
        Err(msg) => {
            eprintln!("{msg}");
            return ExitCode::FAILURE;
        }
    };

    let bytes = match std::fs::read(&cli.mask_path) {
        Ok(bytes) => bytes,
        Err(e) => {
            eprintln!("Error reading {}: {e}", cli.mask_path.display());
            return ExitCode::FAILURE;
        }
    };

    eprintln!("Mask: {} ({} bytes)", cli.mask_path.display(), bytes.len());
    eprintln!("Coloring: {:?}", settings.coloring.mode);
    eprintln!("Runs: {}", cli.runs);
    eprintln!();

    let class = LabelClass::from(cli.class);
    let mut all_diagnostics = Vec::with_capacity(cli.runs);

    for run in 0..cli.runs {
        if cli.runs > 1 {
            eprintln!("--- Run {}/{} ---", run + 1, cli.runs);
        }

        let result = match veil_pipeline::process(&bytes, class, &cli.path, &settings) {
            Ok(result) => result,
            Err(e) => {
                eprintln!("Pipeline error: {e}");
                return ExitCode::FAILURE;
            }
        };

        if cli.json {
            match serde_json::to_string_pretty(&result.diagnostics) {
                Ok(json) => println!("{json}"),
                Err(e) => {
                    eprintln!("Error serializing diagnostics: {e}");
                    return ExitCode::FAILURE;
                }
            }
        } else {
            println!("{}", result.diagnostics.report());
        }

        // Write the overlay on the first run only.
        if run == 0
            && let Some(ref output) = cli.output
        {
            match result.bitmap.to_png() {
                Ok(png) => match std::fs::write(output, &png) {
                    Ok(()) => eprintln!("Overlay written to {} ({} bytes)", output.display(), png.len()),
                    Err(e) => eprintln!("Error writing {}: {e}", output.display()),
                },
                Err(e) => eprintln!("Error encoding overlay: {e}"),
            }
        }

        all_diagnostics.push(result.diagnostics);

        if cli.runs > 1 {
            eprintln!();
        }
    }

    if cli.runs > 1 {
        print_multi_run_summary(&all_diagnostics);
    }

    ExitCode::SUCCESS
}

/// Function pointer type for extracting a stage duration from diagnostics.
type StageExtractor = fn(&PipelineDiagnostics) -> std::time::Duration;

/// Print aggregated statistics across multiple runs.
#[allow(clippy::cast_precision_loss)]
fn print_multi_run_summary(all_diagnostics: &[PipelineDiagnostics]) {
    println!();
    println!(
        "Summary ({} runs)\n{}",
        all_diagnostics.len(),
        "=".repeat(60),
    );

    if all_diagnostics.is_empty() {
        println!("Warning: no diagnostics to summarize");
        return;
    }

    let durations: Vec<f64> = all_diagnostics
        .iter()
        .map(|d| d.total_duration.as_secs_f64() * 1000.0)
        .collect();

    let min = durations.iter().copied().reduce(f64::min).unwrap_or(0.0);
    let max = durations.iter().copied().reduce(f64::max).unwrap_or(0.0);
    let mean = durations.iter().sum::<f64>() / durations.len() as f64;

    println!("Total duration: min={min:.3}ms  mean={mean:.3}ms  max={max:.3}ms");

    println!();
    println!("{:<12} {:>12}", "Stage", "Mean (ms)");
    println!("{}", "-".repeat(28));

    let stage_extractors: &[(&str, StageExtractor)] = &[
        ("Decode", |d| d.decode.duration),
        ("Paint", |d| d.paint.duration),
        ("Bitmap", |d| d.bitmap.duration),
    ];

    for (name, extractor) in stage_extractors {
        let mean = all_diagnostics
            .iter()
            .map(|d| extractor(d).as_secs_f64() * 1000.0)
            .sum::<f64>()
            / all_diagnostics.len() as f64;
        println!("{name:<12} {mean:>10.3}ms");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn flags_build_settings() {
        let cli = Cli::parse_from(["veil-bench", "m.png", "--mode", "value", "--seed", "9", "--pool", "#f00,#0f0"]);
        let settings = settings_from_cli(&cli).unwrap();
        assert_eq!(settings.coloring.mode, ColorMode::Value);
        assert_eq!(settings.coloring.seed, 9);
        assert_eq!(settings.coloring.pool, vec!["#f00".to_owned(), "#0f0".to_owned()]);
    }

    #[test]
    fn coloring_json_overrides_flags() {
        let cli = Cli::parse_from([
            "veil-bench",
            "m.png",
            "--mode",
            "value",
            "--coloring-json",
            r#"{"coloring": {"by": "instance"}}"#,
        ]);
        let settings = settings_from_cli(&cli).unwrap();
        assert_eq!(settings.coloring.mode, ColorMode::Instance);
    }

    #[test]
    fn invalid_coloring_json_is_reported() {
        let cli = Cli::parse_from(["veil-bench", "m.png", "--coloring-json", "{"]);
        assert!(settings_from_cli(&cli).unwrap_err().contains("--coloring-json"));
    }

    #[test]
    fn defaults_follow_library() {
        let cli = Cli::parse_from(["veil-bench", "m.png"]);
        assert!(matches!(cli.class, Class::Segmentation));
        assert!(matches!(cli.mode, Mode::Field));
        assert_eq!(cli.seed, Coloring::DEFAULT_SEED);
        assert_eq!(cli.runs, 1);
    }
}
