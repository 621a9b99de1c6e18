//! nmtpack command-line converter
//!
//! Turns a trained translation checkpoint into the flat binary artifact read
//! by the inference runtime.
//!
//! ## Usage
//!
//! ```bash
//! # fp32 artifact plus model.bin.info.txt
//! nmtpack -i checkpoint_best.safetensors -o model.bin
//!
//! # Half-precision values with the optimizer moments appended
//! nmtpack -i checkpoint_last.safetensors -o model.bin --precision fp16 --save-optimizer
//!
//! # Options from a file; flags given here still win
//! nmtpack --config convert.json --log-level debug
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use nmtpack::{ConversionReport, ConvertOptions, Converter};
use nmtpack_core::{Precision, Result};

#[derive(Parser, Debug)]
#[command(name = "nmtpack")]
#[command(version)]
#[command(about = "Convert a translation checkpoint into a runtime artifact", long_about = None)]
struct Args {
    /// Input checkpoint (safetensors)
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Output artifact path
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Parameter precision (fp32, fp16)
    #[arg(long)]
    precision: Option<String>,

    /// Append the optimizer moments after the parameters
    #[arg(long)]
    save_optimizer: bool,

    /// JSON file overriding fields of the checkpoint's architecture record
    #[arg(long)]
    arch: Option<PathBuf>,

    /// Skip the <output>.info.txt report
    #[arg(long)]
    no_info: bool,

    /// Hide the progress bar
    #[arg(short, long)]
    quiet: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Options file (JSON); command-line values override it
    #[arg(short, long)]
    config: Option<PathBuf>,
}

impl Args {
    fn options(&self) -> Result<ConvertOptions> {
        let mut opts = match &self.config {
            Some(path) => ConvertOptions::from_json_file(path)?,
            None => ConvertOptions::default(),
        };

        if let Some(input) = &self.input {
            opts.input = input.clone();
        }
        if let Some(output) = &self.output {
            opts.output = output.clone();
        }
        if let Some(precision) = &self.precision {
            opts.precision = precision.parse::<Precision>()?;
        }
        if let Some(arch) = &self.arch {
            opts.arch_override = Some(arch.clone());
        }
        if self.save_optimizer {
            opts.save_optimizer = true;
        }
        if self.no_info {
            opts.write_info = false;
        }
        if self.quiet {
            opts.show_progress = false;
        }
        Ok(opts)
    }
}

fn main() -> ExitCode {
    let args = Args::parse();

    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("failed to set tracing subscriber: {e}");
    }

    match run(&args) {
        Ok(report) => {
            summarize(&report);
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(category = e.category(), "{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<ConversionReport> {
    let opts = args.options()?;
    info!(
        input = %opts.input.display(),
        output = %opts.output.display(),
        precision = %opts.precision,
        save_optimizer = opts.save_optimizer,
        "Converting checkpoint"
    );
    Converter::new(opts).run()
}

fn summarize(report: &ConversionReport) {
    info!("Artifact:        {}", report.output.display());
    info!("  Precision:     {}", report.precision);
    info!("  Entries:       {}", report.entries);
    info!("  Values:        {}", report.parameter_values);
    info!("  Size:          {} bytes", report.bytes_written);
    match report.optimizer_step {
        Some(step) => info!("  Optimizer:     appended (step {})", step),
        None => info!("  Optimizer:     not appended"),
    }
    if !report.omitted.is_empty() {
        info!("  Shared:        {}", report.omitted.join(", "));
    }
    if !report.skipped.is_empty() {
        warn!(
            "  Dropped {} one-element parameter(s): {}",
            report.skipped.len(),
            report.skipped.join(", ")
        );
    }
    if let Some(path) = &report.info_path {
        info!("  Info:          {}", path.display());
    }
    info!("  Elapsed:       {:.2}s", report.elapsed_secs);
}
