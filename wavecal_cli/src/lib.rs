#![allow(clippy::missing_errors_doc)]
#![allow(missing_docs)]

mod fits;
mod tables;

use anyhow::{bail, Context, Result};
use clap::Parser;
use git_version::git_version;
use std::path::Path;
use std::process::ExitCode;
use wavecal::debug::{DebugSink, NullSink, TextFileSink};
use wavecal::exposure::{Disperser, Exposure};
use wavecal::{Outcome, RunConfig};

pub use fits::{FitsExposure, FitsImageSink};

/// Exit status for any fatal error, matching the calibration-pipeline
/// convention.
pub const ERROR_RETURN: u8 = 2;

#[derive(Parser)]
#[command(
    arg_required_else_help = true,
    author,
    about = "Determine MSM-induced wavecal shifts and write SHIFTA1/SHIFTA2 back to the exposure",
    disable_help_subcommand = true,
    name = "wavecal",
    version = git_version!(
        args = ["--always", "--dirty", "--long", "--tags"],
        cargo_prefix = "",
        fallback = "unknown"
    )
)]
pub struct Opts {
    /// Input wavecal images.
    #[arg(value_name = "INPUT")]
    pub input: Vec<String>,
    /// Print a timestamp after each major step.
    #[arg(short = 't')]
    pub print_time: bool,
    /// Print additional diagnostic output.
    #[arg(short = 'v')]
    pub verbose: bool,
    /// Debug-output files, comma separated, one per input.  Text for
    /// gratings and the prism; a FITS image file for echelle data.
    #[arg(short = 'd', value_name = "FILE")]
    pub debug: Option<String>,
    /// Slit angle in degrees, for a long slit used with an echelle.
    #[arg(long, default_value_t = 0.0, value_name = "DEGREES")]
    pub angle: f64,
    /// Print full version detail and exit.
    #[arg(short = 'r')]
    pub full_version: bool,
}

/// Runs the tool for every input on the command line.
pub fn run(opts: &Opts) -> Result<ExitCode> {
    if opts.full_version {
        println!(
            "wavecal {} ({})",
            env!("CARGO_PKG_VERSION"),
            git_version!(
                args = ["--always", "--dirty", "--long", "--tags"],
                cargo_prefix = "",
                fallback = "unknown"
            )
        );
        return Ok(ExitCode::SUCCESS);
    }

    if opts.input.is_empty() {
        bail!("no input files specified");
    }

    let debug_files: Vec<&str> = opts
        .debug
        .as_deref()
        .map(|list| list.split(',').map(str::trim).collect())
        .unwrap_or_default();
    if !debug_files.is_empty() && debug_files.len() != opts.input.len() {
        bail!(
            "you specified {} input file(s) but {} debug file(s)",
            opts.input.len(),
            debug_files.len()
        );
    }

    let mut failed = false;
    for (n, input) in opts.input.iter().enumerate() {
        let dbgfile = debug_files.get(n).copied();
        if let Err(err) = process_one(input, dbgfile, opts) {
            println!("Error processing {input}.");
            println!("{err:#}");
            failed = true;
        }
    }

    if failed {
        Ok(ExitCode::from(ERROR_RETURN))
    } else {
        Ok(ExitCode::SUCCESS)
    }
}

/// Processes a single exposure: open, resolve reference tables, find
/// the shifts, update the headers.
fn process_one(input: &str, dbgfile: Option<&str>, opts: &Opts) -> Result<()> {
    println!("Begin WAVECAL: {input}");

    let mut exposure =
        FitsExposure::open(Path::new(input)).with_context(|| format!("opening {input}"))?;
    let info = exposure.primary()?;
    let disperser = info.disperser();

    let base = Path::new(input).parent().map(Path::to_path_buf);
    let tables = tables::load_tables(&exposure.bindings(), base.as_deref())
        .with_context(|| format!("resolving reference tables for {input}"))?;

    let config = RunConfig {
        input: input.to_owned(),
        verbose: opts.verbose || dbgfile.is_some(),
        print_time: opts.print_time,
        slit_angle: opts.angle.to_radians(),
        trace_rotation: 0.0,
    };

    // echelle debug output is a FITS image file; everything else gets
    // an appended text file
    let mut sink: Box<dyn DebugSink> = match dbgfile {
        None => Box::new(NullSink),
        Some(path) if disperser == Disperser::Echelle => {
            Box::new(FitsImageSink::new(Path::new(path)))
        }
        Some(path) => match TextFileSink::open(Path::new(path)) {
            Ok(sink) => Box::new(sink),
            Err(err) => {
                println!("Warning  Can't open debug file {path}: {err}");
                Box::new(NullSink)
            }
        },
    };

    let outcome = wavecal::wavecal(&mut exposure, &tables, &config, sink.as_mut())?;
    match outcome {
        Outcome::Completed => println!("End   WAVECAL: {input}"),
        Outcome::Skipped => println!("End   WAVECAL: {input} (skipped)"),
    }

    Ok(())
}
