#![allow(missing_docs)]

use clap::Parser;
use std::process::ExitCode;
use wavecal_cli::{Opts, ERROR_RETURN};

fn main() -> ExitCode {
    let opts = Opts::parse();

    match wavecal_cli::run(&opts) {
        Ok(code) => code,
        Err(err) => {
            println!("ERROR    {err:#}");
            ExitCode::from(ERROR_RETURN)
        }
    }
}
