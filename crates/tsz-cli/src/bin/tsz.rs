#![allow(clippy::print_stderr)]

use clap::Parser;

use tsz_cli::args::CliArgs;
use tsz_cli::{driver, tracing_config};

fn main() {
    // Zero cost unless TSZ_LOG or RUST_LOG is set.
    tracing_config::init_tracing();

    let args = CliArgs::parse();
    let code = match driver::run(&args) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            driver::EXIT_DIAGNOSTICS_OUTPUTS_SKIPPED
        }
    };
    std::process::exit(code);
}
