use std::process::ExitCode;

use clap::Parser;
use layerpaint::cli::{self, CliArgs};
use layerpaint::logger;

fn main() -> ExitCode {
    let args = CliArgs::parse();
    logger::init(args.verbose);
    cli::run(args)
}
