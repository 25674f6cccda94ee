//! rpack - command-line bundler for client renderer sources

use std::process::ExitCode;

use renderpack::cli;

fn main() -> ExitCode {
    cli::run()
}
