#![deny(unsafe_code)]

#[path = "cli.rs"]
mod cli;

use std::process::ExitCode;

fn main() -> ExitCode {
    cli::run()
}
