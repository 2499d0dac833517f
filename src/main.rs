use clap::Parser;
use evotrader::cli::{run, Cli};

fn main() -> std::process::ExitCode {
    run(Cli::parse())
}
