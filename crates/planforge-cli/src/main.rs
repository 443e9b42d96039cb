mod cli;
mod commands;
mod graph;
mod options;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Command};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Build(args) => {
            commands::build(&args)?;
        }
        Command::Run(args) => {
            for tensor in commands::run(&args)? {
                println!("{} {}", tensor.desc.dtype, tensor.desc.shape);
            }
        }
        Command::Inspect { model } => {
            print!("{}", commands::inspect(&model)?);
        }
    }
    Ok(())
}
