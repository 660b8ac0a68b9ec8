use std::io;

use clap::Parser;

fn main() -> io::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = chunkvault_cli::cli::Cli::parse();
    cli.start()
}
