use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod cli;

use cli::layout::{cmd_layout, LayoutArgs};
use cli::lower::{cmd_lower, LowerArgs};

#[derive(Parser)]
#[command(
    name = "tile-lower",
    version,
    about = "Lower tile-parallel GPU kernels to per-thread IR"
)]
struct Cli {
    /// Log lowering decisions (overrides TILE_LOWER_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Lower a kernel module (.json) to per-thread IR
    Lower(LowerArgs),
    /// Show which elements each thread owns under a blocked layout
    Layout(LayoutArgs),
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("tile_lower=debug")
    } else {
        EnvFilter::try_from_env("TILE_LOWER_LOG").unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Command::Lower(args) => cmd_lower(args),
        Command::Layout(args) => cmd_layout(args),
    }
}
