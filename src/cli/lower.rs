use std::path::PathBuf;
use std::process;

use clap::Args;
use tracing::info;

use tile_lower::lower_module;

use super::{load_module, report, resolve_options};

#[derive(Args)]
pub struct LowerArgs {
    /// Kernel module (.json)
    pub input: PathBuf,
    /// Output file for the lowered module (default: stdout)
    #[arg(short, long)]
    pub output: Option<PathBuf>,
    /// Warps per CTA, overriding the module and the config file
    #[arg(long)]
    pub num_warps: Option<u32>,
    /// Lowering options (.json)
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,
}

pub fn cmd_lower(args: LowerArgs) {
    let LowerArgs {
        input,
        output,
        num_warps,
        config,
    } = args;
    let module = load_module(&input);
    let options = resolve_options(config.as_deref(), num_warps);

    let lowered = match lower_module(&module, &options) {
        Ok(lowered) => lowered,
        Err(diagnostics) => {
            report(&diagnostics, &module);
            eprintln!(
                "error: could not lower '{}' ({} error{})",
                module.kernel.name,
                diagnostics.len(),
                if diagnostics.len() == 1 { "" } else { "s" }
            );
            process::exit(1);
        }
    };
    info!(kernel = %module.kernel.name, "lowered");

    let text = lowered.to_string();
    match output {
        Some(path) => {
            if let Err(e) = std::fs::write(&path, &text) {
                eprintln!("error: cannot write '{}': {}", path.display(), e);
                process::exit(1);
            }
            eprintln!("Lowered {} -> {}", input.display(), path.display());
        }
        None => print!("{}", text),
    }
}
