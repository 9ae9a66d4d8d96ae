pub mod layout;
pub mod lower;

use std::path::Path;
use std::process;

use tile_lower::config::LowerOptions;
use tile_lower::diagnostic::{render_diagnostics, Diagnostic};
use tile_lower::tensor::TensorModule;

/// Read a file or exit with an error.
pub fn read_file(path: &Path) -> String {
    match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) => {
            eprintln!("error: cannot read '{}': {}", path.display(), e);
            process::exit(1);
        }
    }
}

/// Parse a kernel module from its JSON file.
pub fn load_module(path: &Path) -> TensorModule {
    let text = read_file(path);
    match TensorModule::from_json(&text) {
        Ok(module) => module,
        Err(e) => {
            eprintln!("error: '{}' is not a kernel module: {}", path.display(), e);
            process::exit(1);
        }
    }
}

/// Options from `--config`, with command-line overrides applied.
pub fn resolve_options(config: Option<&Path>, num_warps: Option<u32>) -> LowerOptions {
    let mut options = match config {
        Some(path) => match LowerOptions::load(path) {
            Ok(options) => options,
            Err(e) => {
                eprintln!("error: {}", e);
                process::exit(1);
            }
        },
        None => LowerOptions::default(),
    };
    if num_warps.is_some() {
        options.num_warps = num_warps;
    }
    options
}

/// Print diagnostics against the module's source file when it is readable.
pub fn report(diagnostics: &[Diagnostic], module: &TensorModule) {
    let source = module
        .source
        .as_deref()
        .and_then(|path| std::fs::read_to_string(path).ok().map(|text| (path, text)));
    match source {
        Some((path, text)) => render_diagnostics(diagnostics, &path.display().to_string(), &text),
        None => {
            for diag in diagnostics {
                eprintln!("{}", diag.summary());
            }
        }
    }
}
