//! Lowering options.
//!
//! Options come from three places, later ones winning:
//!   1. built-in defaults
//!   2. a JSON options file (`--config`)
//!   3. command-line flags
//!
//! The input module's own `num_warps` is used when neither the file nor
//! the command line sets one.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Threads per warp. Fixed for every supported target.
pub const WARP_SIZE: u32 = 32;

/// Warps per CTA when nothing else says otherwise.
pub const DEFAULT_NUM_WARPS: u32 = 4;

/// Bit width of the lowered index type.
pub const INDEX_BITS: u32 = 32;

/// Name of the module-level shared-memory array.
pub const SHARED_MEMORY_GLOBAL: &str = "global_smem";

/// Address space of on-chip shared memory.
pub const SHARED_ADDRESS_SPACE: u32 = 3;

/// Address space of global memory pointers.
pub const GLOBAL_ADDRESS_SPACE: u32 = 1;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid options file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid option: {0}")]
    Invalid(String),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LowerOptions {
    /// Warps per CTA; overrides the module attribute when set.
    pub num_warps: Option<u32>,
    /// Target name. Only `nvptx` is supported.
    pub target: String,
    /// Alignment in bytes of every shared-memory region.
    pub smem_alignment: u32,
    /// Attach source locations to lowered instructions.
    pub emit_locations: bool,
}

impl Default for LowerOptions {
    fn default() -> Self {
        Self {
            num_warps: None,
            target: "nvptx".to_string(),
            smem_alignment: 16,
            emit_locations: true,
        }
    }
}

impl LowerOptions {
    /// Load options from a JSON file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let options: LowerOptions = serde_json::from_str(text)?;
        options.validate()?;
        Ok(options)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(n) = self.num_warps {
            validate_num_warps(n)?;
        }
        if self.target != "nvptx" {
            return Err(ConfigError::Invalid(format!(
                "unsupported target '{}' (expected 'nvptx')",
                self.target
            )));
        }
        if self.smem_alignment == 0 || !self.smem_alignment.is_power_of_two() {
            return Err(ConfigError::Invalid(format!(
                "smem_alignment must be a power of two, got {}",
                self.smem_alignment
            )));
        }
        Ok(())
    }

    /// Warps per CTA for a module that declares `module_num_warps`.
    pub fn resolve_num_warps(&self, module_num_warps: Option<u32>) -> Result<u32, ConfigError> {
        let n = self
            .num_warps
            .or(module_num_warps)
            .unwrap_or(DEFAULT_NUM_WARPS);
        validate_num_warps(n)?;
        Ok(n)
    }
}

fn validate_num_warps(n: u32) -> Result<(), ConfigError> {
    if n == 0 || n > 32 || !n.is_power_of_two() {
        return Err(ConfigError::Invalid(format!(
            "num_warps must be a power of two in 1..=32, got {}",
            n
        )));
    }
    Ok(())
}
