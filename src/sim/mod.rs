//! SIMT interpreter for lowered kernels.
//!
//! Runs every thread of one CTA against a byte-addressed global memory
//! and the CTA's `global_smem` array. Threads advance independently up to
//! their next barrier; a barrier completes once every thread of the CTA
//! waits at one. A thread that returns while others wait is a divergence
//! error, which is how tests observe barrier placement.
//!
//! Inline PTX is interpreted for the subset the memory rules emit:
//! predicated `ld`/`st` of `.bW` words (optionally `.vN`) on `.global`
//! or `.shared`, and `mov.uW` between registers and immediates.

mod exec;
mod ptx;

use thiserror::Error;
use tracing::debug;

use crate::config::{DEFAULT_NUM_WARPS, GLOBAL_ADDRESS_SPACE, SHARED_ADDRESS_SPACE, SHARED_MEMORY_GLOBAL, WARP_SIZE};
use crate::ir::{Module, Type, Value};

use exec::{Machine, Stop, Thread};

// ─── Values ────────────────────────────────────────────────────────

/// Runtime value of one SSA value in one thread.
#[derive(Debug, Clone, PartialEq)]
pub enum Val {
    /// Integer bits, masked to the value's width.
    Int(u64),
    Float(f64),
    /// Byte address in the pointer's address space.
    Ptr(u64),
    /// Struct, vector or array fields.
    Agg(Vec<Val>),
    Undef,
}

impl Val {
    /// Undefined value of type `ty`; aggregates get undefined fields.
    pub fn undef(ty: &Type) -> Val {
        match ty {
            Type::Struct(fields) => Val::Agg(fields.iter().map(Val::undef).collect()),
            Type::Vector { len, elem } | Type::Array { len, elem } => {
                Val::Agg(vec![Val::undef(elem); *len as usize])
            }
            _ => Val::Undef,
        }
    }

    pub fn as_int(&self) -> Result<u64, SimError> {
        match self {
            Val::Int(v) => Ok(*v),
            other => Err(SimError::TypeMismatch(format!("expected an integer, found {:?}", other))),
        }
    }

    pub fn as_float(&self) -> Result<f64, SimError> {
        match self {
            Val::Float(v) => Ok(*v),
            other => Err(SimError::TypeMismatch(format!("expected a float, found {:?}", other))),
        }
    }

    pub fn as_ptr(&self) -> Result<u64, SimError> {
        match self {
            Val::Ptr(a) => Ok(*a),
            other => Err(SimError::TypeMismatch(format!("expected a pointer, found {:?}", other))),
        }
    }

    pub fn field(&self, index: usize) -> Result<&Val, SimError> {
        match self {
            Val::Agg(items) => items
                .get(index)
                .ok_or_else(|| SimError::TypeMismatch(format!("no field {} in {:?}", index, self))),
            other => Err(SimError::TypeMismatch(format!("field {} of {:?}", index, other))),
        }
    }

    pub fn set_field(&mut self, index: usize, value: Val) -> Result<(), SimError> {
        match self {
            Val::Agg(items) if index < items.len() => {
                items[index] = value;
                Ok(())
            }
            other => Err(SimError::TypeMismatch(format!("field {} of {:?}", index, other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SimError {
    #[error("{0} is read before it is defined")]
    Undefined(Value),
    #[error("type mismatch: {0}")]
    TypeMismatch(String),
    #[error("access of {len} bytes at {addr:#x} in address space {space} is out of bounds")]
    OutOfBounds { space: u32, addr: u64, len: usize },
    #[error("{waiting} threads wait at a barrier that {returned} returned threads never reach")]
    BarrierDivergence { waiting: usize, returned: usize },
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("no function `{0}`")]
    NoFunction(String),
    #[error("step limit of {0} exceeded")]
    StepLimit(u64),
}

// ─── Memory ────────────────────────────────────────────────────────

/// Bytes at address 0 that no allocation covers, so null is out of bounds.
const NULL_GUARD: usize = 256;
const ALLOC_ALIGN: usize = 256;

/// Host-visible global memory.
#[derive(Debug, Clone)]
pub struct GlobalMemory {
    bytes: Vec<u8>,
}

impl Default for GlobalMemory {
    fn default() -> Self {
        Self::new()
    }
}

impl GlobalMemory {
    pub fn new() -> Self {
        Self {
            bytes: vec![0; NULL_GUARD],
        }
    }

    /// Zeroed allocation of `len` bytes; returns its address.
    pub fn alloc(&mut self, len: usize) -> u64 {
        let addr = self.bytes.len().next_multiple_of(ALLOC_ALIGN);
        self.bytes.resize(addr + len, 0);
        addr as u64
    }

    fn range(&self, addr: u64, len: usize) -> Result<std::ops::Range<usize>, SimError> {
        let oob = || SimError::OutOfBounds {
            space: GLOBAL_ADDRESS_SPACE,
            addr,
            len,
        };
        let start = usize::try_from(addr).map_err(|_| oob())?;
        let end = start.checked_add(len).ok_or_else(oob)?;
        if start < NULL_GUARD || end > self.bytes.len() {
            return Err(oob());
        }
        Ok(start..end)
    }

    pub fn read(&self, addr: u64, len: usize) -> Result<&[u8], SimError> {
        let range = self.range(addr, len)?;
        Ok(&self.bytes[range])
    }

    pub fn write(&mut self, addr: u64, data: &[u8]) -> Result<(), SimError> {
        let range = self.range(addr, data.len())?;
        self.bytes[range].copy_from_slice(data);
        Ok(())
    }

    pub fn write_f32s(&mut self, addr: u64, values: &[f32]) -> Result<(), SimError> {
        let data: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        self.write(addr, &data)
    }

    pub fn read_f32s(&self, addr: u64, count: usize) -> Result<Vec<f32>, SimError> {
        let data = self.read(addr, count * 4)?;
        Ok(data
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect())
    }

    pub fn write_i32s(&mut self, addr: u64, values: &[i32]) -> Result<(), SimError> {
        let data: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        self.write(addr, &data)
    }

    pub fn read_i32s(&self, addr: u64, count: usize) -> Result<Vec<i32>, SimError> {
        let data = self.read(addr, count * 4)?;
        Ok(data
            .chunks_exact(4)
            .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect())
    }
}

/// Both address spaces a kernel sees.
pub(crate) struct Memory<'a> {
    global: &'a mut GlobalMemory,
    shared: Vec<u8>,
}

impl Memory<'_> {
    fn shared_range(&self, addr: u64, len: usize) -> Result<std::ops::Range<usize>, SimError> {
        let oob = || SimError::OutOfBounds {
            space: SHARED_ADDRESS_SPACE,
            addr,
            len,
        };
        let start = usize::try_from(addr).map_err(|_| oob())?;
        let end = start.checked_add(len).ok_or_else(oob)?;
        if end > self.shared.len() {
            return Err(oob());
        }
        Ok(start..end)
    }

    pub(crate) fn read(&self, space: u32, addr: u64, len: usize) -> Result<&[u8], SimError> {
        match space {
            GLOBAL_ADDRESS_SPACE => self.global.read(addr, len),
            SHARED_ADDRESS_SPACE => {
                let range = self.shared_range(addr, len)?;
                Ok(&self.shared[range])
            }
            other => Err(SimError::Unsupported(format!("address space {}", other))),
        }
    }

    pub(crate) fn write(&mut self, space: u32, addr: u64, data: &[u8]) -> Result<(), SimError> {
        match space {
            GLOBAL_ADDRESS_SPACE => self.global.write(addr, data),
            SHARED_ADDRESS_SPACE => {
                let range = self.shared_range(addr, data.len())?;
                self.shared[range].copy_from_slice(data);
                Ok(())
            }
            other => Err(SimError::Unsupported(format!("address space {}", other))),
        }
    }
}

// ─── Launch ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchConfig {
    pub num_warps: u32,
    /// Index of the simulated CTA in the grid.
    pub block_idx: [u32; 3],
    /// Instructions executed across all threads before giving up.
    pub max_steps: u64,
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self {
            num_warps: DEFAULT_NUM_WARPS,
            block_idx: [0; 3],
            max_steps: 10_000_000,
        }
    }
}

impl LaunchConfig {
    pub fn with_warps(num_warps: u32) -> Self {
        Self {
            num_warps,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimStats {
    /// CTA-wide barriers completed.
    pub barriers: u64,
    /// Instructions executed, summed over threads.
    pub steps: u64,
}

/// Run one CTA of `kernel` to completion.
pub fn run(
    module: &Module,
    kernel: &str,
    args: &[Val],
    global: &mut GlobalMemory,
    cfg: &LaunchConfig,
) -> Result<SimStats, SimError> {
    let func = module
        .function(kernel)
        .ok_or_else(|| SimError::NoFunction(kernel.to_string()))?;
    if args.len() != func.params.len() {
        return Err(SimError::TypeMismatch(format!(
            "`{}` takes {} arguments, {} given",
            kernel,
            func.params.len(),
            args.len()
        )));
    }
    let smem_bytes = module
        .global(SHARED_MEMORY_GLOBAL)
        .map(|g| g.ty.byte_size() as usize)
        .unwrap_or(0);

    let num_threads = WARP_SIZE * cfg.num_warps;
    let mut threads: Vec<Thread> = (0..num_threads)
        .map(|tid| Thread::new(tid, func, args))
        .collect();
    let mut machine = Machine {
        func,
        cfg,
        memory: Memory {
            global,
            shared: vec![0; smem_bytes],
        },
        stats: SimStats::default(),
    };

    loop {
        let mut waiting = 0;
        let mut returned = 0;
        for thread in threads.iter_mut() {
            if thread.done {
                returned += 1;
                continue;
            }
            match machine.resume(thread)? {
                Stop::Barrier => waiting += 1,
                Stop::Returned => returned += 1,
            }
        }
        if returned == threads.len() {
            break;
        }
        if waiting == threads.len() {
            machine.stats.barriers += 1;
            continue;
        }
        return Err(SimError::BarrierDivergence { waiting, returned });
    }

    debug!(
        kernel,
        threads = num_threads,
        barriers = machine.stats.barriers,
        steps = machine.stats.steps,
        "simulated"
    );
    Ok(machine.stats)
}
