//! Tile-level input IR.
//!
//! A kernel is a flat, SSA-numbered list of tile operations over tensors
//! that carry a layout encoding. Modules are read from JSON:
//!
//! ```text
//! { "num_warps": 4,
//!   "kernel": { "name": "copy",
//!               "args": [ { "id": 0, "ty": { "ptr": "f32" }, "divisibility": 16 } ],
//!               "body": [ { "result": 1, "ty": { ... }, "op": "make_range",
//!                           "start": 0, "end": 128 }, ... ] } }
//! ```

mod builder;
mod types;

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{LowerError, LowerResult};
use crate::location::Location;

pub use builder::KernelBuilder;
pub use types::{ElemType, ScalarType, TensorType, Type};

/// SSA value in the tile IR.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ValueId(pub u32);

impl fmt::Display for ValueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

/// Position of an operation within its kernel body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OpId(pub u32);

// ─── Operations ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConstValue {
    Bool(bool),
    Int(i64),
    Float(f64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BinaryOp {
    AddI,
    SubI,
    MulI,
    AddF,
    SubF,
    MulF,
}

impl BinaryOp {
    pub fn is_float(self) -> bool {
        matches!(self, BinaryOp::AddF | BinaryOp::SubF | BinaryOp::MulF)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheModifier {
    #[default]
    None,
    Ca,
    Cg,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictionPolicy {
    #[default]
    Normal,
    EvictFirst,
    EvictLast,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum OpKind {
    // ── Creation ──
    /// One scalar replicated into every element.
    Splat { src: ValueId },
    /// Scalar or splat-tensor constant.
    Constant { value: ConstValue },
    /// `[start, end)` as a 1-D `i32` tensor.
    MakeRange { start: u32, end: u32 },
    /// Index of this CTA in the launch grid along `axis`.
    GetProgramId { axis: u32 },

    // ── Elementwise ──
    Binary {
        kind: BinaryOp,
        lhs: ValueId,
        rhs: ValueId,
    },
    /// Pointer plus element offset.
    #[serde(rename = "addptr")]
    AddPtr { ptr: ValueId, offset: ValueId },

    // ── Shape ──
    /// Grow the unit dimensions of `src` to the result shape.
    Broadcast { src: ValueId },
    /// Same elements, new shape.
    View { src: ValueId },
    /// Insert a unit dimension at `axis`.
    ExpandDims { src: ValueId, axis: u32 },
    /// Same logical tensor, different distribution.
    ConvertLayout { src: ValueId },

    // ── Memory ──
    Load {
        ptr: ValueId,
        #[serde(default)]
        mask: Option<ValueId>,
        #[serde(default)]
        other: Option<ValueId>,
        #[serde(default)]
        cache: CacheModifier,
        #[serde(default)]
        evict: EvictionPolicy,
        #[serde(default)]
        is_volatile: bool,
    },
    Store {
        ptr: ValueId,
        value: ValueId,
        #[serde(default)]
        mask: Option<ValueId>,
        #[serde(default)]
        cache: CacheModifier,
        #[serde(default)]
        evict: EvictionPolicy,
    },

    // ── Control ──
    Return {
        #[serde(default)]
        operands: Vec<ValueId>,
    },
}

impl OpKind {
    pub fn name(&self) -> &'static str {
        match self {
            OpKind::Splat { .. } => "splat",
            OpKind::Constant { .. } => "constant",
            OpKind::MakeRange { .. } => "make_range",
            OpKind::GetProgramId { .. } => "get_program_id",
            OpKind::Binary { .. } => "binary",
            OpKind::AddPtr { .. } => "addptr",
            OpKind::Broadcast { .. } => "broadcast",
            OpKind::View { .. } => "view",
            OpKind::ExpandDims { .. } => "expand_dims",
            OpKind::ConvertLayout { .. } => "convert_layout",
            OpKind::Load { .. } => "load",
            OpKind::Store { .. } => "store",
            OpKind::Return { .. } => "return",
        }
    }

    pub fn operands(&self) -> Vec<ValueId> {
        match self {
            OpKind::Constant { .. } | OpKind::MakeRange { .. } | OpKind::GetProgramId { .. } => {
                Vec::new()
            }
            OpKind::Splat { src }
            | OpKind::Broadcast { src }
            | OpKind::View { src }
            | OpKind::ExpandDims { src, .. }
            | OpKind::ConvertLayout { src } => vec![*src],
            OpKind::Binary { lhs, rhs, .. } => vec![*lhs, *rhs],
            OpKind::AddPtr { ptr, offset } => vec![*ptr, *offset],
            OpKind::Load {
                ptr, mask, other, ..
            } => std::iter::once(*ptr).chain(*mask).chain(*other).collect(),
            OpKind::Store {
                ptr, value, mask, ..
            } => [*ptr, *value].into_iter().chain(*mask).collect(),
            OpKind::Return { operands } => operands.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ValueId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ty: Option<Type>,
    #[serde(flatten)]
    pub kind: OpKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loc: Option<Location>,
}

impl Operation {
    pub fn new(result: Option<ValueId>, ty: Option<Type>, kind: OpKind) -> Self {
        Self {
            result,
            ty,
            kind,
            loc: None,
        }
    }

    pub fn at(mut self, loc: Location) -> Self {
        self.loc = Some(loc);
        self
    }

    pub fn location(&self) -> Location {
        self.loc.unwrap_or_default()
    }
}

// ─── Kernel / Module ───────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KernelArg {
    pub id: ValueId,
    pub ty: Type,
    /// Known byte alignment of a pointer argument.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub divisibility: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Kernel {
    pub name: String,
    #[serde(default)]
    pub args: Vec<KernelArg>,
    pub body: Vec<Operation>,
}

impl Kernel {
    /// Type of every value, from arguments and op results.
    pub fn value_types(&self) -> LowerResult<HashMap<ValueId, Type>> {
        let mut types = HashMap::new();
        let defs = self
            .args
            .iter()
            .map(|a| (a.id, Some(&a.ty)))
            .chain(self.body.iter().filter_map(|op| op.result.map(|r| (r, op.ty.as_ref()))));
        for (id, ty) in defs {
            let ty = ty.ok_or_else(|| LowerError::invariant(format!("{} has no type", id)))?;
            if ty.as_tensor().is_some_and(|t| t.shape.contains(&0)) {
                return Err(LowerError::invariant(format!("{} has a zero extent in {}", id, ty)));
            }
            if types.insert(id, ty.clone()).is_some() {
                return Err(LowerError::invariant(format!("{} is defined twice", id)));
            }
        }
        Ok(types)
    }

    /// The constant op defining each value, for ops that fold constants.
    pub fn constants(&self) -> HashMap<ValueId, ConstValue> {
        self.body
            .iter()
            .filter_map(|op| match (&op.kind, op.result) {
                (OpKind::Constant { value }, Some(r)) => Some((r, *value)),
                _ => None,
            })
            .collect()
    }

    pub fn ops(&self) -> impl Iterator<Item = (OpId, &Operation)> {
        self.body
            .iter()
            .enumerate()
            .map(|(i, op)| (OpId(i as u32), op))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TensorModule {
    /// Warps per CTA the layouts were chosen for.
    #[serde(default)]
    pub num_warps: Option<u32>,
    /// Source file the locations refer to, for rendering diagnostics.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<PathBuf>,
    pub kernel: Kernel,
}

impl TensorModule {
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

#[cfg(test)]
mod tests;
