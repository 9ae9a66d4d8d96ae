//! Lowered per-thread IR.
//!
//! LLVM-dialect-shaped: typed SSA values, basic blocks with explicit
//! predecessor lists, aggregate/vector element access, and opaque inline
//! PTX for instructions the IR does not model.
//!
//! Every value's type lives in its function's `value_types` table, so
//! instructions only name their operands.

pub mod builder;
pub mod ptx;
#[cfg(test)]
mod tests;

use std::collections::BTreeMap;
use std::fmt;

use crate::location::Location;

// ─── Values, Blocks ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Value(pub u32);

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockId(pub u32);

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "^bb{}", self.0)
    }
}

// ─── Types ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    Void,
    Int(u32),
    F16,
    F32,
    F64,
    Ptr { pointee: Box<Type>, space: u32 },
    Vector { len: u32, elem: Box<Type> },
    Struct(Vec<Type>),
    Array { len: u32, elem: Box<Type> },
}

impl Type {
    pub fn ptr(pointee: Type, space: u32) -> Self {
        Type::Ptr {
            pointee: Box::new(pointee),
            space,
        }
    }

    pub fn vector(len: u32, elem: Type) -> Self {
        Type::Vector {
            len,
            elem: Box::new(elem),
        }
    }

    pub fn array(len: u32, elem: Type) -> Self {
        Type::Array {
            len,
            elem: Box::new(elem),
        }
    }

    /// Bit width of an integer or float scalar.
    pub fn scalar_bits(&self) -> Option<u32> {
        match self {
            Type::Int(bits) => Some(*bits),
            Type::F16 => Some(16),
            Type::F32 => Some(32),
            Type::F64 => Some(64),
            _ => None,
        }
    }

    /// Bytes occupied in memory; `i1` takes a whole byte, pointers eight.
    pub fn byte_size(&self) -> u32 {
        match self {
            Type::Void => 0,
            Type::Int(_) | Type::F16 | Type::F32 | Type::F64 => {
                self.scalar_bits().unwrap_or(8).div_ceil(8)
            }
            Type::Ptr { .. } => 8,
            Type::Vector { len, elem } | Type::Array { len, elem } => len * elem.byte_size(),
            Type::Struct(fields) => fields.iter().map(Type::byte_size).sum(),
        }
    }

    pub fn is_float(&self) -> bool {
        matches!(self, Type::F16 | Type::F32 | Type::F64)
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Void => write!(f, "void"),
            Type::Int(bits) => write!(f, "i{}", bits),
            Type::F16 => write!(f, "f16"),
            Type::F32 => write!(f, "f32"),
            Type::F64 => write!(f, "f64"),
            Type::Ptr { pointee, space } => write!(f, "ptr<{}, {}>", pointee, space),
            Type::Vector { len, elem } => write!(f, "vector<{}x{}>", len, elem),
            Type::Array { len, elem } => write!(f, "array<{} x {}>", len, elem),
            Type::Struct(fields) => {
                write!(f, "struct<(")?;
                for (i, t) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", t)?;
                }
                write!(f, ")>")
            }
        }
    }
}

// ─── Instructions ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Constant {
    Int(i64),
    Float(f64),
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constant::Int(v) => write!(f, "{}", v),
            Constant::Float(v) => write!(f, "{:?}", v),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    UDiv,
    URem,
    FAdd,
    FSub,
    FMul,
}

impl BinOp {
    pub fn mnemonic(self) -> &'static str {
        match self {
            BinOp::Add => "add",
            BinOp::Sub => "sub",
            BinOp::Mul => "mul",
            BinOp::UDiv => "udiv",
            BinOp::URem => "urem",
            BinOp::FAdd => "fadd",
            BinOp::FSub => "fsub",
            BinOp::FMul => "fmul",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CastOp {
    Bitcast,
    SExt,
    Trunc,
}

impl CastOp {
    pub fn mnemonic(self) -> &'static str {
        match self {
            CastOp::Bitcast => "bitcast",
            CastOp::SExt => "sext",
            CastOp::Trunc => "trunc",
        }
    }
}

/// Grid dimension for thread and block id reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Dim {
    X,
    Y,
    Z,
}

impl Dim {
    pub fn from_axis(axis: u32) -> Option<Dim> {
        match axis {
            0 => Some(Dim::X),
            1 => Some(Dim::Y),
            2 => Some(Dim::Z),
            _ => None,
        }
    }
}

impl fmt::Display for Dim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Dim::X => "x",
            Dim::Y => "y",
            Dim::Z => "z",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Inst {
    // ── Values ──
    Const { dst: Value, value: Constant },
    Undef { dst: Value },
    Binary { dst: Value, op: BinOp, lhs: Value, rhs: Value },
    Cast { dst: Value, op: CastOp, src: Value },

    // ── Aggregates ──
    InsertValue { dst: Value, aggregate: Value, value: Value, index: u32 },
    ExtractValue { dst: Value, aggregate: Value, index: u32 },
    InsertElement { dst: Value, vector: Value, value: Value, index: Value },
    ExtractElement { dst: Value, vector: Value, index: Value },

    // ── Memory ──
    Gep { dst: Value, base: Value, index: Value },
    Load { dst: Value, ptr: Value },
    Store { value: Value, ptr: Value },
    AddressOf { dst: Value, global: String },

    // ── GPU ──
    /// CTA-wide execution and shared-memory barrier.
    Barrier,
    ThreadIdx { dst: Value, dim: Dim },
    BlockIdx { dst: Value, dim: Dim },
    InlineAsm {
        dst: Option<Value>,
        asm: String,
        constraints: String,
        operands: Vec<Value>,
        side_effects: bool,
    },

    // ── Control flow ──
    Phi { dst: Value, incoming: Vec<(Value, BlockId)> },
    Br { target: BlockId },
    CondBr { cond: Value, then_bb: BlockId, else_bb: BlockId },
    Ret,
}

impl Inst {
    pub fn dst(&self) -> Option<Value> {
        match self {
            Inst::Const { dst, .. }
            | Inst::Undef { dst }
            | Inst::Binary { dst, .. }
            | Inst::Cast { dst, .. }
            | Inst::InsertValue { dst, .. }
            | Inst::ExtractValue { dst, .. }
            | Inst::InsertElement { dst, .. }
            | Inst::ExtractElement { dst, .. }
            | Inst::Gep { dst, .. }
            | Inst::Load { dst, .. }
            | Inst::AddressOf { dst, .. }
            | Inst::ThreadIdx { dst, .. }
            | Inst::BlockIdx { dst, .. }
            | Inst::Phi { dst, .. } => Some(*dst),
            Inst::InlineAsm { dst, .. } => *dst,
            Inst::Store { .. } | Inst::Barrier | Inst::Br { .. } | Inst::CondBr { .. } | Inst::Ret => {
                None
            }
        }
    }

    pub fn is_terminator(&self) -> bool {
        matches!(self, Inst::Br { .. } | Inst::CondBr { .. } | Inst::Ret)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    pub inst: Inst,
    pub loc: Option<Location>,
}

// ─── Functions, Modules ────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub id: BlockId,
    pub preds: Vec<BlockId>,
    pub insts: Vec<Instruction>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attr {
    pub value: i64,
    pub bits: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    pub name: String,
    pub params: Vec<Value>,
    pub attrs: BTreeMap<String, Attr>,
    pub blocks: Vec<Block>,
    pub value_types: Vec<Type>,
}

impl Function {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
            attrs: BTreeMap::new(),
            blocks: Vec::new(),
            value_types: Vec::new(),
        }
    }

    pub fn value_type(&self, v: Value) -> Option<&Type> {
        self.value_types.get(v.0 as usize)
    }

    pub fn block(&self, id: BlockId) -> Option<&Block> {
        self.blocks.get(id.0 as usize)
    }

    /// All instructions in block order.
    pub fn insts(&self) -> impl Iterator<Item = &Inst> {
        self.blocks
            .iter()
            .flat_map(|b| b.insts.iter().map(|i| &i.inst))
    }

    /// Number of instructions matching `pred`.
    pub fn count(&self, pred: impl Fn(&Inst) -> bool) -> usize {
        self.insts().filter(|i| pred(i)).count()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Linkage {
    Internal,
    External,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Global {
    pub name: String,
    pub ty: Type,
    pub space: u32,
    pub linkage: Linkage,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Module {
    pub globals: Vec<Global>,
    pub functions: Vec<Function>,
}

impl Module {
    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.name == name)
    }

    pub fn global(&self, name: &str) -> Option<&Global> {
        self.globals.iter().find(|g| g.name == name)
    }
}

// ─── Printing ──────────────────────────────────────────────────────

fn ty_of(func: &Function, v: Value) -> String {
    func.value_type(v)
        .map(|t| t.to_string())
        .unwrap_or_else(|| "?".to_string())
}

fn write_inst(f: &mut fmt::Formatter<'_>, func: &Function, inst: &Inst) -> fmt::Result {
    if let Some(dst) = inst.dst() {
        write!(f, "{} = ", dst)?;
    }
    let dst_ty = || inst.dst().map(|d| ty_of(func, d)).unwrap_or_default();
    match inst {
        Inst::Const { value, .. } => write!(f, "const {} : {}", value, dst_ty()),
        Inst::Undef { .. } => write!(f, "undef : {}", dst_ty()),
        Inst::Binary { op, lhs, rhs, .. } => {
            write!(f, "{} {}, {} : {}", op.mnemonic(), lhs, rhs, dst_ty())
        }
        Inst::Cast { op, src, .. } => write!(
            f,
            "{} {} : {} to {}",
            op.mnemonic(),
            src,
            ty_of(func, *src),
            dst_ty()
        ),
        Inst::InsertValue {
            aggregate,
            value,
            index,
            ..
        } => write!(f, "insertvalue {}, {}[{}] : {}", value, aggregate, index, dst_ty()),
        Inst::ExtractValue {
            aggregate, index, ..
        } => write!(f, "extractvalue {}[{}] : {}", aggregate, index, dst_ty()),
        Inst::InsertElement {
            vector,
            value,
            index,
            ..
        } => write!(f, "insertelement {}, {}[{}] : {}", value, vector, index, dst_ty()),
        Inst::ExtractElement { vector, index, .. } => {
            write!(f, "extractelement {}[{}] : {}", vector, index, dst_ty())
        }
        Inst::Gep { base, index, .. } => write!(f, "getelementptr {}[{}] : {}", base, index, dst_ty()),
        Inst::Load { ptr, .. } => write!(f, "load {} : {}", ptr, dst_ty()),
        Inst::Store { value, ptr } => write!(f, "store {}, {} : {}", value, ptr, ty_of(func, *value)),
        Inst::AddressOf { global, .. } => write!(f, "addressof @{} : {}", global, dst_ty()),
        Inst::Barrier => write!(f, "barrier"),
        Inst::ThreadIdx { dim, .. } => write!(f, "thread_id.{} : {}", dim, dst_ty()),
        Inst::BlockIdx { dim, .. } => write!(f, "block_id.{} : {}", dim, dst_ty()),
        Inst::InlineAsm {
            asm,
            constraints,
            operands,
            side_effects,
            dst,
        } => {
            write!(f, "inline_asm ")?;
            if *side_effects {
                write!(f, "has_side_effects ")?;
            }
            write!(f, "{:?}, {:?}", asm, constraints)?;
            for op in operands {
                write!(f, ", {}", op)?;
            }
            match dst {
                Some(d) => write!(f, " : {}", ty_of(func, *d)),
                None => write!(f, " : void"),
            }
        }
        Inst::Phi { incoming, .. } => {
            write!(f, "phi ")?;
            for (i, (v, bb)) in incoming.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "[{}, {}]", v, bb)?;
            }
            write!(f, " : {}", dst_ty())
        }
        Inst::Br { target } => write!(f, "br {}", target),
        Inst::CondBr {
            cond,
            then_bb,
            else_bb,
        } => write!(f, "cond_br {}, {}, {}", cond, then_bb, else_bb),
        Inst::Ret => write!(f, "ret"),
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "func @{}(", self.name)?;
        for (i, p) in self.params.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}: {}", p, ty_of(self, *p))?;
        }
        write!(f, ")")?;
        if !self.attrs.is_empty() {
            write!(f, " attributes {{")?;
            for (i, (name, attr)) in self.attrs.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{} = {} : i{}", name, attr.value, attr.bits)?;
            }
            write!(f, "}}")?;
        }
        writeln!(f, " {{")?;
        for block in &self.blocks {
            write!(f, "{}:", block.id)?;
            if !block.preds.is_empty() {
                write!(f, "  // preds:")?;
                for p in &block.preds {
                    write!(f, " {}", p)?;
                }
            }
            writeln!(f)?;
            for inst in &block.insts {
                write!(f, "  ")?;
                write_inst(f, self, &inst.inst)?;
                if let Some(loc) = inst.loc {
                    write!(f, "  loc({})", loc)?;
                }
                writeln!(f)?;
            }
        }
        writeln!(f, "}}")
    }
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for g in &self.globals {
            let linkage = match g.linkage {
                Linkage::Internal => "internal",
                Linkage::External => "external",
            };
            writeln!(f, "global {} @{} : {}, addrspace {}", linkage, g.name, g.ty, g.space)?;
        }
        for (i, func) in self.functions.iter().enumerate() {
            if i > 0 || !self.globals.is_empty() {
                writeln!(f)?;
            }
            write!(f, "{}", func)?;
        }
        Ok(())
    }
}
