use crate::config::SHARED_MEMORY_GLOBAL;
use crate::ir::{BinOp, BlockId, CastOp, Constant, Dim, Function, Inst, Type, Value};

use super::{ptx, LaunchConfig, Memory, SimError, SimStats, Val};

pub(crate) fn mask(bits: u32) -> u64 {
    if bits >= 64 {
        u64::MAX
    } else {
        (1u64 << bits) - 1
    }
}

fn sign_extend(v: u64, bits: u32) -> i64 {
    if bits >= 64 {
        v as i64
    } else {
        let shift = 64 - bits;
        ((v << shift) as i64) >> shift
    }
}

fn round(ty: &Type, v: f64) -> f64 {
    match ty {
        Type::F32 => f64::from(v as f32),
        _ => v,
    }
}

// ─── Byte encoding ─────────────────────────────────────────────────

/// Little-endian memory image of `v` as type `ty`.
pub(crate) fn encode(ty: &Type, v: &Val, out: &mut Vec<u8>) -> Result<(), SimError> {
    match (ty, v) {
        (Type::Int(_), Val::Int(x)) => {
            out.extend_from_slice(&x.to_le_bytes()[..ty.byte_size() as usize]);
        }
        (Type::F32, Val::Float(f)) => out.extend_from_slice(&(*f as f32).to_le_bytes()),
        (Type::F64, Val::Float(f)) => out.extend_from_slice(&f.to_le_bytes()),
        (Type::Ptr { .. }, Val::Ptr(a)) => out.extend_from_slice(&a.to_le_bytes()),
        (Type::Vector { len, elem } | Type::Array { len, elem }, Val::Agg(items))
            if items.len() == *len as usize =>
        {
            for item in items {
                encode(elem, item, out)?;
            }
        }
        (Type::Struct(fields), Val::Agg(items)) if items.len() == fields.len() => {
            for (field, item) in fields.iter().zip(items) {
                encode(field, item, out)?;
            }
        }
        (_, Val::Undef) => {
            return Err(SimError::Unsupported(format!(
                "an undefined {} reaches memory",
                ty
            )))
        }
        (ty, v) => return Err(SimError::TypeMismatch(format!("{:?} as {}", v, ty))),
    }
    Ok(())
}

fn le_word(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    let n = bytes.len().min(8);
    buf[..n].copy_from_slice(&bytes[..n]);
    u64::from_le_bytes(buf)
}

/// Inverse of [`encode`]; `bytes` holds at least `ty.byte_size()` bytes.
pub(crate) fn decode(ty: &Type, bytes: &[u8]) -> Result<Val, SimError> {
    let size = ty.byte_size() as usize;
    if bytes.len() < size {
        return Err(SimError::TypeMismatch(format!(
            "{} bytes decoded as {}",
            bytes.len(),
            ty
        )));
    }
    let bytes = &bytes[..size];
    match ty {
        Type::Int(bits) => Ok(Val::Int(le_word(bytes) & mask(*bits))),
        Type::F32 => Ok(Val::Float(f64::from(f32::from_bits(le_word(bytes) as u32)))),
        Type::F64 => Ok(Val::Float(f64::from_bits(le_word(bytes)))),
        Type::Ptr { .. } => Ok(Val::Ptr(le_word(bytes))),
        Type::Vector { len, elem } | Type::Array { len, elem } => {
            let step = elem.byte_size() as usize;
            (0..*len as usize)
                .map(|i| decode(elem, &bytes[i * step..]))
                .collect::<Result<Vec<_>, _>>()
                .map(Val::Agg)
        }
        Type::Struct(fields) => {
            let mut offset = 0;
            let mut items = Vec::with_capacity(fields.len());
            for field in fields {
                items.push(decode(field, &bytes[offset..])?);
                offset += field.byte_size() as usize;
            }
            Ok(Val::Agg(items))
        }
        Type::F16 | Type::Void => Err(SimError::Unsupported(format!("memory access of {}", ty))),
    }
}

// ─── Instruction semantics ─────────────────────────────────────────

fn constant(ty: &Type, value: Constant) -> Result<Val, SimError> {
    match (ty, value) {
        (Type::Int(bits), Constant::Int(v)) => Ok(Val::Int(v as u64 & mask(*bits))),
        (t, Constant::Int(v)) if t.is_float() => Ok(Val::Float(round(t, v as f64))),
        (t, Constant::Float(v)) if t.is_float() => Ok(Val::Float(round(t, v))),
        (t, c) => Err(SimError::TypeMismatch(format!("constant {} of type {}", c, t))),
    }
}

fn binary(op: BinOp, ty: &Type, lhs: &Val, rhs: &Val) -> Result<Val, SimError> {
    match ty {
        Type::Int(bits) => {
            let (a, b) = (lhs.as_int()?, rhs.as_int()?);
            let v = match op {
                BinOp::Add => a.wrapping_add(b),
                BinOp::Sub => a.wrapping_sub(b),
                BinOp::Mul => a.wrapping_mul(b),
                BinOp::UDiv | BinOp::URem if b == 0 => {
                    return Err(SimError::Unsupported("integer division by zero".to_string()))
                }
                BinOp::UDiv => a / b,
                BinOp::URem => a % b,
                BinOp::FAdd | BinOp::FSub | BinOp::FMul => {
                    return Err(SimError::TypeMismatch(format!("{} on {}", op.mnemonic(), ty)))
                }
            };
            Ok(Val::Int(v & mask(*bits)))
        }
        t if t.is_float() => {
            let (a, b) = (lhs.as_float()?, rhs.as_float()?);
            let v = match op {
                BinOp::FAdd => a + b,
                BinOp::FSub => a - b,
                BinOp::FMul => a * b,
                _ => return Err(SimError::TypeMismatch(format!("{} on {}", op.mnemonic(), ty))),
            };
            Ok(Val::Float(round(t, v)))
        }
        other => Err(SimError::TypeMismatch(format!("{} on {}", op.mnemonic(), other))),
    }
}

fn int_bits(ty: &Type) -> Result<u32, SimError> {
    match ty {
        Type::Int(bits) => Ok(*bits),
        other => Err(SimError::TypeMismatch(format!("expected an integer type, found {}", other))),
    }
}

fn cast(op: CastOp, from: &Type, to: &Type, v: Val) -> Result<Val, SimError> {
    match op {
        CastOp::SExt => {
            let x = sign_extend(v.as_int()?, int_bits(from)?);
            Ok(Val::Int(x as u64 & mask(int_bits(to)?)))
        }
        CastOp::Trunc => Ok(Val::Int(v.as_int()? & mask(int_bits(to)?))),
        CastOp::Bitcast => match (from, to) {
            (Type::Ptr { .. }, Type::Ptr { .. }) => Ok(v),
            _ => {
                let mut bytes = Vec::new();
                encode(from, &v, &mut bytes)?;
                if bytes.len() != to.byte_size() as usize {
                    return Err(SimError::TypeMismatch(format!("bitcast {} to {}", from, to)));
                }
                decode(to, &bytes)
            }
        },
    }
}

fn pointee(ty: &Type) -> Result<(&Type, u32), SimError> {
    match ty {
        Type::Ptr { pointee, space } => Ok((pointee, *space)),
        other => Err(SimError::TypeMismatch(format!("expected a pointer type, found {}", other))),
    }
}

// ─── Threads ───────────────────────────────────────────────────────

pub(crate) struct Thread {
    tid: u32,
    /// Value of every SSA value of the function, once defined.
    regs: Vec<Option<Val>>,
    block: BlockId,
    pc: usize,
    pub(crate) done: bool,
}

impl Thread {
    pub(crate) fn new(tid: u32, func: &Function, args: &[Val]) -> Self {
        let mut regs = vec![None; func.value_types.len()];
        for (p, a) in func.params.iter().zip(args) {
            if let Some(slot) = regs.get_mut(p.0 as usize) {
                *slot = Some(a.clone());
            }
        }
        Self {
            tid,
            regs,
            block: func.blocks.first().map_or(BlockId(0), |b| b.id),
            pc: 0,
            done: false,
        }
    }

    fn get(&self, v: Value) -> Result<Val, SimError> {
        self.regs
            .get(v.0 as usize)
            .and_then(|slot| slot.clone())
            .ok_or(SimError::Undefined(v))
    }

    fn set(&mut self, v: Value, val: Val) -> Result<(), SimError> {
        let slot = self.regs.get_mut(v.0 as usize).ok_or(SimError::Undefined(v))?;
        *slot = Some(val);
        Ok(())
    }
}

/// Why a thread stopped running.
pub(crate) enum Stop {
    Barrier,
    Returned,
}

enum Flow {
    Next,
    Jump(BlockId),
    Barrier,
    Return,
}

/// State shared by all threads of the CTA.
pub(crate) struct Machine<'a> {
    pub(crate) func: &'a Function,
    pub(crate) cfg: &'a LaunchConfig,
    pub(crate) memory: Memory<'a>,
    pub(crate) stats: SimStats,
}

impl<'a> Machine<'a> {
    fn ty(&self, v: Value) -> Result<&'a Type, SimError> {
        let func = self.func;
        func.value_type(v).ok_or(SimError::Undefined(v))
    }

    /// Run `t` until it reaches a barrier or returns.
    pub(crate) fn resume(&mut self, t: &mut Thread) -> Result<Stop, SimError> {
        let func = self.func;
        loop {
            let block = func
                .block(t.block)
                .ok_or_else(|| SimError::Unsupported(format!("no block {}", t.block)))?;
            let inst = block
                .insts
                .get(t.pc)
                .map(|i| &i.inst)
                .ok_or_else(|| SimError::Unsupported(format!("{} has no terminator", t.block)))?;
            self.stats.steps += 1;
            if self.stats.steps > self.cfg.max_steps {
                return Err(SimError::StepLimit(self.cfg.max_steps));
            }
            t.pc += 1;
            match self.step(t, inst)? {
                Flow::Next => {}
                Flow::Jump(target) => self.enter(t, target)?,
                Flow::Barrier => return Ok(Stop::Barrier),
                Flow::Return => {
                    t.done = true;
                    return Ok(Stop::Returned);
                }
            }
        }
    }

    /// Branch to `target`, evaluating its phis together for the edge taken.
    fn enter(&mut self, t: &mut Thread, target: BlockId) -> Result<(), SimError> {
        let func = self.func;
        let block = func
            .block(target)
            .ok_or_else(|| SimError::Unsupported(format!("no block {}", target)))?;
        let mut updates = Vec::new();
        for inst in &block.insts {
            let Inst::Phi { dst, incoming } = &inst.inst else { break };
            let (value, _) = incoming
                .iter()
                .find(|(_, pred)| *pred == t.block)
                .ok_or_else(|| {
                    SimError::Unsupported(format!("{} has no incoming value from {}", dst, t.block))
                })?;
            updates.push((*dst, t.get(*value)?));
        }
        t.pc = updates.len();
        t.block = target;
        for (dst, val) in updates {
            t.set(dst, val)?;
        }
        Ok(())
    }

    fn step(&mut self, t: &mut Thread, inst: &Inst) -> Result<Flow, SimError> {
        match inst {
            Inst::Const { dst, value } => {
                let v = constant(self.ty(*dst)?, *value)?;
                t.set(*dst, v)?;
            }
            Inst::Undef { dst } => {
                let v = Val::undef(self.ty(*dst)?);
                t.set(*dst, v)?;
            }
            Inst::Binary { dst, op, lhs, rhs } => {
                let v = binary(*op, self.ty(*dst)?, &t.get(*lhs)?, &t.get(*rhs)?)?;
                t.set(*dst, v)?;
            }
            Inst::Cast { dst, op, src } => {
                let v = cast(*op, self.ty(*src)?, self.ty(*dst)?, t.get(*src)?)?;
                t.set(*dst, v)?;
            }
            Inst::InsertValue {
                dst,
                aggregate,
                value,
                index,
            } => {
                let mut agg = t.get(*aggregate)?;
                agg.set_field(*index as usize, t.get(*value)?)?;
                t.set(*dst, agg)?;
            }
            Inst::ExtractValue {
                dst,
                aggregate,
                index,
            } => {
                let v = t.get(*aggregate)?.field(*index as usize)?.clone();
                t.set(*dst, v)?;
            }
            Inst::InsertElement {
                dst,
                vector,
                value,
                index,
            } => {
                let mut vec = t.get(*vector)?;
                vec.set_field(t.get(*index)?.as_int()? as usize, t.get(*value)?)?;
                t.set(*dst, vec)?;
            }
            Inst::ExtractElement { dst, vector, index } => {
                let i = t.get(*index)?.as_int()? as usize;
                let v = t.get(*vector)?.field(i)?.clone();
                t.set(*dst, v)?;
            }
            Inst::Gep { dst, base, index } => {
                let (elem, _) = pointee(self.ty(*base)?)?;
                let i = sign_extend(t.get(*index)?.as_int()?, int_bits(self.ty(*index)?)?);
                let offset = i.wrapping_mul(i64::from(elem.byte_size()));
                let addr = t.get(*base)?.as_ptr()?.wrapping_add(offset as u64);
                t.set(*dst, Val::Ptr(addr))?;
            }
            Inst::Load { dst, ptr } => {
                let (elem, space) = pointee(self.ty(*ptr)?)?;
                let addr = t.get(*ptr)?.as_ptr()?;
                let bytes = self.memory.read(space, addr, elem.byte_size() as usize)?;
                let v = decode(elem, bytes)?;
                t.set(*dst, v)?;
            }
            Inst::Store { value, ptr } => {
                let (_, space) = pointee(self.ty(*ptr)?)?;
                let mut bytes = Vec::new();
                encode(self.ty(*value)?, &t.get(*value)?, &mut bytes)?;
                let addr = t.get(*ptr)?.as_ptr()?;
                self.memory.write(space, addr, &bytes)?;
            }
            Inst::AddressOf { dst, global } => {
                if global != SHARED_MEMORY_GLOBAL {
                    return Err(SimError::Unsupported(format!("address of @{}", global)));
                }
                t.set(*dst, Val::Ptr(0))?;
            }
            Inst::Barrier => return Ok(Flow::Barrier),
            Inst::ThreadIdx { dst, dim } => {
                let id = if *dim == Dim::X { t.tid } else { 0 };
                t.set(*dst, Val::Int(u64::from(id)))?;
            }
            Inst::BlockIdx { dst, dim } => {
                let axis = match dim {
                    Dim::X => 0,
                    Dim::Y => 1,
                    Dim::Z => 2,
                };
                t.set(*dst, Val::Int(u64::from(self.cfg.block_idx[axis])))?;
            }
            Inst::InlineAsm {
                dst,
                asm,
                constraints,
                operands,
                ..
            } => {
                let inputs = operands
                    .iter()
                    .map(|v| t.get(*v))
                    .collect::<Result<Vec<_>, _>>()?;
                let ret = dst.map(|d| self.ty(d)).transpose()?;
                let out = ptx::execute(asm, constraints, &inputs, ret, &mut self.memory)?;
                if let (Some(d), Some(v)) = (dst, out) {
                    t.set(*d, v)?;
                }
            }
            Inst::Phi { dst, .. } => {
                return Err(SimError::Unsupported(format!("{} is not at a block head", dst)))
            }
            Inst::Br { target } => return Ok(Flow::Jump(*target)),
            Inst::CondBr {
                cond,
                then_bb,
                else_bb,
            } => {
                let taken = if t.get(*cond)?.as_int()? != 0 { then_bb } else { else_bb };
                return Ok(Flow::Jump(*taken));
            }
            Inst::Ret => return Ok(Flow::Return),
        }
        Ok(Flow::Next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bitcast_packs_lanes_little_endian() {
        let lanes = Val::Agg(vec![Val::Int(0x0003), Val::Int(0xffff)]);
        let word = cast(CastOp::Bitcast, &Type::vector(2, Type::Int(16)), &Type::Int(32), lanes).unwrap();
        assert_eq!(word, Val::Int(0xffff_0003));
        let back = cast(CastOp::Bitcast, &Type::Int(32), &Type::vector(2, Type::Int(16)), word).unwrap();
        assert_eq!(back, Val::Agg(vec![Val::Int(0x0003), Val::Int(0xffff)]));
    }

    #[test]
    fn test_integer_casts() {
        let t = cast(CastOp::Trunc, &Type::Int(32), &Type::Int(1), Val::Int(3)).unwrap();
        assert_eq!(t, Val::Int(1));
        let s = cast(CastOp::SExt, &Type::Int(1), &Type::Int(8), Val::Int(1)).unwrap();
        assert_eq!(s, Val::Int(0xff));
        let s = cast(CastOp::SExt, &Type::Int(32), &Type::Int(64), Val::Int(0xffff_fffe)).unwrap();
        assert_eq!(s, Val::Int(u64::MAX - 1));
    }

    #[test]
    fn test_float_arithmetic_rounds_to_f32() {
        let v = binary(BinOp::FAdd, &Type::F32, &Val::Float(0.1), &Val::Float(0.2)).unwrap();
        assert_eq!(v, Val::Float(f64::from((0.1f64 + 0.2f64) as f32)));
        let wrapped = binary(BinOp::Add, &Type::Int(8), &Val::Int(0xff), &Val::Int(2)).unwrap();
        assert_eq!(wrapped, Val::Int(1));
        assert!(binary(BinOp::URem, &Type::Int(32), &Val::Int(1), &Val::Int(0)).is_err());
    }

    #[test]
    fn test_undefined_values_never_reach_memory() {
        let mut out = Vec::new();
        let v = Val::undef(&Type::vector(2, Type::F32));
        assert!(encode(&Type::vector(2, Type::F32), &v, &mut out).is_err());
    }
}
