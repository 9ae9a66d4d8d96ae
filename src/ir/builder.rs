//! Instruction emission into a [`Function`].
//!
//! The builder owns the function under construction and an insertion
//! point (current block). Typed helpers derive result types from operand
//! types and fail with an invariant error when an operand has the wrong
//! shape, so lowering rules can `?` through them.

use crate::error::{LowerError, LowerResult};
use crate::location::Location;

use super::{
    Attr, BinOp, Block, BlockId, CastOp, Constant, Dim, Function, Inst, Instruction, Type, Value,
};

/// Snapshot of everything [`FunctionBuilder::rollback`] restores.
///
/// Rollback only undoes appends; phis inserted into earlier blocks and
/// incoming edges added to existing phis are not tracked.
#[derive(Debug, Clone)]
pub struct Checkpoint {
    values: usize,
    blocks: Vec<(usize, usize)>,
    current: BlockId,
}

pub struct FunctionBuilder {
    func: Function,
    current: BlockId,
    loc: Option<Location>,
}

impl FunctionBuilder {
    /// A function with an empty entry block as insertion point.
    pub fn new(name: impl Into<String>) -> Self {
        let mut builder = Self {
            func: Function::new(name),
            current: BlockId(0),
            loc: None,
        };
        builder.current = builder.append_block();
        builder
    }

    pub fn function(&self) -> &Function {
        &self.func
    }

    pub fn finish(self) -> Function {
        self.func
    }

    // ── Values and blocks ──

    pub fn new_value(&mut self, ty: Type) -> Value {
        let v = Value(self.func.value_types.len() as u32);
        self.func.value_types.push(ty);
        v
    }

    pub fn value_type(&self, v: Value) -> LowerResult<&Type> {
        self.func
            .value_type(v)
            .ok_or_else(|| LowerError::invariant(format!("{} is not defined", v)))
    }

    pub fn param(&mut self, ty: Type) -> Value {
        let v = self.new_value(ty);
        self.func.params.push(v);
        v
    }

    pub fn set_attr(&mut self, name: &str, value: i64, bits: u32) {
        self.func
            .attrs
            .insert(name.to_string(), Attr { value, bits });
    }

    pub fn append_block(&mut self) -> BlockId {
        let id = BlockId(self.func.blocks.len() as u32);
        self.func.blocks.push(Block {
            id,
            preds: Vec::new(),
            insts: Vec::new(),
        });
        id
    }

    pub fn switch_to(&mut self, block: BlockId) {
        self.current = block;
    }

    pub fn current_block(&self) -> BlockId {
        self.current
    }

    pub fn preds(&self, block: BlockId) -> &[BlockId] {
        self.func
            .block(block)
            .map(|b| b.preds.as_slice())
            .unwrap_or(&[])
    }

    /// Location attached to subsequently emitted instructions.
    pub fn set_loc(&mut self, loc: Option<Location>) {
        self.loc = loc.filter(Location::is_known);
    }

    pub fn is_terminated(&self, block: BlockId) -> bool {
        self.func
            .block(block)
            .and_then(|b| b.insts.last())
            .is_some_and(|i| i.inst.is_terminator())
    }

    fn push(&mut self, inst: Inst) {
        let loc = self.loc;
        if let Some(block) = self.func.blocks.get_mut(self.current.0 as usize) {
            block.insts.push(Instruction { inst, loc });
        }
    }

    fn emit(&mut self, ty: Type, make: impl FnOnce(Value) -> Inst) -> Value {
        let dst = self.new_value(ty);
        self.push(make(dst));
        dst
    }

    // ── Rollback ──

    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            values: self.func.value_types.len(),
            blocks: self
                .func
                .blocks
                .iter()
                .map(|b| (b.insts.len(), b.preds.len()))
                .collect(),
            current: self.current,
        }
    }

    /// Drop every value, block, instruction and edge added after `cp`.
    pub fn rollback(&mut self, cp: &Checkpoint) {
        self.func.value_types.truncate(cp.values);
        self.func.blocks.truncate(cp.blocks.len());
        for (block, &(insts, preds)) in self.func.blocks.iter_mut().zip(&cp.blocks) {
            block.insts.truncate(insts);
            block.preds.truncate(preds);
        }
        self.current = cp.current;
    }

    // ── Scalars ──

    pub fn const_int(&mut self, bits: u32, value: i64) -> Value {
        self.emit(Type::Int(bits), |dst| Inst::Const {
            dst,
            value: Constant::Int(value),
        })
    }

    /// `i32` index constant.
    pub fn index(&mut self, value: u32) -> Value {
        self.const_int(32, i64::from(value))
    }

    pub fn const_float(&mut self, ty: Type, value: f64) -> Value {
        self.emit(ty, |dst| Inst::Const {
            dst,
            value: Constant::Float(value),
        })
    }

    pub fn undef(&mut self, ty: Type) -> Value {
        self.emit(ty, |dst| Inst::Undef { dst })
    }

    pub fn binary(&mut self, op: BinOp, lhs: Value, rhs: Value) -> LowerResult<Value> {
        let lt = self.value_type(lhs)?.clone();
        let rt = self.value_type(rhs)?;
        if &lt != rt {
            return Err(LowerError::invariant(format!(
                "{} operands of different types {} and {}",
                op.mnemonic(),
                lt,
                rt
            )));
        }
        Ok(self.emit(lt, |dst| Inst::Binary { dst, op, lhs, rhs }))
    }

    pub fn add(&mut self, lhs: Value, rhs: Value) -> LowerResult<Value> {
        self.binary(BinOp::Add, lhs, rhs)
    }

    pub fn mul(&mut self, lhs: Value, rhs: Value) -> LowerResult<Value> {
        self.binary(BinOp::Mul, lhs, rhs)
    }

    pub fn udiv(&mut self, lhs: Value, rhs: Value) -> LowerResult<Value> {
        self.binary(BinOp::UDiv, lhs, rhs)
    }

    pub fn urem(&mut self, lhs: Value, rhs: Value) -> LowerResult<Value> {
        self.binary(BinOp::URem, lhs, rhs)
    }

    pub fn cast(&mut self, op: CastOp, src: Value, ty: Type) -> Value {
        self.emit(ty, |dst| Inst::Cast { dst, op, src })
    }

    // ── Aggregates ──

    pub fn insert_value(&mut self, aggregate: Value, value: Value, index: u32) -> LowerResult<Value> {
        let ty = self.value_type(aggregate)?.clone();
        match &ty {
            Type::Struct(fields) if (index as usize) < fields.len() => {}
            other => {
                return Err(LowerError::invariant(format!(
                    "insertvalue at {} into {}",
                    index, other
                )))
            }
        }
        Ok(self.emit(ty, |dst| Inst::InsertValue {
            dst,
            aggregate,
            value,
            index,
        }))
    }

    pub fn extract_value(&mut self, aggregate: Value, index: u32) -> LowerResult<Value> {
        let field = match self.value_type(aggregate)? {
            Type::Struct(fields) => fields.get(index as usize).cloned(),
            _ => None,
        };
        let ty = field.ok_or_else(|| {
            LowerError::invariant(format!("extractvalue {} from {}", index, aggregate))
        })?;
        Ok(self.emit(ty, |dst| Inst::ExtractValue {
            dst,
            aggregate,
            index,
        }))
    }

    pub fn insert_element(&mut self, vector: Value, value: Value, index: Value) -> LowerResult<Value> {
        let ty = self.value_type(vector)?.clone();
        if !matches!(ty, Type::Vector { .. }) {
            return Err(LowerError::invariant(format!("insertelement into {}", ty)));
        }
        Ok(self.emit(ty, |dst| Inst::InsertElement {
            dst,
            vector,
            value,
            index,
        }))
    }

    pub fn extract_element(&mut self, vector: Value, index: Value) -> LowerResult<Value> {
        let ty = match self.value_type(vector)? {
            Type::Vector { elem, .. } => (**elem).clone(),
            other => return Err(LowerError::invariant(format!("extractelement from {}", other))),
        };
        Ok(self.emit(ty, |dst| Inst::ExtractElement { dst, vector, index }))
    }

    // ── Memory ──

    /// Element-indexed address arithmetic; the result keeps the base type.
    pub fn gep(&mut self, base: Value, index: Value) -> LowerResult<Value> {
        let ty = self.value_type(base)?.clone();
        if !matches!(ty, Type::Ptr { .. }) {
            return Err(LowerError::invariant(format!("getelementptr on {}", ty)));
        }
        Ok(self.emit(ty, |dst| Inst::Gep { dst, base, index }))
    }

    pub fn load(&mut self, ptr: Value) -> LowerResult<Value> {
        let ty = match self.value_type(ptr)? {
            Type::Ptr { pointee, .. } => (**pointee).clone(),
            other => return Err(LowerError::invariant(format!("load through {}", other))),
        };
        Ok(self.emit(ty, |dst| Inst::Load { dst, ptr }))
    }

    pub fn store(&mut self, value: Value, ptr: Value) {
        self.push(Inst::Store { value, ptr });
    }

    pub fn address_of(&mut self, global: &str, ty: Type) -> Value {
        let global = global.to_string();
        self.emit(ty, |dst| Inst::AddressOf { dst, global })
    }

    // ── GPU ──

    pub fn barrier(&mut self) {
        self.push(Inst::Barrier);
    }

    pub fn thread_idx(&mut self, dim: Dim) -> Value {
        self.emit(Type::Int(32), |dst| Inst::ThreadIdx { dst, dim })
    }

    pub fn block_idx(&mut self, dim: Dim) -> Value {
        self.emit(Type::Int(32), |dst| Inst::BlockIdx { dst, dim })
    }

    pub fn inline_asm(
        &mut self,
        ret: Option<Type>,
        asm: String,
        constraints: String,
        operands: Vec<Value>,
        side_effects: bool,
    ) -> Option<Value> {
        let dst = ret.map(|ty| self.new_value(ty));
        self.push(Inst::InlineAsm {
            dst,
            asm,
            constraints,
            operands,
            side_effects,
        });
        dst
    }

    // ── Control flow ──

    /// Insert an empty phi at the top of `block`, after any existing phis.
    pub fn insert_phi(&mut self, block: BlockId, ty: Type) -> Value {
        let dst = self.new_value(ty);
        let loc = self.loc;
        if let Some(b) = self.func.blocks.get_mut(block.0 as usize) {
            let at = b
                .insts
                .iter()
                .take_while(|i| matches!(i.inst, Inst::Phi { .. }))
                .count();
            b.insts.insert(
                at,
                Instruction {
                    inst: Inst::Phi {
                        dst,
                        incoming: Vec::new(),
                    },
                    loc,
                },
            );
        }
        dst
    }

    pub fn add_incoming(&mut self, phi: Value, value: Value, pred: BlockId) -> LowerResult<()> {
        let slot = self
            .func
            .blocks
            .iter_mut()
            .flat_map(|b| b.insts.iter_mut())
            .find_map(|i| match &mut i.inst {
                Inst::Phi { dst, incoming } if *dst == phi => Some(incoming),
                _ => None,
            });
        match slot {
            Some(incoming) => {
                incoming.push((value, pred));
                Ok(())
            }
            None => Err(LowerError::invariant(format!("{} is not a phi", phi))),
        }
    }

    fn add_pred(&mut self, block: BlockId, pred: BlockId) {
        if let Some(b) = self.func.blocks.get_mut(block.0 as usize) {
            b.preds.push(pred);
        }
    }

    pub fn br(&mut self, target: BlockId) {
        let from = self.current;
        self.push(Inst::Br { target });
        self.add_pred(target, from);
    }

    pub fn cond_br(&mut self, cond: Value, then_bb: BlockId, else_bb: BlockId) {
        let from = self.current;
        self.push(Inst::CondBr {
            cond,
            then_bb,
            else_bb,
        });
        self.add_pred(then_bb, from);
        self.add_pred(else_bb, from);
    }

    pub fn ret(&mut self) {
        self.push(Inst::Ret);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_typed_helpers() {
        let mut b = FunctionBuilder::new("f");
        let s = b.undef(Type::Struct(vec![Type::F32, Type::Int(32)]));
        let x = b.const_float(Type::F32, 1.0);
        let s = b.insert_value(s, x, 0).unwrap();
        let y = b.extract_value(s, 1).unwrap();
        assert_eq!(b.value_type(y).unwrap(), &Type::Int(32));
        assert!(b.extract_value(s, 2).is_err());
        let i = b.index(3);
        assert!(b.add(i, x).is_err());
    }

    #[test]
    fn test_branches_record_preds() {
        let mut b = FunctionBuilder::new("f");
        let entry = b.current_block();
        let then_bb = b.append_block();
        let else_bb = b.append_block();
        let c = b.const_int(1, 1);
        b.cond_br(c, then_bb, else_bb);
        assert!(b.is_terminated(entry));
        assert_eq!(b.preds(then_bb), &[entry]);
        assert_eq!(b.preds(else_bb), &[entry]);
    }

    #[test]
    fn test_phi_goes_after_existing_phis() {
        let mut b = FunctionBuilder::new("f");
        let entry = b.current_block();
        let join = b.append_block();
        b.br(join);
        b.switch_to(join);
        let one = b.index(1);
        let p0 = b.insert_phi(join, Type::Int(32));
        let p1 = b.insert_phi(join, Type::Int(32));
        b.add_incoming(p1, one, entry).unwrap();
        let insts = &b.function().blocks[1].insts;
        assert!(matches!(insts[0].inst, Inst::Phi { dst, .. } if dst == p0));
        assert!(matches!(&insts[1].inst, Inst::Phi { dst, incoming } if *dst == p1 && incoming.len() == 1));
        assert!(matches!(insts[2].inst, Inst::Const { .. }));
        assert!(b.add_incoming(one, one, entry).is_err());
    }

    #[test]
    fn test_rollback_drops_appended_work() {
        let mut b = FunctionBuilder::new("f");
        b.index(0);
        let cp = b.checkpoint();
        let extra = b.append_block();
        b.index(1);
        b.br(extra);
        b.switch_to(extra);
        b.barrier();
        b.rollback(&cp);
        let f = b.finish();
        assert_eq!(f.blocks.len(), 1);
        assert_eq!(f.blocks[0].insts.len(), 1);
        assert_eq!(f.value_types.len(), 1);
    }

    #[test]
    fn test_locations_only_when_known() {
        let mut b = FunctionBuilder::new("f");
        b.set_loc(Some(Location::unknown()));
        b.barrier();
        b.set_loc(Some(Location::new(4, 2)));
        b.barrier();
        let f = b.finish();
        assert_eq!(f.blocks[0].insts[0].loc, None);
        assert_eq!(f.blocks[0].insts[1].loc, Some(Location::new(4, 2)));
    }
}
