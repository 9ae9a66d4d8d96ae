//! On-the-fly SSA construction for named variables.
//!
//! Code generators bind a name per basic block with [`SsaBuilder::write`]
//! and resolve it with [`SsaBuilder::read`]. Phis are inserted lazily
//! (Braun, Buchwald, Hack et al., *Simple and Efficient Construction of
//! Static Single Assignment Form*):
//!
//! ```text
//!   read(name, block)
//!     bound in block                  that value
//!     block unsealed                  incomplete phi, completed by seal()
//!     sealed, no predecessors         function-scope binding
//!     sealed, one predecessor         read(name, pred)
//!     sealed, several predecessors    phi, bound first, then one operand per pred
//! ```
//!
//! A block is sealed once no further predecessors will be added.

pub mod control;

use std::collections::{HashMap, HashSet};

use thiserror::Error;
use tracing::trace;

use crate::error::LowerError;
use crate::ir::builder::FunctionBuilder;
use crate::ir::{BlockId, Type, Value};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SsaError {
    #[error("`{name}` is used in {block} before any definition reaches it")]
    Undefined { name: String, block: BlockId },
    #[error(transparent)]
    Build(#[from] LowerError),
}

pub type SsaResult<T> = Result<T, SsaError>;

/// Per-function variable state.
#[derive(Debug, Default)]
pub struct SsaBuilder {
    /// Current value of each name at the end of each block.
    defs: HashMap<(String, BlockId), Value>,
    /// Function-scope bindings such as parameters.
    params: HashMap<String, Value>,
    /// Type of each name's most recent definition.
    types: HashMap<String, Type>,
    sealed: HashSet<BlockId>,
    /// Phis created while their block was unsealed.
    incomplete: HashMap<BlockId, Vec<(String, Value)>>,
}

impl SsaBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `name` for the whole function.
    pub fn define_param(&mut self, b: &FunctionBuilder, name: &str, value: Value) -> SsaResult<()> {
        let ty = b.value_type(value)?.clone();
        self.types.insert(name.to_string(), ty);
        self.params.insert(name.to_string(), value);
        Ok(())
    }

    /// Bind `name` to `value` at the end of `block`.
    pub fn write(&mut self, b: &FunctionBuilder, name: &str, block: BlockId, value: Value) -> SsaResult<()> {
        let ty = b.value_type(value)?.clone();
        self.types.insert(name.to_string(), ty);
        self.defs.insert((name.to_string(), block), value);
        Ok(())
    }

    /// [`SsaBuilder::write`] into the builder's current block.
    pub fn write_current(&mut self, b: &FunctionBuilder, name: &str, value: Value) -> SsaResult<()> {
        self.write(b, name, b.current_block(), value)
    }

    /// The value of `name` reaching the end of `block`.
    pub fn read(&mut self, b: &mut FunctionBuilder, name: &str, block: BlockId) -> SsaResult<Value> {
        match self.defs.get(&(name.to_string(), block)) {
            Some(v) => Ok(*v),
            None => self.read_recursive(b, name, block),
        }
    }

    /// [`SsaBuilder::read`] in the builder's current block.
    pub fn read_current(&mut self, b: &mut FunctionBuilder, name: &str) -> SsaResult<Value> {
        let block = b.current_block();
        self.read(b, name, block)
    }

    fn type_of(&self, name: &str, block: BlockId) -> SsaResult<Type> {
        self.types.get(name).cloned().ok_or_else(|| SsaError::Undefined {
            name: name.to_string(),
            block,
        })
    }

    fn read_recursive(&mut self, b: &mut FunctionBuilder, name: &str, block: BlockId) -> SsaResult<Value> {
        let value = if !self.sealed.contains(&block) {
            let phi = b.insert_phi(block, self.type_of(name, block)?);
            trace!(name, %block, %phi, "incomplete phi");
            self.incomplete
                .entry(block)
                .or_default()
                .push((name.to_string(), phi));
            phi
        } else {
            let preds = b.preds(block).to_vec();
            match preds.as_slice() {
                [] => self.params.get(name).copied().ok_or_else(|| SsaError::Undefined {
                    name: name.to_string(),
                    block,
                })?,
                [pred] => self.read(b, name, *pred)?,
                _ => {
                    let phi = b.insert_phi(block, self.type_of(name, block)?);
                    // bound before the operands so cycles resolve to the phi
                    self.defs.insert((name.to_string(), block), phi);
                    self.add_operands(b, name, block, phi)?;
                    phi
                }
            }
        };
        self.defs.insert((name.to_string(), block), value);
        Ok(value)
    }

    fn add_operands(&mut self, b: &mut FunctionBuilder, name: &str, block: BlockId, phi: Value) -> SsaResult<()> {
        let preds = b.preds(block).to_vec();
        for pred in preds {
            let value = self.read(b, name, pred)?;
            b.add_incoming(phi, value, pred)?;
        }
        Ok(())
    }

    /// Declare the predecessors of `block` final and complete its pending phis.
    pub fn seal(&mut self, b: &mut FunctionBuilder, block: BlockId) -> SsaResult<()> {
        let pending = self.incomplete.remove(&block).unwrap_or_default();
        for (name, phi) in pending {
            self.add_operands(b, &name, block, phi)?;
        }
        self.sealed.insert(block);
        Ok(())
    }

    pub fn is_sealed(&self, block: BlockId) -> bool {
        self.sealed.contains(&block)
    }
}
