//! Structured control flow on top of [`SsaBuilder`].
//!
//! Each helper creates its blocks, wires the branches and seals every
//! block as soon as its predecessor set is final:
//!
//! ```text
//!   if:    entry ─┬─ then ─┬─ endif       then/else sealed on creation,
//!                 └─ else ─┘              endif after both arms
//!
//!   loop:  entry ── header ◀─┐            header and exit sealed after
//!                    │ body ─┘            the back edge exists
//!                    ▼
//!                   exit
//! ```
//!
//! Arms may open blocks of their own; the branch to the join is emitted
//! from wherever an arm leaves the insertion point, unless it already
//! ends in a terminator.

use crate::ir::builder::FunctionBuilder;
use crate::ir::{BlockId, Value};

use super::{SsaBuilder, SsaResult};

fn emit_arm<F>(b: &mut FunctionBuilder, ssa: &mut SsaBuilder, block: BlockId, join: BlockId, arm: F) -> SsaResult<()>
where
    F: FnOnce(&mut FunctionBuilder, &mut SsaBuilder) -> SsaResult<()>,
{
    ssa.seal(b, block)?;
    b.switch_to(block);
    arm(b, ssa)?;
    let end = b.current_block();
    if !b.is_terminated(end) {
        b.br(join);
    }
    Ok(())
}

fn enter_join(b: &mut FunctionBuilder, ssa: &mut SsaBuilder, join: BlockId) -> SsaResult<BlockId> {
    b.switch_to(join);
    ssa.seal(b, join)?;
    Ok(join)
}

/// `if cond { then }`; returns the join block, which becomes current.
pub fn build_if<F>(b: &mut FunctionBuilder, ssa: &mut SsaBuilder, cond: Value, then_arm: F) -> SsaResult<BlockId>
where
    F: FnOnce(&mut FunctionBuilder, &mut SsaBuilder) -> SsaResult<()>,
{
    let then_bb = b.append_block();
    let endif = b.append_block();
    b.cond_br(cond, then_bb, endif);
    emit_arm(b, ssa, then_bb, endif, then_arm)?;
    enter_join(b, ssa, endif)
}

/// `if cond { then } else { otherwise }`; returns the join block.
pub fn build_if_else<F, G>(
    b: &mut FunctionBuilder,
    ssa: &mut SsaBuilder,
    cond: Value,
    then_arm: F,
    else_arm: G,
) -> SsaResult<BlockId>
where
    F: FnOnce(&mut FunctionBuilder, &mut SsaBuilder) -> SsaResult<()>,
    G: FnOnce(&mut FunctionBuilder, &mut SsaBuilder) -> SsaResult<()>,
{
    let then_bb = b.append_block();
    let else_bb = b.append_block();
    let endif = b.append_block();
    b.cond_br(cond, then_bb, else_bb);
    emit_arm(b, ssa, then_bb, endif, then_arm)?;
    emit_arm(b, ssa, else_bb, endif, else_arm)?;
    enter_join(b, ssa, endif)
}

/// Bottom-tested loop: runs `body`, then repeats while the `i1` it
/// returns is true. Returns the exit block, which becomes current.
pub fn build_loop<F>(b: &mut FunctionBuilder, ssa: &mut SsaBuilder, body: F) -> SsaResult<BlockId>
where
    F: FnOnce(&mut FunctionBuilder, &mut SsaBuilder) -> SsaResult<Value>,
{
    let header = b.append_block();
    let exit = b.append_block();
    b.br(header);
    b.switch_to(header);
    let again = body(b, ssa)?;
    b.cond_br(again, header, exit);
    b.switch_to(exit);
    ssa.seal(b, header)?;
    ssa.seal(b, exit)?;
    Ok(exit)
}
