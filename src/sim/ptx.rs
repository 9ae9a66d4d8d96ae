//! Interpreter for the inline PTX the memory rules emit.
//!
//! Operands are raw 64-bit registers numbered like the constraint list:
//! outputs start at zero and inputs take the bound values in order.

use crate::config::{GLOBAL_ADDRESS_SPACE, SHARED_ADDRESS_SPACE};
use crate::ir::Type;

use super::exec::mask;
use super::{Memory, SimError, Val};

struct Regs(Vec<u64>);

impl Regs {
    fn get(&self, n: usize) -> Result<u64, SimError> {
        self.0
            .get(n)
            .copied()
            .ok_or_else(|| SimError::Unsupported(format!("operand ${} is not bound", n)))
    }

    fn set(&mut self, n: usize, v: u64) -> Result<(), SimError> {
        let slot = self
            .0
            .get_mut(n)
            .ok_or_else(|| SimError::Unsupported(format!("operand ${} is not bound", n)))?;
        *slot = v;
        Ok(())
    }
}

fn raw_bits(v: &Val) -> Result<u64, SimError> {
    match v {
        Val::Int(x) | Val::Ptr(x) => Ok(*x),
        other => Err(SimError::Unsupported(format!("{:?} bound to an asm register", other))),
    }
}

fn malformed(text: &str) -> SimError {
    SimError::Unsupported(format!("malformed ptx `{}`", text))
}

// ─── Operand syntax ────────────────────────────────────────────────

/// Split at commas outside `{}` and `[]`.
fn split_operands(text: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut start = 0;
    for (i, c) in text.char_indices() {
        match c {
            '{' | '[' => depth += 1,
            '}' | ']' => depth -= 1,
            ',' if depth == 0 => {
                parts.push(text[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    let last = text[start..].trim();
    if !last.is_empty() {
        parts.push(last);
    }
    parts
}

fn register(text: &str) -> Result<usize, SimError> {
    text.trim()
        .strip_prefix('$')
        .and_then(|n| n.parse().ok())
        .ok_or_else(|| malformed(text))
}

/// `$n` or `{ $a, $b, ... }`.
fn register_list(text: &str) -> Result<Vec<usize>, SimError> {
    match text.strip_prefix('{').and_then(|t| t.strip_suffix('}')) {
        Some(inner) => inner.split(',').map(register).collect(),
        None => Ok(vec![register(text)?]),
    }
}

/// `[ $n + off ]` as register and byte offset.
fn address(text: &str) -> Result<(usize, i64), SimError> {
    let inner = text
        .strip_prefix('[')
        .and_then(|t| t.strip_suffix(']'))
        .ok_or_else(|| malformed(text))?;
    match inner.split_once('+') {
        Some((reg, off)) => {
            let off = off.trim().parse().map_err(|_| malformed(text))?;
            Ok((register(reg)?, off))
        }
        None => Ok((register(inner)?, 0)),
    }
}

fn source(text: &str, regs: &Regs) -> Result<u64, SimError> {
    if text.starts_with('$') {
        return regs.get(register(text)?);
    }
    text.parse::<i64>()
        .map(|v| v as u64)
        .map_err(|_| malformed(text))
}

// ─── Instructions ──────────────────────────────────────────────────

fn operand<'t>(ops: &[&'t str], i: usize, line: &str) -> Result<&'t str, SimError> {
    ops.get(i).copied().ok_or_else(|| malformed(line))
}

fn execute_line(line: &str, regs: &mut Regs, memory: &mut Memory<'_>) -> Result<(), SimError> {
    let text = line.trim().trim_end_matches(';').trim();
    if text.is_empty() {
        return Ok(());
    }
    let rest = match text.strip_prefix('@') {
        Some(guarded) => {
            let (pred, rest) = guarded.split_once(' ').ok_or_else(|| malformed(line))?;
            let (negated, reg) = match pred.strip_prefix('!') {
                Some(reg) => (true, reg),
                None => (false, pred),
            };
            if (regs.get(register(reg)?)? != 0) == negated {
                return Ok(());
            }
            rest.trim()
        }
        None => text,
    };

    let (opcode, args) = rest.split_once(' ').unwrap_or((rest, ""));
    let mut parts = opcode.split('.');
    let name = parts.next().unwrap_or_default();
    let modifiers: Vec<&str> = parts.collect();
    let words = modifiers
        .iter()
        .find_map(|m| m.strip_prefix('v').and_then(|n| n.parse::<usize>().ok()))
        .unwrap_or(1);
    let width = modifiers
        .iter()
        .find_map(|m| {
            m.strip_prefix('b')
                .or_else(|| m.strip_prefix('u'))
                .and_then(|n| n.parse::<u32>().ok())
        })
        .filter(|w| (8..=64).contains(w))
        .ok_or_else(|| malformed(line))?;
    let space = if modifiers.contains(&"shared") {
        SHARED_ADDRESS_SPACE
    } else {
        GLOBAL_ADDRESS_SPACE
    };
    let bytes = (width / 8) as usize;
    let ops = split_operands(args);

    match name {
        "ld" => {
            let dsts = register_list(operand(&ops, 0, line)?)?;
            let (base, offset) = address(operand(&ops, 1, line)?)?;
            if dsts.len() != words {
                return Err(malformed(line));
            }
            let addr = regs.get(base)?.wrapping_add(offset as u64);
            for (k, dst) in dsts.into_iter().enumerate() {
                let data = memory.read(space, addr.wrapping_add((k * bytes) as u64), bytes)?;
                let mut buf = [0u8; 8];
                buf[..bytes].copy_from_slice(data);
                regs.set(dst, u64::from_le_bytes(buf))?;
            }
        }
        "st" => {
            let (base, offset) = address(operand(&ops, 0, line)?)?;
            let srcs = register_list(operand(&ops, 1, line)?)?;
            if srcs.len() != words {
                return Err(malformed(line));
            }
            let addr = regs.get(base)?.wrapping_add(offset as u64);
            for (k, src) in srcs.into_iter().enumerate() {
                let word = regs.get(src)?.to_le_bytes();
                memory.write(space, addr.wrapping_add((k * bytes) as u64), &word[..bytes])?;
            }
        }
        "mov" => {
            let dst = register(operand(&ops, 0, line)?)?;
            let v = source(operand(&ops, 1, line)?, regs)?;
            regs.set(dst, v & mask(width))?;
        }
        _ => return Err(SimError::Unsupported(format!("ptx instruction `{}`", opcode))),
    }
    Ok(())
}

/// Run one inline-asm block; returns the outputs shaped as `ret`.
pub(crate) fn execute(
    asm: &str,
    constraints: &str,
    inputs: &[Val],
    ret: Option<&Type>,
    memory: &mut Memory<'_>,
) -> Result<Option<Val>, SimError> {
    let mut regs = Regs(Vec::new());
    let mut outputs = Vec::new();
    let mut bound = inputs.iter();
    for (i, c) in constraints.split(',').filter(|c| !c.is_empty()).enumerate() {
        if c.starts_with('=') {
            outputs.push(i);
            regs.0.push(0);
        } else {
            let v = bound
                .next()
                .ok_or_else(|| SimError::TypeMismatch(format!("no value bound to ${}", i)))?;
            regs.0.push(raw_bits(v)?);
        }
    }

    for line in asm.split("\n\t") {
        execute_line(line, &mut regs, memory)?;
    }

    let word = |i: usize, bits: u32| -> Result<Val, SimError> {
        let reg = outputs
            .get(i)
            .copied()
            .ok_or_else(|| SimError::TypeMismatch(format!("asm has no output {}", i)))?;
        Ok(Val::Int(regs.get(reg)? & mask(bits)))
    };
    match ret {
        None => Ok(None),
        Some(Type::Int(bits)) => word(0, *bits).map(Some),
        Some(Type::Struct(fields)) => fields
            .iter()
            .enumerate()
            .map(|(i, f)| match f {
                Type::Int(bits) => word(i, *bits),
                other => Err(SimError::Unsupported(format!("asm output of type {}", other))),
            })
            .collect::<Result<Vec<_>, _>>()
            .map(|items| Some(Val::Agg(items))),
        Some(other) => Err(SimError::Unsupported(format!("asm result of type {}", other))),
    }
}
