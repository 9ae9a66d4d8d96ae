//! Global-memory `load` and `store` as predicated inline PTX.
//!
//! A thread's elements are taken `vec` at a time; each chunk is moved by
//! one `ld`/`st` of `n_words` machine words:
//!
//! ```text
//!   elem_bits  = max(8, bits)          i1 travels as i8
//!   width      = min(elem_bits * vec, max(32, elem_bits))
//!   n_words    = elem_bits * vec / width
//!   word_elems = width / elem_bits
//! ```
//!
//! The chunk's predicate is the mask element at its first position. A
//! masked load with `other` adds one `mov` per word, executed when the
//! predicate is false, that writes the fallback into the destination.

use tracing::trace;

use crate::analysis::allocation::elem_bits;
use crate::error::{LowerError, LowerResult};
use crate::ir::ptx::{constraint_for_width, Operand, PtxBuilder};
use crate::ir::{CastOp, Type, Value};
use crate::tensor::{
    self, CacheModifier, ConstValue, ElemType, EvictionPolicy, OpId, OpKind, Operation, ValueId,
};

use super::{convert_elem, result_type, ConversionPattern, RewriteCtx};

/// Widest power-of-two chunk that stays inside one thread's contiguous
/// run and that the address analysis proves aligned and contiguous.
pub fn choose_vector_width(contig_per_thread: u32, divisibility: u32, contiguity: u32, extent: u32) -> u32 {
    let cap = contig_per_thread.min(divisibility).min(contiguity).min(extent);
    let mut vec = 1;
    while vec * 2 <= cap && contig_per_thread % (vec * 2) == 0 {
        vec *= 2;
    }
    vec
}

/// How one chunk of `vec` elements splits into machine words.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WordShape {
    pub elem_bits: u32,
    pub width: u32,
    pub n_words: u32,
    pub word_elems: u32,
}

impl WordShape {
    pub fn new(bits: u32, vec: u32) -> Self {
        let elem_bits = bits.max(8);
        let max_word = elem_bits.max(32);
        let total = elem_bits * vec;
        let width = total.min(max_word);
        Self {
            elem_bits,
            width,
            n_words: (total / width).max(1),
            word_elems: width / elem_bits,
        }
    }
}

/// In-register type of an element while it sits in a memory word.
fn storage_type(elem: &Type) -> Type {
    match elem {
        Type::Int(1) => Type::Int(8),
        other => other.clone(),
    }
}

/// Vector width for accesses through `ptr`.
fn vector_width(cx: &RewriteCtx<'_>, ptr: ValueId) -> LowerResult<u32> {
    match cx.ty(ptr)? {
        tensor::Type::Tensor(t) => {
            let order = t.layout.order()?;
            let fastest = order.first().copied().unwrap_or(0) as usize;
            let extent = t.shape.get(fastest).copied().unwrap_or(1);
            Ok(choose_vector_width(
                t.layout.contig_per_thread()?,
                cx.axis.divisibility(ptr, fastest),
                cx.axis.contiguity(ptr, fastest),
                extent,
            ))
        }
        tensor::Type::Scalar(_) => Ok(1),
    }
}

/// Pointee type of the pointer operand.
fn pointee(cx: &RewriteCtx<'_>, ptr: ValueId) -> LowerResult<ElemType> {
    match cx.ty(ptr)?.elem() {
        ElemType::Ptr { ptr } => Ok(ElemType::Scalar(ptr)),
        other => Err(LowerError::invariant(format!("memory access through {}", other))),
    }
}

fn check_count(what: &str, actual: usize, expected: usize) -> LowerResult<()> {
    if actual != expected {
        return Err(LowerError::invariant(format!(
            "{} has {} elements, pointer has {}",
            what, actual, expected
        )));
    }
    Ok(())
}

/// Predicate of the chunk starting at `start`.
fn chunk_predicate(cx: &mut RewriteCtx<'_>, mask: Option<&[Value]>, start: usize) -> LowerResult<Value> {
    match mask {
        Some(m) => m
            .get(start)
            .copied()
            .ok_or_else(|| LowerError::invariant(format!("no mask element {}", start))),
        None => Ok(cx.builder.const_int(1, 1)),
    }
}

/// Pack `elems` into one `i{width}` word through a vector bitcast.
fn pack_word(cx: &mut RewriteCtx<'_>, elems: &[Value], storage: &Type, width: u32) -> LowerResult<Value> {
    let b = &mut cx.builder;
    let vec_ty = Type::vector(elems.len() as u32, storage.clone());
    let mut word = b.undef(vec_ty);
    for (i, &e) in elems.iter().enumerate() {
        let e = if b.value_type(e)? == &Type::Int(1) {
            b.cast(CastOp::SExt, e, Type::Int(8))
        } else {
            e
        };
        let idx = b.index(i as u32);
        word = b.insert_element(word, e, idx)?;
    }
    Ok(b.cast(CastOp::Bitcast, word, Type::Int(width)))
}

/// Fallback immediate for a splat integer `other`, replicated across the
/// elements of a word.
fn splat_immediate(value: ConstValue, words: WordShape) -> Option<i64> {
    let v = match value {
        ConstValue::Bool(b) => i64::from(b),
        ConstValue::Int(v) => v,
        ConstValue::Float(_) => return None,
    };
    if words.word_elems == 1 {
        return Some(v);
    }
    let mask = if words.elem_bits >= 64 {
        u64::MAX
    } else {
        (1u64 << words.elem_bits) - 1
    };
    let lane = (v as u64) & mask;
    let mut imm = 0u64;
    for k in 0..words.word_elems {
        imm |= lane << (k * words.elem_bits);
    }
    Some(imm as i64)
}

fn element(vals: &[Value], i: usize) -> LowerResult<Value> {
    vals.get(i)
        .copied()
        .ok_or_else(|| LowerError::invariant(format!("no element {}", i)))
}

// ─── Load ──────────────────────────────────────────────────────────

pub struct LoadLowering;

impl ConversionPattern for LoadLowering {
    fn name(&self) -> &'static str {
        "load"
    }

    fn matches(&self, op: &Operation) -> bool {
        matches!(op.kind, OpKind::Load { .. })
    }

    fn rewrite(&self, _id: OpId, op: &Operation, cx: &mut RewriteCtx<'_>) -> LowerResult<Option<Value>> {
        let OpKind::Load {
            ptr,
            mask,
            other,
            cache,
            evict,
            is_volatile,
        } = &op.kind
        else {
            return Err(LowerError::match_failure("not a load"));
        };
        let ty = result_type(op)?;
        let elem = pointee(cx, *ptr)?;
        if elem != ty.elem() {
            return Err(LowerError::invariant(format!("load of {} through {}", ty, cx.ty(*ptr)?)));
        }

        let ptrs = cx.elements(*ptr)?;
        let masks = mask.map(|m| cx.elements(m)).transpose()?;
        let others = other.map(|o| cx.elements(o)).transpose()?;
        if let Some(m) = &masks {
            check_count("mask", m.len(), ptrs.len())?;
        }
        if let Some(o) = &others {
            check_count("other", o.len(), ptrs.len())?;
        }

        let value_ty = convert_elem(elem);
        let storage = storage_type(&value_ty);
        let vec = vector_width(cx, *ptr)?;
        let words = WordShape::new(elem_bits(elem), vec);
        let width = words.width;
        let imm = other
            .and_then(|o| cx.constant(o))
            .filter(|_| elem.is_int())
            .and_then(|c| splat_immediate(c, words));
        trace!(vec, ?words, count = ptrs.len(), "load");

        let mut loaded = Vec::with_capacity(ptrs.len());
        for start in (0..ptrs.len()).step_by(vec as usize) {
            let pred_value = chunk_predicate(cx, masks.as_deref(), start)?;

            // fallback words, built before any operand is numbered
            let mut fallback: Vec<Option<Value>> = Vec::new();
            if let Some(o) = &others {
                for w in 0..words.n_words as usize {
                    if imm.is_some() {
                        fallback.push(None);
                        continue;
                    }
                    let first = start + w * words.word_elems as usize;
                    let chunk = o
                        .get(first..first + words.word_elems as usize)
                        .ok_or_else(|| LowerError::invariant("fallback chunk out of range"))?;
                    fallback.push(Some(pack_word(cx, chunk, &storage, width)?));
                }
            }

            let mut ptx = PtxBuilder::new();
            let outs: Vec<Operand> = (0..words.n_words)
                .map(|_| ptx.output(&format!("={}", constraint_for_width(width))))
                .collect();
            let dsts = PtxBuilder::list(&outs);
            let addr = ptx.address(element(&ptrs, start)?, "l", 0);
            let pred = ptx.input(pred_value, "b");
            let mut fallback_ops = Vec::with_capacity(fallback.len());
            for word in &fallback {
                let op = match (word, imm) {
                    (_, Some(imm)) => PtxBuilder::constant(imm),
                    (Some(v), None) => ptx.input(*v, constraint_for_width(width)),
                    (None, None) => return Err(LowerError::invariant("missing fallback word")),
                };
                fallback_ops.push(op);
            }

            ptx.instr("ld")
                .modifier("volatile", *is_volatile)
                .modifier("global", true)
                .modifier("ca", *cache == CacheModifier::Ca)
                .modifier("cg", *cache == CacheModifier::Cg)
                .modifier("L1::evict_first", *evict == EvictionPolicy::EvictFirst)
                .modifier("L1::evict_last", *evict == EvictionPolicy::EvictLast)
                .vector(words.n_words)
                .bits(width)
                .operands([dsts.clone(), addr])
                .predicate(&pred);
            for (w, src) in fallback_ops.into_iter().enumerate() {
                let dst = dsts
                    .get(w)
                    .ok_or_else(|| LowerError::invariant("fallback without destination"))?;
                ptx.instr("mov")
                    .modifier(&format!("u{}", width), true)
                    .operands([dst, src])
                    .predicate_not(&pred);
            }

            let ret_ty = if words.n_words > 1 {
                Type::Struct(vec![Type::Int(width); words.n_words as usize])
            } else {
                Type::Int(width)
            };
            let b = &mut cx.builder;
            let ret = b
                .inline_asm(Some(ret_ty), ptx.dump(), ptx.constraints(), ptx.inputs(), true)
                .ok_or_else(|| LowerError::invariant("inline asm without result"))?;

            let word_ty = Type::vector(words.word_elems, storage.clone());
            let mut rets = Vec::with_capacity(words.n_words as usize);
            for w in 0..words.n_words {
                let word = if words.n_words > 1 {
                    b.extract_value(ret, w)?
                } else {
                    ret
                };
                rets.push(b.cast(CastOp::Bitcast, word, word_ty.clone()));
            }
            for i in 0..vec {
                let word = element(&rets, (i / words.word_elems) as usize)?;
                let idx = b.index(i % words.word_elems);
                let v = b.extract_element(word, idx)?;
                let v = if value_ty == Type::Int(1) {
                    b.cast(CastOp::Trunc, v, Type::Int(1))
                } else {
                    v
                };
                loaded.push(v);
            }
        }

        cx.assemble(&loaded, ty).map(Some)
    }
}

// ─── Store ─────────────────────────────────────────────────────────

pub struct StoreLowering;

impl ConversionPattern for StoreLowering {
    fn name(&self) -> &'static str {
        "store"
    }

    fn matches(&self, op: &Operation) -> bool {
        matches!(op.kind, OpKind::Store { .. })
    }

    fn rewrite(&self, _id: OpId, op: &Operation, cx: &mut RewriteCtx<'_>) -> LowerResult<Option<Value>> {
        let OpKind::Store {
            ptr,
            value,
            mask,
            cache,
            evict,
        } = &op.kind
        else {
            return Err(LowerError::match_failure("not a store"));
        };
        if *cache == CacheModifier::Ca {
            return Err(LowerError::not_implemented("store with the .ca cache modifier"));
        }
        let elem = pointee(cx, *ptr)?;
        if elem != cx.ty(*value)?.elem() {
            return Err(LowerError::invariant(format!(
                "store of {} through {}",
                cx.ty(*value)?,
                cx.ty(*ptr)?
            )));
        }

        let ptrs = cx.elements(*ptr)?;
        let vals = cx.elements(*value)?;
        check_count("value", vals.len(), ptrs.len())?;
        let masks = mask.map(|m| cx.elements(m)).transpose()?;
        if let Some(m) = &masks {
            check_count("mask", m.len(), ptrs.len())?;
        }

        let storage = storage_type(&convert_elem(elem));
        let vec = vector_width(cx, *ptr)?;
        let words = WordShape::new(elem_bits(elem), vec);
        let width = words.width;
        trace!(vec, ?words, count = ptrs.len(), "store");

        for start in (0..ptrs.len()).step_by(vec as usize) {
            let mut data = Vec::with_capacity(words.n_words as usize);
            for w in 0..words.n_words as usize {
                let first = start + w * words.word_elems as usize;
                let chunk = vals
                    .get(first..first + words.word_elems as usize)
                    .ok_or_else(|| LowerError::invariant("store chunk out of range"))?;
                data.push(pack_word(cx, chunk, &storage, width)?);
            }
            let pred_value = chunk_predicate(cx, masks.as_deref(), start)?;

            let mut ptx = PtxBuilder::new();
            let addr = ptx.address(element(&ptrs, start)?, "l", 0);
            let regs: Vec<Operand> = data
                .iter()
                .map(|&d| ptx.input(d, constraint_for_width(width)))
                .collect();
            let pred = ptx.input(pred_value, "b");
            ptx.instr("st")
                .modifier("global", true)
                .modifier("cg", *cache == CacheModifier::Cg)
                .modifier("L1::evict_first", *evict == EvictionPolicy::EvictFirst)
                .modifier("L1::evict_last", *evict == EvictionPolicy::EvictLast)
                .vector(words.n_words)
                .bits(width)
                .operands([addr, PtxBuilder::list(&regs)])
                .predicate(&pred);
            cx.builder
                .inline_asm(None, ptx.dump(), ptx.constraints(), ptx.inputs(), true);
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_count_mismatch_is_invariant() {
        assert!(check_count("mask", 4, 4).is_ok());
        let err = check_count("value", 8, 4).unwrap_err();
        assert!(!err.is_recoverable());
        assert_eq!(err.to_string(), "invariant violated: value has 8 elements, pointer has 4");
    }

    #[test]
    fn test_vector_width_limited_by_every_bound() {
        assert_eq!(choose_vector_width(4, 16, 128, 128), 4);
        assert_eq!(choose_vector_width(4, 2, 128, 128), 2);
        assert_eq!(choose_vector_width(4, 16, 1, 128), 1);
        assert_eq!(choose_vector_width(8, 16, 128, 4), 4);
        // no axis information
        assert_eq!(choose_vector_width(4, 1, 1, 128), 1);
    }

    #[test]
    fn test_vector_width_is_a_power_of_two_dividing_the_run() {
        assert_eq!(choose_vector_width(6, 16, 16, 16), 2);
        assert_eq!(choose_vector_width(3, 16, 16, 16), 1);
        assert_eq!(choose_vector_width(8, 6, 16, 16), 4);
    }

    #[test]
    fn test_word_shapes() {
        assert_eq!(
            WordShape::new(32, 4),
            WordShape { elem_bits: 32, width: 32, n_words: 4, word_elems: 1 }
        );
        assert_eq!(
            WordShape::new(16, 4),
            WordShape { elem_bits: 16, width: 32, n_words: 2, word_elems: 2 }
        );
        assert_eq!(
            WordShape::new(16, 1),
            WordShape { elem_bits: 16, width: 16, n_words: 1, word_elems: 1 }
        );
        assert_eq!(
            WordShape::new(64, 2),
            WordShape { elem_bits: 64, width: 64, n_words: 2, word_elems: 1 }
        );
        // i1 is moved as bytes
        assert_eq!(WordShape::new(1, 4).width, 32);
        assert_eq!(WordShape::new(1, 4).word_elems, 4);
    }

    #[test]
    fn test_splat_immediate_replicates_across_word() {
        let one = WordShape::new(32, 1);
        assert_eq!(splat_immediate(ConstValue::Int(-1), one), Some(-1));
        let packed = WordShape::new(16, 2);
        assert_eq!(splat_immediate(ConstValue::Int(3), packed), Some(0x0003_0003));
        let bools = WordShape::new(1, 4);
        assert_eq!(splat_immediate(ConstValue::Bool(true), bools), Some(0x0101_0101));
        assert_eq!(splat_immediate(ConstValue::Float(1.0), one), None);
    }
}
