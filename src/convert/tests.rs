use crate::config::LowerOptions;
use crate::diagnostic::Diagnostic;
use crate::index::Shape;
use crate::ir::{self, CastOp, Constant, Dim, Inst};
use crate::layout::{BlockedLayout, Layout, MmaLayout};
use crate::lower::lower_module;
use crate::tensor::{
    CacheModifier, ConstValue, ElemType, EvictionPolicy, Kernel, KernelBuilder, OpKind, ScalarType,
    TensorModule, TensorType, Type, ValueId,
};

fn blocked(spt: &[u32], tpw: &[u32], wpc: &[u32], order: &[u32]) -> Layout {
    Layout::Blocked(BlockedLayout::new(spt, tpw, wpc, order).unwrap())
}

fn copy_layout() -> Layout {
    blocked(&[4], &[32], &[1], &[0])
}

fn tensor(shape: &[u32], elem: ElemType, layout: Layout) -> Type {
    Type::Tensor(TensorType::new(shape, elem, layout))
}

fn scalar(s: ScalarType) -> ElemType {
    ElemType::Scalar(s)
}

fn ptr_to(s: ScalarType) -> ElemType {
    ElemType::Ptr { ptr: s }
}

fn lower(kernel: Kernel, num_warps: u32) -> Result<ir::Module, Vec<Diagnostic>> {
    let module = TensorModule {
        num_warps: Some(num_warps),
        source: None,
        kernel,
    };
    lower_module(&module, &LowerOptions::default())
}

/// `base + make_range(0..128)` for a pointer argument of `elem`.
fn offsets(kb: &mut KernelBuilder, elem: ScalarType, divisibility: Option<u32>) -> ValueId {
    let layout = copy_layout();
    let base = kb.arg(Type::Scalar(ptr_to(elem)), divisibility);
    let range = kb.op(
        tensor(&[128], scalar(ScalarType::I32), layout.clone()),
        OpKind::MakeRange { start: 0, end: 128 },
    );
    let ptrs = kb.op(tensor(&[128], ptr_to(elem), layout.clone()), OpKind::Splat { src: base });
    kb.op(
        tensor(&[128], ptr_to(elem), layout),
        OpKind::AddPtr {
            ptr: ptrs,
            offset: range,
        },
    )
}

fn load(ptr: ValueId) -> OpKind {
    OpKind::Load {
        ptr,
        mask: None,
        other: None,
        cache: CacheModifier::None,
        evict: EvictionPolicy::Normal,
        is_volatile: false,
    }
}

fn store(ptr: ValueId, value: ValueId) -> OpKind {
    OpKind::Store {
        ptr,
        value,
        mask: None,
        cache: CacheModifier::None,
        evict: EvictionPolicy::Normal,
    }
}

fn ret() -> OpKind {
    OpKind::Return { operands: vec![] }
}

/// Inline assembly of the kernel as (asm, constraints) pairs.
fn asm_of(module: &ir::Module) -> Vec<(String, String)> {
    module.functions[0]
        .insts()
        .filter_map(|i| match i {
            Inst::InlineAsm {
                asm, constraints, ..
            } => Some((asm.clone(), constraints.clone())),
            _ => None,
        })
        .collect()
}

fn copy_kernel(cache: CacheModifier, evict: EvictionPolicy) -> Kernel {
    let mut kb = KernelBuilder::new("copy");
    let src = offsets(&mut kb, ScalarType::F32, Some(16));
    let dst = offsets(&mut kb, ScalarType::F32, Some(16));
    let x = kb.op(
        tensor(&[128], scalar(ScalarType::F32), copy_layout()),
        OpKind::Load {
            ptr: src,
            mask: None,
            other: None,
            cache,
            evict,
            is_volatile: false,
        },
    );
    kb.effect(store(dst, x));
    kb.effect(ret());
    kb.finish()
}

// ─── Memory ────────────────────────────────────────────────────────

#[test]
fn test_aligned_copy_is_vectorized() {
    let module = lower(copy_kernel(CacheModifier::Cg, EvictionPolicy::EvictLast), 1).unwrap();
    let asm = asm_of(&module);
    assert_eq!(asm.len(), 2);
    assert_eq!(
        asm[0],
        (
            "@$5 ld.global.cg.L1::evict_last.v4.b32 { $0, $1, $2, $3 }, [ $4 + 0 ];".to_string(),
            "=r,=r,=r,=r,l,b".to_string()
        )
    );
    assert_eq!(
        asm[1],
        (
            "@$5 st.global.v4.b32 [ $0 + 0 ], { $1, $2, $3, $4 };".to_string(),
            "l,r,r,r,r,b".to_string()
        )
    );
}

#[test]
fn test_unaligned_pointer_loads_one_element_at_a_time() {
    let mut kb = KernelBuilder::new("k");
    let src = offsets(&mut kb, ScalarType::F32, None);
    kb.op(tensor(&[128], scalar(ScalarType::F32), copy_layout()), load(src));
    kb.effect(ret());
    let module = lower(kb.finish(), 1).unwrap();

    let asm = asm_of(&module);
    assert_eq!(asm.len(), 4);
    for (text, constraints) in &asm {
        assert_eq!(text, "@$2 ld.global.b32 $0, [ $1 + 0 ];");
        assert_eq!(constraints, "=r,l,b");
    }
}

#[test]
fn test_masked_load_with_splat_fallback_uses_immediates() {
    let mut kb = KernelBuilder::new("k");
    let src = offsets(&mut kb, ScalarType::I32, Some(16));
    let mask = kb.op(
        tensor(&[128], scalar(ScalarType::I1), copy_layout()),
        OpKind::Constant {
            value: ConstValue::Bool(true),
        },
    );
    let other = kb.op(
        tensor(&[128], scalar(ScalarType::I32), copy_layout()),
        OpKind::Constant {
            value: ConstValue::Int(-1),
        },
    );
    kb.op(
        tensor(&[128], scalar(ScalarType::I32), copy_layout()),
        OpKind::Load {
            ptr: src,
            mask: Some(mask),
            other: Some(other),
            cache: CacheModifier::None,
            evict: EvictionPolicy::EvictFirst,
            is_volatile: true,
        },
    );
    kb.effect(ret());
    let module = lower(kb.finish(), 1).unwrap();

    let asm = asm_of(&module);
    assert_eq!(asm.len(), 1);
    let expected = [
        "@$5 ld.volatile.global.L1::evict_first.v4.b32 { $0, $1, $2, $3 }, [ $4 + 0 ];",
        "@!$5 mov.u32 $0, -1;",
        "@!$5 mov.u32 $1, -1;",
        "@!$5 mov.u32 $2, -1;",
        "@!$5 mov.u32 $3, -1;",
    ]
    .join("\n\t");
    assert_eq!(asm[0].0, expected);
    // immediates bind no operand
    assert_eq!(asm[0].1, "=r,=r,=r,=r,l,b");
}

#[test]
fn test_bool_store_is_widened_to_bytes() {
    let mut kb = KernelBuilder::new("k");
    let dst = offsets(&mut kb, ScalarType::I1, None);
    let flags = kb.op(
        tensor(&[128], scalar(ScalarType::I1), copy_layout()),
        OpKind::Constant {
            value: ConstValue::Bool(true),
        },
    );
    kb.effect(store(dst, flags));
    kb.effect(ret());
    let module = lower(kb.finish(), 1).unwrap();

    let f = &module.functions[0];
    assert_eq!(f.count(|i| matches!(i, Inst::Cast { op: CastOp::SExt, .. })), 4);
    let asm = asm_of(&module);
    assert_eq!(asm.len(), 4);
    assert_eq!(asm[0].0, "@$2 st.global.b8 [ $0 + 0 ], $1;");
    assert_eq!(asm[0].1, "l,c,b");
}

#[test]
fn test_store_with_ca_is_not_implemented() {
    let mut kb = KernelBuilder::new("k");
    let dst = offsets(&mut kb, ScalarType::F32, Some(16));
    let x = kb.op(
        tensor(&[128], scalar(ScalarType::F32), copy_layout()),
        OpKind::Constant {
            value: ConstValue::Float(0.5),
        },
    );
    kb.effect(OpKind::Store {
        ptr: dst,
        value: x,
        mask: None,
        cache: CacheModifier::Ca,
        evict: EvictionPolicy::Normal,
    });
    kb.effect(ret());
    let diags = lower(kb.finish(), 1).unwrap_err();

    assert_eq!(diags.len(), 1);
    assert_eq!(diags[0].message, "cannot lower `store`");
    assert!(diags[0].notes[0].contains(".ca"));
    assert!(diags[0].help.is_some());
}

#[test]
fn test_load_mask_with_other_element_count_is_fatal() {
    let mut kb = KernelBuilder::new("k");
    let src = offsets(&mut kb, ScalarType::I32, Some(16));
    // spt 8 over [256]: eight mask elements against four pointers
    let mask = kb.op(
        tensor(&[256], scalar(ScalarType::I1), blocked(&[8], &[32], &[1], &[0])),
        OpKind::Constant {
            value: ConstValue::Bool(true),
        },
    );
    kb.op(
        tensor(&[128], scalar(ScalarType::I32), copy_layout()),
        OpKind::Load {
            ptr: src,
            mask: Some(mask),
            other: None,
            cache: CacheModifier::None,
            evict: EvictionPolicy::Normal,
            is_volatile: false,
        },
    );
    // never reached
    kb.op(
        tensor(&[128], scalar(ScalarType::I64), copy_layout()),
        OpKind::MakeRange { start: 0, end: 128 },
    );
    let diags = lower(kb.finish(), 1).unwrap_err();

    assert_eq!(diags.len(), 1);
    assert_eq!(diags[0].message, "cannot lower `load`");
    assert_eq!(diags[0].notes[0], "invariant violated: mask has 8 elements, pointer has 4");
    assert!(diags[0].help.is_none());
}

#[test]
fn test_store_value_with_other_element_count_is_fatal() {
    let mut kb = KernelBuilder::new("k");
    let dst = offsets(&mut kb, ScalarType::F32, Some(16));
    let x = kb.op(
        tensor(&[256], scalar(ScalarType::F32), copy_layout()),
        OpKind::Constant {
            value: ConstValue::Float(0.5),
        },
    );
    kb.effect(store(dst, x));
    kb.effect(OpKind::Return {
        operands: vec![x],
    });
    let diags = lower(kb.finish(), 1).unwrap_err();

    assert_eq!(diags.len(), 1);
    assert_eq!(diags[0].message, "cannot lower `store`");
    assert_eq!(diags[0].notes[0], "invariant violated: value has 8 elements, pointer has 4");
}

// ─── Creation ops ──────────────────────────────────────────────────

#[test]
fn test_splat_constant_fills_every_element() {
    let mut kb = KernelBuilder::new("k");
    kb.op(
        tensor(&[128], scalar(ScalarType::F32), copy_layout()),
        OpKind::Constant {
            value: ConstValue::Float(2.5),
        },
    );
    kb.effect(ret());
    let module = lower(kb.finish(), 1).unwrap();

    let f = &module.functions[0];
    let floats = f.count(|i| matches!(i, Inst::Const { value: Constant::Float(v), .. } if *v == 2.5));
    assert_eq!(floats, 1);
    assert_eq!(f.count(|i| matches!(i, Inst::InsertValue { .. })), 4);
}

#[test]
fn test_program_id_reads_the_block_index() {
    let mut kb = KernelBuilder::new("k");
    kb.op(
        Type::Scalar(scalar(ScalarType::I32)),
        OpKind::GetProgramId { axis: 1 },
    );
    kb.effect(ret());
    let module = lower(kb.finish(), 1).unwrap();
    let f = &module.functions[0];
    assert_eq!(f.count(|i| matches!(i, Inst::BlockIdx { dim: Dim::Y, .. })), 1);
}

#[test]
fn test_program_id_beyond_z_is_fatal() {
    let mut kb = KernelBuilder::new("k");
    kb.op(
        Type::Scalar(scalar(ScalarType::I32)),
        OpKind::GetProgramId { axis: 3 },
    );
    kb.effect(ret());
    let diags = lower(kb.finish(), 1).unwrap_err();
    assert_eq!(diags.len(), 1);
    assert!(diags[0].notes[0].contains("axis 3"));
    assert!(diags[0].help.is_none());
}

#[test]
fn test_make_range_of_wide_integers_is_not_implemented() {
    let mut kb = KernelBuilder::new("k");
    kb.op(
        tensor(&[128], scalar(ScalarType::I64), copy_layout()),
        OpKind::MakeRange { start: 0, end: 128 },
    );
    kb.effect(ret());
    let diags = lower(kb.finish(), 1).unwrap_err();
    assert_eq!(diags.len(), 1);
    assert_eq!(diags[0].message, "cannot lower `make_range`");
    assert!(diags[0].help.is_some());
}

// ─── Failure tiers ─────────────────────────────────────────────────

#[test]
fn test_recoverable_failures_are_all_reported() {
    let mut kb = KernelBuilder::new("k");
    let src = kb.op(
        tensor(&[16, 16], scalar(ScalarType::F32), blocked(&[1, 1], &[4, 8], &[1, 1], &[1, 0])),
        OpKind::Constant {
            value: ConstValue::Float(1.0),
        },
    );
    let mma = Layout::Mma(MmaLayout {
        version: 2,
        warps_per_cta: Shape::from_slice(&[1, 1]),
    });
    let converted = kb.op(
        tensor(&[16, 16], scalar(ScalarType::F32), mma),
        OpKind::ConvertLayout { src },
    );
    kb.effect(OpKind::Return {
        operands: vec![converted],
    });
    let diags = lower(kb.finish(), 1).unwrap_err();

    assert_eq!(diags.len(), 2);
    assert_eq!(diags[0].message, "cannot lower `convert_layout`");
    assert!(diags[0].help.is_some());
    assert_eq!(diags[1].message, "cannot lower `return`");
    assert!(diags[1].help.is_none());
}

#[test]
fn test_invariant_violation_stops_the_pass() {
    let mut kb = KernelBuilder::new("k");
    // 64 elements claimed for a 128-element tensor
    kb.op(
        tensor(&[128], scalar(ScalarType::I32), copy_layout()),
        OpKind::MakeRange { start: 0, end: 64 },
    );
    kb.effect(OpKind::Return {
        operands: vec![ValueId(0)],
    });
    let diags = lower(kb.finish(), 1).unwrap_err();
    assert_eq!(diags.len(), 1);
    assert_eq!(diags[0].message, "cannot lower `make_range`");
}

// ─── Layout conversion ─────────────────────────────────────────────

#[test]
fn test_conversion_rounds_each_take_two_barriers() {
    let src_layout = blocked(&[1, 4], &[8, 4], &[1, 1], &[1, 0]);
    let dst_layout = blocked(&[4, 1], &[4, 8], &[1, 1], &[0, 1]);
    let mut kb = KernelBuilder::new("k");
    let src = kb.op(
        tensor(&[64, 32], scalar(ScalarType::F32), src_layout),
        OpKind::Constant {
            value: ConstValue::Float(0.0),
        },
    );
    kb.op(
        tensor(&[64, 32], scalar(ScalarType::F32), dst_layout),
        OpKind::ConvertLayout { src },
    );
    kb.effect(ret());
    let module = lower(kb.finish(), 1).unwrap();

    // 4 x 2 rounds
    assert_eq!(module.functions[0].count(|i| matches!(i, Inst::Barrier)), 16);
    let smem = module.global(crate::config::SHARED_MEMORY_GLOBAL).unwrap();
    assert!(smem.ty.byte_size() > 0);
}
