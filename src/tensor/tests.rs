use super::*;
use crate::layout::{BlockedLayout, Layout};

fn blocked_1d() -> Layout {
    Layout::Blocked(BlockedLayout::new(&[4], &[32], &[1], &[0]).unwrap())
}

const COPY_KERNEL: &str = r#"{
    "num_warps": 1,
    "kernel": {
        "name": "copy",
        "args": [
            { "id": 0, "ty": { "ptr": "f32" }, "divisibility": 16 },
            { "id": 1, "ty": { "ptr": "f32" }, "divisibility": 16 }
        ],
        "body": [
            { "result": 2, "op": "make_range", "start": 0, "end": 128,
              "ty": { "shape": [128], "elem": "i32", "layout": {
                  "kind": "blocked", "size_per_thread": [4], "threads_per_warp": [32],
                  "warps_per_cta": [1], "order": [0] } } },
            { "result": 3, "op": "splat", "src": 0,
              "ty": { "shape": [128], "elem": { "ptr": "f32" }, "layout": {
                  "kind": "blocked", "size_per_thread": [4], "threads_per_warp": [32],
                  "warps_per_cta": [1], "order": [0] } } },
            { "result": 4, "op": "addptr", "ptr": 3, "offset": 2,
              "ty": { "shape": [128], "elem": { "ptr": "f32" }, "layout": {
                  "kind": "blocked", "size_per_thread": [4], "threads_per_warp": [32],
                  "warps_per_cta": [1], "order": [0] } },
              "loc": { "line": 3, "col": 9 } },
            { "result": 5, "op": "load", "ptr": 4, "cache": "cg", "evict": "evict_last",
              "ty": { "shape": [128], "elem": "f32", "layout": {
                  "kind": "blocked", "size_per_thread": [4], "threads_per_warp": [32],
                  "warps_per_cta": [1], "order": [0] } } },
            { "op": "return" }
        ]
    }
}"#;

#[test]
fn test_parse_module() {
    let module = TensorModule::from_json(COPY_KERNEL).unwrap();
    assert_eq!(module.num_warps, Some(1));
    let kernel = &module.kernel;
    assert_eq!(kernel.name, "copy");
    assert_eq!(kernel.args[0].divisibility, Some(16));
    assert_eq!(kernel.args[0].ty, Type::Scalar(ElemType::Ptr { ptr: ScalarType::F32 }));
    assert_eq!(kernel.body.len(), 5);
    match &kernel.body[3].kind {
        OpKind::Load {
            ptr,
            mask,
            cache,
            evict,
            is_volatile,
            ..
        } => {
            assert_eq!(*ptr, ValueId(4));
            assert!(mask.is_none());
            assert_eq!(*cache, CacheModifier::Cg);
            assert_eq!(*evict, EvictionPolicy::EvictLast);
            assert!(!is_volatile);
        }
        other => panic!("expected load, got {:?}", other),
    }
    assert_eq!(kernel.body[2].location(), Location::new(3, 9));
    assert!(!kernel.body[0].location().is_known());
    assert_eq!(kernel.body[4].kind, OpKind::Return { operands: vec![] });
}

#[test]
fn test_value_types() {
    let module = TensorModule::from_json(COPY_KERNEL).unwrap();
    let types = module.kernel.value_types().unwrap();
    assert_eq!(types.len(), 5);
    let range = types[&ValueId(2)].as_tensor().unwrap();
    assert_eq!(range.shape.as_slice(), &[128]);
    assert_eq!(range.elem, ElemType::Scalar(ScalarType::I32));
    assert_eq!(
        range.to_string(),
        "tensor<128xi32, #blocked<{sizePerThread = [4], threadsPerWarp = [32], warpsPerCTA = [1], order = [0]}>>"
    );
}

#[test]
fn test_value_defined_twice_is_invariant() {
    let mut kernel = TensorModule::from_json(COPY_KERNEL).unwrap().kernel;
    kernel.body[1].result = Some(ValueId(2));
    let err = kernel.value_types().unwrap_err();
    assert!(!err.is_recoverable());
    assert!(err.to_string().contains("defined twice"));
}

#[test]
fn test_untyped_result_is_invariant() {
    let mut kernel = TensorModule::from_json(COPY_KERNEL).unwrap().kernel;
    kernel.body[0].ty = None;
    assert!(kernel.value_types().is_err());
}

#[test]
fn test_operands() {
    let load = OpKind::Load {
        ptr: ValueId(1),
        mask: Some(ValueId(2)),
        other: Some(ValueId(3)),
        cache: CacheModifier::None,
        evict: EvictionPolicy::Normal,
        is_volatile: false,
    };
    assert_eq!(load.operands(), vec![ValueId(1), ValueId(2), ValueId(3)]);
    let store = OpKind::Store {
        ptr: ValueId(1),
        value: ValueId(4),
        mask: None,
        cache: CacheModifier::None,
        evict: EvictionPolicy::Normal,
    };
    assert_eq!(store.operands(), vec![ValueId(1), ValueId(4)]);
    assert!(OpKind::MakeRange { start: 0, end: 4 }.operands().is_empty());
    assert_eq!(store.name(), "store");
}

#[test]
fn test_kernel_builder_numbering() {
    let mut kb = KernelBuilder::new("k");
    let ptr = kb.arg(Type::Scalar(ElemType::Ptr { ptr: ScalarType::F32 }), Some(16));
    let range = kb.op(
        Type::Tensor(TensorType::new(&[128], ElemType::Scalar(ScalarType::I32), blocked_1d())),
        OpKind::MakeRange { start: 0, end: 128 },
    );
    kb.effect(OpKind::Return { operands: vec![] });
    let kernel = kb.finish();
    assert_eq!(ptr, ValueId(0));
    assert_eq!(range, ValueId(1));
    assert_eq!(kernel.body.len(), 2);
    assert!(kernel.body[1].result.is_none());
    assert_eq!(kernel.value_types().unwrap().len(), 2);
}

#[test]
fn test_constants() {
    let mut kb = KernelBuilder::new("k");
    let c = kb.op(
        Type::Scalar(ElemType::Scalar(ScalarType::I32)),
        OpKind::Constant {
            value: ConstValue::Int(7),
        },
    );
    let consts = kb.finish().constants();
    assert_eq!(consts.get(&c), Some(&ConstValue::Int(7)));
}

#[test]
fn test_op_tags_match_names() {
    let v = ValueId(0);
    let plain = CacheModifier::None;
    let normal = EvictionPolicy::Normal;
    let ops = vec![
        OpKind::Splat { src: v },
        OpKind::Constant {
            value: ConstValue::Int(1),
        },
        OpKind::MakeRange { start: 0, end: 4 },
        OpKind::GetProgramId { axis: 0 },
        OpKind::Binary {
            kind: BinaryOp::AddI,
            lhs: v,
            rhs: v,
        },
        OpKind::AddPtr { ptr: v, offset: v },
        OpKind::Broadcast { src: v },
        OpKind::View { src: v },
        OpKind::ExpandDims { src: v, axis: 0 },
        OpKind::ConvertLayout { src: v },
        OpKind::Load {
            ptr: v,
            mask: None,
            other: None,
            cache: plain,
            evict: normal,
            is_volatile: false,
        },
        OpKind::Store {
            ptr: v,
            value: v,
            mask: None,
            cache: plain,
            evict: normal,
        },
        OpKind::Return { operands: vec![] },
    ];
    for op in ops {
        let json = serde_json::to_value(&op).unwrap();
        assert_eq!(json["op"], op.name(), "{:?}", op);
        let back: OpKind = serde_json::from_value(json).unwrap();
        assert_eq!(back, op);
    }
}

#[test]
fn test_zero_extent_shape_is_rejected_when_parsed() {
    let text = COPY_KERNEL.replace("[128]", "[0]");
    assert!(TensorModule::from_json(&text).is_err());

    let layout = r#"{ "kind": "blocked", "size_per_thread": [4], "threads_per_warp": [32],
                      "warps_per_cta": [1], "order": [0] }"#;
    let tensor = format!(r#"{{ "shape": [16, 0], "elem": "f32", "layout": {} }}"#, layout);
    let err = serde_json::from_str::<TensorType>(&tensor).unwrap_err();
    assert!(err.to_string().contains("zero extent"));
}

#[test]
fn test_zero_extent_shape_is_invariant() {
    let mut kb = KernelBuilder::new("k");
    kb.op(
        Type::Tensor(TensorType::new(&[0], ElemType::Scalar(ScalarType::I32), blocked_1d())),
        OpKind::MakeRange { start: 0, end: 0 },
    );
    let err = kb.finish().value_types().unwrap_err();
    assert!(!err.is_recoverable());
    assert!(err.to_string().contains("zero extent"));
}
