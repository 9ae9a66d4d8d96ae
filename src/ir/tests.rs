use super::builder::FunctionBuilder;
use super::*;

#[test]
fn test_type_sizes() {
    assert_eq!(Type::Int(1).byte_size(), 1);
    assert_eq!(Type::F16.byte_size(), 2);
    assert_eq!(Type::vector(4, Type::F32).byte_size(), 16);
    assert_eq!(Type::array(1024, Type::Int(8)).byte_size(), 1024);
    assert_eq!(Type::ptr(Type::F32, 1).byte_size(), 8);
    assert_eq!(Type::Struct(vec![Type::F32, Type::F64]).byte_size(), 12);
    assert_eq!(Type::F64.scalar_bits(), Some(64));
    assert_eq!(Type::ptr(Type::F32, 1).scalar_bits(), None);
}

#[test]
fn test_type_display() {
    assert_eq!(Type::ptr(Type::F32, 3).to_string(), "ptr<f32, 3>");
    assert_eq!(Type::vector(2, Type::Int(8)).to_string(), "vector<2xi8>");
    assert_eq!(
        Type::Struct(vec![Type::F32, Type::F32]).to_string(),
        "struct<(f32, f32)>"
    );
    assert_eq!(Type::array(16, Type::Int(8)).to_string(), "array<16 x i8>");
}

#[test]
fn test_dim_from_axis() {
    assert_eq!(Dim::from_axis(0), Some(Dim::X));
    assert_eq!(Dim::from_axis(2), Some(Dim::Z));
    assert_eq!(Dim::from_axis(3), None);
}

#[test]
fn test_module_text() {
    let mut b = FunctionBuilder::new("k");
    b.set_attr("nvvm.kernel", 1, 1);
    let p = b.param(Type::ptr(Type::F32, 1));
    let tid = b.thread_idx(Dim::X);
    let gep = b.gep(p, tid).unwrap();
    let v = b.load(gep).unwrap();
    b.store(v, gep);
    b.barrier();
    b.ret();
    let module = Module {
        globals: vec![Global {
            name: "global_smem".into(),
            ty: Type::array(0, Type::Int(8)),
            space: 3,
            linkage: Linkage::Internal,
        }],
        functions: vec![b.finish()],
    };
    insta::assert_snapshot!(module.to_string(), @r"
    global internal @global_smem : array<0 x i8>, addrspace 3

    func @k(%0: ptr<f32, 1>) attributes {nvvm.kernel = 1 : i1} {
    ^bb0:
      %1 = thread_id.x : i32
      %2 = getelementptr %0[%1] : ptr<f32, 1>
      %3 = load %2 : f32
      store %3, %2 : f32
      barrier
      ret
    }
    ");
}

#[test]
fn test_count_and_terminators() {
    let mut b = FunctionBuilder::new("k");
    b.barrier();
    b.barrier();
    b.ret();
    let f = b.finish();
    assert_eq!(f.count(|i| matches!(i, Inst::Barrier)), 2);
    assert!(f.blocks[0].insts[2].inst.is_terminator());
    assert_eq!(f.insts().count(), 3);
}
