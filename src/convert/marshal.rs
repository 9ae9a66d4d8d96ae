//! Per-thread element structs.
//!
//! A lowered tensor is one struct value holding the thread's elements in
//! canonical order. Rules unpack operands to scalar lists and pack their
//! results back.

use crate::error::{LowerError, LowerResult};
use crate::ir::builder::FunctionBuilder;
use crate::ir::{Type, Value};

/// Extract `count` fields of the struct `value`, in order.
pub fn unpack(b: &mut FunctionBuilder, value: Value, count: u32) -> LowerResult<Vec<Value>> {
    let arity = match b.value_type(value)? {
        Type::Struct(fields) => fields.len(),
        other => {
            return Err(LowerError::invariant(format!(
                "expected an element struct, found {}",
                other
            )))
        }
    };
    if arity != count as usize {
        return Err(LowerError::invariant(format!(
            "element struct has {} fields, layout implies {}",
            arity, count
        )));
    }
    (0..count).map(|i| b.extract_value(value, i)).collect()
}

/// Build a struct of `values` whose fields all have type `elem`.
pub fn pack(b: &mut FunctionBuilder, values: &[Value], elem: &Type) -> LowerResult<Value> {
    let ty = Type::Struct(vec![elem.clone(); values.len()]);
    let mut aggregate = b.undef(ty);
    for (i, &v) in values.iter().enumerate() {
        aggregate = b.insert_value(aggregate, v, i as u32)?;
    }
    Ok(aggregate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Inst;

    #[test]
    fn test_pack_then_unpack_yields_inputs_in_order() {
        let mut b = FunctionBuilder::new("f");
        let xs: Vec<Value> = (0..4).map(|i| b.const_float(Type::F32, f64::from(i))).collect();
        let packed = pack(&mut b, &xs, &Type::F32).unwrap();
        let unpacked = unpack(&mut b, packed, 4).unwrap();
        assert_eq!(unpacked.len(), 4);

        let f = b.finish();
        // every extract reads the field it was inserted at
        for (i, v) in unpacked.iter().enumerate() {
            let extract = f
                .insts()
                .find(|inst| inst.dst() == Some(*v))
                .unwrap();
            assert!(matches!(extract, Inst::ExtractValue { index, .. } if *index == i as u32));
        }
        assert_eq!(f.count(|i| matches!(i, Inst::InsertValue { .. })), 4);
    }

    #[test]
    fn test_unpack_arity_mismatch_is_invariant() {
        let mut b = FunctionBuilder::new("f");
        let s = b.undef(Type::Struct(vec![Type::F32; 3]));
        let err = unpack(&mut b, s, 4).unwrap_err();
        assert!(!err.is_recoverable());
        let scalar = b.index(0);
        assert!(unpack(&mut b, scalar, 1).is_err());
    }
}
