use std::fmt;

use serde::{Deserialize, Serialize};

use crate::index::Shape;
use crate::layout::{Layout, LayoutError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScalarType {
    I1,
    I8,
    I16,
    I32,
    I64,
    F16,
    F32,
    F64,
}

impl ScalarType {
    pub fn bit_width(self) -> u32 {
        match self {
            ScalarType::I1 => 1,
            ScalarType::I8 => 8,
            ScalarType::I16 | ScalarType::F16 => 16,
            ScalarType::I32 | ScalarType::F32 => 32,
            ScalarType::I64 | ScalarType::F64 => 64,
        }
    }

    pub fn is_float(self) -> bool {
        matches!(self, ScalarType::F16 | ScalarType::F32 | ScalarType::F64)
    }
}

impl fmt::Display for ScalarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ScalarType::I1 => "i1",
            ScalarType::I8 => "i8",
            ScalarType::I16 => "i16",
            ScalarType::I32 => "i32",
            ScalarType::I64 => "i64",
            ScalarType::F16 => "f16",
            ScalarType::F32 => "f32",
            ScalarType::F64 => "f64",
        };
        write!(f, "{}", name)
    }
}

/// Element type of a tensor, or the type of a scalar value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ElemType {
    Scalar(ScalarType),
    /// Pointer into global memory.
    Ptr { ptr: ScalarType },
}

impl ElemType {
    pub fn is_ptr(self) -> bool {
        matches!(self, ElemType::Ptr { .. })
    }

    pub fn is_int(self) -> bool {
        matches!(self, ElemType::Scalar(s) if !s.is_float())
    }
}

impl fmt::Display for ElemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ElemType::Scalar(s) => write!(f, "{}", s),
            ElemType::Ptr { ptr } => write!(f, "!ptr<{}>", ptr),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "TensorParams")]
pub struct TensorType {
    pub shape: Shape,
    pub elem: ElemType,
    pub layout: Layout,
}

#[derive(Deserialize)]
struct TensorParams {
    shape: Shape,
    elem: ElemType,
    layout: Layout,
}

impl TryFrom<TensorParams> for TensorType {
    type Error = LayoutError;

    fn try_from(p: TensorParams) -> Result<Self, Self::Error> {
        if p.shape.contains(&0) {
            return Err(LayoutError::ZeroExtent("shape"));
        }
        Ok(Self {
            shape: p.shape,
            elem: p.elem,
            layout: p.layout,
        })
    }
}

impl TensorType {
    pub fn new(shape: &[u32], elem: ElemType, layout: Layout) -> Self {
        Self {
            shape: Shape::from_slice(shape),
            elem,
            layout,
        }
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }
}

impl fmt::Display for TensorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tensor<")?;
        for extent in &self.shape {
            write!(f, "{}x", extent)?;
        }
        write!(f, "{}, {}>", self.elem, self.layout)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Type {
    Tensor(TensorType),
    Scalar(ElemType),
}

impl Type {
    pub fn as_tensor(&self) -> Option<&TensorType> {
        match self {
            Type::Tensor(t) => Some(t),
            Type::Scalar(_) => None,
        }
    }

    pub fn elem(&self) -> ElemType {
        match self {
            Type::Tensor(t) => t.elem,
            Type::Scalar(e) => *e,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Tensor(t) => write!(f, "{}", t),
            Type::Scalar(e) => write!(f, "{}", e),
        }
    }
}
