use super::{Kernel, KernelArg, OpKind, Operation, Type, ValueId};

/// Programmatic construction of kernels.
pub struct KernelBuilder {
    name: String,
    args: Vec<KernelArg>,
    body: Vec<Operation>,
    next_value: u32,
}

impl KernelBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: Vec::new(),
            body: Vec::new(),
            next_value: 0,
        }
    }

    fn fresh(&mut self) -> ValueId {
        let id = ValueId(self.next_value);
        self.next_value += 1;
        id
    }

    pub fn arg(&mut self, ty: Type, divisibility: Option<u32>) -> ValueId {
        let id = self.fresh();
        self.args.push(KernelArg {
            id,
            ty,
            divisibility,
        });
        id
    }

    /// Append an op producing a value of type `ty`.
    pub fn op(&mut self, ty: Type, kind: OpKind) -> ValueId {
        let id = self.fresh();
        self.body.push(Operation::new(Some(id), Some(ty), kind));
        id
    }

    /// Append an op without a result.
    pub fn effect(&mut self, kind: OpKind) {
        self.body.push(Operation::new(None, None, kind));
    }

    pub fn finish(self) -> Kernel {
        Kernel {
            name: self.name,
            args: self.args,
            body: self.body,
        }
    }
}
