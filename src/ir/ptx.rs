//! Inline PTX assembly builder.
//!
//! Operands are numbered `$0, $1, ...` in creation order; that order is
//! also the order of the constraint string and of the inline-asm operand
//! list. Output operands (`=r`, ...) carry no value.
//!
//! ```text
//!   @$3 ld.global.v2.b32 { $0, $1 }, [ $2 + 0 ];
//!   @!$3 mov.u32 $0, $4;
//! ```

use super::Value;

/// Register constraint letter for a value of `bits` width.
pub fn constraint_for_width(bits: u32) -> &'static str {
    match bits {
        64 => "l",
        32 => "r",
        16 => "h",
        _ => "c",
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Arg {
    value: Option<Value>,
    constraint: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Reg(usize),
    List(Vec<usize>),
    Addr { arg: usize, offset: i64 },
    Imm(i64),
}

impl Operand {
    /// The `i`-th register of a list operand, or the register itself.
    pub fn get(&self, i: usize) -> Option<Operand> {
        match self {
            Operand::List(regs) => regs.get(i).map(|&r| Operand::Reg(r)),
            Operand::Reg(r) if i == 0 => Some(Operand::Reg(*r)),
            _ => None,
        }
    }

    fn dump(&self) -> String {
        match self {
            Operand::Reg(i) => format!("${}", i),
            Operand::List(regs) if regs.len() == 1 => format!("${}", regs[0]),
            Operand::List(regs) => {
                let items: Vec<String> = regs.iter().map(|r| format!("${}", r)).collect();
                format!("{{ {} }}", items.join(", "))
            }
            Operand::Addr { arg, offset } => format!("[ ${} + {} ]", arg, offset),
            Operand::Imm(v) => v.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PtxInstr {
    opcode: String,
    operands: Vec<Operand>,
    predicate: Option<(usize, bool)>,
}

impl PtxInstr {
    /// Append `.name` to the opcode when `enabled`.
    pub fn modifier(&mut self, name: &str, enabled: bool) -> &mut Self {
        if enabled {
            self.opcode.push('.');
            self.opcode.push_str(name);
        }
        self
    }

    /// `.vN`, omitted for a single word.
    pub fn vector(&mut self, n: u32) -> &mut Self {
        self.modifier(&format!("v{}", n), n > 1)
    }

    /// `.bW` untyped bit width.
    pub fn bits(&mut self, width: u32) -> &mut Self {
        self.modifier(&format!("b{}", width), true)
    }

    pub fn operands(&mut self, ops: impl IntoIterator<Item = Operand>) -> &mut Self {
        self.operands.extend(ops);
        self
    }

    /// Execute only when the predicate register is true.
    pub fn predicate(&mut self, pred: &Operand) -> &mut Self {
        if let Operand::Reg(p) = pred {
            self.predicate = Some((*p, false));
        }
        self
    }

    /// Execute only when the predicate register is false.
    pub fn predicate_not(&mut self, pred: &Operand) -> &mut Self {
        if let Operand::Reg(p) = pred {
            self.predicate = Some((*p, true));
        }
        self
    }

    fn dump(&self) -> String {
        let mut out = String::new();
        if let Some((p, negated)) = self.predicate {
            out.push_str(if negated { "@!$" } else { "@$" });
            out.push_str(&p.to_string());
            out.push(' ');
        }
        out.push_str(&self.opcode);
        if !self.operands.is_empty() {
            let ops: Vec<String> = self.operands.iter().map(Operand::dump).collect();
            out.push(' ');
            out.push_str(&ops.join(", "));
        }
        out.push(';');
        out
    }
}

#[derive(Debug, Clone, Default)]
pub struct PtxBuilder {
    args: Vec<Arg>,
    instrs: Vec<PtxInstr>,
}

impl PtxBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn push_arg(&mut self, value: Option<Value>, constraint: &str) -> usize {
        self.args.push(Arg {
            value,
            constraint: constraint.to_string(),
        });
        self.args.len() - 1
    }

    /// Output register; the constraint includes the leading `=`.
    pub fn output(&mut self, constraint: &str) -> Operand {
        Operand::Reg(self.push_arg(None, constraint))
    }

    pub fn input(&mut self, value: Value, constraint: &str) -> Operand {
        Operand::Reg(self.push_arg(Some(value), constraint))
    }

    pub fn address(&mut self, value: Value, constraint: &str, offset: i64) -> Operand {
        Operand::Addr {
            arg: self.push_arg(Some(value), constraint),
            offset,
        }
    }

    /// Group registers into one `{ ... }` operand.
    pub fn list(ops: &[Operand]) -> Operand {
        Operand::List(
            ops.iter()
                .flat_map(|op| match op {
                    Operand::Reg(r) => vec![*r],
                    Operand::List(regs) => regs.clone(),
                    Operand::Addr { arg, .. } => vec![*arg],
                    Operand::Imm(_) => Vec::new(),
                })
                .collect(),
        )
    }

    pub fn constant(value: i64) -> Operand {
        Operand::Imm(value)
    }

    pub fn instr(&mut self, opcode: &str) -> &mut PtxInstr {
        self.instrs.push(PtxInstr {
            opcode: opcode.to_string(),
            operands: Vec::new(),
            predicate: None,
        });
        let last = self.instrs.len() - 1;
        &mut self.instrs[last]
    }

    /// Assembly text, one instruction per line.
    pub fn dump(&self) -> String {
        let lines: Vec<String> = self.instrs.iter().map(PtxInstr::dump).collect();
        lines.join("\n\t")
    }

    pub fn constraints(&self) -> String {
        let all: Vec<&str> = self.args.iter().map(|a| a.constraint.as_str()).collect();
        all.join(",")
    }

    /// Values bound to input operands, in operand order.
    pub fn inputs(&self) -> Vec<Value> {
        self.args.iter().filter_map(|a| a.value).collect()
    }
}
