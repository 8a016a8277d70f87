//! Bytecode definitions and the binary artifact writer.
//!
//! Instructions are symbolic while the compiler works on them: branches
//! name [`Label`]s and a `Mark` pseudo-instruction pins a label to a
//! position in the stream. Serialization resolves every label to the
//! index of the instruction following its mark and drops the marks, so
//! the on-disk form has no label table.

use std::io::{self, Write};

/// Magic bytes opening every compiled binary.
pub const MAGIC: &[u8; 4] = b"WHLB";
pub const VERSION: u8 = 1;

/// Branch target, unique within one compilation unit.
pub type Label = u32;

/// Unboxed machine representations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Prim {
    Int,
    Bool,
    Char,
}

/// Heap-level kinds, used by casts and runtime kind tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Boxed {
    Int,
    Bool,
    Char,
    Array,
    Record,
}

/// How a value occupies a stack slot or register. `Ref` is the generic
/// boxed slot used wherever the static type is a union: the concrete
/// kind is only recoverable at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Repr {
    Void,
    Int,
    Bool,
    Char,
    Array,
    Record,
    Ref,
}

impl Repr {
    /// The primitive this repr unboxes to, if any.
    pub fn prim(self) -> Option<Prim> {
        match self {
            Repr::Int => Some(Prim::Int),
            Repr::Bool => Some(Prim::Bool),
            Repr::Char => Some(Prim::Char),
            _ => None,
        }
    }

    /// The heap kind a value of this repr boxes to, if statically known.
    pub fn boxed(self) -> Option<Boxed> {
        match self {
            Repr::Int => Some(Boxed::Int),
            Repr::Bool => Some(Boxed::Bool),
            Repr::Char => Some(Boxed::Char),
            Repr::Array => Some(Boxed::Array),
            Repr::Record => Some(Boxed::Record),
            Repr::Void | Repr::Ref => None,
        }
    }

    pub fn is_container(self) -> bool {
        matches!(self, Repr::Array | Repr::Record | Repr::Ref)
    }

    fn tag(self) -> u8 {
        match self {
            Repr::Void => 0,
            Repr::Int => 1,
            Repr::Bool => 2,
            Repr::Char => 3,
            Repr::Array => 4,
            Repr::Record => 5,
            Repr::Ref => 6,
        }
    }
}

/// Method signature at the representation level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub params: Vec<Repr>,
    pub ret: Repr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Neq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

/// A scalar constant operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Constant {
    Null,
    Bool(bool),
    Int(i32),
    Char(char),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    /// Push a scalar constant.
    Const(Constant),

    Load(u16),
    Store(u16),
    /// Add a constant to a register in place. Used for loop counters.
    Inc(u16, i32),

    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Neg,
    Not,

    /// Pop two scalars, branch if the comparison holds.
    CmpBranch(CmpOp, Label),
    /// Pop a bool, branch if true.
    BranchIfTrue(Label),
    Goto(Label),
    /// Pins a label; removed during serialization.
    Mark(Label),

    /// Pop n values, push an array holding them in push order.
    NewArray(u32),
    ArrayLength,
    /// `... array index -> value`
    ArrayGet,
    /// `... array index value -> ()`
    ArraySet,
    /// `... array value -> array` (append one element).
    ArrayAppend,

    /// Pop one value per named field, in field order.
    NewRecord(Vec<String>),
    RecordGet(String),
    /// `... record value -> ()`
    RecordPut(String),

    /// Deep-copy the container on top of the stack.
    Clone,
    Box(Prim),
    Unbox(Prim),
    /// Assert the boxed value on top has the given kind.
    CheckCast(Boxed),
    /// Pop a boxed value, push whether its kind matches.
    TestKind(Boxed),
    /// Pop two boxed values, push structural equality as bool.
    StructEq,

    Invoke { name: String, signature: Signature },
    Return(Option<Repr>),
    Print(Repr),
    /// Assertion trap.
    Fail,
    Pop,
}

/// One fully generated method.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledMethod {
    pub name: String,
    pub signature: Signature,
    pub register_count: u16,
    pub code: Vec<Instruction>,
}

// ── Serialization ────────────────────────────────────────────────────

pub fn write_binary<W: Write>(out: &mut W, methods: &[CompiledMethod]) -> io::Result<()> {
    out.write_all(MAGIC)?;
    out.write_all(&[VERSION])?;
    out.write_all(&(methods.len() as u32).to_le_bytes())?;
    for method in methods {
        write_method(out, method)?;
    }
    Ok(())
}

fn write_method<W: Write>(out: &mut W, method: &CompiledMethod) -> io::Result<()> {
    write_str(out, &method.name)?;
    write_signature(out, &method.signature)?;
    out.write_all(&method.register_count.to_le_bytes())?;

    // First pass: map each label to the index of the instruction that
    // follows its mark, counting only real instructions.
    let mut targets = std::collections::HashMap::new();
    let mut pc: u32 = 0;
    for insn in &method.code {
        if let Instruction::Mark(label) = insn {
            targets.insert(*label, pc);
        } else {
            pc += 1;
        }
    }

    out.write_all(&pc.to_le_bytes())?;
    for insn in &method.code {
        write_insn(out, insn, &targets)?;
    }
    Ok(())
}

fn write_signature<W: Write>(out: &mut W, sig: &Signature) -> io::Result<()> {
    out.write_all(&[sig.params.len() as u8])?;
    for p in &sig.params {
        out.write_all(&[p.tag()])?;
    }
    out.write_all(&[sig.ret.tag()])
}

fn write_str<W: Write>(out: &mut W, s: &str) -> io::Result<()> {
    out.write_all(&(s.len() as u16).to_le_bytes())?;
    out.write_all(s.as_bytes())
}

fn write_label<W: Write>(
    out: &mut W,
    label: Label,
    targets: &std::collections::HashMap<Label, u32>,
) -> io::Result<()> {
    // A branch to a label with no mark is a generator bug; refuse to
    // write a corrupt target.
    let pc = targets.get(&label).copied().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("branch to unmarked label {}", label),
        )
    })?;
    out.write_all(&pc.to_le_bytes())
}

fn prim_tag(p: Prim) -> u8 {
    match p {
        Prim::Int => 1,
        Prim::Bool => 2,
        Prim::Char => 3,
    }
}

fn boxed_tag(b: Boxed) -> u8 {
    match b {
        Boxed::Int => 1,
        Boxed::Bool => 2,
        Boxed::Char => 3,
        Boxed::Array => 4,
        Boxed::Record => 5,
    }
}

fn cmp_tag(op: CmpOp) -> u8 {
    match op {
        CmpOp::Eq => 0,
        CmpOp::Neq => 1,
        CmpOp::Lt => 2,
        CmpOp::LtEq => 3,
        CmpOp::Gt => 4,
        CmpOp::GtEq => 5,
    }
}

fn write_insn<W: Write>(
    out: &mut W,
    insn: &Instruction,
    targets: &std::collections::HashMap<Label, u32>,
) -> io::Result<()> {
    use Instruction::*;
    match insn {
        Mark(_) => Ok(()),
        Const(c) => {
            out.write_all(&[0x01])?;
            match c {
                Constant::Null => out.write_all(&[0]),
                Constant::Bool(b) => {
                    out.write_all(&[1])?;
                    out.write_all(&[*b as u8])
                }
                Constant::Int(n) => {
                    out.write_all(&[2])?;
                    out.write_all(&n.to_le_bytes())
                }
                Constant::Char(c) => {
                    out.write_all(&[3])?;
                    out.write_all(&(*c as u32).to_le_bytes())
                }
            }
        }
        Load(r) => {
            out.write_all(&[0x02])?;
            out.write_all(&r.to_le_bytes())
        }
        Store(r) => {
            out.write_all(&[0x03])?;
            out.write_all(&r.to_le_bytes())
        }
        Inc(r, d) => {
            out.write_all(&[0x04])?;
            out.write_all(&r.to_le_bytes())?;
            out.write_all(&d.to_le_bytes())
        }
        Add => out.write_all(&[0x05]),
        Sub => out.write_all(&[0x06]),
        Mul => out.write_all(&[0x07]),
        Div => out.write_all(&[0x08]),
        Rem => out.write_all(&[0x09]),
        Neg => out.write_all(&[0x0a]),
        Not => out.write_all(&[0x0b]),
        CmpBranch(op, label) => {
            out.write_all(&[0x0c, cmp_tag(*op)])?;
            write_label(out, *label, targets)
        }
        BranchIfTrue(label) => {
            out.write_all(&[0x0d])?;
            write_label(out, *label, targets)
        }
        Goto(label) => {
            out.write_all(&[0x0e])?;
            write_label(out, *label, targets)
        }
        NewArray(n) => {
            out.write_all(&[0x0f])?;
            out.write_all(&n.to_le_bytes())
        }
        ArrayLength => out.write_all(&[0x10]),
        ArrayGet => out.write_all(&[0x11]),
        ArraySet => out.write_all(&[0x12]),
        ArrayAppend => out.write_all(&[0x13]),
        NewRecord(fields) => {
            out.write_all(&[0x14])?;
            out.write_all(&[fields.len() as u8])?;
            for f in fields {
                write_str(out, f)?;
            }
            Ok(())
        }
        RecordGet(f) => {
            out.write_all(&[0x15])?;
            write_str(out, f)
        }
        RecordPut(f) => {
            out.write_all(&[0x16])?;
            write_str(out, f)
        }
        Clone => out.write_all(&[0x17]),
        Box(p) => out.write_all(&[0x18, prim_tag(*p)]),
        Unbox(p) => out.write_all(&[0x19, prim_tag(*p)]),
        CheckCast(b) => out.write_all(&[0x1a, boxed_tag(*b)]),
        TestKind(b) => out.write_all(&[0x1b, boxed_tag(*b)]),
        StructEq => out.write_all(&[0x1c]),
        Invoke { name, signature } => {
            out.write_all(&[0x1d])?;
            write_str(out, name)?;
            write_signature(out, signature)
        }
        Return(repr) => match repr {
            None => out.write_all(&[0x1e, 0]),
            Some(r) => out.write_all(&[0x1e, 1, r.tag()]),
        },
        Print(r) => out.write_all(&[0x1f, r.tag()]),
        Fail => out.write_all(&[0x20]),
        Pop => out.write_all(&[0x21]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header() {
        let mut out = Vec::new();
        write_binary(&mut out, &[]).unwrap();
        assert_eq!(&out[..4], MAGIC);
        assert_eq!(out[4], VERSION);
        assert_eq!(&out[5..9], &0u32.to_le_bytes());
    }

    #[test]
    fn test_labels_resolve_to_instruction_indices() {
        let method = CompiledMethod {
            name: "f".into(),
            signature: Signature {
                params: vec![],
                ret: Repr::Void,
            },
            register_count: 0,
            code: vec![
                Instruction::Goto(7),
                Instruction::Mark(7),
                Instruction::Return(None),
            ],
        };
        let mut out = Vec::new();
        write_binary(&mut out, &[method]).unwrap();
        // Header (9) + name "f" (2 + 1) + signature (2) + registers (2)
        // + code length (4), then the Goto opcode and its target.
        let code_start = 9 + 3 + 2 + 2 + 4;
        assert_eq!(out[code_start], 0x0e);
        assert_eq!(&out[code_start + 1..code_start + 5], &1u32.to_le_bytes());
    }

    #[test]
    fn test_branch_to_unmarked_label_is_rejected() {
        let method = CompiledMethod {
            name: "f".into(),
            signature: Signature {
                params: vec![],
                ret: Repr::Void,
            },
            register_count: 0,
            code: vec![Instruction::Goto(42), Instruction::Return(None)],
        };
        let mut out = Vec::new();
        let err = write_binary(&mut out, &[method]).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_marks_are_not_serialized() {
        let method = CompiledMethod {
            name: "f".into(),
            signature: Signature {
                params: vec![],
                ret: Repr::Void,
            },
            register_count: 0,
            code: vec![Instruction::Mark(0), Instruction::Return(None)],
        };
        let mut out = Vec::new();
        write_binary(&mut out, &[method]).unwrap();
        let code_len_start = 9 + 3 + 2 + 2;
        assert_eq!(
            &out[code_len_start..code_len_start + 4],
            &1u32.to_le_bytes()
        );
    }
}
