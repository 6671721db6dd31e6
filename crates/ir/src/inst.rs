//! Instruction set of a method body.
//!
//! Instructions are stored in the body's arena and addressed by [`InstId`].
//! Jumps, exception ranges and local variable entries refer to [`InstData::Label`]
//! instructions by id, so editing the stream never invalidates a reference.
use std::fmt;

use cranelift_entity::entity_impl;
use smallvec::SmallVec;
use smol_str::SmolStr;

use crate::{frame::Frame, types::MethodDescriptor, Type};

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstId(pub u32);
entity_impl!(InstId, "inst");

/// Computational kind of a local or operand, as encoded in the `i`/`l`/`f`/`d`/`a`
/// prefix of load, store and return mnemonics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Int,
    Long,
    Float,
    Double,
    Ref,
}

impl ValueKind {
    pub fn prefix(self) -> char {
        match self {
            Self::Int => 'i',
            Self::Long => 'l',
            Self::Float => 'f',
            Self::Double => 'd',
            Self::Ref => 'a',
        }
    }

    pub fn from_prefix(c: char) -> Option<Self> {
        Some(match c {
            'i' => Self::Int,
            'l' => Self::Long,
            'f' => Self::Float,
            'd' => Self::Double,
            'a' => Self::Ref,
            _ => return None,
        })
    }

    pub fn size(self) -> u16 {
        match self {
            Self::Long | Self::Double => 2,
            _ => 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Const {
    Null,
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    String(SmolStr),
    /// Class literal, holding an internal name or array descriptor.
    Class(SmolStr),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Shl,
    Shr,
    Ushr,
    And,
    Or,
    Xor,
}

impl BinaryOp {
    pub const ALL: [BinaryOp; 11] = [
        Self::Add,
        Self::Sub,
        Self::Mul,
        Self::Div,
        Self::Rem,
        Self::Shl,
        Self::Shr,
        Self::Ushr,
        Self::And,
        Self::Or,
        Self::Xor,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Sub => "sub",
            Self::Mul => "mul",
            Self::Div => "div",
            Self::Rem => "rem",
            Self::Shl => "shl",
            Self::Shr => "shr",
            Self::Ushr => "ushr",
            Self::And => "and",
            Self::Or => "or",
            Self::Xor => "xor",
        }
    }

    pub fn is_shift(self) -> bool {
        matches!(self, Self::Shl | Self::Shr | Self::Ushr)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConvOp {
    I2L,
    I2F,
    I2D,
    L2I,
    L2F,
    L2D,
    F2I,
    F2L,
    F2D,
    D2I,
    D2L,
    D2F,
    I2B,
    I2C,
    I2S,
}

impl ConvOp {
    pub const ALL: [ConvOp; 15] = [
        Self::I2L,
        Self::I2F,
        Self::I2D,
        Self::L2I,
        Self::L2F,
        Self::L2D,
        Self::F2I,
        Self::F2L,
        Self::F2D,
        Self::D2I,
        Self::D2L,
        Self::D2F,
        Self::I2B,
        Self::I2C,
        Self::I2S,
    ];

    pub fn from_to(self) -> (ValueKind, ValueKind) {
        use ValueKind::*;
        match self {
            Self::I2L => (Int, Long),
            Self::I2F => (Int, Float),
            Self::I2D => (Int, Double),
            Self::L2I => (Long, Int),
            Self::L2F => (Long, Float),
            Self::L2D => (Long, Double),
            Self::F2I => (Float, Int),
            Self::F2L => (Float, Long),
            Self::F2D => (Float, Double),
            Self::D2I => (Double, Int),
            Self::D2L => (Double, Long),
            Self::D2F => (Double, Float),
            Self::I2B | Self::I2C | Self::I2S => (Int, Int),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::I2L => "i2l",
            Self::I2F => "i2f",
            Self::I2D => "i2d",
            Self::L2I => "l2i",
            Self::L2F => "l2f",
            Self::L2D => "l2d",
            Self::F2I => "f2i",
            Self::F2L => "f2l",
            Self::F2D => "f2d",
            Self::D2I => "d2i",
            Self::D2L => "d2l",
            Self::D2F => "d2f",
            Self::I2B => "i2b",
            Self::I2C => "i2c",
            Self::I2S => "i2s",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareOp {
    Lcmp,
    Fcmpl,
    Fcmpg,
    Dcmpl,
    Dcmpg,
}

impl CompareOp {
    pub fn operand_kind(self) -> ValueKind {
        match self {
            Self::Lcmp => ValueKind::Long,
            Self::Fcmpl | Self::Fcmpg => ValueKind::Float,
            Self::Dcmpl | Self::Dcmpg => ValueKind::Double,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Lcmp => "lcmp",
            Self::Fcmpl => "fcmpl",
            Self::Fcmpg => "fcmpg",
            Self::Dcmpl => "dcmpl",
            Self::Dcmpg => "dcmpg",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StackOp {
    Pop,
    Pop2,
    Dup,
    DupX1,
    DupX2,
    Dup2,
    Dup2X1,
    Dup2X2,
    Swap,
}

impl StackOp {
    pub const ALL: [StackOp; 9] = [
        Self::Pop,
        Self::Pop2,
        Self::Dup,
        Self::DupX1,
        Self::DupX2,
        Self::Dup2,
        Self::Dup2X1,
        Self::Dup2X2,
        Self::Swap,
    ];

    /// For the `dup` family, the number of words duplicated and the number of
    /// words the copy is inserted below.
    pub fn dup_shape(self) -> Option<(u16, u16)> {
        match self {
            Self::Dup => Some((1, 0)),
            Self::DupX1 => Some((1, 1)),
            Self::DupX2 => Some((1, 2)),
            Self::Dup2 => Some((2, 0)),
            Self::Dup2X1 => Some((2, 1)),
            Self::Dup2X2 => Some((2, 2)),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pop => "pop",
            Self::Pop2 => "pop2",
            Self::Dup => "dup",
            Self::DupX1 => "dup_x1",
            Self::DupX2 => "dup_x2",
            Self::Dup2 => "dup2",
            Self::Dup2X1 => "dup2_x1",
            Self::Dup2X2 => "dup2_x2",
            Self::Swap => "swap",
        }
    }
}

/// Element kind of array load/store instructions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArrayKind {
    Int,
    Long,
    Float,
    Double,
    Ref,
    /// `byte` and `boolean` arrays.
    Byte,
    Char,
    Short,
}

impl ArrayKind {
    pub const ALL: [ArrayKind; 8] = [
        Self::Int,
        Self::Long,
        Self::Float,
        Self::Double,
        Self::Ref,
        Self::Byte,
        Self::Char,
        Self::Short,
    ];

    pub fn prefix(self) -> char {
        match self {
            Self::Int => 'i',
            Self::Long => 'l',
            Self::Float => 'f',
            Self::Double => 'd',
            Self::Ref => 'a',
            Self::Byte => 'b',
            Self::Char => 'c',
            Self::Short => 's',
        }
    }

    pub fn value_kind(self) -> ValueKind {
        match self {
            Self::Long => ValueKind::Long,
            Self::Float => ValueKind::Float,
            Self::Double => ValueKind::Double,
            Self::Ref => ValueKind::Ref,
            Self::Int | Self::Byte | Self::Char | Self::Short => ValueKind::Int,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldOp {
    GetStatic,
    PutStatic,
    GetField,
    PutField,
}

impl FieldOp {
    pub fn is_static(self) -> bool {
        matches!(self, Self::GetStatic | Self::PutStatic)
    }

    pub fn is_read(self) -> bool {
        matches!(self, Self::GetStatic | Self::GetField)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::GetStatic => "getstatic",
            Self::PutStatic => "putstatic",
            Self::GetField => "getfield",
            Self::PutField => "putfield",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InvokeKind {
    Static,
    Virtual,
    Special,
    Interface,
}

impl InvokeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Static => "invokestatic",
            Self::Virtual => "invokevirtual",
            Self::Special => "invokespecial",
            Self::Interface => "invokeinterface",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JumpCond {
    Always,
    /// Compare the int on top of the stack against zero.
    Zero(CmpKind),
    /// Compare the two ints on top of the stack.
    ICmp(CmpKind),
    ACmpEq,
    ACmpNe,
    Null,
    NonNull,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CmpKind {
    Eq,
    Ne,
    Lt,
    Ge,
    Gt,
    Le,
}

impl CmpKind {
    pub const ALL: [CmpKind; 6] = [
        Self::Eq,
        Self::Ne,
        Self::Lt,
        Self::Ge,
        Self::Gt,
        Self::Le,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Eq => "eq",
            Self::Ne => "ne",
            Self::Lt => "lt",
            Self::Ge => "ge",
            Self::Gt => "gt",
            Self::Le => "le",
        }
    }

    pub fn eval<T: PartialOrd>(self, lhs: T, rhs: T) -> bool {
        match self {
            Self::Eq => lhs == rhs,
            Self::Ne => lhs != rhs,
            Self::Lt => lhs < rhs,
            Self::Ge => lhs >= rhs,
            Self::Gt => lhs > rhs,
            Self::Le => lhs <= rhs,
        }
    }
}

impl JumpCond {
    /// Number of operand stack entries consumed by the jump.
    pub fn operands(self) -> usize {
        match self {
            Self::Always => 0,
            Self::Zero(_) | Self::Null | Self::NonNull => 1,
            Self::ICmp(_) | Self::ACmpEq | Self::ACmpNe => 2,
        }
    }

    pub fn mnemonic(self) -> String {
        match self {
            Self::Always => "goto".into(),
            Self::Zero(cmp) => format!("if{}", cmp.as_str()),
            Self::ICmp(cmp) => format!("if_icmp{}", cmp.as_str()),
            Self::ACmpEq => "if_acmpeq".into(),
            Self::ACmpNe => "if_acmpne".into(),
            Self::Null => "ifnull".into(),
            Self::NonNull => "ifnonnull".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum InstData {
    Nop,
    Const(Const),
    Load {
        kind: ValueKind,
        slot: u16,
    },
    Store {
        kind: ValueKind,
        slot: u16,
    },
    Iinc {
        slot: u16,
        delta: i16,
    },
    Binary {
        op: BinaryOp,
        kind: ValueKind,
    },
    Neg(ValueKind),
    Convert(ConvOp),
    Compare(CompareOp),
    Stack(StackOp),
    ArrayLoad(ArrayKind),
    ArrayStore(ArrayKind),
    ArrayLength,
    /// Creates a one-dimensional array of the element type.
    NewArray(Type),
    Field {
        op: FieldOp,
        owner: SmolStr,
        name: SmolStr,
        ty: Type,
    },
    Invoke {
        kind: InvokeKind,
        owner: SmolStr,
        name: SmolStr,
        desc: MethodDescriptor,
    },
    New(SmolStr),
    CheckCast(Type),
    InstanceOf(Type),
    Jump {
        cond: JumpCond,
        dest: InstId,
    },
    /// `lookupswitch`: the int on top of the stack selects a destination.
    Switch {
        cases: SmallVec<[(i32, InstId); 4]>,
        default: InstId,
    },
    Return(Option<ValueKind>),
    Throw,

    /// A position other instructions refer to.
    Label,
    Frame(Frame),
    /// Debug line marker for the following instructions.
    Line(u32),
}

impl InstData {
    pub fn load(kind: ValueKind, slot: u16) -> Self {
        Self::Load { kind, slot }
    }

    pub fn store(kind: ValueKind, slot: u16) -> Self {
        Self::Store { kind, slot }
    }

    pub fn goto(dest: InstId) -> Self {
        Self::Jump {
            cond: JumpCond::Always,
            dest,
        }
    }

    pub fn invoke(kind: InvokeKind, owner: &str, name: &str, desc: MethodDescriptor) -> Self {
        Self::Invoke {
            kind,
            owner: owner.into(),
            name: name.into(),
            desc,
        }
    }

    /// Labels, frames and line markers, which have no runtime effect.
    pub fn is_pseudo(&self) -> bool {
        matches!(self, Self::Label | Self::Frame(_) | Self::Line(_))
    }

    pub fn is_label(&self) -> bool {
        matches!(self, Self::Label)
    }

    pub fn is_return(&self) -> bool {
        matches!(self, Self::Return(_))
    }

    /// Instructions after which control never falls through.
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            Self::Return(_)
                | Self::Throw
                | Self::Switch { .. }
                | Self::Jump {
                    cond: JumpCond::Always,
                    ..
                }
        )
    }

    /// Local slot read or written by this instruction, with the number of
    /// words it covers.
    pub fn local_slot(&self) -> Option<(u16, u16)> {
        match self {
            Self::Load { kind, slot } | Self::Store { kind, slot } => Some((*slot, kind.size())),
            Self::Iinc { slot, .. } => Some((*slot, 1)),
            _ => None,
        }
    }

    pub fn set_local_slot(&mut self, new_slot: u16) {
        match self {
            Self::Load { slot, .. } | Self::Store { slot, .. } | Self::Iinc { slot, .. } => {
                *slot = new_slot
            }
            _ => {}
        }
    }

    pub fn branch_targets(&self) -> SmallVec<[InstId; 4]> {
        match self {
            Self::Jump { dest, .. } => smallvec::smallvec![*dest],
            Self::Switch { cases, default } => {
                let mut targets: SmallVec<[InstId; 4]> = cases.iter().map(|(_, t)| *t).collect();
                targets.push(*default);
                targets
            }
            _ => SmallVec::new(),
        }
    }

    /// Rewrites every instruction this one refers to: jump destinations, and
    /// `new` sites named by uninitialized frame entries.
    pub fn map_refs(&mut self, mut f: impl FnMut(InstId) -> InstId) {
        match self {
            Self::Jump { dest, .. } => *dest = f(*dest),
            Self::Switch { cases, default } => {
                for (_, target) in cases.iter_mut() {
                    *target = f(*target);
                }
                *default = f(*default);
            }
            Self::Frame(frame) => frame.for_each_vtype_mut(|ty| {
                if let crate::VType::Uninitialized(inst) = ty {
                    *inst = f(*inst);
                }
            }),
            _ => {}
        }
    }
}

impl fmt::Display for Const {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => "null".fmt(f),
            Self::Int(v) => v.fmt(f),
            Self::Long(v) => write!(f, "{v}L"),
            Self::Float(v) => write!(f, "{v:?}F"),
            Self::Double(v) => write!(f, "{v:?}D"),
            Self::String(s) => write!(f, "{s:?}"),
            Self::Class(name) => write!(f, "class {name}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use cranelift_entity::EntityRef;

    use super::*;

    #[test]
    fn inst_ids_print_with_their_prefix() {
        let inst = InstId::new(7);
        assert_eq!(format!("{inst:?}"), "inst7");
        assert_eq!(inst.to_string(), "inst7");
    }

    #[test]
    fn map_refs_rewrites_every_switch_target() {
        let mut data = InstData::Switch {
            cases: smallvec::smallvec![(1, InstId::new(1)), (2, InstId::new(2))],
            default: InstId::new(3),
        };
        data.map_refs(|inst| InstId::new(inst.index() + 10));
        let targets: Vec<_> = data.branch_targets().into_iter().map(|t| t.index()).collect();
        assert_eq!(targets, vec![11, 12, 13]);
    }
}
