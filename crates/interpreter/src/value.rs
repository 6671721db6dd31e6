use std::fmt;

use cranelift_entity::entity_impl;
use stitch_ir::Type;

/// Handle to an object on the machine heap.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjRef(pub u32);
entity_impl!(ObjRef, "obj");

/// A value held in a local slot or on the operand stack. Wide values take a
/// single entry on the stack and two slots in the locals, the upper one
/// `Undefined`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum EvalValue {
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    /// `None` is the null reference.
    Ref(Option<ObjRef>),
    #[default]
    Undefined,
}

impl EvalValue {
    pub const NULL: Self = Self::Ref(None);

    /// Zero value of a field or array element of type `ty`.
    pub fn zero_of(ty: &Type) -> Self {
        match ty {
            Type::Long => Self::Long(0),
            Type::Float => Self::Float(0.0),
            Type::Double => Self::Double(0.0),
            Type::Object(_) | Type::Array(_) => Self::NULL,
            _ => Self::Int(0),
        }
    }

    pub fn is_wide(&self) -> bool {
        matches!(self, Self::Long(_) | Self::Double(_))
    }

    pub fn words(&self) -> u16 {
        if self.is_wide() {
            2
        } else {
            1
        }
    }

    pub fn is_undef(&self) -> bool {
        matches!(self, Self::Undefined)
    }

    pub fn as_int(&self) -> Option<i32> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_long(&self) -> Option<i64> {
        match self {
            Self::Long(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f32> {
        match self {
            Self::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_double(&self) -> Option<f64> {
        match self {
            Self::Double(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_obj(&self) -> Option<Option<ObjRef>> {
        match self {
            Self::Ref(r) => Some(*r),
            _ => None,
        }
    }
}

impl fmt::Display for EvalValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => v.fmt(f),
            Self::Long(v) => write!(f, "{v}L"),
            Self::Float(v) => write!(f, "{v:?}F"),
            Self::Double(v) => write!(f, "{v:?}D"),
            Self::Ref(None) => "null".fmt(f),
            Self::Ref(Some(obj)) => obj.fmt(f),
            Self::Undefined => "undef".fmt(f),
        }
    }
}
