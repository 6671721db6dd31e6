//! Field and method descriptors.
use std::{fmt, str::FromStr};

use smallvec::SmallVec;
use smol_str::SmolStr;

use crate::{frame::VType, inst::ValueKind};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    Void,
    Boolean,
    Byte,
    Char,
    Short,
    Int,
    Float,
    Long,
    Double,
    /// Internal class name, e.g. `java/lang/String`.
    Object(SmolStr),
    Array(Box<Type>),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DescriptorError {
    #[error("unexpected end of descriptor `{0}`")]
    UnexpectedEnd(String),
    #[error("invalid descriptor `{desc}` at offset {offset}")]
    Invalid { desc: String, offset: usize },
    #[error("`void` is only allowed as a method return type in `{0}`")]
    MisplacedVoid(String),
}

impl Type {
    pub fn object(name: &str) -> Self {
        Self::Object(name.into())
    }

    /// Parses a single field type (or `V`) starting at `offset`, returning the
    /// type and the offset just past it.
    pub fn parse_at(desc: &str, offset: usize) -> Result<(Self, usize), DescriptorError> {
        let bytes = desc.as_bytes();
        let Some(&c) = bytes.get(offset) else {
            return Err(DescriptorError::UnexpectedEnd(desc.to_string()));
        };

        let ty = match c {
            b'V' => Self::Void,
            b'Z' => Self::Boolean,
            b'B' => Self::Byte,
            b'C' => Self::Char,
            b'S' => Self::Short,
            b'I' => Self::Int,
            b'F' => Self::Float,
            b'J' => Self::Long,
            b'D' => Self::Double,
            b'L' => {
                let Some(end) = desc[offset..].find(';') else {
                    return Err(DescriptorError::UnexpectedEnd(desc.to_string()));
                };
                let name = &desc[offset + 1..offset + end];
                if name.is_empty() {
                    return Err(DescriptorError::Invalid {
                        desc: desc.to_string(),
                        offset,
                    });
                }
                return Ok((Self::Object(name.into()), offset + end + 1));
            }
            b'[' => {
                let (elem, next) = Self::parse_at(desc, offset + 1)?;
                if elem == Self::Void {
                    return Err(DescriptorError::MisplacedVoid(desc.to_string()));
                }
                return Ok((Self::Array(Box::new(elem)), next));
            }
            _ => {
                return Err(DescriptorError::Invalid {
                    desc: desc.to_string(),
                    offset,
                })
            }
        };

        Ok((ty, offset + 1))
    }

    /// Parses a class reference as used by `new`, `checkcast` and
    /// `instanceof`: either an internal name or an array descriptor.
    pub fn from_class_ref(name: &str) -> Result<Self, DescriptorError> {
        if name.starts_with('[') {
            name.parse()
        } else {
            Ok(Self::Object(name.into()))
        }
    }

    /// The name `checkcast` and friends use for this type.
    pub fn class_ref(&self) -> SmolStr {
        match self {
            Self::Object(name) => name.clone(),
            _ => self.to_string().into(),
        }
    }

    /// Number of local/stack words this type occupies.
    pub fn size(&self) -> u16 {
        match self {
            Self::Void => 0,
            Self::Long | Self::Double => 2,
            _ => 1,
        }
    }

    pub fn is_void(&self) -> bool {
        matches!(self, Self::Void)
    }

    pub fn is_reference(&self) -> bool {
        matches!(self, Self::Object(_) | Self::Array(_))
    }

    /// The computational kind used by load/store/return instructions.
    pub fn value_kind(&self) -> Option<ValueKind> {
        match self {
            Self::Void => None,
            Self::Boolean | Self::Byte | Self::Char | Self::Short | Self::Int => {
                Some(ValueKind::Int)
            }
            Self::Float => Some(ValueKind::Float),
            Self::Long => Some(ValueKind::Long),
            Self::Double => Some(ValueKind::Double),
            Self::Object(_) | Self::Array(_) => Some(ValueKind::Ref),
        }
    }

    /// The verification type of a value of this type.
    pub fn vtype(&self) -> Option<VType> {
        match self {
            Self::Void => None,
            Self::Boolean | Self::Byte | Self::Char | Self::Short | Self::Int => Some(VType::Int),
            Self::Float => Some(VType::Float),
            Self::Long => Some(VType::Long),
            Self::Double => Some(VType::Double),
            Self::Object(name) => Some(VType::Object(name.clone())),
            Self::Array(_) => Some(VType::Object(self.to_string().into())),
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Void => "V".fmt(f),
            Self::Boolean => "Z".fmt(f),
            Self::Byte => "B".fmt(f),
            Self::Char => "C".fmt(f),
            Self::Short => "S".fmt(f),
            Self::Int => "I".fmt(f),
            Self::Float => "F".fmt(f),
            Self::Long => "J".fmt(f),
            Self::Double => "D".fmt(f),
            Self::Object(name) => write!(f, "L{name};"),
            Self::Array(elem) => write!(f, "[{elem}"),
        }
    }
}

impl FromStr for Type {
    type Err = DescriptorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (ty, end) = Self::parse_at(s, 0)?;
        if end != s.len() {
            return Err(DescriptorError::Invalid {
                desc: s.to_string(),
                offset: end,
            });
        }
        Ok(ty)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodDescriptor {
    pub params: SmallVec<[Type; 4]>,
    pub ret: Type,
}

impl MethodDescriptor {
    pub fn new(params: &[Type], ret: Type) -> Self {
        Self {
            params: params.into(),
            ret,
        }
    }

    /// Total words taken by the parameters, excluding any receiver.
    pub fn param_words(&self) -> u16 {
        self.params.iter().map(Type::size).sum()
    }
}

impl fmt::Display for MethodDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        "(".fmt(f)?;
        for param in &self.params {
            param.fmt(f)?;
        }
        write!(f, "){}", self.ret)
    }
}

impl FromStr for MethodDescriptor {
    type Err = DescriptorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if !s.starts_with('(') {
            return Err(DescriptorError::Invalid {
                desc: s.to_string(),
                offset: 0,
            });
        }

        let mut params = SmallVec::new();
        let mut offset = 1;
        loop {
            match s.as_bytes().get(offset) {
                Some(b')') => break,
                Some(_) => {
                    let (ty, next) = Type::parse_at(s, offset)?;
                    if ty == Type::Void {
                        return Err(DescriptorError::MisplacedVoid(s.to_string()));
                    }
                    params.push(ty);
                    offset = next;
                }
                None => return Err(DescriptorError::UnexpectedEnd(s.to_string())),
            }
        }

        let (ret, end) = Type::parse_at(s, offset + 1)?;
        if end != s.len() {
            return Err(DescriptorError::Invalid {
                desc: s.to_string(),
                offset: end,
            });
        }

        Ok(Self { params, ret })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_descriptor() {
        let desc: MethodDescriptor = "(IJ[Ljava/lang/String;)Ljava/lang/Object;".parse().unwrap();
        assert_eq!(
            desc.params.as_slice(),
            &[
                Type::Int,
                Type::Long,
                Type::Array(Box::new(Type::object("java/lang/String")))
            ]
        );
        assert_eq!(desc.ret, Type::object("java/lang/Object"));
        assert_eq!(desc.param_words(), 4);
        assert_eq!(desc.to_string(), "(IJ[Ljava/lang/String;)Ljava/lang/Object;");
    }

    #[test]
    fn rejects_void_param() {
        assert!(matches!(
            "(V)V".parse::<MethodDescriptor>(),
            Err(DescriptorError::MisplacedVoid(_))
        ));
        assert!("(I".parse::<MethodDescriptor>().is_err());
        assert!("Ljava/lang/String".parse::<Type>().is_err());
    }

    #[test]
    fn array_vtype_uses_descriptor() {
        let ty: Type = "[I".parse().unwrap();
        assert_eq!(ty.vtype(), Some(VType::object("[I")));
        assert_eq!(ty.class_ref(), "[I");
        assert_eq!(Type::from_class_ref("[I").unwrap(), ty);
    }
}
