//! Verification types and explicit frame snapshots.
use std::fmt;

use smol_str::SmolStr;

use crate::InstId;

/// Category of a single local slot or operand stack entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum VType {
    Top,
    Int,
    Float,
    Long,
    Double,
    Null,
    UninitializedThis,
    /// Internal class name or array descriptor.
    Object(SmolStr),
    /// Result of the `new` instruction identified by the id, before its
    /// constructor runs.
    Uninitialized(InstId),
}

impl VType {
    pub fn object(name: &str) -> Self {
        Self::Object(name.into())
    }

    pub fn size(&self) -> u16 {
        match self {
            Self::Long | Self::Double => 2,
            _ => 1,
        }
    }

    pub fn is_wide(&self) -> bool {
        self.size() == 2
    }

    pub fn is_reference(&self) -> bool {
        matches!(
            self,
            Self::Null | Self::UninitializedThis | Self::Object(_) | Self::Uninitialized(_)
        )
    }

    /// Returns `true` if a value of category `self` may be used where `expected`
    /// is required. Class hierarchy is not modelled: any initialized reference
    /// fits any reference type.
    pub fn is_assignable_to(&self, expected: &VType) -> bool {
        if self == expected || *expected == VType::Top {
            return true;
        }

        match (self, expected) {
            (Self::Null, Self::Object(_)) => true,
            (Self::Object(_), Self::Object(_)) => true,
            _ => false,
        }
    }
}

impl fmt::Display for VType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Top => "top".fmt(f),
            Self::Int => "int".fmt(f),
            Self::Float => "float".fmt(f),
            Self::Long => "long".fmt(f),
            Self::Double => "double".fmt(f),
            Self::Null => "null".fmt(f),
            Self::UninitializedThis => "uninit_this".fmt(f),
            Self::Object(name) => name.fmt(f),
            Self::Uninitialized(inst) => write!(f, "uninit({inst})"),
        }
    }
}

/// An explicit frame as carried in the instruction stream.
///
/// Locals are stored collapsed: a `long` or `double` is a single entry.
/// Compact variants are relative to the locals of the previous frame in
/// stream order (or the method entry state for the first frame).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Full {
        locals: Vec<VType>,
        stack: Vec<VType>,
    },
    Same,
    Same1(VType),
    Append(Vec<VType>),
    Chop(u8),
}

impl Frame {
    pub fn is_full(&self) -> bool {
        matches!(self, Self::Full { .. })
    }

    pub fn full(locals: Vec<VType>, stack: Vec<VType>) -> Self {
        Self::Full { locals, stack }
    }

    /// Calls `f` for every verification type this frame mentions.
    pub fn for_each_vtype(&self, mut f: impl FnMut(&VType)) {
        match self {
            Self::Full { locals, stack } => locals.iter().chain(stack.iter()).for_each(f),
            Self::Same1(ty) => f(ty),
            Self::Append(locals) => locals.iter().for_each(f),
            Self::Same | Self::Chop(_) => {}
        }
    }

    pub fn for_each_vtype_mut(&mut self, mut f: impl FnMut(&mut VType)) {
        match self {
            Self::Full { locals, stack } => {
                locals.iter_mut().chain(stack.iter_mut()).for_each(f)
            }
            Self::Same1(ty) => f(ty),
            Self::Append(locals) => locals.iter_mut().for_each(f),
            Self::Same | Self::Chop(_) => {}
        }
    }
}

/// Expands collapsed locals into one entry per slot, with `Top` in the upper
/// half of each wide value.
pub fn expand_locals(collapsed: &[VType]) -> Vec<VType> {
    let mut expanded = Vec::with_capacity(collapsed.len());
    for ty in collapsed {
        let wide = ty.is_wide();
        expanded.push(ty.clone());
        if wide {
            expanded.push(VType::Top);
        }
    }
    expanded
}

/// Inverse of [`expand_locals`]. Trailing `Top` entries are dropped.
pub fn collapse_locals(expanded: &[VType]) -> Vec<VType> {
    let mut collapsed = Vec::with_capacity(expanded.len());
    let mut i = 0;
    while i < expanded.len() {
        let ty = &expanded[i];
        collapsed.push(ty.clone());
        i += ty.size() as usize;
    }

    while collapsed.last() == Some(&VType::Top) {
        collapsed.pop();
    }
    collapsed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collapse_expand() {
        let collapsed = vec![VType::Int, VType::Long, VType::object("java/lang/String")];
        let expanded = expand_locals(&collapsed);
        assert_eq!(
            expanded,
            vec![
                VType::Int,
                VType::Long,
                VType::Top,
                VType::object("java/lang/String")
            ]
        );
        assert_eq!(collapse_locals(&expanded), collapsed);
    }

    #[test]
    fn collapse_drops_trailing_top() {
        let expanded = vec![VType::Int, VType::Top, VType::Double, VType::Top, VType::Top];
        assert_eq!(
            collapse_locals(&expanded),
            vec![VType::Int, VType::Top, VType::Double]
        );
    }

    #[test]
    fn null_fits_references_only() {
        assert!(VType::Null.is_assignable_to(&VType::object("java/lang/String")));
        assert!(!VType::Null.is_assignable_to(&VType::Int));
        assert!(VType::object("[I").is_assignable_to(&VType::object("java/lang/Object")));
        assert!(!VType::Uninitialized(InstId::from_u32(0))
            .is_assignable_to(&VType::object("java/lang/Object")));
    }
}
