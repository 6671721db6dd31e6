//! The shape a splice takes around its anchor.
use std::fmt;

use smallvec::SmallVec;
use stitch_ir::{
    inst::{FieldOp, InvokeKind},
    InstData, InstId, MethodBody, Type,
};

use crate::SpliceError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SurfaceKind {
    /// Around a method call.
    Invoke,
    /// Around a field read or write.
    FieldAccess,
    /// Around an object creation, from `new` to its constructor call.
    Construct,
    /// Around a return instruction.
    ReturnSite,
    /// The whole handler before the anchor, without a callsite.
    PureInjection,
}

impl SurfaceKind {
    pub fn requires_callsite(self) -> bool {
        !matches!(self, Self::PureInjection)
    }

    /// Number of code blocks the handler is partitioned into.
    pub fn block_count(self) -> usize {
        match self {
            Self::PureInjection => 1,
            Self::Construct => 3,
            _ => 2,
        }
    }
}

impl fmt::Display for SurfaceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Invoke => "invoke",
            Self::FieldAccess => "field access",
            Self::Construct => "construct",
            Self::ReturnSite => "return site",
            Self::PureInjection => "pure injection",
        };
        s.fmt(f)
    }
}

/// The values a handler receives at its anchor and the value it produces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Surface {
    pub kind: SurfaceKind,
    pub anchor: InstId,
    /// The last instruction the anchor covers; the constructor call for
    /// [`SurfaceKind::Construct`], the anchor itself otherwise.
    pub anchor_end: InstId,
    pub args: SmallVec<[Type; 4]>,
    pub ret: Type,
}

impl Surface {
    pub fn resolve(
        target: &MethodBody,
        kind: SurfaceKind,
        anchor: InstId,
        anchor_end: Option<InstId>,
    ) -> Result<Self, SpliceError> {
        if !target.layout.is_inst_inserted(anchor) {
            return Err(SpliceError::validation(format!(
                "anchor {anchor} is not part of the target body"
            )));
        }

        let mut args = SmallVec::new();
        let mut anchor_end_inst = anchor;
        let ret = match (kind, target.inst(anchor)) {
            (SurfaceKind::PureInjection, _) => Type::Void,

            (
                SurfaceKind::Invoke,
                InstData::Invoke {
                    kind: call,
                    owner,
                    name,
                    desc,
                },
            ) => {
                if name == "<init>" {
                    return Err(SpliceError::validation(
                        "constructor calls are spliced with the construct surface",
                    ));
                }
                if *call != InvokeKind::Static {
                    args.push(Type::Object(owner.clone()));
                }
                args.extend(desc.params.iter().cloned());
                desc.ret.clone()
            }

            (SurfaceKind::FieldAccess, InstData::Field { op, owner, ty, .. }) => {
                let owner = Type::Object(owner.clone());
                match op {
                    FieldOp::GetField => {
                        args.push(owner);
                        ty.clone()
                    }
                    FieldOp::GetStatic => ty.clone(),
                    FieldOp::PutField => {
                        args.push(owner);
                        args.push(ty.clone());
                        Type::Void
                    }
                    FieldOp::PutStatic => {
                        args.push(ty.clone());
                        Type::Void
                    }
                }
            }

            (SurfaceKind::Construct, InstData::New(class)) => {
                let init = match anchor_end {
                    Some(init) => init,
                    None => find_init(target, anchor, class)?,
                };
                let InstData::Invoke {
                    kind: InvokeKind::Special,
                    name,
                    desc,
                    ..
                } = target.inst(init)
                else {
                    return Err(SpliceError::validation(format!(
                        "anchor end {init} is not a constructor call"
                    )));
                };
                if name != "<init>" {
                    return Err(SpliceError::validation(format!(
                        "anchor end {init} is not a constructor call"
                    )));
                }
                anchor_end_inst = init;
                args.extend(desc.params.iter().cloned());
                Type::Object(class.clone())
            }

            (SurfaceKind::ReturnSite, InstData::Return(_)) => {
                let ret = &target.sig.desc.ret;
                if !ret.is_void() {
                    args.push(ret.clone());
                }
                Type::Void
            }

            (kind, _) => {
                return Err(SpliceError::validation(format!(
                    "anchor {anchor} does not fit the {kind} surface"
                )))
            }
        };

        Ok(Self {
            kind,
            anchor,
            anchor_end: anchor_end_inst,
            args,
            ret,
        })
    }

    /// Operand stack words taken by the handler arguments.
    pub fn arg_words(&self) -> u16 {
        self.args.iter().map(Type::size).sum()
    }
}

/// Finds the constructor call completing the `new` at `anchor`, skipping
/// nested object creations in the argument computation.
fn find_init(target: &MethodBody, anchor: InstId, class: &str) -> Result<InstId, SpliceError> {
    let mut depth = 0usize;
    let mut cur = target.layout.next_inst_of(anchor);
    while let Some(inst) = cur {
        match target.inst(inst) {
            InstData::New(_) => depth += 1,
            InstData::Invoke {
                kind: InvokeKind::Special,
                owner,
                name,
                ..
            } if name == "<init>" => {
                if depth == 0 && owner == class {
                    return Ok(inst);
                }
                depth = depth.saturating_sub(1);
            }
            _ => {}
        }
        cur = target.layout.next_inst_of(inst);
    }

    Err(SpliceError::validation(format!(
        "could not locate the constructor call for `new {class}`"
    )))
}

#[cfg(test)]
mod tests {
    use stitch_ir::{inst::ValueKind, MethodDescriptor, MethodSig};

    use super::*;

    fn body() -> MethodBody {
        MethodBody::new(MethodSig::new(
            "demo/A",
            "f",
            MethodDescriptor::new(&[], Type::object("demo/P")),
            true,
        ))
    }

    #[test]
    fn construct_skips_nested_creations() {
        let mut body = body();
        let new = body.append_inst_data(InstData::New("demo/P".into()));
        body.append_inst_data(InstData::Stack(stitch_ir::inst::StackOp::Dup));
        body.append_inst_data(InstData::New("demo/Q".into()));
        body.append_inst_data(InstData::Stack(stitch_ir::inst::StackOp::Dup));
        body.append_inst_data(InstData::invoke(
            InvokeKind::Special,
            "demo/Q",
            "<init>",
            MethodDescriptor::new(&[], Type::Void),
        ));
        let init = body.append_inst_data(InstData::invoke(
            InvokeKind::Special,
            "demo/P",
            "<init>",
            MethodDescriptor::new(&[Type::object("demo/Q")], Type::Void),
        ));
        body.append_inst_data(InstData::Return(Some(ValueKind::Ref)));

        let surface = Surface::resolve(&body, SurfaceKind::Construct, new, None).unwrap();
        assert_eq!(surface.anchor_end, init);
        assert_eq!(surface.args.as_slice(), &[Type::object("demo/Q")]);
        assert_eq!(surface.ret, Type::object("demo/P"));
    }

    #[test]
    fn field_surfaces() {
        let mut body = body();
        let put = body.append_inst_data(InstData::Field {
            op: FieldOp::PutField,
            owner: "demo/P".into(),
            name: "x".into(),
            ty: Type::Long,
        });
        body.append_inst_data(InstData::Return(None));

        let surface = Surface::resolve(&body, SurfaceKind::FieldAccess, put, None).unwrap();
        assert_eq!(surface.args.as_slice(), &[Type::object("demo/P"), Type::Long]);
        assert_eq!(surface.ret, Type::Void);
        assert_eq!(surface.arg_words(), 3);

        let err = Surface::resolve(&body, SurfaceKind::Invoke, put, None).unwrap_err();
        assert!(err.message().contains("does not fit the invoke surface"));
    }
}
