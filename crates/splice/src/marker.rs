//! Recognition and validation of the intrinsic marker calls in handler
//! bodies.
//!
//! A marker is a pair of calls: a static *declare* on the ops owner returning
//! a method handle, and a later `invoke` on that handle. Jump markers are a
//! single static call immediately followed by `athrow`.
use std::fmt;

use indexmap::IndexMap;
use stitch_ir::{inst::InvokeKind, InstData, InstId, MethodBody, Type};

use crate::{config::MarkerVocabulary, SpliceError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JumpKind {
    LoopStart,
    LoopEnd,
    BlockEnd,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MarkerKind {
    Callsite,
    Cancel,
    Blackhole,
    Jump(JumpKind),
}

impl fmt::Display for MarkerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Callsite => "callsite",
            Self::Cancel => "cancel",
            Self::Blackhole => "blackhole",
            Self::Jump(JumpKind::LoopStart) => "jumpToLoopStart",
            Self::Jump(JumpKind::LoopEnd) => "jumpToLoopEnd",
            Self::Jump(JumpKind::BlockEnd) => "jumpToCodeBlockEnd",
        };
        s.fmt(f)
    }
}

/// Role of a single handler instruction in the marker vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MarkerCall {
    Declare(MarkerKind),
    HandleInvoke,
}

impl MarkerVocabulary {
    pub(crate) fn classify(&self, data: &InstData) -> Result<Option<MarkerCall>, String> {
        let InstData::Invoke {
            kind, owner, name, ..
        } = data
        else {
            return Ok(None);
        };

        if *kind == InvokeKind::Static && *owner == self.ops_owner {
            let marker = if *name == self.callsite {
                MarkerKind::Callsite
            } else if *name == self.cancel {
                MarkerKind::Cancel
            } else if *name == self.blackhole {
                MarkerKind::Blackhole
            } else if *name == self.jump_to_loop_start {
                MarkerKind::Jump(JumpKind::LoopStart)
            } else if *name == self.jump_to_loop_end {
                MarkerKind::Jump(JumpKind::LoopEnd)
            } else if *name == self.jump_to_block_end {
                MarkerKind::Jump(JumpKind::BlockEnd)
            } else {
                return Err(format!("unknown marker `{name}`"));
            };
            return Ok(Some(MarkerCall::Declare(marker)));
        }

        if *kind == InvokeKind::Virtual && *owner == self.handle_owner && *name == self.handle_invoke
        {
            return Ok(Some(MarkerCall::HandleInvoke));
        }

        Ok(None)
    }
}

/// Marker positions in a handler body, paired declare to invoke.
#[derive(Debug, Clone, Default)]
pub struct MarkerScan {
    /// The callsite declare and its invoke.
    pub callsite: Option<(InstId, InstId)>,
    pub cancels: IndexMap<InstId, InstId>,
    pub blackholes: IndexMap<InstId, InstId>,
    /// Jump marker call to its kind and the `athrow` following it.
    pub jumps: IndexMap<InstId, (JumpKind, InstId)>,
    /// The handler carries frames or returns before its last instruction.
    pub requires_frame: bool,
}

impl MarkerScan {
    /// Scans `handler` once and validates marker pairing. `target_ret` is the
    /// return type of the method the handler is spliced into; a `cancel`
    /// invoke must pass exactly one value of that type, or none for `void`.
    pub fn scan(
        handler: &MethodBody,
        target_ret: &Type,
        vocab: &MarkerVocabulary,
    ) -> Result<Self, SpliceError> {
        let mut scan = Self::default();
        let last_real = handler.last_real_inst();
        let mut open: Option<(MarkerKind, InstId)> = None;
        let mut suppressing = false;

        let insts: Vec<_> = handler.iter_inst().collect();
        for (index, &inst) in insts.iter().enumerate() {
            let data = handler.inst(inst);
            match data {
                InstData::Frame(_) => scan.requires_frame = true,
                InstData::Return(_) if Some(inst) != last_real => scan.requires_frame = true,
                _ => {}
            }

            if suppressing {
                match data {
                    InstData::Return(_) | InstData::Throw => suppressing = false,
                    InstData::CheckCast(_)
                    | InstData::Label
                    | InstData::Frame(_)
                    | InstData::Line(_) => {}
                    _ => {
                        return Err(SpliceError::at(
                            inst,
                            index,
                            "a return must follow a cancel",
                        ))
                    }
                }
                continue;
            }

            if calls_itself(handler, data) {
                return Err(SpliceError::at(
                    inst,
                    index,
                    format!("handler `{}` calls itself", handler.sig.name),
                ));
            }

            let call = vocab
                .classify(data)
                .map_err(|msg| SpliceError::at(inst, index, msg))?;
            match call {
                Some(MarkerCall::Declare(kind)) => {
                    if let Some((outer, _)) = open {
                        return Err(SpliceError::at(
                            inst,
                            index,
                            format!("`{kind}` marker opened inside an open `{outer}` marker"),
                        ));
                    }

                    match kind {
                        MarkerKind::Jump(jump) => {
                            let throw = next_real(handler, inst)
                                .filter(|next| matches!(handler.inst(*next), InstData::Throw))
                                .ok_or_else(|| {
                                    SpliceError::at(
                                        inst,
                                        index,
                                        format!("`{kind}` marker must be followed by a throw"),
                                    )
                                })?;
                            scan.jumps.insert(inst, (jump, throw));
                        }
                        MarkerKind::Callsite if scan.callsite.is_some() => {
                            return Err(SpliceError::at(
                                inst,
                                index,
                                "handler declares more than one callsite",
                            ));
                        }
                        _ => open = Some((kind, inst)),
                    }
                }

                Some(MarkerCall::HandleInvoke) => {
                    let Some((kind, declare)) = open.take() else {
                        // An ordinary method handle call.
                        continue;
                    };
                    let InstData::Invoke { desc, .. } = data else {
                        continue;
                    };

                    match kind {
                        MarkerKind::Callsite => scan.callsite = Some((declare, inst)),
                        MarkerKind::Cancel => {
                            let expected: &[Type] = if target_ret.is_void() {
                                &[]
                            } else {
                                std::slice::from_ref(target_ret)
                            };
                            if desc.params.as_slice() != expected {
                                let message = if target_ret.is_void() {
                                    format!("`cancel` in a void method takes no value, found {desc}")
                                } else {
                                    format!(
                                        "`cancel` must pass exactly one {target_ret} value, found {desc}"
                                    )
                                };
                                return Err(SpliceError::at(inst, index, message));
                            }
                            scan.cancels.insert(declare, inst);
                            suppressing = true;
                        }
                        MarkerKind::Blackhole => {
                            if !desc.ret.is_void() {
                                return Err(SpliceError::at(
                                    inst,
                                    index,
                                    format!("`blackhole` invoke must not return a value, found {desc}"),
                                ));
                            }
                            scan.blackholes.insert(declare, inst);
                        }
                        MarkerKind::Jump(_) => {
                            return Err(SpliceError::internal("jump markers are never left open"))
                        }
                    }
                }

                None => {}
            }
        }

        if let Some((kind, declare)) = open {
            let index = insts.iter().position(|inst| *inst == declare).unwrap_or(0);
            return Err(SpliceError::at(
                declare,
                index,
                format!("`{kind}` marker is never invoked"),
            ));
        }
        if suppressing {
            return Err(SpliceError::validation("a return must follow a cancel"));
        }

        Ok(scan)
    }

    pub fn declare_kind(&self, inst: InstId) -> Option<MarkerKind> {
        if self.callsite.is_some_and(|(declare, _)| declare == inst) {
            Some(MarkerKind::Callsite)
        } else if self.cancels.contains_key(&inst) {
            Some(MarkerKind::Cancel)
        } else if self.blackholes.contains_key(&inst) {
            Some(MarkerKind::Blackhole)
        } else {
            self.jumps.get(&inst).map(|(jump, _)| MarkerKind::Jump(*jump))
        }
    }

    pub fn callsite_declare(&self) -> Option<InstId> {
        self.callsite.map(|(declare, _)| declare)
    }

    pub fn callsite_invoke(&self) -> Option<InstId> {
        self.callsite.map(|(_, invoke)| invoke)
    }
}

fn calls_itself(handler: &MethodBody, data: &InstData) -> bool {
    let sig = &handler.sig;
    matches!(data, InstData::Invoke { owner, name, desc, .. }
        if *owner == sig.owner && *name == sig.name && *desc == sig.desc)
}

/// The next instruction after `inst` that is not a line marker.
fn next_real(body: &MethodBody, inst: InstId) -> Option<InstId> {
    let mut cur = body.layout.next_inst_of(inst);
    while let Some(next) = cur {
        if !matches!(body.inst(next), InstData::Line(_)) {
            return Some(next);
        }
        cur = body.layout.next_inst_of(next);
    }
    None
}

#[cfg(test)]
mod tests {
    use stitch_parser::parse_module;

    use super::*;

    const OPS: &str = "stitch/DecorationOps";

    fn parse(src: &str) -> MethodBody {
        let src = src.replace("OPS", OPS);
        let parsed = parse_module(&src).unwrap();
        let module = parsed.module;
        let method = module.methods().next().unwrap();
        module.body(method).clone()
    }

    fn scan(src: &str, target_ret: Type) -> Result<MarkerScan, SpliceError> {
        MarkerScan::scan(&parse(src), &target_ret, &MarkerVocabulary::default())
    }

    fn scan_err(src: &str, target_ret: Type) -> String {
        scan(src, target_ret).unwrap_err().message()
    }

    #[test]
    fn pairs_markers() {
        let scan = scan(
            r#"
method static demo/H.h(I)I {
    iload 0
    ifle L0
    invokestatic OPS.cancel()Ljava/lang/invoke/MethodHandle;
    iload 0
    invokevirtual java/lang/invoke/MethodHandle.invoke(I)I
    ireturn
  L0:
    frame same
    invokestatic OPS.blackhole()Ljava/lang/invoke/MethodHandle;
    invokevirtual java/lang/invoke/MethodHandle.invoke()V
    invokestatic OPS.callsite()Ljava/lang/invoke/MethodHandle;
    iload 0
    invokevirtual java/lang/invoke/MethodHandle.invoke(I)I
    ireturn
}
"#,
            Type::Int,
        )
        .unwrap();

        assert!(scan.callsite.is_some());
        assert_eq!(scan.cancels.len(), 1);
        assert_eq!(scan.blackholes.len(), 1);
        assert!(scan.jumps.is_empty());
        assert!(scan.requires_frame);

        let declare = scan.callsite_declare().unwrap();
        assert_eq!(scan.declare_kind(declare), Some(MarkerKind::Callsite));
    }

    #[test]
    fn straight_handler_needs_no_frame() {
        let scan = scan(
            r#"
method static demo/H.h(I)I {
    invokestatic OPS.callsite()Ljava/lang/invoke/MethodHandle;
    iload 0
    invokevirtual java/lang/invoke/MethodHandle.invoke(I)I
    ireturn
}
"#,
            Type::Void,
        )
        .unwrap();
        assert!(!scan.requires_frame);
    }

    #[test]
    fn markers_do_not_nest() {
        let msg = scan_err(
            r#"
method static demo/H.h()V {
    invokestatic OPS.callsite()Ljava/lang/invoke/MethodHandle;
    invokestatic OPS.cancel()Ljava/lang/invoke/MethodHandle;
    invokevirtual java/lang/invoke/MethodHandle.invoke()V
    return
}
"#,
            Type::Void,
        );
        assert_eq!(msg, "`cancel` marker opened inside an open `callsite` marker");
    }

    #[test]
    fn cancel_requires_return() {
        let msg = scan_err(
            r#"
method static demo/H.h()V {
    invokestatic OPS.cancel()Ljava/lang/invoke/MethodHandle;
    invokevirtual java/lang/invoke/MethodHandle.invoke()V
    iconst 0
    pop
    return
}
"#,
            Type::Void,
        );
        assert_eq!(msg, "a return must follow a cancel");
    }

    #[test]
    fn cancel_shape_follows_target_return() {
        let src = r#"
method static demo/H.h(I)V {
    invokestatic OPS.cancel()Ljava/lang/invoke/MethodHandle;
    iload 0
    invokevirtual java/lang/invoke/MethodHandle.invoke(I)V
    return
}
"#;
        assert_eq!(
            scan_err(src, Type::Void),
            "`cancel` in a void method takes no value, found (I)V"
        );
        assert!(scan(src, Type::Int).is_ok());
        assert_eq!(
            scan_err(src, Type::Long),
            "`cancel` must pass exactly one J value, found (I)V"
        );
    }

    #[test]
    fn blackhole_returns_nothing() {
        let msg = scan_err(
            r#"
method static demo/H.h()V {
    invokestatic OPS.blackhole()Ljava/lang/invoke/MethodHandle;
    invokevirtual java/lang/invoke/MethodHandle.invoke()I
    pop
    return
}
"#,
            Type::Void,
        );
        assert_eq!(
            msg,
            "`blackhole` invoke must not return a value, found ()I"
        );
    }

    #[test]
    fn jump_marker_needs_throw() {
        let ok = scan(
            r#"
method static demo/H.h()V {
    invokestatic OPS.jumpToLoopStart()Ljava/lang/Throwable;
    athrow
}
"#,
            Type::Void,
        )
        .unwrap();
        let (&call, &(kind, _)) = ok.jumps.first().unwrap();
        assert_eq!(kind, JumpKind::LoopStart);
        assert_eq!(ok.declare_kind(call), Some(MarkerKind::Jump(JumpKind::LoopStart)));

        let msg = scan_err(
            r#"
method static demo/H.h()V {
    invokestatic OPS.jumpToCodeBlockEnd()Ljava/lang/Throwable;
    pop
    return
}
"#,
            Type::Void,
        );
        assert_eq!(msg, "`jumpToCodeBlockEnd` marker must be followed by a throw");
    }

    #[test]
    fn rejects_misuse() {
        let unknown = scan(
            r#"
method static demo/H.h()V {
    invokestatic OPS.teleport()Ljava/lang/invoke/MethodHandle;
    pop
    return
}
"#,
            Type::Void,
        )
        .unwrap_err();
        let SpliceError::Validation(err) = unknown else {
            panic!("{unknown:?}");
        };
        assert_eq!(err.index, Some(0));
        assert_eq!(err.to_string(), "unknown marker `teleport` (handler instruction 0)");

        let msg = scan_err(
            r#"
method static demo/H.h(I)I {
    iload 0
    invokestatic demo/H.h(I)I
    ireturn
}
"#,
            Type::Int,
        );
        assert_eq!(msg, "handler `h` calls itself");

        let msg = scan_err(
            r#"
method static demo/H.h()V {
    invokestatic OPS.callsite()Ljava/lang/invoke/MethodHandle;
    invokevirtual java/lang/invoke/MethodHandle.invoke()V
    invokestatic OPS.callsite()Ljava/lang/invoke/MethodHandle;
    invokevirtual java/lang/invoke/MethodHandle.invoke()V
    return
}
"#,
            Type::Void,
        );
        assert_eq!(msg, "handler declares more than one callsite");

        let msg = scan_err(
            r#"
method static demo/H.h()V {
    invokestatic OPS.blackhole()Ljava/lang/invoke/MethodHandle;
    pop
    return
}
"#,
            Type::Void,
        );
        assert_eq!(msg, "`blackhole` marker is never invoked");
    }
}
