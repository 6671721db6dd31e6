//! Wrapping a call site with a cancellable handler call.
//!
//! The call is replaced by a call to the handler, which receives the call's
//! arguments, a freshly created callback info object and optionally a prefix
//! of the target's own parameters. If the handler cancels the callback info,
//! the target returns right after the handler; for non-void targets the
//! returned value is read back from the callback info.
use smallvec::SmallVec;
use stitch_ir::{
    inst::{CmpKind, Const, InvokeKind, JumpCond},
    prelude::*,
    AnalyzeError, BodyAnalysis, InstData, InstId, LocalVarEntry, MethodBody, MethodDescriptor,
    Type,
};
use stitch_verifier::{verify_body, VerificationLevel, VerifierConfig};
use tracing::{debug, debug_span};

use crate::{
    config::EjectConfig,
    splicer::{expand_next_frame, method_name},
    SpliceError, SpliceOutcome,
};

#[derive(Debug, Clone, Copy)]
pub struct EjectRequest<'a> {
    /// The call to wrap.
    pub anchor: InstId,
    pub handler: &'a MethodBody,
}

impl<'a> EjectRequest<'a> {
    pub fn new(anchor: InstId, handler: &'a MethodBody) -> Self {
        Self { anchor, handler }
    }
}

/// The wrapped call and how the handler receives its arguments.
#[derive(Debug, Clone)]
struct CallShape {
    owner: Type,
    call_args: SmallVec<[Type; 4]>,
    call_ret: Type,
    /// Number of target parameters passed after the callback info.
    captured: usize,
    /// The handler returns a supertype of the call's return type.
    coerce_ret: bool,
}

/// Replaces the call at `req.anchor` with a cancellable call to
/// `req.handler`. On error `target` is left untouched.
pub fn eject(
    target: &mut MethodBody,
    req: &EjectRequest,
    config: &EjectConfig,
) -> Result<SpliceOutcome, SpliceError> {
    let span = debug_span!(
        "eject",
        target = %method_name(&target.sig),
        handler = %method_name(&req.handler.sig),
    );
    let _enter = span.enter();

    let shape = validate(target, req, config)?;
    debug!(
        args = shape.call_args.len(),
        captured = shape.captured,
        coerce = shape.coerce_ret,
        "validated handler"
    );

    let mut work = target.clone();
    emit(&mut work, target, req, config, &shape)?;

    if config.verify_result && cfg!(debug_assertions) {
        let report = verify_body(&work, &VerifierConfig::for_level(VerificationLevel::Standard));
        if !report.is_ok() {
            return Err(SpliceError::internal(format!(
                "wrapped body does not verify:\n{report}"
            )));
        }
    }

    *target = work;
    Ok(SpliceOutcome {
        callback_recorded: true,
        diagnostics: Vec::new(),
    })
}

fn validate(
    target: &MethodBody,
    req: &EjectRequest,
    config: &EjectConfig,
) -> Result<CallShape, SpliceError> {
    if !target.layout.is_inst_inserted(req.anchor) {
        return Err(SpliceError::validation(format!(
            "anchor {} is not part of the target body",
            req.anchor
        )));
    }
    let InstData::Invoke {
        kind,
        owner,
        name,
        desc,
    } = target.inst(req.anchor)
    else {
        return Err(SpliceError::validation(format!(
            "anchor {} is not a method call",
            req.anchor
        )));
    };
    if name == "<init>" {
        return Err(SpliceError::validation("constructor calls cannot be wrapped"));
    }

    let handler = req.handler;
    if !handler.is_static() && target.is_static() {
        return Err(SpliceError::validation(format!(
            "instance handler `{}` cannot be called from a static method",
            handler.sig.name
        )));
    }

    let owner = Type::Object(owner.clone());
    let mut call_args = SmallVec::<[Type; 4]>::new();
    if *kind != InvokeKind::Static {
        call_args.push(owner.clone());
    }
    call_args.extend(desc.params.iter().cloned());

    let target_params = &target.sig.desc.params;
    let info = Type::Object(config.info_class(&target.sig.desc.ret).clone());
    let params = &handler.sig.desc.params;

    let signature_error = |message: String| {
        let expected: Vec<_> = call_args
            .iter()
            .chain(std::iter::once(&info))
            .chain(target_params.iter())
            .cloned()
            .collect();
        let expected = MethodDescriptor::new(&expected, desc.ret.clone());
        SpliceError::validation(format!(
            "{message}. Handler signature: {} Expected signature: {expected}",
            handler.sig.desc
        ))
    };

    let hret = &handler.sig.desc.ret;
    let coerce_ret = if *hret == desc.ret {
        false
    } else if hret.is_reference() && desc.ret.is_reference() {
        true
    } else {
        return Err(signature_error(format!(
            "handler returns {hret}, the call returns {}",
            desc.ret
        )));
    };

    for (i, arg) in call_args.iter().enumerate() {
        let Some(param) = params.get(i) else {
            return Err(signature_error(format!(
                "handler takes {} parameters, the call passes {}",
                params.len(),
                call_args.len()
            )));
        };
        let object = Type::object("java/lang/Object");
        if param != arg && !(arg.is_reference() && *param == object) {
            return Err(signature_error(format!(
                "handler parameter {i} is {param}, the call passes {arg}"
            )));
        }
    }

    let n = call_args.len();
    match params.get(n) {
        Some(param) if *param == info => {}
        Some(param) => {
            return Err(signature_error(format!(
                "handler parameter {n} is {param}, expected {info}"
            )))
        }
        None => {
            return Err(signature_error(format!(
                "not enough arguments, expected {info}, found {}",
                handler.sig.desc
            )))
        }
    }

    let rest = &params[n + 1..];
    if rest.len() > target_params.len() {
        let extra = &rest[target_params.len()..];
        let extra: Vec<_> = extra.iter().map(ToString::to_string).collect();
        return Err(SpliceError::validation(format!(
            "handler `{}` has an invalid signature. Found {} unexpected additional method arguments: {}",
            handler.sig.name,
            extra.len(),
            extra.join(", ")
        )));
    }
    for (i, (param, captured)) in rest.iter().zip(target_params.iter()).enumerate() {
        if param != captured {
            return Err(signature_error(format!(
                "handler parameter {} is {param}, target parameter {i} is {captured}",
                n + 1 + i
            )));
        }
    }

    Ok(CallShape {
        owner,
        call_args,
        call_ret: desc.ret.clone(),
        captured: rest.len(),
        coerce_ret,
    })
}

fn emit(
    work: &mut MethodBody,
    original: &MethodBody,
    req: &EjectRequest,
    config: &EjectConfig,
    shape: &CallShape,
) -> Result<(), SpliceError> {
    let anchor = req.anchor;
    let handler = req.handler;
    let analysis = BodyAnalysis::compute(original)?;
    let before = analysis.require_before(original, anchor)?;
    let after = analysis
        .state_after(anchor)
        .cloned()
        .ok_or(AnalyzeError::NoTypeState { pos: anchor })?;

    let target_ret = &original.sig.desc.ret;
    let info_class = config.info_class(target_ret).clone();
    let info = Type::Object(info_class.clone());

    let mut next = work.max_locals;
    let arg_slots: Vec<u16> = shape
        .call_args
        .iter()
        .map(|ty| {
            let slot = next;
            next += ty.size();
            slot
        })
        .collect();
    let info_slot = next;
    next += 1;

    let mut insts = Vec::new();
    let mut push = |work: &mut MethodBody, data: InstData| {
        let inst = work.make_inst(data);
        insts.push(inst);
        inst
    };

    for (ty, slot) in shape.call_args.iter().zip(&arg_slots).rev() {
        push(work, InstData::store(kind_of(ty)?, *slot));
    }

    push(work, InstData::New(info_class.clone()));
    push(work, InstData::Stack(stitch_ir::inst::StackOp::Dup));
    push(work, InstData::Const(Const::String(original.sig.name.clone())));
    push(work, InstData::Const(Const::Int(1)));
    push(
        work,
        InstData::invoke(
            InvokeKind::Special,
            &info_class,
            "<init>",
            MethodDescriptor::new(&[Type::object("java/lang/String"), Type::Boolean], Type::Void),
        ),
    );
    push(work, InstData::store(stitch_ir::ValueKind::Ref, info_slot));
    let start = push(work, InstData::Label);

    if !handler.is_static() {
        push(work, InstData::load(stitch_ir::ValueKind::Ref, 0));
    }
    for (ty, slot) in shape.call_args.iter().zip(&arg_slots) {
        push(work, InstData::load(kind_of(ty)?, *slot));
    }
    push(work, InstData::load(stitch_ir::ValueKind::Ref, info_slot));
    let param_slots = original.sig.param_slots();
    for (ty, slot) in original
        .sig
        .desc
        .params
        .iter()
        .zip(param_slots)
        .take(shape.captured)
    {
        push(work, InstData::load(kind_of(ty)?, slot));
    }

    let call_kind = if handler.is_static() {
        InvokeKind::Static
    } else {
        InvokeKind::Virtual
    };
    push(
        work,
        InstData::invoke(
            call_kind,
            &handler.sig.owner,
            &handler.sig.name,
            handler.sig.desc.clone(),
        ),
    );
    if shape.coerce_ret {
        push(work, InstData::CheckCast(shape.call_ret.clone()));
    }

    let not_cancelled = work.make_inst(InstData::Label);
    push(work, InstData::load(stitch_ir::ValueKind::Ref, info_slot));
    push(
        work,
        InstData::invoke(
            InvokeKind::Virtual,
            &info_class,
            &config.is_cancelled,
            MethodDescriptor::new(&[], Type::Boolean),
        ),
    );
    push(
        work,
        InstData::Jump {
            cond: JumpCond::Zero(CmpKind::Eq),
            dest: not_cancelled,
        },
    );

    match target_ret.value_kind() {
        None => {
            push(work, InstData::Return(None));
        }
        Some(kind) => {
            push(work, InstData::load(stitch_ir::ValueKind::Ref, info_slot));
            let (accessor, desc) = config.return_accessor(target_ret);
            push(
                work,
                InstData::invoke(InvokeKind::Virtual, &info_class, &accessor, desc),
            );
            if target_ret.is_reference() {
                push(work, InstData::CheckCast(target_ret.clone()));
            }
            push(work, InstData::Return(Some(kind)));
        }
    }
    insts.push(not_cancelled);

    let frame = if original.has_frames() {
        let frame = work.make_inst(InstData::Frame(after.to_frame()));
        insts.push(frame);
        Some(frame)
    } else {
        None
    };

    let mut cursor = InstInserter::default();
    cursor.set_before(work, anchor);
    cursor.insert_all(work, &insts);
    work.layout.remove_inst(anchor);

    if let Some(frame) = frame {
        expand_next_frame(work, original, frame)?;
    }

    work.local_vars.push(LocalVarEntry {
        name: format!("{}{info_slot}", config.local_prefix).into(),
        ty: info,
        start,
        end: not_cancelled,
        slot: info_slot,
        allocated: None,
    });

    let arg_words: u16 = shape.call_args.iter().map(Type::size).sum();
    let base = before.stack_size().saturating_sub(arg_words);
    let handler_words = handler.sig.arg_words();
    let peak = 4.max(handler_words).max(target_ret.size()).max(shape.call_ret.size());
    work.max_locals = work.max_locals.max(next);
    work.max_stack = work.max_stack.max(base + peak);

    debug!(
        owner = %shape.owner,
        info_slot,
        max_locals = work.max_locals,
        max_stack = work.max_stack,
        "wrapped call"
    );
    Ok(())
}

fn kind_of(ty: &Type) -> Result<stitch_ir::ValueKind, SpliceError> {
    ty.value_kind()
        .ok_or_else(|| SpliceError::internal("void value in an argument list"))
}
