//! Splicing a handler body into a target body at an anchor.
//!
//! A splice runs through a fixed sequence of states:
//!
//! - **Scanning** resolves the anchor's surface and validates the handler's
//!   markers and signature.
//! - **Planning** captures the type state around the anchor and resolves
//!   jump markers to structural labels.
//! - **Guarding** checks the operand stack against the handler arguments and
//!   lays out the slots that hold them and any leftover stack values.
//! - **Remapping** places every handler slot in the target.
//! - **Emitting** rewrites the handler into instruction blocks and inserts
//!   them around the anchor together with the prologue, the epilogue and the
//!   frames the merged code needs.
//! - **Merging** threads exception ranges and local variable metadata into
//!   the target and raises its limits.
//!
//! Everything happens on a copy of the target, which replaces the target only
//! once the splice succeeds.
//!
//! Persistent slots allocated by an `Allocate` binding raise `max_locals` and
//! get a local variable entry spanning the injected region, but the target's
//! own frames are left as they are. A frame lying between two injections that
//! share a persistent slot does not list it, so the slot reads as unusable
//! past that frame.
use std::fmt;

use rustc_hash::FxHashMap;
use stitch_ir::{
    analysis::{full_frame_at, normalize_frames},
    prelude::*,
    AnalyzeError, BodyAnalysis, FrameState, InstData, InstId, LocalVarEntry, MethodBody,
    MethodSig, TryCatch, Type, VType, ValueKind,
};
use stitch_verifier::{verify_body, Diagnostic, VerificationLevel, VerifierConfig};
use tracing::{debug, debug_span};

use crate::{
    config::SpliceConfig,
    marker::{JumpKind, MarkerScan},
    remap::{build_remap, capture_locals_at, RemapRequest, SlotRemap},
    rewrite::{self, EmitPlan},
    structure::{self, StructurePoint},
    surface::{Surface, SurfaceKind},
    SpliceError,
};

/// A handler to splice at an anchor of a target body.
#[derive(Debug, Clone, Copy)]
pub struct SpliceRequest<'a> {
    pub anchor: InstId,
    /// The constructor call completing a [`SurfaceKind::Construct`] anchor.
    /// Located from the anchor when absent.
    pub anchor_end: Option<InstId>,
    pub handler: &'a MethodBody,
    pub surface: SurfaceKind,
    /// Locals live at the anchor. Derived from the target's local variable
    /// entries when absent.
    pub locals: Option<&'a [LocalVarEntry]>,
}

impl<'a> SpliceRequest<'a> {
    pub fn new(anchor: InstId, handler: &'a MethodBody, surface: SurfaceKind) -> Self {
        Self {
            anchor,
            anchor_end: None,
            handler,
            surface,
            locals: None,
        }
    }

    pub fn with_anchor_end(mut self, anchor_end: InstId) -> Self {
        self.anchor_end = Some(anchor_end);
        self
    }

    pub fn with_locals(mut self, locals: &'a [LocalVarEntry]) -> Self {
        self.locals = Some(locals);
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct SpliceOutcome {
    /// A handler invocation was recorded in the target.
    pub callback_recorded: bool,
    /// Non-fatal findings, such as slots bound by several handler slots.
    pub diagnostics: Vec<Diagnostic>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpliceState {
    Scanning,
    Planning,
    Guarding,
    Remapping,
    Emitting,
    Merging,
    Done,
}

impl fmt::Display for SpliceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Scanning => "scanning",
            Self::Planning => "planning",
            Self::Guarding => "guarding",
            Self::Remapping => "remapping",
            Self::Emitting => "emitting",
            Self::Merging => "merging",
            Self::Done => "done",
        };
        s.fmt(f)
    }
}

/// A stack value saved into a local for the duration of the handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedValue {
    pub slot: u16,
    pub ty: VType,
}

/// Everything a splice derives before it touches the target.
#[derive(Debug, Clone)]
pub struct InjectionPlan {
    pub surface: Surface,
    pub markers: MarkerScan,
    /// Jump marker call to the structural label it jumps to.
    pub jump_dests: FxHashMap<InstId, InstId>,
    /// State at the anchor. For construct the constructor arguments are on
    /// the stack already.
    pub before: FrameState,
    /// State after the anchor end; `None` for return sites.
    pub after: Option<FrameState>,
    /// Leftover stack values, top first.
    pub saved: Vec<SavedValue>,
    /// Slot of every handler argument.
    pub arg_slots: Vec<u16>,
    /// Lowest slot free for the handler once leftovers are saved.
    pub base: u16,
    pub fresh_start: u16,
    /// The merged code needs an epilogue and explicit frames.
    pub requires_frame: bool,
}

/// Splices `req.handler` into `target` at `req.anchor`.
///
/// On error `target` is left untouched.
pub fn splice(
    target: &mut MethodBody,
    req: &SpliceRequest,
    config: &SpliceConfig,
) -> Result<SpliceOutcome, SpliceError> {
    let span = debug_span!(
        "splice",
        target = %method_name(&target.sig),
        handler = %method_name(&req.handler.sig),
        surface = %req.surface,
    );
    let _enter = span.enter();

    let mut work = target.clone();
    let outcome = Splicer::new(target, req, config).run(&mut work)?;

    if config.verify_result && cfg!(debug_assertions) {
        let report = verify_body(&work, &VerifierConfig::for_level(VerificationLevel::Standard));
        if !report.is_ok() {
            return Err(SpliceError::internal(format!(
                "spliced body does not verify:\n{report}"
            )));
        }
    }

    *target = work;
    Ok(outcome)
}

pub(crate) fn method_name(sig: &MethodSig) -> String {
    format!("{}.{}{}", sig.owner, sig.name, sig.desc)
}

struct Splicer<'a> {
    /// The target as it was before the splice.
    original: &'a MethodBody,
    req: &'a SpliceRequest<'a>,
    config: &'a SpliceConfig,
    state: SpliceState,
}

impl<'a> Splicer<'a> {
    fn new(original: &'a MethodBody, req: &'a SpliceRequest<'a>, config: &'a SpliceConfig) -> Self {
        Self {
            original,
            req,
            config,
            state: SpliceState::Scanning,
        }
    }

    fn enter(&mut self, state: SpliceState) {
        debug!(from = %self.state, to = %state, "splice state");
        self.state = state;
    }

    fn run(mut self, work: &mut MethodBody) -> Result<SpliceOutcome, SpliceError> {
        let handler = self.req.handler;

        self.enter(SpliceState::Scanning);
        let surface = Surface::resolve(
            work,
            self.req.surface,
            self.req.anchor,
            self.req.anchor_end,
        )?;
        let markers = MarkerScan::scan(handler, &work.sig.desc.ret, &self.config.markers)?;
        check_callsite(&surface, &markers)?;
        check_signature(handler, &surface)?;
        if surface.kind == SurfaceKind::ReturnSite {
            check_return_site(handler, &markers)?;
        }
        let relocated = if surface.kind == SurfaceKind::Construct {
            relocated_args(work, &surface)?
        } else {
            Vec::new()
        };

        self.enter(SpliceState::Planning);
        let analysis = BodyAnalysis::compute(work)?;
        let mut before = analysis.require_before(work, surface.anchor)?;
        let after = match surface.kind {
            SurfaceKind::PureInjection => Some(before.clone()),
            SurfaceKind::ReturnSite => None,
            _ => analysis.state_after(surface.anchor_end).cloned(),
        };
        if surface.kind == SurfaceKind::Construct {
            before
                .stack
                .extend(surface.args.iter().filter_map(Type::vtype));
        }
        let jump_dests = self.resolve_jumps(work, &analysis, &surface, &markers)?;

        self.enter(SpliceState::Guarding);
        let plan = self.layout(work, surface, markers, jump_dests, before, after)?;
        debug!(
            fresh_start = plan.fresh_start,
            saved = plan.saved.len(),
            requires_frame = plan.requires_frame,
            "planned splice"
        );

        self.enter(SpliceState::Remapping);
        let begin = work.make_inst(InstData::Label);
        let end = work.make_inst(InstData::Label);
        let live = match self.req.locals {
            Some(locals) => locals.to_vec(),
            None => capture_locals_at(work, plan.surface.anchor),
        };
        let (remap, diagnostics) = build_remap(
            work,
            &RemapRequest {
                handler,
                handler_args: plan.surface.args.len(),
                fresh_start: plan.fresh_start,
                live_locals: &live,
                begin,
                end,
                allocated_prefix: self.config.allocated_prefix.as_str(),
            },
        )?;

        self.enter(SpliceState::Emitting);
        let emit_frames = self.original.has_frames();
        let refs = self.emit(work, &plan, &remap, &relocated, begin, end, emit_frames)?;

        self.enter(SpliceState::Merging);
        self.merge(work, &plan, &remap, &refs)?;

        self.enter(SpliceState::Done);
        Ok(SpliceOutcome {
            callback_recorded: true,
            diagnostics,
        })
    }

    fn resolve_jumps(
        &self,
        work: &mut MethodBody,
        analysis: &BodyAnalysis,
        surface: &Surface,
        markers: &MarkerScan,
    ) -> Result<FxHashMap<InstId, InstId>, SpliceError> {
        let mut dests = FxHashMap::default();
        if markers.jumps.is_empty() {
            return Ok(dests);
        }

        let anchors = structure::locate(work, surface.anchor);
        let mut loop_end = None;
        for (&call, &(kind, _)) in &markers.jumps {
            let dest = match kind {
                JumpKind::LoopStart => anchors
                    .loop_start
                    .ok_or_else(|| SpliceError::validation("could not locate loop start"))?,
                JumpKind::LoopEnd => match loop_end {
                    Some(label) => label,
                    None => {
                        let point = anchors
                            .loop_end
                            .ok_or_else(|| SpliceError::validation("could not locate loop end"))?;
                        let label = self.materialize(work, analysis, point)?;
                        loop_end = Some(label);
                        label
                    }
                },
                JumpKind::BlockEnd => anchors.block_end.ok_or_else(|| {
                    SpliceError::validation("could not locate code block end")
                })?,
            };
            debug!(%call, ?kind, %dest, "resolved jump marker");
            dests.insert(call, dest);
        }
        Ok(dests)
    }

    /// Gives a label to a structural point, with a frame when the target
    /// carries frames.
    fn materialize(
        &self,
        work: &mut MethodBody,
        analysis: &BodyAnalysis,
        point: StructurePoint,
    ) -> Result<InstId, SpliceError> {
        let after = match point {
            StructurePoint::Label(label) => return Ok(label),
            StructurePoint::After(after) => after,
        };

        let label = work.make_inst(InstData::Label);
        work.layout.insert_inst_after(label, after);
        if work.has_frames() {
            let state = analysis
                .state_after(after)
                .ok_or_else(|| SpliceError::validation("could not locate loop end"))?;
            let frame = work.make_inst(InstData::Frame(state.to_frame()));
            work.layout.insert_inst_after(frame, label);
            expand_next_frame(work, self.original, frame)?;
        }
        Ok(label)
    }

    fn layout(
        &self,
        work: &MethodBody,
        surface: Surface,
        markers: MarkerScan,
        jump_dests: FxHashMap<InstId, InstId>,
        before: FrameState,
        after: Option<FrameState>,
    ) -> Result<InjectionPlan, SpliceError> {
        let n = surface.args.len();
        if before.stack.len() < n {
            return Err(SpliceError::validation(format!(
                "the stack at the anchor holds {} values, the handler expects {n}",
                before.stack.len()
            )));
        }

        let split = before.stack.len() - n;
        for (i, (actual, expected)) in before.stack[split..].iter().zip(&surface.args).enumerate() {
            let fits = expected
                .vtype()
                .is_some_and(|expected| actual.is_assignable_to(&expected));
            if !fits {
                return Err(SpliceError::validation(format!(
                    "stack value {i} at the anchor is {actual}, the handler expects {expected}"
                )));
            }
        }

        // Fresh slots start above the live locals and any persistent slot.
        let allocated_end = work
            .local_vars
            .iter()
            .filter(|var| var.allocated.is_some())
            .map(|var| var.slot + var.ty.size())
            .max()
            .unwrap_or(0);
        let base = before.locals_size().max(allocated_end);

        let mut next = base;
        let saved: Vec<_> = before.stack[..split]
            .iter()
            .rev()
            .map(|ty| {
                let value = SavedValue {
                    slot: next,
                    ty: ty.clone(),
                };
                next += ty.size();
                value
            })
            .collect();

        let fresh_start = next;
        let arg_slots = surface
            .args
            .iter()
            .map(|ty| {
                let slot = next;
                next += ty.size();
                slot
            })
            .collect();

        let requires_frame = markers.requires_frame || !saved.is_empty();
        Ok(InjectionPlan {
            surface,
            markers,
            jump_dests,
            before,
            after,
            saved,
            arg_slots,
            base,
            fresh_start,
            requires_frame,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn emit(
        &self,
        work: &mut MethodBody,
        plan: &InjectionPlan,
        remap: &SlotRemap,
        relocated: &[InstId],
        begin: InstId,
        end: InstId,
        emit_frames: bool,
    ) -> Result<rewrite::Emitted, SpliceError> {
        let mut handler = self.req.handler.clone();
        normalize_frames(&mut handler)?;

        // Target locals with the saved stack values, below the handler's.
        let mut prefix = FrameState {
            locals: plan.before.locals.clone(),
            stack: Vec::new(),
        };
        prefix.locals.truncate(plan.base as usize);
        prefix.locals.resize(plan.base as usize, VType::Top);
        for saved in &plan.saved {
            prefix.set_local(saved.slot, saved.ty.clone());
        }

        let surface = plan.surface.kind;
        let has_end = plan.requires_frame && surface != SurfaceKind::ReturnSite;
        let emitted = rewrite::emit(
            work,
            &EmitPlan {
                handler: &handler,
                markers: &plan.markers,
                remap,
                surface,
                target_ret: &self.original.sig.desc.ret,
                jump_dests: &plan.jump_dests,
                frame_prefix: &prefix.locals,
                end_label: end,
                has_end,
                emit_frames,
                new_site: (surface == SurfaceKind::Construct).then_some(plan.surface.anchor),
            },
        )?;

        let mut head = Vec::new();
        for (ty, slot) in plan.surface.args.iter().zip(&plan.arg_slots).rev() {
            let kind = ty
                .value_kind()
                .ok_or_else(|| SpliceError::internal("void handler argument"))?;
            head.push(work.make_inst(InstData::store(kind, *slot)));
        }
        for saved in &plan.saved {
            head.push(work.make_inst(InstData::store(value_kind(&saved.ty)?, saved.slot)));
        }
        head.push(begin);
        if emit_frames && plan.requires_frame {
            let mut state = prefix.clone();
            for (ty, slot) in plan.surface.args.iter().zip(&plan.arg_slots) {
                if let Some(ty) = ty.vtype() {
                    state.set_local(*slot, ty);
                }
            }
            head.push(work.make_inst(InstData::Frame(state.to_frame())));
        }

        let tail = if has_end {
            self.epilogue(work, plan, emit_frames)?
        } else {
            Vec::new()
        };

        let mut blocks = emitted.blocks.iter();
        let first = blocks.next().cloned().unwrap_or_default();
        let anchor = plan.surface.anchor;
        let anchor_end = plan.surface.anchor_end;
        let mut cursor = InstInserter::default();

        match surface {
            SurfaceKind::PureInjection => {
                cursor.set_before(work, anchor);
                cursor.insert_all(work, &head);
                cursor.insert_all(work, &first);
                cursor.insert_all(work, &tail);
            }

            SurfaceKind::Invoke | SurfaceKind::FieldAccess | SurfaceKind::ReturnSite => {
                cursor.set_before(work, anchor);
                cursor.insert_all(work, &head);
                cursor.insert_all(work, &first);

                let post = blocks.next().cloned().unwrap_or_default();
                cursor.set_location(CursorLocation::At(anchor_end));
                cursor.insert_all(work, &post);
                cursor.insert_all(work, &tail);
            }

            SurfaceKind::Construct => {
                for inst in relocated {
                    work.layout.remove_inst(*inst);
                }
                cursor.set_before(work, anchor);
                cursor.insert_all(work, relocated);
                cursor.insert_all(work, &head);
                cursor.insert_all(work, &first);

                let args = blocks.next().cloned().unwrap_or_default();
                cursor.set_before(work, anchor_end);
                cursor.insert_all(work, &args);

                let post = blocks.next().cloned().unwrap_or_default();
                cursor.set_location(CursorLocation::At(anchor_end));
                cursor.insert_all(work, &post);
                cursor.insert_all(work, &tail);
            }
        }

        if emit_frames {
            let last = tail.last().copied().unwrap_or(end);
            expand_next_frame(work, self.original, last)?;
        }
        Ok(emitted)
    }

    /// Frames and code after the end label: restores the saved stack values
    /// below the handler's return value.
    fn epilogue(
        &self,
        work: &mut MethodBody,
        plan: &InjectionPlan,
        emit_frames: bool,
    ) -> Result<Vec<InstId>, SpliceError> {
        let after = plan.after.as_ref().ok_or(AnalyzeError::NoTypeState {
            pos: plan.surface.anchor_end,
        })?;
        let ret = &plan.surface.ret;
        let mut tail = Vec::new();

        if plan.saved.is_empty() {
            if emit_frames {
                tail.push(work.make_inst(InstData::Frame(after.to_frame())));
            }
            return Ok(tail);
        }

        if emit_frames {
            let mut state = FrameState {
                locals: after.locals.clone(),
                stack: ret.vtype().into_iter().collect(),
            };
            if state.locals.len() < plan.base as usize {
                state.locals.resize(plan.base as usize, VType::Top);
            }
            for saved in &plan.saved {
                state.set_local(saved.slot, saved.ty.clone());
            }
            tail.push(work.make_inst(InstData::Frame(state.to_frame())));
        }

        let ret_kind = ret.value_kind();
        if let Some(kind) = ret_kind {
            tail.push(work.make_inst(InstData::store(kind, plan.fresh_start)));
        }
        for saved in plan.saved.iter().rev() {
            tail.push(work.make_inst(InstData::load(value_kind(&saved.ty)?, saved.slot)));
        }
        if let Some(kind) = ret_kind {
            tail.push(work.make_inst(InstData::load(kind, plan.fresh_start)));
        }

        if emit_frames {
            tail.push(work.make_inst(InstData::Frame(after.to_frame())));
        }
        Ok(tail)
    }

    fn merge(
        &self,
        work: &mut MethodBody,
        plan: &InjectionPlan,
        remap: &SlotRemap,
        emitted: &rewrite::Emitted,
    ) -> Result<(), SpliceError> {
        let handler = self.req.handler;
        let copy_of = |label: InstId| {
            emitted.refs[label]
                .expand()
                .ok_or_else(|| SpliceError::internal(format!("handler label {label} has no copy")))
        };

        if !handler.try_catch.is_empty() {
            let mut ranges = Vec::with_capacity(handler.try_catch.len());
            for tc in &handler.try_catch {
                ranges.push(TryCatch {
                    start: copy_of(tc.start)?,
                    end: copy_of(tc.end)?,
                    handler: copy_of(tc.handler)?,
                    catch_type: tc.catch_type.clone(),
                });
            }

            let index = try_catch_index(work, &ranges);
            debug!(count = ranges.len(), index, "merged exception ranges");
            for (i, range) in ranges.into_iter().enumerate() {
                work.try_catch.insert(index + i, range);
            }
        }

        for var in &handler.local_vars {
            let Some(slot) = remap.get(var.slot) else {
                continue;
            };
            if slot < plan.fresh_start {
                continue;
            }
            work.local_vars.push(LocalVarEntry {
                name: var.name.clone(),
                ty: var.ty.clone(),
                start: copy_of(var.start)?,
                end: copy_of(var.end)?,
                slot,
                allocated: None,
            });
        }

        let ret_words = plan.surface.ret.size();
        work.max_locals = work
            .max_locals
            .max(remap.fresh_end)
            .max(plan.fresh_start + ret_words);

        let construct = if plan.surface.kind == SurfaceKind::Construct {
            2
        } else {
            0
        };
        let after_words = plan.after.as_ref().map_or(0, FrameState::stack_size);
        work.max_stack = work
            .max_stack
            .max(handler.max_stack + plan.before.stack_size() + construct)
            .max(after_words + ret_words);

        debug!(
            max_locals = work.max_locals,
            max_stack = work.max_stack,
            "raised limits"
        );
        Ok(())
    }
}

/// Rewrites the first frame after `from` to full form if it is compact, since
/// frames were inserted before it.
pub(crate) fn expand_next_frame(
    work: &mut MethodBody,
    original: &MethodBody,
    from: InstId,
) -> Result<(), SpliceError> {
    let mut cur = work.layout.next_inst_of(from);
    while let Some(inst) = cur {
        if let InstData::Frame(frame) = work.inst(inst) {
            if !frame.is_full() {
                let full = full_frame_at(original, inst)?;
                debug!(%inst, "expanded compact frame");
                work.replace_inst(inst, InstData::Frame(full));
            }
            return Ok(());
        }
        cur = work.layout.next_inst_of(inst);
    }
    Ok(())
}

/// Handler ranges go after the last target range they enclose, so that
/// inner ranges keep preceding outer ones.
fn try_catch_index(work: &MethodBody, ranges: &[TryCatch]) -> usize {
    let pos = work.positions();
    let span = |tc: &TryCatch| (pos.get(&tc.start).copied(), pos.get(&tc.end).copied());

    for (i, existing) in work.try_catch.iter().enumerate().rev() {
        let (Some(start), Some(end)) = span(existing) else {
            continue;
        };
        let enclosed = ranges.iter().any(|range| match span(range) {
            (Some(outer_start), Some(outer_end)) => outer_start <= start && end <= outer_end,
            _ => false,
        });
        if enclosed {
            return i + 1;
        }
    }
    0
}

fn check_callsite(surface: &Surface, markers: &MarkerScan) -> Result<(), SpliceError> {
    match (surface.kind.requires_callsite(), markers.callsite.is_some()) {
        (true, false) => Err(SpliceError::validation(format!(
            "the {} surface requires a callsite marker",
            surface.kind
        ))),
        (false, true) => Err(SpliceError::validation(format!(
            "the {} surface does not allow a callsite marker",
            surface.kind
        ))),
        _ => Ok(()),
    }
}

fn check_signature(handler: &MethodBody, surface: &Surface) -> Result<(), SpliceError> {
    let desc = &handler.sig.desc;
    if desc.ret != surface.ret {
        return Err(SpliceError::validation(format!(
            "handler returns {}, the {} surface produces {}",
            desc.ret, surface.kind, surface.ret
        )));
    }
    if desc.params.len() < surface.args.len() {
        return Err(SpliceError::validation(format!(
            "handler takes {} parameters, the {} surface passes {}",
            desc.params.len(),
            surface.kind,
            surface.args.len()
        )));
    }
    for (i, (param, arg)) in desc.params.iter().zip(&surface.args).enumerate() {
        if param != arg {
            return Err(SpliceError::validation(format!(
                "handler parameter {i} is {param}, the {} surface passes {arg}",
                surface.kind
            )));
        }
    }
    Ok(())
}

/// A return-site handler must reach its callsite; after it only the final
/// return may follow.
fn check_return_site(handler: &MethodBody, markers: &MarkerScan) -> Result<(), SpliceError> {
    let Some(invoke) = markers.callsite_invoke() else {
        return Ok(());
    };

    let mut past_callsite = false;
    let mut in_cancel = false;
    for (index, inst) in handler.iter_inst().enumerate() {
        let data = handler.inst(inst);
        if inst == invoke {
            past_callsite = true;
            continue;
        }
        if markers.cancels.values().any(|cancel| *cancel == inst) {
            in_cancel = true;
            continue;
        }

        match data {
            InstData::Return(_) | InstData::Throw if in_cancel => in_cancel = false,
            InstData::Return(_) if !past_callsite => {
                return Err(SpliceError::at(
                    inst,
                    index,
                    "a return-site handler must reach its callsite before returning",
                ))
            }
            _ if past_callsite && !data.is_pseudo() && !data.is_return() => {
                return Err(SpliceError::at(
                    inst,
                    index,
                    "only the final return may follow the callsite of a return-site handler",
                ))
            }
            _ => {}
        }
    }
    Ok(())
}

/// The constructor argument computation between `new` (and its `dup`) and
/// the constructor call, which is moved in front of the handler.
fn relocated_args(work: &MethodBody, surface: &Surface) -> Result<Vec<InstId>, SpliceError> {
    let mut start = work.layout.next_inst_of(surface.anchor);
    if let Some(dup) = start {
        if matches!(work.inst(dup), InstData::Stack(stitch_ir::inst::StackOp::Dup)) {
            start = work.layout.next_inst_of(dup);
        }
    }

    let mut insts = Vec::new();
    let mut cur = start;
    while let Some(inst) = cur {
        if inst == surface.anchor_end {
            return Ok(insts);
        }
        let data = work.inst(inst);
        if matches!(
            data,
            InstData::Label | InstData::Frame(_) | InstData::Jump { .. } | InstData::Switch { .. }
        ) {
            return Err(SpliceError::validation(
                "constructor arguments with control flow cannot be relocated",
            ));
        }
        insts.push(inst);
        cur = work.layout.next_inst_of(inst);
    }

    Err(SpliceError::internal("constructor call is not after its `new`"))
}

fn value_kind(ty: &VType) -> Result<ValueKind, SpliceError> {
    match ty {
        VType::Int => Ok(ValueKind::Int),
        VType::Float => Ok(ValueKind::Float),
        VType::Long => Ok(ValueKind::Long),
        VType::Double => Ok(ValueKind::Double),
        VType::Top => Err(SpliceError::internal("cannot move an unusable stack value")),
        _ => Ok(ValueKind::Ref),
    }
}
