//! Verification frame analysis.
//!
//! The analyzer simulates operand stack and local variable categories along
//! the instruction stream. Explicit frames reset the simulated state; after an
//! unconditional transfer the state is unknown until the next frame or until a
//! label whose state can be derived from a jump or exception range targeting it.
use rustc_hash::FxHashMap;
use smol_str::SmolStr;

use crate::{
    frame::{collapse_locals, expand_locals, Frame, VType},
    inst::{ArrayKind, Const, FieldOp, InstData, InvokeKind, StackOp, ValueKind},
    InstId, MethodBody, MethodSig, Type,
};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AnalyzeError {
    #[error("no type state available at {pos}")]
    NoTypeState { pos: InstId },
    #[error("no label between {pos} and the preceding terminator")]
    NoLabelBefore { pos: InstId },
    #[error("operand stack underflow at {pos}")]
    StackUnderflow { pos: InstId },
    #[error("stack operation at {pos} splits a wide value")]
    InvalidOperands { pos: InstId },
    #[error("frame at {pos} chops more locals than are defined")]
    ChopUnderflow { pos: InstId },
}

/// Simulated type state between two instructions.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FrameState {
    /// One entry per slot; the upper half of a wide value is `Top`.
    pub locals: Vec<VType>,
    /// One entry per value; wide values take a single entry.
    pub stack: Vec<VType>,
}

impl FrameState {
    /// The state on method entry: receiver followed by the parameters.
    pub fn entry(sig: &MethodSig) -> Self {
        let mut collapsed = Vec::with_capacity(sig.desc.params.len() + 1);
        if !sig.is_static {
            collapsed.push(if sig.is_constructor() {
                VType::UninitializedThis
            } else {
                VType::Object(sig.owner.clone())
            });
        }
        collapsed.extend(sig.desc.params.iter().filter_map(Type::vtype));

        Self {
            locals: expand_locals(&collapsed),
            stack: Vec::new(),
        }
    }

    pub fn collapsed_locals(&self) -> Vec<VType> {
        collapse_locals(&self.locals)
    }

    pub fn collapsed_stack(&self) -> Vec<VType> {
        self.stack.clone()
    }

    /// Number of local slots in use, ignoring trailing unusable slots.
    pub fn locals_size(&self) -> u16 {
        expand_locals(&self.collapsed_locals()).len() as u16
    }

    /// Operand stack depth in words.
    pub fn stack_size(&self) -> u16 {
        self.stack.iter().map(VType::size).sum()
    }

    pub fn local(&self, slot: u16) -> &VType {
        self.locals.get(slot as usize).unwrap_or(&VType::Top)
    }

    pub fn to_frame(&self) -> Frame {
        Frame::full(self.collapsed_locals(), self.stack.clone())
    }

    pub fn set_local(&mut self, slot: u16, ty: VType) {
        let slot = slot as usize;
        let wide = ty.is_wide();
        let needed = slot + if wide { 2 } else { 1 };
        if self.locals.len() < needed {
            self.locals.resize(needed, VType::Top);
        }

        // Overwriting the upper half of a wide value invalidates it.
        if slot > 0 && self.locals[slot - 1].is_wide() {
            self.locals[slot - 1] = VType::Top;
        }
        if self.locals[slot].is_wide() && !wide && slot + 1 < self.locals.len() {
            self.locals[slot + 1] = VType::Top;
        }
        self.locals[slot] = ty;
        if wide {
            self.locals[slot + 1] = VType::Top;
        }
    }

    fn pop(&mut self, pos: InstId) -> Result<VType, AnalyzeError> {
        self.stack.pop().ok_or(AnalyzeError::StackUnderflow { pos })
    }

    fn pop_n(&mut self, n: usize, pos: InstId) -> Result<(), AnalyzeError> {
        for _ in 0..n {
            self.pop(pos)?;
        }
        Ok(())
    }

    /// Pops entries totalling exactly `words` words, returned bottom first.
    fn pop_words(&mut self, words: u16, pos: InstId) -> Result<Vec<VType>, AnalyzeError> {
        let mut taken = Vec::new();
        let mut total = 0;
        while total < words {
            let ty = self.pop(pos)?;
            total += ty.size();
            taken.push(ty);
        }
        if total != words {
            return Err(AnalyzeError::InvalidOperands { pos });
        }
        taken.reverse();
        Ok(taken)
    }

    fn replace_all(&mut self, from: &VType, to: &VType) {
        for ty in self.locals.iter_mut().chain(self.stack.iter_mut()) {
            if ty == from {
                *ty = to.clone();
            }
        }
    }
}

/// Expands `frame` against the expanded locals of the previous frame.
/// Returns `None` when a `chop` removes more locals than exist.
pub fn expand_frame(prev_locals: &[VType], frame: &Frame) -> Option<(Vec<VType>, Vec<VType>)> {
    match frame {
        Frame::Full { locals, stack } => Some((expand_locals(locals), stack.clone())),
        Frame::Same => Some((prev_locals.to_vec(), Vec::new())),
        Frame::Same1(ty) => Some((prev_locals.to_vec(), vec![ty.clone()])),
        Frame::Append(extra) => {
            let mut collapsed = collapse_locals(prev_locals);
            collapsed.extend(extra.iter().cloned());
            Some((expand_locals(&collapsed), Vec::new()))
        }
        Frame::Chop(n) => {
            let mut collapsed = collapse_locals(prev_locals);
            let n = *n as usize;
            if n > collapsed.len() {
                return None;
            }
            collapsed.truncate(collapsed.len() - n);
            Some((expand_locals(&collapsed), Vec::new()))
        }
    }
}

/// Resumable straight-line simulation over a method body.
#[derive(Debug, Clone)]
pub struct FrameCursor {
    state: Option<FrameState>,
    frame_locals: Vec<VType>,
    this_class: SmolStr,
}

impl FrameCursor {
    pub fn new(body: &MethodBody) -> Self {
        let state = FrameState::entry(&body.sig);
        Self {
            frame_locals: state.locals.clone(),
            state: Some(state),
            this_class: body.sig.owner.clone(),
        }
    }

    /// Runs the cursor from the method entry up to, not including, `until`.
    pub fn seek(body: &MethodBody, until: InstId) -> Result<Self, AnalyzeError> {
        let mut cursor = Self::new(body);
        for inst in body.iter_inst() {
            if inst == until {
                break;
            }
            cursor.step(body, inst)?;
        }
        Ok(cursor)
    }

    pub fn state(&self) -> Option<&FrameState> {
        self.state.as_ref()
    }

    pub fn set_state(&mut self, state: Option<FrameState>) {
        self.state = state;
    }

    /// Expanded locals of the last frame passed, or of the method entry.
    pub fn frame_locals(&self) -> &[VType] {
        &self.frame_locals
    }

    pub fn step(&mut self, body: &MethodBody, pos: InstId) -> Result<(), AnalyzeError> {
        let data = body.inst(pos);
        if let InstData::Frame(frame) = data {
            let (locals, stack) = expand_frame(&self.frame_locals, frame)
                .ok_or(AnalyzeError::ChopUnderflow { pos })?;
            self.frame_locals = locals.clone();
            self.state = Some(FrameState { locals, stack });
            return Ok(());
        }

        let Some(state) = self.state.as_mut() else {
            return Ok(());
        };
        apply(state, data, pos, &self.this_class)?;

        if data.is_terminator() {
            self.state = None;
        }
        Ok(())
    }
}

fn apply(
    state: &mut FrameState,
    data: &InstData,
    pos: InstId,
    this_class: &SmolStr,
) -> Result<(), AnalyzeError> {
    match data {
        InstData::Nop | InstData::Label | InstData::Line(_) | InstData::Frame(_) => {}

        InstData::Const(value) => state.stack.push(match value {
            Const::Null => VType::Null,
            Const::Int(_) => VType::Int,
            Const::Long(_) => VType::Long,
            Const::Float(_) => VType::Float,
            Const::Double(_) => VType::Double,
            Const::String(_) => VType::object("java/lang/String"),
            Const::Class(_) => VType::object("java/lang/Class"),
        }),

        InstData::Load { kind, slot } => {
            let ty = match kind {
                ValueKind::Ref => match state.local(*slot) {
                    ty if ty.is_reference() => ty.clone(),
                    _ => VType::object("java/lang/Object"),
                },
                kind => kind_vtype(*kind),
            };
            state.stack.push(ty);
        }

        InstData::Store { kind, slot } => {
            let value = state.pop(pos)?;
            let ty = match kind {
                ValueKind::Ref => value,
                kind => kind_vtype(*kind),
            };
            state.set_local(*slot, ty);
        }

        InstData::Iinc { .. } => {}

        InstData::Binary { kind, .. } => {
            state.pop_n(2, pos)?;
            state.stack.push(kind_vtype(*kind));
        }

        InstData::Neg(kind) => {
            state.pop(pos)?;
            state.stack.push(kind_vtype(*kind));
        }

        InstData::Convert(op) => {
            state.pop(pos)?;
            state.stack.push(kind_vtype(op.from_to().1));
        }

        InstData::Compare(_) => {
            state.pop_n(2, pos)?;
            state.stack.push(VType::Int);
        }

        InstData::Stack(op) => apply_stack_op(state, *op, pos)?,

        InstData::ArrayLoad(kind) => {
            state.pop(pos)?;
            let array = state.pop(pos)?;
            let elem = match kind {
                ArrayKind::Ref => array_element(&array),
                kind => kind_vtype(kind.value_kind()),
            };
            state.stack.push(elem);
        }

        InstData::ArrayStore(_) => state.pop_n(3, pos)?,

        InstData::ArrayLength => {
            state.pop(pos)?;
            state.stack.push(VType::Int);
        }

        InstData::NewArray(elem) => {
            state.pop(pos)?;
            state.stack.push(VType::Object(format!("[{elem}").into()));
        }

        InstData::Field { op, ty, .. } => {
            match op {
                FieldOp::GetStatic => {}
                FieldOp::PutStatic => {
                    state.pop(pos)?;
                }
                FieldOp::GetField => {
                    state.pop(pos)?;
                }
                FieldOp::PutField => state.pop_n(2, pos)?,
            }
            if op.is_read() {
                state.stack.extend(ty.vtype());
            }
        }

        InstData::Invoke {
            kind, owner, name, desc, ..
        } => {
            state.pop_n(desc.params.len(), pos)?;
            if *kind != InvokeKind::Static {
                let receiver = state.pop(pos)?;
                if *kind == InvokeKind::Special && name == "<init>" {
                    let initialized = match &receiver {
                        VType::UninitializedThis => VType::Object(this_class.clone()),
                        _ => VType::Object(owner.clone()),
                    };
                    if matches!(
                        receiver,
                        VType::UninitializedThis | VType::Uninitialized(_)
                    ) {
                        state.replace_all(&receiver, &initialized);
                    }
                }
            }
            state.stack.extend(desc.ret.vtype());
        }

        InstData::New(_) => state.stack.push(VType::Uninitialized(pos)),

        InstData::CheckCast(ty) => {
            let value = state.pop(pos)?;
            state.stack.push(if value == VType::Null {
                VType::Null
            } else {
                VType::Object(ty.class_ref())
            });
        }

        InstData::InstanceOf(_) => {
            state.pop(pos)?;
            state.stack.push(VType::Int);
        }

        InstData::Jump { cond, .. } => state.pop_n(cond.operands(), pos)?,

        InstData::Switch { .. } => {
            state.pop(pos)?;
        }

        InstData::Return(kind) => {
            if kind.is_some() {
                state.pop(pos)?;
            }
        }

        InstData::Throw => {
            state.pop(pos)?;
        }
    }

    Ok(())
}

fn apply_stack_op(state: &mut FrameState, op: StackOp, pos: InstId) -> Result<(), AnalyzeError> {
    match op {
        StackOp::Pop => {
            if state.pop(pos)?.is_wide() {
                return Err(AnalyzeError::InvalidOperands { pos });
            }
        }
        StackOp::Pop2 => {
            state.pop_words(2, pos)?;
        }
        StackOp::Swap => {
            let a = state.pop(pos)?;
            let b = state.pop(pos)?;
            if a.is_wide() || b.is_wide() {
                return Err(AnalyzeError::InvalidOperands { pos });
            }
            state.stack.push(a);
            state.stack.push(b);
        }
        _ => {
            let (words, under) = op
                .dup_shape()
                .ok_or(AnalyzeError::InvalidOperands { pos })?;
            let top = state.pop_words(words, pos)?;
            let below = state.pop_words(under, pos)?;
            state.stack.extend(top.iter().cloned());
            state.stack.extend(below);
            state.stack.extend(top);
        }
    }
    Ok(())
}

fn kind_vtype(kind: ValueKind) -> VType {
    match kind {
        ValueKind::Int => VType::Int,
        ValueKind::Long => VType::Long,
        ValueKind::Float => VType::Float,
        ValueKind::Double => VType::Double,
        ValueKind::Ref => VType::object("java/lang/Object"),
    }
}

fn array_element(array: &VType) -> VType {
    match array {
        VType::Object(name) if name.starts_with('[') => name[1..]
            .parse::<Type>()
            .ok()
            .and_then(|ty| ty.vtype())
            .unwrap_or_else(|| VType::object("java/lang/Object")),
        VType::Null => VType::Null,
        _ => VType::object("java/lang/Object"),
    }
}

/// Type state before and after every instruction where it is known.
#[derive(Debug, Default)]
pub struct BodyAnalysis {
    before: FxHashMap<InstId, FrameState>,
    after: FxHashMap<InstId, FrameState>,
}

impl BodyAnalysis {
    pub fn compute(body: &MethodBody) -> Result<Self, AnalyzeError> {
        let mut label_states: FxHashMap<InstId, FrameState> = FxHashMap::default();
        let mut analysis = Self::default();

        // Each pass may discover states for labels only reachable by jumps;
        // a pass without discoveries is final.
        loop {
            analysis.before.clear();
            analysis.after.clear();
            let mut changed = false;
            let mut cursor = FrameCursor::new(body);

            for inst in body.iter_inst() {
                let data = body.inst(inst);
                if data.is_label() && cursor.state().is_none() {
                    if let Some(state) = label_states.get(&inst) {
                        cursor.set_state(Some(state.clone()));
                    }
                }

                if let Some(state) = cursor.state() {
                    analysis.before.insert(inst, state.clone());
                    changed |= record_edges(body, inst, data, state, &mut label_states);
                }

                cursor.step(body, inst)?;
                if let Some(state) = cursor.state() {
                    analysis.after.insert(inst, state.clone());
                }
            }

            if !changed {
                return Ok(analysis);
            }
        }
    }

    pub fn state_before(&self, inst: InstId) -> Option<&FrameState> {
        self.before.get(&inst)
    }

    pub fn state_after(&self, inst: InstId) -> Option<&FrameState> {
        self.after.get(&inst)
    }

    /// Like [`Self::state_before`], reporting why no state is available.
    pub fn require_before(
        &self,
        body: &MethodBody,
        pos: InstId,
    ) -> Result<FrameState, AnalyzeError> {
        if let Some(state) = self.before.get(&pos) {
            return Ok(state.clone());
        }

        let mut cur = body.layout.prev_inst_of(pos);
        while let Some(inst) = cur {
            let data = body.inst(inst);
            if data.is_label() {
                return Err(AnalyzeError::NoTypeState { pos });
            }
            if data.is_terminator() {
                return Err(AnalyzeError::NoLabelBefore { pos });
            }
            cur = body.layout.prev_inst_of(inst);
        }
        Err(AnalyzeError::NoTypeState { pos })
    }
}

fn record_edges(
    body: &MethodBody,
    inst: InstId,
    data: &InstData,
    state: &FrameState,
    label_states: &mut FxHashMap<InstId, FrameState>,
) -> bool {
    let mut changed = false;
    let mut record = |label: InstId, state: FrameState| {
        if let std::collections::hash_map::Entry::Vacant(entry) = label_states.entry(label) {
            entry.insert(state);
            changed = true;
        }
    };

    match data {
        InstData::Jump { cond, dest } => {
            let mut taken = state.clone();
            let keep = taken.stack.len().saturating_sub(cond.operands());
            taken.stack.truncate(keep);
            record(*dest, taken);
        }
        InstData::Switch { .. } => {
            let mut taken = state.clone();
            taken.stack.pop();
            for dest in data.branch_targets() {
                record(dest, taken.clone());
            }
        }
        InstData::Label => {
            for tc in body.try_catch.iter().filter(|tc| tc.start == inst) {
                let caught = tc
                    .catch_type
                    .clone()
                    .unwrap_or_else(|| "java/lang/Throwable".into());
                record(
                    tc.handler,
                    FrameState {
                        locals: state.locals.clone(),
                        stack: vec![VType::Object(caught)],
                    },
                );
            }
        }
        _ => {}
    }

    changed
}

/// State immediately before `pos`, falling back to states derived at the
/// nearest preceding label.
pub fn analyze_before(body: &MethodBody, pos: InstId) -> Result<FrameState, AnalyzeError> {
    BodyAnalysis::compute(body)?.require_before(body, pos)
}

/// State immediately after `pos` executes.
pub fn analyze_after(body: &MethodBody, pos: InstId) -> Result<FrameState, AnalyzeError> {
    let analysis = BodyAnalysis::compute(body)?;
    analysis
        .state_after(pos)
        .cloned()
        .ok_or(AnalyzeError::NoTypeState { pos })
}

/// The full form of the frame at `pos`, expanded against the frames before it.
pub fn full_frame_at(body: &MethodBody, pos: InstId) -> Result<Frame, AnalyzeError> {
    let mut prev = FrameState::entry(&body.sig).locals;
    for inst in body.iter_inst() {
        let InstData::Frame(frame) = body.inst(inst) else {
            continue;
        };
        let (locals, stack) =
            expand_frame(&prev, frame).ok_or(AnalyzeError::ChopUnderflow { pos: inst })?;
        if inst == pos {
            return Ok(Frame::full(collapse_locals(&locals), stack));
        }
        prev = locals;
    }
    Err(AnalyzeError::NoTypeState { pos })
}

/// Rewrites every compact frame in `body` into a full frame.
pub fn normalize_frames(body: &mut MethodBody) -> Result<(), AnalyzeError> {
    let mut prev = FrameState::entry(&body.sig).locals;
    let insts: Vec<_> = body.iter_inst().collect();
    for inst in insts {
        let InstData::Frame(frame) = body.inst(inst) else {
            continue;
        };
        let (locals, stack) =
            expand_frame(&prev, frame).ok_or(AnalyzeError::ChopUnderflow { pos: inst })?;
        let full = Frame::full(collapse_locals(&locals), stack);
        body.replace_inst(inst, InstData::Frame(full));
        prev = locals;
    }
    Ok(())
}

/// Smallest `(max_locals, max_stack)` covering every slot access and every
/// analyzed operand stack in `body`.
pub fn compute_limits(body: &MethodBody) -> Result<(u16, u16), AnalyzeError> {
    let mut max_locals = body.sig.arg_words();
    for inst in body.iter_inst() {
        if let Some((slot, size)) = body.inst(inst).local_slot() {
            max_locals = max_locals.max(slot + size);
        }
    }
    for var in &body.local_vars {
        max_locals = max_locals.max(var.slot + var.ty.size());
    }

    let analysis = BodyAnalysis::compute(body)?;
    let max_stack = body
        .iter_inst()
        .flat_map(|inst| [analysis.state_before(inst), analysis.state_after(inst)])
        .flatten()
        .map(FrameState::stack_size)
        .max()
        .unwrap_or(0);

    Ok((max_locals, max_stack))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        inst::{CmpKind, JumpCond},
        MethodDescriptor,
    };

    fn body(params: &[Type], ret: Type, is_static: bool) -> MethodBody {
        MethodBody::new(MethodSig::new(
            "demo/A",
            "f",
            MethodDescriptor::new(params, ret),
            is_static,
        ))
    }

    #[test]
    fn entry_state_expands_wide_params() {
        let b = body(&[Type::Long, Type::Int], Type::Void, false);
        let state = FrameState::entry(&b.sig);
        assert_eq!(
            state.locals,
            vec![VType::object("demo/A"), VType::Long, VType::Top, VType::Int]
        );
        assert_eq!(
            state.collapsed_locals(),
            vec![VType::object("demo/A"), VType::Long, VType::Int]
        );
        assert_eq!(state.locals_size(), 4);
    }

    #[test]
    fn straight_line_simulation() {
        let mut b = body(&[Type::Int], Type::Long, true);
        b.append_inst_data(InstData::load(ValueKind::Int, 0));
        b.append_inst_data(InstData::Convert(crate::inst::ConvOp::I2L));
        b.append_inst_data(InstData::Stack(StackOp::Dup2));
        let store = b.append_inst_data(InstData::store(ValueKind::Long, 1));
        let ret = b.append_inst_data(InstData::Return(Some(ValueKind::Long)));

        let before_store = analyze_before(&b, store).unwrap();
        assert_eq!(before_store.stack, vec![VType::Long, VType::Long]);
        assert_eq!(before_store.stack_size(), 4);

        let before_ret = analyze_before(&b, ret).unwrap();
        assert_eq!(before_ret.locals, vec![VType::Int, VType::Long, VType::Top]);
        assert_eq!(before_ret.stack, vec![VType::Long]);
        assert!(analyze_after(&b, ret).is_err());
    }

    #[test]
    fn label_state_from_forward_jump() {
        let mut b = body(&[Type::Int], Type::Int, true);
        let l_else = b.make_inst(InstData::Label);
        b.append_inst_data(InstData::load(ValueKind::Int, 0));
        b.append_inst_data(InstData::Jump {
            cond: JumpCond::Zero(CmpKind::Le),
            dest: l_else,
        });
        b.append_inst_data(InstData::Const(Const::Int(1)));
        b.append_inst_data(InstData::Return(Some(ValueKind::Int)));
        b.layout.append_inst(l_else);
        let after_label = b.append_inst_data(InstData::Const(Const::Int(0)));
        b.append_inst_data(InstData::Return(Some(ValueKind::Int)));

        let state = analyze_before(&b, after_label).unwrap();
        assert_eq!(state.locals, vec![VType::Int]);
        assert!(state.stack.is_empty());
    }

    #[test]
    fn unreachable_without_label_is_reported() {
        let mut b = body(&[], Type::Void, true);
        b.append_inst_data(InstData::Return(None));
        let dead = b.append_inst_data(InstData::Nop);
        assert_eq!(
            analyze_before(&b, dead),
            Err(AnalyzeError::NoLabelBefore { pos: dead })
        );
    }

    #[test]
    fn constructor_initializes_uninitialized_entries() {
        let mut b = body(&[], Type::Void, true);
        let new = b.append_inst_data(InstData::New("demo/B".into()));
        b.append_inst_data(InstData::Stack(StackOp::Dup));
        let init = b.append_inst_data(InstData::invoke(
            InvokeKind::Special,
            "demo/B",
            "<init>",
            MethodDescriptor::new(&[], Type::Void),
        ));
        let store = b.append_inst_data(InstData::store(ValueKind::Ref, 0));
        b.append_inst_data(InstData::Return(None));

        let before_init = analyze_before(&b, init).unwrap();
        assert_eq!(
            before_init.stack,
            vec![VType::Uninitialized(new), VType::Uninitialized(new)]
        );
        let before_store = analyze_before(&b, store).unwrap();
        assert_eq!(before_store.stack, vec![VType::object("demo/B")]);
    }

    #[test]
    fn compact_frames_normalize() {
        let mut b = body(&[Type::Int], Type::Void, true);
        b.append_inst_data(InstData::Frame(Frame::Append(vec![VType::Float])));
        let same = b.append_inst_data(InstData::Frame(Frame::Same1(VType::Int)));
        let chop = b.append_inst_data(InstData::Frame(Frame::Chop(1)));
        b.append_inst_data(InstData::Return(None));

        assert_eq!(
            full_frame_at(&b, same).unwrap(),
            Frame::full(vec![VType::Int, VType::Float], vec![VType::Int])
        );

        normalize_frames(&mut b).unwrap();
        assert!(matches!(
            b.inst(chop),
            InstData::Frame(Frame::Full { locals, stack }) if locals == &vec![VType::Int] && stack.is_empty()
        ));
    }

    #[test]
    fn chop_underflow() {
        let mut b = body(&[], Type::Void, true);
        let frame = b.append_inst_data(InstData::Frame(Frame::Chop(2)));
        assert_eq!(
            BodyAnalysis::compute(&b).err(),
            Some(AnalyzeError::ChopUnderflow { pos: frame })
        );
    }
}
