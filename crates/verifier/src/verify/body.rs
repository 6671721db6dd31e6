use rustc_hash::FxHashMap;
use stitch_ir::{
    analysis::{expand_frame, BodyAnalysis},
    inst::InstData,
    ir_writer::BodyWriter,
    AnalyzeError, FrameState, InstId, MethodBody, MethodKey, VType,
};

use crate::{
    diagnostic::{Diagnostic, DiagnosticCode, DiagnosticContext, Location},
    report::VerificationReport,
    VerifierConfig,
};

pub(super) fn verify_body(body: &MethodBody, cfg: &VerifierConfig) -> VerificationReport {
    let mut verifier = BodyVerifier::new(body, cfg);
    verifier.run();
    verifier.report
}

struct BodyVerifier<'a> {
    body: &'a MethodBody,
    cfg: &'a VerifierConfig,
    key: MethodKey,
    writer: BodyWriter<'a>,
    positions: FxHashMap<InstId, usize>,
    report: VerificationReport,

    refs_ok: bool,
    analysis: Option<BodyAnalysis>,
    /// Expanded state of every frame marker, keyed by the marker.
    frames: FxHashMap<InstId, FrameState>,
}

trait BodyPass {
    fn enabled(_cfg: &VerifierConfig) -> bool {
        true
    }

    fn run(verifier: &mut BodyVerifier<'_>);
}

struct ReferencePass;
struct ControlPass;
struct RangePass;
struct LimitPass;
struct FramePass;

impl BodyPass for ReferencePass {
    fn run(verifier: &mut BodyVerifier<'_>) {
        verifier.check_references();
    }
}

impl BodyPass for ControlPass {
    fn run(verifier: &mut BodyVerifier<'_>) {
        verifier.check_control();
    }
}

impl BodyPass for RangePass {
    fn enabled(cfg: &VerifierConfig) -> bool {
        cfg.should_check_nesting()
    }

    fn run(verifier: &mut BodyVerifier<'_>) {
        verifier.check_ranges();
    }
}

impl BodyPass for LimitPass {
    fn enabled(cfg: &VerifierConfig) -> bool {
        cfg.should_check_limits()
    }

    fn run(verifier: &mut BodyVerifier<'_>) {
        verifier.check_limits();
    }
}

impl BodyPass for FramePass {
    fn enabled(cfg: &VerifierConfig) -> bool {
        cfg.should_check_frames()
    }

    fn run(verifier: &mut BodyVerifier<'_>) {
        verifier.check_frames();
    }
}

impl<'a> BodyVerifier<'a> {
    fn new(body: &'a MethodBody, cfg: &'a VerifierConfig) -> Self {
        Self {
            body,
            cfg,
            key: body.sig.key(),
            writer: BodyWriter::new(body),
            positions: body.positions(),
            report: VerificationReport::default(),
            refs_ok: true,
            analysis: None,
            frames: FxHashMap::default(),
        }
    }

    fn run(&mut self) {
        self.run_pass::<ReferencePass>();
        self.run_pass::<ControlPass>();
        if !self.refs_ok {
            return;
        }
        self.run_pass::<RangePass>();
        self.run_pass::<LimitPass>();
        self.run_pass::<FramePass>();
    }

    fn run_pass<P: BodyPass>(&mut self) {
        if P::enabled(self.cfg) && !self.report.is_full(self.cfg.max_diagnostics) {
            P::run(self);
        }
    }

    fn inst_loc(&self, inst: InstId) -> Location {
        Location::Inst {
            method: self.key.clone(),
            inst,
        }
    }

    fn push(&mut self, diagnostic: Diagnostic) {
        self.report.push(diagnostic, self.cfg.max_diagnostics);
    }

    fn error_at(&mut self, code: DiagnosticCode, inst: InstId, message: impl Into<String>) {
        let text = if self.body.layout.is_inst_inserted(inst) {
            Some(self.writer.inst_text(self.body.inst(inst)))
        } else {
            None
        };
        let diag = Diagnostic::error(code, message, self.inst_loc(inst))
            .with_context(DiagnosticContext { inst_text: text });
        self.push(diag);
    }

    fn error_in_method(&mut self, code: DiagnosticCode, message: impl Into<String>) {
        let diag = Diagnostic::error(code, message, Location::Method(self.key.clone()));
        self.push(diag);
    }

    fn is_inserted_label(&self, inst: InstId) -> bool {
        self.body.insts.is_valid(inst)
            && self.body.layout.is_inst_inserted(inst)
            && self.body.inst(inst).is_label()
    }

    fn check_references(&mut self) {
        let body = self.body;
        for inst in body.iter_inst() {
            let data = body.inst(inst);
            for target in data.branch_targets() {
                if !self.is_inserted_label(target) {
                    self.refs_ok = false;
                    self.error_at(
                        DiagnosticCode::InvalidJumpTarget,
                        inst,
                        format!("jump target {target} is not a label of this body"),
                    );
                }
            }

            if let InstData::Frame(frame) = data {
                let mut missing = vec![];
                frame.for_each_vtype(|ty| {
                    if let VType::Uninitialized(new) = ty {
                        let valid = body.insts.is_valid(*new)
                            && body.layout.is_inst_inserted(*new)
                            && matches!(body.inst(*new), InstData::New(_));
                        if !valid {
                            missing.push(*new);
                        }
                    }
                });
                for new in missing {
                    self.refs_ok = false;
                    self.error_at(
                        DiagnosticCode::InvalidNewRef,
                        inst,
                        format!("uninitialized entry refers to {new}, which is not a `new`"),
                    );
                }
            }
        }

        for (index, tc) in body.try_catch.iter().enumerate() {
            for (what, label) in [
                ("start", tc.start),
                ("end", tc.end),
                ("handler", tc.handler),
            ] {
                if !self.is_inserted_label(label) {
                    self.refs_ok = false;
                    self.error_in_method(
                        DiagnosticCode::InvalidLabelRef,
                        format!("exception range {index}: {what} {label} is not a label of this body"),
                    );
                }
            }
        }

        for var in &body.local_vars {
            for (what, label) in [("start", var.start), ("end", var.end)] {
                if !self.is_inserted_label(label) {
                    self.refs_ok = false;
                    self.error_in_method(
                        DiagnosticCode::InvalidLabelRef,
                        format!(
                            "local `{}`: {what} {label} is not a label of this body",
                            var.name
                        ),
                    );
                }
            }
        }
    }

    fn check_control(&mut self) {
        let body = self.body;
        let Some(last) = body.last_real_inst() else {
            return;
        };
        if !body.inst(last).is_terminator() {
            self.error_at(
                DiagnosticCode::MissingTerminator,
                last,
                "control falls off the end of the body",
            );
        }

        if self.cfg.allow_dead_code || !body.has_frames() {
            return;
        }

        let mut after_transfer = false;
        let mut framed = false;
        for inst in body.iter_inst() {
            let data = body.inst(inst);
            match data {
                InstData::Frame(_) => framed = true,
                InstData::Label | InstData::Line(_) => {}
                _ => {
                    if after_transfer && !framed {
                        self.error_at(
                            DiagnosticCode::DeadCodeWithoutFrame,
                            inst,
                            "instruction after an unconditional transfer has no frame",
                        );
                    }
                    after_transfer = data.is_terminator();
                    framed = false;
                }
            }
        }
    }

    fn check_ranges(&mut self) {
        let body = self.body;
        let mut spans = vec![];
        for (index, tc) in body.try_catch.iter().enumerate() {
            let (start, end) = (self.positions[&tc.start], self.positions[&tc.end]);
            if start >= end {
                self.error_in_method(
                    DiagnosticCode::EmptyRange,
                    format!("exception range {index} does not start before it ends"),
                );
                continue;
            }
            spans.push((index, start, end));
        }

        for (i, &(a, s1, e1)) in spans.iter().enumerate() {
            for &(b, s2, e2) in &spans[i + 1..] {
                let disjoint = e1 <= s2 || e2 <= s1;
                let nested = (s1 <= s2 && e2 <= e1) || (s2 <= s1 && e1 <= e2);
                if !disjoint && !nested {
                    let diag = Diagnostic::error(
                        DiagnosticCode::RangeNotNested,
                        format!("exception ranges {a} and {b} overlap without nesting"),
                        Location::Method(self.key.clone()),
                    )
                    .with_note(format!("range {a} covers [{s1}, {e1})"))
                    .with_note(format!("range {b} covers [{s2}, {e2})"));
                    self.push(diag);
                }
            }
        }

        for var in &body.local_vars {
            if self.positions[&var.start] > self.positions[&var.end] {
                self.error_in_method(
                    DiagnosticCode::EmptyRange,
                    format!("local `{}` ends before it starts", var.name),
                );
            }
        }
    }

    fn analyze(&mut self) -> bool {
        if self.analysis.is_some() {
            return true;
        }
        match BodyAnalysis::compute(self.body) {
            Ok(analysis) => {
                self.analysis = Some(analysis);
                true
            }
            Err(err) => {
                let (code, pos) = match err {
                    AnalyzeError::StackUnderflow { pos } => (DiagnosticCode::StackUnderflow, pos),
                    AnalyzeError::InvalidOperands { pos } => {
                        (DiagnosticCode::InvalidStackOperands, pos)
                    }
                    AnalyzeError::ChopUnderflow { pos } => (DiagnosticCode::InvalidFrame, pos),
                    AnalyzeError::NoTypeState { pos } | AnalyzeError::NoLabelBefore { pos } => {
                        (DiagnosticCode::MissingTypeState, pos)
                    }
                };
                self.error_at(code, pos, err.to_string());
                false
            }
        }
    }

    fn check_limits(&mut self) {
        let body = self.body;
        for inst in body.iter_inst() {
            if let Some((slot, size)) = body.inst(inst).local_slot() {
                if slot + size > body.max_locals {
                    self.error_at(
                        DiagnosticCode::SlotOutOfRange,
                        inst,
                        format!("slot {slot} is out of range (max locals {})", body.max_locals),
                    );
                }
            }
        }
        for var in &body.local_vars {
            if var.slot + var.ty.size() > body.max_locals {
                let diag = Diagnostic::error(
                    DiagnosticCode::SlotOutOfRange,
                    format!(
                        "local `{}` uses slot {} beyond max locals {}",
                        var.name, var.slot, body.max_locals
                    ),
                    Location::Slot {
                        method: self.key.clone(),
                        slot: var.slot,
                    },
                );
                self.push(diag);
            }
        }

        if !self.analyze() {
            return;
        }
        let Some(analysis) = self.analysis.as_ref() else {
            return;
        };
        let overflow = body.iter_inst().find_map(|inst| {
            let depth = analysis.state_after(inst)?.stack_size();
            (depth > body.max_stack).then_some((inst, depth))
        });
        if let Some((inst, depth)) = overflow {
            self.error_at(
                DiagnosticCode::StackOverflow,
                inst,
                format!(
                    "operand stack reaches {depth} words (max stack {})",
                    body.max_stack
                ),
            );
        }
    }

    fn check_frames(&mut self) {
        let body = self.body;
        if !body.has_frames() {
            return;
        }

        let mut prev = FrameState::entry(&body.sig).locals;
        for inst in body.iter_inst() {
            let InstData::Frame(frame) = body.inst(inst) else {
                continue;
            };
            let Some((locals, stack)) = expand_frame(&prev, frame) else {
                self.error_at(
                    DiagnosticCode::InvalidFrame,
                    inst,
                    "frame removes more locals than are defined",
                );
                return;
            };
            prev = locals.clone();
            let state = FrameState { locals, stack };
            if state.locals.len() > body.max_locals as usize
                || state.stack_size() > body.max_stack
            {
                self.error_at(
                    DiagnosticCode::FrameExceedsLimits,
                    inst,
                    format!(
                        "frame holds {} locals and {} stack words (limits {} and {})",
                        state.locals.len(),
                        state.stack_size(),
                        body.max_locals,
                        body.max_stack
                    ),
                );
            }
            self.frames.insert(inst, state);
        }

        if !self.analyze() {
            return;
        }

        self.check_branch_frames();
        self.check_fallthrough_frames();
        self.check_handler_frames();
    }

    /// The frame describing `label`, if one follows it before the next
    /// instruction.
    fn frame_at(&self, label: InstId) -> Option<InstId> {
        let mut cur = Some(label);
        while let Some(inst) = cur {
            match self.body.inst(inst) {
                InstData::Frame(_) => return Some(inst),
                InstData::Label | InstData::Line(_) => {}
                _ => return None,
            }
            cur = self.body.layout.next_inst_of(inst);
        }
        None
    }

    fn check_branch_frames(&mut self) {
        let body = self.body;
        let mut edges = vec![];
        for inst in body.iter_inst() {
            let data = body.inst(inst);
            let popped = match data {
                InstData::Jump { cond, .. } => cond.operands(),
                InstData::Switch { .. } => 1,
                _ => continue,
            };
            for target in data.branch_targets() {
                edges.push((inst, target, popped));
            }
        }

        for (inst, target, popped) in edges {
            let Some(frame) = self.frame_at(target) else {
                self.error_at(
                    DiagnosticCode::MissingFrame,
                    inst,
                    format!("jump target {} has no frame", self.label_name(target)),
                );
                continue;
            };
            let Some(mut state) = self.state_before(inst) else {
                continue;
            };
            let keep = state.stack.len().saturating_sub(popped);
            state.stack.truncate(keep);
            self.compare_with_frame(inst, &state, frame, "jump");
        }
    }

    fn check_fallthrough_frames(&mut self) {
        let body = self.body;
        let frames: Vec<_> = body
            .iter_inst()
            .filter(|inst| self.frames.contains_key(inst))
            .collect();
        for frame in frames {
            if !self.falls_into(frame) {
                continue;
            }
            if let Some(state) = self.state_before(frame) {
                self.compare_with_frame(frame, &state, frame, "fall-through");
            }
        }
    }

    fn check_handler_frames(&mut self) {
        let body = self.body;
        for tc in &body.try_catch {
            let Some(frame) = self.frame_at(tc.handler) else {
                self.error_at(
                    DiagnosticCode::MissingFrame,
                    tc.handler,
                    "exception handler has no frame",
                );
                continue;
            };
            let caught = VType::Object(
                tc.catch_type
                    .clone()
                    .unwrap_or_else(|| "java/lang/Throwable".into()),
            );

            let mut cur = Some(tc.start);
            while let Some(inst) = cur {
                if inst == tc.end {
                    break;
                }
                if let Some(state) = self.state_before(inst) {
                    let state = FrameState {
                        locals: state.locals,
                        stack: vec![caught.clone()],
                    };
                    if !self.compare_with_frame(inst, &state, frame, "exception") {
                        break;
                    }
                }
                cur = body.layout.next_inst_of(inst);
            }
        }
    }

    fn state_before(&self, inst: InstId) -> Option<FrameState> {
        self.analysis.as_ref()?.state_before(inst).cloned()
    }

    /// Whether control reaches `inst` by falling through from the previous
    /// instruction or from method entry.
    fn falls_into(&self, inst: InstId) -> bool {
        let mut cur = self.body.layout.prev_inst_of(inst);
        while let Some(prev) = cur {
            let data = self.body.inst(prev);
            if !data.is_pseudo() {
                return !data.is_terminator();
            }
            cur = self.body.layout.prev_inst_of(prev);
        }
        true
    }

    /// Reports a mismatch between `incoming` at `from` and `frame`; returns
    /// `false` if one was found.
    fn compare_with_frame(
        &mut self,
        from: InstId,
        incoming: &FrameState,
        frame: InstId,
        edge: &str,
    ) -> bool {
        let Some(expected) = self.frames.get(&frame) else {
            return true;
        };
        let Some(mismatch) = mismatch(incoming, expected) else {
            return true;
        };

        let text = self.writer.inst_text(self.body.inst(frame));
        let diag = Diagnostic::error(
            DiagnosticCode::FrameMismatch,
            format!("{edge} state does not match the frame: {mismatch}"),
            self.inst_loc(frame),
        )
        .with_context(DiagnosticContext {
            inst_text: Some(text),
        })
        .with_note(format!(
            "state from {}: locals {} stack {}",
            from,
            list(&incoming.collapsed_locals()),
            list(&incoming.stack)
        ));
        self.push(diag);
        false
    }

    fn label_name(&self, label: InstId) -> String {
        if self.is_inserted_label(label) {
            let pos = self.positions[&label];
            format!("{label} (position {pos})")
        } else {
            label.to_string()
        }
    }
}

fn mismatch(incoming: &FrameState, frame: &FrameState) -> Option<String> {
    if incoming.stack.len() != frame.stack.len() {
        return Some(format!(
            "stack holds {} values, frame expects {}",
            incoming.stack.len(),
            frame.stack.len()
        ));
    }
    for (i, (actual, expected)) in incoming.stack.iter().zip(&frame.stack).enumerate() {
        if !actual.is_assignable_to(expected) {
            return Some(format!("stack entry {i} is {actual}, frame expects {expected}"));
        }
    }
    for (slot, expected) in frame.locals.iter().enumerate() {
        let actual = incoming.locals.get(slot).unwrap_or(&VType::Top);
        if !actual.is_assignable_to(expected) {
            return Some(format!("local {slot} is {actual}, frame expects {expected}"));
        }
    }
    None
}

fn list(tys: &[VType]) -> String {
    let items: Vec<_> = tys.iter().map(ToString::to_string).collect();
    format!("[{}]", items.join(", "))
}
