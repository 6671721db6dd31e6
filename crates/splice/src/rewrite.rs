//! Streams handler instructions into blocks of target instructions.
use cranelift_entity::{packed_option::PackedOption, SecondaryMap};
use rustc_hash::FxHashMap;
use stitch_ir::{BodyAnalysis, Frame, FrameState, InstData, InstId, MethodBody, Type, VType};
use tracing::trace;

use crate::{
    marker::{MarkerKind, MarkerScan},
    remap::SlotRemap,
    surface::SurfaceKind,
    SpliceError,
};

pub(crate) struct EmitPlan<'a> {
    /// The handler with every frame in full form.
    pub handler: &'a MethodBody,
    pub markers: &'a MarkerScan,
    pub remap: &'a SlotRemap,
    pub surface: SurfaceKind,
    /// Return type of the target, emitted for `cancel`.
    pub target_ret: &'a Type,
    /// Jump marker call to the resolved structural label.
    pub jump_dests: &'a FxHashMap<InstId, InstId>,
    /// Expanded target locals live throughout the handler code.
    pub frame_prefix: &'a [VType],
    pub end_label: InstId,
    /// Handler returns jump to the end label instead of falling through.
    pub has_end: bool,
    /// The target carries frames; handler frames are dropped otherwise.
    pub emit_frames: bool,
    /// The target's `new` for a construct surface. Its uninitialized pair sits
    /// where the handler holds the callsite handle.
    pub new_site: Option<InstId>,
}

pub(crate) struct Emitted {
    /// Instructions created in the target, not yet inserted.
    pub blocks: Vec<Vec<InstId>>,
    /// Handler label or `new` site to its copy in the target.
    pub refs: SecondaryMap<InstId, PackedOption<InstId>>,
}

pub(crate) fn emit(target: &mut MethodBody, plan: &EmitPlan) -> Result<Emitted, SpliceError> {
    let mut rewriter = Rewriter::new(target, plan)?;
    rewriter.run()?;
    Ok(Emitted {
        blocks: rewriter.blocks,
        refs: rewriter.refs,
    })
}

struct Rewriter<'a, 'p> {
    target: &'a mut MethodBody,
    plan: &'a EmitPlan<'p>,
    blocks: Vec<Vec<InstId>>,
    refs: SecondaryMap<InstId, PackedOption<InstId>>,
    /// The invoke of the open `cancel` marker.
    pending_cancel: Option<InstId>,
    /// The invoke closing the open `blackhole` marker.
    blackhole: Option<InstId>,
    /// Dropping everything up to the handler's next return.
    suppressing: bool,
    /// The `athrow` after a rewritten jump marker.
    skip: Option<InstId>,
    /// Handler type states, needed to place handler frames.
    analysis: Option<BodyAnalysis>,
    /// The method handle of the open declare, which the target never pushes.
    handle: Option<OpenHandle>,
}

#[derive(Debug, Clone, Copy)]
struct OpenHandle {
    /// The invoke consuming the handle.
    close: InstId,
    /// Stack entry of the handle in handler frames.
    index: usize,
    /// Replaced by the uninitialized pair of this `new` instead of removed.
    new_site: Option<InstId>,
}

impl<'a, 'p> Rewriter<'a, 'p> {
    fn new(target: &'a mut MethodBody, plan: &'a EmitPlan<'p>) -> Result<Self, SpliceError> {
        // Labels and `new` sites are created up front so that any reference
        // to them can be rewritten when it is first met.
        let handler = plan.handler;
        let mut refs = SecondaryMap::new();
        for inst in handler.iter_inst() {
            let data = handler.inst(inst);
            if matches!(data, InstData::Label | InstData::New(_)) {
                refs[inst] = target.make_inst(data.clone()).into();
            }
        }

        let analysis = if plan.emit_frames && handler.has_frames() {
            Some(BodyAnalysis::compute(handler)?)
        } else {
            None
        };

        Ok(Self {
            target,
            plan,
            blocks: vec![Vec::new()],
            refs,
            pending_cancel: None,
            blackhole: None,
            suppressing: false,
            skip: None,
            analysis,
            handle: None,
        })
    }

    fn run(&mut self) -> Result<(), SpliceError> {
        let markers = self.plan.markers;
        let declare = markers.callsite_declare();
        let invoke = markers.callsite_invoke();

        let insts: Vec<_> = self.plan.handler.iter_inst().collect();
        for inst in insts {
            if Some(inst) == declare {
                if self.plan.surface == SurfaceKind::Construct {
                    self.step();
                }
                if let Some(close) = invoke {
                    self.open_handle(inst, close, self.plan.new_site)?;
                }
            } else if Some(inst) == invoke {
                self.handle = None;
                self.step();
            } else {
                self.next(inst)?;
            }
        }

        if self.blocks.len() != self.plan.surface.block_count() {
            return Err(SpliceError::internal(format!(
                "handler split into {} blocks for the {} surface",
                self.blocks.len(),
                self.plan.surface
            )));
        }

        let end = self.plan.end_label;
        self.push(end);
        Ok(())
    }

    fn step(&mut self) {
        trace!(block = self.blocks.len(), "callsite boundary");
        self.blocks.push(Vec::new());
    }

    fn next(&mut self, inst: InstId) -> Result<(), SpliceError> {
        let data = self.plan.handler.inst(inst);

        if self.suppressing {
            match data {
                InstData::Return(_) | InstData::Throw => {
                    trace!(%inst, "cancel window closed");
                    self.suppressing = false;
                }
                InstData::Label | InstData::Frame(_) => self.emit(inst)?,
                _ => {}
            }
            return Ok(());
        }

        if let Some(close) = self.blackhole {
            if close == inst {
                self.blackhole = None;
            } else if data.is_label() {
                self.emit(inst)?;
            }
            return Ok(());
        }

        if self.pending_cancel == Some(inst) {
            self.pending_cancel = None;
            self.handle = None;
            self.suppressing = true;
            let ret = self.plan.target_ret.value_kind();
            trace!(%inst, "cancel returns from the target");
            let ret = self.target.make_inst(InstData::Return(ret));
            self.push(ret);
            return Ok(());
        }

        if self.skip == Some(inst) {
            self.skip = None;
            return Ok(());
        }

        let markers = self.plan.markers;
        match markers.declare_kind(inst) {
            Some(MarkerKind::Cancel) if self.pending_cancel.is_none() => {
                self.pending_cancel = markers.cancels.get(&inst).copied();
                if let Some(close) = self.pending_cancel {
                    self.open_handle(inst, close, None)?;
                }
                Ok(())
            }
            Some(MarkerKind::Blackhole) => {
                self.blackhole = markers.blackholes.get(&inst).copied();
                Ok(())
            }
            Some(MarkerKind::Jump(kind)) => {
                let dest = self.plan.jump_dests.get(&inst).copied().ok_or_else(|| {
                    SpliceError::internal(format!("unresolved {kind:?} jump at {inst}"))
                })?;
                self.skip = markers.jumps.get(&inst).map(|(_, throw)| *throw);
                let jump = self.target.make_inst(InstData::goto(dest));
                self.push(jump);
                Ok(())
            }
            _ => self.emit(inst),
        }
    }

    fn emit(&mut self, inst: InstId) -> Result<(), SpliceError> {
        let plan = self.plan;
        let data = plan.handler.inst(inst);
        match data {
            InstData::Label | InstData::New(_) => {
                let copy = self.copy_of(inst)?;
                self.push(copy);
            }

            InstData::Line(_) => {}

            InstData::Return(_) => {
                if plan.has_end {
                    let jump = self.target.make_inst(InstData::goto(plan.end_label));
                    self.push(jump);
                }
            }

            InstData::Load { .. } | InstData::Store { .. } | InstData::Iinc { .. } => {
                let mut copy = data.clone();
                if let Some((slot, _)) = data.local_slot() {
                    let mapped = plan.remap.get(slot).ok_or_else(|| {
                        SpliceError::internal(format!("handler slot {slot} has no target slot"))
                    })?;
                    copy.set_local_slot(mapped);
                }
                let copy = self.target.make_inst(copy);
                self.push(copy);
            }

            InstData::Frame(_) if !plan.emit_frames => {}

            InstData::Frame(frame) => {
                let frame = self.remap_frame(frame)?;
                let copy = self.target.make_inst(InstData::Frame(frame));
                self.push(copy);
            }

            _ => {
                let mut copy = data.clone();
                self.map_refs(&mut copy)?;
                let copy = self.target.make_inst(copy);
                self.push(copy);
            }
        }
        Ok(())
    }

    fn open_handle(
        &mut self,
        declare: InstId,
        close: InstId,
        new_site: Option<InstId>,
    ) -> Result<(), SpliceError> {
        let Some(analysis) = &self.analysis else {
            return Ok(());
        };
        let index = analysis
            .require_before(self.plan.handler, declare)?
            .stack
            .len();
        trace!(%declare, index, "handle opened");
        self.handle = Some(OpenHandle {
            close,
            index,
            new_site,
        });
        Ok(())
    }

    /// Places the handler's fresh-block locals over the target locals and
    /// drops the handle of an open declare from the stack.
    fn remap_frame(&self, frame: &Frame) -> Result<Frame, SpliceError> {
        let mut data = InstData::Frame(frame.clone());
        self.map_refs(&mut data)?;
        let InstData::Frame(Frame::Full { locals, mut stack }) = data else {
            return Err(SpliceError::internal("handler frame is not normalized"));
        };

        if let Some(handle) = self.handle {
            if handle.index >= stack.len() {
                return Err(SpliceError::internal(format!(
                    "handler frame inside the declare closed by {} lacks its handle",
                    handle.close
                )));
            }
            stack.remove(handle.index);
            if let Some(site) = handle.new_site {
                stack.insert(handle.index, VType::Uninitialized(site));
                stack.insert(handle.index, VType::Uninitialized(site));
            }
        }

        let mut state = FrameState {
            locals: self.plan.frame_prefix.to_vec(),
            stack,
        };
        let mut slot = 0;
        for ty in locals {
            let size = ty.size();
            if ty != VType::Top {
                let mapped = self.plan.remap.get(slot).ok_or_else(|| {
                    SpliceError::internal(format!("handler frame slot {slot} has no target slot"))
                })?;
                if mapped >= self.plan.remap.fresh_start {
                    state.set_local(mapped, ty);
                }
            }
            slot += size;
        }

        Ok(state.to_frame())
    }

    fn map_refs(&self, data: &mut InstData) -> Result<(), SpliceError> {
        let mut missing = None;
        data.map_refs(|inst| match self.refs[inst].expand() {
            Some(copy) => copy,
            None => {
                missing = Some(inst);
                inst
            }
        });
        match missing {
            Some(inst) => Err(SpliceError::internal(format!(
                "handler reference to {inst} has no copy"
            ))),
            None => Ok(()),
        }
    }

    fn copy_of(&self, inst: InstId) -> Result<InstId, SpliceError> {
        self.refs[inst]
            .expand()
            .ok_or_else(|| SpliceError::internal(format!("{inst} was not copied")))
    }

    fn push(&mut self, inst: InstId) {
        if let Some(block) = self.blocks.last_mut() {
            block.push(inst);
        }
    }
}
