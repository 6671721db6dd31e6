use crate::{inst::InstData, InstId, MethodBody};

#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorLocation {
    At(InstId),
    /// Before the first instruction.
    Top,
    #[default]
    NoWhere,
}

/// Positioned insertion into a method body. Each insertion happens after the
/// current location and moves the cursor onto the inserted instruction, so
/// consecutive inserts keep their order.
pub trait BodyCursor {
    fn at_location(loc: CursorLocation) -> Self;
    fn set_location(&mut self, loc: CursorLocation);
    fn loc(&self) -> CursorLocation;

    /// Places the cursor so that the next insertion lands right before
    /// `inst`.
    fn set_before(&mut self, body: &MethodBody, inst: InstId) {
        let loc = match body.layout.prev_inst_of(inst) {
            Some(prev) => CursorLocation::At(prev),
            None => CursorLocation::Top,
        };
        self.set_location(loc);
    }

    fn insert_inst(&mut self, body: &mut MethodBody, inst: InstId) {
        match self.loc() {
            CursorLocation::At(at) => body.layout.insert_inst_after(inst, at),
            CursorLocation::Top => body.layout.prepend_inst(inst),
            CursorLocation::NoWhere => panic!("cursor loc points to `NoWhere`"),
        }
        self.set_location(CursorLocation::At(inst));
    }

    fn insert_inst_data(&mut self, body: &mut MethodBody, data: InstData) -> InstId {
        let inst = body.make_inst(data);
        self.insert_inst(body, inst);
        inst
    }

    fn insert_all(&mut self, body: &mut MethodBody, insts: &[InstId]) {
        for &inst in insts {
            self.insert_inst(body, inst);
        }
    }

    fn remove_inst(&mut self, body: &mut MethodBody) {
        let inst = self.expect_inst();
        let prev = body
            .layout
            .prev_inst_of(inst)
            .map_or(CursorLocation::Top, CursorLocation::At);
        body.layout.remove_inst(inst);
        self.set_location(prev);
    }

    fn inst(&self) -> Option<InstId> {
        if let CursorLocation::At(inst) = self.loc() {
            Some(inst)
        } else {
            None
        }
    }

    fn expect_inst(&self) -> InstId {
        self.inst()
            .expect("current cursor location doesn't point to inst")
    }
}

#[derive(Debug, Default)]
pub struct InstInserter {
    loc: CursorLocation,
}

impl BodyCursor for InstInserter {
    fn at_location(loc: CursorLocation) -> Self {
        Self { loc }
    }

    fn set_location(&mut self, loc: CursorLocation) {
        self.loc = loc;
    }

    fn loc(&self) -> CursorLocation {
        self.loc
    }
}
