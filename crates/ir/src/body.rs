use cranelift_entity::{entity_impl, PrimaryMap};
use indexmap::IndexMap;
use rustc_hash::FxHashMap;
use smol_str::SmolStr;

use crate::{inst::InstData, types::MethodDescriptor, InstId, Layout, Type};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodSig {
    pub owner: SmolStr,
    pub name: SmolStr,
    pub desc: MethodDescriptor,
    pub is_static: bool,
}

impl MethodSig {
    pub fn new(owner: &str, name: &str, desc: MethodDescriptor, is_static: bool) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
            desc,
            is_static,
        }
    }

    pub fn is_constructor(&self) -> bool {
        self.name == "<init>"
    }

    /// Local slot of each parameter, skipping the receiver if any.
    pub fn param_slots(&self) -> Vec<u16> {
        let mut slot = self.receiver_words();
        self.desc
            .params
            .iter()
            .map(|ty| {
                let current = slot;
                slot += ty.size();
                current
            })
            .collect()
    }

    pub fn receiver_words(&self) -> u16 {
        if self.is_static {
            0
        } else {
            1
        }
    }

    /// Slots taken by the receiver and all parameters.
    pub fn arg_words(&self) -> u16 {
        self.receiver_words() + self.desc.param_words()
    }

    pub fn key(&self) -> MethodKey {
        MethodKey {
            owner: self.owner.clone(),
            name: self.name.clone(),
            desc: self.desc.to_string().into(),
        }
    }
}

/// Identity of a method: owner, name and descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodKey {
    pub owner: SmolStr,
    pub name: SmolStr,
    pub desc: SmolStr,
}

impl MethodKey {
    pub fn new(owner: &str, name: &str, desc: &str) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
            desc: desc.into(),
        }
    }
}

/// Debug metadata for a local variable. `start` and `end` are labels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalVarEntry {
    pub name: SmolStr,
    pub ty: Type,
    pub start: InstId,
    pub end: InstId,
    pub slot: u16,
    /// Set for persistent slots allocated by an injection, holding the
    /// allocation name.
    pub allocated: Option<SmolStr>,
}

/// An exception range. `start`, `end` and `handler` are labels; a `None`
/// catch type catches everything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TryCatch {
    pub start: InstId,
    pub end: InstId,
    pub handler: InstId,
    pub catch_type: Option<SmolStr>,
}

/// How a handler parameter that is neither an injection argument nor a
/// mirror of the target's parameters finds its slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalBinding {
    /// The n-th live local of the same type at the anchor; negative values
    /// count from the end.
    Ordinal(i32),
    /// A persistent slot shared by every injection using the same name.
    Allocate(SmolStr),
}

#[derive(Debug, Clone)]
pub struct MethodBody {
    pub sig: MethodSig,
    pub insts: PrimaryMap<InstId, InstData>,
    pub layout: Layout,
    pub max_locals: u16,
    pub max_stack: u16,
    pub local_vars: Vec<LocalVarEntry>,
    pub try_catch: Vec<TryCatch>,
    /// Binding directives keyed by parameter index.
    pub bindings: FxHashMap<usize, LocalBinding>,
}

impl MethodBody {
    pub fn new(sig: MethodSig) -> Self {
        let max_locals = sig.arg_words();
        Self {
            sig,
            insts: PrimaryMap::new(),
            layout: Layout::new(),
            max_locals,
            max_stack: 0,
            local_vars: Vec::new(),
            try_catch: Vec::new(),
            bindings: FxHashMap::default(),
        }
    }

    pub fn make_inst(&mut self, data: InstData) -> InstId {
        self.insts.push(data)
    }

    pub fn append_inst_data(&mut self, data: InstData) -> InstId {
        let inst = self.make_inst(data);
        self.layout.append_inst(inst);
        inst
    }

    pub fn inst(&self, inst: InstId) -> &InstData {
        &self.insts[inst]
    }

    pub fn inst_mut(&mut self, inst: InstId) -> &mut InstData {
        &mut self.insts[inst]
    }

    pub fn replace_inst(&mut self, inst: InstId, data: InstData) {
        self.insts[inst] = data;
    }

    pub fn iter_inst(&self) -> impl Iterator<Item = InstId> + '_ {
        self.layout.iter_inst()
    }

    /// Stream order of every inserted instruction.
    pub fn positions(&self) -> FxHashMap<InstId, usize> {
        self.iter_inst()
            .enumerate()
            .map(|(pos, inst)| (inst, pos))
            .collect()
    }

    /// The last instruction that is not a label, frame or line marker.
    pub fn last_real_inst(&self) -> Option<InstId> {
        let mut cur = self.layout.last_inst();
        while let Some(inst) = cur {
            if !self.insts[inst].is_pseudo() {
                return Some(inst);
            }
            cur = self.layout.prev_inst_of(inst);
        }
        None
    }

    pub fn has_frames(&self) -> bool {
        self.iter_inst()
            .any(|inst| matches!(self.insts[inst], InstData::Frame(_)))
    }

    pub fn is_static(&self) -> bool {
        self.sig.is_static
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MethodRef(pub u32);
entity_impl!(MethodRef, "method");

/// A set of method bodies addressable by [`MethodKey`].
#[derive(Debug, Clone, Default)]
pub struct Module {
    pub bodies: PrimaryMap<MethodRef, MethodBody>,
    index: IndexMap<MethodKey, MethodRef>,
}

impl Module {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, body: MethodBody) -> MethodRef {
        let key = body.sig.key();
        let method = self.bodies.push(body);
        self.index.insert(key, method);
        method
    }

    pub fn lookup(&self, key: &MethodKey) -> Option<MethodRef> {
        self.index.get(key).copied()
    }

    pub fn lookup_by_name(&self, owner: &str, name: &str) -> Option<MethodRef> {
        self.index
            .iter()
            .find(|(key, _)| key.owner == owner && key.name == name)
            .map(|(_, method)| *method)
    }

    pub fn methods(&self) -> impl Iterator<Item = MethodRef> + '_ {
        self.bodies.keys()
    }

    pub fn body(&self, method: MethodRef) -> &MethodBody {
        &self.bodies[method]
    }

    pub fn body_mut(&mut self, method: MethodRef) -> &mut MethodBody {
        &mut self.bodies[method]
    }
}
