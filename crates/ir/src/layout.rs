//! Instruction order of a method body.
use cranelift_entity::SecondaryMap;

use super::InstId;

#[derive(Debug, Clone, Default)]
pub struct Layout {
    insts: SecondaryMap<InstId, InstNode>,
    first_inst: Option<InstId>,
    last_inst: Option<InstId>,
}

impl Layout {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn first_inst(&self) -> Option<InstId> {
        self.first_inst
    }

    pub fn last_inst(&self) -> Option<InstId> {
        self.last_inst
    }

    pub fn is_empty(&self) -> bool {
        self.first_inst.is_none()
    }

    pub fn prev_inst_of(&self, inst: InstId) -> Option<InstId> {
        debug_assert!(self.is_inst_inserted(inst));
        self.insts[inst].prev
    }

    pub fn next_inst_of(&self, inst: InstId) -> Option<InstId> {
        debug_assert!(self.is_inst_inserted(inst));
        self.insts[inst].next
    }

    pub fn is_inst_inserted(&self, inst: InstId) -> bool {
        self.insts[inst].inserted
    }

    pub fn iter_inst(&self) -> InstIter<'_> {
        InstIter {
            next: self.first_inst,
            insts: &self.insts,
        }
    }

    /// Iterates from `inst` (inclusive) to the end of the stream.
    pub fn iter_from(&self, inst: InstId) -> InstIter<'_> {
        debug_assert!(self.is_inst_inserted(inst));
        InstIter {
            next: Some(inst),
            insts: &self.insts,
        }
    }

    pub fn append_inst(&mut self, inst: InstId) {
        debug_assert!(!self.is_inst_inserted(inst));

        let mut inst_node = InstNode::inserted();
        if let Some(last_inst) = self.last_inst {
            inst_node.prev = Some(last_inst);
            self.insts[last_inst].next = Some(inst);
        } else {
            self.first_inst = Some(inst);
        }

        self.last_inst = Some(inst);
        self.insts[inst] = inst_node;
    }

    pub fn prepend_inst(&mut self, inst: InstId) {
        debug_assert!(!self.is_inst_inserted(inst));

        let mut inst_node = InstNode::inserted();
        if let Some(first_inst) = self.first_inst {
            inst_node.next = Some(first_inst);
            self.insts[first_inst].prev = Some(inst);
        } else {
            self.last_inst = Some(inst);
        }

        self.first_inst = Some(inst);
        self.insts[inst] = inst_node;
    }

    pub fn insert_inst_before(&mut self, inst: InstId, before: InstId) {
        debug_assert!(self.is_inst_inserted(before));
        debug_assert!(!self.is_inst_inserted(inst));

        let mut inst_node = InstNode::inserted();
        match self.insts[before].prev {
            Some(prev) => {
                inst_node.prev = Some(prev);
                self.insts[prev].next = Some(inst);
            }
            None => self.first_inst = Some(inst),
        }
        inst_node.next = Some(before);
        self.insts[before].prev = Some(inst);
        self.insts[inst] = inst_node;
    }

    pub fn insert_inst_after(&mut self, inst: InstId, after: InstId) {
        debug_assert!(self.is_inst_inserted(after));
        debug_assert!(!self.is_inst_inserted(inst));

        let mut inst_node = InstNode::inserted();
        match self.insts[after].next {
            Some(next) => {
                inst_node.next = Some(next);
                self.insts[next].prev = Some(inst);
            }
            None => self.last_inst = Some(inst),
        }
        inst_node.prev = Some(after);
        self.insts[after].next = Some(inst);
        self.insts[inst] = inst_node;
    }

    pub fn remove_inst(&mut self, inst: InstId) {
        debug_assert!(self.is_inst_inserted(inst));

        let inst_node = &self.insts[inst];
        let prev_inst = inst_node.prev;
        let next_inst = inst_node.next;
        match (prev_inst, next_inst) {
            (Some(prev), Some(next)) => {
                self.insts[prev].next = Some(next);
                self.insts[next].prev = Some(prev);
            }
            (Some(prev), None) => {
                self.insts[prev].next = None;
                self.last_inst = Some(prev);
            }
            (None, Some(next)) => {
                self.insts[next].prev = None;
                self.first_inst = Some(next);
            }
            (None, None) => {
                self.first_inst = None;
                self.last_inst = None;
            }
        }

        self.insts[inst] = InstNode::default();
    }
}

pub struct InstIter<'a> {
    next: Option<InstId>,
    insts: &'a SecondaryMap<InstId, InstNode>,
}

impl Iterator for InstIter<'_> {
    type Item = InstId;

    fn next(&mut self) -> Option<InstId> {
        let next = self.next?;
        self.next = self.insts[next].next;
        Some(next)
    }
}

#[derive(Default, Debug, Clone, PartialEq, Eq)]
struct InstNode {
    inserted: bool,
    prev: Option<InstId>,
    next: Option<InstId>,
}

impl InstNode {
    fn inserted() -> Self {
        Self {
            inserted: true,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use cranelift_entity::EntityRef;

    use super::*;

    fn ids(n: usize) -> Vec<InstId> {
        (0..n).map(InstId::new).collect()
    }

    #[test]
    fn insert_and_remove() {
        let i = ids(4);
        let mut layout = Layout::new();
        layout.append_inst(i[0]);
        layout.append_inst(i[2]);
        layout.insert_inst_before(i[1], i[2]);
        layout.insert_inst_after(i[3], i[2]);
        assert_eq!(layout.iter_inst().collect::<Vec<_>>(), i);

        layout.remove_inst(i[0]);
        layout.remove_inst(i[3]);
        assert_eq!(layout.iter_inst().collect::<Vec<_>>(), vec![i[1], i[2]]);
        assert_eq!(layout.first_inst(), Some(i[1]));
        assert_eq!(layout.last_inst(), Some(i[2]));
        assert!(!layout.is_inst_inserted(i[0]));
    }

    #[test]
    fn prepend() {
        let i = ids(2);
        let mut layout = Layout::new();
        layout.prepend_inst(i[1]);
        layout.prepend_inst(i[0]);
        assert_eq!(layout.iter_from(i[0]).collect::<Vec<_>>(), i);
        assert_eq!(layout.prev_inst_of(i[1]), Some(i[0]));
    }
}
