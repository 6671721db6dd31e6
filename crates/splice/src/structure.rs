//! Locates the loop and block boundaries enclosing an anchor.
use std::collections::VecDeque;

use rustc_hash::{FxHashMap, FxHashSet};
use stitch_ir::{inst::JumpCond, InstData, InstId, MethodBody};

/// A structural position that may not have a label yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StructurePoint {
    Label(InstId),
    /// Right after the instruction; a label has to be inserted there.
    After(InstId),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StructuralAnchors {
    pub loop_start: Option<InstId>,
    pub loop_end: Option<StructurePoint>,
    pub block_end: Option<InstId>,
}

/// Finds the nearest loop start, its loop end and the nearest enclosing block
/// end around `anchor`.
///
/// The loop start is the highest target of a backward jump reachable from the
/// anchor that lies at or before it. The loop end is the nearest forward jump
/// target past the loop's back edge reachable from the loop start, or the
/// position directly after the back edge. The block end is the nearest target
/// past the anchor of a conditional jump found scanning backward from the
/// anchor to the previous unconditional transfer.
pub fn locate(body: &MethodBody, anchor: InstId) -> StructuralAnchors {
    let pos = body.positions();
    let Some(&anchor_pos) = pos.get(&anchor) else {
        return StructuralAnchors::default();
    };

    let from_anchor = Walk::run(body, &pos, anchor);
    let back_edge = from_anchor
        .back_edges
        .iter()
        .filter(|(_, dest)| pos[dest] <= anchor_pos)
        .max_by_key(|(jump, dest)| (pos[dest], pos[jump]))
        .copied();

    let mut anchors = StructuralAnchors {
        block_end: block_end(body, &pos, anchor, anchor_pos),
        ..StructuralAnchors::default()
    };

    if let Some((_, loop_start)) = back_edge {
        // The last back edge to the loop start closes the loop.
        let back_edge = from_anchor
            .back_edges
            .iter()
            .chain(Walk::run(body, &pos, loop_start).back_edges.iter())
            .filter(|(_, dest)| *dest == loop_start)
            .map(|(jump, _)| *jump)
            .max_by_key(|jump| pos[jump])
            .unwrap_or(loop_start);
        let back_edge_pos = pos[&back_edge];

        let from_start = Walk::run(body, &pos, loop_start);
        let exit = from_start
            .forward_targets
            .iter()
            .map(|(_, dest)| *dest)
            .filter(|dest| pos[dest] > back_edge_pos)
            .min_by_key(|dest| pos[dest]);

        anchors.loop_start = Some(loop_start);
        anchors.loop_end = Some(match exit {
            Some(label) => StructurePoint::Label(label),
            None => match body.layout.next_inst_of(back_edge) {
                Some(next) if body.inst(next).is_label() => StructurePoint::Label(next),
                _ => StructurePoint::After(back_edge),
            },
        });
    }

    anchors
}

/// Jump edges discovered by a breadth-first walk over reachable instruction
/// ranges. Unconditional jumps continue the current range at their
/// destination; conditional jumps and switches queue their destinations.
#[derive(Debug, Default)]
struct Walk {
    back_edges: Vec<(InstId, InstId)>,
    forward_targets: Vec<(InstId, InstId)>,
}

impl Walk {
    fn run(body: &MethodBody, pos: &FxHashMap<InstId, usize>, start: InstId) -> Self {
        let mut walk = Self::default();
        let mut visited = FxHashSet::default();
        let mut queue = VecDeque::from([start]);

        while let Some(first) = queue.pop_front() {
            let mut cur = Some(first);
            while let Some(inst) = cur {
                if !visited.insert(inst) {
                    break;
                }

                let data = body.inst(inst);
                match data {
                    InstData::Jump { cond, dest } => {
                        walk.record(pos, inst, *dest);
                        if *cond == JumpCond::Always {
                            cur = Some(*dest);
                            continue;
                        }
                        queue.push_back(*dest);
                    }
                    InstData::Switch { .. } => {
                        for dest in data.branch_targets() {
                            walk.record(pos, inst, dest);
                            queue.push_back(dest);
                        }
                        break;
                    }
                    InstData::Return(_) | InstData::Throw => break,
                    _ => {}
                }

                cur = body.layout.next_inst_of(inst);
            }
        }

        walk
    }

    fn record(&mut self, pos: &FxHashMap<InstId, usize>, jump: InstId, dest: InstId) {
        let (Some(jump_pos), Some(dest_pos)) = (pos.get(&jump), pos.get(&dest)) else {
            return;
        };
        if dest_pos <= jump_pos {
            self.back_edges.push((jump, dest));
        } else {
            self.forward_targets.push((jump, dest));
        }
    }
}

fn block_end(
    body: &MethodBody,
    pos: &FxHashMap<InstId, usize>,
    anchor: InstId,
    anchor_pos: usize,
) -> Option<InstId> {
    let mut best: Option<InstId> = None;
    let mut cur = body.layout.prev_inst_of(anchor);
    while let Some(inst) = cur {
        let data = body.inst(inst);
        if data.is_terminator() && !matches!(data, InstData::Switch { .. }) {
            break;
        }

        for dest in data.branch_targets() {
            let Some(&dest_pos) = pos.get(&dest) else {
                continue;
            };
            if dest_pos > anchor_pos && best.map_or(true, |b| dest_pos < pos[&b]) {
                best = Some(dest);
            }
        }
        cur = body.layout.prev_inst_of(inst);
    }
    best
}

#[cfg(test)]
mod tests {
    use stitch_parser::parse_module;

    use super::*;

    fn parse(src: &str) -> MethodBody {
        let parsed = parse_module(src).unwrap();
        let module = parsed.module;
        let method = module.methods().next().unwrap();
        module.body(method).clone()
    }

    fn find_invoke(body: &MethodBody, name: &str) -> InstId {
        body.iter_inst()
            .find(|inst| matches!(body.inst(*inst), InstData::Invoke { name: n, .. } if n == name))
            .unwrap()
    }

    fn label_index(body: &MethodBody, inst: InstId) -> usize {
        body.iter_inst()
            .filter(|i| body.inst(*i).is_label())
            .position(|i| i == inst)
            .unwrap()
    }

    #[test]
    fn while_loop() {
        let body = parse(
            r#"
method static demo/A.f(I)V {
    iconst 0
    istore 1
  L0:
    frame append [int]
    iload 1
    iload 0
    if_icmpge L1
    invokestatic demo/A.g()V
    iinc 1 1
    goto L0
  L1:
    frame same
    return
}
"#,
        );
        let anchor = find_invoke(&body, "g");
        let anchors = locate(&body, anchor);

        let start = anchors.loop_start.unwrap();
        assert_eq!(label_index(&body, start), 0);
        let Some(StructurePoint::Label(end)) = anchors.loop_end else {
            panic!("{anchors:?}");
        };
        assert_eq!(label_index(&body, end), 1);
        assert_eq!(anchors.block_end, Some(end));
    }

    #[test]
    fn do_while_loop_ends_after_back_edge() {
        let body = parse(
            r#"
method static demo/A.f(I)V {
  L0:
    frame same
    invokestatic demo/A.g()V
    iinc 0 -1
    iload 0
    ifgt L0
    return
}
"#,
        );
        let anchor = find_invoke(&body, "g");
        let anchors = locate(&body, anchor);
        assert!(anchors.loop_start.is_some());
        assert!(matches!(anchors.loop_end, Some(StructurePoint::After(_))));
        assert_eq!(anchors.block_end, None);
    }

    #[test]
    fn straight_line_has_no_loop() {
        let body = parse(
            r#"
method static demo/A.f()V {
    invokestatic demo/A.g()V
    return
}
"#,
        );
        let anchor = find_invoke(&body, "g");
        assert_eq!(locate(&body, anchor), StructuralAnchors::default());
    }
}
