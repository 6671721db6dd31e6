//! Placement of handler local slots in the merged body.
use rustc_hash::FxHashMap;
use smol_str::SmolStr;
use stitch_ir::{InstId, LocalBinding, LocalVarEntry, MethodBody, Type};
use stitch_verifier::{Diagnostic, DiagnosticCode, Location};
use tracing::warn;

use crate::SpliceError;

/// Target slot of every handler slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotRemap {
    slots: Vec<Option<u16>>,
    /// First slot of the fresh block holding the handler arguments and
    /// locals.
    pub fresh_start: u16,
    /// One past the last slot of the fresh block.
    pub fresh_end: u16,
}

impl SlotRemap {
    pub fn get(&self, slot: u16) -> Option<u16> {
        self.slots.get(slot as usize).copied().flatten()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// `(handler slot, target slot)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (u16, u16)> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(slot, target)| target.map(|target| (slot as u16, target)))
    }
}

pub struct RemapRequest<'a> {
    pub handler: &'a MethodBody,
    /// Number of leading handler parameters receiving the anchor's values.
    pub handler_args: usize,
    pub fresh_start: u16,
    /// Locals live at the anchor, candidates of ordinal bindings.
    pub live_locals: &'a [LocalVarEntry],
    /// Labels delimiting the injected region, the live range of newly
    /// allocated persistent slots.
    pub begin: InstId,
    pub end: InstId,
    pub allocated_prefix: &'a str,
}

/// Builds the slot table for splicing `req.handler` into `target`.
///
/// Newly allocated persistent slots are recorded in `target` as local
/// variable entries and raise its `max_locals`. Slots bound by more than one
/// handler slot are reported as warnings.
pub fn build_remap(
    target: &mut MethodBody,
    req: &RemapRequest,
) -> Result<(SlotRemap, Vec<Diagnostic>), SpliceError> {
    let handler = req.handler;
    let sig = &handler.sig;
    let mut slots = vec![None; slot_table_size(handler)];
    let mut bound: Vec<(u16, u16)> = Vec::new();
    let mut pending: Vec<(u16, Type, SmolStr)> = Vec::new();
    // Handler slots that are placed outside of the fresh block.
    let mut offset = 0;

    if !sig.is_static {
        if target.sig.is_static {
            return Err(SpliceError::validation(format!(
                "handler `{}` takes a receiver but `{}` is static",
                sig.name, target.sig.name
            )));
        }
        slots[0] = Some(0);
        bound.push((0, 0));
        offset += 1;
    }

    let params = &sig.desc.params;
    let param_slots = sig.param_slots();
    let target_params = &target.sig.desc.params;
    let target_slots = target.sig.param_slots();
    let mirror_end = (req.handler_args + target_params.len()).min(params.len());

    for (i, ty) in params.iter().enumerate().skip(req.handler_args) {
        let slot = param_slots[i];

        let placed = if i < mirror_end {
            let j = i - req.handler_args;
            if target_params[j] != *ty {
                return Err(SpliceError::validation(format!(
                    "handler parameter {i} mirrors target parameter {j} of type {}, found {ty}",
                    target_params[j]
                )));
            }
            target_slots[j]
        } else {
            match handler.bindings.get(&i) {
                Some(LocalBinding::Ordinal(ordinal)) => {
                    resolve_ordinal(req.live_locals, i, ty, *ordinal)?
                }
                Some(LocalBinding::Allocate(name)) => {
                    match find_allocation(target, &pending, name, i, ty)? {
                        Some(slot) => slot,
                        None => {
                            // Placed once the fresh block is sized.
                            pending.push((slot, ty.clone(), name.clone()));
                            offset += ty.size();
                            continue;
                        }
                    }
                }
                None => {
                    return Err(SpliceError::validation(format!(
                        "handler parameter {i} of type {ty} needs a local binding"
                    )))
                }
            }
        };

        place(&mut slots, slot, placed, ty.size());
        bound.push((slot, placed));
        offset += ty.size();
    }

    let fresh_start = req.fresh_start;
    let fresh_end = fresh_start + (slots.len() as u16).saturating_sub(offset);

    let mut next = target.max_locals.max(fresh_end);
    for (slot, ty, name) in pending {
        let placed = match find_allocation(target, &[], &name, 0, &ty)? {
            Some(placed) => placed,
            None => {
                let placed = next;
                next += ty.size();
                target.max_locals = target.max_locals.max(next);
                target.local_vars.push(LocalVarEntry {
                    name: format!("{}{name}", req.allocated_prefix).into(),
                    ty: ty.clone(),
                    start: req.begin,
                    end: req.end,
                    slot: placed,
                    allocated: Some(name),
                });
                placed
            }
        };
        place(&mut slots, slot, placed, ty.size());
        bound.push((slot, placed));
    }

    let mut fresh = fresh_start;
    for target_slot in slots.iter_mut() {
        if target_slot.is_none() {
            *target_slot = Some(fresh);
            fresh += 1;
        }
    }

    let diagnostics = collisions(target, &bound);
    Ok((
        SlotRemap {
            slots,
            fresh_start,
            fresh_end,
        },
        diagnostics,
    ))
}

/// Locals whose live range covers `anchor`, ordered by slot. Persistent
/// slots are left out.
pub fn capture_locals_at(body: &MethodBody, anchor: InstId) -> Vec<LocalVarEntry> {
    let pos = body.positions();
    let Some(&at) = pos.get(&anchor) else {
        return Vec::new();
    };

    let mut live: Vec<_> = body
        .local_vars
        .iter()
        .filter(|var| var.allocated.is_none())
        .filter(|var| match (pos.get(&var.start), pos.get(&var.end)) {
            (Some(&start), Some(&end)) => start <= at && at < end,
            _ => false,
        })
        .cloned()
        .collect();
    live.sort_by_key(|var| var.slot);
    live.dedup_by_key(|var| var.slot);
    live
}

fn slot_table_size(handler: &MethodBody) -> usize {
    let mut size = handler.max_locals.max(handler.sig.arg_words());
    for inst in handler.iter_inst() {
        if let Some((slot, words)) = handler.inst(inst).local_slot() {
            size = size.max(slot + words);
        }
    }
    for var in &handler.local_vars {
        size = size.max(var.slot + var.ty.size());
    }
    size as usize
}

fn place(slots: &mut [Option<u16>], slot: u16, target: u16, size: u16) {
    for word in 0..size {
        slots[(slot + word) as usize] = Some(target + word);
    }
}

fn resolve_ordinal(
    live: &[LocalVarEntry],
    param: usize,
    ty: &Type,
    ordinal: i32,
) -> Result<u16, SpliceError> {
    let candidates: Vec<_> = live.iter().filter(|var| var.ty == *ty).collect();
    let index = if ordinal < 0 {
        candidates.len() as i64 + ordinal as i64
    } else {
        ordinal as i64
    };

    match usize::try_from(index).ok().and_then(|i| candidates.get(i)) {
        Some(var) => Ok(var.slot),
        None => {
            let listed: Vec<_> = candidates
                .iter()
                .map(|var| format!("slot {} `{}`", var.slot, var.name))
                .collect();
            Err(SpliceError::validation(format!(
                "ordinal {ordinal} of handler parameter {param} is out of range for {ty} locals [{}]",
                listed.join(", ")
            )))
        }
    }
}

/// The slot already allocated under `name`, checking its type.
fn find_allocation(
    target: &MethodBody,
    pending: &[(u16, Type, SmolStr)],
    name: &SmolStr,
    param: usize,
    ty: &Type,
) -> Result<Option<u16>, SpliceError> {
    if let Some(var) = target
        .local_vars
        .iter()
        .find(|var| var.allocated.as_ref() == Some(name))
    {
        if var.ty != *ty {
            return Err(SpliceError::validation(format!(
                "allocated local `{name}` holds {}, handler parameter {param} expects {ty}",
                var.ty
            )));
        }
        return Ok(Some(var.slot));
    }

    if pending.iter().any(|(_, _, pending)| pending == name) {
        return Err(SpliceError::validation(format!(
            "handler binds allocated local `{name}` twice"
        )));
    }
    Ok(None)
}

fn collisions(target: &MethodBody, bound: &[(u16, u16)]) -> Vec<Diagnostic> {
    let mut by_target: FxHashMap<u16, Vec<u16>> = FxHashMap::default();
    for &(slot, target_slot) in bound {
        by_target.entry(target_slot).or_default().push(slot);
    }

    let mut shared: Vec<_> = by_target
        .into_iter()
        .filter(|(_, slots)| slots.len() > 1)
        .collect();
    shared.sort_unstable();

    shared
        .into_iter()
        .map(|(target_slot, slots)| {
            let listed: Vec<_> = slots.iter().map(u16::to_string).collect();
            let message = format!(
                "handler slots {} all bind target slot {target_slot}",
                listed.join(", ")
            );
            warn!(method = %target.sig.name, slot = target_slot, "{message}");
            Diagnostic::warning(
                DiagnosticCode::SlotCollision,
                message,
                Location::Slot {
                    method: target.sig.key(),
                    slot: target_slot,
                },
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use stitch_ir::{InstData, MethodDescriptor, MethodSig};

    use super::*;

    fn target() -> MethodBody {
        let sig = MethodSig::new(
            "demo/T",
            "f",
            MethodDescriptor::new(&[Type::Int, Type::Long], Type::Void),
            true,
        );
        let mut body = MethodBody::new(sig);
        body.max_locals = 5;
        body
    }

    fn handler(params: &[Type]) -> MethodBody {
        let sig = MethodSig::new(
            "demo/H",
            "h",
            MethodDescriptor::new(params, Type::Void),
            true,
        );
        MethodBody::new(sig)
    }

    fn live(body: &mut MethodBody, slot: u16, name: &str, ty: Type) -> LocalVarEntry {
        let label = body.make_inst(InstData::Label);
        LocalVarEntry {
            name: name.into(),
            ty,
            start: label,
            end: label,
            slot,
            allocated: None,
        }
    }

    #[test]
    fn arguments_mirrors_and_locals() {
        let mut target = target();
        // (String, int, long) + one local after the parameters.
        let mut handler = handler(&[Type::object("java/lang/String"), Type::Int, Type::Long]);
        handler.max_locals = 5;
        let begin = target.make_inst(InstData::Label);

        let req = RemapRequest {
            handler: &handler,
            handler_args: 1,
            fresh_start: 6,
            live_locals: &[],
            begin,
            end: begin,
            allocated_prefix: "stitch_",
        };
        let (remap, diags) = build_remap(&mut target, &req).unwrap();
        assert!(diags.is_empty());

        let pairs: Vec<_> = remap.iter().collect();
        assert_eq!(pairs, vec![(0, 6), (1, 0), (2, 1), (3, 2), (4, 7)]);
        assert_eq!(remap.fresh_end, 8);
    }

    #[test]
    fn mirror_type_mismatch() {
        let mut target = target();
        let handler = handler(&[Type::Float]);
        let begin = target.make_inst(InstData::Label);
        let req = RemapRequest {
            handler: &handler,
            handler_args: 0,
            fresh_start: 6,
            live_locals: &[],
            begin,
            end: begin,
            allocated_prefix: "stitch_",
        };
        let err = build_remap(&mut target, &req).unwrap_err();
        assert!(err.message().contains("mirrors target parameter 0"), "{err}");
    }

    #[test]
    fn ordinals_count_from_either_end() {
        let mut target = target();
        let live_locals = vec![
            live(&mut target, 3, "x", Type::Int),
            live(&mut target, 4, "y", Type::Int),
        ];
        let mut handler = handler(&[Type::Int, Type::Long, Type::Int, Type::Int]);
        handler.bindings.insert(2, LocalBinding::Ordinal(0));
        handler.bindings.insert(3, LocalBinding::Ordinal(-1));
        let begin = target.make_inst(InstData::Label);

        let req = RemapRequest {
            handler: &handler,
            handler_args: 0,
            fresh_start: 5,
            live_locals: &live_locals,
            begin,
            end: begin,
            allocated_prefix: "stitch_",
        };
        let (remap, diags) = build_remap(&mut target, &req).unwrap();
        assert!(diags.is_empty());
        assert_eq!(remap.get(3), Some(3));
        assert_eq!(remap.get(4), Some(4));
    }

    #[test]
    fn shared_ordinal_is_a_collision() {
        let mut target = target();
        let live_locals = vec![live(&mut target, 3, "x", Type::Int)];
        let mut handler = handler(&[Type::Int, Type::Long, Type::Int, Type::Int]);
        handler.bindings.insert(2, LocalBinding::Ordinal(0));
        handler.bindings.insert(3, LocalBinding::Ordinal(-1));
        let begin = target.make_inst(InstData::Label);

        let req = RemapRequest {
            handler: &handler,
            handler_args: 0,
            fresh_start: 5,
            live_locals: &live_locals,
            begin,
            end: begin,
            allocated_prefix: "stitch_",
        };
        let (_, diags) = build_remap(&mut target, &req).unwrap();
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].code, DiagnosticCode::SlotCollision);
        assert_eq!(
            diags[0].message,
            "handler slots 3, 4 all bind target slot 3"
        );
    }

    #[test]
    fn ordinal_out_of_range_lists_candidates() {
        let mut target = target();
        let live_locals = vec![live(&mut target, 3, "x", Type::Int)];
        let mut handler = handler(&[Type::Int, Type::Long, Type::Int]);
        handler.bindings.insert(2, LocalBinding::Ordinal(1));
        let begin = target.make_inst(InstData::Label);

        let req = RemapRequest {
            handler: &handler,
            handler_args: 0,
            fresh_start: 5,
            live_locals: &live_locals,
            begin,
            end: begin,
            allocated_prefix: "stitch_",
        };
        let err = build_remap(&mut target, &req).unwrap_err();
        assert_eq!(
            err.message(),
            "ordinal 1 of handler parameter 2 is out of range for I locals [slot 3 `x`]"
        );
    }

    #[test]
    fn allocation_is_reused_by_name() {
        let mut target = target();
        let mut handler = handler(&[Type::Int, Type::Long, Type::Int]);
        handler.bindings.insert(2, LocalBinding::Allocate("counter".into()));
        let begin = target.make_inst(InstData::Label);

        let req = RemapRequest {
            handler: &handler,
            handler_args: 0,
            fresh_start: 5,
            live_locals: &[],
            begin,
            end: begin,
            allocated_prefix: "stitch_",
        };
        let (first, _) = build_remap(&mut target, &req).unwrap();
        // Parameters take slots 0..4 of the handler; nothing is fresh.
        assert_eq!(first.get(3), Some(5));
        assert_eq!(target.max_locals, 6);
        assert_eq!(target.local_vars.len(), 1);
        assert_eq!(target.local_vars[0].name, "stitch_counter");

        let (second, _) = build_remap(&mut target, &req).unwrap();
        assert_eq!(second.get(3), Some(5));
        assert_eq!(target.local_vars.len(), 1);

        let mut other = self::handler(&[Type::Int, Type::Long, Type::Float]);
        other
            .bindings
            .insert(2, LocalBinding::Allocate("counter".into()));
        let req = RemapRequest {
            handler: &other,
            ..req
        };
        let err = build_remap(&mut target, &req).unwrap_err();
        assert!(err.message().contains("holds I"), "{err}");
    }
}
