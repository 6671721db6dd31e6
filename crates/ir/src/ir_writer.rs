//! Text form of method bodies, accepted back by `stitch-parser`.
use std::{fmt::Write as _, io};

use rustc_hash::{FxHashMap, FxHashSet};

use crate::{
    frame::{Frame, VType},
    inst::{Const, InstData},
    InstId, MethodBody, Module,
};

pub struct ModuleWriter<'a> {
    module: &'a Module,
}

impl<'a> ModuleWriter<'a> {
    pub fn new(module: &'a Module) -> Self {
        Self { module }
    }

    pub fn write(&mut self, mut w: impl io::Write) -> io::Result<()> {
        for (i, method) in self.module.methods().enumerate() {
            if i > 0 {
                writeln!(w)?;
            }
            BodyWriter::new(self.module.body(method)).write(&mut w)?;
        }
        Ok(())
    }

    pub fn dump_string(&mut self) -> io::Result<String> {
        let mut s = Vec::new();
        self.write(&mut s)?;
        String::from_utf8(s).map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))
    }
}

pub struct BodyWriter<'a> {
    body: &'a MethodBody,
    labels: FxHashMap<InstId, usize>,
    /// Labels synthesized in front of `new` instructions that frames refer to.
    new_labels: FxHashMap<InstId, usize>,
}

impl<'a> BodyWriter<'a> {
    pub fn new(body: &'a MethodBody) -> Self {
        let mut referenced_news = FxHashSet::default();
        for inst in body.iter_inst() {
            if let InstData::Frame(frame) = body.inst(inst) {
                frame.for_each_vtype(|ty| {
                    if let VType::Uninitialized(new) = ty {
                        referenced_news.insert(*new);
                    }
                });
            }
        }

        let mut labels = FxHashMap::default();
        let mut new_labels = FxHashMap::default();
        let mut next = 0;
        let mut prev_label = None;
        for inst in body.iter_inst() {
            match body.inst(inst) {
                InstData::Label => {
                    labels.insert(inst, next);
                    prev_label = Some(next);
                    next += 1;
                    continue;
                }
                InstData::New(_) if referenced_news.contains(&inst) => {
                    let label = match prev_label {
                        Some(label) => label,
                        None => {
                            next += 1;
                            next - 1
                        }
                    };
                    new_labels.insert(inst, label);
                }
                _ => {}
            }
            prev_label = None;
        }

        Self {
            body,
            labels,
            new_labels,
        }
    }

    pub fn write(&mut self, mut w: impl io::Write) -> io::Result<()> {
        let body = self.body;
        let sig = &body.sig;
        let modifier = if sig.is_static { "static " } else { "" };
        writeln!(
            w,
            "method {modifier}{}.{}{} {{",
            sig.owner, sig.name, sig.desc
        )?;
        writeln!(
            w,
            "    .limits locals {} stack {}",
            body.max_locals, body.max_stack
        )?;

        for var in &body.local_vars {
            write!(
                w,
                "    .local {} {} {} from {} to {}",
                var.slot,
                var.name,
                var.ty,
                self.label(var.start),
                self.label(var.end)
            )?;
            if let Some(id) = &var.allocated {
                write!(w, " allocated {id}")?;
            }
            writeln!(w)?;
        }

        for tc in &body.try_catch {
            let catch_type = tc.catch_type.as_deref().unwrap_or("any");
            writeln!(
                w,
                "    .catch {catch_type} from {} to {} using {}",
                self.label(tc.start),
                self.label(tc.end),
                self.label(tc.handler)
            )?;
        }

        let mut bindings: Vec<_> = body.bindings.iter().collect();
        bindings.sort_by_key(|(param, _)| **param);
        for (param, binding) in bindings {
            match binding {
                crate::LocalBinding::Ordinal(ordinal) => {
                    writeln!(w, "    .bind {param} ordinal {ordinal}")?
                }
                crate::LocalBinding::Allocate(name) => {
                    writeln!(w, "    .bind {param} allocate {name}")?
                }
            }
        }

        for inst in body.iter_inst() {
            let data = body.inst(inst);
            if let InstData::Label = data {
                writeln!(w, "  {}:", self.label(inst))?;
                continue;
            }
            if let Some(&label) = self.new_labels.get(&inst) {
                if !self.is_preceded_by_label(inst) {
                    writeln!(w, "  L{label}:")?;
                }
            }
            writeln!(w, "    {}", self.inst_text(data))?;
        }

        writeln!(w, "}}")
    }

    pub fn dump_string(&mut self) -> io::Result<String> {
        let mut s = Vec::new();
        self.write(&mut s)?;
        String::from_utf8(s).map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))
    }

    fn is_preceded_by_label(&self, inst: InstId) -> bool {
        self.body
            .layout
            .prev_inst_of(inst)
            .is_some_and(|prev| self.body.inst(prev).is_label())
    }

    fn label(&self, inst: InstId) -> String {
        match self.labels.get(&inst) {
            Some(n) => format!("L{n}"),
            None => format!("?{inst}"),
        }
    }

    fn vtype(&self, ty: &VType) -> String {
        match ty {
            VType::Uninitialized(new) => match self.new_labels.get(new) {
                Some(n) => format!("uninit(L{n})"),
                None => format!("uninit(?{new})"),
            },
            ty => ty.to_string(),
        }
    }

    fn vtype_list(&self, tys: &[VType]) -> String {
        let items: Vec<_> = tys.iter().map(|ty| self.vtype(ty)).collect();
        format!("[{}]", items.join(", "))
    }

    pub fn inst_text(&self, data: &InstData) -> String {
        match data {
            InstData::Nop => "nop".into(),
            InstData::Const(value) => match value {
                Const::Null => "aconst_null".into(),
                Const::Int(v) => format!("iconst {v}"),
                Const::Long(v) => format!("lconst {v}"),
                Const::Float(v) => format!("fconst {v:?}"),
                Const::Double(v) => format!("dconst {v:?}"),
                Const::String(s) => format!("ldc {s:?}"),
                Const::Class(name) => format!("ldc class {name}"),
            },
            InstData::Load { kind, slot } => format!("{}load {slot}", kind.prefix()),
            InstData::Store { kind, slot } => format!("{}store {slot}", kind.prefix()),
            InstData::Iinc { slot, delta } => format!("iinc {slot} {delta}"),
            InstData::Binary { op, kind } => format!("{}{}", kind.prefix(), op.as_str()),
            InstData::Neg(kind) => format!("{}neg", kind.prefix()),
            InstData::Convert(op) => op.as_str().into(),
            InstData::Compare(op) => op.as_str().into(),
            InstData::Stack(op) => op.as_str().into(),
            InstData::ArrayLoad(kind) => format!("{}aload", kind.prefix()),
            InstData::ArrayStore(kind) => format!("{}astore", kind.prefix()),
            InstData::ArrayLength => "arraylength".into(),
            InstData::NewArray(elem) => format!("newarray {elem}"),
            InstData::Field {
                op,
                owner,
                name,
                ty,
            } => format!("{} {owner}.{name} {ty}", op.as_str()),
            InstData::Invoke {
                kind,
                owner,
                name,
                desc,
            } => format!("{} {owner}.{name}{desc}", kind.as_str()),
            InstData::New(class) => format!("new {class}"),
            InstData::CheckCast(ty) => format!("checkcast {}", ty.class_ref()),
            InstData::InstanceOf(ty) => format!("instanceof {}", ty.class_ref()),
            InstData::Jump { cond, dest } => {
                format!("{} {}", cond.mnemonic(), self.label(*dest))
            }
            InstData::Switch { cases, default } => {
                let mut s = String::from("lookupswitch {");
                for (key, dest) in cases {
                    let _ = write!(s, " {key}: {},", self.label(*dest));
                }
                let _ = write!(s, " default: {} }}", self.label(*default));
                s
            }
            InstData::Return(kind) => match kind {
                Some(kind) => format!("{}return", kind.prefix()),
                None => "return".into(),
            },
            InstData::Throw => "athrow".into(),
            InstData::Label => "label".into(),
            InstData::Frame(frame) => match frame {
                Frame::Full { locals, stack } => format!(
                    "frame full {} {}",
                    self.vtype_list(locals),
                    self.vtype_list(stack)
                ),
                Frame::Same => "frame same".into(),
                Frame::Same1(ty) => format!("frame same1 {}", self.vtype(ty)),
                Frame::Append(locals) => format!("frame append {}", self.vtype_list(locals)),
                Frame::Chop(n) => format!("frame chop {n}"),
            },
            InstData::Line(line) => format!("line {line}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        inst::{CmpKind, JumpCond, ValueKind},
        MethodDescriptor, MethodSig, Type,
    };

    #[test]
    fn writes_labels_in_stream_order() {
        let sig = MethodSig::new(
            "demo/A",
            "abs",
            MethodDescriptor::new(&[Type::Int], Type::Int),
            true,
        );
        let mut body = MethodBody::new(sig);
        body.max_stack = 1;
        let pos = body.make_inst(InstData::Label);
        body.append_inst_data(InstData::load(ValueKind::Int, 0));
        body.append_inst_data(InstData::Jump {
            cond: JumpCond::Zero(CmpKind::Ge),
            dest: pos,
        });
        body.append_inst_data(InstData::load(ValueKind::Int, 0));
        body.append_inst_data(InstData::Neg(ValueKind::Int));
        body.append_inst_data(InstData::Return(Some(ValueKind::Int)));
        body.layout.append_inst(pos);
        body.append_inst_data(InstData::Frame(Frame::Same));
        body.append_inst_data(InstData::load(ValueKind::Int, 0));
        body.append_inst_data(InstData::Return(Some(ValueKind::Int)));

        let text = BodyWriter::new(&body).dump_string().unwrap();
        insta::assert_snapshot!(text, @r"
        method static demo/A.abs(I)I {
            .limits locals 1 stack 1
            iload 0
            ifge L0
            iload 0
            ineg
            ireturn
          L0:
            frame same
            iload 0
            ireturn
        }
        ");
    }
}
