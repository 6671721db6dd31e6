use ast::{Line, Operand};
use cranelift_entity::SecondaryMap;
use ir::{
    analysis::compute_limits,
    inst::{
        ArrayKind, BinaryOp, CmpKind, CompareOp, Const, ConvOp, FieldOp, InvokeKind, JumpCond,
        StackOp,
    },
    Frame, InstData, InstId, LocalBinding, LocalVarEntry, MethodBody, MethodDescriptor, MethodRef,
    MethodSig, Module, TryCatch, Type, VType, ValueKind,
};
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use smol_str::SmolStr;
use syntax::Spanned;

pub mod ast;
mod error;
pub mod syntax;
pub use error::{Error, UndefinedKind};
pub use syntax::Span;

pub struct ParsedModule {
    pub module: Module,
    pub debug: DebugInfo,
}

/// Comments found in the source, which tests use to carry directives.
#[derive(Default)]
pub struct DebugInfo {
    pub method_comments: SecondaryMap<MethodRef, Vec<String>>,
}

pub fn parse_module(input: &str) -> Result<ParsedModule, Vec<Error>> {
    let ast = ast::parse(input)?;

    let mut module = Module::new();
    let mut method_comments = SecondaryMap::default();
    let mut errors = vec![];

    for method in ast.methods {
        let desc = match method.desc.inner.parse::<MethodDescriptor>() {
            Ok(desc) => desc,
            Err(err) => {
                errors.push(Error::InvalidDescriptor(err, method.desc.span));
                continue;
            }
        };
        let sig = MethodSig::new(&method.owner.inner, &method.name.inner, desc, method.is_static);
        if module.lookup(&sig.key()).is_some() {
            let name = format!("{}.{}{}", sig.owner, sig.name, sig.desc);
            errors.push(Error::DuplicatedDeclaration(name.into(), method.name.span));
            continue;
        }

        let mut ctx = BuildCtx::new(MethodBody::new(sig));
        ctx.build(&method.lines);
        let body = ctx.finish();
        errors.append(&mut ctx.errors);

        let id = module.push(body);
        method_comments[id] = method.comments;
    }

    if errors.is_empty() {
        Ok(ParsedModule {
            module,
            debug: DebugInfo { method_comments },
        })
    } else {
        Err(errors)
    }
}

struct BuildCtx {
    body: MethodBody,
    labels: FxHashMap<SmolStr, InstId>,
    has_limits: bool,
    errors: Vec<Error>,
}

type Operands = [Spanned<Operand>];

impl BuildCtx {
    fn new(body: MethodBody) -> Self {
        Self {
            body,
            labels: FxHashMap::default(),
            has_limits: false,
            errors: vec![],
        }
    }

    fn build(&mut self, lines: &[Spanned<Line>]) {
        // Labels may be referenced before they are placed.
        for line in lines {
            if let Line::Label(name) = &line.inner {
                if self.labels.contains_key(name) {
                    self.errors
                        .push(Error::DuplicatedDeclaration(name.clone(), line.span));
                    continue;
                }
                let label = self.body.make_inst(InstData::Label);
                self.labels.insert(name.clone(), label);
            }
        }

        for line in lines {
            match &line.inner {
                Line::Label(name) => {
                    if let Some(&label) = self.labels.get(name) {
                        if !self.body.layout.is_inst_inserted(label) {
                            self.body.layout.append_inst(label);
                        }
                    }
                }
                Line::Inst { opcode, operands } => {
                    if opcode.inner.starts_with('.') {
                        self.directive(opcode, operands, line.span);
                    } else if let Some(data) = self.inst(opcode, operands, line.span) {
                        self.body.append_inst_data(data);
                    }
                }
            }
        }

        self.resolve_uninit();
    }

    fn finish(&mut self) -> MethodBody {
        if !self.has_limits && self.errors.is_empty() {
            // A body the analyzer rejects keeps the defaults; the verifier
            // reports the underlying problem.
            if let Ok((locals, stack)) = compute_limits(&self.body) {
                self.body.max_locals = locals;
                self.body.max_stack = stack;
            }
        }
        let sig = self.body.sig.clone();
        std::mem::replace(&mut self.body, MethodBody::new(sig))
    }

    /// Frames name `new` sites by the label in front of them; point them at
    /// the instruction itself.
    fn resolve_uninit(&mut self) {
        let mut first_new_after = FxHashMap::default();
        let mut pending = vec![];
        for inst in self.body.iter_inst() {
            match self.body.inst(inst) {
                InstData::Label => pending.push(inst),
                InstData::New(_) => {
                    for label in pending.drain(..) {
                        first_new_after.insert(label, inst);
                    }
                }
                _ => {}
            }
        }

        let frames: Vec<_> = self
            .body
            .iter_inst()
            .filter(|inst| matches!(self.body.inst(*inst), InstData::Frame(_)))
            .collect();
        for inst in frames {
            if let InstData::Frame(frame) = self.body.inst_mut(inst) {
                frame.for_each_vtype_mut(|ty| {
                    if let VType::Uninitialized(label) = ty {
                        if let Some(&new) = first_new_after.get(label) {
                            *label = new;
                        }
                    }
                });
            }
        }
    }

    fn directive(&mut self, opcode: &Spanned<SmolStr>, operands: &Operands, span: Span) {
        match opcode.inner.as_str() {
            ".limits" => {
                if !self.arity(operands, 4, span) {
                    return;
                }
                self.keyword(operands, 0, "locals");
                self.keyword(operands, 2, "stack");
                if let (Some(locals), Some(stack)) =
                    (self.number::<u16>(operands, 1), self.number::<u16>(operands, 3))
                {
                    self.body.max_locals = locals;
                    self.body.max_stack = stack;
                    self.has_limits = true;
                }
            }

            ".local" => {
                if operands.len() != 7 && operands.len() != 9 {
                    self.errors.push(Error::InstArgNumMismatch {
                        expected: 7,
                        actual: operands.len(),
                        span,
                    });
                    return;
                }
                self.keyword(operands, 3, "from");
                self.keyword(operands, 5, "to");
                let allocated = if operands.len() == 9 {
                    self.keyword(operands, 7, "allocated");
                    self.word(operands, 8).map(|w| w.inner)
                } else {
                    None
                };
                let (Some(slot), Some(name), Some(ty), Some(start), Some(end)) = (
                    self.number::<u16>(operands, 0),
                    self.word(operands, 1),
                    self.type_(operands, 2),
                    self.label(operands, 4),
                    self.label(operands, 6),
                ) else {
                    return;
                };
                self.body.local_vars.push(LocalVarEntry {
                    name: name.inner,
                    ty,
                    start,
                    end,
                    slot,
                    allocated,
                });
            }

            ".catch" => {
                if !self.arity(operands, 7, span) {
                    return;
                }
                self.keyword(operands, 1, "from");
                self.keyword(operands, 3, "to");
                self.keyword(operands, 5, "using");
                let (Some(catch_type), Some(start), Some(end), Some(handler)) = (
                    self.word(operands, 0),
                    self.label(operands, 2),
                    self.label(operands, 4),
                    self.label(operands, 6),
                ) else {
                    return;
                };
                let catch_type = (catch_type.inner != "any").then_some(catch_type.inner);
                self.body.try_catch.push(TryCatch {
                    start,
                    end,
                    handler,
                    catch_type,
                });
            }

            ".bind" => {
                if !self.arity(operands, 3, span) {
                    return;
                }
                let Some(param) = self.number::<usize>(operands, 0) else {
                    return;
                };
                let Some(kind) = self.word(operands, 1) else {
                    return;
                };
                let binding = match kind.inner.as_str() {
                    "ordinal" => match self.number::<i32>(operands, 2) {
                        Some(ordinal) => LocalBinding::Ordinal(ordinal),
                        None => return,
                    },
                    "allocate" => match self.word(operands, 2) {
                        Some(name) => LocalBinding::Allocate(name.inner),
                        None => return,
                    },
                    other => {
                        self.errors.push(Error::InstArgKindMismatch {
                            expected: "ordinal | allocate".into(),
                            actual: Some(other.into()),
                            span: kind.span,
                        });
                        return;
                    }
                };
                self.body.bindings.insert(param, binding);
            }

            other => self.errors.push(Error::Undefined(
                UndefinedKind::Directive(other.into()),
                opcode.span,
            )),
        }
    }

    fn inst(&mut self, opcode: &Spanned<SmolStr>, operands: &Operands, span: Span) -> Option<InstData> {
        let name = opcode.inner.as_str();

        if let Some(data) = nullary(name) {
            self.arity(operands, 0, span).then_some(())?;
            return Some(data);
        }

        if let Some((kind, is_load)) = local_access(name) {
            self.arity(operands, 1, span).then_some(())?;
            let slot = self.number(operands, 0)?;
            return Some(if is_load {
                InstData::load(kind, slot)
            } else {
                InstData::store(kind, slot)
            });
        }

        if let Some(cond) = jump_cond(name) {
            self.arity(operands, 1, span).then_some(())?;
            let dest = self.label(operands, 0)?;
            return Some(InstData::Jump { cond, dest });
        }

        let data = match name {
            "iconst" => {
                self.arity(operands, 1, span).then_some(())?;
                InstData::Const(Const::Int(self.number(operands, 0)?))
            }
            "lconst" => {
                self.arity(operands, 1, span).then_some(())?;
                InstData::Const(Const::Long(self.number(operands, 0)?))
            }
            "fconst" => {
                self.arity(operands, 1, span).then_some(())?;
                InstData::Const(Const::Float(self.number(operands, 0)?))
            }
            "dconst" => {
                self.arity(operands, 1, span).then_some(())?;
                InstData::Const(Const::Double(self.number(operands, 0)?))
            }
            "ldc" => match operands {
                [Spanned {
                    inner: Operand::Str(s),
                    ..
                }] => InstData::Const(Const::String(s.as_str().into())),
                [_, _] => {
                    self.keyword(operands, 0, "class");
                    InstData::Const(Const::Class(self.word(operands, 1)?.inner))
                }
                _ => {
                    self.arity(operands, 1, span);
                    return None;
                }
            },
            "iinc" => {
                self.arity(operands, 2, span).then_some(())?;
                InstData::Iinc {
                    slot: self.number(operands, 0)?,
                    delta: self.number(operands, 1)?,
                }
            }
            "newarray" => {
                self.arity(operands, 1, span).then_some(())?;
                InstData::NewArray(self.type_(operands, 0)?)
            }
            "getstatic" | "putstatic" | "getfield" | "putfield" => {
                self.arity(operands, 2, span).then_some(())?;
                let op = match name {
                    "getstatic" => FieldOp::GetStatic,
                    "putstatic" => FieldOp::PutStatic,
                    "getfield" => FieldOp::GetField,
                    _ => FieldOp::PutField,
                };
                let member = self.word(operands, 0)?;
                let Some((owner, field)) = member.inner.rsplit_once('.') else {
                    return self.kind_mismatch("owner.name", &member);
                };
                InstData::Field {
                    op,
                    owner: owner.into(),
                    name: field.into(),
                    ty: self.type_(operands, 1)?,
                }
            }
            "invokestatic" | "invokevirtual" | "invokespecial" | "invokeinterface" => {
                self.arity(operands, 1, span).then_some(())?;
                let kind = match name {
                    "invokestatic" => InvokeKind::Static,
                    "invokevirtual" => InvokeKind::Virtual,
                    "invokespecial" => InvokeKind::Special,
                    _ => InvokeKind::Interface,
                };
                let target = self.word(operands, 0)?;
                let split = target
                    .inner
                    .find('(')
                    .and_then(|paren| Some((target.inner[..paren].rsplit_once('.')?, paren)));
                let Some(((owner, method), paren)) = split else {
                    return self.kind_mismatch("owner.name(desc)", &target);
                };
                let desc = match target.inner[paren..].parse::<MethodDescriptor>() {
                    Ok(desc) => desc,
                    Err(err) => {
                        self.errors.push(Error::InvalidDescriptor(err, target.span));
                        return None;
                    }
                };
                InstData::invoke(kind, owner, method, desc)
            }
            "new" => {
                self.arity(operands, 1, span).then_some(())?;
                InstData::New(self.word(operands, 0)?.inner)
            }
            "checkcast" | "instanceof" => {
                self.arity(operands, 1, span).then_some(())?;
                let word = self.word(operands, 0)?;
                let ty = match Type::from_class_ref(&word.inner) {
                    Ok(ty) => ty,
                    Err(err) => {
                        self.errors.push(Error::InvalidDescriptor(err, word.span));
                        return None;
                    }
                };
                if name == "checkcast" {
                    InstData::CheckCast(ty)
                } else {
                    InstData::InstanceOf(ty)
                }
            }
            "lookupswitch" => {
                self.arity(operands, 1, span).then_some(())?;
                let Operand::Switch { cases, default } = &operands[0].inner else {
                    return self.kind_mismatch_operand("switch table", &operands[0]);
                };
                let mut table = SmallVec::new();
                for (key, dest) in cases {
                    let key = self.parse_number(key)?;
                    let dest = self.resolve_label(dest)?;
                    table.push((key, dest));
                }
                InstData::Switch {
                    cases: table,
                    default: self.resolve_label(default)?,
                }
            }
            "frame" => self.frame(operands, span)?,
            "line" => {
                self.arity(operands, 1, span).then_some(())?;
                InstData::Line(self.number(operands, 0)?)
            }
            _ => {
                self.errors
                    .push(Error::Undefined(UndefinedKind::Inst(name.into()), opcode.span));
                return None;
            }
        };
        Some(data)
    }

    fn frame(&mut self, operands: &Operands, span: Span) -> Option<InstData> {
        let kind = self.word(operands, 0)?;
        let rest = &operands[1..];
        let frame = match kind.inner.as_str() {
            "full" => {
                self.arity(rest, 2, span).then_some(())?;
                Frame::full(self.vtype_list(&rest[0])?, self.vtype_list(&rest[1])?)
            }
            "same" => {
                self.arity(rest, 0, span).then_some(())?;
                Frame::Same
            }
            "same1" => {
                self.arity(rest, 1, span).then_some(())?;
                let word = self.word(rest, 0)?;
                Frame::Same1(self.vtype(&word)?)
            }
            "append" => {
                self.arity(rest, 1, span).then_some(())?;
                Frame::Append(self.vtype_list(&rest[0])?)
            }
            "chop" => {
                self.arity(rest, 1, span).then_some(())?;
                Frame::Chop(self.number(rest, 0)?)
            }
            _ => return self.kind_mismatch("full | same | same1 | append | chop", &kind),
        };
        Some(InstData::Frame(frame))
    }

    fn vtype_list(&mut self, operand: &Spanned<Operand>) -> Option<Vec<VType>> {
        let Operand::List(items) = &operand.inner else {
            return self.kind_mismatch_operand("type list", operand);
        };
        items.iter().map(|item| self.vtype(item)).collect()
    }

    fn vtype(&mut self, word: &Spanned<SmolStr>) -> Option<VType> {
        Some(match word.inner.as_str() {
            "top" => VType::Top,
            "int" => VType::Int,
            "float" => VType::Float,
            "long" => VType::Long,
            "double" => VType::Double,
            "null" => VType::Null,
            "uninit_this" => VType::UninitializedThis,
            s => match s.strip_prefix("uninit(").and_then(|s| s.strip_suffix(')')) {
                Some(label) => {
                    let label = Spanned::new(SmolStr::from(label), word.span);
                    VType::Uninitialized(self.resolve_label(&label)?)
                }
                None => VType::Object(s.into()),
            },
        })
    }

    fn arity(&mut self, operands: &Operands, expected: usize, span: Span) -> bool {
        if operands.len() == expected {
            true
        } else {
            self.errors.push(Error::InstArgNumMismatch {
                expected,
                actual: operands.len(),
                span,
            });
            false
        }
    }

    fn word(&mut self, operands: &Operands, idx: usize) -> Option<Spanned<SmolStr>> {
        let operand = operands.get(idx)?;
        match &operand.inner {
            Operand::Word(w) => Some(Spanned::new(w.clone(), operand.span)),
            _ => self.kind_mismatch_operand("word", operand),
        }
    }

    fn keyword(&mut self, operands: &Operands, idx: usize, keyword: &str) {
        if let Some(word) = self.word(operands, idx) {
            if word.inner != keyword {
                self.kind_mismatch::<()>(keyword, &word);
            }
        }
    }

    fn number<T: std::str::FromStr>(&mut self, operands: &Operands, idx: usize) -> Option<T> {
        let word = self.word(operands, idx)?;
        self.parse_number(&word)
    }

    fn parse_number<T: std::str::FromStr>(&mut self, word: &Spanned<SmolStr>) -> Option<T> {
        match word.inner.parse() {
            Ok(v) => Some(v),
            Err(_) => {
                if word.inner.starts_with(|c: char| c == '-' || c.is_ascii_digit()) {
                    self.errors.push(Error::NumberOutOfBounds(word.span));
                } else {
                    self.kind_mismatch::<()>("number", word);
                }
                None
            }
        }
    }

    fn type_(&mut self, operands: &Operands, idx: usize) -> Option<Type> {
        let word = self.word(operands, idx)?;
        match word.inner.parse() {
            Ok(ty) => Some(ty),
            Err(err) => {
                self.errors.push(Error::InvalidDescriptor(err, word.span));
                None
            }
        }
    }

    fn label(&mut self, operands: &Operands, idx: usize) -> Option<InstId> {
        let word = self.word(operands, idx)?;
        self.resolve_label(&word)
    }

    fn resolve_label(&mut self, name: &Spanned<SmolStr>) -> Option<InstId> {
        match self.labels.get(&name.inner) {
            Some(label) => Some(*label),
            None => {
                self.errors.push(Error::Undefined(
                    UndefinedKind::Label(name.inner.clone()),
                    name.span,
                ));
                None
            }
        }
    }

    fn kind_mismatch<T>(&mut self, expected: &str, actual: &Spanned<SmolStr>) -> Option<T> {
        self.errors.push(Error::InstArgKindMismatch {
            expected: expected.into(),
            actual: Some(actual.inner.clone()),
            span: actual.span,
        });
        None
    }

    fn kind_mismatch_operand<T>(&mut self, expected: &str, actual: &Spanned<Operand>) -> Option<T> {
        self.errors.push(Error::InstArgKindMismatch {
            expected: expected.into(),
            actual: Some(actual.inner.kind_name().into()),
            span: actual.span,
        });
        None
    }
}

/// Instructions without operands.
fn nullary(name: &str) -> Option<InstData> {
    let data = match name {
        "nop" => InstData::Nop,
        "aconst_null" => InstData::Const(Const::Null),
        "arraylength" => InstData::ArrayLength,
        "athrow" => InstData::Throw,
        "return" => InstData::Return(None),
        _ => {
            if let Some(op) = ConvOp::ALL.into_iter().find(|op| op.as_str() == name) {
                return Some(InstData::Convert(op));
            }
            if let Some(op) = StackOp::ALL.into_iter().find(|op| op.as_str() == name) {
                return Some(InstData::Stack(op));
            }
            if let Some(op) = [
                CompareOp::Lcmp,
                CompareOp::Fcmpl,
                CompareOp::Fcmpg,
                CompareOp::Dcmpl,
                CompareOp::Dcmpg,
            ]
            .into_iter()
            .find(|op| op.as_str() == name)
            {
                return Some(InstData::Compare(op));
            }

            let mut chars = name.chars();
            let prefix = chars.next()?;
            let rest = chars.as_str();

            if let Some(kind) = ArrayKind::ALL.into_iter().find(|k| k.prefix() == prefix) {
                match rest {
                    "aload" => return Some(InstData::ArrayLoad(kind)),
                    "astore" => return Some(InstData::ArrayStore(kind)),
                    _ => {}
                }
            }

            let kind = ValueKind::from_prefix(prefix)?;
            match rest {
                "return" => InstData::Return(Some(kind)),
                "neg" if kind != ValueKind::Ref => InstData::Neg(kind),
                _ => {
                    let op = BinaryOp::ALL.into_iter().find(|op| op.as_str() == rest)?;
                    if kind == ValueKind::Ref {
                        return None;
                    }
                    InstData::Binary { op, kind }
                }
            }
        }
    };
    Some(data)
}

/// `xload` and `xstore`, returning the kind and whether it is a load.
fn local_access(name: &str) -> Option<(ValueKind, bool)> {
    let mut chars = name.chars();
    let kind = ValueKind::from_prefix(chars.next()?)?;
    match chars.as_str() {
        "load" => Some((kind, true)),
        "store" => Some((kind, false)),
        _ => None,
    }
}

fn jump_cond(name: &str) -> Option<JumpCond> {
    match name {
        "goto" => return Some(JumpCond::Always),
        "if_acmpeq" => return Some(JumpCond::ACmpEq),
        "if_acmpne" => return Some(JumpCond::ACmpNe),
        "ifnull" => return Some(JumpCond::Null),
        "ifnonnull" => return Some(JumpCond::NonNull),
        _ => {}
    }
    let (rest, icmp) = match name.strip_prefix("if_icmp") {
        Some(rest) => (rest, true),
        None => (name.strip_prefix("if")?, false),
    };
    let cmp = CmpKind::ALL.into_iter().find(|cmp| cmp.as_str() == rest)?;
    Some(if icmp {
        JumpCond::ICmp(cmp)
    } else {
        JumpCond::Zero(cmp)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ir::ir_writer::ModuleWriter;

    #[test]
    fn parses_and_writes_back() {
        let src = "\
method static demo/A.abs(I)I {
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
";
        let parsed = parse_module(src).unwrap();
        let text = ModuleWriter::new(&parsed.module).dump_string().unwrap();
        assert_eq!(
            text,
            src.replace("{\n", "{\n    .limits locals 1 stack 1\n")
        );
    }

    #[test]
    fn method_comments_are_kept() {
        let src = "\
# first
# second
method demo/A.f()V {
    return
}
";
        let parsed = parse_module(src).unwrap();
        let method = parsed.module.lookup_by_name("demo/A", "f").unwrap();
        assert_eq!(
            parsed.debug.method_comments[method],
            vec!["# first".to_string(), "# second".to_string()]
        );
    }

    #[test]
    fn array_and_local_mnemonics_are_distinct() {
        let src = "\
method static demo/A.f([I)I {
    aload 0
    iconst 0
    iaload
    ireturn
}
";
        let parsed = parse_module(src).unwrap();
        let body = parsed.module.body(parsed.module.methods().next().unwrap());
        let insts: Vec<_> = body.iter_inst().map(|i| body.inst(i).clone()).collect();
        assert_eq!(insts[0], InstData::load(ValueKind::Ref, 0));
        assert_eq!(insts[2], InstData::ArrayLoad(ArrayKind::Int));
        assert_eq!(body.max_stack, 2);
    }

    #[test]
    fn uninit_refers_to_new_after_label() {
        let src = "\
method static demo/A.f()V {
  L0:
    new demo/B
    dup
    iconst 0
    ifeq L1
    goto L1
  L1:
    frame full [] [uninit(L0), uninit(L0)]
    invokespecial demo/B.<init>()V
    return
}
";
        let parsed = parse_module(src).unwrap();
        let body = parsed.module.body(parsed.module.methods().next().unwrap());
        let new = body
            .iter_inst()
            .find(|i| matches!(body.inst(*i), InstData::New(_)))
            .unwrap();
        let frame = body
            .iter_inst()
            .find_map(|i| match body.inst(i) {
                InstData::Frame(f) => Some(f.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(
            frame,
            Frame::full(
                vec![],
                vec![VType::Uninitialized(new), VType::Uninitialized(new)]
            )
        );
    }
}
