use std::fmt;

use rustc_hash::FxHashMap;
use smol_str::SmolStr;
use stitch_ir::{
    inst::{
        ArrayKind, BinaryOp, CompareOp, Const, ConvOp, FieldOp, InvokeKind, JumpCond, StackOp,
    },
    InstData, InstId, MethodBody, MethodDescriptor, MethodKey, MethodRef, Module, Type,
};

use crate::{
    frame::{check_kind, Frame},
    heap::{Heap, Object},
    EvalValue, ObjRef,
};

const MAX_CALL_DEPTH: usize = 256;
const DEFAULT_STEP_LIMIT: usize = 1 << 20;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Trap {
    #[error("no method `{0}` in the module or the host")]
    UnknownMethod(String),
    #[error("operand stack underflow")]
    StackUnderflow,
    #[error("stack operation splits a wide value")]
    InvalidOperands,
    #[error("local slot {0} is out of range")]
    SlotOutOfRange(u16),
    #[error("expected {expected} operand, found `{found}`")]
    TypeMismatch {
        expected: &'static str,
        found: EvalValue,
    },
    #[error("dangling object reference `{0}`")]
    DanglingRef(ObjRef),
    #[error("execution fell off the end of `{0}`")]
    FellOffEnd(String),
    #[error("expected {expected} arguments, found {actual}")]
    ArgCount { expected: usize, actual: usize },
    #[error("call depth exceeded {0}")]
    DepthExceeded(usize),
    #[error("step limit of {0} exceeded")]
    StepLimit(usize),
    #[error("{0}")]
    Host(String),
}

/// How a call completed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Outcome {
    Return(Option<EvalValue>),
    /// An exception escaped the method.
    Throw(ObjRef),
}

/// A call to a method the module does not define.
#[derive(Debug, Clone, Copy)]
pub struct Call<'a> {
    pub kind: InvokeKind,
    pub owner: &'a str,
    pub name: &'a str,
    pub desc: &'a MethodDescriptor,
}

impl fmt::Display for Call<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}{}", self.owner, self.name, self.desc)
    }
}

/// The world outside the module: library methods and the class hierarchy.
pub trait Host {
    /// Executes a method the module does not define. Library constructors
    /// are no-ops on the modelled object; everything else traps.
    fn invoke(
        &mut self,
        heap: &mut Heap,
        call: &Call<'_>,
        args: &[EvalValue],
    ) -> Result<Outcome, Trap> {
        let _ = (heap, args);
        if call.name == "<init>" && call.owner.starts_with("java/lang/") {
            Ok(Outcome::Return(None))
        } else {
            Err(Trap::UnknownMethod(call.to_string()))
        }
    }

    /// Whether `class` is assignable to `of`. Without hierarchy information
    /// every class named `*Exception` is taken to be a runtime exception.
    fn is_subclass(&self, class: &str, of: &str) -> bool {
        class == of
            || matches!(of, "java/lang/Object" | "java/lang/Throwable")
            || (matches!(of, "java/lang/Exception" | "java/lang/RuntimeException")
                && class.ends_with("Exception"))
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoHost;

impl Host for NoHost {}

enum Flow {
    Next,
    Jump(InstId),
    Return(Option<EvalValue>),
    Throw(ObjRef),
}

pub struct Machine<'m, H = NoHost> {
    module: &'m Module,
    host: H,
    heap: Heap,
    statics: FxHashMap<(SmolStr, SmolStr), EvalValue>,
    strings: FxHashMap<SmolStr, ObjRef>,
    classes: FxHashMap<SmolStr, ObjRef>,
    positions: FxHashMap<MethodRef, FxHashMap<InstId, usize>>,
    depth: usize,
    steps: usize,
    pub step_limit: usize,
}

impl<'m> Machine<'m, NoHost> {
    pub fn new(module: &'m Module) -> Self {
        Self::with_host(module, NoHost)
    }
}

impl<'m, H: Host> Machine<'m, H> {
    pub fn with_host(module: &'m Module, host: H) -> Self {
        Self {
            module,
            host,
            heap: Heap::default(),
            statics: FxHashMap::default(),
            strings: FxHashMap::default(),
            classes: FxHashMap::default(),
            positions: FxHashMap::default(),
            depth: 0,
            steps: 0,
            step_limit: DEFAULT_STEP_LIMIT,
        }
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    pub fn heap_mut(&mut self) -> &mut Heap {
        &mut self.heap
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    pub fn module(&self) -> &'m Module {
        self.module
    }

    pub fn run(&mut self, method: MethodRef, args: &[EvalValue]) -> Result<Outcome, Trap> {
        self.steps = 0;
        self.call(method, args)
    }

    /// Forgets every object and static field.
    pub fn clear_state(&mut self) {
        self.heap.clear();
        self.statics.clear();
        self.strings.clear();
        self.classes.clear();
    }

    /// Parses a literal as written in test cases: `3`, `5L`, `1.5F`, `2.0D`,
    /// `null` or a double-quoted string.
    pub fn literal(&mut self, text: &str) -> Option<EvalValue> {
        let text = text.trim();
        if let Some(s) = text.strip_prefix('"').and_then(|s| s.strip_suffix('"')) {
            return Some(EvalValue::Ref(Some(self.heap.new_string(s))));
        }
        if text == "null" {
            return Some(EvalValue::NULL);
        }
        if let Some(v) = text.strip_suffix('L') {
            return v.parse().ok().map(EvalValue::Long);
        }
        if let Some(v) = text.strip_suffix('F') {
            return v.parse().ok().map(EvalValue::Float);
        }
        if let Some(v) = text.strip_suffix('D') {
            return v.parse().ok().map(EvalValue::Double);
        }
        text.parse().ok().map(EvalValue::Int)
    }

    /// Renders a value with strings shown by content.
    pub fn render(&self, value: &EvalValue) -> String {
        if let EvalValue::Ref(Some(obj)) = value {
            if let Some(s) = self.heap.string(*obj) {
                return format!("{s:?}");
            }
        }
        value.to_string()
    }

    pub fn render_outcome(&self, outcome: &Outcome) -> String {
        match outcome {
            Outcome::Return(Some(value)) => self.render(value),
            Outcome::Return(None) => "void".to_string(),
            Outcome::Throw(obj) => match self.heap.class_of(*obj) {
                Some(class) => format!("throw {class}"),
                None => format!("throw {obj}"),
            },
        }
    }

    fn call(&mut self, method: MethodRef, args: &[EvalValue]) -> Result<Outcome, Trap> {
        let module = self.module;
        let body = module.body(method);

        let expected = body.sig.desc.params.len() + body.sig.receiver_words() as usize;
        if args.len() != expected {
            return Err(Trap::ArgCount {
                expected,
                actual: args.len(),
            });
        }
        if self.depth >= MAX_CALL_DEPTH {
            return Err(Trap::DepthExceeded(MAX_CALL_DEPTH));
        }

        self.depth += 1;
        let frame = Frame::new(method, body.max_locals, args);
        let result = self.exec(body, frame);
        self.depth -= 1;
        result
    }

    fn exec(&mut self, body: &'m MethodBody, mut frame: Frame) -> Result<Outcome, Trap> {
        let mut pc = body.layout.first_inst();
        while let Some(inst) = pc {
            self.steps += 1;
            if self.steps > self.step_limit {
                return Err(Trap::StepLimit(self.step_limit));
            }

            pc = match self.step(body, &mut frame, inst)? {
                Flow::Next => body.layout.next_inst_of(inst),
                Flow::Jump(dest) => Some(dest),
                Flow::Return(value) => return Ok(Outcome::Return(value)),
                Flow::Throw(exception) => match self.find_handler(body, &frame, inst, exception)? {
                    Some(handler) => {
                        frame.clear_stack();
                        frame.push(EvalValue::Ref(Some(exception)));
                        Some(handler)
                    }
                    None => return Ok(Outcome::Throw(exception)),
                },
            };
        }

        Err(Trap::FellOffEnd(format!(
            "{}.{}{}",
            body.sig.owner, body.sig.name, body.sig.desc
        )))
    }

    /// The handler of the first exception range covering `inst` that catches
    /// `exception`.
    fn find_handler(
        &mut self,
        body: &MethodBody,
        frame: &Frame,
        inst: InstId,
        exception: ObjRef,
    ) -> Result<Option<InstId>, Trap> {
        if body.try_catch.is_empty() {
            return Ok(None);
        }

        let class = self
            .heap
            .class_of(exception)
            .ok_or(Trap::DanglingRef(exception))?;
        let positions = self
            .positions
            .entry(frame.method)
            .or_insert_with(|| body.positions());
        let Some(&pos) = positions.get(&inst) else {
            return Ok(None);
        };

        for range in &body.try_catch {
            let (Some(&start), Some(&end)) = (positions.get(&range.start), positions.get(&range.end))
            else {
                continue;
            };
            if pos < start || pos >= end {
                continue;
            }

            let catches = match &range.catch_type {
                Some(catch_type) => self.host.is_subclass(&class, catch_type),
                None => true,
            };
            if catches {
                return Ok(Some(range.handler));
            }
        }

        Ok(None)
    }

    fn throw_new(&mut self, class: &str) -> Flow {
        Flow::Throw(self.heap.new_instance(class))
    }

    fn step(&mut self, body: &'m MethodBody, frame: &mut Frame, inst: InstId) -> Result<Flow, Trap> {
        match body.inst(inst) {
            InstData::Nop | InstData::Label | InstData::Frame(_) | InstData::Line(_) => {}

            InstData::Const(c) => {
                let value = self.constant(c);
                frame.push(value);
            }

            InstData::Load { kind, slot } => {
                let value = check_kind(*kind, frame.load(*slot)?)?;
                frame.push(value);
            }

            InstData::Store { kind, slot } => {
                let value = frame.pop_kind(*kind)?;
                frame.store(*slot, value)?;
            }

            InstData::Iinc { slot, delta } => {
                let value = frame.load(*slot)?;
                let Some(v) = value.as_int() else {
                    return Err(Trap::TypeMismatch {
                        expected: "int",
                        found: value,
                    });
                };
                frame.store(*slot, EvalValue::Int(v.wrapping_add(*delta as i32)))?;
            }

            InstData::Binary { op, .. } => {
                let rhs = frame.pop()?;
                let lhs = frame.pop()?;
                match binary(*op, lhs, rhs)? {
                    Some(value) => frame.push(value),
                    None => return Ok(self.throw_new("java/lang/ArithmeticException")),
                }
            }

            InstData::Neg(kind) => {
                let value = match frame.pop_kind(*kind)? {
                    EvalValue::Int(v) => EvalValue::Int(v.wrapping_neg()),
                    EvalValue::Long(v) => EvalValue::Long(v.wrapping_neg()),
                    EvalValue::Float(v) => EvalValue::Float(-v),
                    EvalValue::Double(v) => EvalValue::Double(-v),
                    found => {
                        return Err(Trap::TypeMismatch {
                            expected: "numeric",
                            found,
                        })
                    }
                };
                frame.push(value);
            }

            InstData::Convert(op) => {
                let value = frame.pop_kind(op.from_to().0)?;
                frame.push(convert(*op, value));
            }

            InstData::Compare(op) => {
                let rhs = frame.pop_kind(op.operand_kind())?;
                let lhs = frame.pop_kind(op.operand_kind())?;
                frame.push(EvalValue::Int(compare(*op, lhs, rhs)));
            }

            InstData::Stack(op) => match op.dup_shape() {
                Some((words, below)) => {
                    let top = frame.pop_words(words)?;
                    let under = frame.pop_words(below)?;
                    frame.extend(&top);
                    frame.extend(&under);
                    frame.extend(&top);
                }
                None => match op {
                    StackOp::Pop => {
                        frame.pop_words(1)?;
                    }
                    StackOp::Pop2 => {
                        frame.pop_words(2)?;
                    }
                    _ => {
                        let top = frame.pop_words(1)?;
                        let under = frame.pop_words(1)?;
                        frame.extend(&top);
                        frame.extend(&under);
                    }
                },
            },

            InstData::ArrayLoad(_) => {
                let index = frame.pop_int()?;
                let Some(array) = frame.pop_ref()? else {
                    return Ok(self.throw_new("java/lang/NullPointerException"));
                };
                let data = self.array_data(array)?;
                match usize::try_from(index).ok().and_then(|i| data.get(i)) {
                    Some(value) => frame.push(*value),
                    None => {
                        return Ok(self.throw_new("java/lang/ArrayIndexOutOfBoundsException"))
                    }
                }
            }

            InstData::ArrayStore(kind) => {
                let value = frame.pop_kind(kind.value_kind())?;
                let index = frame.pop_int()?;
                let Some(array) = frame.pop_ref()? else {
                    return Ok(self.throw_new("java/lang/NullPointerException"));
                };
                let value = truncate(*kind, value);
                let data = self.array_data_mut(array)?;
                match usize::try_from(index).ok().and_then(|i| data.get_mut(i)) {
                    Some(slot) => *slot = value,
                    None => {
                        return Ok(self.throw_new("java/lang/ArrayIndexOutOfBoundsException"))
                    }
                }
            }

            InstData::ArrayLength => {
                let Some(array) = frame.pop_ref()? else {
                    return Ok(self.throw_new("java/lang/NullPointerException"));
                };
                let len = self.array_data(array)?.len();
                frame.push(EvalValue::Int(len as i32));
            }

            InstData::NewArray(elem) => {
                let len = frame.pop_int()?;
                let Ok(len) = usize::try_from(len) else {
                    return Ok(self.throw_new("java/lang/NegativeArraySizeException"));
                };
                let array = self.heap.alloc(Object::Array {
                    elem: elem.clone(),
                    data: vec![EvalValue::zero_of(elem); len],
                });
                frame.push(EvalValue::Ref(Some(array)));
            }

            InstData::Field {
                op,
                owner,
                name,
                ty,
            } => return self.field(frame, *op, owner, name, ty),

            InstData::Invoke {
                kind,
                owner,
                name,
                desc,
            } => {
                let call = Call {
                    kind: *kind,
                    owner,
                    name,
                    desc,
                };
                return self.invoke(frame, call);
            }

            InstData::New(class) => {
                let obj = self.heap.new_instance(class);
                frame.push(EvalValue::Ref(Some(obj)));
            }

            InstData::CheckCast(ty) => {
                let obj = frame.pop_ref()?;
                if let Some(obj) = obj {
                    if !self.is_instance(obj, ty)? {
                        return Ok(self.throw_new("java/lang/ClassCastException"));
                    }
                }
                frame.push(EvalValue::Ref(obj));
            }

            InstData::InstanceOf(ty) => {
                let result = match frame.pop_ref()? {
                    Some(obj) => self.is_instance(obj, ty)?,
                    None => false,
                };
                frame.push(EvalValue::Int(result as i32));
            }

            InstData::Jump { cond, dest } => {
                if self.jump_taken(frame, *cond)? {
                    return Ok(Flow::Jump(*dest));
                }
            }

            InstData::Switch { cases, default } => {
                let key = frame.pop_int()?;
                let dest = cases
                    .iter()
                    .find(|(value, _)| *value == key)
                    .map_or(*default, |(_, dest)| *dest);
                return Ok(Flow::Jump(dest));
            }

            InstData::Return(kind) => {
                let value = match kind {
                    Some(kind) => Some(frame.pop_kind(*kind)?),
                    None => None,
                };
                return Ok(Flow::Return(value));
            }

            InstData::Throw => {
                return Ok(match frame.pop_ref()? {
                    Some(exception) => Flow::Throw(exception),
                    None => self.throw_new("java/lang/NullPointerException"),
                });
            }
        }

        Ok(Flow::Next)
    }

    fn constant(&mut self, c: &Const) -> EvalValue {
        match c {
            Const::Null => EvalValue::NULL,
            Const::Int(v) => EvalValue::Int(*v),
            Const::Long(v) => EvalValue::Long(*v),
            Const::Float(v) => EvalValue::Float(*v),
            Const::Double(v) => EvalValue::Double(*v),
            Const::String(s) => {
                let heap = &mut self.heap;
                let obj = *self
                    .strings
                    .entry(s.clone())
                    .or_insert_with(|| heap.new_string(s));
                EvalValue::Ref(Some(obj))
            }
            Const::Class(name) => {
                let heap = &mut self.heap;
                let obj = *self
                    .classes
                    .entry(name.clone())
                    .or_insert_with(|| heap.alloc(Object::Class(name.clone())));
                EvalValue::Ref(Some(obj))
            }
        }
    }

    fn field(
        &mut self,
        frame: &mut Frame,
        op: FieldOp,
        owner: &SmolStr,
        name: &SmolStr,
        ty: &Type,
    ) -> Result<Flow, Trap> {
        match op {
            FieldOp::GetStatic => {
                let value = self
                    .statics
                    .get(&(owner.clone(), name.clone()))
                    .copied()
                    .unwrap_or_else(|| EvalValue::zero_of(ty));
                frame.push(value);
            }

            FieldOp::PutStatic => {
                let value = frame.pop()?;
                self.statics.insert((owner.clone(), name.clone()), value);
            }

            FieldOp::GetField => {
                let Some(obj) = frame.pop_ref()? else {
                    return Ok(self.throw_new("java/lang/NullPointerException"));
                };
                let value = match self.heap.get(obj) {
                    Some(Object::Instance { fields, .. }) => fields
                        .get(name)
                        .copied()
                        .unwrap_or_else(|| EvalValue::zero_of(ty)),
                    Some(_) => {
                        return Err(Trap::TypeMismatch {
                            expected: "object instance",
                            found: EvalValue::Ref(Some(obj)),
                        })
                    }
                    None => return Err(Trap::DanglingRef(obj)),
                };
                frame.push(value);
            }

            FieldOp::PutField => {
                let value = frame.pop()?;
                let Some(obj) = frame.pop_ref()? else {
                    return Ok(self.throw_new("java/lang/NullPointerException"));
                };
                match self.heap.get_mut(obj) {
                    Some(Object::Instance { fields, .. }) => {
                        fields.insert(name.clone(), value);
                    }
                    Some(_) => {
                        return Err(Trap::TypeMismatch {
                            expected: "object instance",
                            found: EvalValue::Ref(Some(obj)),
                        })
                    }
                    None => return Err(Trap::DanglingRef(obj)),
                }
            }
        }

        Ok(Flow::Next)
    }

    fn invoke(&mut self, frame: &mut Frame, call: Call<'_>) -> Result<Flow, Trap> {
        let has_receiver = call.kind != InvokeKind::Static;
        let argc = call.desc.params.len() + has_receiver as usize;
        let args = frame.pop_n(argc)?;

        let mut runtime_class = None;
        if has_receiver {
            match args[0] {
                EvalValue::Ref(Some(receiver)) => {
                    runtime_class = self.heap.class_of(receiver);
                }
                EvalValue::Ref(None) => {
                    return Ok(self.throw_new("java/lang/NullPointerException"));
                }
                found => {
                    return Err(Trap::TypeMismatch {
                        expected: "reference",
                        found,
                    })
                }
            }
        }

        if call.name == "<init>" && call.owner == "java/lang/Object" {
            return Ok(Flow::Next);
        }

        let desc = call.desc.to_string();
        let dispatch = match call.kind {
            InvokeKind::Virtual | InvokeKind::Interface => runtime_class
                .and_then(|class| self.module.lookup(&MethodKey::new(&class, call.name, &desc))),
            _ => None,
        };
        let method =
            dispatch.or_else(|| self.module.lookup(&MethodKey::new(call.owner, call.name, &desc)));

        let outcome = match method {
            Some(method) => self.call(method, &args)?,
            None => self.host.invoke(&mut self.heap, &call, &args)?,
        };

        match outcome {
            Outcome::Return(Some(value)) => {
                if !call.desc.ret.is_void() {
                    frame.push(value);
                }
            }
            Outcome::Return(None) => {
                if !call.desc.ret.is_void() {
                    return Err(Trap::Host(format!("`{call}` returned no value")));
                }
            }
            Outcome::Throw(exception) => return Ok(Flow::Throw(exception)),
        }

        Ok(Flow::Next)
    }

    fn jump_taken(&mut self, frame: &mut Frame, cond: JumpCond) -> Result<bool, Trap> {
        Ok(match cond {
            JumpCond::Always => true,
            JumpCond::Zero(cmp) => cmp.eval(frame.pop_int()?, 0),
            JumpCond::ICmp(cmp) => {
                let rhs = frame.pop_int()?;
                let lhs = frame.pop_int()?;
                cmp.eval(lhs, rhs)
            }
            JumpCond::ACmpEq | JumpCond::ACmpNe => {
                let rhs = frame.pop_ref()?;
                let lhs = frame.pop_ref()?;
                (lhs == rhs) == (cond == JumpCond::ACmpEq)
            }
            JumpCond::Null => frame.pop_ref()?.is_none(),
            JumpCond::NonNull => frame.pop_ref()?.is_some(),
        })
    }

    fn is_instance(&self, obj: ObjRef, ty: &Type) -> Result<bool, Trap> {
        let class = self.heap.class_of(obj).ok_or(Trap::DanglingRef(obj))?;
        Ok(match ty {
            Type::Object(name) => self.host.is_subclass(&class, name),
            _ => class == ty.class_ref(),
        })
    }

    fn array_data(&self, array: ObjRef) -> Result<&Vec<EvalValue>, Trap> {
        match self.heap.get(array) {
            Some(Object::Array { data, .. }) => Ok(data),
            Some(_) => Err(Trap::TypeMismatch {
                expected: "array",
                found: EvalValue::Ref(Some(array)),
            }),
            None => Err(Trap::DanglingRef(array)),
        }
    }

    fn array_data_mut(&mut self, array: ObjRef) -> Result<&mut Vec<EvalValue>, Trap> {
        match self.heap.get_mut(array) {
            Some(Object::Array { data, .. }) => Ok(data),
            Some(_) => Err(Trap::TypeMismatch {
                expected: "array",
                found: EvalValue::Ref(Some(array)),
            }),
            None => Err(Trap::DanglingRef(array)),
        }
    }
}

/// Evaluates a binary operator. `None` signals integer division by zero.
fn binary(op: BinaryOp, lhs: EvalValue, rhs: EvalValue) -> Result<Option<EvalValue>, Trap> {
    use EvalValue::*;

    let value = match (lhs, rhs) {
        (Int(a), Int(b)) => Int(match op {
            BinaryOp::Add => a.wrapping_add(b),
            BinaryOp::Sub => a.wrapping_sub(b),
            BinaryOp::Mul => a.wrapping_mul(b),
            BinaryOp::Div | BinaryOp::Rem if b == 0 => return Ok(None),
            BinaryOp::Div => a.wrapping_div(b),
            BinaryOp::Rem => a.wrapping_rem(b),
            BinaryOp::Shl => a.wrapping_shl(b as u32),
            BinaryOp::Shr => a.wrapping_shr(b as u32),
            BinaryOp::Ushr => (a as u32).wrapping_shr(b as u32) as i32,
            BinaryOp::And => a & b,
            BinaryOp::Or => a | b,
            BinaryOp::Xor => a ^ b,
        }),

        (Long(a), Int(b)) if op.is_shift() => Long(match op {
            BinaryOp::Shl => a.wrapping_shl(b as u32),
            BinaryOp::Shr => a.wrapping_shr(b as u32),
            _ => (a as u64).wrapping_shr(b as u32) as i64,
        }),

        (Long(a), Long(b)) if !op.is_shift() => Long(match op {
            BinaryOp::Add => a.wrapping_add(b),
            BinaryOp::Sub => a.wrapping_sub(b),
            BinaryOp::Mul => a.wrapping_mul(b),
            BinaryOp::Div | BinaryOp::Rem if b == 0 => return Ok(None),
            BinaryOp::Div => a.wrapping_div(b),
            BinaryOp::Rem => a.wrapping_rem(b),
            BinaryOp::And => a & b,
            BinaryOp::Or => a | b,
            _ => a ^ b,
        }),

        (Float(a), Float(b)) => Float(match op {
            BinaryOp::Add => a + b,
            BinaryOp::Sub => a - b,
            BinaryOp::Mul => a * b,
            BinaryOp::Div => a / b,
            BinaryOp::Rem => a % b,
            _ => {
                return Err(Trap::TypeMismatch {
                    expected: "integral",
                    found: lhs,
                })
            }
        }),

        (Double(a), Double(b)) => Double(match op {
            BinaryOp::Add => a + b,
            BinaryOp::Sub => a - b,
            BinaryOp::Mul => a * b,
            BinaryOp::Div => a / b,
            BinaryOp::Rem => a % b,
            _ => {
                return Err(Trap::TypeMismatch {
                    expected: "integral",
                    found: lhs,
                })
            }
        }),

        (Int(_) | Long(_) | Float(_) | Double(_), found) => {
            return Err(Trap::TypeMismatch {
                expected: "matching operand",
                found,
            })
        }
        (found, _) => {
            return Err(Trap::TypeMismatch {
                expected: "numeric",
                found,
            })
        }
    };

    Ok(Some(value))
}

/// `value` has already been checked against the source kind of `op`.
fn convert(op: ConvOp, value: EvalValue) -> EvalValue {
    use EvalValue::*;

    match (op, value) {
        (ConvOp::I2L, Int(v)) => Long(v as i64),
        (ConvOp::I2F, Int(v)) => Float(v as f32),
        (ConvOp::I2D, Int(v)) => Double(v as f64),
        (ConvOp::I2B, Int(v)) => Int(v as i8 as i32),
        (ConvOp::I2C, Int(v)) => Int(v as u16 as i32),
        (ConvOp::I2S, Int(v)) => Int(v as i16 as i32),
        (ConvOp::L2I, Long(v)) => Int(v as i32),
        (ConvOp::L2F, Long(v)) => Float(v as f32),
        (ConvOp::L2D, Long(v)) => Double(v as f64),
        (ConvOp::F2I, Float(v)) => Int(v as i32),
        (ConvOp::F2L, Float(v)) => Long(v as i64),
        (ConvOp::F2D, Float(v)) => Double(v as f64),
        (ConvOp::D2I, Double(v)) => Int(v as i32),
        (ConvOp::D2L, Double(v)) => Long(v as i64),
        (ConvOp::D2F, Double(v)) => Float(v as f32),
        (_, other) => other,
    }
}

fn compare(op: CompareOp, lhs: EvalValue, rhs: EvalValue) -> i32 {
    use EvalValue::*;

    let ordering = match (lhs, rhs) {
        (Long(a), Long(b)) => Some(a.cmp(&b)),
        (Float(a), Float(b)) => a.partial_cmp(&b),
        (Double(a), Double(b)) => a.partial_cmp(&b),
        _ => None,
    };

    match ordering {
        Some(ordering) => ordering as i32,
        None if matches!(op, CompareOp::Fcmpg | CompareOp::Dcmpg) => 1,
        None => -1,
    }
}

fn truncate(kind: ArrayKind, value: EvalValue) -> EvalValue {
    match (kind, value) {
        (ArrayKind::Byte, EvalValue::Int(v)) => EvalValue::Int(v as i8 as i32),
        (ArrayKind::Char, EvalValue::Int(v)) => EvalValue::Int(v as u16 as i32),
        (ArrayKind::Short, EvalValue::Int(v)) => EvalValue::Int(v as i16 as i32),
        _ => value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int_arithmetic_wraps() {
        let value = binary(BinaryOp::Add, EvalValue::Int(i32::MAX), EvalValue::Int(1)).unwrap();
        assert_eq!(value, Some(EvalValue::Int(i32::MIN)));

        let value = binary(BinaryOp::Div, EvalValue::Int(i32::MIN), EvalValue::Int(-1)).unwrap();
        assert_eq!(value, Some(EvalValue::Int(i32::MIN)));

        let value = binary(BinaryOp::Rem, EvalValue::Int(7), EvalValue::Int(0)).unwrap();
        assert_eq!(value, None);
    }

    #[test]
    fn shifts_mask_their_distance() {
        let value = binary(BinaryOp::Shl, EvalValue::Int(1), EvalValue::Int(33)).unwrap();
        assert_eq!(value, Some(EvalValue::Int(2)));

        let value = binary(BinaryOp::Ushr, EvalValue::Long(-1), EvalValue::Int(63)).unwrap();
        assert_eq!(value, Some(EvalValue::Long(1)));

        assert!(binary(BinaryOp::Shl, EvalValue::Long(1), EvalValue::Long(1)).is_err());
    }

    #[test]
    fn nan_comparisons_follow_the_opcode() {
        let nan = EvalValue::Float(f32::NAN);
        let one = EvalValue::Float(1.0);
        assert_eq!(compare(CompareOp::Fcmpl, nan, one), -1);
        assert_eq!(compare(CompareOp::Fcmpg, nan, one), 1);
        assert_eq!(
            compare(CompareOp::Lcmp, EvalValue::Long(3), EvalValue::Long(2)),
            1
        );
    }

    #[test]
    fn narrowing_conversions() {
        assert_eq!(convert(ConvOp::I2B, EvalValue::Int(200)), EvalValue::Int(-56));
        assert_eq!(convert(ConvOp::I2C, EvalValue::Int(-1)), EvalValue::Int(65535));
        assert_eq!(convert(ConvOp::F2I, EvalValue::Float(f32::NAN)), EvalValue::Int(0));
    }
}
