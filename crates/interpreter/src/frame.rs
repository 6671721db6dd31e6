use stitch_ir::{inst::ValueKind, MethodRef};

use crate::{EvalValue, ObjRef, Trap};

/// Activation record of a method being executed.
#[derive(Debug)]
pub(crate) struct Frame {
    pub method: MethodRef,
    locals: Vec<EvalValue>,
    stack: Vec<EvalValue>,
}

impl Frame {
    pub fn new(method: MethodRef, max_locals: u16, args: &[EvalValue]) -> Self {
        let arg_words: u16 = args.iter().map(EvalValue::words).sum();
        let mut locals = vec![EvalValue::Undefined; max_locals.max(arg_words) as usize];

        let mut slot = 0;
        for arg in args {
            locals[slot] = *arg;
            slot += arg.words() as usize;
        }

        Self {
            method,
            locals,
            stack: Vec::new(),
        }
    }

    pub fn load(&self, slot: u16) -> Result<EvalValue, Trap> {
        self.locals
            .get(slot as usize)
            .copied()
            .ok_or(Trap::SlotOutOfRange(slot))
    }

    pub fn store(&mut self, slot: u16, value: EvalValue) -> Result<(), Trap> {
        let idx = slot as usize;
        if idx + value.words() as usize > self.locals.len() {
            return Err(Trap::SlotOutOfRange(slot));
        }

        // Overwriting the upper half of a wide value invalidates it.
        if idx > 0 && self.locals[idx - 1].is_wide() {
            self.locals[idx - 1] = EvalValue::Undefined;
        }
        self.locals[idx] = value;
        if value.is_wide() {
            self.locals[idx + 1] = EvalValue::Undefined;
        }
        Ok(())
    }

    pub fn push(&mut self, value: EvalValue) {
        self.stack.push(value);
    }

    pub fn extend(&mut self, values: &[EvalValue]) {
        self.stack.extend_from_slice(values);
    }

    pub fn pop(&mut self) -> Result<EvalValue, Trap> {
        self.stack.pop().ok_or(Trap::StackUnderflow)
    }

    pub fn pop_kind(&mut self, kind: ValueKind) -> Result<EvalValue, Trap> {
        let value = self.pop()?;
        check_kind(kind, value)
    }

    pub fn pop_int(&mut self) -> Result<i32, Trap> {
        let value = self.pop()?;
        value.as_int().ok_or(Trap::TypeMismatch {
            expected: "int",
            found: value,
        })
    }

    pub fn pop_ref(&mut self) -> Result<Option<ObjRef>, Trap> {
        let value = self.pop()?;
        value.as_obj().ok_or(Trap::TypeMismatch {
            expected: "reference",
            found: value,
        })
    }

    /// Pops `n` entries, returned bottom first.
    pub fn pop_n(&mut self, n: usize) -> Result<Vec<EvalValue>, Trap> {
        if self.stack.len() < n {
            return Err(Trap::StackUnderflow);
        }
        Ok(self.stack.split_off(self.stack.len() - n))
    }

    /// Pops entries covering exactly `words` stack words, returned bottom
    /// first.
    pub fn pop_words(&mut self, words: u16) -> Result<Vec<EvalValue>, Trap> {
        let mut values = Vec::new();
        let mut taken = 0;
        while taken < words {
            let value = self.pop()?;
            taken += value.words();
            values.push(value);
        }

        if taken != words {
            return Err(Trap::InvalidOperands);
        }
        values.reverse();
        Ok(values)
    }

    pub fn clear_stack(&mut self) {
        self.stack.clear();
    }
}

pub(crate) fn check_kind(kind: ValueKind, value: EvalValue) -> Result<EvalValue, Trap> {
    let ok = match kind {
        ValueKind::Int => matches!(value, EvalValue::Int(_)),
        ValueKind::Long => matches!(value, EvalValue::Long(_)),
        ValueKind::Float => matches!(value, EvalValue::Float(_)),
        ValueKind::Double => matches!(value, EvalValue::Double(_)),
        ValueKind::Ref => matches!(value, EvalValue::Ref(_)),
    };

    if ok {
        Ok(value)
    } else {
        Err(Trap::TypeMismatch {
            expected: kind_name(kind),
            found: value,
        })
    }
}

fn kind_name(kind: ValueKind) -> &'static str {
    match kind {
        ValueKind::Int => "int",
        ValueKind::Long => "long",
        ValueKind::Float => "float",
        ValueKind::Double => "double",
        ValueKind::Ref => "reference",
    }
}

#[cfg(test)]
mod tests {
    use cranelift_entity::EntityRef;

    use super::*;

    #[test]
    fn wide_args_take_two_slots() {
        let args = [EvalValue::Long(7), EvalValue::Int(3)];
        let frame = Frame::new(MethodRef::new(0), 3, &args);
        assert_eq!(frame.load(0).unwrap(), EvalValue::Long(7));
        assert!(frame.load(1).unwrap().is_undef());
        assert_eq!(frame.load(2).unwrap(), EvalValue::Int(3));
    }

    #[test]
    fn store_into_upper_half_kills_wide_value() {
        let mut frame = Frame::new(MethodRef::new(0), 2, &[EvalValue::Double(1.0)]);
        frame.store(1, EvalValue::Int(5)).unwrap();
        assert!(frame.load(0).unwrap().is_undef());
        assert!(matches!(
            frame.store(1, EvalValue::Long(1)),
            Err(Trap::SlotOutOfRange(1))
        ));
    }

    #[test]
    fn pop_words_respects_categories() {
        let mut frame = Frame::new(MethodRef::new(0), 0, &[]);
        frame.extend(&[EvalValue::Int(1), EvalValue::Long(2)]);
        assert!(matches!(frame.pop_words(1), Err(Trap::InvalidOperands)));

        frame.extend(&[EvalValue::Int(1), EvalValue::Int(2)]);
        assert_eq!(
            frame.pop_words(2).unwrap(),
            vec![EvalValue::Int(1), EvalValue::Int(2)]
        );
    }
}
