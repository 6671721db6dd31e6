use std::fmt;

use stitch_ir::{InstId, MethodKey};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiagnosticCode {
    InvalidJumpTarget,
    InvalidLabelRef,
    InvalidNewRef,
    MissingTerminator,
    DeadCodeWithoutFrame,
    EmptyRange,
    RangeNotNested,
    SlotOutOfRange,
    StackOverflow,
    StackUnderflow,
    InvalidStackOperands,
    MissingTypeState,
    FrameMismatch,
    FrameExceedsLimits,
    MissingFrame,
    InvalidFrame,
    SlotCollision,
}

impl DiagnosticCode {
    pub const fn as_u16(self) -> u16 {
        match self {
            Self::InvalidJumpTarget => 1,
            Self::InvalidLabelRef => 2,
            Self::InvalidNewRef => 3,
            Self::MissingTerminator => 100,
            Self::DeadCodeWithoutFrame => 101,
            Self::EmptyRange => 200,
            Self::RangeNotNested => 201,
            Self::SlotOutOfRange => 300,
            Self::StackOverflow => 301,
            Self::StackUnderflow => 302,
            Self::InvalidStackOperands => 303,
            Self::MissingTypeState => 304,
            Self::FrameMismatch => 400,
            Self::FrameExceedsLimits => 401,
            Self::MissingFrame => 402,
            Self::InvalidFrame => 403,
            Self::SlotCollision => 500,
        }
    }

    pub fn as_str(self) -> String {
        format!("JV{:04}", self.as_u16())
    }
}

impl fmt::Display for DiagnosticCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.as_str().fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Error => "error".fmt(f),
            Self::Warning => "warning".fmt(f),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    Module,
    Method(MethodKey),
    Inst { method: MethodKey, inst: InstId },
    Slot { method: MethodKey, slot: u16 },
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Module => "module".fmt(f),
            Self::Method(method) => write_method(f, method),
            Self::Inst { method, inst } => {
                write_method(f, method)?;
                write!(f, ":inst{}", inst.as_u32())
            }
            Self::Slot { method, slot } => {
                write_method(f, method)?;
                write!(f, ":slot{slot}")
            }
        }
    }
}

fn write_method(f: &mut fmt::Formatter<'_>, method: &MethodKey) -> fmt::Result {
    write!(f, "{}.{}{}", method.owner, method.name, method.desc)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Note {
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosticContext {
    pub inst_text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub code: DiagnosticCode,
    pub severity: Severity,
    pub message: String,
    pub primary: Location,
    pub notes: Vec<Note>,
    pub context: Option<DiagnosticContext>,
}

impl Diagnostic {
    pub fn new(
        code: DiagnosticCode,
        severity: Severity,
        message: impl Into<String>,
        primary: Location,
    ) -> Self {
        Self {
            code,
            severity,
            message: message.into(),
            primary,
            notes: Vec::new(),
            context: None,
        }
    }

    pub fn error(code: DiagnosticCode, message: impl Into<String>, primary: Location) -> Self {
        Self::new(code, Severity::Error, message, primary)
    }

    pub fn warning(code: DiagnosticCode, message: impl Into<String>, primary: Location) -> Self {
        Self::new(code, Severity::Warning, message, primary)
    }

    pub fn with_note(mut self, message: impl Into<String>) -> Self {
        self.notes.push(Note {
            message: message.into(),
        });
        self
    }

    pub fn with_context(mut self, context: DiagnosticContext) -> Self {
        self.context = Some(context);
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}] {} @ {}",
            self.severity, self.code, self.message, self.primary
        )?;

        if let Some(inst_text) = self.context.as_ref().and_then(|c| c.inst_text.as_ref()) {
            write!(f, " ({inst_text})")?;
        }

        writeln!(f)?;

        for note in &self.notes {
            writeln!(f, "  note: {}", note.message)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_code_location_and_notes() {
        let method = MethodKey::new("demo/A", "f", "(I)I");
        let diag = Diagnostic::warning(
            DiagnosticCode::SlotCollision,
            "slot 3 is bound twice",
            Location::Slot { method, slot: 3 },
        )
        .with_note("handler parameter 1")
        .with_context(DiagnosticContext {
            inst_text: Some("iload 3".into()),
        });

        assert_eq!(
            diag.to_string(),
            "warning [JV0500] slot 3 is bound twice @ demo/A.f(I)I:slot3 (iload 3)\n  note: handler parameter 1\n"
        );
        assert!(!diag.is_error());
    }
}
