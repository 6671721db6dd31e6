use std::io;

use annotate_snippets::{AnnotationKind, Level, Renderer, Snippet};
use ir::DescriptorError;
use smol_str::SmolStr;

use crate::{syntax::Rule, Span};

#[derive(Debug)]
pub enum Error {
    NumberOutOfBounds(Span),
    SyntaxError(Box<pest::error::Error<Rule>>),
    Undefined(UndefinedKind, Span),
    DuplicatedDeclaration(SmolStr, Span),
    InvalidDescriptor(DescriptorError, Span),

    InstArgKindMismatch {
        expected: SmolStr,
        actual: Option<SmolStr>,
        span: Span,
    },

    InstArgNumMismatch {
        expected: usize,
        actual: usize,
        span: Span,
    },

    TypeError {
        expected: String,
        span: Span,
    },
}

#[derive(Debug)]
pub enum UndefinedKind {
    Label(SmolStr),
    Inst(SmolStr),
    Directive(SmolStr),
}

impl Error {
    pub fn span(&self) -> Span {
        match self {
            Error::NumberOutOfBounds(span) => *span,
            Error::Undefined(_, span) => *span,
            Error::DuplicatedDeclaration(_, span) => *span,
            Error::InvalidDescriptor(_, span) => *span,

            Error::SyntaxError(err) => match err.location {
                pest::error::InputLocation::Pos(p) => Span(p as u32, p as u32),
                pest::error::InputLocation::Span((s, e)) => Span(s as u32, e as u32),
            },
            Error::InstArgKindMismatch { span, .. } => *span,
            Error::InstArgNumMismatch { span, .. } => *span,
            Error::TypeError { span, .. } => *span,
        }
    }

    pub fn message(&self) -> String {
        match self {
            Error::NumberOutOfBounds(_) => "number out of bounds".into(),

            Error::SyntaxError(err) => err.to_string(),

            Error::Undefined(kind, _) => match kind {
                UndefinedKind::Label(name) => format!("undefined label: `{name}`"),
                UndefinedKind::Inst(name) => format!("unknown inst: `{name}`"),
                UndefinedKind::Directive(name) => format!("unknown directive: `{name}`"),
            },

            Error::DuplicatedDeclaration(name, _) => format!("{name} is already declared"),

            Error::InvalidDescriptor(err, _) => err.to_string(),

            Error::InstArgKindMismatch {
                expected, actual, ..
            } => {
                let actual = actual.as_ref().map(|s| s.as_str()).unwrap_or("none");
                format!("inst arg kind mismatch: expected `{expected}`, but `{actual}` given")
            }

            Error::InstArgNumMismatch {
                expected, actual, ..
            } => {
                format!("expected `{expected}` number of arguments, but given `{actual}`")
            }

            Error::TypeError { expected, .. } => {
                format!("type error: expected `{expected}` here")
            }
        }
    }

    pub fn print(
        &self,
        mut w: impl io::Write,
        path: &str,
        content: &str,
        colors: bool,
    ) -> io::Result<()> {
        let label = self.message();
        let snippet = Level::ERROR.primary_title("parse error").element(
            Snippet::source(content)
                .line_start(0)
                .path(path)
                .fold(true)
                .annotation(
                    AnnotationKind::Primary
                        .span(self.span().as_range())
                        .label(&label),
                ),
        );
        let rend = if colors {
            Renderer::styled()
        } else {
            Renderer::plain()
        };
        let disp = rend.render(&[snippet]);
        writeln!(w, "{disp}")
    }

    pub fn print_to_string(&self, path: &str, content: &str, colors: bool) -> String {
        let mut v = vec![];
        if self.print(&mut v, path, content, colors).is_err() {
            return self.message();
        }
        String::from_utf8_lossy(&v).into_owned()
    }
}
