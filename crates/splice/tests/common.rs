use std::io::Write;

use once_cell::sync::Lazy;
use regex::Regex;
use stitch_interpreter::{Host, Machine, Outcome};
use stitch_ir::{
    inst::FieldOp, ir_writer::BodyWriter, InstData, InstId, MethodBody, MethodRef, Module,
};
use stitch_parser::ParsedModule;
use stitch_splice::{DecorateInjector, EjectInjector, InjectionPipeline, SurfaceKind};
use stitch_verifier::{verify_body, VerificationLevel, VerifierConfig};

pub fn parse_module(file_path: &str) -> ParsedModule {
    let content = std::fs::read_to_string(file_path).unwrap();

    match stitch_parser::parse_module(&content) {
        Ok(r) => r,
        Err(errs) => {
            let mut v: Vec<u8> = Vec::new();
            for err in errs {
                err.print(&mut v, file_path, &content, false).unwrap();
                writeln!(&mut v).unwrap();
            }
            let err_str = String::from_utf8(v).unwrap();

            panic!("{err_str}");
        }
    }
}

/// Applies the `#!` directives attached to every method, verifying each
/// rewritten body at the strictest level.
///
/// ```text
/// #! decorate <owner.handler> <surface> [<owner.member> | <class>]
/// #! eject <owner.handler> <owner.member>
/// #! error <message fragment>
/// ```
pub fn apply_directives(parsed: &mut ParsedModule) -> Result<(), String> {
    let mut errors = Vec::new();
    let methods: Vec<_> = parsed.module.methods().collect();
    for method in methods {
        let mut directives = Vec::new();
        for comment in &parsed.debug.method_comments[method] {
            if let Some(text) = comment.strip_prefix("#!") {
                directives.push(Directive::parse(&parsed.module, method, text.trim())?);
            }
        }
        if directives.is_empty() {
            continue;
        }

        if let Err(e) = apply(&mut parsed.module, method, &directives) {
            errors.push(e);
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors.join("\n"))
    }
}

#[derive(Debug, Clone)]
enum Directive {
    Decorate {
        handler: MethodRef,
        surface: SurfaceKind,
        anchor: AnchorPattern,
    },
    Eject {
        handler: MethodRef,
        anchor: AnchorPattern,
    },
    Error(String),
}

impl Directive {
    fn parse(module: &Module, method: MethodRef, text: &str) -> Result<Self, String> {
        let err = |msg: &str| format_error(&method_name(module, method), msg);
        let words: Vec<_> = text.split_whitespace().collect();

        match words.as_slice() {
            ["error", ..] => Ok(Self::Error(text["error".len()..].trim().to_string())),
            ["eject", handler, member] => Ok(Self::Eject {
                handler: lookup(module, handler).ok_or_else(|| err("unknown handler"))?,
                anchor: AnchorPattern::invoke(member).ok_or_else(|| err("invalid member"))?,
            }),
            ["decorate", handler, surface, rest @ ..] => {
                let handler = lookup(module, handler).ok_or_else(|| err("unknown handler"))?;
                let (surface, anchor) = AnchorPattern::parse(surface, rest)
                    .ok_or_else(|| err(&format!("invalid anchor `{text}`")))?;
                Ok(Self::Decorate {
                    handler,
                    surface,
                    anchor,
                })
            }
            _ => Err(err(&format!("invalid directive `{text}`"))),
        }
    }

    fn handler(&self) -> Option<MethodRef> {
        match self {
            Self::Decorate { handler, .. } | Self::Eject { handler, .. } => Some(*handler),
            Self::Error(_) => None,
        }
    }
}

#[derive(Debug, Clone)]
enum AnchorPattern {
    Invoke { owner: String, name: String },
    Field { op: FieldOp, owner: String, name: String },
    New(String),
    Return,
    /// The first real instruction.
    Head,
}

impl AnchorPattern {
    fn parse(surface: &str, rest: &[&str]) -> Option<(SurfaceKind, Self)> {
        let field = |op| {
            let (owner, name) = split_member(rest.first()?)?;
            Some((SurfaceKind::FieldAccess, Self::Field { op, owner, name }))
        };

        match (surface, rest) {
            ("invoke", [member]) => Some((SurfaceKind::Invoke, Self::invoke(member)?)),
            ("getfield", [_]) => field(FieldOp::GetField),
            ("putfield", [_]) => field(FieldOp::PutField),
            ("getstatic", [_]) => field(FieldOp::GetStatic),
            ("putstatic", [_]) => field(FieldOp::PutStatic),
            ("new", [class]) => Some((SurfaceKind::Construct, Self::New(class.to_string()))),
            ("return", []) => Some((SurfaceKind::ReturnSite, Self::Return)),
            ("head", []) => Some((SurfaceKind::PureInjection, Self::Head)),
            _ => None,
        }
    }

    fn invoke(member: &str) -> Option<Self> {
        let (owner, name) = split_member(member)?;
        Some(Self::Invoke { owner, name })
    }

    fn select(&self, body: &MethodBody) -> Vec<InstId> {
        if let Self::Head = self {
            return body
                .iter_inst()
                .find(|inst| !body.inst(*inst).is_pseudo())
                .into_iter()
                .collect();
        }

        body.iter_inst()
            .filter(|inst| match (self, body.inst(*inst)) {
                (
                    Self::Invoke { owner, name },
                    InstData::Invoke {
                        owner: o, name: n, ..
                    },
                ) => o.as_str() == owner && n.as_str() == name,
                (
                    Self::Field { op, owner, name },
                    InstData::Field {
                        op: o,
                        owner: fo,
                        name: n,
                        ..
                    },
                ) => o == op && fo.as_str() == owner && n.as_str() == name,
                (Self::New(class), InstData::New(c)) => c.as_str() == class,
                (Self::Return, InstData::Return(_)) => true,
                _ => false,
            })
            .collect()
    }
}

fn apply(module: &mut Module, method: MethodRef, directives: &[Directive]) -> Result<(), String> {
    let name = method_name(module, method);
    let handlers: Vec<MethodBody> = directives
        .iter()
        .filter_map(Directive::handler)
        .map(|handler| module.body(handler).clone())
        .collect();

    let mut pipeline = InjectionPipeline::new();
    let mut handlers_iter = handlers.iter();
    let mut expected_error = None;
    for directive in directives {
        match directive {
            Directive::Decorate {
                surface, anchor, ..
            } => {
                let handler = handlers_iter.next().unwrap();
                let anchor = anchor.clone();
                pipeline.push(DecorateInjector::new(
                    handler,
                    *surface,
                    move |body: &MethodBody| anchor.select(body),
                ));
            }
            Directive::Eject { anchor, .. } => {
                let handler = handlers_iter.next().unwrap();
                let anchor = anchor.clone();
                pipeline.push(EjectInjector::new(handler, move |body: &MethodBody| {
                    anchor.select(body)
                }));
            }
            Directive::Error(msg) => expected_error = Some(msg.as_str()),
        }
    }

    let before = dump(module.body(method));
    let result = pipeline.run(module.body_mut(method));
    let body = module.body(method);

    match (result, expected_error) {
        (Ok(outcome), None) => {
            if outcome.injections == 0 {
                return Err(format_error(&name, "no anchor matched"));
            }
            let report = verify_body(body, &VerifierConfig::for_level(VerificationLevel::Full));
            if report.is_ok() {
                Ok(())
            } else {
                Err(format_error(
                    &name,
                    &format!("rewritten body does not verify:\n{report}\n{}", dump(body)),
                ))
            }
        }
        (Ok(_), Some(msg)) => Err(format_error(
            &name,
            &format!("expected error containing `{msg}`, the injection succeeded"),
        )),
        (Err(err), Some(msg)) => {
            let err = err.to_string();
            if !err.contains(msg) {
                Err(format_error(
                    &name,
                    &format!("expected error containing `{msg}`, got `{err}`"),
                ))
            } else if dump(body) != before {
                Err(format_error(&name, "failed injection modified the target"))
            } else {
                Ok(())
            }
        }
        (Err(err), None) => Err(format_error(&name, &err.to_string())),
    }
}

pub fn parse_test_cases(module: &ParsedModule) -> Result<Vec<TestCase>, String> {
    let mut cases = Vec::new();
    for method in module.module.methods() {
        for comment in &module.debug.method_comments[method] {
            if comment.starts_with("#[") {
                cases.push(TestCase::parse(module, method, comment)?);
            }
        }
    }

    Ok(cases)
}

#[derive(Debug)]
pub struct TestCase {
    args: Vec<String>,
    ret: Option<String>,
    text: String,
    method: MethodRef,
}

impl TestCase {
    pub fn run<H: Host>(self, machine: &mut Machine<'_, H>) -> Result<(), String> {
        let method_name = method_name(machine.module(), self.method);

        let mut args = Vec::with_capacity(self.args.len());
        for arg in &self.args {
            match machine.literal(arg) {
                Some(value) => args.push(value),
                None => {
                    return Err(format_error(
                        &method_name,
                        &format!("invalid argument literal `{arg}`"),
                    ))
                }
            }
        }

        let expected = match &self.ret {
            Some(ret) if ret.starts_with("throw ") => ret.clone(),
            Some(ret) => match machine.literal(ret) {
                Some(value) => machine.render(&value),
                None => {
                    return Err(format_error(
                        &method_name,
                        &format!("invalid return literal `{ret}`"),
                    ))
                }
            },
            None => machine.render_outcome(&Outcome::Return(None)),
        };

        let evaluated = match machine.run(self.method, &args) {
            Ok(outcome) => machine.render_outcome(&outcome),
            Err(trap) => format!("trap: {trap}"),
        };
        machine.clear_state();

        if expected != evaluated {
            let text = &self.text;
            let body = dump(machine.module().body(self.method));
            let msg = format!(
                "Method: {method_name}\n\
                Description: {text}\n\
                Expected: {expected}\n\
                Evaluated: {evaluated}\n\
                Body:\n{body}"
            );
            Err(format_error(&method_name, &msg))
        } else {
            Ok(())
        }
    }

    fn parse(module: &ParsedModule, method: MethodRef, comment: &str) -> Result<Self, String> {
        let Some(caps) = PATTERN.captures(comment) else {
            let method_name = method_name(&module.module, method);
            return Err(format_error(
                &method_name,
                &format!(
                    "Parsing Error:\n\
                    Comment: `{comment}`\n\
                    Expected Format: `#[(args_list) -> ret]`."
                ),
            ));
        };

        let args = caps["args"]
            .split(',')
            .map(str::trim)
            .filter(|arg| !arg.is_empty())
            .map(str::to_string)
            .collect();
        let ret = caps.name("ret").map(|m| m.as_str().trim().to_string());

        Ok(Self {
            args,
            ret,
            text: comment.to_string(),
            method,
        })
    }
}

fn lookup(module: &Module, member: &str) -> Option<MethodRef> {
    let (owner, name) = split_member(member)?;
    module.lookup_by_name(&owner, &name)
}

fn split_member(member: &str) -> Option<(String, String)> {
    let (owner, name) = member.rsplit_once('.')?;
    Some((owner.to_string(), name.to_string()))
}

fn dump(body: &MethodBody) -> String {
    BodyWriter::new(body).dump_string().unwrap()
}

fn method_name(module: &Module, method: MethodRef) -> String {
    let sig = &module.body(method).sig;
    format!("{}.{}{}", sig.owner, sig.name, sig.desc)
}

static PATTERN: Lazy<Regex> = Lazy::new(|| {
    // [((args,)*) (-> ret)?]
    Regex::new(
        r#"(?x)
        \[
        \((?P<args>[^)]*)\)
        (?:\s*->\s*(?P<ret>[a-zA-Z0-9_.\-/"\x20]+))?
        \]
    "#,
    )
    .unwrap()
});

fn format_error(method_name: &str, msg: &str) -> String {
    format!("[{method_name}]: {msg}")
}
