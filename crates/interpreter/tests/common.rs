use std::io::Write;

use once_cell::sync::Lazy;
use regex::Regex;
use stitch_interpreter::{Host, Machine, Outcome};
use stitch_ir::MethodRef;
use stitch_parser::ParsedModule;

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
            let msg = format!(
                "Method: {method_name}\n\
                Description: {text}\n\
                Expected: {expected}\n\
                Evaluated: {evaluated}\n"
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

fn method_name(module: &stitch_ir::Module, method: MethodRef) -> String {
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
