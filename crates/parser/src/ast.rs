use pest::{iterators::Pair, Parser as _};
use smol_str::SmolStr;

use crate::{
    syntax::{children, FromSyntax, Parser, Rule, Spanned},
    Error, Span,
};

pub fn parse(input: &str) -> Result<Module, Vec<Error>> {
    match Parser::parse(Rule::module, input) {
        Err(err) => Err(vec![Error::SyntaxError(Box::new(err))]),
        Ok(mut pairs) => {
            let Some(pair) = pairs.next() else {
                return Ok(Module::default());
            };
            debug_assert_eq!(pair.as_rule(), Rule::module);
            Ok(Module::from_syntax(pair))
        }
    }
}

#[derive(Debug, Default)]
pub struct Module {
    pub methods: Vec<Method>,
}

impl FromSyntax for Module {
    fn from_syntax(pair: Pair<'_, Rule>) -> Self {
        let mut methods = vec![];
        let mut comments = vec![];

        for p in pair.into_inner() {
            match p.as_rule() {
                Rule::COMMENT => comments.push(p.as_str().to_string()),
                Rule::method => {
                    let mut method = Method::from_syntax(p);
                    method.comments = std::mem::take(&mut comments);
                    methods.push(method);
                }
                _ => {}
            }
        }

        Module { methods }
    }
}

#[derive(Debug)]
pub struct Method {
    pub comments: Vec<String>,
    pub is_static: bool,
    pub owner: Spanned<SmolStr>,
    pub name: Spanned<SmolStr>,
    pub desc: Spanned<SmolStr>,
    pub lines: Vec<Spanned<Line>>,
    pub span: Span,
}

impl FromSyntax for Method {
    fn from_syntax(pair: Pair<'_, Rule>) -> Self {
        let span = Span::of(&pair);
        let mut is_static = false;
        let mut owner = Spanned::new(SmolStr::default(), span);
        let mut name = owner.clone();
        let mut desc = owner.clone();
        let mut lines = vec![];

        for p in children(pair) {
            match p.as_rule() {
                Rule::is_static => is_static = true,
                Rule::method_ref => {
                    for part in p.into_inner() {
                        let spanned = Spanned::<SmolStr>::from_syntax(part.clone());
                        match part.as_rule() {
                            Rule::class_name => owner = spanned,
                            Rule::member_name => name = spanned,
                            Rule::method_desc => desc = spanned,
                            _ => {}
                        }
                    }
                }
                Rule::label_def | Rule::inst => lines.push(Spanned::from_syntax(p)),
                _ => {}
            }
        }

        Method {
            comments: vec![],
            is_static,
            owner,
            name,
            desc,
            lines,
            span,
        }
    }
}

impl FromSyntax for SmolStr {
    fn from_syntax(pair: Pair<'_, Rule>) -> Self {
        pair.as_str().into()
    }
}

#[derive(Debug)]
pub enum Line {
    Label(SmolStr),
    Inst {
        opcode: Spanned<SmolStr>,
        operands: Vec<Spanned<Operand>>,
    },
}

impl FromSyntax for Line {
    fn from_syntax(pair: Pair<'_, Rule>) -> Self {
        match pair.as_rule() {
            Rule::label_def => {
                let name = children(pair)
                    .next()
                    .map(|p| SmolStr::from(p.as_str()))
                    .unwrap_or_default();
                Line::Label(name)
            }
            _ => {
                let mut inner = children(pair);
                let opcode = match inner.next() {
                    Some(p) => Spanned::from_syntax(p),
                    None => Spanned::new(SmolStr::default(), Span::default()),
                };
                let operands = inner.map(Spanned::from_syntax).collect();
                Line::Inst { opcode, operands }
            }
        }
    }
}

#[derive(Debug)]
pub enum Operand {
    Word(SmolStr),
    Str(String),
    List(Vec<Spanned<SmolStr>>),
    Switch {
        cases: Vec<(Spanned<SmolStr>, Spanned<SmolStr>)>,
        default: Spanned<SmolStr>,
    },
}

impl FromSyntax for Operand {
    fn from_syntax(pair: Pair<'_, Rule>) -> Self {
        match pair.as_rule() {
            Rule::string => {
                let body = children(pair).next().map(|p| p.as_str()).unwrap_or("");
                Operand::Str(unescape(body))
            }
            Rule::vtype_list => Operand::List(children(pair).map(Spanned::from_syntax).collect()),
            Rule::switch_table => {
                let mut cases = vec![];
                let mut default = None;
                for p in children(pair) {
                    match p.as_rule() {
                        Rule::switch_case => {
                            let mut kv = children(p).map(Spanned::<SmolStr>::from_syntax);
                            if let (Some(key), Some(dest)) = (kv.next(), kv.next()) {
                                cases.push((key, dest));
                            }
                        }
                        _ => default = Some(Spanned::from_syntax(p)),
                    }
                }
                let default =
                    default.unwrap_or_else(|| Spanned::new(SmolStr::default(), Span::default()));
                Operand::Switch { cases, default }
            }
            _ => Operand::Word(pair.as_str().into()),
        }
    }
}

impl Operand {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Word(_) => "word",
            Self::Str(_) => "string",
            Self::List(_) => "type list",
            Self::Switch { .. } => "switch table",
        }
    }
}

fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('0') => out.push('\0'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}
