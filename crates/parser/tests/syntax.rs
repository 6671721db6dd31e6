use dir_test::{dir_test, Fixture};
use ir::ir_writer::ModuleWriter;
use pest::Parser as _;
use stitch_parser::{
    ast, parse_module,
    syntax::{Parser, Rule},
    Error,
};

#[dir_test(
    dir: "$CARGO_MANIFEST_DIR/test_files/syntax",
    glob: "*.jir"
)]
fn test_module_syntax(fixture: Fixture<&str>) {
    if let Err(err) = Parser::parse(Rule::module, fixture.content()) {
        let s = Error::SyntaxError(Box::new(err)).print_to_string(
            fixture.path(),
            fixture.content(),
            true,
        );
        eprintln!("{s}");
        panic!("syntax error");
    }
}

#[dir_test(
    dir: "$CARGO_MANIFEST_DIR/test_files/syntax",
    glob: "*.jir"
)]
fn test_module_round_trip(fixture: Fixture<&str>) {
    let first = write(fixture.content(), fixture.path());
    let second = write(&first, fixture.path());
    assert_eq!(first, second);
}

#[test]
fn module_ast() {
    let module = ast::parse(
        "\
# comment
method static demo/A.f(I)I {
  L0:
    iload 0 # trailing
    ireturn
}
",
    )
    .unwrap();
    assert_eq!(module.methods.len(), 1);
    let method = &module.methods[0];
    assert!(method.is_static);
    assert_eq!(method.owner.inner, "demo/A");
    assert_eq!(method.name.inner, "f");
    assert_eq!(method.desc.inner, "(I)I");
    assert_eq!(method.comments, vec!["# comment".to_string()]);
    assert_eq!(method.lines.len(), 3);
    assert!(matches!(&method.lines[0].inner, ast::Line::Label(name) if name == "L0"));
    match &method.lines[1].inner {
        ast::Line::Inst { opcode, operands } => {
            assert_eq!(opcode.inner, "iload");
            assert_eq!(operands.len(), 1);
        }
        other => panic!("unexpected line {other:?}"),
    }
}

#[test]
fn writes_construct_fixture() {
    let text = write(
        include_str!("../test_files/syntax/construct.jir"),
        "construct.jir",
    );
    insta::assert_snapshot!(text, @r#"
    method demo/Box.<init>(Ljava/lang/Object;)V {
        .limits locals 2 stack 2
        aload 0
        invokespecial java/lang/Object.<init>()V
        aload 0
        aload 1
        putfield demo/Box.value Ljava/lang/Object;
        return
    }

    method static demo/Box.wrap(Z)Ldemo/Box; {
        .limits locals 1 stack 3
      L0:
        new demo/Box
        dup
        iload 0
        ifeq L1
        ldc "yes"
        goto L2
      L1:
        frame full [int] [uninit(L0), uninit(L0)]
        ldc "no \"quoted\""
      L2:
        frame full [int] [uninit(L0), uninit(L0), java/lang/String]
        invokespecial demo/Box.<init>(Ljava/lang/Object;)V
        areturn
    }
    "#);
}

fn write(content: &str, path: &str) -> String {
    match parse_module(content) {
        Ok(parsed) => ModuleWriter::new(&parsed.module).dump_string().unwrap(),
        Err(errs) => {
            for err in errs {
                eprintln!("{}", err.print_to_string(path, content, true));
            }
            panic!("failed to parse {path}");
        }
    }
}
