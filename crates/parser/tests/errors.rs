use std::path::Path;

use dir_test::{dir_test, Fixture};
use stitch_parser::{parse_module, Error, UndefinedKind};

#[dir_test(
    dir: "$CARGO_MANIFEST_DIR/test_files/errors/",
    glob: "*.jir"
)]
fn test_errors(fixture: Fixture<&str>) {
    let Err(errs) = parse_module(fixture.content()) else {
        panic!("expected parse_module to fail with errors");
    };
    let path = Path::new(fixture.path())
        .file_name()
        .unwrap()
        .to_string_lossy();

    let mut v = vec![];
    for err in &errs {
        err.print(&mut v, &path, fixture.content(), false).unwrap();
    }
    let s = String::from_utf8(v).unwrap();
    assert!(s.contains("parse error"), "{s}");
    assert!(s.contains(path.as_ref()), "{s}");
}

fn single_error(src: &str) -> Error {
    let mut errs = parse_module(src).err().expect("expected errors");
    assert_eq!(errs.len(), 1, "{errs:?}");
    errs.remove(0)
}

#[test]
fn undefined_label() {
    let src = include_str!("../test_files/errors/undefined_label.jir");
    let err = single_error(src);
    assert!(matches!(&err, Error::Undefined(UndefinedKind::Label(name), _) if name == "L9"));
    assert_eq!(&src[err.span().as_range()], "L9");
}

#[test]
fn unknown_inst() {
    let src = include_str!("../test_files/errors/unknown_inst.jir");
    let err = single_error(src);
    assert!(matches!(&err, Error::Undefined(UndefinedKind::Inst(name), _) if name == "frobnicate"));
    assert_eq!(err.message(), "unknown inst: `frobnicate`");
}

#[test]
fn arg_count() {
    let err = single_error(include_str!("../test_files/errors/arg_count.jir"));
    assert!(matches!(
        err,
        Error::InstArgNumMismatch {
            expected: 1,
            actual: 2,
            ..
        }
    ));
}

#[test]
fn bad_descriptor() {
    let src = include_str!("../test_files/errors/bad_descriptor.jir");
    let err = single_error(src);
    assert!(matches!(err, Error::InvalidDescriptor(..)));
    assert_eq!(&src[err.span().as_range()], "(Q)V");
}

#[test]
fn syntax_error_has_position() {
    let src = "method static demo/A.f()V {\n    return\n";
    let err = single_error(src);
    assert!(matches!(err, Error::SyntaxError(_)));
    assert!(err.span().0 as usize <= src.len());
}
