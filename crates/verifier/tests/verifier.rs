use stitch_ir::{
    inst::{InstData, ValueKind},
    MethodBody, MethodDescriptor, MethodSig, Type,
};
use stitch_parser::parse_module;
use stitch_verifier::{
    verify_body, verify_module, DiagnosticCode, VerificationLevel, VerificationReport,
    VerifierConfig,
};

fn has_code(report: &VerificationReport, code: &str) -> bool {
    report
        .diagnostics
        .iter()
        .any(|diagnostic| diagnostic.code.as_str() == code)
}

fn verify_src(src: &str, level: VerificationLevel) -> VerificationReport {
    let parsed = parse_module(src).expect("module should parse");
    verify_module(&parsed.module, &VerifierConfig::for_level(level))
}

#[test]
fn valid_module_is_ok() {
    let src = r#"
method static demo/Loops.sum(I)I {
    iconst 0
    istore 1
    iconst 0
    istore 2
  L0:
    frame append [int, int]
    iload 2
    iload 0
    if_icmpge L1
    iload 1
    iload 2
    iadd
    istore 1
    iinc 2 1
    goto L0
  L1:
    frame same
    iload 1
    ireturn
}
"#;

    let report = verify_src(src, VerificationLevel::Full);
    assert!(report.is_ok(), "expected no verifier errors, got {report}");
    assert_eq!(report.to_string(), "verification succeeded");
}

#[test]
fn missing_terminator_is_reported() {
    let src = r#"
method static demo/A.f()V {
    iconst 1
    pop
}
"#;

    let report = verify_src(src, VerificationLevel::Fast);
    assert!(has_code(&report, "JV0100"), "expected JV0100, got {report}");
}

#[test]
fn jump_to_detached_label_is_reported() {
    let sig = MethodSig::new("demo/A", "f", MethodDescriptor::new(&[], Type::Void), true);
    let mut body = MethodBody::new(sig);
    let detached = body.make_inst(InstData::Label);
    body.append_inst_data(InstData::goto(detached));
    body.append_inst_data(InstData::Return(None));

    let report = verify_body(&body, &VerifierConfig::for_level(VerificationLevel::Full));
    assert!(report.has_code(DiagnosticCode::InvalidJumpTarget), "{report}");
    // Later passes are skipped once references are broken.
    assert_eq!(report.diagnostics.len(), 1, "{report}");
}

#[test]
fn stack_limit_is_checked() {
    let src = r#"
method static demo/A.f()I {
    .limits locals 0 stack 1
    iconst 1
    iconst 2
    iadd
    ireturn
}
"#;

    let report = verify_src(src, VerificationLevel::Standard);
    assert!(has_code(&report, "JV0301"), "expected JV0301, got {report}");

    let report = verify_src(src, VerificationLevel::Fast);
    assert!(report.is_ok(), "fast level does not check limits: {report}");
}

#[test]
fn slot_limit_is_checked() {
    let sig = MethodSig::new(
        "demo/A",
        "f",
        MethodDescriptor::new(&[Type::Int], Type::Void),
        true,
    );
    let mut body = MethodBody::new(sig);
    body.max_stack = 1;
    body.append_inst_data(InstData::load(ValueKind::Int, 0));
    body.append_inst_data(InstData::store(ValueKind::Long, 1));
    body.append_inst_data(InstData::Return(None));

    let report = verify_body(&body, &VerifierConfig::default());
    let errors: Vec<_> = report.errors().collect();
    assert!(errors
        .iter()
        .any(|diag| diag.code == DiagnosticCode::SlotOutOfRange));
}

#[test]
fn stack_underflow_is_reported() {
    let src = r#"
method static demo/A.f()V {
    .limits locals 0 stack 1
    pop
    return
}
"#;

    let report = verify_src(src, VerificationLevel::Standard);
    assert!(has_code(&report, "JV0302"), "expected JV0302, got {report}");
}

#[test]
fn jump_target_without_frame_is_reported() {
    let src = r#"
method static demo/A.f(I)I {
    iload 0
    ifeq L0
    iconst 1
    ireturn
  L0:
    frame same
    iload 0
    ifne L1
    iconst 2
    ireturn
  L1:
    iconst 3
    ireturn
}
"#;

    let report = verify_src(src, VerificationLevel::Full);
    assert!(has_code(&report, "JV0402"), "expected JV0402, got {report}");
    assert!(has_code(&report, "JV0101"), "expected JV0101, got {report}");

    let report = verify_src(src, VerificationLevel::Standard);
    assert!(report.is_ok(), "frames are only checked at full level: {report}");
}

#[test]
fn frame_mismatch_is_reported() {
    let src = r#"
method static demo/A.f(I)I {
    iload 0
    iload 0
    ifeq L0
    ireturn
  L0:
    frame same
    iconst 0
    ireturn
}
"#;

    let report = verify_src(src, VerificationLevel::Full);
    let diag = report
        .diagnostics
        .iter()
        .find(|diag| diag.code == DiagnosticCode::FrameMismatch)
        .unwrap_or_else(|| panic!("expected a frame mismatch, got {report}"));
    assert!(diag.message.starts_with("jump state"), "{}", diag.message);
    assert!(diag.message.contains("stack holds 1 values"), "{}", diag.message);
}

#[test]
fn local_type_mismatch_is_reported() {
    let src = r#"
method static demo/A.f(I)V {
    aconst_null
    astore 0
  L0:
    frame full [int] []
    return
}
"#;

    let report = verify_src(src, VerificationLevel::Full);
    let diag = report
        .diagnostics
        .iter()
        .find(|diag| diag.code == DiagnosticCode::FrameMismatch)
        .unwrap_or_else(|| panic!("expected a frame mismatch, got {report}"));
    assert!(diag.message.starts_with("fall-through state"), "{}", diag.message);
    assert!(diag.message.contains("local 0 is null"), "{}", diag.message);
}

#[test]
fn overlapping_ranges_are_reported() {
    let src = r#"
method static demo/A.f()V {
    .catch java/lang/Exception from L0 to L2 using L3
    .catch java/lang/Error from L1 to L3 using L3
  L0:
    nop
  L1:
    nop
  L2:
    nop
    return
  L3:
    frame same1 java/lang/Throwable
    athrow
}
"#;

    let report = verify_src(src, VerificationLevel::Standard);
    assert!(has_code(&report, "JV0201"), "expected JV0201, got {report}");
}

#[test]
fn nested_ranges_are_accepted() {
    let src = r#"
method static demo/A.f()V {
    .catch java/lang/Exception from L1 to L2 using L3
    .catch any from L0 to L2 using L3
  L0:
    nop
  L1:
    nop
  L2:
    return
  L3:
    frame same1 java/lang/Throwable
    athrow
}
"#;

    let report = verify_src(src, VerificationLevel::Full);
    assert!(report.is_ok(), "{report}");
}

#[test]
fn diagnostics_are_ordered_by_method() {
    let src = r#"
method static demo/A.first()V {
    iconst 1
    pop
}

method static demo/A.second()V {
    iconst 2
    pop
}
"#;

    let report = verify_src(src, VerificationLevel::Fast);
    let locations: Vec<_> = report
        .diagnostics
        .iter()
        .map(|diag| diag.primary.to_string())
        .collect();
    assert_eq!(locations.len(), 2);
    assert!(locations[0].starts_with("demo/A.first()V"), "{locations:?}");
    assert!(locations[1].starts_with("demo/A.second()V"), "{locations:?}");
}

#[test]
fn max_diagnostics_caps_the_report() {
    let src = r#"
method static demo/A.first()V {
    iconst 1
    pop
}

method static demo/A.second()V {
    iconst 2
    pop
}
"#;

    let parsed = parse_module(src).unwrap();
    let mut cfg = VerifierConfig::for_level(VerificationLevel::Fast);
    cfg.max_diagnostics = 1;
    let report = verify_module(&parsed.module, &cfg);
    assert_eq!(report.diagnostics.len(), 1);
}
