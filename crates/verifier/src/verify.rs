use rayon::prelude::*;
use stitch_ir::{MethodBody, MethodRef, Module};

use crate::{report::VerificationReport, VerifierConfig};

mod body;

pub fn verify_module(module: &Module, cfg: &VerifierConfig) -> VerificationReport {
    let mut report = VerificationReport::default();

    let methods: Vec<MethodRef> = module.methods().collect();
    let mut body_reports: Vec<_> = methods
        .into_par_iter()
        .map(|method| (method, verify_body(module.body(method), cfg)))
        .collect();

    body_reports.sort_by_key(|(method, _)| method.as_u32());
    for (_, body_report) in body_reports {
        report.extend_with_limit(body_report.diagnostics, cfg.max_diagnostics);
        if report.is_full(cfg.max_diagnostics) {
            break;
        }
    }

    report
}

pub fn verify_body(body: &MethodBody, cfg: &VerifierConfig) -> VerificationReport {
    body::verify_body(body, cfg)
}

pub fn verify_module_or_panic(module: &Module, cfg: &VerifierConfig) {
    let report = verify_module(module, cfg);
    if report.has_errors() {
        eprintln!("STITCH_VERIFY_FAILURE: module");
        eprintln!("{report}");
        panic!("STITCH_VERIFY_FAILURE");
    }
}

pub fn verify_body_or_panic(body: &MethodBody, cfg: &VerifierConfig) {
    let report = verify_body(body, cfg);
    if report.has_errors() {
        eprintln!(
            "STITCH_VERIFY_FAILURE: method {}.{}{}",
            body.sig.owner, body.sig.name, body.sig.desc
        );
        eprintln!("{report}");
        panic!("STITCH_VERIFY_FAILURE");
    }
}
