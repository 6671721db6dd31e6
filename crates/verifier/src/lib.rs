mod config;
mod diagnostic;
mod report;
mod verify;

pub use config::{VerificationLevel, VerifierConfig};
pub use diagnostic::{Diagnostic, DiagnosticCode, DiagnosticContext, Location, Note, Severity};
pub use report::VerificationReport;
pub use verify::{verify_body, verify_body_or_panic, verify_module, verify_module_or_panic};

#[macro_export]
macro_rules! debug_verify_module {
    ($module:expr) => {{
        if cfg!(debug_assertions) {
            let cfg = $crate::VerifierConfig::for_level($crate::VerificationLevel::Full);
            $crate::verify_module_or_panic($module, &cfg);
        }
    }};
}

#[macro_export]
macro_rules! debug_verify_body {
    ($body:expr) => {{
        if cfg!(debug_assertions) {
            let cfg = $crate::VerifierConfig::for_level($crate::VerificationLevel::Full);
            $crate::verify_body_or_panic($body, &cfg);
        }
    }};
}
