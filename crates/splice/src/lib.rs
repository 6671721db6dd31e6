//! Splicing handler bodies into target method bodies.
//!
//! A handler is an ordinary method whose body may contain marker calls. The
//! `callsite` marker stands for the instruction the handler is wrapped
//! around, `cancel` returns from the target, `blackhole` discards code that
//! only exists to satisfy the handler's own compiler, and the jump markers
//! leave the enclosing loop or block of the target.
//!
//! [`splice`] merges one handler at one anchor. [`eject`] wraps a call with a
//! cancellable callback. [`InjectionPipeline`] applies several injections to
//! one body in order.
pub mod config;
mod error;
pub mod eject;
pub mod marker;
pub mod pipeline;
pub mod remap;
mod rewrite;
pub mod splicer;
pub mod structure;
pub mod surface;

pub use config::{EjectConfig, MarkerVocabulary, SpliceConfig};
pub use eject::{eject, EjectRequest};
pub use error::{SpliceError, ValidationError};
pub use marker::{JumpKind, MarkerKind, MarkerScan};
pub use pipeline::{
    AnchorSelector, DecorateInjector, EjectInjector, InjectOutcome, InjectionPipeline, Injector,
};
pub use remap::{build_remap, capture_locals_at, RemapRequest, SlotRemap};
pub use splicer::{splice, InjectionPlan, SavedValue, SpliceOutcome, SpliceRequest, SpliceState};
pub use structure::{locate, StructuralAnchors, StructurePoint};
pub use surface::{Surface, SurfaceKind};
