//! Applying several injections to one target body in order.
//!
//! Every injection mutates the target, so anchors resolved before it may no
//! longer be valid. After each injection the pipeline asks every injector
//! still waiting to resolve its anchors again against the mutated body.
//!
//! [`DecorateInjector`] captures the locals live at each anchor when it
//! prepares, so that an injection at one anchor does not change what a later
//! anchor of the same injector binds to.
use stitch_ir::{InstId, LocalVarEntry, MethodBody};
use stitch_verifier::Diagnostic;
use tracing::{debug, debug_span};

use crate::{
    config::{EjectConfig, SpliceConfig},
    eject::{eject, EjectRequest},
    remap::capture_locals_at,
    splicer::{method_name, splice, SpliceRequest},
    surface::SurfaceKind,
    SpliceError,
};

/// Picks the anchors an injector applies to in a target body.
pub trait AnchorSelector {
    fn select(&self, target: &MethodBody) -> Vec<InstId>;
}

impl<F> AnchorSelector for F
where
    F: Fn(&MethodBody) -> Vec<InstId>,
{
    fn select(&self, target: &MethodBody) -> Vec<InstId> {
        self(target)
    }
}

#[derive(Debug, Clone, Default)]
pub struct InjectOutcome {
    /// Number of anchors the handler was injected at.
    pub injections: usize,
    pub callback_recorded: bool,
    pub diagnostics: Vec<Diagnostic>,
}

impl InjectOutcome {
    fn absorb(&mut self, outcome: crate::SpliceOutcome) {
        self.injections += 1;
        self.callback_recorded |= outcome.callback_recorded;
        self.diagnostics.extend(outcome.diagnostics);
    }
}

pub trait Injector {
    fn name(&self) -> String;

    /// Resolves anchors against the current state of `target`.
    fn prepare(&mut self, target: &MethodBody) -> Result<(), SpliceError>;

    /// Applies the injection at every prepared anchor.
    fn inject(&mut self, target: &mut MethodBody) -> Result<InjectOutcome, SpliceError>;
}

/// Splices a handler at every selected anchor.
pub struct DecorateInjector<'a, S> {
    handler: &'a MethodBody,
    surface: SurfaceKind,
    selector: S,
    config: SpliceConfig,
    /// Anchors with the locals live at them when they were selected.
    anchors: Vec<(InstId, Vec<LocalVarEntry>)>,
}

impl<'a, S: AnchorSelector> DecorateInjector<'a, S> {
    pub fn new(handler: &'a MethodBody, surface: SurfaceKind, selector: S) -> Self {
        Self {
            handler,
            surface,
            selector,
            config: SpliceConfig::default(),
            anchors: Vec::new(),
        }
    }

    pub fn with_config(mut self, config: SpliceConfig) -> Self {
        self.config = config;
        self
    }
}

impl<S: AnchorSelector> Injector for DecorateInjector<'_, S> {
    fn name(&self) -> String {
        format!("decorate {}", method_name(&self.handler.sig))
    }

    fn prepare(&mut self, target: &MethodBody) -> Result<(), SpliceError> {
        self.anchors = self
            .selector
            .select(target)
            .into_iter()
            .map(|anchor| (anchor, capture_locals_at(target, anchor)))
            .collect();
        Ok(())
    }

    fn inject(&mut self, target: &mut MethodBody) -> Result<InjectOutcome, SpliceError> {
        let mut outcome = InjectOutcome::default();
        for (anchor, locals) in std::mem::take(&mut self.anchors) {
            let req = SpliceRequest::new(anchor, self.handler, self.surface).with_locals(&locals);
            outcome.absorb(splice(target, &req, &self.config)?);
        }
        Ok(outcome)
    }
}

/// Wraps every selected call with a cancellable handler call.
pub struct EjectInjector<'a, S> {
    handler: &'a MethodBody,
    selector: S,
    config: EjectConfig,
    anchors: Vec<InstId>,
}

impl<'a, S: AnchorSelector> EjectInjector<'a, S> {
    pub fn new(handler: &'a MethodBody, selector: S) -> Self {
        Self {
            handler,
            selector,
            config: EjectConfig::default(),
            anchors: Vec::new(),
        }
    }

    pub fn with_config(mut self, config: EjectConfig) -> Self {
        self.config = config;
        self
    }
}

impl<S: AnchorSelector> Injector for EjectInjector<'_, S> {
    fn name(&self) -> String {
        format!("eject {}", method_name(&self.handler.sig))
    }

    fn prepare(&mut self, target: &MethodBody) -> Result<(), SpliceError> {
        self.anchors = self.selector.select(target);
        Ok(())
    }

    fn inject(&mut self, target: &mut MethodBody) -> Result<InjectOutcome, SpliceError> {
        let mut outcome = InjectOutcome::default();
        for anchor in std::mem::take(&mut self.anchors) {
            let req = EjectRequest::new(anchor, self.handler);
            outcome.absorb(eject(target, &req, &self.config)?);
        }
        Ok(outcome)
    }
}

#[derive(Default)]
pub struct InjectionPipeline<'a> {
    injectors: Vec<Box<dyn Injector + 'a>>,
}

impl<'a> InjectionPipeline<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, injector: impl Injector + 'a) -> &mut Self {
        self.injectors.push(Box::new(injector));
        self
    }

    pub fn len(&self) -> usize {
        self.injectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.injectors.is_empty()
    }

    /// Runs every injector against `target` in order, stopping at the first
    /// error. Injections committed before the error stay in `target`.
    pub fn run(&mut self, target: &mut MethodBody) -> Result<InjectOutcome, SpliceError> {
        let span = debug_span!("pipeline", target = %method_name(&target.sig));
        let _enter = span.enter();

        for injector in &mut self.injectors {
            injector.prepare(target)?;
        }

        let mut total = InjectOutcome::default();
        for i in 0..self.injectors.len() {
            let outcome = self.injectors[i].inject(target)?;
            debug!(
                injector = %self.injectors[i].name(),
                injections = outcome.injections,
                "injector done"
            );

            total.injections += outcome.injections;
            total.callback_recorded |= outcome.callback_recorded;
            total.diagnostics.extend(outcome.diagnostics);

            if outcome.injections > 0 {
                for rest in &mut self.injectors[i + 1..] {
                    rest.prepare(target)?;
                }
            }
        }

        Ok(total)
    }
}
