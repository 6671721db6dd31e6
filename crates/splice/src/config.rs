use smol_str::SmolStr;
use stitch_ir::{MethodDescriptor, Type};

/// Owner and method names of the intrinsic marker calls recognized in
/// handler bodies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkerVocabulary {
    /// Class declaring the marker methods, e.g. `callsite()` and `cancel()`.
    pub ops_owner: SmolStr,
    pub callsite: SmolStr,
    pub cancel: SmolStr,
    pub blackhole: SmolStr,
    pub jump_to_loop_start: SmolStr,
    pub jump_to_loop_end: SmolStr,
    pub jump_to_block_end: SmolStr,
    /// Class of the value returned by marker declares.
    pub handle_owner: SmolStr,
    /// Method invoked on a declared handle to trigger the marker.
    pub handle_invoke: SmolStr,
}

impl MarkerVocabulary {
    /// Descriptor of `callsite()`, `cancel()` and `blackhole()`.
    pub fn declare_desc(&self) -> MethodDescriptor {
        MethodDescriptor::new(&[], Type::Object(self.handle_owner.clone()))
    }

    /// Descriptor of the jump markers.
    pub fn jump_desc(&self) -> MethodDescriptor {
        MethodDescriptor::new(&[], Type::object("java/lang/Throwable"))
    }
}

impl Default for MarkerVocabulary {
    fn default() -> Self {
        Self {
            ops_owner: "stitch/DecorationOps".into(),
            callsite: "callsite".into(),
            cancel: "cancel".into(),
            blackhole: "blackhole".into(),
            jump_to_loop_start: "jumpToLoopStart".into(),
            jump_to_loop_end: "jumpToLoopEnd".into(),
            jump_to_block_end: "jumpToCodeBlockEnd".into(),
            handle_owner: "java/lang/invoke/MethodHandle".into(),
            handle_invoke: "invoke".into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SpliceConfig {
    pub markers: MarkerVocabulary,
    /// Prefix of the local variable names given to persistent slots.
    pub allocated_prefix: SmolStr,
    /// Run the structural verifier over every spliced body in debug builds
    /// and turn its errors into internal errors.
    pub verify_result: bool,
}

impl SpliceConfig {
    pub fn with_markers(markers: MarkerVocabulary) -> Self {
        Self {
            markers,
            ..Self::default()
        }
    }
}

impl Default for SpliceConfig {
    fn default() -> Self {
        Self {
            markers: MarkerVocabulary::default(),
            allocated_prefix: "stitch_".into(),
            verify_result: true,
        }
    }
}

/// Names used by the call wrapper.
#[derive(Debug, Clone)]
pub struct EjectConfig {
    /// Callback info class handed to handlers of `void` calls.
    pub callback_info: SmolStr,
    /// Callback info class handed to handlers of calls returning a value.
    pub returnable: SmolStr,
    pub is_cancelled: SmolStr,
    /// Accessor prefix; the return descriptor is appended for primitives,
    /// e.g. `getReturnValueI`.
    pub get_return_value: SmolStr,
    /// Prefix of the local variable holding the callback info.
    pub local_prefix: SmolStr,
    pub verify_result: bool,
}

impl EjectConfig {
    pub fn info_class(&self, ret: &Type) -> &SmolStr {
        if ret.is_void() {
            &self.callback_info
        } else {
            &self.returnable
        }
    }

    /// Accessor reading back the return value of a cancelled call.
    pub fn return_accessor(&self, ret: &Type) -> (SmolStr, MethodDescriptor) {
        if ret.is_reference() {
            (
                self.get_return_value.clone(),
                MethodDescriptor::new(&[], Type::object("java/lang/Object")),
            )
        } else {
            (
                format!("{}{ret}", self.get_return_value).into(),
                MethodDescriptor::new(&[], ret.clone()),
            )
        }
    }
}

impl Default for EjectConfig {
    fn default() -> Self {
        Self {
            callback_info: "stitch/CallbackInfo".into(),
            returnable: "stitch/CallbackInfoReturnable".into(),
            is_cancelled: "isCancelled".into(),
            get_return_value: "getReturnValue".into(),
            local_prefix: "callbackInfo".into(),
            verify_result: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn return_accessor_names() {
        let config = EjectConfig::default();
        let (name, desc) = config.return_accessor(&Type::Int);
        assert_eq!(name, "getReturnValueI");
        assert_eq!(desc.to_string(), "()I");

        let (name, desc) = config.return_accessor(&Type::object("java/lang/String"));
        assert_eq!(name, "getReturnValue");
        assert_eq!(desc.to_string(), "()Ljava/lang/Object;");
        assert_eq!(config.info_class(&Type::Void), "stitch/CallbackInfo");
    }
}
