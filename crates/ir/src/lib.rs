pub mod analysis;
pub mod body;
pub mod body_cursor;
pub mod frame;
pub mod inst;
pub mod ir_writer;
pub mod layout;
pub mod types;

pub use analysis::{AnalyzeError, BodyAnalysis, FrameCursor, FrameState};
pub use body::{
    LocalBinding, LocalVarEntry, MethodBody, MethodKey, MethodRef, MethodSig, Module, TryCatch,
};
pub use frame::{Frame, VType};
pub use inst::{InstData, InstId, ValueKind};
pub use layout::Layout;
pub use types::{DescriptorError, MethodDescriptor, Type};

pub mod prelude {
    pub use crate::body_cursor::{BodyCursor, CursorLocation, InstInserter};
}
