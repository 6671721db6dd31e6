//! A reference interpreter for method bodies.
//!
//! Methods of the module are executed recursively; calls leaving the module
//! go to a [`Host`].
mod frame;
pub mod heap;
pub mod machine;
pub mod value;

pub use heap::{Heap, Object};
pub use machine::{Call, Host, Machine, NoHost, Outcome, Trap};
pub use value::{EvalValue, ObjRef};
