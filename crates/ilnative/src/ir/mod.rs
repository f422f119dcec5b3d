//! Typed block IR.
//!
//! The IR sits between the stack bytecode and a native backend. A method is
//! a list of blocks; each block is an ordered list of nodes over a shared
//! node arena, and the order of that list is the generation order a backend
//! must follow.

mod types;
pub use types::*;

mod graph;
pub use graph::NodeGraph;

mod builder;
pub use builder::{build_method, unify_shapes};

mod display;

pub mod walk;
