//! Storage backends.
//!
//! [`MemoryStorage`] is an in-process object store used by tests and
//! embedders; [`LocalStorage`] maps paths onto a local directory tree.

pub mod local;
pub mod memory;

pub use local::LocalStorage;
pub use memory::{Fault, MemoryStorage};
