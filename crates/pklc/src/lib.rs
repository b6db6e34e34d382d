//! Compiler targeting the pickle virtual machine: a tree of reconstruction
//! operations goes in, a linear opcode stream comes out. The stream, when
//! replayed by the host's stack machine, rebuilds objects, invokes
//! callables, mutates containers, and can ask the host to run code.
//!
//! The pipeline: build a tree (by hand through [`ir`], or from restricted
//! source text through [`transpile`]), lower it with [`generate`], then
//! optionally shrink the result with [`optimize_slots`] or
//! [`wrap_compressed`].

pub mod caps;
pub mod compress;
pub mod diagnostics;
pub mod emit;
pub mod error;
pub mod ir;
pub mod optimize;
pub mod pretty;
pub mod program;
pub mod pysrc;
pub mod transpile;

pub use caps::HostCaps;
pub use compress::{wrap_compressed, wrap_compressed_if_smaller};
pub use emit::generate;
pub use error::{CompileErrorKind, CompilerError};
pub use ir::{Keep, Node, Value};
pub use optimize::optimize_slots;
pub use pretty::pretty;
pub use pkl_opcodes::Protocol;
pub use transpile::{dedup_tree, transpile};
