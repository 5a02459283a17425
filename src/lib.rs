//! A small C-subset compiler core.
//!
//! Takes an already-parsed program tree and lowers it to x86-64 assembly in
//! AT&T syntax through a fixed sequence of in-place tree passes:
//!
//! 1. `semantic` validates assignment targets (warnings only).
//! 2. `dealias` resolves every name to a concrete storage Location.
//! 3. `transform` canonicalizes expressions into backend-friendly shapes.
//! 4. `optimizer` folds constants and removes dead branches.
//! 5. The x86-64 backend walks the tree once and emits text.
//!
//! The tree itself lives in [`ast`]; [`driver::compile`] runs the whole
//! pipeline.

pub mod ast;
pub mod backend;
pub mod common;
pub mod driver;
pub mod passes;
