// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! # Selva VM
//!
//! Execution core for the Selva language: a stack-based bytecode virtual
//! machine, its garbage-collected heap, and the bytecode assembler.
//!
//! This crate provides:
//! - Tagged heap cells with typed constructors and accessors
//! - A tracing, list-splicing garbage collector with an explicit root
//!   protocol and finalization of external buffers
//! - A bytecode assembler packing compiler output into per-procedure code
//!   and constant vectors
//! - The VM interpreter: tail calls, closures, first-class continuations
//! - The primitive calling convention and the compiler-bridge primitives
//!
//! The reader, the compiler, the primitive library and the REPL live above
//! this crate; they talk to it through [`Heap`], [`bytecode::assemble`] and
//! [`Vm`].

pub mod bytecode;
pub mod heap;
pub mod primitives;
pub mod value;
pub mod vm;

// Re-export the types nearly every consumer touches.
pub use heap::{Heap, HeapStats, Root};
pub use value::{CellRef, Tag};
pub use vm::{RuntimeError, Vm};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod lib_test;
