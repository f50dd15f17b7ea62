// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Primitive procedures for the Selva VM.
//!
//! Primitives are native functions called from bytecode. They use a fixed
//! calling convention:
//! - `(heap, stack, argc, top)`: the operand-stack cell, the argument count
//!   and the current stack top; the arguments sit in slots
//!   `[top - argc, top)`.
//! - The primitive returns a single value and does **not** pop its
//!   arguments; the VM unwinds them after it returns.
//! - A primitive may allocate, so it must register any live temporary with
//!   [`Heap::push_root`] before doing so.
//!
//! This module carries only the primitives that bridge the compiler and the
//! VM: `symbol->bytecode`, `bytecode->symbol` and `set-macro!`. The general
//! primitive library lives above this crate.


use thiserror::Error;

use crate::bytecode;
use crate::heap::Heap;
use crate::value::CellRef;

/// Native function conforming to the primitive calling convention.
pub type PrimitiveFn = fn(&mut Heap, CellRef, usize, usize) -> Result<CellRef, PrimitiveError>;

/// Failure raised by a primitive.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PrimitiveError {
    /// A fixed-arity primitive received the wrong number of arguments.
    #[error("{name}: expected {expected} argument(s), got {got}")]
    Arity {
        /// Primitive name.
        name: &'static str,
        /// Declared arity.
        expected: usize,
        /// Arguments received.
        got: usize,
    },
    /// An argument had the wrong type.
    #[error("{name}: argument {arg} must be {expected}")]
    Type {
        /// Primitive name.
        name: &'static str,
        /// Zero-based argument position.
        arg: usize,
        /// Expected type description.
        expected: &'static str,
    },
}

/// Fetch argument `index` of a primitive call from the operand stack.
#[must_use]
pub fn argument(
    heap: &Heap,
    stack: CellRef,
    argc: usize,
    top: usize,
    index: usize,
) -> Option<CellRef> {
    if index >= argc || argc > top {
        return None;
    }
    heap.vector_ref(stack, top - argc + index)
}

/// Enforce a fixed arity.
pub fn expect_argc(name: &'static str, expected: usize, got: usize) -> Result<(), PrimitiveError> {
    if got == expected {
        Ok(())
    } else {
        Err(PrimitiveError::Arity {
            name,
            expected,
            got,
        })
    }
}

/// `(symbol->bytecode mnemonic)` - the opcode character for a mnemonic.
pub fn symbol_to_bytecode(
    heap: &mut Heap,
    stack: CellRef,
    argc: usize,
    top: usize,
) -> Result<CellRef, PrimitiveError> {
    const NAME: &str = "symbol->bytecode";
    expect_argc(NAME, 1, argc)?;
    let symbol = argument(heap, stack, argc, top, 0).ok_or(PrimitiveError::Type {
        name: NAME,
        arg: 0,
        expected: "a symbol",
    })?;
    let Some(name) = heap.symbol_name(symbol) else {
        return Err(PrimitiveError::Type {
            name: NAME,
            arg: 0,
            expected: "a symbol",
        });
    };
    let Some(opcode) = bytecode::opcode_for_mnemonic(name) else {
        return Err(PrimitiveError::Type {
            name: NAME,
            arg: 0,
            expected: "an opcode mnemonic",
        });
    };
    Ok(heap.make_character(char::from(opcode)))
}

/// `(bytecode->symbol char)` - the mnemonic symbol for an opcode character.
pub fn bytecode_to_symbol(
    heap: &mut Heap,
    stack: CellRef,
    argc: usize,
    top: usize,
) -> Result<CellRef, PrimitiveError> {
    const NAME: &str = "bytecode->symbol";
    expect_argc(NAME, 1, argc)?;
    let character = argument(heap, stack, argc, top, 0).ok_or(PrimitiveError::Type {
        name: NAME,
        arg: 0,
        expected: "a character",
    })?;
    let Some(ch) = heap.character(character) else {
        return Err(PrimitiveError::Type {
            name: NAME,
            arg: 0,
            expected: "a character",
        });
    };
    let mnemonic = ch
        .is_ascii()
        .then(|| bytecode::mnemonic_for_opcode(ch as u8))
        .flatten()
        .ok_or(PrimitiveError::Type {
            name: NAME,
            arg: 0,
            expected: "an opcode character",
        })?;
    Ok(heap.make_symbol(mnemonic))
}

/// `(set-macro! proc)` - re-tag a compiled procedure as a macro transformer.
pub fn set_macro(
    heap: &mut Heap,
    stack: CellRef,
    argc: usize,
    top: usize,
) -> Result<CellRef, PrimitiveError> {
    const NAME: &str = "set-macro!";
    expect_argc(NAME, 1, argc)?;
    let procedure = argument(heap, stack, argc, top, 0).ok_or(PrimitiveError::Type {
        name: NAME,
        arg: 0,
        expected: "a compiled procedure",
    })?;
    if !heap.set_macro(procedure) {
        return Err(PrimitiveError::Type {
            name: NAME,
            arg: 0,
            expected: "a compiled procedure",
        });
    }
    Ok(procedure)
}

/// Define the bridge primitives in the global environment.
pub fn install(heap: &mut Heap) {
    let bridges: [(&str, PrimitiveFn); 3] = [
        ("symbol->bytecode", symbol_to_bytecode),
        ("bytecode->symbol", bytecode_to_symbol),
        ("set-macro!", set_macro),
    ];
    for (name, function) in bridges {
        // Interned symbols are roots, so the symbol survives the
        // primitive-cell allocation.
        let symbol = heap.make_symbol(name);
        let procedure = heap.make_primitive_proc(function);
        heap.define_global(symbol, procedure);
    }
}
