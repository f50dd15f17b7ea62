// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Printer for Selva values.
//!
//! Renders values in surface syntax to any [`fmt::Write`] sink. Used by
//! diagnostics; a REPL layer can reuse it directly.

use core::fmt::{self, Write};

use crate::heap::Heap;
use crate::value::{CellRef, Tag};

/// Print a value in surface syntax.
pub fn print<W: Write>(heap: &Heap, value: CellRef, out: &mut W) -> fmt::Result {
    match heap.tag(value) {
        Tag::EmptyList => out.write_str("()"),
        Tag::Boolean => {
            if heap.boolean(value) == Some(true) {
                out.write_str("#t")
            } else {
                out.write_str("#f")
            }
        }
        Tag::Fixnum => write!(out, "{}", heap.fixnum(value).unwrap_or(0)),
        Tag::Character => print_character(heap.character(value).unwrap_or('\0'), out),
        Tag::Symbol => out.write_str(heap.symbol_name(value).unwrap_or("")),
        Tag::String => print_string(heap.string(value).unwrap_or(""), out),
        Tag::Pair => print_list(heap, value, out),
        Tag::Vector => print_vector(heap, value, out),
        Tag::CompiledProc => out.write_str("#<compiled-proc>"),
        Tag::CompiledSyntaxProc => out.write_str("#<syntax-proc>"),
        Tag::PrimitiveProc => out.write_str("#<primitive-proc>"),
        Tag::MetaProc => print_meta(heap, value, out),
        Tag::HashTable => out.write_str("#<hash-table>"),
    }
}

/// Render a value to an owned string.
#[must_use]
pub fn to_display_string(heap: &Heap, value: CellRef) -> String {
    let mut out = String::new();
    // Writing to a String cannot fail.
    let _ = print(heap, value, &mut out);
    out
}

fn print_character<W: Write>(ch: char, out: &mut W) -> fmt::Result {
    match ch {
        '\n' => out.write_str("#\\newline"),
        '\t' => out.write_str("#\\tab"),
        ' ' => out.write_str("#\\space"),
        other => write!(out, "#\\{other}"),
    }
}

fn print_string<W: Write>(s: &str, out: &mut W) -> fmt::Result {
    out.write_char('"')?;
    for ch in s.chars() {
        match ch {
            '"' => out.write_str("\\\"")?,
            '\\' => out.write_str("\\\\")?,
            '\n' => out.write_str("\\n")?,
            other => out.write_char(other)?,
        }
    }
    out.write_char('"')
}

fn print_list<W: Write>(heap: &Heap, value: CellRef, out: &mut W) -> fmt::Result {
    out.write_char('(')?;
    let mut cursor = value;
    let mut first = true;
    loop {
        let Some(car) = heap.car(cursor) else { break };
        if !first {
            out.write_char(' ')?;
        }
        first = false;
        print(heap, car, out)?;
        let rest = heap.cdr(cursor).unwrap_or_else(|| heap.empty_list());
        if rest == heap.empty_list() {
            break;
        }
        if heap.tag(rest) != Tag::Pair {
            out.write_str(" . ")?;
            print(heap, rest, out)?;
            break;
        }
        cursor = rest;
    }
    out.write_char(')')
}

fn print_vector<W: Write>(heap: &Heap, value: CellRef, out: &mut W) -> fmt::Result {
    out.write_str("#(")?;
    let len = heap.vector_len(value).unwrap_or(0);
    for i in 0..len {
        if i > 0 {
            out.write_char(' ')?;
        }
        if let Some(element) = heap.vector_ref(value, i) {
            print(heap, element, out)?;
        }
    }
    out.write_char(')')
}

fn print_meta<W: Write>(heap: &Heap, value: CellRef, out: &mut W) -> fmt::Result {
    out.write_str("#<meta ")?;
    if let Some((_, meta)) = heap.meta_parts(value) {
        print(heap, meta, out)?;
    }
    out.write_char('>')
}
