// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Crate-level smoke tests through the public API only.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use crate::value::to_display_string;
use crate::{Heap, Vm, bytecode, primitives};

#[test]
fn version_is_set() {
    assert!(!crate::VERSION.is_empty());
}

#[test]
fn end_to_end_identity() {
    let mut heap = Heap::new();
    primitives::install(&mut heap);

    // Hand-assemble (lambda (x) x): (args 1) (lvar 0 0) (return).
    let empty = heap.empty_list();
    let args_op = heap.make_character('a');
    let one = heap.make_fixnum(1);
    let i0 = {
        let tail = heap.make_pair(one, empty);
        heap.make_pair(args_op, tail)
    };
    let i0_root = heap.push_root(i0);
    let lvar_op = heap.make_character('l');
    let zero = heap.make_fixnum(0);
    let i1 = {
        let tail = heap.make_pair(zero, empty);
        let tail = heap.make_pair(zero, tail);
        heap.make_pair(lvar_op, tail)
    };
    let i1_root = heap.push_root(i1);
    let return_op = heap.make_character('r');
    let i2 = heap.make_pair(return_op, empty);
    let i2_root = heap.push_root(i2);

    let stream = heap.make_list3(i0, i1, i2);
    heap.pop_root(i2_root);
    heap.pop_root(i1_root);
    heap.pop_root(i0_root);

    let identity = bytecode::assemble(&mut heap, stream, empty).unwrap();
    let value = heap.make_fixnum(1234);
    let result = Vm::call(&mut heap, identity, &[value]).unwrap();
    assert_eq!(result, value);
    assert_eq!(to_display_string(&heap, result), "1234");
}
