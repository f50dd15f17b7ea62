// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Tests for the heap: constructors, accessors, interning and globals.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use proptest::prelude::*;

use super::Heap;
use crate::value::Tag;

#[test]
fn fixnum_round_trip() {
    let mut heap = Heap::new();
    let cell = heap.make_fixnum(-42);
    assert_eq!(heap.tag(cell), Tag::Fixnum);
    assert_eq!(heap.fixnum(cell), Some(-42));
    assert_eq!(heap.character(cell), None);
}

#[test]
fn character_round_trip() {
    let mut heap = Heap::new();
    let cell = heap.make_character('λ');
    assert_eq!(heap.tag(cell), Tag::Character);
    assert_eq!(heap.character(cell), Some('λ'));
}

#[test]
fn string_round_trip() {
    let mut heap = Heap::new();
    let cell = heap.make_string("hello");
    assert_eq!(heap.tag(cell), Tag::String);
    assert_eq!(heap.string(cell), Some("hello"));
}

#[test]
fn boolean_singletons() {
    let heap = Heap::new();
    assert_eq!(heap.make_boolean(true), heap.bool_true());
    assert_eq!(heap.make_boolean(false), heap.bool_false());
    assert_eq!(heap.boolean(heap.bool_true()), Some(true));
    assert_eq!(heap.boolean(heap.bool_false()), Some(false));
    assert_ne!(heap.bool_true(), heap.bool_false());
}

#[test]
fn symbols_are_interned() {
    let mut heap = Heap::new();
    let first = heap.make_symbol("launch");
    let second = heap.make_symbol("launch");
    let other = heap.make_symbol("land");
    assert_eq!(first, second);
    assert_ne!(first, other);
    assert_eq!(heap.symbol_name(first), Some("launch"));
}

#[test]
fn nil_symbol_is_interned() {
    let mut heap = Heap::new();
    assert_eq!(heap.make_symbol("nil"), heap.nil_symbol());
}

#[test]
fn pair_accessors() {
    let mut heap = Heap::new();
    let one = heap.make_fixnum(1);
    let two = heap.make_fixnum(2);
    let pair = heap.make_pair(one, two);
    assert_eq!(heap.tag(pair), Tag::Pair);
    assert_eq!(heap.car(pair), Some(one));
    assert_eq!(heap.cdr(pair), Some(two));
    assert_eq!(heap.pair(pair), Some((one, two)));

    let three = heap.make_fixnum(3);
    assert!(heap.set_car(pair, three));
    assert_eq!(heap.car(pair), Some(three));
    assert!(heap.set_cdr(pair, three));
    assert_eq!(heap.cdr(pair), Some(three));

    assert!(!heap.set_car(one, two));
    assert_eq!(heap.car(one), None);
}

#[test]
fn list3_shape() {
    let mut heap = Heap::new();
    let a = heap.make_fixnum(1);
    let b = heap.make_fixnum(2);
    let c = heap.make_fixnum(3);
    let list = heap.make_list3(a, b, c);
    assert_eq!(heap.list_length(list), Some(3));
    assert_eq!(heap.car(list), Some(a));
    let rest = heap.cdr(list).unwrap();
    assert_eq!(heap.car(rest), Some(b));
    let rest = heap.cdr(rest).unwrap();
    assert_eq!(heap.car(rest), Some(c));
    assert_eq!(heap.cdr(rest), Some(heap.empty_list()));
}

#[test]
fn vector_load_and_store() {
    let mut heap = Heap::new();
    let empty = heap.empty_list();
    let vector = heap.make_vector(3, empty);
    assert_eq!(heap.vector_len(vector), Some(3));
    assert_eq!(heap.vector_ref(vector, 0), Some(empty));

    let value = heap.make_fixnum(7);
    assert!(heap.vector_set(vector, 2, value));
    assert_eq!(heap.vector_ref(vector, 2), Some(value));

    assert!(!heap.vector_set(vector, 3, value));
    assert_eq!(heap.vector_ref(vector, 3), None);
}

#[test]
fn vector_grow_preserves_prefix() {
    let mut heap = Heap::new();
    let empty = heap.empty_list();
    let vector = heap.make_vector(2, empty);
    let value = heap.make_fixnum(9);
    heap.vector_set(vector, 1, value);

    assert!(heap.vector_grow(vector, 5, empty));
    assert_eq!(heap.vector_len(vector), Some(5));
    assert_eq!(heap.vector_ref(vector, 1), Some(value));
    assert_eq!(heap.vector_ref(vector, 4), Some(empty));

    // Shrinking is a no-op.
    assert!(heap.vector_grow(vector, 1, empty));
    assert_eq!(heap.vector_len(vector), Some(5));
}

#[test]
fn copy_vector_is_a_fresh_cell() {
    let mut heap = Heap::new();
    let empty = heap.empty_list();
    let vector = heap.make_vector(2, empty);
    let value = heap.make_fixnum(4);
    heap.vector_set(vector, 0, value);

    let copy = heap.copy_vector(vector).unwrap();
    assert_ne!(copy, vector);
    assert_eq!(heap.vector_ref(copy, 0), Some(value));

    // Writes to the copy do not touch the original.
    heap.vector_set(copy, 0, empty);
    assert_eq!(heap.vector_ref(vector, 0), Some(value));

    assert_eq!(heap.copy_vector(value), None);
}

#[test]
fn hash_table_load_and_store() {
    let mut heap = Heap::new();
    let table = heap.make_hash_table();
    let key = heap.make_symbol("key");
    let value = heap.make_fixnum(1);

    assert_eq!(heap.hash_get(table, key), None);
    assert!(heap.hash_set(table, key, value));
    assert_eq!(heap.hash_get(table, key), Some(value));
    assert_eq!(heap.hash_remove(table, key), Some(value));
    assert_eq!(heap.hash_get(table, key), None);

    assert!(!heap.hash_set(value, key, value));
}

#[test]
fn list_length_rejects_improper_lists() {
    let mut heap = Heap::new();
    let empty = heap.empty_list();
    let one = heap.make_fixnum(1);
    let proper = heap.make_pair(one, empty);
    let improper = heap.make_pair(one, one);

    assert_eq!(heap.list_length(empty), Some(0));
    assert_eq!(heap.list_length(proper), Some(1));
    assert_eq!(heap.list_length(improper), None);
}

#[test]
fn globals_define_lookup_bound() {
    let mut heap = Heap::new();
    let name = heap.make_symbol("x");
    let value = heap.make_fixnum(10);

    assert!(!heap.global_is_bound(name));
    assert_eq!(heap.lookup_global(name), None);

    heap.define_global(name, value);
    assert!(heap.global_is_bound(name));
    assert_eq!(heap.lookup_global(name), Some(value));

    let replacement = heap.make_fixnum(11);
    heap.define_global(name, replacement);
    assert_eq!(heap.lookup_global(name), Some(replacement));
}

#[test]
fn set_macro_retags_compiled_procs_only() {
    let mut heap = Heap::new();
    let empty = heap.empty_list();
    let code = heap.make_vector(0, empty);
    let constants = heap.make_vector(0, empty);
    let procedure = heap.make_compiled_proc(code, constants, empty);

    assert_eq!(heap.tag(procedure), Tag::CompiledProc);
    assert!(heap.set_macro(procedure));
    assert_eq!(heap.tag(procedure), Tag::CompiledSyntaxProc);
    // Idempotent on syntax procs.
    assert!(heap.set_macro(procedure));

    let fixnum = heap.make_fixnum(1);
    assert!(!heap.set_macro(fixnum));
}

#[test]
fn meta_proc_parts() {
    let mut heap = Heap::new();
    let empty = heap.empty_list();
    let code = heap.make_vector(0, empty);
    let constants = heap.make_vector(0, empty);
    let inner = heap.make_compiled_proc(code, constants, empty);
    let meta = heap.make_string("docs");
    let wrapper = heap.make_meta_proc(inner, meta);

    assert_eq!(heap.tag(wrapper), Tag::MetaProc);
    assert_eq!(heap.meta_parts(wrapper), Some((inner, meta)));
}

#[test]
fn root_slots_track_updates() {
    let mut heap = Heap::new();
    let first = heap.make_fixnum(1);
    let root = heap.push_root(first);
    assert_eq!(heap.root_value(&root), first);

    let second = heap.make_fixnum(2);
    heap.set_root(&root, second);
    assert_eq!(heap.root_value(&root), second);

    assert_eq!(heap.pop_root(root), second);
}

#[test]
fn stats_report_pool_shape() {
    let mut heap = Heap::new();
    let before = heap.stats();
    assert_eq!(before.total_cells, 1000);
    assert_eq!(before.collections, 0);

    let _ = heap.make_string("buffer");
    let after = heap.stats();
    assert_eq!(after.free_cells, before.free_cells - 1);
    assert_eq!(after.finalizable_cells, before.finalizable_cells + 1);
}

proptest! {
    #[test]
    fn fixnums_round_trip(value in any::<i64>()) {
        let mut heap = Heap::new();
        let cell = heap.make_fixnum(value);
        prop_assert_eq!(heap.fixnum(cell), Some(value));
    }

    #[test]
    fn interning_is_stable(name in "[a-z!?<>=*+-]{1,16}") {
        let mut heap = Heap::new();
        let first = heap.make_symbol(&name);
        let second = heap.make_symbol(&name);
        prop_assert_eq!(first, second);
        prop_assert_eq!(heap.symbol_name(first), Some(name.as_str()));
    }
}
