// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Tests for the bytecode tables and the assembler.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use proptest::prelude::*;

use super::{
    AssembleError, INSTRUCTION_SLOTS, NO_ARG, assemble, fetch, instruction_count,
    mnemonic_for_opcode, op, opcode_for_mnemonic, pack_code,
};
use crate::heap::Heap;
use crate::value::CellRef;

const ALL_MNEMONICS: [&str; 18] = [
    "args", "argsdot", "const", "lvar", "lset", "gvar", "gset", "pop", "jump", "tjump", "fjump",
    "fn", "save", "return", "callj", "fcallj", "cc", "setcc",
];

#[test]
fn mnemonics_round_trip() {
    for mnemonic in ALL_MNEMONICS {
        let opcode = opcode_for_mnemonic(mnemonic).unwrap();
        assert_eq!(mnemonic_for_opcode(opcode), Some(mnemonic));
    }
}

#[test]
fn opcodes_are_distinct() {
    let mut seen = Vec::new();
    for mnemonic in ALL_MNEMONICS {
        let opcode = opcode_for_mnemonic(mnemonic).unwrap();
        assert!(!seen.contains(&opcode), "duplicate opcode {opcode}");
        seen.push(opcode);
    }
}

#[test]
fn unknown_lookups_fail() {
    assert_eq!(opcode_for_mnemonic("halt"), None);
    assert_eq!(mnemonic_for_opcode(b'?'), None);
}

#[test]
fn pack_and_fetch_round_trip() {
    let mut heap = Heap::new();
    let slots = [
        (op::ARGS, 1, NO_ARG),
        (op::LVAR, 0, 0),
        (op::RETURN, NO_ARG, NO_ARG),
    ];
    let code = pack_code(&mut heap, &slots);

    assert_eq!(heap.vector_len(code), Some(slots.len() * INSTRUCTION_SLOTS));
    assert_eq!(instruction_count(&heap, code), Some(3));
    for (pc, &expected) in slots.iter().enumerate() {
        assert_eq!(fetch(&heap, code, pc), Some(expected));
    }
    assert_eq!(fetch(&heap, code, 3), None);
}

/// Build one `(opcode-char args...)` instruction list.
fn instruction(heap: &mut Heap, mnemonic: &str, arguments: &[CellRef]) -> CellRef {
    let opcode = opcode_for_mnemonic(mnemonic).expect("known mnemonic");
    let mut list = heap.empty_list();
    let list_root = heap.push_root(list);
    for &argument in arguments.iter().rev() {
        list = heap.make_pair(argument, list);
        heap.set_root(&list_root, list);
    }
    let opcode_cell = heap.make_character(char::from(opcode));
    list = heap.make_pair(opcode_cell, list);
    heap.pop_root(list_root);
    list
}

/// Build a proper list out of already-built instruction lists.
fn instruction_list(heap: &mut Heap, instructions: &[CellRef]) -> CellRef {
    let mut list = heap.empty_list();
    let list_root = heap.push_root(list);
    for &item in instructions.iter().rev() {
        list = heap.make_pair(item, list);
        heap.set_root(&list_root, list);
    }
    heap.pop_root(list_root);
    list
}

#[test]
fn assembles_code_and_hoists_constants() {
    let mut heap = Heap::new();
    let one = heap.make_fixnum(1);
    let forty_two = heap.make_fixnum(42);

    // (args 1) (const 42) (const 42) (lvar 0 0) (return)
    let zero = heap.make_fixnum(0);
    let i0 = instruction(&mut heap, "args", &[one]);
    let i1 = instruction(&mut heap, "const", &[forty_two]);
    let i2 = instruction(&mut heap, "const", &[forty_two]);
    let i3 = instruction(&mut heap, "lvar", &[zero, zero]);
    let i4 = instruction(&mut heap, "return", &[]);
    let stream = instruction_list(&mut heap, &[i0, i1, i2, i3, i4]);

    let empty = heap.empty_list();
    let procedure = assemble(&mut heap, stream, empty).unwrap();
    let (code, constants, env) = heap.proc_parts(procedure).unwrap();
    assert_eq!(env, empty);
    assert_eq!(instruction_count(&heap, code), Some(5));

    // Identical constants share one hoisted slot.
    assert_eq!(heap.vector_len(constants), Some(1));
    assert_eq!(heap.vector_ref(constants, 0), Some(forty_two));

    assert_eq!(fetch(&heap, code, 0), Some((op::ARGS, 1, NO_ARG)));
    assert_eq!(fetch(&heap, code, 1), Some((op::CONST, 0, NO_ARG)));
    assert_eq!(fetch(&heap, code, 2), Some((op::CONST, 0, NO_ARG)));
    assert_eq!(fetch(&heap, code, 3), Some((op::LVAR, 0, 0)));
    assert_eq!(fetch(&heap, code, 4), Some((op::RETURN, NO_ARG, NO_ARG)));
}

#[test]
fn assembles_labels_in_range() {
    let mut heap = Heap::new();
    let zero = heap.make_fixnum(0);
    let jump = instruction(&mut heap, "jump", &[zero]);
    let stream = instruction_list(&mut heap, &[jump]);
    let empty = heap.empty_list();
    assert!(assemble(&mut heap, stream, empty).is_ok());
}

#[test]
fn rejects_label_out_of_range() {
    let mut heap = Heap::new();
    let target = heap.make_fixnum(5);
    let jump = instruction(&mut heap, "jump", &[target]);
    let ret = instruction(&mut heap, "return", &[]);
    let stream = instruction_list(&mut heap, &[jump, ret]);
    let empty = heap.empty_list();
    assert_eq!(
        assemble(&mut heap, stream, empty),
        Err(AssembleError::LabelOutOfRange {
            index: 0,
            target: 5,
            count: 2
        })
    );
}

#[test]
fn rejects_unknown_opcode() {
    let mut heap = Heap::new();
    let bogus = heap.make_character('?');
    let empty = heap.empty_list();
    let instr = heap.make_pair(bogus, empty);
    let stream = instruction_list(&mut heap, &[instr]);
    assert_eq!(
        assemble(&mut heap, stream, empty),
        Err(AssembleError::UnknownOpcode {
            index: 0,
            opcode: '?'
        })
    );
}

#[test]
fn rejects_missing_argument() {
    let mut heap = Heap::new();
    let instr = instruction(&mut heap, "args", &[]);
    let stream = instruction_list(&mut heap, &[instr]);
    let empty = heap.empty_list();
    assert_eq!(
        assemble(&mut heap, stream, empty),
        Err(AssembleError::MalformedInstruction {
            index: 0,
            reason: "missing argument"
        })
    );
}

#[test]
fn rejects_wrong_argument_kind() {
    let mut heap = Heap::new();
    let name = heap.make_symbol("x");
    let instr = instruction(&mut heap, "args", &[name]);
    let stream = instruction_list(&mut heap, &[instr]);
    let empty = heap.empty_list();
    assert_eq!(
        assemble(&mut heap, stream, empty),
        Err(AssembleError::MalformedInstruction {
            index: 0,
            reason: "argument is not a fixnum"
        })
    );
}

#[test]
fn rejects_non_list_stream() {
    let mut heap = Heap::new();
    let fixnum = heap.make_fixnum(3);
    let empty = heap.empty_list();
    assert_eq!(
        assemble(&mut heap, fixnum, empty),
        Err(AssembleError::NotAList)
    );
}

#[test]
fn rejects_non_character_opcode() {
    let mut heap = Heap::new();
    let fixnum = heap.make_fixnum(97);
    let empty = heap.empty_list();
    let instr = heap.make_pair(fixnum, empty);
    let stream = instruction_list(&mut heap, &[instr]);
    assert_eq!(
        assemble(&mut heap, stream, empty),
        Err(AssembleError::MalformedInstruction {
            index: 0,
            reason: "opcode is not a character"
        })
    );
}

proptest! {
    #[test]
    fn arbitrary_names_do_not_alias_mnemonics(name in "[a-z]{1,12}") {
        if let Some(opcode) = opcode_for_mnemonic(&name) {
            // Only real mnemonics resolve, and they resolve back to
            // themselves.
            prop_assert_eq!(mnemonic_for_opcode(opcode), Some(name.as_str()));
        }
    }

    #[test]
    fn fetch_never_misreads_packed_args(a in -1_i64..2048, b in -1_i64..2048) {
        let mut heap = Heap::new();
        let code = pack_code(&mut heap, &[(op::LVAR, a, b)]);
        prop_assert_eq!(fetch(&heap, code, 0), Some((op::LVAR, a, b)));
    }
}
