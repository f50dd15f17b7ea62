// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Bytecode format and assembler for the Selva VM.
//!
//! The compiler emits instructions as triples `(opcode-character arg1 arg2)`
//! where a missing argument is the empty list. The assembler packs that
//! stream into a code vector with three fixnum slots per instruction and
//! hoists value arguments (`const`, `fn`, `gvar`, `gset` operands) into a
//! per-procedure constant vector; the in-stream slot becomes an index into
//! it. Fixnum arguments (arities, frame coordinates, resolved label
//! addresses) are stored directly, and absent slots hold [`NO_ARG`].

#[cfg(test)]
mod bytecode_test;

use thiserror::Error;

use crate::heap::Heap;
use crate::value::CellRef;

/// Opcode characters.
pub mod op {
    /// Bind exactly `n` arguments into the top frame.
    pub const ARGS: u8 = b'a';
    /// Bind `n` fixed arguments plus a rest list.
    pub const ARGSDOT: u8 = b'A';
    /// Push a constant.
    pub const CONST: u8 = b'k';
    /// Push a lexical variable `(frame, slot)`.
    pub const LVAR: u8 = b'l';
    /// Write top of stack into `(frame, slot)` without popping.
    pub const LSET: u8 = b'L';
    /// Push a global variable.
    pub const GVAR: u8 = b'g';
    /// Define or update a global from top of stack without popping.
    pub const GSET: u8 = b'G';
    /// Discard top of stack.
    pub const POP: u8 = b'p';
    /// Unconditional jump to an absolute address.
    pub const JUMP: u8 = b'j';
    /// Pop; jump when the value is not falselike.
    pub const TJUMP: u8 = b't';
    /// Pop; jump when the value is falselike.
    pub const FJUMP: u8 = b'f';
    /// Close a procedure template over the current environment.
    pub const FN: u8 = b'F';
    /// Push a return record for the address argument.
    pub const SAVE: u8 = b's';
    /// Return to the saved record, or to the caller at the entry mark.
    pub const RETURN: u8 = b'r';
    /// Tail call; `-1` spreads a popped argument list.
    pub const CALLJ: u8 = b'c';
    /// Non-tail call; builds a fresh environment cons.
    pub const FCALLJ: u8 = b'C';
    /// Capture the current continuation.
    pub const CC: u8 = b'K';
    /// Restore a captured operand stack and top.
    pub const SETCC: u8 = b'S';
}

/// Slot value for an absent instruction argument.
pub const NO_ARG: i64 = -1;

/// Packed slots per instruction.
pub const INSTRUCTION_SLOTS: usize = 3;

/// Mnemonic lookup table, in opcode declaration order.
const MNEMONICS: [(&str, u8); 18] = [
    ("args", op::ARGS),
    ("argsdot", op::ARGSDOT),
    ("const", op::CONST),
    ("lvar", op::LVAR),
    ("lset", op::LSET),
    ("gvar", op::GVAR),
    ("gset", op::GSET),
    ("pop", op::POP),
    ("jump", op::JUMP),
    ("tjump", op::TJUMP),
    ("fjump", op::FJUMP),
    ("fn", op::FN),
    ("save", op::SAVE),
    ("return", op::RETURN),
    ("callj", op::CALLJ),
    ("fcallj", op::FCALLJ),
    ("cc", op::CC),
    ("setcc", op::SETCC),
];

/// Look up the opcode character for a mnemonic.
#[must_use]
pub fn opcode_for_mnemonic(name: &str) -> Option<u8> {
    MNEMONICS
        .iter()
        .find(|(mnemonic, _)| *mnemonic == name)
        .map(|&(_, opcode)| opcode)
}

/// Look up the mnemonic for an opcode character.
#[must_use]
pub fn mnemonic_for_opcode(opcode: u8) -> Option<&'static str> {
    MNEMONICS
        .iter()
        .find(|&&(_, candidate)| candidate == opcode)
        .map(|&(mnemonic, _)| mnemonic)
}

/// Argument class of one instruction slot.
#[derive(Clone, Copy, PartialEq, Eq)]
enum ArgKind {
    /// No argument.
    None,
    /// A fixnum stored directly (arity, frame coordinate, call count).
    Fixnum,
    /// A resolved absolute instruction address.
    Label,
    /// A value hoisted into the constant vector.
    Value,
}

/// Argument classes per opcode, or `None` for an unknown opcode.
const fn arg_spec(opcode: u8) -> Option<(ArgKind, ArgKind)> {
    match opcode {
        op::ARGS | op::ARGSDOT | op::CALLJ | op::FCALLJ => Some((ArgKind::Fixnum, ArgKind::None)),
        op::CONST | op::FN | op::GVAR | op::GSET => Some((ArgKind::Value, ArgKind::None)),
        op::LVAR | op::LSET => Some((ArgKind::Fixnum, ArgKind::Fixnum)),
        op::JUMP | op::TJUMP | op::FJUMP | op::SAVE => Some((ArgKind::Label, ArgKind::None)),
        op::POP | op::RETURN | op::CC | op::SETCC => Some((ArgKind::None, ArgKind::None)),
        _ => None,
    }
}

/// Assembly failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AssembleError {
    /// The instruction stream was not a proper list of proper lists.
    #[error("instruction stream is not a proper list")]
    NotAList,
    /// An instruction's opcode character is not in the instruction set.
    #[error("unknown opcode {opcode:?} in instruction {index}")]
    UnknownOpcode {
        /// Position of the offending instruction.
        index: usize,
        /// The opcode character found.
        opcode: char,
    },
    /// An instruction is missing an argument or carries the wrong kind.
    #[error("malformed instruction {index}: {reason}")]
    MalformedInstruction {
        /// Position of the offending instruction.
        index: usize,
        /// What was wrong with it.
        reason: &'static str,
    },
    /// A branch or save targets an address outside the procedure.
    #[error("instruction {index} targets address {target} outside 0..{count}")]
    LabelOutOfRange {
        /// Position of the offending instruction.
        index: usize,
        /// The target address found.
        target: i64,
        /// Number of instructions in the procedure.
        count: usize,
    },
}

/// Assemble an instruction list into a compiled procedure over `env`.
///
/// `instructions` is a proper list of `(opcode-character arg1 arg2)` triples
/// with trailing arguments omitted where the opcode takes none. Value
/// arguments are hoisted into the procedure's constant vector; label
/// arguments must already be resolved to absolute instruction addresses.
pub fn assemble(
    heap: &mut Heap,
    instructions: CellRef,
    env: CellRef,
) -> Result<CellRef, AssembleError> {
    let count = heap
        .list_length(instructions)
        .ok_or(AssembleError::NotAList)?;
    let instructions_root = heap.push_root(instructions);
    let env_root = heap.push_root(env);
    let result = assemble_rooted(heap, instructions, env, count);
    heap.pop_root(env_root);
    heap.pop_root(instructions_root);
    result
}

fn assemble_rooted(
    heap: &mut Heap,
    instructions: CellRef,
    env: CellRef,
    count: usize,
) -> Result<CellRef, AssembleError> {
    let mut slots: Vec<(u8, i64, i64)> = Vec::with_capacity(count);
    let mut constants: Vec<CellRef> = Vec::new();

    let mut cursor = instructions;
    let mut index = 0;
    while cursor != heap.empty_list() {
        let Some((instruction, rest)) = heap.pair(cursor) else {
            return Err(AssembleError::NotAList);
        };
        let (opcode, first, second) = read_instruction(heap, instruction, index)?;
        let Some((first_kind, second_kind)) = arg_spec(opcode) else {
            return Err(AssembleError::UnknownOpcode {
                index,
                opcode: char::from(opcode),
            });
        };

        let first_slot = resolve_argument(heap, &mut constants, first, first_kind, index, count)?;
        let second_slot =
            resolve_argument(heap, &mut constants, second, second_kind, index, count)?;
        slots.push((opcode, first_slot, second_slot));

        cursor = rest;
        index += 1;
    }

    // Materialize the packed code and the hoisted constant vector. The
    // constant cells stay reachable through the rooted instruction list.
    let code = pack_code(heap, &slots);
    let code_root = heap.push_root(code);
    let empty = heap.empty_list();
    let constant_vector = heap.make_vector(constants.len(), empty);
    for (slot, &value) in constants.iter().enumerate() {
        heap.vector_set(constant_vector, slot, value);
    }
    let procedure = heap.make_compiled_proc(code, constant_vector, env);
    heap.pop_root(code_root);
    Ok(procedure)
}

/// Split one instruction into opcode character and up to two argument cells.
fn read_instruction(
    heap: &Heap,
    instruction: CellRef,
    index: usize,
) -> Result<(u8, Option<CellRef>, Option<CellRef>), AssembleError> {
    let Some((head, rest)) = heap.pair(instruction) else {
        return Err(AssembleError::MalformedInstruction {
            index,
            reason: "instruction is not a list",
        });
    };
    let Some(opcode_char) = heap.character(head) else {
        return Err(AssembleError::MalformedInstruction {
            index,
            reason: "opcode is not a character",
        });
    };
    if !opcode_char.is_ascii() {
        return Err(AssembleError::UnknownOpcode {
            index,
            opcode: opcode_char,
        });
    }
    let opcode = opcode_char as u8;

    let mut arguments = [None, None];
    let mut cursor = rest;
    for slot in &mut arguments {
        if cursor == heap.empty_list() {
            break;
        }
        let Some((argument, rest)) = heap.pair(cursor) else {
            return Err(AssembleError::MalformedInstruction {
                index,
                reason: "argument tail is not a proper list",
            });
        };
        *slot = Some(argument);
        cursor = rest;
    }
    Ok((opcode, arguments[0], arguments[1]))
}

/// Turn one argument cell into its packed slot value.
fn resolve_argument(
    heap: &Heap,
    constants: &mut Vec<CellRef>,
    argument: Option<CellRef>,
    kind: ArgKind,
    index: usize,
    count: usize,
) -> Result<i64, AssembleError> {
    match kind {
        ArgKind::None => Ok(NO_ARG),
        ArgKind::Fixnum => {
            let cell = required(argument, index)?;
            heap.fixnum(cell)
                .ok_or(AssembleError::MalformedInstruction {
                    index,
                    reason: "argument is not a fixnum",
                })
        }
        ArgKind::Label => {
            let cell = required(argument, index)?;
            let target = heap
                .fixnum(cell)
                .ok_or(AssembleError::MalformedInstruction {
                    index,
                    reason: "label is not a fixnum",
                })?;
            if target < 0 || target >= count as i64 {
                return Err(AssembleError::LabelOutOfRange {
                    index,
                    target,
                    count,
                });
            }
            Ok(target)
        }
        ArgKind::Value => {
            let cell = required(argument, index)?;
            // Hoist, reusing the slot of an identical constant.
            let slot = match constants.iter().position(|&existing| existing == cell) {
                Some(slot) => slot,
                None => {
                    constants.push(cell);
                    constants.len() - 1
                }
            };
            Ok(slot as i64)
        }
    }
}

fn required(argument: Option<CellRef>, index: usize) -> Result<CellRef, AssembleError> {
    argument.ok_or(AssembleError::MalformedInstruction {
        index,
        reason: "missing argument",
    })
}

/// Pack resolved `(opcode, arg1, arg2)` triples into a fresh code vector.
pub(crate) fn pack_code(heap: &mut Heap, slots: &[(u8, i64, i64)]) -> CellRef {
    let empty = heap.empty_list();
    let code = heap.make_vector(slots.len() * INSTRUCTION_SLOTS, empty);
    let code_root = heap.push_root(code);
    for (index, &(opcode, first, second)) in slots.iter().enumerate() {
        let base = index * INSTRUCTION_SLOTS;
        let opcode_cell = heap.make_fixnum(i64::from(opcode));
        heap.vector_set(code, base, opcode_cell);
        let first_cell = heap.make_fixnum(first);
        heap.vector_set(code, base + 1, first_cell);
        let second_cell = heap.make_fixnum(second);
        heap.vector_set(code, base + 2, second_cell);
    }
    heap.pop_root(code_root);
    code
}

/// Number of instructions in a packed code vector.
#[must_use]
pub fn instruction_count(heap: &Heap, code: CellRef) -> Option<usize> {
    heap.vector_len(code).map(|len| len / INSTRUCTION_SLOTS)
}

/// Fetch the packed instruction at `pc`.
///
/// Returns `None` when `pc` is out of range or a slot does not hold a
/// fixnum.
#[must_use]
pub fn fetch(heap: &Heap, code: CellRef, pc: usize) -> Option<(u8, i64, i64)> {
    let base = pc * INSTRUCTION_SLOTS;
    let opcode = heap.fixnum(heap.vector_ref(code, base)?)?;
    let first = heap.fixnum(heap.vector_ref(code, base + 1)?)?;
    let second = heap.fixnum(heap.vector_ref(code, base + 2)?)?;
    u8::try_from(opcode).ok().map(|opcode| (opcode, first, second))
}
