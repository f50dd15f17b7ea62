// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Bytecode virtual machine for the Selva runtime.
//!
//! The VM is a stack machine: it executes one compiled procedure over an
//! operand stack (itself a heap vector) and a lexical environment (a list of
//! vector frames). Control transfer between compiled procedures happens
//! exclusively through `callj`/`fcallj`, which replace the active procedure
//! in place - an arbitrarily long chain of tail calls runs in bounded native
//! stack. Non-tail calls push a `(pc fn env)` return record with `save` and
//! resume through the shared return logic.
//!
//! On entry the VM conses an empty frame onto the procedure's captured
//! environment and registers its registers (procedure, environment, stack,
//! one scratch slot) on the heap's root stack, so a collection triggered by
//! any opcode sees everything the VM holds.
//!
//! Failures of the running program (arity, unbound globals, non-callable
//! targets, malformed bytecode) are fatal to the invocation: the VM logs a
//! diagnostic and hands a [`RuntimeError`] back to its invoker.

#[cfg(test)]
mod vm_test;

use thiserror::Error;

use crate::bytecode::{self, NO_ARG, op};
use crate::heap::{Heap, Root};
use crate::primitives::PrimitiveError;
use crate::value::{CellRef, Tag};

/// Operand-stack slots allocated by [`Vm::call`].
pub const DEFAULT_STACK_CAPACITY: usize = 256;

/// The fixed body of every captured continuation: restore the saved operand
/// stack and top, then return the value the continuation was called with.
const CC_THUNK: [(u8, i64, i64); 6] = [
    (op::ARGS, 1, NO_ARG),
    (op::LVAR, 1, 1),
    (op::LVAR, 1, 0),
    (op::SETCC, NO_ARG, NO_ARG),
    (op::LVAR, 0, 0),
    (op::RETURN, NO_ARG, NO_ARG),
];

/// Runtime failure of a VM invocation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuntimeError {
    /// A procedure received the wrong number of arguments.
    #[error("wrong number of arguments: expected {expected}, got {got}")]
    ArityMismatch {
        /// Declared parameter count.
        expected: usize,
        /// Arguments received.
        got: usize,
        /// Whether extra arguments would have been accepted.
        variadic: bool,
    },
    /// A call target is not a procedure.
    #[error("value of type {type_name} is not callable")]
    NotCallable {
        /// Tag name of the offending value.
        type_name: &'static str,
    },
    /// The program counter ran off the end of the code vector.
    #[error("program counter {pc} is past the end of the procedure")]
    PcOutOfBounds {
        /// The offending instruction index.
        pc: usize,
    },
    /// An instruction slot held something other than what the opcode needs.
    #[error("malformed bytecode at instruction {pc}")]
    MalformedBytecode {
        /// The offending instruction index.
        pc: usize,
    },
    /// A lexical reference walked past the environment or its frame.
    #[error("lexical reference ({frame}, {slot}) is outside the environment")]
    BadLexicalRef {
        /// Frame index of the reference.
        frame: usize,
        /// Slot index of the reference.
        slot: usize,
    },
    /// `gvar` on a name with no global binding.
    #[error("unbound global variable: {name}")]
    UnboundGlobal {
        /// The variable name.
        name: String,
    },
    /// A pop on an empty operand stack.
    #[error("operand stack underflow")]
    StackUnderflow,
    /// The operand stack register does not hold a vector.
    #[error("operand stack is not a vector")]
    InvalidStack,
    /// The environment register does not hold a frame list.
    #[error("environment is not a frame list")]
    CorruptEnvironment,
    /// A return record on the stack is not a `(pc fn env)` list.
    #[error("malformed return record on the operand stack")]
    CorruptReturnRecord,
    /// `callj -1` popped something other than a proper argument list.
    #[error("apply argument is not a proper list")]
    ImproperArgumentList,
    /// A primitive signalled an error.
    #[error(transparent)]
    Primitive(#[from] PrimitiveError),
}

/// Outcome of one step of the shared return logic.
enum Step {
    /// Keep executing.
    Continue,
    /// The invocation is complete with this value.
    Done(CellRef),
}

/// VM registers. The heap root slots mirror the cell-valued registers so a
/// collection triggered mid-opcode traces them.
struct Machine {
    func: CellRef,
    env: CellRef,
    stack: CellRef,
    pc: usize,
    top: usize,
    /// Stack depth the invocation started at, after the arguments; a
    /// `return` with exactly one value above this mark ends the invocation.
    entry_top: usize,
    n_args: usize,
    func_root: Root,
    env_root: Root,
    stack_root: Root,
    scratch_root: Root,
}

impl Machine {
    fn set_func(&mut self, heap: &mut Heap, func: CellRef) {
        self.func = func;
        heap.set_root(&self.func_root, func);
    }

    fn set_env(&mut self, heap: &mut Heap, env: CellRef) {
        self.env = env;
        heap.set_root(&self.env_root, env);
    }

    fn set_stack(&mut self, heap: &mut Heap, stack: CellRef) {
        self.stack = stack;
        heap.set_root(&self.stack_root, stack);
    }
}

/// Stateless bytecode virtual machine.
pub struct Vm;

impl Vm {
    /// Execute a compiled procedure.
    ///
    /// `stack` is the operand stack with the `n_args` arguments in its top
    /// slots and `top` pointing just past them. Runs until a terminal
    /// `return` leaves one value above the entry mark and returns that
    /// value, with the stack unwound back to the mark.
    ///
    /// # Errors
    ///
    /// Returns a [`RuntimeError`] when execution fails; the operand stack
    /// contents are unspecified afterwards.
    pub fn execute(
        heap: &mut Heap,
        func: CellRef,
        stack: CellRef,
        top: usize,
        n_args: usize,
    ) -> Result<CellRef, RuntimeError> {
        let Some((_, _, captured_env)) = heap.proc_parts(func) else {
            let type_name = heap.tag(func).name();
            tracing::error!(type_name, "vm invoked on a non-compiled procedure");
            return Err(RuntimeError::NotCallable { type_name });
        };
        if heap.vector_len(stack).is_none() {
            return Err(RuntimeError::InvalidStack);
        }
        if n_args > top {
            return Err(RuntimeError::StackUnderflow);
        }

        let func_root = heap.push_root(func);
        let stack_root = heap.push_root(stack);
        let empty = heap.empty_list();
        let frame = heap.make_vector(0, empty);
        let env = heap.make_pair(frame, captured_env);
        let env_root = heap.push_root(env);
        let scratch_root = heap.push_root(empty);

        let mut machine = Machine {
            func,
            env,
            stack,
            pc: 0,
            top,
            entry_top: top - n_args,
            n_args,
            func_root,
            env_root,
            stack_root,
            scratch_root,
        };
        let result = run(heap, &mut machine);

        let Machine {
            func_root,
            env_root,
            stack_root,
            scratch_root,
            ..
        } = machine;
        heap.pop_root(scratch_root);
        heap.pop_root(env_root);
        heap.pop_root(stack_root);
        heap.pop_root(func_root);
        result
    }

    /// Execute a compiled procedure on a fresh operand stack.
    ///
    /// Convenience wrapper around [`Vm::execute`] for callers that do not
    /// manage an operand stack themselves.
    ///
    /// # Errors
    ///
    /// Returns a [`RuntimeError`] when execution fails.
    pub fn call(heap: &mut Heap, func: CellRef, args: &[CellRef]) -> Result<CellRef, RuntimeError> {
        let func_root = heap.push_root(func);
        let arg_roots: Vec<Root> = args.iter().map(|&arg| heap.push_root(arg)).collect();

        let empty = heap.empty_list();
        let stack = heap.make_vector(DEFAULT_STACK_CAPACITY.max(args.len()), empty);
        for (slot, &arg) in args.iter().enumerate() {
            heap.vector_set(stack, slot, arg);
        }
        for root in arg_roots.into_iter().rev() {
            heap.pop_root(root);
        }

        let stack_root = heap.push_root(stack);
        let result = Self::execute(heap, func, stack, args.len(), args.len());
        heap.pop_root(stack_root);
        heap.pop_root(func_root);
        result
    }
}

/// The dispatch loop.
fn run(heap: &mut Heap, m: &mut Machine) -> Result<CellRef, RuntimeError> {
    loop {
        let Some((code, constants, _)) = heap.proc_parts(m.func) else {
            return Err(RuntimeError::NotCallable {
                type_name: heap.tag(m.func).name(),
            });
        };
        let count = bytecode::instruction_count(heap, code)
            .ok_or(RuntimeError::MalformedBytecode { pc: m.pc })?;
        if m.pc >= count {
            tracing::error!(pc = m.pc, count, "program counter past end of procedure");
            return Err(RuntimeError::PcOutOfBounds { pc: m.pc });
        }
        let pc = m.pc;
        let Some((opcode, first, second)) = bytecode::fetch(heap, code, pc) else {
            return Err(RuntimeError::MalformedBytecode { pc });
        };
        m.pc += 1;

        match opcode {
            op::ARGS => do_args(heap, m, first, pc)?,
            op::ARGSDOT => do_argsdot(heap, m, first, pc)?,
            op::CONST => {
                let value = constant(heap, constants, first, pc)?;
                push_value(heap, m, value)?;
            }
            op::LVAR => {
                let (frame, slot) = lexical_slot(heap, m, first, second, pc)?;
                let value = heap
                    .vector_ref(frame, slot)
                    .ok_or(RuntimeError::BadLexicalRef {
                        frame: first as usize,
                        slot,
                    })?;
                push_value(heap, m, value)?;
            }
            op::LSET => {
                // Non-destructive: the assigned value stays on the stack.
                let value = peek_value(heap, m)?;
                let (frame, slot) = lexical_slot(heap, m, first, second, pc)?;
                if !heap.vector_set(frame, slot, value) {
                    return Err(RuntimeError::BadLexicalRef {
                        frame: first as usize,
                        slot,
                    });
                }
            }
            op::GVAR => do_gvar(heap, m, constants, first, pc)?,
            op::GSET => {
                let symbol = constant(heap, constants, first, pc)?;
                let value = peek_value(heap, m)?;
                heap.define_global(symbol, value);
            }
            op::POP => {
                pop_value(heap, m)?;
            }
            op::JUMP => m.pc = jump_target(first, pc)?,
            op::TJUMP => {
                let value = pop_value(heap, m)?;
                if !false_like(heap, value) {
                    m.pc = jump_target(first, pc)?;
                }
            }
            op::FJUMP => {
                let value = pop_value(heap, m)?;
                if false_like(heap, value) {
                    m.pc = jump_target(first, pc)?;
                }
            }
            op::FN => do_fn(heap, m, constants, first, pc)?,
            op::SAVE => do_save(heap, m, first, pc)?,
            op::RETURN => match return_step(heap, m)? {
                Step::Done(value) => return Ok(value),
                Step::Continue => {}
            },
            op::CALLJ => match do_call(heap, m, first, true, pc)? {
                Step::Done(value) => return Ok(value),
                Step::Continue => {}
            },
            op::FCALLJ => match do_call(heap, m, first, false, pc)? {
                Step::Done(value) => return Ok(value),
                Step::Continue => {}
            },
            op::CC => do_capture(heap, m)?,
            op::SETCC => do_setcc(heap, m)?,
            unknown => {
                tracing::error!(opcode = unknown, pc, "unknown opcode");
                return Err(RuntimeError::MalformedBytecode { pc });
            }
        }
    }
}

/// Falselike values: `#f`, the empty list, and the symbol `nil`.
fn false_like(heap: &Heap, value: CellRef) -> bool {
    value == heap.bool_false() || value == heap.empty_list() || value == heap.nil_symbol()
}

fn arg_usize(value: i64, pc: usize) -> Result<usize, RuntimeError> {
    usize::try_from(value).map_err(|_| RuntimeError::MalformedBytecode { pc })
}

fn jump_target(value: i64, pc: usize) -> Result<usize, RuntimeError> {
    arg_usize(value, pc)
}

/// Constant-vector lookup for `const`, `fn`, `gvar`, `gset` operands.
fn constant(
    heap: &Heap,
    constants: CellRef,
    index: i64,
    pc: usize,
) -> Result<CellRef, RuntimeError> {
    let index = arg_usize(index, pc)?;
    heap.vector_ref(constants, index)
        .ok_or(RuntimeError::MalformedBytecode { pc })
}

/// Push onto the operand stack, growing the backing buffer on overflow.
///
/// Growth keeps every slot at or above `top` pointing at the empty-list
/// singleton, so the collector never traces stale values.
fn push_value(heap: &mut Heap, m: &mut Machine, value: CellRef) -> Result<(), RuntimeError> {
    let capacity = heap.vector_len(m.stack).ok_or(RuntimeError::InvalidStack)?;
    if m.top == capacity {
        let grown = (capacity * 9 / 5).max(capacity + 1);
        let empty = heap.empty_list();
        heap.vector_grow(m.stack, grown, empty);
    }
    if !heap.vector_set(m.stack, m.top, value) {
        return Err(RuntimeError::InvalidStack);
    }
    m.top += 1;
    Ok(())
}

/// Pop the operand stack, restoring the vacated slot to the empty list.
fn pop_value(heap: &mut Heap, m: &mut Machine) -> Result<CellRef, RuntimeError> {
    if m.top == 0 {
        return Err(RuntimeError::StackUnderflow);
    }
    m.top -= 1;
    let value = heap
        .vector_ref(m.stack, m.top)
        .ok_or(RuntimeError::InvalidStack)?;
    let empty = heap.empty_list();
    heap.vector_set(m.stack, m.top, empty);
    Ok(value)
}

fn peek_value(heap: &Heap, m: &Machine) -> Result<CellRef, RuntimeError> {
    if m.top == 0 {
        return Err(RuntimeError::StackUnderflow);
    }
    heap.vector_ref(m.stack, m.top - 1)
        .ok_or(RuntimeError::InvalidStack)
}

/// Resolve a `(frame, slot)` lexical coordinate to its frame vector.
fn lexical_slot(
    heap: &Heap,
    m: &Machine,
    frame_arg: i64,
    slot_arg: i64,
    pc: usize,
) -> Result<(CellRef, usize), RuntimeError> {
    let frame_index = arg_usize(frame_arg, pc)?;
    let slot = arg_usize(slot_arg, pc)?;
    let mut env = m.env;
    for _ in 0..frame_index {
        env = heap.cdr(env).ok_or(RuntimeError::BadLexicalRef {
            frame: frame_index,
            slot,
        })?;
    }
    let frame = heap.car(env).ok_or(RuntimeError::BadLexicalRef {
        frame: frame_index,
        slot,
    })?;
    Ok((frame, slot))
}

/// Top frame of the environment, replaced by a larger one when needed.
///
/// Replacement mutates the `car` of the environment's head pair; the cons
/// itself is reused, so closures captured over this environment observe the
/// new frame.
fn ensure_frame(heap: &mut Heap, m: &Machine, min_len: usize) -> Result<CellRef, RuntimeError> {
    let frame = heap.car(m.env).ok_or(RuntimeError::CorruptEnvironment)?;
    let len = heap
        .vector_len(frame)
        .ok_or(RuntimeError::CorruptEnvironment)?;
    if len >= min_len {
        return Ok(frame);
    }
    let empty = heap.empty_list();
    let replacement = heap.make_vector(min_len, empty);
    heap.set_car(m.env, replacement);
    Ok(replacement)
}

/// `args n`: bind exactly `n` arguments into the top frame, in reverse.
fn do_args(heap: &mut Heap, m: &mut Machine, count: i64, pc: usize) -> Result<(), RuntimeError> {
    let n = arg_usize(count, pc)?;
    if m.n_args != n {
        tracing::error!(expected = n, got = m.n_args, "arity mismatch");
        return Err(RuntimeError::ArityMismatch {
            expected: n,
            got: m.n_args,
            variadic: false,
        });
    }
    let frame = ensure_frame(heap, m, n)?;
    for slot in (0..n).rev() {
        let value = pop_value(heap, m)?;
        heap.vector_set(frame, slot, value);
    }
    Ok(())
}

/// `argsdot n`: bind `n` fixed arguments plus a rest list of the excess.
fn do_argsdot(heap: &mut Heap, m: &mut Machine, count: i64, pc: usize) -> Result<(), RuntimeError> {
    let n = arg_usize(count, pc)?;
    if m.n_args < n {
        tracing::error!(expected = n, got = m.n_args, "arity mismatch");
        return Err(RuntimeError::ArityMismatch {
            expected: n,
            got: m.n_args,
            variadic: true,
        });
    }
    let frame = ensure_frame(heap, m, n + 1)?;

    // The excess arguments are on top; consing from the top preserves their
    // order in the rest list.
    let mut rest = heap.empty_list();
    for _ in 0..(m.n_args - n) {
        let value = pop_value(heap, m)?;
        rest = heap.make_pair(value, rest);
    }
    heap.vector_set(frame, n, rest);

    for slot in (0..n).rev() {
        let value = pop_value(heap, m)?;
        heap.vector_set(frame, slot, value);
    }
    Ok(())
}

/// `gvar`: push a global binding, failing on unbound names.
fn do_gvar(
    heap: &mut Heap,
    m: &mut Machine,
    constants: CellRef,
    index: i64,
    pc: usize,
) -> Result<(), RuntimeError> {
    let symbol = constant(heap, constants, index, pc)?;
    match heap.lookup_global(symbol) {
        Some(value) => push_value(heap, m, value),
        None => {
            let name = heap.symbol_name(symbol).unwrap_or("<non-symbol>").to_owned();
            tracing::error!(global = %name, "unbound global variable");
            Err(RuntimeError::UnboundGlobal { name })
        }
    }
}

/// `fn`: close a procedure template over the current environment.
fn do_fn(
    heap: &mut Heap,
    m: &mut Machine,
    constants: CellRef,
    index: i64,
    pc: usize,
) -> Result<(), RuntimeError> {
    let template = constant(heap, constants, index, pc)?;
    let Some((code, template_constants, _)) = heap.proc_parts(template) else {
        return Err(RuntimeError::NotCallable {
            type_name: heap.tag(template).name(),
        });
    };
    let closure = heap.make_compiled_proc(code, template_constants, m.env);
    push_value(heap, m, closure)
}

/// `save L`: push a `(L fn env)` return record.
fn do_save(heap: &mut Heap, m: &mut Machine, target: i64, pc: usize) -> Result<(), RuntimeError> {
    arg_usize(target, pc)?;
    let address = heap.make_fixnum(target);
    let record = heap.make_list3(address, m.func, m.env);
    push_value(heap, m, record)
}

/// Shared return logic for `return` and the primitive call paths.
fn return_step(heap: &mut Heap, m: &mut Machine) -> Result<Step, RuntimeError> {
    if m.top == m.entry_top + 1 {
        let value = pop_value(heap, m)?;
        return Ok(Step::Done(value));
    }

    let result = pop_value(heap, m)?;
    let record = pop_value(heap, m)?;
    let (address_cell, rest) = heap.pair(record).ok_or(RuntimeError::CorruptReturnRecord)?;
    let (saved_func, rest) = heap.pair(rest).ok_or(RuntimeError::CorruptReturnRecord)?;
    let (saved_env, _) = heap.pair(rest).ok_or(RuntimeError::CorruptReturnRecord)?;
    let address = heap
        .fixnum(address_cell)
        .and_then(|address| usize::try_from(address).ok())
        .ok_or(RuntimeError::CorruptReturnRecord)?;

    m.set_func(heap, saved_func);
    m.set_env(heap, saved_env);
    m.pc = address;
    push_value(heap, m, result)?;
    Ok(Step::Continue)
}

/// `callj`/`fcallj`: transfer control to a popped target.
///
/// The tail form reuses the current environment's spine cell, splicing the
/// target's captured environment in as its tail; the non-tail form conses a
/// fresh frame onto the target's environment. Primitives are invoked in
/// place, their arguments unwound, and the shared return logic runs on the
/// pushed result.
fn do_call(
    heap: &mut Heap,
    m: &mut Machine,
    count_arg: i64,
    tail: bool,
    pc: usize,
) -> Result<Step, RuntimeError> {
    let mut target = pop_value(heap, m)?;
    while heap.tag(target) == Tag::MetaProc {
        match heap.meta_parts(target) {
            Some((inner, _)) => target = inner,
            None => break,
        }
    }

    let n = if count_arg < 0 {
        if count_arg != NO_ARG {
            return Err(RuntimeError::MalformedBytecode { pc });
        }
        spread_list(heap, m)?
    } else {
        count_arg as usize
    };

    match heap.tag(target) {
        Tag::CompiledProc | Tag::CompiledSyntaxProc => {
            let Some((_, _, target_env)) = heap.proc_parts(target) else {
                return Err(RuntimeError::CorruptEnvironment);
            };
            m.n_args = n;
            if tail {
                if !heap.set_cdr(m.env, target_env) {
                    return Err(RuntimeError::CorruptEnvironment);
                }
            } else {
                let target_root = heap.push_root(target);
                let empty = heap.empty_list();
                let frame = heap.make_vector(0, empty);
                let env = heap.make_pair(frame, target_env);
                m.set_env(heap, env);
                heap.pop_root(target_root);
            }
            m.set_func(heap, target);
            m.pc = 0;
            Ok(Step::Continue)
        }
        Tag::PrimitiveProc => {
            let Some(function) = heap.primitive_fn(target) else {
                return Err(RuntimeError::NotCallable {
                    type_name: Tag::PrimitiveProc.name(),
                });
            };
            if n > m.top {
                return Err(RuntimeError::StackUnderflow);
            }
            let result = function(heap, m.stack, n, m.top)?;

            // Unwind the arguments; the primitive leaves them in place.
            let empty = heap.empty_list();
            for slot in (m.top - n)..m.top {
                heap.vector_set(m.stack, slot, empty);
            }
            m.top -= n;
            push_value(heap, m, result)?;
            return_step(heap, m)
        }
        other => {
            tracing::error!(type_name = other.name(), "call target is not a procedure");
            Err(RuntimeError::NotCallable {
                type_name: other.name(),
            })
        }
    }
}

/// The apply path of `callj`: pop an argument list and push its elements.
fn spread_list(heap: &mut Heap, m: &mut Machine) -> Result<usize, RuntimeError> {
    let list = pop_value(heap, m)?;
    let mut count = 0;
    let mut cursor = list;
    while cursor != heap.empty_list() {
        let Some((car, cdr)) = heap.pair(cursor) else {
            return Err(RuntimeError::ImproperArgumentList);
        };
        // push_value grows buffers but never allocates cells, so the
        // unrooted tail of the list stays live throughout.
        push_value(heap, m, car)?;
        count += 1;
        cursor = cdr;
    }
    Ok(count)
}

/// `cc`: capture the current continuation.
///
/// The continuation is a compiled procedure over a one-frame environment
/// holding a copy of the operand stack and the current top; its body is the
/// fixed cc-thunk.
fn do_capture(heap: &mut Heap, m: &mut Machine) -> Result<(), RuntimeError> {
    let saved_stack = heap
        .copy_vector(m.stack)
        .ok_or(RuntimeError::InvalidStack)?;
    // The scratch root keeps the stack copy alive across the allocations
    // below.
    heap.set_root(&m.scratch_root, saved_stack);
    let saved_top = heap.make_fixnum(m.top as i64);
    let saved_top_root = heap.push_root(saved_top);

    let empty = heap.empty_list();
    let frame = heap.make_vector(2, empty);
    heap.vector_set(frame, 0, saved_stack);
    heap.vector_set(frame, 1, saved_top);
    heap.pop_root(saved_top_root);
    heap.set_root(&m.scratch_root, empty);

    let env = heap.make_pair(frame, empty);
    let env_root = heap.push_root(env);
    let template = ensure_cc_template(heap);
    let (code, constants, _) = match heap.proc_parts(template) {
        Some(parts) => parts,
        None => unreachable!("cc template is always a compiled procedure"),
    };
    heap.pop_root(env_root);

    let continuation = heap.make_compiled_proc(code, constants, env);
    push_value(heap, m, continuation)
}

/// Build (or fetch) the shared cc-thunk template.
fn ensure_cc_template(heap: &mut Heap) -> CellRef {
    if let Some(template) = heap.cc_template() {
        return template;
    }
    let code = bytecode::pack_code(heap, &CC_THUNK);
    let code_root = heap.push_root(code);
    let empty = heap.empty_list();
    let constants = heap.make_vector(0, empty);
    let template = heap.make_compiled_proc(code, constants, empty);
    heap.pop_root(code_root);
    heap.set_cc_template(template);
    template
}

/// `setcc`: restore a captured operand stack and top.
fn do_setcc(heap: &mut Heap, m: &mut Machine) -> Result<(), RuntimeError> {
    let new_stack = pop_value(heap, m)?;
    let new_top_cell = pop_value(heap, m)?;
    let new_top = heap
        .fixnum(new_top_cell)
        .and_then(|top| usize::try_from(top).ok())
        .ok_or(RuntimeError::InvalidStack)?;
    let capacity = heap
        .vector_len(new_stack)
        .ok_or(RuntimeError::InvalidStack)?;
    if new_top > capacity {
        return Err(RuntimeError::InvalidStack);
    }
    m.set_stack(heap, new_stack);
    m.top = new_top;
    Ok(())
}
