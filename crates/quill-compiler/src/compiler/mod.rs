//! Bytecode generation.
//!
//! Turns a parsed, bound unit into [`CompiledFunction`]s.
//!
//! # Module Structure
//!
//! - `opcodes`: instruction set and operand formats
//! - `bytecode`: compiled function containers and side tables
//! - `srcnotes`: delta-encoded source position and structure notes
//! - `emitter`: tree walker producing bytecode
//!   - `emitter::statements`, `emitter::expressions`, `emitter::destructuring`
//! - `verify`: static stack depth and jump target checks
//! - `disasm`: text listings

pub mod bytecode;
pub mod disasm;
pub mod emitter;
pub mod opcodes;
pub mod srcnotes;
pub mod verify;

pub use bytecode::{
    Binding, Bindings, BlockScope, BlockScopeNote, CompiledFunction, CompiledScript, Const, FunctionFlags,
    LazyFunction, PoolObject, TryKind, TryNote,
};
pub use disasm::disassemble;
pub use emitter::{emit_function, emit_script, Emitter, Unit};
pub use opcodes::{Format, Op, OpInfo};
pub use verify::{verify, VerifyError};
