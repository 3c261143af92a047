//! Compiled code containers.
//!
//! A [`CompiledFunction`] is self-contained: its instructions index only its
//! own pools. Nested functions live in the object pool of the function that
//! creates them.

use num_bigint::BigInt;

use crate::error::Diagnostic;
use crate::lexer::SourcePos;
use crate::parser::{DefKind, FunctionKind, FunctionSyntax, ResolvedBinding};

/// A numeric constant.
#[derive(Debug, Clone, PartialEq)]
pub enum Const {
    /// Double that does not fit an integer immediate
    Number(f64),
    /// Arbitrary-precision integer
    BigInt(BigInt),
}

/// A function that was not compiled with its parent. Compiling it reparses
/// `start..end` of the unit's source.
#[derive(Debug, Clone, PartialEq)]
pub struct LazyFunction {
    /// Function name
    pub name: Option<String>,
    /// Code kind
    pub kind: FunctionKind,
    /// Source form
    pub syntax: FunctionSyntax,
    /// Inherited strictness
    pub strict: bool,
    /// Byte offset of the parameter list
    pub start: usize,
    /// Byte offset just past the body
    pub end: usize,
    /// Line/column of `start`
    pub pos: SourcePos,
    /// Names used but not declared by the function
    pub free_names: Vec<String>,
}

/// Names and frame slots of a block scope, created by `enterblock`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockScope {
    /// Bound names with their frame slots (after the `var` slots)
    pub bindings: Vec<(String, u16)>,
}

/// An entry in a function's object pool.
#[derive(Debug, Clone, PartialEq)]
pub enum PoolObject {
    /// A nested function compiled with its parent
    Function(Box<CompiledFunction>),
    /// A nested function deferred until first call
    LazyFunction(LazyFunction),
    /// A regular expression literal
    RegExp { pattern: String, flags: String },
    /// A block scope descriptor
    Block(BlockScope),
}

/// What a [`TryNote`] guards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TryKind {
    /// Control goes to a `catch` handler
    Catch,
    /// Control goes to a `finally` block
    Finally,
    /// A `for-in`/`for-of` iterator must be closed on unwind
    Iter,
}

/// An exception region. The handler (for `Catch` and `Finally`) starts at
/// `start + length`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TryNote {
    /// Region kind
    pub kind: TryKind,
    /// Operand stack depth to unwind to
    pub stack_depth: u32,
    /// First bytecode offset covered
    pub start: u32,
    /// Length of the covered range
    pub length: u32,
}

/// The range of code during which a block scope is live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockScopeNote {
    /// Object pool index of the [`BlockScope`]
    pub index: u32,
    /// First bytecode offset inside the scope
    pub start: u32,
    /// Length of the range
    pub length: u32,
    /// Index of the enclosing note, if any
    pub parent: Option<u32>,
}

/// A frame binding as seen by the runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    /// Bound name; empty for destructuring parameters
    pub name: String,
    /// How it was declared
    pub kind: DefKind,
    /// Referenced from a nested function
    pub closed_over: bool,
}

/// Frame layout of a function: argument slots, `var` slots, then
/// block-scoped slots.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bindings {
    /// One per argument slot
    pub args: Vec<Binding>,
    /// One per `var`-class local slot
    pub vars: Vec<Binding>,
    /// One per block-scoped slot
    pub blocks: Vec<Binding>,
}

impl Bindings {
    /// Number of local slots (vars and block-scoped).
    pub fn nfixed(&self) -> usize {
        self.vars.len() + self.blocks.len()
    }

    /// Looks a local slot up by name.
    pub fn local(&self, name: &str) -> Option<u16> {
        self.vars
            .iter()
            .chain(&self.blocks)
            .position(|b| b.name == name)
            .map(|i| i as u16)
    }

    /// Looks an argument slot up by name.
    pub fn arg(&self, name: &str) -> Option<u16> {
        self.args.iter().rposition(|b| b.name == name).map(|i| i as u16)
    }
}

/// Summary flags of a compiled function.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FunctionFlags {
    pub strict: bool,
    pub generator: bool,
    pub arrow: bool,
    pub uses_arguments: bool,
    pub uses_this: bool,
    pub has_direct_eval: bool,
    pub has_with: bool,
    /// Needs a scope object: names are looked up dynamically
    pub heavyweight: bool,
}

/// Bytecode and side tables of one function or script.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompiledFunction {
    /// Function name
    pub name: Option<String>,
    /// Instructions
    pub code: Vec<u8>,
    /// Deepest operand stack the code reaches
    pub max_stack_depth: u32,
    /// Strings referenced by `Atom` operands
    pub atoms: Vec<String>,
    /// Numbers and BigInts referenced by `Const` operands
    pub consts: Vec<Const>,
    /// Functions, regexps and block scopes referenced by `Object` operands
    pub objects: Vec<PoolObject>,
    /// Exception regions, innermost first
    pub try_notes: Vec<TryNote>,
    /// Block scope ranges
    pub block_notes: Vec<BlockScopeNote>,
    /// Delta-encoded source notes; see [`super::srcnotes`]
    pub src_notes: Vec<u8>,
    /// Line of the first instruction
    pub line: u32,
    /// Column of the first instruction
    pub column: u32,
    /// Frame layout
    pub bindings: Bindings,
    /// Summary flags
    pub flags: FunctionFlags,
}

impl CompiledFunction {
    /// Nested functions compiled with this one.
    pub fn functions(&self) -> impl Iterator<Item = &CompiledFunction> {
        self.objects.iter().filter_map(|o| match o {
            PoolObject::Function(f) => Some(&**f),
            _ => None,
        })
    }

    /// Nested functions left for lazy compilation.
    pub fn lazy_functions(&self) -> impl Iterator<Item = &LazyFunction> {
        self.objects.iter().filter_map(|o| match o {
            PoolObject::LazyFunction(f) => Some(f),
            _ => None,
        })
    }

    /// Number of functions in this tree, this one included.
    pub fn function_count(&self) -> usize {
        1 + self.functions().map(CompiledFunction::function_count).sum::<usize>()
    }
}

/// A compiled script.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledScript {
    /// Top-level code
    pub main: CompiledFunction,
    /// Every name reference and what it resolved to
    pub bindings: Vec<ResolvedBinding>,
    /// Non-fatal diagnostics
    pub warnings: Vec<Diagnostic>,
}

