// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! # quill-compiler
//!
//! A JavaScript front end in the style of SpiderMonkey's: a parser that
//! resolves every name as it goes, and a bytecode emitter that turns the
//! bound tree into compact stack-machine code with its side tables.
//!
//! ## Overview
//!
//! - Scanner with parser-driven rescans for regexps and templates
//! - Recursive-descent parser with precedence climbing for operators
//! - Binder assigning argument, local and block slots, with closure
//!   distances for names used from nested functions
//! - Syntax-only pre-parse for lazily compiled functions
//! - Bytecode emitter with exception, block scope and source note tables
//!
//! ## Quick Start
//!
//! ```rust
//! use quill_compiler::{compile_script, disassemble, CompileOptions};
//!
//! let script = compile_script("var x = 1; x + 2;", &CompileOptions::default())?;
//! println!("{}", disassemble(&script.main));
//! # Ok::<(), quill_compiler::CompileError>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod ast;
pub mod atoms;
pub mod compiler;
pub mod error;
pub mod lexer;
pub mod options;
pub mod parser;
mod stack;

pub use compiler::{
    disassemble, verify, CompiledFunction, CompiledScript, LazyFunction, Op, PoolObject, VerifyError,
};
pub use error::{CompileError, Diagnostic, ErrorKind, Result};
pub use options::CompileOptions;
pub use parser::check_syntax;

use compiler::emitter::{emit_function, emit_script, Unit};
use parser::{parse_function, parse_script, StandaloneFunction};

/// Compiles a script to bytecode.
///
/// Nested functions are compiled along with it, or left as
/// [`LazyFunction`]s when `options.lazy_functions` is set.
///
/// # Examples
///
/// ```rust
/// use quill_compiler::{compile_script, CompileOptions};
///
/// let script = compile_script("function f(a) { return a; }", &CompileOptions::default())?;
/// assert_eq!(script.main.function_count(), 2);
/// # Ok::<(), quill_compiler::CompileError>(())
/// ```
pub fn compile_script(source: &str, options: &CompileOptions) -> Result<CompiledScript> {
    let _span = tracing::debug_span!(
        "compile_script",
        file = options.filename.as_deref().unwrap_or("<input>")
    )
    .entered();
    let parsed = parse_script(source, options)?;
    let main = emit_script(&parsed, options)?;
    Ok(CompiledScript {
        main,
        bindings: parsed.binder.resolved_bindings(&parsed.atoms),
        warnings: parsed.binder.warnings.clone(),
    })
}

/// Compiles a function that was deferred during an earlier
/// [`compile_script`] of the same `source`.
pub fn compile_lazy_function(
    source: &str,
    function: &LazyFunction,
    options: &CompileOptions,
) -> Result<CompiledFunction> {
    tracing::debug!(
        name = function.name.as_deref().unwrap_or("<anonymous>"),
        start = function.start,
        "compiling lazy function"
    );
    let standalone = StandaloneFunction {
        name: function.name.clone(),
        kind: function.kind,
        syntax: function.syntax,
        strict: function.strict,
        start: function.start,
        pos: function.pos,
    };
    let parsed = parse_function(source, &standalone, options)?;
    emit_function(Unit::new(&parsed, options), parsed.body[0])
}

/// Compiles independent scripts, each named for diagnostics. Units share
/// nothing, so with the `parallel` feature they are compiled on the rayon
/// thread pool.
pub fn compile_scripts(units: &[(String, String)], options: &CompileOptions) -> Vec<Result<CompiledScript>> {
    let compile_one = |(name, source): &(String, String)| {
        let options = options.clone().with_filename(name.as_str());
        compile_script(source, &options)
    };

    #[cfg(feature = "parallel")]
    {
        use rayon::prelude::*;
        units.par_iter().map(compile_one).collect()
    }

    #[cfg(not(feature = "parallel"))]
    {
        units.iter().map(compile_one).collect()
    }
}
