//! Parser and name binding.
//!
//! The parser is recursive descent for statements and precedence climbing
//! for binary expressions. It resolves every identifier through the
//! [`Binder`] as it goes, so the tree it hands to the emitter is already
//! annotated with use-sites and slot addresses.
//!
//! Two situations restart part of the parse:
//!
//! - a `"use strict"` directive found after a function (or the script) was
//!   entered in sloppy mode restarts that body in strict mode;
//! - the syntax-only strategy meeting something it cannot check precisely
//!   gives up, and the function is parsed again with the full strategy.
//!
//! Both restarts rewind the scanner and truncate the binder and node arena
//! to a checkpoint taken before the function was entered.

pub mod binder;
pub mod funbox;
pub mod handler;

mod expressions;
#[allow(clippy::module_inception)]
mod parser;
mod patterns;
mod statements;

pub use binder::{
    Binder, Cookie, DefId, DefKind, Definition, FunBoxId, ResolvedBinding, ScopeData, ScopeId,
    ScopeKind, Slot, UseId, UseSite,
};
pub use funbox::{FunctionBox, FunctionKind, FunctionSyntax, LazyInfo};
pub use handler::{FullParseHandler, NodeClass, ParseHandler, SyntaxNode, SyntaxParseHandler};
pub use parser::Parser;

use crate::ast::{Ast, NodeId};
use crate::atoms::AtomTable;
use crate::error::{CompileError, Result};
use crate::lexer::SourcePos;
use crate::options::CompileOptions;

/// Why a parse gave up without an error of its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseAbort {
    /// The syntax-only strategy met a construct it cannot handle
    NeedFullParse,
    /// A `"use strict"` directive was found after sloppy parsing began
    RestartStrict,
}

/// Failure of a parse step.
#[derive(Debug, Clone, PartialEq)]
pub enum ParseFailure {
    /// A real compile error
    Error(CompileError),
    /// A restart signal for an enclosing parse step
    Abort(ParseAbort),
}

impl From<CompileError> for ParseFailure {
    fn from(err: CompileError) -> Self {
        ParseFailure::Error(err)
    }
}

impl ParseFailure {
    /// Converts a failure that escaped every restart point into an error.
    pub(crate) fn into_error(self) -> CompileError {
        match self {
            ParseFailure::Error(err) => err,
            ParseFailure::Abort(abort) => CompileError::syntax(
                format!("internal parse restart escaped its function: {abort:?}"),
                SourcePos::default(),
            ),
        }
    }
}

pub(crate) type PResult<T> = std::result::Result<T, ParseFailure>;

/// A fully parsed compilation unit.
#[derive(Debug)]
pub struct ParseOutput {
    /// Node arena
    pub ast: Ast,
    /// Bindings, scopes and function boxes
    pub binder: Binder,
    /// Interned strings
    pub atoms: AtomTable,
    /// The root function box (the script, or the standalone function)
    pub root: FunBoxId,
    /// Top-level statements of a script, or the function node of a
    /// standalone function
    pub body: Vec<NodeId>,
}

/// Parses a script with the full strategy.
pub fn parse_script(source: &str, options: &CompileOptions) -> Result<ParseOutput> {
    let mut parser = Parser::new(source, options, FullParseHandler::new(), AtomTable::new());
    let (root, body) = parser.parse_script().map_err(ParseFailure::into_error)?;
    let (handler, binder, atoms) = parser.into_parts();
    Ok(ParseOutput {
        ast: handler.ast,
        binder,
        atoms,
        root,
        body,
    })
}

/// Parses a script with the syntax-only strategy. Returns `None` when that
/// strategy cannot handle the script and a full parse is required.
pub fn check_syntax(source: &str, options: &CompileOptions) -> Result<Option<(Binder, AtomTable)>> {
    let mut parser = Parser::new(source, options, SyntaxParseHandler, AtomTable::new());
    match parser.parse_script() {
        Ok(_) => {
            let (_, binder, atoms) = parser.into_parts();
            Ok(Some((binder, atoms)))
        }
        Err(ParseFailure::Abort(ParseAbort::NeedFullParse)) => Ok(None),
        Err(failure) => Err(failure.into_error()),
    }
}

/// Description of a function to parse on its own, out of the source of the
/// unit that contains it.
#[derive(Debug, Clone, PartialEq)]
pub struct StandaloneFunction {
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
    /// Line/column of `start`
    pub pos: SourcePos,
}

/// Parses a single function whose parameter list starts at `function.start`.
/// Names it does not declare become free names.
pub fn parse_function(
    source: &str,
    function: &StandaloneFunction,
    options: &CompileOptions,
) -> Result<ParseOutput> {
    let mut atoms = AtomTable::new();
    let name = function.name.as_deref().map(|n| atoms.intern(n));
    let mut parser = Parser::at_offset(
        source,
        function.start,
        function.pos,
        options,
        FullParseHandler::new(),
        atoms,
    );
    let (root, node) = parser
        .parse_standalone_function(name, function.kind, function.syntax, function.strict)
        .map_err(ParseFailure::into_error)?;
    let (handler, binder, atoms) = parser.into_parts();
    Ok(ParseOutput {
        ast: handler.ast,
        binder,
        atoms,
        root,
        body: vec![node],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{AssignmentOperator, BinaryOperator, LogicalOperator, NodeKind};
    use crate::error::ErrorKind;

    fn parse(source: &str) -> ParseOutput {
        parse_script(source, &CompileOptions::default()).unwrap()
    }

    fn parse_err(source: &str) -> CompileError {
        parse_script(source, &CompileOptions::default()).unwrap_err()
    }

    /// The expression of the first statement.
    fn first_expr(out: &ParseOutput) -> NodeId {
        expr_at(out, 0)
    }

    fn expr_at(out: &ParseOutput, index: usize) -> NodeId {
        match out.ast.kind(out.body[index]) {
            NodeKind::Expr(e) => *e,
            other => panic!("expected expression statement, got {other:?}"),
        }
    }

    #[test]
    fn test_precedence() {
        let out = parse("a + b * c;");
        let NodeKind::Binary { operator, right, .. } = out.ast.kind(first_expr(&out)) else {
            panic!("expected binary");
        };
        assert_eq!(*operator, BinaryOperator::Add);
        assert!(matches!(
            out.ast.kind(*right),
            NodeKind::Binary {
                operator: BinaryOperator::Multiply,
                ..
            }
        ));
    }

    #[test]
    fn test_left_and_right_associativity() {
        let out = parse("a - b - c;");
        let NodeKind::Binary { left, .. } = out.ast.kind(first_expr(&out)) else {
            panic!("expected binary");
        };
        assert!(matches!(out.ast.kind(*left), NodeKind::Binary { .. }));

        let out = parse("a ** b ** c;");
        let NodeKind::Binary { left, right, .. } = out.ast.kind(first_expr(&out)) else {
            panic!("expected binary");
        };
        assert!(matches!(out.ast.kind(*left), NodeKind::Name(_)));
        assert!(matches!(out.ast.kind(*right), NodeKind::Binary { .. }));
    }

    #[test]
    fn test_logical_operators() {
        let out = parse("a || b && c;");
        assert!(matches!(
            out.ast.kind(first_expr(&out)),
            NodeKind::Logical {
                operator: LogicalOperator::Or,
                ..
            }
        ));
        assert_eq!(parse_err("a ?? b || c;").kind, ErrorKind::Syntax);
        parse("(a ?? b) || c;");
    }

    #[test]
    fn test_unary_base_of_exponent_is_rejected() {
        assert_eq!(parse_err("-a ** 2;").kind, ErrorKind::Syntax);
        parse("(-a) ** 2;");
    }

    #[test]
    fn test_automatic_semicolons() {
        let out = parse("var a = 1\nvar b = 2\na\n++b");
        assert_eq!(out.body.len(), 4);
        assert!(matches!(out.ast.kind(out.body[3]), NodeKind::Expr(_)));
        assert_eq!(parse_err("var a = 1 var b = 2").kind, ErrorKind::Syntax);
    }

    #[test]
    fn test_return_restricted_production() {
        let out = parse("function f() { return\n1 }");
        let function = out.ast.kind(out.body[0]);
        let NodeKind::Function(function) = function else {
            panic!("expected function");
        };
        assert!(matches!(out.ast.kind(function.body[0]), NodeKind::Return(None)));
    }

    #[test]
    fn test_var_binding_is_frame_local() {
        let out = parse("var x = 1; x + 2;");
        let script = out.binder.funbox(out.root);
        assert_eq!(script.nvars(), 1);
        let NodeKind::Binary { left, .. } = out.ast.kind(expr_at(&out, 1)) else {
            panic!("expected binary");
        };
        let site = out.binder.use_site(out.ast[*left].binding.unwrap());
        assert_eq!(
            site.cookie,
            Some(Cookie {
                skip: 0,
                slot: Slot::Local(0)
            })
        );
    }

    #[test]
    fn test_closure_reference_skips_frames() {
        let out = parse("var x; function f() { return function () { return x; }; }");
        let bindings = out.binder.resolved_bindings(&out.atoms);
        let inner_use = bindings
            .iter()
            .find(|b| b.name == "x" && b.pos.column > 40)
            .expect("use of x");
        assert_eq!(inner_use.kind, "var");
        let x = out.binder.scope(out.binder.funbox(out.root).scope).get(out.atoms.lookup("x").unwrap());
        let def = out.binder.def(x.unwrap());
        assert!(def.closed_over);
        let deepest = out
            .binder
            .uses_of(x.unwrap())
            .filter_map(|u| out.binder.use_site(u).cookie)
            .map(|c| c.skip)
            .max();
        assert_eq!(deepest, Some(2));
    }

    #[test]
    fn test_unresolved_names_become_globals() {
        let out = parse("print(x);");
        let bindings = out.binder.resolved_bindings(&out.atoms);
        assert!(bindings.iter().all(|b| b.kind == "global"));
        assert_eq!(bindings.len(), 2);
    }

    #[test]
    fn test_duplicate_arguments() {
        let out = parse("function f(a, a) { return a; }");
        assert_eq!(out.binder.warnings.len(), 1);
        let err = parse_script("function f(a, a) {}", &CompileOptions::default().with_strict(true)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Semantic);
        assert_eq!(parse_err("function f(a, a = 1) {}").kind, ErrorKind::Semantic);
        assert_eq!(parse_err("var f = (a, a) => a;").kind, ErrorKind::Semantic);
    }

    #[test]
    fn test_duplicate_pattern_and_rest_arguments() {
        assert_eq!(parse_err("function f(a, ...a) {}").kind, ErrorKind::Semantic);
        assert_eq!(parse_err("function f([a], a) {}").kind, ErrorKind::Semantic);
        assert_eq!(parse_err("function f(a, {b: [a]}) {}").kind, ErrorKind::Semantic);
        assert_eq!(parse_err("function f([a, a]) {}").kind, ErrorKind::Semantic);
        assert_eq!(parse_err("function f({a}, ...a) {}").kind, ErrorKind::Semantic);
        assert_eq!(parse_err("var f = ([a], ...a) => a;").kind, ErrorKind::Semantic);

        // Names bound inside nested functions belong to those functions.
        parse("function f([a], b = function ([a]) { var [b] = a; }) { let [c] = a; }");
        parse("function f(a, ...b) { var [a] = b; }");
    }

    #[test]
    fn test_strict_directive_restarts_function() {
        let out = parse("function f() { 'use strict'; return 1; }");
        let NodeKind::Function(function) = out.ast.kind(out.body[0]) else {
            panic!("expected function");
        };
        assert!(out.binder.funbox(function.funbox).strict);
        assert!(!out.binder.funbox(out.root).strict);

        // The octal literal precedes the directive but is still rejected.
        let err = parse_err("function f() { '\\01'; 'use strict'; }");
        assert_eq!(err.kind, ErrorKind::Syntax);

        assert_eq!(parse_err("'use strict'; with (o) {}").kind, ErrorKind::Semantic);
        assert_eq!(parse_err("function f(a = 1) { 'use strict'; }").kind, ErrorKind::Semantic);
    }

    #[test]
    fn test_strict_restart_discards_bindings() {
        let out = parse("'use strict'; var a; a;");
        assert!(out.binder.funbox(out.root).strict);
        let bindings = out.binder.resolved_bindings(&out.atoms);
        assert_eq!(bindings.len(), 2);
        assert!(bindings.iter().all(|b| b.kind == "var"));
    }

    #[test]
    fn test_restarted_function_matches_strict_parse() {
        let source = "function f(a) { 'use strict'; var b = a; { let c = b; } return () => arguments[0] + this; }";
        let restarted = parse(source);
        let clean = parse_script(source, &CompileOptions::default().with_strict(true)).unwrap();

        let funbox = |out: &ParseOutput| {
            let NodeKind::Function(function) = out.ast.kind(out.body[0]) else {
                panic!("expected function");
            };
            out.binder.funbox(function.funbox).clone()
        };
        let (r, c) = (funbox(&restarted), funbox(&clean));
        assert!(r.strict && c.strict);
        assert_eq!(r.nargs(), c.nargs());
        assert_eq!(r.nvars(), c.nvars());
        assert_eq!(r.block_slots, c.block_slots);
        assert_eq!(r.uses_arguments, c.uses_arguments);
        assert_eq!(r.uses_this, c.uses_this);
        assert_eq!(r.dynamic, c.dynamic);
        assert_eq!(r.simple_params, c.simple_params);
        assert_eq!(r.arguments.is_some(), c.arguments.is_some());
        assert_eq!(restarted.binder.funbox_count(), clean.binder.funbox_count());
        assert_eq!(
            restarted.binder.resolved_bindings(&restarted.atoms),
            clean.binder.resolved_bindings(&clean.atoms)
        );
    }

    #[test]
    fn test_strict_rules() {
        let strict = CompileOptions::default().with_strict(true);
        for source in ["delete x;", "eval = 1;", "var arguments;", "var x = 010;", "var let = 1;"] {
            assert!(parse_script(source, &strict).is_err(), "{source}");
            assert!(parse_script(source, &CompileOptions::default()).is_ok(), "{source}");
        }
    }

    #[test]
    fn test_redeclaration() {
        assert_eq!(parse_err("let a; var a;").kind, ErrorKind::Semantic);
        assert_eq!(parse_err("const a = 1; let a;").kind, ErrorKind::Semantic);
        assert_eq!(parse_err("{ let a; var a; }").kind, ErrorKind::Semantic);
        parse("var a; var a;");
        parse("let a; { let a; }");
    }

    #[test]
    fn test_missing_initializers() {
        assert_eq!(parse_err("const a;").kind, ErrorKind::Syntax);
        assert_eq!(parse_err("let [a];").kind, ErrorKind::Syntax);
        parse("for (const k in o) {}");
    }

    #[test]
    fn test_destructuring_assignment_is_rewritten() {
        let out = parse("[a, [b, c]] = pair;");
        let NodeKind::Assign { operator, target, .. } = out.ast.kind(first_expr(&out)) else {
            panic!("expected assignment");
        };
        assert_eq!(*operator, AssignmentOperator::Assign);
        let NodeKind::ArrayPattern { elements, .. } = out.ast.kind(*target) else {
            panic!("expected array pattern");
        };
        assert!(matches!(
            out.ast.kind(elements[1].unwrap()),
            NodeKind::ArrayPattern { .. }
        ));
    }

    #[test]
    fn test_invalid_assignment_targets() {
        assert_eq!(parse_err("1 = 2;").kind, ErrorKind::Semantic);
        assert_eq!(parse_err("[a, 1] = b;").kind, ErrorKind::Semantic);
        assert_eq!(parse_err("({a: f()} = b);").kind, ErrorKind::Semantic);
        assert_eq!(parse_err("a++ = 1;").kind, ErrorKind::Semantic);
        parse("({a: o.b, c: d[0]} = e);");
    }

    #[test]
    fn test_binding_patterns_declare_names() {
        let out = parse("var [a, , {b, c: [d = 1]}] = x;");
        let script = out.binder.funbox(out.root);
        assert_eq!(script.nvars(), 3);
        let out = parse("function f([a, b], {c}) { return a + c; }");
        let NodeKind::Function(function) = out.ast.kind(out.body[0]) else {
            panic!("expected function");
        };
        let funbox = out.binder.funbox(function.funbox);
        assert_eq!(funbox.nargs(), 2);
        assert!(!funbox.simple_params);
    }

    #[test]
    fn test_arrow_functions() {
        let out = parse("var f = (a, b) => a + b; var g = x => { return x; };");
        let kinds: Vec<FunctionKind> = (1..out.binder.funbox_count())
            .map(|i| out.binder.funbox(FunBoxId::from_index(i)).kind)
            .collect();
        assert_eq!(kinds, vec![FunctionKind::Arrow, FunctionKind::Arrow]);
        assert_eq!(out.binder.funbox(FunBoxId::from_index(1)).nargs(), 2);
        assert_eq!(parse_err("var f = (a)\n=> a;").kind, ErrorKind::Syntax);
    }

    #[test]
    fn test_arrow_this_marks_enclosing_function() {
        let out = parse("function f() { return () => this; }");
        assert!(out.binder.funbox(FunBoxId::from_index(1)).uses_this);
        assert!(out.binder.funbox(FunBoxId::from_index(2)).uses_this);
    }

    #[test]
    fn test_arguments_binding() {
        let out = parse("function f() { return arguments.length; }");
        let f = out.binder.funbox(FunBoxId::from_index(1));
        assert!(f.uses_arguments);
        assert!(f.arguments.is_some());
    }

    #[test]
    fn test_named_function_expression_callee() {
        let out = parse("var f = function g() { return g; };");
        let g = out.binder.funbox(FunBoxId::from_index(1));
        let callee = g.callee.expect("callee binding");
        assert_eq!(out.binder.def(callee).kind, DefKind::Callee);
        assert!(out.binder.uses_of(callee).count() >= 1);
    }

    #[test]
    fn test_with_and_eval_clear_cookies() {
        let out = parse("function f(o) { var x; with (o) { x; } }");
        let f = out.binder.funbox(FunBoxId::from_index(1));
        assert!(f.has_with && f.dynamic);
        let x = f.vars[0];
        assert!(out.binder.uses_of(x).all(|u| out.binder.use_site(u).cookie.is_none()));

        let out = parse("function f() { var y; eval('y'); }");
        let f = out.binder.funbox(FunBoxId::from_index(1));
        assert!(f.has_direct_eval);
        assert!(out.binder.funbox(out.root).dynamic);
    }

    #[test]
    fn test_templates_and_regexps() {
        let out = parse("`a${b}c${d}e`;");
        let NodeKind::Template { quasis, exprs } = out.ast.kind(first_expr(&out)) else {
            panic!("expected template");
        };
        assert_eq!((quasis.len(), exprs.len()), (3, 2));

        let out = parse("x = /ab+c/g;");
        let NodeKind::Assign { value, .. } = out.ast.kind(first_expr(&out)) else {
            panic!("expected assignment");
        };
        let NodeKind::RegExp { pattern, flags } = out.ast.kind(*value) else {
            panic!("expected regexp");
        };
        assert_eq!(out.atoms.get(*pattern), "ab+c");
        assert_eq!(out.atoms.get(*flags), "g");
    }

    #[test]
    fn test_control_flow_errors() {
        assert_eq!(parse_err("break;").kind, ErrorKind::Syntax);
        assert_eq!(parse_err("while (1) { continue foo; }").kind, ErrorKind::Syntax);
        assert_eq!(parse_err("foo: { continue foo; }").kind, ErrorKind::Syntax);
        assert_eq!(parse_err("return 1;").kind, ErrorKind::Syntax);
        assert_eq!(parse_err("try {}").kind, ErrorKind::Syntax);
        assert_eq!(parse_err("switch (x) { default: default: }").kind, ErrorKind::Syntax);
        parse("outer: for (;;) { inner: while (1) { continue outer; } }");
        parse("foo: { break foo; }");
    }

    #[test]
    fn test_unsupported_constructs() {
        for source in ["class A {}", "async function f() {}", "f(...a);", "[...a];", "import x from 'y';"] {
            assert_eq!(parse_err(source).kind, ErrorKind::Syntax, "{source}");
        }
    }

    #[test]
    fn test_nesting_limit() {
        let deep = format!("{}1{}", "(".repeat(400), ")".repeat(400));
        assert_eq!(parse_err(&deep).kind, ErrorKind::Limit);
        let shallow = format!("{}1{}", "(".repeat(30), ")".repeat(30));
        parse(&shallow);
    }

    #[test]
    fn test_stack_budget_is_a_limit_error() {
        let options = CompileOptions {
            max_stack_bytes: 4 * 1024,
            ..CompileOptions::default()
        };
        let source = format!("{}1{}", "(".repeat(200), ")".repeat(200));
        let err = parse_script(&source, &options).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Limit);
        assert!(err.message.contains("nesting"));
    }

    #[test]
    fn test_long_operator_chain() {
        let chain = vec!["a"; 5000].join(" + ");
        parse(&format!("{chain};"));
    }

    #[test]
    fn test_syntax_only_check() {
        let (binder, atoms) = check_syntax("var a = 1; function f() { return a; }", &CompileOptions::default())
            .unwrap()
            .expect("syntax-only parse succeeds");
        assert!(binder.resolved_bindings(&atoms).iter().all(|b| b.kind != "global"));
        assert!(check_syntax("with (a) {}", &CompileOptions::default()).unwrap().is_none());
        assert!(check_syntax("[a, b] = c;", &CompileOptions::default()).unwrap().is_none());
        assert!(check_syntax("var = 1;", &CompileOptions::default()).is_err());
    }

    #[test]
    fn test_syntax_and_full_pass_agree_on_bindings() {
        let source = "var a = 1; let b = a; function f(c) { var d = c + b; return function () { return d + e; }; }";
        let (binder, atoms) = check_syntax(source, &CompileOptions::default()).unwrap().unwrap();
        let full = parse(source);
        assert_eq!(
            binder.resolved_bindings(&atoms),
            full.binder.resolved_bindings(&full.atoms)
        );
    }

    #[test]
    fn test_lazy_functions_are_deferred() {
        let options = CompileOptions::default().with_lazy_functions(true);
        let out = parse_script("function f(a) { return a + y; } var y;", &options).unwrap();
        let f = out.binder.funbox(FunBoxId::from_index(1));
        let lazy = f.lazy.as_ref().expect("function deferred");
        assert_eq!(lazy.free_names.len(), 1);
        assert_eq!(out.atoms.get(lazy.free_names[0]), "y");
        assert_eq!(&"function f(a) { return a + y; }"[lazy.start..lazy.end], "(a) { return a + y; }");

        let y = out.atoms.lookup("y").unwrap();
        let y_def = out.binder.scope(out.binder.funbox(out.root).scope).get(y).unwrap();
        assert_eq!(out.binder.def(y_def).kind, DefKind::Var);
        assert!(out.binder.uses_of(y_def).any(|u| out.binder.use_site(u).funbox.index() == 1));
    }

    #[test]
    fn test_lazy_parse_falls_back_to_full() {
        let options = CompileOptions::default().with_lazy_functions(true);
        let out = parse_script("function f(o) { with (o) { x; } }", &options).unwrap();
        let f = out.binder.funbox(FunBoxId::from_index(1));
        assert!(f.lazy.is_none());
        assert!(f.has_with);
    }

    #[test]
    fn test_standalone_function() {
        let source = "var z; function f(a) { return a + b; }";
        let start = source.find("(a)").unwrap();
        let function = StandaloneFunction {
            name: Some("f".to_string()),
            kind: FunctionKind::Normal,
            syntax: FunctionSyntax::Declaration,
            strict: false,
            start,
            pos: SourcePos::new(1, start as u32),
        };
        let out = parse_function(source, &function, &CompileOptions::default()).unwrap();
        let free: Vec<&str> = out.binder.free_names().iter().map(|a| out.atoms.get(*a)).collect();
        assert_eq!(free, vec!["b"]);
        assert_eq!(out.binder.funbox(out.root).nargs(), 1);
        assert!(out.atoms.lookup("z").is_none());
    }
}
