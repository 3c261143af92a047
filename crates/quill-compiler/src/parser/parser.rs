//! Parser state, token handling and function entry points.

use crate::ast::{FunctionNode, Loc, NodeKind};
use crate::atoms::{Atom, AtomTable};
use crate::error::CompileError;
use crate::lexer::{Scanner, ScannerState, SourcePos, Span, Token, TokenKind};
use crate::options::CompileOptions;
use crate::stack::StackBase;

use super::binder::{Binder, BinderMark, DefKind, FunBoxId};
use super::funbox::{FunctionKind, FunctionSyntax, LazyInfo};
use super::handler::{ParseHandler, SyntaxParseHandler};
use super::{PResult, ParseAbort, ParseFailure};

const STRICT_RESERVED: &[&str] = &["implements", "interface", "package", "private", "protected", "public"];

/// Statement kinds that `break` and `continue` can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum StmtKind {
    Loop,
    Switch,
    Label { name: Atom, is_loop: bool },
}

/// Per-function parse state.
#[derive(Debug)]
pub(super) struct FunctionState {
    pub(super) kind: FunctionKind,
    pub(super) stmts: Vec<StmtKind>,
    /// Names bound by the parameter pattern being parsed
    pub(super) pattern_params: Option<Vec<(Atom, SourcePos)>>,
}

impl FunctionState {
    fn new(kind: FunctionKind) -> Self {
        Self {
            kind,
            stmts: Vec::new(),
            pattern_params: None,
        }
    }
}

/// Everything needed to rewind the parse to an earlier token.
#[derive(Debug, Clone)]
pub(super) struct Checkpoint {
    scanner: ScannerState,
    current: Token,
    prev_end: usize,
    handler: usize,
    binder: BinderMark,
    functions: usize,
    depth: u32,
    no_in: bool,
}

/// Recursive-descent parser, generic over what it builds.
pub struct Parser<'a, H: ParseHandler> {
    pub(super) scanner: Scanner<'a>,
    pub(super) current: Token,
    /// End offset of the last consumed token
    pub(super) prev_end: usize,
    pub(super) handler: H,
    pub(super) binder: Binder,
    pub(super) atoms: AtomTable,
    pub(super) options: &'a CompileOptions,
    pub(super) depth: u32,
    stack_base: StackBase,
    /// Inside a `for` head, where `in` ends an expression
    pub(super) no_in: bool,
    pub(super) functions: Vec<FunctionState>,
}

impl<'a, H: ParseHandler> Parser<'a, H> {
    /// Creates a parser over a whole script.
    pub fn new(source: &'a str, options: &'a CompileOptions, handler: H, atoms: AtomTable) -> Self {
        let pos = SourcePos::new(options.first_line, 0);
        Self::at_offset(source, 0, pos, options, handler, atoms)
    }

    /// Creates a parser that starts at byte `offset`, which is at `pos`.
    pub fn at_offset(
        source: &'a str,
        offset: usize,
        pos: SourcePos,
        options: &'a CompileOptions,
        handler: H,
        atoms: AtomTable,
    ) -> Self {
        let mut scanner = Scanner::starting_at(source, offset, pos);
        let current = scanner.next_token();
        Self {
            scanner,
            current,
            prev_end: offset,
            handler,
            binder: Binder::new(),
            atoms,
            options,
            depth: 0,
            stack_base: StackBase::here(),
            no_in: false,
            functions: Vec::new(),
        }
    }

    /// Takes the parser apart once parsing is done.
    pub fn into_parts(self) -> (H, Binder, AtomTable) {
        (self.handler, self.binder, self.atoms)
    }

    // ==================== Entry points ====================

    /// Parses a whole script, restarting in strict mode if a directive asks
    /// for it.
    pub fn parse_script(&mut self) -> PResult<(FunBoxId, Vec<H::Node>)> {
        self.check_first_token()?;
        let checkpoint = self.checkpoint();
        let mut strict = self.options.strict;
        loop {
            match self.parse_script_body(strict) {
                Err(ParseFailure::Abort(ParseAbort::RestartStrict)) if !strict => {
                    tracing::trace!("restarting script in strict mode");
                    self.restore(&checkpoint);
                    strict = true;
                }
                result => return result,
            }
        }
    }

    fn parse_script_body(&mut self, strict: bool) -> PResult<(FunBoxId, Vec<H::Node>)> {
        let start = self.start();
        let root = self.binder.begin_function(
            None,
            FunctionKind::Script,
            FunctionSyntax::Script,
            strict,
            start,
        )?;
        self.functions.push(FunctionState::new(FunctionKind::Script));
        let body = self.parse_body(&TokenKind::Eof)?;
        let loc = self.finish(start);
        self.binder.funbox_mut(root).loc = loc;
        self.binder.end_function()?;
        self.functions.pop();
        self.binder.finish_unit(DefKind::Global);
        tracing::debug!(
            functions = self.binder.funbox_count(),
            uses = self.binder.use_count(),
            "parsed script"
        );
        Ok((root, body))
    }

    /// Parses one function starting at its parameter list, as the root of
    /// its own unit. Names it does not declare become free names.
    pub fn parse_standalone_function(
        &mut self,
        name: Option<Atom>,
        kind: FunctionKind,
        syntax: FunctionSyntax,
        strict: bool,
    ) -> PResult<(FunBoxId, H::Node)> {
        self.check_first_token()?;
        let start = self.start();
        let parsed = self.parse_function_with_restart(name, kind, syntax, strict, start)?;
        self.binder.finish_unit(DefKind::Free);
        Ok(parsed)
    }

    // ==================== Functions ====================

    /// Parses a nested function whose parameter list (or single arrow
    /// parameter) is the current token. `start` is where the function's
    /// source begins.
    pub(super) fn parse_function(
        &mut self,
        name: Option<Atom>,
        kind: FunctionKind,
        syntax: FunctionSyntax,
        start: Loc,
    ) -> PResult<(FunBoxId, H::Node)> {
        let strict = self.strict();
        if H::FULL
            && self.options.lazy_functions
            && let Some(parsed) = self.try_lazy_function(name, kind, syntax, strict, start)?
        {
            return Ok(parsed);
        }
        self.parse_function_with_restart(name, kind, syntax, strict, start)
    }

    fn parse_function_with_restart(
        &mut self,
        name: Option<Atom>,
        kind: FunctionKind,
        syntax: FunctionSyntax,
        strict: bool,
        start: Loc,
    ) -> PResult<(FunBoxId, H::Node)> {
        let checkpoint = self.checkpoint();
        let mut strict = strict;
        loop {
            match self.parse_function_contents(name, kind, syntax, strict, start) {
                Err(ParseFailure::Abort(ParseAbort::RestartStrict)) if !strict => {
                    tracing::trace!(pos = %start.pos, "restarting function in strict mode");
                    self.restore(&checkpoint);
                    strict = true;
                }
                result => return result,
            }
        }
    }

    fn parse_function_contents(
        &mut self,
        name: Option<Atom>,
        kind: FunctionKind,
        syntax: FunctionSyntax,
        strict: bool,
        start: Loc,
    ) -> PResult<(FunBoxId, H::Node)> {
        let funbox = self.binder.begin_function(name, kind, syntax, strict, start)?;
        self.functions.push(FunctionState::new(kind));
        let saved_no_in = std::mem::replace(&mut self.no_in, false);

        let (params, rest) = if syntax == FunctionSyntax::Arrow && !self.check(&TokenKind::LeftParen) {
            let (atom, loc) = self.binding_identifier()?;
            let def = self.binder.declare(atom, DefKind::Arg, loc.pos, &self.atoms)?;
            let site = self.binder.declaration_use(def, loc.pos);
            (vec![self.handler.name(atom, site, loc)], None)
        } else {
            self.parse_formal_parameters()?
        };

        let body = if syntax == FunctionSyntax::Arrow {
            if self.current.newline_before {
                return Err(self.error("no line break is allowed before '=>'", self.current.pos));
            }
            self.expect(&TokenKind::Arrow, "'=>'")?;
            if self.check(&TokenKind::LeftBrace) {
                self.parse_function_body()?
            } else {
                let value_start = self.start();
                let value = self.parse_assignment_expression()?;
                let loc = self.finish(value_start);
                vec![self.handler.node(NodeKind::Return(Some(value)), loc)]
            }
        } else {
            self.parse_function_body()?
        };

        self.no_in = saved_no_in;
        self.binder.end_function()?;
        self.functions.pop();

        let loc = self.finish(start);
        self.binder.funbox_mut(funbox).loc = loc;
        let function = FunctionNode {
            funbox,
            params,
            rest,
            body,
        };
        let node = self.handler.node(NodeKind::Function(Box::new(function)), loc);
        Ok((funbox, node))
    }

    fn parse_function_body(&mut self) -> PResult<Vec<H::Node>> {
        self.expect(&TokenKind::LeftBrace, "'{'")?;
        let body = self.parse_body(&TokenKind::RightBrace)?;
        self.expect(&TokenKind::RightBrace, "'}'")?;
        Ok(body)
    }

    fn parse_formal_parameters(&mut self) -> PResult<(Vec<H::Node>, Option<H::Node>)> {
        self.expect(&TokenKind::LeftParen, "'('")?;
        let mut params = Vec::new();
        let mut rest = None;
        let mut names: Vec<(Atom, SourcePos)> = Vec::new();

        while !self.check(&TokenKind::RightParen) {
            if self.eat(&TokenKind::Ellipsis)? {
                self.mark_non_simple_params();
                let (atom, loc) = self.binding_identifier()?;
                names.push((atom, loc.pos));
                let def = self.binder.declare(atom, DefKind::Var, loc.pos, &self.atoms)?;
                let funbox = self.binder.current_funbox();
                self.binder.funbox_mut(funbox).rest = Some(def);
                let site = self.binder.declaration_use(def, loc.pos);
                rest = Some(self.handler.name(atom, site, loc));
                if !self.check(&TokenKind::RightParen) {
                    return Err(self.error("parameter after rest parameter", self.current.pos));
                }
                break;
            }

            let start = self.start();
            let target = if matches!(self.current.kind, TokenKind::LeftBracket | TokenKind::LeftBrace) {
                self.mark_non_simple_params();
                self.binder.declare_anonymous_arg(start.pos)?;
                self.function_state().pattern_params = Some(Vec::new());
                let pattern = self.parse_binding_pattern(DefKind::Var);
                let bound = self.function_state().pattern_params.take().unwrap_or_default();
                names.extend(bound);
                pattern?
            } else {
                let (atom, loc) = self.binding_identifier()?;
                names.push((atom, loc.pos));
                let def = self.binder.declare(atom, DefKind::Arg, loc.pos, &self.atoms)?;
                let site = self.binder.declaration_use(def, loc.pos);
                self.handler.name(atom, site, loc)
            };

            let param = if self.eat(&TokenKind::Equal)? {
                self.mark_non_simple_params();
                let default = self.parse_assignment_expression()?;
                let loc = self.finish(start);
                self.handler.node(NodeKind::WithDefault { target, default }, loc)
            } else {
                target
            };
            params.push(param);

            if !self.eat(&TokenKind::Comma)? {
                break;
            }
        }
        self.expect(&TokenKind::RightParen, "')'")?;

        // Duplicates seen before the first non-simple parameter were only
        // warned about. `names` also holds pattern and rest bindings.
        let funbox = self.binder.current_funbox();
        if !self.binder.funbox(funbox).simple_params {
            for (i, (name, pos)) in names.iter().enumerate() {
                if names[..i].iter().any(|(other, _)| other == name) {
                    let message = format!(
                        "duplicate argument {} not allowed in this context",
                        self.atoms.get(*name)
                    );
                    return Err(CompileError::semantic(message, *pos).into());
                }
            }
        }
        Ok((params, rest))
    }

    fn mark_non_simple_params(&mut self) {
        let funbox = self.binder.current_funbox();
        self.binder.funbox_mut(funbox).simple_params = false;
    }

    /// Runs a syntax-only parse of the function. On success the body is
    /// skipped and the function is recorded as lazy; `None` means the full
    /// parse must run instead.
    fn try_lazy_function(
        &mut self,
        name: Option<Atom>,
        kind: FunctionKind,
        syntax: FunctionSyntax,
        strict: bool,
        start: Loc,
    ) -> PResult<Option<(FunBoxId, H::Node)>> {
        let params_start = self.current.span.start;
        let params_pos = self.current.pos;

        let atoms = std::mem::take(&mut self.atoms);
        let mut sub = Parser::at_offset(
            self.scanner.source(),
            params_start,
            params_pos,
            self.options,
            SyntaxParseHandler,
            atoms,
        );
        sub.depth = self.depth;
        sub.stack_base = self.stack_base;
        let outcome = sub.parse_standalone_function(name, kind, syntax, strict);
        self.atoms = std::mem::take(&mut sub.atoms);

        let root = match outcome {
            Ok((root, _)) => root,
            Err(failure) => {
                tracing::trace!(?failure, pos = %params_pos, "syntax-only parse gave up");
                return Ok(None);
            }
        };

        let summary = sub.binder.funbox(root).clone();
        let free_names = sub.binder.free_names();
        let warnings = std::mem::take(&mut sub.binder.warnings);
        self.scanner.rewind(sub.scanner.checkpoint());
        self.current = sub.current.clone();
        self.prev_end = sub.prev_end;

        // Replay the function's outward-facing effects on our binder.
        let funbox = self.binder.begin_function(name, kind, syntax, summary.strict, start)?;
        for &free in &free_names {
            self.binder.reference(free, params_pos)?;
        }
        if summary.has_with {
            self.binder.note_dynamic_scope(true);
        }
        if summary.has_direct_eval {
            self.binder.note_dynamic_scope(false);
        }
        if summary.uses_this {
            self.binder.note_this();
        }
        self.binder.end_function()?;
        self.binder.warnings.extend(warnings);

        let loc = self.finish(start);
        let fb = self.binder.funbox_mut(funbox);
        fb.loc = loc;
        fb.uses_arguments = summary.uses_arguments;
        fb.simple_params = summary.simple_params;
        fb.lazy = Some(LazyInfo {
            start: params_start,
            end: self.prev_end,
            pos: params_pos,
            free_names,
        });
        tracing::trace!(funbox = funbox.index(), "function deferred");

        let function = FunctionNode {
            funbox,
            params: Vec::new(),
            rest: None,
            body: Vec::new(),
        };
        let node = self.handler.node(NodeKind::Function(Box::new(function)), loc);
        Ok(Some((funbox, node)))
    }

    // ==================== Restart support ====================

    pub(super) fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            scanner: self.scanner.checkpoint(),
            current: self.current.clone(),
            prev_end: self.prev_end,
            handler: self.handler.mark(),
            binder: self.binder.mark(),
            functions: self.functions.len(),
            depth: self.depth,
            no_in: self.no_in,
        }
    }

    pub(super) fn restore(&mut self, checkpoint: &Checkpoint) {
        self.scanner.rewind(checkpoint.scanner);
        self.current = checkpoint.current.clone();
        self.prev_end = checkpoint.prev_end;
        self.handler.reset(checkpoint.handler);
        self.binder.truncate(&checkpoint.binder);
        self.functions.truncate(checkpoint.functions);
        self.depth = checkpoint.depth;
        self.no_in = checkpoint.no_in;
    }

    // ==================== Tokens ====================

    fn check_first_token(&self) -> PResult<()> {
        match self.current.kind {
            TokenKind::Invalid(reason) => Err(self.error(reason, self.current.pos)),
            _ => Ok(()),
        }
    }

    /// Moves to the next token, returning the one just consumed.
    pub(super) fn advance(&mut self) -> PResult<Token> {
        let next = self.scanner.next_token();
        if let TokenKind::Invalid(reason) = next.kind {
            return Err(self.error(reason, next.pos));
        }
        self.prev_end = self.current.span.end;
        Ok(std::mem::replace(&mut self.current, next))
    }

    /// Replaces the current token with a rescanned one.
    pub(super) fn replace_current(&mut self, token: Token) -> PResult<()> {
        if let TokenKind::Invalid(reason) = token.kind {
            return Err(self.error(reason, token.pos));
        }
        let newline_before = self.current.newline_before;
        self.current = token;
        self.current.newline_before = newline_before;
        Ok(())
    }

    /// Returns the token after the current one without consuming anything.
    pub(super) fn peek(&mut self) -> Token {
        let state = self.scanner.checkpoint();
        let token = self.scanner.next_token();
        self.scanner.rewind(state);
        token
    }

    pub(super) fn check(&self, kind: &TokenKind) -> bool {
        std::mem::discriminant(&self.current.kind) == std::mem::discriminant(kind)
    }

    pub(super) fn eat(&mut self, kind: &TokenKind) -> PResult<bool> {
        if self.check(kind) {
            self.advance()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    pub(super) fn expect(&mut self, kind: &TokenKind, what: &str) -> PResult<Token> {
        if self.check(kind) {
            self.advance()
        } else {
            Err(self.unexpected(what))
        }
    }

    /// Automatic semicolon insertion.
    pub(super) fn consume_semicolon(&mut self) -> PResult<()> {
        match self.current.kind {
            TokenKind::Semicolon => {
                self.advance()?;
                Ok(())
            }
            TokenKind::RightBrace | TokenKind::Eof => Ok(()),
            _ if self.current.newline_before => Ok(()),
            _ => Err(self.unexpected("';'")),
        }
    }

    pub(super) fn unexpected(&self, expected: &str) -> ParseFailure {
        let found = describe(&self.current.kind);
        self.error(format!("expected {expected}, found {found}"), self.current.pos)
    }

    pub(super) fn error(&self, message: impl Into<String>, pos: SourcePos) -> ParseFailure {
        CompileError::syntax(message, pos).into()
    }

    pub(super) fn semantic_error(&self, message: impl Into<String>, pos: SourcePos) -> ParseFailure {
        CompileError::semantic(message, pos).into()
    }

    // ==================== Locations ====================

    /// Location of the current token.
    pub(super) fn start(&self) -> Loc {
        Loc::new(self.current.span, self.current.pos)
    }

    /// Location from `start` to the end of the last consumed token.
    pub(super) fn finish(&self, start: Loc) -> Loc {
        let end = self.prev_end.max(start.span.start);
        Loc::new(Span::new(start.span.start, end), start.pos)
    }

    // ==================== Context ====================

    pub(super) fn strict(&self) -> bool {
        self.binder.funbox(self.binder.current_funbox()).strict
    }

    pub(super) fn function_kind(&self) -> FunctionKind {
        self.functions.last().map_or(FunctionKind::Script, |f| f.kind)
    }

    pub(super) fn stmts(&mut self) -> &mut Vec<StmtKind> {
        &mut self
            .functions
            .last_mut()
            .expect("statement parsed outside any function")
            .stmts
    }

    pub(super) fn function_state(&mut self) -> &mut FunctionState {
        self.functions
            .last_mut()
            .expect("parameters parsed outside any function")
    }

    /// Bumps the nesting depth, failing past the configured ceiling.
    pub(super) fn descend(&mut self) -> PResult<()> {
        self.depth += 1;
        if self.depth > self.options.max_nesting_depth || self.stack_base.exhausted(self.options.max_stack_bytes) {
            return Err(CompileError::limit("source nesting too deep", self.current.pos).into());
        }
        Ok(())
    }

    pub(super) fn ascend(&mut self) {
        self.depth -= 1;
    }

    /// Runs `f` with `in` allowed as an operator again.
    pub(super) fn allow_in<T>(&mut self, f: impl FnOnce(&mut Self) -> PResult<T>) -> PResult<T> {
        let saved = std::mem::replace(&mut self.no_in, false);
        let result = f(self);
        self.no_in = saved;
        result
    }

    // ==================== Identifiers ====================

    /// True if the current token can start an identifier reference.
    pub(super) fn at_identifier(&self) -> bool {
        match self.current.kind {
            TokenKind::Yield => !self.strict() && self.function_kind() != FunctionKind::Generator,
            _ => identifier_name(&self.current.kind).is_some(),
        }
    }

    /// Rejects identifier tokens that are reserved in the current context.
    pub(super) fn check_identifier_token(&self, token: &Token) -> PResult<()> {
        let Some(name) = identifier_name(&token.kind) else {
            return Err(self.error(format!("expected identifier, found {}", describe(&token.kind)), token.pos));
        };
        let strict = self.strict();
        if matches!(token.kind, TokenKind::Yield) && (strict || self.function_kind() == FunctionKind::Generator) {
            return Err(self.error("yield is a reserved identifier", token.pos));
        }
        if strict && (matches!(token.kind, TokenKind::Let | TokenKind::Static) || STRICT_RESERVED.contains(&name)) {
            return Err(self.error(format!("{name} is a reserved identifier in strict mode"), token.pos));
        }
        Ok(())
    }

    /// Consumes an identifier, enforcing reserved-word rules.
    pub(super) fn identifier(&mut self) -> PResult<(Atom, Loc)> {
        self.check_identifier_token(&self.current)?;
        let atom = match identifier_name(&self.current.kind) {
            Some(name) => self.atoms.intern(name),
            None => return Err(self.unexpected("identifier")),
        };
        let loc = self.start();
        self.advance()?;
        Ok((atom, loc))
    }

    /// Consumes an identifier that is about to be bound.
    pub(super) fn binding_identifier(&mut self) -> PResult<(Atom, Loc)> {
        let (atom, loc) = self.identifier()?;
        if self.strict() && (atom == Atom::EVAL || atom == Atom::ARGUMENTS) {
            return Err(self.semantic_error(
                format!("{} cannot be bound in strict mode", self.atoms.get(atom)),
                loc.pos,
            ));
        }
        Ok((atom, loc))
    }
}

/// Identifier text of a token that can name a binding in some context.
pub(super) fn identifier_name(kind: &TokenKind) -> Option<&str> {
    match kind {
        TokenKind::Identifier(name) => Some(name),
        TokenKind::Let | TokenKind::Static | TokenKind::Yield | TokenKind::Async | TokenKind::Await => {
            kind.keyword_text()
        }
        _ => None,
    }
}

/// Text of a token usable as a property name after `.` or in an object
/// literal: any identifier or reserved word.
pub(super) fn property_name(kind: &TokenKind) -> Option<&str> {
    match kind {
        TokenKind::Identifier(name) => Some(name),
        _ => kind.keyword_text(),
    }
}

/// Human-readable token description for error messages.
pub(super) fn describe(kind: &TokenKind) -> String {
    match kind {
        TokenKind::Eof => "end of input".to_string(),
        TokenKind::Identifier(name) => format!("identifier '{name}'"),
        TokenKind::Number(_) | TokenKind::BigInt(_) => "number".to_string(),
        TokenKind::String(_) => "string".to_string(),
        TokenKind::NoSubstitutionTemplate(_) | TokenKind::TemplateHead(_) => "template".to_string(),
        TokenKind::LeftBrace => "'{'".to_string(),
        TokenKind::RightBrace => "'}'".to_string(),
        TokenKind::LeftParen => "'('".to_string(),
        TokenKind::RightParen => "')'".to_string(),
        TokenKind::LeftBracket => "'['".to_string(),
        TokenKind::RightBracket => "']'".to_string(),
        TokenKind::Semicolon => "';'".to_string(),
        TokenKind::Comma => "','".to_string(),
        TokenKind::Colon => "':'".to_string(),
        TokenKind::Dot => "'.'".to_string(),
        TokenKind::Equal => "'='".to_string(),
        TokenKind::Arrow => "'=>'".to_string(),
        _ => match kind.keyword_text() {
            Some(text) => format!("'{text}'"),
            None => format!("{kind:?}"),
        },
    }
}
