//! Statement parsing.

use crate::ast::{CatchClause, DeclKind, Declarator, Loc, NodeKind, SwitchCase};
use crate::lexer::{SourcePos, Token, TokenKind};

use super::binder::{DefKind, ScopeId, ScopeKind};
use super::funbox::{FunctionKind, FunctionSyntax};
use super::handler::{NodeClass, ParseHandler};
use super::parser::{Parser, StmtKind, identifier_name};
use super::{PResult, ParseAbort, ParseFailure};

/// Result of parsing a `var`/`let`/`const` declaration list.
pub(super) struct Declarations<N> {
    pub(super) node: N,
    pub(super) count: usize,
    pub(super) has_init: bool,
    /// First declarator that needed an initializer and had none
    pub(super) missing_init: Option<(&'static str, SourcePos)>,
}

impl<'a, H: ParseHandler> Parser<'a, H> {
    /// Parses a function or script body up to `end`, handling the directive
    /// prologue.
    pub(super) fn parse_body(&mut self, end: &TokenKind) -> PResult<Vec<H::Node>> {
        let mut body = Vec::new();
        let mut prologue = true;
        while !self.check(end) {
            if self.check(&TokenKind::Eof) {
                return Err(self.unexpected("'}'"));
            }
            if prologue {
                if let TokenKind::String(_) = self.current.kind {
                    let token = self.current.clone();
                    let start = self.start();
                    let expr = self.parse_expression()?;
                    if let NodeClass::String(_) = self.handler.class(expr) {
                        self.directive(&token)?;
                    } else {
                        prologue = false;
                    }
                    self.consume_semicolon()?;
                    let loc = self.finish(start);
                    body.push(self.handler.node(NodeKind::Expr(expr), loc));
                    continue;
                }
                prologue = false;
            }
            body.push(self.parse_statement_list_item()?);
        }
        Ok(body)
    }

    fn directive(&mut self, token: &Token) -> PResult<()> {
        let raw = &self.scanner.source()[token.span.start..token.span.end];
        if raw.len() < 2 || &raw[1..raw.len() - 1] != "use strict" {
            return Ok(());
        }
        let funbox = self.binder.current_funbox();
        if !self.binder.funbox(funbox).simple_params {
            return Err(self.semantic_error(
                "\"use strict\" not allowed in function with non-simple parameters",
                token.pos,
            ));
        }
        if self.strict() {
            return Ok(());
        }
        if H::FULL {
            Err(ParseFailure::Abort(ParseAbort::RestartStrict))
        } else {
            Err(ParseFailure::Abort(ParseAbort::NeedFullParse))
        }
    }

    /// Parses a statement where declarations are allowed.
    pub(super) fn parse_statement_list_item(&mut self) -> PResult<H::Node> {
        if self.check(&TokenKind::Let) && self.let_starts_declaration() {
            return self.parse_declaration_statement(DeclKind::Let);
        }
        match self.current.kind {
            TokenKind::Function => self.parse_function_declaration(),
            TokenKind::Const => self.parse_declaration_statement(DeclKind::Const),
            _ => self.parse_statement(),
        }
    }

    fn let_starts_declaration(&mut self) -> bool {
        let next = self.peek();
        matches!(next.kind, TokenKind::LeftBracket | TokenKind::LeftBrace)
            || identifier_name(&next.kind).is_some()
    }

    /// Parses a statement in a single-statement context.
    pub(super) fn parse_statement(&mut self) -> PResult<H::Node> {
        self.descend()?;
        let result = self.parse_statement_inner();
        self.ascend();
        result
    }

    fn parse_statement_inner(&mut self) -> PResult<H::Node> {
        let pos = self.current.pos;
        if self.at_identifier() && self.peek().kind == TokenKind::Colon {
            return self.parse_labeled_statement();
        }
        if self.check(&TokenKind::Let) && self.peek().kind == TokenKind::LeftBracket {
            return Err(self.error("lexical declaration cannot appear in a single-statement context", pos));
        }
        if self.check(&TokenKind::Async) {
            let next = self.peek();
            if next.kind == TokenKind::Function && !next.newline_before {
                return Err(self.error("async functions are not supported", pos));
            }
        }
        match self.current.kind {
            TokenKind::LeftBrace => self.parse_block_statement(),
            TokenKind::Var => self.parse_declaration_statement(DeclKind::Var),
            TokenKind::Semicolon => {
                let start = self.start();
                self.advance()?;
                Ok(self.handler.node(NodeKind::Empty, start))
            }
            TokenKind::If => self.parse_if_statement(),
            TokenKind::While => self.parse_while_statement(),
            TokenKind::Do => self.parse_do_while_statement(),
            TokenKind::For => self.parse_for_statement(),
            TokenKind::Switch => self.parse_switch_statement(),
            TokenKind::Break => self.parse_break_or_continue(true),
            TokenKind::Continue => self.parse_break_or_continue(false),
            TokenKind::Return => self.parse_return_statement(),
            TokenKind::Throw => self.parse_throw_statement(),
            TokenKind::Try => self.parse_try_statement(),
            TokenKind::With => self.parse_with_statement(),
            TokenKind::Debugger => {
                let start = self.start();
                self.advance()?;
                self.consume_semicolon()?;
                Ok(self.handler.node(NodeKind::Debugger, self.finish(start)))
            }
            TokenKind::Function => Err(self.error(
                "function declarations are not allowed in a single-statement context",
                pos,
            )),
            TokenKind::Const => Err(self.error(
                "lexical declaration cannot appear in a single-statement context",
                pos,
            )),
            TokenKind::Class => Err(self.error("class declarations are not supported", pos)),
            TokenKind::Import | TokenKind::Export => Err(self.error("modules are not supported", pos)),
            _ => self.parse_expression_statement(),
        }
    }

    // ==================== Blocks and declarations ====================

    pub(super) fn parse_block_statement(&mut self) -> PResult<H::Node> {
        let start = self.start();
        self.expect(&TokenKind::LeftBrace, "'{'")?;
        let scope = self.binder.push_scope(ScopeKind::Block);
        let mut body = Vec::new();
        while !self.check(&TokenKind::RightBrace) {
            if self.check(&TokenKind::Eof) {
                return Err(self.unexpected("'}'"));
            }
            body.push(self.parse_statement_list_item()?);
        }
        self.advance()?;
        self.binder.pop_scope(scope);
        let scope = self.block_scope(scope);
        Ok(self.handler.node(NodeKind::Block { body, scope }, self.finish(start)))
    }

    /// A scope worth materializing at run time.
    fn block_scope(&self, scope: ScopeId) -> Option<ScopeId> {
        self.binder.scope(scope).has_lexicals().then_some(scope)
    }

    fn parse_declaration_statement(&mut self, kind: DeclKind) -> PResult<H::Node> {
        let decls = self.parse_declarations(kind)?;
        if let Some((message, pos)) = decls.missing_init {
            return Err(self.error(message, pos));
        }
        self.consume_semicolon()?;
        Ok(decls.node)
    }

    /// Parses `var`/`let`/`const` and its declarator list. Initializer
    /// requirements are reported to the caller, which knows whether this is
    /// a `for-in/of` head.
    pub(super) fn parse_declarations(&mut self, kind: DeclKind) -> PResult<Declarations<H::Node>> {
        let def_kind = match kind {
            DeclKind::Var => DefKind::Var,
            DeclKind::Let => DefKind::Let,
            DeclKind::Const => DefKind::Const,
        };
        let start = self.start();
        self.advance()?;

        let mut declarators = Vec::new();
        let mut has_init = false;
        let mut missing_init = None;
        loop {
            let target_pos = self.current.pos;
            let is_pattern = matches!(self.current.kind, TokenKind::LeftBracket | TokenKind::LeftBrace);
            let target = self.parse_binding_target(def_kind)?;
            let init = if self.eat(&TokenKind::Equal)? {
                has_init = true;
                Some(self.parse_assignment_expression()?)
            } else {
                if missing_init.is_none() {
                    if is_pattern {
                        missing_init = Some(("missing = in destructuring declaration", target_pos));
                    } else if kind == DeclKind::Const {
                        missing_init = Some(("missing = in const declaration", target_pos));
                    }
                }
                None
            };
            declarators.push(Declarator { target, init });
            if !self.eat(&TokenKind::Comma)? {
                break;
            }
        }

        let count = declarators.len();
        let loc = self.finish(start);
        let node = self.handler.node(NodeKind::VarDecl { kind, declarators }, loc);
        Ok(Declarations {
            node,
            count,
            has_init,
            missing_init,
        })
    }

    fn parse_function_declaration(&mut self) -> PResult<H::Node> {
        let start = self.start();
        self.advance()?;
        let kind = if self.eat(&TokenKind::Star)? {
            FunctionKind::Generator
        } else {
            FunctionKind::Normal
        };
        let (name, name_loc) = self.binding_identifier()?;
        let (funbox, node) = self.parse_function(Some(name), kind, FunctionSyntax::Declaration, start)?;

        // Declared after the body so that uses inside it are adopted like
        // any other hoisted reference.
        let def = self.binder.declare(name, DefKind::Function, name_loc.pos, &self.atoms)?;
        let site = self.binder.declaration_use(def, name_loc.pos);
        self.binder.funbox_mut(funbox).name_use = Some(site);
        let scope = self.binder.current_scope();
        self.binder.register_function_decl(scope, funbox);
        Ok(node)
    }

    // ==================== Control flow ====================

    fn parse_paren_condition(&mut self) -> PResult<H::Node> {
        self.expect(&TokenKind::LeftParen, "'('")?;
        let expr = self.allow_in(|p| p.parse_expression())?;
        self.expect(&TokenKind::RightParen, "')'")?;
        Ok(expr)
    }

    fn parse_if_statement(&mut self) -> PResult<H::Node> {
        let start = self.start();
        self.advance()?;
        let test = self.parse_paren_condition()?;
        let consequent = self.parse_statement()?;
        let alternate = if self.eat(&TokenKind::Else)? {
            Some(self.parse_statement()?)
        } else {
            None
        };
        let kind = NodeKind::If {
            test,
            consequent,
            alternate,
        };
        Ok(self.handler.node(kind, self.finish(start)))
    }

    fn parse_loop_body(&mut self) -> PResult<H::Node> {
        self.stmts().push(StmtKind::Loop);
        let body = self.parse_statement();
        self.stmts().pop();
        body
    }

    fn parse_while_statement(&mut self) -> PResult<H::Node> {
        let start = self.start();
        self.advance()?;
        let test = self.parse_paren_condition()?;
        let body = self.parse_loop_body()?;
        Ok(self.handler.node(NodeKind::While { test, body }, self.finish(start)))
    }

    fn parse_do_while_statement(&mut self) -> PResult<H::Node> {
        let start = self.start();
        self.advance()?;
        let body = self.parse_loop_body()?;
        self.expect(&TokenKind::While, "'while'")?;
        let test = self.parse_paren_condition()?;
        // A semicolon is always inserted after `do ... while (...)`.
        self.eat(&TokenKind::Semicolon)?;
        Ok(self.handler.node(NodeKind::DoWhile { body, test }, self.finish(start)))
    }

    fn at_of(&self) -> bool {
        matches!(&self.current.kind, TokenKind::Identifier(name) if name == "of")
    }

    fn with_no_in<T>(&mut self, f: impl FnOnce(&mut Self) -> PResult<T>) -> PResult<T> {
        let saved = std::mem::replace(&mut self.no_in, true);
        let result = f(self);
        self.no_in = saved;
        result
    }

    fn parse_for_statement(&mut self) -> PResult<H::Node> {
        let start = self.start();
        self.advance()?;
        if self.check(&TokenKind::Await) {
            return Err(self.error("for await is not supported", self.current.pos));
        }
        self.expect(&TokenKind::LeftParen, "'('")?;
        let scope = self.binder.push_scope(ScopeKind::For);

        let is_let = self.check(&TokenKind::Let) && self.let_starts_declaration();
        let decl_kind = match self.current.kind {
            TokenKind::Var => Some(DeclKind::Var),
            TokenKind::Const => Some(DeclKind::Const),
            _ if is_let => Some(DeclKind::Let),
            _ => None,
        };

        let init = if self.check(&TokenKind::Semicolon) {
            None
        } else if let Some(kind) = decl_kind {
            let decls = self.with_no_in(|p| p.parse_declarations(kind))?;
            if self.check(&TokenKind::In) || self.at_of() {
                if decls.count != 1 {
                    return Err(self.error("for-in/of loop head declares more than one variable", start.pos));
                }
                if decls.has_init {
                    return Err(self.error(
                        "for-in/of loop variable declaration may not have an initializer",
                        start.pos,
                    ));
                }
                return self.parse_for_in_rest(start, scope, decls.node);
            }
            if let Some((message, pos)) = decls.missing_init {
                return Err(self.error(message, pos));
            }
            Some(decls.node)
        } else {
            let expr_pos = self.current.pos;
            let expr = self.with_no_in(|p| p.parse_expression())?;
            if self.check(&TokenKind::In) || self.at_of() {
                let target = self.for_in_target(expr, expr_pos)?;
                return self.parse_for_in_rest(start, scope, target);
            }
            Some(expr)
        };

        self.expect(&TokenKind::Semicolon, "';'")?;
        let test = if self.check(&TokenKind::Semicolon) {
            None
        } else {
            Some(self.allow_in(|p| p.parse_expression())?)
        };
        self.expect(&TokenKind::Semicolon, "';'")?;
        let update = if self.check(&TokenKind::RightParen) {
            None
        } else {
            Some(self.allow_in(|p| p.parse_expression())?)
        };
        self.expect(&TokenKind::RightParen, "')'")?;
        let body = self.parse_loop_body()?;
        self.binder.pop_scope(scope);

        let kind = NodeKind::For {
            init,
            test,
            update,
            body,
            scope: self.block_scope(scope),
        };
        Ok(self.handler.node(kind, self.finish(start)))
    }

    fn for_in_target(&mut self, expr: H::Node, pos: SourcePos) -> PResult<H::Node> {
        match self.handler.class(expr) {
            NodeClass::Name(atom) => {
                self.check_assignable_name(atom, pos)?;
                Ok(expr)
            }
            NodeClass::Member | NodeClass::Element => Ok(expr),
            NodeClass::Array | NodeClass::Object => {
                let strict = self.strict();
                self.handler.to_assignment_pattern(expr, strict, &self.atoms)
            }
            _ => Err(self.semantic_error("invalid for-in/of left-hand side", pos)),
        }
    }

    fn parse_for_in_rest(
        &mut self,
        start: Loc,
        scope: ScopeId,
        target: H::Node,
    ) -> PResult<H::Node> {
        let of = self.at_of();
        self.advance()?;
        let object = if of {
            self.allow_in(|p| p.parse_assignment_expression())?
        } else {
            self.allow_in(|p| p.parse_expression())?
        };
        self.expect(&TokenKind::RightParen, "')'")?;
        let body = self.parse_loop_body()?;
        self.binder.pop_scope(scope);

        let kind = NodeKind::ForIn {
            target,
            object,
            body,
            of,
            scope: self.block_scope(scope),
        };
        Ok(self.handler.node(kind, self.finish(start)))
    }

    fn parse_switch_statement(&mut self) -> PResult<H::Node> {
        let start = self.start();
        self.advance()?;
        let discriminant = self.parse_paren_condition()?;
        self.expect(&TokenKind::LeftBrace, "'{'")?;
        let scope = self.binder.push_scope(ScopeKind::Switch);
        self.stmts().push(StmtKind::Switch);

        let mut cases = Vec::new();
        let mut seen_default = false;
        while !self.check(&TokenKind::RightBrace) {
            let case_start = self.start();
            let test = match self.current.kind {
                TokenKind::Case => {
                    self.advance()?;
                    Some(self.allow_in(|p| p.parse_expression())?)
                }
                TokenKind::Default => {
                    if seen_default {
                        return Err(self.error("more than one switch default", case_start.pos));
                    }
                    seen_default = true;
                    self.advance()?;
                    None
                }
                _ => return Err(self.unexpected("'case', 'default' or '}'")),
            };
            self.expect(&TokenKind::Colon, "':'")?;
            let mut body = Vec::new();
            while !matches!(
                self.current.kind,
                TokenKind::Case | TokenKind::Default | TokenKind::RightBrace | TokenKind::Eof
            ) {
                body.push(self.parse_statement_list_item()?);
            }
            let loc = self.finish(case_start);
            cases.push(SwitchCase { test, body, loc });
        }
        self.advance()?;
        self.stmts().pop();
        self.binder.pop_scope(scope);

        let kind = NodeKind::Switch {
            discriminant,
            cases,
            scope: self.block_scope(scope),
        };
        Ok(self.handler.node(kind, self.finish(start)))
    }

    fn parse_break_or_continue(&mut self, is_break: bool) -> PResult<H::Node> {
        let start = self.start();
        self.advance()?;
        let label = if self.at_identifier() && !self.current.newline_before {
            Some(self.identifier()?)
        } else {
            None
        };

        let stmts = self.stmts().clone();
        match label {
            Some((name, loc)) => {
                let target = stmts.iter().rev().find_map(|s| match s {
                    StmtKind::Label { name: n, is_loop } if *n == name => Some(*is_loop),
                    _ => None,
                });
                match target {
                    None => {
                        return Err(self.error(format!("label not found: {}", self.atoms.get(name)), loc.pos));
                    }
                    Some(false) if !is_break => {
                        return Err(self.error(
                            format!("label {} does not denote a loop", self.atoms.get(name)),
                            loc.pos,
                        ));
                    }
                    Some(_) => {}
                }
            }
            None => {
                let ok = stmts.iter().any(|s| match s {
                    StmtKind::Loop => true,
                    StmtKind::Switch => is_break,
                    StmtKind::Label { .. } => false,
                });
                if !ok {
                    let message = if is_break {
                        "break must be inside loop or switch"
                    } else {
                        "continue must be inside loop"
                    };
                    return Err(self.error(message, start.pos));
                }
            }
        }
        self.consume_semicolon()?;

        let label = label.map(|(name, _)| name);
        let kind = if is_break {
            NodeKind::Break(label)
        } else {
            NodeKind::Continue(label)
        };
        Ok(self.handler.node(kind, self.finish(start)))
    }

    fn parse_return_statement(&mut self) -> PResult<H::Node> {
        let start = self.start();
        if self.function_kind() == FunctionKind::Script {
            return Err(self.error("return not in function", start.pos));
        }
        self.advance()?;
        let value = if matches!(
            self.current.kind,
            TokenKind::Semicolon | TokenKind::RightBrace | TokenKind::Eof
        ) || self.current.newline_before
        {
            None
        } else {
            Some(self.parse_expression()?)
        };
        self.consume_semicolon()?;
        Ok(self.handler.node(NodeKind::Return(value), self.finish(start)))
    }

    fn parse_throw_statement(&mut self) -> PResult<H::Node> {
        let start = self.start();
        self.advance()?;
        if self.current.newline_before {
            return Err(self.error(
                "no line break is allowed between 'throw' and its expression",
                self.current.pos,
            ));
        }
        let value = self.parse_expression()?;
        self.consume_semicolon()?;
        Ok(self.handler.node(NodeKind::Throw(value), self.finish(start)))
    }

    fn parse_try_statement(&mut self) -> PResult<H::Node> {
        let start = self.start();
        self.advance()?;
        let block = self.parse_block_statement()?;

        let handler = if self.eat(&TokenKind::Catch)? {
            let scope = self.binder.push_scope(ScopeKind::Catch);
            let param = if self.eat(&TokenKind::LeftParen)? {
                let target = self.parse_binding_target(DefKind::Catch)?;
                self.expect(&TokenKind::RightParen, "')'")?;
                Some(target)
            } else {
                None
            };
            let body = self.parse_block_statement()?;
            self.binder.pop_scope(scope);
            Some(CatchClause { param, body, scope })
        } else {
            None
        };

        let finalizer = if self.eat(&TokenKind::Finally)? {
            Some(self.parse_block_statement()?)
        } else {
            None
        };

        if handler.is_none() && finalizer.is_none() {
            return Err(self.error("missing catch or finally after try", self.current.pos));
        }
        let kind = NodeKind::Try {
            block,
            handler,
            finalizer,
        };
        Ok(self.handler.node(kind, self.finish(start)))
    }

    fn parse_with_statement(&mut self) -> PResult<H::Node> {
        let start = self.start();
        if self.strict() {
            return Err(self.semantic_error("strict mode code may not contain 'with' statements", start.pos));
        }
        self.handler.require_full_parse()?;
        self.advance()?;
        let object = self.parse_paren_condition()?;
        self.binder.note_dynamic_scope(true);
        let scope = self.binder.push_scope(ScopeKind::With);
        let body = self.parse_statement()?;
        self.binder.pop_scope(scope);
        Ok(self.handler.node(NodeKind::With { object, body }, self.finish(start)))
    }

    fn parse_labeled_statement(&mut self) -> PResult<H::Node> {
        let start = self.start();
        let (name, loc) = self.identifier()?;
        self.advance()?; // ':'
        let duplicate = self
            .stmts()
            .iter()
            .any(|s| matches!(s, StmtKind::Label { name: n, .. } if *n == name));
        if duplicate {
            return Err(self.error(format!("duplicate label {}", self.atoms.get(name)), loc.pos));
        }
        let is_loop = self.labels_loop();
        self.stmts().push(StmtKind::Label { name, is_loop });
        let body = self.parse_statement();
        self.stmts().pop();
        let body = body?;
        Ok(self.handler.node(NodeKind::Labeled { label: name, body }, self.finish(start)))
    }

    /// True if the labeled statement starting at the current token is a
    /// loop, looking through further labels.
    fn labels_loop(&mut self) -> bool {
        let state = self.scanner.checkpoint();
        let mut token = self.current.clone();
        while identifier_name(&token.kind).is_some() {
            if self.scanner.next_token().kind != TokenKind::Colon {
                break;
            }
            token = self.scanner.next_token();
        }
        self.scanner.rewind(state);
        matches!(token.kind, TokenKind::For | TokenKind::While | TokenKind::Do)
    }

    fn parse_expression_statement(&mut self) -> PResult<H::Node> {
        let start = self.start();
        let expr = self.parse_expression()?;
        self.consume_semicolon()?;
        Ok(self.handler.node(NodeKind::Expr(expr), self.finish(start)))
    }
}
