//! Expression parsing.
//!
//! Binary operators use precedence climbing over explicit operand and
//! operator stacks, so long chains like `a + b + c + ...` don't consume
//! native stack. Everything else is recursive descent guarded by the
//! nesting-depth limit.

use num_bigint::BigInt;

use crate::ast::{
    AssignmentOperator, BinaryOperator, Loc, LogicalOperator, NodeKind, Property, PropertyKey,
    UnaryOperator, UpdateOperator,
};
use crate::atoms::Atom;
use crate::lexer::{SourcePos, TokenKind};

use super::funbox::{FunctionKind, FunctionSyntax};
use super::handler::{NodeClass, ParseHandler};
use super::parser::{Parser, identifier_name, property_name};
use super::PResult;

/// Precedence of `**`, the only right-associative binary operator.
const EXPONENT_PRECEDENCE: u8 = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Infix {
    Binary(BinaryOperator),
    Logical(LogicalOperator),
}

/// An entry on the operand stack of [`Parser::parse_binary_expression`].
struct Operand<N> {
    node: N,
    loc: Loc,
    /// Starts with a prefix operator, so it can't be the base of `**`
    unary: bool,
    /// Unparenthesized short-circuit expression, for the `??` mixing rule
    logical: Option<LogicalOperator>,
}

/// Binary operator and precedence of a token. `in` is not an operator inside
/// a `for` head.
fn infix_operator(kind: &TokenKind, no_in: bool) -> Option<(Infix, u8)> {
    use BinaryOperator as B;
    let op = match kind {
        TokenKind::QuestionQuestion => (Infix::Logical(LogicalOperator::NullishCoalescing), 1),
        TokenKind::PipePipe => (Infix::Logical(LogicalOperator::Or), 2),
        TokenKind::AmpersandAmpersand => (Infix::Logical(LogicalOperator::And), 3),
        TokenKind::Pipe => (Infix::Binary(B::BitwiseOr), 4),
        TokenKind::Caret => (Infix::Binary(B::BitwiseXor), 5),
        TokenKind::Ampersand => (Infix::Binary(B::BitwiseAnd), 6),
        TokenKind::EqualEqual => (Infix::Binary(B::Equal), 7),
        TokenKind::NotEqual => (Infix::Binary(B::NotEqual), 7),
        TokenKind::StrictEqual => (Infix::Binary(B::StrictEqual), 7),
        TokenKind::StrictNotEqual => (Infix::Binary(B::StrictNotEqual), 7),
        TokenKind::LessThan => (Infix::Binary(B::LessThan), 8),
        TokenKind::GreaterThan => (Infix::Binary(B::GreaterThan), 8),
        TokenKind::LessThanEqual => (Infix::Binary(B::LessThanEqual), 8),
        TokenKind::GreaterThanEqual => (Infix::Binary(B::GreaterThanEqual), 8),
        TokenKind::Instanceof => (Infix::Binary(B::InstanceOf), 8),
        TokenKind::In if !no_in => (Infix::Binary(B::In), 8),
        TokenKind::LeftShift => (Infix::Binary(B::LeftShift), 9),
        TokenKind::RightShift => (Infix::Binary(B::RightShift), 9),
        TokenKind::UnsignedRightShift => (Infix::Binary(B::UnsignedRightShift), 9),
        TokenKind::Plus => (Infix::Binary(B::Add), 10),
        TokenKind::Minus => (Infix::Binary(B::Subtract), 10),
        TokenKind::Star => (Infix::Binary(B::Multiply), 11),
        TokenKind::Slash => (Infix::Binary(B::Divide), 11),
        TokenKind::Percent => (Infix::Binary(B::Modulo), 11),
        TokenKind::StarStar => (Infix::Binary(B::Exponent), EXPONENT_PRECEDENCE),
        _ => return None,
    };
    Some(op)
}

fn assignment_operator(kind: &TokenKind) -> Option<AssignmentOperator> {
    use BinaryOperator as B;
    let compound = match kind {
        TokenKind::Equal => return Some(AssignmentOperator::Assign),
        TokenKind::PlusEqual => B::Add,
        TokenKind::MinusEqual => B::Subtract,
        TokenKind::StarEqual => B::Multiply,
        TokenKind::SlashEqual => B::Divide,
        TokenKind::PercentEqual => B::Modulo,
        TokenKind::StarStarEqual => B::Exponent,
        TokenKind::LeftShiftEqual => B::LeftShift,
        TokenKind::RightShiftEqual => B::RightShift,
        TokenKind::UnsignedRightShiftEqual => B::UnsignedRightShift,
        TokenKind::AmpersandEqual => B::BitwiseAnd,
        TokenKind::PipeEqual => B::BitwiseOr,
        TokenKind::CaretEqual => B::BitwiseXor,
        _ => return None,
    };
    Some(AssignmentOperator::Compound(compound))
}

fn unary_operator(kind: &TokenKind) -> Option<UnaryOperator> {
    let op = match kind {
        TokenKind::Minus => UnaryOperator::Minus,
        TokenKind::Plus => UnaryOperator::Plus,
        TokenKind::Bang => UnaryOperator::LogicalNot,
        TokenKind::Tilde => UnaryOperator::BitwiseNot,
        TokenKind::Typeof => UnaryOperator::Typeof,
        TokenKind::Void => UnaryOperator::Void,
        TokenKind::Delete => UnaryOperator::Delete,
        _ => return None,
    };
    Some(op)
}

fn update_operator(kind: &TokenKind) -> Option<UpdateOperator> {
    match kind {
        TokenKind::PlusPlus => Some(UpdateOperator::Increment),
        TokenKind::MinusMinus => Some(UpdateOperator::Decrement),
        _ => None,
    }
}

/// Splits a BigInt literal into its radix and digits.
fn bigint_radix(text: &str) -> (u32, &str) {
    match text.get(..2) {
        Some("0x") => (16, &text[2..]),
        Some("0o") => (8, &text[2..]),
        Some("0b") => (2, &text[2..]),
        _ => (10, text),
    }
}

impl<'a, H: ParseHandler> Parser<'a, H> {
    /// Parses a comma expression.
    pub(super) fn parse_expression(&mut self) -> PResult<H::Node> {
        let start = self.start();
        let first = self.parse_assignment_expression()?;
        if !self.check(&TokenKind::Comma) {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat(&TokenKind::Comma)? {
            items.push(self.parse_assignment_expression()?);
        }
        Ok(self.handler.node(NodeKind::Sequence(items), self.finish(start)))
    }

    pub(super) fn parse_assignment_expression(&mut self) -> PResult<H::Node> {
        self.descend()?;
        let result = self.parse_assignment_inner();
        self.ascend();
        result
    }

    fn parse_assignment_inner(&mut self) -> PResult<H::Node> {
        if self.check(&TokenKind::Yield) && self.function_kind() == FunctionKind::Generator {
            return self.parse_yield();
        }
        if self.check(&TokenKind::Async) {
            let next = self.peek();
            if next.kind == TokenKind::Function && !next.newline_before {
                return Err(self.error("async functions are not supported", self.current.pos));
            }
        }
        if self.at_arrow() {
            let start = self.start();
            let (_, node) = self.parse_function(None, FunctionKind::Arrow, FunctionSyntax::Arrow, start)?;
            return Ok(node);
        }

        let start = self.start();
        let target = self.parse_conditional()?;
        let Some(operator) = assignment_operator(&self.current.kind) else {
            return Ok(target);
        };
        let target = self.assignment_target(target, operator, start.pos)?;
        self.advance()?;
        let value = self.parse_assignment_expression()?;
        let kind = NodeKind::Assign {
            operator,
            target,
            value,
        };
        Ok(self.handler.node(kind, self.finish(start)))
    }

    /// Rejects names that strict code may not assign.
    pub(super) fn check_assignable_name(&self, atom: Atom, pos: SourcePos) -> PResult<()> {
        if self.strict() && (atom == Atom::EVAL || atom == Atom::ARGUMENTS) {
            return Err(self.semantic_error(
                format!("{} cannot be assigned in strict mode", self.atoms.get(atom)),
                pos,
            ));
        }
        Ok(())
    }

    fn assignment_target(
        &mut self,
        node: H::Node,
        operator: AssignmentOperator,
        pos: SourcePos,
    ) -> PResult<H::Node> {
        match self.handler.class(node) {
            NodeClass::Name(atom) => {
                self.check_assignable_name(atom, pos)?;
                Ok(node)
            }
            NodeClass::Member | NodeClass::Element => Ok(node),
            NodeClass::Array | NodeClass::Object if operator == AssignmentOperator::Assign => {
                let strict = self.strict();
                self.handler.to_assignment_pattern(node, strict, &self.atoms)
            }
            _ => Err(self.semantic_error("invalid assignment left-hand side", pos)),
        }
    }

    fn update_target(&mut self, node: H::Node, pos: SourcePos) -> PResult<()> {
        match self.handler.class(node) {
            NodeClass::Name(atom) => self.check_assignable_name(atom, pos),
            NodeClass::Member | NodeClass::Element => Ok(()),
            _ => Err(self.semantic_error("invalid increment/decrement operand", pos)),
        }
    }

    /// True if an arrow function starts at the current token. Scans ahead
    /// over a parenthesized parameter list without consuming it.
    fn at_arrow(&mut self) -> bool {
        if self.at_identifier() {
            return self.peek().kind == TokenKind::Arrow;
        }
        if !self.check(&TokenKind::LeftParen) {
            return false;
        }

        let state = self.scanner.checkpoint();
        let mut depth = 1usize;
        // Depths at which template substitutions were opened
        let mut templates: Vec<usize> = Vec::new();
        let found = loop {
            let token = self.scanner.next_token();
            match token.kind {
                TokenKind::LeftParen | TokenKind::LeftBracket | TokenKind::LeftBrace => depth += 1,
                TokenKind::TemplateHead(_) => {
                    depth += 1;
                    templates.push(depth);
                }
                TokenKind::RightBrace if templates.last() == Some(&depth) => {
                    let rest = self.scanner.rescan_template_continuation(token.span.start, token.pos);
                    match rest.kind {
                        TokenKind::TemplateMiddle(_) => {}
                        TokenKind::TemplateTail(_) => {
                            templates.pop();
                            depth -= 1;
                        }
                        _ => break false,
                    }
                }
                TokenKind::RightParen | TokenKind::RightBracket | TokenKind::RightBrace => {
                    depth -= 1;
                    if depth == 0 {
                        break self.scanner.next_token().kind == TokenKind::Arrow;
                    }
                }
                TokenKind::Eof | TokenKind::Invalid(_) => break false,
                _ => {}
            }
        };
        self.scanner.rewind(state);
        found
    }

    fn parse_conditional(&mut self) -> PResult<H::Node> {
        let start = self.start();
        let test = self.parse_binary_expression()?;
        if !self.eat(&TokenKind::Question)? {
            return Ok(test);
        }
        let consequent = self.allow_in(|p| p.parse_assignment_expression())?;
        self.expect(&TokenKind::Colon, "':'")?;
        let alternate = self.parse_assignment_expression()?;
        let kind = NodeKind::Conditional {
            test,
            consequent,
            alternate,
        };
        Ok(self.handler.node(kind, self.finish(start)))
    }

    // ==================== Binary operators ====================

    fn parse_binary_expression(&mut self) -> PResult<H::Node> {
        let mut operands = vec![self.parse_operand()?];
        let mut operators: Vec<(Infix, u8)> = Vec::new();

        while let Some((op, prec)) = infix_operator(&self.current.kind, self.no_in) {
            while let Some(&(top, top_prec)) = operators.last()
                && (top_prec > prec || (top_prec == prec && prec != EXPONENT_PRECEDENCE))
            {
                operators.pop();
                self.reduce(&mut operands, top)?;
            }
            if prec == EXPONENT_PRECEDENCE && operands.last().is_some_and(|o| o.unary) {
                return Err(self.error(
                    "unparenthesized unary expression can't appear on the left-hand side of '**'",
                    self.current.pos,
                ));
            }
            self.advance()?;
            operators.push((op, prec));
            operands.push(self.parse_operand()?);
        }

        while let Some((op, _)) = operators.pop() {
            self.reduce(&mut operands, op)?;
        }
        let operand = operands.pop().expect("binary expression without operands");
        Ok(operand.node)
    }

    fn parse_operand(&mut self) -> PResult<Operand<H::Node>> {
        let start = self.start();
        let unary = unary_operator(&self.current.kind).is_some();
        let node = self.parse_unary()?;
        Ok(Operand {
            node,
            loc: self.finish(start),
            unary,
            logical: None,
        })
    }

    fn reduce(&mut self, operands: &mut Vec<Operand<H::Node>>, op: Infix) -> PResult<()> {
        let right = operands.pop().expect("binary operand stack underflow");
        let left = operands.pop().expect("binary operand stack underflow");
        let loc = left.loc.until(right.loc);

        let (kind, logical) = match op {
            Infix::Binary(operator) => (
                NodeKind::Binary {
                    operator,
                    left: left.node,
                    right: right.node,
                },
                None,
            ),
            Infix::Logical(operator) => {
                let nullish = operator == LogicalOperator::NullishCoalescing;
                let mixed = [left.logical, right.logical].into_iter().flatten().any(|other| {
                    (other == LogicalOperator::NullishCoalescing) != nullish
                });
                if mixed {
                    return Err(self.error("cannot mix '??' with '&&' or '||' without parentheses", loc.pos));
                }
                (
                    NodeKind::Logical {
                        operator,
                        left: left.node,
                        right: right.node,
                    },
                    Some(operator),
                )
            }
        };
        operands.push(Operand {
            node: self.handler.node(kind, loc),
            loc,
            unary: false,
            logical,
        });
        Ok(())
    }

    // ==================== Unary and postfix ====================

    fn parse_unary(&mut self) -> PResult<H::Node> {
        let start = self.start();
        if let Some(operator) = unary_operator(&self.current.kind) {
            self.advance()?;
            self.descend()?;
            let operand = self.parse_unary();
            self.ascend();
            let operand = operand?;
            if operator == UnaryOperator::Delete
                && self.strict()
                && matches!(self.handler.class(operand), NodeClass::Name(_))
            {
                return Err(self.semantic_error(
                    "applying the 'delete' operator to an unqualified name is deprecated",
                    start.pos,
                ));
            }
            let kind = NodeKind::Unary { operator, operand };
            return Ok(self.handler.node(kind, self.finish(start)));
        }

        if let Some(operator) = update_operator(&self.current.kind) {
            self.advance()?;
            let operand_pos = self.current.pos;
            self.descend()?;
            let operand = self.parse_unary();
            self.ascend();
            let operand = operand?;
            self.update_target(operand, operand_pos)?;
            let kind = NodeKind::Update {
                operator,
                prefix: true,
                operand,
            };
            return Ok(self.handler.node(kind, self.finish(start)));
        }

        let operand = self.parse_left_hand_side()?;
        if let Some(operator) = update_operator(&self.current.kind)
            && !self.current.newline_before
        {
            self.update_target(operand, start.pos)?;
            self.advance()?;
            let kind = NodeKind::Update {
                operator,
                prefix: false,
                operand,
            };
            return Ok(self.handler.node(kind, self.finish(start)));
        }
        Ok(operand)
    }

    // ==================== Calls and member access ====================

    fn parse_left_hand_side(&mut self) -> PResult<H::Node> {
        let start = self.start();
        let mut expr = if self.check(&TokenKind::New) {
            self.parse_new()?
        } else {
            self.parse_primary()?
        };
        loop {
            if let Some(member) = self.parse_member_suffix(expr, start)? {
                expr = member;
                continue;
            }
            match self.current.kind {
                TokenKind::LeftParen => {
                    let args = self.parse_arguments()?;
                    let eval = self.handler.class(expr) == NodeClass::Name(Atom::EVAL);
                    if eval {
                        self.binder.note_dynamic_scope(false);
                    }
                    let kind = NodeKind::Call {
                        callee: expr,
                        args,
                        eval,
                    };
                    expr = self.handler.node(kind, self.finish(start));
                }
                TokenKind::NoSubstitutionTemplate(_) | TokenKind::TemplateHead(_) => {
                    return Err(self.error("tagged templates are not supported", self.current.pos));
                }
                _ => return Ok(expr),
            }
        }
    }

    /// Parses one `.name` or `[index]` suffix, if present.
    fn parse_member_suffix(&mut self, object: H::Node, start: Loc) -> PResult<Option<H::Node>> {
        let kind = match self.current.kind {
            TokenKind::Dot => {
                self.advance()?;
                let Some(name) = property_name(&self.current.kind) else {
                    return Err(self.unexpected("property name"));
                };
                let property = self.atoms.intern(name);
                self.advance()?;
                NodeKind::Member { object, property }
            }
            TokenKind::LeftBracket => {
                self.advance()?;
                let index = self.allow_in(|p| p.parse_expression())?;
                self.expect(&TokenKind::RightBracket, "']'")?;
                NodeKind::Element { object, index }
            }
            _ => return Ok(None),
        };
        Ok(Some(self.handler.node(kind, self.finish(start))))
    }

    fn parse_new(&mut self) -> PResult<H::Node> {
        let start = self.start();
        self.advance()?;
        if self.check(&TokenKind::Dot) {
            return Err(self.error("new.target is not supported", self.current.pos));
        }
        self.descend()?;
        let callee = if self.check(&TokenKind::New) {
            self.parse_new()
        } else {
            self.parse_primary()
        };
        self.ascend();
        let mut callee = callee?;
        let callee_start = self.finish(start);
        while let Some(member) = self.parse_member_suffix(callee, callee_start)? {
            callee = member;
        }
        let args = if self.check(&TokenKind::LeftParen) {
            self.parse_arguments()?
        } else {
            Vec::new()
        };
        Ok(self.handler.node(NodeKind::New { callee, args }, self.finish(start)))
    }

    fn parse_arguments(&mut self) -> PResult<Vec<H::Node>> {
        self.expect(&TokenKind::LeftParen, "'('")?;
        let mut args = Vec::new();
        while !self.check(&TokenKind::RightParen) {
            if self.check(&TokenKind::Ellipsis) {
                return Err(self.error("spread arguments are not supported", self.current.pos));
            }
            args.push(self.allow_in(|p| p.parse_assignment_expression())?);
            if !self.eat(&TokenKind::Comma)? {
                break;
            }
        }
        self.expect(&TokenKind::RightParen, "')'")?;
        Ok(args)
    }

    // ==================== Primary expressions ====================

    fn parse_primary(&mut self) -> PResult<H::Node> {
        let start = self.start();
        let kind = match &self.current.kind {
            TokenKind::Number(n) => {
                let n = *n;
                self.check_octal()?;
                self.advance()?;
                NodeKind::Number(n)
            }
            TokenKind::BigInt(text) => {
                let (radix, digits) = bigint_radix(text);
                let Some(value) = BigInt::parse_bytes(digits.as_bytes(), radix) else {
                    return Err(self.error("malformed BigInt literal", start.pos));
                };
                self.advance()?;
                NodeKind::BigInt(Box::new(value))
            }
            TokenKind::String(value) => {
                self.check_octal()?;
                let atom = self.atoms.intern(value);
                self.advance()?;
                NodeKind::String(atom)
            }
            TokenKind::NoSubstitutionTemplate(_) | TokenKind::TemplateHead(_) => {
                return self.parse_template();
            }
            TokenKind::Slash | TokenKind::SlashEqual => return self.parse_regexp(),
            TokenKind::True => {
                self.advance()?;
                NodeKind::Boolean(true)
            }
            TokenKind::False => {
                self.advance()?;
                NodeKind::Boolean(false)
            }
            TokenKind::Null => {
                self.advance()?;
                NodeKind::Null
            }
            TokenKind::This => {
                self.advance()?;
                self.binder.note_this();
                NodeKind::This
            }
            TokenKind::LeftParen => {
                self.advance()?;
                let expr = self.allow_in(|p| p.parse_expression())?;
                self.expect(&TokenKind::RightParen, "')'")?;
                return Ok(self.handler.parenthesize(expr));
            }
            TokenKind::LeftBracket => return self.parse_array_literal(),
            TokenKind::LeftBrace => return self.parse_object_literal(),
            TokenKind::Function => return self.parse_function_expression(),
            TokenKind::Class => return Err(self.error("class expressions are not supported", start.pos)),
            TokenKind::Super => return Err(self.error("'super' is not supported", start.pos)),
            _ if self.at_identifier() => {
                let (atom, loc) = self.identifier()?;
                return self.reference(atom, loc);
            }
            _ => return Err(self.unexpected("expression")),
        };
        Ok(self.handler.node(kind, self.finish(start)))
    }

    /// Builds a name node for a reference to `atom`.
    pub(super) fn reference(&mut self, atom: Atom, loc: Loc) -> PResult<H::Node> {
        let site = self.binder.reference(atom, loc.pos)?;
        Ok(self.handler.name(atom, site, loc))
    }

    /// Rejects legacy octal literals and escapes in strict code.
    fn check_octal(&self) -> PResult<()> {
        if self.current.legacy_octal && self.strict() {
            return Err(self.error("octal literals are not allowed in strict mode", self.current.pos));
        }
        Ok(())
    }

    fn parse_template(&mut self) -> PResult<H::Node> {
        let start = self.start();
        let mut quasis = Vec::new();
        let mut exprs = Vec::new();
        let complete = match &self.current.kind {
            TokenKind::NoSubstitutionTemplate(chunk) => {
                quasis.push(self.atoms.intern(chunk));
                true
            }
            TokenKind::TemplateHead(chunk) => {
                quasis.push(self.atoms.intern(chunk));
                false
            }
            _ => return Err(self.unexpected("template literal")),
        };
        self.advance()?;

        if !complete {
            loop {
                exprs.push(self.allow_in(|p| p.parse_expression())?);
                if !self.check(&TokenKind::RightBrace) {
                    return Err(self.unexpected("'}' in template literal"));
                }
                let rest = self
                    .scanner
                    .rescan_template_continuation(self.current.span.start, self.current.pos);
                self.replace_current(rest)?;
                let done = match &self.current.kind {
                    TokenKind::TemplateMiddle(chunk) => {
                        quasis.push(self.atoms.intern(chunk));
                        false
                    }
                    TokenKind::TemplateTail(chunk) => {
                        quasis.push(self.atoms.intern(chunk));
                        true
                    }
                    _ => return Err(self.unexpected("template literal")),
                };
                self.advance()?;
                if done {
                    break;
                }
            }
        }
        Ok(self.handler.node(NodeKind::Template { quasis, exprs }, self.finish(start)))
    }

    fn parse_regexp(&mut self) -> PResult<H::Node> {
        let start = self.start();
        let token = self.scanner.rescan_regexp(self.current.span.start, self.current.pos);
        self.replace_current(token)?;
        let TokenKind::RegExp { pattern, flags } = &self.current.kind else {
            return Err(self.unexpected("regular expression"));
        };
        let pattern = self.atoms.intern(pattern);
        let flags = self.atoms.intern(flags);
        self.advance()?;
        Ok(self.handler.node(NodeKind::RegExp { pattern, flags }, self.finish(start)))
    }

    fn parse_array_literal(&mut self) -> PResult<H::Node> {
        let start = self.start();
        self.expect(&TokenKind::LeftBracket, "'['")?;
        let mut elements = Vec::new();
        loop {
            match self.current.kind {
                TokenKind::RightBracket => break,
                TokenKind::Comma => {
                    self.advance()?;
                    elements.push(None);
                    continue;
                }
                TokenKind::Ellipsis => {
                    return Err(self.error("spread elements are not supported", self.current.pos));
                }
                _ => {}
            }
            elements.push(Some(self.allow_in(|p| p.parse_assignment_expression())?));
            if !self.eat(&TokenKind::Comma)? {
                break;
            }
        }
        self.expect(&TokenKind::RightBracket, "']'")?;
        Ok(self.handler.node(NodeKind::Array(elements), self.finish(start)))
    }

    fn parse_object_literal(&mut self) -> PResult<H::Node> {
        let start = self.start();
        self.expect(&TokenKind::LeftBrace, "'{'")?;
        let mut props = Vec::new();
        while !self.check(&TokenKind::RightBrace) {
            props.push(self.parse_property()?);
            if !self.eat(&TokenKind::Comma)? {
                break;
            }
        }
        self.expect(&TokenKind::RightBrace, "'}'")?;
        Ok(self.handler.node(NodeKind::Object(props), self.finish(start)))
    }

    fn parse_property(&mut self) -> PResult<Property<H::Node>> {
        let start = self.start();
        if self.check(&TokenKind::Ellipsis) {
            return Err(self.error("object spread is not supported", start.pos));
        }

        let next = self.peek().kind;
        let ends_key = matches!(
            next,
            TokenKind::Colon | TokenKind::Comma | TokenKind::LeftParen | TokenKind::RightBrace | TokenKind::Equal
        );
        let accessor = matches!(&self.current.kind, TokenKind::Identifier(name) if name == "get" || name == "set");
        if accessor && !ends_key {
            return Err(self.error("getters and setters are not supported", start.pos));
        }
        if self.check(&TokenKind::Async) && !ends_key {
            return Err(self.error("async methods are not supported", start.pos));
        }

        if self.eat(&TokenKind::Star)? {
            let key = self.parse_property_key()?;
            let value = self.parse_method(&key, FunctionKind::Generator, start)?;
            return Ok(Property {
                key,
                value,
                shorthand: false,
            });
        }

        if identifier_name(&self.current.kind).is_some() && matches!(next, TokenKind::Comma | TokenKind::RightBrace) {
            let (atom, loc) = self.identifier()?;
            let value = self.reference(atom, loc)?;
            return Ok(Property {
                key: PropertyKey::Name(atom),
                value,
                shorthand: true,
            });
        }
        if identifier_name(&self.current.kind).is_some() && next == TokenKind::Equal {
            return Err(self.error("shorthand property initializers are not supported", start.pos));
        }

        let key = self.parse_property_key()?;
        let value = if self.check(&TokenKind::LeftParen) {
            self.parse_method(&key, FunctionKind::Normal, start)?
        } else {
            self.expect(&TokenKind::Colon, "':'")?;
            self.allow_in(|p| p.parse_assignment_expression())?
        };
        Ok(Property {
            key,
            value,
            shorthand: false,
        })
    }

    /// Parses an object literal or pattern key.
    pub(super) fn parse_property_key(&mut self) -> PResult<PropertyKey<H::Node>> {
        let key = match &self.current.kind {
            TokenKind::String(value) => {
                self.check_octal()?;
                PropertyKey::Name(self.atoms.intern(value))
            }
            TokenKind::Number(n) => {
                let n = *n;
                self.check_octal()?;
                PropertyKey::Number(n)
            }
            TokenKind::LeftBracket => {
                self.advance()?;
                let key = self.allow_in(|p| p.parse_assignment_expression())?;
                self.expect(&TokenKind::RightBracket, "']'")?;
                return Ok(PropertyKey::Computed(key));
            }
            kind => match property_name(kind) {
                Some(name) => PropertyKey::Name(self.atoms.intern(name)),
                None => return Err(self.unexpected("property name")),
            },
        };
        self.advance()?;
        Ok(key)
    }

    fn parse_method(&mut self, key: &PropertyKey<H::Node>, kind: FunctionKind, start: Loc) -> PResult<H::Node> {
        let name = match key {
            PropertyKey::Name(atom) => Some(*atom),
            _ => None,
        };
        let (_, node) = self.parse_function(name, kind, FunctionSyntax::Method, start)?;
        Ok(node)
    }

    fn parse_function_expression(&mut self) -> PResult<H::Node> {
        let start = self.start();
        self.advance()?;
        let kind = if self.eat(&TokenKind::Star)? {
            FunctionKind::Generator
        } else {
            FunctionKind::Normal
        };
        let name = if self.check(&TokenKind::LeftParen) {
            None
        } else {
            Some(self.binding_identifier()?.0)
        };
        let (_, node) = self.parse_function(name, kind, FunctionSyntax::Expression, start)?;
        Ok(node)
    }

    fn parse_yield(&mut self) -> PResult<H::Node> {
        let start = self.start();
        self.advance()?;
        let delegate = !self.current.newline_before && self.check(&TokenKind::Star);
        if delegate {
            self.advance()?;
        }
        let ends_yield = self.current.newline_before
            || matches!(
                self.current.kind,
                TokenKind::RightParen
                    | TokenKind::RightBracket
                    | TokenKind::RightBrace
                    | TokenKind::Comma
                    | TokenKind::Semicolon
                    | TokenKind::Colon
                    | TokenKind::Eof
            )
            || (self.no_in && self.check(&TokenKind::In));
        let argument = if delegate || !ends_yield {
            Some(self.parse_assignment_expression()?)
        } else {
            None
        };
        Ok(self.handler.node(NodeKind::Yield { argument, delegate }, self.finish(start)))
    }
}
