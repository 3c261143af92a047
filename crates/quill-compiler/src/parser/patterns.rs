//! Destructuring patterns.
//!
//! Binding patterns (`let [a, b] = ...`, destructuring parameters) are parsed
//! directly and declare every name they bind. Assignment patterns
//! (`[a, b] = ...`) are first parsed as array or object literals and then
//! rewritten in place by [`reinterpret_as_pattern`].

use crate::ast::{AssignmentOperator, Ast, Loc, NodeId, NodeKind, PatternProperty, Property, PropertyKey};
use crate::atoms::{Atom, AtomTable};
use crate::error::CompileError;
use crate::lexer::TokenKind;

use super::binder::DefKind;
use super::handler::ParseHandler;
use super::parser::Parser;
use super::{PResult, ParseFailure};

impl<'a, H: ParseHandler> Parser<'a, H> {
    /// Parses a declaration target: a name or a binding pattern.
    pub(super) fn parse_binding_target(&mut self, kind: DefKind) -> PResult<H::Node> {
        match self.current.kind {
            TokenKind::LeftBracket | TokenKind::LeftBrace => self.parse_binding_pattern(kind),
            _ => self.parse_binding_name(kind),
        }
    }

    /// Parses and declares a single bound name.
    pub(super) fn parse_binding_name(&mut self, kind: DefKind) -> PResult<H::Node> {
        let (atom, loc) = self.binding_identifier()?;
        self.bind_name(atom, loc, kind)
    }

    fn bind_name(&mut self, atom: Atom, loc: Loc, kind: DefKind) -> PResult<H::Node> {
        if matches!(kind, DefKind::Let | DefKind::Const) && self.atoms.get(atom) == "let" {
            return Err(self.error("let is disallowed as a lexically bound name", loc.pos));
        }
        if let Some(params) = self.functions.last_mut().and_then(|f| f.pattern_params.as_mut()) {
            params.push((atom, loc.pos));
        }
        let def = self.binder.declare(atom, kind, loc.pos, &self.atoms)?;
        let site = self.binder.declaration_use(def, loc.pos);
        Ok(self.handler.name(atom, site, loc))
    }

    /// Parses `[...]` or `{...}` in a binding position.
    pub(super) fn parse_binding_pattern(&mut self, kind: DefKind) -> PResult<H::Node> {
        self.descend()?;
        let result = if self.check(&TokenKind::LeftBracket) {
            self.parse_array_binding(kind)
        } else {
            self.parse_object_binding(kind)
        };
        self.ascend();
        result
    }

    fn parse_array_binding(&mut self, kind: DefKind) -> PResult<H::Node> {
        let start = self.start();
        self.expect(&TokenKind::LeftBracket, "'['")?;
        let mut elements = Vec::new();
        let mut rest = None;
        loop {
            match self.current.kind {
                TokenKind::RightBracket => break,
                TokenKind::Comma => {
                    self.advance()?;
                    elements.push(None);
                    continue;
                }
                TokenKind::Ellipsis => {
                    self.advance()?;
                    rest = Some(self.parse_binding_target(kind)?);
                    if !self.check(&TokenKind::RightBracket) {
                        return Err(self.error("rest element must be last", self.current.pos));
                    }
                    break;
                }
                _ => {}
            }
            elements.push(Some(self.parse_binding_element(kind)?));
            if !self.eat(&TokenKind::Comma)? {
                break;
            }
        }
        self.expect(&TokenKind::RightBracket, "']'")?;
        let loc = self.finish(start);
        Ok(self.handler.node(NodeKind::ArrayPattern { elements, rest }, loc))
    }

    fn parse_object_binding(&mut self, kind: DefKind) -> PResult<H::Node> {
        let start = self.start();
        self.expect(&TokenKind::LeftBrace, "'{'")?;
        let mut props = Vec::new();
        while !self.check(&TokenKind::RightBrace) {
            if self.check(&TokenKind::Ellipsis) {
                return Err(self.error("object rest patterns are not supported", self.current.pos));
            }
            let shorthand = self.at_identifier() && self.peek().kind != TokenKind::Colon;
            let prop = if shorthand {
                let (atom, loc) = self.binding_identifier()?;
                let target = self.bind_name(atom, loc, kind)?;
                let target = self.parse_default(target, loc)?;
                PatternProperty {
                    key: PropertyKey::Name(atom),
                    target,
                }
            } else {
                let key = self.parse_property_key()?;
                self.expect(&TokenKind::Colon, "':'")?;
                let target = self.parse_binding_element(kind)?;
                PatternProperty { key, target }
            };
            props.push(prop);
            if !self.eat(&TokenKind::Comma)? {
                break;
            }
        }
        self.expect(&TokenKind::RightBrace, "'}'")?;
        let loc = self.finish(start);
        Ok(self.handler.node(NodeKind::ObjectPattern(props), loc))
    }

    /// A binding target with an optional `= default`.
    fn parse_binding_element(&mut self, kind: DefKind) -> PResult<H::Node> {
        let start = self.start();
        let target = self.parse_binding_target(kind)?;
        self.parse_default(target, start)
    }

    fn parse_default(&mut self, target: H::Node, start: Loc) -> PResult<H::Node> {
        if !self.eat(&TokenKind::Equal)? {
            return Ok(target);
        }
        let default = self.allow_in(|p| p.parse_assignment_expression())?;
        let loc = self.finish(start);
        Ok(self.handler.node(NodeKind::WithDefault { target, default }, loc))
    }
}

/// Rewrites an array or object literal used as an assignment target into the
/// matching pattern, recursively.
pub(super) fn reinterpret_as_pattern(
    ast: &mut Ast,
    node: NodeId,
    strict: bool,
    atoms: &AtomTable,
) -> Result<(), ParseFailure> {
    let loc = ast.loc(node);
    let kind = std::mem::replace(&mut ast.node_mut(node).kind, NodeKind::Null);
    let pattern = match kind {
        NodeKind::Array(elements) => {
            let mut targets = Vec::with_capacity(elements.len());
            for element in elements {
                match element {
                    Some(e) => {
                        assignment_target(ast, e, strict, atoms)?;
                        targets.push(Some(e));
                    }
                    None => targets.push(None),
                }
            }
            NodeKind::ArrayPattern {
                elements: targets,
                rest: None,
            }
        }
        NodeKind::Object(props) => {
            let mut targets = Vec::with_capacity(props.len());
            for Property { key, value, .. } in props {
                if matches!(ast.kind(value), NodeKind::Function(_)) {
                    return Err(invalid_target(ast, value));
                }
                assignment_target(ast, value, strict, atoms)?;
                targets.push(PatternProperty { key, target: value });
            }
            NodeKind::ObjectPattern(targets)
        }
        other => {
            ast.node_mut(node).kind = other;
            return Err(CompileError::semantic("invalid destructuring target", loc.pos).into());
        }
    };
    ast.node_mut(node).kind = pattern;
    Ok(())
}

/// Validates (and where needed rewrites) one element of an assignment
/// pattern.
fn assignment_target(ast: &mut Ast, node: NodeId, strict: bool, atoms: &AtomTable) -> Result<(), ParseFailure> {
    let parenthesized = ast[node].parenthesized;
    match ast.kind(node) {
        NodeKind::Name(atom) => check_name(*atom, strict, atoms, ast, node),
        NodeKind::Member { .. } | NodeKind::Element { .. } => Ok(()),
        NodeKind::ArrayPattern { .. } | NodeKind::ObjectPattern(_) => Ok(()),
        NodeKind::Array(_) | NodeKind::Object(_) if !parenthesized => {
            reinterpret_as_pattern(ast, node, strict, atoms)
        }
        NodeKind::Assign {
            operator: AssignmentOperator::Assign,
            target,
            value,
        } if !parenthesized => {
            let (target, default) = (*target, *value);
            assignment_target(ast, target, strict, atoms)?;
            ast.node_mut(node).kind = NodeKind::WithDefault { target, default };
            Ok(())
        }
        _ => Err(invalid_target(ast, node)),
    }
}

fn check_name(atom: Atom, strict: bool, atoms: &AtomTable, ast: &Ast, node: NodeId) -> Result<(), ParseFailure> {
    if strict && (atom == Atom::EVAL || atom == Atom::ARGUMENTS) {
        let message = format!("{} cannot be assigned in strict mode", atoms.get(atom));
        return Err(CompileError::semantic(message, ast.loc(node).pos).into());
    }
    Ok(())
}

fn invalid_target(ast: &Ast, node: NodeId) -> ParseFailure {
    CompileError::semantic("invalid destructuring target", ast.loc(node).pos).into()
}
