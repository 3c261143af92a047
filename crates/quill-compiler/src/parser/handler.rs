//! Parse handlers.
//!
//! The parser is generic over a [`ParseHandler`], which decides what each
//! grammar production builds. [`FullParseHandler`] builds the [`Ast`] the
//! emitter walks. [`SyntaxParseHandler`] keeps only a one-word summary of
//! each node: enough to check assignment targets and directives while the
//! binder still records every declaration and reference.
//!
//! The syntax handler refuses constructs it cannot check precisely. The
//! parser then gets [`ParseAbort::NeedFullParse`] and redoes the function
//! with the full handler.

use std::fmt;

use crate::ast::{Ast, Loc, NodeKind, NodeId};
use crate::atoms::{Atom, AtomTable};

use super::binder::UseId;
use super::patterns;
use super::{ParseAbort, ParseFailure};

/// What the parser needs to know about an already-built node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeClass {
    /// Unparenthesized or parenthesized identifier
    Name(Atom),
    /// `a.b`
    Member,
    /// `a[b]`
    Element,
    /// `f()`
    Call,
    /// Unparenthesized array literal
    Array,
    /// Unparenthesized object literal
    Object,
    /// Unparenthesized string literal
    String(Atom),
    /// Anything else
    Other,
}

impl NodeClass {
    /// Valid as the target of `=` without destructuring.
    pub fn is_simple_target(self) -> bool {
        matches!(self, NodeClass::Name(_) | NodeClass::Member | NodeClass::Element)
    }
}

/// Strategy for building parse results.
pub trait ParseHandler {
    /// Handle returned for each production.
    type Node: Copy + fmt::Debug + PartialEq;

    /// True for the handler that builds a complete tree.
    const FULL: bool;

    /// Builds a node.
    fn node(&mut self, kind: NodeKind<Self::Node>, loc: Loc) -> Self::Node;

    /// Builds a name node linked to a use-site.
    fn name(&mut self, atom: Atom, binding: UseId, loc: Loc) -> Self::Node;

    /// Classifies a node.
    fn class(&self, node: Self::Node) -> NodeClass;

    /// Marks a node as written inside parentheses.
    fn parenthesize(&mut self, node: Self::Node) -> Self::Node;

    /// Reinterprets an array or object literal on the left of `=` as a
    /// destructuring pattern.
    fn to_assignment_pattern(
        &mut self,
        node: Self::Node,
        strict: bool,
        atoms: &AtomTable,
    ) -> Result<Self::Node, ParseFailure>;

    /// Fails if this handler cannot check the current construct precisely.
    fn require_full_parse(&self) -> Result<(), ParseFailure>;

    /// Saves the handler's state.
    fn mark(&self) -> usize;

    /// Discards everything built since `mark`.
    fn reset(&mut self, mark: usize);
}

// ==================== Full parse ====================

/// Builds the complete tree.
#[derive(Debug, Default)]
pub struct FullParseHandler {
    /// The tree being built
    pub ast: Ast,
}

impl FullParseHandler {
    /// Creates a handler with an empty arena.
    pub fn new() -> Self {
        Self::default()
    }
}

impl ParseHandler for FullParseHandler {
    type Node = NodeId;

    const FULL: bool = true;

    fn node(&mut self, kind: NodeKind, loc: Loc) -> NodeId {
        self.ast.push(kind, loc, None)
    }

    fn name(&mut self, atom: Atom, binding: UseId, loc: Loc) -> NodeId {
        self.ast.push(NodeKind::Name(atom), loc, Some(binding))
    }

    fn class(&self, node: NodeId) -> NodeClass {
        let n = &self.ast[node];
        match &n.kind {
            NodeKind::Name(atom) => NodeClass::Name(*atom),
            NodeKind::Member { .. } => NodeClass::Member,
            NodeKind::Element { .. } => NodeClass::Element,
            NodeKind::Call { .. } => NodeClass::Call,
            NodeKind::Array(_) if !n.parenthesized => NodeClass::Array,
            NodeKind::Object(_) if !n.parenthesized => NodeClass::Object,
            NodeKind::String(atom) if !n.parenthesized => NodeClass::String(*atom),
            _ => NodeClass::Other,
        }
    }

    fn parenthesize(&mut self, node: NodeId) -> NodeId {
        self.ast.node_mut(node).parenthesized = true;
        node
    }

    fn to_assignment_pattern(
        &mut self,
        node: NodeId,
        strict: bool,
        atoms: &AtomTable,
    ) -> Result<NodeId, ParseFailure> {
        patterns::reinterpret_as_pattern(&mut self.ast, node, strict, atoms)?;
        Ok(node)
    }

    fn require_full_parse(&self) -> Result<(), ParseFailure> {
        Ok(())
    }

    fn mark(&self) -> usize {
        self.ast.len()
    }

    fn reset(&mut self, mark: usize) {
        self.ast.truncate(mark);
    }
}

// ==================== Syntax-only parse ====================

/// Summary of a node built by the syntax-only parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyntaxNode {
    /// Identifier
    Name(Atom, UseId),
    /// `a.b`
    Member,
    /// `a[b]`
    Element,
    /// `f()`
    Call,
    /// Array literal
    Array,
    /// Object literal
    Object,
    /// String literal
    String(Atom),
    /// Anything else, including parenthesized literals
    Generic,
}

/// Checks syntax and binds names without building a tree.
#[derive(Debug, Default, Clone, Copy)]
pub struct SyntaxParseHandler;

impl ParseHandler for SyntaxParseHandler {
    type Node = SyntaxNode;

    const FULL: bool = false;

    fn node(&mut self, kind: NodeKind<SyntaxNode>, _loc: Loc) -> SyntaxNode {
        match kind {
            NodeKind::Member { .. } => SyntaxNode::Member,
            NodeKind::Element { .. } => SyntaxNode::Element,
            NodeKind::Call { .. } => SyntaxNode::Call,
            NodeKind::Array(_) => SyntaxNode::Array,
            NodeKind::Object(_) => SyntaxNode::Object,
            NodeKind::String(atom) => SyntaxNode::String(atom),
            _ => SyntaxNode::Generic,
        }
    }

    fn name(&mut self, atom: Atom, binding: UseId, _loc: Loc) -> SyntaxNode {
        SyntaxNode::Name(atom, binding)
    }

    fn class(&self, node: SyntaxNode) -> NodeClass {
        match node {
            SyntaxNode::Name(atom, _) => NodeClass::Name(atom),
            SyntaxNode::Member => NodeClass::Member,
            SyntaxNode::Element => NodeClass::Element,
            SyntaxNode::Call => NodeClass::Call,
            SyntaxNode::Array => NodeClass::Array,
            SyntaxNode::Object => NodeClass::Object,
            SyntaxNode::String(atom) => NodeClass::String(atom),
            SyntaxNode::Generic => NodeClass::Other,
        }
    }

    fn parenthesize(&mut self, node: SyntaxNode) -> SyntaxNode {
        match node {
            SyntaxNode::Array | SyntaxNode::Object | SyntaxNode::String(_) => SyntaxNode::Generic,
            other => other,
        }
    }

    fn to_assignment_pattern(
        &mut self,
        _node: SyntaxNode,
        _strict: bool,
        _atoms: &AtomTable,
    ) -> Result<SyntaxNode, ParseFailure> {
        Err(ParseFailure::Abort(ParseAbort::NeedFullParse))
    }

    fn require_full_parse(&self) -> Result<(), ParseFailure> {
        Err(ParseFailure::Abort(ParseAbort::NeedFullParse))
    }

    fn mark(&self) -> usize {
        0
    }

    fn reset(&mut self, _mark: usize) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::{SourcePos, Span};

    fn loc() -> Loc {
        Loc::new(Span::new(0, 1), SourcePos::default())
    }

    #[test]
    fn test_full_handler_classes() {
        let mut handler = FullParseHandler::new();
        let s = handler.node(NodeKind::String(Atom::EVAL), loc());
        assert_eq!(handler.class(s), NodeClass::String(Atom::EVAL));
        let s = handler.parenthesize(s);
        assert_eq!(handler.class(s), NodeClass::Other);

        let arr = handler.node(NodeKind::Array(vec![]), loc());
        assert_eq!(handler.class(arr), NodeClass::Array);
        assert!(!handler.class(arr).is_simple_target());
    }

    #[test]
    fn test_full_handler_mark_reset() {
        let mut handler = FullParseHandler::new();
        handler.node(NodeKind::Null, loc());
        let mark = handler.mark();
        handler.node(NodeKind::This, loc());
        handler.reset(mark);
        assert_eq!(handler.ast.len(), 1);
    }

    #[test]
    fn test_syntax_handler_summaries() {
        let mut handler = SyntaxParseHandler;
        let obj = handler.node(NodeKind::Object(vec![]), loc());
        assert_eq!(handler.class(obj), NodeClass::Object);
        let wrapped = handler.parenthesize(obj);
        assert_eq!(handler.class(wrapped), NodeClass::Other);
        let number = handler.node(NodeKind::Number(1.0), loc());
        assert_eq!(handler.class(number), NodeClass::Other);
    }

    #[test]
    fn test_syntax_handler_aborts_on_patterns() {
        let mut handler = SyntaxParseHandler;
        let atoms = AtomTable::new();
        let result = handler.to_assignment_pattern(SyntaxNode::Array, false, &atoms);
        assert!(matches!(
            result,
            Err(ParseFailure::Abort(ParseAbort::NeedFullParse))
        ));
        assert!(handler.require_full_parse().is_err());
    }
}
