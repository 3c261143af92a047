//! Syntax tree.
//!
//! Nodes live in an [`Ast`] arena and refer to each other by [`NodeId`].
//! Each node owns its children: no id appears as the child of two nodes.
//! The envelope ([`Node`]) carries what every node has in common: its
//! source location, and for name nodes the use-site the binder linked it to.
//!
//! [`NodeKind`] is generic over the child handle so the syntax-only parse
//! can share the parser's constructors while keeping nothing but a summary
//! of each node.

use std::ops::Index;

use num_bigint::BigInt;
use rustc_hash::FxHashMap;

use crate::atoms::Atom;
use crate::lexer::{SourcePos, Span};
use crate::parser::binder::{FunBoxId, ScopeId, UseId};

/// Handle to a node in an [`Ast`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

impl NodeId {
    /// Index into the arena.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Source location of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Loc {
    /// Byte range
    pub span: Span,
    /// Line/column of the first byte
    pub pos: SourcePos,
}

impl Loc {
    /// Creates a location.
    pub fn new(span: Span, pos: SourcePos) -> Self {
        Self { span, pos }
    }

    /// Extends this location to end where `other` ends.
    pub fn until(self, other: Loc) -> Loc {
        Loc {
            span: self.span.to(other.span),
            pos: self.pos,
        }
    }
}

/// A node and its shared fields.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    /// Node variant
    pub kind: NodeKind,
    /// Source location
    pub loc: Loc,
    /// For names: the use-site linking this occurrence to its binding
    pub binding: Option<UseId>,
    /// Written inside parentheses
    pub parenthesized: bool,
}

/// `var`, `let` or `const`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeclKind {
    Var,
    Let,
    Const,
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOperator {
    /// -
    Minus,
    /// +
    Plus,
    /// !
    LogicalNot,
    /// ~
    BitwiseNot,
    /// typeof
    Typeof,
    /// void
    Void,
    /// delete
    Delete,
}

/// `++` or `--`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpdateOperator {
    Increment,
    Decrement,
}

/// Binary operators that evaluate both operands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOperator {
    // Arithmetic
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Exponent,
    // Comparison
    Equal,
    NotEqual,
    StrictEqual,
    StrictNotEqual,
    LessThan,
    LessThanEqual,
    GreaterThan,
    GreaterThanEqual,
    // Bitwise
    BitwiseAnd,
    BitwiseOr,
    BitwiseXor,
    LeftShift,
    RightShift,
    UnsignedRightShift,
    // Other
    In,
    InstanceOf,
}

/// Short-circuiting operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogicalOperator {
    And,
    Or,
    NullishCoalescing,
}

/// `=` or a compound assignment such as `+=`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssignmentOperator {
    Assign,
    Compound(BinaryOperator),
}

/// An object literal or pattern key.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyKey<N = NodeId> {
    /// Identifier or string key
    Name(Atom),
    /// Numeric key
    Number(f64),
    /// `[expr]`
    Computed(N),
}

/// An object literal entry.
#[derive(Debug, Clone, PartialEq)]
pub struct Property<N = NodeId> {
    /// Key
    pub key: PropertyKey<N>,
    /// Value (a function node for methods)
    pub value: N,
    /// `{ x }` shorthand
    pub shorthand: bool,
}

/// An object pattern entry.
#[derive(Debug, Clone, PartialEq)]
pub struct PatternProperty<N = NodeId> {
    /// Key
    pub key: PropertyKey<N>,
    /// Target: a name, member access (assignments only), nested pattern or
    /// a target with a default
    pub target: N,
}

/// One `name = init` in a declaration.
#[derive(Debug, Clone, PartialEq)]
pub struct Declarator<N = NodeId> {
    /// Name or pattern
    pub target: N,
    /// Initializer
    pub init: Option<N>,
}

/// A `case` or `default` clause.
#[derive(Debug, Clone, PartialEq)]
pub struct SwitchCase<N = NodeId> {
    /// `None` for `default`
    pub test: Option<N>,
    /// Statements
    pub body: Vec<N>,
    /// Location of the `case` keyword
    pub loc: Loc,
}

/// A `catch` clause.
#[derive(Debug, Clone, PartialEq)]
pub struct CatchClause<N = NodeId> {
    /// Bound name or pattern; `catch {}` has none
    pub param: Option<N>,
    /// Handler block
    pub body: N,
    /// Scope holding the parameter bindings
    pub scope: ScopeId,
}

/// A function literal. The body is empty for lazily compiled functions.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionNode<N = NodeId> {
    /// Compile-time record
    pub funbox: FunBoxId,
    /// Formal parameters: names, patterns, or either with a default
    pub params: Vec<N>,
    /// `...rest` parameter
    pub rest: Option<N>,
    /// Body statements; an arrow with an expression body gets a single
    /// `return`
    pub body: Vec<N>,
}

/// Node variants.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind<N = NodeId> {
    // ==================== Expressions ====================
    /// Numeric literal
    Number(f64),
    /// String literal
    String(Atom),
    /// Template literal: `quasis.len() == exprs.len() + 1`
    Template { quasis: Vec<Atom>, exprs: Vec<N> },
    /// Regular expression literal
    RegExp { pattern: Atom, flags: Atom },
    /// BigInt literal
    BigInt(Box<BigInt>),
    /// `true` / `false`
    Boolean(bool),
    /// `null`
    Null,
    /// `this`
    This,
    /// Identifier reference or binding
    Name(Atom),
    /// Array literal; `None` marks a hole
    Array(Vec<Option<N>>),
    /// Object literal
    Object(Vec<Property<N>>),
    /// Function expression, arrow, method or declaration
    Function(Box<FunctionNode<N>>),
    /// Prefix operator
    Unary { operator: UnaryOperator, operand: N },
    /// `++x`, `x--`, ...
    Update {
        operator: UpdateOperator,
        prefix: bool,
        operand: N,
    },
    /// Binary operator
    Binary {
        operator: BinaryOperator,
        left: N,
        right: N,
    },
    /// `&&`, `||`, `??`
    Logical {
        operator: LogicalOperator,
        left: N,
        right: N,
    },
    /// `test ? consequent : alternate`
    Conditional {
        test: N,
        consequent: N,
        alternate: N,
    },
    /// Assignment
    Assign {
        operator: AssignmentOperator,
        target: N,
        value: N,
    },
    /// Comma expression
    Sequence(Vec<N>),
    /// Call; `eval` is set for a direct call to `eval`
    Call { callee: N, args: Vec<N>, eval: bool },
    /// `new callee(args)`
    New { callee: N, args: Vec<N> },
    /// `object.property`
    Member { object: N, property: Atom },
    /// `object[index]`
    Element { object: N, index: N },
    /// `yield` / `yield*`
    Yield { argument: Option<N>, delegate: bool },

    // ==================== Patterns ====================
    /// `[a, , b = 1, ...rest]`
    ArrayPattern {
        elements: Vec<Option<N>>,
        rest: Option<N>,
    },
    /// `{ a, b: c }`
    ObjectPattern(Vec<PatternProperty<N>>),
    /// Pattern target with a default value
    WithDefault { target: N, default: N },

    // ==================== Statements ====================
    /// `var` / `let` / `const`
    VarDecl {
        kind: DeclKind,
        declarators: Vec<Declarator<N>>,
    },
    /// Expression statement
    Expr(N),
    /// `{ ... }`, with a scope when it declares block-scoped names
    Block { body: Vec<N>, scope: Option<ScopeId> },
    /// `if`
    If {
        test: N,
        consequent: N,
        alternate: Option<N>,
    },
    /// `while`
    While { test: N, body: N },
    /// `do ... while`
    DoWhile { body: N, test: N },
    /// `for (init; test; update)`
    For {
        init: Option<N>,
        test: Option<N>,
        update: Option<N>,
        body: N,
        scope: Option<ScopeId>,
    },
    /// `for (target in object)` / `for (target of object)`
    ForIn {
        target: N,
        object: N,
        body: N,
        of: bool,
        scope: Option<ScopeId>,
    },
    /// `switch`
    Switch {
        discriminant: N,
        cases: Vec<SwitchCase<N>>,
        scope: Option<ScopeId>,
    },
    /// `break [label]`
    Break(Option<Atom>),
    /// `continue [label]`
    Continue(Option<Atom>),
    /// `return [value]`
    Return(Option<N>),
    /// `throw value`
    Throw(N),
    /// `try`
    Try {
        block: N,
        handler: Option<CatchClause<N>>,
        finalizer: Option<N>,
    },
    /// `with (object) body`
    With { object: N, body: N },
    /// `label: body`
    Labeled { label: Atom, body: N },
    /// `debugger`
    Debugger,
    /// `;`
    Empty,
}

/// Node arena for one compilation unit.
#[derive(Debug, Default)]
pub struct Ast {
    nodes: Vec<Node>,
    functions: FxHashMap<FunBoxId, NodeId>,
}

impl Ast {
    /// Creates an empty arena.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a node.
    pub fn push(&mut self, kind: NodeKind, loc: Loc, binding: Option<UseId>) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        if let NodeKind::Function(function) = &kind {
            self.functions.insert(function.funbox, id);
        }
        self.nodes.push(Node {
            kind,
            loc,
            binding,
            parenthesized: false,
        });
        id
    }

    /// Returns a node.
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    /// Returns a node mutably.
    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.index()]
    }

    /// Returns a node's variant.
    pub fn kind(&self, id: NodeId) -> &NodeKind {
        &self.nodes[id.index()].kind
    }

    /// Returns a node's location.
    pub fn loc(&self, id: NodeId) -> Loc {
        self.nodes[id.index()].loc
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// True if the arena is empty.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Discards nodes created after the arena had `len` nodes.
    pub fn truncate(&mut self, len: usize) {
        self.nodes.truncate(len);
        self.functions.retain(|_, id| id.index() < len);
    }

    /// The node of a function, if it was parsed with a full tree.
    pub fn function_node(&self, funbox: FunBoxId) -> Option<NodeId> {
        self.functions.get(&funbox).copied()
    }

    /// Children of a node, in source order.
    pub fn children(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let key = |out: &mut Vec<NodeId>, key: &PropertyKey| {
            if let PropertyKey::Computed(k) = key {
                out.push(*k);
            }
        };
        match self.kind(id) {
            NodeKind::Number(_)
            | NodeKind::String(_)
            | NodeKind::RegExp { .. }
            | NodeKind::BigInt(_)
            | NodeKind::Boolean(_)
            | NodeKind::Null
            | NodeKind::This
            | NodeKind::Name(_)
            | NodeKind::Break(_)
            | NodeKind::Continue(_)
            | NodeKind::Debugger
            | NodeKind::Empty => {}
            NodeKind::Template { exprs, .. } => out.extend(exprs),
            NodeKind::Array(elements) => out.extend(elements.iter().flatten()),
            NodeKind::Object(props) => {
                for prop in props {
                    key(&mut out, &prop.key);
                    out.push(prop.value);
                }
            }
            NodeKind::Function(function) => {
                out.extend(&function.params);
                out.extend(&function.rest);
                out.extend(&function.body);
            }
            NodeKind::Unary { operand, .. } | NodeKind::Update { operand, .. } => out.push(*operand),
            NodeKind::Binary { left, right, .. } | NodeKind::Logical { left, right, .. } => {
                out.extend([*left, *right])
            }
            NodeKind::Conditional {
                test,
                consequent,
                alternate,
            } => out.extend([*test, *consequent, *alternate]),
            NodeKind::Assign { target, value, .. } => out.extend([*target, *value]),
            NodeKind::Sequence(items) => out.extend(items),
            NodeKind::Call { callee, args, .. } | NodeKind::New { callee, args } => {
                out.push(*callee);
                out.extend(args);
            }
            NodeKind::Member { object, .. } => out.push(*object),
            NodeKind::Element { object, index } => out.extend([*object, *index]),
            NodeKind::Yield { argument, .. } => out.extend(argument),
            NodeKind::ArrayPattern { elements, rest } => {
                out.extend(elements.iter().flatten());
                out.extend(rest);
            }
            NodeKind::ObjectPattern(props) => {
                for prop in props {
                    key(&mut out, &prop.key);
                    out.push(prop.target);
                }
            }
            NodeKind::WithDefault { target, default } => out.extend([*target, *default]),
            NodeKind::VarDecl { declarators, .. } => {
                for d in declarators {
                    out.push(d.target);
                    out.extend(d.init);
                }
            }
            NodeKind::Expr(e) | NodeKind::Throw(e) => out.push(*e),
            NodeKind::Block { body, .. } => out.extend(body),
            NodeKind::If {
                test,
                consequent,
                alternate,
            } => {
                out.extend([*test, *consequent]);
                out.extend(alternate);
            }
            NodeKind::While { test, body } => out.extend([*test, *body]),
            NodeKind::DoWhile { body, test } => out.extend([*body, *test]),
            NodeKind::For {
                init,
                test,
                update,
                body,
                ..
            } => {
                out.extend(init);
                out.extend(test);
                out.extend(update);
                out.push(*body);
            }
            NodeKind::ForIn {
                target,
                object,
                body,
                ..
            } => out.extend([*target, *object, *body]),
            NodeKind::Switch {
                discriminant,
                cases,
                ..
            } => {
                out.push(*discriminant);
                for case in cases {
                    out.extend(case.test);
                    out.extend(&case.body);
                }
            }
            NodeKind::Return(value) => out.extend(value),
            NodeKind::Try {
                block,
                handler,
                finalizer,
            } => {
                out.push(*block);
                if let Some(handler) = handler {
                    out.extend(handler.param);
                    out.push(handler.body);
                }
                out.extend(finalizer);
            }
            NodeKind::With { object, body } => out.extend([*object, *body]),
            NodeKind::Labeled { body, .. } => out.push(*body),
        }
        out
    }
}

impl Index<NodeId> for Ast {
    type Output = Node;

    fn index(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loc(start: usize, end: usize) -> Loc {
        Loc::new(Span::new(start, end), SourcePos::new(1, start as u32))
    }

    #[test]
    fn test_push_and_index() {
        let mut ast = Ast::new();
        let one = ast.push(NodeKind::Number(1.0), loc(0, 1), None);
        let two = ast.push(NodeKind::Number(2.0), loc(4, 5), None);
        let sum = ast.push(
            NodeKind::Binary {
                operator: BinaryOperator::Add,
                left: one,
                right: two,
            },
            loc(0, 5),
            None,
        );
        assert_eq!(ast.len(), 3);
        assert_eq!(ast[sum].loc.span, Span::new(0, 5));
        assert_eq!(ast.children(sum), vec![one, two]);
        assert!(ast.children(one).is_empty());
    }

    #[test]
    fn test_truncate_forgets_functions() {
        let mut ast = Ast::new();
        ast.push(NodeKind::Null, loc(0, 4), None);
        let mark = ast.len();
        let function = NodeKind::Function(Box::new(FunctionNode {
            funbox: FunBoxId::from_index(1),
            params: vec![],
            rest: None,
            body: vec![],
        }));
        ast.push(function, loc(5, 20), None);
        assert!(ast.function_node(FunBoxId::from_index(1)).is_some());
        ast.truncate(mark);
        assert_eq!(ast.len(), 1);
        assert!(ast.function_node(FunBoxId::from_index(1)).is_none());
    }

    #[test]
    fn test_loc_until() {
        let a = loc(2, 4);
        let b = loc(8, 12);
        assert_eq!(a.until(b).span, Span::new(2, 12));
        assert_eq!(a.until(b).pos, a.pos);
    }
}
