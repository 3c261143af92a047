//! Expression emission. Every expression leaves exactly one value on the
//! stack.
//!
//! Binary operator chains and member access chains can be far longer than
//! the parser's nesting limit, so both are emitted with an explicit work
//! list instead of recursion.

use crate::ast::{
    AssignmentOperator, BinaryOperator, LogicalOperator, NodeId, NodeKind, Property, PropertyKey, UnaryOperator,
    UpdateOperator,
};
use crate::atoms::Atom;
use crate::error::{CompileError, Result};

use super::super::bytecode::{Const, PoolObject, TryKind, TryNote};
use super::super::opcodes::{Op, ITER_VALUES};
use super::super::srcnotes::SrcNoteKind;
use super::destructuring::Mode;
use super::{Access, Emitter, JumpList};

/// Pending step of an operator chain.
enum ChainStep {
    Operand(NodeId),
    Apply(Op),
}

/// Opcode computing a binary operator.
pub(super) fn binary_op(operator: BinaryOperator) -> Op {
    match operator {
        BinaryOperator::Add => Op::Add,
        BinaryOperator::Subtract => Op::Sub,
        BinaryOperator::Multiply => Op::Mul,
        BinaryOperator::Divide => Op::Div,
        BinaryOperator::Modulo => Op::Mod,
        BinaryOperator::Exponent => Op::Pow,
        BinaryOperator::Equal => Op::Eq,
        BinaryOperator::NotEqual => Op::Ne,
        BinaryOperator::StrictEqual => Op::StrictEq,
        BinaryOperator::StrictNotEqual => Op::StrictNe,
        BinaryOperator::LessThan => Op::Lt,
        BinaryOperator::LessThanEqual => Op::Le,
        BinaryOperator::GreaterThan => Op::Gt,
        BinaryOperator::GreaterThanEqual => Op::Ge,
        BinaryOperator::BitwiseAnd => Op::BitAnd,
        BinaryOperator::BitwiseOr => Op::BitOr,
        BinaryOperator::BitwiseXor => Op::BitXor,
        BinaryOperator::LeftShift => Op::Lsh,
        BinaryOperator::RightShift => Op::Rsh,
        BinaryOperator::UnsignedRightShift => Op::Ursh,
        BinaryOperator::In => Op::In,
        BinaryOperator::InstanceOf => Op::InstanceOf,
    }
}

impl<'a> Emitter<'a> {
    /// Emits an expression, pushing its value.
    pub(crate) fn emit_expression(&mut self, node: NodeId) -> Result<()> {
        self.check_stack(node)?;
        let depth = self.depth();
        match self.ast().kind(node) {
            NodeKind::Number(value) => self.emit_number(*value)?,
            NodeKind::String(atom) => {
                self.emit_atom_op(Op::String, *atom)?;
            }
            NodeKind::Template { quasis, exprs } => self.emit_template(quasis, exprs)?,
            NodeKind::RegExp { pattern, flags } => {
                let object = PoolObject::RegExp {
                    pattern: self.unit.atoms.get(*pattern).to_string(),
                    flags: self.unit.atoms.get(*flags).to_string(),
                };
                let index = self.object_index(object)?;
                self.emit_u32(Op::RegExp, index)?;
            }
            NodeKind::BigInt(value) => {
                let index = self.const_index(Const::BigInt((**value).clone()))?;
                self.emit_u32(Op::BigInt, index)?;
            }
            NodeKind::Boolean(value) => {
                self.emit_op(if *value { Op::True } else { Op::False })?;
            }
            NodeKind::Null => {
                self.emit_op(Op::Null)?;
            }
            NodeKind::This => {
                self.emit_op(Op::This)?;
            }
            NodeKind::Name(_) => {
                let site = self.use_of(node);
                self.emit_get_binding(site)?;
            }
            NodeKind::Array(elements) => self.emit_array(elements)?,
            NodeKind::Object(properties) => self.emit_object(properties)?,
            NodeKind::Function(function) => self.emit_lambda(function.funbox)?,
            NodeKind::Unary { operator, operand } => self.emit_unary(*operator, *operand)?,
            NodeKind::Update {
                operator,
                prefix,
                operand,
            } => self.emit_update(*operator, *prefix, *operand)?,
            NodeKind::Binary { .. } => self.emit_binary_chain(node)?,
            NodeKind::Logical { .. } => self.emit_logical_chain(node)?,
            NodeKind::Conditional {
                test,
                consequent,
                alternate,
            } => {
                self.emit_expression(*test)?;
                let else_jump = self.emit_jump(Op::IfEq)?;
                self.emit_expression(*consequent)?;
                let end_jump = self.emit_jump(Op::Goto)?;
                self.set_depth(depth);
                let here = self.offset();
                self.patch_jump(else_jump, here)?;
                self.emit_expression(*alternate)?;
                let here = self.offset();
                self.patch_jump(end_jump, here)?;
            }
            NodeKind::Assign {
                operator,
                target,
                value,
            } => self.emit_assignment(*operator, *target, *value)?,
            NodeKind::Sequence(items) => {
                let (last, init) = items.split_last().expect("empty comma expression");
                for &item in init {
                    self.emit_expression(item)?;
                    self.emit_op(Op::Pop)?;
                }
                self.emit_expression(*last)?;
            }
            NodeKind::Call { callee, args, eval } => self.emit_call(node, *callee, args, *eval)?,
            NodeKind::New { callee, args } => {
                self.emit_expression(*callee)?;
                self.emit_arguments(args)?;
                self.emit_count(Op::New, args.len(), "arguments")?;
            }
            NodeKind::Member { .. } | NodeKind::Element { .. } => self.emit_member_chain(node)?,
            NodeKind::Yield {
                argument,
                delegate: false,
            } => {
                match argument {
                    Some(argument) => self.emit_expression(*argument)?,
                    None => {
                        self.emit_op(Op::Undefined)?;
                    }
                }
                self.emit_op(Op::Yield)?;
            }
            NodeKind::Yield {
                argument: Some(argument),
                delegate: true,
            } => self.emit_yield_star(*argument)?,
            other => unreachable!("{other:?} in expression position"),
        }
        debug_assert_eq!(self.depth(), depth + 1, "expression must push one value");
        Ok(())
    }

    // ==================== Literals ====================

    /// Pushes a number with the shortest instruction that represents it
    /// exactly.
    pub(super) fn emit_number(&mut self, value: f64) -> Result<()> {
        if value == 0.0 && value.is_sign_positive() {
            self.emit_op(Op::Zero)?;
            return Ok(());
        }
        if value == 1.0 {
            self.emit_op(Op::One)?;
            return Ok(());
        }
        let integral = value.fract() == 0.0 && value != 0.0;
        if integral && (i8::MIN as f64..=i8::MAX as f64).contains(&value) {
            self.emit_u8(Op::Int8, value as i8 as u8)?;
        } else if integral && (0.0..=u16::MAX as f64).contains(&value) {
            self.emit_u16(Op::Uint16, value as u16)?;
        } else if integral && (i32::MIN as f64..=i32::MAX as f64).contains(&value) {
            self.emit_i32(Op::Int32, value as i32)?;
        } else {
            let index = self.const_index(Const::Number(value))?;
            self.emit_u32(Op::Double, index)?;
        }
        Ok(())
    }

    fn emit_template(&mut self, quasis: &[Atom], exprs: &[NodeId]) -> Result<()> {
        self.emit_atom_op(Op::String, quasis[0])?;
        for (expr, &quasi) in exprs.iter().zip(&quasis[1..]) {
            self.emit_expression(*expr)?;
            self.emit_op(Op::ToString)?;
            self.emit_op(Op::Add)?;
            if quasi != Atom::EMPTY {
                self.emit_atom_op(Op::String, quasi)?;
                self.emit_op(Op::Add)?;
            }
        }
        Ok(())
    }

    fn emit_array(&mut self, elements: &[Option<NodeId>]) -> Result<()> {
        let len = u32::try_from(elements.len())
            .map_err(|_| CompileError::limit("array literal too large", self.pos))?;
        self.emit_u32(Op::NewArray, len)?;
        for (index, element) in elements.iter().enumerate() {
            if let Some(element) = element {
                self.emit_expression(*element)?;
                self.emit_u32(Op::InitElemArray, index as u32)?;
            }
        }
        Ok(())
    }

    fn emit_object(&mut self, properties: &[Property]) -> Result<()> {
        self.emit_op(Op::NewObject)?;
        for property in properties {
            match &property.key {
                PropertyKey::Name(atom) => {
                    self.emit_expression(property.value)?;
                    self.emit_atom_op(Op::InitProp, *atom)?;
                }
                PropertyKey::Number(number) => {
                    self.emit_number(*number)?;
                    self.emit_expression(property.value)?;
                    self.emit_op(Op::InitElem)?;
                }
                PropertyKey::Computed(key) => {
                    self.emit_expression(*key)?;
                    self.emit_expression(property.value)?;
                    self.emit_op(Op::InitElem)?;
                }
            }
        }
        Ok(())
    }

    // ==================== Operators ====================

    fn emit_unary(&mut self, operator: UnaryOperator, operand: NodeId) -> Result<()> {
        let op = match operator {
            UnaryOperator::Minus => {
                if let NodeKind::Number(value) = self.ast().kind(operand) {
                    return self.emit_number(-*value);
                }
                Op::Neg
            }
            UnaryOperator::Plus => Op::Pos,
            UnaryOperator::LogicalNot => Op::Not,
            UnaryOperator::BitwiseNot => Op::BitNot,
            UnaryOperator::Void => Op::Void,
            UnaryOperator::Typeof => {
                if let NodeKind::Name(_) = self.ast().kind(operand)
                    && let Access::Name(atom) | Access::Global(atom) = self.access(self.use_of(operand))?
                {
                    self.emit_atom_op(Op::TypeOfName, atom)?;
                    return Ok(());
                }
                Op::TypeOf
            }
            UnaryOperator::Delete => return self.emit_delete(operand),
        };
        self.emit_expression(operand)?;
        self.emit_op(op)?;
        Ok(())
    }

    fn emit_delete(&mut self, operand: NodeId) -> Result<()> {
        match self.ast().kind(operand) {
            NodeKind::Name(_) => match self.access(self.use_of(operand))? {
                Access::Name(atom) | Access::Global(atom) => {
                    self.emit_atom_op(Op::DelName, atom)?;
                }
                // Declared bindings cannot be deleted.
                _ => {
                    self.emit_op(Op::False)?;
                }
            },
            NodeKind::Member { object, property } => {
                self.emit_expression(*object)?;
                self.emit_atom_op(Op::DelProp, *property)?;
            }
            NodeKind::Element { object, index } => {
                self.emit_expression(*object)?;
                self.emit_expression(*index)?;
                self.emit_op(Op::DelElem)?;
            }
            _ => {
                self.emit_expression(operand)?;
                self.emit_op(Op::Pop)?;
                self.emit_op(Op::True)?;
            }
        }
        Ok(())
    }

    fn emit_update(&mut self, operator: UpdateOperator, prefix: bool, operand: NodeId) -> Result<()> {
        let op = match operator {
            UpdateOperator::Increment => Op::Add,
            UpdateOperator::Decrement => Op::Sub,
        };
        match self.ast().kind(operand) {
            NodeKind::Name(_) => {
                let site = self.use_of(operand);
                self.emit_get_binding(site)?;
                self.emit_op(Op::ToNumeric)?;
                if !prefix {
                    self.emit_op(Op::Dup)?;
                }
                self.emit_op(Op::One)?;
                self.emit_op(op)?;
                self.emit_set_binding(site)?;
                if !prefix {
                    self.emit_op(Op::Pop)?;
                }
            }
            NodeKind::Member { object, property } => {
                // obj obj -> obj old
                self.emit_expression(*object)?;
                self.emit_op(Op::Dup)?;
                self.emit_atom_op(Op::GetProp, *property)?;
                self.emit_op(Op::ToNumeric)?;
                if !prefix {
                    // old obj old
                    self.emit_op(Op::Dup)?;
                    self.emit_u8(Op::Pick, 2)?;
                    self.emit_op(Op::Swap)?;
                }
                self.emit_op(Op::One)?;
                self.emit_op(op)?;
                self.emit_atom_op(Op::SetProp, *property)?;
                if !prefix {
                    self.emit_op(Op::Pop)?;
                }
            }
            NodeKind::Element { object, index } => {
                self.emit_expression(*object)?;
                self.emit_expression(*index)?;
                self.emit_op(Op::Dup2)?;
                self.emit_op(Op::GetElem)?;
                self.emit_op(Op::ToNumeric)?;
                if !prefix {
                    // old obj key old
                    self.emit_op(Op::Dup)?;
                    self.emit_u8(Op::Pick, 3)?;
                    self.emit_u8(Op::Pick, 3)?;
                    self.emit_u8(Op::Pick, 2)?;
                }
                self.emit_op(Op::One)?;
                self.emit_op(op)?;
                self.emit_op(Op::SetElem)?;
                if !prefix {
                    self.emit_op(Op::Pop)?;
                }
            }
            other => unreachable!("update of {other:?}"),
        }
        Ok(())
    }

    /// Emits a tree of binary operators in postfix order.
    fn emit_binary_chain(&mut self, node: NodeId) -> Result<()> {
        let mut work = vec![ChainStep::Operand(node)];
        while let Some(step) = work.pop() {
            match step {
                ChainStep::Apply(op) => {
                    self.emit_op(op)?;
                }
                ChainStep::Operand(id) => match self.ast().kind(id) {
                    NodeKind::Binary { operator, left, right } => {
                        work.push(ChainStep::Apply(binary_op(*operator)));
                        work.push(ChainStep::Operand(*right));
                        work.push(ChainStep::Operand(*left));
                    }
                    _ => self.emit_expression(id)?,
                },
            }
        }
        Ok(())
    }

    /// `a && b && c`: each link jumps to the end with its value when it
    /// decides the result, and otherwise pops it.
    fn emit_logical_chain(&mut self, node: NodeId) -> Result<()> {
        let NodeKind::Logical { operator, .. } = self.ast().kind(node) else {
            unreachable!();
        };
        let operator = *operator;
        let mut operands = Vec::new();
        let mut spine = node;
        while let NodeKind::Logical {
            operator: op,
            left,
            right,
        } = self.ast().kind(spine)
            && *op == operator
        {
            operands.push(*right);
            spine = *left;
        }
        operands.push(spine);

        let jump = match operator {
            LogicalOperator::And => Op::And,
            LogicalOperator::Or => Op::Or,
            LogicalOperator::NullishCoalescing => Op::Coalesce,
        };
        let mut end = JumpList::default();
        let first = operands.pop().expect("logical chain has operands");
        self.emit_expression(first)?;
        while let Some(operand) = operands.pop() {
            self.emit_jump_into(jump, &mut end)?;
            self.emit_op(Op::Pop)?;
            self.emit_expression(operand)?;
        }
        self.patch_list_here(end)
    }

    // ==================== Assignment ====================

    fn emit_assignment(&mut self, operator: AssignmentOperator, target: NodeId, value: NodeId) -> Result<()> {
        let compound = match operator {
            AssignmentOperator::Assign => None,
            AssignmentOperator::Compound(op) => Some(binary_op(op)),
        };
        match (self.ast().kind(target), compound) {
            (NodeKind::Name(_), None) => {
                self.emit_expression(value)?;
                let site = self.use_of(target);
                self.emit_set_binding(site)?;
            }
            (NodeKind::Name(_), Some(op)) => {
                let site = self.use_of(target);
                self.emit_get_binding(site)?;
                self.emit_expression(value)?;
                self.emit_compound_op(op)?;
                self.emit_set_binding(site)?;
            }
            (NodeKind::Member { object, property }, None) => {
                self.emit_expression(*object)?;
                self.emit_expression(value)?;
                self.emit_atom_op(Op::SetProp, *property)?;
            }
            (NodeKind::Member { object, property }, Some(op)) => {
                self.emit_expression(*object)?;
                self.emit_op(Op::Dup)?;
                self.emit_atom_op(Op::GetProp, *property)?;
                self.emit_expression(value)?;
                self.emit_compound_op(op)?;
                self.emit_atom_op(Op::SetProp, *property)?;
            }
            (NodeKind::Element { object, index }, None) => {
                self.emit_expression(*object)?;
                self.emit_expression(*index)?;
                self.emit_expression(value)?;
                self.emit_op(Op::SetElem)?;
            }
            (NodeKind::Element { object, index }, Some(op)) => {
                self.emit_expression(*object)?;
                self.emit_expression(*index)?;
                self.emit_op(Op::Dup2)?;
                self.emit_op(Op::GetElem)?;
                self.emit_expression(value)?;
                self.emit_compound_op(op)?;
                self.emit_op(Op::SetElem)?;
            }
            (NodeKind::ArrayPattern { .. } | NodeKind::ObjectPattern(_), None) => {
                self.emit_expression(value)?;
                self.emit_destructuring(target, Mode::Assign)?;
            }
            (other, _) => unreachable!("assignment to {other:?}"),
        }
        Ok(())
    }

    fn emit_compound_op(&mut self, op: Op) -> Result<()> {
        let at = self.emit_op(op)?;
        self.note(SrcNoteKind::AssignOp, at);
        Ok(())
    }

    // ==================== Property access ====================

    /// Emits `a.b[c].d` without recursing once per link.
    fn emit_member_chain(&mut self, node: NodeId) -> Result<()> {
        let mut links = Vec::new();
        let mut base = node;
        loop {
            match self.ast().kind(base) {
                NodeKind::Member { object, .. } | NodeKind::Element { object, .. } => {
                    links.push(base);
                    base = *object;
                }
                _ => break,
            }
        }
        self.emit_expression(base)?;
        for &link in links.iter().rev() {
            match self.ast().kind(link) {
                NodeKind::Member { property, .. } => {
                    self.emit_atom_op(Op::GetProp, *property)?;
                }
                NodeKind::Element { index, .. } => {
                    self.emit_expression(*index)?;
                    self.emit_op(Op::GetElem)?;
                }
                _ => unreachable!(),
            }
        }
        Ok(())
    }

    // ==================== Calls ====================

    fn emit_arguments(&mut self, args: &[NodeId]) -> Result<()> {
        for &arg in args {
            self.emit_expression(arg)?;
        }
        Ok(())
    }

    /// Pushes the callee and its `this` value, then the arguments.
    fn emit_call(&mut self, node: NodeId, callee: NodeId, args: &[NodeId], eval: bool) -> Result<()> {
        self.update_position(self.ast().loc(node).pos)?;
        match self.ast().kind(callee) {
            NodeKind::Member { object, property } => {
                self.emit_expression(*object)?;
                self.emit_op(Op::Dup)?;
                self.emit_atom_op(Op::GetProp, *property)?;
                self.emit_op(Op::Swap)?;
            }
            NodeKind::Element { object, index } => {
                self.emit_expression(*object)?;
                self.emit_op(Op::Dup)?;
                self.emit_expression(*index)?;
                self.emit_op(Op::GetElem)?;
                self.emit_op(Op::Swap)?;
            }
            _ => {
                self.emit_expression(callee)?;
                self.emit_op(Op::Undefined)?;
            }
        }
        self.emit_arguments(args)?;
        let op = if eval { Op::Eval } else { Op::Call };
        self.emit_count(op, args.len(), "arguments")?;
        Ok(())
    }

    // ==================== Generators ====================

    /// `yield* expr`: forwards values and thrown exceptions to the inner
    /// iterator until it reports `done`.
    ///
    /// ```text
    ///         <expr>
    ///         iter                       iter
    ///         undefined                  iter received
    /// top:    loophead
    ///         <call iter.next(received)> iter result
    /// check:  dup; getprop "done"; ifne exit
    ///         try
    ///         yield                      iter received
    ///         goto top
    /// catch:  <call iter.throw(exc)>     iter result
    ///         goto check
    /// exit:   getprop "value"; swap; enditer
    /// ```
    fn emit_yield_star(&mut self, argument: NodeId) -> Result<()> {
        let base = self.depth();
        self.emit_expression(argument)?;
        self.emit_u8(Op::Iter, ITER_VALUES)?;
        self.emit_op(Op::Undefined)?;

        let top = self.emit_op(Op::LoopHead)?;
        // received iter -> iter next iter received
        self.emit_op(Op::Swap)?;
        self.emit_op(Op::Dup)?;
        self.emit_op(Op::Dup)?;
        self.emit_atom_op(Op::GetProp, Atom::NEXT)?;
        self.emit_op(Op::Swap)?;
        self.emit_u8(Op::Pick, 3)?;
        self.emit_u16(Op::Call, 1)?;

        let check = self.offset();
        self.emit_op(Op::Dup)?;
        self.emit_atom_op(Op::GetProp, Atom::DONE)?;
        let exit = self.emit_jump(Op::IfNe)?;

        self.emit_op(Op::Try)?;
        let try_start = self.offset();
        self.emit_op(Op::Yield)?;
        self.emit_jump_to(Op::Goto, top)?;

        let handler = self.offset();
        self.try_notes.push(TryNote {
            kind: TryKind::Catch,
            stack_depth: base + 2,
            start: try_start as u32,
            length: (handler - try_start) as u32,
        });
        self.set_depth(base + 2);
        // iter result exc -> exc iter
        self.emit_op(Op::Exception)?;
        self.emit_op(Op::Swap)?;
        self.emit_op(Op::Pop)?;
        self.emit_op(Op::Swap)?;
        self.emit_op(Op::Dup)?;
        self.emit_atom_op(Op::GetProp, Atom::THROW)?;
        self.emit_op(Op::Dup)?;
        self.emit_op(Op::Undefined)?;
        self.emit_op(Op::StrictEq)?;
        let rethrow = self.emit_jump(Op::IfNe)?;
        // exc iter throw -> iter throw iter exc
        self.emit_op(Op::Swap)?;
        self.emit_op(Op::Dup)?;
        self.emit_u8(Op::Pick, 2)?;
        self.emit_op(Op::Swap)?;
        self.emit_u8(Op::Pick, 3)?;
        self.emit_u16(Op::Call, 1)?;
        self.emit_jump_to(Op::Goto, check)?;

        // No `throw` method: propagate the exception.
        self.set_depth(base + 3);
        let here = self.offset();
        self.patch_jump(rethrow, here)?;
        self.emit_op(Op::Pop)?;
        self.emit_op(Op::Pop)?;
        self.emit_op(Op::Throw)?;

        self.set_depth(base + 2);
        let here = self.offset();
        self.patch_jump(exit, here)?;
        self.emit_atom_op(Op::GetProp, Atom::VALUE)?;
        self.emit_op(Op::Swap)?;
        self.emit_op(Op::EndIter)?;
        Ok(())
    }
}
