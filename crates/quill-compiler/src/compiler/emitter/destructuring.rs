//! Destructuring. The source value sits on top of the stack; each element
//! is fetched from a copy of it and stored into its target.

use crate::ast::{NodeId, NodeKind, PropertyKey};
use crate::error::Result;

use super::super::opcodes::Op;
use super::Emitter;

/// What happens to the source value once every target is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Mode {
    /// Leave it as the value of the enclosing expression
    Assign,
    /// Pop it
    Consume,
}

impl<'a> Emitter<'a> {
    /// Destructures the value on top of the stack into `pattern`.
    pub(super) fn emit_destructuring(&mut self, pattern: NodeId, mode: Mode) -> Result<()> {
        match self.ast().kind(pattern) {
            NodeKind::ArrayPattern { elements, rest } => {
                for (index, element) in elements.iter().enumerate() {
                    let Some(element) = element else {
                        continue;
                    };
                    self.emit_op(Op::Dup)?;
                    self.emit_number(index as f64)?;
                    self.emit_op(Op::GetElem)?;
                    self.emit_element_target(*element)?;
                    self.emit_op(Op::Pop)?;
                }
                if let Some(rest) = rest {
                    self.emit_op(Op::Dup)?;
                    self.emit_count(Op::Rest, elements.len(), "pattern elements")?;
                    self.emit_assign_from_stack(*rest)?;
                    self.emit_op(Op::Pop)?;
                }
            }
            NodeKind::ObjectPattern(properties) => {
                for property in properties {
                    self.emit_op(Op::Dup)?;
                    match &property.key {
                        PropertyKey::Name(atom) => {
                            self.emit_atom_op(Op::GetProp, *atom)?;
                        }
                        PropertyKey::Number(number) => {
                            self.emit_number(*number)?;
                            self.emit_op(Op::GetElem)?;
                        }
                        PropertyKey::Computed(key) => {
                            self.emit_expression(*key)?;
                            self.emit_op(Op::GetElem)?;
                        }
                    }
                    self.emit_element_target(property.target)?;
                    self.emit_op(Op::Pop)?;
                }
            }
            other => unreachable!("destructuring into {other:?}"),
        }
        if mode == Mode::Consume {
            self.emit_op(Op::Pop)?;
        }
        Ok(())
    }

    /// Stores the fetched element on top of the stack, substituting the
    /// default for `undefined`. Leaves the stored value.
    fn emit_element_target(&mut self, target: NodeId) -> Result<()> {
        let target = match self.ast().kind(target) {
            NodeKind::WithDefault { target, default } => {
                self.emit_op(Op::Dup)?;
                self.emit_op(Op::Undefined)?;
                self.emit_op(Op::StrictEq)?;
                let skip = self.emit_jump(Op::IfEq)?;
                self.emit_op(Op::Pop)?;
                self.emit_expression(*default)?;
                let here = self.offset();
                self.patch_jump(skip, here)?;
                *target
            }
            _ => target,
        };
        self.emit_assign_from_stack(target)
    }

    /// Stores the value on top of the stack into an assignment target,
    /// leaving the value.
    pub(super) fn emit_assign_from_stack(&mut self, target: NodeId) -> Result<()> {
        match self.ast().kind(target) {
            NodeKind::Name(_) => {
                let site = self.use_of(target);
                self.emit_set_binding(site)?;
            }
            NodeKind::Member { object, property } => {
                // value obj -> obj value
                self.emit_expression(*object)?;
                self.emit_op(Op::Swap)?;
                self.emit_atom_op(Op::SetProp, *property)?;
            }
            NodeKind::Element { object, index } => {
                // value obj key -> obj key value
                self.emit_expression(*object)?;
                self.emit_expression(*index)?;
                self.emit_u8(Op::Pick, 2)?;
                self.emit_op(Op::SetElem)?;
            }
            NodeKind::ArrayPattern { .. } | NodeKind::ObjectPattern(_) => {
                self.emit_destructuring(target, Mode::Assign)?;
            }
            other => unreachable!("assignment to {other:?}"),
        }
        Ok(())
    }
}
