//! Statement emission: control flow, non-local exits, `switch` lowering and
//! exception regions.

use crate::ast::{CatchClause, DeclKind, Declarator, NodeId, NodeKind, SwitchCase, UnaryOperator};
use crate::atoms::Atom;
use crate::error::Result;
use crate::parser::{FunctionSyntax, ScopeId};

use super::super::bytecode::{TryKind, TryNote};
use super::super::opcodes::{Op, ITER_KEYS, ITER_VALUES};
use super::super::srcnotes::SrcNoteKind;
use super::destructuring::Mode;
use super::{Emitter, JumpList, StmtType};

/// Which jump chain of a frame a non-local jump joins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Exit {
    Break,
    Continue,
}

/// Values `case` labels can take in a `tableswitch`.
const TABLE_CASE_RANGE: std::ops::RangeInclusive<f64> = i16::MIN as f64..=i16::MAX as f64;

impl<'a> Emitter<'a> {
    /// Emits one statement. The stack depth is the same before and after.
    pub(crate) fn emit_statement(&mut self, node: NodeId) -> Result<()> {
        self.check_stack(node)?;
        let depth = self.depth();
        let loc = self.ast().loc(node);
        match self.ast().kind(node) {
            NodeKind::Empty => {}
            NodeKind::Function(function) => {
                let syntax = self.binder().funbox(function.funbox).syntax;
                assert_eq!(syntax, FunctionSyntax::Declaration, "function expression in statement position");
            }
            NodeKind::Expr(expr) => {
                self.update_position(loc.pos)?;
                self.emit_expression(*expr)?;
                let op = if self.keep_last_value { Op::SetRval } else { Op::Pop };
                self.emit_op(op)?;
            }
            NodeKind::VarDecl { kind, declarators } => {
                self.update_position(loc.pos)?;
                self.emit_declarations(*kind, declarators)?;
            }
            NodeKind::Block { body, scope } => self.emit_block(body, *scope)?,
            NodeKind::If {
                test,
                consequent,
                alternate,
            } => {
                self.update_position(loc.pos)?;
                self.emit_if(*test, *consequent, *alternate)?;
            }
            NodeKind::While { .. }
            | NodeKind::DoWhile { .. }
            | NodeKind::For { .. }
            | NodeKind::ForIn { .. } => {
                self.update_position(loc.pos)?;
                self.emit_loop(node, Vec::new())?;
            }
            NodeKind::Switch {
                discriminant,
                cases,
                scope,
            } => {
                self.update_position(loc.pos)?;
                self.emit_switch(*discriminant, cases, *scope)?;
            }
            NodeKind::Break(label) => {
                self.update_position(loc.pos)?;
                self.emit_break_or_continue(*label, Exit::Break)?;
            }
            NodeKind::Continue(label) => {
                self.update_position(loc.pos)?;
                self.emit_break_or_continue(*label, Exit::Continue)?;
            }
            NodeKind::Return(value) => {
                self.update_position(loc.pos)?;
                self.emit_return(*value)?;
            }
            NodeKind::Throw(value) => {
                self.update_position(loc.pos)?;
                self.emit_expression(*value)?;
                self.emit_op(Op::Throw)?;
                self.set_depth(depth);
            }
            NodeKind::Try {
                block,
                handler,
                finalizer,
            } => {
                self.update_position(loc.pos)?;
                self.emit_try(*block, handler.as_ref(), *finalizer)?;
            }
            NodeKind::With { object, body } => {
                self.update_position(loc.pos)?;
                self.emit_expression(*object)?;
                self.emit_op(Op::EnterWith)?;
                self.push_stmt(StmtType::With, Vec::new());
                self.emit_statement(*body)?;
                self.pop_stmt(StmtType::With);
                self.emit_op(Op::LeaveWith)?;
            }
            NodeKind::Labeled { .. } => self.emit_labeled(node)?,
            NodeKind::Debugger => {
                self.update_position(loc.pos)?;
                self.emit_op(Op::Debugger)?;
            }
            other => unreachable!("expression node {other:?} in statement position"),
        }
        assert_eq!(self.depth(), depth, "statement changed the stack depth");
        Ok(())
    }

    pub(super) fn emit_statements(&mut self, body: &[NodeId]) -> Result<()> {
        for &stmt in body {
            self.emit_statement(stmt)?;
        }
        Ok(())
    }

    fn emit_block(&mut self, body: &[NodeId], scope: Option<ScopeId>) -> Result<()> {
        let scoped = self.enter_block_scope(scope)?;
        self.emit_statements(body)?;
        if scoped {
            self.leave_block_scope()?;
        }
        Ok(())
    }

    // ==================== Declarations ====================

    fn emit_declarations(&mut self, kind: DeclKind, declarators: &[Declarator]) -> Result<()> {
        for declarator in declarators {
            let target = declarator.target;
            let is_pattern = matches!(
                self.ast().kind(target),
                NodeKind::ArrayPattern { .. } | NodeKind::ObjectPattern(_)
            );
            match declarator.init {
                Some(init) => self.emit_expression(init)?,
                // Hoisted vars start out undefined already.
                None if kind == DeclKind::Var => continue,
                None => {
                    self.emit_op(Op::Undefined)?;
                }
            }
            if is_pattern {
                self.emit_destructuring(target, Mode::Consume)?;
            } else {
                let site = self.use_of(target);
                self.emit_set_binding(site)?;
                self.emit_op(Op::Pop)?;
            }
        }
        Ok(())
    }

    // ==================== Conditionals ====================

    fn emit_if(&mut self, test: NodeId, consequent: NodeId, alternate: Option<NodeId>) -> Result<()> {
        self.emit_expression(test)?;
        let else_jump = self.emit_jump(Op::IfEq)?;
        self.emit_statement(consequent)?;
        match alternate {
            Some(alternate) => {
                let end_jump = self.emit_jump(Op::Goto)?;
                let here = self.offset();
                self.patch_jump(else_jump, here)?;
                self.emit_statement(alternate)?;
                let here = self.offset();
                self.patch_jump(end_jump, here)?;
            }
            None => {
                let here = self.offset();
                self.patch_jump(else_jump, here)?;
            }
        }
        Ok(())
    }

    // ==================== Labels ====================

    fn emit_labeled(&mut self, node: NodeId) -> Result<()> {
        let mut labels = Vec::new();
        let mut body = node;
        while let NodeKind::Labeled { label, body: inner } = self.ast().kind(body) {
            labels.push(*label);
            body = *inner;
        }
        match self.ast().kind(body) {
            NodeKind::While { .. } | NodeKind::DoWhile { .. } | NodeKind::For { .. } | NodeKind::ForIn { .. } => {
                self.update_position(self.ast().loc(body).pos)?;
                self.emit_loop(body, labels)
            }
            _ => {
                self.push_stmt(StmtType::Label, labels);
                self.emit_statement(body)?;
                let info = self.pop_stmt(StmtType::Label);
                self.patch_list_here(info.breaks)
            }
        }
    }

    // ==================== Loops ====================

    fn emit_loop(&mut self, node: NodeId, labels: Vec<Atom>) -> Result<()> {
        match self.ast().kind(node) {
            NodeKind::While { test, body } => self.emit_while(*test, *body, labels),
            NodeKind::DoWhile { body, test } => self.emit_do_while(*body, *test, labels),
            NodeKind::For {
                init,
                test,
                update,
                body,
                scope,
            } => self.emit_for(*init, *test, *update, *body, *scope, labels),
            NodeKind::ForIn {
                target,
                object,
                body,
                of,
                scope,
            } => self.emit_for_in(*target, *object, *body, *of, *scope, labels),
            other => unreachable!("emit_loop on {other:?}"),
        }
    }

    /// ```text
    ///         goto cond
    /// top:    loophead
    ///         <body>
    /// cond:   <test>
    ///         ifne top
    /// ```
    fn emit_while(&mut self, test: NodeId, body: NodeId, labels: Vec<Atom>) -> Result<()> {
        let entry = self.emit_jump(Op::Goto)?;
        self.note(SrcNoteKind::While, entry);
        let top = self.emit_op(Op::LoopHead)?;
        self.push_stmt(StmtType::Loop, labels);
        self.emit_statement(body)?;
        let info = self.pop_stmt(StmtType::Loop);

        let cond = self.offset();
        self.patch_jump(entry, cond)?;
        self.patch_list(info.continues, cond)?;
        self.emit_expression(test)?;
        self.emit_jump_to(Op::IfNe, top)?;
        self.patch_list_here(info.breaks)
    }

    fn emit_do_while(&mut self, body: NodeId, test: NodeId, labels: Vec<Atom>) -> Result<()> {
        let top = self.emit_op(Op::LoopHead)?;
        self.note(SrcNoteKind::DoWhile, top);
        self.push_stmt(StmtType::Loop, labels);
        self.emit_statement(body)?;
        let info = self.pop_stmt(StmtType::Loop);

        self.patch_list_here(info.continues)?;
        self.emit_expression(test)?;
        self.emit_jump_to(Op::IfNe, top)?;
        self.patch_list_here(info.breaks)
    }

    /// ```text
    ///         <init>
    ///         goto cond
    /// top:    loophead
    ///         <body>
    /// update: <update>
    /// cond:   <test>
    ///         ifne top
    /// ```
    ///
    /// Without a test the loop jumps back unconditionally and has no entry
    /// jump.
    fn emit_for(
        &mut self,
        init: Option<NodeId>,
        test: Option<NodeId>,
        update: Option<NodeId>,
        body: NodeId,
        scope: Option<ScopeId>,
        labels: Vec<Atom>,
    ) -> Result<()> {
        let scoped = self.enter_block_scope(scope)?;
        if let Some(init) = init {
            match self.ast().kind(init) {
                NodeKind::VarDecl { kind, declarators } => self.emit_declarations(*kind, declarators)?,
                _ => {
                    self.emit_expression(init)?;
                    self.emit_op(Op::Pop)?;
                }
            }
        }

        let entry = match test {
            Some(_) => Some(self.emit_jump(Op::Goto)?),
            None => None,
        };
        let note_at = entry.unwrap_or_else(|| self.offset());
        self.note(SrcNoteKind::For, note_at);
        let top = self.emit_op(Op::LoopHead)?;
        self.push_stmt(StmtType::Loop, labels);
        self.emit_statement(body)?;
        let info = self.pop_stmt(StmtType::Loop);

        self.patch_list_here(info.continues)?;
        if let Some(update) = update {
            self.update_position(self.ast().loc(update).pos)?;
            self.emit_expression(update)?;
            self.emit_op(Op::Pop)?;
        }
        match (entry, test) {
            (Some(entry), Some(test)) => {
                let cond = self.offset();
                self.patch_jump(entry, cond)?;
                self.emit_expression(test)?;
                self.emit_jump_to(Op::IfNe, top)?;
            }
            _ => {
                self.emit_jump_to(Op::Goto, top)?;
            }
        }
        self.patch_list_here(info.breaks)?;
        if scoped {
            self.leave_block_scope()?;
        }
        Ok(())
    }

    /// ```text
    ///         <object>
    ///         iter                      iter
    ///         goto cond
    /// top:    loophead                  iter value
    ///         <assign value to target>
    ///         pop                       iter
    ///         <body>
    /// cond:   moreiter                  iter value
    ///         isnoiter                  iter value done
    ///         ifeq top                  iter value
    ///         pop                       iter
    /// break:  enditer
    /// ```
    fn emit_for_in(
        &mut self,
        target: NodeId,
        object: NodeId,
        body: NodeId,
        of: bool,
        scope: Option<ScopeId>,
        labels: Vec<Atom>,
    ) -> Result<()> {
        let scoped = self.enter_block_scope(scope)?;
        let base = self.depth();
        self.emit_expression(object)?;
        self.emit_u8(Op::Iter, if of { ITER_VALUES } else { ITER_KEYS })?;
        let region_start = self.offset();

        let entry = self.emit_jump(Op::Goto)?;
        self.note(SrcNoteKind::ForIn, entry);
        self.set_depth(base + 2);
        let top = self.emit_op(Op::LoopHead)?;
        self.emit_for_in_target(target)?;
        self.emit_op(Op::Pop)?;

        self.push_stmt(StmtType::ForIn, labels);
        self.emit_statement(body)?;
        let info = self.pop_stmt(StmtType::ForIn);

        let cond = self.offset();
        self.patch_jump(entry, cond)?;
        self.patch_list(info.continues, cond)?;
        self.emit_op(Op::MoreIter)?;
        self.emit_op(Op::IsNoIter)?;
        self.emit_jump_to(Op::IfEq, top)?;
        self.emit_op(Op::Pop)?;
        self.patch_list_here(info.breaks)?;

        let region_end = self.offset();
        self.try_notes.push(TryNote {
            kind: TryKind::Iter,
            stack_depth: base + 1,
            start: region_start as u32,
            length: (region_end - region_start) as u32,
        });
        self.emit_op(Op::EndIter)?;
        if scoped {
            self.leave_block_scope()?;
        }
        Ok(())
    }

    /// Assigns the value on top of the stack to a `for-in`/`for-of` target,
    /// leaving the value.
    fn emit_for_in_target(&mut self, target: NodeId) -> Result<()> {
        match self.ast().kind(target) {
            NodeKind::VarDecl { declarators, .. } => {
                let target = declarators[0].target;
                match self.ast().kind(target) {
                    NodeKind::ArrayPattern { .. } | NodeKind::ObjectPattern(_) => {
                        self.emit_destructuring(target, Mode::Assign)
                    }
                    _ => {
                        let site = self.use_of(target);
                        self.emit_set_binding(site)
                    }
                }
            }
            _ => self.emit_assign_from_stack(target),
        }
    }

    // ==================== Switch ====================

    /// Integer value of a `case` label usable in a jump table.
    fn table_case_value(&self, test: NodeId) -> Option<i32> {
        let value = match self.ast().kind(test) {
            NodeKind::Number(v) => *v,
            NodeKind::Unary {
                operator: UnaryOperator::Minus,
                operand,
            } => match self.ast().kind(*operand) {
                NodeKind::Number(v) => -*v,
                _ => return None,
            },
            _ => return None,
        };
        (value.fract() == 0.0 && TABLE_CASE_RANGE.contains(&value)).then_some(value as i32)
    }

    /// Case values when a dense jump table is worthwhile.
    fn switch_table(&self, cases: &[SwitchCase]) -> Option<(i32, i32, Vec<Option<i32>>)> {
        let mut values = Vec::with_capacity(cases.len());
        let mut seen = rustc_hash::FxHashSet::default();
        for case in cases {
            let Some(test) = case.test else {
                values.push(None);
                continue;
            };
            let value = self.table_case_value(test)?;
            if !seen.insert(value) {
                return None;
            }
            values.push(Some(value));
        }
        let low = *seen.iter().min()?;
        let high = *seen.iter().max()?;
        let range = (high as i64 - low as i64 + 1) as u64;
        let options = self.unit.options;
        if range > options.switch_table_max_len as u64
            || range > options.switch_table_density as u64 * seen.len() as u64
        {
            return None;
        }
        Some((low, high, values))
    }

    fn emit_switch(&mut self, discriminant: NodeId, cases: &[SwitchCase], scope: Option<ScopeId>) -> Result<()> {
        let base = self.depth();
        self.emit_expression(discriminant)?;
        let scoped = self.enter_block_scope(scope)?;
        self.push_stmt(StmtType::Switch, Vec::new());

        let default_index = cases.iter().position(|c| c.test.is_none());
        let mut case_offsets = Vec::with_capacity(cases.len());

        if let Some((low, high, values)) = self.switch_table(cases) {
            let switch_at = self.emit_table_switch(low, high)?;
            self.note(SrcNoteKind::TableSwitch, switch_at);
            for case in cases {
                case_offsets.push(self.offset());
                self.emit_statements(&case.body)?;
            }
            let end = self.offset();
            let default_target = default_index.map_or(end, |i| case_offsets[i]);
            let delta = self.jump_delta(switch_at, default_target)?;
            self.patch_i32(switch_at + 1, delta);
            let count = (high as i64 - low as i64 + 1) as usize;
            let mut targets = vec![default_target; count];
            for (i, value) in values.iter().enumerate() {
                if let Some(value) = value {
                    targets[(*value as i64 - low as i64) as usize] = case_offsets[i];
                }
            }
            for (i, target) in targets.into_iter().enumerate() {
                let delta = self.jump_delta(switch_at, target)?;
                self.patch_i32(switch_at + 13 + 4 * i, delta);
            }
        } else {
            let switch_at = self.emit_op(Op::CondSwitch)?;
            self.note(SrcNoteKind::CondSwitch, switch_at);
            let mut case_jumps = Vec::with_capacity(cases.len());
            for case in cases {
                match case.test {
                    Some(test) => {
                        self.update_position(case.loc.pos)?;
                        self.emit_expression(test)?;
                        case_jumps.push(Some(self.emit_jump(Op::Case)?));
                    }
                    None => case_jumps.push(None),
                }
            }
            let default_jump = self.emit_jump(Op::Default)?;
            self.set_depth(base);
            for (case, jump) in cases.iter().zip(&case_jumps) {
                let here = self.offset();
                if let Some(jump) = jump {
                    self.patch_jump(*jump, here)?;
                }
                case_offsets.push(here);
                self.emit_statements(&case.body)?;
            }
            let end = self.offset();
            let default_target = default_index.map_or(end, |i| case_offsets[i]);
            self.patch_jump(default_jump, default_target)?;
        }

        let info = self.pop_stmt(StmtType::Switch);
        self.patch_list_here(info.breaks)?;
        if scoped {
            self.leave_block_scope()?;
        }
        Ok(())
    }

    // ==================== Non-local exits ====================

    /// Emits what leaving frame `index` (exclusive) from the current point
    /// requires, innermost first. The stack depth is restored afterwards
    /// since control does not fall through to the next instruction.
    fn emit_teardown(&mut self, index: usize) -> Result<()> {
        for i in (index..self.stmts.len()).rev() {
            match self.stmts[i].kind {
                StmtType::Scope => {
                    self.emit_op(Op::LeaveBlock)?;
                }
                StmtType::With => {
                    self.emit_op(Op::LeaveWith)?;
                }
                StmtType::ForIn => {
                    self.emit_op(Op::EndIter)?;
                }
                StmtType::TryFinally => {
                    let mut gosubs = self.stmts[i].gosubs;
                    self.emit_jump_into(Op::Gosub, &mut gosubs)?;
                    self.stmts[i].gosubs = gosubs;
                }
                StmtType::FinallyBody => {
                    self.emit_op(Op::Pop)?;
                    self.emit_op(Op::Pop)?;
                }
                StmtType::Label | StmtType::Loop | StmtType::Switch => {}
            }
        }
        Ok(())
    }

    fn emit_break_or_continue(&mut self, label: Option<Atom>, exit: Exit) -> Result<()> {
        let target = match label {
            Some(label) => self
                .stmts
                .iter()
                .rposition(|s| s.labels.contains(&label))
                .expect("label resolved by the parser"),
            None => self
                .stmts
                .iter()
                .rposition(|s| match exit {
                    Exit::Break => s.is_loop() || s.kind == StmtType::Switch,
                    Exit::Continue => s.is_loop(),
                })
                .expect("break/continue target checked by the parser"),
        };
        let depth = self.depth();
        self.emit_teardown(target + 1)?;
        let mut list = match exit {
            Exit::Break => self.stmts[target].breaks,
            Exit::Continue => self.stmts[target].continues,
        };
        self.emit_jump_into(Op::Goto, &mut list)?;
        match exit {
            Exit::Break => self.stmts[target].breaks = list,
            Exit::Continue => self.stmts[target].continues = list,
        }
        self.set_depth(depth);
        Ok(())
    }

    fn emit_return(&mut self, value: Option<NodeId>) -> Result<()> {
        let depth = self.depth();
        match value {
            Some(value) => self.emit_expression(value)?,
            None => {
                self.emit_op(Op::Undefined)?;
            }
        }
        let needs_teardown = self.stmts.iter().any(|s| {
            matches!(
                s.kind,
                StmtType::Scope | StmtType::With | StmtType::ForIn | StmtType::TryFinally | StmtType::FinallyBody
            )
        });
        if needs_teardown {
            self.emit_op(Op::SetRval)?;
            self.emit_teardown(0)?;
            self.emit_op(Op::RetRval)?;
        } else {
            self.emit_op(Op::Return)?;
        }
        self.set_depth(depth);
        Ok(())
    }

    // ==================== Exceptions ====================

    /// ```text
    ///         try
    /// start:  <block>
    ///         [gosub finally]
    ///         goto end
    /// catch:  exception                 (catch note: start..catch)
    ///         <bind parameter>
    ///         <handler>
    ///         [gosub finally]
    ///         goto end
    /// finally:finally                   (finally note: start..finally)
    ///         <finalizer>
    ///         retsub
    /// end:
    /// ```
    fn emit_try(&mut self, block: NodeId, handler: Option<&CatchClause>, finalizer: Option<NodeId>) -> Result<()> {
        let depth = self.depth();
        self.emit_op(Op::Try)?;
        let start = self.offset();
        if finalizer.is_some() {
            self.push_stmt(StmtType::TryFinally, Vec::new());
        }

        let mut end_jumps = JumpList::default();
        self.emit_statement(block)?;
        if finalizer.is_some() {
            self.emit_gosub()?;
        }
        self.emit_jump_into(Op::Goto, &mut end_jumps)?;

        if let Some(handler) = handler {
            let catch_start = self.offset();
            self.try_notes.push(TryNote {
                kind: TryKind::Catch,
                stack_depth: depth,
                start: start as u32,
                length: (catch_start - start) as u32,
            });
            self.set_depth(depth);
            self.emit_op(Op::Exception)?;
            self.emit_catch(handler)?;
            if finalizer.is_some() {
                self.emit_gosub()?;
            }
            self.emit_jump_into(Op::Goto, &mut end_jumps)?;
        }

        if let Some(finalizer) = finalizer {
            let info = self.pop_stmt(StmtType::TryFinally);
            let finally_start = self.offset();
            self.try_notes.push(TryNote {
                kind: TryKind::Finally,
                stack_depth: depth,
                start: start as u32,
                length: (finally_start - start) as u32,
            });
            self.patch_list(info.gosubs, finally_start)?;
            self.set_depth(depth);
            self.emit_op(Op::Finally)?;
            self.push_stmt(StmtType::FinallyBody, Vec::new());
            self.emit_statement(finalizer)?;
            self.pop_stmt(StmtType::FinallyBody);
            self.emit_op(Op::Retsub)?;
        }

        self.patch_list_here(end_jumps)?;
        self.set_depth(depth);
        Ok(())
    }

    /// Emits a `gosub` to the innermost `finally` block.
    fn emit_gosub(&mut self) -> Result<()> {
        let index = self
            .stmts
            .iter()
            .rposition(|s| s.kind == StmtType::TryFinally)
            .expect("gosub outside try-finally");
        let mut gosubs = self.stmts[index].gosubs;
        self.emit_jump_into(Op::Gosub, &mut gosubs)?;
        self.stmts[index].gosubs = gosubs;
        Ok(())
    }

    /// Binds the exception on top of the stack and runs the handler.
    fn emit_catch(&mut self, handler: &CatchClause) -> Result<()> {
        let scoped = self.enter_block_scope(Some(handler.scope))?;
        match handler.param {
            Some(param) if matches!(
                self.ast().kind(param),
                NodeKind::ArrayPattern { .. } | NodeKind::ObjectPattern(_)
            ) =>
            {
                self.emit_destructuring(param, Mode::Consume)?;
            }
            Some(param) => {
                let site = self.use_of(param);
                self.emit_set_binding(site)?;
                self.emit_op(Op::Pop)?;
            }
            None => {
                self.emit_op(Op::Pop)?;
            }
        }
        self.emit_statement(handler.body)?;
        if scoped {
            self.leave_block_scope()?;
        }
        Ok(())
    }
}
