//! Bytecode emitter.
//!
//! One [`Emitter`] compiles one function body into a [`CompiledFunction`].
//! Nested functions get an emitter of their own and land in the object pool
//! of the function that creates them.
//!
//! The emitter tracks the operand stack depth after every instruction it
//! writes. Forward jumps whose target is not known yet are kept on
//! back-patch chains: each pending jump's operand holds the distance back to
//! the previous pending jump on the same chain, and zero ends the chain.
//! Patching walks the chain and overwrites each operand with the real
//! offset.

mod destructuring;
mod expressions;
mod statements;
#[cfg(test)]
mod tests;

use rustc_hash::FxHashMap;

use crate::ast::{Ast, NodeId, NodeKind};
use crate::atoms::{Atom, AtomTable};
use crate::error::{CompileError, Result};
use crate::lexer::SourcePos;
use crate::options::CompileOptions;
use crate::parser::{Binder, Cookie, DefId, DefKind, FunBoxId, FunctionKind, ParseOutput, ScopeId, Slot, UseId};
use crate::stack::StackBase;

use super::bytecode::{
    Binding, Bindings, BlockScope, BlockScopeNote, CompiledFunction, Const, FunctionFlags, LazyFunction, PoolObject,
    TryNote,
};
use super::opcodes::{read_i32, stack_defs, stack_uses, write_i32, Op};
use super::srcnotes::{zigzag, SrcNoteKind, SrcNoteWriter, MAX_OPERAND};

/// Jump operands are signed 32-bit offsets, which bounds the code size.
const MAX_CODE_LENGTH: usize = i32::MAX as usize;

/// Line changes up to this many lines are written as `NewLine` notes.
const NEWLINE_RUN_MAX: u32 = 3;

/// Read-only view of a parsed unit.
#[derive(Debug, Clone, Copy)]
pub struct Unit<'a> {
    pub ast: &'a Ast,
    pub binder: &'a Binder,
    pub atoms: &'a AtomTable,
    pub options: &'a CompileOptions,
    stack: StackBase,
}

impl<'a> Unit<'a> {
    /// Borrows a parse result. Stack use of the emitter is measured from
    /// the caller's frame.
    pub fn new(parsed: &'a ParseOutput, options: &'a CompileOptions) -> Self {
        Self {
            ast: &parsed.ast,
            binder: &parsed.binder,
            atoms: &parsed.atoms,
            options,
            stack: StackBase::here(),
        }
    }

    fn check_stack(&self, pos: SourcePos) -> Result<()> {
        if self.stack.exhausted(self.options.max_stack_bytes) {
            return Err(CompileError::limit("source nesting too deep", pos));
        }
        Ok(())
    }
}

/// Compiles the top-level code of a parsed script.
pub fn emit_script(parsed: &ParseOutput, options: &CompileOptions) -> Result<CompiledFunction> {
    let unit = Unit::new(parsed, options);
    let mut emitter = Emitter::new(unit, parsed.root);
    emitter.keep_last_value = options.keep_last_value;
    let scope = unit.binder.funbox(parsed.root).scope;
    emitter.emit_function_decls(scope)?;
    for &stmt in &parsed.body {
        emitter.emit_statement(stmt)?;
    }
    emitter.emit_op(Op::RetRval)?;
    let compiled = emitter.finish();
    tracing::debug!(
        bytes = compiled.code.len(),
        functions = compiled.function_count(),
        max_stack = compiled.max_stack_depth,
        "emitted script"
    );
    Ok(compiled)
}

/// Compiles a function node and every function nested in it.
pub fn emit_function(unit: Unit<'_>, node: NodeId) -> Result<CompiledFunction> {
    let NodeKind::Function(function) = unit.ast.kind(node) else {
        unreachable!("emit_function on a non-function node");
    };
    unit.check_stack(unit.ast.loc(node).pos)?;
    let mut emitter = Emitter::new(unit, function.funbox);
    emitter.pos = unit.ast.loc(node).pos;
    emitter.emit_prologue(&function.params, function.rest)?;
    for &stmt in &function.body {
        emitter.emit_statement(stmt)?;
    }
    emitter.emit_op(Op::RetRval)?;
    Ok(emitter.finish())
}

/// A chain of forward jumps waiting for the same target.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(super) struct JumpList {
    last: Option<usize>,
}

impl JumpList {
    pub(super) fn is_empty(&self) -> bool {
        self.last.is_none()
    }
}

/// Statement frames that `break`, `continue` and `return` must know about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum StmtType {
    /// Labeled non-loop statement
    Label,
    /// `while`, `do-while` or `for`
    Loop,
    /// `for-in`/`for-of`: an iterator sits on the stack
    ForIn,
    Switch,
    /// Entered block scope
    Scope,
    With,
    /// `try` or `catch` block of a statement with a `finally`
    TryFinally,
    /// The `finally` block itself: two values sit on the stack
    FinallyBody,
}

#[derive(Debug)]
pub(super) struct StmtInfo {
    pub(super) kind: StmtType,
    pub(super) labels: Vec<Atom>,
    pub(super) breaks: JumpList,
    pub(super) continues: JumpList,
    pub(super) gosubs: JumpList,
}

impl StmtInfo {
    pub(super) fn is_loop(&self) -> bool {
        matches!(self.kind, StmtType::Loop | StmtType::ForIn)
    }
}

/// How a binding is reached from the current function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Access {
    Arg(u16),
    Local(u16),
    Upvar { skip: u16, index: u16 },
    /// Dynamic lookup by name
    Name(Atom),
    /// Property of the global object
    Global(Atom),
}

/// Compiles one function body.
pub struct Emitter<'a> {
    pub(super) unit: Unit<'a>,
    pub(super) funbox: FunBoxId,
    code: Vec<u8>,
    depth: u32,
    max_depth: u32,
    atom_pool: Vec<String>,
    atom_indices: FxHashMap<Atom, u32>,
    consts: Vec<Const>,
    objects: Vec<PoolObject>,
    pub(super) try_notes: Vec<TryNote>,
    block_notes: Vec<BlockScopeNote>,
    open_blocks: Vec<u32>,
    notes: SrcNoteWriter,
    line: u32,
    column: u32,
    pub(super) stmts: Vec<StmtInfo>,
    /// Expression statements store into the return value register
    pub(super) keep_last_value: bool,
    /// Position of the construct being emitted, for errors
    pub(super) pos: SourcePos,
}

impl<'a> Emitter<'a> {
    /// Creates an emitter for `funbox`.
    pub fn new(unit: Unit<'a>, funbox: FunBoxId) -> Self {
        let pos = unit.binder.funbox(funbox).loc.pos;
        Self {
            unit,
            funbox,
            code: Vec::new(),
            depth: 0,
            max_depth: 0,
            atom_pool: Vec::new(),
            atom_indices: FxHashMap::default(),
            consts: Vec::new(),
            objects: Vec::new(),
            try_notes: Vec::new(),
            block_notes: Vec::new(),
            open_blocks: Vec::new(),
            notes: SrcNoteWriter::new(),
            line: pos.line,
            column: pos.column,
            stmts: Vec::new(),
            keep_last_value: false,
            pos,
        }
    }

    pub(super) fn ast(&self) -> &'a Ast {
        self.unit.ast
    }

    /// Fails with a limit error once the native stack budget is spent.
    pub(super) fn check_stack(&self, node: NodeId) -> Result<()> {
        self.unit.check_stack(self.ast().loc(node).pos)
    }

    pub(super) fn binder(&self) -> &'a Binder {
        self.unit.binder
    }

    /// Current bytecode offset.
    pub(super) fn offset(&self) -> usize {
        self.code.len()
    }

    /// Current operand stack depth.
    pub(super) fn depth(&self) -> u32 {
        self.depth
    }

    /// Resets the depth where control arrives only by a jump.
    pub(super) fn set_depth(&mut self, depth: u32) {
        self.depth = depth;
        self.max_depth = self.max_depth.max(depth);
    }

    // ==================== Raw emission ====================

    fn reserve(&mut self, additional: usize) -> Result<()> {
        if self.code.len() + additional > MAX_CODE_LENGTH {
            return Err(CompileError::limit("function too large", self.pos));
        }
        self.code
            .try_reserve(additional)
            .map_err(|_| CompileError::allocation("bytecode", self.pos))
    }

    /// Writes one instruction and accounts for its stack effect.
    fn emit_raw(&mut self, op: Op, operand: &[u8]) -> Result<usize> {
        self.reserve(1 + operand.len())?;
        let offset = self.code.len();
        self.code.push(op as u8);
        self.code.extend_from_slice(operand);
        self.account(offset);
        Ok(offset)
    }

    fn account(&mut self, offset: usize) {
        let uses = stack_uses(&self.code, offset);
        let defs = stack_defs(&self.code, offset);
        let op = Op::from_byte(self.code[offset]).map_or("?", Op::name);
        assert!(
            self.depth >= uses,
            "operand stack underflow at {offset} ({op}): depth {}, uses {uses}",
            self.depth
        );
        self.depth = self.depth - uses + defs;
        self.max_depth = self.max_depth.max(self.depth);
    }

    /// Emits an instruction without operands.
    pub(super) fn emit_op(&mut self, op: Op) -> Result<usize> {
        debug_assert_eq!(op.info().length, 1, "{} takes an operand", op.name());
        self.emit_raw(op, &[])
    }

    pub(super) fn emit_u8(&mut self, op: Op, operand: u8) -> Result<usize> {
        self.emit_raw(op, &[operand])
    }

    pub(super) fn emit_u16(&mut self, op: Op, operand: u16) -> Result<usize> {
        self.emit_raw(op, &operand.to_be_bytes())
    }

    pub(super) fn emit_u32(&mut self, op: Op, operand: u32) -> Result<usize> {
        self.emit_raw(op, &operand.to_be_bytes())
    }

    pub(super) fn emit_i32(&mut self, op: Op, operand: i32) -> Result<usize> {
        self.emit_raw(op, &operand.to_be_bytes())
    }

    /// Emits a count operand, failing if it does not fit in 16 bits.
    pub(super) fn emit_count(&mut self, op: Op, count: usize, what: &str) -> Result<usize> {
        let count = u16::try_from(count).map_err(|_| CompileError::limit(format!("too many {what}"), self.pos))?;
        self.emit_u16(op, count)
    }

    pub(super) fn emit_upvar(&mut self, op: Op, skip: u16, index: u16) -> Result<usize> {
        let [a, b] = skip.to_be_bytes();
        let [c, d] = index.to_be_bytes();
        self.emit_raw(op, &[a, b, c, d])
    }

    /// Emits a `tableswitch` with every target left unpatched.
    pub(super) fn emit_table_switch(&mut self, low: i32, high: i32) -> Result<usize> {
        let count = (high as i64 - low as i64 + 1) as usize;
        let mut operand = Vec::new();
        operand
            .try_reserve(12 + 4 * count)
            .map_err(|_| CompileError::allocation("switch table", self.pos))?;
        operand.extend(0i32.to_be_bytes());
        operand.extend(low.to_be_bytes());
        operand.extend(high.to_be_bytes());
        operand.resize(12 + 4 * count, 0);
        self.emit_raw(Op::TableSwitch, &operand)
    }

    // ==================== Jumps ====================

    pub(super) fn jump_delta(&self, from: usize, to: usize) -> Result<i32> {
        i32::try_from(to as i64 - from as i64).map_err(|_| CompileError::limit("jump too far", self.pos))
    }

    /// Emits a forward jump with a placeholder operand.
    pub(super) fn emit_jump(&mut self, op: Op) -> Result<usize> {
        debug_assert!(op.is_jump());
        self.emit_i32(op, 0)
    }

    /// Emits a jump and threads it onto `list`.
    pub(super) fn emit_jump_into(&mut self, op: Op, list: &mut JumpList) -> Result<()> {
        let at = self.emit_jump(op)?;
        self.push_jump(list, at)
    }

    /// Threads the already emitted jump at `at` onto `list`.
    pub(super) fn push_jump(&mut self, list: &mut JumpList, at: usize) -> Result<()> {
        let link = match list.last {
            Some(prev) => self.jump_delta(prev, at)?,
            None => 0,
        };
        write_i32(&mut self.code, at + 1, link);
        list.last = Some(at);
        Ok(())
    }

    /// Emits a jump to an already known offset.
    pub(super) fn emit_jump_to(&mut self, op: Op, target: usize) -> Result<usize> {
        let at = self.offset();
        let delta = self.jump_delta(at, target)?;
        self.emit_i32(op, delta)
    }

    /// Points the single jump at `at` to `target`.
    pub(super) fn patch_jump(&mut self, at: usize, target: usize) -> Result<()> {
        let delta = self.jump_delta(at, target)?;
        write_i32(&mut self.code, at + 1, delta);
        Ok(())
    }

    /// Points every jump on `list` to `target`.
    pub(super) fn patch_list(&mut self, list: JumpList, target: usize) -> Result<()> {
        let mut next = list.last;
        while let Some(at) = next {
            let link = read_i32(&self.code, at + 1);
            assert!(link >= 0 && (link as usize) <= at, "malformed back-patch chain at {at}");
            self.patch_jump(at, target)?;
            next = (link != 0).then(|| at - link as usize);
        }
        Ok(())
    }

    /// Points every jump on `list` to the current offset.
    pub(super) fn patch_list_here(&mut self, list: JumpList) -> Result<()> {
        let here = self.offset();
        self.patch_list(list, here)
    }

    /// Overwrites a 32-bit slot inside an already emitted instruction.
    pub(super) fn patch_i32(&mut self, at: usize, value: i32) {
        write_i32(&mut self.code, at, value);
    }

    // ==================== Pools ====================

    pub(super) fn atom_index(&mut self, atom: Atom) -> Result<u32> {
        if let Some(&index) = self.atom_indices.get(&atom) {
            return Ok(index);
        }
        let index =
            u32::try_from(self.atom_pool.len()).map_err(|_| CompileError::limit("too many atoms", self.pos))?;
        self.atom_pool.push(self.unit.atoms.get(atom).to_string());
        self.atom_indices.insert(atom, index);
        Ok(index)
    }

    pub(super) fn emit_atom_op(&mut self, op: Op, atom: Atom) -> Result<usize> {
        let index = self.atom_index(atom)?;
        self.emit_u32(op, index)
    }

    pub(super) fn const_index(&mut self, value: Const) -> Result<u32> {
        let index =
            u32::try_from(self.consts.len()).map_err(|_| CompileError::limit("too many constants", self.pos))?;
        self.consts.push(value);
        Ok(index)
    }

    pub(super) fn object_index(&mut self, object: PoolObject) -> Result<u32> {
        let index =
            u32::try_from(self.objects.len()).map_err(|_| CompileError::limit("too many objects", self.pos))?;
        self.objects.push(object);
        Ok(index)
    }

    // ==================== Source positions ====================

    /// Records that code emitted from here on belongs to `pos`.
    pub(super) fn update_position(&mut self, pos: SourcePos) -> Result<()> {
        self.pos = pos;
        let offset = self.offset();
        if pos.line != self.line {
            if pos.line > self.line && pos.line - self.line <= NEWLINE_RUN_MAX {
                for _ in self.line..pos.line {
                    self.notes.add(SrcNoteKind::NewLine, offset, &[]);
                }
            } else {
                if pos.line > MAX_OPERAND {
                    return Err(CompileError::limit("line number too large", pos));
                }
                self.notes.add(SrcNoteKind::SetLine, offset, &[pos.line]);
            }
            self.line = pos.line;
            self.column = 0;
        }
        if pos.column != self.column {
            let delta = zigzag(pos.column as i64 - self.column as i64);
            if delta > MAX_OPERAND {
                return Err(CompileError::limit("column number too large", pos));
            }
            self.notes.add(SrcNoteKind::ColSpan, offset, &[delta]);
            self.column = pos.column;
        }
        Ok(())
    }

    /// Adds a marker note at `offset`.
    pub(super) fn note(&mut self, kind: SrcNoteKind, offset: usize) {
        self.notes.add(kind, offset, &[]);
    }

    // ==================== Statement frames ====================

    pub(super) fn push_stmt(&mut self, kind: StmtType, labels: Vec<Atom>) {
        self.stmts.push(StmtInfo {
            kind,
            labels,
            breaks: JumpList::default(),
            continues: JumpList::default(),
            gosubs: JumpList::default(),
        });
    }

    pub(super) fn pop_stmt(&mut self, kind: StmtType) -> StmtInfo {
        let info = self.stmts.pop().expect("statement frame stack underflow");
        assert_eq!(info.kind, kind, "statement frames out of order");
        info
    }

    // ==================== Block scopes ====================

    /// Enters `scope` if it holds bindings, instantiating its function
    /// declarations. Returns whether a scope frame was pushed.
    pub(super) fn enter_block_scope(&mut self, scope: Option<ScopeId>) -> Result<bool> {
        let Some(scope) = scope else {
            return Ok(false);
        };
        let data = self.binder().scope(scope);
        if !data.has_lexicals() {
            return Ok(false);
        }
        let mut bindings = Vec::with_capacity(data.decls.len());
        for &def in &data.decls {
            let d = self.binder().def(def);
            let Some(Slot::Block(slot)) = d.slot else {
                continue;
            };
            let local = self.block_local(self.funbox, slot)?;
            bindings.push((self.unit.atoms.get(d.name).to_string(), local));
        }
        let index = self.object_index(PoolObject::Block(BlockScope { bindings }))?;
        self.emit_u32(Op::EnterBlock, index)?;

        let note = u32::try_from(self.block_notes.len())
            .map_err(|_| CompileError::limit("too many block scopes", self.pos))?;
        self.block_notes.push(BlockScopeNote {
            index,
            start: self.offset() as u32,
            length: 0,
            parent: self.open_blocks.last().copied(),
        });
        self.open_blocks.push(note);
        self.push_stmt(StmtType::Scope, Vec::new());
        self.emit_function_decls(scope)?;
        Ok(true)
    }

    /// Leaves the innermost block scope.
    pub(super) fn leave_block_scope(&mut self) -> Result<()> {
        self.pop_stmt(StmtType::Scope);
        let note = self.open_blocks.pop().expect("no open block scope");
        let end = self.offset() as u32;
        let entry = &mut self.block_notes[note as usize];
        entry.length = end - entry.start;
        self.emit_op(Op::LeaveBlock)?;
        Ok(())
    }

    /// Instantiates the function declarations hoisted to `scope`.
    pub(super) fn emit_function_decls(&mut self, scope: ScopeId) -> Result<()> {
        let decls = &self.binder().scope(scope).fun_decls;
        for &funbox in decls {
            self.emit_lambda(funbox)?;
            let site = self
                .binder()
                .funbox(funbox)
                .name_use
                .expect("function declaration without a name binding");
            self.emit_set_binding(site)?;
            self.emit_op(Op::Pop)?;
        }
        Ok(())
    }

    /// Pushes a closure for `funbox`, compiling it now unless it was
    /// deferred.
    pub(super) fn emit_lambda(&mut self, funbox: FunBoxId) -> Result<()> {
        let fb = self.binder().funbox(funbox);
        let name = fb.name.map(|n| self.unit.atoms.get(n).to_string());
        let object = match &fb.lazy {
            Some(lazy) => PoolObject::LazyFunction(LazyFunction {
                name,
                kind: fb.kind,
                syntax: fb.syntax,
                strict: fb.strict,
                start: lazy.start,
                end: lazy.end,
                pos: lazy.pos,
                free_names: lazy.free_names.iter().map(|&a| self.unit.atoms.get(a).to_string()).collect(),
            }),
            None => {
                let node = self
                    .ast()
                    .function_node(funbox)
                    .expect("function box without a function node");
                PoolObject::Function(Box::new(emit_function(self.unit, node)?))
            }
        };
        let index = self.object_index(object)?;
        self.emit_u32(Op::Lambda, index)?;
        Ok(())
    }

    // ==================== Bindings ====================

    /// Frame slot of block slot `slot` of `funbox`, counted from the first
    /// local.
    fn block_local(&self, funbox: FunBoxId, slot: u16) -> Result<u16> {
        let nvars = self.binder().funbox(funbox).nvars();
        u16::try_from(nvars + slot as usize).map_err(|_| CompileError::limit("too many local variables", self.pos))
    }

    /// Slot index used by upvar instructions: arguments, then vars, then
    /// block-scoped slots of the defining function.
    fn upvar_index(&self, def: DefId, slot: Slot) -> Result<u16> {
        let fb = self.binder().funbox(self.binder().def(def).funbox);
        let index = match slot {
            Slot::Arg(i) => i as usize,
            Slot::Local(i) => fb.nargs() + i as usize,
            Slot::Block(i) => fb.nargs() + fb.nvars() + i as usize,
        };
        u16::try_from(index).map_err(|_| CompileError::limit("too many closure variables", self.pos))
    }

    /// How the use-site `site` reaches its binding.
    pub(super) fn access(&self, site: UseId) -> Result<Access> {
        let use_site = self.binder().use_site(site);
        let def = self.binder().def(use_site.def);
        Ok(match use_site.cookie {
            Some(Cookie { skip: 0, slot }) => match slot {
                Slot::Arg(i) => Access::Arg(i),
                Slot::Local(i) => Access::Local(i),
                Slot::Block(i) => Access::Local(self.block_local(def.funbox, i)?),
            },
            Some(Cookie { skip, slot }) => Access::Upvar {
                skip,
                index: self.upvar_index(use_site.def, slot)?,
            },
            None if def.kind == DefKind::Global && !self.in_dynamic_scope(site) => Access::Global(def.name),
            None => Access::Name(def.name),
        })
    }

    /// True if `with` or direct `eval` may put bindings between the use and
    /// the global object.
    fn in_dynamic_scope(&self, site: UseId) -> bool {
        let use_site = self.binder().use_site(site);
        if use_site.dynamic {
            return true;
        }
        let mut next = Some(use_site.funbox);
        while let Some(id) = next {
            let fb = self.binder().funbox(id);
            if fb.dynamic {
                return true;
            }
            next = fb.parent;
        }
        false
    }

    /// The use-site of a name node.
    pub(super) fn use_of(&self, node: NodeId) -> UseId {
        self.ast()
            .node(node)
            .binding
            .expect("name node without a use-site")
    }

    /// Pushes the value of the binding `site` refers to.
    pub(super) fn emit_get_binding(&mut self, site: UseId) -> Result<()> {
        match self.access(site)? {
            Access::Arg(i) => self.emit_u16(Op::GetArg, i)?,
            Access::Local(i) => self.emit_u16(Op::GetLocal, i)?,
            Access::Upvar { skip, index } => self.emit_upvar(Op::GetUpvar, skip, index)?,
            Access::Name(atom) => self.emit_atom_op(Op::GetName, atom)?,
            Access::Global(atom) => self.emit_atom_op(Op::GetGName, atom)?,
        };
        Ok(())
    }

    /// Stores the top of the stack into the binding `site` refers to,
    /// leaving the value in place.
    pub(super) fn emit_set_binding(&mut self, site: UseId) -> Result<()> {
        let use_site = self.binder().use_site(site);
        let def = self.binder().def(use_site.def);
        if def.kind == DefKind::Const && !use_site.declaration {
            self.emit_atom_op(Op::ThrowSetConst, def.name)?;
            return Ok(());
        }
        match self.access(site)? {
            Access::Arg(i) => self.emit_u16(Op::SetArg, i)?,
            Access::Local(i) => self.emit_u16(Op::SetLocal, i)?,
            Access::Upvar { skip, index } => self.emit_upvar(Op::SetUpvar, skip, index)?,
            Access::Name(atom) => self.emit_atom_op(Op::SetName, atom)?,
            Access::Global(atom) => self.emit_atom_op(Op::SetGName, atom)?,
        };
        Ok(())
    }

    /// Stores into a binding by definition, from the function that owns it.
    fn emit_init_local(&mut self, def: DefId) -> Result<()> {
        match self.binder().def(def).slot {
            Some(Slot::Local(i)) => self.emit_u16(Op::SetLocal, i)?,
            Some(Slot::Block(i)) => {
                let local = self.block_local(self.funbox, i)?;
                self.emit_u16(Op::SetLocal, local)?
            }
            other => unreachable!("implicit binding in slot {other:?}"),
        };
        self.emit_op(Op::Pop)?;
        Ok(())
    }

    // ==================== Function prologue ====================

    /// Initializes implicit bindings, default and destructuring parameters,
    /// the rest parameter and hoisted function declarations.
    fn emit_prologue(&mut self, params: &[NodeId], rest: Option<NodeId>) -> Result<()> {
        let fb = self.binder().funbox(self.funbox);
        if fb.kind == FunctionKind::Generator {
            self.emit_op(Op::Generator)?;
        }
        if let Some(def) = fb.arguments {
            self.emit_op(Op::Arguments)?;
            self.emit_init_local(def)?;
        }
        if let Some(def) = fb.callee
            && self.binder().def(def).first_use.is_some()
        {
            self.emit_op(Op::Callee)?;
            self.emit_init_local(def)?;
        }

        for (index, &param) in params.iter().enumerate() {
            let slot = u16::try_from(index).map_err(|_| CompileError::limit("too many arguments", self.pos))?;
            let target = match self.ast().kind(param) {
                NodeKind::WithDefault { target, default } => {
                    let (target, default) = (*target, *default);
                    self.emit_u16(Op::GetArg, slot)?;
                    self.emit_op(Op::Undefined)?;
                    self.emit_op(Op::StrictEq)?;
                    let skip = self.emit_jump(Op::IfEq)?;
                    self.emit_expression(default)?;
                    self.emit_u16(Op::SetArg, slot)?;
                    self.emit_op(Op::Pop)?;
                    let here = self.offset();
                    self.patch_jump(skip, here)?;
                    target
                }
                _ => param,
            };
            if matches!(
                self.ast().kind(target),
                NodeKind::ArrayPattern { .. } | NodeKind::ObjectPattern(_)
            ) {
                self.emit_u16(Op::GetArg, slot)?;
                self.emit_destructuring(target, destructuring::Mode::Consume)?;
            }
        }

        if let Some(rest) = rest {
            let nargs = self.binder().funbox(self.funbox).nargs();
            self.emit_op(Op::Arguments)?;
            self.emit_count(Op::Rest, nargs, "arguments")?;
            let site = self.use_of(rest);
            self.emit_set_binding(site)?;
            self.emit_op(Op::Pop)?;
        }

        let scope = self.binder().funbox(self.funbox).scope;
        self.emit_function_decls(scope)
    }

    // ==================== Completion ====================

    fn bindings(&self) -> Bindings {
        let binder = self.binder();
        let fb = binder.funbox(self.funbox);
        let binding = |def: DefId| {
            let d = binder.def(def);
            Binding {
                name: self.unit.atoms.get(d.name).to_string(),
                kind: d.kind,
                closed_over: d.closed_over,
            }
        };
        Bindings {
            args: fb.args.iter().copied().map(binding).collect(),
            vars: fb.vars.iter().copied().map(binding).collect(),
            blocks: binder.block_defs(self.funbox).into_iter().map(binding).collect(),
        }
    }

    /// Packages the emitted code and side tables.
    pub fn finish(self) -> CompiledFunction {
        assert!(self.stmts.is_empty(), "unclosed statement frames");
        assert!(self.open_blocks.is_empty(), "unclosed block scopes");
        let fb = self.binder().funbox(self.funbox);
        let loc = fb.loc.pos;
        let flags = FunctionFlags {
            strict: fb.strict,
            generator: fb.kind == FunctionKind::Generator,
            arrow: fb.kind == FunctionKind::Arrow,
            uses_arguments: fb.uses_arguments,
            uses_this: fb.uses_this,
            has_direct_eval: fb.has_direct_eval,
            has_with: fb.has_with,
            heavyweight: fb.dynamic,
        };
        CompiledFunction {
            name: fb.name.map(|n| self.unit.atoms.get(n).to_string()),
            bindings: self.bindings(),
            code: self.code,
            max_stack_depth: self.max_depth,
            atoms: self.atom_pool,
            consts: self.consts,
            objects: self.objects,
            try_notes: self.try_notes,
            block_notes: self.block_notes,
            src_notes: self.notes.finish(),
            line: loc.line,
            column: loc.column,
            flags,
        }
    }
}
